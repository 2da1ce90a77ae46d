// Expression model
// The tagged-union tree resolved by the resolver against a data tree

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::path::DataPath;

/// A node of the expression tree.
///
/// `Value` is the terminal form: the resolver never re-wraps a `Value` in
/// further unresolved structure. The expression-level `Array` variant is
/// distinct from a resolved `Value(Value::Array)` — it may still contain
/// paths and calls awaiting resolution.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum EvalExpr {
    /// A fully resolved leaf. Arrays/objects inside hold resolved values
    /// only, never unresolved expressions.
    Value(Value),

    /// A reference into the data tree, relative to the environment's
    /// current base path.
    Path(DataPath),

    /// Function application; argument count and types are function-specific.
    Call { name: String, args: Vec<EvalExpr> },

    /// Reference to a lexically bound name (introduced by for-each rules).
    Var(String),

    /// An element paired with a predicate-match flag, produced by the
    /// filter operator. The wrapping survives nested map operations.
    Optional { value: Box<EvalExpr>, matched: bool },

    /// An unresolved expression-level array.
    Array(Vec<EvalExpr>),
}

impl EvalExpr {
    /// Create a resolved value node.
    pub fn value(v: impl Into<Value>) -> Self {
        EvalExpr::Value(v.into())
    }

    /// Create a null value node.
    pub fn null() -> Self {
        EvalExpr::Value(Value::Null)
    }

    /// Create a path reference node.
    pub fn path(path: DataPath) -> Self {
        EvalExpr::Path(path)
    }

    /// Create a function call node.
    pub fn call(name: impl Into<String>, args: Vec<EvalExpr>) -> Self {
        EvalExpr::Call {
            name: name.into(),
            args,
        }
    }

    /// Create a variable reference node.
    pub fn var(name: impl Into<String>) -> Self {
        EvalExpr::Var(name.into())
    }

    /// Create an optional wrapper around an element.
    pub fn optional(value: EvalExpr, matched: bool) -> Self {
        EvalExpr::Optional {
            value: Box::new(value),
            matched,
        }
    }

    /// Create an unresolved array node.
    pub fn array(items: Vec<EvalExpr>) -> Self {
        EvalExpr::Array(items)
    }

    pub fn as_value(&self) -> Option<&Value> {
        match self {
            EvalExpr::Value(v) => Some(v),
            _ => None,
        }
    }

    /// True when no further resolution pass can change this expression:
    /// a `Value`, or an `Optional` chain ending in a `Value`.
    pub fn is_terminal(&self) -> bool {
        match self {
            EvalExpr::Value(_) => true,
            EvalExpr::Optional { value, .. } => value.is_terminal(),
            _ => false,
        }
    }

    /// Structural depth of the tree; used to bound fixed-point resolution.
    pub fn depth(&self) -> usize {
        match self {
            EvalExpr::Value(_) | EvalExpr::Path(_) | EvalExpr::Var(_) => 1,
            EvalExpr::Optional { value, .. } => 1 + value.depth(),
            EvalExpr::Call { args, .. } => {
                1 + args.iter().map(EvalExpr::depth).max().unwrap_or(0)
            }
            EvalExpr::Array(items) => {
                1 + items.iter().map(EvalExpr::depth).max().unwrap_or(0)
            }
        }
    }

    /// Short human-readable name for the node shape, used in error messages.
    pub fn kind(&self) -> &'static str {
        match self {
            EvalExpr::Value(_) => "value",
            EvalExpr::Path(_) => "path",
            EvalExpr::Call { .. } => "call",
            EvalExpr::Var(_) => "variable",
            EvalExpr::Optional { .. } => "optional",
            EvalExpr::Array(_) => "array",
        }
    }
}
