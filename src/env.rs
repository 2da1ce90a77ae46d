// Resolution environment
// Immutable context threaded through every resolver step

use std::rc::Rc;
use std::time::Instant;

use indexmap::IndexMap;
use serde_json::Value;

use crate::expr::EvalExpr;
use crate::functions::FunctionTable;
use crate::path::{DataPath, PathSegment};

/// Caller-supplied data accessor: given an absolute path, return the raw
/// value at that location or `None` for missing. The core never
/// distinguishes missing from an explicit JSON null.
pub type DataAccessor = Rc<dyn Fn(&DataPath) -> Option<Value>>;

/// Immutable resolution context: data accessor, variable bindings, current
/// base path and function table.
///
/// Every "mutator" returns a new `Environment`; the caller's value is never
/// changed. This is what makes rebasing during map/filter/for-each safe —
/// restoring the base path afterwards is automatic because the caller still
/// holds the original.
#[derive(Clone)]
pub struct Environment {
    accessor: DataAccessor,
    bindings: IndexMap<String, EvalExpr>,
    base: DataPath,
    functions: Rc<FunctionTable>,
    deadline: Option<Instant>,
}

impl Environment {
    /// Environment with a custom accessor and the standard function table.
    pub fn new(accessor: DataAccessor) -> Self {
        Environment {
            accessor,
            bindings: IndexMap::new(),
            base: DataPath::root(),
            functions: Rc::new(FunctionTable::standard()),
            deadline: None,
        }
    }

    /// Environment whose accessor walks the given JSON tree by path.
    pub fn for_data(data: Value) -> Self {
        Environment::new(Rc::new(move |path: &DataPath| {
            lookup_value(&data, path).cloned()
        }))
    }

    /// Replace the function table.
    pub fn with_functions(&self, functions: Rc<FunctionTable>) -> Self {
        let mut env = self.clone();
        env.functions = functions;
        env
    }

    pub fn functions(&self) -> &FunctionTable {
        &self.functions
    }

    /// The base path relative `Path` expressions resolve against.
    pub fn base_path(&self) -> &DataPath {
        &self.base
    }

    /// Environment with the base path replaced (rebase).
    pub fn with_base_path(&self, base: DataPath) -> Self {
        let mut env = self.clone();
        env.base = base;
        env
    }

    /// Fetch the raw value at an absolute path, or `None` when missing.
    pub fn get_data(&self, path: &DataPath) -> Option<Value> {
        (self.accessor)(path)
    }

    /// Environment with `name` bound to `expr` (shadowing any outer binding).
    pub fn bind_var(&self, name: impl Into<String>, expr: EvalExpr) -> Self {
        let mut env = self.clone();
        env.bindings.insert(name.into(), expr);
        env
    }

    pub fn lookup_var(&self, name: &str) -> Option<&EvalExpr> {
        self.bindings.get(name)
    }

    /// Environment that aborts resolution with `DeadlineExceeded` once
    /// `deadline` has passed. Bounds pathological nested dispatch/broadcast
    /// expressions without changing the pure-functional contract.
    pub fn with_deadline(&self, deadline: Instant) -> Self {
        let mut env = self.clone();
        env.deadline = Some(deadline);
        env
    }

    pub fn deadline_exceeded(&self) -> bool {
        self.deadline.is_some_and(|d| Instant::now() > d)
    }

    /// Pair this environment, unchanged, with a produced value.
    pub fn with_value<T>(&self, value: T) -> EnvValue<T> {
        EnvValue {
            env: self.clone(),
            value,
        }
    }
}

/// Walk a JSON tree by path segments. Returns `None` as soon as a segment
/// does not apply (missing field, index out of bounds, scalar in the way).
pub fn lookup_value<'a>(data: &'a Value, path: &DataPath) -> Option<&'a Value> {
    let mut current = data;
    for segment in path.segments() {
        current = match (&segment, current) {
            (PathSegment::Field(name), Value::Object(map)) => map.get(name)?,
            (PathSegment::Index(i), Value::Array(items)) => items.get(*i)?,
            _ => return None,
        };
    }
    Some(current)
}

/// A (possibly updated) environment paired with a produced value.
///
/// This is the thread carrying derived bindings forward through a sequence
/// of resolution steps, e.g. resolving array elements left-to-right where
/// each step's environment feeds the next.
pub struct EnvValue<T> {
    pub env: Environment,
    pub value: T,
}

impl<T> EnvValue<T> {
    pub fn new(env: Environment, value: T) -> Self {
        EnvValue { env, value }
    }

    /// Transform the value, keeping the environment.
    pub fn map<U>(self, f: impl FnOnce(T) -> U) -> EnvValue<U> {
        EnvValue {
            env: self.env,
            value: f(self.value),
        }
    }

    /// Chain a step that sees both the environment and the value.
    pub fn and_then<U, E>(
        self,
        f: impl FnOnce(&Environment, T) -> Result<EnvValue<U>, E>,
    ) -> Result<EnvValue<U>, E> {
        f(&self.env, self.value)
    }
}
