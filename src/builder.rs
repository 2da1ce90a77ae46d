// Typed construction API
// Ergonomic builders over EvalExpr and Rule for rules written in Rust
// rather than deserialized from JSON

use indexmap::IndexMap;
use serde_json::Value;

use crate::expr::EvalExpr;
use crate::path::{DataPath, PathParseError, PathSegment};
use crate::rules::Rule;

/// Build a path expression from its text form, e.g. `path("items[0].name")`.
///
/// # Panics
///
/// Panics if `text` is not a well-formed path. Intended for path literals;
/// use [`try_path`] for runtime input.
pub fn path(text: &str) -> EvalExpr {
    match DataPath::parse(text) {
        Ok(p) => EvalExpr::Path(p),
        Err(e) => panic!("invalid path literal {text:?}: {e}"),
    }
}

/// Fallible form of [`path`].
pub fn try_path(text: &str) -> Result<EvalExpr, PathParseError> {
    Ok(EvalExpr::Path(DataPath::parse(text)?))
}

/// A literal value expression.
pub fn lit(v: impl Into<Value>) -> EvalExpr {
    EvalExpr::value(v)
}

/// A variable reference, resolved against the environment's bindings.
pub fn var(name: impl Into<String>) -> EvalExpr {
    EvalExpr::var(name)
}

/// Build a mapping chain from path text: each dotted step becomes its own
/// path expression, joined right-associatively with the `.` operator, so
/// intermediate arrays broadcast. `navigate("items.value")` maps `value`
/// over every element of `items`; contrast `path("items.value")`, which
/// looks the whole path up in one step. Indices stay attached to the step
/// that owns them: `navigate("rows[0].cells")` has two steps.
pub fn navigate(text: &str) -> EvalExpr {
    let full = match DataPath::parse(text) {
        Ok(p) => p,
        Err(e) => panic!("invalid path literal {text:?}: {e}"),
    };
    let mut steps: Vec<DataPath> = Vec::new();
    for segment in full.segments() {
        match segment {
            PathSegment::Field(_) => steps.push(DataPath::root().push(segment)),
            PathSegment::Index(_) => match steps.last_mut() {
                Some(step) => *step = step.push(segment),
                None => steps.push(DataPath::root().push(segment)),
            },
        }
    }
    let mut chain = match steps.pop() {
        Some(last) => EvalExpr::Path(last),
        None => EvalExpr::Path(DataPath::root()),
    };
    while let Some(step) = steps.pop() {
        chain = EvalExpr::call(".", vec![EvalExpr::Path(step), chain]);
    }
    chain
}

// ── Operator combinators ─────────────────────────────────────────────────────

impl EvalExpr {
    pub fn add(self, rhs: EvalExpr) -> EvalExpr {
        EvalExpr::call("+", vec![self, rhs])
    }

    pub fn sub(self, rhs: EvalExpr) -> EvalExpr {
        EvalExpr::call("-", vec![self, rhs])
    }

    pub fn mul(self, rhs: EvalExpr) -> EvalExpr {
        EvalExpr::call("*", vec![self, rhs])
    }

    pub fn div(self, rhs: EvalExpr) -> EvalExpr {
        EvalExpr::call("/", vec![self, rhs])
    }

    pub fn lt(self, rhs: EvalExpr) -> EvalExpr {
        EvalExpr::call("<", vec![self, rhs])
    }

    pub fn le(self, rhs: EvalExpr) -> EvalExpr {
        EvalExpr::call("<=", vec![self, rhs])
    }

    pub fn gt(self, rhs: EvalExpr) -> EvalExpr {
        EvalExpr::call(">", vec![self, rhs])
    }

    pub fn ge(self, rhs: EvalExpr) -> EvalExpr {
        EvalExpr::call(">=", vec![self, rhs])
    }

    pub fn equals(self, rhs: EvalExpr) -> EvalExpr {
        EvalExpr::call("=", vec![self, rhs])
    }

    pub fn not_equals(self, rhs: EvalExpr) -> EvalExpr {
        EvalExpr::call("!=", vec![self, rhs])
    }

    pub fn and(self, rhs: EvalExpr) -> EvalExpr {
        EvalExpr::call("and", vec![self, rhs])
    }

    pub fn or(self, rhs: EvalExpr) -> EvalExpr {
        EvalExpr::call("or", vec![self, rhs])
    }

    pub fn not(self) -> EvalExpr {
        EvalExpr::call("!", vec![self])
    }

    /// Map `rhs` over this expression's elements (the `.` operator).
    pub fn dot(self, rhs: EvalExpr) -> EvalExpr {
        EvalExpr::call(".", vec![self, rhs])
    }

    /// Keep only the elements for which `predicate` holds (the `[` operator).
    pub fn filter(self, predicate: EvalExpr) -> EvalExpr {
        EvalExpr::call("[", vec![self, predicate])
    }
}

pub fn sum(expr: EvalExpr) -> EvalExpr {
    EvalExpr::call("sum", vec![expr])
}

pub fn min(expr: EvalExpr) -> EvalExpr {
    EvalExpr::call("min", vec![expr])
}

pub fn max(expr: EvalExpr) -> EvalExpr {
    EvalExpr::call("max", vec![expr])
}

pub fn count(expr: EvalExpr) -> EvalExpr {
    EvalExpr::call("count", vec![expr])
}

/// An array of the given expressions, with one level of element-array
/// flattening at evaluation time.
pub fn array_of(items: Vec<EvalExpr>) -> EvalExpr {
    EvalExpr::call("array", items)
}

/// String concatenation of the arguments' string forms.
pub fn concat(parts: Vec<EvalExpr>) -> EvalExpr {
    EvalExpr::call("string", parts)
}

/// `if cond then a else b`, with only the chosen branch evaluated.
pub fn ternary(cond: EvalExpr, then: EvalExpr, otherwise: EvalExpr) -> EvalExpr {
    EvalExpr::call("?", vec![cond, then, otherwise])
}

/// Multi-way dispatch: compares `subject` against each case in turn and
/// yields the matching result, or the trailing default if one is given.
pub fn which(subject: EvalExpr, cases: Vec<EvalExpr>) -> EvalExpr {
    let mut args = Vec::with_capacity(cases.len() + 1);
    args.push(subject);
    args.extend(cases);
    EvalExpr::call("which", args)
}

/// Force full resolution of `expr` before the enclosing expression
/// continues.
pub fn resolve_now(expr: EvalExpr) -> EvalExpr {
    EvalExpr::call("resolve", vec![expr])
}

// ── Rule builders ────────────────────────────────────────────────────────────

/// Start a rule for the field at `target`: `rule(path("x")).must(...)`.
pub fn rule(target: EvalExpr) -> RuleBuilder {
    RuleBuilder {
        target,
        must: EvalExpr::value(true),
        message: EvalExpr::null(),
        when: EvalExpr::value(true),
        properties: IndexMap::new(),
    }
}

/// A rule applied to each element of the array at `array`, with the element
/// index bound to `index_var` inside `inner`.
pub fn for_each(array: EvalExpr, index_var: impl Into<String>, inner: Rule) -> Rule {
    Rule::ForEach {
        array,
        index_var: index_var.into(),
        inner: Box::new(inner),
    }
}

/// A rule that evaluates every given rule and concatenates their failures.
pub fn all(rules: Vec<Rule>) -> Rule {
    Rule::Multi(rules)
}

#[derive(Debug, Clone)]
pub struct RuleBuilder {
    target: EvalExpr,
    must: EvalExpr,
    message: EvalExpr,
    when: EvalExpr,
    properties: IndexMap<String, Value>,
}

impl RuleBuilder {
    /// The constraint; the rule fails unless it resolves to exactly `true`.
    pub fn must(mut self, must: EvalExpr) -> Self {
        self.must = must;
        self
    }

    /// The failure message expression. Null falls back to the default
    /// message; any other value is rendered through its string form.
    pub fn message(mut self, message: EvalExpr) -> Self {
        self.message = message;
        self
    }

    /// Activation gate: the rule is skipped when this resolves to exactly
    /// `false`.
    pub fn when(mut self, when: EvalExpr) -> Self {
        self.when = when;
        self
    }

    /// Attach an opaque property carried verbatim onto any failure.
    pub fn property(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.properties.insert(key.into(), value.into());
        self
    }

    pub fn build(self) -> Rule {
        Rule::Single {
            target: self.target,
            must: self.must,
            message: self.message,
            when: self.when,
            properties: self.properties,
        }
    }
}
