// pathrule - embeddable expression language and path-addressed validation
// Copyright (c) 2026 pathrule contributors
// Licensed under the MIT License

//! # pathrule
//!
//! A small embeddable expression language over JSON-shaped data, plus a
//! validation rule engine whose failures are addressed by exact data path.
//!
//! Expressions are plain data ([`EvalExpr`], serializable with serde): there
//! is no text syntax to parse. They reference data through [`DataPath`]s,
//! resolve against an immutable [`Environment`], and reduce step by step to
//! a terminal value under a pluggable [`FunctionTable`]. Mapping and
//! filtering broadcast over arrays while keeping every element addressable,
//! which is what lets a failing [`Rule`] point at `items[1].x` instead of
//! "somewhere in items".
//!
//! ## Architecture
//!
//! - `path` - persistent data paths and their canonical text form
//! - `expr` - the expression tree
//! - `env` - the immutable evaluation environment
//! - `functions` - the operator table (arithmetic, comparison, aggregates, ...)
//! - `resolver` - stepwise resolution to a fixed point
//! - `rules` - validation rules and path-addressed failures
//! - `builder` - typed construction API for expressions and rules
//!
//! ## Example
//!
//! ```
//! use pathrule::builder::{all, for_each, lit, path, rule};
//! use serde_json::json;
//!
//! let rules = all(vec![for_each(
//!     path("items"),
//!     "i",
//!     rule(path("x"))
//!         .must(path("x").gt(lit(0)))
//!         .message(lit("x must be positive"))
//!         .build(),
//! )]);
//!
//! let data = json!({"items": [{"x": 1}, {"x": -2}]});
//! let failures = pathrule::validate(&rules, &data).unwrap();
//! assert_eq!(failures.len(), 1);
//! assert_eq!(failures[0].path.to_string(), "items[1].x");
//! assert_eq!(failures[0].message, "x must be positive");
//! ```

use serde_json::Value;

pub mod builder;
pub mod env;
pub mod expr;
pub mod functions;
pub mod path;
pub mod resolver;
pub mod rules;

pub use env::{EnvValue, Environment};
pub use expr::EvalExpr;
pub use functions::{FunctionTable, Handler};
pub use path::{DataPath, PathParseError, PathSegment};
pub use resolver::{resolve_and_evaluate, resolve_expr, EvalError};
pub use rules::{evaluate_rule, Failure, Rule, DEFAULT_MESSAGE};

/// Evaluate an expression against data in one step, with the standard
/// function table and the base path at the data root.
///
/// For repeated evaluations against the same data, build one
/// [`Environment`] and call [`resolve_and_evaluate`] directly.
///
/// # Errors
///
/// Returns [`EvalError`] if resolution fails; a path that addresses
/// missing data is not an error and resolves to null.
pub fn evaluate(expr: &EvalExpr, data: &Value) -> Result<Value, EvalError> {
    let env = Environment::for_data(data.clone());
    resolve_and_evaluate(&env, expr)
}

/// Evaluate a rule tree against data, collecting every failure.
///
/// An empty vector means the data is valid. Failures are output, not
/// errors; `Err` is reserved for malformed rules (unknown functions,
/// non-path targets, type errors in operators).
pub fn validate(rules: &Rule, data: &Value) -> Result<Vec<Failure>, EvalError> {
    let env = Environment::for_data(data.clone());
    evaluate_rule(rules, &env)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::builder::{lit, path, rule};
    use serde_json::json;

    #[test]
    fn test_evaluate_entry_point() {
        let expr = path("a").add(lit(2));
        assert_eq!(evaluate(&expr, &json!({"a": 1})).unwrap(), json!(3));
    }

    #[test]
    fn test_validate_entry_point() {
        let r = rule(path("x")).must(path("x").gt(lit(0))).build();
        assert!(validate(&r, &json!({"x": 1})).unwrap().is_empty());
        let failures = validate(&r, &json!({"x": 0})).unwrap();
        assert_eq!(failures[0].path.to_string(), "x");
    }
}
