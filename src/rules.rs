// Validation rules
// Rule tree evaluated against data to produce path-addressed failures

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::env::Environment;
use crate::expr::EvalExpr;
use crate::functions::stringify;
use crate::path::DataPath;
use crate::resolver::{resolve_and_evaluate, EvalError};

/// Message used when a failing rule's `message` expression resolves to null.
pub const DEFAULT_MESSAGE: &str = "invalid value";

/// A validation rule.
///
/// Rules are immutable: constructed once (from JSON or through the
/// [`crate::builder`] API) and evaluated any number of times. Evaluation is
/// a pure function of `(rule, environment)` — there is no rule-engine state.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Rule {
    /// A constraint on one path.
    ///
    /// `when` gates the rule: resolving to exactly `false` deactivates it.
    /// An active rule fails unless `must` resolves to exactly `true`; the
    /// failure is addressed at the target's absolute path and carries the
    /// resolved `message` and the `properties` verbatim.
    Single {
        target: EvalExpr,
        must: EvalExpr,
        message: EvalExpr,
        when: EvalExpr,
        #[serde(default)]
        properties: IndexMap<String, Value>,
    },

    /// Applies `inner` once per element of the array at `array`, with
    /// `index_var` bound to the element index and the base path rebased to
    /// that element. Iterations are independent: bindings never carry over.
    ForEach {
        array: EvalExpr,
        index_var: String,
        inner: Box<Rule>,
    },

    /// Aggregate of independently evaluated rules; no short-circuit, no
    /// ordering dependency between siblings.
    Multi(Vec<Rule>),
}

/// A path-addressed validation failure. This is ordinary output data, not
/// an error: a caller renders it next to the field at `path`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Failure {
    pub path: DataPath,
    pub message: String,
    #[serde(default)]
    pub properties: IndexMap<String, Value>,
}

/// Evaluate a rule tree, collecting every failure in declaration order.
pub fn evaluate_rule(rule: &Rule, env: &Environment) -> Result<Vec<Failure>, EvalError> {
    let mut failures = Vec::new();
    collect(rule, env, &mut failures)?;
    Ok(failures)
}

fn collect(rule: &Rule, env: &Environment, out: &mut Vec<Failure>) -> Result<(), EvalError> {
    match rule {
        Rule::Single {
            target,
            must,
            message,
            when,
            properties,
        } => {
            // only an explicit `false` deactivates; null and true both
            // leave the rule active
            if resolve_and_evaluate(env, when)? == Value::Bool(false) {
                return Ok(());
            }
            if resolve_and_evaluate(env, must)? == Value::Bool(true) {
                return Ok(());
            }
            let EvalExpr::Path(rel) = target else {
                return Err(EvalError::InvalidArgument(format!(
                    "rule target must be a data path, got a {}",
                    target.kind()
                )));
            };
            let message = match resolve_and_evaluate(env, message)? {
                Value::Null => DEFAULT_MESSAGE.to_string(),
                resolved => stringify(&resolved),
            };
            out.push(Failure {
                path: env.base_path().join(rel),
                message,
                properties: properties.clone(),
            });
            Ok(())
        }

        Rule::ForEach {
            array,
            index_var,
            inner,
        } => {
            let EvalExpr::Path(rel) = array else {
                return Err(EvalError::InvalidArgument(format!(
                    "for-each array must be a data path, got a {}",
                    array.kind()
                )));
            };
            let abs = env.base_path().join(rel);
            match env.get_data(&abs) {
                // nothing there, nothing to iterate
                None | Some(Value::Null) => Ok(()),
                Some(Value::Array(items)) => {
                    for i in 0..items.len() {
                        let element_env = env
                            .bind_var(index_var.clone(), EvalExpr::value(i as i64))
                            .with_base_path(abs.index(i));
                        collect(inner, &element_env, out)?;
                    }
                    Ok(())
                }
                Some(other) => Err(EvalError::InvalidArgument(format!(
                    "for-each array at {abs} resolved to {}",
                    stringify(&other)
                ))),
            }
        }

        Rule::Multi(rules) => {
            for rule in rules {
                collect(rule, env, out)?;
            }
            Ok(())
        }
    }
}
