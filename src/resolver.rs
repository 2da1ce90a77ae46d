// Resolver
// Turns an expression plus an environment into a resolved value, driving
// resolve-only operator rewrites to a fixed point and implementing the
// map/filter array broadcasting

use serde_json::Value;
use thiserror::Error;

use crate::env::{EnvValue, Environment};
use crate::expr::EvalExpr;
use crate::functions::Handler;
use crate::path::DataPath;

/// Hard belt on fixed-point passes, against handlers that rewrite an
/// expression into an ever-growing one.
const MAX_PASSES: usize = 4096;

/// Resolution errors. All of these abort the current evaluate/validate call:
/// they indicate a bug in the expression or rule definition, never a normal
/// data condition. Missing data is not an error — it resolves to null.
#[derive(Error, Debug)]
pub enum EvalError {
    /// Wrong arity or operand shape for a builtin.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Call to a name not present in the function table.
    #[error("unknown function: {0}")]
    UnknownFunction(String),

    /// Reference to a variable not in scope.
    #[error("unbound variable: {0}")]
    UnboundVariable(String),

    /// An acknowledged gap in map/filter composition over unsupported
    /// expression shapes; failing fast beats guessing.
    #[error("not implemented: {0}")]
    NotImplemented(String),

    /// The environment's optional deadline passed during resolution.
    #[error("evaluation deadline exceeded")]
    DeadlineExceeded,
}

/// One resolution step.
///
/// `Value` nodes pass through untouched; variables substitute their binding;
/// paths consult the data accessor; arrays resolve element-wise, threading
/// the environment left to right; calls dispatch through the function table.
/// The result may still be unresolved (a resolve-only handler can rewrite
/// the call) — [`resolve_and_evaluate`] repeats until a terminal form.
pub fn resolve_expr(env: &Environment, expr: &EvalExpr) -> Result<EnvValue<EvalExpr>, EvalError> {
    if env.deadline_exceeded() {
        return Err(EvalError::DeadlineExceeded);
    }
    match expr {
        EvalExpr::Value(_) => Ok(env.with_value(expr.clone())),

        EvalExpr::Var(name) => match env.lookup_var(name) {
            Some(bound) => Ok(env.with_value(bound.clone())),
            None => Err(EvalError::UnboundVariable(name.clone())),
        },

        EvalExpr::Path(rel) => {
            let abs = env.base_path().join(rel);
            match env.get_data(&abs) {
                // missing and explicit null are indistinguishable by design
                None | Some(Value::Null) => Ok(env.with_value(EvalExpr::null())),
                // arrays expand to their element paths so the elements stay
                // addressable for broadcasting; a later pass collapses them
                Some(Value::Array(items)) => {
                    let children = (0..items.len())
                        .map(|i| EvalExpr::Path(rel.index(i)))
                        .collect();
                    Ok(env.with_value(EvalExpr::Array(children)))
                }
                Some(raw) => Ok(env.with_value(EvalExpr::Value(raw))),
            }
        }

        EvalExpr::Array(items) => {
            let mut current = env.clone();
            let mut resolved = Vec::with_capacity(items.len());
            for item in items {
                let step = resolve_expr(&current, item)?;
                current = step.env;
                resolved.push(step.value);
            }
            if resolved.iter().all(EvalExpr::is_terminal) {
                Ok(current.with_value(EvalExpr::Value(Value::Array(collapse_items(resolved)))))
            } else {
                Ok(current.with_value(EvalExpr::Array(resolved)))
            }
        }

        EvalExpr::Optional { value, matched } => {
            if value.is_terminal() {
                Ok(env.with_value(expr.clone()))
            } else {
                let step = resolve_expr(env, value)?;
                Ok(step.map(|inner| EvalExpr::optional(inner, *matched)))
            }
        }

        EvalExpr::Call { name, args } => match env.functions().get(name) {
            None => Err(EvalError::UnknownFunction(name.clone())),
            Some(Handler::Eager(f)) => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(resolve_and_evaluate(env, arg)?);
                }
                Ok(env.with_value(EvalExpr::Value(f(name, &values)?)))
            }
            Some(Handler::ResolveOnly(f)) => f(env, args),
        },
    }
}

/// Repeatedly apply [`resolve_expr`] until a terminal form is reached.
///
/// The pass budget is derived once from the structural depth of the input
/// and afterwards grows only by the amount a rewrite deepens the tree
/// (a rewrite may legitimately do so, e.g. `which` lowering to nested
/// conditionals). A handler that keeps rewriting without deepening the
/// tree exhausts the budget; [`MAX_PASSES`] is an absolute ceiling on top.
/// A pass that makes no progress at all fails immediately.
pub fn resolve_and_evaluate(env: &Environment, expr: &EvalExpr) -> Result<Value, EvalError> {
    let mut current = expr.clone();
    let mut depth = current.depth();
    let mut budget = depth + 4;
    let mut passes = 0usize;
    loop {
        if budget == 0 || passes >= MAX_PASSES {
            return Err(EvalError::InvalidArgument(
                "expression failed to resolve to a value within its depth budget".to_string(),
            ));
        }
        budget -= 1;
        passes += 1;

        let step = resolve_expr(env, &current)?;
        if step.value.is_terminal() {
            return Ok(terminal_value(step.value));
        }
        if step.value == current {
            return Err(EvalError::InvalidArgument(
                "resolution stalled on a non-value expression".to_string(),
            ));
        }
        let next_depth = step.value.depth();
        if next_depth > depth {
            budget += next_depth - depth;
        }
        depth = next_depth;
        current = step.value;
    }
}

/// Unwrap a terminal expression: a matched optional yields its value, an
/// unmatched one yields null.
fn terminal_value(expr: EvalExpr) -> Value {
    match item_value(expr) {
        Some(v) => v,
        None => Value::Null,
    }
}

/// Terminal element contribution during array collapse: `None` means the
/// element was filtered out and is omitted from the collapsed array.
fn item_value(expr: EvalExpr) -> Option<Value> {
    match expr {
        EvalExpr::Value(v) => Some(v),
        EvalExpr::Optional { value, matched } => {
            if matched {
                item_value(*value)
            } else {
                None
            }
        }
        // only reachable for terminal expressions
        _ => None,
    }
}

fn collapse_items(items: Vec<EvalExpr>) -> Vec<Value> {
    items.into_iter().filter_map(item_value).collect()
}

// ── Map/filter broadcasting ──────────────────────────────────────────────────

fn two_exprs<'a>(
    name: &str,
    args: &'a [EvalExpr],
) -> Result<(&'a EvalExpr, &'a EvalExpr), EvalError> {
    match args {
        [left, right] => Ok((left, right)),
        _ => Err(EvalError::InvalidArgument(format!(
            "{name}: expected 2 arguments, got {}",
            args.len()
        ))),
    }
}

/// Resolve an expression to weak-head form: calls and variables are stepped
/// until something structural (path, array, optional, value) appears. Paths
/// are deliberately left unresolved so elements stay path-addressable.
fn whnf(env: &Environment, expr: &EvalExpr) -> Result<EvalExpr, EvalError> {
    let mut current = expr.clone();
    let mut passes = 0usize;
    while matches!(current, EvalExpr::Call { .. } | EvalExpr::Var(_)) {
        passes += 1;
        if passes > MAX_PASSES {
            return Err(EvalError::InvalidArgument(
                "operand failed to resolve within its pass budget".to_string(),
            ));
        }
        let step = resolve_expr(env, &current)?;
        if step.value == current {
            break;
        }
        current = step.value;
    }
    Ok(current)
}

/// The map operator `.`: broadcast the right-hand expression over the
/// left-hand operand, rebasing the environment into each element.
pub(crate) fn op_map(
    env: &Environment,
    args: &[EvalExpr],
) -> Result<EnvValue<EvalExpr>, EvalError> {
    let (left, right) = two_exprs("map (.)", args)?;
    let left = whnf(env, left)?;
    let mapped = map_elem(env, &left, right)?;
    Ok(env.with_value(mapped))
}

fn map_elem(env: &Environment, left: &EvalExpr, right: &EvalExpr) -> Result<EvalExpr, EvalError> {
    match left {
        // filter output: map the wrapped value, keep the matched flag
        EvalExpr::Optional { value, matched } => Ok(EvalExpr::optional(
            map_elem(env, value, right)?,
            *matched,
        )),

        EvalExpr::Array(elems) => {
            let mut out = Vec::with_capacity(elems.len());
            for elem in elems {
                out.push(map_elem(env, elem, right)?);
            }
            Ok(EvalExpr::Array(out))
        }

        EvalExpr::Path(rel) => {
            let abs = env.base_path().join(rel);
            match env.get_data(&abs) {
                None | Some(Value::Null) => Ok(EvalExpr::null()),
                Some(Value::Array(items)) => {
                    let mut out = Vec::with_capacity(items.len());
                    for i in 0..items.len() {
                        out.push(map_elem(env, &EvalExpr::Path(rel.index(i)), right)?);
                    }
                    Ok(EvalExpr::Array(out))
                }
                Some(_) => {
                    let rebased = env.with_base_path(abs);
                    let value = resolve_and_evaluate(&rebased, right)?;
                    // the caller's base path is untouched: `env` was never
                    // mutated, only the rebased copy
                    Ok(EvalExpr::Value(value))
                }
            }
        }

        other => Err(EvalError::NotImplemented(format!(
            "map (.) over a {} operand is not supported",
            other.kind()
        ))),
    }
}

/// The filter operator `[`: wrap every element of the left-hand operand in
/// an `Optional` carrying the predicate's verdict for that element.
pub(crate) fn op_filter(
    env: &Environment,
    args: &[EvalExpr],
) -> Result<EnvValue<EvalExpr>, EvalError> {
    let (left, predicate) = two_exprs("filter ([)", args)?;
    let left = whnf(env, left)?;
    let filtered = filter_elem(env, &left, predicate)?;
    Ok(env.with_value(filtered))
}

fn filter_elem(
    env: &Environment,
    left: &EvalExpr,
    predicate: &EvalExpr,
) -> Result<EvalExpr, EvalError> {
    match left {
        EvalExpr::Path(rel) => {
            let abs = env.base_path().join(rel);
            match env.get_data(&abs) {
                None | Some(Value::Null) => Ok(EvalExpr::null()),
                Some(Value::Array(items)) => {
                    let mut out = Vec::with_capacity(items.len());
                    for i in 0..items.len() {
                        let matched = predicate_matches(env, abs.index(i), predicate)?;
                        out.push(EvalExpr::optional(EvalExpr::Path(rel.index(i)), matched));
                    }
                    Ok(EvalExpr::Array(out))
                }
                // scalar operand: same single-element logic, no outer array
                Some(_) => {
                    let matched = predicate_matches(env, abs, predicate)?;
                    Ok(EvalExpr::optional(EvalExpr::Path(rel.clone()), matched))
                }
            }
        }

        EvalExpr::Array(elems) => {
            let mut out = Vec::with_capacity(elems.len());
            for elem in elems {
                out.push(filter_elem(env, elem, predicate)?);
            }
            Ok(EvalExpr::Array(out))
        }

        // filtering an already-filtered element ANDs the verdicts
        EvalExpr::Optional { value, matched } => {
            match filter_elem(env, value, predicate)? {
                EvalExpr::Optional {
                    value: inner,
                    matched: inner_matched,
                } => Ok(EvalExpr::Optional {
                    value: inner,
                    matched: *matched && inner_matched,
                }),
                other => Ok(EvalExpr::optional(other, *matched)),
            }
        }

        other => Err(EvalError::NotImplemented(format!(
            "filter ([) over a {} operand is not supported",
            other.kind()
        ))),
    }
}

fn predicate_matches(
    env: &Environment,
    element: DataPath,
    predicate: &EvalExpr,
) -> Result<bool, EvalError> {
    let rebased = env.with_base_path(element);
    match resolve_and_evaluate(&rebased, predicate)? {
        Value::Bool(b) => Ok(b),
        // a null predicate result keeps null-propagation out of the flag:
        // the element simply does not match
        Value::Null => Ok(false),
        other => Err(EvalError::InvalidArgument(format!(
            "filter predicate must resolve to a boolean, got {}",
            crate::functions::stringify(&other)
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn env_for(data: Value) -> Environment {
        Environment::for_data(data)
    }

    fn eval(env: &Environment, expr: &EvalExpr) -> Value {
        resolve_and_evaluate(env, expr).unwrap()
    }

    fn field_path(text: &str) -> EvalExpr {
        EvalExpr::Path(DataPath::parse(text).unwrap())
    }

    #[test]
    fn test_value_passes_through() {
        let env = env_for(Value::Null);
        assert_eq!(eval(&env, &EvalExpr::value(42)), json!(42));
    }

    #[test]
    fn test_path_resolution_and_missing_is_null() {
        let env = env_for(json!({"a": {"b": 5}}));
        assert_eq!(eval(&env, &field_path("a.b")), json!(5));
        assert_eq!(eval(&env, &field_path("a.c")), Value::Null);
        assert_eq!(eval(&env, &field_path("nope[3].x")), Value::Null);
    }

    #[test]
    fn test_path_to_array_collapses_back_to_array_value() {
        let env = env_for(json!({"xs": [1, [2, 3], null]}));
        assert_eq!(eval(&env, &field_path("xs")), json!([1, [2, 3], null]));
    }

    #[test]
    fn test_relative_path_uses_base() {
        let env = env_for(json!({"items": [{"x": 7}]}))
            .with_base_path(DataPath::parse("items[0]").unwrap());
        assert_eq!(eval(&env, &field_path("x")), json!(7));
    }

    #[test]
    fn test_var_substitution_and_unbound() {
        let env = env_for(Value::Null).bind_var("i", EvalExpr::value(3));
        assert_eq!(eval(&env, &EvalExpr::var("i")), json!(3));
        assert!(matches!(
            resolve_and_evaluate(&env, &EvalExpr::var("j")),
            Err(EvalError::UnboundVariable(_))
        ));
    }

    #[test]
    fn test_unknown_function() {
        let env = env_for(Value::Null);
        let call = EvalExpr::call("frobnicate", vec![]);
        assert!(matches!(
            resolve_and_evaluate(&env, &call),
            Err(EvalError::UnknownFunction(_))
        ));
    }

    #[test]
    fn test_expression_array_resolves_elementwise() {
        let env = env_for(json!({"a": 1}));
        let arr = EvalExpr::array(vec![
            EvalExpr::value(0),
            field_path("a"),
            EvalExpr::call("+", vec![EvalExpr::value(1), EvalExpr::value(1)]),
        ]);
        assert_eq!(eval(&env, &arr), json!([0, 1, 2]));
    }

    #[test]
    fn test_ternary_is_lazy() {
        let env = env_for(Value::Null);
        // the unselected branch calls an unknown function: it must never run
        let expr = EvalExpr::call(
            "?",
            vec![
                EvalExpr::value(true),
                EvalExpr::value("yes"),
                EvalExpr::call("boom", vec![]),
            ],
        );
        assert_eq!(eval(&env, &expr), json!("yes"));

        let null_cond = EvalExpr::call(
            "?",
            vec![
                EvalExpr::null(),
                EvalExpr::value("yes"),
                EvalExpr::value("no"),
            ],
        );
        assert_eq!(eval(&env, &null_cond), Value::Null);
    }

    #[test]
    fn test_which_dispatch() {
        let dispatch = |data: Value| {
            let env = env_for(data);
            let expr = EvalExpr::call(
                "which",
                vec![
                    field_path("status"),
                    EvalExpr::value("A"),
                    EvalExpr::value(1),
                    EvalExpr::value("B"),
                    EvalExpr::value(2),
                    EvalExpr::value(0),
                ],
            );
            resolve_and_evaluate(&env, &expr).unwrap()
        };
        assert_eq!(dispatch(json!({"status": "B"})), json!(2));
        assert_eq!(dispatch(json!({"status": "C"})), json!(0));
    }

    #[test]
    fn test_which_without_default_is_null() {
        // even argument count after the subject: no trailing default
        let env = env_for(json!({"status": "C"}));
        let expr = EvalExpr::call(
            "which",
            vec![
                field_path("status"),
                EvalExpr::value("A"),
                EvalExpr::value(1),
            ],
        );
        assert_eq!(eval(&env, &expr), Value::Null);

        // bare subject: nothing to match, nothing to default to
        let bare = EvalExpr::call("which", vec![field_path("status")]);
        assert_eq!(eval(&env, &bare), Value::Null);
    }

    #[test]
    fn test_resolve_forces_value() {
        let env = env_for(json!({"a": 2}));
        let expr = EvalExpr::call("resolve", vec![field_path("a")]);
        assert_eq!(eval(&env, &expr), json!(2));
    }

    #[test]
    fn test_map_over_array_preserves_length() {
        let env = env_for(json!({"items": [{"v": 1}, {"v": 2}, {"v": 3}]}));
        let expr = EvalExpr::call(".", vec![field_path("items"), field_path("v")]);
        assert_eq!(eval(&env, &expr), json!([1, 2, 3]));
    }

    #[test]
    fn test_map_over_object_rebases() {
        let env = env_for(json!({"a": {"b": 5}}));
        let expr = EvalExpr::call(".", vec![field_path("a"), field_path("b")]);
        assert_eq!(eval(&env, &expr), json!(5));
        // absent right-hand target under the rebased element
        let missing = EvalExpr::call(".", vec![field_path("a"), field_path("c")]);
        assert_eq!(eval(&env, &missing), Value::Null);
    }

    #[test]
    fn test_map_is_right_associative_over_chains() {
        let env = env_for(json!({"a": {"b": {"c": 9}}}));
        let expr = EvalExpr::call(
            ".",
            vec![
                field_path("a"),
                EvalExpr::call(".", vec![field_path("b"), field_path("c")]),
            ],
        );
        assert_eq!(eval(&env, &expr), json!(9));
    }

    #[test]
    fn test_map_over_missing_path_is_null() {
        let env = env_for(json!({}));
        let expr = EvalExpr::call(".", vec![field_path("ghost"), field_path("x")]);
        assert_eq!(eval(&env, &expr), Value::Null);
    }

    #[test]
    fn test_map_over_unsupported_shape_is_not_implemented() {
        let env = env_for(Value::Null);
        // mapping over a plain value is an acknowledged gap
        let expr = EvalExpr::call(".", vec![EvalExpr::value(5), field_path("x")]);
        assert!(matches!(
            resolve_and_evaluate(&env, &expr),
            Err(EvalError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_filter_over_unsupported_shape_is_not_implemented() {
        let env = env_for(Value::Null);
        let expr = EvalExpr::call(
            "[",
            vec![EvalExpr::value(5), EvalExpr::value(true)],
        );
        assert!(matches!(
            resolve_and_evaluate(&env, &expr),
            Err(EvalError::NotImplemented(_))
        ));
    }

    #[test]
    fn test_filter_wraps_every_element() {
        let env = env_for(json!({"xs": [1, -2, 3]}));
        let predicate = EvalExpr::call(
            ">",
            vec![EvalExpr::Path(DataPath::root()), EvalExpr::value(0)],
        );
        let call = EvalExpr::call("[", vec![field_path("xs"), predicate]);

        // one resolution step: still an array of optionals, length preserved
        let step = resolve_expr(&env, &call).unwrap().value;
        match &step {
            EvalExpr::Array(elems) => {
                assert_eq!(elems.len(), 3);
                let flags: Vec<bool> = elems
                    .iter()
                    .map(|e| match e {
                        EvalExpr::Optional { matched, .. } => *matched,
                        other => panic!("expected optional, got {}", other.kind()),
                    })
                    .collect();
                assert_eq!(flags, vec![true, false, true]);
            }
            other => panic!("expected array, got {}", other.kind()),
        }

        // full resolution drops the unmatched elements
        assert_eq!(eval(&env, &call), json!([1, 3]));
    }

    #[test]
    fn test_filter_scalar_has_no_outer_array() {
        let env = env_for(json!({"x": 5}));
        let predicate = EvalExpr::call(
            ">",
            vec![EvalExpr::Path(DataPath::root()), EvalExpr::value(0)],
        );
        let call = EvalExpr::call("[", vec![field_path("x"), predicate]);
        let step = resolve_expr(&env, &call).unwrap().value;
        assert!(matches!(
            step,
            EvalExpr::Optional { matched: true, .. }
        ));
        assert_eq!(eval(&env, &call), json!(5));
    }

    #[test]
    fn test_filter_null_predicate_means_unmatched() {
        let env = env_for(json!({"xs": [{"v": 1}, {}]}));
        let predicate = EvalExpr::call(">", vec![field_path("v"), EvalExpr::value(0)]);
        let call = EvalExpr::call("[", vec![field_path("xs"), predicate]);
        assert_eq!(eval(&env, &call), json!([{"v": 1}]));
    }

    #[test]
    fn test_map_preserves_optional_through_filter() {
        // items[v > 0].v : map over filter output keeps the flags
        let env = env_for(json!({"items": [{"v": 2}, {"v": -1}, {"v": 4}]}));
        let predicate = EvalExpr::call(">", vec![field_path("v"), EvalExpr::value(0)]);
        let filtered = EvalExpr::call("[", vec![field_path("items"), predicate]);
        let mapped = EvalExpr::call(".", vec![filtered, field_path("v")]);

        assert_eq!(eval(&env, &mapped), json!([2, 4]));

        let summed = EvalExpr::call(
            "sum",
            vec![EvalExpr::call(
                ".",
                vec![
                    EvalExpr::call(
                        "[",
                        vec![
                            field_path("items"),
                            EvalExpr::call(">", vec![field_path("v"), EvalExpr::value(0)]),
                        ],
                    ),
                    field_path("v"),
                ],
            )],
        );
        assert_eq!(eval(&env, &summed), json!(6.0));
    }

    #[test]
    fn test_nested_arrays_broadcast_through_map() {
        let env = env_for(json!({
            "groups": [
                {"items": [{"v": 1}, {"v": 2}]},
                {"items": [{"v": 3}]}
            ]
        }));
        let expr = EvalExpr::call(
            ".",
            vec![
                field_path("groups"),
                EvalExpr::call(".", vec![field_path("items"), field_path("v")]),
            ],
        );
        assert_eq!(eval(&env, &expr), json!([[1, 2], [3]]));
    }

    #[test]
    fn test_deadline_aborts_resolution() {
        use std::time::{Duration, Instant};
        let env = env_for(json!({"a": 1}));
        let past = Instant::now()
            .checked_sub(Duration::from_millis(5))
            .unwrap_or_else(Instant::now);
        let expired = env.with_deadline(past);
        assert!(matches!(
            resolve_and_evaluate(&expired, &field_path("a")),
            Err(EvalError::DeadlineExceeded)
        ));
        // a comfortable deadline changes nothing
        let relaxed = env.with_deadline(Instant::now() + Duration::from_secs(60));
        assert_eq!(eval(&relaxed, &field_path("a")), json!(1));
    }

    #[test]
    fn test_non_deepening_rewrite_loop_exhausts_budget() {
        use crate::functions::FunctionTable;
        use std::rc::Rc;

        // a handler pair that rewrites back and forth without ever making
        // the tree deeper must run out of budget, not spin
        fn ping(env: &Environment, args: &[EvalExpr]) -> Result<EnvValue<EvalExpr>, EvalError> {
            Ok(env.with_value(EvalExpr::call("pong", args.to_vec())))
        }
        fn pong(env: &Environment, args: &[EvalExpr]) -> Result<EnvValue<EvalExpr>, EvalError> {
            Ok(env.with_value(EvalExpr::call("ping", args.to_vec())))
        }

        let table = FunctionTable::standard()
            .with_handler("ping", Handler::ResolveOnly(ping))
            .with_handler("pong", Handler::ResolveOnly(pong));
        let env = env_for(Value::Null).with_functions(Rc::new(table));
        let expr = EvalExpr::call("ping", vec![EvalExpr::value(1)]);
        assert!(matches!(
            resolve_and_evaluate(&env, &expr),
            Err(EvalError::InvalidArgument(_))
        ));
    }

    #[test]
    fn test_eager_argument_resolution_collapses_filters() {
        let env = env_for(json!({"xs": [1, -1, 2]}));
        let predicate = EvalExpr::call(
            ">",
            vec![EvalExpr::Path(DataPath::root()), EvalExpr::value(0)],
        );
        let count = EvalExpr::call(
            "count",
            vec![EvalExpr::call("[", vec![field_path("xs"), predicate])],
        );
        assert_eq!(eval(&env, &count), json!(2));
    }
}
