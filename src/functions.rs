// Builtin function handler table
// Named operators with their null-propagation, numeric-coercion and
// array-broadcast policies

use indexmap::IndexMap;
use serde_json::Value;

use crate::env::{EnvValue, Environment};
use crate::expr::EvalExpr;
use crate::resolver::{op_filter, op_map, resolve_and_evaluate, EvalError};

/// Handler for an operator whose arguments are resolved to values first.
pub type EagerFn = fn(&str, &[Value]) -> Result<Value, EvalError>;

/// Handler that receives the environment and the unresolved arguments and
/// decides itself how and whether to resolve them. May return a rewritten
/// expression which the resolver drives to a fixed point.
pub type ResolveFn = fn(&Environment, &[EvalExpr]) -> Result<EnvValue<EvalExpr>, EvalError>;

/// The two handler kinds, as a tagged variant rather than a trait hierarchy.
#[derive(Clone, Copy)]
pub enum Handler {
    Eager(EagerFn),
    ResolveOnly(ResolveFn),
}

/// Immutable name-to-handler mapping, built once per table.
pub struct FunctionTable {
    handlers: IndexMap<String, Handler>,
}

impl FunctionTable {
    /// Table with no handlers registered.
    pub fn empty() -> Self {
        FunctionTable {
            handlers: IndexMap::new(),
        }
    }

    /// The standard builtin operator set.
    pub fn standard() -> Self {
        FunctionTable::empty()
            .with_handler("+", Handler::Eager(op_add))
            .with_handler("-", Handler::Eager(op_sub))
            .with_handler("*", Handler::Eager(op_mul))
            .with_handler("/", Handler::Eager(op_div))
            .with_handler("<", Handler::Eager(op_lt))
            .with_handler("<=", Handler::Eager(op_le))
            .with_handler(">", Handler::Eager(op_gt))
            .with_handler(">=", Handler::Eager(op_ge))
            .with_handler("=", Handler::Eager(op_eq))
            .with_handler("!=", Handler::Eager(op_ne))
            .with_handler("and", Handler::Eager(op_and))
            .with_handler("or", Handler::Eager(op_or))
            .with_handler("!", Handler::Eager(op_not))
            .with_handler("sum", Handler::Eager(op_sum))
            .with_handler("min", Handler::Eager(op_min))
            .with_handler("max", Handler::Eager(op_max))
            .with_handler("count", Handler::Eager(op_count))
            .with_handler("array", Handler::Eager(op_array))
            .with_handler("string", Handler::Eager(op_string))
            .with_handler("?", Handler::ResolveOnly(op_ternary))
            .with_handler("which", Handler::ResolveOnly(op_which))
            .with_handler("resolve", Handler::ResolveOnly(op_resolve))
            .with_handler(".", Handler::ResolveOnly(op_map))
            .with_handler("[", Handler::ResolveOnly(op_filter))
    }

    /// Register (or replace) a handler, consuming and returning the table.
    pub fn with_handler(mut self, name: impl Into<String>, handler: Handler) -> Self {
        self.handlers.insert(name.into(), handler);
        self
    }

    pub fn get(&self, name: &str) -> Option<Handler> {
        self.handlers.get(name).copied()
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.handlers.keys().map(String::as_str)
    }
}

impl Default for FunctionTable {
    fn default() -> Self {
        FunctionTable::standard()
    }
}

// ── Numeric policy ───────────────────────────────────────────────────────────

/// A numeric operand with its integer-ness preserved. Both operands integer
/// means an integer result (division excepted); any double widens to double.
#[derive(Clone, Copy, Debug)]
enum Num {
    Int(i64),
    Double(f64),
}

impl Num {
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Double(d) => d,
        }
    }
}

fn numeric(name: &str, v: &Value) -> Result<Num, EvalError> {
    match v {
        Value::Number(n) => {
            if let Some(i) = n.as_i64() {
                Ok(Num::Int(i))
            } else if let Some(d) = n.as_f64() {
                Ok(Num::Double(d))
            } else {
                Err(EvalError::InvalidArgument(format!(
                    "{name}: numeric operand out of range"
                )))
            }
        }
        other => Err(EvalError::InvalidArgument(format!(
            "{name}: expected a number, got {}",
            type_name(other)
        ))),
    }
}

fn float_value(name: &str, f: f64) -> Result<Value, EvalError> {
    serde_json::Number::from_f64(f)
        .map(Value::Number)
        .ok_or_else(|| EvalError::InvalidArgument(format!("{name}: non-finite result")))
}

fn type_name(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}

fn two<'a>(name: &str, args: &'a [Value]) -> Result<(&'a Value, &'a Value), EvalError> {
    match args {
        [a, b] => Ok((a, b)),
        _ => Err(EvalError::InvalidArgument(format!(
            "{name}: expected 2 arguments, got {}",
            args.len()
        ))),
    }
}

fn one<'a>(name: &str, args: &'a [Value]) -> Result<&'a Value, EvalError> {
    match args {
        [a] => Ok(a),
        _ => Err(EvalError::InvalidArgument(format!(
            "{name}: expected 1 argument, got {}",
            args.len()
        ))),
    }
}

// ── Arithmetic ───────────────────────────────────────────────────────────────

fn binary_arith(
    name: &str,
    args: &[Value],
    int_op: fn(i64, i64) -> Option<i64>,
    double_op: fn(f64, f64) -> f64,
) -> Result<Value, EvalError> {
    let (a, b) = two(name, args)?;
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    match (numeric(name, a)?, numeric(name, b)?) {
        (Num::Int(x), Num::Int(y)) => match int_op(x, y) {
            Some(i) => Ok(Value::from(i)),
            // integer overflow widens to double
            None => float_value(name, double_op(x as f64, y as f64)),
        },
        (x, y) => float_value(name, double_op(x.as_f64(), y.as_f64())),
    }
}

fn op_add(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    binary_arith(name, args, i64::checked_add, |x, y| x + y)
}

fn op_sub(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    binary_arith(name, args, i64::checked_sub, |x, y| x - y)
}

fn op_mul(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    binary_arith(name, args, i64::checked_mul, |x, y| x * y)
}

/// Division always produces a double, whatever the operands.
fn op_div(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let (a, b) = two(name, args)?;
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    let x = numeric(name, a)?.as_f64();
    let y = numeric(name, b)?.as_f64();
    float_value(name, x / y)
}

// ── Comparison ───────────────────────────────────────────────────────────────

fn binary_cmp(
    name: &str,
    args: &[Value],
    keep: fn(std::cmp::Ordering) -> bool,
) -> Result<Value, EvalError> {
    let (a, b) = two(name, args)?;
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    let ordering = match (numeric(name, a)?, numeric(name, b)?) {
        (Num::Int(x), Num::Int(y)) => x.cmp(&y),
        (x, y) => x
            .as_f64()
            .partial_cmp(&y.as_f64())
            .ok_or_else(|| EvalError::InvalidArgument(format!("{name}: incomparable operands")))?,
    };
    Ok(Value::Bool(keep(ordering)))
}

fn op_lt(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    binary_cmp(name, args, std::cmp::Ordering::is_lt)
}

fn op_le(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    binary_cmp(name, args, std::cmp::Ordering::is_le)
}

fn op_gt(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    binary_cmp(name, args, std::cmp::Ordering::is_gt)
}

fn op_ge(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    binary_cmp(name, args, std::cmp::Ordering::is_ge)
}

// ── Equality ─────────────────────────────────────────────────────────────────

/// Null-safe deep equality: null equals null, numbers compare after
/// widening integers to double, arrays and objects compare element-wise.
pub(crate) fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_f64(), y.as_f64()) {
            (Some(fx), Some(fy)) => fx == fy,
            _ => x == y,
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(u, v)| values_equal(u, v))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, u)| y.get(k).is_some_and(|v| values_equal(u, v)))
        }
        _ => a == b,
    }
}

fn op_eq(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let (a, b) = two(name, args)?;
    Ok(Value::Bool(values_equal(a, b)))
}

fn op_ne(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let (a, b) = two(name, args)?;
    Ok(Value::Bool(!values_equal(a, b)))
}

// ── Boolean ──────────────────────────────────────────────────────────────────

fn boolean(name: &str, v: &Value) -> Result<bool, EvalError> {
    match v {
        Value::Bool(b) => Ok(*b),
        other => Err(EvalError::InvalidArgument(format!(
            "{name}: expected a boolean, got {}",
            type_name(other)
        ))),
    }
}

fn op_and(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let (a, b) = two(name, args)?;
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    Ok(Value::Bool(boolean(name, a)? && boolean(name, b)?))
}

fn op_or(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let (a, b) = two(name, args)?;
    if a.is_null() || b.is_null() {
        return Ok(Value::Null);
    }
    Ok(Value::Bool(boolean(name, a)? || boolean(name, b)?))
}

fn op_not(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let a = one(name, args)?;
    if a.is_null() {
        return Ok(Value::Null);
    }
    Ok(Value::Bool(!boolean(name, a)?))
}

// ── Aggregates ───────────────────────────────────────────────────────────────

type Combine = fn(&str, &[Value]) -> Result<Value, EvalError>;

/// Array-broadcast rule shared by the aggregate operators: a nested array at
/// the combining level recurses one level and rebuilds an array of results
/// instead of applying the scalar combination.
fn broadcast(name: &str, elems: &[Value], combine: Combine) -> Result<Value, EvalError> {
    if elems.iter().any(Value::is_array) {
        let mut out = Vec::with_capacity(elems.len());
        for elem in elems {
            let level: &[Value] = match elem {
                Value::Array(inner) => inner,
                other => std::slice::from_ref(other),
            };
            out.push(broadcast(name, level, combine)?);
        }
        return Ok(Value::Array(out));
    }
    combine(name, elems)
}

fn aggregate(name: &str, args: &[Value], combine: Combine) -> Result<Value, EvalError> {
    let v = one(name, args)?;
    if v.is_null() {
        return Ok(Value::Null);
    }
    let elems: &[Value] = match v {
        Value::Array(items) => items,
        scalar => std::slice::from_ref(scalar),
    };
    broadcast(name, elems, combine)
}

/// Coerce a flat combining level to doubles; any null poisons the level.
fn doubles_or_null(name: &str, elems: &[Value]) -> Result<Option<Vec<f64>>, EvalError> {
    let mut out = Vec::with_capacity(elems.len());
    for elem in elems {
        if elem.is_null() {
            return Ok(None);
        }
        out.push(numeric(name, elem)?.as_f64());
    }
    Ok(Some(out))
}

fn op_sum(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    aggregate(name, args, |name, elems| {
        match doubles_or_null(name, elems)? {
            None => Ok(Value::Null),
            Some(values) => float_value(name, values.iter().sum()),
        }
    })
}

fn op_min(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    aggregate(name, args, |name, elems| {
        match doubles_or_null(name, elems)? {
            None => Ok(Value::Null),
            Some(values) => match values.iter().copied().reduce(f64::min) {
                Some(m) => float_value(name, m),
                None => Ok(Value::Null),
            },
        }
    })
}

fn op_max(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    aggregate(name, args, |name, elems| {
        match doubles_or_null(name, elems)? {
            None => Ok(Value::Null),
            Some(values) => match values.iter().copied().reduce(f64::max) {
                Some(m) => float_value(name, m),
                None => Ok(Value::Null),
            },
        }
    })
}

/// `count` ignores element type entirely, nulls included.
fn op_count(name: &str, args: &[Value]) -> Result<Value, EvalError> {
    aggregate(name, args, |_, elems| Ok(Value::from(elems.len() as i64)))
}

// ── Construction ─────────────────────────────────────────────────────────────

/// Build an array value from the arguments, flattening one level of
/// argument-side arrays: `array(1, [2, 3], 4)` is `[1, 2, 3, 4]`.
fn op_array(_name: &str, args: &[Value]) -> Result<Value, EvalError> {
    let mut out = Vec::with_capacity(args.len());
    for arg in args {
        match arg {
            Value::Array(items) => out.extend(items.iter().cloned()),
            other => out.push(other.clone()),
        }
    }
    Ok(Value::Array(out))
}

// ── String ───────────────────────────────────────────────────────────────────

/// The concatenation string form: null renders empty, objects render as a
/// fixed placeholder, integers render without a decimal point.
pub fn stringify(v: &Value) -> String {
    match v {
        Value::Null => String::new(),
        Value::Bool(b) => b.to_string(),
        Value::Number(n) => n.to_string(),
        Value::String(s) => s.clone(),
        Value::Array(items) => items.iter().map(stringify).collect(),
        Value::Object(_) => "[object]".to_string(),
    }
}

fn op_string(_name: &str, args: &[Value]) -> Result<Value, EvalError> {
    Ok(Value::String(args.iter().map(stringify).collect()))
}

// ── Resolve-only operators ───────────────────────────────────────────────────

fn expr_args<'a>(
    name: &str,
    args: &'a [EvalExpr],
    expected: usize,
) -> Result<&'a [EvalExpr], EvalError> {
    if args.len() == expected {
        Ok(args)
    } else {
        Err(EvalError::InvalidArgument(format!(
            "{name}: expected {expected} arguments, got {}",
            args.len()
        )))
    }
}

/// `?(cond, then, else)` — condition resolved fully, the selected branch
/// returned unresolved so the unselected branch is never evaluated.
fn op_ternary(env: &Environment, args: &[EvalExpr]) -> Result<EnvValue<EvalExpr>, EvalError> {
    let args = expr_args("?", args, 3)?;
    match resolve_and_evaluate(env, &args[0])? {
        Value::Null => Ok(env.with_value(EvalExpr::null())),
        Value::Bool(true) => Ok(env.with_value(args[1].clone())),
        Value::Bool(false) => Ok(env.with_value(args[2].clone())),
        other => Err(EvalError::InvalidArgument(format!(
            "?: condition must resolve to a boolean, got {}",
            type_name(&other)
        ))),
    }
}

/// `which(subject, c1, r1, c2, r2, ..., default)` — folds the pairs into
/// nested conditionals comparing the subject with `=`, left to right; the
/// trailing lone value is the default. With no trailing default the result
/// of an unmatched subject is null, and `which(subject)` alone is null.
fn op_which(env: &Environment, args: &[EvalExpr]) -> Result<EnvValue<EvalExpr>, EvalError> {
    let Some((subject, rest)) = args.split_first() else {
        return Err(EvalError::InvalidArgument(
            "which: expected a subject argument".to_string(),
        ));
    };
    let (pairs, default) = if rest.len() % 2 == 1 {
        (&rest[..rest.len() - 1], rest[rest.len() - 1].clone())
    } else {
        (rest, EvalExpr::null())
    };
    let mut rewritten = default;
    for pair in pairs.chunks_exact(2).rev() {
        rewritten = EvalExpr::call(
            "?",
            vec![
                EvalExpr::call("=", vec![subject.clone(), pair[0].clone()]),
                pair[1].clone(),
                rewritten,
            ],
        );
    }
    Ok(env.with_value(rewritten))
}

/// `resolve(expr)` — force full resolution and reinsert the result as a
/// value, explicitly breaking laziness.
fn op_resolve(env: &Environment, args: &[EvalExpr]) -> Result<EnvValue<EvalExpr>, EvalError> {
    let args = expr_args("resolve", args, 1)?;
    let value = resolve_and_evaluate(env, &args[0])?;
    Ok(env.with_value(EvalExpr::Value(value)))
}
