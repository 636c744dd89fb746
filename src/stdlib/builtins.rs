//! Built-in Functions Registry
//!
//! Defines all built-in functions available to Anvil programs. The same
//! registry answers arity questions for the validator and dispatches calls
//! for the engine.

use std::collections::HashMap;
use std::fmt;
use std::sync::OnceLock;

use crate::engine::{Context, EvalResult, FaultKind, RuntimeFault, Value};
use crate::frontend::semantic::StaticType;
use crate::utils::Span;

/// Native implementation of a builtin
pub type BuiltinFn = fn(&mut Context, Vec<Value>, Span) -> EvalResult<Value>;

/// Built-in function signature
#[derive(Clone)]
pub struct BuiltinFunc {
    pub name: &'static str,
    pub min_args: usize,
    /// `None` for variadic builtins
    pub max_args: Option<usize>,
    pub ret: StaticType,
    pub call: BuiltinFn,
}

impl BuiltinFunc {
    pub fn accepts(&self, argc: usize) -> bool {
        argc >= self.min_args && self.max_args.map_or(true, |max| argc <= max)
    }

    /// Human readable arity, e.g. `1`, `1 to 2`, `at least 0`
    pub fn arity(&self) -> String {
        match self.max_args {
            Some(max) if max == self.min_args => max.to_string(),
            Some(max) => format!("{} to {}", self.min_args, max),
            None => format!("at least {}", self.min_args),
        }
    }
}

impl fmt::Debug for BuiltinFunc {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinFunc")
            .field("name", &self.name)
            .field("arity", &self.arity())
            .field("ret", &self.ret)
            .finish()
    }
}

/// Registry of all built-in functions
#[derive(Debug)]
pub struct BuiltinRegistry {
    functions: HashMap<&'static str, BuiltinFunc>,
}

impl BuiltinRegistry {
    pub fn new() -> Self {
        let mut registry = Self {
            functions: HashMap::new(),
        };
        registry.register_all();
        registry
    }

    fn register_all(&mut self) {
        // I/O
        self.register("print", 0, None, StaticType::Null, builtin_print);

        // Collections
        self.register("len", 1, Some(1), StaticType::Int, builtin_len);
        self.register("push", 2, Some(2), StaticType::Array, builtin_push);
        self.register("keys", 1, Some(1), StaticType::Array, builtin_keys);

        // Conversions
        self.register("str", 1, Some(1), StaticType::Str, builtin_str);
        self.register("int", 1, Some(1), StaticType::Int, builtin_int);
        self.register("float", 1, Some(1), StaticType::Float, builtin_float);
        self.register("type_of", 1, Some(1), StaticType::Str, builtin_type_of);

        // Numbers
        self.register("abs", 1, Some(1), StaticType::Unknown, builtin_abs);
        self.register("min", 2, Some(2), StaticType::Unknown, builtin_min);
        self.register("max", 2, Some(2), StaticType::Unknown, builtin_max);

        // Debug
        self.register("assert", 1, Some(2), StaticType::Null, builtin_assert);
    }

    fn register(
        &mut self,
        name: &'static str,
        min_args: usize,
        max_args: Option<usize>,
        ret: StaticType,
        call: BuiltinFn,
    ) {
        self.functions.insert(
            name,
            BuiltinFunc {
                name,
                min_args,
                max_args,
                ret,
                call,
            },
        );
    }

    /// Check if a function is a built-in
    pub fn is_builtin(&self, name: &str) -> bool {
        self.functions.contains_key(name)
    }

    /// Get a built-in function by name
    pub fn get(&self, name: &str) -> Option<&BuiltinFunc> {
        self.functions.get(name)
    }

    /// Get all built-in functions
    pub fn all(&self) -> impl Iterator<Item = &BuiltinFunc> {
        self.functions.values()
    }
}

impl Default for BuiltinRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// The shared registry
pub fn registry() -> &'static BuiltinRegistry {
    static REGISTRY: OnceLock<BuiltinRegistry> = OnceLock::new();
    REGISTRY.get_or_init(BuiltinRegistry::new)
}

// ==================== Implementations ====================

fn fault(kind: FaultKind, span: Span) -> RuntimeFault {
    RuntimeFault::new(kind, span)
}

fn mismatch(name: &str, expected: &str, found: &Value, span: Span) -> RuntimeFault {
    fault(
        FaultKind::TypeMismatch(format!("{}() expects {}, found {}", name, expected, found.type_name())),
        span,
    )
}

/// Exactly `N` arguments
fn take<const N: usize>(name: &str, args: Vec<Value>, span: Span) -> EvalResult<[Value; N]> {
    let found = args.len();
    args.try_into().map_err(|_| {
        fault(
            FaultKind::ArityMismatch {
                name: name.to_string(),
                expected: N.to_string(),
                found,
            },
            span,
        )
    })
}

fn builtin_print(ctx: &mut Context, args: Vec<Value>, span: Span) -> EvalResult<Value> {
    let line = args.iter().map(|v| v.to_string()).collect::<Vec<_>>().join(" ");
    ctx.host_mut()
        .print(&line)
        .map_err(|e| fault(FaultKind::Io(e.to_string()), span))?;
    Ok(Value::Null)
}

fn builtin_len(_: &mut Context, args: Vec<Value>, span: Span) -> EvalResult<Value> {
    let [value] = take("len", args, span)?;
    let len = match &value {
        Value::Str(s) => s.chars().count(),
        Value::Blob { content, .. } => content.chars().count(),
        Value::Array(items) | Value::Tuple(items) => items.len(),
        Value::Object(fields) => fields.len(),
        Value::Range(start, end) => {
            let len = end
                .checked_sub(*start)
                .ok_or_else(|| fault(FaultKind::IntegerOverflow, span))?;
            return Ok(Value::Int(len.max(0)));
        }
        other => return Err(mismatch("len", "a string, collection or range", other, span)),
    };
    i64::try_from(len)
        .map(Value::Int)
        .map_err(|_| fault(FaultKind::IntegerOverflow, span))
}

/// Arrays are values: `push` returns the extended array
fn builtin_push(_: &mut Context, args: Vec<Value>, span: Span) -> EvalResult<Value> {
    let [target, value] = take("push", args, span)?;
    match target {
        Value::Array(mut items) => {
            items.push(value);
            Ok(Value::Array(items))
        }
        other => Err(mismatch("push", "an array", &other, span)),
    }
}

fn builtin_keys(_: &mut Context, args: Vec<Value>, span: Span) -> EvalResult<Value> {
    let [value] = take("keys", args, span)?;
    match value {
        Value::Object(fields) => Ok(Value::Array(
            fields.into_iter().map(|(key, _)| Value::Str(key)).collect(),
        )),
        other => Err(mismatch("keys", "an object", &other, span)),
    }
}

fn builtin_str(_: &mut Context, args: Vec<Value>, span: Span) -> EvalResult<Value> {
    let [value] = take("str", args, span)?;
    Ok(match value {
        Value::Str(s) => Value::Str(s),
        other => Value::Str(other.to_string()),
    })
}

fn builtin_int(_: &mut Context, args: Vec<Value>, span: Span) -> EvalResult<Value> {
    let [value] = take("int", args, span)?;
    let invalid = |what: String| fault(FaultKind::InvalidConversion(what), span);
    match value {
        Value::Int(i) => Ok(Value::Int(i)),
        Value::Bool(b) => Ok(Value::Int(i64::from(b))),
        Value::Float(f) => {
            if f.is_finite() && f >= i64::MIN as f64 && f < i64::MAX as f64 {
                Ok(Value::Int(f.trunc() as i64))
            } else {
                Err(invalid(format!("{} does not fit in an int", f)))
            }
        }
        Value::Str(s) => s
            .trim()
            .parse()
            .map(Value::Int)
            .map_err(|_| invalid(format!("cannot convert {:?} to int", s))),
        other => Err(invalid(format!("cannot convert {} to int", other.type_name()))),
    }
}

fn builtin_float(_: &mut Context, args: Vec<Value>, span: Span) -> EvalResult<Value> {
    let [value] = take("float", args, span)?;
    let invalid = |what: String| fault(FaultKind::InvalidConversion(what), span);
    match value {
        Value::Float(f) => Ok(Value::Float(f)),
        Value::Int(i) => Ok(Value::Float(i as f64)),
        Value::Str(s) => s
            .trim()
            .parse()
            .map(Value::Float)
            .map_err(|_| invalid(format!("cannot convert {:?} to float", s))),
        other => Err(invalid(format!("cannot convert {} to float", other.type_name()))),
    }
}

fn builtin_type_of(_: &mut Context, args: Vec<Value>, span: Span) -> EvalResult<Value> {
    let [value] = take("type_of", args, span)?;
    Ok(Value::Str(value.type_name().to_string()))
}

fn builtin_abs(_: &mut Context, args: Vec<Value>, span: Span) -> EvalResult<Value> {
    let [value] = take("abs", args, span)?;
    match value {
        Value::Int(i) => i
            .checked_abs()
            .map(Value::Int)
            .ok_or_else(|| fault(FaultKind::IntegerOverflow, span)),
        Value::Float(f) => Ok(Value::Float(f.abs())),
        other => Err(mismatch("abs", "a number", &other, span)),
    }
}

fn min_max(name: &str, args: Vec<Value>, span: Span, pick_first: fn(f64, f64) -> bool) -> EvalResult<Value> {
    let [a, b] = take(name, args, span)?;
    match (&a, &b) {
        (Value::Int(x), Value::Int(y)) => Ok(if pick_first(*x as f64, *y as f64) || x == y { a } else { b }),
        _ => match (a.as_f64(), b.as_f64()) {
            (Some(x), Some(y)) => Ok(Value::Float(if pick_first(x, y) { x } else { y })),
            _ => {
                let bad = if a.as_f64().is_none() { &a } else { &b };
                Err(mismatch(name, "numbers", bad, span))
            }
        },
    }
}

fn builtin_min(_: &mut Context, args: Vec<Value>, span: Span) -> EvalResult<Value> {
    min_max("min", args, span, |x, y| x < y)
}

fn builtin_max(_: &mut Context, args: Vec<Value>, span: Span) -> EvalResult<Value> {
    min_max("max", args, span, |x, y| x > y)
}

fn builtin_assert(_: &mut Context, args: Vec<Value>, span: Span) -> EvalResult<Value> {
    let mut args = args.into_iter();
    let cond = args.next().unwrap_or(Value::Null);
    match cond {
        Value::Bool(true) => Ok(Value::Null),
        Value::Bool(false) => {
            let message = args
                .next()
                .map(|m| m.to_string())
                .unwrap_or_else(|| "condition is false".to_string());
            Err(fault(FaultKind::AssertionFailed(message), span))
        }
        other => Err(mismatch("assert", "a bool", &other, span)),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::BufferHost;
    use pretty_assertions::assert_eq;

    fn call(name: &str, args: Vec<Value>) -> EvalResult<Value> {
        let mut ctx = Context::with_host(BufferHost::new());
        let builtin = registry().get(name).expect("builtin exists");
        (builtin.call)(&mut ctx, args, Span::new(0, 1))
    }

    #[test]
    fn test_registry() {
        let reg = registry();
        for name in ["print", "len", "push", "str", "int", "float", "type_of", "assert", "keys", "abs", "min", "max"] {
            assert!(reg.is_builtin(name), "missing builtin {}", name);
        }
        assert!(reg.get("print").is_some_and(|b| b.accepts(0) && b.accepts(5)));
        assert!(reg.get("assert").is_some_and(|b| b.accepts(2) && !b.accepts(3)));
        assert_eq!(reg.get("assert").map(|b| b.arity()), Some("1 to 2".to_string()));
    }

    #[test]
    fn test_print_goes_to_host() {
        let host = BufferHost::new();
        let mut ctx = Context::with_host(host.clone());
        let print = registry().get("print").expect("print");
        (print.call)(&mut ctx, vec![Value::Str("a".into()), Value::Int(1)], Span::default()).unwrap();
        assert_eq!(host.lines(), vec!["a 1".to_string()]);
    }

    #[test]
    fn test_collections() {
        assert_eq!(call("len", vec![Value::Str("héllo".into())]), Ok(Value::Int(5)));
        assert_eq!(call("len", vec![Value::Range(2, 7)]), Ok(Value::Int(5)));
        assert_eq!(
            call("push", vec![Value::Array(vec![Value::Int(1)]), Value::Int(2)]),
            Ok(Value::Array(vec![Value::Int(1), Value::Int(2)]))
        );
        assert_eq!(
            call("keys", vec![Value::Object(vec![("a".into(), Value::Null), ("b".into(), Value::Null)])]),
            Ok(Value::Array(vec![Value::Str("a".into()), Value::Str("b".into())]))
        );
        assert!(matches!(
            call("len", vec![Value::Int(3)]),
            Err(RuntimeFault { kind: FaultKind::TypeMismatch(_), .. })
        ));
    }

    #[test]
    fn test_conversions() {
        assert_eq!(call("int", vec![Value::Str(" 42 ".into())]), Ok(Value::Int(42)));
        assert_eq!(call("int", vec![Value::Float(-3.9)]), Ok(Value::Int(-3)));
        assert_eq!(call("float", vec![Value::Int(2)]), Ok(Value::Float(2.0)));
        assert_eq!(call("str", vec![Value::Float(1.0)]), Ok(Value::Str("1.0".into())));
        assert_eq!(call("type_of", vec![Value::Tuple(vec![])]), Ok(Value::Str("tuple".into())));
        assert!(matches!(
            call("int", vec![Value::Str("abc".into())]),
            Err(RuntimeFault { kind: FaultKind::InvalidConversion(_), .. })
        ));
        assert!(matches!(
            call("int", vec![Value::Float(f64::NAN)]),
            Err(RuntimeFault { kind: FaultKind::InvalidConversion(_), .. })
        ));
    }

    #[test]
    fn test_numbers() {
        assert_eq!(call("abs", vec![Value::Int(-4)]), Ok(Value::Int(4)));
        assert_eq!(
            call("abs", vec![Value::Int(i64::MIN)]).map_err(|f| f.kind),
            Err(FaultKind::IntegerOverflow)
        );
        assert_eq!(call("min", vec![Value::Int(3), Value::Int(-1)]), Ok(Value::Int(-1)));
        assert_eq!(call("max", vec![Value::Int(3), Value::Float(4.5)]), Ok(Value::Float(4.5)));
    }

    #[test]
    fn test_assert() {
        assert_eq!(call("assert", vec![Value::Bool(true)]), Ok(Value::Null));
        assert_eq!(
            call("assert", vec![Value::Bool(false), Value::Str("boom".into())]).map_err(|f| f.kind),
            Err(FaultKind::AssertionFailed("boom".into()))
        );
    }
}
