//! Plain built-in functions.
//!
//! Each function registers itself into [`BUILTINS`] at link time. Forms that
//! need unevaluated arguments or the environment (`get`, `has`, `ai`, `map`,
//! `filter`, `reduce`, ...) are handled by the evaluator instead.

use super::eval::{compare, values_equal, Num};
use super::{stringify, type_name};
use lazy_static::lazy_static;
use linkme::distributed_slice;
use serde_json::{Number, Value};
use std::collections::HashMap;

pub type BuiltinFn = fn(&[Value]) -> Result<Value, String>;

pub struct Builtin {
    pub name: &'static str,
    pub call: BuiltinFn,
}

#[distributed_slice]
pub static BUILTINS: [Builtin] = [..];

lazy_static! {
    static ref BY_NAME: HashMap<&'static str, &'static Builtin> =
        BUILTINS.iter().map(|b| (b.name, b)).collect();
}

pub fn lookup(name: &str) -> Option<&'static Builtin> {
    BY_NAME.get(name).copied()
}

pub fn names() -> Vec<&'static str> {
    let mut names: Vec<_> = BY_NAME.keys().copied().collect();
    names.sort_unstable();
    names
}

fn arity(args: &[Value], expected: usize) -> Result<(), String> {
    if args.len() != expected {
        return Err(format!("expected {} argument(s), got {}", expected, args.len()));
    }
    Ok(())
}

fn string_at(args: &[Value], i: usize) -> Result<&str, String> {
    match args.get(i) {
        Some(Value::String(s)) => Ok(s),
        Some(other) => Err(format!(
            "argument {} must be a string, got {}",
            i + 1,
            type_name(other)
        )),
        None => Err(format!("missing argument {}", i + 1)),
    }
}

fn number(value: Value) -> Value {
    match value {
        Value::Number(n) => match n.as_f64() {
            Some(f) if n.as_i64().is_none() && f.fract() == 0.0 && f.abs() < 9.0e15 => {
                Value::from(f as i64)
            }
            _ => Value::Number(n),
        },
        other => other,
    }
}

/// Numbers given either as separate arguments or as one array.
fn numbers(args: &[Value]) -> Result<Vec<Num>, String> {
    let list: &[Value] = match args {
        [Value::Array(items)] => items,
        other => other,
    };
    list.iter()
        .map(|v| Num::from_value(v).ok_or_else(|| format!("expected number, got {}", type_name(v))))
        .collect()
}

#[distributed_slice(BUILTINS)]
static LEN: Builtin = Builtin {
    name: "len",
    call: len,
};

fn len(args: &[Value]) -> Result<Value, String> {
    arity(args, 1)?;
    let n = match &args[0] {
        Value::String(s) => s.chars().count(),
        Value::Array(items) => items.len(),
        Value::Object(map) => map.len(),
        Value::Null => 0,
        other => return Err(format!("len() does not apply to {}", type_name(other))),
    };
    Ok(Value::from(n as u64))
}

#[distributed_slice(BUILTINS)]
static COUNT: Builtin = Builtin {
    name: "count",
    call: len,
};

#[distributed_slice(BUILTINS)]
static KEYS: Builtin = Builtin {
    name: "keys",
    call: |args| {
        arity(args, 1)?;
        match &args[0] {
            Value::Object(map) => Ok(Value::Array(
                map.keys().map(|k| Value::String(k.clone())).collect(),
            )),
            Value::Array(items) => Ok(Value::Array(
                (0..items.len()).map(|i| Value::from(i as u64)).collect(),
            )),
            other => Err(format!("keys() does not apply to {}", type_name(other))),
        }
    },
};

#[distributed_slice(BUILTINS)]
static VALUES: Builtin = Builtin {
    name: "values",
    call: |args| {
        arity(args, 1)?;
        match &args[0] {
            Value::Object(map) => Ok(Value::Array(map.values().cloned().collect())),
            Value::Array(items) => Ok(Value::Array(items.clone())),
            other => Err(format!("values() does not apply to {}", type_name(other))),
        }
    },
};

#[distributed_slice(BUILTINS)]
static CONTAINS: Builtin = Builtin {
    name: "contains",
    call: |args| {
        arity(args, 2)?;
        let found = match (&args[0], &args[1]) {
            (Value::Array(items), needle) => items.iter().any(|i| values_equal(i, needle)),
            (Value::String(s), needle) => s.contains(&stringify(needle)),
            (Value::Object(map), Value::String(key)) => map.contains_key(key),
            (Value::Null, _) => false,
            (other, _) => return Err(format!("contains() does not apply to {}", type_name(other))),
        };
        Ok(Value::Bool(found))
    },
};

#[distributed_slice(BUILTINS)]
static JOIN: Builtin = Builtin {
    name: "join",
    call: |args| {
        let items = match args.first() {
            Some(Value::Array(items)) => items,
            _ => return Err("join() expects an array".to_string()),
        };
        let separator = if args.len() > 1 { string_at(args, 1)? } else { "" };
        Ok(Value::String(
            items.iter().map(stringify).collect::<Vec<_>>().join(separator),
        ))
    },
};

#[distributed_slice(BUILTINS)]
static SPLIT: Builtin = Builtin {
    name: "split",
    call: |args| {
        arity(args, 2)?;
        let text = string_at(args, 0)?;
        let separator = string_at(args, 1)?;
        Ok(Value::Array(
            text.split(separator)
                .map(|part| Value::String(part.to_string()))
                .collect(),
        ))
    },
};

#[distributed_slice(BUILTINS)]
static UPPER: Builtin = Builtin {
    name: "upper",
    call: |args| {
        arity(args, 1)?;
        Ok(Value::String(string_at(args, 0)?.to_uppercase()))
    },
};

#[distributed_slice(BUILTINS)]
static LOWER: Builtin = Builtin {
    name: "lower",
    call: |args| {
        arity(args, 1)?;
        Ok(Value::String(string_at(args, 0)?.to_lowercase()))
    },
};

#[distributed_slice(BUILTINS)]
static TRIM: Builtin = Builtin {
    name: "trim",
    call: |args| {
        arity(args, 1)?;
        Ok(Value::String(string_at(args, 0)?.trim().to_string()))
    },
};

#[distributed_slice(BUILTINS)]
static STRING: Builtin = Builtin {
    name: "string",
    call: |args| {
        arity(args, 1)?;
        Ok(Value::String(stringify(&args[0])))
    },
};

#[distributed_slice(BUILTINS)]
static INT: Builtin = Builtin {
    name: "int",
    call: |args| {
        arity(args, 1)?;
        let n = match &args[0] {
            Value::Number(n) => match n.as_i64() {
                Some(i) => i,
                None => n.as_f64().map(|f| f.trunc() as i64).unwrap_or(0),
            },
            Value::String(s) => {
                let trimmed = s.trim();
                match trimmed.parse::<i64>() {
                    Ok(i) => i,
                    Err(_) => trimmed
                        .parse::<f64>()
                        .map(|f| f.trunc() as i64)
                        .map_err(|_| format!("cannot convert '{}' to int", s))?,
                }
            }
            Value::Bool(b) => i64::from(*b),
            other => return Err(format!("cannot convert {} to int", type_name(other))),
        };
        Ok(Value::from(n))
    },
};

#[distributed_slice(BUILTINS)]
static FLOAT: Builtin = Builtin {
    name: "float",
    call: |args| {
        arity(args, 1)?;
        let f = match &args[0] {
            Value::Number(n) => n.as_f64().unwrap_or(0.0),
            Value::String(s) => s
                .trim()
                .parse::<f64>()
                .map_err(|_| format!("cannot convert '{}' to float", s))?,
            Value::Bool(b) => f64::from(u8::from(*b)),
            other => return Err(format!("cannot convert {} to float", type_name(other))),
        };
        Number::from_f64(f)
            .map(Value::Number)
            .ok_or_else(|| "result is not a finite number".to_string())
    },
};

#[distributed_slice(BUILTINS)]
static ABS: Builtin = Builtin {
    name: "abs",
    call: |args| {
        arity(args, 1)?;
        match Num::from_value(&args[0]) {
            Some(Num::Int(i)) => Ok(Value::from(i.saturating_abs())),
            Some(Num::Float(f)) => Ok(Num::Float(f.abs()).into_value()),
            None => Err(format!("abs() expects a number, got {}", type_name(&args[0]))),
        }
    },
};

fn extreme(args: &[Value], want: std::cmp::Ordering) -> Result<Value, String> {
    let values = numbers(args)?;
    let mut best: Option<Num> = None;
    for candidate in values {
        best = match best {
            None => Some(candidate),
            Some(current) => {
                let a = Num::Float(candidate.as_f64()).into_value();
                let b = Num::Float(current.as_f64()).into_value();
                if compare(&a, &b) == Some(want) {
                    Some(candidate)
                } else {
                    Some(current)
                }
            }
        };
    }
    match best {
        Some(Num::Int(i)) => Ok(Value::from(i)),
        Some(Num::Float(f)) => Ok(number(
            Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null),
        )),
        None => Ok(Value::Null),
    }
}

#[distributed_slice(BUILTINS)]
static MIN: Builtin = Builtin {
    name: "min",
    call: |args| extreme(args, std::cmp::Ordering::Less),
};

#[distributed_slice(BUILTINS)]
static MAX: Builtin = Builtin {
    name: "max",
    call: |args| extreme(args, std::cmp::Ordering::Greater),
};

#[distributed_slice(BUILTINS)]
static SUM: Builtin = Builtin {
    name: "sum",
    call: |args| {
        let values = numbers(args)?;
        if values.iter().all(|n| matches!(n, Num::Int(_))) {
            let mut total: i64 = 0;
            for n in &values {
                if let Num::Int(i) = n {
                    total = total
                        .checked_add(*i)
                        .ok_or_else(|| "integer overflow in sum()".to_string())?;
                }
            }
            return Ok(Value::from(total));
        }
        let total: f64 = values.iter().map(|n| n.as_f64()).sum();
        Number::from_f64(total)
            .map(Value::Number)
            .ok_or_else(|| "result is not a finite number".to_string())
    },
};

#[distributed_slice(BUILTINS)]
static FIRST: Builtin = Builtin {
    name: "first",
    call: |args| {
        arity(args, 1)?;
        match &args[0] {
            Value::Array(items) => Ok(items.first().cloned().unwrap_or(Value::Null)),
            Value::String(s) => Ok(s
                .chars()
                .next()
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(format!("first() does not apply to {}", type_name(other))),
        }
    },
};

#[distributed_slice(BUILTINS)]
static LAST: Builtin = Builtin {
    name: "last",
    call: |args| {
        arity(args, 1)?;
        match &args[0] {
            Value::Array(items) => Ok(items.last().cloned().unwrap_or(Value::Null)),
            Value::String(s) => Ok(s
                .chars()
                .last()
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null)),
            Value::Null => Ok(Value::Null),
            other => Err(format!("last() does not apply to {}", type_name(other))),
        }
    },
};

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn call(name: &str, args: &[Value]) -> Result<Value, String> {
        let builtin = lookup(name).unwrap_or_else(|| panic!("{} not registered", name));
        (builtin.call)(args)
    }

    #[test]
    fn test_registry_is_populated() {
        let names = names();
        for expected in [
            "abs", "contains", "first", "float", "int", "join", "keys", "last", "len", "lower",
            "max", "min", "split", "string", "sum", "trim", "upper", "values",
        ] {
            assert!(names.contains(&expected), "missing {}", expected);
        }
    }

    #[test]
    fn test_string_helpers() {
        assert_eq!(call("upper", &[json!("abc")]).unwrap(), json!("ABC"));
        assert_eq!(call("trim", &[json!("  x ")]).unwrap(), json!("x"));
        assert_eq!(call("split", &[json!("a,b"), json!(",")]).unwrap(), json!(["a", "b"]));
        assert_eq!(call("join", &[json!(["a", 1, true]), json!("-")]).unwrap(), json!("a-1-true"));
        assert_eq!(call("len", &[json!("héllo")]).unwrap(), json!(5));
    }

    #[test]
    fn test_numeric_helpers() {
        assert_eq!(call("sum", &[json!([1, 2, 3])]).unwrap(), json!(6));
        assert_eq!(call("sum", &[json!([1, 2.5])]).unwrap(), json!(3.5));
        assert_eq!(call("max", &[json!(3), json!(9), json!(4)]).unwrap(), json!(9));
        assert_eq!(call("min", &[json!([3, 1.5, 4])]).unwrap(), json!(1.5));
        assert_eq!(call("int", &[json!("42")]).unwrap(), json!(42));
        assert_eq!(call("int", &[json!(3.9)]).unwrap(), json!(3));
        assert_eq!(call("abs", &[json!(-4)]).unwrap(), json!(4));
        assert!(call("int", &[json!("x")]).is_err());
    }

    #[test]
    fn test_collection_helpers() {
        let obj = json!({"b": 2, "a": 1});
        assert_eq!(call("contains", &[obj.clone(), json!("a")]).unwrap(), json!(true));
        assert_eq!(call("contains", &[json!([1, 2]), json!(2.0)]).unwrap(), json!(true));
        assert_eq!(call("first", &[json!([])]).unwrap(), Value::Null);
        assert_eq!(call("last", &[json!([1, 2])]).unwrap(), json!(2));
        assert_eq!(call("keys", &[json!([7, 8])]).unwrap(), json!([0, 1]));
    }
}
