use super::ast::{BinaryOp, CurrentRef, Expr, UnaryOp};
use super::builtins;
use super::{stringify, type_name, ExprError};
use crate::vars::Env;
use serde_json::{Map, Number, Value};
use std::cmp::Ordering;

/// Evaluation scope: the environment plus the element bindings of an
/// enclosing collection helper.
pub struct Scope<'a> {
    pub env: &'a Env,
    element: Option<Value>,
    index: Option<Value>,
    acc: Option<Value>,
}

impl<'a> Scope<'a> {
    pub fn new(env: &'a Env) -> Self {
        Self {
            env,
            element: None,
            index: None,
            acc: None,
        }
    }

    fn nested(&self, element: Value, index: Value, acc: Option<Value>) -> Scope<'a> {
        Scope {
            env: self.env,
            element: Some(element),
            index: Some(index),
            acc,
        }
    }
}

pub fn eval(expr: &Expr, scope: &Scope<'_>) -> Result<Value, ExprError> {
    match expr {
        Expr::Literal(value) => Ok(value.clone()),
        Expr::Ident(name) => scope
            .env
            .lookup(name)
            .ok_or_else(|| ExprError::UnknownIdentifier {
                name: name.clone(),
                available: scope.env.keys(),
            }),
        Expr::Current(which) => {
            let bound = match which {
                CurrentRef::Element => &scope.element,
                CurrentRef::Index => &scope.index,
                CurrentRef::Accumulator => &scope.acc,
            };
            bound.clone().ok_or_else(|| {
                ExprError::Type("'#' references are only valid inside collection helpers".into())
            })
        }
        Expr::Member(target, field) => {
            if let Some(value) = static_lookup(expr, scope) {
                return Ok(value);
            }
            let base = eval(target, scope)?;
            member(&base, field)
        }
        Expr::Index(target, index) => {
            if let Some(value) = static_lookup(expr, scope) {
                return Ok(value);
            }
            let base = eval(target, scope)?;
            let key = eval(index, scope)?;
            index_value(&base, &key)
        }
        Expr::Unary(op, operand) => {
            let value = eval(operand, scope)?;
            match op {
                UnaryOp::Not => Ok(Value::Bool(!truthy(&value))),
                UnaryOp::Neg => match Num::from_value(&value) {
                    Some(Num::Int(i)) => Ok(i
                        .checked_neg()
                        .map(Value::from)
                        .unwrap_or_else(|| Num::Float(-(i as f64)).into_value())),
                    Some(Num::Float(f)) => Ok(Num::Float(-f).into_value()),
                    None => Err(ExprError::Type(format!(
                        "cannot negate {}",
                        type_name(&value)
                    ))),
                },
            }
        }
        Expr::Binary(BinaryOp::And, left, right) => {
            if !truthy(&eval(left, scope)?) {
                return Ok(Value::Bool(false));
            }
            Ok(Value::Bool(truthy(&eval(right, scope)?)))
        }
        Expr::Binary(BinaryOp::Or, left, right) => {
            if truthy(&eval(left, scope)?) {
                return Ok(Value::Bool(true));
            }
            Ok(Value::Bool(truthy(&eval(right, scope)?)))
        }
        Expr::Binary(op, left, right) => {
            let left = eval(left, scope)?;
            let right = eval(right, scope)?;
            binary(*op, &left, &right)
        }
        Expr::Conditional(cond, then, otherwise) => {
            if truthy(&eval(cond, scope)?) {
                eval(then, scope)
            } else {
                eval(otherwise, scope)
            }
        }
        Expr::Array(items) => items
            .iter()
            .map(|item| eval(item, scope))
            .collect::<Result<Vec<_>, _>>()
            .map(Value::Array),
        Expr::Object(fields) => {
            let mut map = Map::new();
            for (key, value) in fields {
                map.insert(key.clone(), eval(value, scope)?);
            }
            Ok(Value::Object(map))
        }
        Expr::Call(name, args) => call(name, args, scope),
    }
}

/// Resolve a static member chain as one tracked path so the tracker records
/// `A.response.body.token` rather than the whole `A` object.
fn static_lookup(expr: &Expr, scope: &Scope<'_>) -> Option<Value> {
    let path = expr.static_path()?;
    scope.env.lookup(&path)
}

fn member(base: &Value, field: &str) -> Result<Value, ExprError> {
    match base {
        Value::Object(map) => Ok(map.get(field).cloned().unwrap_or(Value::Null)),
        Value::Null => Ok(Value::Null),
        Value::Array(items) if field == "length" => Ok(Value::from(items.len() as u64)),
        other => Err(ExprError::Type(format!(
            "cannot access field '{}' on {}",
            field,
            type_name(other)
        ))),
    }
}

fn index_value(base: &Value, key: &Value) -> Result<Value, ExprError> {
    match (base, key) {
        (Value::Array(items), Value::Number(n)) => {
            let i = n
                .as_i64()
                .ok_or_else(|| ExprError::Type("array index must be an integer".into()))?;
            let len = items.len() as i64;
            let i = if i < 0 { len + i } else { i };
            if i < 0 {
                return Ok(Value::Null);
            }
            Ok(items.get(i as usize).cloned().unwrap_or(Value::Null))
        }
        (Value::Object(map), Value::String(k)) => Ok(map.get(k).cloned().unwrap_or(Value::Null)),
        (Value::String(s), Value::Number(n)) => {
            let i = n
                .as_u64()
                .ok_or_else(|| ExprError::Type("string index must be a non-negative integer".into()))?;
            Ok(s.chars()
                .nth(i as usize)
                .map(|c| Value::String(c.to_string()))
                .unwrap_or(Value::Null))
        }
        (Value::Null, _) => Ok(Value::Null),
        (base, key) => Err(ExprError::Type(format!(
            "cannot index {} with {}",
            type_name(base),
            type_name(key)
        ))),
    }
}

fn call(name: &str, args: &[Expr], scope: &Scope<'_>) -> Result<Value, ExprError> {
    match name {
        "get" => {
            let path = string_arg(name, args, 0, scope)?;
            scope
                .env
                .get(&path)
                .map_err(|e| ExprError::Resolve(e.to_string()))
        }
        "has" => {
            let path = string_arg(name, args, 0, scope)?;
            Ok(Value::Bool(scope.env.has(&path)))
        }
        "ai" => {
            let variable = string_arg(name, args, 0, scope)?;
            Ok(scope.env.lookup(&variable).unwrap_or(Value::Null))
        }
        "map" | "filter" | "all" | "any" | "none" | "find" => lambda_form(name, args, scope),
        "count" if args.len() == 2 => lambda_form(name, args, scope),
        "reduce" => reduce(args, scope),
        _ => {
            let values = args
                .iter()
                .map(|arg| eval(arg, scope))
                .collect::<Result<Vec<_>, _>>()?;
            if let Some(function) = scope.env.function(name) {
                return function(&values).map_err(|message| ExprError::Function {
                    name: name.to_string(),
                    message,
                });
            }
            match builtins::lookup(name) {
                Some(builtin) => (builtin.call)(&values).map_err(|message| ExprError::Function {
                    name: name.to_string(),
                    message,
                }),
                None => Err(ExprError::UnknownFunction(name.to_string())),
            }
        }
    }
}

fn string_arg(function: &str, args: &[Expr], i: usize, scope: &Scope<'_>) -> Result<String, ExprError> {
    let arg = args.get(i).ok_or_else(|| ExprError::Function {
        name: function.to_string(),
        message: format!("missing argument {}", i + 1),
    })?;
    match eval(arg, scope)? {
        Value::String(s) => Ok(s),
        other => Err(ExprError::Function {
            name: function.to_string(),
            message: format!("argument {} must be a string, got {}", i + 1, type_name(&other)),
        }),
    }
}

/// Elements of a collection as `(index-or-key, element)` pairs.
fn elements(function: &str, collection: Value) -> Result<Vec<(Value, Value)>, ExprError> {
    match collection {
        Value::Array(items) => Ok(items
            .into_iter()
            .enumerate()
            .map(|(i, v)| (Value::from(i as u64), v))
            .collect()),
        Value::Object(map) => Ok(map.into_iter().map(|(k, v)| (Value::String(k), v)).collect()),
        Value::Null => Ok(Vec::new()),
        other => Err(ExprError::Function {
            name: function.to_string(),
            message: format!("expected array or map, got {}", type_name(&other)),
        }),
    }
}

fn lambda_form(name: &str, args: &[Expr], scope: &Scope<'_>) -> Result<Value, ExprError> {
    if args.len() != 2 {
        return Err(ExprError::Function {
            name: name.to_string(),
            message: format!("expected 2 arguments, got {}", args.len()),
        });
    }
    let items = elements(name, eval(&args[0], scope)?)?;
    let body = &args[1];
    let apply = |index: Value, element: Value| -> Result<Value, ExprError> {
        eval(body, &scope.nested(element, index, None))
    };

    match name {
        "map" => {
            let mut out = Vec::with_capacity(items.len());
            for (index, element) in items {
                out.push(apply(index, element)?);
            }
            Ok(Value::Array(out))
        }
        "filter" => {
            let mut out = Vec::new();
            for (index, element) in items {
                if truthy(&apply(index, element.clone())?) {
                    out.push(element);
                }
            }
            Ok(Value::Array(out))
        }
        "find" => {
            for (index, element) in items {
                if truthy(&apply(index, element.clone())?) {
                    return Ok(element);
                }
            }
            Ok(Value::Null)
        }
        "count" => {
            let mut count = 0u64;
            for (index, element) in items {
                if truthy(&apply(index, element)?) {
                    count += 1;
                }
            }
            Ok(Value::from(count))
        }
        "all" => {
            for (index, element) in items {
                if !truthy(&apply(index, element)?) {
                    return Ok(Value::Bool(false));
                }
            }
            Ok(Value::Bool(true))
        }
        "any" | "none" => {
            let mut found = false;
            for (index, element) in items {
                if truthy(&apply(index, element)?) {
                    found = true;
                    break;
                }
            }
            Ok(Value::Bool(if name == "any" { found } else { !found }))
        }
        other => Err(ExprError::UnknownFunction(other.to_string())),
    }
}

fn reduce(args: &[Expr], scope: &Scope<'_>) -> Result<Value, ExprError> {
    if args.len() != 2 && args.len() != 3 {
        return Err(ExprError::Function {
            name: "reduce".into(),
            message: format!("expected 2 or 3 arguments, got {}", args.len()),
        });
    }
    let mut items = elements("reduce", eval(&args[0], scope)?)?.into_iter();
    let mut acc = match args.get(2) {
        Some(initial) => eval(initial, scope)?,
        None => match items.next() {
            Some((_, first)) => first,
            None => return Ok(Value::Null),
        },
    };
    for (index, element) in items {
        acc = eval(&args[1], &scope.nested(element, index, Some(acc)))?;
    }
    Ok(acc)
}

pub fn truthy(value: &Value) -> bool {
    match value {
        Value::Null => false,
        Value::Bool(b) => *b,
        Value::Number(n) => n.as_f64().map(|f| f != 0.0).unwrap_or(false),
        Value::String(s) => !s.is_empty(),
        Value::Array(items) => !items.is_empty(),
        Value::Object(map) => !map.is_empty(),
    }
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Num {
    Int(i64),
    Float(f64),
}

impl Num {
    pub(crate) fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Number(n) => match n.as_i64() {
                Some(i) => Some(Num::Int(i)),
                None => n.as_f64().map(Num::Float),
            },
            _ => None,
        }
    }

    pub(crate) fn as_f64(self) -> f64 {
        match self {
            Num::Int(i) => i as f64,
            Num::Float(f) => f,
        }
    }

    pub(crate) fn into_value(self) -> Value {
        match self {
            Num::Int(i) => Value::from(i),
            Num::Float(f) => {
                // integral results stay integers
                if f.fract() == 0.0 && f.abs() < 9.0e15 {
                    Value::from(f as i64)
                } else {
                    Number::from_f64(f).map(Value::Number).unwrap_or(Value::Null)
                }
            }
        }
    }
}

fn arithmetic(op: BinaryOp, a: Num, b: Num) -> Result<Value, ExprError> {
    if let (Num::Int(x), Num::Int(y)) = (a, b) {
        let exact = match op {
            BinaryOp::Add => x.checked_add(y),
            BinaryOp::Sub => x.checked_sub(y),
            BinaryOp::Mul => x.checked_mul(y),
            BinaryOp::Div => {
                if y == 0 {
                    return Err(ExprError::DivisionByZero);
                }
                if x % y == 0 {
                    x.checked_div(y)
                } else {
                    None
                }
            }
            BinaryOp::Rem => {
                if y == 0 {
                    return Err(ExprError::DivisionByZero);
                }
                x.checked_rem(y)
            }
            _ => None,
        };
        if let Some(result) = exact {
            return Ok(Value::from(result));
        }
    }

    let (x, y) = (a.as_f64(), b.as_f64());
    let result = match op {
        BinaryOp::Add => x + y,
        BinaryOp::Sub => x - y,
        BinaryOp::Mul => x * y,
        BinaryOp::Div | BinaryOp::Rem if y == 0.0 => return Err(ExprError::DivisionByZero),
        BinaryOp::Div => x / y,
        BinaryOp::Rem => x % y,
        other => return Err(ExprError::Type(format!("{:?} is not arithmetic", other))),
    };
    Ok(Number::from_f64(result).map(Value::Number).unwrap_or(Value::Null))
}

fn binary(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExprError> {
    match op {
        BinaryOp::Eq => Ok(Value::Bool(values_equal(left, right))),
        BinaryOp::Ne => Ok(Value::Bool(!values_equal(left, right))),
        BinaryOp::Lt | BinaryOp::Le | BinaryOp::Gt | BinaryOp::Ge => {
            let ordering = compare(left, right).ok_or_else(|| {
                ExprError::Type(format!(
                    "cannot compare {} with {}",
                    type_name(left),
                    type_name(right)
                ))
            })?;
            Ok(Value::Bool(match op {
                BinaryOp::Lt => ordering == Ordering::Less,
                BinaryOp::Le => ordering != Ordering::Greater,
                BinaryOp::Gt => ordering == Ordering::Greater,
                _ => ordering != Ordering::Less,
            }))
        }
        BinaryOp::In => match right {
            Value::Array(items) => Ok(Value::Bool(items.iter().any(|i| values_equal(i, left)))),
            Value::Object(map) => match left {
                Value::String(key) => Ok(Value::Bool(map.contains_key(key))),
                _ => Ok(Value::Bool(false)),
            },
            Value::String(haystack) => Ok(Value::Bool(haystack.contains(&stringify(left)))),
            Value::Null => Ok(Value::Bool(false)),
            other => Err(ExprError::Type(format!(
                "'in' needs an array, map or string, got {}",
                type_name(other)
            ))),
        },
        BinaryOp::Add => match (left, right) {
            (Value::String(a), b) => Ok(Value::String(format!("{}{}", a, stringify(b)))),
            (a, Value::String(b)) => Ok(Value::String(format!("{}{}", stringify(a), b))),
            (Value::Array(a), Value::Array(b)) => {
                Ok(Value::Array(a.iter().chain(b.iter()).cloned().collect()))
            }
            (Value::Object(a), Value::Object(b)) => {
                let mut merged = a.clone();
                merged.extend(b.iter().map(|(k, v)| (k.clone(), v.clone())));
                Ok(Value::Object(merged))
            }
            _ => numeric(op, left, right),
        },
        BinaryOp::Sub | BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => numeric(op, left, right),
        // short-circuited by the caller
        BinaryOp::And => Ok(Value::Bool(truthy(left) && truthy(right))),
        BinaryOp::Or => Ok(Value::Bool(truthy(left) || truthy(right))),
    }
}

fn numeric(op: BinaryOp, left: &Value, right: &Value) -> Result<Value, ExprError> {
    match (Num::from_value(left), Num::from_value(right)) {
        (Some(a), Some(b)) => arithmetic(op, a, b),
        _ => Err(ExprError::Type(format!(
            "operator {:?} not supported between {} and {}",
            op,
            type_name(left),
            type_name(right)
        ))),
    }
}

/// Structural equality where `1 == 1.0`.
pub fn values_equal(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Number(x), Value::Number(y)) => match (x.as_i64(), y.as_i64()) {
            (Some(i), Some(j)) => i == j,
            _ => x.as_f64() == y.as_f64(),
        },
        (Value::Array(x), Value::Array(y)) => {
            x.len() == y.len() && x.iter().zip(y).all(|(p, q)| values_equal(p, q))
        }
        (Value::Object(x), Value::Object(y)) => {
            x.len() == y.len()
                && x.iter()
                    .all(|(k, v)| y.get(k).map(|w| values_equal(v, w)).unwrap_or(false))
        }
        _ => a == b,
    }
}

pub fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Number(_), Value::Number(_)) => {
            let x = Num::from_value(a)?.as_f64();
            let y = Num::from_value(b)?.as_f64();
            x.partial_cmp(&y)
        }
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        _ => None,
    }
}
