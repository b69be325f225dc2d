//! Arithmetic: `+ - * / %` and unary negation, with overflow as errors.

use std::sync::Arc;

use crate::{
    decls::{FunctionDecl, OverloadDecl},
    dispatch::{Dispatcher, OverloadImpl},
    operators,
    stdlib::{list_of, param},
    temporal::TemporalError,
    types::CelType,
    value::{ErrorValue, EvalResult, Value},
};

pub fn declarations(out: &mut Vec<FunctionDecl>) {
    let mut add = FunctionDecl::new(operators::ADD);
    add.add_overload(OverloadDecl::global("add_int64", vec![CelType::Int, CelType::Int], CelType::Int));
    add.add_overload(OverloadDecl::global("add_uint64", vec![CelType::Uint, CelType::Uint], CelType::Uint));
    add.add_overload(OverloadDecl::global(
        "add_double",
        vec![CelType::Double, CelType::Double],
        CelType::Double,
    ));
    add.add_overload(OverloadDecl::global(
        "add_string",
        vec![CelType::String, CelType::String],
        CelType::String,
    ));
    add.add_overload(OverloadDecl::global(
        "add_bytes",
        vec![CelType::Bytes, CelType::Bytes],
        CelType::Bytes,
    ));
    add.add_overload(OverloadDecl::global(
        "add_list",
        vec![list_of(param("A")), list_of(param("A"))],
        list_of(param("A")),
    ));
    add.add_overload(OverloadDecl::global(
        "add_timestamp_duration",
        vec![CelType::Timestamp, CelType::Duration],
        CelType::Timestamp,
    ));
    add.add_overload(OverloadDecl::global(
        "add_duration_timestamp",
        vec![CelType::Duration, CelType::Timestamp],
        CelType::Timestamp,
    ));
    add.add_overload(OverloadDecl::global(
        "add_duration_duration",
        vec![CelType::Duration, CelType::Duration],
        CelType::Duration,
    ));
    out.push(add);

    let mut sub = FunctionDecl::new(operators::SUBTRACT);
    sub.add_overload(OverloadDecl::global(
        "subtract_int64",
        vec![CelType::Int, CelType::Int],
        CelType::Int,
    ));
    sub.add_overload(OverloadDecl::global(
        "subtract_uint64",
        vec![CelType::Uint, CelType::Uint],
        CelType::Uint,
    ));
    sub.add_overload(OverloadDecl::global(
        "subtract_double",
        vec![CelType::Double, CelType::Double],
        CelType::Double,
    ));
    sub.add_overload(OverloadDecl::global(
        "subtract_timestamp_timestamp",
        vec![CelType::Timestamp, CelType::Timestamp],
        CelType::Duration,
    ));
    sub.add_overload(OverloadDecl::global(
        "subtract_timestamp_duration",
        vec![CelType::Timestamp, CelType::Duration],
        CelType::Timestamp,
    ));
    sub.add_overload(OverloadDecl::global(
        "subtract_duration_duration",
        vec![CelType::Duration, CelType::Duration],
        CelType::Duration,
    ));
    out.push(sub);

    let mut mul = FunctionDecl::new(operators::MULTIPLY);
    mul.add_overload(OverloadDecl::global(
        "multiply_int64",
        vec![CelType::Int, CelType::Int],
        CelType::Int,
    ));
    mul.add_overload(OverloadDecl::global(
        "multiply_uint64",
        vec![CelType::Uint, CelType::Uint],
        CelType::Uint,
    ));
    mul.add_overload(OverloadDecl::global(
        "multiply_double",
        vec![CelType::Double, CelType::Double],
        CelType::Double,
    ));
    out.push(mul);

    let mut div = FunctionDecl::new(operators::DIVIDE);
    div.add_overload(OverloadDecl::global(
        "divide_int64",
        vec![CelType::Int, CelType::Int],
        CelType::Int,
    ));
    div.add_overload(OverloadDecl::global(
        "divide_uint64",
        vec![CelType::Uint, CelType::Uint],
        CelType::Uint,
    ));
    div.add_overload(OverloadDecl::global(
        "divide_double",
        vec![CelType::Double, CelType::Double],
        CelType::Double,
    ));
    out.push(div);

    let mut modulo = FunctionDecl::new(operators::MODULO);
    modulo.add_overload(OverloadDecl::global(
        "modulo_int64",
        vec![CelType::Int, CelType::Int],
        CelType::Int,
    ));
    modulo.add_overload(OverloadDecl::global(
        "modulo_uint64",
        vec![CelType::Uint, CelType::Uint],
        CelType::Uint,
    ));
    out.push(modulo);

    let mut negate = FunctionDecl::new(operators::NEGATE);
    negate.add_overload(OverloadDecl::global("negate_int64", vec![CelType::Int], CelType::Int));
    negate.add_overload(OverloadDecl::global("negate_double", vec![CelType::Double], CelType::Double));
    out.push(negate);
}

fn binary_mismatch(op: &str, left: &Value, right: &Value) -> ErrorValue {
    ErrorValue::no_such_overload(format!("{} {op} {}", left.type_of(), right.type_of()))
}

fn temporal(result: Result<Value, TemporalError>) -> EvalResult {
    result.map_err(|err| ErrorValue::new(err.to_string()))
}

pub fn add_values(left: Value, right: Value) -> EvalResult {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => a.checked_add(*b).map(Value::Int).ok_or_else(ErrorValue::int_overflow),
        (Value::Uint(a), Value::Uint(b)) => a.checked_add(*b).map(Value::Uint).ok_or_else(ErrorValue::uint_overflow),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a + b)),
        (Value::String(a), Value::String(b)) => {
            let mut combined = String::with_capacity(a.len() + b.len());
            combined.push_str(a);
            combined.push_str(b);
            Ok(Value::String(Arc::from(combined.as_str())))
        }
        (Value::Bytes(a), Value::Bytes(b)) => {
            let mut combined = Vec::with_capacity(a.len() + b.len());
            combined.extend_from_slice(a);
            combined.extend_from_slice(b);
            Ok(Value::bytes(&combined))
        }
        (Value::List(a), Value::List(b)) => {
            let mut combined = Vec::with_capacity(a.len() + b.len());
            combined.extend(a.iter().cloned());
            combined.extend(b.iter().cloned());
            Ok(Value::list(combined))
        }
        (Value::Timestamp(ts), Value::Duration(d)) | (Value::Duration(d), Value::Timestamp(ts)) => {
            temporal(ts.checked_add(*d).map(Value::Timestamp))
        }
        (Value::Duration(a), Value::Duration(b)) => temporal(a.checked_add(*b).map(Value::Duration)),
        _ => Err(binary_mismatch("+", &left, &right)),
    }
}

pub fn subtract_values(left: Value, right: Value) -> EvalResult {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => a.checked_sub(*b).map(Value::Int).ok_or_else(ErrorValue::int_overflow),
        (Value::Uint(a), Value::Uint(b)) => a.checked_sub(*b).map(Value::Uint).ok_or_else(ErrorValue::uint_overflow),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a - b)),
        (Value::Timestamp(a), Value::Timestamp(b)) => temporal(a.since(*b).map(Value::Duration)),
        (Value::Timestamp(a), Value::Duration(b)) => temporal(a.checked_sub(*b).map(Value::Timestamp)),
        (Value::Duration(a), Value::Duration(b)) => temporal(a.checked_sub(*b).map(Value::Duration)),
        _ => Err(binary_mismatch("-", &left, &right)),
    }
}

pub fn multiply_values(left: Value, right: Value) -> EvalResult {
    match (&left, &right) {
        (Value::Int(a), Value::Int(b)) => a.checked_mul(*b).map(Value::Int).ok_or_else(ErrorValue::int_overflow),
        (Value::Uint(a), Value::Uint(b)) => a.checked_mul(*b).map(Value::Uint).ok_or_else(ErrorValue::uint_overflow),
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a * b)),
        _ => Err(binary_mismatch("*", &left, &right)),
    }
}

pub fn divide_values(left: Value, right: Value) -> EvalResult {
    match (&left, &right) {
        (Value::Int(_), Value::Int(0)) => Err(ErrorValue::divide_by_zero()),
        (Value::Int(a), Value::Int(b)) => a.checked_div(*b).map(Value::Int).ok_or_else(ErrorValue::int_overflow),
        (Value::Uint(_), Value::Uint(0)) => Err(ErrorValue::divide_by_zero()),
        (Value::Uint(a), Value::Uint(b)) => Ok(Value::Uint(a / b)),
        // Double division follows IEEE-754: x/0.0 is ±inf or NaN, not an error.
        (Value::Double(a), Value::Double(b)) => Ok(Value::Double(a / b)),
        _ => Err(binary_mismatch("/", &left, &right)),
    }
}

pub fn modulo_values(left: Value, right: Value) -> EvalResult {
    match (&left, &right) {
        (Value::Int(_), Value::Int(0)) => Err(ErrorValue::modulus_by_zero()),
        (Value::Int(a), Value::Int(b)) => a.checked_rem(*b).map(Value::Int).ok_or_else(ErrorValue::int_overflow),
        (Value::Uint(_), Value::Uint(0)) => Err(ErrorValue::modulus_by_zero()),
        (Value::Uint(a), Value::Uint(b)) => Ok(Value::Uint(a % b)),
        _ => Err(binary_mismatch("%", &left, &right)),
    }
}

pub fn negate_value(value: Value) -> EvalResult {
    match value {
        Value::Int(v) => v.checked_neg().map(Value::Int).ok_or_else(ErrorValue::int_overflow),
        Value::Double(v) => Ok(Value::Double(-v)),
        other => Err(ErrorValue::no_such_overload(format!("-{}", other.type_of()))),
    }
}

pub fn register(dispatcher: &mut Dispatcher) {
    for id in [
        "add_int64",
        "add_uint64",
        "add_double",
        "add_string",
        "add_bytes",
        "add_list",
        "add_timestamp_duration",
        "add_duration_timestamp",
        "add_duration_duration",
    ] {
        dispatcher.register(OverloadImpl::binary(id, true, add_values));
    }
    for id in [
        "subtract_int64",
        "subtract_uint64",
        "subtract_double",
        "subtract_timestamp_timestamp",
        "subtract_timestamp_duration",
        "subtract_duration_duration",
    ] {
        dispatcher.register(OverloadImpl::binary(id, true, subtract_values));
    }
    for id in ["multiply_int64", "multiply_uint64", "multiply_double"] {
        dispatcher.register(OverloadImpl::binary(id, true, multiply_values));
    }
    for id in ["divide_int64", "divide_uint64", "divide_double"] {
        dispatcher.register(OverloadImpl::binary(id, true, divide_values));
    }
    for id in ["modulo_int64", "modulo_uint64"] {
        dispatcher.register(OverloadImpl::binary(id, true, modulo_values));
    }
    for id in ["negate_int64", "negate_double"] {
        dispatcher.register(OverloadImpl::unary(id, true, negate_value));
    }
}
