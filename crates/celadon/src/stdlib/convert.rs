//! Type conversions and the `type`/`dyn` functions.
//!
//! Conversions are total over their declared signatures but can fail on
//! range (double→int), format (string→int, string→timestamp), or encoding
//! (bytes→string), producing runtime errors rather than silent truncation.

use crate::{
    decls::{FunctionDecl, OverloadDecl},
    dispatch::{Dispatcher, OverloadImpl},
    stdlib::param,
    temporal::{CelDuration, CelTimestamp},
    types::CelType,
    value::{ErrorValue, EvalResult, Value},
};

pub fn declarations(out: &mut Vec<FunctionDecl>) {
    let mut int = FunctionDecl::new("int");
    int.add_overload(OverloadDecl::global("int64_to_int64", vec![CelType::Int], CelType::Int));
    int.add_overload(OverloadDecl::global("uint64_to_int64", vec![CelType::Uint], CelType::Int));
    int.add_overload(OverloadDecl::global("double_to_int64", vec![CelType::Double], CelType::Int));
    int.add_overload(OverloadDecl::global("string_to_int64", vec![CelType::String], CelType::Int));
    int.add_overload(OverloadDecl::global("timestamp_to_int64", vec![CelType::Timestamp], CelType::Int));
    int.add_overload(OverloadDecl::global("duration_to_int64", vec![CelType::Duration], CelType::Int));
    out.push(int);

    let mut uint = FunctionDecl::new("uint");
    uint.add_overload(OverloadDecl::global("uint64_to_uint64", vec![CelType::Uint], CelType::Uint));
    uint.add_overload(OverloadDecl::global("int64_to_uint64", vec![CelType::Int], CelType::Uint));
    uint.add_overload(OverloadDecl::global("double_to_uint64", vec![CelType::Double], CelType::Uint));
    uint.add_overload(OverloadDecl::global("string_to_uint64", vec![CelType::String], CelType::Uint));
    out.push(uint);

    let mut double = FunctionDecl::new("double");
    double.add_overload(OverloadDecl::global("double_to_double", vec![CelType::Double], CelType::Double));
    double.add_overload(OverloadDecl::global("int64_to_double", vec![CelType::Int], CelType::Double));
    double.add_overload(OverloadDecl::global("uint64_to_double", vec![CelType::Uint], CelType::Double));
    double.add_overload(OverloadDecl::global("string_to_double", vec![CelType::String], CelType::Double));
    out.push(double);

    let mut string = FunctionDecl::new("string");
    string.add_overload(OverloadDecl::global("string_to_string", vec![CelType::String], CelType::String));
    string.add_overload(OverloadDecl::global("bool_to_string", vec![CelType::Bool], CelType::String));
    string.add_overload(OverloadDecl::global("int64_to_string", vec![CelType::Int], CelType::String));
    string.add_overload(OverloadDecl::global("uint64_to_string", vec![CelType::Uint], CelType::String));
    string.add_overload(OverloadDecl::global("double_to_string", vec![CelType::Double], CelType::String));
    string.add_overload(OverloadDecl::global("bytes_to_string", vec![CelType::Bytes], CelType::String));
    string.add_overload(OverloadDecl::global(
        "timestamp_to_string",
        vec![CelType::Timestamp],
        CelType::String,
    ));
    string.add_overload(OverloadDecl::global("duration_to_string", vec![CelType::Duration], CelType::String));
    out.push(string);

    let mut bytes = FunctionDecl::new("bytes");
    bytes.add_overload(OverloadDecl::global("bytes_to_bytes", vec![CelType::Bytes], CelType::Bytes));
    bytes.add_overload(OverloadDecl::global("string_to_bytes", vec![CelType::String], CelType::Bytes));
    out.push(bytes);

    let mut bool_fn = FunctionDecl::new("bool");
    bool_fn.add_overload(OverloadDecl::global("bool_to_bool", vec![CelType::Bool], CelType::Bool));
    bool_fn.add_overload(OverloadDecl::global("string_to_bool", vec![CelType::String], CelType::Bool));
    out.push(bool_fn);

    let mut timestamp = FunctionDecl::new("timestamp");
    timestamp.add_overload(OverloadDecl::global(
        "timestamp_to_timestamp",
        vec![CelType::Timestamp],
        CelType::Timestamp,
    ));
    timestamp.add_overload(OverloadDecl::global(
        "string_to_timestamp",
        vec![CelType::String],
        CelType::Timestamp,
    ));
    timestamp.add_overload(OverloadDecl::global(
        "int64_to_timestamp",
        vec![CelType::Int],
        CelType::Timestamp,
    ));
    out.push(timestamp);

    let mut duration = FunctionDecl::new("duration");
    duration.add_overload(OverloadDecl::global(
        "duration_to_duration",
        vec![CelType::Duration],
        CelType::Duration,
    ));
    duration.add_overload(OverloadDecl::global(
        "string_to_duration",
        vec![CelType::String],
        CelType::Duration,
    ));
    out.push(duration);

    let mut type_fn = FunctionDecl::new("type");
    type_fn.add_overload(OverloadDecl::global(
        "type",
        vec![param("A")],
        CelType::Type(Box::new(param("A"))),
    ));
    out.push(type_fn);

    let mut dyn_fn = FunctionDecl::new("dyn");
    dyn_fn.add_overload(OverloadDecl::global("to_dyn", vec![param("A")], CelType::Dyn));
    out.push(dyn_fn);
}

fn conversion_error(target: &str, value: &Value) -> ErrorValue {
    ErrorValue::new(format!("cannot convert {} to {target}", value.type_of()))
}

pub fn to_int(value: Value) -> EvalResult {
    match &value {
        Value::Int(_) => Ok(value),
        Value::Uint(v) => i64::try_from(*v).map(Value::Int).map_err(|_| ErrorValue::int_overflow()),
        Value::Double(v) => {
            // Truncation toward zero; out-of-range doubles are errors.
            if v.is_finite() && *v >= -9_223_372_036_854_775_808.0 && *v < 9_223_372_036_854_775_808.0 {
                Ok(Value::Int(v.trunc() as i64))
            } else {
                Err(ErrorValue::int_overflow())
            }
        }
        Value::String(s) => s
            .parse::<i64>()
            .map(Value::Int)
            .map_err(|_| ErrorValue::new(format!("invalid int: {s}"))),
        Value::Timestamp(ts) => Ok(Value::Int(ts.unix_seconds())),
        Value::Duration(d) => Ok(Value::Int(d.seconds())),
        Value::Enum(e) => Ok(Value::Int(e.value)),
        _ => Err(conversion_error("int", &value)),
    }
}

pub fn to_uint(value: Value) -> EvalResult {
    match &value {
        Value::Uint(_) => Ok(value),
        Value::Int(v) => u64::try_from(*v).map(Value::Uint).map_err(|_| ErrorValue::uint_overflow()),
        Value::Double(v) => {
            if v.is_finite() && *v >= 0.0 && *v < 18_446_744_073_709_551_616.0 {
                Ok(Value::Uint(v.trunc() as u64))
            } else {
                Err(ErrorValue::uint_overflow())
            }
        }
        Value::String(s) => s
            .parse::<u64>()
            .map(Value::Uint)
            .map_err(|_| ErrorValue::new(format!("invalid uint: {s}"))),
        _ => Err(conversion_error("uint", &value)),
    }
}

pub fn to_double(value: Value) -> EvalResult {
    match &value {
        Value::Double(_) => Ok(value),
        Value::Int(v) => Ok(Value::Double(*v as f64)),
        Value::Uint(v) => Ok(Value::Double(*v as f64)),
        Value::String(s) => s
            .parse::<f64>()
            .map(Value::Double)
            .map_err(|_| ErrorValue::new(format!("invalid double: {s}"))),
        _ => Err(conversion_error("double", &value)),
    }
}

pub fn to_string_value(value: Value) -> EvalResult {
    match &value {
        Value::String(_) => Ok(value),
        Value::Bool(v) => Ok(Value::string(if *v { "true" } else { "false" })),
        Value::Int(v) => Ok(Value::string(&v.to_string())),
        Value::Uint(v) => Ok(Value::string(&v.to_string())),
        Value::Double(v) => Ok(Value::string(ryu::Buffer::new().format(*v))),
        Value::Bytes(b) => std::str::from_utf8(b)
            .map(Value::string)
            .map_err(|_| ErrorValue::new("bytes are not valid UTF-8")),
        Value::Timestamp(ts) => Ok(Value::string(&ts.to_string())),
        Value::Duration(d) => Ok(Value::string(&d.to_string())),
        _ => Err(conversion_error("string", &value)),
    }
}

pub fn to_bytes(value: Value) -> EvalResult {
    match &value {
        Value::Bytes(_) => Ok(value),
        Value::String(s) => Ok(Value::bytes(s.as_bytes())),
        _ => Err(conversion_error("bytes", &value)),
    }
}

pub fn to_bool(value: Value) -> EvalResult {
    match &value {
        Value::Bool(_) => Ok(value),
        Value::String(s) => match s.to_ascii_lowercase().as_str() {
            "true" | "t" | "1" => Ok(Value::Bool(true)),
            "false" | "f" | "0" => Ok(Value::Bool(false)),
            _ => Err(ErrorValue::new(format!("invalid bool: {s}"))),
        },
        _ => Err(conversion_error("bool", &value)),
    }
}

pub fn to_timestamp(value: Value) -> EvalResult {
    match &value {
        Value::Timestamp(_) => Ok(value),
        Value::String(s) => CelTimestamp::parse(s)
            .map(Value::Timestamp)
            .map_err(|err| ErrorValue::new(err.to_string())),
        Value::Int(seconds) => CelTimestamp::from_nanos(i128::from(*seconds) * 1_000_000_000)
            .map(Value::Timestamp)
            .map_err(|err| ErrorValue::new(err.to_string())),
        _ => Err(conversion_error("timestamp", &value)),
    }
}

pub fn to_duration(value: Value) -> EvalResult {
    match &value {
        Value::Duration(_) => Ok(value),
        Value::String(s) => CelDuration::parse(s)
            .map(Value::Duration)
            .map_err(|err| ErrorValue::new(err.to_string())),
        _ => Err(conversion_error("duration", &value)),
    }
}

fn type_of_value(value: Value) -> EvalResult {
    Ok(Value::Type(value.type_of()))
}

pub fn register(dispatcher: &mut Dispatcher) {
    for id in [
        "int64_to_int64",
        "uint64_to_int64",
        "double_to_int64",
        "string_to_int64",
        "timestamp_to_int64",
        "duration_to_int64",
    ] {
        dispatcher.register(OverloadImpl::unary(id, true, to_int));
    }
    for id in ["uint64_to_uint64", "int64_to_uint64", "double_to_uint64", "string_to_uint64"] {
        dispatcher.register(OverloadImpl::unary(id, true, to_uint));
    }
    for id in ["double_to_double", "int64_to_double", "uint64_to_double", "string_to_double"] {
        dispatcher.register(OverloadImpl::unary(id, true, to_double));
    }
    for id in [
        "string_to_string",
        "bool_to_string",
        "int64_to_string",
        "uint64_to_string",
        "double_to_string",
        "bytes_to_string",
        "timestamp_to_string",
        "duration_to_string",
    ] {
        dispatcher.register(OverloadImpl::unary(id, true, to_string_value));
    }
    for id in ["bytes_to_bytes", "string_to_bytes"] {
        dispatcher.register(OverloadImpl::unary(id, true, to_bytes));
    }
    for id in ["bool_to_bool", "string_to_bool"] {
        dispatcher.register(OverloadImpl::unary(id, true, to_bool));
    }
    for id in ["timestamp_to_timestamp", "string_to_timestamp", "int64_to_timestamp"] {
        dispatcher.register(OverloadImpl::unary(id, true, to_timestamp));
    }
    for id in ["duration_to_duration", "string_to_duration"] {
        dispatcher.register(OverloadImpl::unary(id, true, to_duration));
    }
    dispatcher.register(OverloadImpl::unary("type", true, type_of_value));
    dispatcher.register(OverloadImpl::unary("to_dyn", true, Ok));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn numeric_conversions_check_range() {
        assert!(to_int(Value::Uint(42)).unwrap().equals(&Value::Int(42)));
        assert!(to_int(Value::Uint(u64::MAX)).is_err());
        assert!(to_uint(Value::Int(-1)).is_err());
        assert!(to_int(Value::Double(3.9)).unwrap().equals(&Value::Int(3)));
        assert!(to_int(Value::Double(f64::NAN)).is_err());
        assert!(to_int(Value::Double(1e300)).is_err());
    }

    #[test]
    fn string_parsing_conversions() {
        assert!(to_int(Value::string("-17")).unwrap().equals(&Value::Int(-17)));
        assert!(to_int(Value::string("seven")).is_err());
        assert!(to_double(Value::string("2.5")).unwrap().equals(&Value::Double(2.5)));
        assert!(to_bool(Value::string("TRUE")).unwrap().equals(&Value::Bool(true)));
        assert!(to_bool(Value::string("maybe")).is_err());
    }

    #[test]
    fn string_rendering() {
        assert!(to_string_value(Value::Int(-3)).unwrap().equals(&Value::string("-3")));
        assert!(to_string_value(Value::Double(1.5)).unwrap().equals(&Value::string("1.5")));
        assert!(to_string_value(Value::Bool(false)).unwrap().equals(&Value::string("false")));
        assert!(to_string_value(Value::bytes(&[0xff])).is_err());
    }

    #[test]
    fn temporal_conversions() {
        let ts = to_timestamp(Value::string("2023-06-01T00:00:00Z")).unwrap();
        assert!(matches!(ts, Value::Timestamp(_)));
        assert!(to_timestamp(Value::string("not a time")).is_err());
        let d = to_duration(Value::string("90s")).unwrap();
        assert!(matches!(d, Value::Duration(_)));
        assert!(to_int(d).unwrap().equals(&Value::Int(90)));
    }

    #[test]
    fn type_function_reifies_runtime_types() {
        let ty = type_of_value(Value::Int(1)).unwrap();
        assert!(ty.equals(&Value::Type(crate::types::CelType::Int)));
    }
}
