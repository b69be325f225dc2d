//! Calendar accessors on timestamps and component accessors on durations.
//!
//! Timestamp accessors default to UTC and accept a fixed-offset time zone
//! argument; duration accessors expose whole-unit components.

use crate::{
    decls::{FunctionDecl, OverloadDecl},
    dispatch::{Dispatcher, OverloadImpl},
    temporal::TimestampField,
    types::CelType,
    value::{ErrorValue, EvalResult, Value},
};

/// (function name, timestamp overload base, field) for the accessor table.
const TIMESTAMP_ACCESSORS: &[(&str, &str, TimestampField)] = &[
    ("getFullYear", "timestamp_to_year", TimestampField::Year),
    ("getMonth", "timestamp_to_month", TimestampField::Month),
    ("getDayOfYear", "timestamp_to_day_of_year", TimestampField::DayOfYear),
    (
        "getDayOfMonth",
        "timestamp_to_day_of_month",
        TimestampField::DayOfMonthZeroBased,
    ),
    ("getDate", "timestamp_to_day_of_month_1_based", TimestampField::DayOfMonthOneBased),
    ("getDayOfWeek", "timestamp_to_day_of_week", TimestampField::DayOfWeek),
    ("getHours", "timestamp_to_hours", TimestampField::Hours),
    ("getMinutes", "timestamp_to_minutes", TimestampField::Minutes),
    ("getSeconds", "timestamp_to_seconds", TimestampField::Seconds),
    ("getMilliseconds", "timestamp_to_milliseconds", TimestampField::Milliseconds),
];

/// Duration accessors share names with the time-of-day set.
const DURATION_ACCESSORS: &[(&str, &str)] = &[
    ("getHours", "duration_to_hours"),
    ("getMinutes", "duration_to_minutes"),
    ("getSeconds", "duration_to_seconds"),
    ("getMilliseconds", "duration_to_milliseconds"),
];

pub fn declarations(out: &mut Vec<FunctionDecl>) {
    for (name, id, _) in TIMESTAMP_ACCESSORS {
        let mut decl = FunctionDecl::new(*name);
        decl.add_overload(OverloadDecl::member(*id, vec![CelType::Timestamp], CelType::Int));
        decl.add_overload(OverloadDecl::member(
            format!("{id}_with_tz"),
            vec![CelType::Timestamp, CelType::String],
            CelType::Int,
        ));
        if let Some((_, duration_id)) = DURATION_ACCESSORS.iter().find(|(n, _)| n == name) {
            decl.add_overload(OverloadDecl::member(*duration_id, vec![CelType::Duration], CelType::Int));
        }
        out.push(decl);
    }
}

fn timestamp_field(args: &[Value], field: TimestampField) -> EvalResult {
    match args {
        [Value::Timestamp(ts)] => ts
            .field(field, None)
            .map(Value::Int)
            .map_err(|err| ErrorValue::new(err.to_string())),
        [Value::Timestamp(ts), Value::String(zone)] => ts
            .field(field, Some(zone))
            .map(Value::Int)
            .map_err(|err| ErrorValue::new(err.to_string())),
        [Value::Duration(d)] => duration_component(*d, field),
        _ => Err(ErrorValue::no_such_overload("temporal accessor")),
    }
}

fn duration_component(duration: crate::temporal::CelDuration, field: TimestampField) -> EvalResult {
    let nanos = duration.nanos();
    let value = match field {
        TimestampField::Hours => nanos / 3_600_000_000_000,
        TimestampField::Minutes => nanos / 60_000_000_000,
        TimestampField::Seconds => nanos / 1_000_000_000,
        TimestampField::Milliseconds => (nanos % 1_000_000_000) / 1_000_000,
        _ => return Err(ErrorValue::no_such_overload("duration accessor")),
    };
    Ok(Value::Int(value as i64))
}

pub fn register(dispatcher: &mut Dispatcher) {
    for (_, id, field) in TIMESTAMP_ACCESSORS {
        let field = *field;
        dispatcher.register(OverloadImpl::variadic(*id, true, move |args| timestamp_field(args, field)));
        dispatcher.register(OverloadImpl::variadic(format!("{id}_with_tz"), true, move |args| {
            timestamp_field(args, field)
        }));
    }
    for (name, id) in DURATION_ACCESSORS {
        let field = match *name {
            "getHours" => TimestampField::Hours,
            "getMinutes" => TimestampField::Minutes,
            "getSeconds" => TimestampField::Seconds,
            _ => TimestampField::Milliseconds,
        };
        dispatcher.register(OverloadImpl::variadic(*id, true, move |args| timestamp_field(args, field)));
    }
}
