//! The optional-value library: constructors on the `optional` namespace and
//! accessors on `optional_type(T)` receivers.

use crate::{
    decls::{FunctionDecl, OverloadDecl},
    dispatch::{Dispatcher, OverloadImpl},
    stdlib::param,
    types::CelType,
    value::{ErrorValue, EvalResult, Value, zero_value},
};

pub fn declarations(out: &mut Vec<FunctionDecl>) {
    let mut of = FunctionDecl::new("optional.of");
    of.add_overload(OverloadDecl::global("optional_of", vec![param("A")], CelType::optional(param("A"))));
    out.push(of);

    let mut of_non_zero = FunctionDecl::new("optional.ofNonZeroValue");
    of_non_zero.add_overload(OverloadDecl::global(
        "optional_of_non_zero_value",
        vec![param("A")],
        CelType::optional(param("A")),
    ));
    out.push(of_non_zero);

    let mut none = FunctionDecl::new("optional.none");
    none.add_overload(OverloadDecl::global("optional_none", vec![], CelType::optional(param("A"))));
    out.push(none);

    let mut has_value = FunctionDecl::new("hasValue");
    has_value.add_overload(OverloadDecl::member(
        "optional_has_value",
        vec![CelType::optional(param("A"))],
        CelType::Bool,
    ));
    out.push(has_value);

    let mut value = FunctionDecl::new("value");
    value.add_overload(OverloadDecl::member(
        "optional_value",
        vec![CelType::optional(param("A"))],
        param("A"),
    ));
    out.push(value);

    let mut or_value = FunctionDecl::new("orValue");
    or_value.add_overload(OverloadDecl::member(
        "optional_or_value",
        vec![CelType::optional(param("A")), param("A")],
        param("A"),
    ));
    out.push(or_value);
}

fn optional_of(value: Value) -> EvalResult {
    Ok(Value::optional_of(value))
}

/// Wraps non-zero values; the zero of the value's own kind becomes none.
fn optional_of_non_zero(value: Value) -> EvalResult {
    let zero = zero_value(&value.type_of());
    if value.equals(&zero) {
        Ok(Value::optional_none())
    } else {
        Ok(Value::optional_of(value))
    }
}

fn optional_none(_args: &[Value]) -> EvalResult {
    Ok(Value::optional_none())
}

fn expect_optional(value: &Value, name: &str) -> EvalResult<std::sync::Arc<crate::value::OptionalValue>> {
    match value {
        Value::Optional(opt) => Ok(opt.clone()),
        other => Err(ErrorValue::no_such_overload(format!("{}.{name}()", other.type_of()))),
    }
}

fn optional_has_value(value: Value) -> EvalResult {
    Ok(Value::Bool(expect_optional(&value, "hasValue")?.has_value()))
}

fn optional_value(value: Value) -> EvalResult {
    match expect_optional(&value, "value")?.as_inner() {
        Some(inner) => Ok(inner.clone()),
        None => Err(ErrorValue::new("optional.none() dereference")),
    }
}

fn optional_or_value(value: Value, fallback: Value) -> EvalResult {
    match expect_optional(&value, "orValue")?.as_inner() {
        Some(inner) => Ok(inner.clone()),
        None => Ok(fallback),
    }
}

pub fn register(dispatcher: &mut Dispatcher) {
    dispatcher.register(OverloadImpl::unary("optional_of", true, optional_of));
    dispatcher.register(OverloadImpl::unary("optional_of_non_zero_value", true, optional_of_non_zero));
    dispatcher.register(OverloadImpl::variadic("optional_none", true, optional_none));
    dispatcher.register(OverloadImpl::unary("optional_has_value", true, optional_has_value));
    dispatcher.register(OverloadImpl::unary("optional_value", true, optional_value));
    dispatcher.register(OverloadImpl::binary("optional_or_value", true, optional_or_value));
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn of_and_value_round_trip() {
        let wrapped = optional_of(Value::Int(7)).unwrap();
        assert!(optional_has_value(wrapped.clone()).unwrap().equals(&Value::Bool(true)));
        assert!(optional_value(wrapped).unwrap().equals(&Value::Int(7)));
    }

    #[test]
    fn none_dereference_is_an_error() {
        let none = optional_none(&[]).unwrap();
        let err = optional_value(none).unwrap_err();
        assert!(err.message.contains("optional.none() dereference"));
    }

    #[test]
    fn of_non_zero_drops_zero_values() {
        assert!(optional_has_value(optional_of_non_zero(Value::Int(0)).unwrap())
            .unwrap()
            .equals(&Value::Bool(false)));
        assert!(optional_has_value(optional_of_non_zero(Value::string("")).unwrap())
            .unwrap()
            .equals(&Value::Bool(false)));
        assert!(optional_has_value(optional_of_non_zero(Value::Int(1)).unwrap())
            .unwrap()
            .equals(&Value::Bool(true)));
    }

    #[test]
    fn or_value_falls_back_on_none() {
        let none = optional_none(&[]).unwrap();
        assert!(optional_or_value(none, Value::Int(9)).unwrap().equals(&Value::Int(9)));
        let some = optional_of(Value::Int(1)).unwrap();
        assert!(optional_or_value(some, Value::Int(9)).unwrap().equals(&Value::Int(1)));
    }
}
