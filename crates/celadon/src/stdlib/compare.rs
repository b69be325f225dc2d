//! Logic, equality, relations, membership, indexing, and `size`.
//!
//! The short-circuiting operators (`&&`, `||`, `?:`, `@not_strictly_false`)
//! are declared here for the checker but implemented as planner intrinsics;
//! everything else registers a dispatcher binding.

use std::cmp::Ordering;

use crate::{
    decls::{FunctionDecl, OverloadDecl},
    dispatch::{Dispatcher, OverloadImpl},
    operators,
    stdlib::{list_of, map_of, param},
    types::CelType,
    value::{ErrorValue, EvalResult, MapKey, Value},
};

/// Numeric kinds and their overload-id suffixes for the relation tables.
const NUMERIC: &[(CelType, &str)] = &[(CelType::Int, "int64"), (CelType::Uint, "uint64"), (CelType::Double, "double")];

pub fn declarations(out: &mut Vec<FunctionDecl>) {
    let mut not = FunctionDecl::new(operators::LOGICAL_NOT);
    not.add_overload(OverloadDecl::global("logical_not", vec![CelType::Bool], CelType::Bool));
    out.push(not);

    let mut and = FunctionDecl::new(operators::LOGICAL_AND);
    and.add_overload(OverloadDecl::global(
        "logical_and",
        vec![CelType::Bool, CelType::Bool],
        CelType::Bool,
    ));
    out.push(and);

    let mut or = FunctionDecl::new(operators::LOGICAL_OR);
    or.add_overload(OverloadDecl::global(
        "logical_or",
        vec![CelType::Bool, CelType::Bool],
        CelType::Bool,
    ));
    out.push(or);

    let mut conditional = FunctionDecl::new(operators::CONDITIONAL);
    conditional.add_overload(OverloadDecl::global(
        "conditional",
        vec![CelType::Bool, param("A"), param("A")],
        param("A"),
    ));
    out.push(conditional);

    let mut nsf = FunctionDecl::new(operators::NOT_STRICTLY_FALSE);
    nsf.add_overload(OverloadDecl::global("not_strictly_false", vec![CelType::Bool], CelType::Bool));
    out.push(nsf);

    let mut equals = FunctionDecl::new(operators::EQUALS);
    equals.add_overload(OverloadDecl::global("equals", vec![param("A"), param("A")], CelType::Bool));
    out.push(equals);

    let mut not_equals = FunctionDecl::new(operators::NOT_EQUALS);
    not_equals.add_overload(OverloadDecl::global(
        "not_equals",
        vec![param("A"), param("A")],
        CelType::Bool,
    ));
    out.push(not_equals);

    for (op_name, op_id) in [
        (operators::LESS, "less"),
        (operators::LESS_EQUALS, "less_equals"),
        (operators::GREATER, "greater"),
        (operators::GREATER_EQUALS, "greater_equals"),
    ] {
        let mut decl = FunctionDecl::new(op_name);
        // Numeric relations, including the cross-type pairs.
        for (left, left_suffix) in NUMERIC {
            for (right, right_suffix) in NUMERIC {
                let id = if left_suffix == right_suffix {
                    format!("{op_id}_{left_suffix}")
                } else {
                    format!("{op_id}_{left_suffix}_{right_suffix}")
                };
                decl.add_overload(OverloadDecl::global(id, vec![left.clone(), right.clone()], CelType::Bool));
            }
        }
        for (ty, suffix) in [
            (CelType::Bool, "bool"),
            (CelType::String, "string"),
            (CelType::Bytes, "bytes"),
            (CelType::Timestamp, "timestamp"),
            (CelType::Duration, "duration"),
        ] {
            decl.add_overload(OverloadDecl::global(
                format!("{op_id}_{suffix}"),
                vec![ty.clone(), ty],
                CelType::Bool,
            ));
        }
        out.push(decl);
    }

    let mut contains = FunctionDecl::new(operators::IN);
    contains.add_overload(OverloadDecl::global(
        "in_list",
        vec![param("A"), list_of(param("A"))],
        CelType::Bool,
    ));
    contains.add_overload(OverloadDecl::global(
        "in_map",
        vec![param("A"), map_of(param("A"), param("B"))],
        CelType::Bool,
    ));
    out.push(contains);

    for name in [operators::INDEX, operators::OPT_INDEX] {
        let optional = name == operators::OPT_INDEX;
        let mut decl = FunctionDecl::new(name);
        let (list_id, map_id, list_result, map_result) = if optional {
            (
                "optional_list_index_int",
                "optional_map_index_value",
                CelType::optional(param("A")),
                CelType::optional(param("V")),
            )
        } else {
            ("index_list", "index_map", param("A"), param("V"))
        };
        decl.add_overload(OverloadDecl::global(list_id, vec![list_of(param("A")), CelType::Int], list_result));
        decl.add_overload(OverloadDecl::global(
            map_id,
            vec![map_of(param("K"), param("V")), param("K")],
            map_result,
        ));
        out.push(decl);
    }

    let mut size = FunctionDecl::new("size");
    size.add_overload(OverloadDecl::global("size_string", vec![CelType::String], CelType::Int));
    size.add_overload(OverloadDecl::global("size_bytes", vec![CelType::Bytes], CelType::Int));
    size.add_overload(OverloadDecl::global("size_list", vec![list_of(param("A"))], CelType::Int));
    size.add_overload(OverloadDecl::global(
        "size_map",
        vec![map_of(param("K"), param("V"))],
        CelType::Int,
    ));
    size.add_overload(OverloadDecl::member("string_size", vec![CelType::String], CelType::Int));
    size.add_overload(OverloadDecl::member("bytes_size", vec![CelType::Bytes], CelType::Int));
    size.add_overload(OverloadDecl::member("list_size", vec![list_of(param("A"))], CelType::Int));
    size.add_overload(OverloadDecl::member(
        "map_size",
        vec![map_of(param("K"), param("V"))],
        CelType::Int,
    ));
    out.push(size);
}

fn logical_not(value: Value) -> EvalResult {
    Ok(Value::Bool(!value.as_bool()?))
}

fn equals_fn(left: Value, right: Value) -> EvalResult {
    Ok(Value::Bool(left.equals(&right)))
}

fn not_equals_fn(left: Value, right: Value) -> EvalResult {
    Ok(Value::Bool(!left.equals(&right)))
}

fn relation(left: &Value, right: &Value, accept: fn(Ordering) -> bool) -> EvalResult {
    Ok(Value::Bool(accept(left.compare(right)?)))
}

/// `e in collection`: list membership by value equality, map membership by
/// key.
pub fn in_values(element: Value, collection: Value) -> EvalResult {
    match &collection {
        Value::List(elements) => Ok(Value::Bool(elements.iter().any(|candidate| candidate.equals(&element)))),
        Value::Map(map) => match MapKey::from_value(&element) {
            Ok(key) => Ok(Value::Bool(map.contains_key(&key))),
            // A value that can never be a key is simply not a member.
            Err(_) => Ok(Value::Bool(false)),
        },
        other => Err(ErrorValue::no_such_overload(format!(
            "{} in {}",
            element.type_of(),
            other.type_of()
        ))),
    }
}

/// `c[k]` for lists and maps, with the CEL out-of-bounds / missing-key
/// errors.
pub fn index_value(collection: &Value, index: &Value) -> EvalResult {
    match collection {
        Value::List(elements) => {
            let position = match index {
                Value::Int(i) => *i,
                Value::Uint(u) => i64::try_from(*u).map_err(|_| ErrorValue::index_out_of_bounds(i64::MAX, elements.len()))?,
                other => {
                    return Err(ErrorValue::no_such_overload(format!("list[{}]", other.type_of())));
                }
            };
            usize::try_from(position)
                .ok()
                .and_then(|i| elements.get(i))
                .cloned()
                .ok_or_else(|| ErrorValue::index_out_of_bounds(position, elements.len()))
        }
        Value::Map(map) => {
            let key = MapKey::from_value(index)?;
            map.get(&key).cloned().ok_or_else(|| ErrorValue::no_such_key(&key))
        }
        other => Err(ErrorValue::no_such_overload(format!("{}[...]", other.type_of()))),
    }
}

/// `c[?k]`: present entries wrap in `optional.of`, absent ones are
/// `optional.none()`; type errors stay errors.
pub fn optional_index_value(collection: &Value, index: &Value) -> EvalResult {
    // An optional collection chains: none[?k] is none.
    if let Value::Optional(opt) = collection {
        return match opt.as_inner() {
            Some(inner) => optional_index_value(inner, index),
            None => Ok(Value::optional_none()),
        };
    }
    match collection {
        Value::List(elements) => {
            let position = match index {
                Value::Int(i) => *i,
                Value::Uint(u) => match i64::try_from(*u) {
                    Ok(i) => i,
                    Err(_) => return Ok(Value::optional_none()),
                },
                other => {
                    return Err(ErrorValue::no_such_overload(format!("list[?{}]", other.type_of())));
                }
            };
            Ok(usize::try_from(position)
                .ok()
                .and_then(|i| elements.get(i))
                .map_or_else(Value::optional_none, |v| Value::optional_of(v.clone())))
        }
        Value::Map(map) => {
            let key = MapKey::from_value(index)?;
            Ok(map
                .get(&key)
                .map_or_else(Value::optional_none, |v| Value::optional_of(v.clone())))
        }
        other => Err(ErrorValue::no_such_overload(format!("{}[?...]", other.type_of()))),
    }
}

/// `size(x)` over strings (code points), bytes, lists, and maps.
pub fn size_value(value: Value) -> EvalResult {
    let length = match &value {
        Value::String(s) => s.chars().count(),
        Value::Bytes(b) => b.len(),
        Value::List(l) => l.len(),
        Value::Map(m) => m.len(),
        other => return Err(ErrorValue::no_such_overload(format!("size({})", other.type_of()))),
    };
    Ok(Value::Int(i64::try_from(length).unwrap_or(i64::MAX)))
}

pub fn register(dispatcher: &mut Dispatcher) {
    dispatcher.register(OverloadImpl::unary("logical_not", true, logical_not));
    dispatcher.register(OverloadImpl::binary("equals", true, equals_fn));
    dispatcher.register(OverloadImpl::binary("not_equals", true, not_equals_fn));

    for (op_id, accept) in [
        ("less", Ordering::is_lt as fn(Ordering) -> bool),
        ("less_equals", Ordering::is_le),
        ("greater", Ordering::is_gt),
        ("greater_equals", Ordering::is_ge),
    ] {
        let mut ids = Vec::new();
        for (_, left_suffix) in NUMERIC {
            for (_, right_suffix) in NUMERIC {
                if left_suffix == right_suffix {
                    ids.push(format!("{op_id}_{left_suffix}"));
                } else {
                    ids.push(format!("{op_id}_{left_suffix}_{right_suffix}"));
                }
            }
        }
        for suffix in ["bool", "string", "bytes", "timestamp", "duration"] {
            ids.push(format!("{op_id}_{suffix}"));
        }
        for id in ids {
            dispatcher.register(OverloadImpl::binary(id, true, move |a, b| relation(&a, &b, accept)));
        }
    }

    for id in ["in_list", "in_map"] {
        dispatcher.register(OverloadImpl::binary(id, true, in_values));
    }
    for id in ["index_list", "index_map"] {
        dispatcher.register(OverloadImpl::binary(id, true, |c, i| index_value(&c, &i)));
    }
    for id in ["optional_list_index_int", "optional_map_index_value"] {
        dispatcher.register(OverloadImpl::binary(id, true, |c, i| optional_index_value(&c, &i)));
    }
    for id in ["size_string", "size_bytes", "size_list", "size_map", "string_size", "bytes_size", "list_size", "map_size"] {
        dispatcher.register(OverloadImpl::unary(id, true, size_value));
    }
}
