//! The interpreter: evaluation of planned [`Interpretable`] trees.
//!
//! Evaluation is a pure function of the tree and the activation. Runtime
//! errors travel as `Err(ErrorValue)` and are absorbed only where CEL says
//! they are: the short-circuit operators, `@not_strictly_false`, and the
//! conditional. Unknowns are ordinary values that merge as they meet.

use std::sync::Arc;

use crate::{
    activation::{Activation, MutableActivation},
    ast::ExprId,
    dispatch::{Dispatcher, merge_unknown_args},
    provider::TypeProvider,
    types::CelType,
    value::{ErrorValue, EvalResult, MapKey, MapValue, StructValue, Value},
};

/// One runtime-dispatch candidate: the overload id and its declared argument
/// types, used to pick among several checker-approved overloads (or, for
/// unchecked programs, among every overload of the function).
#[derive(Debug, Clone)]
pub struct DispatchCandidate {
    pub overload_id: String,
    pub arg_types: Vec<CelType>,
}

/// A planned, executable expression node.
///
/// The tree is closed and immutable after planning; every node keeps its
/// originating expression id so errors map back to source positions.
#[derive(Debug, Clone)]
pub enum Interpretable {
    Const {
        id: ExprId,
        value: Value,
    },
    /// A constant-folding failure, re-raised at evaluation time.
    ConstError {
        id: ExprId,
        error: ErrorValue,
    },
    Var {
        id: ExprId,
        name: String,
    },
    Select {
        id: ExprId,
        operand: Box<Interpretable>,
        field: String,
        test_only: bool,
        optional: bool,
    },
    And {
        id: ExprId,
        left: Box<Interpretable>,
        right: Box<Interpretable>,
    },
    Or {
        id: ExprId,
        left: Box<Interpretable>,
        right: Box<Interpretable>,
    },
    Ternary {
        id: ExprId,
        condition: Box<Interpretable>,
        then_branch: Box<Interpretable>,
        else_branch: Box<Interpretable>,
    },
    NotStrictlyFalse {
        id: ExprId,
        operand: Box<Interpretable>,
    },
    Equal {
        id: ExprId,
        left: Box<Interpretable>,
        right: Box<Interpretable>,
        negated: bool,
    },
    Dispatch {
        id: ExprId,
        function: String,
        candidates: Vec<DispatchCandidate>,
        args: Vec<Interpretable>,
    },
    /// Conversion through a type name (enum or message), resolved by the
    /// checker outside the ordinary overload namespace.
    Convert {
        id: ExprId,
        target: CelType,
        arg: Box<Interpretable>,
    },
    CreateList {
        id: ExprId,
        elements: Vec<Interpretable>,
        optional_indices: Vec<u32>,
    },
    CreateMap {
        id: ExprId,
        entries: Vec<(Interpretable, Interpretable, bool)>,
    },
    CreateStruct {
        id: ExprId,
        type_name: String,
        fields: Vec<(String, Interpretable, bool)>,
    },
    Loop {
        id: ExprId,
        iter_range: Box<Interpretable>,
        iter_var: String,
        iter_var2: Option<String>,
        accu_var: String,
        accu_init: Box<Interpretable>,
        loop_condition: Box<Interpretable>,
        loop_step: Box<Interpretable>,
        result: Box<Interpretable>,
    },
}

/// Shared read-only state for one evaluation.
pub struct EvalContext<'a> {
    pub dispatcher: &'a Dispatcher,
    pub provider: &'a dyn TypeProvider,
}

impl Interpretable {
    #[must_use]
    pub fn id(&self) -> ExprId {
        match self {
            Self::Const { id, .. }
            | Self::ConstError { id, .. }
            | Self::Var { id, .. }
            | Self::Select { id, .. }
            | Self::And { id, .. }
            | Self::Or { id, .. }
            | Self::Ternary { id, .. }
            | Self::NotStrictlyFalse { id, .. }
            | Self::Equal { id, .. }
            | Self::Dispatch { id, .. }
            | Self::Convert { id, .. }
            | Self::CreateList { id, .. }
            | Self::CreateMap { id, .. }
            | Self::CreateStruct { id, .. }
            | Self::Loop { id, .. } => *id,
        }
    }

    pub fn eval(&self, ctx: &EvalContext<'_>, activation: &dyn Activation) -> EvalResult {
        match self {
            Self::Const { value, .. } => Ok(value.clone()),
            Self::ConstError { error, .. } => Err(error.clone()),
            Self::Var { id, name } => match activation.resolve(name) {
                Some(result) => result.map_err(|e| e.at(*id)),
                None => Err(ErrorValue::new(format!("undeclared reference to '{name}'")).at(*id)),
            },
            Self::Select {
                id,
                operand,
                field,
                test_only,
                optional,
            } => {
                let value = operand.eval(ctx, activation)?;
                eval_select(ctx, &value, field, *test_only, *optional).map_err(|e| e.at(*id))
            }
            Self::And { id, left, right } => {
                eval_logic(left.eval(ctx, activation), right.eval(ctx, activation), false).map_err(|e| e.at(*id))
            }
            Self::Or { id, left, right } => {
                eval_logic(left.eval(ctx, activation), right.eval(ctx, activation), true).map_err(|e| e.at(*id))
            }
            Self::Ternary {
                id,
                condition,
                then_branch,
                else_branch,
            } => {
                let condition = condition.eval(ctx, activation)?;
                if condition.is_unknown() {
                    return Ok(condition);
                }
                if condition.as_bool().map_err(|e| e.at(*id))? {
                    then_branch.eval(ctx, activation)
                } else {
                    else_branch.eval(ctx, activation)
                }
            }
            Self::NotStrictlyFalse { operand, .. } => match operand.eval(ctx, activation) {
                Ok(Value::Bool(false)) => Ok(Value::Bool(false)),
                // Errors, unknowns, and anything non-false keep the loop alive.
                _ => Ok(Value::Bool(true)),
            },
            Self::Equal {
                id,
                left,
                right,
                negated,
            } => {
                let left = left.eval(ctx, activation);
                let right = right.eval(ctx, activation);
                // Either side erroring wins over an unknown on the other.
                let (left, right) = match (left, right) {
                    (Err(e), _) | (_, Err(e)) => return Err(e.at(*id)),
                    (Ok(l), Ok(r)) => (l, r),
                };
                if let Some(unknown) = merge_unknown_args(&[left.clone(), right.clone()]) {
                    return Ok(unknown);
                }
                let equal = left.equals(&right);
                Ok(Value::Bool(if *negated { !equal } else { equal }))
            }
            Self::Dispatch {
                id,
                function,
                candidates,
                args,
            } => {
                let mut values = Vec::with_capacity(args.len());
                for arg in args {
                    values.push(arg.eval(ctx, activation)?);
                }
                eval_dispatch(ctx, function, candidates, &values).map_err(|e| e.at(*id))
            }
            Self::Convert { id, target, arg } => {
                let value = arg.eval(ctx, activation)?;
                eval_convert(target, value).map_err(|e| e.at(*id))
            }
            Self::CreateList {
                id,
                elements,
                optional_indices,
            } => {
                let mut values = Vec::with_capacity(elements.len());
                for element in elements {
                    values.push(element.eval(ctx, activation)?);
                }
                if let Some(unknown) = merge_unknown_args(&values) {
                    return Ok(unknown);
                }
                let mut out = Vec::with_capacity(values.len());
                for (index, value) in values.into_iter().enumerate() {
                    if optional_indices.contains(&u32::try_from(index).unwrap_or(u32::MAX)) {
                        match value {
                            Value::Optional(opt) => {
                                if let Some(inner) = opt.as_inner() {
                                    out.push(inner.clone());
                                }
                            }
                            other => {
                                return Err(ErrorValue::new(format!(
                                    "expected optional value, found {}",
                                    other.type_of()
                                ))
                                .at(*id));
                            }
                        }
                    } else {
                        out.push(value);
                    }
                }
                Ok(Value::list(out))
            }
            Self::CreateMap { id, entries } => {
                let mut keys = Vec::with_capacity(entries.len());
                let mut values = Vec::with_capacity(entries.len());
                for (key, value, _) in entries {
                    keys.push(key.eval(ctx, activation)?);
                    values.push(value.eval(ctx, activation)?);
                }
                let mut all = keys.clone();
                all.extend(values.iter().cloned());
                if let Some(unknown) = merge_unknown_args(&all) {
                    return Ok(unknown);
                }
                let mut map = MapValue::with_capacity(entries.len());
                for (index, (key, value)) in keys.into_iter().zip(values).enumerate() {
                    let optional = entries[index].2;
                    let value = if optional {
                        match value {
                            Value::Optional(opt) => match opt.as_inner() {
                                Some(inner) => inner.clone(),
                                None => continue,
                            },
                            other => {
                                return Err(ErrorValue::new(format!(
                                    "expected optional value, found {}",
                                    other.type_of()
                                ))
                                .at(*id));
                            }
                        }
                    } else {
                        value
                    };
                    let key = MapKey::from_value(&key).map_err(|e| e.at(*id))?;
                    if map.contains_key(&key) {
                        return Err(ErrorValue::new(format!("repeated key in map literal: {key}")).at(*id));
                    }
                    map.insert(key, value);
                }
                Ok(Value::map(map))
            }
            Self::CreateStruct { id, type_name, fields } => {
                let mut values = Vec::with_capacity(fields.len());
                for (_, field, _) in fields {
                    values.push(field.eval(ctx, activation)?);
                }
                if let Some(unknown) = merge_unknown_args(&values) {
                    return Ok(unknown);
                }
                let mut out = StructValue::new(type_name.clone());
                for ((name, _, optional), value) in fields.iter().zip(values) {
                    if *optional {
                        match value {
                            Value::Optional(opt) => {
                                if let Some(inner) = opt.as_inner() {
                                    out.fields.insert(name.clone(), inner.clone());
                                }
                            }
                            other => {
                                return Err(ErrorValue::new(format!(
                                    "expected optional value, found {}",
                                    other.type_of()
                                ))
                                .at(*id));
                            }
                        }
                    } else {
                        out.fields.insert(name.clone(), value);
                    }
                }
                Ok(Value::Struct(Arc::new(out)))
            }
            Self::Loop { .. } => self.eval_loop(ctx, activation),
        }
    }

    /// Comprehension stepping: strictly sequential, insertion order, bounded
    /// by the range size.
    fn eval_loop(&self, ctx: &EvalContext<'_>, activation: &dyn Activation) -> EvalResult {
        let Self::Loop {
            id,
            iter_range,
            iter_var,
            iter_var2,
            accu_var,
            accu_init,
            loop_condition,
            loop_step,
            result,
        } = self
        else {
            unreachable!("eval_loop is only called on Loop nodes");
        };

        let range = iter_range.eval(ctx, activation)?;
        if range.is_unknown() {
            return Ok(range);
        }

        // The iteration entries: element (or key/value) pairs per step.
        let entries: Vec<(Value, Option<Value>)> = match &range {
            Value::List(elements) => {
                if iter_var2.is_some() {
                    elements
                        .iter()
                        .enumerate()
                        .map(|(index, element)| {
                            (Value::Int(i64::try_from(index).unwrap_or(i64::MAX)), Some(element.clone()))
                        })
                        .collect()
                } else {
                    elements.iter().map(|element| (element.clone(), None)).collect()
                }
            }
            Value::Map(map) => map
                .iter()
                .map(|(key, value)| {
                    let second = iter_var2.as_ref().map(|_| value.clone());
                    (key.to_value(), second)
                })
                .collect(),
            other => {
                return Err(ErrorValue::new(format!("cannot iterate over type {}", other.type_of())).at(*id));
            }
        };

        // The accumulator may park an error between steps: a failed step does
        // not abort the fold, because a later short-circuit step can still
        // absorb the failure (`exists` finding a witness after an erroring
        // element). The error re-raises wherever the accumulator is read
        // strictly, including the final result.
        let accu = accu_init.eval(ctx, activation).map_err(|e| e.at(accu_init.id()));
        let mut scope = MutableActivation::new(activation);
        scope.set_result(accu_var.clone(), accu);

        for (first, second) in entries {
            scope.set(iter_var.clone(), first);
            if let (Some(name), Some(value)) = (iter_var2.as_ref(), second) {
                scope.set(name.clone(), value);
            }
            let keep_going = loop_condition.eval(ctx, &scope)?;
            if !keep_going.as_bool().map_err(|e| e.at(loop_condition.id()))? {
                break;
            }
            let next = loop_step.eval(ctx, &scope).map_err(|e| e.at(loop_step.id()));
            scope.set_result(accu_var.clone(), next);
        }

        result.eval(ctx, &scope)
    }
}

/// `&&` / `||` over already-evaluated operands (the caller cannot
/// short-circuit evaluation order statically: CEL requires the absorbing
/// constant to win regardless of which side errs).
fn eval_logic(left: EvalResult, right: EvalResult, is_or: bool) -> EvalResult {
    let absorbing = is_or; // `true` absorbs for ||, `false` for &&
    // An absorbing literal on either side wins over errors and unknowns.
    if matches!(&left, Ok(Value::Bool(b)) if *b == absorbing) || matches!(&right, Ok(Value::Bool(b)) if *b == absorbing)
    {
        return Ok(Value::Bool(absorbing));
    }
    // Errors beat unknowns; the left error wins when both fail.
    let (left, right) = match (left, right) {
        (Err(e), _) | (_, Err(e)) => return Err(e),
        (Ok(l), Ok(r)) => (l, r),
    };
    match (&left, &right) {
        (Value::Unknown(a), Value::Unknown(b)) => Ok(Value::Unknown(Arc::new(a.union(b)))),
        (Value::Unknown(_), _) => Ok(left),
        (_, Value::Unknown(_)) => Ok(right),
        (Value::Bool(a), Value::Bool(b)) => Ok(Value::Bool(if is_or { *a || *b } else { *a && *b })),
        _ => Err(ErrorValue::no_such_overload(format!(
            "{} {} {}",
            left.type_of(),
            if is_or { "||" } else { "&&" },
            right.type_of()
        ))),
    }
}

/// Field access and presence testing over maps, messages, and optionals.
fn eval_select(ctx: &EvalContext<'_>, operand: &Value, field: &str, test_only: bool, optional: bool) -> EvalResult {
    if operand.is_unknown() {
        return Ok(operand.clone());
    }

    // Optional chaining: none short-circuits, a present value selects into
    // the inner value and rewraps.
    if let Value::Optional(opt) = operand {
        return match opt.as_inner() {
            None => Ok(Value::optional_none()),
            Some(inner) => match eval_select(ctx, inner, field, test_only, false)? {
                found if test_only => Ok(found),
                found => Ok(Value::optional_of(found)),
            },
        };
    }

    match operand {
        Value::Map(map) => {
            let key = MapKey::String(Arc::from(field));
            if test_only {
                return Ok(Value::Bool(map.contains_key(&key)));
            }
            match map.get(&key) {
                Some(value) if optional => Ok(Value::optional_of(value.clone())),
                Some(value) => Ok(value.clone()),
                None if optional => Ok(Value::optional_none()),
                None => Err(ErrorValue::no_such_key(field)),
            }
        }
        Value::Struct(message) => {
            if test_only {
                // Presence follows the provider's notion for fields without
                // explicit tracking; set fields are always present.
                if message.has_field(field) {
                    return Ok(Value::Bool(true));
                }
                if ctx.provider.find_struct_field_type(&message.type_name, field).is_none() {
                    return Err(ErrorValue::no_such_field(field));
                }
                return Ok(Value::Bool(false));
            }
            match message.field(field) {
                Some(value) if optional => Ok(Value::optional_of(value.clone())),
                Some(value) => Ok(value.clone()),
                None => {
                    // Unset fields read as their typed default when the
                    // schema knows the field.
                    match ctx.provider.find_struct_field_default(&message.type_name, field) {
                        Some(default) if optional => Ok(Value::optional_of(default)),
                        Some(default) => Ok(default),
                        None if optional => Ok(Value::optional_none()),
                        None => Err(ErrorValue::no_such_field(field)),
                    }
                }
            }
        }
        other => Err(ErrorValue::no_such_overload(format!("{}.{field}", other.type_of()))),
    }
}

/// Runtime overload selection among the planned candidates.
fn eval_dispatch(
    ctx: &EvalContext<'_>,
    function: &str,
    candidates: &[DispatchCandidate],
    args: &[Value],
) -> EvalResult {
    if let Some(unknown) = merge_unknown_args(args) {
        return Ok(unknown);
    }
    if candidates.len() == 1 {
        return ctx.dispatcher.dispatch(&candidates[0].overload_id, args);
    }
    for candidate in candidates {
        if candidate.arg_types.len() == args.len()
            && candidate
                .arg_types
                .iter()
                .zip(args)
                .all(|(ty, value)| runtime_matches(ty, value))
        {
            return ctx.dispatcher.dispatch(&candidate.overload_id, args);
        }
    }
    let rendered: Vec<String> = args.iter().map(|a| a.type_of().to_string()).collect();
    Err(ErrorValue::no_such_overload(format!(
        "{function}({})",
        rendered.join(", ")
    )))
}

/// Structural runtime check of a value against a declared parameter type.
fn runtime_matches(param: &CelType, value: &Value) -> bool {
    match param {
        CelType::Dyn | CelType::Error | CelType::TypeParam(_) => true,
        CelType::Bool => matches!(value, Value::Bool(_)),
        CelType::Int => matches!(value, Value::Int(_) | Value::Enum(_)),
        CelType::Uint => matches!(value, Value::Uint(_)),
        CelType::Double => matches!(value, Value::Double(_)),
        CelType::String => matches!(value, Value::String(_)),
        CelType::Bytes => matches!(value, Value::Bytes(_)),
        CelType::Null => matches!(value, Value::Null),
        CelType::Duration => matches!(value, Value::Duration(_)),
        CelType::Timestamp => matches!(value, Value::Timestamp(_)),
        CelType::List(_) => matches!(value, Value::List(_)),
        CelType::Map(..) => matches!(value, Value::Map(_)),
        CelType::Struct(name) => match CelType::wrapper_primitive(name) {
            Some(primitive) => matches!(value, Value::Null) || runtime_matches(&primitive, value),
            None => matches!(value, Value::Struct(s) if s.type_name == *name) || matches!(value, Value::Null),
        },
        CelType::Opaque(..) if param.is_optional() => matches!(value, Value::Optional(_)),
        CelType::Opaque(name, _) => matches!(value, Value::Enum(e) if e.type_name == *name),
        CelType::Type(_) => matches!(value, Value::Type(_)),
    }
}

/// Conversion through a type name: enums from ints, strings, or themselves;
/// messages only from themselves.
fn eval_convert(target: &CelType, value: Value) -> EvalResult {
    match target {
        CelType::Opaque(name, params) if params.is_empty() => match &value {
            Value::Int(v) => Ok(Value::Enum(Arc::new(crate::value::EnumValue {
                type_name: name.clone(),
                value: *v,
            }))),
            Value::Uint(v) => match i64::try_from(*v) {
                Ok(v) => Ok(Value::Enum(Arc::new(crate::value::EnumValue {
                    type_name: name.clone(),
                    value: v,
                }))),
                Err(_) => Err(ErrorValue::int_overflow()),
            },
            Value::Enum(e) if e.type_name == *name => Ok(value),
            other => Err(ErrorValue::new(format!(
                "cannot convert {} to {name}",
                other.type_of()
            ))),
        },
        CelType::Struct(name) => match &value {
            Value::Struct(s) if s.type_name == *name => Ok(value),
            Value::Null => Ok(Value::Null),
            other => Err(ErrorValue::new(format!(
                "cannot convert {} to {name}",
                other.type_of()
            ))),
        },
        other => Err(ErrorValue::new(format!("unsupported conversion to {other}"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{activation::EmptyActivation, provider::DeclaredTypeProvider};

    fn ctx_parts() -> (Dispatcher, DeclaredTypeProvider) {
        let mut dispatcher = Dispatcher::new();
        crate::stdlib::register_standard_functions(&mut dispatcher);
        (dispatcher, DeclaredTypeProvider::default())
    }

    fn const_node(value: Value) -> Box<Interpretable> {
        Box::new(Interpretable::Const {
            id: ExprId::NONE,
            value,
        })
    }

    fn error_node() -> Box<Interpretable> {
        Box::new(Interpretable::ConstError {
            id: ExprId::NONE,
            error: ErrorValue::new("boom"),
        })
    }

    #[test]
    fn logical_and_absorbs_errors_on_false() {
        let (dispatcher, provider) = ctx_parts();
        let ctx = EvalContext {
            dispatcher: &dispatcher,
            provider: &provider,
        };
        let node = Interpretable::And {
            id: ExprId::NONE,
            left: const_node(Value::Bool(false)),
            right: error_node(),
        };
        let result = node.eval(&ctx, &EmptyActivation).unwrap();
        assert!(result.equals(&Value::Bool(false)));

        // Reversed operands absorb the same way.
        let node = Interpretable::And {
            id: ExprId::NONE,
            left: error_node(),
            right: const_node(Value::Bool(false)),
        };
        assert!(node.eval(&ctx, &EmptyActivation).unwrap().equals(&Value::Bool(false)));
    }

    #[test]
    fn error_wins_over_unknown_in_logic() {
        let (dispatcher, provider) = ctx_parts();
        let ctx = EvalContext {
            dispatcher: &dispatcher,
            provider: &provider,
        };
        let node = Interpretable::Or {
            id: ExprId::NONE,
            left: const_node(Value::unknown("x")),
            right: error_node(),
        };
        let err = node.eval(&ctx, &EmptyActivation).unwrap_err();
        assert_eq!(err.message, "boom");
    }

    #[test]
    fn unknowns_merge_in_logic() {
        let (dispatcher, provider) = ctx_parts();
        let ctx = EvalContext {
            dispatcher: &dispatcher,
            provider: &provider,
        };
        let node = Interpretable::And {
            id: ExprId::NONE,
            left: const_node(Value::unknown("a")),
            right: const_node(Value::unknown("b")),
        };
        let result = node.eval(&ctx, &EmptyActivation).unwrap();
        let Value::Unknown(set) = result else { panic!("expected unknown") };
        assert_eq!(set.attributes().collect::<Vec<_>>(), vec!["a", "b"]);
    }

    #[test]
    fn not_strictly_false_turns_errors_into_true() {
        let (dispatcher, provider) = ctx_parts();
        let ctx = EvalContext {
            dispatcher: &dispatcher,
            provider: &provider,
        };
        let node = Interpretable::NotStrictlyFalse {
            id: ExprId::NONE,
            operand: error_node(),
        };
        assert!(node.eval(&ctx, &EmptyActivation).unwrap().equals(&Value::Bool(true)));
        let node = Interpretable::NotStrictlyFalse {
            id: ExprId::NONE,
            operand: const_node(Value::Bool(false)),
        };
        assert!(node.eval(&ctx, &EmptyActivation).unwrap().equals(&Value::Bool(false)));
    }
}
