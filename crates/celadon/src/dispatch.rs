//! Runtime function registry keyed by overload id.
//!
//! The checker narrows each call to a set of overload ids; the planner binds
//! those ids to the implementations registered here. Registration is
//! append-only; re-registering an id replaces the prior binding, which is
//! how embedders override a standard function.

use std::{fmt, sync::Arc};

use ahash::AHashMap;

use crate::value::{ErrorValue, EvalResult, UnknownSet, Value};

/// An overload implementation at a fixed arity.
///
/// The unary/binary forms avoid slice packing on the hot paths; the checker
/// guarantees the bound id matches the arity actually planned.
#[derive(Clone)]
pub enum CelFunction {
    Unary(Arc<dyn Fn(Value) -> EvalResult + Send + Sync>),
    Binary(Arc<dyn Fn(Value, Value) -> EvalResult + Send + Sync>),
    Variadic(Arc<dyn Fn(&[Value]) -> EvalResult + Send + Sync>),
}

impl fmt::Debug for CelFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Unary(_) => write!(f, "CelFunction::Unary"),
            Self::Binary(_) => write!(f, "CelFunction::Binary"),
            Self::Variadic(_) => write!(f, "CelFunction::Variadic"),
        }
    }
}

/// A registered overload: id, implementation, and whether the planner may
/// constant-fold calls whose arguments are all literals.
#[derive(Debug, Clone)]
pub struct OverloadImpl {
    pub id: String,
    pub function: CelFunction,
    pub pure: bool,
}

impl OverloadImpl {
    pub fn unary(id: impl Into<String>, pure: bool, f: impl Fn(Value) -> EvalResult + Send + Sync + 'static) -> Self {
        Self {
            id: id.into(),
            function: CelFunction::Unary(Arc::new(f)),
            pure,
        }
    }

    pub fn binary(
        id: impl Into<String>,
        pure: bool,
        f: impl Fn(Value, Value) -> EvalResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            function: CelFunction::Binary(Arc::new(f)),
            pure,
        }
    }

    pub fn variadic(
        id: impl Into<String>,
        pure: bool,
        f: impl Fn(&[Value]) -> EvalResult + Send + Sync + 'static,
    ) -> Self {
        Self {
            id: id.into(),
            function: CelFunction::Variadic(Arc::new(f)),
            pure,
        }
    }
}

/// Overload-id-keyed function table shared by every program planned from one
/// environment.
#[derive(Debug, Default)]
pub struct Dispatcher {
    overloads: AHashMap<String, OverloadImpl>,
}

impl Dispatcher {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers an implementation; a prior binding for the id is replaced.
    pub fn register(&mut self, overload: OverloadImpl) {
        self.overloads.insert(overload.id.clone(), overload);
    }

    #[must_use]
    pub fn find(&self, id: &str) -> Option<&OverloadImpl> {
        self.overloads.get(id)
    }

    /// Invokes the overload `id` with `args`.
    ///
    /// Functions are strict: an unknown argument short-circuits the call to
    /// the merged unknown (errors propagate before dispatch is reached).
    pub fn dispatch(&self, id: &str, args: &[Value]) -> EvalResult {
        if let Some(unknown) = merge_unknown_args(args) {
            return Ok(unknown);
        }
        let Some(overload) = self.overloads.get(id) else {
            return Err(ErrorValue::new(format!("unbound overload: {id}")));
        };
        match (&overload.function, args) {
            (CelFunction::Unary(f), [a]) => f(a.clone()),
            (CelFunction::Binary(f), [a, b]) => f(a.clone(), b.clone()),
            (CelFunction::Variadic(f), _) => f(args),
            _ => Err(ErrorValue::new(format!(
                "overload {id} called with {} arguments",
                args.len()
            ))),
        }
    }
}

/// Union of the unknown arguments, if any.
#[must_use]
pub fn merge_unknown_args(args: &[Value]) -> Option<Value> {
    let mut merged: Option<UnknownSet> = None;
    for arg in args {
        if let Value::Unknown(set) = arg {
            merged = Some(match merged {
                Some(existing) => existing.union(set),
                None => (**set).clone(),
            });
        }
    }
    merged.map(|set| Value::Unknown(Arc::new(set)))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_dispatcher() -> Dispatcher {
        let mut dispatcher = Dispatcher::new();
        dispatcher.register(OverloadImpl::binary("add_int64", true, |a, b| {
            match (a, b) {
                (Value::Int(a), Value::Int(b)) => Ok(Value::Int(a + b)),
                _ => Err(ErrorValue::new("no such overload")),
            }
        }));
        dispatcher
    }

    #[test]
    fn dispatch_invokes_by_id() {
        let dispatcher = test_dispatcher();
        let result = dispatcher.dispatch("add_int64", &[Value::Int(2), Value::Int(3)]).unwrap();
        assert!(result.equals(&Value::Int(5)));
    }

    #[test]
    fn unbound_overload_is_an_error() {
        let dispatcher = test_dispatcher();
        let err = dispatcher.dispatch("missing_id", &[]).unwrap_err();
        assert!(err.message.contains("unbound overload"));
    }

    #[test]
    fn reregistration_replaces_the_binding() {
        let mut dispatcher = test_dispatcher();
        dispatcher.register(OverloadImpl::binary("add_int64", true, |_, _| Ok(Value::Int(99))));
        let result = dispatcher.dispatch("add_int64", &[Value::Int(1), Value::Int(1)]).unwrap();
        assert!(result.equals(&Value::Int(99)));
    }

    #[test]
    fn unknown_arguments_short_circuit_dispatch() {
        let dispatcher = test_dispatcher();
        let result = dispatcher
            .dispatch("add_int64", &[Value::unknown("x"), Value::Int(1)])
            .unwrap();
        assert!(result.is_unknown());
    }
}
