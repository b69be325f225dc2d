//! The CEL standard library: checker declarations and runtime bindings.
//!
//! Each submodule owns one concern and contributes both sides: the typed
//! [`FunctionDecl`]s the checker resolves against and the [`OverloadImpl`]s
//! the dispatcher executes. Overload ids follow CEL's published naming
//! (`add_int64`, `less_int64_uint64`, `string_to_timestamp`, …) so checked
//! ASTs stay interoperable.

mod calc;
mod compare;
mod convert;
mod optional;
mod strings;
mod temporal;

use crate::{decls::FunctionDecl, dispatch::Dispatcher, types::CelType};

/// All standard function declarations, for seeding a checker environment.
#[must_use]
pub fn standard_declarations() -> Vec<FunctionDecl> {
    let mut decls = Vec::new();
    calc::declarations(&mut decls);
    compare::declarations(&mut decls);
    strings::declarations(&mut decls);
    convert::declarations(&mut decls);
    temporal::declarations(&mut decls);
    optional::declarations(&mut decls);
    decls
}

/// Binds every standard overload id to its implementation.
pub fn register_standard_functions(dispatcher: &mut Dispatcher) {
    calc::register(dispatcher);
    compare::register(dispatcher);
    strings::register(dispatcher);
    convert::register(dispatcher);
    temporal::register(dispatcher);
    optional::register(dispatcher);
}

// Shared type-expression shorthand for the declaration tables.

fn param(name: &str) -> CelType {
    CelType::TypeParam(name.to_owned())
}

fn list_of(elem: CelType) -> CelType {
    CelType::List(Box::new(elem))
}

fn map_of(key: CelType, value: CelType) -> CelType {
    CelType::Map(Box::new(key), Box::new(value))
}
