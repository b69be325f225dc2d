#![doc = include_str!("../../../README.md")]

mod activation;
mod ast;
mod checker;
mod decls;
mod dispatch;
mod env;
mod errors;
mod intern;
mod interp;
mod lexer;
mod macros;
pub mod operators;
mod parse;
mod planner;
mod provider;
mod stdlib;
mod temporal;
mod types;
mod value;

pub use crate::{
    activation::{
        Activation, ActivationCache, EmptyActivation, HierarchicalActivation, LazyActivation, MapActivation,
        MutableActivation, PartialActivation, StrictActivation,
    },
    ast::{Ast, Constant, Expr, ExprId, ExprKind, Reference, SourceInfo, SourceLocation},
    decls::{ConstantDecl, Container, EnumDecl, FieldDecl, FunctionDecl, OverloadDecl, StructDecl, VariableDecl},
    dispatch::{CelFunction, Dispatcher, OverloadImpl},
    env::{Env, EnvOptions, IntoActivation, Program},
    errors::{CompileError, EvalError, Issue, Issues, ParseError},
    provider::{DeclaredTypeProvider, TypeProvider},
    temporal::{CelDuration, CelTimestamp},
    types::{CelType, TypeKind},
    value::{EnumValue, ErrorValue, EvalResult, MapKey, MapValue, OptionalValue, StructValue, UnknownSet, Value},
};
