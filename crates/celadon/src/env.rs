//! The embedding surface: `Env`, `EnvOptions`, and `Program`.
//!
//! An environment is immutable once built. `extend` deep-copies the
//! declaration set into a new environment, so compiled programs and the
//! parent environment are never affected by later extensions. Programs share
//! the environment's dispatcher and type provider through `Arc` and may be
//! evaluated concurrently, each against its own activation.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};

use crate::{
    activation::{Activation, EmptyActivation, MapActivation},
    ast::{Ast, SourceInfo},
    checker::{self, CheckerContext},
    decls::{ConstantDecl, Container, EnumDecl, FunctionDecl, IdentDecl, Scopes, StructDecl, VariableDecl},
    dispatch::{Dispatcher, OverloadImpl},
    errors::{CompileError, EvalError, ParseError},
    interp::{EvalContext, Interpretable},
    parse,
    planner::{self, PlannerContext},
    provider::{DeclaredTypeProvider, TypeProvider},
    stdlib,
    types::CelType,
    value::Value,
};

/// Construction options for an [`Env`].
#[derive(Debug, Clone, Default)]
pub struct EnvOptions {
    /// Dotted namespace for name resolution (empty for the root container).
    pub container: String,
    pub variables: Vec<VariableDecl>,
    pub constants: Vec<ConstantDecl>,
    /// Typed declarations for user functions (checker side).
    pub functions: Vec<FunctionDecl>,
    /// Runtime bindings for user overloads (dispatcher side).
    pub function_impls: Vec<OverloadImpl>,
    pub structs: Vec<StructDecl>,
    pub enums: Vec<EnumDecl>,
    /// Overrides the declaration-backed provider when set.
    pub type_provider: Option<Arc<dyn TypeProvider>>,
    pub disable_standard_library: bool,
    /// Compile without type checking; programs evaluate in `dyn` mode.
    pub disable_type_checking: bool,
    /// Parse without macro expansion.
    pub disable_macros: bool,
    /// Type enum constants as `int` rather than their enum type.
    pub enum_values_as_int: bool,
}

impl EnvOptions {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_container(mut self, container: impl Into<String>) -> Self {
        self.container = container.into();
        self
    }

    #[must_use]
    pub fn with_variable(mut self, name: impl Into<String>, ty: CelType) -> Self {
        self.variables.push(VariableDecl::new(name, ty));
        self
    }

    #[must_use]
    pub fn with_constant(mut self, name: impl Into<String>, ty: CelType, value: Value) -> Self {
        self.constants.push(ConstantDecl::new(name, ty, value));
        self
    }

    #[must_use]
    pub fn with_function(mut self, decl: FunctionDecl) -> Self {
        self.functions.push(decl);
        self
    }

    #[must_use]
    pub fn with_function_impl(mut self, overload: OverloadImpl) -> Self {
        self.function_impls.push(overload);
        self
    }

    #[must_use]
    pub fn with_struct(mut self, decl: StructDecl) -> Self {
        self.structs.push(decl);
        self
    }

    #[must_use]
    pub fn with_enum(mut self, decl: EnumDecl) -> Self {
        self.enums.push(decl);
        self
    }

    /// Appends `other`'s declarations onto a copy of `self` (for `extend`).
    fn merged_with(&self, other: EnvOptions) -> EnvOptions {
        let mut merged = self.clone();
        if !other.container.is_empty() {
            merged.container = other.container;
        }
        merged.variables.extend(other.variables);
        merged.constants.extend(other.constants);
        merged.functions.extend(other.functions);
        merged.function_impls.extend(other.function_impls);
        merged.structs.extend(other.structs);
        merged.enums.extend(other.enums);
        if other.type_provider.is_some() {
            merged.type_provider = other.type_provider;
        }
        merged.disable_standard_library |= other.disable_standard_library;
        merged.disable_type_checking |= other.disable_type_checking;
        merged.disable_macros |= other.disable_macros;
        merged.enum_values_as_int |= other.enum_values_as_int;
        merged
    }
}

/// A compile environment: declarations, type provider, and dispatcher.
#[derive(Debug)]
pub struct Env {
    options: EnvOptions,
    container: Container,
    provider: Arc<dyn TypeProvider>,
    functions: AHashMap<String, FunctionDecl>,
    constants: AHashMap<String, ConstantDecl>,
    variables: AHashSet<String>,
    base_scopes: Scopes,
    dispatcher: Arc<Dispatcher>,
}

impl Env {
    #[must_use]
    pub fn new(options: EnvOptions) -> Self {
        let container = Container::new(options.container.clone());

        let mut functions: AHashMap<String, FunctionDecl> = AHashMap::new();
        if !options.disable_standard_library {
            for decl in stdlib::standard_declarations() {
                functions.insert(decl.name.clone(), decl);
            }
        }
        for decl in &options.functions {
            match functions.get_mut(&decl.name) {
                Some(existing) => {
                    // User overloads extend the function; a reused id
                    // replaces the standard signature.
                    for overload in decl.overloads() {
                        existing.add_overload(overload.clone());
                    }
                }
                None => {
                    functions.insert(decl.name.clone(), decl.clone());
                }
            }
        }

        let constants: AHashMap<String, ConstantDecl> = options
            .constants
            .iter()
            .map(|c| (c.name.clone(), c.clone()))
            .collect();
        let variables: AHashSet<String> = options.variables.iter().map(|v| v.name.clone()).collect();

        let mut base_scopes = Scopes::new();
        for decl in &options.variables {
            base_scopes.add_ident(IdentDecl::Variable(decl.clone()));
        }
        for decl in options.constants.iter() {
            base_scopes.add_ident(IdentDecl::Constant(decl.clone()));
        }
        for decl in functions.values() {
            base_scopes.add_function(decl.clone());
        }

        let provider: Arc<dyn TypeProvider> = match &options.type_provider {
            Some(provider) => provider.clone(),
            None => Arc::new(DeclaredTypeProvider::new(options.structs.clone(), options.enums.clone())),
        };

        let mut dispatcher = Dispatcher::new();
        if !options.disable_standard_library {
            stdlib::register_standard_functions(&mut dispatcher);
        }
        for overload in &options.function_impls {
            dispatcher.register(overload.clone());
        }

        Self {
            options,
            container,
            provider,
            functions,
            constants,
            variables,
            base_scopes,
            dispatcher: Arc::new(dispatcher),
        }
    }

    /// A new environment with additional declarations; `self` is unaffected.
    #[must_use]
    pub fn extend(&self, options: EnvOptions) -> Self {
        Self::new(self.options.merged_with(options))
    }

    #[must_use]
    pub fn container(&self) -> &Container {
        &self.container
    }

    #[must_use]
    pub fn provider(&self) -> &dyn TypeProvider {
        self.provider.as_ref()
    }

    /// Parses `source` into an (unchecked) AST.
    pub fn parse(&self, source: &str) -> Result<Ast, ParseError> {
        parse::parse_with_config(source, "<input>", !self.options.disable_macros)
    }

    /// Type-checks a parsed AST, filling its type and reference tables.
    pub fn check(&self, mut ast: Ast) -> Result<Ast, CompileError> {
        if self.options.disable_type_checking {
            return Ok(ast);
        }
        let context = CheckerContext {
            container: &self.container,
            provider: self.provider.as_ref(),
            scopes: self.base_scopes.clone(),
            enum_values_as_int: self.options.enum_values_as_int,
        };
        let issues = checker::check(&mut ast, context);
        if issues.is_empty() {
            Ok(ast)
        } else {
            Err(CompileError::new(issues))
        }
    }

    /// Parse followed by check.
    pub fn compile(&self, source: &str) -> Result<Ast, CompileError> {
        let ast = self.parse(source)?;
        self.check(ast)
    }

    /// Plans an AST into an executable program. A checked AST gets bound
    /// overload dispatch; an unchecked one evaluates in `dyn` mode.
    #[must_use]
    pub fn program(&self, ast: &Ast) -> Program {
        let context = PlannerContext {
            dispatcher: &self.dispatcher,
            functions: &self.functions,
            constants: &self.constants,
            variables: &self.variables,
            enum_values_as_int: self.options.enum_values_as_int,
        };
        let interpretable = planner::plan(ast, &context);
        Program {
            interpretable,
            source_info: ast.source_info.clone(),
            dispatcher: self.dispatcher.clone(),
            provider: self.provider.clone(),
        }
    }
}

/// A planned, evaluable expression.
///
/// Immutable and shareable: concurrent evaluations only need distinct
/// activations.
#[derive(Debug)]
pub struct Program {
    interpretable: Interpretable,
    source_info: SourceInfo,
    dispatcher: Arc<Dispatcher>,
    provider: Arc<dyn TypeProvider>,
}

impl Program {
    /// Evaluates against bindings: an activation, a `(name, value)`
    /// collection, or `()` for no input.
    pub fn eval(&self, input: impl IntoActivation) -> Result<Value, EvalError> {
        let activation = input.into_activation();
        self.eval_activation(&activation)
    }

    /// Evaluates against a borrowed activation.
    ///
    /// Runtime errors escaping the expression are rewrapped with the source
    /// position of the offending sub-expression.
    pub fn eval_activation(&self, activation: &dyn Activation) -> Result<Value, EvalError> {
        let ctx = EvalContext {
            dispatcher: &self.dispatcher,
            provider: self.provider.as_ref(),
        };
        match self.interpretable.eval(&ctx, activation) {
            Ok(value) => Ok(value),
            Err(error) => {
                let location = error.expr_id.and_then(|id| self.source_info.location(id));
                Err(EvalError::new(error.message, location))
            }
        }
    }
}

/// Conversion of host inputs into activations for `Program::eval`.
pub trait IntoActivation {
    type Act: Activation;

    fn into_activation(self) -> Self::Act;
}

impl IntoActivation for MapActivation {
    type Act = Self;

    fn into_activation(self) -> Self {
        self
    }
}

impl IntoActivation for EmptyActivation {
    type Act = Self;

    fn into_activation(self) -> Self {
        self
    }
}

impl IntoActivation for () {
    type Act = EmptyActivation;

    fn into_activation(self) -> EmptyActivation {
        EmptyActivation
    }
}

impl<'a, A: Activation + ?Sized> IntoActivation for &'a A {
    type Act = &'a A;

    fn into_activation(self) -> Self::Act {
        self
    }
}

impl<S: Into<String>, V: Into<Value>> IntoActivation for Vec<(S, V)> {
    type Act = MapActivation;

    fn into_activation(self) -> MapActivation {
        self.into_iter().collect()
    }
}

impl<S: Into<String>, V: Into<Value>, const N: usize> IntoActivation for [(S, V); N] {
    type Act = MapActivation;

    fn into_activation(self) -> MapActivation {
        self.into_iter().collect()
    }
}
