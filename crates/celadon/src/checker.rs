//! The type checker.
//!
//! A bottom-up pass that annotates every expression id with a resolved type
//! (`Ast::type_map`) and every ident/call with a reference
//! (`Ast::ref_map`). The checker never panics and never stops early: every
//! problem lands in the returned [`Issues`] with its source position, and
//! failed nodes continue as the `error` type so one mistake does not cascade.

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    ast::{Ast, Comprehension, Constant, Expr, ExprId, ExprKind, Reference, SourceLocation},
    decls::{Container, FunctionDecl, IdentDecl, Scopes},
    errors::{Issue, Issues},
    operators,
    parse::qualified_name,
    provider::TypeProvider,
    types::{CelType, TypeMapping, is_assignable, join_types, types_equivalent},
};

/// Overload id reported for conversion calls resolved through a type name
/// rather than a declared function (e.g. `test.Color(2)`).
pub const TYPE_CONVERSION_OVERLOAD: &str = "type_conversion";

/// Everything the checker needs from the environment.
pub struct CheckerContext<'a> {
    pub container: &'a Container,
    pub provider: &'a dyn TypeProvider,
    /// Base scope pre-seeded with the environment's declarations.
    pub scopes: Scopes,
    /// When set, enum constants type as `int` instead of their enum type.
    pub enum_values_as_int: bool,
}

/// Type-checks `ast` in place; returns the accumulated issues (empty on
/// success). The AST is marked checked only when no issues were found.
pub fn check(ast: &mut Ast, context: CheckerContext<'_>) -> Issues {
    let expr = ast.expr.clone();
    let mut checker = Checker {
        container: context.container,
        provider: context.provider,
        scopes: context.scopes,
        enum_values_as_int: context.enum_values_as_int,
        ast: &mut *ast,
        issues: Issues::new(),
        mapping: TypeMapping::new(),
        freshness: 0,
    };
    checker.check_expr(&expr);
    checker.finalize();
    let mut issues = checker.issues;
    if issues.is_empty() {
        ast.mark_checked();
    } else {
        issues.sort();
    }
    issues
}

struct Checker<'a> {
    container: &'a Container,
    provider: &'a dyn TypeProvider,
    scopes: Scopes,
    enum_values_as_int: bool,
    ast: &'a mut Ast,
    issues: Issues,
    mapping: TypeMapping,
    /// Counter for generator-unique type variables.
    freshness: u32,
}

impl Checker<'_> {
    // ---- bookkeeping ----

    fn location(&self, id: ExprId) -> SourceLocation {
        self.ast
            .source_info
            .location(id)
            .unwrap_or(SourceLocation { line: 1, column: 1 })
    }

    fn report(&mut self, id: ExprId, message: impl Into<String>) {
        let location = self.location(id);
        self.issues.push(Issue::new(message, location));
    }

    fn set_type(&mut self, id: ExprId, ty: CelType) -> CelType {
        self.ast.type_map.insert(id, ty.clone());
        ty
    }

    fn set_reference(&mut self, id: ExprId, reference: Reference) {
        self.ast.ref_map.insert(id, reference);
    }

    fn fresh_var(&mut self, base: &str) -> String {
        self.freshness += 1;
        format!("{base}@{}", self.freshness)
    }

    /// Substitutes the final bindings into the type map, widening unbound
    /// type variables to `dyn`.
    fn finalize(&mut self) {
        let ids: Vec<ExprId> = self.ast.type_map.keys().copied().collect();
        for id in ids {
            if let Some(ty) = self.ast.type_map.get(&id) {
                let substituted = self.mapping.substitute(ty, true);
                self.ast.type_map.insert(id, substituted);
            }
        }
    }

    // ---- expression dispatch ----

    fn check_expr(&mut self, expr: &Expr) -> CelType {
        match &expr.kind {
            ExprKind::Literal(constant) => {
                let ty = match constant {
                    Constant::Bool(_) => CelType::Bool,
                    Constant::Int(_) => CelType::Int,
                    Constant::Uint(_) => CelType::Uint,
                    Constant::Double(_) => CelType::Double,
                    Constant::String(_) => CelType::String,
                    Constant::Bytes(_) => CelType::Bytes,
                    Constant::Null => CelType::Null,
                };
                self.set_type(expr.id, ty)
            }
            ExprKind::Ident(name) => self.check_ident(expr.id, name),
            ExprKind::Select {
                operand,
                field,
                test_only,
                optional,
            } => self.check_select(expr, operand, field, *test_only, *optional),
            ExprKind::Call { function, target, args } => self.check_call(expr.id, function, target.as_deref(), args),
            ExprKind::List {
                elements,
                optional_indices,
            } => self.check_list(expr.id, elements, optional_indices),
            ExprKind::Map { entries } => self.check_map(expr.id, entries),
            ExprKind::Struct { type_name, fields } => self.check_struct(expr.id, type_name, fields),
            ExprKind::Comprehension(comp) => self.check_comprehension(expr.id, comp),
        }
    }

    // ---- identifiers ----

    /// Walks container candidates through the `lookup_ident` order:
    /// constants and variables, builtin type names, provider struct types,
    /// provider enum types, then enum constant values.
    fn resolve_ident(&mut self, name: &str) -> Option<(Reference, CelType)> {
        for candidate in self.container.resolve_candidates(name) {
            if let Some(decl) = self.scopes.find_ident(&candidate) {
                let ty = decl.ty().clone();
                return Some((
                    Reference::Variable {
                        name: candidate,
                        enum_value: None,
                    },
                    ty,
                ));
            }
            if let Some(ty) = builtin_type_name(&candidate) {
                return Some((
                    Reference::Variable {
                        name: candidate,
                        enum_value: None,
                    },
                    CelType::Type(Box::new(ty)),
                ));
            }
            if let Some(ty) = self.provider.find_struct_type(&candidate) {
                return Some((
                    Reference::Variable {
                        name: candidate,
                        enum_value: None,
                    },
                    CelType::Type(Box::new(ty)),
                ));
            }
            if let Some(ty) = self.provider.find_enum_type(&candidate) {
                return Some((
                    Reference::Variable {
                        name: candidate,
                        enum_value: None,
                    },
                    CelType::Type(Box::new(ty)),
                ));
            }
            if let Some((enum_name, value_name)) = candidate.rsplit_once('.')
                && let Some(enum_ty) = self.provider.find_enum_type(enum_name)
                && let Some(value) = self.provider.find_enum_value(enum_name, value_name)
            {
                let ty = if self.enum_values_as_int { CelType::Int } else { enum_ty };
                return Some((
                    Reference::Variable {
                        name: candidate,
                        enum_value: Some(value),
                    },
                    ty,
                ));
            }
        }
        None
    }

    fn check_ident(&mut self, id: ExprId, name: &str) -> CelType {
        match self.resolve_ident(name) {
            Some((reference, ty)) => {
                self.set_reference(id, reference);
                self.set_type(id, ty)
            }
            None => {
                self.report(
                    id,
                    format!(
                        "undeclared reference to '{name}' (in container '{}')",
                        self.container.name()
                    ),
                );
                self.set_type(id, CelType::Error)
            }
        }
    }

    // ---- select ----

    fn check_select(&mut self, expr: &Expr, operand: &Expr, field: &str, test_only: bool, optional: bool) -> CelType {
        // A plain select chain may actually be a qualified identifier
        // (`a.b.c`); that interpretation wins when it resolves.
        if !test_only
            && !optional
            && let Some(name) = qualified_name(expr)
            && let Some((reference, ty)) = self.resolve_ident(&name)
        {
            self.set_reference(expr.id, reference);
            return self.set_type(expr.id, ty);
        }

        let operand_type = self.check_expr(operand);
        let resolved = self.mapping.substitute(&operand_type, false);

        // Optional chaining unwraps the operand and rewraps the result.
        let (target_type, rewrap) = match resolved.optional_inner() {
            Some(inner) => (inner.clone(), true),
            None => (resolved, false),
        };

        let field_type = self.field_type(expr.id, &target_type, field);
        if test_only {
            return self.set_type(expr.id, CelType::Bool);
        }
        let result = if optional || rewrap {
            CelType::optional(field_type)
        } else {
            field_type
        };
        self.set_type(expr.id, result)
    }

    /// Field lookup on maps, structs, and the wildcards.
    fn field_type(&mut self, id: ExprId, operand: &CelType, field: &str) -> CelType {
        match operand {
            CelType::Map(_, value) => (**value).clone(),
            CelType::Struct(name) => match self.provider.find_struct_field_type(name, field) {
                Some(ty) => ty,
                None => {
                    self.report(id, format!("undefined field '{field}' on type '{name}'"));
                    CelType::Error
                }
            },
            CelType::TypeParam(name) => {
                // Bind the variable to dyn so later uses agree.
                let param = CelType::TypeParam(name.clone());
                is_assignable(&mut self.mapping, &param, &CelType::Dyn);
                CelType::Dyn
            }
            CelType::Dyn | CelType::Error => CelType::Dyn,
            other => {
                self.report(id, format!("type '{other}' does not support field selection"));
                CelType::Error
            }
        }
    }

    // ---- calls ----

    fn check_call(&mut self, id: ExprId, function: &str, target: Option<&Expr>, args: &[Expr]) -> CelType {
        // The ternary joins its branches rather than resolving an overload.
        if function == operators::CONDITIONAL && args.len() == 3 {
            let condition_type = self.check_expr(&args[0]);
            if !is_assignable(&mut self.mapping, &CelType::Bool, &condition_type) {
                self.report(args[0].id, format!("ternary condition must be bool, found '{condition_type}'"));
            }
            let then_type = self.check_expr(&args[1]);
            let else_type = self.check_expr(&args[2]);
            self.set_reference(
                id,
                Reference::Function {
                    overload_ids: vec!["conditional".to_owned()],
                    resolved_name: Some(operators::CONDITIONAL.to_owned()),
                },
            );
            let joined = join_types(
                &self.mapping.substitute(&then_type, false),
                &self.mapping.substitute(&else_type, false),
            );
            return self.set_type(id, joined);
        }

        if let Some(target) = target {
            return self.check_member_call(id, function, target, args);
        }
        self.check_global_call(id, function, args)
    }

    fn check_global_call(&mut self, id: ExprId, function: &str, args: &[Expr]) -> CelType {
        let arg_types: Vec<CelType> = args.iter().map(|arg| self.check_expr(arg)).collect();
        let Some(decl) = self.find_function(function) else {
            // A name that resolves to a type is a one-argument conversion.
            if let Some(ty) = self.resolve_type_name(function) {
                if args.len() != 1 {
                    self.report(id, format!("type conversion '{function}' takes exactly one argument"));
                    return self.set_type(id, CelType::Error);
                }
                self.set_reference(
                    id,
                    Reference::Function {
                        overload_ids: vec![TYPE_CONVERSION_OVERLOAD.to_owned()],
                        resolved_name: Some(ty.to_string()),
                    },
                );
                return self.set_type(id, ty);
            }
            self.report(
                id,
                format!(
                    "undeclared reference to '{function}' (in container '{}')",
                    self.container.name()
                ),
            );
            return self.set_type(id, CelType::Error);
        };
        self.resolve_overload(id, &decl, &arg_types, false)
    }

    fn check_member_call(&mut self, id: ExprId, function: &str, target: &Expr, args: &[Expr]) -> CelType {
        // `a.b.f(x)` may name a global function `a.b.f` (e.g. `optional.of`).
        if let Some(prefix) = qualified_name(target) {
            let qualified = format!("{prefix}.{function}");
            if let Some(decl) = self.find_function(&qualified) {
                let arg_types: Vec<CelType> = args.iter().map(|arg| self.check_expr(arg)).collect();
                return self.resolve_overload(id, &decl, &arg_types, false);
            }
        }

        let target_type = self.check_expr(target);
        let mut arg_types: Vec<CelType> = Vec::with_capacity(args.len() + 1);
        arg_types.push(target_type);
        for arg in args {
            arg_types.push(self.check_expr(arg));
        }
        match self.find_function(function) {
            Some(decl) => self.resolve_overload(id, &decl, &arg_types, true),
            None => {
                self.report(
                    id,
                    format!(
                        "undeclared reference to '{function}' (in container '{}')",
                        self.container.name()
                    ),
                );
                self.set_type(id, CelType::Error)
            }
        }
    }

    fn find_function(&self, name: &str) -> Option<FunctionDecl> {
        for candidate in self.container.resolve_candidates(name) {
            if let Some(decl) = self.scopes.find_function(&candidate) {
                return Some(decl);
            }
        }
        None
    }

    /// A name usable as a conversion target: builtin type, struct, or enum.
    fn resolve_type_name(&mut self, name: &str) -> Option<CelType> {
        for candidate in self.container.resolve_candidates(name) {
            if let Some(ty) = builtin_type_name(&candidate) {
                return Some(ty);
            }
            if let Some(ty) = self.provider.find_struct_type(&candidate) {
                return Some(ty);
            }
            if let Some(ty) = self.provider.find_enum_type(&candidate) {
                return Some(ty);
            }
        }
        None
    }

    /// Overload resolution with per-candidate snapshot and rollback.
    ///
    /// Every candidate of matching style and arity is tried against a clone
    /// of the current type mapping; a successful match commits its bindings.
    /// All matching ids are recorded on the reference. Result types that are
    /// not equivalent across matches widen the call to `dyn`.
    fn resolve_overload(&mut self, id: ExprId, decl: &FunctionDecl, arg_types: &[CelType], member_call: bool) -> CelType {
        let mut matched_ids: SmallVec<[String; 2]> = SmallVec::new();
        let mut result_types: SmallVec<[CelType; 2]> = SmallVec::new();

        for overload in decl.overloads() {
            if overload.is_member != member_call || overload.arg_types.len() != arg_types.len() {
                continue;
            }
            // Fresh-rename declared type parameters so independent calls to
            // the same overload cannot interfere.
            let mut renames = AHashMap::new();
            for param in &overload.type_params {
                renames.insert(param.clone(), CelType::TypeParam(self.fresh_var(param)));
            }
            let params: Vec<CelType> = overload.arg_types.iter().map(|t| rename_params(t, &renames)).collect();
            let result = rename_params(&overload.result_type, &renames);

            let mut trial = self.mapping.clone();
            let matches = params
                .iter()
                .zip(arg_types)
                .all(|(param, arg)| is_assignable(&mut trial, param, arg));
            if matches {
                self.mapping = trial;
                matched_ids.push(overload.id.clone());
                result_types.push(self.mapping.substitute(&result, false));
            }
        }

        if matched_ids.is_empty() {
            let rendered: Vec<String> = arg_types
                .iter()
                .map(|t| self.mapping.substitute(t, true).to_string())
                .collect();
            let display = operators::display_name(&decl.name).unwrap_or(&decl.name);
            self.report(
                id,
                format!("found no matching overload for '{display}' applied to ({})", rendered.join(", ")),
            );
            return self.set_type(id, CelType::Error);
        }

        self.set_reference(
            id,
            Reference::Function {
                overload_ids: matched_ids.into_vec(),
                resolved_name: Some(decl.name.clone()),
            },
        );

        let first = result_types[0].clone();
        let all_equivalent = result_types
            .iter()
            .all(|candidate| types_equivalent(&self.mapping, candidate, &first));
        let result = if all_equivalent { first } else { CelType::Dyn };
        self.set_type(id, result)
    }

    // ---- aggregates ----

    fn check_list(&mut self, id: ExprId, elements: &[Expr], optional_indices: &[u32]) -> CelType {
        if elements.is_empty() {
            let elem = CelType::TypeParam(self.fresh_var("_list_elem"));
            return self.set_type(id, CelType::List(Box::new(elem)));
        }
        let mut joined: Option<CelType> = None;
        for (index, element) in elements.iter().enumerate() {
            let mut elem_type = self.check_expr(element);
            let is_optional_entry = optional_indices.contains(&u32::try_from(index).unwrap_or(u32::MAX));
            if is_optional_entry {
                elem_type = self.unwrap_optional_entry(element.id, &elem_type);
            }
            let substituted = self.mapping.substitute(&elem_type, false);
            joined = Some(match joined {
                Some(existing) => join_types(&existing, &substituted),
                None => substituted,
            });
        }
        let elem = joined.unwrap_or(CelType::Dyn);
        self.set_type(id, CelType::List(Box::new(elem)))
    }

    /// Entries written `?e` must carry `optional(T)` (or dyn); their
    /// contribution to the joined element type is the inner `T`.
    fn unwrap_optional_entry(&mut self, id: ExprId, ty: &CelType) -> CelType {
        let resolved = self.mapping.substitute(ty, false);
        match resolved.optional_inner() {
            Some(inner) => inner.clone(),
            None if resolved.is_dyn_or_error() => CelType::Dyn,
            None => {
                self.report(id, format!("expected optional type, found '{resolved}'"));
                CelType::Error
            }
        }
    }

    fn check_map(&mut self, id: ExprId, entries: &[crate::ast::MapEntry]) -> CelType {
        if entries.is_empty() {
            return self.set_type(id, CelType::Map(Box::new(CelType::Dyn), Box::new(CelType::Dyn)));
        }
        let mut joined_key: Option<CelType> = None;
        let mut joined_value: Option<CelType> = None;
        for entry in entries {
            let key_type = self.check_expr(&entry.key);
            let mut value_type = self.check_expr(&entry.value);
            if entry.optional {
                value_type = self.unwrap_optional_entry(entry.value.id, &value_type);
            }
            let key_type = self.mapping.substitute(&key_type, false);
            let value_type = self.mapping.substitute(&value_type, false);
            joined_key = Some(match joined_key {
                Some(existing) => join_types(&existing, &key_type),
                None => key_type,
            });
            joined_value = Some(match joined_value {
                Some(existing) => join_types(&existing, &value_type),
                None => value_type,
            });
        }
        self.set_type(
            id,
            CelType::Map(
                Box::new(joined_key.unwrap_or(CelType::Dyn)),
                Box::new(joined_value.unwrap_or(CelType::Dyn)),
            ),
        )
    }

    fn check_struct(&mut self, id: ExprId, type_name: &str, fields: &[crate::ast::StructField]) -> CelType {
        let mut resolved_name: Option<String> = None;
        for candidate in self.container.resolve_candidates(type_name) {
            if self.provider.find_struct_type(&candidate).is_some() {
                resolved_name = Some(candidate);
                break;
            }
        }
        let Some(struct_name) = resolved_name else {
            self.report(
                id,
                format!(
                    "undeclared reference to '{type_name}' (in container '{}')",
                    self.container.name()
                ),
            );
            // Still check field values so their errors surface.
            for field in fields {
                self.check_expr(&field.value);
            }
            return self.set_type(id, CelType::Error);
        };

        self.set_reference(
            id,
            Reference::Variable {
                name: struct_name.clone(),
                enum_value: None,
            },
        );

        for field in fields {
            let value_type = self.check_expr(&field.value);
            let Some(field_type) = self.provider.find_struct_field_type(&struct_name, &field.name) else {
                self.report(field.id, format!("undefined field '{}' on type '{struct_name}'", field.name));
                continue;
            };
            let effective = if field.optional {
                self.unwrap_optional_entry(field.value.id, &value_type)
            } else {
                value_type
            };
            if !is_assignable(&mut self.mapping, &field_type, &effective) {
                self.report(
                    field.id,
                    format!(
                        "expected type '{field_type}' for field '{}', found '{}'",
                        field.name,
                        self.mapping.substitute(&effective, true)
                    ),
                );
            }
        }
        self.set_type(id, CelType::Struct(struct_name))
    }

    // ---- comprehensions ----

    fn check_comprehension(&mut self, id: ExprId, comp: &Comprehension) -> CelType {
        let range_type = self.check_expr(&comp.iter_range);
        let range_type = self.mapping.substitute(&range_type, false);
        let accu_type = self.check_expr(&comp.accu_init);

        let (first_var, second_var) = self.iter_var_types(comp, &range_type);

        // Accumulator scope survives the loop; iteration scope does not.
        self.scopes.enter_scope();
        self.scopes.add_ident(IdentDecl::Variable(crate::decls::VariableDecl::new(
            comp.accu_var.clone(),
            accu_type.clone(),
        )));

        self.scopes.enter_scope();
        self.scopes.add_ident(IdentDecl::Variable(crate::decls::VariableDecl::new(
            comp.iter_var.clone(),
            first_var,
        )));
        if let Some(second_name) = &comp.iter_var2 {
            self.scopes.add_ident(IdentDecl::Variable(crate::decls::VariableDecl::new(
                second_name.clone(),
                second_var,
            )));
        }

        let condition_type = self.check_expr(&comp.loop_condition);
        if !is_assignable(&mut self.mapping, &CelType::Bool, &condition_type) {
            self.report(
                comp.loop_condition.id,
                format!("comprehension condition must be bool, found '{condition_type}'"),
            );
        }
        let step_type = self.check_expr(&comp.loop_step);
        if !is_assignable(&mut self.mapping, &accu_type, &step_type) {
            self.report(
                comp.loop_step.id,
                format!(
                    "expression of type '{}' cannot be bound to accumulator of type '{}'",
                    self.mapping.substitute(&step_type, true),
                    self.mapping.substitute(&accu_type, true)
                ),
            );
        }
        self.scopes.exit_scope();

        let result_type = self.check_expr(&comp.result);
        self.scopes.exit_scope();

        self.set_type(id, result_type)
    }

    /// Iteration variable types derived from the range: element for lists,
    /// key for maps; the two-variable form sees `(index, element)` on lists
    /// and `(key, value)` on maps.
    fn iter_var_types(&mut self, comp: &Comprehension, range_type: &CelType) -> (CelType, CelType) {
        let two_vars = comp.iter_var2.is_some();
        match range_type {
            CelType::List(elem) => {
                if two_vars {
                    (CelType::Int, (**elem).clone())
                } else {
                    ((**elem).clone(), CelType::Dyn)
                }
            }
            CelType::Map(key, value) => {
                if two_vars {
                    ((**key).clone(), (**value).clone())
                } else {
                    ((**key).clone(), CelType::Dyn)
                }
            }
            CelType::TypeParam(_) | CelType::Dyn | CelType::Error => (CelType::Dyn, CelType::Dyn),
            other => {
                self.report(
                    comp.iter_range.id,
                    format!("expression of type '{other}' cannot be the range of a comprehension"),
                );
                (CelType::Dyn, CelType::Dyn)
            }
        }
    }
}

/// Applies a type-parameter renaming over a declared type.
fn rename_params(ty: &CelType, renames: &AHashMap<String, CelType>) -> CelType {
    match ty {
        CelType::TypeParam(name) => renames.get(name).cloned().unwrap_or_else(|| ty.clone()),
        CelType::List(elem) => CelType::List(Box::new(rename_params(elem, renames))),
        CelType::Map(key, value) => CelType::Map(
            Box::new(rename_params(key, renames)),
            Box::new(rename_params(value, renames)),
        ),
        CelType::Opaque(name, params) => CelType::Opaque(
            name.clone(),
            params.iter().map(|p| rename_params(p, renames)).collect(),
        ),
        CelType::Type(inner) => CelType::Type(Box::new(rename_params(inner, renames))),
        _ => ty.clone(),
    }
}

/// Names that denote builtin types in identifier position.
fn builtin_type_name(name: &str) -> Option<CelType> {
    match name {
        "bool" => Some(CelType::Bool),
        "int" => Some(CelType::Int),
        "uint" => Some(CelType::Uint),
        "double" => Some(CelType::Double),
        "string" => Some(CelType::String),
        "bytes" => Some(CelType::Bytes),
        "null_type" => Some(CelType::Null),
        "list" => Some(CelType::List(Box::new(CelType::Dyn))),
        "map" => Some(CelType::Map(Box::new(CelType::Dyn), Box::new(CelType::Dyn))),
        "type" => Some(CelType::Type(Box::new(CelType::Dyn))),
        "google.protobuf.Duration" => Some(CelType::Duration),
        "google.protobuf.Timestamp" => Some(CelType::Timestamp),
        _ => None,
    }
}
