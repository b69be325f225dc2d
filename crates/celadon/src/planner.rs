//! The planner: checked (or unchecked) ASTs into [`Interpretable`] trees.
//!
//! Planning binds overload dispatch using the checker's references when they
//! exist and falls back to arity/style-filtered candidate sets for unchecked
//! ASTs (`dyn` evaluation). Literal subtrees whose single bound overload is
//! pure fold at plan time; a folding failure plans as a constant-error node
//! that re-raises when (and only when) the subtree is actually evaluated.

use std::sync::Arc;

use ahash::{AHashMap, AHashSet};

use crate::{
    ast::{Ast, Constant, Expr, ExprId, ExprKind, Reference},
    checker::TYPE_CONVERSION_OVERLOAD,
    decls::{ConstantDecl, FunctionDecl},
    dispatch::Dispatcher,
    interp::{DispatchCandidate, Interpretable},
    operators,
    parse::qualified_name,
    types::CelType,
    value::{EnumValue, ErrorValue, Value},
};

/// Everything the planner needs from the environment.
pub struct PlannerContext<'a> {
    pub dispatcher: &'a Dispatcher,
    pub functions: &'a AHashMap<String, FunctionDecl>,
    pub constants: &'a AHashMap<String, ConstantDecl>,
    pub variables: &'a AHashSet<String>,
    pub enum_values_as_int: bool,
}

/// Plans an AST. Never fails: unresolvable pieces become nodes that produce
/// the corresponding runtime error if reached.
#[must_use]
pub fn plan(ast: &Ast, ctx: &PlannerContext<'_>) -> Interpretable {
    let planner = Planner { ast, ctx };
    planner.plan_expr(&ast.expr)
}

struct Planner<'a> {
    ast: &'a Ast,
    ctx: &'a PlannerContext<'a>,
}

impl Planner<'_> {
    fn plan_expr(&self, expr: &Expr) -> Interpretable {
        match &expr.kind {
            ExprKind::Literal(constant) => Interpretable::Const {
                id: expr.id,
                value: constant_value(constant),
            },
            ExprKind::Ident(name) => self.plan_ident(expr.id, name),
            ExprKind::Select {
                operand,
                field,
                test_only,
                optional,
            } => {
                // The checker may have re-resolved the chain as a qualified
                // identifier; honor that interpretation.
                if let Some(Reference::Variable { name, .. }) = self.ast.ref_map.get(&expr.id) {
                    let name = name.clone();
                    return self.plan_ident(expr.id, &name);
                }
                Interpretable::Select {
                    id: expr.id,
                    operand: Box::new(self.plan_expr(operand)),
                    field: field.clone(),
                    test_only: *test_only,
                    optional: *optional,
                }
            }
            ExprKind::Call { function, target, args } => self.plan_call(expr.id, function, target.as_deref(), args),
            ExprKind::List {
                elements,
                optional_indices,
            } => Interpretable::CreateList {
                id: expr.id,
                elements: elements.iter().map(|e| self.plan_expr(e)).collect(),
                optional_indices: optional_indices.clone(),
            },
            ExprKind::Map { entries } => Interpretable::CreateMap {
                id: expr.id,
                entries: entries
                    .iter()
                    .map(|entry| (self.plan_expr(&entry.key), self.plan_expr(&entry.value), entry.optional))
                    .collect(),
            },
            ExprKind::Struct { type_name, fields } => {
                let resolved = match self.ast.ref_map.get(&expr.id) {
                    Some(Reference::Variable { name, .. }) => name.clone(),
                    _ => type_name.clone(),
                };
                Interpretable::CreateStruct {
                    id: expr.id,
                    type_name: resolved,
                    fields: fields
                        .iter()
                        .map(|field| (field.name.clone(), self.plan_expr(&field.value), field.optional))
                        .collect(),
                }
            }
            ExprKind::Comprehension(comp) => Interpretable::Loop {
                id: expr.id,
                iter_range: Box::new(self.plan_expr(&comp.iter_range)),
                iter_var: comp.iter_var.clone(),
                iter_var2: comp.iter_var2.clone(),
                accu_var: comp.accu_var.clone(),
                accu_init: Box::new(self.plan_expr(&comp.accu_init)),
                loop_condition: Box::new(self.plan_expr(&comp.loop_condition)),
                loop_step: Box::new(self.plan_expr(&comp.loop_step)),
                result: Box::new(self.plan_expr(&comp.result)),
            },
        }
    }

    /// Identifiers plan to constants where the checker resolved one (enum
    /// constants, declared constants, type names) and to runtime variable
    /// resolution otherwise.
    fn plan_ident(&self, id: ExprId, name: &str) -> Interpretable {
        let reference = self.ast.ref_map.get(&id);
        let resolved_name = match reference {
            Some(Reference::Variable { name, .. }) => name.as_str(),
            _ => name,
        };

        if let Some(Reference::Variable {
            name: value_name,
            enum_value: Some(value),
        }) = reference
        {
            let constant = if self.ctx.enum_values_as_int {
                Value::Int(*value)
            } else {
                // The reference names the enum constant; its type is the
                // enclosing enum.
                let type_name = value_name.rsplit_once('.').map_or(value_name.as_str(), |(prefix, _)| prefix);
                Value::Enum(Arc::new(EnumValue {
                    type_name: type_name.to_owned(),
                    value: *value,
                }))
            };
            return Interpretable::Const { id, value: constant };
        }

        if let Some(constant) = self.ctx.constants.get(resolved_name) {
            return Interpretable::Const {
                id,
                value: constant.value.clone(),
            };
        }

        if !self.ctx.variables.contains(resolved_name)
            && let Some(CelType::Type(inner)) = self.ast.type_map.get(&id)
        {
            return Interpretable::Const {
                id,
                value: Value::Type((**inner).clone()),
            };
        }

        Interpretable::Var {
            id,
            name: resolved_name.to_owned(),
        }
    }

    fn plan_call(&self, id: ExprId, function: &str, target: Option<&Expr>, args: &[Expr]) -> Interpretable {
        // Short-circuiting forms are interpreter intrinsics.
        match (function, target, args.len()) {
            (operators::CONDITIONAL, None, 3) => {
                return Interpretable::Ternary {
                    id,
                    condition: Box::new(self.plan_expr(&args[0])),
                    then_branch: Box::new(self.plan_expr(&args[1])),
                    else_branch: Box::new(self.plan_expr(&args[2])),
                };
            }
            (operators::LOGICAL_AND, None, 2) => {
                return Interpretable::And {
                    id,
                    left: Box::new(self.plan_expr(&args[0])),
                    right: Box::new(self.plan_expr(&args[1])),
                };
            }
            (operators::LOGICAL_OR, None, 2) => {
                return Interpretable::Or {
                    id,
                    left: Box::new(self.plan_expr(&args[0])),
                    right: Box::new(self.plan_expr(&args[1])),
                };
            }
            (operators::NOT_STRICTLY_FALSE, None, 1) => {
                return Interpretable::NotStrictlyFalse {
                    id,
                    operand: Box::new(self.plan_expr(&args[0])),
                };
            }
            (operators::EQUALS | operators::NOT_EQUALS, None, 2) => {
                return Interpretable::Equal {
                    id,
                    left: Box::new(self.plan_expr(&args[0])),
                    right: Box::new(self.plan_expr(&args[1])),
                    negated: function == operators::NOT_EQUALS,
                };
            }
            _ => {}
        }

        let reference = self.ast.ref_map.get(&id);

        // Checker-resolved type conversions carry the result type in the
        // type map.
        if let Some(Reference::Function { overload_ids, .. }) = reference
            && overload_ids.len() == 1
            && overload_ids[0] == TYPE_CONVERSION_OVERLOAD
        {
            let target_type = self.ast.type_of(id);
            let arg = args.first().map_or(
                Interpretable::ConstError {
                    id,
                    error: ErrorValue::new("missing conversion argument"),
                },
                |a| self.plan_expr(a),
            );
            return Interpretable::Convert {
                id,
                target: target_type,
                arg: Box::new(arg),
            };
        }

        // A member call the checker resolved to a namespaced global
        // (`optional.of(x)` → function `optional.of`) takes no receiver
        // argument; the target was only ever a namespace.
        let target_is_namespace = match reference {
            Some(Reference::Function {
                resolved_name: Some(name),
                ..
            }) => target.is_some() && name != function && name.ends_with(&format!(".{function}")),
            _ => {
                target.is_some_and(|t| {
                    qualified_name(t)
                        .is_some_and(|prefix| self.ctx.functions.contains_key(&format!("{prefix}.{function}")))
                })
            }
        };

        let mut planned_args: Vec<Interpretable> = Vec::with_capacity(args.len() + 1);
        if let Some(target) = target
            && !target_is_namespace
        {
            planned_args.push(self.plan_expr(target));
        }
        planned_args.extend(args.iter().map(|a| self.plan_expr(a)));

        let candidates = match reference {
            Some(Reference::Function {
                overload_ids,
                resolved_name,
            }) => self.checked_candidates(overload_ids, resolved_name.as_deref(), planned_args.len()),
            _ => match self.unchecked_candidates(id, function, target, args.len(), target_is_namespace) {
                Ok(candidates) => candidates,
                Err(node) => return node,
            },
        };

        let dispatch = Interpretable::Dispatch {
            id,
            function: function.to_owned(),
            candidates,
            args: planned_args,
        };
        self.try_fold(dispatch)
    }

    /// Candidate set from the checker's overload ids, with declared argument
    /// types recovered from the function declarations.
    fn checked_candidates(
        &self,
        overload_ids: &[String],
        resolved_name: Option<&str>,
        arity: usize,
    ) -> Vec<DispatchCandidate> {
        let decl = resolved_name.and_then(|name| self.ctx.functions.get(name));
        overload_ids
            .iter()
            .map(|overload_id| {
                let arg_types = decl
                    .and_then(|d| d.find_overload(overload_id))
                    .map_or_else(|| vec![CelType::Dyn; arity], |o| o.arg_types.clone());
                DispatchCandidate {
                    overload_id: overload_id.clone(),
                    arg_types,
                }
            })
            .collect()
    }

    /// Candidate set for unchecked ASTs: every overload of the function with
    /// matching style and arity, tried in declaration order at runtime.
    fn unchecked_candidates(
        &self,
        id: ExprId,
        function: &str,
        target: Option<&Expr>,
        arg_count: usize,
        target_is_namespace: bool,
    ) -> Result<Vec<DispatchCandidate>, Interpretable> {
        // A member call over a qualified name resolving to a namespaced
        // global (`optional.of(x)`) dispatches without the receiver.
        if target_is_namespace
            && let Some(target) = target
            && let Some(prefix) = qualified_name(target)
            && let Some(decl) = self.ctx.functions.get(&format!("{prefix}.{function}"))
        {
            return Ok(decl
                .overloads()
                .filter(|o| !o.is_member && o.arg_types.len() == arg_count)
                .map(|o| DispatchCandidate {
                    overload_id: o.id.clone(),
                    arg_types: o.arg_types.clone(),
                })
                .collect());
        }

        let is_member = target.is_some();
        let total_arity = arg_count + usize::from(is_member);
        let Some(decl) = self.ctx.functions.get(function) else {
            return Err(Interpretable::ConstError {
                id,
                error: ErrorValue::new(format!("undeclared reference to '{function}'")),
            });
        };
        let candidates: Vec<DispatchCandidate> = decl
            .overloads()
            .filter(|o| o.is_member == is_member && o.arg_types.len() == total_arity)
            .map(|o| DispatchCandidate {
                overload_id: o.id.clone(),
                arg_types: o.arg_types.clone(),
            })
            .collect();
        Ok(candidates)
    }

    /// Folds a dispatch whose arguments are all literals and whose single
    /// bound overload is registered pure.
    fn try_fold(&self, node: Interpretable) -> Interpretable {
        let Interpretable::Dispatch {
            id,
            candidates,
            args,
            function,
        } = node
        else {
            return node;
        };
        let foldable = candidates.len() == 1
            && self
                .ctx
                .dispatcher
                .find(&candidates[0].overload_id)
                .is_some_and(|o| o.pure)
            && args.iter().all(|arg| matches!(arg, Interpretable::Const { .. }));
        if !foldable {
            return Interpretable::Dispatch {
                id,
                function,
                candidates,
                args,
            };
        }
        let values: Vec<Value> = args
            .iter()
            .map(|arg| match arg {
                Interpretable::Const { value, .. } => value.clone(),
                _ => unreachable!("foldable dispatch has only const args"),
            })
            .collect();
        match self.ctx.dispatcher.dispatch(&candidates[0].overload_id, &values) {
            Ok(value) => Interpretable::Const { id, value },
            Err(error) => Interpretable::ConstError {
                id,
                error: error.at(id),
            },
        }
    }
}

/// Literal constants pre-converted to runtime values at plan time.
#[must_use]
pub fn constant_value(constant: &Constant) -> Value {
    match constant {
        Constant::Bool(v) => Value::Bool(*v),
        Constant::Int(v) => Value::Int(*v),
        Constant::Uint(v) => Value::Uint(*v),
        Constant::Double(v) => Value::Double(*v),
        Constant::String(v) => Value::string(v),
        Constant::Bytes(v) => Value::bytes(v),
        Constant::Null => Value::Null,
    }
}
