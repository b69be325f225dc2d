//! Expansion of the fixed macro set into core AST forms.
//!
//! Macros are recognized by name, call style, and arity after parsing and
//! rewritten bottom-up: `has` becomes a presence-test select, the quantifiers
//! and projections become comprehensions over the reserved `__result__`
//! accumulator, and the optional-chaining macros become a conditional over a
//! binding comprehension. A call that matches a macro name but not its shape
//! is a parse error; a call with a different arity falls through as an
//! ordinary function call.

use crate::{
    ast::{Comprehension, Constant, Expr, ExprId, ExprIdGenerator, ExprKind, SourceInfo},
    errors::{Issue, Issues},
    operators,
    parse::ACCUMULATOR_VAR,
};

/// Iteration variable name used by binding comprehensions that never iterate.
const UNUSED_ITER_VAR: &str = "#unused";

/// Expands every macro call in `expr`, recording pre-expansion forms in
/// `source_info.macro_calls` and reporting malformed macro arguments.
pub fn expand(expr: Expr, ids: &mut ExprIdGenerator, source_info: &mut SourceInfo, issues: &mut Issues) -> Expr {
    let mut expander = Expander {
        ids,
        source_info,
        issues,
    };
    expander.rewrite(expr)
}

struct Expander<'a> {
    ids: &'a mut ExprIdGenerator,
    source_info: &'a mut SourceInfo,
    issues: &'a mut Issues,
}

impl Expander<'_> {
    fn rewrite(&mut self, expr: Expr) -> Expr {
        let Expr { id, kind } = expr;
        let kind = match kind {
            ExprKind::Literal(_) | ExprKind::Ident(_) => kind,
            ExprKind::Select {
                operand,
                field,
                test_only,
                optional,
            } => ExprKind::Select {
                operand: Box::new(self.rewrite(*operand)),
                field,
                test_only,
                optional,
            },
            ExprKind::Call { function, target, args } => {
                let target = target.map(|t| Box::new(self.rewrite(*t)));
                let args: Vec<Expr> = args.into_iter().map(|arg| self.rewrite(arg)).collect();
                let call = Expr::new(id, ExprKind::Call { function, target, args });
                return self.try_expand_macro(call);
            }
            ExprKind::List {
                elements,
                optional_indices,
            } => ExprKind::List {
                elements: elements.into_iter().map(|e| self.rewrite(e)).collect(),
                optional_indices,
            },
            ExprKind::Map { entries } => ExprKind::Map {
                entries: entries
                    .into_iter()
                    .map(|mut entry| {
                        entry.key = self.rewrite(entry.key);
                        entry.value = self.rewrite(entry.value);
                        entry
                    })
                    .collect(),
            },
            ExprKind::Struct { type_name, fields } => ExprKind::Struct {
                type_name,
                fields: fields
                    .into_iter()
                    .map(|mut field| {
                        field.value = self.rewrite(field.value);
                        field
                    })
                    .collect(),
            },
            ExprKind::Comprehension(comp) => {
                let comp = *comp;
                ExprKind::Comprehension(Box::new(Comprehension {
                    iter_range: self.rewrite(comp.iter_range),
                    iter_var: comp.iter_var,
                    iter_var2: comp.iter_var2,
                    accu_var: comp.accu_var,
                    accu_init: self.rewrite(comp.accu_init),
                    loop_condition: self.rewrite(comp.loop_condition),
                    loop_step: self.rewrite(comp.loop_step),
                    result: self.rewrite(comp.result),
                }))
            }
        };
        Expr::new(id, kind)
    }

    /// Dispatches on macro name/style/arity; non-macros pass through.
    fn try_expand_macro(&mut self, call: Expr) -> Expr {
        let (name, is_member, arity) = match &call.kind {
            ExprKind::Call { function, target, args } => (function.clone(), target.is_some(), args.len()),
            _ => return call,
        };
        let expanded = match (name.as_str(), is_member, arity) {
            ("has", false, 1) => self.expand_has(&call),
            ("all", true, 2) => self.expand_quantifier(&call, Quantifier::All, false),
            ("all", true, 3) => self.expand_quantifier(&call, Quantifier::All, true),
            ("exists", true, 2) => self.expand_quantifier(&call, Quantifier::Exists, false),
            ("exists", true, 3) => self.expand_quantifier(&call, Quantifier::Exists, true),
            ("exists_one", true, 2) => self.expand_exists_one(&call),
            ("map", true, 2 | 3) => self.expand_map(&call),
            ("filter", true, 2) => self.expand_filter(&call),
            ("optMap", true, 2) => self.expand_opt_map(&call, true),
            ("optFlatMap", true, 2) => self.expand_opt_map(&call, false),
            _ => return call,
        };
        match expanded {
            Some(expr) => {
                self.source_info.record_macro_call(expr.id, call.clone());
                expr
            }
            None => call,
        }
    }

    fn error(&mut self, id: ExprId, message: impl Into<String>) {
        let location = self
            .source_info
            .location(id)
            .unwrap_or(crate::ast::SourceLocation { line: 1, column: 1 });
        self.issues.push(Issue::new(message, location));
    }

    fn span_of(&self, id: ExprId) -> (u32, u32) {
        self.source_info.position(id).unwrap_or((0, 0))
    }

    fn new_expr(&mut self, kind: ExprKind, span: (u32, u32)) -> Expr {
        let id = self.ids.next_id();
        self.source_info.set_position(id, span.0, span.1);
        Expr::new(id, kind)
    }

    fn ident(&mut self, name: &str, span: (u32, u32)) -> Expr {
        self.new_expr(ExprKind::Ident(name.to_owned()), span)
    }

    fn literal(&mut self, constant: Constant, span: (u32, u32)) -> Expr {
        self.new_expr(ExprKind::Literal(constant), span)
    }

    fn global_call(&mut self, function: &str, args: Vec<Expr>, span: (u32, u32)) -> Expr {
        self.new_expr(
            ExprKind::Call {
                function: function.to_owned(),
                target: None,
                args,
            },
            span,
        )
    }

    fn member_call(&mut self, function: &str, target: Expr, args: Vec<Expr>, span: (u32, u32)) -> Expr {
        self.new_expr(
            ExprKind::Call {
                function: function.to_owned(),
                target: Some(Box::new(target)),
                args,
            },
            span,
        )
    }

    /// Deep copy with fresh ids; positions carry over per node.
    fn copy(&mut self, expr: &Expr) -> Expr {
        let span = self.span_of(expr.id);
        let kind = match &expr.kind {
            ExprKind::Literal(c) => ExprKind::Literal(c.clone()),
            ExprKind::Ident(name) => ExprKind::Ident(name.clone()),
            ExprKind::Select {
                operand,
                field,
                test_only,
                optional,
            } => ExprKind::Select {
                operand: Box::new(self.copy(operand)),
                field: field.clone(),
                test_only: *test_only,
                optional: *optional,
            },
            ExprKind::Call { function, target, args } => ExprKind::Call {
                function: function.clone(),
                target: target.as_ref().map(|t| Box::new(self.copy(t))),
                args: args.iter().map(|a| self.copy(a)).collect(),
            },
            ExprKind::List {
                elements,
                optional_indices,
            } => ExprKind::List {
                elements: elements.iter().map(|e| self.copy(e)).collect(),
                optional_indices: optional_indices.clone(),
            },
            ExprKind::Map { entries } => ExprKind::Map {
                entries: entries
                    .iter()
                    .map(|entry| crate::ast::MapEntry {
                        id: self.ids.next_id(),
                        key: self.copy(&entry.key),
                        value: self.copy(&entry.value),
                        optional: entry.optional,
                    })
                    .collect(),
            },
            ExprKind::Struct { type_name, fields } => ExprKind::Struct {
                type_name: type_name.clone(),
                fields: fields
                    .iter()
                    .map(|field| crate::ast::StructField {
                        id: self.ids.next_id(),
                        name: field.name.clone(),
                        value: self.copy(&field.value),
                        optional: field.optional,
                    })
                    .collect(),
            },
            ExprKind::Comprehension(comp) => ExprKind::Comprehension(Box::new(Comprehension {
                iter_range: self.copy(&comp.iter_range),
                iter_var: comp.iter_var.clone(),
                iter_var2: comp.iter_var2.clone(),
                accu_var: comp.accu_var.clone(),
                accu_init: self.copy(&comp.accu_init),
                loop_condition: self.copy(&comp.loop_condition),
                loop_step: self.copy(&comp.loop_step),
                result: self.copy(&comp.result),
            })),
        };
        self.new_expr(kind, span)
    }

    /// `has(x.f)`; the argument must be a plain field select.
    fn expand_has(&mut self, call: &Expr) -> Option<Expr> {
        let ExprKind::Call { args, .. } = &call.kind else {
            return None;
        };
        let span = self.span_of(call.id);
        match &args[0].kind {
            ExprKind::Select {
                operand,
                field,
                test_only: false,
                optional: false,
            } => {
                let operand = self.copy(operand);
                Some(self.new_expr(
                    ExprKind::Select {
                        operand: Box::new(operand),
                        field: field.clone(),
                        test_only: true,
                        optional: false,
                    },
                    span,
                ))
            }
            _ => {
                self.error(call.id, "invalid argument to has() macro");
                None
            }
        }
    }

    /// Validates an iteration-variable argument and returns its name.
    fn iter_var_name(&mut self, call_id: ExprId, arg: &Expr) -> Option<String> {
        let ExprKind::Ident(name) = &arg.kind else {
            self.error(call_id, "argument must be a simple identifier");
            return None;
        };
        if name == ACCUMULATOR_VAR {
            self.error(call_id, format!("iteration variable overwrites accumulator variable '{ACCUMULATOR_VAR}'"));
            return None;
        }
        Some(name.clone())
    }

    fn expand_quantifier(&mut self, call: &Expr, quantifier: Quantifier, two_var: bool) -> Option<Expr> {
        let (target, args) = comprehension_parts(call)?;
        let target = self.copy(target);
        let span = self.span_of(call.id);

        let iter_var = self.iter_var_name(call.id, &args[0])?;
        let (iter_var2, predicate) = if two_var {
            let second = self.iter_var_name(call.id, &args[1])?;
            if second == iter_var {
                self.error(call.id, "duplicate iteration variable");
                return None;
            }
            (Some(second), &args[2])
        } else {
            (None, &args[1])
        };
        let predicate = self.copy(predicate);

        let accu_init = self.literal(Constant::Bool(matches!(quantifier, Quantifier::All)), span);
        let accu_ref = self.ident(ACCUMULATOR_VAR, span);
        let loop_condition = match quantifier {
            // all: keep going while the accumulator is not strictly false.
            Quantifier::All => self.global_call(operators::NOT_STRICTLY_FALSE, vec![accu_ref], span),
            // exists: keep going while the accumulator is not strictly true.
            Quantifier::Exists => {
                let negated = self.global_call(operators::LOGICAL_NOT, vec![accu_ref], span);
                self.global_call(operators::NOT_STRICTLY_FALSE, vec![negated], span)
            }
        };
        let accu_ref = self.ident(ACCUMULATOR_VAR, span);
        let step_op = match quantifier {
            Quantifier::All => operators::LOGICAL_AND,
            Quantifier::Exists => operators::LOGICAL_OR,
        };
        let loop_step = self.global_call(step_op, vec![accu_ref, predicate], span);
        let result = self.ident(ACCUMULATOR_VAR, span);

        Some(self.new_expr(
            ExprKind::Comprehension(Box::new(Comprehension {
                iter_range: target,
                iter_var,
                iter_var2,
                accu_var: ACCUMULATOR_VAR.to_owned(),
                accu_init,
                loop_condition,
                loop_step,
                result,
            })),
            span,
        ))
    }

    fn expand_exists_one(&mut self, call: &Expr) -> Option<Expr> {
        let (target, args) = comprehension_parts(call)?;
        let target = self.copy(target);
        let span = self.span_of(call.id);

        let iter_var = self.iter_var_name(call.id, &args[0])?;
        let predicate = self.copy(&args[1]);

        let accu_init = self.literal(Constant::Int(0), span);
        let loop_condition = self.literal(Constant::Bool(true), span);
        let accu_ref = self.ident(ACCUMULATOR_VAR, span);
        let one = self.literal(Constant::Int(1), span);
        let incremented = self.global_call(operators::ADD, vec![accu_ref, one], span);
        let accu_ref = self.ident(ACCUMULATOR_VAR, span);
        let loop_step = self.global_call(operators::CONDITIONAL, vec![predicate, incremented, accu_ref], span);
        let accu_ref = self.ident(ACCUMULATOR_VAR, span);
        let one = self.literal(Constant::Int(1), span);
        let result = self.global_call(operators::EQUALS, vec![accu_ref, one], span);

        Some(self.new_expr(
            ExprKind::Comprehension(Box::new(Comprehension {
                iter_range: target,
                iter_var,
                iter_var2: None,
                accu_var: ACCUMULATOR_VAR.to_owned(),
                accu_init,
                loop_condition,
                loop_step,
                result,
            })),
            span,
        ))
    }

    /// `r.map(v, t)` and the filtered `r.map(v, f, t)`.
    fn expand_map(&mut self, call: &Expr) -> Option<Expr> {
        let (target, args) = comprehension_parts(call)?;
        let target = self.copy(target);
        let span = self.span_of(call.id);

        let iter_var = self.iter_var_name(call.id, &args[0])?;
        let (filter, transform) = if args.len() == 3 {
            (Some(self.copy(&args[1])), self.copy(&args[2]))
        } else {
            (None, self.copy(&args[1]))
        };

        let accu_init = self.new_expr(
            ExprKind::List {
                elements: Vec::new(),
                optional_indices: Vec::new(),
            },
            span,
        );
        let loop_condition = self.literal(Constant::Bool(true), span);
        let accu_ref = self.ident(ACCUMULATOR_VAR, span);
        let singleton = self.new_expr(
            ExprKind::List {
                elements: vec![transform],
                optional_indices: Vec::new(),
            },
            span,
        );
        let appended = self.global_call(operators::ADD, vec![accu_ref, singleton], span);
        let loop_step = match filter {
            Some(filter) => {
                let accu_ref = self.ident(ACCUMULATOR_VAR, span);
                self.global_call(operators::CONDITIONAL, vec![filter, appended, accu_ref], span)
            }
            None => appended,
        };
        let result = self.ident(ACCUMULATOR_VAR, span);

        Some(self.new_expr(
            ExprKind::Comprehension(Box::new(Comprehension {
                iter_range: target,
                iter_var,
                iter_var2: None,
                accu_var: ACCUMULATOR_VAR.to_owned(),
                accu_init,
                loop_condition,
                loop_step,
                result,
            })),
            span,
        ))
    }

    fn expand_filter(&mut self, call: &Expr) -> Option<Expr> {
        let (target, args) = comprehension_parts(call)?;
        let target = self.copy(target);
        let span = self.span_of(call.id);

        let iter_var = self.iter_var_name(call.id, &args[0])?;
        let predicate = self.copy(&args[1]);

        let accu_init = self.new_expr(
            ExprKind::List {
                elements: Vec::new(),
                optional_indices: Vec::new(),
            },
            span,
        );
        let loop_condition = self.literal(Constant::Bool(true), span);
        let accu_ref = self.ident(ACCUMULATOR_VAR, span);
        let element = self.ident(&iter_var, span);
        let singleton = self.new_expr(
            ExprKind::List {
                elements: vec![element],
                optional_indices: Vec::new(),
            },
            span,
        );
        let appended = self.global_call(operators::ADD, vec![accu_ref, singleton], span);
        let accu_ref = self.ident(ACCUMULATOR_VAR, span);
        let loop_step = self.global_call(operators::CONDITIONAL, vec![predicate, appended, accu_ref], span);
        let result = self.ident(ACCUMULATOR_VAR, span);

        Some(self.new_expr(
            ExprKind::Comprehension(Box::new(Comprehension {
                iter_range: target,
                iter_var,
                iter_var2: None,
                accu_var: ACCUMULATOR_VAR.to_owned(),
                accu_init,
                loop_condition,
                loop_step,
                result,
            })),
            span,
        ))
    }

    /// `x.optMap(v, t)` → `x.hasValue() ? optional.of(bind v = x.value() in t) : optional.none()`.
    ///
    /// The binding uses a comprehension over an empty range whose accumulator
    /// is the bound variable; `optFlatMap` skips the `optional.of` wrapper.
    fn expand_opt_map(&mut self, call: &Expr, wrap: bool) -> Option<Expr> {
        let (target, args) = comprehension_parts(call)?;
        let span = self.span_of(call.id);

        let var_name = self.iter_var_name(call.id, &args[0])?;
        let body = self.copy(&args[1]);

        let has_target = self.copy(target);
        let has_value = self.member_call("hasValue", has_target, Vec::new(), span);

        let value_target = self.copy(target);
        let bound_value = self.member_call("value", value_target, Vec::new(), span);
        let empty_range = self.new_expr(
            ExprKind::List {
                elements: Vec::new(),
                optional_indices: Vec::new(),
            },
            span,
        );
        let loop_condition = self.literal(Constant::Bool(false), span);
        let loop_step = self.ident(&var_name, span);
        let binding = self.new_expr(
            ExprKind::Comprehension(Box::new(Comprehension {
                iter_range: empty_range,
                iter_var: UNUSED_ITER_VAR.to_owned(),
                iter_var2: None,
                accu_var: var_name,
                accu_init: bound_value,
                loop_condition,
                loop_step,
                result: body,
            })),
            span,
        );

        let then_branch = if wrap {
            let of_target = self.ident("optional", span);
            self.member_call("of", of_target, vec![binding], span)
        } else {
            binding
        };
        let none_target = self.ident("optional", span);
        let else_branch = self.member_call("none", none_target, Vec::new(), span);

        Some(self.global_call(operators::CONDITIONAL, vec![has_value, then_branch, else_branch], span))
    }
}

/// Pulls apart a member macro call into its target and argument slices.
fn comprehension_parts(call: &Expr) -> Option<(&Expr, &[Expr])> {
    let ExprKind::Call { target, args, .. } = &call.kind else {
        return None;
    };
    Some((target.as_deref()?, args))
}

#[derive(Clone, Copy)]
enum Quantifier {
    All,
    Exists,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parse::parse;

    fn expand_source(source: &str) -> crate::ast::Ast {
        parse(source, "<test>").unwrap_or_else(|err| panic!("parse failed for {source:?}: {err}"))
    }

    #[test]
    fn has_becomes_presence_test() {
        let ast = expand_source("has(msg.field)");
        let ExprKind::Select { test_only, field, .. } = &ast.expr.kind else {
            panic!("expected select, got {:?}", ast.expr.kind);
        };
        assert!(*test_only);
        assert_eq!(field, "field");
        assert_eq!(ast.source_info.macro_call_count(), 1);
    }

    #[test]
    fn has_on_non_select_is_rejected() {
        let err = parse("has(foo + 1)", "<test>").expect_err("expected macro error");
        assert!(err.issues.iter().any(|i| i.message.contains("has() macro")));
    }

    #[test]
    fn all_expands_to_comprehension() {
        let ast = expand_source("xs.all(x, x > 0)");
        let ExprKind::Comprehension(comp) = &ast.expr.kind else {
            panic!("expected comprehension, got {:?}", ast.expr.kind);
        };
        assert_eq!(comp.iter_var, "x");
        assert_eq!(comp.accu_var, ACCUMULATOR_VAR);
        assert!(matches!(&comp.accu_init.kind, ExprKind::Literal(Constant::Bool(true))));
        assert!(matches!(
            &comp.loop_condition.kind,
            ExprKind::Call { function, .. } if function == operators::NOT_STRICTLY_FALSE
        ));
    }

    #[test]
    fn two_variable_quantifier_keeps_both_names() {
        let ast = expand_source("m.all(k, v, v > k)");
        let ExprKind::Comprehension(comp) = &ast.expr.kind else {
            panic!("expected comprehension");
        };
        assert_eq!(comp.iter_var, "k");
        assert_eq!(comp.iter_var2.as_deref(), Some("v"));
    }

    #[test]
    fn iteration_variable_must_be_identifier() {
        let err = parse("xs.exists(x.y, true)", "<test>").expect_err("expected macro error");
        assert!(err.issues.iter().any(|i| i.message.contains("simple identifier")));
    }

    #[test]
    fn accumulator_shadowing_is_rejected() {
        let err = parse("xs.map(__result__, __result__)", "<test>").expect_err("expected macro error");
        assert!(err.issues.iter().any(|i| i.message.contains("accumulator")));
    }

    #[test]
    fn wrong_arity_falls_through_to_plain_call() {
        let ast = expand_source("xs.all(true)");
        assert!(matches!(
            &ast.expr.kind,
            ExprKind::Call { function, .. } if function == "all"
        ));
        assert_eq!(ast.source_info.macro_call_count(), 0);
    }

    #[test]
    fn opt_map_expands_to_guarded_binding() {
        let ast = expand_source("x.optMap(v, v + 1)");
        let ExprKind::Call { function, args, .. } = &ast.expr.kind else {
            panic!("expected conditional");
        };
        assert_eq!(function, operators::CONDITIONAL);
        assert!(matches!(
            &args[0].kind,
            ExprKind::Call { function, .. } if function == "hasValue"
        ));
    }

    #[test]
    fn nested_macros_expand_inside_out() {
        let ast = expand_source("[1].map(i, [2].filter(j, j > i))");
        let ExprKind::Comprehension(outer) = &ast.expr.kind else {
            panic!("expected outer comprehension");
        };
        // The inner filter appears inside the outer loop step's transform list.
        let ExprKind::Call { args, .. } = &outer.loop_step.kind else {
            panic!("expected append step");
        };
        let ExprKind::List { elements, .. } = &args[1].kind else {
            panic!("expected singleton list");
        };
        assert!(matches!(&elements[0].kind, ExprKind::Comprehension(_)));
    }
}
