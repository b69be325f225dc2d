//! Recursive-descent parser from the token stream to the id-tagged AST.
//!
//! Operators are lowered into calls on the mangled operator names from
//! [`crate::operators`] so everything downstream sees one uniform call shape.
//! Syntax errors accumulate into [`Issues`]; the parser keeps going where it
//! can so a single compile reports as much as possible.

use crate::{
    ast::{Ast, Constant, Expr, ExprIdGenerator, ExprKind, MapEntry, SourceInfo, StructField},
    errors::{Issue, Issues, ParseError},
    lexer::{self, SpannedToken, Token},
    macros,
    operators,
};

/// Maximum nesting depth for recursive structures during parsing.
/// Exceeding it aborts the parse rather than risking a stack overflow from
/// input like `((((…))))`.
pub const MAX_NESTING_DEPTH: u16 = 250;

/// Reserved name of the comprehension accumulator; user expressions may not
/// bind it as an iteration variable.
pub const ACCUMULATOR_VAR: &str = "__result__";

/// Parses `source` into an AST, expanding macros.
///
/// `description` names the source in diagnostics (a file name or `<input>`).
pub fn parse(source: &str, description: &str) -> Result<Ast, ParseError> {
    parse_with_config(source, description, true)
}

/// Parse with macro expansion switched off (macro forms stay plain calls).
pub fn parse_with_config(source: &str, description: &str, expand_macros: bool) -> Result<Ast, ParseError> {
    let mut source_info = SourceInfo::new(description, source);
    let mut issues = Issues::new();

    let (tokens, lex_errors) = lexer::tokenize(source);
    for err in lex_errors {
        issues.push(Issue::new(err.message, source_info.location_of_offset(err.offset)));
    }

    let mut ids = ExprIdGenerator::new();
    let mut parser = Parser {
        tokens: &tokens,
        pos: 0,
        ids: &mut ids,
        source_info: &mut source_info,
        issues: &mut issues,
        depth_remaining: MAX_NESTING_DEPTH,
        aborted: false,
    };
    let expr = parser.parse_root();

    let expr = if issues.is_empty() && expand_macros {
        macros::expand(expr, &mut ids, &mut source_info, &mut issues)
    } else {
        expr
    };

    if issues.is_empty() {
        Ok(Ast::new(expr, source_info))
    } else {
        issues.sort();
        Err(ParseError::new(issues))
    }
}

struct Parser<'a> {
    tokens: &'a [SpannedToken],
    pos: usize,
    ids: &'a mut ExprIdGenerator,
    source_info: &'a mut SourceInfo,
    issues: &'a mut Issues,
    /// Remaining nesting budget; hitting zero aborts the parse.
    depth_remaining: u16,
    aborted: bool,
}

impl Parser<'_> {
    fn parse_root(&mut self) -> Expr {
        let expr = self.parse_expr();
        if !self.aborted
            && let Some(stray) = self.peek().cloned()
        {
            self.error_at(stray.start, format!("unexpected token '{}'", stray.token));
        }
        expr
    }

    // ---- token plumbing ----

    fn peek(&self) -> Option<&SpannedToken> {
        self.tokens.get(self.pos)
    }

    fn peek_token(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|t| &t.token)
    }

    fn advance(&mut self) -> Option<SpannedToken> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn matches(&mut self, expected: &Token) -> bool {
        if self.peek_token() == Some(expected) {
            self.pos += 1;
            return true;
        }
        false
    }

    /// Consumes `expected` or records a syntax error at the current token.
    fn expect(&mut self, expected: &Token) -> bool {
        if self.matches(expected) {
            return true;
        }
        let (offset, found) = self.describe_current();
        self.error_at(offset, format!("expected '{expected}', found {found}"));
        false
    }

    fn current_offset(&self) -> u32 {
        self.peek().map_or_else(
            || self.tokens.last().map_or(0, |t| t.end),
            |t| t.start,
        )
    }

    fn describe_current(&self) -> (u32, String) {
        match self.peek() {
            Some(spanned) => (spanned.start, format!("'{}'", spanned.token)),
            None => (self.tokens.last().map_or(0, |t| t.end), "end of input".to_owned()),
        }
    }

    fn error_at(&mut self, offset: u32, message: impl Into<String>) {
        let location = self.source_info.location_of_offset(offset);
        self.issues.push(Issue::new(message, location));
    }

    fn new_expr(&mut self, kind: ExprKind, start: u32, end: u32) -> Expr {
        let id = self.ids.next_id();
        self.source_info.set_position(id, start, end);
        Expr::new(id, kind)
    }

    /// Placeholder node emitted after a syntax error so parsing can continue.
    fn error_expr(&mut self, offset: u32) -> Expr {
        self.new_expr(ExprKind::Literal(Constant::Null), offset, offset)
    }

    fn end_offset(&self) -> u32 {
        if self.pos == 0 {
            0
        } else {
            self.tokens[self.pos - 1].end
        }
    }

    // ---- grammar ----

    fn parse_expr(&mut self) -> Expr {
        if self.aborted {
            return self.error_expr(self.current_offset());
        }
        if self.depth_remaining == 0 {
            let offset = self.current_offset();
            self.error_at(offset, "expression nesting is too deep");
            self.aborted = true;
            self.pos = self.tokens.len();
            return self.error_expr(offset);
        }
        self.depth_remaining -= 1;
        let expr = self.parse_ternary();
        self.depth_remaining += 1;
        expr
    }

    /// `a ? b : c`: the condition binds tighter, the else-arm is a full
    /// expression so ternaries nest to the right.
    fn parse_ternary(&mut self) -> Expr {
        let start = self.current_offset();
        let condition = self.parse_or();
        if !self.matches(&Token::Question) {
            return condition;
        }
        let then_branch = self.parse_or();
        self.expect(&Token::Colon);
        let else_branch = self.parse_expr();
        let end = self.end_offset();
        self.new_expr(
            ExprKind::Call {
                function: operators::CONDITIONAL.to_owned(),
                target: None,
                args: vec![condition, then_branch, else_branch],
            },
            start,
            end,
        )
    }

    fn parse_or(&mut self) -> Expr {
        let start = self.current_offset();
        let mut left = self.parse_and();
        while self.matches(&Token::LogicalOr) {
            let right = self.parse_and();
            let end = self.end_offset();
            left = self.new_expr(
                ExprKind::Call {
                    function: operators::LOGICAL_OR.to_owned(),
                    target: None,
                    args: vec![left, right],
                },
                start,
                end,
            );
        }
        left
    }

    fn parse_and(&mut self) -> Expr {
        let start = self.current_offset();
        let mut left = self.parse_relation();
        while self.matches(&Token::LogicalAnd) {
            let right = self.parse_relation();
            let end = self.end_offset();
            left = self.new_expr(
                ExprKind::Call {
                    function: operators::LOGICAL_AND.to_owned(),
                    target: None,
                    args: vec![left, right],
                },
                start,
                end,
            );
        }
        left
    }

    fn parse_relation(&mut self) -> Expr {
        let start = self.current_offset();
        let mut left = self.parse_addition();
        loop {
            let function = match self.peek_token() {
                Some(Token::Equals) => operators::EQUALS,
                Some(Token::NotEquals) => operators::NOT_EQUALS,
                Some(Token::Less) => operators::LESS,
                Some(Token::LessEquals) => operators::LESS_EQUALS,
                Some(Token::Greater) => operators::GREATER,
                Some(Token::GreaterEquals) => operators::GREATER_EQUALS,
                Some(Token::In) => operators::IN,
                _ => return left,
            };
            self.pos += 1;
            let right = self.parse_addition();
            let end = self.end_offset();
            left = self.new_expr(
                ExprKind::Call {
                    function: function.to_owned(),
                    target: None,
                    args: vec![left, right],
                },
                start,
                end,
            );
        }
    }

    fn parse_addition(&mut self) -> Expr {
        let start = self.current_offset();
        let mut left = self.parse_multiplication();
        loop {
            let function = match self.peek_token() {
                Some(Token::Plus) => operators::ADD,
                Some(Token::Minus) => operators::SUBTRACT,
                _ => return left,
            };
            self.pos += 1;
            let right = self.parse_multiplication();
            let end = self.end_offset();
            left = self.new_expr(
                ExprKind::Call {
                    function: function.to_owned(),
                    target: None,
                    args: vec![left, right],
                },
                start,
                end,
            );
        }
    }

    fn parse_multiplication(&mut self) -> Expr {
        let start = self.current_offset();
        let mut left = self.parse_unary();
        loop {
            let function = match self.peek_token() {
                Some(Token::Star) => operators::MULTIPLY,
                Some(Token::Slash) => operators::DIVIDE,
                Some(Token::Percent) => operators::MODULO,
                _ => return left,
            };
            self.pos += 1;
            let right = self.parse_unary();
            let end = self.end_offset();
            left = self.new_expr(
                ExprKind::Call {
                    function: function.to_owned(),
                    target: None,
                    args: vec![left, right],
                },
                start,
                end,
            );
        }
    }

    fn parse_unary(&mut self) -> Expr {
        let start = self.current_offset();
        match self.peek_token() {
            Some(Token::Bang) => {
                self.pos += 1;
                let operand = self.parse_unary();
                let end = self.end_offset();
                self.new_expr(
                    ExprKind::Call {
                        function: operators::LOGICAL_NOT.to_owned(),
                        target: None,
                        args: vec![operand],
                    },
                    start,
                    end,
                )
            }
            Some(Token::Minus) => {
                self.pos += 1;
                let operand = self.parse_unary();
                let end = self.end_offset();
                self.negate(operand, start, end)
            }
            _ => self.parse_member(),
        }
    }

    /// Negation folds into numeric literals so `-9223372036854775808` is a
    /// single int literal rather than overflow at evaluation.
    fn negate(&mut self, operand: Expr, start: u32, end: u32) -> Expr {
        match operand.kind {
            // Folding skips i64::MIN, whose negation overflows at runtime.
            ExprKind::Literal(Constant::Int(value)) if value != i64::MIN => {
                let kind = ExprKind::Literal(Constant::Int(-value));
                self.source_info.set_position(operand.id, start, end);
                Expr::new(operand.id, kind)
            }
            // The lexer classifies 2^63 as uint; unary minus brings it back
            // into int range as i64::MIN.
            ExprKind::Literal(Constant::Uint(value)) if value == i64::MAX as u64 + 1 => {
                let kind = ExprKind::Literal(Constant::Int(i64::MIN));
                self.source_info.set_position(operand.id, start, end);
                Expr::new(operand.id, kind)
            }
            ExprKind::Literal(Constant::Double(value)) => {
                let kind = ExprKind::Literal(Constant::Double(-value));
                self.source_info.set_position(operand.id, start, end);
                Expr::new(operand.id, kind)
            }
            _ => self.new_expr(
                ExprKind::Call {
                    function: operators::NEGATE.to_owned(),
                    target: None,
                    args: vec![operand],
                },
                start,
                end,
            ),
        }
    }

    fn parse_member(&mut self) -> Expr {
        let start = self.current_offset();
        let mut expr = self.parse_primary();
        loop {
            match self.peek_token() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let Some(field) = self.expect_ident() else {
                        return expr;
                    };
                    if self.matches(&Token::LParen) {
                        let args = self.parse_call_args();
                        let end = self.end_offset();
                        expr = self.new_expr(
                            ExprKind::Call {
                                function: field,
                                target: Some(Box::new(expr)),
                                args,
                            },
                            start,
                            end,
                        );
                    } else {
                        let end = self.end_offset();
                        expr = self.new_expr(
                            ExprKind::Select {
                                operand: Box::new(expr),
                                field,
                                test_only: false,
                                optional: false,
                            },
                            start,
                            end,
                        );
                    }
                }
                Some(Token::DotQuestion) => {
                    self.pos += 1;
                    let Some(field) = self.expect_ident() else {
                        return expr;
                    };
                    let end = self.end_offset();
                    expr = self.new_expr(
                        ExprKind::Select {
                            operand: Box::new(expr),
                            field,
                            test_only: false,
                            optional: true,
                        },
                        start,
                        end,
                    );
                }
                Some(Token::LBracket | Token::LBracketQuestion) => {
                    let optional = self.peek_token() == Some(&Token::LBracketQuestion);
                    self.pos += 1;
                    let index = self.parse_expr();
                    self.expect(&Token::RBracket);
                    let end = self.end_offset();
                    let function = if optional { operators::OPT_INDEX } else { operators::INDEX };
                    expr = self.new_expr(
                        ExprKind::Call {
                            function: function.to_owned(),
                            target: None,
                            args: vec![expr, index],
                        },
                        start,
                        end,
                    );
                }
                Some(Token::LBrace) => {
                    // `a.b.C{...}`: only a pure select chain over identifiers
                    // names a struct type.
                    let Some(type_name) = qualified_name(&expr) else {
                        return expr;
                    };
                    self.pos += 1;
                    expr = self.parse_struct_literal(type_name, start);
                }
                _ => return expr,
            }
        }
    }

    fn expect_ident(&mut self) -> Option<String> {
        match self.peek_token() {
            Some(Token::Ident(name)) => {
                let name = name.clone();
                self.pos += 1;
                Some(name)
            }
            _ => {
                let (offset, found) = self.describe_current();
                self.error_at(offset, format!("expected identifier, found {found}"));
                None
            }
        }
    }

    fn parse_primary(&mut self) -> Expr {
        let start = self.current_offset();
        let Some(spanned) = self.advance() else {
            let (offset, found) = self.describe_current();
            self.error_at(offset, format!("expected expression, found {found}"));
            return self.error_expr(offset);
        };
        let end = spanned.end;
        match spanned.token {
            Token::IntLit(value) => self.new_expr(ExprKind::Literal(Constant::Int(value)), start, end),
            Token::UintLit(value) => self.new_expr(ExprKind::Literal(Constant::Uint(value)), start, end),
            Token::DoubleLit(value) => self.new_expr(ExprKind::Literal(Constant::Double(value)), start, end),
            Token::StringLit(value) => self.new_expr(ExprKind::Literal(Constant::String(value)), start, end),
            Token::BytesLit(value) => self.new_expr(ExprKind::Literal(Constant::Bytes(value)), start, end),
            Token::BoolLit(value) => self.new_expr(ExprKind::Literal(Constant::Bool(value)), start, end),
            Token::NullLit => self.new_expr(ExprKind::Literal(Constant::Null), start, end),
            Token::LParen => {
                let inner = self.parse_expr();
                self.expect(&Token::RParen);
                inner
            }
            Token::LBracket => self.parse_list_literal(start),
            Token::LBrace => self.parse_map_literal(start),
            Token::Dot => {
                // Leading dot: absolute (container-independent) name.
                let Some(name) = self.expect_ident() else {
                    return self.error_expr(start);
                };
                self.finish_ident(format!(".{name}"), start)
            }
            Token::Ident(name) => self.finish_ident(name, start),
            other => {
                self.error_at(start, format!("unexpected token '{other}'"));
                self.error_expr(start)
            }
        }
    }

    /// An identifier, global call, or struct literal head.
    fn finish_ident(&mut self, name: String, start: u32) -> Expr {
        if self.matches(&Token::LParen) {
            let args = self.parse_call_args();
            let end = self.end_offset();
            return self.new_expr(
                ExprKind::Call {
                    function: name,
                    target: None,
                    args,
                },
                start,
                end,
            );
        }
        if self.peek_token() == Some(&Token::LBrace) {
            self.pos += 1;
            return self.parse_struct_literal(name, start);
        }
        let end = self.end_offset();
        self.new_expr(ExprKind::Ident(name), start, end)
    }

    fn parse_call_args(&mut self) -> Vec<Expr> {
        let mut args = Vec::new();
        if self.matches(&Token::RParen) {
            return args;
        }
        loop {
            args.push(self.parse_expr());
            if !self.matches(&Token::Comma) {
                break;
            }
        }
        self.expect(&Token::RParen);
        args
    }

    fn parse_list_literal(&mut self, start: u32) -> Expr {
        let mut elements = Vec::new();
        let mut optional_indices = Vec::new();
        if !self.matches(&Token::RBracket) {
            loop {
                if self.matches(&Token::Question) {
                    optional_indices.push(u32::try_from(elements.len()).unwrap_or(u32::MAX));
                }
                elements.push(self.parse_expr());
                if !self.matches(&Token::Comma) {
                    break;
                }
                // Trailing comma.
                if self.peek_token() == Some(&Token::RBracket) {
                    break;
                }
            }
            self.expect(&Token::RBracket);
        }
        let end = self.end_offset();
        self.new_expr(
            ExprKind::List {
                elements,
                optional_indices,
            },
            start,
            end,
        )
    }

    fn parse_map_literal(&mut self, start: u32) -> Expr {
        let mut entries = Vec::new();
        if !self.matches(&Token::RBrace) {
            loop {
                let optional = self.matches(&Token::Question);
                let key = self.parse_expr();
                self.expect(&Token::Colon);
                let value = self.parse_expr();
                entries.push(MapEntry {
                    id: self.ids.next_id(),
                    key,
                    value,
                    optional,
                });
                if !self.matches(&Token::Comma) {
                    break;
                }
                if self.peek_token() == Some(&Token::RBrace) {
                    break;
                }
            }
            self.expect(&Token::RBrace);
        }
        let end = self.end_offset();
        self.new_expr(ExprKind::Map { entries }, start, end)
    }

    /// Field initializers; the opening brace is already consumed.
    fn parse_struct_literal(&mut self, type_name: String, start: u32) -> Expr {
        let mut fields = Vec::new();
        if !self.matches(&Token::RBrace) {
            loop {
                let optional = self.matches(&Token::Question);
                let Some(name) = self.expect_ident() else {
                    break;
                };
                self.expect(&Token::Colon);
                let value = self.parse_expr();
                fields.push(StructField {
                    id: self.ids.next_id(),
                    name,
                    value,
                    optional,
                });
                if !self.matches(&Token::Comma) {
                    break;
                }
                if self.peek_token() == Some(&Token::RBrace) {
                    break;
                }
            }
            self.expect(&Token::RBrace);
        }
        let end = self.end_offset();
        self.new_expr(ExprKind::Struct { type_name, fields }, start, end)
    }
}

/// Renders a pure select chain over identifiers as a dotted name.
///
/// Returns `None` when any link is a call, index, optional select, or
/// presence test, since those cannot form a type or namespace name.
#[must_use]
pub fn qualified_name(expr: &Expr) -> Option<String> {
    match &expr.kind {
        ExprKind::Ident(name) => Some(name.clone()),
        ExprKind::Select {
            operand,
            field,
            test_only: false,
            optional: false,
        } => {
            let prefix = qualified_name(operand)?;
            Some(format!("{prefix}.{field}"))
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ast::ExprId;

    fn parse_ok(source: &str) -> Ast {
        parse(source, "<test>").unwrap_or_else(|err| panic!("parse failed for {source:?}: {err}"))
    }

    fn parse_err(source: &str) -> ParseError {
        match parse(source, "<test>") {
            Ok(_) => panic!("expected parse failure for {source:?}"),
            Err(err) => err,
        }
    }

    #[test]
    fn binary_operators_become_operator_calls() {
        let ast = parse_ok("1 + 2 * 3");
        let ExprKind::Call { function, args, .. } = &ast.expr.kind else {
            panic!("expected call, got {:?}", ast.expr.kind);
        };
        assert_eq!(function, operators::ADD);
        assert_eq!(args.len(), 2);
        let ExprKind::Call { function: inner, .. } = &args[1].kind else {
            panic!("expected nested multiply");
        };
        assert_eq!(inner, operators::MULTIPLY);
    }

    #[test]
    fn ternary_nests_to_the_right() {
        let ast = parse_ok("a ? b : c ? d : e");
        let ExprKind::Call { function, args, .. } = &ast.expr.kind else {
            panic!("expected ternary call");
        };
        assert_eq!(function, operators::CONDITIONAL);
        assert!(matches!(&args[2].kind, ExprKind::Call { function, .. } if function == operators::CONDITIONAL));
    }

    #[test]
    fn member_call_keeps_target() {
        let ast = parse_ok("name.startsWith('x')");
        let ExprKind::Call { function, target, args } = &ast.expr.kind else {
            panic!("expected member call");
        };
        assert_eq!(function, "startsWith");
        assert!(target.is_some());
        assert_eq!(args.len(), 1);
    }

    #[test]
    fn negative_min_int_is_a_single_literal() {
        let ast = parse_ok("-9223372036854775808");
        assert_eq!(ast.expr.kind, ExprKind::Literal(Constant::Int(i64::MIN)));
    }

    #[test]
    fn struct_literal_over_qualified_name() {
        let ast = parse_ok("a.b.Msg{name: 'x', count: 1}");
        let ExprKind::Struct { type_name, fields } = &ast.expr.kind else {
            panic!("expected struct literal, got {:?}", ast.expr.kind);
        };
        assert_eq!(type_name, "a.b.Msg");
        assert_eq!(fields.len(), 2);
        assert_eq!(fields[0].name, "name");
    }

    #[test]
    fn optional_select_and_index() {
        let ast = parse_ok("m.?k");
        assert!(matches!(
            &ast.expr.kind,
            ExprKind::Select { optional: true, .. }
        ));
        let ast = parse_ok("m[?'k']");
        assert!(matches!(
            &ast.expr.kind,
            ExprKind::Call { function, .. } if function == operators::OPT_INDEX
        ));
    }

    #[test]
    fn unique_ids_across_the_tree() {
        let ast = parse_ok("[1, 2, {'k': v}, x.y]");
        let mut ids = Vec::new();
        collect_ids(&ast.expr, &mut ids);
        let count = ids.len();
        ids.sort_unstable();
        ids.dedup();
        assert_eq!(ids.len(), count, "expression ids must be unique");
    }

    fn collect_ids(expr: &Expr, out: &mut Vec<ExprId>) {
        out.push(expr.id);
        match &expr.kind {
            ExprKind::Literal(_) | ExprKind::Ident(_) => {}
            ExprKind::Select { operand, .. } => collect_ids(operand, out),
            ExprKind::Call { target, args, .. } => {
                if let Some(target) = target {
                    collect_ids(target, out);
                }
                for arg in args {
                    collect_ids(arg, out);
                }
            }
            ExprKind::List { elements, .. } => {
                for element in elements {
                    collect_ids(element, out);
                }
            }
            ExprKind::Map { entries } => {
                for entry in entries {
                    out.push(entry.id);
                    collect_ids(&entry.key, out);
                    collect_ids(&entry.value, out);
                }
            }
            ExprKind::Struct { fields, .. } => {
                for field in fields {
                    out.push(field.id);
                    collect_ids(&field.value, out);
                }
            }
            ExprKind::Comprehension(comp) => {
                collect_ids(&comp.iter_range, out);
                collect_ids(&comp.accu_init, out);
                collect_ids(&comp.loop_condition, out);
                collect_ids(&comp.loop_step, out);
                collect_ids(&comp.result, out);
            }
        }
    }

    #[test]
    fn unbalanced_parens_report_every_issue() {
        let err = parse_err("(1 + ");
        assert!(err.issues.len() >= 1);
    }

    #[test]
    fn deep_nesting_is_rejected() {
        let source = format!("{}1{}", "(".repeat(400), ")".repeat(400));
        let err = parse_err(&source);
        assert!(err.issues.iter().any(|i| i.message.contains("nesting")));
    }

    #[test]
    fn trailing_tokens_are_an_error() {
        let err = parse_err("1 2");
        assert!(err.issues.iter().any(|i| i.message.contains("unexpected token")));
    }
}
