//! Hand-written tokenizer for the CEL grammar.
//!
//! The lexer produces the full token stream up front; the parser walks it
//! with single-token lookahead. Offsets are byte offsets into the source so
//! they can be resolved through `SourceInfo`.

use std::fmt;

/// Words reserved by the grammar. `in` is an operator and gets its own
/// token; the rest may not appear as identifiers.
const RESERVED: &[&str] = &[
    "as", "break", "const", "continue", "else", "for", "function", "if", "import", "let", "loop", "package",
    "namespace", "return", "var", "void", "while",
];

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Ident(String),
    IntLit(i64),
    UintLit(u64),
    DoubleLit(f64),
    StringLit(String),
    BytesLit(Vec<u8>),
    BoolLit(bool),
    NullLit,
    In,

    LParen,
    RParen,
    LBracket,
    /// `[?`, the optional-index opener.
    LBracketQuestion,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    /// `.?`, the optional-select operator.
    DotQuestion,
    Colon,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Equals,
    NotEquals,
    Less,
    LessEquals,
    Greater,
    GreaterEquals,
    LogicalAnd,
    LogicalOr,
    Bang,
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Ident(name) => write!(f, "{name}"),
            Self::IntLit(v) => write!(f, "{v}"),
            Self::UintLit(v) => write!(f, "{v}u"),
            Self::DoubleLit(v) => write!(f, "{v}"),
            Self::StringLit(_) => write!(f, "string literal"),
            Self::BytesLit(_) => write!(f, "bytes literal"),
            Self::BoolLit(v) => write!(f, "{v}"),
            Self::NullLit => write!(f, "null"),
            Self::In => write!(f, "in"),
            Self::LParen => write!(f, "("),
            Self::RParen => write!(f, ")"),
            Self::LBracket => write!(f, "["),
            Self::LBracketQuestion => write!(f, "[?"),
            Self::RBracket => write!(f, "]"),
            Self::LBrace => write!(f, "{{"),
            Self::RBrace => write!(f, "}}"),
            Self::Comma => write!(f, ","),
            Self::Dot => write!(f, "."),
            Self::DotQuestion => write!(f, ".?"),
            Self::Colon => write!(f, ":"),
            Self::Question => write!(f, "?"),
            Self::Plus => write!(f, "+"),
            Self::Minus => write!(f, "-"),
            Self::Star => write!(f, "*"),
            Self::Slash => write!(f, "/"),
            Self::Percent => write!(f, "%"),
            Self::Equals => write!(f, "=="),
            Self::NotEquals => write!(f, "!="),
            Self::Less => write!(f, "<"),
            Self::LessEquals => write!(f, "<="),
            Self::Greater => write!(f, ">"),
            Self::GreaterEquals => write!(f, ">="),
            Self::LogicalAnd => write!(f, "&&"),
            Self::LogicalOr => write!(f, "||"),
            Self::Bang => write!(f, "!"),
        }
    }
}

/// A token with its `[start, end)` byte span.
#[derive(Debug, Clone, PartialEq)]
pub struct SpannedToken {
    pub token: Token,
    pub start: u32,
    pub end: u32,
}

/// A tokenization failure at a byte offset.
#[derive(Debug, Clone, PartialEq)]
pub struct LexError {
    pub message: String,
    pub offset: u32,
}

impl LexError {
    fn new(message: impl Into<String>, offset: usize) -> Self {
        Self {
            message: message.into(),
            offset: u32::try_from(offset).unwrap_or(u32::MAX),
        }
    }
}

/// Tokenizes `source`, accumulating every lex failure instead of stopping at
/// the first so the parser can report them all at once.
pub fn tokenize(source: &str) -> (Vec<SpannedToken>, Vec<LexError>) {
    Lexer::new(source).run()
}

struct Lexer<'a> {
    source: &'a str,
    bytes: &'a [u8],
    pos: usize,
    tokens: Vec<SpannedToken>,
    errors: Vec<LexError>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Self {
            source,
            bytes: source.as_bytes(),
            pos: 0,
            tokens: Vec::new(),
            errors: Vec::new(),
        }
    }

    fn run(mut self) -> (Vec<SpannedToken>, Vec<LexError>) {
        while self.pos < self.bytes.len() {
            let start = self.pos;
            let byte = self.bytes[self.pos];
            match byte {
                b' ' | b'\t' | b'\r' | b'\n' => {
                    self.pos += 1;
                }
                b'/' if self.peek_at(1) == Some(b'/') => {
                    // Line comment: skip to end of line.
                    while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
                        self.pos += 1;
                    }
                }
                b'0'..=b'9' => self.lex_number(start),
                b'.' if self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) => self.lex_number(start),
                b'"' | b'\'' => self.lex_string(start, false, false),
                b'r' | b'R' | b'b' | b'B' => {
                    if !self.try_lex_prefixed_string(start) {
                        self.lex_ident(start);
                    }
                }
                b'_' | b'a'..=b'z' | b'A'..=b'Z' => self.lex_ident(start),
                _ => self.lex_operator(start),
            }
        }
        (self.tokens, self.errors)
    }

    fn peek_at(&self, ahead: usize) -> Option<u8> {
        self.bytes.get(self.pos + ahead).copied()
    }

    fn push(&mut self, token: Token, start: usize) {
        self.tokens.push(SpannedToken {
            token,
            start: u32::try_from(start).unwrap_or(u32::MAX),
            end: u32::try_from(self.pos).unwrap_or(u32::MAX),
        });
    }

    fn error(&mut self, message: impl Into<String>, offset: usize) {
        self.errors.push(LexError::new(message, offset));
    }

    fn lex_ident(&mut self, start: usize) {
        while self
            .peek_at(0)
            .is_some_and(|b| b == b'_' || b.is_ascii_alphanumeric())
        {
            self.pos += 1;
        }
        let word = &self.source[start..self.pos];
        let token = match word {
            "true" => Token::BoolLit(true),
            "false" => Token::BoolLit(false),
            "null" => Token::NullLit,
            "in" => Token::In,
            _ if RESERVED.contains(&word) => {
                self.error(format!("reserved identifier: {word}"), start);
                Token::Ident(word.to_owned())
            }
            _ => Token::Ident(word.to_owned()),
        };
        self.push(token, start);
    }

    /// Tries the `r`/`b`/`rb`/`br` string prefixes; returns false when the
    /// characters turn out to start a plain identifier instead.
    fn try_lex_prefixed_string(&mut self, start: usize) -> bool {
        let mut raw = false;
        let mut bytes_lit = false;
        let mut ahead = 0;
        for _ in 0..2 {
            match self.peek_at(ahead) {
                Some(b'r' | b'R') if !raw => raw = true,
                Some(b'b' | b'B') if !bytes_lit => bytes_lit = true,
                _ => break,
            }
            ahead += 1;
        }
        if ahead == 0 || !matches!(self.peek_at(ahead), Some(b'"' | b'\'')) {
            return false;
        }
        self.pos += ahead;
        self.lex_string(start, raw, bytes_lit);
        true
    }

    fn lex_number(&mut self, start: usize) {
        let mut is_double = false;
        if self.peek_at(0) == Some(b'0') && matches!(self.peek_at(1), Some(b'x' | b'X')) {
            self.pos += 2;
            let digits_start = self.pos;
            while self.peek_at(0).is_some_and(|b| b.is_ascii_hexdigit()) {
                self.pos += 1;
            }
            if digits_start == self.pos {
                self.error("malformed hexadecimal literal", start);
                self.push(Token::IntLit(0), start);
                return;
            }
            let digits = &self.source[digits_start..self.pos];
            let unsigned = matches!(self.peek_at(0), Some(b'u' | b'U'));
            if unsigned {
                self.pos += 1;
            }
            match u64::from_str_radix(digits, 16) {
                Ok(value) => self.push_integer(value, unsigned, start),
                Err(_) => {
                    self.error("hexadecimal literal out of range", start);
                    self.push(Token::IntLit(0), start);
                }
            }
            return;
        }

        while self.peek_at(0).is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek_at(0) == Some(b'.') && self.peek_at(1).is_some_and(|b| b.is_ascii_digit()) {
            is_double = true;
            self.pos += 1;
            while self.peek_at(0).is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        } else if self.peek_at(0) == Some(b'.') && self.source[start..self.pos].is_empty() {
            // Leading-dot form `.5`; the caller only routes here when a digit
            // follows, so consume the dot and the fraction.
            is_double = true;
            self.pos += 1;
            while self.peek_at(0).is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        if matches!(self.peek_at(0), Some(b'e' | b'E')) {
            let mut ahead = 1;
            if matches!(self.peek_at(ahead), Some(b'+' | b'-')) {
                ahead += 1;
            }
            if self.peek_at(ahead).is_some_and(|b| b.is_ascii_digit()) {
                is_double = true;
                self.pos += ahead;
                while self.peek_at(0).is_some_and(|b| b.is_ascii_digit()) {
                    self.pos += 1;
                }
            }
        }

        let text = &self.source[start..self.pos];
        if is_double {
            match text.parse::<f64>() {
                Ok(value) => self.push(Token::DoubleLit(value), start),
                Err(_) => {
                    self.error("malformed floating-point literal", start);
                    self.push(Token::DoubleLit(0.0), start);
                }
            }
            return;
        }
        let unsigned = matches!(self.peek_at(0), Some(b'u' | b'U'));
        if unsigned {
            self.pos += 1;
        }
        match text.parse::<u64>() {
            Ok(value) => self.push_integer(value, unsigned, start),
            Err(_) => {
                self.error("integer literal out of range", start);
                self.push(Token::IntLit(0), start);
            }
        }
    }

    /// Classifies a non-negative integer literal: an explicit `u` suffix or a
    /// magnitude above `i64::MAX` makes it a uint.
    fn push_integer(&mut self, value: u64, unsigned: bool, start: usize) {
        if unsigned {
            self.push(Token::UintLit(value), start);
        } else if let Ok(signed) = i64::try_from(value) {
            self.push(Token::IntLit(signed), start);
        } else {
            self.push(Token::UintLit(value), start);
        }
    }

    fn lex_string(&mut self, start: usize, raw: bool, bytes_lit: bool) {
        let quote = self.bytes[self.pos];
        let triple = self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote);
        self.pos += if triple { 3 } else { 1 };

        let mut text_bytes: Vec<u8> = Vec::new();
        loop {
            let Some(byte) = self.peek_at(0) else {
                self.error("unterminated string literal", start);
                break;
            };
            if byte == quote {
                if triple {
                    if self.peek_at(1) == Some(quote) && self.peek_at(2) == Some(quote) {
                        self.pos += 3;
                        break;
                    }
                    text_bytes.push(byte);
                    self.pos += 1;
                    continue;
                }
                self.pos += 1;
                break;
            }
            if byte == b'\n' && !triple {
                self.error("unterminated string literal", start);
                break;
            }
            if byte == b'\\' && !raw {
                self.lex_escape(&mut text_bytes, bytes_lit, start);
                continue;
            }
            text_bytes.push(byte);
            self.pos += 1;
        }

        if bytes_lit {
            self.push(Token::BytesLit(text_bytes), start);
        } else {
            match String::from_utf8(text_bytes) {
                Ok(text) => self.push(Token::StringLit(text), start),
                Err(_) => {
                    self.error("string literal contains invalid UTF-8 escape", start);
                    self.push(Token::StringLit(String::new()), start);
                }
            }
        }
    }

    /// Consumes one escape sequence (the leading backslash is at `self.pos`).
    fn lex_escape(&mut self, out: &mut Vec<u8>, bytes_lit: bool, start: usize) {
        self.pos += 1;
        let Some(kind) = self.peek_at(0) else {
            self.error("unterminated escape sequence", start);
            return;
        };
        self.pos += 1;
        match kind {
            b'a' => out.push(0x07),
            b'b' => out.push(0x08),
            b'f' => out.push(0x0c),
            b'n' => out.push(b'\n'),
            b'r' => out.push(b'\r'),
            b't' => out.push(b'\t'),
            b'v' => out.push(0x0b),
            b'\\' => out.push(b'\\'),
            b'\'' => out.push(b'\''),
            b'"' => out.push(b'"'),
            b'`' => out.push(b'`'),
            b'?' => out.push(b'?'),
            b'x' | b'X' => {
                if let Some(value) = self.take_hex_digits(2) {
                    if bytes_lit {
                        out.push(u8::try_from(value).unwrap_or(0));
                    } else {
                        self.push_code_point(out, value, start);
                    }
                } else {
                    self.error("malformed \\x escape", start);
                }
            }
            b'u' => match self.take_hex_digits(4) {
                Some(value) if !bytes_lit => self.push_code_point(out, value, start),
                Some(_) => self.error("\\u escapes are not allowed in bytes literals", start),
                None => self.error("malformed \\u escape", start),
            },
            b'U' => match self.take_hex_digits(8) {
                Some(value) if !bytes_lit => self.push_code_point(out, value, start),
                Some(_) => self.error("\\U escapes are not allowed in bytes literals", start),
                None => self.error("malformed \\U escape", start),
            },
            b'0'..=b'7' => {
                // Octal escape: exactly three digits including this one.
                let mut value = u32::from(kind - b'0');
                let mut valid = true;
                for _ in 0..2 {
                    match self.peek_at(0) {
                        Some(digit @ b'0'..=b'7') => {
                            value = value * 8 + u32::from(digit - b'0');
                            self.pos += 1;
                        }
                        _ => {
                            valid = false;
                            break;
                        }
                    }
                }
                if !valid {
                    self.error("octal escapes require three digits", start);
                } else if bytes_lit {
                    out.push(u8::try_from(value).unwrap_or(0));
                } else {
                    self.push_code_point(out, value, start);
                }
            }
            other => self.error(format!("invalid escape sequence \\{}", other as char), start),
        }
    }

    fn take_hex_digits(&mut self, count: usize) -> Option<u32> {
        let mut value: u32 = 0;
        for index in 0..count {
            let digit = (self.peek_at(index)? as char).to_digit(16)?;
            value = value.checked_mul(16)?.checked_add(digit)?;
        }
        self.pos += count;
        Some(value)
    }

    fn push_code_point(&mut self, out: &mut Vec<u8>, value: u32, start: usize) {
        match char::from_u32(value) {
            Some(ch) => {
                let mut buffer = [0u8; 4];
                out.extend_from_slice(ch.encode_utf8(&mut buffer).as_bytes());
            }
            None => self.error(format!("invalid code point U+{value:04X}"), start),
        }
    }

    fn lex_operator(&mut self, start: usize) {
        let byte = self.bytes[self.pos];
        let two = self.peek_at(1);
        let token = match (byte, two) {
            (b'=', Some(b'=')) => {
                self.pos += 2;
                Token::Equals
            }
            (b'!', Some(b'=')) => {
                self.pos += 2;
                Token::NotEquals
            }
            (b'<', Some(b'=')) => {
                self.pos += 2;
                Token::LessEquals
            }
            (b'>', Some(b'=')) => {
                self.pos += 2;
                Token::GreaterEquals
            }
            (b'&', Some(b'&')) => {
                self.pos += 2;
                Token::LogicalAnd
            }
            (b'|', Some(b'|')) => {
                self.pos += 2;
                Token::LogicalOr
            }
            (b'.', Some(b'?')) => {
                self.pos += 2;
                Token::DotQuestion
            }
            (b'[', Some(b'?')) => {
                self.pos += 2;
                Token::LBracketQuestion
            }
            (b'(', _) => {
                self.pos += 1;
                Token::LParen
            }
            (b')', _) => {
                self.pos += 1;
                Token::RParen
            }
            (b'[', _) => {
                self.pos += 1;
                Token::LBracket
            }
            (b']', _) => {
                self.pos += 1;
                Token::RBracket
            }
            (b'{', _) => {
                self.pos += 1;
                Token::LBrace
            }
            (b'}', _) => {
                self.pos += 1;
                Token::RBrace
            }
            (b',', _) => {
                self.pos += 1;
                Token::Comma
            }
            (b'.', _) => {
                self.pos += 1;
                Token::Dot
            }
            (b':', _) => {
                self.pos += 1;
                Token::Colon
            }
            (b'?', _) => {
                self.pos += 1;
                Token::Question
            }
            (b'+', _) => {
                self.pos += 1;
                Token::Plus
            }
            (b'-', _) => {
                self.pos += 1;
                Token::Minus
            }
            (b'*', _) => {
                self.pos += 1;
                Token::Star
            }
            (b'/', _) => {
                self.pos += 1;
                Token::Slash
            }
            (b'%', _) => {
                self.pos += 1;
                Token::Percent
            }
            (b'<', _) => {
                self.pos += 1;
                Token::Less
            }
            (b'>', _) => {
                self.pos += 1;
                Token::Greater
            }
            (b'!', _) => {
                self.pos += 1;
                Token::Bang
            }
            _ => {
                self.error(format!("unexpected character '{}'", byte as char), start);
                self.pos += 1;
                return;
            }
        };
        self.push(token, start);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tokens(source: &str) -> Vec<Token> {
        let (spanned, errors) = tokenize(source);
        assert!(errors.is_empty(), "unexpected lex errors: {errors:?}");
        spanned.into_iter().map(|t| t.token).collect()
    }

    #[test]
    fn large_integer_literal_becomes_uint() {
        assert_eq!(tokens("9223372036854775807"), vec![Token::IntLit(i64::MAX)]);
        assert_eq!(tokens("9223372036854775808"), vec![Token::UintLit(9_223_372_036_854_775_808)]);
        assert_eq!(tokens("42u"), vec![Token::UintLit(42)]);
        assert_eq!(tokens("0xFFu"), vec![Token::UintLit(255)]);
    }

    #[test]
    fn double_forms() {
        assert_eq!(tokens("1.5"), vec![Token::DoubleLit(1.5)]);
        assert_eq!(tokens(".5"), vec![Token::DoubleLit(0.5)]);
        assert_eq!(tokens("2e3"), vec![Token::DoubleLit(2000.0)]);
        assert_eq!(tokens("2.5e-1"), vec![Token::DoubleLit(0.25)]);
    }

    #[test]
    fn string_escapes() {
        assert_eq!(
            tokens(r#""a\nb\x41é""#),
            vec![Token::StringLit("a\nbA\u{e9}".to_owned())]
        );
        assert_eq!(tokens(r#"r"a\nb""#), vec![Token::StringLit("a\\nb".to_owned())]);
        assert_eq!(tokens(r#"b"\x00\377""#), vec![Token::BytesLit(vec![0x00, 0xff])]);
        assert_eq!(tokens(r#""\101""#), vec![Token::StringLit("A".to_owned())]);
    }

    #[test]
    fn triple_quoted_strings_span_lines() {
        assert_eq!(tokens("'''a\nb'''"), vec![Token::StringLit("a\nb".to_owned())]);
    }

    #[test]
    fn optional_navigation_tokens() {
        assert_eq!(
            tokens("m.?k[?0]"),
            vec![
                Token::Ident("m".to_owned()),
                Token::DotQuestion,
                Token::Ident("k".to_owned()),
                Token::LBracketQuestion,
                Token::IntLit(0),
                Token::RBracket,
            ]
        );
    }

    #[test]
    fn reserved_word_is_a_lex_error() {
        let (_, errors) = tokenize("while");
        assert_eq!(errors.len(), 1);
        assert!(errors[0].message.contains("reserved"));
    }

    #[test]
    fn comments_are_skipped() {
        assert_eq!(tokens("1 // trailing\n+ 2"), vec![Token::IntLit(1), Token::Plus, Token::IntLit(2)]);
    }
}
