//! The expression tree and its side tables.
//!
//! Every node carries an [`ExprId`] assigned densely during parsing and never
//! reused within a source. Annotations (source positions, resolved types,
//! references, pre-expansion macro calls) live in maps keyed by id rather
//! than on the nodes themselves, which keeps the tree cheap to clone and
//! shareable across threads once checked.

use ahash::AHashMap;

use crate::types::CelType;

/// Dense per-source expression id. Id 0 is reserved for "no expression".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, serde::Serialize, serde::Deserialize)]
pub struct ExprId(u32);

impl ExprId {
    pub const NONE: ExprId = ExprId(0);

    #[must_use]
    pub fn new(raw: u32) -> Self {
        Self(raw)
    }

    #[must_use]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Hands out monotonically increasing ids, starting at 1.
#[derive(Debug, Default)]
pub struct ExprIdGenerator {
    next: u32,
}

impl ExprIdGenerator {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn next_id(&mut self) -> ExprId {
        self.next += 1;
        ExprId(self.next)
    }
}

/// A literal constant as it appears in source.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Constant {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(String),
    Bytes(Vec<u8>),
    Null,
}

/// One entry of a map literal. `optional` marks `?key: value` entries whose
/// value is an optional that may decline to insert.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct MapEntry {
    pub id: ExprId,
    pub key: Expr,
    pub value: Expr,
    pub optional: bool,
}

/// One field initializer of a struct literal.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StructField {
    pub id: ExprId,
    pub name: String,
    pub value: Expr,
    pub optional: bool,
}

/// The fold primitive every quantifier and projection macro expands into.
///
/// Evaluation binds `accu_var` to `accu_init`, then iterates `iter_range` in
/// insertion order binding `iter_var` (and `iter_var2` for the two-variable
/// form), re-evaluating `loop_condition` before each step and `loop_step`
/// into the accumulator after it; `result` is evaluated in the final scope.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Comprehension {
    pub iter_range: Expr,
    pub iter_var: String,
    pub iter_var2: Option<String>,
    pub accu_var: String,
    pub accu_init: Expr,
    pub loop_condition: Expr,
    pub loop_step: Expr,
    pub result: Expr,
}

/// An expression node: id plus kind. Children are owned exclusively.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Expr {
    pub id: ExprId,
    pub kind: ExprKind,
}

impl Expr {
    #[must_use]
    pub fn new(id: ExprId, kind: ExprKind) -> Self {
        Self { id, kind }
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum ExprKind {
    Literal(Constant),
    Ident(String),
    /// Field access `operand.field`. A `test_only` select is the expansion of
    /// `has(operand.field)` and always types as bool; `optional` marks
    /// `operand.?field`.
    Select {
        operand: Box<Expr>,
        field: String,
        test_only: bool,
        optional: bool,
    },
    /// A global call (`target` absent) or member call (`target` present).
    Call {
        function: String,
        target: Option<Box<Expr>>,
        args: Vec<Expr>,
    },
    /// List literal; `optional_indices` lists positions written `?e`.
    List {
        elements: Vec<Expr>,
        optional_indices: Vec<u32>,
    },
    Map {
        entries: Vec<MapEntry>,
    },
    Struct {
        type_name: String,
        fields: Vec<StructField>,
    },
    Comprehension(Box<Comprehension>),
}

/// Resolution attached to an expression by the checker.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub enum Reference {
    /// A declared variable or constant, or an enum constant (which also
    /// carries its integer value).
    Variable {
        name: String,
        enum_value: Option<i64>,
    },
    /// A function call with the overload ids that survived resolution.
    Function {
        overload_ids: Vec<String>,
        resolved_name: Option<String>,
    },
}

/// A resolved line/column pair, 1-based, for user-facing messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct SourceLocation {
    pub line: u32,
    pub column: u32,
}

impl std::fmt::Display for SourceLocation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.line, self.column)
    }
}

/// Source bookkeeping for one parsed expression.
///
/// Offsets are byte offsets into the original source. `macro_calls` keeps the
/// pre-expansion call form keyed by the id of the node that replaced it, so a
/// formatter can recover surface syntax without re-parsing.
#[derive(Debug, Clone, Default, serde::Serialize, serde::Deserialize)]
pub struct SourceInfo {
    description: String,
    line_starts: Vec<u32>,
    positions: AHashMap<ExprId, (u32, u32)>,
    macro_calls: AHashMap<ExprId, Expr>,
}

impl SourceInfo {
    /// Builds the line-start table for `source`.
    #[must_use]
    pub fn new(description: &str, source: &str) -> Self {
        let mut line_starts = vec![0];
        for (offset, byte) in source.bytes().enumerate() {
            if byte == b'\n' {
                line_starts.push(u32::try_from(offset + 1).unwrap_or(u32::MAX));
            }
        }
        Self {
            description: description.to_owned(),
            line_starts,
            positions: AHashMap::new(),
            macro_calls: AHashMap::new(),
        }
    }

    #[must_use]
    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn set_position(&mut self, id: ExprId, start: u32, end: u32) {
        self.positions.insert(id, (start, end));
    }

    /// The `[start, end)` byte span recorded for `id`.
    #[must_use]
    pub fn position(&self, id: ExprId) -> Option<(u32, u32)> {
        self.positions.get(&id).copied()
    }

    pub fn record_macro_call(&mut self, id: ExprId, call: Expr) {
        self.macro_calls.insert(id, call);
    }

    /// The original (pre-expansion) call form for a macro-produced node.
    #[must_use]
    pub fn macro_call(&self, id: ExprId) -> Option<&Expr> {
        self.macro_calls.get(&id)
    }

    #[must_use]
    pub fn macro_call_count(&self) -> usize {
        self.macro_calls.len()
    }

    /// Resolves a byte offset to a 1-based line/column pair.
    #[must_use]
    pub fn location_of_offset(&self, offset: u32) -> SourceLocation {
        let line_index = match self.line_starts.binary_search(&offset) {
            Ok(exact) => exact,
            Err(insert) => insert.saturating_sub(1),
        };
        let line_start = self.line_starts.get(line_index).copied().unwrap_or(0);
        SourceLocation {
            line: u32::try_from(line_index + 1).unwrap_or(u32::MAX),
            column: offset - line_start + 1,
        }
    }

    /// Line/column of the start of the expression `id`, if recorded.
    #[must_use]
    pub fn location(&self, id: ExprId) -> Option<SourceLocation> {
        self.position(id).map(|(start, _)| self.location_of_offset(start))
    }
}

/// A parsed (and possibly checked) expression with its side tables.
///
/// The tree is immutable once checked; `type_map` and `ref_map` are empty
/// until the checker fills them.
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct Ast {
    pub expr: Expr,
    pub source_info: SourceInfo,
    pub type_map: AHashMap<ExprId, CelType>,
    pub ref_map: AHashMap<ExprId, Reference>,
    checked: bool,
}

impl Ast {
    #[must_use]
    pub fn new(expr: Expr, source_info: SourceInfo) -> Self {
        Self {
            expr,
            source_info,
            type_map: AHashMap::new(),
            ref_map: AHashMap::new(),
            checked: false,
        }
    }

    /// Marks the AST as carrying checker annotations.
    pub fn mark_checked(&mut self) {
        self.checked = true;
    }

    #[must_use]
    pub fn is_checked(&self) -> bool {
        self.checked
    }

    /// Static type of a node; `dyn` when unchecked or unannotated.
    #[must_use]
    pub fn type_of(&self, id: ExprId) -> CelType {
        self.type_map.get(&id).cloned().unwrap_or(CelType::Dyn)
    }

    /// Static type of the whole expression.
    #[must_use]
    pub fn result_type(&self) -> CelType {
        self.type_of(self.expr.id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn id_generator_is_dense_from_one() {
        let mut r#gen = ExprIdGenerator::new();
        assert_eq!(r#gen.next_id(), ExprId::new(1));
        assert_eq!(r#gen.next_id(), ExprId::new(2));
        assert_ne!(r#gen.next_id(), ExprId::NONE);
    }

    #[test]
    fn offsets_resolve_to_one_based_locations() {
        let info = SourceInfo::new("<input>", "ab\ncd\nef");
        assert_eq!(info.location_of_offset(0), SourceLocation { line: 1, column: 1 });
        assert_eq!(info.location_of_offset(1), SourceLocation { line: 1, column: 2 });
        assert_eq!(info.location_of_offset(3), SourceLocation { line: 2, column: 1 });
        assert_eq!(info.location_of_offset(7), SourceLocation { line: 3, column: 2 });
    }

    #[test]
    fn positions_round_trip_through_location() {
        let mut info = SourceInfo::new("<input>", "x + 1\ny");
        let id = ExprId::new(7);
        info.set_position(id, 6, 7);
        assert_eq!(info.location(id), Some(SourceLocation { line: 2, column: 1 }));
    }
}
