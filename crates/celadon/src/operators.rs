//! Operator function names.
//!
//! Operators are parsed into calls on mangled function names so the checker
//! and planner can treat them uniformly with ordinary functions. The mangled
//! forms are part of CEL's public surface (they appear in error messages and
//! overload ids are derived from them).

pub const CONDITIONAL: &str = "_?_:_";
pub const LOGICAL_AND: &str = "_&&_";
pub const LOGICAL_OR: &str = "_||_";
pub const LOGICAL_NOT: &str = "!_";
pub const EQUALS: &str = "_==_";
pub const NOT_EQUALS: &str = "_!=_";
pub const LESS: &str = "_<_";
pub const LESS_EQUALS: &str = "_<=_";
pub const GREATER: &str = "_>_";
pub const GREATER_EQUALS: &str = "_>=_";
pub const IN: &str = "@in";
pub const ADD: &str = "_+_";
pub const SUBTRACT: &str = "_-_";
pub const MULTIPLY: &str = "_*_";
pub const DIVIDE: &str = "_/_";
pub const MODULO: &str = "_%_";
pub const NEGATE: &str = "-_";
pub const INDEX: &str = "_[_]";
pub const OPT_INDEX: &str = "_[?_]";
pub const OPT_SELECT: &str = "_?._";

/// Internal function guarding comprehension loop conditions: errors and
/// unknowns are "not strictly false" so quantifier loops keep stepping.
pub const NOT_STRICTLY_FALSE: &str = "@not_strictly_false";

/// Human-readable symbol for a mangled operator name, used in "no matching
/// overload" messages. Returns `None` for ordinary functions.
#[must_use]
pub fn display_name(function: &str) -> Option<&'static str> {
    match function {
        LOGICAL_AND => Some("&&"),
        LOGICAL_OR => Some("||"),
        LOGICAL_NOT => Some("!"),
        EQUALS => Some("=="),
        NOT_EQUALS => Some("!="),
        LESS => Some("<"),
        LESS_EQUALS => Some("<="),
        GREATER => Some(">"),
        GREATER_EQUALS => Some(">="),
        IN => Some("in"),
        ADD => Some("+"),
        SUBTRACT => Some("-"),
        MULTIPLY => Some("*"),
        DIVIDE => Some("/"),
        MODULO => Some("%"),
        NEGATE => Some("-"),
        INDEX | OPT_INDEX => Some("[]"),
        _ => None,
    }
}
