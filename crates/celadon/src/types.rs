//! Static types and the unification algebra used by the checker.
//!
//! `CelType` is the closed set of compile-time types. Assignability runs over
//! a mutable [`TypeMapping`] that records type-parameter bindings; candidates
//! are tried against a clone of the mapping so failed matches roll back by
//! dropping the clone.

use std::fmt;

use ahash::AHashMap;
use strum::{Display, EnumString, IntoStaticStr};

/// Qualified name of the opaque type wrapping optional values.
pub const OPTIONAL_TYPE_NAME: &str = "optional_type";

/// Discriminant for a `CelType`, used where only the shape matters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr)]
#[strum(serialize_all = "snake_case")]
pub enum TypeKind {
    Dyn,
    Error,
    Bool,
    Int,
    Uint,
    Double,
    String,
    Bytes,
    NullType,
    Duration,
    Timestamp,
    List,
    Map,
    Struct,
    Opaque,
    TypeParam,
    Type,
}

/// A compile-time CEL type.
///
/// `Dyn` is the top type, assignable in both directions; `Error` behaves the
/// same so that checking can continue past an error without cascading.
/// Structs are nominal and resolved by fully-qualified name through the
/// environment's type provider. Enums and `optional_type` are modeled as
/// opaque types (zero and one parameter respectively).
#[derive(Debug, Clone, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub enum CelType {
    Dyn,
    Error,
    Bool,
    Int,
    Uint,
    Double,
    String,
    Bytes,
    Null,
    Duration,
    Timestamp,
    List(Box<CelType>),
    Map(Box<CelType>, Box<CelType>),
    /// A message/struct type, nominal by qualified name.
    Struct(String),
    /// An opaque named type with type parameters. Enums are zero-parameter
    /// opaques; `optional_type(T)` is a one-parameter opaque.
    Opaque(String, Vec<CelType>),
    /// A checker-internal type variable, unified by binding.
    TypeParam(String),
    /// The type of a type value; `Type(Dyn)` is the unparameterized `type`.
    Type(Box<CelType>),
}

impl CelType {
    /// Builds `optional_type(inner)`.
    #[must_use]
    pub fn optional(inner: CelType) -> Self {
        Self::Opaque(OPTIONAL_TYPE_NAME.to_owned(), vec![inner])
    }

    /// Builds an enum type (a zero-parameter opaque).
    #[must_use]
    pub fn enum_type(name: &str) -> Self {
        Self::Opaque(name.to_owned(), Vec::new())
    }

    #[must_use]
    pub fn kind(&self) -> TypeKind {
        match self {
            Self::Dyn => TypeKind::Dyn,
            Self::Error => TypeKind::Error,
            Self::Bool => TypeKind::Bool,
            Self::Int => TypeKind::Int,
            Self::Uint => TypeKind::Uint,
            Self::Double => TypeKind::Double,
            Self::String => TypeKind::String,
            Self::Bytes => TypeKind::Bytes,
            Self::Null => TypeKind::NullType,
            Self::Duration => TypeKind::Duration,
            Self::Timestamp => TypeKind::Timestamp,
            Self::List(_) => TypeKind::List,
            Self::Map(..) => TypeKind::Map,
            Self::Struct(_) => TypeKind::Struct,
            Self::Opaque(..) => TypeKind::Opaque,
            Self::TypeParam(_) => TypeKind::TypeParam,
            Self::Type(_) => TypeKind::Type,
        }
    }

    /// True for `dyn` and `error`, which are assignable in both directions.
    #[must_use]
    pub fn is_dyn_or_error(&self) -> bool {
        matches!(self, Self::Dyn | Self::Error)
    }

    #[must_use]
    pub fn is_optional(&self) -> bool {
        matches!(self, Self::Opaque(name, params) if name == OPTIONAL_TYPE_NAME && params.len() == 1)
    }

    /// Inner type of `optional_type(T)`, if this is an optional.
    #[must_use]
    pub fn optional_inner(&self) -> Option<&CelType> {
        match self {
            Self::Opaque(name, params) if name == OPTIONAL_TYPE_NAME => params.first(),
            _ => None,
        }
    }

    /// True for enum types: opaque with no parameters.
    #[must_use]
    pub fn is_enum(&self) -> bool {
        matches!(self, Self::Opaque(_, params) if params.is_empty())
    }

    /// Whether `null` may be assigned to this type.
    ///
    /// Covers structs (messages), the temporal types, optionals, and the
    /// protobuf wrapper positions (which unwrap to primitives but still admit
    /// null), plus the wildcards.
    #[must_use]
    pub fn is_nullable(&self) -> bool {
        match self {
            Self::Null | Self::Dyn | Self::Error | Self::Duration | Self::Timestamp => true,
            Self::Struct(_) => true,
            opt if opt.is_optional() => true,
            _ => false,
        }
    }

    /// Maps a protobuf wrapper message name to its primitive type.
    ///
    /// Wrapper positions accept both the primitive and `null`.
    #[must_use]
    pub fn wrapper_primitive(name: &str) -> Option<CelType> {
        match name {
            "google.protobuf.BoolValue" => Some(Self::Bool),
            "google.protobuf.Int32Value" | "google.protobuf.Int64Value" => Some(Self::Int),
            "google.protobuf.UInt32Value" | "google.protobuf.UInt64Value" => Some(Self::Uint),
            "google.protobuf.FloatValue" | "google.protobuf.DoubleValue" => Some(Self::Double),
            "google.protobuf.StringValue" => Some(Self::String),
            "google.protobuf.BytesValue" => Some(Self::Bytes),
            _ => None,
        }
    }

    /// Replaces a wrapper struct type with its primitive; other types pass
    /// through unchanged.
    #[must_use]
    pub fn unwrap_wrapper(&self) -> CelType {
        if let Self::Struct(name) = self
            && let Some(primitive) = Self::wrapper_primitive(name)
        {
            return primitive;
        }
        self.clone()
    }

    /// Type parameters appearing anywhere inside this type, in declaration order.
    pub fn collect_type_params(&self, out: &mut Vec<String>) {
        match self {
            Self::TypeParam(name) => {
                if !out.iter().any(|existing| existing == name) {
                    out.push(name.clone());
                }
            }
            Self::List(elem) => elem.collect_type_params(out),
            Self::Map(key, value) => {
                key.collect_type_params(out);
                value.collect_type_params(out);
            }
            Self::Opaque(_, params) => {
                for param in params {
                    param.collect_type_params(out);
                }
            }
            Self::Type(inner) => inner.collect_type_params(out),
            _ => {}
        }
    }
}

impl fmt::Display for CelType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Dyn => write!(f, "dyn"),
            Self::Error => write!(f, "!error!"),
            Self::Bool => write!(f, "bool"),
            Self::Int => write!(f, "int"),
            Self::Uint => write!(f, "uint"),
            Self::Double => write!(f, "double"),
            Self::String => write!(f, "string"),
            Self::Bytes => write!(f, "bytes"),
            Self::Null => write!(f, "null_type"),
            Self::Duration => write!(f, "google.protobuf.Duration"),
            Self::Timestamp => write!(f, "google.protobuf.Timestamp"),
            Self::List(elem) => write!(f, "list({elem})"),
            Self::Map(key, value) => write!(f, "map({key}, {value})"),
            Self::Struct(name) => write!(f, "{name}"),
            Self::Opaque(name, params) => {
                if params.is_empty() {
                    write!(f, "{name}")
                } else {
                    write!(f, "{name}(")?;
                    for (i, param) in params.iter().enumerate() {
                        if i > 0 {
                            write!(f, ", ")?;
                        }
                        write!(f, "{param}")?;
                    }
                    write!(f, ")")
                }
            }
            Self::TypeParam(name) => write!(f, "{name}"),
            Self::Type(inner) => {
                if matches!(**inner, Self::Dyn) {
                    write!(f, "type")
                } else {
                    write!(f, "type({inner})")
                }
            }
        }
    }
}

/// Mutable record of type-parameter bindings built up during overload
/// resolution.
///
/// Candidates are matched against a clone of the current mapping; a
/// successful match replaces the original, a failed match is discarded.
#[derive(Debug, Clone, Default)]
pub struct TypeMapping {
    bindings: AHashMap<String, CelType>,
}

impl TypeMapping {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Looks up the binding for a type parameter, if any.
    #[must_use]
    pub fn find(&self, name: &str) -> Option<&CelType> {
        self.bindings.get(name)
    }

    fn bind(&mut self, name: &str, ty: CelType) {
        self.bindings.insert(name.to_owned(), ty);
    }

    /// Substitutes bound type parameters in `ty`, recursively.
    ///
    /// Unbound parameters are replaced with `dyn` when `finalize` is set
    /// (used for result types after resolution); otherwise they are kept so
    /// later arguments can still bind them.
    #[must_use]
    pub fn substitute(&self, ty: &CelType, finalize: bool) -> CelType {
        match ty {
            CelType::TypeParam(name) => match self.bindings.get(name) {
                Some(bound) => self.substitute(&bound.clone(), finalize),
                None if finalize => CelType::Dyn,
                None => ty.clone(),
            },
            CelType::List(elem) => CelType::List(Box::new(self.substitute(elem, finalize))),
            CelType::Map(key, value) => CelType::Map(
                Box::new(self.substitute(key, finalize)),
                Box::new(self.substitute(value, finalize)),
            ),
            CelType::Opaque(name, params) => CelType::Opaque(
                name.clone(),
                params.iter().map(|p| self.substitute(p, finalize)).collect(),
            ),
            CelType::Type(inner) => CelType::Type(Box::new(self.substitute(inner, finalize))),
            _ => ty.clone(),
        }
    }

    /// Occurs check: whether `name` appears inside `ty` after substitution.
    fn occurs_in(&self, name: &str, ty: &CelType) -> bool {
        match ty {
            CelType::TypeParam(other) => {
                if other == name {
                    return true;
                }
                match self.bindings.get(other) {
                    Some(bound) => self.occurs_in(name, &bound.clone()),
                    None => false,
                }
            }
            CelType::List(elem) => self.occurs_in(name, elem),
            CelType::Map(key, value) => self.occurs_in(name, key) || self.occurs_in(name, value),
            CelType::Opaque(_, params) => params.iter().any(|p| self.occurs_in(name, p)),
            CelType::Type(inner) => self.occurs_in(name, inner),
            _ => false,
        }
    }
}

/// Whether a value of type `arg` may be supplied where `param` is expected,
/// binding type parameters in `mapping` as a side effect.
pub fn is_assignable(mapping: &mut TypeMapping, param: &CelType, arg: &CelType) -> bool {
    // A type variable on either side binds to the other, unifying with any
    // existing binding first.
    if let CelType::TypeParam(name) = param {
        return bind_type_param(mapping, name, arg);
    }
    if let CelType::TypeParam(name) = arg {
        return bind_type_param(mapping, name, param);
    }

    // `null` fits message, temporal, optional, and wrapper positions; the
    // check runs before wrapper unwrapping so `BoolValue` still admits null.
    if matches!(arg, CelType::Null) {
        return param.is_nullable();
    }

    // Wrapper messages participate as their primitive from here on.
    let param = &param.unwrap_wrapper();
    let arg = &arg.unwrap_wrapper();

    if param.is_dyn_or_error() || arg.is_dyn_or_error() {
        return true;
    }

    // Enums are interchangeable with int.
    if matches!(param, CelType::Int) && arg.is_enum() {
        return true;
    }

    match (param, arg) {
        (CelType::List(param_elem), CelType::List(arg_elem)) => is_assignable(mapping, param_elem, arg_elem),
        (CelType::Map(param_key, param_value), CelType::Map(arg_key, arg_value)) => {
            is_assignable(mapping, param_key, arg_key) && is_assignable(mapping, param_value, arg_value)
        }
        (CelType::Struct(param_name), CelType::Struct(arg_name)) => param_name == arg_name,
        (CelType::Opaque(param_name, param_params), CelType::Opaque(arg_name, arg_params)) => {
            param_name == arg_name
                && param_params.len() == arg_params.len()
                && param_params
                    .iter()
                    .zip(arg_params)
                    .all(|(p, a)| is_assignable(mapping, p, a))
        }
        // Type values are mutually assignable regardless of their parameter,
        // so `type(1) == type('a')` checks and decides at runtime.
        (CelType::Type(_), CelType::Type(_)) => true,
        _ => param.kind() == arg.kind(),
    }
}

/// Binds `name` to `ty`, unifying with an existing binding when present.
fn bind_type_param(mapping: &mut TypeMapping, name: &str, ty: &CelType) -> bool {
    if let Some(existing) = mapping.find(name).cloned() {
        return is_assignable(mapping, &existing, ty);
    }
    // Binding a variable to itself is a no-op, not a cycle.
    if matches!(ty, CelType::TypeParam(other) if other == name) {
        return true;
    }
    if mapping.occurs_in(name, ty) {
        return false;
    }
    mapping.bind(name, ty.clone());
    true
}

/// Whether the two types are equivalent under the current mapping.
///
/// Used for the overload tie-break: matching candidates whose substituted
/// result types are not all equivalent widen the call to `dyn`.
#[must_use]
pub fn types_equivalent(mapping: &TypeMapping, a: &CelType, b: &CelType) -> bool {
    mapping.substitute(a, true) == mapping.substitute(b, true)
}

/// Conservative upper bound of two types.
///
/// Used for ternary branches and literal collection elements. Anything that
/// does not join exactly widens to `dyn`.
#[must_use]
pub fn join_types(a: &CelType, b: &CelType) -> CelType {
    if a == b {
        return a.clone();
    }
    if a.is_dyn_or_error() || b.is_dyn_or_error() {
        return CelType::Dyn;
    }
    // `null` joined with a nullable type keeps the nullable type.
    if matches!(a, CelType::Null) && b.is_nullable() {
        return b.clone();
    }
    if matches!(b, CelType::Null) && a.is_nullable() {
        return a.clone();
    }
    match (a, b) {
        (CelType::List(a_elem), CelType::List(b_elem)) => CelType::List(Box::new(join_types(a_elem, b_elem))),
        (CelType::Map(a_key, a_value), CelType::Map(b_key, b_value)) => {
            CelType::Map(Box::new(join_types(a_key, b_key)), Box::new(join_types(a_value, b_value)))
        }
        (CelType::TypeParam(_), other) | (other, CelType::TypeParam(_)) => other.clone(),
        _ => CelType::Dyn,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_param_binds_and_substitutes() {
        let mut mapping = TypeMapping::new();
        let param = CelType::List(Box::new(CelType::TypeParam("A".to_owned())));
        let arg = CelType::List(Box::new(CelType::Int));
        assert!(is_assignable(&mut mapping, &param, &arg));
        assert_eq!(mapping.substitute(&CelType::TypeParam("A".to_owned()), true), CelType::Int);
    }

    #[test]
    fn bound_type_param_rejects_conflicting_binding() {
        let mut mapping = TypeMapping::new();
        let param = CelType::TypeParam("A".to_owned());
        assert!(is_assignable(&mut mapping, &param, &CelType::Int));
        assert!(!is_assignable(&mut mapping, &param, &CelType::String));
    }

    #[test]
    fn occurs_check_prevents_cyclic_binding() {
        let mut mapping = TypeMapping::new();
        let param = CelType::TypeParam("A".to_owned());
        let cyclic = CelType::List(Box::new(CelType::TypeParam("A".to_owned())));
        assert!(!is_assignable(&mut mapping, &param, &cyclic));
    }

    #[test]
    fn null_is_assignable_to_message_and_temporal_types() {
        let mut mapping = TypeMapping::new();
        assert!(is_assignable(&mut mapping, &CelType::Struct("a.B".to_owned()), &CelType::Null));
        assert!(is_assignable(&mut mapping, &CelType::Duration, &CelType::Null));
        assert!(is_assignable(&mut mapping, &CelType::Timestamp, &CelType::Null));
        assert!(is_assignable(&mut mapping, &CelType::optional(CelType::Int), &CelType::Null));
        assert!(!is_assignable(&mut mapping, &CelType::Int, &CelType::Null));
    }

    #[test]
    fn wrapper_messages_compare_as_their_primitive() {
        let mut mapping = TypeMapping::new();
        let wrapper = CelType::Struct("google.protobuf.Int64Value".to_owned());
        assert!(is_assignable(&mut mapping, &wrapper, &CelType::Int));
        assert!(is_assignable(&mut mapping, &CelType::Int, &wrapper));
        assert!(is_assignable(&mut mapping, &wrapper, &CelType::Null));
    }

    #[test]
    fn enum_is_assignable_to_int() {
        let mut mapping = TypeMapping::new();
        let color = CelType::enum_type("test.Color");
        assert!(is_assignable(&mut mapping, &CelType::Int, &color));
        assert!(!is_assignable(&mut mapping, &CelType::Uint, &color));
    }

    #[test]
    fn join_of_null_and_message_is_message() {
        let message = CelType::Struct("a.B".to_owned());
        assert_eq!(join_types(&CelType::Null, &message), message);
    }

    #[test]
    fn join_of_unequal_primitives_is_dyn() {
        assert_eq!(join_types(&CelType::Int, &CelType::String), CelType::Dyn);
        let ints = CelType::List(Box::new(CelType::Int));
        let strings = CelType::List(Box::new(CelType::String));
        assert_eq!(join_types(&ints, &strings), CelType::List(Box::new(CelType::Dyn)));
    }

    #[test]
    fn display_formats_parametric_types() {
        let map = CelType::Map(Box::new(CelType::String), Box::new(CelType::Dyn));
        assert_eq!(map.to_string(), "map(string, dyn)");
        assert_eq!(CelType::optional(CelType::Int).to_string(), "optional_type(int)");
        assert_eq!(CelType::Type(Box::new(CelType::Dyn)).to_string(), "type");
    }
}
