//! The runtime value lattice.
//!
//! One tagged enum covers every value a program can produce. Payloads that
//! can be shared are behind `Arc`, so values are cheap to clone and safe to
//! hand across threads once built. Runtime errors travel in the `Err` arm of
//! [`EvalResult`] as [`ErrorValue`]; unknowns and optionals are ordinary
//! variants that propagate through operations by explicit rules.

use std::{cmp::Ordering, collections::BTreeSet, fmt, hash::Hash, sync::Arc};

use indexmap::IndexMap;

use crate::{
    ast::ExprId,
    intern,
    temporal::{CelDuration, CelTimestamp},
    types::CelType,
};

/// Result alias for operations that can produce a runtime error.
pub type EvalResult<T = Value> = Result<T, ErrorValue>;

/// A runtime error: a message plus the id of the offending expression so the
/// embedding API can attach a source position.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorValue {
    pub message: String,
    pub expr_id: Option<ExprId>,
}

impl ErrorValue {
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            expr_id: None,
        }
    }

    /// Attaches the expression id unless an inner error already set one; the
    /// innermost location is the useful one.
    #[must_use]
    pub fn at(mut self, id: ExprId) -> Self {
        if self.expr_id.is_none() {
            self.expr_id = Some(id);
        }
        self
    }

    #[must_use]
    pub fn divide_by_zero() -> Self {
        Self::new("division by zero")
    }

    #[must_use]
    pub fn modulus_by_zero() -> Self {
        Self::new("modulus by zero")
    }

    #[must_use]
    pub fn int_overflow() -> Self {
        Self::new("int overflow")
    }

    #[must_use]
    pub fn uint_overflow() -> Self {
        Self::new("uint overflow")
    }

    #[must_use]
    pub fn no_such_overload(detail: impl fmt::Display) -> Self {
        Self::new(format!("no such overload: {detail}"))
    }

    #[must_use]
    pub fn no_such_key(key: impl fmt::Display) -> Self {
        Self::new(format!("no such key: {key}"))
    }

    #[must_use]
    pub fn no_such_field(field: &str) -> Self {
        Self::new(format!("no such field: {field}"))
    }

    #[must_use]
    pub fn index_out_of_bounds(index: i64, len: usize) -> Self {
        Self::new(format!("index out of bounds: {index} (size {len})"))
    }
}

impl fmt::Display for ErrorValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

/// Map keys: bool, int, uint, and string. Numerically equal int and uint
/// keys are the same key, which the manual `Hash`/`Eq` below preserve.
#[derive(Debug, Clone)]
pub enum MapKey {
    Bool(bool),
    Int(i64),
    Uint(u64),
    String(Arc<str>),
}

impl MapKey {
    /// Builds a key from a value, rejecting unsupported key types.
    pub fn from_value(value: &Value) -> EvalResult<Self> {
        match value {
            Value::Bool(v) => Ok(Self::Bool(*v)),
            Value::Int(v) => Ok(Self::Int(*v)),
            Value::Uint(v) => Ok(Self::Uint(*v)),
            Value::String(v) => Ok(Self::String(v.clone())),
            other => Err(ErrorValue::new(format!(
                "unsupported map key type: {}",
                other.type_of()
            ))),
        }
    }

    #[must_use]
    pub fn to_value(&self) -> Value {
        match self {
            Self::Bool(v) => Value::Bool(*v),
            Self::Int(v) => Value::Int(*v),
            Self::Uint(v) => Value::Uint(*v),
            Self::String(v) => Value::String(v.clone()),
        }
    }
}

impl PartialEq for MapKey {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Uint(a), Self::Uint(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Int(a), Self::Uint(b)) | (Self::Uint(b), Self::Int(a)) => {
                u64::try_from(*a).is_ok_and(|a| a == *b)
            }
            _ => false,
        }
    }
}

impl Eq for MapKey {}

impl Hash for MapKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        // Non-negative ints hash like the equal uint so cross-numeric keys
        // land in the same bucket.
        match self {
            Self::Bool(v) => {
                state.write_u8(0);
                v.hash(state);
            }
            Self::Int(v) => {
                if let Ok(unsigned) = u64::try_from(*v) {
                    state.write_u8(1);
                    unsigned.hash(state);
                } else {
                    state.write_u8(2);
                    v.hash(state);
                }
            }
            Self::Uint(v) => {
                state.write_u8(1);
                v.hash(state);
            }
            Self::String(v) => {
                state.write_u8(3);
                v.hash(state);
            }
        }
    }
}

impl fmt::Display for MapKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}"),
            Self::String(v) => write!(f, "{v}"),
        }
    }
}

/// An insertion-ordered map value.
#[derive(Debug, Clone, Default)]
pub struct MapValue {
    entries: IndexMap<MapKey, Value>,
}

impl MapValue {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: IndexMap::with_capacity(capacity),
        }
    }

    /// Inserts, replacing any existing entry for an equal key.
    pub fn insert(&mut self, key: MapKey, value: Value) {
        self.entries.insert(key, value);
    }

    #[must_use]
    pub fn get(&self, key: &MapKey) -> Option<&Value> {
        self.entries.get(key)
    }

    #[must_use]
    pub fn contains_key(&self, key: &MapKey) -> bool {
        self.entries.contains_key(key)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&MapKey, &Value)> {
        self.entries.iter()
    }

    pub fn keys(&self) -> impl Iterator<Item = &MapKey> {
        self.entries.keys()
    }
}

/// A struct (message) value. Presence is "field appears in the map"; unset
/// fields read through the type provider's defaults.
#[derive(Debug, Clone)]
pub struct StructValue {
    pub type_name: String,
    pub fields: IndexMap<String, Value>,
}

impl StructValue {
    #[must_use]
    pub fn new(type_name: impl Into<String>) -> Self {
        Self {
            type_name: type_name.into(),
            fields: IndexMap::new(),
        }
    }

    #[must_use]
    pub fn has_field(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    #[must_use]
    pub fn field(&self, field: &str) -> Option<&Value> {
        self.fields.get(field)
    }
}

/// An enum constant: its type name and integer value.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnumValue {
    pub type_name: String,
    pub value: i64,
}

/// The set of attributes an evaluation could not resolve.
///
/// Unknowns propagate like errors but merge: combining two unknowns unions
/// their attribute sets.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct UnknownSet {
    attributes: BTreeSet<String>,
}

impl UnknownSet {
    #[must_use]
    pub fn single(attribute: impl Into<String>) -> Self {
        let mut attributes = BTreeSet::new();
        attributes.insert(attribute.into());
        Self { attributes }
    }

    #[must_use]
    pub fn union(&self, other: &Self) -> Self {
        Self {
            attributes: self.attributes.union(&other.attributes).cloned().collect(),
        }
    }

    pub fn attributes(&self) -> impl Iterator<Item = &str> {
        self.attributes.iter().map(String::as_str)
    }
}

impl fmt::Display for UnknownSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown{{")?;
        for (index, attr) in self.attributes.iter().enumerate() {
            if index > 0 {
                write!(f, ", ")?;
            }
            write!(f, "{attr}")?;
        }
        write!(f, "}}")
    }
}

/// `optional.of(v)` / `optional.none()`.
#[derive(Debug, Clone, Default)]
pub struct OptionalValue {
    inner: Option<Value>,
}

impl OptionalValue {
    #[must_use]
    pub fn of(value: Value) -> Self {
        Self { inner: Some(value) }
    }

    #[must_use]
    pub fn none() -> Self {
        Self { inner: None }
    }

    #[must_use]
    pub fn has_value(&self) -> bool {
        self.inner.is_some()
    }

    #[must_use]
    pub fn as_inner(&self) -> Option<&Value> {
        self.inner.as_ref()
    }
}

/// A runtime CEL value.
#[derive(Debug, Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Uint(u64),
    Double(f64),
    String(Arc<str>),
    Bytes(Arc<[u8]>),
    Null,
    List(Arc<[Value]>),
    Map(Arc<MapValue>),
    Struct(Arc<StructValue>),
    Enum(Arc<EnumValue>),
    Duration(CelDuration),
    Timestamp(CelTimestamp),
    /// A first-class type value, produced by `type(x)` and type names.
    Type(CelType),
    Optional(Arc<OptionalValue>),
    Unknown(Arc<UnknownSet>),
}

impl Value {
    #[must_use]
    pub fn string(text: &str) -> Self {
        if text.is_empty() {
            Self::String(intern::empty_string())
        } else {
            Self::String(Arc::from(text))
        }
    }

    #[must_use]
    pub fn bytes(data: &[u8]) -> Self {
        if data.is_empty() {
            Self::Bytes(intern::empty_bytes())
        } else {
            Self::Bytes(Arc::from(data))
        }
    }

    #[must_use]
    pub fn list(elements: Vec<Value>) -> Self {
        if elements.is_empty() {
            Self::List(intern::empty_list())
        } else {
            Self::List(Arc::from(elements))
        }
    }

    #[must_use]
    pub fn map(map: MapValue) -> Self {
        if map.is_empty() {
            Self::Map(intern::empty_map())
        } else {
            Self::Map(Arc::new(map))
        }
    }

    #[must_use]
    pub fn optional_of(value: Value) -> Self {
        Self::Optional(Arc::new(OptionalValue::of(value)))
    }

    #[must_use]
    pub fn optional_none() -> Self {
        Self::Optional(Arc::new(OptionalValue::none()))
    }

    #[must_use]
    pub fn unknown(attribute: impl Into<String>) -> Self {
        Self::Unknown(Arc::new(UnknownSet::single(attribute)))
    }

    #[must_use]
    pub fn is_unknown(&self) -> bool {
        matches!(self, Self::Unknown(_))
    }

    /// The runtime type, as reported by `type(x)`.
    #[must_use]
    pub fn type_of(&self) -> CelType {
        match self {
            Self::Bool(_) => CelType::Bool,
            Self::Int(_) => CelType::Int,
            Self::Uint(_) => CelType::Uint,
            Self::Double(_) => CelType::Double,
            Self::String(_) => CelType::String,
            Self::Bytes(_) => CelType::Bytes,
            Self::Null => CelType::Null,
            Self::List(_) => CelType::List(Box::new(CelType::Dyn)),
            Self::Map(_) => CelType::Map(Box::new(CelType::Dyn), Box::new(CelType::Dyn)),
            Self::Struct(s) => CelType::Struct(s.type_name.clone()),
            Self::Enum(e) => CelType::enum_type(&e.type_name),
            Self::Duration(_) => CelType::Duration,
            Self::Timestamp(_) => CelType::Timestamp,
            // Every type value has the same type, `type`.
            Self::Type(_) => CelType::Type(Box::new(CelType::Dyn)),
            Self::Optional(_) => CelType::optional(CelType::Dyn),
            Self::Unknown(_) => CelType::Dyn,
        }
    }

    /// Strict boolean extraction for conditions.
    pub fn as_bool(&self) -> EvalResult<bool> {
        match self {
            Self::Bool(v) => Ok(*v),
            other => Err(ErrorValue::new(format!(
                "no such overload: expected bool, found {}",
                other.type_of()
            ))),
        }
    }

    /// Value equality per CEL: cross-numeric comparison, deep equality for
    /// aggregates, and `false` (not an error) across unequal kinds.
    #[must_use]
    pub fn equals(&self, other: &Value) -> bool {
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => a == b,
            (Self::Int(a), Self::Int(b)) => a == b,
            (Self::Uint(a), Self::Uint(b)) => a == b,
            (Self::Double(a), Self::Double(b)) => a == b,
            (Self::Int(a), Self::Uint(b)) | (Self::Uint(b), Self::Int(a)) => {
                u64::try_from(*a).is_ok_and(|a| a == *b)
            }
            (Self::Int(a), Self::Double(b)) | (Self::Double(b), Self::Int(a)) => (*a as f64) == *b,
            (Self::Uint(a), Self::Double(b)) | (Self::Double(b), Self::Uint(a)) => (*a as f64) == *b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Bytes(a), Self::Bytes(b)) => a == b,
            (Self::Null, Self::Null) => true,
            (Self::List(a), Self::List(b)) => {
                a.len() == b.len() && a.iter().zip(b.iter()).all(|(x, y)| x.equals(y))
            }
            (Self::Map(a), Self::Map(b)) => {
                a.len() == b.len()
                    && a.iter()
                        .all(|(key, value)| b.get(key).is_some_and(|other| value.equals(other)))
            }
            (Self::Struct(a), Self::Struct(b)) => {
                a.type_name == b.type_name
                    && a.fields.len() == b.fields.len()
                    && a.fields
                        .iter()
                        .all(|(name, value)| b.field(name).is_some_and(|other| value.equals(other)))
            }
            (Self::Enum(a), Self::Enum(b)) => a == b,
            // Enums compare with ints by value.
            (Self::Enum(a), Self::Int(b)) | (Self::Int(b), Self::Enum(a)) => a.value == *b,
            (Self::Duration(a), Self::Duration(b)) => a == b,
            (Self::Timestamp(a), Self::Timestamp(b)) => a == b,
            (Self::Type(a), Self::Type(b)) => a == b,
            (Self::Optional(a), Self::Optional(b)) => match (a.as_inner(), b.as_inner()) {
                (Some(x), Some(y)) => x.equals(y),
                (None, None) => true,
                _ => false,
            },
            _ => false,
        }
    }

    /// Ordering for the relational operators.
    ///
    /// Defined for the numeric cross-pairs, strings, bytes, bool, and the
    /// temporal types; `NaN` comparisons and cross-kind pairs are errors.
    pub fn compare(&self, other: &Value) -> EvalResult<Ordering> {
        let mismatch = || {
            ErrorValue::new(format!(
                "no such overload: {} <> {}",
                self.type_of(),
                other.type_of()
            ))
        };
        match (self, other) {
            (Self::Bool(a), Self::Bool(b)) => Ok(a.cmp(b)),
            (Self::Int(a), Self::Int(b)) => Ok(a.cmp(b)),
            (Self::Uint(a), Self::Uint(b)) => Ok(a.cmp(b)),
            (Self::Double(a), Self::Double(b)) => a.partial_cmp(b).ok_or_else(nan_error),
            (Self::Int(a), Self::Uint(b)) => Ok(compare_int_uint(*a, *b)),
            (Self::Uint(a), Self::Int(b)) => Ok(compare_int_uint(*b, *a).reverse()),
            (Self::Int(a), Self::Double(b)) => (*a as f64).partial_cmp(b).ok_or_else(nan_error),
            (Self::Double(a), Self::Int(b)) => a.partial_cmp(&(*b as f64)).ok_or_else(nan_error),
            (Self::Uint(a), Self::Double(b)) => (*a as f64).partial_cmp(b).ok_or_else(nan_error),
            (Self::Double(a), Self::Uint(b)) => a.partial_cmp(&(*b as f64)).ok_or_else(nan_error),
            (Self::String(a), Self::String(b)) => Ok(a.cmp(b)),
            (Self::Bytes(a), Self::Bytes(b)) => Ok(a.cmp(b)),
            (Self::Duration(a), Self::Duration(b)) => Ok(a.cmp(b)),
            (Self::Timestamp(a), Self::Timestamp(b)) => Ok(a.cmp(b)),
            _ => Err(mismatch()),
        }
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Self::Bool(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Self::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Self::Int(i64::from(v))
    }
}

impl From<u64> for Value {
    fn from(v: u64) -> Self {
        Self::Uint(v)
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Self::Double(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Self::string(v)
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Self::string(&v)
    }
}

impl From<&[u8]> for Value {
    fn from(v: &[u8]) -> Self {
        Self::bytes(v)
    }
}

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Self::list(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        match v {
            Some(inner) => inner.into(),
            None => Self::Null,
        }
    }
}

fn nan_error() -> ErrorValue {
    ErrorValue::new("NaN values are not ordered")
}

fn compare_int_uint(signed: i64, unsigned: u64) -> Ordering {
    match u64::try_from(signed) {
        Ok(value) => value.cmp(&unsigned),
        Err(_) => Ordering::Less,
    }
}

/// The typed zero value used when selecting an unset struct field.
///
/// Scalars get their zero, collections are empty, wrapper messages are
/// `null`, enums are their zero constant, and nested messages recurse to an
/// empty message.
#[must_use]
pub fn zero_value(ty: &CelType) -> Value {
    match ty {
        CelType::Bool => Value::Bool(false),
        CelType::Int => Value::Int(0),
        CelType::Uint => Value::Uint(0),
        CelType::Double => Value::Double(0.0),
        CelType::String => Value::String(intern::empty_string()),
        CelType::Bytes => Value::Bytes(intern::empty_bytes()),
        CelType::List(_) => Value::List(intern::empty_list()),
        CelType::Map(..) => Value::Map(intern::empty_map()),
        CelType::Duration | CelType::Timestamp | CelType::Null => Value::Null,
        CelType::Struct(name) => {
            if CelType::wrapper_primitive(name).is_some() {
                Value::Null
            } else {
                Value::Struct(Arc::new(StructValue::new(name.clone())))
            }
        }
        CelType::Opaque(name, params) if params.is_empty() => Value::Enum(Arc::new(EnumValue {
            type_name: name.clone(),
            value: 0,
        })),
        opt if opt.is_optional() => Value::optional_none(),
        _ => Value::Null,
    }
}

impl fmt::Display for Value {
    /// Diagnostic rendering used in error messages; `string()` conversion has
    /// its own, stricter formatting in the standard library.
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::Int(v) => write!(f, "{v}"),
            Self::Uint(v) => write!(f, "{v}u"),
            Self::Double(v) => write!(f, "{}", ryu::Buffer::new().format(*v)),
            Self::String(v) => write!(f, "\"{v}\""),
            Self::Bytes(v) => write!(f, "b\"{}\"", v.escape_ascii()),
            Self::Null => write!(f, "null"),
            Self::List(elements) => {
                write!(f, "[")?;
                for (index, element) in elements.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{element}")?;
                }
                write!(f, "]")
            }
            Self::Map(map) => {
                write!(f, "{{")?;
                for (index, (key, value)) in map.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{key}: {value}")?;
                }
                write!(f, "}}")
            }
            Self::Struct(s) => {
                write!(f, "{}{{", s.type_name)?;
                for (index, (name, value)) in s.fields.iter().enumerate() {
                    if index > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{name}: {value}")?;
                }
                write!(f, "}}")
            }
            Self::Enum(e) => write!(f, "{}({})", e.type_name, e.value),
            Self::Duration(d) => write!(f, "{d}"),
            Self::Timestamp(t) => write!(f, "{t}"),
            Self::Type(t) => write!(f, "{t}"),
            Self::Optional(o) => match o.as_inner() {
                Some(value) => write!(f, "optional.of({value})"),
                None => write!(f, "optional.none()"),
            },
            Self::Unknown(u) => write!(f, "{u}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cross_numeric_equality() {
        assert!(Value::Int(3).equals(&Value::Uint(3)));
        assert!(Value::Int(3).equals(&Value::Double(3.0)));
        assert!(Value::Uint(3).equals(&Value::Double(3.0)));
        assert!(!Value::Int(-1).equals(&Value::Uint(u64::MAX)));
        assert!(!Value::Int(1).equals(&Value::string("1")));
    }

    #[test]
    fn different_kinds_are_unequal_not_errors() {
        assert!(!Value::Bool(true).equals(&Value::Int(1)));
        assert!(!Value::Null.equals(&Value::Int(0)));
    }

    #[test]
    fn nan_comparison_is_an_error() {
        let err = Value::Double(f64::NAN).compare(&Value::Double(1.0)).unwrap_err();
        assert!(err.message.contains("NaN"));
        // Equality with NaN is false, not an error.
        assert!(!Value::Double(f64::NAN).equals(&Value::Double(f64::NAN)));
    }

    #[test]
    fn int_uint_ordering_handles_negatives() {
        assert_eq!(Value::Int(-1).compare(&Value::Uint(0)).unwrap(), Ordering::Less);
        assert_eq!(Value::Uint(0).compare(&Value::Int(-1)).unwrap(), Ordering::Greater);
        assert_eq!(Value::Int(5).compare(&Value::Uint(5)).unwrap(), Ordering::Equal);
    }

    #[test]
    fn bytes_compare_lexicographically() {
        let a = Value::bytes(b"abc");
        let b = Value::bytes(b"abd");
        assert_eq!(a.compare(&b).unwrap(), Ordering::Less);
    }

    #[test]
    fn map_keys_unify_int_and_uint() {
        let mut map = MapValue::new();
        map.insert(MapKey::Int(1), Value::string("a"));
        map.insert(MapKey::Uint(1), Value::string("b"));
        assert_eq!(map.len(), 1);
        assert!(map.get(&MapKey::Uint(1)).is_some_and(|v| v.equals(&Value::string("b"))));
    }

    #[test]
    fn unknowns_merge_by_union() {
        let a = UnknownSet::single("x");
        let b = UnknownSet::single("y");
        let merged = a.union(&b);
        assert_eq!(merged.attributes().collect::<Vec<_>>(), vec!["x", "y"]);
        assert_eq!(merged.union(&a), merged);
    }

    #[test]
    fn zero_values_follow_field_types() {
        assert!(zero_value(&CelType::Int).equals(&Value::Int(0)));
        assert!(zero_value(&CelType::String).equals(&Value::string("")));
        assert!(zero_value(&CelType::List(Box::new(CelType::Int))).equals(&Value::list(vec![])));
        assert!(zero_value(&CelType::Struct("google.protobuf.Int64Value".to_owned())).equals(&Value::Null));
        assert!(matches!(zero_value(&CelType::Struct("a.B".to_owned())), Value::Struct(_)));
        assert!(matches!(zero_value(&CelType::enum_type("a.Color")), Value::Enum(_)));
    }
}
