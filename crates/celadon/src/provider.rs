//! The type-provider capability.
//!
//! The checker and interpreter reach struct/enum ecosystems (protobuf or
//! otherwise) only through this interface, so the core never depends on a
//! message runtime. [`DeclaredTypeProvider`] is the built-in implementation
//! backed by struct and enum declarations registered on the environment.

use indexmap::IndexMap;

use crate::{
    decls::{EnumDecl, StructDecl},
    types::CelType,
    value::{Value, zero_value},
};

/// Host capability resolving struct and enum types by qualified name.
///
/// Implementations must be cheap to query; the checker probes candidate
/// names in container order on every unqualified reference.
pub trait TypeProvider: std::fmt::Debug + Send + Sync {
    /// The struct type for a qualified name, if this provider knows it.
    fn find_struct_type(&self, name: &str) -> Option<CelType>;

    /// The enum type for a qualified name.
    fn find_enum_type(&self, name: &str) -> Option<CelType>;

    /// The declared type of `field` on the struct named `type_name`.
    fn find_struct_field_type(&self, type_name: &str, field: &str) -> Option<CelType>;

    /// All field names of a struct, for diagnostics.
    fn struct_field_names(&self, type_name: &str) -> Vec<String>;

    /// The integer value of an enum constant.
    fn find_enum_value(&self, enum_name: &str, value_name: &str) -> Option<i64>;

    /// The wire-level field type name, when the backing schema has one.
    fn field_proto_type(&self, _type_name: &str, _field: &str) -> Option<String> {
        None
    }

    /// Whether the field belongs to a oneof group.
    fn field_is_oneof(&self, _type_name: &str, _field: &str) -> bool {
        false
    }

    /// Whether the field tracks explicit presence (proto2 scalars and proto3
    /// `optional` do; plain proto3 scalars do not).
    fn field_has_presence(&self, type_name: &str, field: &str) -> bool;

    /// The default value read when selecting an unset field.
    fn find_struct_field_default(&self, type_name: &str, field: &str) -> Option<Value>;
}

/// Provider over the environment's own struct and enum declarations.
///
/// Declared structs always track presence explicitly (a field is present iff
/// the input set it), and unset fields default to the typed zero value.
#[derive(Debug, Clone, Default)]
pub struct DeclaredTypeProvider {
    structs: IndexMap<String, StructDecl>,
    enums: IndexMap<String, EnumDecl>,
}

impl DeclaredTypeProvider {
    #[must_use]
    pub fn new(structs: Vec<StructDecl>, enums: Vec<EnumDecl>) -> Self {
        Self {
            structs: structs.into_iter().map(|s| (s.name.clone(), s)).collect(),
            enums: enums.into_iter().map(|e| (e.name.clone(), e)).collect(),
        }
    }

    pub fn add_struct(&mut self, decl: StructDecl) {
        self.structs.insert(decl.name.clone(), decl);
    }

    pub fn add_enum(&mut self, decl: EnumDecl) {
        self.enums.insert(decl.name.clone(), decl);
    }

    #[must_use]
    pub fn struct_decl(&self, name: &str) -> Option<&StructDecl> {
        self.structs.get(name)
    }

    #[must_use]
    pub fn enum_decl(&self, name: &str) -> Option<&EnumDecl> {
        self.enums.get(name)
    }
}

impl TypeProvider for DeclaredTypeProvider {
    fn find_struct_type(&self, name: &str) -> Option<CelType> {
        self.structs.get(name).map(|decl| CelType::Struct(decl.name.clone()))
    }

    fn find_enum_type(&self, name: &str) -> Option<CelType> {
        self.enums.get(name).map(|decl| CelType::enum_type(&decl.name))
    }

    fn find_struct_field_type(&self, type_name: &str, field: &str) -> Option<CelType> {
        self.structs
            .get(type_name)
            .and_then(|decl| decl.field(field))
            .map(|f| f.ty.clone())
    }

    fn struct_field_names(&self, type_name: &str) -> Vec<String> {
        self.structs
            .get(type_name)
            .map(|decl| decl.fields.iter().map(|f| f.name.clone()).collect())
            .unwrap_or_default()
    }

    fn find_enum_value(&self, enum_name: &str, value_name: &str) -> Option<i64> {
        self.enums.get(enum_name).and_then(|decl| {
            decl.values
                .iter()
                .find(|(name, _)| name == value_name)
                .map(|(_, value)| *value)
        })
    }

    fn field_has_presence(&self, type_name: &str, field: &str) -> bool {
        self.find_struct_field_type(type_name, field).is_some()
    }

    fn find_struct_field_default(&self, type_name: &str, field: &str) -> Option<Value> {
        self.find_struct_field_type(type_name, field)
            .map(|ty| zero_value(&ty))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decls::FieldDecl;

    fn provider() -> DeclaredTypeProvider {
        DeclaredTypeProvider::new(
            vec![StructDecl::new(
                "test.Person",
                vec![
                    FieldDecl::new("name", CelType::String),
                    FieldDecl::new("age", CelType::Int),
                ],
            )],
            vec![EnumDecl::new("test.Color", vec![("RED".to_owned(), 0), ("BLUE".to_owned(), 2)])],
        )
    }

    #[test]
    fn struct_and_field_lookup() {
        let provider = provider();
        assert_eq!(
            provider.find_struct_type("test.Person"),
            Some(CelType::Struct("test.Person".to_owned()))
        );
        assert_eq!(
            provider.find_struct_field_type("test.Person", "age"),
            Some(CelType::Int)
        );
        assert_eq!(provider.find_struct_field_type("test.Person", "height"), None);
        assert_eq!(provider.struct_field_names("test.Person"), vec!["name", "age"]);
    }

    #[test]
    fn enum_lookup() {
        let provider = provider();
        assert_eq!(provider.find_enum_type("test.Color"), Some(CelType::enum_type("test.Color")));
        assert_eq!(provider.find_enum_value("test.Color", "BLUE"), Some(2));
        assert_eq!(provider.find_enum_value("test.Color", "GREEN"), None);
    }

    #[test]
    fn defaults_are_typed_zeros() {
        let provider = provider();
        let default = provider.find_struct_field_default("test.Person", "name").unwrap();
        assert!(default.equals(&Value::string("")));
    }
}
