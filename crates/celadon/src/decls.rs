//! Declarations: variables, constants, functions, structs, enums, and the
//! name-resolution machinery (container candidates and scope stacks) shared
//! by the checker and the interpreter.

use ahash::{AHashMap, AHashSet};
use indexmap::IndexMap;

use crate::{types::CelType, value::Value};

/// A typed variable declaration.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct VariableDecl {
    pub name: String,
    pub ty: CelType,
}

impl VariableDecl {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: CelType) -> Self {
        Self { name: name.into(), ty }
    }
}

/// A typed constant, folded into literal references at check time.
#[derive(Debug, Clone)]
pub struct ConstantDecl {
    pub name: String,
    pub ty: CelType,
    pub value: Value,
}

impl ConstantDecl {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: CelType, value: Value) -> Self {
        Self {
            name: name.into(),
            ty,
            value,
        }
    }
}

/// One typed signature of a function.
///
/// The id (e.g. `add_int64`) keys both the checker's resolution result and
/// the dispatcher's implementation table.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct OverloadDecl {
    pub id: String,
    pub arg_types: Vec<CelType>,
    pub result_type: CelType,
    /// Declared type-parameter names; freshly renamed per resolution attempt.
    pub type_params: Vec<String>,
    /// Member (receiver-style) overloads take the target as argument zero.
    pub is_member: bool,
}

impl OverloadDecl {
    #[must_use]
    pub fn global(id: impl Into<String>, arg_types: Vec<CelType>, result_type: CelType) -> Self {
        let mut decl = Self {
            id: id.into(),
            arg_types,
            result_type,
            type_params: Vec::new(),
            is_member: false,
        };
        decl.collect_params();
        decl
    }

    #[must_use]
    pub fn member(id: impl Into<String>, arg_types: Vec<CelType>, result_type: CelType) -> Self {
        let mut decl = Self {
            id: id.into(),
            arg_types,
            result_type,
            type_params: Vec::new(),
            is_member: true,
        };
        decl.collect_params();
        decl
    }

    fn collect_params(&mut self) {
        let mut params = Vec::new();
        for arg in &self.arg_types {
            arg.collect_type_params(&mut params);
        }
        self.result_type.collect_type_params(&mut params);
        self.type_params = params;
    }
}

/// A function with an insertion-ordered set of overloads.
///
/// Overloads are keyed by id; re-adding an id replaces the earlier signature.
/// Ids in the disabled set stay declared but do not resolve, which is how
/// feature gates switch individual signatures off.
#[derive(Debug, Clone, Default)]
pub struct FunctionDecl {
    pub name: String,
    overloads: IndexMap<String, OverloadDecl>,
    disabled: AHashSet<String>,
}

impl FunctionDecl {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            overloads: IndexMap::new(),
            disabled: AHashSet::new(),
        }
    }

    pub fn add_overload(&mut self, overload: OverloadDecl) {
        self.overloads.insert(overload.id.clone(), overload);
    }

    #[must_use]
    pub fn with_overload(mut self, overload: OverloadDecl) -> Self {
        self.add_overload(overload);
        self
    }

    pub fn disable_overload(&mut self, id: &str) {
        self.disabled.insert(id.to_owned());
    }

    /// Enabled overloads in insertion order.
    pub fn overloads(&self) -> impl Iterator<Item = &OverloadDecl> {
        self.overloads.values().filter(|o| !self.disabled.contains(&o.id))
    }

    #[must_use]
    pub fn find_overload(&self, id: &str) -> Option<&OverloadDecl> {
        self.overloads.get(id).filter(|o| !self.disabled.contains(id))
    }

    /// Merges `other`'s overloads into `self`, additively: an overload id
    /// already present is kept, never shadowed.
    pub fn merge(&mut self, other: &FunctionDecl) {
        for overload in other.overloads() {
            if !self.overloads.contains_key(&overload.id) {
                self.overloads.insert(overload.id.clone(), overload.clone());
            }
        }
    }
}

/// A struct schema declared directly on the environment (as opposed to one
/// served by an external type provider).
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct StructDecl {
    pub name: String,
    pub fields: Vec<FieldDecl>,
}

impl StructDecl {
    #[must_use]
    pub fn new(name: impl Into<String>, fields: Vec<FieldDecl>) -> Self {
        Self {
            name: name.into(),
            fields,
        }
    }

    #[must_use]
    pub fn field(&self, name: &str) -> Option<&FieldDecl> {
        self.fields.iter().find(|f| f.name == name)
    }
}

#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct FieldDecl {
    pub name: String,
    pub ty: CelType,
}

impl FieldDecl {
    #[must_use]
    pub fn new(name: impl Into<String>, ty: CelType) -> Self {
        Self { name: name.into(), ty }
    }
}

/// An enum declared on the environment: named constants over an int value.
#[derive(Debug, Clone, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct EnumDecl {
    pub name: String,
    pub values: Vec<(String, i64)>,
}

impl EnumDecl {
    #[must_use]
    pub fn new(name: impl Into<String>, values: Vec<(String, i64)>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }
}

/// A dotted namespace used to resolve partially qualified names.
#[derive(Debug, Clone, Default, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct Container {
    name: String,
}

impl Container {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Candidate fully-qualified names for `name`, most specific first.
    ///
    /// Container `a.b.c` with name `x.y` yields `[a.b.c.x.y, a.b.x.y,
    /// a.x.y, x.y]`. A leading dot forces the absolute name. A name that
    /// already starts with the container prefix, or a dotted name rooted
    /// outside the container, is tried as-given first.
    #[must_use]
    pub fn resolve_candidates(&self, name: &str) -> Vec<String> {
        if let Some(absolute) = name.strip_prefix('.') {
            return vec![absolute.to_owned()];
        }
        if self.name.is_empty() {
            return vec![name.to_owned()];
        }

        let mut candidates = Vec::new();
        let as_given_first = name.starts_with(&format!("{}.", self.name))
            || name == self.name
            || (name.contains('.') && name.split('.').next() != self.name.split('.').next());
        if as_given_first {
            candidates.push(name.to_owned());
        }
        let mut prefix = self.name.as_str();
        loop {
            candidates.push(format!("{prefix}.{name}"));
            match prefix.rfind('.') {
                Some(index) => prefix = &prefix[..index],
                None => break,
            }
        }
        if !as_given_first {
            candidates.push(name.to_owned());
        }
        candidates
    }
}

/// A declaration visible to `lookup_ident`: a variable or a foldable
/// constant.
#[derive(Debug, Clone)]
pub enum IdentDecl {
    Variable(VariableDecl),
    Constant(ConstantDecl),
}

impl IdentDecl {
    #[must_use]
    pub fn name(&self) -> &str {
        match self {
            Self::Variable(v) => &v.name,
            Self::Constant(c) => &c.name,
        }
    }

    #[must_use]
    pub fn ty(&self) -> &CelType {
        match self {
            Self::Variable(v) => &v.ty,
            Self::Constant(c) => &c.ty,
        }
    }
}

/// A stack of declaration maps.
///
/// The base layer holds the environment's declarations; the checker pushes a
/// layer per comprehension for the iteration and accumulator variables. The
/// interpreter keeps its own runtime equivalent in the activation layers.
#[derive(Debug, Clone, Default)]
pub struct Scopes {
    stack: Vec<ScopeLayer>,
}

#[derive(Debug, Clone, Default)]
struct ScopeLayer {
    idents: AHashMap<String, IdentDecl>,
    functions: AHashMap<String, FunctionDecl>,
}

impl Scopes {
    #[must_use]
    pub fn new() -> Self {
        Self {
            stack: vec![ScopeLayer::default()],
        }
    }

    pub fn enter_scope(&mut self) {
        self.stack.push(ScopeLayer::default());
    }

    pub fn exit_scope(&mut self) {
        assert!(self.stack.len() > 1, "cannot exit the base scope");
        self.stack.pop();
    }

    pub fn add_ident(&mut self, decl: IdentDecl) {
        let layer = self.stack.last_mut().expect("scope stack is never empty");
        layer.idents.insert(decl.name().to_owned(), decl);
    }

    /// Innermost declaration for `name`.
    #[must_use]
    pub fn find_ident(&self, name: &str) -> Option<&IdentDecl> {
        self.stack.iter().rev().find_map(|layer| layer.idents.get(name))
    }

    pub fn add_function(&mut self, decl: FunctionDecl) {
        let layer = self.stack.last_mut().expect("scope stack is never empty");
        match layer.functions.get_mut(&decl.name) {
            Some(existing) => existing.merge(&decl),
            None => {
                layer.functions.insert(decl.name.clone(), decl);
            }
        }
    }

    /// Function declaration for `name`, merging overloads found in outer
    /// scopes into the innermost copy (inner ids win).
    #[must_use]
    pub fn find_function(&self, name: &str) -> Option<FunctionDecl> {
        let mut merged: Option<FunctionDecl> = None;
        for layer in self.stack.iter().rev() {
            if let Some(decl) = layer.functions.get(name) {
                match &mut merged {
                    Some(inner) => inner.merge(decl),
                    None => merged = Some(decl.clone()),
                }
            }
        }
        merged
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn container_candidates_descend_in_specificity() {
        let container = Container::new("a.b.c");
        assert_eq!(
            container.resolve_candidates("x.y"),
            vec!["a.b.c.x.y", "a.b.x.y", "a.x.y", "x.y"]
        );
    }

    #[test]
    fn leading_dot_is_absolute() {
        let container = Container::new("a.b");
        assert_eq!(container.resolve_candidates(".x.y"), vec!["x.y"]);
    }

    #[test]
    fn empty_container_yields_the_name() {
        let container = Container::new("");
        assert_eq!(container.resolve_candidates("x"), vec!["x"]);
    }

    #[test]
    fn container_prefixed_name_is_tried_as_given_first(){
        let container = Container::new("a.b");
        let candidates = container.resolve_candidates("a.b.x");
        assert_eq!(candidates[0], "a.b.x");
    }

    #[test]
    fn scope_layers_shadow_idents_but_merge_functions() {
        let mut scopes = Scopes::new();
        scopes.add_ident(IdentDecl::Variable(VariableDecl::new("x", CelType::Int)));
        let mut size = FunctionDecl::new("size");
        size.add_overload(OverloadDecl::global(
            "size_string",
            vec![CelType::String],
            CelType::Int,
        ));
        scopes.add_function(size);

        scopes.enter_scope();
        scopes.add_ident(IdentDecl::Variable(VariableDecl::new("x", CelType::String)));
        let mut inner_size = FunctionDecl::new("size");
        inner_size.add_overload(OverloadDecl::global(
            "size_list",
            vec![CelType::List(Box::new(CelType::TypeParam("A".to_owned())))],
            CelType::Int,
        ));
        scopes.add_function(inner_size);

        assert_eq!(scopes.find_ident("x").unwrap().ty(), &CelType::String);
        let merged = scopes.find_function("size").unwrap();
        assert_eq!(merged.overloads().count(), 2);

        scopes.exit_scope();
        assert_eq!(scopes.find_ident("x").unwrap().ty(), &CelType::Int);
        assert_eq!(scopes.find_function("size").unwrap().overloads().count(), 1);
    }

    #[test]
    fn overload_registration_replaces_by_id() {
        let mut decl = FunctionDecl::new("f");
        decl.add_overload(OverloadDecl::global("f_int", vec![CelType::Int], CelType::Int));
        decl.add_overload(OverloadDecl::global("f_int", vec![CelType::Int], CelType::String));
        assert_eq!(decl.overloads().count(), 1);
        assert_eq!(decl.find_overload("f_int").unwrap().result_type, CelType::String);
    }

    #[test]
    fn disabled_overloads_do_not_resolve() {
        let mut decl = FunctionDecl::new("f");
        decl.add_overload(OverloadDecl::global("f_int", vec![CelType::Int], CelType::Int));
        decl.disable_overload("f_int");
        assert_eq!(decl.overloads().count(), 0);
        assert!(decl.find_overload("f_int").is_none());
    }

    #[test]
    fn overload_decl_collects_type_params() {
        let decl = OverloadDecl::global(
            "index_map",
            vec![
                CelType::Map(
                    Box::new(CelType::TypeParam("K".to_owned())),
                    Box::new(CelType::TypeParam("V".to_owned())),
                ),
                CelType::TypeParam("K".to_owned()),
            ],
            CelType::TypeParam("V".to_owned()),
        );
        assert_eq!(decl.type_params, vec!["K".to_owned(), "V".to_owned()]);
    }
}
