//! Activations: the name→value bindings a program evaluates against.
//!
//! Layers compose: a lookup asks the innermost layer first and delegates
//! outward. Resolution returns `Option<EvalResult>` so a layer can answer
//! with a value, an unknown, or an error (strict mode), or decline entirely.

use std::{cell::RefCell, fmt, sync::Arc};

use ahash::{AHashMap, AHashSet};

use crate::value::{ErrorValue, EvalResult, Value};

/// A resolvable name scope.
///
/// `resolve` returns `None` when this activation (and its parents) have no
/// binding; the interpreter turns that into an "undeclared reference" error
/// at the use site.
pub trait Activation: fmt::Debug {
    fn resolve(&self, name: &str) -> Option<EvalResult>;

    fn parent(&self) -> Option<&dyn Activation> {
        None
    }
}

impl<A: Activation + ?Sized> Activation for &A {
    fn resolve(&self, name: &str) -> Option<EvalResult> {
        (**self).resolve(name)
    }

    fn parent(&self) -> Option<&dyn Activation> {
        (**self).parent()
    }
}

/// The empty activation: resolves nothing.
#[derive(Debug, Clone, Copy, Default)]
pub struct EmptyActivation;

impl Activation for EmptyActivation {
    fn resolve(&self, _name: &str) -> Option<EvalResult> {
        None
    }
}

/// Dictionary-backed bindings with an optional parent.
#[derive(Debug, Default)]
pub struct MapActivation {
    bindings: AHashMap<String, Value>,
    parent: Option<Arc<dyn Activation>>,
}

impl MapActivation {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_parent(parent: Arc<dyn Activation>) -> Self {
        Self {
            bindings: AHashMap::new(),
            parent: Some(parent),
        }
    }

    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.bindings.insert(name.into(), value.into());
        self
    }

    pub fn insert(&mut self, name: impl Into<String>, value: impl Into<Value>) {
        self.bindings.insert(name.into(), value.into());
    }
}

impl<S: Into<String>, V: Into<Value>> FromIterator<(S, V)> for MapActivation {
    fn from_iter<I: IntoIterator<Item = (S, V)>>(iter: I) -> Self {
        Self {
            bindings: iter.into_iter().map(|(k, v)| (k.into(), v.into())).collect(),
            parent: None,
        }
    }
}

impl Activation for MapActivation {
    fn resolve(&self, name: &str) -> Option<EvalResult> {
        match self.bindings.get(name) {
            Some(value) => Some(Ok(value.clone())),
            None => self.parent.as_ref().and_then(|p| p.resolve(name)),
        }
    }

    fn parent(&self) -> Option<&dyn Activation> {
        self.parent.as_deref()
    }
}

/// Bindings produced on first access from host thunks, then memoized.
///
/// Useful when conversion of a host value is expensive and a program may not
/// touch every variable.
pub struct LazyActivation {
    thunks: AHashMap<String, Box<dyn Fn() -> Value>>,
    memo: RefCell<AHashMap<String, Value>>,
    parent: Option<Arc<dyn Activation>>,
}

impl fmt::Debug for LazyActivation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LazyActivation")
            .field("names", &self.thunks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

impl LazyActivation {
    #[must_use]
    pub fn new() -> Self {
        Self {
            thunks: AHashMap::new(),
            memo: RefCell::new(AHashMap::new()),
            parent: None,
        }
    }

    #[must_use]
    pub fn with_parent(parent: Arc<dyn Activation>) -> Self {
        Self {
            thunks: AHashMap::new(),
            memo: RefCell::new(AHashMap::new()),
            parent: Some(parent),
        }
    }

    #[must_use]
    pub fn bind(mut self, name: impl Into<String>, thunk: impl Fn() -> Value + 'static) -> Self {
        self.thunks.insert(name.into(), Box::new(thunk));
        self
    }
}

impl Default for LazyActivation {
    fn default() -> Self {
        Self::new()
    }
}

impl Activation for LazyActivation {
    fn resolve(&self, name: &str) -> Option<EvalResult> {
        if let Some(value) = self.memo.borrow().get(name) {
            return Some(Ok(value.clone()));
        }
        if let Some(thunk) = self.thunks.get(name) {
            let value = thunk();
            self.memo.borrow_mut().insert(name.to_owned(), value.clone());
            return Some(Ok(value));
        }
        self.parent.as_ref().and_then(|p| p.resolve(name))
    }

    fn parent(&self) -> Option<&dyn Activation> {
        self.parent.as_deref()
    }
}

/// Child-first composition of two activations.
#[derive(Debug)]
pub struct HierarchicalActivation {
    parent: Arc<dyn Activation>,
    child: Arc<dyn Activation>,
}

impl HierarchicalActivation {
    #[must_use]
    pub fn new(parent: Arc<dyn Activation>, child: Arc<dyn Activation>) -> Self {
        Self { parent, child }
    }
}

impl Activation for HierarchicalActivation {
    fn resolve(&self, name: &str) -> Option<EvalResult> {
        self.child.resolve(name).or_else(|| self.parent.resolve(name))
    }

    fn parent(&self) -> Option<&dyn Activation> {
        Some(self.parent.as_ref())
    }
}

/// Marks a set of names as unknown; everything else delegates.
///
/// Lookups of an unknown name succeed with an unknown value carrying the
/// attribute, which then propagates through evaluation by the merge rules.
#[derive(Debug)]
pub struct PartialActivation {
    delegate: Arc<dyn Activation>,
    unknowns: AHashSet<String>,
}

impl PartialActivation {
    #[must_use]
    pub fn new(delegate: Arc<dyn Activation>, unknowns: impl IntoIterator<Item = String>) -> Self {
        Self {
            delegate,
            unknowns: unknowns.into_iter().collect(),
        }
    }
}

impl Activation for PartialActivation {
    fn resolve(&self, name: &str) -> Option<EvalResult> {
        if self.unknowns.contains(name) {
            return Some(Ok(Value::unknown(name)));
        }
        self.delegate.resolve(name)
    }

    fn parent(&self) -> Option<&dyn Activation> {
        Some(self.delegate.as_ref())
    }
}

/// Turns failed lookups into "undeclared variable" errors instead of
/// declining, pinning the failure to the innermost layer.
#[derive(Debug)]
pub struct StrictActivation {
    delegate: Arc<dyn Activation>,
}

impl StrictActivation {
    #[must_use]
    pub fn new(delegate: Arc<dyn Activation>) -> Self {
        Self { delegate }
    }
}

impl Activation for StrictActivation {
    fn resolve(&self, name: &str) -> Option<EvalResult> {
        match self.delegate.resolve(name) {
            Some(result) => Some(result),
            None => Some(Err(ErrorValue::new(format!("undeclared variable '{name}'")))),
        }
    }

    fn parent(&self) -> Option<&dyn Activation> {
        Some(self.delegate.as_ref())
    }
}

/// The mutable scope a comprehension evaluates in.
///
/// Owned by one loop frame: the interpreter rebinds the iteration variables
/// and accumulator in place between steps, and drops the scope with the
/// frame. Lookups fall back to the enclosing activation.
///
/// A binding may hold an error: a failed loop step parks its error in the
/// accumulator, where a later short-circuit step can still absorb it (the
/// error re-raises wherever the variable is read strictly).
#[derive(Debug)]
pub struct MutableActivation<'a> {
    bindings: AHashMap<String, EvalResult>,
    parent: &'a dyn Activation,
}

impl<'a> MutableActivation<'a> {
    #[must_use]
    pub fn new(parent: &'a dyn Activation) -> Self {
        Self {
            bindings: AHashMap::new(),
            parent,
        }
    }

    pub fn set(&mut self, name: impl Into<String>, value: Value) {
        self.bindings.insert(name.into(), Ok(value));
    }

    /// Binds a value or a parked error.
    pub fn set_result(&mut self, name: impl Into<String>, result: EvalResult) {
        self.bindings.insert(name.into(), result);
    }

    pub fn clear(&mut self, name: &str) {
        self.bindings.remove(name);
    }
}

impl Activation for MutableActivation<'_> {
    fn resolve(&self, name: &str) -> Option<EvalResult> {
        match self.bindings.get(name) {
            Some(result) => Some(result.clone()),
            None => self.parent.resolve(name),
        }
    }

    fn parent(&self) -> Option<&dyn Activation> {
        Some(self.parent)
    }
}

/// Memoizes conversion of host binding sets into activations.
///
/// Embedders that evaluate many programs against the same binding shape key
/// the conversion by an identity of their choosing and pay it once.
#[derive(Debug, Default)]
pub struct ActivationCache {
    cache: RefCell<AHashMap<u64, Arc<MapActivation>>>,
}

impl ActivationCache {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the cached activation for `key`, building it on first use.
    pub fn get_or_convert(&self, key: u64, build: impl FnOnce() -> MapActivation) -> Arc<MapActivation> {
        if let Some(found) = self.cache.borrow().get(&key) {
            return found.clone();
        }
        let built = Arc::new(build());
        self.cache.borrow_mut().insert(key, built.clone());
        built
    }

    pub fn clear(&self) {
        self.cache.borrow_mut().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn map_activation_resolves_then_delegates() {
        let parent: Arc<dyn Activation> = Arc::new(MapActivation::new().bind("outer", 1i64));
        let child = MapActivation::with_parent(parent).bind("inner", 2i64);
        assert!(child.resolve("inner").unwrap().unwrap().equals(&Value::Int(2)));
        assert!(child.resolve("outer").unwrap().unwrap().equals(&Value::Int(1)));
        assert!(child.resolve("missing").is_none());
    }

    #[test]
    fn lazy_activation_memoizes_thunks() {
        use std::sync::atomic::{AtomicUsize, Ordering};
        let calls = Arc::new(AtomicUsize::new(0));
        let counter = calls.clone();
        let activation = LazyActivation::new().bind("x", move || {
            counter.fetch_add(1, Ordering::SeqCst);
            Value::Int(41)
        });
        assert!(activation.resolve("x").unwrap().unwrap().equals(&Value::Int(41)));
        assert!(activation.resolve("x").unwrap().unwrap().equals(&Value::Int(41)));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn partial_activation_reports_unknowns() {
        let delegate: Arc<dyn Activation> = Arc::new(MapActivation::new().bind("known", true));
        let partial = PartialActivation::new(delegate, vec!["mystery".to_owned()]);
        let resolved = partial.resolve("mystery").unwrap().unwrap();
        assert!(resolved.is_unknown());
        assert!(partial.resolve("known").unwrap().unwrap().equals(&Value::Bool(true)));
        assert!(partial.resolve("absent").is_none());
    }

    #[test]
    fn strict_activation_errors_on_undefined() {
        let strict = StrictActivation::new(Arc::new(EmptyActivation));
        let err = strict.resolve("ghost").unwrap().unwrap_err();
        assert!(err.message.contains("undeclared variable"));
    }

    #[test]
    fn mutable_activation_rebinds_in_place() {
        let base = EmptyActivation;
        let mut scope = MutableActivation::new(&base);
        scope.set("accu", Value::Int(0));
        scope.set("accu", Value::Int(5));
        assert!(scope.resolve("accu").unwrap().unwrap().equals(&Value::Int(5)));
        scope.clear("accu");
        assert!(scope.resolve("accu").is_none());
    }

    #[test]
    fn activation_cache_builds_once_per_key() {
        let cache = ActivationCache::new();
        let first = cache.get_or_convert(7, || MapActivation::new().bind("x", 1i64));
        let second = cache.get_or_convert(7, || MapActivation::new().bind("x", 2i64));
        assert!(Arc::ptr_eq(&first, &second));
    }
}
