//! Chainable identifier bindings

use crate::value::Value;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock, Weak};

/// Shared handle to a scope frame
///
/// Clones point at the same frame. Lookups walk to the parent when a name
/// is not bound locally; writes always land in this frame.
#[derive(Clone, Default)]
pub struct Scope(Arc<RwLock<Frame>>);

#[derive(Default)]
struct Frame {
    vars: HashMap<String, Value>,
    parent: Option<Scope>,
}

impl Scope {
    pub fn new() -> Self {
        Self::default()
    }

    /// New empty frame chained to this one
    pub fn child(&self) -> Self {
        Self(Arc::new(RwLock::new(Frame {
            vars: HashMap::new(),
            parent: Some(self.clone()),
        })))
    }

    /// Resolve a name through the chain
    pub fn get(&self, name: &str) -> Option<Value> {
        let frame = self.0.read().unwrap_or_else(PoisonError::into_inner);
        if let Some(value) = frame.vars.get(name) {
            return Some(value.clone());
        }
        frame.parent.as_ref().and_then(|p| p.get(name))
    }

    pub fn contains(&self, name: &str) -> bool {
        let frame = self.0.read().unwrap_or_else(PoisonError::into_inner);
        frame.vars.contains_key(name) || frame.parent.as_ref().is_some_and(|p| p.contains(name))
    }

    /// Bind in this frame, returning the previous local binding
    pub fn set(&self, name: impl Into<String>, value: impl Into<Value>) -> Option<Value> {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .vars
            .insert(name.into(), value.into())
    }

    pub fn remove(&self, name: &str) -> Option<Value> {
        self.0
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .vars
            .remove(name)
    }

    /// Names bound in this frame only, sorted
    pub fn local_names(&self) -> Vec<String> {
        let frame = self.0.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<String> = frame.vars.keys().cloned().collect();
        names.sort();
        names
    }

    pub fn parent(&self) -> Option<Scope> {
        self.0
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .parent
            .clone()
    }

    pub fn ptr_eq(&self, other: &Scope) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Handle that does not keep the frame alive
    pub fn downgrade(&self) -> WeakScope {
        WeakScope(Arc::downgrade(&self.0))
    }

    /// Whether anything besides this handle still refers to the frame
    pub(crate) fn is_shared(&self) -> bool {
        Arc::strong_count(&self.0) > 1 || Arc::weak_count(&self.0) > 0
    }
}

/// Non-owning scope handle, held by closures
///
/// A closure stored in the frame it captured would otherwise keep that
/// frame alive forever.
#[derive(Clone)]
pub struct WeakScope(Weak<RwLock<Frame>>);

impl WeakScope {
    pub fn upgrade(&self) -> Option<Scope> {
        self.0.upgrade().map(Scope)
    }
}

impl fmt::Debug for WeakScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WeakScope")
            .field("alive", &(self.0.strong_count() > 0))
            .finish()
    }
}

impl fmt::Debug for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Values may hold scopes themselves, so only names are printed
        f.debug_struct("Scope")
            .field("names", &self.local_names())
            .field("chained", &self.parent().is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_child_reads_through_parent() {
        let root = Scope::new();
        root.set("peer", 1i64);
        let child = root.child();
        assert_eq!(child.get("peer"), Some(Value::Int(1)));
        assert!(child.contains("peer"));
        assert!(!child.contains("server"));
    }

    #[test]
    fn test_child_writes_do_not_leak_upward() {
        let root = Scope::new();
        root.set("x", 1i64);
        let child = root.child();
        child.set("x", 2i64);
        assert_eq!(child.get("x"), Some(Value::Int(2)));
        assert_eq!(root.get("x"), Some(Value::Int(1)));
        assert_eq!(child.local_names(), vec!["x".to_string()]);
    }

    #[test]
    fn test_clones_share_frame() {
        let a = Scope::new();
        let b = a.clone();
        b.set("shared", true);
        assert_eq!(a.get("shared"), Some(Value::Bool(true)));
        assert!(a.ptr_eq(&b));
        assert_eq!(a.remove("shared"), Some(Value::Bool(true)));
        assert!(!b.contains("shared"));
    }

    #[test]
    fn test_weak_handle_does_not_keep_frame() {
        let scope = Scope::new();
        let weak = scope.downgrade();
        assert!(weak.upgrade().is_some_and(|s| s.ptr_eq(&scope)));
        assert!(scope.is_shared());

        let child = scope.child();
        drop(scope);
        assert!(weak.upgrade().is_some());
        drop(child);
        assert!(weak.upgrade().is_none());
    }
}
