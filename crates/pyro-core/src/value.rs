//! Values that live on the data stack and in scopes

use crate::continuation::Continuation;
use crate::error::Result;
use crate::exec::Exec;
use crate::scope::{Scope, WeakScope};
use async_trait::async_trait;
use std::any::{Any, TypeId};
use std::fmt;
use std::sync::Arc;

/// Signature of a synchronous builtin
pub type NativeFn = fn(&mut Exec, Vec<Value>) -> Result<Option<Value>>;

/// A value on the data stack
#[derive(Clone)]
pub enum Value {
    Bool(bool),
    Int(i64),
    Float(f64),
    Str(String),
    List(Vec<Value>),
    /// Compiled script fragment, invocable at call sites
    Closure(Closure),
    /// Builtin function
    Native(Native),
    /// Instance of a registered wire type
    Handle(Handle),
    /// Application object exposing methods to scripts (peer, server)
    Object(Arc<dyn Object>),
}

impl Value {
    /// Short type name, as reported by the `type` builtin
    pub fn type_name(&self) -> &str {
        match self {
            Value::Bool(_) => "bool",
            Value::Int(_) => "int",
            Value::Float(_) => "float",
            Value::Str(_) => "string",
            Value::List(_) => "list",
            Value::Closure(_) => "continuation",
            Value::Native(_) => "native",
            Value::Handle(h) => h.type_name(),
            Value::Object(o) => o.type_name(),
        }
    }

    pub fn truthy(&self) -> bool {
        match self {
            Value::Bool(b) => *b,
            Value::Int(i) => *i != 0,
            Value::Float(f) => *f != 0.0,
            Value::Str(s) => !s.is_empty(),
            Value::List(items) => !items.is_empty(),
            _ => true,
        }
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Str(s) => Some(s),
            _ => None,
        }
    }

    pub fn is_invocable(&self) -> bool {
        matches!(self, Value::Closure(_) | Value::Native(_))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::Int(a), Value::Int(b)) => a == b,
            (Value::Float(a), Value::Float(b)) => a == b,
            (Value::Int(a), Value::Float(b)) | (Value::Float(b), Value::Int(a)) => {
                (*a as f64) == *b
            }
            (Value::Str(a), Value::Str(b)) => a == b,
            (Value::List(a), Value::List(b)) => a == b,
            (Value::Closure(a), Value::Closure(b)) => a == b,
            (Value::Native(a), Value::Native(b)) => a.name == b.name,
            (Value::Handle(a), Value::Handle(b)) => Arc::ptr_eq(&a.data, &b.data),
            (Value::Object(a), Value::Object(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Bool(b) => write!(f, "{}", b),
            Value::Int(i) => write!(f, "{}", i),
            Value::Float(x) => write!(f, "{:?}", x),
            Value::Str(s) => write!(f, "{:?}", s),
            Value::List(items) => f.debug_list().entries(items).finish(),
            Value::Closure(c) => write!(f, "<continuation/{}>", c.params.len()),
            Value::Native(n) => write!(f, "<native {}>", n.name),
            Value::Handle(h) => write!(f, "<{}>", h.type_name()),
            Value::Object(o) => write!(f, "<{}>", o.describe()),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Str(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Str(s)
    }
}

impl From<Vec<Value>> for Value {
    fn from(items: Vec<Value>) -> Self {
        Value::List(items)
    }
}

/// A continuation value: parameters, a body, and the scope it was bound to
///
/// The body is shared and never mutated. `scope` is attached when the
/// closure literal is evaluated; bootstrap bindings leave it empty so they
/// run in whichever scope invokes them. The captured frame is held weakly
/// and kept alive by the Exec that evaluated the literal.
#[derive(Clone, Debug)]
pub struct Closure {
    pub params: Vec<String>,
    pub body: Arc<Continuation>,
    pub scope: Option<WeakScope>,
}

impl Closure {
    pub fn new(params: Vec<String>, body: Continuation) -> Self {
        Self {
            params,
            body: Arc::new(body),
            scope: None,
        }
    }

    /// Same body and parameters, bound to `scope`
    pub fn bind(&self, scope: &Scope) -> Self {
        Self {
            params: self.params.clone(),
            body: self.body.clone(),
            scope: Some(scope.downgrade()),
        }
    }
}

impl PartialEq for Closure {
    fn eq(&self, other: &Self) -> bool {
        self.params == other.params && self.body == other.body
    }
}

/// A named builtin
#[derive(Clone, Copy)]
pub struct Native {
    pub name: &'static str,
    pub func: NativeFn,
}

/// Opaque instance of a registered type
#[derive(Clone)]
pub struct Handle {
    type_id: TypeId,
    type_name: &'static str,
    data: Arc<dyn Any + Send + Sync>,
}

impl Handle {
    pub fn new<T: Any + Send + Sync>(value: T) -> Self {
        Self {
            type_id: TypeId::of::<T>(),
            type_name: short_type_name(std::any::type_name::<T>()),
            data: Arc::new(value),
        }
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// Rust type name without its module path
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    pub fn downcast_ref<T: Any>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }
}

fn short_type_name(full: &'static str) -> &'static str {
    full.rsplit("::").next().unwrap_or(full)
}

/// Application object reachable from scripts through a scope binding
///
/// `invoke` receives the calling Exec so methods can push extra results
/// or continue nested scripts on the same data stack.
#[async_trait]
pub trait Object: Send + Sync + 'static {
    fn type_name(&self) -> &'static str;

    /// Human-readable description, used when the object must be encoded
    fn describe(&self) -> String {
        self.type_name().to_string()
    }

    /// Read a member without calling it
    fn get(&self, _member: &str) -> Option<Value> {
        None
    }

    /// Call a method; a returned value is pushed onto the data stack
    async fn invoke(
        &self,
        method: &str,
        args: Vec<Value>,
        exec: &mut Exec,
    ) -> Result<Option<Value>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_truthiness() {
        assert!(Value::Bool(true).truthy());
        assert!(!Value::Int(0).truthy());
        assert!(Value::Float(0.5).truthy());
        assert!(!Value::Str(String::new()).truthy());
        assert!(!Value::List(vec![]).truthy());
    }

    #[test]
    fn test_numeric_equality_crosses_int_and_float() {
        assert_eq!(Value::Int(2), Value::Float(2.0));
        assert_ne!(Value::Int(2), Value::Str("2".into()));
    }

    #[derive(Debug, PartialEq)]
    struct Marker(u8);

    #[test]
    fn test_handle_downcast() {
        let handle = Handle::new(Marker(7));
        assert_eq!(handle.type_name(), "Marker");
        assert_eq!(handle.type_id(), TypeId::of::<Marker>());
        assert_eq!(handle.downcast_ref::<Marker>(), Some(&Marker(7)));
        assert!(handle.downcast_ref::<u8>().is_none());
    }
}
