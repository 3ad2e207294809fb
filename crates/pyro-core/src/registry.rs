//! Type codec table for literal decoding and response encoding

use crate::error::{PyroError, Result};
use crate::exec::{RED_ZONE, STACK_SEGMENT};
use crate::language::pi;
use crate::value::{Handle, Value};
use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::{debug, warn};

type EncodeFn = Box<dyn Fn(&Handle) -> Option<Vec<Value>> + Send + Sync>;
type DecodeFn = Box<dyn Fn(&[Value]) -> std::result::Result<Handle, String> + Send + Sync>;

struct TypeEntry {
    name: String,
    encode: EncodeFn,
    decode: DecodeFn,
}

/// Registry of wire types
///
/// Built once at startup and shared read-only behind an `Arc`. Numbers,
/// strings, booleans and lists are built in; every other type a script
/// may mention must be registered here first. A registered type's wire
/// form is `Name(field, ...)`.
#[derive(Default)]
pub struct Registry {
    by_name: HashMap<String, Arc<TypeEntry>>,
    by_type: HashMap<TypeId, Arc<TypeEntry>>,
}

impl Registry {
    /// Create a new registry with only the built-in types
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a type under its wire name
    ///
    /// `encode` flattens an instance into field values; `decode` rebuilds
    /// one from fields and explains why when it cannot.
    pub fn register<T, E, D>(&mut self, name: &str, encode: E, decode: D)
    where
        T: Any + Send + Sync,
        E: Fn(&T) -> Vec<Value> + Send + Sync + 'static,
        D: Fn(&[Value]) -> std::result::Result<T, String> + Send + Sync + 'static,
    {
        debug!("Registering wire type: {}", name);
        let entry = Arc::new(TypeEntry {
            name: name.to_string(),
            encode: Box::new(move |handle: &Handle| handle.downcast_ref::<T>().map(&encode)),
            decode: Box::new(move |fields: &[Value]| decode(fields).map(Handle::new)),
        });
        self.by_name.insert(name.to_string(), entry.clone());
        self.by_type.insert(TypeId::of::<T>(), entry);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.by_name.contains_key(name)
    }

    /// Registered wire names, sorted
    pub fn type_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.by_name.keys().map(String::as_str).collect();
        names.sort();
        names
    }

    /// Build a registered type from field values
    pub fn decode(&self, name: &str, fields: &[Value]) -> Result<Value> {
        let entry = self
            .by_name
            .get(name)
            .ok_or_else(|| PyroError::UnknownType(name.to_string()))?;
        (entry.decode)(fields)
            .map(Value::Handle)
            .map_err(|message| PyroError::Decode {
                type_name: name.to_string(),
                message,
            })
    }

    /// Render a data stack as Pi text, bottom of the stack first
    pub fn to_script(&self, values: &[Value]) -> String {
        let mut out = String::new();
        for (i, value) in values.iter().enumerate() {
            if i > 0 {
                out.push(' ');
            }
            self.write_value(&mut out, value);
        }
        out
    }

    pub fn encode(&self, value: &Value) -> String {
        let mut out = String::new();
        self.write_value(&mut out, value);
        out
    }

    /// Append the Pi rendering of `value`
    ///
    /// Values without a wire form are written as a quoted description so
    /// one odd value never costs the caller the rest of the response.
    pub fn write_value(&self, out: &mut String, value: &Value) {
        match value {
            Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
            // No literal spells i64::MIN; its magnitude is out of range
            Value::Int(i64::MIN) => out.push_str(&format!("-({}, 1)", -i64::MAX)),
            Value::Int(i) => out.push_str(&i.to_string()),
            Value::Float(x) if x.is_finite() => out.push_str(&format!("{:?}", x)),
            Value::Float(x) => write_string(out, &x.to_string()),
            Value::Str(s) => write_string(out, s),
            Value::List(items) => {
                out.push('[');
                for (i, item) in items.iter().enumerate() {
                    if i > 0 {
                        out.push(' ');
                    }
                    stacker::maybe_grow(RED_ZONE, STACK_SEGMENT, || self.write_value(out, item));
                }
                out.push(']');
            }
            Value::Closure(closure) => pi::write_closure(self, out, &closure.params, &closure.body),
            Value::Handle(handle) => self.write_handle(out, handle),
            Value::Native(native) => write_string(out, &format!("<native {}>", native.name)),
            Value::Object(object) => write_string(out, &object.describe()),
        }
    }

    fn write_handle(&self, out: &mut String, handle: &Handle) {
        let encoded = self
            .by_type
            .get(&handle.type_id())
            .and_then(|entry| (entry.encode)(handle).map(|fields| (&entry.name, fields)));

        match encoded {
            Some((name, fields)) => {
                out.push_str(name);
                out.push('(');
                for (i, field) in fields.iter().enumerate() {
                    if i > 0 {
                        out.push_str(", ");
                    }
                    self.write_value(out, field);
                }
                out.push(')');
            }
            None => {
                warn!("No encoder registered for {}", handle.type_name());
                write_string(out, &format!("<{}>", handle.type_name()));
            }
        }
    }
}

/// Quote and escape a string literal
pub(crate) fn write_string(out: &mut String, s: &str) {
    out.push('"');
    for c in s.chars() {
        match c {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            '\n' => out.push_str("\\n"),
            '\t' => out.push_str("\\t"),
            '\r' => out.push_str("\\r"),
            '\0' => out.push_str("\\0"),
            c => out.push(c),
        }
    }
    out.push('"');
}
