//! Stack machine for translated continuations

use crate::builtins;
use crate::continuation::{Continuation, Head, Path};
use crate::error::{PyroError, Result};
use crate::ops;
use crate::registry::Registry;
use crate::scope::{Scope, WeakScope};
use crate::value::Value;
use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;
use std::task::Poll;
use tracing::{debug, warn};

/// Maximum nested invocations before execution fails
pub const MAX_DEPTH: usize = 256;

/// Remaining stack below which recursion continues on a fresh segment
pub(crate) const RED_ZONE: usize = 128 * 1024;
/// Size of each stack segment allocated for deep recursion
pub(crate) const STACK_SEGMENT: usize = 2 * 1024 * 1024;

/// Captured frames kept before the first sweep for unused ones
const CAPTURE_SWEEP: usize = 64;

type EvalFuture<'a> = Pin<Box<dyn Future<Output = Result<()>> + Send + 'a>>;

/// Polls a nested evaluation with enough stack to keep recursing
///
/// Evaluation recurses through `poll`, so deep scripts would otherwise
/// exhaust whatever stack the polling thread was given.
struct Grow<'a>(EvalFuture<'a>);

impl Future for Grow<'_> {
    type Output = Result<()>;

    fn poll(mut self: Pin<&mut Self>, cx: &mut std::task::Context<'_>) -> Poll<Self::Output> {
        let inner = &mut self.0;
        stacker::maybe_grow(RED_ZONE, STACK_SEGMENT, || inner.as_mut().poll(cx))
    }
}

/// One data stack plus the ambient scope it executes in
///
/// An Exec is strictly sequential. Nested invocations, including scripts
/// objects continue on behalf of a caller, share the same data stack.
///
/// Frames captured by closure literals are owned here; closures only hold
/// them weakly, so dropping the Exec frees every frame its scripts created.
pub struct Exec {
    stack: Vec<Value>,
    scope: Scope,
    registry: Arc<Registry>,
    depth: usize,
    captured: Vec<Scope>,
    sweep_at: usize,
}

impl Exec {
    pub fn new(registry: Arc<Registry>, scope: Scope) -> Self {
        Self {
            stack: Vec::new(),
            scope,
            registry,
            depth: 0,
            captured: Vec::new(),
            sweep_at: CAPTURE_SWEEP,
        }
    }

    /// Exec over a fresh root scope holding the builtins
    pub fn with_builtins(registry: Arc<Registry>) -> Self {
        let scope = Scope::new();
        builtins::install(&scope);
        Self::new(registry, scope)
    }

    pub fn scope(&self) -> &Scope {
        &self.scope
    }

    pub fn set_scope(&mut self, scope: Scope) {
        self.scope = scope;
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Stack contents, bottom first
    pub fn data_stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn push(&mut self, value: impl Into<Value>) {
        self.stack.push(value.into());
    }

    pub fn pop(&mut self) -> Result<Value> {
        self.stack.pop().ok_or(PyroError::StackUnderflow)
    }

    pub fn peek(&self) -> Option<&Value> {
        self.stack.last()
    }

    pub fn clear(&mut self) {
        self.stack.clear();
    }

    /// Remove and return the whole stack
    pub fn take_stack(&mut self) -> Vec<Value> {
        std::mem::take(&mut self.stack)
    }

    /// Execute in the ambient scope
    pub async fn continue_(&mut self, continuation: &Continuation) -> Result<()> {
        let scope = self.scope.clone();
        self.eval(continuation, &scope).await
    }

    /// Execute in an explicit scope, falling back to the ambient scope
    pub async fn continue_in(&mut self, continuation: &Continuation, scope: &Scope) -> Result<()> {
        self.eval(continuation, scope).await
    }

    /// Execute a top-level script
    ///
    /// A failure cancels the rest of the script and leaves an error marker
    /// on the stack; the error is still returned for logging.
    pub async fn run(&mut self, continuation: &Continuation) -> Result<()> {
        let result = self.continue_(continuation).await;
        if let Err(e) = &result {
            debug!("Script failed: {}", e);
            self.depth = 0;
            self.push(error_marker(e));
        }
        result
    }

    /// Invoke a value with arguments, in the ambient scope
    pub async fn invoke(&mut self, callee: Value, name: &str, args: Vec<Value>) -> Result<()> {
        let scope = self.scope.clone();
        self.call(callee, name, args, &scope).await
    }

    fn eval<'a>(&'a mut self, continuation: &'a Continuation, scope: &'a Scope) -> EvalFuture<'a> {
        Box::pin(Grow(Box::pin(async move {
            match continuation {
                Continuation::Literal(Value::Closure(closure)) => {
                    self.capture(scope);
                    self.push(Value::Closure(closure.bind(scope)));
                    Ok(())
                }
                Continuation::Literal(value) => {
                    self.push(value.clone());
                    Ok(())
                }
                Continuation::Reference(path) => {
                    let value = self.resolve(path, scope)?;
                    self.push(value);
                    Ok(())
                }
                Continuation::Call {
                    head: Head::Sequence,
                    args,
                } => {
                    for statement in args {
                        self.eval(statement, scope).await?;
                    }
                    Ok(())
                }
                Continuation::Call { head, args } => {
                    let base = self.stack.len();
                    for arg in args {
                        self.eval(arg, scope).await?;
                    }
                    let values = self.stack.split_off(base);
                    self.dispatch(head, values, scope).await
                }
            }
        })))
    }

    /// Keep `scope` alive for closures bound to it
    fn capture(&mut self, scope: &Scope) {
        if self.captured.iter().any(|s| s.ptr_eq(scope)) {
            return;
        }
        self.captured.push(scope.clone());
        if self.captured.len() >= self.sweep_at {
            // Frames no closure or child frame refers to any more
            self.captured.retain(Scope::is_shared);
            self.sweep_at = (self.captured.len() * 2).max(CAPTURE_SWEEP);
        }
    }

    async fn dispatch(&mut self, head: &Head, mut values: Vec<Value>, scope: &Scope) -> Result<()> {
        match head {
            Head::Sequence => {
                self.stack.extend(values);
                Ok(())
            }
            Head::Bind(name) => {
                let value = values.pop().ok_or(PyroError::StackUnderflow)?;
                self.stack.extend(values);
                scope.set(name.clone(), value);
                Ok(())
            }
            Head::Op(op) => {
                let result = ops::apply(*op, values)?;
                self.push(result);
                Ok(())
            }
            Head::List => {
                self.push(Value::List(values));
                Ok(())
            }
            Head::Construct(name) => {
                let value = self.registry.decode(name, &values)?;
                self.push(value);
                Ok(())
            }
            Head::Invoke(path) => self.invoke_path(path, values, scope).await,
        }
    }

    async fn invoke_path(&mut self, path: &Path, args: Vec<Value>, scope: &Scope) -> Result<()> {
        let segments = path.segments();
        let Some((method, receiver)) = segments.split_last() else {
            return Err(PyroError::Unbound(path.to_string()));
        };
        if receiver.is_empty() {
            let callee = self.lookup(method, scope)?;
            return self.call(callee, method, args, scope).await;
        }

        let receiver = self.resolve(&Path::new(receiver.to_vec()), scope)?;
        match receiver {
            Value::Object(object) => {
                self.enter(path)?;
                debug!("Invoking {} with {} args", path, args.len());
                let result = object.invoke(method, args, self).await;
                self.depth -= 1;
                if let Some(value) = result? {
                    self.push(value);
                }
                Ok(())
            }
            other => Err(PyroError::UnknownMember {
                object: other.type_name().to_string(),
                member: method.clone(),
            }),
        }
    }

    async fn call(&mut self, callee: Value, name: &str, args: Vec<Value>, scope: &Scope) -> Result<()> {
        match callee {
            Value::Native(native) => {
                if let Some(value) = (native.func)(self, args)? {
                    self.push(value);
                }
                Ok(())
            }
            Value::Closure(closure) => {
                let parent = closure
                    .scope
                    .as_ref()
                    .and_then(WeakScope::upgrade)
                    .unwrap_or_else(|| scope.clone());
                let frame = parent.child();
                if closure.params.is_empty() {
                    self.stack.extend(args);
                } else if closure.params.len() != args.len() {
                    return Err(PyroError::Arity {
                        name: name.to_string(),
                        expected: closure.params.len(),
                        got: args.len(),
                    });
                } else {
                    for (param, arg) in closure.params.iter().zip(args) {
                        frame.set(param.clone(), arg);
                    }
                }

                self.enter(name)?;
                let result = self.eval(&closure.body, &frame).await;
                self.depth -= 1;
                result
            }
            other => Err(PyroError::NotInvocable(format!(
                "{} ({})",
                name,
                other.type_name()
            ))),
        }
    }

    fn enter(&mut self, name: impl std::fmt::Display) -> Result<()> {
        if self.depth >= MAX_DEPTH {
            warn!("Recursion limit reached in {}", name);
            return Err(PyroError::RecursionLimit(MAX_DEPTH));
        }
        self.depth += 1;
        Ok(())
    }

    fn lookup(&self, name: &str, scope: &Scope) -> Result<Value> {
        scope
            .get(name)
            .or_else(|| self.scope.get(name))
            .ok_or_else(|| PyroError::Unbound(name.to_string()))
    }

    /// Resolve a path to a value; members are read through [`Object::get`]
    ///
    /// [`Object::get`]: crate::value::Object::get
    fn resolve(&self, path: &Path, scope: &Scope) -> Result<Value> {
        let mut value = self.lookup(path.root(), scope)?;
        for member in &path.segments()[1..] {
            value = match &value {
                Value::Object(object) => object.get(member),
                _ => None,
            }
            .ok_or_else(|| PyroError::UnknownMember {
                object: value.type_name().to_string(),
                member: member.clone(),
            })?;
        }
        Ok(value)
    }
}

/// Stack value reporting a failed script
pub fn error_marker(error: &PyroError) -> Value {
    Value::Str(format!("Error: {}", error))
}
