//! Source translation
//!
//! Two surface syntaxes compile to the same [`Continuation`] trees:
//! - Rho: statement-oriented syntax for people (`x = peer.Connect("host", 9999)`)
//! - Pi: compact term syntax used on the wire (`x = peer.Connect("host", 9999)`,
//!   `+(1, 2)`, `[1 2 3]`)
//!
//! Translation never executes anything. Identifiers are checked against
//! the scope handed to [`Context::translate`] so that a typo fails before
//! any side effect happens.

pub mod lexer;
pub mod pi;
pub mod rho;

use crate::continuation::{Continuation, Head, Path};
use crate::error::{PyroError, Result};
use crate::registry::Registry;
use crate::scope::Scope;
use crate::value::Value;

/// Deepest expression nesting a script may use
pub const MAX_NESTING: usize = 256;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;

/// Surface syntax selector
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// Human-writable statements and infix operators
    Rho,
    /// Compact terms, the response encoding
    #[default]
    Pi,
}

impl fmt::Display for Language {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Language::Rho => write!(f, "rho"),
            Language::Pi => write!(f, "pi"),
        }
    }
}

/// Translator from source text to continuations
pub struct Context {
    registry: Arc<Registry>,
    language: Language,
}

impl Context {
    pub fn new(registry: Arc<Registry>) -> Self {
        Self::with_language(registry, Language::default())
    }

    pub fn with_language(registry: Arc<Registry>, language: Language) -> Self {
        Self { registry, language }
    }

    pub fn language(&self) -> Language {
        self.language
    }

    pub fn set_language(&mut self, language: Language) {
        self.language = language;
    }

    pub fn registry(&self) -> &Arc<Registry> {
        &self.registry
    }

    /// Translate `source` in the current language
    pub fn translate(&self, source: &str, scope: &Scope) -> Result<Continuation> {
        self.translate_as(self.language, source, scope)
    }

    /// Translate with an explicit language; the result is always a sequence
    pub fn translate_as(
        &self,
        language: Language,
        source: &str,
        scope: &Scope,
    ) -> Result<Continuation> {
        let tokens = lexer::tokenize(source)?;
        let builder = Builder::new(scope, &self.registry);
        match language {
            Language::Rho => rho::parse(tokens, builder),
            Language::Pi => pi::parse(tokens, builder),
        }
    }

    /// Pi text for a continuation, suitable for sending to a remote
    pub fn render(&self, continuation: &Continuation) -> String {
        pi::render(&self.registry, continuation)
    }
}

/// Node construction shared by both front-ends
///
/// Tracks names the script itself binds, so `x = 1; x` translates even
/// though `x` is not yet in the scope. Names bound inside a closure body,
/// parameters included, go out of view when the body ends.
pub(crate) struct Builder<'a> {
    scope: &'a Scope,
    registry: &'a Registry,
    locals: Vec<HashSet<String>>,
    depth: usize,
}

impl<'a> Builder<'a> {
    pub(crate) fn new(scope: &'a Scope, registry: &'a Registry) -> Self {
        Self {
            scope,
            registry,
            locals: vec![HashSet::new()],
            depth: 0,
        }
    }

    pub(crate) fn define(&mut self, name: &str) {
        if let Some(names) = self.locals.last_mut() {
            names.insert(name.to_string());
        }
    }

    /// Start a closure body
    pub(crate) fn open_body(&mut self) {
        self.locals.push(HashSet::new());
    }

    /// End the innermost closure body, forgetting what it defined
    pub(crate) fn close_body(&mut self) {
        if self.locals.len() > 1 {
            self.locals.pop();
        }
    }

    /// Enter one level of nesting, failing past [`MAX_NESTING`]
    pub(crate) fn descend(&mut self, line: usize, column: usize) -> Result<()> {
        if self.depth >= MAX_NESTING {
            return Err(PyroError::syntax(
                line,
                column,
                format!("nesting too deep (limit {})", MAX_NESTING),
            ));
        }
        self.depth += 1;
        Ok(())
    }

    pub(crate) fn ascend(&mut self) {
        self.depth = self.depth.saturating_sub(1);
    }

    fn is_bound(&self, name: &str) -> bool {
        self.locals.iter().any(|names| names.contains(name)) || self.scope.contains(name)
    }

    fn check_root(&self, path: &Path, line: usize, column: usize) -> Result<()> {
        if self.is_bound(path.root()) {
            Ok(())
        } else {
            Err(PyroError::UnknownIdentifier {
                name: path.root().to_string(),
                line,
                column,
            })
        }
    }

    pub(crate) fn reference(&self, path: Path, line: usize, column: usize) -> Result<Continuation> {
        self.check_root(&path, line, column)?;
        Ok(Continuation::Reference(path))
    }

    /// Invocation, or a registered type constructor when the head names one
    ///
    /// Constructors with literal fields are decoded here, so they reach the
    /// stack as ready values.
    pub(crate) fn call(
        &self,
        path: Path,
        args: Vec<Continuation>,
        line: usize,
        column: usize,
    ) -> Result<Continuation> {
        let name = path.root();
        if path.is_single() && !self.is_bound(name) && self.registry.contains(name) {
            if args.iter().all(Continuation::is_literal) {
                let fields: Vec<Value> = args
                    .into_iter()
                    .filter_map(|arg| match arg {
                        Continuation::Literal(value) => Some(value),
                        _ => None,
                    })
                    .collect();
                return self
                    .registry
                    .decode(name, &fields)
                    .map(Continuation::Literal)
                    .map_err(|e| PyroError::syntax(line, column, e.to_string()));
            }
            return Ok(Continuation::Call {
                head: Head::Construct(name.to_string()),
                args,
            });
        }

        self.check_root(&path, line, column)?;
        Ok(Continuation::invoke(path, args))
    }

    /// List literal, folded when every element is a literal
    pub(crate) fn list(&self, items: Vec<Continuation>) -> Continuation {
        if items.iter().all(Continuation::is_literal) {
            let values = items
                .into_iter()
                .filter_map(|item| match item {
                    Continuation::Literal(value) => Some(value),
                    _ => None,
                })
                .collect();
            Continuation::Literal(Value::List(values))
        } else {
            Continuation::Call {
                head: Head::List,
                args: items,
            }
        }
    }
}
