//! # pyro-core
//!
//! Script model and stack machine for Pyro.
//!
//! This crate provides everything needed to run a Pyro script locally:
//! - Values, scopes and the wire type registry
//! - Continuation trees and the Rho/Pi translators that build them
//! - The Exec stack machine and its builtins

pub mod builtins;
pub mod continuation;
pub mod error;
pub mod exec;
pub mod language;
pub mod ops;
pub mod registry;
pub mod scope;
pub mod value;

pub use continuation::{Continuation, Head, Op, Path};
pub use error::{PyroError, Result};
pub use exec::{Exec, MAX_DEPTH, error_marker};
pub use language::{Context, Language};
pub use registry::Registry;
pub use scope::{Scope, WeakScope};
pub use value::{Closure, Handle, Native, NativeFn, Object, Value};
