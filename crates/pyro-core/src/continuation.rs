//! Translated script trees

use crate::value::Value;
use std::fmt;

/// Dotted identifier path (`peer.Connect`)
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Path(Vec<String>);

impl Path {
    pub fn new(segments: Vec<String>) -> Self {
        Self(segments)
    }

    pub fn single(name: impl Into<String>) -> Self {
        Self(vec![name.into()])
    }

    /// First segment, resolved through the scope
    pub fn root(&self) -> &str {
        self.0.first().map(String::as_str).unwrap_or_default()
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_single(&self) -> bool {
        self.0.len() == 1
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0.join("."))
    }
}

/// Built-in operators
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Op {
    Add,
    Sub,
    Mul,
    Div,
    Rem,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    Neg,
}

impl Op {
    /// Number of operands the operator consumes
    pub fn arity(self) -> usize {
        match self {
            Op::Not | Op::Neg => 1,
            _ => 2,
        }
    }

    /// Operator spelling, shared by both syntaxes
    pub fn symbol(self) -> &'static str {
        match self {
            Op::Add => "+",
            Op::Sub | Op::Neg => "-",
            Op::Mul => "*",
            Op::Div => "/",
            Op::Rem => "%",
            Op::Eq => "==",
            Op::Ne => "!=",
            Op::Lt => "<",
            Op::Le => "<=",
            Op::Gt => ">",
            Op::Ge => ">=",
            Op::And => "&&",
            Op::Or => "||",
            Op::Not => "!",
        }
    }
}

/// What a call does once its children have pushed their values
#[derive(Debug, Clone, PartialEq)]
pub enum Head {
    /// Statement list; children run in order and nothing is dispatched
    Sequence,
    /// Pop one value and bind it in the current scope
    Bind(String),
    /// Apply an operator
    Op(Op),
    /// Resolve the path and invoke what it names
    Invoke(Path),
    /// Build a registered type from runtime values
    Construct(String),
    /// Collect the pushed values into a list
    List,
}

/// Executable script tree
///
/// Trees are immutable after translation. Scope attachment happens on the
/// closure values a tree produces, never on the tree itself.
#[derive(Debug, Clone, PartialEq)]
pub enum Continuation {
    /// Push a value
    Literal(Value),
    /// Resolve a path and push what it names, without invoking it
    Reference(Path),
    /// Evaluate children left to right, then dispatch the head
    Call { head: Head, args: Vec<Continuation> },
}

impl Continuation {
    pub fn sequence(statements: Vec<Continuation>) -> Self {
        Continuation::Call {
            head: Head::Sequence,
            args: statements,
        }
    }

    pub fn invoke(path: Path, args: Vec<Continuation>) -> Self {
        Continuation::Call {
            head: Head::Invoke(path),
            args,
        }
    }

    pub fn op(op: Op, args: Vec<Continuation>) -> Self {
        Continuation::Call {
            head: Head::Op(op),
            args,
        }
    }

    pub fn bind(name: impl Into<String>, value: Continuation) -> Self {
        Continuation::Call {
            head: Head::Bind(name.into()),
            args: vec![value],
        }
    }

    /// A sequence holding exactly one statement yields that statement
    pub fn unwrap_single(self) -> Self {
        match self {
            Continuation::Call {
                head: Head::Sequence,
                mut args,
            } if args.len() == 1 => args.remove(0),
            other => other,
        }
    }

    pub fn is_literal(&self) -> bool {
        matches!(self, Continuation::Literal(_))
    }

    /// Number of statements when this is a sequence, else 1
    pub fn statement_count(&self) -> usize {
        match self {
            Continuation::Call {
                head: Head::Sequence,
                args,
            } => args.len(),
            _ => 1,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unwrap_single_statement() {
        let call = Continuation::invoke(Path::single("f"), vec![]);
        let wrapped = Continuation::sequence(vec![call.clone()]);
        assert_eq!(wrapped.unwrap_single(), call);

        let two = Continuation::sequence(vec![
            Continuation::Literal(Value::Int(1)),
            Continuation::Literal(Value::Int(2)),
        ]);
        assert_eq!(two.clone().unwrap_single(), two);
        assert_eq!(two.statement_count(), 2);
    }

    #[test]
    fn test_path_display() {
        let path = Path::new(vec!["peer".into(), "Connect".into()]);
        assert_eq!(path.to_string(), "peer.Connect");
        assert_eq!(path.root(), "peer");
        assert!(!path.is_single());
    }
}
