//! Builtins installed in every root scope

use crate::error::{PyroError, Result};
use crate::exec::Exec;
use crate::scope::Scope;
use crate::value::{Native, Value};
use tracing::info;

const NATIVES: &[Native] = &[
    Native {
        name: "assert",
        func: assert,
    },
    Native {
        name: "print",
        func: print,
    },
    Native {
        name: "depth",
        func: depth,
    },
    Native {
        name: "drop",
        func: drop_top,
    },
    Native {
        name: "dup",
        func: dup,
    },
    Native {
        name: "swap",
        func: swap,
    },
    Native {
        name: "clear",
        func: clear,
    },
    Native {
        name: "len",
        func: len,
    },
    Native {
        name: "str",
        func: to_str,
    },
    Native {
        name: "type",
        func: type_of,
    },
];

/// Bind every builtin into `scope`
pub fn install(scope: &Scope) {
    for native in NATIVES {
        scope.set(native.name, Value::Native(*native));
    }
}

/// Names of the installed builtins
pub fn names() -> impl Iterator<Item = &'static str> {
    NATIVES.iter().map(|n| n.name)
}

fn arity(name: &str, args: &[Value], expected: usize) -> Result<()> {
    if args.len() == expected {
        Ok(())
    } else {
        Err(PyroError::Arity {
            name: name.to_string(),
            expected,
            got: args.len(),
        })
    }
}

fn single(name: &str, args: Vec<Value>) -> Result<Value> {
    arity(name, &args, 1)?;
    args.into_iter().next().ok_or(PyroError::StackUnderflow)
}

/// Fails unless every argument is truthy
fn assert(_exec: &mut Exec, args: Vec<Value>) -> Result<Option<Value>> {
    if args.is_empty() {
        return Err(PyroError::Arity {
            name: "assert".into(),
            expected: 1,
            got: 0,
        });
    }
    if args.iter().all(Value::truthy) {
        Ok(None)
    } else {
        Err(PyroError::AssertionFailed)
    }
}

fn print(exec: &mut Exec, args: Vec<Value>) -> Result<Option<Value>> {
    let text: Vec<String> = args
        .iter()
        .map(|arg| match arg {
            Value::Str(s) => s.clone(),
            other => exec.registry().encode(other),
        })
        .collect();
    info!("{}", text.join(" "));
    Ok(None)
}

fn depth(exec: &mut Exec, args: Vec<Value>) -> Result<Option<Value>> {
    arity("depth", &args, 0)?;
    Ok(Some(Value::Int(exec.data_stack().len() as i64)))
}

fn drop_top(exec: &mut Exec, args: Vec<Value>) -> Result<Option<Value>> {
    arity("drop", &args, 0)?;
    exec.pop()?;
    Ok(None)
}

fn dup(exec: &mut Exec, args: Vec<Value>) -> Result<Option<Value>> {
    arity("dup", &args, 0)?;
    let top = exec.peek().cloned().ok_or(PyroError::StackUnderflow)?;
    Ok(Some(top))
}

fn swap(exec: &mut Exec, args: Vec<Value>) -> Result<Option<Value>> {
    arity("swap", &args, 0)?;
    let top = exec.pop()?;
    let below = match exec.pop() {
        Ok(value) => value,
        Err(e) => {
            exec.push(top);
            return Err(e);
        }
    };
    exec.push(top);
    Ok(Some(below))
}

fn clear(exec: &mut Exec, args: Vec<Value>) -> Result<Option<Value>> {
    arity("clear", &args, 0)?;
    exec.clear();
    Ok(None)
}

fn len(_exec: &mut Exec, args: Vec<Value>) -> Result<Option<Value>> {
    let length = match single("len", args)? {
        Value::Str(s) => s.chars().count(),
        Value::List(items) => items.len(),
        other => {
            return Err(PyroError::TypeError(format!(
                "len expects a string or list, got {}",
                other.type_name()
            )));
        }
    };
    Ok(Some(Value::Int(length as i64)))
}

fn to_str(exec: &mut Exec, args: Vec<Value>) -> Result<Option<Value>> {
    let text = match single("str", args)? {
        Value::Str(s) => s,
        other => exec.registry().encode(&other),
    };
    Ok(Some(Value::Str(text)))
}

fn type_of(_exec: &mut Exec, args: Vec<Value>) -> Result<Option<Value>> {
    let value = single("type", args)?;
    Ok(Some(Value::Str(value.type_name().to_string())))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::language::{Context, Language};
    use crate::registry::Registry;
    use std::sync::Arc;

    fn run(source: &str) -> (Exec, Result<()>) {
        let mut exec = Exec::with_builtins(Arc::new(Registry::new()));
        let ctx = Context::with_language(exec.registry().clone(), Language::Rho);
        let result = ctx
            .translate(source, exec.scope())
            .and_then(|cont| tokio_test::block_on(exec.run(&cont)));
        (exec, result)
    }

    #[test]
    fn test_names_are_installed() {
        let scope = Scope::new();
        install(&scope);
        for name in names() {
            assert!(scope.contains(name), "{} missing", name);
        }
        assert_eq!(names().count(), 10);
    }

    #[test]
    fn test_stack_manipulation() {
        let (exec, result) = run("1; 2; swap(); dup(); depth()");
        result.unwrap();
        assert_eq!(
            exec.data_stack(),
            &[Value::Int(2), Value::Int(1), Value::Int(1), Value::Int(3)]
        );

        let (exec, result) = run("1; 2; drop()");
        result.unwrap();
        assert_eq!(exec.data_stack(), &[Value::Int(1)]);

        let (exec, result) = run("1; swap()");
        assert_eq!(result, Err(PyroError::StackUnderflow));
        assert_eq!(exec.data_stack()[0], Value::Int(1));
    }

    #[test]
    fn test_assert() {
        let (_, result) = run("assert(1 < 2, \"x\")");
        assert!(result.is_ok());
        let (exec, result) = run("assert(1 > 2)");
        assert_eq!(result, Err(PyroError::AssertionFailed));
        assert_eq!(
            exec.data_stack(),
            &[Value::Str("Error: Assertion failed".into())]
        );
    }

    #[test]
    fn test_inspection() {
        let (exec, result) = run("len(\"héllo\"); len([1, 2]); str([1, \"a\"]); type(1.5); str(\"raw\")");
        result.unwrap();
        assert_eq!(
            exec.data_stack(),
            &[
                Value::Int(5),
                Value::Int(2),
                Value::Str("[1 \"a\"]".into()),
                Value::Str("float".into()),
                Value::Str("raw".into()),
            ]
        );
        let (_, result) = run("len(3)");
        assert!(matches!(result, Err(PyroError::TypeError(_))));
    }
}
