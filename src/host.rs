//! Host-supplied interface consumed by `Call` opcodes: user-defined
//! functions and host builtins share one case-insensitive registry.

use std::collections::HashMap;

use crate::error::HostError;

/// A runtime value flowing through `Call` argument binding and
/// builtin return values.
#[derive(Debug, Clone, PartialEq)]
pub enum RuntimeValue {
    Int(i64),
    Float(f64),
    Str(String),
    Array(Vec<RuntimeValue>),
}

impl RuntimeValue {
    pub fn as_str(&self) -> String {
        match self {
            RuntimeValue::Int(i) => i.to_string(),
            RuntimeValue::Float(f) => f.to_string(),
            RuntimeValue::Str(s) => s.clone(),
            RuntimeValue::Array(items) => format!("{:?}", items),
        }
    }

    pub fn as_int(&self) -> Result<i64, HostError> {
        match self {
            RuntimeValue::Int(i) => Ok(*i),
            RuntimeValue::Float(f) => Ok(*f as i64),
            RuntimeValue::Str(s) => Err(HostError::TypeMismatch(format!("expected int, got string '{}'", s))),
            RuntimeValue::Array(_) => Err(HostError::TypeMismatch("expected int, got array".to_string())),
        }
    }

    pub fn is_truthy(&self) -> bool {
        match self {
            RuntimeValue::Int(i) => *i != 0,
            RuntimeValue::Float(f) => *f != 0.0,
            RuntimeValue::Str(s) => !s.is_empty(),
            RuntimeValue::Array(items) => !items.is_empty(),
        }
    }
}

/// Whether a builtin returns a string or an integer by default: the
/// distinction a `Call` site needs before it can bind the result.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReturnKind {
    Str,
    Int,
}

/// A host builtin: implementation plus its declared return kind.
pub struct Builtin {
    pub return_kind: ReturnKind,
    pub call: Box<dyn Fn(&[RuntimeValue]) -> Result<RuntimeValue, HostError> + Send + Sync>,
}

/// Case-insensitive builtin registry backing `Call` opcode resolution.
/// User-defined FILLY functions are tracked separately by the
/// scheduler, which consults its own table before falling back here.
#[derive(Default)]
pub struct HostEnvironment {
    builtins: HashMap<String, Builtin>,
}

/// Exemplary string-returning builtin names; everything else
/// defaults to returning an integer.
pub const STRING_RETURNING_BUILTINS: &[&str] = &[
    "strcode", "substr", "strprint", "strinput", "strup", "strlow", "getinistr", "strreadf", "getcwd",
];

impl HostEnvironment {
    pub fn new() -> Self {
        Self::default()
    }

    fn normalize(name: &str) -> String {
        name.to_ascii_lowercase()
    }

    pub fn register_builtin(&mut self, name: &str, return_kind: ReturnKind, call: impl Fn(&[RuntimeValue]) -> Result<RuntimeValue, HostError> + Send + Sync + 'static) {
        self.builtins.insert(
            Self::normalize(name),
            Builtin {
                return_kind,
                call: Box::new(call),
            },
        );
    }

    pub fn lookup_builtin(&self, name: &str) -> Option<&Builtin> {
        self.builtins.get(&Self::normalize(name))
    }

    /// Resolves and invokes a builtin. Unknown names are a `HostError`,
    /// never a panic. Callers check the scheduler's user-function table
    /// before falling back to this.
    pub fn call(&self, name: &str, args: &[RuntimeValue]) -> Result<RuntimeValue, HostError> {
        match self.lookup_builtin(name) {
            Some(builtin) => (builtin.call)(args),
            None => Err(HostError::UnknownCallable(name.to_string())),
        }
    }

    /// Default return kind for names without a registered builtin
    /// implementation: callers that only need the static classification
    /// (e.g. a REPL's opcode dump) can use this without a live registry.
    pub fn default_return_kind(name: &str) -> ReturnKind {
        if STRING_RETURNING_BUILTINS.contains(&Self::normalize(name).as_str()) {
            ReturnKind::Str
        } else {
            ReturnKind::Int
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lookup_is_case_insensitive() {
        let mut env = HostEnvironment::new();
        env.register_builtin("StrUp", ReturnKind::Str, |args| {
            Ok(RuntimeValue::Str(args[0].as_str().to_ascii_uppercase()))
        });
        let result = env.call("strup", &[RuntimeValue::Str("abc".into())]).unwrap();
        assert_eq!(result, RuntimeValue::Str("ABC".to_string()));
    }

    #[test]
    fn unknown_callable_is_an_error_not_a_panic() {
        let env = HostEnvironment::new();
        let result = env.call("NoSuchThing", &[]);
        assert!(matches!(result, Err(HostError::UnknownCallable(_))));
    }

    #[test]
    fn string_returning_builtins_are_classified_by_default() {
        assert_eq!(HostEnvironment::default_return_kind("StrCode"), ReturnKind::Str);
        assert_eq!(HostEnvironment::default_return_kind("DrawLine"), ReturnKind::Int);
    }

    #[test]
    fn division_by_zero_is_a_host_error() {
        let mut env = HostEnvironment::new();
        env.register_builtin("Div", ReturnKind::Int, |args| {
            let a = args[0].as_int()?;
            let b = args[1].as_int()?;
            if b == 0 {
                return Err(HostError::DivisionByZero);
            }
            Ok(RuntimeValue::Int(a / b))
        });
        let result = env.call("div", &[RuntimeValue::Int(1), RuntimeValue::Int(0)]);
        assert_eq!(result, Err(HostError::DivisionByZero));
    }
}
