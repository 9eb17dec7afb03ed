//! The embedded scripting environment behind `/api/exec` and the callback chain.

use bytes::Bytes;
use thiserror::Error;

/// A failed script run, carrying the interpreter's message verbatim.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("{message}")]
pub struct ScriptError {
    message: String,
}

impl ScriptError {
    pub fn new<S: ToString>(message: S) -> Self {
        Self { message: message.to_string() }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

/// A value crossing the boundary between the server and the scripting environment.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptValue<H> {
    Nil,
    Bool(bool),
    Integer(i64),
    Number(f64),
    Str(Bytes),
    /// A callable registered in the environment; whoever holds it must release it.
    Function(H),
}

impl<H> ScriptValue<H> {
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Integer view with the interpreter's usual number coercion.
    #[allow(clippy::cast_possible_truncation, reason = "status codes are small integers")]
    pub fn to_integer(&self) -> Option<i64> {
        match self {
            Self::Integer(i) => Some(*i),
            Self::Number(n) if n.is_finite() => Some(*n as i64),
            Self::Str(s) => std::str::from_utf8(s).ok()?.trim().parse().ok(),
            _ => None,
        }
    }

    /// Byte-string view; numbers are rendered the way the interpreter prints them.
    pub fn to_bytes(&self) -> Option<Bytes> {
        match self {
            Self::Str(s) => Some(s.clone()),
            Self::Integer(i) => Some(Bytes::from(i.to_string())),
            Self::Number(n) => Some(Bytes::from(n.to_string())),
            _ => None,
        }
    }

    /// Text rendering used when joining `exec` results.
    pub fn display(&self) -> Bytes {
        match self {
            Self::Nil => Bytes::from_static(b"nil"),
            Self::Bool(true) => Bytes::from_static(b"true"),
            Self::Bool(false) => Bytes::from_static(b"false"),
            Self::Function(_) => Bytes::from_static(b"function"),
            other => other.to_bytes().unwrap_or_default(),
        }
    }
}

impl<H> From<&'static str> for ScriptValue<H> {
    fn from(s: &'static str) -> Self {
        Self::Str(Bytes::from_static(s.as_bytes()))
    }
}

impl<H> From<String> for ScriptValue<H> {
    fn from(s: String) -> Self {
        Self::Str(Bytes::from(s))
    }
}

impl<H> From<Bytes> for ScriptValue<H> {
    fn from(bytes: Bytes) -> Self {
        Self::Str(bytes)
    }
}

impl<H> From<i64> for ScriptValue<H> {
    fn from(i: i64) -> Self {
        Self::Integer(i)
    }
}

impl<H> From<bool> for ScriptValue<H> {
    fn from(b: bool) -> Self {
        Self::Bool(b)
    }
}

pub type ScriptResult<H> = Result<Vec<ScriptValue<H>>, ScriptError>;

/// Loads and runs code, and calls back into registered functions.
///
/// Handles are opaque owned references into the environment's registry. Every
/// handle obtained from a call result or passed to the server is released exactly
/// once through [`release`](ScriptEngine::release).
pub trait ScriptEngine {
    type Handle;

    /// Compiles and runs `source`, returning every value the chunk returned.
    fn exec(&mut self, source: &[u8]) -> ScriptResult<Self::Handle>;

    /// Calls a registered function; the arguments stay owned by the caller.
    fn call(&mut self, function: &Self::Handle, args: &[ScriptValue<Self::Handle>]) -> ScriptResult<Self::Handle>;

    fn release(&mut self, handle: Self::Handle);

    /// Resets the environment's error state after a failed run.
    fn recover(&mut self) {}

    /// Releases the handle held by `value`, if any.
    fn release_value(&mut self, value: ScriptValue<Self::Handle>) {
        if let ScriptValue::Function(handle) = value {
            self.release(handle);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    type Value = ScriptValue<u32>;

    #[test]
    fn integer_coercion() {
        assert_eq!(Value::Integer(404).to_integer(), Some(404));
        assert_eq!(Value::Number(200.0).to_integer(), Some(200));
        assert_eq!(Value::from("500").to_integer(), Some(500));
        assert_eq!(Value::from("five").to_integer(), None);
        assert_eq!(Value::Nil.to_integer(), None);
        assert_eq!(Value::Function(1).to_integer(), None);
    }

    #[test]
    fn display_of_exec_results() {
        assert_eq!(Value::from("hi").display(), "hi");
        assert_eq!(Value::Integer(3).display(), "3");
        assert_eq!(Value::Number(1.5).display(), "1.5");
        assert_eq!(Value::Bool(true).display(), "true");
        assert_eq!(Value::Function(7).display(), "function");
    }
}
