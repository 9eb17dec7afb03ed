//! A scripting environment of native functions and a small command language.
//!
//! `/api/exec` bodies are read line by line, one command per line, and every
//! command contributes one result value:
//!
//! | Command        | Result                                   |
//! |----------------|------------------------------------------|
//! | `echo <text>`  | `<text>`                                 |
//! | `sum <n>...`   | the sum of the integers                  |
//! | `uptime`       | seconds since the environment started    |
//! | `version`      | the host version                         |
//! | `nil`          | nil                                      |

use std::collections::HashMap;
use std::time::Instant;

use bytes::Bytes;
use devapi::platform::{ScriptEngine, ScriptError, ScriptResult, ScriptValue};
use tracing::{debug, warn};

pub type Value = ScriptValue<u32>;

/// A function callable from the server; it may register further functions, e.g. a
/// response producer.
pub type NativeFunction = Box<dyn FnMut(&mut NativeScripts, &[Value]) -> ScriptResult<u32>>;

pub struct NativeScripts {
    next_handle: u32,
    functions: HashMap<u32, NativeFunction>,
    started: Instant,
}

impl NativeScripts {
    pub fn new() -> Self {
        Self { next_handle: 0, functions: HashMap::new(), started: Instant::now() }
    }

    pub fn register(&mut self, function: impl FnMut(&mut NativeScripts, &[Value]) -> ScriptResult<u32> + 'static) -> u32 {
        self.next_handle += 1;
        self.functions.insert(self.next_handle, Box::new(function));
        self.next_handle
    }

    /// Handles not yet released.
    pub fn live(&self) -> usize {
        self.functions.len()
    }

    fn command(&self, line: &str) -> Result<Value, ScriptError> {
        let (name, rest) = line.split_once(' ').map_or((line, ""), |(name, rest)| (name, rest.trim()));
        match name {
            "echo" => Ok(Value::from(rest.to_owned())),
            "sum" => rest
                .split_whitespace()
                .map(|n| n.parse::<i64>().map_err(|_e| ScriptError::new(format!("sum: '{n}' is not an integer"))))
                .sum::<Result<i64, _>>()
                .map(Value::Integer),
            "uptime" => Ok(Value::Integer(i64::try_from(self.started.elapsed().as_secs()).unwrap_or(i64::MAX))),
            "version" => Ok(Value::from(env!("CARGO_PKG_VERSION"))),
            "nil" => Ok(Value::Nil),
            other => Err(ScriptError::new(format!("unknown command '{other}'"))),
        }
    }
}

impl Default for NativeScripts {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for NativeScripts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NativeScripts").field("live", &self.functions.len()).finish_non_exhaustive()
    }
}

impl ScriptEngine for NativeScripts {
    type Handle = u32;

    fn exec(&mut self, source: &[u8]) -> ScriptResult<u32> {
        let source = std::str::from_utf8(source).map_err(|_e| ScriptError::new("source is not utf-8"))?;
        source.lines().map(str::trim).filter(|line| !line.is_empty()).map(|line| self.command(line)).collect()
    }

    fn call(&mut self, function: &u32, args: &[Value]) -> ScriptResult<u32> {
        let mut native = self.functions.remove(function).ok_or_else(|| ScriptError::new(format!("function {function} was released")))?;
        let result = native(self, args);
        self.functions.insert(*function, native);
        result
    }

    fn release(&mut self, handle: u32) {
        if self.functions.remove(&handle).is_none() {
            warn!(handle, "released an unknown function");
        }
    }

    fn recover(&mut self) {
        debug!(live = self.functions.len(), "script error recovered");
    }
}

/// The request path of a callback invocation, without its query string.
fn path_of(args: &[Value]) -> Option<String> {
    let target = args.get(1)?.to_bytes()?;
    let target = String::from_utf8_lossy(&target).into_owned();
    Some(target.split_once('?').map_or(target.as_str(), |(path, _)| path).to_owned())
}

/// `GET /hello`: a plain text greeting.
pub fn hello(_scripts: &mut NativeScripts, args: &[Value]) -> ScriptResult<u32> {
    if path_of(args).as_deref() != Some("/hello") {
        return Ok(Vec::new());
    }
    Ok(vec![Value::Integer(200), Value::from("text/plain"), Value::from("hello from devapi-host\n")])
}

/// `GET /whoami`: the credentials the request carried.
pub fn whoami(_scripts: &mut NativeScripts, args: &[Value]) -> ScriptResult<u32> {
    if path_of(args).as_deref() != Some("/whoami") {
        return Ok(Vec::new());
    }
    let credentials = args.get(3).and_then(Value::to_bytes).unwrap_or_else(|| Bytes::from_static(b"anonymous"));
    Ok(vec![Value::Integer(200), Value::from("text/plain"), Value::Str(credentials)])
}

/// `GET /count?n=<lines>`: a chunked response of `n` lines, ten by default.
pub fn count(scripts: &mut NativeScripts, args: &[Value]) -> ScriptResult<u32> {
    if path_of(args).as_deref() != Some("/count") {
        return Ok(Vec::new());
    }
    let target = args.get(1).and_then(Value::to_bytes).unwrap_or_default();
    let lines = String::from_utf8_lossy(&target)
        .split_once("?n=")
        .and_then(|(_, n)| n.parse::<i64>().ok())
        .unwrap_or(10);

    let mut line = 0;
    let producer = scripts.register(move |_, args| {
        let lines = args.first().and_then(Value::to_integer).unwrap_or(0);
        if line >= lines {
            return Ok(Vec::new());
        }
        line += 1;
        Ok(vec![Value::from(format!("line {line} of {lines}\n"))])
    });
    Ok(vec![Value::Integer(200), Value::from("text/plain"), Value::Function(producer), Value::Integer(lines)])
}
