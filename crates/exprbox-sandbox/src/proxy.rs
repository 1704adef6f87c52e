//! Host side of the cross-boundary data proxy protocol.
//!
//! Guest proxies never hold host data. They hold a path (root name followed by
//! keys) plus the generation of the call they were created in, and ask the
//! host for one level at a time:
//!
//! - [`value_at_path`] describes the value at a path: primitives are returned
//!   as is, objects as their key list, arrays as their length, functions as a
//!   name marker (never for native functions)
//! - [`array_element_at_path`] describes one element of the array at a path
//! - [`call_function_at_path`] calls the function at a path with its parent as
//!   receiver
//!
//! The op wrappers in [`crate::ops`] bind these to the [`ActiveData`] of the
//! running call.

use std::fmt;

use exprbox_error::codes;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::data::{DataRef, DataValue, WorkflowData};

/// One step of a data path.
///
/// Names index objects and, when they are canonical numbers, arrays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PathKey {
    /// Array index.
    Index(u32),
    /// Property name.
    Name(String),
}

impl PathKey {
    fn as_key(&self) -> std::borrow::Cow<'_, str> {
        match self {
            Self::Index(i) => i.to_string().into(),
            Self::Name(name) => name.as_str().into(),
        }
    }
}

impl From<&str> for PathKey {
    fn from(name: &str) -> Self {
        Self::Name(name.to_string())
    }
}

impl From<u32> for PathKey {
    fn from(i: u32) -> Self {
        Self::Index(i)
    }
}

/// What a guest proxy learns from a read.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "camelCase")]
pub enum ProxyRead {
    /// A JSON primitive, returned by value.
    Primitive {
        /// The value.
        value: Value,
    },
    /// An object; members are read lazily.
    Object {
        /// Member names, in order.
        keys: Vec<String>,
    },
    /// An array; elements are read lazily.
    Array {
        /// Number of elements.
        length: usize,
    },
    /// A callable host function.
    Function {
        /// Function name.
        name: String,
    },
    /// Nothing readable (including native functions).
    Undefined,
    /// The read failed.
    Error {
        /// Error code.
        code: String,
        /// Error message.
        message: String,
    },
}

impl From<ProxyError> for ProxyRead {
    fn from(e: ProxyError) -> Self {
        Self::Error {
            code: e.code.to_string(),
            message: e.message,
        }
    }
}

/// A failed proxy operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProxyError {
    /// Error code, one of the [`codes`] constants.
    pub code: &'static str,
    /// Error message.
    pub message: String,
}

impl ProxyError {
    pub(crate) fn stale() -> Self {
        Self {
            code: codes::STALE_REFERENCE,
            message: "data reference belongs to a previous evaluation".into(),
        }
    }

    fn unresolved(path: &[PathKey]) -> Self {
        Self {
            code: codes::UNRESOLVED_PATH,
            message: format!("data path {} does not resolve", render_path(path)),
        }
    }
}

impl fmt::Display for ProxyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.code, self.message)
    }
}

impl std::error::Error for ProxyError {}

fn render_path(path: &[PathKey]) -> String {
    let mut out = String::new();
    for (i, key) in path.iter().enumerate() {
        match key {
            PathKey::Index(n) => out.push_str(&format!("[{n}]")),
            PathKey::Name(name) if i == 0 => out.push_str(name),
            PathKey::Name(name) => {
                out.push('.');
                out.push_str(name);
            }
        }
    }
    out
}

/// Per-call counters of cross-boundary traffic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ProxyStats {
    /// `value_at_path` calls.
    pub value_reads: usize,
    /// `array_element_at_path` calls.
    pub element_reads: usize,
    /// `call_function_at_path` calls.
    pub function_calls: usize,
}

/// The data bound to the proxy ops for the running call.
///
/// Lives in the runtime's op state. Installing a new one replaces (and drops)
/// the previous call's data.
#[derive(Debug)]
pub struct ActiveData {
    /// Generation the guest proxies of this call were created with.
    pub generation: u32,
    /// The call's data.
    pub data: WorkflowData,
    /// Traffic counters.
    pub stats: ProxyStats,
}

impl ActiveData {
    /// Bind `data` under `generation`.
    pub fn new(generation: u32, data: WorkflowData) -> Self {
        Self {
            generation,
            data,
            stats: ProxyStats::default(),
        }
    }
}

/// Resolve `path`, returning the value and its immediate parent.
fn resolve<'a>(
    data: &'a WorkflowData,
    path: &[PathKey],
) -> Result<(Option<DataRef<'a>>, DataRef<'a>), ProxyError> {
    let Some((root, rest)) = path.split_first() else {
        return Err(ProxyError::unresolved(path));
    };
    let mut current = data
        .get(&root.as_key())
        .map(DataRef::Data)
        .ok_or_else(|| ProxyError::unresolved(path))?;
    let mut parent = None;
    for key in rest {
        let next = current
            .get(&key.as_key())
            .ok_or_else(|| ProxyError::unresolved(path))?;
        parent = Some(current);
        current = next;
    }
    Ok((parent, current))
}

/// Describe a resolved value without copying its members.
pub fn describe(value: DataRef<'_>) -> ProxyRead {
    match value {
        DataRef::Data(DataValue::Json(v)) | DataRef::Json(v) => match v {
            Value::Object(map) => ProxyRead::Object {
                keys: map.keys().cloned().collect(),
            },
            Value::Array(items) => ProxyRead::Array {
                length: items.len(),
            },
            primitive => ProxyRead::Primitive {
                value: primitive.clone(),
            },
        },
        DataRef::Data(DataValue::Object(map)) => ProxyRead::Object {
            keys: map.keys().cloned().collect(),
        },
        DataRef::Data(DataValue::Array(items)) => ProxyRead::Array {
            length: items.len(),
        },
        DataRef::Data(DataValue::Function(f)) if f.is_native() => ProxyRead::Undefined,
        DataRef::Data(DataValue::Function(f)) => ProxyRead::Function {
            name: f.name().to_string(),
        },
    }
}

/// Describe the value at `path`.
pub fn value_at_path(data: &WorkflowData, path: &[PathKey]) -> Result<ProxyRead, ProxyError> {
    let (_, value) = resolve(data, path)?;
    Ok(describe(value))
}

/// Describe element `index` of the array at `path`.
pub fn array_element_at_path(
    data: &WorkflowData,
    path: &[PathKey],
    index: usize,
) -> Result<ProxyRead, ProxyError> {
    let (_, array) = resolve(data, path)?;
    match array.element(index) {
        Some(element) => Ok(describe(element)),
        None => Err(ProxyError {
            code: codes::UNRESOLVED_PATH,
            message: format!("{}[{index}] is out of range", render_path(path)),
        }),
    }
}

/// Call the function at `path` with its parent as receiver.
pub fn call_function_at_path(
    data: &WorkflowData,
    path: &[PathKey],
    args: &[Value],
) -> Result<Value, ProxyError> {
    let (parent, target) = resolve(data, path)?;
    let Some(function) = target.as_function() else {
        return Err(ProxyError {
            code: codes::NOT_A_FUNCTION,
            message: format!("{} is not a function", render_path(path)),
        });
    };
    if function.is_native() {
        return Err(ProxyError {
            code: codes::SECURITY_VIOLATION,
            message: format!("{} is a native function and cannot be called", render_path(path)),
        });
    }
    function.invoke(parent, args).map_err(|message| ProxyError {
        code: codes::HOST_FUNCTION_ERROR,
        message: format!("{} failed: {message}", render_path(path)),
    })
}
