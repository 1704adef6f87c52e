//! Host-owned data an expression can read.
//!
//! A [`WorkflowData`] is an ordered set of named roots (`$json`, `$input`,
//! `$`, ...). Roots hold plain JSON, nested host structures, or host
//! functions. None of it is ever copied into the isolate wholesale; the guest
//! reads it one path at a time through the proxy ops.

use std::fmt;
use std::sync::Arc;

use exprbox_error::ExpressionError;
use indexmap::IndexMap;
use serde_json::Value;

/// Signature of a host function callable from expressions.
///
/// The first argument is the receiver: the value that held the function, or
/// `None` for a function stored directly as a root.
pub type HostCall =
    Arc<dyn Fn(Option<DataRef<'_>>, &[Value]) -> Result<Value, String> + Send + Sync>;

/// Whether a host function may be exposed to guest code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FunctionKind {
    /// An ordinary host function. Readable as a function marker and callable.
    Defined,
    /// A builtin. Reads as `undefined` and refuses to be called.
    Native,
}

/// A host function stored in [`WorkflowData`].
#[derive(Clone)]
pub struct HostFunction {
    name: String,
    kind: FunctionKind,
    call: HostCall,
}

impl HostFunction {
    /// A callable host function.
    pub fn new<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Option<DataRef<'_>>, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            kind: FunctionKind::Defined,
            call: Arc::new(f),
        }
    }

    /// A builtin that must never reach guest code.
    pub fn native<F>(name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Option<DataRef<'_>>, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        Self {
            kind: FunctionKind::Native,
            ..Self::new(name, f)
        }
    }

    /// Function name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Function kind.
    pub fn kind(&self) -> FunctionKind {
        self.kind
    }

    /// Whether this is a builtin that is never exposed.
    pub fn is_native(&self) -> bool {
        self.kind == FunctionKind::Native
    }

    pub(crate) fn invoke(&self, receiver: Option<DataRef<'_>>, args: &[Value]) -> Result<Value, String> {
        (self.call)(receiver, args)
    }
}

impl fmt::Debug for HostFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HostFunction")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish_non_exhaustive()
    }
}

/// A host data value.
#[derive(Debug, Clone)]
pub enum DataValue {
    /// Plain JSON.
    Json(Value),
    /// An object whose members may hold functions. Key order is preserved.
    Object(IndexMap<String, DataValue>),
    /// An array whose elements may hold functions.
    Array(Vec<DataValue>),
    /// A host function.
    Function(HostFunction),
}

impl From<Value> for DataValue {
    fn from(value: Value) -> Self {
        Self::Json(value)
    }
}

impl From<HostFunction> for DataValue {
    fn from(f: HostFunction) -> Self {
        Self::Function(f)
    }
}

impl FromIterator<(String, DataValue)> for DataValue {
    fn from_iter<I: IntoIterator<Item = (String, DataValue)>>(iter: I) -> Self {
        Self::Object(iter.into_iter().collect())
    }
}

/// A borrowed view into host data, over either representation.
#[derive(Debug, Clone, Copy)]
pub enum DataRef<'a> {
    /// A host data value.
    Data(&'a DataValue),
    /// A value inside a plain JSON subtree.
    Json(&'a Value),
}

impl<'a> DataRef<'a> {
    /// The member named `key` of an object, or the element at a numeric `key`
    /// of an array.
    pub fn get(self, key: &str) -> Option<DataRef<'a>> {
        match self {
            Self::Data(DataValue::Json(v)) => Self::Json(v).get(key),
            Self::Data(DataValue::Object(map)) => map.get(key).map(Self::Data),
            Self::Data(DataValue::Array(items)) => index(key).and_then(|i| items.get(i)).map(Self::Data),
            Self::Data(DataValue::Function(_)) => None,
            Self::Json(Value::Object(map)) => map.get(key).map(Self::Json),
            Self::Json(Value::Array(items)) => index(key).and_then(|i| items.get(i)).map(Self::Json),
            Self::Json(_) => None,
        }
    }

    /// The element at `i`, if this is an array.
    pub fn element(self, i: usize) -> Option<DataRef<'a>> {
        match self {
            Self::Data(DataValue::Json(v)) => Self::Json(v).element(i),
            Self::Data(DataValue::Array(items)) => items.get(i).map(Self::Data),
            Self::Json(Value::Array(items)) => items.get(i).map(Self::Json),
            _ => None,
        }
    }

    /// The host function, if this is one.
    pub fn as_function(self) -> Option<&'a HostFunction> {
        match self {
            Self::Data(DataValue::Function(f)) => Some(f),
            _ => None,
        }
    }

    /// Copy into plain JSON. Functions are dropped from objects and become
    /// `null` inside arrays.
    pub fn to_json(self) -> Value {
        match self {
            Self::Json(v) | Self::Data(DataValue::Json(v)) => v.clone(),
            Self::Data(DataValue::Object(map)) => Value::Object(
                map.iter()
                    .filter(|(_, v)| !matches!(v, DataValue::Function(_)))
                    .map(|(k, v)| (k.clone(), Self::Data(v).to_json()))
                    .collect(),
            ),
            Self::Data(DataValue::Array(items)) => {
                Value::Array(items.iter().map(|v| Self::Data(v).to_json()).collect())
            }
            Self::Data(DataValue::Function(_)) => Value::Null,
        }
    }
}

/// Canonical array index: digits only, no leading zeros.
fn index(key: &str) -> Option<usize> {
    if key.is_empty() || (key.len() > 1 && key.starts_with('0')) {
        return None;
    }
    if !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    key.parse().ok()
}

/// Named roots for one evaluation. Cheap to clone.
#[derive(Debug, Clone, Default)]
pub struct WorkflowData {
    roots: Arc<IndexMap<String, DataValue>>,
}

impl WorkflowData {
    /// Start building a data context.
    pub fn builder() -> WorkflowDataBuilder {
        WorkflowDataBuilder::default()
    }

    /// Build from a JSON object whose members become the roots.
    pub fn from_json(value: Value) -> Result<Self, ExpressionError> {
        match value {
            Value::Object(map) => Ok(map.into_iter().map(|(k, v)| (k, DataValue::Json(v))).collect()),
            other => Err(ExpressionError::other(
                exprbox_error::codes::EXPRESSION_ERROR,
                format!("workflow data must be a JSON object, got {}", json_type(&other)),
            )),
        }
    }

    /// The root named `name`.
    pub fn get(&self, name: &str) -> Option<&DataValue> {
        self.roots.get(name)
    }

    /// Root names, in insertion order.
    pub fn root_names(&self) -> impl Iterator<Item = &str> {
        self.roots.keys().map(String::as_str)
    }

    /// Number of roots.
    pub fn len(&self) -> usize {
        self.roots.len()
    }

    /// Whether there are no roots.
    pub fn is_empty(&self) -> bool {
        self.roots.is_empty()
    }
}

impl FromIterator<(String, DataValue)> for WorkflowData {
    fn from_iter<I: IntoIterator<Item = (String, DataValue)>>(iter: I) -> Self {
        Self {
            roots: Arc::new(iter.into_iter().collect()),
        }
    }
}

/// Builder for [`WorkflowData`].
#[derive(Debug, Default)]
pub struct WorkflowDataBuilder {
    roots: IndexMap<String, DataValue>,
}

impl WorkflowDataBuilder {
    /// Add (or replace) a root.
    pub fn root(mut self, name: impl Into<String>, value: impl Into<DataValue>) -> Self {
        self.roots.insert(name.into(), value.into());
        self
    }

    /// Add a callable host function as a root.
    pub fn function<F>(self, name: impl Into<String>, f: F) -> Self
    where
        F: Fn(Option<DataRef<'_>>, &[Value]) -> Result<Value, String> + Send + Sync + 'static,
    {
        let name = name.into();
        let function = HostFunction::new(name.clone(), f);
        self.root(name, function)
    }

    /// Finish.
    pub fn build(self) -> WorkflowData {
        WorkflowData {
            roots: Arc::new(self.roots),
        }
    }
}

pub(crate) fn json_type(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "boolean",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
