//! Conversion between engine values and host values

use std::sync::Arc;

use crate::context::{ContextInner, ContextShared};
use crate::error::{QjsError, QjsResult};
use crate::handle::QjsValue;
use crate::value::{Tag, Value};

/// A value on the host side of the boundary
///
/// Primitives and strings are copied out of the engine; everything that
/// lives on the engine heap (objects, symbols, big numbers) travels as a
/// tracked [`QjsValue`].
#[derive(Debug, PartialEq)]
pub enum HostValue {
    Undefined,
    Null,
    Bool(bool),
    Int(i32),
    Float(f64),
    String(String),
    Handle(QjsValue),
}

impl HostValue {
    pub fn is_undefined(&self) -> bool {
        matches!(self, HostValue::Undefined)
    }

    pub fn is_null(&self) -> bool {
        matches!(self, HostValue::Null)
    }

    /// `undefined` or `null`
    pub fn is_nullish(&self) -> bool {
        matches!(self, HostValue::Undefined | HostValue::Null)
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            HostValue::Bool(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_i32(&self) -> Option<i32> {
        match self {
            HostValue::Int(n) => Some(*n),
            HostValue::Float(d) if d.fract() == 0.0 && *d >= i32::MIN as f64 && *d <= i32::MAX as f64 => {
                Some(*d as i32)
            }
            _ => None,
        }
    }

    /// Any number, widened to `f64`
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            HostValue::Int(n) => Some(*n as f64),
            HostValue::Float(d) => Some(*d),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            HostValue::String(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_handle(&self) -> Option<&QjsValue> {
        match self {
            HostValue::Handle(h) => Some(h),
            _ => None,
        }
    }

    pub fn into_handle(self) -> Option<QjsValue> {
        match self {
            HostValue::Handle(h) => Some(h),
            _ => None,
        }
    }

    pub fn type_name(&self) -> &'static str {
        match self {
            HostValue::Undefined => "undefined",
            HostValue::Null => "null",
            HostValue::Bool(_) => "boolean",
            HostValue::Int(_) | HostValue::Float(_) => "number",
            HostValue::String(_) => "string",
            HostValue::Handle(_) => "handle",
        }
    }

    /// Throwing variants of the accessors above
    pub fn to_bool(&self) -> QjsResult<bool> {
        self.as_bool()
            .ok_or_else(|| QjsError::type_error("boolean", self.type_name()))
    }

    pub fn to_i32(&self) -> QjsResult<i32> {
        self.as_i32()
            .ok_or_else(|| QjsError::type_error("int32", self.type_name()))
    }

    pub fn to_f64(&self) -> QjsResult<f64> {
        self.as_f64()
            .ok_or_else(|| QjsError::type_error("number", self.type_name()))
    }

    pub fn to_str(&self) -> QjsResult<&str> {
        self.as_str()
            .ok_or_else(|| QjsError::type_error("string", self.type_name()))
    }

    /// Generic data for presentation layers; heap values go through `JSON.stringify`
    pub fn to_json_value(&self) -> QjsResult<serde_json::Value> {
        Ok(match self {
            HostValue::Undefined | HostValue::Null => serde_json::Value::Null,
            HostValue::Bool(b) => serde_json::Value::Bool(*b),
            HostValue::Int(n) => serde_json::Value::from(*n),
            HostValue::Float(d) => serde_json::Number::from_f64(*d)
                .map(serde_json::Value::Number)
                .unwrap_or(serde_json::Value::Null),
            HostValue::String(s) => serde_json::Value::String(s.clone()),
            HostValue::Handle(h) => match h.try_to_json(None)? {
                Some(text) => serde_json::from_str(&text)?,
                None => serde_json::Value::Null,
            },
        })
    }
}

impl From<()> for HostValue {
    fn from(_: ()) -> Self {
        HostValue::Undefined
    }
}

impl From<bool> for HostValue {
    fn from(b: bool) -> Self {
        HostValue::Bool(b)
    }
}

impl From<i32> for HostValue {
    fn from(n: i32) -> Self {
        HostValue::Int(n)
    }
}

/// Integers outside the `i32` range become doubles, as in the engine
impl From<i64> for HostValue {
    fn from(n: i64) -> Self {
        match i32::try_from(n) {
            Ok(n) => HostValue::Int(n),
            Err(_) => HostValue::Float(n as f64),
        }
    }
}

impl From<f64> for HostValue {
    fn from(d: f64) -> Self {
        HostValue::Float(d)
    }
}

impl From<&str> for HostValue {
    fn from(s: &str) -> Self {
        HostValue::String(s.to_string())
    }
}

impl From<String> for HostValue {
    fn from(s: String) -> Self {
        HostValue::String(s)
    }
}

impl From<QjsValue> for HostValue {
    fn from(v: QjsValue) -> Self {
        HostValue::Handle(v)
    }
}

impl<T: Into<HostValue>> From<Option<T>> for HostValue {
    fn from(v: Option<T>) -> Self {
        v.map(Into::into).unwrap_or(HostValue::Null)
    }
}

impl ContextInner {
    /// Engine value to host value
    ///
    /// With `free_original` the caller's reference is consumed: released for
    /// copied values, moved into the wrapper for heap values.
    pub(crate) fn to_host(
        &self,
        shared: &Arc<ContextShared>,
        value: Value,
        free_original: bool,
    ) -> QjsResult<HostValue> {
        let host = match value.tag() {
            Tag::Undefined | Tag::Uninitialized => HostValue::Undefined,
            Tag::Null => HostValue::Null,
            Tag::Bool => HostValue::Bool(value.to_bool()?),
            Tag::Int => HostValue::Int(value.to_i32()?),
            Tag::Float64 => HostValue::Float(value.to_f64()?),
            Tag::Exception => return Err(self.take_exception()),
            Tag::String => {
                let result = self.string_of(value);
                if free_original {
                    self.free(value);
                }
                HostValue::String(result?)
            }
            tag if tag.has_ref_count() => {
                let owned = if free_original { value } else { self.dup(value) };
                HostValue::Handle(self.wrap(shared, owned))
            }
            tag => {
                return Err(QjsError::InvalidCast(format!(
                    "cannot convert a value tagged {} to a host value",
                    tag
                )));
            }
        };
        Ok(host)
    }

    /// Host value to an owned engine value
    pub(crate) fn from_host(&self, value: &HostValue) -> QjsResult<Value> {
        match value {
            HostValue::Undefined => Ok(Value::UNDEFINED),
            HostValue::Null => Ok(Value::NULL),
            HostValue::Bool(b) => Ok(Value::from_bool(*b)),
            HostValue::Int(n) => Ok(Value::from_i32(*n)),
            HostValue::Float(d) => Ok(Value::from_f64(*d)),
            HostValue::String(s) => self.new_string(s),
            HostValue::Handle(h) => Ok(self.dup(h.borrow_in(self)?)),
        }
    }
}
