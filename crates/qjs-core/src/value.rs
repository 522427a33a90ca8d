//! Tagged engine values.
//!
//! [`Value`] is a plain copy of a `JSValue`: it has no lifetime logic of its
//! own. Heap-resident values (tags up to [`Tag::Object`]) carry a native
//! reference count owned by whoever produced them; the wrapper layer
//! ([`crate::QjsValue`]) is the normal owner on the host side.

use std::fmt;
use std::hash::{Hash, Hasher};

use qjs_sys::*;

use crate::error::{QjsError, QjsResult};

/// Value discriminant with every float encoding collapsed to [`Tag::Float64`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Tag {
    BigDecimal,
    BigInt,
    BigFloat,
    Symbol,
    String,
    Module,
    FunctionBytecode,
    Object,
    Int,
    Bool,
    Null,
    Undefined,
    Uninitialized,
    CatchOffset,
    Exception,
    Float64,
    /// Tag value not known to this binding
    Other(i32),
}

impl Tag {
    pub fn from_raw(tag: i32) -> Self {
        match tag {
            JS_TAG_BIG_DECIMAL => Tag::BigDecimal,
            JS_TAG_BIG_INT => Tag::BigInt,
            JS_TAG_BIG_FLOAT => Tag::BigFloat,
            JS_TAG_SYMBOL => Tag::Symbol,
            JS_TAG_STRING => Tag::String,
            JS_TAG_MODULE => Tag::Module,
            JS_TAG_FUNCTION_BYTECODE => Tag::FunctionBytecode,
            JS_TAG_OBJECT => Tag::Object,
            JS_TAG_INT => Tag::Int,
            JS_TAG_BOOL => Tag::Bool,
            JS_TAG_NULL => Tag::Null,
            JS_TAG_UNDEFINED => Tag::Undefined,
            JS_TAG_UNINITIALIZED => Tag::Uninitialized,
            JS_TAG_CATCH_OFFSET => Tag::CatchOffset,
            JS_TAG_EXCEPTION => Tag::Exception,
            JS_TAG_FLOAT64 => Tag::Float64,
            other => Tag::Other(other),
        }
    }

    pub fn as_raw(self) -> i32 {
        match self {
            Tag::BigDecimal => JS_TAG_BIG_DECIMAL,
            Tag::BigInt => JS_TAG_BIG_INT,
            Tag::BigFloat => JS_TAG_BIG_FLOAT,
            Tag::Symbol => JS_TAG_SYMBOL,
            Tag::String => JS_TAG_STRING,
            Tag::Module => JS_TAG_MODULE,
            Tag::FunctionBytecode => JS_TAG_FUNCTION_BYTECODE,
            Tag::Object => JS_TAG_OBJECT,
            Tag::Int => JS_TAG_INT,
            Tag::Bool => JS_TAG_BOOL,
            Tag::Null => JS_TAG_NULL,
            Tag::Undefined => JS_TAG_UNDEFINED,
            Tag::Uninitialized => JS_TAG_UNINITIALIZED,
            Tag::CatchOffset => JS_TAG_CATCH_OFFSET,
            Tag::Exception => JS_TAG_EXCEPTION,
            Tag::Float64 => JS_TAG_FLOAT64,
            Tag::Other(raw) => raw,
        }
    }

    /// Values with this tag point at a reference-counted heap cell
    pub fn has_ref_count(self) -> bool {
        nanbox::has_ref_count(self.as_raw())
    }

    pub fn name(self) -> &'static str {
        match self {
            Tag::BigDecimal => "bigdecimal",
            Tag::BigInt => "bigint",
            Tag::BigFloat => "bigfloat",
            Tag::Symbol => "symbol",
            Tag::String => "string",
            Tag::Module => "module",
            Tag::FunctionBytecode => "function bytecode",
            Tag::Object => "object",
            Tag::Int => "int",
            Tag::Bool => "boolean",
            Tag::Null => "null",
            Tag::Undefined => "undefined",
            Tag::Uninitialized => "uninitialized",
            Tag::CatchOffset => "catch offset",
            Tag::Exception => "exception",
            Tag::Float64 => "float64",
            Tag::Other(_) => "unknown",
        }
    }
}

impl fmt::Display for Tag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// A fixed-size tagged engine value
///
/// Equality and hashing are bitwise over payload and tag. Doubles are
/// normalized on construction, so every NaN compares equal to [`Value::nan`].
#[derive(Clone, Copy)]
#[repr(transparent)]
pub struct Value(pub(crate) JSValue);

impl Value {
    pub const UNDEFINED: Value = Value(JS_UNDEFINED);
    pub const NULL: Value = Value(JS_NULL);
    pub const TRUE: Value = Value(JS_TRUE);
    pub const FALSE: Value = Value(JS_FALSE);
    pub const EXCEPTION: Value = Value(JS_EXCEPTION);
    pub const UNINITIALIZED: Value = Value(JS_UNINITIALIZED);

    /// Wrap a raw engine value without touching its reference count
    pub fn from_raw(raw: JSValue) -> Self {
        Value(raw)
    }

    pub fn as_raw(self) -> JSValue {
        self.0
    }

    pub fn from_bool(b: bool) -> Self {
        Value(JS_NewBool(b))
    }

    pub fn from_i32(n: i32) -> Self {
        Value(JS_NewInt32(n))
    }

    /// Integers outside the `i32` range are stored as doubles
    pub fn from_i64(n: i64) -> Self {
        Value(JS_NewInt64(n))
    }

    /// Always tagged [`Tag::Float64`]; NaN is canonicalized
    pub fn from_f64(d: f64) -> Self {
        if d.is_nan() {
            Self::nan()
        } else {
            Value(__JS_NewFloat64(d))
        }
    }

    /// The canonical NaN
    pub fn nan() -> Self {
        Value(JS_NAN)
    }

    /// Tag extracted from the raw value, without float collapse
    pub fn raw_tag(self) -> i32 {
        JS_VALUE_GET_TAG(self.0)
    }

    pub fn tag(self) -> Tag {
        Tag::from_raw(JS_VALUE_GET_NORM_TAG(self.0))
    }

    pub fn is_nan(self) -> bool {
        JS_VALUE_IS_NAN(self.0)
    }

    pub fn is_undefined(self) -> bool {
        self.tag() == Tag::Undefined
    }

    pub fn is_null(self) -> bool {
        self.tag() == Tag::Null
    }

    pub fn is_exception(self) -> bool {
        self.tag() == Tag::Exception
    }

    pub fn is_object(self) -> bool {
        self.tag() == Tag::Object
    }

    pub fn is_string(self) -> bool {
        self.tag() == Tag::String
    }

    pub fn is_number(self) -> bool {
        matches!(self.tag(), Tag::Int | Tag::Float64)
    }

    /// Heap-resident values carry a native reference count
    pub fn has_ref_count(self) -> bool {
        JS_VALUE_HAS_REF_COUNT(self.0)
    }

    pub fn try_bool(self) -> Option<bool> {
        match self.tag() {
            Tag::Bool => Some(JS_VALUE_GET_INT(self.0) != 0),
            _ => None,
        }
    }

    /// `Int` values, and doubles that hold an exact `i32`
    pub fn try_i32(self) -> Option<i32> {
        match self.tag() {
            Tag::Int => Some(JS_VALUE_GET_INT(self.0)),
            Tag::Float64 => {
                let d = JS_VALUE_GET_FLOAT64(self.0);
                let n = d as i32;
                ((n as f64).to_bits() == d.to_bits()).then_some(n)
            }
            _ => None,
        }
    }

    pub fn try_f64(self) -> Option<f64> {
        match self.tag() {
            Tag::Int => Some(JS_VALUE_GET_INT(self.0) as f64),
            Tag::Float64 => {
                let bits = JS_VALUE_GET_FLOAT64(self.0).to_bits();
                Some(f64::from_bits(nanbox::canonicalize_f64_bits(bits)))
            }
            _ => None,
        }
    }

    pub fn to_bool(self) -> QjsResult<bool> {
        self.try_bool()
            .ok_or_else(|| QjsError::type_error("boolean", self.tag().name()))
    }

    pub fn to_i32(self) -> QjsResult<i32> {
        self.try_i32()
            .ok_or_else(|| QjsError::type_error("int32", self.tag().name()))
    }

    pub fn to_f64(self) -> QjsResult<f64> {
        self.try_f64()
            .ok_or_else(|| QjsError::type_error("number", self.tag().name()))
    }

    /// Native cell address for heap values, `None` for immediates
    pub fn heap_ptr(self) -> Option<*mut std::ffi::c_void> {
        self.has_ref_count().then(|| JS_VALUE_GET_PTR(self.0))
    }

    /// Class id stored in the object header
    ///
    /// # Safety
    /// The value must be a live object.
    pub unsafe fn object_class_id(self) -> Option<u16> {
        if !self.is_object() {
            return None;
        }
        let ptr = JS_VALUE_GET_PTR(self.0) as *const u8;
        // SAFETY: JSObject starts with a 4-byte ref count, two flag bytes,
        // then the 16-bit class id; the caller guarantees the object is live.
        unsafe { Some(std::ptr::read_unaligned(ptr.add(6) as *const u16)) }
    }

    /// Identity key: raw tag plus payload bits, with every NaN folded
    /// into the canonical one
    pub(crate) fn identity(self) -> (i32, u64) {
        let raw = if self.is_nan() { JS_NAN } else { self.0 };
        (JS_VALUE_GET_TAG(raw), JS_VALUE_GET_BITS(raw))
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        self.identity() == other.identity()
    }
}

impl Eq for Value {}

impl Hash for Value {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity().hash(state);
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.tag() {
            Tag::Int => write!(f, "Value(int {})", JS_VALUE_GET_INT(self.0)),
            Tag::Bool => write!(f, "Value({})", JS_VALUE_GET_INT(self.0) != 0),
            Tag::Float64 => write!(f, "Value(float64 {})", JS_VALUE_GET_FLOAT64(self.0)),
            Tag::Null | Tag::Undefined => write!(f, "Value({})", self.tag()),
            tag if tag.has_ref_count() => {
                write!(f, "Value({} @ {:p})", tag, JS_VALUE_GET_PTR(self.0))
            }
            tag => write!(f, "Value({})", tag),
        }
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::from_bool(b)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::from_i32(n)
    }
}

impl From<f64> for Value {
    fn from(d: f64) -> Self {
        Value::from_f64(d)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_nan_is_canonical() {
        let computed = Value::from_f64(f64::INFINITY - f64::INFINITY);
        let negative = Value::from_f64(-f64::NAN);
        let payload = Value::from_f64(f64::from_bits(0x7ff0_0000_0000_0bad));
        for v in [computed, negative, payload] {
            assert!(v.is_nan());
            assert_eq!(v.tag(), Tag::Float64);
            assert_eq!(v, Value::nan());
            assert_eq!(v.try_f64().map(f64::to_bits), Some(nanbox::CANONICAL_NAN_BITS));
        }
    }

    #[test]
    fn test_raw_nan_payloads_compare_canonical() {
        use std::collections::HashSet;

        // Boxed as-is, the way engine arithmetic stores its results
        let negative = Value::from_raw(__JS_NewFloat64(f64::from_bits(0xfff8_0000_0000_0000)));
        let payload = Value::from_raw(__JS_NewFloat64(f64::from_bits(0x7ff8_0000_0000_0001)));
        for v in [negative, payload] {
            assert!(v.is_nan());
            assert_eq!(v, Value::nan());
            assert_eq!(v.try_f64().map(f64::to_bits), Some(nanbox::CANONICAL_NAN_BITS));
        }

        let set: HashSet<Value> = [negative, payload, Value::nan()].into_iter().collect();
        assert_eq!(set.len(), 1);
        assert_ne!(Value::from_f64(1.5), Value::nan());
    }

    #[test]
    fn test_non_float_tags_are_never_nan() {
        let values = [
            Value::UNDEFINED,
            Value::NULL,
            Value::TRUE,
            Value::FALSE,
            Value::EXCEPTION,
            Value::UNINITIALIZED,
            Value::from_i32(0),
            Value::from_i32(-1),
        ];
        for v in values {
            assert!(!v.is_nan(), "{:?}", v);
        }
        assert!(!Value::from_f64(1.0).is_nan());
    }

    #[test]
    fn test_int_round_trip() {
        for n in [0, 1, -1, 42, i32::MIN, i32::MAX] {
            let v = Value::from_i32(n);
            assert_eq!(v.tag(), Tag::Int);
            assert_eq!(v.try_i32(), Some(n));
            assert_eq!(v.to_i32().unwrap(), n);
        }
    }

    #[test]
    fn test_double_round_trip() {
        for d in [0.5, -0.0, 1e300, f64::MIN_POSITIVE, f64::INFINITY, f64::NEG_INFINITY] {
            let v = Value::from_f64(d);
            assert_eq!(v.tag(), Tag::Float64);
            assert_eq!(v.try_f64().unwrap().to_bits(), d.to_bits());
        }
    }

    #[test]
    fn test_bool_round_trip() {
        assert_eq!(Value::from_bool(true).try_bool(), Some(true));
        assert_eq!(Value::from_bool(false).to_bool().unwrap(), false);
    }

    #[test]
    fn test_try_conversions_report_mismatch() {
        assert_eq!(Value::NULL.try_i32(), None);
        assert_eq!(Value::TRUE.try_f64(), None);
        assert_eq!(Value::from_i32(1).try_bool(), None);
        assert_eq!(Value::from_f64(1.5).try_i32(), None);
        assert_eq!(Value::from_f64(3.0).try_i32(), Some(3));

        let err = Value::UNDEFINED.to_f64().unwrap_err();
        assert_eq!(err.to_string(), "Type error: expected number, got undefined");
    }

    #[test]
    fn test_i64_storage() {
        assert_eq!(Value::from_i64(12).tag(), Tag::Int);
        let big = Value::from_i64(1 << 40);
        assert_eq!(big.tag(), Tag::Float64);
        assert_eq!(big.try_f64(), Some((1u64 << 40) as f64));
    }

    #[test]
    fn test_tag_mapping() {
        for raw in -11..=7 {
            assert_eq!(Tag::from_raw(raw).as_raw(), raw);
        }
        assert!(Tag::Object.has_ref_count());
        assert!(Tag::String.has_ref_count());
        assert!(!Tag::Int.has_ref_count());
        assert!(Value::from_i32(3).heap_ptr().is_none());
    }

    #[test]
    fn test_bitwise_equality() {
        assert_eq!(Value::from_i32(7), Value::from_i32(7));
        assert_ne!(Value::from_i32(7), Value::from_f64(7.0));
        assert_ne!(Value::NULL, Value::UNDEFINED);
    }
}
