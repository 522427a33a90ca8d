//! Flag sets passed to evaluation and property operations.

use std::ops::{BitOr, BitOrAssign};
use std::os::raw::c_int;

use qjs_sys::*;

use crate::error::{QjsError, QjsResult};

/// Evaluation flags
///
/// The evaluation type is selected by exactly one of [`EvalFlags::GLOBAL`]
/// or [`EvalFlags::MODULE`]; no type bit means global. Setting both, or any
/// bit this binding does not know, is rejected before the engine is called.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct EvalFlags(u32);

impl EvalFlags {
    pub const GLOBAL: EvalFlags = EvalFlags(1 << 0);
    pub const MODULE: EvalFlags = EvalFlags(1 << 1);
    pub const STRICT: EvalFlags = EvalFlags(1 << 3);
    pub const STRIP: EvalFlags = EvalFlags(1 << 4);
    pub const COMPILE_ONLY: EvalFlags = EvalFlags(1 << 5);
    pub const BACKTRACE_BARRIER: EvalFlags = EvalFlags(1 << 6);

    const TYPE_BITS: u32 = Self::GLOBAL.0 | Self::MODULE.0;
    const KNOWN_BITS: u32 = Self::TYPE_BITS
        | Self::STRICT.0
        | Self::STRIP.0
        | Self::COMPILE_ONLY.0
        | Self::BACKTRACE_BARRIER.0;

    pub const fn empty() -> Self {
        EvalFlags(0)
    }

    /// Accepts any bit pattern; validity is checked by [`EvalFlags::to_native`]
    pub const fn from_bits(bits: u32) -> Self {
        EvalFlags(bits)
    }

    pub const fn bits(self) -> u32 {
        self.0
    }

    pub const fn contains(self, other: EvalFlags) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn is_module(self) -> bool {
        self.0 & Self::TYPE_BITS == Self::MODULE.0
    }

    /// Engine flags for `JS_Eval`
    pub fn to_native(self) -> QjsResult<c_int> {
        if self.0 & !Self::KNOWN_BITS != 0 || self.0 & Self::TYPE_BITS == Self::TYPE_BITS {
            return Err(QjsError::out_of_range("eval flags", self.0));
        }

        let mut native = if self.is_module() {
            JS_EVAL_TYPE_MODULE
        } else {
            JS_EVAL_TYPE_GLOBAL
        };
        if self.contains(Self::STRICT) {
            native |= JS_EVAL_FLAG_STRICT;
        }
        if self.contains(Self::STRIP) {
            native |= JS_EVAL_FLAG_STRIP;
        }
        if self.contains(Self::COMPILE_ONLY) {
            native |= JS_EVAL_FLAG_COMPILE_ONLY;
        }
        if self.contains(Self::BACKTRACE_BARRIER) {
            native |= JS_EVAL_FLAG_BACKTRACE_BARRIER;
        }
        Ok(native)
    }
}

impl BitOr for EvalFlags {
    type Output = EvalFlags;

    fn bitor(self, rhs: Self) -> Self {
        EvalFlags(self.0 | rhs.0)
    }
}

impl BitOrAssign for EvalFlags {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// Property attribute flags, same bit layout as the engine's `JS_PROP_*`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub struct PropertyFlags(c_int);

impl PropertyFlags {
    pub const NONE: PropertyFlags = PropertyFlags(0);
    pub const CONFIGURABLE: PropertyFlags = PropertyFlags(JS_PROP_CONFIGURABLE);
    pub const WRITABLE: PropertyFlags = PropertyFlags(JS_PROP_WRITABLE);
    pub const ENUMERABLE: PropertyFlags = PropertyFlags(JS_PROP_ENUMERABLE);
    pub const C_W_E: PropertyFlags = PropertyFlags(JS_PROP_C_W_E);
    pub const HAS_CONFIGURABLE: PropertyFlags = PropertyFlags(JS_PROP_HAS_CONFIGURABLE);
    pub const HAS_WRITABLE: PropertyFlags = PropertyFlags(JS_PROP_HAS_WRITABLE);
    pub const HAS_ENUMERABLE: PropertyFlags = PropertyFlags(JS_PROP_HAS_ENUMERABLE);
    pub const HAS_GET: PropertyFlags = PropertyFlags(JS_PROP_HAS_GET);
    pub const HAS_SET: PropertyFlags = PropertyFlags(JS_PROP_HAS_SET);
    pub const HAS_VALUE: PropertyFlags = PropertyFlags(JS_PROP_HAS_VALUE);
    pub const THROW: PropertyFlags = PropertyFlags(JS_PROP_THROW);
    /// Throw only when the running code is strict
    pub const THROW_STRICT: PropertyFlags = PropertyFlags(JS_PROP_THROW_STRICT);

    pub const fn from_bits(bits: c_int) -> Self {
        PropertyFlags(bits)
    }

    pub const fn bits(self) -> c_int {
        self.0
    }

    pub const fn contains(self, other: PropertyFlags) -> bool {
        self.0 & other.0 == other.0
    }
}

impl BitOr for PropertyFlags {
    type Output = PropertyFlags;

    fn bitor(self, rhs: Self) -> Self {
        PropertyFlags(self.0 | rhs.0)
    }
}

/// Selects which keys `own_property_names` reports
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct PropertyNameFlags(c_int);

impl PropertyNameFlags {
    pub const STRINGS: PropertyNameFlags = PropertyNameFlags(JS_GPN_STRING_MASK);
    pub const SYMBOLS: PropertyNameFlags = PropertyNameFlags(JS_GPN_SYMBOL_MASK);
    pub const PRIVATE: PropertyNameFlags = PropertyNameFlags(JS_GPN_PRIVATE_MASK);
    pub const ENUM_ONLY: PropertyNameFlags = PropertyNameFlags(JS_GPN_ENUM_ONLY);

    pub const fn bits(self) -> c_int {
        self.0
    }
}

impl Default for PropertyNameFlags {
    fn default() -> Self {
        Self::STRINGS | Self::ENUM_ONLY
    }
}

impl BitOr for PropertyNameFlags {
    type Output = PropertyNameFlags;

    fn bitor(self, rhs: Self) -> Self {
        PropertyNameFlags(self.0 | rhs.0)
    }
}

/// Optional engine features, added to a context one at a time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Intrinsic {
    BaseObjects,
    Date,
    Eval,
    StringNormalize,
    RegExpCompiler,
    RegExp,
    Json,
    Proxy,
    MapSet,
    TypedArrays,
    Promise,
    BigInt,
    BigFloat,
    BigDecimal,
    Operators,
}

impl Intrinsic {
    pub const ALL: [Intrinsic; 15] = [
        Intrinsic::BaseObjects,
        Intrinsic::Date,
        Intrinsic::Eval,
        Intrinsic::StringNormalize,
        Intrinsic::RegExpCompiler,
        Intrinsic::RegExp,
        Intrinsic::Json,
        Intrinsic::Proxy,
        Intrinsic::MapSet,
        Intrinsic::TypedArrays,
        Intrinsic::Promise,
        Intrinsic::BigInt,
        Intrinsic::BigFloat,
        Intrinsic::BigDecimal,
        Intrinsic::Operators,
    ];

    pub(crate) fn installer(self) -> unsafe extern "C" fn(*mut JSContext) {
        match self {
            Intrinsic::BaseObjects => JS_AddIntrinsicBaseObjects,
            Intrinsic::Date => JS_AddIntrinsicDate,
            Intrinsic::Eval => JS_AddIntrinsicEval,
            Intrinsic::StringNormalize => JS_AddIntrinsicStringNormalize,
            Intrinsic::RegExpCompiler => JS_AddIntrinsicRegExpCompiler,
            Intrinsic::RegExp => JS_AddIntrinsicRegExp,
            Intrinsic::Json => JS_AddIntrinsicJSON,
            Intrinsic::Proxy => JS_AddIntrinsicProxy,
            Intrinsic::MapSet => JS_AddIntrinsicMapSet,
            Intrinsic::TypedArrays => JS_AddIntrinsicTypedArrays,
            Intrinsic::Promise => JS_AddIntrinsicPromise,
            Intrinsic::BigInt => JS_AddIntrinsicBigInt,
            Intrinsic::BigFloat => JS_AddIntrinsicBigFloat,
            Intrinsic::BigDecimal => JS_AddIntrinsicBigDecimal,
            Intrinsic::Operators => JS_AddIntrinsicOperators,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_eval_flags_default_is_global() {
        assert_eq!(EvalFlags::empty().to_native().unwrap(), JS_EVAL_TYPE_GLOBAL);
        assert_eq!(EvalFlags::GLOBAL.to_native().unwrap(), JS_EVAL_TYPE_GLOBAL);
    }

    #[test]
    fn test_eval_flags_module_and_modifiers() {
        let flags = EvalFlags::MODULE | EvalFlags::STRICT;
        assert!(flags.is_module());
        assert_eq!(
            flags.to_native().unwrap(),
            JS_EVAL_TYPE_MODULE | JS_EVAL_FLAG_STRICT
        );
    }

    #[test]
    fn test_eval_flags_both_types_rejected() {
        let err = (EvalFlags::GLOBAL | EvalFlags::MODULE).to_native().unwrap_err();
        assert!(matches!(err, QjsError::OutOfRange { what: "eval flags", .. }));
    }

    #[test]
    fn test_eval_flags_unknown_bits_rejected() {
        assert!(EvalFlags::from_bits(1 << 2).to_native().is_err());
        assert!(EvalFlags::from_bits(1 << 12).to_native().is_err());
    }

    #[test]
    fn test_property_flags() {
        let flags = PropertyFlags::CONFIGURABLE | PropertyFlags::WRITABLE;
        assert!(flags.contains(PropertyFlags::WRITABLE));
        assert!(!flags.contains(PropertyFlags::ENUMERABLE));
        assert_eq!(PropertyFlags::C_W_E.bits(), 7);
        assert_eq!(PropertyNameFlags::default().bits(), JS_GPN_STRING_MASK | JS_GPN_ENUM_ONLY);
    }
}
