// Rust renditions of the `static inline` helpers in quickjs.h.
// They are not exported by the C library, so they must match its layout exactly.

use std::ffi::c_void;

use crate::*;

#[cfg(target_pointer_width = "64")]
mod layout {
    use super::*;

    #[inline]
    pub const fn JS_MKVAL(tag: i32, val: i32) -> JSValue {
        JSValue {
            u: JSValueUnion { int32: val },
            tag: tag as i64,
        }
    }

    #[inline]
    pub const fn JS_MKPTR(tag: i32, ptr: *mut c_void) -> JSValue {
        JSValue {
            u: JSValueUnion { ptr },
            tag: tag as i64,
        }
    }

    #[inline]
    pub const fn JS_VALUE_GET_TAG(v: JSValue) -> i32 {
        v.tag as i32
    }

    #[inline]
    pub const fn JS_VALUE_GET_NORM_TAG(v: JSValue) -> i32 {
        v.tag as i32
    }

    #[inline]
    pub fn JS_VALUE_GET_INT(v: JSValue) -> i32 {
        // SAFETY: every variant of the union is plain data
        unsafe { v.u.int32 }
    }

    #[inline]
    pub fn JS_VALUE_GET_FLOAT64(v: JSValue) -> f64 {
        // SAFETY: every variant of the union is plain data
        unsafe { v.u.float64 }
    }

    #[inline]
    pub fn JS_VALUE_GET_PTR(v: JSValue) -> *mut c_void {
        // SAFETY: every variant of the union is plain data
        unsafe { v.u.ptr }
    }

    /// Raw payload bits, used for identity comparisons
    #[inline]
    pub fn JS_VALUE_GET_BITS(v: JSValue) -> u64 {
        // SAFETY: the union is 8 bytes wide on this layout
        unsafe { v.u.float64.to_bits() }
    }

    #[inline]
    pub fn __JS_NewFloat64(d: f64) -> JSValue {
        JSValue {
            u: JSValueUnion { float64: d },
            tag: JS_TAG_FLOAT64 as i64,
        }
    }

    #[inline]
    pub fn JS_VALUE_IS_NAN(v: JSValue) -> bool {
        nanbox::unboxed_is_nan(v.tag, JS_VALUE_GET_BITS(v))
    }

    pub const JS_NAN: JSValue = JSValue {
        u: JSValueUnion {
            float64: f64::from_bits(nanbox::CANONICAL_NAN_BITS),
        },
        tag: JS_TAG_FLOAT64 as i64,
    };
}

#[cfg(not(target_pointer_width = "64"))]
mod layout {
    use super::*;

    #[inline]
    pub const fn JS_MKVAL(tag: i32, val: i32) -> JSValue {
        JSValue(nanbox::mkval(tag, val))
    }

    #[inline]
    pub fn JS_MKPTR(tag: i32, ptr: *mut c_void) -> JSValue {
        JSValue(((tag as u32 as u64) << 32) | (ptr as usize as u64))
    }

    #[inline]
    pub const fn JS_VALUE_GET_TAG(v: JSValue) -> i32 {
        nanbox::raw_tag(v.0)
    }

    #[inline]
    pub const fn JS_VALUE_GET_NORM_TAG(v: JSValue) -> i32 {
        nanbox::norm_tag(v.0)
    }

    #[inline]
    pub fn JS_VALUE_GET_INT(v: JSValue) -> i32 {
        nanbox::payload(v.0) as i32
    }

    #[inline]
    pub fn JS_VALUE_GET_FLOAT64(v: JSValue) -> f64 {
        f64::from_bits(nanbox::unbox_f64(v.0))
    }

    #[inline]
    pub fn JS_VALUE_GET_PTR(v: JSValue) -> *mut c_void {
        nanbox::payload(v.0) as usize as *mut c_void
    }

    /// Raw payload bits, used for identity comparisons
    #[inline]
    pub fn JS_VALUE_GET_BITS(v: JSValue) -> u64 {
        v.0
    }

    #[inline]
    pub fn __JS_NewFloat64(d: f64) -> JSValue {
        JSValue(nanbox::box_f64(d.to_bits()))
    }

    #[inline]
    pub fn JS_VALUE_IS_NAN(v: JSValue) -> bool {
        nanbox::is_nan(v.0)
    }

    pub const JS_NAN: JSValue = JSValue(nanbox::NAN_BOXED);
}

pub use layout::*;

pub const JS_NULL: JSValue = JS_MKVAL(JS_TAG_NULL, 0);
pub const JS_UNDEFINED: JSValue = JS_MKVAL(JS_TAG_UNDEFINED, 0);
pub const JS_FALSE: JSValue = JS_MKVAL(JS_TAG_BOOL, 0);
pub const JS_TRUE: JSValue = JS_MKVAL(JS_TAG_BOOL, 1);
pub const JS_EXCEPTION: JSValue = JS_MKVAL(JS_TAG_EXCEPTION, 0);
pub const JS_UNINITIALIZED: JSValue = JS_MKVAL(JS_TAG_UNINITIALIZED, 0);

#[inline]
pub fn JS_VALUE_HAS_REF_COUNT(v: JSValue) -> bool {
    nanbox::has_ref_count(JS_VALUE_GET_TAG(v))
}

#[inline]
pub fn JS_IsException(v: JSValue) -> bool {
    JS_VALUE_GET_TAG(v) == JS_TAG_EXCEPTION
}

#[inline]
pub fn JS_NewBool(val: bool) -> JSValue {
    JS_MKVAL(JS_TAG_BOOL, val as i32)
}

#[inline]
pub fn JS_NewInt32(val: i32) -> JSValue {
    JS_MKVAL(JS_TAG_INT, val)
}

#[inline]
pub fn JS_NewInt64(val: i64) -> JSValue {
    if val == val as i32 as i64 {
        JS_NewInt32(val as i32)
    } else {
        __JS_NewFloat64(val as f64)
    }
}

/// Integral doubles are stored as `JS_TAG_INT`, except `-0.0`
#[inline]
pub fn JS_NewFloat64(d: f64) -> JSValue {
    if d >= i32::MIN as f64 && d <= i32::MAX as f64 {
        let val = d as i32;
        if (val as f64).to_bits() == d.to_bits() {
            return JS_NewInt32(val);
        }
    }
    __JS_NewFloat64(d)
}

/// Decrement the reference count, freeing the cell when it reaches zero
///
/// # Safety
/// `ctx` must be live and `v` must own one reference.
#[inline]
pub unsafe fn JS_FreeValue(ctx: *mut JSContext, v: JSValue) {
    if JS_VALUE_HAS_REF_COUNT(v) {
        let p = JS_VALUE_GET_PTR(v) as *mut JSRefCountHeader;
        // SAFETY: ref-counted values point at a JSRefCountHeader
        unsafe {
            (*p).ref_count -= 1;
            if (*p).ref_count <= 0 {
                __JS_FreeValue(ctx, v);
            }
        }
    }
}

/// # Safety
/// `rt` must be live and `v` must own one reference.
#[inline]
pub unsafe fn JS_FreeValueRT(rt: *mut JSRuntime, v: JSValue) {
    if JS_VALUE_HAS_REF_COUNT(v) {
        let p = JS_VALUE_GET_PTR(v) as *mut JSRefCountHeader;
        // SAFETY: ref-counted values point at a JSRefCountHeader
        unsafe {
            (*p).ref_count -= 1;
            if (*p).ref_count <= 0 {
                __JS_FreeValueRT(rt, v);
            }
        }
    }
}

/// Increment the reference count and return the same value
///
/// # Safety
/// `v` must be a live value.
#[inline]
pub unsafe fn JS_DupValue(v: JSValue) -> JSValue {
    if JS_VALUE_HAS_REF_COUNT(v) {
        let p = JS_VALUE_GET_PTR(v) as *mut JSRefCountHeader;
        // SAFETY: ref-counted values point at a JSRefCountHeader
        unsafe {
            (*p).ref_count += 1;
        }
    }
    v
}

/// # Safety
/// `ctx` must be live; the returned C string must be released with `JS_FreeCString`.
#[inline]
pub unsafe fn JS_ToCStringLen(
    ctx: *mut JSContext,
    plen: *mut usize,
    val: JSValue,
) -> *const std::os::raw::c_char {
    // SAFETY: forwarded caller contract
    unsafe { JS_ToCStringLen2(ctx, plen, val, 0) }
}
