//! NaN-boxing arithmetic for the 32-bit value layout.
//!
//! On 32-bit targets a `JSValue` is a single `u64`: the high word holds the
//! tag, the low word holds an `int32` or a pointer. Doubles are stored with
//! [`FLOAT64_TAG_ADDEND`] subtracted from their high word, which moves every
//! finite and infinite double out of the tag range and leaves exactly one
//! encoding for NaN.
//!
//! These functions operate on raw bits and are compiled on every target so
//! that both the boxed and unboxed paths can be tested from any host.

use crate::{JS_TAG_FIRST, JS_TAG_FLOAT64};

/// High-word offset applied to doubles (quiet NaN encoding)
pub const FLOAT64_TAG_ADDEND: u32 = (0x7ff8_0000_i64 - JS_TAG_FIRST as i64 + 1) as u32;

/// Bits of the single boxed NaN encoding
pub const NAN_BOXED: u64 = 0x7ff8_0000_0000_0000_u64.wrapping_sub((FLOAT64_TAG_ADDEND as u64) << 32);

/// Canonical quiet NaN as an IEEE-754 bit pattern
pub const CANONICAL_NAN_BITS: u64 = 0x7ff8_0000_0000_0000;

const ABS_MASK: u64 = 0x7fff_ffff_ffff_ffff;
const INFINITY_BITS: u64 = 0x7ff0_0000_0000_0000;

/// True for any IEEE-754 NaN bit pattern
#[inline]
pub const fn f64_bits_is_nan(bits: u64) -> bool {
    (bits & ABS_MASK) > INFINITY_BITS
}

/// Collapse every NaN payload to [`CANONICAL_NAN_BITS`]
#[inline]
pub const fn canonicalize_f64_bits(bits: u64) -> u64 {
    if f64_bits_is_nan(bits) {
        CANONICAL_NAN_BITS
    } else {
        bits
    }
}

/// Box a double; every NaN maps to [`NAN_BOXED`]
#[inline]
pub const fn box_f64(bits: u64) -> u64 {
    if f64_bits_is_nan(bits) {
        NAN_BOXED
    } else {
        bits.wrapping_sub((FLOAT64_TAG_ADDEND as u64) << 32)
    }
}

/// Recover the IEEE-754 bits of a boxed double
#[inline]
pub const fn unbox_f64(v: u64) -> u64 {
    v.wrapping_add((FLOAT64_TAG_ADDEND as u64) << 32)
}

#[inline]
pub const fn mkval(tag: i32, val: i32) -> u64 {
    ((tag as u32 as u64) << 32) | (val as u32 as u64)
}

#[inline]
pub const fn raw_tag(v: u64) -> i32 {
    (v >> 32) as i32
}

#[inline]
pub const fn payload(v: u64) -> u32 {
    v as u32
}

/// Any tag outside the `[FIRST, FLOAT64)` window is a boxed double
#[inline]
pub const fn is_float64_tag(tag: i32) -> bool {
    (tag.wrapping_sub(JS_TAG_FIRST) as u32) >= (JS_TAG_FLOAT64 - JS_TAG_FIRST) as u32
}

/// Tag with every float encoding collapsed to `JS_TAG_FLOAT64`
#[inline]
pub const fn norm_tag(v: u64) -> i32 {
    let tag = raw_tag(v);
    if is_float64_tag(tag) { JS_TAG_FLOAT64 } else { tag }
}

#[inline]
pub const fn is_nan(v: u64) -> bool {
    raw_tag(v) == raw_tag(NAN_BOXED)
}

/// Unboxed (64-bit) layout: NaN check over `(tag, payload bits)`
#[inline]
pub const fn unboxed_is_nan(tag: i64, bits: u64) -> bool {
    tag == JS_TAG_FLOAT64 as i64 && f64_bits_is_nan(bits)
}

/// Reference-counted tags compare at or above `JS_TAG_FIRST` when unsigned
#[inline]
pub const fn has_ref_count(tag: i32) -> bool {
    (tag as u32) >= (JS_TAG_FIRST as u32)
}
