//! Raw FFI bindings to the QuickJS C API
//!
//! This crate provides low-level unsafe bindings to QuickJS, plus Rust
//! renditions of the `static inline` helpers from `quickjs.h` (value
//! construction, tag inspection, reference counting).
//! Use the safe wrappers in `qjs-core` for higher-level access.
//!
//! # Value layout
//!
//! `JSValue` has two physical layouts, selected when this crate is compiled:
//!
//! - 64-bit targets: a 16-byte `{ union, tag }` struct passed by value.
//! - 32-bit targets: a NaN-boxed `u64`, where doubles are stored with a tag
//!   addend so that every non-float tag lands in the quiet-NaN space.
//!
//! Every callback signature below uses the same `JSValue` type, so the
//! calling convention is fixed at build time and never inspected per call.
//! The NaN-boxing arithmetic itself lives in [`nanbox`] as pure functions
//! that are compiled on every target.

#![allow(non_camel_case_types)]
#![allow(non_upper_case_globals)]
#![allow(non_snake_case)]

use std::ffi::c_void;
use std::os::raw::{c_char, c_int};

mod inline;
pub mod nanbox;

pub use inline::*;

// Opaque engine types
#[repr(C)]
pub struct JSRuntime {
    _private: [u8; 0],
}

#[repr(C)]
pub struct JSContext {
    _private: [u8; 0],
}

#[repr(C)]
pub struct JSGCObjectHeader {
    _private: [u8; 0],
}

pub type JSClassID = u32;
pub type JSAtom = u32;
pub type JS_BOOL = c_int;

pub const JS_ATOM_NULL: JSAtom = 0;
pub const JS_INVALID_CLASS_ID: JSClassID = 0;

// Value tags (CONFIG_BIGNUM layout)
pub const JS_TAG_FIRST: i32 = -11;
pub const JS_TAG_BIG_DECIMAL: i32 = -11;
pub const JS_TAG_BIG_INT: i32 = -10;
pub const JS_TAG_BIG_FLOAT: i32 = -9;
pub const JS_TAG_SYMBOL: i32 = -8;
pub const JS_TAG_STRING: i32 = -7;
pub const JS_TAG_MODULE: i32 = -3;
pub const JS_TAG_FUNCTION_BYTECODE: i32 = -2;
pub const JS_TAG_OBJECT: i32 = -1;
pub const JS_TAG_INT: i32 = 0;
pub const JS_TAG_BOOL: i32 = 1;
pub const JS_TAG_NULL: i32 = 2;
pub const JS_TAG_UNDEFINED: i32 = 3;
pub const JS_TAG_UNINITIALIZED: i32 = 4;
pub const JS_TAG_CATCH_OFFSET: i32 = 5;
pub const JS_TAG_EXCEPTION: i32 = 6;
pub const JS_TAG_FLOAT64: i32 = 7;

#[cfg(target_pointer_width = "64")]
#[repr(C)]
#[derive(Clone, Copy)]
pub union JSValueUnion {
    pub int32: i32,
    pub float64: f64,
    pub ptr: *mut c_void,
}

/// Engine value, 64-bit layout
#[cfg(target_pointer_width = "64")]
#[repr(C)]
#[derive(Clone, Copy)]
pub struct JSValue {
    pub u: JSValueUnion,
    pub tag: i64,
}

/// Engine value, NaN-boxed 32-bit layout
#[cfg(not(target_pointer_width = "64"))]
#[repr(transparent)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct JSValue(pub u64);

/// Header shared by every reference-counted heap cell
#[repr(C)]
pub struct JSRefCountHeader {
    pub ref_count: c_int,
}

// Eval flags
pub const JS_EVAL_TYPE_GLOBAL: c_int = 0;
pub const JS_EVAL_TYPE_MODULE: c_int = 1;
pub const JS_EVAL_TYPE_DIRECT: c_int = 2;
pub const JS_EVAL_TYPE_INDIRECT: c_int = 3;
pub const JS_EVAL_TYPE_MASK: c_int = 3;
pub const JS_EVAL_FLAG_STRICT: c_int = 1 << 3;
pub const JS_EVAL_FLAG_STRIP: c_int = 1 << 4;
pub const JS_EVAL_FLAG_COMPILE_ONLY: c_int = 1 << 5;
pub const JS_EVAL_FLAG_BACKTRACE_BARRIER: c_int = 1 << 6;

// Property flags
pub const JS_PROP_CONFIGURABLE: c_int = 1 << 0;
pub const JS_PROP_WRITABLE: c_int = 1 << 1;
pub const JS_PROP_ENUMERABLE: c_int = 1 << 2;
pub const JS_PROP_C_W_E: c_int = JS_PROP_CONFIGURABLE | JS_PROP_WRITABLE | JS_PROP_ENUMERABLE;
pub const JS_PROP_HAS_SHIFT: c_int = 8;
pub const JS_PROP_HAS_CONFIGURABLE: c_int = 1 << 8;
pub const JS_PROP_HAS_WRITABLE: c_int = 1 << 9;
pub const JS_PROP_HAS_ENUMERABLE: c_int = 1 << 10;
pub const JS_PROP_HAS_GET: c_int = 1 << 11;
pub const JS_PROP_HAS_SET: c_int = 1 << 12;
pub const JS_PROP_HAS_VALUE: c_int = 1 << 13;
pub const JS_PROP_THROW: c_int = 1 << 14;
pub const JS_PROP_THROW_STRICT: c_int = 1 << 15;

// Flags for JS_GetOwnPropertyNames
pub const JS_GPN_STRING_MASK: c_int = 1 << 0;
pub const JS_GPN_SYMBOL_MASK: c_int = 1 << 1;
pub const JS_GPN_PRIVATE_MASK: c_int = 1 << 2;
pub const JS_GPN_ENUM_ONLY: c_int = 1 << 4;
pub const JS_GPN_SET_ENUM: c_int = 1 << 5;

pub const JS_CALL_FLAG_CONSTRUCTOR: c_int = 1 << 0;

#[repr(C)]
#[derive(Clone, Copy, Debug)]
pub struct JSPropertyEnum {
    pub is_enumerable: JS_BOOL,
    pub atom: JSAtom,
}

#[repr(C)]
#[derive(Clone, Copy)]
pub struct JSPropertyDescriptor {
    pub flags: c_int,
    pub value: JSValue,
    pub getter: JSValue,
    pub setter: JSValue,
}

#[repr(C)]
#[derive(Clone, Copy, Debug, Default)]
pub struct JSMemoryUsage {
    pub malloc_size: i64,
    pub malloc_limit: i64,
    pub memory_used_size: i64,
    pub malloc_count: i64,
    pub memory_used_count: i64,
    pub atom_count: i64,
    pub atom_size: i64,
    pub str_count: i64,
    pub str_size: i64,
    pub obj_count: i64,
    pub obj_size: i64,
    pub prop_count: i64,
    pub prop_size: i64,
    pub shape_count: i64,
    pub shape_size: i64,
    pub js_func_count: i64,
    pub js_func_size: i64,
    pub js_func_code_size: i64,
    pub js_func_pc2line_count: i64,
    pub js_func_pc2line_size: i64,
    pub c_func_count: i64,
    pub array_count: i64,
    pub fast_array_count: i64,
    pub fast_array_elements: i64,
    pub binary_object_count: i64,
    pub binary_object_size: i64,
}

// Callback types
pub type JS_MarkFunc = Option<unsafe extern "C" fn(rt: *mut JSRuntime, gp: *mut JSGCObjectHeader)>;

pub type JSClassFinalizer = Option<unsafe extern "C" fn(rt: *mut JSRuntime, val: JSValue)>;

pub type JSClassGCMark =
    Option<unsafe extern "C" fn(rt: *mut JSRuntime, val: JSValue, mark_func: JS_MarkFunc)>;

pub type JSClassCall = Option<
    unsafe extern "C" fn(
        ctx: *mut JSContext,
        func_obj: JSValue,
        this_val: JSValue,
        argc: c_int,
        argv: *mut JSValue,
        flags: c_int,
    ) -> JSValue,
>;

pub type JSCFunctionData = Option<
    unsafe extern "C" fn(
        ctx: *mut JSContext,
        this_val: JSValue,
        argc: c_int,
        argv: *mut JSValue,
        magic: c_int,
        func_data: *mut JSValue,
    ) -> JSValue,
>;

pub type JSInterruptHandler =
    Option<unsafe extern "C" fn(rt: *mut JSRuntime, opaque: *mut c_void) -> c_int>;

#[repr(C)]
#[derive(Clone, Copy, Default)]
pub struct JSClassExoticMethods {
    pub get_own_property: Option<
        unsafe extern "C" fn(
            ctx: *mut JSContext,
            desc: *mut JSPropertyDescriptor,
            obj: JSValue,
            prop: JSAtom,
        ) -> c_int,
    >,
    pub get_own_property_names: Option<
        unsafe extern "C" fn(
            ctx: *mut JSContext,
            ptab: *mut *mut JSPropertyEnum,
            plen: *mut u32,
            obj: JSValue,
        ) -> c_int,
    >,
    pub delete_property:
        Option<unsafe extern "C" fn(ctx: *mut JSContext, obj: JSValue, prop: JSAtom) -> c_int>,
    pub define_own_property: Option<
        unsafe extern "C" fn(
            ctx: *mut JSContext,
            this_obj: JSValue,
            prop: JSAtom,
            val: JSValue,
            getter: JSValue,
            setter: JSValue,
            flags: c_int,
        ) -> c_int,
    >,
    pub has_property:
        Option<unsafe extern "C" fn(ctx: *mut JSContext, obj: JSValue, atom: JSAtom) -> c_int>,
    pub get_property: Option<
        unsafe extern "C" fn(
            ctx: *mut JSContext,
            obj: JSValue,
            atom: JSAtom,
            receiver: JSValue,
        ) -> JSValue,
    >,
    pub set_property: Option<
        unsafe extern "C" fn(
            ctx: *mut JSContext,
            obj: JSValue,
            atom: JSAtom,
            value: JSValue,
            receiver: JSValue,
            flags: c_int,
        ) -> c_int,
    >,
}

#[repr(C)]
pub struct JSClassDef {
    pub class_name: *const c_char,
    pub finalizer: JSClassFinalizer,
    pub gc_mark: JSClassGCMark,
    pub call: JSClassCall,
    pub exotic: *mut JSClassExoticMethods,
}

// Statically linked libquickjs built by build.rs
unsafe extern "C" {
    // Runtime functions
    pub fn JS_NewRuntime() -> *mut JSRuntime;
    pub fn JS_FreeRuntime(rt: *mut JSRuntime);
    pub fn JS_SetRuntimeInfo(rt: *mut JSRuntime, info: *const c_char);
    pub fn JS_SetMemoryLimit(rt: *mut JSRuntime, limit: usize);
    pub fn JS_SetGCThreshold(rt: *mut JSRuntime, gc_threshold: usize);
    pub fn JS_SetMaxStackSize(rt: *mut JSRuntime, stack_size: usize);
    pub fn JS_UpdateStackTop(rt: *mut JSRuntime);
    pub fn JS_GetRuntimeOpaque(rt: *mut JSRuntime) -> *mut c_void;
    pub fn JS_SetRuntimeOpaque(rt: *mut JSRuntime, opaque: *mut c_void);
    pub fn JS_SetInterruptHandler(rt: *mut JSRuntime, cb: JSInterruptHandler, opaque: *mut c_void);
    pub fn JS_RunGC(rt: *mut JSRuntime);
    pub fn JS_MarkValue(rt: *mut JSRuntime, val: JSValue, mark_func: JS_MarkFunc);
    pub fn JS_IsLiveObject(rt: *mut JSRuntime, obj: JSValue) -> JS_BOOL;
    pub fn JS_ComputeMemoryUsage(rt: *mut JSRuntime, s: *mut JSMemoryUsage);

    // Job queue
    pub fn JS_IsJobPending(rt: *mut JSRuntime) -> JS_BOOL;
    pub fn JS_ExecutePendingJob(rt: *mut JSRuntime, pctx: *mut *mut JSContext) -> c_int;

    // Context functions
    pub fn JS_NewContext(rt: *mut JSRuntime) -> *mut JSContext;
    pub fn JS_NewContextRaw(rt: *mut JSRuntime) -> *mut JSContext;
    pub fn JS_FreeContext(ctx: *mut JSContext);
    pub fn JS_GetRuntime(ctx: *mut JSContext) -> *mut JSRuntime;
    pub fn JS_GetContextOpaque(ctx: *mut JSContext) -> *mut c_void;
    pub fn JS_SetContextOpaque(ctx: *mut JSContext, opaque: *mut c_void);
    pub fn JS_SetClassProto(ctx: *mut JSContext, class_id: JSClassID, obj: JSValue);
    pub fn JS_GetClassProto(ctx: *mut JSContext, class_id: JSClassID) -> JSValue;

    // Intrinsics
    pub fn JS_AddIntrinsicBaseObjects(ctx: *mut JSContext);
    pub fn JS_AddIntrinsicDate(ctx: *mut JSContext);
    pub fn JS_AddIntrinsicEval(ctx: *mut JSContext);
    pub fn JS_AddIntrinsicStringNormalize(ctx: *mut JSContext);
    pub fn JS_AddIntrinsicRegExpCompiler(ctx: *mut JSContext);
    pub fn JS_AddIntrinsicRegExp(ctx: *mut JSContext);
    pub fn JS_AddIntrinsicJSON(ctx: *mut JSContext);
    pub fn JS_AddIntrinsicProxy(ctx: *mut JSContext);
    pub fn JS_AddIntrinsicMapSet(ctx: *mut JSContext);
    pub fn JS_AddIntrinsicTypedArrays(ctx: *mut JSContext);
    pub fn JS_AddIntrinsicPromise(ctx: *mut JSContext);
    pub fn JS_AddIntrinsicBigInt(ctx: *mut JSContext);
    pub fn JS_AddIntrinsicBigFloat(ctx: *mut JSContext);
    pub fn JS_AddIntrinsicBigDecimal(ctx: *mut JSContext);
    pub fn JS_AddIntrinsicOperators(ctx: *mut JSContext);
    pub fn JS_EnableBignumExt(ctx: *mut JSContext, enable: JS_BOOL);

    // Script evaluation
    pub fn JS_Eval(
        ctx: *mut JSContext,
        input: *const c_char,
        input_len: usize,
        filename: *const c_char,
        eval_flags: c_int,
    ) -> JSValue;
    pub fn JS_EvalThis(
        ctx: *mut JSContext,
        this_obj: JSValue,
        input: *const c_char,
        input_len: usize,
        filename: *const c_char,
        eval_flags: c_int,
    ) -> JSValue;
    pub fn JS_GetGlobalObject(ctx: *mut JSContext) -> JSValue;

    // Exceptions
    pub fn JS_Throw(ctx: *mut JSContext, obj: JSValue) -> JSValue;
    pub fn JS_GetException(ctx: *mut JSContext) -> JSValue;
    pub fn JS_IsError(ctx: *mut JSContext, val: JSValue) -> JS_BOOL;
    pub fn JS_ResetUncatchableError(ctx: *mut JSContext);
    pub fn JS_SetUncatchableError(ctx: *mut JSContext, val: JSValue, flag: JS_BOOL);
    pub fn JS_NewError(ctx: *mut JSContext) -> JSValue;
    pub fn JS_ThrowSyntaxError(ctx: *mut JSContext, fmt: *const c_char, ...) -> JSValue;
    pub fn JS_ThrowTypeError(ctx: *mut JSContext, fmt: *const c_char, ...) -> JSValue;
    pub fn JS_ThrowReferenceError(ctx: *mut JSContext, fmt: *const c_char, ...) -> JSValue;
    pub fn JS_ThrowRangeError(ctx: *mut JSContext, fmt: *const c_char, ...) -> JSValue;
    pub fn JS_ThrowInternalError(ctx: *mut JSContext, fmt: *const c_char, ...) -> JSValue;
    pub fn JS_ThrowOutOfMemory(ctx: *mut JSContext) -> JSValue;

    // Value memory management (slow paths of the inline helpers)
    pub fn __JS_FreeValue(ctx: *mut JSContext, v: JSValue);
    pub fn __JS_FreeValueRT(rt: *mut JSRuntime, v: JSValue);

    // Conversion
    pub fn JS_ToBool(ctx: *mut JSContext, val: JSValue) -> c_int;
    pub fn JS_ToInt32(ctx: *mut JSContext, pres: *mut i32, val: JSValue) -> c_int;
    pub fn JS_ToInt64(ctx: *mut JSContext, pres: *mut i64, val: JSValue) -> c_int;
    pub fn JS_ToFloat64(ctx: *mut JSContext, pres: *mut f64, val: JSValue) -> c_int;

    // Strings
    pub fn JS_NewStringLen(ctx: *mut JSContext, str1: *const c_char, len1: usize) -> JSValue;
    pub fn JS_ToCStringLen2(
        ctx: *mut JSContext,
        plen: *mut usize,
        val1: JSValue,
        cesu8: JS_BOOL,
    ) -> *const c_char;
    pub fn JS_FreeCString(ctx: *mut JSContext, ptr: *const c_char);

    // Atoms
    pub fn JS_NewAtom(ctx: *mut JSContext, str: *const c_char) -> JSAtom;
    pub fn JS_NewAtomLen(ctx: *mut JSContext, str: *const c_char, len: usize) -> JSAtom;
    pub fn JS_FreeAtom(ctx: *mut JSContext, v: JSAtom);
    pub fn JS_AtomToCString(ctx: *mut JSContext, atom: JSAtom) -> *const c_char;

    // Object creation
    pub fn JS_NewObject(ctx: *mut JSContext) -> JSValue;
    pub fn JS_NewObjectClass(ctx: *mut JSContext, class_id: c_int) -> JSValue;
    pub fn JS_NewObjectProtoClass(
        ctx: *mut JSContext,
        proto: JSValue,
        class_id: JSClassID,
    ) -> JSValue;
    pub fn JS_NewArray(ctx: *mut JSContext) -> JSValue;
    pub fn JS_IsArray(ctx: *mut JSContext, val: JSValue) -> c_int;
    pub fn JS_IsFunction(ctx: *mut JSContext, val: JSValue) -> JS_BOOL;
    pub fn JS_IsConstructor(ctx: *mut JSContext, val: JSValue) -> JS_BOOL;
    pub fn JS_SetConstructorBit(ctx: *mut JSContext, func_obj: JSValue, val: JS_BOOL) -> JS_BOOL;

    // Properties
    pub fn JS_GetPropertyStr(ctx: *mut JSContext, this_obj: JSValue, prop: *const c_char)
    -> JSValue;
    pub fn JS_GetPropertyUint32(ctx: *mut JSContext, this_obj: JSValue, idx: u32) -> JSValue;
    pub fn JS_SetPropertyStr(
        ctx: *mut JSContext,
        this_obj: JSValue,
        prop: *const c_char,
        val: JSValue,
    ) -> c_int;
    pub fn JS_SetPropertyUint32(
        ctx: *mut JSContext,
        this_obj: JSValue,
        idx: u32,
        val: JSValue,
    ) -> c_int;
    pub fn JS_HasProperty(ctx: *mut JSContext, this_obj: JSValue, prop: JSAtom) -> c_int;
    pub fn JS_DeleteProperty(
        ctx: *mut JSContext,
        obj: JSValue,
        prop: JSAtom,
        flags: c_int,
    ) -> c_int;
    pub fn JS_DefinePropertyValueStr(
        ctx: *mut JSContext,
        this_obj: JSValue,
        prop: *const c_char,
        val: JSValue,
        flags: c_int,
    ) -> c_int;
    pub fn JS_DefinePropertyGetSet(
        ctx: *mut JSContext,
        this_obj: JSValue,
        prop: JSAtom,
        getter: JSValue,
        setter: JSValue,
        flags: c_int,
    ) -> c_int;
    pub fn JS_GetOwnPropertyNames(
        ctx: *mut JSContext,
        ptab: *mut *mut JSPropertyEnum,
        plen: *mut u32,
        obj: JSValue,
        flags: c_int,
    ) -> c_int;

    // Functions
    pub fn JS_Call(
        ctx: *mut JSContext,
        func_obj: JSValue,
        this_obj: JSValue,
        argc: c_int,
        argv: *mut JSValue,
    ) -> JSValue;
    pub fn JS_CallConstructor(
        ctx: *mut JSContext,
        func_obj: JSValue,
        argc: c_int,
        argv: *mut JSValue,
    ) -> JSValue;
    pub fn JS_NewCFunctionData(
        ctx: *mut JSContext,
        func: JSCFunctionData,
        length: c_int,
        magic: c_int,
        data_len: c_int,
        data: *mut JSValue,
    ) -> JSValue;

    // JSON
    pub fn JS_ParseJSON(
        ctx: *mut JSContext,
        buf: *const c_char,
        buf_len: usize,
        filename: *const c_char,
    ) -> JSValue;
    pub fn JS_JSONStringify(
        ctx: *mut JSContext,
        obj: JSValue,
        replacer: JSValue,
        space0: JSValue,
    ) -> JSValue;

    // Classes
    pub fn JS_NewClassID(pclass_id: *mut JSClassID) -> JSClassID;
    pub fn JS_NewClass(rt: *mut JSRuntime, class_id: JSClassID, class_def: *const JSClassDef)
    -> c_int;
    pub fn JS_IsRegisteredClass(rt: *mut JSRuntime, class_id: JSClassID) -> JS_BOOL;
    pub fn JS_SetOpaque(obj: JSValue, opaque: *mut c_void);
    pub fn JS_GetOpaque(obj: JSValue, class_id: JSClassID) -> *mut c_void;

    // Engine allocator (required for tables handed back to the engine)
    pub fn js_malloc(ctx: *mut JSContext, size: usize) -> *mut c_void;
    pub fn js_free(ctx: *mut JSContext, ptr: *mut c_void);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tag_ordering() {
        // Reference-counted tags are the negative ones
        assert!(JS_TAG_OBJECT < JS_TAG_INT);
        assert_eq!(JS_TAG_FIRST, JS_TAG_BIG_DECIMAL);
        assert_eq!(JS_TAG_FLOAT64 - JS_TAG_FIRST, 18);
    }

    #[test]
    fn test_value_size_matches_pointer_width() {
        #[cfg(target_pointer_width = "64")]
        assert_eq!(std::mem::size_of::<JSValue>(), 16);
        #[cfg(not(target_pointer_width = "64"))]
        assert_eq!(std::mem::size_of::<JSValue>(), 8);
    }

    #[test]
    fn test_flag_constants() {
        assert_eq!(JS_PROP_C_W_E, 7);
        assert_eq!(JS_EVAL_TYPE_MASK, 3);
        assert_eq!(std::mem::size_of::<JSMemoryUsage>(), 26 * 8);
    }
}
