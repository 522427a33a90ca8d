//! RAII wrappers for engine atoms and C strings

use std::ffi::{CStr, CString};
use std::os::raw::c_char;

use qjs_sys::*;

use crate::error::{QjsError, QjsResult};

/// Convert a Rust string into a C string, rejecting interior NUL bytes
pub(crate) fn c_string(s: &str) -> QjsResult<CString> {
    CString::new(s).map_err(|_| QjsError::InvalidArgument(format!("{:?} contains a NUL byte", s)))
}

/// An interned property key; freed on drop
pub(crate) struct OwnedAtom {
    ctx: *mut JSContext,
    atom: JSAtom,
}

impl OwnedAtom {
    /// Intern `name`
    ///
    /// # Safety
    /// `ctx` must be a live context that outlives the atom.
    pub(crate) unsafe fn new(ctx: *mut JSContext, name: &str) -> QjsResult<Self> {
        // SAFETY: ctx is live per caller contract; the pointer/length pair describes `name`
        let atom = unsafe { JS_NewAtomLen(ctx, name.as_ptr() as *const c_char, name.len()) };
        if atom == JS_ATOM_NULL {
            return Err(QjsError::OutOfMemory);
        }
        Ok(Self { ctx, atom })
    }

    pub(crate) fn raw(&self) -> JSAtom {
        self.atom
    }
}

impl Drop for OwnedAtom {
    fn drop(&mut self) {
        // SAFETY: the atom was created by JS_NewAtomLen in this context
        unsafe { JS_FreeAtom(self.ctx, self.atom) };
    }
}

/// Engine-allocated C string; freed on drop
pub(crate) struct EngineCString {
    ctx: *mut JSContext,
    ptr: *const c_char,
    len: Option<usize>,
}

impl EngineCString {
    /// Convert any value with `ToString` semantics; `None` if an exception was raised
    ///
    /// # Safety
    /// `ctx` must be live and `value` must be a live value of that runtime.
    pub(crate) unsafe fn from_value(ctx: *mut JSContext, value: JSValue) -> Option<Self> {
        let mut len = 0usize;
        // SAFETY: forwarded caller contract
        let ptr = unsafe { JS_ToCStringLen(ctx, &mut len, value) };
        (!ptr.is_null()).then_some(Self {
            ctx,
            ptr,
            len: Some(len),
        })
    }

    /// Name of an atom; `None` if an exception was raised
    ///
    /// # Safety
    /// `ctx` must be live and `atom` must be a live atom.
    pub(crate) unsafe fn from_atom(ctx: *mut JSContext, atom: JSAtom) -> Option<Self> {
        // SAFETY: forwarded caller contract
        let ptr = unsafe { JS_AtomToCString(ctx, atom) };
        (!ptr.is_null()).then_some(Self {
            ctx,
            ptr,
            len: None,
        })
    }

    /// Lossy UTF-8 decode; lone surrogates become U+FFFD
    pub(crate) fn to_string_lossy(&self) -> String {
        let bytes = match self.len {
            // SAFETY: the engine reported `len` bytes at `ptr`
            Some(len) => unsafe { std::slice::from_raw_parts(self.ptr as *const u8, len) },
            // SAFETY: the engine returns a NUL-terminated string
            None => unsafe { CStr::from_ptr(self.ptr) }.to_bytes(),
        };
        String::from_utf8_lossy(bytes).into_owned()
    }
}

impl Drop for EngineCString {
    fn drop(&mut self) {
        // SAFETY: ptr was returned by the engine for this context
        unsafe { JS_FreeCString(self.ctx, self.ptr) };
    }
}

/// Escape `%` for messages handed to the engine's printf-style throwers
pub(crate) fn format_escaped(message: &str) -> CString {
    let escaped = message.replace('%', "%%").replace('\0', "\\0");
    CString::new(escaped).unwrap_or_default()
}
