//! Engine-callable entry points for host closures
//!
//! Every function pointer handed to the engine lands in one of the
//! `extern "C"` functions in this module (or in `class`/`exotic`). They all
//! run the host closure inside a guard: a returned error or a panic is turned
//! into an engine exception, and nothing unwinds into C.
//!
//! The `JSValue` layout (struct on 64-bit targets, NaN-boxed `u64` on 32-bit)
//! is fixed when `qjs-sys` is compiled, so each trampoline has exactly one
//! signature per target.

use std::any::Any;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};

use qjs_sys::*;
use tracing::{debug, warn};

use crate::atom::format_escaped;
use crate::context::QjsContext;
use crate::convert::HostValue;
use crate::error::{QjsError, QjsResult};
use crate::value::Value;

pub(crate) type HostFunction = dyn Fn(&QjsContext, &Arguments<'_>) -> QjsResult<HostValue>;

/// A host closure retained by its context for the context's whole life
pub(crate) struct FunctionEntry {
    name: String,
    has_data: bool,
    callback: Box<HostFunction>,
}

impl FunctionEntry {
    pub(crate) fn new<F>(name: &str, has_data: bool, callback: F) -> Self
    where
        F: Fn(&QjsContext, &Arguments<'_>) -> QjsResult<HostValue> + 'static,
    {
        Self {
            name: name.to_string(),
            has_data,
            callback: Box::new(callback),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }
}

/// Arguments of a host function call
///
/// Values are borrowed from the engine for the duration of the call;
/// [`Arguments::get`] copies primitives out and wraps heap values in new
/// tracked handles.
pub struct Arguments<'a> {
    context: &'a QjsContext,
    this: Value,
    argv: &'a [Value],
    magic: i32,
    data: Option<Value>,
    function: Option<Value>,
    constructing: bool,
}

impl<'a> Arguments<'a> {
    pub(crate) fn new(context: &'a QjsContext, this: Value, argv: &'a [Value]) -> Self {
        Self {
            context,
            this,
            argv,
            magic: 0,
            data: None,
            function: None,
            constructing: false,
        }
    }

    pub(crate) fn with_magic(mut self, magic: i32, data: Option<Value>) -> Self {
        self.magic = magic;
        self.data = data;
        self
    }

    pub(crate) fn with_function(mut self, function: Value, constructing: bool) -> Self {
        self.function = Some(function);
        self.constructing = constructing;
        self
    }

    pub fn len(&self) -> usize {
        self.argv.len()
    }

    pub fn is_empty(&self) -> bool {
        self.argv.is_empty()
    }

    /// Argument `index`, or `undefined` past the end
    pub fn get(&self, index: usize) -> QjsResult<HostValue> {
        match self.argv.get(index) {
            Some(value) => self.context.convert_to_host(*value, false),
            None => Ok(HostValue::Undefined),
        }
    }

    /// Borrowed raw argument; valid only during the call
    pub fn raw(&self, index: usize) -> Option<Value> {
        self.argv.get(index).copied()
    }

    pub fn to_vec(&self) -> QjsResult<Vec<HostValue>> {
        (0..self.argv.len()).map(|i| self.get(i)).collect()
    }

    /// The receiver; `new.target` when a constructor function is invoked with `new`
    pub fn this(&self) -> QjsResult<HostValue> {
        self.context.convert_to_host(self.this, false)
    }

    pub fn this_raw(&self) -> Value {
        self.this
    }

    pub fn magic(&self) -> i32 {
        self.magic
    }

    /// Data bound at creation, `undefined` if none was given
    pub fn data(&self) -> QjsResult<HostValue> {
        match self.data {
            Some(value) => self.context.convert_to_host(value, false),
            None => Ok(HostValue::Undefined),
        }
    }

    /// The callee, for class call hooks
    pub fn function_raw(&self) -> Option<Value> {
        self.function
    }

    /// Set when a class call hook runs for `new`
    pub fn is_constructing(&self) -> bool {
        self.constructing
    }

    pub fn context(&self) -> &QjsContext {
        self.context
    }
}

pub(crate) fn panic_message(payload: Box<dyn Any + Send>) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Raise `err` inside the engine and return the exception sentinel
pub(crate) fn report_error(ctx: *mut JSContext, err: QjsError) -> JSValue {
    // SAFETY: ctx is the live context the engine called us with
    let context = unsafe { QjsContext::from_raw(ctx) };
    if let Some(context) = context {
        if let Ok(inner) = context.enter() {
            return inner.raise_host_error(err);
        }
    }
    let format = format_escaped(&err.message());
    // SAFETY: ctx is live; `%` is escaped
    unsafe { JS_ThrowInternalError(ctx, format.as_ptr()) }
}

/// Run a value-producing callback; errors and panics become engine exceptions
pub(crate) fn guard_value<F>(ctx: *mut JSContext, f: F) -> JSValue
where
    F: FnOnce() -> QjsResult<Value>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(value)) => value.0,
        Ok(Err(err)) => report_error(ctx, err),
        Err(payload) => report_error(ctx, QjsError::Panic(panic_message(payload))),
    }
}

/// Like [`guard_value`] for hooks that return a status code; failure is `-1`
pub(crate) fn guard_int<F>(ctx: *mut JSContext, f: F) -> c_int
where
    F: FnOnce() -> QjsResult<c_int>,
{
    let err = match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(rc)) => return rc,
        Ok(Err(err)) => err,
        Err(payload) => QjsError::Panic(panic_message(payload)),
    };
    report_error(ctx, err);
    -1
}

/// For GC mark and finalizer hooks, which have no way to report failure
pub(crate) fn guard_silent<F>(hook: &'static str, class: &str, f: F)
where
    F: FnOnce() -> QjsResult<()>,
{
    match panic::catch_unwind(AssertUnwindSafe(f)) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => warn!(error = %err, hook, class, "class hook failed; error discarded"),
        Err(payload) => warn!(
            panic = %panic_message(payload),
            hook,
            class,
            "class hook panicked; error discarded"
        ),
    }
}

/// Engine entry point for functions made by `QjsContext::create_function`
///
/// `func_data[0]` is the slot in the owning context's function table,
/// `func_data[1]` the owning context's serial, and `func_data[2]` the
/// optional bound data.
pub(crate) unsafe extern "C" fn function_trampoline(
    ctx: *mut JSContext,
    this_val: JSValue,
    argc: c_int,
    argv: *mut JSValue,
    magic: c_int,
    func_data: *mut JSValue,
) -> JSValue {
    guard_value(ctx, || {
        // SAFETY: the engine passes back the data array given at creation (at least two ints)
        let (index, serial) = unsafe {
            (
                Value(*func_data).to_i32()? as usize,
                Value(*func_data.add(1)).to_i32()? as u32,
            )
        };

        // SAFETY: ctx is live for the duration of the call
        let caller = unsafe { QjsContext::from_raw(ctx) }
            .ok_or_else(|| QjsError::internal("function called in an unmanaged context"))?;
        let owner_shared = caller
            .enter()?
            .runtime
            .context(serial)
            .ok_or(QjsError::Disposed)?;
        let owner = QjsContext::from_shared(owner_shared);
        let entry = owner.enter()?.function(index)?;

        let data = if entry.has_data {
            // SAFETY: functions created with bound data have a third slot
            Some(Value(unsafe { *func_data.add(2) }))
        } else {
            None
        };
        let argv: &[Value] = if argc <= 0 || argv.is_null() {
            &[]
        } else {
            // SAFETY: the engine guarantees argc readable values; Value is repr(transparent)
            unsafe { std::slice::from_raw_parts(argv as *const Value, argc as usize) }
        };

        let args = Arguments::new(&owner, Value(this_val), argv).with_magic(magic, data);
        let result = (entry.callback)(&owner, &args).inspect_err(|err| {
            if !matches!(err, QjsError::Thrown) {
                debug!(function = entry.name(), error = %err, "host function failed");
            }
        })?;
        caller.convert_from_host(&result)
    })
}
