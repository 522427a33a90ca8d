//! Context: one evaluation environment inside a runtime
//!
//! A context tracks every heap value it has handed to host code (the live
//! set), the host functions the engine may call back into, a queue of
//! releases requested from other threads, and the last host error raised
//! inside a callback. Native calls that return the exception sentinel go
//! through [`ContextInner::take_exception`], which reports exactly one error.

use std::cell::{Cell, Ref, RefCell};
use std::collections::HashMap;
use std::ffi::c_void;
use std::marker::PhantomData;
use std::os::raw::{c_char, c_int};
use std::path::Path;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use parking_lot::Mutex;
use qjs_sys::*;
use tracing::{debug, warn};

use crate::affinity::ThreadAffine;
use crate::atom::{EngineCString, OwnedAtom, c_string, format_escaped};
use crate::class::ClassId;
use crate::convert::HostValue;
use crate::error::{QjsError, QjsResult};
use crate::flags::{EvalFlags, Intrinsic, PropertyFlags};
use crate::handle::QjsValue;
use crate::runtime::RuntimeShared;
use crate::trampoline::{Arguments, FunctionEntry, function_trampoline};
use crate::value::{Tag, Value};

const DEFAULT_FILENAME: &str = "<anonymous>";

/// QuickJS truncates formatted messages to this many bytes
const ENGINE_MESSAGE_LIMIT: usize = 255;

/// Cross-thread view of a context
///
/// Value wrappers hold an `Arc` to this so they can be dropped anywhere;
/// only `pending` and `closed` are touched off the owning thread.
pub(crate) struct ContextShared {
    serial: u32,
    inner: ThreadAffine<RefCell<Option<ContextInner>>>,
    pending: Mutex<Vec<u64>>,
    closed: AtomicBool,
}

/// Owning-thread state of a live context
pub(crate) struct ContextInner {
    pub(crate) raw: *mut JSContext,
    pub(crate) runtime: Rc<RuntimeShared>,
    live: RefCell<HashMap<u64, Value>>,
    next_id: Cell<u64>,
    functions: RefCell<Vec<Option<Rc<FunctionEntry>>>>,
    free_slots: RefCell<Vec<usize>>,
    host_error: RefCell<Option<QjsError>>,
}

impl ContextShared {
    pub(crate) fn serial(&self) -> u32 {
        self.serial
    }

    pub(crate) fn check_access(&self) -> bool {
        self.inner.check_access()
    }

    /// Borrow the live state, after the thread and liveness checks
    pub(crate) fn enter(&self) -> QjsResult<Ref<'_, ContextInner>> {
        let cell = self.inner.get()?;
        let slot = cell
            .try_borrow()
            .map_err(|_| QjsError::internal("context is being disposed"))?;
        Ref::filter_map(slot, Option::as_ref).map_err(|_| QjsError::Disposed)
    }

    /// Release one tracked value, deferring when called off-thread
    pub(crate) fn release(&self, id: u64) {
        if self.inner.check_access() {
            if let Ok(inner) = self.enter() {
                inner.free_handle(id);
            }
        } else {
            self.pending.lock().push(id);
        }
    }

    /// True once the native context is gone; readable from any thread
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Free every value queued by other threads; owner thread only
    pub(crate) fn drain_pending(&self) -> usize {
        let Ok(inner) = self.enter() else {
            return 0;
        };
        let ids = std::mem::take(&mut *self.pending.lock());
        let mut freed = 0;
        for id in ids {
            if inner.free_handle(id) {
                freed += 1;
            }
        }
        freed
    }

    /// Free all live values and the native context
    ///
    /// Returns false when the context is still in use further up the stack.
    pub(crate) fn destroy(&self) -> bool {
        let Ok(cell) = self.inner.get() else {
            warn!("context destroyed from a foreign thread; skipping");
            return false;
        };
        let taken = match cell.try_borrow_mut() {
            Ok(mut slot) => slot.take(),
            Err(_) => {
                warn!(serial = self.serial, "context destroyed while in use; skipping");
                return false;
            }
        };
        let Some(inner) = taken else {
            return true;
        };

        self.closed.store(true, Ordering::Release);
        self.pending.lock().clear();
        // SAFETY: raw is live until JS_FreeContext below
        unsafe { JS_SetContextOpaque(inner.raw, std::ptr::null_mut()) };

        let leaked: Vec<Value> = inner.live.borrow_mut().drain().map(|(_, v)| v).collect();
        if !leaked.is_empty() {
            debug!(
                serial = self.serial,
                count = leaked.len(),
                "force-releasing live values"
            );
        }
        for value in leaked {
            inner.free(value);
        }
        inner.host_error.borrow_mut().take();

        // SAFETY: every tracked reference has been released
        unsafe { JS_FreeContext(inner.raw) };
        debug!(serial = self.serial, "QuickJS context destroyed");

        // Host closures (and any wrappers they captured) drop after the native context
        drop(inner);
        true
    }
}

impl ContextInner {
    pub(crate) fn free(&self, value: Value) {
        // SAFETY: raw is live; callers pass values they own
        unsafe { JS_FreeValue(self.raw, value.0) };
    }

    pub(crate) fn dup(&self, value: Value) -> Value {
        // SAFETY: callers pass live values
        Value(unsafe { JS_DupValue(value.0) })
    }

    /// Start tracking an owned value; returns its handle id
    pub(crate) fn track(&self, value: Value) -> u64 {
        let id = self.next_id.get();
        self.next_id.set(id + 1);
        self.live.borrow_mut().insert(id, value);
        id
    }

    pub(crate) fn lookup(&self, id: u64) -> QjsResult<Value> {
        self.live
            .borrow()
            .get(&id)
            .copied()
            .ok_or(QjsError::Disposed)
    }

    pub(crate) fn free_handle(&self, id: u64) -> bool {
        let removed = self.live.borrow_mut().remove(&id);
        match removed {
            Some(value) => {
                self.free(value);
                true
            }
            None => false,
        }
    }

    pub(crate) fn live_count(&self) -> usize {
        self.live.borrow().len()
    }

    /// Wrap an owned heap value
    pub(crate) fn wrap(&self, shared: &Arc<ContextShared>, value: Value) -> QjsValue {
        let id = self.track(value);
        QjsValue::new(Arc::clone(shared), id, value)
    }

    pub(crate) fn wrap_checked(
        &self,
        shared: &Arc<ContextShared>,
        value: Value,
    ) -> QjsResult<QjsValue> {
        let value = self.check(value)?;
        Ok(self.wrap(shared, value))
    }

    /// Turn the exception sentinel into an error
    pub(crate) fn check(&self, value: Value) -> QjsResult<Value> {
        if value.is_exception() {
            Err(self.take_exception())
        } else {
            Ok(value)
        }
    }

    /// Turn a negative status code into an error
    pub(crate) fn check_status(&self, rc: c_int) -> QjsResult<bool> {
        if rc < 0 {
            Err(self.take_exception())
        } else {
            Ok(rc != 0)
        }
    }

    pub(crate) fn new_string(&self, s: &str) -> QjsResult<Value> {
        // SAFETY: the pointer/length pair describes `s`
        let raw = unsafe { JS_NewStringLen(self.raw, s.as_ptr() as *const c_char, s.len()) };
        self.check(Value(raw))
    }

    /// `ToString` of a borrowed value
    pub(crate) fn string_of(&self, value: Value) -> QjsResult<String> {
        // SAFETY: raw is live; value is borrowed from a live owner
        match unsafe { EngineCString::from_value(self.raw, value.0) } {
            Some(s) => Ok(s.to_string_lossy()),
            None => Err(self.take_exception()),
        }
    }

    /// `ToString` that swallows failures; used while describing exceptions
    fn string_of_quiet(&self, value: Value) -> Option<String> {
        // SAFETY: raw is live; value is borrowed from a live owner
        match unsafe { EngineCString::from_value(self.raw, value.0) } {
            Some(s) => Some(s.to_string_lossy()),
            None => {
                self.discard_exception();
                None
            }
        }
    }

    fn discard_exception(&self) {
        // SAFETY: raw is live; the drained exception is owned and freed here
        unsafe {
            let exc = JS_GetException(self.raw);
            JS_FreeValue(self.raw, exc);
        }
    }

    pub(crate) fn atom(&self, name: &str) -> QjsResult<OwnedAtom> {
        // SAFETY: the atom is dropped before this context is freed
        unsafe { OwnedAtom::new(self.raw, name) }
    }

    pub(crate) fn atom_name(&self, atom: JSAtom) -> QjsResult<String> {
        // SAFETY: raw is live and the engine handed us the atom
        match unsafe { EngineCString::from_atom(self.raw, atom) } {
            Some(s) => Ok(s.to_string_lossy()),
            None => Err(self.take_exception()),
        }
    }

    fn string_property_quiet(&self, obj: Value, name: &std::ffi::CStr) -> Option<String> {
        // SAFETY: raw is live; obj is borrowed; the property value is owned and freed here
        let prop = Value(unsafe { JS_GetPropertyStr(self.raw, obj.0, name.as_ptr()) });
        if prop.is_exception() {
            self.discard_exception();
            return None;
        }
        let result = match prop.tag() {
            Tag::Undefined | Tag::Null => None,
            _ => self.string_of_quiet(prop),
        };
        self.free(prop);
        result
    }

    /// Drain the engine's pending exception and merge it with the host error slot
    ///
    /// Always yields exactly one error; the slot is cleared either way.
    pub(crate) fn take_exception(&self) -> QjsError {
        // SAFETY: raw is live; the exception value is owned and freed below
        let exc = Value(unsafe { JS_GetException(self.raw) });
        let host = self.host_error.borrow_mut().take();
        // Set only by the interrupt path; a script can throw the same InternalError itself
        let interrupted = self.runtime.take_interrupted();

        let described = match exc.tag() {
            Tag::Uninitialized => None,
            Tag::Object => {
                let error_type = self
                    .string_property_quiet(exc, c"name")
                    .unwrap_or_else(|| "Error".to_string());
                let message = self
                    .string_property_quiet(exc, c"message")
                    .or_else(|| self.string_of_quiet(exc))
                    .unwrap_or_else(|| "Unknown error".to_string());
                let stack = self
                    .string_property_quiet(exc, c"stack")
                    .filter(|s| !s.is_empty());
                Some((error_type, message, stack))
            }
            _ => {
                let message = self
                    .string_of_quiet(exc)
                    .unwrap_or_else(|| "Unknown error".to_string());
                Some(("Error".to_string(), message, None))
            }
        };
        self.free(exc);

        let Some((error_type, message, stack)) = described else {
            return host.unwrap_or_else(|| QjsError::internal("no pending exception"));
        };

        if let Some(host) = host {
            if error_type == "InternalError" && host_message_matches(&host, &message) {
                return match host {
                    QjsError::HostCallback { .. } | QjsError::Interrupted => host,
                    other => QjsError::HostCallback {
                        message: other.message(),
                        source: Box::new(other),
                    },
                };
            }
            debug!(error = %host, "discarding host error caught by script");
        }

        match (error_type.as_str(), message.as_str()) {
            ("InternalError", "interrupted") if interrupted => QjsError::Interrupted,
            ("InternalError", "out of memory") => QjsError::OutOfMemory,
            ("InternalError", "stack overflow") => QjsError::StackOverflow,
            ("SyntaxError", _) => QjsError::Syntax { message, stack },
            _ => QjsError::Script {
                error_type,
                message,
                stack,
            },
        }
    }

    /// Record a callback failure and raise it inside the engine
    pub(crate) fn raise_host_error(&self, err: QjsError) -> JSValue {
        match err {
            QjsError::Thrown => JS_EXCEPTION,
            QjsError::OutOfMemory => {
                // SAFETY: raw is live
                unsafe { JS_ThrowOutOfMemory(self.raw) }
            }
            QjsError::Interrupted => {
                self.runtime.mark_interrupted();
                // SAFETY: raw is live; the rethrown exception keeps its single reference
                unsafe {
                    JS_ThrowInternalError(self.raw, c"interrupted".as_ptr());
                    let exc = JS_GetException(self.raw);
                    JS_SetUncatchableError(self.raw, exc, 1);
                    JS_Throw(self.raw, exc)
                }
            }
            err => {
                let format = format_escaped(&err.message());
                *self.host_error.borrow_mut() = Some(err);
                // SAFETY: raw is live; `%` has been escaped in the format string
                unsafe { JS_ThrowInternalError(self.raw, format.as_ptr()) }
            }
        }
    }

    pub(crate) fn register_function(&self, entry: FunctionEntry) -> usize {
        let mut functions = self.functions.borrow_mut();
        let entry = Some(Rc::new(entry));
        match self.free_slots.borrow_mut().pop() {
            Some(index) => {
                functions[index] = entry;
                index
            }
            None => {
                functions.push(entry);
                functions.len() - 1
            }
        }
    }

    pub(crate) fn unregister_function(&self, index: usize) {
        if let Some(slot) = self.functions.borrow_mut().get_mut(index) {
            if slot.take().is_some() {
                self.free_slots.borrow_mut().push(index);
            }
        }
    }

    pub(crate) fn function(&self, index: usize) -> QjsResult<Rc<FunctionEntry>> {
        self.functions
            .borrow()
            .get(index)
            .cloned()
            .flatten()
            .ok_or_else(|| QjsError::internal(format!("no host function at slot {}", index)))
    }

    pub(crate) fn function_count(&self) -> usize {
        self.functions.borrow().iter().flatten().count()
    }
}

fn host_message_matches(host: &QjsError, engine_message: &str) -> bool {
    let host_message = match host {
        QjsError::Interrupted => "interrupted".to_string(),
        other => other.message(),
    };
    host_message == engine_message
        || (engine_message.len() >= ENGINE_MESSAGE_LIMIT && host_message.starts_with(engine_message))
}

/// Check the NUL-terminated source buffer contract
fn check_source_buffer(source: &[u8]) -> QjsResult<()> {
    match source.last() {
        None => Err(QjsError::InvalidArgument("source buffer is empty".into())),
        Some(0) => Ok(()),
        Some(_) => Err(QjsError::InvalidArgument(
            "source buffer is not NUL-terminated".into(),
        )),
    }
}

/// Handle to a context
///
/// Cloning is cheap and yields another handle to the same context. The
/// context lives until [`QjsContext::dispose`] or until its runtime is
/// disposed, whichever comes first; after that every operation fails with
/// [`QjsError::Disposed`].
///
/// # Thread Safety
///
/// `QjsContext` is `!Send`:
///
/// ```compile_fail
/// use qjs_core::QjsRuntime;
///
/// let runtime = QjsRuntime::new().unwrap();
/// let ctx = runtime.create_context().unwrap();
/// std::thread::spawn(move || {
///     let _ = ctx.global();
/// });
/// ```
#[derive(Clone)]
pub struct QjsContext {
    shared: Arc<ContextShared>,
    _not_send: PhantomData<*mut ()>,
}

impl QjsContext {
    pub(crate) fn create(runtime: &Rc<RuntimeShared>, raw_context: bool) -> QjsResult<Self> {
        let rt = runtime.raw()?;
        // SAFETY: rt is live and owned by this thread
        let raw = unsafe {
            if raw_context {
                JS_NewContextRaw(rt)
            } else {
                JS_NewContext(rt)
            }
        };
        if raw.is_null() {
            return Err(QjsError::ContextCreation(
                "JS_NewContext returned null".into(),
            ));
        }

        let serial = runtime.next_context_serial();
        let shared = Arc::new(ContextShared {
            serial,
            inner: ThreadAffine::new(RefCell::new(Some(ContextInner {
                raw,
                runtime: Rc::clone(runtime),
                live: RefCell::new(HashMap::new()),
                next_id: Cell::new(1),
                functions: RefCell::new(Vec::new()),
                free_slots: RefCell::new(Vec::new()),
                host_error: RefCell::new(None),
            }))),
            pending: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        });

        // SAFETY: the runtime keeps the Arc alive until the context is destroyed,
        // and destroy clears the opaque pointer first
        unsafe { JS_SetContextOpaque(raw, Arc::as_ptr(&shared) as *mut c_void) };
        runtime.attach_context(Arc::clone(&shared));

        debug!(serial, raw = raw_context, "QuickJS context created");
        Ok(Self::from_shared(shared))
    }

    pub(crate) fn from_shared(shared: Arc<ContextShared>) -> Self {
        Self {
            shared,
            _not_send: PhantomData,
        }
    }

    /// Recover the handle for a context created by this crate
    ///
    /// # Safety
    /// `ctx` must be null or a live engine context.
    pub(crate) unsafe fn from_raw(ctx: *mut JSContext) -> Option<Self> {
        if ctx.is_null() {
            return None;
        }
        // SAFETY: ctx is live per caller contract
        let opaque = unsafe { JS_GetContextOpaque(ctx) } as *const ContextShared;
        if opaque.is_null() {
            return None;
        }
        // SAFETY: opaque came from Arc::as_ptr and the runtime still holds that Arc
        let shared = unsafe {
            Arc::increment_strong_count(opaque);
            Arc::from_raw(opaque)
        };
        Some(Self::from_shared(shared))
    }

    pub(crate) fn shared(&self) -> &Arc<ContextShared> {
        &self.shared
    }

    pub(crate) fn enter(&self) -> QjsResult<Ref<'_, ContextInner>> {
        self.shared.enter()
    }

    /// Check whether the calling thread owns this context
    pub fn check_access(&self) -> bool {
        self.shared.check_access()
    }

    pub fn verify_access(&self) -> QjsResult<()> {
        self.enter().map(|_| ())
    }

    pub fn is_disposed(&self) -> bool {
        matches!(self.enter(), Err(QjsError::Disposed))
    }

    pub fn add_intrinsic(&self, intrinsic: Intrinsic) -> QjsResult<()> {
        let inner = self.enter()?;
        // SAFETY: raw is live and owned by this thread
        unsafe { intrinsic.installer()(inner.raw) };
        Ok(())
    }

    /// Evaluate source text
    ///
    /// An empty `filename` is reported as `<anonymous>`.
    pub fn eval(&self, code: &str, filename: &str, flags: EvalFlags) -> QjsResult<HostValue> {
        let mut source = Vec::with_capacity(code.len() + 1);
        source.extend_from_slice(code.as_bytes());
        source.push(0);
        self.eval_bytes(&source, filename, flags)
    }

    /// Evaluate a NUL-terminated source buffer
    pub fn eval_bytes(&self, source: &[u8], filename: &str, flags: EvalFlags) -> QjsResult<HostValue> {
        self.eval_internal(None, source, filename, flags)
    }

    /// Evaluate with an explicit `this` binding
    pub fn eval_with_this(
        &self,
        this: &QjsValue,
        code: &str,
        filename: &str,
        flags: EvalFlags,
    ) -> QjsResult<HostValue> {
        let mut source = Vec::with_capacity(code.len() + 1);
        source.extend_from_slice(code.as_bytes());
        source.push(0);
        self.eval_internal(Some(this), &source, filename, flags)
    }

    /// Read and evaluate a file; the path becomes the script name
    pub fn eval_file(&self, path: impl AsRef<Path>, flags: EvalFlags) -> QjsResult<HostValue> {
        let path = path.as_ref();
        let mut source = std::fs::read(path).map_err(|e| {
            QjsError::InvalidArgument(format!("cannot read {}: {}", path.display(), e))
        })?;
        source.push(0);
        self.eval_internal(None, &source, &path.display().to_string(), flags)
    }

    fn eval_internal(
        &self,
        this: Option<&QjsValue>,
        source: &[u8],
        filename: &str,
        flags: EvalFlags,
    ) -> QjsResult<HostValue> {
        let native_flags = flags.to_native()?;
        check_source_buffer(source)?;
        let filename = c_string(if filename.is_empty() {
            DEFAULT_FILENAME
        } else {
            filename
        })?;

        let inner = self.enter()?;
        let this = match this {
            Some(value) => Some(value.borrow_in(&inner)?),
            None => None,
        };
        let input = source.as_ptr() as *const c_char;
        let len = source.len() - 1;

        // SAFETY: raw is live; the buffer is NUL-terminated and outlives the call
        let result = unsafe {
            match this {
                Some(this) => JS_EvalThis(inner.raw, this.0, input, len, filename.as_ptr(), native_flags),
                None => JS_Eval(inner.raw, input, len, filename.as_ptr(), native_flags),
            }
        };
        let value = inner.check(Value(result))?;
        inner.to_host(&self.shared, value, true)
    }

    /// The global object; request it per use rather than caching the wrapper
    pub fn global(&self) -> QjsResult<QjsValue> {
        let inner = self.enter()?;
        // SAFETY: raw is live and owned by this thread
        let global = Value(unsafe { JS_GetGlobalObject(inner.raw) });
        inner.wrap_checked(&self.shared, global)
    }

    /// Create a function backed by a host closure
    pub fn create_function<F>(&self, name: &str, arity: u32, callback: F) -> QjsResult<QjsValue>
    where
        F: Fn(&QjsContext, &Arguments<'_>) -> QjsResult<HostValue> + 'static,
    {
        self.create_function_with(name, arity, 0, None, callback)
    }

    /// Create a function with a magic number and bound data, both visible through [`Arguments`]
    pub fn create_function_with<F>(
        &self,
        name: &str,
        arity: u32,
        magic: i32,
        data: Option<&HostValue>,
        callback: F,
    ) -> QjsResult<QjsValue>
    where
        F: Fn(&QjsContext, &Arguments<'_>) -> QjsResult<HostValue> + 'static,
    {
        let arity = c_int::try_from(arity).map_err(|_| QjsError::out_of_range("arity", arity))?;
        let inner = self.enter()?;
        let bound = match data {
            Some(data) => Some(inner.from_host(data)?),
            None => None,
        };

        let index = inner.register_function(FunctionEntry::new(name, bound.is_some(), callback));
        let mut func_data = vec![
            JS_NewInt32(index as i32),
            JS_NewInt32(self.shared.serial as i32),
        ];
        if let Some(bound) = bound {
            func_data.push(bound.0);
        }

        // SAFETY: raw is live; func_data is duplicated by the engine
        let func = Value(unsafe {
            JS_NewCFunctionData(
                inner.raw,
                Some(function_trampoline),
                arity,
                magic,
                func_data.len() as c_int,
                func_data.as_mut_ptr(),
            )
        });
        if let Some(bound) = bound {
            inner.free(bound);
        }
        if func.is_exception() {
            inner.unregister_function(index);
            return Err(inner.take_exception());
        }

        if let Err(e) = set_function_name(&inner, func, name) {
            inner.free(func);
            inner.unregister_function(index);
            return Err(e);
        }
        Ok(inner.wrap(&self.shared, func))
    }

    /// Create a function that can be invoked with `new`
    ///
    /// When called as a constructor the callback receives `new.target` as
    /// `this` and is expected to return the constructed object.
    pub fn create_constructor<F>(&self, name: &str, arity: u32, callback: F) -> QjsResult<QjsValue>
    where
        F: Fn(&QjsContext, &Arguments<'_>) -> QjsResult<HostValue> + 'static,
    {
        let func = self.create_function(name, arity, callback)?;
        let inner = self.enter()?;
        let value = func.borrow_in(&inner)?;
        // SAFETY: raw is live; value is a function object
        unsafe { JS_SetConstructorBit(inner.raw, value.0, 1) };
        Ok(func)
    }

    /// Create a constructor and define it on the global object
    pub fn define_constructor<F>(&self, name: &str, arity: u32, callback: F) -> QjsResult<QjsValue>
    where
        F: Fn(&QjsContext, &Arguments<'_>) -> QjsResult<HostValue> + 'static,
    {
        let ctor = self.create_constructor(name, arity, callback)?;
        let global = self.global()?;
        global.define_property(
            name,
            ctor.dup()?,
            PropertyFlags::CONFIGURABLE | PropertyFlags::WRITABLE,
        )?;
        Ok(ctor)
    }

    /// Throw a value as an engine exception
    pub fn throw_value(&self, value: &HostValue) -> QjsError {
        let result = self.enter().and_then(|inner| {
            let raw = inner.from_host(value)?;
            // SAFETY: raw is live; JS_Throw takes ownership of the value
            unsafe { JS_Throw(inner.raw, raw.0) };
            Ok(())
        });
        result.err().unwrap_or(QjsError::Thrown)
    }

    /// Throw a plain `Error` with the given message
    pub fn throw_error(&self, message: &str) -> QjsError {
        let result = self.enter().and_then(|inner| {
            // SAFETY: raw is live
            let error = inner.check(Value(unsafe { JS_NewError(inner.raw) }))?;
            let text = match inner.new_string(message) {
                Ok(text) => text,
                Err(e) => {
                    inner.free(error);
                    return Err(e);
                }
            };
            // SAFETY: raw is live; the property value and the error are consumed
            unsafe {
                JS_DefinePropertyValueStr(
                    inner.raw,
                    error.0,
                    c"message".as_ptr(),
                    text.0,
                    JS_PROP_WRITABLE | JS_PROP_CONFIGURABLE,
                );
                JS_Throw(inner.raw, error.0);
            }
            Ok(())
        });
        result.err().unwrap_or(QjsError::Thrown)
    }

    pub fn throw_syntax_error(&self, message: &str) -> QjsError {
        self.throw_formatted(JS_ThrowSyntaxError, message)
    }

    pub fn throw_type_error(&self, message: &str) -> QjsError {
        self.throw_formatted(JS_ThrowTypeError, message)
    }

    pub fn throw_reference_error(&self, message: &str) -> QjsError {
        self.throw_formatted(JS_ThrowReferenceError, message)
    }

    pub fn throw_range_error(&self, message: &str) -> QjsError {
        self.throw_formatted(JS_ThrowRangeError, message)
    }

    pub fn throw_internal_error(&self, message: &str) -> QjsError {
        self.throw_formatted(JS_ThrowInternalError, message)
    }

    pub fn throw_stack_overflow(&self) -> QjsError {
        self.throw_formatted(JS_ThrowInternalError, "stack overflow")
    }

    pub fn throw_out_of_memory(&self) -> QjsError {
        match self.enter() {
            Ok(inner) => {
                // SAFETY: raw is live
                unsafe { JS_ThrowOutOfMemory(inner.raw) };
                QjsError::Thrown
            }
            Err(e) => e,
        }
    }

    fn throw_formatted(
        &self,
        thrower: unsafe extern "C" fn(*mut JSContext, *const c_char, ...) -> JSValue,
        message: &str,
    ) -> QjsError {
        match self.enter() {
            Ok(inner) => {
                let format = format_escaped(message);
                // SAFETY: raw is live; the format string has no conversion specifiers
                unsafe { thrower(inner.raw, format.as_ptr()) };
                QjsError::Thrown
            }
            Err(e) => e,
        }
    }

    /// Convert an engine value to a host value
    ///
    /// With `free_original`, the caller's reference is consumed: released
    /// for primitives and strings, transferred to the new wrapper for heap
    /// objects. Without it, the caller keeps its reference.
    pub fn convert_to_host(&self, value: Value, free_original: bool) -> QjsResult<HostValue> {
        let inner = self.enter()?;
        inner.to_host(&self.shared, value, free_original)
    }

    /// Convert a host value to an owned engine value
    ///
    /// The caller owns the returned reference and must hand it to the engine
    /// or release it with [`QjsContext::free_value`].
    pub fn convert_from_host(&self, value: &HostValue) -> QjsResult<Value> {
        self.enter()?.from_host(value)
    }

    /// Release a reference obtained from [`QjsContext::convert_from_host`]
    ///
    /// # Safety
    /// `value` must own exactly one reference that has not been released.
    pub unsafe fn free_value(&self, value: Value) -> QjsResult<()> {
        self.enter()?.free(value);
        Ok(())
    }

    /// Adopt an owned engine value as a tracked wrapper
    ///
    /// # Safety
    /// `value` must be a heap value owning one reference in this runtime.
    pub unsafe fn wrap_value(&self, value: Value) -> QjsResult<QjsValue> {
        if !value.has_ref_count() {
            return Err(QjsError::InvalidCast(format!(
                "{} is not a heap value",
                value.tag()
            )));
        }
        let inner = self.enter()?;
        Ok(inner.wrap(&self.shared, value))
    }

    /// Prototype used for new objects of a registered class; `None` for null
    pub fn set_class_prototype(&self, class_id: u32, prototype: Option<&QjsValue>) -> QjsResult<()> {
        let id = ClassId::new(class_id)?;
        let inner = self.enter()?;
        if !inner.runtime.has_class(class_id) {
            return Err(QjsError::ClassNotRegistered(class_id));
        }
        let proto = match prototype {
            Some(proto) => {
                let value = proto.borrow_in(&inner)?;
                if !value.is_object() {
                    return Err(QjsError::type_error("object or null", value.tag().name()));
                }
                inner.dup(value)
            }
            None => Value::NULL,
        };
        // SAFETY: raw is live; JS_SetClassProto takes ownership of proto
        unsafe { JS_SetClassProto(inner.raw, id.get(), proto.0) };
        Ok(())
    }

    pub fn class_prototype(&self, class_id: u32) -> QjsResult<Option<QjsValue>> {
        let id = ClassId::new(class_id)?;
        let inner = self.enter()?;
        if !inner.runtime.has_class(class_id) {
            return Err(QjsError::ClassNotRegistered(class_id));
        }
        // SAFETY: raw is live; the returned prototype is owned
        let proto = Value(unsafe { JS_GetClassProto(inner.raw, id.get()) });
        if proto.is_object() {
            Ok(Some(inner.wrap(&self.shared, proto)))
        } else {
            inner.free(proto);
            Ok(None)
        }
    }

    pub fn new_object(&self) -> QjsResult<QjsValue> {
        let inner = self.enter()?;
        // SAFETY: raw is live
        let obj = Value(unsafe { JS_NewObject(inner.raw) });
        inner.wrap_checked(&self.shared, obj)
    }

    /// Create an instance of a registered class
    pub fn new_object_of_class(&self, class_id: u32) -> QjsResult<QjsValue> {
        let id = ClassId::new(class_id)?;
        let inner = self.enter()?;
        if !inner.runtime.has_class(class_id) {
            return Err(QjsError::ClassNotRegistered(class_id));
        }
        // SAFETY: raw is live and the class is registered with this runtime
        let obj = Value(unsafe { JS_NewObjectClass(inner.raw, id.get() as c_int) });
        inner.wrap_checked(&self.shared, obj)
    }

    pub fn new_array(&self) -> QjsResult<QjsValue> {
        let inner = self.enter()?;
        // SAFETY: raw is live
        let array = Value(unsafe { JS_NewArray(inner.raw) });
        inner.wrap_checked(&self.shared, array)
    }

    pub fn new_string(&self, s: &str) -> QjsResult<QjsValue> {
        let inner = self.enter()?;
        let value = inner.new_string(s)?;
        Ok(inner.wrap(&self.shared, value))
    }

    /// Parse JSON text into an engine value
    pub fn parse_json(&self, text: &str, filename: &str) -> QjsResult<HostValue> {
        let mut buf = Vec::with_capacity(text.len() + 1);
        buf.extend_from_slice(text.as_bytes());
        buf.push(0);
        let filename = c_string(if filename.is_empty() {
            DEFAULT_FILENAME
        } else {
            filename
        })?;
        let inner = self.enter()?;
        // SAFETY: raw is live; buf is NUL-terminated and outlives the call
        let value = Value(unsafe {
            JS_ParseJSON(
                inner.raw,
                buf.as_ptr() as *const c_char,
                text.len(),
                filename.as_ptr(),
            )
        });
        let value = inner.check(value)?;
        inner.to_host(&self.shared, value, true)
    }

    /// Number of values currently tracked by this context
    pub fn live_value_count(&self) -> QjsResult<usize> {
        Ok(self.enter()?.live_count())
    }

    /// Number of host functions retained by this context
    pub fn function_count(&self) -> QjsResult<usize> {
        Ok(self.enter()?.function_count())
    }

    /// Releases queued by other threads and not yet drained
    pub fn pending_release_count(&self) -> usize {
        self.shared.pending_count()
    }

    /// Free every value queued by other threads now, instead of on the next interrupt tick
    pub fn drain_pending_releases(&self) -> QjsResult<usize> {
        self.verify_access()?;
        Ok(self.shared.drain_pending())
    }

    /// Destroy the context, force-releasing every value still tracked
    pub fn dispose(&self) -> QjsResult<()> {
        let runtime = Rc::clone(&self.enter()?.runtime);
        if !self.shared.destroy() {
            return Err(QjsError::internal(
                "context cannot be disposed from inside one of its callbacks",
            ));
        }
        runtime.detach_context(self.shared.serial);
        Ok(())
    }
}

impl std::fmt::Debug for QjsContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QjsContext")
            .field("serial", &self.shared.serial)
            .finish()
    }
}

fn set_function_name(inner: &ContextInner, func: Value, name: &str) -> QjsResult<()> {
    let name_value = inner.new_string(name)?;
    // SAFETY: raw is live; the name value is consumed
    let rc = unsafe {
        JS_DefinePropertyValueStr(
            inner.raw,
            func.0,
            c"name".as_ptr(),
            name_value.0,
            JS_PROP_CONFIGURABLE,
        )
    };
    inner.check_status(rc).map(|_| ())
}
