//! Runtime: engine heap owner and unit of thread affinity

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::ffi::c_void;
use std::os::raw::c_int;
use std::panic::{self, AssertUnwindSafe};
use std::ptr;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{self, ThreadId};

use parking_lot::Mutex;
use qjs_sys::*;
use serde::{Deserialize, Serialize};
use tracing::{debug, trace, warn};

use crate::class::{ClassDefinition, ClassEntry, ClassId};
use crate::context::{ContextShared, QjsContext};
use crate::error::{QjsError, QjsResult};

/// Engine default for both the GC threshold and the native stack budget
pub const DEFAULT_GC_THRESHOLD: i64 = 256 * 1024;
pub const DEFAULT_STACK_SIZE: usize = 256 * 1024;

/// Global lock for engine calls that touch process-wide state.
/// `JS_NewClassID` bumps a static counter, so allocation is serialized.
static ENGINE_LOCK: Mutex<()> = Mutex::new(());

/// Memory and stack configuration applied when the runtime is created
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Heap limit in bytes; zero or negative means unlimited
    pub memory_limit: i64,
    /// Allocation volume that triggers automatic collection; `-1` disables it
    pub gc_threshold: i64,
    /// Native stack budget in bytes
    pub max_stack_size: usize,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            memory_limit: -1,
            gc_threshold: DEFAULT_GC_THRESHOLD,
            max_stack_size: DEFAULT_STACK_SIZE,
        }
    }
}

impl RuntimeConfig {
    pub fn with_memory_limit(mut self, bytes: i64) -> Self {
        self.memory_limit = bytes;
        self
    }

    pub fn with_gc_threshold(mut self, bytes: i64) -> Self {
        self.gc_threshold = bytes;
        self
    }

    pub fn with_max_stack_size(mut self, bytes: usize) -> Self {
        self.max_stack_size = bytes;
        self
    }

    fn apply(&self, rt: *mut JSRuntime) {
        // SAFETY: rt was just created and is exclusively owned here
        unsafe {
            if self.memory_limit > 0 {
                JS_SetMemoryLimit(rt, self.memory_limit as usize);
            }
            if self.gc_threshold != DEFAULT_GC_THRESHOLD {
                let threshold = if self.gc_threshold < 0 {
                    usize::MAX
                } else {
                    self.gc_threshold as usize
                };
                JS_SetGCThreshold(rt, threshold);
            }
            if self.max_stack_size != DEFAULT_STACK_SIZE {
                JS_SetMaxStackSize(rt, self.max_stack_size);
            }
        }
    }
}

/// Result of an interrupt handler
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InterruptAction {
    Continue,
    /// Abort the running script with an uncatchable `Interrupted` error
    Cancel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct InterruptHandlerId(u64);

type InterruptHandler = Box<dyn FnMut() -> InterruptAction>;

/// Thread-safe request for cancellation, honoured on the next interrupt tick
#[derive(Debug, Clone)]
pub struct InterruptHandle {
    requested: Arc<AtomicBool>,
}

impl InterruptHandle {
    pub fn request(&self) {
        self.requested.store(true, Ordering::SeqCst);
    }

    pub fn is_requested(&self) -> bool {
        self.requested.load(Ordering::SeqCst)
    }
}

/// Engine memory statistics
#[derive(Debug, Clone, Copy, Default, Serialize)]
pub struct MemoryUsage {
    pub malloc_size: i64,
    pub malloc_limit: i64,
    pub memory_used_size: i64,
    pub malloc_count: i64,
    pub memory_used_count: i64,
    pub atom_count: i64,
    pub str_count: i64,
    pub obj_count: i64,
    pub prop_count: i64,
    pub shape_count: i64,
    pub js_func_count: i64,
    pub c_func_count: i64,
    pub array_count: i64,
}

impl From<JSMemoryUsage> for MemoryUsage {
    fn from(u: JSMemoryUsage) -> Self {
        Self {
            malloc_size: u.malloc_size,
            malloc_limit: u.malloc_limit,
            memory_used_size: u.memory_used_size,
            malloc_count: u.malloc_count,
            memory_used_count: u.memory_used_count,
            atom_count: u.atom_count,
            str_count: u.str_count,
            obj_count: u.obj_count,
            prop_count: u.prop_count,
            shape_count: u.shape_count,
            js_func_count: u.js_func_count,
            c_func_count: u.c_func_count,
            array_count: u.array_count,
        }
    }
}

/// State shared between the runtime handle, its contexts, and the engine callbacks
pub(crate) struct RuntimeShared {
    raw: Cell<*mut JSRuntime>,
    owner: ThreadId,
    config: RuntimeConfig,
    classes: RefCell<HashMap<u32, Rc<ClassEntry>>>,
    contexts: RefCell<Vec<Arc<ContextShared>>>,
    next_context_serial: Cell<u32>,
    handlers: RefCell<Vec<(InterruptHandlerId, InterruptHandler)>>,
    next_handler_id: Cell<u64>,
    cancel_requested: Arc<AtomicBool>,
    interrupted: Cell<bool>,
}

impl RuntimeShared {
    /// Raw runtime pointer, after the thread and liveness checks
    pub(crate) fn raw(&self) -> QjsResult<*mut JSRuntime> {
        if thread::current().id() != self.owner {
            return Err(QjsError::WrongThread);
        }
        let raw = self.raw.get();
        if raw.is_null() {
            return Err(QjsError::Disposed);
        }
        Ok(raw)
    }

    pub(crate) fn class_entry(&self, class_id: u32) -> QjsResult<Rc<ClassEntry>> {
        let classes = self
            .classes
            .try_borrow()
            .map_err(|_| QjsError::internal("class registry is being modified"))?;
        classes
            .get(&class_id)
            .cloned()
            .ok_or(QjsError::ClassNotRegistered(class_id))
    }

    pub(crate) fn has_class(&self, class_id: u32) -> bool {
        self.classes
            .try_borrow()
            .map(|c| c.contains_key(&class_id))
            .unwrap_or(false)
    }

    pub(crate) fn context(&self, serial: u32) -> Option<Arc<ContextShared>> {
        self.contexts
            .try_borrow()
            .ok()?
            .iter()
            .find(|c| c.serial() == serial)
            .cloned()
    }

    pub(crate) fn next_context_serial(&self) -> u32 {
        let serial = self.next_context_serial.get();
        self.next_context_serial.set(serial.wrapping_add(1));
        serial
    }

    pub(crate) fn attach_context(&self, context: Arc<ContextShared>) {
        self.contexts.borrow_mut().push(context);
    }

    pub(crate) fn detach_context(&self, serial: u32) {
        if let Ok(mut contexts) = self.contexts.try_borrow_mut() {
            contexts.retain(|c| c.serial() != serial);
        }
    }

    /// Clear the cancellation marker; true if the last abort came from an interrupt
    pub(crate) fn take_interrupted(&self) -> bool {
        self.interrupted.replace(false)
    }

    /// Flag the pending abort as an interrupt
    pub(crate) fn mark_interrupted(&self) {
        self.interrupted.set(true);
    }

    fn on_interrupt_tick(&self) -> InterruptAction {
        // Clone the list so a handler may create or dispose contexts
        let contexts: Vec<Arc<ContextShared>> = self
            .contexts
            .try_borrow()
            .map(|c| c.clone())
            .unwrap_or_default();
        for context in &contexts {
            let drained = context.drain_pending();
            if drained > 0 {
                trace!(drained, "released values queued from other threads");
            }
        }

        let mut action = if self.cancel_requested.swap(false, Ordering::SeqCst) {
            InterruptAction::Cancel
        } else {
            InterruptAction::Continue
        };

        let mut handlers = match self.handlers.try_borrow_mut() {
            Ok(mut slot) => std::mem::take(&mut *slot),
            Err(_) => Vec::new(),
        };
        for (_, handler) in handlers.iter_mut() {
            if handler() == InterruptAction::Cancel {
                action = InterruptAction::Cancel;
            }
        }
        if let Ok(mut slot) = self.handlers.try_borrow_mut() {
            // Keep handlers registered while the list was taken
            handlers.append(&mut slot);
            *slot = handlers;
        }

        if action == InterruptAction::Cancel {
            debug!("interrupt handler requested cancellation");
            self.interrupted.set(true);
        }
        action
    }

    fn dispose(&self) {
        let raw = self.raw.replace(ptr::null_mut());
        if raw.is_null() {
            return;
        }

        let contexts = std::mem::take(&mut *self.contexts.borrow_mut());
        let count = contexts.len();
        for context in &contexts {
            context.destroy();
        }

        // SAFETY: every context has been freed; finalizers still find the
        // class registry through the runtime opaque pointer
        unsafe { JS_FreeRuntime(raw) };

        self.classes.borrow_mut().clear();
        self.handlers.borrow_mut().clear();
        debug!(contexts = count, "QuickJS runtime disposed");
    }
}

/// Interrupt callback registered with the engine
unsafe extern "C" fn interrupt_trampoline(_rt: *mut JSRuntime, opaque: *mut c_void) -> c_int {
    if opaque.is_null() {
        return 0;
    }
    // SAFETY: opaque is the RuntimeShared registered at creation; it outlives JS_FreeRuntime
    let shared = unsafe { &*(opaque as *const RuntimeShared) };
    match panic::catch_unwind(AssertUnwindSafe(|| shared.on_interrupt_tick())) {
        Ok(InterruptAction::Continue) => 0,
        Ok(InterruptAction::Cancel) => 1,
        Err(_) => {
            warn!("interrupt handler panicked; cancelling execution");
            shared.interrupted.set(true);
            1
        }
    }
}

/// An isolated engine heap
///
/// The runtime owns its contexts: disposing it (explicitly or on drop)
/// destroys every context and force-releases every value still tracked.
///
/// # Thread Safety
///
/// `QjsRuntime` is `!Send`; the thread that creates it is the only one
/// allowed to touch the engine.
///
/// ```compile_fail
/// use qjs_core::QjsRuntime;
///
/// let runtime = QjsRuntime::new().unwrap();
/// std::thread::spawn(move || {
///     runtime.collect();
/// });
/// ```
pub struct QjsRuntime {
    shared: Rc<RuntimeShared>,
}

impl QjsRuntime {
    pub fn new() -> QjsResult<Self> {
        Self::with_config(RuntimeConfig::default())
    }

    pub fn with_config(config: RuntimeConfig) -> QjsResult<Self> {
        let raw = {
            let _guard = ENGINE_LOCK.lock();
            // SAFETY: JS_NewRuntime has no preconditions
            unsafe { JS_NewRuntime() }
        };
        if raw.is_null() {
            return Err(QjsError::ContextCreation(
                "JS_NewRuntime returned null".into(),
            ));
        }
        config.apply(raw);

        let shared = Rc::new(RuntimeShared {
            raw: Cell::new(raw),
            owner: thread::current().id(),
            config: config.clone(),
            classes: RefCell::new(HashMap::new()),
            contexts: RefCell::new(Vec::new()),
            next_context_serial: Cell::new(1),
            handlers: RefCell::new(Vec::new()),
            next_handler_id: Cell::new(1),
            cancel_requested: Arc::new(AtomicBool::new(false)),
            interrupted: Cell::new(false),
        });

        let opaque = Rc::as_ptr(&shared) as *mut c_void;
        // SAFETY: the opaque pointer stays valid until dispose frees the runtime
        unsafe {
            JS_SetRuntimeOpaque(raw, opaque);
            JS_SetInterruptHandler(raw, Some(interrupt_trampoline), opaque);
        }

        debug!(
            memory_limit = config.memory_limit,
            gc_threshold = config.gc_threshold,
            max_stack_size = config.max_stack_size,
            "QuickJS runtime created"
        );
        Ok(Self { shared })
    }

    pub fn config(&self) -> &RuntimeConfig {
        &self.shared.config
    }

    /// Check whether the calling thread owns this runtime
    pub fn check_access(&self) -> bool {
        thread::current().id() == self.shared.owner
    }

    pub fn verify_access(&self) -> QjsResult<()> {
        self.shared.raw().map(|_| ())
    }

    pub fn is_disposed(&self) -> bool {
        self.shared.raw.get().is_null()
    }

    /// Create a context with the default intrinsics
    pub fn create_context(&self) -> QjsResult<QjsContext> {
        QjsContext::create(&self.shared, false)
    }

    /// Create a context without intrinsics; add them with [`QjsContext::add_intrinsic`]
    pub fn create_raw_context(&self) -> QjsResult<QjsContext> {
        QjsContext::create(&self.shared, true)
    }

    pub fn context_count(&self) -> usize {
        self.shared.contexts.borrow().len()
    }

    /// Allocate a class id that no other runtime in this process uses
    pub fn new_class_id(&self) -> QjsResult<ClassId> {
        self.shared.raw()?;
        let mut id: JSClassID = 0;
        let _guard = ENGINE_LOCK.lock();
        // SAFETY: JS_NewClassID only touches the process-wide counter, serialized by the lock
        let id = unsafe { JS_NewClassID(&mut id) };
        ClassId::new(id)
    }

    /// Register a host class
    ///
    /// The id must fit in 16 bits and must not already be registered with
    /// this runtime. Each hook is wrapped in a trampoline that keeps host
    /// errors and panics from unwinding into the engine.
    pub fn register_class(&self, class_id: u32, definition: ClassDefinition) -> QjsResult<ClassId> {
        let id = ClassId::new(class_id)?;
        let raw = self.shared.raw()?;
        if self.shared.classes.borrow().contains_key(&class_id) {
            return Err(QjsError::ClassAlreadyRegistered(class_id));
        }

        let name = definition.name().to_string();
        let entry = ClassEntry::register(raw, id, definition)?;
        self.shared.classes.borrow_mut().insert(class_id, entry);

        debug!(class_id, class = %name, "class registered");
        Ok(id)
    }

    pub fn is_registered_class(&self, class_id: u32) -> QjsResult<bool> {
        let raw = self.shared.raw()?;
        // SAFETY: raw is live and owned by this thread
        Ok(unsafe { JS_IsRegisteredClass(raw, class_id) } != 0)
    }

    /// Run queued jobs (promise reactions)
    ///
    /// Returns whether jobs remain. With `only_once`, at most one job runs.
    pub fn run_pending_jobs(&self, only_once: bool) -> QjsResult<bool> {
        let raw = self.shared.raw()?;
        loop {
            let mut job_ctx: *mut JSContext = ptr::null_mut();
            // SAFETY: raw is live and owned by this thread
            let rc = unsafe { JS_ExecutePendingJob(raw, &mut job_ctx) };
            if rc < 0 {
                return Err(job_error(job_ctx));
            }
            if rc == 0 || only_once {
                break;
            }
            trace!("pending job executed");
        }
        // SAFETY: raw is live and owned by this thread
        Ok(unsafe { JS_IsJobPending(raw) } != 0)
    }

    pub fn is_job_pending(&self) -> QjsResult<bool> {
        let raw = self.shared.raw()?;
        // SAFETY: raw is live and owned by this thread
        Ok(unsafe { JS_IsJobPending(raw) } != 0)
    }

    /// Force a full garbage collection
    pub fn collect(&self) -> QjsResult<()> {
        let raw = self.shared.raw()?;
        // SAFETY: raw is live and owned by this thread
        unsafe { JS_RunGC(raw) };
        Ok(())
    }

    pub fn memory_usage(&self) -> QjsResult<MemoryUsage> {
        let raw = self.shared.raw()?;
        let mut usage = JSMemoryUsage::default();
        // SAFETY: raw is live and `usage` is a valid out-parameter
        unsafe { JS_ComputeMemoryUsage(raw, &mut usage) };
        Ok(usage.into())
    }

    /// Subscribe to the periodic interrupt raised during script execution
    ///
    /// Returning [`InterruptAction::Cancel`] aborts the running script with
    /// [`QjsError::Interrupted`]. Timeouts are built by measuring elapsed
    /// time inside the handler.
    pub fn on_interrupt<F>(&self, handler: F) -> InterruptHandlerId
    where
        F: FnMut() -> InterruptAction + 'static,
    {
        let id = InterruptHandlerId(self.shared.next_handler_id.get());
        self.shared.next_handler_id.set(id.0 + 1);
        self.shared
            .handlers
            .borrow_mut()
            .push((id, Box::new(handler)));
        id
    }

    pub fn remove_interrupt_handler(&self, id: InterruptHandlerId) -> bool {
        let mut handlers = self.shared.handlers.borrow_mut();
        let before = handlers.len();
        handlers.retain(|(h, _)| *h != id);
        handlers.len() != before
    }

    /// Handle that other threads can use to cancel the running script
    pub fn interrupt_handle(&self) -> InterruptHandle {
        InterruptHandle {
            requested: Arc::clone(&self.shared.cancel_requested),
        }
    }

    /// Destroy every context and free the engine heap
    pub fn dispose(&self) {
        self.shared.dispose();
    }
}

impl Drop for QjsRuntime {
    fn drop(&mut self) {
        self.shared.dispose();
    }
}

impl std::fmt::Debug for QjsRuntime {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QjsRuntime")
            .field("config", &self.shared.config)
            .field("disposed", &self.is_disposed())
            .finish()
    }
}

fn job_error(job_ctx: *mut JSContext) -> QjsError {
    // SAFETY: the engine reports the context the failed job ran in
    match unsafe { QjsContext::from_raw(job_ctx) } {
        Some(context) => match context.enter() {
            Ok(inner) => inner.take_exception(),
            Err(e) => e,
        },
        None => QjsError::internal("pending job failed in an unmanaged context"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RuntimeConfig::default();
        assert_eq!(config.memory_limit, -1);
        assert_eq!(config.gc_threshold, 256 * 1024);
        assert_eq!(config.max_stack_size, 256 * 1024);
    }

    #[test]
    fn test_config_builder() {
        let config = RuntimeConfig::default()
            .with_memory_limit(8 << 20)
            .with_gc_threshold(-1)
            .with_max_stack_size(512 * 1024);
        assert_eq!(config.memory_limit, 8 << 20);
        assert_eq!(config.gc_threshold, -1);
        assert_eq!(config.max_stack_size, 512 * 1024);
    }

    #[test]
    fn test_runtime_lifecycle() {
        let runtime = QjsRuntime::new().unwrap();
        assert!(runtime.check_access());
        runtime.verify_access().unwrap();
        runtime.collect().unwrap();
        assert!(!runtime.is_job_pending().unwrap());

        runtime.dispose();
        assert!(runtime.is_disposed());
        assert!(matches!(runtime.collect(), Err(QjsError::Disposed)));
    }

    #[test]
    fn test_memory_usage_reports_heap() {
        let runtime = QjsRuntime::with_config(RuntimeConfig::default().with_memory_limit(32 << 20))
            .unwrap();
        let usage = runtime.memory_usage().unwrap();
        assert!(usage.malloc_size > 0);
        assert_eq!(usage.malloc_limit, 32 << 20);
    }

    #[test]
    fn test_interrupt_handlers_register_and_remove() {
        let runtime = QjsRuntime::new().unwrap();
        let id = runtime.on_interrupt(|| InterruptAction::Continue);
        assert!(runtime.remove_interrupt_handler(id));
        assert!(!runtime.remove_interrupt_handler(id));
    }

    #[test]
    fn test_interrupt_handle_is_send() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<InterruptHandle>();

        let runtime = QjsRuntime::new().unwrap();
        let handle = runtime.interrupt_handle();
        std::thread::spawn(move || handle.request()).join().unwrap();
        assert!(runtime.interrupt_handle().is_requested());
    }
}
