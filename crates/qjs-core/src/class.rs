//! Host-defined classes
//!
//! A class is registered once per runtime under a 16-bit id. Its optional
//! hooks (call, GC mark, finalizer, exotic property traps) are boxed closures
//! kept in the runtime's class registry; the engine only ever sees the
//! trampolines below, which find the closures again through the runtime's
//! opaque pointer and the class id stored in the object header.

use std::ffi::{CString, c_void};
use std::fmt;
use std::os::raw::c_int;
use std::rc::Rc;

use qjs_sys::*;

use crate::atom::c_string;
use crate::context::QjsContext;
use crate::convert::HostValue;
use crate::error::{QjsError, QjsResult};
use crate::exotic::ExoticTraps;
use crate::handle::QjsValue;
use crate::runtime::RuntimeShared;
use crate::trampoline::{Arguments, guard_silent, guard_value};
use crate::value::Value;

/// A validated class id
///
/// Ids must be non-zero and fit in 16 bits; anything else is rejected before
/// the engine is touched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ClassId(u32);

impl ClassId {
    pub fn new(id: u32) -> QjsResult<Self> {
        if id == JS_INVALID_CLASS_ID || id & 0xFFFF_0000 != 0 {
            return Err(QjsError::out_of_range("class id", id));
        }
        Ok(Self(id))
    }

    pub fn get(self) -> u32 {
        self.0
    }
}

impl fmt::Display for ClassId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<u32> for ClassId {
    type Error = QjsError;

    fn try_from(id: u32) -> QjsResult<Self> {
        Self::new(id)
    }
}

/// An object of a host class, as seen by class hooks
#[derive(Debug, Clone, Copy)]
pub struct ClassInstance {
    value: Value,
    class_id: ClassId,
}

impl ClassInstance {
    pub(crate) fn new(value: Value, class_id: ClassId) -> Self {
        Self { value, class_id }
    }

    /// Borrowed raw object; valid only during the hook
    pub fn value(&self) -> Value {
        self.value
    }

    pub fn class_id(&self) -> ClassId {
        self.class_id
    }

    /// Pointer stored with [`QjsValue::set_opaque`]
    pub fn opaque(&self) -> *mut c_void {
        // SAFETY: the engine hands hooks a live object; JS_GetOpaque checks the class
        unsafe { JS_GetOpaque(self.value.0, self.class_id.get()) }
    }

    /// A tracked handle to the instance; not available in finalizers
    pub fn to_handle(&self, ctx: &QjsContext) -> QjsResult<QjsValue> {
        match ctx.convert_to_host(self.value, false)? {
            HostValue::Handle(handle) => Ok(handle),
            other => Err(QjsError::type_error("object", other.type_name())),
        }
    }
}

/// Visitor handed to GC mark hooks
pub struct Marker {
    rt: *mut JSRuntime,
    mark_func: JS_MarkFunc,
}

impl Marker {
    /// Report a value the instance holds on to
    pub fn mark(&self, value: &QjsValue) -> QjsResult<()> {
        let raw = value.as_value()?;
        // SAFETY: rt is in its mark phase and raw is live
        unsafe { JS_MarkValue(self.rt, raw.0, self.mark_func) };
        Ok(())
    }

    /// # Safety
    /// `value` must be live and belong to the runtime being collected.
    pub unsafe fn mark_raw(&self, value: Value) {
        // SAFETY: forwarded caller contract
        unsafe { JS_MarkValue(self.rt, value.0, self.mark_func) };
    }
}

type CallHook = dyn Fn(&QjsContext, &Arguments<'_>) -> QjsResult<HostValue>;
type MarkHook = dyn Fn(&ClassInstance, &Marker) -> QjsResult<()>;
type FinalizerHook = dyn Fn(&ClassInstance) -> QjsResult<()>;

/// Description of a host class
///
/// ```no_run
/// use qjs_core::{ClassDefinition, HostValue, QjsRuntime};
///
/// let runtime = QjsRuntime::new()?;
/// let id = runtime.new_class_id()?;
/// runtime.register_class(
///     id.get(),
///     ClassDefinition::new("Counter")
///         .call(|_, args| Ok(HostValue::Int(args.len() as i32)))
///         .finalizer(|_| Ok(())),
/// )?;
/// # Ok::<(), qjs_core::QjsError>(())
/// ```
pub struct ClassDefinition {
    name: String,
    call: Option<Box<CallHook>>,
    gc_mark: Option<Box<MarkHook>>,
    finalizer: Option<Box<FinalizerHook>>,
    exotic: Option<ExoticTraps>,
}

impl ClassDefinition {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            call: None,
            gc_mark: None,
            finalizer: None,
            exotic: None,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Make instances callable; `is_constructing` tells `new` apart from a plain call
    pub fn call<F>(mut self, hook: F) -> Self
    where
        F: Fn(&QjsContext, &Arguments<'_>) -> QjsResult<HostValue> + 'static,
    {
        self.call = Some(Box::new(hook));
        self
    }

    /// Report engine values reachable only through host data
    pub fn gc_mark<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ClassInstance, &Marker) -> QjsResult<()> + 'static,
    {
        self.gc_mark = Some(Box::new(hook));
        self
    }

    /// Runs when an instance is freed. Errors are logged and discarded.
    pub fn finalizer<F>(mut self, hook: F) -> Self
    where
        F: Fn(&ClassInstance) -> QjsResult<()> + 'static,
    {
        self.finalizer = Some(Box::new(hook));
        self
    }

    pub fn exotic(mut self, traps: ExoticTraps) -> Self {
        self.exotic = Some(traps);
        self
    }
}

impl fmt::Debug for ClassDefinition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ClassDefinition")
            .field("name", &self.name)
            .field("call", &self.call.is_some())
            .field("gc_mark", &self.gc_mark.is_some())
            .field("finalizer", &self.finalizer.is_some())
            .field("exotic", &self.exotic.is_some())
            .finish()
    }
}

/// A registered class; lives in the runtime registry until the runtime is freed
pub(crate) struct ClassEntry {
    id: ClassId,
    _name: CString,
    definition: ClassDefinition,
    // The engine keeps a pointer to this table
    _methods: Option<Box<JSClassExoticMethods>>,
}

impl ClassEntry {
    pub(crate) fn register(
        raw: *mut JSRuntime,
        id: ClassId,
        definition: ClassDefinition,
    ) -> QjsResult<Rc<ClassEntry>> {
        let name = c_string(&definition.name)?;
        let mut methods = definition
            .exotic
            .as_ref()
            .map(|traps| Box::new(traps.native_methods()));

        let finalizer: JSClassFinalizer = if definition.finalizer.is_some() {
            Some(finalizer_trampoline)
        } else {
            None
        };
        let gc_mark: JSClassGCMark = if definition.gc_mark.is_some() {
            Some(gc_mark_trampoline)
        } else {
            None
        };
        let call: JSClassCall = if definition.call.is_some() {
            Some(call_trampoline)
        } else {
            None
        };
        let class_def = JSClassDef {
            class_name: name.as_ptr(),
            finalizer,
            gc_mark,
            call,
            exotic: methods
                .as_mut()
                .map_or(std::ptr::null_mut(), |m| &mut **m as *mut JSClassExoticMethods),
        };

        // SAFETY: raw is live; the name and method table outlive the registration
        let rc = unsafe { JS_NewClass(raw, id.get(), &class_def) };
        if rc != 0 {
            return Err(QjsError::internal(format!(
                "JS_NewClass failed for class {} ({})",
                definition.name, id
            )));
        }

        Ok(Rc::new(ClassEntry {
            id,
            _name: name,
            definition,
            _methods: methods,
        }))
    }

    pub(crate) fn id(&self) -> ClassId {
        self.id
    }

    pub(crate) fn name(&self) -> &str {
        &self.definition.name
    }

    pub(crate) fn exotic(&self) -> Option<&ExoticTraps> {
        self.definition.exotic.as_ref()
    }
}

/// Find the class entry for an object handed to a hook
///
/// # Safety
/// `rt` must be a runtime created by this crate and `obj` a live object in it.
pub(crate) unsafe fn entry_for(rt: *mut JSRuntime, obj: Value) -> QjsResult<Rc<ClassEntry>> {
    // SAFETY: forwarded caller contract
    let opaque = unsafe { JS_GetRuntimeOpaque(rt) } as *const RuntimeShared;
    if opaque.is_null() {
        return Err(QjsError::internal("runtime has no host state"));
    }
    // SAFETY: the opaque pointer is the RuntimeShared that owns rt; obj is live
    let (shared, class_id) = unsafe { (&*opaque, obj.object_class_id()) };
    let class_id = class_id.ok_or_else(|| QjsError::type_error("object", obj.tag().name()))?;
    shared.class_entry(u32::from(class_id))
}

unsafe extern "C" fn finalizer_trampoline(rt: *mut JSRuntime, val: JSValue) {
    // SAFETY: the engine finalizes a live object of a class registered by us
    let entry = match unsafe { entry_for(rt, Value(val)) } {
        Ok(entry) => entry,
        Err(err) => {
            tracing::warn!(error = %err, "finalizer for unknown class");
            return;
        }
    };
    if let Some(hook) = entry.definition.finalizer.as_ref() {
        let instance = ClassInstance::new(Value(val), entry.id);
        guard_silent("finalizer", entry.name(), || hook(&instance));
    }
}

unsafe extern "C" fn gc_mark_trampoline(rt: *mut JSRuntime, val: JSValue, mark_func: JS_MarkFunc) {
    // SAFETY: the engine marks a live object of a class registered by us
    let entry = match unsafe { entry_for(rt, Value(val)) } {
        Ok(entry) => entry,
        Err(err) => {
            tracing::warn!(error = %err, "gc mark for unknown class");
            return;
        }
    };
    if let Some(hook) = entry.definition.gc_mark.as_ref() {
        let instance = ClassInstance::new(Value(val), entry.id);
        let marker = Marker { rt, mark_func };
        guard_silent("gc_mark", entry.name(), || hook(&instance, &marker));
    }
}

unsafe extern "C" fn call_trampoline(
    ctx: *mut JSContext,
    func_obj: JSValue,
    this_val: JSValue,
    argc: c_int,
    argv: *mut JSValue,
    flags: c_int,
) -> JSValue {
    guard_value(ctx, || {
        // SAFETY: ctx is live for the duration of the call
        let context = unsafe { QjsContext::from_raw(ctx) }
            .ok_or_else(|| QjsError::internal("class called in an unmanaged context"))?;
        // SAFETY: func_obj is a live instance of one of our classes
        let entry = unsafe { entry_for(JS_GetRuntime(ctx), Value(func_obj)) }?;
        let hook = entry
            .definition
            .call
            .as_ref()
            .ok_or_else(|| QjsError::internal("class has no call hook"))?;

        let argv: &[Value] = if argc <= 0 || argv.is_null() {
            &[]
        } else {
            // SAFETY: the engine guarantees argc readable values; Value is repr(transparent)
            unsafe { std::slice::from_raw_parts(argv as *const Value, argc as usize) }
        };
        let args = Arguments::new(&context, Value(this_val), argv)
            .with_function(Value(func_obj), flags & JS_CALL_FLAG_CONSTRUCTOR != 0);
        let result = hook(&context, &args)?;
        context.convert_from_host(&result)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EvalFlags, QjsRuntime};
    use std::cell::Cell;

    #[test]
    fn test_class_id_range() {
        assert!(ClassId::new(1).is_ok());
        assert!(ClassId::new(0xFFFF).is_ok());
        assert!(matches!(
            ClassId::new(0x1_0000),
            Err(QjsError::OutOfRange { what: "class id", value: 0x1_0000 })
        ));
        assert!(ClassId::new(0).is_err());
        assert!(ClassId::try_from(0xDEAD_BEEF).is_err());
    }

    #[test]
    fn test_register_twice_fails() {
        let runtime = QjsRuntime::new().unwrap();
        let id = runtime.new_class_id().unwrap();
        runtime
            .register_class(id.get(), ClassDefinition::new("Once"))
            .unwrap();
        assert!(runtime.is_registered_class(id.get()).unwrap());
        assert!(matches!(
            runtime.register_class(id.get(), ClassDefinition::new("Twice")),
            Err(QjsError::ClassAlreadyRegistered(_))
        ));
    }

    #[test]
    fn test_finalizer_receives_opaque() {
        let runtime = QjsRuntime::new().unwrap();
        let id = runtime.new_class_id().unwrap();
        let freed = Rc::new(Cell::new(0u32));
        let freed_in = Rc::clone(&freed);
        runtime
            .register_class(
                id.get(),
                ClassDefinition::new("Boxed").finalizer(move |instance| {
                    let ptr = instance.opaque() as *mut u32;
                    if !ptr.is_null() {
                        // SAFETY: set below from Box::into_raw
                        let data = unsafe { Box::from_raw(ptr) };
                        freed_in.set(*data);
                    }
                    Ok(())
                }),
            )
            .unwrap();

        let ctx = runtime.create_context().unwrap();
        let mut obj = ctx.new_object_of_class(id.get()).unwrap();
        assert_eq!(obj.class_id().unwrap(), Some(id.get()));
        // SAFETY: the finalizer reclaims the box
        unsafe { obj.set_opaque(Box::into_raw(Box::new(77u32)) as *mut c_void) }.unwrap();
        assert!(!obj.opaque(id.get()).unwrap().is_null());

        obj.release();
        runtime.collect().unwrap();
        assert_eq!(freed.get(), 77);
    }

    #[test]
    fn test_callable_class() {
        let runtime = QjsRuntime::new().unwrap();
        let id = runtime.new_class_id().unwrap();
        runtime
            .register_class(
                id.get(),
                ClassDefinition::new("Callable").call(|_, args| {
                    Ok(HostValue::String(format!(
                        "{}:{}",
                        if args.is_constructing() { "new" } else { "call" },
                        args.len()
                    )))
                }),
            )
            .unwrap();

        let ctx = runtime.create_context().unwrap();
        let obj = ctx.new_object_of_class(id.get()).unwrap();
        assert_eq!(
            obj.call(&[HostValue::Int(1), HostValue::Int(2)]).unwrap(),
            HostValue::from("call:2")
        );
    }

    #[test]
    fn test_gc_mark_runs_on_collect() {
        let runtime = QjsRuntime::new().unwrap();
        let id = runtime.new_class_id().unwrap();
        let marks = Rc::new(Cell::new(0u32));
        let marks_in = Rc::clone(&marks);
        runtime
            .register_class(
                id.get(),
                ClassDefinition::new("Marked").gc_mark(move |_, _| {
                    marks_in.set(marks_in.get() + 1);
                    Ok(())
                }),
            )
            .unwrap();

        let ctx = runtime.create_context().unwrap();
        let obj = ctx.new_object_of_class(id.get()).unwrap();
        ctx.global().unwrap().set("keep", obj).unwrap();
        runtime.collect().unwrap();
        assert!(marks.get() > 0);
    }

    #[test]
    fn test_failing_hooks_are_swallowed() {
        let runtime = QjsRuntime::new().unwrap();
        let id = runtime.new_class_id().unwrap();
        runtime
            .register_class(
                id.get(),
                ClassDefinition::new("Faulty")
                    .finalizer(|_| Err(QjsError::internal("finalizer failed")))
                    .gc_mark(|_, _| panic!("mark failed")),
            )
            .unwrap();
        let ctx = runtime.create_context().unwrap();
        {
            let obj = ctx.new_object_of_class(id.get()).unwrap();
            ctx.global().unwrap().set("faulty", obj).unwrap();
        }
        runtime.collect().unwrap();
        ctx.eval("faulty = null", "", EvalFlags::GLOBAL).unwrap();
        runtime.collect().unwrap();
        assert_eq!(
            ctx.eval("'still running'", "", EvalFlags::GLOBAL).unwrap(),
            HostValue::from("still running")
        );
    }

    #[test]
    fn test_unregistered_class_rejected() {
        let runtime = QjsRuntime::new().unwrap();
        let ctx = runtime.create_context().unwrap();
        assert!(matches!(
            ctx.new_object_of_class(0x7FFF),
            Err(QjsError::ClassNotRegistered(0x7FFF))
        ));
        assert!(matches!(
            ctx.class_prototype(0x7FFF),
            Err(QjsError::ClassNotRegistered(0x7FFF))
        ));
        assert!(matches!(
            ctx.set_class_prototype(0x1_0000, None),
            Err(QjsError::OutOfRange { .. })
        ));
    }

    #[test]
    fn test_class_prototype() {
        let runtime = QjsRuntime::new().unwrap();
        let id = runtime.new_class_id().unwrap();
        runtime
            .register_class(id.get(), ClassDefinition::new("Proto"))
            .unwrap();
        let ctx = runtime.create_context().unwrap();

        let proto = ctx.new_object().unwrap();
        proto
            .define_function("hello", 0, |_, _| Ok(HostValue::from("hi")))
            .unwrap();
        ctx.set_class_prototype(id.get(), Some(&proto)).unwrap();
        assert_eq!(ctx.class_prototype(id.get()).unwrap(), Some(proto));

        let obj = ctx.new_object_of_class(id.get()).unwrap();
        ctx.global().unwrap().set("inst", obj).unwrap();
        assert_eq!(
            ctx.eval("inst.hello()", "", EvalFlags::GLOBAL).unwrap(),
            HostValue::from("hi")
        );
    }
}
