//! Tracked ownership of heap values
//!
//! A [`QjsValue`] owns exactly one native reference. It is registered in its
//! context's live set under a numeric id; every operation resolves the id
//! again, so a wrapper whose value was released (explicitly, or by the
//! context being destroyed) fails with [`QjsError::Disposed`] instead of
//! touching freed memory.
//!
//! Dropping a wrapper on the owning thread releases the reference at once.
//! Dropping it anywhere else only queues the id; the queue is drained on
//! the next interrupt tick, or by [`QjsContext::drain_pending_releases`].

use std::ffi::c_void;
use std::fmt;
use std::hash::{Hash, Hasher};
use std::os::raw::c_int;
use std::ptr;
use std::sync::Arc;

use qjs_sys::*;
use scopeguard::defer;

use crate::context::{ContextInner, ContextShared, QjsContext};
use crate::convert::HostValue;
use crate::error::{QjsError, QjsResult};
use crate::flags::{PropertyFlags, PropertyNameFlags};
use crate::trampoline::Arguments;
use crate::value::{Tag, Value};

/// Owning handle to a heap value
///
/// `QjsValue` is `Send + Sync` so it may be dropped on any thread, but all
/// operations other than drop must happen on the runtime's thread.
pub struct QjsValue {
    context: Arc<ContextShared>,
    id: u64,
    identity: (i32, u64),
    released: bool,
}

impl QjsValue {
    pub(crate) fn new(context: Arc<ContextShared>, id: u64, value: Value) -> Self {
        Self {
            context,
            id,
            identity: value.identity(),
            released: false,
        }
    }

    pub fn new_object(ctx: &QjsContext) -> QjsResult<Self> {
        ctx.new_object()
    }

    pub fn new_object_of_class(ctx: &QjsContext, class_id: u32) -> QjsResult<Self> {
        ctx.new_object_of_class(class_id)
    }

    pub fn new_array(ctx: &QjsContext) -> QjsResult<Self> {
        ctx.new_array()
    }

    /// Parse JSON text; primitives come back unwrapped
    pub fn from_json(ctx: &QjsContext, text: &str) -> QjsResult<HostValue> {
        ctx.parse_json(text, "<json>")
    }

    /// The context this value was created in
    pub fn context(&self) -> QjsContext {
        QjsContext::from_shared(Arc::clone(&self.context))
    }

    pub fn is_released(&self) -> bool {
        self.released
    }

    fn is_stale(&self) -> bool {
        self.released || self.context.is_closed()
    }

    /// Resolve the tracked value, using the caller's context borrow
    ///
    /// Values may be used in any context of the runtime that created them.
    pub(crate) fn borrow_in(&self, inner: &ContextInner) -> QjsResult<Value> {
        let own = self.context.enter()?;
        if !std::rc::Rc::ptr_eq(&own.runtime, &inner.runtime) {
            return Err(QjsError::InvalidArgument(
                "value belongs to a different runtime".into(),
            ));
        }
        own.lookup(self.id)
    }

    /// Run `f` with the context state and the borrowed value
    fn with<R>(&self, f: impl FnOnce(&ContextInner, Value) -> QjsResult<R>) -> QjsResult<R> {
        let inner = self.context.enter()?;
        let value = inner.lookup(self.id)?;
        f(&inner, value)
    }

    fn with_object<R>(&self, f: impl FnOnce(&ContextInner, Value) -> QjsResult<R>) -> QjsResult<R> {
        self.with(|inner, value| {
            if !value.is_object() {
                return Err(QjsError::type_error("object", value.tag().name()));
            }
            f(inner, value)
        })
    }

    /// The raw value, borrowed from this wrapper; valid until the wrapper is released
    pub fn as_value(&self) -> QjsResult<Value> {
        self.with(|_, value| Ok(value))
    }

    /// A duplicated raw reference that the caller must release with
    /// [`QjsContext::free_value`] or hand to the engine
    pub fn native_value(&self) -> QjsResult<Value> {
        self.with(|inner, value| Ok(inner.dup(value)))
    }

    /// Another wrapper owning its own reference to the same value
    pub fn dup(&self) -> QjsResult<QjsValue> {
        self.with(|inner, value| Ok(inner.wrap(&self.context, inner.dup(value))))
    }

    pub fn tag(&self) -> QjsResult<Tag> {
        self.with(|_, value| Ok(value.tag()))
    }

    pub fn is_object(&self) -> QjsResult<bool> {
        self.with(|_, value| Ok(value.is_object()))
    }

    pub fn is_function(&self) -> QjsResult<bool> {
        // SAFETY: raw is live and value is tracked
        self.with(|inner, value| Ok(unsafe { JS_IsFunction(inner.raw, value.0) } != 0))
    }

    pub fn is_constructor(&self) -> QjsResult<bool> {
        // SAFETY: raw is live and value is tracked
        self.with(|inner, value| Ok(unsafe { JS_IsConstructor(inner.raw, value.0) } != 0))
    }

    pub fn is_array(&self) -> QjsResult<bool> {
        self.with(|inner, value| {
            // SAFETY: raw is live and value is tracked
            let rc = unsafe { JS_IsArray(inner.raw, value.0) };
            inner.check_status(rc)
        })
    }

    pub fn is_error(&self) -> QjsResult<bool> {
        // SAFETY: raw is live and value is tracked
        self.with(|inner, value| Ok(unsafe { JS_IsError(inner.raw, value.0) } != 0))
    }

    /// Class id from the object header; `None` for non-objects
    pub fn class_id(&self) -> QjsResult<Option<u32>> {
        // SAFETY: tracked objects are live
        self.with(|_, value| Ok(unsafe { value.object_class_id() }.map(u32::from)))
    }

    /// `ToString` of the value
    pub fn to_js_string(&self) -> QjsResult<String> {
        self.with(|inner, value| inner.string_of(value))
    }

    pub fn get(&self, name: &str) -> QjsResult<HostValue> {
        let name = crate::atom::c_string(name)?;
        self.with_object(|inner, obj| {
            // SAFETY: raw is live; the returned value is owned
            let prop = Value(unsafe { JS_GetPropertyStr(inner.raw, obj.0, name.as_ptr()) });
            let prop = inner.check(prop)?;
            inner.to_host(&self.context, prop, true)
        })
    }

    pub fn set(&self, name: &str, value: impl Into<HostValue>) -> QjsResult<()> {
        let name = crate::atom::c_string(name)?;
        let value = value.into();
        self.with_object(|inner, obj| {
            let raw = inner.from_host(&value)?;
            // SAFETY: raw is live; the property value is consumed
            let rc = unsafe { JS_SetPropertyStr(inner.raw, obj.0, name.as_ptr(), raw.0) };
            inner.check_status(rc).map(|_| ())
        })
    }

    pub fn get_index(&self, index: u32) -> QjsResult<HostValue> {
        self.with_object(|inner, obj| {
            // SAFETY: raw is live; the returned value is owned
            let prop = Value(unsafe { JS_GetPropertyUint32(inner.raw, obj.0, index) });
            let prop = inner.check(prop)?;
            inner.to_host(&self.context, prop, true)
        })
    }

    pub fn set_index(&self, index: u32, value: impl Into<HostValue>) -> QjsResult<()> {
        let value = value.into();
        self.with_object(|inner, obj| {
            let raw = inner.from_host(&value)?;
            // SAFETY: raw is live; the property value is consumed
            let rc = unsafe { JS_SetPropertyUint32(inner.raw, obj.0, index, raw.0) };
            inner.check_status(rc).map(|_| ())
        })
    }

    /// Define a data property with explicit attributes
    pub fn define_property(
        &self,
        name: &str,
        value: impl Into<HostValue>,
        flags: PropertyFlags,
    ) -> QjsResult<bool> {
        let name = crate::atom::c_string(name)?;
        let value = value.into();
        self.with_object(|inner, obj| {
            let raw = inner.from_host(&value)?;
            // SAFETY: raw is live; the property value is consumed
            let rc = unsafe {
                JS_DefinePropertyValueStr(inner.raw, obj.0, name.as_ptr(), raw.0, flags.bits())
            };
            inner.check_status(rc)
        })
    }

    /// Define an accessor property; either side may be absent
    pub fn define_accessor(
        &self,
        name: &str,
        getter: Option<&QjsValue>,
        setter: Option<&QjsValue>,
        flags: PropertyFlags,
    ) -> QjsResult<bool> {
        self.with_object(|inner, obj| {
            let atom = inner.atom(name)?;
            let getter = match getter {
                Some(g) => inner.dup(g.borrow_in(inner)?),
                None => Value::UNDEFINED,
            };
            let setter = match setter {
                Some(s) => match s.borrow_in(inner) {
                    Ok(s) => inner.dup(s),
                    Err(e) => {
                        inner.free(getter);
                        return Err(e);
                    }
                },
                None => Value::UNDEFINED,
            };
            // SAFETY: raw is live; getter and setter are consumed
            let rc = unsafe {
                JS_DefinePropertyGetSet(inner.raw, obj.0, atom.raw(), getter.0, setter.0, flags.bits())
            };
            inner.check_status(rc)
        })
    }

    /// Create a host function and store it as a property
    pub fn define_function<F>(&self, name: &str, arity: u32, callback: F) -> QjsResult<()>
    where
        F: Fn(&QjsContext, &Arguments<'_>) -> QjsResult<HostValue> + 'static,
    {
        let func = self.context().create_function(name, arity, callback)?;
        self.define_property(
            name,
            func,
            PropertyFlags::CONFIGURABLE | PropertyFlags::WRITABLE,
        )
        .map(|_| ())
    }

    pub fn delete_property(&self, name: &str) -> QjsResult<bool> {
        self.with_object(|inner, obj| {
            let atom = inner.atom(name)?;
            // SAFETY: raw is live
            let rc = unsafe { JS_DeleteProperty(inner.raw, obj.0, atom.raw(), 0) };
            inner.check_status(rc)
        })
    }

    pub fn has_property(&self, name: &str) -> QjsResult<bool> {
        self.with_object(|inner, obj| {
            let atom = inner.atom(name)?;
            // SAFETY: raw is live
            let rc = unsafe { JS_HasProperty(inner.raw, obj.0, atom.raw()) };
            inner.check_status(rc)
        })
    }

    /// Own property keys, in engine order
    pub fn own_property_names(&self, flags: PropertyNameFlags) -> QjsResult<Vec<String>> {
        self.with_object(|inner, obj| {
            let mut tab: *mut JSPropertyEnum = ptr::null_mut();
            let mut len: u32 = 0;
            // SAFETY: raw is live; tab and len are valid out-parameters
            let rc = unsafe { JS_GetOwnPropertyNames(inner.raw, &mut tab, &mut len, obj.0, flags.bits()) };
            inner.check_status(rc)?;

            let ctx = inner.raw;
            defer! {
                // SAFETY: the table and its atoms were allocated by the engine for us
                unsafe {
                    for i in 0..len as usize {
                        JS_FreeAtom(ctx, (*tab.add(i)).atom);
                    }
                    js_free(ctx, tab as *mut c_void);
                }
            }

            let mut names = Vec::with_capacity(len as usize);
            for i in 0..len as usize {
                // SAFETY: i < len
                let atom = unsafe { (*tab.add(i)).atom };
                names.push(inner.atom_name(atom)?);
            }
            Ok(names)
        })
    }

    /// Call as a function with the global object as `this`
    pub fn call(&self, args: &[HostValue]) -> QjsResult<HostValue> {
        self.call_internal(None, args)
    }

    pub fn call_with_this(&self, this: &HostValue, args: &[HostValue]) -> QjsResult<HostValue> {
        self.call_internal(Some(this), args)
    }

    fn call_internal(&self, this: Option<&HostValue>, args: &[HostValue]) -> QjsResult<HostValue> {
        self.with(|inner, func| {
            // SAFETY: raw is live and func is tracked
            if unsafe { JS_IsFunction(inner.raw, func.0) } == 0 {
                return Err(QjsError::type_error("function", func.tag().name()));
            }
            let this = match this {
                Some(this) => inner.from_host(this)?,
                // SAFETY: raw is live; the global object is owned
                None => Value(unsafe { JS_GetGlobalObject(inner.raw) }),
            };
            defer! { inner.free(this) }
            let argv = owned_args(inner, args)?;
            defer! { release_args(inner, &argv) }

            // SAFETY: raw is live; JS_Call borrows its arguments
            let result = Value(unsafe {
                JS_Call(
                    inner.raw,
                    func.0,
                    this.0,
                    argv.len() as c_int,
                    argv.as_ptr() as *mut JSValue,
                )
            });
            let result = inner.check(result)?;
            inner.to_host(&self.context, result, true)
        })
    }

    /// Invoke as `new f(...args)`
    pub fn call_constructor(&self, args: &[HostValue]) -> QjsResult<HostValue> {
        self.with(|inner, func| {
            // SAFETY: raw is live and func is tracked
            if unsafe { JS_IsConstructor(inner.raw, func.0) } == 0 {
                return Err(QjsError::type_error("constructor", func.tag().name()));
            }
            let argv = owned_args(inner, args)?;
            defer! { release_args(inner, &argv) }

            // SAFETY: raw is live; JS_CallConstructor borrows its arguments
            let result = Value(unsafe {
                JS_CallConstructor(
                    inner.raw,
                    func.0,
                    argv.len() as c_int,
                    argv.as_ptr() as *mut JSValue,
                )
            });
            let result = inner.check(result)?;
            inner.to_host(&self.context, result, true)
        })
    }

    /// `JSON.stringify`; fails when the value has no JSON form
    pub fn to_json(&self, indent: Option<u32>) -> QjsResult<String> {
        self.try_to_json(indent)?.ok_or_else(|| {
            QjsError::InvalidCast("value has no JSON representation".into())
        })
    }

    /// `JSON.stringify`; `None` when the result is `undefined`
    pub fn try_to_json(&self, indent: Option<u32>) -> QjsResult<Option<String>> {
        self.with(|inner, value| {
            let space = match indent {
                Some(n) => Value::from_i32(n.min(10) as i32),
                None => Value::UNDEFINED,
            };
            // SAFETY: raw is live; stringify borrows its arguments and returns an owned value
            let json = Value(unsafe { JS_JSONStringify(inner.raw, value.0, JS_UNDEFINED, space.0) });
            let json = inner.check(json)?;
            if json.is_undefined() {
                return Ok(None);
            }
            let text = inner.string_of(json);
            inner.free(json);
            text.map(Some)
        })
    }

    /// Attach host data to a class instance
    ///
    /// # Safety
    /// The object must be an instance of a host class; the pointer is not
    /// managed and must stay valid for as long as the class hooks may read it.
    pub unsafe fn set_opaque(&self, data: *mut c_void) -> QjsResult<()> {
        self.with_object(|_, obj| {
            // SAFETY: forwarded caller contract
            unsafe { JS_SetOpaque(obj.0, data) };
            Ok(())
        })
    }

    /// Host data attached with [`QjsValue::set_opaque`]; null if the class does not match
    pub fn opaque(&self, class_id: u32) -> QjsResult<*mut c_void> {
        // SAFETY: the object is live; JS_GetOpaque checks the class id
        self.with(|_, value| Ok(unsafe { JS_GetOpaque(value.0, class_id) }))
    }

    /// Release the reference now; later operations fail with [`QjsError::Disposed`]
    pub fn release(&mut self) {
        if !self.released {
            self.released = true;
            self.context.release(self.id);
        }
    }
}

/// Convert host arguments into owned engine values; releases what it made on failure
fn owned_args(inner: &ContextInner, args: &[HostValue]) -> QjsResult<Vec<Value>> {
    let mut argv = Vec::with_capacity(args.len());
    for arg in args {
        match inner.from_host(arg) {
            Ok(value) => argv.push(value),
            Err(e) => {
                release_args(inner, &argv);
                return Err(e);
            }
        }
    }
    Ok(argv)
}

fn release_args(inner: &ContextInner, argv: &[Value]) {
    for value in argv {
        inner.free(*value);
    }
}

impl Drop for QjsValue {
    fn drop(&mut self) {
        self.release();
    }
}

/// Live wrappers compare by native pointer; once released (or its context
/// is gone) a wrapper equals only itself, since the address may be reused
impl PartialEq for QjsValue {
    fn eq(&self, other: &Self) -> bool {
        if self.is_stale() || other.is_stale() {
            return std::ptr::eq(self, other);
        }
        self.identity == other.identity
    }
}

impl Eq for QjsValue {}

impl Hash for QjsValue {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.identity.hash(state);
    }
}

impl fmt::Debug for QjsValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QjsValue")
            .field("context", &self.context.serial())
            .field("id", &self.id)
            .field("tag", &Tag::from_raw(self.identity.0))
            .field("released", &self.released)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{EvalFlags, QjsRuntime};
    use std::collections::HashSet;

    fn eval_handle(ctx: &QjsContext, code: &str) -> QjsValue {
        ctx.eval(code, "<test>", EvalFlags::GLOBAL)
            .unwrap()
            .into_handle()
            .unwrap()
    }

    #[test]
    fn test_wrapper_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<QjsValue>();
    }

    #[test]
    fn test_properties() {
        let runtime = QjsRuntime::new().unwrap();
        let ctx = runtime.create_context().unwrap();
        let obj = ctx.new_object().unwrap();

        obj.set("name", "widget").unwrap();
        obj.set("count", 3).unwrap();
        assert_eq!(obj.get("name").unwrap(), HostValue::from("widget"));
        assert_eq!(obj.get("count").unwrap(), HostValue::Int(3));
        assert!(obj.get("missing").unwrap().is_undefined());

        assert!(obj.has_property("name").unwrap());
        assert!(obj.delete_property("name").unwrap());
        assert!(!obj.has_property("name").unwrap());

        let names = obj.own_property_names(PropertyNameFlags::default()).unwrap();
        assert_eq!(names, vec!["count".to_string()]);
    }

    #[test]
    fn test_define_property_flags() {
        let runtime = QjsRuntime::new().unwrap();
        let ctx = runtime.create_context().unwrap();
        let obj = ctx.new_object().unwrap();
        obj.define_property("fixed", 1, PropertyFlags::NONE).unwrap();
        ctx.global().unwrap().set("o", obj.dup().unwrap()).unwrap();

        let result = ctx
            .eval("o.fixed = 2; Object.keys(o).length", "", EvalFlags::GLOBAL)
            .unwrap();
        assert_eq!(result, HostValue::Int(0));
        assert_eq!(obj.get("fixed").unwrap(), HostValue::Int(1));
    }

    #[test]
    fn test_define_accessor() {
        let runtime = QjsRuntime::new().unwrap();
        let ctx = runtime.create_context().unwrap();
        let obj = ctx.new_object().unwrap();
        let getter = ctx
            .create_function("get", 0, |_, _| Ok(HostValue::Int(99)))
            .unwrap();
        obj.define_accessor("answer", Some(&getter), None, PropertyFlags::CONFIGURABLE)
            .unwrap();
        assert_eq!(obj.get("answer").unwrap(), HostValue::Int(99));
    }

    #[test]
    fn test_arrays_by_index() {
        let runtime = QjsRuntime::new().unwrap();
        let ctx = runtime.create_context().unwrap();
        let array = ctx.new_array().unwrap();
        array.set_index(0, "a").unwrap();
        array.set_index(2, 2.5).unwrap();
        assert!(array.is_array().unwrap());
        assert_eq!(array.get("length").unwrap(), HostValue::Int(3));
        assert!(array.get_index(1).unwrap().is_undefined());
        assert_eq!(array.get_index(2).unwrap(), HostValue::Float(2.5));
        assert_eq!(array.to_json(None).unwrap(), r#"["a",null,2.5]"#);
    }

    #[test]
    fn test_call_and_construct() {
        let runtime = QjsRuntime::new().unwrap();
        let ctx = runtime.create_context().unwrap();
        let add = eval_handle(&ctx, "(function (a, b) { return a + b; })");
        assert!(add.is_function().unwrap());
        assert_eq!(
            add.call(&[HostValue::Int(2), HostValue::Int(40)]).unwrap(),
            HostValue::Int(42)
        );

        let who = eval_handle(&ctx, "(function () { return this.tag; })");
        let this = ctx.new_object().unwrap();
        this.set("tag", "me").unwrap();
        assert_eq!(
            who.call_with_this(&HostValue::Handle(this), &[]).unwrap(),
            HostValue::from("me")
        );

        let point = eval_handle(&ctx, "(class Point { constructor(x) { this.x = x; } })");
        let instance = point
            .call_constructor(&[HostValue::Int(5)])
            .unwrap()
            .into_handle()
            .unwrap();
        assert_eq!(instance.get("x").unwrap(), HostValue::Int(5));

        let not_callable = ctx.new_object().unwrap();
        assert!(matches!(
            not_callable.call(&[]),
            Err(QjsError::TypeError { .. })
        ));
    }

    #[test]
    fn test_is_error() {
        let runtime = QjsRuntime::new().unwrap();
        let ctx = runtime.create_context().unwrap();
        let err = eval_handle(&ctx, "new TypeError('x')");
        assert!(err.is_error().unwrap());
        assert!(!ctx.new_object().unwrap().is_error().unwrap());
    }

    #[test]
    fn test_try_to_json() {
        let runtime = QjsRuntime::new().unwrap();
        let ctx = runtime.create_context().unwrap();
        let func = eval_handle(&ctx, "(function () {})");
        assert_eq!(func.try_to_json(None).unwrap(), None);
        assert!(matches!(func.to_json(None), Err(QjsError::InvalidCast(_))));

        let obj = eval_handle(&ctx, "({a: 1})");
        assert_eq!(obj.to_json(Some(2)).unwrap(), "{\n  \"a\": 1\n}");
    }

    #[test]
    fn test_release_then_use_fails() {
        let runtime = QjsRuntime::new().unwrap();
        let ctx = runtime.create_context().unwrap();
        let mut obj = ctx.new_object().unwrap();
        assert_eq!(ctx.live_value_count().unwrap(), 1);

        obj.release();
        assert!(obj.is_released());
        assert_eq!(ctx.live_value_count().unwrap(), 0);
        assert!(matches!(obj.get("x"), Err(QjsError::Disposed)));
        assert!(matches!(obj.dup(), Err(QjsError::Disposed)));
        // Second release is a no-op
        obj.release();
    }

    #[test]
    fn test_equality_by_native_pointer() {
        let runtime = QjsRuntime::new().unwrap();
        let ctx = runtime.create_context().unwrap();
        let a = ctx.global().unwrap();
        let b = ctx.global().unwrap();
        let other = ctx.new_object().unwrap();
        assert_eq!(a, b);
        assert_ne!(a, other);

        let set: HashSet<_> = [a, b, other].into_iter().collect();
        assert_eq!(set.len(), 2);
    }

    #[test]
    #[allow(clippy::eq_op)]
    fn test_stale_handles_equal_only_themselves() {
        let runtime = QjsRuntime::new().unwrap();
        let ctx = runtime.create_context().unwrap();
        let live = ctx.global().unwrap();
        let mut released = ctx.global().unwrap();
        assert_eq!(live, released);

        released.release();
        assert_ne!(live, released);
        assert_ne!(released, live);
        assert!(released == released);

        let first = ctx.new_object().unwrap();
        let second = eval_handle(&ctx, "globalThis");
        assert_eq!(live, second);
        ctx.dispose().unwrap();
        // The addresses may be handed out again once the context is gone
        assert_ne!(live, second);
        assert!(first == first);
    }

    #[test]
    fn test_native_value_is_duplicated() {
        let runtime = QjsRuntime::new().unwrap();
        let ctx = runtime.create_context().unwrap();
        let obj = ctx.new_object().unwrap();
        let raw = obj.native_value().unwrap();
        assert!(raw.is_object());
        // SAFETY: raw owns the reference duplicated above
        unsafe { ctx.free_value(raw).unwrap() };
        assert!(obj.set("still", true).is_ok());
    }
}
