//! Exotic objects: property access intercepted by host traps
//!
//! Each trap is optional. A class with a `get_property` trap but no
//! `has_property` trap, for instance, still answers `in` through the
//! engine's ordinary lookup.

use std::ffi::c_void;
use std::mem;
use std::os::raw::c_int;
use std::ptr;

use qjs_sys::*;

use crate::class::{ClassEntry, ClassInstance, entry_for};
use crate::context::QjsContext;
use crate::convert::HostValue;
use crate::error::{QjsError, QjsResult};
use crate::flags::PropertyFlags;
use crate::trampoline::{guard_int, guard_value};
use crate::value::Value;

/// Own-property answer from a `get_own_property` trap
#[derive(Debug)]
pub struct PropertyDescriptor {
    pub value: HostValue,
    /// Only the configurable/writable/enumerable bits are used
    pub flags: PropertyFlags,
}

impl PropertyDescriptor {
    pub fn new(value: impl Into<HostValue>, flags: PropertyFlags) -> Self {
        Self {
            value: value.into(),
            flags,
        }
    }
}

/// One key reported by a `get_own_property_names` trap
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PropertyName {
    pub name: String,
    pub enumerable: bool,
}

impl PropertyName {
    pub fn enumerable(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enumerable: true,
        }
    }

    pub fn hidden(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            enumerable: false,
        }
    }
}

/// Arguments of a `define_own_property` trap
///
/// Which parts are present follows the `HAS_*` bits in `flags`.
#[derive(Debug)]
pub struct PropertyDefinition {
    pub value: Option<HostValue>,
    pub getter: Option<HostValue>,
    pub setter: Option<HostValue>,
    pub flags: PropertyFlags,
}

type GetOwnPropertyTrap =
    dyn Fn(&QjsContext, &ClassInstance, &str) -> QjsResult<Option<PropertyDescriptor>>;
type OwnPropertyNamesTrap = dyn Fn(&QjsContext, &ClassInstance) -> QjsResult<Vec<PropertyName>>;
type NameTrap = dyn Fn(&QjsContext, &ClassInstance, &str) -> QjsResult<bool>;
type DefineTrap = dyn Fn(&QjsContext, &ClassInstance, &str, &PropertyDefinition) -> QjsResult<bool>;
type GetTrap = dyn Fn(&QjsContext, &ClassInstance, &str, Value) -> QjsResult<HostValue>;
type SetTrap =
    dyn Fn(&QjsContext, &ClassInstance, &str, HostValue, Value, PropertyFlags) -> QjsResult<bool>;

/// Property traps for an exotic class
#[derive(Default)]
pub struct ExoticTraps {
    get_own_property: Option<Box<GetOwnPropertyTrap>>,
    get_own_property_names: Option<Box<OwnPropertyNamesTrap>>,
    delete_property: Option<Box<NameTrap>>,
    define_own_property: Option<Box<DefineTrap>>,
    has_property: Option<Box<NameTrap>>,
    get_property: Option<Box<GetTrap>>,
    set_property: Option<Box<SetTrap>>,
}

impl ExoticTraps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get_own_property<F>(mut self, trap: F) -> Self
    where
        F: Fn(&QjsContext, &ClassInstance, &str) -> QjsResult<Option<PropertyDescriptor>> + 'static,
    {
        self.get_own_property = Some(Box::new(trap));
        self
    }

    pub fn get_own_property_names<F>(mut self, trap: F) -> Self
    where
        F: Fn(&QjsContext, &ClassInstance) -> QjsResult<Vec<PropertyName>> + 'static,
    {
        self.get_own_property_names = Some(Box::new(trap));
        self
    }

    pub fn delete_property<F>(mut self, trap: F) -> Self
    where
        F: Fn(&QjsContext, &ClassInstance, &str) -> QjsResult<bool> + 'static,
    {
        self.delete_property = Some(Box::new(trap));
        self
    }

    pub fn define_own_property<F>(mut self, trap: F) -> Self
    where
        F: Fn(&QjsContext, &ClassInstance, &str, &PropertyDefinition) -> QjsResult<bool> + 'static,
    {
        self.define_own_property = Some(Box::new(trap));
        self
    }

    pub fn has_property<F>(mut self, trap: F) -> Self
    where
        F: Fn(&QjsContext, &ClassInstance, &str) -> QjsResult<bool> + 'static,
    {
        self.has_property = Some(Box::new(trap));
        self
    }

    /// `receiver` is the `this` of the access (the instance itself unless
    /// the lookup came through `Reflect.get` or a prototype chain); it is
    /// borrowed for the duration of the trap
    pub fn get_property<F>(mut self, trap: F) -> Self
    where
        F: Fn(&QjsContext, &ClassInstance, &str, Value) -> QjsResult<HostValue> + 'static,
    {
        self.get_property = Some(Box::new(trap));
        self
    }

    /// Receives the assigned value, the borrowed receiver and the engine's
    /// `THROW`/`THROW_STRICT` bits. Returning `false` reports a rejected
    /// assignment (`Reflect.set` yields `false`); the engine raises nothing
    /// on its own, so a trap that honours the bits returns an error instead
    pub fn set_property<F>(mut self, trap: F) -> Self
    where
        F: Fn(&QjsContext, &ClassInstance, &str, HostValue, Value, PropertyFlags) -> QjsResult<bool>
            + 'static,
    {
        self.set_property = Some(Box::new(trap));
        self
    }

    /// Engine method table with a trampoline for each trap present
    pub(crate) fn native_methods(&self) -> JSClassExoticMethods {
        let mut methods = JSClassExoticMethods::default();
        if self.get_own_property.is_some() {
            methods.get_own_property = Some(get_own_property_trampoline);
        }
        if self.get_own_property_names.is_some() {
            methods.get_own_property_names = Some(get_own_property_names_trampoline);
        }
        if self.delete_property.is_some() {
            methods.delete_property = Some(delete_property_trampoline);
        }
        if self.define_own_property.is_some() {
            methods.define_own_property = Some(define_own_property_trampoline);
        }
        if self.has_property.is_some() {
            methods.has_property = Some(has_property_trampoline);
        }
        if self.get_property.is_some() {
            methods.get_property = Some(get_property_trampoline);
        }
        if self.set_property.is_some() {
            methods.set_property = Some(set_property_trampoline);
        }
        methods
    }
}

impl std::fmt::Debug for ExoticTraps {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExoticTraps")
            .field("get_own_property", &self.get_own_property.is_some())
            .field("get_own_property_names", &self.get_own_property_names.is_some())
            .field("delete_property", &self.delete_property.is_some())
            .field("define_own_property", &self.define_own_property.is_some())
            .field("has_property", &self.has_property.is_some())
            .field("get_property", &self.get_property.is_some())
            .field("set_property", &self.set_property.is_some())
            .finish()
    }
}

/// Everything a trap invocation needs
struct TrapCall {
    context: QjsContext,
    entry: std::rc::Rc<ClassEntry>,
    instance: ClassInstance,
}

impl TrapCall {
    /// # Safety
    /// `ctx` must be live and `obj` a live instance of one of our classes.
    unsafe fn new(ctx: *mut JSContext, obj: JSValue) -> QjsResult<Self> {
        // SAFETY: forwarded caller contract
        let context = unsafe { QjsContext::from_raw(ctx) }
            .ok_or_else(|| QjsError::internal("trap called in an unmanaged context"))?;
        // SAFETY: forwarded caller contract
        let entry = unsafe { entry_for(JS_GetRuntime(ctx), Value(obj)) }?;
        let instance = ClassInstance::new(Value(obj), entry.id());
        Ok(Self {
            context,
            entry,
            instance,
        })
    }

    fn traps(&self) -> QjsResult<&ExoticTraps> {
        self.entry
            .exotic()
            .ok_or_else(|| QjsError::internal("class has no exotic traps"))
    }

    fn name(&self, atom: JSAtom) -> QjsResult<String> {
        self.context.enter()?.atom_name(atom)
    }

    /// Borrowed engine value to host value
    fn host(&self, value: JSValue) -> QjsResult<HostValue> {
        self.context.convert_to_host(Value(value), false)
    }
}

fn missing_trap(name: &str) -> QjsError {
    QjsError::internal(format!("exotic trap {} is not installed", name))
}

unsafe extern "C" fn get_own_property_trampoline(
    ctx: *mut JSContext,
    desc: *mut JSPropertyDescriptor,
    obj: JSValue,
    prop: JSAtom,
) -> c_int {
    guard_int(ctx, || {
        // SAFETY: the engine calls traps with a live context and object
        let call = unsafe { TrapCall::new(ctx, obj) }?;
        let trap = call
            .traps()?
            .get_own_property
            .as_ref()
            .ok_or_else(|| missing_trap("get_own_property"))?;
        let name = call.name(prop)?;
        let Some(found) = trap(&call.context, &call.instance, &name)? else {
            return Ok(0);
        };
        if !desc.is_null() {
            let value = call.context.convert_from_host(&found.value)?;
            // SAFETY: desc points at a writable descriptor; the engine takes ownership of value
            unsafe {
                *desc = JSPropertyDescriptor {
                    flags: found.flags.bits() & JS_PROP_C_W_E,
                    value: value.0,
                    getter: JS_UNDEFINED,
                    setter: JS_UNDEFINED,
                };
            }
        }
        Ok(1)
    })
}

unsafe extern "C" fn get_own_property_names_trampoline(
    ctx: *mut JSContext,
    ptab: *mut *mut JSPropertyEnum,
    plen: *mut u32,
    obj: JSValue,
) -> c_int {
    guard_int(ctx, || {
        // SAFETY: the engine calls traps with a live context and object
        let call = unsafe { TrapCall::new(ctx, obj) }?;
        let trap = call
            .traps()?
            .get_own_property_names
            .as_ref()
            .ok_or_else(|| missing_trap("get_own_property_names"))?;
        let names = trap(&call.context, &call.instance)?;
        // SAFETY: ptab and plen are the engine's out-parameters
        unsafe { fill_property_table(ctx, &names, ptab, plen) }
    })
}

/// Build an engine-owned property table; on failure everything made here is freed
unsafe fn fill_property_table(
    ctx: *mut JSContext,
    names: &[PropertyName],
    ptab: *mut *mut JSPropertyEnum,
    plen: *mut u32,
) -> QjsResult<c_int> {
    let len = u32::try_from(names.len())
        .map_err(|_| QjsError::out_of_range("property count", names.len() as u64))?;
    // SAFETY: out-parameters are valid per caller contract
    unsafe {
        *ptab = ptr::null_mut();
        *plen = 0;
    }
    if names.is_empty() {
        return Ok(0);
    }

    // SAFETY: ctx is live; the engine frees this table with js_free
    let tab = unsafe { js_malloc(ctx, mem::size_of::<JSPropertyEnum>() * names.len()) }
        as *mut JSPropertyEnum;
    if tab.is_null() {
        return Err(QjsError::OutOfMemory);
    }

    for (i, name) in names.iter().enumerate() {
        // SAFETY: ctx is live; the pointer/length pair describes the name
        let atom = unsafe {
            JS_NewAtomLen(ctx, name.name.as_ptr() as *const std::os::raw::c_char, name.name.len())
        };
        if atom == JS_ATOM_NULL {
            // SAFETY: entries 0..i hold atoms created above
            unsafe {
                for j in 0..i {
                    JS_FreeAtom(ctx, (*tab.add(j)).atom);
                }
                js_free(ctx, tab as *mut c_void);
            }
            return Err(QjsError::OutOfMemory);
        }
        // SAFETY: i < names.len(), within the allocation
        unsafe {
            tab.add(i).write(JSPropertyEnum {
                is_enumerable: name.enumerable as c_int,
                atom,
            });
        }
    }

    // SAFETY: out-parameters are valid per caller contract
    unsafe {
        *ptab = tab;
        *plen = len;
    }
    Ok(0)
}

unsafe extern "C" fn delete_property_trampoline(
    ctx: *mut JSContext,
    obj: JSValue,
    prop: JSAtom,
) -> c_int {
    guard_int(ctx, || {
        // SAFETY: the engine calls traps with a live context and object
        let call = unsafe { TrapCall::new(ctx, obj) }?;
        let trap = call
            .traps()?
            .delete_property
            .as_ref()
            .ok_or_else(|| missing_trap("delete_property"))?;
        let name = call.name(prop)?;
        Ok(trap(&call.context, &call.instance, &name)? as c_int)
    })
}

unsafe extern "C" fn define_own_property_trampoline(
    ctx: *mut JSContext,
    this_obj: JSValue,
    prop: JSAtom,
    val: JSValue,
    getter: JSValue,
    setter: JSValue,
    flags: c_int,
) -> c_int {
    guard_int(ctx, || {
        // SAFETY: the engine calls traps with a live context and object
        let call = unsafe { TrapCall::new(ctx, this_obj) }?;
        let trap = call
            .traps()?
            .define_own_property
            .as_ref()
            .ok_or_else(|| missing_trap("define_own_property"))?;
        let name = call.name(prop)?;
        let present = |bit: c_int, value: JSValue| -> QjsResult<Option<HostValue>> {
            if flags & bit != 0 {
                call.host(value).map(Some)
            } else {
                Ok(None)
            }
        };
        let definition = PropertyDefinition {
            value: present(JS_PROP_HAS_VALUE, val)?,
            getter: present(JS_PROP_HAS_GET, getter)?,
            setter: present(JS_PROP_HAS_SET, setter)?,
            flags: PropertyFlags::from_bits(flags),
        };
        Ok(trap(&call.context, &call.instance, &name, &definition)? as c_int)
    })
}

unsafe extern "C" fn has_property_trampoline(
    ctx: *mut JSContext,
    obj: JSValue,
    atom: JSAtom,
) -> c_int {
    guard_int(ctx, || {
        // SAFETY: the engine calls traps with a live context and object
        let call = unsafe { TrapCall::new(ctx, obj) }?;
        let trap = call
            .traps()?
            .has_property
            .as_ref()
            .ok_or_else(|| missing_trap("has_property"))?;
        let name = call.name(atom)?;
        Ok(trap(&call.context, &call.instance, &name)? as c_int)
    })
}

unsafe extern "C" fn get_property_trampoline(
    ctx: *mut JSContext,
    obj: JSValue,
    atom: JSAtom,
    receiver: JSValue,
) -> JSValue {
    guard_value(ctx, || {
        // SAFETY: the engine calls traps with a live context and object
        let call = unsafe { TrapCall::new(ctx, obj) }?;
        let trap = call
            .traps()?
            .get_property
            .as_ref()
            .ok_or_else(|| missing_trap("get_property"))?;
        let name = call.name(atom)?;
        let result = trap(&call.context, &call.instance, &name, Value(receiver))?;
        call.context.convert_from_host(&result)
    })
}

unsafe extern "C" fn set_property_trampoline(
    ctx: *mut JSContext,
    obj: JSValue,
    atom: JSAtom,
    value: JSValue,
    receiver: JSValue,
    flags: c_int,
) -> c_int {
    guard_int(ctx, || {
        // SAFETY: the engine calls traps with a live context and object
        let call = unsafe { TrapCall::new(ctx, obj) }?;
        let trap = call
            .traps()?
            .set_property
            .as_ref()
            .ok_or_else(|| missing_trap("set_property"))?;
        let name = call.name(atom)?;
        let value = call.host(value)?;
        let accepted = trap(
            &call.context,
            &call.instance,
            &name,
            value,
            Value(receiver),
            PropertyFlags::from_bits(flags),
        )?;
        Ok(accepted as c_int)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{ClassDefinition, EvalFlags, QjsRuntime};
    use std::cell::RefCell;
    use std::collections::BTreeMap;
    use std::rc::Rc;

    fn eval(ctx: &QjsContext, code: &str) -> QjsResult<HostValue> {
        ctx.eval(code, "<test>", EvalFlags::GLOBAL)
    }

    #[test]
    fn test_native_methods_follow_installed_traps() {
        let traps = ExoticTraps::new().get_property(|_, _, _, _| Ok(HostValue::Null));
        let methods = traps.native_methods();
        assert!(methods.get_property.is_some());
        assert!(methods.set_property.is_none());
        assert!(methods.get_own_property.is_none());
    }

    #[test]
    fn test_get_property_trap() {
        let runtime = QjsRuntime::new().unwrap();
        let id = runtime.new_class_id().unwrap();
        runtime
            .register_class(
                id.get(),
                ClassDefinition::new("Echo").exotic(
                    ExoticTraps::new()
                        .get_property(|_, _, name, _| Ok(HostValue::from(name.to_uppercase()))),
                ),
            )
            .unwrap();
        let ctx = runtime.create_context().unwrap();
        let obj = ctx.new_object_of_class(id.get()).unwrap();
        ctx.global().unwrap().set("echo", obj).unwrap();
        assert_eq!(eval(&ctx, "echo.hello").unwrap(), HostValue::from("HELLO"));
        assert_eq!(eval(&ctx, "echo['a b']").unwrap(), HostValue::from("A B"));
    }

    #[test]
    fn test_traps_see_receiver_and_flags() {
        let runtime = QjsRuntime::new().unwrap();
        let id = runtime.new_class_id().unwrap().get();
        let seen = Rc::new(RefCell::new(Vec::new()));
        let (gets, sets) = (Rc::clone(&seen), Rc::clone(&seen));
        let traps = ExoticTraps::new()
            .get_property(move |_, instance, name, receiver| {
                gets.borrow_mut()
                    .push((name.to_string(), receiver == instance.value(), PropertyFlags::NONE));
                Ok(HostValue::Int(1))
            })
            .set_property(move |_, instance, name, _, receiver, flags| {
                sets.borrow_mut()
                    .push((name.to_string(), receiver == instance.value(), flags));
                Ok(false)
            });
        runtime
            .register_class(id, ClassDefinition::new("Watched").exotic(traps))
            .unwrap();
        let ctx = runtime.create_context().unwrap();
        let obj = ctx.new_object_of_class(id).unwrap();
        ctx.global().unwrap().set("target", obj).unwrap();

        eval(&ctx, "target.a; Reflect.get(target, 'b', {})").unwrap();
        assert_eq!(
            eval(&ctx, "Reflect.set(target, 'c', 1, {})").unwrap(),
            HostValue::Bool(false)
        );
        eval(&ctx, "target.d = 1").unwrap();

        let seen = seen.borrow();
        let names: Vec<&str> = seen.iter().map(|(name, _, _)| name.as_str()).collect();
        assert_eq!(names, ["a", "b", "c", "d"]);
        assert!(seen[0].1, "plain access passes the instance as receiver");
        assert!(!seen[1].1, "Reflect.get forwards its receiver");
        assert!(!seen[2].1, "Reflect.set forwards its receiver");
        assert!(seen[3].1);
        let reflect_flags = seen[2].2;
        assert!(!reflect_flags.contains(PropertyFlags::THROW));
        assert!(!reflect_flags.contains(PropertyFlags::THROW_STRICT));
        let assign_flags = seen[3].2;
        assert!(
            assign_flags.contains(PropertyFlags::THROW)
                || assign_flags.contains(PropertyFlags::THROW_STRICT)
        );
    }

    /// A map-backed object exercising every trap
    fn register_store(runtime: &QjsRuntime) -> (u32, Rc<RefCell<BTreeMap<String, String>>>) {
        let id = runtime.new_class_id().unwrap().get();
        let store = Rc::new(RefCell::new(BTreeMap::<String, String>::new()));
        let (s1, s2, s3, s4, s5, s6) = (
            Rc::clone(&store),
            Rc::clone(&store),
            Rc::clone(&store),
            Rc::clone(&store),
            Rc::clone(&store),
            Rc::clone(&store),
        );
        let traps = ExoticTraps::new()
            .get_own_property(move |_, _, name| {
                Ok(s1
                    .borrow()
                    .get(name)
                    .map(|v| PropertyDescriptor::new(v.as_str(), PropertyFlags::C_W_E)))
            })
            .get_own_property_names(move |_, _| {
                Ok(s2.borrow().keys().map(PropertyName::enumerable).collect())
            })
            .has_property(move |_, _, name| Ok(s3.borrow().contains_key(name)))
            .delete_property(move |_, _, name| {
                s4.borrow_mut().remove(name);
                Ok(true)
            })
            .set_property(move |_, _, name, value, _, _| {
                let text = match value {
                    HostValue::String(s) => s,
                    other => return Err(QjsError::type_error("string", other.type_name())),
                };
                s5.borrow_mut().insert(name.to_string(), text);
                Ok(true)
            })
            .define_own_property(move |_, _, name, definition| {
                match definition.value.as_ref().and_then(HostValue::as_str) {
                    Some(text) => {
                        s6.borrow_mut().insert(name.to_string(), text.to_string());
                        Ok(true)
                    }
                    None => Ok(false),
                }
            });
        runtime
            .register_class(id, ClassDefinition::new("Store").exotic(traps))
            .unwrap();
        (id, store)
    }

    #[test]
    fn test_store_traps() {
        let runtime = QjsRuntime::new().unwrap();
        let (id, store) = register_store(&runtime);
        let ctx = runtime.create_context().unwrap();
        let obj = ctx.new_object_of_class(id).unwrap();
        ctx.global().unwrap().set("store", obj).unwrap();

        eval(&ctx, "store.b = 'two'; store.a = 'one';").unwrap();
        assert_eq!(store.borrow().len(), 2);
        assert_eq!(eval(&ctx, "'a' in store").unwrap(), HostValue::Bool(true));
        assert_eq!(eval(&ctx, "'zz' in store").unwrap(), HostValue::Bool(false));
        assert_eq!(
            eval(&ctx, "Object.keys(store).join(',')").unwrap(),
            HostValue::from("a,b")
        );
        assert_eq!(
            eval(&ctx, "Object.getOwnPropertyDescriptor(store, 'a').value").unwrap(),
            HostValue::from("one")
        );
        eval(&ctx, "Object.defineProperty(store, 'c', { value: 'three', configurable: true })").unwrap();
        assert_eq!(store.borrow().get("c").map(String::as_str), Some("three"));
        assert_eq!(eval(&ctx, "delete store.a").unwrap(), HostValue::Bool(true));
        assert!(!store.borrow().contains_key("a"));
    }

    #[test]
    fn test_trap_error_reaches_caller() {
        let runtime = QjsRuntime::new().unwrap();
        let (id, _store) = register_store(&runtime);
        let ctx = runtime.create_context().unwrap();
        let obj = ctx.new_object_of_class(id).unwrap();
        ctx.global().unwrap().set("store", obj).unwrap();

        let err = eval(&ctx, "store.n = 5").unwrap_err();
        assert!(matches!(err, QjsError::HostCallback { .. }), "{:?}", err);
        assert_eq!(eval(&ctx, "Object.keys(store).length").unwrap(), HostValue::Int(0));
    }

    #[test]
    fn test_empty_property_table() {
        let runtime = QjsRuntime::new().unwrap();
        let id = runtime.new_class_id().unwrap();
        runtime
            .register_class(
                id.get(),
                ClassDefinition::new("Empty").exotic(
                    ExoticTraps::new()
                        .get_own_property_names(|_, _| Ok(Vec::new()))
                        .get_own_property(|_, _, _| Ok(None)),
                ),
            )
            .unwrap();
        let ctx = runtime.create_context().unwrap();
        let obj = ctx.new_object_of_class(id.get()).unwrap();
        let names = obj
            .own_property_names(crate::PropertyNameFlags::default())
            .unwrap();
        assert!(names.is_empty());
    }
}
