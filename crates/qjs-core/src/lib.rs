//! Safe wrappers for QuickJS.
//!
//! This crate provides RAII-based, thread-checked wrappers around the raw
//! engine bindings in qjs-sys: runtimes and contexts, tracked value
//! handles, host functions, and native classes with exotic property traps.
//!
//! # Example
//!
//! ```
//! use qjs_core::{EvalFlags, HostValue, QjsRuntime};
//!
//! let runtime = QjsRuntime::new().unwrap();
//! let ctx = runtime.create_context().unwrap();
//! let result = ctx.eval("1 + 1", "<eval>", EvalFlags::GLOBAL).unwrap();
//! assert_eq!(result, HostValue::Int(2));
//! ```
//!
//! # Thread Safety
//!
//! A runtime is bound to the thread that created it. [`QjsRuntime`] and
//! [`QjsContext`] are `!Send`, and every operation that reaches the engine
//! also checks the calling thread at run time.
//!
//! [`QjsValue`] handles are `Send` so that they can be dropped anywhere.
//! Dropping one off the owning thread only queues its release; the queue is
//! drained on the next interrupt tick or by
//! [`QjsContext::drain_pending_releases`].
//!
//! ## Example: Wrong (won't compile)
//!
//! ```compile_fail
//! use qjs_core::{EvalFlags, QjsRuntime};
//! use std::thread;
//!
//! let runtime = QjsRuntime::new().unwrap();
//! let ctx = runtime.create_context().unwrap();
//! thread::spawn(move || {
//!     ctx.eval("1 + 1", "<eval>", EvalFlags::GLOBAL); // Error: QjsContext is !Send
//! });
//! ```
//!
//! ## Example: Correct
//!
//! ```
//! use qjs_core::{EvalFlags, QjsRuntime};
//! use std::thread;
//!
//! let runtime = QjsRuntime::new().unwrap();
//! let ctx = runtime.create_context().unwrap();
//! let obj = ctx.eval("({})", "<eval>", EvalFlags::GLOBAL).unwrap();
//! thread::spawn(move || drop(obj)).join().unwrap(); // queued, not freed
//! assert_eq!(ctx.drain_pending_releases().unwrap(), 1);
//! ```

mod affinity;
mod atom;
mod class;
mod context;
mod convert;
mod error;
mod exotic;
mod flags;
mod handle;
mod runtime;
mod trampoline;
mod value;

pub use class::{ClassDefinition, ClassId, ClassInstance, Marker};
pub use context::QjsContext;
pub use convert::HostValue;
pub use error::{QjsError, QjsResult};
pub use exotic::{ExoticTraps, PropertyDefinition, PropertyDescriptor, PropertyName};
pub use flags::{EvalFlags, Intrinsic, PropertyFlags, PropertyNameFlags};
pub use handle::QjsValue;
pub use runtime::{
    DEFAULT_GC_THRESHOLD, DEFAULT_STACK_SIZE, InterruptAction, InterruptHandle, InterruptHandlerId,
    MemoryUsage, QjsRuntime, RuntimeConfig,
};
pub use trampoline::Arguments;
pub use value::{Tag, Value};

// Re-export qjs-sys for direct FFI access when needed
pub use qjs_sys;
