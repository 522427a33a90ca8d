//! Script host for plugins.
//!
//! A [`JsHost`] loads one script into its own QuickJS runtime, drains the
//! jobs the script queued, and then serves calls to the script's global
//! functions. Arguments are primitives ([`HostArg`]); results come back as
//! `serde_json::Value`, shaped by the configured [`ResultMode`].
//!
//! Timeouts are enforced through the engine's interrupt handler: each
//! init, append and call gets the configured wall-clock budget and fails
//! with [`HostError::Timeout`] when it runs past it.
//!
//! # Example
//!
//! ```
//! use qjs_host::{HostArg, HostConfig, JsHost};
//!
//! let mut host = JsHost::new(HostConfig::default());
//! host.init_from_source("function main(n) { return { square: n * n }; }", None)
//!     .unwrap();
//! let result = host.call_global("main", &[HostArg::Int(7)]).unwrap();
//! assert_eq!(result, serde_json::json!({ "square": 49 }));
//! ```

mod arg;
mod config;
mod error;
mod host;
mod registry;

pub use arg::HostArg;
pub use config::{HostConfig, ResultMode};
pub use error::{HostError, HostResult};
pub use host::JsHost;
pub use registry::HostRegistry;

// Engine types that appear in the host API
pub use qjs_core::{QjsContext, QjsError, QjsRuntime, RuntimeConfig};
