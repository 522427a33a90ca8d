//! Host configuration, loadable from TOML

use std::path::Path;
use std::time::Duration;

use qjs_core::RuntimeConfig;
use serde::Deserialize;

use crate::error::{HostError, HostResult};

/// How a call result is turned into JSON
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultMode {
    /// Primitives as JSON scalars, objects through `JSON.stringify`
    #[default]
    Value,
    /// A string result is JSON text and is parsed
    JsonParse,
    /// Only primitives; objects and functions are rejected
    SingleValue,
    /// Any result is stringified and returned as a JSON string
    AsJson,
}

/// Script host settings
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct HostConfig {
    /// Engine heap and stack limits
    pub runtime: RuntimeConfig,

    /// Wall-clock budget for each init, append and call
    pub timeout_ms: Option<u64>,

    /// Full standard library; when false only base objects, eval and JSON are installed
    pub intrinsics: bool,

    /// Run a full collection after every call
    pub collect_after_call: bool,

    pub result_mode: ResultMode,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            runtime: RuntimeConfig::default(),
            timeout_ms: None,
            intrinsics: true,
            collect_after_call: false,
            result_mode: ResultMode::Value,
        }
    }
}

impl HostConfig {
    pub fn from_toml_str(text: &str) -> HostResult<Self> {
        Ok(toml::from_str(text)?)
    }

    pub fn load(path: &Path) -> HostResult<Self> {
        let text = std::fs::read_to_string(path).map_err(|source| HostError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Zero means no timeout
    pub fn timeout(&self) -> Option<Duration> {
        self.timeout_ms
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout_ms = Some(timeout.as_millis() as u64);
        self
    }

    pub fn with_result_mode(mut self, mode: ResultMode) -> Self {
        self.result_mode = mode;
        self
    }
}
