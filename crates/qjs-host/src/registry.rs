//! Named script hosts sharing one configuration

use std::collections::HashMap;
use std::path::Path;

use tracing::debug;

use crate::config::HostConfig;
use crate::error::{HostError, HostResult};
use crate::host::JsHost;

/// Hosts keyed by name
///
/// Hosts are bound to the thread that created them, and so is the registry.
#[derive(Debug, Default)]
pub struct HostRegistry {
    config: HostConfig,
    hosts: HashMap<String, JsHost>,
}

impl HostRegistry {
    pub fn new(config: HostConfig) -> Self {
        Self {
            config,
            hosts: HashMap::new(),
        }
    }

    /// Create and initialize a host from `file`
    ///
    /// Nothing is stored when the key is taken or the script fails to load.
    pub fn create(&mut self, key: &str, file: impl AsRef<Path>) -> HostResult<&mut JsHost> {
        if self.hosts.contains_key(key) {
            return Err(HostError::DuplicateKey(key.to_string()));
        }
        let mut host = JsHost::new(self.config.clone());
        host.init(file)?;
        debug!(key, "script host registered");
        Ok(self.hosts.entry(key.to_string()).or_insert(host))
    }

    pub fn get(&mut self, key: &str) -> Option<&mut JsHost> {
        self.hosts.get_mut(key)
    }

    pub fn get_or_create(&mut self, key: &str, file: impl AsRef<Path>) -> HostResult<&mut JsHost> {
        if !self.hosts.contains_key(key) {
            return self.create(key, file);
        }
        self.hosts
            .get_mut(key)
            .ok_or_else(|| HostError::DuplicateKey(key.to_string()))
    }

    pub fn remove(&mut self, key: &str) -> Option<JsHost> {
        self.hosts.remove(key)
    }

    pub fn len(&self) -> usize {
        self.hosts.len()
    }

    pub fn is_empty(&self) -> bool {
        self.hosts.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::HostArg;

    fn script(dir: &tempfile::TempDir, name: &str, code: &str) -> std::path::PathBuf {
        let path = dir.path().join(name);
        std::fs::write(&path, code).unwrap();
        path
    }

    #[test]
    fn test_create_and_get() {
        let dir = tempfile::tempdir().unwrap();
        let file = script(&dir, "square.js", "function main(n) { return n * n; }");
        let mut registry = HostRegistry::default();

        registry.create("square", &file).unwrap();
        assert!(matches!(
            registry.create("square", &file),
            Err(HostError::DuplicateKey(_))
        ));
        let host = registry.get("square").unwrap();
        assert_eq!(host.call_global("main", &[HostArg::Int(2)]).unwrap(), serde_json::json!(4));
        assert!(registry.get("other").is_none());
    }

    #[test]
    fn test_get_or_create_reuses_host() {
        let dir = tempfile::tempdir().unwrap();
        let file = script(&dir, "counter.js", "var n = 0; function next() { return ++n; }");
        let mut registry = HostRegistry::default();

        let first = registry.get_or_create("counter", &file).unwrap();
        assert_eq!(first.call_global("next", &[]).unwrap(), serde_json::json!(1));
        let again = registry.get_or_create("counter", &file).unwrap();
        assert_eq!(again.call_global("next", &[]).unwrap(), serde_json::json!(2));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_failed_create_stores_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let mut registry = HostRegistry::default();
        let err = registry
            .create("missing", dir.path().join("missing.js"))
            .unwrap_err();
        assert!(matches!(err, HostError::Io { .. }));
        assert!(registry.is_empty());
    }

    #[test]
    fn test_remove() {
        let dir = tempfile::tempdir().unwrap();
        let file = script(&dir, "noop.js", "");
        let mut registry = HostRegistry::new(HostConfig::default());
        registry.create("noop", &file).unwrap();
        let host = registry.remove("noop").unwrap();
        assert!(host.is_initialized());
        assert!(registry.is_empty());
    }
}
