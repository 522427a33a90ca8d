//! Configuration file parsing for qjs.toml.

use qjs_host::HostConfig;
use serde::Deserialize;
use std::path::{Path, PathBuf};

/// Config file names to search for, in order
const CONFIG_NAMES: &[&str] = &["qjs.toml", ".qjsrc.toml"];

/// Main configuration structure.
#[derive(Debug, Default, Deserialize)]
pub struct Config {
    /// Script host settings (timeout, limits, result shape)
    #[serde(default)]
    pub host: HostConfig,

    /// Logging settings
    #[serde(default)]
    pub log: LogConfig,
}

/// Logging configuration.
#[derive(Debug, Deserialize)]
pub struct LogConfig {
    /// Filter used when RUST_LOG is not set
    #[serde(default = "default_level")]
    pub level: String,
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_level(),
        }
    }
}

fn default_level() -> String {
    "warn".to_string()
}

/// Load configuration from a file or search for default config files.
///
/// An explicitly given path must exist; a searched one is optional.
pub fn load_config(path: Option<&Path>) -> anyhow::Result<Config> {
    let config_path = match path {
        Some(path) if !path.exists() => {
            anyhow::bail!("Config file not found: {}", path.display())
        }
        Some(path) => Some(path.to_path_buf()),
        None => std::env::current_dir()
            .ok()
            .and_then(|cwd| find_config_file(&cwd)),
    };

    match config_path {
        Some(path) => {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = toml::from_str(&content)
                .map_err(|e| anyhow::anyhow!("Failed to parse {}: {}", path.display(), e))?;
            Ok(config)
        }
        None => Ok(Config::default()),
    }
}

/// Search for a configuration file in `start` and its parent directories.
pub fn find_config_file(start: &Path) -> Option<PathBuf> {
    let mut dir = Some(start);
    while let Some(current) = dir {
        for name in CONFIG_NAMES {
            let path = current.join(name);
            if path.exists() {
                return Some(path);
            }
        }
        dir = current.parent();
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;
    use qjs_host::ResultMode;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.log.level, "warn");
        assert_eq!(config.host, HostConfig::default());
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[log]
level = "qjs_core=debug"

[host]
timeout_ms = 2000
result_mode = "single_value"

[host.runtime]
memory_limit = 16777216
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.log.level, "qjs_core=debug");
        assert_eq!(config.host.timeout_ms, Some(2000));
        assert_eq!(config.host.result_mode, ResultMode::SingleValue);
        assert_eq!(config.host.runtime.memory_limit, 16 * 1024 * 1024);
    }

    #[test]
    fn test_find_config_in_parent() {
        let dir = tempfile::tempdir().unwrap();
        let nested = dir.path().join("a").join("b");
        std::fs::create_dir_all(&nested).unwrap();
        std::fs::write(dir.path().join("qjs.toml"), "[log]\nlevel = \"info\"\n").unwrap();

        let found = find_config_file(&nested).unwrap();
        assert_eq!(found, dir.path().join("qjs.toml"));

        let config = load_config(Some(&found)).unwrap();
        assert_eq!(config.log.level, "info");
    }

    #[test]
    fn test_explicit_missing_config_fails() {
        let dir = tempfile::tempdir().unwrap();
        assert!(load_config(Some(&dir.path().join("absent.toml"))).is_err());
    }
}
