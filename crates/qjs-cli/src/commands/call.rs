//! Call command - load a file and call one of its global functions.

use anyhow::{Context, Result};
use clap::Args;
use qjs_host::{HostArg, HostConfig, JsHost};
use std::path::PathBuf;

use super::print_result;

#[derive(Args)]
pub struct CallCommand {
    /// File defining the function
    pub entry: PathBuf,

    /// Global function to call
    pub function: String,

    /// Arguments: null, true, false, numbers; anything else is passed as a string
    #[arg(trailing_var_arg = true, allow_hyphen_values = true)]
    pub args: Vec<String>,
}

impl CallCommand {
    pub fn run(&self, config: HostConfig) -> Result<()> {
        let mut host = JsHost::new(config);
        host.init(&self.entry)
            .with_context(|| format!("Failed to load {}", self.entry.display()))?;

        let value = host
            .call_global(&self.function, &self.parsed_args())
            .with_context(|| format!("Error calling {}", self.function))?;
        print_result(&value)
    }

    fn parsed_args(&self) -> Vec<HostArg> {
        self.args
            .iter()
            .map(|arg| {
                let Ok(parsed) = arg.parse::<HostArg>();
                parsed
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_call_file_function() {
        let dir = tempfile::tempdir().unwrap();
        let entry = dir.path().join("sq.js");
        std::fs::write(&entry, "function sq(n) { return n * n; }").unwrap();

        let command = CallCommand {
            entry,
            function: "sq".into(),
            args: vec!["7".into()],
        };
        assert_eq!(command.parsed_args(), vec![HostArg::Int(7)]);
        command.run(HostConfig::default()).unwrap();
    }

    #[test]
    fn test_call_missing_function_fails() {
        let dir = tempfile::tempdir().unwrap();
        let entry = dir.path().join("empty.js");
        std::fs::write(&entry, "").unwrap();

        let command = CallCommand {
            entry,
            function: "nope".into(),
            args: Vec::new(),
        };
        let err = command.run(HostConfig::default()).unwrap_err();
        assert!(err.to_string().contains("nope"));
    }
}
