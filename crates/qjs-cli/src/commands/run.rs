//! Run command - evaluate a JavaScript file.

use anyhow::{Context, Result};
use clap::Args;
use qjs_host::{HostConfig, JsHost};
use std::path::PathBuf;

use super::print_result;

#[derive(Args)]
pub struct RunCommand {
    /// File to execute
    pub entry: PathBuf,

    /// Do not print the completion value
    #[arg(long, short)]
    pub quiet: bool,
}

impl RunCommand {
    pub fn run(&self, config: HostConfig) -> Result<()> {
        let mut host = JsHost::new(config);
        host.start().context("Failed to start the engine")?;

        let value = host
            .eval_file(&self.entry)
            .with_context(|| format!("Error running {}", self.entry.display()))?;
        host.run_init_loop().context("Error in pending jobs")?;

        if !self.quiet {
            print_result(&value)?;
        }
        Ok(())
    }
}
