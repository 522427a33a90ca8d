//! Eval command - evaluate an inline expression.

use anyhow::{Context, Result};
use clap::Args;
use qjs_host::{HostConfig, JsHost};

use super::print_result;

#[derive(Args)]
pub struct EvalCommand {
    /// Source text to evaluate
    pub code: String,
}

impl EvalCommand {
    pub fn run(&self, config: HostConfig) -> Result<()> {
        let mut host = JsHost::new(config);
        host.start().context("Failed to start the engine")?;

        let value = host.eval(&self.code, "<eval>")?;
        host.run_init_loop().context("Error in pending jobs")?;
        print_result(&value)
    }
}
