use anyhow::Result;
use clap::{Parser, Subcommand};
use qjs_host::HostConfig;
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

mod commands;
mod config;

use commands::{call::CallCommand, eval::EvalCommand, run::RunCommand};

#[derive(Parser)]
#[command(name = "qjs", version, about = "Run scripts on the embedded QuickJS engine")]
struct Cli {
    /// Config file (default: qjs.toml in this or a parent directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Timeout in milliseconds (0 = no timeout)
    #[arg(long, global = true)]
    timeout: Option<u64>,

    /// Engine heap limit in bytes
    #[arg(long, global = true)]
    memory_limit: Option<i64>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Evaluate a file and print its completion value
    Run(RunCommand),
    /// Evaluate an inline expression
    Eval(EvalCommand),
    /// Load a file and call one of its global functions
    Call(CallCommand),
}

impl Cli {
    /// CLI flags take precedence over the config file
    fn host_config(&self, mut host: HostConfig) -> HostConfig {
        if let Some(timeout) = self.timeout {
            host.timeout_ms = Some(timeout);
        }
        if let Some(limit) = self.memory_limit {
            host.runtime.memory_limit = limit;
        }
        host
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let config = config::load_config(cli.config.as_deref())?;

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.log.level))?;
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let host = cli.host_config(config.host);
    match &cli.command {
        Commands::Run(cmd) => cmd.run(host),
        Commands::Eval(cmd) => cmd.run(host),
        Commands::Call(cmd) => cmd.run(host),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let cli = Cli::parse_from([
            "qjs",
            "--timeout",
            "250",
            "--memory-limit",
            "1048576",
            "eval",
            "1 + 1",
        ]);
        let host = cli.host_config(HostConfig {
            timeout_ms: Some(10_000),
            ..HostConfig::default()
        });
        assert_eq!(host.timeout_ms, Some(250));
        assert_eq!(host.runtime.memory_limit, 1 << 20);
    }

    #[test]
    fn test_call_arguments_after_function() {
        let cli = Cli::parse_from(["qjs", "call", "plugin.js", "main", "text", "-3"]);
        match cli.command {
            Commands::Call(cmd) => {
                assert_eq!(cmd.function, "main");
                assert_eq!(cmd.args, vec!["text", "-3"]);
            }
            _ => panic!("expected call"),
        }
    }

    #[test]
    fn test_config_left_alone_without_flags() {
        let cli = Cli::parse_from(["qjs", "run", "script.js"]);
        let host = cli.host_config(HostConfig::default());
        assert_eq!(host, HostConfig::default());
    }
}
