//! Command line arguments

use crate::error::{CliError, CliResult};
use clap::Parser;
use core_types::StdLibSet;
use lua_bridge::EngineConfig;
use std::path::PathBuf;

/// Corten Lua Runtime
#[derive(Parser, Debug, Clone, Default, PartialEq)]
#[command(name = "corten-lua", version, about = "Run Lua scripts in a bounded, interruptible interpreter")]
pub struct Cli {
    /// Lua file to execute
    #[arg(short, long, value_name = "FILE")]
    pub file: Option<String>,

    /// Inline Lua code to evaluate
    #[arg(short, long, value_name = "CODE")]
    pub eval: Option<String>,

    /// Start the interactive REPL
    #[arg(short, long)]
    pub repl: bool,

    /// Interpreter memory limit in bytes
    #[arg(long, value_name = "BYTES")]
    pub memory_limit: Option<usize>,

    /// Instructions between interrupt checks (0 disables them)
    #[arg(long, value_name = "N")]
    pub instruction_count: Option<u32>,

    /// Comma-separated standard libraries, e.g. `default,io` or `all`
    #[arg(long, value_name = "LIBS")]
    pub libs: Option<String>,

    /// Directory exposed to scripts through the `fs` library
    #[arg(long, value_name = "DIR")]
    pub fs_dir: Option<PathBuf>,

    /// JSON engine configuration; flags override its values
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Print results as JSON
    #[arg(long)]
    pub json: bool,

    /// Log debug output to stderr
    #[arg(short, long)]
    pub verbose: bool,
}

impl Cli {
    /// Arguments that run `file` with every other option at its default.
    pub fn with_file(file: impl Into<String>) -> Self {
        Cli {
            file: Some(file.into()),
            ..Cli::default()
        }
    }

    /// Builds the engine configuration: defaults, then `--config`, then
    /// the individual flags.
    pub fn engine_config(&self) -> CliResult<EngineConfig> {
        let mut config = match &self.config {
            Some(path) => {
                let text = std::fs::read_to_string(path)?;
                EngineConfig::from_json(&text).map_err(|e| CliError::Config(e.to_string()))?
            }
            None => EngineConfig::default(),
        };
        if let Some(limit) = self.memory_limit {
            config = config.with_memory_limit(limit);
        }
        if let Some(count) = self.instruction_count {
            config = config.with_hook_instruction_count(count);
        }
        if let Some(libs) = &self.libs {
            let libs: StdLibSet = libs.parse().map_err(CliError::Config)?;
            config = config.with_std_libs(libs);
        }
        Ok(config)
    }
}
