//! Runtime orchestration for script execution
//!
//! The Runtime owns one [`LuaEngine`] with the `sys` library and, when a
//! directory is given, the `fs` library.

use crate::error::{CliError, CliResult};
use builtins::{RestrictedFileSystem, SystemFunctions};
use core_types::{LuaError, Value};
use lua_bridge::{EngineConfig, InterruptHandle, LuaEngine, MemoryStats};
use std::path::{Path, PathBuf};

/// Chunk name of code passed with `--eval`.
pub const EVAL_CHUNK: &str = "=(command line)";

/// Chunk name of REPL input.
pub const REPL_CHUNK: &str = "=stdin";

/// Main runtime that owns the interpreter and its host libraries
pub struct Runtime {
    engine: LuaEngine,
    fs_dir: Option<PathBuf>,
}

impl Runtime {
    /// Create a new runtime instance
    ///
    /// # Arguments
    /// * `config` - Engine configuration
    /// * `fs_dir` - Directory for the `fs` library, if scripts may use one
    ///
    /// # Example
    /// ```
    /// use lua_bridge::EngineConfig;
    /// use lua_cli::Runtime;
    ///
    /// let runtime = Runtime::new(EngineConfig::default(), None).unwrap();
    /// ```
    pub fn new(config: EngineConfig, fs_dir: Option<PathBuf>) -> CliResult<Self> {
        let mut engine = LuaEngine::new(config)?;
        let interrupt = engine.interrupt_handle();
        engine.add_library(Box::new(SystemFunctions::with_interrupt(interrupt)))?;
        if let Some(dir) = &fs_dir {
            engine.add_library(Box::new(RestrictedFileSystem::new(dir)?))?;
        }
        tracing::debug!(fs_dir = ?fs_dir, "runtime ready");
        Ok(Runtime { engine, fs_dir })
    }

    /// Execute a Lua file
    ///
    /// # Returns
    /// The values the chunk returned
    ///
    /// # Errors
    /// Returns `CliError` if the file cannot be read or execution fails
    ///
    /// # Example
    /// ```no_run
    /// use lua_bridge::EngineConfig;
    /// use lua_cli::Runtime;
    ///
    /// let mut runtime = Runtime::new(EngineConfig::default(), None).unwrap();
    /// let results = runtime.execute_file("example.lua").unwrap();
    /// ```
    pub fn execute_file(&mut self, path: impl AsRef<Path>) -> CliResult<Vec<Value>> {
        let path = path.as_ref();
        let source = std::fs::read_to_string(path)?;
        let chunk = format!("@{}", path.display());
        Ok(self.engine.eval_string(strip_shebang(&source), &chunk)?)
    }

    /// Execute a Lua source string
    ///
    /// # Example
    /// ```
    /// use core_types::Value;
    /// use lua_bridge::EngineConfig;
    /// use lua_cli::Runtime;
    ///
    /// let mut runtime = Runtime::new(EngineConfig::default(), None).unwrap();
    /// let results = runtime.execute_string("return 6 * 7").unwrap();
    /// assert_eq!(results, vec![Value::Number(42.0)]);
    /// ```
    pub fn execute_string(&mut self, source: &str) -> CliResult<Vec<Value>> {
        Ok(self.engine.eval_string(source, EVAL_CHUNK)?)
    }

    /// Evaluates one REPL entry.
    ///
    /// The entry is first tried as an expression (`return <entry>`) so its
    /// value can be echoed, then as a statement.
    pub fn eval_line(&mut self, source: &str) -> Result<Vec<Value>, LuaError> {
        let expression = format!("return {}", source);
        match self.engine.eval_string(&expression, REPL_CHUNK) {
            Err(LuaError::Syntax(_)) => self.engine.eval_string(source, REPL_CHUNK),
            other => other,
        }
    }

    /// Handle that stops the running script from another thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.engine.interrupt_handle()
    }

    /// Interpreter memory statistics.
    pub fn memory_stats(&self) -> MemoryStats {
        self.engine.memory_stats()
    }

    /// Directory exposed through the `fs` library.
    pub fn fs_dir(&self) -> Option<&Path> {
        self.fs_dir.as_deref()
    }

    /// The underlying engine.
    pub fn engine_mut(&mut self) -> &mut LuaEngine {
        &mut self.engine
    }

    /// Start interactive REPL
    pub fn repl(&mut self) -> CliResult<()> {
        crate::repl::run_repl(self)
    }
}

/// Returns whether `error` means the input merely stopped too early.
pub fn is_incomplete(error: &LuaError) -> bool {
    matches!(error, LuaError::Syntax(message) if message.ends_with("<eof>"))
}

/// Formats results for output: tab-separated text, or one JSON array.
pub fn format_values(values: &[Value], json: bool) -> CliResult<String> {
    if json {
        return serde_json::to_string(values).map_err(|e| CliError::Config(e.to_string()));
    }
    Ok(values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("\t"))
}

/// Skips a leading `#!` line, keeping the line count intact.
fn strip_shebang(source: &str) -> &str {
    if !source.starts_with("#!") {
        return source;
    }
    match source.find('\n') {
        Some(end) => &source[end..],
        None => "",
    }
}
