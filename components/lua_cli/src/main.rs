//! Corten Lua Runtime CLI
//!
//! Entry point for the Lua runtime. Parses CLI arguments and delegates to
//! the Runtime for execution.

use clap::Parser as ClapParser;
use lua_cli::runtime::format_values;
use lua_cli::{Cli, CliError, CliResult, Runtime};
use tracing::Level;

fn install_subscriber(verbose: bool) {
    let level = if verbose { Level::DEBUG } else { Level::WARN };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: Cli) -> CliResult<()> {
    let config = cli.engine_config()?;
    let mut runtime = Runtime::new(config, cli.fs_dir.clone())?;

    let results = if let Some(file) = &cli.file {
        runtime.execute_file(file)?
    } else if let Some(code) = &cli.eval {
        runtime.execute_string(code)?
    } else if cli.repl {
        return runtime.repl();
    } else {
        // Default: show usage
        println!("Corten Lua Runtime v{}", env!("CARGO_PKG_VERSION"));
        println!();
        println!("Usage:");
        println!("  corten-lua --file <FILE>     Execute a Lua file");
        println!("  corten-lua --eval <CODE>     Evaluate inline Lua code");
        println!("  corten-lua --repl            Start interactive REPL");
        println!();
        println!("Run 'corten-lua --help' for more options.");
        return Ok(());
    };

    if cli.json || !results.is_empty() {
        println!("{}", format_values(&results, cli.json)?);
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    install_subscriber(cli.verbose);

    if let Err(e) = run(cli) {
        match &e {
            CliError::Lua(error) => eprintln!("Lua Error: {}", error),
            other => eprintln!("Error: {}", other),
        }
        std::process::exit(e.exit_code());
    }
}
