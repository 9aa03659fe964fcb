//! REPL (Read-Eval-Print Loop) implementation

use crate::error::{CliError, CliResult};
use crate::runtime::{self, Runtime};
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

/// What the REPL does with one line of input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReplAction {
    /// Leave the REPL
    Exit,
    /// Run a dot command
    Command(String),
    /// Add the line to the pending chunk
    Source,
}

/// Classifies a line typed at the primary prompt.
pub fn classify(line: &str) -> ReplAction {
    let trimmed = line.trim();
    match trimmed {
        "exit" | "quit" | ".exit" => ReplAction::Exit,
        _ if trimmed.starts_with('.') => ReplAction::Command(trimmed.to_string()),
        _ => ReplAction::Source,
    }
}

/// Run the interactive REPL
///
/// # Arguments
/// * `runtime` - The Runtime instance to use for execution
///
/// # Returns
/// `Ok(())` when REPL exits normally
pub fn run_repl(runtime: &mut Runtime) -> CliResult<()> {
    let mut editor = DefaultEditor::new()
        .map_err(|e| CliError::Repl(format!("Failed to initialize editor: {}", e)))?;

    println!("Corten Lua Runtime v{}", env!("CARGO_PKG_VERSION"));
    println!("Type Lua code or 'exit' to quit.");
    println!();

    let mut chunk = String::new();

    loop {
        let prompt = if chunk.is_empty() { "> " } else { ">> " };

        match editor.readline(prompt) {
            Ok(line) => {
                if chunk.is_empty() {
                    match classify(&line) {
                        ReplAction::Exit => {
                            println!("Goodbye!");
                            break;
                        }
                        ReplAction::Command(command) => {
                            handle_repl_command(&command, runtime);
                            continue;
                        }
                        ReplAction::Source => {}
                    }
                } else {
                    chunk.push('\n');
                }
                chunk.push_str(&line);

                match runtime.eval_line(&chunk) {
                    Err(e) if runtime::is_incomplete(&e) => continue,
                    Ok(values) => {
                        if !values.is_empty() {
                            match runtime::format_values(&values, false) {
                                Ok(text) => println!("{}", text),
                                Err(e) => eprintln!("Error: {}", e),
                            }
                        }
                    }
                    Err(e) => eprintln!("Error: {}", e),
                }
                let _ = editor.add_history_entry(chunk.as_str());
                chunk.clear();
            }
            Err(ReadlineError::Interrupted) => {
                // Ctrl-C
                if chunk.is_empty() {
                    println!("Press Ctrl-D or type 'exit' to quit");
                } else {
                    println!("^C");
                    chunk.clear();
                }
            }
            Err(ReadlineError::Eof) => {
                // Ctrl-D
                println!("\nGoodbye!");
                break;
            }
            Err(err) => {
                return Err(CliError::Repl(format!("Readline error: {}", err)));
            }
        }
    }

    Ok(())
}

/// Handle special REPL commands
fn handle_repl_command(command: &str, runtime: &mut Runtime) {
    match command {
        ".help" => {
            println!("REPL Commands:");
            println!("  .help     - Show this help message");
            println!("  .mem      - Show interpreter memory usage");
            println!("  .stack    - Show the interpreter stack");
            println!("  .exit     - Exit the REPL");
            println!("  exit      - Exit the REPL");
            println!("  quit      - Exit the REPL");
        }
        ".mem" => println!("{}", runtime.memory_stats()),
        ".stack" => print!("{}", runtime.engine_mut().dump_stack()),
        _ => {
            println!("Unknown command: {}", command);
            println!("Type .help for available commands");
        }
    }
}
