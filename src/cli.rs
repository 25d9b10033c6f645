//! Command-line REPL
//!
//! Lines are `<op> <json-params>`, e.g.
//! `quantize {"trackIndex": 0, "clipSlot": 0, "grid": "1/8"}`.
//! The editor blocks, so it runs on its own thread and hands parsed
//! commands to the async side over a channel.

use anyhow::{Context, Result};
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use serde_json::Value;
use tokio::sync::mpsc;
use tracing::debug;

use liveset_bridge::service::ServiceResponse;
use liveset_bridge::transform::Operation;

const PROMPT: &str = "liveset> ";

/// One parsed REPL line
#[derive(Debug, Clone, PartialEq)]
pub enum ReplCommand {
    Run { op: String, params: Value },
    Help,
    Quit,
}

/// Parse a REPL line. Blank lines yield `None`.
pub fn parse_line(line: &str) -> Result<Option<ReplCommand>> {
    let line = line.trim();
    if line.is_empty() {
        return Ok(None);
    }

    let (op, rest) = match line.split_once(char::is_whitespace) {
        Some((op, rest)) => (op, rest.trim()),
        None => (line, ""),
    };

    let command = match op {
        "exit" | "quit" => ReplCommand::Quit,
        "help" | "?" => ReplCommand::Help,
        _ => {
            let params = if rest.is_empty() {
                Value::Object(Default::default())
            } else {
                serde_json::from_str(rest)
                    .with_context(|| format!("Parameters for '{}' are not valid JSON", op))?
            };
            ReplCommand::Run {
                op: op.to_string(),
                params,
            }
        }
    };
    Ok(Some(command))
}

/// Start the line editor on its own thread.
///
/// The channel closes when the user quits or input ends. A plain thread
/// keeps runtime shutdown from waiting on a pending `readline`.
pub fn spawn_repl() -> Result<mpsc::Receiver<ReplCommand>> {
    let (tx, rx) = mpsc::channel(8);

    std::thread::Builder::new()
        .name("repl".to_string())
        .spawn(move || {
            if let Err(e) = run_editor(tx) {
                eprintln!("{} {:#}", "REPL stopped:".red(), e);
            }
        })
        .context("Failed to start REPL thread")?;

    Ok(rx)
}

fn run_editor(tx: mpsc::Sender<ReplCommand>) -> Result<()> {
    let mut rl = DefaultEditor::new()?;

    loop {
        match rl.readline(PROMPT) {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                match parse_line(&line) {
                    Ok(Some(ReplCommand::Quit)) => break,
                    Ok(Some(command)) => {
                        if tx.blocking_send(command).is_err() {
                            break;
                        }
                    }
                    Ok(None) => {}
                    Err(e) => eprintln!("{} {:#}", "error:".red().bold(), e),
                }
            }
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    debug!("REPL input closed");
    let _ = tx.blocking_send(ReplCommand::Quit);
    Ok(())
}

pub fn print_help() {
    println!("\n{}", "Operations:".bold().cyan());
    for op in Operation::ALL {
        println!("  {:<20} {}", op.as_str().yellow(), op.params().dimmed());
    }
    println!(
        "\n  {}",
        "usage: <op> {\"trackIndex\": 0, \"clipSlot\": 0, ...}   exit to quit".dimmed()
    );
}

pub fn print_response(response: &ServiceResponse) {
    match response {
        ServiceResponse::Ok { result } => {
            println!("{} {}", "✅".green(), result.message.green());
            for file in &result.files {
                println!("   {}", file.bright_white());
            }
            if let Some(value) = &result.value {
                let pretty = serde_json::to_string_pretty(value).unwrap_or_else(|_| value.to_string());
                println!("{}", pretty);
            }
        }
        ServiceResponse::Error { detail } => {
            println!(
                "{} {} {}",
                "❌".red(),
                detail.error_kind.to_string().red().bold(),
                detail.message
            );
            if let Some(path) = &detail.path {
                println!("   at {}", path.yellow());
            }
            println!("   correlation id {}", detail.correlation_id.dimmed());
        }
    }
}
