//! The `tessera` command line: run a source file, evaluate a one-liner, or
//! start a REPL. `--localities N` runs the program SPMD over N in-process
//! localities.

use std::{path::PathBuf, process::ExitCode};

use clap::Parser;
use nu_ansi_term::Color;
use reedline::{DefaultPrompt, DefaultPromptSegment, Reedline, Signal};
use tessera::{CompiledProgram, Environment, Snippets, Value, compile, run_spmd};

#[derive(Debug, Parser)]
#[command(name = "tessera", version, about = "An array-programming runtime")]
struct Cli {
    /// Source file to run.
    file: Option<PathBuf>,

    /// Evaluate an expression instead of a file.
    #[arg(short = 'e', long = "eval", conflicts_with = "file")]
    expression: Option<String>,

    /// Number of in-process localities to run the program on.
    #[arg(long, default_value_t = 1)]
    localities: u32,

    /// Enable verbose diagnostics.
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::try_from_default_env().unwrap_or_else(|_| filter.into()))
        .with_writer(std::io::stderr)
        .init();

    let source = match (&cli.file, &cli.expression) {
        (Some(path), _) => match std::fs::read_to_string(path) {
            Ok(source) => Some((path.display().to_string(), source)),
            Err(err) => {
                eprintln!("{}", Color::Red.paint(format!("cannot read {}: {err}", path.display())));
                return ExitCode::FAILURE;
            }
        },
        (None, Some(expression)) => Some(("<eval>".to_owned(), expression.clone())),
        (None, None) => None,
    };

    match source {
        Some((name, source)) => run_source(&name, &source, cli.localities).await,
        None => repl().await,
    }
}

async fn run_source(name: &str, source: &str, localities: u32) -> ExitCode {
    if localities > 1 {
        match run_spmd(localities, name, source).await {
            Ok(results) => {
                for (id, value) in results.iter().enumerate() {
                    println!("[{id}] {value}");
                }
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("{}", Color::Red.paint(err.to_string()));
                ExitCode::FAILURE
            }
        }
    } else {
        let mut snippets = Snippets::new();
        let env = Environment::local();
        match run_once(name, source, &mut snippets, &env).await {
            Ok(value) => {
                if value != Value::Nil {
                    println!("{value}");
                }
                ExitCode::SUCCESS
            }
            Err(err) => {
                eprintln!("{}", Color::Red.paint(err.to_string()));
                ExitCode::FAILURE
            }
        }
    }
}

async fn run_once(
    name: &str,
    source: &str,
    snippets: &mut Snippets,
    env: &Environment,
) -> tessera::Result<Value> {
    let program: CompiledProgram = compile(name, source, snippets, env)?;
    program.run().await
}

/// Unbalanced brackets mean the entry continues on the next line.
fn needs_continuation(buffer: &str) -> bool {
    let mut depth = 0i32;
    let mut in_string = false;
    let mut escaped = false;
    for c in buffer.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match c {
            '"' => in_string = true,
            '(' | '[' | '{' => depth += 1,
            ')' | ']' | '}' => depth -= 1,
            _ => {}
        }
    }
    depth > 0 || in_string
}

async fn repl() -> ExitCode {
    println!("tessera {} — type an expression, ctrl-d to quit", env!("CARGO_PKG_VERSION"));

    let mut editor = Reedline::create();
    let prompt = DefaultPrompt::new(DefaultPromptSegment::Basic("tessera".to_owned()), DefaultPromptSegment::Empty);

    let mut snippets = Snippets::new();
    let env = Environment::local();
    let mut pending = String::new();

    loop {
        match editor.read_line(&prompt) {
            Ok(Signal::Success(line)) => {
                pending.push_str(&line);
                pending.push('\n');
                if needs_continuation(&pending) {
                    continue;
                }
                let entry = std::mem::take(&mut pending);
                if entry.trim().is_empty() {
                    continue;
                }
                match run_once("<repl>", &entry, &mut snippets, &env).await {
                    Ok(Value::Nil) => {}
                    Ok(value) => println!("{value}"),
                    Err(err) => eprintln!("{}", Color::Red.paint(err.to_string())),
                }
            }
            Ok(Signal::CtrlC) => {
                pending.clear();
            }
            Ok(Signal::CtrlD) => break,
            Err(err) => {
                eprintln!("{}", Color::Red.paint(format!("input error: {err}")));
                break;
            }
        }
    }
    ExitCode::SUCCESS
}

#[cfg(test)]
mod tests {
    use super::needs_continuation;

    #[test]
    fn balanced_input_is_complete() {
        assert!(!needs_continuation("block(define(x, 1), x)"));
    }

    #[test]
    fn open_paren_continues() {
        assert!(needs_continuation("block(define(x, 1),"));
    }

    #[test]
    fn open_string_continues() {
        assert!(needs_continuation("debug(\"unterminated"));
    }
}
