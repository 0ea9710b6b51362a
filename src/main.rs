use std::path::PathBuf;

use anyhow::Context as _;
use argh::FromArgs;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

use tinysh::builtin::BuiltinTable;
use tinysh::env::Environment;
use tinysh::{Interpreter, ShellConfig};

#[derive(FromArgs)]
/// A small command interpreter with pipelines and redirections.
struct Args {
    #[argh(option, short = 'c')]
    /// run this line instead of starting an interactive session.
    command: Option<String>,

    #[argh(switch)]
    /// reject lines that end inside a quote or after a backslash.
    strict_quotes: bool,

    #[argh(option)]
    /// maximum number of words in a single command.
    max_args: Option<usize>,

    #[argh(option)]
    /// maximum number of redirections in a single command.
    max_redirections: Option<usize>,

    #[argh(option)]
    /// file to load history from and append new entries to (default: $HISTFILE).
    history_file: Option<PathBuf>,

    #[argh(switch, short = 'v')]
    /// log what the interpreter does to stderr.
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("tinysh=debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn config_from(args: &Args) -> ShellConfig {
    let mut config = ShellConfig::from_env(&Environment::new());
    config.strict_quotes = args.strict_quotes;
    config.limits.max_args = args.max_args;
    config.limits.max_redirections = args.max_redirections;
    if let Some(path) = &args.history_file {
        config.history_file = Some(path.clone());
    }
    config
}

fn main() -> anyhow::Result<()> {
    let args: Args = argh::from_env();
    init_tracing(args.verbose);

    let mut interpreter = Interpreter::new(BuiltinTable::default(), config_from(&args));
    let status = match &args.command {
        Some(line) => interpreter.run_line(line),
        None => interpreter.repl().context("interactive session failed")?,
    };
    std::process::exit(status)
}
