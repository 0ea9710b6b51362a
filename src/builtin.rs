//! Builtin commands and the name-to-handler table that dispatches them.
//!
//! A builtin runs inside the interpreter's own process (or inside a pipeline
//! stage's child) with its standard streams already redirected. It never
//! forks and only borrows the [`Command`] it is invoked with.

use std::collections::HashMap;
use std::env;
use std::fmt;
use std::io::{Read, Write};
use std::marker::PhantomData;
use std::path::PathBuf;

use anyhow::{Context as _, Result};
use argh::{EarlyExit, FromArgs};

use crate::command::{Command, ExitCode};
use crate::env::Environment;
use crate::external::lookup_program;

/// Standard streams handed to a builtin.
pub struct Io<'a> {
    /// None of the standard builtins read input; builtins added with
    /// [`BuiltinTable::register`] can, e.g. as the reading end of a pipeline.
    pub stdin: &'a mut dyn Read,
    pub stdout: &'a mut dyn Write,
    pub stderr: &'a mut dyn Write,
}

/// Interpreter state a builtin may read or change.
pub struct Context<'a> {
    pub env: &'a mut Environment,
    pub builtins: &'a BuiltinTable,
}

/// Anything that can run as a builtin.
pub trait Builtin {
    /// Runs the builtin and returns its exit status.
    fn invoke(&self, command: &Command, io: &mut Io<'_>, ctx: &mut Context<'_>) -> ExitCode;
}

/// Builtins whose arguments are parsed with [`argh`].
///
/// They are registered through [`Factory`], which turns argument errors into
/// a message and status 1 (`--help` prints usage and returns 0).
pub(crate) trait BuiltinCommand: Sized + FromArgs {
    /// Canonical name of the command, e.g. "pwd" or "cd".
    fn name() -> &'static str;

    /// Executes the command. An `Err` is reported as `<name>: <error>` with status 1.
    fn execute(self, io: &mut Io<'_>, ctx: &mut Context<'_>) -> Result<ExitCode>;
}

/// Adapter registering a [`BuiltinCommand`] as a [`Builtin`].
pub(crate) struct Factory<T> {
    _phantom: PhantomData<fn() -> T>,
}

impl<T> Default for Factory<T> {
    fn default() -> Self {
        Self {
            _phantom: PhantomData,
        }
    }
}

impl<T: BuiltinCommand> Builtin for Factory<T> {
    fn invoke(&self, command: &Command, io: &mut Io<'_>, ctx: &mut Context<'_>) -> ExitCode {
        let args: Vec<&str> = command.args().iter().map(String::as_str).collect();
        match T::from_args(&[T::name()], &args) {
            Ok(cmd) => match cmd.execute(io, ctx) {
                Ok(code) => code,
                Err(e) => {
                    let _ = writeln!(io.stderr, "{}: {:#}", T::name(), e);
                    1
                }
            },
            Err(EarlyExit { output, status }) => match status {
                Ok(()) => {
                    let _ = write!(io.stdout, "{}", output);
                    0
                }
                Err(()) => {
                    let _ = write!(io.stderr, "{}", output);
                    1
                }
            },
        }
    }
}

/// Static name-to-builtin table. Lookup is exact and case-sensitive.
pub struct BuiltinTable {
    entries: HashMap<&'static str, Box<dyn Builtin>>,
}

impl BuiltinTable {
    /// A table with no builtins at all; every name resolves to an external program.
    pub fn empty() -> Self {
        Self {
            entries: HashMap::new(),
        }
    }

    /// Adds or replaces the builtin registered under `name`.
    pub fn register(&mut self, name: &'static str, builtin: Box<dyn Builtin>) {
        self.entries.insert(name, builtin);
    }

    fn register_command<T: BuiltinCommand + 'static>(&mut self) {
        self.register(T::name(), Box::new(Factory::<T>::default()));
    }

    pub fn lookup(&self, name: &str) -> Option<&dyn Builtin> {
        self.entries.get(name).map(Box::as_ref)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(name)
    }

    /// Registered names in alphabetical order.
    pub fn names(&self) -> Vec<&'static str> {
        let mut names: Vec<_> = self.entries.keys().copied().collect();
        names.sort_unstable();
        names
    }
}

impl Default for BuiltinTable {
    /// The standard builtins: `cd`, `echo`, `exit`, `history`, `pwd`, `type`.
    fn default() -> Self {
        let mut table = Self::empty();
        table.register_command::<Cd>();
        table.register_command::<Pwd>();
        table.register_command::<Type>();
        table.register_command::<HistoryCmd>();
        table.register("echo", Box::new(Echo));
        table.register("exit", Box::new(Exit));
        table
    }
}

impl fmt::Debug for BuiltinTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_set().entries(self.names()).finish()
    }
}

#[derive(FromArgs)]
/// Print the current working directory to standard output.
pub struct Pwd {}

impl BuiltinCommand for Pwd {
    fn name() -> &'static str {
        "pwd"
    }

    fn execute(self, io: &mut Io<'_>, ctx: &mut Context<'_>) -> Result<ExitCode> {
        writeln!(io.stdout, "{}", ctx.env.current_dir.display())?;
        Ok(0)
    }
}

#[derive(FromArgs)]
/// Change the current working directory.
/// If no target is provided, or it is `~`, changes to $HOME.
pub struct Cd {
    #[argh(positional)]
    /// directory to switch to; absolute or relative to the current directory.
    pub target: Option<String>,
}

impl BuiltinCommand for Cd {
    fn name() -> &'static str {
        "cd"
    }

    fn execute(self, _io: &mut Io<'_>, ctx: &mut Context<'_>) -> Result<ExitCode> {
        let target = match self.target.as_deref() {
            None | Some("~") => ctx
                .env
                .home_dir()
                .ok_or_else(|| anyhow::anyhow!("HOME not set"))?,
            Some(dir) => PathBuf::from(dir),
        };

        let new_dir = ctx.env.current_dir.join(&target);
        let canonical = new_dir
            .canonicalize()
            .with_context(|| target.display().to_string())?;
        env::set_current_dir(&canonical).with_context(|| target.display().to_string())?;
        ctx.env.current_dir = canonical;
        Ok(0)
    }
}

/// Write the arguments to standard output separated by spaces, followed by
/// a newline unless the first argument is `-n`.
///
/// Takes its arguments verbatim, so words that look like options are printed.
pub struct Echo;

impl Builtin for Echo {
    fn invoke(&self, command: &Command, io: &mut Io<'_>, _ctx: &mut Context<'_>) -> ExitCode {
        let (newline, words) = match command.args() {
            [first, rest @ ..] if first == "-n" => (false, rest),
            all => (true, all),
        };
        let text = words.join(" ");
        let written = if newline {
            writeln!(io.stdout, "{}", text)
        } else {
            write!(io.stdout, "{}", text)
        };
        match written {
            Ok(()) => 0,
            Err(e) => {
                let _ = writeln!(io.stderr, "echo: {}", e);
                1
            }
        }
    }
}

/// End the session with the given status (default 0), truncated to 0..=255.
///
/// Takes its argument verbatim so that negative codes are not mistaken for
/// options.
pub struct Exit;

impl Builtin for Exit {
    fn invoke(&self, command: &Command, io: &mut Io<'_>, ctx: &mut Context<'_>) -> ExitCode {
        let code = match command.args() {
            [] => 0,
            [arg] => match arg.trim().parse::<i64>() {
                Ok(code) => (code & 0xff) as ExitCode,
                Err(_) => {
                    let _ = writeln!(io.stderr, "exit: {}: numeric argument required", arg);
                    2
                }
            },
            [_, _, ..] => {
                let _ = writeln!(io.stderr, "exit: too many arguments");
                return 1;
            }
        };
        ctx.env.exit_request = Some(code);
        code
    }
}

#[derive(FromArgs)]
/// Tell how each name would be interpreted as a command.
pub struct Type {
    #[argh(positional, greedy)]
    /// command names to describe.
    pub names: Vec<String>,
}

impl BuiltinCommand for Type {
    fn name() -> &'static str {
        "type"
    }

    fn execute(self, io: &mut Io<'_>, ctx: &mut Context<'_>) -> Result<ExitCode> {
        if self.names.is_empty() {
            writeln!(io.stderr, "type: usage: type name [name ...]")?;
            return Ok(2);
        }
        let mut status = 0;
        for name in &self.names {
            if ctx.builtins.contains(name) {
                writeln!(io.stdout, "{} is a shell builtin", name)?;
            } else if let Some(path) = lookup_program(ctx.env, name) {
                writeln!(io.stdout, "{} is {}", name, path.display())?;
            } else {
                writeln!(io.stdout, "{}: not found", name)?;
                status = 1;
            }
        }
        Ok(status)
    }
}

#[derive(FromArgs)]
/// Show the lines entered in this session, or load/save them.
pub struct HistoryCmd {
    #[argh(positional)]
    /// number of most recent entries to show (0 shows all).
    pub limit: Option<usize>,

    #[argh(option, short = 'r')]
    /// append the entries stored in this file to the history.
    pub read: Option<PathBuf>,

    #[argh(option, short = 'w')]
    /// write the whole history to this file.
    pub write: Option<PathBuf>,

    #[argh(option, short = 'a')]
    /// append entries added since the last save to this file.
    pub append: Option<PathBuf>,
}

impl BuiltinCommand for HistoryCmd {
    fn name() -> &'static str {
        "history"
    }

    fn execute(self, io: &mut Io<'_>, ctx: &mut Context<'_>) -> Result<ExitCode> {
        let history = &mut ctx.env.history;
        match (self.read, self.write, self.append) {
            (None, None, None) => {
                for (index, line) in history.tail(self.limit) {
                    writeln!(io.stdout, "{:>5}  {}", index, line)?;
                }
            }
            (Some(path), None, None) => {
                history
                    .read_from(&path)
                    .with_context(|| format!("couldn't read {}", path.display()))?;
            }
            (None, Some(path), None) => {
                history
                    .write_to(&path)
                    .with_context(|| format!("couldn't write {}", path.display()))?;
            }
            (None, None, Some(path)) => {
                history
                    .append_to(&path)
                    .with_context(|| format!("couldn't append to {}", path.display()))?;
            }
            _ => {
                writeln!(io.stderr, "history: only one of -r, -w and -a may be given")?;
                return Ok(2);
            }
        }
        Ok(0)
    }
}
