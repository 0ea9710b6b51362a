//! Parsed representation of an input line: pipelines, commands and redirections.

use std::fmt;
use std::os::fd::RawFd;

/// Conventional process exit code type used by this crate.
///
/// A value of 0 indicates success; any non-zero value indicates failure.
/// This mirrors the convention used by POSIX shells and many command-line tools.
pub type ExitCode = i32;

/// Status reported for a stage that could not be started or whose
/// termination cause is neither a normal exit nor a signal.
pub const STATUS_INTERNAL_FAILURE: ExitCode = -1;

/// Status of a command that was found but could not be prepared for execution.
pub const STATUS_CANNOT_EXECUTE: ExitCode = 126;

/// Status of a command whose program image could not be loaded.
pub const STATUS_NOT_FOUND: ExitCode = 127;

/// Status of a line rejected by the tokenizer or the parser.
pub const STATUS_SYNTAX_ERROR: ExitCode = 2;

/// How a redirected stream is opened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RedirectMode {
    /// `>`: write, creating the file or truncating it.
    Truncate,
    /// `>>`: write at the end, creating the file if absent.
    Append,
    /// `<`: read from an existing file.
    ReadFromFile,
}

/// One stream redirection of a command, e.g. `2>> err.log`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Redirection {
    /// Standard stream being rebound: 0, 1 or 2.
    pub target_fd: RawFd,
    pub mode: RedirectMode,
    /// Never empty: an operator without a filename is a syntax error.
    pub filename: String,
}

impl Redirection {
    pub fn new(target_fd: RawFd, mode: RedirectMode, filename: impl Into<String>) -> Self {
        Self {
            target_fd,
            mode,
            filename: filename.into(),
        }
    }
}

impl fmt::Display for Redirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.target_fd, self.mode) {
            (_, RedirectMode::ReadFromFile) => write!(f, "< {}", self.filename),
            (1, RedirectMode::Truncate) => write!(f, "> {}", self.filename),
            (1, RedirectMode::Append) => write!(f, ">> {}", self.filename),
            (fd, RedirectMode::Truncate) => write!(f, "{}> {}", fd, self.filename),
            (fd, RedirectMode::Append) => write!(f, "{}>> {}", fd, self.filename),
        }
    }
}

/// A single stage of a pipeline.
///
/// `argv[0]` names the program or builtin; the remaining entries are its
/// arguments. Redirections are kept in the order they were written and are
/// applied in that order, so a later redirection of the same stream wins.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Command {
    pub argv: Vec<String>,
    pub redirections: Vec<Redirection>,
}

impl Command {
    /// The program or builtin name, if the command has any words at all.
    pub fn name(&self) -> Option<&str> {
        self.argv.first().map(String::as_str)
    }

    /// Arguments after the program name.
    pub fn args(&self) -> &[String] {
        self.argv.get(1..).unwrap_or(&[])
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut first = true;
        for word in &self.argv {
            if !first {
                f.write_str(" ")?;
            }
            first = false;
            f.write_str(word)?;
        }
        for redirection in &self.redirections {
            write!(f, " {}", redirection)?;
        }
        Ok(())
    }
}

/// Commands connected stdout-to-stdin, in execution order.
///
/// A pipeline always holds at least one command; only the parser builds one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Pipeline {
    stages: Vec<Command>,
}

impl Pipeline {
    pub(crate) fn from_stages(stages: Vec<Command>) -> Self {
        debug_assert!(!stages.is_empty());
        Self { stages }
    }

    pub fn stages(&self) -> &[Command] {
        &self.stages
    }

    pub fn len(&self) -> usize {
        self.stages.len()
    }

    /// Always false; present for symmetry with `len`.
    pub fn is_empty(&self) -> bool {
        self.stages.is_empty()
    }

    /// The only stage of a pipeline that needs no pipes.
    pub fn single(&self) -> Option<&Command> {
        match self.stages.as_slice() {
            [only] => Some(only),
            _ => None,
        }
    }
}

impl fmt::Display for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, stage) in self.stages.iter().enumerate() {
            if i > 0 {
                f.write_str(" | ")?;
            }
            write!(f, "{}", stage)?;
        }
        Ok(())
    }
}
