//! A small POSIX-flavoured command interpreter.
//!
//! A line of input goes through four stages: the [`lexer`] splits it into
//! words honouring quotes and escapes, the [`parser`] groups the words into a
//! [`Pipeline`] of commands with their redirections, the [`redirect`] module
//! rebinds standard streams to files, and the [`Interpreter`] forks one child
//! per pipeline stage, wires the stages together with pipes and collects
//! their exit statuses.
//!
//! Builtins such as `cd` and `exit` live in [`builtin`] and run inside the
//! interpreter's own process when they make up a whole line, so they can
//! change its state.

pub mod builtin;
pub mod command;
pub mod config;
pub mod env;
pub mod error;
pub mod external;
pub mod history;
mod interpreter;
pub mod lexer;
pub mod parser;
pub mod redirect;

/// Just a convenient re-export of the command runner.
///
/// See [`Interpreter`] for the high-level API and examples.
pub use interpreter::Interpreter;

pub use command::{Command, ExitCode, Pipeline, RedirectMode, Redirection};
pub use config::ShellConfig;
pub use error::{ExecError, LexError, ParseError, RedirectError, SyntaxError};
