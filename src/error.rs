//! Error types of the tokenizer, parser, redirection engine and orchestrator.

use std::ffi::NulError;
use std::io;
use std::os::fd::RawFd;

use thiserror::Error;

/// Errors reported by the strict tokenizer.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum LexError {
    /// A `'` or `"` was opened and never closed.
    #[error("syntax error: unterminated {quote} quote")]
    UnterminatedQuote { quote: char },
    /// The line ended right after an unquoted backslash.
    #[error("syntax error: trailing backslash")]
    DanglingEscape,
}

/// Errors that can occur while grouping tokens into a pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseError {
    /// The token stream was empty.
    #[error("syntax error: empty command line")]
    Empty,
    /// A `|` started the line, followed another `|`, or ended the line.
    #[error("syntax error near unexpected token `|'")]
    EmptySegment,
    /// A redirection operator was the last token of its stage.
    #[error("syntax error: redirection `{operator}' without target")]
    MissingRedirectTarget { operator: String },
    /// A stage consisted of redirections only.
    #[error("syntax error: missing command name")]
    MissingCommand,
    #[error("too many arguments in one command (limit is {limit})")]
    TooManyArguments { limit: usize },
    #[error("too many redirections in one command (limit is {limit})")]
    TooManyRedirections { limit: usize },
}

/// Anything that stops a line from reaching the orchestrator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SyntaxError {
    #[error(transparent)]
    Lex(#[from] LexError),
    #[error(transparent)]
    Parse(#[from] ParseError),
}

/// Failures while rebinding a process's standard streams.
#[derive(Debug, Error)]
pub enum RedirectError {
    #[error("cannot save standard streams: {0}")]
    Save(#[source] io::Error),
    #[error("{filename}: {source}")]
    Open {
        filename: String,
        #[source]
        source: io::Error,
    },
    #[error("{filename}: cannot bind to fd {fd}: {source}")]
    Bind {
        filename: String,
        fd: RawFd,
        #[source]
        source: nix::Error,
    },
    #[error("cannot restore fd {fd}: {source}")]
    Restore {
        fd: RawFd,
        #[source]
        source: nix::Error,
    },
}

/// Resource failures of the process orchestrator, named after the failing call.
#[derive(Debug, Error)]
pub enum ExecError {
    #[error("pipe: {0}")]
    Pipe(#[source] nix::Error),
    #[error("fork: {0}")]
    Fork(#[source] nix::Error),
    #[error("dup2: {0}")]
    Dup(#[source] nix::Error),
    #[error("waitpid: {0}")]
    Wait(#[source] nix::Error),
    #[error("{name}: argument contains a NUL byte")]
    Nul {
        name: String,
        #[source]
        source: NulError,
    },
}
