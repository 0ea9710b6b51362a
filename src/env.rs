//! Session state that outlives a single line.

use std::collections::HashMap;
use std::path::PathBuf;

use crate::command::ExitCode;
use crate::history::History;

/// Everything the interpreter and its builtins remember between lines.
///
/// Variable lookups (`PATH`, `HOME`, `HISTFILE`) go through `vars`, a copy of
/// the process environment taken at startup, so tests can substitute their
/// own values without touching the real environment. Spawned programs still
/// inherit the process environment unchanged.
#[derive(Debug, Clone, Default)]
pub struct Environment {
    pub vars: HashMap<String, String>,
    /// Kept equal to the process working directory by `cd`.
    pub current_dir: PathBuf,
    /// Set by `exit`; the session loop stops once it is present.
    pub exit_request: Option<ExitCode>,
    pub last_status: ExitCode,
    pub history: History,
}

impl Environment {
    /// Snapshot of the running process: its variables and working directory.
    pub fn new() -> Self {
        Self {
            vars: std::env::vars().collect(),
            current_dir: std::env::current_dir().unwrap_or_else(|_| PathBuf::from(".")),
            ..Self::default()
        }
    }

    pub fn get_var(&self, key: &str) -> Option<String> {
        self.vars.get(key).cloned()
    }

    pub fn set_var(&mut self, key: impl Into<String>, val: impl Into<String>) {
        self.vars.insert(key.into(), val.into());
    }

    /// `$HOME`, unless unset or empty.
    pub fn home_dir(&self) -> Option<PathBuf> {
        self.vars
            .get("HOME")
            .filter(|home| !home.is_empty())
            .map(PathBuf::from)
    }
}
