//! Interpreter settings, filled from command-line flags and the environment.

use std::path::PathBuf;

use crate::env::Environment;
use crate::parser::ParseLimits;

/// Prompt shown by the interactive loop.
pub const DEFAULT_PROMPT: &str = "$ ";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShellConfig {
    /// Reject lines ending inside quotes instead of closing them implicitly.
    pub strict_quotes: bool,
    pub limits: ParseLimits,
    pub prompt: String,
    /// File the interactive loop loads history from and appends to on exit.
    pub history_file: Option<PathBuf>,
}

impl ShellConfig {
    /// Defaults, with the history file taken from `$HISTFILE`.
    pub fn from_env(env: &Environment) -> Self {
        Self {
            history_file: env
                .get_var("HISTFILE")
                .filter(|path| !path.is_empty())
                .map(PathBuf::from),
            ..Self::default()
        }
    }
}

impl Default for ShellConfig {
    fn default() -> Self {
        Self {
            strict_quotes: false,
            limits: ParseLimits::default(),
            prompt: DEFAULT_PROMPT.to_string(),
            history_file: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_histfile_from_environment() {
        let mut env = Environment::new();
        env.set_var("HISTFILE", "/tmp/tinysh_history");
        let config = ShellConfig::from_env(&env);
        assert_eq!(config.history_file, Some(PathBuf::from("/tmp/tinysh_history")));
        assert_eq!(config.prompt, DEFAULT_PROMPT);
        assert!(!config.strict_quotes);

        env.set_var("HISTFILE", "");
        assert_eq!(ShellConfig::from_env(&env).history_file, None);
    }
}
