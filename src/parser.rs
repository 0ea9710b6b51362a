//! Grouping of tokens into a [`Pipeline`] of [`Command`]s.
//!
//! Grammar, over the tokens produced by [`crate::lexer`]:
//!
//! ```text
//! pipeline := command ('|' command)*
//! command  := (word | redirect)+          with at least one word
//! redirect := ('>' | '1>' | '>>' | '1>>' | '2>' | '2>>' | '<') word
//! ```
//!
//! Operators are recognised by exact string match, so a quoted `'>'` is
//! indistinguishable from a bare `>` once tokenized.

use std::os::fd::RawFd;

use tracing::trace;

use crate::command::{Command, Pipeline, RedirectMode, Redirection};
use crate::error::ParseError;
use crate::lexer::PIPE;

/// Caller-imposed bounds on the size of a single command.
///
/// `None` means unbounded. Exceeding a bound is a [`ParseError`], never a
/// silent truncation.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ParseLimits {
    /// Maximum number of argv entries, program name included.
    pub max_args: Option<usize>,
    /// Maximum number of redirections per command.
    pub max_redirections: Option<usize>,
}

/// Maps a redirection operator to the stream it rebinds and how.
pub fn redirect_operator(token: &str) -> Option<(RawFd, RedirectMode)> {
    match token {
        ">" | "1>" => Some((1, RedirectMode::Truncate)),
        ">>" | "1>>" => Some((1, RedirectMode::Append)),
        "2>" => Some((2, RedirectMode::Truncate)),
        "2>>" => Some((2, RedirectMode::Append)),
        "<" => Some((0, RedirectMode::ReadFromFile)),
        _ => None,
    }
}

fn check_limit(
    len: usize,
    limit: Option<usize>,
    error: impl FnOnce(usize) -> ParseError,
) -> Result<(), ParseError> {
    match limit {
        Some(limit) if len >= limit => Err(error(limit)),
        _ => Ok(()),
    }
}

struct PipelineBuilder<'a> {
    limits: &'a ParseLimits,
    stages: Vec<Command>,
}

impl<'a> PipelineBuilder<'a> {
    fn new(limits: &'a ParseLimits) -> Self {
        Self {
            limits,
            stages: Vec::new(),
        }
    }

    /// Splits on `|` and reduces every segment to a command.
    fn build(mut self, tokens: Vec<String>) -> Result<Pipeline, ParseError> {
        if tokens.is_empty() {
            return Err(ParseError::Empty);
        }

        let mut segment = Vec::new();
        for token in tokens {
            if token == PIPE {
                if segment.is_empty() {
                    return Err(ParseError::EmptySegment);
                }
                self.push_segment(std::mem::take(&mut segment))?;
            } else {
                segment.push(token);
            }
        }

        // Also catches a line that ends with `|`.
        if segment.is_empty() {
            return Err(ParseError::EmptySegment);
        }
        self.push_segment(segment)?;

        Ok(Pipeline::from_stages(self.stages))
    }

    fn push_segment(&mut self, segment: Vec<String>) -> Result<(), ParseError> {
        let command = self.parse_command(segment)?;
        trace!(stage = self.stages.len(), %command, "parsed stage");
        self.stages.push(command);
        Ok(())
    }

    /// Separates a segment into argv words and redirections, keeping the
    /// relative order of each.
    fn parse_command(&self, segment: Vec<String>) -> Result<Command, ParseError> {
        let argv_capacity = self
            .limits
            .max_args
            .map_or(segment.len(), |limit| limit.min(segment.len()));
        let mut argv = Vec::with_capacity(argv_capacity);
        let mut redirections = Vec::new();

        let mut tokens = segment.into_iter();
        while let Some(token) = tokens.next() {
            if let Some((target_fd, mode)) = redirect_operator(&token) {
                let filename = tokens
                    .next()
                    .ok_or(ParseError::MissingRedirectTarget { operator: token })?;
                check_limit(redirections.len(), self.limits.max_redirections, |limit| {
                    ParseError::TooManyRedirections { limit }
                })?;
                redirections.push(Redirection {
                    target_fd,
                    mode,
                    filename,
                });
            } else {
                check_limit(argv.len(), self.limits.max_args, |limit| {
                    ParseError::TooManyArguments { limit }
                })?;
                argv.push(token);
            }
        }

        if argv.is_empty() {
            return Err(ParseError::MissingCommand);
        }

        Ok(Command { argv, redirections })
    }
}

/// Builds a pipeline from tokens, taking ownership of their strings.
///
/// No partial pipeline is ever returned: the first syntax error aborts
/// the whole line.
pub fn parse(tokens: Vec<String>, limits: &ParseLimits) -> Result<Pipeline, ParseError> {
    PipelineBuilder::new(limits).build(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lexer::tokenize;
    use rstest::rstest;

    fn parse_line(line: &str) -> Result<Pipeline, ParseError> {
        parse(tokenize(line), &ParseLimits::default())
    }

    #[test]
    fn test_two_stage_pipeline() {
        let pipeline = parse_line("echo hello | cat").unwrap();
        assert_eq!(pipeline.len(), 2);
        assert_eq!(pipeline.stages()[0].argv, vec!["echo", "hello"]);
        assert_eq!(pipeline.stages()[1].argv, vec!["cat"]);
        assert!(pipeline.stages().iter().all(|c| c.redirections.is_empty()));
    }

    #[test]
    fn test_quoted_argument_keeps_whitespace() {
        let pipeline = parse_line("echo 'a   b'").unwrap();
        let command = pipeline.single().unwrap();
        assert_eq!(command.argv, vec!["echo", "a   b"]);
    }

    #[test]
    fn test_redirections_are_separated_from_argv() {
        let pipeline = parse_line("ls > out.txt 2>> err.log").unwrap();
        let command = pipeline.single().unwrap();
        assert_eq!(command.argv, vec!["ls"]);
        assert_eq!(
            command.redirections,
            vec![
                Redirection::new(1, RedirectMode::Truncate, "out.txt"),
                Redirection::new(2, RedirectMode::Append, "err.log"),
            ]
        );
    }

    #[test]
    fn test_redirections_interleave_with_arguments() {
        let pipeline = parse_line("sort < in.txt -r > a 1>> b data").unwrap();
        let command = pipeline.single().unwrap();
        assert_eq!(command.argv, vec!["sort", "-r", "data"]);
        let files: Vec<&str> = command
            .redirections
            .iter()
            .map(|r| r.filename.as_str())
            .collect();
        assert_eq!(files, vec!["in.txt", "a", "b"]);
    }

    #[test]
    fn test_redirection_on_last_stage() {
        let pipeline = parse_line("printf hi | cat > captured.txt").unwrap();
        assert!(pipeline.stages()[0].redirections.is_empty());
        assert_eq!(
            pipeline.stages()[1].redirections,
            vec![Redirection::new(1, RedirectMode::Truncate, "captured.txt")]
        );
    }

    #[rstest]
    #[case(">", 1, RedirectMode::Truncate)]
    #[case("1>", 1, RedirectMode::Truncate)]
    #[case(">>", 1, RedirectMode::Append)]
    #[case("1>>", 1, RedirectMode::Append)]
    #[case("2>", 2, RedirectMode::Truncate)]
    #[case("2>>", 2, RedirectMode::Append)]
    #[case("<", 0, RedirectMode::ReadFromFile)]
    fn test_operator_mapping(#[case] op: &str, #[case] fd: RawFd, #[case] mode: RedirectMode) {
        assert_eq!(redirect_operator(op), Some((fd, mode)));
    }

    #[test]
    fn test_non_operators() {
        for token in ["2>&1", "3>", ">out", "&>", "<<"] {
            assert_eq!(redirect_operator(token), None, "token: {token}");
        }
    }

    #[rstest]
    #[case::leading_pipe("| cat")]
    #[case::double_pipe("echo hi | | cat")]
    #[case::adjacent_pipes("echo hi || cat")]
    #[case::trailing_pipe("echo hi |")]
    fn test_empty_segment(#[case] line: &str) {
        assert_eq!(parse_line(line), Err(ParseError::EmptySegment));
    }

    #[test]
    fn test_dangling_operator() {
        assert_eq!(
            parse_line("echo hi >"),
            Err(ParseError::MissingRedirectTarget {
                operator: ">".to_string()
            })
        );
        // The target cannot come from the next stage.
        assert_eq!(
            parse_line("echo hi 2>> | cat"),
            Err(ParseError::MissingRedirectTarget {
                operator: "2>>".to_string()
            })
        );
    }

    #[test]
    fn test_redirections_without_command() {
        assert_eq!(parse_line("> out.txt"), Err(ParseError::MissingCommand));
    }

    #[test]
    fn test_empty_input() {
        assert_eq!(parse_line("   "), Err(ParseError::Empty));
    }

    #[test]
    fn test_limits_are_reported() {
        let limits = ParseLimits {
            max_args: Some(2),
            max_redirections: Some(1),
        };
        assert!(parse(tokenize("echo a"), &limits).is_ok());
        assert_eq!(
            parse(tokenize("echo a b"), &limits),
            Err(ParseError::TooManyArguments { limit: 2 })
        );
        assert_eq!(
            parse(tokenize("echo > a > b"), &limits),
            Err(ParseError::TooManyRedirections { limit: 1 })
        );
    }
}
