//! Lexical analysis of an input line into plain string tokens.
//!
//! Quoting is resolved here: the produced tokens never contain the quote or
//! escape characters that shaped them. The only character with structural
//! meaning at this level is an unquoted `|`, which always becomes a token of
//! its own. Redirection operators are ordinary whitespace-separated words and
//! are recognised later by the parser.

use crate::error::LexError;

/// Token emitted for an unquoted `|`.
pub const PIPE: &str = "|";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LexingState {
    Normal,
    SingleQuoted,
    DoubleQuoted,
    /// After an unquoted backslash: the next character is copied literally.
    Escaped,
}

/// Characters that keep their escaping backslash meaning inside double quotes.
fn escapable_in_double_quotes(ch: char) -> bool {
    matches!(ch, '"' | '\\' | '`' | '$' | '*' | '?' | '\n')
}

struct LexingFSM {
    input: Vec<char>,
    pos: usize,
    state: LexingState,
    buffer: String,
    tokens: Vec<String>,
}

impl LexingFSM {
    fn new(line: &str) -> Self {
        LexingFSM {
            input: line.chars().collect(),
            pos: 0,
            state: LexingState::Normal,
            buffer: String::new(),
            tokens: Vec::new(),
        }
    }

    /// Runs the machine to the end of input and returns the tokens together
    /// with the state the input ended in.
    fn make_tokens(mut self) -> (Vec<String>, LexingState) {
        while let Some(ch) = self.read_char() {
            match self.state {
                LexingState::Normal => self.handle_normal(ch),
                LexingState::SingleQuoted => self.handle_single_quote(ch),
                LexingState::DoubleQuoted => self.handle_double_quote(ch),
                LexingState::Escaped => {
                    self.buffer.push(ch);
                    self.state = LexingState::Normal;
                }
            }
        }

        // Unterminated quotes are closed implicitly.
        self.finish_token();
        (self.tokens, self.state)
    }

    fn read_char(&mut self) -> Option<char> {
        let ch = self.input.get(self.pos).copied();
        if ch.is_some() {
            self.pos += 1;
        }
        ch
    }

    fn peek_char(&self) -> Option<char> {
        self.input.get(self.pos).copied()
    }

    fn finish_token(&mut self) {
        if !self.buffer.is_empty() {
            self.tokens.push(std::mem::take(&mut self.buffer));
        }
    }

    fn handle_normal(&mut self, ch: char) {
        match ch {
            ' ' | '\t' | '\n' | '\r' => self.finish_token(),
            '|' => {
                self.finish_token();
                self.tokens.push(PIPE.to_string());
            }
            '\'' => self.state = LexingState::SingleQuoted,
            '"' => self.state = LexingState::DoubleQuoted,
            '\\' => self.state = LexingState::Escaped,
            c => self.buffer.push(c),
        }
    }

    fn handle_single_quote(&mut self, ch: char) {
        match ch {
            '\'' => self.state = LexingState::Normal,
            c => self.buffer.push(c),
        }
    }

    fn handle_double_quote(&mut self, ch: char) {
        match ch {
            '"' => self.state = LexingState::Normal,
            '\\' => match self.peek_char() {
                Some(next) if escapable_in_double_quotes(next) => {
                    self.read_char();
                    self.buffer.push(next);
                }
                _ => self.buffer.push('\\'),
            },
            c => self.buffer.push(c),
        }
    }
}

/// Splits a line into tokens, closing any quote left open at the end.
///
/// ```
/// use tinysh::lexer::tokenize;
/// assert_eq!(tokenize(r#"echo "a  b"|wc"#), vec!["echo", "a  b", "|", "wc"]);
/// ```
pub fn tokenize(line: &str) -> Vec<String> {
    let (tokens, _) = LexingFSM::new(line).make_tokens();
    tokens
}

/// Like [`tokenize`], but rejects a line that ends inside quotes or right
/// after an unquoted backslash.
pub fn tokenize_strict(line: &str) -> Result<Vec<String>, LexError> {
    let (tokens, state) = LexingFSM::new(line).make_tokens();
    match state {
        LexingState::Normal => Ok(tokens),
        LexingState::SingleQuoted => Err(LexError::UnterminatedQuote { quote: '\'' }),
        LexingState::DoubleQuoted => Err(LexError::UnterminatedQuote { quote: '"' }),
        LexingState::Escaped => Err(LexError::DanglingEscape),
    }
}
