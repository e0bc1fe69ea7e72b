//! Lexer for memory traces
//!
//! Converts trace text into a flat [`Token`] stream. Line breaks are
//! significant (one statement per line) and come out as [`Token::Newline`];
//! `#` starts a comment that runs to the end of the line.

use super::ast::SourceLocation;
use std::fmt;

/// All token variants produced by the lexer.
///
/// Every variant carries a [`SourceLocation`] so that parse errors can report
/// an accurate line and column.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Decimal or `0x` hexadecimal integer
    Number(u64, SourceLocation),
    StringLiteral(String, SourceLocation),
    Ident(String, SourceLocation),
    /// `%name`
    Var(String, SourceLocation),

    Plus(SourceLocation),     // +
    Eq(SourceLocation),       // =
    LParen(SourceLocation),   // (
    RParen(SourceLocation),   // )
    LBracket(SourceLocation), // [
    RBracket(SourceLocation), // ]

    Newline(SourceLocation),
    Eof(SourceLocation),
}

impl Token {
    /// Returns the source location where this token appears.
    pub fn location(&self) -> SourceLocation {
        match self {
            Token::Number(_, loc)
            | Token::StringLiteral(_, loc)
            | Token::Ident(_, loc)
            | Token::Var(_, loc)
            | Token::Plus(loc)
            | Token::Eq(loc)
            | Token::LParen(loc)
            | Token::RParen(loc)
            | Token::LBracket(loc)
            | Token::RBracket(loc)
            | Token::Newline(loc)
            | Token::Eof(loc) => *loc,
        }
    }
}

impl fmt::Display for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Token::Number(n, _) => write!(f, "number {}", n),
            Token::StringLiteral(s, _) => write!(f, "string literal {:?}", s),
            Token::Ident(s, _) => write!(f, "'{}'", s),
            Token::Var(s, _) => write!(f, "'%{}'", s),
            Token::Plus(_) => write!(f, "'+'"),
            Token::Eq(_) => write!(f, "'='"),
            Token::LParen(_) => write!(f, "'('"),
            Token::RParen(_) => write!(f, "')'"),
            Token::LBracket(_) => write!(f, "'['"),
            Token::RBracket(_) => write!(f, "']'"),
            Token::Newline(_) => write!(f, "end of line"),
            Token::Eof(_) => write!(f, "end of file"),
        }
    }
}

/// Lexer error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Lexer error at line {}, column {}: {message}", .location.line, .location.column)]
pub struct LexError {
    pub message: String,
    pub location: SourceLocation,
}

/// Lexer for trace text
pub struct Lexer {
    input: Vec<char>,
    position: usize,
    line: usize,
    column: usize,
}

impl Lexer {
    pub fn new(input: &str) -> Self {
        Self {
            input: input.chars().collect(),
            position: 0,
            line: 1,
            column: 1,
        }
    }

    /// Tokenize the entire input
    pub fn tokenize(&mut self) -> Result<Vec<Token>, LexError> {
        let mut tokens = Vec::new();

        loop {
            self.skip_blanks_and_comment();

            if self.is_at_end() {
                tokens.push(Token::Eof(self.current_location()));
                break;
            }

            tokens.push(self.next_token()?);
        }

        Ok(tokens)
    }

    fn next_token(&mut self) -> Result<Token, LexError> {
        let loc = self.current_location();
        let ch = self.advance().ok_or_else(|| LexError {
            message: "Unexpected end of file".to_string(),
            location: loc,
        })?;

        match ch {
            '\n' => Ok(Token::Newline(loc)),
            '"' => self.string_literal(loc),
            '0'..='9' => self.number_literal(ch, loc),
            '%' => {
                let name = self.word();
                if name.is_empty() {
                    return Err(LexError {
                        message: "Expected a name after '%'".to_string(),
                        location: loc,
                    });
                }
                Ok(Token::Var(name, loc))
            }
            'a'..='z' | 'A'..='Z' | '_' => {
                let mut ident = String::from(ch);
                ident.push_str(&self.word());
                Ok(Token::Ident(ident, loc))
            }
            '+' => Ok(Token::Plus(loc)),
            '=' => Ok(Token::Eq(loc)),
            '(' => Ok(Token::LParen(loc)),
            ')' => Ok(Token::RParen(loc)),
            '[' => Ok(Token::LBracket(loc)),
            ']' => Ok(Token::RBracket(loc)),

            _ => Err(LexError {
                message: format!("Unexpected character: '{}'", ch),
                location: loc,
            }),
        }
    }

    /// Parse string literal; the opening quote is already consumed
    fn string_literal(&mut self, loc: SourceLocation) -> Result<Token, LexError> {
        let mut string = String::new();

        while let Some(ch) = self.peek() {
            match ch {
                '"' => {
                    self.advance();
                    return Ok(Token::StringLiteral(string, loc));
                }
                '\n' => break,
                '\\' => {
                    self.advance();
                    let escaped = self.advance().ok_or_else(|| LexError {
                        message: "Unexpected end of file in string literal".to_string(),
                        location: self.current_location(),
                    })?;
                    let unescaped = match escaped {
                        'n' => '\n',
                        't' => '\t',
                        'r' => '\r',
                        '\\' => '\\',
                        '"' => '"',
                        '0' => '\0',
                        _ => {
                            return Err(LexError {
                                message: format!("Unknown escape sequence: \\{}", escaped),
                                location: self.current_location(),
                            });
                        }
                    };
                    string.push(unescaped);
                }
                _ => {
                    string.push(ch);
                    self.advance();
                }
            }
        }

        Err(LexError {
            message: "Unterminated string literal".to_string(),
            location: loc,
        })
    }

    fn number_literal(
        &mut self,
        first_digit: char,
        loc: SourceLocation,
    ) -> Result<Token, LexError> {
        let (digits, radix) = if first_digit == '0' && matches!(self.peek(), Some('x' | 'X')) {
            self.advance();
            (self.word(), 16)
        } else {
            let mut digits = String::from(first_digit);
            digits.push_str(&self.word());
            (digits, 10)
        };

        let cleaned: String = digits.chars().filter(|&c| c != '_').collect();
        let value = u64::from_str_radix(&cleaned, radix).map_err(|_| LexError {
            message: format!("Invalid integer literal: {}", digits),
            location: loc,
        })?;

        Ok(Token::Number(value, loc))
    }

    /// Consume `[A-Za-z0-9_]*`
    fn word(&mut self) -> String {
        let mut word = String::new();
        while let Some(ch) = self.peek() {
            if ch.is_ascii_alphanumeric() || ch == '_' {
                word.push(ch);
                self.advance();
            } else {
                break;
            }
        }
        word
    }

    /// Skip spaces, tabs and a trailing `#` comment, but not the line break
    fn skip_blanks_and_comment(&mut self) {
        while let Some(ch) = self.peek() {
            match ch {
                ' ' | '\t' | '\r' => {
                    self.advance();
                }
                '#' => {
                    while self.peek().is_some_and(|c| c != '\n') {
                        self.advance();
                    }
                }
                _ => break,
            }
        }
    }

    fn peek(&self) -> Option<char> {
        self.input.get(self.position).copied()
    }

    fn advance(&mut self) -> Option<char> {
        let ch = self.peek()?;
        self.position += 1;

        if ch == '\n' {
            self.line += 1;
            self.column = 1;
        } else {
            self.column += 1;
        }

        Some(ch)
    }

    fn is_at_end(&self) -> bool {
        self.position >= self.input.len()
    }

    fn current_location(&self) -> SourceLocation {
        SourceLocation::new(self.line, self.column)
    }
}
