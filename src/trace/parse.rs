//! Line-oriented recursive descent parser for memory traces
//!
//! Every statement occupies one line and starts with a keyword (or a `%name =`
//! binding). The grammar, one production per statement:
//!
//! ```text
//! range   <start> <end> <chunk>          first statement only
//! alloc   <addr> <size> <fill> <prov>    fill: uninit|unknown|zero|fill(<byte>)
//! store   <addr> [<byte> ...] | "text"
//! load    <addr> <len>
//! memset  <addr> <byte> <size>
//! memchr  <addr> <byte> [<limit>]
//! memmove <src> <dst> <size>
//! free    <addr> <prov>                  prov: malloc|alloca|global
//! %name = malloc <size> [uninit|zero|unknown]
//! %name = calloc <count> <elem_size>
//! %name = alloca <count> [<elem_size>]
//! %name = global <size>
//! storeint <addr> <value> <width>
//! loadint  <addr> <width>
//! strlen   <addr>
//! frame push | frame pop
//! release  <addr>
//! ```
//!
//! `<addr>` is a number or `%name[+offset]`.

use super::ast::*;
use super::lexer::{LexError, Lexer, Token};
use crate::memory::MallocFill;

/// Parser error type
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("Parse error at line {}, column {}: {message}", .location.line, .location.column)]
pub struct ParseError {
    pub message: String,
    pub location: SourceLocation,
}

impl From<LexError> for ParseError {
    fn from(err: LexError) -> Self {
        ParseError {
            message: err.message,
            location: err.location,
        }
    }
}

/// Recursive descent parser for traces
pub struct Parser {
    tokens: Vec<Token>,
    position: usize,
}

impl Parser {
    pub fn new(source: &str) -> Result<Self, ParseError> {
        let tokens = Lexer::new(source).tokenize()?;
        Ok(Self {
            tokens,
            position: 0,
        })
    }

    /// Parse the whole trace
    pub fn parse_program(&mut self) -> Result<Program, ParseError> {
        let mut program = Program::new();

        loop {
            match self.peek_token() {
                Token::Eof(_) => break,
                Token::Newline(_) => {
                    self.advance();
                    continue;
                }
                _ => {}
            }

            if let Token::Ident(word, location) = self.peek_token() {
                if word == "range" {
                    if program.range.is_some() || !program.statements.is_empty() {
                        return Err(self.error_at(location, "'range' must be the first statement"));
                    }
                    self.advance();
                    program.range = Some(self.parse_range(location)?);
                    self.end_of_line()?;
                    continue;
                }
            }

            let statement = self.parse_statement()?;
            program.statements.push(statement);
            self.end_of_line()?;
        }

        Ok(program)
    }

    fn parse_range(&mut self, location: SourceLocation) -> Result<RangeDirective, ParseError> {
        let start = self.expect_number("range start")?;
        let end = self.expect_number("range end")?;
        let chunk_size = self.expect_number("chunk size")?;
        Ok(RangeDirective {
            start,
            end,
            chunk_size,
            location,
        })
    }

    fn parse_statement(&mut self) -> Result<Statement, ParseError> {
        let token = self.advance();
        let location = token.location();

        let kind = match token {
            Token::Var(name, _) => {
                self.expect_eq()?;
                let binding = self.parse_binding()?;
                StatementKind::Bind { name, binding }
            }
            Token::Ident(keyword, _) => match keyword.as_str() {
                "alloc" => StatementKind::Alloc {
                    at: self.parse_operand()?,
                    size: self.expect_number("allocation size")?,
                    fill: self.parse_fill()?,
                    provenance: self.parse_provenance()?,
                },
                "store" => {
                    let at = self.parse_operand()?;
                    let data = self.parse_payload()?;
                    StatementKind::Store { at, data }
                }
                "load" => StatementKind::Load {
                    at: self.parse_operand()?,
                    len: self.expect_number("load length")?,
                },
                "memset" => StatementKind::Memset {
                    at: self.parse_operand()?,
                    fill: self.expect_byte()?,
                    size: self.expect_number("memset size")?,
                },
                "memchr" => StatementKind::Memchr {
                    at: self.parse_operand()?,
                    ch: self.expect_byte()?,
                    limit: self.optional_number(),
                },
                "memmove" => StatementKind::Memmove {
                    src: self.parse_operand()?,
                    dst: self.parse_operand()?,
                    size: self.expect_number("memmove size")?,
                },
                "free" => StatementKind::Free {
                    at: self.parse_operand()?,
                    provenance: self.parse_provenance()?,
                },
                "storeint" => StatementKind::StoreInt {
                    at: self.parse_operand()?,
                    value: self.expect_number("integer value")?,
                    width: self.expect_width()?,
                },
                "loadint" => StatementKind::LoadInt {
                    at: self.parse_operand()?,
                    width: self.expect_width()?,
                },
                "strlen" => StatementKind::Strlen {
                    at: self.parse_operand()?,
                },
                "release" => StatementKind::Release {
                    at: self.parse_operand()?,
                },
                "frame" => match self.expect_ident("'push' or 'pop'")?.as_str() {
                    "push" => StatementKind::FramePush,
                    "pop" => StatementKind::FramePop,
                    other => {
                        return Err(self.error_at(
                            location,
                            &format!("Expected 'push' or 'pop' after 'frame', found '{}'", other),
                        ))
                    }
                },
                other => {
                    return Err(self.error_at(location, &format!("Unknown statement '{}'", other)));
                }
            },
            other => {
                return Err(self.error_at(
                    location,
                    &format!("Expected a statement, found {}", other),
                ));
            }
        };

        Ok(Statement { kind, location })
    }

    fn parse_binding(&mut self) -> Result<Binding, ParseError> {
        let location = self.peek_token().location();
        let op = self.expect_ident("an allocation function")?;

        match op.as_str() {
            "malloc" => {
                let size = self.expect_number("allocation size")?;
                let fill = match self.peek_token() {
                    Token::Ident(word, loc) => {
                        self.advance();
                        match word.as_str() {
                            "uninit" => MallocFill::Uninit,
                            "zero" => MallocFill::Zero,
                            "unknown" => MallocFill::Unknown,
                            _ => {
                                return Err(self.error_at(
                                    loc,
                                    &format!("Unknown malloc fill '{}'", word),
                                ))
                            }
                        }
                    }
                    _ => MallocFill::default(),
                };
                Ok(Binding::Malloc { size, fill })
            }
            "calloc" => Ok(Binding::Calloc {
                count: self.expect_number("element count")?,
                elem_size: self.expect_number("element size")?,
            }),
            "alloca" => Ok(Binding::Alloca {
                count: self.expect_number("element count")?,
                elem_size: self.optional_number().unwrap_or(1),
            }),
            "global" => Ok(Binding::Global {
                size: self.expect_number("global size")?,
            }),
            other => Err(self.error_at(
                location,
                &format!("Unknown allocation function '{}'", other),
            )),
        }
    }

    fn parse_operand(&mut self) -> Result<Operand, ParseError> {
        match self.advance() {
            Token::Number(addr, _) => Ok(Operand::Literal(addr)),
            Token::Var(name, _) => {
                let offset = if matches!(self.peek_token(), Token::Plus(_)) {
                    self.advance();
                    self.expect_number("offset")?
                } else {
                    0
                };
                Ok(Operand::Named { name, offset })
            }
            other => Err(self.error_at(
                other.location(),
                &format!("Expected an address, found {}", other),
            )),
        }
    }

    fn parse_fill(&mut self) -> Result<FillSpec, ParseError> {
        let location = self.peek_token().location();
        match self.expect_ident("a fill (uninit, unknown, zero, fill(<byte>))")?.as_str() {
            "uninit" => Ok(FillSpec::Uninit),
            "unknown" => Ok(FillSpec::Unknown),
            "zero" => Ok(FillSpec::Zero),
            "fill" => {
                self.expect(|t| matches!(t, Token::LParen(_)), "'('")?;
                let byte = self.expect_byte()?;
                self.expect(|t| matches!(t, Token::RParen(_)), "')'")?;
                Ok(FillSpec::Byte(byte))
            }
            other => Err(self.error_at(location, &format!("Unknown fill '{}'", other))),
        }
    }

    fn parse_provenance(&mut self) -> Result<Provenance, ParseError> {
        let location = self.peek_token().location();
        match self.expect_ident("a provenance (malloc, alloca, global)")?.as_str() {
            "malloc" => Ok(Provenance::Malloc),
            "alloca" => Ok(Provenance::Alloca),
            "global" => Ok(Provenance::Global),
            other => Err(self.error_at(location, &format!("Unknown provenance '{}'", other))),
        }
    }

    /// `[b0 b1 ...]` or a string literal (no terminator added)
    fn parse_payload(&mut self) -> Result<Vec<u8>, ParseError> {
        match self.advance() {
            Token::StringLiteral(text, _) => Ok(text.into_bytes()),
            Token::LBracket(_) => {
                let mut bytes = Vec::new();
                loop {
                    match self.peek_token() {
                        Token::RBracket(_) => {
                            self.advance();
                            return Ok(bytes);
                        }
                        _ => bytes.push(self.expect_byte()?),
                    }
                }
            }
            other => Err(self.error_at(
                other.location(),
                &format!("Expected a byte list or string, found {}", other),
            )),
        }
    }

    // ===== Helper methods =====

    fn peek_token(&self) -> Token {
        self.tokens
            .get(self.position)
            .or_else(|| self.tokens.last())
            .cloned()
            .unwrap_or(Token::Eof(SourceLocation::new(1, 1)))
    }

    fn advance(&mut self) -> Token {
        let token = self.peek_token();
        if !matches!(token, Token::Eof(_)) {
            self.position += 1;
        }
        token
    }

    fn end_of_line(&mut self) -> Result<(), ParseError> {
        match self.advance() {
            Token::Newline(_) | Token::Eof(_) => Ok(()),
            other => Err(self.error_at(
                other.location(),
                &format!("Expected end of line, found {}", other),
            )),
        }
    }

    fn expect(&mut self, accept: impl Fn(&Token) -> bool, what: &str) -> Result<Token, ParseError> {
        let token = self.advance();
        if accept(&token) {
            Ok(token)
        } else {
            Err(self.error_at(token.location(), &format!("Expected {}, found {}", what, token)))
        }
    }

    fn expect_eq(&mut self) -> Result<(), ParseError> {
        self.expect(|t| matches!(t, Token::Eq(_)), "'='").map(|_| ())
    }

    fn expect_ident(&mut self, what: &str) -> Result<String, ParseError> {
        match self.advance() {
            Token::Ident(word, _) => Ok(word),
            other => Err(self.error_at(
                other.location(),
                &format!("Expected {}, found {}", what, other),
            )),
        }
    }

    fn expect_number(&mut self, what: &str) -> Result<u64, ParseError> {
        match self.advance() {
            Token::Number(value, _) => Ok(value),
            other => Err(self.error_at(
                other.location(),
                &format!("Expected {}, found {}", what, other),
            )),
        }
    }

    fn optional_number(&mut self) -> Option<u64> {
        match self.peek_token() {
            Token::Number(value, _) => {
                self.advance();
                Some(value)
            }
            _ => None,
        }
    }

    fn expect_byte(&mut self) -> Result<u8, ParseError> {
        let location = self.peek_token().location();
        let value = self.expect_number("a byte")?;
        u8::try_from(value)
            .map_err(|_| self.error_at(location, &format!("Byte value {} is out of range", value)))
    }

    fn expect_width(&mut self) -> Result<usize, ParseError> {
        let location = self.peek_token().location();
        let value = self.expect_number("an integer width")?;
        match value {
            1..=8 => Ok(value as usize),
            _ => Err(self.error_at(
                location,
                &format!("Integer width {} is not between 1 and 8", value),
            )),
        }
    }

    fn error_at(&self, location: SourceLocation, message: &str) -> ParseError {
        ParseError {
            message: message.to_string(),
            location,
        }
    }
}

/// Parse a whole trace in one call
pub fn parse_trace(source: &str) -> Result<Program, ParseError> {
    Parser::new(source)?.parse_program()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(source: &str) -> Program {
        parse_trace(source).unwrap()
    }

    #[test]
    fn test_core_statements() {
        let program = parse(
            "alloc 0x1000 16 unknown malloc\n\
             store 0x1000 [1 2 3]\n\
             load 0x1000 3\n\
             memset 0x1000 0x41 16\n\
             memchr 0x1000 0x41\n\
             memmove 0x1000 0x2000 16\n\
             free 0x1000 malloc\n",
        );

        assert!(program.range.is_none());
        assert_eq!(program.statements.len(), 7);
        assert_eq!(
            program.statements[0].kind,
            StatementKind::Alloc {
                at: Operand::Literal(0x1000),
                size: 16,
                fill: FillSpec::Unknown,
                provenance: Provenance::Malloc,
            }
        );
        assert_eq!(
            program.statements[1].kind,
            StatementKind::Store {
                at: Operand::Literal(0x1000),
                data: vec![1, 2, 3],
            }
        );
        assert!(matches!(
            program.statements[4].kind,
            StatementKind::Memchr { ch: 0x41, limit: None, .. }
        ));
        assert_eq!(program.statements[6].location, SourceLocation::new(7, 1));
    }

    #[test]
    fn test_range_and_bindings() {
        let program = parse(
            "# layout\n\
             range 0 0x10000 0x100\n\
             %p = malloc 16 zero\n\
             %s = alloca 4\n\
             store %p+4 \"hi\"\n\
             frame push\n",
        );

        let range = program.range.unwrap();
        assert_eq!((range.start, range.end, range.chunk_size), (0, 0x10000, 0x100));
        assert_eq!(
            program.statements[0].kind,
            StatementKind::Bind {
                name: "p".to_string(),
                binding: Binding::Malloc {
                    size: 16,
                    fill: MallocFill::Zero,
                },
            }
        );
        assert_eq!(
            program.statements[1].kind,
            StatementKind::Bind {
                name: "s".to_string(),
                binding: Binding::Alloca {
                    count: 4,
                    elem_size: 1,
                },
            }
        );
        assert_eq!(
            program.statements[2].kind,
            StatementKind::Store {
                at: Operand::Named {
                    name: "p".to_string(),
                    offset: 4,
                },
                data: b"hi".to_vec(),
            }
        );
        assert_eq!(program.statements[3].kind, StatementKind::FramePush);
    }

    #[test]
    fn test_fill_byte() {
        let program = parse("alloc 0 8 fill(0x41) global");
        assert!(matches!(
            program.statements[0].kind,
            StatementKind::Alloc {
                fill: FillSpec::Byte(0x41),
                provenance: Provenance::Global,
                ..
            }
        ));
    }

    #[test]
    fn test_errors_carry_location() {
        let err = parse_trace("load 0 1\nfrobnicate 1").unwrap_err();
        assert_eq!(err.location, SourceLocation::new(2, 1));

        let err = parse_trace("memset 0 256 1").unwrap_err();
        assert!(err.message.contains("out of range"));

        let err = parse_trace("load 0 1\nrange 0 16 16").unwrap_err();
        assert!(err.message.contains("first statement"));

        assert!(parse_trace("load 0 1 2").is_err());
        assert!(parse_trace("storeint 0 1 9").is_err());
        assert!(parse_trace("free 0 heap").is_err());
        assert!(parse_trace("frame jump").is_err());
    }
}
