use crate::lexer::{LexerError, Token, Tokenizer};

pub mod lexer;

/// One directive of an nginx-style configuration file: a name, its
/// arguments, and either a `;` terminator or a `{ ... }` block of nested
/// directives.
#[derive(Debug, Clone, PartialEq)]
pub struct Directive {
    pub name: String,
    pub args: Vec<String>,
    pub block: Option<Vec<Directive>>,
    pub line: usize,
}

impl Directive {
    pub fn arg(&self, i: usize) -> Option<&str> {
        self.args.get(i).map(|s| s.as_str())
    }
}

#[derive(Debug)]
pub enum ConfError {
    Lexer(LexerError),
    Unexpected { found: String, line: usize },
    Generic(String),
}

impl std::fmt::Display for ConfError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConfError::Lexer(e) => write!(f, "{}", e),
            ConfError::Unexpected { found, line } => {
                write!(f, "unexpected {} on line {}", found, line)
            }
            ConfError::Generic(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ConfError {}

impl From<LexerError> for ConfError {
    fn from(e: LexerError) -> Self {
        ConfError::Lexer(e)
    }
}

pub struct Parser<'a> {
    tokenizer: Tokenizer<'a>,
    lookahead: Token,
    lookahead_line: usize,
}

impl<'a> Parser<'a> {
    pub fn new(source: &'a str) -> Result<Self, ConfError> {
        let mut tokenizer = Tokenizer::new(source);
        let first = tokenizer.next_token()?;
        let first_line = tokenizer.token_line;
        Ok(Self {
            tokenizer,
            lookahead: first,
            lookahead_line: first_line,
        })
    }

    fn advance(&mut self) -> Result<Token, ConfError> {
        let next = self.tokenizer.next_token()?;
        self.lookahead_line = self.tokenizer.token_line;
        Ok(std::mem::replace(&mut self.lookahead, next))
    }

    fn unexpected(&self) -> ConfError {
        ConfError::Unexpected {
            found: self.lookahead.describe(),
            line: self.lookahead_line,
        }
    }

    pub fn parse(&mut self) -> Result<Vec<Directive>, ConfError> {
        let directives = self.parse_directives()?;
        match self.lookahead {
            Token::Eof => Ok(directives),
            _ => Err(self.unexpected()),
        }
    }

    // directive := word word* ( ';' | '{' directive* '}' )
    fn parse_directives(&mut self) -> Result<Vec<Directive>, ConfError> {
        let mut directives = Vec::new();

        while let Token::Word(_) = self.lookahead {
            let line = self.lookahead_line;
            let Token::Word(name) = self.advance()? else {
                unreachable!()
            };

            let mut args = Vec::new();
            while let Token::Word(_) = self.lookahead {
                let Token::Word(arg) = self.advance()? else {
                    unreachable!()
                };
                args.push(arg);
            }

            let block = match self.lookahead {
                Token::Semicolon => {
                    self.advance()?;
                    None
                }
                Token::OpenCurly => {
                    self.advance()?;
                    let inner = self.parse_directives()?;
                    match self.lookahead {
                        Token::CloseCurly => {
                            self.advance()?;
                        }
                        _ => return Err(self.unexpected()),
                    }
                    Some(inner)
                }
                _ => return Err(self.unexpected()),
            };

            directives.push(Directive {
                name,
                args,
                block,
                line,
            });
        }

        Ok(directives)
    }
}

pub fn parse(source: &str) -> Result<Vec<Directive>, ConfError> {
    Parser::new(source)?.parse()
}
