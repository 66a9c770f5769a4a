//! Tokenizer for expression text.

use super::ast::VariableKind;
use crate::error::ExpressionError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Number(f64),
    Text(String),
    Ident(String),
    Variable(VariableKind, String),
    True,
    False,
    Null,
    And,
    Or,
    Not,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Caret,
    Eq,
    Ne,
    Gt,
    Lt,
    Ge,
    Le,
    LParen,
    RParen,
    Comma,
}

/// A token and the byte offset where it starts.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub position: usize,
}

pub fn tokenize(source: &str) -> Result<Vec<Spanned>, ExpressionError> {
    Lexer {
        source,
        chars: source.char_indices().collect(),
        index: 0,
    }
    .run()
}

struct Lexer<'a> {
    source: &'a str,
    chars: Vec<(usize, char)>,
    index: usize,
}

impl Lexer<'_> {
    fn run(mut self) -> Result<Vec<Spanned>, ExpressionError> {
        let mut tokens = Vec::new();

        while let Some((position, c)) = self.peek() {
            if c.is_whitespace() {
                self.index += 1;
                continue;
            }

            let token = match c {
                '0'..='9' | '.' => self.number(position)?,
                '\'' | '"' => self.text(position, c)?,
                '#' => {
                    self.index += 1;
                    self.braced(position, VariableKind::DataItem)?
                }
                c if is_ident_start(c) => self.word(position)?,
                _ => self.operator(position, c)?,
            };
            tokens.push(Spanned { token, position });
        }

        Ok(tokens)
    }

    fn peek(&self) -> Option<(usize, char)> {
        self.chars.get(self.index).copied()
    }

    fn peek_char(&self, ahead: usize) -> Option<char> {
        self.chars.get(self.index + ahead).map(|&(_, c)| c)
    }

    fn offset(&self) -> usize {
        self.peek().map_or(self.source.len(), |(i, _)| i)
    }

    fn peek_back(&self) -> Option<char> {
        self.index
            .checked_sub(1)
            .and_then(|i| self.chars.get(i))
            .map(|&(_, c)| c)
    }

    fn number(&mut self, start: usize) -> Result<Token, ExpressionError> {
        let start_index = self.index;
        while let Some(c) = self.peek_char(0) {
            let after_exponent = self.index > start_index && matches!(self.peek_back(), Some('e' | 'E'));
            if c.is_ascii_digit() || matches!(c, '.' | 'e' | 'E') || (matches!(c, '+' | '-') && after_exponent) {
                self.index += 1;
            } else {
                break;
            }
        }
        let text = &self.source[start..self.offset()];
        text.parse()
            .map(Token::Number)
            .map_err(|_| parse_error(start, format!("invalid number '{text}'")))
    }

    fn text(&mut self, start: usize, quote: char) -> Result<Token, ExpressionError> {
        self.index += 1;
        let mut value = String::new();
        loop {
            match self.peek_char(0) {
                None => return Err(parse_error(start, "unterminated string")),
                Some(c) if c == quote => {
                    self.index += 1;
                    return Ok(Token::Text(value));
                }
                Some('\\') => {
                    let escaped = self
                        .peek_char(1)
                        .ok_or_else(|| parse_error(start, "unterminated string"))?;
                    value.push(match escaped {
                        'n' => '\n',
                        't' => '\t',
                        other => other,
                    });
                    self.index += 2;
                }
                Some(c) => {
                    value.push(c);
                    self.index += 1;
                }
            }
        }
    }

    /// `{name}` following a variable sigil.
    fn braced(&mut self, start: usize, kind: VariableKind) -> Result<Token, ExpressionError> {
        if self.peek_char(0) != Some('{') {
            return Err(parse_error(start, "expected '{' after variable prefix"));
        }
        self.index += 1;
        let name_start = self.offset();
        loop {
            match self.peek_char(0) {
                None => return Err(parse_error(start, "unterminated variable reference")),
                Some('}') => break,
                Some(_) => self.index += 1,
            }
        }
        let name = self.source[name_start..self.offset()].trim().to_string();
        self.index += 1;
        if name.is_empty() {
            return Err(parse_error(start, "empty variable reference"));
        }
        Ok(Token::Variable(kind, name))
    }

    fn word(&mut self, start: usize) -> Result<Token, ExpressionError> {
        if let (Some(sigil), Some('{')) = (self.peek_char(0), self.peek_char(1)) {
            let kind = match sigil {
                'A' => Some(VariableKind::Attribute),
                'C' => Some(VariableKind::Constant),
                'V' => Some(VariableKind::ProgramVariable),
                _ => None,
            };
            if let Some(kind) = kind {
                self.index += 1;
                return self.braced(start, kind);
            }
        }

        while matches!(self.peek_char(0), Some(c) if is_ident_char(c)) {
            self.index += 1;
        }
        // Namespaced function names such as `d2:daysBetween`.
        if self.peek_char(0) == Some(':') && matches!(self.peek_char(1), Some(c) if is_ident_start(c)) {
            self.index += 1;
            while matches!(self.peek_char(0), Some(c) if is_ident_char(c)) {
                self.index += 1;
            }
        }

        let word = &self.source[start..self.offset()];
        Ok(match word.to_ascii_lowercase().as_str() {
            "and" => Token::And,
            "or" => Token::Or,
            "not" => Token::Not,
            "true" => Token::True,
            "false" => Token::False,
            "null" => Token::Null,
            _ => Token::Ident(word.to_string()),
        })
    }

    fn operator(&mut self, position: usize, c: char) -> Result<Token, ExpressionError> {
        let next = self.peek_char(1);
        let (token, width) = match (c, next) {
            ('&', Some('&')) => (Token::And, 2),
            ('|', Some('|')) => (Token::Or, 2),
            ('=', Some('=')) => (Token::Eq, 2),
            ('!', Some('=')) => (Token::Ne, 2),
            ('>', Some('=')) => (Token::Ge, 2),
            ('<', Some('=')) => (Token::Le, 2),
            ('=', _) => (Token::Eq, 1),
            ('!', _) => (Token::Not, 1),
            ('>', _) => (Token::Gt, 1),
            ('<', _) => (Token::Lt, 1),
            ('+', _) => (Token::Plus, 1),
            ('-', _) => (Token::Minus, 1),
            ('*', _) => (Token::Star, 1),
            ('/', _) => (Token::Slash, 1),
            ('%', _) => (Token::Percent, 1),
            ('^', _) => (Token::Caret, 1),
            ('(', _) => (Token::LParen, 1),
            (')', _) => (Token::RParen, 1),
            (',', _) => (Token::Comma, 1),
            _ => return Err(parse_error(position, format!("unexpected character '{c}'"))),
        };
        self.index += width;
        Ok(token)
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_alphanumeric() || c == '_' || c == '.'
}

pub(crate) fn parse_error(position: usize, message: impl Into<String>) -> ExpressionError {
    ExpressionError::Parse {
        position,
        message: message.into(),
    }
}
