//! Recursive-descent parser.
//!
//! Precedence, lowest first:
//!
//! ```text
//! or  ─▶ and ─▶ not ─▶ comparison ─▶ + - ─▶ * / % ─▶ ^ ─▶ unary - ─▶ ( )
//! ```

use super::{
    ast::{BinaryOp, Expr, Function, UnaryOp, VariableKind, VariableRef},
    lexer::{parse_error, tokenize, Spanned, Token},
};
use crate::error::ExpressionError;

type ParseResult = Result<Expr, ExpressionError>;

pub fn parse(source: &str) -> ParseResult {
    let tokens = tokenize(source)?;
    let mut parser = Parser {
        tokens,
        index: 0,
        end: source.len(),
    };
    let expr = parser.or()?;
    match parser.tokens.get(parser.index) {
        None => Ok(expr),
        Some(extra) => Err(parse_error(
            extra.position,
            format!("unexpected {:?}", extra.token),
        )),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    index: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.index).map(|s| &s.token)
    }

    fn position(&self) -> usize {
        self.tokens.get(self.index).map_or(self.end, |s| s.position)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.index).map(|s| s.token.clone());
        self.index += 1;
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.index += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: Token, what: &str) -> Result<(), ExpressionError> {
        if self.eat(&expected) {
            Ok(())
        } else {
            Err(parse_error(self.position(), format!("expected {what}")))
        }
    }

    fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
        Expr::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    fn or(&mut self) -> ParseResult {
        let mut left = self.and()?;
        while self.eat(&Token::Or) {
            let right = self.and()?;
            left = Self::binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn and(&mut self) -> ParseResult {
        let mut left = self.not()?;
        while self.eat(&Token::And) {
            let right = self.not()?;
            left = Self::binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    fn not(&mut self) -> ParseResult {
        if self.eat(&Token::Not) {
            let operand = self.not()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.comparison()
    }

    fn comparison(&mut self) -> ParseResult {
        let mut left = self.additive()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::Ne) => BinaryOp::Ne,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Ge) => BinaryOp::Ge,
                Some(Token::Le) => BinaryOp::Le,
                _ => return Ok(left),
            };
            self.index += 1;
            let right = self.additive()?;
            left = Self::binary(op, left, right);
        }
    }

    fn additive(&mut self) -> ParseResult {
        let mut left = self.multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => return Ok(left),
            };
            self.index += 1;
            let right = self.multiplicative()?;
            left = Self::binary(op, left, right);
        }
    }

    fn multiplicative(&mut self) -> ParseResult {
        let mut left = self.power()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => return Ok(left),
            };
            self.index += 1;
            let right = self.power()?;
            left = Self::binary(op, left, right);
        }
    }

    /// Right associative: `2 ^ 3 ^ 2` is `2 ^ (3 ^ 2)`.
    fn power(&mut self) -> ParseResult {
        let base = self.unary()?;
        if self.eat(&Token::Caret) {
            let exponent = self.power()?;
            return Ok(Self::binary(BinaryOp::Pow, base, exponent));
        }
        Ok(base)
    }

    fn unary(&mut self) -> ParseResult {
        if self.eat(&Token::Minus) {
            let operand = self.unary()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Negate,
                operand: Box::new(operand),
            });
        }
        if self.eat(&Token::Plus) {
            return self.unary();
        }
        self.primary()
    }

    fn primary(&mut self) -> ParseResult {
        let position = self.position();
        let token = self
            .advance()
            .ok_or_else(|| parse_error(position, "unexpected end of expression"))?;

        match token {
            Token::Number(value) => Ok(Expr::Number { value }),
            Token::Text(value) => Ok(Expr::Text { value }),
            Token::True => Ok(Expr::Bool { value: true }),
            Token::False => Ok(Expr::Bool { value: false }),
            Token::Null => Ok(Expr::Null),
            Token::Variable(kind, name) => Ok(Expr::Variable(VariableRef { kind, name })),
            Token::LParen => {
                let inner = self.or()?;
                self.expect(Token::RParen, "')'")?;
                Ok(inner)
            }
            Token::Ident(name) if self.peek() == Some(&Token::LParen) => {
                self.index += 1;
                let function = Function::from_name(&name)
                    .ok_or_else(|| ExpressionError::UnknownFunction(name.clone()))?;
                let args = self.arguments()?;
                Ok(Expr::Call { function, args })
            }
            Token::Ident(name) => Ok(Expr::Variable(VariableRef {
                kind: VariableKind::Plain,
                name,
            })),
            other => Err(parse_error(position, format!("unexpected {other:?}"))),
        }
    }

    /// Comma separated arguments up to the closing parenthesis.
    fn arguments(&mut self) -> Result<Vec<Expr>, ExpressionError> {
        let mut args = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok(args);
        }
        loop {
            args.push(self.or()?);
            if self.eat(&Token::RParen) {
                return Ok(args);
            }
            self.expect(Token::Comma, "',' or ')'")?;
        }
    }
}
