use super::ast::{BinaryOp, CurrentRef, Expr, UnaryOp};
use super::lexer::{tokenize, Spanned, Token};
use super::ExprError;
use serde_json::Value;

// Binding powers, loosest first
const TERNARY: u8 = 1;
const OR: u8 = 2;
const AND: u8 = 3;
const EQUALITY: u8 = 4;
const COMPARISON: u8 = 5;
const ADDITIVE: u8 = 6;
const MULTIPLICATIVE: u8 = 7;
const PREFIX: u8 = 8;

pub fn parse(source: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(ExprError::Parse {
            message: "empty expression".into(),
            pos: 0,
        });
    }
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: source.chars().count(),
    };
    let expr = parser.expression(0)?;
    if let Some(extra) = parser.tokens.get(parser.pos) {
        return Err(ExprError::Parse {
            message: format!("unexpected token {:?}", extra.token),
            pos: extra.pos,
        });
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.pos).map(|s| &s.token)
    }

    fn offset(&self) -> usize {
        self.tokens.get(self.pos).map(|s| s.pos).unwrap_or(self.end)
    }

    fn advance(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.pos).map(|s| s.token.clone());
        self.pos += 1;
        token
    }

    fn error(&self, message: impl Into<String>) -> ExprError {
        ExprError::Parse {
            message: message.into(),
            pos: self.offset(),
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), ExprError> {
        match self.peek() {
            Some(token) if *token == expected => {
                self.pos += 1;
                Ok(())
            }
            Some(other) => Err(self.error(format!("expected {:?}, found {:?}", expected, other))),
            None => Err(self.error(format!("expected {:?}, found end of input", expected))),
        }
    }

    fn eat(&mut self, token: &Token) -> bool {
        if self.peek() == Some(token) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn expression(&mut self, min_bp: u8) -> Result<Expr, ExprError> {
        let mut left = self.prefix()?;

        loop {
            let (op, bp) = match self.peek() {
                Some(Token::Question) if TERNARY >= min_bp => {
                    self.pos += 1;
                    let then = self.expression(0)?;
                    self.expect(Token::Colon)?;
                    // right associative
                    let otherwise = self.expression(TERNARY)?;
                    left = Expr::Conditional(Box::new(left), Box::new(then), Box::new(otherwise));
                    continue;
                }
                Some(token) => match binary_op(token) {
                    Some(found) => found,
                    None => break,
                },
                None => break,
            };
            if bp < min_bp {
                break;
            }
            self.pos += 1;
            let right = self.expression(bp + 1)?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }

        Ok(left)
    }

    fn prefix(&mut self) -> Result<Expr, ExprError> {
        let start = self.offset();
        let token = match self.advance() {
            Some(token) => token,
            None => {
                return Err(ExprError::Parse {
                    message: "unexpected end of input".into(),
                    pos: start,
                })
            }
        };

        let expr = match token {
            Token::Int(n) => Expr::Literal(Value::from(n)),
            Token::Float(f) => Expr::Literal(
                serde_json::Number::from_f64(f)
                    .map(Value::Number)
                    .unwrap_or(Value::Null),
            ),
            Token::Str(s) => Expr::Literal(Value::String(s)),
            Token::True => Expr::Literal(Value::Bool(true)),
            Token::False => Expr::Literal(Value::Bool(false)),
            Token::Null => Expr::Literal(Value::Null),
            Token::Current(name) => Expr::Current(match name.as_str() {
                "index" => CurrentRef::Index,
                "acc" => CurrentRef::Accumulator,
                _ => CurrentRef::Element,
            }),
            Token::Minus => {
                let operand = self.expression(PREFIX)?;
                match operand {
                    Expr::Literal(Value::Number(n)) => Expr::Literal(negate_literal(&n)),
                    other => Expr::Unary(UnaryOp::Neg, Box::new(other)),
                }
            }
            Token::Not => Expr::Unary(UnaryOp::Not, Box::new(self.expression(PREFIX)?)),
            Token::LParen => {
                let inner = self.expression(0)?;
                self.expect(Token::RParen)?;
                inner
            }
            Token::LBracket => Expr::Array(self.list(Token::RBracket)?),
            Token::LBrace => self.object()?,
            Token::Ident(name) => {
                if self.eat(&Token::LParen) {
                    Expr::Call(name, self.list(Token::RParen)?)
                } else {
                    Expr::Ident(name)
                }
            }
            other => {
                return Err(ExprError::Parse {
                    message: format!("unexpected token {:?}", other),
                    pos: start,
                })
            }
        };

        self.postfix(expr)
    }

    fn postfix(&mut self, mut expr: Expr) -> Result<Expr, ExprError> {
        loop {
            match self.peek() {
                Some(Token::Dot) => {
                    self.pos += 1;
                    let field = match self.advance() {
                        Some(Token::Ident(name)) => name,
                        // keywords are valid field names after a dot
                        Some(Token::In) => "in".to_string(),
                        Some(Token::And) => "and".to_string(),
                        Some(Token::Or) => "or".to_string(),
                        Some(Token::Not) => "not".to_string(),
                        Some(Token::Null) => "null".to_string(),
                        Some(Token::True) => "true".to_string(),
                        Some(Token::False) => "false".to_string(),
                        Some(Token::Int(n)) => n.to_string(),
                        _ => {
                            self.pos -= 1;
                            return Err(self.error("expected field name after '.'"));
                        }
                    };
                    expr = Expr::Member(Box::new(expr), field);
                }
                Some(Token::LBracket) => {
                    self.pos += 1;
                    let index = self.expression(0)?;
                    self.expect(Token::RBracket)?;
                    expr = Expr::Index(Box::new(expr), Box::new(index));
                }
                _ => return Ok(expr),
            }
        }
    }

    fn list(&mut self, close: Token) -> Result<Vec<Expr>, ExprError> {
        let mut items = Vec::new();
        if self.eat(&close) {
            return Ok(items);
        }
        loop {
            items.push(self.expression(0)?);
            if self.eat(&Token::Comma) {
                // trailing comma
                if self.eat(&close) {
                    return Ok(items);
                }
                continue;
            }
            self.expect(close.clone())?;
            return Ok(items);
        }
    }

    fn object(&mut self) -> Result<Expr, ExprError> {
        let mut fields = Vec::new();
        if self.eat(&Token::RBrace) {
            return Ok(Expr::Object(fields));
        }
        loop {
            let key = match self.advance() {
                Some(Token::Ident(name)) | Some(Token::Str(name)) => name,
                _ => {
                    self.pos -= 1;
                    return Err(self.error("expected object key"));
                }
            };
            self.expect(Token::Colon)?;
            let value = self.expression(0)?;
            fields.push((key, value));
            if self.eat(&Token::Comma) {
                if self.eat(&Token::RBrace) {
                    break;
                }
                continue;
            }
            self.expect(Token::RBrace)?;
            break;
        }
        Ok(Expr::Object(fields))
    }
}

fn binary_op(token: &Token) -> Option<(BinaryOp, u8)> {
    Some(match token {
        Token::Or => (BinaryOp::Or, OR),
        Token::And => (BinaryOp::And, AND),
        Token::Eq => (BinaryOp::Eq, EQUALITY),
        Token::Ne => (BinaryOp::Ne, EQUALITY),
        Token::Lt => (BinaryOp::Lt, COMPARISON),
        Token::Le => (BinaryOp::Le, COMPARISON),
        Token::Gt => (BinaryOp::Gt, COMPARISON),
        Token::Ge => (BinaryOp::Ge, COMPARISON),
        Token::In => (BinaryOp::In, COMPARISON),
        Token::Plus => (BinaryOp::Add, ADDITIVE),
        Token::Minus => (BinaryOp::Sub, ADDITIVE),
        Token::Star => (BinaryOp::Mul, MULTIPLICATIVE),
        Token::Slash => (BinaryOp::Div, MULTIPLICATIVE),
        Token::Percent => (BinaryOp::Rem, MULTIPLICATIVE),
        _ => return None,
    })
}

fn negate_literal(n: &serde_json::Number) -> Value {
    if let Some(i) = n.as_i64() {
        if let Some(negated) = i.checked_neg() {
            return Value::from(negated);
        }
    }
    n.as_f64()
        .and_then(|f| serde_json::Number::from_f64(-f))
        .map(Value::Number)
        .unwrap_or(Value::Null)
}
