//! Tokenizer and recursive-descent parser for expression templates.

use serde_json::Value;

use crate::expr::ExprError;

/// Parsed expression tree.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    /// Dotted field path, e.g. `currentVulnerability.cwe`.
    Path(Vec<String>),
    Unary {
        op: UnaryOp,
        operand: Box<Expr>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expr>,
        right: Box<Expr>,
    },
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum UnaryOp {
    Not,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    /// `+`: numeric addition or string concatenation.
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
}

#[derive(Debug, Clone, PartialEq)]
enum Token {
    Str(String),
    Num(serde_json::Number),
    Ident(String),
    True,
    False,
    Null,
    Plus,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Bang,
    Dot,
    LParen,
    RParen,
}

/// Parse a template into an expression tree.
pub fn parse(template: &str) -> Result<Expr, ExprError> {
    let tokens = tokenize(template)?;
    let mut parser = Parser {
        tokens,
        pos: 0,
        end: template.len(),
    };
    let expr = parser.or_expr()?;
    match parser.peek() {
        None => Ok(expr),
        Some((offset, _)) => Err(parse_error(offset, "unexpected trailing input")),
    }
}

fn parse_error(offset: usize, message: &str) -> ExprError {
    ExprError::Parse {
        offset,
        message: message.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tokenizer
// ---------------------------------------------------------------------------

fn tokenize(src: &str) -> Result<Vec<(usize, Token)>, ExprError> {
    let bytes = src.as_bytes();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < bytes.len() {
        let c = bytes[i] as char;
        match c {
            ' ' | '\t' | '\r' | '\n' => i += 1,
            '(' => {
                tokens.push((i, Token::LParen));
                i += 1;
            }
            ')' => {
                tokens.push((i, Token::RParen));
                i += 1;
            }
            '.' => {
                tokens.push((i, Token::Dot));
                i += 1;
            }
            '+' => {
                tokens.push((i, Token::Plus));
                i += 1;
            }
            '=' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((i, Token::EqEq));
                    i += 2;
                } else {
                    return Err(parse_error(i, "expected `==`"));
                }
            }
            '!' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((i, Token::NotEq));
                    i += 2;
                } else {
                    tokens.push((i, Token::Bang));
                    i += 1;
                }
            }
            '<' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((i, Token::Le));
                    i += 2;
                } else {
                    tokens.push((i, Token::Lt));
                    i += 1;
                }
            }
            '>' => {
                if bytes.get(i + 1) == Some(&b'=') {
                    tokens.push((i, Token::Ge));
                    i += 2;
                } else {
                    tokens.push((i, Token::Gt));
                    i += 1;
                }
            }
            '&' => {
                if bytes.get(i + 1) == Some(&b'&') {
                    tokens.push((i, Token::AndAnd));
                    i += 2;
                } else {
                    return Err(parse_error(i, "expected `&&`"));
                }
            }
            '|' => {
                if bytes.get(i + 1) == Some(&b'|') {
                    tokens.push((i, Token::OrOr));
                    i += 2;
                } else {
                    return Err(parse_error(i, "expected `||`"));
                }
            }
            '\'' | '"' => {
                let (token, next) = read_string(src, i)?;
                tokens.push((i, token));
                i = next;
            }
            '0'..='9' => {
                let (token, next) = read_number(src, i)?;
                tokens.push((i, token));
                i = next;
            }
            _ if c.is_ascii_alphabetic() || c == '_' => {
                let (token, next) = read_ident(src, i);
                tokens.push((i, token));
                i = next;
            }
            _ => return Err(parse_error(i, &format!("unexpected character `{c}`"))),
        }
    }

    Ok(tokens)
}

/// Read a quoted string literal with backslash escapes.
fn read_string(src: &str, start: usize) -> Result<(Token, usize), ExprError> {
    let bytes = src.as_bytes();
    let quote = bytes[start];
    let mut value = String::new();
    let mut i = start + 1;

    while i < bytes.len() {
        match bytes[i] {
            b'\\' => {
                let Some(&escaped) = bytes.get(i + 1) else {
                    return Err(parse_error(i, "dangling escape at end of input"));
                };
                value.push(match escaped {
                    b'n' => '\n',
                    b't' => '\t',
                    other => other as char,
                });
                i += 2;
            }
            b if b == quote => return Ok((Token::Str(value), i + 1)),
            b => {
                // multi-byte characters pass through untouched
                let ch_len = utf8_len(b);
                value.push_str(&src[i..i + ch_len]);
                i += ch_len;
            }
        }
    }

    Err(parse_error(start, "unterminated string literal"))
}

fn utf8_len(first_byte: u8) -> usize {
    match first_byte {
        b if b < 0x80 => 1,
        b if b < 0xE0 => 2,
        b if b < 0xF0 => 3,
        _ => 4,
    }
}

fn read_number(src: &str, start: usize) -> Result<(Token, usize), ExprError> {
    let bytes = src.as_bytes();
    let mut i = start;
    let mut saw_dot = false;

    while i < bytes.len() {
        match bytes[i] {
            b'0'..=b'9' => i += 1,
            // a dot starts a fraction only when followed by a digit, so
            // `1.field` stays a parse error rather than a silent path
            b'.' if !saw_dot && matches!(bytes.get(i + 1), Some(b'0'..=b'9')) => {
                saw_dot = true;
                i += 1;
            }
            _ => break,
        }
    }

    let text = &src[start..i];
    let number = if saw_dot {
        text.parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
    } else {
        text.parse::<i64>().ok().map(serde_json::Number::from)
    };

    match number {
        Some(n) => Ok((Token::Num(n), i)),
        None => Err(parse_error(start, &format!("invalid number `{text}`"))),
    }
}

fn read_ident(src: &str, start: usize) -> (Token, usize) {
    let bytes = src.as_bytes();
    let mut i = start;
    while i < bytes.len() && (bytes[i].is_ascii_alphanumeric() || bytes[i] == b'_') {
        i += 1;
    }
    let text = &src[start..i];
    let token = match text {
        "true" => Token::True,
        "false" => Token::False,
        "null" => Token::Null,
        _ => Token::Ident(text.to_string()),
    };
    (token, i)
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

struct Parser {
    tokens: Vec<(usize, Token)>,
    pos: usize,
    end: usize,
}

impl Parser {
    fn peek(&self) -> Option<(usize, &Token)> {
        self.tokens.get(self.pos).map(|(o, t)| (*o, t))
    }

    fn advance(&mut self) -> Option<(usize, Token)> {
        let token = self.tokens.get(self.pos).cloned();
        if token.is_some() {
            self.pos += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek().map(|(_, t)| t == expected).unwrap_or(false) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn or_expr(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.and_expr()?;
        while self.eat(&Token::OrOr) {
            let right = self.and_expr()?;
            left = binary(BinaryOp::Or, left, right);
        }
        Ok(left)
    }

    fn and_expr(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.cmp_expr()?;
        while self.eat(&Token::AndAnd) {
            let right = self.cmp_expr()?;
            left = binary(BinaryOp::And, left, right);
        }
        Ok(left)
    }

    /// A single, non-associative comparison.
    fn cmp_expr(&mut self) -> Result<Expr, ExprError> {
        let left = self.concat_expr()?;
        let op = match self.peek() {
            Some((_, Token::EqEq)) => BinaryOp::Eq,
            Some((_, Token::NotEq)) => BinaryOp::Ne,
            Some((_, Token::Lt)) => BinaryOp::Lt,
            Some((_, Token::Le)) => BinaryOp::Le,
            Some((_, Token::Gt)) => BinaryOp::Gt,
            Some((_, Token::Ge)) => BinaryOp::Ge,
            _ => return Ok(left),
        };
        self.pos += 1;
        let right = self.concat_expr()?;
        Ok(binary(op, left, right))
    }

    fn concat_expr(&mut self) -> Result<Expr, ExprError> {
        let mut left = self.unary_expr()?;
        while self.eat(&Token::Plus) {
            let right = self.unary_expr()?;
            left = binary(BinaryOp::Concat, left, right);
        }
        Ok(left)
    }

    fn unary_expr(&mut self) -> Result<Expr, ExprError> {
        if self.eat(&Token::Bang) {
            let operand = self.unary_expr()?;
            return Ok(Expr::Unary {
                op: UnaryOp::Not,
                operand: Box::new(operand),
            });
        }
        self.primary()
    }

    fn primary(&mut self) -> Result<Expr, ExprError> {
        let Some((offset, token)) = self.advance() else {
            return Err(parse_error(self.end, "unexpected end of input"));
        };
        match token {
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::Num(n) => Ok(Expr::Literal(Value::Number(n))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Ident(first) => {
                let mut segments = vec![first];
                while self.eat(&Token::Dot) {
                    match self.advance() {
                        Some((_, Token::Ident(seg))) => segments.push(seg),
                        Some((o, _)) => {
                            return Err(parse_error(o, "expected field name after `.`"))
                        }
                        None => return Err(parse_error(self.end, "expected field name after `.`")),
                    }
                }
                Ok(Expr::Path(segments))
            }
            Token::LParen => {
                let inner = self.or_expr()?;
                if self.eat(&Token::RParen) {
                    Ok(inner)
                } else {
                    Err(parse_error(self.end, "missing closing `)`"))
                }
            }
            _ => Err(parse_error(offset, "expected a value, field, or `(`")),
        }
    }
}

fn binary(op: BinaryOp, left: Expr, right: Expr) -> Expr {
    Expr::Binary {
        op,
        left: Box::new(left),
        right: Box::new(right),
    }
}
