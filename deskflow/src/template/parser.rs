use super::lexer::{tokenize, Token};
use crate::errors::RenderError;
use serde_json::Value;

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum BinaryOp {
    Add,
    Sub,
    Mul,
    Div,
    FloorDiv,
    Mod,
    Concat,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    NotIn,
}

/// Expression tree for one `{{ ... }}` block.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    List(Vec<Expr>),
    Var(String),
    Attr(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Call {
        name: String,
        args: Vec<Expr>,
        kwargs: Vec<(String, Expr)>,
    },
    Filter {
        input: Box<Expr>,
        name: String,
        args: Vec<Expr>,
    },
    Test {
        input: Box<Expr>,
        name: String,
        negated: bool,
    },
    Not(Box<Expr>),
    Neg(Box<Expr>),
    And(Box<Expr>, Box<Expr>),
    Or(Box<Expr>, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Conditional {
        then: Box<Expr>,
        cond: Box<Expr>,
        otherwise: Option<Box<Expr>>,
    },
}

/// Parse the body of a `{{ ... }}` block into an expression.
pub fn parse_expression(source: &str) -> Result<Expr, RenderError> {
    let tokens = tokenize(source)?;
    if tokens.is_empty() {
        return Err(RenderError::Syntax("expected an expression, got '{{ }}'".into()));
    }
    let mut parser = Parser {
        tokens,
        cursor: 0,
        source,
    };
    let expr = parser.parse_conditional()?;
    if let Some(token) = parser.peek() {
        return Err(RenderError::Syntax(format!(
            "unexpected {token:?} in '{source}'"
        )));
    }
    Ok(expr)
}

struct Parser<'a> {
    tokens: Vec<Token>,
    cursor: usize,
    source: &'a str,
}

impl Parser<'_> {
    fn peek(&self) -> Option<&Token> {
        self.tokens.get(self.cursor)
    }

    fn peek_at(&self, offset: usize) -> Option<&Token> {
        self.tokens.get(self.cursor + offset)
    }

    fn next(&mut self) -> Option<Token> {
        let token = self.tokens.get(self.cursor).cloned();
        if token.is_some() {
            self.cursor += 1;
        }
        token
    }

    fn eat(&mut self, expected: &Token) -> bool {
        if self.peek() == Some(expected) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn eat_keyword(&mut self, word: &str) -> bool {
        if self.peek().is_some_and(|t| t.is_keyword(word)) {
            self.cursor += 1;
            true
        } else {
            false
        }
    }

    fn expect(&mut self, expected: &Token) -> Result<(), RenderError> {
        if self.eat(expected) {
            Ok(())
        } else {
            Err(self.error(&format!("expected {expected:?}")))
        }
    }

    fn error(&self, what: &str) -> RenderError {
        match self.peek() {
            Some(token) => RenderError::Syntax(format!(
                "{what}, got {token:?} in '{}'",
                self.source
            )),
            None => RenderError::Syntax(format!(
                "{what}, got end of expression in '{}'",
                self.source
            )),
        }
    }

    fn parse_conditional(&mut self) -> Result<Expr, RenderError> {
        let then = self.parse_or()?;
        if self.eat_keyword("if") {
            let cond = self.parse_or()?;
            let otherwise = if self.eat_keyword("else") {
                Some(Box::new(self.parse_conditional()?))
            } else {
                None
            };
            return Ok(Expr::Conditional {
                then: Box::new(then),
                cond: Box::new(cond),
                otherwise,
            });
        }
        Ok(then)
    }

    fn parse_or(&mut self) -> Result<Expr, RenderError> {
        let mut left = self.parse_and()?;
        while self.eat_keyword("or") {
            let right = self.parse_and()?;
            left = Expr::Or(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_and(&mut self) -> Result<Expr, RenderError> {
        let mut left = self.parse_not()?;
        while self.eat_keyword("and") {
            let right = self.parse_not()?;
            left = Expr::And(Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_not(&mut self) -> Result<Expr, RenderError> {
        if self.eat_keyword("not") {
            let inner = self.parse_not()?;
            return Ok(Expr::Not(Box::new(inner)));
        }
        self.parse_compare()
    }

    fn parse_compare(&mut self) -> Result<Expr, RenderError> {
        let mut left = self.parse_concat()?;
        loop {
            let op = match self.peek() {
                Some(Token::Eq) => BinaryOp::Eq,
                Some(Token::Ne) => BinaryOp::Ne,
                Some(Token::Lt) => BinaryOp::Lt,
                Some(Token::Le) => BinaryOp::Le,
                Some(Token::Gt) => BinaryOp::Gt,
                Some(Token::Ge) => BinaryOp::Ge,
                Some(t) if t.is_keyword("in") => BinaryOp::In,
                Some(t)
                    if t.is_keyword("not")
                        && self.peek_at(1).is_some_and(|n| n.is_keyword("in")) =>
                {
                    self.cursor += 1;
                    BinaryOp::NotIn
                }
                _ => break,
            };
            self.cursor += 1;
            let right = self.parse_concat()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_concat(&mut self) -> Result<Expr, RenderError> {
        let mut left = self.parse_additive()?;
        while self.eat(&Token::Tilde) {
            let right = self.parse_additive()?;
            left = Expr::Binary(BinaryOp::Concat, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_additive(&mut self) -> Result<Expr, RenderError> {
        let mut left = self.parse_multiplicative()?;
        loop {
            let op = match self.peek() {
                Some(Token::Plus) => BinaryOp::Add,
                Some(Token::Minus) => BinaryOp::Sub,
                _ => break,
            };
            self.cursor += 1;
            let right = self.parse_multiplicative()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_multiplicative(&mut self) -> Result<Expr, RenderError> {
        let mut left = self.parse_unary()?;
        loop {
            let op = match self.peek() {
                Some(Token::Star) => BinaryOp::Mul,
                Some(Token::Slash) => BinaryOp::Div,
                Some(Token::FloorDiv) => BinaryOp::FloorDiv,
                Some(Token::Percent) => BinaryOp::Mod,
                _ => break,
            };
            self.cursor += 1;
            let right = self.parse_unary()?;
            left = Expr::Binary(op, Box::new(left), Box::new(right));
        }
        Ok(left)
    }

    fn parse_unary(&mut self) -> Result<Expr, RenderError> {
        if self.eat(&Token::Minus) {
            let inner = self.parse_unary()?;
            return Ok(Expr::Neg(Box::new(inner)));
        }
        if self.eat(&Token::Plus) {
            return self.parse_unary();
        }
        let expr = self.parse_postfix()?;
        let expr = self.parse_filters(expr)?;
        self.parse_tests(expr)
    }

    fn parse_filters(&mut self, mut expr: Expr) -> Result<Expr, RenderError> {
        while self.eat(&Token::Pipe) {
            let name = match self.next() {
                Some(Token::Ident(name)) => name,
                _ => return Err(self.error("expected filter name after '|'")),
            };
            let args = if self.eat(&Token::LParen) {
                let (args, kwargs) = self.parse_call_args()?;
                if !kwargs.is_empty() {
                    return Err(RenderError::Syntax(format!(
                        "filter '{name}' does not accept keyword arguments"
                    )));
                }
                args
            } else {
                Vec::new()
            };
            expr = Expr::Filter {
                input: Box::new(expr),
                name,
                args,
            };
        }
        Ok(expr)
    }

    fn parse_tests(&mut self, expr: Expr) -> Result<Expr, RenderError> {
        if !self.eat_keyword("is") {
            return Ok(expr);
        }
        let negated = self.eat_keyword("not");
        let name = match self.next() {
            Some(Token::Ident(name)) => name,
            _ => return Err(self.error("expected test name after 'is'")),
        };
        Ok(Expr::Test {
            input: Box::new(expr),
            name,
            negated,
        })
    }

    fn parse_postfix(&mut self) -> Result<Expr, RenderError> {
        let mut expr = self.parse_primary()?;
        loop {
            if self.eat(&Token::Dot) {
                match self.next() {
                    Some(Token::Ident(name)) => expr = Expr::Attr(Box::new(expr), name),
                    Some(Token::Int(i)) => {
                        expr = Expr::Index(
                            Box::new(expr),
                            Box::new(Expr::Literal(Value::from(i))),
                        )
                    }
                    _ => return Err(self.error("expected attribute name after '.'")),
                }
            } else if self.eat(&Token::LBracket) {
                let index = self.parse_conditional()?;
                self.expect(&Token::RBracket)?;
                expr = Expr::Index(Box::new(expr), Box::new(index));
            } else {
                break;
            }
        }
        Ok(expr)
    }

    fn parse_primary(&mut self) -> Result<Expr, RenderError> {
        match self.next() {
            Some(Token::Str(s)) => Ok(Expr::Literal(Value::String(s))),
            Some(Token::Int(i)) => Ok(Expr::Literal(Value::from(i))),
            Some(Token::Float(f)) => Ok(Expr::Literal(Value::from(f))),
            Some(Token::LParen) => {
                let inner = self.parse_conditional()?;
                self.expect(&Token::RParen)?;
                Ok(inner)
            }
            Some(Token::LBracket) => {
                let mut items = Vec::new();
                if !self.eat(&Token::RBracket) {
                    loop {
                        items.push(self.parse_conditional()?);
                        if self.eat(&Token::Comma) {
                            if self.eat(&Token::RBracket) {
                                break;
                            }
                            continue;
                        }
                        self.expect(&Token::RBracket)?;
                        break;
                    }
                }
                Ok(Expr::List(items))
            }
            Some(Token::Ident(name)) => match name.as_str() {
                "true" | "True" => Ok(Expr::Literal(Value::Bool(true))),
                "false" | "False" => Ok(Expr::Literal(Value::Bool(false))),
                "none" | "None" | "null" => Ok(Expr::Literal(Value::Null)),
                _ => {
                    if self.eat(&Token::LParen) {
                        let (args, kwargs) = self.parse_call_args()?;
                        Ok(Expr::Call { name, args, kwargs })
                    } else {
                        Ok(Expr::Var(name))
                    }
                }
            },
            Some(token) => {
                self.cursor -= 1;
                Err(self.error(&format!("unexpected token {token:?}; expected a value")))
            }
            None => Err(self.error("expected a value")),
        }
    }

    /// Parses `a, b, key=value)`; the opening parenthesis is already consumed.
    fn parse_call_args(&mut self) -> Result<(Vec<Expr>, Vec<(String, Expr)>), RenderError> {
        let mut args = Vec::new();
        let mut kwargs = Vec::new();
        if self.eat(&Token::RParen) {
            return Ok((args, kwargs));
        }
        loop {
            let is_kwarg = matches!(self.peek(), Some(Token::Ident(_)))
                && self.peek_at(1) == Some(&Token::Assign);
            if is_kwarg {
                let Some(Token::Ident(key)) = self.next() else {
                    return Err(self.error("expected keyword argument name"));
                };
                self.cursor += 1;
                kwargs.push((key, self.parse_conditional()?));
            } else {
                if !kwargs.is_empty() {
                    return Err(self.error("positional argument follows keyword argument"));
                }
                args.push(self.parse_conditional()?);
            }
            if self.eat(&Token::Comma) {
                continue;
            }
            self.expect(&Token::RParen)?;
            break;
        }
        Ok((args, kwargs))
    }
}
