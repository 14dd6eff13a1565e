//! Pratt parser producing the expression tree.

use ledgerclaw_core::EvaluationError;
use serde_json::Value;

use super::lexer::{Spanned, Token, tokenize};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UnaryOp {
    Not,
    Neg,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BinaryOp {
    Or,
    And,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    In,
    Contains,
    StartsWith,
    EndsWith,
    Add,
    Sub,
    Mul,
    Div,
    Rem,
}

impl BinaryOp {
    pub fn symbol(&self) -> &'static str {
        match self {
            BinaryOp::Or => "||",
            BinaryOp::And => "&&",
            BinaryOp::Eq => "==",
            BinaryOp::Ne => "!=",
            BinaryOp::Lt => "<",
            BinaryOp::Le => "<=",
            BinaryOp::Gt => ">",
            BinaryOp::Ge => ">=",
            BinaryOp::In => "in",
            BinaryOp::Contains => "contains",
            BinaryOp::StartsWith => "startsWith",
            BinaryOp::EndsWith => "endsWith",
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Rem => "%",
        }
    }

    /// Left and right binding power.
    fn binding_power(&self) -> (u8, u8) {
        match self {
            BinaryOp::Or => (1, 2),
            BinaryOp::And => (3, 4),
            BinaryOp::Eq | BinaryOp::Ne => (5, 6),
            BinaryOp::Lt
            | BinaryOp::Le
            | BinaryOp::Gt
            | BinaryOp::Ge
            | BinaryOp::In
            | BinaryOp::Contains
            | BinaryOp::StartsWith
            | BinaryOp::EndsWith => (7, 8),
            BinaryOp::Add | BinaryOp::Sub => (9, 10),
            BinaryOp::Mul | BinaryOp::Div | BinaryOp::Rem => (11, 12),
        }
    }
}

const PREFIX_BP: u8 = 13;

#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    Literal(Value),
    Ident(String),
    Array(Vec<Expr>),
    Member(Box<Expr>, String),
    Index(Box<Expr>, Box<Expr>),
    Unary(UnaryOp, Box<Expr>),
    Binary(BinaryOp, Box<Expr>, Box<Expr>),
    Call(String, Vec<Expr>),
}

impl Expr {
    /// Dotted path of a member chain, for error messages.
    pub fn path(&self) -> String {
        match self {
            Expr::Ident(name) => name.clone(),
            Expr::Member(base, field) => format!("{}.{}", base.path(), field),
            Expr::Index(base, _) => format!("{}[]", base.path()),
            _ => "<expr>".to_string(),
        }
    }
}

/// Parse a complete expression.
pub fn parse(input: &str) -> Result<Expr, EvaluationError> {
    let tokens = tokenize(input)?;
    let mut parser = Parser { tokens, pos: 0 };
    if parser.peek() == &Token::Eof {
        return Err(parser.error("empty expression"));
    }
    let expr = parser.expr(0)?;
    if parser.peek() != &Token::Eof {
        return Err(parser.error(format!("unexpected token {:?}", parser.peek())));
    }
    Ok(expr)
}

struct Parser {
    tokens: Vec<Spanned>,
    pos: usize,
}

impl Parser {
    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)].token
    }

    fn position(&self) -> usize {
        self.tokens[self.pos.min(self.tokens.len() - 1)].pos
    }

    fn advance(&mut self) -> Token {
        let token = self.peek().clone();
        if self.pos < self.tokens.len() - 1 {
            self.pos += 1;
        }
        token
    }

    fn error(&self, message: impl Into<String>) -> EvaluationError {
        EvaluationError::Syntax {
            position: self.position(),
            message: message.into(),
        }
    }

    fn expect(&mut self, expected: Token) -> Result<(), EvaluationError> {
        if self.peek() == &expected {
            self.advance();
            Ok(())
        } else {
            Err(self.error(format!("expected {expected:?}, found {:?}", self.peek())))
        }
    }

    fn infix_op(&self) -> Option<BinaryOp> {
        Some(match self.peek() {
            Token::OrOr => BinaryOp::Or,
            Token::AndAnd => BinaryOp::And,
            Token::EqEq => BinaryOp::Eq,
            Token::NotEq => BinaryOp::Ne,
            Token::Lt => BinaryOp::Lt,
            Token::Le => BinaryOp::Le,
            Token::Gt => BinaryOp::Gt,
            Token::Ge => BinaryOp::Ge,
            Token::Plus => BinaryOp::Add,
            Token::Minus => BinaryOp::Sub,
            Token::Star => BinaryOp::Mul,
            Token::Slash => BinaryOp::Div,
            Token::Percent => BinaryOp::Rem,
            Token::Ident(word) => match word.as_str() {
                "or" => BinaryOp::Or,
                "and" => BinaryOp::And,
                "in" => BinaryOp::In,
                "contains" => BinaryOp::Contains,
                "startsWith" => BinaryOp::StartsWith,
                "endsWith" => BinaryOp::EndsWith,
                _ => return None,
            },
            _ => return None,
        })
    }

    fn expr(&mut self, min_bp: u8) -> Result<Expr, EvaluationError> {
        let mut lhs = self.prefix()?;

        loop {
            lhs = match self.peek() {
                Token::Dot => {
                    self.advance();
                    match self.advance() {
                        Token::Ident(field) => Expr::Member(Box::new(lhs), field),
                        other => {
                            return Err(self.error(format!("expected field name after '.', found {other:?}")));
                        }
                    }
                }
                Token::LBracket => {
                    self.advance();
                    let index = self.expr(0)?;
                    self.expect(Token::RBracket)?;
                    Expr::Index(Box::new(lhs), Box::new(index))
                }
                _ => {
                    let Some(op) = self.infix_op() else { break };
                    let (l_bp, r_bp) = op.binding_power();
                    if l_bp < min_bp {
                        break;
                    }
                    self.advance();
                    let rhs = self.expr(r_bp)?;
                    Expr::Binary(op, Box::new(lhs), Box::new(rhs))
                }
            };
        }

        Ok(lhs)
    }

    fn prefix(&mut self) -> Result<Expr, EvaluationError> {
        let pos = self.position();
        match self.advance() {
            Token::Int(n) => Ok(Expr::Literal(Value::from(n))),
            Token::Float(f) => serde_json::Number::from_f64(f)
                .map(|n| Expr::Literal(Value::Number(n)))
                .ok_or_else(|| EvaluationError::Syntax {
                    position: pos,
                    message: format!("invalid number {f}"),
                }),
            Token::Str(s) => Ok(Expr::Literal(Value::String(s))),
            Token::True => Ok(Expr::Literal(Value::Bool(true))),
            Token::False => Ok(Expr::Literal(Value::Bool(false))),
            Token::Null => Ok(Expr::Literal(Value::Null)),
            Token::Bang => Ok(Expr::Unary(UnaryOp::Not, Box::new(self.expr(PREFIX_BP)?))),
            Token::Minus => Ok(Expr::Unary(UnaryOp::Neg, Box::new(self.expr(PREFIX_BP)?))),
            Token::LParen => {
                let inner = self.expr(0)?;
                self.expect(Token::RParen)?;
                Ok(inner)
            }
            Token::LBracket => {
                let items = self.list(Token::RBracket)?;
                Ok(Expr::Array(items))
            }
            Token::Ident(word) if word == "not" => {
                Ok(Expr::Unary(UnaryOp::Not, Box::new(self.expr(PREFIX_BP)?)))
            }
            Token::Ident(name) => {
                if self.peek() == &Token::LParen {
                    self.advance();
                    let args = self.list(Token::RParen)?;
                    Ok(Expr::Call(name, args))
                } else {
                    Ok(Expr::Ident(name))
                }
            }
            other => Err(EvaluationError::Syntax {
                position: pos,
                message: format!("unexpected token {other:?}"),
            }),
        }
    }

    /// Comma-separated expressions up to `close`, which is consumed.
    fn list(&mut self, close: Token) -> Result<Vec<Expr>, EvaluationError> {
        let mut items = Vec::new();
        if self.peek() == &close {
            self.advance();
            return Ok(items);
        }
        loop {
            items.push(self.expr(0)?);
            if self.peek() == &Token::Comma {
                self.advance();
                continue;
            }
            self.expect(close)?;
            return Ok(items);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn ident(name: &str) -> Box<Expr> {
        Box::new(Expr::Ident(name.into()))
    }

    #[test]
    fn test_precedence() {
        let expr = parse("a || b && c").unwrap();
        assert_eq!(
            expr,
            Expr::Binary(
                BinaryOp::Or,
                ident("a"),
                Box::new(Expr::Binary(BinaryOp::And, ident("b"), ident("c")))
            )
        );

        let expr = parse("1 + 2 * 3 > 6").unwrap();
        let Expr::Binary(BinaryOp::Gt, lhs, _) = expr else {
            panic!("expected comparison at the root");
        };
        assert!(matches!(*lhs, Expr::Binary(BinaryOp::Add, _, _)));
    }

    #[test]
    fn test_member_index_and_calls() {
        let expr = parse("event.items[0].name").unwrap();
        assert_eq!(expr.path(), "event.items[].name");

        let expr = parse("startsWith(lower(event.name), 'tr')").unwrap();
        let Expr::Call(name, args) = expr else {
            panic!("expected call");
        };
        assert_eq!(name, "startsWith");
        assert_eq!(args.len(), 2);

        assert_eq!(
            parse("[1, 'a']").unwrap(),
            Expr::Array(vec![
                Expr::Literal(json!(1)),
                Expr::Literal(json!("a"))
            ])
        );
    }

    #[test]
    fn test_word_operators() {
        assert!(matches!(
            parse("not a and b").unwrap(),
            Expr::Binary(BinaryOp::And, _, _)
        ));
        assert!(matches!(
            parse("event.to in ['x', 'y']").unwrap(),
            Expr::Binary(BinaryOp::In, _, _)
        ));
        assert!(matches!(
            parse("event.memo contains 'gm'").unwrap(),
            Expr::Binary(BinaryOp::Contains, _, _)
        ));
    }

    #[test]
    fn test_syntax_errors() {
        for bad in ["", "a ==", "(a", "a b", "event.", "[1, 2", "f(1,"] {
            assert!(
                matches!(parse(bad), Err(EvaluationError::Syntax { .. })),
                "{bad:?} should not parse"
            );
        }
    }
}
