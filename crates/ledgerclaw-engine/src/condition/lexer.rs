//! Tokenizer for condition expressions.

use ledgerclaw_core::EvaluationError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    /// Identifiers and word operators (`and`, `in`, `contains`, ...).
    Ident(String),
    True,
    False,
    Null,
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Bang,
    EqEq,
    NotEq,
    Lt,
    Le,
    Gt,
    Ge,
    AndAnd,
    OrOr,
    Eof,
}

/// A token and the char offset it starts at.
#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

fn syntax(pos: usize, message: impl Into<String>) -> EvaluationError {
    EvaluationError::Syntax {
        position: pos,
        message: message.into(),
    }
}

pub fn tokenize(input: &str) -> Result<Vec<Spanned>, EvaluationError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        let start = i;
        let next = chars.get(i + 1).copied();

        let token = match c {
            ' ' | '\t' | '\r' | '\n' => {
                i += 1;
                continue;
            }
            '(' => Token::LParen,
            ')' => Token::RParen,
            '[' => Token::LBracket,
            ']' => Token::RBracket,
            ',' => Token::Comma,
            '.' if !next.is_some_and(|n| n.is_ascii_digit()) => Token::Dot,
            '+' => Token::Plus,
            '-' => Token::Minus,
            '*' => Token::Star,
            '/' => Token::Slash,
            '%' => Token::Percent,
            '=' if next == Some('=') => {
                i += 1;
                Token::EqEq
            }
            '!' if next == Some('=') => {
                i += 1;
                Token::NotEq
            }
            '!' => Token::Bang,
            '<' if next == Some('=') => {
                i += 1;
                Token::Le
            }
            '<' => Token::Lt,
            '>' if next == Some('=') => {
                i += 1;
                Token::Ge
            }
            '>' => Token::Gt,
            '&' if next == Some('&') => {
                i += 1;
                Token::AndAnd
            }
            '|' if next == Some('|') => {
                i += 1;
                Token::OrOr
            }
            '"' | '\'' => {
                let (s, end) = read_string(&chars, i)?;
                i = end;
                tokens.push(Spanned {
                    token: Token::Str(s),
                    pos: start,
                });
                continue;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let (token, end) = read_number(&chars, i)?;
                i = end;
                tokens.push(Spanned { token, pos: start });
                continue;
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                while i < chars.len()
                    && (chars[i].is_alphanumeric() || chars[i] == '_' || chars[i] == '$')
                {
                    i += 1;
                }
                let word: String = chars[start..i].iter().collect();
                let token = match word.as_str() {
                    "true" => Token::True,
                    "false" => Token::False,
                    "null" | "nil" => Token::Null,
                    _ => Token::Ident(word),
                };
                tokens.push(Spanned { token, pos: start });
                continue;
            }
            other => return Err(syntax(start, format!("unexpected character '{other}'"))),
        };
        i += 1;
        tokens.push(Spanned { token, pos: start });
    }

    tokens.push(Spanned {
        token: Token::Eof,
        pos: chars.len(),
    });
    Ok(tokens)
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize), EvaluationError> {
    let quote = chars[start];
    let mut out = String::new();
    let mut i = start + 1;
    while i < chars.len() {
        match chars[i] {
            c if c == quote => return Ok((out, i + 1)),
            '\\' => {
                let esc = chars
                    .get(i + 1)
                    .ok_or_else(|| syntax(i, "unterminated escape"))?;
                match esc {
                    'n' => out.push('\n'),
                    't' => out.push('\t'),
                    'r' => out.push('\r'),
                    '0' => out.push('\0'),
                    '\\' | '"' | '\'' | '/' => out.push(*esc),
                    'u' => {
                        let hex: String = chars.iter().skip(i + 2).take(4).collect();
                        let code = u32::from_str_radix(&hex, 16)
                            .ok()
                            .filter(|_| hex.len() == 4)
                            .and_then(char::from_u32)
                            .ok_or_else(|| syntax(i, format!("invalid unicode escape '\\u{hex}'")))?;
                        out.push(code);
                        i += 4;
                    }
                    other => return Err(syntax(i, format!("invalid escape '\\{other}'"))),
                }
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(syntax(start, "unterminated string literal"))
}

fn read_number(chars: &[char], start: usize) -> Result<(Token, usize), EvaluationError> {
    let mut i = start;
    let mut is_float = false;
    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() || c == '_' {
            i += 1;
        } else if c == '.' && !is_float && chars.get(i + 1).is_some_and(|n| n.is_ascii_digit()) {
            is_float = true;
            i += 1;
        } else if (c == 'e' || c == 'E')
            && chars
                .get(i + 1)
                .is_some_and(|n| n.is_ascii_digit() || *n == '-' || *n == '+')
        {
            is_float = true;
            i += 2;
        } else {
            break;
        }
    }
    let text: String = chars[start..i].iter().filter(|c| **c != '_').collect();
    let token = if is_float {
        Token::Float(
            text.parse()
                .map_err(|_| syntax(start, format!("invalid number '{text}'")))?,
        )
    } else {
        match text.parse::<i64>() {
            Ok(n) => Token::Int(n),
            // too large for i64: keep the magnitude as a float
            Err(_) => Token::Float(
                text.parse()
                    .map_err(|_| syntax(start, format!("invalid number '{text}'")))?,
            ),
        }
    };
    Ok((token, i))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(input: &str) -> Vec<Token> {
        tokenize(input).unwrap().into_iter().map(|s| s.token).collect()
    }

    #[test]
    fn test_operators_and_literals() {
        assert_eq!(
            kinds("event.amount >= 1.5 && !x"),
            vec![
                Token::Ident("event".into()),
                Token::Dot,
                Token::Ident("amount".into()),
                Token::Ge,
                Token::Float(1.5),
                Token::AndAnd,
                Token::Bang,
                Token::Ident("x".into()),
                Token::Eof,
            ]
        );
        assert_eq!(kinds("nil")[0], Token::Null);
        assert_eq!(kinds("1_000")[0], Token::Int(1000));
    }

    #[test]
    fn test_string_escapes() {
        assert_eq!(kinds(r#""a\"b""#)[0], Token::Str("a\"b".into()));
        assert_eq!(kinds(r"'it\'s'")[0], Token::Str("it's".into()));
        assert_eq!(kinds(r#""caf\u00e9""#)[0], Token::Str("café".into()));
    }

    #[test]
    fn test_errors_carry_position() {
        match tokenize("a == 'open").unwrap_err() {
            EvaluationError::Syntax { position, .. } => assert_eq!(position, 5),
            other => panic!("unexpected {other:?}"),
        }
        assert!(matches!(
            tokenize("a # b"),
            Err(EvaluationError::Syntax { position: 2, .. })
        ));
    }
}
