use crate::errors::RenderError;

/// A single token inside a `{{ ... }}` block.
#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    /// Identifiers and keywords (`and`, `or`, `not`, `in`, `is`, `if`, `else`, ...).
    Ident(String),
    /// Quoted string, escape sequences already resolved.
    Str(String),
    Int(i64),
    Float(f64),
    LParen,
    RParen,
    LBracket,
    RBracket,
    Comma,
    Dot,
    Pipe,
    Tilde,
    Plus,
    Minus,
    Star,
    Slash,
    FloorDiv,
    Percent,
    Assign,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
}

impl Token {
    pub fn is_keyword(&self, word: &str) -> bool {
        matches!(self, Token::Ident(name) if name == word)
    }
}

/// Tokenize the body of one expression block.
pub fn tokenize(source: &str) -> Result<Vec<Token>, RenderError> {
    let mut tokens = Vec::new();
    let mut chars = source.chars().peekable();

    while let Some(&c) = chars.peek() {
        if c.is_whitespace() {
            chars.next();
            continue;
        }

        if c == '\'' || c == '"' {
            let quote = c;
            chars.next();
            let mut s = String::new();
            loop {
                match chars.next() {
                    None => {
                        return Err(RenderError::Syntax(format!(
                            "unterminated string literal in '{source}'"
                        )))
                    }
                    Some(ch) if ch == quote => break,
                    Some('\\') => match chars.next() {
                        Some('n') => s.push('\n'),
                        Some('t') => s.push('\t'),
                        Some('\\') => s.push('\\'),
                        Some('\'') => s.push('\''),
                        Some('"') => s.push('"'),
                        Some(other) => {
                            s.push('\\');
                            s.push(other);
                        }
                        None => {
                            return Err(RenderError::Syntax(format!(
                                "unterminated string literal in '{source}'"
                            )))
                        }
                    },
                    Some(ch) => s.push(ch),
                }
            }
            tokens.push(Token::Str(s));
            continue;
        }

        if c.is_ascii_digit() {
            let mut number = String::new();
            let mut is_float = false;
            while let Some(&ch) = chars.peek() {
                if ch.is_ascii_digit() || ch == '_' {
                    if ch != '_' {
                        number.push(ch);
                    }
                    chars.next();
                } else if ch == '.' && !is_float {
                    // A dot only continues the literal when a digit follows it.
                    let mut lookahead = chars.clone();
                    lookahead.next();
                    if lookahead.peek().is_some_and(|d| d.is_ascii_digit()) {
                        is_float = true;
                        number.push('.');
                        chars.next();
                    } else {
                        break;
                    }
                } else {
                    break;
                }
            }
            if is_float {
                let value = number.parse::<f64>().map_err(|e| {
                    RenderError::Syntax(format!("invalid float literal '{number}': {e}"))
                })?;
                tokens.push(Token::Float(value));
            } else {
                let value = number.parse::<i64>().map_err(|e| {
                    RenderError::Syntax(format!("invalid integer literal '{number}': {e}"))
                })?;
                tokens.push(Token::Int(value));
            }
            continue;
        }

        if c.is_alphabetic() || c == '_' {
            let mut ident = String::new();
            while let Some(&ch) = chars.peek() {
                if ch.is_alphanumeric() || ch == '_' {
                    ident.push(ch);
                    chars.next();
                } else {
                    break;
                }
            }
            tokens.push(Token::Ident(ident));
            continue;
        }

        chars.next();
        let next = chars.peek().copied();
        let token = match (c, next) {
            ('=', Some('=')) => {
                chars.next();
                Token::Eq
            }
            ('!', Some('=')) => {
                chars.next();
                Token::Ne
            }
            ('<', Some('=')) => {
                chars.next();
                Token::Le
            }
            ('>', Some('=')) => {
                chars.next();
                Token::Ge
            }
            ('/', Some('/')) => {
                chars.next();
                Token::FloorDiv
            }
            ('=', _) => Token::Assign,
            ('<', _) => Token::Lt,
            ('>', _) => Token::Gt,
            ('/', _) => Token::Slash,
            ('(', _) => Token::LParen,
            (')', _) => Token::RParen,
            ('[', _) => Token::LBracket,
            (']', _) => Token::RBracket,
            (',', _) => Token::Comma,
            ('.', _) => Token::Dot,
            ('|', _) => Token::Pipe,
            ('~', _) => Token::Tilde,
            ('+', _) => Token::Plus,
            ('-', _) => Token::Minus,
            ('*', _) => Token::Star,
            ('%', _) => Token::Percent,
            (other, _) => {
                return Err(RenderError::Syntax(format!(
                    "unexpected character '{other}' in '{source}'"
                )))
            }
        };
        tokens.push(token);
    }

    Ok(tokens)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tokenize_comparison() {
        let tokens = tokenize("count >= 3 and name == 'bob'").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Ident("count".into()),
                Token::Ge,
                Token::Int(3),
                Token::Ident("and".into()),
                Token::Ident("name".into()),
                Token::Eq,
                Token::Str("bob".into()),
            ]
        );
    }

    #[test]
    fn test_tokenize_float_and_attribute() {
        let tokens = tokenize("1.5 + items.0").unwrap();
        assert_eq!(
            tokens,
            vec![
                Token::Float(1.5),
                Token::Plus,
                Token::Ident("items".into()),
                Token::Dot,
                Token::Int(0),
            ]
        );
    }

    #[test]
    fn test_unterminated_string_is_syntax_error() {
        let err = tokenize("'abc").unwrap_err();
        assert!(matches!(err, RenderError::Syntax(_)));
    }

    #[test]
    fn test_unexpected_character() {
        assert!(matches!(tokenize("a $ b"), Err(RenderError::Syntax(_))));
    }
}
