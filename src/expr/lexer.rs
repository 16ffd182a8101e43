use super::ExprError;

#[derive(Debug, Clone, PartialEq)]
pub enum Token {
    Int(i64),
    Float(f64),
    Str(String),
    Ident(String),
    True,
    False,
    Null,
    /// `#`, `#index` or `#acc`
    Current(String),
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Dot,
    Colon,
    Question,
    Plus,
    Minus,
    Star,
    Slash,
    Percent,
    Eq,
    Ne,
    Lt,
    Le,
    Gt,
    Ge,
    And,
    Or,
    Not,
    In,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Spanned {
    pub token: Token,
    pub pos: usize,
}

pub fn tokenize(input: &str) -> Result<Vec<Spanned>, ExprError> {
    let chars: Vec<char> = input.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let pos = i;
        let c = chars[i];
        let single = |token: Token| Spanned { token, pos };

        match c {
            ' ' | '\t' | '\r' | '\n' => {
                i += 1;
                continue;
            }
            '(' => tokens.push(single(Token::LParen)),
            ')' => tokens.push(single(Token::RParen)),
            '[' => tokens.push(single(Token::LBracket)),
            ']' => tokens.push(single(Token::RBracket)),
            '{' => tokens.push(single(Token::LBrace)),
            '}' => tokens.push(single(Token::RBrace)),
            ',' => tokens.push(single(Token::Comma)),
            ':' => tokens.push(single(Token::Colon)),
            '?' => tokens.push(single(Token::Question)),
            '+' => tokens.push(single(Token::Plus)),
            '-' => tokens.push(single(Token::Minus)),
            '*' => tokens.push(single(Token::Star)),
            '/' => tokens.push(single(Token::Slash)),
            '%' => tokens.push(single(Token::Percent)),
            '.' if !peek(&chars, i + 1).is_some_and(|n| n.is_ascii_digit()) => {
                tokens.push(single(Token::Dot))
            }
            '=' if peek(&chars, i + 1) == Some('=') => {
                tokens.push(single(Token::Eq));
                i += 2;
                continue;
            }
            '!' if peek(&chars, i + 1) == Some('=') => {
                tokens.push(single(Token::Ne));
                i += 2;
                continue;
            }
            '!' => tokens.push(single(Token::Not)),
            '<' if peek(&chars, i + 1) == Some('=') => {
                tokens.push(single(Token::Le));
                i += 2;
                continue;
            }
            '<' => tokens.push(single(Token::Lt)),
            '>' if peek(&chars, i + 1) == Some('=') => {
                tokens.push(single(Token::Ge));
                i += 2;
                continue;
            }
            '>' => tokens.push(single(Token::Gt)),
            '&' if peek(&chars, i + 1) == Some('&') => {
                tokens.push(single(Token::And));
                i += 2;
                continue;
            }
            '|' if peek(&chars, i + 1) == Some('|') => {
                tokens.push(single(Token::Or));
                i += 2;
                continue;
            }
            '"' | '\'' => {
                let (literal, next) = read_string(&chars, i)?;
                tokens.push(single(Token::Str(literal)));
                i = next;
                continue;
            }
            '#' => {
                i += 1;
                let start = i;
                while i < chars.len() && chars[i].is_ascii_alphanumeric() {
                    i += 1;
                }
                let name: String = chars[start..i].iter().collect();
                match name.as_str() {
                    "" | "index" | "acc" => tokens.push(single(Token::Current(name))),
                    other => {
                        return Err(ExprError::Parse {
                            message: format!("unknown reference '#{}'", other),
                            pos,
                        })
                    }
                }
                continue;
            }
            c if c.is_ascii_digit() || c == '.' => {
                let (token, next) = read_number(&chars, i)?;
                tokens.push(single(token));
                i = next;
                continue;
            }
            c if c.is_alphabetic() || c == '_' || c == '$' => {
                let start = i;
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
                    "and" => Token::And,
                    "or" => Token::Or,
                    "not" => Token::Not,
                    "in" => Token::In,
                    _ => Token::Ident(word),
                };
                tokens.push(single(token));
                continue;
            }
            other => {
                return Err(ExprError::Parse {
                    message: format!("unexpected character '{}'", other),
                    pos,
                })
            }
        }
        i += 1;
    }

    Ok(tokens)
}

fn peek(chars: &[char], idx: usize) -> Option<char> {
    chars.get(idx).copied()
}

fn read_string(chars: &[char], start: usize) -> Result<(String, usize), ExprError> {
    let quote = chars[start];
    let mut i = start + 1;
    let mut out = String::new();
    while i < chars.len() {
        match chars[i] {
            c if c == quote => return Ok((out, i + 1)),
            '\\' => {
                let escaped = peek(chars, i + 1).ok_or(ExprError::Parse {
                    message: "unterminated escape".into(),
                    pos: i,
                })?;
                out.push(match escaped {
                    'n' => '\n',
                    't' => '\t',
                    'r' => '\r',
                    other => other,
                });
                i += 2;
            }
            c => {
                out.push(c);
                i += 1;
            }
        }
    }
    Err(ExprError::Parse {
        message: "unterminated string literal".into(),
        pos: start,
    })
}

fn read_number(chars: &[char], start: usize) -> Result<(Token, usize), ExprError> {
    let mut i = start;
    let mut is_float = false;
    while i < chars.len() {
        match chars[i] {
            c if c.is_ascii_digit() => i += 1,
            '.' if !is_float && peek(chars, i + 1).is_some_and(|n| n.is_ascii_digit()) => {
                is_float = true;
                i += 1;
            }
            'e' | 'E' if peek(chars, i + 1).is_some_and(|n| n.is_ascii_digit() || n == '-' || n == '+') => {
                is_float = true;
                i += 2;
            }
            _ => break,
        }
    }
    let raw: String = chars[start..i].iter().collect();
    let invalid = || ExprError::Parse {
        message: format!("invalid number '{}'", raw),
        pos: start,
    };
    let token = if is_float {
        Token::Float(raw.parse().map_err(|_| invalid())?)
    } else {
        match raw.parse::<i64>() {
            Ok(n) => Token::Int(n),
            Err(_) => Token::Float(raw.parse().map_err(|_| invalid())?),
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
            kinds("a.b >= 1.5 && !done"),
            vec![
                Token::Ident("a".into()),
                Token::Dot,
                Token::Ident("b".into()),
                Token::Ge,
                Token::Float(1.5),
                Token::And,
                Token::Not,
                Token::Ident("done".into()),
            ]
        );
        assert_eq!(
            kinds("x[0] == 'it\\'s'"),
            vec![
                Token::Ident("x".into()),
                Token::LBracket,
                Token::Int(0),
                Token::RBracket,
                Token::Eq,
                Token::Str("it's".into()),
            ]
        );
    }

    #[test]
    fn test_keywords_and_current_refs() {
        assert_eq!(
            kinds("# > 1 and #index in list or not #acc"),
            vec![
                Token::Current("".into()),
                Token::Gt,
                Token::Int(1),
                Token::And,
                Token::Current("index".into()),
                Token::In,
                Token::Ident("list".into()),
                Token::Or,
                Token::Not,
                Token::Current("acc".into()),
            ]
        );
    }

    #[test]
    fn test_errors_report_position() {
        assert_eq!(
            tokenize("a @ b"),
            Err(ExprError::Parse {
                message: "unexpected character '@'".into(),
                pos: 2
            })
        );
        assert!(tokenize("'open").is_err());
        assert!(tokenize("#bogus").is_err());
    }
}
