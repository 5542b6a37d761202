use std::iter::Peekable;
use std::str::CharIndices;

use super::ast::{FilterExpression, Literal, Pattern};
use crate::error::SyntaxError;

const MAX_DEPTH: usize = 128;

#[derive(Debug, Clone, PartialEq)]
enum Token {
    LeftParen,
    RightParen,
    Ident(String),
    Str(String),
    Raw(String),
    Int(i64),
    End,
}

#[derive(Debug)]
struct Spanned {
    token: Token,
    position: usize,
}

/// Parses filter text into an expression tree.
///
/// Predicate names are not checked here; an unknown name only surfaces when
/// the expression is first evaluated.
///
/// # Errors
///
/// Returns a [`SyntaxError`] carrying the byte offset of the offending token.
///
/// # Examples
///
/// ```
/// use addon_core::filter::{parse, FilterExpression};
///
/// let expr = parse(r#"(and (in-scope) (path-contains "api"))"#).unwrap();
/// assert!(matches!(expr, FilterExpression::And(ref children) if children.len() == 2));
///
/// assert_eq!(parse("true").unwrap(), FilterExpression::always());
/// assert!(parse("(not)").is_err());
/// ```
pub fn parse(text: &str) -> Result<FilterExpression, SyntaxError> {
    let tokens = tokenize(text)?;
    let mut parser = Parser { tokens, index: 0 };

    if matches!(parser.peek().token, Token::End) {
        return Err(SyntaxError::new(0, "empty filter expression"));
    }

    let expr = parser.expression(0)?;
    let next = parser.peek();
    if !matches!(next.token, Token::End) {
        return Err(SyntaxError::new(
            next.position,
            "unexpected input after the expression",
        ));
    }
    Ok(expr)
}

fn tokenize(text: &str) -> Result<Vec<Spanned>, SyntaxError> {
    let mut tokens = Vec::new();
    let mut chars = text.char_indices().peekable();

    while let Some(&(position, c)) = chars.peek() {
        let token = match c {
            c if c.is_whitespace() => {
                chars.next();
                continue;
            }
            '(' => {
                chars.next();
                Token::LeftParen
            }
            ')' => {
                chars.next();
                Token::RightParen
            }
            '"' => {
                chars.next();
                Token::Str(quoted(&mut chars, position)?)
            }
            'r' if text[position + 1..].starts_with('"') => {
                chars.next();
                chars.next();
                Token::Raw(raw(&mut chars, position)?)
            }
            c if c.is_ascii_digit() || c == '-' => number(text, &mut chars, position)?,
            c if c.is_alphabetic() || c == '_' => {
                let end = take_while(&mut chars, |c| {
                    c.is_alphanumeric() || matches!(c, '-' | '_' | '.')
                })
                .unwrap_or(text.len());
                Token::Ident(text[position..end].to_string())
            }
            other => {
                return Err(SyntaxError::new(
                    position,
                    format!("unexpected character `{}`", other),
                ))
            }
        };
        tokens.push(Spanned { token, position });
    }

    tokens.push(Spanned {
        token: Token::End,
        position: text.len(),
    });
    Ok(tokens)
}

/// Advances while `pred` holds; returns the offset of the first rejected char.
fn take_while(chars: &mut Peekable<CharIndices<'_>>, pred: impl Fn(char) -> bool) -> Option<usize> {
    while let Some(&(i, c)) = chars.peek() {
        if !pred(c) {
            return Some(i);
        }
        chars.next();
    }
    None
}

fn quoted(chars: &mut Peekable<CharIndices<'_>>, start: usize) -> Result<String, SyntaxError> {
    let mut out = String::new();
    while let Some((i, c)) = chars.next() {
        match c {
            '"' => return Ok(out),
            '\\' => {
                let escaped = match chars.next() {
                    Some((_, 'n')) => '\n',
                    Some((_, 't')) => '\t',
                    Some((_, 'r')) => '\r',
                    Some((_, '\\')) => '\\',
                    Some((_, '"')) => '"',
                    Some((_, 'x')) => {
                        let high = chars.next().and_then(|(_, c)| c.to_digit(16));
                        let low = chars.next().and_then(|(_, c)| c.to_digit(16));
                        match (high, low) {
                            (Some(high), Some(low)) => char::from((high << 4 | low) as u8),
                            _ => {
                                return Err(SyntaxError::new(
                                    i,
                                    "`\\x` escape needs two hex digits",
                                ))
                            }
                        }
                    }
                    Some((_, other)) => {
                        return Err(SyntaxError::new(
                            i,
                            format!("invalid escape `\\{}`", other),
                        ))
                    }
                    None => break,
                };
                out.push(escaped);
            }
            c => out.push(c),
        }
    }
    Err(SyntaxError::new(start, "unterminated string"))
}

fn raw(chars: &mut Peekable<CharIndices<'_>>, start: usize) -> Result<String, SyntaxError> {
    let mut out = String::new();
    for (_, c) in chars.by_ref() {
        if c == '"' {
            return Ok(out);
        }
        out.push(c);
    }
    Err(SyntaxError::new(start, "unterminated raw string"))
}

fn number(
    text: &str,
    chars: &mut Peekable<CharIndices<'_>>,
    start: usize,
) -> Result<Token, SyntaxError> {
    chars.next();
    let end = take_while(chars, |c| c.is_ascii_alphanumeric()).unwrap_or(text.len());
    let literal = &text[start..end];
    let (negative, digits) = match literal.strip_prefix('-') {
        Some(rest) => (true, rest),
        None => (false, literal),
    };

    let magnitude = if let Some(hex) = digits.strip_prefix("0x") {
        i128::from_str_radix(hex, 16)
    } else if let Some(bin) = digits.strip_prefix("0b") {
        i128::from_str_radix(bin, 2)
    } else {
        digits.parse::<i128>()
    };

    // Magnitude is parsed wide so that `i64::MIN` is accepted.
    let value = magnitude
        .ok()
        .map(|n| if negative { -n } else { n })
        .and_then(|n| i64::try_from(n).ok());

    match value {
        Some(n) => Ok(Token::Int(n)),
        None => Err(SyntaxError::new(
            start,
            format!("invalid number `{}`", literal),
        )),
    }
}

struct Parser {
    tokens: Vec<Spanned>,
    index: usize,
}

impl Parser {
    fn peek(&self) -> &Spanned {
        // The token list always ends with `End`, which is never consumed.
        &self.tokens[self.index.min(self.tokens.len() - 1)]
    }

    fn advance(&mut self) -> (Token, usize) {
        let spanned = self.peek();
        let out = (spanned.token.clone(), spanned.position);
        if !matches!(out.0, Token::End) {
            self.index += 1;
        }
        out
    }

    fn expression(&mut self, depth: usize) -> Result<FilterExpression, SyntaxError> {
        let (token, position) = self.advance();
        match token {
            Token::LeftParen if depth >= MAX_DEPTH => Err(SyntaxError::new(
                position,
                "expression nested too deeply",
            )),
            Token::LeftParen => self.form(position, depth),
            Token::Ident(word) => match constant(&word) {
                Some(true) => Ok(FilterExpression::always()),
                Some(false) => Ok(FilterExpression::never()),
                None => Err(SyntaxError::new(
                    position,
                    format!("expected an expression, found `{}`", word),
                )),
            },
            Token::Str(_) | Token::Raw(_) | Token::Int(_) => Err(SyntaxError::new(
                position,
                "only `true` or `false` may stand in for an expression",
            )),
            Token::RightParen => Err(SyntaxError::new(position, "unexpected `)`")),
            Token::End => Err(SyntaxError::new(position, "unexpected end of input")),
        }
    }

    fn form(&mut self, open: usize, depth: usize) -> Result<FilterExpression, SyntaxError> {
        let (token, position) = self.advance();
        let head = match token {
            Token::Ident(word) => word.to_ascii_lowercase(),
            Token::RightParen => return Err(SyntaxError::new(open, "empty form `()`")),
            Token::End => return Err(SyntaxError::new(open, "unclosed `(`")),
            _ => {
                return Err(SyntaxError::new(
                    position,
                    "expected `and`, `or`, `not` or a predicate name",
                ))
            }
        };

        match head.as_str() {
            "and" => Ok(FilterExpression::And(self.children(open, depth)?)),
            "or" => Ok(FilterExpression::Or(self.children(open, depth)?)),
            "not" => {
                let mut children = self.children(open, depth)?;
                if children.len() != 1 {
                    return Err(SyntaxError::new(
                        open,
                        format!("`not` takes exactly one expression, found {}", children.len()),
                    ));
                }
                let child = children.remove(0);
                Ok(FilterExpression::Not(Box::new(child)))
            }
            _ => Ok(FilterExpression::Predicate {
                args: self.arguments(open)?,
                name: head,
            }),
        }
    }

    fn children(&mut self, open: usize, depth: usize) -> Result<Vec<FilterExpression>, SyntaxError> {
        let mut children = Vec::new();
        loop {
            match self.peek().token {
                Token::RightParen => {
                    self.advance();
                    return Ok(children);
                }
                Token::End => return Err(SyntaxError::new(open, "unclosed `(`")),
                _ => children.push(self.expression(depth + 1)?),
            }
        }
    }

    fn arguments(&mut self, open: usize) -> Result<Vec<Literal>, SyntaxError> {
        let mut args = Vec::new();
        loop {
            let (token, position) = self.advance();
            let literal = match token {
                Token::RightParen => return Ok(args),
                Token::End => return Err(SyntaxError::new(open, "unclosed `(`")),
                Token::LeftParen => {
                    return Err(SyntaxError::new(
                        position,
                        "predicate arguments must be literals, not expressions",
                    ))
                }
                Token::Str(s) => Literal::Str(s),
                Token::Raw(source) => match Pattern::new(&source) {
                    Ok(pattern) => Literal::Regex(pattern),
                    Err(e) => {
                        return Err(SyntaxError::new(
                            position,
                            format!("invalid regex: {}", e),
                        ))
                    }
                },
                Token::Int(n) => Literal::Int(n),
                Token::Ident(word) => match constant(&word) {
                    Some(b) => Literal::Bool(b),
                    None => {
                        return Err(SyntaxError::new(
                            position,
                            format!("unknown literal form `{}`", word),
                        ))
                    }
                },
            };
            args.push(literal);
        }
    }
}

fn constant(word: &str) -> Option<bool> {
    if word.eq_ignore_ascii_case("true") {
        Some(true)
    } else if word.eq_ignore_ascii_case("false") {
        Some(false)
    } else {
        None
    }
}
