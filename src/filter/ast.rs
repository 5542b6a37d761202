use std::fmt;
use std::sync::OnceLock;

use regex::Regex;

/// A parsed filter expression.
///
/// `And(vec![])` is the constant true and `Or(vec![])` the constant false;
/// the parser produces these for the bare literals `true` and `false`.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterExpression {
    /// True iff every child is true
    And(Vec<FilterExpression>),
    /// True iff any child is true
    Or(Vec<FilterExpression>),
    /// Logical negation
    Not(Box<FilterExpression>),
    /// A named test against traffic facts
    Predicate {
        /// Lowercased predicate name
        name: String,
        /// Literal arguments in order
        args: Vec<Literal>,
    },
}

impl FilterExpression {
    /// The constant-true expression, `And([])`.
    pub fn always() -> Self {
        FilterExpression::And(Vec::new())
    }

    /// The constant-false expression, `Or([])`.
    pub fn never() -> Self {
        FilterExpression::Or(Vec::new())
    }

    /// Builds a predicate leaf; the name is lowercased.
    pub fn predicate(name: &str, args: Vec<Literal>) -> Self {
        FilterExpression::Predicate {
            name: name.to_ascii_lowercase(),
            args,
        }
    }

    /// Returns true for the constant-true expression.
    pub fn is_always(&self) -> bool {
        matches!(self, FilterExpression::And(children) if children.is_empty())
    }
}

impl fmt::Display for FilterExpression {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterExpression::And(children) if children.is_empty() => write!(f, "true"),
            FilterExpression::Or(children) if children.is_empty() => write!(f, "false"),
            FilterExpression::And(children) => write_form(f, "and", children),
            FilterExpression::Or(children) => write_form(f, "or", children),
            FilterExpression::Not(child) => write!(f, "(not {})", child),
            FilterExpression::Predicate { name, args } => write_form(f, name, args),
        }
    }
}

fn write_form<T: fmt::Display>(f: &mut fmt::Formatter<'_>, head: &str, items: &[T]) -> fmt::Result {
    write!(f, "({}", head)?;
    for item in items {
        write!(f, " {}", item)?;
    }
    write!(f, ")")
}

/// A literal predicate argument.
#[derive(Debug, Clone, PartialEq)]
pub enum Literal {
    /// A quoted string with escapes resolved
    Str(String),
    /// A raw string, compiled as a regular expression
    Regex(Pattern),
    /// `true` or `false`
    Bool(bool),
    /// A decimal, hex or binary integer
    Int(i64),
}

impl Literal {
    /// Returns the string value; a raw string yields its source text.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Literal::Str(s) => Some(s),
            Literal::Regex(p) => Some(p.as_str()),
            _ => None,
        }
    }

    /// Returns the compiled pattern of a raw string.
    pub fn as_pattern(&self) -> Option<&Pattern> {
        match self {
            Literal::Regex(p) => Some(p),
            _ => None,
        }
    }

    /// Returns the boolean value.
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Literal::Bool(b) => Some(*b),
            _ => None,
        }
    }

    /// Returns the integer value.
    pub fn as_int(&self) -> Option<i64> {
        match self {
            Literal::Int(n) => Some(*n),
            _ => None,
        }
    }

    /// Returns a short name for the literal's kind, used in error messages.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Literal::Str(_) => "string",
            Literal::Regex(_) => "regex",
            Literal::Bool(_) => "boolean",
            Literal::Int(_) => "integer",
        }
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Literal::Str(s) => {
                write!(f, "\"")?;
                for c in s.chars() {
                    match c {
                        '"' => write!(f, "\\\"")?,
                        '\\' => write!(f, "\\\\")?,
                        '\n' => write!(f, "\\n")?,
                        '\t' => write!(f, "\\t")?,
                        '\r' => write!(f, "\\r")?,
                        c if (c as u32) < 0x20 || c == '\u{7f}' => write!(f, "\\x{:02x}", c as u32)?,
                        c => write!(f, "{}", c)?,
                    }
                }
                write!(f, "\"")
            }
            Literal::Regex(p) => write!(f, "r\"{}\"", p.as_str()),
            Literal::Bool(b) => write!(f, "{}", b),
            Literal::Int(n) => write!(f, "{}", n),
        }
    }
}

/// A compiled regular expression that compares equal by source text.
///
/// [`is_match`](Pattern::is_match) searches anywhere in the text, so anchoring
/// follows the pattern's own `^` and `$`. [`is_full_match`](Pattern::is_full_match)
/// requires the match to span the whole text.
#[derive(Debug, Clone)]
pub struct Pattern {
    regex: Regex,
    anchored: OnceLock<Option<Regex>>,
}

impl Pattern {
    /// Compiles `source`.
    ///
    /// # Errors
    ///
    /// Returns the regex compiler's error for invalid syntax.
    pub fn new(source: &str) -> Result<Self, regex::Error> {
        Ok(Self {
            regex: Regex::new(source)?,
            anchored: OnceLock::new(),
        })
    }

    /// Returns the source text.
    pub fn as_str(&self) -> &str {
        self.regex.as_str()
    }

    /// Returns the compiled regex.
    pub fn regex(&self) -> &Regex {
        &self.regex
    }

    /// Returns true if the pattern matches somewhere in `text`.
    pub fn is_match(&self, text: &str) -> bool {
        self.regex.is_match(text)
    }

    /// Returns true if the pattern matches all of `text`.
    pub fn is_full_match(&self, text: &str) -> bool {
        let anchored = self
            .anchored
            .get_or_init(|| Regex::new(&format!(r"\A(?:{})\z", self.as_str())).ok());
        match anchored {
            Some(re) => re.is_match(text),
            None => self
                .regex
                .find(text)
                .is_some_and(|m| m.start() == 0 && m.end() == text.len()),
        }
    }
}

impl PartialEq for Pattern {
    fn eq(&self, other: &Self) -> bool {
        self.as_str() == other.as_str()
    }
}

impl fmt::Display for Pattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
