//! The filter expression language.
//!
//! Filters are S-expressions that select which traffic an addon sees:
//!
//! ```text
//! (and (in-scope)
//!      (not (file-ext-eq "js" "css" "png"))
//!      (header-matches "Content-Type" r"application/json"))
//! ```
//!
//! Text is turned into a [`FilterExpression`] by [`parse`]. Predicate names are
//! resolved against the built-in table (see [`predicates`]) the first time an
//! expression is evaluated, so the grammar never changes when predicates are
//! added.

mod ast;
mod eval;
mod parser;
mod predicate;

use std::fmt;
use std::sync::OnceLock;

pub use ast::{FilterExpression, Literal, Pattern};
pub use eval::evaluate;
pub use parser::parse;
pub use predicate::{lookup, predicates, ArgKind, PredicateDef};

use crate::error::{EvalError, SyntaxError};
use crate::facts::TrafficFacts;
use eval::Bound;

/// A filter as held by a loaded addon.
///
/// The text is parsed once when the filter is created. Predicates are bound on
/// the first call to [`matches`](Filter::matches) and the outcome is kept,
/// including a binding error, so later events pay for neither step.
///
/// # Examples
///
/// ```
/// use addon_core::filter::Filter;
/// use addon_core::http::Request;
/// use addon_core::{ScopePrefixes, TrafficFacts};
/// use http::Method;
///
/// let filter = Filter::parse(r#"(and (in-scope) (path-contains "api"))"#).unwrap();
/// let scope = ScopePrefixes::new(["https://example.com/"]);
///
/// let api = Request::from_url(Method::GET, "https://example.com/api/users").unwrap();
/// let asset = Request::from_url(Method::GET, "https://example.com/static/app.js").unwrap();
///
/// assert!(filter.matches(&TrafficFacts::of_request(&api, &scope)).unwrap());
/// assert!(!filter.matches(&TrafficFacts::of_request(&asset, &scope)).unwrap());
/// ```
#[derive(Debug, Clone)]
pub struct Filter {
    source: Option<String>,
    expr: FilterExpression,
    bound: OnceLock<Result<Bound, EvalError>>,
}

impl Filter {
    /// Parses filter text.
    ///
    /// # Errors
    ///
    /// Returns the parser's [`SyntaxError`].
    pub fn parse(text: &str) -> Result<Self, SyntaxError> {
        let expr = parse(text)?;
        Ok(Self {
            source: Some(text.to_string()),
            expr,
            bound: OnceLock::new(),
        })
    }

    /// The filter that matches everything.
    pub fn always() -> Self {
        Self::from_expression(FilterExpression::always())
    }

    /// Wraps an already-built expression.
    pub fn from_expression(expr: FilterExpression) -> Self {
        Self {
            source: None,
            expr,
            bound: OnceLock::new(),
        }
    }

    /// Returns the text this filter was parsed from, if any.
    pub fn source(&self) -> Option<&str> {
        self.source.as_deref()
    }

    /// Returns the parsed expression.
    pub fn expression(&self) -> &FilterExpression {
        &self.expr
    }

    /// Returns true if this filter is the constant true.
    pub fn is_always(&self) -> bool {
        self.expr.is_always()
    }

    /// Resolves every predicate without evaluating anything.
    ///
    /// The outcome is cached exactly as the first [`matches`](Filter::matches)
    /// would cache it.
    ///
    /// # Errors
    ///
    /// Returns the [`EvalError`] for an unknown predicate or bad arguments.
    pub fn check(&self) -> Result<(), EvalError> {
        match self.bound() {
            Ok(_) => Ok(()),
            Err(e) => Err(e.clone()),
        }
    }

    /// Tests a fact view.
    ///
    /// # Errors
    ///
    /// Returns the [`EvalError`] raised while binding or evaluating.
    pub fn matches(&self, facts: &TrafficFacts<'_>) -> Result<bool, EvalError> {
        match self.bound() {
            Ok(bound) => bound.eval(facts),
            Err(e) => Err(e.clone()),
        }
    }

    fn bound(&self) -> &Result<Bound, EvalError> {
        self.bound.get_or_init(|| eval::bind(&self.expr))
    }
}

impl Default for Filter {
    fn default() -> Self {
        Self::always()
    }
}

impl fmt::Display for Filter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.source {
            Some(source) => write!(f, "{}", source.trim()),
            None => write!(f, "{}", self.expr),
        }
    }
}
