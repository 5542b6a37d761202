use std::any::Any;
use std::fmt;

use crate::addon::AddonId;
use crate::http::EventKind;

/// Error type returned by addon callbacks.
///
/// Boxed so callbacks can use `?` on any error they encounter.
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors returned by the engine's fallible configuration APIs.
///
/// Problems met while dispatching are logged instead, so they never appear here.
#[derive(Debug)]
pub enum Error {
    /// A configured filter failed to parse
    Load(LoadError),
    /// A configured filter names an unknown predicate or misuses one
    Eval(EvalError),
    /// Engine configuration could not be decoded
    Config(serde_json::Error),
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Load(e) => write!(f, "{}", e),
            Error::Eval(e) => write!(f, "{}", e),
            Error::Config(e) => write!(f, "invalid engine configuration: {}", e),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Load(e) => Some(e),
            Error::Eval(e) => Some(e),
            Error::Config(e) => Some(e),
        }
    }
}

impl From<LoadError> for Error {
    fn from(e: LoadError) -> Self {
        Error::Load(e)
    }
}

impl From<EvalError> for Error {
    fn from(e: EvalError) -> Self {
        Error::Eval(e)
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Config(e)
    }
}

/// A malformed filter expression.
///
/// `position` is the byte offset into the filter text where the problem was found.
///
/// # Examples
///
/// ```
/// use addon_core::filter::parse;
///
/// let err = parse("(and (in-scope)").unwrap_err();
/// assert_eq!(err.position(), 0);
/// ```
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyntaxError {
    position: usize,
    message: String,
}

impl SyntaxError {
    /// Creates a new syntax error at the given byte offset.
    pub fn new(position: usize, message: impl Into<String>) -> Self {
        Self {
            position,
            message: message.into(),
        }
    }

    /// Returns the byte offset of the offending token.
    pub fn position(&self) -> usize {
        self.position
    }

    /// Returns the human-readable description.
    pub fn message(&self) -> &str {
        &self.message
    }
}

impl fmt::Display for SyntaxError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "syntax error at offset {}: {}", self.position, self.message)
    }
}

impl std::error::Error for SyntaxError {}

/// Errors raised when a parsed filter is bound to predicates or evaluated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EvalError {
    /// The filter names a predicate that is not registered
    UnknownPredicate {
        /// The predicate name as written in the filter
        name: String,
    },
    /// Argument count or argument types do not fit the predicate's signature
    PredicateArity {
        /// The predicate name
        name: String,
        /// What was wrong with the arguments
        message: String,
    },
    /// The predicate cannot be applied to this kind of event
    InvalidTarget {
        /// The predicate name
        name: String,
        /// The event kind it was evaluated against
        kind: EventKind,
    },
}

impl fmt::Display for EvalError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EvalError::UnknownPredicate { name } => write!(f, "unknown predicate `{}`", name),
            EvalError::PredicateArity { name, message } => {
                write!(f, "bad arguments to `{}`: {}", name, message)
            }
            EvalError::InvalidTarget { name, kind } => {
                write!(f, "predicate `{}` cannot be applied to a {}", name, kind)
            }
        }
    }
}

impl std::error::Error for EvalError {}

/// Which of an addon's two filters failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FilterSlot {
    /// The filter selecting requests
    Request,
    /// The filter selecting responses
    Response,
}

impl fmt::Display for FilterSlot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FilterSlot::Request => write!(f, "request filter"),
            FilterSlot::Response => write!(f, "response filter"),
        }
    }
}

/// An addon that was excluded from a registry because one of its filters did not parse.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadError {
    addon: AddonId,
    slot: FilterSlot,
    error: SyntaxError,
}

impl LoadError {
    pub(crate) fn new(addon: AddonId, slot: FilterSlot, error: SyntaxError) -> Self {
        Self { addon, slot, error }
    }

    /// Returns the id of the rejected addon.
    pub fn addon(&self) -> &AddonId {
        &self.addon
    }

    /// Returns which filter failed to parse.
    pub fn slot(&self) -> FilterSlot {
        self.slot
    }

    /// Returns the underlying syntax error.
    pub fn syntax_error(&self) -> &SyntaxError {
        &self.error
    }
}

impl fmt::Display for LoadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "addon {} rejected: {}: {}", self.addon, self.slot, self.error)
    }
}

impl std::error::Error for LoadError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        Some(&self.error)
    }
}

/// How an addon callback failed.
#[derive(Debug)]
pub enum CallbackFailure {
    /// The callback returned an error
    Returned(BoxError),
    /// The callback panicked; holds the panic message when one was available
    Panicked(String),
}

impl fmt::Display for CallbackFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallbackFailure::Returned(e) => write!(f, "{}", e),
            CallbackFailure::Panicked(msg) => write!(f, "panicked: {}", msg),
        }
    }
}

impl CallbackFailure {
    /// Builds a failure from a caught panic payload.
    pub(crate) fn from_panic(payload: Box<dyn Any + Send>) -> Self {
        CallbackFailure::Panicked(panic_message(payload.as_ref()))
    }
}

/// Extracts the message from a panic payload, if it is a string.
pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

/// An addon callback failure, with enough context to identify the addon and event.
#[derive(Debug)]
pub struct CallbackError {
    addon: AddonId,
    kind: EventKind,
    message_id: u64,
    failure: CallbackFailure,
}

impl CallbackError {
    pub(crate) fn new(
        addon: AddonId,
        kind: EventKind,
        message_id: u64,
        failure: CallbackFailure,
    ) -> Self {
        Self {
            addon,
            kind,
            message_id,
            failure,
        }
    }

    /// Returns the id of the failing addon.
    pub fn addon(&self) -> &AddonId {
        &self.addon
    }

    /// Returns the kind of event being dispatched.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Returns the id of the message being dispatched.
    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    /// Returns how the callback failed.
    pub fn failure(&self) -> &CallbackFailure {
        &self.failure
    }
}

impl fmt::Display for CallbackError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "addon {} failed handling {} {}: {}",
            self.addon, self.kind, self.message_id, self.failure
        )
    }
}

impl std::error::Error for CallbackError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match &self.failure {
            CallbackFailure::Returned(e) => Some(e.as_ref()),
            CallbackFailure::Panicked(_) => None,
        }
    }
}
