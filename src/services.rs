//! Narrow interfaces to the proxy host's services.
//!
//! The engine never implements these itself. The embedding proxy supplies
//! them to the [`Dispatcher`](crate::Dispatcher), which hands them to addons
//! through [`EventCtx`](crate::EventCtx).

use std::fmt;

use crate::error::BoxError;

/// Decides whether a URL belongs to the target scope.
///
/// Any `Fn(&str) -> bool` closure is a scope oracle.
pub trait ScopeOracle: Send + Sync {
    /// Returns true if `url` is in scope.
    fn is_in_scope(&self, url: &str) -> bool;
}

impl<F> ScopeOracle for F
where
    F: Fn(&str) -> bool + Send + Sync,
{
    fn is_in_scope(&self, url: &str) -> bool {
        self(url)
    }
}

/// A scope with nothing in it.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoScope;

impl ScopeOracle for NoScope {
    fn is_in_scope(&self, _url: &str) -> bool {
        false
    }
}

/// A scope made of URL prefixes.
///
/// # Examples
///
/// ```
/// use addon_core::{ScopeOracle, ScopePrefixes};
///
/// let scope = ScopePrefixes::new(["https://api.example.com/", "http://localhost:8080"]);
/// assert!(scope.is_in_scope("https://api.example.com/v1/users"));
/// assert!(!scope.is_in_scope("https://example.com/"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct ScopePrefixes {
    prefixes: Vec<String>,
}

impl ScopePrefixes {
    /// Creates a scope from URL prefixes.
    pub fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes.into_iter().map(Into::into).collect(),
        }
    }
}

impl ScopeOracle for ScopePrefixes {
    fn is_in_scope(&self, url: &str) -> bool {
        self.prefixes.iter().any(|p| url.starts_with(p.as_str()))
    }
}

/// Highlight colours for the proxy history.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[allow(missing_docs)]
pub enum Highlight {
    None,
    Red,
    Orange,
    Yellow,
    Green,
    Cyan,
    Blue,
    Pink,
    Magenta,
    Gray,
}

impl fmt::Display for Highlight {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Highlight::None => "none",
            Highlight::Red => "red",
            Highlight::Orange => "orange",
            Highlight::Yellow => "yellow",
            Highlight::Green => "green",
            Highlight::Cyan => "cyan",
            Highlight::Blue => "blue",
            Highlight::Pink => "pink",
            Highlight::Magenta => "magenta",
            Highlight::Gray => "gray",
        };
        write!(f, "{}", name)
    }
}

/// Marks messages in the proxy's UI.
pub trait Annotator: Send + Sync {
    /// Sets the highlight colour of a message.
    fn set_highlight(&self, message_id: u64, highlight: Highlight);

    /// Replaces the notes attached to a message.
    fn set_notes(&self, message_id: u64, notes: &str);
}

/// A symmetric or asymmetric cipher produced by a [`CipherFactory`].
pub trait Cipher: Send {
    /// Installs key material.
    fn set_key(&mut self, key: &[u8]) -> Result<(), BoxError>;

    /// Encrypts `data`.
    fn encrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, BoxError>;

    /// Decrypts `data`.
    fn decrypt(&mut self, data: &[u8]) -> Result<Vec<u8>, BoxError>;
}

/// Builds ciphers from a transformation spec such as `"AES/CBC/PKCS5Padding"`.
pub trait CipherFactory: Send + Sync {
    /// Creates a cipher for `spec`.
    fn new_cipher(&self, spec: &str) -> Result<Box<dyn Cipher>, BoxError>;
}
