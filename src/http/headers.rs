use std::fmt;
use std::sync::Arc;

/// A single header line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Header {
    name: String,
    value: String,
}

impl Header {
    /// Creates a header from a name and value.
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }

    /// Returns the header name as it appeared on the wire.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Returns the header value.
    pub fn value(&self) -> &str {
        &self.value
    }

    fn is(&self, name: &str) -> bool {
        self.name.eq_ignore_ascii_case(name)
    }
}

impl fmt::Display for Header {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.name, self.value)
    }
}

/// An ordered header collection with case-insensitive lookup.
///
/// Names may repeat. Cloning is cheap: the list is shared until one of the
/// `with_*` methods produces a modified copy.
///
/// # Examples
///
/// ```
/// use addon_core::http::Headers;
///
/// let headers: Headers = [("Accept", "text/html"), ("Set-Cookie", "a=1"), ("set-cookie", "b=2")]
///     .into_iter()
///     .collect();
///
/// assert_eq!(headers.get("accept"), Some("text/html"));
/// assert_eq!(headers.get_all("SET-COOKIE").count(), 2);
///
/// let updated = headers.with_updated("Accept", "application/json");
/// assert_eq!(updated.get("Accept"), Some("application/json"));
/// assert_eq!(headers.get("Accept"), Some("text/html"));
/// ```
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Headers {
    entries: Arc<Vec<Header>>,
}

impl Headers {
    /// Creates an empty header collection.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the number of header lines.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns true if there are no header lines.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Iterates over header lines in wire order.
    pub fn iter(&self) -> std::slice::Iter<'_, Header> {
        self.entries.iter()
    }

    /// Returns the first value of the named header.
    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|h| h.is(name))
            .map(|h| h.value.as_str())
    }

    /// Iterates over every value of the named header, in order.
    pub fn get_all<'a>(&'a self, name: &'a str) -> impl Iterator<Item = &'a str> + 'a {
        self.entries
            .iter()
            .filter(move |h| h.is(name))
            .map(|h| h.value.as_str())
    }

    /// Returns true if the named header is present at least once.
    pub fn contains(&self, name: &str) -> bool {
        self.entries.iter().any(|h| h.is(name))
    }

    /// Returns a copy with a header line appended.
    pub fn with_added(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let mut next = self.clone();
        Arc::make_mut(&mut next.entries).push(Header::new(name, value));
        next
    }

    /// Returns a copy where the named header has exactly one value.
    ///
    /// The first occurrence keeps its position; later occurrences are removed.
    /// The header is appended if it was absent.
    pub fn with_updated(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        let name = name.into();
        let value = value.into();
        let mut next = self.clone();
        let entries = Arc::make_mut(&mut next.entries);
        match entries.iter().position(|h| h.is(&name)) {
            Some(first) => {
                entries[first].value = value;
                let mut index = 0;
                entries.retain(|h| {
                    let keep = index <= first || !h.is(&name);
                    index += 1;
                    keep
                });
            }
            None => entries.push(Header::new(name, value)),
        }
        next
    }

    /// Returns a copy without any line of the named header.
    pub fn without(&self, name: &str) -> Self {
        if !self.contains(name) {
            return self.clone();
        }
        let mut next = self.clone();
        Arc::make_mut(&mut next.entries).retain(|h| !h.is(name));
        next
    }
}

impl<N, V> FromIterator<(N, V)> for Headers
where
    N: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (N, V)>>(iter: I) -> Self {
        Self {
            entries: Arc::new(
                iter.into_iter()
                    .map(|(name, value)| Header::new(name, value))
                    .collect(),
            ),
        }
    }
}

impl<'a> IntoIterator for &'a Headers {
    type Item = &'a Header;
    type IntoIter = std::slice::Iter<'a, Header>;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}
