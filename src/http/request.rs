use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use http::uri::{Authority, PathAndQuery, Uri};
use http::{Method, Version};

use super::{find_pair, url_encode, Headers, ToolSource};

/// An HTTP request as seen by addons.
///
/// Requests are immutable values. Mutators return a new request that shares
/// unchanged parts with the original, so an addon holding a reference to an
/// earlier value never observes a later change.
///
/// # Examples
///
/// ```
/// use addon_core::http::Request;
/// use http::Method;
///
/// let req = Request::from_url(Method::GET, "https://api.example.com/users?page=2").unwrap();
/// let tagged = req.with_header("X-Scan", "1");
///
/// assert_eq!(req.path(), "/users");
/// assert_eq!(req.query_param("page").as_deref(), Some("2"));
/// assert!(req.header("X-Scan").is_none());
/// assert_eq!(tagged.header("x-scan"), Some("1"));
/// ```
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    method: Method,
    uri: Uri,
    version: Version,
    headers: Headers,
    body: Bytes,
    tool_source: ToolSource,
    message_id: u64,
    attachments: Arc<BTreeMap<String, String>>,
}

impl Request {
    /// Creates a request with no headers and an empty body.
    pub fn new(method: Method, uri: Uri) -> Self {
        Self {
            method,
            uri,
            version: Version::HTTP_11,
            headers: Headers::new(),
            body: Bytes::new(),
            tool_source: ToolSource::Proxy,
            message_id: 0,
            attachments: Arc::new(BTreeMap::new()),
        }
    }

    /// Creates a request by parsing `url`.
    ///
    /// # Errors
    ///
    /// Returns an error if `url` is not a valid URI.
    pub fn from_url(method: Method, url: &str) -> Result<Self, http::uri::InvalidUri> {
        Ok(Self::new(method, url.parse()?))
    }

    /// Returns the request method.
    pub fn method(&self) -> &Method {
        &self.method
    }

    /// Returns the request target exactly as held.
    pub fn uri(&self) -> &Uri {
        &self.uri
    }

    /// Returns the HTTP version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the absolute URL, using the `Host` header for origin-form targets.
    pub fn url(&self) -> String {
        if self.uri.authority().is_some() {
            return self.uri.to_string();
        }
        let path = self
            .uri
            .path_and_query()
            .map(PathAndQuery::as_str)
            .unwrap_or("/");
        match self.headers.get("Host") {
            Some(host) => format!("{}://{}{}", self.scheme(), host.trim(), path),
            None => path.to_string(),
        }
    }

    /// Returns the URL scheme, defaulting to `http`.
    pub fn scheme(&self) -> &str {
        self.uri.scheme_str().unwrap_or("http")
    }

    /// Returns the target host from the URI authority or else the `Host` header.
    pub fn host(&self) -> Option<&str> {
        match self.uri.host() {
            Some(host) => Some(host),
            None => self.headers.get("Host").map(|h| split_host_port(h.trim()).0),
        }
    }

    /// Returns the target port: explicit in the URI or `Host` header, else the scheme default.
    pub fn port(&self) -> Option<u16> {
        let explicit = match self.uri.authority() {
            Some(authority) => authority.port_u16(),
            None => self
                .headers
                .get("Host")
                .and_then(|h| split_host_port(h.trim()).1),
        };
        explicit.or(match self.scheme() {
            s if s.eq_ignore_ascii_case("https") => Some(443),
            s if s.eq_ignore_ascii_case("http") => Some(80),
            _ => None,
        })
    }

    /// Returns the path without its query string.
    pub fn path(&self) -> &str {
        self.uri.path()
    }

    /// Returns the raw query string, if any.
    pub fn query(&self) -> Option<&str> {
        self.uri.query()
    }

    /// Returns the decoded value of the first query parameter called `name`.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.query().and_then(|q| find_pair(q, name))
    }

    /// Returns the decoded value of a url-encoded form body parameter.
    pub fn form_param(&self, name: &str) -> Option<String> {
        let is_form = self
            .headers
            .get("Content-Type")
            .is_some_and(|ct| ct.to_ascii_lowercase().starts_with("application/x-www-form-urlencoded"));
        if !is_form {
            return None;
        }
        find_pair(&String::from_utf8_lossy(&self.body), name)
    }

    /// Returns the value of the named cookie from the `Cookie` headers.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers
            .get_all("Cookie")
            .flat_map(|line| line.split(';'))
            .find_map(|pair| {
                let (key, value) = pair.trim().split_once('=')?;
                (key.trim() == name).then(|| value.trim().to_string())
            })
    }

    /// Returns the extension of the last path segment, without the dot.
    pub fn file_extension(&self) -> Option<&str> {
        let file = self.path().rsplit('/').next()?;
        file.rsplit_once('.').map(|(_, ext)| ext)
    }

    /// Returns the header collection.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the first value of the named header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Returns the raw body.
    pub fn body(&self) -> &Bytes {
        &self.body
    }

    /// Returns the body decoded as UTF-8, replacing invalid sequences.
    pub fn body_to_string(&self) -> String {
        String::from_utf8_lossy(&self.body).into_owned()
    }

    /// Parses the body as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if the body is not valid JSON.
    pub fn body_to_json(&self) -> Result<serde_json::Value, serde_json::Error> {
        serde_json::from_slice(&self.body)
    }

    /// Returns the tool the request came from.
    pub fn tool_source(&self) -> &ToolSource {
        &self.tool_source
    }

    /// Returns the proxy-assigned message id.
    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    /// Returns an attachment left by an earlier addon.
    pub fn attachment(&self, key: &str) -> Option<&str> {
        self.attachments.get(key).map(String::as_str)
    }

    /// Returns true if an attachment with this key exists.
    pub fn has_attachment(&self, key: &str) -> bool {
        self.attachments.contains_key(key)
    }

    /// Iterates over all attachments, ordered by key.
    pub fn attachments(&self) -> impl Iterator<Item = (&str, &str)> + '_ {
        self.attachments.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub(super) fn shared_attachments(&self) -> Arc<BTreeMap<String, String>> {
        Arc::clone(&self.attachments)
    }

    /// Returns a copy with a different method.
    pub fn with_method(&self, method: Method) -> Self {
        Self {
            method,
            ..self.clone()
        }
    }

    /// Returns a copy with a different HTTP version.
    pub fn with_version(&self, version: Version) -> Self {
        Self {
            version,
            ..self.clone()
        }
    }

    /// Returns a copy with a different request target.
    pub fn with_uri(&self, uri: Uri) -> Self {
        Self {
            uri,
            ..self.clone()
        }
    }

    /// Returns a copy with a new path, keeping the query string.
    ///
    /// # Errors
    ///
    /// Returns an error if `path` cannot form a valid URI.
    pub fn with_path(&self, path: &str) -> Result<Self, http::Error> {
        let path_and_query = match self.query() {
            Some(query) => format!("{}?{}", path, query),
            None => path.to_string(),
        };
        self.with_path_and_query(&path_and_query)
    }

    /// Returns a copy with a query parameter set, replacing an existing one of the same name.
    ///
    /// # Errors
    ///
    /// Returns an error if the resulting target is not a valid URI.
    pub fn with_query_parameter(&self, key: &str, value: &str) -> Result<Self, http::Error> {
        let encoded = format!("{}={}", url_encode(key), url_encode(value));
        let mut replaced = false;
        let mut pairs: Vec<String> = Vec::new();
        for pair in self.query().unwrap_or("").split('&').filter(|p| !p.is_empty()) {
            let name = pair.split_once('=').map_or(pair, |(k, _)| k);
            if super::url_decode(name) == key {
                if !replaced {
                    pairs.push(encoded.clone());
                    replaced = true;
                }
            } else {
                pairs.push(pair.to_string());
            }
        }
        if !replaced {
            pairs.push(encoded);
        }
        let path_and_query = format!("{}?{}", self.path(), pairs.join("&"));
        self.with_path_and_query(&path_and_query)
    }

    fn with_path_and_query(&self, path_and_query: &str) -> Result<Self, http::Error> {
        let mut parts = self.uri.clone().into_parts();
        parts.path_and_query = Some(PathAndQuery::try_from(path_and_query)?);
        let uri = Uri::from_parts(parts)?;
        Ok(self.with_uri(uri))
    }

    /// Returns a copy with a new target host, keeping scheme, port, and path.
    ///
    /// The `Host` header is updated as well when present.
    ///
    /// # Errors
    ///
    /// Returns an error if `host` is not a valid authority.
    pub fn with_host(&self, host: &str) -> Result<Self, http::Error> {
        let authority = match self.uri.port_u16() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        let headers = if self.headers.contains("Host") {
            self.headers.with_updated("Host", authority.clone())
        } else {
            self.headers.clone()
        };
        let uri = if self.uri.authority().is_some() {
            let mut parts = self.uri.clone().into_parts();
            parts.authority = Some(Authority::try_from(authority.as_str())?);
            Uri::from_parts(parts)?
        } else {
            self.uri.clone()
        };
        Ok(Self {
            uri,
            headers,
            ..self.clone()
        })
    }

    /// Returns a copy where the named header has exactly this value.
    pub fn with_header(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_headers(self.headers.with_updated(name, value))
    }

    /// Returns a copy with an additional header line.
    pub fn with_added_header(&self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.with_headers(self.headers.with_added(name, value))
    }

    /// Returns a copy without the named header.
    pub fn without_header(&self, name: &str) -> Self {
        self.with_headers(self.headers.without(name))
    }

    /// Returns a copy with a replaced header collection.
    pub fn with_headers(&self, headers: Headers) -> Self {
        Self {
            headers,
            ..self.clone()
        }
    }

    /// Returns a copy with a new body; an existing `Content-Length` is kept in sync.
    pub fn with_body(&self, body: impl Into<Bytes>) -> Self {
        let body = body.into();
        let headers = if self.headers.contains("Content-Length") {
            self.headers
                .with_updated("Content-Length", body.len().to_string())
        } else {
            self.headers.clone()
        };
        Self {
            body,
            headers,
            ..self.clone()
        }
    }

    /// Returns a copy whose body is `value` serialized as JSON.
    ///
    /// # Errors
    ///
    /// Returns an error if `value` cannot be serialized.
    pub fn with_json(&self, value: &serde_json::Value) -> Result<Self, serde_json::Error> {
        let body = serde_json::to_vec(value)?;
        Ok(self
            .with_body(body)
            .with_header("Content-Type", "application/json"))
    }

    /// Returns a copy carrying an attachment for later addons.
    pub fn with_attachment(&self, key: impl Into<String>, value: impl Into<String>) -> Self {
        let mut attachments = Arc::clone(&self.attachments);
        Arc::make_mut(&mut attachments).insert(key.into(), value.into());
        Self {
            attachments,
            ..self.clone()
        }
    }

    /// Returns a copy attributed to a different tool.
    pub fn with_tool_source(&self, tool_source: ToolSource) -> Self {
        Self {
            tool_source,
            ..self.clone()
        }
    }

    /// Returns a copy with a different message id.
    pub fn with_message_id(&self, message_id: u64) -> Self {
        Self {
            message_id,
            ..self.clone()
        }
    }
}

/// Splits `host[:port]`, keeping bracketed IPv6 literals intact.
fn split_host_port(value: &str) -> (&str, Option<u16>) {
    if value.starts_with('[') {
        return match value.find(']') {
            Some(end) => {
                let port = value[end + 1..].strip_prefix(':').and_then(|p| p.parse().ok());
                (&value[..=end], port)
            }
            None => (value, None),
        };
    }
    match value.rsplit_once(':') {
        Some((host, port)) => match port.parse() {
            Ok(port) => (host, Some(port)),
            Err(_) => (value, None),
        },
        None => (value, None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(url: &str) -> Request {
        Request::from_url(Method::GET, url).unwrap()
    }

    #[test]
    fn absolute_url_parts() {
        let r = req("https://api.example.com:8443/v1/users.json?id=7&name=a%20b");
        assert_eq!(r.scheme(), "https");
        assert_eq!(r.host(), Some("api.example.com"));
        assert_eq!(r.port(), Some(8443));
        assert_eq!(r.path(), "/v1/users.json");
        assert_eq!(r.query(), Some("id=7&name=a%20b"));
        assert_eq!(r.query_param("name").as_deref(), Some("a b"));
        assert_eq!(r.file_extension(), Some("json"));
        assert_eq!(
            r.url(),
            "https://api.example.com:8443/v1/users.json?id=7&name=a%20b"
        );
    }

    #[test]
    fn origin_form_uses_host_header() {
        let r = req("/login?next=%2F").with_header("Host", "example.com:8080");
        assert_eq!(r.host(), Some("example.com"));
        assert_eq!(r.port(), Some(8080));
        assert_eq!(r.url(), "http://example.com:8080/login?next=%2F");
    }

    #[test]
    fn default_ports_follow_scheme() {
        assert_eq!(req("https://example.com/").port(), Some(443));
        assert_eq!(req("http://example.com/").port(), Some(80));
    }

    #[test]
    fn ipv6_host_header() {
        assert_eq!(split_host_port("[::1]:9000"), ("[::1]", Some(9000)));
        assert_eq!(split_host_port("[::1]"), ("[::1]", None));
        assert_eq!(split_host_port("host"), ("host", None));
    }

    #[test]
    fn mutators_do_not_touch_receiver() {
        let original = req("http://example.com/a?x=1");
        let changed = original
            .with_method(Method::POST)
            .with_header("X-Test", "yes")
            .with_body("payload")
            .with_attachment("note", "seen");

        assert_eq!(original.method(), Method::GET);
        assert!(original.header("X-Test").is_none());
        assert!(original.body().is_empty());
        assert!(!original.has_attachment("note"));

        assert_eq!(changed.method(), Method::POST);
        assert_eq!(changed.header("x-test"), Some("yes"));
        assert_eq!(changed.body().as_ref(), b"payload");
        assert_eq!(changed.attachment("note"), Some("seen"));
    }

    #[test]
    fn with_query_parameter_adds_or_replaces() {
        let r = req("http://example.com/search?q=old&page=1");
        let replaced = r.with_query_parameter("q", "new value").unwrap();
        assert_eq!(replaced.query(), Some("q=new%20value&page=1"));

        let added = r.with_query_parameter("token", "abc").unwrap();
        assert_eq!(added.query(), Some("q=old&page=1&token=abc"));

        let bare = req("http://example.com/").with_query_parameter("a", "1").unwrap();
        assert_eq!(bare.url(), "http://example.com/?a=1");
    }

    #[test]
    fn with_path_keeps_query() {
        let r = req("http://example.com/old?keep=1")
            .with_path("/new/place")
            .unwrap();
        assert_eq!(r.path(), "/new/place");
        assert_eq!(r.query(), Some("keep=1"));
    }

    #[test]
    fn with_host_rewrites_authority_and_header() {
        let r = req("https://not-ivision.com:8443/x").with_header("Host", "not-ivision.com:8443");
        let moved = r.with_host("ivision.com").unwrap();
        assert_eq!(moved.host(), Some("ivision.com"));
        assert_eq!(moved.port(), Some(8443));
        assert_eq!(moved.header("Host"), Some("ivision.com:8443"));
    }

    #[test]
    fn with_body_syncs_content_length() {
        let r = req("http://example.com/").with_header("Content-Length", "0");
        let next = r.with_body("12345");
        assert_eq!(next.header("Content-Length"), Some("5"));
        assert_eq!(r.header("Content-Length"), Some("0"));
    }

    #[test]
    fn with_json_sets_content_type() {
        let value = serde_json::json!({"user": "alice", "admin": false});
        let r = req("http://example.com/").with_json(&value).unwrap();
        assert_eq!(r.header("Content-Type"), Some("application/json"));
        assert_eq!(r.body_to_json().unwrap(), value);
    }

    #[test]
    fn form_params_require_form_content_type() {
        let r = req("http://example.com/login")
            .with_body("user=alice&pass=s%3Dcret");
        assert_eq!(r.form_param("user"), None);

        let form = r.with_header("Content-Type", "application/x-www-form-urlencoded");
        assert_eq!(form.form_param("pass").as_deref(), Some("s=cret"));
        assert_eq!(form.form_param("missing"), None);
    }

    #[test]
    fn cookies_from_cookie_headers() {
        let r = req("http://example.com/")
            .with_added_header("Cookie", "session=abc; theme=dark")
            .with_added_header("Cookie", "lang=en");
        assert_eq!(r.cookie("theme").as_deref(), Some("dark"));
        assert_eq!(r.cookie("lang").as_deref(), Some("en"));
        assert_eq!(r.cookie("missing"), None);
    }

    #[test]
    fn equal_by_value_after_noop_clone() {
        let r = req("http://example.com/a").with_header("A", "1");
        assert_eq!(r.clone(), r);
    }
}
