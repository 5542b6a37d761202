use std::collections::BTreeMap;
use std::sync::Arc;

use bytes::Bytes;
use http::{StatusCode, Version};

use super::{Headers, Request, ToolSource};

/// An HTTP response as seen by addons.
///
/// A response keeps a shared handle to the request that produced it. Predicates
/// about the URL, method or scope of a response are answered from that request.
#[derive(Debug, Clone, PartialEq)]
pub struct Response {
    status: StatusCode,
    reason: Option<String>,
    version: Version,
    headers: Headers,
    body: Bytes,
    initiating_request: Arc<Request>,
    tool_source: ToolSource,
    message_id: u64,
    attachments: Arc<BTreeMap<String, String>>,
}

impl Response {
    /// Creates a response to `request` with no headers and an empty body.
    ///
    /// Tool source, message id and attachments are inherited from the request.
    pub fn new(request: impl Into<Arc<Request>>, status: StatusCode) -> Self {
        let initiating_request = request.into();
        Self {
            status,
            reason: None,
            version: initiating_request.version(),
            headers: Headers::new(),
            body: Bytes::new(),
            tool_source: initiating_request.tool_source().clone(),
            message_id: initiating_request.message_id(),
            attachments: initiating_request.shared_attachments(),
            initiating_request,
        }
    }

    /// Returns the status code.
    pub fn status(&self) -> StatusCode {
        self.status
    }

    /// Returns the reason phrase: the explicit one if set, else the canonical one.
    pub fn reason(&self) -> &str {
        self.reason
            .as_deref()
            .or_else(|| self.status.canonical_reason())
            .unwrap_or("")
    }

    /// Returns the HTTP version.
    pub fn version(&self) -> Version {
        self.version
    }

    /// Returns the request that produced this response.
    pub fn initiating_request(&self) -> &Request {
        &self.initiating_request
    }

    /// Returns the header collection.
    pub fn headers(&self) -> &Headers {
        &self.headers
    }

    /// Returns the first value of the named header.
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    /// Returns the value of a cookie set by this response.
    pub fn cookie(&self, name: &str) -> Option<String> {
        self.headers.get_all("Set-Cookie").find_map(|line| {
            let first = line.split(';').next()?;
            let (key, value) = first.trim().split_once('=')?;
            (key.trim() == name).then(|| value.trim().to_string())
        })
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

    /// Returns the tool the exchange came from.
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

    /// Returns a copy with a different status; an explicit reason phrase is cleared.
    pub fn with_status(&self, status: StatusCode) -> Self {
        Self {
            status,
            reason: None,
            ..self.clone()
        }
    }

    /// Returns a copy with an explicit reason phrase.
    pub fn with_reason(&self, reason: impl Into<String>) -> Self {
        Self {
            reason: Some(reason.into()),
            ..self.clone()
        }
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
