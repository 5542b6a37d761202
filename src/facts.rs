use std::cell::OnceCell;

use bytes::Bytes;
use http::{Method, StatusCode};

use crate::http::{EventKind, Headers, Request, Response, ToolSource};
use crate::services::ScopeOracle;

#[derive(Debug, Clone, Copy)]
enum Target<'a> {
    Request(&'a Request),
    Response(&'a Response),
}

/// A read-only view of one message, as filters see it.
///
/// URL, method and scope questions about a response are answered from the
/// request that produced it. Headers, body, cookies, tool source and
/// attachments always belong to the message itself.
///
/// The body is decoded to text or JSON at most once per view, and only when a
/// predicate asks for it.
pub struct TrafficFacts<'a> {
    target: Target<'a>,
    scope: &'a dyn ScopeOracle,
    text: OnceCell<String>,
    json: OnceCell<Option<serde_json::Value>>,
}

impl<'a> TrafficFacts<'a> {
    /// Builds a view of a request.
    pub fn of_request(request: &'a Request, scope: &'a dyn ScopeOracle) -> Self {
        Self::new(Target::Request(request), scope)
    }

    /// Builds a view of a response.
    pub fn of_response(response: &'a Response, scope: &'a dyn ScopeOracle) -> Self {
        Self::new(Target::Response(response), scope)
    }

    fn new(target: Target<'a>, scope: &'a dyn ScopeOracle) -> Self {
        Self {
            target,
            scope,
            text: OnceCell::new(),
            json: OnceCell::new(),
        }
    }

    /// Returns whether this is a request or a response.
    pub fn kind(&self) -> EventKind {
        match self.target {
            Target::Request(_) => EventKind::Request,
            Target::Response(_) => EventKind::Response,
        }
    }

    /// Returns the request itself, or the initiating request of a response.
    pub fn request(&self) -> &'a Request {
        match self.target {
            Target::Request(req) => req,
            Target::Response(res) => res.initiating_request(),
        }
    }

    /// Returns the response, if this is a view of one.
    pub fn response(&self) -> Option<&'a Response> {
        match self.target {
            Target::Request(_) => None,
            Target::Response(res) => Some(res),
        }
    }

    /// Returns the request method.
    pub fn method(&self) -> &'a Method {
        self.request().method()
    }

    /// Returns the absolute request URL.
    pub fn url(&self) -> String {
        self.request().url()
    }

    /// Returns the URL scheme.
    pub fn scheme(&self) -> &'a str {
        self.request().scheme()
    }

    /// Returns the target host.
    pub fn host(&self) -> Option<&'a str> {
        self.request().host()
    }

    /// Returns the target port.
    pub fn port(&self) -> Option<u16> {
        self.request().port()
    }

    /// Returns the URL path without the query.
    pub fn path(&self) -> &'a str {
        self.request().path()
    }

    /// Returns the raw query string.
    pub fn query(&self) -> Option<&'a str> {
        self.request().query()
    }

    /// Returns a decoded query parameter.
    pub fn query_param(&self, name: &str) -> Option<String> {
        self.request().query_param(name)
    }

    /// Returns a decoded form body parameter of the request.
    pub fn form_param(&self, name: &str) -> Option<String> {
        self.request().form_param(name)
    }

    /// Returns the message's own headers.
    pub fn headers(&self) -> &'a Headers {
        match self.target {
            Target::Request(req) => req.headers(),
            Target::Response(res) => res.headers(),
        }
    }

    /// Returns a cookie: sent with a request, or set by a response.
    pub fn cookie(&self, name: &str) -> Option<String> {
        match self.target {
            Target::Request(req) => req.cookie(name),
            Target::Response(res) => res.cookie(name),
        }
    }

    /// Returns the status code of a response.
    pub fn status(&self) -> Option<StatusCode> {
        self.response().map(Response::status)
    }

    /// Returns the reason phrase of a response.
    pub fn reason(&self) -> Option<&'a str> {
        self.response().map(Response::reason)
    }

    /// Returns the message's raw body.
    pub fn body(&self) -> &'a Bytes {
        match self.target {
            Target::Request(req) => req.body(),
            Target::Response(res) => res.body(),
        }
    }

    /// Returns the body decoded as UTF-8, decoding on first use.
    pub fn text(&self) -> &str {
        self.text
            .get_or_init(|| String::from_utf8_lossy(self.body()).into_owned())
    }

    /// Returns the body parsed as JSON, or `None` if it is not JSON.
    pub fn json(&self) -> Option<&serde_json::Value> {
        self.json
            .get_or_init(|| serde_json::from_slice(self.body()).ok())
            .as_ref()
    }

    /// Asks the scope oracle about the request URL.
    pub fn in_scope(&self) -> bool {
        self.scope.is_in_scope(&self.url())
    }

    /// Returns the tool the message came from.
    pub fn tool_source(&self) -> &'a ToolSource {
        match self.target {
            Target::Request(req) => req.tool_source(),
            Target::Response(res) => res.tool_source(),
        }
    }

    /// Returns true if the message carries the attachment.
    pub fn has_attachment(&self, key: &str) -> bool {
        match self.target {
            Target::Request(req) => req.has_attachment(key),
            Target::Response(res) => res.has_attachment(key),
        }
    }
}
