use std::fmt;

use crate::action::CallbackResult;
use crate::context::EventCtx;
use crate::error::BoxError;
use crate::filter::Filter;
use crate::http::{Request, Response};

/// A request or response callback.
pub type Callback<T> = Box<dyn Fn(&T, &EventCtx<'_>) -> CallbackResult<T> + Send + Sync>;

/// An `on_init` or `on_cleanup` callback.
pub type LifecycleCallback = Box<dyn Fn() -> Result<(), BoxError> + Send + Sync>;

/// Identifies an addon in logs, errors and configuration.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum AddonId {
    /// A name chosen by the addon author
    Named(String),
    /// The position in the declaration list, for unnamed addons
    Index(usize),
}

impl fmt::Display for AddonId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AddonId::Named(name) => write!(f, "{}", name),
            AddonId::Index(i) => write!(f, "addon#{}", i),
        }
    }
}

/// The declaration of an addon, before it is loaded into a registry.
///
/// Filters are kept as text here and compiled by
/// [`Registry::load`](crate::Registry::load). An unset filter matches everything.
///
/// # Examples
///
/// ```
/// use addon_core::{AddonSpec, ControlAction};
///
/// let drop_logout = AddonSpec::named("drop-logout")
///     .request_filter(r#"(path-contains "/logout")"#)
///     .on_request(|_, _| Ok(ControlAction::Drop));
///
/// let rewrite_host = AddonSpec::named("rewrite-host")
///     .on_request(|req, _| Ok(req.with_header("Host", "staging.example.com").into()));
///
/// assert_eq!(drop_logout.name(), Some("drop-logout"));
/// assert!(rewrite_host.has_request_callback());
/// ```
#[derive(Default)]
pub struct AddonSpec {
    name: Option<String>,
    request_filter: Option<String>,
    response_filter: Option<String>,
    on_request: Option<Callback<Request>>,
    on_response: Option<Callback<Response>>,
    on_init: Option<LifecycleCallback>,
    on_cleanup: Option<LifecycleCallback>,
}

impl AddonSpec {
    /// Starts an unnamed addon; it is identified by its declaration index.
    pub fn new() -> Self {
        Self::default()
    }

    /// Starts a named addon.
    pub fn named(name: impl Into<String>) -> Self {
        Self {
            name: Some(name.into()),
            ..Self::default()
        }
    }

    /// Sets the filter text selecting requests.
    pub fn request_filter(mut self, filter: impl Into<String>) -> Self {
        self.request_filter = Some(filter.into());
        self
    }

    /// Sets the filter text selecting responses.
    pub fn response_filter(mut self, filter: impl Into<String>) -> Self {
        self.response_filter = Some(filter.into());
        self
    }

    /// Sets the request callback.
    pub fn on_request<F>(mut self, f: F) -> Self
    where
        F: Fn(&Request, &EventCtx<'_>) -> CallbackResult<Request> + Send + Sync + 'static,
    {
        self.on_request = Some(Box::new(f));
        self
    }

    /// Sets the response callback.
    pub fn on_response<F>(mut self, f: F) -> Self
    where
        F: Fn(&Response, &EventCtx<'_>) -> CallbackResult<Response> + Send + Sync + 'static,
    {
        self.on_response = Some(Box::new(f));
        self
    }

    /// Sets a callback run once when the addon is loaded.
    pub fn on_init<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.on_init = Some(Box::new(f));
        self
    }

    /// Sets a callback run once when the addon is unloaded.
    pub fn on_cleanup<F>(mut self, f: F) -> Self
    where
        F: Fn() -> Result<(), BoxError> + Send + Sync + 'static,
    {
        self.on_cleanup = Some(Box::new(f));
        self
    }

    /// Returns the addon's name, if it has one.
    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    /// Returns true if a request callback is set.
    pub fn has_request_callback(&self) -> bool {
        self.on_request.is_some()
    }

    /// Returns true if a response callback is set.
    pub fn has_response_callback(&self) -> bool {
        self.on_response.is_some()
    }

    pub(crate) fn id(&self, index: usize) -> AddonId {
        match &self.name {
            Some(name) => AddonId::Named(name.clone()),
            None => AddonId::Index(index),
        }
    }

    pub(crate) fn filter_texts(&self) -> (Option<&str>, Option<&str>) {
        (self.request_filter.as_deref(), self.response_filter.as_deref())
    }

    pub(crate) fn set_filters(&mut self, request: Option<String>, response: Option<String>) {
        if request.is_some() {
            self.request_filter = request;
        }
        if response.is_some() {
            self.response_filter = response;
        }
    }

    pub(crate) fn into_addon(
        self,
        id: AddonId,
        order: usize,
        request_filter: Filter,
        response_filter: Filter,
    ) -> Addon {
        Addon {
            id,
            order,
            request_filter,
            response_filter,
            on_request: self.on_request,
            on_response: self.on_response,
            on_init: self.on_init,
            on_cleanup: self.on_cleanup,
        }
    }
}

impl fmt::Debug for AddonSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AddonSpec")
            .field("name", &self.name)
            .field("request_filter", &self.request_filter)
            .field("response_filter", &self.response_filter)
            .field("on_request", &self.on_request.is_some())
            .field("on_response", &self.on_response.is_some())
            .finish()
    }
}

/// A loaded addon: compiled filters plus callbacks.
pub struct Addon {
    id: AddonId,
    order: usize,
    request_filter: Filter,
    response_filter: Filter,
    on_request: Option<Callback<Request>>,
    on_response: Option<Callback<Response>>,
    on_init: Option<LifecycleCallback>,
    on_cleanup: Option<LifecycleCallback>,
}

impl Addon {
    /// Returns the addon's id.
    pub fn id(&self) -> &AddonId {
        &self.id
    }

    /// Returns the addon's position in its declaration list.
    pub fn order(&self) -> usize {
        self.order
    }

    /// Returns the compiled request filter.
    pub fn request_filter(&self) -> &Filter {
        &self.request_filter
    }

    /// Returns the compiled response filter.
    pub fn response_filter(&self) -> &Filter {
        &self.response_filter
    }

    /// Returns true if the addon handles requests.
    pub fn handles_requests(&self) -> bool {
        self.on_request.is_some()
    }

    /// Returns true if the addon handles responses.
    pub fn handles_responses(&self) -> bool {
        self.on_response.is_some()
    }

    pub(crate) fn on_request(&self) -> Option<&Callback<Request>> {
        self.on_request.as_ref()
    }

    pub(crate) fn on_response(&self) -> Option<&Callback<Response>> {
        self.on_response.as_ref()
    }

    pub(crate) fn on_init(&self) -> Option<&LifecycleCallback> {
        self.on_init.as_ref()
    }

    pub(crate) fn on_cleanup(&self) -> Option<&LifecycleCallback> {
        self.on_cleanup.as_ref()
    }
}

impl fmt::Debug for Addon {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Addon")
            .field("id", &self.id)
            .field("order", &self.order)
            .field("request_filter", &self.request_filter.to_string())
            .field("response_filter", &self.response_filter.to_string())
            .field("on_request", &self.on_request.is_some())
            .field("on_response", &self.on_response.is_some())
            .finish()
    }
}
