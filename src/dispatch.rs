use std::fmt;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, PoisonError, RwLock};

use crate::action::ControlAction;
use crate::addon::{Addon, AddonSpec, Callback};
use crate::config::{AddonOverride, DispatchOptions, EngineConfig};
use crate::context::EventCtx;
use crate::error::{CallbackError, CallbackFailure};
use crate::facts::TrafficFacts;
use crate::filter::Filter;
use crate::http::{EventKind, Request, Response, ToolSource};
use crate::registry::Registry;
use crate::services::{Annotator, CipherFactory, NoScope, ScopeOracle};

/// Runs traffic events through the loaded addons.
///
/// Each dispatch takes one snapshot of the current [`Registry`] and walks it in
/// order. An addon sees the message as left by the addons before it. The first
/// `Drop` or `Intercept` ends the walk.
///
/// Failures never stop a dispatch. A filter that cannot be evaluated counts as
/// not matching. A callback that returns an error or panics is logged and
/// skipped, and the message continues as it was before that addon.
///
/// The dispatcher is `Send + Sync`; events from many connections may be
/// dispatched concurrently. [`reload`](Dispatcher::reload) swaps the whole
/// registry at once, so an in-flight dispatch finishes on the registry it
/// started with.
///
/// # Examples
///
/// ```
/// use addon_core::{AddonSpec, ControlAction, Dispatcher, Registry};
/// use addon_core::http::Request;
/// use http::Method;
///
/// let registry = Registry::load(vec![
///     AddonSpec::named("drop-logout")
///         .request_filter(r#"(path-contains "/logout")"#)
///         .on_request(|_, _| Ok(ControlAction::Drop)),
///     AddonSpec::named("tag")
///         .on_request(|req, _| Ok(req.with_header("X-Tagged", "1").into())),
/// ]);
/// let dispatcher = Dispatcher::new(registry);
///
/// let logout = Request::from_url(Method::GET, "https://example.com/logout").unwrap();
/// assert_eq!(dispatcher.dispatch_request(logout), ControlAction::Drop);
///
/// let home = Request::from_url(Method::GET, "https://example.com/").unwrap();
/// let out = dispatcher.dispatch_request(home).into_message().unwrap();
/// assert_eq!(out.header("X-Tagged"), Some("1"));
/// ```
pub struct Dispatcher {
    registry: RwLock<Arc<Registry>>,
    options: RwLock<DispatchOptions>,
    scope: Arc<dyn ScopeOracle>,
    annotator: Option<Arc<dyn Annotator>>,
    crypto: Option<Arc<dyn CipherFactory>>,
}

impl Dispatcher {
    /// Creates a dispatcher over `registry` with default options and an empty scope.
    pub fn new(registry: impl Into<Arc<Registry>>) -> Self {
        Self {
            registry: RwLock::new(registry.into()),
            options: RwLock::new(DispatchOptions::default()),
            scope: Arc::new(NoScope),
            annotator: None,
            crypto: None,
        }
    }

    /// Loads `specs` under `config` and creates a dispatcher for them.
    pub fn from_config(
        specs: impl IntoIterator<Item = AddonSpec>,
        config: &EngineConfig,
    ) -> Self {
        Self::new(Registry::load_with(specs, &config.addons)).with_options(config.options)
    }

    /// Sets the scope oracle used by `in-scope` and the in-scope-only option.
    pub fn with_scope(mut self, scope: impl ScopeOracle + 'static) -> Self {
        self.scope = Arc::new(scope);
        self
    }

    /// Sets the UI annotation service offered to addons.
    pub fn with_annotator(mut self, annotator: impl Annotator + 'static) -> Self {
        self.annotator = Some(Arc::new(annotator));
        self
    }

    /// Sets the crypto service offered to addons.
    pub fn with_crypto(mut self, crypto: impl CipherFactory + 'static) -> Self {
        self.crypto = Some(Arc::new(crypto));
        self
    }

    /// Sets the dispatch options.
    pub fn with_options(self, options: DispatchOptions) -> Self {
        self.set_options(options);
        self
    }

    /// Returns the current dispatch options.
    pub fn options(&self) -> DispatchOptions {
        *self.options.read().unwrap_or_else(PoisonError::into_inner)
    }

    /// Changes the dispatch options for subsequent events.
    pub fn set_options(&self, options: DispatchOptions) {
        *self.options.write().unwrap_or_else(PoisonError::into_inner) = options;
        tracing::info!(
            active = options.active,
            in_scope_only = options.in_scope_only,
            proxy_only = options.proxy_only,
            "dispatch options updated"
        );
    }

    /// Returns a snapshot of the current registry.
    pub fn registry(&self) -> Arc<Registry> {
        Arc::clone(&self.registry.read().unwrap_or_else(PoisonError::into_inner))
    }

    /// Installs a new registry and returns the previous one.
    ///
    /// The previous registry's cleanup callbacks run when the returned handle
    /// and every in-flight dispatch using it have been dropped.
    pub fn replace(&self, registry: impl Into<Arc<Registry>>) -> Arc<Registry> {
        let registry = registry.into();
        let generation = registry.generation();
        let old = {
            let mut slot = self.registry.write().unwrap_or_else(PoisonError::into_inner);
            std::mem::replace(&mut *slot, registry)
        };
        tracing::info!(
            from = old.generation(),
            to = generation,
            "registry replaced"
        );
        old
    }

    /// Loads `specs` and swaps them in, returning the new registry.
    pub fn reload(&self, specs: impl IntoIterator<Item = AddonSpec>) -> Arc<Registry> {
        self.reload_with(specs, &[])
    }

    /// Like [`reload`](Dispatcher::reload), applying configuration overrides.
    pub fn reload_with(
        &self,
        specs: impl IntoIterator<Item = AddonSpec>,
        overrides: &[AddonOverride],
    ) -> Arc<Registry> {
        let registry = Arc::new(Registry::load_with(specs, overrides));
        // Dropped outside the lock so cleanup callbacks never run while it is held.
        let old = self.replace(Arc::clone(&registry));
        drop(old);
        registry
    }

    /// Runs a request through the addons.
    pub fn dispatch_request(&self, request: Request) -> ControlAction<Request> {
        self.dispatch(request)
    }

    /// Runs a response through the addons.
    pub fn dispatch_response(&self, response: Response) -> ControlAction<Response> {
        self.dispatch(response)
    }

    fn should_handle<T: Message>(&self, message: &T) -> bool {
        let options = self.options();
        if !options.active {
            return false;
        }
        if options.proxy_only && !message.tool_source().is_proxy() {
            return false;
        }
        if options.in_scope_only && !self.scope.is_in_scope(&message.url()) {
            return false;
        }
        true
    }

    fn dispatch<T: Message>(&self, initial: T) -> ControlAction<T> {
        let kind = T::KIND;
        if !self.should_handle(&initial) {
            tracing::trace!(
                event = %kind,
                message_id = initial.message_id(),
                "event bypassed by dispatch options"
            );
            return ControlAction::Continue(initial);
        }

        let registry = self.registry();
        let span = tracing::debug_span!(
            "dispatch",
            event = %kind,
            message_id = initial.message_id(),
            generation = registry.generation()
        );
        let _enter = span.enter();

        let mut current = initial;
        for addon in registry.iter() {
            let Some(callback) = T::callback(addon) else {
                continue;
            };

            let matched = {
                let facts = current.facts(self.scope.as_ref());
                T::filter(addon).matches(&facts)
            };
            match matched {
                Ok(true) => {}
                Ok(false) => {
                    tracing::trace!(addon = %addon.id(), "filter did not match");
                    continue;
                }
                Err(e) => {
                    tracing::warn!(addon = %addon.id(), error = %e, "filter failed, treated as no match");
                    continue;
                }
            }

            let message_id = current.message_id();
            let ctx = EventCtx::new(
                addon.id(),
                kind,
                message_id,
                self.scope.as_ref(),
                self.annotator.as_deref(),
                self.crypto.as_deref(),
            );

            let failure = match panic::catch_unwind(AssertUnwindSafe(|| callback(&current, &ctx))) {
                Ok(Ok(ControlAction::Continue(next))) => {
                    current = next;
                    continue;
                }
                Ok(Ok(ControlAction::Drop)) => {
                    tracing::debug!(addon = %addon.id(), "dropped");
                    return ControlAction::Drop;
                }
                Ok(Ok(ControlAction::Intercept(held))) => {
                    tracing::debug!(addon = %addon.id(), "intercepted");
                    return ControlAction::Intercept(held);
                }
                Ok(Err(e)) => CallbackFailure::Returned(e),
                Err(payload) => CallbackFailure::from_panic(payload),
            };

            let err = CallbackError::new(addon.id().clone(), kind, message_id, failure);
            tracing::error!(
                addon = %err.addon(),
                event = %err.kind(),
                message_id = err.message_id(),
                error = %err.failure(),
                "addon callback failed, continuing with the previous message"
            );
        }

        ControlAction::Continue(current)
    }
}

impl Default for Dispatcher {
    fn default() -> Self {
        Self::new(Registry::empty())
    }
}

impl fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Dispatcher")
            .field("registry", &self.registry())
            .field("options", &self.options())
            .field("annotator", &self.annotator.is_some())
            .field("crypto", &self.crypto.is_some())
            .finish()
    }
}

/// The two kinds of message a dispatch can carry.
trait Message: Sized {
    const KIND: EventKind;

    fn message_id(&self) -> u64;
    fn tool_source(&self) -> &ToolSource;
    fn url(&self) -> String;
    fn facts<'a>(&'a self, scope: &'a dyn ScopeOracle) -> TrafficFacts<'a>;
    fn filter(addon: &Addon) -> &Filter;
    fn callback(addon: &Addon) -> Option<&Callback<Self>>;
}

impl Message for Request {
    const KIND: EventKind = EventKind::Request;

    fn message_id(&self) -> u64 {
        Request::message_id(self)
    }

    fn tool_source(&self) -> &ToolSource {
        Request::tool_source(self)
    }

    fn url(&self) -> String {
        Request::url(self)
    }

    fn facts<'a>(&'a self, scope: &'a dyn ScopeOracle) -> TrafficFacts<'a> {
        TrafficFacts::of_request(self, scope)
    }

    fn filter(addon: &Addon) -> &Filter {
        addon.request_filter()
    }

    fn callback(addon: &Addon) -> Option<&Callback<Self>> {
        addon.on_request()
    }
}

impl Message for Response {
    const KIND: EventKind = EventKind::Response;

    fn message_id(&self) -> u64 {
        Response::message_id(self)
    }

    fn tool_source(&self) -> &ToolSource {
        Response::tool_source(self)
    }

    fn url(&self) -> String {
        self.initiating_request().url()
    }

    fn facts<'a>(&'a self, scope: &'a dyn ScopeOracle) -> TrafficFacts<'a> {
        TrafficFacts::of_response(self, scope)
    }

    fn filter(addon: &Addon) -> &Filter {
        addon.response_filter()
    }

    fn callback(addon: &Addon) -> Option<&Callback<Self>> {
        addon.on_response()
    }
}
