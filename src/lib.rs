//! Addon engine for intercepting HTTP proxies.
//!
//! Addons pair small boolean filters with callbacks that inspect, rewrite,
//! drop or intercept traffic. This crate provides:
//! - **Filters**: an S-expression language evaluated against a read-only view of a message
//! - **Registry**: an ordered, immutable set of loaded addons
//! - **Dispatcher**: runs each request or response through the matching addons in order
//!
//! # Core Types
//!
//! - [`AddonSpec`]: Builder declaring an addon's filters and callbacks
//! - [`Registry`]: Compiled addons in declaration order
//! - [`Dispatcher`]: Thread-safe entry point for traffic events
//! - [`ControlAction`]: What a callback wants done with a message
//! - [`EventCtx`]: Per-invocation context with logging and host services
//! - [`filter::Filter`]: A compiled filter expression
//!
//! Messages ([`http::Request`], [`http::Response`]) are immutable values: every
//! mutator returns a new message, so an addon never sees another addon's
//! half-finished change.
//!
//! # Examples
//!
//! ```
//! use addon_core::{AddonSpec, ControlAction, Dispatcher, Registry, ScopePrefixes};
//! use addon_core::http::Request;
//! use http::Method;
//!
//! let registry = Registry::load(vec![
//!     AddonSpec::named("mark-api")
//!         .request_filter(r#"(and (in-scope) (path-contains "api"))"#)
//!         .on_request(|req, ctx| {
//!             ctx.log().debug(format_args!("api call to {}", req.path()));
//!             Ok(req.with_header("X-Api", "1").into())
//!         }),
//!     AddonSpec::named("hold-deletes")
//!         .request_filter(r#"(method-eq "DELETE")"#)
//!         .on_request(|req, _| Ok(ControlAction::Intercept(req.clone()))),
//! ]);
//!
//! let dispatcher = Dispatcher::new(registry)
//!     .with_scope(ScopePrefixes::new(["https://shop.example.com/"]));
//!
//! let req = Request::from_url(Method::DELETE, "https://shop.example.com/api/cart/1").unwrap();
//! match dispatcher.dispatch_request(req) {
//!     ControlAction::Intercept(held) => assert_eq!(held.header("X-Api"), Some("1")),
//!     other => panic!("expected intercept, got {:?}", other),
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![deny(clippy::print_stdout, clippy::print_stderr)]

mod action;
mod addon;
mod config;
mod context;
mod dispatch;
mod error;
mod facts;
pub mod filter;
pub mod http;
mod logging;
mod registry;
mod services;

pub use action::{CallbackResult, ControlAction};
pub use addon::{Addon, AddonId, AddonSpec, Callback, LifecycleCallback};
pub use config::{AddonOverride, DispatchOptions, EngineConfig};
pub use context::EventCtx;
pub use dispatch::Dispatcher;
pub use error::{
    BoxError, CallbackError, CallbackFailure, Error, EvalError, FilterSlot, LoadError, SyntaxError,
};
pub use facts::TrafficFacts;
pub use logging::AddonLog;
pub use registry::Registry;
pub use services::{
    Annotator, Cipher, CipherFactory, Highlight, NoScope, ScopeOracle, ScopePrefixes,
};
