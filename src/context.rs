use crate::addon::AddonId;
use crate::error::BoxError;
use crate::http::EventKind;
use crate::logging::AddonLog;
use crate::services::{Annotator, Cipher, CipherFactory, Highlight, ScopeOracle};

/// Per-invocation context handed to every request and response callback.
///
/// `EventCtx` identifies the addon and message being handled and carries the
/// host services the dispatcher was configured with. There is no global
/// state; everything an addon may touch arrives through this value.
///
/// # Construction
///
/// `EventCtx` cannot be constructed by user code. The dispatcher builds one
/// for each callback it invokes.
///
/// # Examples
///
/// ```
/// use addon_core::{AddonSpec, ControlAction, Highlight};
/// use addon_core::http::Request;
///
/// let spec = AddonSpec::named("tag-admin")
///     .request_filter(r#"(path-contains "/admin")"#)
///     .on_request(|req: &Request, ctx| {
///         ctx.highlight(Highlight::Red);
///         ctx.log().info(format_args!("admin request {}", ctx.message_id()));
///         Ok(ControlAction::Continue(req.clone()))
///     });
/// ```
pub struct EventCtx<'a> {
    addon: &'a AddonId,
    kind: EventKind,
    message_id: u64,
    scope: &'a dyn ScopeOracle,
    annotator: Option<&'a dyn Annotator>,
    crypto: Option<&'a dyn CipherFactory>,
}

impl<'a> EventCtx<'a> {
    /// This is `pub(crate)`: only the dispatcher creates contexts.
    pub(crate) fn new(
        addon: &'a AddonId,
        kind: EventKind,
        message_id: u64,
        scope: &'a dyn ScopeOracle,
        annotator: Option<&'a dyn Annotator>,
        crypto: Option<&'a dyn CipherFactory>,
    ) -> Self {
        Self {
            addon,
            kind,
            message_id,
            scope,
            annotator,
            crypto,
        }
    }

    /// Returns the id of the addon being invoked.
    pub fn addon(&self) -> &AddonId {
        self.addon
    }

    /// Returns whether a request or a response is being handled.
    pub fn kind(&self) -> EventKind {
        self.kind
    }

    /// Returns the proxy-assigned message id.
    pub fn message_id(&self) -> u64 {
        self.message_id
    }

    /// Returns a logger stamped with this addon and message.
    pub fn log(&self) -> AddonLog<'_> {
        AddonLog::new(self.addon, self.message_id)
    }

    /// Asks the host whether `url` is in scope.
    pub fn is_in_scope(&self, url: &str) -> bool {
        self.scope.is_in_scope(url)
    }

    /// Returns the annotation service, if the host provided one.
    pub fn annotator(&self) -> Option<&'a dyn Annotator> {
        self.annotator
    }

    /// Highlights the current message. Returns false if no annotator is configured.
    pub fn highlight(&self, highlight: Highlight) -> bool {
        match self.annotator {
            Some(annotator) => {
                annotator.set_highlight(self.message_id, highlight);
                true
            }
            None => false,
        }
    }

    /// Replaces the notes on the current message. Returns false if no annotator is configured.
    pub fn notes(&self, notes: &str) -> bool {
        match self.annotator {
            Some(annotator) => {
                annotator.set_notes(self.message_id, notes);
                true
            }
            None => false,
        }
    }

    /// Creates a cipher through the host's crypto service.
    ///
    /// # Errors
    ///
    /// Fails if no crypto service is configured or the service rejects `spec`.
    pub fn new_cipher(&self, spec: &str) -> Result<Box<dyn Cipher>, BoxError> {
        match self.crypto {
            Some(factory) => factory.new_cipher(spec),
            None => Err(format!("no crypto service available for `{}`", spec).into()),
        }
    }
}

impl std::fmt::Debug for EventCtx<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventCtx")
            .field("addon", &self.addon)
            .field("kind", &self.kind)
            .field("message_id", &self.message_id)
            .field("annotator", &self.annotator.is_some())
            .field("crypto", &self.crypto.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::services::NoScope;
    use std::sync::Mutex;

    #[derive(Default)]
    struct Recorder {
        calls: Mutex<Vec<String>>,
    }

    impl Annotator for Recorder {
        fn set_highlight(&self, message_id: u64, highlight: Highlight) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{} {}", message_id, highlight));
        }

        fn set_notes(&self, message_id: u64, notes: &str) {
            self.calls
                .lock()
                .unwrap()
                .push(format!("{} {}", message_id, notes));
        }
    }

    #[test]
    fn annotations_target_current_message() {
        let id = AddonId::Index(0);
        let recorder = Recorder::default();
        let ctx = EventCtx::new(&id, EventKind::Request, 77, &NoScope, Some(&recorder), None);

        assert!(ctx.highlight(Highlight::Green));
        assert!(ctx.notes("checked"));
        assert_eq!(
            *recorder.calls.lock().unwrap(),
            vec!["77 green".to_string(), "77 checked".to_string()]
        );
    }

    #[test]
    fn missing_services_degrade() {
        let id = AddonId::Index(1);
        let ctx = EventCtx::new(&id, EventKind::Response, 3, &NoScope, None, None);

        assert!(!ctx.highlight(Highlight::Red));
        assert!(!ctx.notes("x"));
        assert!(ctx.new_cipher("AES/GCM/NoPadding").is_err());
        assert!(!ctx.is_in_scope("https://example.com/"));
        assert_eq!(ctx.log().message_id(), 3);
        assert_eq!(ctx.kind(), EventKind::Response);
    }
}
