use crate::error::BoxError;
use crate::http::{Request, Response};

/// What a callback wants done with the message it was handed.
///
/// `Drop` and `Intercept` end the dispatch: no later addon sees the message.
/// A bare [`Request`] or [`Response`] converts into `Continue`.
///
/// # Examples
///
/// ```
/// use addon_core::ControlAction;
/// use addon_core::http::Request;
/// use http::Method;
///
/// let req = Request::from_url(Method::GET, "https://example.com/").unwrap();
/// let action: ControlAction<Request> = req.clone().into();
///
/// assert!(action.is_continue());
/// assert_eq!(action.message(), Some(&req));
/// assert!(ControlAction::<Request>::Drop.is_terminal());
/// ```
#[derive(Debug, Clone, PartialEq)]
pub enum ControlAction<T> {
    /// Pass the (possibly updated) message to the next addon
    Continue(T),
    /// Discard the message
    Drop,
    /// Hold the message, frozen as given, for the proxy's intercept queue
    Intercept(T),
}

impl<T> ControlAction<T> {
    /// Returns true for `Continue`.
    pub fn is_continue(&self) -> bool {
        matches!(self, ControlAction::Continue(_))
    }

    /// Returns true for `Drop` and `Intercept`.
    pub fn is_terminal(&self) -> bool {
        !self.is_continue()
    }

    /// Returns true for `Drop`.
    pub fn is_drop(&self) -> bool {
        matches!(self, ControlAction::Drop)
    }

    /// Returns true for `Intercept`.
    pub fn is_intercept(&self) -> bool {
        matches!(self, ControlAction::Intercept(_))
    }

    /// Returns the carried message, if any.
    pub fn message(&self) -> Option<&T> {
        match self {
            ControlAction::Continue(m) | ControlAction::Intercept(m) => Some(m),
            ControlAction::Drop => None,
        }
    }

    /// Consumes the action, returning the carried message, if any.
    pub fn into_message(self) -> Option<T> {
        match self {
            ControlAction::Continue(m) | ControlAction::Intercept(m) => Some(m),
            ControlAction::Drop => None,
        }
    }
}

impl From<Request> for ControlAction<Request> {
    fn from(request: Request) -> Self {
        ControlAction::Continue(request)
    }
}

impl From<Response> for ControlAction<Response> {
    fn from(response: Response) -> Self {
        ControlAction::Continue(response)
    }
}

/// The return type of request and response callbacks.
pub type CallbackResult<T> = Result<ControlAction<T>, BoxError>;
