use std::borrow::Cow;

/// A specialized [`TrackingError`] enum of this crate.
///
/// Only `Authentication` and connect-time `Authorization` are fatal to a
/// connection; every in-session failure is answered with an `error` reply
/// while the connection stays open.
#[derive(Debug, thiserror::Error)]
pub enum TrackingError {
    /// Unresolvable, expired, or missing credential.
    #[error("Authentication failed{}: {message}", format_context(.context))]
    Authentication { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The identity lacks rights to the requested parcel.
    #[error("Authorization failed{}: {message}", format_context(.context))]
    Authorization { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Malformed payload or missing required fields.
    #[error("Protocol error{}: {message}", format_context(.context))]
    Protocol { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// A storage write failed; logged and swallowed, never surfaced to the peer.
    #[error("Persistence error{}: {message}", format_context(.context))]
    Persistence { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Configuration errors raised at slice initialization.
    #[error("Tracking config error{}: {message}", format_context(.context))]
    Config { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Internal fallback for unexpected issues or logic errors.
    #[error("Internal tracking error{}: {message}", format_context(.context))]
    Internal { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

impl TrackingError {
    /// The peer-facing description carried in `error` replies.
    ///
    /// Replies deliberately omit the taxonomy prefix; the frontend matches
    /// on these strings verbatim.
    #[must_use]
    pub fn peer_message(&self) -> Cow<'static, str> {
        match self {
            Self::Authentication { message, .. }
            | Self::Authorization { message, .. }
            | Self::Protocol { message, .. }
            | Self::Persistence { message, .. }
            | Self::Config { message, .. }
            | Self::Internal { message, .. } => message.clone(),
        }
    }
}

impl From<courier_database::DatabaseError> for TrackingError {
    #[inline]
    fn from(source: courier_database::DatabaseError) -> Self {
        Self::Internal { message: source.to_string().into(), context: None }
    }
}

impl From<courier_sessions::SessionError> for TrackingError {
    #[inline]
    fn from(source: courier_sessions::SessionError) -> Self {
        Self::Internal { message: source.to_string().into(), context: None }
    }
}

/// Attaches call-site context to a [`TrackingError`] result.
pub trait TrackingErrorExt<T> {
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, TrackingError>;
}

impl<T> TrackingErrorExt<T> for Result<T, TrackingError> {
    #[inline]
    fn context(self, context: impl Into<Cow<'static, str>>) -> Self {
        self.map_err(|mut e| {
            match &mut e {
                TrackingError::Authentication { context: c, .. }
                | TrackingError::Authorization { context: c, .. }
                | TrackingError::Protocol { context: c, .. }
                | TrackingError::Persistence { context: c, .. }
                | TrackingError::Config { context: c, .. }
                | TrackingError::Internal { context: c, .. } => *c = Some(context.into()),
            }
            e
        })
    }
}

fn format_context(context: &Option<Cow<'static, str>>) -> Cow<'static, str> {
    context.as_ref().map_or(Cow::Borrowed(""), |c| Cow::Owned(format!(" ({c})")))
}
