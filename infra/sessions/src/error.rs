use std::borrow::Cow;

/// Errors that can occur during session registry operations.
#[derive(Debug, thiserror::Error)]
pub enum SessionError {
    /// Capacity must be greater than zero for connection mailboxes.
    #[error("Invalid capacity{}: {message}", format_context(.context))]
    InvalidCapacity { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// The connection id is already registered.
    #[error("Connection already registered{}: {message}", format_context(.context))]
    AlreadyRegistered { message: Cow<'static, str>, context: Option<Cow<'static, str>> },

    /// Group operations require a registered connection.
    #[error("Unknown connection{}: {message}", format_context(.context))]
    UnknownConnection { message: Cow<'static, str>, context: Option<Cow<'static, str>> },
}

/// Attaches call-site context to a [`SessionError`] result.
pub trait SessionErrorExt<T> {
    fn context(self, context: impl Into<Cow<'static, str>>) -> Result<T, SessionError>;
}

impl<T> SessionErrorExt<T> for Result<T, SessionError> {
    #[inline]
    fn context(self, context: impl Into<Cow<'static, str>>) -> Self {
        self.map_err(|mut e| {
            match &mut e {
                SessionError::InvalidCapacity { context: c, .. }
                | SessionError::AlreadyRegistered { context: c, .. }
                | SessionError::UnknownConnection { context: c, .. } => *c = Some(context.into()),
            }
            e
        })
    }
}

fn format_context(context: &Option<Cow<'static, str>>) -> Cow<'static, str> {
    context.as_ref().map_or(Cow::Borrowed(""), |c| Cow::Owned(format!(" ({c})")))
}
