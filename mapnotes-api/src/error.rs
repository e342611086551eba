use crate::ValidationError;

/// Client-facing failures. Every variant renders to the exact string a
/// connected client receives on its event channel; none of them is fatal to
/// the connection.
#[derive(Clone, Debug, Eq, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("{0}")]
    Validation(#[from] ValidationError),

    #[error("Comment Session not found.")]
    SessionNotFound,

    #[error("Comment Session has expired.")]
    SessionExpired,

    #[error("Comment Session hasn't started")]
    SessionNotStarted,

    #[error("Comment session id must be a number.")]
    SessionIdNotNumeric,

    #[error("Invalid comment session id.")]
    UnknownSessionId,

    #[error("Permission denied.")]
    PermissionDenied,

    /// Store failure. The cause is logged server-side; clients only ever see
    /// this generic message.
    #[error("Something went wrong, please try again.")]
    Storage,
}

impl Error {
    pub fn status_code(&self) -> http::StatusCode {
        use http::StatusCode;
        match self {
            Error::Validation(_) => StatusCode::BAD_REQUEST,
            Error::SessionNotFound => StatusCode::NOT_FOUND,
            Error::SessionExpired => StatusCode::FORBIDDEN,
            Error::SessionNotStarted => StatusCode::FORBIDDEN,
            Error::SessionIdNotNumeric => StatusCode::BAD_REQUEST,
            Error::UnknownSessionId => StatusCode::NOT_FOUND,
            Error::PermissionDenied => StatusCode::FORBIDDEN,
            Error::Storage => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}
