use mapnotes_api::Error as ApiError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),

    #[error(transparent)]
    Api(#[from] ApiError),
}

impl Error {
    pub fn permission_denied() -> Error {
        Error::Api(ApiError::PermissionDenied)
    }
}

impl axum::response::IntoResponse for Error {
    fn into_response(self) -> axum::response::Response {
        match self {
            Error::Anyhow(err) => {
                tracing::error!(?err, "internal server error");
                (
                    axum::http::StatusCode::INTERNAL_SERVER_ERROR,
                    String::from("Internal server error, see logs for details"),
                )
                    .into_response()
            }
            Error::Api(err) => {
                tracing::info!("returning error to client: {err}");
                (err.status_code(), err.to_string()).into_response()
            }
        }
    }
}
