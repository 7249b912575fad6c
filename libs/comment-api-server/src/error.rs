use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};

use comment_store::StoreError;

/// Request-level failure, rendered as a plain-text response.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error(transparent)]
    Store(#[from] StoreError),

    #[error("Unsupported method: {0}")]
    UnsupportedMethod(Method),
}

impl ApiError {
    pub fn status(&self) -> StatusCode {
        match self {
            ApiError::Store(_) => StatusCode::INTERNAL_SERVER_ERROR,
            ApiError::UnsupportedMethod(_) => StatusCode::METHOD_NOT_ALLOWED,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status();
        let message = self.to_string();
        match &self {
            ApiError::Store(_) => tracing::error!(error = %message, "comment store failure"),
            ApiError::UnsupportedMethod(method) => tracing::warn!(%method, "unsupported method"),
        }
        (status, message).into_response()
    }
}

/// Startup/serve failure of the HTTP listener.
#[derive(Debug, thiserror::Error)]
pub enum ServeError {
    #[error("bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: std::io::Error,
    },

    #[error("axum serve: {0}")]
    Serve(#[source] std::io::Error),
}
