//! HTTP front of the comment store: `GET|POST /api/comments`.

mod error;
mod http;

use std::path::Path;
use std::sync::Arc;

use axum::Router;
use axum::routing::get;
use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tower_http::services::ServeDir;
use tower_http::trace::TraceLayer;

use comment_store::CommentStore;

pub use error::{ApiError, ServeError};

#[derive(Clone)]
struct AppState {
    store: Arc<CommentStore>,
}

/// Build the application router.
///
/// With `public_dir` set, every path other than the comments endpoint is
/// served from that directory; otherwise such paths answer 404.
pub fn router(store: Arc<CommentStore>, public_dir: Option<&Path>) -> Router {
    let state = AppState { store };

    let app = Router::new()
        .route(
            "/api/comments",
            get(http::handle_list)
                .post(http::handle_append)
                .fallback(http::handle_unsupported),
        )
        .with_state(state);

    let app = match public_dir {
        Some(dir) => app.fallback_service(ServeDir::new(dir)),
        None => app,
    };

    app.layer(TraceLayer::new_for_http())
}

/// Bind the listening socket.
pub async fn bind(addr: &str) -> Result<TcpListener, ServeError> {
    TcpListener::bind(addr)
        .await
        .map_err(|source| ServeError::Bind {
            addr: addr.to_string(),
            source,
        })
}

/// Serve `app` on `listener` until `shutdown` is cancelled.
///
/// In-flight requests are allowed to finish after cancellation.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: CancellationToken,
) -> Result<(), ServeError> {
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown.cancelled_owned())
        .await
        .map_err(ServeError::Serve)
}
