#[derive(Debug, thiserror::Error)]
pub enum ServerError {
    #[error("{0}")]
    Serve(#[from] comment_api_server::ServeError),

    #[error("server task: {0}")]
    Task(#[source] tokio::task::JoinError),

    #[error("signal: {0}")]
    Signal(#[from] std::io::Error),
}
