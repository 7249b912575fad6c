mod config;
mod error;

use std::sync::Arc;

use clap::Parser;
use tokio::task::JoinError;
use tokio_util::sync::CancellationToken;

use comment_api_server::ServeError;
use comment_store::CommentStore;
use config::Cli;
use error::ServerError;

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info".into()),
        )
        .init();

    let cli = Cli::parse();
    if let Err(e) = run(cli).await {
        tracing::error!(error = %e, "comment-server failed");
        eprintln!("Error: {e}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), ServerError> {
    let store = Arc::new(CommentStore::new(&cli.data_file));
    let app = comment_api_server::router(store, cli.public_dir.as_deref());

    let addr = cli.addr();
    let listener = comment_api_server::bind(&addr).await?;
    tracing::info!(
        url = %format!("http://{addr}"),
        data_file = %cli.data_file.display(),
        public_dir = ?cli.public_dir,
        "server started"
    );

    let token = CancellationToken::new();
    let mut server = tokio::spawn(comment_api_server::serve(listener, app, token.clone()));

    tokio::select! {
        joined = &mut server => {
            // Server stopped on its own, without a shutdown request.
            return server_outcome(joined);
        }
        signal = shutdown_signal() => signal?,
    }

    tracing::info!("shutting down...");
    token.cancel();

    server_outcome(server.await)?;

    tracing::info!("shutdown complete");
    Ok(())
}

/// Result of the joined server task; a panicked or cancelled task is an error.
fn server_outcome(joined: Result<Result<(), ServeError>, JoinError>) -> Result<(), ServerError> {
    match joined {
        Ok(result) => result.map_err(ServerError::from),
        Err(e) => {
            tracing::error!(error = %e, "server task aborted");
            Err(ServerError::Task(e))
        }
    }
}

/// Resolve on Ctrl+C, or SIGTERM on unix.
async fn shutdown_signal() -> Result<(), std::io::Error> {
    #[cfg(unix)]
    {
        let mut sigterm =
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
        tokio::select! {
            res = tokio::signal::ctrl_c() => res,
            _ = sigterm.recv() => Ok(()),
        }
    }
    #[cfg(not(unix))]
    {
        tokio::signal::ctrl_c().await
    }
}
