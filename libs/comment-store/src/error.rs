use std::path::PathBuf;

/// Failure of a single store operation. Every variant leaves the data file
/// as it was before the operation started.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("Unable to create path for the data file ({}): {source}", path.display())]
    CreateDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to stat the data file ({}): {source}", path.display())]
    Stat {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to read the data file ({}): {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to write comments to data file ({}): {source}", path.display())]
    Write {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Unable to decode comments from data file ({}): {source}", path.display())]
    Decode {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unable to encode comments to json: {0}")]
    Encode(#[source] serde_json::Error),
}
