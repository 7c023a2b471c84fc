pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("malformed FBC blob at {path}: {source}")]
    MalformedBlob {
        path: std::path::PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("catalog {0:?} not found")]
    NotFound(String),
}
