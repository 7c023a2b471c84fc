pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error, Clone)]
pub enum Error {
    #[error("I/O error: {0}")]
    Io(std::sync::Arc<std::io::Error>),

    #[error("fetching {url}: {status}")]
    BadStatus {
        url: String,
        status: reqwest::StatusCode,
    },

    #[error("fetching {url}: {message}")]
    Transport { url: String, message: String },

    #[error("catalog {0:?} is not yet Serving=True")]
    CatalogNotReady(String),

    #[error("malformed catalog content at {path}: {source}")]
    MalformedBlob {
        path: std::path::PathBuf,
        source: std::sync::Arc<serde_json::Error>,
    },
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Io(std::sync::Arc::new(e))
    }
}
