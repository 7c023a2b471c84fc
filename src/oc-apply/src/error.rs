pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("rendering bundle at {path}: {message}")]
    Render { path: std::path::PathBuf, message: String },

    #[error("applying object {kind}/{name}: {source}")]
    Apply {
        kind: String,
        name: String,
        #[source]
        source: kube::Error,
    },

    #[error("rendered object is missing apiVersion/kind/metadata.name")]
    MalformedObject,

    #[error("revision {0} would violate immutability: {1}")]
    RevisionImmutable(i64, oc_types::revision::RevisionValidationError),

    #[error(transparent)]
    Kube(#[from] kube::Error),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<Error> for oc_types::ReconcileError {
    fn from(e: Error) -> Self {
        match &e {
            Error::Render { .. } | Error::MalformedObject | Error::RevisionImmutable(..) => {
                oc_types::ReconcileError::terminal("InvalidConfiguration", e)
            }
            Error::Apply { .. } | Error::Kube(_) | Error::Io(_) => {
                oc_types::ReconcileError::transient("ApplyFailed", e)
            }
        }
    }
}
