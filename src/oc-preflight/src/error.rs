pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("{preflight} rejected the change: {message}")]
    Rejected { preflight: &'static str, message: String },

    #[error("{preflight} could not run: {source}")]
    Kube {
        preflight: &'static str,
        #[source]
        source: kube::Error,
    },
}

impl Error {
    pub fn name(&self) -> &'static str {
        match self {
            Error::Rejected { preflight, .. } => preflight,
            Error::Kube { preflight, .. } => preflight,
        }
    }
}

impl From<Error> for oc_types::ReconcileError {
    fn from(e: Error) -> Self {
        let name = e.name();
        let terminal = matches!(&e, Error::Rejected { .. });
        let message = e.to_string();
        if terminal {
            oc_types::ReconcileError::terminal(name, message)
        } else {
            oc_types::ReconcileError::transient(name, message)
        }
    }
}
