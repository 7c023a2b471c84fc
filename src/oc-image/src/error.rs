use oc_types::{ReconcileError, Terminality};

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid image reference {0:?}: {1}")]
    InvalidReference(String, String),

    #[error("registry error: {0}")]
    Registry(String),

    #[error("manifest parse error: {0}")]
    ManifestParse(String),

    #[error("nil image source")]
    NilImageSource,

    #[error("image is missing the {} label", crate::INDEX_CONFIGS_LABEL)]
    MissingFbcLabelTerminal,

    #[error("image is missing the {} label (tag may not have propagated yet)", crate::INDEX_CONFIGS_LABEL)]
    MissingFbcLabelTransient,

    #[error("signature policy rejected image: {0}")]
    PolicyRejected(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Error::InvalidReference(..) | Error::NilImageSource | Error::MissingFbcLabelTerminal
        )
    }
}

impl From<Error> for ReconcileError {
    fn from(e: Error) -> Self {
        let reason = match &e {
            Error::InvalidReference(..) => "InvalidConfiguration",
            Error::NilImageSource => "InvalidConfiguration",
            Error::MissingFbcLabelTerminal => "Blocked",
            Error::MissingFbcLabelTransient => "Retrying",
            Error::PolicyRejected(_) => "Blocked",
            Error::Registry(_) | Error::ManifestParse(_) | Error::Io(_) => "Retrying",
        };
        if e.is_terminal() {
            ReconcileError::terminal(reason, e)
        } else {
            ReconcileError::transient(reason, e)
        }
    }
}

#[allow(dead_code)]
fn _assert_terminality(e: &Error) -> Terminality {
    if e.is_terminal() {
        Terminality::Terminal
    } else {
        Terminality::Transient
    }
}
