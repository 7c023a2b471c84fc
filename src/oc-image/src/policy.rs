use crate::error::{Error, Result};

/// Validates a pulled manifest against a named trust policy.
///
/// Per the design notes (§9), this crate does not embed a signature-policy
/// engine; a production deployment plugs in an implementation that delegates
/// to a mature container-image trust library (e.g. a sigstore/cosign
/// verifier). The default, used when no policy configuration is present, is
/// [`InsecureAcceptAnything`].
pub trait SignaturePolicy: Send + Sync {
    fn validate(&self, manifest_digest: &str, manifest_bytes: &[u8]) -> Result<()>;
}

#[derive(Debug, Clone, Copy, Default)]
pub struct InsecureAcceptAnything;

impl SignaturePolicy for InsecureAcceptAnything {
    fn validate(&self, _manifest_digest: &str, _manifest_bytes: &[u8]) -> Result<()> {
        Ok(())
    }
}

/// A policy that rejects everything; useful in tests that assert the
/// `unpack` call surfaces a `PolicyRejected` error correctly.
#[derive(Debug, Clone, Copy, Default)]
pub struct RejectAll;

impl SignaturePolicy for RejectAll {
    fn validate(&self, manifest_digest: &str, _manifest_bytes: &[u8]) -> Result<()> {
        Err(Error::PolicyRejected(format!(
            "no policy permits {manifest_digest}"
        )))
    }
}
