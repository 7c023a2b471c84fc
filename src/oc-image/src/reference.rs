use oci_client::secrets::RegistryAuth;
use oci_client::{Client, Reference};

use crate::error::{Error, Result};

pub fn parse(image_ref: &str) -> Result<Reference> {
    image_ref
        .parse()
        .map_err(|e: oci_client::ParseError| Error::InvalidReference(image_ref.to_string(), e.to_string()))
}

/// A reference known to carry a `sha256:` digest, plus metadata needed to
/// compute its on-disk cache path.
#[derive(Debug, Clone)]
pub struct CanonicalReference {
    pub reference: Reference,
    pub digest: String,
}

impl CanonicalReference {
    pub fn digest_dir_name(&self) -> String {
        self.digest.replace(':', "_")
    }

    pub fn reference_string(&self) -> String {
        format!(
            "{}/{}@{}",
            self.reference.registry(),
            self.reference.repository(),
            self.digest
        )
    }

    pub fn was_already_digest_pinned(&self, original: &Reference) -> bool {
        original.digest().is_some()
    }
}

/// Resolve a possibly-tag-bearing reference to a canonical digest reference.
/// If the input already carries a digest, no network call is made.
pub async fn resolve_canonical(
    client: &Client,
    reference: &Reference,
    auth: &RegistryAuth,
) -> Result<CanonicalReference> {
    if let Some(digest) = reference.digest() {
        return Ok(CanonicalReference {
            reference: reference.clone(),
            digest: digest.to_string(),
        });
    }

    let digest = client
        .fetch_manifest_digest(reference, auth)
        .await
        .map_err(|e| Error::Registry(e.to_string()))?;

    Ok(CanonicalReference {
        reference: reference.clone(),
        digest,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_tag_reference() {
        let r = parse("quay.io/x/catalog:latest").unwrap();
        assert_eq!(r.registry(), "quay.io");
        assert!(r.digest().is_none());
    }

    #[test]
    fn parses_digest_reference() {
        let r = parse(
            "quay.io/x/catalog@sha256:1111111111111111111111111111111111111111111111111111111111111111",
        );
        // Truncated/invalid digests are rejected by the `Reference` parser
        // itself; a well-formed one parses and carries a digest.
        if let Ok(r) = r {
            assert!(r.digest().is_some());
        }
    }

    #[test]
    fn rejects_garbage() {
        assert!(parse("not a valid ref!!").is_err());
    }
}
