use std::collections::HashMap;
use std::path::Path;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use oci_client::client::{Certificate, CertificateEncoding};
use oci_client::secrets::RegistryAuth;
use oci_client::Reference;
use serde::Deserialize;
use tracing::warn;

/// Everything a pull needs from the caller's authentication boundary: the
/// aggregated docker-config credentials (written by 4.F's pull-secret
/// reconciler) and any extra trust roots.
#[derive(Debug, Clone, Default)]
pub struct AuthContext {
    docker_config: Option<DockerConfig>,
    pub extra_root_certificates: Vec<oci_client::client::Certificate>,
}

#[derive(Debug, Clone, Deserialize)]
struct DockerConfig {
    #[serde(default, rename = "auths")]
    auths: HashMap<String, DockerConfigEntry>,
}

#[derive(Debug, Clone, Deserialize)]
struct DockerConfigEntry {
    #[serde(default)]
    auth: Option<String>,
    #[serde(default)]
    username: Option<String>,
    #[serde(default)]
    password: Option<String>,
}

impl AuthContext {
    pub fn anonymous() -> Self {
        Self::default()
    }

    /// Parse an aggregated docker-config JSON, as written by the pull-secret
    /// reconciler's auth file (§4.F).
    pub fn from_docker_config_json(bytes: &[u8]) -> serde_json::Result<Self> {
        let docker_config: DockerConfig = serde_json::from_slice(bytes)?;
        Ok(Self {
            docker_config: Some(docker_config),
            extra_root_certificates: Vec::new(),
        })
    }

    /// Read the pull-secret reconciler's aggregated auth file, tolerating
    /// its momentary absence (the reconciler is the single writer; this is
    /// the tolerant-reader half of that contract). Any I/O or parse failure
    /// falls back to [`AuthContext::anonymous`] rather than failing the
    /// pull outright.
    pub async fn from_docker_config_file(path: &Path) -> Self {
        let bytes = match tokio::fs::read(path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Self::anonymous(),
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read aggregated pull secret file, pulling anonymously");
                return Self::anonymous();
            }
        };
        match Self::from_docker_config_json(&bytes) {
            Ok(ctx) => ctx,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to parse aggregated pull secret file, pulling anonymously");
                Self::anonymous()
            }
        }
    }

    /// Adds every PEM certificate found in `dir` (non-recursive) as an extra
    /// trust root for registry TLS connections.
    pub async fn with_extra_cas_from_dir(mut self, dir: &Path) -> std::io::Result<Self> {
        let mut entries = tokio::fs::read_dir(dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            let data = tokio::fs::read(entry.path()).await?;
            self.extra_root_certificates.push(Certificate { encoding: CertificateEncoding::Pem, data });
        }
        Ok(self)
    }

    pub fn registry_auth_for(&self, reference: &Reference) -> RegistryAuth {
        let Some(cfg) = &self.docker_config else {
            return RegistryAuth::Anonymous;
        };
        let registry = reference.registry();
        let Some(entry) = cfg.auths.get(registry) else {
            return RegistryAuth::Anonymous;
        };
        if let (Some(user), Some(pass)) = (&entry.username, &entry.password) {
            return RegistryAuth::Basic(user.clone(), pass.clone());
        }
        if let Some(auth) = &entry.auth {
            if let Some((user, pass)) = decode_basic_auth(auth) {
                return RegistryAuth::Basic(user, pass);
            }
        }
        RegistryAuth::Anonymous
    }
}

fn decode_basic_auth(encoded: &str) -> Option<(String, String)> {
    let raw = STANDARD.decode(encoded).ok()?;
    let text = String::from_utf8(raw).ok()?;
    let (user, pass) = text.split_once(':')?;
    Some((user.to_string(), pass.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_context_yields_anonymous_auth() {
        let ctx = AuthContext::anonymous();
        let reference: Reference = "quay.io/x/y:latest".parse().unwrap();
        assert!(matches!(ctx.registry_auth_for(&reference), RegistryAuth::Anonymous));
    }

    #[test]
    fn docker_config_with_matching_entry_yields_basic_auth() {
        let json = br#"{"auths":{"quay.io":{"auth":"dXNlcjpwYXNz"}}}"#;
        let ctx = AuthContext::from_docker_config_json(json).unwrap();
        let reference: Reference = "quay.io/x/y:latest".parse().unwrap();
        match ctx.registry_auth_for(&reference) {
            RegistryAuth::Basic(u, p) => {
                assert_eq!(u, "user");
                assert_eq!(p, "pass");
            }
            other => panic!("expected basic auth, got {other:?}"),
        }
    }

    #[test]
    fn docker_config_without_matching_entry_yields_anonymous() {
        let json = br#"{"auths":{"docker.io":{"auth":"dXNlcjpwYXNz"}}}"#;
        let ctx = AuthContext::from_docker_config_json(json).unwrap();
        let reference: Reference = "quay.io/x/y:latest".parse().unwrap();
        assert!(matches!(ctx.registry_auth_for(&reference), RegistryAuth::Anonymous));
    }
}
