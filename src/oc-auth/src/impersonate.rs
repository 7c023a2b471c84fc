//! Selects the reconciler's HTTP transport for a given `ClusterExtension`
//! (§4.F): synthetic-user impersonation when `serviceAccount.name` is the
//! reserved `olm.synthetic-user` literal, service-account token
//! impersonation otherwise.

use kube::config::Config;
use kube::Client;

use oc_types::extension::SYNTHETIC_USER;

use crate::error::Result;
use crate::token::{ServiceAccountKey, TokenGetter};

/// The identity an impersonated request presents as.
#[derive(Debug, Clone)]
pub struct ImpersonationIdentity {
    pub username: String,
    pub groups: Vec<String>,
}

/// Derives the impersonation identity from the extension object itself,
/// rather than from any bound service account.
pub fn synthetic_user_identity(extension_name: &str, namespace: &str) -> ImpersonationIdentity {
    ImpersonationIdentity {
        username: format!("system:serviceaccount:{namespace}:{extension_name}"),
        groups: vec![format!("olm.operatorframework.io/extension:{extension_name}")],
    }
}

async fn client_with_impersonation(mut config: Config, identity: &ImpersonationIdentity) -> Result<Client> {
    config.auth_info.impersonate = Some(identity.username.clone());
    config.auth_info.impersonate_groups = Some(identity.groups.clone());
    Ok(Client::try_from(config)?)
}

async fn client_with_token(mut config: Config, token: String) -> Result<Client> {
    config.auth_info.token = Some(token.into());
    config.auth_info.token_file = None;
    Ok(Client::try_from(config)?)
}

/// Builds the client the rest of the reconcile runs under: either
/// impersonating the extension's synthetic identity, or bearing a minted
/// token for its bound service account.
pub async fn client_for_extension(
    base_config: Config,
    token_getter: &TokenGetter,
    extension_name: &str,
    namespace: &str,
    service_account_name: &str,
) -> Result<Client> {
    if service_account_name == SYNTHETIC_USER {
        let identity = synthetic_user_identity(extension_name, namespace);
        client_with_impersonation(base_config, &identity).await
    } else {
        let key = ServiceAccountKey::new(namespace, service_account_name);
        let token = token_getter.token_for(&key).await?;
        client_with_token(base_config, token).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn synthetic_identity_carries_extension_derived_group() {
        let identity = synthetic_user_identity("my-extension", "olm-system");
        assert!(identity.groups[0].contains("my-extension"));
    }
}
