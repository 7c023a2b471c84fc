//! RBAC pre-authorization (§4.G, feature-gated): simulate the `(verb,
//! group, resource, namespace, name)` pairs implied by the rendered set
//! against the extension's bound identity via `SubjectAccessReview`.

use std::collections::BTreeSet;

use k8s_openapi::api::authorization::v1::{
    ResourceAttributes, SubjectAccessReview, SubjectAccessReviewSpec,
};
use kube::api::PostParams;
use kube::{Api, Client};
use serde_json::Value;
use tracing::instrument;

use crate::error::{Error, Result};

const NAME: &str = "RBACPreAuthorization";

/// The verb set implied by applying an object under server-side apply with
/// a stable field owner: the applier must be able to read current state,
/// create it if absent, and patch it if present.
const APPLY_VERBS: &[&str] = &["get", "create", "patch"];

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
struct RequiredPermission {
    verb: String,
    group: String,
    resource: String,
    namespace: String,
    name: String,
}

/// Identity under which the simulated requests run: either the
/// impersonated synthetic user or the bound service account, as built by
/// `oc_auth::client_for_extension`.
pub struct Identity {
    pub username: String,
    pub groups: Vec<String>,
}

#[instrument(skip(client, rendered), fields(username = %identity.username))]
pub async fn check(client: &Client, identity: &Identity, rendered: &[Value]) -> Result<()> {
    let required = implied_permissions(rendered);
    let mut missing = Vec::new();

    let api: Api<SubjectAccessReview> = Api::all(client.clone());
    for permission in &required {
        let review = SubjectAccessReview {
            spec: SubjectAccessReviewSpec {
                user: Some(identity.username.clone()),
                groups: Some(identity.groups.clone()),
                resource_attributes: Some(ResourceAttributes {
                    verb: Some(permission.verb.clone()),
                    group: Some(permission.group.clone()),
                    resource: Some(permission.resource.clone()),
                    namespace: Some(permission.namespace.clone()),
                    name: Some(permission.name.clone()),
                    ..Default::default()
                }),
                ..Default::default()
            },
            ..Default::default()
        };
        let result = api
            .create(&PostParams::default(), &review)
            .await
            .map_err(|e| Error::Kube { preflight: NAME, source: e })?;
        let allowed = result.status.map(|s| s.allowed).unwrap_or(false);
        if !allowed {
            missing.push(permission.clone());
        }
    }

    if !missing.is_empty() {
        return Err(Error::Rejected {
            preflight: NAME,
            message: format!(
                "missing permissions: {}",
                missing
                    .iter()
                    .map(|p| format!("{} {}/{} in {:?}", p.verb, p.group, p.resource, p.namespace))
                    .collect::<Vec<_>>()
                    .join(", ")
            ),
        });
    }
    Ok(())
}

fn implied_permissions(rendered: &[Value]) -> BTreeSet<RequiredPermission> {
    let mut out = BTreeSet::new();
    for object in rendered {
        let Some(kind) = object.get("kind").and_then(Value::as_str) else {
            continue;
        };
        let api_version = object.get("apiVersion").and_then(Value::as_str).unwrap_or("v1");
        let group = api_version.split_once('/').map(|(g, _)| g).unwrap_or("").to_string();
        let resource = pluralize(kind);
        let namespace = object
            .get("metadata")
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();
        let name = object
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .unwrap_or("")
            .to_string();

        for verb in APPLY_VERBS {
            out.insert(RequiredPermission {
                verb: verb.to_string(),
                group: group.clone(),
                resource: resource.clone(),
                namespace: namespace.clone(),
                name: name.clone(),
            });
        }
    }
    out
}

/// Naive kind-to-resource pluralization (lowercase + trailing `s`); the
/// small set of irregular kinds the rendered set can contain are special-cased.
fn pluralize(kind: &str) -> String {
    let lower = kind.to_lowercase();
    match lower.as_str() {
        "ingress" => "ingresses".to_string(),
        _ if lower.ends_with('y') && !lower.ends_with("ay") && !lower.ends_with("ey") => {
            format!("{}ies", &lower[..lower.len() - 1])
        }
        _ => format!("{lower}s"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn derives_apply_verbs_for_each_rendered_object() {
        let rendered = vec![json!({
            "apiVersion": "apps/v1",
            "kind": "Deployment",
            "metadata": {"name": "foo", "namespace": "ns"},
        })];
        let required = implied_permissions(&rendered);
        assert_eq!(required.len(), APPLY_VERBS.len());
        assert!(required.iter().any(|p| p.verb == "create" && p.resource == "deployments"));
    }

    #[test]
    fn pluralizes_common_kinds() {
        assert_eq!(pluralize("Deployment"), "deployments");
        assert_eq!(pluralize("Ingress"), "ingresses");
        assert_eq!(pluralize("NetworkPolicy"), "networkpolicies");
    }
}
