//! Applying a phase's objects under a stable field owner (§4.H).

use kube::api::{Api, DynamicObject, Patch, PatchParams};
use kube::core::{ApiResource, GroupVersionKind};
use kube::Client;
use serde_json::Value;
use tracing::instrument;

use crate::error::{Error, Result};

/// The field manager every applied object is owned under. Conflicts are
/// resolved by force-taking ownership of the fields this manager sets,
/// never by discarding another manager's fields wholesale.
pub const FIELD_MANAGER: &str = "olm.operatorframework.io/clusterextension-controller";

/// Apply every object in `phase_objects` via server-side apply under
/// [`FIELD_MANAGER`]. Object apply failures are retried without rollback:
/// this function applies what it can and returns the first error, leaving
/// already-applied objects in place for the caller to retry.
#[instrument(skip(client, phase_objects), fields(phase = %phase_name, count = phase_objects.len()))]
pub async fn apply_phase(client: &Client, phase_name: &str, phase_objects: &[Value]) -> Result<()> {
    for object in phase_objects {
        apply_object(client, object).await?;
    }
    Ok(())
}

async fn apply_object(client: &Client, object: &Value) -> Result<()> {
    let api_version = object
        .get("apiVersion")
        .and_then(Value::as_str)
        .ok_or(Error::MalformedObject)?;
    let kind = object.get("kind").and_then(Value::as_str).ok_or(Error::MalformedObject)?;
    let name = object
        .get("metadata")
        .and_then(|m| m.get("name"))
        .and_then(Value::as_str)
        .ok_or(Error::MalformedObject)?;
    let namespace = object
        .get("metadata")
        .and_then(|m| m.get("namespace"))
        .and_then(Value::as_str);

    let (group, version) = api_version.split_once('/').map(|(g, v)| (g, v)).unwrap_or(("", api_version));
    let gvk = GroupVersionKind::gvk(group, version, kind);
    let plural = pluralize(kind);
    let resource = ApiResource::from_gvk_with_plural(&gvk, &plural);

    let api: Api<DynamicObject> = match namespace {
        Some(ns) => Api::namespaced_with(client.clone(), ns, &resource),
        None => Api::all_with(client.clone(), &resource),
    };

    let dynamic_object: DynamicObject = serde_json::from_value(object.clone()).map_err(|_| Error::MalformedObject)?;
    let params = PatchParams::apply(FIELD_MANAGER).force();
    api.patch(name, &params, &Patch::Apply(&dynamic_object))
        .await
        .map_err(|source| Error::Apply { kind: kind.to_string(), name: name.to_string(), source })?;
    Ok(())
}

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

    #[test]
    fn pluralizes_common_kinds() {
        assert_eq!(pluralize("ConfigMap"), "configmaps");
        assert_eq!(pluralize("Ingress"), "ingresses");
        assert_eq!(pluralize("NetworkPolicy"), "networkpolicies");
    }
}
