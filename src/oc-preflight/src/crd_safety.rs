//! CRD upgrade safety (§4.G): for each CRD in the rendered set that already
//! exists cluster-side, reject a change that would make an already-stored
//! instance invalid.
//!
//! This is not a full recursive JSON-schema diff: it covers the three
//! checks operator-framework's own gate treats as load-bearing (dropped
//! stored version, newly required field, narrowed enum/bounds on an
//! existing top-level property) and nothing deeper.

use std::collections::HashSet;

use k8s_openapi::apiextensions_apiserver::pkg::apis::apiextensions::v1::{
    CustomResourceDefinition, CustomResourceValidation, JSONSchemaProps,
};
use kube::{Api, Client};
use serde_json::Value;

use crate::error::{Error, Result};

const NAME: &str = "CRDUpgradeSafety";

pub async fn check(client: &Client, rendered: &[Value]) -> Result<()> {
    let api: Api<CustomResourceDefinition> = Api::all(client.clone());

    for object in rendered {
        if object.get("kind").and_then(Value::as_str) != Some("CustomResourceDefinition") {
            continue;
        }
        let Some(name) = object
            .get("metadata")
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
        else {
            continue;
        };

        let existing = match api.get_opt(name).await {
            Ok(existing) => existing,
            Err(e) => return Err(Error::Kube { preflight: NAME, source: e }),
        };
        let Some(existing) = existing else {
            continue;
        };

        let proposed: CustomResourceDefinition = serde_json::from_value(object.clone()).map_err(|e| Error::Rejected {
            preflight: NAME,
            message: format!("CRD {name:?} could not be parsed as a CustomResourceDefinition: {e}"),
        })?;

        check_stored_versions(name, &existing, &proposed)?;
        check_required_and_validation(name, &existing, &proposed)?;
    }
    Ok(())
}

fn check_stored_versions(
    name: &str,
    existing: &CustomResourceDefinition,
    proposed: &CustomResourceDefinition,
) -> Result<()> {
    let stored: HashSet<&str> = existing
        .status
        .as_ref()
        .map(|s| s.stored_versions.iter().map(String::as_str).collect())
        .unwrap_or_default();
    let proposed_versions: HashSet<&str> = proposed.spec.versions.iter().map(|v| v.name.as_str()).collect();

    let dropped: Vec<&str> = stored.difference(&proposed_versions).copied().collect();
    if !dropped.is_empty() {
        return Err(Error::Rejected {
            preflight: NAME,
            message: format!("CRD {name:?} would drop stored version(s): {}", dropped.join(", ")),
        });
    }
    Ok(())
}

fn check_required_and_validation(
    name: &str,
    existing: &CustomResourceDefinition,
    proposed: &CustomResourceDefinition,
) -> Result<()> {
    for existing_version in &existing.spec.versions {
        let Some(proposed_version) = proposed.spec.versions.iter().find(|v| v.name == existing_version.name) else {
            continue;
        };

        let old_schema = schema_of(&existing_version.schema);
        let new_schema = schema_of(&proposed_version.schema);
        let (Some(old_schema), Some(new_schema)) = (old_schema, new_schema) else {
            continue;
        };

        if let Some(field) = newly_required_field(old_schema, new_schema) {
            return Err(Error::Rejected {
                preflight: NAME,
                message: format!(
                    "CRD {name:?} version {:?} adds new required field {field:?}; existing objects would become invalid",
                    existing_version.name
                ),
            });
        }
        if let Some(reason) = tightened_validation(old_schema, new_schema) {
            return Err(Error::Rejected {
                preflight: NAME,
                message: format!("CRD {name:?} version {:?} narrows validation: {reason}", existing_version.name),
            });
        }
    }
    Ok(())
}

fn schema_of(validation: &Option<CustomResourceValidation>) -> Option<&JSONSchemaProps> {
    validation.as_ref()?.open_apiv3_schema.as_ref()
}

fn newly_required_field(old: &JSONSchemaProps, new: &JSONSchemaProps) -> Option<String> {
    let old_required: HashSet<&str> = old.required.iter().flatten().map(String::as_str).collect();
    new.required
        .iter()
        .flatten()
        .find(|f| !old_required.contains(f.as_str()))
        .cloned()
}

/// Top-level-property enum/bounds narrowing only; nested schemas aren't
/// walked.
fn tightened_validation(old: &JSONSchemaProps, new: &JSONSchemaProps) -> Option<String> {
    let old_props = old.properties.as_ref()?;
    let new_props = new.properties.as_ref()?;
    for (field, old_prop) in old_props {
        let Some(new_prop) = new_props.get(field) else {
            continue;
        };
        if let (Some(old_enum), Some(new_enum)) = (&old_prop.enum_, &new_prop.enum_) {
            let still_permitted = old_enum.iter().all(|old_value| new_enum.iter().any(|new_value| new_value.0 == old_value.0));
            if !still_permitted {
                return Some(format!("field {field:?} enum no longer permits all previously-valid values"));
            }
        }
        if let (Some(old_max), Some(new_max)) = (old_prop.maximum, new_prop.maximum) {
            if new_max < old_max {
                return Some(format!("field {field:?} maximum tightened from {old_max} to {new_max}"));
            }
        }
        if let (Some(old_min), Some(new_min)) = (old_prop.minimum, new_prop.minimum) {
            if new_min > old_min {
                return Some(format!("field {field:?} minimum tightened from {old_min} to {new_min}"));
            }
        }
    }
    None
}
