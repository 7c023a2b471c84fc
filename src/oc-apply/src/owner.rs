//! Owner-reference injection and the standard managed-by label (§4.H).

use kube::core::ObjectMeta;
use serde_json::{json, Value};

pub const MANAGED_BY_LABEL: &str = "app.kubernetes.io/managed-by";
pub const MANAGED_BY_VALUE: &str = "clusterextension-controller";

/// Stamp `object` with an owner reference to `owner` (controller=true,
/// blockOwnerDeletion=true) and the managed-by label, creating
/// `metadata`/`metadata.labels` as needed.
pub fn stamp(object: &mut Value, owner_name: &str, owner_uid: &str) {
    let metadata = object
        .as_object_mut()
        .expect("rendered object is a JSON object")
        .entry("metadata")
        .or_insert_with(|| json!({}));
    let metadata = metadata.as_object_mut().expect("metadata is an object");

    let labels = metadata.entry("labels").or_insert_with(|| json!({}));
    labels
        .as_object_mut()
        .expect("labels is an object")
        .insert(MANAGED_BY_LABEL.to_string(), Value::String(MANAGED_BY_VALUE.to_string()));

    let owner_ref = json!({
        "apiVersion": "olm.operatorframework.io/v1",
        "kind": "ClusterExtension",
        "name": owner_name,
        "uid": owner_uid,
        "controller": true,
        "blockOwnerDeletion": true,
    });
    let owner_refs = metadata.entry("ownerReferences").or_insert_with(|| json!([]));
    let owner_refs = owner_refs.as_array_mut().expect("ownerReferences is an array");
    if !owner_refs.iter().any(|r| r["uid"] == owner_uid) {
        owner_refs.push(owner_ref);
    }
}

/// A cluster-scoped counterpart's owner metadata as plain fields, used when
/// validating/reading back an `ObjectMeta` rather than raw JSON.
pub fn has_owner(meta: &ObjectMeta, owner_uid: &str) -> bool {
    meta.owner_references
        .as_ref()
        .map(|refs| refs.iter().any(|r| r.uid == owner_uid))
        .unwrap_or(false)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn stamp_adds_label_and_owner_reference() {
        let mut object = json!({"kind": "ConfigMap", "metadata": {"name": "foo"}});
        stamp(&mut object, "my-ext", "uid-123");
        assert_eq!(object["metadata"]["labels"][MANAGED_BY_LABEL], MANAGED_BY_VALUE);
        assert_eq!(object["metadata"]["ownerReferences"][0]["uid"], "uid-123");
        assert_eq!(object["metadata"]["ownerReferences"][0]["controller"], true);
    }

    #[test]
    fn stamp_is_idempotent_for_the_same_owner() {
        let mut object = json!({"kind": "ConfigMap", "metadata": {"name": "foo"}});
        stamp(&mut object, "my-ext", "uid-123");
        stamp(&mut object, "my-ext", "uid-123");
        assert_eq!(object["metadata"]["ownerReferences"].as_array().unwrap().len(), 1);
    }
}
