use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One `(schema, package, name)` → byte-range entry into `data.json`.
/// `package` and `name` are absent for blobs that don't carry them (e.g. a
/// top-level `olm.package` blob has no `package` key of its own, but a
/// `olm.channel` or `olm.bundle` blob does).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexEntry {
    pub schema: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub package: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    pub offset: u64,
    pub length: u64,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Index(pub Vec<IndexEntry>);

/// A `/metas` query: any subset of `schema`, `package`, `name`. At least one
/// key must be present once validated by the caller; an empty query matches
/// nothing (not "everything").
#[derive(Debug, Clone, Default)]
pub struct MetasQuery {
    pub schema: Vec<String>,
    pub package: Vec<String>,
    pub name: Vec<String>,
}

impl MetasQuery {
    pub fn is_empty(&self) -> bool {
        self.schema.is_empty() && self.package.is_empty() && self.name.is_empty()
    }

    fn matches(&self, entry: &IndexEntry) -> bool {
        let schema_ok = self.schema.is_empty() || self.schema.iter().any(|s| s == &entry.schema);
        let package_ok = self.package.is_empty()
            || entry
                .package
                .as_deref()
                .is_some_and(|p| self.package.iter().any(|q| q == p));
        let name_ok = self.name.is_empty()
            || entry
                .name
                .as_deref()
                .is_some_and(|n| self.name.iter().any(|q| q == n));
        schema_ok && package_ok && name_ok
    }
}

impl Index {
    pub fn matching(&self, query: &MetasQuery) -> Vec<&IndexEntry> {
        self.0.iter().filter(|e| query.matches(e)).collect()
    }
}

/// Extract the `(schema, package, name)` triple a blob should be indexed
/// under. `schema` is mandatory on every FBC blob (§8 invariant).
pub fn index_key(blob: &Value) -> Option<(String, Option<String>, Option<String>)> {
    let schema = blob.get("schema")?.as_str()?.to_string();
    let package = blob
        .get("package")
        .and_then(Value::as_str)
        .map(str::to_string);
    let name = blob.get("name").and_then(Value::as_str).map(str::to_string);
    Some((schema, package, name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn entry(schema: &str, package: Option<&str>, name: Option<&str>) -> IndexEntry {
        IndexEntry {
            schema: schema.to_string(),
            package: package.map(str::to_string),
            name: name.map(str::to_string),
            offset: 0,
            length: 0,
        }
    }

    #[test]
    fn query_requires_all_present_keys_to_match() {
        let e = entry("olm.bundle", Some("foo"), Some("foo.v1.0.0"));
        let q = MetasQuery {
            schema: vec!["olm.bundle".to_string()],
            package: vec!["bar".to_string()],
            name: vec![],
        };
        assert!(!q.matches(&e));
    }

    #[test]
    fn empty_query_matches_everything_when_validated_by_caller() {
        let e = entry("olm.package", None, Some("foo"));
        let q = MetasQuery::default();
        assert!(q.matches(&e));
    }

    #[test]
    fn index_key_requires_schema() {
        assert!(index_key(&json!({"package": "foo"})).is_none());
        assert_eq!(
            index_key(&json!({"schema": "olm.package", "name": "foo"})),
            Some(("olm.package".to_string(), None, Some("foo".to_string())))
        );
    }
}
