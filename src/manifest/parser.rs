//! Multi-document manifest decoding
//!
//! Splits a YAML stream (or a single JSON document) into generic objects.
//! Each document is first decoded into a minimal type header; documents
//! without a kind are skipped and `List` wrappers are flattened.

use crate::error::{Error, Result};
use serde::Deserialize;
use serde_json::{Map, Value};

/// Kind of the generic list wrapper
pub const LIST_KIND: &str = "List";

// =============================================================================
// Generic Resource
// =============================================================================

/// A Kubernetes object of any kind, kept as its raw JSON payload
#[derive(Debug, Clone, PartialEq)]
pub struct GenericResource {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub namespace: Option<String>,
    /// The complete object, including `apiVersion`, `kind` and `metadata`
    pub payload: Map<String, Value>,
}

impl GenericResource {
    /// Build from a decoded object
    pub fn from_value(value: Value) -> Result<Self> {
        let payload = match value {
            Value::Object(map) => map,
            other => {
                return Err(Error::ManifestParse(format!(
                    "expected an object, found {}",
                    other
                )))
            }
        };

        let header = TypeHeader::deserialize(&Value::Object(payload.clone()))
            .map_err(|e| Error::ManifestParse(e.to_string()))?;
        if header.api_version.is_empty() {
            return Err(Error::ManifestParse(format!(
                "{} object is missing apiVersion",
                header.kind
            )));
        }

        let metadata = payload.get("metadata").and_then(Value::as_object);
        let name = metadata
            .and_then(|m| m.get("name"))
            .and_then(Value::as_str)
            .filter(|n| !n.is_empty())
            .ok_or_else(|| {
                Error::ManifestParse(format!("{} object is missing metadata.name", header.kind))
            })?
            .to_string();
        let namespace = metadata
            .and_then(|m| m.get("namespace"))
            .and_then(Value::as_str)
            .filter(|ns| !ns.is_empty())
            .map(str::to_string);

        Ok(Self {
            api_version: header.api_version,
            kind: header.kind,
            name,
            namespace,
            payload,
        })
    }

    /// Force the namespace, updating the payload as well
    pub fn set_namespace(&mut self, namespace: &str) {
        self.namespace = Some(namespace.to_string());
        let metadata = self
            .payload
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()));
        if let Value::Object(metadata) = metadata {
            metadata.insert("namespace".into(), Value::String(namespace.to_string()));
        }
    }

    /// Split `apiVersion` into (group, version); core objects have an empty group
    pub fn group_version(&self) -> (&str, &str) {
        match self.api_version.split_once('/') {
            Some((group, version)) => (group, version),
            None => ("", self.api_version.as_str()),
        }
    }

    /// The object as a JSON value
    pub fn to_value(&self) -> Value {
        Value::Object(self.payload.clone())
    }
}

impl std::fmt::Display for GenericResource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{} ({})", ns, self.name, self.kind),
            None => write!(f, "{} ({})", self.name, self.kind),
        }
    }
}

// =============================================================================
// Decoding
// =============================================================================

/// Minimal discriminator decoded before the full object
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct TypeHeader {
    #[serde(default)]
    api_version: String,
    #[serde(default)]
    kind: String,
}

/// Decode every object in a multi-document stream
pub fn parse_manifests(document: &[u8]) -> Result<Vec<GenericResource>> {
    let mut resources = Vec::new();

    for doc in serde_yaml::Deserializer::from_slice(document) {
        let value = Value::deserialize(doc).map_err(|e| Error::ManifestParse(e.to_string()))?;
        collect(value, &mut resources)?;
    }

    Ok(resources)
}

fn collect(value: Value, out: &mut Vec<GenericResource>) -> Result<()> {
    if !value.is_object() {
        return Ok(());
    }

    let header =
        TypeHeader::deserialize(&value).map_err(|e| Error::ManifestParse(e.to_string()))?;
    if header.kind.is_empty() {
        return Ok(());
    }

    if header.kind == LIST_KIND {
        let items = match value {
            Value::Object(mut map) => map.remove("items"),
            _ => None,
        };
        if let Some(Value::Array(items)) = items {
            for item in items {
                collect(item, out)?;
            }
        }
        return Ok(());
    }

    out.push(GenericResource::from_value(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;

    #[test]
    fn test_parse_multi_document() {
        let yaml = r#"
apiVersion: v1
kind: ServiceAccount
metadata:
  name: cloud-controller-manager
  namespace: kube-system
---
apiVersion: rbac.authorization.k8s.io/v1
kind: ClusterRole
metadata:
  name: system:cloud-controller-manager
"#;
        let resources = parse_manifests(yaml.as_bytes()).unwrap();
        assert_eq!(resources.len(), 2);
        assert_eq!(resources[0].kind, "ServiceAccount");
        assert_eq!(resources[0].namespace.as_deref(), Some("kube-system"));
        assert_eq!(resources[1].name, "system:cloud-controller-manager");
        assert_eq!(resources[1].namespace, None);
        assert_eq!(
            resources[1].group_version(),
            ("rbac.authorization.k8s.io", "v1")
        );
    }

    #[test]
    fn test_list_is_flattened() {
        let yaml = r#"
apiVersion: v1
kind: List
items:
  - apiVersion: v1
    kind: ConfigMap
    metadata:
      name: one
  - apiVersion: v1
    kind: ConfigMap
    metadata:
      name: two
"#;
        let resources = parse_manifests(yaml.as_bytes()).unwrap();
        let names: Vec<_> = resources.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["one", "two"]);
    }

    #[test]
    fn test_documents_without_kind_are_skipped() {
        let yaml = "---\n# only a comment\n---\nfoo: bar\n---\n";
        let resources = parse_manifests(yaml.as_bytes()).unwrap();
        assert!(resources.is_empty());
    }

    #[test]
    fn test_single_json_document() {
        let json = r#"{"apiVersion": "storage.k8s.io/v1", "kind": "CSIDriver", "metadata": {"name": "csi.vsphere.vmware.com"}}"#;
        let resources = parse_manifests(json.as_bytes()).unwrap();
        assert_eq!(resources.len(), 1);
        assert_eq!(resources[0].kind, "CSIDriver");
        assert_eq!(resources[0].group_version(), ("storage.k8s.io", "v1"));
    }

    #[test]
    fn test_missing_name_is_parse_error() {
        let yaml = "apiVersion: v1\nkind: Secret\nmetadata: {}\n";
        assert_matches!(
            parse_manifests(yaml.as_bytes()),
            Err(Error::ManifestParse(_))
        );
    }

    #[test]
    fn test_malformed_yaml_is_parse_error() {
        let yaml = "apiVersion: v1\nkind: [unterminated\n";
        assert_matches!(
            parse_manifests(yaml.as_bytes()),
            Err(Error::ManifestParse(_))
        );
    }

    #[test]
    fn test_set_namespace_updates_payload() {
        let yaml = "apiVersion: v1\nkind: ServiceAccount\nmetadata:\n  name: sa\n";
        let mut resource = parse_manifests(yaml.as_bytes()).unwrap().remove(0);
        resource.set_namespace("vmware-system-csi");

        assert_eq!(resource.namespace.as_deref(), Some("vmware-system-csi"));
        assert_eq!(
            resource.to_value()["metadata"]["namespace"],
            "vmware-system-csi"
        );
    }
}
