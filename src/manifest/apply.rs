//! Idempotent manifest application
//!
//! Applies every object of a decoded manifest stream through a
//! [`ResourceApplier`]. Creating an object that already exists is not an
//! error; any other failure aborts the remaining objects of the batch.

use crate::domain::ports::{ApplyAction, ManifestFetcher, ResourceApplier};
use crate::error::Result;
use crate::manifest::parser::{parse_manifests, GenericResource};
use tracing::{debug, error, info};

/// Namespace given to RoleBindings that do not declare one
pub const ROLE_BINDING_DEFAULT_NAMESPACE: &str = "kube-system";

const ROLE_BINDING_KIND: &str = "RoleBinding";

/// Apply every object in `document`.
///
/// When `namespace_override` is non-empty it replaces the namespace of every
/// object. Returns `true` when at least one object was newly created (or, for
/// update and delete, successfully acted on).
pub async fn apply_manifests<A>(
    applier: &A,
    document: &[u8],
    namespace_override: &str,
    action: ApplyAction,
) -> Result<bool>
where
    A: ResourceApplier + ?Sized,
{
    let resources = parse_manifests(document)?;
    let mut any_applied = false;

    for mut resource in resources {
        place(&mut resource, namespace_override);

        match applier.apply(&resource, action).await {
            Ok(()) => {
                debug!("{} {}", action, resource);
                any_applied = true;
            }
            Err(e) if action == ApplyAction::Create && e.is_already_exists() => {
                debug!("{} already exists, skipping", resource);
            }
            Err(e) => {
                error!("Failed to {} {}: {}", action, resource, e);
                return Err(e);
            }
        }
    }

    Ok(any_applied)
}

/// Fetch and apply each manifest location in order
pub async fn apply_locations<A>(
    fetcher: &dyn ManifestFetcher,
    applier: &A,
    locations: &[String],
    namespace_override: &str,
    action: ApplyAction,
) -> Result<bool>
where
    A: ResourceApplier + ?Sized,
{
    let mut any_applied = false;

    for location in locations {
        info!("Applying manifest {}", location);
        let document = fetcher.fetch(location).await?;
        if apply_manifests(applier, &document, namespace_override, action).await? {
            any_applied = true;
        }
    }

    Ok(any_applied)
}

fn place(resource: &mut GenericResource, namespace_override: &str) {
    if !namespace_override.is_empty() {
        resource.set_namespace(namespace_override);
    }
    if resource.kind == ROLE_BINDING_KIND && resource.namespace.is_none() {
        resource.set_namespace(ROLE_BINDING_DEFAULT_NAMESPACE);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use assert_matches::assert_matches;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{BTreeMap, HashSet};

    /// Records applied objects; names in `existing` report already-exists,
    /// names in `broken` fail outright.
    #[derive(Default)]
    struct RecordingApplier {
        applied: Mutex<Vec<GenericResource>>,
        existing: HashSet<String>,
        broken: HashSet<String>,
    }

    #[async_trait]
    impl ResourceApplier for RecordingApplier {
        async fn apply(&self, resource: &GenericResource, _action: ApplyAction) -> Result<()> {
            if self.broken.contains(&resource.name) {
                return Err(Error::Internal(format!("cannot apply {}", resource.name)));
            }
            if self.existing.contains(&resource.name) {
                return Err(Error::ResourceExists {
                    kind: resource.kind.clone(),
                    name: resource.name.clone(),
                });
            }
            self.applied.lock().push(resource.clone());
            Ok(())
        }
    }

    struct MapFetcher(BTreeMap<String, String>);

    #[async_trait]
    impl ManifestFetcher for MapFetcher {
        async fn fetch(&self, locator: &str) -> Result<Vec<u8>> {
            self.0
                .get(locator)
                .map(|s| s.as_bytes().to_vec())
                .ok_or_else(|| Error::ManifestFetch {
                    locator: locator.into(),
                    reason: "HTTP 404".into(),
                })
        }
    }

    const LIST_AND_SINGLE: &str = r#"
apiVersion: v1
kind: List
items:
  - apiVersion: v1
    kind: ServiceAccount
    metadata:
      name: first
  - apiVersion: v1
    kind: ConfigMap
    metadata:
      name: second
---
apiVersion: apps/v1
kind: DaemonSet
metadata:
  name: third
  namespace: kube-system
"#;

    #[tokio::test]
    async fn test_list_and_standalone_objects_are_applied() {
        let applier = RecordingApplier::default();
        let applied = apply_manifests(&applier, LIST_AND_SINGLE.as_bytes(), "", ApplyAction::Create)
            .await
            .unwrap();

        assert!(applied);
        let names: Vec<_> = applier.applied.lock().iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["first", "second", "third"]);
    }

    #[tokio::test]
    async fn test_stream_without_kinds_applies_nothing() {
        let applier = RecordingApplier::default();
        let applied = apply_manifests(&applier, b"---\nfoo: 1\n---\nbar: 2\n", "", ApplyAction::Create)
            .await
            .unwrap();

        assert!(!applied);
        assert!(applier.applied.lock().is_empty());
    }

    #[tokio::test]
    async fn test_already_exists_is_not_newly_applied() {
        let applier = RecordingApplier {
            existing: ["first", "second", "third"].iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let applied = apply_manifests(&applier, LIST_AND_SINGLE.as_bytes(), "", ApplyAction::Create)
            .await
            .unwrap();

        assert!(!applied);
    }

    #[tokio::test]
    async fn test_already_exists_is_an_error_for_updates() {
        let applier = RecordingApplier {
            existing: ["first"].iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let result =
            apply_manifests(&applier, LIST_AND_SINGLE.as_bytes(), "", ApplyAction::Update).await;

        assert_matches!(result, Err(Error::ResourceExists { .. }));
    }

    #[tokio::test]
    async fn test_failure_aborts_remaining_documents() {
        let applier = RecordingApplier {
            broken: ["second"].iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        };
        let result =
            apply_manifests(&applier, LIST_AND_SINGLE.as_bytes(), "", ApplyAction::Create).await;

        assert_matches!(result, Err(Error::Internal(_)));
        let names: Vec<_> = applier.applied.lock().iter().map(|r| r.name.clone()).collect();
        assert_eq!(names, vec!["first"]);
    }

    #[tokio::test]
    async fn test_namespace_override_and_role_binding_default() {
        let yaml = r#"
apiVersion: rbac.authorization.k8s.io/v1
kind: RoleBinding
metadata:
  name: servicecatalog.k8s.io:apiserver-authentication-reader
"#;
        let applier = RecordingApplier::default();
        apply_manifests(&applier, yaml.as_bytes(), "", ApplyAction::Create)
            .await
            .unwrap();
        apply_manifests(&applier, LIST_AND_SINGLE.as_bytes(), "vmware-system-csi", ApplyAction::Create)
            .await
            .unwrap();

        let applied = applier.applied.lock();
        assert_eq!(applied[0].namespace.as_deref(), Some("kube-system"));
        assert!(applied[1..]
            .iter()
            .all(|r| r.namespace.as_deref() == Some("vmware-system-csi")));
    }

    #[tokio::test]
    async fn test_apply_locations_stops_on_fetch_error() {
        let fetcher = MapFetcher(
            [("https://example.com/a.yaml".to_string(), LIST_AND_SINGLE.to_string())]
                .into_iter()
                .collect(),
        );
        let applier = RecordingApplier::default();
        let locations = vec![
            "https://example.com/a.yaml".to_string(),
            "https://example.com/missing.yaml".to_string(),
        ];

        let result =
            apply_locations(&fetcher, &applier, &locations, "", ApplyAction::Create).await;
        assert_matches!(result, Err(Error::ManifestFetch { .. }));
        assert_eq!(applier.applied.lock().len(), 3);
    }
}
