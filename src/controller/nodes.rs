//! Node metadata owned by the cloud provider pipeline
//!
//! Uninitialized nodes get the cloud provider taint so nothing schedules
//! there before the cloud controller manager has set a provider ID. Every
//! node is labelled with the VDOConfig that manages it, which lets node
//! events find their way back to that VDOConfig.

use crate::crd::NodeStatus;
use crate::domain::ports::ClusterStore;
use crate::error::Result;
use k8s_openapi::api::core::v1::{Node, Taint};
use std::collections::BTreeMap;
use tracing::info;

/// Taint removed by the cloud controller manager once a node is initialized
pub const UNINITIALIZED_TAINT_KEY: &str = "node.cloudprovider.kubernetes.io/uninitialized";

const UNINITIALIZED_TAINT_VALUE: &str = "true";
const NO_SCHEDULE: &str = "NoSchedule";

/// Label naming the VDOConfig that manages a node
pub const VDO_CONFIG_LABEL: &str = "vdo.vmware.com/vdoconfig";

/// Provider ID set by the cloud controller manager, if any
pub fn provider_id(node: &Node) -> Option<&str> {
    node.spec
        .as_ref()
        .and_then(|s| s.provider_id.as_deref())
        .filter(|id| !id.is_empty())
}

pub fn has_uninitialized_taint(node: &Node) -> bool {
    node.spec
        .as_ref()
        .and_then(|s| s.taints.as_ref())
        .map_or(false, |taints| {
            taints.iter().any(|t| t.key == UNINITIALIZED_TAINT_KEY)
        })
}

fn node_name(node: &Node) -> &str {
    node.metadata.name.as_deref().unwrap_or_default()
}

/// Taint every uninitialized node that is not tainted yet.
///
/// Nodes that already carry the taint, or already have a provider ID, are
/// left alone. Returns the number of nodes updated; `nodes` is refreshed
/// with the stored copies.
pub async fn reconcile_node_taint(store: &dyn ClusterStore, nodes: &mut [Node]) -> Result<usize> {
    let mut updated = 0;
    for node in nodes.iter_mut() {
        // The cloud controller manager removes the taint once it sets the
        // provider ID; re-adding it would make an initialized node
        // unschedulable again.
        if has_uninitialized_taint(node) || provider_id(node).is_some() {
            continue;
        }

        let mut desired = node.clone();
        desired
            .spec
            .get_or_insert_with(Default::default)
            .taints
            .get_or_insert_with(Vec::new)
            .push(Taint {
                key: UNINITIALIZED_TAINT_KEY.to_string(),
                value: Some(UNINITIALIZED_TAINT_VALUE.to_string()),
                effect: NO_SCHEDULE.to_string(),
                time_added: None,
            });

        *node = store.replace_node(&desired).await?;
        info!("Tainted node {} as uninitialized", node_name(node));
        updated += 1;
    }
    Ok(updated)
}

/// Label every node lacking the ownership label with `vdo_config`
pub async fn reconcile_node_label(
    store: &dyn ClusterStore,
    nodes: &mut [Node],
    vdo_config: &str,
) -> Result<usize> {
    let mut updated = 0;
    for node in nodes.iter_mut() {
        let labelled = node
            .metadata
            .labels
            .as_ref()
            .map_or(false, |l| l.contains_key(VDO_CONFIG_LABEL));
        if labelled {
            continue;
        }

        let mut desired = node.clone();
        desired
            .metadata
            .labels
            .get_or_insert_with(BTreeMap::new)
            .insert(VDO_CONFIG_LABEL.to_string(), vdo_config.to_string());

        *node = store.replace_node(&desired).await?;
        info!("Labelled node {} with VDOConfig {}", node_name(node), vdo_config);
        updated += 1;
    }
    Ok(updated)
}

/// `ready` once a node has a provider ID, `pending` before
pub fn node_statuses(nodes: &[Node]) -> BTreeMap<String, NodeStatus> {
    nodes
        .iter()
        .map(|node| {
            let status = if provider_id(node).is_some() {
                NodeStatus::Ready
            } else {
                NodeStatus::Pending
            };
            (node_name(node).to_string(), status)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::testing::node;
    use crate::store::MemoryStore;

    fn taint_count(node: &Node) -> usize {
        node.spec
            .as_ref()
            .and_then(|s| s.taints.as_ref())
            .map_or(0, |t| {
                t.iter().filter(|t| t.key == UNINITIALIZED_TAINT_KEY).count()
            })
    }

    #[tokio::test]
    async fn test_taint_is_idempotent() {
        let store = MemoryStore::new();
        store.insert(node("node-1", None));
        store.insert(node("node-2", None));

        let mut nodes = store.list_nodes().await.unwrap();
        assert_eq!(reconcile_node_taint(&store, &mut nodes).await.unwrap(), 2);

        let mut nodes = store.list_nodes().await.unwrap();
        assert_eq!(reconcile_node_taint(&store, &mut nodes).await.unwrap(), 0);

        for node in store.list_nodes().await.unwrap() {
            assert_eq!(taint_count(&node), 1);
            let taint = &node.spec.as_ref().unwrap().taints.as_ref().unwrap()[0];
            assert_eq!(taint.effect, "NoSchedule");
            assert_eq!(taint.value.as_deref(), Some("true"));
        }
        assert_eq!(store.writes("Node"), 2);
    }

    #[tokio::test]
    async fn test_initialized_nodes_are_not_tainted() {
        let store = MemoryStore::new();
        store.insert(node("node-1", Some("vsphere://4201")));

        let mut nodes = store.list_nodes().await.unwrap();
        assert_eq!(reconcile_node_taint(&store, &mut nodes).await.unwrap(), 0);
        assert_eq!(taint_count(&nodes[0]), 0);
    }

    #[tokio::test]
    async fn test_label_then_taint_keeps_versions_current() {
        let store = MemoryStore::new();
        store.insert(node("node-1", None));

        let mut nodes = store.list_nodes().await.unwrap();
        reconcile_node_taint(&store, &mut nodes).await.unwrap();
        reconcile_node_label(&store, &mut nodes, "vdo-config")
            .await
            .unwrap();

        let stored = &store.list_nodes().await.unwrap()[0];
        assert_eq!(taint_count(stored), 1);
        assert_eq!(
            stored.metadata.labels.as_ref().unwrap()[VDO_CONFIG_LABEL],
            "vdo-config"
        );
        assert_eq!(
            reconcile_node_label(&store, &mut nodes, "other").await.unwrap(),
            0
        );
    }

    #[test]
    fn test_node_statuses() {
        let statuses = node_statuses(&[
            node("node-1", Some("vsphere://4201")),
            node("node-2", Some("")),
            node("node-3", None),
        ]);
        assert_eq!(statuses["node-1"], NodeStatus::Ready);
        assert_eq!(statuses["node-2"], NodeStatus::Pending);
        assert_eq!(statuses["node-3"], NodeStatus::Pending);
    }
}
