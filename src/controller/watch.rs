//! Watch mappers
//!
//! Node and ConfigMap events are turned into VDOConfig reconcile requests
//! here; the controller runtime wires them up in `run_controllers`.

use crate::controller::nodes::{provider_id, VDO_CONFIG_LABEL};
use crate::crd::VDOConfig;
use k8s_openapi::api::core::v1::{ConfigMap, Node};
use kube::runtime::reflector::ObjectRef;
use kube::ResourceExt;
use std::sync::Arc;

/// Request for the VDOConfig labelled on an initialized node.
///
/// Nodes without a provider ID are still waiting for the cloud controller
/// manager and produce nothing, as do unlabelled nodes.
pub fn map_node_to_vdo_config(node: &Node, namespace: &str) -> Option<ObjectRef<VDOConfig>> {
    provider_id(node)?;
    let name = node.labels().get(VDO_CONFIG_LABEL)?;
    if name.is_empty() {
        return None;
    }
    Some(ObjectRef::new(name).within(namespace))
}

/// Requests for every VDOConfig when the matrix ConfigMap changes
pub fn requests_for_matrix_change(
    config_map: &ConfigMap,
    vdo_configs: &[Arc<VDOConfig>],
    matrix_config_map: &str,
    namespace: &str,
) -> Vec<ObjectRef<VDOConfig>> {
    if config_map.name_any() != matrix_config_map
        || config_map.namespace().as_deref() != Some(namespace)
    {
        return Vec::new();
    }
    vdo_configs
        .iter()
        .map(|vdo| ObjectRef::from_obj(vdo.as_ref()))
        .collect()
}
