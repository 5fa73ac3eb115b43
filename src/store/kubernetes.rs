//! Kubernetes-backed cluster store
//!
//! Typed objects go through `Api<K>`; manifest objects go through
//! `Api<DynamicObject>` after resolving their kind with API discovery.

use crate::crd::{VDOConfig, VsphereCloudConfig};
use crate::domain::ports::{ApplyAction, ClusterStore, ResourceApplier};
use crate::error::{Error, Result};
use crate::manifest::GenericResource;
use async_trait::async_trait;
use k8s_openapi::api::apps::v1::DaemonSet;
use k8s_openapi::api::core::v1::{ConfigMap, Namespace, Node, Pod, Secret};
use k8s_openapi::api::storage::v1::{CSIDriver, CSINode};
use kube::api::{
    Api, DeleteParams, DynamicObject, GroupVersionKind, ListParams, Patch, PatchParams,
    PostParams,
};
use kube::discovery::{pinned_kind, Scope};
use kube::{Client, Resource, ResourceExt};
use serde::Serialize;
use std::fmt::Debug;
use tracing::debug;

/// Field manager used for server-side apply
pub const FIELD_MANAGER: &str = "vdo-operator";

/// Cluster store talking to the API server
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn create<K>(&self, api: Api<K>, object: &K) -> Result<K>
    where
        K: Resource + Clone + Debug + Serialize + serde::de::DeserializeOwned,
        K::DynamicType: Default,
    {
        let name = object.name_any();
        api.create(&PostParams::default(), object)
            .await
            .map_err(|e| classify::<K>(e, &name, Error::ResourceExists {
                kind: K::kind(&Default::default()).to_string(),
                name: name.clone(),
            }))
    }

    async fn replace<K>(&self, api: Api<K>, object: &K) -> Result<K>
    where
        K: Resource + Clone + Debug + Serialize + serde::de::DeserializeOwned,
        K::DynamicType: Default,
    {
        let name = object.name_any();
        api.replace(&name, &PostParams::default(), object)
            .await
            .map_err(|e| classify::<K>(e, &name, Error::Conflict {
                kind: K::kind(&Default::default()).to_string(),
                name: name.clone(),
            }))
    }

    async fn replace_status<K>(&self, api: Api<K>, object: &K) -> Result<K>
    where
        K: Resource + Clone + Debug + Serialize + serde::de::DeserializeOwned,
        K::DynamicType: Default,
    {
        let name = object.name_any();
        let body = serde_json::to_vec(object)?;
        api.replace_status(&name, &PostParams::default(), body)
            .await
            .map_err(|e| classify::<K>(e, &name, Error::Conflict {
                kind: K::kind(&Default::default()).to_string(),
                name: name.clone(),
            }))
    }

    async fn dynamic_api(&self, resource: &GenericResource) -> Result<Api<DynamicObject>> {
        let (group, version) = resource.group_version();
        let gvk = GroupVersionKind::gvk(group, version, &resource.kind);
        let (ar, caps) = pinned_kind(&self.client, &gvk).await?;

        Ok(match caps.scope {
            Scope::Cluster => Api::all_with(self.client.clone(), &ar),
            Scope::Namespaced => {
                let namespace = resource.namespace.as_deref().unwrap_or("default");
                Api::namespaced_with(self.client.clone(), namespace, &ar)
            }
        })
    }
}

/// Map 409/404 API errors onto store errors
fn classify<K>(e: kube::Error, name: &str, on_conflict: Error) -> Error
where
    K: Resource,
    K::DynamicType: Default,
{
    match e {
        kube::Error::Api(ref ae) if ae.code == 409 => {
            if ae.reason == "AlreadyExists" {
                Error::ResourceExists {
                    kind: K::kind(&Default::default()).to_string(),
                    name: name.to_string(),
                }
            } else {
                on_conflict
            }
        }
        kube::Error::Api(ref ae) if ae.code == 404 => Error::ResourceNotFound {
            kind: K::kind(&Default::default()).to_string(),
            name: name.to_string(),
        },
        other => Error::Kube(other),
    }
}

/// Strip the leading `v` and any build suffix: `v1.29.2+k3s1` becomes `1.29.2`
fn normalize_version(git_version: &str) -> String {
    git_version
        .trim_start_matches('v')
        .split(['+', '-'])
        .next()
        .unwrap_or_default()
        .to_string()
}

#[async_trait]
impl ResourceApplier for KubeStore {
    async fn apply(&self, resource: &GenericResource, action: ApplyAction) -> Result<()> {
        let api = self.dynamic_api(resource).await?;
        let object: DynamicObject = serde_json::from_value(resource.to_value())?;

        let result = match action {
            ApplyAction::Create => api
                .create(&PostParams::default(), &object)
                .await
                .map(|_| ()),
            ApplyAction::Update => api
                .patch(
                    &resource.name,
                    &PatchParams::apply(FIELD_MANAGER).force(),
                    &Patch::Apply(&object),
                )
                .await
                .map(|_| ()),
            ApplyAction::Delete => match api.delete(&resource.name, &DeleteParams::default()).await
            {
                Ok(_) => Ok(()),
                Err(kube::Error::Api(ae)) if ae.code == 404 => {
                    debug!("{} already gone", resource);
                    Ok(())
                }
                Err(e) => Err(e),
            },
        };

        result.map_err(|e| match e {
            kube::Error::Api(ref ae) if ae.code == 409 && ae.reason == "AlreadyExists" => {
                Error::ResourceExists {
                    kind: resource.kind.clone(),
                    name: resource.name.clone(),
                }
            }
            kube::Error::Api(ref ae) if ae.code == 409 => Error::Conflict {
                kind: resource.kind.clone(),
                name: resource.name.clone(),
            },
            other => Error::Kube(other),
        })
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn get_vsphere_cloud_config(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<VsphereCloudConfig>> {
        let api: Api<VsphereCloudConfig> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn replace_vsphere_cloud_config_status(
        &self,
        config: &VsphereCloudConfig,
    ) -> Result<VsphereCloudConfig> {
        let namespace = config.namespace().unwrap_or_default();
        let api: Api<VsphereCloudConfig> = Api::namespaced(self.client.clone(), &namespace);
        self.replace_status(api, config).await
    }

    async fn list_vdo_configs(&self, namespace: &str) -> Result<Vec<VDOConfig>> {
        let api: Api<VDOConfig> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn replace_vdo_config_status(&self, config: &VDOConfig) -> Result<VDOConfig> {
        let namespace = config.namespace().unwrap_or_default();
        let api: Api<VDOConfig> = Api::namespaced(self.client.clone(), &namespace);
        self.replace_status(api, config).await
    }

    async fn get_secret(&self, namespace: &str, name: &str) -> Result<Option<Secret>> {
        let api: Api<Secret> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_secret(&self, secret: &Secret) -> Result<Secret> {
        let api: Api<Secret> =
            Api::namespaced(self.client.clone(), &secret.namespace().unwrap_or_default());
        self.create(api, secret).await
    }

    async fn replace_secret(&self, secret: &Secret) -> Result<Secret> {
        let api: Api<Secret> =
            Api::namespaced(self.client.clone(), &secret.namespace().unwrap_or_default());
        self.replace(api, secret).await
    }

    async fn get_config_map(&self, namespace: &str, name: &str) -> Result<Option<ConfigMap>> {
        let api: Api<ConfigMap> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn create_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let api: Api<ConfigMap> =
            Api::namespaced(self.client.clone(), &config_map.namespace().unwrap_or_default());
        self.create(api, config_map).await
    }

    async fn replace_config_map(&self, config_map: &ConfigMap) -> Result<ConfigMap> {
        let api: Api<ConfigMap> =
            Api::namespaced(self.client.clone(), &config_map.namespace().unwrap_or_default());
        self.replace(api, config_map).await
    }

    async fn create_namespace(&self, namespace: &Namespace) -> Result<()> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        self.create(api, namespace).await.map(|_| ())
    }

    async fn list_nodes(&self) -> Result<Vec<Node>> {
        let api: Api<Node> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn replace_node(&self, node: &Node) -> Result<Node> {
        let api: Api<Node> = Api::all(self.client.clone());
        self.replace(api, node).await
    }

    async fn get_daemon_set(&self, namespace: &str, name: &str) -> Result<Option<DaemonSet>> {
        let api: Api<DaemonSet> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.get_opt(name).await?)
    }

    async fn list_pods(&self, namespace: &str, label_selector: &str) -> Result<Vec<Pod>> {
        let api: Api<Pod> = Api::namespaced(self.client.clone(), namespace);
        Ok(api.list(&ListParams::default().labels(label_selector)).await?.items)
    }

    async fn list_csi_nodes(&self) -> Result<Vec<CSINode>> {
        let api: Api<CSINode> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn list_csi_drivers(&self) -> Result<Vec<CSIDriver>> {
        let api: Api<CSIDriver> = Api::all(self.client.clone());
        Ok(api.list(&ListParams::default()).await?.items)
    }

    async fn server_version(&self) -> Result<String> {
        let info = self.client.apiserver_version().await?;
        Ok(normalize_version(&info.git_version))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use kube::core::ErrorResponse;

    fn api_error(code: u16, reason: &str) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: "test".into(),
            reason: reason.into(),
            code,
        })
    }

    fn conflict() -> Error {
        Error::Conflict {
            kind: "Secret".into(),
            name: "s".into(),
        }
    }

    #[test]
    fn test_classify_api_errors() {
        assert_matches!(
            classify::<Secret>(api_error(409, "AlreadyExists"), "s", conflict()),
            Error::ResourceExists { kind, .. } if kind == "Secret"
        );
        assert_matches!(
            classify::<Secret>(api_error(409, "Conflict"), "s", conflict()),
            Error::Conflict { .. }
        );
        assert_matches!(
            classify::<Secret>(api_error(404, "NotFound"), "s", conflict()),
            Error::ResourceNotFound { .. }
        );
        assert_matches!(
            classify::<Secret>(api_error(500, "InternalError"), "s", conflict()),
            Error::Kube(_)
        );
    }

    #[test]
    fn test_normalize_version() {
        assert_eq!(normalize_version("v1.29.2"), "1.29.2");
        assert_eq!(normalize_version("v1.27.4+k3s1"), "1.27.4");
        assert_eq!(normalize_version("v1.28.3-eks-4f4795d"), "1.28.3");
    }
}
