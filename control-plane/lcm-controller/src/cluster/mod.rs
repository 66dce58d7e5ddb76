//! Cluster access used by the reconcilers. The kube-backed implementation
//! lives here; tests provide an in-memory one.

use std::fmt::Debug;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::api::{ListParams, Patch, PatchParams, PostParams};
use kube::core::NamespaceResourceScope;
use kube::{Api, Client, Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::json;

/// Namespaced object kinds the reconcilers read or write.
pub trait ClusterObject:
    Resource<DynamicType = (), Scope = NamespaceResourceScope>
    + Clone
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
}

impl<K> ClusterObject for K where
    K: Resource<DynamicType = (), Scope = NamespaceResourceScope>
        + Clone
        + Debug
        + Serialize
        + DeserializeOwned
        + Send
        + Sync
        + 'static
{
}

#[async_trait]
pub trait ClusterApi: Send + Sync + 'static {
    /// `Ok(None)` when the object does not exist.
    async fn get_opt<K: ClusterObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, kube::Error>;

    async fn list<K: ClusterObject>(
        &self,
        namespace: &str,
    ) -> Result<Vec<K>, kube::Error>;

    async fn create<K: ClusterObject>(
        &self,
        namespace: &str,
        obj: &K,
    ) -> Result<K, kube::Error>;

    async fn replace<K: ClusterObject>(
        &self,
        namespace: &str,
        obj: &K,
    ) -> Result<K, kube::Error>;

    /// Writes the scale subresource of a Deployment.
    async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), kube::Error>;
}

#[derive(Clone)]
pub struct KubeCluster {
    client: Client,
}

impl KubeCluster {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    fn api<K: ClusterObject>(&self, namespace: &str) -> Api<K> {
        Api::namespaced(self.client.clone(), namespace)
    }
}

#[async_trait]
impl ClusterApi for KubeCluster {
    async fn get_opt<K: ClusterObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, kube::Error> {
        self.api::<K>(namespace).get_opt(name).await
    }

    async fn list<K: ClusterObject>(
        &self,
        namespace: &str,
    ) -> Result<Vec<K>, kube::Error> {
        Ok(self
            .api::<K>(namespace)
            .list(&ListParams::default())
            .await?
            .items)
    }

    async fn create<K: ClusterObject>(
        &self,
        namespace: &str,
        obj: &K,
    ) -> Result<K, kube::Error> {
        self.api::<K>(namespace)
            .create(&PostParams::default(), obj)
            .await
    }

    async fn replace<K: ClusterObject>(
        &self,
        namespace: &str,
        obj: &K,
    ) -> Result<K, kube::Error> {
        self.api::<K>(namespace)
            .replace(&obj.name_any(), &PostParams::default(), obj)
            .await
    }

    async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), kube::Error> {
        let patch = json!({ "spec": { "replicas": replicas } });
        self.api::<Deployment>(namespace)
            .patch_scale(name, &PatchParams::default(), &Patch::Merge(&patch))
            .await?;
        Ok(())
    }
}
