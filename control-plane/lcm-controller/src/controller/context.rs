use k8s_openapi::api::core::v1::Toleration;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::{Resource, ResourceExt};

use super::ReconcileErr;
use crate::crd::{CephCluster, CephDeploymentHealth};

/// Owner reference pointing at `obj`. Neither `controller` nor
/// `blockOwnerDeletion` is set: generated children have two owners and
/// neither of them exclusively controls them.
pub fn owner_refs<K>(obj: &K) -> Result<Vec<OwnerReference>, ReconcileErr>
where
    K: Resource<DynamicType = ()>,
{
    let uid = obj.uid().ok_or_else(|| {
        ReconcileErr::MissingInput(format!(
            "{} '{}' has no uid",
            K::kind(&()),
            obj.name_any()
        ))
    })?;
    Ok(vec![OwnerReference {
        api_version: K::api_version(&()).to_string(),
        kind: K::kind(&()).to_string(),
        name: obj.name_any(),
        uid,
        ..Default::default()
    }])
}

/// Everything one reconcile pass needs, resolved up front and never
/// mutated afterwards.
#[derive(Clone, Debug)]
pub struct InfraReconcileContext {
    pub name: String,
    pub namespace: String,
    /// Owners of objects generated in the health namespace.
    pub health_owner_refs: Vec<OwnerReference>,
    /// Owners of objects generated in the rook namespace.
    pub cluster_owner_refs: Vec<OwnerReference>,
    pub external: bool,
    pub controller_image: String,
    pub ceph_image: Option<String>,
    pub osd_tolerations: Option<Vec<Toleration>>,
}

impl InfraReconcileContext {
    pub fn build(
        health: &CephDeploymentHealth,
        cluster: &CephCluster,
        controller_image: &str,
    ) -> Result<Self, ReconcileErr> {
        let external = cluster.is_external();
        Ok(Self {
            name: health.name_any(),
            namespace: health.namespace().unwrap_or_default(),
            health_owner_refs: owner_refs(health)?,
            cluster_owner_refs: owner_refs(cluster)?,
            external,
            controller_image: controller_image.to_string(),
            ceph_image: cluster.ceph_image().map(str::to_string),
            // an empty list is omitted by the API server on the live object
            osd_tolerations: if external {
                None
            } else {
                cluster
                    .osd_tolerations()
                    .filter(|t| !t.is_empty())
                    .map(<[Toleration]>::to_vec)
            },
        })
    }
}
