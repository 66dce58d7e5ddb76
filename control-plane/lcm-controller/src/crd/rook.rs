//! Subsets of the Rook `ceph.rook.io/v1` kinds read by the controller.

use std::collections::BTreeMap;

use k8s_openapi::api::core::v1::Toleration;
use kube::CustomResource;
use serde::{Deserialize, Serialize};

/// Placement role key for OSD daemons.
pub const OSD_PLACEMENT: &str = "osd";

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephCluster",
    plural = "cephclusters",
    namespaced,
    status = "CephClusterStatus",
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct CephClusterSpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub external: Option<ExternalSpec>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub placement: BTreeMap<String, Placement>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct ExternalSpec {
    #[serde(default)]
    pub enable: bool,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct Placement {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tolerations: Option<Vec<Toleration>>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct CephClusterStatus {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ceph_version: Option<CephVersion>,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct CephVersion {
    #[serde(default)]
    pub image: String,
    #[serde(default)]
    pub version: String,
}

impl CephCluster {
    pub fn is_external(&self) -> bool {
        self.spec.external.as_ref().is_some_and(|e| e.enable)
    }

    /// Image of the running ceph daemons as reported by Rook, if known.
    pub fn ceph_image(&self) -> Option<&str> {
        self.status
            .as_ref()
            .and_then(|s| s.ceph_version.as_ref())
            .map(|v| v.image.as_str())
            .filter(|i| !i.is_empty())
    }

    pub fn osd_tolerations(&self) -> Option<&[Toleration]> {
        self.spec
            .placement
            .get(OSD_PLACEMENT)
            .and_then(|p| p.tolerations.as_deref())
    }
}

#[derive(CustomResource, Deserialize, Serialize, Clone, Debug, Default)]
#[kube(
    group = "ceph.rook.io",
    version = "v1",
    kind = "CephObjectStore",
    plural = "cephobjectstores",
    namespaced,
    schema = "disabled"
)]
#[serde(rename_all = "camelCase")]
pub struct CephObjectStoreSpec {
    #[serde(default)]
    pub gateway: GatewaySpec,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct GatewaySpec {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_bundle_ref: Option<String>,
}

impl CephObjectStore {
    pub fn ca_bundle_ref(&self) -> Option<&str> {
        self.spec
            .gateway
            .ca_bundle_ref
            .as_deref()
            .filter(|s| !s.is_empty())
    }
}
