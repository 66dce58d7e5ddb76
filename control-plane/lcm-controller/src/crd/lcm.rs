//! Read-only views of the `lcm.mirantis.com` objects this controller
//! consumes. Only the fields it acts on are modelled; unknown fields are
//! ignored on deserialization.

use std::borrow::Cow;

use kube::core::{NamespaceResourceScope, ObjectMeta};
use kube::{CustomResource, Resource};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

pub const GROUP: &str = "lcm.mirantis.com";
pub const VERSION: &str = "v1alpha1";

/// Implements [`Resource`] for lcm kinds that carry only metadata and
/// status. `CustomResource` requires a spec, which these kinds do not have.
macro_rules! status_only_resource {
    ($kind:ident, $plural:literal) => {
        impl Resource for $kind {
            type DynamicType = ();
            type Scope = NamespaceResourceScope;

            fn kind(_: &()) -> Cow<'_, str> {
                stringify!($kind).into()
            }
            fn group(_: &()) -> Cow<'_, str> {
                GROUP.into()
            }
            fn version(_: &()) -> Cow<'_, str> {
                VERSION.into()
            }
            fn plural(_: &()) -> Cow<'_, str> {
                $plural.into()
            }
            fn meta(&self) -> &ObjectMeta {
                &self.metadata
            }
            fn meta_mut(&mut self) -> &mut ObjectMeta {
                &mut self.metadata
            }
        }
    };
}

/// Per-namespace health object. Its lifecycle drives the infra controller.
#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct CephDeploymentHealth {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<serde_json::Value>,
}

status_only_resource!(CephDeploymentHealth, "cephdeploymenthealths");

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct CephDeploymentMaintenance {
    #[serde(default)]
    pub metadata: ObjectMeta,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub status: Option<MaintenanceStatus>,
}

status_only_resource!(CephDeploymentMaintenance, "cephdeploymentmaintenances");

#[derive(Deserialize, Serialize, Clone, Debug, Default, PartialEq, Eq)]
pub enum MaintenanceState {
    #[default]
    Idle,
    Acting,
    Failing,
    #[serde(other)]
    Unknown,
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct MaintenanceStatus {
    #[serde(default)]
    pub state: MaintenanceState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl CephDeploymentMaintenance {
    /// A maintenance window that is acting, or failed mid-way, pauses
    /// automated cluster mutation.
    pub fn is_acting(&self) -> bool {
        matches!(
            self.status.as_ref().map(|s| &s.state),
            Some(MaintenanceState::Acting | MaintenanceState::Failing)
        )
    }
}

#[derive(
    CustomResource, Deserialize, Serialize, Clone, Debug, Default, JsonSchema,
)]
#[kube(
    group = "lcm.mirantis.com",
    version = "v1alpha1",
    kind = "CephOsdRemoveTask",
    plural = "cephosdremovetasks",
    namespaced,
    status = "CephOsdRemoveTaskStatus"
)]
#[serde(rename_all = "camelCase")]
pub struct CephOsdRemoveTaskSpec {
    /// Emergency brake: removal proceeds only after manual approval.
    #[serde(default)]
    pub approve: bool,
    /// A failed task marked resolved stays as history and stops blocking.
    #[serde(default)]
    pub resolved: bool,
}

#[derive(
    Deserialize, Serialize, Clone, Copy, Debug, PartialEq, Eq, JsonSchema,
)]
pub enum TaskPhase {
    Pending,
    Validating,
    ValidationFailed,
    Aborted,
    ApproveWaiting,
    WaitingOperator,
    Processing,
    Completed,
    CompletedWithWarnings,
    Failed,
    #[serde(other)]
    Unknown,
}

impl std::fmt::Display for TaskPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        std::fmt::Debug::fmt(self, f)
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct CephOsdRemoveTaskStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub phase: Option<TaskPhase>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}
