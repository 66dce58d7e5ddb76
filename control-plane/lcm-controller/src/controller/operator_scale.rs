//! Arbitration of the Rook operator replica count.
//!
//! The Rook operator and the OSD removal task executor act on the same
//! daemons. While a removal is in flight, failed without resolution, or a
//! maintenance window is active, the operator is scaled to zero so it
//! cannot recreate what is being taken down.

use std::fmt;

use k8s_openapi::api::apps::v1::Deployment;
use kube::ResourceExt;
use tracing::{debug, info, instrument};

use super::ReconcileErr;
use super::context::InfraReconcileContext;
use super::toolbox::ROOK_OPERATOR_NAME;
use crate::cluster::ClusterApi;
use crate::crd::{CephDeploymentMaintenance, CephOsdRemoveTask, TaskPhase};
use crate::lcmconfig::LcmConfig;

/// What the arbiter needs to know about one removal task.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct OsdRemovalTaskView {
    pub name: String,
    pub phase: TaskPhase,
    pub approve: bool,
    pub resolved: bool,
}

impl OsdRemovalTaskView {
    /// `None` for tasks that have not been picked up yet (no phase).
    pub fn from_task(task: &CephOsdRemoveTask) -> Option<Self> {
        let phase = task.status.as_ref()?.phase?;
        Some(Self {
            name: task.name_any(),
            phase,
            approve: task.spec.approve,
            resolved: task.spec.resolved,
        })
    }

    fn in_flight(&self) -> bool {
        matches!(self.phase, TaskPhase::WaitingOperator | TaskPhase::Processing)
    }

    fn unresolved_failure(&self) -> bool {
        self.phase == TaskPhase::Failed && !self.resolved
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ScaleSignals {
    pub maintenance_acting: bool,
    pub external_cluster: bool,
    pub tasks: Vec<OsdRemovalTaskView>,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ScaleReason {
    MaintenanceActing,
    ExternalCluster,
    TaskInFlight { task: String, phase: TaskPhase },
    UnresolvedFailure { task: String },
    NoBlockers,
}

impl ScaleReason {
    pub fn replicas(&self) -> i32 {
        match self {
            ScaleReason::MaintenanceActing
            | ScaleReason::TaskInFlight { .. }
            | ScaleReason::UnresolvedFailure { .. } => 0,
            ScaleReason::ExternalCluster | ScaleReason::NoBlockers => 1,
        }
    }
}

impl fmt::Display for ScaleReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScaleReason::MaintenanceActing => f.write_str("set maintenance mode"),
            ScaleReason::ExternalCluster => {
                f.write_str("external cluster, rook operator is not paused")
            }
            ScaleReason::TaskInFlight { task, phase } => write!(
                f,
                "found CephOsdRemoveTask '{task}' in phase '{phase}'"
            ),
            ScaleReason::UnresolvedFailure { task } => write!(
                f,
                "found failed CephOsdRemoveTask '{task}' which is not resolved"
            ),
            ScaleReason::NoBlockers => f.write_str(
                "no reason to have rook operator stopped",
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ScaleDecision {
    pub replicas: i32,
    pub reason: ScaleReason,
}

enum TaskSignal<'a> {
    InFlight(&'a OsdRemovalTaskView),
    UnresolvedFailure(&'a OsdRemovalTaskView),
    Clear,
}

fn task_signal(tasks: &[OsdRemovalTaskView]) -> TaskSignal<'_> {
    if let Some(t) = tasks.iter().find(|t| t.in_flight()) {
        return TaskSignal::InFlight(t);
    }
    if let Some(t) = tasks.iter().find(|t| t.unresolved_failure()) {
        return TaskSignal::UnresolvedFailure(t);
    }
    TaskSignal::Clear
}

/// Target replica count for the Rook operator. Rows are checked top to
/// bottom, the first match wins.
pub fn decide(signals: &ScaleSignals) -> ScaleDecision {
    let reason = match (
        signals.maintenance_acting,
        signals.external_cluster,
        task_signal(&signals.tasks),
    ) {
        (true, _, _) => ScaleReason::MaintenanceActing,
        (false, true, _) => ScaleReason::ExternalCluster,
        (false, false, TaskSignal::InFlight(t)) => ScaleReason::TaskInFlight {
            task: t.name.clone(),
            phase: t.phase,
        },
        (false, false, TaskSignal::UnresolvedFailure(t)) => {
            ScaleReason::UnresolvedFailure {
                task: t.name.clone(),
            }
        }
        (false, false, TaskSignal::Clear) => ScaleReason::NoBlockers,
    };
    ScaleDecision {
        replicas: reason.replicas(),
        reason,
    }
}

/// Reads the arbiter's inputs fresh from the cluster.
async fn gather_signals<C: ClusterApi>(
    cluster: &C,
    ctx: &InfraReconcileContext,
) -> Result<ScaleSignals, ReconcileErr> {
    let ns = &ctx.namespace;
    let maintenance: Option<CephDeploymentMaintenance> = cluster
        .get_opt(ns, &ctx.name)
        .await
        .map_err(|e| {
            ReconcileErr::api(
                format!(
                    "failed to get CephDeploymentMaintenance '{ns}/{}'",
                    ctx.name
                ),
                e,
            )
        })?;
    let maintenance_acting =
        maintenance.as_ref().is_some_and(|m| m.is_acting());

    // only the maintenance flag matters for external clusters
    let tasks = if ctx.external || maintenance_acting {
        Vec::new()
    } else {
        let list: Vec<CephOsdRemoveTask> =
            cluster.list(ns).await.map_err(|e| {
                ReconcileErr::api(
                    format!("failed to list CephOsdRemoveTasks in '{ns}'"),
                    e,
                )
            })?;
        list.iter().filter_map(OsdRemovalTaskView::from_task).collect()
    };

    Ok(ScaleSignals {
        maintenance_acting,
        external_cluster: ctx.external,
        tasks,
    })
}

/// Applies the arbiter's decision to the Rook operator Deployment. Returns
/// the decision when a scale write was issued.
#[instrument(skip_all, fields(ns = %lcm.rook_namespace, name = ROOK_OPERATOR_NAME))]
pub async fn enforce_operator_replicas<C: ClusterApi>(
    cluster: &C,
    ctx: &InfraReconcileContext,
    lcm: &LcmConfig,
) -> Result<Option<ScaleDecision>, ReconcileErr> {
    let rook_ns = &lcm.rook_namespace;
    let operator: Deployment = cluster
        .get_opt(rook_ns, ROOK_OPERATOR_NAME)
        .await
        .map_err(|e| {
            ReconcileErr::api(
                format!(
                    "failed to check replicas for rook operator '{rook_ns}/{ROOK_OPERATOR_NAME}'"
                ),
                e,
            )
        })?
        .ok_or_else(|| {
            ReconcileErr::MissingInput(format!(
                "rook operator '{rook_ns}/{ROOK_OPERATOR_NAME}' not found"
            ))
        })?;
    let current = operator.spec.as_ref().and_then(|s| s.replicas).unwrap_or(1);

    let signals = gather_signals(cluster, ctx).await?;
    let decision = decide(&signals);
    if decision.replicas == current {
        debug!(replicas = current, reason = %decision.reason, "rook operator replicas in place");
        return Ok(None);
    }

    info!(
        "scaling rook operator to {} replicas, since {}",
        decision.replicas, decision.reason
    );
    cluster
        .scale_deployment(rook_ns, ROOK_OPERATOR_NAME, decision.replicas)
        .await
        .map_err(|e| {
            ReconcileErr::api(
                format!(
                    "failed to scale rook operator '{rook_ns}/{ROOK_OPERATOR_NAME}'"
                ),
                e,
            )
        })?;
    Ok(Some(decision))
}
