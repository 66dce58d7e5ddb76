use kube::runtime::controller::Action;
use tracing::{error, info, instrument, warn};

use super::context::InfraReconcileContext;
use super::disk_daemon::ensure_disk_daemon;
use super::operator_scale::enforce_operator_replicas;
use super::toolbox::ensure_toolbox;
use super::{ControllerContext, ReconcileErr};
use crate::cluster::ClusterApi;
use crate::crd::{CephCluster, CephDeploymentHealth};

/// One infra pass for the health object `namespace/name`.
///
/// Inputs are resolved first; any missing one ends the pass with a requeue
/// before anything is written. The toolbox, disk daemon and operator scale
/// steps then run independently: a failure in one is logged and the rest
/// still run. Every pass ends with the periodic requeue.
#[instrument(skip(ctx))]
pub async fn reconcile_infra<C: ClusterApi>(
    ctx: &ControllerContext<C>,
    namespace: &str,
    name: &str,
) -> Result<Action, ReconcileErr> {
    let requeue = Action::requeue(ctx.requeue);
    let lcm = ctx.configs.load_or_default(namespace).await;
    let cluster = &ctx.cluster;

    let health: CephDeploymentHealth = match cluster
        .get_opt(namespace, name)
        .await
    {
        Ok(Some(health)) => health,
        Ok(None) => {
            info!("CephDeploymentHealth '{namespace}/{name}' not found, skipping");
            return Ok(requeue);
        }
        Err(e) => {
            return Err(ReconcileErr::api(
                format!("failed to get CephDeploymentHealth '{namespace}/{name}'"),
                e,
            ));
        }
    };

    let Some(controller_image) = ctx
        .controller_image
        .as_deref()
        .map(str::trim)
        .filter(|i| !i.is_empty())
    else {
        error!("controller image is not set, infra objects are not managed");
        return Ok(requeue);
    };

    let rook_ns = &lcm.rook_namespace;
    let ceph_cluster: CephCluster = match cluster.get_opt(rook_ns, name).await
    {
        Ok(Some(c)) => c,
        Ok(None) => {
            warn!("CephCluster '{rook_ns}/{name}' not found, skipping");
            return Ok(requeue);
        }
        Err(e) => {
            error!(error = %e, "failed to get CephCluster '{rook_ns}/{name}'");
            return Ok(requeue);
        }
    };

    let infra =
        InfraReconcileContext::build(&health, &ceph_cluster, controller_image)?;

    if let Err(e) = ensure_toolbox(cluster, &infra, &lcm).await {
        error!(error = %e, "failed to ensure toolbox");
    }
    if let Err(e) = ensure_disk_daemon(cluster, &infra, &lcm).await {
        error!(error = %e, "failed to ensure disk daemon");
    }
    if let Err(e) = enforce_operator_replicas(cluster, &infra, &lcm).await {
        error!(error = %e, "failed to enforce rook operator replicas");
    }

    Ok(requeue)
}
