pub mod context;
pub mod converge;
pub mod disk_daemon;
pub mod operator_scale;
pub mod reconcile;
pub mod toolbox;
pub mod trigger;

#[cfg(test)]
mod operator_scale_tests;

use std::sync::Arc;
use std::time::Duration;

use futures_util::{StreamExt, stream};
use kube::runtime::controller::{self, Action};
use kube::runtime::{Controller, WatchStreamExt, reflector, watcher};
use kube::{Api, Client, ResourceExt};
use tracing::{debug, error, info, warn};

use crate::cluster::{ClusterApi, KubeCluster};
use crate::crd::CephDeploymentHealth;
use crate::lcmconfig::ConfigCache;

pub use reconcile::reconcile_infra;
pub use trigger::LifecycleFilter;

#[derive(thiserror::Error, Debug)]
pub enum ReconcileErr {
    #[error("{context}: {source}")]
    Api {
        context: String,
        #[source]
        source: kube::Error,
    },
    #[error("missing input: {0}")]
    MissingInput(String),
    #[error("internal error: {0}")]
    Internal(String),
}

impl ReconcileErr {
    pub fn api(context: impl Into<String>, source: kube::Error) -> Self {
        ReconcileErr::Api {
            context: context.into(),
            source,
        }
    }
}

pub struct ControllerContext<C> {
    pub cluster: C,
    pub configs: ConfigCache,
    /// Image carrying the disk daemon binary. `None` until configured.
    pub controller_image: Option<String>,
    pub requeue: Duration,
}

impl<C: ClusterApi> ControllerContext<C> {
    pub fn new(
        cluster: C,
        configs: ConfigCache,
        controller_image: Option<String>,
        requeue: Duration,
    ) -> Self {
        Self {
            cluster,
            configs,
            controller_image,
            requeue,
        }
    }
}

/// Watches `CephDeploymentHealth` objects and runs the infra reconcile on
/// their creation and deletion until a termination signal arrives.
pub async fn run_infra_controller(
    client: Client,
    ctx: Arc<ControllerContext<KubeCluster>>,
    namespace: Option<String>,
) -> anyhow::Result<()> {
    let api: Api<CephDeploymentHealth> = match namespace.as_deref() {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };

    let (reader, writer) = reflector::store();
    let mut filter = LifecycleFilter::default();
    let events = reflector(
        writer,
        watcher(api, watcher::Config::default()).default_backoff(),
    );
    let triggers = events.flat_map(move |res| {
        let admitted: Vec<_> = match res {
            Ok(event) => filter.admit(event).into_iter().map(Ok).collect(),
            Err(e) => vec![Err(e)],
        };
        stream::iter(admitted)
    });

    info!(namespace = ?namespace, "starting lcm infra controller");
    Controller::for_stream(triggers, reader)
        .shutdown_on_signal()
        .run(reconcile, error_policy, ctx)
        .for_each(|res| async move {
            match res {
                Ok((obj_ref, action)) => {
                    debug!(object = %obj_ref, "reconciled: requeue={:?}", action)
                }
                // deleted objects are no longer in the store
                Err(controller::Error::ObjectNotFound(obj_ref)) => {
                    debug!(object = %obj_ref, "object is gone, nothing to reconcile")
                }
                Err(e) => error!(error = ?e, "reconcile error"),
            }
        })
        .await;

    info!("lcm infra controller stopped");
    Ok(())
}

async fn reconcile(
    obj: Arc<CephDeploymentHealth>,
    ctx: Arc<ControllerContext<KubeCluster>>,
) -> Result<Action, ReconcileErr> {
    let ns = obj.namespace().ok_or_else(|| {
        ReconcileErr::Internal(format!(
            "CephDeploymentHealth '{}' has no namespace",
            obj.name_any()
        ))
    })?;
    reconcile_infra(&*ctx, &ns, &obj.name_any()).await
}

fn error_policy(
    obj: Arc<CephDeploymentHealth>,
    err: &ReconcileErr,
    ctx: Arc<ControllerContext<KubeCluster>>,
) -> Action {
    warn!(
        name = %obj.name_any(),
        ns = ?obj.namespace(),
        error = %err,
        "infra reconcile failed, retrying"
    );
    Action::requeue(ctx.requeue)
}
