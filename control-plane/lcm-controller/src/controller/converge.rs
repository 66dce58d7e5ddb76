use std::collections::BTreeMap;
use std::collections::btree_map::Entry;
use std::fmt::Debug;

use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetSpec, Deployment, DeploymentSpec,
};
use k8s_openapi::api::core::v1::PodTemplateSpec;
use kube::ResourceExt;
use kube::core::ObjectMeta;
use serde::Serialize;
use serde_json::Value;
use tracing::{debug, info, instrument, warn};

use super::ReconcileErr;
use crate::cluster::{ClusterApi, ClusterObject};

/// Rollout progress reported by a workload's status.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Readiness {
    Ready,
    Pending {
        desired: i32,
        ready: i32,
        updated: i32,
    },
}

/// A generated workload kind the convergence loop can manage.
pub trait Workload: ClusterObject {
    type Spec: PartialEq + Serialize + Clone + Debug + Send + Sync;

    fn spec(&self) -> Option<&Self::Spec>;
    fn spec_mut(&mut self) -> &mut Option<Self::Spec>;

    /// Copies fields the platform fills in on the live object into `self`,
    /// so they never show up as drift.
    fn carry_platform_fields(&mut self, live: &Self);

    fn readiness(&self) -> Readiness;
}

fn carry_scheduler(desired: &mut PodTemplateSpec, live: &PodTemplateSpec) {
    let live_scheduler =
        live.spec.as_ref().and_then(|s| s.scheduler_name.clone());
    if let (Some(spec), Some(name)) = (desired.spec.as_mut(), live_scheduler)
    {
        spec.scheduler_name = Some(name);
    }
}

impl Workload for Deployment {
    type Spec = DeploymentSpec;

    fn spec(&self) -> Option<&DeploymentSpec> {
        self.spec.as_ref()
    }

    fn spec_mut(&mut self) -> &mut Option<DeploymentSpec> {
        &mut self.spec
    }

    fn carry_platform_fields(&mut self, live: &Self) {
        if let (Some(want), Some(have)) = (self.spec.as_mut(), live.spec.as_ref())
        {
            carry_scheduler(&mut want.template, &have.template);
        }
    }

    fn readiness(&self) -> Readiness {
        let st = self.status.clone().unwrap_or_default();
        let desired = st.replicas.unwrap_or(0);
        let ready = st.ready_replicas.unwrap_or(0);
        let updated = st.updated_replicas.unwrap_or(0);
        let available = st.available_replicas.unwrap_or(0);
        if desired > 0
            && updated == desired
            && ready == desired
            && available == desired
        {
            Readiness::Ready
        } else {
            Readiness::Pending {
                desired,
                ready,
                updated,
            }
        }
    }
}

impl Workload for DaemonSet {
    type Spec = DaemonSetSpec;

    fn spec(&self) -> Option<&DaemonSetSpec> {
        self.spec.as_ref()
    }

    fn spec_mut(&mut self) -> &mut Option<DaemonSetSpec> {
        &mut self.spec
    }

    fn carry_platform_fields(&mut self, live: &Self) {
        if let (Some(want), Some(have)) = (self.spec.as_mut(), live.spec.as_ref())
        {
            carry_scheduler(&mut want.template, &have.template);
        }
    }

    fn readiness(&self) -> Readiness {
        let st = self.status.clone().unwrap_or_default();
        let desired = st.desired_number_scheduled;
        let ready = st.number_ready;
        let updated = st.updated_number_scheduled.unwrap_or(0);
        let available = st.number_available.unwrap_or(0);
        if ready > 0
            && st.current_number_scheduled == desired
            && ready == desired
            && available == desired
            && updated == desired
        {
            Readiness::Ready
        } else {
            Readiness::Pending {
                desired,
                ready,
                updated,
            }
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConvergeOutcome {
    Created,
    Updated {
        spec_changed: bool,
        metadata_changed: bool,
    },
    Unchanged {
        ready: bool,
    },
}

/// Merges identity metadata from `desired` into `current`.
///
/// Labels are only ever added: existing keys keep their values. Owner
/// references are replaced as a whole when they differ. Returns whether
/// anything changed.
pub fn merge_identity(current: &mut ObjectMeta, desired: &ObjectMeta) -> bool {
    let mut changed = false;
    if let Some(want) = desired.labels.as_ref().filter(|l| !l.is_empty()) {
        let have = current.labels.get_or_insert_with(BTreeMap::new);
        for (k, v) in want {
            if let Entry::Vacant(slot) = have.entry(k.clone()) {
                slot.insert(v.clone());
                changed = true;
            }
        }
    }
    if current.owner_references != desired.owner_references {
        current.owner_references = desired.owner_references.clone();
        changed = true;
    }
    changed
}

/// JSON paths at which `live` and `want` differ.
pub fn drift_paths(live: &Value, want: &Value) -> Vec<String> {
    fn walk(path: String, a: &Value, b: &Value, out: &mut Vec<String>) {
        match (a, b) {
            (Value::Object(x), Value::Object(y)) => {
                let mut keys: Vec<&String> = x.keys().chain(y.keys()).collect();
                keys.sort();
                keys.dedup();
                for k in keys {
                    let next = format!("{path}.{k}");
                    match (x.get(k), y.get(k)) {
                        (Some(l), Some(r)) => walk(next, l, r, out),
                        _ => out.push(next),
                    }
                }
            }
            (Value::Array(x), Value::Array(y)) if x.len() == y.len() => {
                for (i, (l, r)) in x.iter().zip(y).enumerate() {
                    walk(format!("{path}[{i}]"), l, r, out);
                }
            }
            _ if a != b => out.push(path),
            _ => {}
        }
    }
    let mut out = Vec::new();
    walk("spec".to_string(), live, want, &mut out);
    out
}

/// Drives the live object towards `desired`: creates it when absent,
/// updates it when its spec or identity metadata drifted, otherwise only
/// reports readiness. `verbose` raises drift details to info.
#[instrument(skip_all, fields(kind = %W::kind(&()), name = %desired.name_any()))]
pub async fn converge<C, W>(
    cluster: &C,
    mut desired: W,
    verbose: bool,
) -> Result<ConvergeOutcome, ReconcileErr>
where
    C: ClusterApi,
    W: Workload,
{
    let kind = W::kind(&());
    let ns = desired.namespace().unwrap_or_default();
    let name = desired.name_any();

    let current = cluster.get_opt::<W>(&ns, &name).await.map_err(|e| {
        ReconcileErr::api(format!("failed to get {kind} '{ns}/{name}'"), e)
    })?;

    let Some(mut current) = current else {
        info!(%ns, %name, "creating {kind}");
        cluster.create(&ns, &desired).await.map_err(|e| {
            ReconcileErr::api(
                format!("failed to create {kind} '{ns}/{name}'"),
                e,
            )
        })?;
        return Ok(ConvergeOutcome::Created);
    };

    desired.carry_platform_fields(&current);
    let spec_changed = desired.spec() != current.spec();
    let metadata_changed =
        merge_identity(current.meta_mut(), desired.meta());

    if spec_changed || metadata_changed {
        if spec_changed {
            let paths = drift_paths(
                &serde_json::to_value(current.spec()).unwrap_or_default(),
                &serde_json::to_value(desired.spec()).unwrap_or_default(),
            );
            if verbose {
                info!(%ns, %name, ?paths, "{kind} spec drift");
            } else {
                debug!(%ns, %name, ?paths, "{kind} spec drift");
            }
        }
        info!(%ns, %name, spec_changed, metadata_changed, "updating {kind}");
        if spec_changed {
            *current.spec_mut() = desired.spec_mut().take();
        }
        cluster.replace(&ns, &current).await.map_err(|e| {
            ReconcileErr::api(
                format!("failed to update {kind} '{ns}/{name}'"),
                e,
            )
        })?;
        return Ok(ConvergeOutcome::Updated {
            spec_changed,
            metadata_changed,
        });
    }

    match current.readiness() {
        Readiness::Ready => Ok(ConvergeOutcome::Unchanged { ready: true }),
        Readiness::Pending {
            desired,
            ready,
            updated,
        } => {
            warn!(
                %ns,
                %name,
                desired,
                ready,
                updated,
                "{kind} is not ready yet"
            );
            Ok(ConvergeOutcome::Unchanged { ready: false })
        }
    }
}
