use std::collections::BTreeMap;

use k8s_openapi::api::apps::v1::{
    DaemonSet, DaemonSetSpec, DaemonSetUpdateStrategy, RollingUpdateDaemonSet,
};
use k8s_openapi::api::core::v1::{
    Capabilities, Container, EmptyDirVolumeSource, EnvVar, ExecAction,
    HostPathVolumeSource, PodSecurityContext, PodSpec, PodTemplateSpec, Probe,
    ResourceRequirements, SecurityContext, Volume, VolumeMount,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use k8s_openapi::apimachinery::pkg::util::intstr::IntOrString;
use kube::core::ObjectMeta;
use tracing::{error, info, instrument};

use super::ReconcileErr;
use super::context::InfraReconcileContext;
use super::converge::{ConvergeOutcome, converge};
use crate::cluster::ClusterApi;
use crate::lcmconfig::LcmConfig;

pub const DISK_DAEMON_NAME: &str = "pelagia-disk-daemon";
const BIN_VOLUME: &str = "pelagia-disk-daemon-bin";
const DAEMON_BINARY: &str = "/usr/local/bin/pelagia-disk-daemon";
const TINI_BINARY: &str = "/usr/local/bin/tini";

const REVISION_HISTORY_LIMIT: i32 = 5;
const MIN_READY_SECONDS: i32 = 5;
const TERMINATION_GRACE_SECONDS: i64 = 10;

fn app_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), DISK_DAEMON_NAME.to_string())])
}

fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

fn host_dir(name: &str, path: &str) -> Volume {
    Volume {
        name: name.to_string(),
        host_path: Some(HostPathVolumeSource {
            path: path.to_string(),
            type_: Some("Directory".into()),
        }),
        ..Default::default()
    }
}

fn api_check_probe(port: &str) -> Probe {
    Probe {
        exec: Some(ExecAction {
            command: Some(vec![
                DAEMON_BINARY.to_string(),
                "--api-check".to_string(),
                "--port".to_string(),
                port.to_string(),
            ]),
        }),
        timeout_seconds: Some(1),
        success_threshold: Some(1),
        period_seconds: Some(10),
        failure_threshold: Some(3),
        ..Default::default()
    }
}

fn bin_downloader(image: &str) -> Container {
    Container {
        name: "bin-downloader".to_string(),
        image: Some(image.to_string()),
        command: Some(vec!["cp".to_string()]),
        args: Some(vec![
            DAEMON_BINARY.to_string(),
            TINI_BINARY.to_string(),
            "/tmp/bin/".to_string(),
        ]),
        security_context: Some(SecurityContext {
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        termination_message_path: Some("/dev/termination-log".into()),
        termination_message_policy: Some("File".into()),
        image_pull_policy: Some("IfNotPresent".into()),
        volume_mounts: Some(vec![mount(BIN_VOLUME, "/tmp/bin", false)]),
        resources: Some(ResourceRequirements::default()),
        ..Default::default()
    }
}

fn daemon_container(image: &str, port: &str) -> Container {
    Container {
        name: DISK_DAEMON_NAME.to_string(),
        image: Some(image.to_string()),
        command: Some(vec![TINI_BINARY.to_string(), "--".to_string()]),
        args: Some(vec![
            DAEMON_BINARY.to_string(),
            "--daemon".to_string(),
            "--port".to_string(),
            port.to_string(),
        ]),
        env: Some(vec![EnvVar {
            name: "DM_DISABLE_UDEV".to_string(),
            value: Some("0".to_string()),
            ..Default::default()
        }]),
        security_context: Some(SecurityContext {
            privileged: Some(true),
            run_as_user: Some(0),
            capabilities: Some(Capabilities {
                drop: Some(vec!["ALL".to_string()]),
                ..Default::default()
            }),
            ..Default::default()
        }),
        liveness_probe: Some(Probe {
            initial_delay_seconds: Some(5),
            ..api_check_probe(port)
        }),
        readiness_probe: Some(api_check_probe(port)),
        termination_message_path: Some("/dev/termination-log".into()),
        termination_message_policy: Some("File".into()),
        image_pull_policy: Some("IfNotPresent".into()),
        volume_mounts: Some(vec![
            mount(BIN_VOLUME, "/usr/local/bin", false),
            mount("devices", "/dev", true),
            mount("run-udev", "/run/udev", true),
        ]),
        resources: Some(ResourceRequirements::default()),
        ..Default::default()
    }
}

/// Desired privileged disk daemon. The init container ships the daemon
/// binary from the controller image into an emptyDir; the main container
/// runs it from the ceph image with host devices mounted.
pub fn build_disk_daemon(
    ctx: &InfraReconcileContext,
    lcm: &LcmConfig,
    ceph_image: &str,
) -> DaemonSet {
    let port = lcm.disk_daemon_port.to_string();
    let pod = PodSpec {
        dns_policy: Some("ClusterFirstWithHostNet".into()),
        security_context: Some(PodSecurityContext {
            run_as_user: Some(0),
            run_as_group: Some(0),
            ..Default::default()
        }),
        restart_policy: Some("Always".into()),
        termination_grace_period_seconds: Some(TERMINATION_GRACE_SECONDS),
        init_containers: Some(vec![bin_downloader(&ctx.controller_image)]),
        containers: vec![daemon_container(ceph_image, &port)],
        node_selector: lcm
            .disk_daemon_placement
            .as_label_map()
            .filter(|m| !m.is_empty()),
        tolerations: ctx.osd_tolerations.clone().filter(|t| !t.is_empty()),
        volumes: Some(vec![
            Volume {
                name: BIN_VOLUME.to_string(),
                empty_dir: Some(EmptyDirVolumeSource::default()),
                ..Default::default()
            },
            host_dir("devices", "/dev"),
            host_dir("run-udev", "/run/udev"),
        ]),
        ..Default::default()
    };

    DaemonSet {
        metadata: ObjectMeta {
            name: Some(DISK_DAEMON_NAME.to_string()),
            namespace: Some(ctx.namespace.clone()),
            labels: Some(app_labels()),
            owner_references: Some(ctx.health_owner_refs.clone()),
            ..Default::default()
        },
        spec: Some(DaemonSetSpec {
            min_ready_seconds: Some(MIN_READY_SECONDS),
            revision_history_limit: Some(REVISION_HISTORY_LIMIT),
            update_strategy: Some(DaemonSetUpdateStrategy {
                type_: Some("RollingUpdate".into()),
                rolling_update: Some(RollingUpdateDaemonSet {
                    max_unavailable: Some(IntOrString::String("30%".into())),
                    max_surge: Some(IntOrString::Int(0)),
                }),
            }),
            selector: LabelSelector {
                match_labels: Some(app_labels()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(app_labels()),
                    ..Default::default()
                }),
                spec: Some(pod),
            },
        }),
        ..Default::default()
    }
}

/// Converges the disk daemon. `Ok(None)` when it is not applicable: external
/// clusters have no local disks, and without a known ceph image there is
/// nothing to run yet.
#[instrument(skip_all, fields(ns = %ctx.namespace, name = DISK_DAEMON_NAME))]
pub async fn ensure_disk_daemon<C: ClusterApi>(
    cluster: &C,
    ctx: &InfraReconcileContext,
    lcm: &LcmConfig,
) -> Result<Option<ConvergeOutcome>, ReconcileErr> {
    if ctx.external {
        info!(ns = %ctx.namespace, "external cluster, skipping disk daemon");
        return Ok(None);
    }
    let Some(ceph_image) = ctx.ceph_image.as_deref() else {
        error!(
            ns = %ctx.namespace,
            "ceph image is not reported by the cluster yet, skipping disk daemon"
        );
        return Ok(None);
    };
    let desired = build_disk_daemon(ctx, lcm, ceph_image);
    converge(cluster, desired, lcm.verbose()).await.map(Some)
}
