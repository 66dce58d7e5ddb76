use std::collections::{BTreeMap, HashSet};

use k8s_openapi::api::apps::v1::{Deployment, DeploymentSpec};
use k8s_openapi::api::core::v1::{
    Capabilities, ConfigMapVolumeSource, Container, EmptyDirVolumeSource,
    EnvVar, EnvVarSource, KeyToPath, PodTemplateSpec, ProjectedVolumeSource,
    ResourceRequirements, Secret, SecretKeySelector, SecretProjection,
    SecretVolumeSource, SecurityContext, Volume, VolumeMount, VolumeProjection,
};
use k8s_openapi::apimachinery::pkg::apis::meta::v1::LabelSelector;
use kube::ResourceExt;
use kube::core::ObjectMeta;
use sha2::{Digest, Sha256};
use tracing::{debug, instrument};

use super::ReconcileErr;
use super::context::InfraReconcileContext;
use super::converge::{ConvergeOutcome, converge};
use crate::cluster::ClusterApi;
use crate::crd::CephObjectStore;
use crate::lcmconfig::LcmConfig;

pub const TOOLBOX_NAME: &str = "pelagia-ceph-toolbox";
pub const ROOK_OPERATOR_NAME: &str = "rook-ceph-operator";
const ROOK_OPERATOR_CONTAINER: &str = "rook-ceph-operator";
const MON_SECRET: &str = "rook-ceph-mon";
const MON_ENDPOINTS_CONFIG_MAP: &str = "rook-ceph-mon-endpoints";

const ROOK_USER_ID: i64 = 2016;
const ROOT_USER_ID: i64 = 0;
const REVISION_HISTORY_LIMIT: i32 = 5;
const PROGRESS_DEADLINE_SECONDS: i32 = 60;
const DEFAULT_MODE: i32 = 0o644;
const CA_FILE_MODE: i32 = 0o400;

const CA_BUNDLE_KEY: &str = "cabundle";
const CA_SECRET_VOLUME: &str = "cabundle-secret";
const CA_UPDATED_VOLUME: &str = "cabundle-updated";

const TOOLBOX_SCRIPT: &str = r#"#!/bin/bash -e
CEPH_CONFIG="/etc/ceph/ceph.conf"
MON_CONFIG="/etc/rook/mon-endpoints"
KEYRING_FILE="/etc/ceph/keyring"

# write a ceph config to its default location so ceph tools run without
# extra arguments
write_endpoints() {
  endpoints=$(cat ${MON_CONFIG})

  # strip mon names, external clusters may use digits and hyphens in them
  # shellcheck disable=SC2001
  mon_endpoints=$(echo "${endpoints}"| sed 's/[a-z0-9_-]\+=//g')

  DATE=$(date)
  echo "$DATE writing mon endpoints to ${CEPH_CONFIG}: ${endpoints}"
    cat <<EOF > ${CEPH_CONFIG}
[global]
mon_host = ${mon_endpoints}

[client.admin]
keyring = ${KEYRING_FILE}
EOF
}

# rewrite the config whenever the mon endpoints change
watch_endpoints() {
  real_path=$(realpath ${MON_CONFIG})
  initial_time=$(stat -c %Z "${real_path}")
  while true; do
    real_path=$(realpath ${MON_CONFIG})
    latest_time=$(stat -c %Z "${real_path}")

    if [[ "${latest_time}" != "${initial_time}" ]]; then
      write_endpoints
      initial_time=${latest_time}
    fi

    sleep 10
  done
}

ceph_secret=${ROOK_CEPH_SECRET}
if [[ "$ceph_secret" == "" ]]; then
  ceph_secret=$(cat /var/lib/rook-ceph-mon/secret.keyring)
fi

cat <<EOF > ${KEYRING_FILE}
[${ROOK_CEPH_USERNAME}]
key = ${ceph_secret}
EOF

write_endpoints

watch_endpoints
"#;

const CA_UPDATE_SCRIPT: &str = "/usr/bin/update-ca-trust extract; cp -rf /etc/pki/ca-trust/extracted//* /tmp/new-ca-bundle/";

/// A CA bundle secret referenced by an object store gateway, identified by
/// the sha256 of its `cabundle` key.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CaBundle {
    pub secret: String,
    pub sha256: String,
}

impl CaBundle {
    pub fn from_secret(secret: &Secret) -> Self {
        let content = secret
            .data
            .as_ref()
            .and_then(|d| d.get(CA_BUNDLE_KEY))
            .map(|b| b.0.as_slice())
            .unwrap_or_default();
        Self {
            secret: secret.name_any(),
            sha256: format!("{:x}", Sha256::digest(content)),
        }
    }

    fn file_item(&self) -> KeyToPath {
        KeyToPath {
            key: CA_BUNDLE_KEY.to_string(),
            path: format!("{}.crt", self.secret),
            mode: Some(CA_FILE_MODE),
        }
    }
}

fn app_labels() -> BTreeMap<String, String> {
    BTreeMap::from([("app".to_string(), TOOLBOX_NAME.to_string())])
}

fn secret_env(name: &str, key: &str) -> EnvVar {
    EnvVar {
        name: name.to_string(),
        value_from: Some(EnvVarSource {
            secret_key_ref: Some(SecretKeySelector {
                name: MON_SECRET.to_string(),
                key: key.to_string(),
                optional: None,
            }),
            ..Default::default()
        }),
        ..Default::default()
    }
}

fn mount(name: &str, path: &str, read_only: bool) -> VolumeMount {
    VolumeMount {
        name: name.to_string(),
        mount_path: path.to_string(),
        read_only: read_only.then_some(true),
        ..Default::default()
    }
}

fn empty_dir(name: &str) -> Volume {
    Volume {
        name: name.to_string(),
        empty_dir: Some(EmptyDirVolumeSource::default()),
        ..Default::default()
    }
}

fn drop_all() -> Option<Capabilities> {
    Some(Capabilities {
        drop: Some(vec!["ALL".to_string()]),
        ..Default::default()
    })
}

fn toolbox_container(image: &str, external: bool) -> Container {
    let mut env = vec![
        secret_env("ROOK_CEPH_USERNAME", "ceph-username"),
        secret_env("ROOK_CEPH_SECRET", "ceph-secret"),
    ];
    // non-admin external clients pass their name through CEPH_ARGS
    if external {
        env.push(secret_env("CEPH_ARGS", "ceph-args"));
    }
    Container {
        name: TOOLBOX_NAME.to_string(),
        image: Some(image.to_string()),
        command: Some(vec!["/bin/bash".into(), "-c".into()]),
        args: Some(vec![TOOLBOX_SCRIPT.to_string()]),
        security_context: Some(SecurityContext {
            capabilities: drop_all(),
            run_as_user: Some(ROOK_USER_ID),
            run_as_group: Some(ROOK_USER_ID),
            allow_privilege_escalation: Some(false),
            run_as_non_root: Some(true),
            ..Default::default()
        }),
        termination_message_path: Some("/dev/termination-log".into()),
        termination_message_policy: Some("File".into()),
        image_pull_policy: Some("IfNotPresent".into()),
        volume_mounts: Some(vec![
            mount("ceph-config", "/etc/ceph", false),
            mount("mon-endpoint", "/etc/rook", false),
        ]),
        env: Some(env),
        resources: Some(ResourceRequirements::default()),
        ..Default::default()
    }
}

fn ca_update_container(image: &str) -> Container {
    Container {
        name: "cabundle-update".to_string(),
        image: Some(image.to_string()),
        command: Some(vec!["/bin/bash".into(), "-c".into()]),
        args: Some(vec![CA_UPDATE_SCRIPT.to_string()]),
        security_context: Some(SecurityContext {
            capabilities: drop_all(),
            run_as_user: Some(ROOT_USER_ID),
            run_as_group: Some(ROOT_USER_ID),
            privileged: Some(false),
            allow_privilege_escalation: Some(false),
            ..Default::default()
        }),
        termination_message_path: Some("/dev/termination-log".into()),
        termination_message_policy: Some("File".into()),
        image_pull_policy: Some("IfNotPresent".into()),
        volume_mounts: Some(vec![
            mount(CA_SECRET_VOLUME, "/etc/pki/ca-trust/source/anchors/", true),
            mount(CA_UPDATED_VOLUME, "/tmp/new-ca-bundle/", false),
        ]),
        resources: Some(ResourceRequirements::default()),
        ..Default::default()
    }
}

/// A single secret mounts directly; several need a projected volume since
/// one volume cannot source more than one secret object otherwise.
fn ca_secret_volume(bundles: &[CaBundle]) -> Volume {
    match bundles {
        [only] => Volume {
            name: CA_SECRET_VOLUME.to_string(),
            secret: Some(SecretVolumeSource {
                secret_name: Some(only.secret.clone()),
                default_mode: Some(DEFAULT_MODE),
                items: Some(vec![only.file_item()]),
                optional: None,
            }),
            ..Default::default()
        },
        many => Volume {
            name: CA_SECRET_VOLUME.to_string(),
            projected: Some(ProjectedVolumeSource {
                default_mode: Some(DEFAULT_MODE),
                sources: Some(
                    many.iter()
                        .map(|b| VolumeProjection {
                            secret: Some(SecretProjection {
                                name: b.secret.clone(),
                                items: Some(vec![b.file_item()]),
                                optional: None,
                            }),
                            ..Default::default()
                        })
                        .collect(),
                ),
            }),
            ..Default::default()
        },
    }
}

/// Desired toolbox Deployment. The pod template is cloned from the Rook
/// operator so the toolbox follows its image, strategy and placement.
pub fn build_toolbox(
    ctx: &InfraReconcileContext,
    lcm: &LcmConfig,
    operator: &Deployment,
    ca_bundles: &[CaBundle],
) -> Result<Deployment, ReconcileErr> {
    let operator_spec = operator.spec.as_ref().ok_or_else(|| {
        ReconcileErr::MissingInput(format!(
            "deployment '{}/{}' has no spec",
            lcm.rook_namespace, ROOK_OPERATOR_NAME
        ))
    })?;
    let mut pod = operator_spec.template.spec.clone().ok_or_else(|| {
        ReconcileErr::MissingInput(format!(
            "deployment '{}/{}' has no pod template",
            lcm.rook_namespace, ROOK_OPERATOR_NAME
        ))
    })?;
    let image = pod
        .containers
        .iter()
        .find(|c| c.name == ROOK_OPERATOR_CONTAINER)
        .and_then(|c| c.image.clone())
        .ok_or_else(|| {
            ReconcileErr::MissingInput(format!(
                "deployment '{}/{}' has no '{}' container image",
                lcm.rook_namespace, ROOK_OPERATOR_NAME, ROOK_OPERATOR_CONTAINER
            ))
        })?;

    pod.dns_policy = Some("ClusterFirstWithHostNet".into());
    pod.service_account = None;
    pod.service_account_name = None;
    pod.init_containers = None;
    pod.containers = vec![toolbox_container(&image, ctx.external)];
    pod.volumes = Some(vec![
        Volume {
            name: "mon-endpoint".to_string(),
            config_map: Some(ConfigMapVolumeSource {
                name: MON_ENDPOINTS_CONFIG_MAP.to_string(),
                default_mode: Some(DEFAULT_MODE),
                items: Some(vec![KeyToPath {
                    key: "data".into(),
                    path: "mon-endpoints".into(),
                    mode: None,
                }]),
                optional: None,
            }),
            ..Default::default()
        },
        empty_dir("ceph-config"),
    ]);

    let mut annotations = None;
    if !ctx.external && !ca_bundles.is_empty() {
        annotations = Some(
            ca_bundles
                .iter()
                .map(|b| (format!("{}/sha256", b.secret), b.sha256.clone()))
                .collect::<BTreeMap<_, _>>(),
        );
        pod.init_containers = Some(vec![ca_update_container(&image)]);
        if let Some(mounts) = pod.containers[0].volume_mounts.as_mut() {
            mounts.push(mount(
                CA_UPDATED_VOLUME,
                "/etc/pki/ca-trust/extracted/",
                true,
            ));
        }
        if let Some(volumes) = pod.volumes.as_mut() {
            volumes.push(empty_dir(CA_UPDATED_VOLUME));
            volumes.push(ca_secret_volume(ca_bundles));
        }
    }

    Ok(Deployment {
        metadata: ObjectMeta {
            name: Some(TOOLBOX_NAME.to_string()),
            namespace: Some(lcm.rook_namespace.clone()),
            labels: Some(app_labels()),
            owner_references: Some(ctx.cluster_owner_refs.clone()),
            ..Default::default()
        },
        spec: Some(DeploymentSpec {
            replicas: Some(1),
            revision_history_limit: Some(REVISION_HISTORY_LIMIT),
            progress_deadline_seconds: Some(PROGRESS_DEADLINE_SECONDS),
            strategy: operator_spec.strategy.clone(),
            selector: LabelSelector {
                match_labels: Some(app_labels()),
                ..Default::default()
            },
            template: PodTemplateSpec {
                metadata: Some(ObjectMeta {
                    labels: Some(app_labels()),
                    annotations,
                    ..Default::default()
                }),
                spec: Some(pod),
            },
            ..Default::default()
        }),
        ..Default::default()
    })
}

/// CA bundles referenced by object store gateways in the rook namespace,
/// in store order with duplicates removed. A referenced secret that does
/// not exist fails the whole lookup.
pub async fn collect_ca_bundles<C: ClusterApi>(
    cluster: &C,
    rook_namespace: &str,
) -> Result<Vec<CaBundle>, ReconcileErr> {
    let stores: Vec<CephObjectStore> =
        cluster.list(rook_namespace).await.map_err(|e| {
            ReconcileErr::api(
                format!("failed to list CephObjectStores in '{rook_namespace}'"),
                e,
            )
        })?;

    let mut seen = HashSet::new();
    let mut bundles = Vec::new();
    for store in &stores {
        let Some(secret_name) = store.ca_bundle_ref() else {
            continue;
        };
        if !seen.insert(secret_name.to_string()) {
            continue;
        }
        let secret: Secret = cluster
            .get_opt(rook_namespace, secret_name)
            .await
            .map_err(|e| {
                ReconcileErr::api(
                    format!(
                        "failed to get secret '{rook_namespace}/{secret_name}' with cabundle for CephObjectStore '{rook_namespace}/{}'",
                        store.name_any()
                    ),
                    e,
                )
            })?
            .ok_or_else(|| {
                ReconcileErr::MissingInput(format!(
                    "secret '{rook_namespace}/{secret_name}' with cabundle for CephObjectStore '{rook_namespace}/{}' not found",
                    store.name_any()
                ))
            })?;
        debug!(secret = %secret_name, store = %store.name_any(), "found gateway cabundle");
        bundles.push(CaBundle::from_secret(&secret));
    }
    Ok(bundles)
}

#[instrument(skip_all, fields(ns = %lcm.rook_namespace, name = TOOLBOX_NAME))]
pub async fn ensure_toolbox<C: ClusterApi>(
    cluster: &C,
    ctx: &InfraReconcileContext,
    lcm: &LcmConfig,
) -> Result<ConvergeOutcome, ReconcileErr> {
    let rook_ns = &lcm.rook_namespace;
    let operator: Deployment = cluster
        .get_opt(rook_ns, ROOK_OPERATOR_NAME)
        .await
        .map_err(|e| {
            ReconcileErr::api(
                format!(
                    "failed to check '{rook_ns}/{ROOK_OPERATOR_NAME}' deployment"
                ),
                e,
            )
        })?
        .ok_or_else(|| {
            ReconcileErr::MissingInput(format!(
                "deployment '{rook_ns}/{ROOK_OPERATOR_NAME}' not found"
            ))
        })?;
    let ca_bundles = if ctx.external {
        Vec::new()
    } else {
        collect_ca_bundles(cluster, rook_ns).await?
    };
    let desired = build_toolbox(ctx, lcm, &operator, &ca_bundles)?;
    converge(cluster, desired, lcm.verbose()).await
}
