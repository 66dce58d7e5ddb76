//! Per-namespace operational parameters read from the lcm ConfigMap.

mod cache;
mod parse;
mod selector;
mod watcher;


use std::str::FromStr;
use std::time::Duration;

use tracing::Level;

pub use cache::ConfigCache;
pub use parse::{keys, read_configuration};
pub use selector::{LabelSelector, Operator, Requirement, SelectorError};
pub use watcher::{ConfigMapTracker, watch_lcm_config};

pub const DEFAULT_ROOK_NAMESPACE: &str = "rook-ceph";
pub const DEFAULT_DISK_DAEMON_PORT: i32 = 9999;
pub const DEFAULT_DISK_DAEMON_PLACEMENT: &str = "pelagia-disk-daemon=true";
pub const DEFAULT_RGW_PUBLIC_ACCESS: &str = "external_access=rgw";
pub const DEFAULT_OPENSTACK_SHARED_NAMESPACE: &str = "openstack-ceph-shared";
pub const DEFAULT_REBALANCE_TIMEOUT: Duration = Duration::from_secs(30 * 60);

pub const DEFAULT_CEPH_ISSUES_TO_IGNORE: [&str; 8] = [
    "OSDMAP_FLAGS",
    "TOO_FEW_PGS",
    "SLOW_OPS",
    "OLD_CRUSH_TUNABLES",
    "OLD_CRUSH_STRAW_CALC_VERSION",
    "POOL_APP_NOT_ENABLED",
    "MON_DISK_LOW",
    "RECENT_CRASH",
];

/// Which parameter groups a process parses. Groups outside the scope keep
/// their compiled defaults.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConfigScope {
    All,
    Health,
    Task,
    Deployment,
}

impl ConfigScope {
    pub fn includes_health(self) -> bool {
        matches!(self, ConfigScope::All | ConfigScope::Health)
    }

    pub fn includes_task(self) -> bool {
        matches!(self, ConfigScope::All | ConfigScope::Task)
    }

    pub fn includes_deployment(self) -> bool {
        matches!(self, ConfigScope::All | ConfigScope::Deployment)
    }
}

impl FromStr for ConfigScope {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "all" => Ok(ConfigScope::All),
            "health" => Ok(ConfigScope::Health),
            "task" => Ok(ConfigScope::Task),
            "deployment" | "cephdeployment" => Ok(ConfigScope::Deployment),
            other => Err(format!("unknown config scope '{other}'")),
        }
    }
}

/// Immutable snapshot of a namespace's parameters. Readers share it behind
/// an `Arc`; a config change swaps in a new value wholesale.
#[derive(Clone, Debug, PartialEq)]
pub struct LcmConfig {
    pub rook_namespace: String,
    pub disk_daemon_port: i32,
    pub disk_daemon_placement: LabelSelector,
    pub health: HealthParams,
    pub task: TaskParams,
    pub deployment: DeploymentParams,
}

#[derive(Clone, Debug, PartialEq)]
pub struct HealthParams {
    pub log_level: Level,
    pub ceph_issues_to_ignore: Vec<String>,
    pub checks_skip: Vec<String>,
    /// Empty means no filtering.
    pub usage_class_filter: String,
    pub usage_pools_filter: String,
    pub rgw_public_access_selector: LabelSelector,
}

#[derive(Clone, Debug, PartialEq)]
pub struct TaskParams {
    pub log_level: Level,
    pub osd_pg_rebalance_timeout: Duration,
    pub allow_remove_manually_created_lvms: bool,
}

#[derive(Clone, Debug, PartialEq)]
pub struct DeploymentParams {
    pub log_level: Level,
    pub ceph_image: String,
    pub ceph_release: String,
    pub rook_image: String,
    pub netpol_enabled: bool,
    pub openstack_ceph_shared_namespace: String,
    pub multisite_cabundle_secret: String,
    pub rgw_public_access_selector: LabelSelector,
    pub exclude_daemonsets_selector: LabelSelector,
}

impl LcmConfig {
    /// Whether this namespace asked for debug-level detail from the health
    /// side controllers.
    pub fn verbose(&self) -> bool {
        self.health.log_level >= Level::DEBUG
    }
}

fn default_selector(raw: &str) -> LabelSelector {
    raw.parse().unwrap_or_default()
}

impl Default for LcmConfig {
    fn default() -> Self {
        Self {
            rook_namespace: DEFAULT_ROOK_NAMESPACE.to_string(),
            disk_daemon_port: DEFAULT_DISK_DAEMON_PORT,
            disk_daemon_placement: default_selector(
                DEFAULT_DISK_DAEMON_PLACEMENT,
            ),
            health: HealthParams::default(),
            task: TaskParams::default(),
            deployment: DeploymentParams::default(),
        }
    }
}

impl Default for HealthParams {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            ceph_issues_to_ignore: DEFAULT_CEPH_ISSUES_TO_IGNORE
                .iter()
                .map(|s| s.to_string())
                .collect(),
            checks_skip: Vec::new(),
            usage_class_filter: String::new(),
            usage_pools_filter: String::new(),
            rgw_public_access_selector: default_selector(
                DEFAULT_RGW_PUBLIC_ACCESS,
            ),
        }
    }
}

impl Default for TaskParams {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            osd_pg_rebalance_timeout: DEFAULT_REBALANCE_TIMEOUT,
            allow_remove_manually_created_lvms: false,
        }
    }
}

impl Default for DeploymentParams {
    fn default() -> Self {
        Self {
            log_level: Level::INFO,
            ceph_image: String::new(),
            ceph_release: String::new(),
            rook_image: String::new(),
            netpol_enabled: false,
            openstack_ceph_shared_namespace:
                DEFAULT_OPENSTACK_SHARED_NAMESPACE.to_string(),
            multisite_cabundle_secret: String::new(),
            rgw_public_access_selector: default_selector(
                DEFAULT_RGW_PUBLIC_ACCESS,
            ),
            exclude_daemonsets_selector: LabelSelector::default(),
        }
    }
}
