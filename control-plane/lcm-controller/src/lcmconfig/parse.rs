use std::collections::BTreeMap;
use std::time::Duration;

use regex::Regex;
use tracing::{Level, debug, warn};

use super::{ConfigScope, LabelSelector, LcmConfig};

/// ConfigMap keys understood by the controller. Anything else is ignored.
pub mod keys {
    pub const ROOK_NAMESPACE: &str = "ROOK_NAMESPACE";
    pub const DISK_DAEMON_API_PORT: &str = "DISK_DAEMON_API_PORT";
    pub const DISK_DAEMON_PLACEMENT: &str =
        "DISK_DAEMON_PLACEMENT_NODES_SELECTOR";

    pub const HEALTH_CEPH_ISSUES_TO_IGNORE: &str =
        "HEALTH_CHECKS_CEPH_ISSUES_TO_IGNORE";
    pub const HEALTH_CHECKS_SKIP: &str = "HEALTH_CHECKS_SKIP";
    pub const HEALTH_USAGE_CLASS_FILTER: &str =
        "HEALTH_CHECKS_USAGE_CLASS_FILTER";
    pub const HEALTH_USAGE_POOLS_FILTER: &str =
        "HEALTH_CHECKS_USAGE_POOLS_FILTER";
    pub const HEALTH_LOG_LEVEL: &str = "HEALTH_LOG_LEVEL";
    pub const RGW_PUBLIC_ACCESS_SELECTOR: &str =
        "RGW_PUBLIC_ACCESS_SERVICE_SELECTOR";

    pub const TASK_LOG_LEVEL: &str = "TASK_LOG_LEVEL";
    pub const TASK_REBALANCE_TIMEOUT_MIN: &str =
        "TASK_OSD_PG_REBALANCE_TIMEOUT_MIN";
    pub const TASK_ALLOW_REMOVE_MANUAL_LVMS: &str =
        "TASK_ALLOW_REMOVE_MANUALLY_CREATED_LVMS";

    pub const DEPLOYMENT_LOG_LEVEL: &str = "DEPLOYMENT_LOG_LEVEL";
    pub const DEPLOYMENT_CEPH_IMAGE: &str = "DEPLOYMENT_CEPH_IMAGE";
    pub const DEPLOYMENT_CEPH_RELEASE: &str = "DEPLOYMENT_CEPH_RELEASE";
    pub const DEPLOYMENT_ROOK_IMAGE: &str = "DEPLOYMENT_ROOK_IMAGE";
    pub const DEPLOYMENT_NETPOL_ENABLED: &str = "DEPLOYMENT_NETPOL_ENABLED";
    pub const DEPLOYMENT_OPENSTACK_SHARED_NAMESPACE: &str =
        "DEPLOYMENT_OPENSTACK_CEPH_SHARED_NAMESPACE";
    pub const DEPLOYMENT_MULTISITE_CABUNDLE: &str =
        "DEPLOYMENT_MULTISITE_CABUNDLE_SECRET";
    pub const DEPLOYMENT_EXCLUDE_DAEMONSETS: &str =
        "DEPLOYMENT_LABEL_TO_EXCLUDE_CEPH_DAEMONSETS";
}

/// Applies raw ConfigMap values onto a default target, one field at a time.
struct ParamReader<'a> {
    raw: &'a BTreeMap<String, String>,
}

impl<'a> ParamReader<'a> {
    fn set<T>(
        &self,
        key: &'static str,
        expected: &'static str,
        target: &mut T,
        parse: impl FnOnce(&str) -> Option<T>,
    ) {
        let Some(value) = self.raw.get(key) else {
            return;
        };
        match parse(value) {
            Some(parsed) => {
                debug!(parameter = key, %value, "set lcm parameter");
                *target = parsed;
            }
            None => warn!(
                parameter = key,
                %value,
                expected,
                "incorrect lcm parameter value, keeping default"
            ),
        }
    }

    fn set_string(&self, key: &'static str, target: &mut String) {
        self.set(key, "string", target, |v| Some(v.to_string()));
    }
}

/// Go-style boolean literals.
pub(crate) fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim() {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

pub(crate) fn parse_i32(raw: &str) -> Option<i32> {
    raw.parse().ok()
}

pub(crate) fn parse_minutes(raw: &str) -> Option<Duration> {
    raw.parse::<u64>()
        .ok()
        .map(|m| Duration::from_secs(m.saturating_mul(60)))
}

pub(crate) fn parse_level(raw: &str) -> Option<Level> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "trace" => Some(Level::TRACE),
        "debug" => Some(Level::DEBUG),
        "info" => Some(Level::INFO),
        "warn" | "warning" => Some(Level::WARN),
        "error" => Some(Level::ERROR),
        _ => None,
    }
}

pub(crate) fn parse_list(raw: &str) -> Option<Vec<String>> {
    Some(
        raw.split(',')
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect(),
    )
}

pub(crate) fn parse_selector(raw: &str) -> Option<LabelSelector> {
    raw.parse().ok()
}

pub(crate) fn parse_regex(raw: &str) -> Option<String> {
    Regex::new(raw).ok().map(|_| raw.to_string())
}

/// Builds a full snapshot from a raw ConfigMap. Every field starts at its
/// compiled default and is overwritten only if its value parses, so one bad
/// entry never affects its siblings.
pub fn read_configuration(
    raw: &BTreeMap<String, String>,
    scope: ConfigScope,
) -> LcmConfig {
    let r = ParamReader { raw };
    let mut cfg = LcmConfig::default();

    r.set(
        keys::ROOK_NAMESPACE,
        "non-empty namespace",
        &mut cfg.rook_namespace,
        |v| {
            let v = v.trim();
            (!v.is_empty()).then(|| v.to_string())
        },
    );
    r.set(
        keys::DISK_DAEMON_API_PORT,
        "integer",
        &mut cfg.disk_daemon_port,
        parse_i32,
    );
    r.set(
        keys::DISK_DAEMON_PLACEMENT,
        "label selector",
        &mut cfg.disk_daemon_placement,
        parse_selector,
    );

    if scope.includes_health() {
        let h = &mut cfg.health;
        r.set(
            keys::HEALTH_LOG_LEVEL,
            "log level",
            &mut h.log_level,
            parse_level,
        );
        r.set(
            keys::HEALTH_CEPH_ISSUES_TO_IGNORE,
            "comma separated list",
            &mut h.ceph_issues_to_ignore,
            parse_list,
        );
        r.set(
            keys::HEALTH_CHECKS_SKIP,
            "comma separated list",
            &mut h.checks_skip,
            parse_list,
        );
        r.set(
            keys::HEALTH_USAGE_CLASS_FILTER,
            "regular expression",
            &mut h.usage_class_filter,
            parse_regex,
        );
        r.set(
            keys::HEALTH_USAGE_POOLS_FILTER,
            "regular expression",
            &mut h.usage_pools_filter,
            parse_regex,
        );
        r.set(
            keys::RGW_PUBLIC_ACCESS_SELECTOR,
            "label selector",
            &mut h.rgw_public_access_selector,
            parse_selector,
        );
    }

    if scope.includes_task() {
        let t = &mut cfg.task;
        r.set(
            keys::TASK_LOG_LEVEL,
            "log level",
            &mut t.log_level,
            parse_level,
        );
        r.set(
            keys::TASK_REBALANCE_TIMEOUT_MIN,
            "integer minutes",
            &mut t.osd_pg_rebalance_timeout,
            parse_minutes,
        );
        r.set(
            keys::TASK_ALLOW_REMOVE_MANUAL_LVMS,
            "boolean",
            &mut t.allow_remove_manually_created_lvms,
            parse_bool,
        );
    }

    if scope.includes_deployment() {
        let d = &mut cfg.deployment;
        r.set(
            keys::DEPLOYMENT_LOG_LEVEL,
            "log level",
            &mut d.log_level,
            parse_level,
        );
        r.set_string(keys::DEPLOYMENT_CEPH_IMAGE, &mut d.ceph_image);
        r.set_string(keys::DEPLOYMENT_CEPH_RELEASE, &mut d.ceph_release);
        r.set_string(keys::DEPLOYMENT_ROOK_IMAGE, &mut d.rook_image);
        r.set(
            keys::DEPLOYMENT_NETPOL_ENABLED,
            "boolean",
            &mut d.netpol_enabled,
            parse_bool,
        );
        r.set_string(
            keys::DEPLOYMENT_OPENSTACK_SHARED_NAMESPACE,
            &mut d.openstack_ceph_shared_namespace,
        );
        r.set_string(
            keys::DEPLOYMENT_MULTISITE_CABUNDLE,
            &mut d.multisite_cabundle_secret,
        );
        r.set(
            keys::RGW_PUBLIC_ACCESS_SELECTOR,
            "label selector",
            &mut d.rgw_public_access_selector,
            parse_selector,
        );
        r.set(
            keys::DEPLOYMENT_EXCLUDE_DAEMONSETS,
            "label selector",
            &mut d.exclude_daemonsets_selector,
            parse_selector,
        );
    }

    cfg
}
