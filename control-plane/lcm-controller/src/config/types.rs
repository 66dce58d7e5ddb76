use std::time::Duration;

use envconfig::Envconfig;
use tracing::warn;

use crate::lcmconfig::ConfigScope;

#[derive(Envconfig, Clone, Debug)]
pub struct ControllerConfig {
    /// Image used by the disk daemon init container to ship its binaries.
    /// Checked on every reconcile; a missing value only postpones the pass.
    /// Env: CONTROLLER_IMAGE
    #[envconfig(from = "CONTROLLER_IMAGE")]
    pub controller_image: Option<String>,

    /// Name of the per-namespace ConfigMap carrying lcm parameters.
    #[envconfig(from = "LCM_CONFIG_NAME", default = "pelagia-lcmconfig")]
    pub lcm_config_name: String,

    /// Periodic re-check interval applied after every reconcile.
    /// Env: LCM_REQUEUE_SECS
    #[envconfig(from = "LCM_REQUEUE_SECS", default = "30")]
    pub requeue_secs: u64,

    /// Parameter groups parsed from the ConfigMap (all | health | task | deployment)
    #[envconfig(from = "LCM_PARAMS_SCOPE", default = "health")]
    pub params_scope: String,

    /// Restrict watches to a single namespace; all namespaces when unset.
    #[envconfig(from = "LCM_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    #[envconfig(nested)]
    pub http: HttpConfig,
}

#[derive(Envconfig, Clone, Debug)]
pub struct HttpConfig {
    #[envconfig(from = "LCM_HTTP_ENABLED", default = "true")]
    pub enabled: bool,
    #[envconfig(from = "LCM_HTTP_PORT", default = "8088")]
    pub port: u16,
}

impl ControllerConfig {
    pub fn requeue_interval(&self) -> Duration {
        Duration::from_secs(self.requeue_secs.max(1))
    }

    /// Unknown scope names fall back to health, the only group this
    /// controller consumes.
    pub fn scope(&self) -> ConfigScope {
        match self.params_scope.parse() {
            Ok(scope) => scope,
            Err(e) => {
                warn!(
                    value = %self.params_scope,
                    "incorrect LCM_PARAMS_SCOPE value ({e}), using 'health'"
                );
                ConfigScope::Health
            }
        }
    }

    /// Trimmed controller image, `None` when unset or blank.
    pub fn controller_image(&self) -> Option<&str> {
        self.controller_image
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
    }
}
