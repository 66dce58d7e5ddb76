use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use tokio::sync::RwLock;

use super::{ConfigScope, LcmConfig, read_configuration};

/// Namespace-keyed lcm parameters. A namespace without a custom entry reads
/// the compiled defaults. Entries are replaced as whole `Arc`s so a reader
/// never sees a half-applied update.
#[derive(Clone)]
pub struct ConfigCache {
    inner: Arc<RwLock<HashMap<String, Arc<LcmConfig>>>>,
    defaults: Arc<LcmConfig>,
    scope: ConfigScope,
}

impl Default for ConfigCache {
    fn default() -> Self {
        Self::new(ConfigScope::All)
    }
}

impl ConfigCache {
    pub fn new(scope: ConfigScope) -> Self {
        Self {
            inner: Arc::new(RwLock::new(HashMap::new())),
            defaults: Arc::new(LcmConfig::default()),
            scope,
        }
    }

    pub async fn load_or_default(&self, namespace: &str) -> Arc<LcmConfig> {
        self.inner
            .read()
            .await
            .get(namespace)
            .cloned()
            .unwrap_or_else(|| self.defaults.clone())
    }

    /// Parses `raw` and swaps it in. Returns whether the effective
    /// configuration changed.
    pub async fn update(
        &self,
        namespace: &str,
        raw: &BTreeMap<String, String>,
    ) -> bool {
        let parsed = Arc::new(read_configuration(raw, self.scope));
        let mut guard = self.inner.write().await;
        let previous = guard.insert(namespace.to_string(), parsed.clone());
        let effective = previous.unwrap_or_else(|| self.defaults.clone());
        effective != parsed
    }

    /// Forgets the namespace's custom entry. Returns whether one existed.
    pub async fn drop_namespace(&self, namespace: &str) -> bool {
        self.inner.write().await.remove(namespace).is_some()
    }

    pub async fn namespaces(&self) -> Vec<String> {
        self.inner.read().await.keys().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::lcmconfig::keys;

    fn raw(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    #[tokio::test]
    async fn unknown_namespace_reads_defaults() {
        let cache = ConfigCache::default();
        let cfg = cache.load_or_default("ceph-lcm").await;
        assert_eq!(*cfg, LcmConfig::default());
    }

    #[tokio::test]
    async fn update_then_drop_reverts_to_defaults() {
        let cache = ConfigCache::default();
        let changed = cache
            .update("ceph-lcm", &raw(&[(keys::ROOK_NAMESPACE, "rook")]))
            .await;
        assert!(changed);
        assert_eq!(cache.load_or_default("ceph-lcm").await.rook_namespace, "rook");
        assert_eq!(
            cache.load_or_default("other").await.rook_namespace,
            "rook-ceph"
        );

        assert!(cache.drop_namespace("ceph-lcm").await);
        assert!(!cache.drop_namespace("ceph-lcm").await);
        assert_eq!(
            cache.load_or_default("ceph-lcm").await.rook_namespace,
            "rook-ceph"
        );
    }

    #[tokio::test]
    async fn identical_update_reports_no_change() {
        let cache = ConfigCache::default();
        let input = raw(&[(keys::DISK_DAEMON_API_PORT, "9000")]);
        assert!(cache.update("ns", &input).await);
        assert!(!cache.update("ns", &input).await);
        // all-default content matches the implicit default
        assert!(!cache.update("fresh", &BTreeMap::new()).await);
    }

    #[tokio::test]
    async fn readers_keep_their_snapshot_across_updates() {
        let cache = ConfigCache::default();
        cache
            .update("ns", &raw(&[(keys::DISK_DAEMON_API_PORT, "9000")]))
            .await;
        let before = cache.load_or_default("ns").await;
        cache
            .update("ns", &raw(&[(keys::DISK_DAEMON_API_PORT, "9100")]))
            .await;
        assert_eq!(before.disk_daemon_port, 9000);
        assert_eq!(cache.load_or_default("ns").await.disk_daemon_port, 9100);
    }
}
