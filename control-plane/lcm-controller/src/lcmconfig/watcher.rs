use std::collections::HashSet;

use futures_util::StreamExt;
use k8s_openapi::api::core::v1::ConfigMap;
use kube::runtime::{WatchStreamExt, watcher};
use kube::{Api, Client, ResourceExt};
use tracing::{debug, info, warn};

use super::ConfigCache;

/// Applies ConfigMap watch events to a [`ConfigCache`].
///
/// A re-list (`Init` .. `InitDone`) may hide deletions that happened while
/// the watch was down; namespaces not seen during the re-list are dropped
/// once it completes.
pub struct ConfigMapTracker {
    cache: ConfigCache,
    relisted: Option<HashSet<String>>,
}

impl ConfigMapTracker {
    pub fn new(cache: ConfigCache) -> Self {
        Self {
            cache,
            relisted: None,
        }
    }

    pub async fn apply(&mut self, event: watcher::Event<ConfigMap>) {
        match event {
            watcher::Event::Init => {
                self.relisted = Some(HashSet::new());
            }
            watcher::Event::InitApply(cm) => {
                if let Some(seen) = self.relisted.as_mut() {
                    seen.insert(cm.namespace().unwrap_or_default());
                }
                self.store(&cm).await;
            }
            watcher::Event::InitDone => {
                let seen = self.relisted.take().unwrap_or_default();
                for ns in self.cache.namespaces().await {
                    if !seen.contains(&ns) {
                        self.forget(&ns).await;
                    }
                }
            }
            watcher::Event::Apply(cm) => self.store(&cm).await,
            watcher::Event::Delete(cm) => {
                self.forget(&cm.namespace().unwrap_or_default()).await
            }
        }
    }

    async fn store(&self, cm: &ConfigMap) {
        let ns = cm.namespace().unwrap_or_default();
        let data = cm.data.clone().unwrap_or_default();
        if self.cache.update(&ns, &data).await {
            info!(
                %ns,
                name = %cm.name_any(),
                "lcm config changed, applied new parameters"
            );
        } else {
            debug!(%ns, name = %cm.name_any(), "lcm config unchanged");
        }
    }

    async fn forget(&self, ns: &str) {
        if self.cache.drop_namespace(ns).await {
            info!(
                %ns,
                "lcm config not found, looks like it's removed, default configuration will be used instead"
            );
        }
    }
}

/// Watches lcm ConfigMaps named `name` and keeps `cache` in sync until the
/// watch stream ends.
pub async fn watch_lcm_config(
    client: Client,
    cache: ConfigCache,
    name: String,
    namespace: Option<String>,
) -> anyhow::Result<()> {
    let api: Api<ConfigMap> = match namespace.as_deref() {
        Some(ns) => Api::namespaced(client, ns),
        None => Api::all(client),
    };
    let cfg =
        watcher::Config::default().fields(&format!("metadata.name={name}"));
    let mut tracker = ConfigMapTracker::new(cache);
    let mut events = watcher(api, cfg).default_backoff().boxed();

    info!(%name, "watching lcm config maps");
    while let Some(event) = events.next().await {
        match event {
            Ok(ev) => tracker.apply(ev).await,
            Err(e) => warn!(error = %e, "lcm config watch error"),
        }
    }
    Ok(())
}
