//! Narrows a watch stream down to lifecycle transitions.
//!
//! The infra controller reacts to an object appearing or disappearing; its
//! own periodic requeue covers everything in between, so updates are
//! dropped here before they reach the controller queue.

use std::collections::{HashMap, HashSet};

use kube::Resource;
use kube::runtime::watcher::Event;
use tracing::debug;

/// Stateful filter over watcher events. Admits an object the first time it
/// is seen (create) and when it goes away (delete). Objects that vanished
/// while the watch was re-listing are reported as deletes once the re-list
/// completes.
pub struct LifecycleFilter<K> {
    known: HashMap<String, K>,
    relisted: Option<HashSet<String>>,
}

impl<K> Default for LifecycleFilter<K> {
    fn default() -> Self {
        Self {
            known: HashMap::new(),
            relisted: None,
        }
    }
}

fn object_key<K: Resource>(obj: &K) -> String {
    let meta = obj.meta();
    match meta.uid.as_deref() {
        Some(uid) => uid.to_string(),
        None => format!(
            "{}/{}",
            meta.namespace.as_deref().unwrap_or_default(),
            meta.name.as_deref().unwrap_or_default()
        ),
    }
}

impl<K: Resource + Clone> LifecycleFilter<K> {
    /// Objects the event should trigger a reconcile for.
    pub fn admit(&mut self, event: Event<K>) -> Vec<K> {
        match event {
            Event::Init => {
                self.relisted = Some(HashSet::new());
                Vec::new()
            }
            Event::InitApply(obj) => {
                if let Some(seen) = self.relisted.as_mut() {
                    seen.insert(object_key(&obj));
                }
                self.observe(obj).into_iter().collect()
            }
            Event::Apply(obj) => self.observe(obj).into_iter().collect(),
            Event::Delete(obj) => {
                self.known.remove(&object_key(&obj));
                vec![obj]
            }
            Event::InitDone => {
                let Some(seen) = self.relisted.take() else {
                    return Vec::new();
                };
                let gone: Vec<String> = self
                    .known
                    .keys()
                    .filter(|k| !seen.contains(*k))
                    .cloned()
                    .collect();
                gone.iter()
                    .filter_map(|k| self.known.remove(k))
                    .collect()
            }
        }
    }

    /// `Some` only for an object not seen before.
    fn observe(&mut self, obj: K) -> Option<K> {
        let key = object_key(&obj);
        if self.known.insert(key, obj.clone()).is_some() {
            debug!(
                name = obj.meta().name.as_deref().unwrap_or_default(),
                "ignoring update event"
            );
            return None;
        }
        Some(obj)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crd::CephDeploymentHealth;
    use kube::core::ObjectMeta;

    fn health(name: &str, uid: &str, rv: &str) -> CephDeploymentHealth {
        CephDeploymentHealth {
            metadata: ObjectMeta {
                name: Some(name.into()),
                namespace: Some("ceph-lcm".into()),
                uid: Some(uid.into()),
                resource_version: Some(rv.into()),
                ..Default::default()
            },
            status: None,
        }
    }

    fn names(objs: Vec<CephDeploymentHealth>) -> Vec<String> {
        objs.into_iter()
            .filter_map(|o| o.metadata.name)
            .collect()
    }

    #[test]
    fn creates_pass_updates_drop() {
        let mut f = LifecycleFilter::default();
        assert_eq!(names(f.admit(Event::Apply(health("a", "1", "1")))), ["a"]);
        assert!(f.admit(Event::Apply(health("a", "1", "2"))).is_empty());
        assert!(f.admit(Event::Apply(health("a", "1", "3"))).is_empty());
    }

    #[test]
    fn deletes_pass() {
        let mut f = LifecycleFilter::default();
        f.admit(Event::Apply(health("a", "1", "1")));
        assert_eq!(names(f.admit(Event::Delete(health("a", "1", "2")))), ["a"]);
        // recreated under the same name is a new object
        assert_eq!(names(f.admit(Event::Apply(health("a", "2", "3")))), ["a"]);
    }

    #[test]
    fn initial_list_counts_as_creates() {
        let mut f = LifecycleFilter::default();
        assert!(f.admit(Event::Init).is_empty());
        assert_eq!(
            names(f.admit(Event::InitApply(health("a", "1", "1")))),
            ["a"]
        );
        assert_eq!(
            names(f.admit(Event::InitApply(health("b", "2", "1")))),
            ["b"]
        );
        assert!(f.admit(Event::InitDone).is_empty());
    }

    #[test]
    fn relist_reports_missed_deletes_only() {
        let mut f = LifecycleFilter::default();
        f.admit(Event::Apply(health("a", "1", "1")));
        f.admit(Event::Apply(health("b", "2", "1")));

        f.admit(Event::Init);
        assert!(f.admit(Event::InitApply(health("a", "1", "5"))).is_empty());
        assert_eq!(
            names(f.admit(Event::InitApply(health("c", "3", "1")))),
            ["c"]
        );
        assert_eq!(names(f.admit(Event::InitDone)), ["b"]);
        assert!(f.admit(Event::InitDone).is_empty());
    }
}
