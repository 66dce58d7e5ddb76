// In-memory cluster and fixtures shared by the integration tests.
#![allow(dead_code)]

use std::collections::{BTreeMap, HashMap};
use std::sync::Mutex;

use async_trait::async_trait;
use k8s_openapi::api::apps::v1::Deployment;
use kube::Resource;
use kube::core::ErrorResponse;
use serde_json::{Value, json};

use lcm_controller::cluster::{ClusterApi, ClusterObject};

pub const HEALTH_NS: &str = "ceph-lcm";
pub const ROOK_NS: &str = "rook-ceph";
pub const CLUSTER: &str = "cephcluster";

type Key = (String, String, String);

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Write {
    Create { kind: String, name: String },
    Replace { kind: String, name: String },
    Scale { name: String, replicas: i32 },
}

/// Object store keyed by (kind, namespace, name). Every mutation is
/// recorded so tests can assert on what a reconcile wrote.
#[derive(Default)]
pub struct FakeCluster {
    objects: Mutex<HashMap<Key, Value>>,
    writes: Mutex<Vec<Write>>,
    failures: Mutex<HashMap<(&'static str, String), u16>>,
    attempts: Mutex<Vec<(&'static str, String)>>,
}

fn api_error(code: u16, message: String) -> kube::Error {
    let reason = match code {
        404 => "NotFound",
        409 => "AlreadyExists",
        _ => "InternalError",
    };
    kube::Error::Api(ErrorResponse {
        status: "Failure".into(),
        message,
        reason: reason.into(),
        code,
    })
}

/// Fields the API server fills in on every stored workload: each container
/// comes back with a `resources` object and empty toleration lists are
/// dropped.
fn apply_server_defaults(value: &mut Value) {
    let Some(pod) = value
        .pointer_mut("/spec/template/spec")
        .and_then(Value::as_object_mut)
    else {
        return;
    };
    for field in ["initContainers", "containers"] {
        if let Some(Value::Array(containers)) = pod.get_mut(field) {
            for c in containers.iter_mut().filter_map(Value::as_object_mut) {
                c.entry("resources").or_insert_with(|| json!({}));
            }
        }
    }
    if pod
        .get("tolerations")
        .and_then(Value::as_array)
        .is_some_and(|t| t.is_empty())
    {
        pod.remove("tolerations");
    }
}

fn key<K: ClusterObject>(namespace: &str, name: &str) -> Key {
    (K::kind(&()).to_string(), namespace.to_string(), name.to_string())
}

impl FakeCluster {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert<K: ClusterObject>(&self, obj: &K) {
        let ns = obj.meta().namespace.clone().unwrap_or_default();
        let name = obj.meta().name.clone().unwrap_or_default();
        let value = serde_json::to_value(obj).expect("serializable object");
        self.objects
            .lock()
            .unwrap()
            .insert(key::<K>(&ns, &name), value);
    }

    pub fn remove<K: ClusterObject>(&self, namespace: &str, name: &str) {
        self.objects
            .lock()
            .unwrap()
            .remove(&key::<K>(namespace, name));
    }

    pub fn get<K: ClusterObject>(&self, namespace: &str, name: &str) -> Option<K> {
        self.objects
            .lock()
            .unwrap()
            .get(&key::<K>(namespace, name))
            .map(|v| serde_json::from_value(v.clone()).expect("stored object"))
    }

    /// Mutates a stored object in place, bypassing the write log.
    pub fn edit<K: ClusterObject>(
        &self,
        namespace: &str,
        name: &str,
        f: impl FnOnce(&mut K),
    ) {
        let mut obj: K = self.get(namespace, name).expect("object to edit");
        f(&mut obj);
        self.insert(&obj);
    }

    /// Makes `verb` on `kind` fail with `code` until cleared.
    pub fn fail(&self, verb: &'static str, kind: &str, code: u16) {
        self.failures
            .lock()
            .unwrap()
            .insert((verb, kind.to_string()), code);
    }

    pub fn writes(&self) -> Vec<Write> {
        self.writes.lock().unwrap().clone()
    }

    pub fn clear_writes(&self) {
        self.writes.lock().unwrap().clear();
    }

    /// Calls of `verb` on `kind`, failed ones included.
    pub fn attempts(&self, verb: &str, kind: &str) -> usize {
        self.attempts
            .lock()
            .unwrap()
            .iter()
            .filter(|(v, k)| *v == verb && k == kind)
            .count()
    }

    fn check(&self, verb: &'static str, kind: &str) -> Result<(), kube::Error> {
        self.attempts
            .lock()
            .unwrap()
            .push((verb, kind.to_string()));
        match self.failures.lock().unwrap().get(&(verb, kind.to_string())) {
            Some(code) => Err(api_error(*code, format!("injected {verb} failure"))),
            None => Ok(()),
        }
    }

    fn record(&self, write: Write) {
        self.writes.lock().unwrap().push(write);
    }
}

#[async_trait]
impl ClusterApi for FakeCluster {
    async fn get_opt<K: ClusterObject>(
        &self,
        namespace: &str,
        name: &str,
    ) -> Result<Option<K>, kube::Error> {
        self.check("get", &K::kind(&()))?;
        let found = self
            .objects
            .lock()
            .unwrap()
            .get(&key::<K>(namespace, name))
            .cloned();
        found
            .map(serde_json::from_value)
            .transpose()
            .map_err(kube::Error::SerdeError)
    }

    async fn list<K: ClusterObject>(
        &self,
        namespace: &str,
    ) -> Result<Vec<K>, kube::Error> {
        let kind = K::kind(&()).to_string();
        self.check("list", &kind)?;
        let mut found: Vec<(String, Value)> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|((k, ns, _), _)| *k == kind && ns == namespace)
            .map(|((_, _, name), v)| (name.clone(), v.clone()))
            .collect();
        found.sort_by(|a, b| a.0.cmp(&b.0));
        found
            .into_iter()
            .map(|(_, v)| serde_json::from_value(v).map_err(kube::Error::SerdeError))
            .collect()
    }

    async fn create<K: ClusterObject>(
        &self,
        namespace: &str,
        obj: &K,
    ) -> Result<K, kube::Error> {
        let kind = K::kind(&()).to_string();
        self.check("create", &kind)?;
        let name = obj.meta().name.clone().unwrap_or_default();
        let k = key::<K>(namespace, &name);
        let mut value =
            serde_json::to_value(obj).map_err(kube::Error::SerdeError)?;
        apply_server_defaults(&mut value);
        {
            let mut objects = self.objects.lock().unwrap();
            if objects.contains_key(&k) {
                return Err(api_error(409, format!("{kind} {name} exists")));
            }
            objects.insert(k, value);
        }
        self.record(Write::Create { kind, name });
        Ok(obj.clone())
    }

    async fn replace<K: ClusterObject>(
        &self,
        namespace: &str,
        obj: &K,
    ) -> Result<K, kube::Error> {
        let kind = K::kind(&()).to_string();
        self.check("replace", &kind)?;
        let name = obj.meta().name.clone().unwrap_or_default();
        let k = key::<K>(namespace, &name);
        let mut value =
            serde_json::to_value(obj).map_err(kube::Error::SerdeError)?;
        apply_server_defaults(&mut value);
        {
            let mut objects = self.objects.lock().unwrap();
            if !objects.contains_key(&k) {
                return Err(api_error(404, format!("{kind} {name} not found")));
            }
            objects.insert(k, value);
        }
        self.record(Write::Replace { kind, name });
        Ok(obj.clone())
    }

    async fn scale_deployment(
        &self,
        namespace: &str,
        name: &str,
        replicas: i32,
    ) -> Result<(), kube::Error> {
        self.check("scale", "Deployment")?;
        {
            let mut objects = self.objects.lock().unwrap();
            let Some(value) = objects.get_mut(&key::<Deployment>(namespace, name))
            else {
                return Err(api_error(404, format!("Deployment {name} not found")));
            };
            value["spec"]["replicas"] = json!(replicas);
        }
        self.record(Write::Scale {
            name: name.to_string(),
            replicas,
        });
        Ok(())
    }
}

fn from_json<K: ClusterObject>(value: Value) -> K {
    serde_json::from_value(value).expect("fixture object")
}

pub fn health(uid: &str) -> lcm_controller::crd::CephDeploymentHealth {
    from_json(json!({
        "metadata": {"name": CLUSTER, "namespace": HEALTH_NS, "uid": uid}
    }))
}

pub fn ceph_cluster(external: bool) -> lcm_controller::crd::CephCluster {
    from_json(json!({
        "apiVersion": "ceph.rook.io/v1",
        "kind": "CephCluster",
        "metadata": {"name": CLUSTER, "namespace": ROOK_NS, "uid": "cluster-uid"},
        "spec": {
            "external": {"enable": external},
            "placement": {
                "osd": {
                    "tolerations": [
                        {"key": "storage", "operator": "Exists", "effect": "NoSchedule"}
                    ]
                }
            }
        },
        "status": {"cephVersion": {"image": "ceph:v19.2.3", "version": "19.2.3-0"}}
    }))
}

pub fn rook_operator(replicas: i32) -> Deployment {
    from_json(json!({
        "metadata": {"name": "rook-ceph-operator", "namespace": ROOK_NS},
        "spec": {
            "replicas": replicas,
            "selector": {"matchLabels": {"app": "rook-ceph-operator"}},
            "strategy": {"type": "Recreate"},
            "template": {
                "metadata": {"labels": {"app": "rook-ceph-operator"}},
                "spec": {
                    "serviceAccountName": "rook-ceph-system",
                    "containers": [
                        {"name": "rook-ceph-operator", "image": "rook/ceph:v1.17.4"}
                    ]
                }
            }
        }
    }))
}

pub fn object_store(name: &str, ca_ref: Option<&str>) -> lcm_controller::crd::CephObjectStore {
    from_json(json!({
        "apiVersion": "ceph.rook.io/v1",
        "kind": "CephObjectStore",
        "metadata": {"name": name, "namespace": ROOK_NS},
        "spec": {"gateway": {"caBundleRef": ca_ref}}
    }))
}

pub fn ca_secret(name: &str, pem: &str) -> k8s_openapi::api::core::v1::Secret {
    k8s_openapi::api::core::v1::Secret {
        metadata: kube::core::ObjectMeta {
            name: Some(name.into()),
            namespace: Some(ROOK_NS.into()),
            ..Default::default()
        },
        data: Some(BTreeMap::from([(
            "cabundle".to_string(),
            k8s_openapi::ByteString(pem.as_bytes().to_vec()),
        )])),
        ..Default::default()
    }
}

pub fn maintenance(state: &str) -> lcm_controller::crd::CephDeploymentMaintenance {
    from_json(json!({
        "metadata": {"name": CLUSTER, "namespace": HEALTH_NS},
        "status": {"state": state}
    }))
}

pub fn remove_task(
    name: &str,
    phase: &str,
    resolved: bool,
) -> lcm_controller::crd::CephOsdRemoveTask {
    from_json(json!({
        "apiVersion": "lcm.mirantis.com/v1alpha1",
        "kind": "CephOsdRemoveTask",
        "metadata": {"name": name, "namespace": HEALTH_NS},
        "spec": {"approve": true, "resolved": resolved},
        "status": {"phase": phase}
    }))
}

/// A cluster holding everything a full infra pass needs.
pub fn seeded(external: bool) -> FakeCluster {
    let cluster = FakeCluster::new();
    cluster.insert(&health("health-uid"));
    cluster.insert(&ceph_cluster(external));
    cluster.insert(&rook_operator(1));
    cluster
}
