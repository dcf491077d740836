//! In-memory [`Cluster`] used by tests and dry runs.
//!
//! Objects are stored as JSON per (apiVersion/kind, namespace, name). Writes
//! bump a global resourceVersion, `replace` rejects stale versions and keeps
//! the stored status, and deleting an object that still carries finalizers
//! only marks it with a deletionTimestamp.

use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{SecondsFormat, Utc};
use grafop_core::{Error, ErrorKind, Result};
use serde_json::Value;

use crate::cluster::{identity, Cluster, EventNote, Object};

type Key = (String, String, String);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedEvent {
    pub kind: String,
    pub namespace: String,
    pub name: String,
    pub event: EventNote,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<Key, Value>,
    namespaces: BTreeMap<String, BTreeMap<String, String>>,
    events: Vec<RecordedEvent>,
    failures: BTreeMap<Key, ErrorKind>,
    version: u64,
    writes: u64,
}

#[derive(Default)]
pub struct MemoryCluster {
    inner: Mutex<Inner>,
}

fn type_key<K: Object>() -> String {
    format!("{}/{}", K::api_version(&()), K::kind(&()))
}

fn error_of(kind: ErrorKind, what: String) -> Error {
    match kind {
        ErrorKind::NotFound => Error::NotFound(what),
        ErrorKind::Conflict => Error::Conflict(what),
        ErrorKind::TransientNetwork => Error::Network(what),
        ErrorKind::Validation => Error::Validation(what),
        ErrorKind::Fatal => Error::Fatal(what),
    }
}

fn has_finalizers(v: &Value) -> bool {
    v.pointer("/metadata/finalizers").and_then(Value::as_array).map(|f| !f.is_empty()).unwrap_or(false)
}

fn is_deleting(v: &Value) -> bool {
    v.pointer("/metadata/deletionTimestamp").map(|t| !t.is_null()).unwrap_or(false)
}

fn set_meta(v: &mut Value, field: &str, value: Value) {
    if let Some(meta) = v.get_mut("metadata").and_then(Value::as_object_mut) {
        meta.insert(field.to_string(), value);
    }
}

impl Inner {
    fn next_version(&mut self) -> String {
        self.version += 1;
        self.version.to_string()
    }

    fn take_failure(&mut self, key: &Key) -> Option<Error> {
        self.failures.remove(key).map(|kind| error_of(kind, format!("injected failure for {}/{}", key.1, key.2)))
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn set_namespace_labels(&self, namespace: &str, labels: BTreeMap<String, String>) {
        self.lock().namespaces.insert(namespace.to_string(), labels);
    }

    /// Makes the next create, replace or status write of the named object fail.
    pub fn fail_next_write<K: Object>(&self, namespace: &str, name: &str, kind: ErrorKind) {
        self.lock().failures.insert((type_key::<K>(), namespace.to_string(), name.to_string()), kind);
    }

    pub fn events(&self) -> Vec<RecordedEvent> {
        self.lock().events.clone()
    }

    /// Number of successful create, replace, status and delete calls.
    pub fn writes(&self) -> u64 {
        self.lock().writes
    }

    pub fn contains<K: Object>(&self, namespace: &str, name: &str) -> bool {
        self.lock().objects.contains_key(&(type_key::<K>(), namespace.to_string(), name.to_string()))
    }

    /// Overwrites the stored status of an object, as the API server or kubelet would.
    pub fn set_status<K: Object>(&self, namespace: &str, name: &str, status: Value) {
        let mut inner = self.lock();
        if let Some(v) = inner.objects.get_mut(&(type_key::<K>(), namespace.to_string(), name.to_string())) {
            if let Some(o) = v.as_object_mut() {
                o.insert("status".into(), status);
            }
        }
    }
}

#[async_trait]
impl Cluster for MemoryCluster {
    async fn get<K: Object>(&self, namespace: &str, name: &str) -> Result<Option<K>> {
        let key = (type_key::<K>(), namespace.to_string(), name.to_string());
        let inner = self.lock();
        match inner.objects.get(&key) {
            Some(v) => Ok(Some(serde_json::from_value(v.clone())?)),
            None => Ok(None),
        }
    }

    async fn list<K: Object>(&self, namespace: &str) -> Result<Vec<K>> {
        let tk = type_key::<K>();
        let inner = self.lock();
        inner
            .objects
            .iter()
            .filter(|((t, ns, _), _)| *t == tk && ns == namespace)
            .map(|(_, v)| serde_json::from_value(v.clone()).map_err(Error::from))
            .collect()
    }

    async fn create<K: Object>(&self, obj: &K) -> Result<K> {
        let (ns, name) = identity(obj)?;
        let key = (type_key::<K>(), ns, name);
        let mut inner = self.lock();
        if let Some(err) = inner.take_failure(&key) {
            return Err(err);
        }
        if inner.objects.contains_key(&key) {
            return Err(Error::Conflict(format!("{} {}/{} already exists", K::kind(&()), key.1, key.2)));
        }
        let mut v = serde_json::to_value(obj)?;
        let rv = inner.next_version();
        set_meta(&mut v, "resourceVersion", Value::String(rv.clone()));
        set_meta(&mut v, "uid", Value::String(format!("uid-{}", rv)));
        inner.writes += 1;
        inner.objects.insert(key, v.clone());
        Ok(serde_json::from_value(v)?)
    }

    async fn replace<K: Object>(&self, obj: &K) -> Result<K> {
        let (ns, name) = identity(obj)?;
        let key = (type_key::<K>(), ns, name);
        let mut inner = self.lock();
        if let Some(err) = inner.take_failure(&key) {
            return Err(err);
        }
        let Some(stored) = inner.objects.get(&key).cloned() else {
            return Err(Error::NotFound(format!("{} {}/{}", K::kind(&()), key.1, key.2)));
        };
        let stored_rv = stored.pointer("/metadata/resourceVersion").cloned();
        if let Some(rv) = obj.meta().resource_version.as_ref() {
            if stored_rv.as_ref().and_then(Value::as_str) != Some(rv.as_str()) {
                return Err(Error::Conflict(format!(
                    "{} {}/{}: resourceVersion {} is stale",
                    K::kind(&()),
                    key.1,
                    key.2,
                    rv
                )));
            }
        }
        let mut v = serde_json::to_value(obj)?;
        if let Some(o) = v.as_object_mut() {
            match stored.get("status") {
                Some(s) => o.insert("status".into(), s.clone()),
                None => o.remove("status"),
            };
        }
        for field in ["uid", "deletionTimestamp"] {
            if let Some(val) = stored.pointer(&format!("/metadata/{}", field)) {
                set_meta(&mut v, field, val.clone());
            }
        }
        let rv = inner.next_version();
        set_meta(&mut v, "resourceVersion", Value::String(rv));
        inner.writes += 1;
        if is_deleting(&v) && !has_finalizers(&v) {
            inner.objects.remove(&key);
        } else {
            inner.objects.insert(key, v.clone());
        }
        Ok(serde_json::from_value(v)?)
    }

    async fn update_status<K: Object>(&self, obj: &K) -> Result<()> {
        let (ns, name) = identity(obj)?;
        let key = (type_key::<K>(), ns, name);
        let mut inner = self.lock();
        if let Some(err) = inner.take_failure(&key) {
            return Err(err);
        }
        let status = serde_json::to_value(obj)?.get("status").cloned().unwrap_or(Value::Null);
        let rv = inner.next_version();
        let Some(stored) = inner.objects.get_mut(&key) else {
            return Err(Error::NotFound(format!("{} {}/{}", K::kind(&()), key.1, key.2)));
        };
        if let Some(o) = stored.as_object_mut() {
            o.insert("status".into(), status);
        }
        set_meta(stored, "resourceVersion", Value::String(rv));
        inner.writes += 1;
        Ok(())
    }

    async fn delete<K: Object>(&self, namespace: &str, name: &str) -> Result<()> {
        let key = (type_key::<K>(), namespace.to_string(), name.to_string());
        let mut inner = self.lock();
        let rv = inner.next_version();
        let Some(stored) = inner.objects.get_mut(&key) else {
            return Err(Error::NotFound(format!("{} {}/{}", K::kind(&()), namespace, name)));
        };
        if has_finalizers(stored) {
            if !is_deleting(stored) {
                let now = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
                set_meta(stored, "deletionTimestamp", Value::String(now));
                set_meta(stored, "resourceVersion", Value::String(rv));
            }
        } else {
            inner.objects.remove(&key);
        }
        inner.writes += 1;
        Ok(())
    }

    async fn namespace_labels(&self, namespace: &str) -> Result<BTreeMap<String, String>> {
        Ok(self.lock().namespaces.get(namespace).cloned().unwrap_or_default())
    }

    async fn record_event<K: Object>(&self, obj: &K, event: EventNote) -> Result<()> {
        let meta = obj.meta();
        self.lock().events.push(RecordedEvent {
            kind: K::kind(&()).to_string(),
            namespace: meta.namespace.clone().unwrap_or_default(),
            name: meta.name.clone().unwrap_or_default(),
            event,
        });
        Ok(())
    }
}
