//! Value-level drift between a desired child object and the live one.

use serde::Serialize;
use serde_json::Value as Json;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct DiffSummary {
    pub adds: usize,
    pub updates: usize,
    pub removes: usize,
    /// Removes under an owned path: the builder dropped a field it manages.
    pub cleared: usize,
}

impl DiffSummary {
    /// Fields only present in the live object force an update only when they
    /// sit under an owned path.
    pub fn needs_update(&self) -> bool {
        self.adds + self.updates + self.cleared > 0
    }
}

/// Whether `path` matches one of the `/`-separated patterns. `*` matches any
/// single key or array index.
fn is_owned(path: &[String], owned: &[&str]) -> bool {
    owned.iter().any(|pattern| {
        let segs: Vec<&str> = pattern.trim_start_matches('/').split('/').collect();
        segs.len() == path.len() && segs.iter().zip(path).all(|(p, k)| *p == "*" || p == k)
    })
}

/// Drops server-owned fields that never take part in a comparison.
pub fn strip_noisy(mut v: Json) -> Json {
    if let Some(meta) = v.get_mut("metadata").and_then(Json::as_object_mut) {
        meta.remove("managedFields");
        meta.remove("resourceVersion");
        meta.remove("generation");
        meta.remove("creationTimestamp");
        meta.remove("uid");
        meta.remove("selfLink");
    }
    if let Some(obj) = v.as_object_mut() {
        obj.remove("status");
    }
    v
}

fn is_blank(v: &Json) -> bool {
    match v {
        Json::Null => true,
        Json::Object(m) => m.is_empty(),
        Json::Array(a) => a.is_empty(),
        _ => false,
    }
}

/// Counts how `target` departs from `base`. Objects recurse per key, arrays
/// of equal length recurse per element; a blank target value matches an
/// absent base value.
pub fn diff_summary(target: &Json, base: &Json) -> DiffSummary {
    diff_owned(target, base, &[])
}

/// Like [`diff_summary`], but a non-blank base value missing from `target`
/// at one of the `owned` paths counts as `cleared`.
pub fn diff_owned(target: &Json, base: &Json, owned: &[&str]) -> DiffSummary {
    fn walk(a: &Json, b: &Json, path: &mut Vec<String>, owned: &[&str], s: &mut DiffSummary) {
        match (a, b) {
            (Json::Object(ao), Json::Object(bo)) => {
                for (k, av) in ao {
                    match bo.get(k) {
                        Some(bv) if av == bv => {}
                        Some(bv) => {
                            path.push(k.clone());
                            walk(av, bv, path, owned, s);
                            path.pop();
                        }
                        None if is_blank(av) => {}
                        None => s.adds += 1,
                    }
                }
                for (k, bv) in bo.iter().filter(|(k, _)| !ao.contains_key(*k)) {
                    path.push(k.clone());
                    if !is_blank(bv) && is_owned(path, owned) {
                        s.cleared += 1;
                    } else {
                        s.removes += 1;
                    }
                    path.pop();
                }
            }
            (Json::Array(aa), Json::Array(bb)) if aa.len() == bb.len() => {
                for (i, (av, bv)) in aa.iter().zip(bb).enumerate() {
                    if av != bv {
                        path.push(i.to_string());
                        walk(av, bv, path, owned, s);
                        path.pop();
                    }
                }
            }
            (Json::Array(aa), Json::Array(bb)) => {
                if aa.len() > bb.len() {
                    s.adds += aa.len() - bb.len();
                } else {
                    s.removes += bb.len() - aa.len();
                }
                s.updates += 1;
            }
            (av, Json::Null) if is_blank(av) => {}
            (av, bv) => {
                if av != bv {
                    s.updates += 1;
                }
            }
        }
    }
    let mut s = DiffSummary::default();
    walk(target, base, &mut Vec::new(), owned, &mut s);
    s
}

/// Diff of two typed objects after stripping server-owned fields.
pub fn object_diff<K: Serialize>(desired: &K, current: &K, owned: &[&str]) -> DiffSummary {
    let (Ok(desired), Ok(current)) = (serde_json::to_value(desired), serde_json::to_value(current)) else {
        // unserializable objects are always rewritten
        return DiffSummary { updates: 1, ..Default::default() };
    };
    diff_owned(&strip_noisy(desired), &strip_noisy(current), owned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn strip_noisy_prunes_common_fields() {
        let v = json!({
            "apiVersion": "v1",
            "kind": "ConfigMap",
            "metadata": {
                "name": "x",
                "namespace": "ns",
                "managedFields": [ {"foo": "bar"} ],
                "resourceVersion": "123",
                "generation": 5,
                "creationTimestamp": "2020-01-01T00:00:00Z"
            },
            "status": { "obs": true },
            "data": { "k": "v" }
        });
        let pruned = strip_noisy(v);
        let meta = pruned.get("metadata").unwrap().as_object().unwrap();
        assert!(!meta.contains_key("managedFields"));
        assert!(!meta.contains_key("resourceVersion"));
        assert!(!meta.contains_key("generation"));
        assert!(!meta.contains_key("creationTimestamp"));
        assert!(!pruned.as_object().unwrap().contains_key("status"));
        assert_eq!(pruned["data"]["k"], "v");
    }

    #[test]
    fn diff_summary_counts_adds_updates_removes() {
        let base = json!({ "a": 1, "b": { "x": 1 }, "c": [1, 2, 3], "e": "server" });
        let target = json!({ "a": 2, "b": { "x": 1, "y": 2 }, "c": [1, 9], "d": true });
        let s = diff_summary(&target, &base);
        assert_eq!(s.adds, 2);
        assert_eq!(s.updates, 2);
        assert_eq!(s.removes, 2);
        assert!(s.needs_update());
    }

    #[test]
    fn server_defaults_do_not_force_updates() {
        let live = json!({
            "spec": {
                "containers": [{ "name": "grafana", "imagePullPolicy": "IfNotPresent", "terminationMessagePath": "/dev/termination-log" }],
                "dnsPolicy": "ClusterFirst"
            }
        });
        let desired = json!({ "spec": { "containers": [{ "name": "grafana" }], "nodeSelector": {}, "tolerations": null } });
        let s = diff_summary(&desired, &live);
        assert!(!s.needs_update(), "{:?}", s);
        assert_eq!(s.removes, 3);
    }

    #[test]
    fn dropped_owned_field_is_cleared() {
        let owned = ["/spec/nodeSelector", "/spec/containers/*/env", "/spec/securityContext"];
        let live = json!({
            "spec": {
                "nodeSelector": { "disk": "ssd" },
                "securityContext": {},
                "containers": [{ "name": "grafana", "env": [{ "name": "A" }], "imagePullPolicy": "Always" }],
                "dnsPolicy": "ClusterFirst"
            }
        });
        let desired = json!({ "spec": { "containers": [{ "name": "grafana" }] } });
        let s = diff_owned(&desired, &live, &owned);
        assert_eq!(s.cleared, 2);
        assert_eq!(s.removes, 3);
        assert!(s.needs_update());
        assert!(!diff_summary(&desired, &live).needs_update());
    }

    #[test]
    fn changed_list_element_is_an_update() {
        let live = json!({ "env": [{ "name": "LAST_CONFIG", "value": "a" }] });
        let desired = json!({ "env": [{ "name": "LAST_CONFIG", "value": "b" }] });
        assert_eq!(diff_summary(&desired, &live).updates, 1);
    }
}
