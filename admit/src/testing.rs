//! Test doubles for code built on top of the mutators
//!
//! [`FakeApi`] stands in for a typed API client. It keeps objects in an
//! in-memory [`ObjectTracker`], records every call as an [`Action`] and serves
//! label filtered lists and watch streams, so an admission flow can be replayed
//! end to end without a cluster.

use std::collections::BTreeMap;
use std::fmt::Debug;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use futures::channel::mpsc;
use futures::stream::BoxStream;
use futures::StreamExt;
use kube::core::admission::{AdmissionRequest, AdmissionReview};
use kube::core::{DynamicObject, WatchEvent};
use kube::{Resource, ResourceExt};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::{Value, json};
use thiserror::Error;

/// Errors returned by [`FakeApi`]
#[derive(Error, Debug)]
pub enum FakeError {
    #[error("{0} not found")]
    NotFound(String),

    #[error("{0} already exists")]
    AlreadyExists(String),

    #[error("invalid label selector: {0}")]
    InvalidSelector(String),

    #[error("object has no name")]
    MissingName,

    #[error("SerializationError: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Patch Error: {0}")]
    PatchError(#[from] json_patch::PatchError),
}

/// A call made against the fake client
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Action {
    Get { namespace: Option<String>, name: String },
    List { namespace: Option<String>, label_selector: Option<String> },
    Watch { namespace: Option<String>, label_selector: Option<String> },
    Create { namespace: Option<String>, name: String },
    Update { namespace: Option<String>, name: String },
    UpdateStatus { namespace: Option<String>, name: String },
    Delete { namespace: Option<String>, name: String },
    DeleteCollection { namespace: Option<String>, label_selector: Option<String> },
    Patch { namespace: Option<String>, name: String },
}

impl Action {
    pub const fn verb(&self) -> &'static str {
        match self {
            Self::Get { .. } => "get",
            Self::List { .. } => "list",
            Self::Watch { .. } => "watch",
            Self::Create { .. } => "create",
            Self::Update { .. } => "update",
            Self::UpdateStatus { .. } => "update",
            Self::Delete { .. } => "delete",
            Self::DeleteCollection { .. } => "delete-collection",
            Self::Patch { .. } => "patch",
        }
    }
}

type ObjectKey = (Option<String>, String);

struct TrackerState<K> {
    objects: BTreeMap<ObjectKey, K>,
    actions: Vec<Action>,
    watchers: Vec<(Option<String>, Selector, mpsc::UnboundedSender<WatchEvent<K>>)>,
}

/// In-memory object store shared by every [`FakeApi`] created from it
pub struct ObjectTracker<K> {
    state: Mutex<TrackerState<K>>,
}

impl<K> Default for ObjectTracker<K> {
    fn default() -> Self {
        Self {
            state: Mutex::new(TrackerState {
                objects: BTreeMap::new(),
                actions: Vec::new(),
                watchers: Vec::new(),
            }),
        }
    }
}

impl<K> ObjectTracker<K>
where
    K: Resource + Clone,
{
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Tracker pre-populated with `objects`, seeding records no actions
    pub fn with_objects(objects: impl IntoIterator<Item = K>) -> Arc<Self> {
        let tracker = Self::default();
        {
            let mut state = tracker.lock();
            for obj in objects {
                state.objects.insert(key_of(&obj), obj);
            }
        }
        Arc::new(tracker)
    }

    /// Every action recorded so far, oldest first
    pub fn actions(&self) -> Vec<Action> {
        self.lock().actions.clone()
    }

    pub fn clear_actions(&self) {
        self.lock().actions.clear();
    }

    fn lock(&self) -> MutexGuard<'_, TrackerState<K>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<K> TrackerState<K>
where
    K: Resource + Clone,
{
    fn notify(&mut self, event: impl Fn(K) -> WatchEvent<K>, obj: &K) {
        let namespace = obj.meta().namespace.clone();
        self.watchers.retain(|(ns, selector, tx)| {
            if ns.is_some() && ns != &namespace {
                return !tx.is_closed();
            }
            if !selector.matches(obj.labels()) {
                return !tx.is_closed();
            }
            tx.unbounded_send(event(obj.clone())).is_ok()
        });
    }
}

/// Typed view over an [`ObjectTracker`], namespaced or cluster wide
pub struct FakeApi<K> {
    tracker: Arc<ObjectTracker<K>>,
    namespace: Option<String>,
}

impl<K> Clone for FakeApi<K> {
    fn clone(&self) -> Self {
        Self {
            tracker: self.tracker.clone(),
            namespace: self.namespace.clone(),
        }
    }
}

impl<K> FakeApi<K>
where
    K: Resource + Clone + Serialize + DeserializeOwned + Debug + Send + 'static,
{
    /// View over objects in every namespace
    pub fn all(tracker: Arc<ObjectTracker<K>>) -> Self {
        Self {
            tracker,
            namespace: None,
        }
    }

    /// View over objects in `namespace`
    pub fn namespaced(tracker: Arc<ObjectTracker<K>>, namespace: &str) -> Self {
        Self {
            tracker,
            namespace: Some(namespace.to_string()),
        }
    }

    pub fn tracker(&self) -> &Arc<ObjectTracker<K>> {
        &self.tracker
    }

    pub fn get(&self, name: &str) -> Result<K, FakeError> {
        let mut state = self.tracker.lock();
        state.actions.push(Action::Get {
            namespace: self.namespace.clone(),
            name: name.to_string(),
        });

        state
            .objects
            .get(&self.key(name))
            .cloned()
            .ok_or_else(|| FakeError::NotFound(name.to_string()))
    }

    /// Objects in scope whose labels match `label_selector`
    pub fn list(&self, label_selector: Option<&str>) -> Result<Vec<K>, FakeError> {
        let selector = Selector::parse(label_selector)?;
        let mut state = self.tracker.lock();
        state.actions.push(Action::List {
            namespace: self.namespace.clone(),
            label_selector: label_selector.map(String::from),
        });

        Ok(state
            .objects
            .iter()
            .filter(|((ns, _), obj)| self.in_scope(ns) && selector.matches(obj.labels()))
            .map(|(_, obj)| obj.clone())
            .collect())
    }

    /// Stream of changes made after the call
    pub fn watch(
        &self,
        label_selector: Option<&str>,
    ) -> Result<BoxStream<'static, WatchEvent<K>>, FakeError> {
        let selector = Selector::parse(label_selector)?;
        let (tx, rx) = mpsc::unbounded();
        let mut state = self.tracker.lock();
        state.actions.push(Action::Watch {
            namespace: self.namespace.clone(),
            label_selector: label_selector.map(String::from),
        });
        state.watchers.push((self.namespace.clone(), selector, tx));

        Ok(rx.boxed())
    }

    pub fn create(&self, obj: &K) -> Result<K, FakeError> {
        let mut obj = obj.clone();
        if obj.meta().namespace.is_none() {
            obj.meta_mut().namespace = self.namespace.clone();
        }
        let name = obj.meta().name.clone().ok_or(FakeError::MissingName)?;

        let mut state = self.tracker.lock();
        state.actions.push(Action::Create {
            namespace: self.namespace.clone(),
            name: name.clone(),
        });

        let key = key_of(&obj);
        if state.objects.contains_key(&key) {
            return Err(FakeError::AlreadyExists(name));
        }
        state.objects.insert(key, obj.clone());
        state.notify(WatchEvent::Added, &obj);

        Ok(obj)
    }

    pub fn update(&self, obj: &K) -> Result<K, FakeError> {
        let name = obj.meta().name.clone().ok_or(FakeError::MissingName)?;
        let mut state = self.tracker.lock();
        state.actions.push(Action::Update {
            namespace: self.namespace.clone(),
            name: name.clone(),
        });

        self.store(&mut state, &name, obj.clone())
    }

    /// Replaces only the `status` of the stored object
    pub fn update_status(&self, obj: &K) -> Result<K, FakeError> {
        let name = obj.meta().name.clone().ok_or(FakeError::MissingName)?;
        let mut state = self.tracker.lock();
        state.actions.push(Action::UpdateStatus {
            namespace: self.namespace.clone(),
            name: name.clone(),
        });

        let current = state
            .objects
            .get(&self.key(&name))
            .cloned()
            .ok_or_else(|| FakeError::NotFound(name.clone()))?;
        let status = serde_json::to_value(obj)?
            .get("status")
            .cloned()
            .unwrap_or(Value::Null);

        let mut merged = serde_json::to_value(&current)?;
        merged["status"] = status;
        let merged = serde_json::from_value(merged)?;

        self.store(&mut state, &name, merged)
    }

    pub fn delete(&self, name: &str) -> Result<K, FakeError> {
        let mut state = self.tracker.lock();
        state.actions.push(Action::Delete {
            namespace: self.namespace.clone(),
            name: name.to_string(),
        });

        let obj = state
            .objects
            .remove(&self.key(name))
            .ok_or_else(|| FakeError::NotFound(name.to_string()))?;
        state.notify(WatchEvent::Deleted, &obj);

        Ok(obj)
    }

    /// Deletes every object in scope matching `label_selector`
    pub fn delete_collection(&self, label_selector: Option<&str>) -> Result<Vec<K>, FakeError> {
        let selector = Selector::parse(label_selector)?;
        let mut state = self.tracker.lock();
        state.actions.push(Action::DeleteCollection {
            namespace: self.namespace.clone(),
            label_selector: label_selector.map(String::from),
        });

        let keys: Vec<_> = state
            .objects
            .iter()
            .filter(|((ns, _), obj)| self.in_scope(ns) && selector.matches(obj.labels()))
            .map(|(key, _)| key.clone())
            .collect();

        let mut deleted = Vec::with_capacity(keys.len());
        for key in keys {
            if let Some(obj) = state.objects.remove(&key) {
                state.notify(WatchEvent::Deleted, &obj);
                deleted.push(obj);
            }
        }

        Ok(deleted)
    }

    /// Applies a JSON patch to the stored object
    pub fn patch(&self, name: &str, patch: &json_patch::Patch) -> Result<K, FakeError> {
        let mut state = self.tracker.lock();
        state.actions.push(Action::Patch {
            namespace: self.namespace.clone(),
            name: name.to_string(),
        });

        let current = state
            .objects
            .get(&self.key(name))
            .ok_or_else(|| FakeError::NotFound(name.to_string()))?;
        let mut doc = serde_json::to_value(current)?;
        json_patch::patch(&mut doc, &patch.0)?;
        let patched = serde_json::from_value(doc)?;

        self.store(&mut state, name, patched)
    }

    fn store(&self, state: &mut TrackerState<K>, name: &str, obj: K) -> Result<K, FakeError> {
        let key = self.key(name);
        if !state.objects.contains_key(&key) {
            return Err(FakeError::NotFound(name.to_string()));
        }
        state.objects.insert(key, obj.clone());
        state.notify(WatchEvent::Modified, &obj);

        Ok(obj)
    }

    fn key(&self, name: &str) -> ObjectKey {
        (self.namespace.clone(), name.to_string())
    }

    fn in_scope(&self, namespace: &Option<String>) -> bool {
        self.namespace.is_none() || &self.namespace == namespace
    }
}

fn key_of<K: Resource>(obj: &K) -> ObjectKey {
    (
        obj.meta().namespace.clone(),
        obj.meta().name.clone().unwrap_or_default(),
    )
}

#[derive(Clone, Debug, PartialEq, Eq)]
enum Requirement {
    Equals(String, String),
    NotEquals(String, String),
    Exists(String),
    DoesNotExist(String),
}

/// Equality based label selector: `a=b`, `a==b`, `a!=b`, `a` and `!a`
#[derive(Clone, Debug, Default, PartialEq, Eq)]
struct Selector(Vec<Requirement>);

impl Selector {
    fn parse(input: Option<&str>) -> Result<Self, FakeError> {
        let Some(input) = input else {
            return Ok(Self::default());
        };

        input
            .split(',')
            .map(str::trim)
            .filter(|term| !term.is_empty())
            .map(|term| {
                let invalid = || FakeError::InvalidSelector(input.to_string());
                let requirement = if let Some((key, value)) = term.split_once("!=") {
                    Requirement::NotEquals(key.trim().into(), value.trim().into())
                } else if let Some((key, value)) = term.split_once("==") {
                    Requirement::Equals(key.trim().into(), value.trim().into())
                } else if let Some((key, value)) = term.split_once('=') {
                    Requirement::Equals(key.trim().into(), value.trim().into())
                } else if let Some(key) = term.strip_prefix('!') {
                    Requirement::DoesNotExist(key.trim().into())
                } else {
                    Requirement::Exists(term.into())
                };

                let key = match &requirement {
                    Requirement::Equals(key, _)
                    | Requirement::NotEquals(key, _)
                    | Requirement::Exists(key)
                    | Requirement::DoesNotExist(key) => key,
                };
                if key.is_empty() {
                    Err(invalid())
                } else {
                    Ok(requirement)
                }
            })
            .collect::<Result<Vec<_>, _>>()
            .map(Self)
    }

    fn matches(&self, labels: &BTreeMap<String, String>) -> bool {
        self.0.iter().all(|requirement| match requirement {
            Requirement::Equals(key, value) => labels.get(key) == Some(value),
            Requirement::NotEquals(key, value) => labels.get(key) != Some(value),
            Requirement::Exists(key) => labels.contains_key(key),
            Requirement::DoesNotExist(key) => !labels.contains_key(key),
        })
    }
}

/// Admission review for an `Addon` in `harvester-system`, as sent by the API server
pub fn admission_review(
    operation: &str,
    object: Option<Value>,
    old_object: Option<Value>,
) -> Value {
    json!({
        "apiVersion": "admission.k8s.io/v1",
        "kind": "AdmissionReview",
        "request": {
            "uid": "test-uid",
            "kind": { "group": "harvesterhci.io", "version": "v1beta1", "kind": "Addon" },
            "resource": { "group": "harvesterhci.io", "version": "v1beta1", "resource": "addons" },
            "name": "vm-import",
            "namespace": "harvester-system",
            "operation": operation,
            "userInfo": { "username": "system:admin" },
            "object": object,
            "oldObject": old_object,
            "dryRun": false
        }
    })
}

/// Converted request for [`admission_review`]
pub fn admission_request(
    operation: &str,
    object: Option<Value>,
    old_object: Option<Value>,
) -> AdmissionRequest<DynamicObject> {
    let review: AdmissionReview<DynamicObject> =
        serde_json::from_value(admission_review(operation, object, old_object))
            .expect("valid admission review");
    review.try_into().expect("admission review carries a request")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::addon::{Addon, AddonSpec, AddonStatus};
    use crate::config::TrackerConfig;
    use crate::router::MutatorRouter;
    use crate::tracker::LastOperationTracker;
    use chrono::{DateTime, TimeZone, Utc};
    use std::sync::atomic::{AtomicI64, Ordering};

    fn addon(name: &str, namespace: &str, labels: &[(&str, &str)]) -> Addon {
        let mut addon = Addon::new(
            name,
            AddonSpec {
                chart: name.into(),
                version: "0.1.0".into(),
                ..Default::default()
            },
        );
        addon.metadata.namespace = Some(namespace.into());
        addon.metadata.labels = Some(
            labels
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
        );
        addon
    }

    #[test]
    fn test_selector_parse() {
        assert_eq!(Selector::parse(None).unwrap(), Selector::default());
        assert_eq!(
            Selector::parse(Some("a=1, b==2,c!=3,d,!e")).unwrap(),
            Selector(vec![
                Requirement::Equals("a".into(), "1".into()),
                Requirement::Equals("b".into(), "2".into()),
                Requirement::NotEquals("c".into(), "3".into()),
                Requirement::Exists("d".into()),
                Requirement::DoesNotExist("e".into()),
            ])
        );
        assert!(matches!(
            Selector::parse(Some("=x")),
            Err(FakeError::InvalidSelector(_))
        ));
    }

    #[test]
    fn test_selector_matches() {
        let labels: BTreeMap<String, String> =
            [("tier".to_string(), "core".to_string())].into_iter().collect();

        assert!(Selector::parse(Some("tier=core")).unwrap().matches(&labels));
        assert!(!Selector::parse(Some("tier!=core")).unwrap().matches(&labels));
        assert!(Selector::parse(Some("tier,!experimental")).unwrap().matches(&labels));
        assert!(!Selector::parse(Some("experimental")).unwrap().matches(&labels));
    }

    #[test]
    fn test_list_filters_by_namespace_and_labels() {
        let tracker = ObjectTracker::with_objects([
            addon("vm-import", "harvester-system", &[("tier", "core")]),
            addon("pcidevices", "harvester-system", &[("tier", "experimental")]),
            addon("rancher-logging", "cattle-logging-system", &[("tier", "core")]),
        ]);

        let all = FakeApi::all(tracker.clone());
        assert_eq!(all.list(None).unwrap().len(), 3);
        assert_eq!(all.list(Some("tier=core")).unwrap().len(), 2);

        let ns = FakeApi::namespaced(tracker.clone(), "harvester-system");
        let names: Vec<_> = ns
            .list(Some("tier=core"))
            .unwrap()
            .iter()
            .map(|a| a.name_any())
            .collect();
        assert_eq!(names, vec!["vm-import"]);

        assert_eq!(
            tracker.actions(),
            vec![
                Action::List { namespace: None, label_selector: None },
                Action::List { namespace: None, label_selector: Some("tier=core".into()) },
                Action::List {
                    namespace: Some("harvester-system".into()),
                    label_selector: Some("tier=core".into()),
                },
            ]
        );
    }

    #[test]
    fn test_create_get_delete() {
        let api = FakeApi::namespaced(ObjectTracker::new(), "harvester-system");
        let obj = addon("vm-import", "harvester-system", &[]);

        api.create(&obj).unwrap();
        assert!(matches!(api.create(&obj), Err(FakeError::AlreadyExists(_))));
        assert_eq!(api.get("vm-import").unwrap().spec.chart, "vm-import");

        api.delete("vm-import").unwrap();
        assert!(matches!(api.get("vm-import"), Err(FakeError::NotFound(_))));
        assert!(matches!(api.delete("vm-import"), Err(FakeError::NotFound(_))));

        let verbs: Vec<_> = api.tracker().actions().iter().map(Action::verb).collect();
        assert_eq!(
            verbs,
            vec!["create", "create", "get", "delete", "get", "delete"]
        );
    }

    #[test]
    fn test_update_requires_existing_object() {
        let api = FakeApi::namespaced(ObjectTracker::new(), "harvester-system");
        let obj = addon("vm-import", "harvester-system", &[]);

        assert!(matches!(api.update(&obj), Err(FakeError::NotFound(_))));
    }

    #[test]
    fn test_update_status_keeps_spec() {
        let api = FakeApi::namespaced(
            ObjectTracker::with_objects([addon("vm-import", "harvester-system", &[])]),
            "harvester-system",
        );

        let mut changed = addon("vm-import", "harvester-system", &[]);
        changed.spec.chart = "ignored".into();
        changed.status = Some(AddonStatus {
            status: Some("AddonDeploySuccessful".into()),
        });

        let stored = api.update_status(&changed).unwrap();
        assert_eq!(stored.spec.chart, "vm-import");
        assert_eq!(
            stored.status.unwrap().status.as_deref(),
            Some("AddonDeploySuccessful")
        );
    }

    #[test]
    fn test_delete_collection() {
        let tracker = ObjectTracker::with_objects([
            addon("vm-import", "harvester-system", &[("tier", "core")]),
            addon("pcidevices", "harvester-system", &[("tier", "experimental")]),
        ]);
        let api = FakeApi::namespaced(tracker, "harvester-system");

        let deleted = api.delete_collection(Some("tier=experimental")).unwrap();
        assert_eq!(deleted.len(), 1);
        assert_eq!(api.list(None).unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_watch_receives_matching_events() {
        let api = FakeApi::namespaced(ObjectTracker::new(), "harvester-system");
        let mut events = api.watch(Some("tier=core")).unwrap();

        api.create(&addon("pcidevices", "harvester-system", &[("tier", "experimental")]))
            .unwrap();
        api.create(&addon("vm-import", "harvester-system", &[("tier", "core")]))
            .unwrap();
        api.delete("vm-import").unwrap();

        match events.next().await {
            Some(WatchEvent::Added(obj)) => assert_eq!(obj.name_any(), "vm-import"),
            other => panic!("unexpected event: {other:?}"),
        }
        match events.next().await {
            Some(WatchEvent::Deleted(obj)) => assert_eq!(obj.name_any(), "vm-import"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    /// Replays create, enable and a plain update through the router and the
    /// fake client, applying each returned patch before the next request
    #[tokio::test]
    async fn test_last_operation_lifecycle() {
        let seconds = Arc::new(AtomicI64::new(0));
        let clock = {
            let seconds = seconds.clone();
            move || -> DateTime<Utc> {
                Utc.timestamp_opt(1_760_000_000 + seconds.load(Ordering::SeqCst), 0)
                    .unwrap()
            }
        };
        let router = MutatorRouter::new().mutator(LastOperationTracker::<Addon, _>::with_clock(
            TrackerConfig::default(),
            clock,
        ));
        let api = FakeApi::namespaced(ObjectTracker::new(), "harvester-system");
        let config = TrackerConfig::default();

        let mut draft = addon("vm-import", "harvester-system", &[]);
        draft.metadata.annotations = Some(
            [("example.com/owner".to_string(), "ops".to_string())]
                .into_iter()
                .collect(),
        );

        // create
        let req = admission_request("CREATE", Some(serde_json::to_value(&draft).unwrap()), None);
        let res = router.admit(&req).await;
        assert!(res.allowed);
        let patch: json_patch::Patch = serde_json::from_slice(&res.patch.unwrap()).unwrap();
        assert_eq!(patch.0.len(), 2);

        let mut doc = serde_json::to_value(&draft).unwrap();
        json_patch::patch(&mut doc, &patch.0).unwrap();
        let created: Addon = serde_json::from_value(doc).unwrap();
        let stored = api.create(&created).unwrap();

        let annotations = stored.annotations();
        assert_eq!(annotations[&config.last_operation_annotation], "create");
        assert_eq!(annotations[&config.timestamp_annotation], "2025-10-09T08:53:20Z");

        // enable
        seconds.store(30, Ordering::SeqCst);
        let mut enabled = stored.clone();
        enabled.spec.enabled = true;
        let req = admission_request(
            "UPDATE",
            Some(serde_json::to_value(&enabled).unwrap()),
            Some(serde_json::to_value(&stored).unwrap()),
        );
        let res = router.admit(&req).await;
        let patch: json_patch::Patch = serde_json::from_slice(&res.patch.unwrap()).unwrap();
        assert_eq!(patch.0.len(), 2);

        api.update(&enabled).unwrap();
        let stored = api.patch("vm-import", &patch).unwrap();
        assert_eq!(stored.annotations()[&config.last_operation_annotation], "enable");
        assert_eq!(
            stored.annotations()[&config.timestamp_annotation],
            "2025-10-09T08:53:50Z"
        );

        // plain update, label unchanged
        seconds.store(90, Ordering::SeqCst);
        let mut bumped = stored.clone();
        bumped.spec.version = "0.2.0".into();
        let req = admission_request(
            "UPDATE",
            Some(serde_json::to_value(&bumped).unwrap()),
            Some(serde_json::to_value(&stored).unwrap()),
        );
        let res = router.admit(&req).await;
        let patch: json_patch::Patch = serde_json::from_slice(&res.patch.unwrap()).unwrap();
        assert_eq!(
            serde_json::to_value(&patch).unwrap(),
            json!([{
                "op": "replace",
                "path": "/metadata/annotations/harvesterhci.io~1addon-last-operation-timestamp",
                "value": "2025-10-09T08:54:50Z"
            }])
        );

        api.update(&bumped).unwrap();
        let stored = api.patch("vm-import", &patch).unwrap();
        assert_eq!(stored.annotations()[&config.last_operation_annotation], "enable");
        assert_eq!(stored.annotations()["example.com/owner"], "ops");
        assert_eq!(stored.spec.version, "0.2.0");

        let verbs: Vec<_> = api.tracker().actions().iter().map(Action::verb).collect();
        assert_eq!(verbs, vec!["create", "update", "patch", "update", "patch"]);
    }
}
