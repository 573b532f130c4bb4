//! Records the last lifecycle operation performed on a resource
//!
//! On every create or update the tracker derives a label (`create`, `update`,
//! `enable` or `disable`) and patches two annotations on the object: the label
//! itself and the time it was recorded. Repeating the same operation leaves the
//! label untouched and only refreshes the timestamp.

use std::collections::BTreeMap;
use std::fmt;
use std::marker::PhantomData;

use async_trait::async_trait;
use chrono::{DateTime, SecondsFormat, Utc};
use kube::{Resource, ResourceExt};
use serde::de::DeserializeOwned;
use tracing::info;

use crate::addon::Addon;
use crate::clock::{Clock, SystemClock};
use crate::config::TrackerConfig;
use crate::error::HandlerError;
use crate::mutator::Mutator;
use crate::patch::{PatchOp, PatchOps, annotation_path};
use crate::request::Request;
use crate::resource::{OperationType, ResourceDescriptor};
use crate::scope::ScopeExt;

/// Resources carrying an on/off switch in their spec
pub trait Toggle {
    fn enabled(&self) -> bool;
}

impl Toggle for Addon {
    fn enabled(&self) -> bool {
        self.spec.enabled
    }
}

/// Label stored in the last operation annotation
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LastOperation {
    Create,
    Update,
    Enable,
    Disable,
}

impl LastOperation {
    /// Label for an update, refined when the toggle flipped
    pub const fn for_update(old_enabled: bool, new_enabled: bool) -> Self {
        match (old_enabled, new_enabled) {
            (false, true) => Self::Enable,
            (true, false) => Self::Disable,
            _ => Self::Update,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "create",
            Self::Update => "update",
            Self::Enable => "enable",
            Self::Disable => "disable",
        }
    }
}

impl fmt::Display for LastOperation {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Timestamp as stored in the annotation, seconds precision with a `Z` suffix
pub fn format_timestamp(time: DateTime<Utc>) -> String {
    time.to_rfc3339_opts(SecondsFormat::Secs, true)
}

/// Computes the patch recording `operation` at `now`
///
/// The label entry is `add` when missing, `replace` when it holds another
/// label and left out when it already holds `operation`. The timestamp entry
/// is always present.
pub fn patch_last_operation(
    annotations: Option<&BTreeMap<String, String>>,
    config: &TrackerConfig,
    operation: LastOperation,
    now: DateTime<Utc>,
) -> PatchOps {
    let mut ops = PatchOps::new();

    let last = annotations.and_then(|a| a.get(&config.last_operation_annotation));
    match last {
        Some(last) if last == operation.as_str() => {}
        Some(_) => ops.push(PatchOp::replace(
            annotation_path(&config.last_operation_annotation),
            operation.as_str(),
        )),
        None => ops.push(PatchOp::add(
            annotation_path(&config.last_operation_annotation),
            operation.as_str(),
        )),
    }

    let has_timestamp =
        annotations.is_some_and(|a| a.contains_key(&config.timestamp_annotation));
    ops.push(PatchOp::upsert(
        annotation_path(&config.timestamp_annotation),
        format_timestamp(now),
        has_timestamp,
    ));

    ops
}

/// Mutator injecting the last operation and its timestamp as annotations
pub struct LastOperationTracker<K, C = SystemClock> {
    resource: ResourceDescriptor,
    config: TrackerConfig,
    clock: C,
    _phantom: PhantomData<fn() -> K>,
}

impl<K> LastOperationTracker<K>
where
    K: Resource<DynamicType = ()>,
    K::Scope: ScopeExt,
{
    /// Creates a tracker for `K` handling creates and updates
    pub fn new(config: TrackerConfig) -> Self {
        Self::with_clock(config, SystemClock)
    }
}

impl<K, C> LastOperationTracker<K, C>
where
    K: Resource<DynamicType = ()>,
    K::Scope: ScopeExt,
    C: Clock,
{
    /// Creates a tracker reading the time from `clock`
    pub fn with_clock(config: TrackerConfig, clock: C) -> Self {
        Self {
            resource: ResourceDescriptor::of::<K>([OperationType::Create, OperationType::Update]),
            config,
            clock,
            _phantom: PhantomData,
        }
    }

    pub fn config(&self) -> &TrackerConfig {
        &self.config
    }

    fn record(&self, obj: &K, operation: LastOperation) -> PatchOps {
        let annotations = obj.meta().annotations.as_ref();
        let ops = patch_last_operation(annotations, &self.config, operation, self.clock.now());

        info!(
            kind = %self.resource.kind(),
            name = %obj.name_any(),
            operation = %operation,
            patch = ?ops.to_json_strings().unwrap_or_default(),
            "last operation mutation result"
        );

        ops
    }
}

#[async_trait]
impl<K, C> Mutator for LastOperationTracker<K, C>
where
    K: Resource<DynamicType = ()>
        + Toggle
        + DeserializeOwned
        + fmt::Debug
        + Send
        + Sync
        + 'static,
    K::Scope: ScopeExt,
    C: Clock + 'static,
{
    type Object = K;
    type Err = HandlerError;

    fn name(&self) -> &'static str {
        "LastOperationTracker"
    }

    fn resource(&self) -> &ResourceDescriptor {
        &self.resource
    }

    async fn create(&self, _req: &Request, new: &K) -> Result<PatchOps, HandlerError> {
        Ok(self.record(new, LastOperation::Create))
    }

    async fn update(&self, _req: &Request, old: &K, new: &K) -> Result<PatchOps, HandlerError> {
        let operation = LastOperation::for_update(old.enabled(), new.enabled());
        Ok(self.record(new, operation))
    }
}
