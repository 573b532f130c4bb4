//! Typed JSON-Patch operations returned by mutators
//!
//! Mutators never touch the objects they are given. They describe the desired
//! changes as a [`PatchOps`] list which the router attaches to the admission
//! response. Paths are built from unescaped tokens so keys containing `/` or `~`
//! always end up as valid JSON pointers.

use json_patch::jsonptr::{Pointer, PointerBuf};
use json_patch::{AddOperation, PatchOperation, RemoveOperation, ReplaceOperation};
use serde_json::Value;

/// Pointer to `/metadata/annotations/<key>` with `key` escaped as a single token
pub fn annotation_path(key: &str) -> PointerBuf {
    PointerBuf::from_tokens(["metadata", "annotations", key])
}

/// Pointer to `/metadata/labels/<key>` with `key` escaped as a single token
pub fn label_path(key: &str) -> PointerBuf {
    PointerBuf::from_tokens(["metadata", "labels", key])
}

/// A single JSON-Patch entry carrying a string value
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PatchOp {
    Add { path: PointerBuf, value: String },
    Replace { path: PointerBuf, value: String },
    Remove { path: PointerBuf },
}

impl PatchOp {
    pub fn add(path: PointerBuf, value: impl Into<String>) -> Self {
        Self::Add {
            path,
            value: value.into(),
        }
    }

    pub fn replace(path: PointerBuf, value: impl Into<String>) -> Self {
        Self::Replace {
            path,
            value: value.into(),
        }
    }

    pub fn remove(path: PointerBuf) -> Self {
        Self::Remove { path }
    }

    /// `add` when the target is missing, `replace` otherwise
    pub fn upsert(path: PointerBuf, value: impl Into<String>, exists: bool) -> Self {
        if exists {
            Self::replace(path, value)
        } else {
            Self::add(path, value)
        }
    }

    /// Name of the operation as written on the wire
    pub const fn op(&self) -> &'static str {
        match self {
            Self::Add { .. } => "add",
            Self::Replace { .. } => "replace",
            Self::Remove { .. } => "remove",
        }
    }

    pub fn path(&self) -> &Pointer {
        match self {
            Self::Add { path, .. } | Self::Replace { path, .. } | Self::Remove { path } => path,
        }
    }

    pub fn value(&self) -> Option<&str> {
        match self {
            Self::Add { value, .. } | Self::Replace { value, .. } => Some(value),
            Self::Remove { .. } => None,
        }
    }

    /// Encodes the entry as `{"op": ..., "path": ..., "value": ...}`
    pub fn to_json_string(&self) -> serde_json::Result<String> {
        serde_json::to_string(&PatchOperation::from(self.clone()))
    }
}

impl From<PatchOp> for PatchOperation {
    fn from(op: PatchOp) -> Self {
        match op {
            PatchOp::Add { path, value } => PatchOperation::Add(AddOperation {
                path,
                value: Value::String(value),
            }),
            PatchOp::Replace { path, value } => PatchOperation::Replace(ReplaceOperation {
                path,
                value: Value::String(value),
            }),
            PatchOp::Remove { path } => PatchOperation::Remove(RemoveOperation { path }),
        }
    }
}

/// Ordered list of patch entries produced by a mutator
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct PatchOps(Vec<PatchOp>);

impl PatchOps {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, op: PatchOp) {
        self.0.push(op);
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, PatchOp> {
        self.0.iter()
    }

    /// Each entry encoded as its own JSON object
    pub fn to_json_strings(&self) -> serde_json::Result<Vec<String>> {
        self.0.iter().map(PatchOp::to_json_string).collect()
    }
}

impl From<Vec<PatchOp>> for PatchOps {
    fn from(ops: Vec<PatchOp>) -> Self {
        Self(ops)
    }
}

impl From<PatchOps> for json_patch::Patch {
    fn from(ops: PatchOps) -> Self {
        json_patch::Patch(ops.0.into_iter().map(PatchOperation::from).collect())
    }
}

impl Extend<PatchOp> for PatchOps {
    fn extend<T: IntoIterator<Item = PatchOp>>(&mut self, iter: T) {
        self.0.extend(iter);
    }
}

impl FromIterator<PatchOp> for PatchOps {
    fn from_iter<T: IntoIterator<Item = PatchOp>>(iter: T) -> Self {
        Self(iter.into_iter().collect())
    }
}

impl IntoIterator for PatchOps {
    type Item = PatchOp;
    type IntoIter = std::vec::IntoIter<PatchOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.into_iter()
    }
}

impl<'a> IntoIterator for &'a PatchOps {
    type Item = &'a PatchOp;
    type IntoIter = std::slice::Iter<'a, PatchOp>;

    fn into_iter(self) -> Self::IntoIter {
        self.0.iter()
    }
}
