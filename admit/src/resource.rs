//! Declarations of which resources and operations a mutator handles

use std::collections::BTreeSet;
use std::fmt;

use k8s_openapi::api::admissionregistration::v1::RuleWithOperations;
use kube::Resource;
use kube::core::admission::{AdmissionRequest, Operation};

use crate::scope::{Scope, ScopeExt};

/// Admission operations a mutator may subscribe to
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum OperationType {
    Create,
    Update,
    Delete,
}

impl OperationType {
    /// Maps a request operation, `None` for operations mutators never see
    pub const fn from_operation(operation: &Operation) -> Option<Self> {
        match operation {
            Operation::Create => Some(Self::Create),
            Operation::Update => Some(Self::Update),
            Operation::Delete => Some(Self::Delete),
            _ => None,
        }
    }

    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::Update => "UPDATE",
            Self::Delete => "DELETE",
        }
    }
}

impl fmt::Display for OperationType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Static description of the resource a mutator is registered for
///
/// Built once when the mutator is constructed and only read afterwards, so it
/// can be shared freely between concurrent admission requests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResourceDescriptor {
    names: BTreeSet<String>,
    scope: Scope,
    api_group: String,
    api_version: String,
    kind: String,
    operations: BTreeSet<OperationType>,
}

impl ResourceDescriptor {
    /// Describes the typed resource `K` for the given operations
    ///
    /// The plural name, group, version, kind and scope are all taken from `K`.
    pub fn of<K>(operations: impl IntoIterator<Item = OperationType>) -> Self
    where
        K: Resource<DynamicType = ()>,
        K::Scope: ScopeExt,
    {
        Self {
            names: BTreeSet::from([K::plural(&()).into_owned()]),
            scope: <K::Scope as ScopeExt>::SCOPE,
            api_group: K::group(&()).into_owned(),
            api_version: K::version(&()).into_owned(),
            kind: K::kind(&()).into_owned(),
            operations: operations.into_iter().collect(),
        }
    }

    /// Also match requests against an additional resource name,
    /// e.g. `addons/status` for the status subresource
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.names.insert(name.into());
        self
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.names.iter().map(String::as_str)
    }

    pub const fn scope(&self) -> Scope {
        self.scope
    }

    pub fn api_group(&self) -> &str {
        &self.api_group
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    pub fn kind(&self) -> &str {
        &self.kind
    }

    /// `group/version`, or just `version` for the core group
    pub fn group_version(&self) -> String {
        if self.api_group.is_empty() {
            self.api_version.clone()
        } else {
            format!("{}/{}", self.api_group, self.api_version)
        }
    }

    pub fn operations(&self) -> impl Iterator<Item = OperationType> + '_ {
        self.operations.iter().copied()
    }

    pub fn handles(&self, operation: OperationType) -> bool {
        self.operations.contains(&operation)
    }

    /// Whether an admission request should be routed to the owning mutator
    pub fn matches<T>(&self, req: &AdmissionRequest<T>) -> bool
    where
        T: Resource,
    {
        let Some(operation) = OperationType::from_operation(&req.operation) else {
            return false;
        };

        let resource = match req.sub_resource.as_deref() {
            Some(sub) if !sub.is_empty() => format!("{}/{}", req.resource.resource, sub),
            _ => req.resource.resource.clone(),
        };

        self.handles(operation)
            && req.resource.group == self.api_group
            && req.resource.version == self.api_version
            && self.names.contains(&resource)
            && self.scope.admits(req.namespace.as_deref())
    }

    /// Admission registration rule selecting the requests this descriptor matches
    pub fn rule(&self) -> RuleWithOperations {
        RuleWithOperations {
            api_groups: Some(vec![self.api_group.clone()]),
            api_versions: Some(vec![self.api_version.clone()]),
            operations: Some(
                self.operations
                    .iter()
                    .map(|op| op.as_str().to_string())
                    .collect(),
            ),
            resources: Some(self.names.iter().cloned().collect()),
            scope: Some(self.scope.as_str().to_string()),
        }
    }
}
