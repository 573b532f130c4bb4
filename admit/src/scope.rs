use std::fmt;

use k8s_openapi::{ClusterResourceScope, NamespaceResourceScope};

/// Scope of a Kubernetes resource as declared to the admission webhook
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum Scope {
    /// Resource lives inside a namespace
    Namespaced,
    /// Resource is cluster wide
    Cluster,
}

impl Scope {
    /// Value used for `scope` in admissionregistration rules
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Namespaced => "Namespaced",
            Self::Cluster => "Cluster",
        }
    }

    /// Whether a request made in `namespace` can target a resource of this scope
    pub fn admits(&self, namespace: Option<&str>) -> bool {
        match self {
            Self::Namespaced => namespace.is_some_and(|ns| !ns.is_empty()),
            Self::Cluster => namespace.is_none_or(str::is_empty),
        }
    }
}

impl fmt::Display for Scope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Extensions for Kubernetes resource scopes
///
/// Maps the scope marker types of `k8s_openapi` onto [`Scope`] so descriptors
/// can be derived from a typed resource.
pub trait ScopeExt {
    /// Scope represented by the marker type
    const SCOPE: Scope;
}

impl ScopeExt for NamespaceResourceScope {
    const SCOPE: Scope = Scope::Namespaced;
}

impl ScopeExt for ClusterResourceScope {
    const SCOPE: Scope = Scope::Cluster;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_scope_from_marker_types() {
        assert_eq!(NamespaceResourceScope::SCOPE, Scope::Namespaced);
        assert_eq!(ClusterResourceScope::SCOPE, Scope::Cluster);
    }

    #[test]
    fn test_scope_admits_namespace() {
        assert!(Scope::Namespaced.admits(Some("default")));
        assert!(!Scope::Namespaced.admits(None));
        assert!(!Scope::Namespaced.admits(Some("")));
        assert!(Scope::Cluster.admits(None));
        assert!(Scope::Cluster.admits(Some("")));
        assert!(!Scope::Cluster.admits(Some("default")));
    }
}
