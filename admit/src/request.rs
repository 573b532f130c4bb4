use k8s_openapi::api::authentication::v1::UserInfo;
use kube::Resource;
use kube::core::admission::{AdmissionRequest, Operation};

/// Context of the admission request handed to mutator callbacks
///
/// Carries the identity of the caller and the operation being performed.
/// Mutators may inspect it but the framework attaches no meaning to it.
#[derive(Clone, Debug)]
pub struct Request {
    /// Identifier of the admission call
    pub uid: String,
    /// Name of the object, empty when the server generates it
    pub name: String,
    pub namespace: Option<String>,
    pub operation: Operation,
    /// User that issued the request
    pub user_info: UserInfo,
    pub dry_run: bool,
}

impl<T> From<&AdmissionRequest<T>> for Request
where
    T: Resource,
{
    fn from(req: &AdmissionRequest<T>) -> Self {
        Self {
            uid: req.uid.clone(),
            name: req.name.clone(),
            namespace: req.namespace.clone(),
            operation: req.operation.clone(),
            user_info: req.user_info.clone(),
            dry_run: req.dry_run,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::admission_request;

    #[test]
    fn test_request_from_admission_request() {
        let req = admission_request("CREATE", None, None);
        let ctx = Request::from(&req);

        assert_eq!(ctx.uid, "test-uid");
        assert_eq!(ctx.name, "vm-import");
        assert_eq!(ctx.namespace.as_deref(), Some("harvester-system"));
        assert_eq!(ctx.operation, Operation::Create);
        assert_eq!(ctx.user_info.username.as_deref(), Some("system:admin"));
        assert!(!ctx.dry_run);
    }
}
