use std::error::Error as StdError;
use std::fmt::Debug;

use async_trait::async_trait;
use kube::Resource;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, Operation};
use serde::de::DeserializeOwned;

use crate::error::Error;
use crate::patch::PatchOps;
use crate::request::Request;
use crate::resource::ResourceDescriptor;

/// Mutating admission handler for a single typed resource
///
/// The router only invokes the callbacks for operations listed in
/// [`Mutator::resource`]. Callbacks describe changes as [`PatchOps`] and must
/// either return the complete patch or an error, which rejects the request.
#[async_trait]
pub trait Mutator: Send + Sync {
    /// Resource the mutator is registered for
    type Object: Resource<DynamicType = ()> + DeserializeOwned + Debug + Send + Sync + 'static;

    /// Error type returned by the callbacks
    type Err: StdError + Send + Sync + 'static;

    /// Returns the name of this mutator for logging purposes
    fn name(&self) -> &'static str;

    /// Resource and operations this mutator handles
    fn resource(&self) -> &ResourceDescriptor;

    /// Called when an object is created
    async fn create(&self, _req: &Request, _new: &Self::Object) -> Result<PatchOps, Self::Err> {
        Ok(PatchOps::default())
    }

    /// Called when an object is updated
    async fn update(
        &self,
        _req: &Request,
        _old: &Self::Object,
        _new: &Self::Object,
    ) -> Result<PatchOps, Self::Err> {
        Ok(PatchOps::default())
    }

    /// Called when an object is deleted
    async fn delete(&self, _req: &Request, _old: &Self::Object) -> Result<(), Self::Err> {
        Ok(())
    }
}

#[async_trait]
pub(crate) trait DynMutator: Send + Sync {
    fn name(&self) -> &'static str;

    fn resource(&self) -> &ResourceDescriptor;

    async fn mutate(&self, req: &AdmissionRequest<DynamicObject>) -> Result<PatchOps, Error>;
}

pub(crate) struct MutatorWrapper<M>
where
    M: Mutator,
{
    inner: M,
}

impl<M> MutatorWrapper<M>
where
    M: Mutator,
{
    pub(crate) const fn new(inner: M) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<M> DynMutator for MutatorWrapper<M>
where
    M: Mutator + 'static,
{
    fn name(&self) -> &'static str {
        self.inner.name()
    }

    fn resource(&self) -> &ResourceDescriptor {
        self.inner.resource()
    }

    async fn mutate(&self, req: &AdmissionRequest<DynamicObject>) -> Result<PatchOps, Error> {
        let ctx = Request::from(req);

        match req.operation {
            Operation::Create => {
                let new = narrow::<M::Object>(req.object.as_ref(), "object")?;
                self.inner.create(&ctx, &new).await.map_err(mutator_error)
            }
            Operation::Update => {
                let old = narrow::<M::Object>(req.old_object.as_ref(), "oldObject")?;
                let new = narrow::<M::Object>(req.object.as_ref(), "object")?;
                self.inner.update(&ctx, &old, &new).await.map_err(mutator_error)
            }
            Operation::Delete => {
                let old = narrow::<M::Object>(req.old_object.as_ref(), "oldObject")?;
                self.inner.delete(&ctx, &old).await.map_err(mutator_error)?;
                Ok(PatchOps::default())
            }
            _ => Ok(PatchOps::default()),
        }
    }
}

fn mutator_error<E>(err: E) -> Error
where
    E: StdError + Send + Sync + 'static,
{
    Error::Mutator(Box::new(err))
}

/// Converts the generic request payload into the mutator's resource type
///
/// Fails with [`Error::UnexpectedKind`] when the payload declares another
/// `apiVersion`/`kind` than `K`.
pub(crate) fn narrow<K>(obj: Option<&DynamicObject>, field: &'static str) -> Result<K, Error>
where
    K: Resource<DynamicType = ()> + DeserializeOwned,
{
    let obj = obj.ok_or(Error::MissingObject(field))?;

    if let Some(types) = &obj.types {
        let api_version = K::api_version(&());
        let kind = K::kind(&());
        if types.api_version != api_version || types.kind != kind {
            return Err(Error::UnexpectedKind {
                expected: format!("{api_version}, Kind={kind}"),
                found: format!("{}, Kind={}", types.api_version, types.kind),
            });
        }
    }

    let value = serde_json::to_value(obj).map_err(Error::SerializationError)?;
    serde_json::from_value(value).map_err(Error::MalformedObject)
}
