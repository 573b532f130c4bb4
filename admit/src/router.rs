use std::convert::Infallible;
use std::sync::Arc;

use k8s_openapi::api::admissionregistration::v1::RuleWithOperations;
use kube::ResourceExt;
use kube::core::DynamicObject;
use kube::core::admission::{AdmissionRequest, AdmissionResponse, AdmissionReview};
use tracing::{debug, error, info};
use warp::Filter;

use crate::error::Error;
use crate::mutator::{DynMutator, Mutator, MutatorWrapper};
use crate::patch::PatchOps;
use crate::resource::ResourceDescriptor;

/// Routes admission requests to the mutators registered for their resource
///
/// Every matching mutator runs in registration order and their patches are
/// concatenated. The first error denies the request and drops all patches.
#[derive(Default)]
pub struct MutatorRouter {
    mutators: Vec<Box<dyn DynMutator>>,
}

impl MutatorRouter {
    /// Creates an empty router
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a mutator
    ///
    /// Chain multiple calls to register mutators for different resources.
    #[must_use]
    pub fn mutator<M>(mut self, mutator: M) -> Self
    where
        M: Mutator + 'static,
    {
        self.mutators.push(Box::new(MutatorWrapper::new(mutator)));
        self
    }

    pub fn len(&self) -> usize {
        self.mutators.len()
    }

    pub fn is_empty(&self) -> bool {
        self.mutators.is_empty()
    }

    /// Descriptors of every registered mutator
    pub fn resources(&self) -> impl Iterator<Item = &ResourceDescriptor> {
        self.mutators.iter().map(|m| m.resource())
    }

    /// Rules for a `MutatingWebhookConfiguration` covering every registered mutator
    pub fn rules(&self) -> Vec<RuleWithOperations> {
        self.resources().map(ResourceDescriptor::rule).collect()
    }

    /// Runs the matching mutators against a request
    pub async fn admit(&self, req: &AdmissionRequest<DynamicObject>) -> AdmissionResponse {
        let name = req
            .object
            .as_ref()
            .or(req.old_object.as_ref())
            .map(|obj| obj.name_any())
            .unwrap_or_else(|| req.name.clone());
        let kind = &req.kind.kind;

        let mut patch = PatchOps::new();
        let mut matched = 0;

        for mutator in self.mutators.iter().filter(|m| m.resource().matches(req)) {
            matched += 1;
            match mutator.mutate(req).await {
                Ok(ops) => {
                    info!(
                        handler = mutator.name(),
                        operation = ?req.operation,
                        kind = %kind,
                        name = %name,
                        patches = ops.len(),
                        "mutated resource"
                    );
                    patch.extend(ops);
                }
                Err(err) => {
                    error!(
                        handler = mutator.name(),
                        operation = ?req.operation,
                        kind = %kind,
                        name = %name,
                        error = %err,
                        "mutation failed"
                    );
                    return AdmissionResponse::from(req).deny(format!("{}: {}", mutator.name(), err));
                }
            }
        }

        if matched == 0 {
            debug!(
                operation = ?req.operation,
                kind = %kind,
                name = %name,
                "no mutator registered for resource"
            );
        }

        if patch.is_empty() {
            return AdmissionResponse::from(req);
        }

        match AdmissionResponse::from(req)
            .with_patch(patch.into())
            .map_err(Error::from)
        {
            Ok(res) => res,
            Err(err) => {
                error!(kind = %kind, name = %name, error = %err, "failed to serialize patch");
                AdmissionResponse::from(req).deny(err.to_string())
            }
        }
    }

    /// Answers a full admission review
    pub async fn review(
        &self,
        review: AdmissionReview<DynamicObject>,
    ) -> AdmissionReview<DynamicObject> {
        let req: AdmissionRequest<_> = match review.try_into() {
            Ok(req) => req,
            Err(err) => {
                error!("invalid admission request: {}", err);
                return AdmissionResponse::invalid(err.to_string()).into_review();
            }
        };

        self.admit(&req).await.into_review()
    }

    /// Warp filter answering `POST` admission reviews
    ///
    /// Mount it under the path the webhook configuration points at, e.g.
    /// `warp::path("mutate").and(router.filter())`.
    pub fn filter(
        self: Arc<Self>,
    ) -> impl Filter<Extract = (warp::reply::Json,), Error = warp::Rejection> + Clone {
        warp::post()
            .and(warp::path::end())
            .and(warp::body::json())
            .and_then(move |body: AdmissionReview<DynamicObject>| {
                let router = self.clone();
                async move { Ok::<_, Infallible>(warp::reply::json(&router.review(body).await)) }
            })
    }
}
