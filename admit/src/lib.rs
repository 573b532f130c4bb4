//! Typed admission mutators for Kubernetes custom resources
//!
//! A [`Mutator`] declares the resource and operations it cares about through a
//! [`ResourceDescriptor`] and reacts to creates, updates and deletes of typed
//! objects by returning [`PatchOps`]. The [`MutatorRouter`] matches incoming
//! admission requests against the registered descriptors, narrows the payload
//! to the mutator's type and assembles the JSON patch of the response.
//!
//! [`LastOperationTracker`] is the bundled mutator recording the last
//! lifecycle operation of an [`Addon`] in its annotations.

pub mod addon;
pub mod clock;
pub mod config;
pub mod error;
pub mod mutator;
pub mod patch;
pub mod request;
pub mod resource;
pub mod router;
pub mod scope;
#[cfg(any(test, feature = "testing"))]
pub mod testing;
pub mod tracker;

pub use addon::{Addon, AddonSpec, AddonStatus};
pub use clock::{Clock, SystemClock};
pub use config::{Config, TrackerConfig, WebhookConfig};
pub use error::{Error, HandlerError, Result};
pub use mutator::Mutator;
pub use patch::{PatchOp, PatchOps};
pub use request::Request;
pub use resource::{OperationType, ResourceDescriptor};
pub use router::MutatorRouter;
pub use scope::{Scope, ScopeExt};
pub use tracker::{LastOperation, LastOperationTracker, Toggle};
