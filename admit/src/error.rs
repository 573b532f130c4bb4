use kube::core::admission::SerializePatchError;
use thiserror::Error;

/// Errors that can occur while dispatching an admission request to a mutator
#[derive(Error, Debug)]
pub enum Error {
    /// Error during JSON serialization/deserialization
    #[error("SerializationError: {0}")]
    SerializationError(#[source] serde_json::Error),

    /// The request object is not the resource the mutator was registered for
    #[error("unexpected resource kind: expected {expected}, found {found}")]
    UnexpectedKind { expected: String, found: String },

    /// The request carries no object where the operation requires one
    #[error("admission request has no {0}")]
    MissingObject(&'static str),

    /// The request object could not be read as the mutator's resource type
    #[error("malformed object: {0}")]
    MalformedObject(#[source] serde_json::Error),

    /// The combined patch could not be attached to the admission response
    #[error("Patch Error: {0}")]
    Patch(#[from] SerializePatchError),

    /// Error returned from a mutator callback
    #[error("{0}")]
    Mutator(#[source] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors that can occur during mutator execution
#[derive(Error, Debug)]
pub enum HandlerError {
    /// Error during JSON serialization/deserialization
    #[error("SerializationError: {0}")]
    SerializationError(#[source] serde_json::Error),

    /// The object is missing fields the mutator depends on
    #[error("malformed object: {0}")]
    MalformedObject(String),

    /// Error from the admission framework
    #[error("Admit Error: {0}")]
    AdmitError(#[from] Error),
}

/// Result type for admission operations
pub type Result<T, E = Error> = std::result::Result<T, E>;
