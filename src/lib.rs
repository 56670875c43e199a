use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("SerializationError: {0}")]
    SerializationError(#[source] serde_json::Error),

    #[error("Kube Error: {0}")]
    KubeError(#[source] kube::Error),

    #[error("IO Error: {0}")]
    IoError(std::io::Error),

    /// Aggregated field-level violations from the Bundle validator.
    /// Never retried; the Bundle spec has to change.
    #[error("{0}")]
    ValidationError(crate::bundle_controller::FieldErrorList),

    /// A referenced source object or data key does not exist.
    #[error("{0}")]
    NotFound(String),

    #[error("Invalid PEM: {0}")]
    InvalidPem(String),

    #[error("Failed to encode JKS: {0}")]
    JksEncode(String),

    #[error("reconcile deadline exceeded")]
    DeadlineExceeded,
}

impl Error {
    /// True for errors the reconciler reports as `SourceNotFound` and retries
    /// on a short backoff.
    pub fn is_not_found(&self) -> bool {
        matches!(self, Error::NotFound(_))
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

pub mod bundle_controller;
pub mod conditions;
mod events_helper;
pub mod fspkg;
pub mod jks;
pub mod leader;
pub mod pem;
pub mod webhook;
pub use events_helper::*;

#[cfg(test)]
pub(crate) mod testdata;

/// Log and trace integrations
pub mod telemetry;
