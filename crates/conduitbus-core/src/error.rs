//! The bus-wide error taxonomy (spec §7).

use thiserror::Error;

/// Unified error type for every operation in this crate.
#[derive(Error, Debug)]
pub enum BusError {
    /// The declarative tree references an unknown endpoint, type, or name;
    /// an unsupported lifestyle was requested; or two co-located listeners
    /// disagree on a compatibility field.
    #[error("configuration error in endpoint '{endpoint}', key '{key}': {message}")]
    Configuration {
        /// The endpoint the error was raised for.
        endpoint: String,
        /// The route key (or a synthetic marker for endpoint-level errors).
        key: String,
        /// Human-readable detail.
        message: String,
    },

    /// The dependency registry could not satisfy a `(name, capability)`
    /// lookup.
    #[error("resolution error: {0}")]
    Resolution(#[from] crate::registry::ResolutionError),

    /// The broker was unreachable, or a channel closed unexpectedly.
    #[error("transport error: {0}")]
    Transport(String),

    /// A validator rejected a message.
    #[error("validation error: {0}")]
    Validation(String),

    /// A pool request or listener start observed a cancellation.
    #[error("operation canceled")]
    Canceled,

    /// `Bus::event` / `Bus::request_config` could not find the requested
    /// key.
    #[error("not found: endpoint '{endpoint}', key '{key}'")]
    NotFound {
        /// The endpoint searched.
        endpoint: String,
        /// The route key that was missing.
        key: String,
    },
}

impl BusError {
    /// Build a [`BusError::Configuration`] pinpointing an endpoint/key.
    pub fn configuration(
        endpoint: impl Into<String>,
        key: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        BusError::Configuration {
            endpoint: endpoint.into(),
            key: key.into(),
            message: message.into(),
        }
    }
}
