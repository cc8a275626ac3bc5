//! # conduitbus-core
//!
//! The core of a client-side message-bus library multiplexing declarative
//! endpoints over a pool of AMQP-class broker connections.
//!
//! An application declares a tree of named endpoints — outgoing publish
//! routes and incoming subscriptions — and this crate turns that into a
//! running bus: one [`Listener`](listener::Listener) per broker URL in each
//! subscription's connection string, deduplicated and coordinated by a
//! [`Receiver`](receiver::Receiver), all sharing a
//! [`ConnectionPool`](pool::ConnectionPool).
//!
//! ## Quick start
//!
//! ```rust,no_run
//! use conduitbus_core::prelude::*;
//! use std::sync::Arc;
//!
//! struct NoopDialer;
//! #[async_trait::async_trait]
//! impl BrokerDialer for NoopDialer {
//!     async fn dial(&self, _url: &url::Url) -> Result<(), BusError> {
//!         Ok(())
//!     }
//! }
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), BusError> {
//! let pool = Arc::new(ConnectionPool::new(Arc::new(NoopDialer), RetryConfig::default()));
//! let cancel = BusCancellation::new();
//! let connection = pool.get(&"amqp://localhost".parse().unwrap(), true, &cancel).await?;
//! println!("connected: {}", connection.id());
//! # Ok(())
//! # }
//! ```

#![deny(missing_docs)]
#![warn(clippy::all)]

/// Bus facade binding endpoints to receivers and exposing lookup APIs.
pub mod bus;

/// Cooperative cancellation tree shared by the bus, its receivers, and
/// their listeners.
pub mod cancellation;

/// Declarative configuration schema and its `toml` loader.
pub mod config;

/// Endpoint materializer: resolves a declared endpoint into wired routes.
pub mod configurator;

/// The bus-wide error taxonomy.
pub mod error;

/// The `Expires` message-payload helper.
pub mod expires;

/// Owns a consuming channel against one `(brokerUrl, queueAddress)` pair.
pub mod listener;

/// Shared data-model types: labels, payloads, QoS, lifestyle.
pub mod model;

/// Hands out reusable or exclusive broker connections.
pub mod pool;

/// Per-subscription aggregate of listeners; lifecycle and compatibility.
pub mod receiver;

/// Resolves a named component instance for a requested capability.
pub mod registry;

/// Resilience primitives (retry-with-backoff) hardening the connection
/// pool's broker dial.
pub mod resilience;

/// Commonly used types, re-exported for a single-line import.
pub mod prelude {
    pub use crate::bus::{Bus, RequestConfig};
    pub use crate::cancellation::{BusCancellation, ShutdownSignal};
    pub use crate::config::{BusConfig, ConfigError, EndpointConfig};
    pub use crate::configurator::{
        Configurator, ConnectionStringProvider, ConsumerFactory, LoadedSchemas,
        ResolvedIncomingRoute, ResolvedOutgoingRoute,
    };
    pub use crate::error::BusError;
    pub use crate::expires::{Expires, ExpiresParseError};
    pub use crate::listener::{
        Consumer, DispatchOutcome, Listener, ListenerKey, ListenerOptions, StopReason, Validator,
    };
    pub use crate::model::{FailedDeliveryStrategy, Lifestyle, MessageLabel, Payload, Qos};
    pub use crate::pool::{BrokerDialer, Connection, ConnectionPool};
    pub use crate::receiver::{Receiver, ReceiverOptions, ReceiverTarget};
    pub use crate::registry::{CapabilityTag, DependencyRegistry, ResolutionError, Scope};
    pub use crate::resilience::{RetryConfig, RetryError, RetryExecutor, RetryPolicy};
}
