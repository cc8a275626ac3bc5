//! Declarative configuration schema (spec §6, component C10) — the
//! Configurator's input. A tree rooted at a named section enumerating
//! endpoints.
//!
//! The wire-level config file parser is out of scope (spec.md §1): this
//! module only defines the typed tree a parser is assumed to have already
//! populated, and a thin `toml` + `serde` loader for it, following the
//! teacher's preference for typed, `serde`-derived configuration over
//! stringly-typed lookups (`allframe-core/src/auth/jwt.rs`'s
//! `#[derive(Deserialize)]` config structs).

use std::collections::HashMap;
use std::path::Path;

use serde::Deserialize;
use thiserror::Error;

/// Errors loading or parsing a configuration file.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// The file could not be read.
    #[error("failed to read config file '{path}': {source}")]
    Io {
        /// Path that failed to read.
        path: String,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
    /// The file's contents did not deserialize into [`BusConfig`].
    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Root of the declarative configuration tree: a named section of
/// [`EndpointConfig`] entries.
#[derive(Debug, Clone, Deserialize)]
pub struct BusConfig {
    /// Endpoint name to its declared configuration.
    pub endpoints: HashMap<String, EndpointConfig>,
}

impl BusConfig {
    /// Parse a `BusConfig` from a TOML string.
    pub fn from_toml(contents: &str) -> Result<Self, ConfigError> {
        Ok(toml::from_str(contents)?)
    }

    /// Load and parse a `BusConfig` from a file on disk.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Self::from_toml(&contents)
    }
}

/// Per-endpoint declared configuration (spec.md §3/§6). `reuse_connection:
/// None` means "inherit" (spec.md §3's tri-state yes/no/inherit, modeled as
/// an absent override rather than a three-way enum since every consumer of
/// this field already resolves it via `Option::or` against an ambient
/// default).
#[derive(Debug, Clone, Deserialize)]
pub struct EndpointConfig {
    /// Comma-separated broker URLs.
    pub connection_string: String,
    /// Headers stripped on receive.
    #[serde(default)]
    pub excluded_headers: Vec<String>,
    /// Whether connections for this endpoint's listeners are shared.
    #[serde(default)]
    pub reuse_connection: Option<bool>,
    /// Name of a registered lifecycle handler.
    pub lifecycle_handler: Option<String>,
    /// Dispatch worker-pool size.
    pub parallelism_level: Option<u32>,
    /// Fault queue TTL, in seconds.
    pub fault_queue_ttl_secs: Option<u64>,
    /// Fault queue length limit.
    pub fault_queue_limit: Option<u32>,
    /// Max messages in the queue.
    pub queue_limit: Option<u32>,
    /// Max queue size in bytes.
    pub queue_max_length_bytes: Option<u64>,
    /// Enables the catch-all `Any`-label outgoing route.
    #[serde(default)]
    pub dynamic_outgoing: bool,
    /// Default prefetch count.
    pub qos_prefetch_count: Option<u16>,
    /// Default prefetch size in bytes.
    pub qos_prefetch_size: Option<u32>,
    /// Name of a registered per-label connection-string provider.
    pub connection_string_provider: Option<String>,
    /// Validator declarations (by name, grouped or single).
    #[serde(default)]
    pub validators: Vec<ValidatorConfig>,
    /// Outgoing (publisher) routes, keyed by route key.
    #[serde(default)]
    pub outgoing: HashMap<String, OutgoingRouteConfig>,
    /// Incoming (consumer) routes, keyed by route key.
    #[serde(default)]
    pub incoming: HashMap<String, IncomingRouteConfig>,
}

/// A validator declaration (spec.md §3).
#[derive(Debug, Clone, Deserialize)]
pub struct ValidatorConfig {
    /// Registered validator (or validator-group) name.
    pub name: String,
    /// Whether `name` resolves a validator group rather than a single
    /// validator.
    #[serde(default)]
    pub is_group: bool,
}

/// A declared outgoing (publisher) route (spec.md §3).
#[derive(Debug, Clone, Deserialize)]
pub struct OutgoingRouteConfig {
    /// Message label this route publishes under.
    pub label: String,
    /// Require broker publisher-confirm.
    #[serde(default)]
    pub confirm: bool,
    /// Mark the message persistent.
    #[serde(default)]
    pub persist: bool,
    /// Message TTL, in the `Expires` wire grammar (spec.md §6).
    pub ttl: Option<String>,
    /// Use the endpoint's default callback endpoint for replies.
    #[serde(default)]
    pub callback_endpoint_default: bool,
    /// Request timeout, seconds.
    pub timeout_secs: Option<u64>,
    /// Route-level connection string override.
    pub connection_string: Option<String>,
    /// Route-level reuse-connection override.
    pub reuse_connection: Option<bool>,
}

/// Consumer instantiation policy (spec.md GLOSSARY "Lifestyle").
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub enum LifestyleConfig {
    /// Invoke the factory immediately, once.
    Normal,
    /// Invoke the factory once, lazily, memoized.
    Lazy,
    /// Invoke the factory once per message.
    Delegated,
}

/// A declared incoming (consumer) route (spec.md §3).
#[derive(Debug, Clone, Deserialize)]
pub struct IncomingRouteConfig {
    /// Message label this route consumes.
    pub label: String,
    /// Registered consumer-factory name.
    pub react: String,
    /// Registered validator name, if any.
    pub validate: Option<String>,
    /// Payload type name; absent means the default untyped-dynamic payload.
    #[serde(rename = "type")]
    pub payload_type: Option<String>,
    /// Consumer instantiation policy.
    pub lifestyle: LifestyleConfig,
    /// Route-level prefetch count override.
    pub qos_prefetch_count: Option<u16>,
    /// Route-level prefetch size override.
    pub qos_prefetch_size: Option<u32>,
    /// Route-level parallelism override.
    pub parallelism_level: Option<u32>,
    /// Route-level queue-limit override.
    pub queue_limit: Option<u32>,
    /// Route-level queue-max-bytes override.
    pub queue_max_length_bytes: Option<u64>,
    /// Whether a delivered message requires explicit accept/ack.
    #[serde(default)]
    pub requires_accept: bool,
    /// Route-level connection-string override.
    pub connection_string: Option<String>,
    /// Route-level reuse-connection override.
    pub reuse_connection: Option<bool>,
}
