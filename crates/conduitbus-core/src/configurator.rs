//! Configurator (spec §4.5, component C5) — the endpoint materializer.
//!
//! Walks a declarative endpoint tree (§6/[`crate::config`]) and a
//! [`DependencyRegistry`], producing fully resolved outgoing and incoming
//! route configurations. This is a pure, synchronous-except-for-registry
//! transform: the Configurator "owns nothing at runtime — it writes into
//! builders and exits" (spec.md §3).
//!
//! Grounds on the teacher's `cqrs/command_bus.rs` registration-resolution
//! style for the lifestyle wrappers (a closure captured at registration
//! time replaces runtime reflection, per spec.md §9), and reuses
//! [`crate::registry::DependencyRegistry`] for every named lookup.

use std::sync::Arc;

use parking_lot::Mutex;

use crate::config::{
    EndpointConfig, IncomingRouteConfig, LifestyleConfig, OutgoingRouteConfig, ValidatorConfig,
};
use crate::error::BusError;
use crate::listener::{Consumer, Validator};
use crate::model::{Lifestyle, MessageLabel, Payload, Qos};
use crate::registry::{CapabilityTag, DependencyRegistry};

/// Sentinel payload-type key for the default untyped-dynamic payload
/// (spec.md §4.5's "payload type resolution": an absent `type` means the
/// untyped payload, not a missing one). Both the consumer factory lookup
/// and the validator lookup key their `CapabilityTag` on this same
/// sentinel whenever `route.payload_type` is `None`, so an untyped
/// consumer and an untyped validator are resolved under one consistent
/// name rather than each inventing their own placeholder.
const UNTYPED_PAYLOAD: &str = "Untyped";

/// A fully resolved outgoing route (spec.md §4.5 step 4).
#[derive(Debug, Clone)]
pub struct ResolvedOutgoingRoute {
    /// The route's key within its endpoint.
    pub key: String,
    /// The label this route publishes under.
    pub label: MessageLabel,
    /// Effective connection string: `provider(label) > route.cs >
    /// endpoint.cs` (P4).
    pub connection_string: String,
    /// Require broker publisher-confirm.
    pub confirm: bool,
    /// Mark the message persistent.
    pub persist: bool,
    /// Message TTL, unparsed wire form (parsed lazily by
    /// [`crate::expires`] at publish time).
    pub ttl: Option<String>,
    /// Use the endpoint's default callback endpoint for replies.
    pub callback_endpoint_default: bool,
    /// Request timeout.
    pub timeout_secs: Option<u64>,
    /// Effective reuse-connection flag.
    pub reuse_connection: bool,
}

/// A fully resolved incoming route (spec.md §4.5 step 5).
#[derive(Clone)]
pub struct ResolvedIncomingRoute {
    /// The route's key within its endpoint.
    pub key: String,
    /// The label this route consumes.
    pub label: MessageLabel,
    /// Effective connection string (same precedence as outgoing, P4).
    pub connection_string: String,
    /// Effective prefetch count/size (route > endpoint > default, P5).
    pub qos: Qos,
    /// Effective worker-pool size (route > endpoint).
    pub parallelism_level: u32,
    /// Effective queue-length limit (route > endpoint).
    pub queue_limit: Option<u32>,
    /// Effective queue-byte limit (route > endpoint).
    pub queue_max_length_bytes: Option<u64>,
    /// Whether delivered messages require explicit accept/ack.
    pub requires_accept: bool,
    /// Effective reuse-connection flag.
    pub reuse_connection: bool,
    /// The resolved payload schema identifier (§4.5 "payload type
    /// resolution"): `None` for the default untyped-dynamic payload.
    pub payload_schema: Option<String>,
    /// The consumer, already wrapped per its configured lifestyle.
    pub consumer: Arc<dyn Consumer>,
    /// The validator bound via `route.validate` (spec.md §4.5 step 5's
    /// "validator binding"), if one was declared.
    pub validator: Option<Arc<dyn Validator>>,
}

impl std::fmt::Debug for ResolvedIncomingRoute {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ResolvedIncomingRoute")
            .field("key", &self.key)
            .field("label", &self.label)
            .field("connection_string", &self.connection_string)
            .field("qos", &self.qos)
            .field("parallelism_level", &self.parallelism_level)
            .field("queue_limit", &self.queue_limit)
            .field("queue_max_length_bytes", &self.queue_max_length_bytes)
            .field("requires_accept", &self.requires_accept)
            .field("reuse_connection", &self.reuse_connection)
            .field("payload_schema", &self.payload_schema)
            .finish_non_exhaustive()
    }
}

/// A loaded set of payload schemas, used by "payload type resolution"
/// (spec.md §4.5): first an exact fully-qualified match, then a scan for a
/// simple-name match.
#[derive(Debug, Clone, Default)]
pub struct LoadedSchemas {
    fully_qualified: Vec<String>,
}

impl LoadedSchemas {
    /// Build from the set of known fully-qualified schema identifiers.
    pub fn new(fully_qualified: Vec<String>) -> Self {
        Self { fully_qualified }
    }

    /// Resolve `declared` against (a) an exact match, then (b) a
    /// simple-name suffix match (`"foo.bar.Order"` matches declared
    /// `"Order"`).
    fn resolve(&self, declared: &str) -> Option<String> {
        if self.fully_qualified.iter().any(|s| s == declared) {
            return Some(declared.to_string());
        }
        self.fully_qualified
            .iter()
            .find(|fq| fq.rsplit('.').next() == Some(declared))
            .cloned()
    }
}

/// Per-endpoint resolver for the `connectionStringProvider` capability
/// (spec.md §4.1's `CapabilityTag::ConnectionStringProvider`).
pub trait ConnectionStringProvider: Send + Sync {
    /// Return a connection string for `label`, if this provider covers it.
    fn connection_string_for(&self, label: &MessageLabel) -> Option<String>;
}

/// A consumer factory registered by name under `CapabilityTag::ConsumerOf`.
pub trait ConsumerFactory: Send + Sync {
    /// Produce a fresh consumer instance.
    fn create(&self) -> Arc<dyn Consumer>;
}

/// Turns a declarative [`EndpointConfig`] into resolved routes, resolving
/// late-bound components from a [`DependencyRegistry`].
pub struct Configurator<'a> {
    registry: &'a DependencyRegistry,
    schemas: &'a LoadedSchemas,
}

impl<'a> Configurator<'a> {
    /// Build a configurator over `registry`, resolving payload types
    /// against `schemas`.
    pub fn new(registry: &'a DependencyRegistry, schemas: &'a LoadedSchemas) -> Self {
        Self { registry, schemas }
    }

    /// Materialize every outgoing route declared on `endpoint_name`'s
    /// config (spec.md §4.5 step 4).
    pub fn materialize_outgoing(
        &self,
        endpoint_name: &str,
        endpoint: &EndpointConfig,
    ) -> Result<Vec<ResolvedOutgoingRoute>, BusError> {
        endpoint
            .outgoing
            .iter()
            .map(|(key, route)| self.materialize_one_outgoing(endpoint_name, endpoint, key, route))
            .collect()
    }

    fn materialize_one_outgoing(
        &self,
        endpoint_name: &str,
        endpoint: &EndpointConfig,
        key: &str,
        route: &OutgoingRouteConfig,
    ) -> Result<ResolvedOutgoingRoute, BusError> {
        let label = MessageLabel::named(route.label.clone());
        let connection_string = self.effective_connection_string(
            endpoint_name,
            key,
            endpoint,
            route.connection_string.as_deref(),
            &label,
        )?;

        Ok(ResolvedOutgoingRoute {
            key: key.to_string(),
            label,
            connection_string,
            confirm: route.confirm,
            persist: route.persist,
            ttl: route.ttl.clone(),
            callback_endpoint_default: route.callback_endpoint_default,
            timeout_secs: route.timeout_secs,
            reuse_connection: route
                .reuse_connection
                .or(endpoint.reuse_connection)
                .unwrap_or(true),
        })
    }

    /// Register a dynamic (catch-all) outgoing route for `Any` if
    /// `dynamic.outgoing=true` (spec.md §4.5 step 2).
    pub fn dynamic_outgoing_route(&self, endpoint: &EndpointConfig) -> Option<MessageLabel> {
        endpoint.dynamic_outgoing.then_some(MessageLabel::Any)
    }

    /// Materialize every incoming route declared on `endpoint_name`'s
    /// config (spec.md §4.5 step 5), resolving consumer factories and
    /// wrapping them per their declared lifestyle.
    pub fn materialize_incoming(
        &self,
        endpoint_name: &str,
        endpoint: &EndpointConfig,
    ) -> Result<Vec<ResolvedIncomingRoute>, BusError> {
        endpoint
            .incoming
            .iter()
            .map(|(key, route)| self.materialize_one_incoming(endpoint_name, endpoint, key, route))
            .collect()
    }

    fn materialize_one_incoming(
        &self,
        endpoint_name: &str,
        endpoint: &EndpointConfig,
        key: &str,
        route: &IncomingRouteConfig,
    ) -> Result<ResolvedIncomingRoute, BusError> {
        let label = MessageLabel::named(route.label.clone());
        let connection_string = self.effective_connection_string(
            endpoint_name,
            key,
            endpoint,
            route.connection_string.as_deref(),
            &label,
        )?;

        let qos = Qos::resolve(
            Qos {
                prefetch_count: route.qos_prefetch_count,
                prefetch_size: route.qos_prefetch_size,
            },
            Qos {
                prefetch_count: endpoint.qos_prefetch_count,
                prefetch_size: endpoint.qos_prefetch_size,
            },
        );

        let parallelism_level = route
            .parallelism_level
            .or(endpoint.parallelism_level)
            .unwrap_or(1);
        let queue_limit = route.queue_limit.or(endpoint.queue_limit);
        let queue_max_length_bytes = route
            .queue_max_length_bytes
            .or(endpoint.queue_max_length_bytes);

        let payload_schema = match &route.payload_type {
            None => None,
            Some(declared) => Some(self.schemas.resolve(declared).ok_or_else(|| {
                BusError::configuration(
                    endpoint_name,
                    key,
                    format!("unknown payload type '{declared}'"),
                )
            })?),
        };

        let schema_key = payload_schema.clone().unwrap_or_else(|| UNTYPED_PAYLOAD.to_string());

        let factory_name = &route.react;
        let capability = CapabilityTag::ConsumerOf(schema_key.clone());
        // The registry is generic over the stored value type, not a trait
        // object directly (`dyn ConsumerFactory` is unsized); registering
        // `Arc<dyn ConsumerFactory>` as that value type and unwrapping the
        // outer Arc here is the idiom for a type-erased trait-object lookup.
        let factory = self
            .registry
            .resolve::<Arc<dyn ConsumerFactory>>(factory_name, capability)
            .map_err(|e| {
                BusError::configuration(endpoint_name, key, format!("resolving consumer: {e}"))
            })?;
        let factory: Arc<dyn ConsumerFactory> = (*factory).clone();

        let consumer = wrap_for_lifestyle(factory, route.lifestyle);

        let validator = match &route.validate {
            None => None,
            Some(validator_name) => {
                let validator = self
                    .registry
                    .resolve::<Arc<dyn Validator>>(
                        validator_name,
                        CapabilityTag::Validator(schema_key),
                    )
                    .map_err(|e| {
                        BusError::configuration(
                            endpoint_name,
                            key,
                            format!("resolving validator: {e}"),
                        )
                    })?;
                Some((*validator).clone())
            }
        };

        Ok(ResolvedIncomingRoute {
            key: key.to_string(),
            label,
            connection_string,
            qos,
            parallelism_level,
            queue_limit,
            queue_max_length_bytes,
            requires_accept: route.requires_accept,
            reuse_connection: route
                .reuse_connection
                .or(endpoint.reuse_connection)
                .unwrap_or(true),
            payload_schema,
            consumer,
            validator,
        })
    }

    /// Resolve `endpoint`'s endpoint-level validator declarations (spec.md
    /// §4.5 step 3), each either a single validator or a validator group,
    /// for registration with the bus. Unlike a route's bound validator
    /// (step 5), these are not tied to one route's payload type, so they
    /// key their capability lookup on [`UNTYPED_PAYLOAD`].
    pub fn materialize_validators(
        &self,
        endpoint_name: &str,
        endpoint: &EndpointConfig,
    ) -> Result<Vec<Arc<dyn Validator>>, BusError> {
        endpoint
            .validators
            .iter()
            .map(|declared| self.materialize_one_validator(endpoint_name, declared))
            .collect()
    }

    fn materialize_one_validator(
        &self,
        endpoint_name: &str,
        declared: &ValidatorConfig,
    ) -> Result<Arc<dyn Validator>, BusError> {
        if declared.is_group {
            let group = self
                .registry
                .resolve::<Arc<dyn Validator>>(
                    &declared.name,
                    CapabilityTag::ValidatorGroup(UNTYPED_PAYLOAD.to_string()),
                )
                .map_err(|e| {
                    BusError::configuration(
                        endpoint_name,
                        &declared.name,
                        format!("resolving validator group: {e}"),
                    )
                })?;
            return Ok((*group).clone());
        }

        let validator = self
            .registry
            .resolve::<Arc<dyn Validator>>(
                &declared.name,
                CapabilityTag::Validator(UNTYPED_PAYLOAD.to_string()),
            )
            .map_err(|e| {
                BusError::configuration(
                    endpoint_name,
                    &declared.name,
                    format!("resolving validator: {e}"),
                )
            })?;
        Ok((*validator).clone())
    }

    /// Effective connection string precedence (P4): `provider(label) >
    /// route.cs > endpoint.cs`.
    fn effective_connection_string(
        &self,
        endpoint_name: &str,
        key: &str,
        endpoint: &EndpointConfig,
        route_cs: Option<&str>,
        label: &MessageLabel,
    ) -> Result<String, BusError> {
        if let Some(provider_name) = &endpoint.connection_string_provider {
            let provider = self
                .registry
                .resolve::<Arc<dyn ConnectionStringProvider>>(
                    provider_name,
                    CapabilityTag::ConnectionStringProvider,
                )
                .map_err(|e| {
                    BusError::configuration(
                        endpoint_name,
                        key,
                        format!("resolving connection string provider: {e}"),
                    )
                })?;
            if let Some(cs) = provider.connection_string_for(label) {
                return Ok(cs);
            }
        }
        if let Some(cs) = route_cs {
            return Ok(cs.to_string());
        }
        Ok(endpoint.connection_string.clone())
    }
}

/// Wrap a resolved consumer factory per its declared lifestyle (spec.md
/// §4.5/§9): `Normal` invokes immediately, `Lazy` invokes once on first
/// message and memoizes, `Delegated` invokes once per message.
fn wrap_for_lifestyle(
    factory: Arc<dyn ConsumerFactory>,
    lifestyle: LifestyleConfig,
) -> Arc<dyn Consumer> {
    match lifestyle {
        LifestyleConfig::Normal => factory.create(),
        LifestyleConfig::Lazy => Arc::new(LazyConsumer {
            factory,
            memoized: Mutex::new(None),
        }),
        LifestyleConfig::Delegated => Arc::new(DelegatedConsumer { factory }),
    }
}

impl From<LifestyleConfig> for Lifestyle {
    fn from(config: LifestyleConfig) -> Self {
        match config {
            LifestyleConfig::Normal => Lifestyle::Normal,
            LifestyleConfig::Lazy => Lifestyle::Lazy,
            LifestyleConfig::Delegated => Lifestyle::Delegated,
        }
    }
}

struct LazyConsumer {
    factory: Arc<dyn ConsumerFactory>,
    memoized: Mutex<Option<Arc<dyn Consumer>>>,
}

#[async_trait::async_trait]
impl Consumer for LazyConsumer {
    async fn consume(&self, payload: Payload) -> Result<(), BusError> {
        let consumer = {
            let mut memoized = self.memoized.lock();
            memoized.get_or_insert_with(|| self.factory.create()).clone()
        };
        consumer.consume(payload).await
    }
}

struct DelegatedConsumer {
    factory: Arc<dyn ConsumerFactory>,
}

#[async_trait::async_trait]
impl Consumer for DelegatedConsumer {
    async fn consume(&self, payload: Payload) -> Result<(), BusError> {
        self.factory.create().consume(payload).await
    }
}
