//! Bus facade (spec §4.6, component C6).
//!
//! Binds endpoints to their resolved routes, exposing lookup APIs. Building
//! the bus from a declarative [`crate::config::BusConfig`] is the
//! Configurator's job ([`crate::configurator::Configurator`]); the Bus
//! itself is a read-mostly index over the result plus the running
//! [`Receiver`]s.
//!
//! Grounds on the teacher's root-crate re-export pattern
//! (`allframe-core/src/lib.rs`'s public surface): the facade re-exposes
//! just enough of the Configurator's output to answer `getEvent` /
//! `getRequestConfig` / `endpoints`, without leaking the registry or the
//! per-route resolution machinery.

use std::collections::HashMap;
use std::sync::Arc;

use crate::configurator::{ResolvedIncomingRoute, ResolvedOutgoingRoute};
use crate::error::BusError;
use crate::listener::Validator;
use crate::model::MessageLabel;
use crate::receiver::Receiver;

/// The request-relevant subset of an outgoing route's configuration
/// (spec.md §4.6, `getRequestConfig`).
#[derive(Debug, Clone)]
pub struct RequestConfig {
    /// Request timeout, if any.
    pub timeout_secs: Option<u64>,
    /// Whether the request is persisted.
    pub persist: bool,
    /// Message TTL, unparsed wire form.
    pub ttl: Option<String>,
}

struct BoundEndpoint {
    outgoing: HashMap<String, ResolvedOutgoingRoute>,
    incoming: HashMap<String, ResolvedIncomingRoute>,
    validators: Vec<Arc<dyn Validator>>,
    receiver: Option<Arc<Receiver>>,
}

/// Binds every configured endpoint's resolved routes to its runtime
/// [`Receiver`], and answers endpoint/key lookups (spec.md §4.6).
#[derive(Default)]
pub struct Bus {
    endpoints: HashMap<String, BoundEndpoint>,
}

impl Bus {
    /// An empty bus with no bound endpoints.
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind an endpoint's resolved outgoing/incoming routes, its
    /// endpoint-level validators (spec.md §4.5 step 3's "register with the
    /// bus"), and, for a consumer-bearing endpoint, its receiver, under
    /// `name`. Replaces any existing binding for that name.
    pub fn bind_endpoint(
        &mut self,
        name: impl Into<String>,
        outgoing: Vec<ResolvedOutgoingRoute>,
        incoming: Vec<ResolvedIncomingRoute>,
        validators: Vec<Arc<dyn Validator>>,
        receiver: Option<Arc<Receiver>>,
    ) {
        self.endpoints.insert(
            name.into(),
            BoundEndpoint {
                outgoing: outgoing.into_iter().map(|r| (r.key.clone(), r)).collect(),
                incoming: incoming.into_iter().map(|r| (r.key.clone(), r)).collect(),
                validators,
                receiver,
            },
        );
    }

    /// The endpoint-level validators registered for `endpoint_name`
    /// (spec.md §4.5 step 3), empty if none were declared or the endpoint
    /// is unbound.
    pub fn validators(&self, endpoint_name: &str) -> &[Arc<dyn Validator>] {
        self.endpoints
            .get(endpoint_name)
            .map(|e| e.validators.as_slice())
            .unwrap_or(&[])
    }

    /// Look up the label a route publishes or consumes under `(endpointName,
    /// key)`, searching outgoing routes first, then incoming.
    pub fn get_event(&self, endpoint_name: &str, key: &str) -> Result<MessageLabel, BusError> {
        let endpoint = self.endpoints.get(endpoint_name).ok_or_else(|| BusError::NotFound {
            endpoint: endpoint_name.to_string(),
            key: key.to_string(),
        })?;

        if let Some(route) = endpoint.outgoing.get(key) {
            return Ok(route.label.clone());
        }
        if let Some(route) = endpoint.incoming.get(key) {
            return Ok(route.label.clone());
        }
        Err(BusError::NotFound {
            endpoint: endpoint_name.to_string(),
            key: key.to_string(),
        })
    }

    /// Look up an outgoing route's request-relevant configuration
    /// (timeout, persist, ttl). Searches outgoing routes only.
    pub fn get_request_config(
        &self,
        endpoint_name: &str,
        key: &str,
    ) -> Result<RequestConfig, BusError> {
        let endpoint = self.endpoints.get(endpoint_name).ok_or_else(|| BusError::NotFound {
            endpoint: endpoint_name.to_string(),
            key: key.to_string(),
        })?;

        let route = endpoint.outgoing.get(key).ok_or_else(|| BusError::NotFound {
            endpoint: endpoint_name.to_string(),
            key: key.to_string(),
        })?;

        Ok(RequestConfig {
            timeout_secs: route.timeout_secs,
            persist: route.persist,
            ttl: route.ttl.clone(),
        })
    }

    /// Enumerate every bound endpoint name.
    pub fn endpoints(&self) -> impl Iterator<Item = &str> {
        self.endpoints.keys().map(String::as_str)
    }

    /// The receiver bound to `endpoint_name`, if it has consumer routes.
    pub fn receiver(&self, endpoint_name: &str) -> Option<&Arc<Receiver>> {
        self.endpoints.get(endpoint_name)?.receiver.as_ref()
    }

    /// Start every bound endpoint's receiver.
    pub async fn start(&self) -> Result<(), BusError> {
        for endpoint in self.endpoints.values() {
            if let Some(receiver) = &endpoint.receiver {
                receiver.start().await?;
            }
        }
        Ok(())
    }

    /// Stop every bound endpoint's receiver.
    pub fn stop(&self) {
        for endpoint in self.endpoints.values() {
            if let Some(receiver) = &endpoint.receiver {
                receiver.stop();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outgoing_route(key: &str, label: &str) -> ResolvedOutgoingRoute {
        ResolvedOutgoingRoute {
            key: key.to_string(),
            label: MessageLabel::named(label),
            connection_string: "amqp://h1".into(),
            confirm: false,
            persist: true,
            ttl: Some("in 30".into()),
            callback_endpoint_default: false,
            timeout_secs: Some(5),
            reuse_connection: true,
        }
    }

    #[test]
    fn get_event_finds_outgoing_then_incoming() {
        let mut bus = Bus::new();
        bus.bind_endpoint("orders", vec![outgoing_route("k1", "L1")], vec![], vec![], None);

        assert_eq!(bus.get_event("orders", "k1").unwrap(), MessageLabel::named("L1"));
    }

    #[test]
    fn get_event_reports_not_found_for_unknown_endpoint_or_key() {
        let bus = Bus::new();
        let err = bus.get_event("missing", "k1").unwrap_err();
        assert!(matches!(err, BusError::NotFound { .. }));
    }

    #[test]
    fn get_request_config_only_searches_outgoing() {
        let mut bus = Bus::new();
        bus.bind_endpoint("orders", vec![outgoing_route("k1", "L1")], vec![], vec![], None);

        let config = bus.get_request_config("orders", "k1").unwrap();
        assert_eq!(config.timeout_secs, Some(5));
        assert!(config.persist);
    }

    #[test]
    fn endpoints_enumerates_bound_names() {
        let mut bus = Bus::new();
        bus.bind_endpoint("orders", vec![], vec![], vec![], None);
        bus.bind_endpoint("shipments", vec![], vec![], vec![], None);

        let mut names: Vec<&str> = bus.endpoints().collect();
        names.sort();
        assert_eq!(names, vec!["orders", "shipments"]);
    }
}
