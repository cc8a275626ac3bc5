//! Shared data-model types (spec §3): labels, payloads, QoS, and the
//! failed-delivery strategy.

use std::fmt;
use std::sync::Arc;

/// An opaque, interned string naming a message kind.
///
/// `MessageLabel::Any` is a distinguished value matching all labels, used
/// by dynamic outgoing routing (spec.md §4.5, "dynamic.outgoing").
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MessageLabel {
    /// A concrete, named label.
    Named(Arc<str>),
    /// Matches any label.
    Any,
}

impl MessageLabel {
    /// Build a named label.
    pub fn named(label: impl Into<Arc<str>>) -> Self {
        MessageLabel::Named(label.into())
    }

    /// True if this label matches `other` under dynamic-routing semantics:
    /// `Any` matches everything, a named label matches only itself.
    pub fn matches(&self, other: &MessageLabel) -> bool {
        matches!(self, MessageLabel::Any) || self == other
    }
}

impl fmt::Display for MessageLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageLabel::Named(label) => write!(f, "{label}"),
            MessageLabel::Any => write!(f, "*"),
        }
    }
}

impl From<&str> for MessageLabel {
    fn from(value: &str) -> Self {
        MessageLabel::named(value)
    }
}

/// Message payload, redesigned per spec.md §9 as a tagged variant instead
/// of a reflectively-resolved runtime type.
#[derive(Debug, Clone)]
pub enum Payload {
    /// A payload whose schema was resolved at configuration time (spec.md
    /// §4.5's "payload type resolution").
    Typed {
        /// The resolved schema identifier (fully qualified, or a
        /// simple-name match — see `configurator::resolve_payload_type`).
        schema: String,
        /// The raw encoded bytes.
        bytes: Vec<u8>,
    },
    /// The default, untyped payload: an arbitrary key/value record.
    Untyped(std::collections::HashMap<String, serde_json::Value>),
}

/// Quality-of-service: prefetch governs broker-side flow control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Qos {
    /// Maximum number of unacknowledged messages delivered at once.
    pub prefetch_count: Option<u16>,
    /// Maximum number of unacknowledged bytes delivered at once.
    pub prefetch_size: Option<u32>,
}

impl Qos {
    /// Default prefetch count per spec.md §4.5: 50.
    pub const DEFAULT_PREFETCH_COUNT: u16 = 50;
    /// Default prefetch size per spec.md §4.5: 0 (unbounded).
    pub const DEFAULT_PREFETCH_SIZE: u32 = 0;

    /// Resolve effective QoS per spec.md §4.5/P5 precedence: `route.qos >
    /// endpoint.qos > listener-default`, applied field by field.
    pub fn resolve(route: Qos, endpoint: Qos) -> Qos {
        Qos {
            prefetch_count: route
                .prefetch_count
                .or(endpoint.prefetch_count)
                .or(Some(Self::DEFAULT_PREFETCH_COUNT)),
            prefetch_size: route
                .prefetch_size
                .or(endpoint.prefetch_size)
                .or(Some(Self::DEFAULT_PREFETCH_SIZE)),
        }
    }
}

/// Policy applied to a message a consumer or validator rejects (spec.md
/// §7, "failed-delivery strategy").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailedDeliveryStrategy {
    /// Nack the message so the broker redelivers it.
    Requeue,
    /// Route the message to a dead-letter / fault queue.
    DeadLetter,
    /// Drop the message silently.
    Drop,
}

/// Instantiation policy for a consumer factory (spec.md §4.5 /
/// GLOSSARY "Lifestyle").
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Lifestyle {
    /// The factory is invoked immediately at registration.
    Normal,
    /// The factory is invoked once, on the first message, and memoized.
    Lazy,
    /// The factory is invoked once per message.
    Delegated,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn any_label_matches_everything() {
        let any = MessageLabel::Any;
        assert!(any.matches(&MessageLabel::named("order.created")));
        assert!(any.matches(&MessageLabel::Any));
    }

    #[test]
    fn named_label_matches_only_itself() {
        let created = MessageLabel::named("order.created");
        let shipped = MessageLabel::named("order.shipped");
        assert!(created.matches(&created.clone()));
        assert!(!created.matches(&shipped));
    }

    #[test]
    fn qos_precedence_prefers_route_then_endpoint_then_default() {
        let route = Qos { prefetch_count: Some(10), prefetch_size: None };
        let endpoint = Qos { prefetch_count: Some(20), prefetch_size: Some(4096) };
        let resolved = Qos::resolve(route, endpoint);
        assert_eq!(resolved.prefetch_count, Some(10));
        assert_eq!(resolved.prefetch_size, Some(4096));
    }

    #[test]
    fn qos_falls_back_to_defaults() {
        let resolved = Qos::resolve(Qos::default(), Qos::default());
        assert_eq!(resolved.prefetch_count, Some(Qos::DEFAULT_PREFETCH_COUNT));
        assert_eq!(resolved.prefetch_size, Some(Qos::DEFAULT_PREFETCH_SIZE));
    }
}
