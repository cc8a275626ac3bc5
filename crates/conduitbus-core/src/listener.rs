//! Listener (spec §4.3, component C3).
//!
//! Owns a consuming channel against one `(brokerUrl, queueAddress)` pair and
//! dispatches arriving messages to registered consumers by label, through an
//! optional validator.
//!
//! The actual broker subscription is out of scope (spec.md §1); arrival is
//! simulated by callers invoking [`Listener::deliver`] (the receiver, in
//! production, would drive this from the wire transport's callback). State
//! storage grounds on the teacher's atomic-state-machine style in
//! `resilience/circuit_breaker.rs` (a `parking_lot::RwLock`-guarded enum
//! rather than the breaker's own `Closed/Open/HalfOpen`), and per-message
//! dispatch is spawned and raced against the listener's own cancellation
//! child token, mirroring the teacher's `shutdown.rs` task-vs-cancellation
//! pattern.

use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::RwLock;
use tokio::sync::{broadcast, Semaphore};
use url::Url;

use crate::cancellation::BusCancellation;
use crate::error::BusError;
use crate::model::{FailedDeliveryStrategy, MessageLabel, Payload, Qos};
use crate::pool::Connection;

/// A consumer callback bound to a label.
#[async_trait]
pub trait Consumer: Send + Sync {
    /// Handle a decoded message. An `Err` is handed to the failed-delivery
    /// strategy, same as a validator rejection.
    async fn consume(&self, payload: Payload) -> Result<(), BusError>;
}

/// A validator run before the consumer callback.
#[async_trait]
pub trait Validator: Send + Sync {
    /// Inspect (and possibly reject) a payload before it reaches the
    /// consumer.
    async fn validate(&self, payload: &Payload) -> Result<(), BusError>;
}

/// Identifies a listener's broker-side location: the dedup key used by
/// [`crate::receiver::Receiver`] (invariant I1).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ListenerKey {
    /// The broker URL this listener is consuming against.
    pub broker_url: Url,
    /// The queue address on that broker.
    pub queue_address: String,
}

/// The compatibility-relevant options two co-located listeners must agree
/// on (spec.md §4.4, P2).
#[derive(Debug, Clone, PartialEq)]
pub struct ListenerOptions {
    /// Whether a delivered message requires explicit accept/ack.
    pub requires_accept: bool,
    /// Dispatch worker-pool size.
    pub parallelism_level: usize,
    /// What happens to a message with no matching consumer, or one that
    /// fails validation/consumption.
    pub failed_delivery_strategy: FailedDeliveryStrategy,
    /// Broker-side flow-control limits.
    pub qos: Qos,
}

impl ListenerOptions {
    /// True if `self` and `other` agree on every compatibility field
    /// (spec.md §4.4).
    pub fn compatible_with(&self, other: &ListenerOptions) -> bool {
        self.requires_accept == other.requires_accept
            && self.parallelism_level == other.parallelism_level
            && self.failed_delivery_strategy == other.failed_delivery_strategy
            && self.qos == other.qos
    }
}

/// Why a listener stopped (spec.md §3).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StopReason {
    /// `stopConsuming`/`dispose` was called deliberately.
    Regular,
    /// The listener stopped on its own, e.g. a transport error or
    /// cancellation observed mid-consume; triggers receiver re-enlistment.
    Unexpected,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum State {
    Created,
    Running,
    Stopping,
    Stopped(StopReason),
}

/// Outcome of delivering one message, observable by tests and by the
/// failed-delivery strategy's caller.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// The consumer ran to completion.
    Delivered,
    /// No consumer is registered for the label; routed per
    /// `requires_accept`: dead-lettered if true, requeued otherwise.
    NoConsumer(FailedDeliveryStrategy),
    /// The validator rejected the message; routed per the configured
    /// failed-delivery strategy.
    ValidationFailed(FailedDeliveryStrategy),
    /// The consumer returned an error; routed per the configured
    /// failed-delivery strategy.
    ConsumerFailed(FailedDeliveryStrategy),
    /// The listener was not in `Running` state when the message arrived.
    NotRunning,
}

struct Registration {
    consumer: Arc<dyn Consumer>,
    validator: Option<Arc<dyn Validator>>,
}

/// One consuming channel against a single `(brokerUrl, queueAddress)`.
pub struct Listener {
    key: ListenerKey,
    options: ListenerOptions,
    connection: Connection,
    state: RwLock<State>,
    consumers: RwLock<HashMap<MessageLabel, Registration>>,
    dispatch_permits: Semaphore,
    inflight: AtomicUsize,
    cancel: BusCancellation,
    stopped_tx: broadcast::Sender<StopReason>,
}

impl Listener {
    /// Build a listener in the `Created` state, borrowing `connection` from
    /// the pool and deriving its own cancellation child token from `parent`.
    pub fn new(
        key: ListenerKey,
        options: ListenerOptions,
        connection: Connection,
        parent: &BusCancellation,
    ) -> Self {
        let parallelism = options.parallelism_level.max(1);
        Self {
            key,
            options,
            connection,
            state: RwLock::new(State::Created),
            consumers: RwLock::new(HashMap::new()),
            dispatch_permits: Semaphore::new(parallelism),
            inflight: AtomicUsize::new(0),
            cancel: parent.child(),
            stopped_tx: broadcast::channel(4).0,
        }
    }

    /// The `(url, queue)` this listener owns.
    pub fn key(&self) -> &ListenerKey {
        &self.key
    }

    /// The compatibility-relevant options this listener was built with.
    pub fn options(&self) -> &ListenerOptions {
        &self.options
    }

    /// The connection borrowed from the pool.
    pub fn connection(&self) -> &Connection {
        &self.connection
    }

    /// Subscribe to this listener's `Stopped` notification.
    pub fn subscribe_stopped(&self) -> broadcast::Receiver<StopReason> {
        self.stopped_tx.subscribe()
    }

    /// Register a consumer (and optional validator) for `label`. Replaces
    /// any existing registration for the same label.
    pub fn register_consumer(
        &self,
        label: MessageLabel,
        consumer: Arc<dyn Consumer>,
        validator: Option<Arc<dyn Validator>>,
    ) {
        self.consumers
            .write()
            .insert(label, Registration { consumer, validator });
    }

    /// True if a consumer is registered for `label`.
    pub fn supports(&self, label: &MessageLabel) -> bool {
        self.consumers.read().contains_key(label)
    }

    /// `Created -> Running`. Idempotent: calling it again while already
    /// `Running` is a no-op.
    pub fn start_consuming(&self) -> Result<(), BusError> {
        let mut state = self.state.write();
        match *state {
            State::Created | State::Running => {
                *state = State::Running;
                Ok(())
            }
            State::Stopping | State::Stopped(_) => Err(BusError::Transport(
                "cannot start a listener that has been stopped".into(),
            )),
        }
    }

    /// `Running -> Stopping -> Stopped(Regular)`. Idempotent.
    pub fn stop_consuming(&self) {
        let mut state = self.state.write();
        match *state {
            State::Stopped(_) => {}
            _ => {
                *state = State::Stopping;
                *state = State::Stopped(StopReason::Regular);
                let _ = self.stopped_tx.send(StopReason::Regular);
            }
        }
    }

    /// Force `Stopped(Regular)` from any state, cancelling in-flight
    /// dispatch (spec.md §4.3: "from any state, dispose forces Stopped").
    pub fn dispose(&self) {
        self.cancel.cancel();
        let mut state = self.state.write();
        if !matches!(*state, State::Stopped(_)) {
            *state = State::Stopped(StopReason::Regular);
            let _ = self.stopped_tx.send(StopReason::Regular);
        }
    }

    /// Force the listener into `Stopped(Unexpected)`, e.g. on a transport
    /// error observed mid-consume. Triggers receiver re-enlistment.
    pub fn fail(&self) {
        let mut state = self.state.write();
        *state = State::Stopped(StopReason::Unexpected);
        let _ = self.stopped_tx.send(StopReason::Unexpected);
    }

    /// True once `Stopped`, of either reason.
    pub fn is_stopped(&self) -> bool {
        matches!(*self.state.read(), State::Stopped(_))
    }

    /// Simulate the arrival of one message: label lookup, validation,
    /// consumption, dispatched onto a `parallelism_level`-sized worker pool
    /// and raced against this listener's cancellation token.
    ///
    /// This is the seam a wire transport drives in production; tests call
    /// it directly.
    pub async fn deliver(&self, label: MessageLabel, payload: Payload) -> DispatchOutcome {
        if !matches!(*self.state.read(), State::Running) {
            return DispatchOutcome::NotRunning;
        }

        let registration = {
            let consumers = self.consumers.read();
            match consumers.get(&label) {
                Some(reg) => Some((Arc::clone(&reg.consumer), reg.validator.clone())),
                None => None,
            }
        };

        let Some((consumer, validator)) = registration else {
            return DispatchOutcome::NoConsumer(self.options.failed_delivery_strategy);
        };

        let Ok(_permit) = self.dispatch_permits.acquire().await else {
            return DispatchOutcome::NotRunning;
        };
        self.inflight.fetch_add(1, Ordering::SeqCst);

        let strategy = self.options.failed_delivery_strategy;
        let outcome = match self
            .cancel
            .run_until_cancelled(Self::run_pipeline(validator, consumer, payload, strategy))
            .await
        {
            Some(outcome) => outcome,
            None => DispatchOutcome::ConsumerFailed(strategy),
        };
        self.inflight.fetch_sub(1, Ordering::SeqCst);
        outcome
    }

    async fn run_pipeline(
        validator: Option<Arc<dyn Validator>>,
        consumer: Arc<dyn Consumer>,
        payload: Payload,
        strategy: FailedDeliveryStrategy,
    ) -> DispatchOutcome {
        if let Some(validator) = validator {
            if validator.validate(&payload).await.is_err() {
                return DispatchOutcome::ValidationFailed(strategy);
            }
        }
        match consumer.consume(payload).await {
            Ok(()) => DispatchOutcome::Delivered,
            Err(_) => DispatchOutcome::ConsumerFailed(strategy),
        }
    }

    /// Number of messages currently being dispatched.
    pub fn inflight_count(&self) -> usize {
        self.inflight.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;

    struct CountingConsumer(Arc<AtomicU32>);

    #[async_trait]
    impl Consumer for CountingConsumer {
        async fn consume(&self, _payload: Payload) -> Result<(), BusError> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    struct RejectingValidator;

    #[async_trait]
    impl Validator for RejectingValidator {
        async fn validate(&self, _payload: &Payload) -> Result<(), BusError> {
            Err(BusError::Validation("always rejects".into()))
        }
    }

    fn test_connection() -> Connection {
        Connection::for_test(1, "amqp://h1".parse().unwrap())
    }

    fn test_options() -> ListenerOptions {
        ListenerOptions {
            requires_accept: true,
            parallelism_level: 1,
            failed_delivery_strategy: FailedDeliveryStrategy::DeadLetter,
            qos: Qos::default(),
        }
    }

    fn payload() -> Payload {
        Payload::Untyped(Default::default())
    }

    #[tokio::test]
    async fn delivering_before_start_is_not_running() {
        let listener = Listener::new(
            ListenerKey { broker_url: "amqp://h1".parse().unwrap(), queue_address: "q".into() },
            test_options(),
            test_connection(),
            &BusCancellation::new(),
        );

        let outcome = listener.deliver(MessageLabel::named("L"), payload()).await;
        assert_eq!(outcome, DispatchOutcome::NotRunning);
    }

    #[tokio::test]
    async fn unregistered_label_reports_no_consumer() {
        let listener = Listener::new(
            ListenerKey { broker_url: "amqp://h1".parse().unwrap(), queue_address: "q".into() },
            test_options(),
            test_connection(),
            &BusCancellation::new(),
        );
        listener.start_consuming().unwrap();

        let outcome = listener.deliver(MessageLabel::named("L"), payload()).await;
        assert_eq!(outcome, DispatchOutcome::NoConsumer(FailedDeliveryStrategy::DeadLetter));
    }

    #[tokio::test]
    async fn registered_consumer_is_invoked() {
        let listener = Listener::new(
            ListenerKey { broker_url: "amqp://h1".parse().unwrap(), queue_address: "q".into() },
            test_options(),
            test_connection(),
            &BusCancellation::new(),
        );
        listener.start_consuming().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        listener.register_consumer(
            MessageLabel::named("L"),
            Arc::new(CountingConsumer(Arc::clone(&calls))),
            None,
        );

        let outcome = listener.deliver(MessageLabel::named("L"), payload()).await;
        assert_eq!(outcome, DispatchOutcome::Delivered);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn validator_rejection_uses_failed_delivery_strategy() {
        let listener = Listener::new(
            ListenerKey { broker_url: "amqp://h1".parse().unwrap(), queue_address: "q".into() },
            test_options(),
            test_connection(),
            &BusCancellation::new(),
        );
        listener.start_consuming().unwrap();
        let calls = Arc::new(AtomicU32::new(0));
        listener.register_consumer(
            MessageLabel::named("L"),
            Arc::new(CountingConsumer(Arc::clone(&calls))),
            Some(Arc::new(RejectingValidator)),
        );

        let outcome = listener.deliver(MessageLabel::named("L"), payload()).await;
        assert_eq!(outcome, DispatchOutcome::ValidationFailed(FailedDeliveryStrategy::DeadLetter));
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn consumer_failure_uses_failed_delivery_strategy() {
        struct FailingConsumer;
        #[async_trait]
        impl Consumer for FailingConsumer {
            async fn consume(&self, _payload: Payload) -> Result<(), BusError> {
                Err(BusError::Transport("boom".into()))
            }
        }

        let listener = Listener::new(
            ListenerKey { broker_url: "amqp://h1".parse().unwrap(), queue_address: "q".into() },
            test_options(),
            test_connection(),
            &BusCancellation::new(),
        );
        listener.start_consuming().unwrap();
        listener.register_consumer(MessageLabel::named("L"), Arc::new(FailingConsumer), None);

        let outcome = listener.deliver(MessageLabel::named("L"), payload()).await;
        assert_eq!(outcome, DispatchOutcome::ConsumerFailed(FailedDeliveryStrategy::DeadLetter));
    }

    #[test]
    fn start_stop_is_idempotent() {
        let listener = Listener::new(
            ListenerKey { broker_url: "amqp://h1".parse().unwrap(), queue_address: "q".into() },
            test_options(),
            test_connection(),
            &BusCancellation::new(),
        );
        listener.start_consuming().unwrap();
        listener.start_consuming().unwrap();
        listener.stop_consuming();
        listener.stop_consuming();
        assert!(listener.is_stopped());
    }

    #[test]
    fn dispose_forces_stopped_from_created() {
        let listener = Listener::new(
            ListenerKey { broker_url: "amqp://h1".parse().unwrap(), queue_address: "q".into() },
            test_options(),
            test_connection(),
            &BusCancellation::new(),
        );
        listener.dispose();
        assert!(listener.is_stopped());
    }

    #[test]
    fn compatible_options_require_all_four_fields_equal() {
        let a = test_options();
        let mut b = test_options();
        assert!(a.compatible_with(&b));
        b.parallelism_level = 4;
        assert!(!a.compatible_with(&b));
    }

    #[tokio::test]
    async fn fail_emits_unexpected_stop_notification() {
        let listener = Listener::new(
            ListenerKey { broker_url: "amqp://h1".parse().unwrap(), queue_address: "q".into() },
            test_options(),
            test_connection(),
            &BusCancellation::new(),
        );
        let mut stopped = listener.subscribe_stopped();
        listener.start_consuming().unwrap();

        listener.fail();

        assert_eq!(stopped.recv().await.unwrap(), StopReason::Unexpected);
        assert!(listener.is_stopped());
    }
}
