//! Receiver (spec §4.4, component C4).
//!
//! The per-subscription aggregate of listeners: builds one listener per URL
//! in the connection string, deduplicates by `(brokerUrl, queueAddress)`,
//! enforces compatibility between co-located listeners, and re-enlists after
//! an unexpected stop.
//!
//! Grounds on the teacher's `cqrs/command_bus.rs` type-erased dispatch table
//! for `register_consumer`'s fan-out to every current listener, and on
//! `shutdown.rs`'s single-consumer notification-channel pattern for the
//! `Stopped` event the build loop subscribes to. The listener set itself is
//! a `parking_lot::Mutex`-guarded `Vec`, matching spec.md §5's "a single
//! receiver-wide mutex guards Start/Stop/Build transitions" (a `DashMap`
//! keyed by `(url, queue)` was considered, but §4.4's build algorithm needs
//! ordered iteration to preserve re-enlistment order, which a concurrent map
//! does not give for free).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Mutex as AsyncMutex;
use url::Url;

use crate::cancellation::BusCancellation;
use crate::error::BusError;
use crate::listener::{
    Consumer, Listener, ListenerKey, ListenerOptions, StopReason, Validator,
};
use crate::model::MessageLabel;
use crate::pool::ConnectionPool;

/// One URL to build a listener against, plus the queue it addresses.
#[derive(Debug, Clone)]
pub struct ReceiverTarget {
    /// Broker URL.
    pub broker_url: Url,
    /// Queue address on that broker.
    pub queue_address: String,
}

/// Receiver-wide options, shared by every listener it builds.
#[derive(Debug, Clone)]
pub struct ReceiverOptions {
    /// URLs (and queue) to build listeners against.
    pub targets: Vec<ReceiverTarget>,
    /// Whether connections are shared across listeners requesting the same
    /// URL (spec.md §3, I4/I5).
    pub reuse_connection: bool,
    /// The options every listener this receiver builds is configured with.
    pub listener_options: ListenerOptions,
}

/// A single registered consumer/validator pair, replayed onto every listener
/// built for this receiver, including ones built later by re-enlistment.
#[derive(Clone)]
struct ConsumerRegistration {
    label: MessageLabel,
    consumer: Arc<dyn Consumer>,
    validator: Option<Arc<dyn Validator>>,
}

/// The per-subscription aggregate of listeners (spec.md §3/§4.4).
pub struct Receiver {
    options: ReceiverOptions,
    pool: Arc<ConnectionPool>,
    cancel: BusCancellation,
    listeners: Arc<Mutex<Vec<Arc<Listener>>>>,
    registrations: Mutex<Vec<ConsumerRegistration>>,
    is_started: AtomicBool,
    build_lock: AsyncMutex<()>,
}

impl Receiver {
    /// Construct an un-built, un-started receiver.
    pub fn new(options: ReceiverOptions, pool: Arc<ConnectionPool>, parent: &BusCancellation) -> Self {
        Self {
            options,
            pool,
            cancel: parent.child(),
            listeners: Arc::new(Mutex::new(Vec::new())),
            registrations: Mutex::new(Vec::new()),
            is_started: AtomicBool::new(false),
            build_lock: AsyncMutex::new(()),
        }
    }

    /// True once `start` has completed and `stop` has not since (invariant
    /// I2: monotonic false→true→false transitions).
    pub fn is_started(&self) -> bool {
        self.is_started.load(Ordering::SeqCst)
    }

    /// Number of distinct `(url, queue)` listeners currently held.
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    /// Triggers a lazy build (if not already built) and reports whether any
    /// current listener has a consumer registered for `label`.
    pub async fn can_receive(&self, label: &MessageLabel) -> Result<bool, BusError> {
        self.build().await?;
        Ok(self.listeners.lock().iter().any(|l| l.supports(label)))
    }

    /// Find the first listener matching `predicate`.
    pub fn get_listener(&self, predicate: impl Fn(&Listener) -> bool) -> Option<Arc<Listener>> {
        self.listeners.lock().iter().find(|l| predicate(l)).cloned()
    }

    /// Register a consumer (and optional validator) under `label` on every
    /// current listener, and remember it so future (re-enlisted) listeners
    /// get it too.
    pub async fn register_consumer(
        &self,
        label: MessageLabel,
        consumer: Arc<dyn Consumer>,
        validator: Option<Arc<dyn Validator>>,
    ) -> Result<(), BusError> {
        self.build().await?;

        for listener in self.listeners.lock().iter() {
            listener.register_consumer(label.clone(), Arc::clone(&consumer), validator.clone());
        }
        self.registrations.lock().push(ConsumerRegistration {
            label,
            consumer,
            validator,
        });
        Ok(())
    }

    /// Build (idempotent, lazy) then start consuming on every listener.
    /// `start; start` is equivalent to `start` (P3).
    pub async fn start(&self) -> Result<(), BusError> {
        self.build().await?;
        if self.is_started.swap(true, Ordering::SeqCst) {
            return Ok(());
        }
        for listener in self.listeners.lock().iter() {
            listener.start_consuming()?;
        }
        Ok(())
    }

    /// Stop and dispose every listener, best-effort: errors are collected
    /// but do not stop the sweep, and `listeners` ends up empty regardless
    /// (invariant I3, P3).
    pub fn stop(&self) {
        self.is_started.store(false, Ordering::SeqCst);
        let drained: Vec<Arc<Listener>> = std::mem::take(&mut *self.listeners.lock());
        for listener in drained {
            listener.stop_consuming();
            listener.dispose();
        }
    }

    /// Build algorithm (spec.md §4.4), idempotent: does nothing once every
    /// target has a listener. One tentative listener is built per target;
    /// if its `(url, queue)` already has a listener, the new one is
    /// discarded after a compatibility check (reject semantics — see the
    /// module doc on the Open Question resolution).
    pub async fn build(&self) -> Result<(), BusError> {
        let _guard = self.build_lock.lock().await;

        for target in &self.options.targets {
            let already_built = self
                .listeners
                .lock()
                .iter()
                .any(|l| l.key().broker_url == target.broker_url && l.key().queue_address == target.queue_address);
            if already_built {
                continue;
            }

            let connection = self
                .pool
                .get(&target.broker_url, self.options.reuse_connection, &self.cancel)
                .await?;

            let key = ListenerKey {
                broker_url: target.broker_url.clone(),
                queue_address: target.queue_address.clone(),
            };
            let tentative = Arc::new(Listener::new(
                key.clone(),
                self.options.listener_options.clone(),
                connection,
                &self.cancel,
            ));

            let mut listeners = self.listeners.lock();
            if let Some(existing) = listeners
                .iter()
                .find(|l| l.key() == &key)
            {
                if !existing.options().compatible_with(tentative.options()) {
                    return Err(BusError::configuration(
                        target.broker_url.as_str(),
                        &target.queue_address,
                        "co-located listeners disagree on requires_accept, \
                         parallelism_level, failed_delivery_strategy, or QoS",
                    ));
                }
                // Compatible: keep the existing listener, discard the
                // tentative one (spec.md §9 Open Question, resolved reject).
                continue;
            }

            for registration in self.registrations.lock().iter() {
                tentative.register_consumer(
                    registration.label.clone(),
                    Arc::clone(&registration.consumer),
                    registration.validator.clone(),
                );
            }
            if self.is_started.load(Ordering::SeqCst) {
                tentative.start_consuming()?;
            }
            listeners.push(Arc::clone(&tentative));
            drop(listeners);

            self.spawn_reenlistment_watch(tentative);
        }
        Ok(())
    }

    /// Subscribe to a tentative listener's `Stopped` event; on `Unexpected`,
    /// evict it from the set (spec.md §4.4 "re-enlistment": "drain the
    /// listener set, locate and drop the offending listener, re-enqueue the
    /// rest preserving order"). The vacated `(url, queue)` slot is rebuilt
    /// the next time `build` runs — via `can_receive`, `register_consumer`,
    /// `start`, or an explicit `reap_and_rebuild` call. `Stopped(Regular)`
    /// is a no-op, matching a deliberate `stop`.
    fn spawn_reenlistment_watch(&self, listener: Arc<Listener>) {
        let mut stopped = listener.subscribe_stopped();
        let listeners = Arc::clone(&self.listeners);
        tokio::spawn(async move {
            if let Ok(StopReason::Unexpected) = stopped.recv().await {
                listeners.lock().retain(|l| !Arc::ptr_eq(l, &listener));
            }
        });
    }

    /// Evict any listener that has stopped, then rebuild. Re-enlistment
    /// (P8) happens automatically in the background as soon as a listener
    /// reports `Stopped(Unexpected)`; this is a convenience for callers
    /// that want the rebuild to happen synchronously rather than on the
    /// next lazy `build`.
    pub async fn reap_and_rebuild(&self) -> Result<(), BusError> {
        {
            let mut listeners = self.listeners.lock();
            listeners.retain(|l| !l.is_stopped());
        }
        self.build().await
    }
}
