//! The event consumer engine.
//!
//! One consumer task per configured channel. Within a channel, messages are
//! decoded, dispatched and finished strictly in order; dispatch itself runs
//! on the blocking pool. Channels run independently of each other.

use crate::config::{ChannelConfig, EngineConfig};
use crate::context::{ContextProvider, SystemPrincipalProvider};
use crate::dispatch::{DispatchOutcome, Dispatcher};
use crate::error::SyncResult;
use crate::platform::PlatformClient;
use crate::poller::JobPoller;
use crate::store::MirrorStore;
use crate::sync::SyncRegistry;
use crate::transport::{Delivery, MessageBus, Subscription};
use crate::updater::StateChange;
use mirrorsync_events::{decode, ChannelKind};
use parking_lot::RwLock;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

/// Lifecycle of an engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineState {
    /// Consumers are running.
    Running,
    /// Shutdown requested; in-flight work is finishing.
    Stopping,
    /// Every consumer has exited.
    Stopped,
}

/// Counters over everything the engine consumed.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    /// Messages taken off the bus.
    pub received: u64,
    /// Messages dropped because they could not be decoded.
    pub decode_failures: u64,
    /// Events that ran a resync.
    pub synced: u64,
    /// Events that patched a mirror status.
    pub state_applied: u64,
    /// State updates for a uuid with no mirror yet.
    pub unknown_resources: u64,
    /// Events that needed no work.
    pub ignored: u64,
    /// Events whose handler failed.
    pub failed: u64,
    /// Detached polls scheduled.
    pub polls_scheduled: u64,
    /// Usage records consumed.
    pub usage_events: u64,
    /// Alerts consumed.
    pub alerts: u64,
    /// Successful subscribe calls, including resubscribes.
    pub subscriptions: u64,
    /// Periodic full resyncs run.
    pub full_resyncs: u64,
}

impl EngineStats {
    fn record(&mut self, channel: ChannelKind, outcome: &DispatchOutcome) {
        match (channel, outcome) {
            (ChannelKind::Usage, DispatchOutcome::Ignored { .. }) => self.usage_events += 1,
            (ChannelKind::Alert, DispatchOutcome::Ignored { .. }) => self.alerts += 1,
            (_, DispatchOutcome::Synced(_)) => self.synced += 1,
            (_, DispatchOutcome::StateApplied(StateChange::Applied(_))) => self.state_applied += 1,
            (_, DispatchOutcome::StateApplied(StateChange::UnknownResource)) => {
                self.unknown_resources += 1
            }
            (_, DispatchOutcome::PollScheduled { .. }) => self.polls_scheduled += 1,
            (_, DispatchOutcome::Ignored { .. }) => self.ignored += 1,
            (_, DispatchOutcome::Failed { .. }) => self.failed += 1,
        }
    }
}

struct Shared {
    config: EngineConfig,
    bus: Arc<dyn MessageBus>,
    dispatcher: Arc<Dispatcher>,
    contexts: Arc<dyn ContextProvider>,
    stats: RwLock<EngineStats>,
    state: RwLock<EngineState>,
}

/// Consumes event channels and drives the dispatcher.
pub struct EventEngine {
    config: EngineConfig,
    bus: Arc<dyn MessageBus>,
    dispatcher: Arc<Dispatcher>,
    contexts: Arc<dyn ContextProvider>,
    poller: Arc<JobPoller>,
    registry: Option<Arc<SyncRegistry>>,
}

impl EventEngine {
    /// Creates an engine over a prepared dispatcher.
    ///
    /// `poller` must be the one handed to the dispatcher's handlers so that
    /// shutdown can wait for their detached polls.
    pub fn new(
        config: EngineConfig,
        bus: Arc<dyn MessageBus>,
        dispatcher: Dispatcher,
        poller: Arc<JobPoller>,
    ) -> Self {
        let contexts = Arc::new(SystemPrincipalProvider::new(config.system_principal.clone()));
        Self {
            config,
            bus,
            dispatcher: Arc::new(dispatcher),
            contexts,
            poller,
            registry: None,
        }
    }

    /// Creates an engine with the standard handler table.
    pub fn standard(
        config: EngineConfig,
        bus: Arc<dyn MessageBus>,
        platform: Arc<dyn PlatformClient>,
        store: Arc<dyn MirrorStore>,
        handle: Handle,
    ) -> SyncResult<Self> {
        let poller = Arc::new(JobPoller::new(handle, config.poll));
        let registry = Arc::new(SyncRegistry::standard(
            Arc::clone(&platform),
            Arc::clone(&store),
        ));
        let dispatcher =
            Dispatcher::standard(&registry, platform, store, Some(Arc::clone(&poller)))?;
        Ok(Self::new(config, bus, dispatcher, poller).with_registry(registry))
    }

    /// Replaces the per-event context provider.
    pub fn with_context_provider(mut self, contexts: Arc<dyn ContextProvider>) -> Self {
        self.contexts = contexts;
        self
    }

    /// Sets the registry used by the periodic full resync.
    pub fn with_registry(mut self, registry: Arc<SyncRegistry>) -> Self {
        self.registry = Some(registry);
        self
    }

    /// Starts one consumer per channel. Must be called within a tokio runtime.
    pub fn start(self) -> EngineHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let resync_interval = self.config.full_resync_interval;
        let channels = self.config.channels.clone();

        let shared = Arc::new(Shared {
            config: self.config,
            bus: self.bus,
            dispatcher: self.dispatcher,
            contexts: self.contexts,
            stats: RwLock::new(EngineStats::default()),
            state: RwLock::new(EngineState::Running),
        });

        let consumers = channels
            .into_iter()
            .map(|channel| {
                tokio::spawn(Arc::clone(&shared).consume(channel, shutdown_rx.clone()))
            })
            .collect();

        let background = match (resync_interval, self.registry) {
            (Some(interval), Some(registry)) => Some(tokio::spawn(Arc::clone(&shared).resync_loop(
                registry,
                interval,
                shutdown_rx.clone(),
            ))),
            (Some(_), None) => {
                warn!("full resync interval set without a registry, periodic resync disabled");
                None
            }
            _ => None,
        };

        EngineHandle {
            shared,
            poller: self.poller,
            shutdown: shutdown_tx,
            consumers,
            background,
        }
    }
}

impl Shared {
    async fn consume(self: Arc<Self>, channel: ChannelConfig, mut shutdown: watch::Receiver<bool>) {
        info!(channel = %channel.name, kind = %channel.kind, "consumer starting");
        let Some(mut subscription) = self.subscribe(&channel, &mut shutdown).await else {
            return;
        };

        loop {
            if *shutdown.borrow() {
                break;
            }
            let delivery = tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                delivery = subscription.next() => delivery,
            };

            match delivery {
                Some(delivery) => self.process(&channel, delivery).await,
                None => {
                    debug!(channel = %channel.name, "subscription ended");
                    match self.subscribe(&channel, &mut shutdown).await {
                        Some(next) => subscription = next,
                        None => break,
                    }
                }
            }
        }
        info!(channel = %channel.name, "consumer stopped");
    }

    async fn subscribe(
        &self,
        channel: &ChannelConfig,
        shutdown: &mut watch::Receiver<bool>,
    ) -> Option<Subscription> {
        let policy = &self.config.resubscribe;
        let mut failures: u32 = 0;

        loop {
            if *shutdown.borrow() {
                return None;
            }
            match self.bus.subscribe(channel) {
                Ok(subscription) => {
                    self.stats.write().subscriptions += 1;
                    return Some(subscription);
                }
                Err(e) if !e.is_retryable() => {
                    info!(channel = %channel.name, reason = %e, "channel unavailable, consumer exiting");
                    return None;
                }
                Err(e) => {
                    failures += 1;
                    if policy.gives_up_after(failures) {
                        error!(channel = %channel.name, failures, error = %e, "giving up on channel");
                        return None;
                    }
                    let delay = policy.backoff(failures);
                    warn!(channel = %channel.name, failures, delay = ?delay, error = %e, "subscribe failed, resubscribing");
                    tokio::select! {
                        _ = tokio::time::sleep(delay) => {}
                        _ = shutdown.changed() => return None,
                    }
                }
            }
        }
    }

    async fn process(&self, channel: &ChannelConfig, delivery: Delivery) {
        self.stats.write().received += 1;

        let decoded = match decode(channel.kind, &delivery.payload) {
            Ok(decoded) => decoded,
            Err(e) => {
                warn!(
                    channel = %channel.name,
                    tag = delivery.delivery_tag,
                    error = %e,
                    "dropping malformed event"
                );
                self.stats.write().decode_failures += 1;
                return;
            }
        };
        if delivery.redelivered {
            debug!(channel = %channel.name, tag = delivery.delivery_tag, "processing redelivered event");
        }

        let ctx = match self.contexts.establish(decoded.label()) {
            Ok(ctx) => ctx,
            Err(e) => {
                error!(channel = %channel.name, event = decoded.label(), error = %e, "no security context, dropping event");
                self.stats.write().failed += 1;
                return;
            }
        };

        let dispatcher = Arc::clone(&self.dispatcher);
        let outcome =
            match tokio::task::spawn_blocking(move || dispatcher.dispatch_decoded(&ctx, &decoded))
                .await
            {
                Ok(outcome) => outcome,
                Err(e) => DispatchOutcome::Failed {
                    error: e.to_string(),
                },
            };
        self.stats.write().record(channel.kind, &outcome);
    }

    async fn resync_loop(
        self: Arc<Self>,
        registry: Arc<SyncRegistry>,
        interval: Duration,
        mut shutdown: watch::Receiver<bool>,
    ) {
        let mut ticker = tokio::time::interval(interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Skip the immediate first tick.
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                _ = shutdown.changed() => break,
            }

            let ctx = match self.contexts.establish("full-resync") {
                Ok(ctx) => ctx,
                Err(e) => {
                    error!(error = %e, "no security context for full resync");
                    continue;
                }
            };
            let registry = Arc::clone(&registry);
            match tokio::task::spawn_blocking(move || registry.sync_everything(&ctx)).await {
                Ok(reports) => {
                    let changed = reports.iter().filter(|r| !r.is_noop()).count();
                    info!(families = reports.len(), changed, "full resync finished");
                    self.stats.write().full_resyncs += 1;
                }
                Err(e) => error!(error = %e, "full resync task failed"),
            }
        }
    }
}

/// Control over a running engine.
pub struct EngineHandle {
    shared: Arc<Shared>,
    poller: Arc<JobPoller>,
    shutdown: watch::Sender<bool>,
    consumers: Vec<JoinHandle<()>>,
    background: Option<JoinHandle<()>>,
}

impl EngineHandle {
    /// Returns a snapshot of the counters.
    pub fn stats(&self) -> EngineStats {
        self.shared.stats.read().clone()
    }

    /// Returns the engine state.
    pub fn state(&self) -> EngineState {
        *self.shared.state.read()
    }

    /// Returns the number of detached polls still running.
    pub fn polls_in_flight(&self) -> usize {
        self.poller.in_flight()
    }

    /// Stops intake and waits for in-flight work.
    ///
    /// In-flight dispatches always finish. Detached polls get up to the
    /// configured grace period and are aborted after that.
    pub async fn shutdown(self) -> EngineStats {
        info!("engine shutdown requested");
        *self.shared.state.write() = EngineState::Stopping;
        let _ = self.shutdown.send(true);
        self.finish().await
    }

    /// Waits until every consumer has ended on its own, then stops.
    ///
    /// Consumers end when their channel is closed or cannot be resubscribed.
    pub async fn wait(mut self) -> EngineStats {
        for consumer in std::mem::take(&mut self.consumers) {
            if let Err(e) = consumer.await {
                error!(error = %e, "consumer task failed");
            }
        }
        *self.shared.state.write() = EngineState::Stopping;
        let _ = self.shutdown.send(true);
        self.finish().await
    }

    async fn finish(self) -> EngineStats {
        for consumer in self.consumers {
            if let Err(e) = consumer.await {
                error!(error = %e, "consumer task failed");
            }
        }
        if let Some(background) = self.background {
            let _ = background.await;
        }

        self.poller.drain(self.shared.config.shutdown_grace).await;

        *self.shared.state.write() = EngineState::Stopped;
        let stats = self.shared.stats.read().clone();
        info!(
            received = stats.received,
            synced = stats.synced,
            failed = stats.failed,
            decode_failures = stats.decode_failures,
            "engine stopped"
        );
        stats
    }
}
