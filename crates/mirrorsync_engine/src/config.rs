//! Configuration for the sync engine.

use mirrorsync_events::ChannelKind;
use rand::Rng;
use std::time::Duration;

/// Configuration for the event engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Channels to consume, one consumer per entry.
    pub channels: Vec<ChannelConfig>,
    /// Async job polling configuration.
    pub poll: PollConfig,
    /// Resubscribe behavior when a channel subscription is lost.
    pub resubscribe: ResubscribePolicy,
    /// Maximum time shutdown waits for in-flight work.
    pub shutdown_grace: Duration,
    /// Name of the system principal established per event.
    pub system_principal: String,
    /// Interval of the periodic full resync, if enabled.
    pub full_resync_interval: Option<Duration>,
}

impl EngineConfig {
    /// Creates a configuration consuming every channel under its default name.
    pub fn new() -> Self {
        Self {
            channels: ChannelKind::ALL
                .into_iter()
                .map(ChannelConfig::default_for)
                .collect(),
            poll: PollConfig::default(),
            resubscribe: ResubscribePolicy::default(),
            shutdown_grace: Duration::from_secs(30),
            system_principal: "system".into(),
            full_resync_interval: None,
        }
    }

    /// Replaces the consumed channels.
    pub fn with_channels(mut self, channels: Vec<ChannelConfig>) -> Self {
        self.channels = channels;
        self
    }

    /// Sets the polling configuration.
    pub fn with_poll(mut self, poll: PollConfig) -> Self {
        self.poll = poll;
        self
    }

    /// Sets the resubscribe policy.
    pub fn with_resubscribe(mut self, policy: ResubscribePolicy) -> Self {
        self.resubscribe = policy;
        self
    }

    /// Sets the shutdown grace period.
    pub fn with_shutdown_grace(mut self, grace: Duration) -> Self {
        self.shutdown_grace = grace;
        self
    }

    /// Sets the system principal name.
    pub fn with_system_principal(mut self, name: impl Into<String>) -> Self {
        self.system_principal = name.into();
        self
    }

    /// Enables a periodic full resync of every family.
    pub fn with_full_resync_interval(mut self, interval: Duration) -> Self {
        self.full_resync_interval = Some(interval);
        self
    }
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self::new()
    }
}

/// A named channel on the message bus and the payload shape it carries.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Kind of events on this channel.
    pub kind: ChannelKind,
    /// Bus-level name (queue or routing key).
    pub name: String,
}

impl ChannelConfig {
    /// Creates a channel configuration.
    pub fn new(kind: ChannelKind, name: impl Into<String>) -> Self {
        Self {
            kind,
            name: name.into(),
        }
    }

    /// Creates a channel using the default bus name for its kind.
    pub fn default_for(kind: ChannelKind) -> Self {
        let name = match kind {
            ChannelKind::Action => "mirror.action-events",
            ChannelKind::ResourceState => "mirror.resource-state-events",
            ChannelKind::Usage => "mirror.usage-events",
            ChannelKind::Alert => "mirror.alert-events",
        };
        Self::new(kind, name)
    }
}

/// Configuration for async job polling.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollConfig {
    /// Delay between status queries.
    pub interval: Duration,
    /// Total time allowed before the job is reported as timed out.
    pub timeout: Duration,
}

impl PollConfig {
    /// Creates a polling configuration.
    pub fn new(interval: Duration, timeout: Duration) -> Self {
        Self { interval, timeout }
    }
}

impl Default for PollConfig {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), Duration::from_secs(180))
    }
}

/// How a consumer gets its channel back after the subscription is lost.
///
/// Each failed subscribe call waits `base_backoff * 2^(failures - 1)`, capped
/// at `max_backoff`, plus up to a quarter of random jitter. After
/// `max_failures` consecutive failures the consumer stops.
#[derive(Debug, Clone, PartialEq)]
pub struct ResubscribePolicy {
    /// Consecutive failed subscribe calls tolerated.
    pub max_failures: u32,
    /// Wait after the first failure.
    pub base_backoff: Duration,
    /// Longest wait between two attempts.
    pub max_backoff: Duration,
    /// Spread waits so consumers of a restarted broker don't reconnect in step.
    pub jitter: bool,
}

impl ResubscribePolicy {
    /// Creates a policy giving up after `max_failures` failed subscribes.
    pub fn new(max_failures: u32) -> Self {
        Self {
            max_failures,
            base_backoff: Duration::from_millis(250),
            max_backoff: Duration::from_secs(30),
            jitter: true,
        }
    }

    /// Sets the first and the longest wait.
    pub fn with_backoff(mut self, base: Duration, max: Duration) -> Self {
        self.base_backoff = base;
        self.max_backoff = max;
        self
    }

    /// Makes waits exact.
    pub fn without_jitter(mut self) -> Self {
        self.jitter = false;
        self
    }

    /// Returns true once `failures` consecutive failures exhaust the policy.
    pub fn gives_up_after(&self, failures: u32) -> bool {
        failures >= self.max_failures
    }

    /// Returns the wait before the next subscribe, after `failures` failures.
    pub fn backoff(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        let doublings = (failures - 1).min(20);
        let wait = self
            .base_backoff
            .saturating_mul(1 << doublings)
            .min(self.max_backoff);

        if self.jitter {
            wait.mul_f64(1.0 + rand::thread_rng().gen_range(0.0..0.25))
        } else {
            wait
        }
    }
}

impl Default for ResubscribePolicy {
    fn default() -> Self {
        Self::new(10)
    }
}
