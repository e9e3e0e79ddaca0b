//! Replay command implementation.
//!
//! Loads a platform snapshot into memory, publishes recorded payloads onto
//! an in-process bus and runs the standard engine until every channel is
//! drained. The resulting mirror and engine counters are written as JSON.

use super::read_payloads;
use mirrorsync_engine::{
    ChannelConfig, EngineConfig, EngineStats, EventEngine, InMemoryBus, MemoryMirrorStore,
    MemoryPlatform, PollConfig, ResourceMirror, SyncRegistry, SyncReport, SystemContext,
};
use mirrorsync_events::ChannelKind;
use serde::Serialize;
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::info;

/// Inputs of a replay run.
#[derive(Debug, Clone)]
pub struct ReplayOptions {
    /// Platform snapshot file.
    pub platform: PathBuf,
    /// Action payload file.
    pub actions: Option<PathBuf>,
    /// Resource-state payload file.
    pub states: Option<PathBuf>,
    /// Usage payload file.
    pub usage: Option<PathBuf>,
    /// Alert payload file.
    pub alerts: Option<PathBuf>,
    /// Mirror every family before replaying.
    pub full_resync: bool,
    /// Job poll interval in milliseconds.
    pub poll_interval_ms: u64,
    /// Job poll timeout in milliseconds.
    pub poll_timeout_ms: u64,
    /// Output file; stdout when absent.
    pub output: Option<PathBuf>,
}

impl ReplayOptions {
    fn payload_file(&self, kind: ChannelKind) -> Option<&PathBuf> {
        match kind {
            ChannelKind::Action => self.actions.as_ref(),
            ChannelKind::ResourceState => self.states.as_ref(),
            ChannelKind::Usage => self.usage.as_ref(),
            ChannelKind::Alert => self.alerts.as_ref(),
        }
    }
}

/// Output of a replay run.
#[derive(Debug, Serialize)]
pub struct ReplayReport {
    /// Payloads published per channel.
    pub published: Vec<(String, usize)>,
    /// Reports of the initial full resync, if one ran.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub initial_sync: Vec<SyncReport>,
    /// Engine counters after the last channel drained.
    pub stats: EngineStats,
    /// Final mirror contents.
    pub mirror: Vec<ResourceMirror>,
}

/// Runs the replay command.
pub fn run(options: &ReplayOptions) -> Result<(), Box<dyn std::error::Error>> {
    let snapshot = fs::read(&options.platform)
        .map_err(|e| format!("cannot read {}: {}", options.platform.display(), e))?;
    let platform = Arc::new(MemoryPlatform::from_json_slice(&snapshot)?);
    let store = Arc::new(MemoryMirrorStore::new());

    let poll = PollConfig::new(
        Duration::from_millis(options.poll_interval_ms.max(1)),
        Duration::from_millis(options.poll_timeout_ms),
    );
    let config = EngineConfig::new()
        .with_poll(poll)
        .with_shutdown_grace(poll.timeout + poll.interval);

    let initial_sync = if options.full_resync {
        let ctx = SystemContext::system(config.system_principal.clone(), "replay.full-resync");
        let registry = SyncRegistry::standard(Arc::clone(&platform), Arc::clone(&store));
        registry.sync_everything(&ctx)
    } else {
        Vec::new()
    };

    let bus = Arc::new(InMemoryBus::new());
    let mut published = Vec::new();
    for channel in &config.channels {
        let count = publish_file(&bus, channel, options.payload_file(channel.kind))?;
        published.push((channel.name.clone(), count));
        bus.close(&channel.name);
    }

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    let stats = runtime.block_on(async {
        let engine = EventEngine::standard(
            config,
            bus,
            platform,
            Arc::clone(&store) as _,
            tokio::runtime::Handle::current(),
        )?;
        let stats = engine.start().wait().await;
        Ok::<_, mirrorsync_engine::SyncError>(stats)
    })?;

    info!(
        received = stats.received,
        failed = stats.failed,
        records = store.len(),
        "Replay finished"
    );

    let report = ReplayReport {
        published,
        initial_sync,
        stats,
        mirror: store.snapshot(),
    };
    let json = serde_json::to_string_pretty(&report)?;
    match &options.output {
        Some(path) => fs::write(path, json + "\n")?,
        None => println!("{}", json),
    }

    Ok(())
}

fn publish_file(
    bus: &InMemoryBus,
    channel: &ChannelConfig,
    file: Option<&PathBuf>,
) -> Result<usize, Box<dyn std::error::Error>> {
    let Some(file) = file else {
        return Ok(0);
    };
    let payloads = read_payloads(file)?;
    for (_, payload) in &payloads {
        bus.publish(&channel.name, payload.as_bytes())?;
    }
    Ok(payloads.len())
}
