//! Event handlers, one per category family.

use crate::context::SystemContext;
use crate::dispatch::DispatchOutcome;
use crate::error::{SyncError, SyncResult};
use crate::family::ResourceFamily;
use crate::platform::{ListRequest, PlatformClient, ResourceDescriptor};
use crate::poller::{poll_until_done, JobPoller, PollStatus, SyncJob};
use crate::status::LifecycleStatus;
use crate::store::MirrorStore;
use crate::sync::ResourceSync;
use crate::updater::StateUpdater;
use mirrorsync_events::{is_session_event, mentions_offering, Event, EventStatus};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Handles the action events of one or more categories.
pub trait EventHandler: Send + Sync {
    /// Handler name, for logs.
    fn name(&self) -> &'static str;

    /// Processes one event.
    fn handle(&self, ctx: &SystemContext, event: &Event) -> SyncResult<DispatchOutcome>;
}

/// Shared updater over a type-erased store.
pub type SharedUpdater = Arc<StateUpdater<dyn MirrorStore>>;

/// Resyncs one family: scoped when the event names an entity, full otherwise.
pub struct FamilyResyncHandler {
    sync: Arc<dyn ResourceSync>,
}

impl FamilyResyncHandler {
    /// Creates a handler over a synchronizer.
    pub fn new(sync: Arc<dyn ResourceSync>) -> Self {
        Self { sync }
    }
}

impl EventHandler for FamilyResyncHandler {
    fn name(&self) -> &'static str {
        "family-resync"
    }

    fn handle(&self, ctx: &SystemContext, event: &Event) -> SyncResult<DispatchOutcome> {
        // `id` alone may be the platform's event id; only an explicit entity
        // uuid scopes the query.
        let report = match event.entity_uuid.as_deref().filter(|u| !u.is_empty()) {
            Some(uuid) => self.sync.sync_one(ctx, uuid)?,
            None => self.sync.sync_all(ctx)?,
        };
        Ok(DispatchOutcome::Synced(report))
    }
}

/// Full resync of one family regardless of the event's target.
pub struct FullResyncHandler {
    sync: Arc<dyn ResourceSync>,
}

impl FullResyncHandler {
    /// Creates a handler over a synchronizer.
    pub fn new(sync: Arc<dyn ResourceSync>) -> Self {
        Self { sync }
    }
}

impl EventHandler for FullResyncHandler {
    fn name(&self) -> &'static str {
        "full-resync"
    }

    fn handle(&self, ctx: &SystemContext, _event: &Event) -> SyncResult<DispatchOutcome> {
        Ok(DispatchOutcome::Synced(self.sync.sync_all(ctx)?))
    }
}

/// Skips login/logout events and delegates everything else.
pub struct SessionFilteredHandler {
    inner: Arc<dyn EventHandler>,
}

impl SessionFilteredHandler {
    /// Wraps a handler.
    pub fn new(inner: Arc<dyn EventHandler>) -> Self {
        Self { inner }
    }
}

impl EventHandler for SessionFilteredHandler {
    fn name(&self) -> &'static str {
        "session-filtered"
    }

    fn handle(&self, ctx: &SystemContext, event: &Event) -> SyncResult<DispatchOutcome> {
        if is_session_event(event.event_name()) {
            return Ok(DispatchOutcome::ignored("session event"));
        }
        self.inner.handle(ctx, event)
    }
}

/// Routes `NETWORK.` events.
///
/// Names mentioning an offering resync network offerings. Of the remaining
/// events only `NETWORK.CREATE` triggers a network sync.
pub struct NetworkEventHandler {
    offerings: Arc<dyn ResourceSync>,
    networks: Arc<dyn EventHandler>,
}

impl NetworkEventHandler {
    /// Creates the router.
    pub fn new(offerings: Arc<dyn ResourceSync>, networks: Arc<dyn ResourceSync>) -> Self {
        Self {
            offerings,
            networks: Arc::new(FamilyResyncHandler::new(networks)),
        }
    }
}

impl EventHandler for NetworkEventHandler {
    fn name(&self) -> &'static str {
        "network"
    }

    fn handle(&self, ctx: &SystemContext, event: &Event) -> SyncResult<DispatchOutcome> {
        let name = event.event_name();
        if mentions_offering(name) {
            return Ok(DispatchOutcome::Synced(self.offerings.sync_all(ctx)?));
        }
        if name.eq_ignore_ascii_case("NETWORK.CREATE") {
            return self.networks.handle(ctx, event);
        }
        Ok(DispatchOutcome::ignored("network event without sync"))
    }
}

/// Applies VM lifecycle events directly and resyncs on everything else.
pub struct InstanceLifecycleHandler {
    sync: Arc<dyn ResourceSync>,
    updater: SharedUpdater,
}

impl InstanceLifecycleHandler {
    /// Creates the handler.
    pub fn new(sync: Arc<dyn ResourceSync>, updater: SharedUpdater) -> Self {
        Self { sync, updater }
    }
}

impl EventHandler for InstanceLifecycleHandler {
    fn name(&self) -> &'static str {
        "instance-lifecycle"
    }

    fn handle(&self, ctx: &SystemContext, event: &Event) -> SyncResult<DispatchOutcome> {
        let Some(uuid) = event.target_uuid() else {
            return Ok(DispatchOutcome::Synced(self.sync.sync_all(ctx)?));
        };

        if event.is_error() {
            let change = self.updater.apply_state(
                ctx,
                ResourceFamily::Instance,
                uuid,
                LifecycleStatus::Error,
                true,
                event.event_name(),
            )?;
            return Ok(DispatchOutcome::StateApplied(change));
        }

        match LifecycleStatus::transition_for(event.action(), event.status) {
            Some(status) => {
                let change = self.updater.apply_state(
                    ctx,
                    ResourceFamily::Instance,
                    uuid,
                    status,
                    false,
                    event.event_name(),
                )?;
                Ok(DispatchOutcome::StateApplied(change))
            }
            None => Ok(DispatchOutcome::Synced(self.sync.sync_one(ctx, uuid)?)),
        }
    }
}

const MUTATING_VOLUME_ACTIONS: [&str; 6] = ["ATTACH", "DETACH", "RESIZE", "MIGRATE", "CREATE", "UPLOAD"];

const TRANSITIONAL_VOLUME_STATES: [&str; 7] = [
    "creating",
    "attaching",
    "resizing",
    "migrating",
    "uploading",
    "snapshotting",
    "expunging",
];

fn is_transitional(state: Option<&str>) -> bool {
    state.is_some_and(|s| {
        let s = s.to_ascii_lowercase();
        TRANSITIONAL_VOLUME_STATES.contains(&s.as_str())
    })
}

/// Handles `VOLUME.` events.
///
/// An in-progress mutating operation schedules a detached poll of the volume
/// until it settles; on timeout the mirror is marked `Error`. Everything else
/// resyncs the volume right away.
pub struct VolumeEventHandler {
    sync: Arc<dyn ResourceSync>,
    platform: Arc<dyn PlatformClient>,
    updater: SharedUpdater,
    poller: Option<Arc<JobPoller>>,
}

impl VolumeEventHandler {
    /// Creates the handler. Without a poller, operations resync immediately.
    pub fn new(
        sync: Arc<dyn ResourceSync>,
        platform: Arc<dyn PlatformClient>,
        updater: SharedUpdater,
        poller: Option<Arc<JobPoller>>,
    ) -> Self {
        Self {
            sync,
            platform,
            updater,
            poller,
        }
    }

    fn needs_poll(event: &Event) -> bool {
        let action = event.action().to_ascii_uppercase();
        MUTATING_VOLUME_ACTIONS.contains(&action.as_str())
            && matches!(
                event.status,
                Some(EventStatus::Started) | Some(EventStatus::Scheduled)
            )
    }

    fn schedule_poll(&self, poller: &JobPoller, ctx: &SystemContext, uuid: &str, trigger: &str) {
        let config = poller.config();
        let platform = Arc::clone(&self.platform);
        let sync = Arc::clone(&self.sync);
        let updater = Arc::clone(&self.updater);
        let ctx = ctx.clone();
        let uuid = uuid.to_string();
        let trigger = trigger.to_string();

        poller.spawn_detached(async move {
            let mut job = SyncJob::new(uuid.clone());
            let result = poll_until_done(&mut job, config.interval, config.timeout, || {
                query_volume(Arc::clone(&platform), ctx.clone(), uuid.clone())
            })
            .await;

            let timed_out = matches!(&result, Err(e) if e.is_timeout());
            let target = uuid.clone();
            let finish = tokio::task::spawn_blocking(move || match result {
                Ok(Some(descriptor)) => sync.apply_descriptor(&ctx, &descriptor).map(|_| ()),
                Ok(None) => sync.sync_one(&ctx, &uuid).map(|_| ()),
                Err(e) if e.is_timeout() => updater
                    .apply_state(
                        &ctx,
                        ResourceFamily::Volume,
                        &uuid,
                        LifecycleStatus::Error,
                        true,
                        &trigger,
                    )
                    .map(|_| ()),
                Err(e) => Err(e),
            })
            .await;

            match finish {
                Ok(Ok(())) if timed_out => {
                    warn!(uuid = %target, elapsed = ?job.elapsed, "volume poll timed out, marked error")
                }
                Ok(Ok(())) => {
                    info!(uuid = %target, queries = job.queries, elapsed = ?job.elapsed, "volume settled")
                }
                Ok(Err(e)) => warn!(uuid = %target, error = %e, "volume poll failed"),
                Err(e) => warn!(uuid = %target, error = %e, "volume poll task failed"),
            }
        });
    }
}

async fn query_volume(
    platform: Arc<dyn PlatformClient>,
    ctx: SystemContext,
    uuid: String,
) -> SyncResult<PollStatus<Option<ResourceDescriptor>>> {
    let request = ListRequest::for_family(ResourceFamily::Volume).with_id(uuid.clone());
    let listing = tokio::task::spawn_blocking(move || platform.list(&ctx, &request))
        .await
        .map_err(|e| SyncError::HandlerPanicked(e.to_string()))??;

    Ok(match listing.into_iter().find(|d| d.uuid == uuid) {
        None => PollStatus::Done(None),
        Some(d) if is_transitional(d.state.as_deref()) => PollStatus::Pending,
        Some(d) => PollStatus::Done(Some(d)),
    })
}

impl EventHandler for VolumeEventHandler {
    fn name(&self) -> &'static str {
        "volume"
    }

    fn handle(&self, ctx: &SystemContext, event: &Event) -> SyncResult<DispatchOutcome> {
        let Some(uuid) = event.target_uuid() else {
            return Ok(DispatchOutcome::Synced(self.sync.sync_all(ctx)?));
        };

        if event.is_error() {
            let change = self.updater.apply_state(
                ctx,
                ResourceFamily::Volume,
                uuid,
                LifecycleStatus::Error,
                true,
                event.event_name(),
            )?;
            return Ok(DispatchOutcome::StateApplied(change));
        }

        match &self.poller {
            Some(poller) if Self::needs_poll(event) => {
                debug!(uuid, event = event.event_name(), "scheduling volume poll");
                self.schedule_poll(poller, ctx, uuid, event.event_name());
                Ok(DispatchOutcome::PollScheduled {
                    uuid: uuid.to_string(),
                })
            }
            _ => Ok(DispatchOutcome::Synced(self.sync.sync_one(ctx, uuid)?)),
        }
    }
}

/// Logs and ignores a category the mirror does not track.
pub struct NoopHandler {
    reason: &'static str,
}

impl NoopHandler {
    /// Creates a no-op handler with a reason for the log.
    pub fn new(reason: &'static str) -> Self {
        Self { reason }
    }
}

impl EventHandler for NoopHandler {
    fn name(&self) -> &'static str {
        "noop"
    }

    fn handle(&self, _ctx: &SystemContext, _event: &Event) -> SyncResult<DispatchOutcome> {
        Ok(DispatchOutcome::ignored(self.reason))
    }
}
