//! Synchronization dispatcher.
//!
//! Routes each classified event to exactly one handler through a
//! category → handler map built once at startup. Unknown categories are a
//! logged no-op. Handler errors and panics are logged and turned into
//! [`DispatchOutcome::Failed`] so one bad event never stalls a consumer.

use crate::context::SystemContext;
use crate::error::SyncResult;
use crate::family::ResourceFamily;
use crate::handlers::{
    EventHandler, FamilyResyncHandler, FullResyncHandler, InstanceLifecycleHandler,
    NetworkEventHandler, NoopHandler, SessionFilteredHandler, SharedUpdater, VolumeEventHandler,
};
use crate::platform::PlatformClient;
use crate::poller::JobPoller;
use crate::status::LifecycleStatus;
use crate::store::MirrorStore;
use crate::sync::{SyncRegistry, SyncReport};
use crate::updater::{StateChange, StateUpdater};
use mirrorsync_events::{AlertEvent, DecodedEvent, Event, ResourceStateEvent, UsageEvent};
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// What dispatching one event did.
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchOutcome {
    /// A resync ran.
    Synced(SyncReport),
    /// A point status update ran.
    StateApplied(StateChange),
    /// A detached poll was scheduled for the resource.
    PollScheduled {
        /// Resource being polled.
        uuid: String,
    },
    /// Nothing to do.
    Ignored {
        /// Why nothing was done.
        reason: String,
    },
    /// The handler failed; the event is dropped.
    Failed {
        /// Rendered error.
        error: String,
    },
}

impl DispatchOutcome {
    /// Creates an [`DispatchOutcome::Ignored`] outcome.
    pub fn ignored(reason: impl Into<String>) -> Self {
        DispatchOutcome::Ignored {
            reason: reason.into(),
        }
    }

    /// Returns true for [`DispatchOutcome::Failed`].
    pub fn is_failed(&self) -> bool {
        matches!(self, DispatchOutcome::Failed { .. })
    }
}

/// Categories that are logged and never synced.
pub const NOOP_CATEGORIES: [&str; 8] = [
    "ISO.", "HOST.", "ROUTER.", "PROXY.", "VNC.", "POD.", "PHYSICAL.", "VPC.",
];

/// Builds a [`Dispatcher`].
pub struct DispatcherBuilder {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    updater: SharedUpdater,
}

impl DispatcherBuilder {
    /// Starts an empty table; resource-state events go through `updater`.
    pub fn new(updater: SharedUpdater) -> Self {
        Self {
            handlers: HashMap::new(),
            updater,
        }
    }

    /// Registers a handler for a category (`"VM."`), replacing any previous one.
    pub fn on(mut self, category: impl Into<String>, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers
            .insert(category.into().to_ascii_uppercase(), handler);
        self
    }

    /// Finishes the table.
    pub fn build(self) -> Dispatcher {
        Dispatcher {
            handlers: self.handlers,
            updater: self.updater,
        }
    }
}

/// Category → handler routing.
pub struct Dispatcher {
    handlers: HashMap<String, Arc<dyn EventHandler>>,
    updater: SharedUpdater,
}

impl Dispatcher {
    /// Creates a builder.
    pub fn builder(updater: SharedUpdater) -> DispatcherBuilder {
        DispatcherBuilder::new(updater)
    }

    /// Wires the standard category table.
    ///
    /// `poller` enables detached polling for volume operations.
    pub fn standard(
        registry: &SyncRegistry,
        platform: Arc<dyn PlatformClient>,
        store: Arc<dyn MirrorStore>,
        poller: Option<Arc<JobPoller>>,
    ) -> SyncResult<Self> {
        let updater: SharedUpdater = Arc::new(StateUpdater::new(store));
        let resync = |family: ResourceFamily| -> SyncResult<Arc<dyn EventHandler>> {
            Ok(Arc::new(FamilyResyncHandler::new(registry.get(family)?)))
        };

        let vm_snapshots = resync(ResourceFamily::VmSnapshot)?;
        let os_types: Arc<dyn EventHandler> =
            Arc::new(FullResyncHandler::new(registry.get(ResourceFamily::OsType)?));

        let mut builder = DispatcherBuilder::new(Arc::clone(&updater))
            .on(
                "VM.",
                Arc::new(InstanceLifecycleHandler::new(
                    registry.get(ResourceFamily::Instance)?,
                    Arc::clone(&updater),
                )),
            )
            .on(
                "USER.",
                Arc::new(SessionFilteredHandler::new(resync(ResourceFamily::User)?)),
            )
            .on(
                "ACCOUNT.",
                Arc::new(SessionFilteredHandler::new(resync(ResourceFamily::Account)?)),
            )
            .on(
                "DISK.",
                Arc::new(FullResyncHandler::new(registry.get(ResourceFamily::DiskOffering)?)),
            )
            .on("DOMAIN.", resync(ResourceFamily::Domain)?)
            .on("ZONE.", resync(ResourceFamily::Zone)?)
            .on("GUEST.", Arc::clone(&os_types))
            .on("OS.", os_types)
            .on(
                "NETWORK.",
                Arc::new(NetworkEventHandler::new(
                    registry.get(ResourceFamily::NetworkOffering)?,
                    registry.get(ResourceFamily::Network)?,
                )),
            )
            .on(
                "SERVICE.",
                Arc::new(FullResyncHandler::new(registry.get(ResourceFamily::ServiceOffering)?)),
            )
            .on("SNAPSHOT.", resync(ResourceFamily::Snapshot)?)
            .on(
                "VOLUME.",
                Arc::new(VolumeEventHandler::new(
                    registry.get(ResourceFamily::Volume)?,
                    platform,
                    Arc::clone(&updater),
                    poller,
                )),
            )
            .on("NIC.", resync(ResourceFamily::Nic)?)
            .on("TEMPLATE.", resync(ResourceFamily::Template)?)
            .on("VMSNAPSHOT.", Arc::clone(&vm_snapshots))
            .on("VM_SNAPSHOT.", vm_snapshots)
            .on("PROJECT.", resync(ResourceFamily::Project)?);

        for category in NOOP_CATEGORIES {
            builder = builder.on(category, Arc::new(NoopHandler::new("category not mirrored")));
        }
        Ok(builder.build())
    }

    /// Returns the handler registered for a category.
    pub fn handler_for(&self, category: &str) -> Option<&Arc<dyn EventHandler>> {
        self.handlers.get(&category.to_ascii_uppercase())
    }

    /// Returns the registered categories, sorted.
    pub fn categories(&self) -> Vec<&str> {
        let mut categories: Vec<_> = self.handlers.keys().map(String::as_str).collect();
        categories.sort_unstable();
        categories
    }

    /// Dispatches one action event. Never fails.
    pub fn dispatch(&self, ctx: &SystemContext, event: &Event) -> DispatchOutcome {
        let category = event.category();
        let Some(handler) = self.handler_for(category.as_str()) else {
            debug!(event = event.event_name(), category = %category, "no handler for category");
            return DispatchOutcome::ignored(format!("unhandled category {}", category));
        };

        let result = catch_unwind(AssertUnwindSafe(|| handler.handle(ctx, event)));
        let outcome = match result {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => {
                error!(
                    event = event.event_name(),
                    handler = handler.name(),
                    retryable = e.is_retryable(),
                    error = %e,
                    "handler failed, dropping event"
                );
                DispatchOutcome::Failed {
                    error: e.to_string(),
                }
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                error!(
                    event = event.event_name(),
                    handler = handler.name(),
                    panic = %message,
                    "handler panicked, dropping event"
                );
                DispatchOutcome::Failed {
                    error: format!("handler panicked: {}", message),
                }
            }
        };

        if let DispatchOutcome::Ignored { reason } = &outcome {
            debug!(event = event.event_name(), handler = handler.name(), reason = %reason, "event ignored");
        }
        outcome
    }

    /// Applies a resource-state event through the state updater. Never fails.
    pub fn dispatch_state(&self, ctx: &SystemContext, event: &ResourceStateEvent) -> DispatchOutcome {
        let resource = event.resource.as_deref().unwrap_or("");
        let Some(family) = ResourceFamily::from_resource_type(resource) else {
            debug!(resource, uuid = %event.id, "untracked resource type");
            return DispatchOutcome::ignored(format!("untracked resource type {:?}", resource));
        };

        let trigger = event
            .event
            .clone()
            .unwrap_or_else(|| format!("{} state change", resource));
        let status = LifecycleStatus::from_platform(&event.new_state);

        match self
            .updater
            .apply_state(ctx, family, &event.id, status, event.is_error(), &trigger)
        {
            Ok(change) => DispatchOutcome::StateApplied(change),
            Err(e) => {
                error!(family = %family, uuid = %event.id, error = %e, "state update failed, dropping event");
                DispatchOutcome::Failed {
                    error: e.to_string(),
                }
            }
        }
    }

    /// Logs a usage record. The mirror does not track usage.
    pub fn dispatch_usage(&self, event: &UsageEvent) -> DispatchOutcome {
        debug!(
            event = %event.event,
            id = event.id.as_deref().unwrap_or(""),
            account = event.account.as_deref().unwrap_or(""),
            size = event.size.unwrap_or(0),
            "usage event"
        );
        DispatchOutcome::ignored("usage event")
    }

    /// Logs an alert. The mirror does not track alerts.
    pub fn dispatch_alert(&self, event: &AlertEvent) -> DispatchOutcome {
        warn!(
            subject = %event.subject,
            alert_type = event.alert_type.as_deref().unwrap_or(""),
            zone = event.data_center_id.as_deref().unwrap_or(""),
            "platform alert"
        );
        DispatchOutcome::ignored("alert event")
    }

    /// Dispatches an event decoded from any channel.
    pub fn dispatch_decoded(&self, ctx: &SystemContext, event: &DecodedEvent) -> DispatchOutcome {
        let outcome = match event {
            DecodedEvent::Action(event) => self.dispatch(ctx, event),
            DecodedEvent::ResourceState(event) => self.dispatch_state(ctx, event),
            DecodedEvent::Usage(event) => self.dispatch_usage(event),
            DecodedEvent::Alert(event) => self.dispatch_alert(event),
        };
        if let DispatchOutcome::Synced(report) = &outcome {
            if !report.is_noop() {
                info!(event = event.label(), family = %report.family, "event synced");
            }
        }
        outcome
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::SyncError;
    use crate::platform::{MemoryPlatform, ResourceDescriptor};
    use crate::store::{MemoryMirrorStore, ResourceMirror};
    use crate::sync::ResourceSync;
    use mirrorsync_events::{decode_action, EventStatus};
    use parking_lot::Mutex;

    fn ctx() -> SystemContext {
        SystemContext::system("system", "test")
    }

    /// Records which sync entry points were hit.
    struct CountingSync {
        family: ResourceFamily,
        calls: Mutex<Vec<String>>,
    }

    impl CountingSync {
        fn new(family: ResourceFamily) -> Arc<Self> {
            Arc::new(Self {
                family,
                calls: Mutex::new(Vec::new()),
            })
        }

        fn count(&self) -> usize {
            self.calls.lock().len()
        }
    }

    impl ResourceSync for CountingSync {
        fn family(&self) -> ResourceFamily {
            self.family
        }

        fn sync_all(&self, _ctx: &SystemContext) -> SyncResult<SyncReport> {
            self.calls.lock().push("all".into());
            Ok(SyncReport::new(self.family))
        }

        fn sync_one(&self, _ctx: &SystemContext, uuid: &str) -> SyncResult<SyncReport> {
            self.calls.lock().push(uuid.to_string());
            Ok(SyncReport::new(self.family))
        }

        fn apply_descriptor(
            &self,
            _ctx: &SystemContext,
            descriptor: &ResourceDescriptor,
        ) -> SyncResult<SyncReport> {
            self.calls.lock().push(descriptor.uuid.clone());
            Ok(SyncReport::new(self.family))
        }
    }

    struct Harness {
        syncs: HashMap<ResourceFamily, Arc<CountingSync>>,
        store: Arc<MemoryMirrorStore>,
        dispatcher: Dispatcher,
    }

    impl Harness {
        fn new() -> Self {
            let store = Arc::new(MemoryMirrorStore::new());
            let mut registry = SyncRegistry::new();
            let mut syncs = HashMap::new();
            for family in ResourceFamily::ALL {
                let sync = CountingSync::new(family);
                registry.register(sync.clone());
                syncs.insert(family, sync);
            }
            let dispatcher =
                Dispatcher::standard(&registry, Arc::new(MemoryPlatform::new()), store.clone(), None)
                    .unwrap();
            Self {
                syncs,
                store,
                dispatcher,
            }
        }

        fn calls(&self, family: ResourceFamily) -> usize {
            self.syncs[&family].count()
        }

        fn total_calls(&self) -> usize {
            self.syncs.values().map(|s| s.count()).sum()
        }

        fn dispatch_json(&self, payload: &str) -> DispatchOutcome {
            let event = decode_action(payload.as_bytes()).unwrap();
            self.dispatcher.dispatch(&ctx(), &event)
        }
    }

    #[test]
    fn standard_table_categories() {
        let harness = Harness::new();
        let categories = harness.dispatcher.categories();
        for category in [
            "VM.", "USER.", "ACCOUNT.", "DISK.", "DOMAIN.", "ZONE.", "GUEST.", "OS.", "NETWORK.",
            "SERVICE.", "SNAPSHOT.", "VOLUME.", "NIC.", "TEMPLATE.", "VMSNAPSHOT.",
            "VM_SNAPSHOT.", "PROJECT.", "ISO.", "HOST.", "VPC.",
        ] {
            assert!(categories.contains(&category), "missing {}", category);
        }
    }

    #[test]
    fn user_login_takes_noop_branch() {
        let harness = Harness::new();
        let outcome = harness.dispatch_json(r#"{"event":"USER.LOGIN","account":"admin"}"#);
        assert!(matches!(outcome, DispatchOutcome::Ignored { .. }));
        assert_eq!(harness.total_calls(), 0);

        harness.dispatch_json(r#"{"event":"ACCOUNT.LOGOUT"}"#);
        assert_eq!(harness.total_calls(), 0);

        harness.dispatch_json(r#"{"event":"USER.CREATE"}"#);
        assert_eq!(harness.calls(ResourceFamily::User), 1);
    }

    #[test]
    fn network_offering_routes_to_offering_sync() {
        let harness = Harness::new();
        harness.dispatch_json(r#"{"event":"NETWORK.OFFERING.CREATE","id":"off-1"}"#);
        assert_eq!(harness.calls(ResourceFamily::NetworkOffering), 1);
        assert_eq!(harness.calls(ResourceFamily::Network), 0);
    }

    #[test]
    fn network_sub_events_other_than_create_are_noops() {
        let harness = Harness::new();
        harness.dispatch_json(r#"{"event":"NETWORK.UPDATE","entityuuid":"net-1"}"#);
        assert_eq!(harness.total_calls(), 0);

        harness.dispatch_json(r#"{"event":"NETWORK.CREATE","entityuuid":"net-1"}"#);
        assert_eq!(*harness.syncs[&ResourceFamily::Network].calls.lock(), vec!["net-1"]);
    }

    #[test]
    fn noop_and_unknown_categories() {
        let harness = Harness::new();
        for name in ["ROUTER.START", "HOST.RECONNECT", "LB.CREATE", "MAINTENANCE"] {
            let outcome = harness.dispatch_json(&format!(r#"{{"event":"{}"}}"#, name));
            assert!(matches!(outcome, DispatchOutcome::Ignored { .. }), "{}", name);
        }
        assert_eq!(harness.total_calls(), 0);
    }

    #[test]
    fn both_vm_snapshot_spellings() {
        let harness = Harness::new();
        harness.dispatch_json(r#"{"event":"VMSNAPSHOT.CREATE"}"#);
        harness.dispatch_json(r#"{"event":"VM_SNAPSHOT.DELETE"}"#);
        assert_eq!(harness.calls(ResourceFamily::VmSnapshot), 2);
    }

    #[test]
    fn guest_and_os_share_handler() {
        let harness = Harness::new();
        harness.dispatch_json(r#"{"event":"GUEST.OS.ADD"}"#);
        harness.dispatch_json(r#"{"event":"OS.TYPE.UPDATE"}"#);
        assert_eq!(harness.calls(ResourceFamily::OsType), 2);
    }

    #[test]
    fn vm_start_applies_running() {
        let harness = Harness::new();
        let mut record = ResourceMirror::new(ResourceFamily::Instance, "abc-1", "system");
        record.status = LifecycleStatus::Starting;
        harness.store.upsert(&ctx(), record).unwrap();

        let outcome = harness.dispatch_json(r#"{"event":"VM.START","id":"abc-1"}"#);
        assert!(matches!(outcome, DispatchOutcome::StateApplied(StateChange::Applied(_))));

        let record = harness
            .store
            .find_by_uuid(&ctx(), ResourceFamily::Instance, "abc-1")
            .unwrap()
            .unwrap();
        assert_eq!(record.status, LifecycleStatus::Running);
        assert_eq!(record.event_message, "");
        assert_eq!(harness.calls(ResourceFamily::Instance), 0);
    }

    #[test]
    fn vm_other_action_resyncs_target() {
        let harness = Harness::new();
        harness.dispatch_json(r#"{"event":"VM.UPGRADE","entityuuid":"abc-9"}"#);
        assert_eq!(*harness.syncs[&ResourceFamily::Instance].calls.lock(), vec!["abc-9"]);
    }

    struct FailingHandler;

    impl EventHandler for FailingHandler {
        fn name(&self) -> &'static str {
            "failing"
        }

        fn handle(&self, _ctx: &SystemContext, _event: &Event) -> SyncResult<DispatchOutcome> {
            Err(SyncError::platform_retryable("connection refused"))
        }
    }

    struct PanickingHandler;

    impl EventHandler for PanickingHandler {
        fn name(&self) -> &'static str {
            "panicking"
        }

        fn handle(&self, _ctx: &SystemContext, _event: &Event) -> SyncResult<DispatchOutcome> {
            panic!("boom")
        }
    }

    fn updater() -> SharedUpdater {
        let store: Arc<dyn MirrorStore> = Arc::new(MemoryMirrorStore::new());
        Arc::new(StateUpdater::new(store))
    }

    #[test]
    fn handler_errors_are_contained() {
        let dispatcher = Dispatcher::builder(updater())
            .on("VM.", Arc::new(FailingHandler))
            .on("HOST.", Arc::new(PanickingHandler))
            .build();

        let outcome = dispatcher.dispatch(&ctx(), &Event::new("VM.START"));
        assert!(outcome.is_failed());

        let outcome = dispatcher.dispatch(&ctx(), &Event::new("HOST.ADD"));
        let DispatchOutcome::Failed { error } = outcome else {
            panic!("expected failure");
        };
        assert!(error.contains("boom"));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let dispatcher = Dispatcher::builder(updater())
            .on("vm.", Arc::new(NoopHandler::new("test")))
            .build();
        assert!(dispatcher.handler_for("VM.").is_some());
        assert!(dispatcher.handler_for("vm.").is_some());
    }

    #[test]
    fn resource_state_events() {
        let harness = Harness::new();
        harness
            .store
            .upsert(
                &ctx(),
                ResourceMirror::new(ResourceFamily::Volume, "vol-1", "system"),
            )
            .unwrap();

        let outcome = harness.dispatcher.dispatch_state(
            &ctx(),
            &ResourceStateEvent {
                id: "vol-1".into(),
                resource: Some("Volume".into()),
                old_state: Some("Ready".into()),
                new_state: "Error".into(),
                event: Some("OperationFailed".into()),
            },
        );
        let DispatchOutcome::StateApplied(StateChange::Applied(record)) = outcome else {
            panic!("expected applied");
        };
        assert_eq!(record.status, LifecycleStatus::Error);
        assert_eq!(record.event_message, "OperationFailed failed");

        let outcome = harness.dispatcher.dispatch_state(
            &ctx(),
            &ResourceStateEvent {
                id: "h-1".into(),
                resource: Some("Host".into()),
                old_state: None,
                new_state: "Up".into(),
                event: None,
            },
        );
        assert!(matches!(outcome, DispatchOutcome::Ignored { .. }));
    }

    #[test]
    fn instance_error_without_mirror_is_noop() {
        let harness = Harness::new();
        let event = Event::new("VM.START")
            .with_id("ghost")
            .with_status(EventStatus::Error);
        let outcome = harness.dispatcher.dispatch(&ctx(), &event);
        assert_eq!(outcome, DispatchOutcome::StateApplied(StateChange::UnknownResource));
        assert!(harness.store.is_empty());
    }
}
