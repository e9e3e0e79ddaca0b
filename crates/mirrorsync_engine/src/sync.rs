//! Resource sync handlers.
//!
//! A sync pulls a family (or one resource of it) from the platform and
//! upserts it into the mirror by uuid. Records the platform no longer reports
//! are soft-deleted. Re-running a sync against unchanged platform state
//! writes nothing.
//!
//! Syncs of the same family are serialized by a per-family lock because the
//! reconciliation is read-then-write. Different families run concurrently.

use crate::context::SystemContext;
use crate::error::{SyncError, SyncResult};
use crate::family::ResourceFamily;
use crate::platform::{ListRequest, PlatformClient, ResourceDescriptor};
use crate::status::LifecycleStatus;
use crate::store::{MirrorStore, ResourceMirror};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Counts of what one sync changed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    /// Family that was synchronized.
    pub family: ResourceFamily,
    /// Records inserted.
    pub created: u64,
    /// Records changed.
    pub updated: u64,
    /// Records already matching the platform.
    pub unchanged: u64,
    /// Records soft-deleted.
    pub deleted: u64,
}

impl SyncReport {
    /// Creates an empty report.
    pub fn new(family: ResourceFamily) -> Self {
        Self {
            family,
            created: 0,
            updated: 0,
            unchanged: 0,
            deleted: 0,
        }
    }

    /// Returns true if nothing was written.
    pub fn is_noop(&self) -> bool {
        self.created == 0 && self.updated == 0 && self.deleted == 0
    }
}

/// Outcome of reconciling one descriptor.
enum Reconciled {
    Created(ResourceMirror),
    Updated(ResourceMirror),
    Unchanged,
}

/// Pull-and-reconcile for one resource family.
pub trait ResourceSync: Send + Sync {
    /// Family handled by this synchronizer.
    fn family(&self) -> ResourceFamily;

    /// Reconciles the whole family.
    fn sync_all(&self, ctx: &SystemContext) -> SyncResult<SyncReport>;

    /// Reconciles a single resource.
    fn sync_one(&self, ctx: &SystemContext, uuid: &str) -> SyncResult<SyncReport>;

    /// Reconciles descriptors already fetched by the caller, for one uuid.
    ///
    /// Used after an async poll, which has the fresh descriptor in hand.
    fn apply_descriptor(
        &self,
        ctx: &SystemContext,
        descriptor: &ResourceDescriptor,
    ) -> SyncResult<SyncReport>;
}

/// Default [`ResourceSync`] backed by a platform client and a mirror store.
pub struct FamilySynchronizer<P: ?Sized, S: ?Sized> {
    family: ResourceFamily,
    platform: Arc<P>,
    store: Arc<S>,
    lock: Mutex<()>,
}

impl<P, S> FamilySynchronizer<P, S>
where
    P: PlatformClient + ?Sized,
    S: MirrorStore + ?Sized,
{
    /// Creates a synchronizer for a family.
    pub fn new(family: ResourceFamily, platform: Arc<P>, store: Arc<S>) -> Self {
        Self {
            family,
            platform,
            store,
            lock: Mutex::new(()),
        }
    }

    fn reconcile(
        &self,
        ctx: &SystemContext,
        descriptor: &ResourceDescriptor,
    ) -> SyncResult<Reconciled> {
        let actor = ctx.principal().name.as_str();
        let existing = self.store.find_by_uuid(ctx, self.family, &descriptor.uuid)?;

        let Some(existing) = existing else {
            let mut record = ResourceMirror::new(self.family, descriptor.uuid.clone(), actor);
            record.name = descriptor.name.clone();
            record.status = descriptor
                .state
                .as_deref()
                .map(LifecycleStatus::from_platform)
                .unwrap_or(LifecycleStatus::Active);
            record.attributes = descriptor.attributes.clone();
            return Ok(Reconciled::Created(self.store.upsert(ctx, record)?));
        };

        let status = descriptor
            .state
            .as_deref()
            .map(LifecycleStatus::from_platform)
            .unwrap_or_else(|| existing.status.clone());
        let status_changed = status != existing.status;

        if !status_changed
            && existing.active
            && existing.name == descriptor.name
            && existing.attributes == descriptor.attributes
        {
            return Ok(Reconciled::Unchanged);
        }

        let mut record = existing;
        if status_changed {
            record.event_message.clear();
        }
        record.status = status;
        record.name = descriptor.name.clone();
        record.attributes = descriptor.attributes.clone();
        record.active = true;
        record.touch(actor);
        Ok(Reconciled::Updated(self.store.upsert(ctx, record)?))
    }

    fn record(&self, report: &mut SyncReport, outcome: Reconciled) {
        match outcome {
            Reconciled::Created(record) => {
                debug!(family = %self.family, uuid = %record.uuid, id = record.id, "mirror created");
                report.created += 1;
            }
            Reconciled::Updated(record) => {
                debug!(family = %self.family, uuid = %record.uuid, status = %record.status, "mirror updated");
                report.updated += 1;
            }
            Reconciled::Unchanged => report.unchanged += 1,
        }
    }

    fn log_report(&self, report: &SyncReport, scope: &str) {
        if report.is_noop() {
            debug!(family = %self.family, scope, unchanged = report.unchanged, "sync made no changes");
        } else {
            info!(
                family = %self.family,
                scope,
                created = report.created,
                updated = report.updated,
                deleted = report.deleted,
                "sync applied"
            );
        }
    }
}

impl<P, S> ResourceSync for FamilySynchronizer<P, S>
where
    P: PlatformClient + ?Sized,
    S: MirrorStore + ?Sized,
{
    fn family(&self) -> ResourceFamily {
        self.family
    }

    fn sync_all(&self, ctx: &SystemContext) -> SyncResult<SyncReport> {
        let _guard = self.lock.lock();
        let mut report = SyncReport::new(self.family);

        let request = ListRequest::for_family(self.family);
        let descriptors = self.platform.list(ctx, &request)?;

        let mut seen = HashSet::with_capacity(descriptors.len());
        for descriptor in &descriptors {
            if !seen.insert(descriptor.uuid.clone()) {
                warn!(family = %self.family, uuid = %descriptor.uuid, "duplicate uuid in platform listing");
                continue;
            }
            let outcome = self.reconcile(ctx, descriptor)?;
            self.record(&mut report, outcome);
        }

        for uuid in self.store.active_uuids(ctx, self.family)? {
            if !seen.contains(&uuid) && self.store.soft_delete(ctx, self.family, &uuid)? {
                debug!(family = %self.family, uuid = %uuid, "mirror soft-deleted");
                report.deleted += 1;
            }
        }

        self.log_report(&report, "all");
        Ok(report)
    }

    fn sync_one(&self, ctx: &SystemContext, uuid: &str) -> SyncResult<SyncReport> {
        let _guard = self.lock.lock();
        let mut report = SyncReport::new(self.family);

        let request = ListRequest::for_family(self.family).with_id(uuid);
        let descriptor = self
            .platform
            .list(ctx, &request)?
            .into_iter()
            .find(|d| d.uuid == uuid);

        match descriptor {
            Some(descriptor) => {
                let outcome = self.reconcile(ctx, &descriptor)?;
                self.record(&mut report, outcome);
            }
            None => {
                if self.store.soft_delete(ctx, self.family, uuid)? {
                    report.deleted += 1;
                }
            }
        }

        self.log_report(&report, uuid);
        Ok(report)
    }

    fn apply_descriptor(
        &self,
        ctx: &SystemContext,
        descriptor: &ResourceDescriptor,
    ) -> SyncResult<SyncReport> {
        let _guard = self.lock.lock();
        let mut report = SyncReport::new(self.family);
        let outcome = self.reconcile(ctx, descriptor)?;
        self.record(&mut report, outcome);
        self.log_report(&report, &descriptor.uuid);
        Ok(report)
    }
}

/// One synchronizer per resource family.
#[derive(Clone, Default)]
pub struct SyncRegistry {
    syncs: HashMap<ResourceFamily, Arc<dyn ResourceSync>>,
}

impl SyncRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a registry with a [`FamilySynchronizer`] for every family.
    pub fn standard<P, S>(platform: Arc<P>, store: Arc<S>) -> Self
    where
        P: PlatformClient + ?Sized + 'static,
        S: MirrorStore + ?Sized + 'static,
    {
        let mut registry = Self::new();
        for family in ResourceFamily::ALL {
            registry.register(Arc::new(FamilySynchronizer::new(
                family,
                Arc::clone(&platform),
                Arc::clone(&store),
            )));
        }
        registry
    }

    /// Registers a synchronizer, replacing any existing one for its family.
    pub fn register(&mut self, sync: Arc<dyn ResourceSync>) {
        self.syncs.insert(sync.family(), sync);
    }

    /// Returns the synchronizer for a family.
    pub fn get(&self, family: ResourceFamily) -> SyncResult<Arc<dyn ResourceSync>> {
        self.syncs
            .get(&family)
            .cloned()
            .ok_or(SyncError::UnregisteredFamily(family))
    }

    /// Runs a full sync of every registered family, in dependency order.
    ///
    /// A failing family is logged and skipped.
    pub fn sync_everything(&self, ctx: &SystemContext) -> Vec<SyncReport> {
        let mut reports = Vec::new();
        for family in ResourceFamily::ALL {
            let Some(sync) = self.syncs.get(&family) else {
                continue;
            };
            match sync.sync_all(ctx) {
                Ok(report) => reports.push(report),
                Err(e) => warn!(family = %family, error = %e, "full sync failed"),
            }
        }
        reports
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::MemoryPlatform;
    use crate::store::MemoryMirrorStore;

    fn ctx() -> SystemContext {
        SystemContext::system("system", "test")
    }

    fn setup(
        family: ResourceFamily,
    ) -> (
        Arc<MemoryPlatform>,
        Arc<MemoryMirrorStore>,
        FamilySynchronizer<MemoryPlatform, MemoryMirrorStore>,
    ) {
        let platform = Arc::new(MemoryPlatform::new());
        let store = Arc::new(MemoryMirrorStore::new());
        let sync = FamilySynchronizer::new(family, Arc::clone(&platform), Arc::clone(&store));
        (platform, store, sync)
    }

    #[test]
    fn sync_all_creates_records() {
        let (platform, store, sync) = setup(ResourceFamily::Instance);
        platform.insert(
            ResourceFamily::Instance,
            ResourceDescriptor::new("a").with_name("web").with_state("Running"),
        );
        platform.insert(
            ResourceFamily::Instance,
            ResourceDescriptor::new("b").with_state("Stopped"),
        );

        let report = sync.sync_all(&ctx()).unwrap();
        assert_eq!(report.created, 2);

        let a = store
            .find_by_uuid(&ctx(), ResourceFamily::Instance, "a")
            .unwrap()
            .unwrap();
        assert_eq!(a.status, LifecycleStatus::Running);
        assert_eq!(a.name.as_deref(), Some("web"));
        assert_eq!(a.created_by, "system");
    }

    #[test]
    fn sync_all_is_idempotent() {
        let (platform, store, sync) = setup(ResourceFamily::Volume);
        platform.insert(
            ResourceFamily::Volume,
            ResourceDescriptor::new("v-1")
                .with_state("Ready")
                .with_attribute("size", 1024),
        );

        sync.sync_all(&ctx()).unwrap();
        let before = store.snapshot();

        let report = sync.sync_all(&ctx()).unwrap();
        assert!(report.is_noop());
        assert_eq!(report.unchanged, 1);
        assert_eq!(store.snapshot(), before);
    }

    #[test]
    fn sync_all_soft_deletes_missing() {
        let (platform, store, sync) = setup(ResourceFamily::Network);
        platform.insert(ResourceFamily::Network, ResourceDescriptor::new("n-1"));
        platform.insert(ResourceFamily::Network, ResourceDescriptor::new("n-2"));
        sync.sync_all(&ctx()).unwrap();

        platform.remove(ResourceFamily::Network, "n-2");
        let report = sync.sync_all(&ctx()).unwrap();
        assert_eq!(report.deleted, 1);
        assert_eq!(
            store.active_uuids(&ctx(), ResourceFamily::Network).unwrap(),
            vec!["n-1".to_string()]
        );

        // Reappearing resources are reactivated with the same local id.
        let old_id = store
            .find_by_uuid(&ctx(), ResourceFamily::Network, "n-2")
            .unwrap()
            .unwrap()
            .id;
        platform.insert(ResourceFamily::Network, ResourceDescriptor::new("n-2"));
        let report = sync.sync_all(&ctx()).unwrap();
        assert_eq!(report.updated, 1);
        let n2 = store
            .find_by_uuid(&ctx(), ResourceFamily::Network, "n-2")
            .unwrap()
            .unwrap();
        assert!(n2.active);
        assert_eq!(n2.id, old_id);
    }

    #[test]
    fn sync_one_scopes_the_query() {
        let (platform, store, sync) = setup(ResourceFamily::Instance);
        platform.insert(
            ResourceFamily::Instance,
            ResourceDescriptor::new("a").with_state("Running"),
        );
        platform.insert(
            ResourceFamily::Instance,
            ResourceDescriptor::new("b").with_state("Running"),
        );

        let report = sync.sync_one(&ctx(), "a").unwrap();
        assert_eq!(report.created, 1);
        assert_eq!(store.len(), 1);
        assert_eq!(platform.requests()[0].id_filter(), Some("a"));
    }

    #[test]
    fn sync_one_soft_deletes_vanished_resource() {
        let (platform, store, sync) = setup(ResourceFamily::Instance);
        platform.insert(ResourceFamily::Instance, ResourceDescriptor::new("a"));
        sync.sync_one(&ctx(), "a").unwrap();

        platform.remove(ResourceFamily::Instance, "a");
        let report = sync.sync_one(&ctx(), "a").unwrap();
        assert_eq!(report.deleted, 1);
        assert!(store
            .active_uuids(&ctx(), ResourceFamily::Instance)
            .unwrap()
            .is_empty());
    }

    #[test]
    fn status_change_clears_event_message() {
        let (platform, store, sync) = setup(ResourceFamily::Instance);
        platform.insert(
            ResourceFamily::Instance,
            ResourceDescriptor::new("a").with_state("Running"),
        );
        sync.sync_all(&ctx()).unwrap();
        store
            .patch_status(
                &ctx(),
                ResourceFamily::Instance,
                "a",
                LifecycleStatus::Error,
                "VM.STOP failed".into(),
            )
            .unwrap();

        sync.sync_all(&ctx()).unwrap();
        let a = store
            .find_by_uuid(&ctx(), ResourceFamily::Instance, "a")
            .unwrap()
            .unwrap();
        assert_eq!(a.status, LifecycleStatus::Running);
        assert!(a.event_message.is_empty());
    }

    #[test]
    fn platform_failure_surfaces() {
        let (platform, store, sync) = setup(ResourceFamily::Zone);
        platform.set_unavailable(Some("timeout"));
        let err = sync.sync_all(&ctx()).unwrap_err();
        assert!(err.is_retryable());
        assert!(store.is_empty());
    }

    #[test]
    fn concurrent_syncs_of_one_family_do_not_duplicate() {
        let (platform, store, sync) = setup(ResourceFamily::Volume);
        for i in 0..50 {
            platform.insert(
                ResourceFamily::Volume,
                ResourceDescriptor::new(format!("v-{}", i)),
            );
        }
        let sync = Arc::new(sync);

        std::thread::scope(|scope| {
            for _ in 0..4 {
                let sync = Arc::clone(&sync);
                scope.spawn(move || sync.sync_all(&ctx()).unwrap());
            }
        });

        let records = store.snapshot();
        assert_eq!(records.len(), 50);
        let ids: HashSet<u64> = records.iter().map(|r| r.id).collect();
        assert_eq!(ids.len(), 50);
    }

    #[test]
    fn registry_lookup() {
        let platform = Arc::new(MemoryPlatform::new());
        let store = Arc::new(MemoryMirrorStore::new());
        let registry = SyncRegistry::standard(platform, store);
        assert_eq!(
            registry.get(ResourceFamily::Template).unwrap().family(),
            ResourceFamily::Template
        );
        assert!(matches!(
            SyncRegistry::new().get(ResourceFamily::Zone),
            Err(SyncError::UnregisteredFamily(ResourceFamily::Zone))
        ));
    }

    #[test]
    fn sync_everything_skips_failures() {
        let platform = Arc::new(MemoryPlatform::new());
        let store = Arc::new(MemoryMirrorStore::new());
        platform.insert(ResourceFamily::Zone, ResourceDescriptor::new("z-1"));
        let registry = SyncRegistry::standard(Arc::clone(&platform), Arc::clone(&store));

        let reports = registry.sync_everything(&ctx());
        assert_eq!(reports.len(), ResourceFamily::ALL.len());
        assert_eq!(store.len(), 1);

        platform.set_unavailable(Some("down"));
        assert!(registry.sync_everything(&ctx()).is_empty());
    }
}
