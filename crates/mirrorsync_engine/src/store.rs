//! Mirror records and the persistence boundary.

use crate::context::SystemContext;
use crate::error::{SyncError, SyncResult};
use crate::family::ResourceFamily;
use crate::status::LifecycleStatus;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

/// Local copy of one platform resource.
///
/// `uuid` is the only join key with the platform. `id` is local and never
/// sent out.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceMirror {
    /// Local id, assigned by the store.
    pub id: u64,
    /// Platform uuid.
    pub uuid: String,
    /// Resource family.
    pub family: ResourceFamily,
    /// Display name.
    pub name: Option<String>,
    /// Lifecycle status.
    pub status: LifecycleStatus,
    /// Last error, or empty.
    pub event_message: String,
    /// Remaining descriptor fields.
    pub attributes: Map<String, Value>,
    /// False once the platform stopped reporting the resource.
    pub active: bool,
    /// Principal that created the record.
    pub created_by: String,
    /// Principal that last changed the record.
    pub updated_by: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// Last change time.
    pub updated_at: DateTime<Utc>,
}

impl ResourceMirror {
    /// Creates an unsaved record (`id == 0`).
    pub fn new(family: ResourceFamily, uuid: impl Into<String>, actor: &str) -> Self {
        let now = Utc::now();
        Self {
            id: 0,
            uuid: uuid.into(),
            family,
            name: None,
            status: LifecycleStatus::Active,
            event_message: String::new(),
            attributes: Map::new(),
            active: true,
            created_by: actor.to_string(),
            updated_by: actor.to_string(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Marks the record as changed by `actor` now.
    pub fn touch(&mut self, actor: &str) {
        self.updated_by = actor.to_string();
        self.updated_at = Utc::now();
    }
}

/// Persistence contract for mirror records, per family.
pub trait MirrorStore: Send + Sync {
    /// Finds a record by uuid, active or not.
    fn find_by_uuid(
        &self,
        ctx: &SystemContext,
        family: ResourceFamily,
        uuid: &str,
    ) -> SyncResult<Option<ResourceMirror>>;

    /// Inserts or replaces a record keyed by `(family, uuid)`.
    ///
    /// A new record gets the next local id; an existing one keeps its id.
    fn upsert(&self, ctx: &SystemContext, record: ResourceMirror) -> SyncResult<ResourceMirror>;

    /// Sets only status and event message. Returns `None` if the uuid is unknown.
    fn patch_status(
        &self,
        ctx: &SystemContext,
        family: ResourceFamily,
        uuid: &str,
        status: LifecycleStatus,
        event_message: String,
    ) -> SyncResult<Option<ResourceMirror>>;

    /// Marks a record inactive. Returns true if it was active.
    fn soft_delete(&self, ctx: &SystemContext, family: ResourceFamily, uuid: &str)
        -> SyncResult<bool>;

    /// Returns the uuids of active records of a family.
    fn active_uuids(&self, ctx: &SystemContext, family: ResourceFamily) -> SyncResult<Vec<String>>;

    /// Returns every record of a family, ordered by local id.
    fn list(&self, ctx: &SystemContext, family: ResourceFamily) -> SyncResult<Vec<ResourceMirror>>;
}

/// An in-memory mirror store.
pub struct MemoryMirrorStore {
    records: RwLock<BTreeMap<(ResourceFamily, String), ResourceMirror>>,
    next_id: AtomicU64,
    unavailable: AtomicBool,
}

impl MemoryMirrorStore {
    /// Creates an empty store.
    pub fn new() -> Self {
        Self {
            records: RwLock::new(BTreeMap::new()),
            next_id: AtomicU64::new(1),
            unavailable: AtomicBool::new(false),
        }
    }

    /// Makes every call fail until cleared.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Returns every record across families.
    pub fn snapshot(&self) -> Vec<ResourceMirror> {
        let mut records: Vec<_> = self.records.read().values().cloned().collect();
        records.sort_by_key(|r| r.id);
        records
    }

    /// Returns the number of records, active or not.
    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    /// Returns true if the store holds no records.
    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    fn check(&self, ctx: &SystemContext) -> SyncResult<()> {
        ctx.require_admin()?;
        if self.unavailable.load(Ordering::SeqCst) {
            return Err(SyncError::Store("mirror store unavailable".into()));
        }
        Ok(())
    }
}

impl Default for MemoryMirrorStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MirrorStore for MemoryMirrorStore {
    fn find_by_uuid(
        &self,
        ctx: &SystemContext,
        family: ResourceFamily,
        uuid: &str,
    ) -> SyncResult<Option<ResourceMirror>> {
        self.check(ctx)?;
        Ok(self.records.read().get(&(family, uuid.to_string())).cloned())
    }

    fn upsert(&self, ctx: &SystemContext, mut record: ResourceMirror) -> SyncResult<ResourceMirror> {
        self.check(ctx)?;
        let mut records = self.records.write();
        let key = (record.family, record.uuid.clone());
        record.id = match records.get(&key) {
            Some(existing) => existing.id,
            None => self.next_id.fetch_add(1, Ordering::SeqCst),
        };
        records.insert(key, record.clone());
        Ok(record)
    }

    fn patch_status(
        &self,
        ctx: &SystemContext,
        family: ResourceFamily,
        uuid: &str,
        status: LifecycleStatus,
        event_message: String,
    ) -> SyncResult<Option<ResourceMirror>> {
        self.check(ctx)?;
        let mut records = self.records.write();
        let Some(record) = records.get_mut(&(family, uuid.to_string())) else {
            return Ok(None);
        };
        record.status = status;
        record.event_message = event_message;
        record.touch(&ctx.principal().name);
        Ok(Some(record.clone()))
    }

    fn soft_delete(
        &self,
        ctx: &SystemContext,
        family: ResourceFamily,
        uuid: &str,
    ) -> SyncResult<bool> {
        self.check(ctx)?;
        let mut records = self.records.write();
        match records.get_mut(&(family, uuid.to_string())) {
            Some(record) if record.active => {
                record.active = false;
                record.touch(&ctx.principal().name);
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    fn active_uuids(&self, ctx: &SystemContext, family: ResourceFamily) -> SyncResult<Vec<String>> {
        self.check(ctx)?;
        Ok(self
            .records
            .read()
            .values()
            .filter(|r| r.family == family && r.active)
            .map(|r| r.uuid.clone())
            .collect())
    }

    fn list(&self, ctx: &SystemContext, family: ResourceFamily) -> SyncResult<Vec<ResourceMirror>> {
        self.check(ctx)?;
        let mut records: Vec<_> = self
            .records
            .read()
            .values()
            .filter(|r| r.family == family)
            .cloned()
            .collect();
        records.sort_by_key(|r| r.id);
        Ok(records)
    }
}
