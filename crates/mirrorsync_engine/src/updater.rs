//! Point status updates for a single mirror record.

use crate::context::SystemContext;
use crate::error::SyncResult;
use crate::family::ResourceFamily;
use crate::status::LifecycleStatus;
use crate::store::{MirrorStore, ResourceMirror};
use std::sync::Arc;
use tracing::{debug, info};

/// Result of [`StateUpdater::apply_state`].
#[derive(Debug, Clone, PartialEq)]
pub enum StateChange {
    /// The record was patched.
    Applied(ResourceMirror),
    /// No record with that uuid exists yet; nothing was written.
    UnknownResource,
}

impl StateChange {
    /// Returns true if a record was patched.
    pub fn is_applied(&self) -> bool {
        matches!(self, StateChange::Applied(_))
    }
}

/// Patches `status` and `event_message` without a resync round-trip.
///
/// Last write wins: a non-error update always clears the message and sets
/// the status, whatever the record held before.
pub struct StateUpdater<S: ?Sized> {
    store: Arc<S>,
}

impl<S: MirrorStore + ?Sized> StateUpdater<S> {
    /// Creates an updater over a store.
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Applies a status to the mirror of `uuid`.
    ///
    /// With `is_error`, the status becomes `Error` and the message names the
    /// triggering event. An unknown uuid is not an error.
    pub fn apply_state(
        &self,
        ctx: &SystemContext,
        family: ResourceFamily,
        uuid: &str,
        status: LifecycleStatus,
        is_error: bool,
        trigger: &str,
    ) -> SyncResult<StateChange> {
        let (status, message) = if is_error {
            (LifecycleStatus::Error, error_message(trigger))
        } else {
            (status, String::new())
        };

        match self
            .store
            .patch_status(ctx, family, uuid, status, message)?
        {
            Some(record) => {
                info!(family = %family, uuid, status = %record.status, trigger, "mirror status applied");
                Ok(StateChange::Applied(record))
            }
            None => {
                debug!(family = %family, uuid, trigger, "no mirror for uuid, skipping state update");
                Ok(StateChange::UnknownResource)
            }
        }
    }
}

/// Formats the event message recorded on an error transition.
pub fn error_message(trigger: &str) -> String {
    let trigger = trigger.trim();
    if trigger.is_empty() {
        "operation failed".to_string()
    } else {
        format!("{} failed", trigger)
    }
}
