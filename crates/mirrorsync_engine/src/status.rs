//! Lifecycle status of a mirrored resource.

use mirrorsync_events::EventStatus;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Lifecycle state of a mirror record.
///
/// `Starting → Running ⇄ Stopping → Stopped`, `Running/Stopped → Destroyed`,
/// any state `→ Error`. Families without a lifecycle report `Active` or the
/// platform's own state name.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", from = "String")]
pub enum LifecycleStatus {
    /// Booting.
    Starting,
    /// Up.
    Running,
    /// Shutting down.
    Stopping,
    /// Down.
    Stopped,
    /// Removed on the platform.
    Destroyed,
    /// Last operation failed.
    Error,
    /// Present, without a reported state.
    Active,
    /// Any other platform state, verbatim.
    Other(String),
}

impl LifecycleStatus {
    /// Maps a platform state name, case-insensitively.
    pub fn from_platform(state: &str) -> Self {
        match state.trim().to_ascii_lowercase().as_str() {
            "starting" => LifecycleStatus::Starting,
            "running" => LifecycleStatus::Running,
            "stopping" => LifecycleStatus::Stopping,
            "stopped" => LifecycleStatus::Stopped,
            "destroyed" | "expunging" | "expunged" => LifecycleStatus::Destroyed,
            "error" => LifecycleStatus::Error,
            "active" => LifecycleStatus::Active,
            _ => LifecycleStatus::Other(state.trim().to_string()),
        }
    }

    /// Returns the status name.
    pub fn as_str(&self) -> &str {
        match self {
            LifecycleStatus::Starting => "Starting",
            LifecycleStatus::Running => "Running",
            LifecycleStatus::Stopping => "Stopping",
            LifecycleStatus::Stopped => "Stopped",
            LifecycleStatus::Destroyed => "Destroyed",
            LifecycleStatus::Error => "Error",
            LifecycleStatus::Active => "Active",
            LifecycleStatus::Other(state) => state,
        }
    }

    /// Target status for a VM lifecycle action (`START`, `STOP`, ...).
    ///
    /// Returns `None` for actions that need a resync instead of a patch.
    pub fn transition_for(action: &str, status: Option<EventStatus>) -> Option<Self> {
        let in_progress = status.is_some_and(|s| s.is_in_progress());
        match action.to_ascii_uppercase().as_str() {
            "START" if in_progress => Some(LifecycleStatus::Starting),
            "START" => Some(LifecycleStatus::Running),
            "STOP" if in_progress => Some(LifecycleStatus::Stopping),
            "STOP" => Some(LifecycleStatus::Stopped),
            "REBOOT" => Some(LifecycleStatus::Running),
            "DESTROY" | "EXPUNGE" => Some(LifecycleStatus::Destroyed),
            _ => None,
        }
    }
}

impl fmt::Display for LifecycleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl From<LifecycleStatus> for String {
    fn from(status: LifecycleStatus) -> Self {
        status.as_str().to_string()
    }
}

impl From<String> for LifecycleStatus {
    fn from(state: String) -> Self {
        LifecycleStatus::from_platform(&state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn platform_states() {
        assert_eq!(LifecycleStatus::from_platform("Running"), LifecycleStatus::Running);
        assert_eq!(LifecycleStatus::from_platform("STOPPED"), LifecycleStatus::Stopped);
        assert_eq!(LifecycleStatus::from_platform("Expunging"), LifecycleStatus::Destroyed);
        assert_eq!(
            LifecycleStatus::from_platform("Ready"),
            LifecycleStatus::Other("Ready".into())
        );
    }

    #[test]
    fn vm_transitions() {
        assert_eq!(
            LifecycleStatus::transition_for("START", None),
            Some(LifecycleStatus::Running)
        );
        assert_eq!(
            LifecycleStatus::transition_for("START", Some(EventStatus::Started)),
            Some(LifecycleStatus::Starting)
        );
        assert_eq!(
            LifecycleStatus::transition_for("STOP", Some(EventStatus::Completed)),
            Some(LifecycleStatus::Stopped)
        );
        assert_eq!(
            LifecycleStatus::transition_for("STOP", Some(EventStatus::Scheduled)),
            Some(LifecycleStatus::Stopping)
        );
        assert_eq!(
            LifecycleStatus::transition_for("DESTROY", None),
            Some(LifecycleStatus::Destroyed)
        );
        assert_eq!(LifecycleStatus::transition_for("UPGRADE", None), None);
    }

    #[test]
    fn serializes_as_plain_string() {
        let json = serde_json::to_string(&LifecycleStatus::Running).unwrap();
        assert_eq!(json, "\"Running\"");

        let status: LifecycleStatus = serde_json::from_str("\"Implemented\"").unwrap();
        assert_eq!(status, LifecycleStatus::Other("Implemented".into()));
    }
}
