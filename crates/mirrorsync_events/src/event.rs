//! Typed event records.

use crate::classify::{classify, Category};
use crate::error::DecodeError;
use serde::Serialize;
use std::fmt;
use std::str::FromStr;

/// Logical channel an event arrives on.
///
/// Each channel carries its own payload shape and runs as an independent
/// consumer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum ChannelKind {
    /// Action events (`VM.START`, `VOLUME.ATTACH`, ...).
    Action,
    /// Flat resource-state transition events.
    ResourceState,
    /// Usage records.
    Usage,
    /// Alerts raised by the platform.
    Alert,
}

impl ChannelKind {
    /// All channels, in consumer start order.
    pub const ALL: [ChannelKind; 4] = [
        ChannelKind::Action,
        ChannelKind::ResourceState,
        ChannelKind::Usage,
        ChannelKind::Alert,
    ];

    /// Returns the canonical channel name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ChannelKind::Action => "action",
            ChannelKind::ResourceState => "resource-state",
            ChannelKind::Usage => "usage",
            ChannelKind::Alert => "alert",
        }
    }
}

impl fmt::Display for ChannelKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ChannelKind {
    type Err = DecodeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "action" | "actions" => Ok(ChannelKind::Action),
            "state" | "states" | "resource-state" | "resourcestate" => {
                Ok(ChannelKind::ResourceState)
            }
            "usage" => Ok(ChannelKind::Usage),
            "alert" | "alerts" => Ok(ChannelKind::Alert),
            _ => Err(DecodeError::UnknownChannel(s.to_string())),
        }
    }
}

/// Progress status reported with an action event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventStatus {
    /// The operation was queued.
    Scheduled,
    /// The operation record was created.
    Created,
    /// The operation started executing.
    Started,
    /// The operation finished successfully.
    Completed,
    /// The operation failed.
    Error,
}

impl EventStatus {
    /// Parses a status case-insensitively. Unknown values yield `None`.
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "scheduled" => Some(EventStatus::Scheduled),
            "created" => Some(EventStatus::Created),
            "started" => Some(EventStatus::Started),
            "completed" => Some(EventStatus::Completed),
            "error" | "failed" => Some(EventStatus::Error),
            _ => None,
        }
    }

    /// Returns true if the operation is still in flight.
    pub fn is_in_progress(&self) -> bool {
        matches!(
            self,
            EventStatus::Scheduled | EventStatus::Created | EventStatus::Started
        )
    }
}

/// An action event.
///
/// Constructed once from a wire message and consumed once by the dispatcher.
/// The category is derived whenever the event name is set and cannot be
/// assigned independently.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Event {
    /// Platform event id, or the resource uuid on minimal payloads.
    pub id: Option<String>,
    /// Uuid of the affected resource.
    pub entity_uuid: Option<String>,
    /// Type of the affected resource, when the platform reports it.
    pub entity_type: Option<String>,
    event_name: String,
    event_category: Category,
    /// Progress status of the operation.
    pub status: Option<EventStatus>,
    /// Platform timestamp, kept verbatim.
    pub timestamp: Option<String>,
    /// Account that triggered the event.
    pub actor_account: Option<String>,
    /// User that triggered the event.
    pub actor_user: Option<String>,
    /// Free-form description.
    pub description: Option<String>,
    /// Free-form subject.
    pub subject: Option<String>,
    /// Free-form body.
    pub body: Option<String>,
}

impl Event {
    /// Creates an event with the given dotted name.
    pub fn new(event_name: impl Into<String>) -> Self {
        let event_name = event_name.into();
        let event_category = classify(&event_name);
        Self {
            id: None,
            entity_uuid: None,
            entity_type: None,
            event_name,
            event_category,
            status: None,
            timestamp: None,
            actor_account: None,
            actor_user: None,
            description: None,
            subject: None,
            body: None,
        }
    }

    /// Sets the id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Sets the entity uuid.
    pub fn with_entity_uuid(mut self, uuid: impl Into<String>) -> Self {
        self.entity_uuid = Some(uuid.into());
        self
    }

    /// Sets the status.
    pub fn with_status(mut self, status: EventStatus) -> Self {
        self.status = Some(status);
        self
    }

    /// Returns the dotted event name.
    pub fn event_name(&self) -> &str {
        &self.event_name
    }

    /// Replaces the event name and re-derives the category.
    pub fn set_event_name(&mut self, event_name: impl Into<String>) {
        self.event_name = event_name.into();
        self.event_category = classify(&self.event_name);
    }

    /// Returns the derived category.
    pub fn category(&self) -> &Category {
        &self.event_category
    }

    /// Returns the uuid of the resource this event is about.
    ///
    /// Prefers `entityUuid`; minimal payloads carry the uuid in `id`.
    pub fn target_uuid(&self) -> Option<&str> {
        self.entity_uuid
            .as_deref()
            .or(self.id.as_deref())
            .filter(|uuid| !uuid.is_empty())
    }

    /// Returns true if the platform reported the operation as failed.
    pub fn is_error(&self) -> bool {
        self.status == Some(EventStatus::Error)
    }

    /// Returns the part of the name after the category (`START` for `VM.START`).
    pub fn action(&self) -> &str {
        self.event_name
            .strip_prefix(self.event_category.as_str())
            .unwrap_or(&self.event_name)
    }
}

/// A flat resource-state transition event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceStateEvent {
    /// Uuid of the resource.
    pub id: String,
    /// Resource type name (`VirtualMachine`, `Volume`, ...).
    pub resource: Option<String>,
    /// State before the transition.
    pub old_state: Option<String>,
    /// State after the transition.
    pub new_state: String,
    /// Event that caused the transition, when reported.
    pub event: Option<String>,
}

impl ResourceStateEvent {
    /// Returns true if the resource entered an error state.
    pub fn is_error(&self) -> bool {
        self.new_state.eq_ignore_ascii_case("error")
    }
}

/// A usage record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UsageEvent {
    /// Usage event name (`VM.CREATE`, `VOLUME.DELETE`, ...).
    pub event: String,
    /// Resource uuid.
    pub id: Option<String>,
    /// Zone uuid.
    pub zone: Option<String>,
    /// Owning account.
    pub account: Option<String>,
    /// Size in bytes, for storage usage.
    pub size: Option<u64>,
    /// Offering uuid.
    pub offering: Option<String>,
    /// Template uuid.
    pub template: Option<String>,
}

/// An alert raised by the platform.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
    /// Alert subject line.
    pub subject: String,
    /// Alert type code.
    pub alert_type: Option<String>,
    /// Zone the alert relates to.
    pub data_center_id: Option<String>,
    /// Pod the alert relates to.
    pub pod_id: Option<String>,
    /// Alert body.
    pub body: Option<String>,
}

/// An event decoded from one channel.
#[derive(Debug, Clone, PartialEq)]
pub enum DecodedEvent {
    /// Action event.
    Action(Event),
    /// Resource-state event.
    ResourceState(ResourceStateEvent),
    /// Usage event.
    Usage(UsageEvent),
    /// Alert event.
    Alert(AlertEvent),
}

impl DecodedEvent {
    /// Returns the channel this event belongs to.
    pub fn channel(&self) -> ChannelKind {
        match self {
            DecodedEvent::Action(_) => ChannelKind::Action,
            DecodedEvent::ResourceState(_) => ChannelKind::ResourceState,
            DecodedEvent::Usage(_) => ChannelKind::Usage,
            DecodedEvent::Alert(_) => ChannelKind::Alert,
        }
    }

    /// Returns a short label for logging.
    pub fn label(&self) -> &str {
        match self {
            DecodedEvent::Action(event) => event.event_name(),
            DecodedEvent::ResourceState(event) => &event.new_state,
            DecodedEvent::Usage(event) => &event.event,
            DecodedEvent::Alert(event) => &event.subject,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn category_follows_event_name() {
        let mut event = Event::new("VM.START");
        assert_eq!(event.category().as_str(), "VM.");

        event.set_event_name("VOLUME.ATTACH");
        assert_eq!(event.category().as_str(), "VOLUME.");
        assert_eq!(event.action(), "ATTACH");
    }

    #[test]
    fn target_uuid_prefers_entity_uuid() {
        let event = Event::new("VM.START").with_id("42").with_entity_uuid("abc-1");
        assert_eq!(event.target_uuid(), Some("abc-1"));

        let minimal = Event::new("VM.START").with_id("abc-1");
        assert_eq!(minimal.target_uuid(), Some("abc-1"));

        assert_eq!(Event::new("VM.START").target_uuid(), None);
    }

    #[test]
    fn status_parsing() {
        assert_eq!(EventStatus::parse("Completed"), Some(EventStatus::Completed));
        assert_eq!(EventStatus::parse("ERROR"), Some(EventStatus::Error));
        assert_eq!(EventStatus::parse("Pending"), None);
        assert!(EventStatus::Started.is_in_progress());
        assert!(!EventStatus::Completed.is_in_progress());
    }

    #[test]
    fn channel_names_round_trip() {
        for channel in ChannelKind::ALL {
            assert_eq!(channel.as_str().parse::<ChannelKind>().unwrap(), channel);
        }
        assert_eq!("state".parse::<ChannelKind>().unwrap(), ChannelKind::ResourceState);
        assert!("billing".parse::<ChannelKind>().is_err());
    }

    #[test]
    fn action_without_dot_is_whole_name() {
        let event = Event::new("HEARTBEAT");
        assert_eq!(event.category().as_str(), "HEARTBEAT");
        assert_eq!(event.action(), "");
    }
}
