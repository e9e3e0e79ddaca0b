//! JSON decoding of raw channel payloads.
//!
//! Unknown fields are ignored. The only validation performed is the presence
//! of each channel's discriminator field.

use crate::error::{DecodeError, DecodeResult};
use crate::event::{
    AlertEvent, ChannelKind, DecodedEvent, Event, EventStatus, ResourceStateEvent, UsageEvent,
};
use serde::Deserialize;
use serde_json::Value;

#[derive(Deserialize)]
struct ActionWire {
    id: Option<Value>,
    event: Option<String>,
    #[serde(rename = "eventName")]
    event_name: Option<String>,
    #[serde(rename = "eventType")]
    event_type: Option<String>,
    #[serde(rename = "entityuuid")]
    entity_uuid_lower: Option<Value>,
    #[serde(rename = "entityUuid")]
    entity_uuid: Option<Value>,
    entity: Option<String>,
    #[serde(rename = "entityType")]
    entity_type: Option<String>,
    status: Option<String>,
    timestamp: Option<Value>,
    #[serde(rename = "eventDateTime")]
    event_date_time: Option<Value>,
    account: Option<Value>,
    #[serde(rename = "actorAccount")]
    actor_account: Option<Value>,
    user: Option<Value>,
    #[serde(rename = "actorUser")]
    actor_user: Option<Value>,
    description: Option<String>,
    subject: Option<String>,
    body: Option<String>,
}

#[derive(Deserialize)]
struct ResourceStateWire {
    id: Option<Value>,
    resource: Option<String>,
    #[serde(rename = "old-state")]
    old_state: Option<String>,
    #[serde(rename = "new-state")]
    new_state: Option<String>,
    status: Option<String>,
    event: Option<String>,
}

#[derive(Deserialize)]
struct UsageWire {
    event: Option<String>,
    id: Option<Value>,
    zone: Option<Value>,
    account: Option<Value>,
    size: Option<Value>,
    offering: Option<Value>,
    template: Option<Value>,
}

#[derive(Deserialize)]
struct AlertWire {
    subject: Option<String>,
    #[serde(rename = "alertType")]
    alert_type: Option<Value>,
    #[serde(rename = "dataCenterId")]
    data_center_id: Option<Value>,
    #[serde(rename = "podId")]
    pod_id: Option<Value>,
    body: Option<String>,
}

/// Decodes a payload arriving on the given channel.
pub fn decode(channel: ChannelKind, bytes: &[u8]) -> DecodeResult<DecodedEvent> {
    match channel {
        ChannelKind::Action => decode_action(bytes).map(DecodedEvent::Action),
        ChannelKind::ResourceState => {
            decode_resource_state(bytes).map(DecodedEvent::ResourceState)
        }
        ChannelKind::Usage => decode_usage(bytes).map(DecodedEvent::Usage),
        ChannelKind::Alert => decode_alert(bytes).map(DecodedEvent::Alert),
    }
}

/// Decodes an action event.
///
/// The event name is read from `event`, then `eventName`, then `eventType`.
pub fn decode_action(bytes: &[u8]) -> DecodeResult<Event> {
    let wire: ActionWire = serde_json::from_slice(bytes)
        .map_err(|e| DecodeError::malformed(ChannelKind::Action, &e))?;

    let name = [wire.event, wire.event_name, wire.event_type]
        .into_iter()
        .flatten()
        .map(|name| name.trim().to_string())
        .find(|name| !name.is_empty())
        .ok_or(DecodeError::MissingField {
            channel: ChannelKind::Action,
            field: "event",
        })?;

    let mut event = Event::new(name);
    event.id = text(wire.id);
    event.entity_uuid = text(wire.entity_uuid).or(text(wire.entity_uuid_lower));
    event.entity_type = non_empty(wire.entity_type).or(non_empty(wire.entity));
    event.status = wire.status.as_deref().and_then(EventStatus::parse);
    event.timestamp = text(wire.timestamp).or(text(wire.event_date_time));
    event.actor_account = text(wire.actor_account).or(text(wire.account));
    event.actor_user = text(wire.actor_user).or(text(wire.user));
    event.description = non_empty(wire.description);
    event.subject = non_empty(wire.subject);
    event.body = non_empty(wire.body);
    Ok(event)
}

/// Decodes a resource-state event.
///
/// The new state is read from `new-state`, falling back to `status`.
pub fn decode_resource_state(bytes: &[u8]) -> DecodeResult<ResourceStateEvent> {
    let channel = ChannelKind::ResourceState;
    let wire: ResourceStateWire =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::malformed(channel, &e))?;

    let id = text(wire.id).ok_or(DecodeError::MissingField { channel, field: "id" })?;
    let new_state = non_empty(wire.new_state)
        .or(non_empty(wire.status))
        .ok_or(DecodeError::MissingField {
            channel,
            field: "new-state",
        })?;

    Ok(ResourceStateEvent {
        id,
        resource: non_empty(wire.resource),
        old_state: non_empty(wire.old_state),
        new_state,
        event: non_empty(wire.event),
    })
}

/// Decodes a usage event.
pub fn decode_usage(bytes: &[u8]) -> DecodeResult<UsageEvent> {
    let channel = ChannelKind::Usage;
    let wire: UsageWire =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::malformed(channel, &e))?;

    let event = non_empty(wire.event).ok_or(DecodeError::MissingField {
        channel,
        field: "event",
    })?;

    Ok(UsageEvent {
        event,
        id: text(wire.id),
        zone: text(wire.zone),
        account: text(wire.account),
        size: text(wire.size).and_then(|size| size.parse().ok()),
        offering: text(wire.offering),
        template: text(wire.template),
    })
}

/// Decodes an alert event.
pub fn decode_alert(bytes: &[u8]) -> DecodeResult<AlertEvent> {
    let channel = ChannelKind::Alert;
    let wire: AlertWire =
        serde_json::from_slice(bytes).map_err(|e| DecodeError::malformed(channel, &e))?;

    let subject = non_empty(wire.subject).ok_or(DecodeError::MissingField {
        channel,
        field: "subject",
    })?;

    Ok(AlertEvent {
        subject,
        alert_type: text(wire.alert_type),
        data_center_id: text(wire.data_center_id),
        pod_id: text(wire.pod_id),
        body: non_empty(wire.body),
    })
}

/// Platform payloads mix numeric and string ids; both are kept as text.
fn text(value: Option<Value>) -> Option<String> {
    match value? {
        Value::String(s) => non_empty(Some(s)),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn minimal_action_event() {
        let event = decode_action(br#"{"event":"VM.START","id":"abc-1"}"#).unwrap();
        assert_eq!(event.event_name(), "VM.START");
        assert_eq!(event.category().as_str(), "VM.");
        assert_eq!(event.target_uuid(), Some("abc-1"));
        assert_eq!(event.status, None);
    }

    #[test]
    fn full_action_event() {
        let payload = br#"{
            "eventName": "VOLUME.ATTACH",
            "id": 9182,
            "entityuuid": "vol-7",
            "entity": "Volume",
            "status": "Started",
            "eventDateTime": "2024-03-11 10:15:02 +0000",
            "account": "acct-1",
            "user": "user-1",
            "description": "attaching volume",
            "unrelated": {"nested": true}
        }"#;
        let event = decode_action(payload).unwrap();
        assert_eq!(event.event_name(), "VOLUME.ATTACH");
        assert_eq!(event.id.as_deref(), Some("9182"));
        assert_eq!(event.entity_uuid.as_deref(), Some("vol-7"));
        assert_eq!(event.entity_type.as_deref(), Some("Volume"));
        assert_eq!(event.status, Some(EventStatus::Started));
        assert_eq!(event.timestamp.as_deref(), Some("2024-03-11 10:15:02 +0000"));
        assert_eq!(event.actor_account.as_deref(), Some("acct-1"));
        assert_eq!(event.actor_user.as_deref(), Some("user-1"));
    }

    #[test]
    fn event_field_wins_over_event_name() {
        let event = decode_action(br#"{"event":"VM.STOP","eventName":"VM.START"}"#).unwrap();
        assert_eq!(event.event_name(), "VM.STOP");

        let event = decode_action(br#"{"event":"  ","eventName":"VM.START"}"#).unwrap();
        assert_eq!(event.event_name(), "VM.START");
    }

    #[test]
    fn unknown_status_is_not_an_error() {
        let event = decode_action(br#"{"event":"VM.START","status":"Deferred"}"#).unwrap();
        assert_eq!(event.status, None);
    }

    #[test]
    fn malformed_json() {
        let err = decode_action(b"{not-json").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));

        let err = decode_action(b"[1,2,3]").unwrap_err();
        assert!(matches!(err, DecodeError::Malformed { .. }));
    }

    #[test]
    fn missing_discriminator() {
        let err = decode_action(br#"{"id":"abc-1"}"#).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::MissingField {
                field: "event",
                ..
            }
        ));
    }

    #[test]
    fn resource_state_event() {
        let payload = br#"{"resource":"VirtualMachine","id":"abc-1","old-state":"Starting","new-state":"Running","event":"FollowAgentPowerOnReport"}"#;
        let event = decode_resource_state(payload).unwrap();
        assert_eq!(event.id, "abc-1");
        assert_eq!(event.resource.as_deref(), Some("VirtualMachine"));
        assert_eq!(event.old_state.as_deref(), Some("Starting"));
        assert_eq!(event.new_state, "Running");
        assert!(!event.is_error());
    }

    #[test]
    fn resource_state_falls_back_to_status() {
        let event = decode_resource_state(br#"{"id":"v-1","status":"Error"}"#).unwrap();
        assert_eq!(event.new_state, "Error");
        assert!(event.is_error());

        let err = decode_resource_state(br#"{"id":"v-1"}"#).unwrap_err();
        assert!(matches!(
            err,
            DecodeError::MissingField {
                field: "new-state",
                ..
            }
        ));
    }

    #[test]
    fn usage_event() {
        let payload = br#"{"event":"VOLUME.CREATE","id":"vol-1","zone":"z-1","size":"10737418240"}"#;
        let event = decode_usage(payload).unwrap();
        assert_eq!(event.event, "VOLUME.CREATE");
        assert_eq!(event.size, Some(10_737_418_240));
        assert_eq!(event.zone.as_deref(), Some("z-1"));
    }

    #[test]
    fn alert_event() {
        let payload = br#"{"subject":"Host down","alertType":7,"dataCenterId":1,"podId":2,"body":"host h-1 is down"}"#;
        let event = decode_alert(payload).unwrap();
        assert_eq!(event.subject, "Host down");
        assert_eq!(event.alert_type.as_deref(), Some("7"));
        assert_eq!(event.data_center_id.as_deref(), Some("1"));

        assert!(decode_alert(br#"{"body":"no subject"}"#).is_err());
    }

    #[test]
    fn decode_by_channel() {
        let decoded = decode(ChannelKind::Action, br#"{"event":"USER.LOGIN"}"#).unwrap();
        assert_eq!(decoded.channel(), ChannelKind::Action);
        assert_eq!(decoded.label(), "USER.LOGIN");

        let decoded = decode(
            ChannelKind::ResourceState,
            br#"{"id":"x","new-state":"Stopped"}"#,
        )
        .unwrap();
        assert_eq!(decoded.channel(), ChannelKind::ResourceState);
    }
}
