//! Error types for event decoding.

use crate::event::ChannelKind;
use thiserror::Error;

/// Result type for decode operations.
pub type DecodeResult<T> = Result<T, DecodeError>;

/// Errors that can occur while decoding a raw payload.
///
/// A payload that fails to decode can never become valid on redelivery,
/// so callers drop it instead of retrying.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// The payload is not valid JSON, or not a JSON object.
    #[error("malformed {channel} payload: {message}")]
    Malformed {
        /// Channel the payload arrived on.
        channel: ChannelKind,
        /// Parser message.
        message: String,
    },

    /// The payload lacks the field that identifies the event.
    #[error("{channel} payload is missing required field `{field}`")]
    MissingField {
        /// Channel the payload arrived on.
        channel: ChannelKind,
        /// Name of the missing field.
        field: &'static str,
    },

    /// The channel name is not one of the known channels.
    #[error("unknown channel: {0}")]
    UnknownChannel(String),
}

impl DecodeError {
    pub(crate) fn malformed(channel: ChannelKind, err: &serde_json::Error) -> Self {
        Self::Malformed {
            channel,
            message: err.to_string(),
        }
    }

    /// Returns the channel the failing payload arrived on, if known.
    pub fn channel(&self) -> Option<ChannelKind> {
        match self {
            DecodeError::Malformed { channel, .. } | DecodeError::MissingField { channel, .. } => {
                Some(*channel)
            }
            DecodeError::UnknownChannel(_) => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display() {
        let err = DecodeError::MissingField {
            channel: ChannelKind::Action,
            field: "event",
        };
        assert_eq!(
            err.to_string(),
            "action payload is missing required field `event`"
        );
        assert_eq!(err.channel(), Some(ChannelKind::Action));
    }

    #[test]
    fn unknown_channel_has_no_kind() {
        let err = DecodeError::UnknownChannel("billing".into());
        assert!(err.channel().is_none());
        assert!(err.to_string().contains("billing"));
    }
}
