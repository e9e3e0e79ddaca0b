//! # Mirrorsync Events
//!
//! Event records, decoder and classifier for the mirrorsync engine.
//!
//! This crate provides:
//! - `Event` for action events emitted by the orchestration platform
//! - `ResourceStateEvent`, `UsageEvent` and `AlertEvent` for the other channels
//! - JSON decoding per channel (`decode_action`, `decode`, ...)
//! - Category derivation from dotted event names (`classify`)
//!
//! This is a pure wire crate with no I/O operations.

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod classify;
mod decode;
mod error;
mod event;

pub use classify::{classify, is_session_event, mentions_offering, Category};
pub use decode::{decode, decode_action, decode_alert, decode_resource_state, decode_usage};
pub use error::{DecodeError, DecodeResult};
pub use event::{
    AlertEvent, ChannelKind, DecodedEvent, Event, EventStatus, ResourceStateEvent, UsageEvent,
};
