//! # Mirrorsync Engine
//!
//! Event-driven synchronization of a local mirror with an orchestration
//! platform.
//!
//! This crate provides:
//! - Per-channel event consumers over a message bus abstraction
//! - A category → handler dispatcher with a fixed standard table
//! - Pull-and-reconcile synchronizers, one per resource family
//! - Point status updates for lifecycle events
//! - Timer-driven polling of long-running platform jobs
//! - Platform (HTTP and in-memory) and mirror store boundaries
//!
//! ## Architecture
//!
//! ```text
//! MessageBus → consumer → decode → classify → Dispatcher
//!                                              ├─ ResourceSync (full / scoped)
//!                                              ├─ StateUpdater
//!                                              └─ JobPoller (detached)
//! ```
//!
//! ## Key Invariants
//!
//! - `uuid` is the only join key between mirror and platform
//! - Re-running a sync against unchanged platform state writes nothing
//! - Syncs of one family never interleave
//! - No event ever stops a consumer; failures are logged and dropped
//! - Every event runs under its own system context

#![deny(unsafe_code)]
#![warn(missing_docs)]
#![warn(clippy::unwrap_used, clippy::expect_used, clippy::panic)]

mod config;
mod context;
mod dispatch;
mod engine;
mod error;
mod family;
mod handlers;
mod http;
mod platform;
mod poller;
mod status;
mod store;
mod sync;
mod transport;
mod updater;

pub use config::{ChannelConfig, EngineConfig, PollConfig, ResubscribePolicy};
pub use context::{ContextProvider, Principal, Role, SystemContext, SystemPrincipalProvider};
pub use dispatch::{DispatchOutcome, Dispatcher, DispatcherBuilder, NOOP_CATEGORIES};
pub use engine::{EngineHandle, EngineState, EngineStats, EventEngine};
pub use error::{SyncError, SyncResult};
pub use family::ResourceFamily;
pub use handlers::{
    EventHandler, FamilyResyncHandler, FullResyncHandler, InstanceLifecycleHandler,
    NetworkEventHandler, NoopHandler, SessionFilteredHandler, SharedUpdater, VolumeEventHandler,
};
pub use http::{ApiTransport, HttpPlatformClient};
pub use platform::{ListRequest, MemoryPlatform, PlatformClient, ResourceDescriptor};
pub use poller::{poll_until_done, JobOutcome, JobPoller, PollStatus, SyncJob};
pub use status::LifecycleStatus;
pub use store::{MemoryMirrorStore, MirrorStore, ResourceMirror};
pub use sync::{FamilySynchronizer, ResourceSync, SyncRegistry, SyncReport};
pub use transport::{Delivery, InMemoryBus, MessageBus, Subscription};
pub use updater::{error_message, StateChange, StateUpdater};
