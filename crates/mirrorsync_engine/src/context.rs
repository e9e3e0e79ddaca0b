//! Per-event security context.
//!
//! Every event is processed under a freshly established system principal.
//! The context is passed by reference through dispatch, handlers, platform
//! queries and store calls, and dropped when the event is done.

use crate::error::{SyncError, SyncResult};
use uuid::Uuid;

/// Role held by a principal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    /// Full administrative access.
    Admin,
    /// Read-only access.
    ReadOnly,
}

/// An authenticated principal.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Principal {
    /// Principal name.
    pub name: String,
    /// Granted role.
    pub role: Role,
}

/// Authenticated context scoped to one event.
#[derive(Debug, Clone)]
pub struct SystemContext {
    principal: Principal,
    session_id: Uuid,
    event: String,
}

impl SystemContext {
    /// Creates a context for the given principal and event label.
    pub fn new(principal: Principal, event: impl Into<String>) -> Self {
        Self {
            principal,
            session_id: Uuid::new_v4(),
            event: event.into(),
        }
    }

    /// Creates an administrative system context.
    pub fn system(name: impl Into<String>, event: impl Into<String>) -> Self {
        Self::new(
            Principal {
                name: name.into(),
                role: Role::Admin,
            },
            event,
        )
    }

    /// Returns the principal.
    pub fn principal(&self) -> &Principal {
        &self.principal
    }

    /// Returns the session id, unique per context.
    pub fn session_id(&self) -> Uuid {
        self.session_id
    }

    /// Returns the label of the event this context was created for.
    pub fn event(&self) -> &str {
        &self.event
    }

    /// Fails unless the principal holds the admin role.
    pub fn require_admin(&self) -> SyncResult<()> {
        match self.principal.role {
            Role::Admin => Ok(()),
            Role::ReadOnly => Err(SyncError::NotAuthorized(format!(
                "principal {} is not an administrator",
                self.principal.name
            ))),
        }
    }
}

/// Establishes the security context for one event.
pub trait ContextProvider: Send + Sync {
    /// Creates the context used while processing `event`.
    fn establish(&self, event: &str) -> SyncResult<SystemContext>;
}

/// Provides an administrative system principal for every event.
#[derive(Debug, Clone)]
pub struct SystemPrincipalProvider {
    name: String,
}

impl SystemPrincipalProvider {
    /// Creates a provider for the named system principal.
    pub fn new(name: impl Into<String>) -> Self {
        Self { name: name.into() }
    }
}

impl Default for SystemPrincipalProvider {
    fn default() -> Self {
        Self::new("system")
    }
}

impl ContextProvider for SystemPrincipalProvider {
    fn establish(&self, event: &str) -> SyncResult<SystemContext> {
        Ok(SystemContext::system(self.name.clone(), event))
    }
}
