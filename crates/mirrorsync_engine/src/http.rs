//! HTTP platform client.
//!
//! The actual HTTP library is abstracted behind [`ApiTransport`] so that
//! request signing and session handling stay with the caller's client.

use crate::context::SystemContext;
use crate::error::{SyncError, SyncResult};
use crate::platform::{ListRequest, PlatformClient, ResourceDescriptor};
use serde_json::Value;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;
use tracing::{debug, warn};

/// Raw HTTP access to the platform API.
pub trait ApiTransport: Send + Sync {
    /// Sends a GET request and returns the response body.
    fn get(&self, url: &str) -> Result<Vec<u8>, String>;

    /// Checks if the transport is healthy.
    fn is_healthy(&self) -> bool;
}

/// Platform client speaking the `?command=...&response=json` API.
///
/// Responses are wrapped as `{"<command>response": {"count": N, "<item>": [...]}}`.
/// The first array inside the envelope holds the descriptors; an envelope
/// without an array is an empty listing.
pub struct HttpPlatformClient<C: ApiTransport> {
    endpoint: String,
    transport: C,
    connected: AtomicBool,
    last_error: RwLock<Option<String>>,
}

impl<C: ApiTransport> HttpPlatformClient<C> {
    /// Creates a client for the API endpoint (e.g. `https://cloud.example.com/client/api`).
    pub fn new(endpoint: impl Into<String>, transport: C) -> Self {
        Self {
            endpoint: endpoint.into(),
            transport,
            connected: AtomicBool::new(true),
            last_error: RwLock::new(None),
        }
    }

    /// Returns the API endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Returns the last transport error message.
    pub fn last_error(&self) -> Option<String> {
        self.last_error.read().ok().and_then(|e| e.clone())
    }

    /// Returns true if the last call reached the platform.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst) && self.transport.is_healthy()
    }

    fn set_error(&self, err: Option<&str>) {
        if let Ok(mut slot) = self.last_error.write() {
            *slot = err.map(str::to_string);
        }
    }

    fn url_for(&self, request: &ListRequest) -> String {
        let separator = if self.endpoint.contains('?') { '&' } else { '?' };
        format!("{}{}{}", self.endpoint, separator, request.to_query_string())
    }

    fn parse_listing(request: &ListRequest, body: &[u8]) -> SyncResult<Vec<ResourceDescriptor>> {
        let unexpected = |message: String| SyncError::UnexpectedResponse {
            command: request.command.clone(),
            message,
        };

        let root: Value = serde_json::from_slice(body).map_err(|e| unexpected(e.to_string()))?;
        let envelope_key = format!("{}response", request.command.to_ascii_lowercase());
        let envelope = root
            .get(&envelope_key)
            .ok_or_else(|| unexpected(format!("missing `{}`", envelope_key)))?;

        if let Some(text) = envelope.get("errortext").and_then(Value::as_str) {
            return Err(SyncError::platform_fatal(text.to_string()));
        }

        let Some(items) = envelope
            .as_object()
            .and_then(|fields| fields.values().find_map(Value::as_array))
        else {
            return Ok(Vec::new());
        };

        // A malformed element must not block the rest of the family.
        let mut descriptors = Vec::with_capacity(items.len());
        for (index, item) in items.iter().enumerate() {
            match ResourceDescriptor::from_json(request.family, item.clone()) {
                Ok(descriptor) => descriptors.push(descriptor),
                Err(e) => warn!(
                    family = %request.family,
                    index,
                    error = %e,
                    "skipping malformed listing element"
                ),
            }
        }
        Ok(descriptors)
    }
}

impl<C: ApiTransport> PlatformClient for HttpPlatformClient<C> {
    fn list(&self, ctx: &SystemContext, request: &ListRequest) -> SyncResult<Vec<ResourceDescriptor>> {
        ctx.require_admin()?;

        let url = self.url_for(request);
        debug!(command = %request.command, session = %ctx.session_id(), "querying platform");

        let body = self.transport.get(&url).map_err(|e| {
            self.set_error(Some(&e));
            self.connected.store(false, Ordering::SeqCst);
            SyncError::platform_retryable(e)
        })?;

        self.set_error(None);
        self.connected.store(true, Ordering::SeqCst);
        Self::parse_listing(request, &body)
    }
}
