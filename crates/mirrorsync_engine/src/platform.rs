//! Orchestration platform query boundary.
//!
//! Sync handlers only ever list resources. Each family maps to one list
//! command; a scoped query adds `id=<uuid>`. Local mirror ids never leave
//! this process.

use crate::context::SystemContext;
use crate::error::{SyncError, SyncResult};
use crate::family::ResourceFamily;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::{BTreeMap, HashMap};
use url::form_urlencoded;

/// A list query against the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListRequest {
    /// Family being listed.
    pub family: ResourceFamily,
    /// Platform command name.
    pub command: String,
    /// Filter parameters.
    pub params: BTreeMap<String, String>,
    /// Response format selector.
    pub response: String,
}

impl ListRequest {
    /// Creates an unfiltered listing for a family.
    pub fn for_family(family: ResourceFamily) -> Self {
        let params = family
            .default_params()
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Self {
            family,
            command: family.list_command().to_string(),
            params,
            response: "json".into(),
        }
    }

    /// Restricts the listing to one resource.
    pub fn with_id(self, uuid: impl Into<String>) -> Self {
        self.with_param("id", uuid)
    }

    /// Adds a filter parameter.
    pub fn with_param(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.params.insert(key.into(), value.into());
        self
    }

    /// Returns the `id` filter, if any.
    pub fn id_filter(&self) -> Option<&str> {
        self.params.get("id").map(String::as_str)
    }

    /// Renders the request as a query string (`command=...&...&response=json`).
    pub fn to_query_string(&self) -> String {
        let mut query = form_urlencoded::Serializer::new(String::new());
        query.append_pair("command", &self.command);
        query.extend_pairs(&self.params);
        query.append_pair("response", &self.response);
        query.finish()
    }
}

/// A resource as reported by the platform.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    /// Platform uuid.
    pub uuid: String,
    /// Display name.
    pub name: Option<String>,
    /// Platform state name, when the family has one.
    pub state: Option<String>,
    /// Every other field of the descriptor.
    pub attributes: Map<String, Value>,
}

impl ResourceDescriptor {
    /// Creates a descriptor with only a uuid.
    pub fn new(uuid: impl Into<String>) -> Self {
        Self {
            uuid: uuid.into(),
            name: None,
            state: None,
            attributes: Map::new(),
        }
    }

    /// Sets the name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Sets the state.
    pub fn with_state(mut self, state: impl Into<String>) -> Self {
        self.state = Some(state.into());
        self
    }

    /// Adds an attribute.
    pub fn with_attribute(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.attributes.insert(key.into(), value.into());
        self
    }

    /// Builds a descriptor from one element of a platform listing.
    ///
    /// `id` is required; `name` falls back to `username`, `state` to `status`.
    pub fn from_json(family: ResourceFamily, value: Value) -> SyncResult<Self> {
        let Value::Object(mut fields) = value else {
            return Err(SyncError::UnexpectedResponse {
                command: family.list_command().into(),
                message: "listing element is not an object".into(),
            });
        };

        let uuid = take_text(&mut fields, "id").ok_or(SyncError::MissingUuid { family })?;
        let name = take_text(&mut fields, "name").or_else(|| take_text(&mut fields, "username"));
        let state = take_text(&mut fields, "state").or_else(|| take_text(&mut fields, "status"));

        Ok(Self {
            uuid,
            name,
            state,
            attributes: fields,
        })
    }
}

fn take_text(fields: &mut Map<String, Value>, key: &str) -> Option<String> {
    match fields.remove(key)? {
        Value::String(s) if !s.is_empty() => Some(s),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

/// Query access to the orchestration platform.
///
/// Implementations are synchronous; the engine calls them from blocking
/// worker threads, never from a consumer's async task.
pub trait PlatformClient: Send + Sync {
    /// Lists resources matching the request.
    fn list(&self, ctx: &SystemContext, request: &ListRequest) -> SyncResult<Vec<ResourceDescriptor>>;
}

/// An in-memory platform.
///
/// Serves listings from descriptors held in memory. Used by tests and by the
/// CLI replay command, which loads a platform snapshot from JSON.
#[derive(Debug, Default)]
pub struct MemoryPlatform {
    resources: RwLock<HashMap<ResourceFamily, Vec<ResourceDescriptor>>>,
    requests: Mutex<Vec<ListRequest>>,
    unavailable: RwLock<Option<String>>,
}

impl MemoryPlatform {
    /// Creates an empty platform.
    pub fn new() -> Self {
        Self::default()
    }

    /// Loads a snapshot shaped as `{"<family>": [<descriptor>, ...], ...}`.
    pub fn from_snapshot(snapshot: Value) -> SyncResult<Self> {
        let Value::Object(families) = snapshot else {
            return Err(SyncError::UnexpectedResponse {
                command: "snapshot".into(),
                message: "snapshot root is not an object".into(),
            });
        };

        let platform = Self::new();
        for (key, listing) in families {
            let family: ResourceFamily = key.parse().map_err(|message| {
                SyncError::UnexpectedResponse {
                    command: "snapshot".into(),
                    message,
                }
            })?;
            let Value::Array(items) = listing else {
                return Err(SyncError::UnexpectedResponse {
                    command: "snapshot".into(),
                    message: format!("{} listing is not an array", family),
                });
            };
            for item in items {
                platform.insert(family, ResourceDescriptor::from_json(family, item)?);
            }
        }
        Ok(platform)
    }

    /// Loads a snapshot from raw JSON bytes.
    pub fn from_json_slice(bytes: &[u8]) -> SyncResult<Self> {
        let snapshot: Value = serde_json::from_slice(bytes)?;
        Self::from_snapshot(snapshot)
    }

    /// Adds or replaces a resource.
    pub fn insert(&self, family: ResourceFamily, descriptor: ResourceDescriptor) {
        let mut resources = self.resources.write();
        let listing = resources.entry(family).or_default();
        match listing.iter_mut().find(|d| d.uuid == descriptor.uuid) {
            Some(existing) => *existing = descriptor,
            None => listing.push(descriptor),
        }
    }

    /// Changes the state of a resource. Returns false if it does not exist.
    pub fn set_state(&self, family: ResourceFamily, uuid: &str, state: &str) -> bool {
        let mut resources = self.resources.write();
        match resources
            .get_mut(&family)
            .and_then(|listing| listing.iter_mut().find(|d| d.uuid == uuid))
        {
            Some(descriptor) => {
                descriptor.state = Some(state.to_string());
                true
            }
            None => false,
        }
    }

    /// Removes a resource.
    pub fn remove(&self, family: ResourceFamily, uuid: &str) {
        if let Some(listing) = self.resources.write().get_mut(&family) {
            listing.retain(|d| d.uuid != uuid);
        }
    }

    /// Makes every list call fail with a retryable error until cleared.
    pub fn set_unavailable(&self, reason: Option<&str>) {
        *self.unavailable.write() = reason.map(str::to_string);
    }

    /// Returns every request received so far.
    pub fn requests(&self) -> Vec<ListRequest> {
        self.requests.lock().clone()
    }

    /// Returns the number of list calls received for a family.
    pub fn list_calls(&self, family: ResourceFamily) -> usize {
        self.requests
            .lock()
            .iter()
            .filter(|r| r.family == family)
            .count()
    }
}

impl PlatformClient for MemoryPlatform {
    fn list(&self, ctx: &SystemContext, request: &ListRequest) -> SyncResult<Vec<ResourceDescriptor>> {
        ctx.require_admin()?;
        self.requests.lock().push(request.clone());

        if let Some(reason) = self.unavailable.read().as_ref() {
            return Err(SyncError::platform_retryable(reason.clone()));
        }

        let resources = self.resources.read();
        let listing = resources.get(&request.family).map(Vec::as_slice).unwrap_or(&[]);
        Ok(listing
            .iter()
            .filter(|d| request.id_filter().map_or(true, |id| d.uuid == id))
            .cloned()
            .collect())
    }
}
