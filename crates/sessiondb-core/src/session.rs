//! Session data model
//!
//! `SessionData` is the attribute bag plus bookkeeping timestamps the host keeps for
//! one client session. `SessionRecord` is what actually lands in the backing store:
//! the id, the encoded payload and the expiry used by expiry scans.

use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::collections::BTreeMap;

use crate::{Error, Result};

/// Expiry stored for sessions that never time out
pub const NEVER_EXPIRES: i64 = i64::MAX;

/// Current wall-clock time in epoch milliseconds
pub fn now_millis() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Server-side state of one client session
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionData {
    pub id: String,

    #[serde(default)]
    pub context_path: String,

    #[serde(default)]
    pub vhost: String,

    /// Node that last handled the session
    #[serde(default)]
    pub last_node: String,

    pub created_at: i64,
    pub accessed_at: i64,
    pub last_accessed_at: i64,

    /// 0 until the session has been saved once
    #[serde(default)]
    pub last_saved_at: i64,

    /// Inactivity timeout; values <= 0 mean the session never expires
    pub max_inactive_ms: i64,

    pub expiry_at: i64,

    #[serde(default)]
    pub attributes: BTreeMap<String, serde_json::Value>,
}

impl SessionData {
    /// Create a fresh session created and accessed at `now`
    pub fn new(id: impl Into<String>, now: i64, max_inactive_ms: i64) -> Self {
        let mut data = Self {
            id: id.into(),
            context_path: String::new(),
            vhost: String::new(),
            last_node: String::new(),
            created_at: now,
            accessed_at: now,
            last_accessed_at: now,
            last_saved_at: 0,
            max_inactive_ms,
            expiry_at: NEVER_EXPIRES,
            attributes: BTreeMap::new(),
        };
        data.expiry_at = data.calc_expiry(now);
        data
    }

    pub fn with_context_path(mut self, context_path: impl Into<String>) -> Self {
        self.context_path = context_path.into();
        self
    }

    pub fn with_vhost(mut self, vhost: impl Into<String>) -> Self {
        self.vhost = vhost.into();
        self
    }

    pub fn with_last_node(mut self, last_node: impl Into<String>) -> Self {
        self.last_node = last_node.into();
        self
    }

    /// Expiry for an access at `now`
    pub fn calc_expiry(&self, now: i64) -> i64 {
        if self.max_inactive_ms <= 0 {
            NEVER_EXPIRES
        } else {
            now.saturating_add(self.max_inactive_ms)
        }
    }

    /// Record an access at `now` and push the expiry forward
    pub fn touch(&mut self, now: i64) {
        self.last_accessed_at = self.accessed_at;
        self.accessed_at = now;
        self.expiry_at = self.calc_expiry(now);
    }

    pub fn is_expired_at(&self, now: i64) -> bool {
        self.expiry_at <= now
    }

    /// Set an attribute from any serializable value
    ///
    /// Returns the previous value, if any.
    ///
    /// # Errors
    /// - `Error::Serialization` if the value has no JSON representation
    pub fn set_attribute<T: Serialize + ?Sized>(
        &mut self,
        name: impl Into<String>,
        value: &T,
    ) -> Result<Option<serde_json::Value>> {
        let name = name.into();
        let value = serde_json::to_value(value).map_err(|e| {
            Error::Serialization(format!("Attribute '{}' is not serializable: {}", name, e))
        })?;
        Ok(self.attributes.insert(name, value))
    }

    /// Read an attribute back as `T`
    ///
    /// # Errors
    /// - `Error::Deserialization` if the stored value does not fit `T`
    pub fn get_attribute<T: DeserializeOwned>(&self, name: &str) -> Result<Option<T>> {
        match self.attributes.get(name) {
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|e| {
                    Error::Deserialization(format!("Attribute '{}' has unexpected shape: {}", name, e))
                }),
            None => Ok(None),
        }
    }

    pub fn remove_attribute(&mut self, name: &str) -> Option<serde_json::Value> {
        self.attributes.remove(name)
    }

    pub fn attribute_names(&self) -> impl Iterator<Item = &str> {
        self.attributes.keys().map(String::as_str)
    }
}

/// Persisted unit: one row/document per session id
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionRecord {
    pub id: String,
    pub payload: Vec<u8>,
    pub expiry_at: i64,
}

impl SessionRecord {
    pub fn new(id: impl Into<String>, payload: Vec<u8>, expiry_at: i64) -> Self {
        Self {
            id: id.into(),
            payload,
            expiry_at,
        }
    }
}
