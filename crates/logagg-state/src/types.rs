//! Record types for the tenant store.
//!
//! These types represent the persisted state of tenants, their registered
//! components, and the message-queue backends tenants are assigned to.
//! All types are serializable to/from JSON for storage in redb tables.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// Free-form attributes reported by a component (heartbeat payload).
pub type Attrs = serde_json::Map<String, serde_json::Value>;

/// Default queue depth limit for newly registered queue resources.
pub const DEFAULT_DEPTH_LIMIT: u64 = 1_000_000;

// ── Queue resource ────────────────────────────────────────────────

/// One message-queue backend that tenants can be assigned to.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueueResourceRef {
    /// Queue daemon TCP address (`host:port`), used by producers and the bridge.
    pub tcp_address: String,
    /// Queue daemon HTTP address (`host:port`).
    pub http_address: String,
    /// Fallback address of a tail bridge serving this queue.
    #[serde(default)]
    pub api_address: Option<String>,
    #[serde(default = "default_depth_limit")]
    pub depth_limit: u64,
}

fn default_depth_limit() -> u64 {
    DEFAULT_DEPTH_LIMIT
}

impl QueueResourceRef {
    pub fn new(tcp_address: &str, http_address: &str, api_address: Option<&str>) -> Self {
        Self {
            tcp_address: tcp_address.to_string(),
            http_address: http_address.to_string(),
            api_address: api_address.map(str::to_string),
            depth_limit: DEFAULT_DEPTH_LIMIT,
        }
    }

    /// Build the composite key for the queue resources table.
    pub fn table_key(&self) -> String {
        format!("{}|{}", self.tcp_address, self.http_address)
    }
}

// ── Tenant ────────────────────────────────────────────────────────

/// A cluster: an isolated group of components sharing one secret and
/// one queue resource.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Tenant {
    pub name: String,
    pub secret: String,
    /// Assigned at creation, never reassigned.
    pub queue_ref: QueueResourceRef,
    pub log_topic: String,
    pub heartbeat_topic: String,
    /// Unix timestamp (seconds) when this tenant was created.
    pub created_at: u64,
}

impl Tenant {
    /// Build a tenant record with the conventional topic names.
    pub fn new(name: &str, secret: &str, queue_ref: QueueResourceRef) -> Self {
        Self {
            name: name.to_string(),
            secret: secret.to_string(),
            queue_ref,
            log_topic: log_topic(name),
            heartbeat_topic: heartbeat_topic(name),
            created_at: epoch_secs(),
        }
    }
}

/// Topic carrying a tenant's log lines.
pub fn log_topic(tenant: &str) -> String {
    format!("{tenant}_logs")
}

/// Topic carrying a tenant's heartbeats. Ephemeral: the queue drops
/// messages nobody is reading.
pub fn heartbeat_topic(tenant: &str) -> String {
    format!("{tenant}_heartbeat#ephemeral")
}

// ── Component ─────────────────────────────────────────────────────

/// Role a component plays within a tenant.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(into = "String", try_from = "String")]
pub enum ComponentRole {
    Collector,
    /// The HTTP tailing bridge in front of the tenant's queue.
    QueueApi,
    Master,
    Other(String),
}

impl ComponentRole {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Collector => "collector",
            Self::QueueApi => "queue_api",
            Self::Master => "master",
            Self::Other(s) => s,
        }
    }
}

impl fmt::Display for ComponentRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when a role string cannot be used in a component key.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvalidRole(pub String);

impl fmt::Display for InvalidRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "invalid component role: {:?}", self.0)
    }
}

impl std::error::Error for InvalidRole {}

impl FromStr for ComponentRole {
    type Err = InvalidRole;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        if !is_key_segment(s) {
            return Err(InvalidRole(s.to_string()));
        }
        Ok(match s.to_ascii_lowercase().as_str() {
            "collector" => Self::Collector,
            "queue_api" | "nsq_api" => Self::QueueApi,
            "master" => Self::Master,
            other => Self::Other(other.to_string()),
        })
    }
}

impl TryFrom<String> for ComponentRole {
    type Error = InvalidRole;

    fn try_from(s: String) -> Result<Self, Self::Error> {
        s.parse()
    }
}

impl From<ComponentRole> for String {
    fn from(role: ComponentRole) -> Self {
        role.as_str().to_string()
    }
}

/// A registered, addressable process belonging to a tenant.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Component {
    pub tenant_name: String,
    pub role: ComponentRole,
    pub host: String,
    pub port: String,
    /// Attributes from the latest registration or heartbeat.
    #[serde(default)]
    pub last_seen_attrs: Attrs,
    /// Unix timestamp (seconds) of the last upsert. Set by the store.
    #[serde(default)]
    pub updated_at: u64,
}

impl Component {
    pub fn new(tenant_name: &str, role: ComponentRole, host: &str, port: &str) -> Self {
        Self {
            tenant_name: tenant_name.to_string(),
            role,
            host: host.to_string(),
            port: port.to_string(),
            last_seen_attrs: Attrs::new(),
            updated_at: 0,
        }
    }

    pub fn with_attrs(mut self, attrs: Attrs) -> Self {
        self.last_seen_attrs = attrs;
        self
    }

    /// Build the composite key for the components table.
    pub fn table_key(&self) -> String {
        format!("{}/{}/{}/{}", self.tenant_name, self.role, self.host, self.port)
    }

    /// `host:port`, as used to reach the component.
    pub fn address(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

/// Whether `s` can be embedded in a composite table key.
pub fn is_key_segment(s: &str) -> bool {
    !s.is_empty() && !s.contains(['/', '|']) && !s.chars().any(char::is_whitespace)
}

pub fn epoch_secs() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs()
}
