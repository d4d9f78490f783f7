//! redb table definitions for the tenant store.
//!
//! Each table uses `&str` keys and `&[u8]` values (JSON-serialized records).

use redb::TableDefinition;

/// Shape shared by every table: string keys, JSON values.
pub type JsonTable = TableDefinition<'static, &'static str, &'static [u8]>;

/// Tenants keyed by `{name}`.
pub const TENANTS: JsonTable = TableDefinition::new("tenants");

/// Components keyed by `{tenant}/{role}/{host}/{port}`.
pub const COMPONENTS: JsonTable = TableDefinition::new("components");

/// Queue resources keyed by `{tcp_address}|{http_address}`.
pub const QUEUE_RESOURCES: JsonTable = TableDefinition::new("queue_resources");
