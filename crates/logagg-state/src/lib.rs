//! logagg-state — durable tenant store for the logagg master.
//!
//! Backed by [redb](https://docs.rs/redb), holds tenants (clusters), the
//! components registered against them, and the pool of message-queue
//! backends tenants are assigned to.
//!
//! # Architecture
//!
//! All records are JSON-serialized into redb's `&[u8]` value columns.
//! Uniqueness constraints are expressed as composite keys:
//!
//! | Table | Key |
//! |---|---|
//! | `tenants` | `{name}` |
//! | `components` | `{tenant}/{role}/{host}/{port}` |
//! | `queue_resources` | `{tcp_address}\|{http_address}` |
//!
//! Every mutation is a single write transaction. redb serialises writers,
//! which makes [`StateStore::swap_secret`] a compare-and-set and
//! [`StateStore::upsert_component`] a last-write-wins upsert.
//!
//! The `StateStore` is `Clone` + `Send` + `Sync` (backed by `Arc<Database>`)
//! and can be shared across async tasks.

pub mod error;
pub mod store;
pub mod tables;
pub mod types;

pub use error::{StateError, StateResult};
pub use store::{SecretSwap, StateStore};
pub use types::*;
