//! logagg-registry — the coordination core of the logagg master.
//!
//! Tracks tenants (clusters), the components registered against them, and
//! keeps an eventually-consistent liveness view fed by heartbeat streams.
//!
//! # Architecture
//!
//! ```text
//! Registry (stateless request handlers)
//!   ├── create / rotate / register / list → StateStore
//!   └── QueueResourcePool (random backend assignment)
//!
//! PollerSupervisor (one control task)
//!   ├── reconcile(): tenants in store vs pollers running
//!   └── HeartbeatPoller per tenant
//!       ├── running: bridge stream → decode → upsert component
//!       └── backing_off: RetryBackoff, then back to running
//!
//! TailFanout (one task per reader, log or heartbeat topic)
//!   └── bridge stream → line batches → TailStream (cancel on drop)
//! ```
//!
//! The store is the only shared mutable state. Pollers and request
//! handlers never lock records themselves; they rely on single-record
//! upserts and the store's compare-and-set for secrets.

pub mod backoff;
pub mod error;
pub mod heartbeat;
pub mod poller;
pub mod pool;
pub mod registry;
pub mod supervisor;
pub mod tail;
mod target;

#[cfg(test)]
pub(crate) mod testing;

pub use backoff::RetryBackoff;
pub use error::{RegistryError, RegistryResult};
pub use poller::{HeartbeatPoller, PollerConfig, PollerPhase};
pub use pool::QueueResourcePool;
pub use registry::{Registry, TenantCredentials};
pub use supervisor::PollerSupervisor;
pub use tail::{TailConfig, TailFanout, TailStream, TailTopic};
