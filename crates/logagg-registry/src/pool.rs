//! Queue resource pool: the queue backends tenants can be assigned to.

use logagg_state::{is_key_segment, QueueResourceRef, StateError, StateStore};
use rand::rngs::OsRng;
use rand::seq::SliceRandom;
use tracing::{debug, info};

use crate::error::{RegistryError, RegistryResult};

/// View over the queue resources registered in the store.
///
/// Resources are only ever added; nothing is removed automatically.
#[derive(Clone)]
pub struct QueueResourcePool {
    store: StateStore,
}

impl QueueResourcePool {
    pub fn new(store: StateStore) -> Self {
        Self { store }
    }

    /// Add a queue backend to the pool.
    pub fn register(&self, resource: QueueResourceRef) -> RegistryResult<QueueResourceRef> {
        for addr in [&resource.tcp_address, &resource.http_address] {
            if !is_key_segment(addr) {
                return Err(RegistryError::InvalidArgument(format!(
                    "invalid queue address {addr:?}"
                )));
            }
        }
        match self.store.insert_queue_resource(&resource) {
            Ok(()) => {
                info!(
                    tcp = %resource.tcp_address,
                    http = %resource.http_address,
                    "queue resource registered"
                );
                Ok(resource)
            }
            Err(StateError::DuplicateKey(_)) => Err(RegistryError::DuplicateQueueResource(
                resource.table_key(),
            )),
            Err(e) => Err(e.into()),
        }
    }

    pub fn list(&self) -> RegistryResult<Vec<QueueResourceRef>> {
        Ok(self.store.list_queue_resources()?)
    }

    /// Pick one resource uniformly at random.
    pub fn assign(&self) -> RegistryResult<QueueResourceRef> {
        let resources = self.store.list_queue_resources()?;
        let chosen = resources
            .choose(&mut OsRng)
            .cloned()
            .ok_or(RegistryError::NoResourceAvailable)?;
        debug!(tcp = %chosen.tcp_address, pool_size = resources.len(), "queue resource assigned");
        Ok(chosen)
    }
}
