use logagg_bridge::TailTarget;
use logagg_state::{ComponentRole, StateStore, Tenant};

use crate::error::{RegistryError, RegistryResult};

/// Locate the bridge for one of a tenant's topics.
///
/// A `queue_api` component registered under the tenant wins; otherwise the
/// bridge address configured on the queue resource is used.
pub(crate) fn resolve_target(
    store: &StateStore,
    tenant: &Tenant,
    topic: &str,
) -> RegistryResult<TailTarget> {
    let bridge_address = match store.find_component(&tenant.name, &ComponentRole::QueueApi)? {
        Some(component) => component.address(),
        None => tenant.queue_ref.api_address.clone().ok_or_else(|| {
            RegistryError::ComponentNotFound(format!("{}/{}", tenant.name, ComponentRole::QueueApi))
        })?,
    };

    Ok(TailTarget {
        bridge_address,
        queue_tcp_address: tenant.queue_ref.tcp_address.clone(),
        topic: topic.to_string(),
    })
}
