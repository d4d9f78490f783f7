//! Registration & query operations.
//!
//! Stateless handlers over the store: every call validates its inputs,
//! authenticates against the tenant secret where required, and performs
//! single-record store operations. Nothing here spawns background work;
//! pollers for new tenants are picked up by the supervisor's next
//! reconciliation.

use logagg_state::{
    is_key_segment, Attrs, Component, ComponentRole, QueueResourceRef, SecretSwap, StateError,
    StateStore, Tenant,
};
use rand::rngs::OsRng;
use rand::RngCore;
use serde::Serialize;
use tracing::{info, warn};

use crate::error::{RegistryError, RegistryResult};
use crate::pool::QueueResourcePool;

/// Bytes of randomness in a generated secret (hex-encoded on output).
const SECRET_BYTES: usize = 8;

/// A tenant name and its current secret.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TenantCredentials {
    pub name: String,
    pub secret: String,
}

impl From<Tenant> for TenantCredentials {
    fn from(t: Tenant) -> Self {
        Self {
            name: t.name,
            secret: t.secret,
        }
    }
}

/// Entry point for tenant and component operations.
#[derive(Clone)]
pub struct Registry {
    store: StateStore,
    pool: QueueResourcePool,
}

impl Registry {
    pub fn new(store: StateStore) -> Self {
        let pool = QueueResourcePool::new(store.clone());
        Self { store, pool }
    }

    pub fn store(&self) -> &StateStore {
        &self.store
    }

    pub fn pool(&self) -> &QueueResourcePool {
        &self.pool
    }

    // ── Tenants ────────────────────────────────────────────────────

    /// Create a tenant with a fresh random secret and a queue resource.
    pub fn create_tenant(&self, name: &str) -> RegistryResult<TenantCredentials> {
        let name = name.trim();
        if !is_key_segment(name) {
            return Err(RegistryError::InvalidArgument(format!(
                "invalid cluster name {name:?}"
            )));
        }

        // Duplicates are reported even with an empty pool. The insert
        // below still enforces uniqueness.
        if self.store.get_tenant(name)?.is_some() {
            return Err(RegistryError::DuplicateTenant(name.to_string()));
        }

        let queue_ref = self.assign_queue_resource()?;
        let tenant = Tenant::new(name, &generate_secret(), queue_ref);

        match self.store.insert_tenant(&tenant) {
            Ok(()) => {
                info!(tenant = %name, queue = %tenant.queue_ref.tcp_address, "tenant created");
                Ok(tenant.into())
            }
            Err(StateError::DuplicateKey(_)) => {
                info!(tenant = %name, "tenant already exists");
                Err(RegistryError::DuplicateTenant(name.to_string()))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Replace the secret, provided `old_secret` is the current one.
    pub fn rotate_secret(
        &self,
        name: &str,
        old_secret: &str,
        new_secret: &str,
    ) -> RegistryResult<TenantCredentials> {
        self.swap_secret(name, Some(old_secret), new_secret)
    }

    /// Replace the secret without knowing the current one. Administrative.
    pub fn reset_secret(&self, name: &str, new_secret: &str) -> RegistryResult<TenantCredentials> {
        self.swap_secret(name, None, new_secret)
    }

    fn swap_secret(
        &self,
        name: &str,
        expected: Option<&str>,
        new_secret: &str,
    ) -> RegistryResult<TenantCredentials> {
        if new_secret.trim().is_empty() {
            return Err(RegistryError::InvalidArgument(
                "new secret must not be empty".to_string(),
            ));
        }
        match self.store.swap_secret(name, expected, new_secret)? {
            SecretSwap::Swapped(tenant) => {
                info!(tenant = %name, forced = expected.is_none(), "tenant secret changed");
                Ok(tenant.into())
            }
            SecretSwap::Mismatch => {
                warn!(tenant = %name, "secret change rejected");
                Err(RegistryError::AuthenticationFailed(name.to_string()))
            }
            SecretSwap::NotFound => Err(RegistryError::TenantNotFound(name.to_string())),
        }
    }

    /// Return the tenant record if `secret` matches.
    pub fn authenticate(&self, name: &str, secret: &str) -> RegistryResult<Tenant> {
        let tenant = self
            .store
            .get_tenant(name)?
            .ok_or_else(|| RegistryError::TenantNotFound(name.to_string()))?;
        if tenant.secret != secret {
            warn!(tenant = %name, "authentication failed");
            return Err(RegistryError::AuthenticationFailed(name.to_string()));
        }
        Ok(tenant)
    }

    /// Tenant details for a component joining the cluster.
    pub fn tenant_info(&self, name: &str, secret: &str) -> RegistryResult<Tenant> {
        self.authenticate(name, secret)
    }

    /// Names of all tenants. Secrets are never listed.
    pub fn list_tenants(&self) -> RegistryResult<Vec<String>> {
        Ok(self
            .store
            .list_tenants()?
            .into_iter()
            .map(|t| t.name)
            .collect())
    }

    // ── Components ─────────────────────────────────────────────────

    /// Register (or re-register) a component under a tenant.
    ///
    /// Re-registering the same `(tenant, role, host, port)` overwrites the
    /// stored attributes.
    pub fn register_component(
        &self,
        role: ComponentRole,
        name: &str,
        secret: &str,
        host: &str,
        port: &str,
        attrs: Attrs,
    ) -> RegistryResult<Component> {
        self.authenticate(name, secret)?;
        for (field, value) in [("host", host), ("port", port)] {
            if !is_key_segment(value) {
                return Err(RegistryError::InvalidArgument(format!(
                    "invalid {field} {value:?}"
                )));
            }
        }

        let component = Component::new(name, role, host, port).with_attrs(attrs);
        let stored = self.store.upsert_component(&component)?;
        info!(tenant = %name, role = %stored.role, address = %stored.address(), "component registered");
        Ok(stored)
    }

    /// All components recorded for a tenant.
    pub fn list_components(&self, name: &str, secret: &str) -> RegistryResult<Vec<Component>> {
        self.authenticate(name, secret)?;
        Ok(self.store.list_components_for_tenant(name)?)
    }

    // ── Queue resources ────────────────────────────────────────────

    fn assign_queue_resource(&self) -> RegistryResult<QueueResourceRef> {
        self.pool.assign()
    }
}

fn generate_secret() -> String {
    let mut buf = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut buf);
    hex::encode(buf)
}
