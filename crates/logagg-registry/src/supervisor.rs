//! Poller supervisor — reconciles known tenants against running pollers.
//!
//! A single control task ticks every reconcile interval. On each tick it
//! drops pollers whose task has exited, e.g. after a panic, and starts
//! one for every tenant without a live poller.

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use logagg_bridge::TailSource;
use logagg_state::StateStore;
use tokio::sync::{watch, RwLock};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::error::RegistryResult;
use crate::poller::{HeartbeatPoller, PollerConfig, PollerPhase};

/// Per-tenant poller state.
struct PollerSlot {
    handle: JoinHandle<()>,
    shutdown_tx: watch::Sender<bool>,
    phase: watch::Receiver<PollerPhase>,
}

impl PollerSlot {
    fn phase(&self) -> PollerPhase {
        if self.handle.is_finished() {
            PollerPhase::Absent
        } else {
            *self.phase.borrow()
        }
    }
}

/// Owns the tenant → poller mapping.
#[derive(Clone)]
pub struct PollerSupervisor {
    store: StateStore,
    source: Arc<dyn TailSource>,
    config: PollerConfig,
    pollers: Arc<RwLock<HashMap<String, PollerSlot>>>,
}

impl PollerSupervisor {
    pub fn new(store: StateStore, source: Arc<dyn TailSource>, config: PollerConfig) -> Self {
        Self {
            store,
            source,
            config,
            pollers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Start a poller for every tenant that lacks one. Returns how many
    /// were started.
    pub async fn reconcile(&self) -> RegistryResult<usize> {
        let tenants = self.store.list_tenants()?;
        let mut pollers = self.pollers.write().await;

        pollers.retain(|tenant, slot| {
            if slot.handle.is_finished() {
                warn!(%tenant, "heartbeat poller exited, restarting");
                false
            } else {
                true
            }
        });

        let mut started = 0;
        for tenant in tenants {
            if pollers.contains_key(&tenant.name) {
                continue;
            }
            let (poller, phase) = HeartbeatPoller::new(
                &tenant.name,
                self.store.clone(),
                self.source.clone(),
                self.config.clone(),
            );
            let (shutdown_tx, shutdown_rx) = watch::channel(false);
            let handle = tokio::spawn(poller.run(shutdown_rx));
            pollers.insert(
                tenant.name,
                PollerSlot {
                    handle,
                    shutdown_tx,
                    phase,
                },
            );
            started += 1;
        }

        if started > 0 {
            info!(started, total = pollers.len(), "pollers reconciled");
        }
        Ok(started)
    }

    /// Reconcile on every tick until `shutdown` fires, then stop all pollers.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut ticker = tokio::time::interval(self.config.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!(interval_ms = self.config.interval.as_millis() as u64, "poller supervisor started");

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.reconcile().await {
                        error!(error = %e, "poller reconciliation failed");
                    }
                }
                _ = shutdown.changed() => {
                    debug!("poller supervisor shutting down");
                    break;
                }
            }
        }

        self.stop_all().await;
    }

    pub async fn phase(&self, tenant: &str) -> PollerPhase {
        let pollers = self.pollers.read().await;
        pollers
            .get(tenant)
            .map(PollerSlot::phase)
            .unwrap_or(PollerPhase::Absent)
    }

    /// Phase of every supervised poller, keyed by tenant.
    pub async fn phases(&self) -> BTreeMap<String, PollerPhase> {
        let pollers = self.pollers.read().await;
        pollers
            .iter()
            .map(|(tenant, slot)| (tenant.clone(), slot.phase()))
            .collect()
    }

    /// Stop all pollers (for graceful shutdown).
    pub async fn stop_all(&self) {
        let mut pollers = self.pollers.write().await;
        for (tenant, slot) in pollers.drain() {
            let _ = slot.shutdown_tx.send(true);
            slot.handle.abort();
            debug!(%tenant, "heartbeat poller stopped");
        }
        info!("all heartbeat pollers stopped");
    }
}
