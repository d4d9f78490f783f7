//! Heartbeat poller: one long-lived task per tenant.
//!
//! The poller tails the tenant's heartbeat topic through the bridge and
//! upserts every decoded record into the component table. Any transport
//! or decode failure ends the session; the poller backs off and starts a
//! new one. Each session is bounded by the reconcile interval, after which
//! the connection is dropped and reopened even if it is still healthy.

use std::sync::Arc;
use std::time::Duration;

use futures::StreamExt;
use logagg_bridge::{LineDecoder, TailSource};
use logagg_state::StateStore;
use serde::Serialize;
use tokio::sync::watch;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, trace, warn};

use crate::backoff::RetryBackoff;
use crate::error::{RegistryError, RegistryResult};
use crate::heartbeat::decode_heartbeat;
use crate::target::resolve_target;

/// Lifecycle of a tenant's poller as seen by the supervisor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum PollerPhase {
    Absent,
    Running,
    BackingOff,
}

#[derive(Debug, Clone)]
pub struct PollerConfig {
    /// Reconcile interval; also the longest a single read session lasts.
    pub interval: Duration,
    /// First retry delay after a failed session.
    pub retry_initial: Duration,
    /// Cap for the doubling retry delay.
    pub retry_max: Duration,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(30),
            retry_initial: Duration::from_secs(1),
            retry_max: Duration::from_secs(30),
        }
    }
}

/// How a session that did not fail came to an end.
#[derive(Debug, PartialEq, Eq)]
enum SessionEnd {
    /// The read window elapsed; reopen right away.
    WindowElapsed,
    /// The bridge closed the stream cleanly.
    StreamEnded,
}

pub struct HeartbeatPoller {
    tenant: String,
    store: StateStore,
    source: Arc<dyn TailSource>,
    config: PollerConfig,
    phase_tx: watch::Sender<PollerPhase>,
}

impl HeartbeatPoller {
    pub fn new(
        tenant: &str,
        store: StateStore,
        source: Arc<dyn TailSource>,
        config: PollerConfig,
    ) -> (Self, watch::Receiver<PollerPhase>) {
        let (phase_tx, phase_rx) = watch::channel(PollerPhase::Absent);
        let poller = Self {
            tenant: tenant.to_string(),
            store,
            source,
            config,
            phase_tx,
        };
        (poller, phase_rx)
    }

    /// Poll until `shutdown` fires. Never returns on its own.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        let tenant = self.tenant.clone();
        let mut backoff = RetryBackoff::new(self.config.retry_initial, self.config.retry_max);
        info!(%tenant, "heartbeat poller started");

        loop {
            if *shutdown.borrow() {
                break;
            }
            self.phase_tx.send_replace(PollerPhase::Running);

            let mut ingested = 0u64;
            let outcome = tokio::select! {
                outcome = self.session(&mut ingested) => outcome,
                _ = shutdown.changed() => break,
            };
            if ingested > 0 {
                backoff.reset();
            }

            let delay = match outcome {
                Ok(SessionEnd::WindowElapsed) => {
                    debug!(%tenant, ingested, "heartbeat read window elapsed, reopening");
                    continue;
                }
                Ok(SessionEnd::StreamEnded) => {
                    debug!(%tenant, ingested, "heartbeat stream ended");
                    backoff.initial()
                }
                Err(e) => {
                    let delay = backoff.fail();
                    warn!(
                        %tenant,
                        error = %e,
                        ingested,
                        failures = backoff.consecutive_failures(),
                        retry_in_ms = delay.as_millis() as u64,
                        "heartbeat session failed"
                    );
                    delay
                }
            };

            self.phase_tx.send_replace(PollerPhase::BackingOff);
            tokio::select! {
                _ = tokio::time::sleep(delay) => {}
                _ = shutdown.changed() => break,
            }
        }

        self.phase_tx.send_replace(PollerPhase::Absent);
        debug!(%tenant, "heartbeat poller stopped");
    }

    /// One connection to the bridge, bounded by the read window.
    async fn session(&self, ingested: &mut u64) -> RegistryResult<SessionEnd> {
        let deadline = Instant::now() + self.config.interval;

        // Re-resolved every session so a newly registered bridge is picked up.
        let tenant = self
            .store
            .get_tenant(&self.tenant)?
            .ok_or_else(|| RegistryError::TenantNotFound(self.tenant.clone()))?;
        let target = resolve_target(&self.store, &tenant, &tenant.heartbeat_topic)?;

        let mut stream = match timeout_at(deadline, self.source.open(&target)).await {
            Ok(opened) => opened?,
            Err(_) => return Ok(SessionEnd::WindowElapsed),
        };
        debug!(tenant = %self.tenant, bridge = %target.bridge_address, "heartbeat stream opened");

        let mut decoder = LineDecoder::new();
        loop {
            let chunk = match timeout_at(deadline, stream.next()).await {
                Err(_) => return Ok(SessionEnd::WindowElapsed),
                Ok(None) => {
                    if let Some(line) = decoder.finish() {
                        self.ingest(&line, ingested)?;
                    }
                    return Ok(SessionEnd::StreamEnded);
                }
                Ok(Some(chunk)) => chunk?,
            };
            for line in decoder.push(&chunk) {
                self.ingest(&line, ingested)?;
            }
        }
    }

    fn ingest(&self, line: &str, ingested: &mut u64) -> RegistryResult<()> {
        if line.trim().is_empty() {
            return Ok(());
        }
        let component = decode_heartbeat(line, &self.tenant)?;
        self.store.upsert_component(&component)?;
        *ingested += 1;
        trace!(
            tenant = %component.tenant_name,
            role = %component.role,
            address = %component.address(),
            "heartbeat ingested"
        );
        Ok(())
    }
}
