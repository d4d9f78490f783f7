//! Live tail fan-out.
//!
//! Every call to [`TailFanout::open`] gets its own upstream connection and
//! its own pump task. The pump relays one of the tenant's topics as batches
//! of newline-terminated lines and stops as soon as the reader goes away:
//! dropping the [`TailStream`] cancels the pump, which drops the upstream
//! stream and with it the bridge connection.

use std::pin::Pin;
use std::sync::Arc;
use std::task::{Context, Poll};
use std::time::Duration;

use futures::{FutureExt, Stream, StreamExt};
use logagg_bridge::{BridgeError, ByteStream, LineDecoder, TailSource};
use logagg_state::Tenant;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tokio_util::sync::{CancellationToken, DropGuard};
use tracing::{debug, info};

use crate::error::{RegistryError, RegistryResult};
use crate::registry::Registry;
use crate::target::resolve_target;

#[derive(Debug, Clone)]
pub struct TailConfig {
    /// Longest a batch is held back while upstream keeps producing.
    pub flush_window: Duration,
    /// Batches buffered for a slow reader before the pump waits.
    pub channel_capacity: usize,
}

impl Default for TailConfig {
    fn default() -> Self {
        Self {
            flush_window: Duration::from_secs(1),
            channel_capacity: 16,
        }
    }
}

/// Which of a tenant's topics a tail follows.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TailTopic {
    /// Application log lines.
    Logs,
    /// Raw component heartbeats, one JSON record per line.
    Heartbeat,
}

impl TailTopic {
    fn of(self, tenant: &Tenant) -> &str {
        match self {
            TailTopic::Logs => &tenant.log_topic,
            TailTopic::Heartbeat => &tenant.heartbeat_topic,
        }
    }
}

/// Opens authenticated tails.
#[derive(Clone)]
pub struct TailFanout {
    registry: Registry,
    source: Arc<dyn TailSource>,
    config: TailConfig,
}

impl TailFanout {
    pub fn new(registry: Registry, source: Arc<dyn TailSource>, config: TailConfig) -> Self {
        Self {
            registry,
            source,
            config,
        }
    }

    /// Start tailing one of `name`'s topics.
    ///
    /// Credentials are checked before anything is opened upstream. The
    /// bridge may hold its response until the topic produces something;
    /// `cancel` also aborts that wait. The returned stream ends when
    /// upstream ends, when `cancel` fires, or yields one final
    /// `UpstreamUnreachable` if the bridge stream breaks.
    pub async fn open(
        &self,
        name: &str,
        secret: &str,
        topic: TailTopic,
        cancel: CancellationToken,
    ) -> RegistryResult<TailStream> {
        let tenant = self.registry.authenticate(name, secret)?;
        let target = resolve_target(self.registry.store(), &tenant, topic.of(&tenant))?;
        let upstream = tokio::select! {
            _ = cancel.cancelled() => {
                return Err(RegistryError::UpstreamUnreachable(format!(
                    "tail of {} cancelled while opening",
                    target.topic
                )));
            }
            opened = self.source.open(&target) => opened?,
        };
        info!(
            tenant = %name,
            topic = %target.topic,
            bridge = %target.bridge_address,
            "tail opened"
        );

        let (tx, rx) = mpsc::channel(self.config.channel_capacity.max(1));
        let token = cancel.child_token();
        tokio::spawn(pump(
            name.to_string(),
            upstream,
            tx,
            token.clone(),
            self.config.flush_window,
        ));

        Ok(TailStream {
            rx,
            _guard: token.drop_guard(),
        })
    }
}

/// Batches of lines from one tail. Dropping it stops the tail.
pub struct TailStream {
    rx: mpsc::Receiver<RegistryResult<String>>,
    _guard: DropGuard,
}

impl Stream for TailStream {
    type Item = RegistryResult<String>;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.rx.poll_recv(cx)
    }
}

/// Groups decoded lines into outgoing chunks.
#[derive(Default)]
struct Batcher {
    decoder: LineDecoder,
    pending: String,
    ready: Vec<String>,
}

impl Batcher {
    fn absorb(&mut self, chunk: &[u8]) {
        for line in self.decoder.push(chunk) {
            if line.trim().is_empty() {
                // Keepalive: goes out on its own, after what came before it.
                self.flush();
                self.ready.push("\n".to_string());
            } else {
                self.pending.push_str(&line);
                self.pending.push('\n');
            }
        }
    }

    fn finish(&mut self) {
        if let Some(line) = self.decoder.finish() {
            self.pending.push_str(&line);
            self.pending.push('\n');
        }
        self.flush();
    }

    fn flush(&mut self) {
        if !self.pending.is_empty() {
            self.ready.push(std::mem::take(&mut self.pending));
        }
    }

    fn take_ready(&mut self) -> Vec<String> {
        std::mem::take(&mut self.ready)
    }
}

async fn pump(
    tenant: String,
    mut upstream: ByteStream,
    tx: mpsc::Sender<RegistryResult<String>>,
    cancel: CancellationToken,
    flush_window: Duration,
) {
    let mut batcher = Batcher::default();
    let mut delivered = 0usize;

    let reason = loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => break "cancelled",
            _ = tx.closed() => break "reader disconnected",
            next = upstream.next() => next,
        };

        let mut failure: Option<BridgeError> = None;
        let mut ended = false;
        match next {
            None => ended = true,
            Some(Err(e)) => failure = Some(e),
            Some(Ok(chunk)) => {
                batcher.absorb(&chunk);
                // Keep absorbing whatever is already buffered, up to the window.
                let window_end = Instant::now() + flush_window;
                while Instant::now() < window_end {
                    match upstream.next().now_or_never() {
                        Some(Some(Ok(chunk))) => batcher.absorb(&chunk),
                        Some(Some(Err(e))) => {
                            failure = Some(e);
                            break;
                        }
                        Some(None) => {
                            ended = true;
                            break;
                        }
                        None => break,
                    }
                }
            }
        }

        if ended {
            batcher.finish();
        } else {
            batcher.flush();
        }
        for batch in batcher.take_ready() {
            if !deliver(&tx, &cancel, Ok(batch)).await {
                break;
            }
            delivered += 1;
        }

        if let Some(e) = failure {
            debug!(%tenant, error = %e, "tail upstream failed");
            deliver(&tx, &cancel, Err(RegistryError::from(e))).await;
            break "upstream failed";
        }
        if ended {
            break "upstream ended";
        }
        if cancel.is_cancelled() || tx.is_closed() {
            break "reader disconnected";
        }
    };

    drop(upstream);
    info!(%tenant, delivered, reason, "tail closed");
}

/// Send one item unless the reader is gone or the tail was cancelled.
async fn deliver(
    tx: &mpsc::Sender<RegistryResult<String>>,
    cancel: &CancellationToken,
    item: RegistryResult<String>,
) -> bool {
    tokio::select! {
        biased;
        _ = cancel.cancelled() => false,
        sent = tx.send(item) => sent.is_ok(),
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use logagg_state::{QueueResourceRef, StateStore};

    use super::*;
    use crate::registry::TenantCredentials;
    use crate::testing::{eventually, Script, ScriptedSource};

    fn setup(scripts: Vec<Script>) -> (TailFanout, Arc<ScriptedSource>, TenantCredentials) {
        let registry = Registry::new(StateStore::open_in_memory().unwrap());
        registry
            .pool()
            .register(QueueResourceRef::new(
                "10.0.1.1:4150",
                "10.0.1.1:4151",
                Some("bridge:1077"),
            ))
            .unwrap();
        let creds = registry.create_tenant("logs").unwrap();
        let source = ScriptedSource::new(scripts);
        let fanout = TailFanout::new(registry, source.clone(), TailConfig::default());
        (fanout, source, creds)
    }

    fn fed() -> (
        Script,
        mpsc::UnboundedSender<Result<Bytes, BridgeError>>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Script::Fed(rx), tx)
    }

    fn push(tx: &mpsc::UnboundedSender<Result<Bytes, BridgeError>>, s: &'static str) {
        tx.send(Ok(Bytes::from_static(s.as_bytes()))).unwrap();
    }

    async fn collect(stream: TailStream) -> Vec<RegistryResult<String>> {
        stream.collect().await
    }

    #[tokio::test]
    async fn unknown_tenant_opens_nothing() {
        let (fanout, source, _) = setup(vec![]);
        let err = fanout
            .open("ghost", "x", TailTopic::Logs, CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::TenantNotFound(_)));
        assert_eq!(source.opened(), 0);
    }

    #[tokio::test]
    async fn wrong_secret_opens_nothing() {
        let (fanout, source, _) = setup(vec![]);
        let err = fanout
            .open("logs", "wrong", TailTopic::Logs, CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::AuthenticationFailed(_)));
        assert_eq!(source.opened(), 0);
    }

    #[tokio::test]
    async fn unreachable_bridge_is_reported() {
        let (fanout, _source, creds) = setup(vec![Script::Refuse]);
        let err = fanout
            .open("logs", &creds.secret, TailTopic::Logs, CancellationToken::new())
            .await
            .err()
            .unwrap();
        assert!(matches!(err, RegistryError::UpstreamUnreachable(_)));
    }

    #[tokio::test]
    async fn tails_the_log_topic() {
        let (fanout, source, creds) = setup(vec![Script::Chunks(vec!["x\n"])]);
        let stream = fanout
            .open("logs", &creds.secret, TailTopic::Logs, CancellationToken::new())
            .await
            .unwrap();
        collect(stream).await;

        let target = &source.targets()[0];
        assert_eq!(target.topic, "logs_logs");
        assert_eq!(target.bridge_address, "bridge:1077");
    }

    #[tokio::test]
    async fn tails_the_heartbeat_topic() {
        let (fanout, source, creds) = setup(vec![Script::Chunks(vec!["{\"host\":\"h1\"}\n"])]);
        let stream = fanout
            .open("logs", &creds.secret, TailTopic::Heartbeat, CancellationToken::new())
            .await
            .unwrap();
        let items: Vec<String> = collect(stream).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items, vec!["{\"host\":\"h1\"}\n"]);

        let target = &source.targets()[0];
        assert_eq!(target.topic, "logs_heartbeat#ephemeral");
        assert_eq!(target.queue_tcp_address, "10.0.1.1:4150");
    }

    #[tokio::test]
    async fn cancellation_aborts_a_pending_open() {
        let (fanout, source, creds) = setup(vec![Script::Hang]);
        let cancel = CancellationToken::new();
        let pending = tokio::spawn({
            let fanout = fanout.clone();
            let cancel = cancel.clone();
            async move {
                fanout
                    .open("logs", &creds.secret, TailTopic::Logs, cancel)
                    .await
                    .err()
            }
        });

        assert!(eventually(|| source.opened() == 1).await);
        cancel.cancel();
        let err = pending.await.unwrap().unwrap();
        assert!(matches!(err, RegistryError::UpstreamUnreachable(_)));
    }

    #[tokio::test]
    async fn buffered_lines_are_batched() {
        let (script, tx) = fed();
        push(&tx, "a\nb");
        push(&tx, "\nc\n");
        drop(tx);

        let (fanout, _source, creds) = setup(vec![script]);
        let stream = fanout
            .open("logs", &creds.secret, TailTopic::Logs, CancellationToken::new())
            .await
            .unwrap();

        let items: Vec<String> = collect(stream).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items, vec!["a\nb\nc\n"]);
    }

    #[tokio::test]
    async fn unterminated_final_line_is_flushed() {
        let (fanout, _source, creds) = setup(vec![Script::Chunks(vec!["a\nlast"])]);
        let stream = fanout
            .open("logs", &creds.secret, TailTopic::Logs, CancellationToken::new())
            .await
            .unwrap();
        let items: Vec<String> = collect(stream).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items.concat(), "a\nlast\n");
    }

    #[tokio::test]
    async fn keepalive_is_forwarded_as_blank_line() {
        let (script, tx) = fed();
        push(&tx, "a\n");
        push(&tx, "\n");
        push(&tx, "b\n");
        drop(tx);

        let (fanout, _source, creds) = setup(vec![script]);
        let stream = fanout
            .open("logs", &creds.secret, TailTopic::Logs, CancellationToken::new())
            .await
            .unwrap();

        let items: Vec<String> = collect(stream).await.into_iter().map(|r| r.unwrap()).collect();
        assert_eq!(items, vec!["a\n", "\n", "b\n"]);
    }

    #[tokio::test]
    async fn upstream_failure_ends_tail_with_one_error() {
        let (script, tx) = fed();
        push(&tx, "a\n");
        tx.send(Err(BridgeError::Stream("connection reset".to_string())))
            .unwrap();

        let (fanout, _source, creds) = setup(vec![script]);
        let stream = fanout
            .open("logs", &creds.secret, TailTopic::Logs, CancellationToken::new())
            .await
            .unwrap();

        let items = collect(stream).await;
        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "a\n");
        assert!(matches!(items[1], Err(RegistryError::UpstreamUnreachable(_))));
    }

    #[tokio::test]
    async fn dropping_reader_releases_upstream() {
        let (fanout, source, creds) = setup(vec![Script::ChunksThenIdle(vec!["a\n"])]);
        let mut stream = fanout
            .open("logs", &creds.secret, TailTopic::Logs, CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(stream.next().await.unwrap().unwrap(), "a\n");
        assert_eq!(source.live(), 1);

        drop(stream);
        assert!(eventually(|| source.live() == 0).await);
    }

    #[tokio::test]
    async fn cancellation_ends_stream() {
        let (fanout, source, creds) = setup(vec![Script::ChunksThenIdle(vec![])]);
        let cancel = CancellationToken::new();
        let mut stream = fanout.open("logs", &creds.secret, TailTopic::Logs, cancel.clone()).await.unwrap();

        cancel.cancel();
        assert!(stream.next().await.is_none());
        assert!(eventually(|| source.live() == 0).await);
    }

    #[tokio::test]
    async fn concurrent_tails_are_independent() {
        let (fanout, source, creds) = setup(vec![
            Script::ChunksThenIdle(vec!["one\n"]),
            Script::ChunksThenIdle(vec!["two\n"]),
        ]);
        let mut first = fanout
            .open("logs", &creds.secret, TailTopic::Logs, CancellationToken::new())
            .await
            .unwrap();
        let mut second = fanout
            .open("logs", &creds.secret, TailTopic::Logs, CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(source.live(), 2);

        assert_eq!(first.next().await.unwrap().unwrap(), "one\n");
        drop(first);
        assert!(eventually(|| source.live() == 1).await);

        assert_eq!(second.next().await.unwrap().unwrap(), "two\n");
    }
}
