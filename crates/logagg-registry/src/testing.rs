//! Scripted in-process bridge for registry tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use futures::{stream, StreamExt};
use logagg_bridge::{BridgeError, ByteStream, OpenFuture, TailSource, TailTarget};
use tokio::sync::mpsc;

/// What the next `open` call does.
pub(crate) enum Script {
    /// Fail to connect.
    Refuse,
    /// Never answer the open.
    Hang,
    /// Yield the chunks, then end the stream.
    Chunks(Vec<&'static str>),
    /// Yield the chunks, then stay open without sending anything.
    ChunksThenIdle(Vec<&'static str>),
    /// Relay whatever the test pushes through the channel.
    Fed(mpsc::UnboundedReceiver<Result<Bytes, BridgeError>>),
}

/// Plays back one [`Script`] per `open`; idle streams once exhausted.
#[derive(Default)]
pub(crate) struct ScriptedSource {
    scripts: Mutex<VecDeque<Script>>,
    opened: AtomicUsize,
    live: Arc<AtomicUsize>,
    targets: Mutex<Vec<TailTarget>>,
}

impl ScriptedSource {
    pub(crate) fn new(scripts: impl IntoIterator<Item = Script>) -> Arc<Self> {
        Arc::new(Self {
            scripts: Mutex::new(scripts.into_iter().collect()),
            ..Default::default()
        })
    }

    /// Number of `open` calls so far, successful or not.
    pub(crate) fn opened(&self) -> usize {
        self.opened.load(Ordering::SeqCst)
    }

    /// Streams handed out and not yet dropped.
    pub(crate) fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub(crate) fn targets(&self) -> Vec<TailTarget> {
        self.targets.lock().unwrap().clone()
    }
}

fn chunks(items: Vec<&'static str>) -> impl futures::Stream<Item = Result<Bytes, BridgeError>> {
    stream::iter(
        items
            .into_iter()
            .map(|c| Ok(Bytes::from_static(c.as_bytes()))),
    )
}

impl TailSource for ScriptedSource {
    fn open<'a>(&'a self, target: &'a TailTarget) -> OpenFuture<'a> {
        Box::pin(async move {
            self.opened.fetch_add(1, Ordering::SeqCst);
            self.targets.lock().unwrap().push(target.clone());
            let script = self.scripts.lock().unwrap().pop_front();

            let inner: ByteStream = match script {
                Some(Script::Refuse) => {
                    return Err(BridgeError::Connect {
                        address: target.bridge_address.clone(),
                        reason: "connection refused".to_string(),
                    });
                }
                Some(Script::Hang) => return futures::future::pending().await,
                Some(Script::Chunks(items)) => Box::pin(chunks(items)),
                Some(Script::ChunksThenIdle(items)) => {
                    Box::pin(chunks(items).chain(stream::pending()))
                }
                Some(Script::Fed(rx)) => Box::pin(stream::unfold(rx, |mut rx| async move {
                    rx.recv().await.map(|item| (item, rx))
                })),
                None => Box::pin(stream::pending()),
            };

            self.live.fetch_add(1, Ordering::SeqCst);
            let guard = LiveGuard(self.live.clone());
            let tracked: ByteStream = Box::pin(inner.map(move |item| {
                let _ = &guard;
                item
            }));
            Ok(tracked)
        })
    }
}

struct LiveGuard(Arc<AtomicUsize>);

impl Drop for LiveGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Poll `check` until it holds or a second passes.
pub(crate) async fn eventually(mut check: impl FnMut() -> bool) -> bool {
    for _ in 0..100 {
        if check() {
            return true;
        }
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    }
    check()
}
