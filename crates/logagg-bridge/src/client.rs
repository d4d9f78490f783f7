//! HTTP client for the tailing bridge.
//!
//! One plain HTTP/1.1 connection per tail. The response body is relayed
//! frame by frame; the connection task is aborted when the returned
//! stream is dropped, so an abandoned tail never keeps its socket open.

use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::error::BridgeError;
use crate::{ByteStream, OpenFuture, TailSource, TailTarget};

/// Opens tails against the bridge over HTTP.
#[derive(Debug, Clone)]
pub struct HttpTailSource {
    /// Bound on the TCP connect and HTTP handshake. The response head is
    /// not bounded: the bridge may hold it until the topic has a message.
    connect_timeout: Duration,
}

impl Default for HttpTailSource {
    fn default() -> Self {
        Self::new(Duration::from_secs(5))
    }
}

impl HttpTailSource {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }

    async fn connect(&self, target: &TailTarget) -> Result<ByteStream, BridgeError> {
        let address = target.bridge_address.clone();
        let uri = format!("http://{address}{}", target.path_and_query());

        let (mut sender, conn) = tokio::time::timeout(self.connect_timeout, async {
            let stream = tokio::net::TcpStream::connect(&address).await?;
            let io = hyper_util::rt::TokioIo::new(stream);
            hyper::client::conn::http1::handshake::<_, Empty<Bytes>>(io)
                .await
                .map_err(std::io::Error::other)
        })
        .await
        .map_err(|_| BridgeError::Timeout(self.connect_timeout))?
        .map_err(|e| BridgeError::Connect {
            address: address.clone(),
            reason: e.to_string(),
        })?;

        // Drive the connection in the background; tied to the stream's lifetime.
        let driver = ConnectionGuard(tokio::spawn(async move {
            if let Err(e) = conn.await {
                debug!(error = %e, "bridge connection closed with error");
            }
        }));

        let req = http::Request::builder()
            .method("GET")
            .uri(&uri)
            .header("host", &address)
            .header("user-agent", "logagg-master/0.1")
            .body(Empty::<Bytes>::new())
            .map_err(|e| BridgeError::Request(e.to_string()))?;

        // Callers bound this wait themselves by dropping the future.
        let resp = sender
            .send_request(req)
            .await
            .map_err(|e| BridgeError::Request(e.to_string()))?;

        if !resp.status().is_success() {
            return Err(BridgeError::Status {
                status: resp.status(),
                uri,
            });
        }
        debug!(%uri, "bridge tail opened");

        let body = resp.into_body();
        let stream = futures::stream::unfold((body, driver), |(mut body, driver)| async move {
            loop {
                match body.frame().await {
                    None => return None,
                    Some(Err(e)) => {
                        return Some((Err(BridgeError::Stream(e.to_string())), (body, driver)));
                    }
                    Some(Ok(frame)) => {
                        // Trailers carry no payload.
                        if let Ok(data) = frame.into_data() {
                            return Some((Ok(data), (body, driver)));
                        }
                    }
                }
            }
        });

        Ok(Box::pin(stream))
    }
}

impl TailSource for HttpTailSource {
    fn open<'a>(&'a self, target: &'a TailTarget) -> OpenFuture<'a> {
        Box::pin(self.connect(target))
    }
}

/// Aborts the connection task when dropped.
struct ConnectionGuard(JoinHandle<()>);

impl Drop for ConnectionGuard {
    fn drop(&mut self) {
        self.0.abort();
    }
}
