//! logagg-bridge — client side of the queue tailing bridge.
//!
//! The bridge is an external HTTP service that subscribes to a topic on a
//! queue daemon and relays every message as one newline-terminated line of
//! a chunked response. This crate provides:
//!
//! - [`TailSource`], the seam the master consumes byte streams through;
//! - [`HttpTailSource`], the hyper-based implementation;
//! - [`LineDecoder`], which reassembles lines split across chunks.
//!
//! Dropping a [`ByteStream`] closes the upstream connection.

pub mod client;
pub mod error;
pub mod lines;

use std::future::Future;
use std::pin::Pin;

use bytes::Bytes;
use futures::Stream;

pub use client::HttpTailSource;
pub use error::BridgeError;
pub use lines::LineDecoder;

/// A type-erased, fallible stream of raw bytes from the bridge.
pub type ByteStream = Pin<Box<dyn Stream<Item = Result<Bytes, BridgeError>> + Send>>;

/// Future returned by [`TailSource::open`].
pub type OpenFuture<'a> = Pin<Box<dyn Future<Output = Result<ByteStream, BridgeError>> + Send + 'a>>;

/// Where and what to tail.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TailTarget {
    /// Bridge `host:port`.
    pub bridge_address: String,
    /// Queue daemon TCP address the bridge should subscribe on.
    pub queue_tcp_address: String,
    pub topic: String,
}

impl TailTarget {
    /// Request path and query understood by the bridge.
    pub fn path_and_query(&self) -> String {
        format!(
            "/tail?nsqd_tcp_address={}&topic={}",
            encode_query_component(&self.queue_tcp_address),
            encode_query_component(&self.topic),
        )
    }
}

/// Something that can open a live byte stream for a topic.
pub trait TailSource: Send + Sync {
    fn open<'a>(&'a self, target: &'a TailTarget) -> OpenFuture<'a>;
}

/// Percent-encode everything outside the RFC 3986 unreserved set.
fn encode_query_component(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for b in s.bytes() {
        match b {
            b'A'..=b'Z' | b'a'..=b'z' | b'0'..=b'9' | b'-' | b'_' | b'.' | b'~' => {
                out.push(b as char)
            }
            _ => out.push_str(&format!("%{b:02X}")),
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn path_and_query_escapes_ephemeral_topic() {
        let target = TailTarget {
            bridge_address: "10.0.0.5:1077".to_string(),
            queue_tcp_address: "10.0.0.9:4150".to_string(),
            topic: "logs_heartbeat#ephemeral".to_string(),
        };
        assert_eq!(
            target.path_and_query(),
            "/tail?nsqd_tcp_address=10.0.0.9%3A4150&topic=logs_heartbeat%23ephemeral"
        );
    }
}
