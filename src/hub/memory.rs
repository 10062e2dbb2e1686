//! In-process transport
//!
//! A `MemoryConnector` hands every connection attempt to a `MemoryServer`,
//! which decides when (and whether) the link opens. Used by the integration
//! tests and handy for exercising a `HubClient` without a network.

use async_trait::async_trait;
use futures::channel::mpsc as fmpsc;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, Mutex};

use super::transport::{Connector, Link};
use crate::error::HubError;

/// A connection attempt waiting for the server to accept or refuse it.
struct Attempt {
    url: String,
    decision: oneshot::Sender<Result<Link, HubError>>,
}

/// Client side: plug into `HubClient::builder().connector(..)`.
#[derive(Clone)]
pub struct MemoryConnector {
    attempts_tx: mpsc::UnboundedSender<Attempt>,
    attempts: Arc<AtomicU64>,
}

/// Server side: observes connection attempts and owns accepted peers.
pub struct MemoryServer {
    attempts_rx: Mutex<mpsc::UnboundedReceiver<Attempt>>,
    attempts: Arc<AtomicU64>,
}

/// Create a connected connector/server pair.
pub fn pair() -> (MemoryConnector, MemoryServer) {
    let (attempts_tx, attempts_rx) = mpsc::unbounded_channel();
    let attempts = Arc::new(AtomicU64::new(0));
    (
        MemoryConnector {
            attempts_tx,
            attempts: Arc::clone(&attempts),
        },
        MemoryServer {
            attempts_rx: Mutex::new(attempts_rx),
            attempts,
        },
    )
}

#[async_trait]
impl Connector for MemoryConnector {
    async fn connect(&self, url: &str) -> Result<Link, HubError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        let (decision, decided) = oneshot::channel();
        self.attempts_tx
            .send(Attempt {
                url: url.to_string(),
                decision,
            })
            .map_err(|_| HubError::Transport("Memory server is gone".into()))?;

        decided
            .await
            .map_err(|_| HubError::Transport("Connection attempt dropped".into()))?
    }
}

impl MemoryServer {
    /// Total connection attempts seen so far (accepted or not).
    pub fn attempts(&self) -> u64 {
        self.attempts.load(Ordering::SeqCst)
    }

    /// Wait for the next connection attempt and accept it.
    pub async fn accept(&self) -> Result<MemoryPeer, HubError> {
        let attempt = self.next_attempt().await?;

        let (to_client_tx, to_client_rx) = fmpsc::unbounded::<Vec<u8>>();
        let (to_server_tx, to_server_rx) = fmpsc::unbounded::<Vec<u8>>();

        let sink = to_server_tx.sink_map_err(|e| HubError::Transport(e.to_string()));
        let stream = to_client_rx.map(Ok::<Vec<u8>, HubError>);
        let link = Link::new(Box::pin(sink), Box::pin(stream));

        attempt
            .decision
            .send(Ok(link))
            .map_err(|_| HubError::Transport("Client gave up on the attempt".into()))?;

        Ok(MemoryPeer {
            url: attempt.url,
            outbound: to_client_tx,
            inbound: to_server_rx,
        })
    }

    /// Wait for the next connection attempt and refuse it.
    pub async fn refuse(&self, cause: &str) -> Result<(), HubError> {
        let attempt = self.next_attempt().await?;
        let _ = attempt
            .decision
            .send(Err(HubError::Transport(cause.to_string())));
        Ok(())
    }

    async fn next_attempt(&self) -> Result<Attempt, HubError> {
        self.attempts_rx
            .lock()
            .await
            .recv()
            .await
            .ok_or_else(|| HubError::Transport("Memory connector dropped".into()))
    }
}

/// The server's end of one accepted link. Dropping it closes the link.
pub struct MemoryPeer {
    url: String,
    outbound: fmpsc::UnboundedSender<Vec<u8>>,
    inbound: fmpsc::UnboundedReceiver<Vec<u8>>,
}

impl MemoryPeer {
    pub fn url(&self) -> &str {
        &self.url
    }

    /// Push raw bytes to the client.
    pub fn send_raw(&self, bytes: Vec<u8>) -> Result<(), HubError> {
        self.outbound
            .unbounded_send(bytes)
            .map_err(|e| HubError::Transport(e.to_string()))
    }

    /// Push a JSON frame to the client.
    pub fn send_json(&self, value: &Value) -> Result<(), HubError> {
        self.send_raw(serde_json::to_vec(value)?)
    }

    /// Next raw frame from the client, or None once the client side is gone.
    pub async fn recv_raw(&mut self) -> Option<Vec<u8>> {
        self.inbound.next().await
    }

    /// Next JSON frame from the client.
    pub async fn recv_json(&mut self) -> Option<Result<Value, HubError>> {
        let bytes = self.recv_raw().await?;
        Some(serde_json::from_slice(&bytes).map_err(HubError::from))
    }

    /// Close the link from the server side.
    pub fn close(self) {}
}
