//! Bounded TCP listener.
//!
//! # Responsibilities
//! - Bind to the configured address
//! - Hold back `accept` while `max_connections` connections are live
//! - Hand each accepted stream out with its `ConnectionGuard`
//!
//! # Design Decisions
//! - A slot is taken before the socket is accepted, so excess clients wait
//!   in the kernel backlog instead of holding a task
//! - The slot lives inside the guard; dropping the guard is the only release

use std::net::{AddrParseError, SocketAddr};
use std::sync::Arc;

use thiserror::Error;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::Semaphore;

use crate::config::ListenerConfig;
use crate::net::{ConnectionGuard, ConnectionTracker};

/// Error type for listener operations.
#[derive(Debug, Error)]
pub enum ListenerError {
    #[error("invalid bind address {address:?}: {source}")]
    Address {
        address: String,
        source: AddrParseError,
    },

    #[error("failed to bind: {0}")]
    Bind(#[source] std::io::Error),

    #[error("failed to accept: {0}")]
    Accept(#[source] std::io::Error),

    #[error("connection slots closed")]
    SlotsClosed,
}

/// A TCP listener that limits concurrent connections.
pub struct Listener {
    inner: TcpListener,
    slots: Arc<Semaphore>,
    tracker: ConnectionTracker,
}

impl Listener {
    /// Bind to the configured address with connection limits.
    pub async fn bind(config: &ListenerConfig) -> Result<Self, ListenerError> {
        let addr: SocketAddr =
            config
                .bind_address
                .parse()
                .map_err(|source| ListenerError::Address {
                    address: config.bind_address.clone(),
                    source,
                })?;

        let inner = TcpListener::bind(addr).await.map_err(ListenerError::Bind)?;
        let local_addr = inner.local_addr().map_err(ListenerError::Bind)?;

        tracing::info!(
            address = %local_addr,
            max_connections = config.max_connections,
            "Listener bound"
        );

        Ok(Self {
            inner,
            slots: Arc::new(Semaphore::new(config.max_connections)),
            tracker: ConnectionTracker::new(),
        })
    }

    /// Wait for a free slot, then accept the next connection.
    pub async fn accept(&self) -> Result<(TcpStream, SocketAddr, ConnectionGuard), ListenerError> {
        let slot = Arc::clone(&self.slots)
            .acquire_owned()
            .await
            .map_err(|_| ListenerError::SlotsClosed)?;

        let (stream, peer_addr) = self.inner.accept().await.map_err(ListenerError::Accept)?;
        let guard = self.tracker.track(slot);

        tracing::debug!(
            connection_id = %guard.id(),
            peer_addr = %peer_addr,
            active_connections = self.tracker.active_count(),
            "Connection accepted"
        );

        Ok((stream, peer_addr, guard))
    }

    /// Get the local address this listener is bound to.
    pub fn local_addr(&self) -> Result<SocketAddr, std::io::Error> {
        self.inner.local_addr()
    }

    /// Handle on the count of connections accepted and not yet dropped.
    pub fn tracker(&self) -> ConnectionTracker {
        self.tracker.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;

    #[tokio::test]
    async fn accept_waits_for_a_free_slot() {
        let config = ListenerConfig {
            bind_address: "127.0.0.1:0".into(),
            max_connections: 1,
        };
        let listener = Listener::bind(&config).await.unwrap();
        let addr = listener.local_addr().unwrap();
        let tracker = listener.tracker();

        let _first = TcpStream::connect(addr).await.unwrap();
        let _second = TcpStream::connect(addr).await.unwrap();

        let (_stream, _, guard) = listener.accept().await.unwrap();
        assert_eq!(tracker.active_count(), 1);

        let blocked = tokio::time::timeout(Duration::from_millis(100), listener.accept()).await;
        assert!(blocked.is_err(), "second accept must wait for the slot");

        drop(guard);
        assert_eq!(tracker.active_count(), 0);

        let (_stream, _, guard) = tokio::time::timeout(Duration::from_secs(5), listener.accept())
            .await
            .expect("slot released")
            .unwrap();
        assert_eq!(tracker.active_count(), 1);
        drop(guard);
    }

    #[tokio::test]
    async fn invalid_address_fails_to_bind() {
        let config = ListenerConfig {
            bind_address: "not-an-address".into(),
            max_connections: 1,
        };
        match Listener::bind(&config).await {
            Err(ListenerError::Address { address, .. }) => assert_eq!(address, "not-an-address"),
            other => panic!("unexpected bind result: {:?}", other.err()),
        }
    }
}
