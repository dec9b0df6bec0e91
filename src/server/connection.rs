//! Server-side connection driver.
//!
//! # Responsibilities
//! - Send the handshake and drive the read → decode → dispatch → write cycle
//! - Route every decoded event to the connection's stream table
//! - Dispatch completed requests and queue their encoded responses
//! - Close on EOF or on a fatal decode error, dropping unfinished streams
//!
//! # Design Decisions
//! - Suspension only at transport read and write; everything between is sync
//! - The stream table is owned by the connection task, so it needs no lock
//! - One write per read batch: responses and acknowledgements share a flush

use std::sync::Arc;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::config::ConnectionConfig;
use crate::http::{Dispatcher, ResponseEncoder};
use crate::net::{ConnectionId, ConnectionState};
use crate::observability::metrics;
use crate::protocol::{Event, H2Engine, ProtocolEngine, ProtocolError};
use crate::stream::{Request, RequestHead, StreamTable};

/// Reasons a connection task ends abnormally.
#[derive(Debug, Error)]
pub enum ConnectionError {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),
}

/// State of one server connection, independent of the transport.
pub struct ServerConnection<E> {
    id: ConnectionId,
    engine: E,
    streams: StreamTable<RequestHead>,
    dispatcher: Arc<Dispatcher>,
    state: ConnectionState,
}

impl<E: ProtocolEngine> ServerConnection<E> {
    pub fn new(id: ConnectionId, engine: E, dispatcher: Arc<Dispatcher>) -> Self {
        Self {
            id,
            engine,
            streams: StreamTable::new(),
            dispatcher,
            state: ConnectionState::Connecting,
        }
    }

    pub fn state(&self) -> ConnectionState {
        self.state
    }

    pub fn streams(&self) -> &StreamTable<RequestHead> {
        &self.streams
    }

    pub fn engine_mut(&mut self) -> &mut E {
        &mut self.engine
    }

    /// Bytes that must reach the peer before anything else.
    pub fn handshake(&mut self) -> Bytes {
        self.engine.initiate_connection()
    }

    /// Mark the handshake as flushed.
    pub fn establish(&mut self) {
        self.state = ConnectionState::Established;
        tracing::debug!(connection_id = %self.id, "Connection established");
    }

    /// Process one inbound read and return the bytes to write back.
    ///
    /// A decode error closes the connection; the engine's GOAWAY is left
    /// queued for a best-effort final write.
    pub fn receive(&mut self, data: &[u8]) -> Result<Bytes, ProtocolError> {
        let events = match self.engine.decode(data) {
            Ok(events) => events,
            Err(e) => {
                self.close();
                return Err(e);
            }
        };
        for event in events {
            self.handle_event(event);
        }
        Ok(self.engine.bytes_to_send())
    }

    /// Route a single event. Never fails; stream-level problems are logged.
    pub fn handle_event(&mut self, event: Event) {
        match event {
            Event::RequestStarted { stream_id, headers } => {
                if let Err(e) = self.streams.on_stream_started(stream_id, &headers) {
                    tracing::warn!(connection_id = %self.id, error = %e, "Dropping duplicate request headers");
                }
            }
            Event::DataReceived {
                stream_id,
                data,
                flow_controlled_length,
            } => {
                if let Err(e) = self.streams.on_data_received(
                    stream_id,
                    &data,
                    flow_controlled_length,
                    &mut self.engine,
                ) {
                    tracing::debug!(connection_id = %self.id, error = %e, len = data.len(), "Dropping data chunk");
                }
            }
            Event::StreamEnded { stream_id } => match self.streams.on_stream_ended(stream_id) {
                Ok(request) => self.respond(request),
                Err(e) => {
                    tracing::debug!(connection_id = %self.id, error = %e, "Ignoring end of stream");
                }
            },
            Event::StreamReset { stream_id, error_code } => {
                let dropped = self.streams.on_stream_reset(stream_id);
                tracing::debug!(connection_id = %self.id, %stream_id, error_code, dropped, "Stream reset by peer");
            }
            Event::GoAway { last_stream_id, error_code } => {
                tracing::debug!(connection_id = %self.id, %last_stream_id, error_code, "Peer sent GOAWAY");
            }
            Event::ResponseStarted { stream_id, .. } => {
                tracing::warn!(connection_id = %self.id, %stream_id, "Ignoring response headers from client");
            }
        }
    }

    fn respond(&mut self, request: Request) {
        let reply = self.dispatcher.dispatch_request(&request);
        tracing::debug!(
            connection_id = %self.id,
            stream_id = %request.stream_id,
            method = %request.method(),
            path = %request.path(),
            status = reply.status.as_u16(),
            "Request dispatched"
        );
        ResponseEncoder::encode(request.stream_id, &reply).queue(&mut self.engine);
    }

    /// Transition to `Closed`, discarding unfinished streams.
    pub fn close(&mut self) -> usize {
        self.state = ConnectionState::Closed;
        self.streams.clear()
    }
}

/// Drive one accepted connection until the peer closes it.
///
/// EOF is a normal closure. Unfinished streams are discarded without
/// further engine calls.
pub async fn serve_connection<T>(
    mut io: T,
    dispatcher: Arc<Dispatcher>,
    config: &ConnectionConfig,
    id: ConnectionId,
) -> Result<(), ConnectionError>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    let mut conn = ServerConnection::new(id, H2Engine::server(), dispatcher);

    let hello = conn.handshake();
    io.write_all(&hello).await?;
    io.flush().await?;
    conn.establish();

    let mut buf = vec![0u8; config.read_buffer_size];
    loop {
        let n = io.read(&mut buf).await?;
        if n == 0 {
            let dropped = conn.close();
            tracing::debug!(connection_id = %id, unfinished_streams = dropped, "Peer closed connection");
            return Ok(());
        }

        match conn.receive(&buf[..n]) {
            Ok(out) => {
                if !out.is_empty() {
                    io.write_all(&out).await?;
                    io.flush().await?;
                }
            }
            Err(e) => {
                metrics::record_protocol_error();
                let goaway = conn.engine_mut().bytes_to_send();
                let _ = io.write_all(&goaway).await;
                let _ = io.shutdown().await;
                return Err(e.into());
            }
        }
    }
}
