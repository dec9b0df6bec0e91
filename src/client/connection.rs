//! Client-side connection driver.
//!
//! # Responsibilities
//! - Send the client preface and SETTINGS
//! - Issue one request at a time and wait for its terminal event
//! - Reassemble responses through a `StreamTable<ResponseHead>`
//! - Repeat generated payload posts on a fixed interval
//!
//! # Design Decisions
//! - No pipelining: a call returns only once its own stream has ended
//! - HTTP-level failures are values (`ReceivedResponse`), transport and
//!   protocol failures are `ClientError`

use std::time::Duration;

use bytes::Bytes;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::broadcast;

use crate::config::ClientConfig;
use crate::http::response::CONTENT_TYPE_JSON;
use crate::protocol::frame::error_code::NO_ERROR;
use crate::protocol::{Event, H2Engine, Header, ProtocolEngine, ProtocolError, StreamId};
use crate::stream::{ReceivedResponse, ResponseHead, StreamTable};
use crate::telemetry::{generate_payload, Payload, PayloadParams};

const READ_BUFFER_SIZE: usize = 65_535;

/// Errors that end a client request or the request loop.
#[derive(Debug, Error)]
pub enum ClientError {
    #[error("transport error: {0}")]
    Io(#[from] std::io::Error),

    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    #[error("connection closed before {0} completed")]
    ConnectionClosed(StreamId),

    #[error("{stream_id} reset by server (error code {error_code})")]
    StreamReset { stream_id: StreamId, error_code: u32 },

    #[error("server sent GOAWAY (error code {0})")]
    GoAway(u32),

    #[error("failed to serialize payload: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// Settings for the repeating request loop.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub path: String,
    pub interval: Duration,
    /// Stop after this many requests; `None` runs until shutdown.
    pub max_requests: Option<u64>,
    pub params: PayloadParams,
}

impl RunOptions {
    pub fn from_config(config: &ClientConfig) -> Self {
        Self {
            path: config.path.clone(),
            interval: Duration::from_millis(config.interval_ms),
            max_requests: None,
            params: PayloadParams {
                node_id: config.node_id.clone(),
                ..PayloadParams::default()
            },
        }
    }
}

/// An HTTP/2 client bound to one transport.
pub struct TelemetryClient<T> {
    io: T,
    engine: H2Engine,
    responses: StreamTable<ResponseHead>,
    authority: String,
    read_buffer: Vec<u8>,
}

impl TelemetryClient<TcpStream> {
    /// Open a TCP connection to `addr` and perform the handshake.
    pub async fn connect(addr: &str, authority: impl Into<String>) -> Result<Self, ClientError> {
        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true)?;
        tracing::debug!(server = %addr, "TCP connection established");
        Self::handshake(stream, authority).await
    }
}

impl<T> TelemetryClient<T>
where
    T: AsyncRead + AsyncWrite + Unpin,
{
    /// Write the client preface over an already connected transport.
    pub async fn handshake(mut io: T, authority: impl Into<String>) -> Result<Self, ClientError> {
        let mut engine = H2Engine::client();
        let hello = engine.initiate_connection();
        io.write_all(&hello).await?;
        io.flush().await?;

        Ok(Self {
            io,
            engine,
            responses: StreamTable::new(),
            authority: authority.into(),
            read_buffer: vec![0u8; READ_BUFFER_SIZE],
        })
    }

    pub async fn post_json(&mut self, path: &str, body: Bytes) -> Result<ReceivedResponse, ClientError> {
        self.send_request("POST", path, Some(body)).await
    }

    pub async fn post_payload(&mut self, path: &str, payload: &Payload) -> Result<ReceivedResponse, ClientError> {
        let body = serde_json::to_vec(payload)?;
        self.post_json(path, Bytes::from(body)).await
    }

    pub async fn get(&mut self, path: &str) -> Result<ReceivedResponse, ClientError> {
        self.send_request("GET", path, None).await
    }

    /// Send one request and wait for its complete response.
    pub async fn send_request(
        &mut self,
        method: &str,
        path: &str,
        body: Option<Bytes>,
    ) -> Result<ReceivedResponse, ClientError> {
        let stream_id = self.engine.next_stream_id()?;

        let mut headers = vec![
            Header::new(":method", method),
            Header::new(":scheme", "http"),
            Header::new(":authority", self.authority.as_str()),
            Header::new(":path", path),
        ];
        if let Some(body) = &body {
            headers.push(Header::new("content-type", CONTENT_TYPE_JSON));
            headers.push(Header::new("content-length", body.len().to_string()));
        }

        self.engine.send_headers(stream_id, &headers, body.is_none());
        if let Some(body) = &body {
            self.engine.send_data(stream_id, body, true);
        }
        self.flush().await?;
        tracing::debug!(%stream_id, method, path, "Request sent");

        loop {
            let n = self.io.read(&mut self.read_buffer).await?;
            if n == 0 {
                self.responses.clear();
                return Err(ClientError::ConnectionClosed(stream_id));
            }

            let events = self.engine.decode(&self.read_buffer[..n])?;
            let mut completed = None;
            for event in events {
                if let Some(response) = self.handle_event(stream_id, event)? {
                    completed = Some(response);
                }
            }
            self.flush().await?;

            if let Some(response) = completed {
                return Ok(response);
            }
        }
    }

    fn handle_event(
        &mut self,
        awaiting: StreamId,
        event: Event,
    ) -> Result<Option<ReceivedResponse>, ClientError> {
        match event {
            Event::ResponseStarted { stream_id, headers } => {
                if let Err(e) = self.responses.on_stream_started(stream_id, &headers) {
                    tracing::warn!(error = %e, "Dropping duplicate response headers");
                }
            }
            Event::DataReceived {
                stream_id,
                data,
                flow_controlled_length,
            } => {
                if let Err(e) = self.responses.on_data_received(
                    stream_id,
                    &data,
                    flow_controlled_length,
                    &mut self.engine,
                ) {
                    tracing::debug!(error = %e, "Dropping response chunk");
                }
            }
            Event::StreamEnded { stream_id } => match self.responses.on_stream_ended(stream_id) {
                Ok(response) if stream_id == awaiting => return Ok(Some(response)),
                Ok(_) => tracing::debug!(%stream_id, "Discarding response for a finished request"),
                Err(e) => tracing::debug!(error = %e, "End of unknown stream"),
            },
            Event::StreamReset { stream_id, error_code } => {
                self.responses.on_stream_reset(stream_id);
                if stream_id == awaiting {
                    return Err(ClientError::StreamReset { stream_id, error_code });
                }
            }
            Event::GoAway {
                last_stream_id,
                error_code,
            } => {
                if error_code != NO_ERROR || awaiting > last_stream_id {
                    return Err(ClientError::GoAway(error_code));
                }
                tracing::debug!(%last_stream_id, "Server is draining the connection");
            }
            Event::RequestStarted { stream_id, .. } => {
                tracing::warn!(%stream_id, "Ignoring request headers from server");
            }
        }
        Ok(None)
    }

    async fn flush(&mut self) -> Result<(), ClientError> {
        let out = self.engine.bytes_to_send();
        if !out.is_empty() {
            self.io.write_all(&out).await?;
            self.io.flush().await?;
        }
        Ok(())
    }

    /// Post generated payloads until `max_requests` or `shutdown`.
    ///
    /// Shutdown also abandons a request still waiting for its response;
    /// the connection should then be closed rather than reused.
    /// Returns the number of requests that received a response.
    pub async fn run(
        &mut self,
        options: &RunOptions,
        shutdown: &mut broadcast::Receiver<()>,
    ) -> Result<u64, ClientError> {
        let mut sent = 0u64;

        while options.max_requests.map_or(true, |max| sent < max) {
            let payload = generate_payload(&options.params);
            let response = tokio::select! {
                response = self.post_payload(&options.path, &payload) => response?,
                _ = shutdown.recv() => {
                    tracing::info!(sent, message_id = %payload.message_id, "Shutdown requested, abandoning request in flight");
                    break;
                }
            };
            sent += 1;

            let body = String::from_utf8_lossy(&response.body);
            match response.status() {
                Some(200) => tracing::info!(
                    message_id = %payload.message_id,
                    status = 200,
                    body = %body,
                    "Telemetry delivered"
                ),
                status => tracing::warn!(
                    message_id = %payload.message_id,
                    status = ?status,
                    body = %body,
                    "Telemetry rejected"
                ),
            }

            if options.max_requests == Some(sent) {
                break;
            }

            tokio::select! {
                _ = tokio::time::sleep(options.interval) => {}
                _ = shutdown.recv() => {
                    tracing::info!(sent, "Shutdown requested, stopping request loop");
                    break;
                }
            }
        }

        Ok(sent)
    }

    /// Announce a clean close and shut the transport down.
    pub async fn close(mut self) -> Result<(), ClientError> {
        self.engine.send_goaway(NO_ERROR);
        self.flush().await?;
        self.io.shutdown().await?;
        Ok(())
    }
}
