//! Per-connection request loop.
//!
//! Each connection reads one frame at a time, answers it, and only then
//! reads the next one. A connection moves through these states:
//!
//! ```text
//! AwaitLength --4 bytes--> AwaitPayload --length bytes--> Process
//!      ^                                                     |
//!      +------------------ response written -----------------+
//!                                                            |
//!           EOF / bad length / short read / error -----> Closed
//! ```

use crate::config::ErrorReplyMode;
use crate::error::ServerError;
use crate::handler::{Dispatch, RequestHandler};
use crate::server::ServerStats;
use crate::session::Session;
use bytes::Bytes;
use kwire_protocol::{
    ErrorCode, ErrorResponse, Frame, ProtocolError, Request, Response, LENGTH_PREFIX_SIZE,
    MAX_FRAME_SIZE,
};
use std::net::SocketAddr;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Initial payload buffer size; larger frames grow as their bytes arrive.
const INITIAL_PAYLOAD_CAPACITY: usize = 8 * 1024;

/// Plain-text notice written for an unsupported API key in legacy mode.
pub const UNSUPPORTED_API_NOTICE: &str = "Unknown API response type";

/// Per-connection limits and reply behavior.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionOptions {
    pub max_frame_bytes: usize,
    pub error_replies: ErrorReplyMode,
}

impl Default for ConnectionOptions {
    fn default() -> Self {
        Self {
            max_frame_bytes: MAX_FRAME_SIZE,
            error_replies: ErrorReplyMode::Legacy,
        }
    }
}

/// Where a connection is in its read/answer cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectionState {
    AwaitLength,
    AwaitPayload { length: usize },
    Process { payload: Bytes },
    Closed,
}

/// A single client connection.
pub struct Connection<S> {
    stream: S,
    session: Session,
    handler: Arc<RequestHandler>,
    stats: Arc<ServerStats>,
    options: ConnectionOptions,
    state: ConnectionState,
}

impl<S> Connection<S>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    pub fn new(
        stream: S,
        remote_addr: SocketAddr,
        handler: Arc<RequestHandler>,
        stats: Arc<ServerStats>,
        options: ConnectionOptions,
    ) -> Self {
        Self {
            stream,
            session: Session::new(remote_addr),
            handler,
            stats,
            options,
            state: ConnectionState::AwaitLength,
        }
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn state(&self) -> &ConnectionState {
        &self.state
    }

    /// Serves requests until the peer disconnects or the connection fails.
    ///
    /// A clean disconnect between frames, and a connection closed after an
    /// unsupported request, return `Ok`. Framing and decode failures return
    /// the error after any reply has been written.
    pub async fn run(&mut self) -> Result<(), ServerError> {
        tracing::info!(
            "[{}] Client connected (session={})",
            self.session.remote_addr,
            self.session.id
        );

        loop {
            let step = match std::mem::replace(&mut self.state, ConnectionState::Closed) {
                ConnectionState::AwaitLength => self.read_length().await,
                ConnectionState::AwaitPayload { length } => self.read_payload(length).await,
                ConnectionState::Process { payload } => self.process(payload).await,
                ConnectionState::Closed => {
                    self.close().await;
                    return Ok(());
                }
            };

            match step {
                Ok(next) => self.state = next,
                Err(e) => {
                    self.close().await;
                    return Err(e);
                }
            }
        }
    }

    async fn read_length(&mut self) -> Result<ConnectionState, ServerError> {
        let mut prefix = [0u8; LENGTH_PREFIX_SIZE];
        let filled = read_full(&mut self.stream, &mut prefix).await?;

        if filled == 0 {
            tracing::debug!("[{}] Connection closed by client", self.session.remote_addr);
            return Ok(ConnectionState::Closed);
        }
        if filled < LENGTH_PREFIX_SIZE {
            return Err(ProtocolError::TruncatedInput {
                needed: LENGTH_PREFIX_SIZE,
                remaining: filled,
            }
            .into());
        }

        let length = Frame::parse_length(prefix, self.options.max_frame_bytes)?;
        Ok(ConnectionState::AwaitPayload { length })
    }

    async fn read_payload(&mut self, length: usize) -> Result<ConnectionState, ServerError> {
        let payload = read_up_to(&mut self.stream, length).await?;
        if payload.len() < length {
            return Err(ProtocolError::TruncatedInput {
                needed: length,
                remaining: payload.len(),
            }
            .into());
        }

        tracing::debug!(
            "[{}] Received frame: {} bytes",
            self.session.remote_addr,
            length
        );
        Ok(ConnectionState::Process {
            payload: Bytes::from(payload),
        })
    }

    async fn process(&mut self, payload: Bytes) -> Result<ConnectionState, ServerError> {
        let addr = self.session.remote_addr;

        let request = match Request::decode(payload.clone()) {
            Ok(request) => request,
            Err(e) => {
                tracing::warn!("[{}] Failed to decode request: {}", addr, e);
                self.reply_decode_error(&payload, &e).await?;
                return Err(e.into());
            }
        };

        self.session.record_request(&request);
        self.stats.requests_total.fetch_add(1, Ordering::Relaxed);
        tracing::debug!(
            "[{}] Request: api_key={} api_version={} correlation_id={} client_id={:?}",
            addr,
            request.api_key,
            request.api_version,
            request.correlation_id,
            request.client_id
        );

        match self.handler.dispatch(&request) {
            Dispatch::Respond(response) => {
                self.write_response(request.correlation_id, &response).await?;
                tracing::debug!(
                    "[{}] Response: {} error_code={} (correlation_id={})",
                    addr,
                    response.name(),
                    response.error_code(),
                    request.correlation_id
                );
                Ok(ConnectionState::AwaitLength)
            }
            Dispatch::Unsupported { api_key } => {
                tracing::warn!(
                    "[{}] Unsupported API key {} (correlation_id={}), closing",
                    addr,
                    api_key,
                    request.correlation_id
                );
                self.reply_unsupported(request.correlation_id).await?;
                Ok(ConnectionState::Closed)
            }
        }
    }

    async fn reply_decode_error(
        &mut self,
        payload: &[u8],
        error: &ProtocolError,
    ) -> Result<(), ServerError> {
        match self.options.error_replies {
            ErrorReplyMode::Legacy => self.write_raw(error.to_string().as_bytes()).await,
            ErrorReplyMode::Framed => match Request::peek_correlation_id(payload) {
                Some(correlation_id) => {
                    let response =
                        Response::Error(ErrorResponse::new(ErrorCode::CorruptMessage));
                    self.write_response(correlation_id, &response).await
                }
                None => Ok(()),
            },
        }
    }

    async fn reply_unsupported(&mut self, correlation_id: i32) -> Result<(), ServerError> {
        match self.options.error_replies {
            ErrorReplyMode::Legacy => self.write_raw(UNSUPPORTED_API_NOTICE.as_bytes()).await,
            ErrorReplyMode::Framed => {
                let response = Response::Error(ErrorResponse::new(ErrorCode::InvalidRequest));
                self.write_response(correlation_id, &response).await
            }
        }
    }

    async fn write_response(
        &mut self,
        correlation_id: i32,
        response: &Response,
    ) -> Result<(), ServerError> {
        let frame = Frame::new(response.encode(correlation_id).freeze()).encode()?;
        self.write_raw(&frame).await
    }

    async fn write_raw(&mut self, bytes: &[u8]) -> Result<(), ServerError> {
        self.stream.write_all(bytes).await?;
        self.stream.flush().await?;
        Ok(())
    }

    async fn close(&mut self) {
        self.state = ConnectionState::Closed;
        if let Err(e) = self.stream.shutdown().await {
            tracing::debug!("[{}] Shutdown error: {}", self.session.remote_addr, e);
        }
    }
}

/// Reads until `buf` is full or the stream ends, returning the bytes read.
async fn read_full<R>(reader: &mut R, buf: &mut [u8]) -> std::io::Result<usize>
where
    R: AsyncRead + Unpin,
{
    let mut filled = 0;
    while filled < buf.len() {
        match reader.read(&mut buf[filled..]).await? {
            0 => break,
            n => filled += n,
        }
    }
    Ok(filled)
}

/// Reads up to `length` bytes, stopping early at end of stream.
///
/// The buffer grows with the bytes actually received, so a large declared
/// length costs nothing until the peer sends the data.
async fn read_up_to<R>(reader: &mut R, length: usize) -> std::io::Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut payload = Vec::with_capacity(length.min(INITIAL_PAYLOAD_CAPACITY));
    reader.take(length as u64).read_to_end(&mut payload).await?;
    Ok(payload)
}
