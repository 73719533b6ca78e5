//! Connection management.

use crate::error::ClientError;
use bytes::Bytes;
use kwire_protocol::{Frame, FrameDecoder, Request};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicI32, Ordering};
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::Mutex;

/// Default read buffer size (8 KiB).
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8 * 1024;

/// Minimum read buffer size (1 KiB).
pub const MIN_READ_BUFFER_SIZE: usize = 1024;

/// Maximum read buffer size (1 MiB).
pub const MAX_READ_BUFFER_SIZE: usize = 1024 * 1024;

/// Connection configuration.
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Server address.
    pub addr: SocketAddr,
    /// Connection timeout.
    pub connect_timeout: Duration,
    /// Request timeout.
    pub request_timeout: Duration,
    /// Client id sent in request headers.
    pub client_id: Option<String>,
    /// Read buffer size for socket reads.
    pub read_buffer_size: usize,
}

impl ConnectionConfig {
    pub fn new(addr: SocketAddr) -> Self {
        Self {
            addr,
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            client_id: None,
            read_buffer_size: DEFAULT_READ_BUFFER_SIZE,
        }
    }

    pub fn with_client_id(mut self, client_id: impl Into<String>) -> Self {
        self.client_id = Some(client_id.into());
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_request_timeout(mut self, timeout: Duration) -> Self {
        self.request_timeout = timeout;
        self
    }

    pub fn with_read_buffer_size(mut self, size: usize) -> Self {
        self.read_buffer_size = size.clamp(MIN_READ_BUFFER_SIZE, MAX_READ_BUFFER_SIZE);
        self
    }
}

/// What the server sent back for one request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RawReply {
    /// A length-prefixed response payload.
    Frame(Bytes),
    /// Bytes written without framing before the server closed.
    Unframed(Bytes),
    /// The server closed without writing anything.
    Closed,
}

impl RawReply {
    /// Returns whether the server closed the connection after this reply.
    pub fn closes_connection(&self) -> bool {
        !matches!(self, RawReply::Frame(_))
    }
}

struct Transport {
    stream: TcpStream,
    decoder: FrameDecoder,
}

/// A connection to a kwire server.
///
/// Requests are strictly sequential: each one holds the transport until its
/// reply has been read.
pub struct Connection {
    config: ConnectionConfig,
    transport: Mutex<Option<Transport>>,
    next_correlation_id: AtomicI32,
    connected: AtomicBool,
}

impl Connection {
    /// Creates a new connection (not yet connected).
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            config,
            transport: Mutex::new(None),
            next_correlation_id: AtomicI32::new(1),
            connected: AtomicBool::new(false),
        }
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// Connects to the server.
    pub async fn connect(&self) -> Result<(), ClientError> {
        tracing::debug!("Connecting to {}...", self.config.addr);

        let stream = tokio::time::timeout(
            self.config.connect_timeout,
            TcpStream::connect(self.config.addr),
        )
        .await
        .map_err(|_| {
            tracing::debug!("Connection timeout");
            ClientError::Timeout
        })?
        .map_err(|e| {
            tracing::debug!("Connection failed: {}", e);
            ClientError::Io(e)
        })?;

        stream.set_nodelay(true).ok();

        *self.transport.lock().await = Some(Transport {
            stream,
            decoder: FrameDecoder::new(),
        });
        self.connected.store(true, Ordering::SeqCst);
        tracing::debug!("Connected to {}", self.config.addr);

        Ok(())
    }

    /// Allocates the next correlation id.
    pub fn next_correlation_id(&self) -> i32 {
        self.next_correlation_id.fetch_add(1, Ordering::SeqCst)
    }

    /// Sends a request and waits for whatever the server sends back.
    pub async fn request(&self, request: &Request) -> Result<RawReply, ClientError> {
        if !self.connected.load(Ordering::SeqCst) {
            return Err(ClientError::NotConnected);
        }

        let encoded = Frame::new(request.encode()?.freeze()).encode()?;

        let mut guard = self.transport.lock().await;
        let transport = guard.as_mut().ok_or(ClientError::NotConnected)?;

        tracing::debug!(
            "Sending request api_key={} correlation_id={} ({} bytes)",
            request.api_key,
            request.correlation_id,
            encoded.len()
        );

        let result = self.exchange(transport, &encoded).await;

        // A failed exchange can leave half a reply buffered; never reuse it.
        let reply_closes = result.as_ref().map_or(true, RawReply::closes_connection);
        if reply_closes {
            match &result {
                Ok(_) => tracing::debug!("Server closed the connection"),
                Err(e) => tracing::debug!(
                    "Request correlation_id={} failed: {}",
                    request.correlation_id,
                    e
                ),
            }
            self.connected.store(false, Ordering::SeqCst);
            *guard = None;
        }

        result
    }

    async fn exchange(
        &self,
        transport: &mut Transport,
        encoded: &[u8],
    ) -> Result<RawReply, ClientError> {
        transport.stream.write_all(encoded).await?;

        tokio::time::timeout(
            self.config.request_timeout,
            Self::read_reply(transport, self.config.read_buffer_size),
        )
        .await
        .map_err(|_| ClientError::Timeout)?
    }

    /// Reads one frame, or everything up to EOF when the bytes are not a frame.
    async fn read_reply(
        transport: &mut Transport,
        buffer_size: usize,
    ) -> Result<RawReply, ClientError> {
        let mut buf = vec![0u8; buffer_size];
        let mut unframed = false;

        loop {
            if !unframed {
                match transport.decoder.decode_frame() {
                    Ok(Some(frame)) => return Ok(RawReply::Frame(frame.payload)),
                    Ok(None) => {}
                    Err(e) => {
                        tracing::debug!("Reply is not a frame ({}), reading to EOF", e);
                        unframed = true;
                    }
                }
            }

            let n = transport.stream.read(&mut buf).await?;
            if n == 0 {
                return Ok(if transport.decoder.buffered() == 0 {
                    RawReply::Closed
                } else {
                    RawReply::Unframed(transport.decoder.take_buffered())
                });
            }
            transport.decoder.extend(&buf[..n]);
        }
    }

    /// Returns whether the connection is established.
    pub fn is_connected(&self) -> bool {
        self.connected.load(Ordering::SeqCst)
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.connected.store(false, Ordering::SeqCst);
        if let Some(mut transport) = self.transport.lock().await.take() {
            tracing::debug!("Shutting down connection to {}", self.config.addr);
            let _ = transport.stream.shutdown().await;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[test]
    fn test_config_defaults() {
        let config = ConnectionConfig::new("127.0.0.1:9092".parse().unwrap());
        assert_eq!(config.read_buffer_size, DEFAULT_READ_BUFFER_SIZE);
        assert_eq!(config.connect_timeout, Duration::from_secs(10));
        assert_eq!(config.request_timeout, Duration::from_secs(30));
        assert!(config.client_id.is_none());
    }

    #[test]
    fn test_config_buffer_clamping() {
        let config =
            ConnectionConfig::new("127.0.0.1:9092".parse().unwrap()).with_read_buffer_size(100); // Below minimum
        assert_eq!(config.read_buffer_size, MIN_READ_BUFFER_SIZE);

        let config = ConnectionConfig::new("127.0.0.1:9092".parse().unwrap())
            .with_read_buffer_size(10 * 1024 * 1024); // Above maximum
        assert_eq!(config.read_buffer_size, MAX_READ_BUFFER_SIZE);
    }

    #[test]
    fn test_correlation_ids_increase() {
        let conn = Connection::new(ConnectionConfig::new("127.0.0.1:9092".parse().unwrap()));
        let a = conn.next_correlation_id();
        let b = conn.next_correlation_id();
        assert_eq!(b, a + 1);
    }

    #[tokio::test]
    async fn test_request_requires_connection() {
        let conn = Connection::new(ConnectionConfig::new("127.0.0.1:9092".parse().unwrap()));
        let result = conn.request(&Request::new(18, 4, 1)).await;
        assert!(matches!(result, Err(ClientError::NotConnected)));
    }

    /// Accepts one connection, reads one request frame, writes `reply`, and
    /// closes when `close` is set.
    async fn scripted_server(reply: &'static [u8], close: bool) -> SocketAddr {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut prefix = [0u8; 4];
            stream.read_exact(&mut prefix).await.unwrap();
            let mut payload = vec![0u8; i32::from_be_bytes(prefix) as usize];
            stream.read_exact(&mut payload).await.unwrap();
            stream.write_all(reply).await.unwrap();
            if close {
                stream.shutdown().await.unwrap();
            } else {
                // Hold the socket open until the client goes away.
                let mut rest = Vec::new();
                let _ = stream.read_to_end(&mut rest).await;
            }
        });
        addr
    }

    #[tokio::test]
    async fn test_frame_reply() {
        let addr = scripted_server(&[0, 0, 0, 3, b'a', b'b', b'c'], false).await;
        let conn = Connection::new(ConnectionConfig::new(addr));
        conn.connect().await.unwrap();

        let reply = conn.request(&Request::new(18, 4, 1)).await.unwrap();
        assert_eq!(reply, RawReply::Frame(Bytes::from_static(b"abc")));
        assert!(conn.is_connected());
        conn.close().await.unwrap();
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_unframed_reply() {
        let addr = scripted_server(b"Unknown API response type", true).await;
        let conn = Connection::new(ConnectionConfig::new(addr));
        conn.connect().await.unwrap();

        let reply = conn.request(&Request::new(999, 0, 1)).await.unwrap();
        assert_eq!(
            reply,
            RawReply::Unframed(Bytes::from_static(b"Unknown API response type"))
        );
        assert!(!conn.is_connected());
    }

    #[tokio::test]
    async fn test_closed_without_reply() {
        let addr = scripted_server(b"", true).await;
        let conn = Connection::new(ConnectionConfig::new(addr));
        conn.connect().await.unwrap();

        let reply = conn.request(&Request::new(18, 4, 1)).await.unwrap();
        assert_eq!(reply, RawReply::Closed);
        assert!(matches!(
            conn.request(&Request::new(18, 4, 2)).await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_request_timeout() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut rest = Vec::new();
            let _ = stream.read_to_end(&mut rest).await;
        });

        let conn = Connection::new(
            ConnectionConfig::new(addr).with_request_timeout(Duration::from_millis(50)),
        );
        conn.connect().await.unwrap();
        let result = conn.request(&Request::new(18, 4, 1)).await;
        assert!(matches!(result, Err(ClientError::Timeout)));

        // The late reply must not be read by the next request.
        assert!(!conn.is_connected());
        assert!(matches!(
            conn.request(&Request::new(18, 4, 2)).await,
            Err(ClientError::NotConnected)
        ));
    }

    #[tokio::test]
    async fn test_partial_frame_then_timeout_drops_transport() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            let (mut stream, _) = listener.accept().await.unwrap();
            let mut prefix = [0u8; 4];
            stream.read_exact(&mut prefix).await.unwrap();
            let mut payload = vec![0u8; i32::from_be_bytes(prefix) as usize];
            stream.read_exact(&mut payload).await.unwrap();
            // Half of a 7-byte frame, then stall.
            stream.write_all(&[0, 0, 0, 7, 0, 0]).await.unwrap();
            let mut rest = Vec::new();
            let _ = stream.read_to_end(&mut rest).await;
        });

        let conn = Connection::new(
            ConnectionConfig::new(addr).with_request_timeout(Duration::from_millis(50)),
        );
        conn.connect().await.unwrap();
        let result = conn.request(&Request::new(18, 4, 1)).await;
        assert!(matches!(result, Err(ClientError::Timeout)));
        assert!(!conn.is_connected());
        assert!(conn.transport.lock().await.is_none());
    }
}
