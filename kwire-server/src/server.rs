//! TCP server implementation.

use crate::config::{ErrorReplyMode, NetworkConfig};
use crate::connection::{Connection, ConnectionOptions};
use crate::error::ServerError;
use crate::handler::{RequestHandler, SupportedApis};
use crate::metrics::Metrics;
use kwire_protocol::{DEFAULT_PORT, MAX_FRAME_SIZE};
use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tokio::net::TcpListener;
use tokio::sync::broadcast;

/// Server configuration.
#[derive(Clone)]
pub struct ServerConfig {
    /// Address to bind to.
    pub bind_addr: SocketAddr,
    /// Maximum concurrent connections.
    pub max_connections: usize,
    /// Largest accepted request payload in bytes.
    pub max_frame_bytes: usize,
    /// Reply style for undecodable or unsupported requests.
    pub error_replies: ErrorReplyMode,
    /// Metrics instance (if metrics are enabled).
    pub metrics: Option<Arc<Metrics>>,
}

impl std::fmt::Debug for ServerConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServerConfig")
            .field("bind_addr", &self.bind_addr)
            .field("max_connections", &self.max_connections)
            .field("max_frame_bytes", &self.max_frame_bytes)
            .field("error_replies", &self.error_replies)
            .field("metrics_enabled", &self.metrics.is_some())
            .finish()
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], DEFAULT_PORT)),
            max_connections: 1000,
            max_frame_bytes: MAX_FRAME_SIZE,
            error_replies: ErrorReplyMode::Legacy,
            metrics: None,
        }
    }
}

impl From<&NetworkConfig> for ServerConfig {
    fn from(network: &NetworkConfig) -> Self {
        Self {
            bind_addr: network.bind_addr,
            max_connections: network.max_connections,
            max_frame_bytes: network.max_frame_bytes,
            error_replies: network.error_replies,
            metrics: None,
        }
    }
}

impl ServerConfig {
    pub fn new(bind_addr: SocketAddr) -> Self {
        Self {
            bind_addr,
            ..Default::default()
        }
    }

    /// Sets the metrics instance.
    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Sets how undecodable and unsupported requests are answered.
    pub fn with_error_replies(mut self, mode: ErrorReplyMode) -> Self {
        self.error_replies = mode;
        self
    }

    /// Sets the largest accepted request payload.
    pub fn with_max_frame_bytes(mut self, max: usize) -> Self {
        self.max_frame_bytes = max;
        self
    }

    /// Sets the concurrent connection limit.
    pub fn with_max_connections(mut self, max: usize) -> Self {
        self.max_connections = max;
        self
    }

    /// Returns whether metrics are enabled.
    pub fn metrics_enabled(&self) -> bool {
        self.metrics.is_some()
    }

    fn connection_options(&self) -> ConnectionOptions {
        ConnectionOptions {
            max_frame_bytes: self.max_frame_bytes,
            error_replies: self.error_replies,
        }
    }
}

/// Server statistics.
#[derive(Debug, Default)]
pub struct ServerStats {
    pub connections_total: AtomicU64,
    pub connections_active: AtomicU64,
    pub connections_rejected: AtomicU64,
    pub requests_total: AtomicU64,
    pub errors_total: AtomicU64,
}

/// TCP server for kwire.
pub struct Server {
    config: ServerConfig,
    handler: Arc<RequestHandler>,
    stats: Arc<ServerStats>,
    shutdown: broadcast::Sender<()>,
    running: AtomicBool,
}

impl Server {
    /// Creates a new server.
    pub fn new(config: ServerConfig) -> Self {
        let (shutdown_tx, _) = broadcast::channel(1);
        let mut handler = RequestHandler::new(Arc::new(SupportedApis::default()));
        if let Some(ref metrics) = config.metrics {
            handler = handler.with_metrics(metrics.clone());
        }
        Self {
            config,
            handler: Arc::new(handler),
            stats: Arc::new(ServerStats::default()),
            shutdown: shutdown_tx,
            running: AtomicBool::new(false),
        }
    }

    /// Binds the configured address and runs the server.
    pub async fn run(&self) -> Result<(), ServerError> {
        let listener = TcpListener::bind(self.config.bind_addr).await?;
        self.serve(listener).await
    }

    /// Runs the accept loop on an already bound listener.
    pub async fn serve(&self, listener: TcpListener) -> Result<(), ServerError> {
        let mut shutdown_rx = self.shutdown.subscribe();
        self.running.store(true, Ordering::SeqCst);
        tracing::info!("Server listening on {}", listener.local_addr()?);

        loop {
            tokio::select! {
                result = listener.accept() => {
                    match result {
                        Ok((tcp_stream, addr)) => {
                            if self.stats.connections_active.load(Ordering::Relaxed)
                                >= self.config.max_connections as u64
                            {
                                tracing::warn!("Connection limit reached, rejecting {}", addr);
                                self.stats.connections_rejected.fetch_add(1, Ordering::Relaxed);
                                continue;
                            }

                            if let Err(e) = tcp_stream.set_nodelay(true) {
                                tracing::debug!("[{}] Failed to set TCP_NODELAY: {}", addr, e);
                            }

                            self.stats.connections_total.fetch_add(1, Ordering::Relaxed);
                            self.stats.connections_active.fetch_add(1, Ordering::Relaxed);

                            if let Some(ref metrics) = self.config.metrics {
                                metrics.connections_total.inc();
                                metrics.connections_active.inc();
                            }

                            let handler = self.handler.clone();
                            let stats = self.stats.clone();
                            let config = self.config.clone();
                            let mut conn_shutdown = self.shutdown.subscribe();

                            tokio::spawn(async move {
                                let mut connection = Connection::new(
                                    tcp_stream,
                                    addr,
                                    handler,
                                    stats.clone(),
                                    config.connection_options(),
                                );

                                let result = tokio::select! {
                                    result = connection.run() => result,
                                    _ = conn_shutdown.recv() => {
                                        tracing::debug!("[{}] Shutdown signal received", addr);
                                        Err(ServerError::ShuttingDown)
                                    }
                                };

                                match result {
                                    Ok(()) => {}
                                    Err(ServerError::ShuttingDown) => {}
                                    Err(e) => {
                                        tracing::error!("[{}] Connection error: {}", addr, e);
                                        stats.errors_total.fetch_add(1, Ordering::Relaxed);
                                        if let Some(ref metrics) = config.metrics {
                                            metrics
                                                .errors_total
                                                .with_label_values(&[e.kind()])
                                                .inc();
                                        }
                                    }
                                }

                                stats.connections_active.fetch_sub(1, Ordering::Relaxed);
                                if let Some(ref metrics) = config.metrics {
                                    metrics.connections_active.dec();
                                }

                                tracing::info!("Client disconnected: {}", addr);
                            });
                        }
                        Err(e) => {
                            tracing::error!("Accept error: {}", e);
                        }
                    }
                }
                _ = shutdown_rx.recv() => {
                    tracing::info!("Server shutting down");
                    break;
                }
            }
        }

        self.running.store(false, Ordering::SeqCst);
        Ok(())
    }

    /// Initiates server shutdown.
    pub fn shutdown(&self) {
        let _ = self.shutdown.send(());
    }

    /// Returns a receiver that fires when the server shuts down.
    pub fn subscribe_shutdown(&self) -> broadcast::Receiver<()> {
        self.shutdown.subscribe()
    }

    /// Returns whether the server is running.
    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Returns server statistics.
    pub fn stats(&self) -> &ServerStats {
        &self.stats
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::UNSUPPORTED_API_NOTICE;
    use bytes::Bytes;
    use kwire_protocol::{ApiVersion, ApiVersionsResponse, Frame, Request};
    use std::time::Duration;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;
    use tokio::task::JoinHandle;

    async fn start_server(config: ServerConfig) -> (Arc<Server>, SocketAddr, JoinHandle<()>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let server = Arc::new(Server::new(config));
        let running = server.clone();
        let handle = tokio::spawn(async move {
            running.serve(listener).await.unwrap();
        });
        (server, addr, handle)
    }

    async fn read_frame(stream: &mut TcpStream) -> Bytes {
        let mut prefix = [0u8; 4];
        stream.read_exact(&mut prefix).await.unwrap();
        let mut payload = vec![0u8; i32::from_be_bytes(prefix) as usize];
        stream.read_exact(&mut payload).await.unwrap();
        Bytes::from(payload)
    }

    fn framed(request: Request) -> Vec<u8> {
        Frame::new(request.encode().unwrap().freeze())
            .encode()
            .unwrap()
            .to_vec()
    }

    async fn wait_for<F: Fn() -> bool>(condition: F) {
        for _ in 0..200 {
            if condition() {
                return;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
        panic!("condition not reached");
    }

    #[test]
    fn test_server_config_builders() {
        let config = ServerConfig::new("127.0.0.1:0".parse().unwrap())
            .with_error_replies(ErrorReplyMode::Framed)
            .with_max_frame_bytes(1024)
            .with_max_connections(2)
            .with_metrics(Arc::new(Metrics::new().unwrap()));
        assert_eq!(config.error_replies, ErrorReplyMode::Framed);
        assert_eq!(config.max_frame_bytes, 1024);
        assert_eq!(config.max_connections, 2);
        assert!(config.metrics_enabled());
        assert!(format!("{:?}", config).contains("metrics_enabled: true"));

        let network = NetworkConfig::default();
        let config = ServerConfig::from(&network);
        assert_eq!(config.bind_addr.port(), 9092);
        assert!(!config.metrics_enabled());
    }

    #[tokio::test]
    async fn test_server_basic() {
        let server = Server::new(ServerConfig::new("127.0.0.1:0".parse().unwrap()));
        assert!(!server.is_running());
        assert_eq!(server.stats().connections_total.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_e2e_api_versions() {
        let (server, addr, handle) = start_server(ServerConfig::default()).await;
        wait_for(|| server.is_running()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(&[0, 0, 0, 8, 0, 18, 0, 4, 0, 0, 0, 7])
            .await
            .unwrap();
        let (correlation_id, response) =
            ApiVersionsResponse::decode(read_frame(&mut stream).await).unwrap();
        assert_eq!(correlation_id, 7);
        assert_eq!(response.error_code, 0);
        assert_eq!(
            response.api_keys,
            vec![ApiVersion::new(18, 0, 4), ApiVersion::new(17, 1, 3)]
        );

        // The connection stays open for further requests.
        stream
            .write_all(&framed(Request::new(18, 99, 8)))
            .await
            .unwrap();
        let (correlation_id, response) =
            ApiVersionsResponse::decode(read_frame(&mut stream).await).unwrap();
        assert_eq!(correlation_id, 8);
        assert_eq!(response.error_code, 35);
        assert_eq!(response.api_keys.len(), 2);

        drop(stream);
        wait_for(|| server.stats().connections_active.load(Ordering::Relaxed) == 0).await;
        assert_eq!(server.stats().requests_total.load(Ordering::Relaxed), 2);

        server.shutdown();
        handle.await.unwrap();
        assert!(!server.is_running());
    }

    #[tokio::test]
    async fn test_e2e_unknown_api_closes_connection() {
        let (server, addr, handle) = start_server(ServerConfig::default()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(&framed(Request::new(999, 0, 1)))
            .await
            .unwrap();
        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        assert_eq!(received, UNSUPPORTED_API_NOTICE.as_bytes());

        wait_for(|| server.stats().connections_active.load(Ordering::Relaxed) == 0).await;
        assert_eq!(server.stats().errors_total.load(Ordering::Relaxed), 0);

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_e2e_truncated_frame() {
        let (server, addr, handle) = start_server(ServerConfig::default()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream.write_all(&[0, 0, 0, 8, 0, 18]).await.unwrap();
        stream.shutdown().await.unwrap();

        let mut received = Vec::new();
        stream.read_to_end(&mut received).await.unwrap();
        assert!(received.is_empty());

        wait_for(|| server.stats().errors_total.load(Ordering::Relaxed) == 1).await;

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_connection_limit() {
        let config = ServerConfig::default().with_max_connections(1);
        let (server, addr, handle) = start_server(config).await;

        let mut first = TcpStream::connect(addr).await.unwrap();
        first
            .write_all(&framed(Request::new(18, 4, 1)))
            .await
            .unwrap();
        read_frame(&mut first).await;

        // Accepted by the kernel, then dropped by the server.
        let mut second = TcpStream::connect(addr).await.unwrap();
        let mut received = Vec::new();
        let _ = second.read_to_end(&mut received).await;
        assert!(received.is_empty());
        wait_for(|| server.stats().connections_rejected.load(Ordering::Relaxed) == 1).await;

        server.shutdown();
        handle.await.unwrap();
    }

    #[tokio::test]
    async fn test_shutdown_closes_open_connections() {
        let (server, addr, handle) = start_server(ServerConfig::default()).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(&framed(Request::new(18, 4, 1)))
            .await
            .unwrap();
        read_frame(&mut stream).await;

        server.shutdown();
        handle.await.unwrap();

        let mut received = Vec::new();
        let _ = stream.read_to_end(&mut received).await;
        assert!(received.is_empty());
        wait_for(|| server.stats().connections_active.load(Ordering::Relaxed) == 0).await;
    }

    #[tokio::test]
    async fn test_metrics_wired_through_server() {
        let metrics = Arc::new(Metrics::new().unwrap());
        let config = ServerConfig::default().with_metrics(metrics.clone());
        let (server, addr, handle) = start_server(config).await;

        let mut stream = TcpStream::connect(addr).await.unwrap();
        stream
            .write_all(&framed(Request::new(18, 4, 1)))
            .await
            .unwrap();
        read_frame(&mut stream).await;
        drop(stream);

        wait_for(|| metrics.connections_active.get() == 0.0).await;
        assert_eq!(metrics.connections_total.get(), 1.0);
        assert_eq!(
            metrics
                .requests_total
                .with_label_values(&["ApiVersions"])
                .get(),
            1.0
        );

        server.shutdown();
        handle.await.unwrap();
    }
}
