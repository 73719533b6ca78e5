//! # kwire-server
//!
//! TCP server for kwire.
//!
//! This crate provides:
//! - TCP connection handling with async I/O
//! - A per-connection frame/decode/dispatch loop
//! - The ApiVersions handler and its capability table
//! - Session bookkeeping
//! - YAML + environment configuration
//! - Prometheus metrics

pub mod config;
pub mod connection;
pub mod error;
pub mod handler;
pub mod metrics;
pub mod server;
pub mod session;

pub use config::{Config, ConfigError, ErrorReplyMode, MetricsConfig, NetworkConfig};
pub use connection::{Connection, ConnectionOptions, ConnectionState, UNSUPPORTED_API_NOTICE};
pub use error::ServerError;
pub use handler::{Dispatch, RequestHandler, SupportedApis};
pub use metrics::Metrics;
pub use server::{Server, ServerConfig, ServerStats};
pub use session::Session;
