//! # kwire-client
//!
//! Client library for kwire.
//!
//! This crate provides:
//! - Async TCP client with connection management
//! - Sequential request/response with correlation id checks
//! - Detection of unframed diagnostic replies
//! - High-level ApiVersions API

pub mod client;
pub mod connection;
pub mod error;

pub use client::Client;
pub use connection::{Connection, ConnectionConfig, RawReply};
pub use error::ClientError;
