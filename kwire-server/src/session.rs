//! Per-connection session bookkeeping.

use kwire_protocol::{ClientId, Request};
use std::net::SocketAddr;
use uuid::Uuid;

/// A client session, owned by its connection task.
#[derive(Debug)]
pub struct Session {
    /// Unique session ID.
    pub id: String,

    /// Remote address.
    pub remote_addr: SocketAddr,

    /// Client id from the most recent request that carried one.
    client_id: Option<String>,

    request_count: u64,
}

impl Session {
    /// Creates a new session.
    pub fn new(remote_addr: SocketAddr) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            remote_addr,
            client_id: None,
            request_count: 0,
        }
    }

    /// Records a decoded request.
    pub fn record_request(&mut self, request: &Request) {
        self.request_count += 1;
        if let ClientId::Present(id) = &request.client_id {
            if self.client_id.as_deref() != Some(id.as_str()) {
                self.client_id = Some(id.clone());
            }
        }
    }

    /// Returns the last client id seen on this session.
    pub fn client_id(&self) -> Option<&str> {
        self.client_id.as_deref()
    }

    /// Returns the request count.
    pub fn request_count(&self) -> u64 {
        self.request_count
    }
}
