//! High-level client API.

use crate::connection::{Connection, ConnectionConfig, RawReply};
use crate::error::ClientError;
use bytes::Bytes;
use kwire_protocol::{
    ApiKey, ApiVersionsResponse, ClientId, ErrorResponse, Request, ERROR_RESPONSE_SIZE,
};
use std::sync::Arc;

/// First ApiVersions version that uses the flexible request header.
const API_VERSIONS_FIRST_FLEXIBLE: i16 = 3;

/// High-level client for kwire.
pub struct Client {
    conn: Arc<Connection>,
}

impl Client {
    /// Creates a new client with the given configuration.
    pub fn new(config: ConnectionConfig) -> Self {
        Self {
            conn: Arc::new(Connection::new(config)),
        }
    }

    /// Connects to the server.
    pub async fn connect(&self) -> Result<(), ClientError> {
        self.conn.connect().await
    }

    /// Returns whether the client is connected.
    pub fn is_connected(&self) -> bool {
        self.conn.is_connected()
    }

    /// Closes the connection.
    pub async fn close(&self) -> Result<(), ClientError> {
        self.conn.close().await
    }

    /// Returns the underlying connection.
    pub fn connection(&self) -> Arc<Connection> {
        self.conn.clone()
    }

    /// Builds a request header for the next correlation id.
    ///
    /// Flexible ApiVersions versions get a tagged-fields trailer; everything
    /// else carries the client id only.
    fn build_request(&self, api_key: i16, api_version: i16) -> Request {
        let correlation_id = self.conn.next_correlation_id();
        let client_id = ClientId::from(self.conn.config().client_id.clone());
        let request =
            Request::new(api_key, api_version, correlation_id).with_client_id(client_id);

        if api_key == ApiKey::ApiVersions.as_i16() && api_version >= API_VERSIONS_FIRST_FLEXIBLE {
            request.with_tagged_fields(0, Bytes::new())
        } else {
            request
        }
    }

    /// Asks the server which API versions it supports.
    ///
    /// A rejected version still returns the response: its `error_code` is
    /// set and the table is filled in.
    pub async fn api_versions(&self, version: i16) -> Result<ApiVersionsResponse, ClientError> {
        let request = self.build_request(ApiKey::ApiVersions.as_i16(), version);

        let payload = match self.conn.request(&request).await? {
            RawReply::Frame(payload) => payload,
            RawReply::Unframed(text) => {
                return Err(ClientError::UnframedReply(
                    String::from_utf8_lossy(&text).into_owned(),
                ))
            }
            RawReply::Closed => return Err(ClientError::ConnectionClosed),
        };

        if payload.len() == ERROR_RESPONSE_SIZE {
            let (correlation_id, error) = ErrorResponse::decode(payload)?;
            check_correlation(request.correlation_id, correlation_id)?;
            return Err(ClientError::ServerError {
                code: error.error_code,
            });
        }

        let (correlation_id, response) = ApiVersionsResponse::decode(payload)?;
        check_correlation(request.correlation_id, correlation_id)?;
        Ok(response)
    }

    /// Sends a header-only request and returns the reply undecoded.
    pub async fn request_raw(
        &self,
        api_key: i16,
        api_version: i16,
    ) -> Result<(Request, RawReply), ClientError> {
        let request = self.build_request(api_key, api_version);
        let reply = self.conn.request(&request).await?;
        Ok((request, reply))
    }
}

fn check_correlation(expected: i32, actual: i32) -> Result<(), ClientError> {
    if expected != actual {
        return Err(ClientError::CorrelationMismatch { expected, actual });
    }
    Ok(())
}
