//! HTTP transport for hub JSON-RPC calls

use std::time::Duration;

use async_trait::async_trait;

use super::types::{RpcRequest, RpcResponse};
use crate::{Error, Result};

/// Delivers one JSON-RPC request and returns the decoded response
///
/// Implementations report unreachable hosts, refused or reset connections
/// and timeouts as `Error::Network`, and undecodable bodies as
/// `Error::Protocol`.
#[async_trait]
pub trait RpcTransport: Send + Sync {
    /// POST `request` to `url`
    async fn post(&self, url: &str, request: &RpcRequest) -> Result<RpcResponse>;
}

/// Plain HTTP transport backed by reqwest
#[derive(Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
}

impl HttpTransport {
    /// Create a transport whose requests give up after `timeout`
    ///
    /// # Errors
    ///
    /// Returns error if the HTTP client cannot be built
    pub fn new(timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .connect_timeout(timeout)
            .build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl RpcTransport for HttpTransport {
    async fn post(&self, url: &str, request: &RpcRequest) -> Result<RpcResponse> {
        let response = self
            .client
            .post(url)
            .json(request)
            .send()
            .await
            .map_err(classify)?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Network(format!(
                "hub returned HTTP {status} for {}",
                request.method
            )));
        }

        let body = response.bytes().await.map_err(classify)?;
        serde_json::from_slice(&body).map_err(|e| {
            Error::Protocol(format!("undecodable response to {}: {e}", request.method))
        })
    }
}

/// Map a reqwest failure onto the hub error taxonomy
fn classify(e: reqwest::Error) -> Error {
    if e.is_timeout() || e.is_connect() || e.is_request() || e.is_body() {
        Error::Network(e.to_string())
    } else if e.is_decode() {
        Error::Protocol(e.to_string())
    } else {
        Error::Http(e)
    }
}
