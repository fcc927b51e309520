//! External action runtime interface
//!
//! Merge functions live in an action runtime outside this process. The
//! core only needs a synchronous-looking call: hand a named function some
//! JSON bytes, get JSON bytes back.

use std::time::Duration;

use tonic::async_trait;

use crate::common::{Error, Result};

/// Calls a named external function with a JSON payload
#[async_trait]
pub trait ActionInvoker: Send + Sync {
    async fn invoke(&self, name: &str, payload: &[u8]) -> Result<Vec<u8>>;
}

/// Invoker backed by an HTTP action runtime.
///
/// Posts the payload to `{endpoint}/{name}` and returns the response body.
/// The runtime itself specifies no timeout, so the client enforces one.
pub struct HttpActionInvoker {
    endpoint: String,
    client: reqwest::Client,
}

impl HttpActionInvoker {
    pub fn new(endpoint: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Transport(e.to_string()))?;
        Ok(Self {
            endpoint: endpoint.into(),
            client,
        })
    }
}

#[async_trait]
impl ActionInvoker for HttpActionInvoker {
    async fn invoke(&self, name: &str, payload: &[u8]) -> Result<Vec<u8>> {
        let url = format!("{}/{}", self.endpoint.trim_end_matches('/'), name);
        let response = self
            .client
            .post(&url)
            .header(reqwest::header::CONTENT_TYPE, "application/json")
            .body(payload.to_vec())
            .send()
            .await
            .map_err(|e| Error::Action {
                name: name.to_string(),
                reason: e.to_string(),
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::Action {
                name: name.to_string(),
                reason: format!("runtime returned {}", status),
            });
        }

        let body = response.bytes().await.map_err(|e| Error::Action {
            name: name.to_string(),
            reason: e.to_string(),
        })?;
        Ok(body.to_vec())
    }
}
