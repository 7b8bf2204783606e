//! JSON-RPC 2.0 over HTTP provider
//!
//! Talks to an Ethereum node endpoint. A node has no user prompt and cannot
//! switch chains, so account requests are answered from the configured
//! watch-only accounts when present, and `wallet_switchEthereumChain` fails
//! with the EIP-1193 "unsupported method" code. There is no push channel:
//! listeners are accepted and kept, but never fire.

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tracing::{debug, warn};

use super::{
    EventKind, Listener, ListenerId, ListenerRegistry, Provider, ProviderError, RpcRequest,
    METHOD_ACCOUNTS, METHOD_REQUEST_ACCOUNTS, METHOD_SWITCH_CHAIN,
};
use crate::config::ProviderConfig;
use crate::error::{Error, Result};

#[derive(Debug, Serialize)]
struct JsonRpcRequest<'a> {
    jsonrpc: &'static str,
    id: u64,
    method: &'a str,
    params: &'a Value,
}

#[derive(Debug, Deserialize)]
struct JsonRpcResponse {
    #[serde(default)]
    result: Option<Value>,
    #[serde(default)]
    error: Option<ProviderError>,
}

/// Provider backed by a JSON-RPC node
pub struct HttpProvider {
    client: reqwest::Client,
    rpc_url: String,
    accounts: Vec<String>,
    next_id: AtomicU64,
    listeners: ListenerRegistry,
}

impl HttpProvider {
    pub fn new(rpc_url: impl Into<String>, timeout: Duration) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| Error::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self {
            client,
            rpc_url: rpc_url.into(),
            accounts: Vec::new(),
            next_id: AtomicU64::new(1),
            listeners: ListenerRegistry::new(),
        })
    }

    pub fn from_config(config: &ProviderConfig) -> Result<Self> {
        let provider = Self::new(&config.rpc_url, Duration::from_millis(config.timeout_ms))?;
        Ok(provider.with_accounts(config.accounts.clone()))
    }

    /// Answer account requests with these addresses instead of asking the node
    pub fn with_accounts(mut self, accounts: Vec<String>) -> Self {
        self.accounts = accounts;
        self
    }

    pub fn rpc_url(&self) -> &str {
        &self.rpc_url
    }

    async fn call(&self, method: &str, params: &Value) -> std::result::Result<Value, ProviderError> {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        // Nodes reject a null params member
        let empty = json!([]);
        let params = if params.is_null() { &empty } else { params };

        let body = JsonRpcRequest {
            jsonrpc: "2.0",
            id,
            method,
            params,
        };

        debug!("JSON-RPC -> {} (id {})", method, id);

        let response = self
            .client
            .post(&self.rpc_url)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                warn!("JSON-RPC transport error for {}: {}", method, e);
                ProviderError::new(ProviderError::DISCONNECTED, e.to_string())
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ProviderError::new(
                ProviderError::DISCONNECTED,
                format!("HTTP {} from {}", status, self.rpc_url),
            ));
        }

        let decoded: JsonRpcResponse = response.json().await.map_err(|e| {
            ProviderError::new(ProviderError::INTERNAL, format!("Invalid JSON-RPC response: {}", e))
        })?;

        match (decoded.error, decoded.result) {
            (Some(err), _) => Err(err),
            (None, Some(result)) => Ok(result),
            (None, None) => Ok(Value::Null),
        }
    }
}

#[async_trait]
impl Provider for HttpProvider {
    async fn request(&self, request: RpcRequest) -> std::result::Result<Value, ProviderError> {
        match request.method.as_str() {
            METHOD_REQUEST_ACCOUNTS | METHOD_ACCOUNTS if !self.accounts.is_empty() => {
                Ok(json!(self.accounts))
            }
            // Nodes only know eth_accounts
            METHOD_REQUEST_ACCOUNTS => self.call(METHOD_ACCOUNTS, &Value::Null).await,
            METHOD_SWITCH_CHAIN => Err(ProviderError::unsupported(METHOD_SWITCH_CHAIN)),
            method => self.call(method, &request.params).await,
        }
    }

    fn on(&self, kind: EventKind, listener: Listener) -> ListenerId {
        debug!("HTTP provider never emits {}, listener kept for symmetry", kind);
        self.listeners.add(kind, listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use httpmock::prelude::*;

    #[tokio::test]
    async fn test_chain_id_roundtrip() {
        let server = MockServer::start_async().await;
        let mock = server
            .mock_async(|when, then| {
                when.method(POST).path("/").body_contains("eth_chainId");
                then.status(200)
                    .json_body(json!({ "jsonrpc": "2.0", "id": 1, "result": "0x1" }));
            })
            .await;

        let provider = HttpProvider::new(server.url("/"), Duration::from_secs(5)).unwrap();
        let result = provider.request(RpcRequest::chain_id()).await.unwrap();

        assert_eq!(result, json!("0x1"));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_rpc_error_is_returned() {
        let server = MockServer::start_async().await;
        server
            .mock_async(|when, then| {
                when.method(POST).path("/");
                then.status(200).json_body(json!({
                    "jsonrpc": "2.0",
                    "id": 1,
                    "error": { "code": -32602, "message": "invalid address" }
                }));
            })
            .await;

        let provider = HttpProvider::new(server.url("/"), Duration::from_secs(5)).unwrap();
        let err = provider
            .request(RpcRequest::get_balance("nope"))
            .await
            .unwrap_err();

        assert_eq!(err.code, -32602);
        assert_eq!(err.message, "invalid address");
    }

    #[tokio::test]
    async fn test_watch_only_accounts_skip_network() {
        let provider = HttpProvider::new("http://127.0.0.1:1", Duration::from_millis(50))
            .unwrap()
            .with_accounts(vec!["0x00000000000000000000000000000000000000aa".to_string()]);

        let accounts = provider.request(RpcRequest::request_accounts()).await.unwrap();
        assert_eq!(accounts, json!(["0x00000000000000000000000000000000000000aa"]));
    }

    #[tokio::test]
    async fn test_switch_chain_unsupported() {
        let provider = HttpProvider::new("http://127.0.0.1:1", Duration::from_millis(50)).unwrap();
        let err = provider
            .request(RpcRequest::switch_chain(1))
            .await
            .unwrap_err();
        assert_eq!(err.code, ProviderError::UNSUPPORTED_METHOD);
    }
}
