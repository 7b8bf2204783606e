//! Scriptable in-process provider
//!
//! Responses are scripted per method and every request is recorded.
//! Requests to a held method block until the test releases them.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use tokio::sync::Semaphore;
use tracing::debug;

use super::{
    EventKind, Listener, ListenerId, ListenerRegistry, Provider, ProviderError, ProviderEvent,
    RpcRequest, METHOD_ACCOUNTS, METHOD_CHAIN_ID, METHOD_GET_BALANCE, METHOD_REQUEST_ACCOUNTS,
    METHOD_SWITCH_CHAIN,
};

type MockResult = std::result::Result<Value, ProviderError>;

/// Test double for [`Provider`]
#[derive(Default)]
pub struct MockProvider {
    /// Sticky response per method
    responses: DashMap<String, MockResult>,
    /// One-shot responses consumed before the sticky one
    queued: DashMap<String, VecDeque<MockResult>>,
    /// Methods whose requests wait for a permit
    gates: DashMap<String, Arc<Semaphore>>,
    /// Every request in arrival order
    requests: Mutex<Vec<RpcRequest>>,
    listeners: ListenerRegistry,
}

impl MockProvider {
    pub fn new() -> Self {
        Self::default()
    }

    /// A wallet with one authorized account
    pub fn with_account(address: &str, chain_id_hex: &str, balance_hex: &str) -> Self {
        let mock = Self::new();
        mock.respond(METHOD_REQUEST_ACCOUNTS, Ok(json!([address])));
        mock.respond(METHOD_ACCOUNTS, Ok(json!([address])));
        mock.respond(METHOD_CHAIN_ID, Ok(json!(chain_id_hex)));
        mock.respond(METHOD_GET_BALANCE, Ok(json!(balance_hex)));
        mock.respond(METHOD_SWITCH_CHAIN, Ok(Value::Null));
        mock
    }

    /// Answer every `method` request with `result`
    pub fn respond(&self, method: &str, result: MockResult) {
        self.responses.insert(method.to_string(), result);
    }

    /// Answer the next `method` request with `result`
    pub fn respond_once(&self, method: &str, result: MockResult) {
        self.queued
            .entry(method.to_string())
            .or_default()
            .push_back(result);
    }

    /// Make `method` requests wait until [`MockProvider::release`]
    pub fn hold(&self, method: &str) {
        self.gates
            .insert(method.to_string(), Arc::new(Semaphore::new(0)));
    }

    /// Let `count` held `method` requests proceed
    pub fn release(&self, method: &str, count: usize) {
        if let Some(gate) = self.gates.get(method) {
            gate.add_permits(count);
        }
    }

    /// Push an event to registered listeners
    pub fn emit(&self, event: ProviderEvent) {
        self.listeners.emit(&event);
    }

    pub fn listener_count(&self, kind: EventKind) -> usize {
        self.listeners.count(kind)
    }

    /// Recorded requests
    pub fn requests(&self) -> Vec<RpcRequest> {
        self.lock_requests().clone()
    }

    /// Number of recorded requests for `method`
    pub fn request_count(&self, method: &str) -> usize {
        self.lock_requests()
            .iter()
            .filter(|r| r.method == method)
            .count()
    }

    /// Per-method request counts
    pub fn request_counts(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for req in self.lock_requests().iter() {
            *counts.entry(req.method.clone()).or_insert(0) += 1;
        }
        counts
    }

    fn lock_requests(&self) -> MutexGuard<'_, Vec<RpcRequest>> {
        self.requests
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn next_response(&self, method: &str) -> MockResult {
        if let Some(mut queue) = self.queued.get_mut(method) {
            if let Some(result) = queue.pop_front() {
                return result;
            }
        }
        self.responses
            .get(method)
            .map(|r| r.value().clone())
            .unwrap_or_else(|| Err(ProviderError::unsupported(method)))
    }
}

#[async_trait]
impl Provider for MockProvider {
    async fn request(&self, request: RpcRequest) -> MockResult {
        let method = request.method.clone();
        debug!("Mock provider request: {}", method);
        self.lock_requests().push(request);

        let gate = self.gates.get(&method).map(|g| g.value().clone());
        if let Some(gate) = gate {
            match gate.acquire().await {
                Ok(permit) => permit.forget(),
                Err(_) => return Err(ProviderError::new(ProviderError::DISCONNECTED, "gate closed")),
            }
        }

        self.next_response(&method)
    }

    fn on(&self, kind: EventKind, listener: Listener) -> ListenerId {
        self.listeners.add(kind, listener)
    }

    fn remove_listener(&self, id: ListenerId) -> bool {
        self.listeners.remove(id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_queued_before_sticky() {
        let mock = MockProvider::new();
        mock.respond(METHOD_CHAIN_ID, Ok(json!("0x1")));
        mock.respond_once(METHOD_CHAIN_ID, Ok(json!("0x89")));

        assert_eq!(mock.request(RpcRequest::chain_id()).await, Ok(json!("0x89")));
        assert_eq!(mock.request(RpcRequest::chain_id()).await, Ok(json!("0x1")));
        assert_eq!(mock.request_count(METHOD_CHAIN_ID), 2);
    }

    #[tokio::test]
    async fn test_unscripted_method_is_unsupported() {
        let mock = MockProvider::new();
        let err = mock.request(RpcRequest::accounts()).await.unwrap_err();
        assert_eq!(err.code, ProviderError::UNSUPPORTED_METHOD);
    }

    #[tokio::test]
    async fn test_hold_and_release() {
        let mock = Arc::new(MockProvider::with_account("0xabc", "0x1", "0x0"));
        mock.hold(METHOD_CHAIN_ID);

        let pending = {
            let mock = mock.clone();
            tokio::spawn(async move { mock.request(RpcRequest::chain_id()).await })
        };

        tokio::task::yield_now().await;
        assert!(!pending.is_finished());

        mock.release(METHOD_CHAIN_ID, 1);
        assert_eq!(pending.await.unwrap(), Ok(json!("0x1")));
    }
}
