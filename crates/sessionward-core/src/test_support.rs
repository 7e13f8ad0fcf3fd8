//! Scripted in-memory `Transport` for protocol tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use reqwest::{Method, StatusCode};
use serde_json::Value;
use tokio::sync::Notify;

use crate::api::{ApiError, ApiRequest, HttpResponse, Transport};

type Handler = Box<dyn Fn(&RecordedRequest, usize) -> (StatusCode, String) + Send + Sync>;

#[derive(Debug, Clone)]
pub struct RecordedRequest {
    pub method: Method,
    pub path: String,
    pub body: Option<Value>,
    pub bearer: Option<String>,
}

/// Answers each path with a handler that sees the request and how many
/// earlier requests hit the same path. Unscripted paths get 404.
#[derive(Default)]
pub struct FakeServer {
    handlers: Mutex<HashMap<String, Handler>>,
    gates: Mutex<HashMap<String, Arc<Notify>>>,
    offline: Mutex<Vec<String>>,
    log: Mutex<Vec<RecordedRequest>>,
}

impl FakeServer {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn on<F>(&self, path: &str, handler: F)
    where
        F: Fn(&RecordedRequest, usize) -> (StatusCode, String) + Send + Sync + 'static,
    {
        self.handlers
            .lock()
            .unwrap()
            .insert(path.to_string(), Box::new(handler));
    }

    /// Hold requests to `path` until the returned `Notify` is signalled
    pub fn gate(&self, path: &str) -> Arc<Notify> {
        let notify = Arc::new(Notify::new());
        self.gates
            .lock()
            .unwrap()
            .insert(path.to_string(), notify.clone());
        notify
    }

    /// Fail requests to `path` at the network level
    pub fn take_offline(&self, path: &str) {
        self.offline.lock().unwrap().push(path.to_string());
    }

    pub fn requests_to(&self, path: &str) -> Vec<RecordedRequest> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|r| r.path == path)
            .cloned()
            .collect()
    }
}

#[async_trait]
impl Transport for FakeServer {
    async fn send(&self, request: &ApiRequest, bearer: Option<&str>) -> Result<HttpResponse, ApiError> {
        let recorded = RecordedRequest {
            method: request.method.clone(),
            path: request.path.clone(),
            body: request.body.clone(),
            bearer: bearer.map(str::to_string),
        };
        let seen = {
            let mut log = self.log.lock().unwrap();
            let seen = log.iter().filter(|r| r.path == request.path).count();
            log.push(recorded.clone());
            seen
        };

        let gate = self.gates.lock().unwrap().get(&request.path).cloned();
        if let Some(gate) = gate {
            gate.notified().await;
        }

        if self.offline.lock().unwrap().contains(&request.path) {
            return Err(ApiError::NetworkError("connection refused".to_string()));
        }

        let handlers = self.handlers.lock().unwrap();
        let (status, body) = match handlers.get(&request.path) {
            Some(handler) => handler(&recorded, seen),
            None => (StatusCode::NOT_FOUND, String::new()),
        };
        Ok(HttpResponse::new(status, body))
    }
}
