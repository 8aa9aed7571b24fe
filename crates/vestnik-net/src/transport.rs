//! Request/response transport contract.
//!
//! A [`Transport`] performs exactly one call per invocation: no retries, no
//! backoff. Business errors embedded in a 2xx body are *not* interpreted
//! here; that is the job of [`crate::api::ApiClient`].

use async_trait::async_trait;
use serde::Serialize;
use serde_json::Value;

use vestnik_shared::TransportError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Method {
    Get,
    Post,
}

impl std::fmt::Display for Method {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Method::Get => f.write_str("GET"),
            Method::Post => f.write_str("POST"),
        }
    }
}

/// A single call against the REST surface.
#[derive(Debug, Clone, PartialEq)]
pub struct Request {
    pub method: Method,
    /// Path relative to the server base URL, e.g. `groups/members`.
    pub endpoint: String,
    pub query: Vec<(String, String)>,
    pub payload: Option<Value>,
}

impl Request {
    pub fn get(endpoint: impl Into<String>) -> Self {
        Self {
            method: Method::Get,
            endpoint: endpoint.into(),
            query: Vec::new(),
            payload: None,
        }
    }

    /// Build a `POST` carrying `body` serialised as JSON.
    pub fn post<T: Serialize>(endpoint: impl Into<String>, body: &T) -> Result<Self, TransportError> {
        let payload =
            serde_json::to_value(body).map_err(|e| TransportError::Malformed(e.to_string()))?;
        Ok(Self {
            method: Method::Post,
            endpoint: endpoint.into(),
            query: Vec::new(),
            payload: Some(payload),
        })
    }

    pub fn query(mut self, key: &str, value: impl ToString) -> Self {
        self.query.push((key.to_string(), value.to_string()));
        self
    }

    /// Endpoint without surrounding slashes, used for routing and logging.
    pub fn path(&self) -> &str {
        self.endpoint.trim_matches('/')
    }

    pub fn query_value(&self, key: &str) -> Option<&str> {
        self.query
            .iter()
            .find(|(k, _)| k == key)
            .map(|(_, v)| v.as_str())
    }
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn call(&self, request: Request) -> Result<Value, TransportError>;
}
