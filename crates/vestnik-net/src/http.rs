//! reqwest-backed [`Transport`].

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use tracing::debug;

use vestnik_shared::TransportError;

use crate::transport::{Method, Request, Transport};

/// HTTP/JSON transport against a server base URL such as
/// `http://127.0.0.1:8080`.
#[derive(Debug, Clone)]
pub struct HttpTransport {
    client: reqwest::Client,
    base_url: String,
}

impl HttpTransport {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, TransportError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| TransportError::Network(format!("Failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url_for(&self, request: &Request) -> String {
        format!("{}/{}", self.base_url, request.path())
    }
}

#[async_trait]
impl Transport for HttpTransport {
    async fn call(&self, request: Request) -> Result<Value, TransportError> {
        let url = self.url_for(&request);

        let mut builder = match request.method {
            Method::Get => self.client.get(&url),
            Method::Post => self.client.post(&url),
        };
        if !request.query.is_empty() {
            builder = builder.query(&request.query);
        }
        if let Some(ref payload) = request.payload {
            builder = builder.json(payload);
        }

        let resp = builder.send().await.map_err(classify)?;
        let status = resp.status();
        let body = resp.bytes().await.map_err(classify)?;

        debug!(
            method = %request.method,
            endpoint = request.path(),
            status = status.as_u16(),
            len = body.len(),
            "HTTP call completed"
        );

        if !status.is_success() {
            return Err(TransportError::ServerError {
                status: status.as_u16(),
                message: error_field(&body),
            });
        }

        decode_body(&body)
    }
}

/// Connect and builder failures never reached the server; anything else
/// happened after the request was sent.
fn classify(e: reqwest::Error) -> TransportError {
    if e.is_timeout() {
        TransportError::Timeout
    } else if e.is_connect() || e.is_builder() {
        TransportError::Network(e.to_string())
    } else {
        TransportError::Interrupted(e.to_string())
    }
}

/// An empty 2xx body stands for `{}`.
fn decode_body(body: &[u8]) -> Result<Value, TransportError> {
    if body.iter().all(u8::is_ascii_whitespace) {
        return Ok(Value::Object(Default::default()));
    }
    serde_json::from_slice(body).map_err(|e| TransportError::Malformed(e.to_string()))
}

fn error_field(body: &[u8]) -> Option<String> {
    serde_json::from_slice::<Value>(body)
        .ok()?
        .get("error")?
        .as_str()
        .map(str::to_string)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_decode_empty_body() {
        assert_eq!(decode_body(b"").unwrap(), serde_json::json!({}));
        assert_eq!(decode_body(b" \n").unwrap(), serde_json::json!({}));
    }

    #[test]
    fn test_decode_malformed_body() {
        assert!(matches!(
            decode_body(b"<html>"),
            Err(TransportError::Malformed(_))
        ));
    }

    #[test]
    fn test_error_field() {
        assert_eq!(
            error_field(br#"{"error":"Not found"}"#),
            Some("Not found".to_string())
        );
        assert_eq!(error_field(b"Bad Gateway"), None);
    }

    #[test]
    fn test_url_for_trims_slashes() {
        let transport =
            HttpTransport::new("http://localhost:8080/", Duration::from_secs(1)).unwrap();
        let req = Request::get("/groups/members");
        assert_eq!(transport.url_for(&req), "http://localhost:8080/groups/members");
    }

    #[tokio::test]
    async fn test_unreachable_host_is_network_error() {
        // Port 9 (discard) on localhost is closed on test machines.
        let transport =
            HttpTransport::new("http://127.0.0.1:9", Duration::from_secs(2)).unwrap();
        let err = transport.call(Request::get("health")).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Network(_) | TransportError::Timeout
        ));
    }
}
