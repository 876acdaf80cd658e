//! Outbound relay: a transparent pass-through to third-party HTTP endpoints.
//!
//! Callers hand over `(url, method, headers, body)` and get the upstream
//! status and body back. The relay never interprets the payload beyond
//! deciding whether it parses as JSON.

use crate::monitor::{ApiService, Monitor};
use reqwest::Method;
use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

const TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RelayRequest {
    pub url: String,
    /// HTTP method; GET when absent.
    pub method: Option<String>,
    pub headers: BTreeMap<String, String>,
    /// Sent JSON-encoded, and only for non-GET requests.
    pub body: Option<Value>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RelayResponse {
    pub status: u16,
    pub body: Value,
}

impl RelayResponse {
    fn error(status: u16, message: String) -> Self {
        RelayResponse {
            status,
            body: json!({ "error": message }),
        }
    }

    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// JSON when the text parses, `{"rawResponse": text}` otherwise.
fn parse_body(text: String) -> Value {
    serde_json::from_str(&text).unwrap_or_else(|_| json!({ "rawResponse": text }))
}

pub struct Relay {
    client: reqwest::blocking::Client,
    monitor: Option<Arc<Monitor>>,
}

impl Relay {
    pub fn new() -> Result<Self, reqwest::Error> {
        let client = reqwest::blocking::Client::builder().timeout(TIMEOUT).build()?;
        Ok(Relay { client, monitor: None })
    }

    /// Report each forwarded request as a `Proxy` API call.
    pub fn with_monitor(mut self, monitor: Arc<Monitor>) -> Self {
        self.monitor = Some(monitor);
        self
    }

    pub fn forward(&self, request: &RelayRequest) -> RelayResponse {
        if request.url.trim().is_empty() {
            return RelayResponse::error(400, "URL is required".to_string());
        }
        let method = request.method.as_deref().unwrap_or("GET").to_uppercase();

        let call = self.monitor.as_ref().map(|m| {
            m.begin_call(ApiService::Proxy, format!("{} request", method), Some(request.url.clone()))
        });

        match self.send(&method, request) {
            Ok(response) => {
                debug!(url = %request.url, status = response.status, "relayed");
                if let Some(call) = call {
                    if response.is_success() {
                        call.succeed();
                    } else {
                        call.fail(format!("upstream status {}", response.status));
                    }
                }
                response
            }
            Err(e) => {
                warn!(url = %request.url, "relay failed: {}", e);
                if let Some(call) = call {
                    call.fail(e.clone());
                }
                RelayResponse::error(500, format!("Proxy failed: {}", e))
            }
        }
    }

    fn send(&self, method: &str, request: &RelayRequest) -> Result<RelayResponse, String> {
        let method = Method::from_bytes(method.as_bytes()).map_err(|e| e.to_string())?;
        let mut builder = self.client.request(method.clone(), &request.url);
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = &request.body {
            if method != Method::GET {
                builder = builder.body(body.to_string());
            }
        }

        let response = builder.send().map_err(|e| e.to_string())?;
        let status = response.status().as_u16();
        let text = response.text().map_err(|e| e.to_string())?;
        Ok(RelayResponse {
            status,
            body: parse_body(text),
        })
    }
}
