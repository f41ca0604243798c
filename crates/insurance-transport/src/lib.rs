//! The pluggable HTTP transport the worker engine dispatches through.
//! `Transport::send` is deliberately infallible: every failure mode a real
//! HTTP client can produce (connect refused, DNS failure, timeout, TLS
//! error) is caught here and folded into an [`Outcome`] so the engine never
//! has to special-case a transport exception.

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::Value;

/// One classified delivery attempt result. `code` carries the sentinels
/// `0` (timed out) and `-1` (inconsistent) alongside ordinary HTTP statuses.
#[derive(Debug, Clone)]
pub struct Outcome {
    pub kind: OutcomeKind,
    pub code: i32,
    pub body: Option<String>,
    pub headers: Option<Value>,
    pub wall_ms: f64,
    pub cpu_ms: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutcomeKind {
    Successful,
    ClientError,
    ServerError,
    OtherStatus,
    TimedOut,
    Inconsistent,
}

impl OutcomeKind {
    /// Whether this outcome is ever eligible for retry, independent of the
    /// row's `retry_inconsistent` flag or remaining retry budget.
    pub fn is_retryable(self, retry_inconsistent: bool) -> bool {
        match self {
            OutcomeKind::Successful | OutcomeKind::ClientError => false,
            OutcomeKind::ServerError | OutcomeKind::OtherStatus | OutcomeKind::TimedOut => true,
            OutcomeKind::Inconsistent => retry_inconsistent,
        }
    }

    fn from_status(status: u16) -> Self {
        match status {
            200..=299 => OutcomeKind::Successful,
            400..=499 => OutcomeKind::ClientError,
            500..=599 => OutcomeKind::ServerError,
            _ => OutcomeKind::OtherStatus,
        }
    }
}

/// The fully-resolved request the processor hands to the transport. Headers
/// are already decrypted JSON text by the time they reach here; the
/// transport does not know or care that they were ever encrypted at rest.
#[derive(Debug, Clone)]
pub struct TransportRequest {
    pub method: String,
    pub url: String,
    pub headers_json: Option<String>,
    pub payload: Option<Value>,
}

#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &TransportRequest, timeout: Duration) -> Outcome;
}

/// Production transport backed by a shared `reqwest::Client`.
pub struct ReqwestTransport {
    client: reqwest::Client,
}

impl ReqwestTransport {
    /// `keep_alive=false` disables connection pooling so every request opens
    /// a fresh connection, matching the `keepAlive` configuration knob.
    pub fn new(keep_alive: bool) -> anyhow::Result<Self> {
        let mut builder = reqwest::Client::builder();
        if !keep_alive {
            builder = builder.pool_max_idle_per_host(0);
        }
        let client = builder.build()?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Transport for ReqwestTransport {
    async fn send(&self, request: &TransportRequest, timeout: Duration) -> Outcome {
        let started = Instant::now();

        let method = match request.method.parse::<reqwest::Method>() {
            Ok(m) => m,
            Err(_) => return inconsistent(started),
        };

        let mut builder = self.client.request(method, &request.url).timeout(timeout);

        if let Some(headers_json) = &request.headers_json {
            match parse_headers(headers_json) {
                Ok(header_map) => builder = builder.headers(header_map),
                Err(e) => {
                    tracing::warn!(error = %e, "discarding unparseable request headers");
                }
            }
        }

        if let Some(payload) = &request.payload {
            builder = builder.json(payload);
        }

        let result = builder.send().await;
        let wall_ms = elapsed_ms(started);

        match result {
            Ok(response) => {
                let status = response.status().as_u16();
                let kind = OutcomeKind::from_status(status);
                let headers = response_headers_to_json(response.headers());
                let body = response.text().await.ok();
                Outcome {
                    kind,
                    code: status as i32,
                    body,
                    headers: Some(headers),
                    wall_ms,
                    cpu_ms: wall_ms,
                }
            }
            Err(e) if e.is_timeout() => Outcome {
                kind: OutcomeKind::TimedOut,
                code: 0,
                body: None,
                headers: None,
                wall_ms,
                cpu_ms: wall_ms,
            },
            Err(e) => {
                tracing::warn!(error = %e, url = %request.url, "transport call failed, treating as inconsistent");
                inconsistent(started)
            }
        }
    }
}

fn inconsistent(started: Instant) -> Outcome {
    let wall_ms = elapsed_ms(started);
    Outcome {
        kind: OutcomeKind::Inconsistent,
        code: -1,
        body: None,
        headers: None,
        wall_ms,
        cpu_ms: wall_ms,
    }
}

fn elapsed_ms(started: Instant) -> f64 {
    started.elapsed().as_secs_f64() * 1000.0
}

fn parse_headers(headers_json: &str) -> anyhow::Result<reqwest::header::HeaderMap> {
    use reqwest::header::{HeaderMap, HeaderName, HeaderValue};

    let value: Value = serde_json::from_str(headers_json)?;
    let object = value
        .as_object()
        .ok_or_else(|| anyhow::anyhow!("headers JSON must be an object"))?;

    let mut map = HeaderMap::new();
    for (name, values) in object {
        let header_name = HeaderName::from_bytes(name.as_bytes())?;
        match values {
            Value::String(s) => {
                map.append(header_name, HeaderValue::from_str(s)?);
            }
            Value::Array(items) => {
                for item in items {
                    if let Some(s) = item.as_str() {
                        map.append(header_name.clone(), HeaderValue::from_str(s)?);
                    }
                }
            }
            _ => anyhow::bail!("header {name} value must be a string or array of strings"),
        }
    }
    Ok(map)
}

fn response_headers_to_json(headers: &reqwest::header::HeaderMap) -> Value {
    let mut map = serde_json::Map::new();
    for name in headers.keys() {
        let values: Vec<Value> = headers
            .get_all(name)
            .iter()
            .filter_map(|v| v.to_str().ok())
            .map(|v| Value::String(v.to_string()))
            .collect();
        map.insert(name.as_str().to_string(), Value::Array(values));
    }
    Value::Object(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_classification_matches_spec_ranges() {
        assert_eq!(OutcomeKind::from_status(200), OutcomeKind::Successful);
        assert_eq!(OutcomeKind::from_status(299), OutcomeKind::Successful);
        assert_eq!(OutcomeKind::from_status(404), OutcomeKind::ClientError);
        assert_eq!(OutcomeKind::from_status(503), OutcomeKind::ServerError);
        assert_eq!(OutcomeKind::from_status(301), OutcomeKind::OtherStatus);
        assert_eq!(OutcomeKind::from_status(101), OutcomeKind::OtherStatus);
    }

    #[test]
    fn retryability_matches_spec_table() {
        assert!(!OutcomeKind::Successful.is_retryable(true));
        assert!(!OutcomeKind::ClientError.is_retryable(true));
        assert!(OutcomeKind::ServerError.is_retryable(false));
        assert!(OutcomeKind::OtherStatus.is_retryable(false));
        assert!(OutcomeKind::TimedOut.is_retryable(false));
        assert!(OutcomeKind::Inconsistent.is_retryable(true));
        assert!(!OutcomeKind::Inconsistent.is_retryable(false));
    }

    #[test]
    fn parses_multi_value_headers() {
        let headers = parse_headers(r#"{"X-Trace":["a","b"],"Authorization":"Bearer x"}"#).unwrap();
        let trace_values: Vec<_> = headers.get_all("X-Trace").iter().collect();
        assert_eq!(trace_values.len(), 2);
        assert_eq!(headers.get("Authorization").unwrap(), "Bearer x");
    }
}
