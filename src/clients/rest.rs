//! Generic JSON-over-HTTP client bound to one service.

use std::sync::Arc;
use std::time::Duration;

use reqwest::header::{HeaderMap, RETRY_AFTER};
use reqwest::{Method, StatusCode};
use serde::de::DeserializeOwned;
use serde_json::Value;
use url::Url;

use crate::clients::{ClientError, ClientResult};
use crate::config::{ServiceConfig, TimeoutConfig};
use crate::error::{FailureKind, RemoteFailure};
use crate::invoker::{RequestDescriptor, ResilientInvoker};

/// Longest provider error body kept in a failure message.
const MAX_ERROR_BODY: usize = 256;

/// REST client for one service, routed through a shared invoker.
#[derive(Clone)]
pub struct RestClient {
    name: String,
    base_url: Url,
    http: reqwest::Client,
    api_key: Option<String>,
    invoker: Arc<ResilientInvoker>,
}

impl RestClient {
    pub fn new(
        service: &ServiceConfig,
        timeouts: &TimeoutConfig,
        invoker: Arc<ResilientInvoker>,
    ) -> ClientResult<Self> {
        let mut base_url = Url::parse(&service.base_url).map_err(|source| ClientError::BaseUrl {
            service: service.name.clone(),
            url: service.base_url.clone(),
            source,
        })?;
        // without the trailing slash `join` would replace the last segment
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }

        let api_key = service.api_key_env.as_deref().and_then(|var| {
            let key = std::env::var(var).ok().filter(|key| !key.is_empty());
            if key.is_none() {
                tracing::warn!(service = %service.name, env = %var, "API key variable not set");
            }
            key
        });

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(timeouts.request_secs))
            .build()?;

        tracing::info!(
            service = %service.name,
            base_url = %base_url,
            authenticated = api_key.is_some(),
            "Service client created"
        );

        Ok(Self {
            name: service.name.clone(),
            base_url,
            http,
            api_key,
            invoker,
        })
    }

    pub fn with_api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn invoker(&self) -> &Arc<ResilientInvoker> {
        &self.invoker
    }

    /// Resolve `path` and `query` against the base URL.
    pub fn endpoint(&self, path: &str, query: &[(&str, String)]) -> ClientResult<Url> {
        let mut url = self
            .base_url
            .join(path.trim_start_matches('/'))
            .map_err(|source| ClientError::Path {
                path: path.to_string(),
                source,
            })?;
        if !query.is_empty() {
            url.query_pairs_mut()
                .extend_pairs(query.iter().map(|(k, v)| (*k, v.as_str())));
        }
        Ok(url)
    }

    fn operation(&self, method: &Method) -> String {
        format!("{}.{}", self.name, method.as_str().to_ascii_lowercase())
    }

    /// Descriptor for a cacheable GET. Query pairs are sorted so parameter
    /// order does not split cache entries.
    pub fn get_descriptor(&self, path: &str, query: &[(&str, String)]) -> RequestDescriptor {
        let mut pairs: Vec<_> = query.iter().map(|(k, v)| format!("{}={}", k, v)).collect();
        pairs.sort();
        RequestDescriptor::read(self.operation(&Method::GET))
            .part(path.trim_start_matches('/'))
            .part(pairs.join("&"))
    }

    pub async fn get(&self, path: &str, query: &[(&str, String)]) -> ClientResult<Value> {
        let url = self.endpoint(path, query)?;
        let descriptor = self.get_descriptor(path, query);
        self.send(&descriptor, Method::GET, url, None).await
    }

    pub async fn get_as<T: DeserializeOwned>(
        &self,
        path: &str,
        query: &[(&str, String)],
    ) -> ClientResult<T> {
        let value = self.get(path, query).await?;
        decode(&self.operation(&Method::GET), value)
    }

    pub async fn post(&self, path: &str, body: &Value) -> ClientResult<Value> {
        let url = self.endpoint(path, &[])?;
        let descriptor = RequestDescriptor::write(self.operation(&Method::POST))
            .part(path.trim_start_matches('/'));
        self.send(&descriptor, Method::POST, url, Some(body)).await
    }

    pub async fn delete(&self, path: &str) -> ClientResult<Value> {
        let url = self.endpoint(path, &[])?;
        let descriptor = RequestDescriptor::write(self.operation(&Method::DELETE))
            .part(path.trim_start_matches('/'));
        self.send(&descriptor, Method::DELETE, url, None).await
    }

    /// Drop a cached GET response.
    pub fn invalidate(&self, path: &str, query: &[(&str, String)]) -> bool {
        self.invoker.invalidate(&self.get_descriptor(path, query))
    }

    async fn send(
        &self,
        descriptor: &RequestDescriptor,
        method: Method,
        url: Url,
        body: Option<&Value>,
    ) -> ClientResult<Value> {
        let value = self
            .invoker
            .execute(descriptor, || {
                let mut request = self.http.request(method.clone(), url.clone());
                if let Some(key) = &self.api_key {
                    request = request.bearer_auth(key);
                }
                if let Some(body) = body {
                    request = request.json(body);
                }
                async move { read_response(request.send().await).await }
            })
            .await?;
        Ok(value)
    }
}

impl std::fmt::Debug for RestClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestClient")
            .field("name", &self.name)
            .field("base_url", &self.base_url.as_str())
            .field("authenticated", &self.api_key.is_some())
            .finish_non_exhaustive()
    }
}

pub(crate) fn decode<T: DeserializeOwned>(operation: &str, value: Value) -> ClientResult<T> {
    serde_json::from_value(value).map_err(|source| ClientError::Decode {
        operation: operation.to_string(),
        source,
    })
}

async fn read_response(
    result: Result<reqwest::Response, reqwest::Error>,
) -> Result<Value, RemoteFailure> {
    let response = result.map_err(transport_failure)?;
    let status = response.status();

    if status.is_success() {
        let bytes = response.bytes().await.map_err(transport_failure)?;
        if bytes.is_empty() {
            return Ok(Value::Null);
        }
        return serde_json::from_slice(&bytes).map_err(|e| {
            RemoteFailure::new(FailureKind::Decode, format!("invalid JSON body: {}", e))
        });
    }

    let retry_after = parse_retry_after(response.headers());
    let body = response.text().await.unwrap_or_default();
    let failure = RemoteFailure::from_status(status.as_u16(), error_message(status, &body));
    Err(match retry_after {
        Some(delay) => failure.with_retry_after(delay),
        None => failure,
    })
}

fn transport_failure(err: reqwest::Error) -> RemoteFailure {
    if err.is_timeout() {
        RemoteFailure::timeout(err.to_string())
    } else if err.is_decode() {
        RemoteFailure::new(FailureKind::Decode, err.to_string())
    } else {
        RemoteFailure::network(err.to_string())
    }
}

/// `Retry-After` in delta-seconds. HTTP-date values are ignored.
fn parse_retry_after(headers: &HeaderMap) -> Option<Duration> {
    headers
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<u64>()
        .ok()
        .map(Duration::from_secs)
}

/// Prefer a provider `message`/`error` field, then the raw body, then the
/// status reason.
fn error_message(status: StatusCode, body: &str) -> String {
    if let Ok(Value::Object(map)) = serde_json::from_str::<Value>(body) {
        for field in ["message", "error", "detail"] {
            if let Some(Value::String(message)) = map.get(field) {
                return message.clone();
            }
        }
    }
    let body = body.trim();
    if body.is_empty() {
        return status
            .canonical_reason()
            .unwrap_or("unknown error")
            .to_string();
    }
    body.chars().take(MAX_ERROR_BODY).collect()
}
