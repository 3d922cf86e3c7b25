//! Calls an external model endpoint with a timeout and captured-output cap
//! (§4.6)
//!
//! Invocation is a direct HTTP call via `reqwest`, never a shell command:
//! the prompt is sent as a JSON request body, never concatenated into a
//! command line (§9 redesign note). `BackendInvoker` is a trait so the
//! executor can be driven by a fake in tests (§8 scenarios S1/S4/S5 require
//! a scripted mock backend).

use futures_util::future::BoxFuture;
use futures_util::{FutureExt, StreamExt};
use shared::config::{BackendConfig, ModelConfig};
use shared::error::Result;
use shared::OrchestratorError;
use std::collections::HashMap;
use std::time::Duration;
use tracing::{debug, warn};

/// Request body sent to a model endpoint. Kept minimal and provider-neutral;
/// a real deployment would likely need provider-specific adapters, which are
/// out of scope here (§1 excludes prompt transformation).
#[derive(Debug, Clone, serde::Serialize)]
struct InvokeRequest<'a> {
    model: &'a str,
    prompt: &'a str,
}

#[derive(Debug, Clone, serde::Deserialize)]
struct InvokeResponse {
    #[serde(default)]
    result: Option<String>,
    #[serde(default)]
    error: Option<String>,
}

/// Invokes a model endpoint for a prompt, returning the result text or one
/// of §4.6/§7's typed error kinds.
pub trait BackendInvoker: Send + Sync {
    fn invoke<'a>(&'a self, model: &'a str, prompt: &'a str) -> BoxFuture<'a, Result<String>>;
}

pub struct HttpBackend {
    client: reqwest::Client,
    config: BackendConfig,
    models: HashMap<String, ModelConfig>,
}

impl HttpBackend {
    pub fn new(config: BackendConfig, models: Vec<ModelConfig>) -> Self {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .expect("reqwest client builds with static TLS config");

        Self {
            client,
            config,
            models: models.into_iter().map(|m| (m.key.clone(), m)).collect(),
        }
    }

    fn endpoint_for(&self, model: &str) -> Option<String> {
        self.models
            .get(model)
            .and_then(|m| m.endpoint.clone())
            .or_else(|| self.config.local_fallback_url.clone())
    }
}

impl BackendInvoker for HttpBackend {
    fn invoke<'a>(&'a self, model: &'a str, prompt: &'a str) -> BoxFuture<'a, Result<String>> {
        async move {
            let Some(endpoint) = self.endpoint_for(model) else {
                return Err(OrchestratorError::NotConfigured(format!(
                    "no endpoint configured for model '{model}'"
                ))
                .into());
            };

            debug!(model, endpoint, "invoking backend");
            let response = self
                .client
                .post(&endpoint)
                .json(&InvokeRequest { model, prompt })
                .send()
                .await
                .map_err(|e| classify_transport_error(e))?;

            if response.status().as_u16() == 429 {
                return Err(OrchestratorError::RateLimited(format!(
                    "model '{model}' returned 429"
                ))
                .into());
            }
            if !response.status().is_success() {
                return Err(OrchestratorError::InvocationFailed(format!(
                    "model '{model}' returned status {}",
                    response.status()
                ))
                .into());
            }

            let body = read_capped(response, self.config.max_output_bytes).await?;
            let parsed: InvokeResponse = serde_json::from_slice(&body).map_err(|e| {
                OrchestratorError::InvocationFailed(format!("unparseable response: {e}"))
            })?;

            if let Some(error) = parsed.error {
                return Err(OrchestratorError::InvocationFailed(error).into());
            }
            parsed
                .result
                .ok_or_else(|| {
                    OrchestratorError::InvocationFailed("response had no result field".into()).into()
                })
        }
        .boxed()
    }
}

fn classify_transport_error(e: reqwest::Error) -> anyhow::Error {
    if e.is_timeout() {
        OrchestratorError::Timeout(Duration::from_secs(0)).into()
    } else {
        OrchestratorError::InvocationFailed(e.to_string()).into()
    }
}

/// Streams the response body, failing with `InvocationFailed` if it exceeds
/// `max_bytes` rather than buffering an unbounded amount of attacker- or
/// bug-controlled output (§4.6).
async fn read_capped(response: reqwest::Response, max_bytes: usize) -> Result<Vec<u8>> {
    let mut stream = response.bytes_stream();
    let mut buf = Vec::new();
    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| OrchestratorError::InvocationFailed(e.to_string()))?;
        buf.extend_from_slice(&chunk);
        if buf.len() > max_bytes {
            warn!(max_bytes, "backend response exceeded captured-output cap");
            return Err(OrchestratorError::InvocationFailed(
                "response exceeded max_output_bytes".into(),
            )
            .into());
        }
    }
    Ok(buf)
}

/// A scripted backend shared by `core`'s own tests and the executor's
/// (§8 scenarios S1/S4/S5 need a deterministic sequence of outcomes rather
/// than a live endpoint). `pub(crate)` since it is test-only infrastructure,
/// not part of the crate's public API.
#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    /// Returns a fixed sequence of outcomes, one per call, repeating the
    /// last outcome once the sequence is exhausted.
    pub struct ScriptedBackend {
        outcomes: Vec<Result<String, String>>,
        calls: AtomicUsize,
    }

    impl ScriptedBackend {
        pub fn new(outcomes: Vec<Result<String, String>>) -> Self {
            Self {
                outcomes,
                calls: AtomicUsize::new(0),
            }
        }

        pub fn call_count(&self) -> usize {
            self.calls.load(Ordering::SeqCst)
        }
    }

    impl BackendInvoker for ScriptedBackend {
        fn invoke<'a>(&'a self, _model: &'a str, _prompt: &'a str) -> BoxFuture<'a, Result<String>> {
            let index = self.calls.fetch_add(1, Ordering::SeqCst);
            let outcome = self
                .outcomes
                .get(index)
                .or_else(|| self.outcomes.last())
                .cloned()
                .unwrap_or_else(|| Err("no scripted outcome".to_string()));
            async move { outcome.map_err(|e| OrchestratorError::InvocationFailed(e).into()) }.boxed()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::test_support::ScriptedBackend;
    use super::*;
    use std::sync::Arc;

    #[tokio::test]
    async fn scripted_backend_replays_configured_outcomes() {
        let backend = Arc::new(ScriptedBackend::new(vec![
            Err("network error".to_string()),
            Err("network error".to_string()),
            Ok("pong".to_string()),
        ]));

        assert!(backend.invoke("m", "ping").await.is_err());
        assert!(backend.invoke("m", "ping").await.is_err());
        assert_eq!(backend.invoke("m", "ping").await.unwrap(), "pong");
        assert_eq!(backend.call_count(), 3);
    }

    #[test]
    fn http_backend_falls_back_to_local_fallback_url() {
        let backend = HttpBackend::new(
            BackendConfig {
                timeout_secs: 5,
                max_output_bytes: 1024,
                local_fallback_url: Some("http://127.0.0.1:9.local/invoke".to_string()),
            },
            vec![ModelConfig {
                key: "m".to_string(),
                max_requests: 1,
                window_duration_ms: 60_000,
                endpoint: None,
            }],
        );
        assert_eq!(
            backend.endpoint_for("m"),
            Some("http://127.0.0.1:9.local/invoke".to_string())
        );
    }

    #[test]
    fn http_backend_prefers_per_model_endpoint() {
        let backend = HttpBackend::new(
            BackendConfig::default(),
            vec![ModelConfig {
                key: "m".to_string(),
                max_requests: 1,
                window_duration_ms: 60_000,
                endpoint: Some("http://model.local/invoke".to_string()),
            }],
        );
        assert_eq!(
            backend.endpoint_for("m"),
            Some("http://model.local/invoke".to_string())
        );
    }
}
