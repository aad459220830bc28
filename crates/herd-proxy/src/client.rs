//! The reqwest-backed backend client.

use crate::error::{classify_status, map_transport_error, ProxyError, StreamingConfigError};
use crate::streaming::{StreamHandle, StreamTask};
use crate::types::{LoadedModelInfo, ModelInfo, ModelsEnvelope};
use herd_core::{Endpoint, ErrorKind, ErrorPatterns};
use reqwest::Client;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;

/// Cap on error-response bodies read for classification.
const MAX_ERROR_BODY_BYTES: usize = 64 * 1024;

/// Streaming limits and timers.
#[derive(Debug, Clone, PartialEq)]
pub struct StreamingConfig {
    pub enabled: bool,
    pub max_concurrent_streams: usize,
    /// Overall deadline for one stream, send to final chunk.
    pub timeout: Duration,
    /// Bounded chunk-channel capacity between producer and consumer.
    pub buffer_size: usize,
    /// Inactivity window; each chunk resets it.
    pub activity_timeout: Duration,
}

impl Default for StreamingConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_concurrent_streams: 20,
            timeout: Duration::from_secs(300),
            buffer_size: 32,
            activity_timeout: Duration::from_secs(60),
        }
    }
}

impl StreamingConfig {
    pub fn validate(&self) -> Result<(), StreamingConfigError> {
        if self.max_concurrent_streams < 1 {
            return Err(StreamingConfigError::MaxConcurrentStreams);
        }
        if self.timeout < Duration::from_secs(1) {
            return Err(StreamingConfigError::Timeout);
        }
        if self.buffer_size < 1 {
            return Err(StreamingConfigError::BufferSize);
        }
        if self.activity_timeout < Duration::from_secs(1) {
            return Err(StreamingConfigError::ActivityTimeout);
        }
        Ok(())
    }
}

/// Client-wide configuration.
#[derive(Debug, Clone, PartialEq)]
pub struct ProxyConfig {
    pub connect_timeout: Duration,
    /// Ceiling on time-to-response-headers for any exchange.
    pub headers_timeout: Duration,
    /// Default unary deadline when the caller passes none.
    pub request_timeout: Duration,
    pub error_patterns: ErrorPatterns,
    pub streaming: StreamingConfig,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            headers_timeout: Duration::from_secs(60),
            request_timeout: Duration::from_secs(120),
            error_patterns: ErrorPatterns::default(),
            streaming: StreamingConfig::default(),
        }
    }
}

/// Address + credential for one backend, resolved from the registry.
#[derive(Debug, Clone, PartialEq)]
pub struct BackendEndpoint {
    pub server_id: String,
    pub base_url: String,
    pub api_key: Option<String>,
}

impl BackendEndpoint {
    pub fn new(server_id: impl Into<String>, base_url: impl Into<String>) -> Self {
        Self {
            server_id: server_id.into(),
            base_url: base_url.into(),
            api_key: None,
        }
    }

    pub fn api_key(mut self, key: impl Into<String>) -> Self {
        self.api_key = Some(key.into());
        self
    }
}

/// Outcome of one probe fan-out, for the health backend.
#[derive(Debug, Default)]
pub struct ProbeSummary {
    pub healthy: bool,
    pub response_time_ms: Option<u64>,
    pub models: Option<Vec<ModelInfo>>,
    pub loaded: Option<Vec<LoadedModelInfo>>,
    pub supports_primary: Option<bool>,
    pub supports_compat: Option<bool>,
    pub error: Option<ProxyError>,
}

/// The shared HTTP adapter. One connection pool serves the whole fleet.
pub struct HttpBackend {
    client: Client,
    config: ProxyConfig,
    stream_permits: Arc<Semaphore>,
}

impl HttpBackend {
    pub fn new(config: ProxyConfig) -> Result<Self, ProxyError> {
        config
            .streaming
            .validate()
            .map_err(|e| ProxyError::new(ErrorKind::InternalState, e.to_string()))?;
        let client = Client::builder()
            .connect_timeout(config.connect_timeout)
            .pool_idle_timeout(Duration::from_secs(90))
            .pool_max_idle_per_host(4)
            .build()
            .map_err(|e| ProxyError::new(ErrorKind::InternalState, e.to_string()))?;
        Ok(Self {
            client,
            stream_permits: Arc::new(Semaphore::new(config.streaming.max_concurrent_streams)),
            config,
        })
    }

    pub fn config(&self) -> &ProxyConfig {
        &self.config
    }

    fn url(endpoint: &BackendEndpoint, path: &str) -> String {
        format!("{}{path}", endpoint.base_url.trim_end_matches('/'))
    }

    fn get(&self, endpoint: &BackendEndpoint, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.get(Self::url(endpoint, path));
        if let Some(key) = &endpoint.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    fn post(&self, endpoint: &BackendEndpoint, path: &str) -> reqwest::RequestBuilder {
        let mut builder = self.client.post(Self::url(endpoint, path));
        if let Some(key) = &endpoint.api_key {
            builder = builder.bearer_auth(key);
        }
        builder
    }

    /// Sends a request and resolves a non-success status to a typed error,
    /// reading a capped slice of the body for classification.
    async fn send_checked(
        &self,
        builder: reqwest::RequestBuilder,
        timeout: Duration,
    ) -> Result<reqwest::Response, ProxyError> {
        let headers_timeout = timeout.min(self.config.headers_timeout);
        let response = tokio::time::timeout(headers_timeout, builder.send())
            .await
            .map_err(|_| ProxyError::timeout("no response headers before deadline"))?
            .map_err(|e| ProxyError::new(map_transport_error(&e), e.to_string()))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = Self::read_body_capped(response, Duration::from_secs(5)).await;
        let kind = classify_status(status.as_u16(), &body, &self.config.error_patterns);
        let truncated: String = body.chars().take(500).collect();
        Err(ProxyError::new(kind, format!("{status}: {truncated}")).with_status(status.as_u16()))
    }

    /// Reads an error body without trusting the backend to ever finish
    /// sending it.
    async fn read_body_capped(mut response: reqwest::Response, deadline: Duration) -> String {
        let read = async {
            let mut body: Vec<u8> = Vec::new();
            while let Ok(Some(chunk)) = response.chunk().await {
                let remaining = MAX_ERROR_BODY_BYTES.saturating_sub(body.len());
                body.extend_from_slice(&chunk[..chunk.len().min(remaining)]);
                if body.len() >= MAX_ERROR_BODY_BYTES {
                    break;
                }
            }
            body
        };
        let body = tokio::time::timeout(deadline, read).await.unwrap_or_default();
        String::from_utf8_lossy(&body).into_owned()
    }

    /// Installed models.
    pub async fn list_models(
        &self,
        endpoint: &BackendEndpoint,
        timeout: Duration,
    ) -> Result<Vec<ModelInfo>, ProxyError> {
        let response = self
            .send_checked(self.get(endpoint, "/api/tags").timeout(timeout), timeout)
            .await?;
        let envelope: ModelsEnvelope<ModelInfo> = response
            .json()
            .await
            .map_err(|e| ProxyError::new(ErrorKind::ConnectionReset, e.to_string()))?;
        Ok(envelope.models)
    }

    /// Models currently resident in memory. Callers treat failures as
    /// non-fatal.
    pub async fn list_loaded_models(
        &self,
        endpoint: &BackendEndpoint,
        timeout: Duration,
    ) -> Result<Vec<LoadedModelInfo>, ProxyError> {
        let response = self
            .send_checked(self.get(endpoint, "/api/ps").timeout(timeout), timeout)
            .await?;
        let envelope: ModelsEnvelope<LoadedModelInfo> = response
            .json()
            .await
            .map_err(|e| ProxyError::new(ErrorKind::ConnectionReset, e.to_string()))?;
        Ok(envelope.models)
    }

    /// Whether the backend also answers the OpenAI-compatible surface.
    pub async fn check_compat(&self, endpoint: &BackendEndpoint, timeout: Duration) -> bool {
        self.send_checked(self.get(endpoint, "/v1/models").timeout(timeout), timeout)
            .await
            .is_ok()
    }

    /// The full probe fan-out: installed models (gating), loaded models and
    /// compat discovery (both non-fatal), all in parallel. The server is
    /// healthy when any enumeration endpoint answered.
    pub async fn probe(&self, endpoint: &BackendEndpoint, timeout: Duration) -> ProbeSummary {
        let started = tokio::time::Instant::now();
        let loaded_timeout = (timeout / 2).max(Duration::from_millis(500));
        let (models, loaded, compat) = tokio::join!(
            self.list_models(endpoint, timeout),
            self.list_loaded_models(endpoint, loaded_timeout),
            self.check_compat(endpoint, loaded_timeout),
        );
        let elapsed_ms = started.elapsed().as_millis() as u64;

        let mut summary = ProbeSummary {
            supports_compat: Some(compat),
            ..ProbeSummary::default()
        };
        match models {
            Ok(models) => {
                summary.healthy = true;
                summary.supports_primary = Some(true);
                summary.response_time_ms = Some(elapsed_ms);
                summary.models = Some(models);
            }
            Err(e) => {
                summary.supports_primary = Some(false);
                // Compat answering still counts as alive.
                summary.healthy = compat;
                if compat {
                    summary.response_time_ms = Some(elapsed_ms);
                }
                summary.error = Some(e);
            }
        }
        summary.loaded = loaded.ok();
        summary
    }

    fn unary_path(endpoint: Endpoint) -> &'static str {
        match endpoint {
            Endpoint::ListModels => "/api/tags",
            Endpoint::Generate => "/api/generate",
            Endpoint::Chat => "/api/chat",
            Endpoint::Embed => "/api/embeddings",
        }
    }

    /// One unary exchange; the payload passes through verbatim.
    pub async fn execute_unary(
        &self,
        endpoint: &BackendEndpoint,
        operation: Endpoint,
        payload: &serde_json::Value,
        timeout: Duration,
    ) -> Result<serde_json::Value, ProxyError> {
        let builder = match operation {
            Endpoint::ListModels => self.get(endpoint, Self::unary_path(operation)),
            _ => self
                .post(endpoint, Self::unary_path(operation))
                .json(payload),
        };
        let response = self
            .send_checked(builder.timeout(timeout), timeout)
            .await?;
        response
            .json()
            .await
            .map_err(|e| ProxyError::new(ErrorKind::ConnectionReset, e.to_string()))
    }

    /// One streaming exchange. The returned handle yields raw NDJSON chunks
    /// and, after the last one, the bookkeeping outcome.
    pub async fn execute_streaming(
        &self,
        endpoint: &BackendEndpoint,
        operation: Endpoint,
        payload: &serde_json::Value,
        cancel: CancellationToken,
    ) -> Result<StreamHandle, ProxyError> {
        if !self.config.streaming.enabled {
            return Err(ProxyError::new(
                ErrorKind::BadRequest,
                "streaming is disabled",
            ));
        }
        let permit = Arc::clone(&self.stream_permits)
            .try_acquire_owned()
            .map_err(|_| {
                ProxyError::new(ErrorKind::RateLimit, "concurrent stream limit reached")
            })?;

        let started = tokio::time::Instant::now();
        let builder = self
            .post(endpoint, Self::unary_path(operation))
            .json(payload);
        let response = self
            .send_checked(builder, self.config.streaming.timeout)
            .await?;

        let task = StreamTask {
            response,
            buffer_size: self.config.streaming.buffer_size,
            activity_timeout: self.config.streaming.activity_timeout,
            overall_timeout: self.config.streaming.timeout,
            cancel: cancel.clone(),
            started,
        };
        let (receiver, outcome) = task.spawn();

        #[cfg(feature = "metrics")]
        metrics::counter!("herd_streams_total", "server" => endpoint.server_id.clone())
            .increment(1);

        Ok(StreamHandle {
            receiver,
            outcome,
            cancel_guard: cancel.drop_guard(),
            _permit: Some(permit),
        })
    }

    /// Minimal model-level request used by active recovery tests: a
    /// single-token generate that forces the model to answer. Returns the
    /// response time in ms.
    pub async fn recovery_test(
        &self,
        endpoint: &BackendEndpoint,
        model: &str,
        timeout: Duration,
    ) -> Result<u64, ProxyError> {
        let started = tokio::time::Instant::now();
        let payload = serde_json::json!({
            "model": model,
            "prompt": "ping",
            "stream": false,
            "options": { "num_predict": 1 },
        });
        self.execute_unary(endpoint, Endpoint::Generate, &payload, timeout)
            .await?;
        Ok(started.elapsed().as_millis() as u64)
    }

    /// Administrative passthrough: pull a model onto a backend.
    pub async fn pull_model(
        &self,
        endpoint: &BackendEndpoint,
        model: &str,
        timeout: Duration,
    ) -> Result<serde_json::Value, ProxyError> {
        let payload = serde_json::json!({ "name": model, "stream": false });
        let builder = self.post(endpoint, "/api/pull").json(&payload);
        let response = self.send_checked(builder.timeout(timeout), timeout).await?;
        response
            .json()
            .await
            .map_err(|e| ProxyError::new(ErrorKind::ConnectionReset, e.to_string()))
    }

    /// Administrative passthrough: delete a model from a backend.
    pub async fn delete_model(
        &self,
        endpoint: &BackendEndpoint,
        model: &str,
        timeout: Duration,
    ) -> Result<(), ProxyError> {
        let payload = serde_json::json!({ "name": model });
        let mut builder = self
            .client
            .delete(Self::url(endpoint, "/api/delete"))
            .json(&payload);
        if let Some(key) = &endpoint.api_key {
            builder = builder.bearer_auth(key);
        }
        self.send_checked(builder.timeout(timeout), timeout).await?;
        Ok(())
    }
}
