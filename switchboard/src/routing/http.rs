//! HTTP client for OpenAI-compatible chat completion endpoints
//! (vLLM, llama.cpp server, hosted OpenAI-style APIs).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde_json::{json, Value};

use super::error::ProviderError;
use super::provider::{ProviderClient, ProviderReply};

/// Default probe bound when the health monitor is not the caller.
const DEFAULT_PROBE_TIMEOUT: Duration = Duration::from_secs(2);

pub struct OpenAiCompatibleClient {
    name: String,
    base_url: String,
    model: String,
    api_key: Option<String>,
    cost_per_1k_tokens: f64,
    probe_timeout: Duration,
    http: reqwest::Client,
}

impl OpenAiCompatibleClient {
    pub fn new(
        name: impl Into<String>,
        base_url: impl Into<String>,
        model: impl Into<String>,
        cost_per_1k_tokens: f64,
    ) -> Result<Self, ProviderError> {
        let http = reqwest::Client::builder()
            .build()
            .map_err(|e| ProviderError::Connection(format!("failed to build HTTP client: {e}")))?;
        Ok(Self {
            name: name.into(),
            base_url: base_url.into().trim_end_matches('/').to_string(),
            model: model.into(),
            api_key: None,
            cost_per_1k_tokens,
            probe_timeout: DEFAULT_PROBE_TIMEOUT,
            http,
        })
    }

    pub fn with_api_key(mut self, api_key: impl Into<String>) -> Self {
        self.api_key = Some(api_key.into());
        self
    }

    pub fn with_probe_timeout(mut self, timeout: Duration) -> Self {
        self.probe_timeout = timeout;
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn authorized(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.api_key {
            Some(key) => request.bearer_auth(key),
            None => request,
        }
    }
}

fn map_transport_error(err: reqwest::Error, timeout: Duration) -> ProviderError {
    if err.is_timeout() {
        ProviderError::Timeout(timeout)
    } else if err.is_connect() {
        ProviderError::Connection(err.to_string())
    } else if err.is_decode() {
        ProviderError::InvalidResponse(err.to_string())
    } else {
        ProviderError::Unavailable(err.to_string())
    }
}

/// Extract content and token usage from a chat-completions body.
pub fn parse_completion(body: &Value) -> Result<(String, u32), ProviderError> {
    let content = body["choices"][0]["message"]["content"]
        .as_str()
        .or_else(|| body["choices"][0]["text"].as_str())
        .ok_or_else(|| ProviderError::InvalidResponse("response has no choices".into()))?
        .to_string();
    let tokens = body["usage"]["total_tokens"]
        .as_u64()
        .or_else(|| {
            let prompt = body["usage"]["prompt_tokens"].as_u64()?;
            let completion = body["usage"]["completion_tokens"].as_u64()?;
            Some(prompt + completion)
        })
        .unwrap_or(0);
    Ok((content, u32::try_from(tokens).unwrap_or(u32::MAX)))
}

#[async_trait]
impl ProviderClient for OpenAiCompatibleClient {
    fn name(&self) -> &str {
        &self.name
    }

    fn cost_per_1k_tokens(&self) -> f64 {
        self.cost_per_1k_tokens
    }

    async fn send(
        &self,
        prompt: &str,
        max_tokens: Option<u32>,
    ) -> Result<ProviderReply, ProviderError> {
        let start = Instant::now();
        let mut body = json!({
            "model": self.model,
            "messages": [{ "role": "user", "content": prompt }],
        });
        if let Some(max_tokens) = max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let url = format!("{}/v1/chat/completions", self.base_url);
        let response = self
            .authorized(self.http.post(&url))
            .json(&body)
            .send()
            .await
            .map_err(|e| map_transport_error(e, start.elapsed()))?;

        let status = response.status();
        if !status.is_success() {
            let message = response.text().await.unwrap_or_default();
            return Err(ProviderError::Status {
                status: status.as_u16(),
                message,
            });
        }

        let json: Value = response
            .json()
            .await
            .map_err(|e| ProviderError::InvalidResponse(e.to_string()))?;
        let (content, tokens_used) = parse_completion(&json)?;

        Ok(ProviderReply {
            content,
            tokens_used,
            latency_ms: start.elapsed().as_millis() as u64,
        })
    }

    async fn probe(&self) -> Result<(), ProviderError> {
        let url = format!("{}/health", self.base_url);
        // `timeout` on the request covers headers and body.
        let response = self
            .authorized(self.http.get(&url))
            .timeout(self.probe_timeout)
            .send()
            .await
            .map_err(|e| map_transport_error(e, self.probe_timeout))?;
        let status = response.status();
        if status.is_success() {
            Ok(())
        } else {
            Err(ProviderError::Status {
                status: status.as_u16(),
                message: format!("health check returned {status}"),
            })
        }
    }
}
