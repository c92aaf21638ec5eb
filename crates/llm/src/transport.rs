//! HTTP transport to the Gemini REST API
//!
//! The client core is transport-agnostic so tests can script responses;
//! `HttpTransport` is the production implementation over reqwest.

use async_trait::async_trait;
use podgraph_core::{GenerationOptions, LlmError, LlmResult};
use serde_json::{json, Value};
use std::time::Duration;

/// One network round-trip per method; quota, retries, and key selection all
/// live above this seam.
#[async_trait]
pub trait GeminiTransport: Send + Sync {
    /// Text completion.
    async fn generate(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
        opts: &GenerationOptions,
    ) -> LlmResult<String>;

    /// Audio transcription: the prompt plus a file reference.
    async fn generate_with_audio(
        &self,
        api_key: &str,
        model: &str,
        audio_uri: &str,
        prompt: &str,
        opts: &GenerationOptions,
    ) -> LlmResult<String>;

    /// Dense embedding.
    async fn embed(&self, api_key: &str, model: &str, text: &str) -> LlmResult<Vec<f32>>;
}

/// Production transport over the `generativelanguage` REST endpoints.
pub struct HttpTransport {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpTransport {
    pub fn new(endpoint: &str, timeout: Duration) -> LlmResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| LlmError::Configuration(format!("failed to create HTTP client: {e}")))?;
        Ok(Self {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
        })
    }

    fn url(&self, model: &str, method: &str, api_key: &str) -> String {
        format!("{}/models/{model}:{method}?key={api_key}", self.endpoint)
    }

    async fn post(&self, url: &str, body: Value) -> LlmResult<Value> {
        let response = self
            .client
            .post(url)
            .json(&body)
            .send()
            .await
            .map_err(|e| LlmError::Transient(e.to_string()))?;

        let status = response.status();
        if status.as_u16() == 429 {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::QuotaExceeded(format!("http 429: {detail}")));
        }
        if status.is_server_error() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::Transient(format!("server error {status}: {detail}")));
        }
        if !status.is_success() {
            let detail = response.text().await.unwrap_or_default();
            return Err(LlmError::InvalidResponse(format!("http {status}: {detail}")));
        }

        response
            .json()
            .await
            .map_err(|e| LlmError::InvalidResponse(e.to_string()))
    }

    fn extract_text(body: &Value) -> LlmResult<String> {
        let parts = body
            .pointer("/candidates/0/content/parts")
            .and_then(Value::as_array)
            .ok_or_else(|| LlmError::InvalidResponse("no candidates in response".into()))?;
        let text: String = parts
            .iter()
            .filter_map(|p| p.get("text").and_then(Value::as_str))
            .collect();
        if text.is_empty() {
            return Err(LlmError::InvalidResponse("empty completion".into()));
        }
        Ok(text)
    }

    fn generation_config(opts: &GenerationOptions) -> Value {
        json!({
            "maxOutputTokens": opts.max_output_tokens,
            "temperature": opts.temperature,
        })
    }
}

#[async_trait]
impl GeminiTransport for HttpTransport {
    async fn generate(
        &self,
        api_key: &str,
        model: &str,
        prompt: &str,
        opts: &GenerationOptions,
    ) -> LlmResult<String> {
        let body = json!({
            "contents": [{"parts": [{"text": prompt}]}],
            "generationConfig": Self::generation_config(opts),
        });
        let response = self.post(&self.url(model, "generateContent", api_key), body).await?;
        Self::extract_text(&response)
    }

    async fn generate_with_audio(
        &self,
        api_key: &str,
        model: &str,
        audio_uri: &str,
        prompt: &str,
        opts: &GenerationOptions,
    ) -> LlmResult<String> {
        let body = json!({
            "contents": [{
                "parts": [
                    {"file_data": {"file_uri": audio_uri}},
                    {"text": prompt},
                ]
            }],
            "generationConfig": Self::generation_config(opts),
        });
        let response = self.post(&self.url(model, "generateContent", api_key), body).await?;
        Self::extract_text(&response)
    }

    async fn embed(&self, api_key: &str, model: &str, text: &str) -> LlmResult<Vec<f32>> {
        let body = json!({
            "content": {"parts": [{"text": text}]},
        });
        let response = self.post(&self.url(model, "embedContent", api_key), body).await?;
        let values = response
            .pointer("/embedding/values")
            .and_then(Value::as_array)
            .ok_or_else(|| LlmError::InvalidResponse("no embedding in response".into()))?;
        Ok(values
            .iter()
            .filter_map(Value::as_f64)
            .map(|v| v as f32)
            .collect())
    }
}
