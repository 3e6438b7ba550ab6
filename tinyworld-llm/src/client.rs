//! LLM Client: unified interface for Ollama and OpenAI-compatible backends.

use std::time::{Duration, Instant};

use reqwest::{Client, RequestBuilder};
use serde_json::{Value, json};
use tracing::{debug, warn};

use crate::error::LlmError;
use crate::types::{LlmRequest, LlmResponse, ModelRole};

/// Provider backend for LLM inference.
#[derive(Debug, Clone)]
pub enum LlmProvider {
    /// Ollama running locally (recommended).
    Ollama {
        /// e.g. `http://localhost:11434`
        base_url: String,
    },
    /// OpenAI-compatible chat completions API.
    OpenAiCompatible {
        /// API root without the `/v1` suffix.
        base_url: String,
        /// Bearer token.
        api_key: String,
    },
    /// No LLM available; every call fails and callers fall back.
    None,
}

impl LlmProvider {
    /// Build a provider from its configured name.
    ///
    /// # Errors
    ///
    /// `ConfigError` for an unknown name, or for `openai` without a key.
    pub fn from_name(
        name: &str,
        base_url: &str,
        api_key: Option<&str>,
    ) -> Result<Self, LlmError> {
        let base_url = base_url.trim_end_matches('/').to_string();
        match name {
            "ollama" => Ok(Self::Ollama { base_url }),
            "openai" => {
                let api_key = api_key
                    .filter(|k| !k.is_empty())
                    .ok_or_else(|| LlmError::ConfigError("openai provider needs an api_key".into()))?;
                Ok(Self::OpenAiCompatible {
                    base_url,
                    api_key: api_key.to_string(),
                })
            }
            "none" => Ok(Self::None),
            other => Err(LlmError::ConfigError(format!("unknown LLM provider: {other}"))),
        }
    }
}

/// The main LLM client that routes requests to the appropriate backend.
pub struct LlmClient {
    provider: LlmProvider,
    http: Client,
    text_model: String,
    vision_model: String,
    max_retries: u32,
}

impl LlmClient {
    /// Create a new LLM client.
    #[must_use]
    pub fn new(
        provider: LlmProvider,
        text_model: impl Into<String>,
        vision_model: impl Into<String>,
        max_retries: u32,
    ) -> Self {
        Self {
            provider,
            http: Client::new(),
            text_model: text_model.into(),
            vision_model: vision_model.into(),
            max_retries,
        }
    }

    /// Create a client with no LLM backend (all calls fail → fallback).
    #[must_use]
    pub fn none() -> Self {
        Self::new(LlmProvider::None, "", "", 0)
    }

    fn model_for(&self, role: ModelRole) -> &str {
        match role {
            ModelRole::Text => &self.text_model,
            ModelRole::Vision => &self.vision_model,
        }
    }

    /// Generate a response from the LLM.
    ///
    /// # Errors
    ///
    /// `Unavailable` without a provider, `Timeout` when every attempt timed
    /// out, `RetriesExhausted` otherwise.
    pub async fn generate(&self, request: &LlmRequest) -> Result<LlmResponse, LlmError> {
        let model = self.model_for(request.role).to_string();
        match &self.provider {
            LlmProvider::None => Err(LlmError::Unavailable("No LLM provider configured".into())),
            LlmProvider::Ollama { base_url } => {
                let url = format!("{base_url}/api/generate");
                let body = ollama_body(&model, request);
                self.send_with_retries(request, &model, || self.http.post(&url).json(&body), |v| {
                    let text = v["response"].as_str().unwrap_or_default().to_string();
                    let tokens = v["eval_count"].as_u64().unwrap_or(0);
                    (text, tokens)
                })
                .await
            }
            LlmProvider::OpenAiCompatible { base_url, api_key } => {
                let url = format!("{base_url}/v1/chat/completions");
                let body = openai_body(&model, request);
                self.send_with_retries(
                    request,
                    &model,
                    || {
                        self.http
                            .post(&url)
                            .header("Authorization", format!("Bearer {api_key}"))
                            .json(&body)
                    },
                    |v| {
                        let text = v["choices"][0]["message"]["content"]
                            .as_str()
                            .unwrap_or_default()
                            .to_string();
                        let tokens = v["usage"]["completion_tokens"].as_u64().unwrap_or(0);
                        (text, tokens)
                    },
                )
                .await
            }
        }
    }

    async fn send_with_retries<B, E>(
        &self,
        request: &LlmRequest,
        model: &str,
        build: B,
        extract: E,
    ) -> Result<LlmResponse, LlmError>
    where
        B: Fn() -> RequestBuilder,
        E: Fn(&Value) -> (String, u64),
    {
        let mut last_error = String::new();
        let mut timeouts = 0u32;
        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                debug!(attempt = attempt + 1, max = self.max_retries + 1, "Retrying LLM call");
            }

            let start = Instant::now();
            let result = build()
                .timeout(Duration::from_millis(request.timeout_ms))
                .send()
                .await;
            let latency_ms = u64::try_from(start.elapsed().as_millis()).unwrap_or(u64::MAX);

            match result {
                Ok(resp) if resp.status().is_success() => {
                    let value: Value = resp
                        .json()
                        .await
                        .map_err(|e| LlmError::ParseError(e.to_string()))?;
                    let (text, tokens) = extract(&value);
                    return Ok(LlmResponse {
                        text,
                        tokens_generated: u32::try_from(tokens).unwrap_or(u32::MAX),
                        latency_ms,
                        model: model.to_string(),
                    });
                }
                Ok(resp) => {
                    let status = resp.status();
                    last_error = format!("HTTP {status}: {}", resp.text().await.unwrap_or_default());
                    warn!(model, error = %last_error, "LLM provider returned error");
                }
                Err(e) => {
                    if e.is_timeout() {
                        timeouts += 1;
                        warn!(model, timeout_ms = request.timeout_ms, "LLM request timed out");
                    } else {
                        warn!(model, error = %e, "LLM request failed");
                    }
                    last_error = e.to_string();
                }
            }
        }

        if timeouts == self.max_retries + 1 {
            return Err(LlmError::Timeout(request.timeout_ms));
        }
        Err(LlmError::RetriesExhausted {
            attempts: self.max_retries + 1,
            last_error,
        })
    }

    /// Parse the first JSON object found in a raw LLM response.
    ///
    /// Small models often wrap JSON in prose or code fences; anything around
    /// the first balanced `{…}` is ignored.
    ///
    /// # Errors
    ///
    /// `ParseError` when no object is found or it does not match `T`.
    pub fn parse_structured<T: serde::de::DeserializeOwned>(
        &self,
        response: &LlmResponse,
    ) -> Result<T, LlmError> {
        parse_json_object(&response.text)
    }

    /// Check if the LLM client has a backend configured.
    #[must_use]
    pub fn is_available(&self) -> bool {
        !matches!(self.provider, LlmProvider::None)
    }
}

fn ollama_body(model: &str, request: &LlmRequest) -> Value {
    let mut body = json!({
        "model": model,
        "system": request.system,
        "prompt": request.user,
        "stream": false,
        "options": {
            "temperature": request.temperature,
            "num_predict": request.max_tokens,
        }
    });
    if !request.images.is_empty() {
        let images: Vec<&str> = request.images.iter().map(|i| i.data_base64.as_str()).collect();
        body["images"] = json!(images);
    }
    if request.json_mode {
        body["format"] = json!("json");
    }
    body
}

fn openai_body(model: &str, request: &LlmRequest) -> Value {
    let user_content = if request.images.is_empty() {
        json!(request.user)
    } else {
        let mut parts = vec![json!({ "type": "text", "text": request.user })];
        parts.extend(request.images.iter().map(|i| {
            json!({ "type": "image_url", "image_url": { "url": i.data_url() } })
        }));
        Value::Array(parts)
    };
    let mut body = json!({
        "model": model,
        "messages": [
            { "role": "system", "content": request.system },
            { "role": "user", "content": user_content },
        ],
        "max_tokens": request.max_tokens,
        "temperature": request.temperature,
    });
    if request.json_mode {
        body["response_format"] = json!({ "type": "json_object" });
    }
    body
}

/// Slice of `text` covering the first balanced JSON object, if any.
#[must_use]
pub fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;
    for (offset, ch) in text[start..].char_indices() {
        if in_string {
            match ch {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            continue;
        }
        match ch {
            '"' => in_string = true,
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..=start + offset]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Deserialize the first JSON object in `text`.
///
/// # Errors
///
/// `ParseError` when no object is present or it does not match `T`.
pub fn parse_json_object<T: serde::de::DeserializeOwned>(text: &str) -> Result<T, LlmError> {
    let raw = extract_json_object(text)
        .ok_or_else(|| LlmError::ParseError(format!("no JSON object in '{text}'")))?;
    serde_json::from_str(raw)
        .map_err(|e| LlmError::ParseError(format!("JSON parse error: {e}; raw text: '{raw}'")))
}
