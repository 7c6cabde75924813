//! Semantic extraction of work-order fields.
//!
//! [`FieldExtractor`] turns a document's OCR text into a flat JSON object of
//! named fields. The dispatcher picks an endpoint identifier per company from
//! the routing table and passes it through; extractors are free to ignore it.
//!
//! - [`LlmFieldExtractor`] prompts an LLM through edgequake-llm with a fixed
//!   field schema. One prompt serves every company.
//! - [`HttpFieldExtractor`] posts the text to a routed extraction service at
//!   `{base_url}/{endpoint}`.

use crate::error::{DispatchStage, IntakeError, Result};
use crate::prompts::{extraction_request, EXTRACTION_SYSTEM_PROMPT};
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::{Map, Value};
use std::sync::Arc;
use tracing::debug;

/// Environment variable holding the bearer token for [`HttpFieldExtractor`].
pub const EXTRACTION_API_KEY_ENV: &str = "INTAKE_EXTRACTION_API_KEY";

/// Default model when a provider is picked from `OPENAI_API_KEY`.
pub const DEFAULT_MODEL: &str = "gpt-4.1-nano";

/// Completion budget for one extraction. A work-order record is a few dozen
/// short fields.
const EXTRACTION_MAX_TOKENS: usize = 500;

/// Extracts structured fields from recognised text.
#[async_trait]
pub trait FieldExtractor: Send + Sync {
    /// `endpoint` is the routing identifier for the document's company.
    async fn extract(&self, endpoint: &str, text: &str) -> Result<Map<String, Value>>;
}

fn extraction_failed(detail: impl Into<String>) -> IntakeError {
    IntakeError::DispatchFailed {
        stage: DispatchStage::Extraction,
        detail: detail.into(),
    }
}

// ── LLM extractor ────────────────────────────────────────────────────────

/// [`FieldExtractor`] prompting an edgequake-llm provider.
pub struct LlmFieldExtractor {
    provider: Arc<dyn LLMProvider>,
}

impl std::fmt::Debug for LlmFieldExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LlmFieldExtractor")
            .field("max_tokens", &EXTRACTION_MAX_TOKENS)
            .finish_non_exhaustive()
    }
}

impl LlmFieldExtractor {
    /// Wrap a pre-built provider.
    pub fn new(provider: Arc<dyn LLMProvider>) -> Self {
        Self { provider }
    }

    /// Build a named provider (`"openai"`, `"anthropic"`, …). The API key is
    /// read from the provider's usual environment variable.
    pub fn from_name(provider: &str, model: &str) -> Result<Self> {
        let provider = ProviderFactory::create_llm_provider(provider, model).map_err(|e| {
            IntakeError::InvalidConfig(format!(
                "LLM provider '{}' not configured: {}",
                provider, e
            ))
        })?;
        Ok(Self::new(provider))
    }

    /// Pick a provider from the environment.
    ///
    /// `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` win when both are set,
    /// then `OPENAI_API_KEY` with [`DEFAULT_MODEL`], then whatever
    /// [`ProviderFactory::from_env`] detects.
    pub fn from_env() -> Result<Self> {
        if let (Ok(prov), Ok(model)) = (
            std::env::var("EDGEQUAKE_LLM_PROVIDER"),
            std::env::var("EDGEQUAKE_MODEL"),
        ) {
            if !prov.is_empty() && !model.is_empty() {
                return Self::from_name(&prov, &model);
            }
        }

        if std::env::var("OPENAI_API_KEY").is_ok_and(|k| !k.is_empty()) {
            return Self::from_name("openai", DEFAULT_MODEL);
        }

        let (provider, _embedding) = ProviderFactory::from_env().map_err(|e| {
            IntakeError::InvalidConfig(format!(
                "No LLM provider could be auto-detected from environment. \
                 Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or EDGEQUAKE_LLM_PROVIDER. Error: {}",
                e
            ))
        })?;
        Ok(Self::new(provider))
    }
}

#[async_trait]
impl FieldExtractor for LlmFieldExtractor {
    async fn extract(&self, endpoint: &str, text: &str) -> Result<Map<String, Value>> {
        let messages = vec![
            ChatMessage::system(EXTRACTION_SYSTEM_PROMPT),
            ChatMessage::user(extraction_request(text)),
        ];
        let options = extraction_options();

        let response = self
            .provider
            .chat(&messages, Some(&options))
            .await
            .map_err(|e| extraction_failed(format!("LLM call failed: {}", e)))?;
        debug!(
            "Extraction for '{}': {} input tokens, {} output tokens",
            endpoint, response.prompt_tokens, response.completion_tokens
        );
        parse_fields(&response.content)
    }
}

/// Deterministic, bounded completion settings for field extraction.
fn extraction_options() -> CompletionOptions {
    CompletionOptions {
        temperature: Some(0.0),
        max_tokens: Some(EXTRACTION_MAX_TOKENS),
        ..Default::default()
    }
}

static RE_OUTER_FENCES: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?s)^```(?:json)?\s*\n(.*)\n```\s*$").unwrap());

/// Parse a model reply into a JSON object.
///
/// Models sometimes wrap the object in a ```json fence despite the prompt;
/// the fence is stripped. Anything that is not a JSON object is an error.
pub fn parse_fields(raw: &str) -> Result<Map<String, Value>> {
    let trimmed = raw.trim();
    let body = RE_OUTER_FENCES
        .captures(trimmed)
        .and_then(|c| c.get(1))
        .map_or(trimmed, |m| m.as_str());

    match serde_json::from_str::<Value>(body) {
        Ok(Value::Object(map)) => Ok(map),
        Ok(other) => Err(extraction_failed(format!(
            "expected a JSON object, got {}",
            json_kind(&other)
        ))),
        Err(e) => Err(extraction_failed(format!("reply is not valid JSON: {}", e))),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── HTTP extractor ───────────────────────────────────────────────────────

/// [`FieldExtractor`] calling a routed extraction service.
///
/// Request: `POST {base_url}/{endpoint}` with `{"endpoint": ..., "text": ...}`
/// and an optional bearer token. The reply must be a JSON object; when it
/// carries a `fields` object, that object is the result.
#[derive(Clone)]
pub struct HttpFieldExtractor {
    client: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
}

impl std::fmt::Debug for HttpFieldExtractor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpFieldExtractor")
            .field("base_url", &self.base_url)
            .field("api_key", &self.api_key.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

impl HttpFieldExtractor {
    pub fn new(base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
        }
    }

    /// Like [`HttpFieldExtractor::new`], with the key from
    /// [`EXTRACTION_API_KEY_ENV`].
    pub fn from_env(base_url: impl Into<String>) -> Self {
        let key = std::env::var(EXTRACTION_API_KEY_ENV)
            .ok()
            .filter(|k| !k.is_empty());
        Self::new(base_url, key)
    }

    fn url_for(&self, endpoint: &str) -> String {
        format!("{}/{}", self.base_url.trim_end_matches('/'), endpoint)
    }
}

#[async_trait]
impl FieldExtractor for HttpFieldExtractor {
    async fn extract(&self, endpoint: &str, text: &str) -> Result<Map<String, Value>> {
        let url = self.url_for(endpoint);
        let mut request = self
            .client
            .post(&url)
            .json(&serde_json::json!({ "endpoint": endpoint, "text": text }));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| extraction_failed(format!("{}: {}", url, e)))?;
        let mut body: Map<String, Value> = response
            .json()
            .await
            .map_err(|e| extraction_failed(format!("{}: reply is not a JSON object: {}", url, e)))?;

        debug!("Extraction service {} returned {} keys", url, body.len());
        match body.remove("fields") {
            Some(Value::Object(fields)) => Ok(fields),
            Some(other) => {
                body.insert("fields".into(), other);
                Ok(body)
            }
            None => Ok(body),
        }
    }
}
