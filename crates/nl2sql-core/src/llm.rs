//! `StructuredLLM`: the core's only interface to a language-model provider.
//!
//! The core never parses free-form text. Every LLM-touching node — the
//! Decomposer, the ASTPlanner, the Refiner, the Answer Synthesizer — invokes
//! a prompt against a declared response schema and gets back a typed object
//! or an error. Concrete providers (Anthropic, OpenAI, local models, ...) are
//! an external collaborator; this trait is the seam.

use async_trait::async_trait;
use serde::de::DeserializeOwned;

use crate::error::{Nl2SqlError, Result};

/// A single structured invocation: `prompt` plus the JSON schema the
/// response must validate against. Implementations MUST reject responses
/// carrying fields outside the schema rather than silently dropping them —
/// callers rely on `serde`'s `deny_unknown_fields` doing that rejection for
/// them when they deserialize into a strict type.
#[async_trait]
pub trait StructuredLlm: Send + Sync {
    /// Raw JSON invocation. Higher-level callers should prefer
    /// [`StructuredLlmExt::invoke_typed`], which deserializes the result.
    async fn invoke(&self, prompt: &str, response_schema: &serde_json::Value) -> Result<serde_json::Value>;
}

#[async_trait]
pub trait StructuredLlmExt: StructuredLlm {
    async fn invoke_typed<T: DeserializeOwned + Send>(
        &self,
        prompt: &str,
        response_schema: &serde_json::Value,
    ) -> Result<T> {
        let value = self.invoke(prompt, response_schema).await?;
        Ok(serde_json::from_value(value)?)
    }
}

impl<T: StructuredLlm + ?Sized> StructuredLlmExt for T {}

/// HTTP-backed `StructuredLlm`: posts `{prompt, schema}` to a configured
/// endpoint and expects the structured JSON value back directly, the
/// provider having already done schema-constrained decoding on its end.
/// Concrete vendor protocols (OpenAI tool-calling, Anthropic tool-use, ...)
/// live behind that endpoint, not in this crate.
pub struct HttpStructuredLlm {
    client: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl HttpStructuredLlm {
    pub fn new(endpoint: impl Into<String>, api_key: Option<String>) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(concat!("nl2sql/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("failed to build reqwest client");
        Self { client, endpoint: endpoint.into(), api_key }
    }

    pub fn from_env() -> Option<Self> {
        let endpoint = std::env::var("NL2SQL_LLM_ENDPOINT").ok()?;
        let api_key = std::env::var("NL2SQL_LLM_API_KEY").ok();
        Some(Self::new(endpoint, api_key))
    }
}

#[async_trait]
impl StructuredLlm for HttpStructuredLlm {
    async fn invoke(&self, prompt: &str, response_schema: &serde_json::Value) -> Result<serde_json::Value> {
        let mut request = self
            .client
            .post(&self.endpoint)
            .json(&serde_json::json!({"prompt": prompt, "schema": response_schema}));
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| Nl2SqlError::LlmRequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(Nl2SqlError::LlmRequestFailed(format!("provider returned status {}", response.status())));
        }

        response.json::<serde_json::Value>().await.map_err(|e| Nl2SqlError::LlmRequestFailed(e.to_string()))
    }
}
