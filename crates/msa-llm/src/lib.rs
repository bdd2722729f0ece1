//! LLM Client — a request/response abstraction turning an ordered sequence
//! of role-tagged messages into a single generated reply, with timeout and
//! token-usage accounting.
//!
//! Two backend variants ship behind the same [`LlmClient`] trait: a remote
//! OpenAI-compatible chat endpoint and a local-model backend (Ollama-style
//! `/api/chat`). The Agent Loop only ever sees the trait.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::json;
use thiserror::Error;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    System,
    User,
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Message {
    pub role: Role,
    pub content: String,
}

impl Message {
    pub fn system(content: impl Into<String>) -> Self {
        Self { role: Role::System, content: content.into() }
    }
    pub fn user(content: impl Into<String>) -> Self {
        Self { role: Role::User, content: content.into() }
    }
    pub fn assistant(content: impl Into<String>) -> Self {
        Self { role: Role::Assistant, content: content.into() }
    }
}

#[derive(Debug, Error)]
pub enum LlmError {
    #[error("llm request timed out")]
    Timeout,
    #[error("llm transport error: {0}")]
    Transport(String),
    #[error("llm backend returned an empty response")]
    EmptyResponse,
}

/// Monotonic token-usage counters. Missing backend usage data leaves the
/// counters unchanged rather than zeroing them out.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct TokenStats {
    pub prompt_tokens: u64,
    pub completion_tokens: u64,
    pub total_tokens: u64,
    pub call_count: u64,
}

#[derive(Default)]
struct TokenStatsCell(Mutex<TokenStats>);

impl TokenStatsCell {
    fn record(&self, usage: Option<(u64, u64, u64)>) {
        let mut stats = self.0.lock().expect("token stats mutex poisoned");
        stats.call_count += 1;
        if let Some((prompt, completion, total)) = usage {
            stats.prompt_tokens += prompt;
            stats.completion_tokens += completion;
            stats.total_tokens += total;
        }
    }

    fn snapshot(&self) -> TokenStats {
        *self.0.lock().expect("token stats mutex poisoned")
    }

    fn reset(&self) {
        *self.0.lock().expect("token stats mutex poisoned") = TokenStats::default();
    }
}

/// Contract shared by every backend. `generate` never blocks past `timeout`.
#[async_trait]
pub trait LlmClient: Send + Sync {
    async fn generate(
        &self,
        messages: &[Message],
        temperature: f32,
        max_tokens: Option<u32>,
        timeout: Duration,
    ) -> Result<String, LlmError>;

    fn token_stats(&self) -> TokenStats;
    fn reset_token_stats(&self);
}

// ── OpenAI-compatible backend ────────────────────────────────────────────────

pub struct OpenAiCompatClient {
    http: reqwest::Client,
    base_url: String,
    api_key: Option<String>,
    model: String,
    stats: TokenStatsCell,
}

impl OpenAiCompatClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            api_key,
            model: model.into(),
            stats: TokenStatsCell::default(),
        }
    }
}

#[derive(Deserialize)]
struct OpenAiUsage {
    #[serde(default)]
    prompt_tokens: u64,
    #[serde(default)]
    completion_tokens: u64,
    #[serde(default)]
    total_tokens: u64,
}

#[derive(Deserialize)]
struct OpenAiChoiceMessage {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Deserialize)]
struct OpenAiChoice {
    message: OpenAiChoiceMessage,
}

#[derive(Deserialize)]
struct OpenAiChatResponse {
    #[serde(default)]
    choices: Vec<OpenAiChoice>,
    #[serde(default)]
    usage: Option<OpenAiUsage>,
}

#[async_trait]
impl LlmClient for OpenAiCompatClient {
    async fn generate(
        &self,
        messages: &[Message],
        temperature: f32,
        max_tokens: Option<u32>,
        timeout: Duration,
    ) -> Result<String, LlmError> {
        let endpoint = format!("{}/chat/completions", self.base_url.trim_end_matches('/'));
        let mut body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": temperature,
        });
        if let Some(max_tokens) = max_tokens {
            body["max_tokens"] = json!(max_tokens);
        }

        let mut req = self.http.post(&endpoint).json(&body);
        if let Some(key) = &self.api_key {
            req = req.bearer_auth(key);
        }

        debug!(endpoint, "sending openai-compatible chat request");
        let send = tokio::time::timeout(timeout, req.send());
        let response = match send.await {
            Ok(Ok(resp)) => resp,
            Ok(Err(err)) => return Err(LlmError::Transport(err.to_string())),
            Err(_) => return Err(LlmError::Timeout),
        };

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Transport(format!("http {status}: {text}")));
        }

        let parsed: OpenAiChatResponse = response
            .json()
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        let content = parsed
            .choices
            .first()
            .and_then(|choice| choice.message.content.clone())
            .unwrap_or_default();

        let usage = parsed
            .usage
            .map(|u| (u.prompt_tokens, u.completion_tokens, u.total_tokens));
        self.stats.record(usage);

        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(content)
    }

    fn token_stats(&self) -> TokenStats {
        self.stats.snapshot()
    }

    fn reset_token_stats(&self) {
        self.stats.reset();
    }
}

// ── Local-model backend (Ollama-style `/api/chat`) ───────────────────────────

pub struct LocalModelClient {
    http: reqwest::Client,
    base_url: String,
    model: String,
    stats: TokenStatsCell,
}

impl LocalModelClient {
    pub fn new(base_url: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            http: reqwest::Client::new(),
            base_url: base_url.into(),
            model: model.into(),
            stats: TokenStatsCell::default(),
        }
    }
}

#[derive(Deserialize)]
struct OllamaMessage {
    #[serde(default)]
    content: String,
}

#[derive(Deserialize)]
struct OllamaChatResponse {
    #[serde(default)]
    message: Option<OllamaMessage>,
    #[serde(default)]
    prompt_eval_count: Option<u64>,
    #[serde(default)]
    eval_count: Option<u64>,
}

#[async_trait]
impl LlmClient for LocalModelClient {
    async fn generate(
        &self,
        messages: &[Message],
        temperature: f32,
        max_tokens: Option<u32>,
        timeout: Duration,
    ) -> Result<String, LlmError> {
        let endpoint = format!("{}/api/chat", self.base_url.trim_end_matches('/'));
        let mut options = json!({ "temperature": temperature });
        if let Some(max_tokens) = max_tokens {
            options["num_predict"] = json!(max_tokens);
        }
        let body = json!({
            "model": self.model,
            "messages": messages,
            "stream": false,
            "options": options,
        });

        debug!(endpoint, "sending local-model chat request");
        let send = tokio::time::timeout(timeout, self.http.post(&endpoint).json(&body).send());
        let response = match send.await {
            Ok(Ok(resp)) => resp,
            Ok(Err(err)) => return Err(LlmError::Transport(err.to_string())),
            Err(_) => return Err(LlmError::Timeout),
        };

        if !response.status().is_success() {
            let status = response.status();
            let text = response.text().await.unwrap_or_default();
            return Err(LlmError::Transport(format!("http {status}: {text}")));
        }

        let parsed: OllamaChatResponse = response
            .json()
            .await
            .map_err(|err| LlmError::Transport(err.to_string()))?;

        let content = parsed.message.map(|m| m.content).unwrap_or_default();

        match (parsed.prompt_eval_count, parsed.eval_count) {
            (Some(p), Some(c)) => self.stats.record(Some((p, c, p + c))),
            _ => {
                warn!("local model backend returned no usage accounting");
                self.stats.record(None);
            }
        }

        if content.trim().is_empty() {
            return Err(LlmError::EmptyResponse);
        }
        Ok(content)
    }

    fn token_stats(&self) -> TokenStats {
        self.stats.snapshot()
    }

    fn reset_token_stats(&self) {
        self.stats.reset();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn token_stats_accumulate_across_calls() {
        let cell = TokenStatsCell::default();
        cell.record(Some((10, 5, 15)));
        cell.record(Some((3, 2, 5)));
        let snap = cell.snapshot();
        assert_eq!(snap.prompt_tokens, 13);
        assert_eq!(snap.completion_tokens, 7);
        assert_eq!(snap.total_tokens, 20);
        assert_eq!(snap.call_count, 2);
    }

    #[test]
    fn missing_usage_leaves_counters_unchanged_but_counts_the_call() {
        let cell = TokenStatsCell::default();
        cell.record(Some((10, 5, 15)));
        cell.record(None);
        let snap = cell.snapshot();
        assert_eq!(snap.prompt_tokens, 10);
        assert_eq!(snap.completion_tokens, 5);
        assert_eq!(snap.call_count, 2);
    }

    #[test]
    fn reset_zeroes_everything() {
        let cell = TokenStatsCell::default();
        cell.record(Some((10, 5, 15)));
        cell.reset();
        let snap = cell.snapshot();
        assert_eq!(snap.prompt_tokens, 0);
        assert_eq!(snap.call_count, 0);
    }

    #[tokio::test]
    async fn timeout_is_distinguishable_from_transport() {
        // Hitting a non-routable address should either time out immediately
        // (timeout=0) or fail as a transport error — both are acceptable,
        // but it must never silently succeed.
        let client = OpenAiCompatClient::new("http://127.0.0.1:9", "test-model", None);
        let messages = vec![Message::user("hi")];
        let result = client
            .generate(&messages, 0.5, None, Duration::from_millis(1))
            .await;
        assert!(matches!(
            result,
            Err(LlmError::Timeout) | Err(LlmError::Transport(_))
        ));
    }
}
