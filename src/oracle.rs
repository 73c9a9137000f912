//! # Oracle Abstraction Layer
//!
//! The reasoning model behind decomposition and subtask inference is a pure
//! function boundary: `infer(prompt) -> text`. The engine never inspects how
//! the text is produced, and treats timeouts or empty responses as a
//! recoverable failure of the calling subtask.
//!
//! | Oracle | Use case | Requires |
//! |--------|----------|----------|
//! | `http` | Production (OpenAI-compatible API) | `TABQA_API_KEY` env var |
//! | `mock` | Testing | Nothing |

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};

/// Default endpoint for the HTTP oracle (OpenAI-compatible)
const DEFAULT_API_URL: &str = "https://api.openai.com/v1/chat/completions";

/// Core trait every reasoning backend must implement
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Backend name (e.g. "http", "mock")
    fn name(&self) -> &str;

    /// Run one prompt through the backend and return its text output
    async fn infer(&self, prompt: &str) -> Result<String>;

    /// Check if this backend is usable (e.g. API key set)
    fn is_available(&self) -> bool {
        true
    }
}

// ============================================================================
// MOCK ORACLE
// ============================================================================

/// One scripted turn for the mock oracle
#[derive(Debug, Clone)]
enum Scripted {
    Reply(String),
    Failure(String),
}

/// Mock oracle that returns predefined responses
///
/// Responses are consumed FIFO; once the queue is empty the default response
/// is returned. Scripted failures let tests exercise the partial-failure and
/// cancellation paths without a real backend.
pub struct MockOracle {
    /// Queue of scripted turns (FIFO)
    script: Arc<Mutex<Vec<Scripted>>>,
    /// Default response when the queue is empty
    default_response: String,
    /// Every prompt seen, for assertions
    requests: Arc<Mutex<Vec<String>>>,
}

impl MockOracle {
    pub fn new() -> Self {
        Self {
            script: Arc::new(Mutex::new(vec![])),
            default_response: "Mock response".to_string(),
            requests: Arc::new(Mutex::new(vec![])),
        }
    }

    /// Create with a queue of replies
    pub fn with_responses(responses: Vec<String>) -> Self {
        let oracle = Self::new();
        {
            let mut script = oracle.script.lock().unwrap();
            script.extend(responses.into_iter().map(Scripted::Reply));
        }
        oracle
    }

    /// Set the default response used once the queue is empty
    pub fn with_default(mut self, response: impl Into<String>) -> Self {
        self.default_response = response.into();
        self
    }

    /// Append a reply to the queue
    pub fn queue_response(&self, response: impl Into<String>) {
        self.script
            .lock()
            .unwrap()
            .push(Scripted::Reply(response.into()));
    }

    /// Append a failing turn to the queue
    pub fn queue_failure(&self, message: impl Into<String>) {
        self.script
            .lock()
            .unwrap()
            .push(Scripted::Failure(message.into()));
    }

    /// All prompts sent to this oracle so far
    pub fn requests(&self) -> Vec<String> {
        self.requests.lock().unwrap().clone()
    }

    /// The most recent prompt, if any
    pub fn last_request(&self) -> Option<String> {
        self.requests.lock().unwrap().last().cloned()
    }
}

impl Default for MockOracle {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Oracle for MockOracle {
    fn name(&self) -> &str {
        "mock"
    }

    async fn infer(&self, prompt: &str) -> Result<String> {
        self.requests.lock().unwrap().push(prompt.to_string());

        let turn = {
            let mut script = self.script.lock().unwrap();
            if script.is_empty() {
                Scripted::Reply(self.default_response.clone())
            } else {
                script.remove(0)
            }
        };

        match turn {
            Scripted::Reply(text) => Ok(text),
            Scripted::Failure(message) => bail!("{}", message),
        }
    }
}

// ============================================================================
// HTTP ORACLE (OPENAI-COMPATIBLE)
// ============================================================================

/// Oracle backed by an OpenAI-compatible chat completions endpoint
pub struct HttpOracle {
    client: reqwest::Client,
    api_key: String,
    model: String,
    endpoint: String,
    temperature: f32,
}

impl HttpOracle {
    /// Create a new HTTP oracle
    ///
    /// Reads `TABQA_API_KEY` from the environment.
    pub fn new(model: impl Into<String>) -> Result<Self> {
        let api_key =
            std::env::var("TABQA_API_KEY").context("TABQA_API_KEY environment variable not set")?;
        Ok(Self::with_api_key(api_key, model))
    }

    /// Create with an explicit API key
    pub fn with_api_key(api_key: impl Into<String>, model: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            api_key: api_key.into(),
            model: model.into(),
            endpoint: DEFAULT_API_URL.to_string(),
            temperature: 0.1,
        }
    }

    /// Point at a non-default endpoint (self-hosted, proxy)
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the sampling temperature
    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }
}

#[async_trait]
impl Oracle for HttpOracle {
    fn name(&self) -> &str {
        "http"
    }

    async fn infer(&self, prompt: &str) -> Result<String> {
        let payload = ChatCompletionRequest {
            model: self.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: Some(self.temperature),
        };

        tracing::debug!(
            oracle = "http",
            model = %payload.model,
            prompt_len = prompt.len(),
            "Sending request to chat completions API"
        );

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&payload)
            .send()
            .await
            .context("Failed to send request to oracle API")?;

        if !response.status().is_success() {
            let status = response.status();
            let error_text = response.text().await.unwrap_or_default();
            tracing::error!(
                oracle = "http",
                status = %status,
                error = %error_text,
                "Oracle API error"
            );
            bail!("oracle API error ({}): {}", status, error_text);
        }

        let api_response: ChatCompletionResponse = response
            .json()
            .await
            .context("Failed to parse oracle API response")?;

        let content = api_response
            .choices
            .first()
            .map(|c| c.message.content.clone())
            .unwrap_or_default();

        if content.is_empty() {
            bail!("oracle returned an empty response");
        }

        Ok(content)
    }

    fn is_available(&self) -> bool {
        !self.api_key.is_empty()
    }
}

// ============================================================================
// API TYPES
// ============================================================================

#[derive(Debug, Serialize)]
struct ChatCompletionRequest {
    model: String,
    messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
struct ChatMessage {
    role: String,
    content: String,
}

#[derive(Debug, Deserialize)]
struct ChatCompletionResponse {
    choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
struct ChatChoice {
    message: ChatMessage,
}

// ============================================================================
// TESTS
// ============================================================================
