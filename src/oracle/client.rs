//! Chat-completion client with truncation, retry and fallback.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use rand::rngs::StdRng;
use rand::SeedableRng;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use super::decode::{extract_json, parse};
use super::retry::{ExponentialBackoff, RetryPolicy};
use super::tokens::{fit_prompt, TruncationLimits};
use super::{Fallback, FallbackKind, Oracle, OracleReply, QueryKind};
use crate::config::{Config, OracleConfig};
use crate::error::{Result, SimError};

/// Transport-level failure of one chat-completion call.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum OracleError {
    /// Request exceeded the configured timeout
    #[error("request timed out")]
    Timeout,

    /// Could not reach the endpoint or read its body
    #[error("connection failed: {0}")]
    Connection(String),

    /// Endpoint answered with a non-success status
    #[error("HTTP {status}: {body}")]
    BadStatus {
        /// Status code
        status: u16,
        /// Response body text
        body: String,
    },

    /// Reply text did not decode to JSON of the expected shape
    #[error("unparseable reply: {raw}")]
    Parse {
        /// Extracted payload that failed to decode
        raw: String,
    },
}

/// Token usage reported with one completion.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Usage {
    /// Prompt tokens
    #[serde(default)]
    pub prompt_tokens: u64,
    /// Completion tokens
    #[serde(default)]
    pub completion_tokens: u64,
    /// Total tokens
    #[serde(default)]
    pub total_tokens: u64,
}

/// Running usage totals across all calls.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct UsageTotals {
    /// Completions that returned a body
    pub calls: u64,
    /// Sum of prompt tokens
    pub prompt_tokens: u64,
    /// Sum of completion tokens
    pub completion_tokens: u64,
    /// Sum of total tokens
    pub total_tokens: u64,
}

impl UsageTotals {
    fn add(&mut self, usage: Option<Usage>) {
        self.calls += 1;
        if let Some(usage) = usage {
            self.prompt_tokens += usage.prompt_tokens;
            self.completion_tokens += usage.completion_tokens;
            self.total_tokens += usage.total_tokens;
        }
    }
}

/// Raw reply text plus optional usage.
#[derive(Debug, Clone)]
pub struct Completion {
    /// `choices[0].message.content`, trimmed
    pub content: String,
    /// Usage block, if the endpoint sent one
    pub usage: Option<Usage>,
}

/// One round-trip to a chat model.
#[async_trait]
pub trait ChatBackend: Send + Sync {
    /// Send a single user message and return the reply text.
    async fn complete(&self, prompt: &str) -> std::result::Result<Completion, OracleError>;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Message {
    role: String,
    content: String,
}

#[derive(Debug, Serialize)]
struct ChatRequest<'a> {
    model: &'a str,
    messages: Vec<Message>,
    temperature: f32,
}

#[derive(Debug, Deserialize)]
struct ChatResponse {
    choices: Vec<Choice>,
    #[serde(default)]
    usage: Option<Usage>,
}

#[derive(Debug, Deserialize)]
struct Choice {
    message: Message,
}

/// OpenAI-compatible `/chat/completions` backend over reqwest.
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
}

impl HttpBackend {
    /// Build from config. Fails only if the TLS client cannot be created.
    pub fn new(config: &OracleConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| SimError::Network(format!("Failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            endpoint: format!("{}/chat/completions", config.base_url.trim_end_matches('/')),
            api_key: config.api_key.clone(),
            model: config.model.clone(),
            temperature: config.temperature,
        })
    }

    /// Full request URL.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }
}

fn transport_error(err: &reqwest::Error) -> OracleError {
    if err.is_timeout() {
        OracleError::Timeout
    } else {
        OracleError::Connection(err.to_string())
    }
}

#[async_trait]
impl ChatBackend for HttpBackend {
    async fn complete(&self, prompt: &str) -> std::result::Result<Completion, OracleError> {
        let request = ChatRequest {
            model: &self.model,
            messages: vec![Message {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            temperature: self.temperature,
        };

        let mut builder = self.client.post(&self.endpoint).json(&request);
        if let Some(key) = &self.api_key {
            builder = builder.bearer_auth(key);
        }

        let response = builder.send().await.map_err(|e| transport_error(&e))?;
        let status = response.status();
        let body = response.text().await.map_err(|e| transport_error(&e))?;

        if !status.is_success() {
            return Err(OracleError::BadStatus {
                status: status.as_u16(),
                body,
            });
        }

        let parsed: ChatResponse = serde_json::from_str(&body).map_err(|_| OracleError::Parse {
            raw: body.chars().take(200).collect(),
        })?;
        let content = parsed
            .choices
            .into_iter()
            .next()
            .map(|c| c.message.content.trim().to_string())
            .ok_or_else(|| OracleError::Parse {
                raw: "reply had no choices".to_string(),
            })?;

        Ok(Completion {
            content,
            usage: parsed.usage,
        })
    }
}

/// Oracle over a [`ChatBackend`]: truncates long prompts, decodes JSON,
/// retries transient failures and degrades to a [`Fallback`].
pub struct OracleClient<B = HttpBackend, P = ExponentialBackoff> {
    backend: B,
    policy: P,
    limits: TruncationLimits,
    rng: Mutex<StdRng>,
    usage: Mutex<UsageTotals>,
}

impl OracleClient<HttpBackend, ExponentialBackoff> {
    /// HTTP client configured from `config.oracle` and `config.retry`.
    pub fn from_config(config: &Config) -> Result<Self> {
        let backend = HttpBackend::new(&config.oracle)?;
        Ok(Self::new(
            backend,
            ExponentialBackoff::from(&config.retry),
            TruncationLimits::from(&config.oracle),
        ))
    }
}

impl<B: ChatBackend, P: RetryPolicy> OracleClient<B, P> {
    /// Wrap a backend.
    pub fn new(backend: B, policy: P, limits: TruncationLimits) -> Self {
        Self {
            backend,
            policy,
            limits,
            rng: Mutex::new(StdRng::from_entropy()),
            usage: Mutex::new(UsageTotals::default()),
        }
    }

    /// Seed the jitter RNG.
    pub fn with_seed(mut self, seed: u64) -> Self {
        self.rng = Mutex::new(StdRng::seed_from_u64(seed));
        self
    }

    /// The wrapped backend.
    pub fn backend(&self) -> &B {
        &self.backend
    }

    fn record_usage(&self, kind: QueryKind, usage: Option<Usage>) {
        if let Some(u) = usage {
            tracing::debug!(
                query = kind.as_str(),
                prompt_tokens = u.prompt_tokens,
                completion_tokens = u.completion_tokens,
                total_tokens = u.total_tokens,
                "token usage"
            );
        }
        self.usage
            .lock()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .add(usage);
    }

    fn backoff(&self, attempt: u32) -> Duration {
        let mut rng = self.rng.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        self.policy.backoff(attempt, &mut *rng)
    }

    async fn attempt(&self, prompt: &str, kind: QueryKind) -> std::result::Result<serde_json::Value, OracleError> {
        let completion = self.backend.complete(prompt).await?;
        self.record_usage(kind, completion.usage);
        parse(extract_json(&completion.content), kind.expect())
    }
}

fn final_fallback(error: Option<OracleError>) -> Fallback {
    match error {
        Some(OracleError::Parse { raw }) => Fallback {
            reason: raw.chars().take(100).collect(),
            kind: FallbackKind::JsonParse,
            status: None,
        },
        Some(OracleError::BadStatus { status, body }) => Fallback {
            reason: body.chars().take(200).collect(),
            kind: FallbackKind::Http,
            status: Some(status),
        },
        _ => Fallback {
            reason: "API call failed after all retries".to_string(),
            kind: FallbackKind::Exhausted,
            status: None,
        },
    }
}

#[async_trait]
impl<B: ChatBackend, P: RetryPolicy> Oracle for OracleClient<B, P> {
    async fn query(&self, prompt: &str, kind: QueryKind) -> OracleReply {
        let fitted = fit_prompt(prompt, self.limits);
        let prompt = fitted.as_deref().unwrap_or(prompt);

        let max_attempts = self.policy.max_attempts();
        let mut last_error = None;

        for attempt in 0..max_attempts {
            match self.attempt(prompt, kind).await {
                Ok(value) => {
                    tracing::debug!("Oracle {} succeeded on attempt {}", kind, attempt + 1);
                    return OracleReply::Parsed(value);
                }
                Err(err) => {
                    let retryable = self.policy.is_retryable(&err);
                    let is_last = attempt + 1 >= max_attempts;
                    tracing::warn!(
                        "Oracle {} attempt {}/{} failed: {}",
                        kind,
                        attempt + 1,
                        max_attempts,
                        err
                    );
                    last_error = Some(err);
                    if !retryable || is_last {
                        break;
                    }
                    tokio::time::sleep(self.backoff(attempt)).await;
                }
            }
        }

        let fallback = final_fallback(last_error);
        tracing::warn!("Oracle {} degraded to fallback: {}", kind, fallback.kind.as_str());
        OracleReply::Fallback(fallback)
    }

    fn usage(&self) -> UsageTotals {
        *self.usage.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::RetryConfig;
    use std::collections::VecDeque;

    /// Backend that replays a fixed script.
    struct ScriptBackend {
        replies: Mutex<VecDeque<std::result::Result<Completion, OracleError>>>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptBackend {
        fn new(replies: Vec<std::result::Result<&str, OracleError>>) -> Self {
            let replies = replies
                .into_iter()
                .map(|r| {
                    r.map(|content| Completion {
                        content: content.to_string(),
                        usage: Some(Usage {
                            prompt_tokens: 10,
                            completion_tokens: 5,
                            total_tokens: 15,
                        }),
                    })
                })
                .collect();
            Self {
                replies: Mutex::new(replies),
                calls: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<String> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl ChatBackend for ScriptBackend {
        async fn complete(&self, prompt: &str) -> std::result::Result<Completion, OracleError> {
            self.calls.lock().unwrap().push(prompt.to_string());
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or(Err(OracleError::Connection("script exhausted".to_string())))
        }
    }

    fn instant_policy() -> ExponentialBackoff {
        ExponentialBackoff::from(&RetryConfig {
            base_delay_secs: 0.0,
            ..RetryConfig::default()
        })
    }

    fn client(replies: Vec<std::result::Result<&str, OracleError>>) -> OracleClient<ScriptBackend> {
        OracleClient::new(
            ScriptBackend::new(replies),
            instant_policy(),
            TruncationLimits::from(&OracleConfig::default()),
        )
        .with_seed(3)
    }

    #[tokio::test]
    async fn test_fenced_reply_parsed() {
        let oracle = client(vec![Ok("```json\n{\"content\": \"AI helps doctors\"}\n```")]);
        let reply = oracle.query("post", QueryKind::PostCreation).await;
        assert_eq!(reply.str_field("content"), Some("AI helps doctors"));
        assert_eq!(oracle.usage().total_tokens, 15);
        assert_eq!(oracle.usage().calls, 1);
    }

    #[tokio::test]
    async fn test_parse_failure_retried_then_succeeds() {
        let oracle = client(vec![Ok("I think I'll like it"), Ok("{\"actions\": []}")]);
        let reply = oracle.query("decide", QueryKind::InteractionDecision).await;
        assert!(!reply.is_fallback());
        assert_eq!(oracle.backend().calls().len(), 2);
    }

    #[tokio::test]
    async fn test_persistent_parse_failure_falls_back() {
        let garbage = "x".repeat(300);
        let replies = (0..5).map(|_| Ok(garbage.as_str())).collect();
        let oracle = client(replies);
        let reply = oracle.query("score", QueryKind::EnvironmentEvaluation).await;
        match reply {
            OracleReply::Fallback(f) => {
                assert_eq!(f.kind, FallbackKind::JsonParse);
                assert_eq!(f.reason.len(), 100);
            }
            other => panic!("expected fallback, got {other:?}"),
        }
        assert_eq!(oracle.backend().calls().len(), 5);
    }

    #[tokio::test]
    async fn test_non_retryable_status_returns_immediately() {
        let oracle = client(vec![Err(OracleError::BadStatus {
            status: 400,
            body: "invalid request".to_string(),
        })]);
        let reply = oracle.query("decide", QueryKind::InteractionDecision).await;
        match reply {
            OracleReply::Fallback(f) => {
                assert_eq!(f.kind, FallbackKind::Http);
                assert_eq!(f.status, Some(400));
                assert_eq!(f.reason, "invalid request");
            }
            other => panic!("expected fallback, got {other:?}"),
        }
        assert_eq!(oracle.backend().calls().len(), 1);
    }

    #[tokio::test]
    async fn test_timeouts_exhaust_attempts() {
        let replies = (0..5).map(|_| Err(OracleError::Timeout)).collect();
        let oracle = client(replies);
        let reply = oracle.query("reflect", QueryKind::Reflection).await;
        match reply {
            OracleReply::Fallback(f) => {
                assert_eq!(f.kind, FallbackKind::Exhausted);
                assert_eq!(f.reason, "API call failed after all retries");
            }
            other => panic!("expected fallback, got {other:?}"),
        }
        assert_eq!(oracle.backend().calls().len(), 5);
    }

    #[tokio::test]
    async fn test_object_reply_rejected_for_array_query() {
        let oracle = client(vec![Ok("{\"insight\": \"x\"}"), Ok("[\"I mostly like posts\"]")]);
        let reply = oracle.query("reflect", QueryKind::Reflection).await;
        assert_eq!(reply.as_array().map(<[_]>::len), Some(1));
    }

    #[tokio::test]
    async fn test_long_prompt_truncated_before_sending() {
        let oracle = client(vec![Ok("{\"score\": 7, \"reason\": \"ok\"}")]);
        let prompt = "opinion ".repeat(100_000);
        oracle.query(&prompt, QueryKind::EnvironmentEvaluation).await;
        let sent = &oracle.backend().calls()[0];
        assert!(sent.len() < prompt.len());
        assert!(sent.ends_with(crate::oracle::tokens::TRUNCATION_MARKER));
    }

    #[test]
    fn test_endpoint_joins_base_url() {
        let config = OracleConfig {
            base_url: "http://localhost:1234/v1/".to_string(),
            ..OracleConfig::default()
        };
        let backend = HttpBackend::new(&config).unwrap();
        assert_eq!(backend.endpoint(), "http://localhost:1234/v1/chat/completions");
    }
}
