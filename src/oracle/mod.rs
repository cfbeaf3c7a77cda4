//! Decision oracle.
//!
//! Every agent decision (what to post, which actions to take, whether a
//! stance moves, how satisfying a server is, what a batch of memories
//! means) is delegated to a chat-completion model through the [`Oracle`]
//! trait.
//!
//! ```text
//! prompt ──> fit_prompt ──> ChatBackend ──> extract_json ──> parse
//!               │               │                               │
//!          truncation      OracleError ──> RetryPolicy ──> Fallback
//! ```
//!
//! A query never fails outright. When the backend keeps failing the
//! caller receives [`OracleReply::Fallback`], which carries no decision
//! fields, and takes the safest no-op.

pub mod client;
mod decode;
pub mod dry_run;
pub mod retry;
pub mod scripted;
pub mod tokens;

use async_trait::async_trait;
use serde::Serialize;
use serde_json::{json, Value};

pub use client::{ChatBackend, Completion, HttpBackend, OracleClient, OracleError, Usage, UsageTotals};
pub use decode::extract_json;
pub use dry_run::DryRunOracle;
pub use retry::{ExponentialBackoff, RetryPolicy};
pub use scripted::ScriptedOracle;

/// Expected top-level JSON shape of a reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Expect {
    /// `{ ... }`
    Object,
    /// `[ ... ]`
    Array,
}

/// What a query is for. Doubles as the telemetry label.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryKind {
    /// Write an original post
    PostCreation,
    /// Choose actions for this turn
    InteractionDecision,
    /// Decide whether an interaction moved the stance
    StanceAdjustment,
    /// Score the current server
    EnvironmentEvaluation,
    /// Condense recent memories into insights
    Reflection,
}

impl QueryKind {
    /// Telemetry label.
    pub fn as_str(&self) -> &'static str {
        match self {
            QueryKind::PostCreation => "post_creation",
            QueryKind::InteractionDecision => "interaction_decision",
            QueryKind::StanceAdjustment => "stance_adjustment",
            QueryKind::EnvironmentEvaluation => "environment_evaluation",
            QueryKind::Reflection => "reflection",
        }
    }

    /// Shape the reply must have.
    pub fn expect(&self) -> Expect {
        match self {
            QueryKind::Reflection => Expect::Array,
            _ => Expect::Object,
        }
    }
}

impl std::fmt::Display for QueryKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Why a query degraded to a fallback.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum FallbackKind {
    /// The last reply could not be decoded
    JsonParse,
    /// The endpoint answered with a non-retryable (or final) error status
    Http,
    /// Attempts ran out on timeouts or connection failures
    Exhausted,
}

impl FallbackKind {
    /// Value of the `error` field in the fallback object.
    pub fn as_str(&self) -> &'static str {
        match self {
            FallbackKind::JsonParse => "JSON parse failed",
            FallbackKind::Http => "HTTP error",
            FallbackKind::Exhausted => "API failure",
        }
    }
}

/// Degraded reply: raw text for diagnostics, no decision.
#[derive(Debug, Clone, PartialEq)]
pub struct Fallback {
    /// Truncated raw text (reply body or error message)
    pub reason: String,
    /// Failure class
    pub kind: FallbackKind,
    /// HTTP status, when there was one
    pub status: Option<u16>,
}

impl Fallback {
    /// Render as the `{reason, error}` object callers log.
    pub fn to_value(&self) -> Value {
        let mut value = json!({
            "reason": self.reason,
            "error": self.kind.as_str(),
        });
        if let Some(status) = self.status {
            value["status"] = json!(status);
        }
        value
    }
}

/// Result of a query.
#[derive(Debug, Clone, PartialEq)]
pub enum OracleReply {
    /// Decoded reply of the expected shape
    Parsed(Value),
    /// No usable reply
    Fallback(Fallback),
}

impl OracleReply {
    /// Field of an object reply. Fallbacks never expose decision fields.
    pub fn field(&self, key: &str) -> Option<&Value> {
        match self {
            OracleReply::Parsed(Value::Object(map)) => map.get(key),
            _ => None,
        }
    }

    /// String field of an object reply.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.field(key).and_then(Value::as_str)
    }

    /// Elements of an array reply.
    pub fn as_array(&self) -> Option<&[Value]> {
        match self {
            OracleReply::Parsed(Value::Array(items)) => Some(items),
            _ => None,
        }
    }

    /// Whether the query degraded.
    pub fn is_fallback(&self) -> bool {
        matches!(self, OracleReply::Fallback(_))
    }

    /// JSON rendering, fallbacks included.
    pub fn to_value(&self) -> Value {
        match self {
            OracleReply::Parsed(value) => value.clone(),
            OracleReply::Fallback(fallback) => fallback.to_value(),
        }
    }
}

/// Prompt in, structured reply out.
#[async_trait]
pub trait Oracle: Send + Sync {
    /// Ask the oracle. Never fails; degraded answers come back as
    /// [`OracleReply::Fallback`].
    async fn query(&self, prompt: &str, kind: QueryKind) -> OracleReply;

    /// Token usage reported by the backend so far.
    fn usage(&self) -> UsageTotals {
        UsageTotals::default()
    }
}

#[async_trait]
impl<T: Oracle + ?Sized> Oracle for std::sync::Arc<T> {
    async fn query(&self, prompt: &str, kind: QueryKind) -> OracleReply {
        (**self).query(prompt, kind).await
    }

    fn usage(&self) -> UsageTotals {
        (**self).usage()
    }
}
