//! In-process oracle that replays queued replies.
//!
//! Deterministic stand-in for the chat backend, used to drive agents and
//! whole simulation rounds without a network.

use std::collections::{HashMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;

use super::{Fallback, FallbackKind, Oracle, OracleReply, QueryKind};

#[derive(Debug, Default)]
struct Script {
    queued: HashMap<QueryKind, VecDeque<Value>>,
    defaults: HashMap<QueryKind, Value>,
    prompts: Vec<(QueryKind, String)>,
}

/// Replays replies per [`QueryKind`].
///
/// Queued replies are consumed first; after that the kind's default is
/// returned, and kinds with neither get an exhausted fallback.
#[derive(Debug, Default)]
pub struct ScriptedOracle {
    script: Mutex<Script>,
}

impl ScriptedOracle {
    /// Empty script: every query falls back.
    pub fn new() -> Self {
        Self::default()
    }

    fn script(&self) -> std::sync::MutexGuard<'_, Script> {
        self.script.lock().unwrap_or_else(std::sync::PoisonError::into_inner)
    }

    /// Queue one reply for `kind`.
    pub fn push(&self, kind: QueryKind, reply: Value) -> &Self {
        self.script().queued.entry(kind).or_default().push_back(reply);
        self
    }

    /// Reply used for `kind` once its queue is empty.
    pub fn set_default(&self, kind: QueryKind, reply: Value) -> &Self {
        self.script().defaults.insert(kind, reply);
        self
    }

    /// Builder form of [`ScriptedOracle::set_default`].
    pub fn with_default(self, kind: QueryKind, reply: Value) -> Self {
        self.set_default(kind, reply);
        self
    }

    /// Prompts received for `kind`, oldest first.
    pub fn prompts(&self, kind: QueryKind) -> Vec<String> {
        self.script()
            .prompts
            .iter()
            .filter(|(k, _)| *k == kind)
            .map(|(_, p)| p.clone())
            .collect()
    }

    /// Number of queries received so far.
    pub fn call_count(&self) -> usize {
        self.script().prompts.len()
    }
}

#[async_trait]
impl Oracle for ScriptedOracle {
    async fn query(&self, prompt: &str, kind: QueryKind) -> OracleReply {
        let mut script = self.script();
        script.prompts.push((kind, prompt.to_string()));

        let queued = script.queued.get_mut(&kind).and_then(VecDeque::pop_front);
        let next = queued.or_else(|| script.defaults.get(&kind).cloned());

        match next {
            Some(value) => OracleReply::Parsed(value),
            None => OracleReply::Fallback(Fallback {
                reason: "API call failed after all retries".to_string(),
                kind: FallbackKind::Exhausted,
                status: None,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[tokio::test]
    async fn test_queue_then_default_then_fallback() {
        let oracle = ScriptedOracle::new().with_default(QueryKind::EnvironmentEvaluation, json!({"score": 8}));
        oracle.push(QueryKind::EnvironmentEvaluation, json!({"score": 2}));

        let first = oracle.query("a", QueryKind::EnvironmentEvaluation).await;
        let second = oracle.query("b", QueryKind::EnvironmentEvaluation).await;
        let other = oracle.query("c", QueryKind::PostCreation).await;

        assert_eq!(first.field("score"), Some(&json!(2)));
        assert_eq!(second.field("score"), Some(&json!(8)));
        assert!(other.is_fallback());
        assert_eq!(oracle.prompts(QueryKind::EnvironmentEvaluation), vec!["a", "b"]);
        assert_eq!(oracle.call_count(), 3);
    }
}
