//! Per-agent behaviour memory.
//!
//! Every action an agent takes is recorded with an importance score. When
//! enough importance accumulates the recent memories are condensed into a
//! handful of reflections, which become the agent's behaviour summary.
//!
//! ```text
//! record ──> items (bounded, oldest evicted)
//!    │
//!    └──> importance counter ── >= threshold ──> compress ──> reflections (bounded)
//!                                                  │
//!                                             counter reset
//! ```

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::prompts;
use super::Stance;
use crate::config::MemoryConfig;
use crate::network::ServerId;
use crate::oracle::{Oracle, QueryKind};

/// Words that mark an observation as emotionally loaded.
const EMPHATIC_KEYWORDS: [&str; 5] = ["hate", "love", "strongly", "never", "always"];

/// Kind of remembered action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    /// Wrote an original post
    CreatePost,
    /// Commented on a post
    Comment,
    /// Retweeted a post
    Retweet,
    /// Liked a post
    Like,
    /// Followed a user
    Follow,
    /// Unfollowed a user
    Unfollow,
    /// Moved to another server
    Migrate,
    /// Did nothing
    Silent,
}

impl ActionKind {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            ActionKind::CreatePost => "create_post",
            ActionKind::Comment => "comment",
            ActionKind::Retweet => "retweet",
            ActionKind::Like => "like",
            ActionKind::Follow => "follow",
            ActionKind::Unfollow => "unfollow",
            ActionKind::Migrate => "migrate",
            ActionKind::Silent => "silent",
        }
    }

    /// Importance before keyword boost.
    pub fn base_importance(&self) -> u8 {
        match self {
            ActionKind::Migrate => 9,
            ActionKind::CreatePost => 7,
            ActionKind::Comment | ActionKind::Follow | ActionKind::Unfollow => 6,
            ActionKind::Retweet => 5,
            ActionKind::Like => 4,
            ActionKind::Silent => 2,
        }
    }
}

impl std::fmt::Display for ActionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One remembered action.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryItem {
    /// What was done
    #[serde(rename = "action_type")]
    pub action: ActionKind,
    /// Free text (post body, comment, target user)
    pub content: String,
    /// Server the agent was on
    pub server: ServerId,
    /// Agent's stance at the time
    pub stance: Stance,
    /// What came of it
    #[serde(default)]
    pub outcome: String,
    /// 2..=10
    pub importance: u8,
    /// When
    pub timestamp: DateTime<Utc>,
}

/// Condensed insight about past behaviour.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Reflection {
    /// Insight text
    pub content: String,
    /// Fixed importance
    pub importance: u8,
    /// When it was generated
    pub timestamp: DateTime<Utc>,
}

/// Which memories a prompt wants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MemoryContext {
    /// Social actions: comment, like, retweet, create_post, follow, unfollow
    Interaction,
    /// Posting and migration
    Migration,
    /// No filter
    Any,
}

impl MemoryContext {
    fn admits(&self, action: ActionKind) -> bool {
        match self {
            MemoryContext::Interaction => matches!(
                action,
                ActionKind::Comment
                    | ActionKind::Like
                    | ActionKind::Retweet
                    | ActionKind::CreatePost
                    | ActionKind::Follow
                    | ActionKind::Unfollow
            ),
            MemoryContext::Migration => matches!(action, ActionKind::CreatePost | ActionKind::Migrate),
            MemoryContext::Any => true,
        }
    }
}

/// Result of a compression attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Compression {
    /// Counter below threshold; nothing happened
    NotDue,
    /// Too few memories to reflect on
    Skipped {
        /// Memories held
        memories: usize,
    },
    /// New reflections stored
    Generated {
        /// Insights accepted from the reply
        insights: Vec<String>,
        /// Reflections held afterwards
        reflections: usize,
    },
    /// Oracle gave no usable insight list
    Failed {
        /// Fallback or shape description
        reason: String,
    },
}

/// Serializable memory contents.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemorySnapshot {
    /// Memories, oldest first
    pub items: Vec<MemoryItem>,
    /// Reflections, oldest first
    pub reflections: Vec<Reflection>,
    /// Importance accumulated since the last compression
    pub importance_since_reflection: u32,
}

/// Bounded memory of one agent.
#[derive(Debug, Clone)]
pub struct MemoryStore {
    items: VecDeque<MemoryItem>,
    reflections: Vec<Reflection>,
    importance_since_reflection: u32,
    config: MemoryConfig,
}

impl MemoryStore {
    /// Empty memory.
    pub fn new(config: &MemoryConfig) -> Self {
        Self {
            items: VecDeque::with_capacity(config.max_items.min(1024)),
            reflections: Vec::new(),
            importance_since_reflection: 0,
            config: config.clone(),
        }
    }

    /// Importance of an observation: the action's base value, plus two
    /// (capped at 10) when the text carries an emphatic keyword.
    pub fn importance(action: ActionKind, observation: &str) -> u8 {
        let base = action.base_importance();
        let lowered = observation.to_lowercase();
        if EMPHATIC_KEYWORDS.iter().any(|k| lowered.contains(k)) {
            (base + 2).min(10)
        } else {
            base
        }
    }

    /// Record an action. Returns true when compression is due.
    pub fn record(
        &mut self,
        action: ActionKind,
        content: impl Into<String>,
        server: &ServerId,
        stance: Stance,
        outcome: impl Into<String>,
    ) -> bool {
        let content = content.into();
        let outcome = outcome.into();

        let mut observation = format!("{action} on {server}: {content}");
        if !outcome.is_empty() {
            observation.push_str(&format!(" (Outcome: {outcome})"));
        }
        let importance = Self::importance(action, &observation);

        self.items.push_back(MemoryItem {
            action,
            content,
            server: server.clone(),
            stance,
            outcome,
            importance,
            timestamp: Utc::now(),
        });
        while self.items.len() > self.config.max_items {
            self.items.pop_front();
        }
        self.importance_since_reflection += u32::from(importance);
        self.compression_due()
    }

    /// Whether enough importance has accumulated.
    pub fn compression_due(&self) -> bool {
        self.importance_since_reflection >= self.config.compression_threshold
    }

    /// Condense recent memories into reflections if due.
    ///
    /// The counter resets after any attempt, successful or not.
    pub async fn maybe_compress(&mut self, oracle: &dyn Oracle) -> Compression {
        if !self.compression_due() {
            return Compression::NotDue;
        }
        let outcome = self.compress(oracle).await;
        self.importance_since_reflection = 0;
        outcome
    }

    async fn compress(&mut self, oracle: &dyn Oracle) -> Compression {
        if self.items.len() < self.config.min_memories_for_reflection {
            return Compression::Skipped {
                memories: self.items.len(),
            };
        }

        let skip = self.items.len().saturating_sub(self.config.reflection_window);
        let recent: Vec<&MemoryItem> = self.items.iter().skip(skip).collect();
        let prompt = prompts::reflection(&recent);

        let reply = oracle.query(&prompt, QueryKind::Reflection).await;
        let Some(insights) = reply.as_array() else {
            return Compression::Failed {
                reason: reply.to_value().to_string(),
            };
        };

        let insights: Vec<String> = insights
            .iter()
            .take(self.config.max_insights)
            .map(|v| match v {
                Value::String(s) => s.clone(),
                other => other.to_string(),
            })
            .collect();
        let now = Utc::now();
        for insight in &insights {
            self.reflections.push(Reflection {
                content: insight.clone(),
                importance: self.config.reflection_importance,
                timestamp: now,
            });
        }
        let overflow = self.reflections.len().saturating_sub(self.config.max_reflections);
        if overflow > 0 {
            self.reflections.drain(..overflow);
        }

        Compression::Generated {
            insights,
            reflections: self.reflections.len(),
        }
    }

    /// Up to `limit` recent memories matching `context`, newest first.
    ///
    /// Only the most recent scan-window memories are considered.
    pub fn relevant(&self, context: MemoryContext, limit: usize) -> Vec<&MemoryItem> {
        self.items
            .iter()
            .rev()
            .take(self.config.relevant_scan_window)
            .filter(|m| context.admits(m.action))
            .take(limit)
            .collect()
    }

    /// All memories, oldest first.
    pub fn items(&self) -> impl ExactSizeIterator<Item = &MemoryItem> + '_ {
        self.items.iter()
    }

    /// Number of memories held.
    pub fn len(&self) -> usize {
        self.items.len()
    }

    /// Whether no memories are held.
    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Reflections, oldest first.
    pub fn reflections(&self) -> &[Reflection] {
        &self.reflections
    }

    /// Reflection texts, used as the profile's behaviour summary.
    pub fn reflection_contents(&self) -> Vec<String> {
        self.reflections.iter().map(|r| r.content.clone()).collect()
    }

    /// Importance accumulated since the last compression.
    pub fn pending_importance(&self) -> u32 {
        self.importance_since_reflection
    }

    /// Serializable copy.
    pub fn snapshot(&self) -> MemorySnapshot {
        MemorySnapshot {
            items: self.items.iter().cloned().collect(),
            reflections: self.reflections.clone(),
            importance_since_reflection: self.importance_since_reflection,
        }
    }

    /// Rebuild from a snapshot, re-applying the bounds.
    pub fn from_snapshot(config: &MemoryConfig, snapshot: MemorySnapshot) -> Self {
        let mut store = Self::new(config);
        let skip = snapshot.items.len().saturating_sub(config.max_items);
        store.items = snapshot.items.into_iter().skip(skip).collect();
        let skip = snapshot.reflections.len().saturating_sub(config.max_reflections);
        store.reflections = snapshot.reflections.into_iter().skip(skip).collect();
        store.importance_since_reflection = snapshot.importance_since_reflection;
        store
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::ScriptedOracle;
    use proptest::prelude::*;
    use serde_json::json;

    fn server() -> ServerId {
        ServerId::from("A")
    }

    fn memory() -> MemoryStore {
        MemoryStore::new(&MemoryConfig::default())
    }

    #[test]
    fn test_importance_map() {
        assert_eq!(MemoryStore::importance(ActionKind::Migrate, "x"), 9);
        assert_eq!(MemoryStore::importance(ActionKind::Like, "x"), 4);
        assert_eq!(MemoryStore::importance(ActionKind::Silent, "x"), 2);
        assert_eq!(MemoryStore::importance(ActionKind::Like, "I LOVE this"), 6);
        assert_eq!(MemoryStore::importance(ActionKind::Migrate, "never again"), 10);
    }

    #[test]
    fn test_keyword_in_outcome_counts() {
        let mut m = memory();
        m.record(ActionKind::Comment, "fine", &server(), Stance::NEUTRAL, "they always reply");
        assert_eq!(m.items().next().unwrap().importance, 8);
    }

    #[test]
    fn test_keeps_most_recent_hundred() {
        let mut m = memory();
        for i in 1..=105 {
            m.record(ActionKind::Like, format!("call {i}"), &server(), Stance::NEUTRAL, "");
        }
        assert_eq!(m.len(), 100);
        let contents: Vec<_> = m.items().map(|i| i.content.clone()).collect();
        assert_eq!(contents.first().unwrap(), "call 6");
        assert_eq!(contents.last().unwrap(), "call 105");
    }

    #[test]
    fn test_compression_due_at_threshold() {
        let mut m = memory();
        // 7 posts * 7 = 49
        for _ in 0..7 {
            assert!(!m.record(ActionKind::CreatePost, "p", &server(), Stance::NEUTRAL, "posted"));
        }
        assert_eq!(m.pending_importance(), 49);
        // +2 = 51
        assert!(m.record(ActionKind::Silent, "s", &server(), Stance::NEUTRAL, ""));
    }

    #[tokio::test]
    async fn test_compress_keeps_three_reflections_and_resets() {
        let oracle = ScriptedOracle::new();
        oracle.push(QueryKind::Reflection, json!(["one", "two", "three"]));
        oracle.push(QueryKind::Reflection, json!(["four", "five"]));

        let mut m = memory();
        for _ in 0..9 {
            m.record(ActionKind::Migrate, "moved", &server(), Stance::NEUTRAL, "");
        }
        let first = m.maybe_compress(&oracle).await;
        assert_eq!(
            first,
            Compression::Generated {
                insights: vec!["one".to_string(), "two".to_string()],
                reflections: 2,
            }
        );
        assert_eq!(m.pending_importance(), 0);
        assert_eq!(m.maybe_compress(&oracle).await, Compression::NotDue);

        for _ in 0..6 {
            m.record(ActionKind::Migrate, "moved", &server(), Stance::NEUTRAL, "");
        }
        m.maybe_compress(&oracle).await;
        assert_eq!(m.reflection_contents(), vec!["two", "four", "five"]);

        // reflection prompt saw at most 20 memories
        let prompts = oracle.prompts(QueryKind::Reflection);
        assert_eq!(prompts[1].matches("- migrate on A").count(), 15);
    }

    #[tokio::test]
    async fn test_failed_compression_still_resets() {
        let oracle = ScriptedOracle::new();
        let mut m = memory();
        for _ in 0..6 {
            m.record(ActionKind::Migrate, "moved", &server(), Stance::NEUTRAL, "");
        }
        assert!(matches!(m.maybe_compress(&oracle).await, Compression::Failed { .. }));
        assert_eq!(m.pending_importance(), 0);
        assert!(m.reflections().is_empty());
    }

    #[tokio::test]
    async fn test_too_few_memories_skips() {
        let oracle = ScriptedOracle::new();
        let config = MemoryConfig {
            compression_threshold: 10,
            ..MemoryConfig::default()
        };
        let mut m = MemoryStore::new(&config);
        m.record(ActionKind::Migrate, "a", &server(), Stance::NEUTRAL, "");
        m.record(ActionKind::Migrate, "b", &server(), Stance::NEUTRAL, "");
        assert_eq!(m.maybe_compress(&oracle).await, Compression::Skipped { memories: 2 });
        assert_eq!(oracle.call_count(), 0);
        assert_eq!(m.pending_importance(), 0);
    }

    #[test]
    fn test_relevant_filters_recent_window() {
        let mut m = memory();
        for i in 0..5 {
            m.record(ActionKind::Like, format!("old like {i}"), &server(), Stance::NEUTRAL, "");
        }
        for i in 0..10 {
            m.record(ActionKind::Silent, format!("quiet {i}"), &server(), Stance::NEUTRAL, "");
        }
        // likes fall outside the scan window of 10
        assert!(m.relevant(MemoryContext::Interaction, 5).is_empty());

        m.record(ActionKind::Migrate, "moved", &server(), Stance::NEUTRAL, "");
        m.record(ActionKind::CreatePost, "hello", &server(), Stance::NEUTRAL, "posted");
        let migration = m.relevant(MemoryContext::Migration, 5);
        assert_eq!(migration.len(), 2);
        assert_eq!(migration[0].action, ActionKind::CreatePost);

        let any = m.relevant(MemoryContext::Any, 3);
        assert_eq!(any.len(), 3);
        assert_eq!(any[0].content, "hello");
    }

    #[test]
    fn test_snapshot_round_trip_reapplies_bounds() {
        let mut m = memory();
        for i in 0..30 {
            m.record(ActionKind::Like, format!("{i}"), &server(), Stance::NEUTRAL, "");
        }
        let small = MemoryConfig {
            max_items: 10,
            ..MemoryConfig::default()
        };
        let restored = MemoryStore::from_snapshot(&small, m.snapshot());
        assert_eq!(restored.len(), 10);
        assert_eq!(restored.items().next().unwrap().content, "20");
        assert_eq!(restored.pending_importance(), m.pending_importance());
    }

    fn any_action() -> impl Strategy<Value = ActionKind> {
        prop_oneof![
            Just(ActionKind::CreatePost),
            Just(ActionKind::Comment),
            Just(ActionKind::Retweet),
            Just(ActionKind::Like),
            Just(ActionKind::Follow),
            Just(ActionKind::Unfollow),
            Just(ActionKind::Migrate),
            Just(ActionKind::Silent),
        ]
    }

    proptest! {
        #[test]
        fn prop_memory_bounded_and_importance_in_range(
            records in prop::collection::vec((any_action(), "[a-z ]{0,20}"), 0..250)
        ) {
            let mut m = memory();
            for (action, content) in &records {
                m.record(*action, content.clone(), &server(), Stance::NEUTRAL, "");
                prop_assert!(m.len() <= 100);
            }
            prop_assert_eq!(m.len(), records.len().min(100));
            for item in m.items() {
                prop_assert!((2..=10).contains(&item.importance));
            }
            if let Some((_, last)) = records.last() {
                prop_assert_eq!(&m.items().last().unwrap().content, last);
            }
        }
    }
}
