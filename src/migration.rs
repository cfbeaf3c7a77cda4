//! Satisfaction scoring and server migration.
//!
//! After acting, each agent scores its current server from 1 to 10. Every
//! score is kept in the store's satisfaction history; a score below the
//! threshold moves the agent to a uniformly chosen other server.

use rand::seq::SliceRandom;
use rand::Rng;
use serde_json::Value;

use crate::agent::{ActionKind, Agent, MemoryContext, TurnContext};
use crate::agent::prompts;
use crate::config::SimulationConfig;
use crate::events::SimEvent;
use crate::network::{SatisfactionRecord, ServerId};
use crate::oracle::{OracleReply, QueryKind};

/// Parsed environment evaluation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Evaluation {
    /// Satisfaction, 0 when the reply had no usable score
    pub score: i64,
    /// Oracle's reason
    pub reason: String,
}

impl Evaluation {
    /// Read `{score, reason}`. Integral floats and numeric strings are
    /// accepted; anything else scores 0.
    pub fn from_reply(reply: &OracleReply) -> Self {
        let score = match reply.field("score") {
            Some(Value::Number(n)) => n
                .as_i64()
                .or_else(|| n.as_f64().filter(|f| f.fract() == 0.0).map(|f| f as i64))
                .unwrap_or(0),
            Some(Value::String(s)) => s.trim().parse().unwrap_or(0),
            _ => 0,
        };
        Self {
            score,
            reason: reply.str_field("reason").unwrap_or_default().to_string(),
        }
    }
}

/// A completed server change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Migration {
    /// Server left
    pub from: ServerId,
    /// Server joined
    pub to: ServerId,
    /// Line appended to the store's migration reasons
    pub record: String,
}

/// Decides when and where agents move.
#[derive(Debug, Clone)]
pub struct MigrationPolicy {
    threshold: i64,
}

impl Default for MigrationPolicy {
    fn default() -> Self {
        Self::new(&SimulationConfig::default())
    }
}

impl MigrationPolicy {
    /// Policy with the configured threshold.
    pub fn new(config: &SimulationConfig) -> Self {
        Self {
            threshold: config.migration_threshold,
        }
    }

    /// Scores below this trigger a move.
    pub fn threshold(&self) -> i64 {
        self.threshold
    }

    /// Whether `evaluation` is bad enough to leave.
    pub fn should_migrate(&self, evaluation: &Evaluation) -> bool {
        evaluation.score < self.threshold
    }

    /// Uniform choice among servers other than `current`.
    pub fn choose_target<R: Rng + ?Sized>(current: &ServerId, servers: &[ServerId], rng: &mut R) -> Option<ServerId> {
        let candidates: Vec<&ServerId> = servers.iter().filter(|s| *s != current).collect();
        candidates.choose(rng).map(|s| (*s).clone())
    }

    /// Ask `agent` to score its current server and record the result.
    pub async fn evaluate(&self, agent: &Agent, ctx: &mut TurnContext<'_>) -> Evaluation {
        let Some(server) = ctx.store.server_of(agent.id()).cloned() else {
            return Evaluation {
                score: 0,
                reason: String::new(),
            };
        };
        let feed = ctx.store.mixed_feed(
            agent.id(),
            &server,
            ctx.config.feed.max_following_posts,
            ctx.config.feed.max_server_posts,
        );
        let prompt = {
            let memories = agent
                .memory()
                .relevant(MemoryContext::Interaction, ctx.config.memory.relevant_limit);
            prompts::environment_evaluation(agent.id(), &agent.profile, &server, &feed, &memories)
        };
        let reply = ctx.oracle.query(&prompt, QueryKind::EnvironmentEvaluation).await;
        let evaluation = Evaluation::from_reply(&reply);
        if reply.is_fallback() {
            tracing::warn!("{} evaluation degraded: {}", agent.id(), reply.to_value());
        }

        ctx.store.record_satisfaction(
            agent.id(),
            &server,
            SatisfactionRecord {
                score: evaluation.score,
                reason: evaluation.reason.clone(),
                round: ctx.round,
            },
        );
        ctx.emit(SimEvent::Satisfaction {
            round: ctx.round,
            user: agent.id().clone(),
            server,
            score: evaluation.score,
            reason: evaluation.reason.clone(),
        });
        evaluation
    }

    /// Move `agent` if `evaluation` is below the threshold.
    ///
    /// With fewer than two servers nothing happens.
    pub async fn maybe_migrate(
        &self,
        agent: &mut Agent,
        evaluation: &Evaluation,
        ctx: &mut TurnContext<'_>,
    ) -> Option<Migration> {
        if !self.should_migrate(evaluation) {
            return None;
        }
        let from = ctx.store.server_of(agent.id()).cloned()?;
        let to = Self::choose_target(&from, ctx.store.servers(), &mut *ctx.rng)?;

        ctx.store.change_server(agent.id(), to.clone());
        let record = format!(
            "User {} migrated from server {} to server {} (score={})",
            agent.id(),
            from,
            to,
            evaluation.score
        );
        ctx.store.push_migration_reason(record.clone());
        tracing::warn!("{}", record);
        ctx.emit(SimEvent::Migration {
            round: ctx.round,
            user: agent.id().clone(),
            from: from.clone(),
            to: to.clone(),
            score: evaluation.score,
            reason: evaluation.reason.clone(),
        });

        agent
            .remember(
                ActionKind::Migrate,
                format!("Migrated from server {from} to server {to}"),
                &to,
                format!("migrated due to dissatisfaction: {}", evaluation.reason),
                ctx,
            )
            .await;

        Some(Migration { from, to, record })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::Profile;
    use crate::config::Config;
    use crate::events::RecordingSink;
    use crate::network::{SocialGraphStore, UserId};
    use crate::oracle::ScriptedOracle;
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_chacha::ChaCha8Rng;
    use serde_json::json;

    fn servers(names: &[&str]) -> Vec<ServerId> {
        names.iter().map(|s| ServerId::from(*s)).collect()
    }

    /// user_0 alone on server A.
    struct Fixture {
        config: Config,
        store: SocialGraphStore,
        oracle: ScriptedOracle,
        events: RecordingSink,
        rng: StdRng,
        agent: Agent,
    }

    impl Fixture {
        fn new(names: &[&str]) -> Self {
            let config = Config::default();
            let mut store = SocialGraphStore::new(servers(names));
            store.add_user(&UserId::for_index(0), ServerId::from("A"));
            let agent = Agent::new(0, Profile::default(), &config.memory);
            Self {
                config,
                store,
                oracle: ScriptedOracle::new(),
                events: RecordingSink::new(),
                rng: StdRng::seed_from_u64(3),
                agent,
            }
        }

        async fn evaluate_and_migrate(&mut self) -> (Evaluation, Option<Migration>) {
            let policy = MigrationPolicy::default();
            let mut ctx = TurnContext {
                store: &mut self.store,
                oracle: &self.oracle,
                config: &self.config,
                events: &self.events,
                rng: &mut self.rng,
                round: 2,
            };
            let evaluation = policy.evaluate(&self.agent, &mut ctx).await;
            let migration = policy.maybe_migrate(&mut self.agent, &evaluation, &mut ctx).await;
            (evaluation, migration)
        }
    }

    #[test]
    fn test_score_parsing() {
        let parsed = |v| Evaluation::from_reply(&OracleReply::Parsed(v));
        assert_eq!(parsed(json!({"score": 7, "reason": "lively"})).score, 7);
        assert_eq!(parsed(json!({"score": 4.0})).score, 4);
        assert_eq!(parsed(json!({"score": " 3 "})).score, 3);
        assert_eq!(parsed(json!({"score": "great"})).score, 0);
        assert_eq!(parsed(json!({"reason": "no score"})).score, 0);
        assert_eq!(parsed(json!({"score": 7})).reason, "");
    }

    #[test]
    fn test_threshold() {
        let policy = MigrationPolicy::default();
        assert_eq!(policy.threshold(), 6);
        let eval = |score| Evaluation {
            score,
            reason: String::new(),
        };
        assert!(policy.should_migrate(&eval(5)));
        assert!(policy.should_migrate(&eval(0)));
        assert!(!policy.should_migrate(&eval(6)));
    }

    #[test]
    fn test_target_never_current() {
        let all = servers(&["A", "B", "C"]);
        let mut rng = ChaCha8Rng::seed_from_u64(11);
        let mut seen = std::collections::BTreeSet::new();
        for _ in 0..200 {
            let target = MigrationPolicy::choose_target(&all[0], &all, &mut rng).unwrap();
            assert_ne!(target, all[0]);
            seen.insert(target);
        }
        assert_eq!(seen.len(), 2);
    }

    #[test]
    fn test_single_server_has_no_target() {
        let one = servers(&["A"]);
        let mut rng = ChaCha8Rng::seed_from_u64(1);
        assert!(MigrationPolicy::choose_target(&one[0], &one, &mut rng).is_none());
    }

    #[tokio::test]
    async fn test_score_at_threshold_stays() {
        let mut fx = Fixture::new(&["A", "B", "C"]);
        fx.oracle
            .push(QueryKind::EnvironmentEvaluation, json!({"score": 6, "reason": "fine"}));

        let (evaluation, migration) = fx.evaluate_and_migrate().await;
        assert_eq!(evaluation.score, 6);
        assert!(migration.is_none());
        assert_eq!(fx.store.server_of(&UserId::for_index(0)), Some(&ServerId::from("A")));
        assert!(fx.store.migration_reasons().is_empty());
        assert!(fx.agent.memory().is_empty());
        assert!(fx.events.named("migration").is_empty());
    }

    #[tokio::test]
    async fn test_single_server_never_moves() {
        let mut fx = Fixture::new(&["A"]);
        fx.oracle
            .push(QueryKind::EnvironmentEvaluation, json!({"score": 2, "reason": "dull feed"}));
        let before = fx.store.user_servers().clone();

        let (evaluation, migration) = fx.evaluate_and_migrate().await;
        assert_eq!(evaluation.score, 2);
        assert!(migration.is_none());
        assert_eq!(fx.store.user_servers(), &before);
        assert!(fx.store.migration_reasons().is_empty());
        assert!(fx.agent.memory().is_empty());
    }

    #[tokio::test]
    async fn test_migration_is_remembered_on_new_server() {
        let mut fx = Fixture::new(&["A", "B", "C"]);
        fx.oracle
            .push(QueryKind::EnvironmentEvaluation, json!({"score": 3, "reason": "dull feed"}));

        let (_, migration) = fx.evaluate_and_migrate().await;
        let migration = migration.unwrap();
        assert_eq!(migration.from, ServerId::from("A"));
        assert_ne!(migration.to, migration.from);
        assert_eq!(fx.store.server_of(&UserId::for_index(0)), Some(&migration.to));
        assert_eq!(fx.store.migration_reasons(), &[migration.record.clone()]);
        assert!(migration.record.ends_with("(score=3)"));

        let memory = fx.agent.memory().items().last().unwrap();
        assert_eq!(memory.action, ActionKind::Migrate);
        assert_eq!(memory.server, migration.to);
        assert_eq!(memory.importance, 9);
        assert_eq!(memory.content, format!("Migrated from server A to server {}", migration.to));
        assert_eq!(memory.outcome, "migrated due to dissatisfaction: dull feed");
        assert_eq!(fx.events.named("migration").len(), 1);
    }

    #[tokio::test]
    async fn test_fallback_reply_records_zero() {
        let mut fx = Fixture::new(&["A", "B", "C"]);

        let (evaluation, migration) = fx.evaluate_and_migrate().await;
        assert_eq!(evaluation.score, 0);
        assert!(migration.is_some());

        let user = UserId::for_index(0);
        let records = &fx.store.satisfaction_history()[&user][&ServerId::from("A")];
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].score, 0);
        assert_eq!(records[0].round, 2);

        let scored = fx.events.named("satisfaction");
        assert_eq!(scored.len(), 1);
        match &scored[0] {
            SimEvent::Satisfaction { score, server, .. } => {
                assert_eq!(*score, 0);
                assert_eq!(server.as_str(), "A");
            }
            other => panic!("unexpected event {other:?}"),
        }
    }
}
