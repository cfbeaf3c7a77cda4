//! End-to-end simulation tests with a scripted oracle.
//!
//! These drive agents and whole rounds through the public API and check
//! the observable effects on the store, the agents and the output files.

use std::path::Path;

use fedisim::agent::{ActionKind, TurnContext};
use fedisim::config::Config;
use fedisim::events::RecordingSink;
use fedisim::network::{NewPost, PostId};
use fedisim::oracle::{QueryKind, ScriptedOracle};
use fedisim::simulation::report;
use fedisim::{Agent, MigrationPolicy, Profile, ServerId, SimEvent, Simulation, SocialGraphStore, Stance, UserId};
use rand::rngs::StdRng;
use rand::SeedableRng;
use serde_json::json;

fn config(dir: &Path, rounds: u32) -> Config {
    let mut config = Config::default();
    config.simulation.output_dir = dir.to_path_buf();
    config.simulation.total_rounds = rounds;
    config.simulation.key_rounds = vec![1];
    config.simulation.round_delay_ms = 0;
    config.simulation.seed = Some(42);
    config
}

fn profiles(n: usize) -> Vec<Profile> {
    (0..n)
        .map(|i| Profile {
            name: format!("Person {i}"),
            ..Profile::default()
        })
        .collect()
}

/// Oracle where everyone posts, nobody acts and everyone is content.
fn quiet_oracle() -> ScriptedOracle {
    ScriptedOracle::new()
        .with_default(QueryKind::PostCreation, json!({"content": "AI tools need oversight"}))
        .with_default(QueryKind::InteractionDecision, json!({"actions": []}))
        .with_default(QueryKind::EnvironmentEvaluation, json!({"score": 8, "reason": "calm"}))
}

#[tokio::test]
async fn test_low_score_moves_user_off_server() {
    let dir = tempfile::tempdir().unwrap();
    let oracle = quiet_oracle();
    oracle.push(
        QueryKind::EnvironmentEvaluation,
        json!({"score": 5, "reason": "too repetitive"}),
    );

    let mut sim = Simulation::new(config(dir.path(), 1), profiles(3), oracle).unwrap();
    let summaries = sim.run().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].migrations, 1);
    assert_eq!(summaries[0].posts_created, 3);

    let user = UserId::for_index(0);
    let server = sim.store().server_of(&user).unwrap().as_str().to_string();
    assert!(server == "B" || server == "C", "landed on {server}");

    let history = &sim.store().satisfaction_history()[&user];
    assert_eq!(history[&ServerId::from("A")][0].score, 5);

    let last = sim.agents()[0].memory().items().last().unwrap();
    assert_eq!(last.action, ActionKind::Migrate);
    assert_eq!(last.server.as_str(), server);
    assert!(last.outcome.contains("too repetitive"));

    let analysis = std::fs::read_to_string(report::analysis_path(dir.path(), 1)).unwrap();
    assert!(analysis.contains("User user_0 migrated from server A to server"));
    assert!(sim.store().migration_reasons().is_empty());

    let events = std::fs::read_to_string(dir.path().join("events.jsonl")).unwrap();
    assert!(events.lines().any(|l| l.contains("\"event\":\"migration\"")));
}

#[tokio::test]
async fn test_resume_continues_from_checkpoint() {
    let dir = tempfile::tempdir().unwrap();
    let oracle = quiet_oracle();
    oracle.push(QueryKind::EnvironmentEvaluation, json!({"score": 2, "reason": "hostile"}));

    let mut first = Simulation::new(config(dir.path(), 1), profiles(4), oracle).unwrap();
    first.run().await.unwrap();
    let moved_to = first.store().server_of(&UserId::for_index(0)).cloned().unwrap();
    let posts = first.store().total_posts();
    let memories = first.agents()[0].memory().len();

    let mut second = Simulation::new(config(dir.path(), 2), profiles(4), quiet_oracle()).unwrap();
    assert_eq!(second.latest_checkpoint(), Some(1));
    assert!(second.resume_from(1));
    assert_eq!(second.start_round(), 2);
    assert_eq!(second.store().server_of(&UserId::for_index(0)), Some(&moved_to));
    assert_eq!(second.store().total_posts(), posts);
    assert_eq!(second.agents()[0].memory().len(), memories);

    let summaries = second.run().await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].round, 2);
    assert_eq!(second.latest_checkpoint(), Some(2));
    assert!(second.store().total_posts() > posts);
}

struct Scene {
    config: Config,
    store: SocialGraphStore,
    oracle: ScriptedOracle,
    sink: RecordingSink,
    rng: StdRng,
    agent: Agent,
    post: PostId,
}

/// user_0 (neutral) and user_1 on server A, with one post by user_1.
fn scene() -> Scene {
    let config = Config::default();
    let mut store = SocialGraphStore::new(config.simulation.servers.clone());
    let a = ServerId::from("A");
    store.add_user(&UserId::for_index(0), a.clone());
    store.add_user(&UserId::for_index(1), a.clone());
    let post = store.add_post(
        NewPost::new(UserId::for_index(1), "Ban AI in schools", Stance::new(-2).unwrap()),
        &a,
    );
    let oracle = ScriptedOracle::new()
        .with_default(QueryKind::EnvironmentEvaluation, json!({"score": 9, "reason": "good talk"}));
    let agent = Agent::new(0, Profile::default(), &config.memory);
    Scene {
        config,
        store,
        oracle,
        sink: RecordingSink::new(),
        rng: StdRng::seed_from_u64(5),
        agent,
        post,
    }
}

#[tokio::test]
async fn test_double_like_counts_once() {
    let mut s = scene();
    s.oracle.push(
        QueryKind::InteractionDecision,
        json!({"actions": [
            {"type": "like", "target_post_id": s.post.0},
            {"type": "like", "target_post_id": s.post.0}
        ]}),
    );
    s.oracle
        .set_default(QueryKind::StanceAdjustment, json!({"new_stance": 0, "reason": "unmoved"}));

    let outcome = {
        let mut ctx = TurnContext {
            store: &mut s.store,
            oracle: &s.oracle,
            config: &s.config,
            events: &s.sink,
            rng: &mut s.rng,
            round: 1,
        };
        s.agent.take_turn(&mut ctx, &MigrationPolicy::default()).await
    };

    assert_eq!(outcome.actions, 2);
    assert!(outcome.migration.is_none());
    assert_eq!(s.store.post(s.post).unwrap().likes, 1);
    let edge = s
        .store
        .graph()
        .edge(&UserId::for_index(0), &UserId::for_index(1))
        .unwrap();
    assert_eq!(edge.weight, 1);
    assert_eq!(s.oracle.prompts(QueryKind::StanceAdjustment).len(), 1);
    assert_eq!(s.agent.memory().items().filter(|m| m.action == ActionKind::Like).count(), 1);
    assert_eq!(s.sink.named("action_taken").len(), 2);
}

#[tokio::test]
async fn test_thin_reason_blocks_large_stance_move() {
    let mut s = scene();
    s.oracle.push(
        QueryKind::InteractionDecision,
        json!({"actions": [{"type": "comment", "target_post_id": s.post.0, "content": "Fair point"}]}),
    );
    s.oracle
        .push(QueryKind::StanceAdjustment, json!({"new_stance": 2, "reason": "ok"}));

    {
        let mut ctx = TurnContext {
            store: &mut s.store,
            oracle: &s.oracle,
            config: &s.config,
            events: &s.sink,
            rng: &mut s.rng,
            round: 3,
        };
        s.agent.take_turn(&mut ctx, &MigrationPolicy::default()).await;
    }

    assert_eq!(s.agent.stance(), Stance::NEUTRAL);
    assert!(s.agent.profile.stance_history.is_empty());
    assert_eq!(s.store.post(s.post).unwrap().comments.len(), 1);

    let rejected = s.sink.named("stance_rejected");
    assert_eq!(rejected.len(), 1);
    match &rejected[0] {
        SimEvent::StanceRejected { proposed, reason, .. } => {
            assert_eq!(proposed, &json!(2));
            assert_eq!(reason, "ok");
        }
        other => panic!("unexpected event {other:?}"),
    }
    assert!(s.sink.named("stance_changed").is_empty());
}

#[tokio::test]
async fn test_reasoned_move_is_recorded() {
    let mut s = scene();
    s.oracle.push(
        QueryKind::InteractionDecision,
        json!({"actions": [{"type": "like", "target_post_id": s.post.0}]}),
    );
    s.oracle.push(
        QueryKind::StanceAdjustment,
        json!({"new_stance": -2, "reason": "The classroom examples convinced me completely"}),
    );

    {
        let mut ctx = TurnContext {
            store: &mut s.store,
            oracle: &s.oracle,
            config: &s.config,
            events: &s.sink,
            rng: &mut s.rng,
            round: 4,
        };
        s.agent.take_turn(&mut ctx, &MigrationPolicy::default()).await;
    }

    assert_eq!(s.agent.stance().value(), -2);
    let change = &s.agent.profile.stance_history[0];
    assert_eq!(change.round, 4);
    assert_eq!(change.change_type, "Interaction impact (like)");
    assert_eq!(s.sink.named("dramatic_stance_change").len(), 1);
}
