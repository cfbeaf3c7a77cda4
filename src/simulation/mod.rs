//! Round driver.
//!
//! Owns the store, the agents and the oracle, and runs the round loop:
//!
//! ```text
//! for round in start..=total:
//!   1. posting phase      random subset of agents writes one post each
//!   2. decision phase     every agent, in order: feed -> actions ->
//!                         evaluation -> maybe migrate
//!   3. reporting          distributions; full analysis on key rounds
//!   4. checkpoint         agents, graph, state
//! final reports
//! ```
//!
//! Agents act strictly one after another; all effects of agent `i` are
//! visible to agent `i + 1`.

pub mod report;

use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::agent::{Agent, AgentState, Profile, TurnContext};
use crate::config::Config;
use crate::error::{Result, SimError};
use crate::events::{self, EventSink, JsonlSink, SimEvent, TracingSink};
use crate::migration::MigrationPolicy;
use crate::network::{read_json, write_json_atomic, CheckpointFiles, ServerId, SocialGraphStore, UserId};
use crate::oracle::Oracle;
use report::RoundMetrics;

/// What a round did.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RoundSummary {
    /// Round number
    pub round: u32,
    /// Agents picked to post
    pub posters: usize,
    /// Posts created in the posting phase
    pub posts_created: usize,
    /// Agents that gained an interaction edge
    pub active_users: BTreeSet<UserId>,
    /// Server changes
    pub migrations: usize,
}

/// The whole simulation.
pub struct Simulation<O: Oracle> {
    config: Config,
    oracle: O,
    store: SocialGraphStore,
    agents: Vec<Agent>,
    events: Vec<Box<dyn EventSink>>,
    rng: StdRng,
    files: CheckpointFiles,
    policy: MigrationPolicy,
    start_round: u32,
}

impl<O: Oracle> Simulation<O> {
    /// Fresh simulation: agent `i` is `user_<i>` on `servers[i % len]`.
    pub fn new(config: Config, profiles: Vec<Profile>, oracle: O) -> Result<Self> {
        config.validate()?;
        if profiles.is_empty() {
            return Err(SimError::Profile("no profiles to simulate".to_string()));
        }

        let output_dir = config.simulation.output_dir.clone();
        std::fs::create_dir_all(&output_dir).map_err(|e| {
            SimError::Persistence(format!("Failed to create {}: {e}", output_dir.display()))
        })?;

        let servers = config.simulation.servers.clone();
        let mut store = SocialGraphStore::new(servers.clone());
        let agents: Vec<Agent> = profiles
            .into_iter()
            .enumerate()
            .map(|(i, profile)| {
                let agent = Agent::new(i, profile, &config.memory);
                store.add_user(agent.id(), servers[i % servers.len()].clone());
                agent
            })
            .collect();

        let mut sinks: Vec<Box<dyn EventSink>> = vec![Box::new(TracingSink)];
        if config.simulation.event_log {
            sinks.push(Box::new(JsonlSink::open(&output_dir.join("events.jsonl"))?));
        }

        let rng = match config.simulation.seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };

        tracing::info!(
            "Simulation ready: {} agents on {} servers, {} rounds",
            agents.len(),
            servers.len(),
            config.simulation.total_rounds
        );

        Ok(Self {
            policy: MigrationPolicy::new(&config.simulation),
            files: CheckpointFiles::new(output_dir),
            config,
            oracle,
            store,
            agents,
            events: sinks,
            rng,
            start_round: 1,
        })
    }

    /// Add another event destination.
    pub fn with_event_sink(mut self, sink: impl EventSink + 'static) -> Self {
        self.events.push(Box::new(sink));
        self
    }

    /// Configuration in use.
    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Shared network state.
    pub fn store(&self) -> &SocialGraphStore {
        &self.store
    }

    /// Agents in processing order.
    pub fn agents(&self) -> &[Agent] {
        &self.agents
    }

    /// The oracle.
    pub fn oracle(&self) -> &O {
        &self.oracle
    }

    /// First round [`run`](Self::run) will execute.
    pub fn start_round(&self) -> u32 {
        self.start_round
    }

    /// Checkpoint layout of the output directory.
    pub fn files(&self) -> &CheckpointFiles {
        &self.files
    }

    /// Highest round saved in the output directory.
    pub fn latest_checkpoint(&self) -> Option<u32> {
        self.files.latest_round()
    }

    /// Continue after `round`.
    ///
    /// On failure the simulation stays at round 1 with fresh state and
    /// `false` is returned. Agent profiles and memories are restored when
    /// the round's agent file exists; otherwise agents keep their loaded
    /// profiles.
    pub fn resume_from(&mut self, round: u32) -> bool {
        let store = match SocialGraphStore::restore(&self.files, &self.config.simulation.servers, round) {
            Ok(store) => store,
            Err(e) => {
                tracing::warn!("Failed to load saved state for round {}: {}. Starting from round 1", round, e);
                return false;
            }
        };
        self.store = store;

        let agents_path = self.files.agents_path(round);
        if agents_path.is_file() {
            match read_json::<Vec<AgentState>>(&agents_path) {
                Ok(states) => self.restore_agents(states),
                Err(e) => tracing::warn!("Ignoring agent file for round {}: {}", round, e),
            }
        } else {
            tracing::info!("No agent file for round {}, profiles start fresh", round);
        }

        let servers = self.store.servers().to_vec();
        for (i, agent) in self.agents.iter().enumerate() {
            if self.store.server_of(agent.id()).is_none() {
                self.store.add_user(agent.id(), servers[i % servers.len()].clone());
            }
        }

        self.start_round = round + 1;
        tracing::info!("Will continue from round {}", self.start_round);
        true
    }

    fn restore_agents(&mut self, states: Vec<AgentState>) {
        let mut restored = 0;
        for state in states {
            if let Some(agent) = self.agents.iter_mut().find(|a| a.id() == &state.user_id) {
                *agent = Agent::from_state(state, &self.config.memory);
                restored += 1;
            }
        }
        tracing::info!("Restored {} of {} agents", restored, self.agents.len());
    }

    fn emit(&self, event: SimEvent) {
        events::emit(&self.events, &event);
    }

    fn server_distribution(&self) -> Vec<(ServerId, usize)> {
        self.store
            .servers()
            .iter()
            .map(|server| {
                let count = self
                    .agents
                    .iter()
                    .filter(|a| self.store.server_of(a.id()) == Some(server))
                    .count();
                (server.clone(), count)
            })
            .collect()
    }

    fn log_server_distribution(&self, heading: &str) {
        let parts: Vec<String> = self
            .server_distribution()
            .into_iter()
            .map(|(server, count)| format!("{server}={count}"))
            .collect();
        tracing::info!("{}: {}", heading, parts.join(", "));
    }

    fn log_stance_distribution(&self) {
        let parts: Vec<String> = report::stance_distribution(&self.agents)
            .into_iter()
            .map(|(stance, users)| format!("{}({})={}", stance.label(), stance, users.len()))
            .collect();
        tracing::info!("Stance distribution: {}", parts.join(", "));
    }

    fn poster_count(&mut self) -> usize {
        let n = self.agents.len();
        let min = self.config.simulation.min_posters.min(n);
        let max = (self.config.simulation.min_posters + 1).max(n / 4).min(n);
        self.rng.gen_range(min..=max.max(min))
    }

    /// Run one round.
    pub async fn run_round(&mut self, round: u32) -> RoundSummary {
        tracing::info!("==================== Round {} ====================", round);
        self.log_server_distribution("Current server distribution");

        let count = self.poster_count();
        let posters = rand::seq::index::sample(&mut self.rng, self.agents.len(), count).into_vec();
        tracing::info!("{} of {} users post this round", count, self.agents.len());

        let mut summary = RoundSummary {
            round,
            posters: count,
            ..RoundSummary::default()
        };

        {
            let mut ctx = TurnContext {
                store: &mut self.store,
                oracle: &self.oracle,
                config: &self.config,
                events: &self.events,
                rng: &mut self.rng,
                round,
            };

            for idx in posters {
                if self.agents[idx].create_post(&mut ctx).await.is_some() {
                    summary.posts_created += 1;
                }
            }

            for agent in self.agents.iter_mut() {
                let before = ctx.store.graph().edge_count();
                let outcome = agent.take_turn(&mut ctx, &self.policy).await;
                if ctx.store.graph().edge_count() > before {
                    summary.active_users.insert(agent.id().clone());
                }
                if outcome.migration.is_some() {
                    summary.migrations += 1;
                }
            }
        }

        self.log_server_distribution("Server distribution after round");
        self.log_stance_distribution();

        if self.config.simulation.is_key_round(round) {
            self.write_round_analysis(round, &summary.active_users);
        }

        let usage = self.oracle.usage();
        if usage.calls > 0 {
            tracing::info!(
                "Token usage so far: {} calls, {} prompt + {} completion = {} tokens",
                usage.calls,
                usage.prompt_tokens,
                usage.completion_tokens,
                usage.total_tokens
            );
        }
        self.emit(SimEvent::TokenUsage { round, usage });

        self.checkpoint(round);

        self.emit(SimEvent::RoundCompleted {
            round,
            total_posts: self.store.total_posts(),
            active_users: summary.active_users.len(),
            migrations: summary.migrations,
        });
        summary
    }

    fn write_round_analysis(&mut self, round: u32, active: &BTreeSet<UserId>) {
        let metrics = RoundMetrics::compute(&self.store, &self.agents, active);
        let text = report::round_analysis(round, &self.store, &self.agents, &metrics, self.store.migration_reasons());
        let path = report::analysis_path(self.files.dir(), round);
        match report::write_text(&path, &text) {
            Ok(()) => {
                self.store.take_migration_reasons();
                tracing::info!("Round {} analysis saved to {}", round, path.display());
            }
            Err(e) => tracing::warn!("Failed to save round {} analysis: {}", round, e),
        }
    }

    fn checkpoint(&self, round: u32) {
        let states: Vec<AgentState> = self.agents.iter().map(Agent::state).collect();
        let saved = write_json_atomic(&self.files.agents_path(round), &states)
            .and_then(|()| self.store.snapshot(&self.files, round));
        if let Err(e) = saved {
            tracing::warn!("Checkpoint for round {} failed, continuing in memory: {}", round, e);
        }
    }

    /// Run every remaining round, then write the final reports.
    pub async fn run(&mut self) -> Result<Vec<RoundSummary>> {
        let total = self.config.simulation.total_rounds;
        if self.start_round == 1 {
            self.log_server_distribution("Initial server distribution");
        }

        let delay = Duration::from_millis(self.config.simulation.round_delay_ms);
        let mut summaries = Vec::new();
        for round in self.start_round..=total {
            summaries.push(self.run_round(round).await);
            if !delay.is_zero() && round < total {
                tokio::time::sleep(delay).await;
            }
        }

        self.write_final_reports();
        tracing::info!("Simulation completed");
        Ok(summaries)
    }

    /// Paths of the end-of-run outputs.
    pub fn final_report_paths(&self) -> [PathBuf; 3] {
        let dir = self.files.dir();
        [
            dir.join("final_statistics.txt"),
            dir.join("final_user_profiles.json"),
            dir.join("satisfaction_history.json"),
        ]
    }

    /// Write final statistics, profiles and satisfaction history.
    pub fn write_final_reports(&self) {
        let [statistics, profiles, satisfaction] = self.final_report_paths();

        let text = report::final_statistics(
            self.config.simulation.total_rounds,
            &self.config.simulation.key_rounds,
            self.files.dir(),
            &self.store,
            &self.agents,
        );
        if let Err(e) = report::write_text(&statistics, &text) {
            tracing::warn!("Failed to save final statistics: {}", e);
        }

        let final_profiles: Vec<&Profile> = self.agents.iter().map(|a| &a.profile).collect();
        if let Err(e) = write_json_atomic(&profiles, &final_profiles) {
            tracing::warn!("Failed to save final profiles: {}", e);
        }
        if let Err(e) = write_json_atomic(&satisfaction, self.store.satisfaction_history()) {
            tracing::warn!("Failed to save satisfaction history: {}", e);
        }
        tracing::info!("Final reports saved to {}", self.files.dir().display());
    }
}
