//! Simulated users.
//!
//! An [`Agent`] owns a [`Profile`] and a [`MemoryStore`]. Everything else it
//! touches during a turn (the shared store, the oracle, the event sink, the
//! RNG) comes in through a [`TurnContext`] borrowed from the driver.
//!
//! ```text
//! take_turn
//!   ├── mixed feed ──> decision prompt ──> oracle ──> actions
//!   │                                                   │
//!   │     comment / retweet / like ──> store ──> memory ──> stance adjustment
//!   │     follow / unfollow        ──> store ──> memory
//!   │     silent                   ──────────> memory
//!   │
//!   └── evaluate environment ──> satisfaction record ──> maybe migrate
//! ```

pub mod actions;
pub mod memory;
pub mod prompts;
pub mod stance;

use std::path::Path;

use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

pub use actions::{parse_actions, Action};
pub use memory::{
    ActionKind, Compression, MemoryContext, MemoryItem, MemorySnapshot, MemoryStore, Reflection,
};
pub use stance::{Stance, StanceChange, StanceEngine, StanceOutOfRange, StanceVerdict};

use crate::config::{Config, MemoryConfig};
use crate::error::{Result, SimError};
use crate::events::{self, EventSink, SimEvent};
use crate::migration::{Migration, MigrationPolicy};
use crate::network::{NewPost, Post, PostId, PostInteraction, ServerId, SocialGraphStore, UserId};
use crate::oracle::{Oracle, QueryKind};
use prompts::FeedEntry;

fn moderate() -> String {
    "moderate".to_string()
}

/// Persona of one agent, as loaded from the profiles file.
///
/// Unknown keys are kept and written back out with the final profiles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Profile {
    /// Display name
    #[serde(default)]
    pub name: String,
    /// Age in years
    #[serde(default)]
    pub age: u32,
    /// Gender
    #[serde(default)]
    pub gender: String,
    /// Education level
    #[serde(default)]
    pub education: String,
    /// Occupation
    #[serde(default)]
    pub occupation: String,
    /// Interests
    #[serde(default)]
    pub interests: Vec<String>,
    /// Current stance on AI
    #[serde(default)]
    pub stance: Stance,
    /// Behaviour summary, replaced by reflections
    #[serde(default)]
    pub history: Vec<String>,
    /// Recent stance transitions, oldest first
    #[serde(default)]
    pub stance_history: Vec<StanceChange>,
    /// Big five: openness
    #[serde(default = "moderate")]
    pub openness: String,
    /// Big five: conscientiousness
    #[serde(default = "moderate")]
    pub conscientiousness: String,
    /// Big five: extraversion
    #[serde(default = "moderate")]
    pub extraversion: String,
    /// Big five: agreeableness
    #[serde(default = "moderate")]
    pub agreeableness: String,
    /// Big five: neuroticism
    #[serde(default = "moderate")]
    pub neuroticism: String,
    /// Any other attributes
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Default for Profile {
    fn default() -> Self {
        Self {
            name: String::new(),
            age: 0,
            gender: String::new(),
            education: String::new(),
            occupation: String::new(),
            interests: Vec::new(),
            stance: Stance::NEUTRAL,
            history: Vec::new(),
            stance_history: Vec::new(),
            openness: moderate(),
            conscientiousness: moderate(),
            extraversion: moderate(),
            agreeableness: moderate(),
            neuroticism: moderate(),
            extra: Map::new(),
        }
    }
}

/// Read the profiles file: a JSON array of [`Profile`] objects.
pub fn load_profiles(path: &Path) -> Result<Vec<Profile>> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| SimError::Profile(format!("Failed to read {}: {e}", path.display())))?;
    let profiles: Vec<Profile> = serde_json::from_str(&content)
        .map_err(|e| SimError::Profile(format!("Failed to parse {}: {e}", path.display())))?;
    if profiles.is_empty() {
        return Err(SimError::Profile(format!("{} contains no profiles", path.display())));
    }
    Ok(profiles)
}

/// Everything an agent borrows for one turn.
pub struct TurnContext<'a> {
    /// Shared network state
    pub store: &'a mut SocialGraphStore,
    /// Decision oracle
    pub oracle: &'a dyn Oracle,
    /// Run configuration
    pub config: &'a Config,
    /// Event destination
    pub events: &'a dyn EventSink,
    /// Run RNG
    pub rng: &'a mut StdRng,
    /// Current round
    pub round: u32,
}

impl TurnContext<'_> {
    /// Emit an event, swallowing sink failures.
    pub fn emit(&self, event: SimEvent) {
        events::emit(self.events, &event);
    }
}

/// What happened during one decision turn.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TurnOutcome {
    /// Actions parsed from the decision reply
    pub actions: usize,
    /// Satisfaction score given
    pub score: i64,
    /// Server change, if any
    pub migration: Option<Migration>,
}

/// Serialized agent, saved alongside each checkpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AgentState {
    /// Agent id
    pub user_id: UserId,
    /// Profile at save time
    pub profile: Profile,
    /// Memory at save time
    #[serde(default)]
    pub memory: MemorySnapshot,
}

/// One simulated user.
#[derive(Debug, Clone)]
pub struct Agent {
    id: UserId,
    /// Persona, stance and behaviour summary
    pub profile: Profile,
    memory: MemoryStore,
}

impl Agent {
    /// Agent `user_<index>`.
    pub fn new(index: usize, profile: Profile, memory: &MemoryConfig) -> Self {
        Self {
            id: UserId::for_index(index),
            profile,
            memory: MemoryStore::new(memory),
        }
    }

    /// Rebuild from a saved state.
    pub fn from_state(state: AgentState, memory: &MemoryConfig) -> Self {
        Self {
            id: state.user_id,
            profile: state.profile,
            memory: MemoryStore::from_snapshot(memory, state.memory),
        }
    }

    /// Serializable copy.
    pub fn state(&self) -> AgentState {
        AgentState {
            user_id: self.id.clone(),
            profile: self.profile.clone(),
            memory: self.memory.snapshot(),
        }
    }

    /// Agent id.
    pub fn id(&self) -> &UserId {
        &self.id
    }

    /// Current stance.
    pub fn stance(&self) -> Stance {
        self.profile.stance
    }

    /// Behaviour memory.
    pub fn memory(&self) -> &MemoryStore {
        &self.memory
    }

    fn current_server(&self, store: &SocialGraphStore) -> Option<ServerId> {
        let server = store.server_of(&self.id).cloned();
        if server.is_none() {
            tracing::warn!("{} is not assigned to any server", self.id);
        }
        server
    }

    /// Write an original post on the current server.
    pub async fn create_post(&mut self, ctx: &mut TurnContext<'_>) -> Option<PostId> {
        let server = self.current_server(ctx.store)?;
        tracing::debug!("{} preparing to post on server {}", self.id, server);

        let prompt = prompts::create_post(&self.profile);
        let reply = ctx.oracle.query(&prompt, QueryKind::PostCreation).await;
        let Some(content) = reply.str_field("content").map(str::trim).filter(|c| !c.is_empty()) else {
            tracing::warn!("{} produced no post content: {}", self.id, reply.to_value());
            return None;
        };
        let content = content.to_string();

        let post_id = ctx
            .store
            .add_post(NewPost::new(self.id.clone(), content.clone(), self.profile.stance), &server);
        tracing::info!("{} posted on server {}: {}", self.id, server, preview(&content, 30));
        ctx.emit(SimEvent::PostCreated {
            round: ctx.round,
            user: self.id.clone(),
            server: server.clone(),
            post_id,
            content: content.clone(),
        });

        self.remember(ActionKind::CreatePost, content, &server, "posted", ctx).await;
        Some(post_id)
    }

    /// Decide and perform actions on the mixed feed, then evaluate the
    /// environment and possibly migrate.
    pub async fn take_turn(&mut self, ctx: &mut TurnContext<'_>, policy: &MigrationPolicy) -> TurnOutcome {
        let Some(server) = self.current_server(ctx.store) else {
            return TurnOutcome::default();
        };
        let feed_config = &ctx.config.feed;
        let feed = ctx.store.mixed_feed(
            &self.id,
            &server,
            feed_config.max_following_posts,
            feed_config.max_server_posts,
        );
        let entries: Vec<FeedEntry> = feed
            .iter()
            .map(|p| FeedEntry::new(p, feed_config.max_post_content_len, ctx.store.has_liked(&self.id, p.post_id)))
            .collect();
        let following = ctx.store.following(&self.id);
        tracing::debug!(
            "{} (server {}) sees {} posts, follows {} users",
            self.id,
            server,
            feed.len(),
            following.len()
        );

        let prompt = {
            let memories = self
                .memory
                .relevant(MemoryContext::Interaction, ctx.config.memory.relevant_limit);
            prompts::decision(&self.profile, &entries, &following, &memories)
        };
        let reply = ctx.oracle.query(&prompt, QueryKind::InteractionDecision).await;

        let actions = parse_actions(&reply).unwrap_or_else(|| {
            tracing::warn!("{} did not receive valid actions, staying idle", self.id);
            Vec::new()
        });
        for action in &actions {
            ctx.emit(SimEvent::ActionTaken {
                round: ctx.round,
                user: self.id.clone(),
                action: action.name().to_string(),
                details: action_details(action),
            });
            self.perform(action, &feed, &server, ctx).await;
        }

        let evaluation = policy.evaluate(self, ctx).await;
        let migration = policy.maybe_migrate(self, &evaluation, ctx).await;
        if migration.is_none() {
            tracing::debug!("{} satisfied with {} (score={})", self.id, server, evaluation.score);
        }

        TurnOutcome {
            actions: actions.len(),
            score: evaluation.score,
            migration,
        }
    }

    /// Carry out one decided action.
    pub async fn perform(&mut self, action: &Action, feed: &[Post], server: &ServerId, ctx: &mut TurnContext<'_>) {
        match action {
            Action::Comment { post, content } => {
                let outcome = ctx
                    .store
                    .apply_interaction(&self.id, *post, PostInteraction::Comment(content.clone()));
                if !outcome.is_applied() {
                    tracing::debug!("{} comment on post {} not applied: {:?}", self.id, post, outcome);
                    return;
                }
                let Some(target) = ctx.store.post(*post).cloned() else {
                    return;
                };
                let memo = format!("commented on post by {}", target.author);
                self.remember(ActionKind::Comment, content.clone(), server, memo, ctx).await;
                self.adjust_stance(&target, ActionKind::Comment, content, ctx).await;
            }
            Action::Retweet { post } => {
                let Some(original) = feed.iter().find(|p| p.post_id == *post) else {
                    tracing::debug!("{} cannot retweet post {}: not in feed", self.id, post);
                    return;
                };
                let outcome = ctx.store.apply_interaction(&self.id, *post, PostInteraction::Retweet);
                if !outcome.is_applied() {
                    tracing::debug!("{} retweet of post {} not applied: {:?}", self.id, post, outcome);
                    return;
                }
                let content = format!("[Retweet] {}", original.content);
                let post_id = ctx
                    .store
                    .add_post(NewPost::new(self.id.clone(), content.clone(), original.stance), server);
                ctx.emit(SimEvent::PostCreated {
                    round: ctx.round,
                    user: self.id.clone(),
                    server: server.clone(),
                    post_id,
                    content: content.clone(),
                });
                let memo = format!("retweeted post by {}", original.author);
                self.remember(ActionKind::Retweet, content.clone(), server, memo, ctx).await;
                self.adjust_stance(original, ActionKind::Retweet, &content, ctx).await;
            }
            Action::Like { post } => {
                if ctx.store.has_liked(&self.id, *post) {
                    tracing::debug!("{} already liked post {}", self.id, post);
                    return;
                }
                let outcome = ctx.store.apply_interaction(&self.id, *post, PostInteraction::Like);
                if !outcome.is_applied() {
                    tracing::debug!("{} like of post {} not applied: {:?}", self.id, post, outcome);
                    return;
                }
                let Some(target) = ctx.store.post(*post).cloned() else {
                    return;
                };
                let content = format!("Liked {}'s post", target.author);
                let memo = format!("liked post by {}", target.author);
                self.remember(ActionKind::Like, content, server, memo, ctx).await;
                self.adjust_stance(&target, ActionKind::Like, "Liked post", ctx).await;
            }
            Action::Follow { target } => {
                if target == &self.id || ctx.store.server_of(target).is_none() {
                    tracing::warn!("{} gave invalid follow target {}", self.id, target);
                    return;
                }
                if ctx.store.follow(&self.id, target) {
                    let content = format!("Followed {target}");
                    let memo = format!("followed {target}");
                    self.remember(ActionKind::Follow, content, server, memo, ctx).await;
                } else {
                    tracing::debug!("{} already follows {}", self.id, target);
                }
            }
            Action::Unfollow { target } => {
                if target == &self.id {
                    tracing::warn!("{} gave invalid unfollow target {}", self.id, target);
                    return;
                }
                if ctx.store.unfollow(&self.id, target) {
                    let content = format!("Unfollowed {target}");
                    let memo = format!("unfollowed {target}");
                    self.remember(ActionKind::Unfollow, content, server, memo, ctx).await;
                } else {
                    tracing::debug!("{} does not follow {}", self.id, target);
                }
            }
            Action::Silent => {
                self.remember(ActionKind::Silent, "Chose to remain silent", server, "remained silent", ctx)
                    .await;
            }
        }
    }

    /// Ask whether an interaction with `post` moved the agent's stance.
    pub async fn adjust_stance(
        &mut self,
        post: &Post,
        action: ActionKind,
        action_content: &str,
        ctx: &mut TurnContext<'_>,
    ) -> Option<StanceChange> {
        let prompt = prompts::stance_adjustment(&self.profile, post, action.as_str(), action_content);
        let reply = ctx.oracle.query(&prompt, QueryKind::StanceAdjustment).await;
        let engine = StanceEngine::new(&ctx.config.stance);
        let current = self.profile.stance;

        match engine.assess(current, &reply) {
            StanceVerdict::NoDecision => {
                tracing::debug!("{} got no stance decision: {}", self.id, reply.to_value());
                None
            }
            StanceVerdict::Invalid(raw) => {
                tracing::warn!("{} received invalid stance {}, keeping {}", self.id, raw, current);
                ctx.emit(SimEvent::StanceRejected {
                    round: ctx.round,
                    user: self.id.clone(),
                    current,
                    proposed: raw,
                    reason: "not an integer in -2..=2".to_string(),
                });
                None
            }
            StanceVerdict::Rejected { proposed, reason } => {
                tracing::info!(
                    "{} stance change {} -> {} rejected: reason too thin ({:?})",
                    self.id,
                    current,
                    proposed,
                    reason
                );
                ctx.emit(SimEvent::StanceRejected {
                    round: ctx.round,
                    user: self.id.clone(),
                    current,
                    proposed: json!(proposed.value()),
                    reason,
                });
                None
            }
            StanceVerdict::Unchanged => None,
            StanceVerdict::Accepted { stance, reason } => {
                let change_type = format!("Interaction impact ({action})");
                let change = engine.apply(&mut self.profile, stance, change_type, reason, ctx.round)?;
                tracing::info!(
                    "{} stance {} -> {} after {}",
                    self.id,
                    change.old_stance,
                    change.new_stance,
                    action
                );
                ctx.emit(SimEvent::StanceChanged {
                    round: ctx.round,
                    user: self.id.clone(),
                    change: change.clone(),
                });
                if change.is_dramatic() {
                    tracing::warn!(
                        "{} dramatic stance change {} -> {}",
                        self.id,
                        change.old_stance,
                        change.new_stance
                    );
                    ctx.emit(SimEvent::DramaticStanceChange {
                        round: ctx.round,
                        user: self.id.clone(),
                        change: change.clone(),
                    });
                }
                Some(change)
            }
        }
    }

    /// Record a memory and, when due, condense memories into reflections.
    pub async fn remember(
        &mut self,
        action: ActionKind,
        content: impl Into<String>,
        server: &ServerId,
        outcome: impl Into<String>,
        ctx: &mut TurnContext<'_>,
    ) {
        let due = self.memory.record(action, content, server, self.profile.stance, outcome);
        if !due {
            return;
        }
        let outcome = match self.memory.maybe_compress(ctx.oracle).await {
            Compression::NotDue => return,
            Compression::Skipped { memories } => {
                tracing::debug!("{} has only {} memories, reflection skipped", self.id, memories);
                "skipped"
            }
            Compression::Generated { insights, .. } => {
                tracing::info!("{} reflected: {:?}", self.id, insights);
                "generated"
            }
            Compression::Failed { reason } => {
                tracing::warn!("{} reflection failed: {}", self.id, reason);
                "failed"
            }
        };
        self.profile.history = self.memory.reflection_contents();
        ctx.emit(SimEvent::MemoryCompression {
            round: ctx.round,
            user: self.id.clone(),
            outcome: outcome.to_string(),
            reflections: self.memory.reflections().len(),
        });
    }
}

fn action_details(action: &Action) -> Value {
    match action {
        Action::Comment { post, content } => json!({ "target_post_id": post, "content": content }),
        Action::Retweet { post } | Action::Like { post } => json!({ "target_post_id": post }),
        Action::Follow { target } | Action::Unfollow { target } => json!({ "target_user_id": target }),
        Action::Silent => json!({}),
    }
}

fn preview(text: &str, max_chars: usize) -> String {
    let mut cut: String = text.chars().take(max_chars).collect();
    if cut.len() < text.len() {
        cut.push_str("...");
    }
    cut
}
