//! Social graph store.
//!
//! Single owner of everything agents share: posts on every server, like and
//! comment ledgers, follow sets, the user -> server map, pending migration
//! reasons, satisfaction history and the interaction graph. Agents never
//! touch these directly; they go through the store's methods.
//!
//! ```text
//!   posts[server] ──┐
//!   post_index ─────┼── apply_interaction ──> likes / comments ledgers
//!                   │                     └─> graph edge actor -> author
//!   following ──────┴── follow / unfollow ──> graph "follow" label
//! ```

mod checkpoint;
pub mod graph;
pub mod post;

use std::collections::{BTreeMap, BTreeSet};

use chrono::Utc;
use serde::{Deserialize, Serialize};

pub use checkpoint::{read_json, write_json_atomic, CheckpointFiles, StoreState};
pub use graph::{EdgeData, GraphSnapshot, InteractionGraph, InteractionKind};
pub use post::{Comment, NewPost, Post};

macro_rules! string_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wrap a raw identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }
        }

        impl From<&str> for $name {
            fn from(id: &str) -> Self {
                Self(id.to_string())
            }
        }

        impl From<String> for $name {
            fn from(id: String) -> Self {
                Self(id)
            }
        }

        impl std::fmt::Display for $name {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str(&self.0)
            }
        }
    };
}

string_id!(
    /// User identifier, `user_<n>` for agents.
    UserId
);

string_id!(
    /// Server identifier.
    ServerId
);

/// Author name reserved for system posts; nobody interacts with those.
pub const SYSTEM_AUTHOR: &str = "System";

impl UserId {
    /// Identifier of the agent at `index` in the profile list.
    pub fn for_index(index: usize) -> Self {
        Self(format!("user_{index}"))
    }

    /// Whether this is the system author.
    pub fn is_system(&self) -> bool {
        self.0 == SYSTEM_AUTHOR
    }
}

/// Post identifier, unique across all servers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct PostId(pub u64);

impl std::fmt::Display for PostId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Interaction with a post.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PostInteraction {
    /// Like; at most once per user and post
    Like,
    /// Comment with text; at most once per user and post
    Comment(String),
    /// Retweet; the retweet post itself is added separately
    Retweet,
}

impl PostInteraction {
    /// Edge label this interaction adds.
    pub fn kind(&self) -> InteractionKind {
        match self {
            PostInteraction::Like => InteractionKind::LikePost,
            PostInteraction::Comment(_) => InteractionKind::CreateComment,
            PostInteraction::Retweet => InteractionKind::Retweet,
        }
    }
}

/// What [`SocialGraphStore::apply_interaction`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InteractionOutcome {
    /// Counters, ledgers and graph were updated
    Applied,
    /// No post with that id on any server
    PostNotFound,
    /// Actor is the post's author
    SelfInteraction,
    /// Post belongs to the system author
    SystemAuthor,
    /// Like repeated
    AlreadyLiked,
    /// Comment repeated
    AlreadyCommented,
}

impl InteractionOutcome {
    /// Whether state changed.
    pub fn is_applied(&self) -> bool {
        matches!(self, InteractionOutcome::Applied)
    }
}

/// One satisfaction evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SatisfactionRecord {
    /// Score, 0 when the reply had none
    pub score: i64,
    /// Oracle's reason
    pub reason: String,
    /// Round of the evaluation
    pub round: u32,
}

/// Satisfaction history per user and server.
pub type SatisfactionHistory = BTreeMap<UserId, BTreeMap<ServerId, Vec<SatisfactionRecord>>>;

/// Shared social state of the simulation.
#[derive(Debug, Clone, Default)]
pub struct SocialGraphStore {
    servers: Vec<ServerId>,
    posts: BTreeMap<ServerId, Vec<Post>>,
    post_index: BTreeMap<PostId, ServerId>,
    post_counter: u64,
    likes: BTreeMap<UserId, BTreeSet<PostId>>,
    comments: BTreeMap<UserId, BTreeSet<PostId>>,
    following: BTreeMap<UserId, BTreeSet<UserId>>,
    user_servers: BTreeMap<UserId, ServerId>,
    migration_reasons: Vec<String>,
    satisfaction: SatisfactionHistory,
    graph: InteractionGraph,
}

impl SocialGraphStore {
    /// Empty store over `servers`.
    pub fn new(servers: Vec<ServerId>) -> Self {
        let posts = servers.iter().map(|s| (s.clone(), Vec::new())).collect();
        Self {
            servers,
            posts,
            ..Self::default()
        }
    }

    /// Known servers, in configuration order.
    pub fn servers(&self) -> &[ServerId] {
        &self.servers
    }

    /// Register a user on `server`. Adds the graph node.
    pub fn add_user(&mut self, user: &UserId, server: ServerId) {
        self.graph.ensure_node(user);
        self.user_servers.insert(user.clone(), server);
    }

    /// Server `user` is currently on.
    pub fn server_of(&self, user: &UserId) -> Option<&ServerId> {
        self.user_servers.get(user)
    }

    /// User -> server map.
    pub fn user_servers(&self) -> &BTreeMap<UserId, ServerId> {
        &self.user_servers
    }

    /// Move `user` to `server`.
    pub fn change_server(&mut self, user: &UserId, server: ServerId) {
        tracing::info!("{} moved to server {}", user, server);
        self.user_servers.insert(user.clone(), server);
    }

    /// Add a post to `server` and return its fresh id.
    ///
    /// The server's list stays ordered by timestamp; equal timestamps keep
    /// insertion order.
    pub fn add_post(&mut self, new: NewPost, server: &ServerId) -> PostId {
        let post_id = PostId(self.post_counter);
        self.post_counter += 1;

        let post = Post {
            post_id,
            author: new.author,
            content: new.content,
            stance: new.stance,
            likes: 0,
            comments: Vec::new(),
            timestamp: new.timestamp.unwrap_or_else(Utc::now),
            server: server.clone(),
        };

        let list = self.posts.entry(server.clone()).or_default();
        let at = list.partition_point(|p| p.timestamp <= post.timestamp);
        list.insert(at, post);
        self.post_index.insert(post_id, server.clone());
        post_id
    }

    /// Post by id, on any server.
    pub fn post(&self, post_id: PostId) -> Option<&Post> {
        let server = self.post_index.get(&post_id)?;
        self.posts.get(server)?.iter().find(|p| p.post_id == post_id)
    }

    fn post_mut(&mut self, post_id: PostId) -> Option<&mut Post> {
        let server = self.post_index.get(&post_id)?;
        self.posts.get_mut(server)?.iter_mut().find(|p| p.post_id == post_id)
    }

    /// Posts on `server`, oldest first.
    pub fn server_posts(&self, server: &ServerId) -> &[Post] {
        self.posts.get(server).map(Vec::as_slice).unwrap_or(&[])
    }

    /// Posts on every server.
    pub fn all_posts(&self) -> impl Iterator<Item = &Post> + '_ {
        self.posts.values().flatten()
    }

    /// Total number of posts.
    pub fn total_posts(&self) -> usize {
        self.posts.values().map(Vec::len).sum()
    }

    /// Feed for `user` on `server`.
    ///
    /// The last `max_following` posts by followed authors across all
    /// servers, then the last `max_server` posts on `server` by everyone
    /// else. Both parts are in timestamp order.
    pub fn mixed_feed(&self, user: &UserId, server: &ServerId, max_following: usize, max_server: usize) -> Vec<Post> {
        let empty = BTreeSet::new();
        let following = self.following.get(user).unwrap_or(&empty);

        let mut followed: Vec<&Post> = self
            .all_posts()
            .filter(|p| following.contains(&p.author))
            .collect();
        followed.sort_by_key(|p| p.timestamp);
        let skip = followed.len().saturating_sub(max_following);

        let others: Vec<&Post> = self
            .server_posts(server)
            .iter()
            .filter(|p| !following.contains(&p.author))
            .collect();
        let skip_others = others.len().saturating_sub(max_server);

        followed
            .into_iter()
            .skip(skip)
            .chain(others.into_iter().skip(skip_others))
            .cloned()
            .collect()
    }

    /// Whether `user` already liked `post_id`.
    pub fn has_liked(&self, user: &UserId, post_id: PostId) -> bool {
        self.likes.get(user).is_some_and(|s| s.contains(&post_id))
    }

    /// Whether `user` already commented on `post_id`.
    pub fn has_commented(&self, user: &UserId, post_id: PostId) -> bool {
        self.comments.get(user).is_some_and(|s| s.contains(&post_id))
    }

    /// Apply a post interaction by `user`.
    ///
    /// On success the post counters change and the edge `user -> author`
    /// gains weight and the interaction's label.
    pub fn apply_interaction(&mut self, user: &UserId, post_id: PostId, interaction: PostInteraction) -> InteractionOutcome {
        let author = match self.post(post_id) {
            Some(post) => post.author.clone(),
            None => {
                tracing::debug!("Post {} not found for {}", post_id, user);
                return InteractionOutcome::PostNotFound;
            }
        };
        if author.is_system() {
            return InteractionOutcome::SystemAuthor;
        }
        if &author == user {
            return InteractionOutcome::SelfInteraction;
        }

        match &interaction {
            PostInteraction::Like => {
                if !self.likes.entry(user.clone()).or_default().insert(post_id) {
                    tracing::debug!("{} already liked post {}", user, post_id);
                    return InteractionOutcome::AlreadyLiked;
                }
            }
            PostInteraction::Comment(_) => {
                if !self.comments.entry(user.clone()).or_default().insert(post_id) {
                    tracing::debug!("{} already commented on post {}", user, post_id);
                    return InteractionOutcome::AlreadyCommented;
                }
            }
            PostInteraction::Retweet => {}
        }

        self.graph.upsert(user, &author, interaction.kind());

        if let Some(post) = self.post_mut(post_id) {
            match interaction {
                PostInteraction::Like => post.likes += 1,
                PostInteraction::Comment(content) => post.comments.push(Comment {
                    author: user.clone(),
                    content,
                }),
                PostInteraction::Retweet => {}
            }
        }
        tracing::debug!("{} -> {} ({})", user, author, post_id);
        InteractionOutcome::Applied
    }

    /// `follower` starts following `target`. False if already following or
    /// following oneself.
    pub fn follow(&mut self, follower: &UserId, target: &UserId) -> bool {
        if follower == target {
            return false;
        }
        if !self.following.entry(follower.clone()).or_default().insert(target.clone()) {
            return false;
        }
        self.graph.upsert(follower, target, InteractionKind::Follow);
        tracing::debug!("{} followed {}", follower, target);
        true
    }

    /// `follower` stops following `target`. False if not following.
    pub fn unfollow(&mut self, follower: &UserId, target: &UserId) -> bool {
        if follower == target {
            return false;
        }
        let removed = self
            .following
            .get_mut(follower)
            .is_some_and(|set| set.remove(target));
        if removed {
            self.graph.remove_kind(follower, target, InteractionKind::Follow);
            tracing::debug!("{} unfollowed {}", follower, target);
        }
        removed
    }

    /// Users `user` follows.
    pub fn following(&self, user: &UserId) -> Vec<UserId> {
        self.following
            .get(user)
            .map(|s| s.iter().cloned().collect())
            .unwrap_or_default()
    }

    /// Whether `follower` follows `target`.
    pub fn is_following(&self, follower: &UserId, target: &UserId) -> bool {
        self.following.get(follower).is_some_and(|s| s.contains(target))
    }

    /// Users following `user`.
    pub fn followers(&self, user: &UserId) -> Vec<UserId> {
        self.following
            .iter()
            .filter(|(_, set)| set.contains(user))
            .map(|(follower, _)| follower.clone())
            .collect()
    }

    /// Append a satisfaction record.
    pub fn record_satisfaction(&mut self, user: &UserId, server: &ServerId, record: SatisfactionRecord) {
        self.satisfaction
            .entry(user.clone())
            .or_default()
            .entry(server.clone())
            .or_default()
            .push(record);
    }

    /// All satisfaction records.
    pub fn satisfaction_history(&self) -> &SatisfactionHistory {
        &self.satisfaction
    }

    /// Note a migration for the next analysis report.
    pub fn push_migration_reason(&mut self, reason: String) {
        self.migration_reasons.push(reason);
    }

    /// Migration reasons since the last report.
    pub fn migration_reasons(&self) -> &[String] {
        &self.migration_reasons
    }

    /// Drain migration reasons.
    pub fn take_migration_reasons(&mut self) -> Vec<String> {
        std::mem::take(&mut self.migration_reasons)
    }

    /// The interaction graph.
    pub fn graph(&self) -> &InteractionGraph {
        &self.graph
    }
}
