//! Per-round checkpoints of the store.
//!
//! Files per round in the output directory:
//!
//! ```text
//! network_graph_round_<N>.json   nodes + weighted, labelled edges
//! network_state_round_<N>.json   posts, ledgers, follows, servers,
//!                                migration reasons, satisfaction
//! agents_round_<N>.json          profiles + memories (optional)
//! ```
//!
//! Each file is written to a temporary sibling and renamed into place, graph
//! first and state last. A round counts as saved only when both network
//! files exist.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::graph::{GraphSnapshot, InteractionGraph};
use super::{Post, PostId, SatisfactionHistory, ServerId, SocialGraphStore, UserId};
use crate::error::{Result, SimError};

const GRAPH_PREFIX: &str = "network_graph_round_";
const STATE_PREFIX: &str = "network_state_round_";
const AGENTS_PREFIX: &str = "agents_round_";

/// Store contents minus the graph.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StoreState {
    /// Posts per server, oldest first
    pub posts: BTreeMap<ServerId, Vec<Post>>,
    /// Next post id
    pub post_counter: u64,
    /// Posts each user liked
    pub user_likes: BTreeMap<UserId, BTreeSet<PostId>>,
    /// Posts each user commented on
    #[serde(default)]
    pub user_comments: BTreeMap<UserId, BTreeSet<PostId>>,
    /// Follow sets
    pub user_following: BTreeMap<UserId, BTreeSet<UserId>>,
    /// Current server of every user
    pub user_servers: BTreeMap<UserId, ServerId>,
    /// Migration reasons not yet reported
    pub migration_reasons: Vec<String>,
    /// Satisfaction history
    #[serde(default)]
    pub server_satisfaction_history: SatisfactionHistory,
}

/// File layout of one output directory.
#[derive(Debug, Clone)]
pub struct CheckpointFiles {
    dir: PathBuf,
}

impl CheckpointFiles {
    /// Checkpoints under `dir`.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Output directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Graph file of `round`.
    pub fn graph_path(&self, round: u32) -> PathBuf {
        self.dir.join(format!("{GRAPH_PREFIX}{round}.json"))
    }

    /// State file of `round`.
    pub fn state_path(&self, round: u32) -> PathBuf {
        self.dir.join(format!("{STATE_PREFIX}{round}.json"))
    }

    /// Agent profiles and memories of `round`. Optional on restore.
    pub fn agents_path(&self, round: u32) -> PathBuf {
        self.dir.join(format!("{AGENTS_PREFIX}{round}.json"))
    }

    /// Highest round with both files present.
    pub fn latest_round(&self) -> Option<u32> {
        let entries = std::fs::read_dir(&self.dir).ok()?;
        entries
            .filter_map(|entry| entry.ok())
            .filter_map(|entry| {
                let name = entry.file_name();
                let name = name.to_str()?;
                name.strip_prefix(STATE_PREFIX)?.strip_suffix(".json")?.parse::<u32>().ok()
            })
            .filter(|round| self.graph_path(*round).is_file())
            .max()
    }
}

/// Serialize `value` as pretty JSON to `path` via a temporary file + rename.
pub fn write_json_atomic<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);
    std::fs::write(&tmp, json)
        .map_err(|e| SimError::Persistence(format!("Failed to write {}: {e}", tmp.display())))?;
    std::fs::rename(&tmp, path)
        .map_err(|e| SimError::Persistence(format!("Failed to move {} into place: {e}", path.display())))?;
    Ok(())
}

/// Read a JSON file written by [`write_json_atomic`].
pub fn read_json<T: for<'de> Deserialize<'de>>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| SimError::Persistence(format!("Failed to read {}: {e}", path.display())))?;
    serde_json::from_str(&content)
        .map_err(|e| SimError::Persistence(format!("Failed to parse {}: {e}", path.display())))
}

impl SocialGraphStore {
    /// Everything except the graph, in serializable form.
    pub fn state(&self) -> StoreState {
        StoreState {
            posts: self.posts.clone(),
            post_counter: self.post_counter,
            user_likes: self.likes.clone(),
            user_comments: self.comments.clone(),
            user_following: self.following.clone(),
            user_servers: self.user_servers.clone(),
            migration_reasons: self.migration_reasons.clone(),
            server_satisfaction_history: self.satisfaction.clone(),
        }
    }

    /// Rebuild from parts. `servers` fixes the server order; servers only
    /// present in the state are appended.
    pub fn from_parts(servers: &[ServerId], state: StoreState, graph: &GraphSnapshot) -> Self {
        let mut all_servers = servers.to_vec();
        for server in state.posts.keys() {
            if !all_servers.contains(server) {
                all_servers.push(server.clone());
            }
        }

        let mut posts = state.posts;
        for server in &all_servers {
            posts.entry(server.clone()).or_default();
        }
        let post_index = posts
            .iter()
            .flat_map(|(server, list)| list.iter().map(move |p| (p.post_id, server.clone())))
            .collect();
        let next_id = posts
            .values()
            .flatten()
            .map(|p| p.post_id.0 + 1)
            .max()
            .unwrap_or(0);

        Self {
            servers: all_servers,
            posts,
            post_index,
            post_counter: state.post_counter.max(next_id),
            likes: state.user_likes,
            comments: state.user_comments,
            following: state.user_following,
            user_servers: state.user_servers,
            migration_reasons: state.migration_reasons,
            satisfaction: state.server_satisfaction_history,
            graph: InteractionGraph::from_snapshot(graph),
        }
    }

    /// Write the checkpoint pair for `round`.
    pub fn snapshot(&self, files: &CheckpointFiles, round: u32) -> Result<()> {
        std::fs::create_dir_all(files.dir())?;
        write_json_atomic(&files.graph_path(round), &self.graph.snapshot())?;
        write_json_atomic(&files.state_path(round), &self.state())?;
        tracing::info!("Network state saved for round {}", round);
        Ok(())
    }

    /// Load the checkpoint pair for `round`.
    pub fn restore(files: &CheckpointFiles, servers: &[ServerId], round: u32) -> Result<Self> {
        let graph: GraphSnapshot = read_json(&files.graph_path(round))?;
        let state: StoreState = read_json(&files.state_path(round))?;
        tracing::info!("Loaded network state for round {}", round);
        Ok(Self::from_parts(servers, state, &graph))
    }
}
