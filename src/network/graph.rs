//! Directed interaction graph over users.
//!
//! Edge `u -> v` exists when `u` has interacted with `v`. It carries the
//! number of interactions and the set of interaction kinds seen. Edges are
//! created lazily and removed only when their last kind label is stripped.

use std::collections::{BTreeMap, BTreeSet};

use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::unionfind::UnionFind;
use petgraph::visit::EdgeRef;
use serde::{Deserialize, Serialize};

use super::UserId;

/// Interaction labels carried on edges.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InteractionKind {
    /// Follow relationship
    Follow,
    /// Liked one of the target's posts
    LikePost,
    /// Commented on one of the target's posts
    CreateComment,
    /// Retweeted one of the target's posts
    Retweet,
}

impl InteractionKind {
    /// Wire name.
    pub fn as_str(&self) -> &'static str {
        match self {
            InteractionKind::Follow => "follow",
            InteractionKind::LikePost => "like_post",
            InteractionKind::CreateComment => "create_comment",
            InteractionKind::Retweet => "retweet",
        }
    }
}

impl std::fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EdgeData {
    /// Interactions counted on this edge (never decremented)
    pub weight: u32,
    /// Kinds seen on this edge
    pub kinds: BTreeSet<InteractionKind>,
}

/// Serialized edge.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EdgeSnapshot {
    /// Actor
    pub source: UserId,
    /// Target
    pub target: UserId,
    /// Interaction count
    pub weight: u32,
    /// Kind labels
    pub types: Vec<InteractionKind>,
}

/// Serialized graph.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct GraphSnapshot {
    /// All nodes, including isolated ones
    pub nodes: Vec<UserId>,
    /// All edges
    pub edges: Vec<EdgeSnapshot>,
}

/// Interaction graph with a user -> node index map.
#[derive(Debug, Clone, Default)]
pub struct InteractionGraph {
    graph: DiGraph<UserId, EdgeData>,
    nodes: BTreeMap<UserId, NodeIndex>,
}

impl InteractionGraph {
    /// Empty graph.
    pub fn new() -> Self {
        Self::default()
    }

    /// Node for `user`, created on first use.
    pub fn ensure_node(&mut self, user: &UserId) -> NodeIndex {
        if let Some(idx) = self.nodes.get(user) {
            return *idx;
        }
        let idx = self.graph.add_node(user.clone());
        self.nodes.insert(user.clone(), idx);
        idx
    }

    /// Record one interaction `from -> to`. Self-loops are refused.
    pub fn upsert(&mut self, from: &UserId, to: &UserId, kind: InteractionKind) -> bool {
        if from == to {
            return false;
        }
        let a = self.ensure_node(from);
        let b = self.ensure_node(to);
        match self.graph.find_edge(a, b) {
            Some(edge) => {
                let data = &mut self.graph[edge];
                data.weight += 1;
                data.kinds.insert(kind);
            }
            None => {
                let mut kinds = BTreeSet::new();
                kinds.insert(kind);
                self.graph.add_edge(a, b, EdgeData { weight: 1, kinds });
            }
        }
        true
    }

    /// Strip `kind` from `from -> to`; drop the edge if no kinds remain.
    pub fn remove_kind(&mut self, from: &UserId, to: &UserId, kind: InteractionKind) {
        let (Some(&a), Some(&b)) = (self.nodes.get(from), self.nodes.get(to)) else {
            return;
        };
        if let Some(edge) = self.graph.find_edge(a, b) {
            let data = &mut self.graph[edge];
            data.kinds.remove(&kind);
            if data.kinds.is_empty() {
                self.graph.remove_edge(edge);
            }
        }
    }

    /// Payload of `from -> to`.
    pub fn edge(&self, from: &UserId, to: &UserId) -> Option<&EdgeData> {
        let a = *self.nodes.get(from)?;
        let b = *self.nodes.get(to)?;
        self.graph.find_edge(a, b).map(|e| &self.graph[e])
    }

    /// Number of nodes.
    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    /// Number of edges.
    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Every edge as `(source, target, data)`.
    pub fn edges(&self) -> impl Iterator<Item = (&UserId, &UserId, &EdgeData)> + '_ {
        self.graph
            .edge_references()
            .map(|e| (&self.graph[e.source()], &self.graph[e.target()], e.weight()))
    }

    /// Directed density `m / (n (n - 1))`.
    pub fn density(&self) -> f64 {
        let n = self.node_count();
        if n < 2 {
            return 0.0;
        }
        self.edge_count() as f64 / (n * (n - 1)) as f64
    }

    /// Connected components of the undirected view restricted to `members`.
    ///
    /// Members without edges count as their own component.
    pub fn island_count(&self, members: &[UserId]) -> usize {
        let member_set: BTreeSet<&UserId> = members.iter().collect();
        if member_set.is_empty() {
            return 0;
        }
        let position: BTreeMap<&UserId, usize> = member_set.iter().enumerate().map(|(i, u)| (*u, i)).collect();
        let mut components = UnionFind::<usize>::new(position.len());
        for (source, target, _) in self.edges() {
            if let (Some(&a), Some(&b)) = (position.get(source), position.get(target)) {
                components.union(a, b);
            }
        }
        let roots: BTreeSet<usize> = (0..position.len()).map(|i| components.find(i)).collect();
        roots.len()
    }

    /// Serializable form.
    pub fn snapshot(&self) -> GraphSnapshot {
        GraphSnapshot {
            nodes: self.graph.node_weights().cloned().collect(),
            edges: self
                .edges()
                .map(|(source, target, data)| EdgeSnapshot {
                    source: source.clone(),
                    target: target.clone(),
                    weight: data.weight,
                    types: data.kinds.iter().copied().collect(),
                })
                .collect(),
        }
    }

    /// Rebuild from a snapshot.
    pub fn from_snapshot(snapshot: &GraphSnapshot) -> Self {
        let mut graph = Self::new();
        for node in &snapshot.nodes {
            graph.ensure_node(node);
        }
        for edge in &snapshot.edges {
            if edge.source == edge.target {
                continue;
            }
            let a = graph.ensure_node(&edge.source);
            let b = graph.ensure_node(&edge.target);
            graph.graph.update_edge(
                a,
                b,
                EdgeData {
                    weight: edge.weight,
                    kinds: edge.types.iter().copied().collect(),
                },
            );
        }
        graph
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn u(name: &str) -> UserId {
        UserId::from(name)
    }

    #[test]
    fn test_upsert_accumulates_weight_and_kinds() {
        let mut g = InteractionGraph::new();
        assert!(g.upsert(&u("a"), &u("b"), InteractionKind::LikePost));
        assert!(g.upsert(&u("a"), &u("b"), InteractionKind::CreateComment));
        let edge = g.edge(&u("a"), &u("b")).unwrap();
        assert_eq!(edge.weight, 2);
        assert_eq!(edge.kinds.len(), 2);
        assert!(g.edge(&u("b"), &u("a")).is_none());
    }

    #[test]
    fn test_self_loop_refused() {
        let mut g = InteractionGraph::new();
        assert!(!g.upsert(&u("a"), &u("a"), InteractionKind::Follow));
        assert_eq!(g.edge_count(), 0);
    }

    #[test]
    fn test_remove_kind_keeps_edge_with_other_labels() {
        let mut g = InteractionGraph::new();
        g.upsert(&u("a"), &u("b"), InteractionKind::Follow);
        g.upsert(&u("a"), &u("b"), InteractionKind::LikePost);
        g.remove_kind(&u("a"), &u("b"), InteractionKind::Follow);
        let edge = g.edge(&u("a"), &u("b")).unwrap();
        assert_eq!(edge.weight, 2);
        assert!(!edge.kinds.contains(&InteractionKind::Follow));

        g.remove_kind(&u("a"), &u("b"), InteractionKind::LikePost);
        assert!(g.edge(&u("a"), &u("b")).is_none());
        assert_eq!(g.node_count(), 2);
    }

    #[test]
    fn test_island_count() {
        let mut g = InteractionGraph::new();
        g.upsert(&u("a"), &u("b"), InteractionKind::Follow);
        g.upsert(&u("c"), &u("b"), InteractionKind::LikePost);
        g.upsert(&u("d"), &u("e"), InteractionKind::LikePost);
        // "System" is not a member, so the edge to it does not join islands
        g.upsert(&u("f"), &u("System"), InteractionKind::LikePost);
        let members: Vec<UserId> = ["a", "b", "c", "d", "e", "f", "g"].into_iter().map(u).collect();
        // {a,b,c} {d,e} {f} {g}
        assert_eq!(g.island_count(&members), 4);
    }

    #[test]
    fn test_density() {
        let mut g = InteractionGraph::new();
        assert!(g.density().abs() < f64::EPSILON);
        g.upsert(&u("a"), &u("b"), InteractionKind::Follow);
        assert!((g.density() - 0.5).abs() < 1e-9);
    }

    #[test]
    fn test_snapshot_restores_graph() {
        let mut g = InteractionGraph::new();
        g.ensure_node(&u("lonely"));
        g.upsert(&u("a"), &u("b"), InteractionKind::Follow);
        g.upsert(&u("a"), &u("b"), InteractionKind::Retweet);
        let restored = InteractionGraph::from_snapshot(&g.snapshot());
        assert_eq!(restored.node_count(), 3);
        assert_eq!(restored.edge(&u("a"), &u("b")), g.edge(&u("a"), &u("b")));
    }
}
