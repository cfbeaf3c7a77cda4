//! Round metrics and text reports.
//!
//! | Metric                     | Definition                                          |
//! |----------------------------|-----------------------------------------------------|
//! | polarization variance      | population variance of agent stances                |
//! | pole mean distance         | mean positive stance minus mean negative stance     |
//! | same/cross-stance density  | edge weight share between like-minded agents        |
//! | information islands        | components of the undirected agent subgraph         |
//! | content diversity          | Shannon entropy over post texts                     |
//! | silence ratio              | agents that gained no edge this round               |
//! | clustering                 | mean local clustering of the undirected graph       |

use std::collections::{BTreeMap, BTreeSet};
use std::fmt::Write as _;
use std::path::Path;

use crate::agent::{Agent, Stance, StanceChange};
use crate::error::{Result, SimError};
use crate::network::{InteractionGraph, SocialGraphStore, UserId};

const RULE: &str = "--------------------------------------------------";

/// Agents per stance bucket; every bucket is present.
pub fn stance_distribution(agents: &[Agent]) -> BTreeMap<Stance, Vec<UserId>> {
    let mut buckets: BTreeMap<Stance, Vec<UserId>> = Stance::ALL.iter().map(|s| (*s, Vec::new())).collect();
    for agent in agents {
        let bucket = Stance::bucket(agent.stance().value() as f64);
        buckets.entry(bucket).or_default().push(agent.id().clone());
    }
    buckets
}

/// Stance variance and distance between the mean negative and the mean
/// positive stance (0 unless both sides exist).
pub fn polarization(stances: &[Stance]) -> (f64, f64) {
    if stances.is_empty() {
        return (0.0, 0.0);
    }
    let values: Vec<f64> = stances.iter().map(|s| s.value() as f64).collect();
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let variance = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;

    let left: Vec<f64> = values.iter().copied().filter(|v| *v < 0.0).collect();
    let right: Vec<f64> = values.iter().copied().filter(|v| *v > 0.0).collect();
    let pole_distance = if left.is_empty() || right.is_empty() {
        0.0
    } else {
        let left_mean = left.iter().sum::<f64>() / left.len() as f64;
        let right_mean = right.iter().sum::<f64>() / right.len() as f64;
        (right_mean - left_mean).abs()
    };
    (variance, pole_distance)
}

/// Share of edge weight between agents on the same side (same stance or
/// same sign) and between agents on different sides.
pub fn cohesion(graph: &InteractionGraph, stances: &BTreeMap<UserId, Stance>) -> (f64, f64) {
    let (mut same, mut cross) = (0u64, 0u64);
    for (source, target, data) in graph.edges() {
        let (Some(a), Some(b)) = (stances.get(source), stances.get(target)) else {
            continue;
        };
        if a.value() * b.value() > 0 || a == b {
            same += u64::from(data.weight);
        } else {
            cross += u64::from(data.weight);
        }
    }
    let total = same + cross;
    if total == 0 {
        return (0.0, 0.0);
    }
    (same as f64 / total as f64, cross as f64 / total as f64)
}

/// Shannon entropy (natural log) over the multiset of post texts.
pub fn content_diversity<'a>(contents: impl IntoIterator<Item = &'a str>) -> f64 {
    let mut counts: BTreeMap<&str, usize> = BTreeMap::new();
    for content in contents {
        *counts.entry(content).or_default() += 1;
    }
    let total: usize = counts.values().sum();
    if total == 0 {
        return 0.0;
    }
    -counts
        .values()
        .map(|&c| {
            let p = c as f64 / total as f64;
            p * (p + 1e-10).ln()
        })
        .sum::<f64>()
}

/// Mean local clustering coefficient of the undirected view.
pub fn average_clustering(graph: &InteractionGraph) -> f64 {
    let mut neighbours: BTreeMap<&UserId, BTreeSet<&UserId>> = BTreeMap::new();
    for (source, target, _) in graph.edges() {
        neighbours.entry(source).or_default().insert(target);
        neighbours.entry(target).or_default().insert(source);
    }
    let nodes = graph.node_count();
    if nodes == 0 {
        return 0.0;
    }
    let total: f64 = neighbours
        .values()
        .map(|adjacent| {
            let k = adjacent.len();
            if k < 2 {
                return 0.0;
            }
            let links = adjacent
                .iter()
                .map(|u| {
                    neighbours
                        .get(u)
                        .map_or(0, |theirs| theirs.intersection(adjacent).count())
                })
                .sum::<usize>()
                / 2;
            2.0 * links as f64 / (k * (k - 1)) as f64
        })
        .sum();
    total / nodes as f64
}

/// Metrics written to each key-round analysis.
#[derive(Debug, Clone, PartialEq)]
pub struct RoundMetrics {
    /// Agents per stance bucket
    pub stance_distribution: BTreeMap<Stance, Vec<UserId>>,
    /// Population variance of stances
    pub polarization_variance: f64,
    /// Distance between pole means
    pub pole_distance: f64,
    /// Edge weight share between like-minded agents
    pub same_stance_density: f64,
    /// Edge weight share across sides
    pub cross_stance_density: f64,
    /// Connected components among agents
    pub island_count: usize,
    /// Shannon entropy of post texts
    pub content_diversity: f64,
    /// Agents without a new edge this round
    pub silence_ratio: f64,
    /// Directed graph density
    pub density: f64,
    /// Mean local clustering
    pub clustering: f64,
}

impl RoundMetrics {
    /// Compute every metric for the current state.
    pub fn compute(store: &SocialGraphStore, agents: &[Agent], active: &BTreeSet<UserId>) -> Self {
        let stances: Vec<Stance> = agents.iter().map(Agent::stance).collect();
        let by_user: BTreeMap<UserId, Stance> = agents.iter().map(|a| (a.id().clone(), a.stance())).collect();
        let members: Vec<UserId> = agents.iter().map(|a| a.id().clone()).collect();
        let (polarization_variance, pole_distance) = polarization(&stances);
        let (same_stance_density, cross_stance_density) = cohesion(store.graph(), &by_user);
        let silent = agents.iter().filter(|a| !active.contains(a.id())).count();

        Self {
            stance_distribution: stance_distribution(agents),
            polarization_variance,
            pole_distance,
            same_stance_density,
            cross_stance_density,
            island_count: store.graph().island_count(&members),
            content_diversity: content_diversity(store.all_posts().map(|p| p.content.as_str())),
            silence_ratio: if agents.is_empty() {
                0.0
            } else {
                silent as f64 / agents.len() as f64
            },
            density: store.graph().density(),
            clustering: average_clustering(store.graph()),
        }
    }
}

fn write_distribution(out: &mut String, distribution: &BTreeMap<Stance, Vec<UserId>>) {
    for (stance, users) in distribution {
        let _ = writeln!(out, "{}({}): {} users", stance.label(), stance, users.len());
        if !users.is_empty() {
            let names: Vec<&str> = users.iter().map(UserId::as_str).collect();
            let _ = writeln!(out, "  Users: {}", names.join(", "));
        }
    }
}

/// Stance changes of every agent, sorted by user.
fn stance_changes(agents: &[Agent]) -> Vec<(&UserId, &StanceChange)> {
    let mut changes: Vec<(&UserId, &StanceChange)> = agents
        .iter()
        .flat_map(|a| a.profile.stance_history.iter().map(move |c| (a.id(), c)))
        .collect();
    changes.sort_by(|a, b| a.0.cmp(b.0));
    changes
}

fn write_change_types(out: &mut String, changes: &[(&UserId, &StanceChange)]) {
    let mut by_type: BTreeMap<&str, usize> = BTreeMap::new();
    for (_, change) in changes {
        *by_type.entry(change.change_type.as_str()).or_default() += 1;
    }
    for (change_type, count) in &by_type {
        let _ = writeln!(out, "  {change_type}: {count} times");
    }
}

/// Render the key-round analysis.
pub fn round_analysis(
    round: u32,
    store: &SocialGraphStore,
    agents: &[Agent],
    metrics: &RoundMetrics,
    migration_reasons: &[String],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Round {round} Social Network Analysis ===\n");
    for server in store.servers() {
        let count = store.user_servers().values().filter(|s| *s == server).count();
        let _ = writeln!(out, "Server {server}: {count} users");
    }
    let _ = writeln!(out, "\n{RULE}\n");
    let _ = writeln!(out, "This Round User Migration Records:");
    for reason in migration_reasons {
        let _ = writeln!(out, "{reason}");
    }
    let _ = writeln!(out, "\n{RULE}\n");
    let _ = writeln!(out, "Post Count by Server:");
    for server in store.servers() {
        let _ = writeln!(out, "Server {}: {} posts", server, store.server_posts(server).len());
    }
    let _ = writeln!(out, "\n{RULE}\n");
    let _ = writeln!(out, "Total Posts: {}", store.total_posts());
    let _ = writeln!(out, "Active Users: {}", store.graph().node_count());
    let _ = writeln!(out, "Total Interactions: {}\n", store.graph().edge_count());
    let _ = writeln!(out, "Average Clustering Coefficient: {:.4}", metrics.clustering);
    let _ = writeln!(out, "Network Density: {:.4}", metrics.density);

    let _ = writeln!(out, "\n=== Stance Distribution Statistics ===");
    write_distribution(&mut out, &metrics.stance_distribution);
    let _ = writeln!(out, "\n{RULE}\n");
    let _ = writeln!(out, "Polarization Index (Stance Variance): {:.4}", metrics.polarization_variance);
    let _ = writeln!(out, "Polarization Pole Mean Distance: {:.4}", metrics.pole_distance);
    let _ = writeln!(out, "Same-stance Interaction Density: {:.4}", metrics.same_stance_density);
    let _ = writeln!(out, "Different-stance Interaction Density: {:.4}", metrics.cross_stance_density);
    let _ = writeln!(out, "Information Island Count: {}", metrics.island_count);
    let _ = writeln!(out, "Content Diversity (Shannon): {:.4}", metrics.content_diversity);
    let _ = writeln!(out, "Silence Ratio: {:.4}", metrics.silence_ratio);

    let changes = stance_changes(agents);
    if !changes.is_empty() {
        let _ = writeln!(out, "\n=== Stance Change Analysis ===");
        let _ = writeln!(out, "Total Changes: {}", changes.len());
        let _ = writeln!(out, "Change Type Statistics:");
        write_change_types(&mut out, &changes);
        let _ = writeln!(out, "\nAll Stance Change Details:");
        for (user, change) in &changes {
            let _ = writeln!(
                out,
                "  {}: {} -> {} ({})",
                user, change.old_stance, change.new_stance, change.change_type
            );
        }
    }
    out
}

/// Render the end-of-run summary. Key-round analyses found under
/// `output_dir` are appended verbatim.
pub fn final_statistics(
    total_rounds: u32,
    key_rounds: &[u32],
    output_dir: &Path,
    store: &SocialGraphStore,
    agents: &[Agent],
) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "=== Social Network Simulation Final Statistics ===\n");
    let _ = writeln!(out, "Overall Statistics:");
    let _ = writeln!(out, "- Total Rounds: {total_rounds}");
    let _ = writeln!(out, "- Total Posts: {}", store.total_posts());
    let _ = writeln!(out, "- Total Users: {}", agents.len());
    let _ = writeln!(out, "- Active Users: {}", store.graph().node_count());
    let _ = writeln!(out, "- Total Interactions: {}\n", store.graph().edge_count());

    let _ = writeln!(out, "=== Final Stance Distribution Statistics ===");
    write_distribution(&mut out, &stance_distribution(agents));
    let _ = writeln!(out, "\n{RULE}\n");

    let _ = writeln!(out, "=== Stance Change History Statistics ===");
    for agent in agents.iter().filter(|a| !a.profile.stance_history.is_empty()) {
        let _ = writeln!(out, "\n{} stance change history:", agent.id());
        for change in &agent.profile.stance_history {
            let _ = writeln!(
                out,
                "  Round {}: {} -> {} - {}",
                change.round, change.old_stance, change.new_stance, change.change_type
            );
            if !change.reason.is_empty() {
                let _ = writeln!(out, "    Reason: {}", change.reason);
            }
        }
    }
    let changes = stance_changes(agents);
    let _ = writeln!(out, "\nOverall Statistics:");
    let _ = writeln!(out, "Total Stance Changes: {}", changes.len());
    let _ = writeln!(out, "Change Type Distribution:");
    write_change_types(&mut out, &changes);
    let _ = writeln!(out, "\n{RULE}\n");

    let _ = writeln!(out, "Key Round Statistics:");
    for round in key_rounds.iter().filter(|r| **r <= total_rounds) {
        let _ = writeln!(out, "\nRound {round}:");
        match std::fs::read_to_string(analysis_path(output_dir, *round)) {
            Ok(analysis) => out.push_str(&analysis),
            Err(_) => {
                let _ = writeln!(out, "Warning: Round {round} analysis file does not exist");
            }
        }
        let _ = writeln!(out, "\n{RULE}");
    }
    out
}

/// Location of a key-round analysis.
pub fn analysis_path(output_dir: &Path, round: u32) -> std::path::PathBuf {
    output_dir.join(format!("network_analysis_round_{round}.txt"))
}

/// Write a text report.
pub fn write_text(path: &Path, content: &str) -> Result<()> {
    std::fs::write(path, content)
        .map_err(|e| SimError::Persistence(format!("Failed to write {}: {e}", path.display())))
}
