//! Configuration management.
//!
//! Supports configuration from:
//! - TOML config files
//! - Environment variables
//! - CLI arguments (applied by the binary on top of the two above)
//!
//! Every tunable of the simulation lives here. One [`Config`] is built at
//! startup and handed by reference to each component.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{Result, SimError};
use crate::network::ServerId;

/// Main configuration struct
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Chat-completion endpoint configuration
    #[serde(default)]
    pub oracle: OracleConfig,

    /// Retry and backoff for oracle calls
    #[serde(default)]
    pub retry: RetryConfig,

    /// Per-agent memory bounds and reflection triggers
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Stance change validation
    #[serde(default)]
    pub stance: StanceConfig,

    /// Feed composition
    #[serde(default)]
    pub feed: FeedConfig,

    /// Round loop, servers and output locations
    #[serde(default)]
    pub simulation: SimulationConfig,
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: impl Into<PathBuf>) -> Result<Self> {
        let path = path.into();
        let content = std::fs::read_to_string(&path)
            .map_err(|e| SimError::Config(format!("Failed to read config file: {e}")))?;

        let mut config: Self = toml::from_str(&content)
            .map_err(|e| SimError::Config(format!("Failed to parse config: {e}")))?;
        config.apply_env();
        Ok(config)
    }

    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let mut config = Self::default();
        config.apply_env();
        config
    }

    /// Overlay environment variables onto this config.
    pub fn apply_env(&mut self) {
        // Oracle settings
        if let Ok(key) = std::env::var("FEDISIM_API_KEY").or_else(|_| std::env::var("OPENAI_API_KEY")) {
            if !key.is_empty() {
                self.oracle.api_key = Some(key);
            }
        }
        if let Ok(url) = std::env::var("FEDISIM_BASE_URL") {
            self.oracle.base_url = url;
        }
        if let Ok(model) = std::env::var("FEDISIM_MODEL") {
            self.oracle.model = model;
        }

        // Simulation settings
        if let Ok(dir) = std::env::var("FEDISIM_OUTPUT_DIR") {
            self.simulation.output_dir = PathBuf::from(dir);
        }
        if let Ok(rounds) = std::env::var("FEDISIM_ROUNDS") {
            if let Ok(rounds) = rounds.parse() {
                self.simulation.total_rounds = rounds;
            }
        }
    }

    /// Reject settings the simulation cannot run with.
    pub fn validate(&self) -> Result<()> {
        let servers = &self.simulation.servers;
        if servers.is_empty() {
            return Err(SimError::Config("at least one server is required".to_string()));
        }
        let mut seen = std::collections::BTreeSet::new();
        for server in servers {
            if !seen.insert(server) {
                return Err(SimError::Config(format!("duplicate server id: {server}")));
            }
        }
        if self.simulation.total_rounds == 0 {
            return Err(SimError::Config("total_rounds must be at least 1".to_string()));
        }
        if self.retry.max_attempts == 0 {
            return Err(SimError::Config("retry.max_attempts must be at least 1".to_string()));
        }
        if self.retry.jitter_low > self.retry.jitter_high || self.retry.jitter_low < 0.0 {
            return Err(SimError::Config(format!(
                "invalid jitter range [{}, {}]",
                self.retry.jitter_low, self.retry.jitter_high
            )));
        }
        if !(self.oracle.shrink_ratio > 0.0 && self.oracle.shrink_ratio < 1.0) {
            return Err(SimError::Config(format!(
                "oracle.shrink_ratio must be in (0, 1), got {}",
                self.oracle.shrink_ratio
            )));
        }
        if self.oracle.truncate_target_tokens > self.oracle.truncate_ceiling_tokens {
            return Err(SimError::Config(
                "oracle.truncate_target_tokens must not exceed oracle.truncate_ceiling_tokens".to_string(),
            ));
        }
        Ok(())
    }
}

/// Chat-completion endpoint configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct OracleConfig {
    /// Base URL; requests go to `{base_url}/chat/completions`
    pub base_url: String,

    /// Bearer key (usually from the environment, never written back out)
    #[serde(skip_serializing)]
    pub api_key: Option<String>,

    /// Model name sent in every request
    pub model: String,

    /// Sampling temperature
    pub temperature: f32,

    /// Request timeout in seconds
    pub timeout_secs: u64,

    /// Prompts estimated above this many tokens are truncated
    pub max_prompt_tokens: usize,

    /// Token count the first truncation pass aims for
    pub truncate_target_tokens: usize,

    /// Truncated prompts keep shrinking until at most this many tokens
    pub truncate_ceiling_tokens: usize,

    /// Each further truncation pass keeps this fraction of the characters
    pub shrink_ratio: f64,
}

impl Default for OracleConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.openai.com/v1".to_string(),
            api_key: None,
            model: "gpt-4o-mini".to_string(),
            temperature: 0.7,
            timeout_secs: 60,
            max_prompt_tokens: 10_000,
            truncate_target_tokens: 50_000,
            truncate_ceiling_tokens: 60_000,
            shrink_ratio: 0.8,
        }
    }
}

/// Retry and backoff for oracle calls
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Total attempts per query, including the first
    pub max_attempts: u32,

    /// Delay before the first retry, in seconds
    pub base_delay_secs: f64,

    /// Multiplier applied per attempt
    pub backoff_factor: f64,

    /// Upper bound on the un-jittered delay, in seconds
    pub max_delay_secs: f64,

    /// Lower bound of the uniform jitter multiplier
    pub jitter_low: f64,

    /// Upper bound of the uniform jitter multiplier
    pub jitter_high: f64,

    /// HTTP statuses worth retrying
    pub retryable_status_codes: Vec<u16>,

    /// Case-insensitive body fragments that mark an error as transient
    pub retryable_substrings: Vec<String>,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay_secs: 2.0,
            backoff_factor: 1.8,
            max_delay_secs: 20.0,
            jitter_low: 0.5,
            jitter_high: 1.5,
            retryable_status_codes: vec![429, 500, 502, 503, 504],
            retryable_substrings: vec![
                "upstream load saturated".to_string(),
                "saturated".to_string(),
                "rate limit".to_string(),
                "overloaded".to_string(),
                "model_not_found".to_string(),
            ],
        }
    }
}

/// Per-agent memory bounds and reflection triggers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MemoryConfig {
    /// Memory items kept per agent
    pub max_items: usize,

    /// Accumulated importance that triggers a reflection
    pub compression_threshold: u32,

    /// Most recent memories shown to the reflection prompt
    pub reflection_window: usize,

    /// Reflection is skipped below this many memories
    pub min_memories_for_reflection: usize,

    /// Insights accepted from one reflection reply
    pub max_insights: usize,

    /// Reflections kept per agent
    pub max_reflections: usize,

    /// Importance assigned to every reflection
    pub reflection_importance: u8,

    /// Recent memories scanned when selecting relevant ones
    pub relevant_scan_window: usize,

    /// Relevant memories included in a prompt
    pub relevant_limit: usize,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_items: 100,
            compression_threshold: 50,
            reflection_window: 20,
            min_memories_for_reflection: 5,
            max_insights: 2,
            max_reflections: 3,
            reflection_importance: 8,
            relevant_scan_window: 10,
            relevant_limit: 5,
        }
    }
}

/// Stance change validation
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StanceConfig {
    /// Stance transitions kept per agent
    pub history_max: usize,

    /// Minimum trimmed reason length for a change of two or more steps
    pub large_change_reason_min: usize,

    /// Minimum trimmed reason length for a flip between the two extremes
    pub extreme_flip_reason_min: usize,
}

impl Default for StanceConfig {
    fn default() -> Self {
        Self {
            history_max: 20,
            large_change_reason_min: 10,
            extreme_flip_reason_min: 20,
        }
    }
}

/// Feed composition
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// Posts from followed authors shown per feed
    pub max_following_posts: usize,

    /// Posts from the current server shown per feed
    pub max_server_posts: usize,

    /// Post content is cut to this many characters in decision prompts
    pub max_post_content_len: usize,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            max_following_posts: 3,
            max_server_posts: 6,
            max_post_content_len: 50,
        }
    }
}

/// Round loop, servers and output locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    /// Last round to run
    pub total_rounds: u32,

    /// Rounds that get a full network analysis file
    pub key_rounds: Vec<u32>,

    /// Server identifiers; agent `i` starts on `servers[i % len]`
    pub servers: Vec<ServerId>,

    /// JSON array of agent profiles
    pub profiles_file: PathBuf,

    /// Checkpoints, reports and event logs are written here
    pub output_dir: PathBuf,

    /// Lower bound on posters per round
    pub min_posters: usize,

    /// Satisfaction scores below this trigger migration
    pub migration_threshold: i64,

    /// Pause between rounds in milliseconds
    pub round_delay_ms: u64,

    /// RNG seed for poster sampling and migration targets
    pub seed: Option<u64>,

    /// Append structured events to `events.jsonl` in the output directory
    pub event_log: bool,
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            total_rounds: 30,
            key_rounds: (1..=30).collect(),
            servers: ["A", "B", "C"].into_iter().map(ServerId::from).collect(),
            profiles_file: PathBuf::from("profiles.json"),
            output_dir: PathBuf::from("output"),
            min_posters: 3,
            migration_threshold: 6,
            round_delay_ms: 500,
            seed: None,
            event_log: true,
        }
    }
}

impl SimulationConfig {
    /// Whether `round` gets the extended analysis.
    pub fn is_key_round(&self, round: u32) -> bool {
        self.key_rounds.contains(&round)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.oracle.model, "gpt-4o-mini");
        assert_eq!(config.retry.max_attempts, 5);
        assert_eq!(config.memory.max_items, 100);
        assert_eq!(config.stance.history_max, 20);
        assert_eq!(config.simulation.servers.len(), 3);
        assert!(config.simulation.is_key_round(30));
        assert!(!config.simulation.is_key_round(31));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_config_from_toml() {
        let toml = r#"
            [oracle]
            base_url = "http://localhost:9000/v1"
            model = "local-model"
            timeout_secs = 5

            [retry]
            max_attempts = 2
            base_delay_secs = 0.0

            [simulation]
            total_rounds = 4
            key_rounds = [2, 4]
            servers = ["north", "south"]
        "#;

        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.oracle.base_url, "http://localhost:9000/v1");
        assert_eq!(config.oracle.timeout_secs, 5);
        // unspecified fields keep their defaults
        assert!((config.oracle.temperature - 0.7).abs() < f32::EPSILON);
        assert_eq!(config.retry.max_attempts, 2);
        assert_eq!(config.retry.retryable_status_codes, vec![429, 500, 502, 503, 504]);
        assert_eq!(config.simulation.total_rounds, 4);
        assert_eq!(config.simulation.servers[1].as_str(), "south");
        assert_eq!(config.feed.max_server_posts, 6);
    }

    #[test]
    fn test_validate_rejects_duplicate_servers() {
        let mut config = Config::default();
        config.simulation.servers = vec![ServerId::from("A"), ServerId::from("A")];
        assert!(matches!(config.validate(), Err(SimError::Config(_))));
    }

    #[test]
    fn test_validate_rejects_bad_jitter() {
        let mut config = Config::default();
        config.retry.jitter_low = 2.0;
        config.retry.jitter_high = 1.0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_truncation_limits_are_independent() {
        let config = Config::default();
        assert_eq!(config.oracle.max_prompt_tokens, 10_000);
        assert_eq!(config.oracle.truncate_target_tokens, 50_000);
        assert_eq!(config.oracle.truncate_ceiling_tokens, 60_000);

        let mut config = Config::default();
        config.oracle.truncate_target_tokens = 70_000;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_api_key_not_serialized() {
        let mut config = Config::default();
        config.oracle.api_key = Some("sk-secret".to_string());
        let rendered = toml::to_string(&config).unwrap();
        assert!(!rendered.contains("sk-secret"));
    }
}
