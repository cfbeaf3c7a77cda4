//! # Fedisim - Opinion Dynamics Across Federated Servers
//!
//! Turn-based simulation of language-model-driven social agents spread over
//! several servers. Agents post, comment, like, retweet and follow; each
//! interaction can shift their stance on a single topic, and agents that are
//! unhappy with the discussion on their server migrate to another one.
//!
//! ## Architecture
//!
//! ```text
//!                      ┌──────────────────┐
//!                      │ SimulationDriver │  rounds, posting, checkpoints
//!                      └────────┬─────────┘
//!            ┌──────────────────┼───────────────────┐
//!            v                  v                   v
//!      ┌──────────┐     ┌───────────────┐   ┌──────────────────┐
//!      │  Agent   │────>│MigrationPolicy│   │ SocialGraphStore │
//!      │ memory   │     └───────┬───────┘   │ posts, follows,  │
//!      │ stance   │             │           │ interaction graph│
//!      └────┬─────┘             │           └──────────────────┘
//!           │                   │
//!           v                   v
//!      ┌─────────────────────────────┐
//!      │ Oracle (chat completions)   │  truncation, retry, fallback
//!      └─────────────────────────────┘
//! ```
//!
//! ## Round Lifecycle
//!
//! ```text
//! [Posting] ──> [Agent turns, in order] ──> [Reporting] ──> [Checkpoint]
//!                  │
//!                  ├─ decide actions (oracle)
//!                  ├─ apply to store + memory, adjust stance
//!                  └─ evaluate server, maybe migrate
//! ```
//!
//! ## Quick Start
//!
//! ```rust,ignore
//! use fedisim::{Config, DryRunOracle, Simulation};
//!
//! let config = Config::default();
//! let profiles = fedisim::agent::load_profiles(&config.simulation.profiles_file)?;
//! let mut sim = Simulation::new(config, profiles, DryRunOracle::new(42))?;
//! sim.run().await?;
//! ```

pub mod agent;
pub mod config;
pub mod error;
pub mod events;
pub mod migration;
pub mod network;
pub mod oracle;
pub mod simulation;

pub use agent::{Agent, MemoryStore, Profile, Stance, StanceEngine};
pub use config::Config;
pub use error::{Result, SimError};
pub use events::{EventSink, JsonlSink, SimEvent, TracingSink};
pub use migration::{Evaluation, MigrationPolicy};
pub use network::{PostId, ServerId, SocialGraphStore, UserId};
pub use oracle::{DryRunOracle, Expect, Oracle, OracleClient, OracleReply};
pub use simulation::Simulation;

/// Crate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
