//! Stance values and the rules for changing them.
//!
//! A stance is one of five integers, `-2` (strongly against AI) through
//! `2` (strongly for). Changes proposed by the oracle pass through
//! [`StanceEngine`], which rejects large swings that come without a
//! substantive reason and records accepted ones in the agent's bounded
//! stance history.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::Profile;
use crate::config::StanceConfig;
use crate::oracle::OracleReply;

/// Stance outside `-2..=2`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("stance {0} is outside -2..=2")]
pub struct StanceOutOfRange(pub i64);

/// Opinion on the discussion topic.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "i64", into = "i64")]
pub struct Stance(i8);

impl Stance {
    /// Strongly against.
    pub const MIN: Stance = Stance(-2);
    /// Neutral.
    pub const NEUTRAL: Stance = Stance(0);
    /// Strongly for.
    pub const MAX: Stance = Stance(2);

    /// All five values, ascending.
    pub const ALL: [Stance; 5] = [Stance(-2), Stance(-1), Stance(0), Stance(1), Stance(2)];

    /// Checked constructor.
    pub fn new(value: i64) -> Option<Self> {
        Self::try_from(value).ok()
    }

    /// Integer value.
    pub fn value(self) -> i64 {
        i64::from(self.0)
    }

    /// Whether this is `-2` or `2`.
    pub fn is_extreme(self) -> bool {
        self == Self::MIN || self == Self::MAX
    }

    /// Absolute difference.
    pub fn distance(self, other: Stance) -> u8 {
        (self.0 - other.0).unsigned_abs()
    }

    /// Bucket a (possibly fractional) stance for reporting.
    ///
    /// Clamps to `[-2, 2]`, then splits at -1.5, -0.5, 0.5 and 1.5.
    pub fn bucket(value: f64) -> Stance {
        let v = value.clamp(-2.0, 2.0);
        if v < -1.5 {
            Stance(-2)
        } else if v < -0.5 {
            Stance(-1)
        } else if v < 0.5 {
            Stance(0)
        } else if v < 1.5 {
            Stance(1)
        } else {
            Stance(2)
        }
    }

    /// Report label.
    pub fn label(self) -> &'static str {
        match self.0 {
            -2 => "Strongly Against",
            -1 => "Against",
            0 => "Neutral",
            1 => "Support",
            _ => "Strongly Support",
        }
    }
}

impl TryFrom<i64> for Stance {
    type Error = StanceOutOfRange;

    fn try_from(value: i64) -> Result<Self, Self::Error> {
        if (-2..=2).contains(&value) {
            Ok(Stance(value as i8))
        } else {
            Err(StanceOutOfRange(value))
        }
    }
}

impl From<Stance> for i64 {
    fn from(stance: Stance) -> Self {
        stance.value()
    }
}

impl std::fmt::Display for Stance {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One recorded stance transition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StanceChange {
    /// Before
    pub old_stance: Stance,
    /// After
    pub new_stance: Stance,
    /// What caused it, e.g. `Interaction impact (like)`
    pub change_type: String,
    /// Oracle's justification
    #[serde(default)]
    pub reason: String,
    /// Round it happened in
    #[serde(default)]
    pub round: u32,
}

impl StanceChange {
    /// Size of the move.
    pub fn magnitude(&self) -> u8 {
        self.old_stance.distance(self.new_stance)
    }

    /// Moves of two or more steps.
    pub fn is_dramatic(&self) -> bool {
        self.magnitude() >= 2
    }
}

/// How the engine judged an oracle stance reply.
#[derive(Debug, Clone, PartialEq)]
pub enum StanceVerdict {
    /// Fallback or no `new_stance` field
    NoDecision,
    /// `new_stance` was not an integer in range
    Invalid(Value),
    /// Valid value, but the reason is too thin for the size of the move
    Rejected {
        /// Proposed stance
        proposed: Stance,
        /// Reason given
        reason: String,
    },
    /// Same as the current stance
    Unchanged,
    /// Change to apply
    Accepted {
        /// New stance
        stance: Stance,
        /// Reason given
        reason: String,
    },
}

/// Validates and records stance transitions.
#[derive(Debug, Clone)]
pub struct StanceEngine {
    history_max: usize,
    large_change_reason_min: usize,
    extreme_flip_reason_min: usize,
}

impl Default for StanceEngine {
    fn default() -> Self {
        Self::new(&StanceConfig::default())
    }
}

fn integral(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n.as_i64().or_else(|| {
            n.as_f64()
                .filter(|f| f.fract() == 0.0 && f.abs() <= i64::MAX as f64)
                .map(|f| f as i64)
        }),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

impl StanceEngine {
    /// Engine with the configured thresholds.
    pub fn new(config: &StanceConfig) -> Self {
        Self {
            history_max: config.history_max,
            large_change_reason_min: config.large_change_reason_min,
            extreme_flip_reason_min: config.extreme_flip_reason_min,
        }
    }

    /// Whether `old -> new` is justified by `reason`.
    ///
    /// A move of two or more steps needs a trimmed reason of at least the
    /// large-change minimum; a flip between the two extremes needs at least
    /// the extreme-flip minimum.
    pub fn validate(&self, old: Stance, new: Stance, reason: &str) -> bool {
        let reason_len = reason.trim().chars().count();
        if old.distance(new) >= 2 && reason_len < self.large_change_reason_min {
            return false;
        }
        if old.is_extreme() && new.is_extreme() && old != new && reason_len < self.extreme_flip_reason_min {
            return false;
        }
        true
    }

    /// Judge an oracle reply of the form `{reason, new_stance}`.
    pub fn assess(&self, current: Stance, reply: &OracleReply) -> StanceVerdict {
        let Some(raw) = reply.field("new_stance") else {
            return StanceVerdict::NoDecision;
        };
        let Some(proposed) = integral(raw).and_then(Stance::new) else {
            return StanceVerdict::Invalid(raw.clone());
        };
        let reason = reply.str_field("reason").unwrap_or_default().to_string();

        if !self.validate(current, proposed, &reason) {
            return StanceVerdict::Rejected { proposed, reason };
        }
        if proposed == current {
            return StanceVerdict::Unchanged;
        }
        StanceVerdict::Accepted {
            stance: proposed,
            reason,
        }
    }

    /// Move `profile` to `new`, recording the transition.
    ///
    /// Returns `None` when the stance is already `new`. The history keeps
    /// only the most recent entries.
    pub fn apply(
        &self,
        profile: &mut Profile,
        new: Stance,
        change_type: impl Into<String>,
        reason: impl Into<String>,
        round: u32,
    ) -> Option<StanceChange> {
        let old = profile.stance;
        if old == new {
            return None;
        }
        let change = StanceChange {
            old_stance: old,
            new_stance: new,
            change_type: change_type.into(),
            reason: reason.into(),
            round,
        };
        profile.stance = new;
        profile.stance_history.push(change.clone());
        let overflow = profile.stance_history.len().saturating_sub(self.history_max);
        if overflow > 0 {
            profile.stance_history.drain(..overflow);
        }
        Some(change)
    }
}
