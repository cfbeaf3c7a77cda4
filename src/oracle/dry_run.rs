//! Offline oracle for `--dry-run`.
//!
//! Produces well-formed replies for every query kind by reading the few
//! facts it needs (post ids, authors, current stance) straight out of the
//! prompt. Lets the whole pipeline run end to end without an API key.

use std::sync::Mutex;

use async_trait::async_trait;
use lazy_static::lazy_static;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::{Rng, SeedableRng};
use regex::Regex;
use serde_json::{json, Value};

use super::{Oracle, OracleReply, QueryKind};

lazy_static! {
    static ref POST_ID: Regex = Regex::new(r#""post_id":\s*(\d+)"#).unwrap();
    static ref AUTHOR: Regex = Regex::new(r#""author":\s*"([^"]+)""#).unwrap();
    static ref STANCE: Regex = Regex::new(r#""stance":\s*(-?\d)"#).unwrap();
}

const SUPPORTIVE: &[&str] = &[
    "AI tutors helped my kids catch up in math this year. More benefits than risks.",
    "Diagnostic models are catching diseases earlier. I am optimistic about AI.",
    "Automation freed our team from boring paperwork. Let's keep building.",
];

const SKEPTICAL: &[&str] = &[
    "Who audits these models? AI risks are moving faster than regulation.",
    "Deepfakes and job losses worry me more than any productivity gain.",
    "We are handing decisions to systems nobody understands. Slow down.",
];

const NEUTRAL: &[&str] = &[
    "AI seems useful for some tasks and dangerous for others. Still deciding.",
    "Curious how others weigh AI benefits against the risks.",
];

/// Canned-reply oracle seeded for reproducibility.
#[derive(Debug)]
pub struct DryRunOracle {
    rng: Mutex<StdRng>,
}

impl DryRunOracle {
    /// Oracle with a fixed seed.
    pub fn new(seed: u64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
        }
    }

    fn first_stance(prompt: &str) -> i64 {
        STANCE
            .captures(prompt)
            .and_then(|c| c[1].parse().ok())
            .unwrap_or(0)
    }

    fn reply(&self, prompt: &str, kind: QueryKind) -> Value {
        let mut rng = self.rng.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        match kind {
            QueryKind::PostCreation => {
                let stance = Self::first_stance(prompt);
                let pool = match stance {
                    s if s > 0 => SUPPORTIVE,
                    s if s < 0 => SKEPTICAL,
                    _ => NEUTRAL,
                };
                let content = pool.choose(&mut *rng).copied().unwrap_or("AI is here to stay.");
                json!({ "content": content })
            }
            QueryKind::InteractionDecision => {
                let post_ids: Vec<u64> = POST_ID
                    .captures_iter(prompt)
                    .filter_map(|c| c[1].parse().ok())
                    .collect();
                let authors: Vec<String> = AUTHOR.captures_iter(prompt).map(|c| c[1].to_string()).collect();

                let mut actions = Vec::new();
                if let Some(id) = post_ids.choose(&mut *rng) {
                    if rng.gen_bool(0.6) {
                        actions.push(json!({ "type": "like", "target_post_id": id }));
                    }
                    if rng.gen_bool(0.3) {
                        actions.push(json!({
                            "type": "comment",
                            "target_post_id": id,
                            "content": "Interesting point, but the details matter.",
                        }));
                    }
                }
                if let Some(author) = authors.choose(&mut *rng) {
                    if rng.gen_bool(0.2) {
                        actions.push(json!({ "type": "follow", "target_user_id": author }));
                    }
                }
                if actions.is_empty() {
                    actions.push(json!({ "type": "silent" }));
                }
                json!({ "actions": actions })
            }
            QueryKind::StanceAdjustment => {
                let stance = Self::first_stance(prompt);
                let shift: i64 = if rng.gen_bool(0.15) { rng.gen_range(-1..=1) } else { 0 };
                let new_stance = (stance + shift).clamp(-2, 2);
                json!({
                    "reason": "The post touched on points I had already considered.",
                    "new_stance": new_stance,
                })
            }
            QueryKind::EnvironmentEvaluation => {
                json!({
                    "reason": "Mixed discussion with a few thoughtful posts.",
                    "score": rng.gen_range(4..=10),
                })
            }
            QueryKind::Reflection => json!([
                "I engage mostly with posts that match my view on AI.",
                "I rarely change my mind after a single interaction."
            ]),
        }
    }
}

#[async_trait]
impl Oracle for DryRunOracle {
    async fn query(&self, prompt: &str, kind: QueryKind) -> OracleReply {
        OracleReply::Parsed(self.reply(prompt, kind))
    }
}
