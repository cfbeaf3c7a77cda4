//! Rough token estimation and prompt truncation.
//!
//! The estimate counts CJK ideographs one-for-one and English words at
//! three quarters of a token each. It is cheap and model-agnostic, which is
//! all the pre-flight length check needs.

use lazy_static::lazy_static;
use regex::Regex;

use crate::config::OracleConfig;

/// Appended to every truncated prompt.
pub const TRUNCATION_MARKER: &str = "\n\n[Content truncated to save tokens]";

lazy_static! {
    static ref CJK_CHAR: Regex = Regex::new(r"[\x{4e00}-\x{9fff}]").unwrap();
    static ref ENGLISH_WORD: Regex = Regex::new(r"\b[a-zA-Z]+\b").unwrap();
}

/// Estimated token count of `text`.
pub fn estimate_tokens(text: &str) -> usize {
    let cjk = CJK_CHAR.find_iter(text).count();
    let words = ENGLISH_WORD.find_iter(text).count();
    cjk + (words as f64 * 0.75) as usize
}

/// Truncation thresholds.
#[derive(Debug, Clone, Copy)]
pub struct TruncationLimits {
    /// Prompts above this estimate are truncated
    pub max_tokens: usize,
    /// First pass aims for this estimate
    pub target_tokens: usize,
    /// Later passes run until the estimate is at most this
    pub ceiling_tokens: usize,
    /// Later passes keep this fraction of the characters
    pub shrink_ratio: f64,
}

impl From<&OracleConfig> for TruncationLimits {
    fn from(config: &OracleConfig) -> Self {
        Self {
            max_tokens: config.max_prompt_tokens,
            target_tokens: config.truncate_target_tokens,
            ceiling_tokens: config.truncate_ceiling_tokens,
            shrink_ratio: config.shrink_ratio,
        }
    }
}

fn take_chars(text: &str, n: usize) -> &str {
    match text.char_indices().nth(n) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}

/// Truncate `prompt` if its estimate exceeds `limits.max_tokens`.
///
/// Returns `None` when the prompt is within the limit. Otherwise the prompt
/// is cut proportionally toward the target, then shrunk further until the
/// estimate (marker included) is at most `limits.ceiling_tokens`.
pub fn fit_prompt(prompt: &str, limits: TruncationLimits) -> Option<String> {
    let estimated = estimate_tokens(prompt);
    if estimated <= limits.max_tokens {
        return None;
    }

    let total_chars = prompt.chars().count();
    let mut keep = (total_chars as f64 * limits.target_tokens as f64 / estimated as f64) as usize;
    let mut truncated = format!("{}{}", take_chars(prompt, keep), TRUNCATION_MARKER);

    while estimate_tokens(&truncated) > limits.ceiling_tokens && keep > 0 {
        keep = (keep as f64 * limits.shrink_ratio) as usize;
        truncated = format!("{}{}", take_chars(prompt, keep), TRUNCATION_MARKER);
    }

    tracing::warn!(
        "Prompt too long ({} tokens), truncated to {} tokens",
        estimated,
        estimate_tokens(&truncated)
    );
    Some(truncated)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn limits(max: usize, target: usize) -> TruncationLimits {
        TruncationLimits {
            max_tokens: max,
            target_tokens: target,
            ceiling_tokens: max,
            shrink_ratio: 0.8,
        }
    }

    #[test]
    fn test_estimate_english() {
        // four words -> 3 tokens
        assert_eq!(estimate_tokens("AI brings more benefits"), 3);
        assert_eq!(estimate_tokens(""), 0);
    }

    #[test]
    fn test_estimate_ignores_numbers_and_punctuation() {
        assert_eq!(estimate_tokens("42 !!! 3.14"), 0);
    }

    #[test]
    fn test_estimate_cjk() {
        assert_eq!(estimate_tokens("人工智能"), 4);
        assert_eq!(estimate_tokens("人工智能 risk risk risk risk"), 7);
    }

    #[test]
    fn test_short_prompt_untouched() {
        assert!(fit_prompt("a short prompt", limits(100, 80)).is_none());
    }

    #[test]
    fn test_long_prompt_truncated_under_ceiling() {
        let prompt = "word ".repeat(1000);
        let fitted = fit_prompt(&prompt, limits(100, 80)).unwrap();
        assert!(fitted.ends_with(TRUNCATION_MARKER));
        assert!(estimate_tokens(&fitted) <= 100);
        assert!(fitted.len() < prompt.len());
    }

    #[test]
    fn test_trigger_and_ceiling_are_separate() {
        let limits = TruncationLimits {
            max_tokens: 100,
            target_tokens: 150,
            ceiling_tokens: 200,
            shrink_ratio: 0.8,
        };
        // 300 tokens: above both, cut toward 150 and left there
        let long = "word ".repeat(400);
        let fitted = fit_prompt(&long, limits).unwrap();
        let tokens = estimate_tokens(&fitted);
        assert!(tokens > 100 && tokens <= 200, "got {tokens}");
        assert!(fitted.len() < long.len());

        // 120 tokens: triggers, but already under the ceiling, so only marked
        let medium = "word ".repeat(160);
        let fitted = fit_prompt(&medium, limits).unwrap();
        assert_eq!(fitted, format!("{medium}{TRUNCATION_MARKER}"));

        assert!(fit_prompt(&"word ".repeat(100), limits).is_none());
    }

    #[test]
    fn test_truncation_respects_char_boundaries() {
        let prompt = "智".repeat(500);
        let fitted = fit_prompt(&prompt, limits(50, 40)).unwrap();
        assert!(estimate_tokens(&fitted) <= 50);
        assert!(fitted.starts_with('智'));
    }

    #[test]
    fn test_take_chars() {
        assert_eq!(take_chars("héllo", 2), "hé");
        assert_eq!(take_chars("hi", 10), "hi");
    }
}
