//! Decoding of the decision reply `{"actions": [...]}`.

use serde_json::Value;

use crate::network::{PostId, UserId};
use crate::oracle::OracleReply;

/// One decided action.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Comment on a visible post
    Comment {
        /// Target post
        post: PostId,
        /// Comment body, never blank
        content: String,
    },
    /// Repost a visible post
    Retweet {
        /// Target post
        post: PostId,
    },
    /// Like a post
    Like {
        /// Target post
        post: PostId,
    },
    /// Follow a user
    Follow {
        /// User to follow
        target: UserId,
    },
    /// Unfollow a user
    Unfollow {
        /// User to drop
        target: UserId,
    },
    /// Do nothing
    Silent,
}

impl Action {
    /// Wire name of the action type.
    pub fn name(&self) -> &'static str {
        match self {
            Action::Comment { .. } => "comment",
            Action::Retweet { .. } => "retweet",
            Action::Like { .. } => "like",
            Action::Follow { .. } => "follow",
            Action::Unfollow { .. } => "unfollow",
            Action::Silent => "silent",
        }
    }
}

fn post_id(raw: Option<&Value>) -> Option<PostId> {
    match raw? {
        Value::Number(n) => n.as_u64().map(PostId),
        Value::String(s) => s.trim().parse().ok().map(PostId),
        _ => None,
    }
}

fn user_id(raw: Option<&Value>) -> Option<UserId> {
    raw?.as_str().map(str::trim).filter(|s| !s.is_empty()).map(UserId::from)
}

fn parse_one(raw: &Value) -> Option<Action> {
    let kind = raw.get("type")?.as_str()?.trim().to_ascii_lowercase();
    let post = post_id(raw.get("target_post_id"));
    let content = raw.get("content").and_then(Value::as_str).map(str::trim);

    let action = match kind.as_str() {
        "comment" => Action::Comment {
            post: post?,
            content: content.filter(|c| !c.is_empty())?.to_string(),
        },
        "retweet" => Action::Retweet { post: post? },
        "like" => Action::Like { post: post? },
        "follow" => Action::Follow {
            target: user_id(raw.get("target_user_id"))?,
        },
        "unfollow" => Action::Unfollow {
            target: user_id(raw.get("target_user_id"))?,
        },
        "silent" => Action::Silent,
        _ => return None,
    };
    Some(action)
}

/// Actions listed in a decision reply, in order.
///
/// Returns `None` when the reply carries no `actions` array. Entries that are
/// malformed, of an unknown type, or comments without text are skipped.
pub fn parse_actions(reply: &OracleReply) -> Option<Vec<Action>> {
    let list = reply.field("actions")?.as_array()?;
    let actions: Vec<Action> = list.iter().filter_map(parse_one).collect();
    if actions.len() < list.len() {
        tracing::debug!("Skipped {} malformed actions", list.len() - actions.len());
    }
    Some(actions)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::oracle::{Fallback, FallbackKind};
    use serde_json::json;

    #[test]
    fn test_parse_all_kinds() {
        let reply = OracleReply::Parsed(json!({"actions": [
            {"type": "comment", "target_post_id": 3, "content": "Interesting point"},
            {"type": "retweet", "target_post_id": "4"},
            {"type": "like", "target_post_id": 5},
            {"type": "follow", "target_user_id": "user_2"},
            {"type": "unfollow", "target_user_id": "user_7"},
            {"type": "silent"}
        ]}));
        let actions = parse_actions(&reply).unwrap();
        assert_eq!(
            actions,
            vec![
                Action::Comment {
                    post: PostId(3),
                    content: "Interesting point".to_string()
                },
                Action::Retweet { post: PostId(4) },
                Action::Like { post: PostId(5) },
                Action::Follow {
                    target: UserId::from("user_2")
                },
                Action::Unfollow {
                    target: UserId::from("user_7")
                },
                Action::Silent,
            ]
        );
    }

    #[test]
    fn test_malformed_entries_skipped() {
        let reply = OracleReply::Parsed(json!({"actions": [
            {"type": "comment", "target_post_id": 1, "content": "   "},
            {"type": "comment", "content": "no target"},
            {"type": "like"},
            {"type": "dance"},
            {"target_post_id": 1},
            {"type": "follow"},
            {"type": "LIKE", "target_post_id": 9}
        ]}));
        assert_eq!(parse_actions(&reply).unwrap(), vec![Action::Like { post: PostId(9) }]);
    }

    #[test]
    fn test_missing_actions() {
        assert!(parse_actions(&OracleReply::Parsed(json!({"decision": "none"}))).is_none());
        assert!(parse_actions(&OracleReply::Parsed(json!({"actions": "like"}))).is_none());
        let fallback = OracleReply::Fallback(Fallback {
            reason: "API call failed after all retries".to_string(),
            kind: FallbackKind::Exhausted,
            status: None,
        });
        assert!(parse_actions(&fallback).is_none());
    }
}
