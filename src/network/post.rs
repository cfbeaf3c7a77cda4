//! Posts and comments.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{PostId, ServerId, UserId};
use crate::agent::Stance;

/// A comment attached to a post.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Comment {
    /// Commenter
    pub author: UserId,
    /// Comment text
    pub content: String,
}

/// A post, owned by the store. Never moves between servers.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Post {
    /// Globally unique, assigned by the store
    pub post_id: PostId,
    /// Author
    pub author: UserId,
    /// Text
    pub content: String,
    /// Author's stance when posting (original's stance for retweets)
    pub stance: Stance,
    /// Like count
    #[serde(default)]
    pub likes: u32,
    /// Comments in arrival order
    #[serde(default)]
    pub comments: Vec<Comment>,
    /// Creation time
    pub timestamp: DateTime<Utc>,
    /// Server the post was made on
    pub server: ServerId,
}

/// Input to [`SocialGraphStore::add_post`](super::SocialGraphStore::add_post).
#[derive(Debug, Clone)]
pub struct NewPost {
    /// Author
    pub author: UserId,
    /// Text
    pub content: String,
    /// Stance to attach
    pub stance: Stance,
    /// Creation time; now if unset
    pub timestamp: Option<DateTime<Utc>>,
}

impl NewPost {
    /// Post stamped at insertion time.
    pub fn new(author: UserId, content: impl Into<String>, stance: Stance) -> Self {
        Self {
            author,
            content: content.into(),
            stance,
            timestamp: None,
        }
    }

    /// Override the timestamp.
    pub fn at(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = Some(timestamp);
        self
    }
}
