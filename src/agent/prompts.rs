//! Prompt templates.
//!
//! Every template asks for a JSON reply; the shapes are decoded by the
//! callers ([`parse_actions`](super::actions::parse_actions),
//! [`StanceEngine::assess`](super::StanceEngine::assess),
//! [`Evaluation::from_reply`](crate::migration::Evaluation::from_reply)).

use serde::Serialize;

use super::memory::MemoryItem;
use super::Profile;
use crate::network::{Post, ServerId, UserId};

const TOPIC: &str = "AI brings more benefits or more risks";

const STANCE_SCALE: &str = "Note: stance scale from -2 to 2 (-2=Strongly Oppose AI, -1=Oppose AI, \
0=Neutral, 1=Support AI, 2=Strongly Support AI)";

/// Feed post as shown in the decision prompt.
#[derive(Debug, Clone, Serialize)]
pub struct FeedEntry {
    /// Post id the agent refers to in its actions
    pub post_id: u64,
    /// Author
    pub author: String,
    /// Content cut to the configured length
    pub content: String,
    /// Post stance
    pub stance: i64,
    /// Like count
    pub likes: u32,
    /// Number of comments
    pub comments: usize,
    /// Whether the viewer already liked it
    pub already_liked: bool,
}

impl FeedEntry {
    /// Entry for `post`, content truncated to `max_chars` characters.
    pub fn new(post: &Post, max_chars: usize, already_liked: bool) -> Self {
        Self {
            post_id: post.post_id.0,
            author: post.author.to_string(),
            content: post.content.chars().take(max_chars).collect(),
            stance: post.stance.value(),
            likes: post.likes,
            comments: post.comments.len(),
            already_liked,
        }
    }
}

#[derive(Serialize)]
struct PostSummary<'a> {
    author: &'a str,
    content: &'a str,
    stance: i64,
    likes: u32,
    comments_count: usize,
}

#[derive(Serialize)]
struct ProfileSummary<'a> {
    name: &'a str,
    age: u32,
    gender: &'a str,
    education: &'a str,
    occupation: &'a str,
    interests: &'a [String],
    stance: i64,
    openness: &'a str,
    conscientiousness: &'a str,
    extraversion: &'a str,
    agreeableness: &'a str,
    neuroticism: &'a str,
    history: &'a [String],
}

fn pretty<T: Serialize + ?Sized>(value: &T) -> String {
    serde_json::to_string_pretty(value).unwrap_or_default()
}

fn memory_block(memories: &[&MemoryItem], closing: &str) -> String {
    if memories.is_empty() {
        return String::new();
    }
    let mut text = String::from("\n\nPast experience (recent interactions):\n");
    for (i, memory) in memories.iter().enumerate() {
        text.push_str(&format!(
            "{}. {}@{}(stance {}) '{}'\n",
            i + 1,
            memory.action,
            memory.server,
            memory.stance,
            memory.content
        ));
        if !memory.outcome.is_empty() {
            text.push_str(&format!("   Outcome: {}\n", memory.outcome));
        }
    }
    text.push('\n');
    text.push_str(closing);
    text
}

/// Ask for an original post. Reply: `{"content": string}`.
pub fn create_post(profile: &Profile) -> String {
    format!(
        r#"# Posting Task
You are a social media user and need to publish an original post about the topic: Artificial Intelligence (AI).

# Your Profile
{profile}

{STANCE_SCALE}

# Posting Guidelines
1. Your post must be related to the topic of Artificial Intelligence (AI), especially about whether AI brings more benefits or more risks.
2. The content should faithfully reflect the characteristics of your profile.
3. Keep your post content concise, at most 40 words.

Return your post in the following JSON format:
{{
    "content": "Post content (max 40 words)"
}}
"#,
        profile = pretty(profile),
    )
}

/// Ask which actions to take. Reply: `{"actions": [...]}`.
pub fn decision(profile: &Profile, feed: &[FeedEntry], following: &[UserId], memories: &[&MemoryItem]) -> String {
    let interests = if profile.interests.is_empty() {
        "None specified".to_string()
    } else {
        profile.interests.join(", ")
    };
    let following = if following.is_empty() {
        "none".to_string()
    } else {
        following.iter().map(UserId::as_str).collect::<Vec<_>>().join(", ")
    };

    let mut prompt = format!(
        r#"# Discussion Topic
{TOPIC}

You are a social network user with the following attributes:
- Age: {age}
- Gender: {gender}
- Education: {education}
- Occupation: {occupation}
- Interests: {interests}
- Stance: {stance}
- Recent behavior summary: {history:?}

{STANCE_SCALE}

# Big Five Personality Traits:
- Openness: {openness} (openness to new experiences and ideas)
- Conscientiousness: {conscientiousness} (self-discipline and organization)
- Extraversion: {extraversion} (social energy and assertiveness)
- Agreeableness: {agreeableness} (trust and cooperation)
- Neuroticism: {neuroticism} (emotional stability, higher = less stable)

Recent posts visible to you (in chronological order):
{feed}

You can choose one or more of the following actions:
- comment: comment on a post, you should provide specific comment content
- retweet: retweet a post
- like: like a post (posts with "already_liked": true have been liked by you, do not like them again)
- follow: follow a user (specify target_user_id)
- unfollow: unfollow a user (specify target_user_id)
- silent: remain silent and do nothing this round

Based on your profile and the posts, decide which actions you will take this round. All your actions and comments must be related to the topic of AI.

# IMPORTANT:
# - Keep comment content concise (max 30 words)
# - For comment actions, you must provide specific comment content, not generic text
# - If you cannot think of a specific comment, do not choose the comment action

Return your answer in the following JSON format:
{{
  "actions": [
    {{"type": "comment/retweet/like/follow/unfollow/silent", "target_post_id": optional, "target_user_id": optional, "content": optional}}
  ]
}}

Currently following users: {following}"#,
        age = profile.age,
        gender = profile.gender,
        education = profile.education,
        occupation = profile.occupation,
        stance = profile.stance,
        history = profile.history,
        openness = profile.openness,
        conscientiousness = profile.conscientiousness,
        extraversion = profile.extraversion,
        agreeableness = profile.agreeableness,
        neuroticism = profile.neuroticism,
        feed = pretty(feed),
    );
    prompt.push_str(&memory_block(memories, "Please refer to these experiences to make decisions."));
    prompt
}

/// Ask whether an interaction moved the agent. Reply: `{"reason", "new_stance"}`.
pub fn stance_adjustment(profile: &Profile, post: &Post, action: &str, action_content: &str) -> String {
    let history_from = profile.history.len().saturating_sub(5);
    let summary = ProfileSummary {
        name: &profile.name,
        age: profile.age,
        gender: &profile.gender,
        education: &profile.education,
        occupation: &profile.occupation,
        interests: &profile.interests,
        stance: profile.stance.value(),
        openness: &profile.openness,
        conscientiousness: &profile.conscientiousness,
        extraversion: &profile.extraversion,
        agreeableness: &profile.agreeableness,
        neuroticism: &profile.neuroticism,
        history: &profile.history[history_from..],
    };
    let post = PostSummary {
        author: post.author.as_str(),
        content: &post.content,
        stance: post.stance.value(),
        likes: post.likes,
        comments_count: post.comments.len(),
    };

    format!(
        r#"You are a social media user. You just performed an action on a post and are considering whether this interaction should change your stance.

# Your profile
{profile}

{STANCE_SCALE}

# The post you interacted with
{post}

# Your action
Action type: {action}
Action content: {action_content}

# Question
Based on the content you have interacted with, do you want to adjust your stance? Consider:
1. Does the content of the post impact or align with your current stance?
2. Did this interaction challenge or reinforce your views, or change your perspective?
3. Should your stance become more extreme, more moderate, or stay the same?

# IMPORTANT:
# - Provide a brief reason for your new stance (max 30 words)
# - If your stance does not change, explain why it remains the same.
# - Your new stance must be one of the following five values: -2, -1, 0, 1, 2
# - Large stance changes (difference >= 2) should have specific reasons

Return your answer in the following JSON format:
{{
  "reason": "your explanation",
  "new_stance": -2 or -1 or 0 or 1 or 2
}}
"#,
        profile = pretty(&summary),
        post = pretty(&post),
    )
}

/// Ask for a satisfaction score. Reply: `{"reason", "score"}`.
pub fn environment_evaluation(
    user: &UserId,
    profile: &Profile,
    server: &ServerId,
    feed: &[Post],
    memories: &[&MemoryItem],
) -> String {
    let mut prompt = format!(
        r#"You are a social media user (user {user}). Please evaluate the discussion on the current server: {server}.

Your personality traits:
{profile}

{STANCE_SCALE}

How do you evaluate the quality of social media content based on the posts you have seen (satisfaction level)?

Recent posts visible to you (from people you follow and from the current server, in chronological order):
{feed}
"#,
        profile = pretty(profile),
        feed = pretty(feed),
    );
    prompt.push_str(&memory_block(memories, "Please consider these experiences when evaluating."));
    prompt.push_str(
        r#"

# IMPORTANT: First provide your reasoning for the satisfaction level, then assign a score between 1 and 10 (1 = very poor, 10 = excellent). The reasoning should be concise and align with your score.

Respond in the following JSON format:
{
    "reason": "A brief explanation of your evaluation (maximum 50 words)",
    "score": integer from 1 to 10
}
"#,
    );
    prompt
}

/// Ask for insights about recent behaviour. Reply: JSON array of strings.
pub fn reflection(recent: &[&MemoryItem]) -> String {
    let lines: Vec<String> = recent
        .iter()
        .map(|m| format!("- {} on {} (stance {}): {}", m.action, m.server, m.stance, m.content))
        .collect();
    format!(
        r#"You are reflecting on your recent social media behavior. Here are your last actions:

{}

Based on these observations, what are 1-2 high-level insights about your behavior patterns?

Keep each insight brief (max 40 words). Return them as a JSON array of strings.

Example format:
["insight 1", "insight 2"]
"#,
        lines.join("\n")
    )
}
