use chrono::{DateTime, Utc};
/// Event schema for the dailyfeed activity topics
///
/// Defines the versioned JSON wire format for member activity events so
/// producers and the ingestion relay cannot drift apart. Every event carries
/// a required `schema_version` field that is gated at decode time.
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// Pure encode/decode of the wire format
pub mod codec;
// Date-based topic naming (member-activity-YYYYMMDD)
pub mod topic;

pub use codec::{decode, encode, DecodeError, EncodeError};
pub use topic::DateBasedTopic;

/// Current schema version for all activity events
pub const SCHEMA_VERSION: u32 = 1;

/// A single activity event as it appears on the wire.
///
/// `event_id` is the idempotency key: globally unique per logical event but
/// allowed to appear multiple times on the topic (producer retries, broker
/// redelivery). The `kind` discriminator selects the payload shape.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FeedEvent {
    /// Unique event ID for idempotency and tracing
    pub event_id: String,
    /// Schema version for compatibility checking
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,
    /// Producer-side timestamp, used for staleness metrics only
    pub produced_at: DateTime<Utc>,
    /// Source service that generated the event
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    /// Activity payload, variant-typed by `kind`
    #[serde(flatten)]
    pub payload: ActivityPayload,
}

fn default_schema_version() -> u32 {
    SCHEMA_VERSION
}

impl FeedEvent {
    pub fn new(source: impl Into<String>, payload: ActivityPayload) -> Self {
        Self {
            event_id: Uuid::new_v4().to_string(),
            schema_version: SCHEMA_VERSION,
            produced_at: Utc::now(),
            source: Some(source.into()),
            payload,
        }
    }

    /// Member the activity belongs to, used as the fan-out routing key.
    pub fn member_id(&self) -> i64 {
        match &self.payload {
            ActivityPayload::Post(p) => p.member_id,
            ActivityPayload::Comment(c) => c.member_id,
            ActivityPayload::PostLike(l) => l.member_id,
            ActivityPayload::CommentLike(l) => l.member_id,
            ActivityPayload::Member(m) => m.member_id,
        }
    }

    pub fn kind(&self) -> &'static str {
        match &self.payload {
            ActivityPayload::Post(_) => "post",
            ActivityPayload::Comment(_) => "comment",
            ActivityPayload::PostLike(_) => "post_like",
            ActivityPayload::CommentLike(_) => "comment_like",
            ActivityPayload::Member(_) => "member",
        }
    }
}

/// Activity payload variants, tagged by `kind` on the wire.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "kind", content = "payload", rename_all = "snake_case")]
pub enum ActivityPayload {
    Post(PostActivity),
    Comment(CommentActivity),
    PostLike(PostLikeActivity),
    CommentLike(CommentLikeActivity),
    Member(MemberActivity),
}

/// What the member did to the target entity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum ActivityAction {
    Created,
    Updated,
    Deleted,
    Read,
}

impl std::fmt::Display for ActivityAction {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ActivityAction::Created => write!(f, "created"),
            ActivityAction::Updated => write!(f, "updated"),
            ActivityAction::Deleted => write!(f, "deleted"),
            ActivityAction::Read => write!(f, "read"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostActivity {
    pub member_id: i64,
    pub post_id: i64,
    pub action: ActivityAction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommentActivity {
    pub member_id: i64,
    pub post_id: i64,
    pub comment_id: i64,
    pub action: ActivityAction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PostLikeActivity {
    pub member_id: i64,
    pub post_id: i64,
    pub action: ActivityAction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CommentLikeActivity {
    pub member_id: i64,
    pub post_id: i64,
    pub comment_id: i64,
    pub action: ActivityAction,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MemberActivity {
    pub member_id: i64,
    pub action: ActivityAction,
    /// Set for follow/unfollow style activities targeting another member
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_member_id: Option<i64>,
}

/// Version compatibility gate: versions up to the current one are accepted.
pub fn is_supported(message_version: u32) -> bool {
    message_version <= SCHEMA_VERSION
}
