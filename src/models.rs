//! Data models for the lead pipeline
//!
//! This module contains all data structures used throughout the pipeline,
//! including platform posts, judgments, scores, drafts, and audit entries.

use chrono::{NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};

/// A post as returned by the social platform search capability.
///
/// This is the "RawPost-shaped record" the collector persists verbatim
/// (as JSON payload) and the normalizer later parses.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlatformPost {
    /// Platform-assigned post identifier
    pub id: String,
    /// Source platform name (e.g. "twitter")
    pub platform: String,
    /// Post text as authored
    pub text: String,
    /// Post author
    pub author: Author,
    /// Engagement counts at collection time
    #[serde(default)]
    pub metrics: Engagement,
    /// Structured entity metadata, when the platform supplies it
    #[serde(default)]
    pub entities: Entities,
    /// Platform-supplied language tag, if any
    #[serde(default)]
    pub language: Option<String>,
    /// Post creation time (UTC)
    pub created_at: NaiveDateTime,
    /// Platform id of the post this one replies to, if any
    #[serde(default)]
    pub reply_to_id: Option<String>,
    /// Conversation/thread identifier, if any
    #[serde(default)]
    pub conversation_id: Option<String>,
}

/// Post author identity
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Author {
    /// Platform-assigned author identifier
    pub id: String,
    /// Author handle
    pub username: String,
    /// Author display name
    #[serde(default)]
    pub display_name: String,
    /// Follower count (defaulted to 0 when missing)
    #[serde(default)]
    pub followers: i64,
    /// Verified-account flag (defaulted to false when missing)
    #[serde(default)]
    pub verified: bool,
    /// Author bio, if available
    #[serde(default)]
    pub bio: Option<String>,
}

/// Engagement counts for a post
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Engagement {
    /// Like count
    #[serde(default)]
    pub likes: i64,
    /// Retweet/repost count
    #[serde(default)]
    pub retweets: i64,
    /// Reply count
    #[serde(default)]
    pub replies: i64,
    /// View/impression count
    #[serde(default)]
    pub views: i64,
}

/// Structured entities attached to a post
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Entities {
    /// Hashtags without the leading '#'
    #[serde(default)]
    pub hashtags: Vec<String>,
    /// Mentioned usernames without the leading '@'
    #[serde(default)]
    pub mentions: Vec<String>,
    /// URLs contained in the post
    #[serde(default)]
    pub urls: Vec<String>,
}

/// Database representation of a project
#[derive(Debug, Clone)]
pub struct DbProject {
    /// Database primary key
    pub id: i64,
    /// Stable project identifier
    pub slug: String,
    /// Display name
    pub display_name: String,
    /// Content hash of the project configuration
    pub config_hash: String,
    /// False once the project is soft-deactivated
    pub active: bool,
    /// Creation timestamp
    pub created_at: NaiveDateTime,
    /// Last update timestamp
    pub updated_at: NaiveDateTime,
}

/// Database representation of a raw (unprocessed) post
#[derive(Debug, Clone)]
pub struct DbRawPost {
    /// Database primary key
    pub id: i64,
    /// Owning project
    pub project_id: i64,
    /// Source platform
    pub platform: String,
    /// Platform-assigned post identifier
    pub platform_id: String,
    /// Label of the query that found this post
    pub query_label: String,
    /// Opaque raw payload (JSON)
    pub payload: String,
    /// Collection timestamp
    pub collected_at: NaiveDateTime,
}

/// Data for inserting a raw post
#[derive(Debug, Clone)]
pub struct NewRawPost {
    /// Owning project
    pub project_id: i64,
    /// Source platform
    pub platform: String,
    /// Platform-assigned post identifier
    pub platform_id: String,
    /// Label of the query that found this post
    pub query_label: String,
    /// Opaque raw payload (JSON)
    pub payload: String,
}

/// Database representation of a normalized post
#[derive(Debug, Clone)]
pub struct DbNormalizedPost {
    /// Database primary key
    pub id: i64,
    /// Foreign key to the raw post (1:1)
    pub raw_post_id: i64,
    /// Owning project
    pub project_id: i64,
    /// Author identity
    pub author: Author,
    /// Original text as authored
    pub text_original: String,
    /// Cleaned text (URLs stripped, whitespace collapsed)
    pub text_clean: String,
    /// Resolved language tag, if determinable
    pub language: Option<String>,
    /// Post creation time (UTC)
    pub posted_at: NaiveDateTime,
    /// Engagement counts
    pub engagement: Engagement,
    /// Extracted entities
    pub entities: Entities,
    /// Platform id of the post this one replies to
    pub reply_to_id: Option<String>,
    /// Conversation/thread identifier
    pub conversation_id: Option<String>,
    /// Normalization timestamp
    pub normalized_at: NaiveDateTime,
}

/// Data for inserting a normalized post
#[derive(Debug, Clone)]
pub struct NewNormalizedPost {
    /// Foreign key to the raw post
    pub raw_post_id: i64,
    /// Owning project
    pub project_id: i64,
    /// Author identity
    pub author: Author,
    /// Original text as authored
    pub text_original: String,
    /// Cleaned text
    pub text_clean: String,
    /// Resolved language tag
    pub language: Option<String>,
    /// Post creation time (UTC)
    pub posted_at: NaiveDateTime,
    /// Engagement counts
    pub engagement: Engagement,
    /// Extracted entities
    pub entities: Entities,
    /// Platform id of the post this one replies to
    pub reply_to_id: Option<String>,
    /// Conversation/thread identifier
    pub conversation_id: Option<String>,
}

/// Relevance label assigned by the judge
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum JudgmentLabel {
    /// Clear buying intent matching the project rubric
    Relevant,
    /// No buying intent, spam, or rubric exclusion
    Irrelevant,
    /// Ambiguous; kept visible for human review
    Maybe,
}

impl JudgmentLabel {
    /// Get the stable string form stored in the database
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Relevant => "relevant",
            Self::Irrelevant => "irrelevant",
            Self::Maybe => "maybe",
        }
    }

    /// Parse a stored label string
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "relevant" => Some(Self::Relevant),
            "irrelevant" => Some(Self::Irrelevant),
            "maybe" => Some(Self::Maybe),
            _ => None,
        }
    }

    /// Score multiplier applied to the relevance component
    #[must_use]
    pub const fn multiplier(&self) -> f64 {
        match self {
            Self::Relevant => 1.0,
            Self::Maybe => 0.3,
            Self::Irrelevant => 0.0,
        }
    }
}

/// An automated relevance judgment, before persistence
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Judgment {
    /// Assigned label
    pub label: JudgmentLabel,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Free-text reasoning
    pub reasoning: String,
    /// Identifier of the model or strategy that produced this judgment
    pub model_id: String,
    /// Wall-clock latency of the judgment
    pub latency_ms: i64,
}

/// Database representation of a judgment row
#[derive(Debug, Clone)]
pub struct DbJudgment {
    /// Database primary key
    pub id: i64,
    /// Foreign key to the normalized post (unique)
    pub post_id: i64,
    /// Assigned label
    pub label: JudgmentLabel,
    /// Confidence in [0, 1]
    pub confidence: f64,
    /// Free-text reasoning
    pub reasoning: String,
    /// Producing model/strategy identifier
    pub model_id: String,
    /// Judgment latency
    pub latency_ms: i64,
    /// Human override label; null until corrected
    pub human_label: Option<JudgmentLabel>,
    /// Human correction timestamp; null until corrected
    pub corrected_at: Option<NaiveDateTime>,
    /// Human correction reason; null until corrected
    pub correction_reason: Option<String>,
    /// Judgment timestamp
    pub judged_at: NaiveDateTime,
}

impl DbJudgment {
    /// The label downstream stages should act on: human override when
    /// present, the automated label otherwise.
    #[must_use]
    pub fn effective_label(&self) -> JudgmentLabel {
        self.human_label.unwrap_or(self.label)
    }
}

/// The five named score components, each bounded to [0, 100]
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ScoreComponents {
    /// Confidence-and-label-weighted relevance
    pub relevance: f64,
    /// Follower-count and verification authority
    pub authority: f64,
    /// Capped engagement contribution
    pub engagement: f64,
    /// Exponential recency decay
    pub recency: f64,
    /// Intent-phrase bonuses
    pub intent: f64,
}

/// Database representation of a score row
#[derive(Debug, Clone)]
pub struct DbScore {
    /// Database primary key
    pub id: i64,
    /// Foreign key to the normalized post (unique)
    pub post_id: i64,
    /// Composite total in [0, 100]
    pub total: f64,
    /// Component breakdown
    pub components: ScoreComponents,
    /// Scoring formula version
    pub formula_version: String,
    /// Scoring timestamp
    pub scored_at: NaiveDateTime,
}

/// Draft lifecycle status
///
/// ```text
/// PENDING --(approve)--> APPROVED --(send ok)--> SENT
/// PENDING --(edit+approve)--> EDITED --(send ok)--> SENT
/// PENDING --(reject)--> REJECTED            [terminal]
/// APPROVED/EDITED --(send fails)--> FAILED  [terminal; re-approval re-enters]
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DraftStatus {
    /// Awaiting a human decision; the only initial state
    Pending,
    /// Approved as generated; sendable
    Approved,
    /// Approved with human edits; sendable
    Edited,
    /// Rejected by a human; terminal
    Rejected,
    /// Successfully sent; terminal
    Sent,
    /// Send failed; terminal until explicitly re-approved
    Failed,
}

impl DraftStatus {
    /// Get the stable string form stored in the database
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Edited => "edited",
            Self::Rejected => "rejected",
            Self::Sent => "sent",
            Self::Failed => "failed",
        }
    }

    /// Parse a stored status string
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(Self::Pending),
            "approved" => Some(Self::Approved),
            "edited" => Some(Self::Edited),
            "rejected" => Some(Self::Rejected),
            "sent" => Some(Self::Sent),
            "failed" => Some(Self::Failed),
            _ => None,
        }
    }

    /// Statuses from which an approval (plain or with edit) is legal.
    /// FAILED is included: re-approval is the only recovery path.
    #[must_use]
    pub const fn can_approve(&self) -> bool {
        matches!(self, Self::Pending | Self::Failed)
    }

    /// Statuses from which a rejection is legal
    #[must_use]
    pub const fn can_reject(&self) -> bool {
        matches!(self, Self::Pending)
    }

    /// Statuses from which a send attempt is legal
    #[must_use]
    pub const fn sendable(&self) -> bool {
        matches!(self, Self::Approved | Self::Edited)
    }
}

/// Database representation of a draft row
#[derive(Debug, Clone)]
pub struct DbDraft {
    /// Database primary key
    pub id: i64,
    /// Foreign key to the normalized post
    pub post_id: i64,
    /// Text as generated by the model
    pub text_generated: String,
    /// Human-edited final text, if the draft was edited
    pub text_final: Option<String>,
    /// Persona tone used for generation
    pub tone: String,
    /// Template identifier if a template path was used
    pub template_id: Option<String>,
    /// Producing model identifier
    pub model_id: String,
    /// Current lifecycle status
    pub status: DraftStatus,
    /// Creation timestamp
    pub created_at: NaiveDateTime,
    /// Approval timestamp, if approved
    pub approved_at: Option<NaiveDateTime>,
    /// Send timestamp, if sent
    pub sent_at: Option<NaiveDateTime>,
    /// Platform id of the sent reply, if sent
    pub sent_post_id: Option<String>,
    /// Most recent send error, if any
    pub last_error: Option<String>,
}

impl DbDraft {
    /// The text that would actually be sent: the human edit when present,
    /// the generated text otherwise.
    #[must_use]
    pub fn outgoing_text(&self) -> &str {
        self.text_final.as_deref().unwrap_or(&self.text_generated)
    }
}

/// Data for inserting a draft
#[derive(Debug, Clone)]
pub struct NewDraft {
    /// Foreign key to the normalized post
    pub post_id: i64,
    /// Generated text
    pub text_generated: String,
    /// Persona tone
    pub tone: String,
    /// Template identifier, if any
    pub template_id: Option<String>,
    /// Producing model identifier
    pub model_id: String,
}

/// Kind of engagement observed on a sent reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeKind {
    /// The lead replied
    ReplyReceived,
    /// The reply was liked
    LikeReceived,
    /// The lead followed the persona account
    FollowReceived,
    /// Profile click recorded
    ProfileClick,
    /// Link click recorded
    LinkClick,
    /// A booking/conversion happened
    Booking,
    /// Negative reaction (block, complaint, ratio)
    Negative,
}

impl OutcomeKind {
    /// Get the stable string form stored in the database
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::ReplyReceived => "reply_received",
            Self::LikeReceived => "like_received",
            Self::FollowReceived => "follow_received",
            Self::ProfileClick => "profile_click",
            Self::LinkClick => "link_click",
            Self::Booking => "booking",
            Self::Negative => "negative",
        }
    }

    /// Parse a stored kind string
    #[must_use]
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "reply_received" => Some(Self::ReplyReceived),
            "like_received" => Some(Self::LikeReceived),
            "follow_received" => Some(Self::FollowReceived),
            "profile_click" => Some(Self::ProfileClick),
            "link_click" => Some(Self::LinkClick),
            "booking" => Some(Self::Booking),
            "negative" => Some(Self::Negative),
            _ => None,
        }
    }
}

/// Database representation of an observed outcome
#[derive(Debug, Clone)]
pub struct DbOutcome {
    /// Database primary key
    pub id: i64,
    /// Foreign key to the draft
    pub draft_id: i64,
    /// Outcome kind
    pub kind: OutcomeKind,
    /// Free-form detail payload (JSON)
    pub detail: String,
    /// Observation timestamp
    pub observed_at: NaiveDateTime,
}

/// Data for an append-only audit log entry
#[derive(Debug, Clone)]
pub struct AuditEntry {
    /// Action name (e.g. "collect", "approve", "send_failed")
    pub action: String,
    /// Entity type the action applies to
    pub entity_type: String,
    /// Entity identifier
    pub entity_id: String,
    /// Actor ("pipeline" or an operator name)
    pub actor: String,
    /// Detail payload (JSON)
    pub detail: serde_json::Value,
}

impl AuditEntry {
    /// Build an audit entry attributed to the pipeline itself
    #[must_use]
    pub fn pipeline(action: &str, entity_type: &str, entity_id: impl ToString, detail: serde_json::Value) -> Self {
        Self {
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            actor: "pipeline".to_string(),
            detail,
        }
    }

    /// Build an audit entry attributed to a human operator
    #[must_use]
    pub fn human(actor: &str, action: &str, entity_type: &str, entity_id: impl ToString, detail: serde_json::Value) -> Self {
        Self {
            action: action.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            actor: actor.to_string(),
            detail,
        }
    }
}

/// Current UTC timestamp, naive, as stored in every table
#[must_use]
pub fn now_utc() -> NaiveDateTime {
    Utc::now().naive_utc()
}
