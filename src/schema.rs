//! Database schema definitions
//!
//! This module provides constants for table and column names used with rusqlite.
//! Keeping them in one place means queries assembled in `db.rs` cannot drift
//! from the migration DDL silently.

/// Projects table schema
pub mod projects {
    /// Table name
    pub const TABLE: &str = "projects";
    /// Primary key column
    pub const ID: &str = "id";
    /// Stable project identifier column
    pub const SLUG: &str = "slug";
    /// Display name column
    pub const DISPLAY_NAME: &str = "display_name";
    /// Configuration content-hash column
    pub const CONFIG_HASH: &str = "config_hash";
    /// Soft-deactivation flag column
    pub const ACTIVE: &str = "active";
    /// Creation timestamp column
    pub const CREATED_AT: &str = "created_at";
    /// Last update timestamp column
    pub const UPDATED_AT: &str = "updated_at";
}

/// Raw posts table schema
pub mod raw_posts {
    /// Table name
    pub const TABLE: &str = "raw_posts";
    /// Primary key column
    pub const ID: &str = "id";
    /// Owning project column
    pub const PROJECT_ID: &str = "project_id";
    /// Source platform column
    pub const PLATFORM: &str = "platform";
    /// Platform-assigned post identifier column
    pub const PLATFORM_ID: &str = "platform_id";
    /// Originating query label column
    pub const QUERY_LABEL: &str = "query_label";
    /// Opaque raw payload column (JSON)
    pub const PAYLOAD: &str = "payload";
    /// Collection timestamp column
    pub const COLLECTED_AT: &str = "collected_at";
}

/// Per-query collection watermarks
pub mod query_watermarks {
    /// Table name
    pub const TABLE: &str = "query_watermarks";
    /// Owning project column
    pub const PROJECT_ID: &str = "project_id";
    /// Query label column
    pub const QUERY_LABEL: &str = "query_label";
    /// Last seen platform id column
    pub const SINCE_ID: &str = "since_id";
    /// Last update timestamp column
    pub const UPDATED_AT: &str = "updated_at";
}

/// Normalized posts table schema
pub mod normalized_posts {
    /// Table name
    pub const TABLE: &str = "normalized_posts";
    /// Primary key column
    pub const ID: &str = "id";
    /// Foreign key to raw_posts (unique, 1:1)
    pub const RAW_POST_ID: &str = "raw_post_id";
    /// Owning project column
    pub const PROJECT_ID: &str = "project_id";
    /// Author platform id column
    pub const AUTHOR_ID: &str = "author_id";
    /// Author username column
    pub const AUTHOR_USERNAME: &str = "author_username";
    /// Author display name column
    pub const AUTHOR_DISPLAY_NAME: &str = "author_display_name";
    /// Author follower count column
    pub const AUTHOR_FOLLOWERS: &str = "author_followers";
    /// Author verified flag column
    pub const AUTHOR_VERIFIED: &str = "author_verified";
    /// Author bio column
    pub const AUTHOR_BIO: &str = "author_bio";
    /// Original text column
    pub const TEXT_ORIGINAL: &str = "text_original";
    /// Cleaned text column
    pub const TEXT_CLEAN: &str = "text_clean";
    /// Language tag column
    pub const LANGUAGE: &str = "language";
    /// Post creation timestamp column
    pub const POSTED_AT: &str = "posted_at";
    /// Like count column
    pub const LIKES: &str = "likes";
    /// Retweet count column
    pub const RETWEETS: &str = "retweets";
    /// Reply count column
    pub const REPLIES: &str = "replies";
    /// View count column
    pub const VIEWS: &str = "views";
    /// Hashtags column (JSON array)
    pub const HASHTAGS: &str = "hashtags";
    /// Mentions column (JSON array)
    pub const MENTIONS: &str = "mentions";
    /// URLs column (JSON array)
    pub const URLS: &str = "urls";
    /// Reply-to platform id column
    pub const REPLY_TO_ID: &str = "reply_to_id";
    /// Conversation/thread id column
    pub const CONVERSATION_ID: &str = "conversation_id";
    /// Normalization timestamp column
    pub const NORMALIZED_AT: &str = "normalized_at";
}

/// Judgments table schema
pub mod judgments {
    /// Table name
    pub const TABLE: &str = "judgments";
    /// Primary key column
    pub const ID: &str = "id";
    /// Foreign key to normalized_posts (unique, first judgment wins)
    pub const POST_ID: &str = "post_id";
    /// Relevance label column
    pub const LABEL: &str = "label";
    /// Confidence column
    pub const CONFIDENCE: &str = "confidence";
    /// Model reasoning column
    pub const REASONING: &str = "reasoning";
    /// Producing model/strategy identifier column
    pub const MODEL_ID: &str = "model_id";
    /// Judgment latency column
    pub const LATENCY_MS: &str = "latency_ms";
    /// Human override label column
    pub const HUMAN_LABEL: &str = "human_label";
    /// Human correction timestamp column
    pub const CORRECTED_AT: &str = "corrected_at";
    /// Human correction reason column
    pub const CORRECTION_REASON: &str = "correction_reason";
    /// Judgment timestamp column
    pub const JUDGED_AT: &str = "judged_at";
}

/// Scores table schema
pub mod scores {
    /// Table name
    pub const TABLE: &str = "scores";
    /// Primary key column
    pub const ID: &str = "id";
    /// Foreign key to normalized_posts (unique, write-once)
    pub const POST_ID: &str = "post_id";
    /// Composite total column
    pub const TOTAL: &str = "total";
    /// Component breakdown column (JSON map)
    pub const COMPONENTS: &str = "components";
    /// Scoring formula version column
    pub const FORMULA_VERSION: &str = "formula_version";
    /// Scoring timestamp column
    pub const SCORED_AT: &str = "scored_at";
}

/// Drafts table schema
pub mod drafts {
    /// Table name
    pub const TABLE: &str = "drafts";
    /// Primary key column
    pub const ID: &str = "id";
    /// Foreign key to normalized_posts
    pub const POST_ID: &str = "post_id";
    /// Generated text column
    pub const TEXT_GENERATED: &str = "text_generated";
    /// Human-edited final text column
    pub const TEXT_FINAL: &str = "text_final";
    /// Tone column
    pub const TONE: &str = "tone";
    /// Template identifier column
    pub const TEMPLATE_ID: &str = "template_id";
    /// Producing model identifier column
    pub const MODEL_ID: &str = "model_id";
    /// Lifecycle status column
    pub const STATUS: &str = "status";
    /// Creation timestamp column
    pub const CREATED_AT: &str = "created_at";
    /// Approval timestamp column
    pub const APPROVED_AT: &str = "approved_at";
    /// Send timestamp column
    pub const SENT_AT: &str = "sent_at";
    /// Platform id of the sent reply column
    pub const SENT_POST_ID: &str = "sent_post_id";
    /// Last send error column
    pub const LAST_ERROR: &str = "last_error";
}

/// Outcomes table schema
pub mod outcomes {
    /// Table name
    pub const TABLE: &str = "outcomes";
    /// Primary key column
    pub const ID: &str = "id";
    /// Foreign key to drafts
    pub const DRAFT_ID: &str = "draft_id";
    /// Outcome kind column
    pub const KIND: &str = "kind";
    /// Free-form detail column (JSON)
    pub const DETAIL: &str = "detail";
    /// Observation timestamp column
    pub const OBSERVED_AT: &str = "observed_at";
}

/// Append-only audit log schema
pub mod audit_log {
    /// Table name
    pub const TABLE: &str = "audit_log";
    /// Primary key column
    pub const ID: &str = "id";
    /// Action name column
    pub const ACTION: &str = "action";
    /// Entity type column
    pub const ENTITY_TYPE: &str = "entity_type";
    /// Entity id column
    pub const ENTITY_ID: &str = "entity_id";
    /// Actor column
    pub const ACTOR: &str = "actor";
    /// Detail payload column (JSON)
    pub const DETAIL: &str = "detail";
    /// Entry timestamp column
    pub const CREATED_AT: &str = "created_at";
}
