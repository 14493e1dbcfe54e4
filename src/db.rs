use std::fs;
use std::path::Path;

use r2d2::Pool;
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{params, Connection, OptionalExtension, Row};

use crate::error::{ReplyscoutError, Result};
use crate::models::{
    AuditEntry, Author, DbDraft, DbJudgment, DbNormalizedPost, DbOutcome, DbProject, DbRawPost,
    DbScore, DraftStatus, Engagement, Entities, Judgment, JudgmentLabel, NewDraft,
    NewNormalizedPost, NewRawPost, OutcomeKind, ScoreComponents, now_utc,
};
use crate::schema::{
    audit_log, drafts, judgments, normalized_posts, outcomes, projects, query_watermarks,
    raw_posts, scores,
};

// Type alias for the database connection pool
pub type DbPool = Pool<SqliteConnectionManager>;
pub type DbConnection = r2d2::PooledConnection<SqliteConnectionManager>;

/// Result of an insert guarded by a uniqueness constraint
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InsertOutcome {
    /// Row was created with this id
    Inserted(i64),
    /// A row with the same idempotency key already existed
    AlreadyExists,
}

impl InsertOutcome {
    /// True when the insert created a new row
    #[must_use]
    pub const fn is_new(&self) -> bool {
        matches!(self, Self::Inserted(_))
    }
}

/// Database manager for handling connections and pipeline storage
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database connection pool and run migrations
    pub fn new(database_url: &str) -> Result<Self> {
        // Create parent directory if it doesn't exist
        if let Some(parent) = Path::new(database_url).parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }

        let manager = SqliteConnectionManager::file(database_url);
        let pool = Pool::builder().build(manager)?;

        let conn = pool.get()?;
        Self::run_migrations(&conn)?;

        Ok(Self { pool })
    }

    /// In-memory database for tests
    pub fn in_memory() -> Result<Self> {
        let manager = SqliteConnectionManager::memory();
        // A single connection so every caller sees the same in-memory db
        let pool = Pool::builder().max_size(1).build(manager)?;
        let conn = pool.get()?;
        Self::run_migrations(&conn)?;
        Ok(Self { pool })
    }

    /// Run database migrations
    fn run_migrations(conn: &Connection) -> Result<()> {
        conn.execute_batch(include_str!(
            "../migrations/2025-06-01-000000_create_tables/up.sql"
        ))?;
        Ok(())
    }

    /// Get a connection from the pool
    pub fn get_connection(&self) -> Result<DbConnection> {
        Ok(self.pool.get()?)
    }

    // ---- projects ----

    /// Insert or update a project row for the given slug. The config hash
    /// is refreshed on every call so changes are observable across runs.
    pub fn upsert_project(&self, slug: &str, display_name: &str, config_hash: &str) -> Result<DbProject> {
        let conn = self.get_connection()?;
        let now = now_utc();

        conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}) VALUES (?, ?, ?, 1, ?, ?) \
                 ON CONFLICT({}) DO UPDATE SET {} = excluded.{}, {} = excluded.{}, {} = excluded.{}",
                projects::TABLE,
                projects::SLUG,
                projects::DISPLAY_NAME,
                projects::CONFIG_HASH,
                projects::ACTIVE,
                projects::CREATED_AT,
                projects::UPDATED_AT,
                projects::SLUG,
                projects::DISPLAY_NAME,
                projects::DISPLAY_NAME,
                projects::CONFIG_HASH,
                projects::CONFIG_HASH,
                projects::UPDATED_AT,
                projects::UPDATED_AT,
            ),
            params![slug, display_name, config_hash, now, now],
        )?;
        drop(conn);

        self.get_project(slug)?
            .ok_or_else(|| ReplyscoutError::ProjectNotFound(slug.to_string()))
    }

    /// Get a project by slug
    pub fn get_project(&self, slug: &str) -> Result<Option<DbProject>> {
        let conn = self.get_connection()?;
        let project = conn
            .query_row(
                &format!("SELECT * FROM {} WHERE {} = ?", projects::TABLE, projects::SLUG),
                params![slug],
                Self::map_project,
            )
            .optional()?;
        Ok(project)
    }

    /// Soft-deactivate a project. Never hard-deletes.
    pub fn deactivate_project(&self, slug: &str) -> Result<()> {
        let conn = self.get_connection()?;
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET {} = 0, {} = ? WHERE {} = ?",
                projects::TABLE,
                projects::ACTIVE,
                projects::UPDATED_AT,
                projects::SLUG
            ),
            params![now_utc(), slug],
        )?;
        if changed == 0 {
            return Err(ReplyscoutError::ProjectNotFound(slug.to_string()));
        }
        Ok(())
    }

    fn map_project(row: &Row) -> rusqlite::Result<DbProject> {
        Ok(DbProject {
            id: row.get(projects::ID)?,
            slug: row.get(projects::SLUG)?,
            display_name: row.get(projects::DISPLAY_NAME)?,
            config_hash: row.get(projects::CONFIG_HASH)?,
            active: row.get(projects::ACTIVE)?,
            created_at: row.get(projects::CREATED_AT)?,
            updated_at: row.get(projects::UPDATED_AT)?,
        })
    }

    // ---- raw posts ----

    /// Insert a raw post. The UNIQUE(platform, platform_id, project_id)
    /// constraint is the authoritative dedup guard: a duplicate insert is
    /// reported, not an error.
    pub fn insert_raw_post(&self, new_post: &NewRawPost) -> Result<InsertOutcome> {
        let conn = self.get_connection()?;
        let changed = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} ({}, {}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?, ?)",
                raw_posts::TABLE,
                raw_posts::PROJECT_ID,
                raw_posts::PLATFORM,
                raw_posts::PLATFORM_ID,
                raw_posts::QUERY_LABEL,
                raw_posts::PAYLOAD,
                raw_posts::COLLECTED_AT,
            ),
            params![
                new_post.project_id,
                new_post.platform,
                new_post.platform_id,
                new_post.query_label,
                new_post.payload,
                now_utc(),
            ],
        )?;

        if changed == 0 {
            Ok(InsertOutcome::AlreadyExists)
        } else {
            Ok(InsertOutcome::Inserted(conn.last_insert_rowid()))
        }
    }

    /// Check whether a (platform, platform_id, project) triple was already collected
    pub fn raw_post_exists(&self, platform: &str, platform_id: &str, project_id: i64) -> Result<bool> {
        let conn = self.get_connection()?;
        let exists: bool = conn.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ? AND {} = ? AND {} = ?)",
                raw_posts::TABLE,
                raw_posts::PLATFORM,
                raw_posts::PLATFORM_ID,
                raw_posts::PROJECT_ID,
            ),
            params![platform, platform_id, project_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Get a raw post by id
    pub fn get_raw_post(&self, raw_post_id: i64) -> Result<Option<DbRawPost>> {
        let conn = self.get_connection()?;
        let post = conn
            .query_row(
                &format!("SELECT * FROM {} WHERE {} = ?", raw_posts::TABLE, raw_posts::ID),
                params![raw_post_id],
                Self::map_raw_post,
            )
            .optional()?;
        Ok(post)
    }

    /// Raw posts that do not yet have a normalized counterpart
    pub fn get_unnormalized_raw_posts(&self, project_id: i64) -> Result<Vec<DbRawPost>> {
        let conn = self.get_connection()?;
        let query = format!(
            "SELECT r.* FROM {} r LEFT JOIN {} n ON n.{} = r.{} \
             WHERE n.{} IS NULL AND r.{} = ? ORDER BY r.{} ASC",
            raw_posts::TABLE,
            normalized_posts::TABLE,
            normalized_posts::RAW_POST_ID,
            raw_posts::ID,
            normalized_posts::ID,
            raw_posts::PROJECT_ID,
            raw_posts::ID,
        );
        let mut stmt = conn.prepare(&query)?;
        let iter = stmt.query_map(params![project_id], Self::map_raw_post)?;

        let mut results = Vec::new();
        for post in iter {
            results.push(post?);
        }
        Ok(results)
    }

    fn map_raw_post(row: &Row) -> rusqlite::Result<DbRawPost> {
        Ok(DbRawPost {
            id: row.get(raw_posts::ID)?,
            project_id: row.get(raw_posts::PROJECT_ID)?,
            platform: row.get(raw_posts::PLATFORM)?,
            platform_id: row.get(raw_posts::PLATFORM_ID)?,
            query_label: row.get(raw_posts::QUERY_LABEL)?,
            payload: row.get(raw_posts::PAYLOAD)?,
            collected_at: row.get(raw_posts::COLLECTED_AT)?,
        })
    }

    // ---- query watermarks ----

    /// Last seen platform id for a query label, if any
    pub fn get_watermark(&self, project_id: i64, query_label: &str) -> Result<Option<String>> {
        let conn = self.get_connection()?;
        let since_id = conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE {} = ? AND {} = ?",
                    query_watermarks::SINCE_ID,
                    query_watermarks::TABLE,
                    query_watermarks::PROJECT_ID,
                    query_watermarks::QUERY_LABEL,
                ),
                params![project_id, query_label],
                |row| row.get(0),
            )
            .optional()?;
        Ok(since_id)
    }

    /// Record the newest platform id seen for a query label
    pub fn set_watermark(&self, project_id: i64, query_label: &str, since_id: &str) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}) VALUES (?, ?, ?, ?) \
                 ON CONFLICT({}, {}) DO UPDATE SET {} = excluded.{}, {} = excluded.{}",
                query_watermarks::TABLE,
                query_watermarks::PROJECT_ID,
                query_watermarks::QUERY_LABEL,
                query_watermarks::SINCE_ID,
                query_watermarks::UPDATED_AT,
                query_watermarks::PROJECT_ID,
                query_watermarks::QUERY_LABEL,
                query_watermarks::SINCE_ID,
                query_watermarks::SINCE_ID,
                query_watermarks::UPDATED_AT,
                query_watermarks::UPDATED_AT,
            ),
            params![project_id, query_label, since_id, now_utc()],
        )?;
        Ok(())
    }

    // ---- normalized posts ----

    /// Insert a normalized post. UNIQUE(raw_post_id) keeps the 1:1 invariant
    /// even under concurrent normalizer workers.
    pub fn insert_normalized_post(&self, new_post: &NewNormalizedPost) -> Result<InsertOutcome> {
        let conn = self.get_connection()?;
        let changed = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} ({}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}, {}) \
                 VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                normalized_posts::TABLE,
                normalized_posts::RAW_POST_ID,
                normalized_posts::PROJECT_ID,
                normalized_posts::AUTHOR_ID,
                normalized_posts::AUTHOR_USERNAME,
                normalized_posts::AUTHOR_DISPLAY_NAME,
                normalized_posts::AUTHOR_FOLLOWERS,
                normalized_posts::AUTHOR_VERIFIED,
                normalized_posts::AUTHOR_BIO,
                normalized_posts::TEXT_ORIGINAL,
                normalized_posts::TEXT_CLEAN,
                normalized_posts::LANGUAGE,
                normalized_posts::POSTED_AT,
                normalized_posts::LIKES,
                normalized_posts::RETWEETS,
                normalized_posts::REPLIES,
                normalized_posts::VIEWS,
                normalized_posts::HASHTAGS,
                normalized_posts::MENTIONS,
                normalized_posts::URLS,
                normalized_posts::REPLY_TO_ID,
                normalized_posts::CONVERSATION_ID,
                normalized_posts::NORMALIZED_AT,
            ),
            params![
                new_post.raw_post_id,
                new_post.project_id,
                new_post.author.id,
                new_post.author.username,
                new_post.author.display_name,
                new_post.author.followers,
                new_post.author.verified,
                new_post.author.bio,
                new_post.text_original,
                new_post.text_clean,
                new_post.language,
                new_post.posted_at,
                new_post.engagement.likes,
                new_post.engagement.retweets,
                new_post.engagement.replies,
                new_post.engagement.views,
                serde_json::to_string(&new_post.entities.hashtags)?,
                serde_json::to_string(&new_post.entities.mentions)?,
                serde_json::to_string(&new_post.entities.urls)?,
                new_post.reply_to_id,
                new_post.conversation_id,
                now_utc(),
            ],
        )?;

        if changed == 0 {
            Ok(InsertOutcome::AlreadyExists)
        } else {
            Ok(InsertOutcome::Inserted(conn.last_insert_rowid()))
        }
    }

    /// Get a normalized post by id
    pub fn get_normalized_post(&self, post_id: i64) -> Result<Option<DbNormalizedPost>> {
        let conn = self.get_connection()?;
        let post = conn
            .query_row(
                &format!(
                    "SELECT * FROM {} WHERE {} = ?",
                    normalized_posts::TABLE,
                    normalized_posts::ID
                ),
                params![post_id],
                Self::map_normalized_post,
            )
            .optional()?;
        Ok(post)
    }

    /// Normalized posts without a judgment yet
    pub fn get_unjudged_posts(&self, project_id: i64) -> Result<Vec<DbNormalizedPost>> {
        let conn = self.get_connection()?;
        let query = format!(
            "SELECT n.* FROM {} n LEFT JOIN {} j ON j.{} = n.{} \
             WHERE j.{} IS NULL AND n.{} = ? ORDER BY n.{} ASC",
            normalized_posts::TABLE,
            judgments::TABLE,
            judgments::POST_ID,
            normalized_posts::ID,
            judgments::ID,
            normalized_posts::PROJECT_ID,
            normalized_posts::ID,
        );
        let mut stmt = conn.prepare(&query)?;
        let iter = stmt.query_map(params![project_id], Self::map_normalized_post)?;

        let mut results = Vec::new();
        for post in iter {
            results.push(post?);
        }
        Ok(results)
    }

    fn map_normalized_post(row: &Row) -> rusqlite::Result<DbNormalizedPost> {
        let hashtags: String = row.get(normalized_posts::HASHTAGS)?;
        let mentions: String = row.get(normalized_posts::MENTIONS)?;
        let urls: String = row.get(normalized_posts::URLS)?;

        Ok(DbNormalizedPost {
            id: row.get(normalized_posts::ID)?,
            raw_post_id: row.get(normalized_posts::RAW_POST_ID)?,
            project_id: row.get(normalized_posts::PROJECT_ID)?,
            author: Author {
                id: row.get(normalized_posts::AUTHOR_ID)?,
                username: row.get(normalized_posts::AUTHOR_USERNAME)?,
                display_name: row.get(normalized_posts::AUTHOR_DISPLAY_NAME)?,
                followers: row.get(normalized_posts::AUTHOR_FOLLOWERS)?,
                verified: row.get(normalized_posts::AUTHOR_VERIFIED)?,
                bio: row.get(normalized_posts::AUTHOR_BIO)?,
            },
            text_original: row.get(normalized_posts::TEXT_ORIGINAL)?,
            text_clean: row.get(normalized_posts::TEXT_CLEAN)?,
            language: row.get(normalized_posts::LANGUAGE)?,
            posted_at: row.get(normalized_posts::POSTED_AT)?,
            engagement: Engagement {
                likes: row.get(normalized_posts::LIKES)?,
                retweets: row.get(normalized_posts::RETWEETS)?,
                replies: row.get(normalized_posts::REPLIES)?,
                views: row.get(normalized_posts::VIEWS)?,
            },
            entities: Entities {
                hashtags: serde_json::from_str(&hashtags).unwrap_or_default(),
                mentions: serde_json::from_str(&mentions).unwrap_or_default(),
                urls: serde_json::from_str(&urls).unwrap_or_default(),
            },
            reply_to_id: row.get(normalized_posts::REPLY_TO_ID)?,
            conversation_id: row.get(normalized_posts::CONVERSATION_ID)?,
            normalized_at: row
                .get::<_, Option<chrono::NaiveDateTime>>(normalized_posts::NORMALIZED_AT)?
                .unwrap_or_else(now_utc),
        })
    }

    // ---- judgments ----

    /// Insert a judgment. UNIQUE(post_id) makes first-judgment-wins hold
    /// even when two workers race past the pre-check.
    pub fn insert_judgment(&self, post_id: i64, judgment: &Judgment) -> Result<InsertOutcome> {
        let conn = self.get_connection()?;
        let changed = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} ({}, {}, {}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?, ?, ?)",
                judgments::TABLE,
                judgments::POST_ID,
                judgments::LABEL,
                judgments::CONFIDENCE,
                judgments::REASONING,
                judgments::MODEL_ID,
                judgments::LATENCY_MS,
                judgments::JUDGED_AT,
            ),
            params![
                post_id,
                judgment.label.as_str(),
                judgment.confidence,
                judgment.reasoning,
                judgment.model_id,
                judgment.latency_ms,
                now_utc(),
            ],
        )?;

        if changed == 0 {
            Ok(InsertOutcome::AlreadyExists)
        } else {
            Ok(InsertOutcome::Inserted(conn.last_insert_rowid()))
        }
    }

    /// Get the judgment for a post
    pub fn get_judgment(&self, post_id: i64) -> Result<Option<DbJudgment>> {
        let conn = self.get_connection()?;
        let judgment = conn
            .query_row(
                &format!(
                    "SELECT * FROM {} WHERE {} = ?",
                    judgments::TABLE,
                    judgments::POST_ID
                ),
                params![post_id],
                Self::map_judgment,
            )
            .optional()?;
        Ok(judgment)
    }

    /// Record a human correction. Only the override fields are written;
    /// the original automated label/confidence/reasoning stay untouched.
    pub fn correct_judgment(&self, post_id: i64, human_label: JudgmentLabel, reason: &str) -> Result<()> {
        let conn = self.get_connection()?;
        let changed = conn.execute(
            &format!(
                "UPDATE {} SET {} = ?, {} = ?, {} = ? WHERE {} = ?",
                judgments::TABLE,
                judgments::HUMAN_LABEL,
                judgments::CORRECTED_AT,
                judgments::CORRECTION_REASON,
                judgments::POST_ID,
            ),
            params![human_label.as_str(), now_utc(), reason, post_id],
        )?;
        if changed == 0 {
            return Err(ReplyscoutError::Other(format!(
                "no judgment exists for post {post_id}"
            )));
        }
        Ok(())
    }

    /// Judgments carrying a human correction, used to train the offline classifier
    pub fn corrected_judgments(&self, project_id: i64) -> Result<Vec<(DbNormalizedPost, DbJudgment)>> {
        let conn = self.get_connection()?;
        let query = format!(
            "SELECT j.{} FROM {} j JOIN {} n ON n.{} = j.{} \
             WHERE j.{} IS NOT NULL AND n.{} = ?",
            judgments::POST_ID,
            judgments::TABLE,
            normalized_posts::TABLE,
            normalized_posts::ID,
            judgments::POST_ID,
            judgments::HUMAN_LABEL,
            normalized_posts::PROJECT_ID,
        );
        let mut stmt = conn.prepare(&query)?;
        let ids = stmt.query_map(params![project_id], |row| row.get::<_, i64>(0))?;

        let mut post_ids = Vec::new();
        for id in ids {
            post_ids.push(id?);
        }
        drop(stmt);
        drop(conn);

        let mut results = Vec::new();
        for post_id in post_ids {
            if let (Some(post), Some(judgment)) =
                (self.get_normalized_post(post_id)?, self.get_judgment(post_id)?)
            {
                results.push((post, judgment));
            }
        }
        Ok(results)
    }

    fn map_judgment(row: &Row) -> rusqlite::Result<DbJudgment> {
        let label: String = row.get(judgments::LABEL)?;
        let human_label: Option<String> = row.get(judgments::HUMAN_LABEL)?;
        Ok(DbJudgment {
            id: row.get(judgments::ID)?,
            post_id: row.get(judgments::POST_ID)?,
            label: JudgmentLabel::parse(&label).unwrap_or(JudgmentLabel::Maybe),
            confidence: row.get(judgments::CONFIDENCE)?,
            reasoning: row.get(judgments::REASONING)?,
            model_id: row.get(judgments::MODEL_ID)?,
            latency_ms: row.get(judgments::LATENCY_MS)?,
            human_label: human_label.as_deref().and_then(JudgmentLabel::parse),
            corrected_at: row.get(judgments::CORRECTED_AT)?,
            correction_reason: row.get(judgments::CORRECTION_REASON)?,
            judged_at: row.get(judgments::JUDGED_AT)?,
        })
    }

    // ---- scores ----

    /// Posts that are judged relevant/maybe (honoring human overrides)
    /// and do not yet have a score
    pub fn get_scorable_post_ids(&self, project_id: i64) -> Result<Vec<i64>> {
        let conn = self.get_connection()?;
        let query = format!(
            "SELECT j.{} FROM {} j \
             JOIN {} n ON n.{} = j.{} \
             LEFT JOIN {} s ON s.{} = j.{} \
             WHERE s.{} IS NULL AND n.{} = ? \
             AND COALESCE(j.{}, j.{}) IN ('relevant', 'maybe') \
             ORDER BY j.{} ASC",
            judgments::POST_ID,
            judgments::TABLE,
            normalized_posts::TABLE,
            normalized_posts::ID,
            judgments::POST_ID,
            scores::TABLE,
            scores::POST_ID,
            judgments::POST_ID,
            scores::ID,
            normalized_posts::PROJECT_ID,
            judgments::HUMAN_LABEL,
            judgments::LABEL,
            judgments::POST_ID,
        );
        let mut stmt = conn.prepare(&query)?;
        let iter = stmt.query_map(params![project_id], |row| row.get::<_, i64>(0))?;

        let mut results = Vec::new();
        for id in iter {
            results.push(id?);
        }
        Ok(results)
    }

    /// Insert a score. UNIQUE(post_id) makes scores write-once.
    pub fn insert_score(
        &self,
        post_id: i64,
        total: f64,
        components: &ScoreComponents,
        formula_version: &str,
    ) -> Result<InsertOutcome> {
        let conn = self.get_connection()?;
        let changed = conn.execute(
            &format!(
                "INSERT OR IGNORE INTO {} ({}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?)",
                scores::TABLE,
                scores::POST_ID,
                scores::TOTAL,
                scores::COMPONENTS,
                scores::FORMULA_VERSION,
                scores::SCORED_AT,
            ),
            params![
                post_id,
                total,
                serde_json::to_string(components)?,
                formula_version,
                now_utc(),
            ],
        )?;

        if changed == 0 {
            Ok(InsertOutcome::AlreadyExists)
        } else {
            Ok(InsertOutcome::Inserted(conn.last_insert_rowid()))
        }
    }

    /// Get the score for a post
    pub fn get_score(&self, post_id: i64) -> Result<Option<DbScore>> {
        let conn = self.get_connection()?;
        let score = conn
            .query_row(
                &format!("SELECT * FROM {} WHERE {} = ?", scores::TABLE, scores::POST_ID),
                params![post_id],
                Self::map_score,
            )
            .optional()?;
        Ok(score)
    }

    fn map_score(row: &Row) -> rusqlite::Result<DbScore> {
        let components: String = row.get(scores::COMPONENTS)?;
        Ok(DbScore {
            id: row.get(scores::ID)?,
            post_id: row.get(scores::POST_ID)?,
            total: row.get(scores::TOTAL)?,
            components: serde_json::from_str(&components).unwrap_or(ScoreComponents {
                relevance: 0.0,
                authority: 0.0,
                engagement: 0.0,
                recency: 0.0,
                intent: 0.0,
            }),
            formula_version: row.get(scores::FORMULA_VERSION)?,
            scored_at: row.get(scores::SCORED_AT)?,
        })
    }

    // ---- drafts ----

    /// Scored posts above the threshold with no draft yet, best first
    pub fn get_draft_candidates(
        &self,
        project_id: i64,
        min_score: f64,
        limit: usize,
    ) -> Result<Vec<(i64, f64)>> {
        let conn = self.get_connection()?;
        let query = format!(
            "SELECT s.{}, s.{} FROM {} s \
             JOIN {} n ON n.{} = s.{} \
             LEFT JOIN {} d ON d.{} = s.{} \
             WHERE d.{} IS NULL AND n.{} = ? AND s.{} >= ? \
             ORDER BY s.{} DESC LIMIT ?",
            scores::POST_ID,
            scores::TOTAL,
            scores::TABLE,
            normalized_posts::TABLE,
            normalized_posts::ID,
            scores::POST_ID,
            drafts::TABLE,
            drafts::POST_ID,
            scores::POST_ID,
            drafts::ID,
            normalized_posts::PROJECT_ID,
            scores::TOTAL,
            scores::TOTAL,
        );
        let mut stmt = conn.prepare(&query)?;
        let iter = stmt.query_map(params![project_id, min_score, limit as i64], |row| {
            Ok((row.get::<_, i64>(0)?, row.get::<_, f64>(1)?))
        })?;

        let mut results = Vec::new();
        for pair in iter {
            results.push(pair?);
        }
        Ok(results)
    }

    /// Insert a draft in the PENDING state
    pub fn insert_draft(&self, new_draft: &NewDraft) -> Result<DbDraft> {
        let conn = self.get_connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?, 'pending', ?)",
                drafts::TABLE,
                drafts::POST_ID,
                drafts::TEXT_GENERATED,
                drafts::TONE,
                drafts::TEMPLATE_ID,
                drafts::MODEL_ID,
                drafts::STATUS,
                drafts::CREATED_AT,
            ),
            params![
                new_draft.post_id,
                new_draft.text_generated,
                new_draft.tone,
                new_draft.template_id,
                new_draft.model_id,
                now_utc(),
            ],
        )?;

        let id = conn.last_insert_rowid();
        drop(conn);
        self.get_draft(id)?
            .ok_or(ReplyscoutError::DraftNotFound(id))
    }

    /// Get a draft by id
    pub fn get_draft(&self, draft_id: i64) -> Result<Option<DbDraft>> {
        let conn = self.get_connection()?;
        let draft = conn
            .query_row(
                &format!("SELECT * FROM {} WHERE {} = ?", drafts::TABLE, drafts::ID),
                params![draft_id],
                Self::map_draft,
            )
            .optional()?;
        Ok(draft)
    }

    /// True if the post already has a draft (any status)
    pub fn post_has_draft(&self, post_id: i64) -> Result<bool> {
        let conn = self.get_connection()?;
        let exists: bool = conn.query_row(
            &format!(
                "SELECT EXISTS(SELECT 1 FROM {} WHERE {} = ?)",
                drafts::TABLE,
                drafts::POST_ID
            ),
            params![post_id],
            |row| row.get(0),
        )?;
        Ok(exists)
    }

    /// Drafts in a given status for a project, oldest first
    pub fn drafts_with_status(&self, project_id: i64, status: DraftStatus) -> Result<Vec<DbDraft>> {
        let conn = self.get_connection()?;
        let query = format!(
            "SELECT d.* FROM {} d JOIN {} n ON n.{} = d.{} \
             WHERE d.{} = ? AND n.{} = ? ORDER BY d.{} ASC",
            drafts::TABLE,
            normalized_posts::TABLE,
            normalized_posts::ID,
            drafts::POST_ID,
            drafts::STATUS,
            normalized_posts::PROJECT_ID,
            drafts::ID,
        );
        let mut stmt = conn.prepare(&query)?;
        let iter = stmt.query_map(params![status.as_str(), project_id], Self::map_draft)?;

        let mut results = Vec::new();
        for draft in iter {
            results.push(draft?);
        }
        Ok(results)
    }

    /// Drafts eligible for sending (APPROVED or EDITED), oldest approval first
    pub fn sendable_drafts(&self, project_id: i64) -> Result<Vec<DbDraft>> {
        let conn = self.get_connection()?;
        let query = format!(
            "SELECT d.* FROM {} d JOIN {} n ON n.{} = d.{} \
             WHERE d.{} IN ('approved', 'edited') AND n.{} = ? ORDER BY d.{} ASC",
            drafts::TABLE,
            normalized_posts::TABLE,
            normalized_posts::ID,
            drafts::POST_ID,
            drafts::STATUS,
            normalized_posts::PROJECT_ID,
            drafts::APPROVED_AT,
        );
        let mut stmt = conn.prepare(&query)?;
        let iter = stmt.query_map(params![project_id], Self::map_draft)?;

        let mut results = Vec::new();
        for draft in iter {
            results.push(draft?);
        }
        Ok(results)
    }

    /// Guarded transition to APPROVED. Legal from PENDING and FAILED only.
    pub fn approve_draft(&self, draft_id: i64) -> Result<DbDraft> {
        self.transition(
            draft_id,
            "approve",
            &format!(
                "UPDATE {} SET {} = 'approved', {} = ?, {} = NULL WHERE {} = ? AND {} IN ('pending', 'failed')",
                drafts::TABLE,
                drafts::STATUS,
                drafts::APPROVED_AT,
                drafts::LAST_ERROR,
                drafts::ID,
                drafts::STATUS,
            ),
            params![now_utc(), draft_id],
        )
    }

    /// Guarded transition to EDITED with the final text. Legal from
    /// PENDING and FAILED only.
    pub fn edit_and_approve_draft(&self, draft_id: i64, final_text: &str) -> Result<DbDraft> {
        self.transition(
            draft_id,
            "edit+approve",
            &format!(
                "UPDATE {} SET {} = 'edited', {} = ?, {} = ?, {} = NULL WHERE {} = ? AND {} IN ('pending', 'failed')",
                drafts::TABLE,
                drafts::STATUS,
                drafts::TEXT_FINAL,
                drafts::APPROVED_AT,
                drafts::LAST_ERROR,
                drafts::ID,
                drafts::STATUS,
            ),
            params![final_text, now_utc(), draft_id],
        )
    }

    /// Guarded transition to REJECTED. Legal from PENDING only; terminal.
    pub fn reject_draft(&self, draft_id: i64) -> Result<DbDraft> {
        self.transition(
            draft_id,
            "reject",
            &format!(
                "UPDATE {} SET {} = 'rejected' WHERE {} = ? AND {} = 'pending'",
                drafts::TABLE,
                drafts::STATUS,
                drafts::ID,
                drafts::STATUS,
            ),
            params![draft_id],
        )
    }

    /// Guarded transition to SENT with the platform post id
    pub fn mark_draft_sent(&self, draft_id: i64, sent_post_id: &str) -> Result<DbDraft> {
        self.transition(
            draft_id,
            "send",
            &format!(
                "UPDATE {} SET {} = 'sent', {} = ?, {} = ? WHERE {} = ? AND {} IN ('approved', 'edited')",
                drafts::TABLE,
                drafts::STATUS,
                drafts::SENT_AT,
                drafts::SENT_POST_ID,
                drafts::ID,
                drafts::STATUS,
            ),
            params![now_utc(), sent_post_id, draft_id],
        )
    }

    /// Guarded transition to FAILED, recording the error
    pub fn mark_draft_failed(&self, draft_id: i64, error: &str) -> Result<DbDraft> {
        self.transition(
            draft_id,
            "fail",
            &format!(
                "UPDATE {} SET {} = 'failed', {} = ? WHERE {} = ? AND {} IN ('approved', 'edited')",
                drafts::TABLE,
                drafts::STATUS,
                drafts::LAST_ERROR,
                drafts::ID,
                drafts::STATUS,
            ),
            params![error, draft_id],
        )
    }

    /// Run a guarded status UPDATE; zero rows affected means the draft is
    /// missing or the transition is illegal from its current status.
    fn transition(
        &self,
        draft_id: i64,
        attempted: &str,
        query: &str,
        update_params: impl rusqlite::Params,
    ) -> Result<DbDraft> {
        let conn = self.get_connection()?;
        let changed = conn.execute(query, update_params)?;
        drop(conn);

        if changed == 0 {
            let current = self
                .get_draft(draft_id)?
                .ok_or(ReplyscoutError::DraftNotFound(draft_id))?;
            return Err(ReplyscoutError::InvalidTransition {
                draft_id,
                current: current.status.as_str().to_string(),
                attempted: attempted.to_string(),
            });
        }

        self.get_draft(draft_id)?
            .ok_or(ReplyscoutError::DraftNotFound(draft_id))
    }

    fn map_draft(row: &Row) -> rusqlite::Result<DbDraft> {
        let status: String = row.get(drafts::STATUS)?;
        Ok(DbDraft {
            id: row.get(drafts::ID)?,
            post_id: row.get(drafts::POST_ID)?,
            text_generated: row.get(drafts::TEXT_GENERATED)?,
            text_final: row.get(drafts::TEXT_FINAL)?,
            tone: row.get(drafts::TONE)?,
            template_id: row.get(drafts::TEMPLATE_ID)?,
            model_id: row.get(drafts::MODEL_ID)?,
            status: DraftStatus::parse(&status).unwrap_or(DraftStatus::Pending),
            created_at: row.get(drafts::CREATED_AT)?,
            approved_at: row.get(drafts::APPROVED_AT)?,
            sent_at: row.get(drafts::SENT_AT)?,
            sent_post_id: row.get(drafts::SENT_POST_ID)?,
            last_error: row.get(drafts::LAST_ERROR)?,
        })
    }

    // ---- outcomes ----

    /// Append an observed outcome for a sent draft
    pub fn insert_outcome(&self, draft_id: i64, kind: OutcomeKind, detail: &serde_json::Value) -> Result<i64> {
        let conn = self.get_connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}) VALUES (?, ?, ?, ?)",
                outcomes::TABLE,
                outcomes::DRAFT_ID,
                outcomes::KIND,
                outcomes::DETAIL,
                outcomes::OBSERVED_AT,
            ),
            params![draft_id, kind.as_str(), detail.to_string(), now_utc()],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Outcomes recorded for a draft, oldest first
    pub fn outcomes_for_draft(&self, draft_id: i64) -> Result<Vec<DbOutcome>> {
        let conn = self.get_connection()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT * FROM {} WHERE {} = ? ORDER BY {} ASC",
            outcomes::TABLE,
            outcomes::DRAFT_ID,
            outcomes::ID,
        ))?;
        let iter = stmt.query_map(params![draft_id], |row| {
            let kind: String = row.get(outcomes::KIND)?;
            Ok(DbOutcome {
                id: row.get(outcomes::ID)?,
                draft_id: row.get(outcomes::DRAFT_ID)?,
                kind: OutcomeKind::parse(&kind).unwrap_or(OutcomeKind::ReplyReceived),
                detail: row.get(outcomes::DETAIL)?,
                observed_at: row.get(outcomes::OBSERVED_AT)?,
            })
        })?;

        let mut results = Vec::new();
        for outcome in iter {
            results.push(outcome?);
        }
        Ok(results)
    }

    /// Drafts that were sent, for engagement tracking
    pub fn sent_drafts(&self, project_id: i64) -> Result<Vec<DbDraft>> {
        self.drafts_with_status(project_id, DraftStatus::Sent)
    }

    // ---- audit log ----

    /// Append an entry to the audit log. This is the only mutation history
    /// kept; mutable rows store current state only.
    pub fn append_audit(&self, entry: &AuditEntry) -> Result<()> {
        let conn = self.get_connection()?;
        conn.execute(
            &format!(
                "INSERT INTO {} ({}, {}, {}, {}, {}, {}) VALUES (?, ?, ?, ?, ?, ?)",
                audit_log::TABLE,
                audit_log::ACTION,
                audit_log::ENTITY_TYPE,
                audit_log::ENTITY_ID,
                audit_log::ACTOR,
                audit_log::DETAIL,
                audit_log::CREATED_AT,
            ),
            params![
                entry.action,
                entry.entity_type,
                entry.entity_id,
                entry.actor,
                entry.detail.to_string(),
                now_utc(),
            ],
        )?;
        Ok(())
    }

    /// Count audit entries with a given action, for reporting and tests
    pub fn count_audit_entries(&self, action: &str) -> Result<i64> {
        let conn = self.get_connection()?;
        let count: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {} = ?",
                audit_log::TABLE,
                audit_log::ACTION
            ),
            params![action],
            |row| row.get(0),
        )?;
        Ok(count)
    }

    // ---- stats ----

    /// Row counts across the pipeline stages for a project
    pub fn pipeline_stats(&self, project_id: i64) -> Result<PipelineStats> {
        let conn = self.get_connection()?;

        let raw: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {} = ?",
                raw_posts::TABLE,
                raw_posts::PROJECT_ID
            ),
            params![project_id],
            |row| row.get(0),
        )?;
        let normalized: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} WHERE {} = ?",
                normalized_posts::TABLE,
                normalized_posts::PROJECT_ID
            ),
            params![project_id],
            |row| row.get(0),
        )?;
        let judged: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} j JOIN {} n ON n.{} = j.{} WHERE n.{} = ?",
                judgments::TABLE,
                normalized_posts::TABLE,
                normalized_posts::ID,
                judgments::POST_ID,
                normalized_posts::PROJECT_ID
            ),
            params![project_id],
            |row| row.get(0),
        )?;
        let scored: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} s JOIN {} n ON n.{} = s.{} WHERE n.{} = ?",
                scores::TABLE,
                normalized_posts::TABLE,
                normalized_posts::ID,
                scores::POST_ID,
                normalized_posts::PROJECT_ID
            ),
            params![project_id],
            |row| row.get(0),
        )?;
        let drafted: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} d JOIN {} n ON n.{} = d.{} WHERE n.{} = ?",
                drafts::TABLE,
                normalized_posts::TABLE,
                normalized_posts::ID,
                drafts::POST_ID,
                normalized_posts::PROJECT_ID
            ),
            params![project_id],
            |row| row.get(0),
        )?;
        let sent: i64 = conn.query_row(
            &format!(
                "SELECT COUNT(*) FROM {} d JOIN {} n ON n.{} = d.{} WHERE n.{} = ? AND d.{} = 'sent'",
                drafts::TABLE,
                normalized_posts::TABLE,
                normalized_posts::ID,
                drafts::POST_ID,
                normalized_posts::PROJECT_ID,
                drafts::STATUS
            ),
            params![project_id],
            |row| row.get(0),
        )?;

        Ok(PipelineStats {
            raw_posts: raw as usize,
            normalized_posts: normalized as usize,
            judgments: judged as usize,
            scores: scored as usize,
            drafts: drafted as usize,
            sent: sent as usize,
        })
    }
}

/// Row counts across the pipeline stages
#[derive(Debug, Clone, Copy)]
pub struct PipelineStats {
    pub raw_posts: usize,
    pub normalized_posts: usize,
    pub judgments: usize,
    pub scores: usize,
    pub drafts: usize,
    pub sent: usize,
}
