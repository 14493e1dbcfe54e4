//! Human approval gate. Every state change here is attributed to an
//! operator and audited; the pipeline never approves its own drafts.

use tracing::info;

use crate::config::ProjectConfig;
use crate::db::Database;
use crate::error::{ReplyscoutError, Result};
use crate::models::{AuditEntry, DbDraft, DbJudgment, DbNormalizedPost, DbScore, DraftStatus, JudgmentLabel};
use crate::validation::{sanitize_outgoing_text, validate_actor, validate_reason};

/// One row of the review queue: the draft plus the context a reviewer
/// needs to decide.
#[derive(Debug, Clone)]
pub struct QueueItem {
    pub draft: DbDraft,
    pub post: DbNormalizedPost,
    pub judgment: Option<DbJudgment>,
    pub score: Option<DbScore>,
}

pub struct ApprovalService<'a> {
    db: &'a Database,
}

impl<'a> ApprovalService<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Pending drafts with their post, judgment, and score attached
    pub fn queue(&self, project_id: i64) -> Result<Vec<QueueItem>> {
        let mut items = Vec::new();
        for draft in self.db.drafts_with_status(project_id, DraftStatus::Pending)? {
            let post = match self.db.get_normalized_post(draft.post_id)? {
                Some(post) => post,
                None => continue,
            };
            items.push(QueueItem {
                judgment: self.db.get_judgment(draft.post_id)?,
                score: self.db.get_score(draft.post_id)?,
                draft,
                post,
            });
        }
        Ok(items)
    }

    /// Approve a draft as generated
    pub fn approve(&self, draft_id: i64, actor: &str) -> Result<DbDraft> {
        let actor = validate_actor(actor)?;
        let draft = self.db.approve_draft(draft_id)?;
        self.db.append_audit(&AuditEntry::human(
            actor,
            "approve",
            "draft",
            draft_id,
            serde_json::json!({}),
        ))?;
        info!(draft_id, actor, "draft approved");
        Ok(draft)
    }

    /// Replace the text and approve in one step. The edited text is held
    /// to the same character limit as generated text.
    pub fn edit_and_approve(
        &self,
        draft_id: i64,
        final_text: &str,
        actor: &str,
        config: &ProjectConfig,
    ) -> Result<DbDraft> {
        let actor = validate_actor(actor)?;
        let trimmed = sanitize_outgoing_text(final_text);
        let trimmed = trimmed.as_str();
        if trimmed.is_empty() {
            return Err(ReplyscoutError::InvalidConfig(
                "edited draft text cannot be empty".to_string(),
            ));
        }
        if trimmed.chars().count() > config.persona.char_limit {
            return Err(ReplyscoutError::InvalidConfig(format!(
                "edited draft text exceeds the {} character limit",
                config.persona.char_limit
            )));
        }

        let draft = self.db.edit_and_approve_draft(draft_id, trimmed)?;
        self.db.append_audit(&AuditEntry::human(
            actor,
            "edit_approve",
            "draft",
            draft_id,
            serde_json::json!({ "chars": trimmed.chars().count() }),
        ))?;
        info!(draft_id, actor, "draft edited and approved");
        Ok(draft)
    }

    /// Reject a pending draft; terminal
    pub fn reject(&self, draft_id: i64, actor: &str, reason: Option<&str>) -> Result<DbDraft> {
        let actor = validate_actor(actor)?;
        let reason = match reason {
            Some(r) => Some(validate_reason(r)?),
            None => None,
        };
        let draft = self.db.reject_draft(draft_id)?;
        self.db.append_audit(&AuditEntry::human(
            actor,
            "reject",
            "draft",
            draft_id,
            serde_json::json!({ "reason": reason }),
        ))?;
        info!(draft_id, actor, "draft rejected");
        Ok(draft)
    }

    /// Record a human correction to a judgment. The original automated
    /// verdict stays in place for later training.
    pub fn correct_judgment(
        &self,
        post_id: i64,
        label: JudgmentLabel,
        reason: &str,
        actor: &str,
    ) -> Result<()> {
        let actor = validate_actor(actor)?;
        let reason = validate_reason(reason)?;
        self.db.correct_judgment(post_id, label, reason)?;
        self.db.append_audit(&AuditEntry::human(
            actor,
            "correct_judgment",
            "post",
            post_id,
            serde_json::json!({ "label": label.as_str(), "reason": reason }),
        ))?;
        info!(post_id, actor, label = label.as_str(), "judgment corrected");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Author, Engagement, Entities, Judgment, NewDraft, NewNormalizedPost, NewRawPost, now_utc};

    fn seed_draft(db: &Database) -> i64 {
        let project = db.upsert_project("t", "T", "h").unwrap();
        let raw = db
            .insert_raw_post(&NewRawPost {
                project_id: project.id,
                platform: "mock".into(),
                platform_id: "1".into(),
                query_label: "q".into(),
                payload: "{}".into(),
            })
            .unwrap();
        let raw_id = match raw {
            crate::db::InsertOutcome::Inserted(id) => id,
            crate::db::InsertOutcome::AlreadyExists => panic!("seed collision"),
        };
        let norm = db
            .insert_normalized_post(&NewNormalizedPost {
                raw_post_id: raw_id,
                project_id: project.id,
                author: Author::default(),
                text_original: "need a tool".into(),
                text_clean: "need a tool".into(),
                language: None,
                posted_at: now_utc(),
                engagement: Engagement::default(),
                entities: Entities::default(),
                reply_to_id: None,
                conversation_id: None,
            })
            .unwrap();
        let post_id = match norm {
            crate::db::InsertOutcome::Inserted(id) => id,
            crate::db::InsertOutcome::AlreadyExists => panic!("seed collision"),
        };
        db.insert_judgment(
            post_id,
            &Judgment {
                label: JudgmentLabel::Relevant,
                confidence: 0.9,
                reasoning: "t".into(),
                model_id: "t".into(),
                latency_ms: 1,
            },
        )
        .unwrap();
        db.insert_draft(&NewDraft {
            post_id,
            text_generated: "hello there".into(),
            tone: "friendly".into(),
            template_id: None,
            model_id: "t".into(),
        })
        .unwrap()
        .id
    }

    fn config() -> ProjectConfig {
        ProjectConfig::from_yaml_str("slug: t\nname: T\nqueries:\n  - query: q\n    label: q\n").unwrap()
    }

    #[test]
    fn test_approve_then_reject_is_illegal() {
        let db = Database::in_memory().unwrap();
        let service = ApprovalService::new(&db);
        let draft_id = seed_draft(&db);

        let approved = service.approve(draft_id, "reviewer").unwrap();
        assert_eq!(approved.status, DraftStatus::Approved);

        let err = service.reject(draft_id, "reviewer", None).unwrap_err();
        assert!(matches!(err, ReplyscoutError::InvalidTransition { .. }));
    }

    #[test]
    fn test_edit_and_approve_validates_text() {
        let db = Database::in_memory().unwrap();
        let service = ApprovalService::new(&db);
        let draft_id = seed_draft(&db);
        let config = config();

        assert!(service.edit_and_approve(draft_id, "  ", "r", &config).is_err());
        let long = "x".repeat(500);
        assert!(service.edit_and_approve(draft_id, &long, "r", &config).is_err());

        let draft = service
            .edit_and_approve(draft_id, "A better reply.", "r", &config)
            .unwrap();
        assert_eq!(draft.status, DraftStatus::Edited);
        assert_eq!(draft.outgoing_text(), "A better reply.");
    }

    #[test]
    fn test_actions_are_audited() {
        let db = Database::in_memory().unwrap();
        let service = ApprovalService::new(&db);
        let draft_id = seed_draft(&db);

        service.approve(draft_id, "reviewer").unwrap();
        assert_eq!(db.count_audit_entries("approve").unwrap(), 1);
    }
}
