//! Outcome tracking: poll the platform for engagement on replies we
//! sent, and record what happened. Feeds later rubric and persona
//! tuning.

use tracing::{info, warn};

use crate::db::Database;
use crate::error::Result;
use crate::models::{DbDraft, OutcomeKind};
use crate::platform::SocialPlatform;

#[derive(Debug, Default, Clone, Copy)]
pub struct TrackSummary {
    pub checked: usize,
    pub recorded: usize,
    pub failed: usize,
}

pub struct OutcomeTracker<'a> {
    db: &'a Database,
    platform: &'a dyn SocialPlatform,
}

impl<'a> OutcomeTracker<'a> {
    pub fn new(db: &'a Database, platform: &'a dyn SocialPlatform) -> Self {
        Self { db, platform }
    }

    /// Check every sent draft once and record newly observed outcome
    /// kinds. Each kind is recorded at most once per draft.
    pub async fn run(&self, project_id: i64) -> Result<TrackSummary> {
        let mut summary = TrackSummary::default();

        for draft in self.db.sent_drafts(project_id)? {
            summary.checked += 1;
            match self.track_one(&draft).await {
                Ok(recorded) => summary.recorded += recorded,
                Err(err) => {
                    warn!(draft_id = draft.id, error = %err, "outcome check failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            checked = summary.checked,
            recorded = summary.recorded,
            "outcome tracking finished"
        );
        Ok(summary)
    }

    async fn track_one(&self, draft: &DbDraft) -> Result<usize> {
        let Some(sent_post_id) = draft.sent_post_id.as_deref() else {
            return Ok(0);
        };

        let engagement = self.platform.fetch_engagement(sent_post_id).await?;
        let already: Vec<OutcomeKind> = self
            .db
            .outcomes_for_draft(draft.id)?
            .into_iter()
            .map(|o| o.kind)
            .collect();

        let mut recorded = 0;
        let observations = [
            (OutcomeKind::ReplyReceived, engagement.replies),
            (OutcomeKind::LikeReceived, engagement.likes),
        ];
        for (kind, count) in observations {
            if count > 0 && !already.contains(&kind) {
                self.db
                    .insert_outcome(draft.id, kind, &serde_json::json!({ "count": count }))?;
                recorded += 1;
            }
        }
        Ok(recorded)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{
        now_utc, Author, Engagement, Entities, Judgment, JudgmentLabel, NewDraft,
        NewNormalizedPost, NewRawPost,
    };
    use crate::platform::MockPlatform;
    use crate::ratelimit::RateLimiter;
    use crate::sender::Sender;

    #[tokio::test]
    async fn test_outcomes_recorded_once_per_kind() {
        let db = Database::in_memory().unwrap();
        let project = db.upsert_project("t", "T", "h").unwrap();

        // Seed one sent draft via the sender so sent_post_id is set
        let raw = db
            .insert_raw_post(&NewRawPost {
                project_id: project.id,
                platform: "mock".into(),
                platform_id: "p1".into(),
                query_label: "q".into(),
                payload: "{}".into(),
            })
            .unwrap();
        let raw_id = match raw {
            crate::db::InsertOutcome::Inserted(id) => id,
            crate::db::InsertOutcome::AlreadyExists => panic!("collision"),
        };
        let norm = db
            .insert_normalized_post(&NewNormalizedPost {
                raw_post_id: raw_id,
                project_id: project.id,
                author: Author::default(),
                text_original: "post".into(),
                text_clean: "post".into(),
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
            crate::db::InsertOutcome::AlreadyExists => panic!("collision"),
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
        let draft = db
            .insert_draft(&NewDraft {
                post_id,
                text_generated: "a reply".into(),
                tone: "friendly".into(),
                template_id: None,
                model_id: "t".into(),
            })
            .unwrap();
        db.approve_draft(draft.id).unwrap();

        let platform = MockPlatform::new(vec![]);
        let limiter = RateLimiter::new(10, 10);
        Sender::new(&db, &platform, &limiter)
            .run(project.id)
            .await
            .unwrap();

        let tracker = OutcomeTracker::new(&db, &platform);
        // MockPlatform reports likes and replies on everything
        let first = tracker.run(project.id).await.unwrap();
        assert_eq!(first.recorded, 2);

        // Second pass records nothing new
        let second = tracker.run(project.id).await.unwrap();
        assert_eq!(second.recorded, 0);
        assert_eq!(db.outcomes_for_draft(draft.id).unwrap().len(), 2);
    }
}
