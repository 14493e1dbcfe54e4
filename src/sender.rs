//! Sender stage: post approved drafts as replies, under the rate
//! limiter. The limiter is consulted before every send; a full window
//! defers the rest of the batch to a later run instead of sleeping.

use tracing::{info, warn};

use crate::db::Database;
use crate::error::Result;
use crate::metrics;
use crate::models::AuditEntry;
use crate::platform::SocialPlatform;
use crate::ratelimit::{Acquire, RateLimiter};

#[derive(Debug, Default, Clone, Copy)]
pub struct SendSummary {
    pub sent: usize,
    pub failed: usize,
    pub deferred: usize,
}

pub struct Sender<'a> {
    db: &'a Database,
    platform: &'a dyn SocialPlatform,
    limiter: &'a RateLimiter,
}

impl<'a> Sender<'a> {
    pub fn new(db: &'a Database, platform: &'a dyn SocialPlatform, limiter: &'a RateLimiter) -> Self {
        Self {
            db,
            platform,
            limiter,
        }
    }

    /// Send approved/edited drafts, oldest approval first. A send
    /// failure marks that draft FAILED and continues; an exhausted rate
    /// window defers everything remaining.
    pub async fn run(&self, project_id: i64) -> Result<SendSummary> {
        let mut summary = SendSummary::default();
        let drafts = self.db.sendable_drafts(project_id)?;
        let total = drafts.len();

        for (index, draft) in drafts.into_iter().enumerate() {
            match self.limiter.acquire() {
                Acquire::Ready => {}
                Acquire::Wait { seconds } => {
                    summary.deferred = total - index;
                    info!(
                        deferred = summary.deferred,
                        wait_seconds = seconds,
                        "rate window full, deferring remaining drafts"
                    );
                    break;
                }
            }

            let in_reply_to = match self.platform_post_id(draft.post_id)? {
                Some(id) => id,
                None => {
                    warn!(draft_id = draft.id, "original post missing, marking failed");
                    self.db.mark_draft_failed(draft.id, "original post missing")?;
                    summary.failed += 1;
                    continue;
                }
            };

            match self.platform.post_reply(&in_reply_to, draft.outgoing_text()).await {
                Ok(reply) => {
                    self.db.mark_draft_sent(draft.id, &reply.post_id)?;
                    self.db.append_audit(&AuditEntry::pipeline(
                        "send",
                        "draft",
                        draft.id,
                        serde_json::json!({ "sent_post_id": reply.post_id }),
                    ))?;
                    metrics::record_send(true);
                    summary.sent += 1;
                }
                Err(err) => {
                    warn!(draft_id = draft.id, error = %err, "send failed");
                    self.db.mark_draft_failed(draft.id, &err.to_string())?;
                    self.db.append_audit(&AuditEntry::pipeline(
                        "send_failed",
                        "draft",
                        draft.id,
                        serde_json::json!({ "error": err.to_string() }),
                    ))?;
                    metrics::record_send(false);
                    summary.failed += 1;
                }
            }
        }

        let tokens = self.limiter.tokens();
        metrics::record_rate_limit_tokens(tokens.hourly_remaining, tokens.daily_remaining);

        info!(
            sent = summary.sent,
            failed = summary.failed,
            deferred = summary.deferred,
            "send run finished"
        );
        Ok(summary)
    }

    /// Resolve the platform-side id of the post a draft replies to
    fn platform_post_id(&self, post_id: i64) -> Result<Option<String>> {
        let Some(post) = self.db.get_normalized_post(post_id)? else {
            return Ok(None);
        };
        Ok(self
            .db
            .get_raw_post(post.raw_post_id)?
            .map(|raw| raw.platform_id))
    }
}
