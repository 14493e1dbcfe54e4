//! Drafter stage: generate one reply per qualifying scored post, in the
//! project persona's voice, and park it PENDING for human review.

use tracing::{info, warn};

use crate::config::ProjectConfig;
use crate::db::Database;
use crate::error::{ReplyscoutError, Result};
use crate::gateway::LlmGateway;
use crate::llm::{ChatMessage, ChatRequest};
use crate::metrics;
use crate::models::{DbNormalizedPost, NewDraft};

#[derive(Debug, Default, Clone, Copy)]
pub struct DraftSummary {
    pub drafted: usize,
    pub skipped: usize,
    pub failed: usize,
    pub truncated: usize,
}

pub struct Drafter<'a> {
    db: &'a Database,
    gateway: &'a LlmGateway,
}

impl<'a> Drafter<'a> {
    pub fn new(db: &'a Database, gateway: &'a LlmGateway) -> Self {
        Self { db, gateway }
    }

    /// Draft replies for the best undrafted posts at or above the score
    /// threshold, best first, capped at `drafts_per_run`.
    pub async fn run(&self, project_id: i64, config: &ProjectConfig) -> Result<DraftSummary> {
        let mut summary = DraftSummary::default();

        let candidates = self.db.get_draft_candidates(
            project_id,
            config.min_score_to_draft,
            config.drafts_per_run,
        )?;

        for (post_id, total) in candidates {
            let post = match self.db.get_normalized_post(post_id)? {
                Some(post) => post,
                None => continue,
            };

            // Re-check under the generation cost: another worker may have
            // drafted this post since the candidate query ran
            if self.db.post_has_draft(post_id)? {
                summary.skipped += 1;
                continue;
            }

            match self.generate(&post, config).await {
                Ok((text, was_truncated)) => {
                    if was_truncated {
                        summary.truncated += 1;
                    }
                    self.db.insert_draft(&NewDraft {
                        post_id,
                        text_generated: text,
                        tone: config.persona.tone.clone(),
                        template_id: None,
                        model_id: config.models.draft_model.clone(),
                    })?;
                    summary.drafted += 1;
                    metrics::record_draft_created();
                }
                Err(err) => {
                    warn!(post_id, score = total, error = %err, "draft generation failed");
                    summary.failed += 1;
                }
            }
        }

        info!(
            drafted = summary.drafted,
            failed = summary.failed,
            truncated = summary.truncated,
            "draft run finished"
        );
        Ok(summary)
    }

    /// Generate reply text within the persona's character limit. One
    /// shorten round-trip is attempted before falling back to a
    /// whitespace-boundary truncation.
    async fn generate(&self, post: &DbNormalizedPost, config: &ProjectConfig) -> Result<(String, bool)> {
        let limit = config.persona.char_limit;

        let request = build_draft_request(post, config, None);
        let first = self
            .gateway
            .complete(&request)
            .await
            .map_err(|e| ReplyscoutError::Gateway(e.to_string()))?;
        let text = first.content.trim().to_string();
        if text.chars().count() <= limit {
            return Ok((text, false));
        }

        let retry = build_draft_request(post, config, Some(&text));
        let second = self
            .gateway
            .complete(&retry)
            .await
            .map_err(|e| ReplyscoutError::Gateway(e.to_string()))?;
        let text = second.content.trim().to_string();
        if text.chars().count() <= limit {
            return Ok((text, false));
        }

        Ok((truncate_at_whitespace(&text, limit), true))
    }
}

fn build_draft_request(
    post: &DbNormalizedPost,
    config: &ProjectConfig,
    too_long: Option<&str>,
) -> ChatRequest {
    let persona = &config.persona;
    let mut system = format!(
        "You are {}, {} at {}. Write a reply to the post below in a {} tone.\n\
         Be genuinely helpful first; mention the product only when it fits naturally.\n\
         No hashtags or emoji unless the post you are replying to uses them.\n\
         Never open with canned empathy lines like \"I feel you\" or \"sorry to hear that\".\n\
         Hard limit: {} characters. Reply with the text only.",
        persona.name, persona.role, config.name, persona.tone, persona.char_limit
    );
    if !persona.voice_notes.is_empty() {
        system.push_str(&format!("\nVoice notes: {}", persona.voice_notes));
    }
    if !persona.example_reply.is_empty() {
        system.push_str(&format!("\nExample of your voice: {}", persona.example_reply));
    }

    let user = match too_long {
        Some(draft) => format!(
            "Your draft was over the {} character limit. Shorten it without losing the point:\n{}",
            persona.char_limit, draft
        ),
        None => format!(
            "Post by @{}:\n{}",
            post.author.username, post.text_clean
        ),
    };

    ChatRequest::new(
        config.models.draft_model.clone(),
        vec![ChatMessage::system(system), ChatMessage::user(user)],
    )
    .with_temperature(0.7)
    .with_max_tokens(200)
}

/// Cut text to at most `limit` characters, preferring the last
/// whitespace boundary so no word is split.
pub fn truncate_at_whitespace(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }

    let hard_cut: String = text.chars().take(limit).collect();
    // A cut landing on a word boundary splits nothing
    if text.chars().nth(limit).is_some_and(char::is_whitespace) {
        return hard_cut.trim_end().to_string();
    }
    match hard_cut.rfind(char::is_whitespace) {
        Some(boundary) if boundary > 0 => hard_cut[..boundary].trim_end().to_string(),
        _ => hard_cut,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{now_utc, Author, Engagement, Entities};

    #[test]
    fn test_prompt_carries_persona_hard_rules() {
        let config = ProjectConfig::from_yaml_str(
            r#"
slug: test
name: Test
queries:
  - label: crm
    query: crm
persona:
  name: Sam
  role: founder
  tone: helpful
  char_limit: 240
rubric:
  system_prompt: judge it
"#,
        )
        .unwrap();
        let post = DbNormalizedPost {
            id: 1,
            raw_post_id: 1,
            project_id: 1,
            author: Author {
                id: "a".into(),
                username: "user".into(),
                display_name: "User".into(),
                followers: 10,
                verified: false,
                bio: None,
            },
            text_original: "need a crm".into(),
            text_clean: "need a crm".into(),
            language: Some("eng".into()),
            posted_at: now_utc(),
            engagement: Engagement::default(),
            entities: Entities::default(),
            reply_to_id: None,
            conversation_id: None,
            normalized_at: now_utc(),
        };

        let request = build_draft_request(&post, &config, None);
        let system = &request.messages[0].content;
        assert!(system.contains("unless the post you are replying to uses them"));
        assert!(system.contains("canned empathy"));
        assert!(system.contains("240 characters"));
    }

    #[test]
    fn test_truncate_short_text_untouched() {
        assert_eq!(truncate_at_whitespace("short reply", 240), "short reply");
    }

    #[test]
    fn test_truncate_prefers_word_boundary() {
        let text = "this is a long reply that keeps going";
        let cut = truncate_at_whitespace(text, 14);
        assert_eq!(cut, "this is a long");
        assert!(cut.chars().count() <= 14);
    }

    #[test]
    fn test_truncate_single_long_word_hard_cuts() {
        let cut = truncate_at_whitespace("abcdefghijklmnop", 5);
        assert_eq!(cut, "abcde");
    }

    #[test]
    fn test_truncate_never_exceeds_limit() {
        let text = "word ".repeat(100);
        for limit in [1, 10, 50, 240] {
            assert!(truncate_at_whitespace(&text, limit).chars().count() <= limit);
        }
    }
}
