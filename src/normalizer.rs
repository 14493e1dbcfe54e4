//! Normalization stage: parse stored raw payloads into the flat shape
//! the judge and scorer work with.

use regex::Regex;
use tracing::{info, warn};
use unicode_normalization::UnicodeNormalization;

use crate::db::Database;
use crate::error::Result;
use crate::models::{Entities, NewNormalizedPost, PlatformPost};

/// Counts reported by one normalization run
#[derive(Debug, Default, Clone, Copy)]
pub struct NormalizeSummary {
    pub processed: usize,
    pub skipped: usize,
    pub malformed: usize,
}

pub struct Normalizer<'a> {
    db: &'a Database,
    url_re: Regex,
    hashtag_re: Regex,
    mention_re: Regex,
    whitespace_re: Regex,
}

impl<'a> Normalizer<'a> {
    pub fn new(db: &'a Database) -> Result<Self> {
        let compile = |pattern: &str| {
            Regex::new(pattern)
                .map_err(|e| crate::error::ReplyscoutError::Other(format!("bad pattern: {e}")))
        };
        Ok(Self {
            db,
            url_re: compile(r"https?://\S+")?,
            hashtag_re: compile(r"#(\w+)")?,
            mention_re: compile(r"@(\w+)")?,
            whitespace_re: compile(r"\s+")?,
        })
    }

    /// Normalize every raw post that has no normalized row yet. A
    /// malformed payload is logged and skipped; it never stops the run.
    /// With `dry_run`, parse and count but persist nothing.
    pub fn run(&self, project_id: i64, dry_run: bool) -> Result<NormalizeSummary> {
        let mut summary = NormalizeSummary::default();

        for raw in self.db.get_unnormalized_raw_posts(project_id)? {
            let post: PlatformPost = match serde_json::from_str(&raw.payload) {
                Ok(post) => post,
                Err(err) => {
                    warn!(raw_post_id = raw.id, error = %err, "malformed payload, skipping");
                    summary.malformed += 1;
                    continue;
                }
            };

            if dry_run {
                summary.processed += 1;
                continue;
            }

            let new_post = self.build(raw.id, project_id, &post);
            if self.db.insert_normalized_post(&new_post)?.is_new() {
                summary.processed += 1;
            } else {
                summary.skipped += 1;
            }
        }

        info!(
            processed = summary.processed,
            skipped = summary.skipped,
            malformed = summary.malformed,
            dry_run,
            "normalization run finished"
        );
        Ok(summary)
    }

    fn build(&self, raw_post_id: i64, project_id: i64, post: &PlatformPost) -> NewNormalizedPost {
        let text_clean = self.clean_text(&post.text);

        // Prefer platform-supplied entities; extract from text otherwise
        let entities = if post.entities.hashtags.is_empty()
            && post.entities.mentions.is_empty()
            && post.entities.urls.is_empty()
        {
            self.extract_entities(&post.text)
        } else {
            post.entities.clone()
        };

        let language = post
            .language
            .clone()
            .or_else(|| detect_language(&text_clean));

        NewNormalizedPost {
            raw_post_id,
            project_id,
            author: post.author.clone(),
            text_original: post.text.clone(),
            text_clean,
            language,
            posted_at: post.created_at,
            engagement: post.metrics,
            entities,
            reply_to_id: post.reply_to_id.clone(),
            conversation_id: post.conversation_id.clone(),
        }
    }

    /// NFC-normalize, strip URLs, collapse whitespace, trim
    pub fn clean_text(&self, text: &str) -> String {
        let normalized: String = text.nfc().collect();
        let without_urls = self.url_re.replace_all(&normalized, " ");
        let collapsed = self.whitespace_re.replace_all(&without_urls, " ");
        collapsed.trim().to_string()
    }

    fn extract_entities(&self, text: &str) -> Entities {
        Entities {
            hashtags: self
                .hashtag_re
                .captures_iter(text)
                .map(|c| c[1].to_lowercase())
                .collect(),
            mentions: self
                .mention_re
                .captures_iter(text)
                .map(|c| c[1].to_string())
                .collect(),
            urls: self
                .url_re
                .find_iter(text)
                .map(|m| m.as_str().to_string())
                .collect(),
        }
    }
}

/// Best-effort language detection; None when the detector is unsure.
/// The confidence cutoff is deliberately below whatlang's own
/// reliability bar, which rejects most tweet-length text.
fn detect_language(text: &str) -> Option<String> {
    if text.len() < 10 {
        return None;
    }
    let info = whatlang::detect(text)?;
    if info.confidence() > 0.5 {
        Some(info.lang().code().to_string())
    } else {
        None
    }
}
