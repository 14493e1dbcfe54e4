//! Judge stage: assign relevant / irrelevant / maybe to each normalized
//! post. Cheap keyword gates run before any model call; the LLM only
//! sees posts that survive them.

use std::collections::HashMap;

use rust_stemmers::{Algorithm, Stemmer};
use serde::Deserialize;
use tracing::{debug, info, warn};

use crate::config::ProjectConfig;
use crate::db::Database;
use crate::error::{ReplyscoutError, Result};
use crate::gateway::LlmGateway;
use crate::llm::{ChatMessage, ChatRequest, ProviderError};
use crate::metrics;
use crate::models::{DbNormalizedPost, Judgment, JudgmentLabel};

/// Model id recorded when a keyword exclusion decided the judgment
pub const MODEL_KEYWORD_EXCLUDE: &str = "keyword-exclude";
/// Model id recorded when the required-keyword gate decided
pub const MODEL_KEYWORD_REQUIRED: &str = "keyword-required-miss";
/// Model id recorded for the offline classifier
pub const MODEL_OFFLINE: &str = "offline-nb";
/// Model id recorded when the model reply could not be parsed
pub const FALLBACK_PARSE_ERROR: &str = "fallback-parse-error";

#[derive(Debug, Default, Clone, Copy)]
pub struct JudgeSummary {
    pub judged: usize,
    pub skipped: usize,
    pub excluded_by_keyword: usize,
    pub degraded: usize,
    pub failed: usize,
}

#[derive(Debug, Deserialize)]
struct Verdict {
    label: String,
    confidence: f64,
    #[serde(default)]
    reasoning: String,
}

pub struct Judge<'a> {
    db: &'a Database,
    gateway: &'a LlmGateway,
}

impl<'a> Judge<'a> {
    pub fn new(db: &'a Database, gateway: &'a LlmGateway) -> Self {
        Self { db, gateway }
    }

    /// Judge every unjudged post for the project. Gateway failures other
    /// than parse errors leave the post unjudged for the next run.
    pub async fn run(&self, project_id: i64, config: &ProjectConfig) -> Result<JudgeSummary> {
        let mut summary = JudgeSummary::default();

        for post in self.db.get_unjudged_posts(project_id)? {
            let judgment = match keyword_gate(&post, config) {
                Some(judgment) => {
                    summary.excluded_by_keyword += 1;
                    judgment
                }
                None => match self.judge_with_model(&post, config).await {
                    Ok(judgment) => {
                        if judgment.model_id == FALLBACK_PARSE_ERROR {
                            summary.degraded += 1;
                        }
                        judgment
                    }
                    Err(err) => {
                        warn!(post_id = post.id, error = %err, "judge failed, leaving unjudged");
                        summary.failed += 1;
                        continue;
                    }
                },
            };

            metrics::record_judgment(judgment.label.as_str());
            if self.db.insert_judgment(post.id, &judgment)?.is_new() {
                summary.judged += 1;
            } else {
                summary.skipped += 1;
            }
        }

        info!(
            judged = summary.judged,
            excluded = summary.excluded_by_keyword,
            degraded = summary.degraded,
            failed = summary.failed,
            "judge run finished"
        );
        Ok(summary)
    }

    async fn judge_with_model(
        &self,
        post: &DbNormalizedPost,
        config: &ProjectConfig,
    ) -> Result<Judgment> {
        let request = build_judge_request(post, config);

        match self.gateway.complete_json::<Verdict>(&request).await {
            Ok((verdict, response)) => {
                let label = JudgmentLabel::parse(&verdict.label.to_lowercase())
                    .unwrap_or(JudgmentLabel::Maybe);
                Ok(Judgment {
                    label,
                    confidence: verdict.confidence.clamp(0.0, 1.0),
                    reasoning: verdict.reasoning,
                    model_id: config.models.judge_model.clone(),
                    latency_ms: response.latency_ms,
                })
            }
            // A reply we got but could not parse degrades to MAYBE so a
            // human still sees the post; anything else bubbles up.
            Err(ProviderError::MalformedResponse(detail)) => {
                debug!(post_id = post.id, %detail, "unparseable judge reply, degrading to maybe");
                Ok(Judgment {
                    label: JudgmentLabel::Maybe,
                    confidence: 0.3,
                    reasoning: format!("model reply could not be parsed: {detail}"),
                    model_id: FALLBACK_PARSE_ERROR.to_string(),
                    latency_ms: 0,
                })
            }
            Err(err) => Err(ReplyscoutError::Gateway(err.to_string())),
        }
    }
}

/// Keyword gates, in precedence order: an excluded keyword wins over
/// everything; then the required-keyword gate when one is configured.
fn keyword_gate(post: &DbNormalizedPost, config: &ProjectConfig) -> Option<Judgment> {
    let haystack = post.text_clean.to_lowercase();

    for keyword in &config.rubric.keywords_excluded {
        if haystack.contains(&keyword.to_lowercase()) {
            return Some(Judgment {
                label: JudgmentLabel::Irrelevant,
                confidence: 0.95,
                reasoning: format!("excluded keyword: {keyword}"),
                model_id: MODEL_KEYWORD_EXCLUDE.to_string(),
                latency_ms: 0,
            });
        }
    }

    if !config.rubric.keywords_required.is_empty() {
        let any_present = config
            .rubric
            .keywords_required
            .iter()
            .any(|k| haystack.contains(&k.to_lowercase()));
        if !any_present {
            return Some(Judgment {
                label: JudgmentLabel::Irrelevant,
                confidence: 0.70,
                reasoning: "no required keyword present".to_string(),
                model_id: MODEL_KEYWORD_REQUIRED.to_string(),
                latency_ms: 0,
            });
        }
    }

    None
}

/// Assemble the judge prompt from the project rubric and the post
fn build_judge_request(post: &DbNormalizedPost, config: &ProjectConfig) -> ChatRequest {
    let mut system = format!(
        "You judge whether social posts show buying intent for this product.\n\
         Product: {} - {}\n{}\n",
        config.name, config.description, config.rubric.system_prompt
    );
    if !config.rubric.positive_signals.is_empty() {
        system.push_str(&format!(
            "Positive signals: {}\n",
            config.rubric.positive_signals.join("; ")
        ));
    }
    if !config.rubric.negative_signals.is_empty() {
        system.push_str(&format!(
            "Negative signals: {}\n",
            config.rubric.negative_signals.join("; ")
        ));
    }
    system.push_str(
        "Answer with JSON only: {\"label\": \"relevant|irrelevant|maybe\", \
         \"confidence\": 0.0-1.0, \"reasoning\": \"...\"}",
    );

    let user = format!(
        "Author: @{} ({} followers{})\nPost: {}",
        post.author.username,
        post.author.followers,
        if post.author.verified { ", verified" } else { "" },
        post.text_clean,
    );

    ChatRequest::new(
        config.models.judge_model.clone(),
        vec![ChatMessage::system(system), ChatMessage::user(user)],
    )
    .with_temperature(0.0)
    .with_max_tokens(300)
}

// ---- offline classifier ----

/// Naive Bayes relevance classifier trained on human-corrected
/// judgments. Used when running without model access; refuses to run
/// untrained rather than guessing.
pub struct OfflineClassifier {
    stemmer: Stemmer,
    stopwords: Vec<String>,
    relevant_counts: HashMap<String, u32>,
    irrelevant_counts: HashMap<String, u32>,
    relevant_docs: u32,
    irrelevant_docs: u32,
}

impl OfflineClassifier {
    pub fn new() -> Self {
        Self {
            stemmer: Stemmer::create(Algorithm::English),
            stopwords: stop_words::get(stop_words::LANGUAGE::English),
            relevant_counts: HashMap::new(),
            irrelevant_counts: HashMap::new(),
            relevant_docs: 0,
            irrelevant_docs: 0,
        }
    }

    fn tokens(&self, text: &str) -> Vec<String> {
        text.to_lowercase()
            .split(|c: char| !c.is_alphanumeric())
            .filter(|t| t.len() > 2 && !self.stopwords.iter().any(|s| s == t))
            .map(|t| self.stemmer.stem(t).to_string())
            .collect()
    }

    /// Add one labeled example. MAYBE examples are ignored.
    pub fn train(&mut self, text: &str, label: JudgmentLabel) {
        let tokens = self.tokens(text);
        let counts = match label {
            JudgmentLabel::Relevant => {
                self.relevant_docs += 1;
                &mut self.relevant_counts
            }
            JudgmentLabel::Irrelevant => {
                self.irrelevant_docs += 1;
                &mut self.irrelevant_counts
            }
            JudgmentLabel::Maybe => return,
        };
        for token in tokens {
            *counts.entry(token).or_insert(0) += 1;
        }
    }

    #[must_use]
    pub fn is_trained(&self) -> bool {
        self.relevant_docs > 0 && self.irrelevant_docs > 0
    }

    /// Classify a post text. Errors when untrained.
    pub fn classify(&self, text: &str) -> Result<Judgment> {
        if !self.is_trained() {
            return Err(ReplyscoutError::InvalidConfig(
                "offline classifier has no training examples in both classes".to_string(),
            ));
        }

        let total_docs = (self.relevant_docs + self.irrelevant_docs) as f64;
        let vocab: std::collections::HashSet<&String> = self
            .relevant_counts
            .keys()
            .chain(self.irrelevant_counts.keys())
            .collect();
        let vocab_size = vocab.len().max(1) as f64;

        let relevant_total: u32 = self.relevant_counts.values().sum();
        let irrelevant_total: u32 = self.irrelevant_counts.values().sum();

        let mut log_relevant = (self.relevant_docs as f64 / total_docs).ln();
        let mut log_irrelevant = (self.irrelevant_docs as f64 / total_docs).ln();

        for token in self.tokens(text) {
            let rel = *self.relevant_counts.get(&token).unwrap_or(&0) as f64;
            let irr = *self.irrelevant_counts.get(&token).unwrap_or(&0) as f64;
            log_relevant += ((rel + 1.0) / (relevant_total as f64 + vocab_size)).ln();
            log_irrelevant += ((irr + 1.0) / (irrelevant_total as f64 + vocab_size)).ln();
        }

        // Convert the log-odds gap into a confidence; a narrow gap lands
        // in MAYBE territory.
        let gap = (log_relevant - log_irrelevant).abs();
        let confidence = (0.5 + gap / 10.0).min(0.9);
        let label = if gap < 0.5 {
            JudgmentLabel::Maybe
        } else if log_relevant > log_irrelevant {
            JudgmentLabel::Relevant
        } else {
            JudgmentLabel::Irrelevant
        };

        Ok(Judgment {
            label,
            confidence,
            reasoning: "offline classifier".to_string(),
            model_id: MODEL_OFFLINE.to_string(),
            latency_ms: 0,
        })
    }

    /// Build a classifier from the project's human-corrected judgments
    pub fn from_corrections(db: &Database, project_id: i64) -> Result<Self> {
        let mut classifier = Self::new();
        for (post, judgment) in db.corrected_judgments(project_id)? {
            if let Some(label) = judgment.human_label {
                classifier.train(&post.text_clean, label);
            }
        }
        Ok(classifier)
    }
}

impl Default for OfflineClassifier {
    fn default() -> Self {
        Self::new()
    }
}

/// Judge unjudged posts with the offline classifier only
pub fn run_offline(
    db: &Database,
    project_id: i64,
    config: &ProjectConfig,
    classifier: &OfflineClassifier,
) -> Result<JudgeSummary> {
    let mut summary = JudgeSummary::default();

    for post in db.get_unjudged_posts(project_id)? {
        let judgment = match keyword_gate(&post, config) {
            Some(judgment) => {
                summary.excluded_by_keyword += 1;
                judgment
            }
            None => classifier.classify(&post.text_clean)?,
        };
        metrics::record_judgment(judgment.label.as_str());
        if db.insert_judgment(post.id, &judgment)?.is_new() {
            summary.judged += 1;
        } else {
            summary.skipped += 1;
        }
    }

    info!(judged = summary.judged, "offline judge run finished");
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_offline_classifier_refuses_untrained() {
        let classifier = OfflineClassifier::new();
        assert!(classifier.classify("any text").is_err());
    }

    #[test]
    fn test_offline_classifier_learns_simple_split() {
        let mut classifier = OfflineClassifier::new();
        for text in [
            "looking for a code review tool recommendation",
            "anyone know a good code review tool for teams",
            "need better code review tooling",
        ] {
            classifier.train(text, JudgmentLabel::Relevant);
        }
        for text in [
            "we are hiring engineers for our platform team",
            "hiring a senior engineer, great benefits",
            "join our team, hiring now",
        ] {
            classifier.train(text, JudgmentLabel::Irrelevant);
        }

        let relevant = classifier
            .classify("can anyone recommend a code review tool")
            .unwrap();
        assert_eq!(relevant.label, JudgmentLabel::Relevant);

        let irrelevant = classifier.classify("we are hiring engineers").unwrap();
        assert_eq!(irrelevant.label, JudgmentLabel::Irrelevant);
    }
}
