//! Scorer stage: turn a judged post into one bounded number. Each
//! component is clamped to [0, 100] before weighting so no single
//! signal can dominate the total.

use tracing::{info, warn};

use crate::config::{ProjectConfig, ScoreWeights};
use crate::db::Database;
use crate::error::Result;
use crate::metrics;
use crate::models::{now_utc, AuditEntry, DbJudgment, DbNormalizedPost, ScoreComponents};

/// Follower count treated as full authority; counts above it saturate
const AUTHORITY_CEILING: f64 = 100_000.0;
/// Points every author starts from before the follower term
const AUTHORITY_BASELINE: f64 = 5.0;
/// Flat bonus for a verified author, applied before the clamp
const VERIFIED_BONUS: f64 = 15.0;
/// Recency decay shape; smaller means a steeper early drop-off
const RECENCY_DECAY_DAYS: f64 = 2.5;
/// Posts at or past this age score zero recency
const RECENCY_HORIZON_DAYS: f64 = 7.0;

// Per-metric engagement weights and caps; no single metric can buy
// more than its cap, and the caps sum to the component ceiling.
const LIKES_WEIGHT: f64 = 2.0;
const LIKES_CAP: f64 = 40.0;
const RETWEETS_WEIGHT: f64 = 3.0;
const RETWEETS_CAP: f64 = 30.0;
const REPLIES_WEIGHT: f64 = 1.5;
const REPLIES_CAP: f64 = 20.0;
const VIEWS_WEIGHT: f64 = 0.01;
const VIEWS_CAP: f64 = 10.0;

/// Phrases that signal the author is actively shopping
const SEARCH_PHRASES: &[(&str, f64)] = &[
    ("looking for", 30.0),
    ("any recommendations", 35.0),
    ("recommend", 25.0),
    ("alternative to", 30.0),
    ("alternatives to", 30.0),
    ("switching from", 30.0),
    ("anyone know", 20.0),
    ("any suggestions", 25.0),
    ("what do you use", 30.0),
    ("need a", 20.0),
    ("best tool", 25.0),
    ("how do you handle", 20.0),
];
const SEARCH_CAP: f64 = 50.0;

/// Phrases that express pain with the status quo
const PAIN_PHRASES: &[(&str, f64)] = &[
    ("frustrated", 15.0),
    ("frustrating", 15.0),
    ("takes forever", 15.0),
    ("take forever", 15.0),
    ("sick of", 15.0),
    ("tired of", 15.0),
    ("struggling with", 15.0),
    ("wasting time", 10.0),
    ("annoying", 10.0),
];
const PAIN_CAP: f64 = 25.0;

/// Phrases that signal an active vendor evaluation
const EVALUATION_PHRASES: &[(&str, f64)] = &[
    ("evaluating", 15.0),
    ("comparing", 15.0),
    ("comparison", 10.0),
    ("shortlist", 15.0),
    ("trialing", 10.0),
    ("pros and cons", 10.0),
    ("which is better", 15.0),
];
const EVALUATION_CAP: f64 = 20.0;

/// Bonus when the post asks a question at all
const QUESTION_BONUS: f64 = 10.0;

#[derive(Debug, Default, Clone)]
pub struct ScoreSummary {
    pub scored: usize,
    pub skipped: usize,
    /// (post_id, total) pairs at or above the notify threshold
    pub high_scores: Vec<(i64, f64)>,
}

pub struct Scorer<'a> {
    db: &'a Database,
}

impl<'a> Scorer<'a> {
    pub fn new(db: &'a Database) -> Self {
        Self { db }
    }

    /// Score every judged-relevant-or-maybe post without a score.
    /// Scores are write-once; an existing row is never recomputed.
    pub fn run(&self, project_id: i64, config: &ProjectConfig) -> Result<ScoreSummary> {
        let mut summary = ScoreSummary::default();

        for post_id in self.db.get_scorable_post_ids(project_id)? {
            let (post, judgment) = match (
                self.db.get_normalized_post(post_id)?,
                self.db.get_judgment(post_id)?,
            ) {
                (Some(post), Some(judgment)) => (post, judgment),
                _ => {
                    warn!(post_id, "scorable post vanished mid-run, skipping");
                    continue;
                }
            };

            let components = compute_components(&post, &judgment);
            let total = weighted_total(&components, &config.weights);

            if !self
                .db
                .insert_score(post_id, total, &components, &config.formula_version)?
                .is_new()
            {
                summary.skipped += 1;
                continue;
            }
            summary.scored += 1;
            metrics::record_score(total);

            if total >= config.notify_threshold {
                summary.high_scores.push((post_id, total));
                self.db.append_audit(&AuditEntry::pipeline(
                    "high_score",
                    "post",
                    post_id,
                    serde_json::json!({ "total": total }),
                ))?;
            }
        }

        info!(
            scored = summary.scored,
            high = summary.high_scores.len(),
            "score run finished"
        );
        Ok(summary)
    }
}

/// Compute the five components, each clamped to [0, 100]
pub fn compute_components(post: &DbNormalizedPost, judgment: &DbJudgment) -> ScoreComponents {
    ScoreComponents {
        relevance: relevance_component(judgment),
        authority: authority_component(post),
        engagement: engagement_component(post),
        recency: recency_component(post),
        intent: intent_component(post),
    }
}

/// Weighted sum of the components, clamped to [0, 100]
pub fn weighted_total(components: &ScoreComponents, weights: &ScoreWeights) -> f64 {
    let total = components.relevance * weights.relevance
        + components.authority * weights.authority
        + components.engagement * weights.engagement
        + components.recency * weights.recency
        + components.intent * weights.intent;
    total.clamp(0.0, 100.0)
}

/// Judge confidence scaled by the label multiplier. The human override
/// label wins when present.
fn relevance_component(judgment: &DbJudgment) -> f64 {
    let value = judgment.confidence.clamp(0.0, 1.0) * judgment.effective_label().multiplier() * 100.0;
    value.clamp(0.0, 100.0)
}

/// Log-scale follower count, saturating at the ceiling, plus a small
/// baseline so an unknown author is not worth literally nothing
fn authority_component(post: &DbNormalizedPost) -> f64 {
    let followers = (post.author.followers.max(0) as f64).min(AUTHORITY_CEILING);
    let scale =
        ((1.0 + followers).ln() / (1.0 + AUTHORITY_CEILING).ln()) * (100.0 - AUTHORITY_BASELINE);
    let bonus = if post.author.verified { VERIFIED_BONUS } else { 0.0 };
    (AUTHORITY_BASELINE + scale + bonus).clamp(0.0, 100.0)
}

fn metric_contribution(count: i64, weight: f64, cap: f64) -> f64 {
    (count.max(0) as f64 * weight).min(cap)
}

/// Weighted engagement counts, each metric capped individually so one
/// viral number can't saturate the component on its own
fn engagement_component(post: &DbNormalizedPost) -> f64 {
    let e = &post.engagement;
    let raw = metric_contribution(e.likes, LIKES_WEIGHT, LIKES_CAP)
        + metric_contribution(e.retweets, RETWEETS_WEIGHT, RETWEETS_CAP)
        + metric_contribution(e.replies, REPLIES_WEIGHT, REPLIES_CAP)
        + metric_contribution(e.views, VIEWS_WEIGHT, VIEWS_CAP);
    raw.clamp(0.0, 100.0)
}

/// Exponential-shaped decay from 100 at age zero to exactly 0 at the
/// horizon; future-dated timestamps count as age zero
fn recency_component(post: &DbNormalizedPost) -> f64 {
    let age = now_utc().signed_duration_since(post.posted_at);
    let age_days = (age.num_minutes().max(0) as f64) / (60.0 * 24.0);
    if age_days >= RECENCY_HORIZON_DAYS {
        return 0.0;
    }
    let floor = (-RECENCY_HORIZON_DAYS / RECENCY_DECAY_DAYS).exp();
    let shape = (-age_days / RECENCY_DECAY_DAYS).exp();
    (100.0 * (shape - floor) / (1.0 - floor)).clamp(0.0, 100.0)
}

fn phrase_bonus(haystack: &str, phrases: &[(&str, f64)], cap: f64) -> f64 {
    phrases
        .iter()
        .filter(|(phrase, _)| haystack.contains(phrase))
        .map(|(_, bonus)| bonus)
        .sum::<f64>()
        .min(cap)
}

/// Additive bonuses for question marks, active-search phrases, pain
/// expressions, and evaluation language, each category capped
fn intent_component(post: &DbNormalizedPost) -> f64 {
    let haystack = post.text_clean.to_lowercase();
    let mut raw = phrase_bonus(&haystack, SEARCH_PHRASES, SEARCH_CAP)
        + phrase_bonus(&haystack, PAIN_PHRASES, PAIN_CAP)
        + phrase_bonus(&haystack, EVALUATION_PHRASES, EVALUATION_CAP);
    if haystack.contains('?') {
        raw += QUESTION_BONUS;
    }
    raw.clamp(0.0, 100.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Author, Engagement, Entities, JudgmentLabel};
    use proptest::prelude::*;

    fn post_fixture(followers: i64, verified: bool, likes: i64, age_days: i64, text: &str) -> DbNormalizedPost {
        DbNormalizedPost {
            id: 1,
            raw_post_id: 1,
            project_id: 1,
            author: Author {
                id: "a".into(),
                username: "user".into(),
                display_name: "User".into(),
                followers,
                verified,
                bio: None,
            },
            text_original: text.to_string(),
            text_clean: text.to_string(),
            language: Some("eng".into()),
            posted_at: now_utc() - chrono::Duration::days(age_days),
            engagement: Engagement {
                likes,
                retweets: 0,
                replies: 0,
                views: 0,
            },
            entities: Entities::default(),
            reply_to_id: None,
            conversation_id: None,
            normalized_at: now_utc(),
        }
    }

    fn judgment_fixture(label: JudgmentLabel, confidence: f64) -> DbJudgment {
        DbJudgment {
            id: 1,
            post_id: 1,
            label,
            confidence,
            reasoning: "test".into(),
            model_id: "test".into(),
            latency_ms: 0,
            human_label: None,
            corrected_at: None,
            correction_reason: None,
            judged_at: now_utc(),
        }
    }

    #[test]
    fn test_relevance_uses_label_multiplier() {
        let relevant = relevance_component(&judgment_fixture(JudgmentLabel::Relevant, 0.8));
        let maybe = relevance_component(&judgment_fixture(JudgmentLabel::Maybe, 0.8));
        assert!((relevant - 80.0).abs() < 1e-9);
        assert!((maybe - 24.0).abs() < 1e-9);
    }

    #[test]
    fn test_relevance_honors_human_override() {
        let mut judgment = judgment_fixture(JudgmentLabel::Irrelevant, 0.9);
        assert_eq!(relevance_component(&judgment), 0.0);
        judgment.human_label = Some(JudgmentLabel::Relevant);
        assert!((relevance_component(&judgment) - 90.0).abs() < 1e-9);
    }

    #[test]
    fn test_authority_is_log_scaled() {
        let small = authority_component(&post_fixture(100, false, 0, 0, "x"));
        let medium = authority_component(&post_fixture(1_000, false, 0, 0, "x"));
        let large = authority_component(&post_fixture(100_000, false, 0, 0, "x"));
        assert!(small < medium && medium < large);
        // Tenfold growth at the bottom outweighs doubling at the top
        let big_gap = medium - small;
        let small_gap = large - authority_component(&post_fixture(50_000, false, 0, 0, "x"));
        assert!(big_gap > small_gap);
    }

    #[test]
    fn test_authority_saturates_at_ceiling() {
        let at = authority_component(&post_fixture(100_000, false, 0, 0, "x"));
        let past = authority_component(&post_fixture(5_000_000, false, 0, 0, "x"));
        assert!((at - past).abs() < 1e-9);
        // Negative counts collapse to the baseline
        let negative = authority_component(&post_fixture(-5, false, 0, 0, "x"));
        assert!((negative - AUTHORITY_BASELINE).abs() < 1e-9);
    }

    #[test]
    fn test_engagement_single_metric_cannot_saturate() {
        let likes_only = engagement_component(&post_fixture(0, false, 60, 0, "x"));
        assert!((likes_only - LIKES_CAP).abs() < 1e-9);

        // Broad engagement across metrics beats one runaway number
        let mut broad = post_fixture(0, false, 60, 0, "x");
        broad.engagement.retweets = 20;
        broad.engagement.replies = 20;
        broad.engagement.views = 5_000;
        assert!(engagement_component(&broad) > likes_only);
    }

    #[test]
    fn test_recency_zero_at_and_past_horizon() {
        assert!(recency_component(&post_fixture(0, false, 0, 6, "x")) > 0.0);
        assert_eq!(recency_component(&post_fixture(0, false, 0, 7, "x")), 0.0);
        assert_eq!(recency_component(&post_fixture(0, false, 0, 8, "x")), 0.0);
    }

    #[test]
    fn test_recency_decays() {
        let fresh = recency_component(&post_fixture(0, false, 0, 0, "x"));
        let week_old = recency_component(&post_fixture(0, false, 0, 7, "x"));
        let month_old = recency_component(&post_fixture(0, false, 0, 30, "x"));
        assert!(fresh > 95.0);
        assert!(week_old < 40.0);
        assert!(month_old < 5.0);
    }

    #[test]
    fn test_intent_phrase_bonus() {
        let with = intent_component(&post_fixture(0, false, 0, 0, "looking for a crm, any recommendations?"));
        let without = intent_component(&post_fixture(0, false, 0, 0, "just shipped a feature"));
        assert!(with > 0.0);
        assert_eq!(without, 0.0);
    }

    #[test]
    fn test_intent_covers_question_pain_and_evaluation() {
        let question = intent_component(&post_fixture(0, false, 0, 0, "is there a tool for this?"));
        let pain = intent_component(&post_fixture(0, false, 0, 0, "so frustrated, deploys take forever"));
        let eval = intent_component(&post_fixture(0, false, 0, 0, "we are evaluating and comparing vendors"));
        assert!((question - QUESTION_BONUS).abs() < 1e-9);
        assert!(pain > 0.0);
        assert!(eval > 0.0);

        let combined = intent_component(&post_fixture(
            0,
            false,
            0,
            0,
            "So frustrated, deploys take forever. We are evaluating and comparing vendors?",
        ));
        assert!(combined > pain && combined > eval);
        // Stacked hits within one category stay under its cap
        let piled_pain = intent_component(&post_fixture(
            0,
            false,
            0,
            0,
            "frustrated and sick of this, tired of it, builds take forever, so annoying",
        ));
        assert!(piled_pain <= PAIN_CAP + 1e-9);
    }

    proptest! {
        #[test]
        fn prop_components_and_total_bounded(
            followers in -10i64..10_000_000,
            verified in any::<bool>(),
            likes in -10i64..10_000_000,
            age_days in 0i64..3650,
            confidence in -2.0f64..3.0,
        ) {
            let post = post_fixture(followers, verified, likes, age_days, "looking for recommend need a best tool");
            let judgment = judgment_fixture(JudgmentLabel::Relevant, confidence);
            let components = compute_components(&post, &judgment);

            for value in [
                components.relevance,
                components.authority,
                components.engagement,
                components.recency,
                components.intent,
            ] {
                prop_assert!((0.0..=100.0).contains(&value));
            }

            let total = weighted_total(&components, &ScoreWeights::default());
            prop_assert!((0.0..=100.0).contains(&total));
        }
    }
}
