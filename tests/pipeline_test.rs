use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use replyscout::approval::ApprovalService;
use replyscout::config::ProjectConfig;
use replyscout::db::Database;
use replyscout::gateway::{LlmGateway, RetryPolicy};
use replyscout::llm::{ChatRequest, ChatResponse, Provider, ProviderError, ProviderRouter};
use replyscout::models::{Author, DraftStatus, Engagement, Entities, JudgmentLabel, PlatformPost};
use replyscout::pipeline::Pipeline;
use replyscout::platform::MockPlatform;
use replyscout::ratelimit::RateLimiter;
use replyscout::sender::Sender;

/// Provider that answers judge requests with a verdict and draft
/// requests with reply text, based on the system prompt.
struct ScriptedLlm {
    verdict: String,
}

#[async_trait]
impl Provider for ScriptedLlm {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: &ChatRequest) -> Result<ChatResponse, ProviderError> {
        let system = request
            .messages
            .first()
            .map(|m| m.content.as_str())
            .unwrap_or_default();
        let content = if system.contains("buying intent") {
            self.verdict.clone()
        } else {
            "Happy to help! We built something for exactly this.".to_string()
        };
        Ok(ChatResponse {
            content,
            model: request.model.clone(),
            latency_ms: 5,
        })
    }
}

fn gateway(verdict: &str) -> LlmGateway {
    let mut router = ProviderRouter::new();
    router.register(
        "scripted",
        Arc::new(ScriptedLlm {
            verdict: verdict.to_string(),
        }),
    );
    LlmGateway::new(
        router,
        RetryPolicy {
            max_retries: 1,
            base_delay: Duration::from_millis(1),
        },
        5,
        Duration::from_secs(60),
    )
}

fn project_yaml() -> &'static str {
    r#"
slug: devtools
name: DevTools
description: Code review tooling
queries:
  - query: code review
    label: code-review
rubric:
  system_prompt: A lead asks for code review tooling.
  keywords_excluded: ["hiring"]
persona:
  name: Sam
  role: founder
  tone: helpful
  char_limit: 240
models:
  judge_model: scripted/judge-model
  draft_model: scripted/draft-model
min_score_to_draft: 20
notify_threshold: 95
"#
}

fn post(id: &str, text: &str, followers: i64) -> PlatformPost {
    PlatformPost {
        id: id.to_string(),
        platform: "mock".to_string(),
        text: text.to_string(),
        author: Author {
            id: format!("a-{id}"),
            username: format!("user{id}"),
            display_name: "User".to_string(),
            followers,
            verified: false,
            bio: None,
        },
        metrics: Engagement {
            likes: 3,
            retweets: 0,
            replies: 1,
            views: 200,
        },
        entities: Entities::default(),
        language: None,
        created_at: Utc::now().naive_utc(),
        reply_to_id: None,
        conversation_id: None,
    }
}

#[tokio::test]
async fn test_happy_path_collect_to_send() {
    let db = Database::in_memory().unwrap();
    let config = ProjectConfig::from_yaml_str(project_yaml()).unwrap();
    let project = db
        .upsert_project(&config.slug, &config.name, &config.content_hash())
        .unwrap();

    let platform = MockPlatform::new(vec![
        post("100", "looking for a code review tool, any recommendations?", 800),
        post("101", "we are hiring, code review experience a plus", 50),
    ]);
    let gateway = gateway(r#"{"label": "relevant", "confidence": 0.9, "reasoning": "asking for a tool"}"#);

    let summary = Pipeline::new(&db, &platform, &gateway)
        .run(project.id, &config)
        .await
        .unwrap();

    assert_eq!(summary.collect.stored, 2);
    assert_eq!(summary.normalize.processed, 2);
    // One post hits the "hiring" exclusion, one goes to the model
    assert_eq!(summary.judge.judged, 2);
    assert_eq!(summary.judge.excluded_by_keyword, 1);
    // Only the relevant post is scored and drafted
    assert_eq!(summary.score.scored, 1);
    assert_eq!(summary.draft.drafted, 1);

    // Approve and send
    let service = ApprovalService::new(&db);
    let queue = service.queue(project.id).unwrap();
    assert_eq!(queue.len(), 1);
    let draft_id = queue[0].draft.id;
    service.approve(draft_id, "reviewer").unwrap();

    let limiter = RateLimiter::new(5, 20);
    let send = Sender::new(&db, &platform, &limiter).run(project.id).await.unwrap();
    assert_eq!(send.sent, 1);

    let draft = db.get_draft(draft_id).unwrap().unwrap();
    assert_eq!(draft.status, DraftStatus::Sent);
    // The reply targets the original platform post
    assert_eq!(platform.sent_replies()[0].0, "100");
}

#[tokio::test]
async fn test_rerun_is_idempotent() {
    let db = Database::in_memory().unwrap();
    let config = ProjectConfig::from_yaml_str(project_yaml()).unwrap();
    let project = db
        .upsert_project(&config.slug, &config.name, &config.content_hash())
        .unwrap();

    let platform = MockPlatform::new(vec![post(
        "100",
        "looking for a code review tool",
        500,
    )]);
    let gateway = gateway(r#"{"label": "relevant", "confidence": 0.8, "reasoning": "ok"}"#);
    let pipeline = Pipeline::new(&db, &platform, &gateway);

    let first = pipeline.run(project.id, &config).await.unwrap();
    assert_eq!(first.draft.drafted, 1);

    // Force the collector to re-see the same post, then run everything again
    db.set_watermark(project.id, "code-review", "0").unwrap();
    let second = pipeline.run(project.id, &config).await.unwrap();

    assert_eq!(second.collect.stored, 0);
    assert_eq!(second.collect.duplicates, 1);
    assert_eq!(second.normalize.processed, 0);
    assert_eq!(second.judge.judged, 0);
    assert_eq!(second.score.scored, 0);
    assert_eq!(second.draft.drafted, 0);

    let stats = db.pipeline_stats(project.id).unwrap();
    assert_eq!(stats.raw_posts, 1);
    assert_eq!(stats.judgments, 1);
    assert_eq!(stats.scores, 1);
    assert_eq!(stats.drafts, 1);
}

#[tokio::test]
async fn test_malformed_llm_reply_degrades_to_maybe() {
    let db = Database::in_memory().unwrap();
    let config = ProjectConfig::from_yaml_str(project_yaml()).unwrap();
    let project = db
        .upsert_project(&config.slug, &config.name, &config.content_hash())
        .unwrap();

    let platform = MockPlatform::new(vec![post(
        "100",
        "looking for a code review tool",
        500,
    )]);
    let gateway = gateway("I'm not sure how to answer that, sorry!");

    let summary = Pipeline::new(&db, &platform, &gateway)
        .run(project.id, &config)
        .await
        .unwrap();

    assert_eq!(summary.judge.judged, 1);
    assert_eq!(summary.judge.degraded, 1);

    // The post is tagged MAYBE with the fallback marker so a human can find it
    let queue_post = db.get_unjudged_posts(project.id).unwrap();
    assert!(queue_post.is_empty());
    let judgment = db.get_judgment(1).unwrap().unwrap();
    assert_eq!(judgment.label, JudgmentLabel::Maybe);
    assert_eq!(judgment.model_id, "fallback-parse-error");
    let stats = db.pipeline_stats(project.id).unwrap();
    assert_eq!(stats.judgments, 1);
}

#[tokio::test]
async fn test_human_correction_feeds_scoring() {
    let db = Database::in_memory().unwrap();
    let config = ProjectConfig::from_yaml_str(project_yaml()).unwrap();
    let project = db
        .upsert_project(&config.slug, &config.name, &config.content_hash())
        .unwrap();

    let platform = MockPlatform::new(vec![post(
        "100",
        "looking for a code review tool",
        500,
    )]);
    // Judge calls it irrelevant; no score is produced
    let gateway = gateway(r#"{"label": "irrelevant", "confidence": 0.8, "reasoning": "noise"}"#);
    let pipeline = Pipeline::new(&db, &platform, &gateway);

    let first = pipeline.run(project.id, &config).await.unwrap();
    assert_eq!(first.score.scored, 0);

    // A human overrides the verdict; the next scoring pass picks it up
    let post_id = db.pipeline_stats(project.id).unwrap();
    assert_eq!(post_id.normalized_posts, 1);
    let scorable_before = db.get_scorable_post_ids(project.id).unwrap();
    assert!(scorable_before.is_empty());

    let service = ApprovalService::new(&db);
    // post id 1 is the only normalized post
    service
        .correct_judgment(1, JudgmentLabel::Relevant, "clearly asking for us", "reviewer")
        .unwrap();

    let second = pipeline.run(project.id, &config).await.unwrap();
    assert_eq!(second.score.scored, 1);
    assert_eq!(second.draft.drafted, 1);
}
