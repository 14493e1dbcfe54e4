use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing::info;

use replyscout::approval::ApprovalService;
use replyscout::cache::SeenCache;
use replyscout::collector::Collector;
use replyscout::config::{AppConfig, ProjectConfig};
use replyscout::db::Database;
use replyscout::drafter::Drafter;
use replyscout::gateway::{LlmGateway, RetryPolicy};
use replyscout::judge::{self, Judge, OfflineClassifier};
use replyscout::llm::{HttpProvider, Provider, ProviderRouter};
use replyscout::logging::init_logging;
use replyscout::models::JudgmentLabel;
use replyscout::normalizer::Normalizer;
use replyscout::outcomes::OutcomeTracker;
use replyscout::pipeline::Pipeline;
use replyscout::platform::ReplayPlatform;
use replyscout::ratelimit::RateLimiter;
use replyscout::scorer::Scorer;
use replyscout::sender::Sender;

#[derive(Parser)]
#[command(name = "replyscout", about = "Find buying-intent posts, draft replies, send after approval", version)]
struct Cli {
    /// Project configuration file
    #[arg(long, global = true, default_value = "project.yaml")]
    project: PathBuf,

    /// Replay posts file used as the platform search source
    #[arg(long, global = true, default_value = "posts.json")]
    posts: PathBuf,

    /// Outbox file replies are appended to
    #[arg(long, global = true, default_value = "outbox.jsonl")]
    outbox: PathBuf,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Register or update the project from its configuration file
    Init,
    /// Fetch posts for every enabled query
    Collect {
        /// Fetch and dedup-check without writing anything
        #[arg(long)]
        dry_run: bool,
    },
    /// Run collect, normalize, judge, score, and draft in order
    Run,
    /// Normalize collected posts
    Normalize,
    /// Judge normalized posts
    Judge {
        /// Use the offline classifier instead of an LLM provider
        #[arg(long)]
        offline: bool,
    },
    /// Score judged posts
    Score,
    /// Draft replies for qualifying posts
    Draft,
    /// Review queue operations
    #[command(subcommand)]
    Queue(QueueCommands),
    /// Correct a judgment by hand
    Correct {
        post_id: i64,
        /// relevant, irrelevant, or maybe
        #[arg(long)]
        label: String,
        #[arg(long)]
        reason: String,
        #[arg(long, default_value = "operator")]
        actor: String,
    },
    /// Send approved drafts under the rate limit
    Send,
    /// Record engagement outcomes for sent replies
    Track,
    /// Show pipeline row counts
    Stats,
}

#[derive(Subcommand)]
enum QueueCommands {
    /// List pending drafts with their context
    List,
    /// Approve a draft as generated
    Approve {
        draft_id: i64,
        #[arg(long, default_value = "operator")]
        actor: String,
    },
    /// Replace the text and approve
    Edit {
        draft_id: i64,
        #[arg(long)]
        text: String,
        #[arg(long, default_value = "operator")]
        actor: String,
    },
    /// Reject a draft
    Reject {
        draft_id: i64,
        #[arg(long)]
        reason: Option<String>,
        #[arg(long, default_value = "operator")]
        actor: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let app_config = AppConfig::load()?;
    let _log_guard = init_logging(&app_config.logging)?;

    let db = Database::new(&app_config.get_database_url())?;
    let project_config = ProjectConfig::from_yaml_file(&cli.project)
        .with_context(|| format!("loading project config {}", cli.project.display()))?;
    let project = db.upsert_project(
        &project_config.slug,
        &project_config.name,
        &project_config.content_hash(),
    )?;

    match cli.command {
        Commands::Init => {
            println!(
                "project '{}' registered (id {}, config {})",
                project.slug,
                project.id,
                &project.config_hash[..12]
            );
        }
        Commands::Collect { dry_run } => {
            let platform = ReplayPlatform::open(&cli.posts, &cli.outbox)?;
            let cache = SeenCache::open(&app_config.collector.cache_dir)?;
            let summary = Collector::new(&db, &platform)
                .with_cache(&cache)
                .run(project.id, &project_config, dry_run)
                .await?;
            cache.flush()?;
            println!(
                "collected: {} new, {} duplicates across {} queries{}",
                summary.stored,
                summary.duplicates,
                summary.queries_run,
                if dry_run { " (dry run)" } else { "" }
            );
        }
        Commands::Run => {
            let platform = ReplayPlatform::open(&cli.posts, &cli.outbox)?;
            let cache = SeenCache::open(&app_config.collector.cache_dir)?;
            let gateway = build_gateway(&app_config)?;
            let summary = Pipeline::new(&db, &platform, &gateway)
                .with_cache(&cache)
                .run(project.id, &project_config)
                .await?;
            cache.flush()?;
            println!(
                "run complete: {} collected, {} judged, {} scored, {} drafted",
                summary.collect.stored,
                summary.judge.judged,
                summary.score.scored,
                summary.draft.drafted
            );
            for (post_id, total) in &summary.score.high_scores {
                println!("  high score: post {post_id} at {total:.1}");
            }
        }
        Commands::Normalize => {
            let summary = Normalizer::new(&db)?.run(project.id, false)?;
            println!(
                "normalized: {} processed, {} malformed",
                summary.processed, summary.malformed
            );
        }
        Commands::Judge { offline } => {
            let summary = if offline {
                let classifier = OfflineClassifier::from_corrections(&db, project.id)?;
                judge::run_offline(&db, project.id, &project_config, &classifier)?
            } else {
                let gateway = build_gateway(&app_config)?;
                Judge::new(&db, &gateway).run(project.id, &project_config).await?
            };
            println!(
                "judged: {} new, {} keyword-excluded, {} degraded, {} failed",
                summary.judged, summary.excluded_by_keyword, summary.degraded, summary.failed
            );
        }
        Commands::Score => {
            let summary = Scorer::new(&db).run(project.id, &project_config)?;
            println!("scored: {} new", summary.scored);
            for (post_id, total) in &summary.high_scores {
                println!("  high score: post {post_id} at {total:.1}");
            }
        }
        Commands::Draft => {
            let gateway = build_gateway(&app_config)?;
            let summary = Drafter::new(&db, &gateway)
                .run(project.id, &project_config)
                .await?;
            println!(
                "drafted: {} new, {} failed, {} truncated",
                summary.drafted, summary.failed, summary.truncated
            );
        }
        Commands::Queue(queue) => {
            let service = ApprovalService::new(&db);
            match queue {
                QueueCommands::List => {
                    let items = service.queue(project.id)?;
                    if items.is_empty() {
                        println!("queue is empty");
                    }
                    for item in items {
                        let score = item.score.map_or_else(|| "-".to_string(), |s| format!("{:.1}", s.total));
                        println!(
                            "#{} [score {}] @{}: {}\n    draft: {}",
                            item.draft.id,
                            score,
                            item.post.author.username,
                            item.post.text_clean,
                            item.draft.outgoing_text()
                        );
                    }
                }
                QueueCommands::Approve { draft_id, actor } => {
                    service.approve(draft_id, &actor)?;
                    println!("draft {draft_id} approved");
                }
                QueueCommands::Edit { draft_id, text, actor } => {
                    service.edit_and_approve(draft_id, &text, &actor, &project_config)?;
                    println!("draft {draft_id} edited and approved");
                }
                QueueCommands::Reject { draft_id, reason, actor } => {
                    service.reject(draft_id, &actor, reason.as_deref())?;
                    println!("draft {draft_id} rejected");
                }
            }
        }
        Commands::Correct {
            post_id,
            label,
            reason,
            actor,
        } => {
            let label = JudgmentLabel::parse(&label)
                .ok_or_else(|| anyhow::anyhow!("label must be relevant, irrelevant, or maybe"))?;
            ApprovalService::new(&db).correct_judgment(post_id, label, &reason, &actor)?;
            println!("judgment for post {post_id} corrected to {}", label.as_str());
        }
        Commands::Send => {
            let platform = ReplayPlatform::open(&cli.posts, &cli.outbox)?;
            let limiter = RateLimiter::new(
                project_config.limits.max_sends_per_hour as u32,
                project_config.limits.max_sends_per_day as u32,
            );
            let summary = Sender::new(&db, &platform, &limiter).run(project.id).await?;
            println!(
                "sent: {}, failed: {}, deferred: {}",
                summary.sent, summary.failed, summary.deferred
            );
        }
        Commands::Track => {
            let platform = ReplayPlatform::open(&cli.posts, &cli.outbox)?;
            let summary = OutcomeTracker::new(&db, &platform).run(project.id).await?;
            println!(
                "tracked: {} checked, {} new outcomes",
                summary.checked, summary.recorded
            );
        }
        Commands::Stats => {
            let stats = db.pipeline_stats(project.id)?;
            println!("raw posts:        {}", stats.raw_posts);
            println!("normalized:       {}", stats.normalized_posts);
            println!("judgments:        {}", stats.judgments);
            println!("scores:           {}", stats.scores);
            println!("drafts:           {}", stats.drafts);
            println!("sent:             {}", stats.sent);
        }
    }

    Ok(())
}

/// Build the LLM gateway from whatever provider credentials are present
/// in the environment. Model ids select providers by prefix
/// ("openai/gpt-4o-mini", "openrouter/meta-llama/...").
fn build_gateway(config: &AppConfig) -> Result<LlmGateway> {
    let timeout = Duration::from_secs(config.llm.request_timeout_secs);
    let mut router = ProviderRouter::new();
    let mut registered = 0usize;

    if let Ok(key) = std::env::var("OPENAI_API_KEY") {
        let base = std::env::var("OPENAI_BASE_URL")
            .unwrap_or_else(|_| "https://api.openai.com/v1".to_string());
        let provider = Arc::new(HttpProvider::new("openai", base, key, timeout)?);
        router.register("openai", Arc::clone(&provider) as Arc<dyn Provider>);
        router.set_default(provider);
        registered += 1;
    }
    if let Ok(key) = std::env::var("OPENROUTER_API_KEY") {
        let provider = Arc::new(HttpProvider::new(
            "openrouter",
            "https://openrouter.ai/api/v1",
            key,
            timeout,
        )?);
        router.register("openrouter", provider);
        registered += 1;
    }

    if registered == 0 {
        info!("no provider credentials in environment; model calls will fail until one is set");
    }

    Ok(LlmGateway::new(
        router,
        RetryPolicy {
            max_retries: config.llm.max_retries,
            base_delay: Duration::from_secs(1),
        },
        config.llm.breaker_failure_threshold,
        Duration::from_secs(config.llm.breaker_recovery_secs),
    ))
}
