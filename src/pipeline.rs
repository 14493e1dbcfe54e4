//! Pipeline orchestration: the stages in order, each one reading only
//! what the previous stage persisted. Any stage can be re-run; the
//! skip-if-done checks make the whole sequence idempotent.

use tracing::info;

use crate::cache::SeenCache;
use crate::collector::{CollectSummary, Collector};
use crate::config::ProjectConfig;
use crate::db::Database;
use crate::drafter::{DraftSummary, Drafter};
use crate::error::Result;
use crate::gateway::LlmGateway;
use crate::judge::{Judge, JudgeSummary};
use crate::logging::OperationTimer;
use crate::normalizer::{NormalizeSummary, Normalizer};
use crate::platform::SocialPlatform;
use crate::scorer::{ScoreSummary, Scorer};

/// Aggregate summary of one pipeline run (collect through draft;
/// sending stays behind the human approval gate)
#[derive(Debug, Default, Clone)]
pub struct RunSummary {
    pub collect: CollectSummary,
    pub normalize: NormalizeSummary,
    pub judge: JudgeSummary,
    pub score: ScoreSummary,
    pub draft: DraftSummary,
}

pub struct Pipeline<'a> {
    db: &'a Database,
    platform: &'a dyn SocialPlatform,
    gateway: &'a LlmGateway,
    cache: Option<&'a SeenCache>,
}

impl<'a> Pipeline<'a> {
    pub fn new(db: &'a Database, platform: &'a dyn SocialPlatform, gateway: &'a LlmGateway) -> Self {
        Self {
            db,
            platform,
            gateway,
            cache: None,
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: &'a SeenCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Run collect, normalize, judge, score, and draft in order
    pub async fn run(&self, project_id: i64, config: &ProjectConfig) -> Result<RunSummary> {
        let timer = OperationTimer::new("pipeline_run");
        let mut summary = RunSummary::default();

        let mut collector = Collector::new(self.db, self.platform);
        if let Some(cache) = self.cache {
            collector = collector.with_cache(cache);
        }
        summary.collect = collector.run(project_id, config, false).await?;

        summary.normalize = Normalizer::new(self.db)?.run(project_id, false)?;
        summary.judge = Judge::new(self.db, self.gateway).run(project_id, config).await?;
        summary.score = Scorer::new(self.db).run(project_id, config)?;
        summary.draft = Drafter::new(self.db, self.gateway).run(project_id, config).await?;

        info!(
            stored = summary.collect.stored,
            judged = summary.judge.judged,
            scored = summary.score.scored,
            drafted = summary.draft.drafted,
            "pipeline run complete"
        );
        timer.finish();
        Ok(summary)
    }
}
