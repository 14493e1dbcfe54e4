//! Collection stage: run each enabled query against the platform and
//! store whatever comes back, verbatim, with dedup.

use std::collections::HashMap;

use tracing::{debug, info, warn};

use crate::cache::SeenCache;
use crate::config::ProjectConfig;
use crate::db::Database;
use crate::error::Result;
use crate::metrics;
use crate::models::{AuditEntry, NewRawPost, PlatformPost};
use crate::platform::{SearchQuery, SocialPlatform};

/// Per-query counts from a collection run
#[derive(Debug, Default, Clone, Copy)]
pub struct QueryCounts {
    pub fetched: usize,
    pub stored: usize,
    pub duplicates: usize,
}

/// Counts reported by one collection run
#[derive(Debug, Default, Clone)]
pub struct CollectSummary {
    pub queries_run: usize,
    pub fetched: usize,
    pub stored: usize,
    pub duplicates: usize,
    pub failed_queries: usize,
    pub per_query: HashMap<String, QueryCounts>,
}

pub struct Collector<'a> {
    db: &'a Database,
    platform: &'a dyn SocialPlatform,
    cache: Option<&'a SeenCache>,
}

impl<'a> Collector<'a> {
    pub fn new(db: &'a Database, platform: &'a dyn SocialPlatform) -> Self {
        Self {
            db,
            platform,
            cache: None,
        }
    }

    /// Attach a seen-cache to skip posts without touching the database.
    /// The cache is an accelerant only; the unique constraint still
    /// guards correctness.
    #[must_use]
    pub fn with_cache(mut self, cache: &'a SeenCache) -> Self {
        self.cache = Some(cache);
        self
    }

    /// Run every enabled query for the project. A failing query is
    /// logged and counted; the rest of the run proceeds. With
    /// `dry_run`, fetch and dedup-check but persist nothing.
    pub async fn run(
        &self,
        project_id: i64,
        config: &ProjectConfig,
        dry_run: bool,
    ) -> Result<CollectSummary> {
        let mut summary = CollectSummary::default();

        for query in config.enabled_queries() {
            summary.queries_run += 1;
            let since_id = self.db.get_watermark(project_id, &query.label)?;

            let search = SearchQuery {
                query: query.query.clone(),
                label: query.label.clone(),
                since_id,
                max_results: query.max_results as u32,
            };

            let posts = match self.platform.search(&search).await {
                Ok(posts) => posts,
                Err(err) => {
                    warn!(query = %query.label, error = %err, "search failed, skipping query");
                    summary.failed_queries += 1;
                    summary.per_query.insert(query.label.clone(), QueryCounts::default());
                    if !dry_run {
                        self.db.append_audit(&AuditEntry::pipeline(
                            "collect",
                            "query",
                            &query.label,
                            serde_json::json!({ "error": err.to_string() }),
                        ))?;
                    }
                    continue;
                }
            };

            let mut counts = QueryCounts {
                fetched: posts.len(),
                ..QueryCounts::default()
            };
            debug!(query = %query.label, fetched = posts.len(), "search returned");

            let mut newest_id: Option<String> = None;
            for post in &posts {
                if newest_id.as_deref().map_or(true, |cur| id_newer(&post.id, cur)) {
                    newest_id = Some(post.id.clone());
                }

                if self.store_post(project_id, &query.label, post, dry_run)? {
                    counts.stored += 1;
                } else {
                    counts.duplicates += 1;
                }
            }

            // Advance the watermark only past what we actually saw
            if !dry_run {
                if let Some(newest) = newest_id {
                    self.db.set_watermark(project_id, &query.label, &newest)?;
                }
                self.db.append_audit(&AuditEntry::pipeline(
                    "collect",
                    "query",
                    &query.label,
                    serde_json::json!({
                        "fetched": counts.fetched,
                        "stored": counts.stored,
                        "duplicates": counts.duplicates,
                    }),
                ))?;
            }

            summary.fetched += counts.fetched;
            summary.stored += counts.stored;
            summary.duplicates += counts.duplicates;
            summary.per_query.insert(query.label.clone(), counts);
        }

        if !dry_run {
            metrics::record_collect(summary.stored as u64, summary.duplicates as u64);
        }

        info!(
            stored = summary.stored,
            duplicates = summary.duplicates,
            failed_queries = summary.failed_queries,
            dry_run,
            "collection run finished"
        );
        Ok(summary)
    }

    /// Returns true when the post was (or, in a dry run, would be)
    /// newly stored
    fn store_post(
        &self,
        project_id: i64,
        query_label: &str,
        post: &PlatformPost,
        dry_run: bool,
    ) -> Result<bool> {
        let platform = self.platform.name();

        // Cache hit short-circuits; a miss always falls through to the
        // authoritative database check
        if let Some(cache) = self.cache {
            if cache.contains(platform, &post.id, project_id)? {
                return Ok(false);
            }
        }

        if dry_run {
            return Ok(!self.db.raw_post_exists(platform, &post.id, project_id)?);
        }

        let new_post = NewRawPost {
            project_id,
            platform: platform.to_string(),
            platform_id: post.id.clone(),
            query_label: query_label.to_string(),
            payload: serde_json::to_string(post)?,
        };

        let outcome = self.db.insert_raw_post(&new_post)?;

        if let Some(cache) = self.cache {
            cache.mark_seen(platform, &post.id, project_id)?;
        }

        Ok(outcome.is_new())
    }
}

/// Compare platform post ids, numerically when both parse as integers.
/// Lexicographic order would put "99" after "100".
fn id_newer(candidate: &str, current: &str) -> bool {
    match (candidate.parse::<u64>(), current.parse::<u64>()) {
        (Ok(a), Ok(b)) => a > b,
        _ => candidate > current,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProjectConfig;
    use crate::models::{Author, Engagement, Entities};
    use crate::platform::MockPlatform;
    use chrono::Utc;

    fn post(id: &str, text: &str) -> PlatformPost {
        PlatformPost {
            id: id.to_string(),
            platform: "mock".to_string(),
            text: text.to_string(),
            author: Author {
                id: format!("a-{id}"),
                username: "poster".to_string(),
                display_name: "Poster".to_string(),
                followers: 10,
                verified: false,
                bio: None,
            },
            metrics: Engagement::default(),
            entities: Entities::default(),
            language: None,
            created_at: Utc::now().naive_utc(),
            reply_to_id: None,
            conversation_id: None,
        }
    }

    fn test_config() -> ProjectConfig {
        ProjectConfig::from_yaml_str(
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
rubric:
  system_prompt: judge it
"#,
        )
        .unwrap()
    }

    #[tokio::test]
    async fn test_dedup_across_runs() {
        let db = Database::in_memory().unwrap();
        let project = db.upsert_project("test", "Test", "hash").unwrap();
        let platform = MockPlatform::new(vec![
            post("10", "need a crm"),
            post("11", "which crm is best"),
        ]);

        let collector = Collector::new(&db, &platform);
        let config = test_config();

        let first = collector.run(project.id, &config, false).await.unwrap();
        assert_eq!(first.stored, 2);
        assert_eq!(first.duplicates, 0);
        assert_eq!(first.per_query["crm"].stored, 2);

        // Watermark advanced past both posts, so the second run fetches none
        let second = collector.run(project.id, &config, false).await.unwrap();
        assert_eq!(second.stored, 0);
        assert_eq!(second.fetched, 0);
    }

    #[tokio::test]
    async fn test_duplicate_insert_is_counted_not_fatal() {
        let db = Database::in_memory().unwrap();
        let project = db.upsert_project("test", "Test", "hash").unwrap();
        let platform = MockPlatform::new(vec![post("10", "need a crm")]);

        let collector = Collector::new(&db, &platform);
        let config = test_config();

        collector.run(project.id, &config, false).await.unwrap();

        // Reset the watermark to force re-fetching the same post
        db.set_watermark(project.id, "crm", "0").unwrap();
        let rerun = collector.run(project.id, &config, false).await.unwrap();
        assert_eq!(rerun.stored, 0);
        assert_eq!(rerun.duplicates, 1);
    }

    #[test]
    fn test_id_ordering_is_numeric_for_numeric_ids() {
        assert!(id_newer("100", "99"));
        assert!(!id_newer("99", "100"));
        assert!(id_newer("abc", "abb"));
    }

    #[tokio::test]
    async fn test_watermark_advances_to_numeric_newest() {
        let db = Database::in_memory().unwrap();
        let project = db.upsert_project("test", "Test", "hash").unwrap();
        let platform = MockPlatform::new(vec![
            post("99", "need a crm"),
            post("100", "which crm is best"),
        ]);

        Collector::new(&db, &platform)
            .run(project.id, &test_config(), false)
            .await
            .unwrap();

        let watermark = db.get_watermark(project.id, "crm").unwrap();
        assert_eq!(watermark.as_deref(), Some("100"));
    }

    #[tokio::test]
    async fn test_failed_query_leaves_audit_trail() {
        let db = Database::in_memory().unwrap();
        let project = db.upsert_project("test", "Test", "hash").unwrap();
        let platform = MockPlatform::new(vec![post("10", "need a crm")]);
        platform.fail_next_searches(1);

        let summary = Collector::new(&db, &platform)
            .run(project.id, &test_config(), false)
            .await
            .unwrap();

        assert_eq!(summary.failed_queries, 1);
        assert_eq!(db.count_audit_entries("collect").unwrap(), 1);
    }

    #[tokio::test]
    async fn test_dry_run_persists_nothing() {
        let db = Database::in_memory().unwrap();
        let project = db.upsert_project("test", "Test", "hash").unwrap();
        let platform = MockPlatform::new(vec![post("10", "need a crm")]);

        let collector = Collector::new(&db, &platform);
        let config = test_config();

        let preview = collector.run(project.id, &config, true).await.unwrap();
        assert_eq!(preview.stored, 1);

        // Nothing was written: the real run still stores the post
        assert!(db.get_watermark(project.id, "crm").unwrap().is_none());
        let real = collector.run(project.id, &config, false).await.unwrap();
        assert_eq!(real.stored, 1);
    }
}
