use anyhow::Result;
use config::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::Path;

/// Application configuration structure
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub logging: LoggingConfig,
    pub llm: LlmConfig,
    pub collector: CollectorConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub connection_timeout_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub file_path: Option<String>,
    pub format: String, // "json" or "text"
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    pub request_timeout_secs: u64,
    pub max_retries: u32,
    pub breaker_failure_threshold: u32,
    pub breaker_recovery_secs: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CollectorConfig {
    pub cache_dir: String,
    pub default_max_results: usize,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "data/replyscout.db".to_string(),
            max_connections: 10,
            connection_timeout_secs: 30,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            file_path: None,
            format: "text".to_string(),
        }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            request_timeout_secs: 60,
            max_retries: 3,
            breaker_failure_threshold: 5,
            breaker_recovery_secs: 60,
        }
    }
}

impl Default for CollectorConfig {
    fn default() -> Self {
        Self {
            cache_dir: ".seen_cache".to_string(),
            default_max_results: 50,
        }
    }
}

impl AppConfig {
    /// Load configuration from multiple sources with precedence:
    /// built-in defaults, then config files, then REPLYSCOUT_* env vars.
    pub fn load() -> Result<Self> {
        let config = Config::builder()
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name("config/local").required(false))
            .add_source(File::with_name("config").required(false))
            .add_source(Environment::with_prefix("REPLYSCOUT").separator("__"))
            .build()
            .map_err(|e| anyhow::anyhow!("Failed to load configuration: {}", e))?;

        let app_config: AppConfig = config
            .try_deserialize()
            .map_err(|e| anyhow::anyhow!("Failed to deserialize configuration: {}", e))?;

        app_config.validate()?;

        Ok(app_config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<()> {
        if self.database.max_connections == 0 {
            return Err(anyhow::anyhow!("max_connections must be greater than 0"));
        }
        if self.database.connection_timeout_secs == 0 {
            return Err(anyhow::anyhow!("connection_timeout_secs must be greater than 0"));
        }

        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log level: {}. Must be one of: {:?}",
                self.logging.level,
                valid_levels
            ));
        }

        let valid_formats = ["text", "json"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            return Err(anyhow::anyhow!(
                "Invalid log format: {}. Must be one of: {:?}",
                self.logging.format,
                valid_formats
            ));
        }

        if self.llm.request_timeout_secs == 0 {
            return Err(anyhow::anyhow!("request_timeout_secs must be greater than 0"));
        }
        if self.llm.breaker_failure_threshold == 0 {
            return Err(anyhow::anyhow!("breaker_failure_threshold must be greater than 0"));
        }
        if self.collector.default_max_results == 0 {
            return Err(anyhow::anyhow!("default_max_results must be greater than 0"));
        }

        Ok(())
    }

    /// Get database URL from environment or config
    pub fn get_database_url(&self) -> String {
        std::env::var("DATABASE_URL").unwrap_or_else(|_| self.database.url.clone())
    }

    /// Get log level from environment or config
    pub fn get_log_level(&self) -> String {
        std::env::var("RUST_LOG").unwrap_or_else(|_| self.logging.level.clone())
    }
}

/// A configured search query for lead collection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueryConfig {
    /// The platform search expression
    pub query: String,
    /// Stable label used for watermarks and audit entries
    pub label: String,
    /// Disabled queries are skipped without error
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Per-run result cap for this query
    #[serde(default = "default_max_results")]
    pub max_results: usize,
}

/// Ideal-customer-profile filters applied before judging
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct IcpConfig {
    /// Authors below this follower count are still judged but noted
    pub min_followers: i64,
    /// Acceptable language tags; empty means any
    pub languages: Vec<String>,
}

/// The relevance rubric driving the judge stage
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct RubricConfig {
    /// System prompt fragment describing what counts as a lead
    pub system_prompt: String,
    /// Signals that suggest buying intent
    pub positive_signals: Vec<String>,
    /// Signals that suggest noise
    pub negative_signals: Vec<String>,
    /// Text must contain at least one of these (case-insensitive); empty disables the gate
    pub keywords_required: Vec<String>,
    /// Text containing any of these is excluded outright
    pub keywords_excluded: Vec<String>,
}

/// Weights for the five score components. Designed to sum to 1.0 but
/// not required to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct ScoreWeights {
    pub relevance: f64,
    pub authority: f64,
    pub engagement: f64,
    pub recency: f64,
    pub intent: f64,
}

impl Default for ScoreWeights {
    fn default() -> Self {
        Self {
            relevance: 0.35,
            authority: 0.25,
            engagement: 0.15,
            recency: 0.15,
            intent: 0.10,
        }
    }
}

/// The voice profile used to generate drafts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PersonaConfig {
    pub name: String,
    pub role: String,
    pub tone: String,
    pub voice_notes: String,
    pub example_reply: String,
    /// Hard character limit for generated replies
    pub char_limit: usize,
}

impl Default for PersonaConfig {
    fn default() -> Self {
        Self {
            name: "Alex".to_string(),
            role: "founder".to_string(),
            tone: "friendly".to_string(),
            voice_notes: String::new(),
            example_reply: String::new(),
            char_limit: 240,
        }
    }
}

/// Outbound send limits enforced by the rate limiter
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(default)]
pub struct SendLimits {
    pub max_sends_per_hour: usize,
    pub max_sends_per_day: usize,
}

impl Default for SendLimits {
    fn default() -> Self {
        Self {
            max_sends_per_hour: 5,
            max_sends_per_day: 20,
        }
    }
}

/// Per-stage model selection
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ModelSelection {
    pub judge_model: String,
    pub draft_model: String,
}

impl Default for ModelSelection {
    fn default() -> Self {
        Self {
            judge_model: "openai/gpt-4o-mini".to_string(),
            draft_model: "openai/gpt-4o".to_string(),
        }
    }
}

/// A validated, immutable per-project configuration. The pipeline treats
/// this as a value object for the duration of a run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProjectConfig {
    /// Stable project identifier
    pub slug: String,
    /// Display name
    pub name: String,
    /// One-line description fed into judge prompts
    #[serde(default)]
    pub description: String,
    /// Search queries to collect from
    pub queries: Vec<QueryConfig>,
    #[serde(default)]
    pub icp: IcpConfig,
    #[serde(default)]
    pub rubric: RubricConfig,
    #[serde(default)]
    pub weights: ScoreWeights,
    #[serde(default)]
    pub persona: PersonaConfig,
    #[serde(default)]
    pub limits: SendLimits,
    #[serde(default)]
    pub models: ModelSelection,
    /// Minimum score a post needs before it is drafted
    #[serde(default = "default_min_score")]
    pub min_score_to_draft: f64,
    /// Maximum drafts generated per run (LLM spend bound)
    #[serde(default = "default_drafts_per_run")]
    pub drafts_per_run: usize,
    /// Scores at or above this emit a "new high score" event
    #[serde(default = "default_notify_threshold")]
    pub notify_threshold: f64,
    /// Bumped when weights change so old scores stay attributable
    #[serde(default = "default_formula_version")]
    pub formula_version: String,
}

fn default_true() -> bool {
    true
}

fn default_max_results() -> usize {
    50
}

fn default_min_score() -> f64 {
    60.0
}

fn default_drafts_per_run() -> usize {
    10
}

fn default_notify_threshold() -> f64 {
    80.0
}

fn default_formula_version() -> String {
    "v1".to_string()
}

impl ProjectConfig {
    /// Load and validate a project configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow::anyhow!("Failed to read project config {}: {}", path.display(), e))?;
        Self::from_yaml_str(&raw)
    }

    /// Parse and validate a project configuration from YAML text
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        let config: ProjectConfig = serde_yaml::from_str(raw)
            .map_err(|e| anyhow::anyhow!("Failed to parse project config: {}", e))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate configuration values. Failures here are fatal: a run with
    /// a broken project config would process the whole batch incorrectly.
    pub fn validate(&self) -> Result<()> {
        if self.slug.trim().is_empty() {
            return Err(anyhow::anyhow!("project slug cannot be empty"));
        }
        if self.name.trim().is_empty() {
            return Err(anyhow::anyhow!("project name cannot be empty"));
        }
        if self.queries.is_empty() {
            return Err(anyhow::anyhow!("project must define at least one query"));
        }
        for query in &self.queries {
            if query.query.trim().is_empty() {
                return Err(anyhow::anyhow!("query text cannot be empty (label: {})", query.label));
            }
            if query.label.trim().is_empty() {
                return Err(anyhow::anyhow!("query label cannot be empty (query: {})", query.query));
            }
            if query.max_results == 0 {
                return Err(anyhow::anyhow!("max_results must be greater than 0 (label: {})", query.label));
            }
        }
        let w = &self.weights;
        for (name, value) in [
            ("relevance", w.relevance),
            ("authority", w.authority),
            ("engagement", w.engagement),
            ("recency", w.recency),
            ("intent", w.intent),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(anyhow::anyhow!("weight {} must be in [0, 1], got {}", name, value));
            }
        }
        if self.persona.char_limit < 40 {
            return Err(anyhow::anyhow!("persona char_limit must be at least 40"));
        }
        if self.limits.max_sends_per_hour == 0 || self.limits.max_sends_per_day == 0 {
            return Err(anyhow::anyhow!("send limits must be greater than 0"));
        }
        if !(0.0..=100.0).contains(&self.min_score_to_draft) {
            return Err(anyhow::anyhow!("min_score_to_draft must be in [0, 100]"));
        }
        if self.drafts_per_run == 0 {
            return Err(anyhow::anyhow!("drafts_per_run must be greater than 0"));
        }
        Ok(())
    }

    /// Content hash of the configuration, used to detect changes between
    /// runs without diffing fields.
    #[must_use]
    pub fn content_hash(&self) -> String {
        // serde_json gives a stable field order for a struct
        let canonical = serde_json::to_string(self).unwrap_or_default();
        let digest = Sha256::digest(canonical.as_bytes());
        format!("{:x}", digest)
    }

    /// The queries the collector should actually run
    pub fn enabled_queries(&self) -> impl Iterator<Item = &QueryConfig> {
        self.queries.iter().filter(|q| q.enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn minimal_yaml() -> &'static str {
        r#"
slug: devtools
name: DevTools Inc
description: Code review tooling for teams
queries:
  - query: '"code review" tool'
    label: code-review
rubric:
  keywords_required: ["code review", "pull request"]
  keywords_excluded: ["hiring"]
"#
    }

    #[test]
    fn test_default_app_config() {
        let config = AppConfig::default();
        assert_eq!(config.database.url, "data/replyscout.db");
        assert_eq!(config.logging.level, "info");
        assert_eq!(config.llm.breaker_failure_threshold, 5);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_invalid_app_config() {
        let mut config = AppConfig::default();
        config.database.max_connections = 0;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_project_config_from_yaml() {
        let config = ProjectConfig::from_yaml_str(minimal_yaml()).expect("valid yaml");
        assert_eq!(config.slug, "devtools");
        assert_eq!(config.queries.len(), 1);
        assert!(config.queries[0].enabled);
        assert_eq!(config.persona.char_limit, 240);
        assert_eq!(config.weights.relevance, 0.35);
    }

    #[test]
    fn test_project_config_rejects_empty_queries() {
        let yaml = "slug: x\nname: X\nqueries: []\n";
        assert!(ProjectConfig::from_yaml_str(yaml).is_err());
    }

    #[test]
    fn test_content_hash_changes_with_config() {
        let a = ProjectConfig::from_yaml_str(minimal_yaml()).unwrap();
        let mut b = a.clone();
        assert_eq!(a.content_hash(), b.content_hash());
        b.min_score_to_draft = 70.0;
        assert_ne!(a.content_hash(), b.content_hash());
    }

    #[test]
    fn test_enabled_queries_filters_disabled() {
        let mut config = ProjectConfig::from_yaml_str(minimal_yaml()).unwrap();
        config.queries.push(QueryConfig {
            query: "alt".into(),
            label: "alt".into(),
            enabled: false,
            max_results: 10,
        });
        assert_eq!(config.enabled_queries().count(), 1);
    }
}
