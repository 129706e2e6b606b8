//! Configuration management for WikiDraft services
//!
//! Supports loading configuration from:
//! - Environment variables (prefixed with APP__)
//! - Configuration files (config/default.toml, config/{APP_ENV}.toml, config/local.toml)
//! - Default values

use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::PathBuf;
use std::time::Duration;

use crate::llm::PromptRef;

/// Main application configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct AppConfig {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Flat-file record stores
    #[serde(default)]
    pub storage: StorageConfig,

    /// External job client
    #[serde(default)]
    pub llm: LlmConfig,

    /// Prompt templates per stage
    #[serde(default)]
    pub prompts: PromptsConfig,

    /// Timeout, retry and sweep policy for external jobs
    #[serde(default)]
    pub jobs: JobsConfig,

    /// Observability configuration
    #[serde(default)]
    pub observability: ObservabilityConfig,

    /// Rate limiting configuration
    #[serde(default)]
    pub rate_limit: RateLimitConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    /// Host to bind to
    #[serde(default = "default_host")]
    pub host: String,

    /// Port to listen on
    #[serde(default = "default_port")]
    pub port: u16,

    /// Shutdown timeout in seconds
    #[serde(default = "default_shutdown_timeout")]
    pub shutdown_timeout_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StorageConfig {
    /// Directory holding one JSON-lines file per collection
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LlmConfig {
    /// Provider: openai, mock
    #[serde(default = "default_llm_provider")]
    pub provider: String,

    /// API key (falls back to OPENAI_API_KEY)
    pub api_key: Option<String>,

    /// API base URL (for proxies and compatible endpoints)
    pub api_base: Option<String>,

    /// Per-call HTTP timeout in seconds
    #[serde(default = "default_llm_timeout")]
    pub timeout_secs: u64,

    /// Retries for transient HTTP failures of a single call
    #[serde(default = "default_llm_retries")]
    pub max_retries: u32,
}

/// Research prompt for one section; `variable` names the section when its
/// content is fed to the article prompt
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct ResearchPrompt {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub variable: Option<String>,
}

impl ResearchPrompt {
    pub fn prompt_ref(&self) -> PromptRef {
        PromptRef::new(&self.id, &self.version)
    }
}

/// Writing prompt for one article section and the research sections it draws on
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct WritingPrompt {
    pub id: String,
    pub version: String,
    #[serde(default)]
    pub research: Vec<String>,
}

impl WritingPrompt {
    pub fn prompt_ref(&self) -> PromptRef {
        PromptRef::new(&self.id, &self.version)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct PromptsConfig {
    /// Named-entity extraction
    #[serde(default = "default_extraction_prompt")]
    pub extraction: PromptRef,

    /// Notability source research
    #[serde(default = "default_notability_prompt")]
    pub notability_research: PromptRef,

    /// Single-shot article draft
    #[serde(default = "default_article_prompt")]
    pub article_draft: PromptRef,

    /// category -> section -> prompt
    #[serde(default = "default_research_plans")]
    pub research: BTreeMap<String, BTreeMap<String, ResearchPrompt>>,

    /// category -> section -> prompt
    #[serde(default)]
    pub writing: BTreeMap<String, BTreeMap<String, WritingPrompt>>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct JobsConfig {
    /// Age after which a pending job counts as stale
    #[serde(default = "default_job_timeout")]
    pub timeout_secs: u64,

    /// Resubmissions allowed per sub-task before it fails
    #[serde(default = "default_job_retries")]
    pub max_retries: u32,

    /// Period of the background reconciliation sweep (0 disables)
    #[serde(default = "default_sweep_interval")]
    pub sweep_interval_secs: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ObservabilityConfig {
    /// Log level (debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default = "default_json_logging")]
    pub json_logging: bool,

    /// Metrics port (0 to disable)
    #[serde(default = "default_metrics_port")]
    pub metrics_port: u16,

    /// Service name for logs
    #[serde(default = "default_service_name")]
    pub service_name: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RateLimitConfig {
    /// Requests per second
    #[serde(default = "default_rate_limit")]
    pub requests_per_second: u32,

    /// Burst capacity
    #[serde(default = "default_burst")]
    pub burst: u32,

    /// Enable rate limiting
    #[serde(default = "default_enabled")]
    pub enabled: bool,
}

// Default value functions
fn default_host() -> String { "0.0.0.0".to_string() }
fn default_port() -> u16 { 8080 }
fn default_shutdown_timeout() -> u64 { 30 }
fn default_data_dir() -> PathBuf { PathBuf::from("data") }
fn default_llm_provider() -> String { "openai".to_string() }
fn default_llm_timeout() -> u64 { 60 }
fn default_llm_retries() -> u32 { 3 }
fn default_job_timeout() -> u64 { 600 }
fn default_job_retries() -> u32 { 2 }
fn default_sweep_interval() -> u64 { 60 }
fn default_log_level() -> String { "info".to_string() }
fn default_json_logging() -> bool { true }
fn default_metrics_port() -> u16 { 9090 }
fn default_service_name() -> String { "wikidraft".to_string() }
fn default_rate_limit() -> u32 { 50 }
fn default_burst() -> u32 { 100 }
fn default_enabled() -> bool { true }

fn default_extraction_prompt() -> PromptRef {
    PromptRef::new("pmpt_687e9a02edfc8193ab9fcc4cd3508f5c0fba5ac419ccbf53", "9")
}

pub(crate) fn default_notability_prompt() -> PromptRef {
    PromptRef::new("pmpt_687eaf8edda88194b8f2c14fa48e3a45059695391023684d", "8")
}

fn default_article_prompt() -> PromptRef {
    PromptRef::new("pmpt_688182dcd80081939d8bef19645b0a4d0ed9043fd95e9430", "5")
}

pub(crate) fn default_research_plans() -> BTreeMap<String, BTreeMap<String, ResearchPrompt>> {
    let section = |id: &str, version: &str, variable: &str| ResearchPrompt {
        id: id.to_string(),
        version: version.to_string(),
        variable: Some(variable.to_string()),
    };

    let mut vc = BTreeMap::new();
    vc.insert(
        "early_life".to_string(),
        section("pmpt_6881597633e08193a2ea8b886f8aa8990e7ece07212aea25", "7", "elac"),
    );
    vc.insert(
        "pre_vc_career".to_string(),
        section("pmpt_68816c05988c8193856a632187c8fe4d08d13066f2175710", "3", "pvcr"),
    );
    vc.insert(
        "vc_career".to_string(),
        section("pmpt_68816c254784819792b04926ab25312c0ae69cb869929a41", "3", "vcc"),
    );
    vc.insert(
        "notable_investments".to_string(),
        section("pmpt_68816c4c78fc8190858a214948b257940b4a7c7d059861df", "3", "ni"),
    );
    vc.insert(
        "personal_life".to_string(),
        section("pmpt_68816c6a82a8819687e1eeda14f1a9480ae9ac0c76914685", "3", "pl"),
    );

    let mut plans = BTreeMap::new();
    plans.insert("venture_capitalist".to_string(), vc);
    plans
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            shutdown_timeout_secs: default_shutdown_timeout(),
        }
    }
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self { data_dir: default_data_dir() }
    }
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: default_llm_provider(),
            api_key: None,
            api_base: None,
            timeout_secs: default_llm_timeout(),
            max_retries: default_llm_retries(),
        }
    }
}

impl Default for PromptsConfig {
    fn default() -> Self {
        Self {
            extraction: default_extraction_prompt(),
            notability_research: default_notability_prompt(),
            article_draft: default_article_prompt(),
            research: default_research_plans(),
            writing: BTreeMap::new(),
        }
    }
}

impl Default for JobsConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_job_timeout(),
            max_retries: default_job_retries(),
            sweep_interval_secs: default_sweep_interval(),
        }
    }
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logging: default_json_logging(),
            metrics_port: default_metrics_port(),
            service_name: default_service_name(),
        }
    }
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            requests_per_second: default_rate_limit(),
            burst: default_burst(),
            enabled: default_enabled(),
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            storage: StorageConfig::default(),
            llm: LlmConfig::default(),
            prompts: PromptsConfig::default(),
            jobs: JobsConfig::default(),
            observability: ObservabilityConfig::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

impl AppConfig {
    /// Load configuration from environment and files
    pub fn load() -> Result<Self, ConfigError> {
        let env = std::env::var("APP_ENV").unwrap_or_else(|_| "development".to_string());

        let config = Config::builder()
            // Load base config file
            .add_source(File::with_name("config/default").required(false))
            // Load environment-specific config
            .add_source(File::with_name(&format!("config/{}", env)).required(false))
            // Load local overrides
            .add_source(File::with_name("config/local").required(false))
            // e.g., APP__JOBS__TIMEOUT_SECS=900
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Load from a specific TOML file
    pub fn from_file(path: &str) -> Result<Self, ConfigError> {
        let config = Config::builder()
            .add_source(File::with_name(path))
            .add_source(
                Environment::with_prefix("APP")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?;

        config.try_deserialize()
    }

    /// Get shutdown timeout as Duration
    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.server.shutdown_timeout_secs)
    }

    /// Staleness window for pending external jobs
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.jobs.timeout_secs)
    }

    /// Sweep period, `None` when the sweep is disabled
    pub fn sweep_interval(&self) -> Option<Duration> {
        match self.jobs.sweep_interval_secs {
            0 => None,
            secs => Some(Duration::from_secs(secs)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AppConfig::default();
        assert_eq!(config.server.port, 8080);
        assert_eq!(config.jobs.timeout_secs, 600);
        assert_eq!(config.jobs.max_retries, 2);
        assert_eq!(config.job_timeout(), Duration::from_secs(600));
    }

    #[test]
    fn test_default_research_plan() {
        let config = AppConfig::default();
        let vc = &config.prompts.research["venture_capitalist"];
        assert_eq!(vc.len(), 5);
        assert_eq!(vc["early_life"].version, "7");
        assert_eq!(vc["personal_life"].variable.as_deref(), Some("pl"));
        assert!(config.prompts.writing.is_empty());
    }

    #[test]
    fn test_sweep_disabled() {
        let mut config = AppConfig::default();
        config.jobs.sweep_interval_secs = 0;
        assert!(config.sweep_interval().is_none());
    }

    #[test]
    fn test_partial_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("partial.toml");
        std::fs::write(
            &path,
            "[jobs]\ntimeout_secs = 900\n\n[llm]\nprovider = \"mock\"\n",
        )
        .unwrap();

        let config = AppConfig::from_file(path.to_str().unwrap()).unwrap();
        assert_eq!(config.jobs.timeout_secs, 900);
        assert_eq!(config.jobs.max_retries, 2);
        assert_eq!(config.llm.provider, "mock");
        assert_eq!(config.storage.data_dir, PathBuf::from("data"));
    }
}
