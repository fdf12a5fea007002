use crate::error::ConfigError;
use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::Path;

// ============================================================================
// Top-level config
// ============================================================================

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct DatepulseConfig {
    pub store: StoreConfig,
    pub llm: LlmConfig,
    pub embedding: EmbeddingConfig,
    pub pipeline: PipelineConfig,
}

impl DatepulseConfig {
    /// Load config from a TOML file, falling back to defaults for missing fields.
    /// After loading, env var overrides are applied.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;
        let mut config: DatepulseConfig =
            toml::from_str(&content).with_context(|| "Failed to parse TOML config")?;
        config.apply_env_overrides();
        Ok(config)
    }

    /// Try to load from path; if file doesn't exist, return defaults with env overrides.
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> Self {
        match Self::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                tracing::info!("Config file not found or invalid ({}), using defaults", e);
                let mut cfg = Self::default();
                cfg.apply_env_overrides();
                cfg
            }
        }
    }

    /// Apply environment variable overrides on top of file-based config.
    /// Unparseable numeric values are ignored with a warning.
    fn apply_env_overrides(&mut self) {
        self.apply_overrides(|var| std::env::var(var).ok());
    }

    /// Apply overrides from any variable lookup, keyed by the env var names.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(v) = lookup("DATABASE_PATH") {
            self.store.db_path = v;
        }
        if let Some(v) = lookup("LLM_PROVIDER") {
            self.llm.provider = v;
        }
        if let Some(v) = lookup("LLM_MODEL") {
            self.llm.model = v;
        }
        if let Some(v) = lookup("LLM_BASE_URL") {
            self.llm.base_url = Some(v);
        }
        if let Some(v) = lookup("EMBEDDING_PROVIDER") {
            self.embedding.provider = v;
        }
        if let Some(v) = lookup("EMBEDDING_MODEL") {
            self.embedding.model = v;
        }
        if let Some(v) = lookup("EMBEDDING_BASE_URL") {
            self.embedding.base_url = Some(v);
        }
        override_parsed(&lookup, "MIN_CLUSTER_SIZE", &mut self.pipeline.min_cluster_size);
        override_parsed(&lookup, "SIMILARITY_THRESHOLD", &mut self.pipeline.similarity_threshold);
        override_parsed(&lookup, "MIN_GROWTH_SCORE", &mut self.pipeline.min_growth_score);
        override_parsed(
            &lookup,
            "CONTENT_LOOKBACK_DAYS",
            &mut self.pipeline.content_lookback_days,
        );
        if let Some(v) = lookup("CLUSTER_SHUFFLE_SEED") {
            match v.parse() {
                Ok(seed) => self.pipeline.shuffle_seed = Some(seed),
                Err(_) => tracing::warn!("Ignoring unparseable CLUSTER_SHUFFLE_SEED={}", v),
            }
        }
    }
}

fn override_parsed<F, T>(lookup: &F, var: &str, slot: &mut T)
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
{
    if let Some(v) = lookup(var) {
        match v.parse() {
            Ok(n) => *slot = n,
            Err(_) => tracing::warn!("Ignoring unparseable {}={}", var, v),
        }
    }
}

// ============================================================================
// Sub-configs
// ============================================================================

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub db_path: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: "datepulse.db".to_string(),
        }
    }
}

/// Text-generation service used by the labeler.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// "openai" (any OpenAI-compatible endpoint), "mock" or "none".
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub max_tokens: u32,
    pub temperature: f32,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "gpt-4o-mini".to_string(),
            base_url: None,
            max_tokens: 512,
            temperature: 0.3,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct EmbeddingConfig {
    /// "openai" or "mock".
    pub provider: String,
    pub model: String,
    pub base_url: Option<String>,
    pub batch_size: usize,
    /// Safety cap on items selected per run.
    pub max_items: usize,
    /// ~512 tokens at 4 chars/token.
    pub max_chars: usize,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            model: "text-embedding-3-small".to_string(),
            base_url: None,
            batch_size: 100,
            max_items: 10_000,
            max_chars: 2048,
        }
    }
}

/// Knobs for the analytics stages.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Candidates smaller than this are discarded after a clustering pass.
    pub min_cluster_size: usize,
    /// Minimum cosine similarity for an item to join an in-memory candidate.
    pub similarity_threshold: f32,
    /// Minimum centroid similarity for a candidate to be the same persisted cluster.
    pub same_cluster_threshold: f32,
    pub min_growth_score: f64,
    pub content_lookback_days: i64,
    pub association_threshold: f64,
    pub max_personas_per_cluster: usize,
    /// Minimum 7-day volume before a cluster can produce an opportunity.
    pub min_content_count: u32,
    /// A cluster needs a persona link at least this strong to produce an opportunity.
    pub min_opportunity_link_score: f64,
    pub min_content_chars: usize,
    pub english_ratio_threshold: f64,
    /// Member texts pulled for phrase extraction.
    pub label_sample_size: usize,
    /// Member texts sent to the text-generation service.
    pub llm_sample_size: usize,
    /// Pins the clustering shuffle. `None` draws from entropy.
    pub shuffle_seed: Option<u64>,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            min_cluster_size: 20,
            similarity_threshold: 0.65,
            same_cluster_threshold: 0.85,
            min_growth_score: 0.5,
            content_lookback_days: 30,
            association_threshold: 0.3,
            max_personas_per_cluster: 3,
            min_content_count: 20,
            min_opportunity_link_score: 0.5,
            min_content_chars: 15,
            english_ratio_threshold: 0.10,
            label_sample_size: 50,
            llm_sample_size: 20,
            shuffle_seed: None,
        }
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        let unit_knobs: [(&'static str, f64); 5] = [
            ("similarity_threshold", self.similarity_threshold as f64),
            ("same_cluster_threshold", self.same_cluster_threshold as f64),
            ("association_threshold", self.association_threshold),
            ("min_opportunity_link_score", self.min_opportunity_link_score),
            ("english_ratio_threshold", self.english_ratio_threshold),
        ];
        for (knob, value) in unit_knobs {
            if !(0.0..=1.0).contains(&value) {
                return Err(ConfigError::InvalidValue {
                    knob,
                    reason: format!("{} is outside [0, 1]", value),
                });
            }
        }
        if self.same_cluster_threshold < self.similarity_threshold {
            return Err(ConfigError::InvalidValue {
                knob: "same_cluster_threshold",
                reason: "must not be looser than similarity_threshold".to_string(),
            });
        }
        if self.min_cluster_size == 0 {
            return Err(ConfigError::InvalidValue {
                knob: "min_cluster_size",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.max_personas_per_cluster == 0 {
            return Err(ConfigError::InvalidValue {
                knob: "max_personas_per_cluster",
                reason: "must be at least 1".to_string(),
            });
        }
        if self.content_lookback_days <= 0 {
            return Err(ConfigError::InvalidValue {
                knob: "content_lookback_days",
                reason: "must be positive".to_string(),
            });
        }
        Ok(())
    }
}

// ============================================================================
// Tests
// ============================================================================
