//! Stage orchestration.
//!
//! Stages run strictly one after another because each reads what the
//! previous one persisted. A failing stage is reported and the rest still run.

use crate::cleaner::{CleanSummary, ContentCleaner};
use crate::clustering::{ClusterSummary, ClusteringEngine};
use crate::embedder::{EmbedSummary, EmbeddingGenerator};
use crate::labeler::{ClusterLabeler, LabelSummary};
use crate::opportunities::{OpportunityGenerator, OpportunitySummary};
use crate::persona_mapper::{MappingSummary, PersonaMapper};
use anyhow::Result;
use datepulse_core::{DatepulseConfig, Store};
use datepulse_reasoning::{CompletionParams, EmbeddingClient, LlmClient};
use serde::Serialize;
use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum Stage {
    Clean,
    Embed,
    Cluster,
    Label,
    MapPersonas,
    Opportunities,
}

impl Stage {
    pub const ALL: [Stage; 6] = [
        Stage::Clean,
        Stage::Embed,
        Stage::Cluster,
        Stage::Label,
        Stage::MapPersonas,
        Stage::Opportunities,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Stage::Clean => "clean",
            Stage::Embed => "embed",
            Stage::Cluster => "cluster",
            Stage::Label => "label",
            Stage::MapPersonas => "map-personas",
            Stage::Opportunities => "opportunities",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Stage {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Stage::ALL
            .into_iter()
            .find(|stage| stage.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| anyhow::anyhow!("Unknown stage: {}", s))
    }
}

/// Counters returned by whichever stage ran.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum StageSummary {
    Clean(CleanSummary),
    Embed(EmbedSummary),
    Cluster(ClusterSummary),
    Label(LabelSummary),
    MapPersonas(MappingSummary),
    Opportunities(OpportunitySummary),
}

impl fmt::Display for StageSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageSummary::Clean(s) => write!(
                f,
                "processed {}, kept {}, filtered {}",
                s.processed, s.kept, s.filtered
            ),
            StageSummary::Embed(s) => write!(
                f,
                "processed {}, embedded {}, failed batches {}",
                s.processed, s.embedded, s.failed_batches
            ),
            StageSummary::Cluster(s) => write!(
                f,
                "created {}, updated {}, assigned {}, discarded {}",
                s.clusters_created, s.clusters_updated, s.items_assigned, s.candidates_discarded
            ),
            StageSummary::Label(s) => write!(
                f,
                "labeled {} (llm {}, heuristic {})",
                s.labeled, s.llm_labels, s.heuristic_labels
            ),
            StageSummary::MapPersonas(s) => write!(
                f,
                "clusters {}, links {}",
                s.clusters_mapped, s.links_created
            ),
            StageSummary::Opportunities(s) => write!(
                f,
                "created {}, updated {}, skipped {}",
                s.created, s.updated, s.skipped
            ),
        }
    }
}

#[derive(Debug)]
pub struct StageReport {
    pub stage: Stage,
    /// Error text rather than the error itself, so reports can be kept and printed.
    pub outcome: Result<StageSummary, String>,
    pub duration: Duration,
}

impl StageReport {
    pub fn succeeded(&self) -> bool {
        self.outcome.is_ok()
    }
}

pub fn all_succeeded(reports: &[StageReport]) -> bool {
    reports.iter().all(StageReport::succeeded)
}

/// One row per stage: status mark, name, duration, detail.
pub fn render_table(reports: &[StageReport]) -> String {
    let mut out = String::new();
    out.push_str(&format!("{:<4}{:<16}{:>10}  {}\n", "", "STAGE", "DURATION", "DETAIL"));
    for report in reports {
        let (mark, detail) = match &report.outcome {
            Ok(summary) => ("✅", summary.to_string()),
            Err(message) => ("❌", message.clone()),
        };
        out.push_str(&format!(
            "{:<4}{:<16}{:>9.2}s  {}\n",
            mark,
            report.stage.as_str(),
            report.duration.as_secs_f64(),
            detail
        ));
    }
    let failed = reports.iter().filter(|r| !r.succeeded()).count();
    if failed == 0 {
        out.push_str(&format!("All {} stages succeeded.\n", reports.len()));
    } else {
        out.push_str(&format!("{} of {} stages failed.\n", failed, reports.len()));
    }
    out
}

pub struct PipelineRunner {
    store: Arc<dyn Store>,
    config: DatepulseConfig,
    embedder: Option<Arc<dyn EmbeddingClient>>,
    llm: Option<Arc<dyn LlmClient>>,
}

impl PipelineRunner {
    pub fn new(store: Arc<dyn Store>, config: DatepulseConfig) -> Self {
        Self {
            store,
            config,
            embedder: None,
            llm: None,
        }
    }

    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingClient>) -> Self {
        self.embedder = Some(embedder);
        self
    }

    /// Without a text-generation client the labeler uses its heuristic.
    pub fn with_llm(mut self, llm: Option<Arc<dyn LlmClient>>) -> Self {
        self.llm = llm;
        self
    }

    pub async fn run_stage(&self, stage: Stage) -> Result<StageSummary> {
        let pipeline = &self.config.pipeline;
        let summary = match stage {
            Stage::Clean => StageSummary::Clean(
                ContentCleaner::new(self.store.clone(), pipeline)
                    .run()
                    .await?,
            ),
            Stage::Embed => {
                let Some(client) = self.embedder.clone() else {
                    anyhow::bail!("No embedding provider configured");
                };
                StageSummary::Embed(
                    EmbeddingGenerator::new(
                        self.store.clone(),
                        client,
                        self.config.embedding.clone(),
                        pipeline.content_lookback_days,
                    )
                    .run()
                    .await?,
                )
            }
            Stage::Cluster => StageSummary::Cluster(
                ClusteringEngine::new(self.store.clone(), pipeline.clone())
                    .run()
                    .await?,
            ),
            Stage::Label => {
                let params = CompletionParams {
                    max_tokens: self.config.llm.max_tokens,
                    temperature: self.config.llm.temperature,
                    json_mode: true,
                };
                StageSummary::Label(
                    ClusterLabeler::new(self.store.clone(), self.llm.clone(), pipeline.clone())
                        .with_params(params)
                        .run()
                        .await?,
                )
            }
            Stage::MapPersonas => StageSummary::MapPersonas(
                PersonaMapper::new(self.store.clone(), pipeline)
                    .run()
                    .await?,
            ),
            Stage::Opportunities => StageSummary::Opportunities(
                OpportunityGenerator::new(self.store.clone(), pipeline.clone())
                    .run()
                    .await?,
            ),
        };
        Ok(summary)
    }

    /// Run `stages` in order. Never stops early.
    pub async fn run_stages(&self, stages: &[Stage]) -> Vec<StageReport> {
        let mut reports = Vec::with_capacity(stages.len());
        for &stage in stages {
            tracing::info!(%stage, "Starting stage");
            let started = Instant::now();
            let outcome = self
                .run_stage(stage)
                .await
                .map_err(|e| format!("{:#}", e));
            let duration = started.elapsed();
            match &outcome {
                Ok(summary) => tracing::info!(%stage, elapsed_ms = duration.as_millis() as u64, "{}", summary),
                Err(message) => tracing::error!(%stage, "Stage failed: {}", message),
            }
            reports.push(StageReport {
                stage,
                outcome,
                duration,
            });
        }
        reports
    }

    pub async fn run_all(&self) -> Vec<StageReport> {
        self.run_stages(&Stage::ALL).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datepulse_store::MemoryStore;

    #[test]
    fn test_stage_names_round_trip() {
        for stage in Stage::ALL {
            assert_eq!(stage.as_str().parse::<Stage>().unwrap(), stage);
        }
        assert!("bogus".parse::<Stage>().is_err());
    }

    #[tokio::test]
    async fn test_missing_embedder_fails_only_that_stage() {
        let runner = PipelineRunner::new(Arc::new(MemoryStore::new()), DatepulseConfig::default());
        let reports = runner.run_all().await;

        assert_eq!(reports.len(), 6);
        assert!(!all_succeeded(&reports));
        let failed: Vec<Stage> = reports
            .iter()
            .filter(|r| !r.succeeded())
            .map(|r| r.stage)
            .collect();
        assert_eq!(failed, vec![Stage::Embed]);

        let table = render_table(&reports);
        assert!(table.contains("❌"));
        assert!(table.contains("No embedding provider configured"));
        assert!(table.contains("1 of 6 stages failed."));
    }
}
