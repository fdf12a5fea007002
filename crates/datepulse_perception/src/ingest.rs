use crate::source::Source;
use anyhow::Result;
use datepulse_core::{IngestionRun, Language, Store};
use futures::future::join_all;
use std::sync::Arc;

/// Pulls from sources into the store, one tracked run per source.
pub struct Ingestor {
    store: Arc<dyn Store>,
}

impl Ingestor {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Fetch one source and insert whatever is new.
    ///
    /// The returned run is already persisted. A fetch failure is recorded on
    /// the run (status `failed`) rather than returned as an error; only a
    /// store failure while writing the run record itself propagates.
    #[tracing::instrument(skip(self, source), fields(source = source.name()))]
    pub async fn run(&self, source: &dyn Source) -> Result<IngestionRun> {
        let mut run = IngestionRun::start(source.name());
        self.store.record_run(&run).await?;

        let items = match source.fetch().await {
            Ok(items) => items,
            Err(e) => {
                tracing::error!("Ingestion from {} failed: {:#}", source.name(), e);
                run.fail(format!("{:#}", e));
                self.store.record_run(&run).await?;
                return Ok(run);
            }
        };

        let mut ingested = 0u32;
        for mut item in items.iter().cloned() {
            item.language = Language::Unknown;
            item.embedding = None;
            match self.store.insert_content(&item).await {
                Ok(true) => ingested += 1,
                Ok(false) => {}
                Err(e) => tracing::warn!(source_id = %item.source_id, "Failed to store item: {:#}", e),
            }
        }

        run.complete(items.len() as u32, ingested);
        self.store.record_run(&run).await?;
        tracing::info!(
            processed = run.items_processed,
            ingested = run.items_ingested,
            "Ingestion complete"
        );
        Ok(run)
    }

    /// Run every source; fetches proceed concurrently.
    pub async fn run_all(&self, sources: &[Arc<dyn Source>]) -> Vec<Result<IngestionRun>> {
        join_all(sources.iter().map(|source| self.run(source.as_ref()))).await
    }
}
