//! Persistence port.
//!
//! Every pipeline stage receives an `Arc<dyn Store>` instead of reaching for a
//! shared database handle, so the SQLite backend and the in-memory fake are
//! interchangeable.

use crate::model::{
    BehaviorCluster, ClusterMembership, ContentItem, DerivedOpportunity, IngestionRun, Language,
    OpportunityCard, OpportunityStatus, Persona, PersonaClusterLink,
};
use crate::vector::Embedding;
use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

#[async_trait]
pub trait Store: Send + Sync {
    // --- content ---------------------------------------------------------

    /// Insert unless (platform, source_id) already exists. Returns whether a
    /// row was written.
    async fn insert_content(&self, item: &ContentItem) -> Result<bool>;

    async fn content_by_language(&self, language: Language) -> Result<Vec<ContentItem>>;

    async fn set_language(&self, id: Uuid, language: Language) -> Result<()>;

    async fn delete_content(&self, id: Uuid) -> Result<()>;

    /// English items published at or after `since` with no embedding,
    /// oldest first, at most `limit`.
    async fn content_needing_embedding(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ContentItem>>;

    /// Attach (or clear, with `None`) an item's embedding.
    async fn set_embedding(&self, id: Uuid, embedding: Option<&Embedding>) -> Result<()>;

    /// English items published at or after `since` that carry an embedding.
    async fn embedded_content(&self, since: DateTime<Utc>) -> Result<Vec<ContentItem>>;

    async fn content_by_ids(&self, ids: &[Uuid]) -> Result<Vec<ContentItem>>;

    /// Up to `limit` member items of a cluster, most similar first.
    async fn cluster_sample(&self, cluster_id: Uuid, limit: usize) -> Result<Vec<ContentItem>>;

    // --- clusters --------------------------------------------------------

    async fn list_clusters(&self) -> Result<Vec<BehaviorCluster>>;

    async fn get_cluster(&self, id: Uuid) -> Result<Option<BehaviorCluster>>;

    async fn insert_cluster(&self, cluster: &BehaviorCluster) -> Result<()>;

    async fn update_cluster(&self, cluster: &BehaviorCluster) -> Result<()>;

    async fn cluster_member_ids(&self, cluster_id: Uuid) -> Result<Vec<Uuid>>;

    /// Keyed on (cluster_id, content_id); an existing edge gets its score
    /// overwritten.
    async fn upsert_membership(&self, membership: &ClusterMembership) -> Result<()>;

    // --- personas --------------------------------------------------------

    async fn list_personas(&self) -> Result<Vec<Persona>>;

    /// Seeding only. Matches on name.
    async fn upsert_persona(&self, persona: &Persona) -> Result<()>;

    async fn persona_links(&self, cluster_id: Uuid) -> Result<Vec<PersonaClusterLink>>;

    /// Delete every link of the cluster and insert `links` as one unit.
    async fn replace_persona_links(
        &self,
        cluster_id: Uuid,
        links: &[PersonaClusterLink],
    ) -> Result<()>;

    // --- opportunities ---------------------------------------------------

    async fn opportunity_for_cluster(&self, cluster_id: Uuid) -> Result<Option<OpportunityCard>>;

    /// Insert the card together with its cluster and persona join rows.
    async fn create_opportunity(
        &self,
        card: &OpportunityCard,
        cluster_id: Uuid,
        persona_ids: &[Uuid],
    ) -> Result<()>;

    /// Overwrite only the pipeline-derived columns.
    async fn update_opportunity_derived(&self, id: Uuid, derived: &DerivedOpportunity)
        -> Result<()>;

    /// User curation. Returns false when the card does not exist.
    async fn set_opportunity_status(
        &self,
        id: Uuid,
        status: OpportunityStatus,
        notes: Option<&str>,
    ) -> Result<bool>;

    async fn list_opportunities(&self) -> Result<Vec<OpportunityCard>>;

    // --- ingestion runs --------------------------------------------------

    async fn record_run(&self, run: &IngestionRun) -> Result<()>;

    async fn recent_runs(&self, limit: usize) -> Result<Vec<IngestionRun>>;
}
