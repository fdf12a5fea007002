//! In-process `Store` for tests and for callers that need no database.
//!
//! Orderings mirror the SQLite backend so seeded runs behave identically
//! against either store.

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use datepulse_core::{
    BehaviorCluster, ClusterMembership, ContentItem, DerivedOpportunity, Embedding,
    IngestionRun, Language, OpportunityCard, OpportunityStatus, Persona, PersonaClusterLink,
    Store,
};
use std::collections::{BTreeMap, HashMap};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Tables {
    content: HashMap<Uuid, ContentItem>,
    clusters: Vec<BehaviorCluster>,
    memberships: BTreeMap<(Uuid, Uuid), ClusterMembership>,
    personas: Vec<Persona>,
    links: HashMap<Uuid, Vec<PersonaClusterLink>>,
    opportunities: Vec<OpportunityCard>,
    opportunity_clusters: Vec<(Uuid, Uuid)>,
    opportunity_personas: Vec<(Uuid, Uuid)>,
    runs: Vec<IngestionRun>,
}

impl Tables {
    fn sorted_content<F>(&self, keep: F) -> Vec<ContentItem>
    where
        F: Fn(&ContentItem) -> bool,
    {
        let mut items: Vec<ContentItem> =
            self.content.values().filter(|c| keep(*c)).cloned().collect();
        items.sort_by(|a, b| a.published_at.cmp(&b.published_at).then(a.id.cmp(&b.id)));
        items
    }
}

#[derive(Default)]
pub struct MemoryStore {
    tables: RwLock<Tables>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of membership edges; tests use it to check upserts never duplicate.
    pub async fn membership_count(&self) -> usize {
        self.tables.read().await.memberships.len()
    }

    pub async fn membership(&self, cluster_id: Uuid, content_id: Uuid) -> Option<ClusterMembership> {
        self.tables
            .read()
            .await
            .memberships
            .get(&(cluster_id, content_id))
            .cloned()
    }

    pub async fn opportunity_personas(&self, opportunity_id: Uuid) -> Vec<Uuid> {
        self.tables
            .read()
            .await
            .opportunity_personas
            .iter()
            .filter(|(o, _)| *o == opportunity_id)
            .map(|(_, p)| *p)
            .collect()
    }
}

#[async_trait]
impl Store for MemoryStore {
    async fn insert_content(&self, item: &ContentItem) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let duplicate = tables.content.contains_key(&item.id)
            || tables
                .content
                .values()
                .any(|c| c.platform == item.platform && c.source_id == item.source_id);
        if duplicate {
            return Ok(false);
        }
        tables.content.insert(item.id, item.clone());
        Ok(true)
    }

    async fn content_by_language(&self, language: Language) -> Result<Vec<ContentItem>> {
        Ok(self
            .tables
            .read()
            .await
            .sorted_content(|c| c.language == language))
    }

    async fn set_language(&self, id: Uuid, language: Language) -> Result<()> {
        if let Some(item) = self.tables.write().await.content.get_mut(&id) {
            item.language = language;
        }
        Ok(())
    }

    async fn delete_content(&self, id: Uuid) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.content.remove(&id);
        tables.memberships.retain(|(_, content_id), _| *content_id != id);
        Ok(())
    }

    async fn content_needing_embedding(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> Result<Vec<ContentItem>> {
        let mut items = self.tables.read().await.sorted_content(|c| {
            c.language == Language::En && c.embedding.is_none() && c.published_at >= since
        });
        items.truncate(limit);
        Ok(items)
    }

    async fn set_embedding(&self, id: Uuid, embedding: Option<&Embedding>) -> Result<()> {
        if let Some(item) = self.tables.write().await.content.get_mut(&id) {
            item.embedding = embedding.cloned();
        }
        Ok(())
    }

    async fn embedded_content(&self, since: DateTime<Utc>) -> Result<Vec<ContentItem>> {
        Ok(self.tables.read().await.sorted_content(|c| {
            c.language == Language::En && c.embedding.is_some() && c.published_at >= since
        }))
    }

    async fn content_by_ids(&self, ids: &[Uuid]) -> Result<Vec<ContentItem>> {
        let tables = self.tables.read().await;
        Ok(tables.sorted_content(|c| ids.contains(&c.id)))
    }

    async fn cluster_sample(&self, cluster_id: Uuid, limit: usize) -> Result<Vec<ContentItem>> {
        let tables = self.tables.read().await;
        let mut members: Vec<&ClusterMembership> = tables
            .memberships
            .values()
            .filter(|m| m.cluster_id == cluster_id)
            .collect();
        members.sort_by(|a, b| {
            b.similarity
                .partial_cmp(&a.similarity)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.content_id.cmp(&b.content_id))
        });
        Ok(members
            .into_iter()
            .filter_map(|m| tables.content.get(&m.content_id).cloned())
            .take(limit)
            .collect())
    }

    async fn list_clusters(&self) -> Result<Vec<BehaviorCluster>> {
        Ok(self.tables.read().await.clusters.clone())
    }

    async fn get_cluster(&self, id: Uuid) -> Result<Option<BehaviorCluster>> {
        Ok(self
            .tables
            .read()
            .await
            .clusters
            .iter()
            .find(|c| c.id == id)
            .cloned())
    }

    async fn insert_cluster(&self, cluster: &BehaviorCluster) -> Result<()> {
        let mut tables = self.tables.write().await;
        if tables.clusters.iter().any(|c| c.id == cluster.id) {
            anyhow::bail!("Cluster {} already exists", cluster.id);
        }
        tables.clusters.push(cluster.clone());
        Ok(())
    }

    async fn update_cluster(&self, cluster: &BehaviorCluster) -> Result<()> {
        let mut tables = self.tables.write().await;
        if let Some(existing) = tables.clusters.iter_mut().find(|c| c.id == cluster.id) {
            let created_at = existing.created_at;
            *existing = cluster.clone();
            existing.created_at = created_at;
        }
        Ok(())
    }

    async fn cluster_member_ids(&self, cluster_id: Uuid) -> Result<Vec<Uuid>> {
        Ok(self
            .tables
            .read()
            .await
            .memberships
            .keys()
            .filter(|(c, _)| *c == cluster_id)
            .map(|(_, content_id)| *content_id)
            .collect())
    }

    async fn upsert_membership(&self, membership: &ClusterMembership) -> Result<()> {
        let mut tables = self.tables.write().await;
        if !tables.content.contains_key(&membership.content_id) {
            anyhow::bail!("Content {} does not exist", membership.content_id);
        }
        tables.memberships.insert(
            (membership.cluster_id, membership.content_id),
            membership.clone(),
        );
        Ok(())
    }

    async fn list_personas(&self) -> Result<Vec<Persona>> {
        let mut personas = self.tables.read().await.personas.clone();
        personas.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(personas)
    }

    async fn upsert_persona(&self, persona: &Persona) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.personas.iter_mut().find(|p| p.name == persona.name) {
            Some(existing) => {
                let id = existing.id;
                *existing = persona.clone();
                existing.id = id;
            }
            None => tables.personas.push(persona.clone()),
        }
        Ok(())
    }

    async fn persona_links(&self, cluster_id: Uuid) -> Result<Vec<PersonaClusterLink>> {
        let mut links = self
            .tables
            .read()
            .await
            .links
            .get(&cluster_id)
            .cloned()
            .unwrap_or_default();
        links.sort_by(|a, b| {
            b.association_score
                .partial_cmp(&a.association_score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then(a.persona_id.cmp(&b.persona_id))
        });
        Ok(links)
    }

    async fn replace_persona_links(
        &self,
        cluster_id: Uuid,
        links: &[PersonaClusterLink],
    ) -> Result<()> {
        // One write guard for the delete and the insert.
        let mut tables = self.tables.write().await;
        let replacement = links
            .iter()
            .cloned()
            .map(|mut link| {
                link.cluster_id = cluster_id;
                link
            })
            .collect();
        tables.links.insert(cluster_id, replacement);
        Ok(())
    }

    async fn opportunity_for_cluster(&self, cluster_id: Uuid) -> Result<Option<OpportunityCard>> {
        let tables = self.tables.read().await;
        let card = tables
            .opportunity_clusters
            .iter()
            .filter(|(_, c)| *c == cluster_id)
            .find_map(|(o, _)| tables.opportunities.iter().find(|card| card.id == *o))
            .cloned();
        Ok(card)
    }

    async fn create_opportunity(
        &self,
        card: &OpportunityCard,
        cluster_id: Uuid,
        persona_ids: &[Uuid],
    ) -> Result<()> {
        let mut tables = self.tables.write().await;
        tables.opportunities.push(card.clone());
        tables.opportunity_clusters.push((card.id, cluster_id));
        for persona_id in persona_ids {
            if !tables.opportunity_personas.contains(&(card.id, *persona_id)) {
                tables.opportunity_personas.push((card.id, *persona_id));
            }
        }
        Ok(())
    }

    async fn update_opportunity_derived(
        &self,
        id: Uuid,
        derived: &DerivedOpportunity,
    ) -> Result<()> {
        if let Some(card) = self
            .tables
            .write()
            .await
            .opportunities
            .iter_mut()
            .find(|c| c.id == id)
        {
            card.apply_derived(derived);
        }
        Ok(())
    }

    async fn set_opportunity_status(
        &self,
        id: Uuid,
        status: OpportunityStatus,
        notes: Option<&str>,
    ) -> Result<bool> {
        let mut tables = self.tables.write().await;
        let Some(card) = tables.opportunities.iter_mut().find(|c| c.id == id) else {
            return Ok(false);
        };
        card.status = status;
        if let Some(notes) = notes {
            card.notes = Some(notes.to_string());
        }
        card.updated_at = Utc::now();
        Ok(true)
    }

    async fn list_opportunities(&self) -> Result<Vec<OpportunityCard>> {
        let mut cards = self.tables.read().await.opportunities.clone();
        cards.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(cards)
    }

    async fn record_run(&self, run: &IngestionRun) -> Result<()> {
        let mut tables = self.tables.write().await;
        match tables.runs.iter_mut().find(|r| r.id == run.id) {
            Some(existing) => *existing = run.clone(),
            None => tables.runs.push(run.clone()),
        }
        Ok(())
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<IngestionRun>> {
        let mut runs = self.tables.read().await.runs.clone();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }
}
