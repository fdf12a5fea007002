//! Stage 3: incremental clustering.
//!
//! A greedy single-pass nearest-centroid grouping, not a density-based
//! algorithm. Results depend on visiting order, which is why the order is an
//! explicit, seedable shuffle.

use anyhow::{Context, Result};
use chrono::{DateTime, Duration, Utc};
use datepulse_core::{
    cosine_similarity, BehaviorCluster, ClusterMembership, ContentItem, Embedding,
    MembershipStats, PipelineConfig, Store,
};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::Serialize;
use std::collections::BTreeSet;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ClusterSummary {
    pub clusters_created: usize,
    pub clusters_updated: usize,
    pub items_assigned: usize,
    pub candidates_discarded: usize,
}

/// An in-memory grouping built during one pass.
#[derive(Debug, Clone)]
pub struct Candidate {
    pub members: Vec<ContentItem>,
    sum: Vec<f64>,
    centroid: Vec<f32>,
}

impl Candidate {
    fn seed(item: ContentItem, vector: &[f32]) -> Self {
        Self {
            sum: vector.iter().map(|v| *v as f64).collect(),
            centroid: vector.to_vec(),
            members: vec![item],
        }
    }

    /// Attach a member and move the centroid to the mean of all members.
    fn attach(&mut self, item: ContentItem, vector: &[f32]) {
        for (acc, v) in self.sum.iter_mut().zip(vector) {
            *acc += *v as f64;
        }
        self.members.push(item);
        let n = self.members.len() as f64;
        self.centroid = self.sum.iter().map(|s| (s / n) as f32).collect();
    }

    pub fn centroid(&self) -> &[f32] {
        &self.centroid
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Put items in a pseudo-random order. A fixed seed reproduces the order.
pub fn shuffle_items(items: &mut [ContentItem], seed: Option<u64>) {
    let mut rng = match seed {
        Some(seed) => StdRng::seed_from_u64(seed),
        None => StdRng::from_entropy(),
    };
    items.shuffle(&mut rng);
}

/// Greedy single pass: each item joins the most similar candidate when that
/// similarity reaches `threshold`, else it starts a new one. Items without an
/// embedding are ignored.
pub fn group_items(items: Vec<ContentItem>, threshold: f32) -> Vec<Candidate> {
    let mut candidates: Vec<Candidate> = Vec::new();

    for item in items {
        let Some(embedding) = item.embedding.clone() else {
            continue;
        };
        let vector = embedding.as_slice();

        let best = candidates
            .iter()
            .enumerate()
            .map(|(idx, c)| (idx, cosine_similarity(vector, c.centroid())))
            .fold(None, |best: Option<(usize, f32)>, (idx, sim)| match best {
                Some((_, best_sim)) if best_sim >= sim => best,
                _ => Some((idx, sim)),
            });

        match best {
            Some((idx, sim)) if sim >= threshold => candidates[idx].attach(item, vector),
            _ => candidates.push(Candidate::seed(item, vector)),
        }
    }

    candidates
}

enum Saved {
    Created,
    Updated,
}

pub struct ClusteringEngine {
    store: Arc<dyn Store>,
    config: PipelineConfig,
}

impl ClusteringEngine {
    pub fn new(store: Arc<dyn Store>, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    pub async fn run(&self) -> Result<ClusterSummary> {
        self.run_at(Utc::now()).await
    }

    /// Run with `now` as the reference time for the lookback window and the
    /// 7-day counters.
    pub async fn run_at(&self, now: DateTime<Utc>) -> Result<ClusterSummary> {
        let since = now - Duration::days(self.config.content_lookback_days);
        let mut items = self.store.embedded_content(since).await?;
        tracing::info!(items = items.len(), "Clustering embedded content");

        shuffle_items(&mut items, self.config.shuffle_seed);
        let candidates = group_items(items, self.config.similarity_threshold);

        let total_candidates = candidates.len();
        let survivors: Vec<Candidate> = candidates
            .into_iter()
            .filter(|c| c.len() >= self.config.min_cluster_size)
            .collect();

        let mut summary = ClusterSummary {
            candidates_discarded: total_candidates - survivors.len(),
            ..ClusterSummary::default()
        };

        let mut persisted = self.store.list_clusters().await?;
        for candidate in survivors {
            let size = candidate.len();
            match self.save_candidate(candidate, &mut persisted, now).await {
                Ok(Saved::Created) => summary.clusters_created += 1,
                Ok(Saved::Updated) => summary.clusters_updated += 1,
                Err(e) => {
                    tracing::warn!(size, "Failed to save cluster candidate: {:#}", e);
                    continue;
                }
            }
            summary.items_assigned += size;
        }

        tracing::info!(
            created = summary.clusters_created,
            updated = summary.clusters_updated,
            assigned = summary.items_assigned,
            discarded = summary.candidates_discarded,
            "Clustering complete"
        );
        Ok(summary)
    }

    /// Most similar persisted cluster at or above the re-identification
    /// threshold. Ties go to the earlier cluster.
    fn find_existing(&self, persisted: &[BehaviorCluster], centroid: &[f32]) -> Option<usize> {
        persisted
            .iter()
            .enumerate()
            .map(|(idx, c)| (idx, cosine_similarity(centroid, c.centroid.as_slice())))
            .filter(|(_, sim)| *sim >= self.config.same_cluster_threshold)
            .max_by(|a, b| {
                a.1.partial_cmp(&b.1)
                    .unwrap_or(std::cmp::Ordering::Equal)
                    .then(b.0.cmp(&a.0))
            })
            .map(|(idx, _)| idx)
    }

    async fn save_candidate(
        &self,
        candidate: Candidate,
        persisted: &mut Vec<BehaviorCluster>,
        now: DateTime<Utc>,
    ) -> Result<Saved> {
        let candidate_centroid = Embedding::new(candidate.centroid().to_vec())
            .context("Candidate centroid is not a valid embedding")?;

        let (mut cluster, members, outcome) =
            match self.find_existing(persisted, candidate.centroid()) {
                Some(idx) => {
                    let cluster = persisted[idx].clone();
                    let members = self.merged_members(&cluster, candidate.members).await?;
                    (cluster, members, Saved::Updated)
                }
                None => (
                    BehaviorCluster::new(candidate_centroid.clone()),
                    candidate.members,
                    Saved::Created,
                ),
            };

        cluster.centroid = Embedding::mean(members.iter().filter_map(|m| m.embedding.as_ref()))
            .unwrap_or(candidate_centroid);
        cluster.apply_stats(&MembershipStats::from_members(&members, now));

        match outcome {
            Saved::Created => self.store.insert_cluster(&cluster).await?,
            Saved::Updated => self.store.update_cluster(&cluster).await?,
        }

        for member in &members {
            let Some(embedding) = &member.embedding else {
                continue;
            };
            let membership = ClusterMembership {
                cluster_id: cluster.id,
                content_id: member.id,
                similarity: embedding.cosine(&cluster.centroid),
                assigned_at: now,
            };
            if let Err(e) = self.store.upsert_membership(&membership).await {
                tracing::warn!(content_id = %member.id, "Failed to upsert membership: {:#}", e);
            }
        }

        match persisted.iter_mut().find(|c| c.id == cluster.id) {
            Some(slot) => *slot = cluster,
            None => persisted.push(cluster),
        }
        Ok(outcome)
    }

    /// Persisted members plus the candidate's, each item once.
    async fn merged_members(
        &self,
        cluster: &BehaviorCluster,
        new_members: Vec<ContentItem>,
    ) -> Result<Vec<ContentItem>> {
        let new_ids: BTreeSet<Uuid> = new_members.iter().map(|m| m.id).collect();
        let existing_ids: Vec<Uuid> = self
            .store
            .cluster_member_ids(cluster.id)
            .await?
            .into_iter()
            .filter(|id| !new_ids.contains(id))
            .collect();

        let mut members = self.store.content_by_ids(&existing_ids).await?;
        members.extend(new_members);
        Ok(members)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datepulse_core::{Language, Platform};
    use datepulse_store::MemoryStore;

    fn embedded(source_id: &str, vector: Vec<f32>, days_ago: i64) -> ContentItem {
        let mut item = ContentItem::new(
            Platform::Reddit,
            source_id,
            "some english body text",
            Utc::now() - Duration::days(days_ago),
        );
        item.language = Language::En;
        item.embedding = Some(Embedding::new(vector).unwrap());
        item
    }

    /// `n` vectors all within a small angle of `axis`.
    fn bundle(prefix: &str, axis: usize, n: usize, days_ago: i64) -> Vec<ContentItem> {
        (0..n)
            .map(|i| {
                let mut v = vec![0.0f32; 4];
                v[axis] = 1.0;
                v[(axis + 1) % 4] = 0.01 * (i % 5) as f32;
                embedded(&format!("{}-{}", prefix, i), v, days_ago)
            })
            .collect()
    }

    fn config(min_cluster_size: usize) -> PipelineConfig {
        PipelineConfig {
            min_cluster_size,
            shuffle_seed: Some(7),
            ..PipelineConfig::default()
        }
    }

    #[test]
    fn test_group_items_splits_orthogonal_bundles() {
        let mut items = bundle("a", 0, 6, 1);
        items.extend(bundle("b", 2, 4, 1));
        shuffle_items(&mut items, Some(1));

        let mut groups = group_items(items, 0.65);
        groups.sort_by_key(|c| std::cmp::Reverse(c.len()));
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].len(), 6);
        assert_eq!(groups[1].len(), 4);
    }

    #[test]
    fn test_centroid_is_member_mean() {
        let items = vec![
            embedded("x", vec![1.0, 0.0], 0),
            embedded("y", vec![0.8, 0.2], 0),
        ];
        let groups = group_items(items, 0.5);
        assert_eq!(groups.len(), 1);
        let c = groups[0].centroid();
        assert!((c[0] - 0.9).abs() < 1e-6);
        assert!((c[1] - 0.1).abs() < 1e-6);
    }

    #[test]
    fn test_seeded_shuffle_is_reproducible() {
        let items = bundle("s", 0, 10, 0);
        let mut a = items.clone();
        let mut b = items;
        shuffle_items(&mut a, Some(99));
        shuffle_items(&mut b, Some(99));
        let ids_a: Vec<_> = a.iter().map(|i| i.id).collect();
        let ids_b: Vec<_> = b.iter().map(|i| i.id).collect();
        assert_eq!(ids_a, ids_b);
    }

    #[tokio::test]
    async fn test_small_candidates_are_not_persisted() {
        let store = Arc::new(MemoryStore::new());
        for item in bundle("big", 0, 5, 1).into_iter().chain(bundle("tiny", 2, 2, 1)) {
            store.insert_content(&item).await.unwrap();
        }

        let engine = ClusteringEngine::new(store.clone(), config(3));
        let summary = engine.run().await.unwrap();
        assert_eq!(summary.clusters_created, 1);
        assert_eq!(summary.items_assigned, 5);
        assert_eq!(summary.candidates_discarded, 1);

        let clusters = store.list_clusters().await.unwrap();
        assert_eq!(clusters.len(), 1);
        assert_eq!(clusters[0].content_count_total, 5);
        assert_eq!(store.membership_count().await, 5);
    }

    #[tokio::test]
    async fn test_rerun_reidentifies_and_grows_cluster() {
        let store = Arc::new(MemoryStore::new());
        for item in bundle("old", 0, 4, 20) {
            store.insert_content(&item).await.unwrap();
        }
        let engine = ClusteringEngine::new(store.clone(), config(3));
        engine.run().await.unwrap();
        let first = store.list_clusters().await.unwrap();
        assert_eq!(first.len(), 1);
        assert_eq!(first[0].content_count_last_7d, 0);

        for item in bundle("new", 0, 4, 1) {
            store.insert_content(&item).await.unwrap();
        }
        let summary = engine.run().await.unwrap();
        assert_eq!(summary.clusters_created, 0);
        assert_eq!(summary.clusters_updated, 1);

        let clusters = store.list_clusters().await.unwrap();
        assert_eq!(clusters.len(), 1);
        let cluster = &clusters[0];
        assert_eq!(cluster.id, first[0].id);
        assert_eq!(cluster.content_count_total, 8);
        assert_eq!(cluster.content_count_last_7d, 4);
        assert!(cluster.content_count_last_7d <= cluster.content_count_total);
        // Growth follows the new counts: (4/8) / (7/30).
        assert!((cluster.growth_score - 2.14).abs() < 1e-9);
        assert!((cluster.source_breakdown.total() - 1.0).abs() < 0.01);
        // Re-clustering the same items overwrites edges instead of adding new ones.
        assert_eq!(store.membership_count().await, 8);
    }

    #[tokio::test]
    async fn test_membership_scores_use_final_centroid() {
        let store = Arc::new(MemoryStore::new());
        let items = bundle("m", 1, 3, 0);
        for item in &items {
            store.insert_content(item).await.unwrap();
        }
        ClusteringEngine::new(store.clone(), config(3))
            .run()
            .await
            .unwrap();

        let cluster = store.list_clusters().await.unwrap().remove(0);
        for item in &items {
            let edge = store.membership(cluster.id, item.id).await.unwrap();
            let expected = item.embedding.as_ref().unwrap().cosine(&cluster.centroid);
            assert!((edge.similarity - expected).abs() < 1e-6);
        }
    }
}
