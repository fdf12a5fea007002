//! Stage 5: score clusters against the persona catalog.

use anyhow::Result;
use chrono::Utc;
use datepulse_core::{
    AssignmentMethod, BehaviorCluster, Persona, PersonaClusterLink, PipelineConfig, Store,
};
use serde::Serialize;
use std::sync::Arc;

/// Weight of a term whose words only partly appear in the cluster text.
const PARTIAL_MATCH_WEIGHT: f64 = 0.7;
/// Share of a term's words that must appear for a partial match.
const PARTIAL_MATCH_MIN_RATIO: f64 = 0.5;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct MappingSummary {
    pub clusters_mapped: usize,
    pub links_created: usize,
}

/// Lowercased label, summary and phrases, the text personas are matched against.
pub fn cluster_blob(cluster: &BehaviorCluster) -> String {
    let mut blob = format!("{} {}", cluster.label, cluster.summary);
    for phrase in &cluster.top_phrases {
        blob.push(' ');
        blob.push_str(phrase);
    }
    blob.to_lowercase()
}

/// Weight one persona term contributes: 1.0 for an exact substring hit,
/// 0.7 × word-ratio when at least half its words appear, else 0.
fn term_weight(blob: &str, term: &str) -> f64 {
    if blob.contains(term) {
        return 1.0;
    }
    let words: Vec<&str> = term.split_whitespace().collect();
    if words.is_empty() {
        return 0.0;
    }
    let found = words.iter().filter(|w| blob.contains(*w)).count();
    let ratio = found as f64 / words.len() as f64;
    if ratio >= PARTIAL_MATCH_MIN_RATIO {
        PARTIAL_MATCH_WEIGHT * ratio
    } else {
        0.0
    }
}

/// Association score in [0, 1] between a lowercased cluster blob and a persona.
pub fn association_score(blob: &str, persona: &Persona) -> f64 {
    let terms: Vec<String> = persona
        .match_terms()
        .map(|t| t.trim().to_lowercase())
        .filter(|t| !t.is_empty())
        .collect();
    if terms.is_empty() {
        return 0.0;
    }

    let mut weight_sum = 0.0;
    let mut matched_terms = 0usize;
    for term in &terms {
        let weight = term_weight(blob, term);
        if weight > 0.0 {
            matched_terms += 1;
            weight_sum += weight;
        }
    }

    let total = terms.len() as f64;
    let match_ratio = matched_terms as f64 / total;
    let score = (weight_sum / total) * (1.0 + match_ratio * 0.5);
    score.clamp(0.0, 1.0)
}

pub struct PersonaMapper {
    store: Arc<dyn Store>,
    threshold: f64,
    max_links: usize,
}

impl PersonaMapper {
    pub fn new(store: Arc<dyn Store>, config: &PipelineConfig) -> Self {
        Self {
            store,
            threshold: config.association_threshold,
            max_links: config.max_personas_per_cluster,
        }
    }

    /// Top personas for one cluster, best first. Ties keep catalog order.
    pub fn rank(&self, cluster: &BehaviorCluster, personas: &[Persona]) -> Vec<PersonaClusterLink> {
        let blob = cluster_blob(cluster);
        let mut scored: Vec<(&Persona, f64)> = personas
            .iter()
            .map(|p| (p, association_score(&blob, p)))
            .filter(|(_, score)| *score >= self.threshold)
            .collect();
        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

        let now = Utc::now();
        scored
            .into_iter()
            .take(self.max_links)
            .map(|(persona, score)| PersonaClusterLink {
                persona_id: persona.id,
                cluster_id: cluster.id,
                association_score: score,
                assignment_method: AssignmentMethod::Auto,
                created_at: now,
            })
            .collect()
    }

    pub async fn run(&self) -> Result<MappingSummary> {
        let personas = self.store.list_personas().await?;
        let mut summary = MappingSummary::default();
        if personas.is_empty() {
            tracing::info!("Persona catalog is empty, skipping mapping");
            return Ok(summary);
        }

        for cluster in self.store.list_clusters().await? {
            let links = self.rank(&cluster, &personas);
            match self.store.replace_persona_links(cluster.id, &links).await {
                Ok(()) => {
                    summary.clusters_mapped += 1;
                    summary.links_created += links.len();
                }
                Err(e) => tracing::warn!(cluster_id = %cluster.id, "Failed to replace persona links: {:#}", e),
            }
        }

        tracing::info!(
            clusters = summary.clusters_mapped,
            links = summary.links_created,
            "Persona mapping complete"
        );
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use datepulse_core::Embedding;
    use datepulse_store::MemoryStore;

    fn persona(name: &str, keywords: &[&str], pain_points: &[&str]) -> Persona {
        Persona {
            id: uuid::Uuid::new_v4(),
            name: name.to_string(),
            description: String::new(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            pain_points: pain_points.iter().map(|s| s.to_string()).collect(),
            typical_behaviors: Vec::new(),
            goals: vec!["never matched against".to_string()],
        }
    }

    fn cluster(label: &str, summary: &str, phrases: &[&str]) -> BehaviorCluster {
        let mut c = BehaviorCluster::new(Embedding::new(vec![1.0]).unwrap());
        c.label = label.to_string();
        c.summary = summary.to_string();
        c.top_phrases = phrases.iter().map(|s| s.to_string()).collect();
        c
    }

    #[test]
    fn test_score_exact_partial_and_miss() {
        let blob = "post-date silence people stop texting after a first date";
        // exact: "first date" (1.0); partial: "texting anxiety" 1/2 words (0.35); miss: "video calls".
        let p = persona("Anxious Texter", &["first date", "texting anxiety"], &["video calls"]);
        let expected = ((1.0 + 0.35) / 3.0) * (1.0 + (2.0 / 3.0) * 0.5);
        assert!((association_score(blob, &p) - expected).abs() < 1e-9);
    }

    #[test]
    fn test_score_is_clamped() {
        let blob = "ghosting ghosted dating apps";
        let p = persona("Ghosted", &["ghosting", "dating apps"], &["ghosted"]);
        // Raw score would be 1.0 × 1.5.
        assert_eq!(association_score(blob, &p), 1.0);
        assert_eq!(association_score(blob, &persona("Empty", &[], &[])), 0.0);
    }

    #[test]
    fn test_rank_keeps_top_three_above_threshold() {
        let mapper = PersonaMapper::new(Arc::new(MemoryStore::new()), &PipelineConfig::default());
        let c = cluster("Dating App Fatigue", "tired of swiping on apps", &["dating apps", "swiping fatigue"]);
        let personas = vec![
            persona("A", &["dating apps"], &[]),
            persona("B", &["swiping"], &[]),
            persona("C", &["fatigue"], &[]),
            persona("D", &["app fatigue"], &[]),
            persona("E", &["long distance"], &[]),
        ];
        let links = mapper.rank(&c, &personas);
        assert_eq!(links.len(), 3);
        assert!(links.windows(2).all(|w| w[0].association_score >= w[1].association_score));
        assert!(links.iter().all(|l| l.association_score >= 0.3));
        assert!(links.iter().all(|l| l.assignment_method == AssignmentMethod::Auto));
        assert!(links.iter().all(|l| l.persona_id != personas[4].id));
    }

    #[tokio::test]
    async fn test_run_replaces_links_idempotently() {
        let store = Arc::new(MemoryStore::new());
        let c = cluster("Ghosting After First Date", "no reply after meeting", &["first date"]);
        store.insert_cluster(&c).await.unwrap();
        store
            .upsert_persona(&persona("Hopeful", &["first date", "ghosting"], &[]))
            .await
            .unwrap();
        store
            .upsert_persona(&persona("Unrelated", &["career change"], &[]))
            .await
            .unwrap();

        let mapper = PersonaMapper::new(store.clone(), &PipelineConfig::default());
        let first = mapper.run().await.unwrap();
        assert_eq!(first.links_created, 1);
        let links_a = store.persona_links(c.id).await.unwrap();

        mapper.run().await.unwrap();
        let links_b = store.persona_links(c.id).await.unwrap();
        assert_eq!(links_b.len(), 1);
        assert_eq!(links_a[0].persona_id, links_b[0].persona_id);
        assert_eq!(links_a[0].association_score, links_b[0].association_score);
    }

    #[tokio::test]
    async fn test_empty_catalog_is_a_no_op() {
        let store = Arc::new(MemoryStore::new());
        store
            .insert_cluster(&cluster("X", "y", &[]))
            .await
            .unwrap();
        let summary = PersonaMapper::new(store, &PipelineConfig::default())
            .run()
            .await
            .unwrap();
        assert_eq!(summary, MappingSummary::default());
    }
}
