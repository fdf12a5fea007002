//! Stage 6: opportunity cards for qualifying clusters.
//!
//! Derived fields are recomputed on every qualifying run. Status and notes
//! belong to the reviewer and are written only when a card is created.

use anyhow::Result;
use datepulse_core::{
    BehaviorCluster, DerivedOpportunity, OpportunityCard, Persona, PersonaClusterLink,
    PipelineConfig, Severity, Store,
};
use serde::Serialize;
use std::sync::Arc;
use uuid::Uuid;

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct OpportunitySummary {
    pub created: usize,
    pub updated: usize,
    pub skipped: usize,
}

/// `growth × log10(last_7d + 1) / 3`.
pub fn severity_score(growth_score: f64, last_7d: u32) -> f64 {
    growth_score * (last_7d as f64 + 1.0).log10() / 3.0
}

pub fn severity_for(growth_score: f64, last_7d: u32) -> Severity {
    let score = severity_score(growth_score, last_7d);
    if score > 1.5 {
        Severity::Critical
    } else if score > 1.0 {
        Severity::High
    } else if score > 0.5 {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Percentage above (or below) the uniform 30-day baseline.
pub fn growth_percent(growth_score: f64) -> i64 {
    ((growth_score - 1.0) * 100.0).round() as i64
}

pub fn why_now(cluster: &BehaviorCluster) -> String {
    let pct = growth_percent(cluster.growth_score);
    let weekly = cluster.content_count_last_7d;
    if pct > 100 {
        format!(
            "Explosive growth: activity is {}% above the 30-day baseline with {} mentions in the last week. \
             This behavior is spreading fast and the window to shape it is now.",
            pct, weekly
        )
    } else if pct > 50 {
        format!(
            "Strong momentum: activity is {}% above the 30-day baseline with {} mentions in the last week.",
            pct, weekly
        )
    } else if pct > 0 {
        format!(
            "Growing: activity is {}% above the 30-day baseline with {} mentions in the last week.",
            pct, weekly
        )
    } else {
        format!(
            "Consistent: discussion holds steady at {} mentions in the last week, a durable need rather than a spike.",
            weekly
        )
    }
}

pub fn signals_summary(cluster: &BehaviorCluster) -> String {
    let mut text = format!(
        "{} total mentions, {} in the last 7 days.",
        cluster.content_count_total, cluster.content_count_last_7d
    );
    let phrases: Vec<&str> = cluster.top_phrases.iter().take(3).map(String::as_str).collect();
    if !phrases.is_empty() {
        text.push_str(&format!(" Top phrases: {}.", phrases.join(", ")));
    }
    let sources: Vec<String> = cluster
        .source_breakdown
        .ranked()
        .into_iter()
        .map(|(platform, fraction)| format!("{} {}%", platform, (fraction * 100.0).round() as i64))
        .collect();
    if !sources.is_empty() {
        text.push_str(&format!(" Sources: {}.", sources.join(", ")));
    }
    text
}

/// Compute the card fields for a cluster given its links (best first) and
/// the persona behind the best link, if still in the catalog.
pub fn derive(
    cluster: &BehaviorCluster,
    links: &[PersonaClusterLink],
    top_persona: Option<&Persona>,
) -> DerivedOpportunity {
    let title = match top_persona {
        Some(persona) => format!("{} - Opportunity for {}", cluster.label, persona.name),
        None => format!("{} - Emerging Behavior", cluster.label),
    };

    let mut problem_statement = cluster.summary.trim().to_string();
    if let Some(persona) = top_persona {
        let pains: Vec<&str> = persona.pain_points.iter().take(2).map(String::as_str).collect();
        if !pains.is_empty() {
            if !problem_statement.is_empty() {
                problem_statement.push(' ');
            }
            problem_statement.push_str(&format!(
                "For {} this shows up as: {}.",
                persona.name,
                pains.join("; ")
            ));
        }
    }

    let confidence = links
        .first()
        .map(|l| l.association_score.min(1.0))
        .unwrap_or(0.0);

    DerivedOpportunity {
        title,
        problem_statement,
        signals_summary: signals_summary(cluster),
        why_now: why_now(cluster),
        severity: severity_for(cluster.growth_score, cluster.content_count_last_7d),
        confidence,
    }
}

pub struct OpportunityGenerator {
    store: Arc<dyn Store>,
    config: PipelineConfig,
}

impl OpportunityGenerator {
    pub fn new(store: Arc<dyn Store>, config: PipelineConfig) -> Self {
        Self { store, config }
    }

    fn qualifies(&self, cluster: &BehaviorCluster) -> bool {
        cluster.content_count_last_7d >= self.config.min_content_count
            && cluster.growth_score >= self.config.min_growth_score
    }

    pub async fn run(&self) -> Result<OpportunitySummary> {
        let personas = self.store.list_personas().await?;
        let mut summary = OpportunitySummary::default();

        for cluster in self.store.list_clusters().await? {
            if !self.qualifies(&cluster) {
                summary.skipped += 1;
                continue;
            }
            match self.process(&cluster, &personas).await {
                Ok(Some(true)) => summary.created += 1,
                Ok(Some(false)) => summary.updated += 1,
                Ok(None) => summary.skipped += 1,
                Err(e) => {
                    summary.skipped += 1;
                    tracing::warn!(cluster_id = %cluster.id, "Failed to write opportunity: {:#}", e);
                }
            }
        }

        tracing::info!(
            created = summary.created,
            updated = summary.updated,
            skipped = summary.skipped,
            "Opportunity generation complete"
        );
        Ok(summary)
    }

    /// `Some(true)` when a card was created, `Some(false)` when one was
    /// refreshed, `None` when the cluster lacks a strong enough persona link.
    async fn process(&self, cluster: &BehaviorCluster, personas: &[Persona]) -> Result<Option<bool>> {
        let links = self.store.persona_links(cluster.id).await?;
        let Some(top) = links.first() else {
            return Ok(None);
        };
        if !links
            .iter()
            .any(|l| l.association_score >= self.config.min_opportunity_link_score)
        {
            return Ok(None);
        }

        let top_persona = personas.iter().find(|p| p.id == top.persona_id);
        let derived = derive(cluster, &links, top_persona);

        match self.store.opportunity_for_cluster(cluster.id).await? {
            Some(existing) => {
                self.store
                    .update_opportunity_derived(existing.id, &derived)
                    .await?;
                Ok(Some(false))
            }
            None => {
                let persona_ids: Vec<Uuid> = links
                    .iter()
                    .take(self.config.max_personas_per_cluster)
                    .map(|l| l.persona_id)
                    .collect();
                let card = OpportunityCard::from_derived(derived);
                self.store
                    .create_opportunity(&card, cluster.id, &persona_ids)
                    .await?;
                tracing::info!(card_id = %card.id, title = %card.title, "Created opportunity");
                Ok(Some(true))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use datepulse_core::{
        AssignmentMethod, Embedding, OpportunityStatus, Platform, SourceBreakdown,
    };
    use datepulse_store::MemoryStore;

    fn hot_cluster(last_7d: u32, growth: f64) -> BehaviorCluster {
        let mut c = BehaviorCluster::new(Embedding::new(vec![1.0, 0.0]).unwrap());
        c.label = "Post-Date Silence".to_string();
        c.summary = "Matches go quiet after a first date.".to_string();
        c.top_phrases = vec![
            "first date".to_string(),
            "stopped texting".to_string(),
            "no reply".to_string(),
            "fourth".to_string(),
        ];
        c.content_count_total = last_7d;
        c.content_count_last_7d = last_7d;
        c.source_breakdown = SourceBreakdown::from_platforms(
            [Platform::Reddit, Platform::Reddit, Platform::Reddit, Platform::Youtube],
        );
        c.growth_score = growth;
        c
    }

    fn persona() -> Persona {
        Persona {
            id: Uuid::new_v4(),
            name: "Anxious Texter".to_string(),
            description: String::new(),
            keywords: vec!["texting".to_string()],
            pain_points: vec![
                "Reads silence as rejection".to_string(),
                "Unsure when to follow up".to_string(),
                "Third pain".to_string(),
            ],
            typical_behaviors: Vec::new(),
            goals: Vec::new(),
        }
    }

    fn link(persona_id: Uuid, cluster_id: Uuid, score: f64) -> PersonaClusterLink {
        PersonaClusterLink {
            persona_id,
            cluster_id,
            association_score: score,
            assignment_method: AssignmentMethod::Auto,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn test_severity_literal_inputs() {
        assert!((severity_score(2.0, 99) - 1.3333).abs() < 1e-3);
        assert_eq!(severity_for(2.0, 99), Severity::High);
        // 1.8 × log10(26) / 3 ≈ 0.849
        assert_eq!(severity_for(1.8, 25), Severity::Medium);
        assert_eq!(severity_for(4.29, 25), Severity::Critical);
        assert_eq!(severity_for(0.5, 20), Severity::Low);
    }

    #[test]
    fn test_why_now_bands() {
        let mut c = hot_cluster(25, 4.29);
        assert!(why_now(&c).starts_with("Explosive"));
        c.growth_score = 1.8;
        assert!(why_now(&c).starts_with("Strong momentum"));
        c.growth_score = 1.2;
        assert!(why_now(&c).starts_with("Growing"));
        c.growth_score = 1.0;
        assert!(why_now(&c).starts_with("Consistent"));
    }

    #[test]
    fn test_derive_fields() {
        let c = hot_cluster(25, 4.29);
        let p = persona();
        let links = vec![link(p.id, c.id, 0.9)];
        let d = derive(&c, &links, Some(&p));
        assert_eq!(d.title, "Post-Date Silence - Opportunity for Anxious Texter");
        assert!(d.problem_statement.starts_with("Matches go quiet"));
        assert!(d.problem_statement.contains("Reads silence as rejection; Unsure when to follow up"));
        assert!(!d.problem_statement.contains("Third pain"));
        assert_eq!(
            d.signals_summary,
            "25 total mentions, 25 in the last 7 days. Top phrases: first date, stopped texting, no reply. Sources: reddit 75%, youtube 25%."
        );
        assert!((d.confidence - 0.9).abs() < 1e-9);

        let orphan = derive(&c, &links, None);
        assert_eq!(orphan.title, "Post-Date Silence - Emerging Behavior");
    }

    #[tokio::test]
    async fn test_create_then_update_preserves_curation() {
        let store = Arc::new(MemoryStore::new());
        let c = hot_cluster(25, 4.29);
        let p = persona();
        store.insert_cluster(&c).await.unwrap();
        store.upsert_persona(&p).await.unwrap();
        store
            .replace_persona_links(c.id, &[link(p.id, c.id, 0.9)])
            .await
            .unwrap();

        let generator = OpportunityGenerator::new(store.clone(), PipelineConfig::default());
        let first = generator.run().await.unwrap();
        assert_eq!((first.created, first.updated), (1, 0));

        let card = store.opportunity_for_cluster(c.id).await.unwrap().unwrap();
        assert_eq!(card.status, OpportunityStatus::New);
        assert_eq!(card.severity, Severity::Critical);
        assert_eq!(store.opportunity_personas(card.id).await, vec![p.id]);

        store
            .set_opportunity_status(card.id, OpportunityStatus::Reviewed, Some("talked to users"))
            .await
            .unwrap();

        let mut cooled = c.clone();
        cooled.growth_score = 1.2;
        store.update_cluster(&cooled).await.unwrap();

        let second = generator.run().await.unwrap();
        assert_eq!((second.created, second.updated), (0, 1));

        let card = store.opportunity_for_cluster(c.id).await.unwrap().unwrap();
        assert_eq!(card.status, OpportunityStatus::Reviewed);
        assert_eq!(card.notes.as_deref(), Some("talked to users"));
        assert!(card.why_now.starts_with("Growing"));
        assert_eq!(store.list_opportunities().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_skips_weak_links_and_small_clusters() {
        let store = Arc::new(MemoryStore::new());
        let p = persona();
        store.upsert_persona(&p).await.unwrap();

        let weak = hot_cluster(25, 4.29);
        store.insert_cluster(&weak).await.unwrap();
        store
            .replace_persona_links(weak.id, &[link(p.id, weak.id, 0.4)])
            .await
            .unwrap();

        let unlinked = hot_cluster(30, 4.29);
        store.insert_cluster(&unlinked).await.unwrap();

        let small = hot_cluster(19, 4.29);
        store.insert_cluster(&small).await.unwrap();
        store
            .replace_persona_links(small.id, &[link(p.id, small.id, 0.9)])
            .await
            .unwrap();

        let summary = OpportunityGenerator::new(store.clone(), PipelineConfig::default())
            .run()
            .await
            .unwrap();
        assert_eq!(summary.created, 0);
        assert_eq!(summary.skipped, 3);
        assert!(store.list_opportunities().await.unwrap().is_empty());
    }
}
