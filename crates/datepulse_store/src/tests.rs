use crate::{MemoryStore, SqliteStore};
use chrono::{Duration, Utc};
use datepulse_core::{
    AssignmentMethod, BehaviorCluster, ClusterMembership, ContentItem, DerivedOpportunity,
    Embedding, IngestionRun, Language, MembershipStats, OpportunityCard, OpportunityStatus,
    Persona, PersonaClusterLink, Platform, RunStatus, Severity, Store,
};
use uuid::Uuid;

async fn backends() -> Vec<(&'static str, Box<dyn Store>)> {
    vec![
        ("memory", Box::new(MemoryStore::new())),
        (
            "sqlite",
            Box::new(SqliteStore::in_memory().await.expect("Failed to open sqlite")),
        ),
    ]
}

fn english_item(source_id: &str, days_ago: i64, vector: Vec<f32>) -> ContentItem {
    let mut item = ContentItem::new(
        Platform::Reddit,
        source_id,
        "I keep getting ghosted after the second date and I am tired of it",
        Utc::now() - Duration::days(days_ago),
    );
    item.language = Language::En;
    item.embedding = Some(Embedding::new(vector).unwrap());
    item
}

fn persona(name: &str) -> Persona {
    Persona {
        id: Uuid::new_v4(),
        name: name.to_string(),
        description: String::new(),
        keywords: vec!["ghosting".into()],
        pain_points: vec!["feeling invisible".into()],
        typical_behaviors: vec![],
        goals: vec![],
    }
}

fn derived(title: &str, severity: Severity) -> DerivedOpportunity {
    DerivedOpportunity {
        title: title.to_string(),
        problem_statement: "problem".into(),
        signals_summary: "signals".into(),
        why_now: "why".into(),
        severity,
        confidence: 0.8,
    }
}

#[tokio::test]
async fn test_content_dedup_on_platform_and_source_id() {
    for (name, store) in backends().await {
        let first = ContentItem::new(Platform::Reddit, "t3_abc", "hello there", Utc::now());
        let dup = ContentItem::new(Platform::Reddit, "t3_abc", "again", Utc::now());
        let other_platform = ContentItem::new(Platform::Youtube, "t3_abc", "video", Utc::now());

        assert!(store.insert_content(&first).await.unwrap(), "{name}");
        assert!(!store.insert_content(&dup).await.unwrap(), "{name}");
        assert!(store.insert_content(&other_platform).await.unwrap(), "{name}");

        let unknown = store.content_by_language(Language::Unknown).await.unwrap();
        assert_eq!(unknown.len(), 2, "{name}");
    }
}

#[tokio::test]
async fn test_language_and_embedding_lifecycle() {
    for (name, store) in backends().await {
        let item = ContentItem::new(Platform::Reddit, "a", "some text body here", Utc::now())
            .with_title("title");
        store.insert_content(&item).await.unwrap();
        store.set_language(item.id, Language::En).await.unwrap();

        let since = Utc::now() - Duration::days(30);
        let pending = store.content_needing_embedding(since, 10).await.unwrap();
        assert_eq!(pending.len(), 1, "{name}");
        assert_eq!(pending[0].title.as_deref(), Some("title"), "{name}");

        let vector = Embedding::new(vec![0.1, 0.2, 0.3]).unwrap();
        store.set_embedding(item.id, Some(&vector)).await.unwrap();
        assert!(store.content_needing_embedding(since, 10).await.unwrap().is_empty(), "{name}");

        let embedded = store.embedded_content(since).await.unwrap();
        assert_eq!(embedded.len(), 1, "{name}");
        assert_eq!(embedded[0].embedding.as_ref(), Some(&vector), "{name}");

        store.set_embedding(item.id, None).await.unwrap();
        assert!(store.embedded_content(since).await.unwrap().is_empty(), "{name}");

        store.delete_content(item.id).await.unwrap();
        assert!(store.content_by_ids(&[item.id]).await.unwrap().is_empty(), "{name}");
    }
}

#[tokio::test]
async fn test_embedding_window_and_cap() {
    for (name, store) in backends().await {
        for i in 0..5 {
            let mut item = english_item(&format!("recent-{i}"), 1, vec![1.0, 0.0]);
            item.embedding = None;
            store.insert_content(&item).await.unwrap();
        }
        let mut old = english_item("old", 45, vec![1.0, 0.0]);
        old.embedding = None;
        store.insert_content(&old).await.unwrap();

        let since = Utc::now() - Duration::days(30);
        assert_eq!(store.content_needing_embedding(since, 3).await.unwrap().len(), 3, "{name}");
        assert_eq!(store.content_needing_embedding(since, 100).await.unwrap().len(), 5, "{name}");
    }
}

#[tokio::test]
async fn test_membership_upsert_overwrites_score() {
    for (name, store) in backends().await {
        let item = english_item("m1", 1, vec![1.0, 0.0]);
        store.insert_content(&item).await.unwrap();
        let cluster = BehaviorCluster::new(Embedding::new(vec![1.0, 0.0]).unwrap());
        store.insert_cluster(&cluster).await.unwrap();

        for similarity in [0.7f32, 0.9] {
            store
                .upsert_membership(&ClusterMembership {
                    cluster_id: cluster.id,
                    content_id: item.id,
                    similarity,
                    assigned_at: Utc::now(),
                })
                .await
                .unwrap();
        }

        let members = store.cluster_member_ids(cluster.id).await.unwrap();
        assert_eq!(members, vec![item.id], "{name}");
        let sample = store.cluster_sample(cluster.id, 50).await.unwrap();
        assert_eq!(sample.len(), 1, "{name}");
    }
}

#[tokio::test]
async fn test_cluster_round_trip_and_update() {
    for (name, store) in backends().await {
        let items = vec![
            english_item("c1", 1, vec![1.0, 0.0]),
            english_item("c2", 12, vec![1.0, 0.1]),
        ];
        let mut cluster = BehaviorCluster::new(Embedding::new(vec![1.0, 0.05]).unwrap());
        cluster.apply_stats(&MembershipStats::from_members(&items, Utc::now()));
        store.insert_cluster(&cluster).await.unwrap();

        cluster.label = "Ghosting After Second Date".into();
        cluster.top_phrases = vec!["second date".into()];
        store.update_cluster(&cluster).await.unwrap();

        let loaded = store.get_cluster(cluster.id).await.unwrap().unwrap();
        assert_eq!(loaded.label, "Ghosting After Second Date", "{name}");
        assert_eq!(loaded.top_phrases, vec!["second date".to_string()], "{name}");
        assert_eq!(loaded.content_count_total, 2, "{name}");
        assert_eq!(loaded.content_count_last_7d, 1, "{name}");
        assert!((loaded.source_breakdown.total() - 1.0).abs() < 1e-9, "{name}");
        assert_eq!(loaded.centroid, cluster.centroid, "{name}");
        assert!(!loaded.needs_labeling(), "{name}");
        assert_eq!(store.list_clusters().await.unwrap().len(), 1, "{name}");
    }
}

#[tokio::test]
async fn test_replace_persona_links_is_full_replace() {
    for (name, store) in backends().await {
        let cluster = BehaviorCluster::new(Embedding::new(vec![1.0]).unwrap());
        store.insert_cluster(&cluster).await.unwrap();
        let a = persona("Burned-Out Swiper");
        let b = persona("Serious Seeker");
        store.upsert_persona(&a).await.unwrap();
        store.upsert_persona(&b).await.unwrap();
        let personas = store.list_personas().await.unwrap();
        let link = |p: &Persona, score: f64| PersonaClusterLink {
            persona_id: p.id,
            cluster_id: cluster.id,
            association_score: score,
            assignment_method: AssignmentMethod::Auto,
            created_at: Utc::now(),
        };

        store
            .replace_persona_links(cluster.id, &[link(&personas[0], 0.4), link(&personas[1], 0.9)])
            .await
            .unwrap();
        let links = store.persona_links(cluster.id).await.unwrap();
        assert_eq!(links.len(), 2, "{name}");
        assert!((links[0].association_score - 0.9).abs() < 1e-9, "{name}");

        store
            .replace_persona_links(cluster.id, &[link(&personas[0], 0.5)])
            .await
            .unwrap();
        let links = store.persona_links(cluster.id).await.unwrap();
        assert_eq!(links.len(), 1, "{name}");
        assert_eq!(links[0].persona_id, personas[0].id, "{name}");
    }
}

#[tokio::test]
async fn test_persona_upsert_matches_on_name() {
    for (name, store) in backends().await {
        let original = persona("Serious Seeker");
        store.upsert_persona(&original).await.unwrap();
        let mut edited = persona("Serious Seeker");
        edited.keywords = vec!["long term".into()];
        store.upsert_persona(&edited).await.unwrap();

        let personas = store.list_personas().await.unwrap();
        assert_eq!(personas.len(), 1, "{name}");
        assert_eq!(personas[0].id, original.id, "{name}");
        assert_eq!(personas[0].keywords, vec!["long term".to_string()], "{name}");
    }
}

#[tokio::test]
async fn test_opportunity_update_preserves_status_and_notes() {
    for (name, store) in backends().await {
        let cluster = BehaviorCluster::new(Embedding::new(vec![1.0]).unwrap());
        store.insert_cluster(&cluster).await.unwrap();
        let p = persona("Serious Seeker");
        store.upsert_persona(&p).await.unwrap();

        let card = OpportunityCard::from_derived(derived("First", Severity::Low));
        store.create_opportunity(&card, cluster.id, &[p.id]).await.unwrap();

        assert!(store
            .set_opportunity_status(card.id, OpportunityStatus::Reviewed, Some("talked to PM"))
            .await
            .unwrap());
        store
            .update_opportunity_derived(card.id, &derived("Second", Severity::Critical))
            .await
            .unwrap();

        let loaded = store.opportunity_for_cluster(cluster.id).await.unwrap().unwrap();
        assert_eq!(loaded.title, "Second", "{name}");
        assert_eq!(loaded.severity, Severity::Critical, "{name}");
        assert_eq!(loaded.status, OpportunityStatus::Reviewed, "{name}");
        assert_eq!(loaded.notes.as_deref(), Some("talked to PM"), "{name}");

        // Status change without notes keeps the existing notes.
        store
            .set_opportunity_status(card.id, OpportunityStatus::InDiscovery, None)
            .await
            .unwrap();
        let loaded = store.opportunity_for_cluster(cluster.id).await.unwrap().unwrap();
        assert_eq!(loaded.notes.as_deref(), Some("talked to PM"), "{name}");

        assert!(!store
            .set_opportunity_status(Uuid::new_v4(), OpportunityStatus::Reviewed, None)
            .await
            .unwrap());
        assert_eq!(store.list_opportunities().await.unwrap().len(), 1, "{name}");
    }
}

#[tokio::test]
async fn test_ingestion_run_record_is_upserted() {
    for (name, store) in backends().await {
        let mut run = IngestionRun::start("rss:r/dating");
        store.record_run(&run).await.unwrap();
        run.complete(12, 9);
        store.record_run(&run).await.unwrap();

        let runs = store.recent_runs(10).await.unwrap();
        assert_eq!(runs.len(), 1, "{name}");
        assert_eq!(runs[0].status, RunStatus::Completed, "{name}");
        assert_eq!(runs[0].items_processed, 12, "{name}");
        assert_eq!(runs[0].items_ingested, 9, "{name}");
        assert!(runs[0].completed_at.is_some(), "{name}");
    }
}

#[tokio::test]
async fn test_sqlite_file_persists_across_reopen() {
    let dir = tempfile::TempDir::new().unwrap();
    let path = dir.path().join("trends.db");
    let item = english_item("persisted", 2, vec![0.3, 0.4]);
    {
        let store = SqliteStore::new(&path).await.unwrap();
        store.insert_content(&item).await.unwrap();
    }
    let store = SqliteStore::new(&path).await.unwrap();
    let loaded = store.content_by_ids(&[item.id]).await.unwrap();
    assert_eq!(loaded.len(), 1);
    assert_eq!(loaded[0].embedding, item.embedding);
    assert_eq!(loaded[0].language, Language::En);
}
