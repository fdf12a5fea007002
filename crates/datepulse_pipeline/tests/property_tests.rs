use datepulse_core::{BehaviorCluster, Embedding, Persona, PipelineConfig, Severity};
use datepulse_pipeline::cleaner::is_english;
use datepulse_pipeline::labeler::{extract_phrases, TOP_PHRASE_COUNT};
use datepulse_pipeline::opportunities::{severity_for, severity_score};
use datepulse_pipeline::persona_mapper::{association_score, cluster_blob};
use datepulse_pipeline::PersonaMapper;
use datepulse_store::MemoryStore;
use proptest::prelude::*;
use std::sync::Arc;
use uuid::Uuid;

fn term() -> impl Strategy<Value = String> {
    prop::collection::vec("[a-z]{2,8}", 1..4).prop_map(|words| words.join(" "))
}

fn persona_strategy() -> impl Strategy<Value = Persona> {
    (
        "[A-Z][a-z]{3,8}",
        prop::collection::vec(term(), 0..6),
        prop::collection::vec(term(), 0..4),
        prop::collection::vec(term(), 0..4),
    )
        .prop_map(|(name, keywords, pain_points, typical_behaviors)| Persona {
            id: Uuid::new_v4(),
            name,
            description: String::new(),
            keywords,
            pain_points,
            typical_behaviors,
            goals: Vec::new(),
        })
}

fn cluster_strategy() -> impl Strategy<Value = BehaviorCluster> {
    ("[a-z ]{0,30}", "[a-z ]{0,80}", prop::collection::vec(term(), 0..10)).prop_map(
        |(label, summary, phrases)| {
            let mut cluster = BehaviorCluster::new(Embedding::new(vec![1.0]).unwrap());
            cluster.label = label;
            cluster.summary = summary;
            cluster.top_phrases = phrases;
            cluster
        },
    )
}

proptest! {
    #[test]
    fn association_score_in_unit_range(cluster in cluster_strategy(), persona in persona_strategy()) {
        let score = association_score(&cluster_blob(&cluster), &persona);
        prop_assert!((0.0..=1.0).contains(&score));
    }

    #[test]
    fn mapping_never_exceeds_three_links(
        cluster in cluster_strategy(),
        personas in prop::collection::vec(persona_strategy(), 0..10),
    ) {
        let mapper = PersonaMapper::new(Arc::new(MemoryStore::new()), &PipelineConfig::default());
        let links = mapper.rank(&cluster, &personas);
        prop_assert!(links.len() <= 3);
        prop_assert!(links.iter().all(|l| l.association_score >= 0.3));

        // Same input, same links.
        let again = mapper.rank(&cluster, &personas);
        let ids: Vec<_> = links.iter().map(|l| l.persona_id).collect();
        let ids_again: Vec<_> = again.iter().map(|l| l.persona_id).collect();
        prop_assert_eq!(ids, ids_again);
    }

    #[test]
    fn english_detection_is_deterministic(text in "\\PC{0,200}") {
        prop_assert_eq!(is_english(&text, 0.10), is_english(&text, 0.10));
    }

    #[test]
    fn severity_is_monotonic_in_growth(
        growth in 0.0f64..5.0,
        extra in 0.0f64..5.0,
        last_7d in 0u32..5000,
    ) {
        prop_assert!(severity_score(growth + extra, last_7d) >= severity_score(growth, last_7d));
        prop_assert!(severity_for(growth + extra, last_7d) >= severity_for(growth, last_7d));
    }

    #[test]
    fn severity_is_monotonic_in_volume(growth in 0.0f64..5.0, a in 0u32..5000, b in 0u32..5000) {
        let (lo, hi) = if a <= b { (a, b) } else { (b, a) };
        prop_assert!(severity_for(growth, hi) >= severity_for(growth, lo));
    }

    #[test]
    fn phrase_list_is_bounded(texts in prop::collection::vec("[a-z ]{0,120}", 0..20)) {
        let phrases = extract_phrases(&texts);
        prop_assert!(phrases.len() <= TOP_PHRASE_COUNT);
        prop_assert!(phrases.iter().all(|p| {
            let n = p.split(' ').count();
            (2..=3).contains(&n)
        }), "every phrase must have 2 or 3 words");
    }
}

#[test]
fn severity_ordering_matches_bands() {
    assert!(Severity::Critical > Severity::High);
    assert!(Severity::High > Severity::Medium);
    assert!(Severity::Medium > Severity::Low);
}
