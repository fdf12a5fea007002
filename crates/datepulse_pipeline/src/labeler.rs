//! Stage 4: representative phrases, label and summary for new clusters.

use anyhow::Result;
use datepulse_core::{growth_score, BehaviorCluster, PipelineConfig, Store};
use datepulse_reasoning::api_types::Message;
use datepulse_reasoning::json::parse_json_object;
use datepulse_reasoning::{CompletionParams, LlmClient};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::{Arc, LazyLock};

/// Phrases kept per cluster.
pub const TOP_PHRASE_COUNT: usize = 10;

/// Label used when a cluster yields no phrases at all.
pub const FALLBACK_LABEL: &str = "Unlabeled Trend";

static RE_PUNCT: LazyLock<Regex> = LazyLock::new(|| Regex::new(r"[^\p{L}\p{N}\s]+").unwrap());

/// Dating vocabulary; phrases containing any of these score double.
const DOMAIN_TERMS: &[&str] = &[
    "dating", "date", "dates", "dated", "match", "matches", "matched", "swipe", "swiping",
    "tinder", "bumble", "hinge", "ghost", "ghosted", "ghosting", "relationship",
    "relationships", "profile", "profiles", "message", "messages", "texting", "text", "app",
    "apps", "boyfriend", "girlfriend", "partner", "crush", "breakup", "love", "romance",
    "romantic", "flirt", "flirting", "chemistry", "attraction", "single", "singles", "hookup",
    "situationship", "red flag", "green flag", "bio", "prompts", "conversation", "talking stage",
    "first date", "second date", "commitment", "marriage",
];

/// Conversational glue that is frequent everywhere and says nothing.
const FILLER_PHRASES: &[&str] = &[
    "and the", "that the", "for the", "with the", "this is", "and then", "but the",
    "after the", "before the", "about the", "from the", "over the", "into the",
    "was the", "are the", "have been", "has been", "you are", "they are", "there are",
    "there was", "going to", "want to", "need to", "have to", "had to", "trying to",
    "don know", "dont know", "feel like", "kind of", "sort of", "lot of", "one of the",
    "out of the", "part of the", "some of the", "all the", "you can", "can you", "let me",
    "what the", "just the", "the same", "this video", "subscribe", "click the link",
];

/// Words that make a phrase filler when the whole phrase consists of them.
const STOPWORDS: &[&str] = &[
    "the", "and", "for", "that", "this", "with", "you", "are", "was", "were", "have", "has",
    "had", "but", "not", "they", "them", "their", "there", "what", "when", "from", "she",
    "her", "his", "him", "its", "our", "out", "all", "can", "just", "been", "would", "could",
    "should", "will", "about", "into", "than", "then", "some", "like", "who", "how", "why",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct LabelSummary {
    pub labeled: usize,
    pub llm_labels: usize,
    pub heuristic_labels: usize,
}

fn tokenize(text: &str) -> Vec<String> {
    RE_PUNCT
        .replace_all(&text.to_lowercase(), "")
        .split_whitespace()
        .filter(|t| t.chars().count() > 2)
        .map(str::to_string)
        .collect()
}

fn is_filler(phrase: &str) -> bool {
    FILLER_PHRASES.contains(&phrase) || phrase.split(' ').all(|w| STOPWORDS.contains(&w))
}

fn is_domain_relevant(phrase: &str) -> bool {
    let words: Vec<&str> = phrase.split(' ').collect();
    DOMAIN_TERMS.iter().any(|term| {
        if term.contains(' ') {
            phrase.contains(term)
        } else {
            words.contains(term)
        }
    })
}

/// Top bigrams and trigrams across `texts`, domain-boosted, best first.
pub fn extract_phrases<S: AsRef<str>>(texts: &[S]) -> Vec<String> {
    let mut counts: HashMap<String, usize> = HashMap::new();
    for text in texts {
        let tokens = tokenize(text.as_ref());
        for n in [2, 3] {
            for window in tokens.windows(n) {
                *counts.entry(window.join(" ")).or_insert(0) += 1;
            }
        }
    }

    let mut scored: Vec<(String, usize)> = counts
        .into_iter()
        .filter(|(phrase, _)| !is_filler(phrase))
        .map(|(phrase, count)| {
            let boost = if is_domain_relevant(&phrase) { 2 } else { 1 };
            (phrase, count * boost)
        })
        .collect();
    scored.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
    scored
        .into_iter()
        .take(TOP_PHRASE_COUNT)
        .map(|(phrase, _)| phrase)
        .collect()
}

fn title_case(phrase: &str) -> String {
    phrase
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first.to_uppercase().chain(chars).collect(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

/// "a", "a and b", "a, b and c".
fn natural_join(items: &[String]) -> String {
    match items {
        [] => String::new(),
        [only] => format!("\"{}\"", only),
        [init @ .., last] => format!(
            "{} and \"{}\"",
            init.iter()
                .map(|p| format!("\"{}\"", p))
                .collect::<Vec<_>>()
                .join(", "),
            last
        ),
    }
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct LabelText {
    pub label: String,
    pub summary: String,
}

/// Label from the phrase list alone.
pub fn heuristic_label(phrases: &[String], member_count: u32) -> LabelText {
    let label = phrases
        .first()
        .map(|p| title_case(p))
        .unwrap_or_else(|| FALLBACK_LABEL.to_string());
    let top: Vec<String> = phrases.iter().take(3).cloned().collect();
    let summary = if top.is_empty() {
        format!("A group of {} related posts with no recurring phrases yet.", member_count)
    } else {
        format!(
            "A group of {} related posts frequently mentioning {}.",
            member_count,
            natural_join(&top)
        )
    };
    LabelText { label, summary }
}

const LABEL_SYSTEM_PROMPT: &str = "You name emerging behavior trends in online dating \
discussions for a product team. Reply with a JSON object only: \
{\"label\": \"<3-6 word trend name>\", \"summary\": \"<one or two sentences describing the behavior>\"}.";

/// Label-generation steps. Each transition names the condition that moves
/// it forward.
enum LabelStep {
    /// Ask the service. A transport error goes to `Fallback`.
    Attempt,
    /// Parse the reply. Malformed JSON or a blank field goes to `Fallback`.
    Parse(String),
    Fallback(String),
    Done(LabelText, bool),
}

pub struct ClusterLabeler {
    store: Arc<dyn Store>,
    llm: Option<Arc<dyn LlmClient>>,
    config: PipelineConfig,
    params: CompletionParams,
}

impl ClusterLabeler {
    pub fn new(
        store: Arc<dyn Store>,
        llm: Option<Arc<dyn LlmClient>>,
        config: PipelineConfig,
    ) -> Self {
        Self {
            store,
            llm,
            config,
            params: CompletionParams {
                json_mode: true,
                ..CompletionParams::default()
            },
        }
    }

    pub fn with_params(mut self, params: CompletionParams) -> Self {
        self.params = CompletionParams {
            json_mode: true,
            ..params
        };
        self
    }

    pub async fn run(&self) -> Result<LabelSummary> {
        let clusters = self.store.list_clusters().await?;
        let mut summary = LabelSummary::default();

        for mut cluster in clusters.into_iter().filter(BehaviorCluster::needs_labeling) {
            match self.label_cluster(&mut cluster).await {
                Ok(used_llm) => {
                    summary.labeled += 1;
                    if used_llm {
                        summary.llm_labels += 1;
                    } else {
                        summary.heuristic_labels += 1;
                    }
                }
                Err(e) => tracing::warn!(cluster_id = %cluster.id, "Failed to label cluster: {:#}", e),
            }
        }

        tracing::info!(
            labeled = summary.labeled,
            llm = summary.llm_labels,
            heuristic = summary.heuristic_labels,
            "Cluster labeling complete"
        );
        Ok(summary)
    }

    /// Returns whether the text-generation service produced the label.
    async fn label_cluster(&self, cluster: &mut BehaviorCluster) -> Result<bool> {
        let samples: Vec<String> = self
            .store
            .cluster_sample(cluster.id, self.config.label_sample_size)
            .await?
            .iter()
            .map(|item| item.text())
            .collect();
        let phrases = extract_phrases(&samples);

        let (text, used_llm) = match &self.llm {
            Some(client) => self.generate(client.as_ref(), &phrases, &samples, cluster).await,
            None => (heuristic_label(&phrases, cluster.content_count_total), false),
        };

        cluster.label = text.label;
        cluster.summary = text.summary;
        cluster.top_phrases = phrases;
        cluster.growth_score =
            growth_score(cluster.content_count_last_7d, cluster.content_count_total);
        cluster.updated_at = chrono::Utc::now();
        self.store.update_cluster(cluster).await?;

        tracing::debug!(cluster_id = %cluster.id, label = %cluster.label, used_llm, "Labeled cluster");
        Ok(used_llm)
    }

    async fn generate(
        &self,
        client: &dyn LlmClient,
        phrases: &[String],
        samples: &[String],
        cluster: &BehaviorCluster,
    ) -> (LabelText, bool) {
        let mut step = LabelStep::Attempt;
        loop {
            step = match step {
                LabelStep::Attempt => {
                    let prompt = build_prompt(phrases, samples, self.config.llm_sample_size);
                    match client
                        .complete(LABEL_SYSTEM_PROMPT, vec![Message::user(prompt)], self.params.clone())
                        .await
                    {
                        Ok(response) => LabelStep::Parse(response.text),
                        Err(e) => LabelStep::Fallback(format!("request failed: {:#}", e)),
                    }
                }
                LabelStep::Parse(raw) => match parse_json_object::<LabelText>(&raw) {
                    Ok(text) if !text.label.trim().is_empty() && !text.summary.trim().is_empty() => {
                        LabelStep::Done(
                            LabelText {
                                label: text.label.trim().to_string(),
                                summary: text.summary.trim().to_string(),
                            },
                            true,
                        )
                    }
                    Ok(_) => LabelStep::Fallback("reply had an empty label or summary".to_string()),
                    Err(e) => LabelStep::Fallback(format!("unparseable reply: {:#}", e)),
                },
                LabelStep::Fallback(reason) => {
                    tracing::warn!(cluster_id = %cluster.id, "LLM labeling fell back to heuristic: {}", reason);
                    LabelStep::Done(heuristic_label(phrases, cluster.content_count_total), false)
                }
                LabelStep::Done(text, used_llm) => return (text, used_llm),
            };
        }
    }
}

fn build_prompt(phrases: &[String], samples: &[String], sample_limit: usize) -> String {
    let mut prompt = String::from("Frequent phrases:\n");
    for phrase in phrases {
        prompt.push_str("- ");
        prompt.push_str(phrase);
        prompt.push('\n');
    }
    prompt.push_str("\nSample posts:\n");
    for (i, sample) in samples.iter().take(sample_limit).enumerate() {
        let excerpt: String = sample.chars().take(500).collect();
        prompt.push_str(&format!("{}. {}\n", i + 1, excerpt.replace('\n', " ")));
    }
    prompt
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use datepulse_core::{ClusterMembership, ContentItem, Embedding, Language, Platform};
    use datepulse_reasoning::providers::MockProvider;
    use datepulse_store::MemoryStore;

    #[test]
    fn test_extract_phrases_counts_boosts_and_filters() {
        let texts = [
            "Got ghosted after the first date, again!",
            "Ghosted after the first date. Why does this keep happening?",
            "Cooking pasta tonight, cooking pasta tomorrow, cooking pasta forever",
        ];
        let phrases = extract_phrases(&texts);
        assert!(phrases.len() <= TOP_PHRASE_COUNT);
        // Dating phrases seen twice are boosted to 4 and outrank "cooking pasta" at 3.
        assert_eq!(
            &phrases[..4],
            &["first date", "ghosted after", "ghosted after the", "the first date"]
        );
        assert_eq!(phrases[4], "cooking pasta");
        assert!(phrases.iter().all(|p| p != "after the"));
        assert!(phrases.iter().all(|p| p.split(' ').all(|w| w.len() > 2)));
    }

    #[test]
    fn test_heuristic_label() {
        let phrases = vec![
            "ghosted after".to_string(),
            "first date".to_string(),
            "keep happening".to_string(),
            "ignored".to_string(),
        ];
        let text = heuristic_label(&phrases, 25);
        assert_eq!(text.label, "Ghosted After");
        assert_eq!(
            text.summary,
            "A group of 25 related posts frequently mentioning \"ghosted after\", \"first date\" and \"keep happening\"."
        );

        let empty = heuristic_label(&[], 3);
        assert_eq!(empty.label, FALLBACK_LABEL);
    }

    async fn seeded_cluster(store: &MemoryStore) -> BehaviorCluster {
        let mut cluster = BehaviorCluster::new(Embedding::new(vec![1.0, 0.0]).unwrap());
        cluster.content_count_total = 3;
        cluster.content_count_last_7d = 3;
        store.insert_cluster(&cluster).await.unwrap();
        for (i, body) in [
            "my match stopped texting after the first date",
            "she stopped texting after the first date too",
            "he stopped texting right after our first date",
        ]
        .iter()
        .enumerate()
        {
            let mut item = ContentItem::new(Platform::Reddit, format!("p{}", i), *body, Utc::now());
            item.language = Language::En;
            store.insert_content(&item).await.unwrap();
            store
                .upsert_membership(&ClusterMembership {
                    cluster_id: cluster.id,
                    content_id: item.id,
                    similarity: 0.9,
                    assigned_at: Utc::now(),
                })
                .await
                .unwrap();
        }
        cluster
    }

    #[tokio::test]
    async fn test_llm_label_is_used_when_valid() {
        let store = Arc::new(MemoryStore::new());
        let cluster = seeded_cluster(&store).await;
        let llm = MockProvider::with_reply(
            "Sure! ```json\n{\"label\": \"Post-Date Silence\", \"summary\": \"Matches go quiet after a first date.\"}\n```",
        );
        let labeler = ClusterLabeler::new(store.clone(), Some(Arc::new(llm)), PipelineConfig::default());

        let summary = labeler.run().await.unwrap();
        assert_eq!(summary.llm_labels, 1);

        let stored = store.get_cluster(cluster.id).await.unwrap().unwrap();
        assert_eq!(stored.label, "Post-Date Silence");
        assert!(stored.top_phrases.contains(&"stopped texting".to_string()));
        assert!((stored.growth_score - 4.29).abs() < 1e-9);
        assert!(!stored.needs_labeling());

        // Labeled clusters are left alone on the next run.
        assert_eq!(labeler.run().await.unwrap().labeled, 0);
    }

    #[tokio::test]
    async fn test_malformed_or_failed_llm_falls_back() {
        for llm in [MockProvider::with_reply("I cannot do that."), MockProvider::failing()] {
            let store = Arc::new(MemoryStore::new());
            let cluster = seeded_cluster(&store).await;
            let labeler =
                ClusterLabeler::new(store.clone(), Some(Arc::new(llm)), PipelineConfig::default());

            let summary = labeler.run().await.unwrap();
            assert_eq!(summary.heuristic_labels, 1);
            let stored = store.get_cluster(cluster.id).await.unwrap().unwrap();
            assert_eq!(stored.label, "First Date");
        }
    }
}
