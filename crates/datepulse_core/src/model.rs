use crate::vector::{Embedding, SourceBreakdown};
use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Label carried by a cluster until the labeler has named it.
pub const PLACEHOLDER_LABEL: &str = "Unlabeled Cluster";

/// Window used for the "recent activity" counters.
pub const RECENT_WINDOW_DAYS: i64 = 7;

/// Window the growth score compares recent activity against.
pub const GROWTH_BASELINE_DAYS: f64 = 30.0;

// ============================================================================
// Enums
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Reddit,
    Youtube,
    Rss,
}

impl Platform {
    pub fn as_str(&self) -> &'static str {
        match self {
            Platform::Reddit => "reddit",
            Platform::Youtube => "youtube",
            Platform::Rss => "rss",
        }
    }
}

impl fmt::Display for Platform {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Platform {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "reddit" => Ok(Platform::Reddit),
            "youtube" => Ok(Platform::Youtube),
            "rss" => Ok(Platform::Rss),
            other => anyhow::bail!("unknown platform '{}'", other),
        }
    }
}

/// Detected language. Raw items arrive as `Unknown`; the cleaner resolves
/// them to `En` or deletes them.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    #[default]
    Unknown,
    En,
    Other,
}

impl Language {
    pub fn as_str(&self) -> &'static str {
        match self {
            Language::Unknown => "unknown",
            Language::En => "en",
            Language::Other => "other",
        }
    }
}

impl FromStr for Language {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "unknown" => Ok(Language::Unknown),
            "en" => Ok(Language::En),
            "other" => Ok(Language::Other),
            other => anyhow::bail!("unknown language tag '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentMethod {
    #[default]
    Auto,
    Manual,
}

impl AssignmentMethod {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentMethod::Auto => "auto",
            AssignmentMethod::Manual => "manual",
        }
    }
}

impl FromStr for AssignmentMethod {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "auto" => Ok(AssignmentMethod::Auto),
            "manual" => Ok(AssignmentMethod::Manual),
            other => anyhow::bail!("unknown assignment method '{}'", other),
        }
    }
}

/// User-controlled triage state of an opportunity card.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OpportunityStatus {
    #[default]
    New,
    Reviewed,
    InDiscovery,
    NotRelevant,
}

impl OpportunityStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            OpportunityStatus::New => "new",
            OpportunityStatus::Reviewed => "reviewed",
            OpportunityStatus::InDiscovery => "in_discovery",
            OpportunityStatus::NotRelevant => "not_relevant",
        }
    }
}

impl fmt::Display for OpportunityStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpportunityStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "new" => Ok(OpportunityStatus::New),
            "reviewed" => Ok(OpportunityStatus::Reviewed),
            "in_discovery" => Ok(OpportunityStatus::InDiscovery),
            "not_relevant" => Ok(OpportunityStatus::NotRelevant),
            other => anyhow::bail!("unknown opportunity status '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Severity::Low => "low",
            Severity::Medium => "medium",
            Severity::High => "high",
            Severity::Critical => "critical",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Severity {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "low" => Ok(Severity::Low),
            "medium" => Ok(Severity::Medium),
            "high" => Ok(Severity::High),
            "critical" => Ok(Severity::Critical),
            other => anyhow::bail!("unknown severity '{}'", other),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RunStatus {
    Running,
    Completed,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Completed => "completed",
            RunStatus::Failed => "failed",
        }
    }
}

impl FromStr for RunStatus {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "completed" => Ok(RunStatus::Completed),
            "failed" => Ok(RunStatus::Failed),
            other => anyhow::bail!("unknown run status '{}'", other),
        }
    }
}

// ============================================================================
// Content
// ============================================================================

/// Source-specific extras kept alongside a post or video.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ContentMetadata {
    pub author: Option<String>,
    pub url: Option<String>,
    pub score: Option<i64>,
    pub extra: BTreeMap<String, String>,
}

/// A single ingested post or video.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentItem {
    pub id: Uuid,
    pub platform: Platform,
    /// Platform-side id, unique per platform. Used for dedup on ingest.
    pub source_id: String,
    pub title: Option<String>,
    pub body: String,
    pub published_at: DateTime<Utc>,
    #[serde(default)]
    pub language: Language,
    #[serde(default)]
    pub embedding: Option<Embedding>,
    #[serde(default)]
    pub metadata: ContentMetadata,
}

impl ContentItem {
    pub fn new(
        platform: Platform,
        source_id: impl Into<String>,
        body: impl Into<String>,
        published_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            platform,
            source_id: source_id.into(),
            title: None,
            body: body.into(),
            published_at,
            language: Language::Unknown,
            embedding: None,
            metadata: ContentMetadata::default(),
        }
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = Some(title.into());
        self
    }

    /// Title and body joined, the text every stage analyzes.
    pub fn text(&self) -> String {
        match &self.title {
            Some(title) if !title.trim().is_empty() => format!("{}\n{}", title, self.body),
            _ => self.body.clone(),
        }
    }
}

// ============================================================================
// Clusters
// ============================================================================

/// An emergent grouping of semantically similar content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BehaviorCluster {
    pub id: Uuid,
    pub label: String,
    pub summary: String,
    pub top_phrases: Vec<String>,
    pub content_count_total: u32,
    pub content_count_last_7d: u32,
    pub source_breakdown: SourceBreakdown,
    pub centroid: Embedding,
    /// 1.0 means recent activity matches a uniform 30-day spread.
    pub growth_score: f64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl BehaviorCluster {
    pub fn new(centroid: Embedding) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            label: PLACEHOLDER_LABEL.to_string(),
            summary: String::new(),
            top_phrases: Vec::new(),
            content_count_total: 0,
            content_count_last_7d: 0,
            source_breakdown: SourceBreakdown::default(),
            centroid,
            growth_score: 1.0,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn needs_labeling(&self) -> bool {
        self.label == PLACEHOLDER_LABEL || self.top_phrases.is_empty()
    }

    /// Replace the membership counters, breakdown and growth score together.
    pub fn apply_stats(&mut self, stats: &MembershipStats) {
        self.content_count_total = stats.total;
        self.content_count_last_7d = stats.last_7d.min(stats.total);
        self.source_breakdown = stats.breakdown.clone();
        self.growth_score = growth_score(self.content_count_last_7d, self.content_count_total);
        self.updated_at = Utc::now();
    }
}

/// Counters derived from a cluster's full member set.
#[derive(Debug, Clone, PartialEq)]
pub struct MembershipStats {
    pub total: u32,
    pub last_7d: u32,
    pub breakdown: SourceBreakdown,
}

impl MembershipStats {
    pub fn from_members<'a, I>(members: I, now: DateTime<Utc>) -> Self
    where
        I: IntoIterator<Item = &'a ContentItem>,
    {
        let recent_cutoff = now - Duration::days(RECENT_WINDOW_DAYS);
        let mut total = 0u32;
        let mut last_7d = 0u32;
        let mut platforms = Vec::new();
        for item in members {
            total += 1;
            if item.published_at >= recent_cutoff {
                last_7d += 1;
            }
            platforms.push(item.platform);
        }
        Self {
            total,
            last_7d,
            breakdown: SourceBreakdown::from_platforms(platforms),
        }
    }
}

/// Ratio of 7-day density to the density a uniform 30-day spread implies,
/// rounded to two decimals. Zero for an empty cluster.
pub fn growth_score(last_7d: u32, total: u32) -> f64 {
    if total == 0 {
        return 0.0;
    }
    let recent_share = last_7d as f64 / total as f64;
    let expected_share = RECENT_WINDOW_DAYS as f64 / GROWTH_BASELINE_DAYS;
    ((recent_share / expected_share) * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClusterMembership {
    pub cluster_id: Uuid,
    pub content_id: Uuid,
    /// Cosine similarity to the centroid at assignment time.
    pub similarity: f32,
    pub assigned_at: DateTime<Utc>,
}

// ============================================================================
// Personas
// ============================================================================

/// A seeded user archetype. Read-only to the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Persona {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub pain_points: Vec<String>,
    #[serde(default)]
    pub typical_behaviors: Vec<String>,
    #[serde(default)]
    pub goals: Vec<String>,
}

impl Persona {
    /// Terms the mapper matches a cluster against.
    pub fn match_terms(&self) -> impl Iterator<Item = &str> {
        self.keywords
            .iter()
            .chain(&self.pain_points)
            .chain(&self.typical_behaviors)
            .map(String::as_str)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersonaClusterLink {
    pub persona_id: Uuid,
    pub cluster_id: Uuid,
    /// Always within [0, 1].
    pub association_score: f64,
    pub assignment_method: AssignmentMethod,
    pub created_at: DateTime<Utc>,
}

// ============================================================================
// Opportunities
// ============================================================================

/// Pipeline-computed fields of an opportunity card. Recomputed on every
/// qualifying run; the user-controlled `status` and `notes` are not part of it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DerivedOpportunity {
    pub title: String,
    pub problem_statement: String,
    pub signals_summary: String,
    pub why_now: String,
    pub severity: Severity,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpportunityCard {
    pub id: Uuid,
    pub title: String,
    pub problem_statement: String,
    pub signals_summary: String,
    pub why_now: String,
    pub status: OpportunityStatus,
    pub severity: Severity,
    pub confidence: f64,
    pub notes: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl OpportunityCard {
    pub fn from_derived(derived: DerivedOpportunity) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            title: derived.title,
            problem_statement: derived.problem_statement,
            signals_summary: derived.signals_summary,
            why_now: derived.why_now,
            status: OpportunityStatus::New,
            severity: derived.severity,
            confidence: derived.confidence,
            notes: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Overwrite the derived fields, leaving status and notes alone.
    pub fn apply_derived(&mut self, derived: &DerivedOpportunity) {
        self.title = derived.title.clone();
        self.problem_statement = derived.problem_statement.clone();
        self.signals_summary = derived.signals_summary.clone();
        self.why_now = derived.why_now.clone();
        self.severity = derived.severity;
        self.confidence = derived.confidence;
        self.updated_at = Utc::now();
    }
}

// ============================================================================
// Ingestion runs
// ============================================================================

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IngestionRun {
    pub id: Uuid,
    pub source: String,
    pub status: RunStatus,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub items_processed: u32,
    pub items_ingested: u32,
    pub error: Option<String>,
}

impl IngestionRun {
    pub fn start(source: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4(),
            source: source.into(),
            status: RunStatus::Running,
            started_at: Utc::now(),
            completed_at: None,
            items_processed: 0,
            items_ingested: 0,
            error: None,
        }
    }

    pub fn complete(&mut self, processed: u32, ingested: u32) {
        self.status = RunStatus::Completed;
        self.completed_at = Some(Utc::now());
        self.items_processed = processed;
        self.items_ingested = ingested;
    }

    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = RunStatus::Failed;
        self.completed_at = Some(Utc::now());
        self.error = Some(error.into());
    }
}
