pub mod config;
pub mod error;
pub mod model;
pub mod store;
pub mod vector;

pub use config::{DatepulseConfig, EmbeddingConfig, LlmConfig, PipelineConfig, StoreConfig};
pub use error::{BreakdownError, ConfigError, VectorError};
pub use model::{
    growth_score, AssignmentMethod, BehaviorCluster, ClusterMembership, ContentItem,
    ContentMetadata, DerivedOpportunity, IngestionRun, Language, MembershipStats,
    OpportunityCard, OpportunityStatus, Persona, PersonaClusterLink, Platform, RunStatus,
    Severity, PLACEHOLDER_LABEL,
};
pub use store::Store;
pub use vector::{cosine_similarity, Embedding, SourceBreakdown};
