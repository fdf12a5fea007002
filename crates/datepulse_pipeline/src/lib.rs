pub mod cleaner;
pub mod clustering;
pub mod embedder;
pub mod labeler;
pub mod opportunities;
pub mod persona_mapper;
pub mod runner;

pub use cleaner::{CleanSummary, ContentCleaner};
pub use clustering::{ClusterSummary, ClusteringEngine};
pub use embedder::{EmbedSummary, EmbeddingGenerator};
pub use labeler::{ClusterLabeler, LabelSummary};
pub use opportunities::{OpportunityGenerator, OpportunitySummary};
pub use persona_mapper::{MappingSummary, PersonaMapper};
pub use runner::{render_table, PipelineRunner, Stage, StageReport, StageSummary};
