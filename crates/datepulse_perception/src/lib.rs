pub mod feed;
pub mod ingest;
pub mod jsonl;
pub mod source;

pub use feed::RssSource;
pub use ingest::Ingestor;
pub use jsonl::JsonlSource;
pub use source::Source;
