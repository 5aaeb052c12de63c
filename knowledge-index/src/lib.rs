//! Reference-document retrieval: chunking, scoring and the `search`/`read`
//! service used both in-process and by the loopback sidecar.

pub mod chunk;
pub mod index;
pub mod scorer;
pub mod segmenter;
pub mod server;
pub mod service;

pub use chunk::{KnowledgeChunk, Query, Section};
pub use index::{KnowledgeIndex, LoadSummary, ScoredChunk};
pub use scorer::{OverlapScorer, Scorer};
pub use segmenter::{DeclarationSegmenter, HeadingSegmenter, Segmenter};
pub use service::ReferenceService;
