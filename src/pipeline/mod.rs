//! Request pipeline: decode, chunk, dispatch, merge.
//!
//! [`TranscriptionPipeline`] owns the per-request flow. The codec and chunker
//! are pure in-memory transforms; only decoding and the backend calls
//! suspend.

pub mod chunker;
pub mod merge;
pub mod orchestrator;
pub mod types;

pub use chunker::{Chunk, ChunkPlan, Chunker, split};
pub use merge::{Merged, merge};
pub use orchestrator::TranscriptionPipeline;
pub use types::{
    ChunkDiagnostics, ChunkResult, ChunkStatus, Execution, OverlapTrimming, PipelineState,
    Transcript, TranscriptionRequest,
};
