//! Speech-to-text backends.
//!
//! ```text
//! ModelRegistry ──resolve(id)──▶ Arc<dyn AsrModel>
//!                                  ├─ RemoteModel        (HTTP services)
//!                                  ├─ LocalWhisperModel  (whisper.cpp, feature "whisper")
//!                                  └─ MockModel          (tests, offline runs)
//! ```

pub mod mock;
pub mod model;
pub mod registry;
#[cfg(feature = "remote")]
pub mod remote;
#[cfg(feature = "whisper")]
pub mod whisper;

pub use mock::MockModel;
pub use model::{
    AsrModel, Capabilities, ChunkRequest, ChunkTranscription, DecodingParams, ModelDescriptor,
    Task, WordTiming,
};
pub use registry::{ModelRegistry, ModelRegistryBuilder};
#[cfg(feature = "remote")]
pub use remote::{RemoteFlavor, RemoteModel, RemoteSettings};
#[cfg(feature = "whisper")]
pub use whisper::{LocalWhisperModel, WhisperSettings};
