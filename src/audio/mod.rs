//! Audio input and normalisation.
//!
//! ```text
//! upload bytes ──┐
//!                ├──▶ AudioCodec::decode ──▶ AudioBuffer (mono, 16 kHz, i16)
//! mic capture ───┘
//! ```

pub mod buffer;
#[cfg(feature = "cpal-audio")]
pub mod capture;
pub mod codec;

pub use buffer::{AudioBuffer, AudioInput, CaptureBuffer};
pub use codec::{AudioCodec, encode_wav};
