//! Fixed-duration chunking with overlap.
//!
//! The buffer is walked in strides of `chunk - overlap`. The last chunk is
//! truncated at the buffer end instead of padded, and is always emitted.
//! Dropping each chunk's leading overlap (the first has none) leaves
//! contiguous, non-overlapping coverage of the whole buffer.

use crate::audio::AudioBuffer;
use crate::error::{AsrError, Result};
use std::ops::Range;

/// A contiguous sample range of the canonical buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Chunk {
    /// Sequence index, starting at 0.
    pub index: usize,
    /// First sample (inclusive).
    pub start: usize,
    /// Last sample (exclusive).
    pub end: usize,
    /// Samples shared with the previous chunk; 0 for the first chunk.
    pub overlap: usize,
}

impl Chunk {
    pub fn len(&self) -> usize {
        self.end - self.start
    }

    pub fn is_empty(&self) -> bool {
        self.end == self.start
    }

    pub fn range(&self) -> Range<usize> {
        self.start..self.end
    }

    /// The part of this chunk not already covered by its predecessor.
    pub fn trimmed(&self) -> Range<usize> {
        (self.start + self.overlap)..self.end
    }
}

/// Validated chunk and overlap durations.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Chunker {
    chunk_secs: f64,
    overlap_secs: f64,
}

impl Chunker {
    /// # Errors
    /// `InvalidParameter` unless `chunk_secs > 0`, `overlap_secs >= 0` and
    /// `overlap_secs < chunk_secs`, all finite.
    pub fn new(chunk_secs: f64, overlap_secs: f64) -> Result<Self> {
        if !chunk_secs.is_finite() || chunk_secs <= 0.0 {
            return Err(AsrError::invalid_parameter(
                "chunk_secs",
                format!("must be a positive number of seconds, got {chunk_secs}"),
            ));
        }
        if !overlap_secs.is_finite() || overlap_secs < 0.0 {
            return Err(AsrError::invalid_parameter(
                "overlap_secs",
                format!("must be zero or a positive number of seconds, got {overlap_secs}"),
            ));
        }
        if overlap_secs >= chunk_secs {
            return Err(AsrError::invalid_parameter(
                "overlap_secs",
                format!("overlap ({overlap_secs}s) must be shorter than the chunk ({chunk_secs}s)"),
            ));
        }
        Ok(Self {
            chunk_secs,
            overlap_secs,
        })
    }

    pub fn chunk_secs(&self) -> f64 {
        self.chunk_secs
    }

    pub fn overlap_secs(&self) -> f64 {
        self.overlap_secs
    }

    /// Plan the chunks of `buffer`.
    pub fn split(&self, buffer: &AudioBuffer) -> Result<ChunkPlan> {
        self.plan(buffer.len(), buffer.sample_rate())
    }

    /// Plan the chunks of `total` samples at `sample_rate`.
    ///
    /// # Errors
    /// `InvalidParameter` when the durations round to an unusable sample
    /// count at this rate, or to more samples than can be addressed.
    pub fn plan(&self, total: usize, sample_rate: u32) -> Result<ChunkPlan> {
        let chunk_samples = (self.chunk_secs * sample_rate as f64).round();
        if chunk_samples >= usize::MAX as f64 {
            return Err(AsrError::invalid_parameter(
                "chunk_secs",
                format!("{}s is too long to represent at {sample_rate} Hz", self.chunk_secs),
            ));
        }
        // overlap_secs < chunk_secs keeps the overlap in range as well.
        let chunk_len = chunk_samples as usize;
        let overlap = (self.overlap_secs * sample_rate as f64).round() as usize;
        if chunk_len == 0 {
            return Err(AsrError::invalid_parameter(
                "chunk_secs",
                format!("{}s is shorter than one sample at {sample_rate} Hz", self.chunk_secs),
            ));
        }
        if overlap >= chunk_len {
            return Err(AsrError::invalid_parameter(
                "overlap_secs",
                format!("overlap rounds to the full chunk length at {sample_rate} Hz"),
            ));
        }
        Ok(ChunkPlan {
            total,
            chunk_len,
            overlap,
            sample_rate,
        })
    }
}

/// Shorthand for `Chunker::new(chunk_secs, overlap_secs)?.split(buffer)`.
pub fn split(buffer: &AudioBuffer, chunk_secs: f64, overlap_secs: f64) -> Result<ChunkPlan> {
    Chunker::new(chunk_secs, overlap_secs)?.split(buffer)
}

/// Lazily-evaluated chunk layout. Iterate as often as needed; every pass
/// yields the same chunks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkPlan {
    total: usize,
    chunk_len: usize,
    overlap: usize,
    sample_rate: u32,
}

impl ChunkPlan {
    pub fn iter(&self) -> Chunks {
        Chunks {
            plan: *self,
            next: Some((0, 0)),
        }
    }

    /// Number of chunks this plan yields.
    pub fn len(&self) -> usize {
        if self.total == 0 {
            return 0;
        }
        if self.total <= self.chunk_len {
            return 1;
        }
        1 + (self.total - self.chunk_len).div_ceil(self.stride())
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stride(&self) -> usize {
        self.chunk_len - self.overlap
    }

    pub fn chunk_len(&self) -> usize {
        self.chunk_len
    }

    pub fn overlap(&self) -> usize {
        self.overlap
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn total_samples(&self) -> usize {
        self.total
    }

    /// Convert a sample offset to seconds.
    pub fn secs(&self, samples: usize) -> f64 {
        samples as f64 / self.sample_rate as f64
    }
}

impl IntoIterator for &ChunkPlan {
    type Item = Chunk;
    type IntoIter = Chunks;

    fn into_iter(self) -> Chunks {
        self.iter()
    }
}

impl IntoIterator for ChunkPlan {
    type Item = Chunk;
    type IntoIter = Chunks;

    fn into_iter(self) -> Chunks {
        self.iter()
    }
}

/// Iterator over a [`ChunkPlan`].
#[derive(Debug, Clone)]
pub struct Chunks {
    plan: ChunkPlan,
    /// (index, start) of the next chunk, or `None` once exhausted.
    next: Option<(usize, usize)>,
}

impl Iterator for Chunks {
    type Item = Chunk;

    fn next(&mut self) -> Option<Chunk> {
        let (index, start) = self.next?;
        let plan = &self.plan;
        if plan.total == 0 {
            self.next = None;
            return None;
        }

        let end = (start + plan.chunk_len).min(plan.total);
        self.next = if end >= plan.total {
            None
        } else {
            Some((index + 1, start + plan.stride()))
        };

        Some(Chunk {
            index,
            start,
            end,
            overlap: if index == 0 { 0 } else { plan.overlap },
        })
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        let remaining = match self.next {
            Some((index, _)) => self.plan.len().saturating_sub(index),
            None => 0,
        };
        (remaining, Some(remaining))
    }
}

impl ExactSizeIterator for Chunks {}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer(secs: f64) -> AudioBuffer {
        let samples = (secs * 16000.0).round() as usize;
        AudioBuffer::new(vec![0i16; samples], 16000).unwrap()
    }

    fn bounds_secs(plan: &ChunkPlan) -> Vec<(f64, f64)> {
        plan.iter()
            .map(|c| (plan.secs(c.start), plan.secs(c.end)))
            .collect()
    }

    #[test]
    fn test_twenty_seconds_eight_with_one_overlap() {
        let plan = split(&buffer(20.0), 8.0, 1.0).unwrap();
        assert_eq!(plan.len(), 3);
        assert_eq!(
            bounds_secs(&plan),
            vec![(0.0, 8.0), (7.0, 15.0), (14.0, 20.0)]
        );
        let overlaps: Vec<usize> = plan.iter().map(|c| c.overlap).collect();
        assert_eq!(overlaps, vec![0, 16000, 16000]);
    }

    #[test]
    fn test_short_buffer_yields_single_chunk() {
        let plan = split(&buffer(2.5), 30.0, 1.0).unwrap();
        let chunks: Vec<Chunk> = plan.iter().collect();
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].range(), 0..40000);
        assert_eq!(chunks[0].overlap, 0);
    }

    #[test]
    fn test_exact_fit_does_not_emit_empty_tail() {
        // 16s with 8s chunks, no overlap: exactly two chunks.
        let plan = split(&buffer(16.0), 8.0, 0.0).unwrap();
        assert_eq!(bounds_secs(&plan), vec![(0.0, 8.0), (8.0, 16.0)]);
    }

    #[test]
    fn test_final_chunk_is_truncated_not_dropped() {
        let plan = split(&buffer(8.5), 4.0, 0.0).unwrap();
        let last = plan.iter().last().unwrap();
        assert_eq!(last.index, 2);
        assert_eq!(last.len(), 8000);
    }

    #[test]
    fn test_rejects_overlap_not_shorter_than_chunk() {
        for (chunk, overlap) in [(5.0, 5.0), (5.0, 6.0)] {
            match Chunker::new(chunk, overlap) {
                Err(AsrError::InvalidParameter { name, .. }) => assert_eq!(name, "overlap_secs"),
                other => panic!("Expected InvalidParameter, got {other:?}"),
            }
        }
    }

    #[test]
    fn test_rejects_non_positive_or_non_finite_durations() {
        assert!(Chunker::new(0.0, 0.0).is_err());
        assert!(Chunker::new(-1.0, 0.0).is_err());
        assert!(Chunker::new(f64::NAN, 0.0).is_err());
        assert!(Chunker::new(10.0, -0.5).is_err());
        assert!(Chunker::new(f64::INFINITY, 1.0).is_err());
    }

    #[test]
    fn test_rejects_chunk_shorter_than_one_sample() {
        let chunker = Chunker::new(0.00001, 0.0).unwrap();
        assert!(matches!(
            chunker.plan(16000, 16000),
            Err(AsrError::InvalidParameter { .. })
        ));
    }

    #[test]
    fn test_rejects_chunk_too_long_to_address() {
        let err = Chunker::new(1e300, 1e299).unwrap().plan(16000, 16000).unwrap_err();
        match err {
            AsrError::InvalidParameter { name, message } => {
                assert_eq!(name, "chunk_secs");
                assert!(message.contains("too long"), "got: {message}");
            }
            other => panic!("Expected InvalidParameter, got {other:?}"),
        }
        // Long but addressable durations still plan a single chunk.
        let plan = Chunker::new(1e6, 1.0).unwrap().plan(16000, 16000).unwrap();
        assert_eq!(plan.len(), 1);
    }

    #[test]
    fn test_trimmed_chunks_reconstruct_buffer() {
        for total in [1usize, 999, 16000, 160_001, 320_000, 487_313] {
            for (chunk, overlap) in [(1.0, 0.0), (8.0, 1.0), (3.0, 2.5), (30.0, 1.0)] {
                let plan = Chunker::new(chunk, overlap)
                    .unwrap()
                    .plan(total, 16000)
                    .unwrap();
                let mut cursor = 0;
                for c in &plan {
                    let trimmed = c.trimmed();
                    assert_eq!(trimmed.start, cursor, "gap or overlap at chunk {}", c.index);
                    assert!(c.end <= total);
                    assert!(c.overlap < c.len());
                    cursor = trimmed.end;
                }
                assert_eq!(cursor, total, "total={total} chunk={chunk} overlap={overlap}");
            }
        }
    }

    #[test]
    fn test_plan_is_restartable() {
        let plan = split(&buffer(20.0), 8.0, 1.0).unwrap();
        let first: Vec<Chunk> = plan.iter().collect();
        let second: Vec<Chunk> = (&plan).into_iter().collect();
        assert_eq!(first, second);

        let mut iter = plan.iter();
        iter.next();
        let resumed = iter.clone();
        assert_eq!(iter.collect::<Vec<_>>(), resumed.collect::<Vec<_>>());
    }

    #[test]
    fn test_len_matches_iteration_and_indices_increase() {
        let plan = split(&buffer(95.3), 10.0, 2.0).unwrap();
        assert_eq!(plan.iter().len(), plan.len());
        let indices: Vec<usize> = plan.iter().map(|c| c.index).collect();
        assert_eq!(indices, (0..plan.len()).collect::<Vec<_>>());
    }
}
