//! Ordered merge of chunk results.
//!
//! Results are joined in index order with single spaces, whatever order
//! they completed in. When a chunk's predecessor was also transcribed, the
//! two share `overlap_secs` of audio:
//!
//! - with per-word timings, words starting inside the overlap are dropped,
//!   since the predecessor already produced them;
//! - otherwise the full chunk text is kept and the merge reports
//!   [`OverlapTrimming::Untrimmed`]. Words spoken across that boundary may
//!   then appear twice. An empty timing list, or entries spanning several
//!   words (segment timings), count as no timings.
//!
//! A chunk whose predecessor is missing (partial-result mode) keeps its
//! whole text, as nothing else covers its overlap.

use crate::pipeline::types::{ChunkResult, OverlapTrimming};
use crate::stt::model::WordTiming;
use std::collections::BTreeMap;

/// Merged text and how overlaps were handled.
#[derive(Debug, Clone, PartialEq)]
pub struct Merged {
    pub text: String,
    pub trimming: OverlapTrimming,
}

pub fn merge(results: &[ChunkResult]) -> Merged {
    let ordered: BTreeMap<usize, &ChunkResult> = results.iter().map(|r| (r.index, r)).collect();

    let mut pieces: Vec<String> = Vec::with_capacity(ordered.len());
    let mut trimmed_any = false;
    let mut untrimmed_any = false;

    for (&index, result) in &ordered {
        let shares_audio = index > 0
            && result.overlap_secs > 0.0
            && ordered.contains_key(&(index - 1));

        let trimmed = if shares_audio {
            word_timings(result).map(|words| drop_overlap(words, result.overlap_secs))
        } else {
            None
        };
        let text = match trimmed {
            Some(text) => {
                trimmed_any = true;
                text
            }
            None => {
                untrimmed_any |= shares_audio;
                result.text.trim().to_string()
            }
        };

        if !text.is_empty() {
            pieces.push(text);
        }
    }

    let trimming = if untrimmed_any {
        OverlapTrimming::Untrimmed
    } else if trimmed_any {
        OverlapTrimming::Timestamps
    } else {
        OverlapTrimming::NotNeeded
    };

    Merged {
        text: pieces.join(" "),
        trimming,
    }
}

/// Timings usable for trimming: at least one entry, each a single word.
fn word_timings(result: &ChunkResult) -> Option<&[WordTiming]> {
    let words = result.words.as_deref()?;
    let per_word = !words.is_empty()
        && words
            .iter()
            .all(|w| !w.word.trim().contains(char::is_whitespace));
    per_word.then_some(words)
}

fn drop_overlap(words: &[WordTiming], overlap_secs: f64) -> String {
    words
        .iter()
        .filter(|w| w.start >= overlap_secs)
        .map(|w| w.word.trim())
        .filter(|w| !w.is_empty())
        .collect::<Vec<_>>()
        .join(" ")
}
