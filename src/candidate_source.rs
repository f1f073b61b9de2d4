//! The opaque external candidate collaborator (§4.2).
//!
//! Grounded on `engine.rs`'s `SyllableParser`: a generic, pluggable
//! collaborator that `Engine<P>` calls into but never introspects. Here the
//! collaborator is behind a trait object instead of a generic parameter
//! because the Orchestrator needs to hold zero-or-one of them uniformly
//! across sessions, not monomorphize per source type.

use crate::dictionary::WordEntry;

/// A candidate already resolved to text, independent of any dictionary entry
/// — e.g. produced by an external phonetic-segmentation engine.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExternalCandidate {
    pub text: String,
    pub frequency: u64,
    pub comment: Option<String>,
}

impl From<WordEntry> for ExternalCandidate {
    fn from(w: WordEntry) -> Self {
        ExternalCandidate {
            text: w.text,
            frequency: w.frequency,
            comment: None,
        }
    }
}

/// Deterministic, already-ranked external ranker. The core never
/// introspects its internal state or lifecycle; the embedder owns both.
pub trait CandidateSource: Send + Sync {
    fn query(&self, pinyin: &str, limit: usize) -> Vec<ExternalCandidate>;
}
