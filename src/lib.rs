//! ime-core
//!
//! The core input-method engine of a cross-platform pinyin IME: key-event
//! dispatch, candidate assembly across dictionaries and learned user
//! frequency, and durable learning feedback. Platform keyboard hooks, OS
//! text services, candidate-window rendering, and IPC framing are not part
//! of this crate — it exposes an abstract [`host::Host`] interface instead.
//!
//! Components, leaves-first:
//! - [`storage`] (C1) — durable K/V store for dictionary metadata, user
//!   word frequency, configuration, and download-task bookkeeping.
//! - [`dictionary`] (C2) — loads RIME-compatible dictionary files, tracks
//!   enable/priority, and serves pinyin lookups.
//! - [`frequency`] (C3) — user word-frequency accounting and the
//!   combined-score ranking function.
//! - [`candidate`] (C4) — merges dictionary, user-frequency, and external
//!   candidates into one ranked, deduplicated list.
//! - [`session`] (C5) — per-focus key dispatch state machine.
//! - [`autolearn`] (C6) — detects and promotes recurring committed phrases.
//! - [`orchestrator`] (C7) — composition root; owns C1-C6 and multiplexes
//!   them across focused documents.

pub mod error;

pub mod storage;
pub use storage::Storage;

pub mod download;
pub use download::{DownloadStatus, DownloadTask};

pub mod dictionary;
pub use dictionary::{DictMeta, DictType, DictionaryRegistry, WordEntry};

pub mod frequency;
pub use frequency::{FrequencyConfig, FrequencyStore, UserFrequencyRow};

pub mod candidate_source;
pub use candidate_source::{CandidateSource, ExternalCandidate};

pub mod candidate;
pub use candidate::{CandidateAssembler, CandidateWord, MergeConfig};

pub mod host;
pub use host::{Host, Rect};

pub mod session;
pub use session::{InputMode, InputSession, KeyEvent, KeyType, Outcome};

pub mod autolearn;
pub use autolearn::{AutoLearnConfig, AutoLearner, InputRecord, LearnCandidate};

pub mod orchestrator;
pub use orchestrator::{DocumentId, InitPaths, Orchestrator};
