//! Candidate assembly (C4): the central merge algorithm that turns a pinyin
//! query into one ordered, deduplicated, numbered `Vec<CandidateWord>`.
//!
//! Grounded on `candidate.rs`'s `Candidate`/`CandidateList` paging (`num_pages`,
//! `current_page_candidates`, range-based page slicing) and `engine.rs`'s
//! collect-then-merge-then-cache shape (`Engine::input`, `lru::LruCache`).

use std::collections::HashSet;
use std::num::NonZeroUsize;
use std::sync::{Arc, Mutex};

use lru::LruCache;
use serde::{Deserialize, Serialize};

use crate::candidate_source::CandidateSource;
use crate::dictionary::DictionaryRegistry;
use crate::frequency::FrequencyStore;

/// Sentinel `source_priority` for candidates that did not come from a
/// registered dictionary.
const USER_WORD_PRIORITY: i32 = i32::MAX;
const EXTERNAL_SOURCE_PRIORITY: i32 = 0;

/// A ranked candidate with enough provenance to label and re-rank it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CandidateWord {
    pub text: String,
    pub pinyin: String,
    pub frequency: u64,
    pub source_dict_id: String,
    pub source_priority: i32,
    pub is_user_word: bool,
    pub comment: Option<String>,
    pub user_frequency: u64,
    /// 1..=9 selection index, cycling; assigned by the assembler.
    pub index: u8,
}

/// Validated, immutable merge parameters. Constructed only via
/// [`MergeConfig::builder`], matching `libchinese_core::Config`'s pattern of
/// exposing typed setters rather than public mutable fields for anything
/// with an invariant.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MergeConfig {
    pub max_user_words: usize,
    pub min_user_frequency: i32,
    pub user_words_first: bool,
    pub safety_margin: usize,
}

impl Default for MergeConfig {
    fn default() -> Self {
        MergeConfig {
            max_user_words: 5,
            min_user_frequency: 3,
            user_words_first: true,
            safety_margin: 8,
        }
    }
}

impl MergeConfig {
    pub fn builder() -> MergeConfigBuilder {
        MergeConfigBuilder::default()
    }
}

#[derive(Debug, Default)]
pub struct MergeConfigBuilder {
    max_user_words: Option<usize>,
    min_user_frequency: Option<i32>,
    user_words_first: Option<bool>,
    safety_margin: Option<usize>,
}

impl MergeConfigBuilder {
    pub fn max_user_words(mut self, v: usize) -> Self {
        self.max_user_words = Some(v);
        self
    }

    pub fn min_user_frequency(mut self, v: i32) -> Self {
        self.min_user_frequency = Some(v);
        self
    }

    pub fn user_words_first(mut self, v: bool) -> Self {
        self.user_words_first = Some(v);
        self
    }

    pub fn safety_margin(mut self, v: usize) -> Self {
        self.safety_margin = Some(v);
        self
    }

    /// Validates `max_user_words >= 1`; everything else has a safe default.
    pub fn build(self) -> Result<MergeConfig, String> {
        let defaults = MergeConfig::default();
        let max_user_words = self.max_user_words.unwrap_or(defaults.max_user_words);
        if max_user_words == 0 {
            return Err("max_user_words must be >= 1".to_string());
        }
        Ok(MergeConfig {
            max_user_words,
            min_user_frequency: self.min_user_frequency.unwrap_or(defaults.min_user_frequency),
            user_words_first: self.user_words_first.unwrap_or(defaults.user_words_first),
            safety_margin: self.safety_margin.unwrap_or(defaults.safety_margin),
        })
    }
}

/// Combines C2 + C3 + an optional `CandidateSource` into a single ranked
/// list. Holds the configured `MergeConfig` and a small LRU cache of recent
/// pinyin queries, mirroring `Engine::input`'s own query cache.
pub struct CandidateAssembler {
    dictionary: Arc<DictionaryRegistry>,
    frequency: Arc<FrequencyStore>,
    source: Option<Box<dyn CandidateSource>>,
    config: Mutex<MergeConfig>,
    cache: Mutex<LruCache<String, Vec<CandidateWord>>>,
}

impl CandidateAssembler {
    pub fn new(
        dictionary: Arc<DictionaryRegistry>,
        frequency: Arc<FrequencyStore>,
        source: Option<Box<dyn CandidateSource>>,
        config: MergeConfig,
    ) -> Self {
        CandidateAssembler {
            dictionary,
            frequency,
            source,
            config: Mutex::new(config),
            cache: Mutex::new(LruCache::new(NonZeroUsize::new(64).unwrap())),
        }
    }

    pub fn set_config(&self, cfg: MergeConfig) {
        *self.config.lock().unwrap() = cfg;
        self.cache.lock().unwrap().clear();
    }

    /// Drops any cached merge for `pinyin`. Callers must invoke this after
    /// any write that could change the merge result for that query (a
    /// `FrequencyStore::record_selection` or an `AutoLearner` promotion),
    /// since the cache is keyed only on the pinyin string and would
    /// otherwise keep serving a pre-selection candidate list.
    pub fn invalidate(&self, pinyin: &str) {
        self.cache.lock().unwrap().pop(pinyin);
    }

    pub fn get_config(&self) -> MergeConfig {
        *self.config.lock().unwrap()
    }

    /// Returns at most `limit` candidates.
    pub fn merge(&self, pinyin: &str, limit: usize) -> Vec<CandidateWord> {
        let mut all = self.merge_all(pinyin);
        all.truncate(limit);
        renumber(&mut all);
        all
    }

    /// Returns the full ordered, deduplicated list for paging (§4.6).
    pub fn merge_all(&self, pinyin: &str) -> Vec<CandidateWord> {
        if let Some(hit) = self.cache.lock().unwrap().get(pinyin) {
            return hit.clone();
        }

        let cfg = *self.config.lock().unwrap();
        let limit = cfg.safety_margin + 64;

        let user = self.collect_user(pinyin, &cfg);
        let mut external = self.collect_external(pinyin, limit);
        for c in external.iter_mut() {
            if c.user_frequency == 0 {
                c.user_frequency = self.frequency.get_user_frequency(&c.text, pinyin) as u64;
            }
        }

        let ordered: Vec<CandidateWord> = if cfg.user_words_first {
            user.into_iter().chain(external.into_iter()).collect()
        } else {
            external.into_iter().chain(user.into_iter()).collect()
        };

        let mut deduped = dedup_by_text(ordered);
        renumber(&mut deduped);

        self.cache
            .lock()
            .unwrap()
            .put(pinyin.to_string(), deduped.clone());
        deduped
    }

    fn collect_user(&self, pinyin: &str, cfg: &MergeConfig) -> Vec<CandidateWord> {
        self.frequency
            .top_user_words(pinyin, cfg.max_user_words)
            .into_iter()
            .filter(|row| row.frequency >= cfg.min_user_frequency)
            .map(|row| CandidateWord {
                text: row.word,
                pinyin: row.pinyin,
                frequency: row.frequency as u64,
                source_dict_id: "user".to_string(),
                source_priority: USER_WORD_PRIORITY,
                is_user_word: true,
                comment: None,
                user_frequency: row.frequency as u64,
                index: 0,
            })
            .collect()
    }

    fn collect_external(&self, pinyin: &str, limit: usize) -> Vec<CandidateWord> {
        if let Some(source) = &self.source {
            return source
                .query(pinyin, limit)
                .into_iter()
                .map(|ec| CandidateWord {
                    text: ec.text,
                    pinyin: pinyin.to_string(),
                    frequency: ec.frequency,
                    source_dict_id: "external".to_string(),
                    source_priority: EXTERNAL_SOURCE_PRIORITY,
                    is_user_word: false,
                    comment: ec.comment,
                    user_frequency: 0,
                    index: 0,
                })
                .collect();
        }

        let buckets = self.dictionary.query_exact(pinyin, limit);
        let flat: Vec<CandidateWord> = buckets
            .into_iter()
            .flatten()
            .map(|w| CandidateWord {
                text: w.text,
                pinyin: w.pinyin,
                frequency: w.frequency,
                source_dict_id: w.dict_id,
                source_priority: w.dict_priority,
                is_user_word: false,
                comment: None,
                user_frequency: 0,
                index: 0,
            })
            .collect();
        // `buckets` is already in loaded-priority order (I7), so deduping by
        // text here keeps the highest-priority dictionary's entry for any
        // word present in more than one (P4), before the score-based sort
        // below reorders by (possibly lower-priority) raw frequency.
        let mut deduped = dedup_by_text(flat);
        self.frequency.sort_candidates(&mut deduped, pinyin);
        deduped
    }
}

fn dedup_by_text(candidates: Vec<CandidateWord>) -> Vec<CandidateWord> {
    let mut seen = HashSet::new();
    let mut out = Vec::with_capacity(candidates.len());
    for c in candidates {
        if seen.insert(c.text.clone()) {
            out.push(c);
        }
    }
    out
}

fn renumber(candidates: &mut [CandidateWord]) {
    for (i, c) in candidates.iter_mut().enumerate() {
        c.index = ((i % 9) + 1) as u8;
    }
}
