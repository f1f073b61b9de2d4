//! AutoLearner (C6): observes committed single-character sequences and
//! mines recurring multi-character phrases for promotion into the user
//! dictionary.
//!
//! Grounded on `editor.rs::SuggestionEditor::learn_selection` (which learns
//! a single bigram from the two most recent commits on selection),
//! generalized to arbitrary-length phrase mining over a rolling history per
//! §4.7, and `input_buffer.rs`'s manual UTF-8 boundary walk, applied here to
//! counting codepoints in a committed text rather than moving a cursor.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex};

use serde::{Deserialize, Serialize};

use crate::error::StorageError;
use crate::frequency::FrequencyStore;
use crate::storage::Storage;

/// One committed (text, pinyin) pair, with the wall-clock time it was
/// committed, used to test the "consecutive within N ms" rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InputRecord {
    pub text: String,
    pub pinyin: String,
    pub timestamp_ms: i64,
    pub is_single_char: bool,
}

/// A phrase under observation: seen `occurrences` times, not yet confirmed
/// or rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LearnCandidate {
    pub text: String,
    pub pinyin: String,
    pub occurrences: u32,
    pub last_seen_ms: i64,
}

/// Tunable thresholds, persisted under `learning.*` config keys where the
/// spec's §6 table names a key (`enabled`, `min_occurrences`, `max_interval`);
/// `min_word_length`/`max_word_length`/`history_size` have no enumerated
/// config key and stay compiled-in defaults.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AutoLearnConfig {
    pub min_word_length: usize,
    pub max_word_length: usize,
    pub min_occurrences: u32,
    pub max_input_interval_ms: i64,
    pub history_size: usize,
    pub enabled: bool,
}

impl Default for AutoLearnConfig {
    fn default() -> Self {
        AutoLearnConfig {
            min_word_length: 2,
            max_word_length: 6,
            min_occurrences: 2,
            max_input_interval_ms: 3000,
            history_size: 20,
            enabled: true,
        }
    }
}

impl AutoLearnConfig {
    fn from_storage(storage: &Storage) -> Result<Self, StorageError> {
        let mut cfg = AutoLearnConfig::default();
        cfg.enabled = storage
            .get("learning.enabled", "true")?
            .parse()
            .unwrap_or(cfg.enabled);
        cfg.min_occurrences = storage
            .get("learning.min_occurrences", "2")?
            .parse()
            .unwrap_or(cfg.min_occurrences);
        cfg.max_input_interval_ms = storage
            .get("learning.max_interval", "3000")?
            .parse()
            .unwrap_or(cfg.max_input_interval_ms);
        Ok(cfg)
    }

    fn persist(&self, storage: &Storage) -> Result<(), StorageError> {
        storage.set("learning.enabled", &self.enabled.to_string())?;
        storage.set("learning.min_occurrences", &self.min_occurrences.to_string())?;
        storage.set("learning.max_interval", &self.max_input_interval_ms.to_string())?;
        Ok(())
    }
}

type PhraseKey = (String, String);

struct AutoLearnerState {
    history: VecDeque<InputRecord>,
    candidates: HashMap<PhraseKey, LearnCandidate>,
    rejected: HashSet<PhraseKey>,
}

/// Mines multi-character phrases from a rolling history of committed
/// single-character inputs and promotes them into the user dictionary once
/// they clear `min_occurrences`.
pub struct AutoLearner {
    storage: Storage,
    frequency: Arc<FrequencyStore>,
    config: Mutex<AutoLearnConfig>,
    state: Mutex<AutoLearnerState>,
}

impl AutoLearner {
    pub fn new(storage: Storage, frequency: Arc<FrequencyStore>) -> Result<Self, StorageError> {
        let config = AutoLearnConfig::from_storage(&storage)?;
        Ok(AutoLearner {
            storage,
            frequency,
            config: Mutex::new(config),
            state: Mutex::new(AutoLearnerState {
                history: VecDeque::new(),
                candidates: HashMap::new(),
                rejected: HashSet::new(),
            }),
        })
    }

    pub fn get_config(&self) -> AutoLearnConfig {
        *self.config.lock().unwrap()
    }

    pub fn set_config(&self, cfg: AutoLearnConfig) -> Result<(), StorageError> {
        cfg.persist(&self.storage)?;
        *self.config.lock().unwrap() = cfg;
        Ok(())
    }

    /// Runs the §4.7 algorithm for one committed `(text, pinyin)` pair.
    /// Returns every phrase that newly crossed `min_occurrences` on this
    /// call (possibly more than one, for different suffix lengths).
    pub fn record_input(&self, text: &str, pinyin: &str) -> Vec<LearnCandidate> {
        let cfg = *self.config.lock().unwrap();
        if !cfg.enabled {
            return Vec::new();
        }
        let now = now_ms();
        let is_single_char = char_count(text) == 1;

        let mut state = self.state.lock().unwrap();
        state.history.push_back(InputRecord {
            text: text.to_string(),
            pinyin: pinyin.to_string(),
            timestamp_ms: now,
            is_single_char,
        });
        while state.history.len() > cfg.history_size {
            state.history.pop_front();
        }

        let run = consecutive_single_char_run(&state.history, cfg.max_input_interval_ms);
        if run.len() < cfg.min_word_length {
            return Vec::new();
        }

        let mut detected = Vec::new();
        let max_len = cfg.max_word_length.min(run.len());
        for len in cfg.min_word_length..=max_len {
            let suffix = &run[run.len() - len..];
            let phrase_text: String = suffix.iter().map(|r| r.text.as_str()).collect();
            let phrase_pinyin: String = suffix
                .iter()
                .map(|r| r.pinyin.as_str())
                .collect::<Vec<_>>()
                .join(" ");
            let key = (phrase_text.clone(), phrase_pinyin.clone());

            if state.rejected.contains(&key) {
                continue;
            }
            if self.frequency.get_user_frequency(&phrase_text, &phrase_pinyin) > 0 {
                continue;
            }

            let entry = state.candidates.entry(key).or_insert_with(|| LearnCandidate {
                text: phrase_text.clone(),
                pinyin: phrase_pinyin.clone(),
                occurrences: 0,
                last_seen_ms: now,
            });
            entry.occurrences += 1;
            entry.last_seen_ms = now;
            if entry.occurrences >= cfg.min_occurrences {
                detected.push(entry.clone());
            }
        }
        detected
    }

    /// Installs the phrase into the user dictionary via C3 and removes it
    /// from the pending map.
    pub fn confirm_learn(&self, text: &str, pinyin: &str) -> i32 {
        let new_freq = self.frequency.record_selection(text, pinyin);
        let mut state = self.state.lock().unwrap();
        state
            .candidates
            .remove(&(text.to_string(), pinyin.to_string()));
        tracing::info!(text, pinyin, new_freq, "auto-learned phrase confirmed");
        new_freq
    }

    /// Marks a phrase as rejected so it is never re-detected, and drops the
    /// pending candidate.
    pub fn reject_learn(&self, text: &str, pinyin: &str) {
        let key = (text.to_string(), pinyin.to_string());
        let mut state = self.state.lock().unwrap();
        state.candidates.remove(&key);
        state.rejected.insert(key);
    }

    /// Bulk-confirms every pending candidate that has already cleared
    /// `min_occurrences` and returns the list that was confirmed.
    pub fn process_candidates(&self) -> Vec<LearnCandidate> {
        let cfg = *self.config.lock().unwrap();
        let ready: Vec<LearnCandidate> = {
            let mut state = self.state.lock().unwrap();
            let ready: Vec<LearnCandidate> = state
                .candidates
                .values()
                .filter(|c| c.occurrences >= cfg.min_occurrences)
                .cloned()
                .collect();
            for c in &ready {
                state.candidates.remove(&(c.text.clone(), c.pinyin.clone()));
            }
            ready
        };
        for c in &ready {
            self.frequency.record_selection(&c.text, &c.pinyin);
        }
        ready
    }
}

/// Walks the history backwards, collecting consecutive single-character
/// records whose timestamp gap to the previously-collected (newer) record
/// is within `max_interval_ms`. Returns the run in chronological order.
fn consecutive_single_char_run(
    history: &VecDeque<InputRecord>,
    max_interval_ms: i64,
) -> Vec<InputRecord> {
    let mut run = Vec::new();
    let mut prev_ts: Option<i64> = None;
    for rec in history.iter().rev() {
        if !rec.is_single_char {
            break;
        }
        if let Some(pts) = prev_ts {
            if (pts - rec.timestamp_ms) > max_interval_ms {
                break;
            }
        }
        prev_ts = Some(rec.timestamp_ms);
        run.push(rec.clone());
    }
    run.reverse();
    run
}

/// Counts Unicode scalar values. `&str` is always valid UTF-8 in safe Rust,
/// so there is no malformed-byte case to special-case here; `chars().count()`
/// already walks codepoint boundaries exactly as the spec requires.
fn char_count(s: &str) -> usize {
    s.chars().count()
}

fn now_ms() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_storage(name: &str) -> Storage {
        let mut tmp = std::env::temp_dir();
        tmp.push(format!(
            "ime_core_autolearn_test_{}_{}.redb",
            name,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        Storage::open(&tmp).expect("open storage")
    }

    fn learner(name: &str) -> AutoLearner {
        let storage = temp_storage(name);
        let frequency = Arc::new(FrequencyStore::new(storage.clone()).unwrap());
        AutoLearner::new(storage, frequency).unwrap()
    }

    #[test]
    fn detects_phrase_on_second_occurrence() {
        let l = learner("detect");
        let cfg = AutoLearnConfig {
            min_occurrences: 2,
            min_word_length: 2,
            ..AutoLearnConfig::default()
        };
        l.set_config(cfg).unwrap();

        assert!(l.record_input("你", "ni").is_empty());
        let detected = l.record_input("好", "hao");
        assert!(detected.is_empty(), "first occurrence must not yet detect");

        assert!(l.record_input("你", "ni").is_empty());
        let detected = l.record_input("好", "hao");
        assert_eq!(detected.len(), 1);
        assert_eq!(detected[0].text, "你好");
        assert_eq!(detected[0].pinyin, "ni hao");
        assert_eq!(detected[0].occurrences, 2);
    }

    #[test]
    fn multi_char_commit_breaks_the_run() {
        let l = learner("break_run");
        assert!(l.record_input("你", "ni").is_empty());
        assert!(l.record_input("你好", "ni hao").is_empty());
        // "你好" is not single-char, so it can never start a fresh run by
        // itself and the next single-char commit starts a new run of length 1.
        assert!(l.record_input("吗", "ma").is_empty());
    }

    #[test]
    fn already_known_user_word_is_skipped() {
        let l = learner("known");
        l.frequency.record_selection("你好", "ni hao");
        l.record_input("你", "ni");
        let detected = l.record_input("好", "hao");
        assert!(detected.is_empty());
    }

    #[test]
    fn reject_prevents_redetection() {
        let l = learner("reject");
        l.record_input("你", "ni");
        l.record_input("好", "hao");
        l.reject_learn("你好", "ni hao");
        l.record_input("你", "ni");
        let detected = l.record_input("好", "hao");
        assert!(detected.is_empty());
    }

    #[test]
    fn confirm_learn_installs_into_user_dictionary() {
        let l = learner("confirm");
        l.confirm_learn("你好", "ni hao");
        assert_eq!(l.frequency.get_user_frequency("你好", "ni hao"), 1);
    }

    #[test]
    fn disabled_learner_detects_nothing() {
        let l = learner("disabled");
        let mut cfg = l.get_config();
        cfg.enabled = false;
        l.set_config(cfg).unwrap();
        assert!(l.record_input("你", "ni").is_empty());
        assert!(l.record_input("好", "hao").is_empty());
    }
}
