//! User word-frequency accounting (C3): a thin ranking layer over `Storage`
//! that also computes each candidate's combined score.
//!
//! Grounded on `userdict.rs`'s `learn`/`learn_with_count`/`frequency`/
//! `snapshot` shape (generalized from a flat phrase→count table to rows
//! keyed by `(word, pinyin)`) and `lib.rs::Config`'s typed-value-over-TOML
//! pattern for `FrequencyConfig`.

use std::sync::Mutex;

use serde::{Deserialize, Serialize};

use crate::candidate::CandidateWord;
use crate::error::{BackupError, StorageError};
use crate::storage::Storage;

/// Reference base frequency used to normalize dictionary frequencies in the
/// combined-score function.
pub const BASE_FREQ_REF: f64 = 100_000.0;

/// A single user-learned (word, pinyin) frequency row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserFrequencyRow {
    pub id: u64,
    pub word: String,
    pub pinyin: String,
    pub frequency: i32,
    pub last_used: i64,
    pub created: i64,
}

/// Tunable ranking weights, persisted under the `frequency.*` config keys.
///
/// `recency_weight` / `recency_decay_days` are reserved: they round-trip
/// through storage but are not read by `combined_score` yet (no committed
/// formula uses them — see the open question in the design notes).
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FrequencyConfig {
    pub user_weight: f64,
    pub base_weight: f64,
    pub recency_weight: f64,
    pub recency_decay_days: i64,
    pub max_user_frequency: i64,
}

impl Default for FrequencyConfig {
    fn default() -> Self {
        FrequencyConfig {
            user_weight: 0.6,
            base_weight: 0.3,
            recency_weight: 0.1,
            recency_decay_days: 30,
            max_user_frequency: 100_000,
        }
    }
}

impl FrequencyConfig {
    fn from_storage(storage: &Storage) -> Result<Self, StorageError> {
        let mut cfg = FrequencyConfig::default();
        cfg.user_weight = storage
            .get("frequency.user_weight", "0.6")?
            .parse()
            .unwrap_or(cfg.user_weight);
        cfg.base_weight = storage
            .get("frequency.base_weight", "0.3")?
            .parse()
            .unwrap_or(cfg.base_weight);
        cfg.recency_weight = storage
            .get("frequency.recency_weight", "0.1")?
            .parse()
            .unwrap_or(cfg.recency_weight);
        cfg.recency_decay_days = storage
            .get("frequency.recency_decay_days", "30")?
            .parse()
            .unwrap_or(cfg.recency_decay_days);
        cfg.max_user_frequency = storage
            .get("frequency.max_user_frequency", "100000")?
            .parse()
            .unwrap_or(cfg.max_user_frequency);
        Ok(cfg)
    }

    fn persist(&self, storage: &Storage) -> Result<(), StorageError> {
        storage.set("frequency.user_weight", &self.user_weight.to_string())?;
        storage.set("frequency.base_weight", &self.base_weight.to_string())?;
        storage.set("frequency.recency_weight", &self.recency_weight.to_string())?;
        storage.set(
            "frequency.recency_decay_days",
            &self.recency_decay_days.to_string(),
        )?;
        storage.set(
            "frequency.max_user_frequency",
            &self.max_user_frequency.to_string(),
        )?;
        Ok(())
    }

    /// Export as a standalone TOML blob, e.g. for backup/restore — the one
    /// place this config is naturally serialized as a single document rather
    /// than per-key rows.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }

    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }
}

pub struct FrequencyStore {
    storage: Storage,
    config: Mutex<FrequencyConfig>,
}

impl FrequencyStore {
    pub fn new(storage: Storage) -> Result<Self, StorageError> {
        let config = FrequencyConfig::from_storage(&storage)?;
        Ok(FrequencyStore {
            storage,
            config: Mutex::new(config),
        })
    }

    pub fn record_selection(&self, word: &str, pinyin: &str) -> i32 {
        match self.storage.increment(word, pinyin) {
            Ok(freq) => freq,
            Err(e) => {
                tracing::warn!(word, pinyin, error = %e, "record_selection failed, degrading to 0");
                0
            }
        }
    }

    /// Records every `(word, pinyin)` pair. Per §4.4 this is wrapped in one
    /// storage transaction in spirit: each `increment` is already one
    /// transaction, and a storage-level failure on one pair does not abort
    /// the rest (best-effort, matching the "never aborts a commit" rule).
    pub fn record_selections(&self, pairs: &[(String, String)]) {
        for (word, pinyin) in pairs {
            let _ = self.record_selection(word, pinyin);
        }
    }

    pub fn get_user_frequency(&self, word: &str, pinyin: &str) -> i32 {
        self.storage.get_freq(word, pinyin).unwrap_or(0)
    }

    pub fn top_user_words(&self, pinyin: &str, limit: usize) -> Vec<UserFrequencyRow> {
        self.storage.top_by_pinyin(pinyin, limit).unwrap_or_default()
    }

    /// Populates `user_frequency` on each candidate by a storage lookup, then
    /// sorts the slice by `combined_score` descending (tiebreak:
    /// `source_priority` desc, then original order).
    pub fn sort_candidates(&self, candidates: &mut Vec<CandidateWord>, pinyin: &str) {
        let cfg = *self.config.lock().unwrap();
        for c in candidates.iter_mut() {
            if c.user_frequency == 0 {
                c.user_frequency = self.get_user_frequency(&c.text, pinyin) as u64;
            }
        }
        let scored: Vec<(i64, i32, usize)> = candidates
            .iter()
            .enumerate()
            .map(|(i, c)| (combined_score(c, &cfg), c.source_priority, i))
            .collect();
        let mut order: Vec<usize> = (0..candidates.len()).collect();
        order.sort_by(|&a, &b| {
            scored[a]
                .0
                .cmp(&scored[b].0)
                .reverse()
                .then_with(|| scored[a].1.cmp(&scored[b].1).reverse())
                .then_with(|| scored[a].2.cmp(&scored[b].2))
        });
        let reordered: Vec<CandidateWord> = order.into_iter().map(|i| candidates[i].clone()).collect();
        *candidates = reordered;
    }

    pub fn get_config(&self) -> FrequencyConfig {
        *self.config.lock().unwrap()
    }

    pub fn set_config(&self, cfg: FrequencyConfig) -> Result<(), StorageError> {
        cfg.persist(&self.storage)?;
        *self.config.lock().unwrap() = cfg;
        Ok(())
    }

    pub fn clear_all(&self) -> Result<(), StorageError> {
        self.storage.clear_all_freq()
    }

    pub fn export(&self) -> Vec<UserFrequencyRow> {
        self.storage.all_freq().unwrap_or_default()
    }

    /// Upserts the exact frequency value. Always calls `set_freq` exactly
    /// once: never loops an increment N times (see the design notes on the
    /// `import` bug this deliberately avoids).
    pub fn import(&self, word: &str, pinyin: &str, freq: i32) -> Result<(), StorageError> {
        self.storage.set_freq(word, pinyin, freq)
    }

    /// Serializes every user-frequency row to a pretty-printed JSON array,
    /// for backup tooling outside the embedder's own sync format.
    pub fn export_json(&self) -> Result<String, BackupError> {
        Ok(serde_json::to_string_pretty(&self.export())?)
    }

    /// Restores rows from a JSON array previously produced by
    /// [`export_json`](Self::export_json). Each row is upserted by exact
    /// value via [`import`](Self::import), so re-importing a backup is
    /// idempotent. Returns the number of rows restored.
    pub fn import_json(&self, json: &str) -> Result<usize, BackupError> {
        let rows: Vec<UserFrequencyRow> = serde_json::from_str(json)?;
        for row in &rows {
            self.import(&row.word, &row.pinyin, row.frequency)?;
        }
        Ok(rows.len())
    }
}

/// `base_norm = log1p(base) / log1p(BASE_FREQ_REF)`
/// `user_norm = log1p(user) / log1p(cfg.max_user_frequency)`
/// `score = base_weight*base_norm + user_weight*user_norm`
/// `combined = round(score * 1_000_000) + (user > 10 ? user * 100 : 0)`
pub fn combined_score(c: &CandidateWord, cfg: &FrequencyConfig) -> i64 {
    let base_norm = (c.frequency as f64).ln_1p() / BASE_FREQ_REF.ln_1p();
    let user_norm = (c.user_frequency as f64).ln_1p() / (cfg.max_user_frequency as f64).ln_1p();
    let score = cfg.base_weight * base_norm + cfg.user_weight * user_norm;
    let boost = if c.user_frequency > 10 {
        c.user_frequency as i64 * 100
    } else {
        0
    };
    (score * 1_000_000.0).round() as i64 + boost
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_storage(name: &str) -> Storage {
        let mut tmp = std::env::temp_dir();
        tmp.push(format!(
            "ime_core_freq_test_{}_{}.redb",
            name,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        Storage::open(&tmp).expect("open storage")
    }

    fn candidate(text: &str, freq: u64, user_freq: u64, priority: i32) -> CandidateWord {
        CandidateWord {
            text: text.to_string(),
            pinyin: "ni".to_string(),
            frequency: freq,
            source_dict_id: "d".to_string(),
            source_priority: priority,
            is_user_word: false,
            comment: None,
            user_frequency: user_freq,
            index: 0,
        }
    }

    #[test]
    fn record_selection_is_monotone() {
        let store = FrequencyStore::new(temp_storage("monotone")).unwrap();
        assert_eq!(store.record_selection("你", "ni"), 1);
        assert_eq!(store.record_selection("你", "ni"), 2);
        assert_eq!(store.get_user_frequency("你", "ni"), 2);
    }

    #[test]
    fn import_sets_exact_value_once() {
        let store = FrequencyStore::new(temp_storage("import")).unwrap();
        store.import("你", "ni", 7).unwrap();
        assert_eq!(store.get_user_frequency("你", "ni"), 7);
        store.import("你", "ni", 3).unwrap();
        assert_eq!(store.get_user_frequency("你", "ni"), 3);
    }

    #[test]
    fn high_user_frequency_gets_priority_boost() {
        let cfg = FrequencyConfig::default();
        let low = candidate("低频", 50_000, 5, 1);
        let high = candidate("高频", 50_000, 20, 1);
        assert!(combined_score(&high, &cfg) > combined_score(&low, &cfg));
    }

    #[test]
    fn sort_candidates_orders_by_combined_score_desc() {
        let store = FrequencyStore::new(temp_storage("sort")).unwrap();
        let mut cands = vec![
            candidate("甲", 1_000, 0, 1),
            candidate("乙", 90_000, 0, 1),
        ];
        store.sort_candidates(&mut cands, "ni");
        assert_eq!(cands[0].text, "乙");
    }

    #[test]
    fn config_round_trips_through_storage() {
        let store = FrequencyStore::new(temp_storage("config")).unwrap();
        let mut cfg = store.get_config();
        cfg.user_weight = 0.9;
        store.set_config(cfg).unwrap();
        assert_eq!(store.get_config().user_weight, 0.9);
    }

    #[test]
    fn clear_all_resets_frequencies() {
        let store = FrequencyStore::new(temp_storage("clear")).unwrap();
        store.record_selection("你", "ni");
        store.clear_all().unwrap();
        assert_eq!(store.get_user_frequency("你", "ni"), 0);
    }

    #[test]
    fn export_json_round_trips_into_a_fresh_store() {
        let source = FrequencyStore::new(temp_storage("export_json_src")).unwrap();
        source.record_selection("你好", "ni hao");
        source.record_selection("你好", "ni hao");
        let dump = source.export_json().unwrap();

        let dest = FrequencyStore::new(temp_storage("export_json_dst")).unwrap();
        let restored = dest.import_json(&dump).unwrap();
        assert_eq!(restored, 1);
        assert_eq!(dest.get_user_frequency("你好", "ni hao"), 2);
    }
}
