//! Dictionary registry (C2): loads RIME-compatible dictionary files into
//! memory, tracks enable/priority, and serves pinyin lookups.
//!
//! Grounded on `lib.rs`'s FST-backed `Lexicon` (`fst::Map<Vec<u8>>` mapping a
//! key to an index into a bincode `Vec<Vec<LexEntry>>` payload table) and
//! `lexicon.rs`'s simpler `HashMap`-based lookup for the exact-match overlay.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::Path;
use std::sync::RwLock;

use ahash::AHashMap;
use fst::automaton::{Automaton, Str};
use fst::{Map as FstMap, MapBuilder, Streamer};
use serde::{Deserialize, Serialize};

use crate::error::DictError;
use crate::storage::Storage;

/// Category of a registered dictionary, per the data model.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DictType {
    Base,
    Extended,
    Industry,
    User,
}

/// Persisted metadata for a registered dictionary (I1/I6/I7).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DictMeta {
    pub id: String,
    pub name: String,
    pub dict_type: DictType,
    pub version: String,
    pub cloud_version: Option<String>,
    pub word_count: u64,
    pub source_path: String,
    pub priority: i32,
    pub enabled: bool,
}

/// An indivisible (text, pinyin, frequency, dict_id, dict_priority) entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WordEntry {
    pub text: String,
    pub pinyin: String,
    pub frequency: u64,
    pub dict_id: String,
    pub dict_priority: i32,
}

/// The in-memory indices built for one loaded dictionary.
struct LoadedDictionary {
    fst: FstMap<Vec<u8>>,
    payloads: Vec<Vec<WordEntry>>,
    exact: AHashMap<(String, String), WordEntry>,
}

struct RegistryState {
    meta: HashMap<String, DictMeta>,
    loaded: HashMap<String, LoadedDictionary>,
    /// Ids of loaded dictionaries, sorted by priority desc then id asc (I7).
    order: Vec<String>,
}

impl RegistryState {
    fn rebuild_order(&mut self) {
        let mut ids: Vec<String> = self.loaded.keys().cloned().collect();
        ids.sort_by(|a, b| {
            let pa = self.meta.get(a).map(|m| m.priority).unwrap_or(0);
            let pb = self.meta.get(b).map(|m| m.priority).unwrap_or(0);
            pb.cmp(&pa).then_with(|| a.cmp(b))
        });
        self.order = ids;
    }
}

/// Maintains the set of known dictionaries, loads/unloads their entries, and
/// serves pinyin and exact-match lookups.
pub struct DictionaryRegistry {
    storage: Storage,
    state: RwLock<RegistryState>,
}

impl DictionaryRegistry {
    /// Construct a registry atop an already-open store, restoring any
    /// previously registered metadata (nothing is loaded yet).
    pub fn new(storage: Storage) -> Result<Self, DictError> {
        let metas = storage.list_all_dicts()?;
        let mut meta = HashMap::new();
        for m in metas {
            meta.insert(m.id.clone(), m);
        }
        Ok(DictionaryRegistry {
            storage,
            state: RwLock::new(RegistryState {
                meta,
                loaded: HashMap::new(),
                order: Vec::new(),
            }),
        })
    }

    pub fn register(&self, meta: DictMeta) -> Result<(), DictError> {
        self.storage.save_dict_meta(&meta)?;
        let mut state = self.state.write().unwrap();
        state.meta.insert(meta.id.clone(), meta);
        Ok(())
    }

    pub fn unregister(&self, id: &str) -> Result<(), DictError> {
        self.storage.delete_dict_meta(id)?;
        let mut state = self.state.write().unwrap();
        state.meta.remove(id);
        state.loaded.remove(id);
        state.rebuild_order();
        Ok(())
    }

    /// Idempotent: loading an already-loaded dictionary succeeds immediately.
    pub fn load(&self, id: &str) -> Result<(), DictError> {
        {
            let state = self.state.read().unwrap();
            if state.loaded.contains_key(id) {
                return Ok(());
            }
        }
        let (source_path, priority) = {
            let state = self.state.read().unwrap();
            let m = state
                .meta
                .get(id)
                .ok_or_else(|| DictError::NotFound(id.to_string()))?;
            (m.source_path.clone(), m.priority)
        };
        let loaded = load_dict_file(id, &source_path, priority)?;

        let mut state = self.state.write().unwrap();
        if state.loaded.contains_key(id) {
            return Ok(());
        }
        let word_count = loaded.payloads.iter().map(|v| v.len() as u64).sum();
        state.loaded.insert(id.to_string(), loaded);
        if let Some(m) = state.meta.get_mut(id) {
            m.word_count = word_count;
        }
        state.rebuild_order();
        drop(state);

        if let Some(m) = self.state.read().unwrap().meta.get(id) {
            let _ = self.storage.save_dict_meta(m);
        }
        tracing::debug!(dict_id = id, word_count, "dictionary loaded");
        Ok(())
    }

    pub fn unload(&self, id: &str) {
        let mut state = self.state.write().unwrap();
        state.loaded.remove(id);
        state.rebuild_order();
    }

    pub fn reload(&self, id: &str) -> Result<(), DictError> {
        self.unload(id);
        self.load(id)
    }

    /// Loads every enabled, not-yet-loaded dictionary; returns how many
    /// succeeded. A single failure is logged and does not abort the batch.
    pub fn load_all_enabled(&self) -> u32 {
        let ids: Vec<String> = {
            let state = self.state.read().unwrap();
            state
                .meta
                .values()
                .filter(|m| m.enabled && !state.loaded.contains_key(&m.id))
                .map(|m| m.id.clone())
                .collect()
        };
        let mut count = 0;
        for id in ids {
            match self.load(&id) {
                Ok(()) => count += 1,
                Err(e) => tracing::warn!(dict_id = %id, error = %e, "failed to load dictionary"),
            }
        }
        count
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), DictError> {
        self.storage.set_enabled(id, enabled)?;
        {
            let mut state = self.state.write().unwrap();
            if let Some(m) = state.meta.get_mut(id) {
                m.enabled = enabled;
            }
        }
        if !enabled {
            self.unload(id);
        }
        Ok(())
    }

    pub fn set_priority(&self, id: &str, priority: i32) -> Result<(), DictError> {
        self.storage.set_priority(id, priority)?;
        let mut state = self.state.write().unwrap();
        if let Some(m) = state.meta.get_mut(id) {
            m.priority = priority;
        }
        state.rebuild_order();
        Ok(())
    }

    pub fn list_all(&self) -> Vec<DictMeta> {
        let state = self.state.read().unwrap();
        let mut metas: Vec<DictMeta> = state.meta.values().cloned().collect();
        metas.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
        metas
    }

    pub fn list_loaded(&self) -> Vec<DictMeta> {
        let state = self.state.read().unwrap();
        state
            .order
            .iter()
            .filter_map(|id| state.meta.get(id).cloned())
            .collect()
    }

    pub fn list_enabled(&self) -> Vec<DictMeta> {
        self.list_all().into_iter().filter(|m| m.enabled).collect()
    }

    /// Per-dictionary matches for `pinyin`, in loaded-priority order (I7),
    /// each truncated to `limit` and already frequency-descending.
    pub fn query_exact(&self, pinyin: &str, limit: usize) -> Vec<Vec<WordEntry>> {
        let state = self.state.read().unwrap();
        let mut out = Vec::with_capacity(state.order.len());
        for id in &state.order {
            let dict = match state.loaded.get(id) {
                Some(d) => d,
                None => continue,
            };
            if let Some(idx) = dict.fst.get(pinyin) {
                if let Some(entries) = dict.payloads.get(idx as usize) {
                    let mut v = entries.clone();
                    v.truncate(limit);
                    if !v.is_empty() {
                        out.push(v);
                    }
                }
            }
        }
        out
    }

    /// Per-dictionary matches whose pinyin key starts with `prefix`.
    pub fn query_prefix(&self, prefix: &str, limit: usize) -> Vec<Vec<WordEntry>> {
        let state = self.state.read().unwrap();
        let mut out = Vec::with_capacity(state.order.len());
        for id in &state.order {
            let dict = match state.loaded.get(id) {
                Some(d) => d,
                None => continue,
            };
            let matcher = Str::new(prefix).starts_with();
            let mut stream = dict.fst.search(matcher).into_stream();
            let mut bucket = Vec::new();
            while let Some((_, idx)) = stream.next() {
                if let Some(entries) = dict.payloads.get(idx as usize) {
                    bucket.extend(entries.iter().cloned());
                }
                if bucket.len() >= limit {
                    break;
                }
            }
            bucket.sort_by(|a, b| b.frequency.cmp(&a.frequency));
            bucket.truncate(limit);
            if !bucket.is_empty() {
                out.push(bucket);
            }
        }
        out
    }

    /// First match by priority order, or `None` if not present in any
    /// loaded dictionary.
    pub fn contains_word(&self, text: &str, pinyin: &str) -> bool {
        self.lookup_word(text, pinyin).is_some()
    }

    pub fn get_word_frequency(&self, text: &str, pinyin: &str) -> Option<u64> {
        self.lookup_word(text, pinyin).map(|w| w.frequency)
    }

    fn lookup_word(&self, text: &str, pinyin: &str) -> Option<WordEntry> {
        let state = self.state.read().unwrap();
        let key = (text.to_string(), pinyin.to_string());
        for id in &state.order {
            if let Some(dict) = state.loaded.get(id) {
                if let Some(w) = dict.exact.get(&key) {
                    return Some(w.clone());
                }
            }
        }
        None
    }
}

/// NFC-normalizes and trims a dictionary field so that precomposed and
/// decomposed forms of the same text never produce separate fst entries.
fn normalize(s: &str) -> String {
    use unicode_normalization::UnicodeNormalization;
    s.nfc().collect::<String>().trim().to_string()
}

fn load_dict_file(dict_id: &str, path: &str, priority: i32) -> Result<LoadedDictionary, DictError> {
    let lower = path.to_ascii_lowercase();
    if !(lower.ends_with(".dict.yaml") || lower.ends_with(".yaml")) {
        return Err(DictError::UnsupportedFormat(path.to_string()));
    }
    let content = fs::read_to_string(Path::new(path))
        .map_err(|e| DictError::ParseFailed(format!("{path}: {e}")))?;

    let mut buckets: BTreeMap<String, Vec<WordEntry>> = BTreeMap::new();
    let mut in_header = false;

    for line in content.lines() {
        let trimmed = line.trim_end();
        if trimmed.trim().is_empty() {
            continue;
        }
        if trimmed.trim() == "---" {
            in_header = !in_header;
            continue;
        }
        if trimmed.trim() == "..." {
            in_header = false;
            continue;
        }
        if in_header {
            continue;
        }
        let mut cols = trimmed.split('\t');
        let text = normalize(cols.next().unwrap_or(""));
        let pinyin = match cols.next() {
            Some(p) => normalize(p),
            None => continue,
        };
        if text.is_empty() || pinyin.is_empty() {
            continue;
        }
        let frequency = cols
            .next()
            .and_then(|f| f.trim().parse::<u64>().ok())
            .unwrap_or(0);
        buckets.entry(pinyin.clone()).or_default().push(WordEntry {
            text,
            pinyin,
            frequency,
            dict_id: dict_id.to_string(),
            dict_priority: priority,
        });
    }

    if buckets.is_empty() {
        return Err(DictError::EmptyDictionary);
    }

    for bucket in buckets.values_mut() {
        bucket.sort_by(|a, b| b.frequency.cmp(&a.frequency));
    }

    let mut builder = MapBuilder::new(Vec::new())
        .map_err(|e| DictError::IndexBuildFailed(e.to_string()))?;
    let mut payloads = Vec::with_capacity(buckets.len());
    let mut exact = AHashMap::default();
    for (idx, (key, entries)) in buckets.into_iter().enumerate() {
        builder
            .insert(&key, idx as u64)
            .map_err(|e| DictError::IndexBuildFailed(e.to_string()))?;
        for entry in &entries {
            exact.insert((entry.text.clone(), entry.pinyin.clone()), entry.clone());
        }
        payloads.push(entries);
    }
    let fst_bytes = builder
        .into_inner()
        .map_err(|e| DictError::IndexBuildFailed(e.to_string()))?;
    let fst = FstMap::new(fst_bytes).map_err(|e| DictError::IndexBuildFailed(e.to_string()))?;

    Ok(LoadedDictionary {
        fst,
        payloads,
        exact,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_storage(name: &str) -> Storage {
        let mut tmp = std::env::temp_dir();
        tmp.push(format!(
            "ime_core_dict_test_{}_{}.redb",
            name,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        Storage::open(&tmp).expect("open storage")
    }

    fn write_dict_file(name: &str, body: &str) -> String {
        let mut tmp = std::env::temp_dir();
        tmp.push(format!(
            "ime_core_dict_src_{}_{}.dict.yaml",
            name,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        fs::write(&tmp, body).unwrap();
        tmp.to_string_lossy().to_string()
    }

    #[test]
    fn load_parses_body_and_skips_header() {
        let path = write_dict_file(
            "basic",
            "---\nname: test\n...\n你好\tni hao\t500\n你\tni\t900\n尼\tni\t100\n",
        );
        let storage = temp_storage("load_basic");
        let registry = DictionaryRegistry::new(storage).unwrap();
        registry
            .register(DictMeta {
                id: "d1".to_string(),
                name: "d1".to_string(),
                dict_type: DictType::Base,
                version: "1".to_string(),
                cloud_version: None,
                word_count: 0,
                source_path: path,
                priority: 1,
                enabled: true,
            })
            .unwrap();
        registry.load("d1").unwrap();

        let hits = registry.query_exact("ni", 10);
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0][0].text, "你");
        assert_eq!(hits[0][1].text, "尼");
        assert!(registry.contains_word("你好", "ni hao"));
        assert_eq!(registry.get_word_frequency("你好", "ni hao"), Some(500));
    }

    #[test]
    fn priority_order_determines_first_match() {
        let path_hi = write_dict_file("hi", "你好\tni hao\t500\n");
        let path_lo = write_dict_file("lo", "你好\tni hao\t900\n");
        let storage = temp_storage("priority");
        let registry = DictionaryRegistry::new(storage).unwrap();
        registry
            .register(DictMeta {
                id: "lo".to_string(),
                name: "lo".to_string(),
                dict_type: DictType::Base,
                version: "1".to_string(),
                cloud_version: None,
                word_count: 0,
                source_path: path_lo,
                priority: 5,
                enabled: true,
            })
            .unwrap();
        registry
            .register(DictMeta {
                id: "hi".to_string(),
                name: "hi".to_string(),
                dict_type: DictType::Base,
                version: "1".to_string(),
                cloud_version: None,
                word_count: 0,
                source_path: path_hi,
                priority: 10,
                enabled: true,
            })
            .unwrap();
        registry.load("lo").unwrap();
        registry.load("hi").unwrap();

        assert_eq!(registry.get_word_frequency("你好", "ni hao"), Some(500));
        let hits = registry.query_exact("ni hao", 10);
        assert_eq!(hits[0][0].frequency, 500);
        assert_eq!(hits[1][0].frequency, 900);
    }

    #[test]
    fn unsupported_extension_rejected() {
        let storage = temp_storage("unsupported");
        let registry = DictionaryRegistry::new(storage).unwrap();
        registry
            .register(DictMeta {
                id: "bad".to_string(),
                name: "bad".to_string(),
                dict_type: DictType::Base,
                version: "1".to_string(),
                cloud_version: None,
                word_count: 0,
                source_path: "/tmp/does-not-matter.txt".to_string(),
                priority: 1,
                enabled: true,
            })
            .unwrap();
        let err = registry.load("bad").unwrap_err();
        assert!(matches!(err, DictError::UnsupportedFormat(_)));
    }

    #[test]
    fn query_prefix_matches_multi_syllable_keys() {
        let path = write_dict_file("prefix", "你好\tni hao\t500\n你好吗\tni hao ma\t10\n");
        let storage = temp_storage("prefix");
        let registry = DictionaryRegistry::new(storage).unwrap();
        registry
            .register(DictMeta {
                id: "p".to_string(),
                name: "p".to_string(),
                dict_type: DictType::Base,
                version: "1".to_string(),
                cloud_version: None,
                word_count: 0,
                source_path: path,
                priority: 1,
                enabled: true,
            })
            .unwrap();
        registry.load("p").unwrap();
        let hits = registry.query_prefix("ni hao", 10);
        assert_eq!(hits[0].len(), 2);
    }

    #[test]
    fn disabling_unloads_dictionary() {
        let path = write_dict_file("disable", "你\tni\t10\n");
        let storage = temp_storage("disable");
        let registry = DictionaryRegistry::new(storage).unwrap();
        registry
            .register(DictMeta {
                id: "d".to_string(),
                name: "d".to_string(),
                dict_type: DictType::Base,
                version: "1".to_string(),
                cloud_version: None,
                word_count: 0,
                source_path: path,
                priority: 1,
                enabled: true,
            })
            .unwrap();
        registry.load("d").unwrap();
        assert_eq!(registry.list_loaded().len(), 1);
        registry.set_enabled("d", false).unwrap();
        assert_eq!(registry.list_loaded().len(), 0);
    }
}
