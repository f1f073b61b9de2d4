//! Durable K/V storage (C1): dictionary metadata, user word frequency,
//! configuration, and download-task bookkeeping, all behind one redb
//! database with four logical tables.
//!
//! Grounded on `UserDict`'s redb usage: read the current value in a read
//! transaction, then write the new value in a write transaction, treating
//! `redb::TableError::TableDoesNotExist` as "the table is empty" rather than
//! an error (a fresh database has no tables until the first write).

use std::path::{Path, PathBuf};
use std::sync::Arc;

use redb::{Database, ReadableTable, TableDefinition};

use crate::dictionary::DictMeta;
use crate::download::DownloadTask;
use crate::error::StorageError;
use crate::frequency::UserFrequencyRow;

const DICTIONARY_META: TableDefinition<&str, &[u8]> = TableDefinition::new("dictionary_meta");
const USER_WORD_FREQUENCY: TableDefinition<&str, &[u8]> =
    TableDefinition::new("user_word_frequency");
const CONFIG: TableDefinition<&str, &str> = TableDefinition::new("config");
const DOWNLOAD_TASK: TableDefinition<&str, &[u8]> = TableDefinition::new("download_task");

/// Default config rows seeded on first open. Keys under `cloud.*` are
/// reserved for the (out-of-scope) downloader; `input.*`, `frequency.*` and
/// `learning.*` are read back by C5/C3/C6 respectively.
const DEFAULT_CONFIG: &[(&str, &str)] = &[
    ("input.default_mode", "chinese"),
    ("input.page_size", "9"),
    ("frequency.user_weight", "0.6"),
    ("frequency.base_weight", "0.3"),
    ("frequency.recency_weight", "0.1"),
    ("frequency.recency_decay_days", "30"),
    ("frequency.max_user_frequency", "100000"),
    ("learning.enabled", "true"),
    ("learning.min_occurrences", "2"),
    ("learning.max_interval", "3000"),
    ("cloud.enabled", "true"),
    ("cloud.check_interval", "86400"),
];

fn word_freq_key(word: &str, pinyin: &str) -> String {
    format!("{}\0{}", word, pinyin)
}

/// Single-writer, multi-reader durable store used by C2/C3/C6.
#[derive(Clone)]
pub struct Storage {
    db: Arc<Database>,
    #[allow(dead_code)]
    path: PathBuf,
}

impl Storage {
    /// Open (or create) the backing database file and seed default config.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StorageError> {
        if let Some(dir) = path.as_ref().parent() {
            std::fs::create_dir_all(dir)?;
        }
        let db = Database::create(path.as_ref())?;
        let storage = Storage {
            db: Arc::new(db),
            path: path.as_ref().to_path_buf(),
        };
        storage.seed_defaults()?;
        Ok(storage)
    }

    fn seed_defaults(&self) -> Result<(), StorageError> {
        let w = self.db.begin_write()?;
        {
            let mut table = w.open_table(CONFIG)?;
            for (k, v) in DEFAULT_CONFIG {
                if table.get(*k)?.is_none() {
                    table.insert(*k, *v)?;
                }
            }
        }
        w.commit()?;
        Ok(())
    }

    // ===================== dictionary_meta =====================

    pub fn save_dict_meta(&self, meta: &DictMeta) -> Result<(), StorageError> {
        let bytes = bincode::serialize(meta)
            .map_err(|e| StorageError::Constraint(format!("encode dict meta: {e}")))?;
        let w = self.db.begin_write()?;
        {
            let mut table = w.open_table(DICTIONARY_META)?;
            table.insert(meta.id.as_str(), bytes.as_slice())?;
        }
        w.commit()?;
        Ok(())
    }

    pub fn get_dict_meta(&self, id: &str) -> Result<Option<DictMeta>, StorageError> {
        let r = self.db.begin_read()?;
        let table = match r.open_table(DICTIONARY_META) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match table.get(id)? {
            Some(v) => {
                let meta = bincode::deserialize(v.value())
                    .map_err(|e| StorageError::Constraint(format!("decode dict meta: {e}")))?;
                Ok(Some(meta))
            }
            None => Ok(None),
        }
    }

    pub fn list_all_dicts(&self) -> Result<Vec<DictMeta>, StorageError> {
        let r = self.db.begin_read()?;
        let table = match r.open_table(DICTIONARY_META) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut metas = Vec::new();
        for item in table.iter()? {
            let (_, v) = item?;
            let meta: DictMeta = bincode::deserialize(v.value())
                .map_err(|e| StorageError::Constraint(format!("decode dict meta: {e}")))?;
            metas.push(meta);
        }
        sort_by_priority(&mut metas);
        Ok(metas)
    }

    pub fn list_enabled_dicts(&self) -> Result<Vec<DictMeta>, StorageError> {
        Ok(self
            .list_all_dicts()?
            .into_iter()
            .filter(|m| m.enabled)
            .collect())
    }

    pub fn set_enabled(&self, id: &str, enabled: bool) -> Result<(), StorageError> {
        self.mutate_meta(id, |m| m.enabled = enabled)
    }

    pub fn set_priority(&self, id: &str, priority: i32) -> Result<(), StorageError> {
        self.mutate_meta(id, |m| m.priority = priority)
    }

    pub fn update_version(
        &self,
        id: &str,
        local_version: &str,
        cloud_version: Option<&str>,
    ) -> Result<(), StorageError> {
        self.mutate_meta(id, |m| {
            m.version = local_version.to_string();
            if let Some(cv) = cloud_version {
                m.cloud_version = Some(cv.to_string());
            }
        })
    }

    fn mutate_meta<F: FnOnce(&mut DictMeta)>(&self, id: &str, f: F) -> Result<(), StorageError> {
        let mut meta = self
            .get_dict_meta(id)?
            .ok_or_else(|| StorageError::Constraint(format!("no such dictionary: {id}")))?;
        f(&mut meta);
        self.save_dict_meta(&meta)
    }

    pub fn delete_dict_meta(&self, id: &str) -> Result<(), StorageError> {
        let w = self.db.begin_write()?;
        {
            let mut table = w.open_table(DICTIONARY_META)?;
            table.remove(id)?;
        }
        w.commit()?;
        Ok(())
    }

    // ===================== user_word_frequency =====================

    pub fn increment(&self, word: &str, pinyin: &str) -> Result<i32, StorageError> {
        let key = word_freq_key(word, pinyin);
        let now = now_secs();
        let w = self.db.begin_write()?;
        let new_freq;
        {
            let mut table = w.open_table(USER_WORD_FREQUENCY)?;
            let existing = match table.get(key.as_str())? {
                Some(v) => Some(
                    bincode::deserialize::<UserFrequencyRow>(v.value())
                        .map_err(|e| StorageError::Constraint(format!("decode freq row: {e}")))?,
                ),
                None => None,
            };
            let row = match existing {
                Some(mut row) => {
                    row.frequency += 1;
                    row.last_used = now;
                    row
                }
                None => UserFrequencyRow {
                    id: 0,
                    word: word.to_string(),
                    pinyin: pinyin.to_string(),
                    frequency: 1,
                    last_used: now,
                    created: now,
                },
            };
            new_freq = row.frequency;
            let bytes = bincode::serialize(&row)
                .map_err(|e| StorageError::Constraint(format!("encode freq row: {e}")))?;
            table.insert(key.as_str(), bytes.as_slice())?;
        }
        w.commit()?;
        Ok(new_freq)
    }

    pub fn get_freq(&self, word: &str, pinyin: &str) -> Result<i32, StorageError> {
        Ok(self
            .get_freq_row(word, pinyin)?
            .map(|r| r.frequency)
            .unwrap_or(0))
    }

    fn get_freq_row(&self, word: &str, pinyin: &str) -> Result<Option<UserFrequencyRow>, StorageError> {
        let key = word_freq_key(word, pinyin);
        let r = self.db.begin_read()?;
        let table = match r.open_table(USER_WORD_FREQUENCY) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match table.get(key.as_str())? {
            Some(v) => {
                let row = bincode::deserialize(v.value())
                    .map_err(|e| StorageError::Constraint(format!("decode freq row: {e}")))?;
                Ok(Some(row))
            }
            None => Ok(None),
        }
    }

    pub fn top_by_pinyin(&self, pinyin: &str, limit: usize) -> Result<Vec<UserFrequencyRow>, StorageError> {
        let mut rows = self.all_freq()?;
        rows.retain(|r| r.pinyin == pinyin);
        rows.sort_by(|a, b| b.frequency.cmp(&a.frequency));
        rows.truncate(limit);
        Ok(rows)
    }

    pub fn set_freq(&self, word: &str, pinyin: &str, freq: i32) -> Result<(), StorageError> {
        let key = word_freq_key(word, pinyin);
        let now = now_secs();
        let existing = self.get_freq_row(word, pinyin)?;
        let row = UserFrequencyRow {
            id: existing.as_ref().map(|r| r.id).unwrap_or(0),
            word: word.to_string(),
            pinyin: pinyin.to_string(),
            frequency: freq,
            last_used: now,
            created: existing.map(|r| r.created).unwrap_or(now),
        };
        let bytes = bincode::serialize(&row)
            .map_err(|e| StorageError::Constraint(format!("encode freq row: {e}")))?;
        let w = self.db.begin_write()?;
        {
            let mut table = w.open_table(USER_WORD_FREQUENCY)?;
            table.insert(key.as_str(), bytes.as_slice())?;
        }
        w.commit()?;
        Ok(())
    }

    pub fn delete_freq(&self, word: &str, pinyin: &str) -> Result<(), StorageError> {
        let key = word_freq_key(word, pinyin);
        let w = self.db.begin_write()?;
        {
            let mut table = w.open_table(USER_WORD_FREQUENCY)?;
            table.remove(key.as_str())?;
        }
        w.commit()?;
        Ok(())
    }

    pub fn clear_all_freq(&self) -> Result<(), StorageError> {
        let w = self.db.begin_write()?;
        {
            let mut table = w.open_table(USER_WORD_FREQUENCY)?;
            let keys: Vec<String> = table.iter()?.filter_map(|i| i.ok()).map(|(k, _)| k.value().to_string()).collect();
            for k in keys {
                table.remove(k.as_str())?;
            }
        }
        w.commit()?;
        Ok(())
    }

    pub fn all_freq(&self) -> Result<Vec<UserFrequencyRow>, StorageError> {
        let r = self.db.begin_read()?;
        let table = match r.open_table(USER_WORD_FREQUENCY) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for item in table.iter()? {
            let (_, v) = item?;
            let row: UserFrequencyRow = bincode::deserialize(v.value())
                .map_err(|e| StorageError::Constraint(format!("decode freq row: {e}")))?;
            out.push(row);
        }
        Ok(out)
    }

    pub fn cleanup_below(&self, min: i32) -> Result<u32, StorageError> {
        let rows = self.all_freq()?;
        let mut removed = 0;
        for row in rows {
            if row.frequency < min {
                self.delete_freq(&row.word, &row.pinyin)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    pub fn cleanup_unused(&self, older_than_secs: i64) -> Result<u32, StorageError> {
        let cutoff = now_secs() - older_than_secs;
        let rows = self.all_freq()?;
        let mut removed = 0;
        for row in rows {
            if row.last_used < cutoff {
                self.delete_freq(&row.word, &row.pinyin)?;
                removed += 1;
            }
        }
        Ok(removed)
    }

    // ===================== config =====================

    pub fn get(&self, key: &str, default: &str) -> Result<String, StorageError> {
        let r = self.db.begin_read()?;
        let table = match r.open_table(CONFIG) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(default.to_string()),
            Err(e) => return Err(e.into()),
        };
        match table.get(key)? {
            Some(v) => Ok(v.value().to_string()),
            None => Ok(default.to_string()),
        }
    }

    pub fn set(&self, key: &str, value: &str) -> Result<(), StorageError> {
        let w = self.db.begin_write()?;
        {
            let mut table = w.open_table(CONFIG)?;
            table.insert(key, value)?;
        }
        w.commit()?;
        Ok(())
    }

    pub fn delete(&self, key: &str) -> Result<(), StorageError> {
        let w = self.db.begin_write()?;
        {
            let mut table = w.open_table(CONFIG)?;
            table.remove(key)?;
        }
        w.commit()?;
        Ok(())
    }

    pub fn list_all(&self) -> Result<Vec<(String, String)>, StorageError> {
        let r = self.db.begin_read()?;
        let table = match r.open_table(CONFIG) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for item in table.iter()? {
            let (k, v) = item?;
            out.push((k.value().to_string(), v.value().to_string()));
        }
        Ok(out)
    }

    // ===================== download_task =====================

    pub fn save_task(&self, task: &DownloadTask) -> Result<(), StorageError> {
        let bytes = bincode::serialize(task)
            .map_err(|e| StorageError::Constraint(format!("encode download task: {e}")))?;
        let w = self.db.begin_write()?;
        {
            let mut table = w.open_table(DOWNLOAD_TASK)?;
            table.insert(task.dict_id.as_str(), bytes.as_slice())?;
        }
        w.commit()?;
        Ok(())
    }

    pub fn get_task(&self, dict_id: &str) -> Result<Option<DownloadTask>, StorageError> {
        let r = self.db.begin_read()?;
        let table = match r.open_table(DOWNLOAD_TASK) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(None),
            Err(e) => return Err(e.into()),
        };
        match table.get(dict_id)? {
            Some(v) => {
                let task = bincode::deserialize(v.value())
                    .map_err(|e| StorageError::Constraint(format!("decode download task: {e}")))?;
                Ok(Some(task))
            }
            None => Ok(None),
        }
    }

    pub fn update_progress(
        &self,
        dict_id: &str,
        downloaded: u64,
        status: crate::download::DownloadStatus,
    ) -> Result<(), StorageError> {
        let mut task = self.get_task(dict_id)?.ok_or_else(|| {
            StorageError::Constraint(format!("no download task for {dict_id}"))
        })?;
        task.downloaded_size = downloaded;
        task.status = status;
        self.save_task(&task)
    }

    pub fn list_non_terminal(&self) -> Result<Vec<DownloadTask>, StorageError> {
        let r = self.db.begin_read()?;
        let table = match r.open_table(DOWNLOAD_TASK) {
            Ok(t) => t,
            Err(redb::TableError::TableDoesNotExist(_)) => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };
        let mut out = Vec::new();
        for item in table.iter()? {
            let (_, v) = item?;
            let task: DownloadTask = bincode::deserialize(v.value())
                .map_err(|e| StorageError::Constraint(format!("decode download task: {e}")))?;
            if !task.status.is_terminal() {
                out.push(task);
            }
        }
        Ok(out)
    }

    pub fn delete_task(&self, dict_id: &str) -> Result<(), StorageError> {
        let w = self.db.begin_write()?;
        {
            let mut table = w.open_table(DOWNLOAD_TASK)?;
            table.remove(dict_id)?;
        }
        w.commit()?;
        Ok(())
    }
}

fn sort_by_priority(metas: &mut [DictMeta]) {
    metas.sort_by(|a, b| b.priority.cmp(&a.priority).then_with(|| a.id.cmp(&b.id)));
}

fn now_secs() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}
