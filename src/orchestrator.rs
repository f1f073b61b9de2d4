//! Orchestrator (C7): the composition root. Owns Storage, DictionaryRegistry,
//! FrequencyStore, CandidateAssembler, and AutoLearner, and multiplexes them
//! across one `InputSession` per focused document.
//!
//! Grounded on `ime_engine.rs::ImeEngine` (owns the editors + one session +
//! a context, single `process_key` entry point), generalized from an
//! implicit single session to a `HashMap<DocumentId, InputSession>` per
//! §4.8's `focus_in(document_id)`/`focus_out(document_id)` keyed lifecycle.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, RwLock};

use crate::autolearn::AutoLearner;
use crate::candidate::{CandidateAssembler, MergeConfig};
use crate::candidate_source::CandidateSource;
use crate::dictionary::DictionaryRegistry;
use crate::error::StorageError;
use crate::frequency::FrequencyStore;
use crate::host::{Host, Rect};
use crate::session::{InputMode, InputSession, KeyEvent, Outcome};
use crate::storage::Storage;

/// Opaque per-focus identifier; the embedder decides what it means (a
/// window handle, a text-field id, ...).
pub type DocumentId = u64;

/// Filesystem locations needed at startup. `shared_dict_dir` is unused by
/// the core itself today (dictionary paths are resolved per §6 either as
/// absolute or relative to it) but is threaded through so an embedder can
/// register dictionaries with relative `source_path`s.
#[derive(Debug, Clone)]
pub struct InitPaths {
    pub db_path: PathBuf,
    pub shared_dict_dir: Option<PathBuf>,
}

impl InitPaths {
    pub fn new<P: AsRef<Path>>(db_path: P) -> Self {
        InitPaths {
            db_path: db_path.as_ref().to_path_buf(),
            shared_dict_dir: None,
        }
    }

    pub fn resolve_dict_path(&self, source_path: &str) -> PathBuf {
        let p = Path::new(source_path);
        if p.is_absolute() {
            return p.to_path_buf();
        }
        match &self.shared_dict_dir {
            Some(dir) => dir.join(p),
            None => p.to_path_buf(),
        }
    }
}

/// Owns C1-C6 and routes host-facing calls to per-document sessions.
pub struct Orchestrator {
    storage: Storage,
    dictionary: Arc<DictionaryRegistry>,
    frequency: Arc<FrequencyStore>,
    assembler: Arc<CandidateAssembler>,
    learner: Arc<AutoLearner>,
    host: Arc<dyn Host>,
    sessions: RwLock<HashMap<DocumentId, InputSession>>,
    cursor_rects: RwLock<HashMap<DocumentId, Rect>>,
}

impl Orchestrator {
    /// Opens Storage, constructs C2-C6, loads every enabled dictionary, and
    /// returns a ready-to-use orchestrator. `source` is the optional opaque
    /// `CandidateSource` (§4.2); `None` falls back to dictionary-only
    /// ranking.
    pub fn init(
        paths: InitPaths,
        host: Arc<dyn Host>,
        source: Option<Box<dyn CandidateSource>>,
    ) -> Result<Self, StorageError> {
        let storage = Storage::open(&paths.db_path)?;
        let dictionary = Arc::new(
            DictionaryRegistry::new(storage.clone())
                .map_err(|e| StorageError::Constraint(e.to_string()))?,
        );
        let loaded = dictionary.load_all_enabled();
        tracing::info!(loaded, "dictionaries loaded at startup");

        let frequency = Arc::new(FrequencyStore::new(storage.clone())?);
        let assembler = Arc::new(CandidateAssembler::new(
            dictionary.clone(),
            frequency.clone(),
            source,
            MergeConfig::default(),
        ));
        let learner = Arc::new(AutoLearner::new(storage.clone(), frequency.clone())?);

        Ok(Orchestrator {
            storage,
            dictionary,
            frequency,
            assembler,
            learner,
            host,
            sessions: RwLock::new(HashMap::new()),
            cursor_rects: RwLock::new(HashMap::new()),
        })
    }

    pub fn dictionary(&self) -> &Arc<DictionaryRegistry> {
        &self.dictionary
    }

    pub fn frequency(&self) -> &Arc<FrequencyStore> {
        &self.frequency
    }

    pub fn learner(&self) -> &Arc<AutoLearner> {
        &self.learner
    }

    pub fn storage(&self) -> &Storage {
        &self.storage
    }

    /// Allocates a fresh `InputSession` for a newly focused document.
    pub fn focus_in(&self, document_id: DocumentId) {
        let session = InputSession::new(
            self.assembler.clone(),
            self.frequency.clone(),
            self.learner.clone(),
            self.storage.clone(),
        );
        self.sessions.write().unwrap().insert(document_id, session);
    }

    /// Persists the session's mode and destroys it.
    pub fn focus_out(&self, document_id: DocumentId) {
        self.sessions.write().unwrap().remove(&document_id);
        self.cursor_rects.write().unwrap().remove(&document_id);
    }

    /// Dispatches a key event to the focused document's session and routes
    /// the resulting `Outcome` to the host. Returns the `Outcome` as well,
    /// so embedders that want to drive their own UI pipeline directly can
    /// skip the `Host` trait.
    pub fn process_key(&self, document_id: DocumentId, event: KeyEvent) -> Outcome {
        let (outcome, page_index) = {
            let mut sessions = self.sessions.write().unwrap();
            match sessions.get_mut(&document_id) {
                Some(session) => {
                    let outcome = session.process_key(event);
                    (outcome, session.page_index())
                }
                None => return Outcome::PassThrough,
            }
        };
        self.route_to_host(&outcome, page_index);
        outcome
    }

    fn route_to_host(&self, outcome: &Outcome, page_index: u32) {
        match outcome {
            Outcome::PassThrough | Outcome::Consumed => {}
            Outcome::Update {
                preedit,
                page_view,
                total_pages,
                mode: _,
            } => {
                self.host.update_preedit(preedit, preedit.chars().count() as u32);
                self.host.show_candidates(page_view, page_index, *total_pages);
            }
            Outcome::UpdateHideCandidates { preedit } => {
                self.host.update_preedit(preedit, preedit.chars().count() as u32);
                self.host.hide_candidates();
            }
            Outcome::Hide => {
                self.host.clear_preedit();
                self.host.hide_candidates();
            }
            Outcome::Commit { text } => {
                self.host.clear_preedit();
                self.host.hide_candidates();
                self.host.commit(text);
            }
        }
    }

    /// Bookkeeping only: the core does not reposition anything itself (that
    /// is the host's job per the non-goals), it just remembers the latest
    /// geometry in case a future `show_candidates` call wants it.
    pub fn update_cursor(&self, document_id: DocumentId, rect: Rect) {
        self.cursor_rects.write().unwrap().insert(document_id, rect);
    }

    pub fn toggle_mode(&self, document_id: DocumentId) {
        let mut sessions = self.sessions.write().unwrap();
        if let Some(session) = sessions.get_mut(&document_id) {
            let next = match session.mode() {
                InputMode::English => InputMode::Chinese,
                InputMode::Chinese | InputMode::TempEnglish => InputMode::English,
            };
            session.force_mode(next);
        }
    }

    pub fn set_mode(&self, document_id: DocumentId, mode: InputMode) {
        let mut sessions = self.sessions.write().unwrap();
        if let Some(session) = sessions.get_mut(&document_id) {
            session.force_mode(mode);
        }
    }

    pub fn get_mode(&self, document_id: DocumentId) -> Option<InputMode> {
        self.sessions
            .read()
            .unwrap()
            .get(&document_id)
            .map(|s| s.mode())
    }

    pub fn reset(&self, document_id: DocumentId) {
        if let Some(session) = self.sessions.write().unwrap().get_mut(&document_id) {
            session.reset();
        }
        self.host.clear_preedit();
        self.host.hide_candidates();
    }

    /// No persistent resources beyond `Storage`'s redb file to close; kept
    /// as an explicit lifecycle method per §4.8 so an embedder has one
    /// well-defined shutdown hook (flushing any open session's mode is
    /// already done eagerly on every mode change, not deferred to here).
    pub fn shutdown(&self) {
        self.sessions.write().unwrap().clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate_source::ExternalCandidate;
    use crate::session::{KeyEvent, KeyType};
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingHost {
        committed: StdMutex<Vec<String>>,
        shown: StdMutex<u32>,
        hidden: StdMutex<u32>,
    }

    impl Host for RecordingHost {
        fn commit(&self, text: &str) {
            self.committed.lock().unwrap().push(text.to_string());
        }
        fn update_preedit(&self, _text: &str, _caret: u32) {}
        fn clear_preedit(&self) {}
        fn show_candidates(&self, _page_view: &[crate::candidate::CandidateWord], _page_index: u32, _total_pages: u32) {
            *self.shown.lock().unwrap() += 1;
        }
        fn hide_candidates(&self) {
            *self.hidden.lock().unwrap() += 1;
        }
    }

    struct FixedSource;
    impl CandidateSource for FixedSource {
        fn query(&self, pinyin: &str, _limit: usize) -> Vec<ExternalCandidate> {
            if pinyin == "ni" {
                vec![ExternalCandidate {
                    text: "你".to_string(),
                    frequency: 10,
                    comment: None,
                }]
            } else {
                Vec::new()
            }
        }
    }

    fn init(name: &str) -> (Orchestrator, Arc<RecordingHost>) {
        let mut tmp = std::env::temp_dir();
        tmp.push(format!(
            "ime_core_orch_test_{}_{}.redb",
            name,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let host = Arc::new(RecordingHost::default());
        let orch = Orchestrator::init(
            InitPaths::new(&tmp),
            host.clone() as Arc<dyn Host>,
            Some(Box::new(FixedSource)),
        )
        .unwrap();
        (orch, host)
    }

    #[test]
    fn focus_process_commit_routes_to_host() {
        let (orch, host) = init("commit");
        orch.focus_in(1);
        orch.process_key(1, KeyEvent::letter('n', false));
        orch.process_key(1, KeyEvent::letter('i', false));
        let outcome = orch.process_key(1, KeyEvent::digit('1'));
        assert_eq!(outcome, Outcome::Commit { text: "你".to_string() });
        assert_eq!(host.committed.lock().unwrap().as_slice(), ["你".to_string()]);
        orch.focus_out(1);
    }

    #[test]
    fn unfocused_document_passes_through() {
        let (orch, _host) = init("unfocused");
        let outcome = orch.process_key(99, KeyEvent::new(KeyType::Enter));
        assert_eq!(outcome, Outcome::PassThrough);
    }

    #[test]
    fn set_mode_and_get_mode_round_trip() {
        let (orch, _host) = init("mode");
        orch.focus_in(1);
        orch.set_mode(1, InputMode::English);
        assert_eq!(orch.get_mode(1), Some(InputMode::English));
        orch.toggle_mode(1);
        assert_eq!(orch.get_mode(1), Some(InputMode::Chinese));
    }
}
