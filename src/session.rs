//! InputSession (C5): a finite state machine per focus. Dispatches raw key
//! events, drives preedit/candidate state, and emits the small set of
//! outcomes a host maps to UI effects (§4.6).
//!
//! Grounded on `session.rs`'s `ImeSession` (mode + active-flag state held
//! alongside a buffer and candidate list) and `editor.rs`'s per-key `match`
//! dispatch style (`Editor::handle_key` returning an `EditorResult`), with
//! `ime_engine.rs::ImeEngine::process_key`'s top-to-bottom rule evaluation
//! generalized from one hard-coded `KeyEvent` enum (`Number(u8)`, `Char(char)`,
//! ...) to the spec's `(KeyType, Option<char>, modifiers)` triple, since the
//! TempEnglish transition needs the *raw* shift flag on a letter key that a
//! pre-classified enum would already have thrown away.

use std::sync::Arc;

use crate::autolearn::AutoLearner;
use crate::candidate::{CandidateAssembler, CandidateWord};
use crate::frequency::FrequencyStore;
use crate::storage::Storage;

/// Current input mode of the session (§3 `InputMode`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InputMode {
    Chinese,
    English,
    /// Transient: entered on a capital letter outside composition, exited by
    /// Space/Enter/Escape/Shift or on commit. Never persisted as-is.
    TempEnglish,
}

/// Logical class of a key event, independent of platform keycodes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyType {
    Letter,
    Digit,
    Space,
    Enter,
    Escape,
    Backspace,
    Delete,
    PageUp,
    PageDown,
    Minus,
    Equal,
    Shift,
    Left,
    Right,
    Up,
    Down,
    Other,
}

/// A single key event as delivered by the host, with raw modifier flags
/// (needed to tell a shift-letter capital from a plain lowercase letter).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KeyEvent {
    pub key_type: KeyType,
    pub ch: Option<char>,
    pub shift: bool,
    pub ctrl: bool,
    pub alt: bool,
}

impl KeyEvent {
    pub fn new(key_type: KeyType) -> Self {
        KeyEvent {
            key_type,
            ch: None,
            shift: false,
            ctrl: false,
            alt: false,
        }
    }

    pub fn letter(ch: char, shift: bool) -> Self {
        KeyEvent {
            key_type: KeyType::Letter,
            ch: Some(ch),
            shift,
            ctrl: false,
            alt: false,
        }
    }

    pub fn digit(ch: char) -> Self {
        KeyEvent {
            key_type: KeyType::Digit,
            ch: Some(ch),
            shift: false,
            ctrl: false,
            alt: false,
        }
    }

    fn plain(&self) -> bool {
        !self.ctrl && !self.alt
    }
}

/// The only observable effects of `process_key`; the host maps these to UI.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    PassThrough,
    Consumed,
    Update {
        preedit: String,
        page_view: Vec<CandidateWord>,
        total_pages: u32,
        mode: InputMode,
    },
    UpdateHideCandidates {
        preedit: String,
    },
    Hide,
    Commit {
        text: String,
    },
}

/// Per-focus state machine. Not shared: owned exclusively by the
/// Orchestrator's per-document map for the session's lifetime.
pub struct InputSession {
    assembler: Arc<CandidateAssembler>,
    frequency: Arc<FrequencyStore>,
    learner: Arc<AutoLearner>,
    storage: Storage,

    preedit: String,
    all_candidates: Vec<CandidateWord>,
    page_index: u32,
    page_size: u32,
    mode: InputMode,
}

impl InputSession {
    pub fn new(
        assembler: Arc<CandidateAssembler>,
        frequency: Arc<FrequencyStore>,
        learner: Arc<AutoLearner>,
        storage: Storage,
    ) -> Self {
        let mode = match storage.get("input.default_mode", "chinese").as_deref() {
            Ok("english") => InputMode::English,
            _ => InputMode::Chinese,
        };
        let page_size: u32 = storage
            .get("input.page_size", "9")
            .ok()
            .and_then(|s| s.parse().ok())
            .unwrap_or(9);
        InputSession {
            assembler,
            frequency,
            learner,
            storage,
            preedit: String::new(),
            all_candidates: Vec::new(),
            page_index: 0,
            page_size: page_size.max(1),
            mode,
        }
    }

    pub fn mode(&self) -> InputMode {
        self.mode
    }

    pub fn frequency(&self) -> &Arc<FrequencyStore> {
        &self.frequency
    }

    /// `composing ⇔ preedit non-empty ∨ mode == TempEnglish` (I5).
    pub fn composing(&self) -> bool {
        !self.preedit.is_empty() || self.mode == InputMode::TempEnglish
    }

    pub fn preedit(&self) -> &str {
        &self.preedit
    }

    pub fn page_index(&self) -> u32 {
        self.page_index
    }

    pub fn total_pages(&self) -> u32 {
        total_pages(self.all_candidates.len(), self.page_size)
    }

    /// The derived view of the current page (§3 `candidates_on_page`).
    pub fn page_view(&self) -> Vec<CandidateWord> {
        page_slice(&self.all_candidates, self.page_index, self.page_size)
    }

    /// Clears preedit and candidates synchronously; does not change `mode`.
    pub fn reset(&mut self) {
        self.preedit.clear();
        self.all_candidates.clear();
        self.page_index = 0;
    }

    fn set_mode(&mut self, mode: InputMode) {
        if self.mode == mode {
            return;
        }
        self.mode = mode;
        self.persist_mode();
    }

    /// Explicit mode assignment from the host (`Orchestrator::set_mode`/
    /// `toggle_mode`), as opposed to a mode change derived from a key event.
    pub fn force_mode(&mut self, mode: InputMode) {
        self.set_mode(mode);
    }

    fn toggle_chinese_english(&mut self) {
        let next = match self.mode {
            InputMode::English => InputMode::Chinese,
            _ => InputMode::English,
        };
        self.set_mode(next);
    }

    /// `TempEnglish` never persists as itself; it collapses to "chinese".
    fn persist_mode(&self) {
        let value = match self.mode {
            InputMode::English => "english",
            InputMode::Chinese | InputMode::TempEnglish => "chinese",
        };
        if let Err(e) = self.storage.set("input.default_mode", value) {
            tracing::warn!(error = %e, "failed to persist input mode");
        }
    }

    pub fn process_key(&mut self, event: KeyEvent) -> Outcome {
        match self.mode {
            InputMode::English => self.dispatch_english(event),
            InputMode::TempEnglish => self.dispatch_temp_english(event),
            InputMode::Chinese => self.dispatch_chinese(event),
        }
    }

    fn dispatch_english(&mut self, event: KeyEvent) -> Outcome {
        if event.key_type == KeyType::Shift && event.plain() {
            self.set_mode(InputMode::Chinese);
            return Outcome::Consumed;
        }
        Outcome::PassThrough
    }

    fn dispatch_temp_english(&mut self, event: KeyEvent) -> Outcome {
        if event.key_type == KeyType::Shift && event.plain() {
            self.set_mode(InputMode::Chinese);
            return Outcome::Consumed;
        }
        if matches!(
            event.key_type,
            KeyType::Space | KeyType::Enter | KeyType::Escape
        ) {
            self.set_mode(InputMode::Chinese);
            return Outcome::PassThrough;
        }
        Outcome::PassThrough
    }

    fn dispatch_chinese(&mut self, event: KeyEvent) -> Outcome {
        if event.key_type == KeyType::Shift && event.plain() {
            self.toggle_chinese_english();
            return Outcome::Consumed;
        }

        let composing = self.composing();

        if !composing && event.key_type == KeyType::Letter && event.shift && event.plain() {
            self.set_mode(InputMode::TempEnglish);
            return Outcome::PassThrough;
        }

        if event.key_type == KeyType::Letter {
            if let Some(ch) = event.ch {
                self.preedit.push(ch.to_ascii_lowercase());
                return self.recompute_candidates();
            }
            return Outcome::PassThrough;
        }

        if !composing {
            // Digits and every other non-letter key pass through untouched
            // when there is nothing being composed.
            return Outcome::PassThrough;
        }

        match event.key_type {
            KeyType::Digit if !self.page_view().is_empty() => {
                let digit = event.ch.and_then(|c| c.to_digit(10)).unwrap_or(0);
                self.select_by_digit(digit as usize)
            }
            KeyType::Space => {
                if !self.page_view().is_empty() {
                    self.select_by_digit(1)
                } else {
                    self.commit_raw()
                }
            }
            KeyType::Enter => self.commit_raw(),
            KeyType::Escape => {
                self.reset();
                Outcome::Hide
            }
            KeyType::Backspace => {
                self.preedit.pop();
                if self.preedit.is_empty() {
                    self.reset();
                    Outcome::Hide
                } else {
                    self.recompute_candidates()
                }
            }
            KeyType::PageUp | KeyType::Minus if self.total_pages() > 1 => {
                let moved = self.page_index > 0;
                if moved {
                    self.page_index -= 1;
                }
                if moved {
                    self.update_outcome()
                } else {
                    Outcome::Consumed
                }
            }
            KeyType::PageDown | KeyType::Equal if self.total_pages() > 1 => {
                let moved = self.page_index + 1 < self.total_pages();
                if moved {
                    self.page_index += 1;
                }
                if moved {
                    self.update_outcome()
                } else {
                    Outcome::Consumed
                }
            }
            _ => Outcome::PassThrough,
        }
    }

    /// Requests an unbounded (for paging) candidate set from C4, resets to
    /// the first page, and returns the appropriate `Update`/
    /// `UpdateHideCandidates` outcome.
    fn recompute_candidates(&mut self) -> Outcome {
        self.all_candidates = self.assembler.merge_all(&self.preedit);
        self.page_index = 0;
        self.update_outcome()
    }

    fn update_outcome(&self) -> Outcome {
        if self.all_candidates.is_empty() {
            Outcome::UpdateHideCandidates {
                preedit: self.preedit.clone(),
            }
        } else {
            Outcome::Update {
                preedit: self.preedit.clone(),
                page_view: self.page_view(),
                total_pages: self.total_pages(),
                mode: self.mode,
            }
        }
    }

    /// `digit` is 1-based, relative to the current page.
    fn select_by_digit(&mut self, digit: usize) -> Outcome {
        if digit == 0 {
            return Outcome::Consumed;
        }
        let page = self.page_view();
        match page.get(digit - 1) {
            Some(candidate) => self.commit_candidate(candidate.clone()),
            None => Outcome::Consumed,
        }
    }

    fn commit_candidate(&mut self, candidate: CandidateWord) -> Outcome {
        let pinyin = self.preedit.clone();
        self.frequency.record_selection(&candidate.text, &pinyin);
        self.learner.record_input(&candidate.text, &pinyin);
        self.assembler.invalidate(&pinyin);
        self.reset();
        Outcome::Commit { text: candidate.text }
    }

    /// Commits the preedit string exactly as typed, with no dictionary
    /// substitution (§4.6 Enter rule, P8).
    fn commit_raw(&mut self) -> Outcome {
        let text = self.preedit.clone();
        self.reset();
        Outcome::Commit { text }
    }
}

fn total_pages(len: usize, page_size: u32) -> u32 {
    if len == 0 {
        0
    } else {
        ((len as u32) + page_size - 1) / page_size
    }
}

fn page_slice(candidates: &[CandidateWord], page_index: u32, page_size: u32) -> Vec<CandidateWord> {
    let start = (page_index as usize) * (page_size as usize);
    if start >= candidates.len() {
        return Vec::new();
    }
    let end = (start + page_size as usize).min(candidates.len());
    candidates[start..end].to_vec()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::candidate::MergeConfig;
    use crate::candidate_source::{CandidateSource, ExternalCandidate};
    use crate::dictionary::DictionaryRegistry;

    struct FixedSource {
        by_pinyin: std::collections::HashMap<String, Vec<&'static str>>,
    }

    impl CandidateSource for FixedSource {
        fn query(&self, pinyin: &str, limit: usize) -> Vec<ExternalCandidate> {
            self.by_pinyin
                .get(pinyin)
                .map(|words| {
                    words
                        .iter()
                        .enumerate()
                        .take(limit)
                        .map(|(i, w)| ExternalCandidate {
                            text: w.to_string(),
                            frequency: (words.len() - i) as u64,
                            comment: None,
                        })
                        .collect()
                })
                .unwrap_or_default()
        }
    }

    fn temp_storage(name: &str) -> Storage {
        let mut tmp = std::env::temp_dir();
        tmp.push(format!(
            "ime_core_session_test_{}_{}.redb",
            name,
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        Storage::open(&tmp).expect("open storage")
    }

    fn session_with(name: &str, pairs: &[(&str, &[&'static str])]) -> InputSession {
        let storage = temp_storage(name);
        let dictionary = DictionaryRegistry::new(storage.clone()).unwrap();
        let frequency = Arc::new(FrequencyStore::new(storage.clone()).unwrap());
        let mut by_pinyin = std::collections::HashMap::new();
        for (pinyin, words) in pairs {
            by_pinyin.insert(pinyin.to_string(), words.to_vec());
        }
        let source: Box<dyn CandidateSource> = Box::new(FixedSource { by_pinyin });
        let assembler = Arc::new(CandidateAssembler::new(
            Arc::new(dictionary),
            Arc::new(FrequencyStore::new(storage.clone()).unwrap()),
            Some(source),
            MergeConfig::default(),
        ));
        let learner = Arc::new(AutoLearner::new(storage.clone(), frequency.clone()).unwrap());
        InputSession::new(assembler, frequency, learner, storage)
    }

    #[test]
    fn basic_selection_commits_and_records_frequency() {
        let mut s = session_with("basic", &[("ni", &["你", "尼", "泥"])]);
        s.process_key(KeyEvent::letter('n', false));
        s.process_key(KeyEvent::letter('i', false));
        assert_eq!(s.preedit(), "ni");
        let outcome = s.process_key(KeyEvent::digit('1'));
        assert_eq!(outcome, Outcome::Commit { text: "你".to_string() });
        assert_eq!(s.frequency.get_user_frequency("你", "ni"), 1);
        assert!(s.preedit().is_empty());
    }

    #[test]
    fn enter_commits_raw_preedit() {
        let mut s = session_with("enter_raw", &[]);
        s.process_key(KeyEvent::letter('w', false));
        s.process_key(KeyEvent::letter('o', false));
        let outcome = s.process_key(KeyEvent::new(KeyType::Enter));
        assert_eq!(outcome, Outcome::Commit { text: "wo".to_string() });
        assert!(s.preedit().is_empty());
    }

    #[test]
    fn space_selects_first_candidate() {
        let mut s = session_with("space", &[("hao", &["好", "号", "豪"])]);
        s.process_key(KeyEvent::letter('h', false));
        s.process_key(KeyEvent::letter('a', false));
        s.process_key(KeyEvent::letter('o', false));
        let outcome = s.process_key(KeyEvent::new(KeyType::Space));
        assert_eq!(outcome, Outcome::Commit { text: "好".to_string() });
    }

    #[test]
    fn escape_cancels_without_commit() {
        let mut s = session_with("escape", &[]);
        s.process_key(KeyEvent::letter('n', false));
        s.process_key(KeyEvent::letter('i', false));
        let outcome = s.process_key(KeyEvent::new(KeyType::Escape));
        assert_eq!(outcome, Outcome::Hide);
        assert!(s.preedit().is_empty());
        assert_eq!(s.frequency.get_user_frequency("你", "ni"), 0);
    }

    #[test]
    fn paging_advances_and_stops_at_last_page() {
        let words: Vec<&'static str> = [
            "一", "二", "三", "四", "五", "六", "七", "八", "九", "十", "十一", "十二", "十三",
            "十四", "十五",
        ]
        .to_vec();
        let mut s = session_with("paging", &[("shi", &words)]);
        s.page_size = 5;
        s.process_key(KeyEvent::letter('s', false));
        s.process_key(KeyEvent::letter('h', false));
        s.process_key(KeyEvent::letter('i', false));
        assert_eq!(s.total_pages(), 3);
        assert_eq!(s.page_index(), 0);
        s.process_key(KeyEvent::new(KeyType::PageDown));
        s.process_key(KeyEvent::new(KeyType::PageDown));
        assert_eq!(s.page_index(), 2);
        assert_eq!(s.page_view().len(), 5);
        let outcome = s.process_key(KeyEvent::new(KeyType::PageDown));
        assert_eq!(outcome, Outcome::Consumed);
        assert_eq!(s.page_index(), 2);
    }

    #[test]
    fn shift_letter_enters_temp_english_and_space_returns_to_chinese() {
        let mut s = session_with("temp_english", &[]);
        assert_eq!(s.mode(), InputMode::Chinese);
        let outcome = s.process_key(KeyEvent::letter('A', true));
        assert_eq!(outcome, Outcome::PassThrough);
        assert_eq!(s.mode(), InputMode::TempEnglish);
        let outcome = s.process_key(KeyEvent::new(KeyType::Space));
        assert_eq!(outcome, Outcome::PassThrough);
        assert_eq!(s.mode(), InputMode::Chinese);
    }

    #[test]
    fn toggle_twice_returns_to_original_mode() {
        let mut s = session_with("toggle", &[]);
        let start = s.mode();
        s.process_key(KeyEvent::new(KeyType::Shift));
        s.process_key(KeyEvent::new(KeyType::Shift));
        assert_eq!(s.mode(), start);
    }

    #[test]
    fn backspace_to_empty_cancels() {
        let mut s = session_with("backspace", &[("n", &[])]);
        s.process_key(KeyEvent::letter('n', false));
        assert!(s.composing());
        let outcome = s.process_key(KeyEvent::new(KeyType::Backspace));
        assert_eq!(outcome, Outcome::Hide);
        assert!(!s.composing());
    }
}
