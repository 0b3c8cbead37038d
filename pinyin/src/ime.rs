//! Soft-keyboard input state machine.
//!
//! Key codes arrive through `click` (or a `KeySender` held by the host) and
//! are appended to a FIFO queue. The machine drains the queue one code at a
//! time, keeping a pending buffer of typed letters, and talks back to the
//! host only through the `ImeGlue` trait.
//!
//! After a candidate is committed the machine switches to suggestion mode:
//! with an empty buffer it offers longer phrases continuing the committed
//! text until the user types, dismisses them or picks one.
//!
//! Term candidates are shown as soon as a key is applied. The full-sentence
//! composition runs as a `SentenceTask` that the host advances with `tick`
//! between events; its result is merged into the panel when it completes,
//! and dropped if the buffer changed in the meantime.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::path::Path;
use std::rc::Rc;

use hanzi_decoder_core::candidate::{dedup_by_text, rank_by_span};
use hanzi_decoder_core::{
    Backend, Candidate, CandidateKind, Decoder, DictError, DictionarySnapshot, Progress,
    SentenceTask, TermStore, SEPARATOR,
};
use tracing::debug;

use crate::config::PinyinConfig;
use crate::parser::Parser;

/// Key codes with a fixed meaning.
pub mod key {
    pub const BACKSPACE: i32 = 8;
    pub const RETURN: i32 = 13;
    pub const SEPARATOR: i32 = 39;
    pub const LOWER_A: i32 = 97;
    pub const LOWER_Z: i32 = 122;
}

/// True for codes that extend the pending buffer: `'` and `a`..=`z`.
pub fn is_syllable_code(code: i32) -> bool {
    code == key::SEPARATOR || (key::LOWER_A..=key::LOWER_Z).contains(&code)
}

/// Output side of the state machine, implemented by the keyboard host.
pub trait ImeGlue {
    /// Replace the displayed candidate list.
    fn send_candidates(&mut self, candidates: &[Candidate]);
    /// Show the pending (uncommitted) input.
    fn send_pending_symbols(&mut self, symbols: &str);
    /// Let the host handle a key itself.
    fn send_key(&mut self, code: i32);
    /// Insert committed text.
    fn send_string(&mut self, text: &str);
    /// Switch the visible keyboard layout.
    fn alter_keyboard(&mut self, layout: &str);
}

#[derive(Debug, Clone, PartialEq)]
enum Action {
    Key(i32),
    /// Queued by `select`; stripping the buffer happens in queue order.
    CommitSelection { text: String, key: String },
}

type SharedQueue = Rc<RefCell<VecDeque<Action>>>;

/// Cloneable handle for enqueueing keys, usable from inside glue callbacks.
#[derive(Debug, Clone)]
pub struct KeySender {
    queue: SharedQueue,
}

impl KeySender {
    /// Append a key code. It is processed after everything already queued,
    /// by the drain loop that is running or by the next `click`/`select`.
    pub fn click(&self, code: i32) {
        self.queue.borrow_mut().push_back(Action::Key(code));
    }
}

/// `Processing` while keys are being applied or a sentence composition is
/// still pending.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImeState {
    Idle,
    Processing,
}

/// What the candidate panel currently shows.
#[derive(Debug, Clone, PartialEq)]
enum Display {
    Empty,
    Terms { first: Candidate },
    Suggestions,
}

/// Sentence composition started for `buffer`, with the term candidates
/// it will be merged into.
struct PendingSentence<S: TermStore + 'static> {
    buffer: String,
    terms: Vec<Candidate>,
    task: SentenceTask<'static, S>,
}

pub struct PinyinIme<G: ImeGlue, S: TermStore + 'static = Backend> {
    glue: Option<G>,
    decoder: Rc<Decoder<S>>,
    parser: Parser,
    config: PinyinConfig,

    queue: SharedQueue,
    draining: bool,
    sentence: Option<PendingSentence<S>>,
    active_layout: String,

    buffer: String,
    selected_text: String,
    selected_syllables: Vec<String>,
    display: Display,
}

impl<G: ImeGlue> PinyinIme<G, Backend> {
    /// Load the dictionary at `dict_path` into the backend chosen by
    /// `config` and build an engine on it.
    pub fn open<P: AsRef<Path>>(config: PinyinConfig, dict_path: P) -> Result<Self, DictError> {
        let max_term_length = config.base.max_term_length;
        let backend = Backend::select(&config.base, || {
            DictionarySnapshot::load(dict_path.as_ref(), max_term_length)
        })?;
        debug!(backend = backend.kind(), "dictionary backend selected");
        let decoder = Decoder::new(backend, config.base.clone());
        Ok(Self::new(decoder, config))
    }
}

impl<G: ImeGlue, S: TermStore + 'static> PinyinIme<G, S> {
    pub fn new(decoder: Decoder<S>, config: PinyinConfig) -> Self {
        let active_layout = config.default_layout.clone();
        Self {
            glue: None,
            decoder: Rc::new(decoder),
            parser: Parser::new(),
            config,
            queue: Rc::new(RefCell::new(VecDeque::new())),
            draining: false,
            sentence: None,
            active_layout,
            buffer: String::new(),
            selected_text: String::new(),
            selected_syllables: Vec::new(),
            display: Display::Empty,
        }
    }

    /// Attach the host glue. Keys queued before this are processed now.
    pub fn init(&mut self, glue: G) {
        debug!("init");
        self.glue = Some(glue);
        self.start();
    }

    /// Detach the glue, dropping pending input and decoder caches.
    pub fn uninit(&mut self) -> Option<G> {
        debug!("uninit");
        self.empty();
        self.queue.borrow_mut().clear();
        self.decoder.clear_cache();
        self.glue.take()
    }

    /// Enqueue a key code and process the queue.
    pub fn click(&mut self, code: i32) {
        debug!(code, "click");
        self.queue.borrow_mut().push_back(Action::Key(code));
        self.start();
    }

    /// The user picked a displayed candidate.
    ///
    /// `key` is the candidate's syllable string. Once the queue reaches this
    /// selection, `text` is sent to the host and `key` is stripped from the
    /// front of the buffer.
    pub fn select(&mut self, text: &str, key: &str) {
        debug!(text, key, "select");
        self.queue.borrow_mut().push_back(Action::CommitSelection {
            text: text.to_string(),
            key: key.to_string(),
        });
        self.start();
    }

    /// Drop all pending input and clear the host's display.
    pub fn empty(&mut self) {
        self.sentence = None;
        self.buffer.clear();
        self.selected_text.clear();
        self.selected_syllables.clear();
        self.display = Display::Empty;
        self.emit(|g| {
            g.send_pending_symbols("");
            g.send_candidates(&[]);
        });
    }

    /// An input field gained focus: reset and pick its layout.
    pub fn show(&mut self, field_type: &str) {
        debug!(field_type, "show");
        self.empty();
        let layout = self.config.layout_for_field(field_type).to_string();
        self.switch_layout(layout);
    }

    pub fn key_sender(&self) -> KeySender {
        KeySender {
            queue: Rc::clone(&self.queue),
        }
    }

    /// Advance the pending sentence composition by one DP transition.
    ///
    /// Returns `Progress::Complete` once nothing is pending; the composed
    /// sentence has then been merged into the candidate panel, unless the
    /// buffer changed after it was started.
    pub fn tick(&mut self) -> Progress {
        let Some(pending) = self.sentence.as_mut() else {
            return Progress::Complete;
        };
        if pending.task.step() == Progress::Ran {
            return Progress::Ran;
        }
        if let Some(pending) = self.sentence.take() {
            self.merge_sentence(pending);
        }
        Progress::Complete
    }

    /// Run the pending sentence composition to the end. Returns the number
    /// of steps taken.
    pub fn run_pending(&mut self) -> usize {
        let mut steps = 0;
        while self.tick() == Progress::Ran {
            steps += 1;
        }
        steps
    }

    pub fn state(&self) -> ImeState {
        if self.draining || self.sentence.is_some() {
            ImeState::Processing
        } else {
            ImeState::Idle
        }
    }

    /// Letters typed but not yet committed.
    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn active_layout(&self) -> &str {
        &self.active_layout
    }

    pub fn decoder(&self) -> &Decoder<S> {
        &self.decoder
    }

    pub fn glue(&self) -> Option<&G> {
        self.glue.as_ref()
    }

    pub fn glue_mut(&mut self) -> Option<&mut G> {
        self.glue.as_mut()
    }

    fn emit<F: FnOnce(&mut G)>(&mut self, f: F) {
        if let Some(glue) = self.glue.as_mut() {
            f(glue);
        }
    }

    fn next_action(&self) -> Option<Action> {
        self.queue.borrow_mut().pop_front()
    }

    /// Drain the queue. Keys wait in the queue until glue is attached.
    fn start(&mut self) {
        if self.draining || self.glue.is_none() {
            return;
        }
        self.draining = true;
        while let Some(action) = self.next_action() {
            self.apply(action);
        }
        self.draining = false;
    }

    fn apply(&mut self, action: Action) {
        match action {
            Action::CommitSelection { text, key } => self.commit_selection(text, &key),
            Action::Key(code) if code < 0 => {
                match self.config.layout_for_code(code).map(str::to_string) {
                    Some(layout) => self.switch_layout(layout),
                    None => debug!(code, "no layout bound to code"),
                }
            }
            Action::Key(0) => debug!("ignoring key code 0"),
            Action::Key(code) if self.active_layout != self.config.default_layout => {
                self.emit(|g| g.send_key(code));
            }
            Action::Key(key::BACKSPACE) => self.backspace(),
            Action::Key(code) => {
                let at_cap = self.buffer.len() >= self.config.base.max_buffer_length;
                match char::from_u32(code as u32) {
                    Some(c) if is_syllable_code(code) && !at_cap => {
                        self.buffer.push(c);
                        self.refresh();
                    }
                    _ => self.flush(code),
                }
            }
        }
    }

    fn switch_layout(&mut self, layout: String) {
        debug!(%layout, "alter keyboard");
        self.emit(|g| g.alter_keyboard(&layout));
        self.active_layout = layout;
    }

    fn backspace(&mut self) {
        if self.buffer.pop().is_some() {
            self.refresh();
        } else if self.display != Display::Empty {
            debug!("cancel suggestions");
            self.selected_text.clear();
            self.selected_syllables.clear();
            self.refresh();
        } else {
            self.emit(|g| g.send_key(key::BACKSPACE));
        }
    }

    /// Return, a non-syllable key or a full buffer: commit the first term
    /// candidate (or dismiss suggestions), then let the host see the key.
    fn flush(&mut self, code: i32) {
        // the composed sentence may outrank the term shown first
        self.run_pending();
        match std::mem::replace(&mut self.display, Display::Empty) {
            Display::Terms { first } => {
                debug!(text = %first.text, "commit first candidate");
                self.emit(|g| g.send_string(&first.text));
                self.empty();
                if code != key::RETURN {
                    self.emit(|g| g.send_key(code));
                }
            }
            Display::Suggestions => {
                debug!("dismiss suggestions");
                self.selected_text.clear();
                self.selected_syllables.clear();
                self.emit(|g| g.send_candidates(&[]));
                self.emit(|g| g.send_key(code));
            }
            Display::Empty => {
                if !self.buffer.is_empty() {
                    // separators only
                    self.empty();
                }
                self.emit(|g| g.send_key(code));
            }
        }
    }

    fn commit_selection(&mut self, text: String, key: &str) {
        self.emit(|g| g.send_string(&text));
        let suggestion_mode = self.buffer.is_empty() && self.display == Display::Suggestions;
        self.buffer = strip_key(&self.buffer, key);

        if suggestion_mode {
            self.selected_text.push_str(&text);
        } else {
            self.selected_text = text;
        }
        self.selected_syllables = key
            .split(SEPARATOR)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .collect();
        self.refresh();
    }

    /// Regenerate candidates for the current state.
    fn refresh(&mut self) {
        self.sentence = None;
        if self.buffer.is_empty() {
            if self.selected_syllables.is_empty() {
                self.display = Display::Empty;
                self.emit(|g| {
                    g.send_pending_symbols("");
                    g.send_candidates(&[]);
                });
            } else {
                self.refresh_suggestions();
            }
            return;
        }
        self.refresh_terms();
    }

    fn refresh_terms(&mut self) {
        let Some(segmentation) = self.parser.best(&self.buffer) else {
            // only separators typed so far
            let pending = self.buffer.clone();
            self.display = Display::Empty;
            self.emit(|g| {
                g.send_pending_symbols(&pending);
                g.send_candidates(&[]);
            });
            return;
        };

        let pending = segmentation.joined();
        self.emit(|g| g.send_pending_symbols(&pending));

        let keys = segmentation.texts();
        let mut terms = Vec::new();
        for len in (1..=keys.len()).rev() {
            let prefix = &keys[..len];
            let mut found = self.decoder.get_terms(prefix);
            if found.is_empty() && !segmentation.syllables[..len].iter().all(|s| s.is_complete()) {
                found = self.decoder.get_abbreviated_terms(prefix);
            }
            terms.extend(found);
        }
        // term weights on the sentence's probability scale
        let total = self.decoder.total_weight();
        if total > 0.0 {
            for term in &mut terms {
                term.weight /= total;
            }
        }
        if terms.is_empty() {
            let literal: String = self.buffer.chars().filter(|&c| c != SEPARATOR).collect();
            terms.push(Candidate::literal(literal, self.buffer.as_str()));
        }
        let terms = rank_by_span(terms);

        if keys.len() > 1 {
            debug!(syllables = keys.len(), "sentence composition queued");
            self.sentence = Some(PendingSentence {
                buffer: self.buffer.clone(),
                terms: terms.clone(),
                task: self.decoder.shared_sentence_task(&keys),
            });
        }
        self.show_terms(terms);
    }

    fn show_terms(&mut self, candidates: Vec<Candidate>) {
        debug!(count = candidates.len(), buffer = %self.buffer, "term candidates");
        self.display = match candidates.first() {
            Some(first) => Display::Terms {
                first: first.clone(),
            },
            None => Display::Empty,
        };
        self.emit(|g| g.send_candidates(&candidates));
    }

    fn merge_sentence(&mut self, pending: PendingSentence<S>) {
        if pending.buffer != self.buffer {
            debug!(stale = %pending.buffer, "dropping sentence for an old buffer");
            return;
        }
        let Some(sentence) = pending.task.finish() else {
            return;
        };
        if sentence.weight <= 0.0 {
            return;
        }
        let mut candidates = Vec::with_capacity(pending.terms.len() + 1);
        candidates.push(sentence);
        candidates.extend(pending.terms);
        self.show_terms(rank_by_span(candidates));
    }

    fn refresh_suggestions(&mut self) {
        let suggestions = self
            .decoder
            .get_suggestions(&self.selected_syllables, &self.selected_text);
        // show only what the suggestion adds to the committed text
        let shown: Vec<Candidate> = suggestions
            .into_iter()
            .filter_map(|c| {
                let rest = c.text.strip_prefix(self.selected_text.as_str())?.to_string();
                Some(Candidate::new(rest, c.syllables, c.weight, CandidateKind::Suggestion))
            })
            .collect();
        let shown = dedup_by_text(shown);
        debug!(count = shown.len(), committed = %self.selected_text, "suggestions");

        self.display = if shown.is_empty() {
            Display::Empty
        } else {
            Display::Suggestions
        };
        self.emit(|g| {
            g.send_pending_symbols("");
            g.send_candidates(&shown);
        });
    }
}

/// Remove the letters of `key` from the front of `buffer`, skipping
/// separators on both sides, then drop leading separators.
fn strip_key(buffer: &str, key: &str) -> String {
    let mut rest = buffer;
    for wanted in key.chars().filter(|&c| c != SEPARATOR) {
        let trimmed = rest.trim_start_matches(SEPARATOR);
        match trimmed.strip_prefix(wanted) {
            Some(after) => rest = after,
            None => break,
        }
    }
    rest.trim_start_matches(SEPARATOR).to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use hanzi_decoder_core::{Homonyms, MemoryStore, Term};

    #[derive(Default)]
    struct Recorder {
        candidates: Vec<Vec<String>>,
        pending: Vec<String>,
        keys: Vec<i32>,
        strings: Vec<String>,
        layouts: Vec<String>,
    }

    impl ImeGlue for Recorder {
        fn send_candidates(&mut self, candidates: &[Candidate]) {
            self.candidates
                .push(candidates.iter().map(|c| c.text.clone()).collect());
        }
        fn send_pending_symbols(&mut self, symbols: &str) {
            self.pending.push(symbols.to_string());
        }
        fn send_key(&mut self, code: i32) {
            self.keys.push(code);
        }
        fn send_string(&mut self, text: &str) {
            self.strings.push(text.to_string());
        }
        fn alter_keyboard(&mut self, layout: &str) {
            self.layouts.push(layout.to_string());
        }
    }

    fn ime() -> PinyinIme<Recorder, MemoryStore> {
        let mut store = MemoryStore::new();
        store.set_all_terms(vec![
            Homonyms::new("ni", vec![Term::new("你", 90)]),
            Homonyms::new("hao", vec![Term::new("好", 80)]),
            Homonyms::new("ni'hao", vec![Term::new("你好", 70)]),
        ]);
        let config = PinyinConfig::default();
        let mut ime = PinyinIme::new(Decoder::new(store, config.base.clone()), config);
        ime.init(Recorder::default());
        ime
    }

    fn type_str(ime: &mut PinyinIme<Recorder, MemoryStore>, s: &str) {
        for c in s.chars() {
            ime.click(c as i32);
        }
    }

    fn last_candidates(ime: &PinyinIme<Recorder, MemoryStore>) -> Vec<String> {
        ime.glue().unwrap().candidates.last().cloned().unwrap_or_default()
    }

    #[test]
    fn typing_shows_sentence_then_terms() {
        let mut ime = ime();
        type_str(&mut ime, "nihao");
        assert_eq!(ime.buffer(), "nihao");
        assert_eq!(ime.glue().unwrap().pending.last().unwrap(), "ni'hao");
        assert_eq!(last_candidates(&ime), vec!["你好", "你"]);
        // the sentence is still being composed
        assert_eq!(ime.state(), ImeState::Processing);
        assert!(ime.run_pending() > 0);
        assert_eq!(ime.state(), ImeState::Idle);
        assert_eq!(last_candidates(&ime), vec!["你好", "你"]);
        assert_eq!(ime.tick(), Progress::Complete);
    }

    #[test]
    fn single_syllable_needs_no_sentence() {
        let mut ime = ime();
        type_str(&mut ime, "ni");
        assert_eq!(ime.state(), ImeState::Idle);
        assert_eq!(ime.run_pending(), 0);
    }

    #[test]
    fn separator_only_buffer_is_cleared_on_return() {
        let mut ime = ime();
        type_str(&mut ime, "''");
        assert_eq!(ime.buffer(), "''");
        ime.click(key::RETURN);
        assert_eq!(ime.buffer(), "");
        let glue = ime.glue().unwrap();
        assert!(glue.strings.is_empty());
        assert_eq!(glue.keys, vec![key::RETURN]);
        assert_eq!(glue.pending.last().unwrap(), "");
    }

    #[test]
    fn return_commits_without_forwarding() {
        let mut ime = ime();
        type_str(&mut ime, "ni");
        ime.click(key::RETURN);
        let glue = ime.glue().unwrap();
        assert_eq!(glue.strings, vec!["你"]);
        assert!(glue.keys.is_empty());
        assert_eq!(ime.buffer(), "");
    }

    #[test]
    fn non_syllable_key_commits_and_forwards() {
        let mut ime = ime();
        type_str(&mut ime, "ni");
        ime.click(' ' as i32);
        let glue = ime.glue().unwrap();
        assert_eq!(glue.strings, vec!["你"]);
        assert_eq!(glue.keys, vec![' ' as i32]);
    }

    #[test]
    fn backspace_on_empty_state_is_forwarded() {
        let mut ime = ime();
        ime.click(key::BACKSPACE);
        ime.click(key::RETURN);
        assert_eq!(ime.glue().unwrap().keys, vec![key::BACKSPACE, key::RETURN]);
    }

    #[test]
    fn strip_key_skips_separators() {
        assert_eq!(strip_key("nihao", "ni"), "hao");
        assert_eq!(strip_key("ni'hao", "ni"), "hao");
        assert_eq!(strip_key("nihao", "ni'hao"), "");
        assert_eq!(strip_key("zhg", "zh'g"), "");
        assert_eq!(strip_key("abc", "x"), "abc");
    }

    #[test]
    fn layout_codes_switch_keyboard() {
        let mut ime = ime();
        ime.click(-2);
        ime.click('a' as i32);
        ime.click(-3);
        let glue = ime.glue().unwrap();
        assert_eq!(glue.layouts, vec!["english", "pinyin"]);
        assert_eq!(glue.keys, vec!['a' as i32]);
        assert_eq!(ime.buffer(), "");
    }
}
