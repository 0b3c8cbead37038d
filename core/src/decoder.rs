//! Decoder engine: syllables to candidates.
//!
//! The decoder owns a `TermStore` and answers three questions:
//! - which terms match these syllables (`get_terms`)
//! - which longer phrases continue what was just committed (`get_suggestions`)
//! - which full sentence best covers all the syllables (`get_sentence`)
//!
//! Term and suggestion lists are memoized in LRU caches behind `RefCell`
//! (the decoder is used from a single control flow). Sentence composition
//! is a dynamic program run as cooperative jobs; `sentence_task` hands the
//! job queue to the caller so it can be interleaved with other work.

use lru::LruCache;
use std::cell::RefCell;
use std::num::NonZeroUsize;
use std::ops::Deref;
use std::rc::Rc;
use tracing::debug;

use crate::candidate::{self, Candidate, CandidateKind};
use crate::homonyms::join_syllables;
use crate::scheduler::{Job, JobQueue, Progress, Scheduler};
use crate::store::TermStore;
use crate::Config;

type CandidateCache = RefCell<LruCache<String, Vec<Candidate>>>;

/// Hit/miss counters across all decoder caches.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: usize,
    pub misses: usize,
}

impl CacheStats {
    /// Hit rate as a percentage (0.0 to 100.0).
    pub fn hit_rate(&self) -> f64 {
        let total = self.hits + self.misses;
        if total == 0 {
            0.0
        } else {
            (self.hits as f64 / total as f64) * 100.0
        }
    }
}

pub struct Decoder<S: TermStore> {
    store: S,
    config: Config,
    total_weight: f64,

    term_cache: CandidateCache,
    abbreviated_cache: CandidateCache,
    suggestion_cache: CandidateCache,
    cache_hits: RefCell<usize>,
    cache_misses: RefCell<usize>,
}

impl<S: TermStore> Decoder<S> {
    pub fn new(store: S, config: Config) -> Self {
        let capacity = NonZeroUsize::new(config.cache_capacity).unwrap_or(NonZeroUsize::MIN);
        let total_weight = store.total_weight() as f64;
        debug!(total_weight, capacity = capacity.get(), "decoder ready");
        Self {
            store,
            config,
            total_weight,
            term_cache: RefCell::new(LruCache::new(capacity)),
            abbreviated_cache: RefCell::new(LruCache::new(capacity)),
            suggestion_cache: RefCell::new(LruCache::new(capacity)),
            cache_hits: RefCell::new(0),
            cache_misses: RefCell::new(0),
        }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Sum of all dictionary weights, the sentence probability normaliser.
    pub fn total_weight(&self) -> f64 {
        self.total_weight
    }

    /// Terms for exactly these syllables, heaviest first.
    ///
    /// A single syllable with no exact match (typically a bare initial
    /// such as `"zh"`) falls back to incomplete matching, bounded by
    /// `fuzzy_candidate_limit`. Candidates carry the typed key.
    pub fn get_terms<T: AsRef<str>>(&self, syllables: &[T]) -> Vec<Candidate> {
        let key = join_syllables(syllables);
        if key.is_empty() {
            return Vec::new();
        }
        self.cached(&self.term_cache, key.clone(), || {
            let exact: Vec<Candidate> = self
                .store
                .get_terms_by_syllables(&key)
                .into_iter()
                .map(|t| Candidate::term(t.phrase, key.as_str(), t.weight))
                .collect();
            if !exact.is_empty() || syllables.len() != 1 {
                return candidate::rank(exact);
            }
            self.incomplete_candidates(&key)
        })
    }

    /// Incomplete matching for several partially typed syllables
    /// (`["zh", "g"]` finds 中国), bounded by `fuzzy_candidate_limit`.
    pub fn get_abbreviated_terms<T: AsRef<str>>(&self, syllables: &[T]) -> Vec<Candidate> {
        let key = join_syllables(syllables);
        if key.is_empty() {
            return Vec::new();
        }
        self.cached(&self.abbreviated_cache, key.clone(), || {
            self.incomplete_candidates(&key)
        })
    }

    fn incomplete_candidates(&self, key: &str) -> Vec<Candidate> {
        let matches: Vec<Candidate> = self
            .store
            .get_terms_by_incomplete_syllables(key)
            .into_iter()
            .flat_map(|h| h.terms.into_iter())
            .map(|t| Candidate::term(t.phrase, key, t.weight))
            .collect();
        let mut ranked = candidate::rank(matches);
        ranked.truncate(self.config.fuzzy_candidate_limit);
        ranked
    }

    /// Longer phrases that start with `committed`, found by a prefix query
    /// on the committed syllables. `committed` itself is never suggested.
    pub fn get_suggestions<T: AsRef<str>>(&self, syllables: &[T], committed: &str) -> Vec<Candidate> {
        let key = join_syllables(syllables);
        if key.is_empty() || committed.is_empty() {
            return Vec::new();
        }
        let cache_key = format!("{key}\t{committed}");
        self.cached(&self.suggestion_cache, cache_key, || {
            let found: Vec<Candidate> = self
                .store
                .get_terms_by_syllables_prefix(&key)
                .into_iter()
                .flat_map(|h| {
                    let syllables = h.syllables;
                    h.terms
                        .into_iter()
                        .filter(|t| t.phrase.starts_with(committed) && t.phrase != committed)
                        .map(move |t| {
                            Candidate::new(
                                t.phrase,
                                syllables.as_str(),
                                t.weight as f64,
                                CandidateKind::Suggestion,
                            )
                        })
                        .collect::<Vec<_>>()
                })
                .collect();
            candidate::rank(found)
        })
    }

    /// Best full-sentence composition of `syllables`, or `None` for empty
    /// input. Runs the whole sentence task to completion.
    pub fn get_sentence<T: AsRef<str>>(&self, syllables: &[T]) -> Option<Candidate> {
        let mut task = self.sentence_task(syllables);
        task.run();
        task.finish()
    }

    /// Prepare the sentence DP as a queue of `(end, length)` steps.
    pub fn sentence_task<T: AsRef<str>>(&self, syllables: &[T]) -> SentenceTask<'_, S> {
        SentenceTask::new(DecoderRef::Borrowed(self), syllables)
    }

    /// Like `sentence_task`, but the task keeps the decoder alive itself, so
    /// it can be stored next to the decoder and stepped later.
    pub fn shared_sentence_task<T: AsRef<str>>(
        self: &Rc<Self>,
        syllables: &[T],
    ) -> SentenceTask<'static, S>
    where
        S: 'static,
    {
        SentenceTask::new(DecoderRef::Shared(Rc::clone(self)), syllables)
    }

    /// Highest-ranked term for the syllable run, if any.
    fn best_term(&self, syllables: &[String]) -> Option<Candidate> {
        self.get_terms(syllables).into_iter().next()
    }

    fn cached<F>(&self, cache: &CandidateCache, key: String, compute: F) -> Vec<Candidate>
    where
        F: FnOnce() -> Vec<Candidate>,
    {
        if let Some(hit) = cache.borrow_mut().get(&key) {
            *self.cache_hits.borrow_mut() += 1;
            return hit.clone();
        }
        *self.cache_misses.borrow_mut() += 1;
        let value = compute();
        cache.borrow_mut().put(key, value.clone());
        value
    }

    pub fn cache_stats(&self) -> CacheStats {
        CacheStats {
            hits: *self.cache_hits.borrow(),
            misses: *self.cache_misses.borrow(),
        }
    }

    /// Drop every cached list and reset the counters.
    pub fn clear_cache(&self) {
        self.term_cache.borrow_mut().clear();
        self.abbreviated_cache.borrow_mut().clear();
        self.suggestion_cache.borrow_mut().clear();
        *self.cache_hits.borrow_mut() = 0;
        *self.cache_misses.borrow_mut() = 0;
    }
}

/// One transition of the sentence DP: extend the best sentence ending at
/// `end - len` with the phrase covering syllables `end - len .. end`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SentenceStep {
    end: usize,
    len: usize,
}

enum DecoderRef<'d, S: TermStore> {
    Borrowed(&'d Decoder<S>),
    Shared(Rc<Decoder<S>>),
}

impl<S: TermStore> Deref for DecoderRef<'_, S> {
    type Target = Decoder<S>;

    fn deref(&self) -> &Decoder<S> {
        match self {
            DecoderRef::Borrowed(decoder) => decoder,
            DecoderRef::Shared(decoder) => decoder,
        }
    }
}

struct SentenceState<'d, S: TermStore> {
    decoder: DecoderRef<'d, S>,
    syllables: Vec<String>,
    /// Best sentence covering the first `k` syllables.
    sentences: Vec<Option<String>>,
    probabilities: Vec<f64>,
    max_term_length: usize,
}

impl<'d, S: TermStore> Job<SentenceState<'d, S>> for SentenceStep {
    fn run(self, queue: &mut JobQueue<Self>, state: &mut SentenceState<'d, S>) {
        let SentenceStep { end, len } = self;
        let start = end - len;
        let run = &state.syllables[start..end];

        let (phrase, weight) = match state.decoder.best_term(run) {
            Some(term) => (term.text, term.weight),
            None => (run.concat(), state.decoder.config.fallback_weight),
        };

        if let Some(prefix) = state.sentences[start].clone() {
            let total = state.decoder.total_weight;
            let probability = if total > 0.0 {
                state.probabilities[start] * weight / total
            } else {
                0.0
            };
            if state.sentences[end].is_none() || probability > state.probabilities[end] {
                state.sentences[end] = Some(prefix + &phrase);
                state.probabilities[end] = probability;
            }
        }

        if len < end.min(state.max_term_length) {
            queue.push(SentenceStep { end, len: len + 1 });
        } else if end < state.syllables.len() {
            queue.push(SentenceStep { end: end + 1, len: 1 });
        }
    }
}

/// Sentence DP driven through the cooperative scheduler.
pub struct SentenceTask<'d, S: TermStore> {
    scheduler: Scheduler<'d, SentenceStep, SentenceState<'d, S>>,
}

impl<'d, S: TermStore> SentenceTask<'d, S> {
    fn new<T: AsRef<str>>(decoder: DecoderRef<'d, S>, syllables: &[T]) -> Self {
        let syllables: Vec<String> = syllables.iter().map(|s| s.as_ref().to_string()).collect();
        let n = syllables.len();
        let mut sentences = vec![None; n + 1];
        sentences[0] = Some(String::new());
        let mut probabilities = vec![0.0; n + 1];
        probabilities[0] = 1.0;

        let max_term_length = decoder.config.max_term_length.max(1);
        let state = SentenceState {
            decoder,
            syllables,
            sentences,
            probabilities,
            max_term_length,
        };
        let mut scheduler = Scheduler::new(state).on_complete(|state: &mut SentenceState<'d, S>| {
            let n = state.syllables.len();
            debug!(
                syllables = n,
                probability = state.probabilities[n],
                "sentence composed"
            );
        });
        if n > 0 {
            scheduler.push(SentenceStep { end: 1, len: 1 });
        }
        Self { scheduler }
    }

    /// Run one DP transition.
    pub fn step(&mut self) -> Progress {
        self.scheduler.process_next()
    }

    /// Run every remaining transition; returns how many ran.
    pub fn run(&mut self) -> usize {
        self.scheduler.run()
    }

    pub fn pending(&self) -> usize {
        self.scheduler.pending()
    }

    /// The best sentence, once the task has drained.
    pub fn finish(self) -> Option<Candidate> {
        if self.scheduler.pending() > 0 {
            return None;
        }
        let state = self.scheduler.into_shared();
        let n = state.syllables.len();
        if n == 0 {
            return None;
        }
        let text = state.sentences[n].clone()?;
        Some(Candidate::new(
            text,
            join_syllables(&state.syllables),
            state.probabilities[n],
            CandidateKind::Sentence,
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::homonyms::{Homonyms, Term};
    use crate::store::MemoryStore;

    fn decoder(records: Vec<Homonyms>) -> Decoder<MemoryStore> {
        let mut store = MemoryStore::new();
        store.set_all_terms(records);
        Decoder::new(store, Config::default())
    }

    fn dictionary() -> Vec<Homonyms> {
        vec![
            Homonyms::new("zhong", vec![Term::new("终", 10), Term::new("中", 500)]),
            Homonyms::new("zhong'guo", vec![Term::new("中国", 300)]),
            Homonyms::new("tai'bei", vec![Term::new("台北", 50)]),
            Homonyms::new("tai'bei'shi", vec![Term::new("台北市", 20)]),
            Homonyms::new("tai'bei'ren", vec![Term::new("台北人", 8)]),
        ]
    }

    fn texts(candidates: &[Candidate]) -> Vec<&str> {
        candidates.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn terms_ranked_by_weight() {
        let d = decoder(dictionary());
        let terms = d.get_terms(&["zhong"]);
        assert_eq!(texts(&terms), vec!["中", "终"]);
        assert!(terms.iter().all(|c| c.kind == CandidateKind::Term));
    }

    #[test]
    fn single_incomplete_syllable_falls_back() {
        let d = decoder(dictionary());
        let terms = d.get_terms(&["zh"]);
        assert_eq!(texts(&terms), vec!["中", "终"]);
        assert_eq!(terms[0].syllables, "zh");
        assert!(d.get_terms(&["zh", "g"]).is_empty());
    }

    #[test]
    fn incomplete_matches_are_bounded() {
        let records: Vec<Homonyms> = "一二三四五六七八九十百千万亿兆"
            .chars()
            .enumerate()
            .map(|(i, c)| {
                let syllable = format!("x{}", "a".repeat(i + 1));
                Homonyms::new(syllable, vec![Term::new(c.to_string(), i as u32 + 1)])
            })
            .collect();
        let d = decoder(records);
        let terms = d.get_terms(&["x"]);
        assert_eq!(terms.len(), 10);
        assert_eq!(terms[0].text, "兆");
    }

    #[test]
    fn abbreviated_terms_for_several_syllables() {
        let d = decoder(dictionary());
        let terms = d.get_abbreviated_terms(&["zh", "g"]);
        assert_eq!(texts(&terms), vec!["中国"]);
    }

    #[test]
    fn suggestions_exclude_committed_text() {
        let d = decoder(dictionary());
        let suggestions = d.get_suggestions(&["tai", "bei"], "台北");
        assert_eq!(texts(&suggestions), vec!["台北市", "台北人"]);
        assert!(suggestions.iter().all(|c| c.kind == CandidateKind::Suggestion));
        assert!(d.get_suggestions(&["tai", "bei"], "").is_empty());
    }

    #[test]
    fn sentence_prefers_whole_phrase() {
        let d = decoder(vec![
            Homonyms::new("wo", vec![Term::new("我", 100)]),
            Homonyms::new("men", vec![Term::new("们", 80)]),
            Homonyms::new("wo'men", vec![Term::new("我們", 95)]),
        ]);
        let sentence = d.get_sentence(&["wo", "men"]).unwrap();
        assert_eq!(sentence.text, "我們");
        assert_eq!(sentence.kind, CandidateKind::Sentence);
        assert!((sentence.weight - 95.0 / 275.0).abs() < 1e-12);
    }

    #[test]
    fn sentence_composes_when_phrase_is_rare() {
        let d = decoder(vec![
            Homonyms::new("wo", vec![Term::new("我", 100)]),
            Homonyms::new("men", vec![Term::new("们", 80)]),
            Homonyms::new("wo'men", vec![Term::new("我們", 5)]),
        ]);
        assert_eq!(d.get_sentence(&["wo", "men"]).unwrap().text, "我们");
    }

    #[test]
    fn sentence_task_runs_one_step_per_transition() {
        let d = decoder(dictionary());
        let mut task = d.sentence_task(&["zhong", "guo"]);
        assert_eq!(task.step(), Progress::Ran);
        assert_eq!(task.run(), 2);
        assert_eq!(task.finish().unwrap().text, "中国");
    }

    #[test]
    fn shared_task_outlives_the_borrow() {
        let d = Rc::new(decoder(dictionary()));
        let mut task = d.shared_sentence_task(&["zhong", "guo"]);
        let d2 = Rc::clone(&d);
        drop(d);
        while task.step() == Progress::Ran {}
        assert_eq!(task.finish().unwrap().text, "中国");
        assert!(d2.cache_stats().misses > 0);
    }

    #[test]
    fn sentence_of_unknown_syllables_uses_fallback() {
        let d = decoder(dictionary());
        let sentence = d.get_sentence(&["qq"]).unwrap();
        assert_eq!(sentence.text, "qq");
        assert_eq!(sentence.weight, 0.0);
        assert!(d.get_sentence::<&str>(&[]).is_none());
    }

    #[test]
    fn caches_count_hits() {
        let d = decoder(dictionary());
        d.get_terms(&["zhong"]);
        d.get_terms(&["zhong"]);
        let stats = d.cache_stats();
        assert_eq!(stats, CacheStats { hits: 1, misses: 1 });
        assert_eq!(stats.hit_rate(), 50.0);
        d.clear_cache();
        assert_eq!(d.cache_stats(), CacheStats::default());
    }
}
