//! Homophone store: the storage contract and its in-memory backend.
//!
//! Two interchangeable backends satisfy `TermStore`:
//! - `MemoryStore` keeps the flat record array plus two `RangeIndex`es
//!   (full syllable string, abbreviated form).
//! - `RedbStore` (see `redb_store`) persists records in an embedded
//!   key-value database and is bulk-populated from a snapshot in chunks.
//!
//! The contract has no error channel. Every call returns exactly once with
//! its best-effort result; a failed lookup is indistinguishable from a miss.
//!
//! `Backend` is the enum the decoder owns; `Backend::select` probes whether
//! the persistent store can be used and otherwise falls back to memory.

use regex::Regex;
use tracing::{info, warn};

use crate::homonyms::{abbreviate, DictError, DictionarySnapshot, Homonyms, Term, SEPARATOR};
use crate::range_index::RangeIndex;
use crate::redb_store::RedbStore;
use crate::Config;

/// Storage contract shared by all homophone backends.
pub trait TermStore {
    /// Whether the backend can answer queries.
    fn is_ready(&self) -> bool;

    /// Whether the backend holds no records.
    fn is_empty(&self) -> bool;

    /// Every stored record.
    fn get_all_terms(&self) -> Vec<Homonyms>;

    /// Replace the stored records. Returns false if the write failed.
    fn set_all_terms(&mut self, records: Vec<Homonyms>) -> bool;

    /// Terms for an exact syllable string (`"ni'hao"`).
    fn get_terms_by_syllables(&self, syllables: &str) -> Vec<Term>;

    /// Records whose syllable string starts with `prefix`.
    fn get_terms_by_syllables_prefix(&self, prefix: &str) -> Vec<Homonyms>;

    /// Records matching partially typed syllables (`"zh'g"` matches
    /// `"zhong'guo"`): looked up by abbreviation, then filtered by pattern.
    fn get_terms_by_incomplete_syllables(&self, incomplete: &str) -> Vec<Homonyms>;

    /// Sum of all term weights; the normaliser for sentence probabilities.
    fn total_weight(&self) -> u64 {
        self.get_all_terms().iter().map(Homonyms::weight).sum()
    }
}

/// Pattern allowing any suffix inside each syllable slot:
/// `"zh'g"` -> `^zh[^']*'g[^']*$`.
pub fn incomplete_pattern(incomplete: &str) -> Option<Regex> {
    let slots: Vec<String> = incomplete
        .split(SEPARATOR)
        .map(|s| format!("{}[^']*", regex::escape(s)))
        .collect();
    let pattern = format!("^{}$", slots.join("'"));
    match Regex::new(&pattern) {
        Ok(re) => Some(re),
        Err(e) => {
            warn!(%pattern, error = %e, "invalid incomplete-syllable pattern");
            None
        }
    }
}

/// In-memory backend: flat record array plus two range indices.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    records: Vec<Homonyms>,
    by_syllables: RangeIndex,
    by_abbreviation: RangeIndex,
    total_weight: u64,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_snapshot(snapshot: DictionarySnapshot) -> Self {
        let mut store = Self::new();
        store.set_all_terms(snapshot.into_records());
        store
    }

    fn reindex(&mut self) {
        self.by_syllables = RangeIndex::build(&self.records, |h| h.syllables.as_str());
        self.by_abbreviation = RangeIndex::build(&self.records, |h| h.abbreviated.as_str());
        self.total_weight = self.records.iter().map(Homonyms::weight).sum();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }
}

impl TermStore for MemoryStore {
    fn is_ready(&self) -> bool {
        true
    }

    fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    fn get_all_terms(&self) -> Vec<Homonyms> {
        self.records.clone()
    }

    fn set_all_terms(&mut self, records: Vec<Homonyms>) -> bool {
        self.records = records
            .into_iter()
            .map(|h| Homonyms::new(h.syllables, h.terms))
            .collect();
        self.reindex();
        true
    }

    fn get_terms_by_syllables(&self, syllables: &str) -> Vec<Term> {
        self.by_syllables
            .get(syllables)
            .iter()
            .flat_map(|&pos| self.records[pos].terms.iter().cloned())
            .collect()
    }

    fn get_terms_by_syllables_prefix(&self, prefix: &str) -> Vec<Homonyms> {
        if prefix.is_empty() {
            return Vec::new();
        }
        self.by_syllables
            .get_prefix(prefix)
            .into_iter()
            .map(|pos| self.records[pos].clone())
            .collect()
    }

    fn get_terms_by_incomplete_syllables(&self, incomplete: &str) -> Vec<Homonyms> {
        if incomplete.is_empty() {
            return Vec::new();
        }
        let Some(pattern) = incomplete_pattern(incomplete) else {
            return Vec::new();
        };
        self.by_abbreviation
            .get(&abbreviate(incomplete))
            .iter()
            .map(|&pos| &self.records[pos])
            .filter(|h| pattern.is_match(&h.syllables))
            .cloned()
            .collect()
    }

    fn total_weight(&self) -> u64 {
        self.total_weight
    }
}

/// The backend owned by the decoder.
pub enum Backend {
    Memory(MemoryStore),
    Persistent(RedbStore),
}

impl Backend {
    /// Choose a backend.
    ///
    /// The persistent store is used when enabled in `config`, a database
    /// path is configured and the database opens; an empty database is
    /// populated from the snapshot. Every other case falls back to memory.
    /// `load` is only called when the snapshot is actually needed.
    pub fn select<F>(config: &Config, load: F) -> Result<Self, DictError>
    where
        F: FnOnce() -> Result<DictionarySnapshot, DictError>,
    {
        if config.persistent_backend {
            if let Some(path) = &config.database_path {
                match RedbStore::open(path) {
                    Ok(store) if store.is_empty() => {
                        let snapshot = load()?;
                        match store.populate_from(snapshot.records().to_vec(), config.populate_chunk_size) {
                            Ok(chunks) => {
                                info!(chunks, path = %path.display(), "populated persistent store");
                                return Ok(Backend::Persistent(store));
                            }
                            Err(e) => {
                                warn!(error = %e, "population failed, using in-memory store");
                                return Ok(Backend::Memory(MemoryStore::from_snapshot(snapshot)));
                            }
                        }
                    }
                    Ok(store) => {
                        info!(path = %path.display(), "using existing persistent store");
                        return Ok(Backend::Persistent(store));
                    }
                    Err(e) => {
                        warn!(error = %e, path = %path.display(), "persistent store unavailable");
                    }
                }
            }
        }
        Ok(Backend::Memory(MemoryStore::from_snapshot(load()?)))
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Backend::Memory(_) => "memory",
            Backend::Persistent(_) => "persistent",
        }
    }
}

impl TermStore for Backend {
    fn is_ready(&self) -> bool {
        match self {
            Backend::Memory(m) => m.is_ready(),
            Backend::Persistent(r) => r.is_ready(),
        }
    }

    fn is_empty(&self) -> bool {
        match self {
            Backend::Memory(m) => m.is_empty(),
            Backend::Persistent(r) => r.is_empty(),
        }
    }

    fn get_all_terms(&self) -> Vec<Homonyms> {
        match self {
            Backend::Memory(m) => m.get_all_terms(),
            Backend::Persistent(r) => r.get_all_terms(),
        }
    }

    fn set_all_terms(&mut self, records: Vec<Homonyms>) -> bool {
        match self {
            Backend::Memory(m) => m.set_all_terms(records),
            Backend::Persistent(r) => r.set_all_terms(records),
        }
    }

    fn get_terms_by_syllables(&self, syllables: &str) -> Vec<Term> {
        match self {
            Backend::Memory(m) => m.get_terms_by_syllables(syllables),
            Backend::Persistent(r) => r.get_terms_by_syllables(syllables),
        }
    }

    fn get_terms_by_syllables_prefix(&self, prefix: &str) -> Vec<Homonyms> {
        match self {
            Backend::Memory(m) => m.get_terms_by_syllables_prefix(prefix),
            Backend::Persistent(r) => r.get_terms_by_syllables_prefix(prefix),
        }
    }

    fn get_terms_by_incomplete_syllables(&self, incomplete: &str) -> Vec<Homonyms> {
        match self {
            Backend::Memory(m) => m.get_terms_by_incomplete_syllables(incomplete),
            Backend::Persistent(r) => r.get_terms_by_incomplete_syllables(incomplete),
        }
    }

    fn total_weight(&self) -> u64 {
        match self {
            Backend::Memory(m) => m.total_weight(),
            Backend::Persistent(r) => r.total_weight(),
        }
    }
}
