//! Dictionary data model: terms, homonym records and the validated snapshot.
//!
//! A `Homonyms` record groups every `Term` sharing one pronunciation. The
//! full syllable string (`"zhong'guo"`) is the unique key; the abbreviated
//! form (`"z'g"`) is derived from it and shared by many records.
//!
//! Snapshots are loaded from JSON or bincode. Loading validates every row
//! and rejects the whole dictionary on the first malformed one: a half
//! loaded dictionary is worse than none.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;
use tracing::{debug, info};

/// Separator between syllables in a syllable string.
pub const SEPARATOR: char = '\'';

/// A dictionary phrase with its frequency weight.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Term {
    pub phrase: String,
    pub weight: u32,
}

impl Term {
    pub fn new<T: Into<String>>(phrase: T, weight: u32) -> Self {
        Self {
            phrase: phrase.into(),
            weight,
        }
    }
}

/// All terms sharing one syllable sequence.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Homonyms {
    /// Full syllable string, e.g. `"zhong'guo"`.
    pub syllables: String,
    /// Leading letter of each syllable, e.g. `"z'g"`. Derived, never stored.
    #[serde(skip)]
    pub abbreviated: String,
    /// Terms in descending weight order.
    pub terms: Vec<Term>,
}

impl Homonyms {
    pub fn new<S: Into<String>>(syllables: S, mut terms: Vec<Term>) -> Self {
        let syllables = syllables.into();
        terms.sort_by(|a, b| b.weight.cmp(&a.weight));
        Self {
            abbreviated: abbreviate(&syllables),
            syllables,
            terms,
        }
    }

    /// Number of syllables in the key.
    pub fn syllable_count(&self) -> usize {
        self.syllables.split(SEPARATOR).count()
    }

    /// Highest-weight term.
    pub fn best_term(&self) -> Option<&Term> {
        self.terms.first()
    }

    /// Sum of all term weights.
    pub fn weight(&self) -> u64 {
        self.terms.iter().map(|t| t.weight as u64).sum()
    }
}

/// Reduce each syllable to its leading letter: `"zhong'guo"` -> `"z'g"`.
pub fn abbreviate(syllables: &str) -> String {
    syllables
        .split(SEPARATOR)
        .filter_map(|s| s.chars().next())
        .map(String::from)
        .collect::<Vec<_>>()
        .join("'")
}

/// Join syllables into the canonical key: `["ni", "hao"]` -> `"ni'hao"`.
pub fn join_syllables<S: AsRef<str>>(syllables: &[S]) -> String {
    syllables
        .iter()
        .map(|s| s.as_ref())
        .collect::<Vec<&str>>()
        .join("'")
}

/// Load-time rejection reasons. Any of these aborts the whole load.
#[derive(Debug, thiserror::Error)]
pub enum DictError {
    #[error("failed to read dictionary: {0}")]
    Io(#[from] std::io::Error),
    #[error("malformed json dictionary: {0}")]
    Json(#[from] serde_json::Error),
    #[error("malformed bincode dictionary: {0}")]
    Bincode(#[from] bincode::Error),
    #[error("row {row}: empty syllable string")]
    EmptySyllables { row: usize },
    #[error("row {row}: invalid syllable string {syllables:?}")]
    InvalidSyllables { row: usize, syllables: String },
    #[error("row {row} ({syllables}): no terms")]
    NoTerms { row: usize, syllables: String },
    #[error("row {row} ({syllables}): phrase {phrase:?} has {chars} characters for {count} syllables")]
    CardinalityMismatch {
        row: usize,
        syllables: String,
        phrase: String,
        chars: usize,
        count: usize,
    },
}

/// A validated, de-duplicated set of homonym records.
#[derive(Debug, Clone, Default)]
pub struct DictionarySnapshot {
    records: Vec<Homonyms>,
    total_weight: u64,
}

impl DictionarySnapshot {
    /// Validate raw rows and build a snapshot.
    ///
    /// Rows with more syllables than `max_term_length` are skipped. Rows
    /// sharing a syllable string are merged; a phrase appearing twice under
    /// one key has its weights summed.
    pub fn from_records(rows: Vec<Homonyms>, max_term_length: usize) -> Result<Self, DictError> {
        let mut merged: BTreeMap<String, Vec<Term>> = BTreeMap::new();
        let mut skipped = 0usize;

        for (row, record) in rows.into_iter().enumerate() {
            let syllables = record.syllables.trim().to_ascii_lowercase();
            let count = validate_syllables(row, &syllables)?;
            if record.terms.is_empty() {
                return Err(DictError::NoTerms { row, syllables });
            }
            if count > max_term_length {
                skipped += 1;
                continue;
            }

            let bucket = merged.entry(syllables.clone()).or_default();
            for term in record.terms {
                let phrase = crate::utils::normalize(&term.phrase);
                let chars = phrase.chars().count();
                if chars != count {
                    return Err(DictError::CardinalityMismatch {
                        row,
                        syllables,
                        phrase,
                        chars,
                        count,
                    });
                }
                match bucket.iter_mut().find(|t| t.phrase == phrase) {
                    Some(existing) => existing.weight = existing.weight.saturating_add(term.weight),
                    None => bucket.push(Term::new(phrase, term.weight)),
                }
            }
        }

        if skipped > 0 {
            debug!(skipped, max_term_length, "skipped over-long dictionary rows");
        }

        let records: Vec<Homonyms> = merged
            .into_iter()
            .map(|(syllables, terms)| Homonyms::new(syllables, terms))
            .collect();
        let total_weight = records.iter().map(Homonyms::weight).sum();
        info!(records = records.len(), total_weight, "dictionary snapshot ready");

        Ok(Self {
            records,
            total_weight,
        })
    }

    /// Parse a JSON array of `{ "syllables": ..., "terms": [...] }` rows.
    pub fn from_json_str(content: &str, max_term_length: usize) -> Result<Self, DictError> {
        let rows: Vec<Homonyms> = serde_json::from_str(content)?;
        Self::from_records(rows, max_term_length)
    }

    /// Load a JSON snapshot file.
    pub fn load_json<P: AsRef<Path>>(path: P, max_term_length: usize) -> Result<Self, DictError> {
        let reader = BufReader::new(File::open(path)?);
        let rows: Vec<Homonyms> = serde_json::from_reader(reader)?;
        Self::from_records(rows, max_term_length)
    }

    /// Load a bincode snapshot written by `save_bincode`.
    pub fn load_bincode<P: AsRef<Path>>(
        path: P,
        max_term_length: usize,
    ) -> Result<Self, DictError> {
        let reader = BufReader::new(File::open(path)?);
        let rows: Vec<Homonyms> = bincode::deserialize_from(reader)?;
        Self::from_records(rows, max_term_length)
    }

    /// Pick the loader from the file extension (`.json`, anything else is bincode).
    pub fn load<P: AsRef<Path>>(path: P, max_term_length: usize) -> Result<Self, DictError> {
        let path = path.as_ref();
        match path.extension().and_then(|e| e.to_str()) {
            Some("json") => Self::load_json(path, max_term_length),
            _ => Self::load_bincode(path, max_term_length),
        }
    }

    pub fn save_bincode<P: AsRef<Path>>(&self, path: P) -> Result<(), DictError> {
        let writer = BufWriter::new(File::create(path)?);
        bincode::serialize_into(writer, &self.records)?;
        Ok(())
    }

    pub fn save_json<P: AsRef<Path>>(&self, path: P) -> Result<(), DictError> {
        let writer = BufWriter::new(File::create(path)?);
        serde_json::to_writer_pretty(writer, &self.records)?;
        Ok(())
    }

    pub fn records(&self) -> &[Homonyms] {
        &self.records
    }

    pub fn into_records(self) -> Vec<Homonyms> {
        self.records
    }

    pub fn total_weight(&self) -> u64 {
        self.total_weight
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

/// Check a syllable string and return its syllable count.
fn validate_syllables(row: usize, syllables: &str) -> Result<usize, DictError> {
    if syllables.is_empty() {
        return Err(DictError::EmptySyllables { row });
    }
    let mut count = 0;
    for piece in syllables.split(SEPARATOR) {
        if piece.is_empty() || !piece.bytes().all(|b| b.is_ascii_lowercase()) {
            return Err(DictError::InvalidSyllables {
                row,
                syllables: syllables.to_string(),
            });
        }
        count += 1;
    }
    Ok(count)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(syllables: &str, terms: &[(&str, u32)]) -> Homonyms {
        Homonyms::new(
            syllables,
            terms.iter().map(|(p, w)| Term::new(*p, *w)).collect(),
        )
    }

    #[test]
    fn abbreviation_uses_leading_letters() {
        assert_eq!(abbreviate("zhong'guo"), "z'g");
        assert_eq!(abbreviate("a"), "a");
        assert_eq!(join_syllables(&["ni", "hao"]), "ni'hao");
    }

    #[test]
    fn terms_sorted_by_weight() {
        let h = row("zhong", &[("终", 10), ("中", 500)]);
        assert_eq!(h.best_term().unwrap().phrase, "中");
        assert_eq!(h.abbreviated, "z");
        assert_eq!(h.weight(), 510);
    }

    #[test]
    fn snapshot_merges_duplicate_keys() {
        let snap = DictionarySnapshot::from_records(
            vec![
                row("ni'hao", &[("你好", 10)]),
                row("ni'hao", &[("你好", 5), ("拟好", 1)]),
                row("zhong", &[("中", 3)]),
            ],
            8,
        )
        .unwrap();
        assert_eq!(snap.len(), 2);
        let nihao = &snap.records()[0];
        assert_eq!(nihao.syllables, "ni'hao");
        assert_eq!(nihao.terms[0], Term::new("你好", 15));
        assert_eq!(snap.total_weight(), 19);
    }

    #[test]
    fn snapshot_rejects_empty_terms() {
        let err = DictionarySnapshot::from_records(vec![row("ni", &[])], 8).unwrap_err();
        assert!(matches!(err, DictError::NoTerms { row: 0, .. }));
    }

    #[test]
    fn snapshot_rejects_cardinality_mismatch() {
        let err = DictionarySnapshot::from_records(
            vec![row("zhong", &[("中", 1)]), row("ni'hao", &[("你", 1)])],
            8,
        )
        .unwrap_err();
        assert!(matches!(
            err,
            DictError::CardinalityMismatch {
                row: 1,
                chars: 1,
                count: 2,
                ..
            }
        ));
    }

    #[test]
    fn snapshot_rejects_bad_syllables() {
        for bad in ["ni''hao", "ni1", "'ni"] {
            let err = DictionarySnapshot::from_records(vec![row(bad, &[("你", 1)])], 8)
                .unwrap_err();
            assert!(matches!(err, DictError::InvalidSyllables { .. }), "{bad}");
        }
        let err =
            DictionarySnapshot::from_records(vec![row("  ", &[("你", 1)])], 8).unwrap_err();
        assert!(matches!(err, DictError::EmptySyllables { row: 0 }));
    }

    #[test]
    fn over_long_rows_are_skipped() {
        let snap = DictionarySnapshot::from_records(
            vec![row("a'b'c", &[("啊吧才", 1)]), row("a", &[("啊", 1)])],
            2,
        )
        .unwrap();
        assert_eq!(snap.len(), 1);
        assert_eq!(snap.records()[0].syllables, "a");
    }

    #[test]
    fn json_snapshot_derives_abbreviation() {
        let json = r#"[{"syllables":"tai'bei","terms":[{"phrase":"台北","weight":7}]}]"#;
        let snap = DictionarySnapshot::from_json_str(json, 8).unwrap();
        assert_eq!(snap.records()[0].abbreviated, "t'b");
    }

    #[test]
    fn bincode_roundtrip_through_file() {
        let tmp = std::env::temp_dir().join(format!(
            "hanzi_decoder_snapshot_{}.bin",
            std::process::id()
        ));
        let snap =
            DictionarySnapshot::from_records(vec![row("wo", &[("我", 100)])], 8).unwrap();
        snap.save_bincode(&tmp).unwrap();
        let loaded = DictionarySnapshot::load(&tmp, 8).unwrap();
        assert_eq!(loaded.records(), snap.records());
        let _ = std::fs::remove_file(tmp);
    }
}
