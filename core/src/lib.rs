//! hanzi-decoder-core
//!
//! Language-agnostic half of the Pinyin-to-Hanzi decoder, shared by the
//! `pinyin-ime` crate and the dictionary tools.
//!
//! Public API:
//! - `RangeIndex` - sorted multi-key index with exact and range lookups
//! - `Scheduler` / `Job` - cooperative job queue for long-running work
//! - `Homonyms` / `Term` / `DictionarySnapshot` - dictionary data model
//! - `TermStore` - storage contract, with `MemoryStore` and `RedbStore`
//! - `Decoder` - terms, suggestions and best-sentence composition
//! - `Config` - configuration shared by every crate
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

pub mod range_index;
pub use range_index::{prefix_upper_bound, RangeIndex, SearchResult};

pub mod scheduler;
pub use scheduler::{Job, JobQueue, Progress, Scheduler};

pub mod homonyms;
pub use homonyms::{
    abbreviate, join_syllables, DictError, DictionarySnapshot, Homonyms, Term, SEPARATOR,
};

pub mod candidate;
pub use candidate::{Candidate, CandidateKind};

pub mod store;
pub use store::{Backend, MemoryStore, TermStore};

pub mod redb_store;
pub use redb_store::{RedbStore, StoreError};

pub mod decoder;
pub use decoder::{CacheStats, Decoder, SentenceTask};

/// Engine configuration.
///
/// Language crates flatten this into their own config so one TOML file
/// configures the whole stack.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Config {
    /// Pending buffer cap; typing past it forces a commit.
    pub max_buffer_length: usize,
    /// Longest phrase, in syllables, the dictionary and the sentence
    /// composer consider.
    pub max_term_length: usize,

    // Storage backend
    /// Prefer the persistent store when it can be opened.
    pub persistent_backend: bool,
    /// Location of the persistent store.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub database_path: Option<PathBuf>,
    /// Records per write transaction when populating the persistent store.
    pub populate_chunk_size: usize,

    // Decoding
    /// Upper bound on candidates produced by incomplete-syllable matching.
    pub fuzzy_candidate_limit: usize,
    /// Entries per decoder cache.
    pub cache_capacity: usize,
    /// Weight given to a syllable run with no dictionary term when
    /// composing sentences.
    pub fallback_weight: f64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            max_buffer_length: 30,
            max_term_length: 8,
            persistent_backend: false,
            database_path: None,
            populate_chunk_size: redb_store::DEFAULT_CHUNK_SIZE,
            fuzzy_candidate_limit: 10,
            cache_capacity: 4096,
            // zero keeps unmatched runs from ever beating a real phrase
            fallback_weight: 0.0,
        }
    }
}

impl Config {
    /// Load configuration from a TOML file.
    pub fn load_toml<P: AsRef<std::path::Path>>(
        path: P,
    ) -> Result<Self, Box<dyn std::error::Error>> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Save configuration to a TOML file.
    pub fn save_toml<P: AsRef<std::path::Path>>(
        &self,
        path: P,
    ) -> Result<(), Box<dyn std::error::Error>> {
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Load configuration from TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self, toml::de::Error> {
        toml::from_str(content)
    }

    /// Serialize configuration to TOML string.
    pub fn to_toml_string(&self) -> Result<String, toml::ser::Error> {
        toml::to_string_pretty(self)
    }
}

/// Utility helpers.
pub mod utils {
    /// Normalize input strings (NFC) and trim whitespace.
    pub fn normalize(s: &str) -> String {
        use unicode_normalization::UnicodeNormalization;
        s.nfc().collect::<String>().trim().to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults() {
        let cfg = Config::default();
        assert_eq!(cfg.max_buffer_length, 30);
        assert_eq!(cfg.max_term_length, 8);
        assert_eq!(cfg.fuzzy_candidate_limit, 10);
        assert_eq!(cfg.fallback_weight, 0.0);
        assert!(!cfg.persistent_backend);
    }

    #[test]
    fn config_toml_partial_override() {
        let cfg = Config::from_toml_str("max_buffer_length = 12\npersistent_backend = true\n")
            .unwrap();
        assert_eq!(cfg.max_buffer_length, 12);
        assert!(cfg.persistent_backend);
        assert_eq!(cfg.cache_capacity, 4096);
    }

    #[test]
    fn config_toml_file_roundtrip() {
        let path = std::env::temp_dir().join(format!(
            "hanzi_decoder_config_{}.toml",
            std::process::id()
        ));
        let cfg = Config {
            database_path: Some(PathBuf::from("/tmp/dict.redb")),
            fallback_weight: 0.5,
            ..Config::default()
        };
        cfg.save_toml(&path).unwrap();
        assert_eq!(Config::load_toml(&path).unwrap(), cfg);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn normalize_composes_and_trims() {
        assert_eq!(utils::normalize(" e\u{301} "), "\u{e9}");
    }
}
