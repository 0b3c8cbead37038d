//! pinyin-ime crate root
//!
//! This crate provides the pinyin-specific half of the decoder: the syllable
//! inventory, the segmenter and the keystroke-driven input state machine
//! that drives a `hanzi_decoder_core::Decoder`.
//!
//! Public API exported here:
//! - `Parser`, `Syllable` and `Segmentation` from `parser`
//! - `PinyinIme`, `ImeGlue` and `KeySender` from `ime`
//! - `PinyinConfig` from `config`

pub mod config;
pub mod ime;
pub mod parser;
pub mod syllables;

// Re-export the core types callers need alongside the IME.
pub use hanzi_decoder_core::{
    Backend, Candidate, CandidateKind, Decoder, DictError, DictionarySnapshot, Homonyms,
    MemoryStore, Progress, RedbStore, Term, TermStore,
};

pub use config::{LayoutSwitch, PinyinConfig};
pub use ime::{is_syllable_code, key, ImeGlue, ImeState, KeySender, PinyinIme};
pub use parser::{Parser, Segmentation, Syllable, SyllableKind};
pub use syllables::PINYIN_SYLLABLES;
