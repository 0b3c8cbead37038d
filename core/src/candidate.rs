//! Candidate types handed to the UI layer.
//!
//! A candidate is a display string plus the syllable key that produced it.
//! The key is what the UI passes back on selection so the engine knows how
//! much of the pending buffer the choice consumed.

use serde::{Deserialize, Serialize};
use std::collections::HashSet;

use crate::homonyms::SEPARATOR;

/// Where a candidate came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CandidateKind {
    /// A dictionary term for (a prefix of) the typed syllables.
    Term,
    /// The best full-sentence composition of all typed syllables.
    Sentence,
    /// A continuation of previously committed text.
    Suggestion,
    /// The typed letters themselves, used when nothing matched.
    Literal,
}

/// A single candidate with its ranking weight.
///
/// Term and suggestion weights are raw dictionary frequencies; sentence
/// weights are the composed probability.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Candidate {
    pub text: String,
    pub syllables: String,
    pub weight: f64,
    pub kind: CandidateKind,
    /// Number of syllables the candidate consumes.
    #[serde(default)]
    pub span: usize,
}

impl Candidate {
    pub fn new<T: Into<String>, S: Into<String>>(
        text: T,
        syllables: S,
        weight: f64,
        kind: CandidateKind,
    ) -> Self {
        let syllables = syllables.into();
        let span = syllables.split(SEPARATOR).filter(|s| !s.is_empty()).count();
        Candidate {
            text: text.into(),
            syllables,
            weight,
            kind,
            span,
        }
    }

    pub fn term<T: Into<String>, S: Into<String>>(text: T, syllables: S, weight: u32) -> Self {
        Self::new(text, syllables, weight as f64, CandidateKind::Term)
    }

    pub fn literal<T: Into<String>, S: Into<String>>(text: T, syllables: S) -> Self {
        Self::new(text, syllables, 0.0, CandidateKind::Literal)
    }
}

/// Sort by descending weight and collapse duplicate display strings to
/// their highest-weight occurrence. Equal weights keep input order.
pub fn rank(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.weight
            .partial_cmp(&a.weight)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    dedup_by_text(candidates)
}

/// Order a mixed candidate panel: longer spans first, heavier first within
/// a span. Weights must already be on one scale.
pub fn rank_by_span(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(|a, b| {
        b.span.cmp(&a.span).then_with(|| {
            b.weight
                .partial_cmp(&a.weight)
                .unwrap_or(std::cmp::Ordering::Equal)
        })
    });
    dedup_by_text(candidates)
}

/// Drop later candidates whose text was already seen, keeping order.
pub fn dedup_by_text(candidates: Vec<Candidate>) -> Vec<Candidate> {
    let mut seen = HashSet::new();
    candidates
        .into_iter()
        .filter(|c| seen.insert(c.text.clone()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rank_sorts_and_dedups() {
        let ranked = rank(vec![
            Candidate::term("终", "zhong", 10),
            Candidate::term("中", "zhong", 500),
            Candidate::term("终", "zhong", 40),
        ]);
        let texts: Vec<&str> = ranked.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["中", "终"]);
        assert_eq!(ranked[1].weight, 40.0);
    }

    #[test]
    fn span_counts_syllables() {
        assert_eq!(Candidate::term("台北", "tai'bei", 1).span, 2);
        assert_eq!(Candidate::term("中", "zh", 1).span, 1);
        assert_eq!(Candidate::literal("x", "'").span, 0);
    }

    #[test]
    fn rank_by_span_puts_longer_runs_first() {
        let ranked = rank_by_span(vec![
            Candidate::new("台", "tai", 0.07, CandidateKind::Term),
            Candidate::new("台北", "tai'bei", 0.03, CandidateKind::Term),
            Candidate::new("台北你", "tai'bei'ni", 0.002, CandidateKind::Sentence),
            Candidate::new("太", "tai", 0.09, CandidateKind::Term),
            Candidate::new("台北", "tai'bei", 0.03, CandidateKind::Term),
        ]);
        let texts: Vec<&str> = ranked.iter().map(|c| c.text.as_str()).collect();
        assert_eq!(texts, vec!["台北你", "台北", "太", "台"]);
    }

    #[test]
    fn dedup_keeps_first_occurrence() {
        let list = dedup_by_text(vec![
            Candidate::new("我们", "wo'men", 0.3, CandidateKind::Sentence),
            Candidate::term("我们", "wo'men", 95),
            Candidate::term("我", "wo", 100),
        ]);
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].kind, CandidateKind::Sentence);
    }
}
