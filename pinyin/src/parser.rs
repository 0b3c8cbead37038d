// pinyin/src/parser.rs
//
// Pinyin syllable segmenter.
// - Backward DP over input positions, longest token first
// - Each position keeps its best MAX_ALTERNATIVES remainder segmentations
// - Unparseable input becomes one trailing Invalid syllable
//
// Ranking: abbreviated tokens cost 2, incomplete tokens 1, invalid tokens
// 3 per character, complete syllables 0. Ties go to fewer syllables.

use hanzi_decoder_core::SEPARATOR;

use crate::syllables;

/// How a token matched the syllable inventory.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SyllableKind {
    /// A full syllable (`"zhong"`).
    Complete,
    /// A bare initial (`"zh"`).
    Abbreviated,
    /// A prefix of some syllable that is neither of the above (`"zho"`).
    Incomplete,
    /// Input that could not be parsed.
    Invalid,
}

/// A single segmented token.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Syllable {
    pub text: String,
    pub kind: SyllableKind,
}

impl Syllable {
    pub fn new<T: Into<String>>(text: T, kind: SyllableKind) -> Self {
        Self {
            text: text.into(),
            kind,
        }
    }

    pub fn cost(&self) -> usize {
        match self.kind {
            SyllableKind::Complete => 0,
            SyllableKind::Incomplete => 1,
            SyllableKind::Abbreviated => 2,
            SyllableKind::Invalid => 3 * self.text.chars().count(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.kind == SyllableKind::Complete
    }
}

/// One way of splitting the input, with its total cost.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Segmentation {
    pub syllables: Vec<Syllable>,
    pub cost: usize,
}

impl Segmentation {
    fn prepend(&self, head: Syllable) -> Self {
        let cost = head.cost() + self.cost;
        let mut syllables = Vec::with_capacity(self.syllables.len() + 1);
        syllables.push(head);
        syllables.extend(self.syllables.iter().cloned());
        Self { syllables, cost }
    }

    /// Syllable texts in order.
    pub fn texts(&self) -> Vec<String> {
        self.syllables.iter().map(|s| s.text.clone()).collect()
    }

    /// Texts joined with the separator: `"zhong'guo"`.
    pub fn joined(&self) -> String {
        hanzi_decoder_core::join_syllables(&self.texts())
    }

    pub fn len(&self) -> usize {
        self.syllables.len()
    }

    pub fn is_empty(&self) -> bool {
        self.syllables.is_empty()
    }

    /// True when every syllable is a complete one.
    pub fn is_complete(&self) -> bool {
        self.syllables.iter().all(Syllable::is_complete)
    }
}

/// Pinyin segmenter over the standard syllable inventory.
#[derive(Debug, Clone)]
pub struct Parser {
    max_alternatives: usize,
}

impl Default for Parser {
    fn default() -> Self {
        Self::new()
    }
}

impl Parser {
    /// Alternatives kept per input position.
    pub const MAX_ALTERNATIVES: usize = 32;

    pub fn new() -> Self {
        Self {
            max_alternatives: Self::MAX_ALTERNATIVES,
        }
    }

    /// Keep at most `max` alternatives per position (minimum 1).
    pub fn with_max_alternatives(max: usize) -> Self {
        Self {
            max_alternatives: max.max(1),
        }
    }

    /// Classify a separator-free token. Complete beats abbreviated beats
    /// incomplete.
    pub fn classify(token: &str) -> Option<SyllableKind> {
        if token.is_empty() {
            None
        } else if syllables::is_complete(token) {
            Some(SyllableKind::Complete)
        } else if syllables::is_initial(token) {
            Some(SyllableKind::Abbreviated)
        } else if syllables::is_syllable_prefix(token) {
            Some(SyllableKind::Incomplete)
        } else {
            None
        }
    }

    /// All ranked segmentations of `input`, best first.
    ///
    /// Leading and trailing separators are ignored; an internal separator
    /// always ends the current syllable. Empty input yields nothing.
    pub fn parse(&self, input: &str) -> Vec<Segmentation> {
        let trimmed = input.trim_matches(SEPARATOR);
        if trimmed.is_empty() {
            return Vec::new();
        }
        let chars: Vec<char> = trimmed.chars().collect();
        let n = chars.len();

        // table[pos] = ranked segmentations of chars[pos..]
        let mut table: Vec<Vec<Segmentation>> = vec![Vec::new(); n + 1];
        table[n].push(Segmentation::default());

        for pos in (0..n).rev() {
            if chars[pos] == SEPARATOR {
                table[pos] = table[pos + 1].clone();
                continue;
            }
            let limit = chars[pos..]
                .iter()
                .position(|&c| c == SEPARATOR)
                .map_or(n, |offset| pos + offset);

            let mut alternatives = Vec::new();
            for end in (pos + 1..=limit).rev() {
                let token: String = chars[pos..end].iter().collect();
                let Some(kind) = Self::classify(&token) else {
                    continue;
                };
                for rest in &table[end] {
                    alternatives.push(rest.prepend(Syllable::new(token.clone(), kind)));
                }
            }

            if alternatives.is_empty() {
                let rest: String = chars[pos..].iter().filter(|&&c| c != SEPARATOR).collect();
                alternatives.push(Segmentation::default().prepend(Syllable::new(rest, SyllableKind::Invalid)));
            }

            alternatives.sort_by_key(|s| (s.cost, s.syllables.len()));
            alternatives.truncate(self.max_alternatives);
            table[pos] = alternatives;
        }

        std::mem::take(&mut table[0])
    }

    /// The preferred segmentation, if the input is non-empty.
    pub fn best(&self, input: &str) -> Option<Segmentation> {
        self.parse(input).into_iter().next()
    }
}
