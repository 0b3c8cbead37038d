//! Read-only multi-key index over an in-memory record array.
//!
//! The index is built once from a slice of records and a string-valued key
//! accessor. Record positions are grouped by distinct key and the distinct
//! keys are kept sorted, so exact lookups are a hash probe and ordered
//! range lookups reduce to two binary searches.
//!
//! The index never owns the records; callers keep the record array and use
//! the returned positions to address it.
//!
//! # Example
//! ```
//! use hanzi_decoder_core::range_index::{prefix_upper_bound, RangeIndex};
//!
//! let syllables = ["a", "ai", "an", "ang", "ba"];
//! let index = RangeIndex::build(&syllables, |s| *s);
//!
//! let upper = prefix_upper_bound("a").unwrap();
//! let hits = index.get_range(Some("a"), Some(&upper), false, true);
//! assert_eq!(hits, vec![0, 1, 2, 3]);
//! ```

use ahash::AHashMap;

/// Outcome of the binary search over the sorted distinct keys.
///
/// `Between(i)` is the "insert here" answer: the probed key is absent and
/// sorts strictly between `keys[i - 1]` and `keys[i]`. Range queries round
/// it toward the side that keeps the bound inclusive or exclusive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SearchResult {
    Found(usize),
    Between(usize),
}

/// Sorted multi-key index. See the module docs.
#[derive(Debug, Clone, Default)]
pub struct RangeIndex {
    /// Distinct keys in ascending byte order.
    keys: Vec<String>,
    /// `buckets[i]` holds every record position whose key is `keys[i]`.
    buckets: Vec<Vec<usize>>,
    /// Key -> slot in `keys` / `buckets`.
    slots: AHashMap<String, usize>,
}

impl RangeIndex {
    /// Build an index over `records`, keyed by `key_fn`.
    pub fn build<T, F>(records: &[T], key_fn: F) -> Self
    where
        F: Fn(&T) -> &str,
    {
        let mut grouped: AHashMap<String, Vec<usize>> = AHashMap::new();
        for (pos, record) in records.iter().enumerate() {
            grouped
                .entry(key_fn(record).to_string())
                .or_default()
                .push(pos);
        }

        let mut pairs: Vec<(String, Vec<usize>)> = grouped.into_iter().collect();
        pairs.sort_by(|a, b| a.0.cmp(&b.0));

        let mut keys = Vec::with_capacity(pairs.len());
        let mut buckets = Vec::with_capacity(pairs.len());
        let mut slots = AHashMap::with_capacity(pairs.len());
        for (slot, (key, positions)) in pairs.into_iter().enumerate() {
            slots.insert(key.clone(), slot);
            keys.push(key);
            buckets.push(positions);
        }

        Self {
            keys,
            buckets,
            slots,
        }
    }

    /// All record positions whose key equals `key` (in insertion order).
    pub fn get(&self, key: &str) -> &[usize] {
        match self.slots.get(key) {
            Some(&slot) => &self.buckets[slot],
            None => &[],
        }
    }

    /// All record positions whose key lies within the given bounds.
    ///
    /// `None` leaves that side unbounded. The `*_open` flags exclude the
    /// boundary value itself. Positions are returned in key order.
    pub fn get_range(
        &self,
        lower: Option<&str>,
        upper: Option<&str>,
        lower_open: bool,
        upper_open: bool,
    ) -> Vec<usize> {
        let start = match lower.map(|k| self.search(k)) {
            None => 0,
            Some(SearchResult::Found(i)) if lower_open => i + 1,
            Some(SearchResult::Found(i)) => i,
            Some(SearchResult::Between(i)) => i,
        };
        let end = match upper.map(|k| self.search(k)) {
            None => self.keys.len(),
            Some(SearchResult::Found(i)) if upper_open => i,
            Some(SearchResult::Found(i)) => i + 1,
            Some(SearchResult::Between(i)) => i,
        };

        if start >= end {
            return Vec::new();
        }
        self.buckets[start..end]
            .iter()
            .flat_map(|b| b.iter().copied())
            .collect()
    }

    /// Positions of every key starting with `prefix`.
    ///
    /// Uses `[prefix, prefix_upper_bound(prefix))`; an empty prefix matches
    /// everything.
    pub fn get_prefix(&self, prefix: &str) -> Vec<usize> {
        match prefix_upper_bound(prefix) {
            Some(upper) => self.get_range(Some(prefix), Some(&upper), false, true),
            None => self.get_range(None, None, false, false),
        }
    }

    /// True if any key starts with `prefix`.
    pub fn has_prefix(&self, prefix: &str) -> bool {
        let start = match self.search(prefix) {
            SearchResult::Found(_) => return true,
            SearchResult::Between(i) => i,
        };
        self.keys
            .get(start)
            .is_some_and(|k| k.starts_with(prefix))
    }

    /// Binary search over the distinct keys.
    pub fn search(&self, key: &str) -> SearchResult {
        match self.keys.binary_search_by(|k| k.as_str().cmp(key)) {
            Ok(i) => SearchResult::Found(i),
            Err(i) => SearchResult::Between(i),
        }
    }

    /// Sorted distinct keys.
    pub fn keys(&self) -> &[String] {
        &self.keys
    }

    /// Number of distinct keys.
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Exclusive upper bound for a prefix query: the prefix with its last
/// character code incremented ("a" -> "b", "zh" -> "zi").
///
/// Returns `None` for an empty prefix or when no larger character exists.
pub fn prefix_upper_bound(prefix: &str) -> Option<String> {
    let mut chars: Vec<char> = prefix.chars().collect();
    let last = chars.pop()?;
    let mut code = last as u32 + 1;
    let next = loop {
        if code > char::MAX as u32 {
            return None;
        }
        if let Some(c) = char::from_u32(code) {
            break c;
        }
        // skip the surrogate gap
        code += 1;
    };
    chars.push(next);
    Some(chars.into_iter().collect())
}
