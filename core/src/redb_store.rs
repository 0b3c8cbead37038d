//! Persistent homophone store backed by `redb`.
//!
//! Layout:
//! - `homonyms`: syllable string -> bincode-encoded `Vec<Term>`
//! - `abbreviations`: abbreviated form -> syllable strings (multimap)
//! - `meta`: record count and total weight
//!
//! Bulk population is split into chunk-sized write transactions driven by
//! the cooperative `Scheduler`, so a large snapshot never needs one giant
//! transaction.

use std::ops::Bound;
use std::path::{Path, PathBuf};

use redb::{Database, MultimapTableDefinition, ReadableTable, TableDefinition};
use tracing::{debug, info, warn};

use crate::homonyms::{abbreviate, Homonyms, Term};
use crate::range_index::prefix_upper_bound;
use crate::scheduler::{Job, JobQueue, Scheduler};
use crate::store::{incomplete_pattern, TermStore};

const RECORDS: TableDefinition<&str, &[u8]> = TableDefinition::new("homonyms");
const ABBREVIATIONS: MultimapTableDefinition<&str, &str> =
    MultimapTableDefinition::new("abbreviations");
const META: TableDefinition<&str, u64> = TableDefinition::new("meta");

const META_RECORDS: &str = "records";
const META_TOTAL_WEIGHT: &str = "total_weight";

/// Records written per transaction when none is configured.
pub const DEFAULT_CHUNK_SIZE: usize = 2048;

/// Failures of the persistent store.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("database: {0}")]
    Database(#[from] redb::DatabaseError),
    #[error("transaction: {0}")]
    Transaction(#[from] redb::TransactionError),
    #[error("table: {0}")]
    Table(#[from] redb::TableError),
    #[error("storage: {0}")]
    Storage(#[from] redb::StorageError),
    #[error("commit: {0}")]
    Commit(#[from] redb::CommitError),
    #[error("encoding: {0}")]
    Encoding(#[from] bincode::Error),
}

/// redb-backed `TermStore`.
pub struct RedbStore {
    db: Database,
    path: PathBuf,
    chunk_size: usize,
}

impl RedbStore {
    /// Create or open the database at `path` and make sure every table exists.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, StoreError> {
        if let Some(parent) = path.as_ref().parent() {
            let _ = std::fs::create_dir_all(parent);
        }
        let db = Database::create(path.as_ref())?;
        let txn = db.begin_write()?;
        {
            txn.open_table(RECORDS)?;
            txn.open_multimap_table(ABBREVIATIONS)?;
            txn.open_table(META)?;
        }
        txn.commit()?;
        debug!(path = %path.as_ref().display(), "opened redb store");
        Ok(Self {
            db,
            path: path.as_ref().to_path_buf(),
            chunk_size: DEFAULT_CHUNK_SIZE,
        })
    }

    pub fn with_chunk_size(mut self, chunk_size: usize) -> Self {
        self.chunk_size = chunk_size.max(1);
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of stored records.
    pub fn len(&self) -> usize {
        self.meta(META_RECORDS) as usize
    }

    /// Write `records` in chunks of `chunk_size`, one transaction each.
    /// Returns the number of chunks written.
    pub fn populate_from(
        &self,
        records: Vec<Homonyms>,
        chunk_size: usize,
    ) -> Result<usize, StoreError> {
        let total = records.len();
        let state = PopulateState {
            store: self,
            chunk_size: chunk_size.max(1),
            chunks: 0,
            written: 0,
            error: None,
        };
        let mut scheduler: Scheduler<PopulateChunk, PopulateState> = Scheduler::new(state)
            .on_complete(|state: &mut PopulateState| {
                if state.error.is_none() {
                    info!(
                        chunks = state.chunks,
                        records = state.written,
                        "persistent store population complete"
                    );
                }
            });
        if total > 0 {
            scheduler.push(PopulateChunk { records, offset: 0 });
        }
        scheduler.run();

        let state = scheduler.into_shared();
        match state.error {
            Some(e) => Err(e),
            None => Ok(state.chunks),
        }
    }

    /// Drop every table and recreate them empty.
    pub fn clear(&self) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        txn.delete_table(RECORDS)?;
        txn.delete_multimap_table(ABBREVIATIONS)?;
        txn.delete_table(META)?;
        {
            txn.open_table(RECORDS)?;
            txn.open_multimap_table(ABBREVIATIONS)?;
            txn.open_table(META)?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Insert one chunk of records in a single write transaction.
    fn write_chunk(&self, chunk: &[Homonyms]) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        {
            let mut records = txn.open_table(RECORDS)?;
            let mut abbreviations = txn.open_multimap_table(ABBREVIATIONS)?;
            let mut meta = txn.open_table(META)?;

            let mut added_records = 0u64;
            let mut weight_delta: i128 = 0;
            for record in chunk {
                let encoded = bincode::serialize(&record.terms)?;
                let previous = records
                    .insert(record.syllables.as_str(), encoded.as_slice())?
                    .map(|old| decode_terms(old.value()));
                match previous {
                    Some(old) => {
                        weight_delta -= old.iter().map(|t| t.weight as i128).sum::<i128>();
                    }
                    None => added_records += 1,
                }
                weight_delta += record.weight() as i128;
                abbreviations.insert(
                    abbreviate(&record.syllables).as_str(),
                    record.syllables.as_str(),
                )?;
            }

            let count = meta.get(META_RECORDS)?.map(|v| v.value()).unwrap_or(0);
            let weight = meta.get(META_TOTAL_WEIGHT)?.map(|v| v.value()).unwrap_or(0);
            let weight = (weight as i128 + weight_delta).max(0) as u64;
            meta.insert(META_RECORDS, count + added_records)?;
            meta.insert(META_TOTAL_WEIGHT, weight)?;
        }
        txn.commit()?;
        Ok(())
    }

    fn meta(&self, key: &str) -> u64 {
        match self.try_meta(key) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, key, "failed to read store metadata");
                0
            }
        }
    }

    fn try_meta(&self, key: &str) -> Result<u64, StoreError> {
        let txn = self.db.begin_read()?;
        let meta = txn.open_table(META)?;
        Ok(meta.get(key)?.map(|v| v.value()).unwrap_or(0))
    }

    fn try_get(&self, syllables: &str) -> Result<Option<Homonyms>, StoreError> {
        let txn = self.db.begin_read()?;
        let records = txn.open_table(RECORDS)?;
        Ok(records
            .get(syllables)?
            .map(|v| Homonyms::new(syllables, decode_terms(v.value()))))
    }

    fn try_all(&self) -> Result<Vec<Homonyms>, StoreError> {
        let txn = self.db.begin_read()?;
        let records = txn.open_table(RECORDS)?;
        let mut out = Vec::new();
        for item in records.iter()? {
            let (key, value) = item?;
            out.push(Homonyms::new(key.value(), decode_terms(value.value())));
        }
        Ok(out)
    }

    fn try_prefix(&self, prefix: &str) -> Result<Vec<Homonyms>, StoreError> {
        let txn = self.db.begin_read()?;
        let records = txn.open_table(RECORDS)?;
        let upper = prefix_upper_bound(prefix);
        let range: (Bound<&str>, Bound<&str>) = match upper.as_deref() {
            Some(upper) => (Bound::Included(prefix), Bound::Excluded(upper)),
            None => (Bound::Included(prefix), Bound::Unbounded),
        };
        let mut out = Vec::new();
        for item in records.range::<&str>(range)? {
            let (key, value) = item?;
            out.push(Homonyms::new(key.value(), decode_terms(value.value())));
        }
        Ok(out)
    }

    fn try_incomplete(&self, incomplete: &str) -> Result<Vec<Homonyms>, StoreError> {
        let Some(pattern) = incomplete_pattern(incomplete) else {
            return Ok(Vec::new());
        };
        let txn = self.db.begin_read()?;
        let abbreviations = txn.open_multimap_table(ABBREVIATIONS)?;
        let records = txn.open_table(RECORDS)?;

        let abbreviated = abbreviate(incomplete);
        let mut out = Vec::new();
        for key in abbreviations.get(abbreviated.as_str())? {
            let key = key?;
            let syllables = key.value();
            if !pattern.is_match(syllables) {
                continue;
            }
            if let Some(value) = records.get(syllables)? {
                out.push(Homonyms::new(syllables, decode_terms(value.value())));
            }
        }
        Ok(out)
    }
}

fn decode_terms(bytes: &[u8]) -> Vec<Term> {
    match bincode::deserialize(bytes) {
        Ok(terms) => terms,
        Err(e) => {
            warn!(error = %e, "corrupt term list in redb store");
            Vec::new()
        }
    }
}

/// Log a failed query and degrade to an empty result.
fn or_empty<T: Default>(result: Result<T, StoreError>, query: &str) -> T {
    result.unwrap_or_else(|e| {
        warn!(error = %e, query, "redb store query failed");
        T::default()
    })
}

/// Shared data of a population run.
struct PopulateState<'s> {
    store: &'s RedbStore,
    chunk_size: usize,
    chunks: usize,
    written: usize,
    error: Option<StoreError>,
}

/// Writes one chunk, then re-schedules itself for the rest.
struct PopulateChunk {
    records: Vec<Homonyms>,
    offset: usize,
}

impl<'s> Job<PopulateState<'s>> for PopulateChunk {
    fn run(self, queue: &mut JobQueue<Self>, state: &mut PopulateState<'s>) {
        let end = (self.offset + state.chunk_size).min(self.records.len());
        if let Err(e) = state.store.write_chunk(&self.records[self.offset..end]) {
            warn!(error = %e, offset = self.offset, "failed to write chunk");
            state.error = Some(e);
            return;
        }
        state.chunks += 1;
        state.written = end;
        debug!(chunk = state.chunks, written = end, "wrote chunk");
        if end < self.records.len() {
            queue.push(PopulateChunk {
                records: self.records,
                offset: end,
            });
        }
    }
}

impl TermStore for RedbStore {
    fn is_ready(&self) -> bool {
        self.try_meta(META_RECORDS).is_ok()
    }

    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn get_all_terms(&self) -> Vec<Homonyms> {
        or_empty(self.try_all(), "all")
    }

    fn set_all_terms(&mut self, records: Vec<Homonyms>) -> bool {
        let chunk_size = self.chunk_size;
        let result = self
            .clear()
            .and_then(|_| self.populate_from(records, chunk_size));
        match result {
            Ok(_) => true,
            Err(e) => {
                warn!(error = %e, "failed to replace store contents");
                false
            }
        }
    }

    fn get_terms_by_syllables(&self, syllables: &str) -> Vec<Term> {
        or_empty(self.try_get(syllables), syllables)
            .map(|h| h.terms)
            .unwrap_or_default()
    }

    fn get_terms_by_syllables_prefix(&self, prefix: &str) -> Vec<Homonyms> {
        if prefix.is_empty() {
            return Vec::new();
        }
        or_empty(self.try_prefix(prefix), prefix)
    }

    fn get_terms_by_incomplete_syllables(&self, incomplete: &str) -> Vec<Homonyms> {
        if incomplete.is_empty() {
            return Vec::new();
        }
        or_empty(self.try_incomplete(incomplete), incomplete)
    }

    fn total_weight(&self) -> u64 {
        self.meta(META_TOTAL_WEIGHT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_db(name: &str) -> PathBuf {
        let path = std::env::temp_dir().join(format!(
            "hanzi_decoder_{}_{}.redb",
            name,
            std::process::id()
        ));
        let _ = std::fs::remove_file(&path);
        path
    }

    fn records() -> Vec<Homonyms> {
        vec![
            Homonyms::new("tai'bei", vec![Term::new("台北", 50)]),
            Homonyms::new("tai'bei'shi", vec![Term::new("台北市", 20)]),
            Homonyms::new("zhong", vec![Term::new("中", 500), Term::new("终", 10)]),
            Homonyms::new("zhong'guo", vec![Term::new("中国", 300)]),
            Homonyms::new("zai'gao", vec![Term::new("再高", 3)]),
        ]
    }

    #[test]
    fn populate_in_chunks_and_query() {
        let path = temp_db("populate");
        let store = RedbStore::open(&path).unwrap();
        assert!(store.is_empty());

        let chunks = store.populate_from(records(), 2).unwrap();
        assert_eq!(chunks, 3);
        assert_eq!(store.len(), 5);
        assert_eq!(store.total_weight(), 883);

        let zhong = store.get_terms_by_syllables("zhong");
        assert_eq!(zhong[0].phrase, "中");

        let prefixed: Vec<String> = store
            .get_terms_by_syllables_prefix("tai'bei")
            .into_iter()
            .map(|h| h.syllables)
            .collect();
        assert_eq!(prefixed, vec!["tai'bei", "tai'bei'shi"]);

        let incomplete: Vec<String> = store
            .get_terms_by_incomplete_syllables("zh'g")
            .into_iter()
            .map(|h| h.syllables)
            .collect();
        assert_eq!(incomplete, vec!["zhong'guo"]);

        drop(store);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn reopen_keeps_contents() {
        let path = temp_db("reopen");
        {
            let store = RedbStore::open(&path).unwrap();
            store.populate_from(records(), 16).unwrap();
        }
        let store = RedbStore::open(&path).unwrap();
        assert!(!store.is_empty());
        assert_eq!(store.get_all_terms().len(), 5);
        drop(store);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn set_all_terms_replaces_contents() {
        let path = temp_db("replace");
        let mut store = RedbStore::open(&path).unwrap().with_chunk_size(1);
        store.populate_from(records(), 4).unwrap();
        assert!(store.set_all_terms(vec![Homonyms::new("wo", vec![Term::new("我", 100)])]));
        assert_eq!(store.len(), 1);
        assert_eq!(store.total_weight(), 100);
        assert!(store.get_terms_by_syllables("zhong").is_empty());
        drop(store);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn rewriting_a_key_adjusts_metadata() {
        let path = temp_db("rewrite");
        let store = RedbStore::open(&path).unwrap();
        store
            .populate_from(vec![Homonyms::new("wo", vec![Term::new("我", 100)])], 8)
            .unwrap();
        store
            .populate_from(vec![Homonyms::new("wo", vec![Term::new("我", 40)])], 8)
            .unwrap();
        assert_eq!(store.len(), 1);
        assert_eq!(store.total_weight(), 40);
        drop(store);
        let _ = std::fs::remove_file(path);
    }

    #[test]
    fn empty_population_writes_nothing() {
        let path = temp_db("empty");
        let store = RedbStore::open(&path).unwrap();
        assert_eq!(store.populate_from(Vec::new(), 8).unwrap(), 0);
        assert!(store.is_empty());
        assert!(store.get_terms_by_incomplete_syllables("").is_empty());
        drop(store);
        let _ = std::fs::remove_file(path);
    }
}
