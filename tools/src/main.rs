mod convert_table;

use anyhow::{Context, Result};
use clap::Parser;
use hanzi_decoder_core::{DictionarySnapshot, RedbStore};
use std::path::PathBuf;

/// Build a dictionary snapshot from `syllables<TAB>phrase<TAB>weight` tables.
#[derive(Parser)]
#[command(name = "build_dict")]
struct Args {
    /// Table files to merge
    #[arg(long, num_args = 1.., required = true)]
    inputs: Vec<PathBuf>,

    /// Output snapshot; `.json` writes JSON, anything else bincode
    #[arg(long, default_value = "pinyin.bincode")]
    out: PathBuf,

    /// Rows with more syllables than this are dropped
    #[arg(long, default_value_t = 8)]
    max_term_length: usize,

    /// Also populate a persistent store at this path
    #[arg(long)]
    redb: Option<PathBuf>,

    /// Records per write transaction when populating `--redb`
    #[arg(long, default_value_t = hanzi_decoder_core::redb_store::DEFAULT_CHUNK_SIZE)]
    chunk_size: usize,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("info".parse()?),
        )
        .init();

    let args = Args::parse();

    let rows = convert_table::read_tables(&args.inputs)?;
    let snapshot = DictionarySnapshot::from_records(rows, args.max_term_length)
        .context("validating tables")?;

    let is_json = args.out.extension().and_then(|s| s.to_str()) == Some("json");
    if is_json {
        snapshot.save_json(&args.out)?;
    } else {
        snapshot.save_bincode(&args.out)?;
    }
    println!(
        "Wrote {} records (total weight {}) to {}",
        snapshot.len(),
        snapshot.total_weight(),
        args.out.display()
    );

    if let Some(path) = &args.redb {
        let store = RedbStore::open(path)
            .with_context(|| format!("opening {}", path.display()))?;
        store.clear()?;
        let written = store.populate_from(snapshot.into_records(), args.chunk_size)?;
        println!("Populated {} with {} records", path.display(), written);
    }
    Ok(())
}
