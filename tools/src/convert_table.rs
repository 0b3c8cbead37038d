use anyhow::{bail, Context, Result};
use hanzi_decoder_core::{Homonyms, Term};
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

/// Weight given to rows that carry no weight column.
pub const DEFAULT_WEIGHT: u32 = 1;

/// Parse one table line: `syllables<TAB>phrase[<TAB>weight]`.
///
/// Whitespace separates fields when the line has no tab. Blank lines and
/// `#` comments yield `None`.
pub fn parse_line(line: &str) -> Result<Option<Homonyms>> {
    let line = line.trim();
    if line.is_empty() || line.starts_with('#') {
        return Ok(None);
    }
    let parts: Vec<&str> = if line.contains('\t') {
        line.split('\t').map(str::trim).collect()
    } else {
        line.split_whitespace().collect()
    };
    if parts.len() < 2 || parts.len() > 3 {
        bail!("expected 2 or 3 fields, found {}", parts.len());
    }
    let weight = match parts.get(2) {
        Some(raw) => raw
            .parse::<u32>()
            .with_context(|| format!("bad weight {:?}", raw))?,
        None => DEFAULT_WEIGHT,
    };
    Ok(Some(Homonyms::new(parts[0], vec![Term::new(parts[1], weight)])))
}

/// Read every row of a table file.
pub fn read_table(input: &Path) -> Result<Vec<Homonyms>> {
    let file = File::open(input).with_context(|| format!("opening {}", input.display()))?;
    let reader = BufReader::new(file);

    let mut rows = Vec::new();
    for (index, line) in reader.lines().enumerate() {
        let line = line?;
        let parsed = parse_line(&line)
            .with_context(|| format!("{}:{}", input.display(), index + 1))?;
        rows.extend(parsed);
    }
    tracing::info!(path = %input.display(), rows = rows.len(), "read table");
    Ok(rows)
}

/// Read and concatenate several tables; merging happens at snapshot time.
pub fn read_tables<P: AsRef<Path>>(inputs: &[P]) -> Result<Vec<Homonyms>> {
    let mut rows = Vec::new();
    for input in inputs {
        rows.extend(read_table(input.as_ref())?);
    }
    Ok(rows)
}
