use anyhow::{Context, Result};
use csv::{QuoteStyle, ReaderBuilder, WriterBuilder};

use crate::record::{ContactRecord, HEADERS};

/// Encode records as CSV: header row first, every value quoted.
pub fn encode(records: &[ContactRecord]) -> Result<Vec<u8>> {
    let mut wtr = WriterBuilder::new()
        .has_headers(false)
        .quote_style(QuoteStyle::Always)
        .from_writer(Vec::new());

    // Written by hand so an empty batch still gets a header.
    wtr.write_record(HEADERS)?;
    for record in records {
        wtr.serialize(record)?;
    }
    wtr.into_inner()
        .map_err(|e| anyhow::anyhow!("Failed to flush CSV buffer: {}", e))
}

/// Decode a dataset file. Missing columns decode as empty strings.
pub fn decode(bytes: &[u8]) -> Result<Vec<ContactRecord>> {
    let mut rdr = ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let records = rdr
        .deserialize::<ContactRecord>()
        .enumerate()
        .map(|(i, row)| row.with_context(|| format!("Malformed CSV row {}", i + 2)))
        .collect::<Result<Vec<_>>>()?;
    Ok(records)
}
