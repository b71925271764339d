//! Zip and CSV parsing for schedule feed archives.

use std::io::{Cursor, Read};
use tracing::debug;
use zip::ZipArchive;

use crate::error::PipelineError;
use crate::table::{Table, TableName};

/// The member name up to its first `.`, e.g. `stop_times` for `stop_times.txt`.
fn member_stem(name: &str) -> &str {
    name.split('.').next().unwrap_or(name)
}

/// Lists the file members of an archive.
pub fn member_names(archive: &[u8]) -> Result<Vec<String>, PipelineError> {
    let zip = ZipArchive::new(Cursor::new(archive))?;
    Ok(zip
        .file_names()
        .filter(|n| !n.ends_with('/'))
        .map(str::to_string)
        .collect())
}

/// Returns the raw bytes of the member whose name without extension is
/// exactly `table`.
///
/// # Errors
///
/// [`PipelineError::TableNotFound`] when no member matches, or an archive
/// error if the bytes are not a readable zip.
pub fn read_member(archive: &[u8], table: TableName) -> Result<Vec<u8>, PipelineError> {
    let mut zip = ZipArchive::new(Cursor::new(archive))?;
    for i in 0..zip.len() {
        let mut file = zip.by_index(i)?;
        if file.is_dir() || member_stem(file.name()) != table.as_str() {
            continue;
        }
        let mut data = Vec::with_capacity(file.size() as usize);
        file.read_to_end(&mut data)?;
        debug!(member = file.name(), bytes = data.len(), "Read archive member");
        return Ok(data);
    }
    Err(PipelineError::TableNotFound { table })
}

/// Parses delimited text with a header row into a [`Table`].
pub fn parse_table(name: &str, data: &[u8]) -> Result<Table, PipelineError> {
    let mut rdr = csv::ReaderBuilder::new().flexible(true).from_reader(data);

    let columns: Vec<String> = rdr
        .headers()?
        .iter()
        .map(|h| h.trim_start_matches('\u{feff}').trim().to_string())
        .collect();

    let mut raw = Vec::new();
    for result in rdr.records() {
        let record = result?;
        raw.push(record.iter().map(str::to_string).collect());
    }

    Ok(Table::from_text(name, columns, raw))
}

/// Extracts and parses one table from an archive.
pub fn extract_table(archive: &[u8], table: TableName) -> Result<Table, PipelineError> {
    let data = read_member(archive, table)?;
    parse_table(table.as_str(), &data)
}
