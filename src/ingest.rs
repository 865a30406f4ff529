//! Record ingestion: delimited text → sanitized records.
//!
//! Lines that do not decode to text are logged and skipped; lines before the
//! start offset are skipped silently. Nothing here is fatal except an I/O
//! failure on the source itself.

use crate::{AppendError, diagnostics::DiagnosticEntry, pipeline::RunContext};
use anyhow::Result;
use csv::{ByteRecord, ReaderBuilder};
use memchr::memmem;
use std::io::Read;

/// ASCII unit separator, stands in for a non-ASCII separator inside the byte-oriented reader.
const UNIT_SEPARATOR: u8 = 0x1f;

/// One parsed line. Quotation marks are stripped from every field at construction
/// and the field count never changes afterwards.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    fields: Vec<String>,
}

impl Record {
    pub fn from_fields<I, S>(fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        Self {
            fields: fields.into_iter().map(|f| sanitize(f.as_ref())).collect(),
        }
    }

    pub fn fields(&self) -> &[String] {
        &self.fields
    }

    pub fn len(&self) -> usize {
        self.fields.len()
    }

    pub fn is_empty(&self) -> bool {
        self.fields.is_empty()
    }

    /// Fields rejoined with `separator`, as written to the diagnostic log.
    pub fn joined(&self, separator: char) -> String {
        join_fields(self.fields.iter().map(String::as_str), separator)
    }
}

/// Removes every `"` from a field.
pub fn sanitize(field: &str) -> String {
    field.replace('"', "")
}

/// Reads `source` record by record and keeps the ones at or after `start_line` (1-based;
/// 0 and 1 both mean the first line). The offset counts successfully parsed lines only.
pub fn ingest<R: Read>(mut source: R, separator: char, start_line: usize, ctx: &mut RunContext) -> Result<Vec<Record>> {
    let skip = start_line.saturating_sub(1);
    if separator.is_ascii() {
        return read_records(source, separator as u8, None, separator, skip, ctx);
    }

    // The csv reader splits on a single byte: map the separator to 0x1f and back.
    let mut raw = Vec::new();
    source
        .read_to_end(&mut raw)
        .map_err(|e| AppendError::SourceRead(e.to_string()))?;
    let mapped = substitute_separator(&raw, separator);
    read_records(mapped.as_slice(), UNIT_SEPARATOR, Some(separator), separator, skip, ctx)
}

fn read_records<R: Read>(
    source: R,
    delimiter: u8,
    restore: Option<char>,
    separator: char,
    skip: usize,
    ctx: &mut RunContext,
) -> Result<Vec<Record>> {
    let mut reader = ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(source);

    let mut raw = ByteRecord::new();
    let mut records = Vec::new();
    let mut parsed = 0usize;

    loop {
        match reader.read_byte_record(&mut raw) {
            Ok(false) => break,
            Ok(true) => {}
            Err(err) if err.is_io_error() => return Err(AppendError::SourceRead(err.to_string()).into()),
            Err(err) => {
                log::debug!("unparseable record: {err}");
                ctx.record(DiagnosticEntry::UnparseableLine {
                    raw: lossy_joined(&raw, restore, separator),
                })?;
                continue;
            }
        }

        let decoded: Result<Vec<&str>, _> = raw.iter().map(std::str::from_utf8).collect();
        let Ok(fields) = decoded else {
            ctx.record(DiagnosticEntry::UnparseableLine {
                raw: lossy_joined(&raw, restore, separator),
            })?;
            continue;
        };

        if parsed >= skip {
            let record = match restore {
                Some(sep) => Record::from_fields(fields.iter().map(|f| restore_separator(f, sep))),
                None => Record::from_fields(fields),
            };
            records.push(record);
        }
        parsed += 1;
    }

    log::debug!("parsed {parsed} lines, kept {}", records.len());
    Ok(records)
}

fn lossy_joined(raw: &ByteRecord, restore: Option<char>, separator: char) -> String {
    let fields: Vec<String> = raw
        .iter()
        .map(|f| {
            let text = String::from_utf8_lossy(f);
            match restore {
                Some(sep) => restore_separator(&text, sep),
                None => text.into_owned(),
            }
        })
        .collect();
    join_fields(fields.iter().map(String::as_str), separator)
}

fn join_fields<'a>(fields: impl Iterator<Item = &'a str>, separator: char) -> String {
    let mut out = String::new();
    for (i, field) in fields.enumerate() {
        if i > 0 {
            out.push(separator);
        }
        out.push_str(field);
    }
    out
}

fn substitute_separator(raw: &[u8], separator: char) -> Vec<u8> {
    let mut buf = [0u8; 4];
    let needle = separator.encode_utf8(&mut buf).as_bytes();
    let mut out = Vec::with_capacity(raw.len());
    let mut last = 0;
    for pos in memmem::find_iter(raw, needle) {
        out.extend_from_slice(&raw[last..pos]);
        out.push(UNIT_SEPARATOR);
        last = pos + needle.len();
    }
    out.extend_from_slice(&raw[last..]);
    out
}

fn restore_separator(field: &str, separator: char) -> String {
    field.replace(char::from(UNIT_SEPARATOR), separator.encode_utf8(&mut [0u8; 4]))
}
