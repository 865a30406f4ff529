//! Diagnostic log: one line per skipped input line or rejected row.
//!
//! The log file is created lazily on the first entry, so a clean run leaves
//! nothing on disk. It sits next to the output: `report.xlsx` → `report-errors.log`.

use crate::AppendError;
use std::{
    fmt,
    fs::File,
    io::{BufWriter, Write},
    path::{Path, PathBuf},
};

/// One failure, with the raw line rebuilt from its fields.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiagnosticEntry {
    /// The field reader could not turn the line into text fields.
    UnparseableLine { raw: String },
    /// The record has more fields than the target sheet has columns.
    FieldCountExceedsCapacity { raw: String },
}

impl DiagnosticEntry {
    pub fn label(&self) -> &'static str {
        match self {
            DiagnosticEntry::UnparseableLine { .. } => "Error reading line",
            DiagnosticEntry::FieldCountExceedsCapacity { .. } => "Not appended (too many fields)",
        }
    }

    pub fn raw(&self) -> &str {
        match self {
            DiagnosticEntry::UnparseableLine { raw } | DiagnosticEntry::FieldCountExceedsCapacity { raw } => raw,
        }
    }
}

impl fmt::Display for DiagnosticEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.label(), self.raw())
    }
}

/// `<output without extension>-errors.log`. The extension starts at the last dot
/// of the file name, a leading dot included: `.xlsx` → `-errors.log`.
pub fn log_path_for(output: &Path) -> PathBuf {
    let name = output
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let stem = name.rfind('.').map_or(name.as_str(), |dot| &name[..dot]);
    output.with_file_name(format!("{stem}-errors.log"))
}

/// Append-only log sink. Dropping it flushes and closes the file.
pub struct DiagnosticLog {
    path: PathBuf,
    writer: Option<BufWriter<File>>,
    entries: usize,
}

impl DiagnosticLog {
    pub fn new(path: PathBuf) -> Self {
        Self {
            path,
            writer: None,
            entries: 0,
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Writes one line, creating the file on the first call.
    pub fn record(&mut self, entry: &DiagnosticEntry) -> Result<(), AppendError> {
        if self.writer.is_none() {
            let file = File::create(&self.path).map_err(|source| AppendError::LogCreate {
                path: self.path.clone(),
                source,
            })?;
            log::info!("writing diagnostics to {}", self.path.display());
            self.writer = Some(BufWriter::new(file));
        }
        if let Some(writer) = self.writer.as_mut() {
            writeln!(writer, "{entry}").map_err(|source| AppendError::LogWrite {
                path: self.path.clone(),
                source,
            })?;
        }
        self.entries += 1;
        Ok(())
    }

    /// Flushes and closes the log. Returns its path if anything was written.
    pub fn close(mut self) -> Result<Option<PathBuf>, AppendError> {
        match self.writer.take() {
            Some(mut writer) => {
                writer.flush().map_err(|source| AppendError::LogWrite {
                    path: self.path.clone(),
                    source,
                })?;
                Ok(Some(self.path))
            }
            None => Ok(None),
        }
    }
}
