//! Fatal errors of an append run. Per-line problems never show up here,
//! they go to the diagnostic log instead (see [`crate::diagnostics`]).

use std::{io, path::PathBuf};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum AppendError {
    #[error("Invalid delimiter: {0}")]
    InvalidDelimiter(String),

    #[error("Flags -i (input file), -t (Excel template), -s (Sheet name), and -o (Output file) must be specified")]
    MissingFlags,

    #[error("Failed to open input file {}", path.display())]
    SourceOpen { path: PathBuf, source: io::Error },

    #[error("Failed to read input file: {0}")]
    SourceRead(String),

    #[error("Failed to open Excel template {}: {reason}", path.display())]
    DocumentOpen { path: PathBuf, reason: String },

    #[error("Sheet '{0}' does not exist in the template file!")]
    SheetNotFound(String),

    #[error("Failed to get rows from sheet '{sheet}': {reason}")]
    SheetRead { sheet: String, reason: String },

    #[error("Failed to write row {row}, column {column}: {reason}")]
    SheetWrite { column: usize, row: usize, reason: String },

    #[error("Failed to create error log file {}", path.display())]
    LogCreate { path: PathBuf, source: io::Error },

    #[error("Failed to write error log file {}", path.display())]
    LogWrite { path: PathBuf, source: io::Error },

    #[error("Failed to save updated Excel file {}: {reason}", path.display())]
    Save { path: PathBuf, reason: String },
}
