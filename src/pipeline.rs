//! One append run: validate → parse → plan → place → save.

use crate::{
    AppendError, XlsxEditor,
    diagnostics::{DiagnosticEntry, DiagnosticLog, log_path_for},
    ingest::ingest,
    placement::place,
    planner::SheetGeometry,
};
use anyhow::{Context, Result};
use std::{
    fmt,
    fs::File,
    io::BufReader,
    path::{Path, PathBuf},
};

/// Settings of one run, fixed once the flags are validated.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppendSession {
    pub source: PathBuf,
    pub template: PathBuf,
    pub sheet: String,
    pub separator: char,
    /// 1-based line to start from; 0 behaves like 1.
    pub start_line: usize,
    pub output: PathBuf,
}

impl AppendSession {
    pub fn log_path(&self) -> PathBuf {
        log_path_for(&self.output)
    }
}

/// Counters and the diagnostic log of a run, threaded through every stage.
pub struct RunContext {
    log: DiagnosticLog,
    unparseable: usize,
    rejected: usize,
}

impl RunContext {
    pub fn new(log_path: PathBuf) -> Self {
        Self {
            log: DiagnosticLog::new(log_path),
            unparseable: 0,
            rejected: 0,
        }
    }

    /// Counts the failure and writes it to the log.
    pub fn record(&mut self, entry: DiagnosticEntry) -> Result<(), AppendError> {
        match entry {
            DiagnosticEntry::UnparseableLine { .. } => self.unparseable += 1,
            DiagnosticEntry::FieldCountExceedsCapacity { .. } => self.rejected += 1,
        }
        self.log.record(&entry)
    }

    pub fn unparseable(&self) -> usize {
        self.unparseable
    }

    pub fn rejected(&self) -> usize {
        self.rejected
    }

    pub fn log_path(&self) -> &Path {
        self.log.path()
    }

    /// Closes the log and produces the summary.
    pub fn finish(self, session: &AppendSession, accepted: usize) -> Result<RunSummary, AppendError> {
        let log_path = self.log.close()?;
        Ok(RunSummary {
            output: session.output.clone(),
            sheet: session.sheet.clone(),
            accepted,
            unparseable: self.unparseable,
            rejected: self.rejected,
            log_path,
        })
    }
}

/// Result of a finished run. `Display` renders the user-facing tally.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunSummary {
    pub output: PathBuf,
    pub sheet: String,
    pub accepted: usize,
    pub unparseable: usize,
    pub rejected: usize,
    /// Present only when something was logged.
    pub log_path: Option<PathBuf>,
}

impl RunSummary {
    pub fn failures(&self) -> usize {
        self.unparseable + self.rejected
    }

    pub fn placed(&self) -> usize {
        self.accepted - self.rejected
    }
}

impl fmt::Display for RunSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Data successfully written to file {}, sheet {}",
            self.output.display(),
            self.sheet
        )?;
        if let Some(log_path) = self.log_path.as_ref().filter(|_| self.failures() > 0) {
            writeln!(
                f,
                "{} lines encountered errors. See the log at {}",
                self.failures(),
                log_path.display()
            )?;
        }
        Ok(())
    }
}

/// Runs the whole append. Any error returned is fatal; recoverable
/// problems end up in the diagnostic log and the summary counts.
pub fn run(session: &AppendSession) -> Result<RunSummary> {
    let source = File::open(&session.source).map_err(|source| AppendError::SourceOpen {
        path: session.source.clone(),
        source,
    })?;

    // Template and sheet are checked before parsing, so a bad target leaves no log behind.
    let mut editor = XlsxEditor::open(&session.template).map_err(|e| AppendError::DocumentOpen {
        path: session.template.clone(),
        reason: format!("{e:#}"),
    })?;
    let index = editor.sheet_index(&session.sheet)?;
    editor.with_worksheet(&session.sheet).map_err(|e| AppendError::SheetRead {
        sheet: session.sheet.clone(),
        reason: format!("{e:#}"),
    })?;
    editor
        .set_active_sheet(index)
        .with_context(|| format!("Failed to set sheet '{}' active", session.sheet))?;
    log::info!("appending to sheet '{}' ({})", session.sheet, editor.sheet_path());

    let mut ctx = RunContext::new(session.log_path());
    let records = ingest(
        BufReader::new(source),
        session.separator,
        session.start_line,
        &mut ctx,
    )?;
    log::info!(
        "{} records accepted, {} lines unparseable",
        records.len(),
        ctx.unparseable()
    );

    let rows = editor.rows().map_err(|e| AppendError::SheetRead {
        sheet: session.sheet.clone(),
        reason: format!("{e:#}"),
    })?;
    let geometry = SheetGeometry::plan(&rows);
    log::info!(
        "sheet has {} rows, column capacity {}, appending from row {}",
        rows.len(),
        geometry.column_capacity,
        geometry.next_row
    );

    let placement = place(&records, &geometry, session.separator, &mut editor, &mut ctx)?;
    log::info!(
        "{} rows placed ({} cells), {} rejected",
        placement.placed,
        placement.cells,
        ctx.rejected()
    );

    editor.save(&session.output).map_err(|e| AppendError::Save {
        path: session.output.clone(),
        reason: format!("{e:#}"),
    })?;

    Ok(ctx.finish(session, records.len())?)
}
