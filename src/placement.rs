//! Row placement: records → cell writes, too-wide records → diagnostic log.

use crate::{
    AppendError, XlsxEditor, diagnostics::DiagnosticEntry, ingest::Record, pipeline::RunContext,
    planner::SheetGeometry,
};
use anyhow::Result;

/// A single cell assignment, 1-based coordinates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CellWrite<'a> {
    pub column: usize,
    pub row: usize,
    pub value: &'a str,
}

/// Something cells can be written into, applied immediately and without batching.
pub trait CellWriter {
    fn write_cell(&mut self, cell: &CellWrite<'_>) -> Result<()>;
}

impl CellWriter for XlsxEditor {
    fn write_cell(&mut self, cell: &CellWrite<'_>) -> Result<()> {
        self.set_cell_at(cell.column, cell.row, cell.value)
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Placement {
    pub placed: usize,
    pub cells: usize,
}

/// Writes each record at `geometry.row_for(i)`, or logs it when it is wider than
/// the sheet. A rejected record leaves its row empty; later rows are not shifted up.
pub fn place<W: CellWriter + ?Sized>(
    records: &[Record],
    geometry: &SheetGeometry,
    separator: char,
    sheet: &mut W,
    ctx: &mut RunContext,
) -> Result<Placement> {
    let mut placement = Placement::default();

    for (i, record) in records.iter().enumerate() {
        if !geometry.fits(record.len()) {
            ctx.record(DiagnosticEntry::FieldCountExceedsCapacity {
                raw: record.joined(separator),
            })?;
            continue;
        }

        let row = geometry.row_for(i);
        for (j, value) in record.fields().iter().enumerate() {
            let cell = CellWrite {
                column: j + 1,
                row,
                value,
            };
            sheet.write_cell(&cell).map_err(|e| AppendError::SheetWrite {
                column: cell.column,
                row,
                reason: format!("{e:#}"),
            })?;
        }
        placement.placed += 1;
        placement.cells += record.len();
    }
    Ok(placement)
}
