use crate::MAX_COLUMNS;

/// Where appended rows go and how wide they may be. Computed once, before any write.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SheetGeometry {
    /// Width of the first existing row, or [`MAX_COLUMNS`] for an empty sheet.
    pub column_capacity: usize,
    /// 1-based row right after the existing rows.
    pub next_row: usize,
}

impl SheetGeometry {
    /// The first row is the schema: its width caps every appended record,
    /// even when later rows are wider.
    pub fn plan<R: AsRef<[String]>>(rows: &[R]) -> Self {
        let column_capacity = rows.first().map_or(MAX_COLUMNS, |first| first.as_ref().len());
        Self {
            column_capacity,
            next_row: rows.len() + 1,
        }
    }

    pub fn fits(&self, field_count: usize) -> bool {
        field_count <= self.column_capacity
    }

    /// Target row of the `index`-th accepted record. Rejected records keep their slot.
    pub fn row_for(&self, index: usize) -> usize {
        self.next_row + index
    }
}
