use crate::{MAX_ROWS, XlsxEditor, attr_value, split_coord};
use anyhow::{Context, Result, bail};
use quick_xml::{Reader, events::Event};

/// Cell being read: its column, `t` attribute and collected text.
struct CellState {
    col: usize,
    kind: Option<String>,
    text: String,
}

impl XlsxEditor {
    /// Row matrix of the selected sheet, values as strings.
    ///
    /// Missing cells inside a row read as `""`; trailing empty cells and trailing
    /// empty rows are dropped, so `rows().len()` is the last row holding a value.
    pub fn rows(&self) -> Result<Vec<Vec<String>>> {
        if self.sheet_path.is_empty() {
            bail!("no worksheet selected");
        }
        let mut reader = Reader::from_reader(self.sheet_xml.as_slice());

        let mut rows: Vec<Vec<String>> = Vec::new();
        let mut row: Vec<String> = Vec::new();
        let mut row_num = 0usize;
        let mut next_col = 0usize;
        let mut cell: Option<CellState> = None;
        let mut in_value = false;
        let mut phonetic_depth = 0usize;

        loop {
            let ev = reader
                .read_event()
                .with_context(|| format!("{} is malformed", self.sheet_path))?;
            match ev {
                Event::Start(ref e) if e.name().as_ref() == b"row" => {
                    row_num = row_number(attr_value(e, b"r"), row_num)?;
                    row.clear();
                    next_col = 0;
                }
                Event::Empty(ref e) if e.name().as_ref() == b"row" => {
                    row_num = row_number(attr_value(e, b"r"), row_num)?;
                }
                Event::End(ref e) if e.name().as_ref() == b"row" => {
                    store_row(&mut rows, row_num, std::mem::take(&mut row));
                }
                Event::Start(ref e) if e.name().as_ref() == b"c" => {
                    let col = cell_column(attr_value(e, b"r"), next_col)?;
                    next_col = col + 1;
                    cell = Some(CellState {
                        col,
                        kind: attr_value(e, b"t"),
                        text: String::new(),
                    });
                }
                Event::Empty(ref e) if e.name().as_ref() == b"c" => {
                    next_col = cell_column(attr_value(e, b"r"), next_col)? + 1;
                }
                Event::End(ref e) if e.name().as_ref() == b"c" => {
                    if let Some(c) = cell.take() {
                        let col = c.col;
                        let value = self.cell_value(c)?;
                        if row.len() <= col {
                            row.resize(col + 1, String::new());
                        }
                        row[col] = value;
                    }
                    in_value = false;
                }
                Event::Start(ref e) if matches!(e.name().as_ref(), b"v" | b"t") => {
                    in_value = cell.is_some();
                }
                Event::End(ref e) if matches!(e.name().as_ref(), b"v" | b"t") => {
                    in_value = false;
                }
                Event::Start(ref e) if e.name().as_ref() == b"rPh" => phonetic_depth += 1,
                Event::End(ref e) if e.name().as_ref() == b"rPh" => {
                    phonetic_depth = phonetic_depth.saturating_sub(1);
                }
                Event::Text(ref e) if in_value && phonetic_depth == 0 => {
                    if let Some(c) = cell.as_mut() {
                        push_text(&mut c.text, e)?;
                    }
                }
                Event::GeneralRef(ref e) if in_value && phonetic_depth == 0 => {
                    if let Some(c) = cell.as_mut() {
                        push_entity(&mut c.text, e)?;
                    }
                }
                Event::CData(ref e) if in_value && phonetic_depth == 0 => {
                    if let Some(c) = cell.as_mut() {
                        c.text.push_str(&String::from_utf8_lossy(e));
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }

        while rows.last().is_some_and(|r| r.is_empty()) {
            rows.pop();
        }
        Ok(rows)
    }

    fn cell_value(&self, cell: CellState) -> Result<String> {
        match cell.kind.as_deref() {
            Some("s") => {
                let raw = cell.text.trim();
                if raw.is_empty() {
                    return Ok(String::new());
                }
                let idx: usize = raw
                    .parse()
                    .with_context(|| format!("bad shared string index {raw}"))?;
                self.shared_strings
                    .get(idx)
                    .cloned()
                    .with_context(|| format!("shared string {idx} not found"))
            }
            Some("b") => Ok(if cell.text.trim() == "1" { "TRUE" } else { "FALSE" }.to_owned()),
            _ => Ok(cell.text),
        }
    }
}

/// `<si>` texts of xl/sharedStrings.xml, rich-text runs concatenated, phonetic runs skipped.
pub(crate) fn parse_shared_strings(xml: &[u8]) -> Result<Vec<String>> {
    let mut reader = Reader::from_reader(xml);
    let mut strings = Vec::new();
    let mut current: Option<String> = None;
    let mut in_t = false;
    let mut phonetic_depth = 0usize;

    loop {
        match reader.read_event()? {
            Event::Start(ref e) if e.name().as_ref() == b"si" => current = Some(String::new()),
            Event::Empty(ref e) if e.name().as_ref() == b"si" => strings.push(String::new()),
            Event::End(ref e) if e.name().as_ref() == b"si" => {
                strings.push(current.take().unwrap_or_default());
            }
            Event::Start(ref e) if e.name().as_ref() == b"t" => in_t = current.is_some(),
            Event::End(ref e) if e.name().as_ref() == b"t" => in_t = false,
            Event::Start(ref e) if e.name().as_ref() == b"rPh" => phonetic_depth += 1,
            Event::End(ref e) if e.name().as_ref() == b"rPh" => {
                phonetic_depth = phonetic_depth.saturating_sub(1);
            }
            Event::Text(ref e) if in_t && phonetic_depth == 0 => {
                if let Some(s) = current.as_mut() {
                    push_text(s, e)?;
                }
            }
            Event::GeneralRef(ref e) if in_t && phonetic_depth == 0 => {
                if let Some(s) = current.as_mut() {
                    push_entity(s, e)?;
                }
            }
            Event::CData(ref e) if in_t && phonetic_depth == 0 => {
                if let Some(s) = current.as_mut() {
                    s.push_str(&String::from_utf8_lossy(e));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    Ok(strings)
}

fn row_number(r: Option<String>, previous: usize) -> Result<usize> {
    let num = match r {
        Some(r) => r.parse::<usize>().with_context(|| format!("bad row number {r}"))?,
        None => previous + 1,
    };
    if num == 0 || num > MAX_ROWS {
        bail!("row number {num} is out of range");
    }
    Ok(num)
}

fn cell_column(r: Option<String>, next_col: usize) -> Result<usize> {
    match r {
        Some(r) => Ok(split_coord(&r)?.0),
        None => Ok(next_col),
    }
}

fn store_row(rows: &mut Vec<Vec<String>>, row_num: usize, mut cells: Vec<String>) {
    while cells.last().is_some_and(|c| c.is_empty()) {
        cells.pop();
    }
    if row_num == 0 {
        return;
    }
    if rows.len() < row_num {
        if cells.is_empty() {
            return;
        }
        rows.resize(row_num, Vec::new());
    }
    rows[row_num - 1] = cells;
}

fn push_text(out: &mut String, raw: &[u8]) -> Result<()> {
    let text = std::str::from_utf8(raw).context("cell text is not UTF-8")?;
    out.push_str(&quick_xml::escape::unescape(text)?);
    Ok(())
}

fn push_entity(out: &mut String, name: &[u8]) -> Result<()> {
    let name = std::str::from_utf8(name).context("entity name is not UTF-8")?;
    out.push_str(&quick_xml::escape::unescape(&format!("&{name};"))?);
    Ok(())
}
