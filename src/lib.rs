//! lib.rs — ядро xlsx-csv-append
//! Appends delimited text rows onto an existing worksheet of an XLSX/XLTX package.
//! `XlsxEditor` is the workbook side; the `ingest` → `planner` → `placement`
//! stages are driven by [`pipeline::run`].

pub mod cli;
pub mod delimiter;
pub mod diagnostics;
pub mod error;
mod files_part;
pub mod ingest;
pub mod pipeline;
pub mod placement;
pub mod planner;
mod read_part;

use anyhow::{Context, Result, bail};
use memchr::memmem;
use quick_xml::{Writer, events::BytesStart, events::BytesText};
use std::path::PathBuf;

pub use error::AppendError;
pub use files_part::scan;

/// Excel limits for a single worksheet.
pub const MAX_COLUMNS: usize = 16_384;
pub const MAX_ROWS: usize = 1_048_576;

/// `XlsxEditor` opens an XLSX package, selects one worksheet and writes cells into it.
/// All edits stay in memory until [`XlsxEditor::save`] writes a new package.
pub struct XlsxEditor {
    src_path: PathBuf,
    workbook_xml: Vec<u8>,             // содержимое workbook.xml (может изменяться)
    rels_xml: Vec<u8>,                 // содержимое workbook.xml.rels
    content_types_xml: Vec<u8>,        // [Content_Types].xml
    shared_strings: Vec<String>,       // xl/sharedStrings.xml, только чтение
    sheet_path: String,                // пусто, пока лист не выбран
    sheet_xml: Vec<u8>,
    last_row: usize,
    new_files: Vec<(String, Vec<u8>)>, // изменённые части для записи при save()
}

/// Cells
impl XlsxEditor {
    /// Writes `value` as a string cell at 1-based `column`/`row` of the selected sheet.
    pub fn set_cell_at(&mut self, column: usize, row: usize, value: &str) -> Result<()> {
        if !(1..=MAX_COLUMNS).contains(&column) {
            bail!("column {column} is outside 1..={MAX_COLUMNS}");
        }
        if !(1..=MAX_ROWS).contains(&row) {
            bail!("row {row} is outside 1..={MAX_ROWS}");
        }
        let coord = format!("{}{}", col_letter(column - 1), row);
        self.set_cell(&coord, value)
    }

    /// Sets the value of a specific cell in the selected sheet.
    ///
    /// The value is always stored as an inline string: no number or formula inference.
    /// An existing cell at `coord` is replaced, otherwise the cell is inserted so that
    /// cells stay ordered by column and rows stay ordered by `r`.
    pub fn set_cell(&mut self, coord: &str, value: &str) -> Result<()> {
        if self.sheet_path.is_empty() {
            bail!("no worksheet selected");
        }
        let (col, row_num) = split_coord(coord)?;
        if col >= MAX_COLUMNS || row_num == 0 || row_num > MAX_ROWS {
            bail!("cell coordinate {coord} is out of range");
        }
        let coord = format!("{}{}", col_letter(col), row_num);
        self.ensure_sheet_data()?;

        // Новая строка за последней – сразу перед </sheetData>, без поиска по листу.
        if row_num > self.last_row {
            let cell_xml = inline_string_cell(&coord, value, None)?;
            self.insert_row(row_num, cell_xml)?;
            self.last_row = row_num;
            return Ok(());
        }

        // Appended rows sit at the tail, so search backwards.
        let row_marker = format!("<row r=\"{row_num}\"");
        match memmem::rfind(&self.sheet_xml, row_marker.as_bytes()) {
            Some(row_start) => self.put_cell_in_row(row_start, col, &coord, value)?,
            None => self.insert_row(row_num, inline_string_cell(&coord, value, None)?)?,
        }
        Ok(())
    }

    /// Replaces the cell at `col` (keeping its style) or inserts it in column order.
    fn put_cell_in_row(&mut self, row_start: usize, col: usize, coord: &str, value: &str) -> Result<()> {
        let tag_end = find_byte_from(&self.sheet_xml, b'>', row_start).context("unterminated <row> tag")?;

        // <row r="N"/> — разворачиваем в <row r="N">…</row>
        if self.sheet_xml[tag_end - 1] == b'/' {
            let cell_xml = inline_string_cell(coord, value, None)?;
            let mut inner = Vec::with_capacity(cell_xml.len() + 7);
            inner.push(b'>');
            inner.extend_from_slice(&cell_xml);
            inner.extend_from_slice(b"</row>");
            self.sheet_xml.splice(tag_end - 1..=tag_end, inner);
            return Ok(());
        }

        let row_end = find_bytes_from(&self.sheet_xml, b"</row>", tag_end).context("</row> not found")?;
        let mut pos = tag_end + 1;
        while let Some(c_pos) = find_bytes_from(&self.sheet_xml[..row_end], b"<c ", pos) {
            let c_tag_end = find_byte_from(&self.sheet_xml, b'>', c_pos).context("unterminated <c> tag")?;
            let c_end = if self.sheet_xml[c_tag_end - 1] == b'/' {
                c_tag_end + 1
            } else {
                find_bytes_from(&self.sheet_xml, b"</c>", c_tag_end).context("</c> not found")? + 4
            };
            let existing = BytesStart::from_content(
                String::from_utf8_lossy(&self.sheet_xml[c_pos + 1..c_tag_end]).trim_end_matches('/').to_owned(),
                1,
            );
            let existing_col = attr_value(&existing, b"r")
                .and_then(|r| split_coord(&r).ok())
                .map(|(c, _)| c);
            match existing_col {
                Some(c) if c == col => {
                    let style = attr_value(&existing, b"s");
                    let cell_xml = inline_string_cell(coord, value, style.as_deref())?;
                    self.sheet_xml.splice(c_pos..c_end, cell_xml);
                    return Ok(());
                }
                Some(c) if c > col => {
                    let cell_xml = inline_string_cell(coord, value, None)?;
                    self.sheet_xml.splice(c_pos..c_pos, cell_xml);
                    return Ok(());
                }
                _ => pos = c_end,
            }
        }
        let cell_xml = inline_string_cell(coord, value, None)?;
        self.sheet_xml.splice(row_end..row_end, cell_xml);
        Ok(())
    }

    fn insert_row(&mut self, row_num: usize, cell_xml: Vec<u8>) -> Result<()> {
        let mut new_row_xml = Vec::with_capacity(cell_xml.len() + 24);
        new_row_xml.extend_from_slice(format!("<row r=\"{row_num}\">").as_bytes());
        new_row_xml.extend_from_slice(&cell_xml);
        new_row_xml.extend_from_slice(b"</row>");

        // Keeping <row> elements sorted by `r` avoids Excel "recovered records" errors.
        let mut insert_pos = None;
        if row_num < self.last_row {
            let mut search_idx = 0;
            while let Some(abs) = find_bytes_from(&self.sheet_xml, b"<row ", search_idx) {
                let tag_end = find_byte_from(&self.sheet_xml, b'>', abs).context("unterminated <row> tag")?;
                let tag = BytesStart::from_content(
                    String::from_utf8_lossy(&self.sheet_xml[abs + 1..tag_end]).trim_end_matches('/').to_owned(),
                    3,
                );
                if let Some(existing_r) = attr_value(&tag, b"r").and_then(|r| r.parse::<usize>().ok()) {
                    if existing_r > row_num {
                        insert_pos = Some(abs);
                        break;
                    }
                }
                search_idx = tag_end;
            }
        }

        let pos = match insert_pos {
            Some(p) => p,
            None => memmem::rfind(&self.sheet_xml, b"</sheetData>").context("</sheetData> tag not found")?,
        };
        self.sheet_xml.splice(pos..pos, new_row_xml);
        Ok(())
    }

    /// Empty sheets are often saved as `<sheetData/>`; expand it so rows can be inserted.
    fn ensure_sheet_data(&mut self) -> Result<()> {
        if memmem::rfind(&self.sheet_xml, b"</sheetData>").is_some() {
            return Ok(());
        }
        let start = find_tag(&self.sheet_xml, b"sheetData", 0).context("<sheetData> not found")?;
        let end = find_byte_from(&self.sheet_xml, b'>', start).context("unterminated <sheetData> tag")?;
        if self.sheet_xml[end - 1] != b'/' {
            bail!("</sheetData> tag not found");
        }
        self.sheet_xml.splice(end - 1..=end, b"></sheetData>".iter().copied());
        Ok(())
    }
}

/// `<c r=… [s=…] t="inlineStr"><is><t>…</t></is></c>`; `style` is the existing cell's `s`.
fn inline_string_cell(coord: &str, value: &str, style: Option<&str>) -> Result<Vec<u8>> {
    let preserve = value.starts_with(char::is_whitespace) || value.ends_with(char::is_whitespace);
    let mut writer = Writer::new(Vec::new());
    let mut cell = writer.create_element("c").with_attribute(("r", coord));
    if let Some(s) = style {
        cell = cell.with_attribute(("s", s));
    }
    cell.with_attribute(("t", "inlineStr"))
        .write_inner_content(|w| {
            w.create_element("is").write_inner_content(|w2| {
                let mut t = w2.create_element("t");
                if preserve {
                    t = t.with_attribute(("xml:space", "preserve"));
                }
                t.write_text_content(BytesText::new(value))?;
                Ok(())
            })?;
            Ok(())
        })?;
    Ok(writer.into_inner())
}

/* ========================== BYTE/STRING HELPERS =========================== */

/// 0-based column index to letters: 0 → "A", 26 → "AA".
pub fn col_letter(mut n: usize) -> String {
    let mut s = String::new();
    loop {
        s.insert(0, (b'A' + (n % 26) as u8) as char);
        if n < 26 {
            break;
        }
        n = n / 26 - 1;
    }
    s
}

/// "C5" → (2, 5): 0-based column, 1-based row.
pub fn split_coord(coord: &str) -> Result<(usize, usize)> {
    let p = coord
        .find(|c: char| c.is_ascii_digit())
        .with_context(|| format!("invalid cell coordinate {coord} – no digits found"))?;
    let letters = &coord[..p];
    if letters.is_empty() || letters.len() > 3 || !letters.bytes().all(|b| b.is_ascii_alphabetic()) {
        bail!("invalid column in cell coordinate {coord}");
    }
    let col = letters
        .bytes()
        .fold(0usize, |acc, b| acc * 26 + (b.to_ascii_uppercase() - b'A' + 1) as usize)
        - 1;
    let row = coord[p..]
        .parse::<usize>()
        .with_context(|| format!("invalid row number in cell coordinate {coord}"))?;
    Ok((col, row))
}

/// Attribute value by key, XML entities resolved.
pub(crate) fn attr_value(e: &BytesStart<'_>, key: &[u8]) -> Option<String> {
    e.attributes().with_checks(false).flatten().find_map(|a| {
        (a.key.as_ref() == key).then(|| {
            let raw = String::from_utf8_lossy(&a.value);
            match quick_xml::escape::unescape(&raw) {
                Ok(v) => v.into_owned(),
                Err(_) => raw.into_owned(),
            }
        })
    })
}

/// Position of `<name` followed by whitespace, `>` or `/` (so `<sheetView` never matches `<sheetViews`).
pub(crate) fn find_tag(hay: &[u8], name: &[u8], start: usize) -> Option<usize> {
    let mut open = Vec::with_capacity(name.len() + 1);
    open.push(b'<');
    open.extend_from_slice(name);
    let mut from = start;
    while let Some(pos) = find_bytes_from(hay, &open, from) {
        match hay.get(pos + open.len()) {
            Some(b) if b.is_ascii_whitespace() || *b == b'>' || *b == b'/' => return Some(pos),
            Some(_) => from = pos + open.len(),
            None => return None,
        }
    }
    None
}

pub(crate) fn find_bytes_from(hay: &[u8], needle: &[u8], start: usize) -> Option<usize> {
    if start > hay.len() {
        return None;
    }
    memmem::find(&hay[start..], needle).map(|p| p + start)
}

fn find_byte_from(hay: &[u8], needle: u8, start: usize) -> Option<usize> {
    hay.get(start..)?.iter().position(|&b| b == needle).map(|p| p + start)
}

/// Sets (`Some`) or removes (`None`) `attr` on the tag opening at `tag_start`.
/// Returns whether the XML changed.
pub(crate) fn set_tag_attr(xml: &mut Vec<u8>, tag_start: usize, attr: &str, value: Option<&str>) -> Result<bool> {
    let tag_end = find_byte_from(xml, b'>', tag_start).context("unterminated tag")?;
    let needle = format!(" {attr}=\"");
    match find_bytes_from(&xml[..tag_end], needle.as_bytes(), tag_start) {
        Some(a) => {
            let val_start = a + needle.len();
            let val_end = find_byte_from(xml, b'"', val_start).context("closing quote not found")?;
            match value {
                Some(v) if xml[val_start..val_end] == *v.as_bytes() => Ok(false),
                Some(v) => {
                    xml.splice(val_start..val_end, v.bytes());
                    Ok(true)
                }
                None => {
                    xml.drain(a..=val_end);
                    Ok(true)
                }
            }
        }
        None => match value {
            Some(v) => {
                // сразу после имени тега
                let name_end = xml[tag_start + 1..tag_end]
                    .iter()
                    .position(|b| b.is_ascii_whitespace() || *b == b'/')
                    .map_or(tag_end, |p| tag_start + 1 + p);
                let inserted = format!(" {attr}=\"{v}\"");
                xml.splice(name_end..name_end, inserted.bytes());
                Ok(true)
            }
            None => Ok(false),
        },
    }
}
