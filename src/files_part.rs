use crate::{AppendError, XlsxEditor, attr_value, find_tag, read_part::parse_shared_strings, set_tag_attr};
use ::zip as zip_crate;
use anyhow::{Context, Result, bail};
use memchr::memmem;
use quick_xml::{Reader, events::Event};
use std::{
    collections::HashSet,
    fs::File,
    io::{Read, Seek, Write},
    path::Path,
};

const SHEET_MAIN: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet.main+xml";
const TEMPLATE_MAIN: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.template.main+xml";
const SHEET_MACRO_MAIN: &str = "application/vnd.ms-excel.sheet.macroEnabled.main+xml";
const TEMPLATE_MACRO_MAIN: &str = "application/vnd.ms-excel.template.macroEnabled.main+xml";

/// `<sheet name=… r:id=…/>` from workbook.xml.
struct SheetEntry {
    name: String,
    rid: String,
}

/// Work with files
impl XlsxEditor {
    /// Открывает книгу: workbook.xml, его rels, [Content_Types].xml и sharedStrings.xml.
    /// No worksheet is selected yet, see [`XlsxEditor::with_worksheet`].
    pub fn open<P: AsRef<Path>>(src: P) -> Result<Self> {
        let src_path = src.as_ref().to_path_buf();
        let file = File::open(&src_path).with_context(|| format!("cannot open {}", src_path.display()))?;
        let mut zip = zip_crate::ZipArchive::new(file)
            .with_context(|| format!("{} is not an XLSX package", src_path.display()))?;

        let workbook_xml = read_zip_part(&mut zip, "xl/workbook.xml")?.context("xl/workbook.xml not found")?;
        let rels_xml = read_zip_part(&mut zip, "xl/_rels/workbook.xml.rels")?
            .context("xl/_rels/workbook.xml.rels not found")?;
        let content_types_xml =
            read_zip_part(&mut zip, "[Content_Types].xml")?.context("[Content_Types].xml not found")?;
        let shared_strings = match read_zip_part(&mut zip, "xl/sharedStrings.xml")? {
            Some(xml) => parse_shared_strings(&xml).context("xl/sharedStrings.xml is malformed")?,
            None => Vec::new(),
        };
        log::debug!(
            "opened {} ({} shared strings)",
            src_path.display(),
            shared_strings.len()
        );

        Ok(Self {
            src_path,
            workbook_xml,
            rels_xml,
            content_types_xml,
            shared_strings,
            sheet_path: String::new(),
            sheet_xml: Vec::new(),
            last_row: 0,
            new_files: Vec::new(),
        })
    }

    /// Sheet names in tab order.
    pub fn sheet_names(&self) -> Vec<String> {
        self.sheet_entries().into_iter().map(|s| s.name).collect()
    }

    /// 0-based tab index of `sheet_name`.
    pub fn sheet_index(&self, sheet_name: &str) -> Result<usize> {
        self.sheet_entries()
            .iter()
            .position(|s| s.name == sheet_name)
            .ok_or_else(|| AppendError::SheetNotFound(sheet_name.to_owned()).into())
    }

    /// Name of the selected worksheet part, e.g. `xl/worksheets/sheet2.xml`.
    pub fn sheet_path(&self) -> &str {
        &self.sheet_path
    }

    fn sheet_entries(&self) -> Vec<SheetEntry> {
        let mut rdr = Reader::from_reader(self.workbook_xml.as_slice());
        rdr.config_mut().trim_text(true);
        let mut sheets = Vec::new();
        while let Ok(ev) = rdr.read_event() {
            match ev {
                Event::Empty(ref e) | Event::Start(ref e) if e.name().as_ref() == b"sheet" => {
                    sheets.push(SheetEntry {
                        name: attr_value(e, b"name").unwrap_or_default(),
                        rid: attr_value(e, b"r:id").unwrap_or_default(),
                    });
                }
                Event::Eof => break,
                _ => {}
            }
        }
        sheets
    }

    /// По r:id найти Target в workbook.xml.rels и собрать путь внутри архива.
    fn sheet_target(&self, rid: &str) -> Result<String> {
        let mut rdr = Reader::from_reader(self.rels_xml.as_slice());
        rdr.config_mut().trim_text(true);
        while let Ok(ev) = rdr.read_event() {
            match ev {
                Event::Empty(ref e) | Event::Start(ref e) if e.name().as_ref() == b"Relationship" => {
                    if attr_value(e, b"Id").as_deref() == Some(rid) {
                        let target = attr_value(e, b"Target").context("Relationship without Target")?;
                        return Ok(match target.strip_prefix('/') {
                            Some(abs) => abs.to_owned(),
                            None if target.starts_with("xl/") => target,
                            None => format!("xl/{target}"),
                        });
                    }
                }
                Event::Eof => break,
                _ => {}
            }
        }
        bail!("relationship {rid} not found in workbook.xml.rels")
    }

    /// Selects `sheet_name` for [`XlsxEditor::rows`] and cell writes.
    pub fn with_worksheet(&mut self, sheet_name: &str) -> Result<&mut Self> {
        let rid = self
            .sheet_entries()
            .into_iter()
            .find(|s| s.name == sheet_name)
            .map(|s| s.rid)
            .ok_or_else(|| AppendError::SheetNotFound(sheet_name.to_owned()))?;
        let new_sheet_path = self.sheet_target(&rid)?;

        self.flush_current_sheet();
        let sheet_xml = self.load_part(&new_sheet_path)?;
        let last_row = calc_last_row(&sheet_xml);
        log::debug!("sheet '{sheet_name}' is {new_sheet_path}, last row {last_row}");

        self.sheet_path = new_sheet_path;
        self.sheet_xml = sheet_xml;
        self.last_row = last_row;
        Ok(self)
    }

    /// Makes the sheet at tab `index` the one Excel opens on:
    /// `activeTab` in workbook.xml plus `tabSelected` on the sheets' views.
    pub fn set_active_sheet(&mut self, index: usize) -> Result<()> {
        let sheets = self.sheet_entries();
        if index >= sheets.len() {
            bail!("sheet index {index} out of range ({} sheets)", sheets.len());
        }

        let active_tab = index.to_string();
        match find_tag(&self.workbook_xml, b"workbookView", 0) {
            Some(pos) => {
                set_tag_attr(&mut self.workbook_xml, pos, "activeTab", Some(&active_tab))?;
            }
            None => {
                let pos = find_tag(&self.workbook_xml, b"sheets", 0).context("<sheets> not found in workbook.xml")?;
                let views = format!(r#"<bookViews><workbookView activeTab="{active_tab}"/></bookViews>"#);
                self.workbook_xml.splice(pos..pos, views.bytes());
            }
        }

        for (i, entry) in sheets.iter().enumerate() {
            let path = self.sheet_target(&entry.rid)?;
            let selected = i == index;
            if path == self.sheet_path {
                set_tab_selected(&mut self.sheet_xml, selected)?;
                continue;
            }
            let mut xml = self.load_part(&path)?;
            if set_tab_selected(&mut xml, selected)? {
                self.put_new_file(path, xml);
            }
        }
        Ok(())
    }

    /// Часть пакета: сперва из new_files, иначе из исходного ZIP.
    fn load_part(&self, path: &str) -> Result<Vec<u8>> {
        if let Some((_, content)) = self.new_files.iter().find(|(p, _)| p == path) {
            return Ok(content.clone());
        }
        let mut zin = zip_crate::ZipArchive::new(File::open(&self.src_path)?)?;
        read_zip_part(&mut zin, path)?.with_context(|| format!("{path} not found in zip"))
    }

    fn put_new_file(&mut self, path: String, xml: Vec<u8>) {
        if let Some((_, c)) = self.new_files.iter_mut().find(|(p, _)| *p == path) {
            *c = xml;
        } else {
            self.new_files.push((path, xml));
        }
    }

    fn flush_current_sheet(&mut self) {
        if self.sheet_path.is_empty() {
            return;
        }
        let cur_path = self.sheet_path.clone();
        let cur_xml = self.sheet_xml.clone();
        self.put_new_file(cur_path, cur_xml);
    }

    /// Saves the edited workbook as a new package at `dst`; the source file is never touched.
    ///
    /// The package is written to a temporary file next to `dst` and renamed into place,
    /// so a failed save leaves no partial output. The extension of `dst` picks the
    /// workbook content type (template vs. workbook), keeping macro support as is.
    pub fn save<P: AsRef<Path>>(&mut self, dst: P) -> Result<()> {
        let dst = dst.as_ref();
        let template = is_template_extension(dst)?;
        self.flush_current_sheet();
        self.retarget_workbook_type(template)?;

        let dir = match dst.parent() {
            Some(p) if !p.as_os_str().is_empty() => p,
            _ => Path::new("."),
        };
        let mut tmp = tempfile::Builder::new()
            .prefix(".csv2xlsheet-")
            .suffix(".tmp")
            .tempfile_in(dir)
            .with_context(|| format!("cannot create a temporary file in {}", dir.display()))?;

        {
            let mut zin = zip_crate::ZipArchive::new(File::open(&self.src_path)?)?;
            let mut zout = zip_crate::ZipWriter::new(tmp.as_file_mut());

            let opt: zip_crate::write::FileOptions<'_, ()> = zip_crate::write::FileOptions::default()
                .compression_method(zip_crate::CompressionMethod::Deflated)
                .compression_level(Some(1));

            let mut written: HashSet<String> = HashSet::new();
            for i in 0..zin.len() {
                let file = zin.by_index_raw(i)?;
                let name = file.name().to_owned();

                if let Some((_, content)) = self.new_files.iter().find(|(p, _)| *p == name) {
                    // часть изменена в памяти – записываем её
                    zout.start_file(name.as_str(), opt)?;
                    zout.write_all(content)?;
                    written.insert(name);
                    continue;
                }

                match name.as_str() {
                    "xl/workbook.xml" => {
                        zout.start_file(name.as_str(), opt)?;
                        zout.write_all(&self.workbook_xml)?;
                    }
                    "[Content_Types].xml" => {
                        zout.start_file(name.as_str(), opt)?;
                        zout.write_all(&self.content_types_xml)?;
                    }
                    _ => zout.raw_copy_file(file)?,
                }
                written.insert(name);
            }

            for (path, content) in &self.new_files {
                if !written.contains(path) {
                    zout.start_file(path.as_str(), opt)?;
                    zout.write_all(content)?;
                }
            }
            zout.finish()?;
        }

        tmp.persist(dst)
            .map_err(|e| e.error)
            .with_context(|| format!("cannot write {}", dst.display()))?;
        log::debug!("saved {}", dst.display());
        Ok(())
    }

    /// Switches the workbook part between template and workbook content types.
    fn retarget_workbook_type(&mut self, template: bool) -> Result<()> {
        let Some(attr_pos) = memmem::find(&self.content_types_xml, b"PartName=\"/xl/workbook.xml\"") else {
            return Ok(());
        };
        let tag_start = self.content_types_xml[..attr_pos]
            .iter()
            .rposition(|&b| b == b'<')
            .context("malformed [Content_Types].xml")?;
        let macro_enabled = self
            .workbook_content_type(tag_start)
            .is_some_and(|t| t.contains("macroEnabled"));
        let wanted = match (template, macro_enabled) {
            (false, false) => SHEET_MAIN,
            (true, false) => TEMPLATE_MAIN,
            (false, true) => SHEET_MACRO_MAIN,
            (true, true) => TEMPLATE_MACRO_MAIN,
        };
        if set_tag_attr(&mut self.content_types_xml, tag_start, "ContentType", Some(wanted))? {
            log::debug!("workbook content type set to {wanted}");
        }
        Ok(())
    }

    fn workbook_content_type(&self, tag_start: usize) -> Option<String> {
        let mut rdr = Reader::from_reader(&self.content_types_xml[tag_start..]);
        match rdr.read_event() {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) => attr_value(e, b"ContentType"),
            _ => None,
        }
    }
}

/// Sheet names of the workbook at `src`, in tab order.
pub fn scan<P: AsRef<Path>>(src: P) -> Result<Vec<String>> {
    Ok(XlsxEditor::open(src)?.sheet_names())
}

fn read_zip_part<R: Read + Seek>(zip: &mut zip_crate::ZipArchive<R>, name: &str) -> Result<Option<Vec<u8>>> {
    match zip.by_name(name) {
        Ok(mut part) => {
            let mut buf = Vec::with_capacity(part.size() as usize);
            part.read_to_end(&mut buf)?;
            Ok(Some(buf))
        }
        Err(zip_crate::result::ZipError::FileNotFound) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

fn is_template_extension(dst: &Path) -> Result<bool> {
    let ext = dst
        .extension()
        .map(|e| e.to_string_lossy().to_ascii_lowercase())
        .unwrap_or_default();
    match ext.as_str() {
        "xlsx" | "xlsm" => Ok(false),
        "xltx" | "xltm" => Ok(true),
        _ => bail!("unsupported workbook file format: {}", dst.display()),
    }
}

fn set_tab_selected(xml: &mut Vec<u8>, selected: bool) -> Result<bool> {
    match find_tag(xml, b"sheetView", 0) {
        Some(pos) => set_tag_attr(xml, pos, "tabSelected", selected.then_some("1")),
        None => Ok(false),
    }
}

// маленький хелпер
fn calc_last_row(sheet_xml: &[u8]) -> usize {
    let mut rdr = Reader::from_reader(sheet_xml);
    rdr.config_mut().trim_text(true);

    let mut last_row = 0usize;
    while let Ok(ev) = rdr.read_event() {
        match ev {
            Event::Empty(ref e) | Event::Start(ref e) if e.name().as_ref() == b"row" => {
                if let Some(r) = attr_value(e, b"r") {
                    last_row = last_row.max(r.parse::<usize>().unwrap_or(last_row));
                }
            }
            Event::Eof => break,
            _ => {}
        }
    }
    last_row
}
