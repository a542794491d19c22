//! Tabular file reader and writer with encoding and delimiter auto-detection.
//!
//! Survey exports and dispatch lists arrive as CSV in whatever encoding the
//! exporting tool used. Everything is read into a [`Table`]; no survey
//! semantics live here.

use std::fs;
use std::io::Write;
use std::path::Path;

use crate::error::{CsvError, CsvResult, OutputError, OutputResult};
use crate::models::{cell, Table};
use rust_xlsxwriter::Workbook;

/// Result of parsing with metadata
#[derive(Debug, Clone)]
pub struct ParseResult {
    /// Parsed table
    pub table: Table,
    /// Detected or used encoding
    pub encoding: String,
    /// Detected or used delimiter
    pub delimiter: char,
}

/// Detect the encoding of raw bytes using chardet
pub fn detect_encoding(bytes: &[u8]) -> String {
    let result = chardet::detect(bytes);
    let charset = result.0;

    // Normalize charset names
    match charset.to_lowercase().as_str() {
        "ascii" | "utf-8" | "utf8" | "" => "utf-8".to_string(),
        "iso-8859-1" | "iso-8859-15" | "latin-1" | "latin1" => "iso-8859-1".to_string(),
        "windows-1252" | "cp1252" => "windows-1252".to_string(),
        _ => charset,
    }
}

/// Decode bytes to string using the specified encoding
pub fn decode_content(bytes: &[u8], encoding: &str) -> String {
    // Exports from spreadsheet tools often carry a UTF-8 BOM.
    let bytes = bytes.strip_prefix(&[0xEF, 0xBB, 0xBF]).unwrap_or(bytes);
    match encoding.to_lowercase().as_str() {
        "utf-8" | "utf8" | "ascii" => match std::str::from_utf8(bytes) {
            Ok(s) => s.to_string(),
            Err(_) => String::from_utf8_lossy(bytes).to_string(),
        },
        "iso-8859-1" | "latin-1" | "latin1" => {
            encoding_rs::ISO_8859_15.decode(bytes).0.to_string()
        }
        "windows-1252" | "cp1252" => encoding_rs::WINDOWS_1252.decode(bytes).0.to_string(),
        // Fallback: UTF-8 with lossy conversion
        _ => String::from_utf8_lossy(bytes).to_string(),
    }
}

/// Detect the delimiter by counting occurrences in the first line
pub fn detect_delimiter(content: &str) -> char {
    let first_line = content.lines().next().unwrap_or("");

    let separators = [',', ';', '\t', '|'];
    let mut best_sep = ',';
    let mut best_count = 0;

    for &sep in &separators {
        let count = first_line.matches(sep).count();
        if count > best_count {
            best_count = count;
            best_sep = sep;
        }
    }

    best_sep
}

/// Parse CSV text with an explicit delimiter.
///
/// The first record is the header row. Cells are trimmed and empty cells
/// become nulls; short rows are padded, long rows truncated to the header.
///
/// # Example
/// ```ignore
/// use rred::parser::parse_str;
///
/// let table = parse_str("school_id,name\nRRS100,Oak\n", ',').unwrap();
/// assert_eq!(table.get(0, "name"), Some("Oak"));
/// ```
pub fn parse_str(content: &str, delimiter: char) -> CsvResult<Table> {
    if content.trim().is_empty() {
        return Err(CsvError::EmptyFile);
    }

    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter as u8)
        .flexible(true)
        .has_headers(true)
        .from_reader(content.as_bytes());

    let headers: Vec<String> = reader
        .headers()
        .map_err(|e| CsvError::ParseError {
            line: 1,
            message: e.to_string(),
        })?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    if headers.iter().all(String::is_empty) {
        return Err(CsvError::NoHeaders);
    }

    let mut table = Table::new(headers);
    let width = table.width();

    for result in reader.records() {
        let record = result.map_err(|e| CsvError::ParseError {
            line: e.position().map(|p| p.line()).unwrap_or(0),
            message: e.to_string(),
        })?;

        if record.iter().all(|v| v.trim().is_empty()) {
            continue;
        }

        let mut row: Vec<_> = record.iter().take(width).map(cell).collect();
        row.resize(width, None);
        table.rows.push(row);
    }

    Ok(table)
}

/// Parse CSV bytes with auto-detection of encoding and delimiter.
pub fn parse_bytes_auto(bytes: &[u8]) -> CsvResult<ParseResult> {
    if bytes.is_empty() {
        return Err(CsvError::EmptyFile);
    }
    let encoding = detect_encoding(bytes);
    let content = decode_content(bytes, &encoding);
    let delimiter = detect_delimiter(&content);
    let table = parse_str(&content, delimiter)?;

    Ok(ParseResult {
        table,
        encoding,
        delimiter,
    })
}

/// Parse CSV file with auto-detection of encoding and delimiter.
pub fn parse_csv_file_auto<P: AsRef<Path>>(path: P) -> CsvResult<ParseResult> {
    let path = path.as_ref();
    let bytes = fs::read(path).map_err(|source| CsvError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    parse_bytes_auto(&bytes)
}

/// Read a CSV file into a table, logging what was detected.
pub fn read_table<P: AsRef<Path>>(path: P) -> CsvResult<Table> {
    let path = path.as_ref();
    let result = parse_csv_file_auto(path)?;
    tracing::debug!(
        path = %path.display(),
        encoding = %result.encoding,
        delimiter = %format_delimiter(result.delimiter),
        rows = result.table.len(),
        columns = result.table.width(),
        "parsed tabular file"
    );
    Ok(result.table)
}

/// Format delimiter for display
pub fn format_delimiter(d: char) -> String {
    match d {
        '\t' => "\\t".to_string(),
        c => c.to_string(),
    }
}

// =============================================================================
// Writing
// =============================================================================

fn create_parent(path: &Path) -> OutputResult<()> {
    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|source| OutputError::Io {
            path: parent.to_path_buf(),
            source,
        })?;
    }
    Ok(())
}

/// Write a table as comma-separated UTF-8, nulls as empty cells.
pub fn write_table<W: Write>(writer: W, table: &Table) -> OutputResult<()> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record(&table.headers)?;
    for row in &table.rows {
        wtr.write_record(row.iter().map(|c| c.as_deref().unwrap_or("")))?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write a table to a file, creating parent directories.
pub fn write_table_file<P: AsRef<Path>>(path: P, table: &Table) -> OutputResult<()> {
    let path = path.as_ref();
    create_parent(path)?;
    let file = fs::File::create(path).map_err(|source| OutputError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    write_table(file, table)
}

/// Longest worksheet name a workbook accepts.
const MAX_SHEET_NAME: usize = 31;

/// One worksheet: free-text lines in the first column, then the table.
#[derive(Debug, Clone)]
pub struct Sheet<'a> {
    pub name: &'a str,
    pub preamble: Vec<&'a str>,
    pub table: &'a Table,
}

/// Write sheets into one `.xlsx` workbook, creating parent directories.
///
/// Each sheet starts with its preamble lines from row 0 in column A; the
/// header row follows, then the data. Null cells stay blank.
pub fn write_workbook_file<P: AsRef<Path>>(path: P, sheets: &[Sheet<'_>]) -> OutputResult<()> {
    let path = path.as_ref();
    create_parent(path)?;

    let mut workbook = Workbook::new();
    for sheet in sheets {
        let name: String = sheet.name.chars().take(MAX_SHEET_NAME).collect();
        let worksheet = workbook.add_worksheet();
        worksheet.set_name(name)?;

        for (row, line) in sheet.preamble.iter().enumerate() {
            worksheet.write_string(row as u32, 0, *line)?;
        }

        let header_row = sheet.preamble.len() as u32;
        for (col, header) in sheet.table.headers.iter().enumerate() {
            worksheet.write_string(header_row, col as u16, header)?;
        }
        for (r, values) in sheet.table.rows.iter().enumerate() {
            let row = header_row + 1 + r as u32;
            for (col, value) in values.iter().enumerate() {
                if let Some(value) = value {
                    worksheet.write_string(row, col as u16, value)?;
                }
            }
        }
    }

    workbook.save(path)?;
    Ok(())
}
