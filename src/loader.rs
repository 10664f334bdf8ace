#![cfg(not(tarpaulin_include))]

use std::path::Path;
use std::str::FromStr;

use crate::error::{AppError, AppResult};

/// A parsed sheet: the first row as headers, every other row as text cells
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    pub headers: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

/// Upload formats the importer understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImportFormat {
    Csv,
    Xlsx,
    Xlsm,
    Xls,
    Ods,
}

impl ImportFormat {
    pub fn extension(&self) -> &'static str {
        match self {
            ImportFormat::Csv => "csv",
            ImportFormat::Xlsx => "xlsx",
            ImportFormat::Xlsm => "xlsm",
            ImportFormat::Xls => "xls",
            ImportFormat::Ods => "ods",
        }
    }

    /// Detect the format from a file name's extension
    pub fn from_file_name(name: &str) -> AppResult<Self> {
        let extension = Path::new(name)
            .extension()
            .and_then(|ext| ext.to_str())
            .ok_or_else(|| AppError::bad_request("File has no extension"))?;
        extension.parse()
    }
}

impl FromStr for ImportFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "csv" => Ok(ImportFormat::Csv),
            "xlsx" => Ok(ImportFormat::Xlsx),
            "xlsm" => Ok(ImportFormat::Xlsm),
            "xls" => Ok(ImportFormat::Xls),
            "ods" => Ok(ImportFormat::Ods),
            other => Err(AppError::bad_request(format!(
                "Unsupported file extension: {}",
                other
            ))),
        }
    }
}

/// Parse uploaded spreadsheet bytes
///
/// # Errors
/// * `BadRequest` if the bytes are not a readable sheet of the given format, or hold no header row
pub fn read_table(bytes: &[u8], format: ImportFormat) -> AppResult<Table> {
    let table = match format {
        ImportFormat::Csv => from_csv(bytes)?,
        _ => from_workbook(bytes, format)?,
    };

    if table.headers.iter().all(|h| h.trim().is_empty()) {
        return Err(AppError::bad_request("Spreadsheet has no header row"));
    }
    Ok(table)
}

/// Read CSV bytes; rows may have more or fewer cells than the header
pub fn from_csv(bytes: &[u8]) -> AppResult<Table> {
    let bytes = bytes.strip_prefix(b"\xEF\xBB\xBF").unwrap_or(bytes);
    let mut reader = csv::ReaderBuilder::new()
        .has_headers(true)
        .flexible(true)
        .from_reader(bytes);

    let headers = reader
        .headers()
        .map_err(|e| AppError::bad_request(format!("Could not read CSV: {}", e)))?
        .iter()
        .map(str::to_string)
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record =
            record.map_err(|e| AppError::bad_request(format!("Could not read CSV: {}", e)))?;
        rows.push(record.iter().map(str::to_string).collect());
    }

    Ok(Table { headers, rows })
}

/// Read the first worksheet of an Excel or OpenDocument workbook
///
/// The upload is staged in a temporary file named with the right extension so that calamine
/// can pick the reader. The file is removed when this returns, on success or failure.
#[cfg(feature = "web")]
pub fn from_workbook(bytes: &[u8], format: ImportFormat) -> AppResult<Table> {
    use calamine::{Reader, open_workbook_auto};
    use std::io::Write;

    let mut staged = tempfile::Builder::new()
        .prefix("upload-")
        .suffix(&format!(".{}", format.extension()))
        .tempfile()?;
    staged.write_all(bytes)?;
    staged.flush()?;

    let unreadable =
        |e: calamine::Error| AppError::bad_request(format!("Could not read workbook: {}", e));
    let mut workbook = open_workbook_auto(staged.path()).map_err(unreadable)?;

    let sheet_name = workbook
        .sheet_names()
        .first()
        .cloned()
        .ok_or_else(|| AppError::bad_request("No sheets found in workbook"))?;
    let range = workbook.worksheet_range(&sheet_name).map_err(unreadable)?;

    let mut rows = range
        .rows()
        .map(|row| row.iter().map(cell_text).collect::<Vec<String>>());
    let headers = rows.next().unwrap_or_default();

    Ok(Table {
        headers,
        rows: rows.collect(),
    })
}

#[cfg(not(feature = "web"))]
pub fn from_workbook(_bytes: &[u8], _format: ImportFormat) -> AppResult<Table> {
    Err(AppError::bad_request(
        "Workbook support requires the 'web' feature",
    ))
}

/// Render a cell as the text a user would see
///
/// Whole floats lose their `.0` so ids and weeks typed as numbers survive a round trip.
#[cfg(feature = "web")]
fn cell_text(cell: &calamine::Data) -> String {
    use calamine::Data;

    match cell {
        Data::Empty => String::new(),
        Data::String(s) => s.clone(),
        Data::Int(i) => i.to_string(),
        Data::Float(f) if f.fract() == 0.0 && f.abs() < 1e15 => format!("{}", *f as i64),
        Data::Float(f) => f.to_string(),
        Data::Bool(b) => b.to_string(),
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_come_from_extensions() {
        assert_eq!(ImportFormat::from_file_name("plan.CSV").unwrap(), ImportFormat::Csv);
        assert_eq!(ImportFormat::from_file_name("plan.xlsm").unwrap(), ImportFormat::Xlsm);
        assert!(ImportFormat::from_file_name("plan.pdf").is_err());
        assert!(ImportFormat::from_file_name("plan").is_err());
    }

    #[test]
    fn csv_keeps_quotes_commas_and_ragged_rows() {
        let bytes = "\u{feff}Farm,Remarks,Crop\nKisima,\"spray, then rinse\",Rose\nTimau,\"said \"\"ok\"\"\"\n";
        let table = from_csv(bytes.as_bytes()).unwrap();

        assert_eq!(table.headers, vec!["Farm", "Remarks", "Crop"]);
        assert_eq!(table.rows[0], vec!["Kisima", "spray, then rinse", "Rose"]);
        assert_eq!(table.rows[1], vec!["Timau", "said \"ok\""]);
    }

    #[test]
    fn empty_csv_is_rejected() {
        assert!(read_table(b"", ImportFormat::Csv).is_err());
    }

    #[cfg(feature = "web")]
    #[test]
    fn garbage_workbook_is_a_bad_request() {
        let err = read_table(b"not a zip file", ImportFormat::Xlsx).unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));
    }
}
