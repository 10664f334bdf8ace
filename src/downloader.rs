#![cfg(not(tarpaulin_include))]

use std::str::FromStr;

use chrono::{FixedOffset, SecondsFormat};

use crate::agronomy::{AgronomyRow, FIELDS};
use crate::error::{AppError, AppResult};
use crate::farm_report::FarmReport;

/// One value in an exported cell
#[derive(Debug, Clone, PartialEq)]
pub enum CellValue {
    Text(String),
    Number(f64),
}

impl CellValue {
    fn as_text(&self) -> String {
        match self {
            CellValue::Text(s) => s.clone(),
            CellValue::Number(n) => n.to_string(),
        }
    }
}

impl From<&str> for CellValue {
    fn from(value: &str) -> Self {
        CellValue::Text(value.to_string())
    }
}

/// A named sheet ready to be written out
#[derive(Debug, Clone)]
pub struct Sheet {
    pub name: &'static str,
    pub headers: Vec<String>,
    pub rows: Vec<Vec<CellValue>>,
}

/// Download formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ExportFormat {
    #[default]
    Xlsx,
    Csv,
}

impl ExportFormat {
    pub fn content_type(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => {
                "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet"
            }
            ExportFormat::Csv => "text/csv; charset=utf-8",
        }
    }

    pub fn extension(&self) -> &'static str {
        match self {
            ExportFormat::Xlsx => "xlsx",
            ExportFormat::Csv => "csv",
        }
    }
}

impl FromStr for ExportFormat {
    type Err = AppError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "" | "xlsx" => Ok(ExportFormat::Xlsx),
            "csv" => Ok(ExportFormat::Csv),
            other => Err(AppError::bad_request(format!(
                "Unsupported export format: {}",
                other
            ))),
        }
    }
}

/// Agronomy rows as a sheet whose headers are the field names
///
/// The headers are exactly what the importer recognises, so a downloaded sheet can be edited
/// and uploaded again.
pub fn agronomy_sheet(rows: &[AgronomyRow]) -> Sheet {
    let headers = std::iter::once("id")
        .chain(FIELDS.iter().copied())
        .map(str::to_string)
        .collect();

    let rows = rows
        .iter()
        .map(|row| {
            std::iter::once(CellValue::Number(row.id as f64))
                .chain(
                    FIELDS
                        .iter()
                        .map(|name| CellValue::from(row.field(name).unwrap_or_default())),
                )
                .collect()
        })
        .collect();

    Sheet {
        name: "Agronomy",
        headers,
        rows,
    }
}

/// Farm reports as a sheet with readable headers
///
/// The creation time appears twice: formatted in `offset` for people, and as RFC 3339 UTC.
pub fn farm_report_sheet(reports: &[FarmReport], offset: FixedOffset) -> Sheet {
    let headers = [
        "ID",
        "Year",
        "Week Range",
        "Farm",
        "Greenhouse",
        "Bed",
        "Crop",
        "Variety",
        "Pest",
        "Pest Rate",
        "Disease",
        "Disease Rate",
        "Reported By",
        "Created (Local)",
        "Created (ISO)",
    ]
    .iter()
    .map(|h| h.to_string())
    .collect();

    let rows = reports
        .iter()
        .map(|report| {
            let local = report
                .created_at
                .map(|ts| ts.with_timezone(&offset).format("%d/%m/%Y %H:%M:%S").to_string())
                .unwrap_or_default();
            let iso = report
                .created_at
                .map(|ts| ts.to_rfc3339_opts(SecondsFormat::Millis, true))
                .unwrap_or_default();

            vec![
                CellValue::Number(report.id as f64),
                CellValue::Number(report.year as f64),
                CellValue::from(report.week_range.as_str()),
                CellValue::from(report.farm.as_str()),
                CellValue::from(report.greenhouse.as_str()),
                CellValue::from(report.bed.as_str()),
                CellValue::from(report.crop.as_str()),
                CellValue::from(report.variety.as_str()),
                CellValue::from(report.pest.as_str()),
                CellValue::Number(report.pest_rate),
                CellValue::from(report.disease.as_str()),
                CellValue::Number(report.disease_rate),
                CellValue::from(report.reported_by.as_deref().unwrap_or_default()),
                CellValue::Text(local),
                CellValue::Text(iso),
            ]
        })
        .collect();

    Sheet {
        name: "FarmReports",
        headers,
        rows,
    }
}

/// Write a sheet in the requested format
pub fn render(sheet: &Sheet, format: ExportFormat) -> AppResult<Vec<u8>> {
    match format {
        ExportFormat::Xlsx => to_xlsx(sheet),
        ExportFormat::Csv => to_csv(sheet),
    }
}

/// Convert a sheet to CSV bytes
///
/// Quoting of commas, quotes and newlines is left to the csv writer.
pub fn to_csv(sheet: &Sheet) -> AppResult<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    writer.write_record(&sheet.headers)?;
    for row in &sheet.rows {
        writer.write_record(row.iter().map(CellValue::as_text))?;
    }
    writer
        .into_inner()
        .map_err(|e| AppError::Spreadsheet(e.to_string()))
}

/// Convert a sheet to an XLSX workbook held in memory
///
/// Headers are bold on row 0. Empty text cells are left blank.
#[cfg(feature = "web")]
pub fn to_xlsx(sheet: &Sheet) -> AppResult<Vec<u8>> {
    use rust_xlsxwriter::{Format, Workbook, Worksheet, XlsxError};

    let xlsx_error = |e: XlsxError| AppError::Spreadsheet(e.to_string());

    let mut workbook = Workbook::new();
    let mut worksheet = Worksheet::new();
    worksheet.set_name(sheet.name).map_err(xlsx_error)?;

    let bold = Format::new().set_bold();
    for (c, header) in sheet.headers.iter().enumerate() {
        worksheet
            .write_string_with_format(0, c as u16, header.as_str(), &bold)
            .map_err(xlsx_error)?;
    }

    for (r, row) in sheet.rows.iter().enumerate() {
        let r = (r + 1) as u32;
        for (c, cell) in row.iter().enumerate() {
            let c = c as u16;
            match cell {
                CellValue::Number(n) => {
                    worksheet.write_number(r, c, *n).map_err(xlsx_error)?;
                }
                CellValue::Text(s) if s.is_empty() => {}
                CellValue::Text(s) => {
                    worksheet.write_string(r, c, s.as_str()).map_err(xlsx_error)?;
                }
            }
        }
    }

    workbook.push_worksheet(worksheet);
    workbook.save_to_buffer().map_err(xlsx_error)
}

#[cfg(not(feature = "web"))]
pub fn to_xlsx(_sheet: &Sheet) -> AppResult<Vec<u8>> {
    Err(AppError::Spreadsheet(
        "XLSX export requires the 'web' feature".to_string(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agronomy::{AgronomyFilter, AgronomyStore};
    use crate::loader::{self, ImportFormat};
    use crate::saving::MAX_ID;
    use chrono::{TimeZone, Utc};

    fn sample_rows() -> Vec<AgronomyRow> {
        vec![
            AgronomyRow {
                id: 1,
                farm: "Kisima".into(),
                greenhouse: "GH1".into(),
                crop: "Rose".into(),
                week: "12".into(),
                monday: "Abamectin, 0.5ml/L".into(),
                remarks: "line one\nline two".into(),
                supervisor_remarks: "Approved".into(),
                ..Default::default()
            },
            AgronomyRow {
                id: 2,
                farm: "Timau".into(),
                time: "Evening".into(),
                friday: "\"Mancozeb\"".into(),
                ..Default::default()
            },
            AgronomyRow {
                id: MAX_ID,
                farm: " Kisima".into(),
                target: "  ".into(),
                remarks: "spray at dusk ".into(),
                ..Default::default()
            },
        ]
    }

    #[test]
    fn agronomy_headers_are_field_names() {
        let sheet = agronomy_sheet(&sample_rows());
        assert_eq!(sheet.headers.first().map(String::as_str), Some("id"));
        assert_eq!(
            sheet.headers.last().map(String::as_str),
            Some("supervisorRemarks")
        );
        assert_eq!(sheet.headers.len(), FIELDS.len() + 1);
        assert_eq!(sheet.rows.len(), 3);
    }

    #[test]
    fn farm_report_times_are_localised() {
        let report = FarmReport {
            id: 3,
            week_range: "6-8".into(),
            created_at: Some(Utc.with_ymd_and_hms(2024, 5, 1, 22, 30, 0).unwrap()),
            ..Default::default()
        };
        let offset = FixedOffset::east_opt(3 * 3600).unwrap();
        let sheet = farm_report_sheet(&[report], offset);

        let row = &sheet.rows[0];
        assert_eq!(row[13], CellValue::Text("02/05/2024 01:30:00".into()));
        assert_eq!(row[14], CellValue::Text("2024-05-01T22:30:00.000Z".into()));
        assert_eq!(sheet.headers[2], "Week Range");
    }

    fn round_trip(format: ExportFormat, import_format: ImportFormat) {
        let rows = sample_rows();
        let bytes = render(&agronomy_sheet(&rows), format).unwrap();

        let dir = tempfile::tempdir().unwrap();
        let store = AgronomyStore::new(dir.path().join("agronomy.json"));
        let table = loader::read_table(&bytes, import_format).unwrap();
        store.import_table(&table).unwrap();

        assert_eq!(store.list(&AgronomyFilter::default()).unwrap(), rows);
    }

    #[test]
    fn csv_export_imports_back_unchanged() {
        round_trip(ExportFormat::Csv, ImportFormat::Csv);
    }

    #[cfg(feature = "web")]
    #[test]
    fn xlsx_export_imports_back_unchanged() {
        round_trip(ExportFormat::Xlsx, ImportFormat::Xlsx);
    }
}
