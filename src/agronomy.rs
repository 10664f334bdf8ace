//! Spray-program records
//!
//! Each row describes what is applied to one crop in one greenhouse: the target pest or disease,
//! what goes on each day of the week, and free-text remarks. Rows are keyed by an integer id and
//! are never deleted.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Mutex;

use lazy_static::lazy_static;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::error::{AppError, AppResult};
use crate::loader::Table;
use crate::saving::{JsonFile, MAX_ID, next_id};

/// Field names of an agronomy row after `id`, in column order
pub const FIELDS: &[&str] = &[
    "farm",
    "greenhouse",
    "crop",
    "variety",
    "week",
    "time",
    "target",
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
    "remarks",
    "supervisorRemarks",
];

pub const SUPERVISOR_REMARKS: &str = "supervisorRemarks";

/// One stored spray-program row
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AgronomyRow {
    pub id: u64,
    pub farm: String,
    pub greenhouse: String,
    pub crop: String,
    pub variety: String,
    pub week: String,
    pub time: String,
    pub target: String,
    pub monday: String,
    pub tuesday: String,
    pub wednesday: String,
    pub thursday: String,
    pub friday: String,
    pub saturday: String,
    pub sunday: String,
    pub remarks: String,
    pub supervisor_remarks: String,
}

impl AgronomyRow {
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "farm" => &self.farm,
            "greenhouse" => &self.greenhouse,
            "crop" => &self.crop,
            "variety" => &self.variety,
            "week" => &self.week,
            "time" => &self.time,
            "target" => &self.target,
            "monday" => &self.monday,
            "tuesday" => &self.tuesday,
            "wednesday" => &self.wednesday,
            "thursday" => &self.thursday,
            "friday" => &self.friday,
            "saturday" => &self.saturday,
            "sunday" => &self.sunday,
            "remarks" => &self.remarks,
            "supervisorRemarks" => &self.supervisor_remarks,
            _ => return None,
        };
        Some(value.as_str())
    }

    fn field_mut(&mut self, name: &str) -> Option<&mut String> {
        let value = match name {
            "farm" => &mut self.farm,
            "greenhouse" => &mut self.greenhouse,
            "crop" => &mut self.crop,
            "variety" => &mut self.variety,
            "week" => &mut self.week,
            "time" => &mut self.time,
            "target" => &mut self.target,
            "monday" => &mut self.monday,
            "tuesday" => &mut self.tuesday,
            "wednesday" => &mut self.wednesday,
            "thursday" => &mut self.thursday,
            "friday" => &mut self.friday,
            "saturday" => &mut self.saturday,
            "sunday" => &mut self.sunday,
            "remarks" => &mut self.remarks,
            "supervisorRemarks" => &mut self.supervisor_remarks,
            _ => return None,
        };
        Some(value)
    }

    /// Copy every supplied field of `patch` over this row
    ///
    /// Omitted fields keep their current value, so an omitted `supervisorRemarks` is never
    /// cleared. An explicitly empty value does clear the field.
    pub fn merge(&mut self, patch: &AgronomyPatch) {
        for name in FIELDS {
            if let (Some(value), Some(slot)) = (patch.field(name), self.field_mut(name)) {
                *slot = value.to_string();
            }
        }
    }

    fn matches(&self, filter: &AgronomyFilter) -> bool {
        if let Some(q) = non_blank(&filter.q) {
            let needle = q.to_lowercase();
            let hit = self.id.to_string().contains(&needle)
                || FIELDS.iter().any(|name| {
                    self.field(name)
                        .is_some_and(|value| value.to_lowercase().contains(&needle))
                });
            if !hit {
                return false;
            }
        }

        equals_ignore_case(&filter.farm, &self.farm)
            && equals_ignore_case(&filter.greenhouse, &self.greenhouse)
            && equals_ignore_case(&filter.time, &self.time)
    }
}

/// Incoming fields for add and bulk-set
///
/// `None` means "not supplied". Numbers and booleans are accepted and kept as text.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AgronomyPatch {
    #[serde(default, deserialize_with = "lenient_id")]
    pub id: Option<u64>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub farm: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub greenhouse: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub crop: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub variety: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub week: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub time: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub target: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub monday: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub tuesday: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub wednesday: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub thursday: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub friday: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub saturday: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub sunday: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub remarks: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub supervisor_remarks: Option<String>,
}

impl AgronomyPatch {
    pub fn field(&self, name: &str) -> Option<&str> {
        let value = match name {
            "farm" => &self.farm,
            "greenhouse" => &self.greenhouse,
            "crop" => &self.crop,
            "variety" => &self.variety,
            "week" => &self.week,
            "time" => &self.time,
            "target" => &self.target,
            "monday" => &self.monday,
            "tuesday" => &self.tuesday,
            "wednesday" => &self.wednesday,
            "thursday" => &self.thursday,
            "friday" => &self.friday,
            "saturday" => &self.saturday,
            "sunday" => &self.sunday,
            "remarks" => &self.remarks,
            "supervisorRemarks" => &self.supervisor_remarks,
            _ => return None,
        };
        value.as_deref()
    }

    /// A fresh row holding the supplied fields, everything else empty
    fn into_row(self, id: u64) -> AgronomyRow {
        let mut row = AgronomyRow {
            id,
            ..AgronomyRow::default()
        };
        row.merge(&self);
        row
    }
}

pub(crate) fn lenient_text<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::String(s) => Ok(Some(s)),
        Value::Number(n) => Ok(Some(n.to_string())),
        Value::Bool(b) => Ok(Some(b.to_string())),
        other => Err(serde::de::Error::custom(format!(
            "expected text, found {}",
            other
        ))),
    }
}

fn lenient_id<'de, D>(deserializer: D) -> Result<Option<u64>, D::Error>
where
    D: Deserializer<'de>,
{
    match Value::deserialize(deserializer)? {
        Value::Null => Ok(None),
        Value::Number(n) => n
            .as_u64()
            .map(Some)
            .ok_or_else(|| serde::de::Error::custom(format!("invalid id {}", n))),
        Value::String(s) if s.trim().is_empty() => Ok(None),
        Value::String(s) => s
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| serde::de::Error::custom(format!("invalid id {:?}", s))),
        other => Err(serde::de::Error::custom(format!("invalid id {}", other))),
    }
}

/// Query parameters accepted by list, search and export
#[derive(Debug, Clone, Default, Deserialize)]
pub struct AgronomyFilter {
    /// Case-insensitive substring over every field
    pub q: Option<String>,
    pub farm: Option<String>,
    pub greenhouse: Option<String>,
    pub time: Option<String>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn equals_ignore_case(filter: &Option<String>, value: &str) -> bool {
    match non_blank(filter) {
        Some(wanted) => wanted.to_lowercase() == value.trim().to_lowercase(),
        None => true,
    }
}

/// Outcome of a spreadsheet import
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ImportSummary {
    pub inserted: usize,
    pub replaced: usize,
    pub total: usize,
}

lazy_static! {
    /// Spreadsheet header spellings, normalized by [`normalize_header`], to field names
    static ref HEADER_ALIASES: HashMap<&'static str, &'static str> = {
        let mut aliases = HashMap::new();
        let table: &[(&str, &[&str])] = &[
            ("id", &["id", "identifier", "no", "rowid"]),
            ("farm", &["farm", "farmname"]),
            ("greenhouse", &["greenhouse", "gh", "house", "greenhouseno"]),
            ("crop", &["crop", "cropname"]),
            ("variety", &["variety", "varieties", "cultivar"]),
            ("week", &["week", "wk", "weekno"]),
            ("time", &["time", "spraytime", "applicationtime"]),
            ("target", &["target", "pestdisease", "pest/disease", "targetpest"]),
            ("monday", &["monday", "mon"]),
            ("tuesday", &["tuesday", "tue", "tues"]),
            ("wednesday", &["wednesday", "wed"]),
            ("thursday", &["thursday", "thu", "thur", "thurs"]),
            ("friday", &["friday", "fri"]),
            ("saturday", &["saturday", "sat"]),
            ("sunday", &["sunday", "sun"]),
            ("remarks", &["remarks", "remark", "comment", "comments", "notes"]),
            (
                SUPERVISOR_REMARKS,
                &["supervisorremarks", "supervisorremark", "supervisorcomment", "supervisorcomments"],
            ),
        ];
        for (field, spellings) in table {
            for spelling in spellings.iter() {
                aliases.insert(*spelling, *field);
            }
        }
        aliases
    };
}

/// Lower-case a header and drop spaces, underscores and dashes
pub fn normalize_header(header: &str) -> String {
    header
        .chars()
        .filter(|c| !c.is_whitespace() && *c != '_' && *c != '-')
        .flat_map(char::to_lowercase)
        .collect()
}

/// The field a spreadsheet header maps to, if it is recognised
pub fn canonical_header(header: &str) -> Option<&'static str> {
    HEADER_ALIASES.get(normalize_header(header).as_str()).copied()
}

/// One spreadsheet row keyed by field name
type ImportedRow = HashMap<&'static str, String>;

fn imported_rows(table: &Table) -> Vec<ImportedRow> {
    let columns: Vec<Option<&'static str>> =
        table.headers.iter().map(|h| canonical_header(h)).collect();

    table
        .rows
        .iter()
        .filter(|cells| cells.iter().any(|cell| !cell.trim().is_empty()))
        .map(|cells| {
            let mut row = ImportedRow::new();
            for (field, cell) in columns.iter().zip(cells) {
                if let Some(field) = field {
                    row.entry(*field).or_insert_with(|| cell.clone());
                }
            }
            row
        })
        .collect()
}

/// Spray-program rows persisted in one JSON file
pub struct AgronomyStore {
    file: JsonFile<AgronomyRow>,
    lock: Mutex<()>,
}

impl AgronomyStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonFile::new(path),
            lock: Mutex::new(()),
        }
    }

    /// Rows matching `filter`, in storage order
    pub fn list(&self, filter: &AgronomyFilter) -> AppResult<Vec<AgronomyRow>> {
        let rows = self.file.read()?;
        Ok(rows.into_iter().filter(|row| row.matches(filter)).collect())
    }

    /// Append a new row with the next id
    ///
    /// Any id in `patch` is ignored.
    pub fn add(&self, patch: AgronomyPatch) -> AppResult<AgronomyRow> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut rows = self.file.read()?;

        let row = patch.into_row(next_id(rows.iter().map(|row| row.id))?);
        rows.push(row.clone());
        self.file.write(&rows)?;

        log::info!("Added agronomy row {}", row.id);
        Ok(row)
    }

    /// Merge a batch of rows into the stored set by id
    ///
    /// Rows without an id get the next one. Rows whose id exists have their supplied fields
    /// merged in; the rest are appended. Returns the full stored set afterwards.
    pub fn bulk_set(&self, patches: Vec<AgronomyPatch>) -> AppResult<Vec<AgronomyRow>> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut rows = self.file.read()?;
        let mut counter = IdCounter::seeded(&rows);

        for patch in patches {
            let id = counter.assign(patch.id)?;
            match rows.iter_mut().find(|row| row.id == id) {
                Some(existing) => existing.merge(&patch),
                None => rows.push(patch.into_row(id)),
            }
        }

        self.file.write(&rows)?;
        log::info!("Bulk set agronomy rows, {} stored", rows.len());
        Ok(rows)
    }

    /// Set the supervisor remarks of one row
    ///
    /// # Errors
    /// * `NotFound` if no row has `id`; the file is not touched
    pub fn patch_supervisor_remarks(&self, id: u64, text: &str) -> AppResult<AgronomyRow> {
        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut rows = self.file.read()?;

        let row = rows
            .iter_mut()
            .find(|row| row.id == id)
            .ok_or_else(|| AppError::not_found(format!("Agronomy row {} not found", id)))?;
        row.supervisor_remarks = text.to_string();
        let updated = row.clone();

        self.file.write(&rows)?;
        Ok(updated)
    }

    /// Reconcile parsed spreadsheet rows with the stored set
    ///
    /// Unlike [`AgronomyStore::bulk_set`] a row whose id exists is replaced outright: columns the
    /// sheet lacks become empty. The one exception is `supervisorRemarks`, which keeps the stored
    /// value unless the sheet has a non-blank cell for it.
    pub fn import_table(&self, table: &Table) -> AppResult<ImportSummary> {
        let imported = imported_rows(table);

        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut rows = self.file.read()?;
        let mut counter = IdCounter::seeded(&rows);
        let mut summary = ImportSummary::default();

        for cells in imported {
            let explicit = cells.get("id").and_then(|raw| parse_id(raw));
            let id = counter.assign(explicit)?;

            let mut row = AgronomyRow {
                id,
                ..AgronomyRow::default()
            };
            for name in FIELDS {
                if let (Some(value), Some(slot)) = (cells.get(name), row.field_mut(name)) {
                    *slot = value.clone();
                }
            }

            match rows.iter_mut().find(|existing| existing.id == id) {
                Some(existing) => {
                    if row.supervisor_remarks.trim().is_empty() {
                        row.supervisor_remarks = existing.supervisor_remarks.clone();
                    }
                    *existing = row;
                    summary.replaced += 1;
                }
                None => {
                    rows.push(row);
                    summary.inserted += 1;
                }
            }
        }

        self.file.write(&rows)?;
        summary.total = rows.len();
        log::info!(
            "Imported agronomy sheet: {} inserted, {} replaced",
            summary.inserted,
            summary.replaced
        );
        Ok(summary)
    }
}

/// Hands out ids for rows that arrive without one
struct IdCounter {
    last: u64,
}

impl IdCounter {
    fn seeded(rows: &[AgronomyRow]) -> Self {
        Self {
            last: rows.iter().map(|row| row.id).max().unwrap_or(0),
        }
    }

    /// # Errors
    /// * `BadRequest` for an explicit id above [`MAX_ID`]
    /// * `Internal` when no id is left to generate
    fn assign(&mut self, explicit: Option<u64>) -> AppResult<u64> {
        match explicit {
            Some(id) if id > MAX_ID => Err(AppError::bad_request(format!(
                "Row id {} is out of range (maximum {})",
                id, MAX_ID
            ))),
            Some(id) => {
                self.last = self.last.max(id);
                Ok(id)
            }
            None => {
                self.last = next_id([self.last])?;
                Ok(self.last)
            }
        }
    }
}

/// Ids from sheets may come through as `12` or `12.0`
fn parse_id(raw: &str) -> Option<u64> {
    let raw = raw.trim();
    raw.parse::<u64>().ok().or_else(|| {
        raw.parse::<f64>()
            .ok()
            .filter(|f| f.fract() == 0.0 && *f >= 1.0)
            .map(|f| f as u64)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::fs;

    fn patch(value: serde_json::Value) -> AgronomyPatch {
        serde_json::from_value(value).unwrap()
    }

    fn store() -> (tempfile::TempDir, AgronomyStore) {
        let dir = tempfile::tempdir().unwrap();
        let store = AgronomyStore::new(dir.path().join("agronomy.json"));
        (dir, store)
    }

    #[test]
    fn add_assigns_increasing_unique_ids() {
        let (_dir, store) = store();
        let mut ids = Vec::new();
        for farm in ["Kisima", "Naivasha", "Kisima", "Timau"] {
            ids.push(store.add(patch(json!({ "farm": farm, "id": 99 }))).unwrap().id);
        }
        assert_eq!(ids, vec![1, 2, 3, 4]);
    }

    #[test]
    fn add_continues_after_the_largest_id() {
        let (_dir, store) = store();
        store
            .bulk_set(vec![patch(json!({ "id": 40, "farm": "Kisima" }))])
            .unwrap();
        assert_eq!(store.add(AgronomyPatch::default()).unwrap().id, 41);
    }

    #[test]
    fn patch_accepts_numbers_as_text() {
        let p = patch(json!({ "id": "7", "week": 12, "farm": null }));
        assert_eq!(p.id, Some(7));
        assert_eq!(p.week.as_deref(), Some("12"));
        assert_eq!(p.farm, None);
    }

    #[test]
    fn bulk_set_merges_and_keeps_supervisor_remarks() {
        let (_dir, store) = store();
        store
            .bulk_set(vec![patch(json!({ "farm": "Kisima", "crop": "Rose" }))])
            .unwrap();
        store.patch_supervisor_remarks(1, "Check nozzles").unwrap();

        let resubmitted = vec![patch(json!({ "id": 1, "crop": "Carnation" }))];
        store.bulk_set(resubmitted.clone()).unwrap();
        let rows = store.bulk_set(resubmitted).unwrap();

        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].farm, "Kisima");
        assert_eq!(rows[0].crop, "Carnation");
        assert_eq!(rows[0].supervisor_remarks, "Check nozzles");
    }

    #[test]
    fn bulk_set_counter_skips_past_explicit_ids() {
        let (_dir, store) = store();
        store.add(AgronomyPatch::default()).unwrap();

        let rows = store
            .bulk_set(vec![
                patch(json!({ "id": 5, "farm": "A" })),
                patch(json!({ "farm": "B" })),
                patch(json!({ "farm": "C" })),
            ])
            .unwrap();

        let ids: Vec<u64> = rows.iter().map(|row| row.id).collect();
        assert_eq!(ids, vec![1, 5, 6, 7]);
        assert!(rows.iter().all(|row| row.supervisor_remarks.is_empty()));
    }

    #[test]
    fn patching_unknown_id_is_not_found_and_leaves_file() {
        let (_dir, store) = store();
        store.add(patch(json!({ "farm": "Kisima" }))).unwrap();
        let before = fs::read_to_string(store.file.path()).unwrap();

        let err = store.patch_supervisor_remarks(42, "late").unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));
        assert_eq!(fs::read_to_string(store.file.path()).unwrap(), before);
    }

    #[test]
    fn list_filters_by_query_and_exact_fields() {
        let (_dir, store) = store();
        store
            .bulk_set(vec![
                patch(json!({ "farm": "Kisima", "greenhouse": "GH1", "time": "Morning", "target": "Thrips" })),
                patch(json!({ "farm": "kisima", "greenhouse": "GH2", "time": "Evening", "target": "Mildew" })),
                patch(json!({ "farm": "Timau", "greenhouse": "GH1", "time": "morning", "remarks": "thrips seen" })),
            ])
            .unwrap();

        let by_q = store
            .list(&AgronomyFilter {
                q: Some("THRIPS".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_q.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1, 3]);

        let by_farm = store
            .list(&AgronomyFilter {
                farm: Some("KISIMA".into()),
                time: Some("morning".into()),
                ..Default::default()
            })
            .unwrap();
        assert_eq!(by_farm.iter().map(|r| r.id).collect::<Vec<_>>(), vec![1]);

        let partial = store
            .list(&AgronomyFilter {
                farm: Some("Kis".into()),
                greenhouse: Some("  ".into()),
                ..Default::default()
            })
            .unwrap();
        assert!(partial.is_empty());
    }

    #[test]
    fn headers_match_aliases_case_insensitively() {
        assert_eq!(canonical_header("Green House"), Some("greenhouse"));
        assert_eq!(canonical_header("GH"), Some("greenhouse"));
        assert_eq!(canonical_header("Supervisor_Remarks"), Some(SUPERVISOR_REMARKS));
        assert_eq!(canonical_header("supervisorRemarks"), Some(SUPERVISOR_REMARKS));
        assert_eq!(canonical_header("MON"), Some("monday"));
        assert_eq!(canonical_header("Colour"), None);
    }

    #[test]
    fn import_replaces_by_id_and_keeps_supervisor_remarks() {
        let (_dir, store) = store();
        store
            .bulk_set(vec![patch(json!({ "farm": "Kisima", "crop": "Rose", "remarks": "old" }))])
            .unwrap();
        store.patch_supervisor_remarks(1, "Approved").unwrap();

        let table = Table {
            headers: vec!["ID".into(), "Farm".into(), "Crop".into(), "Colour".into()],
            rows: vec![
                vec!["1".into(), "Kisima".into(), "Carnation".into(), "red".into()],
                vec!["".into(), "Timau".into(), "Rose".into(), "".into()],
                vec!["".into(), "".into(), "".into(), "".into()],
            ],
        };
        let summary = store.import_table(&table).unwrap();
        assert_eq!(
            summary,
            ImportSummary {
                inserted: 1,
                replaced: 1,
                total: 2
            }
        );

        let rows = store.list(&AgronomyFilter::default()).unwrap();
        assert_eq!(rows[0].crop, "Carnation");
        assert_eq!(rows[0].remarks, "", "replacement is not a merge");
        assert_eq!(rows[0].supervisor_remarks, "Approved");
        assert_eq!(rows[1].id, 2);
        assert_eq!(rows[1].farm, "Timau");
    }

    #[test]
    fn import_uses_supplied_supervisor_remarks() {
        let (_dir, store) = store();
        store.add(patch(json!({ "farm": "Kisima" }))).unwrap();
        store.patch_supervisor_remarks(1, "Approved").unwrap();

        let table = Table {
            headers: vec!["id".into(), "Supervisor Remarks".into()],
            rows: vec![vec!["1.0".into(), "Redo on Friday".into()]],
        };
        store.import_table(&table).unwrap();

        let rows = store.list(&AgronomyFilter::default()).unwrap();
        assert_eq!(rows[0].supervisor_remarks, "Redo on Friday");
    }

    #[test]
    fn ids_parse_from_integer_and_float_cells() {
        assert_eq!(parse_id("12"), Some(12));
        assert_eq!(parse_id(" 12.0 "), Some(12));
        assert_eq!(parse_id("12.5"), None);
        assert_eq!(parse_id("abc"), None);
        assert_eq!(parse_id(""), None);
    }

    #[test]
    fn import_keeps_cell_whitespace() {
        let (_dir, store) = store();
        store.add(patch(json!({ "farm": "Kisima" }))).unwrap();
        store.patch_supervisor_remarks(1, "Approved").unwrap();

        let table = Table {
            headers: vec!["id".into(), "farm".into(), "remarks".into(), "supervisorRemarks".into()],
            rows: vec![vec![" 1 ".into(), " Kisima".into(), "spray at dusk ".into(), "   ".into()]],
        };
        store.import_table(&table).unwrap();

        let rows = store.list(&AgronomyFilter::default()).unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].farm, " Kisima");
        assert_eq!(rows[0].remarks, "spray at dusk ");
        assert_eq!(rows[0].supervisor_remarks, "Approved");
    }

    #[test]
    fn out_of_range_ids_are_refused_without_writing() {
        let (_dir, store) = store();
        store.add(patch(json!({ "farm": "Kisima" }))).unwrap();
        let before = fs::read_to_string(store.file.path()).unwrap();

        let err = store
            .bulk_set(vec![patch(json!({ "id": u64::MAX, "farm": "Timau" }))])
            .unwrap_err();
        assert!(matches!(err, AppError::BadRequest(_)));

        let table = Table {
            headers: vec!["id".into(), "farm".into()],
            rows: vec![vec!["1e300".into(), "Timau".into()]],
        };
        assert!(matches!(store.import_table(&table), Err(AppError::BadRequest(_))));
        assert_eq!(fs::read_to_string(store.file.path()).unwrap(), before);

        assert_eq!(store.add(AgronomyPatch::default()).unwrap().id, 2);
    }

    #[test]
    fn exhausted_ids_are_an_error_not_a_panic() {
        let (_dir, store) = store();
        fs::write(
            store.file.path(),
            format!(r#"[{{ "id": {}, "farm": "Kisima" }}]"#, u64::MAX),
        )
        .unwrap();

        assert!(matches!(
            store.add(AgronomyPatch::default()),
            Err(AppError::Internal(_))
        ));
        assert!(matches!(
            store.bulk_set(vec![patch(json!({ "farm": "Timau" }))]),
            Err(AppError::Internal(_))
        ));

        let (_fresh_dir, fresh) = self::store();
        fresh
            .bulk_set(vec![patch(json!({ "id": MAX_ID, "farm": "Kisima" }))])
            .unwrap();
        assert!(matches!(
            fresh.add(AgronomyPatch::default()),
            Err(AppError::Internal(_))
        ));
    }
}
