//! Farm inspection reports
//!
//! Scouts file one report per bed and week range with the pest and disease they found and how
//! severe each was. Reports are append-only.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Datelike, Utc};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::Value;

use crate::agronomy::lenient_text;
use crate::error::{AppError, AppResult};
use crate::saving::{JsonFile, next_id};

/// One stored inspection report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct FarmReport {
    pub id: u64,
    #[serde(deserialize_with = "stored_year")]
    pub year: i32,
    pub week_range: String,
    pub farm: String,
    pub greenhouse: String,
    pub bed: String,
    pub crop: String,
    pub variety: String,
    pub pest: String,
    #[serde(deserialize_with = "stored_rate")]
    pub pest_rate: f64,
    pub disease: String,
    #[serde(deserialize_with = "stored_rate")]
    pub disease_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub created_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reported_by: Option<String>,
}

impl FarmReport {
    /// The parsed week range of this report
    pub fn weeks(&self) -> Option<(i64, i64)> {
        parse_week_range(&self.week_range)
    }

    fn text(&self, name: &str) -> &str {
        match name {
            "farm" => &self.farm,
            "greenhouse" => &self.greenhouse,
            "bed" => &self.bed,
            "crop" => &self.crop,
            "variety" => &self.variety,
            "pest" => &self.pest,
            "disease" => &self.disease,
            _ => "",
        }
    }
}

lazy_static! {
    static ref WEEK_RANGE_REGEX: Regex = Regex::new(r"^(\d+)\s*-\s*(\d+)$").unwrap();
}

/// Parse a week range such as `"6-8"` into inclusive bounds
///
/// A string that does not split into two integers on `-` is read as a single week, so `"4"`
/// gives `(4, 4)`. Anything else is `None`.
pub fn parse_week_range(raw: &str) -> Option<(i64, i64)> {
    let raw = raw.trim();
    if let Some(caps) = WEEK_RANGE_REGEX.captures(raw) {
        if let (Ok(start), Ok(end)) = (caps[1].parse(), caps[2].parse()) {
            return Some((start, end));
        }
    }
    raw.parse().ok().map(|week| (week, week))
}

/// Incoming report fields
///
/// Rates and year may arrive as numbers or as text.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewFarmReport {
    #[serde(default)]
    pub year: Option<Value>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub week_range: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub farm: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub greenhouse: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub bed: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub crop: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub variety: Option<String>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub pest: Option<String>,
    #[serde(default)]
    pub pest_rate: Option<Value>,
    #[serde(default, deserialize_with = "lenient_text")]
    pub disease: Option<String>,
    #[serde(default)]
    pub disease_rate: Option<Value>,
}

/// A number from JSON, or text holding one; 0 for anything else
pub fn coerce_rate(value: Option<&Value>) -> f64 {
    let rate = match value {
        Some(Value::Number(n)) => n.as_f64(),
        Some(Value::String(s)) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    rate.filter(|r| r.is_finite()).unwrap_or(0.0)
}

fn coerce_year(value: Option<&Value>) -> Option<i32> {
    match value {
        Some(Value::Number(n)) => n.as_i64().and_then(|y| i32::try_from(y).ok()),
        Some(Value::String(s)) => s.trim().parse().ok(),
        _ => None,
    }
}

fn stored_rate<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_rate(Some(&value)))
}

fn stored_year<'de, D>(deserializer: D) -> Result<i32, D::Error>
where
    D: Deserializer<'de>,
{
    let value = Value::deserialize(deserializer)?;
    Ok(coerce_year(Some(&value)).unwrap_or_default())
}

/// Query parameters for search, chart and export
///
/// Values arrive as text; blank values are ignored.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FarmReportFilter {
    pub year: Option<String>,
    pub farm: Option<String>,
    pub greenhouse: Option<String>,
    pub bed: Option<String>,
    pub crop: Option<String>,
    pub variety: Option<String>,
    pub pest: Option<String>,
    pub disease: Option<String>,
    pub pest_rate_min: Option<String>,
    pub pest_rate_max: Option<String>,
    pub disease_rate_min: Option<String>,
    pub disease_rate_max: Option<String>,
    pub week_from: Option<String>,
    pub week_to: Option<String>,
}

/// A filter with its numeric bounds parsed
struct Criteria<'a> {
    year: Option<i32>,
    exact: Vec<(&'static str, &'a str)>,
    pest_rate: (Option<f64>, Option<f64>),
    disease_rate: (Option<f64>, Option<f64>),
    weeks: Option<(Option<i64>, Option<i64>)>,
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn parse_bound<T: std::str::FromStr>(value: &Option<String>, name: &str) -> AppResult<Option<T>> {
    non_blank(value)
        .map(|raw| {
            raw.parse()
                .map_err(|_| AppError::bad_request(format!("{} must be a number", name)))
        })
        .transpose()
}

/// A rate bound; `NaN` and infinities are not numbers here
fn parse_rate_bound(value: &Option<String>, name: &str) -> AppResult<Option<f64>> {
    match parse_bound::<f64>(value, name)? {
        Some(rate) if !rate.is_finite() => {
            Err(AppError::bad_request(format!("{} must be a number", name)))
        }
        rate => Ok(rate),
    }
}

impl FarmReportFilter {
    fn criteria(&self) -> AppResult<Criteria<'_>> {
        let text_fields = [
            ("farm", &self.farm),
            ("greenhouse", &self.greenhouse),
            ("bed", &self.bed),
            ("crop", &self.crop),
            ("variety", &self.variety),
            ("pest", &self.pest),
            ("disease", &self.disease),
        ];
        let exact = text_fields
            .into_iter()
            .filter_map(|(name, wanted)| non_blank(wanted).map(|wanted| (name, wanted)))
            .collect();

        let week_from = parse_bound(&self.week_from, "weekFrom")?;
        let week_to = parse_bound(&self.week_to, "weekTo")?;
        let weeks = (week_from.is_some() || week_to.is_some()).then_some((week_from, week_to));

        Ok(Criteria {
            year: parse_bound(&self.year, "year")?,
            exact,
            pest_rate: (
                parse_rate_bound(&self.pest_rate_min, "pestRateMin")?,
                parse_rate_bound(&self.pest_rate_max, "pestRateMax")?,
            ),
            disease_rate: (
                parse_rate_bound(&self.disease_rate_min, "diseaseRateMin")?,
                parse_rate_bound(&self.disease_rate_max, "diseaseRateMax")?,
            ),
            weeks,
        })
    }
}

fn within(value: f64, (min, max): (Option<f64>, Option<f64>)) -> bool {
    min.is_none_or(|min| value >= min) && max.is_none_or(|max| value <= max)
}

impl Criteria<'_> {
    fn matches(&self, report: &FarmReport) -> bool {
        if self.year.is_some_and(|year| year != report.year) {
            return false;
        }
        if !self
            .exact
            .iter()
            .all(|(name, wanted)| report.text(name).trim() == *wanted)
        {
            return false;
        }
        if !within(report.pest_rate, self.pest_rate)
            || !within(report.disease_rate, self.disease_rate)
        {
            return false;
        }
        match self.weeks {
            None => true,
            Some((from, to)) => match report.weeks() {
                Some((start, end)) => {
                    to.is_none_or(|to| start <= to) && from.is_none_or(|from| end >= from)
                }
                None => false,
            },
        }
    }
}

/// Newest first; rows without a timestamp come after all stamped rows, then by id descending
fn sort_newest_first(reports: &mut [FarmReport]) {
    reports.sort_by(|a, b| (b.created_at, b.id).cmp(&(a.created_at, a.id)));
}

/// Ascending week start; unparsable ranges last, then by id
fn sort_by_week(reports: &mut [FarmReport]) {
    reports.sort_by_key(|report| {
        let start = report.weeks().map(|(start, _)| start);
        (start.is_none(), start.unwrap_or_default(), report.id)
    });
}

/// Inspection reports persisted in one JSON file
pub struct FarmReportStore {
    file: JsonFile<FarmReport>,
    lock: Mutex<()>,
}

impl FarmReportStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            file: JsonFile::new(path),
            lock: Mutex::new(()),
        }
    }

    /// Every report, newest first
    pub fn list(&self) -> AppResult<Vec<FarmReport>> {
        self.search(&FarmReportFilter::default())
    }

    /// Append a report
    ///
    /// # Errors
    /// * `BadRequest` if week range, farm or greenhouse is missing; nothing is written
    pub fn append(&self, fields: NewFarmReport, reported_by: Option<&str>) -> AppResult<FarmReport> {
        let (Some(week_range), Some(farm), Some(greenhouse)) = (
            non_blank(&fields.week_range),
            non_blank(&fields.farm),
            non_blank(&fields.greenhouse),
        ) else {
            return Err(AppError::bad_request(
                "weekRange, farm and greenhouse are required",
            ));
        };

        let now = Utc::now();
        let text = |value: &Option<String>| value.as_deref().unwrap_or_default().trim().to_string();

        let _guard = self.lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut reports = self.file.read()?;

        let report = FarmReport {
            id: next_id(reports.iter().map(|r| r.id))?,
            year: coerce_year(fields.year.as_ref()).unwrap_or_else(|| now.year()),
            week_range: week_range.to_string(),
            farm: farm.to_string(),
            greenhouse: greenhouse.to_string(),
            bed: text(&fields.bed),
            crop: text(&fields.crop),
            variety: text(&fields.variety),
            pest: text(&fields.pest),
            pest_rate: coerce_rate(fields.pest_rate.as_ref()),
            disease: text(&fields.disease),
            disease_rate: coerce_rate(fields.disease_rate.as_ref()),
            created_at: Some(now),
            reported_by: reported_by.map(str::to_string),
        };
        reports.push(report.clone());
        self.file.write(&reports)?;

        log::info!(
            "Farm report {} filed for {}/{} weeks {}",
            report.id,
            report.farm,
            report.greenhouse,
            report.week_range
        );
        Ok(report)
    }

    /// Reports matching `filter`, newest first
    pub fn search(&self, filter: &FarmReportFilter) -> AppResult<Vec<FarmReport>> {
        let mut reports = self.filtered(filter)?;
        sort_newest_first(&mut reports);
        Ok(reports)
    }

    /// Reports matching `filter` ordered by week, for trend charts
    pub fn chart_series(&self, filter: &FarmReportFilter) -> AppResult<Vec<FarmReport>> {
        let mut reports = self.filtered(filter)?;
        sort_by_week(&mut reports);
        Ok(reports)
    }

    fn filtered(&self, filter: &FarmReportFilter) -> AppResult<Vec<FarmReport>> {
        let criteria = filter.criteria()?;
        let reports = self.file.read()?;
        Ok(reports
            .into_iter()
            .filter(|report| criteria.matches(report))
            .collect())
    }
}
