//! Typed views over the workbook sheets.
//!
//! The loader hands over [`RawTable`]s (a header row and untyped cells). Each sheet has a
//! [`TableSchema`] that renames legacy column headers and lists the columns the analytics
//! need. Validation happens once, when the [`Dataset`] is assembled; after that the
//! analytics only see typed rows.

use chrono::NaiveDate;
use log::{debug, warn};
use std::collections::HashMap;

use crate::period::Month;

/// A spreadsheet cell, stripped of formatting.
#[derive(PartialEq, Debug, Clone)]
pub enum Cell {
    Number(f64),
    Text(String),
    Date(NaiveDate),
    Empty,
}

impl Cell {
    /// Numeric coercion. Text that does not parse as a number is treated as missing.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Cell::Number(f) if f.is_finite() => Some(*f),
            Cell::Text(s) => s.trim().parse::<f64>().ok().filter(|f| f.is_finite()),
            _ => None,
        }
    }

    pub fn as_text(&self) -> String {
        match self {
            Cell::Number(f) => format!("{}", f),
            Cell::Text(s) => s.clone(),
            Cell::Date(d) => d.to_string(),
            Cell::Empty => "".to_string(),
        }
    }

    pub fn as_month(&self) -> Option<Month> {
        match self {
            Cell::Text(s) => Month::parse_label(s),
            Cell::Date(d) => Some(Month::from_date(*d)),
            _ => None,
        }
    }
}

/// A sheet as read from the workbook: the first row is the header.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct RawTable {
    pub header: Vec<String>,
    pub rows: Vec<Vec<Cell>>,
}

impl RawTable {
    pub fn new(header: &[&str], rows: Vec<Vec<Cell>>) -> RawTable {
        RawTable {
            header: header.iter().map(|s| s.to_string()).collect(),
            rows,
        }
    }

    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|h| h.trim() == name)
    }

    fn cell(&self, row: &[Cell], col: usize) -> Cell {
        row.get(col).cloned().unwrap_or(Cell::Empty)
    }
}

/// The sheets of the statistics workbook.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub enum SheetKey {
    MonthlyEnroll,
    MonthlyUnique,
    Country,
    Course,
    Completion,
    Mau,
    Activation,
    DropOffSplit,
    CourseDropOff,
    UserEngagement,
    BadgesIssued,
    UserSegmentation,
}

impl SheetKey {
    pub const ALL: [SheetKey; 12] = [
        SheetKey::MonthlyEnroll,
        SheetKey::MonthlyUnique,
        SheetKey::Country,
        SheetKey::Course,
        SheetKey::Completion,
        SheetKey::Mau,
        SheetKey::Activation,
        SheetKey::DropOffSplit,
        SheetKey::CourseDropOff,
        SheetKey::UserEngagement,
        SheetKey::BadgesIssued,
        SheetKey::UserSegmentation,
    ];

    /// The identifier used in configuration files.
    pub fn key(&self) -> &'static str {
        match self {
            SheetKey::MonthlyEnroll => "Monthly_Enroll",
            SheetKey::MonthlyUnique => "Monthly_Unique",
            SheetKey::Country => "Country",
            SheetKey::Course => "Course",
            SheetKey::Completion => "Completion",
            SheetKey::Mau => "MAU",
            SheetKey::Activation => "Activation",
            SheetKey::DropOffSplit => "DropOff_Split",
            SheetKey::CourseDropOff => "Course_DropOff",
            SheetKey::UserEngagement => "User_Engagement",
            SheetKey::BadgesIssued => "Badges_Issued",
            SheetKey::UserSegmentation => "User_Segmentation",
        }
    }

    pub fn from_key(key: &str) -> Option<SheetKey> {
        SheetKey::ALL.iter().find(|k| k.key() == key).cloned()
    }

    pub fn default_sheet_name(&self) -> &'static str {
        match self {
            SheetKey::MonthlyEnroll => "Monthly Enrollments",
            SheetKey::MonthlyUnique => "Monthly User Sign-Ups",
            SheetKey::Country => "Country Breakdown",
            SheetKey::Course => "Course Sign-Up Sheet",
            SheetKey::Completion => "Completion Percentage",
            SheetKey::Mau => "MAU",
            SheetKey::Activation => "Activation Rate (D30)",
            SheetKey::DropOffSplit => "Drop-off Stage Split",
            SheetKey::CourseDropOff => "Course Drop-off (All)",
            SheetKey::UserEngagement => "User and Course Engagement",
            SheetKey::BadgesIssued => "Badges Issued",
            SheetKey::UserSegmentation => "User Segmentation",
        }
    }

    pub fn schema(&self) -> TableSchema {
        match self {
            SheetKey::MonthlyEnroll => TableSchema {
                renames: &[("Number of enrollments", ENROLLMENTS)],
                required: &[MONTH, ENROLLMENTS],
            },
            SheetKey::MonthlyUnique => TableSchema {
                renames: &[("Number of Sign Ups", UNIQUE_SIGNUPS)],
                required: &[MONTH, UNIQUE_SIGNUPS],
            },
            SheetKey::Mau => TableSchema {
                renames: &[],
                required: &[MONTH, MAU],
            },
            SheetKey::Activation => TableSchema {
                renames: &[],
                required: &[COHORT, ALL_ACTIVATION],
            },
            SheetKey::Country => TableSchema {
                renames: &[],
                required: &[COUNTRY, COUNTRY_SIGNUPS],
            },
            SheetKey::Course => TableSchema {
                renames: &[("Course Name", COURSE), ("Course Sign-Ups", SIGN_UPS)],
                required: &[COURSE, SIGN_UPS],
            },
            SheetKey::Completion => TableSchema {
                renames: &[("Avg %", AVG_COMPLETION)],
                required: &[COURSE],
            },
            SheetKey::DropOffSplit => TableSchema {
                renames: &[],
                required: &[STAGE, ALL_COUNT],
            },
            // Shown as is: no column is interpreted.
            SheetKey::CourseDropOff => TableSchema {
                renames: &[],
                required: &[],
            },
            SheetKey::UserEngagement | SheetKey::UserSegmentation => TableSchema {
                renames: &[],
                required: &[METRIC, COUNT],
            },
            // Older workbooks have no header names for the badge sheet: the first two
            // columns are used instead.
            SheetKey::BadgesIssued => TableSchema {
                renames: &[],
                required: &[],
            },
        }
    }
}

pub const MONTH: &str = "Month";
pub const COHORT: &str = "Cohort";
pub const ENROLLMENTS: &str = "Enrollments";
pub const UNIQUE_SIGNUPS: &str = "Unique User Signups";
pub const MAU: &str = "MAU";
pub const BUSINESS_MAU: &str = "Business MAU";
pub const ALL_ACTIVATION: &str = "All Activation Rate %";
pub const BUSINESS_ACTIVATION: &str = "Business Activation Rate %";
pub const COUNTRY: &str = "Country";
pub const COUNTRY_SIGNUPS: &str = "Total Course Signups";
pub const COURSE: &str = "Course";
pub const SIGN_UPS: &str = "Sign Ups";
pub const AVG_COMPLETION: &str = "Avg Completion %";
pub const STAGE: &str = "Stage";
pub const ALL_COUNT: &str = "All Count";
pub const METRIC: &str = "Metric";
pub const COUNT: &str = "Count";

pub const SHORTNAME_MAX_LEN: usize = 35;

/// Column renames and required columns for one sheet.
#[derive(Eq, PartialEq, Debug, Clone, Copy)]
pub struct TableSchema {
    pub renames: &'static [(&'static str, &'static str)],
    pub required: &'static [&'static str],
}

impl TableSchema {
    /// Applies the renames and checks the required columns.
    /// Returns the names of the missing columns on failure.
    pub fn validate(&self, raw: RawTable) -> Result<RawTable, Vec<String>> {
        let mut table = raw;
        for h in table.header.iter_mut() {
            if let Some((_, to)) = self.renames.iter().find(|(from, _)| h.trim() == *from) {
                *h = to.to_string();
            }
        }
        let missing: Vec<String> = self
            .required
            .iter()
            .filter(|c| table.column(c).is_none())
            .map(|c| c.to_string())
            .collect();
        if missing.is_empty() {
            Ok(table)
        } else {
            Err(missing)
        }
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct MonthlyRow {
    /// The label as written in the sheet (`Jan 2025`).
    pub label: String,
    pub period: Option<Month>,
    pub values: Vec<Option<f64>>,
}

/// A time series table: one row per month, several numeric columns.
#[derive(PartialEq, Debug, Clone)]
pub struct MonthlyTable {
    pub period_column: String,
    pub columns: Vec<String>,
    pub rows: Vec<MonthlyRow>,
}

impl MonthlyTable {
    pub fn from_raw(raw: &RawTable, period_column: &str) -> Option<MonthlyTable> {
        let p_idx = raw.column(period_column)?;
        let value_cols: Vec<(usize, String)> = raw
            .header
            .iter()
            .enumerate()
            .filter(|(idx, h)| *idx != p_idx && !h.trim().is_empty())
            .map(|(idx, h)| (idx, h.trim().to_string()))
            .collect();
        let rows = raw
            .rows
            .iter()
            .map(|row| {
                let pcell = raw.cell(row, p_idx);
                let period = pcell.as_month();
                let label = match (&pcell, period) {
                    (Cell::Date(_), Some(m)) => m.label(),
                    _ => pcell.as_text(),
                };
                MonthlyRow {
                    label,
                    period,
                    values: value_cols
                        .iter()
                        .map(|(idx, _)| raw.cell(row, *idx).as_number())
                        .collect(),
                }
            })
            .collect();
        Some(MonthlyTable {
            period_column: period_column.to_string(),
            columns: value_cols.into_iter().map(|(_, h)| h).collect(),
            rows,
        })
    }

    pub fn column_index(&self, name: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == name)
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.column_index(name).is_some()
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct CountryRow {
    pub country: String,
    pub signups: f64,
}

#[derive(PartialEq, Debug, Clone)]
pub struct CourseRow {
    pub course: String,
    pub short_name: String,
    pub sign_ups: f64,
}

#[derive(PartialEq, Debug, Clone)]
pub struct CompletionRow {
    pub course: String,
    pub avg_completion: f64,
}

/// A raw funnel stage. The count is `None` when the cell was not numeric.
#[derive(PartialEq, Debug, Clone)]
pub struct StageCount {
    pub stage: String,
    pub count: Option<f64>,
}

/// A `(Metric, Count)` row, the layout of the summary sheets.
#[derive(PartialEq, Debug, Clone)]
pub struct MetricRow {
    pub metric: String,
    pub count: f64,
}

/// Truncates long course names for chart labels.
pub fn short_name(course: &str) -> String {
    if course.chars().count() <= SHORTNAME_MAX_LEN {
        course.to_string()
    } else {
        let s: String = course.chars().take(SHORTNAME_MAX_LEN).collect();
        format!("{}...", s)
    }
}

/// All the typed tables of one workbook load. Absent sheets are `None`.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct Dataset {
    pub monthly_enroll: Option<MonthlyTable>,
    pub monthly_unique: Option<MonthlyTable>,
    pub mau: Option<MonthlyTable>,
    pub activation: Option<MonthlyTable>,
    pub countries: Option<Vec<CountryRow>>,
    pub courses: Option<Vec<CourseRow>>,
    pub completion: Option<Vec<CompletionRow>>,
    pub funnel_stages: Option<Vec<StageCount>>,
    pub engagement: Option<Vec<MetricRow>>,
    pub badges: Option<Vec<MetricRow>>,
    pub segmentation: Option<Vec<MetricRow>>,
    /// The per-course drop-off sheet, untyped.
    pub course_dropoff: Option<RawTable>,
}

/// The result of assembling a dataset: the tables and the problems found along the way.
#[derive(PartialEq, Debug, Clone, Default)]
pub struct DatasetLoad {
    pub dataset: Dataset,
    pub missing_sheets: Vec<SheetKey>,
    pub schema_problems: Vec<(SheetKey, Vec<String>)>,
}

impl Dataset {
    /// The time series table stored under `key`, if `key` is a time-bearing sheet.
    pub fn monthly(&self, key: SheetKey) -> Option<&MonthlyTable> {
        match key {
            SheetKey::MonthlyEnroll => self.monthly_enroll.as_ref(),
            SheetKey::MonthlyUnique => self.monthly_unique.as_ref(),
            SheetKey::Mau => self.mau.as_ref(),
            SheetKey::Activation => self.activation.as_ref(),
            _ => None,
        }
    }

    /// Validates every sheet against its schema and builds the typed tables.
    /// Empty sheets count as missing.
    pub fn from_raw_tables(mut raw: HashMap<SheetKey, RawTable>) -> DatasetLoad {
        let mut load = DatasetLoad::default();
        for key in SheetKey::ALL {
            let table = match raw.remove(&key) {
                Some(t) if !t.rows.is_empty() => t,
                _ => {
                    load.missing_sheets.push(key);
                    continue;
                }
            };
            let table = match key.schema().validate(table) {
                Ok(t) => t,
                Err(missing) => {
                    warn!(
                        "Dataset: sheet {} is missing columns {:?}, ignoring it",
                        key.key(),
                        missing
                    );
                    load.schema_problems.push((key, missing));
                    continue;
                }
            };
            debug!(
                "Dataset: sheet {} has {} rows, header {:?}",
                key.key(),
                table.rows.len(),
                table.header
            );
            load.dataset.attach(key, &table);
        }
        load
    }

    fn attach(&mut self, key: SheetKey, t: &RawTable) {
        match key {
            SheetKey::MonthlyEnroll => self.monthly_enroll = MonthlyTable::from_raw(t, MONTH),
            SheetKey::MonthlyUnique => self.monthly_unique = MonthlyTable::from_raw(t, MONTH),
            SheetKey::Mau => self.mau = MonthlyTable::from_raw(t, MONTH),
            SheetKey::Activation => self.activation = MonthlyTable::from_raw(t, COHORT),
            SheetKey::Country => {
                let rows = pairs(t, COUNTRY, COUNTRY_SIGNUPS, 0, 1)
                    .into_iter()
                    .map(|(country, v)| CountryRow {
                        country,
                        signups: v.unwrap_or(0.0),
                    })
                    .collect();
                self.countries = Some(rows);
            }
            SheetKey::Course => {
                let rows = pairs(t, COURSE, SIGN_UPS, 0, 1)
                    .into_iter()
                    .map(|(course, v)| CourseRow {
                        short_name: short_name(&course),
                        course,
                        sign_ups: v.unwrap_or(0.0),
                    })
                    .collect();
                self.courses = Some(rows);
            }
            SheetKey::Completion => {
                let rows = pairs(t, COURSE, AVG_COMPLETION, 0, usize::MAX)
                    .into_iter()
                    .map(|(course, v)| CompletionRow {
                        course,
                        avg_completion: v.unwrap_or(0.0),
                    })
                    .collect();
                self.completion = Some(rows);
            }
            SheetKey::DropOffSplit => {
                let rows = pairs(t, STAGE, ALL_COUNT, 0, 1)
                    .into_iter()
                    .map(|(stage, count)| StageCount { stage, count })
                    .collect();
                self.funnel_stages = Some(rows);
            }
            SheetKey::CourseDropOff => self.course_dropoff = Some(t.clone()),
            SheetKey::UserEngagement => self.engagement = Some(metric_rows(t)),
            SheetKey::BadgesIssued => self.badges = Some(metric_rows(t)),
            SheetKey::UserSegmentation => self.segmentation = Some(metric_rows(t)),
        }
    }
}

// Reads a (name, number) pair of columns. When a column is missing from the header the
// given positional fallback is used instead (usize::MAX yields empty cells).
fn pairs(
    t: &RawTable,
    name_col: &str,
    value_col: &str,
    name_fallback: usize,
    value_fallback: usize,
) -> Vec<(String, Option<f64>)> {
    let n_idx = t.column(name_col).unwrap_or(name_fallback);
    let v_idx = t.column(value_col).unwrap_or(value_fallback);
    t.rows
        .iter()
        .map(|row| (t.cell(row, n_idx).as_text(), t.cell(row, v_idx).as_number()))
        .collect()
}

fn metric_rows(t: &RawTable) -> Vec<MetricRow> {
    pairs(t, METRIC, COUNT, 0, 1)
        .into_iter()
        .map(|(metric, count)| MetricRow {
            metric,
            count: count.unwrap_or(0.0),
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn text(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    #[test]
    fn numeric_coercion() {
        assert_eq!(Cell::Number(3.0).as_number(), Some(3.0));
        assert_eq!(text(" 12.5 ").as_number(), Some(12.5));
        assert_eq!(text("n/a").as_number(), None);
        assert_eq!(Cell::Empty.as_number(), None);
        assert_eq!(Cell::Number(f64::NAN).as_number(), None);
    }

    #[test]
    fn schema_renames_legacy_headers() {
        let raw = RawTable::new(
            &["Month", "Number of enrollments"],
            vec![vec![text("Jan 2025"), Cell::Number(10.0)]],
        );
        let t = SheetKey::MonthlyEnroll.schema().validate(raw).unwrap();
        assert_eq!(t.header, vec!["Month", "Enrollments"]);
    }

    #[test]
    fn schema_reports_missing_columns() {
        let raw = RawTable::new(&["Stage", "Users"], vec![vec![text("Enrolled")]]);
        let err = SheetKey::DropOffSplit.schema().validate(raw).unwrap_err();
        assert_eq!(err, vec!["All Count".to_string()]);
    }

    #[test]
    fn monthly_table_from_raw() {
        let raw = RawTable::new(
            &["Month", "MAU", "Business MAU"],
            vec![
                vec![text("Jan 2025"), Cell::Number(10.0), text("x")],
                vec![
                    Cell::Date(NaiveDate::from_ymd_opt(2025, 2, 1).unwrap()),
                    Cell::Number(12.0),
                ],
            ],
        );
        let t = MonthlyTable::from_raw(&raw, MONTH).unwrap();
        assert_eq!(t.columns, vec!["MAU", "Business MAU"]);
        assert_eq!(t.rows[0].values, vec![Some(10.0), None]);
        assert_eq!(t.rows[1].period, Month::new(2025, 2));
        assert_eq!(t.rows[1].label, "Feb 2025");
        assert_eq!(t.rows[1].values, vec![Some(12.0), None]);
    }

    #[test]
    fn dataset_assembly() {
        let mut raw: HashMap<SheetKey, RawTable> = HashMap::new();
        raw.insert(
            SheetKey::Course,
            RawTable::new(
                &["Course Name", "Course Sign-Ups"],
                vec![vec![
                    text("An introduction to endpoint management at enterprise scale"),
                    Cell::Number(40.0),
                ]],
            ),
        );
        raw.insert(
            SheetKey::Country,
            RawTable::new(&["Country", "Users"], vec![vec![text("India")]]),
        );
        raw.insert(SheetKey::Mau, RawTable::new(&["Month", "MAU"], vec![]));
        let load = Dataset::from_raw_tables(raw);
        let courses = load.dataset.courses.unwrap();
        assert_eq!(courses[0].sign_ups, 40.0);
        assert_eq!(courses[0].short_name, "An introduction to endpoint managem...");
        assert!(load.dataset.countries.is_none());
        assert!(load.missing_sheets.contains(&SheetKey::Mau));
        assert_eq!(
            load.schema_problems,
            vec![(SheetKey::Country, vec!["Total Course Signups".to_string()])]
        );
    }

    #[test]
    fn badges_without_header_names() {
        let raw = RawTable::new(
            &["Badge metric", "Value"],
            vec![vec![text("Total Sent"), Cell::Number(77.0)]],
        );
        let mut tables = HashMap::new();
        tables.insert(SheetKey::BadgesIssued, raw);
        let load = Dataset::from_raw_tables(tables);
        assert_eq!(
            load.dataset.badges,
            Some(vec![MetricRow {
                metric: "Total Sent".to_string(),
                count: 77.0
            }])
        );
    }

    #[test]
    fn course_dropoff_is_kept_as_read() {
        let raw = RawTable::new(
            &["Course", "Enrolled", "Completed", ""],
            vec![vec![text("Intro"), Cell::Number(30.0), Cell::Empty, text("note")]],
        );
        let load = Dataset::from_raw_tables(HashMap::from([(SheetKey::CourseDropOff, raw.clone())]));
        assert_eq!(load.dataset.course_dropoff, Some(raw));
        assert!(!load.missing_sheets.contains(&SheetKey::CourseDropOff));
        assert_eq!(SheetKey::from_key("Course_DropOff"), Some(SheetKey::CourseDropOff));
        assert_eq!(SheetKey::CourseDropOff.default_sheet_name(), "Course Drop-off (All)");
    }
}
