// ********* View request ***********

use std::error::Error;
use std::fmt::Display;
use std::str::FromStr;

use crate::aggregate::{DeltaKind, Reduction, TrendRow};
use crate::funnel::{FunnelReport, DEFAULT_STAGE_ORDER};
use crate::insights::{CoursePerformance, OpportunityRule, Page, SegmentShares};
use crate::period::{Month, Window};
use crate::table::{CountryRow, CourseRow, MetricRow, RawTable, SheetKey};

pub const DEFAULT_RANGE_MONTHS: usize = 12;
pub const DEFAULT_PAGE_SIZE: usize = 50;

// Bounds of the interactive controls.
pub const MONTHS_BACK_BOUNDS: (usize, usize) = (3, 24);
pub const TOP_N_BOUNDS: (usize, usize) = (5, 50);
pub const PAGE_SIZE_BOUNDS: (usize, usize) = (25, 200);

/// The user population the segment-aware metrics are computed for.
///
/// Only `Business` changes the metrics today: active users and activation switch to their
/// business columns when the workbook has them.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum Segment {
    All,
    Business,
    Generic,
    Invalid,
}

impl Segment {
    pub const ALL_SEGMENTS: [Segment; 4] = [
        Segment::All,
        Segment::Business,
        Segment::Generic,
        Segment::Invalid,
    ];

    pub fn name(&self) -> &'static str {
        match self {
            Segment::All => "All",
            Segment::Business => "Business",
            Segment::Generic => "Generic",
            Segment::Invalid => "Invalid",
        }
    }
}

impl Display for Segment {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.name())
    }
}

impl FromStr for Segment {
    type Err = ViewError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Segment::ALL_SEGMENTS
            .iter()
            .find(|seg| seg.name().eq_ignore_ascii_case(s.trim()))
            .cloned()
            .ok_or_else(|| ViewError::UnknownSegment(s.to_string()))
    }
}

/// A saved view: a named set of defaults for the controls.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Preset {
    pub name: &'static str,
    pub months_back: usize,
    pub segment: Segment,
    pub compare: bool,
    pub top_countries: usize,
    pub top_courses: usize,
}

pub static PRESETS: [Preset; 5] = [
    Preset {
        name: "Default",
        months_back: DEFAULT_RANGE_MONTHS,
        segment: Segment::All,
        compare: false,
        top_countries: 10,
        top_courses: 15,
    },
    Preset {
        name: "Executive Summary",
        months_back: 6,
        segment: Segment::All,
        compare: true,
        top_countries: 10,
        top_courses: 10,
    },
    Preset {
        name: "Content Team",
        months_back: 12,
        segment: Segment::All,
        compare: true,
        top_countries: 10,
        top_courses: 25,
    },
    Preset {
        name: "Geo Team",
        months_back: 12,
        segment: Segment::All,
        compare: false,
        top_countries: 25,
        top_courses: 10,
    },
    Preset {
        name: "Business-only",
        months_back: 12,
        segment: Segment::Business,
        compare: true,
        top_countries: 10,
        top_courses: 15,
    },
];

/// Finds a preset by name, ignoring case.
pub fn find_preset(name: &str) -> Result<&'static Preset, ViewError> {
    PRESETS
        .iter()
        .find(|p| p.name.eq_ignore_ascii_case(name.trim()))
        .ok_or_else(|| ViewError::UnknownPreset(name.to_string()))
}

fn bounded(x: usize, bounds: (usize, usize)) -> usize {
    x.clamp(bounds.0, bounds.1)
}

/// Everything a render pass needs to know about the current selection.
///
/// A request is never modified in place: each `with_*` method consumes it and returns the
/// updated request.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct ViewRequest {
    pub preset: String,
    /// The selected range. When absent, the last `months_back` periods are used.
    pub range: Option<(Month, Month)>,
    pub months_back: usize,
    pub compare: bool,
    pub segment: Segment,
    pub top_countries: usize,
    pub top_courses: usize,
    pub course_search: String,
    /// 1-based.
    pub page: usize,
    pub page_size: usize,
}

impl ViewRequest {
    pub fn from_preset(preset: &Preset) -> ViewRequest {
        ViewRequest {
            preset: preset.name.to_string(),
            range: None,
            months_back: preset.months_back,
            compare: preset.compare,
            segment: preset.segment,
            top_countries: preset.top_countries,
            top_courses: preset.top_courses,
            course_search: "".to_string(),
            page: 1,
            page_size: DEFAULT_PAGE_SIZE,
        }
    }

    /// Applies the values of a preset. The range, the search and the paging are kept.
    pub fn with_preset(self, name: &str) -> Result<ViewRequest, ViewError> {
        let p = find_preset(name)?;
        Ok(ViewRequest {
            preset: p.name.to_string(),
            months_back: p.months_back,
            compare: p.compare,
            segment: p.segment,
            top_countries: p.top_countries,
            top_courses: p.top_courses,
            ..self
        })
    }

    pub fn with_range(self, start: Month, end: Month) -> ViewRequest {
        ViewRequest {
            range: Some((start, end)),
            page: 1,
            ..self
        }
    }

    /// Sets the range from two labels such as `Jan 2025`.
    pub fn with_range_labels(self, start: &str, end: &str) -> Result<ViewRequest, ViewError> {
        let s = Month::parse_label(start).ok_or_else(|| ViewError::InvalidMonth(start.to_string()))?;
        let e = Month::parse_label(end).ok_or_else(|| ViewError::InvalidMonth(end.to_string()))?;
        Ok(self.with_range(s, e))
    }

    /// Goes back to the default range of the last `months_back` periods.
    pub fn with_default_range(self) -> ViewRequest {
        ViewRequest {
            range: None,
            ..self
        }
    }

    pub fn with_months_back(self, months_back: usize) -> ViewRequest {
        ViewRequest {
            months_back: bounded(months_back, MONTHS_BACK_BOUNDS),
            ..self
        }
    }

    pub fn with_compare(self, compare: bool) -> ViewRequest {
        ViewRequest { compare, ..self }
    }

    pub fn with_segment(self, segment: Segment) -> ViewRequest {
        ViewRequest { segment, ..self }
    }

    pub fn with_top_countries(self, n: usize) -> ViewRequest {
        ViewRequest {
            top_countries: bounded(n, TOP_N_BOUNDS),
            ..self
        }
    }

    pub fn with_top_courses(self, n: usize) -> ViewRequest {
        ViewRequest {
            top_courses: bounded(n, TOP_N_BOUNDS),
            ..self
        }
    }

    /// A new search always starts on the first page.
    pub fn with_course_search(self, query: &str) -> ViewRequest {
        ViewRequest {
            course_search: query.trim().to_string(),
            page: 1,
            ..self
        }
    }

    pub fn with_page(self, page: usize) -> ViewRequest {
        ViewRequest {
            page: page.max(1),
            ..self
        }
    }

    pub fn with_page_size(self, page_size: usize) -> ViewRequest {
        ViewRequest {
            page_size: bounded(page_size, PAGE_SIZE_BOUNDS),
            page: 1,
            ..self
        }
    }
}

impl Default for ViewRequest {
    fn default() -> Self {
        ViewRequest::from_preset(&PRESETS[0])
    }
}

/// Settings that come from the configuration file rather than from the view.
#[derive(PartialEq, Debug, Clone)]
pub struct DashboardSettings {
    /// The canonical funnel stage order.
    pub stage_order: Vec<String>,
    pub opportunity: OpportunityRule,
}

impl Default for DashboardSettings {
    fn default() -> Self {
        DashboardSettings {
            stage_order: DEFAULT_STAGE_ORDER.iter().map(|s| s.to_string()).collect(),
            opportunity: OpportunityRule::default(),
        }
    }
}

/// Errors in a view request.
#[derive(Eq, PartialEq, Debug, Clone)]
pub enum ViewError {
    InvalidMonth(String),
    UnknownSegment(String),
    UnknownPreset(String),
    /// A month of the selected range has no data in the workbook.
    UnavailableMonth(Month),
    /// The workbook has no time-bearing table, so no time window can be selected.
    NoPeriods,
}

impl Error for ViewError {}

impl Display for ViewError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ViewError::InvalidMonth(s) => write!(f, "invalid month label: {:?}", s),
            ViewError::UnknownSegment(s) => write!(f, "unknown segment: {:?}", s),
            ViewError::UnknownPreset(s) => write!(f, "unknown preset: {:?}", s),
            ViewError::UnavailableMonth(m) => write!(f, "no data for {} in the workbook", m),
            ViewError::NoPeriods => write!(f, "no month/cohort data found to build time filters"),
        }
    }
}

// ******** Output data structures *********

/// How one KPI is computed.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct KpiSpec {
    pub name: String,
    pub source: SheetKey,
    pub column: String,
    pub reduction: Reduction,
    pub delta_kind: DeltaKind,
}

#[derive(PartialEq, Debug, Clone)]
pub struct KpiValue {
    pub name: String,
    /// `Enrollments (in range)`, `MAU (latest)`.
    pub title: String,
    pub column: String,
    pub reduction: Reduction,
    pub current: f64,
    /// Only set in comparison mode, when a previous window exists.
    pub previous: Option<f64>,
    pub delta: Option<String>,
    /// The current value formatted for display: `1,234` or `41.5%`.
    pub display: String,
}

/// Headline numbers of the whole workbook, independent of the selected window.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct WorkbookTotals {
    pub total_enrollments: i64,
    pub total_unique_users: i64,
    pub current_mau: i64,
    pub badges_issued: i64,
}

/// The one-line insights of the summary.
#[derive(Eq, PartialEq, Debug, Clone)]
pub struct Headlines {
    pub top_course: String,
    pub top_country: String,
    pub biggest_risk: String,
    pub opportunity: String,
}

#[derive(PartialEq, Debug, Clone)]
pub struct DashboardReport {
    pub preset: String,
    pub segment: Segment,
    pub periods: Vec<Month>,
    pub window: Window,
    pub comparison: Option<Window>,
    pub totals: WorkbookTotals,
    pub kpis: Vec<KpiValue>,
    pub enrollment_trend: Vec<TrendRow>,
    pub signup_trend: Vec<TrendRow>,
    pub previous_enrollment_trend: Vec<TrendRow>,
    pub previous_signup_trend: Vec<TrendRow>,
    pub funnel: Option<FunnelReport>,
    pub top_countries: Vec<CountryRow>,
    pub top_courses: Vec<CourseRow>,
    /// The most popular courses, lowest completion first.
    pub completion_rates: Vec<CoursePerformance>,
    pub opportunity: Option<CoursePerformance>,
    /// The first rows of the searched course table.
    pub course_quick_view: Vec<CoursePerformance>,
    pub course_table: Option<Page<CoursePerformance>>,
    pub course_dropoff: Option<RawTable>,
    pub segments: Option<SegmentShares>,
    pub engagement: Vec<MetricRow>,
    pub top_engagement: Option<MetricRow>,
    pub badges: Vec<MetricRow>,
    pub headlines: Headlines,
    pub changes: Vec<String>,
}
