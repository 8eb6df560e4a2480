use log::debug;
use std::cmp::Ordering;

use crate::aggregate::metric_value;
use crate::table::{CompletionRow, CourseRow, MetricRow};

/// The `n` rows with the largest `metric`, largest first.
///
/// The sort is stable: rows with equal values keep their input order.
pub fn top_by_metric<T: Clone, F: Fn(&T) -> f64>(rows: &[T], metric: F, n: usize) -> Vec<T> {
    let mut sorted: Vec<T> = rows.to_vec();
    sorted.sort_by(|a, b| metric(b).total_cmp(&metric(a)));
    sorted.truncate(n);
    sorted
}

/// Quantile with linear interpolation between the closest ranks.
/// Returns `None` for an empty input or a fraction outside `[0, 1]`.
pub fn quantile(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() || !(0.0..=1.0).contains(&q) {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let pos = q * (sorted.len() - 1) as f64;
    let lo = pos.floor() as usize;
    let hi = pos.ceil() as usize;
    Some(sorted[lo] + (sorted[hi] - sorted[lo]) * (pos - lo as f64))
}

/// Thresholds used to pick the completion opportunity.
#[derive(PartialEq, Debug, Clone, Copy)]
pub struct OpportunityRule {
    /// Courses with at least this quantile of sign-ups are candidates.
    pub quantile: f64,
    /// Below this number of courses, the median is used instead of the quantile.
    pub min_rows_for_quantile: usize,
}

impl OpportunityRule {
    pub const DEFAULT_RULE: OpportunityRule = OpportunityRule {
        quantile: 0.8,
        min_rows_for_quantile: 10,
    };

    pub fn cutoff(&self, sign_ups: &[f64]) -> Option<f64> {
        if sign_ups.len() >= self.min_rows_for_quantile {
            quantile(sign_ups, self.quantile)
        } else {
            quantile(sign_ups, 0.5)
        }
    }
}

impl Default for OpportunityRule {
    fn default() -> Self {
        OpportunityRule::DEFAULT_RULE
    }
}

/// A course with its sign-ups and its average completion.
#[derive(PartialEq, Debug, Clone)]
pub struct CoursePerformance {
    pub course: String,
    pub short_name: String,
    pub sign_ups: f64,
    pub avg_completion: f64,
}

/// Joins the course sign-ups with the completion rates, on the course name.
///
/// Every course is kept. A course without completion data has a completion of 0. A course
/// listed several times in the completion table yields one row per listing.
pub fn course_performance(
    courses: Option<&[CourseRow]>,
    completion: Option<&[CompletionRow]>,
) -> Option<Vec<CoursePerformance>> {
    let courses = courses?;
    let completion = completion?;
    let res: Vec<CoursePerformance> = courses
        .iter()
        .flat_map(|c| {
            let matches: Vec<f64> = completion
                .iter()
                .filter(|r| r.course == c.course)
                .map(|r| r.avg_completion)
                .collect();
            let rates = if matches.is_empty() { vec![0.0] } else { matches };
            rates.into_iter().map(move |avg_completion| CoursePerformance {
                course: c.course.clone(),
                short_name: c.short_name.clone(),
                sign_ups: c.sign_ups,
                avg_completion,
            })
        })
        .collect();
    debug!("course_performance: {} rows", res.len());
    Some(res)
}

/// The popular course with the weakest completion.
///
/// Only the courses with sign-ups at or above the cutoff of `rule` are considered. Among
/// them, the lowest completion wins, then the highest sign-ups, then the input order.
pub fn completion_opportunity(
    rows: &[CoursePerformance],
    rule: &OpportunityRule,
) -> Option<CoursePerformance> {
    let sign_ups: Vec<f64> = rows.iter().map(|r| r.sign_ups).collect();
    let cutoff = rule.cutoff(&sign_ups)?;
    debug!(
        "completion_opportunity: cutoff {} over {} courses",
        cutoff,
        rows.len()
    );
    rows.iter()
        .filter(|r| r.sign_ups >= cutoff)
        .min_by(|a, b| match a.avg_completion.total_cmp(&b.avg_completion) {
            Ordering::Equal => b.sign_ups.total_cmp(&a.sign_ups),
            o => o,
        })
        .cloned()
}

/// Case-insensitive substring search on the course name, most popular first.
/// A blank query keeps every row.
pub fn search_courses(rows: &[CoursePerformance], query: &str) -> Vec<CoursePerformance> {
    let q = query.trim().to_lowercase();
    let found: Vec<CoursePerformance> = rows
        .iter()
        .filter(|r| q.is_empty() || r.course.to_lowercase().contains(&q))
        .cloned()
        .collect();
    top_by_metric(&found, |r| r.sign_ups, found.len())
}

/// One page of a table.
#[derive(PartialEq, Debug, Clone)]
pub struct Page<T> {
    pub rows: Vec<T>,
    /// 1-based, after clamping.
    pub page: usize,
    pub page_size: usize,
    pub total_pages: usize,
    pub total_rows: usize,
}

impl<T> Page<T> {
    /// 1-based index of the first row shown, 0 when the page is empty.
    pub fn first_row(&self) -> usize {
        if self.rows.is_empty() {
            0
        } else {
            (self.page - 1) * self.page_size + 1
        }
    }

    /// 1-based index of the last row shown, 0 when the page is empty.
    pub fn last_row(&self) -> usize {
        if self.rows.is_empty() {
            0
        } else {
            self.first_row() + self.rows.len() - 1
        }
    }
}

/// Cuts `rows` into pages of `page_size` rows and returns page `page` (1-based).
/// The page number is clamped to the existing pages. There is always at least one page.
pub fn paginate<T: Clone>(rows: &[T], page: usize, page_size: usize) -> Page<T> {
    let page_size = page_size.max(1);
    let total_rows = rows.len();
    let total_pages = ((total_rows + page_size - 1) / page_size).max(1);
    let page = page.clamp(1, total_pages);
    let start = (page - 1) * page_size;
    let end = (start + page_size).min(total_rows);
    Page {
        rows: rows[start.min(end)..end].to_vec(),
        page,
        page_size,
        total_pages,
        total_rows,
    }
}

pub const BUSINESS_USERS: &str = "Business Users";
pub const GENERIC_USERS: &str = "Generic Users";
pub const INVALID_USERS: &str = "Invalid Users";

/// User counts by email type, with their shares of the total in percent.
#[derive(PartialEq, Debug, Clone)]
pub struct SegmentShares {
    pub business: i64,
    pub generic: i64,
    pub invalid: i64,
    pub business_pct: f64,
    pub generic_pct: f64,
    pub invalid_pct: f64,
}

impl SegmentShares {
    pub fn total(&self) -> i64 {
        self.business + self.generic + self.invalid
    }

    pub fn caption(&self) -> String {
        format!(
            "Business share: {:.1}% • Generic: {:.1}% • Invalid: {:.1}%",
            self.business_pct, self.generic_pct, self.invalid_pct
        )
    }
}

/// Returns `None` when the table is absent or all three counts are zero.
pub fn segment_shares(segmentation: Option<&[MetricRow]>) -> Option<SegmentShares> {
    let segmentation = segmentation?;
    let count = |name: &str| metric_value(Some(segmentation), name);
    let (business, generic, invalid) = (
        count(BUSINESS_USERS),
        count(GENERIC_USERS),
        count(INVALID_USERS),
    );
    let total = business + generic + invalid;
    if total <= 0 {
        return None;
    }
    let pct = |x: i64| x as f64 * 100.0 / total as f64;
    Some(SegmentShares {
        business,
        generic,
        invalid,
        business_pct: pct(business),
        generic_pct: pct(generic),
        invalid_pct: pct(invalid),
    })
}

/// The engagement-depth rows (`Users with ...`).
pub fn engagement_depth(engagement: Option<&[MetricRow]>) -> Vec<MetricRow> {
    engagement
        .map(|rows| {
            rows.iter()
                .filter(|r| r.metric.contains("Users with"))
                .cloned()
                .collect()
        })
        .unwrap_or_default()
}

/// The engagement-depth row with the most users.
pub fn top_engagement(engagement: Option<&[MetricRow]>) -> Option<MetricRow> {
    let depth = engagement_depth(engagement);
    top_by_metric(&depth, |r| r.count, 1).into_iter().next()
}
