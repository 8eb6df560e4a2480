pub mod aggregate;
mod config;
pub mod funnel;
pub mod insights;
pub mod period;
pub mod table;

use log::{debug, info};

pub use crate::config::*;

use crate::aggregate::{
    format_delta, month_over_month, reduce_in_window, thousands, DeltaKind,
    Reduction, TrendRow,
};
use crate::funnel::{compute_funnel, FunnelReport};
use crate::insights::{
    completion_opportunity, course_performance, engagement_depth, paginate, search_courses,
    segment_shares, top_by_metric, top_engagement, CoursePerformance,
};
use crate::period::{default_window, previous_window, PeriodIndex, Window};
use crate::table::*;

/// The trend tables only show the most recent rows of the window.
pub const TREND_ROWS_SHOWN: usize = 12;

pub const QUICK_VIEW_ROWS: usize = 20;

const NO_INSIGHT: &str = "—";

/// The four headline KPIs, resolved for a segment.
///
/// Active users and activation use the business columns for the `Business` segment when the
/// workbook provides them.
pub fn kpi_specs(dataset: &Dataset, segment: Segment) -> Vec<KpiSpec> {
    let business = segment == Segment::Business;
    let mau_col = if business && dataset.mau.as_ref().map_or(false, |t| t.has_column(BUSINESS_MAU)) {
        BUSINESS_MAU
    } else {
        MAU
    };
    let act_col = if business
        && dataset
            .activation
            .as_ref()
            .map_or(false, |t| t.has_column(BUSINESS_ACTIVATION))
    {
        BUSINESS_ACTIVATION
    } else {
        ALL_ACTIVATION
    };
    vec![
        KpiSpec {
            name: "Enrollments".to_string(),
            source: SheetKey::MonthlyEnroll,
            column: ENROLLMENTS.to_string(),
            reduction: Reduction::Sum,
            delta_kind: DeltaKind::Percent,
        },
        KpiSpec {
            name: "Signups".to_string(),
            source: SheetKey::MonthlyUnique,
            column: UNIQUE_SIGNUPS.to_string(),
            reduction: Reduction::Sum,
            delta_kind: DeltaKind::Percent,
        },
        KpiSpec {
            name: mau_col.to_string(),
            source: SheetKey::Mau,
            column: mau_col.to_string(),
            reduction: Reduction::Latest,
            delta_kind: DeltaKind::Percent,
        },
        KpiSpec {
            name: act_col.to_string(),
            source: SheetKey::Activation,
            column: act_col.to_string(),
            reduction: Reduction::Latest,
            delta_kind: DeltaKind::Points,
        },
    ]
}

/// Computes one KPI over the window, and over the comparison window when there is one.
pub fn compute_kpi(
    dataset: &Dataset,
    spec: &KpiSpec,
    window: Window,
    comparison: Option<Window>,
) -> KpiValue {
    let table = dataset.monthly(spec.source);
    let current = reduce_in_window(table, &spec.column, Some(window), spec.reduction);
    let previous = comparison.map(|w| reduce_in_window(table, &spec.column, Some(w), spec.reduction));
    let delta = previous.map(|p| format_delta(spec.delta_kind, current, p));
    let title = match spec.reduction {
        Reduction::Sum => format!("{} (in range)", spec.name),
        Reduction::Latest => format!("{} (latest)", spec.name),
    };
    let display = match spec.delta_kind {
        DeltaKind::Points => format!("{:.1}%", current),
        DeltaKind::Percent => thousands(current.round() as i64),
    };
    debug!(
        "compute_kpi: {} current {} previous {:?}",
        spec.column, current, previous
    );
    KpiValue {
        name: spec.name.clone(),
        title,
        column: spec.column.clone(),
        reduction: spec.reduction,
        current,
        previous,
        delta,
        display,
    }
}

/// Headline numbers of the workbook, over all the periods.
pub fn workbook_totals(dataset: &Dataset) -> WorkbookTotals {
    let total_enrollments = dataset
        .courses
        .as_ref()
        .map(|rows| rows.iter().map(|r| r.sign_ups).sum::<f64>() as i64)
        .unwrap_or(0);
    let mut total_unique_users = aggregate::metric_value(dataset.segmentation.as_deref(), "Total Users");
    if total_unique_users == 0 {
        total_unique_users = dataset
            .monthly_unique
            .as_ref()
            .and_then(|t| t.column_index(UNIQUE_SIGNUPS).map(|col| (t, col)))
            .map(|(t, col)| {
                t.rows
                    .iter()
                    .map(|r| r.values.get(col).cloned().flatten().unwrap_or(0.0))
                    .sum::<f64>() as i64
            })
            .unwrap_or(0);
    }
    // The last row of the sheet, whatever its period.
    let current_mau = dataset
        .mau
        .as_ref()
        .and_then(|t| t.column_index(MAU).map(|col| (t, col)))
        .and_then(|(t, col)| t.rows.last().map(|r| r.values.get(col).cloned().flatten()))
        .flatten()
        .map(|v| v as i64)
        .unwrap_or(0);
    let badges_issued = aggregate::metric_value(dataset.badges.as_deref(), "Total Sent");
    WorkbookTotals {
        total_enrollments,
        total_unique_users,
        current_mau,
        badges_issued,
    }
}

/// The selected window of a view: the explicit range, or the last `months_back` periods.
pub fn resolve_window(index: &PeriodIndex, view: &ViewRequest) -> Result<Window, ViewError> {
    if index.is_empty() {
        return Err(ViewError::NoPeriods);
    }
    match view.range {
        Some((start, end)) => {
            for m in [start, end] {
                if index.position(m).is_none() {
                    return Err(ViewError::UnavailableMonth(m));
                }
            }
            Ok(Window::new(start, end))
        }
        None => default_window(index, view.months_back).ok_or(ViewError::NoPeriods),
    }
}

fn tail(rows: Vec<TrendRow>, n: usize) -> Vec<TrendRow> {
    let skip = rows.len().saturating_sub(n);
    rows.into_iter().skip(skip).collect()
}

fn what_changed(
    view: &ViewRequest,
    window: Window,
    comparison: Option<Window>,
    kpis: &[KpiValue],
) -> Vec<String> {
    if !view.compare {
        return vec!["Enable compare mode to see deltas vs the previous period.".to_string()];
    }
    if comparison.is_none() {
        return vec![format!(
            "Not enough history before {} to compare with a previous period of the same length.",
            window.start
        )];
    }
    kpis.iter()
        .filter(|k| k.reduction == Reduction::Sum || k.previous.map_or(false, |p| p != 0.0))
        .filter_map(|k| {
            k.delta
                .as_ref()
                .map(|d| format!("{}: {} ({} vs previous period)", k.name, k.display, d))
        })
        .collect()
}

fn headlines(
    dataset: &Dataset,
    funnel: Option<&FunnelReport>,
    opportunity: Option<&CoursePerformance>,
) -> Headlines {
    let top_course = dataset
        .courses
        .as_deref()
        .and_then(|rows| top_by_metric(rows, |r| r.sign_ups, 1).into_iter().next())
        .map(|c| {
            format!(
                "Top course: {} ({} sign-ups)",
                c.course,
                thousands(c.sign_ups as i64)
            )
        })
        .unwrap_or_else(|| NO_INSIGHT.to_string());
    let top_country = dataset
        .countries
        .as_deref()
        .and_then(|rows| top_by_metric(rows, |r| r.signups, 1).into_iter().next())
        .map(|c| {
            format!(
                "Top country: {} ({} sign-ups)",
                c.country,
                thousands(c.signups as i64)
            )
        })
        .unwrap_or_else(|| NO_INSIGHT.to_string());
    let biggest_risk = funnel
        .and_then(|f| f.biggest_drop())
        .map(|d| {
            format!(
                "Biggest drop: {} (−{}, {:.1}%)",
                d.label(),
                thousands(d.drop_abs),
                d.drop_pct
            )
        })
        .unwrap_or_else(|| NO_INSIGHT.to_string());
    let opportunity = opportunity
        .map(|c| {
            format!(
                "Improve completion: {} ({} sign-ups, {:.1}% completion)",
                c.course,
                thousands(c.sign_ups as i64),
                c.avg_completion
            )
        })
        .unwrap_or_else(|| NO_INSIGHT.to_string());
    Headlines {
        top_course,
        top_country,
        biggest_risk,
        opportunity,
    }
}

/// Builds the whole dashboard for one view request.
///
/// Arguments:
/// * `dataset` the tables of the workbook
/// * `view` the current selection
/// * `settings` the funnel stage order and the opportunity thresholds
///
/// Fails only when no window can be selected: the workbook has no time-bearing table, or the
/// requested range refers to months the workbook does not have. Every other missing piece of
/// data degrades to an empty section.
pub fn build_dashboard(
    dataset: &Dataset,
    view: &ViewRequest,
    settings: &DashboardSettings,
) -> Result<DashboardReport, ViewError> {
    let index = PeriodIndex::from_dataset(dataset);
    let window = resolve_window(&index, view)?;
    let comparison = if view.compare {
        previous_window(&index, window.start, window.end)
    } else {
        None
    };
    info!(
        "build_dashboard: preset {:?}, segment {}, window {}, comparison {:?}",
        view.preset,
        view.segment,
        window.label(),
        comparison.map(|w| w.label())
    );

    let kpis: Vec<KpiValue> = kpi_specs(dataset, view.segment)
        .iter()
        .map(|spec| compute_kpi(dataset, spec, window, comparison))
        .collect();

    let trend = |key: SheetKey, column: &str, w: Option<Window>| {
        tail(month_over_month(dataset.monthly(key), column, w), TREND_ROWS_SHOWN)
    };
    let enrollment_trend = trend(SheetKey::MonthlyEnroll, ENROLLMENTS, Some(window));
    let signup_trend = trend(SheetKey::MonthlyUnique, UNIQUE_SIGNUPS, Some(window));
    let previous_enrollment_trend = trend(SheetKey::MonthlyEnroll, ENROLLMENTS, comparison);
    let previous_signup_trend = trend(SheetKey::MonthlyUnique, UNIQUE_SIGNUPS, comparison);

    let funnel = compute_funnel(dataset.funnel_stages.as_deref(), &settings.stage_order);

    let top_countries = dataset
        .countries
        .as_deref()
        .map(|rows| top_by_metric(rows, |r| r.signups, view.top_countries))
        .unwrap_or_default();
    let top_courses = dataset
        .courses
        .as_deref()
        .map(|rows| top_by_metric(rows, |r| r.sign_ups, view.top_courses))
        .unwrap_or_default();

    let perf = course_performance(dataset.courses.as_deref(), dataset.completion.as_deref());
    let mut completion_rates = perf
        .as_deref()
        .map(|rows| top_by_metric(rows, |r| r.sign_ups, view.top_courses))
        .unwrap_or_default();
    completion_rates.sort_by(|a, b| a.avg_completion.total_cmp(&b.avg_completion));
    let opportunity = perf
        .as_deref()
        .and_then(|rows| completion_opportunity(rows, &settings.opportunity));
    let found = perf
        .as_deref()
        .map(|rows| search_courses(rows, &view.course_search));
    let course_quick_view = found
        .as_deref()
        .map(|rows| rows.iter().take(QUICK_VIEW_ROWS).cloned().collect())
        .unwrap_or_default();
    let course_table = found
        .as_deref()
        .map(|rows| paginate(rows, view.page, view.page_size));

    let changes = what_changed(view, window, comparison, &kpis);
    let headlines = headlines(dataset, funnel.as_ref(), opportunity.as_ref());

    debug!(
        "build_dashboard: {} KPIs, {} enrollment rows, funnel {}",
        kpis.len(),
        enrollment_trend.len(),
        funnel.is_some()
    );

    Ok(DashboardReport {
        preset: view.preset.clone(),
        segment: view.segment,
        periods: index.months().to_vec(),
        window,
        comparison,
        totals: workbook_totals(dataset),
        kpis,
        enrollment_trend,
        signup_trend,
        previous_enrollment_trend,
        previous_signup_trend,
        funnel,
        top_countries,
        top_courses,
        completion_rates,
        opportunity,
        course_quick_view,
        course_table,
        course_dropoff: dataset.course_dropoff.clone(),
        segments: segment_shares(dataset.segmentation.as_deref()),
        engagement: engagement_depth(dataset.engagement.as_deref()),
        top_engagement: top_engagement(dataset.engagement.as_deref()),
        badges: dataset.badges.clone().unwrap_or_default(),
        headlines,
        changes,
    })
}
