use log::{debug, info, warn};

use snafu::{prelude::*, Snafu};

use std::collections::HashMap;
use std::fs;
use std::io;
use std::rc::Rc;

use serde_json::json;
use serde_json::Map as JSMap;
use serde_json::Value as JSValue;
use text_diff::print_diff;

use dashboard_analytics::aggregate::TrendRow;
use dashboard_analytics::funnel::FunnelReport;
use dashboard_analytics::insights::CoursePerformance;
use dashboard_analytics::period::Window;
use dashboard_analytics::table::{Cell, DatasetLoad, MetricRow, RawTable, SheetKey};
use dashboard_analytics::*;

use crate::args::Args;
use crate::dash::cache::{CacheKey, DatasetCache};
use crate::dash::config_reader::*;
use crate::dash::io_common::*;
use crate::dash::loader::read_workbook;

pub mod cache;
pub mod config_reader;
pub mod io_common;
pub mod loader;
pub mod session;

#[derive(Debug, Snafu)]
pub enum DashError {
    #[snafu(display("Error opening file {path}"))]
    OpeningExcel {
        source: calamine::XlsxError,
        path: String,
    },
    #[snafu(display("Sheet {name} is listed in the workbook but could not be read"))]
    EmptyExcel { name: String },
    #[snafu(display("Error opening file {path}"))]
    OpeningJson { source: std::io::Error, path: String },
    #[snafu(display("Error parsing JSON"))]
    ParsingJson { source: serde_json::Error },
    #[snafu(display("Unknown sheet key {key} in the configuration"))]
    UnknownSheetKey { key: String },
    #[snafu(display("The opportunity quantile must be between 0 and 1, got {quantile}"))]
    InvalidQuantile { quantile: f64 },
    #[snafu(display("No workbook given: use --input or set filePath in the configuration"))]
    MissingInput {},
    #[snafu(display("Error writing the report to {path}"))]
    WritingOutput { source: std::io::Error, path: String },
    #[snafu(display("Error reading the session input"))]
    ReadingInput { source: std::io::Error },
    #[snafu(display("{source}"))]
    InvalidView { source: ViewError },
    #[snafu(display("Cannot understand {line:?}: {reason}"))]
    InvalidCommand { line: String, reason: String },

    #[snafu(whatever, display("{message}"))]
    Whatever {
        message: String,
        #[snafu(source(from(Box<dyn std::error::Error>, Some)))]
        source: Option<Box<dyn std::error::Error>>,
    },
}

pub type DashResult<T> = Result<T, DashError>;

/// A parsed workbook, as kept in the cache.
#[derive(Debug)]
pub struct LoadedWorkbook {
    pub load: DatasetLoad,
    pub file_name: String,
    /// When the file was last modified, to the minute.
    pub updated: String,
}

/// The workbook on disk, behind the dataset cache.
pub struct WorkbookSource {
    path: String,
    sheet_names: HashMap<SheetKey, String>,
    cache: DatasetCache<Rc<LoadedWorkbook>>,
}

impl WorkbookSource {
    pub fn new(path: &str, sheet_names: HashMap<SheetKey, String>, ttl: std::time::Duration) -> Self {
        WorkbookSource {
            path: path.to_string(),
            sheet_names,
            cache: DatasetCache::new(ttl),
        }
    }

    /// The parsed workbook. The file is only read again when it changed, when the cached copy
    /// expired or after a refresh.
    pub fn load(&mut self) -> DashResult<Rc<LoadedWorkbook>> {
        let minute = file_mtime_seconds(&self.path).map(mtime_rounded_minute);
        let key = CacheKey::new(&self.path, minute.unwrap_or(0));
        if let Some(w) = self.cache.get(&key) {
            debug!("WorkbookSource::load: cache hit for {:?}", key);
            return Ok(w);
        }
        info!("Reading workbook {:?}", self.path);
        let load = read_workbook(&self.path, &self.sheet_names)?;
        let w = Rc::new(LoadedWorkbook {
            load,
            file_name: simplify_file_name(&self.path),
            updated: updated_label(minute),
        });
        let expires_at = self.cache.insert(key, w.clone());
        debug!("WorkbookSource::load: cached until {:?}", expires_at);
        Ok(w)
    }

    /// Drops the cached workbook: the next load reads the file again.
    pub fn refresh(&mut self) {
        info!("Refreshing the dashboard cache");
        self.cache.invalidate();
    }
}

/// Loads the workbook (from the cache when possible) and builds the report of a view.
pub fn render(
    source: &mut WorkbookSource,
    view: &ViewRequest,
    settings: &DashboardSettings,
) -> DashResult<(Rc<LoadedWorkbook>, DashboardReport)> {
    let workbook = source.load()?;
    let report = build_dashboard(&workbook.load.dataset, view, settings).context(InvalidViewSnafu {})?;
    Ok((workbook, report))
}

fn window_to_json(w: &Window) -> JSValue {
    json!({
        "start": w.start.label(),
        "end": w.end.label(),
        "label": w.label(),
    })
}

fn trend_to_json(rows: &[TrendRow]) -> Vec<JSValue> {
    rows.iter()
        .map(|r| json!({"month": r.label, "value": r.value, "change": r.change}))
        .collect()
}

fn funnel_to_json(f: &FunnelReport) -> JSValue {
    let stages: Vec<JSValue> = f
        .stages
        .iter()
        .map(|s| {
            json!({
                "stage": s.stage,
                "count": s.count,
                "pctOfBase": s.pct_of_base,
                "label": s.label,
            })
        })
        .collect();
    let drops: Vec<JSValue> = f
        .drops_by_severity()
        .iter()
        .map(|d| {
            json!({
                "fromTo": d.label(),
                "dropUsers": d.drop_abs,
                "dropPct": d.drop_pct,
            })
        })
        .collect();
    json!({"stages": stages, "warning": f.warning, "drops": drops})
}

fn course_to_json(c: &CoursePerformance) -> JSValue {
    json!({
        "course": c.course,
        "shortName": c.short_name,
        "signUps": c.sign_ups,
        "avgCompletion": c.avg_completion,
    })
}

fn cell_to_json(c: &Cell) -> JSValue {
    match c {
        Cell::Number(f) => json!(f),
        Cell::Text(s) => json!(s),
        Cell::Date(d) => json!(d.to_string()),
        Cell::Empty => JSValue::Null,
    }
}

fn raw_table_to_json(t: &RawTable) -> JSValue {
    let rows: Vec<Vec<JSValue>> = t
        .rows
        .iter()
        .map(|row| row.iter().map(cell_to_json).collect())
        .collect();
    json!({"header": t.header, "rows": rows})
}

fn metrics_to_json(rows: &[MetricRow]) -> JSMap<String, JSValue> {
    let mut res: JSMap<String, JSValue> = JSMap::new();
    for r in rows {
        res.insert(r.metric.clone(), json!(r.count));
    }
    res
}

/// The report in the JSON layout of the output files.
pub fn report_to_json(report: &DashboardReport, workbook: &LoadedWorkbook) -> JSValue {
    let missing: Vec<&str> = workbook
        .load
        .missing_sheets
        .iter()
        .map(|k| k.key())
        .collect();
    let mut schema_problems: JSMap<String, JSValue> = JSMap::new();
    for (key, cols) in workbook.load.schema_problems.iter() {
        schema_problems.insert(key.key().to_string(), json!(cols));
    }

    let kpis: Vec<JSValue> = report
        .kpis
        .iter()
        .map(|k| {
            json!({
                "title": k.title,
                "value": k.display,
                "current": k.current,
                "previous": k.previous,
                "delta": k.delta,
            })
        })
        .collect();

    let countries: Vec<JSValue> = report
        .top_countries
        .iter()
        .map(|c| json!({"country": c.country, "signups": c.signups}))
        .collect();
    let popular: Vec<JSValue> = report
        .top_courses
        .iter()
        .map(|c| json!({"course": c.course, "shortName": c.short_name, "signUps": c.sign_ups}))
        .collect();
    let course_table = report.course_table.as_ref().map(|p| {
        json!({
            "page": p.page,
            "pageSize": p.page_size,
            "totalPages": p.total_pages,
            "totalRows": p.total_rows,
            "rows": p.rows.iter().map(course_to_json).collect::<Vec<JSValue>>(),
        })
    });
    let segments = report.segments.as_ref().map(|s| {
        json!({
            "business": s.business,
            "generic": s.generic,
            "invalid": s.invalid,
            "caption": s.caption(),
        })
    });

    json!({
        "source": {
            "file": workbook.file_name,
            "updated": workbook.updated,
            "missingSheets": missing,
            "schemaProblems": schema_problems,
        },
        "view": {
            "preset": report.preset,
            "segment": report.segment.name(),
        },
        "periods": report.periods.iter().map(|m| m.label()).collect::<Vec<String>>(),
        "window": window_to_json(&report.window),
        "comparison": report.comparison.as_ref().map(window_to_json),
        "totals": {
            "totalEnrollments": report.totals.total_enrollments,
            "totalUniqueUsers": report.totals.total_unique_users,
            "currentMau": report.totals.current_mau,
            "badgesIssued": report.totals.badges_issued,
        },
        "kpis": kpis,
        "trends": {
            "enrollments": trend_to_json(&report.enrollment_trend),
            "signups": trend_to_json(&report.signup_trend),
            "previousEnrollments": trend_to_json(&report.previous_enrollment_trend),
            "previousSignups": trend_to_json(&report.previous_signup_trend),
        },
        "funnel": report.funnel.as_ref().map(funnel_to_json),
        "topCountries": countries,
        "courses": {
            "popular": popular,
            "completionRates": report.completion_rates.iter().map(course_to_json).collect::<Vec<JSValue>>(),
            "quickView": report.course_quick_view.iter().map(course_to_json).collect::<Vec<JSValue>>(),
            "table": course_table,
            "dropOffSheet": report.course_dropoff.as_ref().map(raw_table_to_json),
        },
        "users": {
            "segments": segments,
            "engagement": metrics_to_json(&report.engagement),
            "badges": metrics_to_json(&report.badges),
        },
        "insights": {
            "topCourse": report.headlines.top_course,
            "topCountry": report.headlines.top_country,
            "biggestRisk": report.headlines.biggest_risk,
            "opportunity": report.headlines.opportunity,
            "topEngagement": report.top_engagement.as_ref().map(|r| r.metric.clone()),
        },
        "changes": report.changes,
    })
}

/// A short text rendering of the report, for the interactive session.
pub fn summary_text(report: &DashboardReport, workbook: &LoadedWorkbook) -> String {
    let mut lines: Vec<String> = vec![format!(
        "{} (updated {}) • Preset: {} • Segment: {}",
        workbook.file_name, workbook.updated, report.preset, report.segment
    )];
    let mut range = format!("Range: {}", report.window.label());
    if let Some(c) = &report.comparison {
        range.push_str(&format!(" | Compare: {}", c.label()));
    }
    lines.push(range);
    for k in report.kpis.iter() {
        match &k.delta {
            Some(d) => lines.push(format!("  {}: {} ({})", k.title, k.display, d)),
            None => lines.push(format!("  {}: {}", k.title, k.display)),
        }
    }
    if let Some(w) = report.funnel.as_ref().and_then(|f| f.warning.clone()) {
        lines.push(format!("Note: {}", w));
    }
    lines.push(report.headlines.top_course.clone());
    lines.push(report.headlines.biggest_risk.clone());
    lines.push(report.headlines.opportunity.clone());
    if let Some(p) = &report.course_table {
        lines.push(format!(
            "Courses: page {}/{}, showing rows {}-{} of {}",
            p.page,
            p.total_pages,
            p.first_row(),
            p.last_row(),
            p.total_rows
        ));
    }
    for c in report.changes.iter() {
        lines.push(format!("• {}", c));
    }
    lines.join("\n")
}

fn write_output(pretty: &str, out: Option<&str>) -> DashResult<()> {
    match out {
        None | Some("stdout") => {
            println!("{}", pretty);
        }
        Some("") => {
            debug!("write_output: no output requested");
        }
        Some(path) => {
            info!("Writing report to {:?}", path);
            fs::write(path, pretty).context(WritingOutputSnafu { path })?;
        }
    }
    Ok(())
}

// The modification time of the workbook depends on the machine: it is not compared.
fn without_updated(js: &JSValue) -> JSValue {
    let mut res = js.clone();
    if let Some(src) = res.get_mut("source").and_then(|s| s.as_object_mut()) {
        src.remove("updated");
    }
    res
}

fn check_reference(report_js: &JSValue, reference_path: &str) -> DashResult<()> {
    let summary_ref = read_summary(reference_path)?;
    let pretty_ref =
        serde_json::to_string_pretty(&without_updated(&summary_ref)).context(ParsingJsonSnafu {})?;
    let pretty_report =
        serde_json::to_string_pretty(&without_updated(report_js)).context(ParsingJsonSnafu {})?;
    if pretty_ref != pretty_report {
        warn!("Found differences with the reference report");
        print_diff(pretty_ref.as_str(), pretty_report.as_ref(), "\n");
        whatever!("Difference detected between the generated report and the reference report")
    }
    info!("The report matches the reference {:?}", reference_path);
    Ok(())
}

/// The view requested on the command line, starting from the configured preset.
pub fn initial_view(args: &Args, config: &DashConfig) -> DashResult<ViewRequest> {
    let preset_name = args
        .preset
        .clone()
        .or_else(|| config.preset.clone())
        .unwrap_or_else(|| PRESETS[0].name.to_string());
    let preset = find_preset(&preset_name).context(InvalidViewSnafu {})?;
    let mut view = ViewRequest::from_preset(preset);
    if let (Some(from), Some(to)) = (&args.from, &args.to) {
        view = view.with_range_labels(from, to).context(InvalidViewSnafu {})?;
    }
    if args.compare {
        view = view.with_compare(true);
    }
    if let Some(s) = &args.segment {
        let segment: Segment = s.parse().context(InvalidViewSnafu {})?;
        view = view.with_segment(segment);
    }
    if let Some(n) = args.top_countries {
        view = view.with_top_countries(n);
    }
    if let Some(n) = args.top_courses {
        view = view.with_top_courses(n);
    }
    if let Some(q) = &args.course_search {
        view = view.with_course_search(q);
    }
    if let Some(n) = args.page_size {
        view = view.with_page_size(n);
    }
    if let Some(n) = args.page {
        view = view.with_page(n);
    }
    debug!("initial_view: {:?}", view);
    Ok(view)
}

pub fn run(args: &Args) -> DashResult<()> {
    let config = match &args.config {
        Some(p) => read_config(p)?,
        None => DashConfig::default(),
    };
    info!("config: {:?}", config);
    let input = args
        .input
        .clone()
        .or_else(|| config.file_path.clone())
        .context(MissingInputSnafu {})?;
    let settings = config.settings();
    let view = initial_view(args, &config)?;
    let mut source = WorkbookSource::new(&input, config.sheet_names()?, config.cache_ttl());

    let (workbook, report) = render(&mut source, &view, &settings)?;
    let report_js = report_to_json(&report, &workbook);
    let pretty_js = serde_json::to_string_pretty(&report_js).context(ParsingJsonSnafu {})?;
    let out = args.out.clone().or_else(|| config.output_path.clone());
    write_output(&pretty_js, out.as_deref())?;

    // The reference report, if provided for comparison
    if let Some(reference_p) = &args.reference {
        check_reference(&report_js, reference_p)?;
    }

    if args.interactive {
        let stdin = io::stdin();
        let mut stdout = io::stdout();
        session::run_session(stdin.lock(), &mut stdout, &mut source, view, &settings)?;
    }
    Ok(())
}
