//! The interactive mode: one command per line on the standard input, each one updating the
//! current view and printing the new summary.

use log::debug;
use snafu::prelude::*;
use std::io::{BufRead, Write};

use dashboard_analytics::period::Month;
use dashboard_analytics::{DashboardReport, DashboardSettings, Segment, ViewError, ViewRequest};

use crate::dash::*;

const HELP: &str = "Commands:
  range <from> .. <to>   select months, e.g. range Jan 2025 .. Jun 2025
  range default          the last months of the preset
  months <n>             how many months the default range covers
  compare [on|off]       compare with the previous period
  segment <name>         All, Business, Generic or Invalid
  preset <name>          load a saved view
  search [text]          filter the course table
  page <n> | next | prev
  page-size <n>
  top-countries <n>
  top-courses <n>
  refresh                read the workbook again
  show                   print the full report
  help
  quit";

#[derive(PartialEq, Debug, Clone)]
pub enum Command {
    Range(Month, Month),
    DefaultRange,
    MonthsBack(usize),
    /// None toggles.
    Compare(Option<bool>),
    Segment(Segment),
    Preset(String),
    Search(String),
    Page(usize),
    NextPage,
    PreviousPage,
    PageSize(usize),
    TopCountries(usize),
    TopCourses(usize),
    Refresh,
    Show,
    Help,
    Quit,
    Nothing,
}

fn invalid(line: &str, reason: &str) -> DashError {
    DashError::InvalidCommand {
        line: line.to_string(),
        reason: reason.to_string(),
    }
}

fn number(line: &str, arg: &str) -> DashResult<usize> {
    arg.parse::<usize>()
        .map_err(|_| invalid(line, "expected a positive number"))
}

fn month(line: &str, label: &str) -> DashResult<Month> {
    Month::parse_label(label).ok_or_else(|| invalid(line, "expected a month such as Jan 2025"))
}

pub fn parse_command(line: &str) -> DashResult<Command> {
    let trimmed = line.trim();
    let (name, arg) = match trimmed.split_once(char::is_whitespace) {
        Some((n, a)) => (n, a.trim()),
        None => (trimmed, ""),
    };
    let cmd = match name.to_lowercase().as_str() {
        "" => Command::Nothing,
        "range" if arg.eq_ignore_ascii_case("default") => Command::DefaultRange,
        "range" => {
            let (from, to) = arg
                .split_once("..")
                .ok_or_else(|| invalid(line, "expected <from> .. <to>"))?;
            Command::Range(month(line, from)?, month(line, to)?)
        }
        "months" => Command::MonthsBack(number(line, arg)?),
        "compare" => match arg.to_lowercase().as_str() {
            "" => Command::Compare(None),
            "on" => Command::Compare(Some(true)),
            "off" => Command::Compare(Some(false)),
            _ => return Err(invalid(line, "expected on or off")),
        },
        "segment" => {
            let segment: Segment = arg.parse().context(InvalidViewSnafu {})?;
            Command::Segment(segment)
        }
        "preset" if !arg.is_empty() => Command::Preset(arg.to_string()),
        "search" => Command::Search(arg.to_string()),
        "page" => Command::Page(number(line, arg)?),
        "next" => Command::NextPage,
        "prev" => Command::PreviousPage,
        "page-size" => Command::PageSize(number(line, arg)?),
        "top-countries" => Command::TopCountries(number(line, arg)?),
        "top-courses" => Command::TopCourses(number(line, arg)?),
        "refresh" => Command::Refresh,
        "show" => Command::Show,
        "help" => Command::Help,
        "quit" | "exit" => Command::Quit,
        _ => return Err(invalid(line, "unknown command, try help")),
    };
    debug!("parse_command: {:?} -> {:?}", line, cmd);
    Ok(cmd)
}

/// The view after a command. Commands that do not change the view return it unchanged.
pub fn apply_command(view: &ViewRequest, cmd: &Command) -> Result<ViewRequest, ViewError> {
    let v = view.clone();
    let res = match cmd {
        Command::Range(from, to) => v.with_range(*from, *to),
        Command::DefaultRange => v.with_default_range(),
        Command::MonthsBack(n) => v.with_months_back(*n),
        Command::Compare(Some(c)) => v.with_compare(*c),
        Command::Compare(None) => {
            let c = !v.compare;
            v.with_compare(c)
        }
        Command::Segment(s) => v.with_segment(*s),
        Command::Preset(name) => v.with_preset(name)?,
        Command::Search(q) => v.with_course_search(q),
        Command::Page(p) => v.with_page(*p),
        Command::NextPage => {
            let p = v.page + 1;
            v.with_page(p)
        }
        Command::PreviousPage => {
            let p = v.page.saturating_sub(1);
            v.with_page(p)
        }
        Command::PageSize(n) => v.with_page_size(*n),
        Command::TopCountries(n) => v.with_top_countries(*n),
        Command::TopCourses(n) => v.with_top_courses(*n),
        Command::Refresh | Command::Show | Command::Help | Command::Quit | Command::Nothing => v,
    };
    Ok(res)
}

/// The view as it was rendered: the page is the one the course table shows, so that `next`
/// past the last page and then `prev` moves back one page.
pub fn settle_view(view: ViewRequest, report: &DashboardReport) -> ViewRequest {
    let shown = report.course_table.as_ref().map_or(1, |p| p.page);
    view.with_page(shown)
}

fn say<W: Write>(out: &mut W, text: &str) -> DashResult<()> {
    writeln!(out, "{}", text).context(WritingOutputSnafu { path: "stdout" })
}

pub fn run_session<R: BufRead, W: Write>(
    input: R,
    out: &mut W,
    source: &mut WorkbookSource,
    mut view: ViewRequest,
    settings: &DashboardSettings,
) -> DashResult<()> {
    say(out, HELP)?;
    for line in input.lines() {
        let line = line.context(ReadingInputSnafu {})?;
        let cmd = match parse_command(&line) {
            Ok(c) => c,
            Err(e) => {
                say(out, &e.to_string())?;
                continue;
            }
        };
        match cmd {
            Command::Quit => break,
            Command::Nothing => continue,
            Command::Help => {
                say(out, HELP)?;
                continue;
            }
            Command::Refresh => source.refresh(),
            _ => {}
        }
        let next = match apply_command(&view, &cmd) {
            Ok(v) => v,
            Err(e) => {
                say(out, &e.to_string())?;
                continue;
            }
        };
        // A view the workbook cannot serve is reported and the previous view is kept.
        match render(source, &next, settings) {
            Ok((workbook, report)) => {
                let text = if cmd == Command::Show {
                    serde_json::to_string_pretty(&report_to_json(&report, &workbook))
                        .context(ParsingJsonSnafu {})?
                } else {
                    summary_text(&report, &workbook)
                };
                say(out, &text)?;
                view = settle_view(next, &report);
            }
            Err(e @ DashError::InvalidView { .. }) => say(out, &e.to_string())?,
            Err(e) => return Err(e),
        }
    }
    Ok(())
}
