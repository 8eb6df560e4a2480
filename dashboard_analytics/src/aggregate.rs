use log::debug;

use crate::period::{Month, Window};
use crate::table::{MetricRow, MonthlyTable};

/// How a metric is reduced over a window.
///
/// Flow metrics (enrollments, sign-ups) are summed. Snapshot metrics (active users,
/// activation rates) only make sense as the most recent observation in the window.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum Reduction {
    Sum,
    Latest,
}

/// How the change against the previous window is displayed.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub enum DeltaKind {
    /// Relative change, `12.5%`.
    Percent,
    /// Absolute change for metrics that are already percentages, `+1.5 pts`.
    Points,
}

// The rows of the table inside the window, in period order, with the value of the column.
// Rows without a parsed period are never part of a window.
fn window_values(table: &MonthlyTable, column: &str, window: Window) -> Option<Vec<f64>> {
    let col = table.column_index(column)?;
    let mut rows: Vec<(Month, f64)> = table
        .rows
        .iter()
        .filter_map(|r| match r.period {
            Some(p) if window.contains(p) => {
                Some((p, r.values.get(col).cloned().flatten().unwrap_or(0.0)))
            }
            _ => None,
        })
        .collect();
    rows.sort_by_key(|(p, _)| *p);
    Some(rows.into_iter().map(|(_, v)| v).collect())
}

/// Sum of `column` over the rows whose period falls in `window` (inclusive).
///
/// Missing or non-numeric values count as zero. An absent table, column or window yields `0.0`.
pub fn sum_in_window(table: Option<&MonthlyTable>, column: &str, window: Option<Window>) -> f64 {
    match (table, window) {
        (Some(t), Some(w)) => window_values(t, column, w)
            .map(|vs| vs.iter().sum())
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

/// Value of `column` for the last period inside `window`, or `0.0` if there is none.
pub fn last_in_window(table: Option<&MonthlyTable>, column: &str, window: Option<Window>) -> f64 {
    match (table, window) {
        (Some(t), Some(w)) => window_values(t, column, w)
            .and_then(|vs| vs.last().cloned())
            .unwrap_or(0.0),
        _ => 0.0,
    }
}

pub fn reduce_in_window(
    table: Option<&MonthlyTable>,
    column: &str,
    window: Option<Window>,
    reduction: Reduction,
) -> f64 {
    match reduction {
        Reduction::Sum => sum_in_window(table, column, window),
        Reduction::Latest => last_in_window(table, column, window),
    }
}

/// Relative change between two values, formatted for display.
/// A zero baseline has no meaningful relative change and yields `—`.
pub fn percent_delta(curr: f64, prev: f64) -> String {
    if prev == 0.0 {
        return "—".to_string();
    }
    format!("{:.1}%", (curr - prev) / prev * 100.0)
}

/// Absolute change in percentage points.
pub fn point_delta(curr: f64, prev: f64) -> String {
    format!("{:+.1} pts", curr - prev)
}

pub fn format_delta(kind: DeltaKind, curr: f64, prev: f64) -> String {
    match kind {
        DeltaKind::Percent => percent_delta(curr, prev),
        DeltaKind::Points if prev == 0.0 => "—".to_string(),
        DeltaKind::Points => point_delta(curr, prev),
    }
}

/// Formats a count with thousands separators: `1234567` becomes `1,234,567`.
pub fn thousands(n: i64) -> String {
    let digits = n.unsigned_abs().to_string();
    let mut res = String::new();
    for (idx, c) in digits.chars().enumerate() {
        if idx > 0 && (digits.len() - idx) % 3 == 0 {
            res.push(',');
        }
        res.push(c);
    }
    if n < 0 {
        format!("-{}", res)
    } else {
        res
    }
}

/// One row of a trend table.
#[derive(PartialEq, Debug, Clone)]
pub struct TrendRow {
    pub label: String,
    pub value: i64,
    /// Difference with the previous row of the table, zero for the first one.
    pub change: i64,
}

/// The rows of the window with their month-over-month change.
pub fn month_over_month(
    table: Option<&MonthlyTable>,
    column: &str,
    window: Option<Window>,
) -> Vec<TrendRow> {
    let (t, w, col) = match (table, window) {
        (Some(t), Some(w)) => match t.column_index(column) {
            Some(col) => (t, w, col),
            None => return vec![],
        },
        _ => return vec![],
    };
    let mut rows: Vec<(Month, String, i64)> = t
        .rows
        .iter()
        .filter_map(|r| match r.period {
            Some(p) if w.contains(p) => {
                let v = r.values.get(col).cloned().flatten().unwrap_or(0.0);
                Some((p, r.label.clone(), v as i64))
            }
            _ => None,
        })
        .collect();
    rows.sort_by_key(|(p, _, _)| *p);
    let mut res: Vec<TrendRow> = Vec::new();
    let mut previous: Option<i64> = None;
    for (_, label, value) in rows {
        res.push(TrendRow {
            label,
            value,
            change: previous.map(|p| value - p).unwrap_or(0),
        });
        previous = Some(value);
    }
    debug!("month_over_month: {} rows for {}", res.len(), column);
    res
}

/// The count of the first row named `metric`, or 0 when there is none.
pub fn metric_value(rows: Option<&[MetricRow]>, metric: &str) -> i64 {
    rows.and_then(|rs| rs.iter().find(|r| r.metric.trim() == metric))
        .map(|r| r.count as i64)
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::table::MonthlyRow;

    fn m(month: u32) -> Month {
        Month::new(2025, month).unwrap()
    }

    fn enrollments(values: &[(u32, Option<f64>)]) -> MonthlyTable {
        MonthlyTable {
            period_column: "Month".to_string(),
            columns: vec!["Enrollments".to_string()],
            rows: values
                .iter()
                .map(|(month, v)| MonthlyRow {
                    label: m(*month).label(),
                    period: Some(m(*month)),
                    values: vec![*v],
                })
                .collect(),
        }
    }

    #[test]
    fn sum_defaults_to_zero() {
        let t = enrollments(&[]);
        let w = Some(Window::new(m(1), m(3)));
        assert_eq!(sum_in_window(Some(&t), "Enrollments", w), 0.0);
        assert_eq!(sum_in_window(None, "Enrollments", w), 0.0);
        let t = enrollments(&[(1, Some(5.0))]);
        assert_eq!(sum_in_window(Some(&t), "Missing", w), 0.0);
        assert_eq!(sum_in_window(Some(&t), "Enrollments", None), 0.0);
    }

    #[test]
    fn sum_and_last_in_window() {
        let t = enrollments(&[(3, Some(200.0)), (1, Some(100.0)), (2, None), (4, Some(7.0))]);
        let w = Some(Window::new(m(1), m(3)));
        assert_eq!(sum_in_window(Some(&t), "Enrollments", w), 300.0);
        // Rows are ordered by period, not by sheet order.
        assert_eq!(last_in_window(Some(&t), "Enrollments", w), 200.0);
        let empty = Some(Window::new(m(8), m(9)));
        assert_eq!(last_in_window(Some(&t), "Enrollments", empty), 0.0);
    }

    #[test]
    fn repeated_aggregation_is_identical() {
        let t = enrollments(&[(1, Some(0.1)), (2, Some(0.2)), (3, Some(0.3))]);
        let w = Some(Window::new(m(1), m(3)));
        let a = sum_in_window(Some(&t), "Enrollments", w);
        let b = sum_in_window(Some(&t), "Enrollments", w);
        assert_eq!(a.to_bits(), b.to_bits());
    }

    #[test]
    fn deltas() {
        assert_eq!(percent_delta(350.0, 100.0), "250.0%");
        assert_eq!(percent_delta(50.0, 100.0), "-50.0%");
        assert_eq!(percent_delta(10.0, 0.0), "—");
        assert_eq!(point_delta(41.5, 40.0), "+1.5 pts");
        assert_eq!(format_delta(DeltaKind::Points, 38.0, 40.0), "-2.0 pts");
        assert_eq!(format_delta(DeltaKind::Points, 38.0, 0.0), "—");
    }

    #[test]
    fn thousands_separators() {
        assert_eq!(thousands(0), "0");
        assert_eq!(thousands(999), "999");
        assert_eq!(thousands(1000), "1,000");
        assert_eq!(thousands(1234567), "1,234,567");
        assert_eq!(thousands(-45000), "-45,000");
    }

    #[test]
    fn month_over_month_changes() {
        let t = enrollments(&[(1, Some(100.0)), (2, Some(150.0)), (3, Some(120.0))]);
        let rows = month_over_month(Some(&t), "Enrollments", Some(Window::new(m(1), m(3))));
        let changes: Vec<i64> = rows.iter().map(|r| r.change).collect();
        assert_eq!(changes, vec![0, 50, -30]);
        assert_eq!(rows[1].label, "Feb 2025");
    }

    #[test]
    fn metric_lookup() {
        let rows = vec![
            MetricRow {
                metric: "Total Users".to_string(),
                count: 1200.0,
            },
            MetricRow {
                metric: "Business Users".to_string(),
                count: 300.0,
            },
        ];
        assert_eq!(metric_value(Some(rows.as_slice()), "Business Users"), 300);
        assert_eq!(metric_value(Some(rows.as_slice()), "Invalid Users"), 0);
        assert_eq!(metric_value(None, "Total Users"), 0);
    }
}
