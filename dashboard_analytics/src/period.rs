use chrono::{Datelike, Duration, NaiveDate};
use log::debug;
use std::fmt::Display;

use crate::table::{Dataset, MonthlyTable};

const MONTH_NAMES: [&str; 12] = [
    "Jan", "Feb", "Mar", "Apr", "May", "Jun", "Jul", "Aug", "Sep", "Oct", "Nov", "Dec",
];

const FULL_MONTH_NAMES: [&str; 12] = [
    "January",
    "February",
    "March",
    "April",
    "May",
    "June",
    "July",
    "August",
    "September",
    "October",
    "November",
    "December",
];

/// The date of a spreadsheet date serial (days since 1899-12-30). The time of day is dropped.
pub fn excel_serial_date(serial: f64) -> Option<NaiveDate> {
    if !serial.is_finite() || serial < 0.0 {
        return None;
    }
    let epoch = NaiveDate::from_ymd_opt(1899, 12, 30)?;
    epoch.checked_add_signed(Duration::days(serial.floor() as i64))
}

/// A calendar month. The ordering is chronological.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash, Ord, PartialOrd)]
pub struct Month {
    // Field order matters for the derived ordering.
    year: i32,
    month: u32,
}

impl Month {
    pub fn new(year: i32, month: u32) -> Option<Month> {
        if (1..=12).contains(&month) {
            Some(Month { year, month })
        } else {
            None
        }
    }

    pub fn year(&self) -> i32 {
        self.year
    }

    /// The month number, starting at 1 for January.
    pub fn month(&self) -> u32 {
        self.month
    }

    pub fn from_date(date: NaiveDate) -> Month {
        Month {
            year: date.year(),
            month: date.month(),
        }
    }

    /// Parses labels such as `Jan 2025`, `January 2025` or `2025-01`. The month name must be
    /// the exact abbreviation or the full name, ignoring case.
    pub fn parse_label(label: &str) -> Option<Month> {
        let s = label.trim();
        if let Some((y, m)) = s.split_once('-') {
            if let (Ok(year), Ok(month)) = (y.trim().parse::<i32>(), m.trim().parse::<u32>()) {
                return Month::new(year, month);
            }
        }
        let mut parts = s.split_whitespace();
        let name = parts.next()?;
        let year = parts.next()?.parse::<i32>().ok()?;
        if parts.next().is_some() {
            return None;
        }
        let idx = MONTH_NAMES
            .iter()
            .zip(FULL_MONTH_NAMES.iter())
            .position(|(short, full)| {
                name.eq_ignore_ascii_case(short) || name.eq_ignore_ascii_case(full)
            })?;
        Month::new(year, (idx + 1) as u32)
    }

    /// Converts a spreadsheet date serial to its month.
    pub fn from_excel_serial(serial: f64) -> Option<Month> {
        excel_serial_date(serial).map(Month::from_date)
    }

    /// The month `n` months later (or earlier for negative `n`).
    pub fn shift(&self, n: i32) -> Month {
        let idx = self.year * 12 + (self.month as i32 - 1) + n;
        Month {
            year: idx.div_euclid(12),
            month: (idx.rem_euclid(12) + 1) as u32,
        }
    }

    pub fn first_day(&self) -> Option<NaiveDate> {
        NaiveDate::from_ymd_opt(self.year, self.month, 1)
    }

    /// The last day of the month, used as the timestamp of the period.
    pub fn month_end(&self) -> Option<NaiveDate> {
        self.shift(1).first_day()?.pred_opt()
    }

    pub fn label(&self) -> String {
        format!("{} {}", MONTH_NAMES[(self.month - 1) as usize], self.year)
    }
}

impl Display for Month {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.label())
    }
}

/// A closed range of months. Invariant: `start <= end`.
#[derive(Eq, PartialEq, Debug, Clone, Copy, Hash)]
pub struct Window {
    pub start: Month,
    pub end: Month,
}

impl Window {
    /// Builds a window, swapping the bounds if they are given in reverse.
    pub fn new(a: Month, b: Month) -> Window {
        if b < a {
            Window { start: b, end: a }
        } else {
            Window { start: a, end: b }
        }
    }

    pub fn contains(&self, m: Month) -> bool {
        self.start <= m && m <= self.end
    }

    pub fn label(&self) -> String {
        format!("{} → {}", self.start, self.end)
    }
}

/// The sorted, de-duplicated months available for time filtering.
#[derive(Eq, PartialEq, Debug, Clone, Default)]
pub struct PeriodIndex {
    months: Vec<Month>,
}

impl PeriodIndex {
    pub fn from_months<I: IntoIterator<Item = Month>>(months: I) -> PeriodIndex {
        let mut months: Vec<Month> = months.into_iter().collect();
        months.sort();
        months.dedup();
        PeriodIndex { months }
    }

    /// Uses the first time-bearing table that yields at least one month.
    /// Tables are tried in order: sign-ups, enrollments, active users, activation cohorts.
    pub fn from_dataset(dataset: &Dataset) -> PeriodIndex {
        let candidates: [(&str, Option<&MonthlyTable>); 4] = [
            ("monthly sign-ups", dataset.monthly_unique.as_ref()),
            ("monthly enrollments", dataset.monthly_enroll.as_ref()),
            ("MAU", dataset.mau.as_ref()),
            ("activation cohorts", dataset.activation.as_ref()),
        ];
        for (name, table) in candidates {
            if let Some(t) = table {
                let index = PeriodIndex::from_months(t.rows.iter().filter_map(|r| r.period));
                if !index.is_empty() {
                    debug!(
                        "PeriodIndex::from_dataset: using {} with {} months",
                        name,
                        index.len()
                    );
                    return index;
                }
            }
        }
        debug!("PeriodIndex::from_dataset: no time-bearing table found");
        PeriodIndex::default()
    }

    pub fn months(&self) -> &[Month] {
        &self.months
    }

    pub fn len(&self) -> usize {
        self.months.len()
    }

    pub fn is_empty(&self) -> bool {
        self.months.is_empty()
    }

    pub fn first(&self) -> Option<Month> {
        self.months.first().cloned()
    }

    pub fn last(&self) -> Option<Month> {
        self.months.last().cloned()
    }

    pub fn position(&self, m: Month) -> Option<usize> {
        self.months.iter().position(|x| *x == m)
    }
}

/// The window of the same length immediately preceding `(start, end)`.
///
/// Positions are looked up in the index, not computed from calendar arithmetic: a gap in the
/// data shifts the comparison window accordingly. Returns `None` when an endpoint is not in
/// the index or when there is not enough history before `start`.
pub fn previous_window(index: &PeriodIndex, start: Month, end: Month) -> Option<Window> {
    let mut i0 = index.position(start)?;
    let mut i1 = index.position(end)?;
    if i1 < i0 {
        std::mem::swap(&mut i0, &mut i1);
    }
    let length = i1 - i0 + 1;
    // Insufficient history: the previous window would start before the first period.
    let prev_end_idx = i0.checked_sub(1)?;
    let prev_start_idx = prev_end_idx.checked_sub(length - 1)?;
    let months = index.months();
    Some(Window::new(months[prev_start_idx], months[prev_end_idx]))
}

/// The default selection: the last `months_back` periods of the index.
pub fn default_window(index: &PeriodIndex, months_back: usize) -> Option<Window> {
    let end = index.last()?;
    let start_idx = index.len().saturating_sub(months_back.max(1));
    Some(Window::new(index.months()[start_idx], end))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn year_index(n: u32) -> PeriodIndex {
        PeriodIndex::from_months((1..=n).map(|m| Month::new(2024, m).unwrap()))
    }

    fn m(month: u32) -> Month {
        Month::new(2024, month).unwrap()
    }

    #[test]
    fn parse_labels() {
        assert_eq!(Month::parse_label("Jan 2025"), Month::new(2025, 1));
        assert_eq!(Month::parse_label(" september 2023 "), Month::new(2023, 9));
        assert_eq!(Month::parse_label("2024-11"), Month::new(2024, 11));
        assert_eq!(Month::parse_label("Foo 2024"), None);
        assert_eq!(Month::parse_label("Jan"), None);
        assert_eq!(Month::parse_label(""), None);
    }

    #[test]
    fn words_starting_with_a_month_are_not_months() {
        assert_eq!(Month::parse_label("Junk 2025"), None);
        assert_eq!(Month::parse_label("Mayhem 2025"), None);
        assert_eq!(Month::parse_label("Decoy 2025"), None);
        assert_eq!(Month::parse_label("Sept 2025"), None);
        assert_eq!(Month::parse_label("MAY 2025"), Month::new(2025, 5));
        assert_eq!(Month::parse_label("december 2025"), Month::new(2025, 12));
    }

    #[test]
    fn label_round_trip_and_month_end() {
        let feb = Month::new(2024, 2).unwrap();
        assert_eq!(feb.label(), "Feb 2024");
        assert_eq!(feb.month_end(), NaiveDate::from_ymd_opt(2024, 2, 29));
        let dec = Month::new(2023, 12).unwrap();
        assert_eq!(dec.month_end(), NaiveDate::from_ymd_opt(2023, 12, 31));
    }

    #[test]
    fn shift_across_years() {
        let jan = Month::new(2025, 1).unwrap();
        assert_eq!(jan.shift(-1), Month::new(2024, 12).unwrap());
        assert_eq!(jan.shift(-13), Month::new(2023, 12).unwrap());
        assert_eq!(jan.shift(23), Month::new(2026, 12).unwrap());
    }

    #[test]
    fn excel_serial() {
        // 45658 is 2025-01-01.
        assert_eq!(Month::from_excel_serial(45658.0), Month::new(2025, 1));
        assert_eq!(Month::from_excel_serial(-3.0), None);
        assert_eq!(excel_serial_date(45658.75), NaiveDate::from_ymd_opt(2025, 1, 1));
    }

    #[test]
    fn index_is_sorted_and_unique() {
        let idx = PeriodIndex::from_months(vec![m(3), m(1), m(3), m(2), m(1)]);
        assert_eq!(idx.months(), &[m(1), m(2), m(3)]);
        let again = PeriodIndex::from_months(vec![m(3), m(1), m(3), m(2), m(1)]);
        assert_eq!(idx, again);
    }

    #[test]
    fn previous_window_same_length() {
        let idx = year_index(12);
        assert_eq!(
            previous_window(&idx, m(7), m(12)),
            Some(Window::new(m(1), m(6)))
        );
        // Reversed selection is swapped.
        assert_eq!(
            previous_window(&idx, m(12), m(7)),
            Some(Window::new(m(1), m(6)))
        );
        assert_eq!(
            previous_window(&idx, m(2), m(2)),
            Some(Window::new(m(1), m(1)))
        );
    }

    #[test]
    fn previous_window_without_history() {
        let idx = year_index(12);
        assert_eq!(previous_window(&idx, m(1), m(3)), None);
        assert_eq!(previous_window(&idx, m(3), m(8)), None);
        // Not in the index.
        assert_eq!(
            previous_window(&idx, Month::new(2030, 1).unwrap(), m(3)),
            None
        );
    }

    #[test]
    fn previous_window_follows_index_gaps() {
        let idx = PeriodIndex::from_months(vec![m(1), m(2), m(5), m(6)]);
        assert_eq!(
            previous_window(&idx, m(5), m(6)),
            Some(Window::new(m(1), m(2)))
        );
    }

    #[test]
    fn default_window_clamps() {
        let idx = year_index(4);
        assert_eq!(default_window(&idx, 12), Some(Window::new(m(1), m(4))));
        assert_eq!(default_window(&idx, 2), Some(Window::new(m(3), m(4))));
        assert_eq!(default_window(&PeriodIndex::default(), 3), None);
    }

    fn table(months: &[Option<Month>]) -> MonthlyTable {
        MonthlyTable {
            period_column: "Month".to_string(),
            columns: vec!["Value".to_string()],
            rows: months
                .iter()
                .map(|p| crate::table::MonthlyRow {
                    label: p.map(|m| m.label()).unwrap_or_else(|| "Total".to_string()),
                    period: *p,
                    values: vec![Some(1.0)],
                })
                .collect(),
        }
    }

    #[test]
    fn index_skips_tables_without_periods() {
        let ds = Dataset {
            monthly_unique: Some(table(&[None, None])),
            monthly_enroll: Some(table(&[Some(m(3)), Some(m(2))])),
            mau: Some(table(&[Some(m(7))])),
            ..Dataset::default()
        };
        assert_eq!(PeriodIndex::from_dataset(&ds).months(), &[m(2), m(3)]);

        let ds = Dataset {
            monthly_unique: None,
            monthly_enroll: Some(table(&[None])),
            mau: Some(table(&[Some(m(7)), Some(m(6))])),
            activation: Some(table(&[Some(m(1))])),
            ..Dataset::default()
        };
        assert_eq!(PeriodIndex::from_dataset(&ds).months(), &[m(6), m(7)]);

        let ds = Dataset {
            activation: Some(table(&[Some(m(5))])),
            ..Dataset::default()
        };
        assert_eq!(PeriodIndex::from_dataset(&ds).months(), &[m(5)]);
        assert!(PeriodIndex::from_dataset(&Dataset::default()).is_empty());
    }
}
