use calamine::{open_workbook, DataType, Range, Reader, Xlsx};
use log::{debug, info, warn};
use snafu::prelude::*;
use std::collections::HashMap;

use dashboard_analytics::period::excel_serial_date;
use dashboard_analytics::table::{Cell, Dataset, DatasetLoad, RawTable, SheetKey};

use crate::dash::*;

pub fn convert_cell(cell: &DataType) -> Cell {
    match cell {
        DataType::Int(i) => Cell::Number(*i as f64),
        DataType::Float(f) => Cell::Number(*f),
        DataType::String(s) => Cell::Text(s.clone()),
        DataType::Bool(b) => Cell::Text(b.to_string()),
        DataType::DateTime(serial) => excel_serial_date(*serial).map_or(Cell::Empty, Cell::Date),
        _ => Cell::Empty,
    }
}

/// The first row is the header. Rows with only empty cells are dropped.
pub fn range_to_table(range: &Range<DataType>) -> RawTable {
    let mut iter = range.rows();
    let header: Vec<String> = match iter.next() {
        Some(row) => row
            .iter()
            .map(|c| convert_cell(c).as_text().trim().to_string())
            .collect(),
        None => return RawTable::default(),
    };
    let rows: Vec<Vec<Cell>> = iter
        .map(|row| row.iter().map(convert_cell).collect::<Vec<Cell>>())
        .filter(|row| row.iter().any(|c| *c != Cell::Empty))
        .collect();
    RawTable { header, rows }
}

/// Reads the sheets of the dashboard. Sheets absent from the workbook are reported as missing
/// in the returned load, not as errors.
pub fn read_workbook(path: &str, sheet_names: &HashMap<SheetKey, String>) -> DashResult<DatasetLoad> {
    let mut workbook: Xlsx<_> = open_workbook(path).context(OpeningExcelSnafu { path })?;
    let available: Vec<String> = workbook.sheet_names().to_vec();
    debug!("read_workbook: sheets in {:?}: {:?}", path, available);

    let mut missing: Vec<&str> = vec![];
    let mut raw: HashMap<SheetKey, RawTable> = HashMap::new();
    for key in SheetKey::ALL {
        let name = match sheet_names.get(&key) {
            Some(n) => n.as_str(),
            None => key.default_sheet_name(),
        };
        if !available.iter().any(|s| s == name) {
            missing.push(name);
            continue;
        }
        let range = workbook
            .worksheet_range(name)
            .context(EmptyExcelSnafu { name })?
            .context(OpeningExcelSnafu { path })?;
        let table = range_to_table(&range);
        debug!(
            "read_workbook: sheet {:?}: {} rows, header {:?}",
            name,
            table.rows.len(),
            table.header
        );
        raw.insert(key, table);
    }
    if !missing.is_empty() {
        warn!("Missing sheets in workbook: {}", missing.join(", "));
    }
    let load = Dataset::from_raw_tables(raw);
    info!(
        "read_workbook: {} sheets read, {} missing, {} with schema problems",
        SheetKey::ALL.len() - load.missing_sheets.len() - load.schema_problems.len(),
        load.missing_sheets.len(),
        load.schema_problems.len()
    );
    Ok(load)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    #[test]
    fn cells() {
        assert_eq!(convert_cell(&DataType::Int(3)), Cell::Number(3.0));
        assert_eq!(
            convert_cell(&DataType::String("Jan 2025".to_string())),
            Cell::Text("Jan 2025".to_string())
        );
        assert_eq!(
            convert_cell(&DataType::DateTime(45658.0)),
            Cell::Date(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap())
        );
        assert_eq!(convert_cell(&DataType::DateTime(-1.0)), Cell::Empty);
        assert_eq!(convert_cell(&DataType::Empty), Cell::Empty);
    }

    #[test]
    fn header_and_rows() {
        let mut r: Range<DataType> = Range::new((0, 0), (3, 1));
        r.set_value((0, 0), DataType::String(" Month ".to_string()));
        r.set_value((0, 1), DataType::String("Enrollments".to_string()));
        r.set_value((1, 0), DataType::DateTime(45658.0));
        r.set_value((1, 1), DataType::Float(100.0));
        r.set_value((3, 0), DataType::String("Feb 2025".to_string()));
        r.set_value((3, 1), DataType::Int(250));
        let t = range_to_table(&r);
        assert_eq!(t.header, vec!["Month", "Enrollments"]);
        assert_eq!(t.rows.len(), 2);
        assert_eq!(t.rows[1][1], Cell::Number(250.0));

        let load = Dataset::from_raw_tables(HashMap::from([(SheetKey::MonthlyEnroll, t)]));
        let enroll = load.dataset.monthly_enroll.unwrap();
        assert_eq!(enroll.rows.len(), 2);
        assert_eq!(enroll.rows[0].label, "Jan 2025");
    }

    #[test]
    fn missing_file() {
        let names: HashMap<SheetKey, String> = HashMap::new();
        assert!(read_workbook("/no/such/stats.xlsx", &names).is_err());
    }
}
