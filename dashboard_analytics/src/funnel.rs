use log::{debug, warn};
use std::collections::HashMap;

use crate::table::StageCount;

pub const DEFAULT_STAGE_ORDER: [&str; 4] = ["Enrolled", "Started", "In Progress", "Completed"];

pub const STAGE_ORDER_WARNING: &str =
    "Funnel stages don't fully match configured order; using sheet order.";

/// One stage of the funnel, with its share of the base count.
#[derive(PartialEq, Debug, Clone)]
pub struct FunnelStage {
    pub stage: String,
    pub count: f64,
    pub pct_of_base: f64,
    /// `"{count} ({pct}%)"`, for chart labels.
    pub label: String,
}

/// The loss between two adjacent stages.
///
/// A negative drop means that a later stage has more users than the previous one, which
/// usually points to a data problem. It is reported as is.
#[derive(PartialEq, Debug, Clone)]
pub struct StageDrop {
    pub from: String,
    pub to: String,
    pub drop_abs: i64,
    pub drop_pct: f64,
}

impl StageDrop {
    pub fn label(&self) -> String {
        format!("{} → {}", self.from, self.to)
    }
}

#[derive(PartialEq, Debug, Clone)]
pub struct FunnelReport {
    pub stages: Vec<FunnelStage>,
    /// Set when the stage names did not all match the configured order.
    pub warning: Option<String>,
    /// Drops between adjacent stages, in funnel order.
    pub drops: Vec<StageDrop>,
}

impl FunnelReport {
    /// The drops sorted by decreasing drop percentage. Ties keep the funnel order.
    pub fn drops_by_severity(&self) -> Vec<StageDrop> {
        let mut res = self.drops.clone();
        res.sort_by(|a, b| b.drop_pct.total_cmp(&a.drop_pct));
        res
    }

    pub fn biggest_drop(&self) -> Option<StageDrop> {
        self.drops_by_severity().into_iter().next()
    }
}

/// One decimal, ties rounded away from zero (`0.25` → `0.3`), not to the even neighbour.
fn round1(x: f64) -> f64 {
    (x * 10.0).round() / 10.0
}

/// Builds the funnel and its drop diagnostics from the raw stage counts.
///
/// Stages are sorted by `stage_order` (case-insensitive) when every stage name is part of
/// it, and left in sheet order otherwise. Percentages are relative to the first stage, or to
/// the largest stage when the first one is empty. Returns `None` when there is no table.
pub fn compute_funnel(rows: Option<&[StageCount]>, stage_order: &[String]) -> Option<FunnelReport> {
    let rows = rows?;
    let mut stages: Vec<(String, f64)> = rows
        .iter()
        .map(|r| (r.stage.trim().to_string(), r.count.unwrap_or(0.0)))
        .collect();

    let order: HashMap<String, usize> = stage_order
        .iter()
        .enumerate()
        .map(|(idx, s)| (s.to_lowercase(), idx))
        .collect();
    let all_known = stages
        .iter()
        .all(|(s, _)| order.contains_key(&s.to_lowercase()));
    let warning = if all_known {
        stages.sort_by_key(|(s, _)| order.get(&s.to_lowercase()).cloned().unwrap_or(usize::MAX));
        None
    } else {
        warn!(
            "compute_funnel: stages {:?} do not match the configured order {:?}",
            stages.iter().map(|(s, _)| s.clone()).collect::<Vec<String>>(),
            stage_order
        );
        Some(STAGE_ORDER_WARNING.to_string())
    };

    // Counts are whole users: the base is truncated like the counts in the sheet.
    let mut base = stages.first().map(|(_, c)| c.trunc()).unwrap_or(0.0);
    if base <= 0.0 {
        base = stages
            .iter()
            .map(|(_, c)| c.trunc())
            .fold(0.0, f64::max);
    }
    debug!("compute_funnel: base count {}", base);

    let funnel_stages: Vec<FunnelStage> = stages
        .iter()
        .map(|(stage, count)| {
            let pct_of_base = if base > 0.0 {
                round1(count / base * 100.0)
            } else {
                0.0
            };
            FunnelStage {
                stage: stage.clone(),
                count: *count,
                pct_of_base,
                label: format!("{} ({}%)", count.round() as i64, pct_of_base),
            }
        })
        .collect();

    let drops: Vec<StageDrop> = stages
        .windows(2)
        .map(|pair| {
            let (prev_stage, prev_val) = &pair[0];
            let (curr_stage, curr_val) = &pair[1];
            let drop_abs = prev_val - curr_val;
            let drop_pct = if *prev_val > 0.0 {
                drop_abs / prev_val * 100.0
            } else {
                0.0
            };
            StageDrop {
                from: prev_stage.clone(),
                to: curr_stage.clone(),
                drop_abs: drop_abs.round() as i64,
                drop_pct: round1(drop_pct),
            }
        })
        .collect();

    Some(FunnelReport {
        stages: funnel_stages,
        warning,
        drops,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn stages(data: &[(&str, f64)]) -> Vec<StageCount> {
        data.iter()
            .map(|(s, c)| StageCount {
                stage: s.to_string(),
                count: Some(*c),
            })
            .collect()
    }

    fn default_order() -> Vec<String> {
        DEFAULT_STAGE_ORDER.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn basic_funnel() {
        let rows = stages(&[("Enrolled", 1000.0), ("Started", 600.0), ("Completed", 200.0)]);
        let f = compute_funnel(Some(rows.as_slice()), &default_order()).unwrap();
        let pcts: Vec<f64> = f.stages.iter().map(|s| s.pct_of_base).collect();
        assert_eq!(pcts, vec![100.0, 60.0, 20.0]);
        assert_eq!(f.stages[1].label, "600 (60%)");
        assert_eq!(f.warning, None);
        assert_eq!(
            f.drops,
            vec![
                StageDrop {
                    from: "Enrolled".to_string(),
                    to: "Started".to_string(),
                    drop_abs: 400,
                    drop_pct: 40.0
                },
                StageDrop {
                    from: "Started".to_string(),
                    to: "Completed".to_string(),
                    drop_abs: 400,
                    drop_pct: 66.7
                },
            ]
        );
        assert_eq!(f.drops[0].label(), "Enrolled → Started");
        assert_eq!(f.biggest_drop().unwrap().to, "Completed");
    }

    #[test]
    fn stages_are_reordered_case_insensitively() {
        let rows = stages(&[("completed", 10.0), ("ENROLLED", 100.0), ("Started", 50.0)]);
        let f = compute_funnel(Some(rows.as_slice()), &default_order()).unwrap();
        let names: Vec<&str> = f.stages.iter().map(|s| s.stage.as_str()).collect();
        assert_eq!(names, vec!["ENROLLED", "Started", "completed"]);
        assert_eq!(f.warning, None);
    }

    #[test]
    fn unknown_stage_keeps_sheet_order() {
        let rows = stages(&[("Completed", 10.0), ("Enrolled", 100.0), ("Certified", 5.0)]);
        let f = compute_funnel(Some(rows.as_slice()), &default_order()).unwrap();
        assert_eq!(f.stages[0].stage, "Completed");
        assert_eq!(f.warning.as_deref(), Some(STAGE_ORDER_WARNING));
        // Going from 10 to 100 is a negative drop, kept as is.
        assert_eq!(f.drops[0].drop_abs, -90);
        assert_eq!(f.drops[0].drop_pct, -900.0);
    }

    #[test]
    fn zero_first_stage_uses_max() {
        let rows = stages(&[("Enrolled", 0.0), ("Started", 400.0), ("Completed", 100.0)]);
        let f = compute_funnel(Some(rows.as_slice()), &default_order()).unwrap();
        let pcts: Vec<f64> = f.stages.iter().map(|s| s.pct_of_base).collect();
        assert_eq!(pcts, vec![0.0, 100.0, 25.0]);
        assert_eq!(f.drops[0].drop_pct, 0.0);
    }

    #[test]
    fn all_zero_counts() {
        let rows = stages(&[("Enrolled", 0.0), ("Started", 0.0), ("Completed", 0.0)]);
        let f = compute_funnel(Some(rows.as_slice()), &default_order()).unwrap();
        assert!(f.stages.iter().all(|s| s.pct_of_base == 0.0));
        assert_eq!(f.stages[0].label, "0 (0%)");
        assert!(f.drops.iter().all(|d| d.drop_pct == 0.0));
    }

    #[test]
    fn small_tables() {
        let one = stages(&[("Enrolled", 10.0)]);
        let f = compute_funnel(Some(one.as_slice()), &default_order()).unwrap();
        assert!(f.drops.is_empty());
        let f = compute_funnel(Some(&[][..]), &default_order()).unwrap();
        assert!(f.stages.is_empty());
        assert!(f.drops.is_empty());
        assert_eq!(compute_funnel(None, &default_order()), None);
    }

    #[test]
    fn severity_order_is_stable() {
        let rows = stages(&[
            ("Enrolled", 100.0),
            ("Started", 50.0),
            ("In Progress", 25.0),
            ("Completed", 5.0),
        ]);
        let f = compute_funnel(Some(rows.as_slice()), &default_order()).unwrap();
        let sorted: Vec<String> = f.drops_by_severity().iter().map(|d| d.label()).collect();
        assert_eq!(
            sorted,
            vec![
                "In Progress → Completed",
                "Enrolled → Started",
                "Started → In Progress"
            ]
        );
    }

    #[test]
    fn missing_counts_are_zero() {
        let rows = vec![
            StageCount {
                stage: "Enrolled".to_string(),
                count: Some(10.0),
            },
            StageCount {
                stage: "Started".to_string(),
                count: None,
            },
        ];
        let f = compute_funnel(Some(rows.as_slice()), &default_order()).unwrap();
        assert_eq!(f.stages[1].count, 0.0);
        assert_eq!(f.drops[0].drop_pct, 100.0);
    }

    #[test]
    fn ties_round_away_from_zero() {
        assert_eq!(round1(0.25), 0.3);
        assert_eq!(round1(-0.25), -0.3);
        assert_eq!(round1(66.66), 66.7);
    }
}
