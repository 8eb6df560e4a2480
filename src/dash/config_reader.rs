use log::debug;
use snafu::prelude::*;

use serde::{Deserialize, Serialize};
use serde_json::Value as JSValue;
use std::collections::HashMap;
use std::fs;
use std::time::Duration;

use dashboard_analytics::insights::OpportunityRule;
use dashboard_analytics::table::SheetKey;
use dashboard_analytics::DashboardSettings;

use crate::dash::cache::DEFAULT_TTL_SECONDS;
use crate::dash::*;

#[derive(PartialEq, Debug, Clone, Serialize, Deserialize)]
pub struct OpportunitySettings {
    pub quantile: Option<f64>,
    #[serde(rename = "minRowsForQuantile")]
    pub min_rows_for_quantile: Option<usize>,
}

/// The configuration file. Every field is optional.
#[derive(PartialEq, Debug, Clone, Default, Serialize, Deserialize)]
pub struct DashConfig {
    #[serde(rename = "filePath")]
    pub file_path: Option<String>,
    /// Sheet key (`Monthly_Enroll`, `MAU`, ...) to the name of the sheet in the workbook.
    #[serde(rename = "sheetNames")]
    pub sheet_names: Option<HashMap<String, String>>,
    #[serde(rename = "funnelStageOrder")]
    pub funnel_stage_order: Option<Vec<String>>,
    #[serde(rename = "cacheTtlSeconds")]
    pub cache_ttl_seconds: Option<u64>,
    pub preset: Option<String>,
    pub opportunity: Option<OpportunitySettings>,
    #[serde(rename = "outputPath")]
    pub output_path: Option<String>,
}

impl DashConfig {
    pub fn settings(&self) -> DashboardSettings {
        let mut res = DashboardSettings::default();
        if let Some(order) = &self.funnel_stage_order {
            res.stage_order = order.clone();
        }
        if let Some(o) = &self.opportunity {
            res.opportunity = OpportunityRule {
                quantile: o.quantile.unwrap_or(res.opportunity.quantile),
                min_rows_for_quantile: o
                    .min_rows_for_quantile
                    .unwrap_or(res.opportunity.min_rows_for_quantile),
            };
        }
        res
    }

    /// The sheet names to read, with the overrides of the configuration applied.
    pub fn sheet_names(&self) -> DashResult<HashMap<SheetKey, String>> {
        let mut res: HashMap<SheetKey, String> = SheetKey::ALL
            .iter()
            .map(|k| (*k, k.default_sheet_name().to_string()))
            .collect();
        if let Some(overrides) = &self.sheet_names {
            for (key, name) in overrides.iter() {
                let k = SheetKey::from_key(key).context(UnknownSheetKeySnafu { key })?;
                res.insert(k, name.clone());
            }
        }
        Ok(res)
    }

    pub fn cache_ttl(&self) -> Duration {
        Duration::from_secs(self.cache_ttl_seconds.unwrap_or(DEFAULT_TTL_SECONDS))
    }
}

pub fn read_config(path: &str) -> DashResult<DashConfig> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    parse_config(&contents)
}

pub fn parse_config(contents: &str) -> DashResult<DashConfig> {
    let config: DashConfig = serde_json::from_str(contents).context(ParsingJsonSnafu {})?;
    debug!("parse_config: {:?}", config);
    if let Some(q) = config.opportunity.as_ref().and_then(|o| o.quantile) {
        ensure!((0.0..=1.0).contains(&q), InvalidQuantileSnafu { quantile: q });
    }
    Ok(config)
}

pub fn read_summary(path: &str) -> DashResult<JSValue> {
    let contents = fs::read_to_string(path).context(OpeningJsonSnafu { path })?;
    let js: JSValue = serde_json::from_str(contents.as_str()).context(ParsingJsonSnafu {})?;
    debug!("read_summary: {} top-level keys", js.as_object().map_or(0, |o| o.len()));
    Ok(js)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_config() {
        let c = parse_config("{}").unwrap();
        assert_eq!(c, DashConfig::default());
        assert_eq!(c.settings(), DashboardSettings::default());
        assert_eq!(c.cache_ttl(), Duration::from_secs(3600));
        let names = c.sheet_names().unwrap();
        assert_eq!(names[&SheetKey::Mau], "MAU");
    }

    #[test]
    fn full_config() {
        let c = parse_config(
            r#"{
                "filePath": "stats.xlsx",
                "sheetNames": {"Monthly_Enroll": "Enrollments 2025"},
                "funnelStageOrder": ["Enrolled", "Completed"],
                "cacheTtlSeconds": 60,
                "preset": "Geo Team",
                "opportunity": {"quantile": 0.9},
                "outputPath": "stdout"
            }"#,
        )
        .unwrap();
        assert_eq!(c.file_path.as_deref(), Some("stats.xlsx"));
        assert_eq!(c.cache_ttl(), Duration::from_secs(60));
        let s = c.settings();
        assert_eq!(s.stage_order, vec!["Enrolled", "Completed"]);
        assert_eq!(s.opportunity.quantile, 0.9);
        assert_eq!(s.opportunity.min_rows_for_quantile, 10);
        let names = c.sheet_names().unwrap();
        assert_eq!(names[&SheetKey::MonthlyEnroll], "Enrollments 2025");
        assert_eq!(names[&SheetKey::Course], "Course Sign-Up Sheet");
    }

    #[test]
    fn bad_configs() {
        assert!(parse_config("{\"cacheTtlSeconds\": \"soon\"}").is_err());
        assert!(parse_config("{\"opportunity\": {\"quantile\": 80}}").is_err());
        let c = parse_config("{\"sheetNames\": {\"Revenue\": \"Money\"}}").unwrap();
        assert!(c.sheet_names().is_err());
    }
}
