//! Final run report.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::error::Result;
use crate::stats::LabelStats;

/// One phase total ("before load", "load", "indexes", "after load").
#[derive(Debug, Clone, Serialize)]
pub struct PhaseTotal {
    pub name: String,
    #[serde(flatten)]
    pub stats: LabelStats,
}

/// Result of a load run: per-label counters plus phase totals.
#[derive(Debug, Clone, Serialize)]
pub struct LoadReport {
    /// When the run started.
    pub started_at: DateTime<Utc>,

    /// When the run completed.
    pub completed_at: DateTime<Utc>,

    /// Total duration in seconds.
    pub duration_seconds: f64,

    /// Tables attempted.
    pub tables_total: usize,

    /// Tables that failed fatally.
    pub tables_failed: usize,

    /// Names of the failed tables.
    pub failed_tables: Vec<String>,

    /// Rows visible in the target.
    pub rows_loaded: i64,

    /// Average load throughput.
    pub rows_per_second: i64,

    /// Every stats label of the run.
    pub labels: BTreeMap<String, LabelStats>,

    /// Phase totals in presentation order.
    pub phases: Vec<PhaseTotal>,
}

impl LoadReport {
    /// Whether the run should exit non-zero.
    pub fn has_failures(&self) -> bool {
        self.tables_failed > 0
    }

    /// Convert to pretty JSON.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Render the per-label table and phase totals as aligned text.
    pub fn render(&self) -> String {
        let width = self
            .labels
            .keys()
            .map(|k| k.len())
            .chain(self.phases.iter().map(|p| p.name.len()))
            .max()
            .unwrap_or(10)
            .max(12);

        let mut out = String::new();
        out.push_str(&format!(
            "{:>width$}  {:>12} {:>12} {:>8} {:>10}\n",
            "table name",
            "read",
            "rows",
            "errs",
            "secs",
            width = width
        ));
        let rule = format!(
            "{:->width$}  {:->12} {:->12} {:->8} {:->10}\n",
            "", "", "", "", "",
            width = width
        );
        out.push_str(&rule);

        for (label, s) in &self.labels {
            out.push_str(&format_line(label, s, width));
        }

        out.push_str(&rule);
        for phase in &self.phases {
            out.push_str(&format_line(&phase.name, &phase.stats, width));
        }

        if !self.failed_tables.is_empty() {
            out.push_str(&format!("\nfailed tables: {}\n", self.failed_tables.join(", ")));
        }
        out
    }
}

fn format_line(label: &str, s: &LabelStats, width: usize) -> String {
    format!(
        "{:>width$}  {:>12} {:>12} {:>8} {:>10.3}\n",
        label,
        s.read,
        s.rows,
        s.errs,
        s.secs,
        width = width
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    fn report() -> LoadReport {
        let mut labels = BTreeMap::new();
        labels.insert(
            "public.orders".to_string(),
            LabelStats {
                read: 1000,
                rows: 999,
                errs: 1,
                secs: 0.5,
            },
        );
        LoadReport {
            started_at: Utc::now(),
            completed_at: Utc::now(),
            duration_seconds: 1.25,
            tables_total: 1,
            tables_failed: 0,
            failed_tables: Vec::new(),
            rows_loaded: 999,
            rows_per_second: 799,
            labels,
            phases: vec![PhaseTotal {
                name: "load".to_string(),
                stats: LabelStats {
                    read: 1000,
                    rows: 999,
                    errs: 1,
                    secs: 0.5,
                },
            }],
        }
    }

    #[test]
    fn test_render_contains_label_and_phase() {
        let text = report().render();
        assert!(text.contains("public.orders"));
        assert!(text.contains("load"));
        assert!(text.contains("999"));
    }

    #[test]
    fn test_to_json_roundtrips() {
        let json = report().to_json().unwrap();
        let value: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(value["tables_total"], 1);
        assert_eq!(value["labels"]["public.orders"]["rows"], 999);
        assert_eq!(value["phases"][0]["name"], "load");
    }

    #[test]
    fn test_has_failures() {
        let mut r = report();
        assert!(!r.has_failures());
        r.tables_failed = 1;
        r.failed_tables.push("public.big".to_string());
        assert!(r.has_failures());
        assert!(r.render().contains("failed tables: public.big"));
    }
}
