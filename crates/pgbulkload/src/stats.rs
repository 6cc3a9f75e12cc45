//! Per-label load statistics.
//!
//! Every component of a run reports into a shared [`Stats`] table keyed by
//! a free-form label (usually a table name or a schema-phase name such as
//! `"Create Indexes"`). Counters are plain signed integers: `rows` is
//! deliberately allowed to go negative for a moment while a failed batch is
//! un-counted and its halves are re-counted.

use std::collections::BTreeMap;
use std::sync::Mutex;
use std::time::Instant;

use serde::Serialize;

/// Counter fields tracked per label.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    /// Rows emitted by the reader.
    Read,
    /// Rows accepted by PostgreSQL.
    Rows,
    /// Rows rejected by the reader or writer.
    Errs,
}

/// Counters for one label.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct LabelStats {
    pub read: i64,
    pub rows: i64,
    pub errs: i64,
    pub secs: f64,
}

/// Process-wide statistics table for one run.
///
/// Safe for concurrent updates from the reader, writer and index tasks;
/// each update takes the table lock briefly.
#[derive(Debug, Default)]
pub struct Stats {
    inner: Mutex<BTreeMap<String, LabelStats>>,
}

impl Stats {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `delta` (possibly negative) to one field of `label`.
    /// The label is created on first use.
    pub fn incr(&self, label: &str, field: Field, delta: i64) {
        let mut inner = self.inner.lock().unwrap();
        let entry = inner.entry(label.to_string()).or_default();
        match field {
            Field::Read => entry.read += delta,
            Field::Rows => entry.rows += delta,
            Field::Errs => entry.errs += delta,
        }
    }

    /// Add wall-clock seconds to `label`.
    pub fn add_timing(&self, label: &str, secs: f64) {
        let mut inner = self.inner.lock().unwrap();
        inner.entry(label.to_string()).or_default().secs += secs;
    }

    /// Set `rows` for a label from a server-reported result count,
    /// replacing whatever was accumulated.
    pub fn set_rows_from_result(&self, label: &str, n: i64) {
        let mut inner = self.inner.lock().unwrap();
        inner.entry(label.to_string()).or_default().rows = n;
    }

    /// Start a timed section for `label`. Elapsed time is recorded when the
    /// returned handle goes out of scope, on every exit path.
    pub fn scoped_timer<'a>(&'a self, label: &str) -> ScopedTimer<'a> {
        ScopedTimer {
            stats: self,
            label: label.to_string(),
            start: Instant::now(),
        }
    }

    /// Counters for one label (zeroes if never touched).
    pub fn get(&self, label: &str) -> LabelStats {
        self.inner
            .lock()
            .unwrap()
            .get(label)
            .copied()
            .unwrap_or_default()
    }

    /// Snapshot of every label, sorted by name.
    pub fn snapshot(&self) -> BTreeMap<String, LabelStats> {
        self.inner.lock().unwrap().clone()
    }

    /// Sum counters over a set of labels.
    pub fn total(&self, labels: &[String]) -> LabelStats {
        let inner = self.inner.lock().unwrap();
        let mut out = LabelStats::default();
        for label in labels {
            if let Some(s) = inner.get(label) {
                out.read += s.read;
                out.rows += s.rows;
                out.errs += s.errs;
                out.secs += s.secs;
            }
        }
        out
    }

    /// Render all labels as an aligned table under a heading.
    pub fn render(&self, summary: &str) -> String {
        let snapshot = self.snapshot();
        let width = snapshot
            .keys()
            .map(|k| k.len())
            .chain(std::iter::once(summary.len()))
            .max()
            .unwrap_or(0)
            .max(10);

        let mut out = format!(
            "{:<width$}  {:>12} {:>12} {:>8} {:>10}\n",
            summary,
            "read",
            "rows",
            "errs",
            "secs",
            width = width
        );
        for (label, s) in &snapshot {
            out.push_str(&format!(
                "{:<width$}  {:>12} {:>12} {:>8} {:>10.3}\n",
                label,
                s.read,
                s.rows,
                s.errs,
                s.secs,
                width = width
            ));
        }
        out
    }
}

/// Guard returned by [`Stats::scoped_timer`].
pub struct ScopedTimer<'a> {
    stats: &'a Stats,
    label: String,
    start: Instant,
}

impl Drop for ScopedTimer<'_> {
    fn drop(&mut self) {
        self.stats
            .add_timing(&self.label, self.start.elapsed().as_secs_f64());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_incr_creates_label() {
        let stats = Stats::new();
        stats.incr("orders", Field::Read, 3);
        assert_eq!(stats.get("orders").read, 3);
        assert_eq!(stats.get("orders").rows, 0);
    }

    #[test]
    fn test_rows_may_go_negative_across_split() {
        let stats = Stats::new();
        // Batch of 2 counted on send, un-counted on failure, halves re-counted.
        stats.incr("t", Field::Rows, 2);
        stats.incr("t", Field::Rows, -2);
        stats.incr("t", Field::Rows, -1);
        assert_eq!(stats.get("t").rows, -1);
        stats.incr("t", Field::Rows, 1);
        stats.incr("t", Field::Rows, 1);
        assert_eq!(stats.get("t").rows, 1);
    }

    #[test]
    fn test_singleton_drop_accounting() {
        // P3: a failed batch of size 1 leaves rows unchanged and errs +1.
        let stats = Stats::new();
        stats.incr("t", Field::Read, 1);
        stats.incr("t", Field::Rows, 1);
        stats.incr("t", Field::Rows, -1);
        stats.incr("t", Field::Errs, 1);
        let s = stats.get("t");
        assert_eq!(s.rows, 0);
        assert_eq!(s.errs, 1);
        // P1: rows + errs <= read.
        assert!(s.rows + s.errs <= s.read);
    }

    #[test]
    fn test_scoped_timer_records_on_drop() {
        let stats = Stats::new();
        {
            let _t = stats.scoped_timer("phase");
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert!(stats.get("phase").secs > 0.0);
    }

    #[test]
    fn test_scoped_timer_records_on_panic_path() {
        let stats = Arc::new(Stats::new());
        let stats2 = Arc::clone(&stats);
        let result = std::panic::catch_unwind(move || {
            let _t = stats2.scoped_timer("phase");
            panic!("boom");
        });
        assert!(result.is_err());
        assert!(stats.get("phase").secs >= 0.0);
    }

    #[test]
    fn test_set_rows_from_result() {
        let stats = Stats::new();
        stats.incr("seqs", Field::Rows, 99);
        stats.set_rows_from_result("seqs", 4);
        assert_eq!(stats.get("seqs").rows, 4);
    }

    #[test]
    fn test_concurrent_updates() {
        let stats = Arc::new(Stats::new());
        let mut handles = Vec::new();
        for _ in 0..8 {
            let stats = Arc::clone(&stats);
            handles.push(std::thread::spawn(move || {
                for _ in 0..1000 {
                    stats.incr("t", Field::Read, 1);
                }
            }));
        }
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(stats.get("t").read, 8000);
    }

    #[test]
    fn test_total_over_labels() {
        let stats = Stats::new();
        stats.incr("a", Field::Rows, 2);
        stats.incr("b", Field::Rows, 3);
        stats.incr("c", Field::Rows, 5);
        let t = stats.total(&["a".to_string(), "b".to_string()]);
        assert_eq!(t.rows, 5);
    }

    #[test]
    fn test_render_contains_labels() {
        let stats = Stats::new();
        stats.incr("orders", Field::Rows, 10);
        let out = stats.render("table");
        assert!(out.contains("orders"));
        assert!(out.contains("rows"));
    }
}
