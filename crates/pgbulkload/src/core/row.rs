//! Rows and batches as they travel from a reader to the writer.
//!
//! Cells carry the textual representation targeted at COPY text format;
//! `None` becomes `\N` on the wire. A batch never crosses a table boundary.

/// One source row: ordered, nullable cells.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Row {
    pub cells: Vec<Option<String>>,
}

impl Row {
    pub fn new(cells: Vec<Option<String>>) -> Self {
        Self { cells }
    }

    /// All-NULL row of the given width.
    pub fn nulls(width: usize) -> Self {
        Self {
            cells: vec![None; width],
        }
    }

    /// Approximate encoded size, used against the batch byte cap.
    pub fn encoded_size(&self) -> usize {
        self.cells
            .iter()
            .map(|c| c.as_deref().map(str::len).unwrap_or(2) + 1)
            .sum()
    }

    /// Short single-line rendering for error logs.
    pub fn preview(&self, max_len: usize) -> String {
        let mut out = String::new();
        for (i, cell) in self.cells.iter().enumerate() {
            if i > 0 {
                out.push('|');
            }
            match cell {
                Some(v) => out.push_str(v),
                None => out.push_str("<null>"),
            }
            if out.len() > max_len {
                out.truncate(max_len);
                out.push_str("...");
                break;
            }
        }
        out
    }
}

/// Batch sizing and queue depth for one pipeline.
#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    /// Maximum rows per batch.
    pub rows: usize,
    /// Maximum approximate bytes per batch.
    pub bytes: usize,
    /// Bounded queue capacity between reader and writer.
    pub concurrent_batches: usize,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            rows: 25_000,
            bytes: 20 * 1024 * 1024,
            concurrent_batches: 4,
        }
    }
}

/// A contiguous group of rows loaded in a single transaction.
#[derive(Debug, Clone)]
pub struct Batch {
    pub rows: Vec<Row>,
    /// Approximate encoded size of all rows.
    pub bytes: usize,
    /// Source ordinal of the first row (0-based).
    pub first_ordinal: u64,
}

impl Batch {
    pub fn new(first_ordinal: u64) -> Self {
        Self {
            rows: Vec::new(),
            bytes: 0,
            first_ordinal,
        }
    }

    pub fn push(&mut self, row: Row) {
        self.bytes += row.encoded_size();
        self.rows.push(row);
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Whether the batch reached either cap. A single oversized row still
    /// travels alone: the check runs after the row was pushed.
    pub fn is_full(&self, cfg: &BatchConfig) -> bool {
        self.rows.len() >= cfg.rows || self.bytes >= cfg.bytes
    }

    /// Split into halves for retry after a batch-level failure.
    /// The first half keeps the original starting ordinal.
    pub fn split(self) -> (Batch, Batch) {
        let mid = self.rows.len() / 2;
        let mut first = Batch::new(self.first_ordinal);
        let mut second = Batch::new(self.first_ordinal + mid as u64);
        for (i, row) in self.rows.into_iter().enumerate() {
            if i < mid {
                first.push(row);
            } else {
                second.push(row);
            }
        }
        (first, second)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(v: &str) -> Row {
        Row::new(vec![Some(v.to_string())])
    }

    #[test]
    fn test_batch_caps() {
        let cfg = BatchConfig {
            rows: 3,
            bytes: 1 << 20,
            concurrent_batches: 1,
        };
        let mut batch = Batch::new(0);
        batch.push(row("a"));
        batch.push(row("b"));
        assert!(!batch.is_full(&cfg));
        batch.push(row("c"));
        assert!(batch.is_full(&cfg));
    }

    #[test]
    fn test_oversized_single_row_fills_batch() {
        // B3: one row bigger than the byte cap becomes a singleton batch.
        let cfg = BatchConfig {
            rows: 1000,
            bytes: 8,
            concurrent_batches: 1,
        };
        let mut batch = Batch::new(0);
        batch.push(row("0123456789abcdef"));
        assert!(batch.is_full(&cfg));
        assert_eq!(batch.len(), 1);
    }

    #[test]
    fn test_split_preserves_order_and_ordinals() {
        let mut batch = Batch::new(100);
        for v in ["a", "b", "c", "d", "e"] {
            batch.push(row(v));
        }
        let (first, second) = batch.split();
        assert_eq!(first.len(), 2);
        assert_eq!(second.len(), 3);
        assert_eq!(first.first_ordinal, 100);
        assert_eq!(second.first_ordinal, 102);
        assert_eq!(first.rows[0].cells[0].as_deref(), Some("a"));
        assert_eq!(second.rows[0].cells[0].as_deref(), Some("c"));
    }

    #[test]
    fn test_split_singleton_terminates() {
        let mut batch = Batch::new(0);
        batch.push(row("only"));
        let (first, second) = batch.split();
        assert_eq!(first.len(), 0);
        assert_eq!(second.len(), 1);
    }

    #[test]
    fn test_row_preview_truncates() {
        let r = Row::new(vec![Some("x".repeat(500)), None]);
        let p = r.preview(64);
        assert!(p.len() <= 64 + 3);
        assert!(p.ends_with("..."));
    }

    #[test]
    fn test_null_row() {
        let r = Row::nulls(3);
        assert_eq!(r.cells, vec![None, None, None]);
    }
}
