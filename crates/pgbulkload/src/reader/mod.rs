//! Source readers.
//!
//! A [`Reader`] walks its source and hands rows to a [`RowEmitter`], which
//! assembles batches and pushes them into the pipeline's bounded queue.
//! The push blocks when the queue is full; that is the backpressure
//! mechanism. When the writer dies the queue closes, the next push reports
//! [`EmitStatus::Cancelled`], and the reader must return promptly,
//! releasing its source handle.

pub mod fixed;
pub mod mysql;

use std::mem;
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::core::row::{Batch, BatchConfig, Row};
use crate::error::Result;
use crate::stats::{Field, Stats};

pub use fixed::FixedReader;
pub use mysql::MysqlReader;

/// What the emitter tells the reader after each row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EmitStatus {
    Continue,
    /// The writer failed or the run was cancelled; stop reading.
    Cancelled,
}

/// One row source.
#[async_trait]
pub trait Reader: Send {
    /// Stats label, usually the qualified table name.
    fn label(&self) -> &str;

    /// Drive the source, emitting one row at a time in source order.
    ///
    /// A [`EmitStatus::Cancelled`] from the emitter is not an error: return
    /// `Ok(())` after releasing the source.
    async fn map_rows(&mut self, out: &mut RowEmitter) -> Result<()>;
}

/// Batch assembler between a reader and the pipeline queue.
pub struct RowEmitter {
    tx: mpsc::Sender<Batch>,
    cfg: BatchConfig,
    batch: Batch,
    next_ordinal: u64,
    label: String,
    stats: Arc<Stats>,
    cancel: CancellationToken,
}

impl RowEmitter {
    pub fn new(
        tx: mpsc::Sender<Batch>,
        cfg: BatchConfig,
        label: String,
        stats: Arc<Stats>,
        cancel: CancellationToken,
    ) -> Self {
        Self {
            tx,
            cfg,
            batch: Batch::new(0),
            next_ordinal: 0,
            label,
            stats,
            cancel,
        }
    }

    /// Hand one row over. Counts it as read, regardless of what the writer
    /// later decides. May block on the bounded queue.
    pub async fn emit(&mut self, row: Row) -> EmitStatus {
        if self.cancel.is_cancelled() {
            return EmitStatus::Cancelled;
        }
        self.stats.incr(&self.label, Field::Read, 1);
        self.next_ordinal += 1;
        self.batch.push(row);
        if self.batch.is_full(&self.cfg) {
            return self.flush().await;
        }
        EmitStatus::Continue
    }

    /// Push the in-progress batch, starting a new one.
    pub async fn flush(&mut self) -> EmitStatus {
        if self.batch.is_empty() {
            return EmitStatus::Continue;
        }
        let full = mem::replace(&mut self.batch, Batch::new(self.next_ordinal));
        match self.tx.send(full).await {
            Ok(()) => EmitStatus::Continue,
            Err(_) => EmitStatus::Cancelled,
        }
    }

    /// Record a decode/parse incident against this label's `errs`.
    pub fn record_rejected(&self) {
        self.stats.incr(&self.label, Field::Errs, 1);
    }

    pub fn label(&self) -> &str {
        &self.label
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn emitter(
        rows_cap: usize,
        queue_cap: usize,
    ) -> (RowEmitter, mpsc::Receiver<Batch>, Arc<Stats>, CancellationToken) {
        let (tx, rx) = mpsc::channel(queue_cap);
        let stats = Arc::new(Stats::new());
        let cancel = CancellationToken::new();
        let cfg = BatchConfig {
            rows: rows_cap,
            bytes: 1 << 20,
            concurrent_batches: queue_cap,
        };
        let em = RowEmitter::new(
            tx,
            cfg,
            "t".to_string(),
            Arc::clone(&stats),
            cancel.clone(),
        );
        (em, rx, stats, cancel)
    }

    fn row(v: &str) -> Row {
        Row::new(vec![Some(v.to_string())])
    }

    #[tokio::test]
    async fn test_batches_at_row_cap() {
        let (mut em, mut rx, stats, _cancel) = emitter(2, 4);
        assert_eq!(em.emit(row("a")).await, EmitStatus::Continue);
        assert_eq!(em.emit(row("b")).await, EmitStatus::Continue);
        assert_eq!(em.emit(row("c")).await, EmitStatus::Continue);
        assert_eq!(em.flush().await, EmitStatus::Continue);

        let first = rx.recv().await.unwrap();
        assert_eq!(first.len(), 2);
        assert_eq!(first.first_ordinal, 0);
        let second = rx.recv().await.unwrap();
        assert_eq!(second.len(), 1);
        assert_eq!(second.first_ordinal, 2);
        assert_eq!(stats.get("t").read, 3);
    }

    #[tokio::test]
    async fn test_flush_empty_is_noop() {
        let (mut em, mut rx, _stats, _cancel) = emitter(10, 4);
        assert_eq!(em.flush().await, EmitStatus::Continue);
        drop(em);
        assert!(rx.recv().await.is_none());
    }

    #[tokio::test]
    async fn test_cancelled_when_receiver_dropped() {
        let (mut em, rx, _stats, _cancel) = emitter(1, 1);
        drop(rx);
        assert_eq!(em.emit(row("a")).await, EmitStatus::Cancelled);
    }

    #[tokio::test]
    async fn test_cancelled_by_token() {
        let (mut em, _rx, stats, cancel) = emitter(10, 4);
        cancel.cancel();
        assert_eq!(em.emit(row("a")).await, EmitStatus::Cancelled);
        // The cancelled row was never handed over.
        assert_eq!(stats.get("t").read, 0);
    }

    #[tokio::test]
    async fn test_backpressure_blocks_until_consumed() {
        let (mut em, mut rx, _stats, _cancel) = emitter(1, 1);
        assert_eq!(em.emit(row("a")).await, EmitStatus::Continue);
        // Queue is now full; the next emit must wait for a recv.
        let waiter = tokio::spawn(async move {
            let status = em.emit(row("b")).await;
            (em, status)
        });
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        assert!(!waiter.is_finished());
        let first = rx.recv().await.unwrap();
        assert_eq!(first.rows[0].cells[0].as_deref(), Some("a"));
        let (_em, status) = waiter.await.unwrap();
        assert_eq!(status, EmitStatus::Continue);
    }
}
