//! Per-table pipeline runtime.
//!
//! For each table the runtime owns a bounded queue of batches and exactly
//! two tasks: the producer (reader into the queue) and the consumer (the
//! COPY writer draining it). The producer flushes its last partial batch
//! and closes the queue; the runtime joins both tasks and surfaces the
//! first fatal error. A fatal writer error drops the queue receiver, which
//! the producer observes on its next push, so the reader stops within one
//! batch of rows.

use std::sync::Arc;

use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use crate::config::uri::ConnectionSpec;
use crate::config::PgSetting;
use crate::core::row::{Batch, BatchConfig};
use crate::core::schema::TableSpec;
use crate::error::{LoadError, Result};
use crate::pg::writer::{copy_from_queue, WriterOptions, WriterOutcome};
use crate::reader::{Reader, RowEmitter};
use crate::stats::Stats;

/// Run one table's load: reader ⇒ bounded queue ⇒ COPY writer.
pub async fn run_table(
    reader: Box<dyn Reader>,
    target: ConnectionSpec,
    settings: Vec<PgSetting>,
    table: TableSpec,
    options: WriterOptions,
    batch: BatchConfig,
    stats: Arc<Stats>,
    cancel: CancellationToken,
) -> Result<WriterOutcome> {
    let label = table.qualified_name();
    let _timer = stats.scoped_timer(&label);
    info!("{}: starting load", label);

    let (tx, rx) = mpsc::channel::<Batch>(batch.concurrent_batches);

    let emitter = RowEmitter::new(
        tx,
        batch,
        label.clone(),
        Arc::clone(&stats),
        cancel.clone(),
    );
    let producer = spawn_producer(reader, emitter);

    let consumer_stats = Arc::clone(&stats);
    let consumer_cancel = cancel.clone();
    let consumer_table = table.clone();
    let consumer = tokio::spawn(async move {
        copy_from_queue(
            &target,
            &settings,
            &consumer_table,
            rx,
            &options,
            &consumer_stats,
            &consumer_cancel,
        )
        .await
    });

    let (produced, consumed) = tokio::join!(producer, consumer);

    let produced = produced
        .unwrap_or_else(|e| Err(LoadError::Task(format!("reader task died: {}", e))));
    let consumed = consumed
        .unwrap_or_else(|e| Err(LoadError::Task(format!("writer task died: {}", e))));

    // The writer's failure is what cancelled the reader, so it is the
    // first fatal error when both report one.
    match (produced, consumed) {
        (_, Err(e)) => Err(e),
        (Err(e), Ok(_)) => Err(e),
        (Ok(()), Ok(outcome)) => {
            let s = stats.get(&label);
            info!(
                "{}: loaded {} rows ({} read, {} errs)",
                label, outcome.rows, s.read, s.errs
            );
            Ok(outcome)
        }
    }
}

/// Spawn the producer task: drive the reader, flush the final partial
/// batch, and close the queue by dropping the sender.
fn spawn_producer(
    mut reader: Box<dyn Reader>,
    mut emitter: RowEmitter,
) -> tokio::task::JoinHandle<Result<()>> {
    tokio::spawn(async move {
        let result = reader.map_rows(&mut emitter).await;
        if result.is_ok() {
            emitter.flush().await;
        }
        debug!("{}: reader finished, queue closed", emitter.label());
        result
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::row::Row;
    use crate::reader::EmitStatus;
    use async_trait::async_trait;

    /// Emits `count` single-cell rows, recording how far it got.
    struct CountingReader {
        label: String,
        count: usize,
        emitted: Arc<std::sync::atomic::AtomicUsize>,
    }

    #[async_trait]
    impl Reader for CountingReader {
        fn label(&self) -> &str {
            &self.label
        }

        async fn map_rows(&mut self, out: &mut RowEmitter) -> Result<()> {
            for i in 0..self.count {
                let row = Row::new(vec![Some(i.to_string())]);
                if out.emit(row).await == EmitStatus::Cancelled {
                    return Ok(());
                }
                self.emitted
                    .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            }
            Ok(())
        }
    }

    fn pipeline_parts(
        rows_per_batch: usize,
        queue_cap: usize,
    ) -> (Arc<Stats>, CancellationToken, BatchConfig) {
        (
            Arc::new(Stats::new()),
            CancellationToken::new(),
            BatchConfig {
                rows: rows_per_batch,
                bytes: 1 << 20,
                concurrent_batches: queue_cap,
            },
        )
    }

    #[tokio::test]
    async fn test_producer_flushes_final_partial_batch() {
        let (stats, cancel, cfg) = pipeline_parts(4, 8);
        let (tx, mut rx) = mpsc::channel(cfg.concurrent_batches);
        let emitter = RowEmitter::new(tx, cfg, "t".to_string(), Arc::clone(&stats), cancel);
        let reader = Box::new(CountingReader {
            label: "t".to_string(),
            count: 10,
            emitted: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        });

        let handle = spawn_producer(reader, emitter);

        let mut sizes = Vec::new();
        while let Some(batch) = rx.recv().await {
            sizes.push(batch.len());
        }
        handle.await.unwrap().unwrap();

        // 10 rows at 4 per batch: two full batches plus the flushed tail.
        assert_eq!(sizes, vec![4, 4, 2]);
        assert_eq!(stats.get("t").read, 10);
    }

    #[tokio::test]
    async fn test_rows_arrive_in_source_order() {
        let (stats, cancel, cfg) = pipeline_parts(3, 2);
        let (tx, mut rx) = mpsc::channel(cfg.concurrent_batches);
        let emitter = RowEmitter::new(tx, cfg, "t".to_string(), Arc::clone(&stats), cancel);
        let reader = Box::new(CountingReader {
            label: "t".to_string(),
            count: 25,
            emitted: Arc::new(std::sync::atomic::AtomicUsize::new(0)),
        });

        let handle = spawn_producer(reader, emitter);

        let mut seen = Vec::new();
        let mut next_ordinal = 0;
        while let Some(batch) = rx.recv().await {
            assert_eq!(batch.first_ordinal, next_ordinal);
            next_ordinal += batch.len() as u64;
            for row in &batch.rows {
                seen.push(row.cells[0].clone().unwrap().parse::<usize>().unwrap());
            }
        }
        handle.await.unwrap().unwrap();

        let expected: Vec<usize> = (0..25).collect();
        assert_eq!(seen, expected);
    }

    #[tokio::test]
    async fn test_reader_stops_within_one_batch_of_writer_death() {
        // P6: the consumer dies; the producer must notice on its next
        // push and stop promptly.
        let (stats, cancel, cfg) = pipeline_parts(1, 1);
        let (tx, rx) = mpsc::channel(cfg.concurrent_batches);
        let emitted = Arc::new(std::sync::atomic::AtomicUsize::new(0));
        let emitter = RowEmitter::new(tx, cfg, "t".to_string(), Arc::clone(&stats), cancel);
        let reader = Box::new(CountingReader {
            label: "t".to_string(),
            count: 100_000,
            emitted: Arc::clone(&emitted),
        });

        let handle = spawn_producer(reader, emitter);
        // Simulate a fatal writer error by dropping the queue.
        drop(rx);
        handle.await.unwrap().unwrap();

        // With queue capacity 1 and batch size 1, at most a couple of rows
        // can have been emitted past the failure point.
        assert!(emitted.load(std::sync::atomic::Ordering::SeqCst) <= 3);
    }
}
