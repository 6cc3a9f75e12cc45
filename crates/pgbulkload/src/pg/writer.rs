//! PostgreSQL COPY writer.
//!
//! Consumes batches from the pipeline queue and streams them into the
//! target table on a dedicated session, one transaction per batch. A batch
//! the server rejects is split into halves and retried on the current task;
//! a singleton that still fails is logged and dropped. Anything that is not
//! a server-reported statement error aborts the writer, which cancels the
//! reader through the pipeline.

use futures::SinkExt;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use crate::config::uri::ConnectionSpec;
use crate::config::PgSetting;
use crate::core::row::Batch;
use crate::core::schema::TableSpec;
use crate::error::{LoadError, Result};
use crate::stats::{Field, Stats};

use super::copy::{copy_statement, encode_batch};
use super::session::Session;

/// COPY options fixed at pipeline construction.
#[derive(Debug, Clone, Default)]
pub struct WriterOptions {
    /// Column list, in order.
    pub columns: Vec<String>,
    /// TRUNCATE the table in a transaction that commits before streaming.
    pub truncate: bool,
    /// Disable triggers for the duration of the load.
    pub disable_triggers: bool,
}

/// What the writer accomplished for one table.
#[derive(Debug, Clone, Copy, Default)]
pub struct WriterOutcome {
    /// Rows visible in the target (committed).
    pub rows: i64,
    /// Rows dropped after exhausting the split.
    pub errs: i64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriterState {
    Init,
    Streaming,
    Drained,
    Closed,
    Aborted,
}

/// Drain `queue` into `table`.
///
/// Returns when the queue is closed and drained, or with the first fatal
/// error. Per-row errors are recorded in `stats` and do not propagate.
pub async fn copy_from_queue(
    spec: &ConnectionSpec,
    settings: &[PgSetting],
    table: &TableSpec,
    mut queue: mpsc::Receiver<Batch>,
    options: &WriterOptions,
    stats: &Stats,
    cancel: &CancellationToken,
) -> Result<WriterOutcome> {
    let label = table.qualified_name();
    let quoted = table.quoted_name();
    let mut state = WriterState::Init;
    debug!("{}: writer {:?}", label, state);

    let mut session = Session::open(spec).await?;
    session.apply_settings(settings, false).await?;

    if options.truncate {
        session.begin().await?;
        match session
            .batch_execute(&format!("TRUNCATE {}", quoted))
            .await
        {
            Ok(()) => session.commit().await?,
            Err(e) => {
                session.mark_aborted();
                let _ = session.rollback().await;
                return Err(e);
            }
        }
        info!("{}: truncated before load", label);
    }

    if options.disable_triggers {
        session
            .batch_execute(&format!("ALTER TABLE {} DISABLE TRIGGER ALL", quoted))
            .await?;
    }

    state = WriterState::Streaming;
    let mut outcome = WriterOutcome::default();
    let result = stream_batches(
        &mut session,
        &mut queue,
        &quoted,
        options,
        &label,
        stats,
        cancel,
        &mut outcome,
        &mut state,
    )
    .await;

    // Triggers come back on every exit path; after a fatal connection
    // error this is a best effort.
    if options.disable_triggers {
        if let Err(e) = session
            .batch_execute(&format!("ALTER TABLE {} ENABLE TRIGGER ALL", quoted))
            .await
        {
            error!("{}: failed to re-enable triggers: {}", label, e);
        }
    }
    session.close().await;

    match result {
        Ok(()) => {
            debug!("{}: writer closed ({} rows, {} errs)", label, outcome.rows, outcome.errs);
            debug_assert_eq!(state, WriterState::Closed);
            Ok(outcome)
        }
        Err(e) => {
            debug_assert_eq!(state, WriterState::Aborted);
            Err(e)
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn stream_batches(
    session: &mut Session,
    queue: &mut mpsc::Receiver<Batch>,
    quoted_table: &str,
    options: &WriterOptions,
    label: &str,
    stats: &Stats,
    cancel: &CancellationToken,
    outcome: &mut WriterOutcome,
    state: &mut WriterState,
) -> Result<()> {
    loop {
        let next = tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                *state = WriterState::Aborted;
                return Err(LoadError::Cancelled);
            }
            next = queue.recv() => next,
        };

        let batch = match next {
            Some(batch) => batch,
            None => {
                *state = WriterState::Drained;
                break;
            }
        };

        if let Err(e) = load_batch(session, quoted_table, options, label, batch, stats, outcome).await
        {
            *state = WriterState::Aborted;
            return Err(e);
        }
    }

    *state = WriterState::Closed;
    Ok(())
}

/// Load one batch, splitting on server rejection.
///
/// Sub-batches stay on the current task in a LIFO work list so earlier rows
/// commit before later rows; only halves of a failing batch may interleave.
async fn load_batch(
    session: &mut Session,
    quoted_table: &str,
    options: &WriterOptions,
    label: &str,
    batch: Batch,
    stats: &Stats,
    outcome: &mut WriterOutcome,
) -> Result<()> {
    let mut pending = vec![batch];

    while let Some(batch) = pending.pop() {
        if batch.is_empty() {
            continue;
        }
        let len = batch.len() as i64;
        stats.incr(label, Field::Rows, len);

        match copy_batch(session, quoted_table, options, &batch).await {
            Ok(committed) => {
                outcome.rows += committed as i64;
                debug!(
                    "{}: committed batch of {} (ordinal {})",
                    label, committed, batch.first_ordinal
                );
            }
            Err(e) => {
                session.mark_aborted();
                session.rollback().await?;
                stats.incr(label, Field::Rows, -len);

                if !e.is_batch_recoverable() {
                    return Err(e);
                }

                if batch.len() > 1 {
                    debug!(
                        "{}: batch of {} rejected ({}), splitting",
                        label,
                        batch.len(),
                        e
                    );
                    let (first, second) = batch.split();
                    pending.push(second);
                    pending.push(first);
                } else {
                    let row = &batch.rows[0];
                    error!(
                        "{}: row {} rejected: {} [{}]",
                        label,
                        batch.first_ordinal,
                        e,
                        row.preview(200)
                    );
                    stats.incr(label, Field::Errs, 1);
                    outcome.errs += 1;
                }
            }
        }
    }

    Ok(())
}

/// One transaction: BEGIN, COPY the rows, COMMIT. Returns the server's
/// row count.
async fn copy_batch(
    session: &mut Session,
    quoted_table: &str,
    options: &WriterOptions,
    batch: &Batch,
) -> Result<u64> {
    session.begin().await?;

    let sql = copy_statement(quoted_table, &options.columns);
    let sink = session.client().copy_in(&sql).await?;
    tokio::pin!(sink);

    let data = encode_batch(batch).freeze();
    sink.send(data).await.map_err(LoadError::from)?;
    let count = sink.finish().await.map_err(LoadError::from)?;

    session.commit().await?;
    Ok(count)
}
