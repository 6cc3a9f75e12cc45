//! Parallel index kernel.
//!
//! A task pool sized to the largest index fanout of any single table in
//! the run. Jobs are submitted as soon as a table's data load finishes, so
//! index builds from several tables overlap and profit from synchronous
//! sequential scans. The kernel only returns once every submitted job has
//! terminated; a failed build is counted under `"Create Indexes"` and does
//! not abort the run.

use std::sync::{Arc, Mutex};

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, error};

use crate::config::uri::ConnectionSpec;
use crate::config::PgSetting;
use crate::core::schema::{IndexNames, IndexSpec};
use crate::error::Result;
use crate::pg::session::Session;
use crate::stats::Stats;

/// Stats label for index builds.
pub const INDEX_LABEL: &str = "Create Indexes";

/// A UNIQUE index to be promoted to PRIMARY KEY in the complete phase.
#[derive(Debug, Clone)]
pub struct PkPromotion {
    pub table_schema: String,
    pub table_name: String,
    /// Name the index carries on the target.
    pub index_name: String,
}

pub struct IndexKernel {
    semaphore: Arc<Semaphore>,
    jobs: JoinSet<()>,
    promotions: Arc<Mutex<Vec<PkPromotion>>>,
    spec: ConnectionSpec,
    settings: Vec<PgSetting>,
    names: IndexNames,
    stats: Arc<Stats>,
}

impl IndexKernel {
    /// `pool_size` is the maximum per-table index count for the run.
    pub fn new(
        pool_size: usize,
        spec: ConnectionSpec,
        settings: Vec<PgSetting>,
        names: IndexNames,
        stats: Arc<Stats>,
    ) -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(pool_size.max(1))),
            jobs: JoinSet::new(),
            promotions: Arc::new(Mutex::new(Vec::new())),
            spec,
            settings,
            names,
            stats,
        }
    }

    /// Schedule the builds for one table. Call only after that table's
    /// data load has completed.
    pub fn submit(&mut self, indexes: Vec<IndexSpec>, table_oid: Option<u32>) {
        for index in indexes {
            let semaphore = Arc::clone(&self.semaphore);
            let promotions = Arc::clone(&self.promotions);
            let stats = Arc::clone(&self.stats);
            let spec = self.spec.clone();
            let settings = self.settings.clone();
            let names = self.names;

            self.jobs.spawn(async move {
                let _permit = match semaphore.acquire_owned().await {
                    Ok(permit) => permit,
                    Err(_) => return,
                };

                let target_name = index.target_name(names, table_oid);
                let sql = index.create_sql(names, table_oid);
                match build_one(&spec, &settings, &sql, &stats).await {
                    Ok(()) => {
                        debug!("built index {} on {}", target_name, index.table_label());
                        if index.primary {
                            promotions.lock().unwrap().push(PkPromotion {
                                table_schema: index.table_schema.clone(),
                                table_name: index.table_name.clone(),
                                index_name: target_name,
                            });
                        }
                    }
                    Err(e) => {
                        // Recorded under the label by exec_timed; the run
                        // carries on without this index.
                        error!(
                            "index {} on {} failed: {}",
                            target_name,
                            index.table_label(),
                            e
                        );
                    }
                }
            });
        }
    }

    /// Wait for every submitted job. Returns the UNIQUE indexes collected
    /// for primary-key promotion.
    pub async fn wait(mut self) -> Vec<PkPromotion> {
        while let Some(joined) = self.jobs.join_next().await {
            if let Err(e) = joined {
                error!("index task died: {}", e);
                self.stats.incr(INDEX_LABEL, crate::stats::Field::Errs, 1);
            }
        }
        Arc::try_unwrap(self.promotions)
            .map(|m| m.into_inner().unwrap())
            .unwrap_or_default()
    }
}

async fn build_one(
    spec: &ConnectionSpec,
    settings: &[PgSetting],
    sql: &str,
    stats: &Stats,
) -> Result<()> {
    let session = Session::open(spec).await?;
    session.apply_settings(settings, false).await?;
    let result = session.exec_timed(INDEX_LABEL, sql, stats).await;
    session.close().await;
    result.map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kernel_pool_size_is_at_least_one() {
        // Zero indexes in the run must not wedge the semaphore.
        let sem = Semaphore::new(0_usize.max(1));
        assert_eq!(sem.available_permits(), 1);
    }
}
