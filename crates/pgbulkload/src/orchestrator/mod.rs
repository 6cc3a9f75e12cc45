//! Whole-run coordination.
//!
//! One run is: resolve URIs and build the source catalog, run the schema
//! prepare phase, pipe every table through its own reader/writer pipeline
//! while the index kernel builds indexes for tables that have finished,
//! run the schema complete phase, and render the report. A fatal error in
//! one table's pipeline fails that table and the run's exit code, but the
//! remaining tables still load.

mod report;

pub use report::{LoadReport, PhaseTotal};

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use sqlx::mysql::MySqlPool;
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::config::uri::MysqlSpec;
use crate::config::{FixedSourceConfig, LoadConfig, MysqlSourceConfig, SourceConfig};
use crate::core::row::BatchConfig;
use crate::core::schema::{Catalog, ColumnSpec, TableSpec};
use crate::error::{LoadError, Result};
use crate::pg::session::Session;
use crate::pg::writer::WriterOptions;
use crate::pipeline;
use crate::reader::{FixedReader, MysqlReader, Reader};
use crate::schema::{self, comments, sequences, IndexKernel};
use crate::stats::Stats;

/// Source-side runtime state for the run.
enum SourceRuntime {
    Fixed(FixedSourceConfig),
    Mysql(MysqlRuntime),
}

struct MysqlRuntime {
    cfg: MysqlSourceConfig,
    spec: MysqlSpec,
    default_pool: MySqlPool,
    /// Pools keyed by charset, for decoding filters.
    pools: HashMap<String, MySqlPool>,
}

impl MysqlRuntime {
    /// The pool (and charset name, for logs) to read `table` through.
    async fn pool_for(&mut self, table: &str) -> Result<(MySqlPool, String)> {
        let filter = self.cfg.decoding.iter().find(|f| f.matches(table));
        match filter {
            Some(f) => {
                if !self.pools.contains_key(&f.encoding) {
                    let pool = crate::reader::mysql::connect(&self.spec, Some(&f.encoding)).await?;
                    self.pools.insert(f.encoding.clone(), pool);
                }
                Ok((self.pools[&f.encoding].clone(), f.encoding.clone()))
            }
            None => Ok((self.default_pool.clone(), "default".to_string())),
        }
    }
}

/// Connectivity/plan summary for the `check` subcommand.
#[derive(Debug, Clone, serde::Serialize)]
pub struct CheckReport {
    pub source: String,
    pub target: String,
    pub tables: Vec<String>,
}

/// Load orchestrator.
pub struct Orchestrator {
    config: LoadConfig,
}

impl Orchestrator {
    pub fn new(config: LoadConfig) -> Self {
        Self { config }
    }

    /// Test connectivity on both sides and list the tables that would load.
    pub async fn check(&self) -> Result<CheckReport> {
        let target = self.config.target_spec()?;
        let session = Session::open(&target).await?;
        session.batch_execute("SELECT 1").await?;
        session.close().await;

        let (source_desc, catalog, runtime) = self.open_source().await?;
        if let SourceRuntime::Mysql(rt) = &runtime {
            // Leave no views behind from a dry check.
            crate::reader::mysql::catalog::drop_materialized_views(&rt.default_pool, &rt.cfg)
                .await?;
        }

        Ok(CheckReport {
            source: source_desc,
            target: format!("postgresql ({})", self.config.target.schema),
            tables: catalog.tables.iter().map(|t| t.qualified_name()).collect(),
        })
    }

    /// Run the whole migration.
    pub async fn run(self, cancel: CancellationToken) -> Result<LoadReport> {
        let started_at = Utc::now();
        let stats = Arc::new(Stats::new());

        let target = self.config.target_spec()?;
        let settings = self.config.pg_settings.clone();
        let batch: BatchConfig = self.config.batch.into();
        let schema_cfg = self.config.schema.clone();
        let target_schema = self.config.target.schema.clone();

        let (source_desc, catalog, mut runtime) = self.open_source().await?;
        info!(
            "loading {} tables from {} into schema '{}'",
            catalog.tables.len(),
            source_desc,
            target_schema
        );

        // Prepare happens-before any reader starts; a failure here is
        // fatal and must clean up source-side materialized views.
        let oids = match schema::prepare(
            &target,
            &settings,
            &target_schema,
            &catalog,
            &schema_cfg,
            &stats,
        )
        .await
        {
            Ok(oids) => oids,
            Err(e) => {
                drop_source_views(&runtime).await;
                return Err(e);
            }
        };

        let mut kernel = IndexKernel::new(
            catalog.max_index_fanout(),
            target.clone(),
            settings.clone(),
            schema_cfg.index_names,
            Arc::clone(&stats),
        );

        let mut failed_tables = Vec::new();
        if !schema_cfg.schema_only {
            for table in &catalog.tables {
                if cancel.is_cancelled() {
                    return Err(LoadError::Cancelled);
                }
                let label = table.qualified_name();

                let reader = match make_reader(&mut runtime, table).await {
                    Ok(reader) => reader,
                    Err(LoadError::NotFound(what)) => {
                        error!("skipping {}: {} not found", label, what);
                        continue;
                    }
                    Err(e) => return Err(e),
                };

                let options = WriterOptions {
                    columns: table.column_names(),
                    truncate: schema_cfg.truncate,
                    disable_triggers: schema_cfg.disable_triggers,
                };

                let outcome = pipeline::run_table(
                    reader,
                    target.clone(),
                    settings.clone(),
                    table.clone(),
                    options,
                    batch,
                    Arc::clone(&stats),
                    cancel.clone(),
                )
                .await;

                match outcome {
                    Ok(_) => {
                        if schema_cfg.create_indexes && !schema_cfg.data_only {
                            kernel.submit(
                                catalog.indexes_for(table),
                                oids.get(&label).copied(),
                            );
                        }
                    }
                    Err(LoadError::Cancelled) => return Err(LoadError::Cancelled),
                    Err(e) => {
                        error!("{} failed: {}", label, e);
                        failed_tables.push(label);
                    }
                }
            }
        }

        // Schema complete happens-after every writer and index task.
        let promotions = kernel.wait().await;
        schema::complete(
            &target,
            &settings,
            &target_schema,
            &catalog,
            &promotions,
            &schema_cfg,
            &stats,
        )
        .await?;

        drop_source_views(&runtime).await;

        Ok(build_report(started_at, &catalog, failed_tables, &stats))
    }

    /// Open the source side and build the catalog.
    async fn open_source(&self) -> Result<(String, Catalog, SourceRuntime)> {
        match &self.config.source {
            SourceConfig::Fixed(cfg) => {
                let table = fixed_table_spec(cfg, &self.config.target.schema);
                let catalog = Catalog {
                    tables: vec![table],
                    ..Default::default()
                };
                Ok((
                    format!("fixed ({})", cfg.uri),
                    catalog,
                    SourceRuntime::Fixed(cfg.clone()),
                ))
            }
            SourceConfig::Mysql(cfg) => {
                let spec = MysqlSpec::parse(&cfg.uri)?;
                let pool = crate::reader::mysql::connect(&spec, None).await?;
                crate::reader::mysql::catalog::create_materialized_views(&pool, cfg).await?;
                let catalog = crate::reader::mysql::catalog::discover(
                    &pool,
                    &spec.dbname,
                    &self.config.target.schema,
                    cfg,
                )
                .await?;
                let desc = format!("mysql ({}:{}/{})", spec.host, spec.port, spec.dbname);
                Ok((
                    desc,
                    catalog,
                    SourceRuntime::Mysql(MysqlRuntime {
                        cfg: cfg.clone(),
                        spec,
                        default_pool: pool,
                        pools: HashMap::new(),
                    }),
                ))
            }
        }
    }
}

/// Reader factory, keyed on the source kind of the run.
async fn make_reader(
    runtime: &mut SourceRuntime,
    table: &TableSpec,
) -> Result<Box<dyn Reader>> {
    match runtime {
        SourceRuntime::Fixed(cfg) => Ok(Box::new(FixedReader::new(
            cfg,
            table.qualified_name(),
        )?)),
        SourceRuntime::Mysql(rt) => {
            let (pool, encoding) = rt.pool_for(&table.name).await?;
            Ok(Box::new(MysqlReader::new(pool, table, &encoding)))
        }
    }
}

/// Best-effort cleanup of source-side materialized views.
async fn drop_source_views(runtime: &SourceRuntime) {
    if let SourceRuntime::Mysql(rt) = runtime {
        if let Err(e) =
            crate::reader::mysql::catalog::drop_materialized_views(&rt.default_pool, &rt.cfg).await
        {
            error!("failed to drop source views: {}", e);
        }
    }
}

fn fixed_table_spec(cfg: &FixedSourceConfig, target_schema: &str) -> TableSpec {
    TableSpec {
        schema: target_schema.to_string(),
        name: cfg.table.clone(),
        columns: cfg
            .fields
            .iter()
            .map(|f| ColumnSpec {
                name: f.name.clone(),
                source_type: "fixed".to_string(),
                target_type: f.target_type.clone(),
                nullable: f.nullable,
                default: None,
                transforms: f.effective_transforms(),
                comment: None,
            })
            .collect(),
        comment: None,
        from_materialized_view: false,
    }
}

fn build_report(
    started_at: chrono::DateTime<Utc>,
    catalog: &Catalog,
    failed_tables: Vec<String>,
    stats: &Stats,
) -> LoadReport {
    let completed_at = Utc::now();
    let duration = (completed_at - started_at).num_milliseconds() as f64 / 1000.0;

    let before_labels: Vec<String> = [
        schema::DROP_FK_LABEL,
        schema::DROP_TABLES_LABEL,
        schema::CREATE_TABLES_LABEL,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();
    let load_labels: Vec<String> = catalog.tables.iter().map(|t| t.qualified_name()).collect();
    let index_labels = vec![schema::INDEX_LABEL.to_string()];
    let after_labels: Vec<String> = [
        sequences::SEQUENCES_LABEL,
        schema::PRIMARY_KEYS_LABEL,
        schema::FOREIGN_KEYS_LABEL,
        comments::COMMENTS_LABEL,
    ]
    .iter()
    .map(|s| s.to_string())
    .collect();

    let load_total = stats.total(&load_labels);
    let rows_per_second = if load_total.secs > 0.0 {
        (load_total.rows as f64 / load_total.secs) as i64
    } else {
        0
    };

    let phases = vec![
        PhaseTotal {
            name: "before load".to_string(),
            stats: stats.total(&before_labels),
        },
        PhaseTotal {
            name: "load".to_string(),
            stats: load_total,
        },
        PhaseTotal {
            name: "indexes".to_string(),
            stats: stats.total(&index_labels),
        },
        PhaseTotal {
            name: "after load".to_string(),
            stats: stats.total(&after_labels),
        },
    ];

    LoadReport {
        started_at,
        completed_at,
        duration_seconds: duration,
        tables_total: catalog.tables.len(),
        tables_failed: failed_tables.len(),
        failed_tables,
        rows_loaded: load_total.rows,
        rows_per_second,
        labels: stats.snapshot(),
        phases,
    }
}
