//! Schema orchestration: the prepare phase before any data moves and the
//! complete phase after every load and index build.
//!
//! Prepare runs one transaction per schema change group and is fatal on
//! failure. Complete steps run sequentially, each statement in its own
//! implicit transaction, and report per-statement errors without aborting
//! the run.

pub mod comments;
pub mod indexes;
pub mod sequences;

pub use indexes::{IndexKernel, PkPromotion, INDEX_LABEL};

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::config::uri::ConnectionSpec;
use crate::config::{PgSetting, SchemaConfig};
use crate::core::schema::{quote_ident, Catalog, TableSpec};
use crate::error::Result;
use crate::pg::session::{with_session, with_transaction, Session};
use crate::stats::{Field, Stats};

pub const DROP_FK_LABEL: &str = "Drop Foreign Keys";
pub const DROP_TABLES_LABEL: &str = "Drop Tables";
pub const CREATE_TABLES_LABEL: &str = "Create Tables";
pub const PRIMARY_KEYS_LABEL: &str = "Primary Keys";
pub const FOREIGN_KEYS_LABEL: &str = "Foreign Keys";

/// Table oids assigned by CREATE, keyed by qualified name. Kept beside the
/// immutable specs; the index kernel looks oids up when uniquifying names.
pub type OidMap = HashMap<String, u32>;

/// Prepare the target schema. Any failure here is fatal for the run.
pub async fn prepare(
    spec: &ConnectionSpec,
    settings: &[PgSetting],
    target_schema: &str,
    catalog: &Catalog,
    cfg: &SchemaConfig,
    stats: &Arc<Stats>,
) -> Result<OidMap> {
    let schema = target_schema.to_string();
    let catalog = catalog.clone();
    let cfg = cfg.clone();
    let stats = Arc::clone(stats);

    with_session(spec, settings, move |session| {
        Box::pin(async move {
            if cfg.foreign_keys && cfg.include_drop && !cfg.data_only {
                let schema = schema.clone();
                let names: Vec<String> =
                    catalog.tables.iter().map(|t| t.name.clone()).collect();
                let stats = Arc::clone(&stats);
                with_transaction(session, move |s| {
                    Box::pin(async move {
                        drop_target_foreign_keys(s, &schema, &names, &stats).await
                    })
                })
                .await?;
            }

            if cfg.create_tables && !cfg.data_only {
                let schema = schema.clone();
                let tables = catalog.tables.clone();
                let include_drop = cfg.include_drop;
                let stats = Arc::clone(&stats);
                with_transaction(session, move |s| {
                    Box::pin(async move {
                        create_tables(s, &schema, &tables, include_drop, &stats).await
                    })
                })
                .await?;
            }

            load_oids(session, &schema, &catalog).await
        })
    })
    .await
}

/// Drop every FK constraint touching the tables about to be loaded, in
/// both directions, so tables can load in any order.
async fn drop_target_foreign_keys(
    session: &mut Session,
    target_schema: &str,
    table_names: &[String],
    stats: &Stats,
) -> Result<()> {
    let sql = r#"
        SELECT con.conname, rel.relname
        FROM pg_catalog.pg_constraint con
        JOIN pg_catalog.pg_class rel ON rel.oid = con.conrelid
        JOIN pg_catalog.pg_class frel ON frel.oid = con.confrelid
        JOIN pg_catalog.pg_namespace nsp ON nsp.oid = rel.relnamespace
        WHERE con.contype = 'f'
          AND nsp.nspname = $1
          AND (rel.relname = ANY($2) OR frel.relname = ANY($2))
    "#;
    let rows = session.query(sql, &[&target_schema, &table_names]).await?;

    for row in rows {
        let conname: String = row.get(0);
        let relname: String = row.get(1);
        let drop_sql = format!(
            "ALTER TABLE {}.{} DROP CONSTRAINT {}",
            quote_ident(target_schema),
            quote_ident(&relname),
            quote_ident(&conname)
        );
        session.exec_timed(DROP_FK_LABEL, &drop_sql, stats).await?;
        debug!("dropped foreign key {} on {}", conname, relname);
    }
    Ok(())
}

async fn create_tables(
    session: &mut Session,
    target_schema: &str,
    tables: &[TableSpec],
    include_drop: bool,
    stats: &Stats,
) -> Result<()> {
    session
        .batch_execute(&format!(
            "CREATE SCHEMA IF NOT EXISTS {}",
            quote_ident(target_schema)
        ))
        .await?;

    for table in tables {
        if include_drop {
            let drop_sql = format!("DROP TABLE IF EXISTS {} CASCADE", table.quoted_name());
            session.exec_timed(DROP_TABLES_LABEL, &drop_sql, stats).await?;
        }
        session
            .exec_timed(CREATE_TABLES_LABEL, &table.create_sql(), stats)
            .await?;
        debug!("created table {}", table.qualified_name());
    }

    info!("created {} tables in {}", tables.len(), target_schema);
    Ok(())
}

/// Read back the oids CREATE assigned, for index-name uniquification.
async fn load_oids(
    session: &mut Session,
    target_schema: &str,
    catalog: &Catalog,
) -> Result<OidMap> {
    let sql = r#"
        SELECT c.relname, c.oid
        FROM pg_catalog.pg_class c
        JOIN pg_catalog.pg_namespace n ON n.oid = c.relnamespace
        WHERE n.nspname = $1 AND c.relkind = 'r'
    "#;
    let rows = session.query(sql, &[&target_schema]).await?;

    let mut oids = OidMap::new();
    for row in rows {
        let relname: String = row.get(0);
        let oid: u32 = row.get(1);
        if catalog.tables.iter().any(|t| t.name == relname) {
            oids.insert(format!("{}.{}", target_schema, relname), oid);
        }
    }
    Ok(oids)
}

/// Complete the target schema after all loads and index builds.
pub async fn complete(
    spec: &ConnectionSpec,
    settings: &[PgSetting],
    target_schema: &str,
    catalog: &Catalog,
    promotions: &[PkPromotion],
    cfg: &SchemaConfig,
    stats: &Arc<Stats>,
) -> Result<()> {
    let schema = target_schema.to_string();
    let catalog = catalog.clone();
    let promotions = promotions.to_vec();
    let cfg = cfg.clone();
    let stats = Arc::clone(stats);

    with_session(spec, settings, move |session| {
        Box::pin(async move {
            if cfg.reset_sequences {
                if let Err(e) =
                    sequences::reset_sequences(session, &schema, &catalog.tables, &stats).await
                {
                    warn!("sequence reset failed: {}", e);
                    stats.incr(sequences::SEQUENCES_LABEL, Field::Errs, 1);
                }
            }

            for promotion in &promotions {
                let sql = format!(
                    "ALTER TABLE {}.{} ADD PRIMARY KEY USING INDEX {}",
                    quote_ident(&promotion.table_schema),
                    quote_ident(&promotion.table_name),
                    quote_ident(&promotion.index_name)
                );
                if let Err(e) = session.exec_timed(PRIMARY_KEYS_LABEL, &sql, &stats).await {
                    warn!(
                        "primary key promotion on {}.{} failed: {}",
                        promotion.table_schema, promotion.table_name, e
                    );
                }
            }

            if cfg.foreign_keys && !cfg.data_only {
                for fk in &catalog.foreign_keys {
                    if let Err(e) = session
                        .exec_timed(FOREIGN_KEYS_LABEL, &fk.add_sql(), &stats)
                        .await
                    {
                        warn!("foreign key {} failed: {}", fk.name, e);
                    }
                }
            }

            if cfg.comments {
                comments::apply_comments(session, &catalog.tables, &stats).await?;
            }

            info!("schema completion finished for {}", schema);
            Ok(())
        })
    })
    .await
}
