//! MySQL schema discovery.
//!
//! Reads `INFORMATION_SCHEMA` and builds the target-facing catalog: table
//! and column specs with cast target types, index specs, and foreign keys.

use sqlx::mysql::{MySqlPool, MySqlRow};
use sqlx::Row;
use tracing::{debug, error, info};

use crate::config::MysqlSourceConfig;
use crate::core::schema::{
    Catalog, CellTransform, ColumnSpec, ForeignKeySpec, IndexSpec, TableSpec,
};
use crate::error::{LoadError, Result};

use super::quote_mysql_ident;
use super::typemap;

/// Discover the source schema and map it onto `target_schema`.
///
/// Tables listed in `only-tables` but absent on the source are logged at
/// ERROR and skipped; the run continues.
pub async fn discover(
    pool: &MySqlPool,
    dbname: &str,
    target_schema: &str,
    cfg: &MysqlSourceConfig,
) -> Result<Catalog> {
    let mut names = list_tables(pool, dbname).await?;

    for missing in cfg
        .only_tables
        .iter()
        .filter(|t| !names.iter().any(|(n, _)| n == *t))
    {
        error!("{}; skipped", not_found(missing, dbname));
    }
    if !cfg.only_tables.is_empty() {
        names.retain(|(n, _)| cfg.only_tables.contains(n));
    }
    names.retain(|(n, _)| !cfg.exclude_tables.contains(n));

    // Views materialized on the source are discovered like base tables
    // once created; they carry no indexes or foreign keys.
    for view in &cfg.materialize_views {
        names.push((view.name.clone(), None));
    }

    let mut catalog = Catalog::default();
    for (name, comment) in names {
        let from_matview = cfg.materialize_views.iter().any(|v| v.name == name);
        let columns = load_columns(pool, dbname, &name).await?;
        if columns.is_empty() {
            error!("table '{}' has no columns; skipped", name);
            continue;
        }
        let table = TableSpec {
            schema: target_schema.to_string(),
            name: name.clone(),
            columns,
            comment,
            from_materialized_view: from_matview,
        };
        if !from_matview {
            catalog
                .indexes
                .extend(load_indexes(pool, dbname, target_schema, &name).await?);
            catalog
                .foreign_keys
                .extend(load_foreign_keys(pool, dbname, target_schema, &name).await?);
        }
        catalog.tables.push(table);
    }

    info!(
        "discovered {} tables, {} indexes, {} foreign keys in '{}'",
        catalog.tables.len(),
        catalog.indexes.len(),
        catalog.foreign_keys.len(),
        dbname
    );
    Ok(catalog)
}

/// Create the configured views on the source side.
pub async fn create_materialized_views(pool: &MySqlPool, cfg: &MysqlSourceConfig) -> Result<()> {
    for view in &cfg.materialize_views {
        let sql = format!(
            "CREATE OR REPLACE VIEW {} AS {}",
            quote_mysql_ident(&view.name),
            view.sql
        );
        sqlx::query(&sql).execute(pool).await?;
        debug!("materialized source view '{}'", view.name);
    }
    Ok(())
}

/// Drop the source-side views again (on prepare failure and after load).
pub async fn drop_materialized_views(pool: &MySqlPool, cfg: &MysqlSourceConfig) -> Result<()> {
    for view in &cfg.materialize_views {
        let sql = format!("DROP VIEW IF EXISTS {}", quote_mysql_ident(&view.name));
        sqlx::query(&sql).execute(pool).await?;
        debug!("dropped source view '{}'", view.name);
    }
    Ok(())
}

async fn list_tables(pool: &MySqlPool, dbname: &str) -> Result<Vec<(String, Option<String>)>> {
    let query = r#"
        SELECT
            CAST(TABLE_NAME AS CHAR(255)) AS TABLE_NAME,
            CAST(TABLE_COMMENT AS CHAR(2048)) AS TABLE_COMMENT
        FROM INFORMATION_SCHEMA.TABLES
        WHERE TABLE_SCHEMA = ? AND TABLE_TYPE = 'BASE TABLE'
        ORDER BY TABLE_NAME
    "#;
    let rows: Vec<MySqlRow> = sqlx::query(query).bind(dbname).fetch_all(pool).await?;
    Ok(rows
        .into_iter()
        .map(|row| {
            let name: String = row.get("TABLE_NAME");
            let comment: String = row.get("TABLE_COMMENT");
            let comment = if comment.is_empty() { None } else { Some(comment) };
            (name, comment)
        })
        .collect())
}

async fn load_columns(pool: &MySqlPool, dbname: &str, table: &str) -> Result<Vec<ColumnSpec>> {
    // CAST to CHAR/SIGNED to sidestep collation differences, capping
    // lengths that exceed what the target type needs to spell out.
    let query = r#"
        SELECT
            CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
            CAST(DATA_TYPE AS CHAR(64)) AS DATA_TYPE,
            CAST(COLUMN_TYPE AS CHAR(255)) AS COLUMN_TYPE,
            CAST(CASE
                WHEN CHARACTER_MAXIMUM_LENGTH IS NULL THEN 0
                WHEN CHARACTER_MAXIMUM_LENGTH > 10485760 THEN -1
                ELSE CHARACTER_MAXIMUM_LENGTH
            END AS SIGNED) AS max_length,
            CAST(COALESCE(NUMERIC_PRECISION, 0) AS SIGNED) AS num_precision,
            CAST(COALESCE(NUMERIC_SCALE, 0) AS SIGNED) AS num_scale,
            IF(IS_NULLABLE = 'YES', 1, 0) AS is_nullable,
            IF(EXTRA LIKE '%auto_increment%', 1, 0) AS is_identity,
            CAST(COALESCE(COLUMN_DEFAULT, '') AS CHAR(255)) AS col_default,
            CAST(COLUMN_COMMENT AS CHAR(2048)) AS COLUMN_COMMENT
        FROM INFORMATION_SCHEMA.COLUMNS
        WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
        ORDER BY ORDINAL_POSITION
    "#;

    let rows: Vec<MySqlRow> = sqlx::query(query)
        .bind(dbname)
        .bind(table)
        .fetch_all(pool)
        .await?;

    let mut columns = Vec::with_capacity(rows.len());
    for row in rows {
        let data_type: String = row.get("DATA_TYPE");
        let column_type: String = row.get("COLUMN_TYPE");
        let auto_increment = row.get::<i32, _>("is_identity") == 1;
        let target = typemap::target_type(
            &data_type,
            &column_type,
            row.get::<i64, _>("max_length"),
            row.get::<i64, _>("num_precision"),
            row.get::<i64, _>("num_scale"),
            auto_increment,
        );

        let default: String = row.get("col_default");
        let default = if default.eq_ignore_ascii_case("CURRENT_TIMESTAMP")
            || default.eq_ignore_ascii_case("current_timestamp()")
        {
            Some("CURRENT_TIMESTAMP".to_string())
        } else {
            None
        };

        // MySQL zero dates have no PostgreSQL representation.
        let transforms = match data_type.as_str() {
            "date" | "datetime" | "timestamp" => vec![CellTransform::ZeroDateToNull],
            _ => Vec::new(),
        };

        let comment: String = row.get("COLUMN_COMMENT");
        columns.push(ColumnSpec {
            name: row.get("COLUMN_NAME"),
            source_type: data_type,
            target_type: target,
            nullable: row.get::<i32, _>("is_nullable") == 1,
            default,
            transforms,
            comment: if comment.is_empty() { None } else { Some(comment) },
        });
    }

    Ok(columns)
}

async fn load_indexes(
    pool: &MySqlPool,
    dbname: &str,
    target_schema: &str,
    table: &str,
) -> Result<Vec<IndexSpec>> {
    let query = r#"
        SELECT
            CAST(INDEX_NAME AS CHAR(255)) AS INDEX_NAME,
            CAST(COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
            CAST(NON_UNIQUE AS SIGNED) AS NON_UNIQUE
        FROM INFORMATION_SCHEMA.STATISTICS
        WHERE TABLE_SCHEMA = ? AND TABLE_NAME = ?
        ORDER BY INDEX_NAME, SEQ_IN_INDEX
    "#;

    let rows: Vec<MySqlRow> = sqlx::query(query)
        .bind(dbname)
        .bind(table)
        .fetch_all(pool)
        .await?;

    let mut indexes: Vec<IndexSpec> = Vec::new();
    for row in rows {
        let name: String = row.get("INDEX_NAME");
        let column: String = row.get("COLUMN_NAME");
        let unique = row.get::<i64, _>("NON_UNIQUE") == 0;
        let primary = name == "PRIMARY";
        let target_name = if primary {
            format!("{}_pkey", table)
        } else {
            name.clone()
        };

        match indexes.iter_mut().find(|i| i.name == target_name) {
            Some(idx) => idx.columns.push(column),
            None => indexes.push(IndexSpec {
                name: target_name,
                table_schema: target_schema.to_string(),
                table_name: table.to_string(),
                primary,
                unique,
                columns: vec![column],
            }),
        }
    }

    Ok(indexes)
}

async fn load_foreign_keys(
    pool: &MySqlPool,
    dbname: &str,
    target_schema: &str,
    table: &str,
) -> Result<Vec<ForeignKeySpec>> {
    let query = r#"
        SELECT
            CAST(kcu.CONSTRAINT_NAME AS CHAR(255)) AS CONSTRAINT_NAME,
            CAST(kcu.COLUMN_NAME AS CHAR(255)) AS COLUMN_NAME,
            CAST(kcu.REFERENCED_TABLE_NAME AS CHAR(255)) AS REF_TABLE,
            CAST(kcu.REFERENCED_COLUMN_NAME AS CHAR(255)) AS REF_COLUMN,
            CAST(rc.UPDATE_RULE AS CHAR(32)) AS UPDATE_RULE,
            CAST(rc.DELETE_RULE AS CHAR(32)) AS DELETE_RULE
        FROM INFORMATION_SCHEMA.KEY_COLUMN_USAGE kcu
        JOIN INFORMATION_SCHEMA.REFERENTIAL_CONSTRAINTS rc
          ON rc.CONSTRAINT_SCHEMA = kcu.CONSTRAINT_SCHEMA
         AND rc.CONSTRAINT_NAME = kcu.CONSTRAINT_NAME
        WHERE kcu.TABLE_SCHEMA = ? AND kcu.TABLE_NAME = ?
          AND kcu.REFERENCED_TABLE_NAME IS NOT NULL
        ORDER BY kcu.CONSTRAINT_NAME, kcu.ORDINAL_POSITION
    "#;

    let rows: Vec<MySqlRow> = sqlx::query(query)
        .bind(dbname)
        .bind(table)
        .fetch_all(pool)
        .await?;

    let mut fks: Vec<ForeignKeySpec> = Vec::new();
    for row in rows {
        let name: String = row.get("CONSTRAINT_NAME");
        let column: String = row.get("COLUMN_NAME");
        let ref_column: String = row.get("REF_COLUMN");

        match fks.iter_mut().find(|fk| fk.name == name) {
            Some(fk) => {
                fk.columns.push(column);
                fk.ref_columns.push(ref_column);
            }
            None => fks.push(ForeignKeySpec {
                name,
                table_schema: target_schema.to_string(),
                table_name: table.to_string(),
                columns: vec![column],
                ref_schema: target_schema.to_string(),
                ref_table: row.get("REF_TABLE"),
                ref_columns: vec![ref_column],
                on_delete: normalize_rule(&row.get::<String, _>("DELETE_RULE")),
                on_update: normalize_rule(&row.get::<String, _>("UPDATE_RULE")),
            }),
        }
    }

    Ok(fks)
}

fn normalize_rule(rule: &str) -> String {
    match rule.to_uppercase().as_str() {
        "CASCADE" => "CASCADE".to_string(),
        "SET NULL" => "SET NULL".to_string(),
        "SET DEFAULT" => "SET DEFAULT".to_string(),
        "RESTRICT" => "RESTRICT".to_string(),
        _ => "NO ACTION".to_string(),
    }
}

/// A configured table that never appeared in discovery.
pub fn not_found(table: &str, dbname: &str) -> LoadError {
    LoadError::NotFound(format!("table '{}' in source database '{}'", table, dbname))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_rule() {
        assert_eq!(normalize_rule("CASCADE"), "CASCADE");
        assert_eq!(normalize_rule("set null"), "SET NULL");
        assert_eq!(normalize_rule("RESTRICT"), "RESTRICT");
        assert_eq!(normalize_rule("NO ACTION"), "NO ACTION");
        assert_eq!(normalize_rule("whatever"), "NO ACTION");
    }

    #[test]
    fn test_not_found_message() {
        let e = not_found("orders", "shop");
        assert!(matches!(e, LoadError::NotFound(_)));
        assert!(e.to_string().contains("orders"));
    }
}
