//! MySQL/MariaDB source reader.
//!
//! Streams `SELECT col1, … FROM `table`` over a connection whose charset
//! comes from the matching decoding filter (or the server default). Every
//! column is rendered to text server-side so the row travels straight into
//! COPY text format. A cell the driver cannot decode in the session
//! encoding is substituted with NULL, logged with its position, and the
//! stream continues.

pub mod catalog;
pub mod typemap;

use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use sqlx::mysql::{MySqlConnectOptions, MySqlPool, MySqlPoolOptions, MySqlSslMode};
use sqlx::Row;
use tracing::{error, info};

use crate::config::uri::MysqlSpec;
use crate::core::row::Row as LoadRow;
use crate::core::schema::{CellTransform, TableSpec};
use crate::error::{LoadError, Result};

use super::{EmitStatus, Reader, RowEmitter};

use typemap::CellKind;

/// Connection pool timeout.
const POOL_CONNECTION_TIMEOUT: Duration = Duration::from_secs(30);

/// Quote a MySQL identifier.
pub fn quote_mysql_ident(name: &str) -> String {
    format!("`{}`", name.replace('`', "``"))
}

/// Open a pool against the source, optionally pinning the connection
/// character set (`SET NAMES` equivalent).
pub async fn connect(spec: &MysqlSpec, charset: Option<&str>) -> Result<MySqlPool> {
    let mut options = MySqlConnectOptions::new()
        .host(&spec.host)
        .port(spec.port)
        .database(&spec.dbname)
        .username(&spec.user)
        .ssl_mode(MySqlSslMode::Preferred);
    if let Some(pw) = &spec.password {
        options = options.password(pw);
    }
    if let Some(cs) = charset {
        options = options.charset(cs);
    }

    let pool = MySqlPoolOptions::new()
        .max_connections(2)
        .acquire_timeout(POOL_CONNECTION_TIMEOUT)
        .connect_with(options)
        .await
        .map_err(|e| {
            LoadError::connect(
                format!("mysql {}:{}/{}", spec.host, spec.port, spec.dbname),
                e.to_string(),
            )
        })?;

    sqlx::query("SELECT 1").fetch_one(&pool).await.map_err(|e| {
        LoadError::connect(
            format!("mysql {}:{}/{}", spec.host, spec.port, spec.dbname),
            e.to_string(),
        )
    })?;

    info!(
        "connected to MySQL source {}:{}/{}{}",
        spec.host,
        spec.port,
        spec.dbname,
        charset.map(|c| format!(" ({})", c)).unwrap_or_default()
    );
    Ok(pool)
}

/// Reader for one MySQL table.
pub struct MysqlReader {
    pool: MySqlPool,
    label: String,
    select_sql: String,
    columns: Vec<ColumnPlan>,
    encoding: String,
}

struct ColumnPlan {
    name: String,
    kind: CellKind,
    transforms: Vec<CellTransform>,
}

/// Build the streaming SELECT, rendering each column to text server-side.
fn build_select(table: &TableSpec) -> (String, Vec<ColumnPlan>) {
    let mut select_exprs = Vec::with_capacity(table.columns.len());
    let mut columns = Vec::with_capacity(table.columns.len());
    for col in &table.columns {
        let quoted = quote_mysql_ident(&col.name);
        let kind = typemap::cell_kind(&col.source_type);
        let expr = match kind {
            CellKind::Text => format!("CAST({} AS CHAR)", quoted),
            CellKind::HexBytes => format!("HEX({})", quoted),
            CellKind::BitNumeric => format!("CAST({}+0 AS CHAR)", quoted),
        };
        select_exprs.push(expr);
        columns.push(ColumnPlan {
            name: col.name.clone(),
            kind,
            transforms: col.transforms.clone(),
        });
    }

    let select_sql = format!(
        "SELECT {} FROM {}",
        select_exprs.join(", "),
        quote_mysql_ident(&table.name)
    );
    (select_sql, columns)
}

impl MysqlReader {
    /// Build the reader for `table`, on a pool whose charset already
    /// matches the decoding filter for this table.
    pub fn new(pool: MySqlPool, table: &TableSpec, encoding: &str) -> Self {
        let (select_sql, columns) = build_select(table);
        Self {
            pool,
            label: table.qualified_name(),
            select_sql,
            columns,
            encoding: encoding.to_string(),
        }
    }
}

#[async_trait]
impl Reader for MysqlReader {
    fn label(&self) -> &str {
        &self.label
    }

    async fn map_rows(&mut self, out: &mut RowEmitter) -> Result<()> {
        let mut stream = sqlx::query(&self.select_sql).fetch(&self.pool);
        let mut ordinal = 0u64;

        while let Some(row) = stream.try_next().await.map_err(LoadError::Mysql)? {
            let mut cells = Vec::with_capacity(self.columns.len());
            for (i, plan) in self.columns.iter().enumerate() {
                let cell = match row.try_get::<Option<String>, _>(i) {
                    Ok(value) => value,
                    Err(e) => {
                        // Character decoding failed mid-value; NULL the
                        // cell and keep the row.
                        error!(
                            "{}: row {} column '{}' undecodable as {}: {}; substituting NULL",
                            self.label, ordinal, plan.name, self.encoding, e
                        );
                        None
                    }
                };
                let cell = match (plan.kind, cell) {
                    (CellKind::HexBytes, Some(hex)) => Some(format!("\\x{}", hex.to_lowercase())),
                    (_, other) => other,
                };
                cells.push(CellTransform::apply_all(&plan.transforms, cell));
            }

            if out.emit(LoadRow::new(cells)).await == EmitStatus::Cancelled {
                info!("{}: cancelled, releasing source connection", self.label);
                return Ok(());
            }
            ordinal += 1;
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::ColumnSpec;

    fn column(name: &str, source_type: &str) -> ColumnSpec {
        ColumnSpec {
            name: name.to_string(),
            source_type: source_type.to_string(),
            target_type: "text".to_string(),
            nullable: true,
            default: None,
            transforms: Vec::new(),
            comment: None,
        }
    }

    fn table(columns: Vec<ColumnSpec>) -> TableSpec {
        TableSpec {
            schema: "public".to_string(),
            name: "orders".to_string(),
            columns,
            comment: None,
            from_materialized_view: false,
        }
    }

    #[test]
    fn test_quote_mysql_ident() {
        assert_eq!(quote_mysql_ident("plain"), "`plain`");
        assert_eq!(quote_mysql_ident("we`ird"), "`we``ird`");
    }

    #[test]
    fn test_select_sql_casts_per_kind() {
        let t = table(vec![
            column("id", "int"),
            column("payload", "blob"),
            column("flags", "bit"),
        ]);
        let (sql, plans) = build_select(&t);
        assert_eq!(
            sql,
            "SELECT CAST(`id` AS CHAR), HEX(`payload`), CAST(`flags`+0 AS CHAR) FROM `orders`"
        );
        assert_eq!(plans.len(), 3);
        assert_eq!(plans[1].kind, CellKind::HexBytes);
    }

    #[test]
    fn test_hex_cell_becomes_bytea_literal() {
        let cell = Some("DEADBEEF".to_string());
        let rendered = match (CellKind::HexBytes, cell) {
            (CellKind::HexBytes, Some(hex)) => Some(format!("\\x{}", hex.to_lowercase())),
            (_, other) => other,
        };
        assert_eq!(rendered.as_deref(), Some("\\xdeadbeef"));
    }
}
