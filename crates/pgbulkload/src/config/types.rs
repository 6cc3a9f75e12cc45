//! Configuration type definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::core::row::BatchConfig;
use crate::core::schema::{CellTransform, IndexNames};

use super::uri::redact_uri;

/// Root configuration structure.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct LoadConfig {
    /// Source description (fixed-width files or a MySQL database).
    pub source: SourceConfig,

    /// Target PostgreSQL database.
    pub target: TargetConfig,

    /// Schema preparation/completion behavior.
    #[serde(default)]
    pub schema: SchemaConfig,

    /// Batch sizing and queue depth.
    #[serde(default)]
    pub batch: BatchSettings,

    /// Ordered PostgreSQL session settings, applied to every session
    /// immediately after connect.
    #[serde(default)]
    pub pg_settings: Vec<PgSetting>,
}

/// One PostgreSQL session setting, applied via `SET name TO 'value'`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PgSetting {
    pub name: String,
    pub value: String,
}

/// Source configuration, keyed by source kind.
#[derive(Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "kebab-case")]
pub enum SourceConfig {
    /// Fixed-width text files.
    Fixed(FixedSourceConfig),
    /// MySQL/MariaDB database.
    Mysql(MysqlSourceConfig),
}

impl fmt::Debug for SourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceConfig::Fixed(c) => f.debug_tuple("Fixed").field(c).finish(),
            SourceConfig::Mysql(c) => f
                .debug_struct("Mysql")
                .field("uri", &redact_uri(&c.uri))
                .field("only_tables", &c.only_tables)
                .field("exclude_tables", &c.exclude_tables)
                .field("decoding", &c.decoding)
                .field("materialize_views", &c.materialize_views)
                .finish(),
        }
    }
}

/// Fixed-width source: one target table per configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FixedSourceConfig {
    /// `fixed://path`, `stdin`, `inline:…`, `http(s)://…` or a glob.
    pub uri: String,

    /// Target table name (unqualified; target schema comes from `target`).
    pub table: String,

    /// Source text encoding.
    #[serde(default = "default_encoding")]
    pub encoding: String,

    /// Header lines to skip per input stream. The singular spelling is
    /// accepted as an alias; both keys mean the same field.
    #[serde(default, alias = "skip-line")]
    pub skip_lines: usize,

    /// Field layout, in column order.
    pub fields: Vec<FixedFieldConfig>,
}

/// One fixed-width field: a half-open character range `[start, start+length)`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct FixedFieldConfig {
    pub name: String,
    pub start: usize,
    pub length: usize,

    /// Target PostgreSQL type.
    #[serde(default = "default_field_type")]
    pub target_type: String,

    /// Whether the column allows NULL on the target.
    #[serde(default = "default_true")]
    pub nullable: bool,

    /// Per-cell transforms. Trailing whitespace is stripped by default;
    /// set transforms explicitly to override.
    #[serde(default)]
    pub transforms: Option<Vec<CellTransform>>,
}

impl FixedFieldConfig {
    /// Effective transform chain for this field.
    pub fn effective_transforms(&self) -> Vec<CellTransform> {
        self.transforms
            .clone()
            .unwrap_or_else(|| vec![CellTransform::TrimRight])
    }
}

/// MySQL source: whole-database migration with optional filters.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MysqlSourceConfig {
    /// `mysql://[user[:password]@][host[:port]]/dbname`, or `$VAR`.
    pub uri: String,

    /// Migrate only these tables (empty = all).
    #[serde(default)]
    pub only_tables: Vec<String>,

    /// Skip these tables.
    #[serde(default)]
    pub exclude_tables: Vec<String>,

    /// Per-table connection-encoding overrides.
    #[serde(default)]
    pub decoding: Vec<DecodingFilter>,

    /// Views to create on the source and migrate as tables.
    #[serde(default)]
    pub materialize_views: Vec<MaterializedViewConfig>,
}

impl fmt::Debug for MysqlSourceConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MysqlSourceConfig")
            .field("uri", &redact_uri(&self.uri))
            .field("only_tables", &self.only_tables)
            .field("exclude_tables", &self.exclude_tables)
            .field("decoding", &self.decoding)
            .field("materialize_views", &self.materialize_views)
            .finish()
    }
}

/// `decoding-as <encoding> matching <patterns>`: tables matching any of the
/// patterns are read through a session using this encoding.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct DecodingFilter {
    pub encoding: String,
    pub matching: Vec<String>,
}

impl DecodingFilter {
    /// Whether a table name matches one of the filter patterns.
    /// Patterns support a trailing `*` wildcard.
    pub fn matches(&self, table: &str) -> bool {
        self.matching.iter().any(|p| match p.strip_suffix('*') {
            Some(prefix) => table.starts_with(prefix),
            None => table == p,
        })
    }
}

/// A view materialized on the source side and migrated as a table.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct MaterializedViewConfig {
    /// View (and target table) name.
    pub name: String,
    /// SELECT body of the view.
    pub sql: String,
}

/// Target PostgreSQL database.
#[derive(Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct TargetConfig {
    /// `postgresql://user:pw@host:port/dbname?sslmode=…`, or `$VAR`.
    pub uri: String,

    /// Target schema.
    #[serde(default = "default_schema")]
    pub schema: String,
}

impl fmt::Debug for TargetConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TargetConfig")
            .field("uri", &redact_uri(&self.uri))
            .field("schema", &self.schema)
            .finish()
    }
}

/// Schema preparation/completion behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct SchemaConfig {
    /// Create target tables during prepare.
    #[serde(default = "default_true")]
    pub create_tables: bool,

    /// Drop existing FKs/tables before creating.
    #[serde(default)]
    pub include_drop: bool,

    /// Load data only; skip all schema changes.
    #[serde(default)]
    pub data_only: bool,

    /// Create schema only; skip the data load.
    #[serde(default)]
    pub schema_only: bool,

    /// TRUNCATE each target table before loading.
    #[serde(default)]
    pub truncate: bool,

    /// Disable triggers while loading.
    #[serde(default)]
    pub disable_triggers: bool,

    /// Build indexes after load.
    #[serde(default = "default_true")]
    pub create_indexes: bool,

    /// Re-add foreign keys in the complete phase.
    #[serde(default = "default_true")]
    pub foreign_keys: bool,

    /// Reset sequences after load.
    #[serde(default = "default_true")]
    pub reset_sequences: bool,

    /// Carry table/column comments to the target.
    #[serde(default = "default_true")]
    pub comments: bool,

    /// Index naming policy.
    #[serde(default)]
    pub index_names: IndexNames,
}

impl Default for SchemaConfig {
    fn default() -> Self {
        Self {
            create_tables: true,
            include_drop: false,
            data_only: false,
            schema_only: false,
            truncate: false,
            disable_triggers: false,
            create_indexes: true,
            foreign_keys: true,
            reset_sequences: true,
            comments: true,
            index_names: IndexNames::default(),
        }
    }
}

/// Batch sizing and queue depth.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct BatchSettings {
    /// Maximum rows per batch.
    #[serde(default = "default_batch_rows")]
    pub rows: usize,

    /// Maximum approximate bytes per batch.
    #[serde(default = "default_batch_bytes")]
    pub bytes: usize,

    /// Bounded queue capacity between reader and writer.
    #[serde(default = "default_concurrent_batches")]
    pub concurrent_batches: usize,
}

impl Default for BatchSettings {
    fn default() -> Self {
        Self {
            rows: default_batch_rows(),
            bytes: default_batch_bytes(),
            concurrent_batches: default_concurrent_batches(),
        }
    }
}

impl From<BatchSettings> for BatchConfig {
    fn from(s: BatchSettings) -> Self {
        BatchConfig {
            rows: s.rows,
            bytes: s.bytes,
            concurrent_batches: s.concurrent_batches,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_encoding() -> String {
    "utf-8".to_string()
}

fn default_field_type() -> String {
    "text".to_string()
}

fn default_schema() -> String {
    "public".to_string()
}

fn default_batch_rows() -> usize {
    25_000
}

fn default_batch_bytes() -> usize {
    20 * 1024 * 1024
}

fn default_concurrent_batches() -> usize {
    4
}
