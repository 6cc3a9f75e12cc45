//! Schema metadata types for tables, columns, indexes and constraints.
//!
//! These are built once per run (from source introspection or from the
//! fixed-width field layout) and stay immutable afterwards. Table oids are
//! tracked in a side mapping filled in after CREATE TABLE rather than by
//! mutating the specs.

use serde::{Deserialize, Serialize};

/// Quote a PostgreSQL identifier.
pub fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// Index naming policy for the target schema.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum IndexNames {
    /// Suffix each index name with the table oid so names are unique
    /// across the whole target schema.
    #[default]
    Uniquify,
    /// Keep source names; collisions surface as database errors.
    Preserve,
}

/// A cell-level transform applied by readers before emission.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CellTransform {
    /// Strip trailing whitespace.
    TrimRight,
    /// Strip leading and trailing whitespace.
    Trim,
    /// Replace an exact value with NULL.
    NullIf(String),
    /// Replace a blank (all-whitespace) value with NULL.
    NullIfBlank,
    /// Replace MySQL zero dates (`0000-00-00...`) with NULL.
    ZeroDateToNull,
}

impl CellTransform {
    /// Apply to a non-null cell; `None` means the cell becomes NULL.
    pub fn apply(&self, value: String) -> Option<String> {
        match self {
            CellTransform::TrimRight => Some(value.trim_end().to_string()),
            CellTransform::Trim => Some(value.trim().to_string()),
            CellTransform::NullIf(v) => {
                if &value == v {
                    None
                } else {
                    Some(value)
                }
            }
            CellTransform::NullIfBlank => {
                if value.trim().is_empty() {
                    None
                } else {
                    Some(value)
                }
            }
            CellTransform::ZeroDateToNull => {
                if value.starts_with("0000-00-00") {
                    None
                } else {
                    Some(value)
                }
            }
        }
    }

    /// Run a transform chain over an optional cell.
    pub fn apply_all(transforms: &[CellTransform], cell: Option<String>) -> Option<String> {
        let mut cell = cell;
        for t in transforms {
            cell = match cell {
                Some(v) => t.apply(v),
                None => None,
            };
        }
        cell
    }
}

/// Column metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ColumnSpec {
    /// Column name.
    pub name: String,

    /// Source type string (e.g. "varchar", or "text" for fixed fields).
    pub source_type: String,

    /// Target PostgreSQL type string (e.g. "bigint", "text").
    pub target_type: String,

    /// Whether the column allows NULL.
    pub nullable: bool,

    /// DEFAULT expression, verbatim.
    #[serde(default)]
    pub default: Option<String>,

    /// Transforms applied to every cell of this column.
    #[serde(default)]
    pub transforms: Vec<CellTransform>,

    /// Column comment carried to the target.
    #[serde(default)]
    pub comment: Option<String>,
}

/// Table metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TableSpec {
    /// Target schema name.
    pub schema: String,

    /// Table name.
    pub name: String,

    /// Ordered column definitions; this order fixes the COPY column list.
    pub columns: Vec<ColumnSpec>,

    /// Table comment carried to the target.
    #[serde(default)]
    pub comment: Option<String>,

    /// Set when the table is backed by a view materialized on the source.
    #[serde(default)]
    pub from_materialized_view: bool,
}

impl TableSpec {
    /// `schema.table`, unquoted, used as the stats label.
    pub fn qualified_name(&self) -> String {
        format!("{}.{}", self.schema, self.name)
    }

    /// `"schema"."table"` for use in SQL.
    pub fn quoted_name(&self) -> String {
        format!("{}.{}", quote_ident(&self.schema), quote_ident(&self.name))
    }

    /// Column names in COPY order.
    pub fn column_names(&self) -> Vec<String> {
        self.columns.iter().map(|c| c.name.clone()).collect()
    }

    /// CREATE TABLE statement for the target.
    pub fn create_sql(&self) -> String {
        let col_defs: Vec<String> = self
            .columns
            .iter()
            .map(|c| {
                let mut def = format!("{} {}", quote_ident(&c.name), c.target_type);
                if !c.nullable {
                    def.push_str(" NOT NULL");
                }
                if let Some(d) = &c.default {
                    def.push_str(&format!(" DEFAULT {}", d));
                }
                def
            })
            .collect();
        format!(
            "CREATE TABLE {} (\n    {}\n)",
            self.quoted_name(),
            col_defs.join(",\n    ")
        )
    }
}

/// Index metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IndexSpec {
    /// Source index name.
    pub name: String,

    /// Owning table schema.
    pub table_schema: String,

    /// Owning table name.
    pub table_name: String,

    /// Whether the source index backed the primary key. Built as a UNIQUE
    /// index first, then promoted in the complete phase.
    pub primary: bool,

    /// Whether the index is unique.
    pub unique: bool,

    /// Indexed column names.
    pub columns: Vec<String>,
}

impl IndexSpec {
    /// Stats/table label of the owning table.
    pub fn table_label(&self) -> String {
        format!("{}.{}", self.table_schema, self.table_name)
    }

    /// The name this index gets on the target under the given policy.
    pub fn target_name(&self, names: IndexNames, table_oid: Option<u32>) -> String {
        match (names, table_oid) {
            (IndexNames::Uniquify, Some(oid)) => format!("{}_{}", self.name, oid),
            _ => self.name.clone(),
        }
    }

    /// CREATE INDEX statement. Primary-key indexes are created UNIQUE and
    /// promoted to PRIMARY KEY after the load.
    pub fn create_sql(&self, names: IndexNames, table_oid: Option<u32>) -> String {
        let unique = if self.unique || self.primary {
            "UNIQUE "
        } else {
            ""
        };
        let cols: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
        format!(
            "CREATE {}INDEX {} ON {}.{} ({})",
            unique,
            quote_ident(&self.target_name(names, table_oid)),
            quote_ident(&self.table_schema),
            quote_ident(&self.table_name),
            cols.join(", ")
        )
    }
}

/// Foreign key metadata.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForeignKeySpec {
    /// Constraint name.
    pub name: String,

    /// Owning table schema.
    pub table_schema: String,

    /// Owning table name.
    pub table_name: String,

    /// Source column names.
    pub columns: Vec<String>,

    /// Referenced table schema.
    pub ref_schema: String,

    /// Referenced table name.
    pub ref_table: String,

    /// Referenced column names.
    pub ref_columns: Vec<String>,

    /// ON DELETE action.
    pub on_delete: String,

    /// ON UPDATE action.
    pub on_update: String,
}

impl ForeignKeySpec {
    /// ALTER TABLE statement adding this constraint.
    pub fn add_sql(&self) -> String {
        let cols: Vec<String> = self.columns.iter().map(|c| quote_ident(c)).collect();
        let ref_cols: Vec<String> = self.ref_columns.iter().map(|c| quote_ident(c)).collect();
        format!(
            "ALTER TABLE {}.{} ADD CONSTRAINT {} FOREIGN KEY ({}) REFERENCES {}.{} ({}) ON DELETE {} ON UPDATE {}",
            quote_ident(&self.table_schema),
            quote_ident(&self.table_name),
            quote_ident(&self.name),
            cols.join(", "),
            quote_ident(&self.ref_schema),
            quote_ident(&self.ref_table),
            ref_cols.join(", "),
            self.on_delete,
            self.on_update,
        )
    }
}

/// Everything the run knows about the source schema, mapped to the target.
#[derive(Debug, Clone, Default)]
pub struct Catalog {
    pub tables: Vec<TableSpec>,
    pub indexes: Vec<IndexSpec>,
    pub foreign_keys: Vec<ForeignKeySpec>,
}

impl Catalog {
    /// Indexes belonging to one table.
    pub fn indexes_for(&self, table: &TableSpec) -> Vec<IndexSpec> {
        self.indexes
            .iter()
            .filter(|i| i.table_schema == table.schema && i.table_name == table.name)
            .cloned()
            .collect()
    }

    /// The largest index count on any single table; sizes the index kernel.
    pub fn max_index_fanout(&self) -> usize {
        self.tables
            .iter()
            .map(|t| self.indexes_for(t).len())
            .max()
            .unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn col(name: &str, ty: &str) -> ColumnSpec {
        ColumnSpec {
            name: name.to_string(),
            source_type: ty.to_string(),
            target_type: ty.to_string(),
            nullable: true,
            default: None,
            transforms: Vec::new(),
            comment: None,
        }
    }

    fn table(name: &str, columns: Vec<ColumnSpec>) -> TableSpec {
        TableSpec {
            schema: "public".to_string(),
            name: name.to_string(),
            columns,
            comment: None,
            from_materialized_view: false,
        }
    }

    #[test]
    fn test_quote_ident_escapes_quotes() {
        assert_eq!(quote_ident("plain"), "\"plain\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_create_sql() {
        let mut c = col("id", "bigint");
        c.nullable = false;
        c.default = Some("nextval('t_id_seq')".to_string());
        let t = table("t", vec![c, col("v", "text")]);
        let sql = t.create_sql();
        assert!(sql.starts_with("CREATE TABLE \"public\".\"t\""));
        assert!(sql.contains("\"id\" bigint NOT NULL DEFAULT nextval('t_id_seq')"));
        assert!(sql.contains("\"v\" text"));
    }

    #[test]
    fn test_index_uniquify() {
        let idx = IndexSpec {
            name: "v_idx".to_string(),
            table_schema: "public".to_string(),
            table_name: "t".to_string(),
            primary: false,
            unique: false,
            columns: vec!["v".to_string()],
        };
        assert_eq!(idx.target_name(IndexNames::Uniquify, Some(16385)), "v_idx_16385");
        assert_eq!(idx.target_name(IndexNames::Preserve, Some(16385)), "v_idx");
        // No oid known yet: keep the source name rather than inventing one.
        assert_eq!(idx.target_name(IndexNames::Uniquify, None), "v_idx");
    }

    #[test]
    fn test_index_names_unique_after_uniquify() {
        // P5: same index name on two tables deconflicts via distinct oids.
        let a = IndexSpec {
            name: "v_idx".to_string(),
            table_schema: "public".to_string(),
            table_name: "a".to_string(),
            primary: false,
            unique: false,
            columns: vec!["v".to_string()],
        };
        let mut b = a.clone();
        b.table_name = "b".to_string();
        let na = a.target_name(IndexNames::Uniquify, Some(100));
        let nb = b.target_name(IndexNames::Uniquify, Some(101));
        assert_ne!(na, nb);
    }

    #[test]
    fn test_primary_index_created_unique() {
        let idx = IndexSpec {
            name: "t_pkey".to_string(),
            table_schema: "public".to_string(),
            table_name: "t".to_string(),
            primary: true,
            unique: true,
            columns: vec!["id".to_string()],
        };
        let sql = idx.create_sql(IndexNames::Preserve, None);
        assert!(sql.starts_with("CREATE UNIQUE INDEX \"t_pkey\""));
    }

    #[test]
    fn test_fk_add_sql() {
        let fk = ForeignKeySpec {
            name: "orders_user_fk".to_string(),
            table_schema: "public".to_string(),
            table_name: "orders".to_string(),
            columns: vec!["user_id".to_string()],
            ref_schema: "public".to_string(),
            ref_table: "users".to_string(),
            ref_columns: vec!["id".to_string()],
            on_delete: "CASCADE".to_string(),
            on_update: "NO ACTION".to_string(),
        };
        let sql = fk.add_sql();
        assert!(sql.contains("ADD CONSTRAINT \"orders_user_fk\" FOREIGN KEY (\"user_id\")"));
        assert!(sql.contains("ON DELETE CASCADE"));
    }

    #[test]
    fn test_max_index_fanout() {
        let mut catalog = Catalog {
            tables: vec![table("a", vec![col("x", "text")]), table("b", vec![col("x", "text")])],
            ..Default::default()
        };
        for name in ["i1", "i2", "i3"] {
            catalog.indexes.push(IndexSpec {
                name: name.to_string(),
                table_schema: "public".to_string(),
                table_name: "a".to_string(),
                primary: false,
                unique: false,
                columns: vec!["x".to_string()],
            });
        }
        catalog.indexes.push(IndexSpec {
            name: "i4".to_string(),
            table_schema: "public".to_string(),
            table_name: "b".to_string(),
            primary: false,
            unique: false,
            columns: vec!["x".to_string()],
        });
        assert_eq!(catalog.max_index_fanout(), 3);
    }

    #[test]
    fn test_transform_chain() {
        let transforms = vec![CellTransform::Trim, CellTransform::NullIf("".to_string())];
        assert_eq!(
            CellTransform::apply_all(&transforms, Some("  x ".to_string())),
            Some("x".to_string())
        );
        assert_eq!(CellTransform::apply_all(&transforms, Some("   ".to_string())), None);
        assert_eq!(CellTransform::apply_all(&transforms, None), None);
    }

    #[test]
    fn test_zero_date_transform() {
        let t = CellTransform::ZeroDateToNull;
        assert_eq!(t.apply("0000-00-00 00:00:00".to_string()), None);
        assert_eq!(
            t.apply("2024-01-01".to_string()),
            Some("2024-01-01".to_string())
        );
    }
}
