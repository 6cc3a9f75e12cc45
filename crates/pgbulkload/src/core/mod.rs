//! Database-agnostic core types shared by readers, the writer and the
//! schema orchestrator.

pub mod row;
pub mod schema;

pub use row::{Batch, BatchConfig, Row};
pub use schema::{
    quote_ident, CellTransform, Catalog, ColumnSpec, ForeignKeySpec, IndexNames, IndexSpec,
    TableSpec,
};
