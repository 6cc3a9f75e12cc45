//! MySQL to PostgreSQL column-type casting.

/// Map a MySQL column to a PostgreSQL type string.
///
/// `data_type` is `INFORMATION_SCHEMA.COLUMNS.DATA_TYPE`; `column_type`
/// the full spelling (needed for `unsigned`). Auto-increment integer
/// columns become serials so the target owns a sequence.
pub fn target_type(
    data_type: &str,
    column_type: &str,
    max_length: i64,
    precision: i64,
    scale: i64,
    auto_increment: bool,
) -> String {
    let data_type = data_type.to_lowercase();
    let unsigned = column_type.to_lowercase().contains("unsigned");

    if auto_increment {
        return match data_type.as_str() {
            "bigint" => "bigserial".to_string(),
            _ => "serial".to_string(),
        };
    }

    match data_type.as_str() {
        "tinyint" | "smallint" => "smallint".to_string(),
        "mediumint" => "integer".to_string(),
        "int" | "integer" => {
            if unsigned {
                "bigint".to_string()
            } else {
                "integer".to_string()
            }
        }
        "bigint" => {
            if unsigned {
                "numeric(20,0)".to_string()
            } else {
                "bigint".to_string()
            }
        }
        "decimal" | "numeric" => {
            if precision > 0 {
                format!("numeric({},{})", precision, scale)
            } else {
                "numeric".to_string()
            }
        }
        "float" => "real".to_string(),
        "double" => "double precision".to_string(),
        "bit" => "bigint".to_string(),
        "char" => {
            if max_length > 0 {
                format!("char({})", max_length)
            } else {
                "char".to_string()
            }
        }
        "varchar" => {
            if max_length > 0 {
                format!("varchar({})", max_length)
            } else {
                "text".to_string()
            }
        }
        "tinytext" | "text" | "mediumtext" | "longtext" | "enum" | "set" => "text".to_string(),
        "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
            "bytea".to_string()
        }
        "date" => "date".to_string(),
        "time" => "time".to_string(),
        "datetime" | "timestamp" => "timestamptz".to_string(),
        "year" => "smallint".to_string(),
        "json" => "jsonb".to_string(),
        _ => "text".to_string(),
    }
}

/// How cells of this type are rendered into COPY text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CellKind {
    /// Server-side `CAST(col AS CHAR)`.
    Text,
    /// Server-side `HEX(col)`, prefixed with `\x` for bytea input.
    HexBytes,
    /// Server-side `col+0` for bit columns.
    BitNumeric,
}

/// Pick the fetch rendering for a MySQL type.
pub fn cell_kind(data_type: &str) -> CellKind {
    match data_type.to_lowercase().as_str() {
        "binary" | "varbinary" | "tinyblob" | "blob" | "mediumblob" | "longblob" => {
            CellKind::HexBytes
        }
        "bit" => CellKind::BitNumeric,
        _ => CellKind::Text,
    }
}
