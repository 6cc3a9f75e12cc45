//! Configuration validation.

use crate::error::{LoadError, Result};

use super::types::{LoadConfig, SourceConfig};

const KNOWN_MYSQL_CHARSETS: &[&str] = &[
    "ascii", "big5", "binary", "cp1250", "cp1251", "cp1256", "cp1257", "cp850", "cp852", "cp866",
    "euckr", "gb2312", "gbk", "greek", "hebrew", "latin1", "latin2", "latin5", "latin7", "sjis",
    "tis620", "ucs2", "ujis", "utf16", "utf32", "utf8", "utf8mb3", "utf8mb4",
];

pub fn validate(config: &LoadConfig) -> Result<()> {
    if config.batch.rows == 0 {
        return Err(LoadError::Config("batch.rows must be at least 1".into()));
    }
    if config.batch.bytes == 0 {
        return Err(LoadError::Config("batch.bytes must be at least 1".into()));
    }
    if config.batch.concurrent_batches == 0 {
        return Err(LoadError::Config(
            "batch.concurrent-batches must be at least 1".into(),
        ));
    }
    if config.target.uri.trim().is_empty() {
        return Err(LoadError::Config("target.uri must not be empty".into()));
    }
    if config.target.schema.trim().is_empty() {
        return Err(LoadError::Config("target.schema must not be empty".into()));
    }
    if config.schema.data_only && config.schema.schema_only {
        return Err(LoadError::Config(
            "schema.data-only and schema.schema-only are mutually exclusive".into(),
        ));
    }

    match &config.source {
        SourceConfig::Fixed(fixed) => {
            if fixed.table.trim().is_empty() {
                return Err(LoadError::Config("source.table must not be empty".into()));
            }
            if fixed.fields.is_empty() {
                return Err(LoadError::Config(
                    "fixed source needs at least one field".into(),
                ));
            }
            for field in &fixed.fields {
                if field.length == 0 {
                    return Err(LoadError::Config(format!(
                        "field '{}' has zero length",
                        field.name
                    )));
                }
            }
            let mut names: Vec<&str> = fixed.fields.iter().map(|f| f.name.as_str()).collect();
            names.sort_unstable();
            names.dedup();
            if names.len() != fixed.fields.len() {
                return Err(LoadError::Config("duplicate fixed field names".into()));
            }
            // Fail loudly on encodings we cannot resolve, rather than at
            // the first data line.
            if encoding_rs::Encoding::for_label(fixed.encoding.as_bytes()).is_none() {
                return Err(LoadError::Config(format!(
                    "unknown encoding '{}'",
                    fixed.encoding
                )));
            }
        }
        SourceConfig::Mysql(mysql) => {
            if mysql.uri.trim().is_empty() {
                return Err(LoadError::Config("source.uri must not be empty".into()));
            }
            for filter in &mysql.decoding {
                // Decoding filters name MySQL connection charsets, not
                // IANA labels.
                if !KNOWN_MYSQL_CHARSETS.contains(&filter.encoding.to_lowercase().as_str()) {
                    return Err(LoadError::Config(format!(
                        "unknown MySQL charset '{}' in decoding filter",
                        filter.encoding
                    )));
                }
                if filter.matching.is_empty() {
                    return Err(LoadError::Config(
                        "decoding filter needs at least one pattern".into(),
                    ));
                }
            }
        }
    }

    Ok(())
}
