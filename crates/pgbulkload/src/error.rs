//! Error types for the bulk loader.

use thiserror::Error;

/// Main error type for load operations.
#[derive(Error, Debug)]
pub enum LoadError {
    /// Configuration error (invalid YAML, bad URI, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Target or source unreachable: network, auth, TLS handshake.
    #[error("Connection failed ({context}): {message}")]
    Connect { context: String, message: String },

    /// A statement the server rejected. SQLSTATE is preserved when the
    /// driver reports one.
    #[error("Database error [{}]: {message}", .sqlstate.as_deref().unwrap_or("-----"))]
    Database {
        sqlstate: Option<String>,
        message: String,
    },

    /// Source bytes could not be decoded in the configured encoding.
    #[error("Decode error: {0}")]
    Decode(String),

    /// Malformed source line or value.
    #[error("Parse error: {0}")]
    Parse(String),

    /// A referenced table is absent in the source.
    #[error("Not found: {0}")]
    NotFound(String),

    /// `with_transaction` called while a transaction was already open.
    #[error("Nested transaction")]
    NestedTxn,

    /// External or peer cancellation.
    #[error("Load cancelled")]
    Cancelled,

    /// A pipeline task died without reporting a load error.
    #[error("Task failure: {0}")]
    Task(String),

    /// MySQL source connection or query error.
    #[error("Source database error: {0}")]
    Mysql(#[from] sqlx::Error),

    /// HTTP source fetch error.
    #[error("HTTP source error: {0}")]
    Http(#[from] reqwest::Error),

    /// IO error (file operations, stdin).
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// YAML serialization/deserialization error.
    #[error("YAML error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<tokio_postgres::Error> for LoadError {
    /// Preserve the SQLSTATE for server-reported errors; everything else
    /// (connection lost, protocol breakage) maps to `Connect` and is
    /// treated as fatal by the writer.
    fn from(e: tokio_postgres::Error) -> Self {
        match e.as_db_error() {
            Some(db) => LoadError::Database {
                sqlstate: Some(db.code().code().to_string()),
                message: db.message().to_string(),
            },
            None => LoadError::Connect {
                context: "postgresql".to_string(),
                message: e.to_string(),
            },
        }
    }
}

impl LoadError {
    /// Create a Connect error with context about where it occurred.
    pub fn connect(context: impl Into<String>, message: impl Into<String>) -> Self {
        LoadError::Connect {
            context: context.into(),
            message: message.into(),
        }
    }

    /// Create a Database error without a SQLSTATE.
    pub fn database(message: impl Into<String>) -> Self {
        LoadError::Database {
            sqlstate: None,
            message: message.into(),
        }
    }

    /// Whether the writer may recover from this error by splitting the
    /// current batch. Only server-reported statement errors qualify;
    /// anything else aborts the table pipeline.
    pub fn is_batch_recoverable(&self) -> bool {
        matches!(self, LoadError::Database { .. })
    }

    /// Process exit code for this error.
    pub fn exit_code(&self) -> u8 {
        match self {
            LoadError::Config(_) => 2,
            LoadError::Cancelled => 130,
            _ => 1,
        }
    }

    /// Format error with full details including error chain.
    pub fn format_detailed(&self) -> String {
        let mut output = format!("Error: {}\n", self);

        let mut source = std::error::Error::source(self);
        let mut depth = 1;
        while let Some(err) = source {
            output.push_str(&format!("\nCaused by:\n  {}: {}", depth, err));
            source = err.source();
            depth += 1;
        }

        output
    }
}

/// Result type alias for load operations.
pub type Result<T> = std::result::Result<T, LoadError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_database_error_display_includes_sqlstate() {
        let err = LoadError::Database {
            sqlstate: Some("23514".to_string()),
            message: "check constraint violated".to_string(),
        };
        let s = err.to_string();
        assert!(s.contains("23514"));
        assert!(s.contains("check constraint violated"));
    }

    #[test]
    fn test_database_error_display_without_sqlstate() {
        let err = LoadError::database("boom");
        assert!(err.to_string().contains("-----"));
    }

    #[test]
    fn test_batch_recoverable() {
        assert!(LoadError::database("x").is_batch_recoverable());
        assert!(!LoadError::connect("postgresql", "refused").is_batch_recoverable());
        assert!(!LoadError::Cancelled.is_batch_recoverable());
        assert!(!LoadError::Parse("bad line".into()).is_batch_recoverable());
    }

    #[test]
    fn test_exit_codes() {
        assert_eq!(LoadError::Config("x".into()).exit_code(), 2);
        assert_eq!(LoadError::Cancelled.exit_code(), 130);
        assert_eq!(LoadError::database("x").exit_code(), 1);
    }
}
