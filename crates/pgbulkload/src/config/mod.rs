//! Configuration loading and validation.

mod types;
pub mod uri;
mod validation;

pub use types::*;
pub use uri::{ConnectionSpec, MysqlSpec, PgHost, TlsMode};

use crate::error::{LoadError, Result};
use std::path::Path;

impl LoadConfig {
    /// Load configuration from a file.
    ///
    /// `.json` files are parsed as JSON; everything else as YAML.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)?;

        let extension = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.to_lowercase());

        match extension.as_deref() {
            Some("json") => Self::from_json(&content),
            _ => Self::from_yaml(&content),
        }
    }

    /// Parse configuration from a YAML string.
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        let config: LoadConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    /// Parse configuration from a JSON string.
    pub fn from_json(json: &str) -> Result<Self> {
        let config: LoadConfig = serde_json::from_str(json)
            .map_err(|e| LoadError::Config(format!("Failed to parse JSON config: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Validate the configuration.
    pub fn validate(&self) -> Result<()> {
        validation::validate(self)
    }

    /// Resolved target connection spec.
    pub fn target_spec(&self) -> Result<ConnectionSpec> {
        ConnectionSpec::parse(&self.target.uri)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::schema::IndexNames;
    use std::io::Write;
    use tempfile::NamedTempFile;

    const FIXED_YAML: &str = r#"
source:
  type: fixed
  uri: fixed:///data/accounts.dat
  table: accounts
  encoding: latin1
  skip-lines: 1
  fields:
    - { name: id, start: 0, length: 4, target-type: integer, nullable: false }
    - { name: name, start: 4, length: 6 }
    - { name: amount, start: 10, length: 5, target-type: integer }

target:
  uri: postgresql://app:pw@localhost:5432/accounts
  schema: public

schema:
  include-drop: true
  index-names: uniquify

batch:
  rows: 1024
  concurrent-batches: 2

pg-settings:
  - { name: work_mem, value: 128MB }
  - { name: maintenance_work_mem, value: 512MB }
"#;

    const MYSQL_YAML: &str = r#"
source:
  type: mysql
  uri: mysql://root:pw@localhost/shop
  decoding:
    - { encoding: latin1, matching: [orders] }

target:
  uri: postgresql://app:pw@localhost/shop
"#;

    #[test]
    fn test_fixed_yaml_roundtrip() {
        let config = LoadConfig::from_yaml(FIXED_YAML).unwrap();
        match &config.source {
            SourceConfig::Fixed(f) => {
                assert_eq!(f.table, "accounts");
                assert_eq!(f.encoding, "latin1");
                assert_eq!(f.skip_lines, 1);
                assert_eq!(f.fields.len(), 3);
                assert_eq!(f.fields[2].start, 10);
                assert_eq!(f.fields[2].target_type, "integer");
            }
            other => panic!("expected fixed source, got {:?}", other),
        }
        assert_eq!(config.batch.rows, 1024);
        assert_eq!(config.batch.concurrent_batches, 2);
        assert_eq!(config.schema.index_names, IndexNames::Uniquify);
        assert_eq!(config.pg_settings.len(), 2);
        assert_eq!(config.pg_settings[0].name, "work_mem");
    }

    #[test]
    fn test_skip_line_singular_alias() {
        let yaml = FIXED_YAML.replace("skip-lines: 1", "skip-line: 3");
        let config = LoadConfig::from_yaml(&yaml).unwrap();
        match &config.source {
            SourceConfig::Fixed(f) => assert_eq!(f.skip_lines, 3),
            _ => unreachable!(),
        }
    }

    #[test]
    fn test_mysql_yaml() {
        let config = LoadConfig::from_yaml(MYSQL_YAML).unwrap();
        match &config.source {
            SourceConfig::Mysql(m) => {
                assert_eq!(m.decoding.len(), 1);
                assert!(m.decoding[0].matches("orders"));
                assert!(!m.decoding[0].matches("users"));
            }
            other => panic!("expected mysql source, got {:?}", other),
        }
        // Defaults fill in.
        assert!(config.schema.create_tables);
        assert!(!config.schema.include_drop);
        assert_eq!(config.batch.rows, 25_000);
    }

    #[test]
    fn test_decoding_filter_wildcard() {
        let f = DecodingFilter {
            encoding: "latin1".to_string(),
            matching: vec!["legacy_*".to_string()],
        };
        assert!(f.matches("legacy_orders"));
        assert!(!f.matches("orders"));
    }

    #[test]
    fn test_load_from_file_yaml() {
        let mut file = NamedTempFile::with_suffix(".yaml").unwrap();
        file.write_all(FIXED_YAML.as_bytes()).unwrap();
        file.flush().unwrap();

        let config = LoadConfig::load(file.path()).unwrap();
        assert_eq!(config.target.schema, "public");
    }

    #[test]
    fn test_validation_rejects_zero_batch_rows() {
        let yaml = FIXED_YAML.replace("rows: 1024", "rows: 0");
        assert!(LoadConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_validation_rejects_unknown_encoding() {
        let yaml = FIXED_YAML.replace("encoding: latin1", "encoding: klingon-8");
        assert!(LoadConfig::from_yaml(&yaml).is_err());
    }

    #[test]
    fn test_validation_rejects_empty_fields() {
        let yaml = r#"
source:
  type: fixed
  uri: stdin
  table: t
  fields: []
target:
  uri: postgresql://a@h/d
"#;
        assert!(LoadConfig::from_yaml(yaml).is_err());
    }

    #[test]
    fn test_debug_redacts_passwords() {
        let config = LoadConfig::from_yaml(MYSQL_YAML).unwrap();
        let dbg = format!("{:?}", config);
        assert!(!dbg.contains(":pw@"));
    }
}
