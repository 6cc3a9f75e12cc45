//! Fixed-width file reader.
//!
//! Input is a sequence of encoded byte streams: stdin, an inline block, a
//! filesystem path, an HTTP URI, or a glob. Each line yields one row by
//! slicing configured `[start, start+length)` character ranges; a field
//! starting past the end of the line is NULL, and a line ending inside a
//! field yields the available suffix (ragged right).

use std::path::PathBuf;

use async_trait::async_trait;
use encoding_rs::Encoding;
use tokio::io::AsyncReadExt;
use tracing::{debug, error, info};
use url::Url;

use crate::config::{FixedFieldConfig, FixedSourceConfig};
use crate::core::row::Row;
use crate::core::schema::CellTransform;
use crate::error::{LoadError, Result};

use super::{EmitStatus, Reader, RowEmitter};

/// One resolved byte-stream input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FixedInput {
    Stdin,
    Inline(String),
    Path(PathBuf),
    Http(Url),
}

impl FixedInput {
    fn describe(&self) -> String {
        match self {
            FixedInput::Stdin => "stdin".to_string(),
            FixedInput::Inline(_) => "inline".to_string(),
            FixedInput::Path(p) => p.display().to_string(),
            FixedInput::Http(u) => u.to_string(),
        }
    }
}

/// Resolve a fixed-source URI into concrete inputs. Globs expand to their
/// matches in sorted order; a glob matching nothing is an error.
pub fn resolve_inputs(uri: &str) -> Result<Vec<FixedInput>> {
    if uri == "stdin" || uri == "-" {
        return Ok(vec![FixedInput::Stdin]);
    }
    if let Some(body) = uri.strip_prefix("inline:") {
        return Ok(vec![FixedInput::Inline(body.to_string())]);
    }
    if uri.starts_with("http://") || uri.starts_with("https://") {
        let url = Url::parse(uri)
            .map_err(|e| LoadError::Config(format!("Invalid http source '{}': {}", uri, e)))?;
        return Ok(vec![FixedInput::Http(url)]);
    }

    let path = uri.strip_prefix("fixed://").unwrap_or(uri);
    if path.contains('*') || path.contains('?') || path.contains('[') {
        let entries = glob::glob(path)
            .map_err(|e| LoadError::Config(format!("Invalid glob '{}': {}", path, e)))?;
        let mut inputs = Vec::new();
        for entry in entries {
            match entry {
                Ok(p) if p.is_file() => inputs.push(FixedInput::Path(p)),
                Ok(_) => {}
                Err(e) => {
                    return Err(LoadError::Config(format!(
                        "Unreadable glob entry under '{}': {}",
                        path, e
                    )))
                }
            }
        }
        if inputs.is_empty() {
            return Err(LoadError::NotFound(format!("no files match '{}'", path)));
        }
        inputs.sort_by(|a, b| a.describe().cmp(&b.describe()));
        return Ok(inputs);
    }

    Ok(vec![FixedInput::Path(PathBuf::from(path))])
}

struct FixedField {
    name: String,
    start: usize,
    length: usize,
    transforms: Vec<CellTransform>,
}

impl From<&FixedFieldConfig> for FixedField {
    fn from(cfg: &FixedFieldConfig) -> Self {
        Self {
            name: cfg.name.clone(),
            start: cfg.start,
            length: cfg.length,
            transforms: cfg.effective_transforms(),
        }
    }
}

/// Reader for fixed-width text sources.
pub struct FixedReader {
    label: String,
    inputs: Vec<FixedInput>,
    encoding: &'static Encoding,
    skip_lines: usize,
    fields: Vec<FixedField>,
}

impl FixedReader {
    pub fn new(cfg: &FixedSourceConfig, label: String) -> Result<Self> {
        let encoding = Encoding::for_label(cfg.encoding.as_bytes())
            .ok_or_else(|| LoadError::Config(format!("unknown encoding '{}'", cfg.encoding)))?;
        Ok(Self {
            label,
            inputs: resolve_inputs(&cfg.uri)?,
            encoding,
            skip_lines: cfg.skip_lines,
            fields: cfg.fields.iter().map(FixedField::from).collect(),
        })
    }

    async fn read_input(&self, input: &FixedInput) -> Result<Vec<u8>> {
        match input {
            FixedInput::Stdin => {
                let mut buf = Vec::new();
                tokio::io::stdin().read_to_end(&mut buf).await?;
                Ok(buf)
            }
            FixedInput::Inline(text) => Ok(text.clone().into_bytes()),
            FixedInput::Path(path) => Ok(tokio::fs::read(path).await?),
            FixedInput::Http(url) => {
                let response = reqwest::get(url.clone()).await?.error_for_status()?;
                Ok(response.bytes().await?.to_vec())
            }
        }
    }
}

/// Slice one field out of a decoded line. Character-based, ragged right.
fn extract_field(chars: &[char], field: &FixedField) -> Option<String> {
    if field.start >= chars.len() {
        return None;
    }
    let end = (field.start + field.length).min(chars.len());
    let raw: String = chars[field.start..end].iter().collect();
    CellTransform::apply_all(&field.transforms, Some(raw))
}

fn extract_row(line: &str, fields: &[FixedField]) -> Row {
    let chars: Vec<char> = line.chars().collect();
    Row::new(fields.iter().map(|f| extract_field(&chars, f)).collect())
}

#[async_trait]
impl Reader for FixedReader {
    fn label(&self) -> &str {
        &self.label
    }

    async fn map_rows(&mut self, out: &mut RowEmitter) -> Result<()> {
        for input in &self.inputs {
            let bytes = self.read_input(input).await?;
            debug!(
                "{}: reading {} ({} bytes, {})",
                self.label,
                input.describe(),
                bytes.len(),
                self.encoding.name()
            );

            let mut emitted = 0u64;
            for (idx, raw_line) in bytes.split(|&b| b == b'\n').enumerate() {
                if idx < self.skip_lines {
                    continue;
                }
                let raw_line = raw_line.strip_suffix(b"\r").unwrap_or(raw_line);
                if raw_line.is_empty() {
                    continue;
                }

                let (text, _, had_errors) = self.encoding.decode(raw_line);
                let row = if had_errors {
                    // Undecodable line: substitute a null row so the
                    // producer continues, and count the incident.
                    out.record_rejected();
                    let err = LoadError::Decode(format!(
                        "line {} of {} is not valid {}",
                        idx + 1,
                        input.describe(),
                        self.encoding.name()
                    ));
                    error!("{}: {}; substituting a null row", self.label, err);
                    Row::nulls(self.fields.len())
                } else {
                    extract_row(&text, &self.fields)
                };

                if out.emit(row).await == EmitStatus::Cancelled {
                    info!("{}: cancelled, closing {}", self.label, input.describe());
                    return Ok(());
                }
                emitted += 1;
            }
            debug!("{}: {} rows from {}", self.label, emitted, input.describe());
        }
        Ok(())
    }
}
