//! Key-value fallback file
//!
//! Reads `KEY=VALUE` lines into a typed map. Nothing in the file is ever
//! executed: `export` prefixes, comments and quotes are understood, and
//! anything else is a parse error.

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};

use crate::{Result, SecretError};

/// Parsed contents of a fallback configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyValueFile {
    entries: BTreeMap<String, String>,
}

impl KeyValueFile {
    /// Parse file contents. `origin` is only used in error messages.
    pub fn parse(content: &str, origin: &Path) -> Result<Self> {
        let mut entries = BTreeMap::new();

        for (index, raw) in content.lines().enumerate() {
            let line_no = index + 1;
            let line = raw.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }

            let line = line.strip_prefix("export ").map(str::trim_start).unwrap_or(line);
            let (key, value) = line
                .split_once('=')
                .ok_or_else(|| parse_error(origin, line_no, "expected KEY=VALUE"))?;

            let key = key.trim();
            if !is_valid_key(key) {
                return Err(parse_error(origin, line_no, format!("invalid key `{key}`")));
            }

            let value = parse_value(value.trim())
                .map_err(|message| parse_error(origin, line_no, message))?;
            entries.insert(key.to_string(), value);
        }

        Ok(Self { entries })
    }

    /// Load and parse a file. A missing file yields `Ok(None)`.
    pub fn load(path: &Path) -> Result<Option<Self>> {
        match fs::read_to_string(path) {
            Ok(content) => Self::parse(&content, path).map(Some),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(SecretError::io(path, err)),
        }
    }

    /// Value for `key`, if present.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(String::as_str)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when the file defined nothing.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

fn parse_error(origin: &Path, line: usize, message: impl Into<String>) -> SecretError {
    SecretError::Parse {
        path: PathBuf::from(origin),
        line,
        message: message.into(),
    }
}

fn is_valid_key(key: &str) -> bool {
    let mut chars = key.chars();
    match chars.next() {
        Some(first) if first.is_ascii_alphabetic() || first == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}

fn parse_value(value: &str) -> std::result::Result<String, String> {
    for quote in ['"', '\''] {
        if let Some(rest) = value.strip_prefix(quote) {
            let end = rest
                .find(quote)
                .ok_or_else(|| format!("unterminated {quote} quote"))?;
            let trailing = rest[end + 1..].trim();
            if !trailing.is_empty() && !trailing.starts_with('#') {
                return Err("unexpected text after closing quote".to_string());
            }
            return Ok(rest[..end].to_string());
        }
    }

    if value.contains('$') || value.contains('`') {
        return Err("shell expansion is not supported".to_string());
    }

    let unquoted = match value.find(" #") {
        Some(comment) => &value[..comment],
        None => value,
    };
    Ok(unquoted.trim_end().to_string())
}
