// config.rs — Run configuration
//
// The precision mode and per-operator precision class overrides for one judge
// run. Built by the CLI from flags, or loaded from a JSON file.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::catalogue::KernelCatalogue;
use crate::precision::{PrecisionClass, PrecisionMode};

#[derive(Debug)]
pub enum ConfigError {
    IoError {
        path: PathBuf,
        source: std::io::Error,
    },
    ParseError {
        file: PathBuf,
        message: String,
    },
    /// A `--mix-list` entry that is not `OpType=class`.
    BadMixEntry { entry: String, reason: String },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::IoError { path, source } => write!(f, "{}: {}", path.display(), source),
            ConfigError::ParseError { file, message } => {
                write!(f, "{}: {}", file.display(), message)
            }
            ConfigError::BadMixEntry { entry, reason } => {
                write!(f, "bad mix-list entry '{}': {}", entry, reason)
            }
        }
    }
}

impl std::error::Error for ConfigError {}

/// Configuration of one judge run. Read-only while the run is in progress.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct JudgeConfig {
    pub precision_mode: PrecisionMode,
    /// Per operator type; wins over the catalogue's class.
    pub precision_overrides: BTreeMap<String, PrecisionClass>,
}

impl JudgeConfig {
    pub fn new(precision_mode: PrecisionMode) -> Self {
        JudgeConfig {
            precision_mode,
            precision_overrides: BTreeMap::new(),
        }
    }

    pub fn with_override(mut self, op_type: impl Into<String>, class: PrecisionClass) -> Self {
        self.precision_overrides.insert(op_type.into(), class);
        self
    }

    /// Effective precision class of `op_type`.
    pub fn precision_class(&self, op_type: &str, catalogue: &dyn KernelCatalogue) -> PrecisionClass {
        match self.precision_overrides.get(op_type) {
            Some(class) => *class,
            None => catalogue.precision_class(op_type),
        }
    }

    pub fn load_json(path: &Path) -> Result<Self, ConfigError> {
        let source = std::fs::read_to_string(path).map_err(|e| ConfigError::IoError {
            path: path.to_path_buf(),
            source: e,
        })?;
        Self::from_json_str(&source, path)
    }

    pub fn from_json_str(source: &str, origin: &Path) -> Result<Self, ConfigError> {
        serde_json::from_str(source).map_err(|e| ConfigError::ParseError {
            file: origin.to_path_buf(),
            message: e.to_string(),
        })
    }

    /// Apply comma-separated `OpType=class` overrides, e.g.
    /// `Conv2D=prefer_low,Softmax=prefer_high`.
    pub fn apply_mix_list(&mut self, list: &str) -> Result<(), ConfigError> {
        for entry in list.split(',').map(str::trim).filter(|e| !e.is_empty()) {
            let (op, class) = parse_mix_entry(entry)?;
            self.precision_overrides.insert(op, class);
        }
        Ok(())
    }
}

fn parse_mix_entry(entry: &str) -> Result<(String, PrecisionClass), ConfigError> {
    let bad = |reason: String| ConfigError::BadMixEntry {
        entry: entry.to_string(),
        reason,
    };
    let (op, class) = entry
        .split_once('=')
        .ok_or_else(|| bad("expected OpType=class".to_string()))?;
    let op = op.trim();
    if op.is_empty() {
        return Err(bad("empty operator type".to_string()));
    }
    let class = class.trim().parse::<PrecisionClass>().map_err(|e| bad(e.to_string()))?;
    Ok((op.to_string(), class))
}
