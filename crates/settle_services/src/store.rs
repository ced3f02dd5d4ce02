//! Run store
//!
//! Each finished run appends one JSON line holding integer, real and string
//! property maps plus the flattened timing tree. The line number is the run
//! id.

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::settings::Settings;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("run store '{}' is not accessible", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("cannot encode run record: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("run store line {line} is corrupt")]
    Corrupt {
        line: usize,
        #[source]
        source: serde_json::Error,
    },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TimingEntry {
    pub path: String,
    pub seconds: f64,
    pub count: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RunRecord {
    pub integers: BTreeMap<String, i64>,
    pub reals: BTreeMap<String, f64>,
    pub strings: BTreeMap<String, String>,
    pub timing: Vec<TimingEntry>,
}

impl RunRecord {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_integer(&mut self, key: impl Into<String>, value: i64) {
        self.integers.insert(key.into(), value);
    }

    pub fn set_real(&mut self, key: impl Into<String>, value: f64) {
        self.reals.insert(key.into(), value);
    }

    pub fn set_string(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.strings.insert(key.into(), value.into());
    }

    /// Vectors are stored as space separated strings.
    pub fn set_vector(&mut self, key: impl Into<String>, values: &[f64]) {
        let joined: Vec<String> = values.iter().map(|v| v.to_string()).collect();
        self.set_string(key, joined.join(" "));
    }

    /// Adds every configuration scalar, keyed by its `block_field` path.
    /// Booleans become 0/1 integers and arrays space separated strings.
    pub fn add_config(&mut self, settings: &Settings) -> Result<(), StoreError> {
        let value = serde_json::to_value(settings)?;
        self.flatten(String::new(), &value);
        Ok(())
    }

    fn flatten(&mut self, key: String, value: &Value) {
        match value {
            Value::Null => {}
            Value::Bool(b) => self.set_integer(key, i64::from(*b)),
            Value::Number(n) => match n.as_i64() {
                Some(i) => self.set_integer(key, i),
                None => self.set_real(key, n.as_f64().unwrap_or(f64::NAN)),
            },
            Value::String(s) => self.set_string(key, s.clone()),
            Value::Array(items) => {
                let joined: Vec<String> = items
                    .iter()
                    .map(|v| match v {
                        Value::String(s) => s.clone(),
                        other => other.to_string(),
                    })
                    .collect();
                self.set_string(key, joined.join(" "));
            }
            Value::Object(map) => {
                for (name, child) in map {
                    let child_key = if key.is_empty() {
                        name.clone()
                    } else {
                        format!("{key}_{name}")
                    };
                    self.flatten(child_key, child);
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredRun {
    pub run_id: u64,
    pub record: RunRecord,
}

/// Append-only JSON-lines file of run records.
pub struct RunStore {
    path: PathBuf,
}

impl RunStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn io_error(&self) -> impl FnOnce(std::io::Error) -> StoreError + '_ {
        move |source| StoreError::Io {
            path: self.path.clone(),
            source,
        }
    }

    /// Appends a record and returns its run id.
    pub fn append(&self, record: &RunRecord) -> Result<u64, StoreError> {
        let run_id = self.load_all()?.len() as u64 + 1;
        let line = serde_json::to_string(&StoredRun {
            run_id,
            record: record.clone(),
        })?;
        if let Some(parent) = self.path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(self.io_error())?;
        }
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(self.io_error())?;
        writeln!(file, "{line}").map_err(self.io_error())?;
        tracing::debug!(run_id, path = %self.path.display(), "stored run");
        Ok(run_id)
    }

    /// All stored runs; a missing file is an empty store.
    pub fn load_all(&self) -> Result<Vec<StoredRun>, StoreError> {
        let file = match std::fs::File::open(&self.path) {
            Ok(file) => file,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(self.io_error()(e)),
        };
        let mut runs = Vec::new();
        for (idx, line) in BufReader::new(file).lines().enumerate() {
            let line = line.map_err(self.io_error())?;
            if line.trim().is_empty() {
                continue;
            }
            let run = serde_json::from_str(&line).map_err(|source| StoreError::Corrupt { line: idx + 1, source })?;
            runs.push(run);
        }
        Ok(runs)
    }
}
