//! JSON dumps of intermediate results for offline inspection.

use anyhow::{Context, Result};
use serde::Serialize;
use std::fs::{self, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

pub const RESULTS: &str = "__.results.json";
pub const VALUES_INDEX: &str = "__.values_index.json";
pub const BUCKETS: &str = "__.buckets.json";
pub const DUPE_INDEX: &str = "__.dupe_index.json";
pub const BUCKETS_INDEX: &str = "__.buckets_index.json";

/// Writes pretty-printed JSON files into one directory, replacing any
/// previous dump of the same name.
#[derive(Debug, Clone)]
pub struct TraceWriter {
    dir: PathBuf,
}

impl TraceWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Result<Self> {
        let dir = dir.into();
        fs::create_dir_all(&dir)
            .with_context(|| format!("Failed to create trace directory {:?}", dir))?;
        Ok(Self { dir })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn dump<T: Serialize + ?Sized>(&self, name: &str, value: &T) -> Result<PathBuf> {
        let path = self.dir.join(name);
        let file =
            File::create(&path).with_context(|| format!("Failed to create trace {:?}", path))?;
        let mut out = BufWriter::new(file);
        serde_json::to_writer_pretty(&mut out, value)
            .with_context(|| format!("Failed to serialize trace {:?}", path))?;
        out.flush()
            .with_context(|| format!("Failed to write trace {:?}", path))?;
        log::debug!("Wrote trace {}", path.display());
        Ok(path)
    }
}
