//! # CSV File Store
//!
//! Persists records as a comma-separated file with one header row:
//!
//! ```text
//! ts,lat,lon,alt,drop_id,speed_mps,sats,fix_ok
//! 1718035200.5,19.4326,-99.1332,2240,3,5.2,8,1
//! ```
//!
//! `replace` writes a sibling temp file and renames it over the original, so a
//! crash mid-write leaves the previous dataset intact.

use std::fs::{self, File, OpenOptions};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use dronelink_core::schema::{self, HEADER};
use dronelink_core::Record;
use tracing::{debug, info, warn};

use crate::error::{StoreError, StoreResult};
use crate::{DataStore, LoadReport};

/// File-backed [`DataStore`].
#[derive(Debug)]
pub struct CsvStore {
    path: PathBuf,
    records: Vec<Record>,
}

impl CsvStore {
    /// Creates a store for `path`. Nothing is read until [`DataStore::load`].
    pub fn new(path: impl Into<PathBuf>) -> Self {
        CsvStore {
            path: path.into(),
            records: Vec::new(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_err(&self, source: std::io::Error) -> StoreError {
        StoreError::Read {
            path: self.path.clone(),
            source,
        }
    }

    fn write_err(&self, path: &Path, source: std::io::Error) -> StoreError {
        StoreError::Write {
            path: path.to_path_buf(),
            source,
        }
    }

    fn ensure_parent(&self) -> StoreResult<()> {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => {
                fs::create_dir_all(parent).map_err(|e| self.write_err(parent, e))
            }
            _ => Ok(()),
        }
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    fn write_rows<W: Write>(out: &mut W, records: &[Record]) -> std::io::Result<()> {
        for record in records {
            writeln!(out, "{}", schema::format_line(record))?;
        }
        Ok(())
    }
}

impl DataStore for CsvStore {
    fn load(&mut self) -> StoreResult<LoadReport> {
        let contents = match fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!(path = ?self.path, "No data file yet, starting empty");
                self.records.clear();
                return Ok(LoadReport::default());
            }
            Err(e) => return Err(self.read_err(e)),
        };

        let mut records = Vec::new();
        let mut skipped = 0usize;

        for line in contents.lines() {
            if line.trim().is_empty() || schema::is_header(line) {
                continue;
            }
            match schema::parse_line(line) {
                Ok(record) => records.push(record),
                Err(e) => {
                    debug!(error = %e, "Skipping stored row");
                    skipped += 1;
                }
            }
        }

        if skipped > 0 {
            warn!(path = ?self.path, skipped, "Some stored rows could not be parsed");
        }

        self.records = records;
        info!(path = ?self.path, loaded = self.records.len(), "Loaded stored records");

        Ok(LoadReport {
            loaded: self.records.len(),
            skipped,
        })
    }

    fn replace(&mut self, records: &[Record]) -> StoreResult<()> {
        self.ensure_parent()?;

        let tmp = self.temp_path();
        {
            let file = File::create(&tmp).map_err(|e| self.write_err(&tmp, e))?;
            let mut out = BufWriter::new(file);
            writeln!(out, "{}", HEADER)
                .and_then(|_| Self::write_rows(&mut out, records))
                .and_then(|_| out.flush())
                .map_err(|e| self.write_err(&tmp, e))?;
        }
        fs::rename(&tmp, &self.path).map_err(|e| self.write_err(&self.path, e))?;

        self.records = records.to_vec();
        info!(path = ?self.path, count = records.len(), "Replaced stored records");
        Ok(())
    }

    fn append(&mut self, records: &[Record]) -> StoreResult<()> {
        if records.is_empty() {
            return Ok(());
        }
        self.ensure_parent()?;

        let needs_header = fs::metadata(&self.path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);

        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .map_err(|e| self.write_err(&self.path, e))?;
        let mut out = BufWriter::new(file);

        let written = if needs_header {
            writeln!(out, "{}", HEADER)
        } else {
            Ok(())
        };
        written
            .and_then(|_| Self::write_rows(&mut out, records))
            .and_then(|_| out.flush())
            .map_err(|e| self.write_err(&self.path, e))?;

        self.records.extend_from_slice(records);
        info!(path = ?self.path, appended = records.len(), total = self.records.len(), "Appended records");
        Ok(())
    }

    fn records(&self) -> &[Record] {
        &self.records
    }
}
