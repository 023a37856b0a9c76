//! Timestamped CSV series files.
//!
//! Every sampler appends rows through a [`SeriesWriter`], which stamps the
//! row with wall-clock time and flushes immediately so a crash loses at
//! most the in-flight sample.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use time::format_description::FormatItem;
use time::macros::format_description;
use time::OffsetDateTime;

use crate::error::{AppError, Result};

const TIMESTAMP_FORMAT: &[FormatItem<'_>] =
    format_description!("[year]-[month]-[day] [hour]:[minute]:[second]");

/// Wall-clock timestamp for series rows, local time when the offset is
/// obtainable, UTC otherwise.
pub fn timestamp_now() -> String {
    let now = OffsetDateTime::now_local().unwrap_or_else(|_| OffsetDateTime::now_utc());
    now.format(TIMESTAMP_FORMAT)
        .unwrap_or_else(|_| now.unix_timestamp().to_string())
}

/// Append-only CSV writer that prefixes every row with a timestamp.
#[derive(Debug)]
pub struct SeriesWriter {
    file: File,
    path: PathBuf,
}

impl SeriesWriter {
    /// Create (or truncate) the series file and write its header row.
    pub fn create(path: &Path, header: &[&str]) -> Result<Self> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent).map_err(|e| {
                    AppError::Telemetry(format!("cannot create {}: {}", parent.display(), e))
                })?;
            }
        }

        let mut file = File::create(path)
            .map_err(|e| AppError::Telemetry(format!("cannot create {}: {}", path.display(), e)))?;
        writeln!(file, "{}", header.join(","))
            .and_then(|_| file.flush())
            .map_err(|e| AppError::Telemetry(format!("cannot write {}: {}", path.display(), e)))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Append one row, stamped and flushed.
    pub fn append(&mut self, values: &[String]) -> Result<()> {
        writeln!(self.file, "{},{}", timestamp_now(), values.join(","))
            .and_then(|_| self.file.flush())
            .map_err(|e| {
                AppError::Telemetry(format!("cannot append to {}: {}", self.path.display(), e))
            })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}
