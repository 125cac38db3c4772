//! Audit line sinks.
//!
//! `RotatingFileSink` appends timestamped lines to `<log_dir>/<file_name>` and
//! rotates by size: `np.log` -> `np.log.1` -> ... -> `np.log.<max_backups>`.
//! Backups older than `max_age_days` are pruned whenever a rotation happens.

use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use std::time::{Duration, SystemTime};

use pktin_core::error::Result;

use crate::config::AuditSection;

const TIMESTAMP_FORMAT: &str = "%Y/%m/%d %H:%M:%S%.6f";
const SECS_PER_DAY: u64 = 24 * 60 * 60;

/// Destination for formatted audit lines.
pub trait AuditSink: Send + Sync {
    /// Write one line; the sink adds the timestamp prefix and newline.
    fn write_line(&self, line: &str) -> Result<()>;

    fn close(&self) -> Result<()> {
        Ok(())
    }
}

struct SinkState {
    file: Option<File>,
    size: u64,
}

pub struct RotatingFileSink {
    path: PathBuf,
    max_size: u64,
    max_backups: usize,
    max_age: Option<Duration>,
    state: Mutex<SinkState>,
}

impl RotatingFileSink {
    pub fn open(cfg: &AuditSection) -> Result<Self> {
        let dir = PathBuf::from(&cfg.log_dir);
        fs::create_dir_all(&dir)?;
        let path = dir.join(&cfg.file_name);
        let file = open_append(&path)?;
        let size = file.metadata()?.len();

        tracing::info!(path = %path.display(), max_size_mb = cfg.max_size_mb, "audit log opened");
        Ok(Self {
            path,
            max_size: cfg.max_size_mb.saturating_mul(1024 * 1024),
            max_backups: cfg.max_backups,
            max_age: (cfg.max_age_days > 0)
                .then(|| Duration::from_secs(cfg.max_age_days.saturating_mul(SECS_PER_DAY))),
            state: Mutex::new(SinkState {
                file: Some(file),
                size,
            }),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn backup_path(&self, n: usize) -> PathBuf {
        let mut name = self.path.as_os_str().to_os_string();
        name.push(format!(".{n}"));
        PathBuf::from(name)
    }

    fn rotate(&self, state: &mut SinkState) -> Result<()> {
        state.file = None;

        if self.max_backups == 0 {
            remove_if_exists(&self.path)?;
        } else {
            remove_if_exists(&self.backup_path(self.max_backups))?;
            for n in (1..self.max_backups).rev() {
                let from = self.backup_path(n);
                if from.exists() {
                    fs::rename(&from, self.backup_path(n + 1))?;
                }
            }
            if self.path.exists() {
                fs::rename(&self.path, self.backup_path(1))?;
            }
        }
        self.prune_expired();

        state.file = Some(open_append(&self.path)?);
        state.size = 0;
        tracing::debug!(path = %self.path.display(), "audit log rotated");
        Ok(())
    }

    fn prune_expired(&self) {
        let Some(max_age) = self.max_age else { return };
        let now = SystemTime::now();
        for n in 1..=self.max_backups {
            let backup = self.backup_path(n);
            let Ok(modified) = fs::metadata(&backup).and_then(|m| m.modified()) else {
                continue;
            };
            let expired = now
                .duration_since(modified)
                .map(|age| age > max_age)
                .unwrap_or(false);
            if expired {
                if let Err(e) = fs::remove_file(&backup) {
                    tracing::warn!(path = %backup.display(), error = %e, "failed to prune audit backup");
                }
            }
        }
    }
}

impl AuditSink for RotatingFileSink {
    fn write_line(&self, line: &str) -> Result<()> {
        let entry = format!("{} {line}\n", chrono::Local::now().format(TIMESTAMP_FORMAT));
        let len = entry.len() as u64;

        let mut guard = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        let state = &mut *guard;
        if state.size > 0 && state.size + len > self.max_size {
            self.rotate(state)?;
        } else if state.file.is_none() {
            state.file = Some(open_append(&self.path)?);
        }
        if let Some(file) = state.file.as_mut() {
            file.write_all(entry.as_bytes())?;
            state.size += len;
        }
        Ok(())
    }

    fn close(&self) -> Result<()> {
        let mut state = self.state.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(mut file) = state.file.take() {
            file.flush()?;
        }
        Ok(())
    }
}

fn open_append(path: &Path) -> Result<File> {
    Ok(OpenOptions::new().create(true).append(true).open(path)?)
}

fn remove_if_exists(path: &Path) -> Result<()> {
    match fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e.into()),
    }
}
