//! Exclusive, named locks shared by every process that can see the same lock
//! directory. A lock is a file created with `create_new`; it is removed when
//! the [`NamedLock`] is dropped, whatever the outcome of the guarded work.

use std::fs::{self, OpenOptions};
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

use tracing::{debug, warn};

use crate::error::{PartakeError, Result};

#[derive(Debug, Clone)]
pub struct LockSettings {
    pub dir: PathBuf,
    pub attempts: u32,
    pub delay: Duration,
}
impl Default for LockSettings {
    fn default() -> Self {
        Self {
            dir: std::env::temp_dir(),
            attempts: 1,
            delay: Duration::from_millis(500),
        }
    }
}

#[derive(Debug)]
pub struct NamedLock {
    name: String,
    path: PathBuf,
}

impl NamedLock {
    /// Lock files are named after the hash of the lock name, so any name is
    /// safe to use.
    pub fn path_for(dir: &Path, name: &str) -> PathBuf {
        let hash = blake3::hash(name.as_bytes()).to_hex();
        dir.join(format!("partake-{}.lock", &hash[..16]))
    }
    pub fn acquire(dir: &Path, name: &str) -> Result<Self> {
        let path = Self::path_for(dir, name);
        let failed = |reason: String| PartakeError::LockAcquisition {
            name: name.to_string(),
            reason,
        };
        fs::create_dir_all(dir).map_err(|e| failed(e.to_string()))?;
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| match e.kind() {
                ErrorKind::AlreadyExists => failed(format!("held by {}", path.display())),
                _ => failed(e.to_string()),
            })?;
        // the holder is informational only
        let _ = writeln!(file, "{} {}", std::process::id(), name);
        debug!(lock = name, path = %path.display(), "acquired");
        Ok(Self {
            name: name.to_string(),
            path,
        })
    }
    /// Retries [`NamedLock::acquire`] up to `settings.attempts` times,
    /// sleeping `settings.delay` in between.
    pub fn acquire_with_retry(settings: &LockSettings, name: &str) -> Result<Self> {
        let attempts = settings.attempts.max(1);
        let mut attempt = 1;
        loop {
            match Self::acquire(&settings.dir, name) {
                Ok(lock) => return Ok(lock),
                Err(e) if attempt >= attempts => return Err(e),
                Err(e) => {
                    warn!(lock = name, attempt, error = %e, "lock busy, retrying");
                    attempt += 1;
                    std::thread::sleep(settings.delay);
                }
            }
        }
    }
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for NamedLock {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_file(&self.path) {
            warn!(lock = %self.name, error = %e, "could not release");
        } else {
            debug!(lock = %self.name, "released");
        }
    }
}
