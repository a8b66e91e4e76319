//! Capabilities the engine consumes from the outside world: whether artifacts
//! exist, what a wildcard expands to and when something was last modified.
//!
//! Both oracles are shared between engines, so they are `Send + Sync` and keep
//! their caches behind a `Mutex`. [`FileSystem::clear`] and [`Tables::clear`]
//! drop those caches; the engine calls them after every resolve step.

use std::collections::{BTreeMap, HashMap};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

use chrono::{DateTime, Utc};
use glob::Pattern;
use tracing::debug;

use crate::error::Result;
use crate::IdentifierHasher;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    pub modified_at: DateTime<Utc>,
}

pub trait FileSystem: Send + Sync {
    /// For a pattern holding wildcards: whether anything matches it.
    fn exists(&self, path: &str) -> bool;
    /// Expands a pattern. A wildcard match that is a directory stands for
    /// every file below it. A pattern without wildcards yields itself iff it
    /// exists.
    fn glob(&self, pattern: &str) -> Result<Vec<String>>;
    fn stat(&self, path: &str) -> Option<Stat>;
    fn clear(&self);
}

pub trait Tables: Send + Sync {
    /// Whether the table exists and, given a `k=v/k2=v2` partition, whether
    /// that partition holds any row.
    fn table_exists(&self, table: &str, partition: Option<&str>) -> Result<bool>;
    /// The largest value of `column`, read as a timestamp.
    fn table_last_modified_at(
        &self,
        table: &str,
        partition: Option<&str>,
        column: &str,
    ) -> Result<Option<DateTime<Utc>>>;
    fn clear(&self);
}

pub fn has_wildcard(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}

// ------------- LocalFileSystem -------------
/// Paths relative to a root directory on local disk.
#[derive(Debug)]
pub struct LocalFileSystem {
    root: PathBuf,
    listings: Mutex<HashMap<String, Vec<String>, IdentifierHasher>>,
    stats: Mutex<HashMap<String, Option<Stat>, IdentifierHasher>>,
}

impl LocalFileSystem {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            listings: Mutex::new(HashMap::default()),
            stats: Mutex::new(HashMap::default()),
        }
    }
    pub fn root(&self) -> &Path {
        &self.root
    }
    fn absolute(&self, path: &str) -> PathBuf {
        self.root.join(path)
    }
    fn relative(&self, path: &Path) -> String {
        path.strip_prefix(&self.root)
            .unwrap_or(path)
            .to_string_lossy()
            .into_owned()
    }
    fn list(&self, pattern: &str) -> Result<Vec<String>> {
        if !has_wildcard(pattern) {
            return Ok(if self.absolute(pattern).exists() {
                vec![pattern.to_string()]
            } else {
                Vec::new()
            });
        }
        let absolute = self.absolute(pattern);
        let mut found = Vec::new();
        for entry in glob::glob(&absolute.to_string_lossy())?.flatten() {
            if entry.is_dir() {
                let nested = entry.join("**").join("*");
                for file in glob::glob(&nested.to_string_lossy())?.flatten() {
                    if file.is_file() {
                        found.push(self.relative(&file));
                    }
                }
            } else {
                found.push(self.relative(&entry));
            }
        }
        found.sort();
        found.dedup();
        Ok(found)
    }
}

impl FileSystem for LocalFileSystem {
    fn exists(&self, path: &str) -> bool {
        if has_wildcard(path) {
            return self.glob(path).map(|found| !found.is_empty()).unwrap_or(false);
        }
        self.stat(path).is_some()
    }
    fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        if let Some(found) = self
            .listings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .get(pattern)
        {
            return Ok(found.clone());
        }
        debug!(pattern, "listing");
        let found = self.list(pattern)?;
        self.listings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(pattern.to_string(), found.clone());
        Ok(found)
    }
    fn stat(&self, path: &str) -> Option<Stat> {
        let mut stats = self.stats.lock().unwrap_or_else(PoisonError::into_inner);
        *stats.entry(path.to_string()).or_insert_with(|| {
            let modified = std::fs::metadata(self.absolute(path))
                .and_then(|metadata| metadata.modified())
                .ok()?;
            Some(Stat {
                modified_at: DateTime::<Utc>::from(modified),
            })
        })
    }
    fn clear(&self) {
        self.listings
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
        self.stats
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clear();
    }
}

// ------------- MemoryFileSystem -------------
/// Files kept as a map from path to modification time. Directories exist
/// implicitly for every prefix of a file path.
#[derive(Debug, Default)]
pub struct MemoryFileSystem {
    files: Mutex<BTreeMap<String, DateTime<Utc>>>,
}

impl MemoryFileSystem {
    pub fn new() -> Self {
        Self::default()
    }
    pub fn touch(&self, path: &str, modified_at: DateTime<Utc>) {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(path.to_string(), modified_at);
    }
    pub fn remove(&self, path: &str) -> bool {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(path)
            .is_some()
    }
    pub fn len(&self) -> usize {
        self.files
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
    fn below<'a>(
        files: &'a BTreeMap<String, DateTime<Utc>>,
        directory: &'a str,
    ) -> impl Iterator<Item = (&'a String, &'a DateTime<Utc>)> + 'a {
        let prefix = format!("{}/", directory.trim_end_matches('/'));
        files
            .range(prefix.clone()..)
            .take_while(move |(path, _)| path.starts_with(&prefix))
    }
}

impl FileSystem for MemoryFileSystem {
    fn exists(&self, path: &str) -> bool {
        if has_wildcard(path) {
            return self.glob(path).map(|found| !found.is_empty()).unwrap_or(false);
        }
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        files.contains_key(path) || Self::below(&files, path).next().is_some()
    }
    fn glob(&self, pattern: &str) -> Result<Vec<String>> {
        if !has_wildcard(pattern) {
            return Ok(if self.exists(pattern) {
                vec![pattern.to_string()]
            } else {
                Vec::new()
            });
        }
        // `*` crosses `/` here, which covers files below matching directories
        let compiled = Pattern::new(pattern)?;
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        Ok(files
            .keys()
            .filter(|path| compiled.matches(path))
            .cloned()
            .collect())
    }
    fn stat(&self, path: &str) -> Option<Stat> {
        let files = self.files.lock().unwrap_or_else(PoisonError::into_inner);
        let modified_at = match files.get(path) {
            Some(modified_at) => *modified_at,
            None => *Self::below(&files, path).map(|(_, at)| at).max()?,
        };
        Some(Stat { modified_at })
    }
    fn clear(&self) {}
}
