//! Settings layered from an optional file and `PARTAKE__*` environment
//! variables, e.g. `PARTAKE__MAX_DEPTH=4` or `PARTAKE__ROOT=/data`.
//!
//! ```toml
//! root = "/data"
//! timezone = "+01:00"
//!
//! [[rules]]
//! name = "daily"
//! target = { path = "out/%Y/%m/%d.csv" }
//! source = { path = "in/%Y/%m/%d/%H.csv" }
//! window = 1
//! ```

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use chrono::FixedOffset;
use config::{Config, Environment, File};
use serde::Deserialize;
use tracing::debug;

use crate::catalog::SqliteTables;
use crate::engine::{Engine, MAX_DEPTH};
use crate::error::Result;
use crate::lock::LockSettings;
use crate::oracle::{FileSystem, LocalFileSystem, Tables};
use crate::rule::{RuleOptions, Template};
use crate::time::parse_timezone;

fn default_max_depth() -> usize {
    MAX_DEPTH
}
fn default_timezone() -> String {
    "UTC".into()
}
fn default_root() -> PathBuf {
    PathBuf::from(".")
}
fn default_lock_attempts() -> u32 {
    1
}
fn default_lock_delay_ms() -> u64 {
    500
}
fn default_listen() -> String {
    "127.0.0.1:3000".into()
}
fn default_primary() -> bool {
    true
}

/// A target and source template registered under one name.
#[derive(Debug, Clone, Deserialize)]
pub struct RuleDecl {
    pub name: String,
    pub target: Template,
    pub source: Template,
    #[serde(default)]
    pub window: u32,
    #[serde(default = "default_primary")]
    pub primary: bool,
    /// Falls back to the global timezone.
    #[serde(default)]
    pub timezone: Option<String>,
    #[serde(default)]
    pub modified_at: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Settings {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_timezone")]
    pub timezone: String,
    #[serde(default = "default_root")]
    pub root: PathBuf,
    /// SQLite database holding table metadata; in memory when absent.
    #[serde(default)]
    pub catalog: Option<String>,
    #[serde(default)]
    pub lock_dir: Option<PathBuf>,
    #[serde(default = "default_lock_attempts")]
    pub lock_attempts: u32,
    #[serde(default = "default_lock_delay_ms")]
    pub lock_delay_ms: u64,
    /// A `tracing` filter directive such as `partake=debug`.
    #[serde(default)]
    pub log: Option<String>,
    #[serde(default = "default_listen")]
    pub listen: String,
    #[serde(default)]
    pub rules: Vec<RuleDecl>,
}

impl Settings {
    /// Reads `path` when given (format picked by extension) and then the
    /// environment, which wins.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();
        if let Some(path) = path {
            debug!(path = %path.display(), "reading settings");
            builder = builder.add_source(File::from(path));
        }
        let settings = builder
            .add_source(
                Environment::with_prefix("PARTAKE")
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true),
            )
            .build()?
            .try_deserialize()?;
        Ok(settings)
    }
    pub fn timezone(&self) -> Result<FixedOffset> {
        parse_timezone(&self.timezone)
    }
    pub fn lock(&self) -> LockSettings {
        let defaults = LockSettings::default();
        LockSettings {
            dir: self.lock_dir.clone().unwrap_or(defaults.dir),
            attempts: self.lock_attempts,
            delay: Duration::from_millis(self.lock_delay_ms),
        }
    }
    pub fn tables(&self) -> Result<SqliteTables> {
        match &self.catalog {
            Some(path) => SqliteTables::open(path),
            None => SqliteTables::open_in_memory(),
        }
    }
    /// An engine over the local filesystem and the catalog with every
    /// declared rule registered. Commands are left to the caller.
    pub fn engine(&self) -> Result<Engine> {
        let filesystem: Arc<dyn FileSystem> = Arc::new(LocalFileSystem::new(self.root.clone()));
        let tables: Arc<dyn Tables> = Arc::new(self.tables()?);
        self.engine_with(filesystem, tables)
    }
    pub fn engine_with(
        &self,
        filesystem: Arc<dyn FileSystem>,
        tables: Arc<dyn Tables>,
    ) -> Result<Engine> {
        let mut engine = Engine::new(filesystem, tables).with_max_depth(self.max_depth);
        let global = self.timezone()?;
        for decl in &self.rules {
            let timezone = match &decl.timezone {
                Some(tz) => parse_timezone(tz)?,
                None => global,
            };
            let mut options = RuleOptions::default()
                .with_timezone(timezone)
                .with_window(decl.window)
                .with_primary(decl.primary);
            if let Some(column) = &decl.modified_at {
                options = options.with_modified_at(column);
            }
            engine.add_target_rule(&decl.name, decl.target.clone(), options.clone())?;
            engine.add_source_rule(&decl.name, decl.source.clone(), options)?;
        }
        Ok(engine)
    }
}
