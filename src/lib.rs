//! Partake – dependency resolution for time-partitioned data artifacts.
//!
//! Artifacts (files on disk or partitions of catalog tables) are named by
//! templates carrying date fields, for example `logs/%Y/%m/%d/%H.log`. A *rule*
//! pairs a target template with the source template it is produced from under
//! one name. Partake answers: for a rule and a time range, which targets are
//! missing, incomplete or stale, and in which order must upstream rules run
//! so those targets can be rebuilt?
//!
//! * A [`matcher::Matcher`] compiles a template into a regular expression and
//!   converts between instants and identifiers in both directions.
//! * A [`rule::Rule`] is a named template with a role (target or source), a
//!   time [`time::Grain`] and options such as timezone and staleness window.
//! * An [`elem::Elem`] is one period of one rule: an identifier with the half
//!   open interval `[start, stop)` it covers.
//! * An [`set::ElemSet`] deduplicates elems of one rule and offers the views
//!   the engine decides with: missing, stale, incomplete, actionable and
//!   updateable.
//! * The [`engine::Engine`] keeps rules and build commands, walks upstream
//!   depth first and runs commands in dependency order.
//!
//! The outside world is reached through two oracles in [`oracle`]: a
//! [`oracle::FileSystem`] (local disk or in memory) and [`oracle::Tables`]
//! (backed by SQLite in [`catalog`]).
//!
//! ## Quick Start
//! ```
//! use std::sync::Arc;
//! use chrono::{TimeZone, Utc};
//! use partake::{catalog::SqliteTables, engine::{Engine, ResolveOptions}};
//! use partake::oracle::MemoryFileSystem;
//! use partake::rule::{RuleOptions, Template};
//!
//! let fs = Arc::new(MemoryFileSystem::new());
//! fs.touch("in/2024/01/01/00.csv", Utc.with_ymd_and_hms(2024, 1, 1, 1, 0, 0).unwrap());
//! let tables = Arc::new(SqliteTables::open_in_memory().unwrap());
//! let mut engine = Engine::new(fs, tables);
//! engine.add_target_rule("daily", Template::path("out/%Y/%m/%d.csv"), RuleOptions::default()).unwrap();
//! engine.add_source_rule("daily", Template::path("in/%Y/%m/%d/%H.csv"), RuleOptions::default()).unwrap();
//! let day = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap().fixed_offset();
//! let plan = engine.resolve("daily", day, day, &ResolveOptions::default()).unwrap();
//! assert_eq!(plan.steps[0].actionable, vec!["out/2024/01/01.csv"]);
//! ```

use std::hash::BuildHasherDefault;

use seahash::SeaHasher;

pub mod catalog;
pub mod config;
pub mod elem;
pub mod engine;
pub mod error;
pub mod interface;
pub mod lock;
pub mod matcher;
pub mod oracle;
pub mod rule;
pub mod server;
pub mod set;
pub mod time;

/// Hashing for maps and sets keyed by identifiers.
pub type IdentifierHasher = BuildHasherDefault<SeaHasher>;

pub use elem::Elem;
pub use engine::{Engine, Plan, ResolveOptions, Step};
pub use error::{PartakeError, Result};
pub use rule::{Role, Rule, RuleOptions, Template};
pub use set::ElemSet;
pub use time::{Grain, Instant};
