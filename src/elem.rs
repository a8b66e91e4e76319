use std::sync::Arc;

// custom made equality and hashing for elems
use std::collections::BTreeSet;
use std::hash::{Hash, Hasher};

// used to print out readable forms of an elem
use std::fmt;

use chrono::{DateTime, Utc};

use crate::engine::Engine;
use crate::error::Result;
use crate::rule::{Rule, Template};
use crate::time::Instant;

// ------------- Elem -------------
/// One artifact of one rule for one period. Elems are values: everything is
/// computed when they are built and never changes afterwards.
#[derive(Debug, Clone)]
pub struct Elem {
    rule: Arc<Rule>,
    start: Instant,
    stop: Instant,
    globs: Vec<String>,
    identifier: String,
}

impl Elem {
    pub fn new(rule: Arc<Rule>, instant: Instant, globs: Vec<String>) -> Self {
        let start = rule.time_round(instant);
        let stop = rule.grain().shift(start, 1);
        let identifier = rule.matcher().bind(start, &globs);
        Self {
            rule,
            start,
            stop,
            globs,
            identifier,
        }
    }
    pub fn rule(&self) -> &Arc<Rule> {
        &self.rule
    }
    pub fn start(&self) -> Instant {
        self.start
    }
    /// Exclusive end of the period.
    pub fn stop(&self) -> Instant {
        self.stop
    }
    pub fn globs(&self) -> &[String] {
        &self.globs
    }
    pub fn identifier(&self) -> &str {
        &self.identifier
    }
    pub fn is_target(&self) -> bool {
        self.rule.is_target()
    }
    /// Whether the identifier still holds an unexpanded `*`.
    pub fn has_wildcard(&self) -> bool {
        self.identifier.contains('*')
    }
    pub fn next(&self, n: u32) -> Elem {
        self.shift(i64::from(n))
    }
    pub fn prev(&self, n: u32) -> Elem {
        self.shift(-i64::from(n))
    }
    fn shift(&self, n: i64) -> Elem {
        self.rule.elem_at(self.rule.grain().shift(self.start, n))
    }
    /// The elem of `rule` (usually a coarser copy of this elem's rule) that
    /// contains this one.
    pub fn round(&self, rule: &Arc<Rule>) -> Elem {
        rule.elem_at(self.start)
    }

    // ------------- Oracle backed state -------------
    pub fn exists(&self, engine: &Engine) -> Result<bool> {
        match self.rule.template() {
            Template::Path { .. } => Ok(engine.filesystem().exists(&self.identifier)),
            // a whole table is never missing, only stale or incomplete
            Template::Table {
                partition: None, ..
            } => Ok(!self.identifier.is_empty()),
            Template::Table {
                partition: Some(_), ..
            } => {
                let (table, partition) = self.table_parts();
                engine.tables().table_exists(table, partition)
            }
        }
    }
    /// `None` stands for "never": every real timestamp is newer.
    pub fn last_modified_at(&self, engine: &Engine) -> Result<Option<DateTime<Utc>>> {
        match self.rule.template() {
            Template::Path { .. } if self.has_wildcard() => {
                let mut newest = None;
                for elem in self.explode(engine)? {
                    if let Some(stat) = engine.filesystem().stat(elem.identifier()) {
                        newest = newest.max(Some(stat.modified_at));
                    }
                }
                Ok(newest)
            }
            Template::Path { .. } => Ok(engine
                .filesystem()
                .stat(&self.identifier)
                .map(|stat| stat.modified_at)),
            Template::Table { .. } => match &self.rule.options().modified_at {
                Some(column) => {
                    let (table, partition) = self.table_parts();
                    engine
                        .tables()
                        .table_last_modified_at(table, partition, column)
                }
                None => Ok(None),
            },
        }
    }
    /// The physical artifacts standing behind this elem.
    pub fn explode(&self, engine: &Engine) -> Result<Vec<Elem>> {
        match self.rule.template() {
            Template::Path { .. } => Ok(engine
                .filesystem()
                .glob(&self.identifier)?
                .iter()
                .filter_map(|path| self.rule.elem_for(path))
                .collect()),
            Template::Table {
                partition: Some(_), ..
            } => {
                if self.exists(engine)? {
                    Ok(vec![self.clone()])
                } else {
                    Ok(Vec::new())
                }
            }
            Template::Table {
                partition: None, ..
            } => Ok(Vec::new()),
        }
    }
    /// True when every period this target depends on has an existing source.
    /// Sources are trivially complete.
    pub fn complete(&self, engine: &Engine) -> Result<bool> {
        if !self.is_target() {
            return Ok(true);
        }
        let sources = self.sources(engine)?;
        let required: BTreeSet<Instant> = sources.iter().map(Elem::start).collect();
        let mut present = BTreeSet::new();
        for source in &sources {
            if source.exists(engine)? {
                present.insert(source.start);
            }
        }
        Ok(present == required)
    }
    /// The target elems this source feeds. A target is its own target.
    pub fn targets(&self, engine: &Engine) -> Result<Vec<Elem>> {
        if self.is_target() {
            return Ok(vec![self.clone()]);
        }
        engine.targets_for_source(self.rule.name(), self)
    }
    /// The source elems this target is built from. A source is its own source.
    pub fn sources(&self, engine: &Engine) -> Result<Vec<Elem>> {
        if !self.is_target() {
            return Ok(vec![self.clone()]);
        }
        engine.sources_for_target(self.rule.name(), self)
    }

    fn table_parts(&self) -> (&str, Option<&str>) {
        match self.rule.template() {
            Template::Table {
                partition: Some(_), ..
            } => match self.identifier.split_once('/') {
                Some((table, partition)) => (table, Some(partition)),
                None => (self.identifier.as_str(), None),
            },
            _ => (self.identifier.as_str(), None),
        }
    }
}

impl PartialEq for Elem {
    fn eq(&self, other: &Self) -> bool {
        self.rule.name() == other.rule.name()
            && self.rule.role() == other.rule.role()
            && self.identifier == other.identifier
    }
}
impl Eq for Elem {}
impl Hash for Elem {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.rule.name().hash(state);
        self.rule.role().hash(state);
        self.identifier.hash(state);
    }
}
impl fmt::Display for Elem {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.identifier)
    }
}
