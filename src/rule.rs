// used to hand out shared references to rules kept by the engine
use std::sync::Arc;

// custom equality and hashing for rules
use std::hash::{Hash, Hasher};

// used to print out readable forms of a rule
use std::fmt;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::elem::Elem;
use crate::error::{PartakeError, Result};
use crate::matcher::{truncate_to_grain, Matcher};
use crate::time::{utc, Grain, Instant};

// ------------- Role -------------
/// Which side of a production step a rule describes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Target,
    Source,
}
impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Role::Target => write!(f, "target"),
            Role::Source => write!(f, "source"),
        }
    }
}

// ------------- Template -------------
/// Where the artifacts of a rule live: a path template, or a table with an
/// optional Hive style partition template such as `y=%Y/m=%m/d=%d`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Template {
    Path {
        path: String,
    },
    Table {
        table: String,
        #[serde(default)]
        partition: Option<String>,
    },
}

impl Template {
    pub fn path(path: &str) -> Self {
        Template::Path {
            path: path.to_string(),
        }
    }
    pub fn table(table: &str) -> Self {
        Template::Table {
            table: table.to_string(),
            partition: None,
        }
    }
    pub fn partitioned(table: &str, partition: &str) -> Self {
        Template::Table {
            table: table.to_string(),
            partition: Some(partition.to_string()),
        }
    }
    /// The template concrete identifiers are rendered from: the path, the
    /// table name, or `table/partition`.
    pub fn identifier_template(&self) -> String {
        match self {
            Template::Path { path } => path.clone(),
            Template::Table {
                table,
                partition: None,
            } => table.clone(),
            Template::Table {
                table,
                partition: Some(partition),
            } => format!("{table}/{partition}"),
        }
    }
    fn truncate(&self, grain: Grain) -> Option<Template> {
        let truncated = truncate_to_grain(&self.identifier_template(), grain)?;
        Some(match self {
            Template::Path { .. } => Template::Path { path: truncated },
            Template::Table { table, .. } => {
                let partition = truncated
                    .strip_prefix(table.as_str())
                    .and_then(|rest| rest.strip_prefix('/'))
                    .map(str::to_string);
                Template::Table {
                    table: table.clone(),
                    partition,
                }
            }
        })
    }
}
impl fmt::Display for Template {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.identifier_template())
    }
}

// ------------- RuleOptions -------------
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuleOptions {
    pub timezone: FixedOffset,
    /// Neighbouring periods on either side considered when checking staleness.
    pub window: u32,
    /// Only primary target rules take part in identifier lookups.
    pub primary: bool,
    /// Column holding modification times for table rules.
    pub modified_at: Option<String>,
}
impl Default for RuleOptions {
    fn default() -> Self {
        Self {
            timezone: utc(),
            window: 0,
            primary: true,
            modified_at: None,
        }
    }
}
impl RuleOptions {
    pub fn with_timezone(mut self, timezone: FixedOffset) -> Self {
        self.timezone = timezone;
        self
    }
    pub fn with_window(mut self, window: u32) -> Self {
        self.window = window;
        self
    }
    pub fn with_primary(mut self, primary: bool) -> Self {
        self.primary = primary;
        self
    }
    pub fn with_modified_at(mut self, column: &str) -> Self {
        self.modified_at = Some(column.to_string());
        self
    }
}

// ------------- Rule -------------
#[derive(Debug)]
pub struct Rule {
    name: String,
    role: Role,
    template: Template,
    options: RuleOptions,
    grain: Grain,
    matcher: Matcher,
}

impl Rule {
    pub fn new(name: &str, role: Role, template: Template, options: RuleOptions) -> Result<Self> {
        let matcher = Matcher::new(&template.identifier_template(), options.timezone)?;
        // rules without any temporal token are produced hourly
        let grain = matcher.grain().unwrap_or(Grain::Hour);
        Ok(Self {
            name: name.to_string(),
            role,
            template,
            options,
            grain,
            matcher,
        })
    }
    // Everything is fixed at construction, so only getters are exposed.
    pub fn name(&self) -> &str {
        &self.name
    }
    pub fn role(&self) -> Role {
        self.role
    }
    pub fn is_target(&self) -> bool {
        self.role == Role::Target
    }
    pub fn template(&self) -> &Template {
        &self.template
    }
    pub fn options(&self) -> &RuleOptions {
        &self.options
    }
    pub fn grain(&self) -> Grain {
        self.grain
    }
    pub fn matcher(&self) -> &Matcher {
        &self.matcher
    }
    pub fn window(&self) -> u32 {
        self.options.window
    }
    pub fn matches(&self, identifier: &str) -> bool {
        self.matcher.matches(identifier)
    }
    pub fn time_round(&self, instant: Instant) -> Instant {
        self.grain
            .truncate(instant.with_timezone(&self.options.timezone))
    }
    pub fn elem_at(self: &Arc<Self>, instant: Instant) -> Elem {
        Elem::new(Arc::clone(self), instant, Vec::new())
    }
    /// Binds a concrete identifier back to an elem of this rule.
    pub fn elem_for(self: &Arc<Self>, identifier: &str) -> Option<Elem> {
        self.matcher
            .unbind(identifier)
            .map(|binding| Elem::new(Arc::clone(self), binding.instant, binding.globs))
    }
    pub fn require_elem(self: &Arc<Self>, identifier: &str) -> Result<Elem> {
        let binding = self.matcher.require(identifier)?;
        Ok(Elem::new(Arc::clone(self), binding.instant, binding.globs))
    }
    /// Every elem from the period containing `start` up to and including the
    /// period starting at or before `stop`.
    pub fn generate(self: &Arc<Self>, start: Instant, stop: Instant) -> Generate {
        Generate {
            rule: Arc::clone(self),
            next: self.time_round(start),
            stop,
            exhausted: false,
        }
    }
    /// Projects `elem` into the grain of `other`: the single containing period
    /// when `other` is at least as coarse, otherwise every period of `other`
    /// lying wholly inside `[elem.start, elem.stop)`.
    pub fn generate_via_unify(&self, elem: &Elem, other: &Arc<Rule>) -> Vec<Elem> {
        if other.grain >= self.grain {
            vec![other.elem_at(elem.start())]
        } else {
            // offsets that differ by a fraction of other's grain leave a
            // straddling period at either end
            other
                .generate(elem.start(), elem.stop())
                .skip_while(|e| e.start() < elem.start())
                .take_while(|e| e.stop() <= elem.stop())
                .collect()
        }
    }
    pub fn adjacent_matches(self: &Arc<Self>, elem: &Elem) -> Vec<Elem> {
        self.adjacent_within(elem, self.options.window)
    }
    pub fn adjacent_within(self: &Arc<Self>, elem: &Elem, window: u32) -> Vec<Elem> {
        let window = i64::from(window);
        (-window..=window)
            .map(|n| self.elem_at(self.grain.shift(elem.start(), n)))
            .collect()
    }
    /// A new rule at a coarser grain whose template stops at the segment
    /// naming that grain.
    pub fn round(&self, grain: Grain) -> Result<Rule> {
        let template = self
            .template
            .truncate(grain)
            .ok_or_else(|| PartakeError::NoGrainSegment {
                template: self.template.identifier_template(),
                grain,
            })?;
        Rule::new(&self.name, self.role, template, self.options.clone())
    }
}
impl PartialEq for Rule {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name && self.role == other.role && self.template == other.template
    }
}
impl Eq for Rule {}
impl Hash for Rule {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.name.hash(state);
        self.role.hash(state);
        self.template.hash(state);
    }
}
impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{} {} [{}] ({})", self.role, self.name, self.template, self.grain)
    }
}

// ------------- Generate -------------
/// Lazy, restartable walk over the periods of a rule.
#[derive(Debug, Clone)]
pub struct Generate {
    rule: Arc<Rule>,
    next: Instant,
    stop: Instant,
    exhausted: bool,
}
impl Iterator for Generate {
    type Item = Elem;
    fn next(&mut self) -> Option<Elem> {
        if self.exhausted || self.next > self.stop {
            return None;
        }
        let elem = self.rule.elem_at(self.next);
        let following = self.rule.grain.shift(self.next, 1);
        // shifting saturates at the end of the calendar
        if following <= self.next {
            self.exhausted = true;
        }
        self.next = following;
        Some(elem)
    }
}
