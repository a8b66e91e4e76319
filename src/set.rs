//! Derived views over a deduplicated collection of elems of one rule.
//!
//! Every view builds a new [`ElemSet`]; nothing is changed in place. Views that
//! only make sense for targets (stale, incomplete, actionable, updateable)
//! answer with an empty set when the rule is a source.

use std::collections::HashSet;
use std::sync::Arc;

// used to print out readable forms of a set
use std::fmt;

use crate::elem::Elem;
use crate::engine::Engine;
use crate::error::Result;
use crate::rule::{Role, Rule};
use crate::time::Grain;
use crate::IdentifierHasher;

// ------------- ElemSet -------------
#[derive(Debug, Clone)]
pub struct ElemSet {
    rule: Arc<Rule>,
    elems: Vec<Elem>,
    kept: HashSet<String, IdentifierHasher>,
}

impl ElemSet {
    pub fn new(rule: Arc<Rule>) -> Self {
        Self {
            rule,
            elems: Vec::new(),
            kept: HashSet::default(),
        }
    }
    pub fn from_elems<I: IntoIterator<Item = Elem>>(rule: Arc<Rule>, elems: I) -> Self {
        let mut set = Self::new(rule);
        set.extend(elems);
        set
    }
    /// Keeps the elem unless an equal one is already kept. Returns whether it
    /// was added.
    pub fn insert(&mut self, elem: Elem) -> bool {
        if self.kept.insert(elem.identifier().to_string()) {
            self.elems.push(elem);
            true
        } else {
            false
        }
    }
    pub fn extend<I: IntoIterator<Item = Elem>>(&mut self, elems: I) {
        for elem in elems {
            self.insert(elem);
        }
    }
    pub fn rule(&self) -> &Arc<Rule> {
        &self.rule
    }
    pub fn len(&self) -> usize {
        self.elems.len()
    }
    pub fn is_empty(&self) -> bool {
        self.elems.is_empty()
    }
    pub fn contains(&self, elem: &Elem) -> bool {
        self.kept.contains(elem.identifier())
    }
    pub fn iter(&self) -> std::slice::Iter<'_, Elem> {
        self.elems.iter()
    }
    pub fn identifiers(&self) -> Vec<String> {
        self.elems.iter().map(|e| e.identifier().to_string()).collect()
    }
    /// The elems ordered by start instant, then identifier. Elems stay
    /// unordered themselves: equality ignores the instant.
    pub fn sorted(&self) -> Vec<Elem> {
        let mut elems = self.elems.clone();
        elems.sort_by(|a, b| {
            (a.start(), a.identifier()).cmp(&(b.start(), b.identifier()))
        });
        elems
    }
    fn empty(&self) -> Self {
        Self::new(Arc::clone(&self.rule))
    }
    fn retain<F>(&self, mut keep: F) -> Result<Self>
    where
        F: FnMut(&Elem) -> Result<bool>,
    {
        let mut kept = self.empty();
        for elem in &self.elems {
            if keep(elem)? {
                kept.insert(elem.clone());
            }
        }
        Ok(kept)
    }

    // ------------- Views -------------
    /// Elems with nothing physically behind them.
    pub fn missing(&self, engine: &Engine) -> Result<Self> {
        self.retain(|elem| Ok(elem.explode(engine)?.is_empty() && !elem.exists(engine)?))
    }
    /// The physical artifacts behind every elem.
    pub fn existing(&self, engine: &Engine) -> Result<Self> {
        let mut existing = self.empty();
        for elem in &self.elems {
            existing.extend(elem.explode(engine)?);
        }
        Ok(existing)
    }
    /// Targets with an existing source, within the source rule's window (or
    /// `window` when given), modified after the target itself. Missing
    /// timestamps on either side never make a target stale.
    pub fn stale(&self, engine: &Engine, window: Option<u32>) -> Result<Self> {
        if !self.rule.is_target() {
            return Ok(self.empty());
        }
        let source_rule = engine.require_rule(self.rule.name(), Role::Source)?;
        let window = window.unwrap_or(source_rule.window());
        self.retain(|target| {
            let Some(built_at) = target.last_modified_at(engine)? else {
                return Ok(false);
            };
            for source in target.sources(engine)? {
                for neighbour in source_rule.adjacent_within(&source, window) {
                    for physical in neighbour.explode(engine)? {
                        if let Some(changed_at) = physical.last_modified_at(engine)? {
                            if changed_at > built_at {
                                return Ok(true);
                            }
                        }
                    }
                }
            }
            Ok(false)
        })
    }
    /// Targets with gaps in the source periods they depend on.
    pub fn incomplete(&self, engine: &Engine) -> Result<Self> {
        if !self.rule.is_target() {
            return Ok(self.empty());
        }
        self.retain(|target| Ok(!target.complete(engine)?))
    }
    /// Missing, then incomplete, then stale targets; each elem once.
    pub fn actionable(&self, engine: &Engine, window: Option<u32>) -> Result<Self> {
        if !self.rule.is_target() {
            return Ok(self.empty());
        }
        let mut actionable = self.missing(engine)?;
        let remaining = self.retain(|elem| Ok(!actionable.contains(elem)))?;
        actionable.extend(remaining.incomplete(engine)?.elems);
        let remaining = remaining.retain(|elem| Ok(!actionable.contains(elem)))?;
        actionable.extend(remaining.stale(engine, window)?.elems);
        Ok(actionable)
    }
    /// Actionable targets that can be built right now: at least one of their
    /// sources exists.
    pub fn updateable(&self, engine: &Engine, window: Option<u32>) -> Result<Self> {
        if !self.rule.is_target() {
            return Ok(self.empty());
        }
        self.actionable(engine, window)?.retain(|target| {
            for source in target.sources(engine)? {
                if source.exists(engine)? {
                    return Ok(true);
                }
            }
            Ok(false)
        })
    }
    /// Rolls every elem up to a coarser grain.
    pub fn with_grain(&self, grain: Grain) -> Result<Self> {
        let rounded = Arc::new(self.rule.round(grain)?);
        let elems: Vec<Elem> = self.elems.iter().map(|e| e.round(&rounded)).collect();
        Ok(Self::from_elems(rounded, elems))
    }
    /// Every elem together with its neighbours inside the rule's window.
    pub fn adjacent(&self) -> Self {
        let mut adjacent = self.empty();
        for elem in &self.elems {
            adjacent.extend(self.rule.adjacent_matches(elem));
        }
        adjacent
    }
    /// The targets fed by this set, typed by the target rule of the same name.
    pub fn targets(&self, engine: &Engine) -> Result<Self> {
        if self.rule.is_target() {
            return Ok(self.clone());
        }
        let mut targets = Self::new(engine.require_rule(self.rule.name(), Role::Target)?);
        for elem in &self.elems {
            targets.extend(elem.targets(engine)?);
        }
        Ok(targets)
    }
    /// The sources this set is built from, typed by the source rule of the
    /// same name.
    pub fn sources(&self, engine: &Engine) -> Result<Self> {
        if !self.rule.is_target() {
            return Ok(self.clone());
        }
        let mut sources = Self::new(engine.require_rule(self.rule.name(), Role::Source)?);
        for elem in &self.elems {
            sources.extend(elem.sources(engine)?);
        }
        Ok(sources)
    }
}

impl<'a> IntoIterator for &'a ElemSet {
    type Item = &'a Elem;
    type IntoIter = std::slice::Iter<'a, Elem>;
    fn into_iter(self) -> Self::IntoIter {
        self.elems.iter()
    }
}

impl IntoIterator for ElemSet {
    type Item = Elem;
    type IntoIter = std::vec::IntoIter<Elem>;
    fn into_iter(self) -> Self::IntoIter {
        self.elems.into_iter()
    }
}

impl fmt::Display for ElemSet {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{{{}}}", self.identifiers().join(", "))
    }
}
