//! The registry of rules and build commands, and the recursive walk that
//! resolves a rule against everything upstream of it.
//!
//! Resolution is depth first. For a set of targets the engine computes their
//! sources, finds the target rule producing each source, and resolves those
//! groups first (grouped sources become the targets of the nested step).
//! Sources that only match a source rule are terminal. Once everything
//! upstream has been handled the actionable targets of the step are computed
//! and, when executing, handed to the registered command.
//!
//! Every step runs inside an [`Activation`] which counts the depth and, when
//! it goes away (including on errors), restores the depth and flushes the
//! caches of the engine and of both oracles.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::sync::Arc;

use serde::Serialize;
use tracing::{debug, info, warn};

use crate::elem::Elem;
use crate::error::{PartakeError, Result};
use crate::lock::{LockSettings, NamedLock};
use crate::oracle::{FileSystem, Tables};
use crate::rule::{Role, Rule, RuleOptions, Template};
use crate::set::ElemSet;
use crate::time::{Grain, Instant};
use crate::IdentifierHasher;

/// Deepest nesting of resolve steps before the rule graph is considered circular.
pub const MAX_DEPTH: usize = 10;

/// A build command: called with the engine, the rule name, the actionable
/// targets and the options of the resolution.
pub type Command = Box<dyn Fn(&Engine, &str, &ElemSet, &ResolveOptions) -> Result<()>>;

#[derive(Debug, Clone, Default)]
pub struct ResolveOptions {
    /// Overrides the staleness window of every source rule.
    pub window: Option<u32>,
    /// Reports actionable targets rolled up to this grain when it is coarser
    /// than the rule's own.
    pub report_grain: Option<Grain>,
}

/// Which rule produces an identifier.
#[derive(Debug, Clone)]
pub enum RuleMatch {
    Target(Arc<Rule>),
    /// Matches a source rule only: nothing upstream to resolve.
    Terminal,
}

// ------------- Plan -------------
#[derive(Debug, Clone, Serialize)]
pub struct Step {
    pub rule: String,
    pub depth: usize,
    pub targets: usize,
    pub actionable: Vec<String>,
    pub updateable: Vec<String>,
    pub executed: bool,
}

/// Steps in the order they completed: upstream rules come first.
#[derive(Debug, Clone, Default, Serialize)]
pub struct Plan {
    pub steps: Vec<Step>,
}
impl Plan {
    pub fn step(&self, rule: &str) -> Option<&Step> {
        self.steps.iter().find(|s| s.rule == rule)
    }
    pub fn executed(&self) -> Vec<&str> {
        self.steps
            .iter()
            .filter(|s| s.executed)
            .map(|s| s.rule.as_str())
            .collect()
    }
    pub fn is_settled(&self) -> bool {
        self.steps.iter().all(|s| s.actionable.is_empty())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Mode {
    Plan,
    Execute,
}

#[derive(Default)]
struct Cache {
    sources: HashMap<Elem, Vec<Elem>, IdentifierHasher>,
    targets: HashMap<Elem, Vec<Elem>, IdentifierHasher>,
}

// ------------- Activation -------------
struct Activation<'e> {
    engine: &'e Engine,
}
impl Drop for Activation<'_> {
    fn drop(&mut self) {
        let depth = &self.engine.depth;
        depth.set(depth.get().saturating_sub(1));
        self.engine.clear();
    }
}

// ------------- Engine -------------
pub struct Engine {
    filesystem: Arc<dyn FileSystem>,
    tables: Arc<dyn Tables>,
    max_depth: usize,
    // registration order decides ambiguous lookups
    targets: Vec<Arc<Rule>>,
    sources: Vec<Arc<Rule>>,
    commands: HashMap<String, Command>,
    cache: RefCell<Cache>,
    depth: Cell<usize>,
}

impl Engine {
    pub fn new(filesystem: Arc<dyn FileSystem>, tables: Arc<dyn Tables>) -> Self {
        Self {
            filesystem,
            tables,
            max_depth: MAX_DEPTH,
            targets: Vec::new(),
            sources: Vec::new(),
            commands: HashMap::new(),
            cache: RefCell::new(Cache::default()),
            depth: Cell::new(0),
        }
    }
    pub fn with_max_depth(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }
    pub fn filesystem(&self) -> &dyn FileSystem {
        self.filesystem.as_ref()
    }
    pub fn tables(&self) -> &dyn Tables {
        self.tables.as_ref()
    }
    pub fn max_depth(&self) -> usize {
        self.max_depth
    }
    pub fn depth(&self) -> usize {
        self.depth.get()
    }
    /// True while a resolve or execute step is running.
    pub fn executing(&self) -> bool {
        self.depth.get() > 0
    }

    // ------------- Registration -------------
    fn keep(rules: &mut Vec<Arc<Rule>>, rule: Rule) -> Arc<Rule> {
        let kept = Arc::new(rule);
        match rules.iter_mut().find(|r| r.name() == kept.name()) {
            Some(existing) => *existing = Arc::clone(&kept),
            None => rules.push(Arc::clone(&kept)),
        }
        kept
    }
    pub fn add_target_rule(
        &mut self,
        name: &str,
        template: Template,
        options: RuleOptions,
    ) -> Result<Arc<Rule>> {
        let rule = Rule::new(name, Role::Target, template, options)?;
        debug!(%rule, "registered");
        Ok(Self::keep(&mut self.targets, rule))
    }
    pub fn add_source_rule(
        &mut self,
        name: &str,
        template: Template,
        options: RuleOptions,
    ) -> Result<Arc<Rule>> {
        let rule = Rule::new(name, Role::Source, template, options)?;
        debug!(%rule, "registered");
        Ok(Self::keep(&mut self.sources, rule))
    }
    pub fn add_command_rule<F>(&mut self, name: &str, command: F)
    where
        F: Fn(&Engine, &str, &ElemSet, &ResolveOptions) -> Result<()> + 'static,
    {
        self.commands.insert(name.to_string(), Box::new(command));
    }
    pub fn target_rule(&self, name: &str) -> Option<Arc<Rule>> {
        self.targets.iter().find(|r| r.name() == name).cloned()
    }
    pub fn source_rule(&self, name: &str) -> Option<Arc<Rule>> {
        self.sources.iter().find(|r| r.name() == name).cloned()
    }
    pub fn require_rule(&self, name: &str, role: Role) -> Result<Arc<Rule>> {
        let rule = match role {
            Role::Target => self.target_rule(name),
            Role::Source => self.source_rule(name),
        };
        rule.ok_or_else(|| PartakeError::UnknownRule {
            name: name.to_string(),
            role: role.to_string(),
        })
    }
    /// Target rules in registration order.
    pub fn target_rules(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.targets.iter()
    }
    pub fn source_rules(&self) -> impl Iterator<Item = &Arc<Rule>> {
        self.sources.iter()
    }
    /// A name can be executed once its target, source and command are known.
    pub fn is_actionable(&self, name: &str) -> bool {
        self.target_rule(name).is_some()
            && self.source_rule(name).is_some()
            && self.commands.contains_key(name)
    }

    // ------------- Lookups -------------
    /// The primary target rule producing `identifier`. When several match, the
    /// first registered wins and the ambiguity is logged.
    pub fn rule_for_identifier(&self, identifier: &str) -> Result<RuleMatch> {
        let candidates: Vec<&Arc<Rule>> = self
            .targets
            .iter()
            .filter(|r| r.options().primary && r.matches(identifier))
            .collect();
        match candidates.as_slice() {
            [] if self.sources.iter().any(|r| r.matches(identifier)) => Ok(RuleMatch::Terminal),
            [] => Err(PartakeError::NoRuleMatch(identifier.to_string())),
            [only] => Ok(RuleMatch::Target(Arc::clone(only))),
            [first, ..] => {
                let ambiguity = PartakeError::AmbiguousRuleMatch {
                    identifier: identifier.to_string(),
                    candidates: candidates.iter().map(|r| r.name().to_string()).collect(),
                };
                warn!(%ambiguity, chosen = first.name(), "picking the first registered rule");
                Ok(RuleMatch::Target(Arc::clone(first)))
            }
        }
    }
    pub fn targets_for_source(&self, name: &str, source: &Elem) -> Result<Vec<Elem>> {
        if let Some(known) = self.cache.borrow().targets.get(source) {
            return Ok(known.clone());
        }
        let target = self.require_rule(name, Role::Target)?;
        let projected = source.rule().generate_via_unify(source, &target);
        self.cache
            .borrow_mut()
            .targets
            .insert(source.clone(), projected.clone());
        Ok(projected)
    }
    pub fn sources_for_target(&self, name: &str, target: &Elem) -> Result<Vec<Elem>> {
        if let Some(known) = self.cache.borrow().sources.get(target) {
            return Ok(known.clone());
        }
        let source = self.require_rule(name, Role::Source)?;
        let projected = target.rule().generate_via_unify(target, &source);
        self.cache
            .borrow_mut()
            .sources
            .insert(target.clone(), projected.clone());
        Ok(projected)
    }
    /// Re-renders a target identifier through the source template of the same
    /// rule name.
    pub fn resolve_path(&self, name: &str, identifier: &str) -> Result<String> {
        let target = self.require_rule(name, Role::Target)?;
        let source = self.require_rule(name, Role::Source)?;
        target
            .matcher()
            .translate(identifier, source.matcher())
            .ok_or_else(|| PartakeError::UnboundInput {
                identifier: identifier.to_string(),
                template: target.matcher().template().to_string(),
            })
    }
    /// Drops every cached projection and the oracle caches.
    pub fn clear(&self) {
        let mut cache = self.cache.borrow_mut();
        cache.sources.clear();
        cache.targets.clear();
        self.filesystem.clear();
        self.tables.clear();
    }

    // ------------- Resolution -------------
    /// Works out what would be built for the targets of `name` in
    /// `[start, stop]` without building anything.
    pub fn resolve(
        &self,
        name: &str,
        start: Instant,
        stop: Instant,
        options: &ResolveOptions,
    ) -> Result<Plan> {
        let targets = self.generate_targets(name, start, stop)?;
        self.run(name, targets, options, Mode::Plan)
    }
    /// Like [`Engine::resolve`], invoking the command of every step that has
    /// actionable targets, upstream first.
    pub fn execute(
        &self,
        name: &str,
        start: Instant,
        stop: Instant,
        options: &ResolveOptions,
    ) -> Result<Plan> {
        let targets = self.generate_targets(name, start, stop)?;
        self.run(name, targets, options, Mode::Execute)
    }
    pub fn resolve_targets(&self, targets: ElemSet, options: &ResolveOptions) -> Result<Plan> {
        let name = targets.rule().name().to_string();
        self.run(&name, targets, options, Mode::Plan)
    }
    pub fn execute_targets(&self, targets: ElemSet, options: &ResolveOptions) -> Result<Plan> {
        let name = targets.rule().name().to_string();
        self.run(&name, targets, options, Mode::Execute)
    }
    /// [`Engine::execute`] while holding the named lock of the rule.
    pub fn execute_exclusive(
        &self,
        name: &str,
        start: Instant,
        stop: Instant,
        options: &ResolveOptions,
        lock: &LockSettings,
    ) -> Result<Plan> {
        let _lock = NamedLock::acquire_with_retry(lock, name)?;
        self.execute(name, start, stop, options)
    }

    fn generate_targets(&self, name: &str, start: Instant, stop: Instant) -> Result<ElemSet> {
        let rule = self.require_rule(name, Role::Target)?;
        Ok(ElemSet::from_elems(
            Arc::clone(&rule),
            rule.generate(start, stop),
        ))
    }
    fn run(&self, name: &str, targets: ElemSet, options: &ResolveOptions, mode: Mode) -> Result<Plan> {
        let mut plan = Plan::default();
        let outcome = self.step(name, targets, options, mode, &mut plan);
        if let Err(e) = &outcome {
            warn!(rule = name, error = %e, "resolution failed");
        }
        outcome.map(|_| plan)
    }
    fn enter(&self, name: &str) -> Result<Activation<'_>> {
        let depth = self.depth.get() + 1;
        self.depth.set(depth);
        let activation = Activation { engine: self };
        if depth > self.max_depth {
            return Err(PartakeError::MaxDepthExceeded {
                rule: name.to_string(),
                depth: self.max_depth,
            });
        }
        Ok(activation)
    }
    fn step(
        &self,
        name: &str,
        targets: ElemSet,
        options: &ResolveOptions,
        mode: Mode,
        plan: &mut Plan,
    ) -> Result<()> {
        let _activation = self.enter(name)?;
        let depth = self.depth.get();
        info!(rule = name, depth, targets = targets.len(), "resolving");

        let mut groups: Vec<ElemSet> = Vec::new();
        for source in &targets.sources(self)? {
            let rule = match self.rule_for_identifier(source.identifier())? {
                RuleMatch::Target(rule) => rule,
                RuleMatch::Terminal => continue,
            };
            let produced = rule.require_elem(source.identifier())?;
            match groups.iter_mut().find(|g| g.rule().name() == rule.name()) {
                Some(group) => {
                    group.insert(produced);
                }
                None => groups.push(ElemSet::from_elems(rule, [produced])),
            }
        }
        for group in groups {
            debug!(rule = name, upstream = group.rule().name(), elems = group.len(), "descending");
            let upstream = group.rule().name().to_string();
            self.step(&upstream, group, options, mode, plan)?;
        }

        // upstream steps may have changed what exists
        self.clear();
        let actionable = targets.actionable(self, options.window)?;
        let updateable = targets.updateable(self, options.window)?;
        let mut step = Step {
            rule: name.to_string(),
            depth,
            targets: targets.len(),
            actionable: self.report(&actionable, options)?,
            updateable: self.report(&updateable, options)?,
            executed: false,
        };
        if mode == Mode::Execute && !actionable.is_empty() {
            let command = self
                .commands
                .get(name)
                .ok_or_else(|| PartakeError::MissingCommand(name.to_string()))?;
            info!(rule = name, depth, actionable = actionable.len(), "executing");
            command(self, name, &actionable, options)?;
            step.executed = true;
        }
        info!(
            rule = name,
            depth,
            actionable = step.actionable.len(),
            executed = step.executed,
            "resolved"
        );
        plan.steps.push(step);
        Ok(())
    }
    fn report(&self, set: &ElemSet, options: &ResolveOptions) -> Result<Vec<String>> {
        match options.report_grain {
            Some(grain) if grain > set.rule().grain() => Ok(set.with_grain(grain)?.identifiers()),
            _ => Ok(set.identifiers()),
        }
    }
}
