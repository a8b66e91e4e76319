use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;

use chrono::{DateTime, TimeDelta, TimeZone, Utc};
use partake::catalog::SqliteTables;
use partake::engine::{MAX_DEPTH, RuleMatch};
use partake::oracle::MemoryFileSystem;
use partake::time::{Grain, Instant};
use partake::{Engine, PartakeError, ResolveOptions, RuleOptions, Template};

fn hour(d: u32, h: u32) -> Instant {
    Utc.with_ymd_and_hms(2024, 1, d, h, 0, 0).unwrap().fixed_offset()
}

/// Hands out strictly increasing modification times.
#[derive(Clone, Default)]
struct Clock(Rc<Cell<i64>>);
impl Clock {
    fn tick(&self) -> DateTime<Utc> {
        self.0.set(self.0.get() + 1);
        Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap() + TimeDelta::minutes(self.0.get())
    }
}

struct Chain {
    fs: Arc<MemoryFileSystem>,
    engine: Engine,
    calls: Rc<RefCell<Vec<String>>>,
    clock: Clock,
}

fn empty_engine() -> (Arc<MemoryFileSystem>, Engine) {
    let fs = Arc::new(MemoryFileSystem::new());
    let tables = Arc::new(SqliteTables::open_in_memory().unwrap());
    (fs.clone(), Engine::new(fs, tables))
}

/// a (daily) <- b (hourly) <- c (hourly, raw), with commands recording their
/// calls and writing what they were asked to build.
fn chain() -> Chain {
    let (fs, mut engine) = empty_engine();
    let path = |p: &str| Template::path(p);
    let options = RuleOptions::default;
    engine.add_target_rule("a", path("a/%Y/%m/%d.csv"), options()).unwrap();
    engine.add_source_rule("a", path("b/%Y/%m/%d/%H.csv"), options()).unwrap();
    engine.add_target_rule("b", path("b/%Y/%m/%d/%H.csv"), options()).unwrap();
    engine.add_source_rule("b", path("c/%Y/%m/%d/%H.csv"), options()).unwrap();

    let calls = Rc::new(RefCell::new(Vec::new()));
    let clock = Clock::default();
    for name in ["a", "b"] {
        let calls = Rc::clone(&calls);
        let clock = clock.clone();
        let fs = Arc::clone(&fs);
        engine.add_command_rule(name, move |_, rule, targets, _| {
            calls.borrow_mut().push(format!("{rule}:{}", targets.len()));
            let now = clock.tick();
            for target in targets {
                fs.touch(target.identifier(), now);
            }
            Ok(())
        });
    }
    let raw = clock.tick();
    for h in 0..24 {
        fs.touch(&format!("c/2024/01/01/{h:02}.csv"), raw);
    }
    Chain {
        fs,
        engine,
        calls,
        clock,
    }
}

#[test]
fn upstream_builds_first_and_once() {
    let Chain { engine, calls, .. } = chain();
    assert!(engine.is_actionable("a"));
    let plan = engine
        .execute("a", hour(1, 0), hour(1, 0), &ResolveOptions::default())
        .expect("execute ok");
    assert_eq!(*calls.borrow(), vec!["b:24", "a:1"]);
    assert_eq!(plan.executed(), vec!["b", "a"]);
    assert_eq!(plan.step("b").unwrap().depth, 2);
    assert_eq!(plan.step("a").unwrap().depth, 1);
    assert_eq!(engine.depth(), 0);
    assert!(!engine.executing());

    // nothing left to do the second time round
    let again = engine
        .execute("a", hour(1, 0), hour(1, 0), &ResolveOptions::default())
        .unwrap();
    assert!(again.is_settled());
    assert!(again.executed().is_empty());
    assert_eq!(calls.borrow().len(), 2);
}

#[test]
fn resolve_does_not_build() {
    let Chain {
        fs, engine, calls, ..
    } = chain();
    let files = fs.len();
    let plan = engine
        .resolve("a", hour(1, 0), hour(1, 0), &ResolveOptions::default())
        .unwrap();
    assert!(calls.borrow().is_empty());
    assert_eq!(fs.len(), files);
    assert_eq!(plan.step("b").unwrap().actionable.len(), 24);
    assert_eq!(plan.step("b").unwrap().updateable.len(), 24);
    assert_eq!(plan.step("a").unwrap().actionable, vec!["a/2024/01/01.csv"]);
    // a's sources do not exist yet
    assert!(plan.step("a").unwrap().updateable.is_empty());
}

#[test]
fn stale_upstream_is_rebuilt() {
    let Chain {
        fs,
        engine,
        calls,
        clock,
    } = chain();
    engine
        .execute("a", hour(1, 0), hour(1, 0), &ResolveOptions::default())
        .unwrap();
    // raw data changes after everything was built
    fs.touch("c/2024/01/01/07.csv", clock.tick());
    engine
        .execute("a", hour(1, 0), hour(1, 0), &ResolveOptions::default())
        .unwrap();
    assert_eq!(*calls.borrow(), vec!["b:24", "a:1", "b:1", "a:1"]);
}

#[test]
fn report_grain_rolls_up() {
    let Chain { engine, .. } = chain();
    let options = ResolveOptions {
        window: None,
        report_grain: Some(Grain::Day),
    };
    let plan = engine.resolve("a", hour(1, 0), hour(1, 0), &options).unwrap();
    assert_eq!(plan.step("b").unwrap().actionable, vec!["b/2024/01/01"]);
    assert_eq!(plan.step("a").unwrap().actionable, vec!["a/2024/01/01.csv"]);
}

/// r0 <- r1 <- ... <- r{levels-1} <- raw
fn deep(levels: usize) -> Engine {
    let (_, mut engine) = empty_engine();
    for i in 0..levels {
        let source = if i + 1 < levels {
            format!("r{}/%Y%m%d%H", i + 1)
        } else {
            "raw/%Y%m%d%H".to_string()
        };
        engine
            .add_target_rule(&format!("r{i}"), Template::path(&format!("r{i}/%Y%m%d%H")), RuleOptions::default())
            .unwrap();
        engine
            .add_source_rule(&format!("r{i}"), Template::path(&source), RuleOptions::default())
            .unwrap();
    }
    engine
}

#[test]
fn depth_is_bounded() {
    let engine = deep(MAX_DEPTH);
    let plan = engine
        .resolve("r0", hour(1, 0), hour(1, 0), &ResolveOptions::default())
        .expect("ten levels resolve");
    assert_eq!(plan.steps.len(), MAX_DEPTH);
    assert_eq!(plan.steps[0].rule, "r9");

    let engine = deep(MAX_DEPTH + 1);
    match engine.resolve("r0", hour(1, 0), hour(1, 0), &ResolveOptions::default()) {
        Err(PartakeError::MaxDepthExceeded { rule, depth }) => {
            assert_eq!(rule, "r10");
            assert_eq!(depth, MAX_DEPTH);
        }
        other => panic!("expected MaxDepthExceeded, got {other:?}"),
    }
    assert_eq!(engine.depth(), 0);
}

#[test]
fn self_feeding_rule_is_cut_off() {
    let (_, mut engine) = empty_engine();
    engine
        .add_target_rule("loop", Template::path("x/%Y/%m/%d/%H"), RuleOptions::default())
        .unwrap();
    engine
        .add_source_rule("loop", Template::path("x/%Y/%m/%d/%H"), RuleOptions::default())
        .unwrap();
    let engine = engine.with_max_depth(3);
    let outcome = engine.resolve("loop", hour(1, 0), hour(1, 0), &ResolveOptions::default());
    assert!(matches!(outcome, Err(PartakeError::MaxDepthExceeded { depth: 3, .. })));
    assert_eq!(engine.depth(), 0);
}

#[test]
fn failing_command_aborts() {
    let Chain { mut engine, .. } = chain();
    engine.add_command_rule("b", |_, rule, _, _| {
        Err(PartakeError::Command {
            rule: rule.to_string(),
            message: "exit status 1".into(),
        })
    });
    let outcome = engine.execute("a", hour(1, 0), hour(1, 0), &ResolveOptions::default());
    assert!(matches!(outcome, Err(PartakeError::Command { .. })));
    assert_eq!(engine.depth(), 0);
}

#[test]
fn missing_command() {
    let (_, mut engine) = empty_engine();
    engine
        .add_target_rule("daily", Template::path("out/%Y/%m/%d"), RuleOptions::default())
        .unwrap();
    engine
        .add_source_rule("daily", Template::path("in/%Y/%m/%d"), RuleOptions::default())
        .unwrap();
    assert!(!engine.is_actionable("daily"));
    let outcome = engine.execute("daily", hour(1, 0), hour(1, 0), &ResolveOptions::default());
    assert!(matches!(outcome, Err(PartakeError::MissingCommand(name)) if name == "daily"));
}

#[test]
fn identifiers_find_their_rule() {
    let Chain { engine, .. } = chain();
    match engine.rule_for_identifier("b/2024/01/01/05.csv").unwrap() {
        RuleMatch::Target(rule) => assert_eq!(rule.name(), "b"),
        RuleMatch::Terminal => panic!("b is produced by a rule"),
    }
    assert!(matches!(
        engine.rule_for_identifier("c/2024/01/01/05.csv").unwrap(),
        RuleMatch::Terminal
    ));
    assert!(matches!(
        engine.rule_for_identifier("z/2024/01/01/05.csv"),
        Err(PartakeError::NoRuleMatch(_))
    ));
}

#[test]
fn ambiguity_picks_the_first_registered() {
    let (_, mut engine) = empty_engine();
    let template = || Template::path("shared/%Y/%m/%d");
    engine
        .add_target_rule("hidden", template(), RuleOptions::default().with_primary(false))
        .unwrap();
    engine.add_target_rule("first", template(), RuleOptions::default()).unwrap();
    engine.add_target_rule("second", template(), RuleOptions::default()).unwrap();
    for _ in 0..3 {
        match engine.rule_for_identifier("shared/2024/01/01").unwrap() {
            RuleMatch::Target(rule) => assert_eq!(rule.name(), "first"),
            RuleMatch::Terminal => panic!("expected a target rule"),
        }
    }
}

#[test]
fn target_paths_translate_to_sources() {
    let Chain { engine, .. } = chain();
    assert_eq!(
        engine.resolve_path("a", "a/2024/01/02.csv").unwrap(),
        "b/2024/01/02/00.csv"
    );
    assert!(matches!(
        engine.resolve_path("a", "a/2024/01.csv"),
        Err(PartakeError::UnboundInput { .. })
    ));
    assert!(matches!(
        engine.resolve_path("nope", "a/2024/01/02.csv"),
        Err(PartakeError::UnknownRule { .. })
    ));
}

#[test]
fn unknown_rules() {
    let (_, engine) = empty_engine();
    assert!(matches!(
        engine.resolve("ghost", hour(1, 0), hour(1, 0), &ResolveOptions::default()),
        Err(PartakeError::UnknownRule { .. })
    ));
}
