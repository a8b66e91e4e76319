use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use partake::catalog::SqliteTables;
use partake::oracle::MemoryFileSystem;
use partake::time::{Grain, Instant};
use partake::{ElemSet, Engine, Role, Rule, RuleOptions, Template};

fn day(d: u32) -> Instant {
    Utc.with_ymd_and_hms(2024, 1, d, 0, 0, 0).unwrap().fixed_offset()
}

fn stamp(h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, h, 0, 0).unwrap()
}

/// Daily targets built from daily sources.
fn setup(window: u32) -> (Arc<MemoryFileSystem>, Engine) {
    let fs = Arc::new(MemoryFileSystem::new());
    let tables = Arc::new(SqliteTables::open_in_memory().unwrap());
    let mut engine = Engine::new(fs.clone(), tables);
    engine
        .add_target_rule("daily", Template::path("out/%Y/%m/%d.csv"), RuleOptions::default())
        .unwrap();
    engine
        .add_source_rule(
            "daily",
            Template::path("in/%Y/%m/%d.csv"),
            RuleOptions::default().with_window(window),
        )
        .unwrap();
    (fs, engine)
}

fn targets(engine: &Engine, from: u32, to: u32) -> ElemSet {
    let rule = engine.target_rule("daily").unwrap();
    ElemSet::from_elems(rule.clone(), rule.generate(day(from), day(to)))
}

#[test]
fn missing_stale_and_fresh() {
    let (fs, engine) = setup(0);
    for d in 1..=3 {
        fs.touch(&format!("in/2024/01/{d:02}.csv"), stamp(5));
    }
    fs.touch("out/2024/01/02.csv", stamp(1));
    fs.touch("out/2024/01/03.csv", stamp(9));
    let set = targets(&engine, 1, 3);

    assert_eq!(set.missing(&engine).unwrap().identifiers(), vec!["out/2024/01/01.csv"]);
    assert_eq!(set.stale(&engine, None).unwrap().identifiers(), vec!["out/2024/01/02.csv"]);
    assert_eq!(
        set.actionable(&engine, None).unwrap().identifiers(),
        vec!["out/2024/01/01.csv", "out/2024/01/02.csv"]
    );
    assert_eq!(set.updateable(&engine, None).unwrap().len(), 2);
    assert_eq!(set.existing(&engine).unwrap().len(), 2);
}

#[test]
fn updateable_needs_a_source() {
    let (fs, engine) = setup(0);
    fs.touch("in/2024/01/01.csv", stamp(5));
    let set = targets(&engine, 1, 2);
    assert_eq!(set.actionable(&engine, None).unwrap().len(), 2);
    assert_eq!(set.updateable(&engine, None).unwrap().identifiers(), vec!["out/2024/01/01.csv"]);
}

#[test]
fn staleness_looks_across_the_window() {
    let (fs, engine) = setup(0);
    fs.touch("in/2024/01/02.csv", stamp(1));
    fs.touch("in/2024/01/03.csv", stamp(9));
    fs.touch("out/2024/01/02.csv", stamp(5));
    let set = targets(&engine, 2, 2);
    assert!(set.stale(&engine, None).unwrap().is_empty());
    assert_eq!(set.stale(&engine, Some(1)).unwrap().len(), 1);

    let (fs, engine) = setup(1);
    fs.touch("in/2024/01/02.csv", stamp(1));
    fs.touch("in/2024/01/03.csv", stamp(9));
    fs.touch("out/2024/01/02.csv", stamp(5));
    assert_eq!(targets(&engine, 2, 2).stale(&engine, None).unwrap().len(), 1);
}

#[test]
fn incomplete_targets() {
    let fs = Arc::new(MemoryFileSystem::new());
    let tables = Arc::new(SqliteTables::open_in_memory().unwrap());
    let mut engine = Engine::new(fs.clone(), tables);
    let rule = engine
        .add_target_rule("daily", Template::path("out/%Y/%m/%d.csv"), RuleOptions::default())
        .unwrap();
    engine
        .add_source_rule("daily", Template::path("in/%Y/%m/%d/%H.csv"), RuleOptions::default())
        .unwrap();
    fs.touch("out/2024/01/01.csv", stamp(9));
    for hour in 0..12 {
        fs.touch(&format!("in/2024/01/01/{hour:02}.csv"), stamp(1));
    }
    let set = ElemSet::from_elems(rule.clone(), [rule.elem_at(day(1))]);
    assert!(set.missing(&engine).unwrap().is_empty());
    assert!(set.stale(&engine, None).unwrap().is_empty());
    assert_eq!(set.incomplete(&engine).unwrap().len(), 1);
    assert_eq!(set.actionable(&engine, None).unwrap().len(), 1);
}

#[test]
fn sources_and_targets_project_between_rules() {
    let (_, engine) = setup(0);
    let set = targets(&engine, 1, 3);
    let sources = set.sources(&engine).unwrap();
    assert!(!sources.rule().is_target());
    assert_eq!(sources.len(), 3);
    let back = sources.targets(&engine).unwrap();
    assert_eq!(back.identifiers(), set.identifiers());
    // views only apply to targets
    assert!(sources.actionable(&engine, None).unwrap().is_empty());
}

#[test]
fn rolling_up_and_neighbours() {
    let (_, engine) = setup(1);
    let set = targets(&engine, 30, 31);
    let monthly = set.with_grain(Grain::Month).unwrap();
    assert_eq!(monthly.identifiers(), vec!["out/2024/01"]);
    assert!(set.with_grain(Grain::Hour).is_err());

    let sources = engine.source_rule("daily").unwrap();
    let around = ElemSet::from_elems(sources.clone(), [sources.elem_at(day(10))]).adjacent();
    assert_eq!(
        around.identifiers(),
        vec!["in/2024/01/09.csv", "in/2024/01/10.csv", "in/2024/01/11.csv"]
    );
}

#[test]
fn sets_deduplicate() {
    let (_, engine) = setup(0);
    let rule = engine.target_rule("daily").unwrap();
    let mut set = ElemSet::new(rule.clone());
    assert!(set.insert(rule.elem_at(day(1))));
    assert!(!set.insert(rule.elem_at(day(1))));
    set.extend(rule.generate(day(1), day(2)));
    assert_eq!(set.len(), 2);
    assert_eq!(set.to_string(), "{out/2024/01/01.csv, out/2024/01/02.csv}");
}

#[test]
fn undated_elems_collapse_and_sort_by_start() {
    let fixed = Arc::new(
        Rule::new("fixed", Role::Target, Template::path("out/all.csv"), RuleOptions::default())
            .unwrap(),
    );
    let morning = fixed.elem_at(day(1));
    let evening = fixed.elem_at(day(1) + chrono::TimeDelta::hours(18));
    assert_eq!(morning, evening);
    assert_ne!(morning.start(), evening.start());
    let set = ElemSet::from_elems(fixed.clone(), fixed.generate(day(1), day(2)));
    assert_eq!(set.len(), 1);

    let (_, engine) = setup(0);
    let rule = engine.target_rule("daily").unwrap();
    let mut set = ElemSet::new(rule.clone());
    for d in [3, 1, 2] {
        set.insert(rule.elem_at(day(d)));
    }
    let starts: Vec<Instant> = set.sorted().iter().map(|e| e.start()).collect();
    assert_eq!(starts, vec![day(1), day(2), day(3)]);
}
