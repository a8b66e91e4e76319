use std::sync::Arc;

use chrono::{DateTime, TimeZone, Utc};
use partake::catalog::SqliteTables;
use partake::oracle::{FileSystem, MemoryFileSystem, Tables};
use partake::time::Instant;
use partake::{Engine, RuleOptions, Template};

fn at(y: i32, m: u32, d: u32, h: u32) -> Instant {
    Utc.with_ymd_and_hms(y, m, d, h, 0, 0).unwrap().fixed_offset()
}

fn stamp(h: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, h, 0, 0).unwrap()
}

fn setup() -> (Arc<MemoryFileSystem>, Arc<SqliteTables>, Engine) {
    let fs = Arc::new(MemoryFileSystem::new());
    let tables = Arc::new(SqliteTables::open_in_memory().unwrap());
    tables
        .execute_batch(
            "CREATE TABLE events (y TEXT, m TEXT, d TEXT, updated_at INTEGER);
             INSERT INTO events VALUES ('2024', '01', '02', 1704200000);
             INSERT INTO events VALUES ('2024', '01', '02', 1704210000);",
        )
        .unwrap();
    let engine = Engine::new(fs.clone(), tables.clone());
    (fs, tables, engine)
}

#[test]
fn path_existence_and_modification() {
    let (fs, _, mut engine) = setup();
    fs.touch("out/2024/01/02.csv", stamp(3));
    let rule = engine
        .add_target_rule("daily", Template::path("out/%Y/%m/%d.csv"), RuleOptions::default())
        .unwrap();
    let built = rule.elem_at(at(2024, 1, 2, 0));
    let absent = rule.elem_at(at(2024, 1, 3, 0));
    assert!(built.exists(&engine).unwrap());
    assert!(!absent.exists(&engine).unwrap());
    assert_eq!(built.last_modified_at(&engine).unwrap(), Some(stamp(3)));
    // "never" for something that is not there
    assert_eq!(absent.last_modified_at(&engine).unwrap(), None);
}

#[test]
fn wildcard_paths_explode() {
    let (fs, _, mut engine) = setup();
    fs.touch("in/eu/2024/01/02.csv", stamp(1));
    fs.touch("in/us/2024/01/02.csv", stamp(5));
    fs.touch("in/us/2024/01/03.csv", stamp(9));
    fs.touch("in/us/2024/01/02.txt", stamp(9));
    let rule = engine
        .add_source_rule("daily", Template::path("in/*/%Y/%m/%d.csv"), RuleOptions::default())
        .unwrap();
    let open = rule.elem_at(at(2024, 1, 2, 0));
    assert!(open.has_wildcard());
    let exploded: Vec<String> = open
        .explode(&engine)
        .unwrap()
        .iter()
        .map(|e| e.identifier().to_string())
        .collect();
    assert_eq!(exploded, vec!["in/eu/2024/01/02.csv", "in/us/2024/01/02.csv"]);
    assert!(open.exists(&engine).unwrap());
    // the newest file behind the wildcard
    assert_eq!(open.last_modified_at(&engine).unwrap(), Some(stamp(5)));
}

#[test]
fn directories_stand_for_their_files() {
    let fs = MemoryFileSystem::new();
    fs.touch("out/2024/01/02/part-0.parquet", stamp(2));
    fs.touch("out/2024/01/02/part-1.parquet", stamp(4));
    assert!(fs.exists("out/2024/01/02"));
    assert_eq!(fs.stat("out/2024/01/02").unwrap().modified_at, stamp(4));
    assert!(!fs.exists("out/2024/01/0"));
    assert_eq!(fs.glob("out/2024/01/*").unwrap().len(), 2);
}

#[test]
fn partitioned_tables() {
    let (_, _, mut engine) = setup();
    let rule = engine
        .add_target_rule(
            "events",
            Template::partitioned("events", "y=%Y/m=%m/d=%d"),
            RuleOptions::default().with_modified_at("updated_at"),
        )
        .unwrap();
    let present = rule.elem_at(at(2024, 1, 2, 0));
    let absent = rule.elem_at(at(2024, 1, 3, 0));
    assert_eq!(present.identifier(), "events/y=2024/m=01/d=02");
    assert!(present.exists(&engine).unwrap());
    assert!(!absent.exists(&engine).unwrap());
    assert_eq!(present.explode(&engine).unwrap().len(), 1);
    assert!(absent.explode(&engine).unwrap().is_empty());
    assert_eq!(
        present.last_modified_at(&engine).unwrap(),
        DateTime::from_timestamp(1704210000, 0)
    );
    assert_eq!(absent.last_modified_at(&engine).unwrap(), None);
}

#[test]
fn plain_tables_always_exist() {
    let (_, _, mut engine) = setup();
    let rule = engine
        .add_target_rule("dim", Template::table("dimension"), RuleOptions::default())
        .unwrap();
    let elem = rule.elem_at(at(2024, 1, 2, 0));
    assert_eq!(elem.identifier(), "dimension");
    assert!(elem.exists(&engine).unwrap());
    assert!(elem.explode(&engine).unwrap().is_empty());
    assert_eq!(elem.last_modified_at(&engine).unwrap(), None);
}

#[test]
fn unsafe_partition_keys_are_rejected() {
    let (_, tables, _) = setup();
    assert!(tables.table_exists("events", Some("y=2024")).unwrap());
    assert!(tables.table_exists("events", Some("y;drop=2024")).is_err());
    assert!(!tables.table_exists("nothing", Some("y=2024")).unwrap());
}

#[test]
fn completeness_and_projection() {
    let (fs, _, mut engine) = setup();
    let target = engine
        .add_target_rule("daily", Template::path("out/%Y/%m/%d.csv"), RuleOptions::default())
        .unwrap();
    engine
        .add_source_rule("daily", Template::path("in/%Y/%m/%d/%H.csv"), RuleOptions::default())
        .unwrap();
    for hour in 0..23 {
        fs.touch(&format!("in/2024/01/02/{hour:02}.csv"), stamp(1));
    }
    let day = target.elem_at(at(2024, 1, 2, 0));
    let sources = day.sources(&engine).unwrap();
    assert_eq!(sources.len(), 24);
    assert!(!day.complete(&engine).unwrap());

    fs.touch("in/2024/01/02/23.csv", stamp(1));
    engine.clear();
    assert!(day.complete(&engine).unwrap());

    // and back up again
    let targets = sources[5].targets(&engine).unwrap();
    assert_eq!(targets, vec![day]);
}
