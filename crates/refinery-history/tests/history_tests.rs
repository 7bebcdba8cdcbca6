use std::fs::{self, File};
use std::path::Path;
use std::time::{Duration, SystemTime};

use chrono::{TimeZone, Utc};
use refinery_core::{CritiqueRecord, RunConfig, RunLog, StopReason};
use refinery_history::{parse_runs, RunFilter, RunStore};
use tempfile::TempDir;

fn config() -> RunConfig {
    RunConfig::builder().model("sonnet").max_rounds(3).build().unwrap()
}

fn run(prompt: &str, day: u32, reason: StopReason, critiques: &[&str]) -> RunLog {
    let mut log = RunLog::new(prompt, &config());
    log.timestamp = Utc.with_ymd_and_hms(2026, 3, day, 10, 0, 0).unwrap();
    log.reason_for_stopping = Some(reason);
    log.final_output = format!("output for {}", prompt);
    log.critiques = critiques
        .iter()
        .enumerate()
        .map(|(i, text)| CritiqueRecord {
            round: i + 1,
            text: text.to_string(),
            model_used: "sonnet".to_string(),
            roles_used: vec!["critic".to_string()],
        })
        .collect();
    log
}

fn write_jsonl(dir: &Path, name: &str, runs: &[RunLog]) {
    let lines: Vec<String> = runs
        .iter()
        .map(|r| serde_json::to_string(r).unwrap())
        .collect();
    fs::write(dir.join(name), lines.join("\n") + "\n").unwrap();
}

const LONG_CRITIQUE: &str =
    "The second paragraph repeats the introduction and the conclusion never answers the question.";

/// Helper: create a temp directory with a few run log files.
fn create_test_logs_dir() -> (TempDir, Vec<RunLog>) {
    let dir = TempDir::new().unwrap();

    let first = run(
        "write a haiku about autumn",
        1,
        StopReason::NonActionable { round: 2 },
        &[LONG_CRITIQUE, LONG_CRITIQUE],
    );
    let second = run(
        "summarize the quarterly report",
        2,
        StopReason::MaxRoundsReached { max_rounds: 3 },
        &[LONG_CRITIQUE, LONG_CRITIQUE, LONG_CRITIQUE],
    );
    let third = run(
        "draft a release announcement",
        3,
        StopReason::Timeout { round: 1 },
        &[],
    );

    write_jsonl(
        dir.path(),
        "run_20260301_100000_aaaaaa.jsonl",
        &[first.clone(), second.clone()],
    );
    write_jsonl(dir.path(), "run_20260303_100000_bbbbbb.jsonl", &[third.clone()]);
    fs::write(dir.path().join("notes.txt"), "not a run log").unwrap();

    (dir, vec![first, second, third])
}

// ============================================================
// Parser tests
// ============================================================

#[test]
fn test_parse_jsonl_with_several_runs() {
    let (dir, runs) = create_test_logs_dir();
    let parsed = parse_runs(&dir.path().join("run_20260301_100000_aaaaaa.jsonl")).unwrap();

    assert_eq!(parsed.len(), 2);
    assert_eq!(parsed[0], runs[0]);
    assert_eq!(parsed[1].original_user_prompt, "summarize the quarterly report");
}

#[test]
fn test_parse_skips_corrupt_lines() {
    let dir = TempDir::new().unwrap();
    let good = run("ok", 5, StopReason::NonActionable { round: 1 }, &[]);
    let content = format!(
        "{}\n{{\"truncated\": \n\n{}\n",
        serde_json::to_string(&good).unwrap(),
        serde_json::to_string(&good).unwrap()
    );
    let path = dir.path().join("run_corrupt.jsonl");
    fs::write(&path, content).unwrap();

    let parsed = parse_runs(&path).unwrap();
    assert_eq!(parsed.len(), 2);
}

#[test]
fn test_parse_single_json_document() {
    let dir = TempDir::new().unwrap();
    let log = run("review main.rs", 4, StopReason::MaxRoundsReached { max_rounds: 1 }, &[]);
    let path = dir.path().join("log_of_main_20260304.json");
    fs::write(&path, serde_json::to_string_pretty(&log).unwrap()).unwrap();

    let parsed = parse_runs(&path).unwrap();
    assert_eq!(parsed, vec![log]);
}

// ============================================================
// Store tests
// ============================================================

#[test]
fn test_list_newest_first() {
    let (dir, _) = create_test_logs_dir();
    let store = RunStore::with_dir(dir.path().to_path_buf());

    let summaries = store.list(&RunFilter::default()).unwrap();

    assert_eq!(summaries.len(), 3);
    assert_eq!(summaries[0].prompt_preview, "draft a release announcement");
    assert_eq!(summaries[0].stop_kind.as_deref(), Some("timeout"));
    assert_eq!(summaries[0].exit_code, Some(1));
    assert_eq!(summaries[2].prompt_preview, "write a haiku about autumn");
    assert_eq!(summaries[2].critiques, 2);
    assert_eq!(summaries[2].file, "run_20260301_100000_aaaaaa");
}

#[test]
fn test_list_filters() {
    let (dir, _) = create_test_logs_dir();
    let store = RunStore::with_dir(dir.path().to_path_buf());

    let by_kind = store
        .list(&RunFilter {
            stop_kind: Some("max_rounds_reached".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(by_kind.len(), 1);
    assert_eq!(by_kind[0].reason, "Max rounds (3) reached.");

    let by_search = store
        .list(&RunFilter {
            search: Some("HAIKU".to_string()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(by_search.len(), 1);

    let by_date = store
        .list(&RunFilter {
            after: Some(Utc.with_ymd_and_hms(2026, 3, 2, 0, 0, 0).unwrap()),
            before: Some(Utc.with_ymd_and_hms(2026, 3, 2, 23, 0, 0).unwrap()),
            ..Default::default()
        })
        .unwrap();
    assert_eq!(by_date.len(), 1);
    assert_eq!(by_date[0].prompt_preview, "summarize the quarterly report");
}

#[test]
fn test_list_missing_dir_is_empty() {
    let dir = TempDir::new().unwrap();
    let store = RunStore::new(vec![dir.path().join("nope")]);
    assert!(store.list(&RunFilter::default()).unwrap().is_empty());
}

#[test]
fn test_list_across_directories() {
    let (dir, _) = create_test_logs_dir();
    let reviews = TempDir::new().unwrap();
    let log = run("review lib.rs", 9, StopReason::NonActionable { round: 1 }, &[]);
    fs::write(
        reviews.path().join("log_of_lib_20260309.json"),
        serde_json::to_string(&log).unwrap(),
    )
    .unwrap();

    let store = RunStore::new(vec![dir.path().to_path_buf(), reviews.path().to_path_buf()]);
    let summaries = store.list(&RunFilter::default()).unwrap();

    assert_eq!(summaries.len(), 4);
    assert_eq!(summaries[0].prompt_preview, "review lib.rs");
}

#[test]
fn test_get_by_file_stem_returns_all_runs() {
    let (dir, runs) = create_test_logs_dir();
    let store = RunStore::with_dir(dir.path().to_path_buf());

    let found = store.get("run_20260301_100000_aaaaaa").unwrap();
    assert_eq!(found, vec![runs[0].clone(), runs[1].clone()]);
}

#[test]
fn test_get_by_run_id_prefix() {
    let (dir, runs) = create_test_logs_dir();
    let store = RunStore::with_dir(dir.path().to_path_buf());

    let id = runs[2].run_id.to_string();
    let found = store.get(&id[..8]).unwrap();
    assert_eq!(found, vec![runs[2].clone()]);
}

#[test]
fn test_get_unknown_id_fails() {
    let (dir, _) = create_test_logs_dir();
    let store = RunStore::with_dir(dir.path().to_path_buf());

    let err = store.get("zzzzzzzz").unwrap_err();
    assert!(err.to_string().contains("zzzzzzzz"));
    // too short to be treated as a prefix
    assert!(store.get("a").is_err());
}

// ============================================================
// Insights tests
// ============================================================

#[test]
fn test_insights_empty() {
    let dir = TempDir::new().unwrap();
    let store = RunStore::with_dir(dir.path().to_path_buf());

    let insights = store.insights(5).unwrap();
    assert_eq!(insights.runs_analyzed, 0);
    assert_eq!(insights.report(), "No past review logs found for analysis.");
}

#[test]
fn test_insights_most_common_reason() {
    let dir = TempDir::new().unwrap();
    let runs: Vec<RunLog> = (1..=4)
        .map(|day| {
            let reason = if day == 2 {
                StopReason::Timeout { round: 1 }
            } else {
                StopReason::MaxRoundsReached { max_rounds: 3 }
            };
            run("p", day, reason, &[LONG_CRITIQUE])
        })
        .collect();
    write_jsonl(dir.path(), "run_a.jsonl", &runs);
    let store = RunStore::with_dir(dir.path().to_path_buf());

    let insights = store.insights(5).unwrap();

    assert_eq!(insights.runs_analyzed, 4);
    assert_eq!(
        insights.most_common_reason,
        Some(("Max rounds (3) reached.".to_string(), 3))
    );
    assert!(!insights.short_critiques);
    let report = insights.report();
    assert!(report.starts_with("Based on recent review logs"));
    assert!(report.contains("'Max rounds (3) reached.'"));
}

#[test]
fn test_insights_limit_and_short_critiques() {
    let dir = TempDir::new().unwrap();
    let old = run("old", 1, StopReason::Timeout { round: 1 }, &["too short"]);
    let newer = run("new", 8, StopReason::NonActionable { round: 1 }, &[LONG_CRITIQUE]);
    let newest = run("newest", 9, StopReason::NonActionable { round: 1 }, &["meh"]);
    write_jsonl(dir.path(), "run_b.jsonl", &[old, newer, newest]);
    let store = RunStore::with_dir(dir.path().to_path_buf());

    let insights = store.insights(2).unwrap();

    assert_eq!(insights.runs_analyzed, 2);
    assert_eq!(
        insights.most_common_reason.as_ref().map(|(r, n)| (r.as_str(), *n)),
        Some(("Non-actionable critique received in round 1.", 2))
    );
    assert!(insights.short_critiques);
    assert!(insights.report().contains("Some critiques are very short"));
}

// ============================================================
// Archive tests
// ============================================================

fn age(path: &Path, days: u64) {
    let mtime = SystemTime::now() - Duration::from_secs(days * 24 * 60 * 60);
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(mtime)
        .unwrap();
}

#[test]
fn test_archive_moves_only_old_files() {
    let (dir, _) = create_test_logs_dir();
    let archive = TempDir::new().unwrap();
    let old = dir.path().join("run_20260301_100000_aaaaaa.jsonl");
    let fresh = dir.path().join("run_20260303_100000_bbbbbb.jsonl");
    age(&old, 10);

    let store = RunStore::with_dir(dir.path().to_path_buf());
    let archived = store.archive_older_than(7, archive.path()).unwrap();

    assert_eq!(archived.len(), 1);
    assert!(!old.exists());
    assert!(fresh.exists());
    assert!(archived[0].exists());
    assert!(archived[0].starts_with(archive.path()));
    assert_eq!(
        archived[0].file_name().unwrap(),
        "run_20260301_100000_aaaaaa.jsonl"
    );
    // non-log files are never touched
    assert!(dir.path().join("notes.txt").exists());
}

#[test]
fn test_archive_nothing_old_enough() {
    let (dir, _) = create_test_logs_dir();
    let archive = TempDir::new().unwrap();
    let store = RunStore::with_dir(dir.path().to_path_buf());

    let archived = store.archive_older_than(30, archive.path()).unwrap();
    assert!(archived.is_empty());
    assert_eq!(store.list(&RunFilter::default()).unwrap().len(), 3);
}
