//! Integration tests for keyscope
//!
//! Live deployments are not needed: snapshots are JSON-lines files in a temp
//! directory, and deletes run against an in-memory key space.

use chrono::{Duration, Local, Utc};
use keyscope::analysis::flame::{FlameAggregator, OTHERS};
use keyscope::analysis::prefix::PrefixTree;
use keyscope::analysis::topk::TopKSelector;
use keyscope::analysis::{ingest, ingest_sources, KeySplitter};
use keyscope::config::{AnalysisArgs, AnalysisConfig, LiveArgs, SourceSpec};
use keyscope::error::{ConfigError, LiveResult, ScopeError};
use keyscope::filter::{ExpirationMode, FilterPipeline};
use keyscope::live::{
    guarded_delete, BatchMutator, DeleteOutcome, DeletePlan, KeySpace, ScanCursor, ScanPage,
};
use keyscope::record::{KeyRecord, KeyType};
use keyscope::report::{
    create_report, create_work_dir, write_bigkey_csv, write_prefix_csv, JsonLinesWriter,
};
use keyscope::source::{open_sources, JsonLinesSource};
use std::collections::BTreeSet;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use tempfile::tempdir;

fn write_snapshot(dir: &Path, name: &str, records: &[KeyRecord]) -> PathBuf {
    let path = dir.join(name);
    let mut file = fs::File::create(&path).unwrap();
    for r in records {
        writeln!(file, "{}", serde_json::to_string(r).unwrap()).unwrap();
    }
    path
}

fn sample_records() -> Vec<KeyRecord> {
    let soon = Utc::now() + Duration::hours(1);
    vec![
        KeyRecord::new(0, "user:1:profile", KeyType::Hash, 400).with_elements(8),
        KeyRecord::new(0, "user:2:profile", KeyType::Hash, 600).with_elements(12),
        KeyRecord::new(0, "session:abc", KeyType::String, 50).with_expiration(soon),
        KeyRecord::new(1, "queue:jobs", KeyType::List, 2000).with_elements(300),
        KeyRecord::new(0, "plain", KeyType::String, 10),
    ]
}

fn analysis_args(data_dir: &Path) -> AnalysisArgs {
    AnalysisArgs {
        data_dir: data_dir.to_path_buf(),
        live: LiveArgs {
            timeout: 10,
            ..Default::default()
        },
        ..Default::default()
    }
}

#[test]
fn test_snapshot_to_bigkey_report() {
    let dir = tempdir().unwrap();
    let path = write_snapshot(dir.path(), "dump.jsonl", &sample_records());

    let mut top = TopKSelector::new(2).unwrap();
    let source = JsonLinesSource::open(&path).unwrap();
    let stats = ingest(source, &FilterPipeline::new(), &mut [&mut top]).unwrap();
    assert_eq!(stats.records, 5);
    assert_eq!(stats.bytes, 3060);

    let work_dir = create_work_dir(dir.path(), Local::now()).unwrap();
    let file = create_report(&work_dir, "bigkey.csv").unwrap();
    write_bigkey_csv(file, &top.into_sorted_vec()).unwrap();

    let text = fs::read_to_string(work_dir.join("bigkey.csv")).unwrap();
    let lines: Vec<&str> = text.lines().collect();
    assert_eq!(lines.len(), 3);
    assert!(lines[1].starts_with("1,queue:jobs,list,2000,"));
    assert!(lines[2].starts_with("0,user:2:profile,hash,600,"));
}

#[test]
fn test_multiple_snapshots_share_accumulators() {
    let dir = tempdir().unwrap();
    let records = sample_records();
    let first = write_snapshot(dir.path(), "a.jsonl", &records[..2]);
    let second = write_snapshot(dir.path(), "b.jsonl", &records[2..]);

    let spec = format!("{},{}", first.display(), second.display());
    let config = AnalysisConfig::from_args(&spec, &analysis_args(dir.path()), true).unwrap();
    assert!(matches!(&config.source, SourceSpec::Files(files) if files.len() == 2));

    let filters = config.filters().unwrap();
    let mut tree = PrefixTree::default();
    let run = ingest_sources(open_sources(&config).unwrap(), false, |source| {
        Ok(ingest(source, &filters, &mut [&mut tree])?)
    })
    .unwrap();

    assert_eq!(run.sources.len(), 2);
    assert_eq!(run.records(), 5);
    let user = tree.get(0, &["user"]).unwrap();
    assert_eq!(user.aggregated_size(), 1000);
    assert_eq!(user.key_count(), 2);

    let top = tree.top_prefixes(2, Some(1)).unwrap();
    assert_eq!(top[0].prefix, "queue");
    assert_eq!(top[1].prefix, "user");

    let out = write_prefix_csv(Vec::new(), &top).unwrap();
    assert!(String::from_utf8(out).unwrap().contains("0,user,1000,"));
}

#[test]
fn test_filters_apply_across_pipeline() {
    let dir = tempdir().unwrap();
    let path = write_snapshot(dir.path(), "dump.jsonl", &sample_records());

    let filters =
        FilterPipeline::from_options(Some("^(user|session):"), Some(ExpirationMode::Persistent))
            .unwrap();
    let mut top = TopKSelector::new(10).unwrap();
    ingest(JsonLinesSource::open(&path).unwrap(), &filters, &mut [&mut top]).unwrap();

    let keys: BTreeSet<String> = top.into_sorted_vec().into_iter().map(|r| r.key).collect();
    assert_eq!(keys, BTreeSet::from(["user:1:profile".to_string(), "user:2:profile".to_string()]));
    assert_eq!(filters.stats().rejected, 3);
}

#[test]
fn test_keep_going_skips_malformed_snapshot() {
    let dir = tempdir().unwrap();
    let good = write_snapshot(dir.path(), "good.jsonl", &sample_records()[..1]);
    let bad = dir.path().join("bad.jsonl");
    fs::write(
        &bad,
        "{\"db\":0,\"key\":\"first\",\"type\":\"string\",\"size\":7}\nnot json\n",
    )
    .unwrap();

    let spec = format!("{},{}", bad.display(), good.display());
    let mut args = analysis_args(dir.path());
    args.keep_going = true;
    let config = AnalysisConfig::from_args(&spec, &args, true).unwrap();
    let filters = config.filters().unwrap();

    let mut top = TopKSelector::new(10).unwrap();
    let run = ingest_sources(open_sources(&config).unwrap(), config.keep_going, |source| {
        Ok(ingest(source, &filters, &mut [&mut top])?)
    })
    .unwrap();

    assert_eq!(run.failed.len(), 1);
    assert!(run.failed[0].1.contains("line 2"));
    // The record before the bad line is kept
    assert_eq!(top.len(), 2);

    let mut top = TopKSelector::<KeyRecord>::new(10).unwrap();
    let result = ingest_sources(open_sources(&config).unwrap(), false, |source| {
        Ok(ingest(source, &filters, &mut [&mut top])?)
    });
    assert!(matches!(result, Err(ScopeError::Decode(_))));
}

#[test]
fn test_flame_graph_from_snapshot() {
    let dir = tempdir().unwrap();
    let mut records = sample_records();
    for i in 0..20 {
        records.push(KeyRecord::new(0, format!("tmp_{i}"), KeyType::String, 1));
    }
    let path = write_snapshot(dir.path(), "dump.jsonl", &records);

    let splitter = KeySplitter::new(vec![":".into(), "_".into()]).unwrap();
    let mut flame = FlameAggregator::new(splitter);
    let source = JsonLinesSource::open(&path).unwrap();
    ingest(source, &FilterPipeline::new(), &mut [&mut flame]).unwrap();

    let tree = flame.into_tree(100, 10);
    assert_eq!(tree.value, 3080);
    assert_eq!(tree.value, tree.children_value());
    let tmp = tree.child("db:0").and_then(|db| db.child("tmp")).unwrap();
    assert_eq!(tmp.value, 20);
    assert_eq!(tmp.child(OTHERS).map(|n| n.value), Some(20));
}

#[test]
fn test_export_round_trips_through_jsonl_source() {
    let dir = tempdir().unwrap();
    let path = write_snapshot(dir.path(), "dump.jsonl", &sample_records());

    let filters = FilterPipeline::from_options(None, Some(ExpirationMode::Volatile)).unwrap();
    let export_path = dir.path().join("export.jsonl");
    let mut writer = JsonLinesWriter::new(fs::File::create(&export_path).unwrap());
    ingest(JsonLinesSource::open(&path).unwrap(), &filters, &mut [&mut writer]).unwrap();
    assert_eq!(writer.rows(), 1);
    writer.finish().unwrap();

    let back: Vec<KeyRecord> = JsonLinesSource::open(&export_path)
        .unwrap()
        .map(Result::unwrap)
        .collect();
    assert_eq!(back.len(), 1);
    assert_eq!(back[0].key, "session:abc");
    assert!(back[0].expiration.is_some());
}

/// In-memory key space with fixed scan pages
struct MemoryKeySpace {
    pages: Vec<Vec<String>>,
    keys: BTreeSet<String>,
    batches: Vec<usize>,
}

impl MemoryKeySpace {
    fn new(pages: &[&[&str]]) -> Self {
        let pages: Vec<Vec<String>> = pages
            .iter()
            .map(|p| p.iter().map(|k| k.to_string()).collect())
            .collect();
        let keys = pages.iter().flatten().cloned().collect();
        Self {
            pages,
            keys,
            batches: Vec::new(),
        }
    }
}

impl KeySpace for MemoryKeySpace {
    fn name(&self) -> String {
        "memory:6379/0".into()
    }

    fn scan(
        &mut self,
        cursor: ScanCursor,
        pattern: &str,
        _page_hint: usize,
    ) -> LiveResult<ScanPage> {
        let prefix = pattern.trim_end_matches('*');
        let idx = cursor.position as usize;
        Ok(ScanPage {
            keys: self.pages[idx]
                .iter()
                .filter(|k| k.starts_with(prefix))
                .cloned()
                .collect(),
            next: (idx + 1 < self.pages.len()).then_some(ScanCursor {
                node: 0,
                position: idx as u64 + 1,
            }),
        })
    }

    fn delete(&mut self, keys: &[String]) -> LiveResult<Vec<u64>> {
        self.batches.push(keys.len());
        Ok(keys.iter().map(|k| u64::from(self.keys.remove(k))).collect())
    }
}

#[test]
fn test_scan_then_guarded_delete() {
    let mut space = MemoryKeySpace::new(&[
        &["temp:1", "keep:1", "temp:2"],
        &["temp:3", "temp:4"],
        &["keep:2", "temp:5"],
    ]);

    let listed = BatchMutator::new(&mut space).scan_keys("temp:*", 10, None).unwrap();
    assert_eq!(listed.len(), 5);

    let plan = DeletePlan::new("temp:*", 2).unwrap();
    let mut prompt = Vec::new();
    let mut reports = Vec::new();
    let outcome = guarded_delete(
        &plan,
        "redis://memory:6379/0",
        Cursor::new("DELETE\n"),
        &mut prompt,
        || Ok(&mut space),
        |report| reports.push(report.keys),
    )
    .unwrap();

    match outcome {
        DeleteOutcome::Completed(summary) => {
            assert_eq!(summary.total_scanned, 5);
            assert_eq!(summary.total_deleted, 5);
        }
        DeleteOutcome::Aborted => panic!("confirmation was given"),
    }
    assert!(reports.iter().all(|keys| *keys <= 2));
    assert_eq!(reports.iter().sum::<usize>(), 5);
    assert_eq!(space.keys, BTreeSet::from(["keep:1".to_string(), "keep:2".to_string()]));
}

#[test]
fn test_unsafe_delete_rejected_before_connecting() {
    assert!(matches!(
        DeletePlan::new("*", 100),
        Err(ConfigError::UnsafeDeletePattern { .. })
    ));
    assert!(matches!(
        DeletePlan::new("  ", 100),
        Err(ConfigError::UnsafeDeletePattern { .. })
    ));
    assert!(matches!(
        DeletePlan::new("**", 100),
        Err(ConfigError::UnsafeDeletePattern { .. })
    ));

    let plan = DeletePlan::new("temp:*", 100).unwrap();
    let outcome = guarded_delete::<MemoryKeySpace, _, _, _, _>(
        &plan,
        "redis://memory:6379/0",
        Cursor::new("yes\n"),
        Vec::new(),
        || panic!("must not connect without confirmation"),
        |_| {},
    )
    .unwrap();
    assert_eq!(outcome, DeleteOutcome::Aborted);
}
