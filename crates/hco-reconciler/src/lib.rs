//! C10: Reconciler — compares a "source" manifest (what should have been
//! collected) against a "collected" manifest (what actually was) under
//! configurable tolerances, producing a pass/fail gate report.
//!
//! The engine is pure with respect to any store: it only reads the two
//! manifest byte streams handed to it and, if `!dry_run`, writes a CSV
//! report. `hco-orchestrator` is the only caller that touches a
//! `MetadataStore`, appending a single audit log row after invoking this
//! crate.

use chrono::{DateTime, Utc};
use hco_models::config::ReconcileConfig;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("both manifests produced zero parseable rows")]
    BothManifestsEmpty,
    #[error(transparent)]
    Csv(#[from] csv::Error),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, Error>;

/// One row of a parsed manifest, after tolerant field mapping but before
/// normalization/filtering.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ManifestRecord {
    pub custodian: Option<String>,
    pub kind: Option<String>,
    pub drive_id: Option<String>,
    pub item_id: Option<String>,
    pub path: Option<String>,
    pub size: i64,
    pub sha256: Option<String>,
    pub storage_uri: Option<String>,
    pub collected_utc: Option<DateTime<Utc>>,
    pub last_modified: Option<DateTime<Utc>>,
}

/// The key a record is compared by: `(drive_id, item_id)` when both are
/// present, else the normalized `path`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum RecordKey {
    DriveItem(String, String),
    Path(String),
}

impl std::fmt::Display for RecordKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordKey::DriveItem(drive, item) => write!(f, "{drive}/{item}"),
            RecordKey::Path(path) => write!(f, "{path}"),
        }
    }
}

/// Options for a single reconcile run beyond the tunable tolerances in
/// [`ReconcileConfig`].
#[derive(Debug, Clone, Default)]
pub struct ReconcileOptions {
    pub job_id: String,
    pub custodian: Option<String>,
    pub reports_dir: Option<String>,
    pub dry_run: bool,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct Counts {
    pub source_count: usize,
    pub collected_count: usize,
    pub missed_count: usize,
    pub extras_count: usize,
    pub hash_mismatch_count: usize,
    pub expected_skips_count: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ByteTotals {
    pub source_bytes: i64,
    pub collected_bytes: i64,
    pub size_delta_bytes: i64,
    pub size_delta_pct: f64,
    pub extras_pct: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct HashMismatch {
    pub key: RecordKey,
    pub source_sha256: String,
    pub collected_sha256: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ReconcileReport {
    pub overall_passed: bool,
    pub cardinality_passed: bool,
    pub extras_passed: bool,
    pub size_passed: bool,
    pub hash_passed: bool,
    pub counts: Counts,
    pub byte_totals: ByteTotals,
    pub missed: Vec<RecordKey>,
    pub extras: Vec<RecordKey>,
    pub hash_mismatches: Vec<HashMismatch>,
    pub report_path: Option<String>,
}

/// Parses a manifest byte stream, accepting JSON-array, JSON-lines, and
/// CSV with flexible column mapping. A row that
/// fails to parse emits a WARN and is dropped rather than aborting the
/// whole manifest.
pub fn parse_manifest(bytes: &[u8]) -> Vec<ManifestRecord> {
    let text = String::from_utf8_lossy(bytes);
    let trimmed = text.trim_start();

    if trimmed.starts_with('[') {
        parse_json_array(trimmed)
    } else if looks_like_jsonl(trimmed) {
        parse_jsonl(trimmed)
    } else {
        parse_csv(bytes)
    }
}

fn looks_like_jsonl(text: &str) -> bool {
    text.lines()
        .find(|l| !l.trim().is_empty())
        .map(|l| l.trim_start().starts_with('{'))
        .unwrap_or(false)
}

fn parse_json_array(text: &str) -> Vec<ManifestRecord> {
    match serde_json::from_str::<Vec<serde_json::Value>>(text) {
        Ok(values) => values.iter().filter_map(record_from_json).collect(),
        Err(err) => {
            tracing::warn!(error = %err, "failed to parse manifest as a JSON array");
            Vec::new()
        }
    }
}

fn parse_jsonl(text: &str) -> Vec<ManifestRecord> {
    let mut records = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        match serde_json::from_str::<serde_json::Value>(line) {
            Ok(value) => {
                if let Some(record) = record_from_json(&value) {
                    records.push(record);
                } else {
                    tracing::warn!(line = lineno + 1, "manifest row missing Path, dropped");
                }
            }
            Err(err) => {
                tracing::warn!(line = lineno + 1, error = %err, "failed to parse manifest line");
            }
        }
    }
    records
}

fn parse_csv(bytes: &[u8]) -> Vec<ManifestRecord> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(bytes);
    let headers = match reader.headers() {
        Ok(h) => h.clone(),
        Err(err) => {
            tracing::warn!(error = %err, "failed to read manifest CSV headers");
            return Vec::new();
        }
    };

    let mut records = Vec::new();
    for (rowno, result) in reader.records().enumerate() {
        let row = match result {
            Ok(row) => row,
            Err(err) => {
                tracing::warn!(row = rowno + 1, error = %err, "failed to parse manifest CSV row");
                continue;
            }
        };
        let mut fields: HashMap<String, String> = HashMap::new();
        for (header, value) in headers.iter().zip(row.iter()) {
            fields.insert(header.to_ascii_lowercase(), value.to_string());
        }
        match record_from_fields(&fields) {
            Some(record) => records.push(record),
            None => tracing::warn!(row = rowno + 1, "manifest row missing Path, dropped"),
        }
    }
    records
}

fn record_from_json(value: &serde_json::Value) -> Option<ManifestRecord> {
    let obj = value.as_object()?;
    let mut fields: HashMap<String, String> = HashMap::new();
    for (k, v) in obj {
        let s = match v {
            serde_json::Value::String(s) => s.clone(),
            serde_json::Value::Null => continue,
            other => other.to_string().trim_matches('"').to_string(),
        };
        fields.insert(k.to_ascii_lowercase(), s);
    }
    record_from_fields(&fields)
}

/// Header variants accepted case-insensitively, order-free.
fn lookup<'a>(fields: &'a HashMap<String, String>, names: &[&str]) -> Option<&'a str> {
    for name in names {
        if let Some(v) = fields.get(*name) {
            if !v.is_empty() {
                return Some(v.as_str());
            }
        }
    }
    None
}

fn record_from_fields(fields: &HashMap<String, String>) -> Option<ManifestRecord> {
    let path = lookup(fields, &["path", "filepath", "file_path"])?;

    let size = lookup(fields, &["size", "filesize", "file_size"])
        .and_then(|s| s.parse::<i64>().ok())
        .unwrap_or(0);

    Some(ManifestRecord {
        custodian: lookup(fields, &["custodian"]).map(str::to_string),
        kind: lookup(fields, &["kind"]).map(str::to_string),
        drive_id: lookup(fields, &["driveid", "drive_id"]).map(str::to_string),
        item_id: lookup(fields, &["itemid", "item_id", "id"]).map(str::to_string),
        path: Some(path.to_string()),
        size,
        sha256: lookup(fields, &["sha256", "hash"]).map(str::to_string),
        storage_uri: lookup(fields, &["storageuri"]).map(str::to_string),
        collected_utc: lookup(fields, &["collectedutc"]).and_then(parse_timestamp),
        last_modified: lookup(fields, &["lastmodified", "modified"]).and_then(parse_timestamp),
    })
}

fn parse_timestamp(s: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}

fn is_system_path(path: &str) -> bool {
    let lower = path.to_ascii_lowercase();
    ["recoverableitems", "versions", "recyclebin"]
        .iter()
        .any(|needle| lower.contains(needle))
}

fn is_folder(record: &ManifestRecord) -> bool {
    record
        .kind
        .as_deref()
        .map(|k| k.eq_ignore_ascii_case("folder"))
        .unwrap_or(false)
        || record.path.as_deref().map(|p| p.ends_with('/')).unwrap_or(false)
}

fn normalize_path(path: &str, normalize: bool) -> String {
    if !normalize {
        return path.to_string();
    }
    let collapsed = path.to_ascii_lowercase().replace('\\', "/");
    collapsed.trim_end_matches('/').to_string()
}

/// Normalizes, filters, and keys the records of one manifest, applied identically to both the source and collected sides
/// so the comparison is symmetric under swap.
fn prepare(
    records: Vec<ManifestRecord>,
    custodian: Option<&str>,
    config: &ReconcileConfig,
) -> HashMap<RecordKey, ManifestRecord> {
    let mut out = HashMap::new();
    for mut record in records {
        let Some(path) = record.path.clone() else {
            continue;
        };
        if is_system_path(&path) {
            continue;
        }
        if is_folder(&record) && !config.include_folders {
            continue;
        }
        if let Some(wanted) = custodian {
            let matches = record
                .custodian
                .as_deref()
                .map(|c| c.eq_ignore_ascii_case(wanted))
                .unwrap_or(false);
            if !matches {
                continue;
            }
        }

        let normalized_path = normalize_path(&path, config.normalize_paths);
        record.path = Some(normalized_path.clone());

        let key = match (&record.drive_id, &record.item_id) {
            (Some(drive), Some(item)) if !drive.is_empty() && !item.is_empty() => {
                RecordKey::DriveItem(drive.clone(), item.clone())
            }
            _ => RecordKey::Path(normalized_path),
        };
        out.insert(key, record);
    }
    out
}

/// Runs the full reconciliation algorithm over two already
/// loaded byte streams, returning gate results and (unless `dry_run`) a
/// written CSV report.
#[tracing::instrument(skip(source_bytes, collected_bytes, config), fields(job_id = %options.job_id))]
pub fn reconcile(
    source_bytes: &[u8],
    collected_bytes: &[u8],
    config: &ReconcileConfig,
    options: &ReconcileOptions,
) -> Result<ReconcileReport> {
    let source_records = parse_manifest(source_bytes);
    let collected_records = parse_manifest(collected_bytes);

    if source_records.is_empty() && collected_records.is_empty() {
        return Err(Error::BothManifestsEmpty);
    }

    let source = prepare(source_records, options.custodian.as_deref(), config);
    let collected = prepare(collected_records, options.custodian.as_deref(), config);

    let source_keys: HashSet<&RecordKey> = source.keys().collect();
    let collected_keys: HashSet<&RecordKey> = collected.keys().collect();

    let mut missed: Vec<RecordKey> = source_keys
        .difference(&collected_keys)
        .map(|k| (*k).clone())
        .collect();
    missed.sort();

    let mut extras: Vec<RecordKey> = collected_keys
        .difference(&source_keys)
        .map(|k| (*k).clone())
        .collect();
    extras.sort();

    let mut hash_mismatches = Vec::new();
    if config.require_hash_match {
        let mut common: Vec<&RecordKey> = source_keys.intersection(&collected_keys).copied().collect();
        common.sort();
        for key in common {
            let s = &source[key];
            let c = &collected[key];
            if let (Some(sh), Some(ch)) = (&s.sha256, &c.sha256) {
                if !sh.eq_ignore_ascii_case(ch) {
                    hash_mismatches.push(HashMismatch {
                        key: key.clone(),
                        source_sha256: sh.clone(),
                        collected_sha256: ch.clone(),
                    });
                }
            }
        }
    }

    let source_bytes_total: i64 = source.values().map(|r| r.size).sum();
    let collected_bytes_total: i64 = collected.values().map(|r| r.size).sum();
    let size_delta_bytes = collected_bytes_total - source_bytes_total;
    let size_delta_pct =
        (size_delta_bytes.unsigned_abs() as f64 / source_bytes_total.max(1) as f64) * 100.0;
    let extras_pct = (extras.len() as f64 / source.len().max(1) as f64) * 100.0;

    let cardinality_passed = missed.is_empty();
    let extras_passed = extras_pct <= config.extra_tolerance_pct;
    let size_passed = size_delta_pct <= config.size_tolerance_pct;
    let hash_passed = !config.require_hash_match || hash_mismatches.is_empty();
    let overall_passed = cardinality_passed && extras_passed && size_passed && hash_passed;

    let counts = Counts {
        source_count: source.len(),
        collected_count: collected.len(),
        missed_count: missed.len(),
        extras_count: extras.len(),
        hash_mismatch_count: hash_mismatches.len(),
        expected_skips_count: 0,
    };
    let byte_totals = ByteTotals {
        source_bytes: source_bytes_total,
        collected_bytes: collected_bytes_total,
        size_delta_bytes,
        size_delta_pct,
        extras_pct,
    };

    let report_path = if !options.dry_run {
        let dir = options.reports_dir.as_deref().unwrap_or(".");
        let path = format!("{dir}/recon_report_{}.csv", options.job_id);
        write_report_csv(&path, &missed, &extras, &hash_mismatches, &counts, &byte_totals)?;
        Some(path)
    } else {
        None
    };

    Ok(ReconcileReport {
        overall_passed,
        cardinality_passed,
        extras_passed,
        size_passed,
        hash_passed,
        counts,
        byte_totals,
        missed,
        extras,
        hash_mismatches,
        report_path,
    })
}

/// Writes the `Missed, Extras, HashMismatches, ExpectedSkips, Summary`
/// sectioned CSV report.
fn write_report_csv(
    path: &str,
    missed: &[RecordKey],
    extras: &[RecordKey],
    hash_mismatches: &[HashMismatch],
    counts: &Counts,
    byte_totals: &ByteTotals,
) -> Result<()> {
    if let Some(parent) = std::path::Path::new(path).parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)?;
        }
    }
    let mut writer = csv::WriterBuilder::new().from_path(path)?;

    writer.write_record(["Section", "Key"])?;
    for key in missed {
        writer.write_record(["Missed", &key.to_string()])?;
    }
    for key in extras {
        writer.write_record(["Extras", &key.to_string()])?;
    }
    for mismatch in hash_mismatches {
        writer.write_record([
            "HashMismatches",
            &format!(
                "{} source={} collected={}",
                mismatch.key, mismatch.source_sha256, mismatch.collected_sha256
            ),
        ])?;
    }
    writer.write_record(["ExpectedSkips", ""])?;
    writer.write_record(["Summary", &format!("source_count={}", counts.source_count)])?;
    writer.write_record(["Summary", &format!("collected_count={}", counts.collected_count)])?;
    writer.write_record(["Summary", &format!("missed_count={}", counts.missed_count)])?;
    writer.write_record(["Summary", &format!("extras_count={}", counts.extras_count)])?;
    writer.write_record([
        "Summary",
        &format!("hash_mismatch_count={}", counts.hash_mismatch_count),
    ])?;
    writer.write_record([
        "Summary",
        &format!("size_delta_bytes={}", byte_totals.size_delta_bytes),
    ])?;
    writer.write_record([
        "Summary",
        &format!("size_delta_pct={:.2}", byte_totals.size_delta_pct),
    ])?;
    writer.flush()?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config() -> ReconcileConfig {
        ReconcileConfig::default()
    }

    fn csv_bytes(rows: &[&str]) -> Vec<u8> {
        let mut out =
            "Custodian,Kind,DriveId,ItemId,Path,Size,SHA256,StorageUri,CollectedUtc\n".to_string();
        for row in rows {
            out.push_str(row);
            out.push('\n');
        }
        out.into_bytes()
    }

    #[test]
    fn s6_reconcile_pass_within_tolerance() {
        let mut source_rows = Vec::new();
        let mut collected_rows = Vec::new();
        for i in 0..1000 {
            source_rows.push(format!(
                "a@x.com,File,,item-{i},/docs/item-{i}.txt,1000,{:064},,2024-01-01T00:00:00Z",
                i
            ));
        }
        for i in 0..1000 {
            // 999,000 total bytes instead of 1,000,000 (999 bytes/item).
            collected_rows.push(format!(
                "a@x.com,File,,item-{i},/docs/item-{i}.txt,999,{:064},,2024-01-01T00:00:00Z",
                i
            ));
        }
        let source = csv_bytes(
            &source_rows.iter().map(|s| s.as_str()).collect::<Vec<_>>(),
        );
        let collected = csv_bytes(
            &collected_rows
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>(),
        );

        let report = reconcile(
            &source,
            &collected,
            &config(),
            &ReconcileOptions {
                job_id: "job-1".to_string(),
                dry_run: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert!(report.cardinality_passed);
        assert!(report.extras_passed);
        assert!(report.size_passed);
        assert!(report.overall_passed);
    }

    #[test]
    fn s7_reconcile_fail_missing_items() {
        let mut source_rows = Vec::new();
        let mut collected_rows = Vec::new();
        for i in 0..1000 {
            source_rows.push(format!(
                "a@x.com,File,,item-{i},/docs/item-{i}.txt,1000,{:064},,2024-01-01T00:00:00Z",
                i
            ));
            if i >= 5 {
                collected_rows.push(format!(
                    "a@x.com,File,,item-{i},/docs/item-{i}.txt,1000,{:064},,2024-01-01T00:00:00Z",
                    i
                ));
            }
        }
        let source = csv_bytes(&source_rows.iter().map(|s| s.as_str()).collect::<Vec<_>>());
        let collected = csv_bytes(
            &collected_rows
                .iter()
                .map(|s| s.as_str())
                .collect::<Vec<_>>(),
        );

        let dir = tempfile::tempdir().unwrap();
        let report = reconcile(
            &source,
            &collected,
            &config(),
            &ReconcileOptions {
                job_id: "job-2".to_string(),
                dry_run: false,
                reports_dir: Some(dir.path().to_string_lossy().to_string()),
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(report.counts.missed_count, 5);
        assert!(!report.cardinality_passed);
        assert!(!report.overall_passed);
        let report_path = report.report_path.unwrap();
        let contents = std::fs::read_to_string(&report_path).unwrap();
        assert_eq!(contents.matches("Missed").count(), 5);
        assert!(contents.contains("Summary"));
    }

    #[test]
    fn symmetry_under_swap() {
        let source = csv_bytes(&[
            "a@x.com,File,,i1,/a.txt,100,,,",
            "a@x.com,File,,i2,/b.txt,200,,,",
        ]);
        let collected = csv_bytes(&[
            "a@x.com,File,,i2,/b.txt,250,,,",
            "a@x.com,File,,i3,/c.txt,50,,,",
        ]);

        let forward = reconcile(
            &source,
            &collected,
            &config(),
            &ReconcileOptions {
                job_id: "job-3".to_string(),
                dry_run: true,
                ..Default::default()
            },
        )
        .unwrap();
        let backward = reconcile(
            &collected,
            &source,
            &config(),
            &ReconcileOptions {
                job_id: "job-3".to_string(),
                dry_run: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(forward.missed, backward.extras);
        assert_eq!(forward.extras, backward.missed);
        assert_eq!(
            forward.byte_totals.size_delta_bytes,
            -backward.byte_totals.size_delta_bytes
        );
    }

    #[test]
    fn system_paths_and_folders_are_filtered() {
        let source = csv_bytes(&[
            "a@x.com,File,,i1,/Inbox/RecoverableItems/deleted.eml,100,,,",
            "a@x.com,Folder,,i2,/Inbox/,0,,,",
            "a@x.com,File,,i3,/Inbox/keep.eml,100,,,",
        ]);
        let collected = csv_bytes(&["a@x.com,File,,i3,/Inbox/keep.eml,100,,,"]);

        let report = reconcile(
            &source,
            &collected,
            &config(),
            &ReconcileOptions {
                job_id: "job-4".to_string(),
                dry_run: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(report.counts.source_count, 1);
        assert!(report.overall_passed);
    }

    #[test]
    fn both_manifests_empty_is_an_error() {
        let err = reconcile(
            b"Custodian,Kind,DriveId,ItemId,Path,Size,SHA256,StorageUri,CollectedUtc\n",
            b"Custodian,Kind,DriveId,ItemId,Path,Size,SHA256,StorageUri,CollectedUtc\n",
            &config(),
            &ReconcileOptions::default(),
        )
        .unwrap_err();
        assert!(matches!(err, Error::BothManifestsEmpty));
    }

    #[test]
    fn hash_mismatch_detected_when_required() {
        let mut cfg = config();
        cfg.require_hash_match = true;
        let source = csv_bytes(&["a@x.com,File,,i1,/a.txt,100,aaaa,,"]);
        let collected = csv_bytes(&["a@x.com,File,,i1,/a.txt,100,bbbb,,"]);

        let report = reconcile(
            &source,
            &collected,
            &cfg,
            &ReconcileOptions {
                job_id: "job-5".to_string(),
                dry_run: true,
                ..Default::default()
            },
        )
        .unwrap();

        assert_eq!(report.counts.hash_mismatch_count, 1);
        assert!(!report.hash_passed);
        assert!(!report.overall_passed);
    }

    #[test]
    fn json_array_manifest_parses() {
        let source = serde_json::json!([
            {"Custodian": "a@x.com", "Path": "/a.txt", "Size": 100, "ItemId": "i1"},
        ]);
        let records = parse_manifest(serde_json::to_vec(&source).unwrap().as_slice());
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].path.as_deref(), Some("/a.txt"));
        assert_eq!(records[0].size, 100);
    }

    #[test]
    fn jsonl_manifest_parses() {
        let bytes = b"{\"Path\": \"/a.txt\", \"Size\": 10}\n{\"Path\": \"/b.txt\", \"Size\": 20}\n";
        let records = parse_manifest(bytes);
        assert_eq!(records.len(), 2);
    }

    #[test]
    fn row_without_path_is_dropped() {
        let bytes = b"Custodian,Size\na@x.com,100\n";
        let records = parse_manifest(bytes);
        assert!(records.is_empty());
    }
}
