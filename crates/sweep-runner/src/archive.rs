//! Sorting result reports into `results/<source_dataset>/` by the
//! configuration embedded in each report.

use crate::error::ReportError;
use regex::Regex;
use std::collections::HashSet;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use sweep_core::{ensure_dir, sanitize_file_name, ClassificationKey, Configuration};
use tracing::{info, warn};

pub const DEFAULT_REPORT_EXTENSION: &str = "md";
pub const RESULTS_DIR: &str = "results";

#[derive(Debug, Clone)]
pub struct ArchiveOptions {
    /// Extension of report files, without the dot.
    pub extension: String,
    /// Compute destinations without touching any file.
    pub dry_run: bool,
}

impl Default for ArchiveOptions {
    fn default() -> Self {
        ArchiveOptions {
            extension: DEFAULT_REPORT_EXTENSION.to_string(),
            dry_run: false,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ArchivedReport {
    pub source: PathBuf,
    pub destination: PathBuf,
    pub key: ClassificationKey,
}

#[derive(Debug, Clone)]
pub struct SkippedReport {
    pub path: PathBuf,
    pub reason: String,
}

#[derive(Debug, Clone, Default)]
pub struct ArchiveSummary {
    pub archived: Vec<ArchivedReport>,
    /// No usable configuration; left in place.
    pub unclassified: Vec<SkippedReport>,
    /// Classified but could not be read or moved; left in place.
    pub failed: Vec<SkippedReport>,
    pub dry_run: bool,
}

impl ArchiveSummary {
    pub fn archived_count(&self) -> usize {
        self.archived.len()
    }
}

fn snapshot_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"(?s)```json\r?\n(.*?)\r?\n```").expect("snapshot pattern"))
}

/// Body of the first ```` ```json ```` fenced block in a report.
pub fn extract_snapshot(text: &str) -> Option<&str> {
    snapshot_pattern()
        .captures(text)
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str())
}

pub fn classify_text(text: &str) -> Result<(Configuration, ClassificationKey), ReportError> {
    let snapshot = extract_snapshot(text).ok_or(ReportError::NoSnapshot)?;
    let config = Configuration::from_json_str(snapshot)?;
    let key = ClassificationKey::from_configuration(&config)?;
    Ok((config, key))
}

pub fn classify_report(path: &Path) -> Result<ClassificationKey, ReportError> {
    let text = String::from_utf8(fs::read(path)?).map_err(|_| ReportError::NotUtf8)?;
    classify_text(&text).map(|(_, key)| key)
}

/// Directory a report with `key` is filed under, below `root`.
pub fn archive_dir(root: &Path, key: &ClassificationKey) -> PathBuf {
    root.join(RESULTS_DIR)
        .join(sanitize_file_name(&key.source_dataset))
}

/// `stem.ext` for `n == 0`, otherwise `stem_n.ext`.
pub fn candidate_name(stem: &str, n: usize, extension: &str) -> String {
    if n == 0 {
        format!("{}.{}", stem, extension)
    } else {
        format!("{}_{}.{}", stem, n, extension)
    }
}

/// Claims the first free `stem[_n].ext` in `dir` by creating it
/// exclusively, so an existing entry is never reused.
pub fn claim_destination(dir: &Path, stem: &str, extension: &str) -> io::Result<PathBuf> {
    let mut n = 0usize;
    loop {
        let candidate = dir.join(candidate_name(stem, n, extension));
        match fs::OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&candidate)
        {
            Ok(_) => return Ok(candidate),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => n += 1,
            Err(e) => return Err(e),
        }
    }
}

/// Moves `source` onto the already claimed `destination`.
///
/// A rename is tried first. If it fails (e.g. across devices) the content
/// is copied, synced and length-checked, and only then is the source
/// removed. On any failure the claimed file is released and the source is
/// left where it was.
pub fn relocate(source: &Path, destination: &Path) -> io::Result<()> {
    if fs::rename(source, destination).is_ok() {
        return Ok(());
    }
    copy_then_remove(source, destination, |p| fs::remove_file(p))
}

/// Fallback of [`relocate`]: copy and verify, then `remove_source`. Any
/// failure, including a failed removal, releases `destination`.
pub(crate) fn copy_then_remove<F>(source: &Path, destination: &Path, remove_source: F) -> io::Result<()>
where
    F: FnOnce(&Path) -> io::Result<()>,
{
    let moved = copy_verified(source, destination).and_then(|()| remove_source(source));
    if let Err(e) = moved {
        let _ = fs::remove_file(destination);
        return Err(e);
    }
    Ok(())
}

fn copy_verified(source: &Path, destination: &Path) -> io::Result<()> {
    let expected = fs::metadata(source)?.len();
    fs::copy(source, destination)?;
    let file = fs::OpenOptions::new().write(true).open(destination)?;
    file.sync_all()?;
    check_copy_length(source, file.metadata()?.len(), expected)
}

fn check_copy_length(source: &Path, actual: u64, expected: u64) -> io::Result<()> {
    if actual != expected {
        return Err(io::Error::new(
            io::ErrorKind::Other,
            format!(
                "copy of {} is {} bytes, expected {}",
                source.display(),
                actual,
                expected
            ),
        ));
    }
    Ok(())
}

/// Report files directly inside `dir`, in file name order.
pub fn report_candidates(dir: &Path, extension: &str) -> io::Result<Vec<PathBuf>> {
    let mut out = Vec::new();
    let walker = walkdir::WalkDir::new(dir)
        .min_depth(1)
        .max_depth(1)
        .sort_by_file_name();
    for entry in walker {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let matches = entry
            .path()
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e == extension)
            .unwrap_or(false);
        if matches {
            out.push(entry.into_path());
        }
    }
    Ok(out)
}

/// Classifies every report in `dir` and files it under
/// `dir/results/<source_dataset>/`. A report that cannot be classified or
/// moved is recorded and skipped; only an unreadable `dir` fails the run.
pub fn archive_reports(dir: &Path, options: &ArchiveOptions) -> io::Result<ArchiveSummary> {
    let candidates = report_candidates(dir, &options.extension)?;
    let mut summary = ArchiveSummary {
        dry_run: options.dry_run,
        ..ArchiveSummary::default()
    };
    let mut planned: HashSet<PathBuf> = HashSet::new();

    for path in candidates {
        let key = match classify_report(&path) {
            Ok(key) => key,
            Err(ReportError::Io(e)) => {
                warn!(path = %path.display(), error = %e, "could not read report");
                summary.failed.push(SkippedReport {
                    path,
                    reason: e.to_string(),
                });
                continue;
            }
            Err(e) => {
                warn!(path = %path.display(), reason = %e, "report left unclassified");
                summary.unclassified.push(SkippedReport {
                    path,
                    reason: e.to_string(),
                });
                continue;
            }
        };

        let target_dir = archive_dir(dir, &key);
        let stem = key.file_stem();
        let placed = if options.dry_run {
            Ok(plan_destination(&target_dir, &stem, &options.extension, &mut planned))
        } else {
            place_report(&path, &target_dir, &stem, &options.extension)
        };
        match placed {
            Ok(destination) => {
                info!(
                    from = %path.display(),
                    to = %destination.display(),
                    dry_run = options.dry_run,
                    "archived report"
                );
                summary.archived.push(ArchivedReport {
                    source: path,
                    destination,
                    key,
                });
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "could not archive report");
                summary.failed.push(SkippedReport {
                    path,
                    reason: e.to_string(),
                });
            }
        }
    }
    Ok(summary)
}

fn place_report(source: &Path, target_dir: &Path, stem: &str, extension: &str) -> io::Result<PathBuf> {
    ensure_dir(target_dir)?;
    let destination = claim_destination(target_dir, stem, extension)?;
    relocate(source, &destination)?;
    Ok(destination)
}

fn plan_destination(
    target_dir: &Path,
    stem: &str,
    extension: &str,
    planned: &mut HashSet<PathBuf>,
) -> PathBuf {
    let mut n = 0usize;
    loop {
        let candidate = target_dir.join(candidate_name(stem, n, extension));
        if !candidate.exists() && !planned.contains(&candidate) {
            planned.insert(candidate.clone());
            return candidate;
        }
        n += 1;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use serde_json::{json, Value};

    fn temp_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "sweep_archive_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        ensure_dir(&root).expect("temp root");
        root
    }

    fn snapshot(dataset: &str, classifier: Value) -> Value {
        json!({
            "cache_dir": format!("./cache/{}", dataset),
            "gold_standard_configuration": { "path": format!("./datasets/req2req/{}/answer.csv", dataset), "hasHeader": "true" },
            "source_artifact_provider": { "name": "text", "args": { "artifact_type": "requirement", "path": format!("./datasets/{}/high", dataset) } },
            "target_artifact_provider": { "name": "text", "args": { "artifact_type": "requirement", "path": format!("./datasets/{}/low", dataset) } },
            "source_preprocessor": { "name": "artifact", "args": {} },
            "target_preprocessor": { "name": "artifact", "args": {} },
            "embedding_creator": { "name": "openai", "args": { "model": "text-embedding-3-large" } },
            "source_store": { "name": "custom", "args": {} },
            "target_store": { "name": "cosine_similarity", "args": { "max_results": "4" } },
            "classifier": classifier,
            "result_aggregator": { "name": "any_connection", "args": {} },
            "tracelinkid_postprocessor": { "name": "identity", "args": {} }
        })
    }

    fn report_text(config: &Value) -> String {
        format!(
            "## Configuration\n```json\n{}\n```\n\n## Results\n| TP | FP |\n| 3 | 1 |\n",
            serde_json::to_string_pretty(config).expect("serialize")
        )
    }

    fn gpt() -> Value {
        json!({ "name": "simple_openai", "args": { "model": "gpt-4o-mini-2024-07-18" } })
    }

    #[test]
    fn extract_snapshot_finds_first_fenced_block() {
        let text = "# r\n```json\n{\"a\": 1}\n```\ntext\n```json\n{\"b\": 2}\n```\n";
        assert_eq!(extract_snapshot(text), Some("{\"a\": 1}"));
        assert_eq!(extract_snapshot("```json\r\n{}\r\n```"), Some("{}"));
        assert_eq!(extract_snapshot("no block here"), None);
        assert_eq!(extract_snapshot("```\n{}\n```"), None);
    }

    #[test]
    fn same_key_reports_get_increasing_suffixes_in_name_order() {
        let root = temp_root("suffix");
        let config = snapshot("WARC", gpt());
        for name in ["c.md", "a.md", "b.md"] {
            fs::write(root.join(name), report_text(&config)).expect("write report");
        }

        let summary = archive_reports(&root, &ArchiveOptions::default()).expect("archive");
        assert_eq!(summary.archived_count(), 3);
        let stem = "WARC_WARC_artifact_artifact_text-embedding-3-large_simple_openai_gpt-4o-mini-2024-07-18_4";
        let dir = root.join("results").join("WARC");
        let expected: Vec<(PathBuf, PathBuf)> = vec![
            (root.join("a.md"), dir.join(format!("{}.md", stem))),
            (root.join("b.md"), dir.join(format!("{}_1.md", stem))),
            (root.join("c.md"), dir.join(format!("{}_2.md", stem))),
        ];
        let actual: Vec<(PathBuf, PathBuf)> = summary
            .archived
            .iter()
            .map(|a| (a.source.clone(), a.destination.clone()))
            .collect();
        assert_eq!(actual, expected);
        for (src, dst) in &expected {
            assert!(!src.exists(), "source should be moved: {}", src.display());
            assert_eq!(
                fs::read_to_string(dst).expect("archived"),
                report_text(&config)
            );
        }
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn existing_archive_entries_are_never_overwritten() {
        let root = temp_root("existing");
        let config = snapshot("GANNT", gpt());
        let key = classify_text(&report_text(&config)).expect("key").1;
        let dir = archive_dir(&root, &key);
        ensure_dir(&dir).expect("dir");
        let occupied = dir.join(candidate_name(&key.file_stem(), 0, "md"));
        fs::write(&occupied, "earlier result").expect("occupy");
        fs::write(root.join("new.md"), report_text(&config)).expect("report");

        let summary = archive_reports(&root, &ArchiveOptions::default()).expect("archive");
        assert_eq!(summary.archived[0].destination, dir.join(candidate_name(&key.file_stem(), 1, "md")));
        assert_eq!(fs::read_to_string(&occupied).expect("read"), "earlier result");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn report_without_block_stays_and_is_not_counted() {
        let root = temp_root("noblock");
        fs::write(root.join("broken.md"), "# results without configuration\n").expect("write");
        fs::write(root.join("good.md"), report_text(&snapshot("CCHIT", gpt()))).expect("write");
        fs::write(root.join("notes.txt"), report_text(&snapshot("CCHIT", gpt()))).expect("write");

        let summary = archive_reports(&root, &ArchiveOptions::default()).expect("archive");
        assert_eq!(summary.archived_count(), 1);
        assert_eq!(summary.unclassified.len(), 1);
        assert_eq!(summary.unclassified[0].path, root.join("broken.md"));
        assert!(root.join("broken.md").exists());
        assert!(root.join("notes.txt").exists(), "other extensions are ignored");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn malformed_or_incomplete_snapshots_are_unclassified() {
        let root = temp_root("malformed");
        fs::write(root.join("a.md"), "```json\n{ not json\n```\n").expect("write");
        let mut missing_model = snapshot("WARC", gpt());
        missing_model["embedding_creator"]["args"] = json!({});
        fs::write(root.join("b.md"), report_text(&missing_model)).expect("write");

        let summary = archive_reports(&root, &ArchiveOptions::default()).expect("archive");
        assert_eq!(summary.archived_count(), 0);
        assert_eq!(summary.unclassified.len(), 2);
        assert!(summary.unclassified[1].reason.contains("embedding_creator.args.model"));
        assert!(root.join("a.md").exists() && root.join("b.md").exists());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn mock_classifier_key_collapses_to_mock() {
        let text = report_text(&snapshot("dronology", json!({ "name": "mock", "args": {} })));
        let (_, key) = classify_text(&text).expect("classify");
        assert!(key.file_stem().contains("_mock_mock_"), "{}", key);
    }

    #[test]
    fn dry_run_plans_suffixes_without_moving() {
        let root = temp_root("dry");
        let config = snapshot("WARC", gpt());
        fs::write(root.join("a.md"), report_text(&config)).expect("write");
        fs::write(root.join("b.md"), report_text(&config)).expect("write");

        let options = ArchiveOptions {
            dry_run: true,
            ..ArchiveOptions::default()
        };
        let summary = archive_reports(&root, &options).expect("archive");
        assert!(summary.dry_run);
        assert_eq!(summary.archived_count(), 2);
        let names: Vec<String> = summary
            .archived
            .iter()
            .map(|a| a.destination.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert!(names[0].ends_with("_4.md") && names[1].ends_with("_4_1.md"), "{:?}", names);
        assert!(root.join("a.md").exists() && root.join("b.md").exists());
        assert!(!root.join("results").exists());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn claim_destination_skips_taken_names() {
        let root = temp_root("claim");
        fs::write(root.join("k.md"), "x").expect("write");
        fs::write(root.join("k_1.md"), "y").expect("write");
        let claimed = claim_destination(&root, "k", "md").expect("claim");
        assert_eq!(claimed, root.join("k_2.md"));
        assert!(claimed.exists());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn relocate_replaces_claim_and_removes_source() {
        let root = temp_root("relocate");
        let src = root.join("src.md");
        fs::write(&src, "payload").expect("write");
        let dst = claim_destination(&root, "dst", "md").expect("claim");
        relocate(&src, &dst).expect("relocate");
        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dst).expect("read"), "payload");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn relocate_failure_keeps_source_and_releases_claim() {
        let root = temp_root("relocate_fail");
        let missing = root.join("missing.md");
        let dst = claim_destination(&root, "dst", "md").expect("claim");
        assert!(relocate(&missing, &dst).is_err());
        assert!(!dst.exists(), "claimed file should be released");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn copy_fallback_verifies_then_removes_source() {
        let root = temp_root("copy_ok");
        let src = root.join("src.md");
        fs::write(&src, "payload").expect("write");
        let dst = claim_destination(&root, "dst", "md").expect("claim");
        copy_then_remove(&src, &dst, |p| fs::remove_file(p)).expect("copy");
        assert!(!src.exists());
        assert_eq!(fs::read_to_string(&dst).expect("read"), "payload");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn copy_fallback_failure_keeps_source_and_releases_claim() {
        let root = temp_root("copy_fail");
        // Directories cannot be copied as files.
        let src = root.join("src.md");
        ensure_dir(&src).expect("dir");
        let dst = claim_destination(&root, "dst", "md").expect("claim");
        assert!(copy_then_remove(&src, &dst, |p| fs::remove_file(p)).is_err());
        assert!(src.is_dir());
        assert!(!dst.exists(), "claimed file should be released");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn failed_source_removal_releases_verified_copy() {
        let root = temp_root("remove_fail");
        let src = root.join("src.md");
        fs::write(&src, "payload").expect("write");
        let dst = claim_destination(&root, "dst", "md").expect("claim");
        let result = copy_then_remove(&src, &dst, |_| {
            Err(io::Error::new(io::ErrorKind::PermissionDenied, "read-only source"))
        });
        assert!(result.is_err());
        assert_eq!(fs::read_to_string(&src).expect("read"), "payload");
        assert!(!dst.exists(), "no duplicate should stay behind");
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn copy_length_mismatch_is_an_error() {
        let src = Path::new("report.md");
        assert!(check_copy_length(src, 7, 7).is_ok());
        let err = check_copy_length(src, 3, 7).expect_err("short copy");
        assert!(err.to_string().contains("3 bytes, expected 7"), "{}", err);
    }

    #[test]
    fn dataset_outside_datasets_dir_is_unclassified() {
        let root = temp_root("dotdot");
        let mut config = snapshot("UC", gpt());
        config["source_artifact_provider"]["args"]["path"] = json!("./datasets/../UC");
        fs::write(root.join("a.md"), report_text(&config)).expect("write");

        let summary = archive_reports(&root, &ArchiveOptions::default()).expect("archive");
        assert_eq!(summary.archived_count(), 0);
        assert_eq!(summary.unclassified.len(), 1);
        assert!(root.join("a.md").exists());
        let again = archive_reports(&root, &ArchiveOptions::default()).expect("archive again");
        assert_eq!(again.archived_count(), 0);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn non_utf8_report_is_unclassified() {
        let root = temp_root("binary");
        fs::write(root.join("a.md"), b"\xff\xfe\x00\x80").expect("write");

        let summary = archive_reports(&root, &ArchiveOptions::default()).expect("archive");
        assert!(summary.failed.is_empty());
        assert_eq!(summary.unclassified.len(), 1);
        assert!(matches!(
            classify_report(&root.join("a.md")),
            Err(ReportError::NotUtf8)
        ));
        assert!(root.join("a.md").exists());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn missing_directory_is_fatal() {
        let root = temp_root("missing_dir").join("does-not-exist");
        assert!(archive_reports(&root, &ArchiveOptions::default()).is_err());
    }
}
