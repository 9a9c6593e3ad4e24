use anyhow::{anyhow, Result};
use chrono::{DateTime, Utc};
use scan_runner::{DecisionRecord, Mode, Outcome};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::info;

pub const RESULTS_FILE_NAME: &str = "baggage_results.csv";
pub const CSV_HEADER: [&str; 6] = ["Round", "Mode", "Threat", "User_Reject", "Result", "Time"];

/// Row layout of the results file. Booleans are written `True`/`False` so
/// existing spreadsheet and pandas tooling reads them unchanged.
#[derive(Debug, Serialize, Deserialize)]
struct ResultRow {
    #[serde(rename = "Round")]
    round: u32,
    #[serde(rename = "Mode")]
    mode: String,
    #[serde(rename = "Threat")]
    threat: String,
    #[serde(rename = "User_Reject")]
    user_reject: String,
    #[serde(rename = "Result")]
    result: String,
    #[serde(rename = "Time")]
    time: f64,
}

fn title_bool(v: bool) -> String {
    let label = if v { "True" } else { "False" };
    label.to_string()
}

fn parse_title_bool(raw: &str) -> Result<bool> {
    match raw.trim() {
        "True" | "true" => Ok(true),
        "False" | "false" => Ok(false),
        other => Err(anyhow!("invalid boolean in results file: {}", other)),
    }
}

impl From<&DecisionRecord> for ResultRow {
    fn from(r: &DecisionRecord) -> Self {
        Self {
            round: r.round,
            mode: r.mode.as_str().to_string(),
            threat: title_bool(r.threat),
            user_reject: title_bool(r.user_reject),
            result: r.result.as_str().to_string(),
            time: r.time,
        }
    }
}

impl TryFrom<ResultRow> for DecisionRecord {
    type Error = anyhow::Error;

    fn try_from(row: ResultRow) -> Result<Self> {
        Ok(DecisionRecord {
            round: row.round,
            mode: row.mode.parse::<Mode>().map_err(|e| anyhow!(e))?,
            threat: parse_title_bool(&row.threat)?,
            user_reject: parse_title_bool(&row.user_reject)?,
            result: row.result.parse::<Outcome>().map_err(|e| anyhow!(e))?,
            time: row.time,
        })
    }
}

pub fn results_to_csv(records: &[DecisionRecord]) -> Result<Vec<u8>> {
    let mut writer = csv::Writer::from_writer(Vec::new());
    if records.is_empty() {
        writer.write_record(CSV_HEADER)?;
    }
    for record in records {
        writer.serialize(ResultRow::from(record))?;
    }
    writer
        .into_inner()
        .map_err(|e| anyhow!("failed to flush csv: {}", e))
}

pub fn read_results_csv(path: &Path) -> Result<Vec<DecisionRecord>> {
    let mut reader = csv::Reader::from_path(path)
        .map_err(|e| anyhow!("failed to open results {}: {}", path.display(), e))?;
    let headers = reader.headers()?.clone();
    if headers.iter().ne(CSV_HEADER.iter().copied()) {
        return Err(anyhow!(
            "unexpected results header in {}: {:?}",
            path.display(),
            headers.iter().collect::<Vec<_>>()
        ));
    }
    let mut out = Vec::new();
    for row in reader.deserialize::<ResultRow>() {
        out.push(DecisionRecord::try_from(row?)?);
    }
    Ok(out)
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct ModeSummary {
    pub trials: usize,
    pub correct: usize,
    pub accuracy_pct: f64,
    pub mean_time: f64,
    pub mean_time_correct: Option<f64>,
    pub mean_time_error: Option<f64>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SessionSummary {
    pub total: ModeSummary,
    pub by_mode: BTreeMap<Mode, ModeSummary>,
}

fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        None
    } else {
        Some(values.iter().sum::<f64>() / values.len() as f64)
    }
}

fn summarize_group<'a>(records: impl Iterator<Item = &'a DecisionRecord>) -> ModeSummary {
    let mut correct_times = Vec::new();
    let mut error_times = Vec::new();
    for r in records {
        match r.result {
            Outcome::Correct => correct_times.push(r.time),
            Outcome::Error => error_times.push(r.time),
        }
    }
    let trials = correct_times.len() + error_times.len();
    let all: Vec<f64> = correct_times.iter().chain(error_times.iter()).copied().collect();
    ModeSummary {
        trials,
        correct: correct_times.len(),
        accuracy_pct: if trials == 0 {
            0.0
        } else {
            correct_times.len() as f64 * 100.0 / trials as f64
        },
        mean_time: mean(&all).unwrap_or(0.0),
        mean_time_correct: mean(&correct_times),
        mean_time_error: mean(&error_times),
    }
}

pub fn summarize(records: &[DecisionRecord]) -> SessionSummary {
    let mut by_mode = BTreeMap::new();
    for mode in [Mode::Manual, Mode::AiAssist] {
        if records.iter().any(|r| r.mode == mode) {
            by_mode.insert(mode, summarize_group(records.iter().filter(|r| r.mode == mode)));
        }
    }
    SessionSummary {
        total: summarize_group(records.iter()),
        by_mode,
    }
}

fn fmt_opt(v: Option<f64>) -> String {
    v.map(|t| format!("{:.3}s", t))
        .unwrap_or_else(|| "-".to_string())
}

pub fn render_summary(summary: &SessionSummary) -> String {
    let mut out = String::new();
    out.push_str(&format!(
        "{:<10} {:>6} {:>8} {:>9} {:>10} {:>10} {:>10}\n",
        "mode", "trials", "correct", "accuracy", "mean_rt", "rt_correct", "rt_error"
    ));
    let rows = summary
        .by_mode
        .iter()
        .map(|(m, s)| (m.as_str(), s))
        .chain(std::iter::once(("total", &summary.total)));
    for (label, s) in rows {
        out.push_str(&format!(
            "{:<10} {:>6} {:>8} {:>8.1}% {:>9.3}s {:>10} {:>10}\n",
            label,
            s.trials,
            s.correct,
            s.accuracy_pct,
            s.mean_time,
            fmt_opt(s.mean_time_correct),
            fmt_opt(s.mean_time_error)
        ));
    }
    out
}

pub fn sha256_bytes(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let ts = Utc::now().timestamp_micros();
    let pid = std::process::id();
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(".{}.tmp.{}.{}", name, pid, ts));
    let mut file = fs::File::create(&tmp)?;
    file.write_all(bytes)?;
    file.sync_all()?;
    fs::rename(&tmp, path)?;
    Ok(())
}

pub struct SessionMeta {
    pub participant: Option<String>,
    pub score: u32,
    pub max_score: u32,
    pub seed: Option<u64>,
    pub created_at: DateTime<Utc>,
}

pub struct ExportResult {
    pub session_id: String,
    pub session_dir: PathBuf,
    pub results_path: PathBuf,
    pub manifest_path: PathBuf,
}

/// Claims a fresh `sessions/<id>` directory; a taken id gets a `_<n>` suffix.
fn create_session_dir(out_dir: &Path, base_id: &str) -> Result<(String, PathBuf)> {
    let sessions = out_dir.join("sessions");
    fs::create_dir_all(&sessions)?;
    for attempt in 0u32.. {
        let session_id = if attempt == 0 {
            base_id.to_string()
        } else {
            format!("{}_{}", base_id, attempt)
        };
        let dir = sessions.join(&session_id);
        match fs::create_dir(&dir) {
            Ok(()) => return Ok((session_id, dir)),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
            Err(e) => return Err(e.into()),
        }
    }
    Err(anyhow!("no free session directory under {}", sessions.display()))
}

/// Writes `baggage_results.csv` and `manifest.json` into
/// `<out_dir>/sessions/session_<timestamp>/`.
pub fn export_session(
    out_dir: &Path,
    records: &[DecisionRecord],
    meta: &SessionMeta,
) -> Result<ExportResult> {
    let base_id = format!("session_{}", meta.created_at.format("%Y%m%d_%H%M%S_%6f"));
    let (session_id, session_dir) = create_session_dir(out_dir, &base_id)?;

    let csv_bytes = results_to_csv(records)?;
    let results_path = session_dir.join(RESULTS_FILE_NAME);
    atomic_write_bytes(&results_path, &csv_bytes)?;

    let manifest = manifest_json(&session_id, records, meta, &sha256_bytes(&csv_bytes));
    let manifest_path = session_dir.join("manifest.json");
    atomic_write_bytes(&manifest_path, &serde_json::to_vec_pretty(&manifest)?)?;

    info!(
        session_id = session_id.as_str(),
        rows = records.len(),
        dir = %session_dir.display(),
        "session exported"
    );
    Ok(ExportResult {
        session_id,
        session_dir,
        results_path,
        manifest_path,
    })
}

fn manifest_json(
    session_id: &str,
    records: &[DecisionRecord],
    meta: &SessionMeta,
    results_sha256: &str,
) -> Value {
    json!({
        "schema_version": "screening_session_v1",
        "session_id": session_id,
        "participant": meta.participant,
        "created_at": meta.created_at.to_rfc3339(),
        "seed": meta.seed,
        "score": meta.score,
        "max_score": meta.max_score,
        "rounds": records.len(),
        "results_file": RESULTS_FILE_NAME,
        "results_sha256": results_sha256,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(round: u32, mode: Mode, threat: bool, reject: bool, time: f64) -> DecisionRecord {
        DecisionRecord {
            round,
            mode,
            threat,
            user_reject: reject,
            result: if threat == reject {
                Outcome::Correct
            } else {
                Outcome::Error
            },
            time,
        }
    }

    fn temp_root(tag: &str) -> PathBuf {
        let root = std::env::temp_dir().join(format!(
            "scan_{}_test_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&root).expect("temp dir");
        root
    }

    #[test]
    fn csv_uses_expected_header_and_labels() {
        let records = vec![
            rec(1, Mode::Manual, true, true, 1.5),
            rec(2, Mode::AiAssist, false, true, 0.25),
        ];
        let bytes = results_to_csv(&records).expect("csv");
        let text = String::from_utf8(bytes).expect("utf8");
        let mut lines = text.lines();
        assert_eq!(lines.next(), Some("Round,Mode,Threat,User_Reject,Result,Time"));
        assert_eq!(lines.next(), Some("1,Manual,True,True,CORRECT,1.5"));
        assert_eq!(lines.next(), Some("2,AI_Assist,False,True,ERROR,0.25"));
        assert_eq!(lines.next(), None);
    }

    #[test]
    fn empty_history_still_writes_header() {
        let text = String::from_utf8(results_to_csv(&[]).expect("csv")).expect("utf8");
        assert_eq!(text.trim_end(), "Round,Mode,Threat,User_Reject,Result,Time");
    }

    #[test]
    fn export_writes_results_and_manifest_that_read_back() {
        let root = temp_root("export");
        let records = vec![
            rec(1, Mode::Manual, true, true, 1.204),
            rec(2, Mode::Manual, false, false, 0.861),
            rec(3, Mode::Manual, true, false, 2.013),
        ];
        let meta = SessionMeta {
            participant: Some("p01".to_string()),
            score: 20,
            max_score: 100,
            seed: Some(7),
            created_at: Utc::now(),
        };
        let exported = export_session(&root, &records, &meta).expect("export");
        assert!(exported.session_dir.starts_with(root.join("sessions")));

        let back = read_results_csv(&exported.results_path).expect("read back");
        assert_eq!(back, records);

        let manifest: Value =
            serde_json::from_slice(&fs::read(&exported.manifest_path).expect("manifest"))
                .expect("manifest json");
        assert_eq!(manifest["participant"], "p01");
        assert_eq!(manifest["score"], 20);
        assert_eq!(manifest["rounds"], 3);
        let digest = sha256_bytes(&fs::read(&exported.results_path).expect("csv"));
        assert_eq!(manifest["results_sha256"], digest.as_str());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn exports_with_the_same_timestamp_get_distinct_dirs() {
        let root = temp_root("same_ts");
        let records = vec![rec(1, Mode::Manual, false, false, 0.5)];
        let meta = SessionMeta {
            participant: None,
            score: 10,
            max_score: 10,
            seed: None,
            created_at: Utc::now(),
        };
        let first = export_session(&root, &records, &meta).expect("first export");
        let second = export_session(&root, &records, &meta).expect("second export");
        assert_ne!(first.session_dir, second.session_dir);
        assert_eq!(second.session_id, format!("{}_1", first.session_id));
        assert!(first.results_path.exists());
        assert!(second.results_path.exists());

        let manifest: Value =
            serde_json::from_slice(&fs::read(&second.manifest_path).expect("manifest"))
                .expect("manifest json");
        assert_eq!(manifest["session_id"], second.session_id.as_str());
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn reading_rejects_foreign_header() {
        let root = temp_root("header");
        let path = root.join("other.csv");
        fs::write(&path, "a,b,c\n1,2,3\n").expect("write");
        let err = read_results_csv(&path).expect_err("header must be checked");
        assert!(err.to_string().contains("unexpected results header"), "{}", err);
        let _ = fs::remove_dir_all(root);
    }

    #[test]
    fn summary_groups_by_mode() {
        let records = vec![
            rec(1, Mode::Manual, true, true, 1.0),
            rec(2, Mode::Manual, false, true, 3.0),
            rec(1, Mode::AiAssist, true, true, 0.5),
            rec(2, Mode::AiAssist, false, false, 1.5),
        ];
        let summary = summarize(&records);
        let manual = &summary.by_mode[&Mode::Manual];
        assert_eq!(manual.trials, 2);
        assert_eq!(manual.correct, 1);
        assert_eq!(manual.accuracy_pct, 50.0);
        assert_eq!(manual.mean_time, 2.0);
        assert_eq!(manual.mean_time_correct, Some(1.0));
        assert_eq!(manual.mean_time_error, Some(3.0));

        let ai = &summary.by_mode[&Mode::AiAssist];
        assert_eq!(ai.accuracy_pct, 100.0);
        assert_eq!(ai.mean_time_error, None);

        assert_eq!(summary.total.trials, 4);
        assert_eq!(summary.total.correct, 3);
        assert_eq!(summary.total.accuracy_pct, 75.0);
    }

    #[test]
    fn summary_of_single_mode_omits_the_other() {
        let summary = summarize(&[rec(1, Mode::Manual, false, false, 0.4)]);
        assert!(summary.by_mode.contains_key(&Mode::Manual));
        assert!(!summary.by_mode.contains_key(&Mode::AiAssist));
        let table = render_summary(&summary);
        assert!(table.contains("Manual"));
        assert!(table.contains("total"));
        assert!(!table.contains("AI_Assist"));
    }
}
