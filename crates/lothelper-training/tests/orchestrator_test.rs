//! End-to-end tests for the retraining orchestrator.

#![cfg(unix)]

use async_trait::async_trait;
use lothelper_training::{
    ArtifactLayout, ArtifactStore, Disposition, PipelineSpec, StageExecutor, StageKind, StageResult, StageSpec,
    StageStatus, TrainingError, TrainingOrchestrator, ValidationIssue,
};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use walkdir::WalkDir;

fn sh(name: &str, script: &str, outputs: &[&str]) -> StageSpec {
    StageSpec::new(
        name,
        vec!["sh".into(), "-c".into(), script.into()],
        outputs.iter().map(PathBuf::from).collect(),
    )
}

/// Stage script writing `outputs` with generation-2 content, then printing `extra`.
fn writer(name: &str, outputs: &[&str], extra: &str) -> StageSpec {
    let mut script = String::from("mkdir -p stacking;");
    for out in outputs {
        script.push_str(&format!(" echo gen-2 > {out};"));
    }
    script.push(' ');
    script.push_str(extra);
    sh(name, &script, outputs)
}

fn pipeline(model_dir: &Path) -> PipelineSpec {
    PipelineSpec {
        workdir: model_dir.to_path_buf(),
        stage_timeout_secs: 10,
        max_parallel: 2,
        max_output_bytes: 4096,
        max_main_metric: 10.0,
        main: writer("price", &["price_v1.pkl", "metadata.json"], "echo 'Test MAE: 2.45'"),
        specialists: vec![
            writer("abebooks", &["stacking/abebooks_model.pkl"], "echo 'MAE: $4.10'"),
            writer("ebay", &["stacking/ebay_model.pkl"], "echo 'MAE: $3.30'"),
        ],
        aggregate: writer("lot", &["stacking/lot_model.pkl"], "true"),
        combiner: writer("meta", &["stacking/meta_model.pkl"], "true"),
    }
}

fn seed(model_dir: &Path) {
    std::fs::create_dir_all(model_dir.join("stacking")).unwrap();
    for file in [
        "price_v1.pkl",
        "metadata.json",
        "stacking/abebooks_model.pkl",
        "stacking/ebay_model.pkl",
        "stacking/lot_model.pkl",
        "stacking/meta_model.pkl",
    ] {
        std::fs::write(model_dir.join(file), format!("gen-1 {file}\n")).unwrap();
    }
}

fn contents(model_dir: &Path) -> BTreeMap<PathBuf, Vec<u8>> {
    WalkDir::new(model_dir)
        .into_iter()
        .filter_entry(|e| e.file_name() != "backups")
        .filter_map(Result::ok)
        .filter(|e| e.file_type().is_file())
        .map(|e| {
            let rel = e.path().strip_prefix(model_dir).unwrap().to_path_buf();
            (rel, std::fs::read(e.path()).unwrap())
        })
        .collect()
}

struct Fixture {
    _temp: TempDir,
    model_dir: PathBuf,
}

impl Fixture {
    fn new() -> Self {
        let temp = TempDir::new().unwrap();
        let model_dir = temp.path().join("models");
        seed(&model_dir);
        Self { _temp: temp, model_dir }
    }

    fn store(&self) -> ArtifactStore {
        ArtifactStore::new(ArtifactLayout::for_model_dir(&self.model_dir))
    }

    fn orchestrator(&self, spec: PipelineSpec) -> TrainingOrchestrator {
        TrainingOrchestrator::new(self.store(), spec).unwrap()
    }
}

#[tokio::test]
async fn test_successful_run_commits_new_generation() {
    let fx = Fixture::new();
    let before = contents(&fx.model_dir);

    let run = fx.orchestrator(pipeline(&fx.model_dir)).run().await.unwrap();

    assert_eq!(run.disposition, Disposition::Committed);
    assert!(run.issues.is_empty());
    assert_eq!(run.stages.len(), 5);
    assert_eq!(run.stage("price").unwrap().metric, Some(2.45));
    assert_eq!(std::fs::read_to_string(fx.model_dir.join("price_v1.pkl")).unwrap(), "gen-2\n");

    let version = run.backup_version.unwrap();
    let backup_dir = fx.store().layout().version_dir(&version);
    assert_eq!(contents(&backup_dir).get(Path::new("price_v1.pkl")), before.get(Path::new("price_v1.pkl")));
}

#[tokio::test]
async fn test_failed_stage_rolls_back_byte_identical() {
    let fx = Fixture::new();
    let before = contents(&fx.model_dir);
    let mut spec = pipeline(&fx.model_dir);
    spec.specialists[1] = writer("ebay", &["stacking/ebay_model.pkl"], "echo 'scrape data missing' >&2; exit 1");

    let run = fx.orchestrator(spec).run().await.unwrap();

    assert_eq!(run.disposition, Disposition::RolledBack);
    assert!(run.issues.contains(&ValidationIssue::StageFailed { stage: "ebay".to_string() }));
    // No early abort: stages after the failure still ran.
    assert_eq!(run.stages.len(), 5);
    assert!(run.stage("meta").unwrap().success);
    assert_eq!(contents(&fx.model_dir), before);
}

#[tokio::test]
async fn test_timed_out_stage_cannot_write_after_rollback() {
    let fx = Fixture::new();
    let before = contents(&fx.model_dir);
    let mut spec = pipeline(&fx.model_dir);
    spec.stage_timeout_secs = 1;
    spec.main = sh("price", "(sleep 2; echo gen-2-junk > price_v1.pkl) & sleep 30", &["price_v1.pkl"]);

    let run = fx.orchestrator(spec).run().await.unwrap();

    assert_eq!(run.disposition, Disposition::RolledBack);
    assert_eq!(run.stage("price").unwrap().status, StageStatus::TimedOut);
    assert_eq!(contents(&fx.model_dir), before);

    tokio::time::sleep(Duration::from_millis(2500)).await;
    assert_eq!(contents(&fx.model_dir), before);
}

#[tokio::test]
async fn test_metric_above_ceiling_rolls_back() {
    let fx = Fixture::new();
    let before = contents(&fx.model_dir);
    let mut spec = pipeline(&fx.model_dir);
    spec.main = writer("price", &["price_v1.pkl", "metadata.json"], "echo 'Test MAE: 12.00'");

    let run = fx.orchestrator(spec).run().await.unwrap();

    assert!(run.stages.iter().all(|s| s.success));
    assert_eq!(run.disposition, Disposition::RolledBack);
    assert_eq!(run.issues, vec![ValidationIssue::MainMetricAboveCeiling { metric: 12.0, ceiling: 10.0 }]);
    assert_eq!(contents(&fx.model_dir), before);
}

#[tokio::test]
async fn test_missing_artifact_rolls_back_and_removes_partial_files() {
    let fx = Fixture::new();
    let before = contents(&fx.model_dir);
    let mut spec = pipeline(&fx.model_dir);
    spec.combiner = sh("meta", "rm -f stacking/meta_model.pkl; echo partial > stacking/meta_tmp.pkl", &["stacking/meta_model.pkl"]);

    let run = fx.orchestrator(spec).run().await.unwrap();

    assert_eq!(run.disposition, Disposition::RolledBack);
    assert_eq!(
        run.issues,
        vec![ValidationIssue::MissingArtifact { path: PathBuf::from("stacking/meta_model.pkl") }]
    );
    assert_eq!(contents(&fx.model_dir), before);
}

#[tokio::test]
async fn test_missing_model_dir_fails_without_running_stages() {
    let temp = TempDir::new().unwrap();
    let model_dir = temp.path().join("never-created");
    let store = ArtifactStore::new(ArtifactLayout::for_model_dir(&model_dir));
    let orchestrator = TrainingOrchestrator::new(store, pipeline(&model_dir)).unwrap();

    let run = orchestrator.run().await.unwrap();

    assert_eq!(run.disposition, Disposition::FailedNoBackup);
    assert!(run.stages.is_empty());
    assert!(run.backup_version.is_none());
    assert!(run.error.is_some());
}

#[tokio::test]
async fn test_failed_restore_escalates() {
    let fx = Fixture::new();
    let mut spec = pipeline(&fx.model_dir);
    spec.aggregate = sh("lot", "rm -rf backups; exit 1", &["stacking/lot_model.pkl"]);

    let err = fx.orchestrator(spec).run().await.unwrap_err();

    assert!(matches!(err, TrainingError::Rollback { .. }));
}

/// Sleeps instead of spawning processes and tracks how many stages overlap.
struct CountingExecutor {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

#[async_trait]
impl StageExecutor for CountingExecutor {
    async fn execute(&self, kind: StageKind, stage: &StageSpec) -> StageResult {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(50)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        StageResult {
            name: stage.name.clone(),
            kind,
            success: true,
            elapsed: Duration::from_millis(50),
            metric: Some(1.0),
            status: StageStatus::Exited { code: 0 },
            output: String::new(),
        }
    }
}

#[tokio::test]
async fn test_specialists_respect_parallel_limit() {
    let fx = Fixture::new();
    let mut spec = pipeline(&fx.model_dir);
    spec.max_parallel = 2;
    spec.specialists = (0..5)
        .map(|i| sh(&format!("specialist-{i}"), "true", &[]))
        .collect();
    let executor = Arc::new(CountingExecutor { in_flight: AtomicUsize::new(0), peak: AtomicUsize::new(0) });

    let run = fx
        .orchestrator(spec)
        .with_executor(executor.clone())
        .run()
        .await
        .unwrap();

    assert_eq!(run.disposition, Disposition::Committed);
    let names: Vec<_> = run.stages.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["price", "specialist-0", "specialist-1", "specialist-2", "specialist-3", "specialist-4", "lot", "meta"]
    );
    assert_eq!(executor.peak.load(Ordering::SeqCst), 2);
}
