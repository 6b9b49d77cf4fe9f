//! Definition of the retraining pipeline.
//!
//! A pipeline is one main estimator stage, any number of independent
//! specialist stages, one aggregate stage and one combiner stage, run in that
//! order. Every stage declares the artifact files it produces; the union of
//! those declarations is the file set a complete model generation must have.

use crate::error::{TrainingError, TrainingResult};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::path::PathBuf;
use std::time::Duration;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    Main,
    Specialist,
    Aggregate,
    Combiner,
}

/// One independently runnable unit of the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StageSpec {
    pub name: String,
    /// Program and arguments.
    pub command: Vec<String>,
    /// Artifact files the stage writes, relative to the model directory.
    #[serde(default)]
    pub outputs: Vec<PathBuf>,
}

impl StageSpec {
    pub fn new(name: impl Into<String>, command: Vec<String>, outputs: Vec<PathBuf>) -> Self {
        Self { name: name.into(), command, outputs }
    }
}

/// A stage together with its position in the pipeline.
#[derive(Debug, Clone)]
pub struct PlannedStage {
    pub kind: StageKind,
    pub spec: StageSpec,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSpec {
    /// Working directory stage processes are started in.
    pub workdir: PathBuf,
    #[serde(default = "default_stage_timeout_secs")]
    pub stage_timeout_secs: u64,
    /// Specialist stages run concurrently up to this many at a time.
    #[serde(default = "default_max_parallel")]
    pub max_parallel: usize,
    /// Captured output kept per stage.
    #[serde(default = "default_max_output_bytes")]
    pub max_output_bytes: usize,
    /// Sanity ceiling for the main estimator's metric.
    #[serde(default = "default_max_main_metric")]
    pub max_main_metric: f64,
    pub main: StageSpec,
    #[serde(default)]
    pub specialists: Vec<StageSpec>,
    pub aggregate: StageSpec,
    pub combiner: StageSpec,
}

fn default_stage_timeout_secs() -> u64 {
    600
}

fn default_max_parallel() -> usize {
    1
}

fn default_max_output_bytes() -> usize {
    8192
}

fn default_max_main_metric() -> f64 {
    10.0
}

impl PipelineSpec {
    /// The production pipeline: price model, marketplace specialists, lot
    /// model and the stacking meta-model, each run as a Python script.
    #[must_use]
    pub fn standard(workdir: PathBuf) -> Self {
        let script = |path: &str| vec!["python3".to_string(), path.to_string()];
        let stacking = |name: &str, with_scaler: bool| {
            let mut outputs = vec![PathBuf::from(format!("stacking/{name}_model.pkl"))];
            if with_scaler {
                outputs.push(PathBuf::from(format!("stacking/{name}_scaler.pkl")));
            }
            outputs.push(PathBuf::from(format!("stacking/{name}_metadata.json")));
            outputs
        };

        let specialists = ["abebooks", "alibris", "amazon", "biblio", "ebay", "zvab"]
            .iter()
            .map(|name| {
                StageSpec::new(
                    *name,
                    script(&format!("scripts/stacking/train_{name}_model.py")),
                    stacking(name, true),
                )
            })
            .collect();

        Self {
            workdir,
            stage_timeout_secs: default_stage_timeout_secs(),
            max_parallel: default_max_parallel(),
            max_output_bytes: default_max_output_bytes(),
            max_main_metric: default_max_main_metric(),
            main: StageSpec::new(
                "price",
                script("scripts/train_price_model.py"),
                vec!["price_v1.pkl".into(), "scaler_v1.pkl".into(), "metadata.json".into()],
            ),
            specialists,
            aggregate: StageSpec::new("lot", script("scripts/stacking/train_lot_model.py"), stacking("lot", true)),
            combiner: StageSpec::new(
                "meta",
                script("scripts/stacking/train_meta_model.py"),
                stacking("meta", false),
            ),
        }
    }

    #[must_use]
    pub fn stage_timeout(&self) -> Duration {
        Duration::from_secs(self.stage_timeout_secs)
    }

    /// Every stage in execution order.
    #[must_use]
    pub fn stages(&self) -> Vec<PlannedStage> {
        let mut out = vec![PlannedStage { kind: StageKind::Main, spec: self.main.clone() }];
        out.extend(
            self.specialists
                .iter()
                .map(|spec| PlannedStage { kind: StageKind::Specialist, spec: spec.clone() }),
        );
        out.push(PlannedStage { kind: StageKind::Aggregate, spec: self.aggregate.clone() });
        out.push(PlannedStage { kind: StageKind::Combiner, spec: self.combiner.clone() });
        out
    }

    /// Files that must exist for a generation to be complete.
    #[must_use]
    pub fn required_artifacts(&self) -> Vec<PathBuf> {
        let set: BTreeSet<PathBuf> = self.stages().into_iter().flat_map(|s| s.spec.outputs).collect();
        set.into_iter().collect()
    }

    pub fn validate(&self) -> TrainingResult<()> {
        let mut names = BTreeSet::new();
        for stage in self.stages() {
            if stage.spec.name.trim().is_empty() {
                return Err(TrainingError::InvalidSpec("stage name is required".to_string()));
            }
            if stage.spec.command.first().is_none_or(|p| p.trim().is_empty()) {
                return Err(TrainingError::InvalidSpec(format!("stage '{}' has no command", stage.spec.name)));
            }
            if !names.insert(stage.spec.name.clone()) {
                return Err(TrainingError::InvalidSpec(format!("duplicate stage name '{}'", stage.spec.name)));
            }
            if let Some(abs) = stage.spec.outputs.iter().find(|p| p.is_absolute()) {
                return Err(TrainingError::InvalidSpec(format!(
                    "stage '{}' output must be relative to the model directory: {}",
                    stage.spec.name,
                    abs.display()
                )));
            }
        }
        if self.stage_timeout_secs == 0 {
            return Err(TrainingError::InvalidSpec("stage_timeout_secs must be >= 1".to_string()));
        }
        if self.max_parallel == 0 {
            return Err(TrainingError::InvalidSpec("max_parallel must be >= 1".to_string()));
        }
        if !self.max_main_metric.is_finite() || self.max_main_metric <= 0.0 {
            return Err(TrainingError::InvalidSpec("max_main_metric must be > 0".to_string()));
        }
        Ok(())
    }
}
