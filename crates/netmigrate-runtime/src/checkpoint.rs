//! Checkpoint Store
//!
//! Durable record of a run's progress, keyed by run id. The engine saves a
//! checkpoint after every stage, so a crash never loses a completed stage
//! and never exposes a half-written one.
//!
//! [`FileCheckpointStore`] keeps one pretty-printed JSON document per run
//! under a directory:
//!
//! ```text
//! .netmigrate/checkpoints/
//! ├── 2f1c9a3e-....json
//! ├── nightly-1.json
//! └── archive/
//!     └── nightly-0.json
//! ```

use chrono::{DateTime, Utc};
use netmigrate_core::{MigrationRequest, RunId};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::BTreeMap;
use std::fmt;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::error::{MigrationError, Result};

// ============================================================================
// Stages and states
// ============================================================================

/// One unit of the linear pipeline, in execution order
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Fetch the source inventory
    Extract,
    /// Map it to the canonical spec
    Transform,
    /// Source sanity validation
    ValidateSource,
    /// Generate the target project
    Generate,
    /// Target readiness validation
    ValidateTarget,
    /// Deploy the generated project
    Deploy,
}

impl Stage {
    /// All stages in execution order
    pub const ALL: [Stage; 6] = [
        Stage::Extract,
        Stage::Transform,
        Stage::ValidateSource,
        Stage::Generate,
        Stage::ValidateTarget,
        Stage::Deploy,
    ];

    /// Stable name used in checkpoints and logs
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Extract => "extract",
            Self::Transform => "transform",
            Self::ValidateSource => "validate_source",
            Self::Generate => "generate",
            Self::ValidateTarget => "validate_target",
            Self::Deploy => "deploy",
        }
    }

    /// Workflow state while this stage runs
    pub fn state(self) -> WorkflowState {
        match self {
            Self::Extract => WorkflowState::Extracting,
            Self::Transform => WorkflowState::Transforming,
            Self::ValidateSource | Self::ValidateTarget => WorkflowState::Validating,
            Self::Generate => WorkflowState::Generating,
            Self::Deploy => WorkflowState::Deploying,
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Workflow state machine states
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowState {
    /// No stage has run
    #[default]
    NotStarted,
    /// Extract stage running
    Extracting,
    /// Transform stage running
    Transforming,
    /// A validate stage running
    Validating,
    /// Generate stage running
    Generating,
    /// Deploy stage running
    Deploying,
    /// Every stage succeeded
    Completed,
    /// A stage failed; resumable
    Failed,
}

impl WorkflowState {
    /// Whether the state is Completed or Failed
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed)
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::NotStarted => "not_started",
            Self::Extracting => "extracting",
            Self::Transforming => "transforming",
            Self::Validating => "validating",
            Self::Generating => "generating",
            Self::Deploying => "deploying",
            Self::Completed => "completed",
            Self::Failed => "failed",
        })
    }
}

// ============================================================================
// Checkpoint record
// ============================================================================

/// Persisted progress of one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkflowCheckpoint {
    /// Run identifier
    pub run_id: RunId,

    /// The request that started the run
    pub request: MigrationRequest,

    /// State at the time of the last save
    #[serde(default)]
    pub status: WorkflowState,

    /// Most recent stage that completed
    #[serde(default)]
    pub last_completed_stage: Option<Stage>,

    /// Output of every completed stage
    #[serde(default)]
    pub accumulated_outputs: BTreeMap<Stage, Value>,

    /// Attempts spent per stage, across resumes
    #[serde(default)]
    pub attempt_counts: BTreeMap<Stage, u32>,

    /// Stage that failed, when `status` is Failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub failed_stage: Option<Stage>,

    /// Last error, when `status` is Failed
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,

    /// When the run started
    pub created_at: DateTime<Utc>,

    /// When this record was last written
    pub updated_at: DateTime<Utc>,
}

impl WorkflowCheckpoint {
    /// Fresh checkpoint for a new run
    pub fn new(request: MigrationRequest) -> Self {
        let now = Utc::now();
        Self {
            run_id: request.run_id.clone(),
            request,
            status: WorkflowState::NotStarted,
            last_completed_stage: None,
            accumulated_outputs: BTreeMap::new(),
            attempt_counts: BTreeMap::new(),
            failed_stage: None,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Recorded output of a completed stage
    pub fn output(&self, stage: Stage) -> Option<&Value> {
        self.accumulated_outputs.get(&stage)
    }

    /// First stage without a recorded output
    pub fn next_stage(&self) -> Option<Stage> {
        Stage::ALL.into_iter().find(|s| self.output(*s).is_none())
    }

    /// Record a successful stage
    pub fn record_success(&mut self, stage: Stage, output: Value, attempts: u32) {
        self.accumulated_outputs.insert(stage, output);
        *self.attempt_counts.entry(stage).or_default() += attempts;
        self.last_completed_stage = Some(stage);
        self.failed_stage = None;
        self.last_error = None;
        self.updated_at = Utc::now();
    }

    /// Record a failed stage; the run becomes Failed
    pub fn record_failure(&mut self, stage: Stage, error: &MigrationError, attempts: u32) {
        *self.attempt_counts.entry(stage).or_default() += attempts;
        self.status = WorkflowState::Failed;
        self.failed_stage = Some(stage);
        self.last_error = Some(error.to_string());
        self.updated_at = Utc::now();
    }
}

// ============================================================================
// Storage
// ============================================================================

/// Durable storage for checkpoints
///
/// Implementations must make [`save`](Self::save) atomic: a concurrent or
/// later [`load`](Self::load) sees either the previous record or the new
/// one, never a partial write.
pub trait CheckpointStore: Send + Sync {
    /// Persist a checkpoint, replacing any previous one for the run.
    fn save(&self, checkpoint: &WorkflowCheckpoint) -> Result<()>;

    /// Load the checkpoint for a run.
    ///
    /// Returns `Ok(None)` when the run has never been checkpointed, meaning
    /// "start from the first stage".
    fn load(&self, run_id: &RunId) -> Result<Option<WorkflowCheckpoint>>;

    /// Delete the checkpoint for a run. Absent checkpoints are not an error.
    fn clear(&self, run_id: &RunId) -> Result<()>;

    /// Move the checkpoint for a run out of the active set, keeping it for
    /// inspection.
    fn archive(&self, run_id: &RunId) -> Result<()>;

    /// Run ids with an active checkpoint, sorted.
    fn list(&self) -> Result<Vec<RunId>>;
}

/// One JSON file per run under a directory
#[derive(Debug, Clone)]
pub struct FileCheckpointStore {
    dir: PathBuf,
}

impl FileCheckpointStore {
    /// Store rooted at `dir`; the directory is created on first save
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Root directory
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// File holding the checkpoint for `run_id`
    pub fn path_for(&self, run_id: &RunId) -> PathBuf {
        self.dir.join(format!("{run_id}.json"))
    }

    fn archive_dir(&self) -> PathBuf {
        self.dir.join("archive")
    }
}

fn storage_error(action: &str, path: &Path, error: impl fmt::Display) -> MigrationError {
    MigrationError::Checkpoint {
        message: format!("failed to {action} {}: {error}", path.display()),
    }
}

impl CheckpointStore for FileCheckpointStore {
    fn save(&self, checkpoint: &WorkflowCheckpoint) -> Result<()> {
        let path = self.path_for(&checkpoint.run_id);
        std::fs::create_dir_all(&self.dir).map_err(|e| storage_error("create", &self.dir, e))?;

        // Temp file in the same directory so the rename stays on one filesystem
        let mut tmp = tempfile::NamedTempFile::new_in(&self.dir)
            .map_err(|e| storage_error("create temp file in", &self.dir, e))?;
        serde_json::to_writer_pretty(&mut tmp, checkpoint)
            .map_err(|e| storage_error("serialize", &path, e))?;
        tmp.write_all(b"\n")
            .and_then(|()| tmp.as_file().sync_all())
            .map_err(|e| storage_error("write", &path, e))?;
        tmp.persist(&path)
            .map_err(|e| storage_error("replace", &path, e.error))?;

        tracing::debug!(
            run_id = %checkpoint.run_id,
            status = %checkpoint.status,
            path = %path.display(),
            "checkpoint saved"
        );
        Ok(())
    }

    fn load(&self, run_id: &RunId) -> Result<Option<WorkflowCheckpoint>> {
        let path = self.path_for(run_id);
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(storage_error("read", &path, e)),
        };
        let checkpoint = serde_json::from_str(&contents).map_err(|e| storage_error("parse", &path, e))?;
        Ok(Some(checkpoint))
    }

    fn clear(&self, run_id: &RunId) -> Result<()> {
        let path = self.path_for(run_id);
        match std::fs::remove_file(&path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(storage_error("remove", &path, e)),
        }
    }

    fn archive(&self, run_id: &RunId) -> Result<()> {
        let path = self.path_for(run_id);
        if !path.exists() {
            return Ok(());
        }
        let archive = self.archive_dir();
        std::fs::create_dir_all(&archive).map_err(|e| storage_error("create", &archive, e))?;
        let target = archive.join(format!("{run_id}.json"));
        std::fs::rename(&path, &target).map_err(|e| storage_error("archive", &path, e))
    }

    fn list(&self) -> Result<Vec<RunId>> {
        let entries = match std::fs::read_dir(&self.dir) {
            Ok(entries) => entries,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(storage_error("list", &self.dir, e)),
        };

        let mut runs = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| storage_error("list", &self.dir, e))?.path();
            if !path.is_file() || path.extension().and_then(|e| e.to_str()) != Some("json") {
                continue;
            }
            // Temp files and foreign names are not valid run ids
            if let Some(run_id) = path
                .file_stem()
                .and_then(|s| s.to_str())
                .and_then(|s| RunId::new(s).ok())
            {
                runs.push(run_id);
            }
        }
        runs.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        Ok(runs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use netmigrate_core::{CredentialSource, SourceSelector};
    use serde_json::json;

    fn request(run_id: &str) -> MigrationRequest {
        MigrationRequest {
            run_id: RunId::new(run_id).unwrap(),
            source: SourceSelector {
                network_id: Some("vpc-1".to_string()),
                region: "cn-hangzhou".to_string(),
            },
            target_project_name: "demo".to_string(),
            target_directory: "./output".to_string(),
            credentials: CredentialSource::Environment,
        }
    }

    #[test]
    fn test_load_missing_is_none() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path().join("checkpoints"));
        assert!(store.load(&RunId::new("r1").unwrap()).unwrap().is_none());
        assert!(store.list().unwrap().is_empty());
    }

    #[test]
    fn test_save_load_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());

        let mut checkpoint = WorkflowCheckpoint::new(request("r1"));
        checkpoint.status = WorkflowState::Transforming;
        checkpoint.record_success(Stage::Extract, json!({"inventory": {}}), 2);
        store.save(&checkpoint).unwrap();

        let loaded = store.load(&checkpoint.run_id).unwrap().unwrap();
        assert_eq!(loaded, checkpoint);
        assert_eq!(loaded.next_stage(), Some(Stage::Transform));
        assert_eq!(loaded.attempt_counts[&Stage::Extract], 2);

        let text = std::fs::read_to_string(store.path_for(&checkpoint.run_id)).unwrap();
        assert!(text.contains("\"last_completed_stage\": \"extract\""));
    }

    #[test]
    fn test_save_replaces_and_leaves_no_temp_files() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let mut checkpoint = WorkflowCheckpoint::new(request("r1"));
        for stage in Stage::ALL {
            checkpoint.record_success(stage, json!(stage.as_str()), 1);
            store.save(&checkpoint).unwrap();
        }

        let files: Vec<_> = std::fs::read_dir(dir.path())
            .unwrap()
            .map(|e| e.unwrap().file_name())
            .collect();
        assert_eq!(files.len(), 1);
        let loaded = store.load(&checkpoint.run_id).unwrap().unwrap();
        assert_eq!(loaded.next_stage(), None);
    }

    #[test]
    fn test_corrupt_checkpoint_is_error() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        let run_id = RunId::new("broken").unwrap();
        std::fs::write(store.path_for(&run_id), "{\"run_id\": ").unwrap();
        assert!(matches!(
            store.load(&run_id),
            Err(MigrationError::Checkpoint { .. })
        ));
    }

    #[test]
    fn test_clear_archive_and_list() {
        let dir = tempfile::tempdir().unwrap();
        let store = FileCheckpointStore::new(dir.path());
        for id in ["b", "a", "c"] {
            store.save(&WorkflowCheckpoint::new(request(id))).unwrap();
        }
        std::fs::write(dir.path().join(".tmp123.json"), "{}").unwrap();
        std::fs::write(dir.path().join("notes.txt"), "").unwrap();

        let listed: Vec<String> = store.list().unwrap().iter().map(|r| r.to_string()).collect();
        assert_eq!(listed, vec!["a", "b", "c"]);

        let a = RunId::new("a").unwrap();
        store.clear(&a).unwrap();
        store.clear(&a).unwrap();
        assert!(store.load(&a).unwrap().is_none());

        let b = RunId::new("b").unwrap();
        store.archive(&b).unwrap();
        assert!(store.load(&b).unwrap().is_none());
        assert!(dir.path().join("archive").join("b.json").is_file());

        let listed: Vec<String> = store.list().unwrap().iter().map(|r| r.to_string()).collect();
        assert_eq!(listed, vec!["c"]);
    }

    #[test]
    fn test_record_failure() {
        let mut checkpoint = WorkflowCheckpoint::new(request("r1"));
        let error = MigrationError::Deployment {
            message: "rollback".to_string(),
        };
        checkpoint.record_failure(Stage::Deploy, &error, 3);
        assert_eq!(checkpoint.status, WorkflowState::Failed);
        assert_eq!(checkpoint.failed_stage, Some(Stage::Deploy));
        assert_eq!(checkpoint.last_error.as_deref(), Some("deployment failed: rollback"));
        assert_eq!(checkpoint.attempt_counts[&Stage::Deploy], 3);
    }

    #[test]
    fn test_stage_order_and_states() {
        assert_eq!(Stage::ALL[0], Stage::Extract);
        assert_eq!(Stage::ValidateSource.state(), WorkflowState::Validating);
        assert_eq!(Stage::ValidateTarget.state(), WorkflowState::Validating);
        assert_eq!(
            serde_json::to_string(&Stage::ValidateTarget).unwrap(),
            "\"validate_target\""
        );
        assert!(WorkflowState::Failed.is_terminal());
        assert!(!WorkflowState::Deploying.is_terminal());
    }
}
