//! Pipeline definitions, loading, and default seeding.
//!
//! Pipelines are defined as one JSON document per file (camelCase keys,
//! keyed by id) and resolved from the pipelines directory by exact filename
//! match, falling back to substring match.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;
use tracing::{debug, info};

use crate::error::EngineError;

/// Default per-stage timeout when neither the stage nor the pipeline sets
/// one: 5 minutes.
pub const DEFAULT_STAGE_TIMEOUT_MS: u64 = 300_000;

/// A complete pipeline definition.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineConfig {
    /// Pipeline id (used in the CLI and as the definition filename)
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Human-readable description
    #[serde(default)]
    pub description: String,

    /// Stages with dependency edges; ids must be unique
    pub stages: Vec<PipelineStage>,

    /// Environment entries applied to every stage
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,

    /// Default per-stage timeout in milliseconds
    #[serde(default = "default_timeout_ms")]
    pub timeout: u64,

    /// Default per-stage retry count
    #[serde(default)]
    pub retries: u32,

    /// What a non-tolerated stage failure does to the rest of the run
    #[serde(default)]
    pub on_failure: FailurePolicy,
}

fn default_timeout_ms() -> u64 {
    DEFAULT_STAGE_TIMEOUT_MS
}

impl PipelineConfig {
    /// Load a pipeline definition from a JSON file.
    pub async fn from_file(path: &Path) -> Result<Self, EngineError> {
        let content = fs::read_to_string(path).await?;
        Self::from_json(&content)
    }

    /// Parse a pipeline definition from JSON content.
    pub fn from_json(content: &str) -> Result<Self, EngineError> {
        let config: Self = serde_json::from_str(content)?;
        Ok(config)
    }

    /// Enforce the structural invariants of a definition: non-empty id,
    /// at least one stage, unique stage ids, and `dependsOn` entries that
    /// reference stages in this config.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.id.is_empty() {
            return Err(EngineError::InvalidPipeline(
                "pipeline id cannot be empty".to_string(),
            ));
        }
        if self.stages.is_empty() {
            return Err(EngineError::InvalidPipeline(format!(
                "pipeline '{}' has no stages",
                self.id
            )));
        }

        let mut seen: HashSet<&str> = HashSet::new();
        for stage in &self.stages {
            if stage.id.is_empty() {
                return Err(EngineError::InvalidPipeline(format!(
                    "pipeline '{}' contains a stage with an empty id",
                    self.id
                )));
            }
            if !seen.insert(stage.id.as_str()) {
                return Err(EngineError::InvalidPipeline(format!(
                    "duplicate stage id '{}'",
                    stage.id
                )));
            }
        }

        for stage in &self.stages {
            for dep in &stage.depends_on {
                if !seen.contains(dep.as_str()) {
                    return Err(EngineError::UnknownDependency {
                        stage: stage.id.clone(),
                        dependency: dep.clone(),
                    });
                }
            }
        }

        Ok(())
    }

    /// Get a stage by id.
    pub fn stage(&self, id: &str) -> Option<&PipelineStage> {
        self.stages.iter().find(|s| s.id == id)
    }
}

/// A single stage in a pipeline.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineStage {
    /// Stage id (unique within the pipeline)
    pub id: String,

    /// Human-readable name
    pub name: String,

    /// Shell command line to run
    pub command: String,

    /// Working directory for the command
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub working_dir: Option<String>,

    /// Environment entries layered over the pipeline environment
    #[serde(default, skip_serializing_if = "HashMap::is_empty")]
    pub environment: HashMap<String, String>,

    /// Boolean expression gating execution; absent means always run
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub condition: Option<String>,

    /// Timeout override in milliseconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout: Option<u64>,

    /// Retry count override
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub retries: Option<u32>,

    /// Whether this stage's failure is tolerated by the run
    #[serde(default)]
    pub continue_on_error: bool,

    /// Ids of stages that must settle before this one starts
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub depends_on: Vec<String>,
}

impl PipelineStage {
    /// Effective timeout window for one attempt of this stage.
    pub fn effective_timeout(&self, pipeline: &PipelineConfig) -> Duration {
        Duration::from_millis(self.timeout.unwrap_or(pipeline.timeout))
    }

    /// Effective retry count: stage override, then pipeline default.
    pub fn effective_retries(&self, pipeline: &PipelineConfig) -> u32 {
        self.retries.unwrap_or(pipeline.retries)
    }
}

/// What a non-tolerated stage failure does to the remaining levels.
///
/// `Retry` is declared in the data model but whole-level retry semantics are
/// unspecified; the orchestrator treats it as `Stop` and logs a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Abort remaining levels (the default)
    Stop,

    /// Record the failure and keep going
    Continue,

    /// Reserved; behaves as `Stop`
    Retry,
}

impl Default for FailurePolicy {
    fn default() -> Self {
        Self::Stop
    }
}

/// Filesystem-backed store of pipeline definitions.
pub struct PipelineStore {
    dir: PathBuf,
}

impl PipelineStore {
    /// Create a store over a definitions directory.
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    /// Open the store at the configured pipelines directory.
    pub fn open_default() -> anyhow::Result<Self> {
        Ok(Self::new(crate::config::pipelines_dir()?))
    }

    /// The directory definitions live in.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Resolve a pipeline id to a validated definition.
    ///
    /// Tries the exact filename `<id>.json` first, then falls back to a
    /// substring match among available definition files.
    pub async fn load(&self, pipeline_id: &str) -> Result<PipelineConfig, EngineError> {
        let exact = self.dir.join(format!("{}.json", pipeline_id));
        let path = if exact.exists() {
            exact
        } else {
            self.find_by_substring(pipeline_id)
                .await?
                .ok_or_else(|| EngineError::ConfigNotFound(pipeline_id.to_string()))?
        };

        debug!(pipeline = pipeline_id, path = %path.display(), "loading pipeline definition");
        let config = PipelineConfig::from_file(&path).await?;
        config.validate()?;
        Ok(config)
    }

    /// All parsed definitions, sorted by id. Files that fail to parse are
    /// skipped with a log line rather than failing the listing.
    pub async fn list(&self) -> Result<Vec<PipelineConfig>, EngineError> {
        let mut configs = Vec::new();
        for path in self.definition_files().await? {
            match PipelineConfig::from_file(&path).await {
                Ok(config) => configs.push(config),
                Err(e) => {
                    tracing::warn!(path = %path.display(), error = %e, "skipping unparseable definition");
                }
            }
        }
        configs.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(configs)
    }

    /// Seed the bundled default definitions. Idempotent: a definition file
    /// is written only if absent, never overwritten.
    pub async fn seed_defaults(&self) -> Result<(), EngineError> {
        fs::create_dir_all(&self.dir).await?;

        for config in default_pipelines() {
            let path = self.dir.join(format!("{}.json", config.id));
            if path.exists() {
                continue;
            }
            let json = serde_json::to_string_pretty(&config)?;
            fs::write(&path, json).await?;
            info!(pipeline = %config.id, path = %path.display(), "seeded default pipeline");
        }

        Ok(())
    }

    async fn definition_files(&self) -> Result<Vec<PathBuf>, EngineError> {
        let mut paths = Vec::new();
        if !self.dir.exists() {
            return Ok(paths);
        }

        let mut entries = fs::read_dir(&self.dir).await?;
        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if path.extension().is_some_and(|ext| ext == "json") {
                paths.push(path);
            }
        }
        paths.sort();
        Ok(paths)
    }

    async fn find_by_substring(&self, needle: &str) -> Result<Option<PathBuf>, EngineError> {
        // definition_files() sorts, so substring fallback is deterministic.
        for path in self.definition_files().await? {
            let matched = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .is_some_and(|stem| stem.contains(needle));
            if matched {
                return Ok(Some(path));
            }
        }
        Ok(None)
    }
}

/// The fixed named set of bundled default pipelines.
pub fn default_pipelines() -> Vec<PipelineConfig> {
    vec![
        PipelineConfig {
            id: "ci".to_string(),
            name: "Continuous integration".to_string(),
            description: "Install, check, build, and test".to_string(),
            stages: vec![
                PipelineStage {
                    id: "install".to_string(),
                    name: "Install dependencies".to_string(),
                    command: "npm install".to_string(),
                    working_dir: None,
                    environment: HashMap::new(),
                    condition: None,
                    timeout: None,
                    retries: Some(1),
                    continue_on_error: false,
                    depends_on: Vec::new(),
                },
                PipelineStage {
                    id: "lint".to_string(),
                    name: "Lint".to_string(),
                    command: "npm run lint".to_string(),
                    working_dir: None,
                    environment: HashMap::new(),
                    condition: None,
                    timeout: None,
                    retries: None,
                    continue_on_error: true,
                    depends_on: vec!["install".to_string()],
                },
                PipelineStage {
                    id: "typecheck".to_string(),
                    name: "Type check".to_string(),
                    command: "npm run typecheck".to_string(),
                    working_dir: None,
                    environment: HashMap::new(),
                    condition: None,
                    timeout: None,
                    retries: None,
                    continue_on_error: false,
                    depends_on: vec!["install".to_string()],
                },
                PipelineStage {
                    id: "build".to_string(),
                    name: "Build".to_string(),
                    command: "npm run build".to_string(),
                    working_dir: None,
                    environment: HashMap::new(),
                    condition: None,
                    timeout: None,
                    retries: None,
                    continue_on_error: false,
                    depends_on: vec!["typecheck".to_string()],
                },
                PipelineStage {
                    id: "test".to_string(),
                    name: "Test".to_string(),
                    command: "npm test".to_string(),
                    working_dir: None,
                    environment: HashMap::new(),
                    condition: None,
                    timeout: None,
                    retries: None,
                    continue_on_error: false,
                    depends_on: vec!["build".to_string()],
                },
            ],
            environment: HashMap::from([("CI".to_string(), "true".to_string())]),
            timeout: DEFAULT_STAGE_TIMEOUT_MS,
            retries: 0,
            on_failure: FailurePolicy::Stop,
        },
        PipelineConfig {
            id: "release".to_string(),
            name: "Release build".to_string(),
            description: "Clean build and package for release".to_string(),
            stages: vec![
                PipelineStage {
                    id: "clean".to_string(),
                    name: "Clean".to_string(),
                    command: "npm run clean".to_string(),
                    working_dir: None,
                    environment: HashMap::new(),
                    condition: None,
                    timeout: None,
                    retries: None,
                    continue_on_error: false,
                    depends_on: Vec::new(),
                },
                PipelineStage {
                    id: "build".to_string(),
                    name: "Build".to_string(),
                    command: "npm run build".to_string(),
                    working_dir: None,
                    environment: HashMap::from([(
                        "NODE_ENV".to_string(),
                        "production".to_string(),
                    )]),
                    condition: None,
                    timeout: None,
                    retries: None,
                    continue_on_error: false,
                    depends_on: vec!["clean".to_string()],
                },
                PipelineStage {
                    id: "package".to_string(),
                    name: "Package".to_string(),
                    command: "npm pack".to_string(),
                    working_dir: None,
                    environment: HashMap::new(),
                    condition: Some("SKIP_PACKAGE !== 'true'".to_string()),
                    timeout: None,
                    retries: None,
                    continue_on_error: false,
                    depends_on: vec!["build".to_string()],
                },
            ],
            environment: HashMap::new(),
            timeout: DEFAULT_STAGE_TIMEOUT_MS,
            retries: 0,
            on_failure: FailurePolicy::Stop,
        },
    ]
}
