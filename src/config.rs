//! Configuration for stagehand paths.
//!
//! Configuration sources (highest priority first):
//! 1. Environment variables (STAGEHAND_HOME, STAGEHAND_PIPELINES)
//! 2. Config file (.stagehand/config.yaml)
//! 3. Defaults (~/.stagehand)
//!
//! Config file discovery:
//! - Searches current directory and parents for .stagehand/config.yaml
//! - Paths in the config file are relative to the config file's directory

use std::path::{Path, PathBuf};
use std::sync::OnceLock;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Global cached configuration (stores Result to handle init errors)
static CONFIG: OnceLock<std::result::Result<ResolvedConfig, String>> = OnceLock::new();

/// Raw config file schema (matches YAML structure)
#[derive(Debug, Clone, Deserialize)]
pub struct ConfigFile {
    pub version: String,
    #[serde(default)]
    pub paths: PathsConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct PathsConfig {
    /// Engine state directory (relative to the config file)
    pub home: Option<String>,
    /// Pipeline definitions directory (relative to the config file)
    pub pipelines: Option<String>,
}

/// Resolved configuration with absolute paths
#[derive(Debug, Clone)]
pub struct ResolvedConfig {
    /// Absolute path to the stagehand home (engine state)
    pub home: PathBuf,
    /// Absolute path to the pipeline definitions directory
    pub pipelines: PathBuf,
    /// Path to the config file (if found)
    pub config_file: Option<PathBuf>,
}

impl ResolvedConfig {
    /// Directory execution records are written to.
    pub fn executions(&self) -> PathBuf {
        self.home.join("executions")
    }
}

/// Find a config file by searching the current directory and parents
fn find_config_file() -> Option<PathBuf> {
    let mut current = std::env::current_dir().ok()?;

    loop {
        let config_path = current.join(".stagehand").join("config.yaml");
        if config_path.exists() {
            return Some(config_path);
        }

        if !current.pop() {
            break;
        }
    }

    None
}

/// Load and parse a config file
fn load_config_file(path: &Path) -> Result<ConfigFile> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    serde_yaml::from_str(&content)
        .with_context(|| format!("Failed to parse config file: {}", path.display()))
}

/// Resolve a path that may be relative to the config file's directory
fn resolve_path(base: &Path, path_str: &str) -> PathBuf {
    let path = PathBuf::from(path_str);
    if path.is_absolute() {
        path
    } else {
        base.join(&path)
            .canonicalize()
            .unwrap_or_else(|_| base.join(path_str))
    }
}

/// Load configuration from all sources
fn load_config() -> Result<ResolvedConfig> {
    let default_home = dirs::home_dir()
        .context("Failed to determine home directory")?
        .join(".stagehand");

    let config_file = find_config_file();

    let (home, pipelines) = if let Some(ref config_path) = config_file {
        let config = load_config_file(config_path)?;
        let stagehand_dir = config_path.parent().unwrap_or(Path::new("."));

        let home = if let Ok(env_home) = std::env::var("STAGEHAND_HOME") {
            PathBuf::from(env_home)
        } else if let Some(ref home_path) = config.paths.home {
            resolve_path(stagehand_dir, home_path)
        } else {
            default_home.clone()
        };

        let pipelines = if let Ok(env_pipelines) = std::env::var("STAGEHAND_PIPELINES") {
            PathBuf::from(env_pipelines)
        } else if let Some(ref pipelines_path) = config.paths.pipelines {
            resolve_path(stagehand_dir, pipelines_path)
        } else {
            home.join("pipelines")
        };

        (home, pipelines)
    } else {
        let home = std::env::var("STAGEHAND_HOME")
            .map(PathBuf::from)
            .unwrap_or_else(|_| default_home.clone());

        let pipelines = std::env::var("STAGEHAND_PIPELINES")
            .map(PathBuf::from)
            .unwrap_or_else(|_| home.join("pipelines"));

        (home, pipelines)
    };

    Ok(ResolvedConfig {
        home,
        pipelines,
        config_file,
    })
}

/// Get the global configuration (loads once, then cached)
pub fn config() -> Result<&'static ResolvedConfig> {
    let result = CONFIG.get_or_init(|| load_config().map_err(|e| e.to_string()));

    match result {
        Ok(config) => Ok(config),
        Err(e) => anyhow::bail!("{}", e),
    }
}

/// Force reload configuration (useful for testing)
pub fn reload_config() -> Result<ResolvedConfig> {
    load_config()
}

/// Get the pipeline definitions directory
pub fn pipelines_dir() -> Result<PathBuf> {
    Ok(config()?.pipelines.clone())
}

/// Get the execution records directory ($STAGEHAND_HOME/executions)
pub fn executions_dir() -> Result<PathBuf> {
    Ok(config()?.executions())
}
