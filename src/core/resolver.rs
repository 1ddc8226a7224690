//! Dependency resolution: flat stage lists into parallel-safe levels.
//!
//! Each stage is assigned `level = 1 + max(level of its dependencies)`, or 0
//! with no dependencies, via a depth-first traversal with visiting/visited
//! marking. Every dependency of a stage lands in a strictly lower level, so
//! a level's stages can run concurrently once all earlier levels settled.

use std::collections::{HashMap, HashSet};

use crate::core::pipeline::PipelineStage;
use crate::error::EngineError;

/// Resolve stages into ordered levels.
///
/// Within a level, stages keep their original declaration order so display
/// and logging stay deterministic. A stage re-encountered while still being
/// visited signals a cycle; an unknown `dependsOn` id is a fatal lookup
/// error.
pub fn resolve_levels(stages: &[PipelineStage]) -> Result<Vec<Vec<PipelineStage>>, EngineError> {
    let by_id: HashMap<&str, &PipelineStage> =
        stages.iter().map(|s| (s.id.as_str(), s)).collect();

    let mut levels: HashMap<String, usize> = HashMap::new();
    let mut visiting: HashSet<String> = HashSet::new();

    for stage in stages {
        visit(stage, &by_id, &mut visiting, &mut levels)?;
    }

    let depth = levels.values().copied().max().map_or(0, |max| max + 1);
    let mut grouped: Vec<Vec<PipelineStage>> = vec![Vec::new(); depth];
    for stage in stages {
        grouped[levels[&stage.id]].push(stage.clone());
    }

    Ok(grouped)
}

fn visit(
    stage: &PipelineStage,
    by_id: &HashMap<&str, &PipelineStage>,
    visiting: &mut HashSet<String>,
    levels: &mut HashMap<String, usize>,
) -> Result<usize, EngineError> {
    if let Some(level) = levels.get(&stage.id) {
        return Ok(*level);
    }
    if visiting.contains(&stage.id) {
        return Err(EngineError::CycleDetected(stage.id.clone()));
    }

    visiting.insert(stage.id.clone());

    let mut level = 0;
    for dep_id in &stage.depends_on {
        let dep = by_id
            .get(dep_id.as_str())
            .ok_or_else(|| EngineError::UnknownDependency {
                stage: stage.id.clone(),
                dependency: dep_id.clone(),
            })?;
        level = level.max(visit(dep, by_id, visiting, levels)? + 1);
    }

    visiting.remove(&stage.id);
    levels.insert(stage.id.clone(), level);

    Ok(level)
}
