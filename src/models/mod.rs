//! Data models shared by executors, the orchestrator and reporting

mod builder;
mod job;

use anyhow::{Context, Result};
use std::collections::HashSet;
use std::path::Path;

pub use builder::{Builder, BuilderState, Dependency};
pub use job::{Job, JobState};

/// Read the builder list written by the build stage (YAML or JSON)
pub fn load_builders(path: &Path) -> Result<Vec<Builder>> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read builder file: {}", path.display()))?;

    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let builders: Vec<Builder> = if is_json {
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse JSON builders: {}", path.display()))?
    } else {
        serde_yaml::from_str(&content)
            .with_context(|| format!("Failed to parse YAML builders: {}", path.display()))?
    };

    let mut seen = HashSet::new();
    for builder in &builders {
        if !seen.insert(builder.id.as_str()) {
            anyhow::bail!("Duplicate builder id '{}' in {}", builder.id, path.display());
        }
        if !builder.is_pending() || builder.job.is_some() {
            anyhow::bail!(
                "Builder {} in {} was already run (state {}, job {})",
                builder,
                path.display(),
                builder.state,
                builder.job.as_ref().map_or("none", |j| j.id.as_str())
            );
        }
    }

    Ok(builders)
}
