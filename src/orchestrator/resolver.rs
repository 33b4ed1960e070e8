//! Dependency resolution
//!
//! Works on an immutable snapshot of the whole builder set taken at the
//! start of an iteration, so in-flight changes from the current wave are
//! never observed.

use std::collections::HashMap;
use tracing::debug;

use crate::models::Builder;

/// Partition of the pending builders for one iteration (by builder id)
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Resolution {
    pub eligible: Vec<String>,
    pub blocked: Vec<String>,
    /// Builders whose dependency finished with the wrong state or return code
    pub failed: Vec<(String, String)>,
}

enum Verdict {
    Satisfied,
    Blocked,
    Mismatch(String),
}

pub struct DependencyResolver;

impl DependencyResolver {
    /// Classify every PENDING builder in `snapshot`, preserving its order
    pub fn resolve(snapshot: &[Builder]) -> Resolution {
        let mut by_name: HashMap<&str, Vec<&Builder>> = HashMap::new();
        for builder in snapshot {
            by_name.entry(builder.name.as_str()).or_default().push(builder);
        }

        let mut resolution = Resolution::default();
        for builder in snapshot.iter().filter(|b| b.is_pending()) {
            match Self::evaluate(builder, &by_name) {
                Verdict::Satisfied => resolution.eligible.push(builder.id.clone()),
                Verdict::Blocked => resolution.blocked.push(builder.id.clone()),
                Verdict::Mismatch(reason) => {
                    resolution.failed.push((builder.id.clone(), reason))
                }
            }
        }

        debug!(
            "Resolved {} eligible, {} blocked, {} failed",
            resolution.eligible.len(),
            resolution.blocked.len(),
            resolution.failed.len()
        );
        resolution
    }

    fn evaluate(builder: &Builder, by_name: &HashMap<&str, Vec<&Builder>>) -> Verdict {
        let mut blocked = false;

        for dep in &builder.needs {
            let Some(matches) = by_name.get(dep.name.as_str()) else {
                debug!(
                    "{}: dependency '{}' is not part of this run, treating as satisfied",
                    builder, dep.name
                );
                continue;
            };

            if matches.iter().any(|m| !m.is_terminal()) {
                blocked = true;
                continue;
            }

            if let Some(other) = matches.iter().find(|m| !dep.satisfied_by(m)) {
                return Verdict::Mismatch(mismatch_reason(dep, other));
            }
        }

        if blocked {
            Verdict::Blocked
        } else {
            Verdict::Satisfied
        }
    }
}

fn mismatch_reason(dep: &crate::models::Dependency, other: &Builder) -> String {
    let mut expected = Vec::new();
    if let Some(state) = dep.state {
        expected.push(format!("state {state}"));
    }
    if let Some(codes) = &dep.returncode {
        expected.push(format!("returncode in {codes:?}"));
    }
    let actual = match other.result.returncode {
        Some(code) => format!("{} with returncode {}", other.state, code),
        None => other.state.to_string(),
    };
    format!(
        "dependency '{}' expected {} but ended {}",
        dep.name,
        expected.join(" and "),
        actual
    )
}
