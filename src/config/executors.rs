//! Executor settings as written in the configuration file
//!
//! Executors are grouped by back-end type, then by name:
//!
//! ```yaml
//! executors:
//!   local:
//!     bash:
//!       shell: bash
//!   slurm:
//!     debug:
//!       partition: debug
//!       max_pend_time: 120
//! ```
//!
//! which yields the executors `local.bash` and `slurm.debug`.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Settings for a local shell executor
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct LocalSettings {
    #[serde(default)]
    pub description: Option<String>,

    /// Shell used to run the test script
    #[serde(default = "default_shell")]
    pub shell: String,

    #[serde(default)]
    pub before_script: Option<String>,

    #[serde(default)]
    pub after_script: Option<String>,

    /// Per-test wall-clock limit, overrides the runner default
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl Default for LocalSettings {
    fn default() -> Self {
        Self {
            description: None,
            shell: default_shell(),
            before_script: None,
            after_script: None,
            timeout_secs: None,
        }
    }
}

/// Settings shared by the Slurm, LSF, PBS and Torque executors
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct BatchSettings {
    #[serde(default)]
    pub description: Option<String>,

    /// Queue, or partition for Slurm
    #[serde(default, alias = "partition")]
    pub queue: Option<String>,

    #[serde(default)]
    pub qos: Option<String>,

    /// Slurm cluster for multi-cluster setups
    #[serde(default)]
    pub cluster: Option<String>,

    #[serde(default)]
    pub account: Option<String>,

    /// Extra launcher flags appended to the submit command
    #[serde(default)]
    pub options: Vec<String>,

    #[serde(default)]
    pub before_script: Option<String>,

    #[serde(default)]
    pub after_script: Option<String>,

    /// Seconds a job may stay queued before it is cancelled
    #[serde(default)]
    pub max_pend_time: Option<u64>,

    /// Limit on the submission command itself
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

/// Settings for a container runtime executor
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ContainerSettings {
    #[serde(default)]
    pub description: Option<String>,

    /// Runtime binary, `docker` or `podman`
    #[serde(default = "default_runtime")]
    pub runtime: String,

    pub image: String,

    /// Shell inside the container
    #[serde(default = "default_container_shell")]
    pub shell: String,

    /// Extra `run` flags
    #[serde(default)]
    pub options: Vec<String>,

    #[serde(default)]
    pub before_script: Option<String>,

    #[serde(default)]
    pub after_script: Option<String>,

    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

impl ContainerSettings {
    pub fn new(image: impl Into<String>) -> Self {
        Self {
            description: None,
            runtime: default_runtime(),
            image: image.into(),
            shell: default_container_shell(),
            options: Vec::new(),
            before_script: None,
            after_script: None,
            timeout_secs: None,
        }
    }
}

/// Values inherited by batch executors that do not set their own
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExecutorDefaults {
    #[serde(default)]
    pub account: Option<String>,

    #[serde(default)]
    pub max_pend_time: Option<u64>,
}

/// All configured executors, grouped by type
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExecutorsConfig {
    #[serde(default)]
    pub defaults: ExecutorDefaults,

    #[serde(default)]
    pub local: BTreeMap<String, LocalSettings>,

    #[serde(default)]
    pub slurm: BTreeMap<String, BatchSettings>,

    #[serde(default)]
    pub lsf: BTreeMap<String, BatchSettings>,

    #[serde(default)]
    pub pbs: BTreeMap<String, BatchSettings>,

    #[serde(default)]
    pub torque: BTreeMap<String, BatchSettings>,

    #[serde(default)]
    pub container: BTreeMap<String, ContainerSettings>,
}

impl ExecutorsConfig {
    /// Config with only `local.bash` and `local.sh`
    pub fn local_only() -> Self {
        let mut local = BTreeMap::new();
        local.insert("bash".to_string(), LocalSettings::default());
        local.insert(
            "sh".to_string(),
            LocalSettings {
                shell: "sh".to_string(),
                ..Default::default()
            },
        );
        Self {
            local,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.local.len()
            + self.slurm.len()
            + self.lsf.len()
            + self.pbs.len()
            + self.torque.len()
            + self.container.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

fn default_shell() -> String {
    "bash".to_string()
}

fn default_runtime() -> String {
    "docker".to_string()
}

fn default_container_shell() -> String {
    "sh".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_executors_yaml() {
        let yaml = r#"
defaults:
  account: proj123
  max_pend_time: 60
local:
  bash:
    description: submit jobs on local machine
slurm:
  debug:
    partition: debug
    qos: normal
    options: ["-C haswell"]
container:
  ubuntu:
    image: ubuntu:22.04
"#;
        let config: ExecutorsConfig = serde_yaml::from_str(yaml).unwrap();
        assert_eq!(config.len(), 3);
        assert_eq!(config.local["bash"].shell, "bash");
        assert_eq!(config.slurm["debug"].queue.as_deref(), Some("debug"));
        assert_eq!(config.defaults.max_pend_time, Some(60));
        assert_eq!(config.container["ubuntu"].runtime, "docker");
        assert_eq!(config.container["ubuntu"].shell, "sh");
    }

    #[test]
    fn test_local_only() {
        let config = ExecutorsConfig::local_only();
        assert_eq!(config.len(), 2);
        assert_eq!(config.local["sh"].shell, "sh");
    }
}
