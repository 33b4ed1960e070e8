//! Output formatters for builder results
//!
//! Provides table and JSON renderings of builders, active jobs and run
//! summaries.

use anyhow::Context;
use std::path::Path;

use crate::models::{Builder, BuilderState};
use crate::orchestrator::RunSummary;

/// Output format options
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
    JsonPretty,
}

impl OutputFormat {
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_lowercase().as_str() {
            "table" => Some(OutputFormat::Table),
            "json" => Some(OutputFormat::Json),
            "json-pretty" | "jsonpretty" => Some(OutputFormat::JsonPretty),
            _ => None,
        }
    }
}

/// Result formatter
pub struct ResultFormatter {
    format: OutputFormat,
    colorize: bool,
}

impl ResultFormatter {
    pub fn new(format: OutputFormat) -> Self {
        Self {
            format,
            colorize: true,
        }
    }

    pub fn no_color(mut self) -> Self {
        self.colorize = false;
        self
    }

    fn to_json<T: serde::Serialize + ?Sized>(&self, value: &T) -> String {
        if self.format == OutputFormat::JsonPretty {
            serde_json::to_string_pretty(value).unwrap_or_default()
        } else {
            serde_json::to_string(value).unwrap_or_default()
        }
    }

    fn state_str(&self, state: BuilderState) -> String {
        let plain = format!("{:12}", format!("{} {}", state.symbol(), state));
        if !self.colorize {
            return plain;
        }
        match state {
            BuilderState::Complete => format!("\x1b[32m{plain}\x1b[0m"),
            BuilderState::Failed => format!("\x1b[31m{plain}\x1b[0m"),
            BuilderState::Running => format!("\x1b[33m{plain}\x1b[0m"),
            BuilderState::Pending => plain,
        }
    }

    /// Format a single builder
    pub fn format_builder(&self, builder: &Builder) -> String {
        match self.format {
            OutputFormat::Table => self.format_builder_table(builder),
            OutputFormat::Json | OutputFormat::JsonPretty => self.to_json(builder),
        }
    }

    fn format_builder_table(&self, builder: &Builder) -> String {
        let short_id: String = builder.id.chars().take(8).collect();
        let returncode = builder
            .result
            .returncode
            .map(|c| c.to_string())
            .unwrap_or_else(|| "-".to_string());
        let runtime = builder
            .result
            .runtime
            .map(|d| format!("{:.3}s", d.as_secs_f64()))
            .unwrap_or_else(|| "-".to_string());

        format!(
            "{:24} {:8} {:16} {} {:>4} {:>10}",
            builder.name,
            short_id,
            builder.executor,
            self.state_str(builder.state),
            returncode,
            runtime
        )
    }

    /// Format the builder set, one row per builder
    pub fn format_builders(&self, builders: &[Builder]) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => self.to_json(builders),
            OutputFormat::Table => {
                let mut output = String::new();
                output.push_str(&format!(
                    "{:24} {:8} {:16} {:12} {:>4} {:>10}\n",
                    "name", "id", "executor", "state", "rc", "runtime"
                ));
                output.push_str(&"─".repeat(79));
                output.push('\n');
                for builder in builders {
                    output.push_str(&self.format_builder(builder));
                    output.push('\n');
                    if let (BuilderState::Failed, Some(message)) =
                        (builder.state, &builder.result.message)
                    {
                        output.push_str(&format!("    └─ {message}\n"));
                    }
                }
                output
            }
        }
    }

    /// Format the active batch jobs of one poll tick
    pub fn format_job_table(&self, builders: &[&Builder]) -> String {
        if self.format != OutputFormat::Table {
            let jobs: Vec<_> = builders.iter().filter_map(|b| b.job.as_ref()).collect();
            return self.to_json(&jobs);
        }

        let mut output = String::new();
        output.push_str(&format!(
            "{:24} {:16} {:14} {:10} {:>9} {:>9}\n",
            "name", "executor", "jobid", "jobstate", "elapsed", "pend"
        ));
        for builder in builders {
            let Some(job) = &builder.job else {
                continue;
            };
            output.push_str(&format!(
                "{:24} {:16} {:14} {:10} {:>8.1}s {:>8.1}s\n",
                builder.name,
                builder.executor,
                job.id,
                job.state,
                job.elapsed.as_secs_f64(),
                job.pend_time.as_secs_f64()
            ));
        }
        output
    }

    /// Format run summary
    pub fn format_summary(&self, summary: &RunSummary) -> String {
        match self.format {
            OutputFormat::Json | OutputFormat::JsonPretty => self.to_json(summary),
            OutputFormat::Table => self.format_summary_table(summary),
        }
    }

    fn format_summary_table(&self, summary: &RunSummary) -> String {
        let mut output = String::new();

        output.push_str("\n╔══════════════════════════════════════════════════════════════╗\n");
        output.push_str("║  Test Summary                                                ║\n");
        output.push_str("╠══════════════════════════════════════════════════════════════╣\n");

        let complete_str = if self.colorize {
            format!("\x1b[32m{:4}\x1b[0m", summary.complete)
        } else {
            format!("{:4}", summary.complete)
        };
        let failed_str = if self.colorize && summary.failed > 0 {
            format!("\x1b[31m{:4}\x1b[0m", summary.failed)
        } else {
            format!("{:4}", summary.failed)
        };

        output.push_str(&format!(
            "║  Total: {:4} | Complete: {} | Failed: {} | Waves: {:3}    ║\n",
            summary.total, complete_str, failed_str, summary.waves
        ));
        output.push_str(&format!(
            "║  Success Rate: {:5.1}% | Duration: {:10.1}s               ║\n",
            summary.success_rate(),
            summary.duration.as_secs_f64()
        ));
        output.push_str("╚══════════════════════════════════════════════════════════════╝\n");

        output
    }
}

impl Default for ResultFormatter {
    fn default() -> Self {
        Self::new(OutputFormat::Table)
    }
}

/// Write the builder set as JSON for the reporting stage
pub fn write_builders_to_file(path: &Path, builders: &[Builder]) -> anyhow::Result<()> {
    let content = ResultFormatter::new(OutputFormat::JsonPretty).format_builders(builders);
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            std::fs::create_dir_all(parent)
                .with_context(|| format!("Failed to create directory: {}", parent.display()))?;
        }
    }
    std::fs::write(path, content)
        .with_context(|| format!("Failed to write results: {}", path.display()))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Job;
    use std::time::Duration;
    use tempfile::tempdir;

    fn finished(name: &str, code: i32) -> Builder {
        let mut b = Builder::new(name, "0123456789ab", "local.bash", "/s/t.sh");
        b.mark_running();
        b.finish(code);
        b
    }

    #[test]
    fn test_output_format_from_str() {
        assert_eq!(OutputFormat::from_str("json"), Some(OutputFormat::Json));
        assert_eq!(OutputFormat::from_str("TABLE"), Some(OutputFormat::Table));
        assert_eq!(OutputFormat::from_str("csv"), None);
    }

    #[test]
    fn test_builder_table_row() {
        let formatter = ResultFormatter::new(OutputFormat::Table).no_color();
        let row = formatter.format_builder(&finished("hostname", 0));
        assert!(row.starts_with("hostname"));
        assert!(row.contains("01234567"));
        assert!(!row.contains("89ab"));
        assert!(row.contains("COMPLETE"));
    }

    #[test]
    fn test_failed_builder_shows_reason() {
        let mut b = Builder::new("t", "1", "slurm.debug", "/s/t.sh");
        b.mark_failed("job 12 was cancelled");
        let table = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_builders(&[b]);
        assert!(table.contains("└─ job 12 was cancelled"));
    }

    #[test]
    fn test_builders_json() {
        let json = ResultFormatter::new(OutputFormat::Json).format_builders(&[finished("a", 2)]);
        let parsed: Vec<Builder> = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed[0].state, BuilderState::Failed);
        assert_eq!(parsed[0].result.returncode, Some(2));
    }

    #[test]
    fn test_job_table() {
        let mut b = Builder::new("mpi", "1", "slurm.debug", "/s/t.sh");
        b.mark_running();
        b.job = Some(Job::new("4242"));
        let table = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_job_table(&[&b]);
        assert!(table.lines().nth(1).unwrap().contains("4242"));
        assert!(table.contains("PENDING"));
    }

    #[test]
    fn test_summary_table() {
        let summary = RunSummary::new(&[finished("a", 0), finished("b", 1)], 1, Duration::from_secs(3));
        let text = ResultFormatter::new(OutputFormat::Table)
            .no_color()
            .format_summary(&summary);
        assert!(text.contains("Total:    2"));
        assert!(text.contains("50.0%"));
    }

    #[test]
    fn test_write_builders_to_file() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out").join("results.json");
        write_builders_to_file(&path, &[finished("a", 0)]).unwrap();
        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.contains("\"COMPLETE\""));
    }
}
