//! Aggregate run statistics and their Prometheus text rendering.

use std::fmt::Write;

use serde::Serialize;
use testrun_core::{RunRecord, RunStatus};

/// Counts of runs by status.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStats {
    pub total: u64,
    pub queued: u64,
    pub running: u64,
    pub passed: u64,
    pub failed: u64,
    pub timeout: u64,
    pub error: u64,
    /// Passed runs as a percentage of terminal runs.
    pub success_rate: f64,
}

impl RunStats {
    pub fn from_records<'a>(records: impl IntoIterator<Item = &'a RunRecord>) -> Self {
        let mut stats = Self::default();
        for record in records {
            stats.total += 1;
            *stats.count_mut(record.status) += 1;
        }

        let terminal = stats.passed + stats.failed + stats.timeout + stats.error;
        if terminal > 0 {
            stats.success_rate = stats.passed as f64 / terminal as f64 * 100.0;
        }
        stats
    }

    pub fn count(&self, status: RunStatus) -> u64 {
        match status {
            RunStatus::Queued => self.queued,
            RunStatus::Running => self.running,
            RunStatus::Passed => self.passed,
            RunStatus::Failed => self.failed,
            RunStatus::Timeout => self.timeout,
            RunStatus::Error => self.error,
        }
    }

    fn count_mut(&mut self, status: RunStatus) -> &mut u64 {
        match status {
            RunStatus::Queued => &mut self.queued,
            RunStatus::Running => &mut self.running,
            RunStatus::Passed => &mut self.passed,
            RunStatus::Failed => &mut self.failed,
            RunStatus::Timeout => &mut self.timeout,
            RunStatus::Error => &mut self.error,
        }
    }

    /// Format as Prometheus text.
    pub fn to_prometheus(&self) -> String {
        let mut output = String::new();

        writeln!(output, "# HELP testrun_runs_total Number of runs by status").ok();
        writeln!(output, "# TYPE testrun_runs_total gauge").ok();
        for status in RunStatus::ALL {
            writeln!(
                output,
                "testrun_runs_total{{status=\"{}\"}} {}",
                status,
                self.count(status)
            )
            .ok();
        }

        writeln!(output).ok();
        writeln!(
            output,
            "# HELP testrun_success_rate_percent Passed runs as a percentage of finished runs"
        )
        .ok();
        writeln!(output, "# TYPE testrun_success_rate_percent gauge").ok();
        writeln!(output, "testrun_success_rate_percent {:.2}", self.success_rate).ok();

        output
    }
}
