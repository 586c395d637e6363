use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::budget::StopReason;
use crate::run_log::RunEvent;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Completed,
    /// Finished, but at least one work item failed to generate or commit.
    CompletedWithErrors,
}

/// Outcome of one selection run. Returned to the trigger surface as JSON
/// and persisted by the run recorder.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub status: RunStatus,
    pub raw_items: usize,
    pub filtered_out: usize,
    pub clusters: usize,
    pub work_items: usize,
    pub rounds: usize,
    pub generated: usize,
    pub committed: usize,
    pub published: usize,
    pub skipped_locked: usize,
    pub rejected_duplicate: usize,
    pub failed: usize,
    pub elapsed_ms: u64,
    /// The budget limit that ended the loop, if one did.
    pub limit_hit: Option<StopReason>,
    #[serde(default)]
    pub events: Vec<RunEvent>,
}

impl RunSummary {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            status: RunStatus::Completed,
            raw_items: 0,
            filtered_out: 0,
            clusters: 0,
            work_items: 0,
            rounds: 0,
            generated: 0,
            committed: 0,
            published: 0,
            skipped_locked: 0,
            rejected_duplicate: 0,
            failed: 0,
            elapsed_ms: 0,
            limit_hit: None,
            events: Vec::new(),
        }
    }

    /// Set the status from the failure count.
    pub fn finish(&mut self, elapsed_ms: u64) {
        self.elapsed_ms = elapsed_ms;
        self.status = if self.failed > 0 {
            RunStatus::CompletedWithErrors
        } else {
            RunStatus::Completed
        };
    }
}

impl std::fmt::Display for RunSummary {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        writeln!(f, "\n=== Selection Run Complete ===")?;
        writeln!(f, "Run:                {}", self.run_id)?;
        writeln!(f, "Raw items:          {}", self.raw_items)?;
        writeln!(f, "Filtered out:       {}", self.filtered_out)?;
        writeln!(f, "Clusters:           {}", self.clusters)?;
        writeln!(f, "Work items:         {} ({} rounds)", self.work_items, self.rounds)?;
        writeln!(f, "Generated:          {}", self.generated)?;
        writeln!(f, "Committed:          {}", self.committed)?;
        writeln!(f, "Published:          {}", self.published)?;
        writeln!(f, "Skipped (locked):   {}", self.skipped_locked)?;
        writeln!(f, "Rejected (dupe):    {}", self.rejected_duplicate)?;
        writeln!(f, "Failed:             {}", self.failed)?;
        match self.limit_hit {
            Some(reason) => writeln!(f, "Stopped by:         {reason}")?,
            None => writeln!(f, "Stopped by:         work list exhausted")?,
        }
        write!(f, "Elapsed:            {:.1}s", self.elapsed_ms as f64 / 1000.0)
    }
}
