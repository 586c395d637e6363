//! Run log: ordered timeline of what a selection run did.
//!
//! Attached to the [`RunSummary`](crate::stats::RunSummary) at the end of a
//! run and persisted with it through the `RunRecorder`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::budget::StopReason;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunEvent {
    pub seq: u32,
    pub ts: DateTime<Utc>,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EventKind {
    ItemsLoaded {
        count: usize,
    },
    DomainFiltered {
        kept: usize,
        excluded: usize,
    },
    EmbeddingsFilled {
        computed: usize,
        failed: usize,
    },
    ClustersFormed {
        category: String,
        items: usize,
        clusters: usize,
    },
    WorkListCollected {
        items: usize,
        rounds: usize,
    },
    TopicLocked {
        category: String,
        fingerprint: String,
        locked_by: Uuid,
    },
    GenerationFailed {
        category: String,
        cluster_size: usize,
        error: String,
    },
    DuplicateRejected {
        category: String,
        title: String,
        check: String,
        reason: String,
    },
    ContentCommitted {
        content_id: Uuid,
        category: String,
        title: String,
        confidence: f64,
        published: bool,
        sources: usize,
    },
    CommitFailed {
        category: String,
        error: String,
    },
    SideEffectFailed {
        operation: String,
        error: String,
    },
    BudgetStop {
        reason: StopReason,
        processed: usize,
    },
}

pub struct RunLog {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    events: Vec<RunEvent>,
    seq: u32,
}

impl RunLog {
    pub fn new(run_id: Uuid) -> Self {
        Self {
            run_id,
            started_at: Utc::now(),
            events: Vec::new(),
            seq: 0,
        }
    }

    pub fn log(&mut self, kind: EventKind) {
        self.events.push(RunEvent {
            seq: self.seq,
            ts: Utc::now(),
            kind,
        });
        self.seq += 1;
    }

    pub fn len(&self) -> usize {
        self.events.len()
    }

    pub fn is_empty(&self) -> bool {
        self.events.is_empty()
    }

    pub fn into_events(self) -> Vec<RunEvent> {
        self.events
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn events_are_sequenced() {
        let mut log = RunLog::new(Uuid::new_v4());
        log.log(EventKind::ItemsLoaded { count: 4 });
        log.log(EventKind::WorkListCollected { items: 2, rounds: 1 });
        let events = log.into_events();
        assert_eq!(events.iter().map(|e| e.seq).collect::<Vec<_>>(), vec![0, 1]);
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let mut log = RunLog::new(Uuid::new_v4());
        log.log(EventKind::BudgetStop {
            reason: StopReason::TimeBudget,
            processed: 7,
        });
        let json = serde_json::to_value(log.into_events()).unwrap();
        assert_eq!(json[0]["type"], "budget_stop");
        assert_eq!(json[0]["reason"], "time_budget");
        assert_eq!(json[0]["processed"], 7);
        assert_eq!(json[0]["seq"], 0);
    }
}
