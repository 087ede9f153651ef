//! Run statistics

use crate::config::{MulticastTrigger, PrimitiveKind, ReplyStrategy};
use ipc::MessageLabel;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Counters maintained by the dispatch loop
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerStats {
    /// Decoded requests per label name
    pub requests: BTreeMap<String, u64>,
    /// Clients parked on a wait queue
    pub parks: u64,
    /// Parked clients resumed by a signal
    pub wakeups: u64,
    /// Replies delivered through a captured token
    pub token_deliveries: u64,
    /// "Ready" multicasts sent
    pub broadcasts: u64,
    /// Messages dropped as protocol violations
    pub violations: u64,
}

impl ServerStats {
    pub fn record_request(&mut self, label: MessageLabel) {
        *self.requests.entry(label.name().to_string()).or_insert(0) += 1;
    }

    pub fn requests_for(&self, label: MessageLabel) -> u64 {
        self.requests.get(label.name()).copied().unwrap_or(0)
    }

    pub fn total_requests(&self) -> u64 {
        self.requests.values().sum()
    }

    /// Adds `other`'s counters into these
    pub fn merge(&mut self, other: &ServerStats) {
        for (label, count) in &other.requests {
            *self.requests.entry(label.clone()).or_insert(0) += count;
        }
        self.parks += other.parks;
        self.wakeups += other.wakeups;
        self.token_deliveries += other.token_deliveries;
        self.broadcasts += other.broadcasts;
        self.violations += other.violations;
    }
}

/// Summary produced when every client has terminated
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub population: usize,
    pub primitive: PrimitiveKind,
    pub reply_strategy: ReplyStrategy,
    pub multicast: MulticastTrigger,
    pub final_occupancy: usize,
    /// Occupancy after every change, when tracing was enabled
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub occupancy_trace: Option<Vec<usize>>,
    pub stats: ServerStats,
}

impl RunSummary {
    /// Serializes the summary as pretty-printed JSON
    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string_pretty(self)
    }
}
