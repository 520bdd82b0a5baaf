use serde::{Deserialize, Serialize};

/// Dedup ledger entry for a delivered billing event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessedEvent {
    pub event_id: String,
    pub event_type: String,
    pub processed_at: i64,
}
