//! Stored heartbeat row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::codec::protocol::Heartbeat;

/// One persisted heartbeat
///
/// Carries every decoded field, the time the server received it, and the
/// overall service verdict derived from the decoded fields.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredHeartbeat {
    #[serde(flatten)]
    pub heartbeat: Heartbeat,

    /// When the burst carrying this heartbeat was decoded
    pub reported: DateTime<Utc>,

    /// Final verdict, see [`service_ok`]
    pub service_ok: bool,
}

impl StoredHeartbeat {
    pub fn new(heartbeat: Heartbeat, reported: DateTime<Utc>) -> Self {
        let service_ok = service_ok(&heartbeat);
        Self {
            heartbeat,
            reported,
            service_ok,
        }
    }
}

/// A receiver is serving when it holds signal and service lock and every
/// carousel it reports is healthy
pub fn service_ok(heartbeat: &Heartbeat) -> bool {
    heartbeat.signal_lock
        && heartbeat.service_lock
        && heartbeat
            .carousel_status
            .iter()
            .take(heartbeat.carousel_count as usize)
            .all(|&healthy| healthy)
}
