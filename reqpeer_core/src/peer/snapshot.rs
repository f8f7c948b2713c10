use serde::Serialize;

use crate::delivery::state::BodyMode;
use crate::types::types::{DeliveryState, RequestId};

/// Running totals a session keeps for its request.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct TransferCounters {
    pub bytes_received: u64,
    pub encoded_bytes_received: u64,
    pub chunks: u64,
    pub bytes_downloaded: u64,
    pub upload_position: u64,
    pub upload_size: u64,
    pub cached_metadata_len: u64,
}

/// Point-in-time view of one request, suitable for reporting.
#[derive(Debug, Clone, Serialize)]
pub struct TransferSnapshot {
    pub request_id: RequestId,
    pub state: DeliveryState,
    pub body_mode: Option<BodyMode>,
    #[serde(flatten)]
    pub counters: TransferCounters,
    /// `Content-Length` of the response, once headers arrived.
    pub expected_bytes: Option<u64>,
    pub elapsed_secs: f64,
    /// Average body throughput in bytes per second.
    pub speed: f64,
}

impl TransferSnapshot {
    /// Body bytes that reached the peer, whichever mode carried them.
    pub fn body_bytes(&self) -> u64 {
        self.counters.bytes_received + self.counters.bytes_downloaded
    }

    /// Fraction of the expected body received, when the length is known.
    pub fn fraction(&self) -> Option<f64> {
        match self.expected_bytes {
            Some(0) => Some(1.0),
            Some(total) => Some((self.body_bytes() as f64 / total as f64).min(1.0)),
            None => None,
        }
    }
}

/// Human-readable byte formatting.
pub fn format_bytes(bytes: u64) -> String {
    const UNITS: [(&str, f64); 3] = [
        ("GB", 1024.0 * 1024.0 * 1024.0),
        ("MB", 1024.0 * 1024.0),
        ("KB", 1024.0),
    ];

    let b = bytes as f64;
    for (unit, scale) in UNITS {
        if b >= scale {
            let precision: usize = if unit == "KB" { 1 } else { 2 };
            return format!("{:.*} {}", precision, b / scale, unit);
        }
    }
    format!("{} B", bytes)
}
