//! Delivery outcome: how a sink reports one batch attempt.

use thiserror::Error;

/// Why a batch was not accepted by the sink.
///
/// Every variant is recoverable: the scheduler records one failure per
/// record and schedules another cycle.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum DeliveryError {
    /// The sink answered, but not with a 2xx.
    #[error("sink returned HTTP {status}: {body}")]
    Status { status: u16, body: String },

    #[error("request timed out")]
    Timeout,

    /// Connection refused, DNS failure, TLS error, malformed response, ...
    #[error("transport error: {0}")]
    Transport(String),
}

impl DeliveryError {
    pub fn status(&self) -> Option<u16> {
        match self {
            DeliveryError::Status { status, .. } => Some(*status),
            DeliveryError::Timeout | DeliveryError::Transport(_) => None,
        }
    }
}

/// Result of sending one batch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    Success { status: u16 },
    Failure(DeliveryError),
}

impl DeliveryOutcome {
    /// Any 2xx is success; everything else is a failure carrying status and body.
    pub fn from_status(status: u16, body: impl Into<String>) -> Self {
        if (200..300).contains(&status) {
            DeliveryOutcome::Success { status }
        } else {
            DeliveryOutcome::Failure(DeliveryError::Status {
                status,
                body: body.into(),
            })
        }
    }

    pub fn is_success(&self) -> bool {
        matches!(self, DeliveryOutcome::Success { .. })
    }
}
