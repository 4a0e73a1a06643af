use park_reconcile::CanonicalError;
use thiserror::Error;

/// Why a single bus message was dropped.
///
/// None of these are fatal: the listener logs the error and moves on to the
/// next message.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("invalid payload on {topic}: {source}")]
    InvalidPayload {
        topic: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid slot label {raw:?}")]
    InvalidSlotLabel { raw: String },

    #[error("invalid status {raw}")]
    InvalidStatus { raw: String },

    #[error("no route for topic {0:?}")]
    UnknownTopic(String),

    #[error("storage failure: {0:#}")]
    Storage(#[source] anyhow::Error),
}

impl IngestError {
    /// Stable snake_case tag for logs and counters.
    pub fn kind(&self) -> &'static str {
        match self {
            IngestError::InvalidPayload { .. } => "invalid_payload",
            IngestError::InvalidSlotLabel { .. } => "invalid_slot_label",
            IngestError::InvalidStatus { .. } => "invalid_status",
            IngestError::UnknownTopic(_) => "unknown_topic",
            IngestError::Storage(_) => "storage_failure",
        }
    }
}

impl From<CanonicalError> for IngestError {
    fn from(e: CanonicalError) -> Self {
        match e {
            CanonicalError::InvalidSlotLabel { raw } => IngestError::InvalidSlotLabel { raw },
            CanonicalError::InvalidStatus { raw } => IngestError::InvalidStatus { raw },
        }
    }
}
