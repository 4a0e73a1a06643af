//! Message pipeline: one bus message in, at most one store write out.
//!
//! Handling is split in two so that order is fixed where messages arrive:
//! - [`Ingestor::admit`] runs on the receiving task and never awaits. Status
//!   messages are decoded and canonicalized there and take a turn on their
//!   slot; illegal batches take a turn on the single illegal lane.
//! - [`Ingestor::process`] runs anywhere. It waits for the turn, then does
//!   lookup → reconcile → apply (status) or decode → apply batch (illegal).
//!
//! Turns for one key are granted in admission order, so the last message to
//! arrive for a slot, or the last batch, is the one left in the store.

use std::sync::Arc;

use park_db::{IllegalBatch, StatusWrite};
use park_reconcile::{
    normalize_slot_id, normalize_status, parse_event_timestamp, reconcile, BatchOutcome, Decision,
    SlotId, SlotObservation,
};
use park_schemas::{IllegalPayload, StatusPayload};
use serde_json::Value;
use tracing::{debug, error, warn};

use crate::context::IngestContext;
use crate::error::IngestError;
use crate::locks::Ticket;

/// What one successfully handled message did.
#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Slot(Decision),
    Batch(BatchOutcome),
}

/// A message with its place in line already taken.
#[derive(Debug)]
pub struct Admitted {
    topic: String,
    body: Body,
}

#[derive(Debug)]
enum Body {
    Status {
        raw: Value,
        obs: SlotObservation,
        turn: Ticket<SlotId>,
    },
    Illegal {
        payload: Vec<u8>,
        turn: Ticket<()>,
    },
    Rejected(IngestError),
}

impl Admitted {
    pub fn topic(&self) -> &str {
        &self.topic
    }
}

#[derive(Debug, Clone)]
pub struct Ingestor {
    ctx: Arc<IngestContext>,
}

impl Ingestor {
    pub fn new(ctx: Arc<IngestContext>) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &Arc<IngestContext> {
        &self.ctx
    }

    /// Route one message by topic and take its turn. Must be called in
    /// arrival order.
    pub fn admit(&self, topic: &str, payload: &[u8]) -> Admitted {
        self.ctx.stats.record_received();

        let topics = &self.ctx.settings.topics;
        let body = if topic == topics.status {
            match decode_status(topic, payload) {
                Ok((raw, obs)) => {
                    let turn = self.ctx.slot_locks.reserve(obs.slot);
                    Body::Status { raw, obs, turn }
                }
                Err(e) => Body::Rejected(e),
            }
        } else if topic == topics.illegal {
            Body::Illegal {
                payload: payload.to_vec(),
                turn: self.ctx.illegal_lane.reserve(()),
            }
        } else {
            Body::Rejected(IngestError::UnknownTopic(topic.to_string()))
        };

        Admitted {
            topic: topic.to_string(),
            body,
        }
    }

    /// Apply an admitted message once its turn comes.
    pub async fn process(&self, msg: Admitted) -> Result<Outcome, IngestError> {
        let Admitted { topic, body } = msg;
        let res = match body {
            Body::Status { raw, obs, turn } => self
                .apply_status(&topic, raw, obs, turn)
                .await
                .map(Outcome::Slot),
            Body::Illegal { payload, turn } => self
                .apply_illegal(&topic, &payload, turn)
                .await
                .map(Outcome::Batch),
            Body::Rejected(e) => Err(e),
        };

        let stats = &self.ctx.stats;
        match &res {
            Ok(Outcome::Slot(d)) => stats.record_decision(d),
            Ok(Outcome::Batch(o)) => stats.record_batch(*o),
            Err(e) => stats.record_error(e),
        }
        res
    }

    /// Admit and process in one step.
    pub async fn handle(&self, topic: &str, payload: &[u8]) -> Result<Outcome, IngestError> {
        let msg = self.admit(topic, payload);
        self.process(msg).await
    }

    /// Process an admitted message and log the result. Errors are counted
    /// and dropped; this never fails.
    pub async fn dispatch(&self, msg: Admitted) {
        let topic = msg.topic.clone();
        let topic = topic.as_str();
        match self.process(msg).await {
            Ok(Outcome::Slot(d)) => {
                debug!(topic, slot = %d.slot(), decision = d.kind(), "status applied");
            }
            Ok(Outcome::Batch(o)) => {
                debug!(topic, outcome = o.kind(), "illegal batch handled");
            }
            Err(e @ IngestError::Storage(_)) => {
                error!(topic, error.kind = e.kind(), error = %e, "message dropped");
            }
            Err(e) => {
                warn!(topic, error.kind = e.kind(), error = %e, "message dropped");
            }
        }
    }

    async fn apply_status(
        &self,
        topic: &str,
        raw: Value,
        obs: SlotObservation,
        turn: Ticket<SlotId>,
    ) -> Result<Decision, IngestError> {
        let store = &self.ctx.store;
        let _turn = turn.wait().await;

        let prior = store
            .lookup_prior(obs.slot, &obs.label)
            .await
            .map_err(IngestError::Storage)?;
        let decision = reconcile(&obs, prior.as_ref());

        store
            .apply_decision(&StatusWrite {
                decision: &decision,
                label: &obs.label,
                payload: &raw,
                topic,
                now: self.ctx.clock.now(),
            })
            .await
            .map_err(IngestError::Storage)?;

        Ok(decision)
    }

    async fn apply_illegal(
        &self,
        topic: &str,
        payload: &[u8],
        turn: Ticket<()>,
    ) -> Result<BatchOutcome, IngestError> {
        // Decoding overlaps the batch ahead; only the write waits.
        let msg: IllegalPayload =
            serde_json::from_slice(payload).map_err(|source| IngestError::InvalidPayload {
                topic: topic.to_string(),
                source,
            })?;

        let decoded = msg.decode_cars();
        if decoded.skipped > 0 {
            warn!(topic, skipped = decoded.skipped, "non-object car entries ignored");
        }
        if decoded.cars.len() != msg.count as usize {
            debug!(topic, count = msg.count, cars = decoded.cars.len(), "car count differs from cars");
        }
        let event_ts = msg.timestamp.as_ref().and_then(parse_event_timestamp);

        let _turn = turn.wait().await;

        let batch = IllegalBatch {
            count: msg.count,
            cars: decoded.cars,
            event_ts,
            received_at: self.ctx.clock.now(),
            topic: topic.to_string(),
        };
        let ordering = self.ctx.settings.ingest.illegal_ordering;
        let outcome = self
            .ctx
            .store
            .apply_batch(&batch, ordering)
            .await
            .map_err(IngestError::Storage)?;

        if outcome == BatchOutcome::SkippedStale {
            warn!(
                topic,
                ordering = ordering.as_str(),
                event_ts = ?batch.event_ts,
                "stale illegal batch skipped"
            );
        }
        Ok(outcome)
    }
}

/// Decode and canonicalize a status message. The raw JSON is kept whole for
/// the first-seen record.
fn decode_status(topic: &str, payload: &[u8]) -> Result<(Value, SlotObservation), IngestError> {
    let invalid = |source| IngestError::InvalidPayload {
        topic: topic.to_string(),
        source,
    };
    let raw: Value = serde_json::from_slice(payload).map_err(invalid)?;
    let msg: StatusPayload = serde_json::from_value(raw.clone()).map_err(invalid)?;

    let obs = SlotObservation {
        slot: normalize_slot_id(&msg.slot)?,
        status: normalize_status(&msg.status)?,
        label: msg.slot,
        confidence: msg.confidence,
    };
    Ok((raw, obs))
}
