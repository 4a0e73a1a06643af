use crate::{Decision, PriorState, SlotId, SlotObservation};

/// Decide what an observation means relative to the last known state of its
/// slot.
///
/// - no prior record => `FirstSeen`
/// - prior record with the same status => `NoOp` on that record
/// - prior record with a different status => `Transition` replacing it
///
/// A prior record is accepted only if it matches the observation under the
/// dual-key rule; a mismatched record is treated as absent.
pub fn reconcile(obs: &SlotObservation, prior: Option<&PriorState>) -> Decision {
    let prior = prior.filter(|p| p.key.matches(obs.slot, &obs.label));

    match prior {
        None => Decision::FirstSeen {
            slot: obs.slot,
            status: obs.status,
            confidence: obs.confidence,
        },
        Some(p) if p.status == obs.status => Decision::NoOp {
            slot: obs.slot,
            key: p.key.clone(),
        },
        Some(p) => Decision::Transition {
            slot: obs.slot,
            status: obs.status,
            confidence: obs.confidence,
            replaces: p.key.clone(),
        },
    }
}

/// Callback form of [`reconcile`]: `lookup` receives the canonical id and
/// the original label and returns whichever record matches either.
pub fn reconcile_with<F>(obs: &SlotObservation, lookup: F) -> Decision
where
    F: FnOnce(SlotId, &str) -> Option<PriorState>,
{
    let prior = lookup(obs.slot, &obs.label);
    reconcile(obs, prior.as_ref())
}
