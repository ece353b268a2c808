use crate::record::{Disposition, State};
use crate::reference::Reference;

/// Maps a spoiled reference's final state to a disposition (spec §4.2).
///
/// A pure function of `(reference, final_state)`; implementations may
/// inspect the reference pattern and the state but must not have side
/// effects visible outside the returned disposition.
pub trait SpoiledPolicy: Send + Sync {
    fn disposition(&self, reference: &Reference, final_state: State) -> Option<Disposition>;
}

/// The engine's fallback when no policy is configured, or a configured
/// policy returns `None` for a given reference (spec §4.2, Open Question
/// resolved in DESIGN.md: documented configured fallback).
pub struct DefaultSpoiledPolicy;

impl SpoiledPolicy for DefaultSpoiledPolicy {
    fn disposition(&self, _reference: &Reference, _final_state: State) -> Option<Disposition> {
        Some(Disposition::Delete)
    }
}

/// Resolve the disposition for a spoiled reference, applying the default
/// DELETE fallback when `policy` is absent or returns `None`.
pub fn resolve_disposition(
    policy: Option<&dyn SpoiledPolicy>,
    reference: &Reference,
    final_state: State,
) -> Disposition {
    policy
        .and_then(|p| p.disposition(reference, final_state))
        .unwrap_or(Disposition::Delete)
}
