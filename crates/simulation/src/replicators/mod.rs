//! Replication proxies
//!
//! One proxy per replication channel. The orchestrator dispatches the
//! pre-tick / post-tick / reconcile triad to the proxy matching the local
//! role, and serialize / deserialize / dirty-count to the proxy matching the
//! requested target. Proxies borrow the buffers only for the duration of
//! each call; the orchestrator stays the single owner.

pub(crate) mod autonomous;
#[cfg(feature = "debug-capture")]
pub(crate) mod debug;
pub(crate) mod replay;
pub(crate) mod server_rpc;
pub(crate) mod simulated;

use veles_core::{Keyframe, SimTime, TickState};
use veles_protocol::SyncSnapshot;

use crate::{Driver, ReplicationTarget, Simulation, SimulationBuffers, SimulationError};

/// How a simulated proxy advances between received authoritative states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default)]
pub enum SimulatedUpdateMode {
    /// Present slightly in the past, blending between received states.
    #[default]
    Interpolate,

    /// Run the update function forward with synthesized inputs and correct
    /// when real states arrive.
    Extrapolate,
}

/// Result of a reconcile that rewound the local simulation.
#[derive(Debug, Clone, Copy)]
pub(crate) struct RollbackOutcome {
    /// Keyframe the simulation was rewound to.
    pub keyframe: Keyframe,

    /// Last retained input keyframe to replay; equal to `keyframe` when
    /// there is nothing to replay.
    pub replay_to: Keyframe,

    /// Change in total processed simulation time, negative when rewinding.
    pub time_delta: SimTime,
}

/// Calls `finalize_frame` with the sync head if it advanced past the last
/// finalized keyframe.
pub(crate) fn finalize_if_advanced<S: Simulation>(
    driver: &mut dyn Driver<S>,
    buffers: &SimulationBuffers<S>,
    last_finalized: &mut Keyframe,
) {
    if let Some(head) = buffers.sync.head_keyframe() {
        if head > *last_finalized {
            if let Some(state) = buffers.sync.find(head) {
                driver.finalize_frame(state);
                *last_finalized = head;
            }
        }
    }
}

/// Builds the authoritative snapshot at the current sync head.
pub(crate) fn make_snapshot<S: Simulation>(
    buffers: &SimulationBuffers<S>,
    tick_state: &TickState,
    target: ReplicationTarget,
) -> Result<SyncSnapshot<S::Sync, S::Aux>, SimulationError> {
    let keyframe = buffers
        .sync
        .head_keyframe()
        .ok_or(SimulationError::NothingToSerialize(target))?;
    let state = buffers
        .sync
        .find(keyframe)
        .cloned()
        .expect("sync head element must exist");
    let aux = buffers
        .aux
        .find_at_or_before(keyframe)
        .cloned()
        .unwrap_or_default();
    let total_sim_time = tick_state
        .total_processed_at(keyframe)
        .unwrap_or_else(|| tick_state.total_processed_time());
    Ok(SyncSnapshot {
        keyframe,
        total_sim_time,
        state,
        aux,
    })
}

/// Rewrites the local sync, aux and time tracking to match an authoritative
/// snapshot. Retained inputs are untouched; callers that must drop them
/// (observers with synthesized inputs) do so themselves.
pub(crate) fn write_authoritative_state<S: Simulation>(
    buffers: &mut SimulationBuffers<S>,
    tick_state: &mut TickState,
    snapshot: &SyncSnapshot<S::Sync, S::Aux>,
) {
    buffers.sync.reset_next_head_keyframe(snapshot.keyframe);
    *buffers.sync.write_next() = snapshot.state.clone();

    let aux_matches = buffers
        .aux
        .find_at_or_before(snapshot.keyframe)
        .is_some_and(|aux| *aux == snapshot.aux);
    if !aux_matches {
        buffers.aux.reset_next_head_keyframe(snapshot.keyframe);
        *buffers.aux.write_next() = snapshot.aux.clone();
    }

    tick_state.last_processed_input_keyframe = snapshot.keyframe;
    tick_state.set_total_processed(snapshot.total_sim_time, snapshot.keyframe);
}
