//! Autonomous proxy channel
//!
//! On the locally controlled client this proxy produces a fresh input every
//! tick and lets the engine predict immediately. Authoritative snapshots
//! arriving from the server are staged by `deserialize` and applied by
//! `reconcile`: if the prediction at the snapshot keyframe diverged, the
//! sync buffer is rewound to the authoritative value, and the retained
//! inputs past it replay on the next tick with their original timing.
//!
//! On the authority the same proxy is the sending side: it snapshots the
//! sync head for the owning client, the keyframe doubling as the input
//! acknowledgment.

use bytes::Bytes;

use veles_core::{Keyframe, SimTime, TickState};
use veles_protocol::{Codec, PostcardCodec, SyncSnapshot};

use super::{make_snapshot, write_authoritative_state, RollbackOutcome};
use crate::{
    Driver, ReplicationTarget, Simulation, SimulationBuffers, SimulationError, SyncState,
};

pub(crate) struct AutonomousReplicator<S: Simulation> {
    /// Snapshot received but not applied yet. Only the newest is kept;
    /// reconciling against an older one after a newer arrived is wasted
    /// work.
    staged_snapshot: Option<SyncSnapshot<S::Sync, S::Aux>>,

    /// Highest snapshot keyframe that passed through this proxy's
    /// serializer, in either direction.
    last_serialized_keyframe: Keyframe,

    /// Last input keyframe the authority has confirmed processing.
    last_acknowledged_input: Keyframe,

    last_finalized_keyframe: Keyframe,
}

impl<S: Simulation> AutonomousReplicator<S> {
    pub(crate) fn new() -> Self {
        Self {
            staged_snapshot: None,
            last_serialized_keyframe: 0,
            last_acknowledged_input: 0,
            last_finalized_keyframe: 0,
        }
    }

    pub(crate) fn last_serialized_keyframe(&self) -> Keyframe {
        self.last_serialized_keyframe
    }

    pub(crate) fn last_acknowledged_input(&self) -> Keyframe {
        self.last_acknowledged_input
    }

    pub(crate) fn has_staged_snapshot(&self) -> bool {
        self.staged_snapshot.is_some()
    }

    /// Client pre-tick: produce one input for this frame and allow the
    /// engine to consume everything we have, budgeted by the local delta.
    pub(crate) fn pre_sim_tick(
        &mut self,
        driver: &mut dyn Driver<S>,
        buffers: &mut SimulationBuffers<S>,
        tick_state: &mut TickState,
        local_delta_time_seconds: f32,
    ) {
        let frame_delta = SimTime::from_seconds(local_delta_time_seconds);
        let sim_time = tick_state.total_processed_time();

        let frame = buffers.input.write_next();
        frame.frame_delta_time = frame_delta;
        driver.produce_input(sim_time, &mut frame.cmd);

        tick_state.grant_simulation_time(frame_delta);
        tick_state.max_allowed_input_keyframe = buffers.input.head_keyframe().unwrap_or(0);
    }

    /// Client post-tick: present the newly predicted head. The window of
    /// unacknowledged inputs for resend follows from
    /// `last_acknowledged_input`, refreshed during reconcile.
    pub(crate) fn post_sim_tick(
        &mut self,
        driver: &mut dyn Driver<S>,
        buffers: &SimulationBuffers<S>,
    ) {
        super::finalize_if_advanced(driver, buffers, &mut self.last_finalized_keyframe);
    }

    /// Client reconcile: compare the staged snapshot against the local
    /// prediction and rewind on divergence.
    ///
    /// `force` rolls back even when the states agree, used when a freshly
    /// attached dependent needs to be driven through a rollback window.
    ///
    /// Returns the rollback outcome, or `None` when the prediction was
    /// confirmed and nothing changed.
    pub(crate) fn reconcile(
        &mut self,
        buffers: &mut SimulationBuffers<S>,
        tick_state: &mut TickState,
        force: bool,
    ) -> Option<RollbackOutcome> {
        let snapshot = self.staged_snapshot.take()?;
        self.last_acknowledged_input = self.last_acknowledged_input.max(snapshot.keyframe);

        // Evicted below the tail or never predicted this far; either way
        // the local trajectory cannot be kept.
        let prediction_lost = buffers.sync.find(snapshot.keyframe).is_none();

        let diverged = prediction_lost || {
            let local = buffers
                .sync
                .find(snapshot.keyframe)
                .expect("prediction is retained");
            let aux_matches = buffers
                .aux
                .find_at_or_before(snapshot.keyframe)
                .is_some_and(|aux| *aux == snapshot.aux);
            local.diverges_from(&snapshot.state) || !aux_matches
        };

        if !diverged && !force {
            return None;
        }

        let previous_total = tick_state.total_processed_time();
        if prediction_lost {
            tracing::warn!(
                keyframe = snapshot.keyframe,
                sync_tail = ?buffers.sync.tail_keyframe(),
                "Authoritative state is outside the retained prediction window; reseeding from it as a new origin"
            );
        } else {
            tracing::debug!(
                keyframe = snapshot.keyframe,
                forced = force && !diverged,
                "Reconciling prediction with authoritative state"
            );
        }

        write_authoritative_state::<S>(buffers, tick_state, &snapshot);

        if prediction_lost {
            // The prediction is dropped wholesale. Inputs recorded against
            // it would leave a hole in front of the new origin that the
            // consumption loop can never cross, so the input stream
            // restarts too.
            buffers
                .input
                .reset_next_head_keyframe(snapshot.keyframe + 1);
            return Some(RollbackOutcome {
                keyframe: snapshot.keyframe,
                replay_to: snapshot.keyframe,
                time_delta: snapshot.total_sim_time - previous_total,
            });
        }

        // Re-grant the time of the retained inputs past the correction so
        // the whole window replays within the next tick.
        let input_head = buffers.input.head_keyframe().unwrap_or(0);
        let mut replay_to = snapshot.keyframe;
        let mut regranted = SimTime::ZERO;
        let mut keyframe = snapshot.keyframe + 1;
        while keyframe <= input_head {
            let Some(frame) = buffers.input.find(keyframe) else {
                break;
            };
            regranted += frame.frame_delta_time;
            replay_to = keyframe;
            keyframe += 1;
        }
        if regranted.is_positive() {
            tick_state.grant_simulation_time(regranted);
        }

        Some(RollbackOutcome {
            keyframe: snapshot.keyframe,
            replay_to,
            time_delta: snapshot.total_sim_time - previous_total,
        })
    }

    /// Authority send: snapshot the sync head for the owning client.
    pub(crate) fn serialize(
        &mut self,
        buffers: &SimulationBuffers<S>,
        tick_state: &TickState,
    ) -> Result<Bytes, SimulationError> {
        let snapshot = make_snapshot::<S>(buffers, tick_state, ReplicationTarget::AutonomousProxy)?;
        self.last_serialized_keyframe = snapshot.keyframe.max(self.last_serialized_keyframe);
        Ok(PostcardCodec.encode(&snapshot)?)
    }

    /// Client receive: stage the snapshot for the next reconcile.
    pub(crate) fn deserialize(&mut self, bytes: &Bytes) -> Result<(), SimulationError> {
        let snapshot: SyncSnapshot<S::Sync, S::Aux> = PostcardCodec.decode(bytes)?;
        self.last_serialized_keyframe = snapshot.keyframe.max(self.last_serialized_keyframe);

        let newer = self
            .staged_snapshot
            .as_ref()
            .is_none_or(|staged| snapshot.keyframe >= staged.keyframe);
        if newer {
            self.staged_snapshot = Some(snapshot);
        }
        Ok(())
    }

    /// Sync keyframes produced but not yet snapshotted to the owning client.
    pub(crate) fn dirty_count(&self, buffers: &SimulationBuffers<S>) -> u32 {
        buffers
            .sync
            .head_keyframe()
            .unwrap_or(0)
            .saturating_sub(self.last_serialized_keyframe)
    }
}
