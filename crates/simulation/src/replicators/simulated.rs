//! Simulated proxy channel
//!
//! Runs on peers that observe a simulation owned by somebody else. Incoming
//! authoritative snapshots are folded into the sync buffer; between
//! snapshots the proxy either *interpolates* (presents slightly in the past,
//! blending through a delay window of received states) or *extrapolates*
//! (synthesizes empty inputs and runs the update function forward, accepting
//! corrections when real states arrive).
//!
//! On the authority the same proxy is the sending side for observer-bound
//! snapshots.

use std::collections::VecDeque;

use bytes::Bytes;

use veles_core::{Keyframe, SimTime, TickState};
use veles_protocol::{Codec, PostcardCodec, SyncSnapshot};

use super::{
    make_snapshot, write_authoritative_state, RollbackOutcome, SimulatedUpdateMode,
};
use crate::{
    Driver, ReplicationTarget, Simulation, SimulationBuffers, SimulationError, SyncState,
};

/// Received states kept for interpolation. Bounded independently of the
/// sync buffer so a long interpolation delay cannot grow it without limit.
const SMOOTHING_WINDOW_CAPACITY: usize = 32;

const DEFAULT_INTERPOLATION_DELAY: SimTime = SimTime::from_micros(100_000);

pub(crate) struct SimulatedReplicator<S: Simulation> {
    mode: SimulatedUpdateMode,

    interpolation_delay: SimTime,

    /// Presentation clock, in total-processed-simulation-time terms.
    presentation_time: SimTime,

    presentation_state: Option<S::Sync>,

    /// Received (time, state) pairs in ascending time order.
    smoothing_window: VecDeque<(SimTime, S::Sync)>,

    /// Snapshots received since the last reconcile.
    staged: Vec<SyncSnapshot<S::Sync, S::Aux>>,

    /// Highest snapshot keyframe that passed through this proxy's
    /// serializer, in either direction.
    last_serialized_keyframe: Keyframe,

    last_finalized_keyframe: Keyframe,
}

impl<S: Simulation> SimulatedReplicator<S> {
    pub(crate) fn new() -> Self {
        Self {
            mode: SimulatedUpdateMode::default(),
            interpolation_delay: DEFAULT_INTERPOLATION_DELAY,
            presentation_time: SimTime::ZERO,
            presentation_state: None,
            smoothing_window: VecDeque::new(),
            staged: Vec::new(),
            last_serialized_keyframe: 0,
            last_finalized_keyframe: 0,
        }
    }

    pub(crate) fn mode(&self) -> SimulatedUpdateMode {
        self.mode
    }

    pub(crate) fn set_mode(&mut self, mode: SimulatedUpdateMode) {
        self.mode = mode;
    }

    pub(crate) fn set_interpolation_delay(&mut self, delay: SimTime) {
        self.interpolation_delay = delay;
    }

    pub(crate) fn last_serialized_keyframe(&self) -> Keyframe {
        self.last_serialized_keyframe
    }

    /// Observer pre-tick: advance presentation per the update mode.
    pub(crate) fn pre_sim_tick(
        &mut self,
        _driver: &mut dyn Driver<S>,
        buffers: &mut SimulationBuffers<S>,
        tick_state: &mut TickState,
        local_delta_time_seconds: f32,
    ) {
        let local_delta = SimTime::from_seconds(local_delta_time_seconds);
        match self.mode {
            SimulatedUpdateMode::Interpolate => {
                // Keep the engine's consumption loop idle; presentation is
                // sampled from the smoothing window instead.
                tick_state.max_allowed_input_keyframe = tick_state.last_processed_input_keyframe;
                self.advance_presentation(local_delta);
            }
            SimulatedUpdateMode::Extrapolate => {
                let next_keyframe = tick_state.last_processed_input_keyframe + 1;
                buffers.input.reset_next_head_keyframe(next_keyframe);
                let frame = buffers.input.write_next();
                frame.frame_delta_time = local_delta;
                frame.cmd = S::Input::default();

                tick_state.grant_simulation_time(local_delta);
                tick_state.max_allowed_input_keyframe =
                    buffers.input.head_keyframe().unwrap_or(0);
            }
        }
    }

    /// Observer post-tick: present the interpolated state, or the newly
    /// extrapolated head.
    pub(crate) fn post_sim_tick(
        &mut self,
        driver: &mut dyn Driver<S>,
        buffers: &SimulationBuffers<S>,
    ) {
        match self.mode {
            SimulatedUpdateMode::Interpolate => {
                if let Some(state) = &self.presentation_state {
                    driver.finalize_frame(state);
                }
            }
            SimulatedUpdateMode::Extrapolate => {
                super::finalize_if_advanced(driver, buffers, &mut self.last_finalized_keyframe);
            }
        }
    }

    /// Observer reconcile: fold received snapshots into the sync buffer.
    ///
    /// Returns a rollback outcome when a snapshot contradicted local
    /// extrapolation, so dependents can be rewound too.
    pub(crate) fn reconcile(
        &mut self,
        buffers: &mut SimulationBuffers<S>,
        tick_state: &mut TickState,
    ) -> Option<RollbackOutcome> {
        if self.staged.is_empty() {
            return None;
        }
        self.staged.sort_by_key(|snapshot| snapshot.keyframe);

        let mut outcome = None;
        for snapshot in std::mem::take(&mut self.staged) {
            self.push_smoothing_entry(&snapshot);

            let extrapolated_past = buffers
                .sync
                .head_keyframe()
                .is_some_and(|head| snapshot.keyframe <= head);
            if extrapolated_past {
                let diverged = buffers
                    .sync
                    .find(snapshot.keyframe)
                    .map_or(true, |local| local.diverges_from(&snapshot.state));
                if !diverged {
                    continue;
                }
                tracing::debug!(
                    keyframe = snapshot.keyframe,
                    "Extrapolation diverged from received state; rewinding"
                );
                let previous_total = tick_state.total_processed_time();
                self.fold_snapshot(buffers, tick_state, &snapshot);
                outcome = Some(RollbackOutcome {
                    keyframe: snapshot.keyframe,
                    replay_to: snapshot.keyframe,
                    time_delta: snapshot.total_sim_time - previous_total,
                });
            } else {
                self.fold_snapshot(buffers, tick_state, &snapshot);
            }
        }
        outcome
    }

    fn fold_snapshot(
        &mut self,
        buffers: &mut SimulationBuffers<S>,
        tick_state: &mut TickState,
        snapshot: &SyncSnapshot<S::Sync, S::Aux>,
    ) {
        write_authoritative_state::<S>(buffers, tick_state, snapshot);
        // Synthesized inputs past the authoritative state are stale.
        buffers
            .input
            .reset_next_head_keyframe(snapshot.keyframe + 1);
    }

    fn push_smoothing_entry(&mut self, snapshot: &SyncSnapshot<S::Sync, S::Aux>) {
        let newer = self
            .smoothing_window
            .back()
            .is_none_or(|(time, _)| snapshot.total_sim_time > *time);
        if !newer {
            return;
        }
        if self.smoothing_window.len() == SMOOTHING_WINDOW_CAPACITY {
            self.smoothing_window.pop_front();
        }
        self.smoothing_window
            .push_back((snapshot.total_sim_time, snapshot.state.clone()));
    }

    /// Moves the presentation clock forward and samples the smoothing
    /// window behind the configured delay.
    fn advance_presentation(&mut self, local_delta: SimTime) {
        let Some(oldest) = self.smoothing_window.front().map(|entry| entry.0) else {
            return;
        };
        let newest = self
            .smoothing_window
            .back()
            .map(|entry| entry.0)
            .expect("window is non-empty");
        let target = (newest - self.interpolation_delay).max(oldest);
        self.presentation_time = (self.presentation_time + local_delta).min(target).max(oldest);
        self.presentation_state = self.sample_window();
    }

    fn sample_window(&self) -> Option<S::Sync> {
        let presentation_time = self.presentation_time;
        let mut previous: Option<&(SimTime, S::Sync)> = None;
        for entry in &self.smoothing_window {
            if entry.0 <= presentation_time {
                previous = Some(entry);
                continue;
            }
            return Some(match previous {
                Some((from_time, from_state)) => {
                    let span = (entry.0 - *from_time).as_micros();
                    let alpha = if span > 0 {
                        (presentation_time - *from_time).as_micros() as f32 / span as f32
                    } else {
                        1.0
                    };
                    from_state.interpolate(&entry.1, alpha)
                }
                None => entry.1.clone(),
            });
        }
        previous.map(|(_, state)| state.clone())
    }

    /// Authority send: snapshot the sync head for observers.
    pub(crate) fn serialize(
        &mut self,
        buffers: &SimulationBuffers<S>,
        tick_state: &TickState,
    ) -> Result<Bytes, SimulationError> {
        let snapshot = make_snapshot::<S>(buffers, tick_state, ReplicationTarget::SimulatedProxy)?;
        self.last_serialized_keyframe = snapshot.keyframe.max(self.last_serialized_keyframe);
        Ok(PostcardCodec.encode(&snapshot)?)
    }

    /// Observer receive: stage the snapshot for the next reconcile.
    pub(crate) fn deserialize(&mut self, bytes: &Bytes) -> Result<(), SimulationError> {
        let snapshot: SyncSnapshot<S::Sync, S::Aux> = PostcardCodec.decode(bytes)?;
        self.last_serialized_keyframe = snapshot.keyframe.max(self.last_serialized_keyframe);
        self.staged.push(snapshot);
        Ok(())
    }

    /// Sync keyframes produced but not yet snapshotted to observers.
    pub(crate) fn dirty_count(&self, buffers: &SimulationBuffers<S>) -> u32 {
        buffers
            .sync
            .head_keyframe()
            .unwrap_or(0)
            .saturating_sub(self.last_serialized_keyframe)
    }
}
