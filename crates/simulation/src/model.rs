//! The networked simulation orchestrator
//!
//! [`NetworkedSimulation`] owns the buffers, the tick state and one
//! replication proxy per channel, and drives one tick of the simulation per
//! host frame:
//!
//! 1. debug pre-record and a fresh debug frame
//! 2. role pre-tick (produce or release inputs, refill the time budget)
//! 3. input consumption: repeatedly look up the next unprocessed input,
//!    check the budget, run the update function, advance the tick state
//! 4. role post-tick (presentation, dirty bookkeeping)
//! 5. debug finalize and historic recording
//!
//! Reconciliation runs between ticks, never inside one. A rollback recorded
//! by reconciliation replays the retained inputs during the following tick,
//! fanning the replayed keyframes out to dependent simulations.

use std::collections::VecDeque;

use bytes::Bytes;

use veles_core::{InputFrame, Keyframe, KeyframedBuffer, SimTime, TickState};
use veles_protocol::ReplayFrame;

#[cfg(feature = "debug-capture")]
use veles_core::DebugFrame;

#[cfg(feature = "debug-capture")]
use crate::replicators::debug::DebugReplicator;
use crate::replicators::{
    autonomous::AutonomousReplicator, replay::ReplayReplicator, server_rpc::ServerRpcReplicator,
    simulated::SimulatedReplicator, SimulatedUpdateMode,
};
use crate::{
    dependents::{RollbackParticipant, SimulationHandle, SimulationId},
    Driver, InitParameters, NetworkRole, ReplicationTarget, Simulation, SimulationBuffers,
    SimulationError, TickParameters,
};

/// A rollback recorded by a parent simulation, executed at the start of this
/// simulation's next tick (the parent must be ticked first).
#[derive(Debug, Clone, Copy)]
enum QueuedRollback {
    Begin {
        rollback_delta: SimTime,
        parent_keyframe: Keyframe,
    },
    Step {
        step: SimTime,
        parent_keyframe: Keyframe,
        is_final_step: bool,
    },
}

/// One peer's view of one networked simulation.
///
/// The owning host object (the driver) is passed into [`tick`] and the
/// rollback entry points rather than stored, so the borrow checker enforces
/// that the driver is only reached through the orchestrator while the engine
/// runs.
///
/// [`tick`]: NetworkedSimulation::tick
pub struct NetworkedSimulation<S: Simulation> {
    id: SimulationId,
    buffers: SimulationBuffers<S>,
    tick_state: TickState,

    rep_server_rpc: ServerRpcReplicator<S>,
    rep_autonomous: AutonomousReplicator<S>,
    rep_simulated: SimulatedReplicator<S>,
    rep_replay: ReplayReplicator<S>,
    #[cfg(feature = "debug-capture")]
    rep_debug: DebugReplicator,

    #[cfg(feature = "debug-capture")]
    historic: Option<SimulationBuffers<S>>,

    parent: Option<SimulationHandle>,
    dependents: Vec<SimulationHandle>,
    dependent_needs_reconcile: bool,

    /// Input window `(from, to]` left behind by a rollback, replayed during
    /// the next tick.
    pending_replay: Option<(Keyframe, Keyframe)>,
    rollback_queue: VecDeque<QueuedRollback>,

    local_frame_number: u64,

    rpc_accumulated_seconds: f32,
    rpc_threshold_seconds: f32,
}

impl<S: Simulation> Default for NetworkedSimulation<S> {
    fn default() -> Self {
        Self::new()
    }
}

impl<S: Simulation> NetworkedSimulation<S> {
    pub fn new() -> Self {
        Self {
            id: SimulationId::new_v4(),
            buffers: SimulationBuffers::<S>::new(),
            tick_state: TickState::new(),
            rep_server_rpc: ServerRpcReplicator::new(),
            rep_autonomous: AutonomousReplicator::new(),
            rep_simulated: SimulatedReplicator::new(),
            rep_replay: ReplayReplicator::new(),
            #[cfg(feature = "debug-capture")]
            rep_debug: DebugReplicator::new(),
            #[cfg(feature = "debug-capture")]
            historic: None,
            parent: None,
            dependents: Vec::new(),
            dependent_needs_reconcile: false,
            pending_replay: None,
            rollback_queue: VecDeque::new(),
            local_frame_number: 0,
            // Effectively unpaced until the host picks a send rate.
            rpc_accumulated_seconds: 0.0,
            rpc_threshold_seconds: 1.0 / 999.0,
        }
    }

    /// Sizes every buffer and seeds the keyframe-0 sentinels.
    ///
    /// Inputs start at keyframe 1; the empty keyframe-0 input exists so the
    /// input and sync buffers stay aligned, and the keyframe-0 aux entry is
    /// the default value in effect until the first explicit change.
    pub fn initialize_for_role(&mut self, _role: NetworkRole, params: &InitParameters) {
        self.buffers.input.set_capacity(params.input_buffer_size);
        self.buffers.sync.set_capacity(params.synced_buffer_size);
        self.buffers.aux.set_capacity(params.aux_buffer_size);
        self.buffers.set_debug_capacity(params.debug_buffer_size);
        self.tick_state.init_time_buffer(params.synced_buffer_size);
        self.rep_replay.set_window_size(params.replay_window_size);

        #[cfg(feature = "debug-capture")]
        {
            self.rep_debug.set_received_capacity(params.debug_buffer_size);
            let mut historic = SimulationBuffers::<S>::new();
            historic.input.set_capacity(params.historic_buffer_size);
            historic.sync.set_capacity(params.historic_buffer_size);
            historic.aux.set_capacity(params.historic_buffer_size);
            self.historic = Some(historic);
        }

        *self.buffers.input.write_next() = InputFrame::default();
        *self.buffers.aux.write_next() = S::Aux::default();
    }

    /// Advances the simulation by one host frame.
    pub fn tick(&mut self, driver: &mut dyn Driver<S>, params: &TickParameters) {
        self.run_queued_rollbacks(driver);

        // Stamp the previous debug frame with what was sent after the last
        // tick; sends happen between ticks, after the frame was recorded.
        let last_sent = match params.role {
            NetworkRole::AutonomousProxy => Some(self.rep_server_rpc.last_serialized_keyframe()),
            NetworkRole::Authority => Some(self.rep_autonomous.last_serialized_keyframe()),
            NetworkRole::SimulatedProxy => None,
        };
        if let Some(ring) = self.buffers.debug_mut() {
            if let (Some(head), Some(sent)) = (ring.head_keyframe(), last_sent) {
                if let Some(frame) = ring.find_mut(head) {
                    frame.last_sent_input_keyframe = sent;
                }
            }
        }

        // Open this frame's debug record.
        let last_received = match params.role {
            NetworkRole::AutonomousProxy => self.rep_autonomous.last_serialized_keyframe(),
            NetworkRole::Authority => self.rep_server_rpc.last_serialized_keyframe(),
            NetworkRole::SimulatedProxy => self.rep_simulated.last_serialized_keyframe(),
        };
        let frame_number = self.local_frame_number;
        self.local_frame_number += 1;
        if let Some(ring) = self.buffers.debug_mut() {
            let frame = ring.write_next();
            frame.local_delta_seconds = params.local_delta_time_seconds;
            frame.local_frame_number = frame_number;
            frame.last_received_input_keyframe = last_received;
        }

        match params.role {
            NetworkRole::Authority => self
                .rep_server_rpc
                .pre_sim_tick(&mut self.buffers, &mut self.tick_state),
            NetworkRole::AutonomousProxy => self.rep_autonomous.pre_sim_tick(
                driver,
                &mut self.buffers,
                &mut self.tick_state,
                params.local_delta_time_seconds,
            ),
            NetworkRole::SimulatedProxy => self.rep_simulated.pre_sim_tick(
                driver,
                &mut self.buffers,
                &mut self.tick_state,
                params.local_delta_time_seconds,
            ),
        }

        self.advance(driver);

        match params.role {
            NetworkRole::Authority => self.rep_server_rpc.post_sim_tick(driver, &self.buffers),
            NetworkRole::AutonomousProxy => {
                self.rep_autonomous.post_sim_tick(driver, &self.buffers)
            }
            NetworkRole::SimulatedProxy => self.rep_simulated.post_sim_tick(driver, &self.buffers),
        }

        // Close this frame's debug record.
        let last_processed = self.tick_state.last_processed_input_keyframe;
        let input_head = self.buffers.input.head_keyframe().unwrap_or(0);
        let remaining = self.tick_state.remaining_allowed_time();
        if let Some(ring) = self.buffers.debug_mut() {
            if let Some(head) = ring.head_keyframe() {
                if let Some(frame) = ring.find_mut(head) {
                    frame.last_processed_keyframe = last_processed;
                    frame.input_head_keyframe = input_head;
                    frame.remaining_allowed_time = remaining;
                }
            }
        }

        self.merge_historic();
    }

    /// The input consumption loop, including the sync continuity check.
    fn advance(&mut self, driver: &mut dyn Driver<S>) {
        if self.buffers.input.head_keyframe() <= self.buffers.sync.head_keyframe() {
            return;
        }

        // Inputs start at keyframe 1 and the input at keyframe k produces
        // the sync state at keyframe k, so the sync head must sit exactly at
        // the last processed keyframe before consuming more. On the first
        // frame through it does not (the buffer is empty); after packet-loss
        // recovery or a capacity change it may not either. Reseed from the
        // driver in both cases, loudly in the second.
        let last_processed = self.tick_state.last_processed_input_keyframe;
        if self.buffers.sync.head_keyframe() != Some(last_processed) {
            if last_processed != 0 {
                tracing::warn!(
                    simulation = %driver.debug_name(),
                    last_processed,
                    sync_head = ?self.buffers.sync.head_keyframe(),
                    "Break in sync state continuity; reseeding from the driver"
                );
            }
            self.buffers.sync.reset_next_head_keyframe(last_processed);
            let seed = self.buffers.sync.write_next();
            driver.init_sync_state(seed);
            let total = self.tick_state.total_processed_time();
            self.tick_state.set_total_processed(total, last_processed);
        }

        loop {
            let keyframe = self.tick_state.last_processed_input_keyframe + 1;
            if keyframe > self.tick_state.max_allowed_input_keyframe {
                break;
            }
            // A missing keyframe means end of available input for this
            // tick; the loop never skips over a gap.
            let Some(frame) = self.buffers.input.find(keyframe) else {
                break;
            };
            let frame_delta = frame.frame_delta_time;
            if self.tick_state.remaining_allowed_time() < frame_delta {
                break;
            }
            let cmd = frame.cmd.clone();

            let prev = self
                .buffers
                .sync
                .find(keyframe - 1)
                .expect("sync state for the last processed keyframe must exist")
                .clone();
            let aux = self
                .buffers
                .aux
                .find_at_or_before(keyframe)
                .cloned()
                .unwrap_or_default();
            {
                let next = self.buffers.sync.write_next();
                S::update(
                    driver,
                    frame_delta.to_real_time_seconds(),
                    &cmd,
                    &prev,
                    next,
                    &aux,
                );
            }
            debug_assert_eq!(self.buffers.sync.head_keyframe(), Some(keyframe));

            if let Some(ring) = self.buffers.debug_mut() {
                if let Some(head) = ring.head_keyframe() {
                    if let Some(frame) = ring.find_mut(head) {
                        frame.processed_keyframes.push(keyframe);
                    }
                }
            }

            self.tick_state.increment_processed(frame_delta, keyframe);
            self.tick_state.last_processed_input_keyframe = keyframe;

            self.step_dependents_through_replay(keyframe, frame_delta);
        }
    }

    /// Applies corrections received from the network since the last tick.
    ///
    /// Call between ticks, never during one. On the authority this is a
    /// no-op. On a predictor, a diverging snapshot rewinds the sync buffer,
    /// records the replay window for the next tick and begins rollback on
    /// every dependent simulation.
    pub fn reconcile(&mut self, role: NetworkRole) {
        match role {
            NetworkRole::Authority => self.rep_server_rpc.reconcile(),
            NetworkRole::AutonomousProxy => {
                let force = self.rep_autonomous.has_staged_snapshot()
                    && std::mem::take(&mut self.dependent_needs_reconcile);
                let outcome =
                    self.rep_autonomous
                        .reconcile(&mut self.buffers, &mut self.tick_state, force);
                if let Some(outcome) = outcome {
                    if outcome.replay_to > outcome.keyframe {
                        self.pending_replay = Some((outcome.keyframe, outcome.replay_to));
                    }
                    self.begin_rollback_on_dependents(outcome.time_delta, outcome.keyframe);
                }
            }
            NetworkRole::SimulatedProxy => {
                let outcome = self
                    .rep_simulated
                    .reconcile(&mut self.buffers, &mut self.tick_state);
                if let Some(outcome) = outcome {
                    self.begin_rollback_on_dependents(outcome.time_delta, outcome.keyframe);
                }
            }
        }
    }

    /// Emits the payload for `target`.
    ///
    /// # Errors
    ///
    /// [`SimulationError::NothingToSerialize`] before the channel has data,
    /// [`SimulationError::DebugDisabled`] for the debug target in builds
    /// without the `debug-capture` feature.
    pub fn serialize(&mut self, target: ReplicationTarget) -> Result<Bytes, SimulationError> {
        match target {
            ReplicationTarget::ServerRpc => {
                let acknowledged = self.rep_autonomous.last_acknowledged_input();
                self.rep_server_rpc.serialize(&self.buffers, acknowledged)
            }
            ReplicationTarget::AutonomousProxy => self
                .rep_autonomous
                .serialize(&self.buffers, &self.tick_state),
            ReplicationTarget::SimulatedProxy => self
                .rep_simulated
                .serialize(&self.buffers, &self.tick_state),
            ReplicationTarget::Replay => self.rep_replay.serialize(&self.buffers, &self.tick_state),
            ReplicationTarget::Debug => self.serialize_debug(),
        }
    }

    /// Ingests a payload emitted by the matching proxy on the remote peer.
    ///
    /// Snapshot channels only stage the data; [`reconcile`] applies it.
    ///
    /// [`reconcile`]: NetworkedSimulation::reconcile
    pub fn deserialize(
        &mut self,
        target: ReplicationTarget,
        bytes: &Bytes,
    ) -> Result<(), SimulationError> {
        match target {
            ReplicationTarget::ServerRpc => {
                self.rep_server_rpc.deserialize(bytes, &mut self.buffers)
            }
            ReplicationTarget::AutonomousProxy => self.rep_autonomous.deserialize(bytes),
            ReplicationTarget::SimulatedProxy => self.rep_simulated.deserialize(bytes),
            ReplicationTarget::Replay => self.rep_replay.deserialize(bytes),
            ReplicationTarget::Debug => self.deserialize_debug(bytes),
        }
    }

    /// Number of keyframes `target` has produced but not serialized yet.
    pub fn dirty_count(&self, target: ReplicationTarget) -> u32 {
        match target {
            ReplicationTarget::ServerRpc => self.rep_server_rpc.dirty_count(&self.buffers),
            ReplicationTarget::AutonomousProxy => self.rep_autonomous.dirty_count(&self.buffers),
            ReplicationTarget::SimulatedProxy => self.rep_simulated.dirty_count(&self.buffers),
            ReplicationTarget::Replay => self.rep_replay.dirty_count(&self.buffers),
            ReplicationTarget::Debug => self.debug_dirty_count(),
        }
    }

    // ------------------------------------------------------------------
    // Server RPC pacing. The driver invokes the actual RPC; this only
    // tracks when the configured send rate allows one.
    // ------------------------------------------------------------------

    pub fn set_desired_server_rpc_send_frequency(&mut self, desired_hz: f32) {
        self.rpc_threshold_seconds = 1.0 / desired_hz;
    }

    /// Accumulates frame time and returns true when a send is due,
    /// consuming one threshold's worth of accumulated time.
    pub fn should_send_server_rpc(&mut self, delta_time_seconds: f32) -> bool {
        // TODO: cap the contribution at the threshold so one long frame
        // cannot burst several sends in a row.
        self.rpc_accumulated_seconds += delta_time_seconds;
        if self.rpc_accumulated_seconds >= self.rpc_threshold_seconds {
            self.rpc_accumulated_seconds -= self.rpc_threshold_seconds;
            return true;
        }
        false
    }

    // ------------------------------------------------------------------
    // Dependent-simulation rollback.
    // ------------------------------------------------------------------

    fn begin_rollback_on_dependents(&mut self, time_delta: SimTime, keyframe: Keyframe) {
        self.dependents.retain(|handle| handle.upgrade().is_some());
        for handle in &self.dependents {
            if let Some(dependent) = handle.upgrade() {
                dependent.borrow_mut().begin_rollback(time_delta, keyframe);
            }
        }
    }

    /// During a replay tick, mirrors every replayed keyframe to the
    /// dependents, finalizing on the window's last keyframe.
    fn step_dependents_through_replay(&mut self, keyframe: Keyframe, step: SimTime) {
        let Some((from, to)) = self.pending_replay else {
            return;
        };
        if keyframe <= from || keyframe > to {
            return;
        }
        let is_final_step = keyframe == to;
        for handle in &self.dependents {
            if let Some(dependent) = handle.upgrade() {
                dependent
                    .borrow_mut()
                    .step_rollback(step, keyframe, is_final_step);
            }
        }
        if is_final_step {
            self.pending_replay = None;
        }
    }

    fn run_queued_rollbacks(&mut self, driver: &mut dyn Driver<S>) {
        while let Some(queued) = self.rollback_queue.pop_front() {
            match queued {
                QueuedRollback::Begin {
                    rollback_delta,
                    parent_keyframe,
                } => self.rollback_begin(driver, rollback_delta, parent_keyframe),
                QueuedRollback::Step {
                    step,
                    parent_keyframe,
                    is_final_step,
                } => self.rollback_step(driver, step, parent_keyframe, is_final_step),
            }
        }
    }

    /// Rewinds this simulation to the parent's corrected keyframe.
    fn rollback_begin(
        &mut self,
        driver: &mut dyn Driver<S>,
        rollback_delta: SimTime,
        parent_keyframe: Keyframe,
    ) {
        let stamped_total = self.tick_state.total_processed_at(parent_keyframe);

        if self.buffers.sync.find(parent_keyframe).is_some() {
            self.buffers
                .sync
                .reset_next_head_keyframe(parent_keyframe + 1);
        } else {
            tracing::warn!(
                simulation = %driver.debug_name(),
                parent_keyframe,
                "Rollback past the retained sync window; reseeding from the driver"
            );
            self.buffers.sync.reset_next_head_keyframe(parent_keyframe);
            let seed = self.buffers.sync.write_next();
            driver.init_sync_state(seed);
        }

        self.tick_state.last_processed_input_keyframe = parent_keyframe;
        let total =
            stamped_total.unwrap_or_else(|| self.tick_state.total_processed_time() + rollback_delta);
        self.tick_state.set_total_processed(total, parent_keyframe);
        self.buffers
            .input
            .reset_next_head_keyframe(parent_keyframe + 1);
    }

    /// Re-runs one keyframe of this simulation against the parent's
    /// corrected trajectory.
    fn rollback_step(
        &mut self,
        driver: &mut dyn Driver<S>,
        step: SimTime,
        parent_keyframe: Keyframe,
        is_final_step: bool,
    ) {
        debug_assert_eq!(
            self.tick_state.last_processed_input_keyframe + 1,
            parent_keyframe,
            "rollback steps must arrive in keyframe order"
        );
        let keyframe = parent_keyframe;

        self.buffers.input.reset_next_head_keyframe(keyframe);
        let frame = self.buffers.input.write_next();
        frame.frame_delta_time = step;
        frame.cmd = S::Input::default();
        let cmd = frame.cmd.clone();

        let prev = self
            .buffers
            .sync
            .find(keyframe - 1)
            .expect("rollback step follows a rewound sync head")
            .clone();
        let aux = self
            .buffers
            .aux
            .find_at_or_before(keyframe)
            .cloned()
            .unwrap_or_default();
        {
            let next = self.buffers.sync.write_next();
            S::update(driver, step.to_real_time_seconds(), &cmd, &prev, next, &aux);
        }

        self.tick_state.grant_simulation_time(step);
        self.tick_state.increment_processed(step, keyframe);
        self.tick_state.last_processed_input_keyframe = keyframe;

        if is_final_step {
            if let Some(head) = self.buffers.sync.head_keyframe() {
                if let Some(state) = self.buffers.sync.find(head) {
                    driver.finalize_frame(state);
                }
            }
        }
    }

    // ------------------------------------------------------------------
    // Aux pipeline.
    // ------------------------------------------------------------------

    /// Records a new aux value taking effect at the next unprocessed
    /// keyframe. Intermediate keyframes are filled with the current value so
    /// lookups by keyframe stay well defined across the change.
    pub fn write_aux(&mut self, value: S::Aux) {
        let effect_keyframe = self.tick_state.last_processed_input_keyframe + 1;
        while self.buffers.aux.next_head_keyframe() < effect_keyframe {
            let head = self.buffers.aux.head_keyframe();
            let current = head
                .and_then(|head| self.buffers.aux.find(head))
                .cloned()
                .unwrap_or_default();
            *self.buffers.aux.write_next() = current;
        }
        self.buffers.aux.reset_next_head_keyframe(effect_keyframe);
        *self.buffers.aux.write_next() = value;
    }

    /// Aux value in effect at `keyframe`, if still retained.
    pub fn aux_at(&self, keyframe: Keyframe) -> Option<&S::Aux> {
        self.buffers.aux.find_at_or_before(keyframe)
    }

    // ------------------------------------------------------------------
    // Accessors.
    // ------------------------------------------------------------------

    pub fn buffers(&self) -> &SimulationBuffers<S> {
        &self.buffers
    }

    /// Direct mutable access to the buffers, for hosts that need to
    /// manipulate streams outside the normal tick flow. The engine recovers
    /// from a desynced sync head by reseeding, but there is no safety net
    /// beyond that.
    pub fn buffers_mut(&mut self) -> &mut SimulationBuffers<S> {
        &mut self.buffers
    }

    pub fn tick_state(&self) -> &TickState {
        &self.tick_state
    }

    /// Direct mutable access to the tick state (for direct manipulation of
    /// budgets and limits).
    pub fn tick_state_mut(&mut self) -> &mut TickState {
        &mut self.tick_state
    }

    pub fn simulation_group_name(&self) -> &'static str {
        S::GROUP_NAME
    }

    pub fn last_processed_input_keyframe(&self) -> Keyframe {
        self.tick_state.last_processed_input_keyframe
    }

    pub fn total_processed_time(&self) -> SimTime {
        self.tick_state.total_processed_time()
    }

    pub fn input_head_keyframe(&self) -> Option<Keyframe> {
        self.buffers.input.head_keyframe()
    }

    pub fn sync_head_keyframe(&self) -> Option<Keyframe> {
        self.buffers.sync.head_keyframe()
    }

    pub fn sync_state(&self, keyframe: Keyframe) -> Option<&S::Sync> {
        self.buffers.sync.find(keyframe)
    }

    pub fn sync_head_state(&self) -> Option<&S::Sync> {
        self.sync_state(self.buffers.sync.head_keyframe()?)
    }

    pub fn simulated_update_mode(&self) -> SimulatedUpdateMode {
        self.rep_simulated.mode()
    }

    pub fn set_simulated_update_mode(&mut self, mode: SimulatedUpdateMode) {
        self.rep_simulated.set_mode(mode);
    }

    pub fn set_interpolation_delay(&mut self, delay: SimTime) {
        self.rep_simulated.set_interpolation_delay(delay);
    }

    /// Frames accumulated from the replay channel, oldest first.
    pub fn replay_frames(&self) -> &[ReplayFrame<S::Sync>] {
        self.rep_replay.frames()
    }

    pub fn parent_id(&self) -> Option<SimulationId> {
        self.parent.as_ref().map(|handle| handle.id())
    }

    pub fn dependent_ids(&self) -> Vec<SimulationId> {
        self.dependents.iter().map(|handle| handle.id()).collect()
    }

    // ------------------------------------------------------------------
    // Debug and historic access. Available in every build; all of them
    // yield None without the debug-capture feature.
    // ------------------------------------------------------------------

    /// The locally captured debug ring.
    pub fn local_debug_buffer(&self) -> Option<&KeyframedBuffer<veles_core::DebugFrame>> {
        self.buffers.debug()
    }

    #[cfg(feature = "debug-capture")]
    pub fn received_debug_buffer(&self) -> Option<&KeyframedBuffer<DebugFrame>> {
        Some(self.rep_debug.received())
    }

    #[cfg(not(feature = "debug-capture"))]
    pub fn received_debug_buffer(&self) -> Option<&KeyframedBuffer<veles_core::DebugFrame>> {
        None
    }

    #[cfg(feature = "debug-capture")]
    pub fn historic_buffers(&self) -> Option<&SimulationBuffers<S>> {
        self.historic.as_ref()
    }

    #[cfg(not(feature = "debug-capture"))]
    pub fn historic_buffers(&self) -> Option<&SimulationBuffers<S>> {
        None
    }

    #[cfg(feature = "debug-capture")]
    fn serialize_debug(&mut self) -> Result<Bytes, SimulationError> {
        let ring = self.buffers.debug().expect("debug capture is enabled");
        self.rep_debug.serialize(ring)
    }

    #[cfg(not(feature = "debug-capture"))]
    fn serialize_debug(&mut self) -> Result<Bytes, SimulationError> {
        Err(SimulationError::DebugDisabled)
    }

    #[cfg(feature = "debug-capture")]
    fn deserialize_debug(&mut self, bytes: &Bytes) -> Result<(), SimulationError> {
        self.rep_debug.deserialize(bytes)
    }

    #[cfg(not(feature = "debug-capture"))]
    fn deserialize_debug(&mut self, bytes: &Bytes) -> Result<(), SimulationError> {
        let _ = bytes;
        Err(SimulationError::DebugDisabled)
    }

    #[cfg(feature = "debug-capture")]
    fn debug_dirty_count(&self) -> u32 {
        self.rep_debug.dirty_count(self.buffers.debug())
    }

    #[cfg(not(feature = "debug-capture"))]
    fn debug_dirty_count(&self) -> u32 {
        0
    }

    fn merge_historic(&mut self) {
        #[cfg(feature = "debug-capture")]
        if let Some(historic) = self.historic.as_mut() {
            historic.input.copy_and_merge(&self.buffers.input);
            historic.sync.copy_and_merge(&self.buffers.sync);
            historic.aux.copy_and_merge(&self.buffers.aux);
        }
    }
}

impl<S: Simulation> RollbackParticipant for NetworkedSimulation<S> {
    fn simulation_id(&self) -> SimulationId {
        self.id
    }

    fn begin_rollback(&mut self, rollback_delta: SimTime, parent_keyframe: Keyframe) {
        self.rollback_queue.push_back(QueuedRollback::Begin {
            rollback_delta,
            parent_keyframe,
        });
    }

    fn step_rollback(&mut self, step: SimTime, parent_keyframe: Keyframe, is_final_step: bool) {
        self.rollback_queue.push_back(QueuedRollback::Step {
            step,
            parent_keyframe,
            is_final_step,
        });
    }

    fn parent_handle(&self) -> Option<SimulationHandle> {
        self.parent.clone()
    }

    fn set_parent_handle(&mut self, parent: Option<SimulationHandle>) {
        self.parent = parent;
    }

    fn insert_dependent(&mut self, dependent: SimulationHandle) {
        debug_assert!(
            self.dependents
                .iter()
                .all(|existing| existing.id() != dependent.id()),
            "dependent registered twice"
        );
        self.dependents.push(dependent);
        // Force a rollback pass at the next reconcile so the new dependent
        // is brought onto this simulation's trajectory.
        self.dependent_needs_reconcile = true;
    }

    fn remove_dependent(&mut self, id: SimulationId) {
        self.dependents.retain(|handle| handle.id() != id);
    }

    fn take_dependents(&mut self) -> Vec<SimulationHandle> {
        std::mem::take(&mut self.dependents)
    }
}

impl<S: Simulation> Drop for NetworkedSimulation<S> {
    /// Clears both sides of every graph edge. Parent and dependent links
    /// are weak, so this is bookkeeping rather than deallocation, but a
    /// stale edge would otherwise route rollbacks into a dead simulation's
    /// slot.
    fn drop(&mut self) {
        if let Some(parent) = self.parent.take() {
            if let Some(parent) = parent.upgrade() {
                parent.borrow_mut().remove_dependent(self.id);
            }
        }
        for handle in std::mem::take(&mut self.dependents) {
            if let Some(dependent) = handle.upgrade() {
                dependent.borrow_mut().set_parent_handle(None);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
    struct NullInput;

    #[derive(Debug, Clone, Default, PartialEq, serde::Serialize, serde::Deserialize)]
    struct NullState;

    impl crate::SyncState for NullState {}

    struct NullSim;

    impl Simulation for NullSim {
        type Input = NullInput;
        type Sync = NullState;
        type Aux = ();
        const GROUP_NAME: &'static str = "null";

        fn update(
            _driver: &mut dyn Driver<Self>,
            _delta_seconds: f32,
            _input: &NullInput,
            _prev: &NullState,
            _next: &mut NullState,
            _aux: &(),
        ) {
        }
    }

    #[test]
    fn test_initialize_seeds_sentinels() {
        let mut sim = NetworkedSimulation::<NullSim>::new();
        sim.initialize_for_role(NetworkRole::AutonomousProxy, &InitParameters::default());

        assert_eq!(sim.input_head_keyframe(), Some(0));
        assert_eq!(sim.sync_head_keyframe(), None);
        assert_eq!(sim.aux_at(0), Some(&()));
        assert_eq!(sim.last_processed_input_keyframe(), 0);
    }

    #[test]
    fn test_rpc_pacer_counts_sends() {
        let mut sim = NetworkedSimulation::<NullSim>::new();
        sim.set_desired_server_rpc_send_frequency(60.0);

        let mut sends = 0;
        for _ in 0..1000 {
            if sim.should_send_server_rpc(1.0 / 120.0) {
                sends += 1;
            }
        }
        assert!((499..=501).contains(&sends), "sends = {}", sends);
    }

    #[test]
    fn test_rpc_pacer_respects_threshold() {
        let mut sim = NetworkedSimulation::<NullSim>::new();
        sim.set_desired_server_rpc_send_frequency(10.0);

        assert!(!sim.should_send_server_rpc(0.05));
        assert!(sim.should_send_server_rpc(0.05));
        assert!(!sim.should_send_server_rpc(0.05));
    }

    #[test]
    fn test_debug_target_without_capture() {
        let mut sim = NetworkedSimulation::<NullSim>::new();
        sim.initialize_for_role(NetworkRole::Authority, &InitParameters::default());

        #[cfg(not(feature = "debug-capture"))]
        {
            assert!(matches!(
                sim.serialize(ReplicationTarget::Debug),
                Err(SimulationError::DebugDisabled)
            ));
            assert!(sim.local_debug_buffer().is_none());
        }
        #[cfg(feature = "debug-capture")]
        {
            assert!(sim.local_debug_buffer().is_some());
            assert_eq!(sim.dirty_count(ReplicationTarget::Debug), 0);
        }
    }
}
