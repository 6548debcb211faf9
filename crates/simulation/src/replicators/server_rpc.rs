//! Server RPC channel
//!
//! The input stream between the owning client and the authority. On the
//! client this proxy serializes the window of not-yet-acknowledged input
//! frames; on the authority it ingests those windows, appends new inputs and
//! accrues their frame deltas as simulation time the client is allowed to
//! consume. The accrued grant is what rate-limits a client: the authority
//! only ever advances as far as the inputs it has actually received.

use std::marker::PhantomData;

use bytes::Bytes;

use veles_core::{Keyframe, SimTime, TickState};
use veles_protocol::{Codec, InputWindow, PostcardCodec};

use crate::{Simulation, SimulationBuffers, SimulationError};

pub(crate) struct ServerRpcReplicator<S: Simulation> {
    /// Simulation time received with new inputs but not yet granted to the
    /// tick budget.
    granted_time: SimTime,

    /// Highest input keyframe that passed through this proxy's serializer,
    /// in either direction.
    last_serialized_keyframe: Keyframe,

    last_finalized_keyframe: Keyframe,

    _marker: PhantomData<S>,
}

impl<S: Simulation> ServerRpcReplicator<S> {
    pub(crate) fn new() -> Self {
        Self {
            granted_time: SimTime::ZERO,
            last_serialized_keyframe: 0,
            last_finalized_keyframe: 0,
            _marker: PhantomData,
        }
    }

    pub(crate) fn last_serialized_keyframe(&self) -> Keyframe {
        self.last_serialized_keyframe
    }

    /// Authority pre-tick: release the received time grant into the budget
    /// and allow consumption up to the received input head.
    pub(crate) fn pre_sim_tick(
        &mut self,
        buffers: &mut SimulationBuffers<S>,
        tick_state: &mut TickState,
    ) {
        let granted = std::mem::take(&mut self.granted_time);
        if granted.is_positive() {
            tick_state.grant_simulation_time(granted);
        }
        tick_state.max_allowed_input_keyframe = buffers.input.head_keyframe().unwrap_or(0);
    }

    /// Authority post-tick: present the new head state to the driver. The
    /// outbound snapshot channels compute their dirtiness on demand.
    pub(crate) fn post_sim_tick(
        &mut self,
        driver: &mut dyn crate::Driver<S>,
        buffers: &SimulationBuffers<S>,
    ) {
        super::finalize_if_advanced(driver, buffers, &mut self.last_finalized_keyframe);
    }

    /// The authority trusts its own state; nothing to reconcile.
    pub(crate) fn reconcile(&mut self) {}

    /// Client send: the window of inputs past the server's acknowledgment.
    pub(crate) fn serialize(
        &mut self,
        buffers: &SimulationBuffers<S>,
        acknowledged: Keyframe,
    ) -> Result<Bytes, SimulationError> {
        let head = buffers.input.head_keyframe().unwrap_or(0);
        let tail = buffers.input.tail_keyframe().unwrap_or(0);
        // Keyframe 0 is the sentinel and is never sent.
        let first_keyframe = (acknowledged + 1).max(tail).max(1);

        let mut frames = Vec::new();
        let mut keyframe = first_keyframe;
        while keyframe <= head {
            let frame = buffers
                .input
                .find(keyframe)
                .expect("input window is contiguous");
            frames.push(frame.clone());
            keyframe += 1;
        }
        self.last_serialized_keyframe = head.max(self.last_serialized_keyframe);

        let window = InputWindow {
            first_keyframe,
            frames,
        };
        Ok(PostcardCodec.encode(&window)?)
    }

    /// Authority receive: append the inputs this peer does not have yet.
    pub(crate) fn deserialize(
        &mut self,
        bytes: &Bytes,
        buffers: &mut SimulationBuffers<S>,
    ) -> Result<(), SimulationError> {
        let window: InputWindow<S::Input> = PostcardCodec.decode(bytes)?;
        let Some(window_head) = window.head_keyframe() else {
            return Ok(());
        };

        let input_head = buffers.input.head_keyframe().unwrap_or(0);
        if window.first_keyframe > input_head + 1 {
            // The client resends everything unacknowledged, so a hole here
            // means its buffer already evicted inputs this peer never saw.
            // Appending past the hole would stall the consumption loop
            // forever; drop the window instead.
            tracing::warn!(
                first_keyframe = window.first_keyframe,
                input_head,
                "Dropping non-contiguous input window"
            );
            return Ok(());
        }

        let mut appended = 0u32;
        for (offset, frame) in window.frames.iter().enumerate() {
            let keyframe = window.first_keyframe + offset as Keyframe;
            if keyframe <= input_head {
                continue;
            }
            debug_assert_eq!(buffers.input.next_head_keyframe(), keyframe);
            *buffers.input.write_next() = frame.clone();
            self.granted_time += frame.frame_delta_time;
            appended += 1;
        }
        self.last_serialized_keyframe = window_head.max(self.last_serialized_keyframe);

        if appended > 0 {
            tracing::debug!(
                appended,
                head = ?buffers.input.head_keyframe(),
                "Received input window"
            );
        }
        Ok(())
    }

    /// Input keyframes produced locally but not serialized yet.
    pub(crate) fn dirty_count(&self, buffers: &SimulationBuffers<S>) -> u32 {
        buffers
            .input
            .head_keyframe()
            .unwrap_or(0)
            .saturating_sub(self.last_serialized_keyframe)
    }
}
