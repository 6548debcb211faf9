//! Replay channel
//!
//! Records a short rolling window of authoritative sync states for replay
//! and scrubbing. The channel never feeds back into the live simulation:
//! serializing captures the newest states, deserializing accumulates them on
//! the receiving side, and that is all.

use bytes::Bytes;

use veles_core::{Keyframe, TickState};
use veles_protocol::{Codec, PostcardCodec, ReplayFrame, ReplayWindow};

use crate::{ReplicationTarget, Simulation, SimulationBuffers, SimulationError};

pub(crate) struct ReplayReplicator<S: Simulation> {
    window_size: usize,
    last_serialized_keyframe: Keyframe,
    received: Vec<ReplayFrame<S::Sync>>,
}

impl<S: Simulation> ReplayReplicator<S> {
    pub(crate) fn new() -> Self {
        Self {
            window_size: 3,
            last_serialized_keyframe: 0,
            received: Vec::new(),
        }
    }

    pub(crate) fn set_window_size(&mut self, window_size: usize) {
        self.window_size = window_size.max(1);
    }

    /// Received frames, oldest first.
    pub(crate) fn frames(&self) -> &[ReplayFrame<S::Sync>] {
        &self.received
    }

    /// Sender: capture the newest `window_size` sync states.
    pub(crate) fn serialize(
        &mut self,
        buffers: &SimulationBuffers<S>,
        tick_state: &TickState,
    ) -> Result<Bytes, SimulationError> {
        let head = buffers
            .sync
            .head_keyframe()
            .ok_or(SimulationError::NothingToSerialize(ReplicationTarget::Replay))?;
        let tail = buffers.sync.tail_keyframe().expect("head implies tail");
        let first = head
            .saturating_sub(self.window_size as Keyframe - 1)
            .max(tail);

        let frames = (first..=head)
            .map(|keyframe| ReplayFrame {
                keyframe,
                total_sim_time: tick_state
                    .total_processed_at(keyframe)
                    .unwrap_or_else(|| tick_state.total_processed_time()),
                state: buffers
                    .sync
                    .find(keyframe)
                    .cloned()
                    .expect("sync window is contiguous"),
            })
            .collect();
        self.last_serialized_keyframe = head.max(self.last_serialized_keyframe);

        Ok(PostcardCodec.encode(&ReplayWindow { frames })?)
    }

    /// Receiver: merge new frames into the rolling window.
    pub(crate) fn deserialize(&mut self, bytes: &Bytes) -> Result<(), SimulationError> {
        let window: ReplayWindow<S::Sync> = PostcardCodec.decode(bytes)?;
        for frame in window.frames {
            match self
                .received
                .iter_mut()
                .find(|existing| existing.keyframe == frame.keyframe)
            {
                Some(existing) => *existing = frame,
                None => self.received.push(frame),
            }
        }
        self.received.sort_by_key(|frame| frame.keyframe);
        if self.received.len() > self.window_size {
            let excess = self.received.len() - self.window_size;
            self.received.drain(..excess);
        }
        Ok(())
    }

    /// Sync keyframes not yet captured into the replay stream.
    pub(crate) fn dirty_count(&self, buffers: &SimulationBuffers<S>) -> u32 {
        buffers
            .sync
            .head_keyframe()
            .unwrap_or(0)
            .saturating_sub(self.last_serialized_keyframe)
    }
}
