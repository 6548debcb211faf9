//! Debug channel
//!
//! Ships captured debug frames from the authority to clients so a session
//! can be inspected from either end. Encoded as JSON on purpose; the frames
//! are diagnostics and being able to read them off the wire beats saving
//! bytes. The whole module is compiled out without the `debug-capture`
//! feature.

use bytes::Bytes;

use veles_core::{DebugFrame, Keyframe, KeyframedBuffer};
use veles_protocol::{Codec, DebugWindow, JsonCodec};

use crate::{ReplicationTarget, SimulationError};

pub(crate) struct DebugReplicator {
    last_serialized_keyframe: Keyframe,
    received: KeyframedBuffer<DebugFrame>,
}

impl DebugReplicator {
    pub(crate) fn new() -> Self {
        Self {
            last_serialized_keyframe: 0,
            received: KeyframedBuffer::new(),
        }
    }

    pub(crate) fn set_received_capacity(&mut self, capacity: usize) {
        self.received.set_capacity(capacity);
    }

    pub(crate) fn received(&self) -> &KeyframedBuffer<DebugFrame> {
        &self.received
    }

    /// Sender: the unsent tail of the local debug ring.
    pub(crate) fn serialize(
        &mut self,
        local: &KeyframedBuffer<DebugFrame>,
    ) -> Result<Bytes, SimulationError> {
        let head = local
            .head_keyframe()
            .ok_or(SimulationError::NothingToSerialize(ReplicationTarget::Debug))?;
        let tail = local.tail_keyframe().expect("head implies tail");
        let first_keyframe = (self.last_serialized_keyframe + 1).max(tail);

        let mut frames = Vec::new();
        let mut keyframe = first_keyframe;
        while keyframe <= head {
            frames.push(
                local
                    .find(keyframe)
                    .cloned()
                    .expect("debug window is contiguous"),
            );
            keyframe += 1;
        }
        self.last_serialized_keyframe = head.max(self.last_serialized_keyframe);

        Ok(JsonCodec.encode(&DebugWindow {
            first_keyframe,
            frames,
        })?)
    }

    /// Receiver: merge the window into the received ring.
    pub(crate) fn deserialize(&mut self, bytes: &Bytes) -> Result<(), SimulationError> {
        let window: DebugWindow = JsonCodec.decode(bytes)?;
        for (offset, frame) in window.frames.into_iter().enumerate() {
            let keyframe = window.first_keyframe + offset as Keyframe;
            if let Some(existing) = self.received.find_mut(keyframe) {
                *existing = frame;
            } else if keyframe >= self.received.next_head_keyframe() {
                if keyframe > self.received.next_head_keyframe() {
                    self.received.reset_next_head_keyframe(keyframe);
                }
                *self.received.write_next() = frame;
            }
            // Frames older than the retained window are dropped.
        }
        Ok(())
    }

    /// Debug frames captured but not yet shipped.
    pub(crate) fn dirty_count(&self, local: Option<&KeyframedBuffer<DebugFrame>>) -> u32 {
        local
            .and_then(|ring| ring.head_keyframe())
            .unwrap_or(0)
            .saturating_sub(self.last_serialized_keyframe)
    }
}
