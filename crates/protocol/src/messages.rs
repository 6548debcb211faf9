//! Replication payload messages
//!
//! One payload type per replication channel. The proxies fill and consume
//! these; the codec turns them into bytes. Framing below this level (how the
//! bytes travel between peers) belongs to the host's transport and is not
//! specified here.

use serde::{Deserialize, Serialize};

use veles_core::{DebugFrame, InputFrame, Keyframe, SimTime};

/// Client to server: a window of recent input frames.
///
/// The window always restarts at the first keyframe the server has not
/// acknowledged, so earlier losses are healed by the next send. Frames are
/// contiguous: `frames[i]` is keyframe `first_keyframe + i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InputWindow<I> {
    pub first_keyframe: Keyframe,
    pub frames: Vec<InputFrame<I>>,
}

impl<I> InputWindow<I> {
    /// Keyframe of the newest input in the window, or `None` when empty.
    pub fn head_keyframe(&self) -> Option<Keyframe> {
        if self.frames.is_empty() {
            None
        } else {
            Some(self.first_keyframe + self.frames.len() as Keyframe - 1)
        }
    }
}

/// Authority to observers: the authoritative state at one keyframe.
///
/// For the owning client the `keyframe` doubles as the input acknowledgment:
/// it is the last input keyframe the authority has processed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SyncSnapshot<S, A> {
    pub keyframe: Keyframe,

    /// Total processed simulation time at `keyframe`, so the receiver can
    /// realign its own clock when it rewinds.
    pub total_sim_time: SimTime,

    pub state: S,

    /// Aux value in effect at `keyframe`.
    pub aux: A,
}

/// One entry of a replay window.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayFrame<S> {
    pub keyframe: Keyframe,
    pub total_sim_time: SimTime,
    pub state: S,
}

/// A short rolling window of sync states for replay and scrubbing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplayWindow<S> {
    pub frames: Vec<ReplayFrame<S>>,
}

/// Server to client: a window of captured debug frames.
///
/// Frames are contiguous by debug keyframe, `frames[i]` being
/// `first_keyframe + i`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugWindow {
    pub first_keyframe: Keyframe,
    pub frames: Vec<DebugFrame>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::{Codec, PostcardCodec};

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct TestInput {
        thrust: i16,
    }

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct TestState {
        position: i32,
    }

    #[test]
    fn test_input_window_head() {
        let window = InputWindow::<TestInput> {
            first_keyframe: 4,
            frames: vec![
                InputFrame::new(SimTime::from_micros(16_000), TestInput { thrust: 1 }),
                InputFrame::new(SimTime::from_micros(16_000), TestInput { thrust: 2 }),
            ],
        };
        assert_eq!(window.head_keyframe(), Some(5));

        let empty = InputWindow::<TestInput> {
            first_keyframe: 4,
            frames: Vec::new(),
        };
        assert_eq!(empty.head_keyframe(), None);
    }

    #[test]
    fn test_input_window_round_trip() {
        let window = InputWindow {
            first_keyframe: 1,
            frames: vec![InputFrame::new(
                SimTime::from_micros(16_667),
                TestInput { thrust: -3 },
            )],
        };
        let bytes = PostcardCodec.encode(&window).unwrap();
        let decoded: InputWindow<TestInput> = PostcardCodec.decode(&bytes).unwrap();
        assert_eq!(window, decoded);
    }

    #[test]
    fn test_sync_snapshot_round_trip() {
        let snapshot = SyncSnapshot {
            keyframe: 9,
            total_sim_time: SimTime::from_micros(150_000),
            state: TestState { position: 77 },
            aux: 3u8,
        };
        let bytes = PostcardCodec.encode(&snapshot).unwrap();
        let decoded: SyncSnapshot<TestState, u8> = PostcardCodec.decode(&bytes).unwrap();
        assert_eq!(snapshot, decoded);
    }
}
