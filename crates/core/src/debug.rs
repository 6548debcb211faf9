//! Per-frame diagnostic records
//!
//! One `DebugFrame` is written per local tick when debug capture is enabled.
//! The frames are replicated to clients over the debug channel so a session
//! can be inspected from either side of the connection.

use serde::{Deserialize, Serialize};

use crate::{Keyframe, SimTime};

/// Diagnostic record for one tick of one simulation instance.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct DebugFrame {
    /// Host frame delta handed to `tick`, in real-time seconds.
    pub local_delta_seconds: f32,

    /// Monotonic counter of local ticks, independent of keyframes.
    pub local_frame_number: u64,

    /// Input keyframes consumed during this tick, in order.
    pub processed_keyframes: Vec<Keyframe>,

    /// Time budget left when the tick ended.
    pub remaining_allowed_time: SimTime,

    /// Highest input keyframe this peer had sent when the next tick began.
    pub last_sent_input_keyframe: Keyframe,

    /// Highest input keyframe received from the remote peer at tick start.
    pub last_received_input_keyframe: Keyframe,

    /// Last processed input keyframe when the tick ended.
    pub last_processed_keyframe: Keyframe,

    /// Input buffer head when the tick ended.
    pub input_head_keyframe: Keyframe,
}
