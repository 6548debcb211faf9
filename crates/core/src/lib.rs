//! # Veles Core
//!
//! Foundation types for the Veles networked simulation: fixed-point
//! simulation time, the keyframed ring buffer, the buffer container that
//! bundles one instance's per-frame streams, and the tick state that tracks
//! processed time and budgets.
//!
//! Everything in this crate is plain single-threaded data with no opinion on
//! roles or replication; the simulation machine in `veles-simulation` builds
//! on top of it.

pub mod buffer;
pub mod container;
pub mod debug;
pub mod tick;
pub mod time;

pub use buffer::KeyframedBuffer;
pub use container::BufferContainer;
pub use debug::DebugFrame;
pub use tick::TickState;
pub use time::SimTime;

use serde::{Deserialize, Serialize};

/// Monotonically increasing id of one discrete simulation step.
///
/// Keyframe 0 is the seed slot: it holds the initial sync state and an empty
/// input sentinel, and is never produced by the update function.
pub type Keyframe = u32;

/// One input command together with the simulation time it covers.
///
/// User input types carry no timing of their own; the engine wraps each
/// command with the frame delta it was produced under so the consumption
/// loop can spend time budgets, and so replayed inputs keep their original
/// timing.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct InputFrame<I> {
    /// Simulation time this input advances the simulation by. Positive for
    /// every real input; zero only in the keyframe-0 sentinel.
    pub frame_delta_time: SimTime,

    /// The user input command.
    pub cmd: I,
}

impl<I> InputFrame<I> {
    pub fn new(frame_delta_time: SimTime, cmd: I) -> Self {
        Self {
            frame_delta_time,
            cmd,
        }
    }
}
