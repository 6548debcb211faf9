//! # Veles
//!
//! A deterministic networked simulation library with support for:
//! - Client-side prediction with automatic server reconciliation
//! - Keyframed input, sync and aux buffers with rollback and replay
//! - Interpolating and extrapolating observation of remote simulations
//! - Dependent simulations that follow a parent's rollback window
//!
//! ## Components
//!
//! - `veles-core`: fixed-point simulation time, keyframed ring buffers,
//!   tick state
//! - `veles-protocol`: replication payloads and codecs
//! - `veles-simulation`: the tick engine, replication proxies and the
//!   orchestrator
//!
//! ## Entry points
//!
//! Implement [`Simulation`] for your state types and [`Driver`] for the host
//! object, then create one [`NetworkedSimulation`] per peer that cares about
//! the simulated object.

pub use veles_protocol as protocol;
pub use veles_simulation as simulation;

pub use veles_core::{
    BufferContainer, DebugFrame, InputFrame, Keyframe, KeyframedBuffer, SimTime, TickState,
};
pub use veles_simulation::{
    Driver, InitParameters, NetworkRole, NetworkedSimulation, ReplicationTarget, Simulation,
    SimulatedUpdateMode, SimulationError, SyncState, TickParameters,
};
