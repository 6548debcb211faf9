//! # Veles Simulation
//!
//! A deterministic, client-predicted, server-reconciled simulation engine.
//!
//! One [`NetworkedSimulation`] instance runs on every peer that cares about a
//! simulated object. The locally controlled client predicts by running the
//! update function immediately against its own inputs; the authority re-runs
//! the same updates when the inputs arrive; observers present a lower-rate
//! stream of authoritative states. When the authority disagrees with a
//! prediction, the predictor rewinds its sync buffer and replays the inputs
//! it still holds.
//!
//! ## Architecture
//!
//! - **Authority**: consumes received input windows, produces authoritative
//!   sync snapshots
//! - **Autonomous proxy**: produces inputs, predicts, reconciles against
//!   snapshots
//! - **Simulated proxy**: observes, interpolating or extrapolating between
//!   snapshots
//! - **Shared**: the same [`Simulation`] implementation runs on every peer
//!
//! ## Example
//!
//! ```rust
//! use veles_core::SimTime;
//! use veles_simulation::{
//!     Driver, InitParameters, NetworkRole, NetworkedSimulation, Simulation, SyncState,
//!     TickParameters,
//! };
//! use serde::{Deserialize, Serialize};
//!
//! #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
//! struct Thrust {
//!     amount: f32,
//! }
//!
//! #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
//! struct Position {
//!     x: f32,
//! }
//!
//! impl SyncState for Position {}
//!
//! struct Mover;
//!
//! impl Simulation for Mover {
//!     type Input = Thrust;
//!     type Sync = Position;
//!     type Aux = ();
//!     const GROUP_NAME: &'static str = "mover";
//!
//!     fn update(
//!         _driver: &mut dyn Driver<Self>,
//!         delta_seconds: f32,
//!         input: &Thrust,
//!         prev: &Position,
//!         next: &mut Position,
//!         _aux: &(),
//!     ) {
//!         next.x = prev.x + input.amount * delta_seconds;
//!     }
//! }
//!
//! struct MoverDriver;
//!
//! impl Driver<Mover> for MoverDriver {
//!     fn debug_name(&self) -> String {
//!         "mover".into()
//!     }
//!     fn init_sync_state(&self, out: &mut Position) {
//!         out.x = 0.0;
//!     }
//!     fn produce_input(&mut self, _sim_time: SimTime, out: &mut Thrust) {
//!         out.amount = 1.0;
//!     }
//!     fn finalize_frame(&mut self, _sync: &Position) {}
//! }
//!
//! let mut sim = NetworkedSimulation::<Mover>::new();
//! sim.initialize_for_role(NetworkRole::AutonomousProxy, &InitParameters::default());
//!
//! let mut driver = MoverDriver;
//! sim.tick(
//!     &mut driver,
//!     &TickParameters {
//!         role: NetworkRole::AutonomousProxy,
//!         local_delta_time_seconds: 0.1,
//!     },
//! );
//! assert!(sim.sync_head_state().unwrap().x > 0.0);
//! ```

pub mod dependents;
pub mod model;

mod replicators;

pub use dependents::{
    clear_all_dependent_simulations, set_parent_simulation, RollbackParticipant, SharedSimulation,
    SimulationHandle, SimulationId,
};
pub use model::NetworkedSimulation;
pub use replicators::SimulatedUpdateMode;

use serde::{de::DeserializeOwned, Serialize};
use thiserror::Error;

use veles_core::{BufferContainer, DebugFrame, InputFrame, SimTime};
use veles_protocol::ProtocolError;

/// Network role of the local peer with respect to one simulation instance.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NetworkRole {
    /// The authoritative peer: its sync states are ground truth.
    Authority,

    /// The locally controlled client: predicts ahead of the authority.
    AutonomousProxy,

    /// A peer observing somebody else's simulation.
    SimulatedProxy,
}

/// Replication channel identifiers for [`NetworkedSimulation::serialize`],
/// [`NetworkedSimulation::deserialize`] and
/// [`NetworkedSimulation::dirty_count`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ReplicationTarget {
    /// Client to server input stream.
    ServerRpc,

    /// Authority to the owning client: authoritative snapshots with input
    /// acknowledgment.
    AutonomousProxy,

    /// Authority to observers: authoritative snapshots.
    SimulatedProxy,

    /// Short rolling window of sync states for replay and scrubbing.
    Replay,

    /// Captured debug frames, server to client. Requires the
    /// `debug-capture` feature.
    Debug,
}

/// Per-call parameters for [`NetworkedSimulation::tick`].
#[derive(Debug, Clone, Copy)]
pub struct TickParameters {
    pub role: NetworkRole,

    /// Host frame delta in real-time seconds.
    pub local_delta_time_seconds: f32,
}

/// Buffer capacities for [`NetworkedSimulation::initialize_for_role`], all
/// in keyframes.
#[derive(Debug, Clone)]
pub struct InitParameters {
    pub input_buffer_size: usize,
    pub synced_buffer_size: usize,
    pub aux_buffer_size: usize,
    pub debug_buffer_size: usize,
    pub historic_buffer_size: usize,
    pub replay_window_size: usize,
}

impl Default for InitParameters {
    fn default() -> Self {
        Self {
            input_buffer_size: 32,
            synced_buffer_size: 32,
            aux_buffer_size: 32,
            debug_buffer_size: 64,
            historic_buffer_size: 256,
            replay_window_size: 3,
        }
    }
}

/// Simulation-layer errors
#[derive(Error, Debug)]
pub enum SimulationError {
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// The `Debug` replication target was used in a build without the
    /// `debug-capture` feature.
    #[error("Debug capture is compiled out of this build")]
    DebugDisabled,

    /// Serialization was requested before the channel has anything to emit,
    /// e.g. an authoritative snapshot before the first processed input.
    #[error("No data available to serialize for {0:?}")]
    NothingToSerialize(ReplicationTarget),
}

/// Input command produced by the local driver each frame.
///
/// Any serde value type qualifies; the blanket impl makes this a trait
/// alias. Inputs are immutable once written into the input buffer.
pub trait InputCmd: Clone + Default + PartialEq + Serialize + DeserializeOwned + 'static {}

impl<T> InputCmd for T where T: Clone + Default + PartialEq + Serialize + DeserializeOwned + 'static {}

/// Side input to the simulation that changes at discrete points rather than
/// every frame. Blanket-implemented like [`InputCmd`].
pub trait AuxState: Clone + Default + PartialEq + Serialize + DeserializeOwned + 'static {}

impl<T> AuxState for T where T: Clone + Default + PartialEq + Serialize + DeserializeOwned + 'static {}

/// The state the simulation keeps in sync across peers.
///
/// Implemented explicitly (not blanket) so games can override the two
/// comparison hooks.
pub trait SyncState: Clone + Default + PartialEq + Serialize + DeserializeOwned + 'static {
    /// Whether this locally predicted state differs enough from the
    /// authoritative one to warrant a rollback.
    ///
    /// The default is exact inequality. Games with tolerable floating-point
    /// drift should override this with a per-field threshold comparison.
    fn diverges_from(&self, authoritative: &Self) -> bool {
        self != authoritative
    }

    /// Blend between two states for smoothed observation.
    ///
    /// The default snaps to `to`, which is correct but unsmoothed; games
    /// that want visual interpolation override this.
    fn interpolate(&self, to: &Self, alpha: f32) -> Self {
        let _ = alpha;
        to.clone()
    }
}

/// The user-supplied simulation: value types plus the deterministic update
/// function.
///
/// # Determinism
///
/// `update` MUST be a pure function of its arguments. Given the same
/// previous state, input, aux value and delta, it must produce the same next
/// state on every peer, every time. Reading clocks, random number
/// generators or any global state breaks reconciliation.
pub trait Simulation: Sized + 'static {
    /// Per-frame input payload produced by the local driver.
    type Input: InputCmd;

    /// The state that evolves frame to frame and is compared across peers.
    type Sync: SyncState;

    /// Slowly changing side input, tracked and reconciled separately.
    type Aux: AuxState;

    /// Identifier used by host schedulers to group simulations.
    const GROUP_NAME: &'static str;

    /// Computes the state at the next keyframe from the previous one.
    fn update(
        driver: &mut dyn Driver<Self>,
        delta_seconds: f32,
        input: &Self::Input,
        prev: &Self::Sync,
        next: &mut Self::Sync,
        aux: &Self::Aux,
    );
}

/// The host object that owns and drives a simulation instance.
///
/// The engine calls back into the driver for everything that crosses the
/// boundary to the outside world: initial state, fresh inputs, and
/// presentation of finished frames. All callbacks must return without
/// suspending; the engine is synchronous.
pub trait Driver<S: Simulation> {
    /// Name used in log output. Recommended: simulation name plus the local
    /// role.
    fn debug_name(&self) -> String;

    /// Fully initializes a sync state value for the seed keyframe. Also used
    /// to recover from continuity breaks.
    fn init_sync_state(&self, out: &mut S::Sync);

    /// Fills a new input command for the current local frame. `sim_time` is
    /// the total processed simulation time when the input was requested.
    fn produce_input(&mut self, sim_time: SimTime, out: &mut S::Input);

    /// Called at the end of a tick that advanced the sync head, with the new
    /// head state, so the host can present it.
    fn finalize_frame(&mut self, sync: &S::Sync);
}

/// The buffer container of one simulation instance, typed by its
/// [`Simulation`].
pub type SimulationBuffers<S> = BufferContainer<
    InputFrame<<S as Simulation>::Input>,
    <S as Simulation>::Sync,
    <S as Simulation>::Aux,
    DebugFrame,
>;
