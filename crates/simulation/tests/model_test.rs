//! Integration tests for the networked simulation model
//!
//! Covers the tick engine scenarios (cold start, budget clamping,
//! continuity recovery), prediction rollback with input replay, dependent
//! rollback propagation, and the determinism and idempotence laws.

use std::cell::RefCell;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use veles_core::{InputFrame, SimTime};
use veles_protocol::{Codec, InputWindow, PostcardCodec};
use veles_simulation::{
    set_parent_simulation, Driver, InitParameters, NetworkRole, NetworkedSimulation,
    ReplicationTarget, RollbackParticipant, SharedSimulation, SimulatedUpdateMode, Simulation,
    SyncState, TickParameters,
};

// ============================================================================
// Test Simulation Implementation
// ============================================================================

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct MoveInput {
    accel: i32,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct MoveState {
    position: i64,
    velocity: i64,
}

impl SyncState for MoveState {}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
struct Wind {
    push: i64,
}

struct MoveSim;

impl Simulation for MoveSim {
    type Input = MoveInput;
    type Sync = MoveState;
    type Aux = Wind;
    const GROUP_NAME: &'static str = "move";

    fn update(
        _driver: &mut dyn Driver<Self>,
        delta_seconds: f32,
        input: &MoveInput,
        prev: &MoveState,
        next: &mut MoveState,
        aux: &Wind,
    ) {
        // Integer math keeps two runs bit-identical.
        let dt_micros = (delta_seconds as f64 * 1_000_000.0).round() as i64;
        next.velocity = prev.velocity + input.accel as i64;
        next.position = prev.position + next.velocity * dt_micros / 1_000_000 + aux.push;
    }
}

struct MoveDriver {
    name: String,
    accel_script: Vec<i32>,
    produced: usize,
    finalized: Vec<MoveState>,
}

impl MoveDriver {
    fn new(name: &str) -> Self {
        Self {
            name: name.into(),
            accel_script: vec![2, -1, 3, 0, 1],
            produced: 0,
            finalized: Vec::new(),
        }
    }
}

impl Driver<MoveSim> for MoveDriver {
    fn debug_name(&self) -> String {
        self.name.clone()
    }

    fn init_sync_state(&self, out: &mut MoveState) {
        *out = MoveState::default();
    }

    fn produce_input(&mut self, _sim_time: SimTime, out: &mut MoveInput) {
        out.accel = self.accel_script[self.produced % self.accel_script.len()];
        self.produced += 1;
    }

    fn finalize_frame(&mut self, sync: &MoveState) {
        self.finalized.push(sync.clone());
    }
}

const DT: f32 = 0.1;

fn autonomous_tick() -> TickParameters {
    TickParameters {
        role: NetworkRole::AutonomousProxy,
        local_delta_time_seconds: DT,
    }
}

fn authority_tick() -> TickParameters {
    TickParameters {
        role: NetworkRole::Authority,
        local_delta_time_seconds: DT,
    }
}

fn new_client() -> (NetworkedSimulation<MoveSim>, MoveDriver) {
    let mut sim = NetworkedSimulation::new();
    sim.initialize_for_role(NetworkRole::AutonomousProxy, &InitParameters::default());
    (sim, MoveDriver::new("client"))
}

fn new_server() -> (NetworkedSimulation<MoveSim>, MoveDriver) {
    let mut sim = NetworkedSimulation::new();
    sim.initialize_for_role(NetworkRole::Authority, &InitParameters::default());
    (sim, MoveDriver::new("server"))
}

/// One full exchange: client input window to the server, one server tick,
/// authoritative snapshot back, client reconcile.
fn exchange(
    client: &mut NetworkedSimulation<MoveSim>,
    server: &mut NetworkedSimulation<MoveSim>,
    server_driver: &mut MoveDriver,
) {
    let inputs = client.serialize(ReplicationTarget::ServerRpc).unwrap();
    server
        .deserialize(ReplicationTarget::ServerRpc, &inputs)
        .unwrap();
    server.tick(server_driver, &authority_tick());
    let snapshot = server.serialize(ReplicationTarget::AutonomousProxy).unwrap();
    client
        .deserialize(ReplicationTarget::AutonomousProxy, &snapshot)
        .unwrap();
    client.reconcile(NetworkRole::AutonomousProxy);
}

// ============================================================================
// Tick engine scenarios
// ============================================================================

#[test]
fn test_cold_start_on_autonomous() {
    let mut sim = NetworkedSimulation::<MoveSim>::new();
    sim.initialize_for_role(
        NetworkRole::AutonomousProxy,
        &InitParameters {
            input_buffer_size: 8,
            synced_buffer_size: 8,
            ..InitParameters::default()
        },
    );
    let mut driver = MoveDriver::new("cold-start");

    sim.tick(&mut driver, &autonomous_tick());

    assert_eq!(sim.input_head_keyframe(), Some(1));
    assert_eq!(sim.sync_head_keyframe(), Some(1));
    assert_eq!(sim.last_processed_input_keyframe(), 1);

    // The seed state is never produced by the update function.
    assert_eq!(sim.sync_state(0), Some(&MoveState::default()));

    // The head state is exactly one update from the seed.
    let dt_seconds = SimTime::from_seconds(DT).to_real_time_seconds();
    let mut expected = MoveState::default();
    MoveSim::update(
        &mut driver,
        dt_seconds,
        &MoveInput { accel: 2 },
        &MoveState::default(),
        &mut expected,
        &Wind::default(),
    );
    assert_eq!(sim.sync_state(1), Some(&expected));
    assert_eq!(driver.finalized.last(), Some(&expected));
}

#[test]
fn test_budget_clamp_defers_consumption() {
    let (mut server, mut driver) = new_server();

    let window = InputWindow {
        first_keyframe: 1,
        frames: vec![InputFrame::new(
            SimTime::from_seconds(DT),
            MoveInput { accel: 1 },
        )],
    };
    let bytes = PostcardCodec.encode(&window).unwrap();
    server
        .deserialize(ReplicationTarget::ServerRpc, &bytes)
        .unwrap();

    // Leave the budget short of one input's delta.
    server
        .tick_state_mut()
        .grant_simulation_time(SimTime::from_seconds(-0.05));
    server.tick(&mut driver, &authority_tick());

    assert_eq!(server.last_processed_input_keyframe(), 0);
    assert_eq!(server.sync_head_keyframe(), Some(0));

    // Refill; the deferred input is consumed on the next tick.
    server
        .tick_state_mut()
        .grant_simulation_time(SimTime::from_seconds(DT));
    server.tick(&mut driver, &authority_tick());

    assert_eq!(server.last_processed_input_keyframe(), 1);
    assert_eq!(server.sync_head_keyframe(), Some(1));
}

#[test]
fn test_continuity_break_reseeds_and_resumes() {
    let (mut sim, mut driver) = new_client();
    for _ in 0..5 {
        sim.tick(&mut driver, &autonomous_tick());
    }
    assert_eq!(sim.last_processed_input_keyframe(), 5);
    let head_before = sim.sync_head_state().cloned().unwrap();

    // Corrupt the sync head out from under the tick state.
    sim.buffers_mut().sync.reset_next_head_keyframe(1);
    *sim.buffers_mut().sync.write_next() = MoveState {
        position: 9999,
        velocity: 9999,
    };
    assert_eq!(sim.sync_head_keyframe(), Some(1));

    sim.tick(&mut driver, &autonomous_tick());

    // Reseeded at the last processed keyframe, then consumed input 6.
    assert_eq!(sim.last_processed_input_keyframe(), 6);
    assert_eq!(sim.sync_head_keyframe(), Some(6));
    // The reseed restarts from the driver's initial state, not the corrupt
    // value and not the pre-corruption trajectory.
    assert_ne!(sim.sync_state(6), Some(&head_before));
    assert_eq!(sim.sync_state(5), Some(&MoveState::default()));
}

// ============================================================================
// Rollback and replay
// ============================================================================

#[test]
fn test_rollback_and_replay_on_divergence() {
    let (mut client, mut client_driver) = new_client();
    let (mut server, mut server_driver) = new_server();

    // The server runs under an aux value the client did not predict, so
    // every authoritative state diverges from the prediction.
    server.write_aux(Wind { push: 7 });

    // Client predicts 10 frames ahead; the server has processed 7 of them.
    for _ in 0..7 {
        client.tick(&mut client_driver, &autonomous_tick());
    }
    let inputs = client.serialize(ReplicationTarget::ServerRpc).unwrap();
    for _ in 0..3 {
        client.tick(&mut client_driver, &autonomous_tick());
    }
    server
        .deserialize(ReplicationTarget::ServerRpc, &inputs)
        .unwrap();
    server.tick(&mut server_driver, &authority_tick());
    assert_eq!(server.last_processed_input_keyframe(), 7);

    let pre_rollback_head = client.sync_state(10).cloned().unwrap();

    let snapshot = server.serialize(ReplicationTarget::AutonomousProxy).unwrap();
    client
        .deserialize(ReplicationTarget::AutonomousProxy, &snapshot)
        .unwrap();
    client.reconcile(NetworkRole::AutonomousProxy);

    // Rewound to the authoritative keyframe; retained inputs not replayed
    // yet.
    assert_eq!(client.sync_head_keyframe(), Some(7));
    assert_eq!(client.last_processed_input_keyframe(), 7);
    assert_eq!(
        client.sync_state(7),
        server.sync_state(7),
        "authoritative state was adopted verbatim"
    );

    // The next tick replays inputs 8..10 and appends the new frame 11.
    client.tick(&mut client_driver, &autonomous_tick());
    assert_eq!(client.last_processed_input_keyframe(), 11);
    assert_ne!(
        client.sync_state(10),
        Some(&pre_rollback_head),
        "replayed trajectory differs from the bad prediction"
    );

    // Replay equivalence: once the server processes the same inputs it
    // arrives at the same states.
    let inputs = client.serialize(ReplicationTarget::ServerRpc).unwrap();
    server
        .deserialize(ReplicationTarget::ServerRpc, &inputs)
        .unwrap();
    server.tick(&mut server_driver, &authority_tick());
    assert_eq!(server.last_processed_input_keyframe(), 11);
    assert_eq!(client.sync_state(11), server.sync_state(11));
}

#[test]
fn test_reconcile_is_idempotent_when_consistent() {
    let (mut client, mut client_driver) = new_client();
    let (mut server, mut server_driver) = new_server();

    for _ in 0..5 {
        client.tick(&mut client_driver, &autonomous_tick());
        exchange(&mut client, &mut server, &mut server_driver);
    }
    assert_eq!(client.sync_head_keyframe(), server.sync_head_keyframe());

    let head_keyframe = client.sync_head_keyframe().unwrap();
    let head_state = client.sync_head_state().cloned().unwrap();
    let total = client.total_processed_time();

    // Apply the same authoritative snapshot again.
    let snapshot = server.serialize(ReplicationTarget::AutonomousProxy).unwrap();
    client
        .deserialize(ReplicationTarget::AutonomousProxy, &snapshot)
        .unwrap();
    client.reconcile(NetworkRole::AutonomousProxy);

    assert_eq!(client.sync_head_keyframe(), Some(head_keyframe));
    assert_eq!(client.sync_head_state(), Some(&head_state));
    assert_eq!(client.total_processed_time(), total);
    assert_eq!(client.last_processed_input_keyframe(), head_keyframe);
}

#[test]
fn test_rollback_past_window_reseeds_from_authority() {
    let (mut client, mut client_driver) = new_client();
    let (mut server, mut server_driver) = new_server();
    server.write_aux(Wind { push: 3 });

    // Send the first frame, then predict far enough that keyframe 1 is
    // evicted from the client's sync window (capacity 32).
    client.tick(&mut client_driver, &autonomous_tick());
    let inputs = client.serialize(ReplicationTarget::ServerRpc).unwrap();
    server
        .deserialize(ReplicationTarget::ServerRpc, &inputs)
        .unwrap();
    server.tick(&mut server_driver, &authority_tick());
    assert_eq!(server.last_processed_input_keyframe(), 1);

    for _ in 0..40 {
        client.tick(&mut client_driver, &autonomous_tick());
    }
    assert!(client.buffers().sync.tail_keyframe().unwrap() > 1);

    let snapshot = server.serialize(ReplicationTarget::AutonomousProxy).unwrap();
    client
        .deserialize(ReplicationTarget::AutonomousProxy, &snapshot)
        .unwrap();
    client.reconcile(NetworkRole::AutonomousProxy);

    // Prediction dropped; the authoritative state is the new origin.
    assert_eq!(client.sync_head_keyframe(), Some(1));
    assert_eq!(client.sync_state(1), server.sync_state(1));

    // The stale inputs went with it and the stream continues from here.
    client.tick(&mut client_driver, &autonomous_tick());
    assert_eq!(client.last_processed_input_keyframe(), 2);
}

// ============================================================================
// Dependent propagation
// ============================================================================

#[test]
fn test_dependent_rollback_propagation() {
    let client = Rc::new(RefCell::new(NetworkedSimulation::<MoveSim>::new()));
    let child = Rc::new(RefCell::new(NetworkedSimulation::<MoveSim>::new()));
    client
        .borrow_mut()
        .initialize_for_role(NetworkRole::AutonomousProxy, &InitParameters::default());
    {
        let mut child = child.borrow_mut();
        child.initialize_for_role(NetworkRole::SimulatedProxy, &InitParameters::default());
        child.set_simulated_update_mode(SimulatedUpdateMode::Extrapolate);
        // Give the child a trajectory of its own to re-derive.
        child.write_aux(Wind { push: 2 });
    }
    let mut client_driver = MoveDriver::new("client");
    let mut child_driver = MoveDriver::new("child");
    let (mut server, mut server_driver) = new_server();
    server.write_aux(Wind { push: 7 });

    let client_shared: SharedSimulation = client.clone();
    let child_shared: SharedSimulation = child.clone();
    set_parent_simulation(&child_shared, Some(&client_shared));
    assert_eq!(
        client.borrow().dependent_ids(),
        vec![child.borrow().simulation_id()]
    );

    let child_tick = TickParameters {
        role: NetworkRole::SimulatedProxy,
        local_delta_time_seconds: DT,
    };

    // Parent and child advance in lockstep, parent first.
    for frame in 0..10 {
        client.borrow_mut().tick(&mut client_driver, &autonomous_tick());
        child.borrow_mut().tick(&mut child_driver, &child_tick);
        if frame == 6 {
            let inputs = client
                .borrow_mut()
                .serialize(ReplicationTarget::ServerRpc)
                .unwrap();
            server
                .deserialize(ReplicationTarget::ServerRpc, &inputs)
                .unwrap();
        }
    }
    server.tick(&mut server_driver, &authority_tick());
    assert_eq!(server.last_processed_input_keyframe(), 7);
    assert_eq!(child.borrow().last_processed_input_keyframe(), 10);
    let child_head_before = child.borrow().sync_state(10).cloned().unwrap();

    // Parent reconciles with a rollback window of (7..10].
    let snapshot = server.serialize(ReplicationTarget::AutonomousProxy).unwrap();
    client
        .borrow_mut()
        .deserialize(ReplicationTarget::AutonomousProxy, &snapshot)
        .unwrap();
    client.borrow_mut().reconcile(NetworkRole::AutonomousProxy);

    // Parent replays 8..10 (plus its new frame 11); the child executes the
    // queued window at the start of its own tick and then advances with it.
    client.borrow_mut().tick(&mut client_driver, &autonomous_tick());
    assert_eq!(client.borrow().last_processed_input_keyframe(), 11);

    child.borrow_mut().tick(&mut child_driver, &child_tick);
    assert_eq!(child.borrow().last_processed_input_keyframe(), 11);
    assert_eq!(child.borrow().sync_head_keyframe(), Some(11));
    // The window was re-run, not skipped: keyframes 8..10 are live again.
    assert!(child.borrow().sync_state(8).is_some());
    assert_eq!(
        child.borrow().sync_state(10),
        Some(&child_head_before),
        "a child with unchanged inputs re-derives the same states"
    );

    set_parent_simulation(&child_shared, None);
    assert!(client.borrow().dependent_ids().is_empty());
    assert!(child.borrow().parent_id().is_none());
}

// ============================================================================
// Laws
// ============================================================================

#[test]
fn test_determinism_across_runs() {
    let run = || {
        let (mut sim, mut driver) = new_client();
        for _ in 0..20 {
            sim.tick(&mut driver, &autonomous_tick());
        }
        let head = sim.sync_head_keyframe().unwrap();
        let tail = sim.buffers().sync.tail_keyframe().unwrap();
        (tail..=head)
            .map(|keyframe| {
                PostcardCodec
                    .encode(sim.sync_state(keyframe).unwrap())
                    .unwrap()
            })
            .collect::<Vec<_>>()
    };

    assert_eq!(run(), run(), "independent runs are byte-identical");
}

#[test]
fn test_prediction_matches_authority_without_interference() {
    let (mut client, mut client_driver) = new_client();
    let (mut server, mut server_driver) = new_server();

    for _ in 0..8 {
        client.tick(&mut client_driver, &autonomous_tick());
        exchange(&mut client, &mut server, &mut server_driver);
    }

    // No divergence source: the prediction holds and the server confirms
    // every input.
    assert_eq!(client.sync_head_keyframe(), server.sync_head_keyframe());
    assert_eq!(client.sync_head_state(), server.sync_head_state());
    assert_eq!(client.dirty_count(ReplicationTarget::ServerRpc), 0);
}
