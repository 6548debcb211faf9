//! Dependent-simulation linkage
//!
//! Simulations can depend on each other: a turret bolted to a vehicle must
//! re-run its own updates when the vehicle's prediction is corrected. The
//! link is a parent/child relation where the parent drives the child's
//! rollback window during its own reconciliation.
//!
//! Edges are weak on both sides; neither simulation owns the other, and a
//! simulation clears its links on drop. The graph is a forest: a child has
//! at most one parent and cycles are rejected.
//!
//! A parent and its dependents must live on the same thread and the host
//! must tick the parent first, so a rollback window recorded by the parent
//! is executed by each child at the start of the child's next tick.

use std::cell::RefCell;
use std::fmt;
use std::rc::{Rc, Weak};

use veles_core::{Keyframe, SimTime};

/// Identity of one simulation instance, used for graph edges.
pub type SimulationId = uuid::Uuid;

/// The role-independent rollback surface of a simulation instance.
///
/// [`NetworkedSimulation`](crate::NetworkedSimulation) implements this;
/// parents talk to their dependents exclusively through it. The linkage
/// methods (`parent_handle` and below) are bookkeeping for
/// [`set_parent_simulation`] and are not meant to be called directly.
pub trait RollbackParticipant {
    fn simulation_id(&self) -> SimulationId;

    /// Records that the parent rewound to `parent_keyframe`, moving total
    /// simulation time by `rollback_delta` (negative when rewinding). The
    /// child rewinds its own buffers before its next tick.
    fn begin_rollback(&mut self, rollback_delta: SimTime, parent_keyframe: Keyframe);

    /// Records one replayed keyframe of the parent's corrected trajectory.
    /// The child re-runs its own update for the same keyframe, finalizing
    /// its frame when `is_final_step` is set.
    fn step_rollback(&mut self, step: SimTime, parent_keyframe: Keyframe, is_final_step: bool);

    fn parent_handle(&self) -> Option<SimulationHandle>;
    fn set_parent_handle(&mut self, parent: Option<SimulationHandle>);
    fn insert_dependent(&mut self, dependent: SimulationHandle);
    fn remove_dependent(&mut self, id: SimulationId);
    fn take_dependents(&mut self) -> Vec<SimulationHandle>;
}

/// A simulation shared between the host and the dependent graph.
pub type SharedSimulation = Rc<RefCell<dyn RollbackParticipant>>;

/// Weak, identity-carrying reference to a simulation in the graph.
#[derive(Clone)]
pub struct SimulationHandle {
    id: SimulationId,
    link: Weak<RefCell<dyn RollbackParticipant>>,
}

impl SimulationHandle {
    pub fn new(simulation: &SharedSimulation) -> Self {
        Self {
            id: simulation.borrow().simulation_id(),
            link: Rc::downgrade(simulation),
        }
    }

    pub fn id(&self) -> SimulationId {
        self.id
    }

    /// Upgrades to a live reference, or `None` if the simulation is gone.
    pub fn upgrade(&self) -> Option<SharedSimulation> {
        self.link.upgrade()
    }
}

impl fmt::Debug for SimulationHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SimulationHandle")
            .field("id", &self.id)
            .field("alive", &(self.link.strong_count() > 0))
            .finish()
    }
}

/// Sets or clears `child`'s parent, keeping both sides of the edge in sync.
///
/// Detaches from any existing parent first. Attaching also raises the
/// parent's pending-reconcile flag so the new dependent is brought onto the
/// parent's trajectory at the next reconciliation.
///
/// # Panics
///
/// Panics if the new edge would create a cycle, or if `parent` is the child
/// itself.
pub fn set_parent_simulation(child: &SharedSimulation, parent: Option<&SharedSimulation>) {
    let child_id = child.borrow().simulation_id();

    if let Some(previous) = child.borrow().parent_handle() {
        if let Some(previous) = previous.upgrade() {
            previous.borrow_mut().remove_dependent(child_id);
        }
    }

    match parent {
        Some(parent) => {
            assert_acyclic(child_id, parent);
            parent
                .borrow_mut()
                .insert_dependent(SimulationHandle::new(child));
            child
                .borrow_mut()
                .set_parent_handle(Some(SimulationHandle::new(parent)));
        }
        None => child.borrow_mut().set_parent_handle(None),
    }
}

/// Detaches every dependent of `simulation`, clearing their parent links.
pub fn clear_all_dependent_simulations(simulation: &SharedSimulation) {
    let dependents = simulation.borrow_mut().take_dependents();
    for dependent in dependents {
        if let Some(dependent) = dependent.upgrade() {
            dependent.borrow_mut().set_parent_handle(None);
        }
    }
}

fn assert_acyclic(child_id: SimulationId, parent: &SharedSimulation) {
    let mut cursor = Some(SimulationHandle::new(parent));
    while let Some(handle) = cursor {
        assert!(
            handle.id() != child_id,
            "dependent simulation graph must stay acyclic"
        );
        cursor = handle
            .upgrade()
            .and_then(|simulation| simulation.borrow().parent_handle());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeSimulation {
        id: SimulationId,
        parent: Option<SimulationHandle>,
        dependents: Vec<SimulationHandle>,
    }

    impl FakeSimulation {
        fn shared() -> SharedSimulation {
            Rc::new(RefCell::new(Self {
                id: SimulationId::new_v4(),
                parent: None,
                dependents: Vec::new(),
            }))
        }
    }

    impl RollbackParticipant for FakeSimulation {
        fn simulation_id(&self) -> SimulationId {
            self.id
        }
        fn begin_rollback(&mut self, _rollback_delta: SimTime, _parent_keyframe: Keyframe) {}
        fn step_rollback(&mut self, _step: SimTime, _parent_keyframe: Keyframe, _final: bool) {}
        fn parent_handle(&self) -> Option<SimulationHandle> {
            self.parent.clone()
        }
        fn set_parent_handle(&mut self, parent: Option<SimulationHandle>) {
            self.parent = parent;
        }
        fn insert_dependent(&mut self, dependent: SimulationHandle) {
            self.dependents.push(dependent);
        }
        fn remove_dependent(&mut self, id: SimulationId) {
            self.dependents.retain(|d| d.id() != id);
        }
        fn take_dependents(&mut self) -> Vec<SimulationHandle> {
            std::mem::take(&mut self.dependents)
        }
    }

    #[test]
    fn test_set_parent_links_both_sides() {
        let parent = FakeSimulation::shared();
        let child = FakeSimulation::shared();

        set_parent_simulation(&child, Some(&parent));

        let child_id = child.borrow().simulation_id();
        assert_eq!(
            child.borrow().parent_handle().map(|h| h.id()),
            Some(parent.borrow().simulation_id())
        );
        assert!(parent
            .borrow()
            .parent_handle()
            .is_none());
        assert!(parent
            .borrow_mut()
            .take_dependents()
            .iter()
            .any(|d| d.id() == child_id));
    }

    #[test]
    fn test_reparenting_detaches_old_parent() {
        let first = FakeSimulation::shared();
        let second = FakeSimulation::shared();
        let child = FakeSimulation::shared();

        set_parent_simulation(&child, Some(&first));
        set_parent_simulation(&child, Some(&second));

        assert!(first.borrow_mut().take_dependents().is_empty());
        assert_eq!(
            child.borrow().parent_handle().map(|h| h.id()),
            Some(second.borrow().simulation_id())
        );
    }

    #[test]
    fn test_clear_all_dependents_is_symmetric() {
        let parent = FakeSimulation::shared();
        let child_a = FakeSimulation::shared();
        let child_b = FakeSimulation::shared();

        set_parent_simulation(&child_a, Some(&parent));
        set_parent_simulation(&child_b, Some(&parent));
        clear_all_dependent_simulations(&parent);

        assert!(child_a.borrow().parent_handle().is_none());
        assert!(child_b.borrow().parent_handle().is_none());
    }

    #[test]
    #[should_panic(expected = "acyclic")]
    fn test_cycle_is_rejected() {
        let a = FakeSimulation::shared();
        let b = FakeSimulation::shared();

        set_parent_simulation(&b, Some(&a));
        set_parent_simulation(&a, Some(&b));
    }

    #[test]
    fn test_dead_handles_upgrade_to_none() {
        let parent = FakeSimulation::shared();
        let handle = {
            let child = FakeSimulation::shared();
            set_parent_simulation(&child, Some(&parent));
            SimulationHandle::new(&child)
        };
        assert!(handle.upgrade().is_none());
    }
}
