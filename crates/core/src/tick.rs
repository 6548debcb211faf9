//! Tick state
//!
//! Tracks how far the simulation has advanced: which input keyframe was
//! consumed last, how much total simulation time has been processed, and how
//! much time the current tick is still allowed to consume. A per-keyframe
//! time ring runs in lockstep with the sync buffer so "what was total
//! simulation time at sync keyframe k" stays answerable for the retained
//! window, which reconciliation and interpolation both need.

use crate::{Keyframe, KeyframedBuffer, SimTime};

/// Time and progress bookkeeping for one simulation instance.
#[derive(Debug, Default)]
pub struct TickState {
    /// Keyframe of the input most recently consumed by the update loop.
    ///
    /// Starts at 0: the keyframe-0 input is an empty sentinel that is never
    /// consumed, so 0 means "nothing processed yet".
    pub last_processed_input_keyframe: Keyframe,

    /// Highest input keyframe the current tick may consume. Set by the
    /// role's pre-tick logic; the authority uses it to rate-limit clients.
    pub max_allowed_input_keyframe: Keyframe,

    total_processed_time: SimTime,
    remaining_allowed_time: SimTime,
    time_at_keyframe: KeyframedBuffer<SimTime>,
}

impl TickState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Sizes the per-keyframe time ring. Must match the sync buffer size.
    pub fn init_time_buffer(&mut self, capacity: usize) {
        self.time_at_keyframe.set_capacity(capacity);
    }

    /// Total simulation time processed since the seed state.
    pub fn total_processed_time(&self) -> SimTime {
        self.total_processed_time
    }

    /// Total processed simulation time as of sync keyframe `keyframe`, if
    /// that keyframe is still retained.
    pub fn total_processed_at(&self, keyframe: Keyframe) -> Option<SimTime> {
        self.time_at_keyframe.find(keyframe).copied()
    }

    /// Time budget still available to the current tick.
    pub fn remaining_allowed_time(&self) -> SimTime {
        self.remaining_allowed_time
    }

    /// Adds to the time budget. Unspent budget carries over to later ticks
    /// so an input whose delta exceeds a single refill is not starved.
    pub fn grant_simulation_time(&mut self, time: SimTime) {
        self.remaining_allowed_time += time;
    }

    /// Advances total processed time by `delta` for the consumption of input
    /// `keyframe`, stamping the time ring and spending budget.
    pub fn increment_processed(&mut self, delta: SimTime, keyframe: Keyframe) {
        self.total_processed_time += delta;
        self.remaining_allowed_time -= delta;
        self.stamp(keyframe);
    }

    /// Rollback form: rewinds total processed time to `time`, the value at
    /// sync keyframe `keyframe`, and re-bases the time ring there.
    pub fn set_total_processed(&mut self, time: SimTime, keyframe: Keyframe) {
        self.total_processed_time = time;
        self.stamp(keyframe);
    }

    fn stamp(&mut self, keyframe: Keyframe) {
        self.time_at_keyframe.reset_next_head_keyframe(keyframe);
        *self.time_at_keyframe.write_next() = self.total_processed_time;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn time(micros: i64) -> SimTime {
        SimTime::from_micros(micros)
    }

    #[test]
    fn test_increment_tracks_total_and_budget() {
        let mut tick = TickState::new();
        tick.init_time_buffer(8);
        tick.grant_simulation_time(time(50_000));

        tick.increment_processed(time(16_000), 1);
        tick.last_processed_input_keyframe = 1;

        assert_eq!(tick.total_processed_time(), time(16_000));
        assert_eq!(tick.remaining_allowed_time(), time(34_000));
        assert_eq!(tick.total_processed_at(1), Some(time(16_000)));
    }

    #[test]
    fn test_budget_carries_over() {
        let mut tick = TickState::new();
        tick.init_time_buffer(8);
        tick.grant_simulation_time(time(5_000));
        tick.grant_simulation_time(time(5_000));
        assert_eq!(tick.remaining_allowed_time(), time(10_000));
    }

    #[test]
    fn test_set_total_processed_rewinds() {
        let mut tick = TickState::new();
        tick.init_time_buffer(8);
        tick.grant_simulation_time(time(100_000));
        for keyframe in 1..=4 {
            tick.increment_processed(time(10_000), keyframe);
        }
        assert_eq!(tick.total_processed_time(), time(40_000));

        tick.set_total_processed(time(20_000), 2);
        assert_eq!(tick.total_processed_time(), time(20_000));
        assert_eq!(tick.total_processed_at(2), Some(time(20_000)));
        assert_eq!(tick.total_processed_at(3), None);
        assert_eq!(tick.total_processed_at(1), Some(time(10_000)));
    }
}
