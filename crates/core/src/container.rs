//! Buffer container
//!
//! Bundles the typed per-frame streams of one simulation instance. The
//! debug ring only exists when the `debug-capture` feature is enabled; the
//! accessors stay available either way and simply yield `None` in builds
//! without it, so callers never need their own feature gates.

use crate::KeyframedBuffer;

#[cfg(not(feature = "debug-capture"))]
use std::marker::PhantomData;

/// The four typed ring buffers of a simulation instance as a single unit.
///
/// Heads of the individual buffers are not forced to align: inputs usually
/// run ahead of synced state, and aux entries only exist at change points.
#[derive(Debug)]
pub struct BufferContainer<I, S, A, D> {
    /// Input commands, generated locally or received from the owning client.
    pub input: KeyframedBuffer<I>,

    /// The state being kept in sync; evolves through the update function.
    pub sync: KeyframedBuffer<S>,

    /// Side inputs to the simulation that change at discrete points rather
    /// than every frame.
    pub aux: KeyframedBuffer<A>,

    #[cfg(feature = "debug-capture")]
    debug: KeyframedBuffer<D>,
    #[cfg(not(feature = "debug-capture"))]
    _debug: PhantomData<D>,
}

impl<I, S, A, D> Default for BufferContainer<I, S, A, D> {
    fn default() -> Self {
        Self::new()
    }
}

impl<I, S, A, D> BufferContainer<I, S, A, D> {
    pub fn new() -> Self {
        Self {
            input: KeyframedBuffer::new(),
            sync: KeyframedBuffer::new(),
            aux: KeyframedBuffer::new(),
            #[cfg(feature = "debug-capture")]
            debug: KeyframedBuffer::new(),
            #[cfg(not(feature = "debug-capture"))]
            _debug: PhantomData,
        }
    }

    /// The debug ring, or `None` when debug capture is compiled out.
    pub fn debug(&self) -> Option<&KeyframedBuffer<D>> {
        #[cfg(feature = "debug-capture")]
        {
            Some(&self.debug)
        }
        #[cfg(not(feature = "debug-capture"))]
        {
            None
        }
    }

    /// Mutable access to the debug ring, or `None` when compiled out.
    pub fn debug_mut(&mut self) -> Option<&mut KeyframedBuffer<D>> {
        #[cfg(feature = "debug-capture")]
        {
            Some(&mut self.debug)
        }
        #[cfg(not(feature = "debug-capture"))]
        {
            None
        }
    }

    /// Sets the debug ring capacity. A no-op when debug capture is compiled
    /// out.
    pub fn set_debug_capacity(&mut self, capacity: usize) {
        #[cfg(feature = "debug-capture")]
        self.debug.set_capacity(capacity);
        #[cfg(not(feature = "debug-capture"))]
        let _ = capacity;
    }
}
