//! # Veles Protocol
//!
//! Wire-facing pieces of the Veles networked simulation:
//!
//! - Payload messages for the replication channels: input windows, sync
//!   snapshots, replay windows, debug windows
//! - A pluggable [`Codec`] with Postcard (compact, default) and JSON
//!   (readable, used by the debug channel) implementations
//! - Protocol error types
//!
//! The payloads describe *what* crosses the connection; moving the bytes is
//! the host transport's job.
//!
//! ## Example
//!
//! ```
//! use veles_protocol::{Codec, PostcardCodec, SyncSnapshot};
//! use veles_core::SimTime;
//!
//! let snapshot = SyncSnapshot {
//!     keyframe: 12,
//!     total_sim_time: SimTime::from_micros(200_000),
//!     state: 4.5f32,
//!     aux: (),
//! };
//!
//! let bytes = PostcardCodec.encode(&snapshot).unwrap();
//! let decoded: SyncSnapshot<f32, ()> = PostcardCodec.decode(&bytes).unwrap();
//! assert_eq!(decoded.keyframe, 12);
//! ```

pub mod codec;
pub mod error;
pub mod messages;

pub use codec::{Codec, JsonCodec, PostcardCodec};
pub use error::{ProtocolError, Result};
pub use messages::{DebugWindow, InputWindow, ReplayFrame, ReplayWindow, SyncSnapshot};
