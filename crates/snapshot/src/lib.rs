//! Durable snapshot files for the coordinator and participants
//!
//! Every persisted structure is written whole: encoded as a versioned CBOR
//! envelope, written to a temporary sibling, synced, and renamed over the
//! target. A reader therefore sees either the old snapshot or the new one.

mod codec;
mod error;
mod store;

pub use codec::{FORMAT_VERSION, decode, encode};
pub use error::SnapshotError;
pub use store::SnapshotStore;
