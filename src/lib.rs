//! An address resolution cache for a single network interface.
//!
//! The crate keeps the mapping from network-layer to link-layer addresses
//! and manages the life of each mapping: packets queue behind unresolved
//! destinations, one shared sweep timer retries the outstanding requests,
//! and destinations that never answer are failed with their queues drained
//! into a drop sink. Time comes from a pluggable [sched::Scheduler]; the
//! crate never touches a wall clock or a real device.

#[macro_use]
mod macros; // must stay first so the wire enums can use it

pub mod iface;
pub mod netdev;
pub mod pkbuf;
pub mod sched;
pub mod storage;
pub mod time;
pub mod wire;
