//! Queue-based synchronization primitives for the Weft race detector.
//!
//! Two bespoke locks live here, both on the detector's per-byte hot path:
//!
//! - [`mcs`]: the Mellor-Crummey/Scott queue mutex. FIFO-fair, each waiter
//!   spins on its own stack-resident node. Guards the short critical
//!   sections over the global maps, and doubles as the writer queue of the
//!   reader/writer lock.
//! - [`pfq`]: a phase-fair ticket reader/writer lock with a three-way
//!   reader→writer upgrade. The upgrade outcome tells the caller whether the
//!   state it observed under the reader hold can still be trusted; this is
//!   what lets the check driver restart its traversal only when the history
//!   may actually have moved.
//!
//! Neither lock allocates. Queue nodes are stack-allocated by the caller and
//! their addresses are visible to peer threads only while the owning call is
//! active, so the raw APIs are `unsafe` and take pinned node references.

pub mod cache_aligned;
pub mod mcs;
pub mod pfq;

pub use cache_aligned::CacheAligned;
pub use mcs::{McsLock, McsNode, Mutex};
pub use pfq::{PfqRwLock, ReadTicket, Upgrade};
