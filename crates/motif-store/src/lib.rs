//! # motif-store
//!
//! State persistence for the motif engine:
//!
//! - [`MemoryJobStore`] — the in-memory [`motif_core::JobStore`]
//!   implementation for single-process deployments. Mutations are
//!   serialized through one `RwLock`, which is what preserves the job and
//!   queue invariants without finer-grained locking.
//! - [`Checkpointer`] — JSON snapshots of terminal batch ids per job, so
//!   progress survives a process restart.
//! - [`retention`] — sweep for terminal jobs past their retention age.

pub mod checkpoint;
pub mod memory;
pub mod retention;

pub use checkpoint::Checkpointer;
pub use memory::MemoryJobStore;
