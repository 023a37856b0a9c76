//! Worker process management.
//!
//! Workers are separate OS processes running this same binary in worker
//! mode, selected by a sentinel first argument. The supervisor builds one
//! assignment per bin, spawns the processes, feeds each its assignment over
//! stdin, and consumes the event stream emitted on stdout. The runner is
//! the in-worker side of that contract.

pub mod affinity;
pub mod protocol;
pub mod runner;
pub mod supervisor;

pub use protocol::{Assignment, WorkerEvent};
pub use supervisor::{SupervisorStats, WorkerSupervisor};
