//! Worker pool: a master that assigns candidate tickers to a bounded set of
//! execution workers and frees them as positions close.
//!
//! - `master`: select loop over candidates, trade updates, worker reports
//! - `registry`: Active / Available partitions and the assignment pass
//! - `worker`: bracket sizing, order placement and the cancel watchdog
//! - `spawner`: worker task creation with ready handshake and exit supervision

mod handle;
mod master;
mod messages;
mod registry;
mod spawner;
mod worker;

pub use handle::WorkerHandle;
pub use master::{Budget, Master};
pub use messages::{WorkerCommand, WorkerId, WorkerReport, WorkerStatus};
pub use registry::{AssignmentSummary, WorkerPool, WorkerSpawner};
pub use spawner::WorkerFactory;
pub use worker::{size_bracket, BracketSizing, BuyError, Worker, WorkerSettings};
