//! Background workers. Each worker owns a `tokio::select!` loop bound to a
//! shared shutdown channel; `main` spawns them and flips the channel on
//! SIGINT/SIGTERM.

pub mod expiry_sweeper;
pub mod reconcile_worker;

pub use expiry_sweeper::{ExpirySweeper, ExpirySweeperConfig};
pub use reconcile_worker::{ReconcileWorker, ReconcileWorkerConfig};
