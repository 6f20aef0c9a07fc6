pub mod pending_sweeper;

pub use pending_sweeper::{run_sweeper, sweep_once, SweepSummary, SweeperSettings};
