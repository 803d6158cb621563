//! Scenario runner for the tactical separation core: a kinematic host model,
//! operator commands and the fixed-timestep scheduler.

pub mod config;
pub mod host;
pub mod operator;
pub mod report;
pub mod scenario;
pub mod scheduler;

pub use config::Config;
pub use host::HostModel;
pub use operator::{CommandOutcome, OperatorCommand};
pub use report::{RunReport, RunStats};
pub use scenario::Scenario;
pub use scheduler::Simulator;
