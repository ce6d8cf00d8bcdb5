//! App - wires the ports into a running worker
//!
//! - **RuntimeConfig**: layered process configuration
//! - **RuntimeBuilder**: startup registration and validation
//! - **JobFactory**: resume reconstruction from the control plane
//! - **Orchestrator**: the task/callback state machine of one job
//! - **Heartbeat** / **Runner**: lock lifecycle around one message
//! - **WorkerPool**: concurrent message consumption

pub mod builder;
pub mod cancellation;
pub mod config;
pub mod factory;
pub mod heartbeat;
pub mod orchestrator;
pub mod runner;
pub mod worker_pool;

pub use self::builder::RuntimeBuilder;
pub use self::cancellation::RemoteCancellation;
pub use self::config::{ConfigError, Environment, RequestSettings, RuntimeConfig};
pub use self::factory::JobFactory;
pub use self::heartbeat::{Heartbeat, HeartbeatHandle};
pub use self::orchestrator::{Orchestrator, RunOutcome, select_control_plane};
pub use self::runner::{RunReport, Runner};
pub use self::worker_pool::{Disposition, WorkerPool, disposition};
