//! conductor-core
//!
//! Distributed job-execution runtime: workers take job messages from a queue,
//! rebuild job state from a remote control plane, run the job's tasks in order
//! with retry, cancellation and terminal callbacks, and report progress back.
//!
//! # Modules
//! - **domain**: statuses, definitions, instances, the data store, errors
//! - **ports**: ControlPlane, JobQueue, CancellationCheck
//! - **typed**: the Task / JobCallbacks API and registries
//! - **app**: config, factory, orchestrator, runner, worker pool
//! - **impls**: HTTP, disabled and in-memory port implementations
//! - **observability**: tracing subscriber setup

pub mod app;
pub mod domain;
pub mod impls;
pub mod observability;
pub mod ports;
pub mod typed;
