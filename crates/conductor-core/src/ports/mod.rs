//! Ports - seams to the outside world
//!
//! - **ControlPlane**: the remote job-state API
//! - **JobQueue**: message delivery to workers
//! - **CancellationCheck**: how running code learns it should stop

pub mod cancellation;
pub mod control_plane;
pub mod job_queue;

pub use self::cancellation::{CancellationCheck, NeverCancelled, assert_not_cancelled};
pub use self::control_plane::{
    CallbackAttributes, CallbackUpdate, ControlPlane, JobAttributes, JobUpdate, LockResponse,
    RequestPolicy, TaskAttributes, TaskRegistration, TaskUpdate,
};
pub use self::job_queue::{Delivery, JobQueue, QueueError};
