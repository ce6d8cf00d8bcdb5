//! Typed - the API user code implements
//!
//! - **Task** / **JobCallbacks**: job steps and terminal hooks
//! - **TaskContext**: job data, tags and cancellation seen by user code
//! - **TaskRuntime**: one attempt of one task
//! - **Registry**: job definitions plus task implementations keyed by namespace

pub mod registry;
pub mod runtime;
pub mod task;

pub use self::registry::{JobRegistry, Registry, TaskRegistry};
pub use self::runtime::TaskRuntime;
pub use self::task::{JobCallbacks, NoCallbacks, Task, TaskContext, TaskFactory};
