//! Domain model: job state, definitions, messages and errors.

pub mod data;
pub mod definition;
pub mod envelope;
pub mod errors;
pub mod ids;
pub mod instance;
pub mod state;
pub mod worker;

pub use self::data::JobDataStore;
pub use self::definition::JobDefinition;
pub use self::envelope::{JobMessage, Tags};
pub use self::errors::{
    ControlPlaneError, DefinitionError, ErrorKind, FactoryError, RegistryError, RunError,
    RunnerError, SerializedError, TaskError,
};
pub use self::ids::{AttemptId, RunId};
pub use self::instance::JobInstance;
pub use self::state::{Action, CallbackKind, RetryLimit, Status};
pub use self::worker::WorkerIdentity;
