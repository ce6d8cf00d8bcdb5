//! Impls - port implementations
//!
//! - **HttpControlPlane**: the control-plane REST API over reqwest
//! - **DisabledControlPlane**: no calls, for mock jobs and disabled environments
//! - **InMemoryControlPlane** / **InMemoryJobQueue**: local runs and tests

pub mod disabled;
pub mod http_control_plane;
pub mod inmem_control_plane;
pub mod inmem_queue;

pub use self::disabled::DisabledControlPlane;
pub use self::http_control_plane::HttpControlPlane;
pub use self::inmem_control_plane::{Call, InMemoryControlPlane};
pub use self::inmem_queue::{InMemoryJobQueue, QueueCounts};
