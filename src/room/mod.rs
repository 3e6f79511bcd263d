//! Match rooms
//!
//! [`instance`] holds the per-match state machine, [`registry`] stores live
//! rooms by id and [`coordinator`] drives them with timers and events.

pub mod coordinator;
pub mod instance;
pub mod registry;

pub use coordinator::RoomCoordinator;
pub use instance::{MatchRoom, Progress, RoomConfig, SubmitResult};
pub use registry::{MatchRegistry, RegistryStats, SharedRoom};
