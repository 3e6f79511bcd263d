//! Service layer: engine wiring, application state and health checks

pub mod app;
pub mod engine;
pub mod health;

pub use app::{AppState, ProductionMessageHandler, ServiceError};
pub use engine::{EngineStats, EnginePorts, MatchService};
pub use health::{HealthCheck, HealthStatus};
