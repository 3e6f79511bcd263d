//! Metrics and HTTP monitoring endpoints

pub mod collector;
pub mod health;

pub use collector::{
    MetricsCollector, MetricsTimer, QueueMetrics, QuestionMetrics, RoomMetrics, ServiceMetrics,
};
pub use health::{HealthServer, HealthServerConfig};
