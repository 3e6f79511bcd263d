//! Metrics collection using Prometheus
//!
//! All series carry the `trivia_duel_` prefix and live in one registry owned
//! by the collector, so tests can build as many collectors as they like.

use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the duel engine
#[derive(Clone)]
pub struct MetricsCollector {
    registry: Arc<Registry>,
    service_metrics: ServiceMetrics,
    queue_metrics: QueueMetrics,
    room_metrics: RoomMetrics,
    question_metrics: QuestionMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    pub uptime_seconds: IntGauge,

    /// AMQP messages processed, by operation and status
    pub amqp_messages_total: IntCounterVec,

    pub amqp_errors_total: IntCounterVec,

    pub amqp_operation_duration: HistogramVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    pub component_health: IntGaugeVec,
}

/// Matchmaking queue metrics
#[derive(Clone)]
pub struct QueueMetrics {
    /// Accepted match requests by category
    pub match_requests_total: IntCounterVec,

    pub queue_depth: IntGauge,

    /// Pairings by opponent kind (human, bot)
    pub pairings_total: IntCounterVec,

    pub queue_wait_time_seconds: HistogramVec,

    pub cancellations_total: IntCounter,

    pub matchmaking_failures_total: IntCounter,
}

/// Room lifecycle metrics
#[derive(Clone)]
pub struct RoomMetrics {
    pub active_rooms: IntGauge,

    pub rooms_created_total: IntCounterVec,

    /// Finished rooms by outcome (winner, draw)
    pub rooms_finished_total: IntCounterVec,

    pub tiebreakers_total: IntCounter,

    pub question_timeouts_total: IntCounter,

    /// Answers by player type and correctness
    pub answers_total: IntCounterVec,

    pub tiebreaker_rounds_per_match: Histogram,
}

/// External question source metrics
#[derive(Clone)]
pub struct QuestionMetrics {
    pub source_requests_total: IntCounterVec,

    pub source_request_duration: HistogramVec,
}

impl MetricsCollector {
    pub fn new() -> Result<Self> {
        Self::with_registry(Arc::new(Registry::new()))
    }

    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        Ok(Self {
            service_metrics: ServiceMetrics::new(&registry)?,
            queue_metrics: QueueMetrics::new(&registry)?,
            room_metrics: RoomMetrics::new(&registry)?,
            question_metrics: QuestionMetrics::new(&registry)?,
            registry,
        })
    }

    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn queue(&self) -> &QueueMetrics {
        &self.queue_metrics
    }

    pub fn room(&self) -> &RoomMetrics {
        &self.room_metrics
    }

    pub fn questions(&self) -> &QuestionMetrics {
        &self.question_metrics
    }

    /// Record an accepted match request
    pub fn record_match_request(&self, category: &str) {
        self.queue_metrics
            .match_requests_total
            .with_label_values(&[category])
            .inc();
    }

    pub fn record_cancellation(&self) {
        self.queue_metrics.cancellations_total.inc();
    }

    pub fn record_matchmaking_failure(&self) {
        self.queue_metrics.matchmaking_failures_total.inc();
    }

    /// Record a pairing and how long the waiting requester sat in the queue
    pub fn record_pairing(&self, opponent: &str, waited: Duration) {
        self.queue_metrics
            .pairings_total
            .with_label_values(&[opponent])
            .inc();
        self.queue_metrics
            .queue_wait_time_seconds
            .with_label_values(&[opponent])
            .observe(waited.as_secs_f64());
    }

    pub fn set_queue_depth(&self, depth: usize) {
        self.queue_metrics.queue_depth.set(depth as i64);
    }

    pub fn set_active_rooms(&self, rooms: usize) {
        self.room_metrics.active_rooms.set(rooms as i64);
    }

    pub fn record_room_created(&self, against_bot: bool) {
        let opponent = if against_bot { "bot" } else { "human" };
        self.room_metrics
            .rooms_created_total
            .with_label_values(&[opponent])
            .inc();
    }

    pub fn record_room_finished(&self, outcome: &str, tiebreaker_rounds: u32) {
        self.room_metrics
            .rooms_finished_total
            .with_label_values(&[outcome])
            .inc();
        self.room_metrics
            .tiebreaker_rounds_per_match
            .observe(tiebreaker_rounds as f64);
    }

    pub fn record_tiebreaker(&self) {
        self.room_metrics.tiebreakers_total.inc();
    }

    pub fn record_question_timeout(&self) {
        self.room_metrics.question_timeouts_total.inc();
    }

    pub fn record_answer(&self, correct: bool, is_bot: bool) {
        let player_type = if is_bot { "bot" } else { "human" };
        let result = if correct { "correct" } else { "wrong" };
        self.room_metrics
            .answers_total
            .with_label_values(&[player_type, result])
            .inc();
    }

    /// Record one call to an external question source
    pub fn record_source_request(&self, source: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };
        self.question_metrics
            .source_requests_total
            .with_label_values(&[source, status])
            .inc();
        self.question_metrics
            .source_request_duration
            .with_label_values(&[source])
            .observe(duration.as_secs_f64());
    }

    pub fn record_amqp_operation(&self, operation: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .amqp_messages_total
            .with_label_values(&[operation, status])
            .inc();

        if !success {
            self.service_metrics
                .amqp_errors_total
                .with_label_values(&[operation])
                .inc();
        }

        self.service_metrics
            .amqp_operation_duration
            .with_label_values(&[operation, status])
            .observe(duration.as_secs_f64());
    }

    pub fn set_uptime(&self, uptime: Duration) {
        self.service_metrics
            .uptime_seconds
            .set(uptime.as_secs() as i64);
    }

    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    pub fn update_component_health(&self, component: &str, healthy: bool) {
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(if healthy { 1 } else { 0 });
    }

    pub fn start_timer(&self) -> MetricsTimer {
        MetricsTimer::new()
    }
}

/// Timer for measuring operation durations
pub struct MetricsTimer {
    start: Instant,
}

impl MetricsTimer {
    fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }

    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("trivia_duel_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let amqp_messages_total = IntCounterVec::new(
            Opts::new(
                "trivia_duel_amqp_messages_total",
                "Total AMQP messages processed",
            ),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_messages_total.clone()))?;

        let amqp_errors_total = IntCounterVec::new(
            Opts::new("trivia_duel_amqp_errors_total", "Total AMQP errors"),
            &["operation"],
        )?;
        registry.register(Box::new(amqp_errors_total.clone()))?;

        let amqp_operation_duration = HistogramVec::new(
            HistogramOpts::new(
                "trivia_duel_amqp_operation_duration_seconds",
                "AMQP operation duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["operation", "status"],
        )?;
        registry.register(Box::new(amqp_operation_duration.clone()))?;

        let health_status = IntGauge::new(
            "trivia_duel_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("trivia_duel_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            amqp_messages_total,
            amqp_errors_total,
            amqp_operation_duration,
            health_status,
            component_health,
        })
    }
}

impl QueueMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let match_requests_total = IntCounterVec::new(
            Opts::new(
                "trivia_duel_match_requests_total",
                "Accepted match requests",
            ),
            &["category"],
        )?;
        registry.register(Box::new(match_requests_total.clone()))?;

        let queue_depth = IntGauge::new(
            "trivia_duel_queue_depth",
            "Requests currently waiting for an opponent",
        )?;
        registry.register(Box::new(queue_depth.clone()))?;

        let pairings_total = IntCounterVec::new(
            Opts::new("trivia_duel_pairings_total", "Completed pairings"),
            &["opponent"],
        )?;
        registry.register(Box::new(pairings_total.clone()))?;

        let queue_wait_time_seconds = HistogramVec::new(
            HistogramOpts::new(
                "trivia_duel_queue_wait_time_seconds",
                "Time a request waited before pairing",
            )
            .buckets(vec![0.1, 0.5, 1.0, 2.0, 3.0, 5.0, 8.0, 13.0, 20.0, 60.0]),
            &["opponent"],
        )?;
        registry.register(Box::new(queue_wait_time_seconds.clone()))?;

        let cancellations_total = IntCounter::new(
            "trivia_duel_cancellations_total",
            "Queue cancellations",
        )?;
        registry.register(Box::new(cancellations_total.clone()))?;

        let matchmaking_failures_total = IntCounter::new(
            "trivia_duel_matchmaking_failures_total",
            "Pairings that could not be turned into a room",
        )?;
        registry.register(Box::new(matchmaking_failures_total.clone()))?;

        Ok(Self {
            match_requests_total,
            queue_depth,
            pairings_total,
            queue_wait_time_seconds,
            cancellations_total,
            matchmaking_failures_total,
        })
    }
}

impl RoomMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let active_rooms = IntGauge::new("trivia_duel_active_rooms", "Rooms not yet finished")?;
        registry.register(Box::new(active_rooms.clone()))?;

        let rooms_created_total = IntCounterVec::new(
            Opts::new("trivia_duel_rooms_created_total", "Rooms created"),
            &["opponent"],
        )?;
        registry.register(Box::new(rooms_created_total.clone()))?;

        let rooms_finished_total = IntCounterVec::new(
            Opts::new("trivia_duel_rooms_finished_total", "Rooms finished"),
            &["outcome"],
        )?;
        registry.register(Box::new(rooms_finished_total.clone()))?;

        let tiebreakers_total = IntCounter::new(
            "trivia_duel_tiebreakers_total",
            "Tiebreaker rounds started",
        )?;
        registry.register(Box::new(tiebreakers_total.clone()))?;

        let question_timeouts_total = IntCounter::new(
            "trivia_duel_question_timeouts_total",
            "Questions settled by timeout",
        )?;
        registry.register(Box::new(question_timeouts_total.clone()))?;

        let answers_total = IntCounterVec::new(
            Opts::new("trivia_duel_answers_total", "Recorded answers"),
            &["player_type", "result"],
        )?;
        registry.register(Box::new(answers_total.clone()))?;

        let tiebreaker_rounds_per_match = Histogram::with_opts(
            HistogramOpts::new(
                "trivia_duel_tiebreaker_rounds_per_match",
                "Tiebreaker rounds played per finished match",
            )
            .buckets(vec![0.0, 1.0, 2.0, 3.0]),
        )?;
        registry.register(Box::new(tiebreaker_rounds_per_match.clone()))?;

        Ok(Self {
            active_rooms,
            rooms_created_total,
            rooms_finished_total,
            tiebreakers_total,
            question_timeouts_total,
            answers_total,
            tiebreaker_rounds_per_match,
        })
    }
}

impl QuestionMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let source_requests_total = IntCounterVec::new(
            Opts::new(
                "trivia_duel_question_source_requests_total",
                "Requests made to question sources",
            ),
            &["source", "status"],
        )?;
        registry.register(Box::new(source_requests_total.clone()))?;

        let source_request_duration = HistogramVec::new(
            HistogramOpts::new(
                "trivia_duel_question_source_request_duration_seconds",
                "Question source response time",
            )
            .buckets(vec![0.01, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0]),
            &["source"],
        )?;
        registry.register(Box::new(source_request_duration.clone()))?;

        Ok(Self {
            source_requests_total,
            source_request_duration,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_metrics_collector_creation() {
        let collector = MetricsCollector::new().expect("Failed to create metrics collector");
        let _service = collector.service();
        let _queue = collector.queue();
        let _room = collector.room();
        let _questions = collector.questions();
    }

    #[test]
    fn test_queue_recording() {
        let collector = MetricsCollector::new().unwrap();

        collector.record_match_request("math");
        collector.record_match_request("math");
        collector.record_pairing("bot", Duration::from_secs(4));
        collector.record_cancellation();
        collector.set_queue_depth(3);

        assert_eq!(
            collector
                .queue()
                .match_requests_total
                .with_label_values(&["math"])
                .get(),
            2
        );
        assert_eq!(
            collector
                .queue()
                .pairings_total
                .with_label_values(&["bot"])
                .get(),
            1
        );
        assert_eq!(collector.queue().cancellations_total.get(), 1);
        assert_eq!(collector.queue().queue_depth.get(), 3);
    }

    #[test]
    fn test_room_recording() {
        let collector = MetricsCollector::new().unwrap();

        collector.record_room_created(true);
        collector.record_answer(true, false);
        collector.record_answer(false, true);
        collector.record_tiebreaker();
        collector.record_question_timeout();
        collector.record_room_finished("draw", 3);
        collector.set_active_rooms(0);

        let room = collector.room();
        assert_eq!(room.rooms_created_total.with_label_values(&["bot"]).get(), 1);
        assert_eq!(
            room.answers_total.with_label_values(&["human", "correct"]).get(),
            1
        );
        assert_eq!(room.tiebreakers_total.get(), 1);
        assert_eq!(room.question_timeouts_total.get(), 1);
        assert_eq!(
            room.rooms_finished_total.with_label_values(&["draw"]).get(),
            1
        );
        assert_eq!(room.tiebreaker_rounds_per_match.get_sample_count(), 1);
    }

    #[test]
    fn test_registry_exposes_prefixed_families() {
        let collector = MetricsCollector::new().unwrap();
        collector.record_source_request("opentdb", false, Duration::from_millis(120));
        collector.update_health_status(2);
        collector.update_component_health("amqp", false);

        let families = collector.registry().gather();
        assert!(!families.is_empty());
        assert!(families
            .iter()
            .all(|family| family.get_name().starts_with("trivia_duel_")));
        assert!(families
            .iter()
            .any(|family| family.get_name() == "trivia_duel_question_source_requests_total"));
    }

    #[test]
    fn test_metrics_timer() {
        let collector = MetricsCollector::new().unwrap();
        let timer = collector.start_timer();

        std::thread::sleep(Duration::from_millis(10));
        assert!(timer.elapsed() >= Duration::from_millis(10));
        assert!(timer.stop() >= Duration::from_millis(10));
    }
}
