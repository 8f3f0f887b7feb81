//! Metrics collection using Prometheus
//!
//! This module provides metrics collection for the lobby-ledger service
//! using Prometheus metrics.

use crate::types::RatingChange;
use anyhow::Result;
use prometheus::{
    Histogram, HistogramOpts, HistogramVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec,
    Opts, Registry,
};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Main metrics collector for the lobby service
#[derive(Clone)]
pub struct MetricsCollector {
    /// Prometheus registry
    registry: Arc<Registry>,

    /// Service-level metrics
    service_metrics: ServiceMetrics,

    /// Game registry and presence metrics
    lobby_metrics: LobbyMetrics,

    /// Report reconciliation metrics
    report_metrics: ReportMetrics,

    /// Match and rating metrics
    rating_metrics: RatingMetrics,

    /// Performance metrics
    performance_metrics: PerformanceMetrics,
}

/// Service-level metrics
#[derive(Clone)]
pub struct ServiceMetrics {
    /// Service uptime in seconds
    pub uptime_seconds: IntGauge,

    /// Inbound messages processed by kind and status
    pub messages_total: IntCounterVec,

    /// Outbound events that could not be published
    pub publish_failures_total: IntCounterVec,

    /// Health check status (0=unhealthy, 1=degraded, 2=healthy)
    pub health_status: IntGauge,

    /// Component health status
    pub component_health: IntGaugeVec,
}

/// Game registry and presence metrics
#[derive(Clone)]
pub struct LobbyMetrics {
    /// Open listings
    pub listings: IntGauge,

    /// Registry mutations by operation
    pub listing_changes_total: IntCounterVec,

    /// Clients currently present in the room
    pub players_present: IntGauge,
}

/// Report reconciliation metrics
#[derive(Clone)]
pub struct ReportMetrics {
    /// Reports accepted into a pending match
    pub reports_accepted_total: IntCounter,

    /// Reports rejected by reason
    pub reports_rejected_total: IntCounterVec,

    /// Matches waiting for more reports
    pub pending_matches: IntGauge,

    /// Matches whose reports were all collected
    pub matches_finalized_total: IntCounter,
}

/// Match and rating metrics
#[derive(Clone)]
pub struct RatingMetrics {
    /// Matches persisted, by outcome (rated/unrated)
    pub matches_recorded_total: IntCounterVec,

    /// Unrated matches by reason
    pub unrated_matches_total: IntCounterVec,

    /// Absolute rating adjustment per participant
    pub rating_adjustment: Histogram,
}

/// Performance metrics
#[derive(Clone)]
pub struct PerformanceMetrics {
    /// Inbound message processing time by kind
    pub processing_duration: HistogramVec,

    /// Time spent persisting and rating a finalized match
    pub rating_calculation_duration: Histogram,

    /// Publish duration by event
    pub publish_duration: HistogramVec,
}

impl MetricsCollector {
    /// Create a new metrics collector with default registry
    pub fn new() -> Result<Self> {
        let registry = Arc::new(Registry::new());
        Self::with_registry(registry)
    }

    /// Create a new metrics collector with custom registry
    pub fn with_registry(registry: Arc<Registry>) -> Result<Self> {
        let service_metrics = ServiceMetrics::new(&registry)?;
        let lobby_metrics = LobbyMetrics::new(&registry)?;
        let report_metrics = ReportMetrics::new(&registry)?;
        let rating_metrics = RatingMetrics::new(&registry)?;
        let performance_metrics = PerformanceMetrics::new(&registry)?;

        Ok(Self {
            registry,
            service_metrics,
            lobby_metrics,
            report_metrics,
            rating_metrics,
            performance_metrics,
        })
    }

    /// Get the Prometheus registry
    pub fn registry(&self) -> Arc<Registry> {
        self.registry.clone()
    }

    pub fn service(&self) -> &ServiceMetrics {
        &self.service_metrics
    }

    pub fn lobby(&self) -> &LobbyMetrics {
        &self.lobby_metrics
    }

    pub fn report(&self) -> &ReportMetrics {
        &self.report_metrics
    }

    pub fn rating(&self) -> &RatingMetrics {
        &self.rating_metrics
    }

    pub fn performance(&self) -> &PerformanceMetrics {
        &self.performance_metrics
    }

    /// Record one processed inbound message
    pub fn record_message(&self, kind: &str, success: bool, duration: Duration) {
        let status = if success { "success" } else { "error" };

        self.service_metrics
            .messages_total
            .with_label_values(&[kind, status])
            .inc();

        self.performance_metrics
            .processing_duration
            .with_label_values(&[kind])
            .observe(duration.as_secs_f64());
    }

    /// Record one publish attempt
    pub fn record_publish(&self, event: &str, success: bool, duration: Duration) {
        if !success {
            self.service_metrics
                .publish_failures_total
                .with_label_values(&[event])
                .inc();
        }

        self.performance_metrics
            .publish_duration
            .with_label_values(&[event])
            .observe(duration.as_secs_f64());
    }

    /// Record a registry mutation (register, unregister, changestate, evicted)
    pub fn record_listing_change(&self, operation: &str) {
        self.lobby_metrics
            .listing_changes_total
            .with_label_values(&[operation])
            .inc();
    }

    pub fn record_report_accepted(&self) {
        self.report_metrics.reports_accepted_total.inc();
    }

    pub fn record_report_rejected(&self, reason: &str) {
        self.report_metrics
            .reports_rejected_total
            .with_label_values(&[reason])
            .inc();
    }

    pub fn record_match_finalized(&self) {
        self.report_metrics.matches_finalized_total.inc();
    }

    /// Record a rated match and the size of every adjustment
    pub fn record_rated_match(&self, changes: &[RatingChange]) {
        self.rating_metrics
            .matches_recorded_total
            .with_label_values(&["rated"])
            .inc();

        for change in changes {
            self.rating_metrics
                .rating_adjustment
                .observe(f64::from(change.delta().abs()));
        }
    }

    /// Record a match that was persisted without rating
    pub fn record_unrated_match(&self, reason: &str) {
        self.rating_metrics
            .matches_recorded_total
            .with_label_values(&["unrated"])
            .inc();

        self.rating_metrics
            .unrated_matches_total
            .with_label_values(&[reason])
            .inc();
    }

    /// Record rating calculation duration
    pub fn record_rating_calculation(&self, duration: Duration) {
        self.performance_metrics
            .rating_calculation_duration
            .observe(duration.as_secs_f64());
    }

    /// Refresh the state gauges
    pub fn update_gauges(&self, listings: usize, pending_matches: usize, players_present: usize) {
        self.lobby_metrics.listings.set(listings as i64);
        self.report_metrics.pending_matches.set(pending_matches as i64);
        self.lobby_metrics.players_present.set(players_present as i64);
    }

    /// Update health status
    pub fn update_health_status(&self, status: u8) {
        self.service_metrics.health_status.set(status as i64);
    }

    /// Update component health
    pub fn update_component_health(&self, component: &str, healthy: bool) {
        let status = if healthy { 1 } else { 0 };
        self.service_metrics
            .component_health
            .with_label_values(&[component])
            .set(status);
    }

    /// Create a timer for measuring operation duration
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

    /// Get the elapsed duration
    pub fn elapsed(&self) -> Duration {
        self.start.elapsed()
    }

    /// Stop the timer and return the duration
    pub fn stop(self) -> Duration {
        self.elapsed()
    }
}

impl ServiceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let uptime_seconds =
            IntGauge::new("lobby_ledger_uptime_seconds", "Service uptime in seconds")?;
        registry.register(Box::new(uptime_seconds.clone()))?;

        let messages_total = IntCounterVec::new(
            Opts::new(
                "lobby_ledger_messages_total",
                "Inbound messages processed",
            ),
            &["kind", "status"],
        )?;
        registry.register(Box::new(messages_total.clone()))?;

        let publish_failures_total = IntCounterVec::new(
            Opts::new(
                "lobby_ledger_publish_failures_total",
                "Outbound events that failed to publish",
            ),
            &["event"],
        )?;
        registry.register(Box::new(publish_failures_total.clone()))?;

        let health_status = IntGauge::new(
            "lobby_ledger_health_status",
            "Health status (0=unhealthy, 1=degraded, 2=healthy)",
        )?;
        registry.register(Box::new(health_status.clone()))?;

        let component_health = IntGaugeVec::new(
            Opts::new("lobby_ledger_component_health", "Component health status"),
            &["component"],
        )?;
        registry.register(Box::new(component_health.clone()))?;

        Ok(Self {
            uptime_seconds,
            messages_total,
            publish_failures_total,
            health_status,
            component_health,
        })
    }
}

impl LobbyMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let listings = IntGauge::new("lobby_ledger_listings", "Open game listings")?;
        registry.register(Box::new(listings.clone()))?;

        let listing_changes_total = IntCounterVec::new(
            Opts::new(
                "lobby_ledger_listing_changes_total",
                "Game registry mutations",
            ),
            &["operation"],
        )?;
        registry.register(Box::new(listing_changes_total.clone()))?;

        let players_present = IntGauge::new(
            "lobby_ledger_players_present",
            "Clients present in the lobby room",
        )?;
        registry.register(Box::new(players_present.clone()))?;

        Ok(Self {
            listings,
            listing_changes_total,
            players_present,
        })
    }
}

impl ReportMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let reports_accepted_total = IntCounter::new(
            "lobby_ledger_reports_accepted_total",
            "Reports accepted into a pending match",
        )?;
        registry.register(Box::new(reports_accepted_total.clone()))?;

        let reports_rejected_total = IntCounterVec::new(
            Opts::new(
                "lobby_ledger_reports_rejected_total",
                "Reports rejected by the reconciler",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(reports_rejected_total.clone()))?;

        let pending_matches = IntGauge::new(
            "lobby_ledger_pending_matches",
            "Matches waiting for more reports",
        )?;
        registry.register(Box::new(pending_matches.clone()))?;

        let matches_finalized_total = IntCounter::new(
            "lobby_ledger_matches_finalized_total",
            "Matches with every report collected",
        )?;
        registry.register(Box::new(matches_finalized_total.clone()))?;

        Ok(Self {
            reports_accepted_total,
            reports_rejected_total,
            pending_matches,
            matches_finalized_total,
        })
    }
}

impl RatingMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let matches_recorded_total = IntCounterVec::new(
            Opts::new("lobby_ledger_matches_recorded_total", "Matches persisted"),
            &["outcome"],
        )?;
        registry.register(Box::new(matches_recorded_total.clone()))?;

        let unrated_matches_total = IntCounterVec::new(
            Opts::new(
                "lobby_ledger_unrated_matches_total",
                "Matches persisted without rating",
            ),
            &["reason"],
        )?;
        registry.register(Box::new(unrated_matches_total.clone()))?;

        let rating_adjustment = Histogram::with_opts(
            HistogramOpts::new(
                "lobby_ledger_rating_adjustment",
                "Absolute rating change per participant",
            )
            .buckets(vec![0.0, 5.0, 10.0, 20.0, 40.0, 60.0, 80.0, 120.0]),
        )?;
        registry.register(Box::new(rating_adjustment.clone()))?;

        Ok(Self {
            matches_recorded_total,
            unrated_matches_total,
            rating_adjustment,
        })
    }
}

impl PerformanceMetrics {
    fn new(registry: &Registry) -> Result<Self> {
        let processing_duration = HistogramVec::new(
            HistogramOpts::new(
                "lobby_ledger_processing_duration_seconds",
                "Inbound message processing time",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0]),
            &["kind"],
        )?;
        registry.register(Box::new(processing_duration.clone()))?;

        let rating_calculation_duration = Histogram::with_opts(
            HistogramOpts::new(
                "lobby_ledger_rating_calculation_duration_seconds",
                "Match persistence and rating time",
            )
            .buckets(vec![0.0001, 0.001, 0.005, 0.01, 0.05, 0.1]),
        )?;
        registry.register(Box::new(rating_calculation_duration.clone()))?;

        let publish_duration = HistogramVec::new(
            HistogramOpts::new(
                "lobby_ledger_publish_duration_seconds",
                "Outbound publish duration",
            )
            .buckets(vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]),
            &["event"],
        )?;
        registry.register(Box::new(publish_duration.clone()))?;

        Ok(Self {
            processing_duration,
            rating_calculation_duration,
            publish_duration,
        })
    }
}
