//! Health checks for the lobby-ledger service
//!
//! Readiness and liveness probes plus a detailed report used by the
//! `/stats` endpoint and the `--health-check` mode.

use crate::service::app::AppState;
use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Health check status
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

impl HealthStatus {
    /// Combine two statuses, keeping the worse one
    pub fn worst(self, other: HealthStatus) -> HealthStatus {
        match (self, other) {
            (HealthStatus::Unhealthy, _) | (_, HealthStatus::Unhealthy) => HealthStatus::Unhealthy,
            (HealthStatus::Degraded, _) | (_, HealthStatus::Degraded) => HealthStatus::Degraded,
            _ => HealthStatus::Healthy,
        }
    }
}

impl std::fmt::Display for HealthStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            HealthStatus::Healthy => write!(f, "healthy"),
            HealthStatus::Degraded => write!(f, "degraded"),
            HealthStatus::Unhealthy => write!(f, "unhealthy"),
        }
    }
}

/// Health check response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthCheck {
    /// Overall service status
    pub status: HealthStatus,
    pub service: String,
    pub version: String,
    pub timestamp: chrono::DateTime<chrono::Utc>,
    /// Detailed component checks
    pub checks: Vec<ComponentCheck>,
    pub stats: ServiceStats,
}

/// Individual component health check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentCheck {
    pub name: String,
    pub status: HealthStatus,
    /// Optional explanation when not healthy
    pub message: Option<String>,
}

/// Service statistics for health reporting
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ServiceStats {
    pub listings: usize,
    pub pending_matches: usize,
    pub players_present: usize,
    pub events_processed: u64,
    pub matches_rated: u64,
    pub matches_unrated: u64,
    pub publish_failures: u64,
    pub uptime_seconds: u64,
}

impl HealthCheck {
    /// Perform a comprehensive health check of the service
    pub async fn check(app_state: Arc<AppState>) -> Result<Self> {
        let checks = vec![
            Self::check_service_running(&app_state).await,
            Self::check_coordinator(&app_state),
            Self::check_amqp_health(&app_state),
        ];

        let status = checks
            .iter()
            .fold(HealthStatus::Healthy, |acc, check| acc.worst(check.status));

        let stats = Self::gather_service_stats(&app_state).await;

        Ok(HealthCheck {
            status,
            service: app_state.config().service.name.clone(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            timestamp: chrono::Utc::now(),
            checks,
            stats,
        })
    }

    /// Simple liveness check - just verify service is running
    pub async fn liveness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if app_state.is_running().await {
            Ok(HealthStatus::Healthy)
        } else {
            Ok(HealthStatus::Unhealthy)
        }
    }

    /// Readiness check - verify service can handle requests
    pub async fn readiness_check(app_state: Arc<AppState>) -> Result<HealthStatus> {
        if !app_state.is_running().await {
            return Ok(HealthStatus::Unhealthy);
        }

        Ok(Self::check_coordinator(&app_state)
            .status
            .worst(Self::check_amqp_health(&app_state).status))
    }

    async fn check_service_running(app_state: &AppState) -> ComponentCheck {
        let (status, message) = if app_state.is_running().await {
            (HealthStatus::Healthy, None)
        } else {
            (
                HealthStatus::Unhealthy,
                Some("Service is not running".to_string()),
            )
        };

        ComponentCheck {
            name: "service_running".to_string(),
            status,
            message,
        }
    }

    fn check_coordinator(app_state: &AppState) -> ComponentCheck {
        let (status, message) = if app_state.coordinator().is_closed() {
            (
                HealthStatus::Unhealthy,
                Some("Coordinator task has stopped".to_string()),
            )
        } else {
            (HealthStatus::Healthy, None)
        };

        ComponentCheck {
            name: "coordinator".to_string(),
            status,
            message,
        }
    }

    fn check_amqp_health(app_state: &AppState) -> ComponentCheck {
        let (status, message) = match app_state.amqp_connection() {
            Some(connection) if connection.is_alive() => (HealthStatus::Healthy, None),
            Some(_) => (
                HealthStatus::Unhealthy,
                Some("Broker connection closed".to_string()),
            ),
            None => (
                HealthStatus::Degraded,
                Some("Running without a broker connection".to_string()),
            ),
        };

        ComponentCheck {
            name: "amqp_connection".to_string(),
            status,
            message,
        }
    }

    async fn gather_service_stats(app_state: &AppState) -> ServiceStats {
        let stats = app_state.coordinator_stats().await;
        ServiceStats {
            listings: stats.listings,
            pending_matches: stats.pending_matches,
            players_present: stats.players_present,
            events_processed: stats.events_processed,
            matches_rated: stats.matches_rated,
            matches_unrated: stats.matches_unrated,
            publish_failures: stats.publish_failures,
            uptime_seconds: app_state.uptime().as_secs(),
        }
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize health check: {}", e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::amqp::publisher::MockEventPublisher;
    use crate::config::AppConfig;

    #[test]
    fn test_worst_status() {
        use HealthStatus::*;
        assert_eq!(Healthy.worst(Healthy), Healthy);
        assert_eq!(Healthy.worst(Degraded), Degraded);
        assert_eq!(Unhealthy.worst(Degraded), Unhealthy);
    }

    #[tokio::test]
    async fn test_stopped_service_is_unhealthy() {
        let app_state = Arc::new(
            AppState::with_publisher(AppConfig::default(), Arc::new(MockEventPublisher::new()))
                .unwrap(),
        );

        let health = HealthCheck::check(app_state.clone()).await.unwrap();
        assert_eq!(health.status, HealthStatus::Unhealthy);
        assert_eq!(health.checks.len(), 3);
        assert_eq!(
            HealthCheck::liveness_check(app_state).await.unwrap(),
            HealthStatus::Unhealthy
        );
        assert!(health.to_json().unwrap().contains("\"coordinator\""));
    }
}
