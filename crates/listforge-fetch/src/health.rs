//! Rolling success/failure metrics per source.

use std::sync::Arc;

use listforge_storage::{StorageAdapter, now_ms};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Attempts kept in the rolling window.
const DEFAULT_WINDOW: usize = 10;

/// Health classification for a source.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
    Unknown,
}

/// One recorded download attempt.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttemptRecord {
    pub timestamp_ms: i64,
    pub success: bool,
    pub duration_ms: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rule_count: Option<usize>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated health for one source.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SourceHealth {
    pub source: String,
    pub status: HealthStatus,
    pub total_attempts: u64,
    pub successful_attempts: u64,
    pub failed_attempts: u64,
    pub success_rate: f64,
    /// Mean duration over the rolling window.
    pub average_duration_ms: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_attempt: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_success: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_failure: Option<i64>,
    /// Newest first, bounded by the window size.
    pub recent_attempts: Vec<AttemptRecord>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub average_rule_count: Option<f64>,
    pub is_currently_failing: bool,
    pub consecutive_failures: u32,
}

impl SourceHealth {
    fn unknown(source: &str) -> Self {
        Self {
            source: source.to_string(),
            status: HealthStatus::Unknown,
            total_attempts: 0,
            successful_attempts: 0,
            failed_attempts: 0,
            success_rate: 0.0,
            average_duration_ms: 0.0,
            last_attempt: None,
            last_success: None,
            last_failure: None,
            recent_attempts: Vec::new(),
            average_rule_count: None,
            is_currently_failing: false,
            consecutive_failures: 0,
        }
    }
}

/// Records attempts and classifies source health.
///
/// Updates are read-modify-write; concurrent writers resolve last-write-wins,
/// which is acceptable for statistics.
#[derive(Clone)]
pub struct SourceHealthMonitor {
    storage: Arc<dyn StorageAdapter>,
    window: usize,
}

impl SourceHealthMonitor {
    #[must_use]
    pub fn new(storage: Arc<dyn StorageAdapter>) -> Self {
        Self {
            storage,
            window: DEFAULT_WINDOW,
        }
    }

    #[must_use]
    pub fn with_window(storage: Arc<dyn StorageAdapter>, window: usize) -> Self {
        Self { storage, window }
    }

    fn key(source: &str) -> Vec<String> {
        vec![
            "health".to_string(),
            "sources".to_string(),
            source.to_string(),
        ]
    }

    /// Record one attempt and return the updated health. Storage failures
    /// are logged and swallowed: health is never allowed to fail a compile.
    pub async fn record(
        &self,
        source: &str,
        success: bool,
        duration_ms: u64,
        rule_count: Option<usize>,
        error: Option<String>,
    ) -> SourceHealth {
        let now = now_ms();
        let mut health = self.get(source).await.unwrap_or_else(|| {
            SourceHealth::unknown(source)
        });

        health.total_attempts += 1;
        health.last_attempt = Some(now);
        if success {
            health.successful_attempts += 1;
            health.last_success = Some(now);
            health.consecutive_failures = 0;
        } else {
            health.failed_attempts += 1;
            health.last_failure = Some(now);
            health.consecutive_failures += 1;
        }
        health.is_currently_failing = !success;
        health.success_rate =
            health.successful_attempts as f64 / health.total_attempts as f64;

        health.recent_attempts.insert(
            0,
            AttemptRecord {
                timestamp_ms: now,
                success,
                duration_ms,
                rule_count,
                error,
            },
        );
        health.recent_attempts.truncate(self.window);

        health.average_duration_ms = mean(
            health
                .recent_attempts
                .iter()
                .map(|a| a.duration_ms as f64),
        )
        .unwrap_or(0.0);
        health.average_rule_count = mean(
            health
                .recent_attempts
                .iter()
                .filter_map(|a| a.rule_count.map(|c| c as f64)),
        );
        health.status = classify(&health);

        match serde_json::to_value(&health) {
            Ok(value) => {
                if let Err(err) = self.storage.set(&Self::key(source), value, None).await {
                    warn!(source, %err, "health write failed");
                }
            }
            Err(err) => warn!(source, %err, "health serialization failed"),
        }
        health
    }

    /// Stored health for a source, if any. Storage errors read as absent.
    pub async fn get(&self, source: &str) -> Option<SourceHealth> {
        match self.storage.get(&Self::key(source)).await {
            Ok(Some(entry)) => serde_json::from_value(entry.data).ok(),
            Ok(None) => None,
            Err(err) => {
                warn!(source, %err, "health read failed");
                None
            }
        }
    }

    /// Health for a source, `Unknown` when never attempted.
    pub async fn get_or_unknown(&self, source: &str) -> SourceHealth {
        self.get(source)
            .await
            .unwrap_or_else(|| SourceHealth::unknown(source))
    }
}

fn classify(health: &SourceHealth) -> HealthStatus {
    if health.total_attempts == 0 {
        return HealthStatus::Unknown;
    }
    if health.consecutive_failures >= 3 || health.success_rate < 0.5 {
        return HealthStatus::Unhealthy;
    }
    if health.success_rate < 0.9 || health.is_currently_failing {
        return HealthStatus::Degraded;
    }
    HealthStatus::Healthy
}

fn mean(values: impl Iterator<Item = f64>) -> Option<f64> {
    let mut sum = 0.0;
    let mut count = 0usize;
    for value in values {
        sum += value;
        count += 1;
    }
    if count == 0 { None } else { Some(sum / count as f64) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use listforge_storage::MemoryStorage;

    fn monitor() -> SourceHealthMonitor {
        SourceHealthMonitor::new(Arc::new(MemoryStorage::new()))
    }

    #[tokio::test]
    async fn unknown_until_first_attempt() {
        let monitor = monitor();
        let health = monitor.get_or_unknown("src").await;
        assert_eq!(health.status, HealthStatus::Unknown);
        assert_eq!(health.total_attempts, 0);
    }

    #[tokio::test]
    async fn successes_classify_healthy() {
        let monitor = monitor();
        for _ in 0..5 {
            monitor.record("src", true, 100, Some(42), None).await;
        }
        let health = monitor.get_or_unknown("src").await;
        assert_eq!(health.status, HealthStatus::Healthy);
        assert_eq!(health.total_attempts, 5);
        assert_eq!(health.success_rate, 1.0);
        assert_eq!(health.average_rule_count, Some(42.0));
        assert!(!health.is_currently_failing);
    }

    #[tokio::test]
    async fn consecutive_failures_classify_unhealthy() {
        let monitor = monitor();
        for _ in 0..10 {
            monitor.record("src", true, 100, Some(10), None).await;
        }
        monitor
            .record("src", false, 50, None, Some("timeout".to_string()))
            .await;
        let degraded = monitor.get_or_unknown("src").await;
        assert_eq!(degraded.status, HealthStatus::Degraded);
        assert!(degraded.is_currently_failing);
        assert_eq!(degraded.consecutive_failures, 1);

        monitor.record("src", false, 50, None, None).await;
        let after_three = monitor.record("src", false, 50, None, None).await;
        assert_eq!(after_three.status, HealthStatus::Unhealthy);
        assert_eq!(after_three.consecutive_failures, 3);
    }

    #[tokio::test]
    async fn window_is_bounded_newest_first() {
        let monitor = monitor();
        for i in 0..15u64 {
            monitor.record("src", true, i, Some(1), None).await;
        }
        let health = monitor.get_or_unknown("src").await;
        assert_eq!(health.recent_attempts.len(), 10);
        // Newest attempt first: duration 14.
        assert_eq!(health.recent_attempts[0].duration_ms, 14);
        assert_eq!(health.total_attempts, 15);
    }

    #[tokio::test]
    async fn success_resets_consecutive_failures() {
        let monitor = monitor();
        monitor.record("src", false, 10, None, None).await;
        monitor.record("src", false, 10, None, None).await;
        let health = monitor.record("src", true, 10, Some(5), None).await;
        assert_eq!(health.consecutive_failures, 0);
        assert!(!health.is_currently_failing);
    }
}
