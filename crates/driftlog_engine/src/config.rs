//! Configuration for the sync engine.

use driftlog_queue::BatchConfig;
use parking_lot::RwLock;
use std::sync::Arc;
use std::time::Duration;

/// Static configuration for a sync engine instance.
///
/// The server address lives on the transport, not here; the engine never
/// sees a URL.
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Raw sync token; validated at the start of every cycle.
    pub token: String,
    /// Queue capacity bound.
    pub queue_capacity: usize,
    /// Retry configuration for the transport driver.
    pub retry: RetryConfig,
    /// Timeout for `ensure_entry_synced`.
    pub ensure_timeout: Duration,
}

impl SyncConfig {
    /// Creates a new configuration.
    pub fn new(token: impl Into<String>) -> Self {
        Self {
            token: token.into(),
            queue_capacity: driftlog_queue::DEFAULT_CAPACITY,
            retry: RetryConfig::default(),
            ensure_timeout: Duration::from_secs(30),
        }
    }

    /// Sets the queue capacity bound.
    pub fn with_queue_capacity(mut self, capacity: usize) -> Self {
        self.queue_capacity = capacity;
        self
    }

    /// Sets the retry configuration.
    pub fn with_retry(mut self, retry: RetryConfig) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the `ensure_entry_synced` timeout.
    pub fn with_ensure_timeout(mut self, timeout: Duration) -> Self {
        self.ensure_timeout = timeout;
        self
    }
}

/// Configuration for retry behavior.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Maximum number of send attempts per cycle.
    pub max_attempts: u32,
    /// Delay before the second attempt.
    pub initial_delay: Duration,
    /// Cap on any single delay.
    pub max_delay: Duration,
    /// Multiplier for exponential backoff.
    pub backoff_multiplier: f64,
}

impl RetryConfig {
    /// Creates a new retry configuration.
    pub fn new(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_multiplier: 2.0,
        }
    }

    /// Creates a configuration with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            initial_delay: Duration::ZERO,
            max_delay: Duration::ZERO,
            backoff_multiplier: 1.0,
        }
    }

    /// Sets the initial delay.
    pub fn with_initial_delay(mut self, delay: Duration) -> Self {
        self.initial_delay = delay;
        self
    }

    /// Sets the maximum delay.
    pub fn with_max_delay(mut self, delay: Duration) -> Self {
        self.max_delay = delay;
        self
    }

    /// Sets the backoff multiplier.
    pub fn with_backoff_multiplier(mut self, multiplier: f64) -> Self {
        self.backoff_multiplier = multiplier;
        self
    }

    /// The delay after a failed attempt (1-indexed):
    /// `initial_delay * multiplier^(attempt - 1)`, capped at `max_delay`.
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        if attempt == 0 {
            return Duration::ZERO;
        }
        let delay = self.initial_delay.as_secs_f64()
            * self.backoff_multiplier.powi(attempt.saturating_sub(1) as i32);
        Duration::from_secs_f64(delay.min(self.max_delay.as_secs_f64()))
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self::new(3)
    }
}

/// User settings consulted at the start of every cycle.
#[derive(Debug, Clone, PartialEq)]
pub struct SyncSettings {
    /// Whether automatic sync is enabled.
    pub sync_enabled: bool,
    /// Automatic sync interval.
    pub auto_sync_interval_minutes: u64,
    /// Activities shorter than this are not synced.
    pub minimum_duration_secs: u64,
    /// Producer heartbeat interval.
    pub heartbeat_interval_secs: u64,
    /// Gap after which the device is presumed asleep.
    pub sleep_threshold_secs: u64,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            sync_enabled: true,
            auto_sync_interval_minutes: 5,
            minimum_duration_secs: 5,
            heartbeat_interval_secs: 30,
            sleep_threshold_secs: 60,
        }
    }
}

impl SyncSettings {
    /// The derived batch-preparation knobs.
    pub fn batch_config(&self) -> BatchConfig {
        BatchConfig {
            minimum_duration_secs: self.minimum_duration_secs,
            heartbeat_interval_secs: self.heartbeat_interval_secs,
            sleep_threshold_secs: self.sleep_threshold_secs,
        }
    }

    /// The automatic sync interval as a duration.
    pub fn auto_sync_interval(&self) -> Duration {
        Duration::from_secs(self.auto_sync_interval_minutes * 60)
    }
}

/// Source of user settings, re-read at the start of each cycle rather
/// than cached indefinitely.
pub trait SettingsSource: Send + Sync {
    /// Returns the current settings.
    fn load(&self) -> SyncSettings;
}

/// A fixed settings source.
#[derive(Debug, Clone)]
pub struct StaticSettings(pub SyncSettings);

impl SettingsSource for StaticSettings {
    fn load(&self) -> SyncSettings {
        self.0.clone()
    }
}

/// A mutable, shareable settings source (settings page updates it, the
/// engine reads it each cycle).
#[derive(Debug, Clone, Default)]
pub struct SharedSettings {
    inner: Arc<RwLock<SyncSettings>>,
}

impl SharedSettings {
    /// Creates a shared source with initial settings.
    pub fn new(settings: SyncSettings) -> Self {
        Self {
            inner: Arc::new(RwLock::new(settings)),
        }
    }

    /// Replaces the settings.
    pub fn set(&self, settings: SyncSettings) {
        *self.inner.write() = settings;
    }

    /// Applies a patch to the settings.
    pub fn update(&self, patch: impl FnOnce(&mut SyncSettings)) {
        patch(&mut self.inner.write());
    }
}

impl SettingsSource for SharedSettings {
    fn load(&self) -> SyncSettings {
        self.inner.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn retry_delay_is_exponential() {
        let retry = RetryConfig::new(3)
            .with_initial_delay(Duration::from_millis(100))
            .with_backoff_multiplier(2.0);

        assert_eq!(retry.delay_for_attempt(0), Duration::ZERO);
        assert_eq!(retry.delay_for_attempt(1), Duration::from_millis(100));
        assert_eq!(retry.delay_for_attempt(2), Duration::from_millis(200));
        assert_eq!(retry.delay_for_attempt(3), Duration::from_millis(400));
    }

    #[test]
    fn retry_delay_respects_max() {
        let retry = RetryConfig::new(10)
            .with_initial_delay(Duration::from_secs(1))
            .with_max_delay(Duration::from_secs(5))
            .with_backoff_multiplier(10.0);

        assert_eq!(retry.delay_for_attempt(5), Duration::from_secs(5));
    }

    #[test]
    fn shared_settings_update() {
        let settings = SharedSettings::default();
        assert!(settings.load().sync_enabled);

        settings.update(|s| s.sync_enabled = false);
        assert!(!settings.load().sync_enabled);
    }

    #[test]
    fn batch_config_derivation() {
        let settings = SyncSettings {
            minimum_duration_secs: 7,
            heartbeat_interval_secs: 15,
            sleep_threshold_secs: 120,
            ..SyncSettings::default()
        };
        let batch = settings.batch_config();
        assert_eq!(batch.minimum_duration_secs, 7);
        // Sleep threshold dominates 2x heartbeat here.
        assert_eq!(batch.idle_threshold_ms(), 120_000);
    }
}
