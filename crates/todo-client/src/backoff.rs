//! Reconnect scheduling.
//!
//! Delays grow exponentially and are jittered so that many clients dropped
//! by the same server restart do not all come back in the same instant.

use std::time::Duration;

use rand::Rng;

/// Configuration for reconnection behavior.
#[derive(Debug, Clone)]
pub struct ReconnectConfig {
    /// Initial delay before first reconnect attempt
    pub initial_delay: Duration,
    /// Maximum delay between attempts
    pub max_delay: Duration,
    /// Multiplier for exponential backoff
    pub backoff_factor: f64,
    /// Fraction of each delay that is randomized (0.0 = none, 1.0 = all)
    pub jitter: f64,
    /// Maximum number of attempts (None = unlimited)
    pub max_attempts: Option<u32>,
}

impl Default for ReconnectConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            backoff_factor: 2.0,
            jitter: 0.5,
            max_attempts: None, // Unlimited
        }
    }
}

/// Calculates the next reconnection delay using exponential backoff.
pub fn calculate_backoff(attempt: u32, config: &ReconnectConfig) -> Duration {
    let delay_secs = config.initial_delay.as_secs_f64()
        * config.backoff_factor.powi(attempt.saturating_sub(1) as i32);

    Duration::from_secs_f64(delay_secs.min(config.max_delay.as_secs_f64()))
}

/// Backoff delay with its top `jitter` fraction replaced by a random amount.
pub fn jittered_backoff<R: Rng + ?Sized>(attempt: u32, config: &ReconnectConfig, rng: &mut R) -> Duration {
    let base = calculate_backoff(attempt, config).as_secs_f64();
    let jitter = config.jitter.clamp(0.0, 1.0);
    let fixed = base * (1.0 - jitter);
    let random = base * jitter * rng.random::<f64>();
    Duration::from_secs_f64(fixed + random)
}

/// Reconnection state for the client.
#[derive(Debug, Clone, Default)]
pub struct ReconnectState {
    /// Number of reconnection attempts since the last successful connect
    pub attempts: u32,
    /// Delay chosen for the latest attempt
    pub current_delay: Duration,
}

impl ReconnectState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Count an attempt and pick how long to wait before it.
    pub fn next_delay<R: Rng + ?Sized>(&mut self, config: &ReconnectConfig, rng: &mut R) -> Duration {
        self.attempts += 1;
        self.current_delay = jittered_backoff(self.attempts, config, rng);
        self.current_delay
    }

    /// Reset state after successful connection.
    pub fn reset(&mut self) {
        self.attempts = 0;
        self.current_delay = Duration::ZERO;
    }

    /// Check if max attempts exceeded.
    pub fn exceeded_max_attempts(&self, config: &ReconnectConfig) -> bool {
        config
            .max_attempts
            .map(|max| self.attempts >= max)
            .unwrap_or(false)
    }
}
