use std::time::Duration;

use rand::Rng;

use crate::config::FetchCfg;

/// Exponential backoff with uniform jitter between fetch attempts.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub attempts: u32,
    pub base_ms: u64,
    pub factor: f64,
    pub jitter_ms: u64,
}

impl RetryPolicy {
    /// Delay to wait after failed attempt `attempt` (1-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        Duration::from_millis(backoff_ms(attempt, self.base_ms, self.factor, self.jitter_ms))
    }
}

impl From<&FetchCfg> for RetryPolicy {
    fn from(cfg: &FetchCfg) -> Self {
        Self {
            attempts: cfg.attempts.max(1),
            base_ms: cfg.backoff_base_ms,
            factor: cfg.backoff_factor,
            jitter_ms: cfg.backoff_jitter_ms,
        }
    }
}

pub fn backoff_ms(attempt: u32, base_ms: u64, factor: f64, jitter_ms: u64) -> u64 {
    let pow = factor.powi((attempt.saturating_sub(1)) as i32);
    let core = (base_ms as f64 * pow).round() as u64;
    let jitter = if jitter_ms > 0 { rand::rng().random_range(0..=jitter_ms) } else { 0 };
    core + jitter
}
