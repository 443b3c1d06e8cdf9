use std::time::Duration;

use crate::error::MonitorError;

/// Timing parameters for one polling coordinator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollingConfig {
    /// Delay between the start of consecutive snapshot fetches.
    pub interval: Duration,
    /// Upper bound on a single fetch. A slower fetch counts as a failure.
    pub fetch_timeout: Duration,
    /// With no successful update for this long, the execution is stale.
    pub stale_after: Duration,
}

impl PollingConfig {
    /// Refresh interval while watching a single active execution.
    pub const EXECUTION_INTERVAL: Duration = Duration::from_secs(5);
    /// Refresh interval for a live task board.
    pub const BOARD_INTERVAL: Duration = Duration::from_secs(3);
    pub const DEFAULT_FETCH_TIMEOUT: Duration = Duration::from_secs(10);
    pub const DEFAULT_STALE_AFTER: Duration = Duration::from_secs(30);

    /// Defaults for watching a single execution.
    pub fn execution() -> Self {
        Self {
            interval: Self::EXECUTION_INTERVAL,
            fetch_timeout: Self::DEFAULT_FETCH_TIMEOUT,
            stale_after: Self::DEFAULT_STALE_AFTER,
        }
    }

    /// Defaults for a task board watching many executions.
    pub fn task_board() -> Self {
        Self {
            interval: Self::BOARD_INTERVAL,
            ..Self::execution()
        }
    }

    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_fetch_timeout(mut self, timeout: Duration) -> Self {
        self.fetch_timeout = timeout;
        self
    }

    pub fn with_stale_after(mut self, stale_after: Duration) -> Self {
        self.stale_after = stale_after;
        self
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self::execution()
    }
}

/// Monitor configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct MonitorConfig {
    /// Base URL of the API serving execution snapshots.
    pub api_url: String,
    /// Timing for a single watched execution.
    pub execution: PollingConfig,
    /// Timing for the multi-execution board.
    pub board: PollingConfig,
}

impl MonitorConfig {
    /// Load configuration from environment variables with defaults.
    ///
    /// | Env Var                    | Default                          |
    /// |----------------------------|----------------------------------|
    /// | `MONITOR_API_URL`          | `http://localhost:3000/api/v1`   |
    /// | `POLL_INTERVAL_SECS`       | `5`                              |
    /// | `BOARD_POLL_INTERVAL_SECS` | `3`                              |
    /// | `FETCH_TIMEOUT_SECS`       | `10`                             |
    /// | `STALE_AFTER_SECS`         | `30`                             |
    pub fn from_env() -> Result<Self, MonitorError> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Same as [`from_env`](Self::from_env) with a custom variable source.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, MonitorError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let api_url = lookup("MONITOR_API_URL")
            .map(|v| v.trim().trim_end_matches('/').to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| "http://localhost:3000/api/v1".into());

        let interval = secs(&lookup, "POLL_INTERVAL_SECS", PollingConfig::EXECUTION_INTERVAL)?;
        let board_interval = secs(
            &lookup,
            "BOARD_POLL_INTERVAL_SECS",
            PollingConfig::BOARD_INTERVAL,
        )?;
        let fetch_timeout = secs(
            &lookup,
            "FETCH_TIMEOUT_SECS",
            PollingConfig::DEFAULT_FETCH_TIMEOUT,
        )?;
        let stale_after = secs(&lookup, "STALE_AFTER_SECS", PollingConfig::DEFAULT_STALE_AFTER)?;

        let execution = PollingConfig {
            interval,
            fetch_timeout,
            stale_after,
        };

        Ok(Self {
            api_url,
            execution,
            board: execution.with_interval(board_interval),
        })
    }
}

fn secs<F>(lookup: &F, key: &'static str, default: Duration) -> Result<Duration, MonitorError>
where
    F: Fn(&str) -> Option<String>,
{
    let Some(raw) = lookup(key) else {
        return Ok(default);
    };
    match raw.trim().parse::<u64>() {
        Ok(n) if n > 0 => Ok(Duration::from_secs(n)),
        _ => Err(MonitorError::InvalidConfig {
            key,
            value: raw,
            reason: "must be a positive integer",
        }),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
