use std::time::Duration;

/// Tunables of the lifecycle engine.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// When false, the engine monitors swaps and emits events but never runs
    /// claim or refund actions on its own.
    pub enable_auto_actions: bool,
    /// Reconcile-poll period while the WebSocket is open.
    pub poll_interval: Duration,
    /// Initial reconnect delay after the socket drops.
    pub reconnect_delay: Duration,
    /// Cap for the reconnect backoff.
    pub max_reconnect_delay: Duration,
    /// Initial poll period while in polling fallback.
    pub poll_retry_delay: Duration,
    /// Cap for the polling-fallback backoff.
    pub max_poll_retry_delay: Duration,
    /// How long to wait for the WebSocket to open before falling back to
    /// polling.
    pub ws_open_timeout: Duration,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            enable_auto_actions: true,
            poll_interval: Duration::from_millis(30_000),
            reconnect_delay: Duration::from_millis(1_000),
            max_reconnect_delay: Duration::from_millis(60_000),
            poll_retry_delay: Duration::from_millis(5_000),
            max_poll_retry_delay: Duration::from_millis(300_000),
            ws_open_timeout: Duration::from_secs(10),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = EngineConfig::default();

        assert!(config.enable_auto_actions);
        assert_eq!(config.poll_interval, Duration::from_secs(30));
        assert_eq!(config.reconnect_delay, Duration::from_secs(1));
        assert_eq!(config.max_reconnect_delay, Duration::from_secs(60));
        assert_eq!(config.poll_retry_delay, Duration::from_secs(5));
        assert_eq!(config.max_poll_retry_delay, Duration::from_secs(300));
        assert_eq!(config.ws_open_timeout, Duration::from_secs(10));
    }
}
