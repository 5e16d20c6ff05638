//! Operator control signals
//!
//! Stop and sell-all are explicit signals observed by the control loop.
//! Producers are the REST control endpoints and, for operator
//! compatibility, an optional flag-file poller. The loop itself never
//! looks at the filesystem.

use crate::config::ControlsConfig;
use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

#[derive(Clone, Default)]
pub struct ControlSignals {
    inner: Arc<Inner>,
}

#[derive(Default)]
struct Inner {
    stop: AtomicBool,
    sell_all: AtomicBool,
}

impl ControlSignals {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn request_stop(&self) {
        self.inner.stop.store(true, Ordering::SeqCst);
    }

    pub fn stop_requested(&self) -> bool {
        self.inner.stop.load(Ordering::SeqCst)
    }

    pub fn request_sell_all(&self) {
        self.inner.sell_all.store(true, Ordering::SeqCst);
    }

    pub fn sell_all_requested(&self) -> bool {
        self.inner.sell_all.load(Ordering::SeqCst)
    }

    /// Consume the sell-all request so one signal triggers exactly one
    /// liquidation pass.
    pub fn take_sell_all(&self) -> bool {
        self.inner.sell_all.swap(false, Ordering::SeqCst)
    }
}

/// Bridge flag files into signals. The sell-all file is deleted once its
/// signal is latched; the stop file is left in place for the operator to
/// clean up.
pub async fn run_flag_file_poller(signals: ControlSignals, cfg: ControlsConfig) {
    if cfg.stop_flag.is_none() && cfg.sell_all_flag.is_none() {
        return;
    }
    let interval = Duration::from_secs(cfg.poll_interval_secs.max(1));

    loop {
        if let Some(stop_flag) = &cfg.stop_flag {
            if Path::new(stop_flag).exists() {
                tracing::warn!(flag = %stop_flag, "stop flag detected");
                signals.request_stop();
                return;
            }
        }

        if let Some(sell_flag) = &cfg.sell_all_flag {
            if Path::new(sell_flag).exists() {
                tracing::warn!(flag = %sell_flag, "sell-all flag detected");
                signals.request_sell_all();
                if let Err(e) = tokio::fs::remove_file(sell_flag).await {
                    tracing::warn!(flag = %sell_flag, error = %e, "could not clear sell-all flag");
                }
            }
        }

        tokio::time::sleep(interval).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_signals_start_clear() {
        let signals = ControlSignals::new();
        assert!(!signals.stop_requested());
        assert!(!signals.sell_all_requested());
    }

    #[test]
    fn test_stop_latches() {
        let signals = ControlSignals::new();
        signals.request_stop();
        assert!(signals.stop_requested());
        assert!(signals.stop_requested());
    }

    #[test]
    fn test_sell_all_consumed_once() {
        let signals = ControlSignals::new();
        signals.request_sell_all();
        assert!(signals.take_sell_all());
        // Consumed: the same request must not fire twice
        assert!(!signals.take_sell_all());
        assert!(!signals.sell_all_requested());
    }

    #[test]
    fn test_clones_share_state() {
        let signals = ControlSignals::new();
        let other = signals.clone();
        other.request_sell_all();
        assert!(signals.sell_all_requested());
    }

    #[test]
    fn test_poller_bridges_stop_flag() {
        let dir = tempfile::TempDir::new().unwrap();
        let stop_path = dir.path().join("trader.stop");
        std::fs::write(&stop_path, b"1").unwrap();

        let cfg = ControlsConfig {
            stop_flag: Some(stop_path.to_string_lossy().into_owned()),
            sell_all_flag: None,
            poll_interval_secs: 1,
        };
        let signals = ControlSignals::new();
        // Returns as soon as the stop flag is seen
        tokio_test::block_on(run_flag_file_poller(signals.clone(), cfg));
        assert!(signals.stop_requested());
    }

    #[test]
    fn test_poller_without_flags_is_noop() {
        let cfg = ControlsConfig::default();
        let signals = ControlSignals::new();
        tokio_test::block_on(run_flag_file_poller(signals.clone(), cfg));
        assert!(!signals.stop_requested());
    }
}
