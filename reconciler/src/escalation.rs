//! Escalation of violations to operators

use crate::{Error, Result};
use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Timelike, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::{error, warn};

/// Alert transport and halt switch
#[async_trait]
pub trait EscalationSink: Send + Sync {
    /// Send a free-text alert from `module`
    async fn notify(&self, module: &str, message: &str);

    /// Ask the upstream system to stop processing
    async fn request_halt(&self);
}

/// Local hours during which a halt may be requested.
///
/// `[from_hour, to_hour)` in local time; the window wraps past midnight
/// when `from_hour > to_hour`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HaltWindow {
    /// First hour of the window
    pub from_hour: u32,
    /// Hour the window closes
    pub to_hour: u32,
    /// Local time offset from UTC, in hours
    #[serde(default)]
    pub utc_offset_hours: i32,
}

impl HaltWindow {
    /// Reject out-of-range hours, offsets and empty windows
    pub fn validate(&self) -> Result<()> {
        if self.from_hour > 23 || self.to_hour > 23 {
            return Err(Error::Config(format!(
                "halt window hours {}..{} must be within 0..=23",
                self.from_hour, self.to_hour
            )));
        }
        if self.from_hour == self.to_hour {
            return Err(Error::Config("halt window is empty".to_string()));
        }
        if !(-12..=14).contains(&self.utc_offset_hours) {
            return Err(Error::Config(format!(
                "halt window UTC offset {} out of range",
                self.utc_offset_hours
            )));
        }
        Ok(())
    }

    /// Whether local `hour` falls inside the window
    pub fn contains_hour(&self, hour: u32) -> bool {
        if self.from_hour <= self.to_hour {
            hour >= self.from_hour && hour < self.to_hour
        } else {
            hour >= self.from_hour || hour < self.to_hour
        }
    }

    /// Whether `now` falls inside the window
    pub fn contains(&self, now: DateTime<Utc>) -> bool {
        let hour = match FixedOffset::east_opt(self.utc_offset_hours * 3600) {
            Some(offset) => now.with_timezone(&offset).hour(),
            None => now.hour(),
        };
        self.contains_hour(hour)
    }
}

/// Sink that writes alerts to the log at ERROR level.
///
/// With a halt window, halt requests outside it are downgraded to a warning
/// asking for a manual check.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink {
    halt_window: Option<HaltWindow>,
}

impl TracingSink {
    /// Sink honouring `halt_window`, or halting at any time when `None`
    pub fn new(halt_window: Option<HaltWindow>) -> Self {
        Self { halt_window }
    }

    /// Whether a halt requested at `now` goes through
    pub fn halt_allowed(&self, now: DateTime<Utc>) -> bool {
        self.halt_window.map_or(true, |w| w.contains(now))
    }
}

#[async_trait]
impl EscalationSink for TracingSink {
    async fn notify(&self, module: &str, message: &str) {
        error!(module, alert = message, "Escalation");
    }

    async fn request_halt(&self) {
        if self.halt_allowed(Utc::now()) {
            error!("Halt requested");
        } else {
            warn!(window = ?self.halt_window, "Halt suppressed outside the halt window, check manually");
        }
    }
}

/// One recorded alert
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Alert {
    /// Reporting module
    pub module: String,
    /// Alert text
    pub message: String,
}

/// Sink that keeps every alert in memory, for tests and dry runs
#[derive(Debug, Default)]
pub struct RecordingSink {
    alerts: Mutex<Vec<Alert>>,
    halts: AtomicUsize,
}

impl RecordingSink {
    /// Empty sink
    pub fn new() -> Self {
        Self::default()
    }

    /// Alerts received so far
    pub fn alerts(&self) -> Vec<Alert> {
        self.alerts.lock().clone()
    }

    /// Alerts received from `module`
    pub fn alerts_from(&self, module: &str) -> Vec<Alert> {
        self.alerts
            .lock()
            .iter()
            .filter(|a| a.module == module)
            .cloned()
            .collect()
    }

    /// Halt requests received so far
    pub fn halt_requests(&self) -> usize {
        self.halts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl EscalationSink for RecordingSink {
    async fn notify(&self, module: &str, message: &str) {
        self.alerts.lock().push(Alert {
            module: module.to_string(),
            message: message.to_string(),
        });
    }

    async fn request_halt(&self) {
        self.halts.fetch_add(1, Ordering::SeqCst);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn overnight() -> HaltWindow {
        HaltWindow {
            from_hour: 23,
            to_hour: 7,
            utc_offset_hours: 8,
        }
    }

    #[test]
    fn test_halt_window_hours() {
        let window = overnight();
        assert!(window.contains_hour(23));
        assert!(window.contains_hour(0));
        assert!(window.contains_hour(6));
        assert!(!window.contains_hour(7));
        assert!(!window.contains_hour(22));

        let daytime = HaltWindow {
            from_hour: 9,
            to_hour: 17,
            utc_offset_hours: 0,
        };
        assert!(daytime.contains_hour(9));
        assert!(!daytime.contains_hour(17));
        assert!(!daytime.contains_hour(3));
    }

    #[test]
    fn test_halt_window_uses_local_time() {
        let sink = TracingSink::new(Some(overnight()));
        // 16:00 UTC is midnight at UTC+8
        assert!(sink.halt_allowed(Utc.with_ymd_and_hms(2024, 1, 1, 16, 0, 0).unwrap()));
        // 02:00 UTC is 10:00 at UTC+8
        assert!(!sink.halt_allowed(Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap()));

        let unrestricted = TracingSink::default();
        assert!(unrestricted.halt_allowed(Utc.with_ymd_and_hms(2024, 1, 1, 2, 0, 0).unwrap()));
    }

    #[test]
    fn test_halt_window_validation() {
        assert!(overnight().validate().is_ok());
        let mut window = overnight();
        window.to_hour = 24;
        assert!(matches!(window.validate(), Err(Error::Config(_))));
        window.to_hour = 23;
        assert!(window.validate().is_err());
        let mut window = overnight();
        window.utc_offset_hours = 20;
        assert!(window.validate().is_err());
    }

    #[tokio::test]
    async fn test_recording_sink() {
        let sink = RecordingSink::new();
        sink.notify("conservation", "USDT supply mismatch").await;
        sink.notify("dual_source", "account 11 diverged").await;
        sink.request_halt().await;

        assert_eq!(sink.alerts().len(), 2);
        let alerts = sink.alerts_from("dual_source");
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].message, "account 11 diverged");
        assert_eq!(sink.halt_requests(), 1);
    }
}
