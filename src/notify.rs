//! Best-effort completion alerts.
//!
//! Nothing here may block or fail the timer: a missing notification daemon,
//! a disabled setting or a failed `show()` all degrade to a log line.

use std::io::Write;
use std::sync::{Arc, Mutex};

use notify_rust::Notification;
use tracing::{debug, info};

pub trait NotificationSink: Send {
    /// Called once at startup, before the first `notify`.
    fn request_permission(&mut self) {}

    fn notify(&self, title: &str, body: &str);
}

/// Desktop notification plus an optional terminal bell.
#[derive(Debug)]
pub struct DesktopNotifier {
    enabled: bool,
    sound: bool,
    permitted: bool,
}

impl DesktopNotifier {
    pub fn new(enabled: bool, sound: bool) -> Self {
        Self {
            enabled,
            sound,
            permitted: false,
        }
    }

    fn ring_bell(&self) {
        let mut stdout = std::io::stdout();
        let _ = stdout.write_all(b"\x07");
        let _ = stdout.flush();
    }
}

impl NotificationSink for DesktopNotifier {
    fn request_permission(&mut self) {
        if !self.enabled {
            self.permitted = false;
            return;
        }
        self.permitted = notification_server_available();
        if !self.permitted {
            info!("no notification server found, desktop alerts disabled");
        }
    }

    fn notify(&self, title: &str, body: &str) {
        if self.sound {
            self.ring_bell();
        }
        if !self.permitted {
            return;
        }
        if let Err(e) = Notification::new()
            .summary(title)
            .body(body)
            .appname("study_timer")
            .show()
        {
            debug!(error = %e, "failed to show notification");
        }
    }
}

#[cfg(all(unix, not(target_os = "macos")))]
fn notification_server_available() -> bool {
    match notify_rust::get_server_information() {
        Ok(server) => {
            debug!(server = %server.name, "notification server found");
            true
        }
        Err(e) => {
            debug!(error = %e, "notification server lookup failed");
            false
        }
    }
}

#[cfg(not(all(unix, not(target_os = "macos"))))]
fn notification_server_available() -> bool {
    true
}

/// Records every alert; clones share the record.
#[derive(Debug, Clone, Default)]
pub struct RecordingSink {
    sent: Arc<Mutex<Vec<(String, String)>>>,
    permission_requests: Arc<Mutex<usize>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().map(|s| s.clone()).unwrap_or_default()
    }

    pub fn permission_requests(&self) -> usize {
        self.permission_requests.lock().map(|n| *n).unwrap_or(0)
    }
}

impl NotificationSink for RecordingSink {
    fn request_permission(&mut self) {
        if let Ok(mut n) = self.permission_requests.lock() {
            *n += 1;
        }
    }

    fn notify(&self, title: &str, body: &str) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push((title.to_string(), body.to_string()));
        }
    }
}
