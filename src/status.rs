//! User-facing status reporting.
//!
//! Everything the player wants the user to see goes through one reporter:
//! a terminal line, a tracing record, and (for errors) a desktop
//! notification via notify-rust (D-Bus).

use notify_rust::Notification;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusKind {
    Info,
    Loading,
    Success,
    Error,
}

pub struct StatusReporter {
    notifications: bool,
}

impl StatusReporter {
    pub fn new(notifications: bool) -> Self {
        Self { notifications }
    }

    pub fn update(&self, kind: StatusKind, message: &str) {
        match kind {
            StatusKind::Error => {
                eprintln!("! {message}");
                warn!("{message}");
                self.notify("yomiage-rs", message);
            }
            StatusKind::Loading => {
                println!("… {message}");
                debug!("{message}");
            }
            StatusKind::Info | StatusKind::Success => {
                println!("  {message}");
                debug!("{message}");
            }
        }
    }

    /// Progress line for the sentence that just became current.
    pub fn progress(&self, position: usize, total: usize, text: &str) {
        println!("▶ [{position}/{total}] {text}");
    }

    fn notify(&self, summary: &str, body: &str) {
        if !self.notifications {
            return;
        }

        if let Err(e) = Notification::new()
            .summary(summary)
            .body(body)
            .icon("audio-speakers")
            .timeout(3000)
            .show()
        {
            warn!("Failed to show notification: {e}");
        }
    }
}
