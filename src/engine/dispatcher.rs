//! Notification dispatcher.
//!
//! Batches a tick's new alerts into a single Slack-formatted message and
//! hands it to a [`Notifier`]. Runs after commit, so a failed send never
//! touches persisted data.

use std::fmt::Write as _;
use tracing::{info, warn};

use crate::notify::Notifier;
use crate::types::{Alert, DispatchError};

const HEADER: &str = "🔔 *Volatility alert* 🔔";
const SEPARATOR: &str = "------------------------";

pub struct Dispatcher {
    quote_currency: String,
}

impl Dispatcher {
    pub fn new(quote_currency: &str) -> Self {
        Self { quote_currency: quote_currency.to_uppercase() }
    }

    /// Render one message for the whole batch. `None` when there is nothing
    /// to say.
    pub fn format_message(&self, alerts: &[Alert]) -> Option<String> {
        if alerts.is_empty() {
            return None;
        }

        let cur = &self.quote_currency;
        let mut msg = String::from(HEADER);
        msg.push('\n');

        for alert in alerts {
            // Writing into a String cannot fail.
            let _ = writeln!(msg, "{SEPARATOR}");
            let _ = writeln!(msg, "*Asset:* {}", alert.asset);
            let _ = writeln!(msg, "*Time:* {}", alert.timestamp.format("%Y-%m-%d %H:%M:%S UTC"));
            let _ = writeln!(msg, "*Previous price:* {} {cur}", alert.start_price);
            let _ = writeln!(msg, "*Current price:* {} {cur}", alert.end_price);
            let _ = writeln!(msg, "*Variation:* {:+.2}%", alert.price_change_pct);
            let _ = writeln!(msg, "*Interval:* {}", alert.time_interval);
            if let Some(ref who) = alert.subscriber {
                let _ = writeln!(msg, "*Subscriber:* {who}");
            }
        }

        Some(msg)
    }

    /// Send every alert of the tick as one message. No-op on empty input.
    pub async fn dispatch(
        &self,
        alerts: &[Alert],
        notifier: &dyn Notifier,
    ) -> Result<(), DispatchError> {
        let Some(message) = self.format_message(alerts) else {
            return Ok(());
        };

        match notifier.send(&message).await {
            Ok(()) => {
                info!(alerts = alerts.len(), "Alert notification sent");
                Ok(())
            }
            Err(e) => {
                warn!(alerts = alerts.len(), error = %e, "Alert notification failed");
                Err(e)
            }
        }
    }
}
