//! Fire-and-forget notifications to the approval bot.

use serde_json::json;
use std::time::Duration;
use tracing::{debug, warn};

/// Client for the bot service that asks the watching user to confirm
/// or reject a held transaction. Delivery failures are logged and
/// swallowed: a missed ping never blocks or fails a submission, the
/// transaction stays queryable through the admin surface.
#[derive(Debug, Clone)]
pub struct Notifier {
    http: reqwest::Client,
    base_url: String,
}

impl Notifier {
    pub fn new(base_url: String) -> Self {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_default();
        Self { http, base_url }
    }

    pub async fn transaction_held(&self, chat_id: i64, tx_id: u64) {
        let url = format!("{}/notify-transaction", self.base_url);
        let payload = json!({ "chat_id": chat_id, "tx_id": tx_id });
        match self.http.post(&url).json(&payload).send().await {
            Ok(response) if response.status().is_success() => {
                debug!(chat_id, tx_id, "notification delivered");
            }
            Ok(response) => {
                warn!(chat_id, tx_id, status = %response.status(), "notifier rejected ping");
            }
            Err(e) => {
                warn!(chat_id, tx_id, error = %e, "notification failed");
            }
        }
    }
}
