//! Completion webhook delivery
//!
//! When a session reaches a gateway's terminal stage, a notification is
//! POSTed to the configured URL. Delivery is at-most-once and entirely
//! best-effort: errors are logged and never surface to the visitor.

use crate::gateway::GatewayDefinition;
use crate::session::GatewaySession;

#[derive(Clone)]
pub struct WebhookNotifier {
    url: Option<String>,
    client: reqwest::Client,
}

impl WebhookNotifier {
    pub fn new(url: Option<String>) -> Self {
        Self {
            url,
            client: reqwest::Client::new(),
        }
    }

    pub fn is_configured(&self) -> bool {
        self.url.is_some()
    }

    /// Fire-and-forget completion notice. Spawns the request and returns
    /// immediately; must be called from within a tokio runtime.
    pub fn notify_completion(&self, session: &GatewaySession, gateway: &GatewayDefinition) {
        let Some(url) = self.url.clone() else {
            return;
        };

        let payload = serde_json::json!({
            "event": "gateway_completed",
            "sessionId": session.id,
            "gatewayId": gateway.id,
            "gatewayName": gateway.name,
            "creatorId": gateway.creator_id,
            "userId": session.user_id,
            "completedTasks": session.completed_tasks,
            "completedAt": session.completed_at,
        });

        let client = self.client.clone();
        tokio::spawn(async move {
            match client.post(&url).json(&payload).send().await {
                Ok(response) if !response.status().is_success() => {
                    tracing::warn!(status = %response.status(), "completion webhook rejected");
                }
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!("completion webhook delivery failed: {e}");
                }
            }
        });
    }
}
