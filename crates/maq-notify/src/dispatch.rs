use serde_json::json;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Minimum spacing between two sends for the same change key.
pub const DISPATCH_MIN_INTERVAL: Duration = Duration::from_millis(2000);

/// Delivery seam for the outbound push request. The production impl posts
/// to the fan-out endpoint; tests substitute a recorder.
pub trait PushGateway: Send + Sync {
    fn send(&self, title: &str, body: &str);
}

/// Fire-and-forget POST of `{title, body}` to the hub's send endpoint.
/// Errors are logged and dropped; delivery is best effort and must never
/// block or fail the state change it accompanies.
pub struct HttpGateway {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpGateway {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

impl PushGateway for HttpGateway {
    fn send(&self, title: &str, body: &str) {
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let payload = json!({ "title": title, "body": body });
        tokio::spawn(async move {
            match client.post(&endpoint).json(&payload).send().await {
                Ok(response) if !response.status().is_success() => {
                    warn!(event = "fcm_dispatch_error", status = %response.status());
                }
                Ok(_) => {}
                Err(err) => {
                    warn!(event = "fcm_dispatch_error", error = %err);
                }
            }
        });
    }
}

/// Turns one local, user-initiated state change into at most one outbound
/// push request per change key per interval. Without a registered delivery
/// token the dispatcher is a silent no-op.
pub struct Dispatcher<G: PushGateway> {
    gateway: G,
    token: Option<String>,
    last_sent: Option<(String, Instant)>,
}

impl<G: PushGateway> Dispatcher<G> {
    pub fn new(gateway: G, token: Option<String>) -> Self {
        Self {
            gateway,
            token: token.filter(|token| !token.trim().is_empty()),
            last_sent: None,
        }
    }

    pub fn set_token(&mut self, token: Option<String>) {
        self.token = token.filter(|token| !token.trim().is_empty());
    }

    /// Returns whether a send was attempted.
    pub fn dispatch(&mut self, title: &str, body: &str, change_key: &str, now: Instant) -> bool {
        if self.token.is_none() {
            debug!(event = "dispatch_skipped", reason = "no_token");
            return false;
        }
        if let Some((key, sent_at)) = &self.last_sent {
            if key == change_key && now.duration_since(*sent_at) < DISPATCH_MIN_INTERVAL {
                debug!(event = "dispatch_skipped", reason = "rate_limited", key = change_key);
                return false;
            }
        }
        self.last_sent = Some((change_key.to_string(), now));
        self.gateway.send(title, body);
        true
    }
}
