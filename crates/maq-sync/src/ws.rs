use crate::wire::{validate_envelope, SyncEnvelope};
use crate::RemoteDocument;
use futures_util::{SinkExt, StreamExt};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::Message;
use tracing::{debug, info, warn};
use url::Url;

type SubscriberMap = Arc<Mutex<HashMap<String, Vec<mpsc::UnboundedSender<Value>>>>>;

/// `RemoteDocument` backed by the hub's websocket change feed.
///
/// A background task owns the connection and reconnects with doubling
/// backoff; the hub re-sends the current document for every subscribed path
/// after each `hello`, so a reconnect behaves like a fresh subscription.
/// Writes queue through an unbounded channel and are dropped with a log
/// line if the connection is down long enough for the socket to reject
/// them; there is no retry beyond the queue itself.
pub struct WsRemote {
    client_id: String,
    out_tx: mpsc::UnboundedSender<SyncEnvelope>,
    subscribers: SubscriberMap,
}

impl WsRemote {
    /// Spawns the connection task and returns one receiver per requested
    /// path, in order. The receivers are registered before the task starts,
    /// so the hub's post-hello snapshot cannot arrive ahead of them.
    pub fn connect(
        url: Url,
        client_id: &str,
        paths: Vec<String>,
    ) -> (Arc<Self>, Vec<mpsc::UnboundedReceiver<Value>>) {
        let (out_tx, out_rx) = mpsc::unbounded_channel();
        let subscribers: SubscriberMap = Arc::new(Mutex::new(HashMap::new()));
        let mut feeds = Vec::with_capacity(paths.len());
        {
            let mut map = subscribers.lock().unwrap();
            for path in &paths {
                let (tx, rx) = mpsc::unbounded_channel();
                map.entry(path.clone()).or_default().push(tx);
                feeds.push(rx);
            }
        }
        let remote = Arc::new(Self {
            client_id: client_id.to_string(),
            out_tx,
            subscribers: subscribers.clone(),
        });
        tokio::spawn(feed_loop(
            url,
            remote.client_id.clone(),
            paths,
            out_rx,
            subscribers,
        ));
        (remote, feeds)
    }
}

impl RemoteDocument for WsRemote {
    fn write(&self, path: &str, body: Value) {
        let envelope = SyncEnvelope::replace(&self.client_id, path, body);
        if self.out_tx.send(envelope).is_err() {
            warn!(event = "remote_write_error", path = path, error = "feed task gone");
        }
    }

    fn subscribe(&self, path: &str) -> mpsc::UnboundedReceiver<Value> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.subscribers
            .lock()
            .unwrap()
            .entry(path.to_string())
            .or_default()
            .push(tx);
        rx
    }
}

async fn feed_loop(
    url: Url,
    client_id: String,
    paths: Vec<String>,
    mut out_rx: mpsc::UnboundedReceiver<SyncEnvelope>,
    subscribers: SubscriberMap,
) {
    let mut backoff = Duration::from_secs(1);
    loop {
        let (mut ws, _) = match connect_async(url.clone()).await {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "hub_connect_error", error = %err);
                tokio::time::sleep(backoff).await;
                backoff = next_backoff(backoff);
                continue;
            }
        };
        backoff = Duration::from_secs(1);
        info!(event = "hub_connected", url = %url);

        let hello = SyncEnvelope::hello(&client_id, paths.clone());
        let hello = match serde_json::to_string(&hello) {
            Ok(text) => text,
            Err(err) => {
                warn!(event = "hello_encode_error", error = %err);
                return;
            }
        };
        if ws.send(Message::Text(hello)).await.is_err() {
            warn!(event = "hub_hello_error");
            let _ = ws.close(None).await;
            continue;
        }

        loop {
            tokio::select! {
                incoming = ws.next() => {
                    match incoming {
                        Some(Ok(Message::Text(text))) => {
                            dispatch_incoming(&text, &subscribers);
                        }
                        Some(Ok(Message::Close(_))) | None => break,
                        Some(Ok(_)) => {}
                        Some(Err(err)) => {
                            warn!(event = "hub_read_error", error = %err);
                            break;
                        }
                    }
                }
                outgoing = out_rx.recv() => {
                    match outgoing {
                        Some(envelope) => {
                            let text = match serde_json::to_string(&envelope) {
                                Ok(text) => text,
                                Err(err) => {
                                    warn!(event = "remote_write_error", error = %err);
                                    continue;
                                }
                            };
                            if ws.send(Message::Text(text)).await.is_err() {
                                warn!(event = "remote_write_error", error = "send failed");
                                break;
                            }
                        }
                        None => {
                            let _ = ws.close(None).await;
                            return;
                        }
                    }
                }
            }
        }
        let _ = ws.close(None).await;
    }
}

fn dispatch_incoming(text: &str, subscribers: &SubscriberMap) {
    let envelope: SyncEnvelope = match serde_json::from_str(text) {
        Ok(value) => value,
        Err(err) => {
            warn!(event = "feed_message_invalid", error = %err);
            return;
        }
    };
    if let Err(err) = validate_envelope(&envelope) {
        warn!(event = "feed_message_invalid", error = err);
        return;
    }
    if envelope.r#type != "replace" {
        debug!(event = "feed_message_ignored", r#type = %envelope.r#type);
        return;
    }
    let mut subscribers = subscribers.lock().unwrap();
    if let Some(senders) = subscribers.get_mut(&envelope.path) {
        senders.retain(|sender| sender.send(envelope.body.clone()).is_ok());
    }
}

fn next_backoff(current: Duration) -> Duration {
    (current * 2).min(Duration::from_secs(30))
}
