use axum::{
    extract::{ws::Message, ws::WebSocket, ws::WebSocketUpgrade, State},
    http::{header, HeaderMap, HeaderValue, StatusCode},
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use clap::Parser;
use futures_util::{SinkExt, StreamExt};
use maq_snapshot::display_date;
use maq_storage::{StatusStore, SNAPSHOT_DOC_PREFIX};
use maq_sync::wire::{validate_envelope, SyncEnvelope};
use serde::Deserialize;
use serde_json::{json, Value};
use std::{
    collections::HashMap,
    fs::OpenOptions,
    io::{self, Write},
    net::SocketAddr,
    path::PathBuf,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc, Mutex,
    },
    time::Duration,
};
use tokio::sync::{mpsc, RwLock};
use tracing::{debug, error, info, warn};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, EnvFilter};

const MAX_ENVELOPE_BYTES: usize = 256 * 1024;
const FCM_BATCH_SIZE: usize = 500;

#[derive(Clone, Debug)]
struct Config {
    addr: String,
    db_path: String,
    fcm_endpoint: String,
    fcm_server_key: String,
    debug: bool,
    write_timeout: Duration,
    log_dir: String,
}

#[derive(Parser, Debug)]
#[command(name = "maq-hub")]
struct Args {
    #[arg(long, default_value = "")]
    addr: String,
    #[arg(long, default_value = "")]
    db: String,
    #[arg(long, default_value = "")]
    fcm_endpoint: String,
    #[arg(long, default_value = "")]
    fcm_server_key: String,
    #[arg(long, default_value_t = false)]
    debug: bool,
    #[arg(long, default_value_t = 2)]
    write_timeout: u64,
    #[arg(long, default_value = "")]
    log_dir: String,
}

#[derive(Debug, Deserialize)]
struct HelloBody {
    client_id: String,
    #[serde(default)]
    paths: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct SendRequest {
    title: String,
    body: String,
}

/// Registration body. Deployed senders wrote `userAgent`; the snake_case
/// spelling is accepted too.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct RegisterTokenRequest {
    token: String,
    #[serde(default, alias = "user_agent")]
    user_agent: Option<String>,
}

/// Outbound push delivery seam. The production impl posts token batches to
/// the FCM endpoint; tests substitute a recorder.
trait PushTransport: Send + Sync {
    fn send_batch(&self, tokens: &[String], title: &str, body: &str);
}

/// Fire-and-forget multicast POST. Delivery errors are logged and dropped;
/// a push failure must never fail the request that triggered it.
struct FcmTransport {
    client: reqwest::Client,
    endpoint: String,
    server_key: String,
}

impl FcmTransport {
    fn new(endpoint: String, server_key: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
            server_key,
        }
    }
}

impl PushTransport for FcmTransport {
    fn send_batch(&self, tokens: &[String], title: &str, body: &str) {
        if self.server_key.trim().is_empty() {
            warn!(event = "fcm_skipped", reason = "no_server_key");
            return;
        }
        let client = self.client.clone();
        let endpoint = self.endpoint.clone();
        let server_key = self.server_key.clone();
        let payload = json!({
            "registration_ids": tokens,
            "notification": { "title": title, "body": body },
        });
        let count = tokens.len();
        tokio::spawn(async move {
            let result = client
                .post(&endpoint)
                .header(header::AUTHORIZATION, format!("key={server_key}"))
                .json(&payload)
                .send()
                .await;
            match result {
                Ok(response) if response.status().is_success() => {
                    info!(event = "fcm_batch_sent", tokens = count);
                }
                Ok(response) => {
                    warn!(event = "fcm_batch_error", status = %response.status());
                }
                Err(err) => {
                    warn!(event = "fcm_batch_error", error = %err);
                }
            }
        });
    }
}

#[derive(Clone)]
struct Client {
    conn_id: String,
    client_id: String,
    paths: Vec<String>,
    sender: mpsc::Sender<Message>,
}

impl Client {
    async fn send_text(&self, data: &[u8]) -> bool {
        let text = match std::str::from_utf8(data) {
            Ok(value) => value.to_string(),
            Err(_) => return false,
        };
        self.sender.send(Message::Text(text)).await.is_ok()
    }

    fn wants(&self, path: &str) -> bool {
        self.paths.is_empty() || self.paths.iter().any(|wanted| wanted == path)
    }
}

struct HubState {
    config: Config,
    conn_counter: AtomicU64,
    clients: RwLock<HashMap<String, Arc<Client>>>,
    store: Mutex<StatusStore>,
    transport: Arc<dyn PushTransport>,
}

impl HubState {
    fn new(config: Config, store: StatusStore, transport: Arc<dyn PushTransport>) -> Self {
        Self {
            config,
            conn_counter: AtomicU64::new(0),
            clients: RwLock::new(HashMap::new()),
            store: Mutex::new(store),
            transport,
        }
    }

    fn next_conn_id(&self) -> String {
        let id = self.conn_counter.fetch_add(1, Ordering::SeqCst) + 1;
        format!("conn-{id}")
    }

    async fn register_client(&self, client: Arc<Client>) {
        self.clients
            .write()
            .await
            .insert(client.conn_id.clone(), client.clone());
        info!(
            event = "client_connected",
            conn_id = %client.conn_id,
            client_id = %client.client_id,
            paths = client.paths.len()
        );
    }

    async fn remove_client(&self, client: &Client, reason: &str) {
        self.clients.write().await.remove(&client.conn_id);
        info!(
            event = "client_disconnected",
            conn_id = %client.conn_id,
            client_id = %client.client_id,
            reason = reason
        );
    }

    fn document(&self, path: &str) -> Option<Value> {
        let store = match self.store.lock() {
            Ok(store) => store,
            Err(_) => return None,
        };
        match store.document(path) {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "store_error", path = path, error = %err);
                None
            }
        }
    }

    fn persist(&self, path: &str, body: &Value) {
        let store = match self.store.lock() {
            Ok(store) => store,
            Err(_) => return,
        };
        if let Err(err) = store.upsert_document(path, body) {
            warn!(event = "store_error", path = path, error = %err);
        }
    }

    /// Replays the stored document for each path a new client subscribed
    /// to, so a reconnect behaves exactly like a fresh subscription.
    async fn send_current_documents(&self, client: &Client) {
        let mut sent = 0usize;
        for path in &client.paths {
            let body = match self.document(path) {
                Some(value) => value,
                None => continue,
            };
            let envelope = SyncEnvelope::replace("maq-hub", path, body);
            let data = match serde_json::to_vec(&envelope) {
                Ok(value) => value,
                Err(_) => continue,
            };
            if !client.send_text(&data).await {
                warn!(event = "snapshot_error", conn_id = %client.conn_id);
                self.remove_client(client, "snapshot_error").await;
                return;
            }
            sent += 1;
        }
        info!(event = "snapshot_sent", conn_id = %client.conn_id, count = sent);
    }

    /// Every client subscribed to the path gets the raw envelope, the
    /// sender included. Senders absorb their own echo locally.
    async fn broadcast(&self, path: &str, raw: &[u8]) {
        let clients: Vec<Arc<Client>> = self.clients.read().await.values().cloned().collect();
        for client in clients {
            if !client.wants(path) {
                continue;
            }
            if !client.send_text(raw).await {
                warn!(event = "send_error", conn_id = %client.conn_id);
                self.remove_client(&client, "send_error").await;
            }
        }
    }

    async fn handle_message(&self, client: &Client, envelope: &SyncEnvelope, raw: &[u8]) {
        match envelope.r#type.as_str() {
            "replace" => {
                self.persist(&envelope.path, &envelope.body);
                info!(
                    event = "document_replaced",
                    path = %envelope.path,
                    sender = %envelope.sender_id
                );
                self.broadcast(&envelope.path, raw).await;
            }
            "hello" => {
                warn!(event = "unexpected_hello", conn_id = %client.conn_id);
            }
            other => {
                warn!(event = "unknown_message", conn_id = %client.conn_id, r#type = other);
            }
        }
    }

    async fn handle_socket(self: Arc<Self>, socket: WebSocket) {
        let (mut ws_sender, mut ws_receiver) = socket.split();
        let (tx, mut rx) = mpsc::channel::<Message>(256);
        let write_timeout = self.config.write_timeout;
        let write_task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                let send = ws_sender.send(msg);
                if tokio::time::timeout(write_timeout, send).await.is_err() {
                    return;
                }
            }
        });

        let first = match ws_receiver.next().await {
            Some(Ok(msg)) => msg,
            _ => return,
        };
        let data = match message_bytes(first) {
            Some(bytes) => bytes,
            None => return,
        };
        if data.len() > MAX_ENVELOPE_BYTES {
            warn!(event = "hello_too_large", size = data.len());
            return;
        }
        let envelope: SyncEnvelope = match serde_json::from_slice(&data) {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "hello_parse", error = %err);
                return;
            }
        };
        if let Err(err) = validate_envelope(&envelope) {
            warn!(event = "hello_envelope", error = err);
            return;
        }
        if envelope.r#type != "hello" {
            warn!(event = "expected_hello", got = %envelope.r#type);
            return;
        }
        let hello: HelloBody = match serde_json::from_value(envelope.body.clone()) {
            Ok(value) => value,
            Err(err) => {
                warn!(event = "hello_body", error = %err);
                return;
            }
        };
        if hello.client_id.is_empty() || hello.client_id != envelope.sender_id {
            warn!(event = "client_id_mismatch", sender = %envelope.sender_id);
            return;
        }

        let client = Arc::new(Client {
            conn_id: self.next_conn_id(),
            client_id: hello.client_id,
            paths: hello.paths,
            sender: tx.clone(),
        });
        self.register_client(client.clone()).await;
        self.send_current_documents(&client).await;

        while let Some(result) = ws_receiver.next().await {
            let msg = match result {
                Ok(value) => value,
                Err(err) => {
                    warn!(event = "read_error", conn_id = %client.conn_id, error = %err);
                    break;
                }
            };
            let data = match msg {
                Message::Text(text) => text.into_bytes(),
                Message::Binary(bytes) => bytes,
                Message::Close(_) => {
                    info!(event = "client_close", conn_id = %client.conn_id);
                    break;
                }
                Message::Ping(_) | Message::Pong(_) => continue,
            };
            if data.len() > MAX_ENVELOPE_BYTES {
                warn!(event = "message_too_large", conn_id = %client.conn_id, size = data.len());
                continue;
            }
            if self.config.debug {
                debug!(event = "message_received", conn_id = %client.conn_id, raw = %String::from_utf8_lossy(&data));
            }
            let envelope: SyncEnvelope = match serde_json::from_slice(&data) {
                Ok(value) => value,
                Err(err) => {
                    warn!(event = "message_invalid", conn_id = %client.conn_id, error = %err);
                    continue;
                }
            };
            if let Err(err) = validate_envelope(&envelope) {
                warn!(event = "message_invalid", conn_id = %client.conn_id, error = err);
                continue;
            }
            self.handle_message(&client, &envelope, &data).await;
        }

        self.remove_client(&client, "disconnect").await;
        drop(tx);
        let _ = write_task.await;
    }

    fn fan_out(&self, title: &str, body: &str) -> (usize, usize) {
        let tokens = {
            let store = match self.store.lock() {
                Ok(store) => store,
                Err(_) => return (0, 0),
            };
            match store.tokens() {
                Ok(tokens) => tokens,
                Err(err) => {
                    warn!(event = "store_error", error = %err);
                    return (0, 0);
                }
            }
        };
        if tokens.is_empty() {
            return (0, 0);
        }
        let mut batches = 0usize;
        for chunk in tokens.chunks(FCM_BATCH_SIZE) {
            self.transport.send_batch(chunk, title, body);
            batches += 1;
        }
        (tokens.len(), batches)
    }
}

#[tokio::main]
async fn main() {
    let config = load_config();
    let _log_guard = init_logging(&config);
    let addr: SocketAddr = match config.addr.parse() {
        Ok(value) => value,
        Err(err) => {
            error!(event = "invalid_addr", error = %err, addr = %config.addr);
            return;
        }
    };

    let store = match open_store(&config.db_path) {
        Ok(store) => store,
        Err(err) => {
            error!(event = "store_open_error", error = %err, path = %config.db_path);
            return;
        }
    };

    let transport = Arc::new(FcmTransport::new(
        config.fcm_endpoint.clone(),
        config.fcm_server_key.clone(),
    ));
    let hub = Arc::new(HubState::new(config.clone(), store, transport));

    let app = Router::new()
        .route("/ws", get(ws_handler))
        .route("/health", get(|| async { "ok" }))
        .route("/api/send-fcm", post(send_fcm))
        .route(
            "/api/send-fcm-external",
            post(send_fcm_external).options(send_fcm_preflight),
        )
        .route("/api/register-token", post(register_token))
        .route("/api/snapshots", get(list_snapshots))
        .with_state(hub.clone());

    let listener = match tokio::net::TcpListener::bind(addr).await {
        Ok(value) => value,
        Err(err) => {
            error!(event = "hub_error", error = %err);
            return;
        }
    };

    info!(event = "hub_start", addr = %config.addr, db = %config.db_path);

    let shutdown = async {
        let _ = tokio::signal::ctrl_c().await;
    };

    if let Err(err) = axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await
    {
        error!(event = "hub_error", error = %err);
    }
}

fn open_store(path: &str) -> Result<StatusStore, maq_storage::StorageError> {
    if let Some(parent) = PathBuf::from(path).parent() {
        let _ = std::fs::create_dir_all(parent);
    }
    StatusStore::open(path)
}

async fn ws_handler(ws: WebSocketUpgrade, State(hub): State<Arc<HubState>>) -> impl IntoResponse {
    ws.on_upgrade(move |socket| async move {
        hub.handle_socket(socket).await;
    })
}

async fn send_fcm(
    State(hub): State<Arc<HubState>>,
    Json(request): Json<SendRequest>,
) -> impl IntoResponse {
    let (tokens, batches) = hub.fan_out(&request.title, &request.body);
    if tokens == 0 {
        return Json(json!({
            "success": false,
            "message": "no registered tokens",
        }));
    }
    info!(event = "fcm_fan_out", tokens = tokens, batches = batches);
    Json(json!({ "success": true, "tokens": tokens, "batches": batches }))
}

/// Variant of the fan-out endpoint reachable from other origins. CORS
/// headers are set by hand; the browser sends a preflight OPTIONS first.
async fn send_fcm_external(
    State(hub): State<Arc<HubState>>,
    Json(request): Json<SendRequest>,
) -> impl IntoResponse {
    let (tokens, batches) = hub.fan_out(&request.title, &request.body);
    info!(event = "fcm_fan_out_external", tokens = tokens, batches = batches);
    (cors_headers(), Json(json!({ "ok": true, "tokens": tokens })))
}

async fn send_fcm_preflight() -> impl IntoResponse {
    (StatusCode::OK, cors_headers())
}

fn cors_headers() -> HeaderMap {
    let mut headers = HeaderMap::new();
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_ORIGIN,
        HeaderValue::from_static("*"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_METHODS,
        HeaderValue::from_static("POST, OPTIONS"),
    );
    headers.insert(
        header::ACCESS_CONTROL_ALLOW_HEADERS,
        HeaderValue::from_static("Content-Type"),
    );
    headers
}

async fn register_token(
    State(hub): State<Arc<HubState>>,
    Json(request): Json<RegisterTokenRequest>,
) -> impl IntoResponse {
    let token = request.token.trim();
    if token.is_empty() {
        return (
            StatusCode::BAD_REQUEST,
            Json(json!({ "ok": false, "message": "empty token" })),
        );
    }
    let result = {
        let store = match hub.store.lock() {
            Ok(store) => store,
            Err(_) => {
                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "ok": false })),
                )
            }
        };
        store.register_token(token, request.user_agent.as_deref())
    };
    match result {
        Ok(()) => {
            info!(event = "token_registered");
            (StatusCode::OK, Json(json!({ "ok": true })))
        }
        Err(err) => {
            warn!(event = "store_error", error = %err);
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(json!({ "ok": false })),
            )
        }
    }
}

/// Recorded snapshot keys, newest first, with a short display date for
/// listings.
async fn list_snapshots(State(hub): State<Arc<HubState>>) -> impl IntoResponse {
    let documents = {
        let store = match hub.store.lock() {
            Ok(store) => store,
            Err(_) => return Json(Value::Array(Vec::new())),
        };
        match store.documents_with_prefix(SNAPSHOT_DOC_PREFIX) {
            Ok(documents) => documents,
            Err(err) => {
                warn!(event = "store_error", error = %err);
                return Json(Value::Array(Vec::new()));
            }
        }
    };
    let listing: Vec<Value> = documents
        .iter()
        .filter_map(|(path, _)| path.strip_prefix(SNAPSHOT_DOC_PREFIX))
        .map(|key| {
            json!({
                "key": key,
                "date": display_date(key),
            })
        })
        .collect();
    Json(Value::Array(listing))
}

fn load_config() -> Config {
    let args = Args::parse();
    Config {
        addr: resolve_setting(&args.addr, "MAQ_HUB_ADDR", "0.0.0.0:8600"),
        db_path: resolve_setting(&args.db, "MAQ_DB_PATH", ".maquinas/board.db"),
        fcm_endpoint: resolve_setting(
            &args.fcm_endpoint,
            "MAQ_FCM_ENDPOINT",
            "https://fcm.googleapis.com/fcm/send",
        ),
        fcm_server_key: resolve_setting(&args.fcm_server_key, "MAQ_FCM_SERVER_KEY", ""),
        debug: args.debug || env_true("MAQ_HUB_DEBUG"),
        write_timeout: Duration::from_secs(args.write_timeout),
        log_dir: resolve_setting(&args.log_dir, "MAQ_LOG_DIR", ".maquinas/logs"),
    }
}

fn resolve_setting(flag: &str, env_key: &str, default: &str) -> String {
    if !flag.trim().is_empty() {
        return flag.to_string();
    }
    if let Ok(value) = std::env::var(env_key) {
        if !value.trim().is_empty() {
            return value;
        }
    }
    default.to_string()
}

fn env_true(key: &str) -> bool {
    match std::env::var(key) {
        Ok(value) => matches!(
            value.trim().to_lowercase().as_str(),
            "1" | "true" | "yes" | "on"
        ),
        Err(_) => false,
    }
}

fn init_logging(config: &Config) -> Option<LogGuard> {
    let level = if config.debug {
        "debug".to_string()
    } else if let Ok(level) = std::env::var("MAQ_LOG_LEVEL") {
        level
    } else {
        "info".to_string()
    };

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    let writer = match open_log_file(&config.log_dir) {
        Ok(log_guard) => log_guard,
        Err(err) => {
            eprintln!("log_file_error: {err}");
            LogGuard { file: None }
        }
    };
    let file = writer.file.clone();
    let make_writer = BoxMakeWriter::new(move || MultiWriter::new(file.clone()));
    let subscriber = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(make_writer)
        .finish();
    if tracing::subscriber::set_global_default(subscriber).is_err() {
        return None;
    }
    Some(writer)
}

struct LogGuard {
    file: Option<Arc<Mutex<std::fs::File>>>,
}

struct MultiWriter {
    stdout: io::Stdout,
    file: Option<Arc<Mutex<std::fs::File>>>,
}

impl MultiWriter {
    fn new(file: Option<Arc<Mutex<std::fs::File>>>) -> Self {
        Self {
            stdout: io::stdout(),
            file,
        }
    }
}

impl Write for MultiWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let _ = self.stdout.write_all(buf);
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap();
            let _ = file.write_all(buf);
        }
        Ok(buf.len())
    }

    fn flush(&mut self) -> io::Result<()> {
        let _ = self.stdout.flush();
        if let Some(file) = &self.file {
            let mut file = file.lock().unwrap();
            let _ = file.flush();
        }
        Ok(())
    }
}

fn open_log_file(log_dir: &str) -> io::Result<LogGuard> {
    if log_dir.trim().is_empty() {
        return Ok(LogGuard { file: None });
    }
    let dir = PathBuf::from(log_dir);
    if std::fs::create_dir_all(&dir).is_err() {
        return Ok(LogGuard { file: None });
    }
    let path = dir.join("maq-hub.log");
    let file = OpenOptions::new().create(true).append(true).open(path)?;
    Ok(LogGuard {
        file: Some(Arc::new(Mutex::new(file))),
    })
}

fn message_bytes(msg: Message) -> Option<Vec<u8>> {
    match msg {
        Message::Text(text) => Some(text.into_bytes()),
        Message::Binary(bytes) => Some(bytes),
        Message::Close(_) => None,
        Message::Ping(_) => None,
        Message::Pong(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex as StdMutex;

    #[derive(Default)]
    struct RecordingTransport {
        batches: StdMutex<Vec<usize>>,
    }

    impl PushTransport for RecordingTransport {
        fn send_batch(&self, tokens: &[String], _title: &str, _body: &str) {
            self.batches.lock().unwrap().push(tokens.len());
        }
    }

    fn test_hub(transport: Arc<dyn PushTransport>) -> HubState {
        let store = StatusStore::open_in_memory().unwrap();
        let config = Config {
            addr: "127.0.0.1:0".to_string(),
            db_path: ":memory:".to_string(),
            fcm_endpoint: String::new(),
            fcm_server_key: String::new(),
            debug: false,
            write_timeout: Duration::from_secs(2),
            log_dir: String::new(),
        };
        HubState::new(config, store, transport)
    }

    #[test]
    fn fan_out_batches_tokens_in_chunks() {
        let transport = Arc::new(RecordingTransport::default());
        let hub = test_hub(transport.clone());
        {
            let store = hub.store.lock().unwrap();
            for index in 0..(FCM_BATCH_SIZE + 3) {
                store.register_token(&format!("tok-{index:04}"), None).unwrap();
            }
        }
        let (tokens, batches) = hub.fan_out("Máquina S1", "Mecánico - Aguja");
        assert_eq!(tokens, FCM_BATCH_SIZE + 3);
        assert_eq!(batches, 2);
        assert_eq!(*transport.batches.lock().unwrap(), vec![FCM_BATCH_SIZE, 3]);
    }

    #[test]
    fn fan_out_without_tokens_is_empty() {
        let transport = Arc::new(RecordingTransport::default());
        let hub = test_hub(transport.clone());
        let (tokens, batches) = hub.fan_out("Máquina S1", "Mecánico");
        assert_eq!((tokens, batches), (0, 0));
        assert!(transport.batches.lock().unwrap().is_empty());
    }

    #[test]
    fn client_path_filter_matches_subscriptions() {
        let (tx, _rx) = mpsc::channel(1);
        let client = Client {
            conn_id: "conn-1".to_string(),
            client_id: "board-1".to_string(),
            paths: vec!["imgStates".to_string()],
            sender: tx.clone(),
        };
        assert!(client.wants("imgStates"));
        assert!(!client.wants("snapshots/20260314_190000"));

        let all = Client {
            conn_id: "conn-2".to_string(),
            client_id: "viewer".to_string(),
            paths: Vec::new(),
            sender: tx,
        };
        assert!(all.wants("imgStates"));
    }

    #[test]
    fn token_registration_accepts_both_agent_spellings() {
        let camel: RegisterTokenRequest =
            serde_json::from_value(json!({ "token": "tok-1", "userAgent": "Safari iPhone" }))
                .unwrap();
        assert_eq!(camel.user_agent.as_deref(), Some("Safari iPhone"));

        let snake: RegisterTokenRequest =
            serde_json::from_value(json!({ "token": "tok-1", "user_agent": "Firefox" })).unwrap();
        assert_eq!(snake.user_agent.as_deref(), Some("Firefox"));

        let bare: RegisterTokenRequest =
            serde_json::from_value(json!({ "token": "tok-2" })).unwrap();
        assert!(bare.user_agent.is_none());
    }

    #[test]
    fn settings_resolve_flag_env_default_in_order() {
        assert_eq!(resolve_setting("1.2.3.4:9", "MAQ_TEST_UNSET", "d"), "1.2.3.4:9");
        assert_eq!(resolve_setting("", "MAQ_TEST_UNSET", "d"), "d");
    }
}
