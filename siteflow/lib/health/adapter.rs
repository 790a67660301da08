use std::{
    collections::{BTreeMap, HashMap},
    sync::{Arc, RwLock as StdRwLock},
    time::Duration,
};

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use tokio::sync::{mpsc, oneshot};
use tokio_tungstenite::{connect_async, tungstenite::Message};
use tokio_util::sync::CancellationToken;

use crate::{config::UptimeConfig, SiteflowError, SiteflowResult};

//--------------------------------------------------------------------------------------------------
// Constants
//--------------------------------------------------------------------------------------------------

/// Heartbeat status values on the wire.
pub const HEARTBEAT_DOWN: u8 = 0;
/// Monitor responded.
pub const HEARTBEAT_UP: u8 = 1;
/// Monitor has not been probed yet.
pub const HEARTBEAT_PENDING: u8 = 2;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);
const CALL_TIMEOUT: Duration = Duration::from_secs(10);
const RECONNECT_INITIAL: Duration = Duration::from_secs(1);
const RECONNECT_MAX: Duration = Duration::from_secs(30);
const COMMAND_CHANNEL_CAPACITY: usize = 16;

//--------------------------------------------------------------------------------------------------
// Types
//--------------------------------------------------------------------------------------------------

/// One heartbeat sample.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatEntry {
    /// 0 = down, 1 = up, 2 = pending.
    pub status: u8,
    /// Sample time as reported by the service.
    #[serde(default)]
    pub time: String,
    /// Probe latency in milliseconds.
    #[serde(default)]
    pub ping: Option<i64>,
}

/// Projected status of one monitor.
#[derive(Debug, Clone, Serialize)]
pub struct MonitorStatus {
    /// Whether the latest heartbeat was up.
    pub up: bool,
    /// Latest probe latency.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub ping: Option<i64>,
    /// Percentage of up samples over the heartbeat window.
    pub uptime: f64,
    /// The last N heartbeats, oldest first.
    pub heartbeats: Vec<HeartbeatEntry>,
}

/// Operations siteflow needs from the uptime monitor service.
#[async_trait]
pub trait UptimeService: Send + Sync {
    /// Projected status per monitor name. Empty while disconnected.
    async fn list_monitors(&self) -> BTreeMap<String, MonitorStatus>;

    /// Creates an HTTP monitor probing `url`.
    async fn create_monitor(&self, name: &str, url: &str) -> SiteflowResult<()>;

    /// Deletes the monitor named `name`. Missing monitors map to
    /// `NotFound`, which deprovisioning treats as success.
    async fn delete_monitor(&self, name: &str) -> SiteflowResult<()>;

    /// Whether the adapter currently holds an authenticated connection.
    fn connected(&self) -> bool;
}

/// The WebSocket-backed adapter.
///
/// A background task owns the connection: it logs in, consumes pushed
/// `monitorList`/`heartbeatList` events into shared state and executes
/// calls sent over the command channel. On any failure it reconnects with
/// exponential backoff and re-authenticates.
pub struct UptimeAdapter {
    state: Arc<StdRwLock<AdapterState>>,
    commands: Option<mpsc::Sender<AdapterCall>>,
    heartbeat_window: usize,
    cancel: CancellationToken,
}

#[derive(Default)]
struct AdapterState {
    connected: bool,
    monitors: HashMap<i64, String>,
    heartbeats: HashMap<i64, Vec<HeartbeatEntry>>,
}

struct AdapterCall {
    event: &'static str,
    data: Value,
    reply: oneshot::Sender<SiteflowResult<Value>>,
}

#[derive(Debug, Deserialize)]
struct Frame {
    event: String,
    #[serde(default)]
    data: Value,
}

//--------------------------------------------------------------------------------------------------
// Methods
//--------------------------------------------------------------------------------------------------

impl UptimeAdapter {
    /// Spawns the adapter. With no URL configured the adapter is inert:
    /// listings are empty and mutations are logged no-ops.
    pub fn spawn(config: UptimeConfig, cancel: CancellationToken) -> Self {
        let state = Arc::new(StdRwLock::new(AdapterState::default()));
        let heartbeat_window = config.heartbeat_window;

        let Some(url) = config.url.clone() else {
            tracing::info!("uptime monitor not configured, health adapter inert");
            return Self {
                state,
                commands: None,
                heartbeat_window,
                cancel,
            };
        };

        let (tx, rx) = mpsc::channel(COMMAND_CHANNEL_CAPACITY);
        let task_state = state.clone();
        let task_cancel = cancel.clone();
        tokio::spawn(async move {
            connection_loop(url, config, task_state, rx, task_cancel).await;
        });

        Self {
            state,
            commands: Some(tx),
            heartbeat_window,
            cancel,
        }
    }

    /// Stops the background task.
    pub fn shutdown(&self) {
        self.cancel.cancel();
    }

    async fn call(&self, event: &'static str, data: Value) -> SiteflowResult<Value> {
        let Some(commands) = &self.commands else {
            tracing::debug!(event, "uptime monitor not configured, skipping call");
            return Ok(Value::Null);
        };
        let (reply_tx, reply_rx) = oneshot::channel();
        commands
            .send(AdapterCall {
                event,
                data,
                reply: reply_tx,
            })
            .await
            .map_err(|_| SiteflowError::Transport("uptime adapter stopped".to_string()))?;
        reply_rx
            .await
            .map_err(|_| SiteflowError::Transport("uptime adapter dropped the call".to_string()))?
    }

    fn monitor_id_by_name(&self, name: &str) -> Option<i64> {
        let state = self.state.read().expect("uptime state poisoned");
        state
            .monitors
            .iter()
            .find(|(_, monitor_name)| monitor_name.as_str() == name)
            .map(|(id, _)| *id)
    }
}

//--------------------------------------------------------------------------------------------------
// Trait Implementations
//--------------------------------------------------------------------------------------------------

#[async_trait]
impl UptimeService for UptimeAdapter {
    async fn list_monitors(&self) -> BTreeMap<String, MonitorStatus> {
        let state = self.state.read().expect("uptime state poisoned");
        if !state.connected {
            return BTreeMap::new();
        }

        let mut monitors = BTreeMap::new();
        for (id, name) in &state.monitors {
            let heartbeats = state.heartbeats.get(id).cloned().unwrap_or_default();
            let window_start = heartbeats.len().saturating_sub(self.heartbeat_window);
            let window = &heartbeats[window_start..];

            let latest = window.last();
            let up_count = window.iter().filter(|hb| hb.status == HEARTBEAT_UP).count();
            let uptime = if window.is_empty() {
                0.0
            } else {
                (up_count as f64 / window.len() as f64 * 1000.0).round() / 10.0
            };

            monitors.insert(
                name.clone(),
                MonitorStatus {
                    up: latest.map(|hb| hb.status == HEARTBEAT_UP).unwrap_or(false),
                    ping: latest.and_then(|hb| hb.ping),
                    uptime,
                    heartbeats: window.to_vec(),
                },
            );
        }
        monitors
    }

    async fn create_monitor(&self, name: &str, url: &str) -> SiteflowResult<()> {
        let result = self
            .call(
                "add",
                json!({
                    "type": "http",
                    "name": name,
                    "url": url,
                    "method": "GET",
                    "interval": 60,
                    "retryInterval": 60,
                    "maxretries": 3,
                    "timeout": 30,
                    "active": true,
                    "accepted_statuscodes": ["200-299", "301", "302"],
                }),
            )
            .await?;
        if result.is_null() {
            return Ok(());
        }
        if result.get("ok").and_then(Value::as_bool) != Some(true) {
            return Err(SiteflowError::Transport(format!(
                "monitor service rejected create: {}",
                result.get("msg").and_then(Value::as_str).unwrap_or("unknown")
            )));
        }
        tracing::info!(name, url, "created uptime monitor");
        Ok(())
    }

    async fn delete_monitor(&self, name: &str) -> SiteflowResult<()> {
        if self.commands.is_none() {
            return Ok(());
        }
        let Some(id) = self.monitor_id_by_name(name) else {
            return Err(SiteflowError::NotFound(format!("monitor '{name}'")));
        };
        let result = self.call("deleteMonitor", json!({ "id": id })).await?;
        if result.get("ok").and_then(Value::as_bool) != Some(true) {
            return Err(SiteflowError::Transport(format!(
                "monitor service rejected delete: {}",
                result.get("msg").and_then(Value::as_str).unwrap_or("unknown")
            )));
        }
        tracing::info!(name, "deleted uptime monitor");
        Ok(())
    }

    fn connected(&self) -> bool {
        self.state.read().expect("uptime state poisoned").connected
    }
}

//--------------------------------------------------------------------------------------------------
// Functions
//--------------------------------------------------------------------------------------------------

async fn connection_loop(
    url: String,
    config: UptimeConfig,
    state: Arc<StdRwLock<AdapterState>>,
    mut commands: mpsc::Receiver<AdapterCall>,
    cancel: CancellationToken,
) {
    let mut backoff = RECONNECT_INITIAL;

    loop {
        if cancel.is_cancelled() {
            break;
        }

        match run_connection(&url, &config, &state, &mut commands, &cancel).await {
            Result::Ok(()) => break,
            Result::Err(e) => {
                tracing::warn!(error = %e, "uptime monitor connection lost, reconnecting");
            }
        }

        {
            let mut state = state.write().expect("uptime state poisoned");
            state.connected = false;
            state.monitors.clear();
            state.heartbeats.clear();
        }

        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = tokio::time::sleep(backoff) => {}
        }
        backoff = (backoff * 2).min(RECONNECT_MAX);
    }

    let mut state = state.write().expect("uptime state poisoned");
    state.connected = false;
}

/// Runs one authenticated connection until it fails or shutdown. Returns
/// `Ok` only on shutdown.
async fn run_connection(
    url: &str,
    config: &UptimeConfig,
    state: &Arc<StdRwLock<AdapterState>>,
    commands: &mut mpsc::Receiver<AdapterCall>,
    cancel: &CancellationToken,
) -> SiteflowResult<()> {
    let (mut socket, _) = tokio::time::timeout(CONNECT_TIMEOUT, connect_async(url))
        .await
        .map_err(|_| SiteflowError::Timeout(CONNECT_TIMEOUT.as_secs(), "ws connect".to_string()))?
        .map_err(|e| SiteflowError::Transport(format!("ws connect failed: {e}")))?;

    // Authenticate before anything else; the service pushes monitorList
    // after a successful login.
    let login = json!({
        "event": "login",
        "data": {
            "username": config.username.clone().unwrap_or_default(),
            "password": config.password.clone().unwrap_or_default(),
            "token": "",
        },
    });
    socket
        .send(Message::Text(login.to_string()))
        .await
        .map_err(|e| SiteflowError::Transport(format!("ws send failed: {e}")))?;

    let login_result = wait_for_event(&mut socket, "loginResult", state).await?;
    if login_result.get("ok").and_then(Value::as_bool) != Some(true) {
        return Err(SiteflowError::Transport(format!(
            "uptime monitor login failed: {}",
            login_result.get("msg").and_then(Value::as_str).unwrap_or("unknown")
        )));
    }

    state.write().expect("uptime state poisoned").connected = true;
    tracing::info!("uptime monitor session established");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => {
                let _ = socket.send(Message::Close(None)).await;
                return Ok(());
            }

            call = commands.recv() => {
                let Some(call) = call else {
                    return Ok(());
                };
                let frame = json!({"event": call.event, "data": call.data});
                if let Result::Err(e) = socket.send(Message::Text(frame.to_string())).await {
                    let _ = call.reply.send(Err(SiteflowError::Transport(format!(
                        "ws send failed: {e}"
                    ))));
                    return Err(SiteflowError::Transport(format!("ws send failed: {e}")));
                }
                let reply_event = format!("{}Result", call.event);
                let result = tokio::time::timeout(
                    CALL_TIMEOUT,
                    wait_for_event(&mut socket, &reply_event, state),
                )
                .await
                .map_err(|_| SiteflowError::Timeout(CALL_TIMEOUT.as_secs(), call.event.to_string()))
                .and_then(|inner| inner);
                let failed = result.is_err();
                let _ = call.reply.send(result);
                if failed {
                    return Err(SiteflowError::Transport("call failed".to_string()));
                }
            }

            message = socket.next() => {
                match message {
                    Some(Result::Ok(Message::Text(raw))) => handle_frame(&raw, state),
                    Some(Result::Ok(Message::Ping(payload))) => {
                        socket
                            .send(Message::Pong(payload))
                            .await
                            .map_err(|e| SiteflowError::Transport(format!("ws pong failed: {e}")))?;
                    }
                    Some(Result::Ok(Message::Close(_))) | None => {
                        return Err(SiteflowError::Transport("uptime monitor closed".to_string()));
                    }
                    Some(Result::Ok(_)) => {}
                    Some(Result::Err(e)) => {
                        return Err(SiteflowError::Transport(format!("ws receive failed: {e}")));
                    }
                }
            }
        }
    }
}

/// Reads frames until `event` arrives, folding pushed state frames into the
/// shared cache along the way.
async fn wait_for_event(
    socket: &mut (impl futures_util::Stream<Item = Result<Message, tokio_tungstenite::tungstenite::Error>>
              + Unpin),
    event: &str,
    state: &Arc<StdRwLock<AdapterState>>,
) -> SiteflowResult<Value> {
    loop {
        let message = socket
            .next()
            .await
            .ok_or_else(|| SiteflowError::Transport("uptime monitor closed".to_string()))?
            .map_err(|e| SiteflowError::Transport(format!("ws receive failed: {e}")))?;
        let Message::Text(raw) = message else {
            continue;
        };
        let Result::Ok(frame) = serde_json::from_str::<Frame>(&raw) else {
            continue;
        };
        if frame.event == event {
            return Ok(frame.data);
        }
        apply_frame(&frame, state);
    }
}

fn handle_frame(raw: &str, state: &Arc<StdRwLock<AdapterState>>) {
    if let Result::Ok(frame) = serde_json::from_str::<Frame>(raw) {
        apply_frame(&frame, state);
    }
}

fn apply_frame(frame: &Frame, state: &Arc<StdRwLock<AdapterState>>) {
    match frame.event.as_str() {
        "monitorList" => {
            let Some(map) = frame.data.as_object() else {
                return;
            };
            let mut monitors = HashMap::new();
            for monitor in map.values() {
                let (Some(id), Some(name)) = (
                    monitor.get("id").and_then(Value::as_i64),
                    monitor.get("name").and_then(Value::as_str),
                ) else {
                    continue;
                };
                monitors.insert(id, name.to_string());
            }
            let mut state = state.write().expect("uptime state poisoned");
            state.heartbeats.retain(|id, _| monitors.contains_key(id));
            state.monitors = monitors;
        }
        "heartbeatList" => {
            let Some(id) = frame.data.get("monitor_id").and_then(Value::as_i64) else {
                return;
            };
            let Some(entries) = frame.data.get("heartbeats") else {
                return;
            };
            let Result::Ok(heartbeats) =
                serde_json::from_value::<Vec<HeartbeatEntry>>(entries.clone())
            else {
                return;
            };
            let mut state = state.write().expect("uptime state poisoned");
            state.heartbeats.insert(id, heartbeats);
        }
        _ => {}
    }
}

//--------------------------------------------------------------------------------------------------
// Tests
//--------------------------------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    fn frame(event: &str, data: Value) -> Frame {
        Frame {
            event: event.to_string(),
            data,
        }
    }

    fn seeded_state() -> Arc<StdRwLock<AdapterState>> {
        let state = Arc::new(StdRwLock::new(AdapterState::default()));
        apply_frame(
            &frame(
                "monitorList",
                json!({"1": {"id": 1, "name": "blog"}, "2": {"id": 2, "name": "shop"}}),
            ),
            &state,
        );
        apply_frame(
            &frame(
                "heartbeatList",
                json!({"monitor_id": 1, "heartbeats": [
                    {"status": 1, "time": "t1", "ping": 20},
                    {"status": 0, "time": "t2", "ping": null},
                    {"status": 1, "time": "t3", "ping": 25},
                    {"status": 1, "time": "t4", "ping": 22},
                ]}),
            ),
            &state,
        );
        state
    }

    fn adapter_over(state: Arc<StdRwLock<AdapterState>>, window: usize) -> UptimeAdapter {
        UptimeAdapter {
            state,
            commands: None,
            heartbeat_window: window,
            cancel: CancellationToken::new(),
        }
    }

    #[tokio::test]
    async fn test_list_monitors_projects_uptime() {
        let state = seeded_state();
        state.write().unwrap().connected = true;
        let adapter = adapter_over(state, 30);

        let monitors = adapter.list_monitors().await;
        assert_eq!(monitors.len(), 2);

        let blog = &monitors["blog"];
        assert!(blog.up);
        assert_eq!(blog.ping, Some(22));
        assert!((blog.uptime - 75.0).abs() < 0.01);
        assert_eq!(blog.heartbeats.len(), 4);

        // No heartbeats yet: down with zero uptime, not an error.
        let shop = &monitors["shop"];
        assert!(!shop.up);
        assert_eq!(shop.uptime, 0.0);
    }

    #[tokio::test]
    async fn test_disconnected_lists_empty() {
        let state = seeded_state();
        let adapter = adapter_over(state, 30);
        assert!(adapter.list_monitors().await.is_empty());
        assert!(!adapter.connected());
    }

    #[tokio::test]
    async fn test_heartbeat_window_truncates() {
        let state = seeded_state();
        state.write().unwrap().connected = true;
        // Window smaller than history: only the last 2 samples count.
        let adapter = adapter_over(state, 2);
        // Validation floor is 30 in config; the cache itself honors any
        // window handed to it.
        let monitors = adapter.list_monitors().await;
        let blog = &monitors["blog"];
        assert_eq!(blog.heartbeats.len(), 2);
        assert!((blog.uptime - 100.0).abs() < 0.01);
    }

    #[tokio::test]
    async fn test_inert_adapter_is_quiet() {
        let adapter = UptimeAdapter::spawn(UptimeConfig::default(), CancellationToken::new());
        assert!(adapter.list_monitors().await.is_empty());
        adapter.create_monitor("blog", "https://blog.example.com").await.unwrap();
        adapter.delete_monitor("blog").await.unwrap();
    }

    #[tokio::test]
    async fn test_monitor_list_prunes_stale_heartbeats() {
        let state = seeded_state();
        apply_frame(
            &frame("monitorList", json!({"2": {"id": 2, "name": "shop"}})),
            &state,
        );
        let guard = state.read().unwrap();
        assert!(!guard.heartbeats.contains_key(&1));
        assert_eq!(guard.monitors.len(), 1);
    }
}
