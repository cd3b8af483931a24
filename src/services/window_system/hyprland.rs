use crate::error::{Result, SwallowError};
use crate::events::{WindowEvent, WindowHandle, WindowId};
use crate::swallow_error;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::r#trait::{EventSource, WindowSystem};

/// Пути к сокетам текущего экземпляра Hyprland
#[derive(Debug, Clone)]
pub struct HyprlandSockets {
    pub request: PathBuf,
    pub events: PathBuf,
}

impl HyprlandSockets {
    pub fn from_env() -> Result<Self> {
        let signature = std::env::var("HYPRLAND_INSTANCE_SIGNATURE").map_err(|_| {
            swallow_error!(service_unavailable, "HYPRLAND_INSTANCE_SIGNATURE не задана")
        })?;

        // Новые версии держат сокеты в $XDG_RUNTIME_DIR, старые - в /tmp
        let mut candidates = Vec::new();
        if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
            candidates.push(PathBuf::from(runtime_dir).join("hypr").join(&signature));
        }
        candidates.push(PathBuf::from("/tmp/hypr").join(&signature));

        let dir = candidates
            .into_iter()
            .find(|dir| dir.join(".socket.sock").exists())
            .ok_or_else(|| {
                swallow_error!(service_unavailable, "сокет Hyprland для {} не найден", signature)
            })?;

        Ok(Self {
            request: dir.join(".socket.sock"),
            events: dir.join(".socket2.sock"),
        })
    }
}

#[derive(Debug, Deserialize)]
struct HyprWorkspaceRef {
    id: i64,
    name: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct HyprClient {
    address: String,
    #[serde(default = "default_true")]
    mapped: bool,
    workspace: HyprWorkspaceRef,
    class: String,
    #[serde(default)]
    initial_class: String,
    title: String,
    pid: i64,
}

fn default_true() -> bool {
    true
}

impl HyprClient {
    fn into_handle(self) -> Option<WindowHandle> {
        let id = WindowId::from_hex(&self.address)?;
        let mut handle = WindowHandle::new(id, self.class)
            .with_instance(self.initial_class)
            .with_title(self.title)
            .with_workspace(self.workspace.name);
        // Hyprland сообщает -1 для окон без процесса
        if self.pid > 0 {
            handle = handle.with_pid(self.pid as u32);
        }
        Some(handle)
    }
}

/// Селектор рабочего стола для диспетчеров Hyprland
fn workspace_selector(name: &str) -> String {
    if name.parse::<i64>().is_ok() || name.starts_with("special:") || name.starts_with("name:") {
        name.to_string()
    } else {
        format!("name:{}", name)
    }
}

/// Ответ на диспетчер состоит только из "ok" (по одному на команду пакета)
fn check_reply(reply: &str) -> Result<()> {
    if reply.replace("ok", "").trim().is_empty() {
        Ok(())
    } else {
        Err(swallow_error!(action, "Hyprland: {}", reply.trim()))
    }
}

/// Разобрать строку из `.socket2.sock`
pub fn parse_event_line(line: &str) -> Option<WindowEvent> {
    let (name, data) = line.split_once(">>")?;
    match name {
        "openwindow" => {
            // ADDRESS,WORKSPACE,CLASS,TITLE - заголовок может содержать запятые
            let mut parts = data.splitn(4, ',');
            let id = WindowId::from_hex(parts.next()?)?;
            let _workspace = parts.next()?;
            let class = parts.next()?;
            let title = parts.next().unwrap_or("");
            Some(WindowEvent::created(id, class, title))
        }
        "closewindow" => Some(WindowEvent::closed(WindowId::from_hex(data)?)),
        _ => None,
    }
}

pub struct HyprlandWindowSystem {
    sockets: HyprlandSockets,
    holding: String,
    ipc_timeout: Duration,
}

impl HyprlandWindowSystem {
    pub fn new(sockets: HyprlandSockets, holding_workspace: &str, ipc_timeout: Duration) -> Self {
        Self {
            sockets,
            holding: format!("special:{}", holding_workspace),
            ipc_timeout,
        }
    }

    async fn request(&self, command: &str) -> Result<String> {
        let exchange = async {
            let mut stream = UnixStream::connect(&self.sockets.request).await?;
            stream.write_all(command.as_bytes()).await?;
            let mut reply = String::new();
            stream.read_to_string(&mut reply).await?;
            Ok::<_, SwallowError>(reply)
        };

        timeout(self.ipc_timeout, exchange)
            .await
            .map_err(|_| swallow_error!(ipc, "Hyprland не ответил на '{}'", command))?
    }

    async fn clients(&self) -> Result<Vec<WindowHandle>> {
        let reply = self.request("j/clients").await?;
        let clients: Vec<HyprClient> = serde_json::from_str(&reply)?;
        Ok(clients
            .into_iter()
            .filter(|c| c.mapped)
            .filter_map(HyprClient::into_handle)
            .collect())
    }
}

#[async_trait::async_trait]
impl WindowSystem for HyprlandWindowSystem {
    fn name(&self) -> &'static str {
        "hyprland"
    }

    async fn window(&self, id: WindowId) -> Result<WindowHandle> {
        let clients = self
            .clients()
            .await
            .map_err(|e| swallow_error!(metadata, "список окон Hyprland: {}", e))?;
        match clients.into_iter().find(|w| w.id == id) {
            Some(window) => Ok(window),
            None => SwallowError::metadata_unavailable(format!("окно {} не найдено", id)),
        }
    }

    async fn list_windows(&self) -> Result<Vec<WindowHandle>> {
        self.clients().await
    }

    async fn active_workspace(&self) -> Result<String> {
        let reply = self.request("j/activeworkspace").await?;
        let workspace: HyprWorkspaceRef = serde_json::from_str(&reply)?;
        debug!("Активный рабочий стол Hyprland: {} ({})", workspace.name, workspace.id);
        Ok(workspace.name)
    }

    async fn move_to_holding(&self, id: WindowId) -> Result<()> {
        let reply = self
            .request(&format!(
                "dispatch movetoworkspacesilent {},address:{}",
                self.holding, id
            ))
            .await?;
        check_reply(&reply)
    }

    async fn reveal(&self, id: WindowId, workspace: &str) -> Result<()> {
        let reply = self
            .request(&format!(
                "[[BATCH]]dispatch movetoworkspacesilent {},address:{};dispatch focuswindow address:{}",
                workspace_selector(workspace),
                id,
                id
            ))
            .await?;
        check_reply(&reply)
    }

    fn is_in_holding(&self, window: &WindowHandle) -> bool {
        window.workspace.as_deref() == Some(self.holding.as_str())
    }
}

/// Подписка на `.socket2.sock` с переподключением
pub struct HyprlandEventSource {
    sockets: HyprlandSockets,
    reconnect_delay: Duration,
}

impl HyprlandEventSource {
    pub fn new(sockets: HyprlandSockets, reconnect_delay: Duration) -> Self {
        Self {
            sockets,
            reconnect_delay,
        }
    }

    /// Читает события до обрыва; `Ok(false)` - получатель закрыт
    async fn stream_events(&self, tx: &mpsc::Sender<WindowEvent>) -> Result<bool> {
        let stream = UnixStream::connect(&self.sockets.events).await?;
        info!("Подписка на события Hyprland: {:?}", self.sockets.events);

        let mut lines = BufReader::new(stream).lines();
        while let Some(line) = lines.next_line().await? {
            if let Some(event) = parse_event_line(&line) {
                if tx.send(event).await.is_err() {
                    return Ok(false);
                }
            }
        }
        Ok(true)
    }
}

#[async_trait::async_trait]
impl EventSource for HyprlandEventSource {
    async fn run(self: Box<Self>, tx: mpsc::Sender<WindowEvent>) -> Result<()> {
        loop {
            match self.stream_events(&tx).await {
                Ok(false) => return Ok(()),
                Ok(true) => warn!("Hyprland закрыл поток событий"),
                Err(e) => warn!("Ошибка потока событий Hyprland: {}", e),
            }
            sleep(self.reconnect_delay).await;
        }
    }
}
