use crate::error::{Result, SwallowError};
use crate::events::{WindowEvent, WindowHandle, WindowId};
use crate::swallow_error;
use serde::Deserialize;
use std::path::PathBuf;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::UnixStream;
use tokio::sync::mpsc;
use tokio::time::{sleep, timeout};
use tracing::{debug, info, warn};

use super::r#trait::{EventSource, WindowSystem};

const MAGIC: &[u8; 6] = b"i3-ipc";
const RUN_COMMAND: u32 = 0;
const GET_WORKSPACES: u32 = 1;
const SUBSCRIBE: u32 = 2;
const GET_TREE: u32 = 4;
const EVENT_WINDOW: u32 = 0x8000_0003;

/// Скрытые окна Sway живут на служебном рабочем столе scratchpad
const SCRATCHPAD: &str = "__i3_scratch";

pub fn socket_from_env() -> Result<PathBuf> {
    std::env::var("SWAYSOCK")
        .map(PathBuf::from)
        .map_err(|_| swallow_error!(service_unavailable, "SWAYSOCK не задана"))
}

async fn write_message(stream: &mut UnixStream, kind: u32, payload: &[u8]) -> Result<()> {
    let mut message = Vec::with_capacity(14 + payload.len());
    message.extend_from_slice(MAGIC);
    message.extend_from_slice(&(payload.len() as u32).to_ne_bytes());
    message.extend_from_slice(&kind.to_ne_bytes());
    message.extend_from_slice(payload);
    stream.write_all(&message).await?;
    Ok(())
}

async fn read_message(stream: &mut UnixStream) -> Result<(u32, Vec<u8>)> {
    let mut header = [0u8; 14];
    stream.read_exact(&mut header).await?;
    if &header[..6] != MAGIC {
        return Err(swallow_error!(ipc, "неверный заголовок i3-ipc"));
    }
    let len = u32::from_ne_bytes([header[6], header[7], header[8], header[9]]) as usize;
    let kind = u32::from_ne_bytes([header[10], header[11], header[12], header[13]]);
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok((kind, payload))
}

#[derive(Debug, Default, Deserialize)]
struct WindowProperties {
    class: Option<String>,
    instance: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SwayNode {
    id: u64,
    #[serde(rename = "type")]
    node_type: String,
    name: Option<String>,
    app_id: Option<String>,
    pid: Option<i64>,
    window_properties: Option<WindowProperties>,
    #[serde(default)]
    nodes: Vec<SwayNode>,
    #[serde(default)]
    floating_nodes: Vec<SwayNode>,
}

impl SwayNode {
    fn is_view(&self) -> bool {
        matches!(self.node_type.as_str(), "con" | "floating_con")
            && self.nodes.is_empty()
            && (self.app_id.is_some() || self.window_properties.is_some())
    }

    fn to_handle(&self, workspace: Option<&str>) -> WindowHandle {
        let props = self.window_properties.as_ref();
        // Нативные Wayland-окна задают app_id, XWayland - WM_CLASS
        let class = self
            .app_id
            .clone()
            .or_else(|| props.and_then(|p| p.class.clone()))
            .unwrap_or_default();
        let instance = props
            .and_then(|p| p.instance.clone())
            .unwrap_or_else(|| class.clone());

        let mut handle = WindowHandle::new(WindowId(self.id), class)
            .with_instance(instance)
            .with_title(self.name.clone().unwrap_or_default());
        if let Some(pid) = self.pid.filter(|pid| *pid > 0) {
            handle = handle.with_pid(pid as u32);
        }
        if let Some(workspace) = workspace {
            handle = handle.with_workspace(workspace);
        }
        handle
    }

    fn collect_views(&self, workspace: Option<&str>, out: &mut Vec<WindowHandle>) {
        let workspace = if self.node_type == "workspace" {
            self.name.as_deref()
        } else {
            workspace
        };

        if self.is_view() {
            out.push(self.to_handle(workspace));
        }
        for child in self.nodes.iter().chain(self.floating_nodes.iter()) {
            child.collect_views(workspace, out);
        }
    }
}

#[derive(Debug, Deserialize)]
struct SwayWorkspace {
    name: String,
    focused: bool,
}

#[derive(Debug, Deserialize)]
struct CommandOutcome {
    success: bool,
    error: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WindowChange {
    change: String,
    container: SwayNode,
}

/// Разобрать полезную нагрузку события `window`
pub fn parse_window_event(payload: &[u8]) -> Option<WindowEvent> {
    let event: WindowChange = serde_json::from_slice(payload).ok()?;
    let id = WindowId(event.container.id);
    match event.change.as_str() {
        "new" => {
            let handle = event.container.to_handle(None);
            Some(WindowEvent::created(id, handle.class, handle.title).with_instance(handle.instance))
        }
        "close" => Some(WindowEvent::closed(id)),
        _ => None,
    }
}

pub struct SwayWindowSystem {
    socket: PathBuf,
    ipc_timeout: Duration,
}

impl SwayWindowSystem {
    pub fn new(socket: PathBuf, ipc_timeout: Duration) -> Self {
        Self {
            socket,
            ipc_timeout,
        }
    }

    async fn request(&self, kind: u32, payload: &str) -> Result<Vec<u8>> {
        let exchange = async {
            let mut stream = UnixStream::connect(&self.socket).await?;
            write_message(&mut stream, kind, payload.as_bytes()).await?;
            let (_, reply) = read_message(&mut stream).await?;
            Ok::<_, SwallowError>(reply)
        };

        timeout(self.ipc_timeout, exchange)
            .await
            .map_err(|_| swallow_error!(ipc, "Sway не ответил на запрос типа {}", kind))?
    }

    async fn run_command(&self, command: &str) -> Result<()> {
        debug!("Sway: {}", command);
        let reply = self.request(RUN_COMMAND, command).await?;
        let outcomes: Vec<CommandOutcome> = serde_json::from_slice(&reply)?;
        match outcomes.into_iter().find(|o| !o.success) {
            Some(failed) => Err(swallow_error!(
                action,
                "Sway: {}",
                failed.error.unwrap_or_else(|| command.to_string())
            )),
            None => Ok(()),
        }
    }
}

#[async_trait::async_trait]
impl WindowSystem for SwayWindowSystem {
    fn name(&self) -> &'static str {
        "sway"
    }

    async fn window(&self, id: WindowId) -> Result<WindowHandle> {
        let windows = self
            .list_windows()
            .await
            .map_err(|e| swallow_error!(metadata, "дерево окон Sway: {}", e))?;
        match windows.into_iter().find(|w| w.id == id) {
            Some(window) => Ok(window),
            None => SwallowError::metadata_unavailable(format!("окно {} не найдено", id)),
        }
    }

    async fn list_windows(&self) -> Result<Vec<WindowHandle>> {
        let reply = self.request(GET_TREE, "").await?;
        let root: SwayNode = serde_json::from_slice(&reply)?;
        let mut windows = Vec::new();
        root.collect_views(None, &mut windows);
        Ok(windows)
    }

    async fn active_workspace(&self) -> Result<String> {
        let reply = self.request(GET_WORKSPACES, "").await?;
        let workspaces: Vec<SwayWorkspace> = serde_json::from_slice(&reply)?;
        workspaces
            .into_iter()
            .find(|w| w.focused)
            .map(|w| w.name)
            .ok_or_else(|| swallow_error!(ipc, "Sway не сообщил активный рабочий стол"))
    }

    async fn move_to_holding(&self, id: WindowId) -> Result<()> {
        self.run_command(&format!("[con_id={}] move scratchpad", id.value()))
            .await
    }

    async fn reveal(&self, id: WindowId, workspace: &str) -> Result<()> {
        let con = id.value();
        self.run_command(&format!(
            "[con_id={con}] move container to workspace \"{ws}\", floating disable; [con_id={con}] focus",
            con = con,
            ws = workspace.replace('"', "\\\"")
        ))
        .await
    }

    fn is_in_holding(&self, window: &WindowHandle) -> bool {
        window.workspace.as_deref() == Some(SCRATCHPAD)
    }

    fn dedicated_holding(&self) -> bool {
        false
    }
}

/// Подписка на события `window` с переподключением
pub struct SwayEventSource {
    socket: PathBuf,
    reconnect_delay: Duration,
}

impl SwayEventSource {
    pub fn new(socket: PathBuf, reconnect_delay: Duration) -> Self {
        Self {
            socket,
            reconnect_delay,
        }
    }

    async fn stream_events(&self, tx: &mpsc::Sender<WindowEvent>) -> Result<bool> {
        let mut stream = UnixStream::connect(&self.socket).await?;
        write_message(&mut stream, SUBSCRIBE, br#"["window"]"#).await?;
        let (_, reply) = read_message(&mut stream).await?;
        let outcome: CommandOutcome = serde_json::from_slice(&reply)?;
        if !outcome.success {
            return Err(swallow_error!(ipc, "Sway отклонил подписку на события"));
        }
        info!("Подписка на события Sway: {:?}", self.socket);

        loop {
            let (kind, payload) = read_message(&mut stream).await?;
            if kind != EVENT_WINDOW {
                continue;
            }
            if let Some(event) = parse_window_event(&payload) {
                if tx.send(event).await.is_err() {
                    return Ok(false);
                }
            }
        }
    }
}

#[async_trait::async_trait]
impl EventSource for SwayEventSource {
    async fn run(self: Box<Self>, tx: mpsc::Sender<WindowEvent>) -> Result<()> {
        loop {
            match self.stream_events(&tx).await {
                Ok(false) => return Ok(()),
                Ok(true) => warn!("Sway закрыл поток событий"),
                Err(e) => warn!("Ошибка потока событий Sway: {}", e),
            }
            sleep(self.reconnect_delay).await;
        }
    }
}
