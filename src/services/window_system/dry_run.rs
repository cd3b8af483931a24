use crate::error::{Result, SwallowError};
use crate::events::{WindowEvent, WindowHandle, WindowId};
use crate::services::process_table::ProcessTable;
use crate::swallow_error;
use parking_lot::{Mutex, RwLock};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::time::{interval, sleep, Duration};
use tracing::info;

use super::r#trait::{EventSource, WindowSystem};

/// Команда, принятая эмулируемым оконным менеджером
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WindowCommand {
    Hide(WindowId),
    Reveal(WindowId, String),
}

/// Оконный менеджер в памяти: для `--dry-run` и для тестов
pub struct FakeWindowSystem {
    windows: RwLock<HashMap<WindowId, WindowHandle>>,
    active_workspace: RwLock<String>,
    commands: Mutex<Vec<WindowCommand>>,
}

impl Default for FakeWindowSystem {
    fn default() -> Self {
        Self::new()
    }
}

impl FakeWindowSystem {
    pub const HOLDING: &'static str = "holding";

    pub fn new() -> Self {
        Self {
            windows: RwLock::new(HashMap::new()),
            active_workspace: RwLock::new("1".to_string()),
            commands: Mutex::new(Vec::new()),
        }
    }

    pub fn insert(&self, window: WindowHandle) {
        self.windows.write().insert(window.id, window);
    }

    pub fn remove(&self, id: WindowId) -> Option<WindowHandle> {
        self.windows.write().remove(&id)
    }

    pub fn get(&self, id: WindowId) -> Option<WindowHandle> {
        self.windows.read().get(&id).cloned()
    }

    pub fn set_active_workspace(&self, workspace: &str) {
        *self.active_workspace.write() = workspace.to_string();
    }

    /// Выполненные команды в порядке поступления
    pub fn commands(&self) -> Vec<WindowCommand> {
        self.commands.lock().clone()
    }

    pub fn reveals_of(&self, id: WindowId) -> usize {
        self.commands
            .lock()
            .iter()
            .filter(|c| matches!(c, WindowCommand::Reveal(w, _) if *w == id))
            .count()
    }

    fn place(&self, id: WindowId, workspace: &str) -> Result<()> {
        let mut windows = self.windows.write();
        let window = windows
            .get_mut(&id)
            .ok_or_else(|| swallow_error!(action, "окно {} не существует", id))?;
        window.workspace = Some(workspace.to_string());
        Ok(())
    }
}

#[async_trait::async_trait]
impl WindowSystem for FakeWindowSystem {
    fn name(&self) -> &'static str {
        "dry-run"
    }

    async fn window(&self, id: WindowId) -> Result<WindowHandle> {
        match self.get(id) {
            Some(window) => Ok(window),
            None => SwallowError::metadata_unavailable(format!("окно {} не найдено", id)),
        }
    }

    async fn list_windows(&self) -> Result<Vec<WindowHandle>> {
        Ok(self.windows.read().values().cloned().collect())
    }

    async fn active_workspace(&self) -> Result<String> {
        Ok(self.active_workspace.read().clone())
    }

    async fn move_to_holding(&self, id: WindowId) -> Result<()> {
        self.place(id, Self::HOLDING)?;
        info!("[DRY RUN] Окно {} перемещено в область хранения", id);
        self.commands.lock().push(WindowCommand::Hide(id));
        Ok(())
    }

    async fn reveal(&self, id: WindowId, workspace: &str) -> Result<()> {
        self.place(id, workspace)?;
        info!("[DRY RUN] Окно {} возвращено на рабочий стол {}", id, workspace);
        self.commands
            .lock()
            .push(WindowCommand::Reveal(id, workspace.to_string()));
        Ok(())
    }

    fn is_in_holding(&self, window: &WindowHandle) -> bool {
        window.workspace.as_deref() == Some(Self::HOLDING)
    }
}

/// Таблица процессов в памяти: pid -> ppid
#[derive(Default)]
pub struct FakeProcessTable {
    parents: RwLock<HashMap<u32, u32>>,
}

impl FakeProcessTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&self, pid: u32, parent: u32) {
        self.parents.write().insert(pid, parent);
    }
}

impl ProcessTable for FakeProcessTable {
    fn parent_pid(&self, pid: u32) -> Option<u32> {
        self.parents.read().get(&pid).copied()
    }
}

/// Эмулирует терминал, из которого по очереди запускаются программы
pub struct DryRunEventSource {
    windows: Arc<FakeWindowSystem>,
    processes: Arc<FakeProcessTable>,
    period: Duration,
}

const TERMINAL_ID: WindowId = WindowId(0x1000);
const TERMINAL_PID: u32 = 1000;
const SHELL_PID: u32 = 1001;

impl DryRunEventSource {
    pub fn new(
        windows: Arc<FakeWindowSystem>,
        processes: Arc<FakeProcessTable>,
        period: Duration,
    ) -> Self {
        Self {
            windows,
            processes,
            period,
        }
    }
}

#[async_trait::async_trait]
impl EventSource for DryRunEventSource {
    async fn run(self: Box<Self>, tx: mpsc::Sender<WindowEvent>) -> Result<()> {
        info!("Dry-run режим - события окон эмулируются");

        let fake_programs = [
            ("firefox", "Mozilla Firefox"),
            ("mpv", "video.mkv - mpv"),
            ("nvim", "nvim - dry_run"),
            ("org.pwmt.zathura", "paper.pdf"),
        ];

        self.windows.insert(
            WindowHandle::new(TERMINAL_ID, "Alacritty")
                .with_title("zsh - dry_run")
                .with_pid(TERMINAL_PID)
                .with_workspace("1"),
        );
        self.processes.insert(SHELL_PID, TERMINAL_PID);

        let mut index = 0usize;
        let mut ticker = interval(self.period);

        loop {
            ticker.tick().await;

            let (class, title) = fake_programs[index % fake_programs.len()];
            let id = WindowId(0x2000 + index as u64);
            let pid = 2000 + index as u32;

            self.processes.insert(pid, SHELL_PID);
            self.windows.insert(
                WindowHandle::new(id, class)
                    .with_title(title)
                    .with_pid(pid)
                    .with_workspace("1"),
            );

            info!("Dry-run: эмулируем запуск {} из терминала", class);
            if tx.send(WindowEvent::created(id, class, title)).await.is_err() {
                return Ok(());
            }

            // Программа живёт половину периода
            sleep(self.period / 2).await;

            self.windows.remove(id);
            info!("Dry-run: эмулируем закрытие {}", class);
            if tx.send(WindowEvent::closed(id)).await.is_err() {
                return Ok(());
            }

            index += 1;
        }
    }
}
