use crate::config::SwallowConfig;
use crate::debug_if_enabled;
use crate::events::{WindowEvent, WindowEventKind, WindowId};
use crate::services::actions::SwallowActions;
use crate::services::classifier::{should_swallow, SwallowRules};
use crate::services::process_table::ProcessTable;
use crate::services::registry::{SwallowRecord, SwallowRegistry};
use crate::services::resolver::ProcessTreeResolver;
use crate::services::window_system::WindowSystem;
use crate::utils::StateDir;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Duration, Instant};
use tracing::{debug, info, warn};

/// Отложенная классификация нового окна
#[derive(Debug)]
struct PendingSwallow {
    handle: JoinHandle<()>,
    queued_at: Instant,
}

/// Обработчик потока событий оконного менеджера.
///
/// События обрабатываются строго по порядку в одной задаче. Новое окно
/// классифицируется не сразу, а через `swallow_delay`, чтобы оконный
/// менеджер успел заполнить его метаданные; ожидание отменяется событием
/// закрытия этого окна и остановкой монитора.
pub struct EventMonitor {
    rules: SwallowRules,
    swallow_delay: Duration,
    restore_on_close: bool,
    registry: Arc<SwallowRegistry>,
    windows: Arc<dyn WindowSystem>,
    resolver: ProcessTreeResolver,
    actions: Arc<SwallowActions>,
    state: StateDir,
    pending: Arc<DashMap<WindowId, PendingSwallow>>,
    ready_tx: mpsc::UnboundedSender<WindowId>,
    ready_rx: mpsc::UnboundedReceiver<WindowId>,
}

impl EventMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        config: &SwallowConfig,
        rules: SwallowRules,
        registry: Arc<SwallowRegistry>,
        windows: Arc<dyn WindowSystem>,
        processes: Arc<dyn ProcessTable>,
        actions: Arc<SwallowActions>,
        state: StateDir,
    ) -> Self {
        info!(
            "Инициализация EventMonitor (бэкенд: {}, задержка: {}мс)",
            windows.name(),
            config.swallow_delay_ms
        );

        let (ready_tx, ready_rx) = mpsc::unbounded_channel();
        let resolver = ProcessTreeResolver::new(windows.clone(), processes, config.max_process_depth);

        Self {
            rules,
            swallow_delay: config.swallow_delay(),
            restore_on_close: config.restore_on_close,
            registry,
            windows,
            resolver,
            actions,
            state,
            pending: Arc::new(DashMap::new()),
            ready_tx,
            ready_rx,
        }
    }

    pub async fn run(
        mut self,
        mut events: mpsc::Receiver<WindowEvent>,
        mut shutdown: watch::Receiver<bool>,
    ) {
        info!("EventMonitor запущен");

        loop {
            tokio::select! {
                biased;
                _ = shutdown.changed() => break,
                Some(event) = events.recv() => self.handle_window_event(event).await,
                Some(child) = self.ready_rx.recv() => self.handle_ready(child).await,
                else => break,
            }
        }

        self.stop_gracefully().await;
        info!("EventMonitor остановлен");
    }

    /// Включено ли поглощение с учётом `swallowd toggle`
    fn effective_rules(&self) -> SwallowRules {
        let enabled = self.rules.enabled && self.state.is_enabled();
        if enabled == self.rules.enabled {
            self.rules.clone()
        } else {
            self.rules.with_enabled(enabled)
        }
    }

    pub async fn handle_window_event(&mut self, event: WindowEvent) {
        debug_if_enabled!("Обработка события окна: {}", event);

        match event.kind {
            WindowEventKind::Created => self.schedule_swallow(event.window_id),
            WindowEventKind::Closed => self.handle_closed(event.window_id).await,
        }
    }

    fn schedule_swallow(&self, child: WindowId) {
        if !self.rules.enabled {
            return;
        }

        if self.pending.contains_key(&child) || self.registry.find(child).is_some() {
            debug_if_enabled!("Окно {} уже обрабатывается, пропускаем", child);
            return;
        }

        let ready_tx = self.ready_tx.clone();
        let delay = self.swallow_delay;
        let handle = tokio::spawn(async move {
            sleep(delay).await;
            let _ = ready_tx.send(child);
        });

        self.pending.insert(
            child,
            PendingSwallow {
                handle,
                queued_at: Instant::now(),
            },
        );
    }

    async fn handle_closed(&mut self, window: WindowId) {
        if let Some((_, pending)) = self.pending.remove(&window) {
            pending.handle.abort();
            debug!("Окно {} закрыто до классификации", window);
        }

        if let Some(record) = self.registry.remove(window) {
            if self.restore_on_close {
                self.actions.restore(&record).await;
            } else {
                info!("Окно {} закрыто, терминал {} остаётся скрытым", window, record.parent);
            }
            return;
        }

        // Закрыли сам скрытый терминал - возвращать больше нечего
        if let Some(record) = self.registry.find_by_parent(window) {
            if self.registry.remove(record.child).is_some() {
                info!("Скрытый терминал {} закрыт, запись {} удалена", window, record.child);
            }
        }
    }

    pub async fn handle_ready(&mut self, child: WindowId) {
        // Ожидание могли отменить, пока сообщение стояло в очереди
        let Some((_, pending)) = self.pending.remove(&child) else {
            return;
        };
        debug_if_enabled!(
            "Классификация окна {} через {}мс",
            child,
            pending.queued_at.elapsed().as_millis()
        );

        let child_window = match self.windows.window(child).await {
            Ok(window) => window,
            Err(e) => {
                debug!("Окно {} пропущено: {}", child, e);
                return;
            }
        };

        let Some(parent) = self.resolver.find_parent_window(&child_window).await else {
            return;
        };

        if !should_swallow(&parent, &child_window, &self.effective_rules()) {
            debug!("Окно {} не поглощает {}", child_window, parent);
            return;
        }

        let record = SwallowRecord::new(child, parent.id, SystemTime::now())
            .with_parent_workspace(parent.workspace.clone());

        if let Err(e) = self.registry.add(record.clone()) {
            warn!("Поглощение {} -> {} отклонено: {}", child, parent.id, e);
            return;
        }

        if let Err(e) = self.actions.swallow(&record).await {
            warn!("Не удалось скрыть терминал {}: {}", parent.id, e);
            self.registry.remove(child);
        }
    }

    /// Отменить все ожидания
    fn cancel_pending(&self) {
        let count = self.pending.len();
        if count > 0 {
            info!("Отмена {} ожидающих классификаций", count);
        }

        let keys: Vec<WindowId> = self.pending.iter().map(|entry| *entry.key()).collect();
        for key in keys {
            if let Some((_, pending)) = self.pending.remove(&key) {
                pending.handle.abort();
            }
        }
    }

    /// Остановка: отменить ожидания и вернуть все скрытые терминалы
    pub async fn stop_gracefully(&mut self) {
        self.cancel_pending();
        self.ready_rx.close();

        let records = self.registry.all();
        if !records.is_empty() {
            info!("Возвращаем {} скрытых терминалов перед выходом", records.len());
        }
        for record in records {
            if let Some(record) = self.registry.remove(record.child) {
                self.actions.restore(&record).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RestoreTarget};
    use crate::events::WindowHandle;
    use crate::services::window_system::dry_run::{FakeProcessTable, FakeWindowSystem, WindowCommand};

    struct Fixture {
        windows: Arc<FakeWindowSystem>,
        processes: Arc<FakeProcessTable>,
        registry: Arc<SwallowRegistry>,
        monitor: EventMonitor,
        _state: tempfile::TempDir,
    }

    fn fixture(tweak: impl FnOnce(&mut SwallowConfig)) -> Fixture {
        let mut config = Config::default().swallow;
        config.terminal_class_patterns = vec!["Alacritty".to_string()];
        config.exception_patterns = vec!["nvim".to_string()];
        config.swallow_delay_ms = 0;
        tweak(&mut config);

        let windows = Arc::new(FakeWindowSystem::new());
        let processes = Arc::new(FakeProcessTable::new());
        let registry = Arc::new(SwallowRegistry::new());
        let actions = Arc::new(SwallowActions::new(windows.clone(), RestoreTarget::Origin));
        let state_dir = tempfile::tempdir().unwrap();

        // alacritty(100) -> zsh(101) -> программы
        windows.insert(
            WindowHandle::new(WindowId(7), "Alacritty")
                .with_pid(100)
                .with_workspace("2"),
        );
        processes.insert(101, 100);

        let monitor = EventMonitor::new(
            &config,
            SwallowRules::compile(&config).unwrap(),
            registry.clone(),
            windows.clone(),
            processes.clone(),
            actions,
            StateDir::new(state_dir.path()),
        );

        Fixture {
            windows,
            processes,
            registry,
            monitor,
            _state: state_dir,
        }
    }

    impl Fixture {
        fn spawn_child(&self, id: u64, class: &str, pid: u32) -> WindowEvent {
            self.processes.insert(pid, 101);
            self.windows.insert(
                WindowHandle::new(WindowId(id), class)
                    .with_pid(pid)
                    .with_workspace("2"),
            );
            WindowEvent::created(WindowId(id), class, "")
        }

        /// Событие создания и немедленное срабатывание отложенной классификации
        async fn create(&mut self, event: WindowEvent) {
            let id = event.window_id;
            self.monitor.handle_window_event(event).await;
            let ready = self.monitor.ready_rx.recv().await.unwrap();
            assert_eq!(ready, id);
            self.monitor.handle_ready(ready).await;
        }
    }

    #[tokio::test]
    async fn test_gui_child_swallows_terminal() {
        let mut f = fixture(|_| {});
        let event = f.spawn_child(42, "firefox", 102);
        f.create(event).await;

        let record = f.registry.find(WindowId(42)).unwrap();
        assert_eq!(record.parent, WindowId(7));
        assert_eq!(record.parent_workspace.as_deref(), Some("2"));
        assert_eq!(f.windows.commands(), vec![WindowCommand::Hide(WindowId(7))]);
    }

    #[tokio::test]
    async fn test_close_restores_exactly_once() {
        let mut f = fixture(|_| {});
        let event = f.spawn_child(42, "firefox", 102);
        f.create(event).await;

        f.windows.remove(WindowId(42));
        f.monitor.handle_window_event(WindowEvent::closed(WindowId(42))).await;
        f.monitor.handle_window_event(WindowEvent::closed(WindowId(42))).await;

        assert_eq!(f.windows.reveals_of(WindowId(7)), 1);
        assert!(f.registry.find(WindowId(42)).is_none());
        assert_eq!(f.windows.get(WindowId(7)).unwrap().workspace.as_deref(), Some("2"));
    }

    #[tokio::test]
    async fn test_exception_child_is_ignored() {
        let mut f = fixture(|_| {});
        let event = f.spawn_child(42, "nvim", 102);
        f.create(event).await;

        assert!(f.registry.is_empty());
        assert!(f.windows.commands().is_empty());
    }

    #[tokio::test]
    async fn test_second_child_does_not_reswallow() {
        let mut f = fixture(|_| {});
        let first = f.spawn_child(42, "firefox", 102);
        f.create(first).await;

        // Терминал уже в области хранения, второе окно родителя не находит
        let second = f.spawn_child(43, "mpv", 103);
        f.create(second).await;

        assert_eq!(f.registry.len(), 1);
        assert_eq!(f.windows.commands(), vec![WindowCommand::Hide(WindowId(7))]);
    }

    #[tokio::test]
    async fn test_close_during_delay_cancels_swallow() {
        let mut f = fixture(|c| c.swallow_delay_ms = 60_000);
        let event = f.spawn_child(42, "firefox", 102);

        f.monitor.handle_window_event(event).await;
        assert!(f.monitor.pending.contains_key(&WindowId(42)));

        f.monitor.handle_window_event(WindowEvent::closed(WindowId(42))).await;
        assert!(f.monitor.pending.is_empty());

        // Запоздавшее сообщение о готовности ничего не делает
        f.monitor.handle_ready(WindowId(42)).await;
        assert!(f.registry.is_empty());
        assert!(f.windows.commands().is_empty());
    }

    #[tokio::test]
    async fn test_restore_on_close_disabled_keeps_terminal_hidden() {
        let mut f = fixture(|c| c.restore_on_close = false);
        let event = f.spawn_child(42, "firefox", 102);
        f.create(event).await;

        f.monitor.handle_window_event(WindowEvent::closed(WindowId(42))).await;

        assert!(f.registry.is_empty());
        assert_eq!(f.windows.reveals_of(WindowId(7)), 0);
    }

    #[tokio::test]
    async fn test_closed_terminal_drops_record() {
        let mut f = fixture(|_| {});
        let event = f.spawn_child(42, "firefox", 102);
        f.create(event).await;

        f.windows.remove(WindowId(7));
        f.monitor.handle_window_event(WindowEvent::closed(WindowId(7))).await;

        assert!(f.registry.is_empty());
        assert_eq!(f.windows.reveals_of(WindowId(7)), 0);
    }

    #[tokio::test]
    async fn test_runtime_toggle_disables_swallowing() {
        let mut f = fixture(|_| {});
        f.monitor.state.set_enabled(false).unwrap();

        let event = f.spawn_child(42, "firefox", 102);
        f.create(event).await;

        assert!(f.registry.is_empty());
    }

    #[tokio::test]
    async fn test_vanished_child_before_classification_is_skipped() {
        let mut f = fixture(|_| {});
        let event = f.spawn_child(42, "firefox", 102);
        f.windows.remove(WindowId(42));
        f.create(event).await;

        assert!(f.registry.is_empty());
    }

    #[tokio::test]
    async fn test_run_restores_on_shutdown() {
        let f = fixture(|_| {});
        let event = f.spawn_child(42, "firefox", 102);
        let windows = f.windows.clone();
        let registry = f.registry.clone();

        let (event_tx, event_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(f.monitor.run(event_rx, shutdown_rx));

        event_tx.send(event).await.unwrap();
        for _ in 0..100 {
            if registry.find(WindowId(42)).is_some() {
                break;
            }
            sleep(Duration::from_millis(10)).await;
        }
        assert!(registry.find(WindowId(42)).is_some());

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        assert!(registry.is_empty());
        assert_eq!(windows.reveals_of(WindowId(7)), 1);
    }

    #[tokio::test]
    async fn test_shutdown_cancels_pending_swallow() {
        let f = fixture(|c| c.swallow_delay_ms = 200);
        let event = f.spawn_child(42, "firefox", 102);
        let windows = f.windows.clone();
        let registry = f.registry.clone();

        let (event_tx, event_rx) = mpsc::channel(8);
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = tokio::spawn(f.monitor.run(event_rx, shutdown_rx));

        event_tx.send(event).await.unwrap();
        sleep(Duration::from_millis(20)).await;
        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();

        // Задержка истекла уже после остановки
        sleep(Duration::from_millis(400)).await;
        assert!(windows.commands().is_empty());
        assert!(registry.is_empty());
    }
}
