use crate::config::SwallowConfig;
use crate::events::WindowId;
use crate::services::actions::SwallowActions;
use crate::services::registry::SwallowRegistry;
use crate::services::window_system::WindowSystem;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::SystemTime;
use tokio::sync::watch;
use tokio::time::{interval, Duration, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Итог одного прохода сборщика
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub checked: usize,
    pub vanished: usize,
    pub expired: usize,
    pub restored: usize,
}

impl SweepReport {
    pub fn removed(&self) -> usize {
        self.vanished + self.expired
    }
}

/// Периодическая сверка реестра с реальными окнами.
///
/// Не зависит от потока событий: пропущенное событие закрытия рано или
/// поздно будет обнаружено здесь.
pub struct GcSweeper {
    registry: Arc<SwallowRegistry>,
    actions: Arc<SwallowActions>,
    windows: Arc<dyn WindowSystem>,
    timeout: Option<Duration>,
    period: Duration,
}

impl GcSweeper {
    pub fn new(
        registry: Arc<SwallowRegistry>,
        actions: Arc<SwallowActions>,
        windows: Arc<dyn WindowSystem>,
        config: &SwallowConfig,
    ) -> Self {
        Self {
            registry,
            actions,
            windows,
            timeout: config.gc_timeout(),
            period: config.gc_interval(),
        }
    }

    pub async fn sweep(&self, now: SystemTime) -> SweepReport {
        let mut report = SweepReport::default();

        let records = self.registry.all();
        if records.is_empty() {
            return report;
        }

        // Сбой запроса не доказывает, что окна исчезли: такие записи остаются
        let live: Option<HashSet<WindowId>> = match self.windows.list_windows().await {
            Ok(windows) => Some(windows.into_iter().map(|w| w.id).collect()),
            Err(e) => {
                warn!("GC: не удалось получить список окон: {}", e);
                None
            }
        };

        for record in records {
            report.checked += 1;

            let expired = self
                .timeout
                .is_some_and(|timeout| record.age(now) > timeout);

            if expired {
                // Запись забирает тот, кто первым удалил её из реестра
                if let Some(record) = self.registry.remove(record.child) {
                    info!(
                        "GC: поглощение {} -> {} истекло ({}s)",
                        record.child,
                        record.parent,
                        record.age(now).as_secs()
                    );
                    report.expired += 1;
                    if self.actions.restore(&record).await {
                        report.restored += 1;
                    }
                }
                continue;
            }

            let Some(live) = &live else {
                continue;
            };

            let child_alive = live.contains(&record.child);
            let parent_alive = live.contains(&record.parent);
            if child_alive && parent_alive {
                continue;
            }

            if let Some(record) = self.registry.remove(record.child) {
                info!(
                    "GC: окно {} или {} исчезло, запись удалена",
                    record.child, record.parent
                );
                report.vanished += 1;
                if parent_alive && self.actions.restore(&record).await {
                    report.restored += 1;
                }
            }
        }

        report
    }

    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        info!("GC запущен с интервалом {:?}", self.period);

        let mut ticker = interval(self.period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // Первый тик срабатывает сразу, реестр в этот момент пуст
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.sweep(SystemTime::now()).await;
                    if report.removed() > 0 {
                        info!("GC: {:?}", report);
                    } else {
                        debug!("GC: проверено {} записей", report.checked);
                    }
                }
                _ = shutdown.changed() => break,
            }
        }

        info!("GC остановлен");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::{Config, RestoreTarget};
    use crate::error::Result;
    use crate::events::WindowHandle;
    use crate::services::registry::SwallowRecord;
    use crate::services::window_system::dry_run::FakeWindowSystem;

    struct Fixture {
        windows: Arc<FakeWindowSystem>,
        registry: Arc<SwallowRegistry>,
        gc: GcSweeper,
    }

    fn fixture(gc_timeout_secs: u64) -> Fixture {
        let windows = Arc::new(FakeWindowSystem::new());
        windows.insert(WindowHandle::new(WindowId(7), "Alacritty").with_workspace("1"));
        windows.insert(WindowHandle::new(WindowId(42), "firefox").with_workspace("1"));

        let registry = Arc::new(SwallowRegistry::new());
        let actions = Arc::new(SwallowActions::new(windows.clone(), RestoreTarget::Origin));
        let mut config = Config::default().swallow;
        config.gc_timeout_secs = gc_timeout_secs;
        let gc = GcSweeper::new(registry.clone(), actions, windows.clone(), &config);

        Fixture {
            windows,
            registry,
            gc,
        }
    }

    fn at(secs: u64) -> SystemTime {
        SystemTime::UNIX_EPOCH + Duration::from_secs(secs)
    }

    fn record() -> SwallowRecord {
        SwallowRecord::new(WindowId(42), WindowId(7), at(0)).with_parent_workspace(Some("1".into()))
    }

    #[tokio::test]
    async fn test_expired_record_is_restored() {
        let f = fixture(30);
        f.registry.add(record()).unwrap();

        let report = f.gc.sweep(at(40)).await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.restored, 1);
        assert_eq!(f.windows.reveals_of(WindowId(7)), 1);
        assert!(f.registry.find(WindowId(42)).is_none());
    }

    #[tokio::test]
    async fn test_fresh_record_is_kept() {
        let f = fixture(30);
        f.registry.add(record()).unwrap();

        let report = f.gc.sweep(at(10)).await;
        assert_eq!(report.removed(), 0);
        assert!(f.registry.find(WindowId(42)).is_some());
        assert_eq!(f.windows.reveals_of(WindowId(7)), 0);
    }

    #[tokio::test]
    async fn test_vanished_child_restores_parent() {
        let f = fixture(0);
        f.registry.add(record()).unwrap();
        f.windows.remove(WindowId(42));

        let report = f.gc.sweep(at(10)).await;
        assert_eq!(report.vanished, 1);
        assert_eq!(f.windows.reveals_of(WindowId(7)), 1);
        assert!(f.registry.is_empty());
    }

    #[tokio::test]
    async fn test_vanished_parent_is_dropped_without_restore() {
        let f = fixture(0);
        f.registry.add(record()).unwrap();
        f.windows.remove(WindowId(7));

        let report = f.gc.sweep(at(10)).await;
        assert_eq!(report.vanished, 1);
        assert_eq!(report.restored, 0);
        assert!(f.windows.commands().is_empty());
        assert!(f.registry.is_empty());
    }

    #[tokio::test]
    async fn test_sweep_is_idempotent() {
        let f = fixture(30);
        f.registry.add(record()).unwrap();

        f.gc.sweep(at(40)).await;
        let second = f.gc.sweep(at(40)).await;

        assert_eq!(second, SweepReport::default());
        assert_eq!(f.windows.reveals_of(WindowId(7)), 1);
    }

    /// Оконный менеджер, который не отвечает на запрос списка окон
    struct Unreachable(FakeWindowSystem);

    #[async_trait::async_trait]
    impl WindowSystem for Unreachable {
        fn name(&self) -> &'static str {
            "unreachable"
        }
        async fn window(&self, id: WindowId) -> Result<WindowHandle> {
            self.0.window(id).await
        }
        async fn list_windows(&self) -> Result<Vec<WindowHandle>> {
            Err(crate::swallow_error!(ipc, "timeout"))
        }
        async fn active_workspace(&self) -> Result<String> {
            self.0.active_workspace().await
        }
        async fn move_to_holding(&self, id: WindowId) -> Result<()> {
            self.0.move_to_holding(id).await
        }
        async fn reveal(&self, id: WindowId, workspace: &str) -> Result<()> {
            self.0.reveal(id, workspace).await
        }
        fn is_in_holding(&self, window: &WindowHandle) -> bool {
            self.0.is_in_holding(window)
        }
    }

    #[tokio::test]
    async fn test_timeout_applies_even_when_listing_fails() {
        let inner = FakeWindowSystem::new();
        inner.insert(WindowHandle::new(WindowId(7), "Alacritty"));
        let windows = Arc::new(Unreachable(inner));

        let registry = Arc::new(SwallowRegistry::new());
        let actions = Arc::new(SwallowActions::new(windows.clone(), RestoreTarget::Origin));
        let mut config = Config::default().swallow;
        config.gc_timeout_secs = 30;
        let gc = GcSweeper::new(registry.clone(), actions, windows.clone(), &config);

        registry.add(record()).unwrap();
        registry
            .add(SwallowRecord::new(WindowId(43), WindowId(8), at(35)))
            .unwrap();

        let report = gc.sweep(at(40)).await;
        assert_eq!(report.expired, 1);
        assert_eq!(report.restored, 1);
        // Свежая запись пережила сбой запроса
        assert!(registry.find(WindowId(43)).is_some());
        assert!(registry.find(WindowId(42)).is_none());
    }
}
