use crate::config::RestoreTarget;
use crate::error::Result;
use crate::services::registry::SwallowRecord;
use crate::services::window_system::WindowSystem;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Команды скрытия и возврата терминала.
///
/// Ошибки оконного менеджера не выходят за пределы `restore`: окно могло
/// исчезнуть в любой момент, и это не повод останавливать демон.
pub struct SwallowActions {
    windows: Arc<dyn WindowSystem>,
    target: RestoreTarget,
}

impl SwallowActions {
    pub fn new(windows: Arc<dyn WindowSystem>, target: RestoreTarget) -> Self {
        Self { windows, target }
    }

    /// Спрятать терминал записи в область хранения
    pub async fn swallow(&self, record: &SwallowRecord) -> Result<()> {
        self.windows.move_to_holding(record.parent).await?;
        info!("Терминал {} скрыт окном {}", record.parent, record.child);
        Ok(())
    }

    /// Вернуть терминал. Возвращает `true`, если команда выполнена.
    pub async fn restore(&self, record: &SwallowRecord) -> bool {
        let workspace = match self.restore_workspace(record).await {
            Ok(workspace) => workspace,
            Err(e) => {
                warn!("Не удалось определить рабочий стол для {}: {}", record.parent, e);
                return false;
            }
        };

        match self.windows.reveal(record.parent, &workspace).await {
            Ok(()) => {
                info!("Терминал {} возвращён на рабочий стол {}", record.parent, workspace);
                true
            }
            Err(e) => {
                warn!("Не удалось вернуть терминал {}: {}", record.parent, e);
                false
            }
        }
    }

    async fn restore_workspace(&self, record: &SwallowRecord) -> Result<String> {
        if self.target == RestoreTarget::Origin {
            if let Some(workspace) = &record.parent_workspace {
                return Ok(workspace.clone());
            }
            debug!("Исходный рабочий стол {} неизвестен, используем текущий", record.parent);
        }
        self.windows.active_workspace().await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::{WindowHandle, WindowId};
    use crate::services::window_system::dry_run::{FakeWindowSystem, WindowCommand};
    use std::time::SystemTime;

    fn record() -> SwallowRecord {
        SwallowRecord::new(WindowId(42), WindowId(7), SystemTime::now())
            .with_parent_workspace(Some("3".to_string()))
    }

    #[tokio::test]
    async fn test_swallow_is_idempotent() {
        let windows = Arc::new(FakeWindowSystem::new());
        windows.insert(WindowHandle::new(WindowId(7), "Alacritty").with_workspace("3"));
        let actions = SwallowActions::new(windows.clone(), RestoreTarget::Origin);

        actions.swallow(&record()).await.unwrap();
        actions.swallow(&record()).await.unwrap();

        let parent = windows.get(WindowId(7)).unwrap();
        assert!(windows.is_in_holding(&parent));
    }

    #[tokio::test]
    async fn test_restore_to_origin_workspace() {
        let windows = Arc::new(FakeWindowSystem::new());
        windows.insert(WindowHandle::new(WindowId(7), "Alacritty").with_workspace("3"));
        windows.set_active_workspace("5");
        let actions = SwallowActions::new(windows.clone(), RestoreTarget::Origin);

        actions.swallow(&record()).await.unwrap();
        assert!(actions.restore(&record()).await);

        assert_eq!(
            windows.commands().last(),
            Some(&WindowCommand::Reveal(WindowId(7), "3".to_string()))
        );
    }

    #[tokio::test]
    async fn test_restore_to_current_workspace() {
        let windows = Arc::new(FakeWindowSystem::new());
        windows.insert(WindowHandle::new(WindowId(7), "Alacritty").with_workspace("3"));
        windows.set_active_workspace("5");
        let actions = SwallowActions::new(windows.clone(), RestoreTarget::Current);

        assert!(actions.restore(&record()).await);
        assert_eq!(windows.get(WindowId(7)).unwrap().workspace.as_deref(), Some("5"));
    }

    #[tokio::test]
    async fn test_restore_tolerates_vanished_parent() {
        let windows = Arc::new(FakeWindowSystem::new());
        let actions = SwallowActions::new(windows.clone(), RestoreTarget::Origin);

        assert!(!actions.restore(&record()).await);
        assert!(windows.reveals_of(WindowId(7)) == 0);
    }
}
