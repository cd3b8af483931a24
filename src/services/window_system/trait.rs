use crate::error::Result;
use crate::events::{WindowEvent, WindowHandle, WindowId};
use tokio::sync::mpsc;

/// Запросы и команды к оконному менеджеру
#[async_trait::async_trait]
pub trait WindowSystem: Send + Sync {
    fn name(&self) -> &'static str;

    /// Снимок окна по идентификатору; `MetadataUnavailable`, если окна нет
    async fn window(&self, id: WindowId) -> Result<WindowHandle>;

    /// Все окна верхнего уровня вместе с PID владельца
    async fn list_windows(&self) -> Result<Vec<WindowHandle>>;

    /// Имя рабочего стола, который сейчас перед пользователем
    async fn active_workspace(&self) -> Result<String>;

    /// Спрятать окно в область хранения. Повторный вызов безвреден.
    async fn move_to_holding(&self, id: WindowId) -> Result<()>;

    /// Вернуть окно на рабочий стол `workspace`
    async fn reveal(&self, id: WindowId, workspace: &str) -> Result<()>;

    /// Находится ли окно сейчас в области хранения
    fn is_in_holding(&self, window: &WindowHandle) -> bool;

    /// Принадлежит ли область хранения только нам (иначе там живут и чужие окна)
    fn dedicated_holding(&self) -> bool {
        true
    }
}

/// Источник событий жизненного цикла окон
#[async_trait::async_trait]
pub trait EventSource: Send {
    /// Передаёт события в канал, пока жив получатель
    async fn run(self: Box<Self>, tx: mpsc::Sender<WindowEvent>) -> Result<()>;
}
