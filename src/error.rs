use crate::events::WindowId;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum SwallowError {
    #[error("Ошибка конфигурации: {0}")]
    Config(#[from] anyhow::Error),

    #[error("Ошибка ввода-вывода: {0}")]
    Io(#[from] std::io::Error),

    #[error("Ошибка разбора JSON: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Метаданные окна недоступны: {0}")]
    MetadataUnavailable(String),

    #[error("Окно {child} уже поглотило терминал")]
    DuplicateChild { child: WindowId },

    #[error("Терминал {parent} уже скрыт другим окном")]
    DuplicateParent { parent: WindowId },

    #[error("Команда оконному менеджеру не выполнена: {0}")]
    ActionFailed(String),

    #[error("Ошибка IPC: {0}")]
    Ipc(String),

    #[error("Сервис недоступен: {0}")]
    ServiceUnavailable(String),
}

impl SwallowError {
    pub fn metadata_unavailable<T>(msg: impl Into<String>) -> Result<T> {
        Err(SwallowError::MetadataUnavailable(msg.into()))
    }
}

pub type Result<T> = std::result::Result<T, SwallowError>;

// Удобные макросы для создания ошибок
#[macro_export]
macro_rules! swallow_error {
    (metadata, $($arg:tt)*) => {
        $crate::error::SwallowError::MetadataUnavailable(format!($($arg)*))
    };
    (action, $($arg:tt)*) => {
        $crate::error::SwallowError::ActionFailed(format!($($arg)*))
    };
    (ipc, $($arg:tt)*) => {
        $crate::error::SwallowError::Ipc(format!($($arg)*))
    };
    (service_unavailable, $($arg:tt)*) => {
        $crate::error::SwallowError::ServiceUnavailable(format!($($arg)*))
    };
}
