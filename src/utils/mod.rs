pub mod state_dir;

pub use state_dir::StateDir;

// Отладочный лог без форматирования аргументов, когда DEBUG выключен
#[macro_export]
macro_rules! debug_if_enabled {
    ($($arg:tt)*) => {
        if tracing::enabled!(tracing::Level::DEBUG) {
            tracing::debug!($($arg)*);
        }
    };
}
