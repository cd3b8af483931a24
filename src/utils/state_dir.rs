use crate::config::StateConfig;
use crate::error::Result;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Каталог состояния демона: маркер отключения и зеркало реестра
#[derive(Debug, Clone)]
pub struct StateDir {
    root: PathBuf,
}

impl StateDir {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Каталог из конфигурации, иначе $XDG_RUNTIME_DIR/swallowd
    pub fn resolve(config: &StateConfig) -> Self {
        if !config.dir.trim().is_empty() {
            return Self::new(&config.dir);
        }

        if let Ok(runtime_dir) = std::env::var("XDG_RUNTIME_DIR") {
            return Self::new(Path::new(&runtime_dir).join("swallowd"));
        }

        // Без XDG_RUNTIME_DIR разводим пользователей по имени
        let user = std::env::var("USER").unwrap_or_else(|_| "unknown".to_string());
        let fallback = std::env::temp_dir().join(format!("swallowd-{}", user));
        debug!("XDG_RUNTIME_DIR не задана, используем {:?}", fallback);
        Self::new(fallback)
    }

    pub fn path(&self) -> &Path {
        &self.root
    }

    pub fn registry_mirror(&self) -> PathBuf {
        self.root.join("registry.json")
    }

    /// Записи, оставшиеся от прерванного запуска; их разбирает `cleanup`
    pub fn stale_registry(&self) -> PathBuf {
        self.root.join("registry.stale.json")
    }

    fn disabled_marker(&self) -> PathBuf {
        self.root.join("disabled")
    }

    /// Не отключено ли поглощение командой `toggle`
    pub fn is_enabled(&self) -> bool {
        !self.disabled_marker().exists()
    }

    pub fn set_enabled(&self, enabled: bool) -> Result<()> {
        let marker = self.disabled_marker();
        if enabled {
            match fs::remove_file(&marker) {
                Ok(()) => {}
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        } else {
            fs::create_dir_all(&self.root)?;
            fs::write(&marker, b"")?;
        }
        info!(
            "Поглощение {}",
            if enabled { "включено" } else { "выключено" }
        );
        Ok(())
    }

    /// Переключить состояние; возвращает новое значение
    pub fn toggle(&self) -> Result<bool> {
        let enabled = !self.is_enabled();
        self.set_enabled(enabled)?;
        Ok(enabled)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_toggle_flips_marker() {
        let dir = tempfile::tempdir().unwrap();
        let state = StateDir::new(dir.path().join("swallowd"));

        assert!(state.is_enabled());
        assert!(!state.toggle().unwrap());
        assert!(!state.is_enabled());
        assert!(state.toggle().unwrap());
        assert!(state.is_enabled());

        // Повторное включение не ошибка
        state.set_enabled(true).unwrap();
        assert!(state.is_enabled());
    }

    #[test]
    fn test_configured_dir_wins() {
        let config = StateConfig {
            dir: "/var/tmp/custom".to_string(),
            mirror_registry: true,
        };
        let state = StateDir::resolve(&config);
        assert_eq!(state.path(), Path::new("/var/tmp/custom"));
        assert_eq!(state.registry_mirror(), Path::new("/var/tmp/custom/registry.json"));
        assert_eq!(state.stale_registry(), Path::new("/var/tmp/custom/registry.stale.json"));
    }
}
