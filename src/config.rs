use anyhow::{Context, Result};
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

use crate::services::classifier::SwallowRules;

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    pub logging: LoggingConfig,
    pub swallow: SwallowConfig,
    pub backend: BackendConfig,
    pub state: StateConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SwallowConfig {
    pub enabled: bool,
    pub terminal_class_patterns: Vec<String>,
    #[serde(default)]
    pub exception_patterns: Vec<String>,
    pub swallow_delay_ms: u64,
    pub restore_on_close: bool,
    /// 0 отключает принудительное восстановление по возрасту записи
    pub gc_timeout_secs: u64,
    pub gc_interval_secs: u64,
    pub max_process_depth: usize,
    pub restore_to: String,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BackendConfig {
    pub kind: String,
    pub holding_workspace: String,
    pub ipc_timeout_ms: u64,
    pub reconnect_delay_ms: u64,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StateConfig {
    /// Пустая строка означает $XDG_RUNTIME_DIR/swallowd
    pub dir: String,
    pub mirror_registry: bool,
}

/// Куда возвращать терминал после закрытия поглотившего окна
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RestoreTarget {
    Origin,
    Current,
}

impl SwallowConfig {
    pub fn swallow_delay(&self) -> Duration {
        Duration::from_millis(self.swallow_delay_ms)
    }

    pub fn gc_timeout(&self) -> Option<Duration> {
        (self.gc_timeout_secs > 0).then(|| Duration::from_secs(self.gc_timeout_secs))
    }

    pub fn gc_interval(&self) -> Duration {
        Duration::from_secs(self.gc_interval_secs)
    }

    pub fn restore_target(&self) -> RestoreTarget {
        match self.restore_to.as_str() {
            "current" => RestoreTarget::Current,
            _ => RestoreTarget::Origin,
        }
    }
}

impl BackendConfig {
    pub fn ipc_timeout(&self) -> Duration {
        Duration::from_millis(self.ipc_timeout_ms)
    }

    pub fn reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.reconnect_delay_ms)
    }

    /// Сколько ждать остановки: каждый возврат терминала - до двух запросов IPC
    pub fn shutdown_budget(&self, active_swallows: usize) -> Duration {
        let per_record = self.ipc_timeout().saturating_mul(2);
        let records = u32::try_from(active_swallows).unwrap_or(u32::MAX);
        Duration::from_secs(5).saturating_add(per_record.saturating_mul(records))
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            logging: LoggingConfig {
                level: "info".to_string(),
                format: "compact".to_string(),
            },
            swallow: SwallowConfig {
                enabled: true,
                terminal_class_patterns: vec![
                    "^Alacritty$".to_string(),
                    "^kitty$".to_string(),
                    "^foot$".to_string(),
                    "^org\\.wezfurlong\\.wezterm$".to_string(),
                    "^st(-256color)?$".to_string(),
                ],
                exception_patterns: vec![
                    "^n?vim$".to_string(),
                    "^less$".to_string(),
                    "^dragon".to_string(),
                    "^Event Tester$".to_string(),
                ],
                swallow_delay_ms: 150,
                restore_on_close: true,
                gc_timeout_secs: 86_400,
                gc_interval_secs: 30,
                max_process_depth: 4,
                restore_to: "origin".to_string(),
            },
            backend: BackendConfig {
                kind: "auto".to_string(),
                holding_workspace: "swallow".to_string(),
                ipc_timeout_ms: 1000,
                reconnect_delay_ms: 2000,
            },
            state: StateConfig {
                dir: String::new(),
                mirror_registry: true,
            },
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(config_path: P) -> Result<Self> {
        let config_path = config_path.as_ref();

        // Файл не обязателен: недостающие поля берутся из значений по умолчанию
        let figment = Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed("SWALLOWD_").split("__"));

        let config: Config = figment
            .extract()
            .with_context(|| format!("Не удалось загрузить конфигурацию из {:?}", config_path))?;

        config.validate()?;

        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        // Валидация настроек логирования
        match self.logging.level.as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            _ => anyhow::bail!("Неверный уровень логирования: {}", self.logging.level),
        }

        match self.logging.format.as_str() {
            "compact" | "full" => {}
            _ => anyhow::bail!("Неверный формат логирования: {}", self.logging.format),
        }

        // Валидация настроек поглощения
        if self.swallow.gc_interval_secs == 0 {
            anyhow::bail!("gc_interval_secs должно быть больше 0");
        }

        if self.swallow.max_process_depth == 0 {
            anyhow::bail!("max_process_depth должно быть минимум 1");
        }

        match self.swallow.restore_to.as_str() {
            "origin" | "current" => {}
            _ => anyhow::bail!("Неверная цель восстановления: {}", self.swallow.restore_to),
        }

        // Паттерны компилируются здесь, чтобы ошибка в regex всплыла при загрузке
        SwallowRules::compile(&self.swallow)?;

        // Валидация настроек бэкенда
        match self.backend.kind.as_str() {
            "auto" | "hyprland" | "sway" => {}
            _ => anyhow::bail!("Неизвестный оконный менеджер: {}", self.backend.kind),
        }

        if self.backend.holding_workspace.trim().is_empty() {
            anyhow::bail!("holding_workspace не может быть пустым");
        }

        if self.backend.ipc_timeout_ms == 0 {
            anyhow::bail!("ipc_timeout_ms должно быть больше 0");
        }

        Ok(())
    }
}
