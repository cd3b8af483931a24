use crate::config::BackendConfig;
use crate::error::Result;
use crate::services::process_table::{ProcessTable, SysinfoProcessTable};
use crate::swallow_error;
use std::sync::Arc;
use tokio::time::Duration;
use tracing::info;

use super::dry_run::{DryRunEventSource, FakeProcessTable, FakeWindowSystem};
use super::hyprland::{HyprlandEventSource, HyprlandSockets, HyprlandWindowSystem};
use super::sway::{self, SwayEventSource, SwayWindowSystem};
use super::r#trait::{EventSource, WindowSystem};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compositor {
    Hyprland,
    Sway,
}

/// Всё, что нужно монитору от окружения
pub struct Backend {
    pub windows: Arc<dyn WindowSystem>,
    pub processes: Arc<dyn ProcessTable>,
    pub events: Box<dyn EventSource>,
}

fn detect_compositor<F>(kind: &str, env: F) -> Result<Compositor>
where
    F: Fn(&str) -> Option<String>,
{
    match kind {
        "hyprland" => return Ok(Compositor::Hyprland),
        "sway" => return Ok(Compositor::Sway),
        _ => {}
    }

    if env("HYPRLAND_INSTANCE_SIGNATURE").is_some() {
        return Ok(Compositor::Hyprland);
    }

    if env("SWAYSOCK").is_some() {
        return Ok(Compositor::Sway);
    }

    if let Some(desktop) = env("XDG_CURRENT_DESKTOP") {
        match desktop.to_lowercase().as_str() {
            d if d.contains("hyprland") => return Ok(Compositor::Hyprland),
            d if d.contains("sway") => return Ok(Compositor::Sway),
            _ => {}
        }
    }

    Err(swallow_error!(
        service_unavailable,
        "не удалось определить оконный менеджер (поддерживаются Hyprland и Sway)"
    ))
}

/// Собрать бэкенд по конфигурации; в dry-run всё эмулируется в памяти
pub fn create_backend(config: &BackendConfig, dry_run: bool) -> Result<Backend> {
    if dry_run {
        let windows = Arc::new(FakeWindowSystem::new());
        let processes = Arc::new(FakeProcessTable::new());
        let events = DryRunEventSource::new(windows.clone(), processes.clone(), Duration::from_secs(10));
        info!("Используем эмулируемый оконный менеджер");
        return Ok(Backend {
            windows,
            processes,
            events: Box::new(events),
        });
    }

    let compositor = detect_compositor(&config.kind, |name| std::env::var(name).ok())?;
    info!("Обнаружен оконный менеджер: {:?}", compositor);

    let processes: Arc<dyn ProcessTable> = Arc::new(SysinfoProcessTable::new());

    match compositor {
        Compositor::Hyprland => {
            let sockets = HyprlandSockets::from_env()?;
            Ok(Backend {
                windows: Arc::new(HyprlandWindowSystem::new(
                    sockets.clone(),
                    &config.holding_workspace,
                    config.ipc_timeout(),
                )),
                processes,
                events: Box::new(HyprlandEventSource::new(sockets, config.reconnect_delay())),
            })
        }
        Compositor::Sway => {
            let socket = sway::socket_from_env()?;
            Ok(Backend {
                windows: Arc::new(SwayWindowSystem::new(socket.clone(), config.ipc_timeout())),
                processes,
                events: Box::new(SwayEventSource::new(socket, config.reconnect_delay())),
            })
        }
    }
}
