use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Идентификатор окна в оконном менеджере (адрес Hyprland или con_id Sway)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct WindowId(pub u64);

impl WindowId {
    pub fn value(&self) -> u64 {
        self.0
    }

    /// Разобрать шестнадцатеричный адрес без префикса (формат событий Hyprland)
    pub fn from_hex(raw: &str) -> Option<Self> {
        let raw = raw.trim();
        let digits = raw.strip_prefix("0x").unwrap_or(raw);
        u64::from_str_radix(digits, 16).ok().map(Self)
    }
}

impl fmt::Display for WindowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:x}", self.0)
    }
}

impl FromStr for WindowId {
    type Err = String;

    /// `0x`-префикс означает шестнадцатеричную запись, иначе десятичная
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => s.parse::<u64>(),
        };
        parsed
            .map(Self)
            .map_err(|e| format!("Неверный идентификатор окна '{}': {}", s, e))
    }
}

/// Снимок состояния окна на момент запроса. После получения не изменяется.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WindowHandle {
    pub id: WindowId,
    pub class: String,
    pub instance: String,
    pub title: String,
    pub pid: Option<u32>,
    pub workspace: Option<String>,
}

impl WindowHandle {
    pub fn new(id: WindowId, class: impl Into<String>) -> Self {
        Self {
            id,
            class: class.into(),
            instance: String::new(),
            title: String::new(),
            pid: None,
            workspace: None,
        }
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }

    pub fn with_title(mut self, title: impl Into<String>) -> Self {
        self.title = title.into();
        self
    }

    pub fn with_pid(mut self, pid: u32) -> Self {
        self.pid = Some(pid);
        self
    }

    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspace = Some(workspace.into());
        self
    }
}

impl fmt::Display for WindowHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.title.is_empty() {
            write!(f, "{} ({})", self.id, self.class)
        } else {
            write!(f, "{} \"{}\" ({})", self.id, self.title, self.class)
        }
    }
}

/// Тип события жизненного цикла окна
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WindowEventKind {
    Created,
    Closed,
}

/// Событие из потока оконного менеджера
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowEvent {
    pub kind: WindowEventKind,
    pub window_id: WindowId,
    pub class: String,
    pub instance: String,
    pub title: String,
    pub timestamp: std::time::Instant,
}

impl WindowEvent {
    pub fn created(window_id: WindowId, class: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            kind: WindowEventKind::Created,
            window_id,
            class: class.into(),
            instance: String::new(),
            title: title.into(),
            timestamp: std::time::Instant::now(),
        }
    }

    pub fn closed(window_id: WindowId) -> Self {
        Self {
            kind: WindowEventKind::Closed,
            window_id,
            class: String::new(),
            instance: String::new(),
            title: String::new(),
            timestamp: std::time::Instant::now(),
        }
    }

    pub fn with_instance(mut self, instance: impl Into<String>) -> Self {
        self.instance = instance.into();
        self
    }
}

impl fmt::Display for WindowEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            WindowEventKind::Created => write!(
                f,
                "Created {} \"{}\" ({}/{}) ({}ms ago)",
                self.window_id,
                self.title,
                self.class,
                self.instance,
                self.timestamp.elapsed().as_millis()
            ),
            WindowEventKind::Closed => write!(
                f,
                "Closed {} ({}ms ago)",
                self.window_id,
                self.timestamp.elapsed().as_millis()
            ),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_window_handle_creation() {
        let window = WindowHandle::new(WindowId(42), "firefox")
            .with_title("Mozilla Firefox")
            .with_pid(1234)
            .with_workspace("2");

        assert_eq!(window.class, "firefox");
        assert_eq!(window.title, "Mozilla Firefox");
        assert_eq!(window.pid, Some(1234));
        assert_eq!(window.workspace.as_deref(), Some("2"));
    }

    #[test]
    fn test_window_id_parsing() {
        assert_eq!("0x2a".parse::<WindowId>().unwrap(), WindowId(42));
        assert_eq!("42".parse::<WindowId>().unwrap(), WindowId(42));
        assert!("ghost".parse::<WindowId>().is_err());

        assert_eq!(WindowId::from_hex("55d0c8a1b2c0"), Some(WindowId(0x55d0c8a1b2c0)));
        assert_eq!(WindowId::from_hex("0x2a"), Some(WindowId(42)));
        assert_eq!(WindowId(42).to_string(), "0x2a");
    }

    #[test]
    fn test_window_event_creation() {
        let event = WindowEvent::created(WindowId(7), "Alacritty", "zsh").with_instance("alacritty");
        assert_eq!(event.kind, WindowEventKind::Created);
        assert_eq!(event.instance, "alacritty");

        let closed = WindowEvent::closed(WindowId(7));
        assert_eq!(closed.kind, WindowEventKind::Closed);
        assert!(closed.class.is_empty());
    }
}
