use once_cell::sync::Lazy;
use parking_lot::Mutex;
use sysinfo::{Pid as SysinfoPid, ProcessesToUpdate, System};

/// Доступ к таблице процессов ОС. Отделён трейтом, чтобы резолвер
/// можно было проверять на подставной таблице.
pub trait ProcessTable: Send + Sync {
    /// PID родителя или `None`, если процесс не найден
    fn parent_pid(&self, pid: u32) -> Option<u32>;
}

// Общий экземпляр System, чтобы не пересоздавать его на каждое событие
static SYSTEM: Lazy<Mutex<System>> = Lazy::new(|| Mutex::new(System::new()));

/// Таблица процессов на основе sysinfo (читает /proc напрямую)
#[derive(Debug, Default)]
pub struct SysinfoProcessTable;

impl SysinfoProcessTable {
    pub fn new() -> Self {
        Self
    }
}

impl ProcessTable for SysinfoProcessTable {
    fn parent_pid(&self, pid: u32) -> Option<u32> {
        let pid_obj = SysinfoPid::from_u32(pid);
        let mut system = SYSTEM.lock();
        system.refresh_processes(ProcessesToUpdate::Some(&[pid_obj]), true);
        system
            .process(pid_obj)
            .and_then(|process| process.parent())
            .map(|parent| parent.as_u32())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_current_process_has_parent() {
        let table = SysinfoProcessTable::new();
        let parent = table.parent_pid(std::process::id());
        assert!(parent.is_some());
        assert_ne!(parent, Some(std::process::id()));
    }

    #[test]
    fn test_missing_process_has_no_parent() {
        let table = SysinfoProcessTable::new();
        assert_eq!(table.parent_pid(u32::MAX - 1), None);
    }
}
