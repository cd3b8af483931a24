use crate::debug_if_enabled;
use crate::events::WindowHandle;
use crate::services::process_table::ProcessTable;
use crate::services::window_system::WindowSystem;
use smallvec::SmallVec;
use std::sync::Arc;
use tracing::debug;

/// Ищет окно терминала, из которого было запущено новое окно.
///
/// Поднимается по дереву процессов от владельца окна: терминал обычно
/// является родителем оболочки, а не самой программы, поэтому проверяется
/// до `max_depth` предков.
pub struct ProcessTreeResolver {
    windows: Arc<dyn WindowSystem>,
    processes: Arc<dyn ProcessTable>,
    max_depth: usize,
}

impl ProcessTreeResolver {
    pub fn new(
        windows: Arc<dyn WindowSystem>,
        processes: Arc<dyn ProcessTable>,
        max_depth: usize,
    ) -> Self {
        Self {
            windows,
            processes,
            max_depth: max_depth.max(1),
        }
    }

    /// Цепочка предков процесса `pid`, ближайший первым
    fn ancestors(&self, pid: u32) -> SmallVec<[u32; 4]> {
        let mut chain = SmallVec::new();
        let mut current = pid;

        while chain.len() < self.max_depth {
            let Some(parent) = self.processes.parent_pid(current) else {
                break;
            };
            // init и idle не бывают терминалами; повтор означает цикл
            if parent <= 1 || parent == pid || chain.contains(&parent) {
                break;
            }
            chain.push(parent);
            current = parent;
        }

        chain
    }

    pub async fn find_parent_window(&self, child: &WindowHandle) -> Option<WindowHandle> {
        let Some(child_pid) = child.pid else {
            debug!("У окна {} нет PID, родителя не ищем", child);
            return None;
        };

        let ancestors = self.ancestors(child_pid);
        if ancestors.is_empty() {
            debug!("Родительский процесс для PID {} не найден", child_pid);
            return None;
        }

        let windows = match self.windows.list_windows().await {
            Ok(windows) => windows,
            Err(e) => {
                debug!("Не удалось получить список окон: {}", e);
                return None;
            }
        };

        debug_if_enabled!("Предки PID {}: {:?}", child_pid, ancestors);

        for pid in ancestors {
            let candidate = windows.iter().find(|w| {
                w.pid == Some(pid) && w.id != child.id && !self.windows.is_in_holding(w)
            });
            if let Some(parent) = candidate {
                debug!("Окно {} запущено из {}", child, parent);
                return Some(parent.clone());
            }
        }

        debug!("Окно-родитель для {} не найдено", child);
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::WindowId;
    use crate::services::window_system::dry_run::{FakeProcessTable, FakeWindowSystem};

    fn setup(depth: usize) -> (Arc<FakeWindowSystem>, Arc<FakeProcessTable>, ProcessTreeResolver) {
        let windows = Arc::new(FakeWindowSystem::new());
        let processes = Arc::new(FakeProcessTable::new());
        let resolver = ProcessTreeResolver::new(windows.clone(), processes.clone(), depth);
        (windows, processes, resolver)
    }

    #[tokio::test]
    async fn test_finds_terminal_through_shell() {
        let (windows, processes, resolver) = setup(4);
        windows.insert(WindowHandle::new(WindowId(7), "Alacritty").with_pid(100));
        // alacritty(100) -> zsh(101) -> firefox(102)
        processes.insert(101, 100);
        processes.insert(102, 101);

        let child = WindowHandle::new(WindowId(42), "firefox").with_pid(102);
        windows.insert(child.clone());

        let parent = resolver.find_parent_window(&child).await.unwrap();
        assert_eq!(parent.id, WindowId(7));
    }

    #[tokio::test]
    async fn test_depth_one_only_checks_direct_parent() {
        let (windows, processes, resolver) = setup(1);
        windows.insert(WindowHandle::new(WindowId(7), "Alacritty").with_pid(100));
        processes.insert(101, 100);
        processes.insert(102, 101);

        let child = WindowHandle::new(WindowId(42), "firefox").with_pid(102);
        assert!(resolver.find_parent_window(&child).await.is_none());

        let direct = WindowHandle::new(WindowId(43), "mpv").with_pid(101);
        assert_eq!(resolver.find_parent_window(&direct).await.unwrap().id, WindowId(7));
    }

    #[tokio::test]
    async fn test_missing_metadata_yields_no_candidate() {
        let (windows, processes, resolver) = setup(4);
        windows.insert(WindowHandle::new(WindowId(7), "Alacritty").with_pid(100));
        processes.insert(102, 100);

        let no_pid = WindowHandle::new(WindowId(42), "firefox");
        assert!(resolver.find_parent_window(&no_pid).await.is_none());

        let orphan = WindowHandle::new(WindowId(43), "firefox").with_pid(555);
        assert!(resolver.find_parent_window(&orphan).await.is_none());
    }

    #[tokio::test]
    async fn test_skips_windows_in_holding_area() {
        let (windows, processes, resolver) = setup(4);
        windows.insert(
            WindowHandle::new(WindowId(7), "Alacritty")
                .with_pid(100)
                .with_workspace(FakeWindowSystem::HOLDING),
        );
        processes.insert(102, 100);

        let child = WindowHandle::new(WindowId(42), "firefox").with_pid(102);
        assert!(resolver.find_parent_window(&child).await.is_none());
    }

    #[tokio::test]
    async fn test_process_cycle_terminates() {
        let (windows, processes, resolver) = setup(8);
        windows.insert(WindowHandle::new(WindowId(7), "Alacritty").with_pid(100));
        processes.insert(102, 103);
        processes.insert(103, 102);

        let child = WindowHandle::new(WindowId(42), "firefox").with_pid(102);
        assert!(resolver.find_parent_window(&child).await.is_none());
    }
}
