use crate::error::Result;
use crate::events::{WindowHandle, WindowId};
use crate::services::registry::{read_mirror, write_mirror, SwallowRecord};
use crate::services::window_system::WindowSystem;
use crate::utils::StateDir;
use std::collections::HashSet;
use std::path::Path;
use tracing::{info, warn};

/// Итог `swallowd cleanup`
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct CleanupReport {
    pub hidden: usize,
    pub restored: usize,
}

/// Перенести записи прошлого запуска из зеркала в файл остатков и сбросить зеркало.
///
/// Возвращает число записей, ожидающих `cleanup`. Остатки пишутся раньше,
/// чем очищается зеркало, поэтому повторный сбой ничего не теряет.
pub fn carry_over_stale(state: &StateDir) -> Result<usize> {
    let mirror = state.registry_mirror();
    let stale_path = state.stale_registry();

    let leftover = read_mirror(&mirror)?;
    let mut stale = read_mirror(&stale_path)?;
    for record in leftover {
        if !stale.iter().any(|r| r.child == record.child) {
            stale.push(record);
        }
    }

    if !stale.is_empty() {
        write_mirror(&stale_path, &stale)?;
    }
    write_mirror(&mirror, &[])?;
    Ok(stale.len())
}

/// Все известные поглощения: текущее зеркало и остатки прошлых запусков
pub fn recorded_swallows(state: &StateDir) -> Vec<SwallowRecord> {
    let mut records = Vec::new();
    for path in [state.registry_mirror(), state.stale_registry()] {
        match read_mirror(&path) {
            Ok(mut found) => records.append(&mut found),
            Err(e) => warn!("Не удалось прочитать записи поглощений {:?}: {}", path, e),
        }
    }
    records
}

/// Окна в области хранения, которые можно вернуть.
/// Из общей области берутся только терминалы, скрытые демоном.
pub async fn hidden_windows(
    windows: &dyn WindowSystem,
    recorded: &[SwallowRecord],
) -> Result<Vec<WindowHandle>> {
    Ok(windows
        .list_windows()
        .await?
        .into_iter()
        .filter(|w| windows.is_in_holding(w))
        .filter(|w| windows.dedicated_holding() || recorded.iter().any(|r| r.parent == w.id))
        .collect())
}

/// Вернуть все скрытые терминалы на текущий рабочий стол.
///
/// Записи о терминалах, которые вернуть не удалось, остаются в файле
/// остатков для следующей попытки.
pub async fn cleanup(windows: &dyn WindowSystem, state: &StateDir) -> Result<CleanupReport> {
    let recorded = recorded_swallows(state);
    let hidden = hidden_windows(windows, &recorded).await?;
    let mut report = CleanupReport {
        hidden: hidden.len(),
        restored: 0,
    };

    let mut failed = HashSet::new();
    if !hidden.is_empty() {
        let target = windows.active_workspace().await?;
        for window in &hidden {
            match windows.reveal(window.id, &target).await {
                Ok(()) => report.restored += 1,
                Err(e) => {
                    warn!("Не удалось вернуть {}: {}", window, e);
                    failed.insert(window.id);
                }
            }
        }
    }

    let remaining: Vec<SwallowRecord> = recorded
        .into_iter()
        .filter(|r| failed.contains(&r.parent))
        .collect();
    write_mirror(&state.registry_mirror(), &[])?;
    write_mirror(&state.stale_registry(), &remaining)?;

    info!("Cleanup: возвращено {} из {}", report.restored, report.hidden);
    Ok(report)
}

/// Вернуть окно на текущий рабочий стол и забыть все записи о нём.
/// Возвращает имя рабочего стола.
pub async fn restore_window(
    windows: &dyn WindowSystem,
    state: &StateDir,
    id: WindowId,
) -> Result<String> {
    let target = windows.active_workspace().await?;
    windows.reveal(id, &target).await?;

    for path in [state.registry_mirror(), state.stale_registry()] {
        forget(&path, id)?;
    }
    Ok(target)
}

fn forget(path: &Path, id: WindowId) -> Result<()> {
    let mut records = read_mirror(path)?;
    let before = records.len();
    records.retain(|r| r.child != id && r.parent != id);
    if records.len() != before {
        write_mirror(path, &records)?;
    }
    Ok(())
}
