use crate::error::{Result, SwallowError};
use crate::events::WindowId;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::{Duration, SystemTime};
use tracing::warn;

/// Активное поглощение: окно `child` скрыло терминал `parent`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SwallowRecord {
    pub child: WindowId,
    pub parent: WindowId,
    /// Рабочий стол терминала до скрытия
    pub parent_workspace: Option<String>,
    pub created_at: SystemTime,
}

impl SwallowRecord {
    pub fn new(child: WindowId, parent: WindowId, created_at: SystemTime) -> Self {
        Self {
            child,
            parent,
            parent_workspace: None,
            created_at,
        }
    }

    pub fn with_parent_workspace(mut self, workspace: Option<String>) -> Self {
        self.parent_workspace = workspace;
        self
    }

    /// Возраст записи; часы, ушедшие назад, дают ноль
    pub fn age(&self, now: SystemTime) -> Duration {
        now.duration_since(self.created_at).unwrap_or(Duration::ZERO)
    }
}

/// Реестр активных поглощений, ключ - идентификатор дочернего окна.
///
/// Единственный источник истины во время работы демона. Все изменения идут
/// через внутреннюю блокировку; JSON-зеркало на диске нужно только для
/// диагностики (`swallowd status`) и никогда не читается обратно.
pub struct SwallowRegistry {
    records: RwLock<HashMap<WindowId, SwallowRecord>>,
    mirror: Option<PathBuf>,
}

impl Default for SwallowRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl SwallowRegistry {
    pub fn new() -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            mirror: None,
        }
    }

    pub fn with_mirror(path: impl Into<PathBuf>) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            mirror: Some(path.into()),
        }
    }

    /// Добавить запись. Существующая запись никогда не перезаписывается.
    pub fn add(&self, record: SwallowRecord) -> Result<()> {
        let mut records = self.records.write();

        if records.contains_key(&record.child) {
            return Err(SwallowError::DuplicateChild { child: record.child });
        }

        // Один терминал - одно поглощение
        if records.values().any(|r| r.parent == record.parent) {
            return Err(SwallowError::DuplicateParent { parent: record.parent });
        }

        records.insert(record.child, record);
        self.sync_mirror(&records);
        Ok(())
    }

    pub fn remove(&self, child: WindowId) -> Option<SwallowRecord> {
        let mut records = self.records.write();
        let removed = records.remove(&child);
        if removed.is_some() {
            self.sync_mirror(&records);
        }
        removed
    }

    pub fn find(&self, child: WindowId) -> Option<SwallowRecord> {
        self.records.read().get(&child).cloned()
    }

    pub fn find_by_parent(&self, parent: WindowId) -> Option<SwallowRecord> {
        self.records
            .read()
            .values()
            .find(|r| r.parent == parent)
            .cloned()
    }

    /// Снимок всех записей, старые первыми
    pub fn all(&self) -> Vec<SwallowRecord> {
        sorted(self.records.read().values().cloned().collect())
    }

    pub fn len(&self) -> usize {
        self.records.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.read().is_empty()
    }

    // Вызывается под блокировкой записи, чтобы порядок файлов совпадал с порядком изменений
    fn sync_mirror(&self, records: &HashMap<WindowId, SwallowRecord>) {
        let Some(path) = &self.mirror else {
            return;
        };
        let snapshot = sorted(records.values().cloned().collect());
        if let Err(e) = write_mirror(path, &snapshot) {
            warn!("Не удалось обновить зеркало реестра {:?}: {}", path, e);
        }
    }
}

fn sorted(mut records: Vec<SwallowRecord>) -> Vec<SwallowRecord> {
    records.sort_by_key(|r| (r.created_at, r.child));
    records
}

/// Записать зеркало реестра атомарно (через временный файл)
pub fn write_mirror(path: &Path, records: &[SwallowRecord]) -> Result<()> {
    if let Some(dir) = path.parent() {
        std::fs::create_dir_all(dir)?;
    }
    let tmp = path.with_extension("json.tmp");
    std::fs::write(&tmp, serde_json::to_vec_pretty(records)?)?;
    std::fs::rename(&tmp, path)?;
    Ok(())
}

/// Прочитать зеркало реестра. Отсутствующий файл - пустой реестр.
pub fn read_mirror(path: &Path) -> Result<Vec<SwallowRecord>> {
    match std::fs::read(path) {
        Ok(bytes) => Ok(serde_json::from_slice(&bytes)?),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Vec::new()),
        Err(e) => Err(e.into()),
    }
}
