use std::collections::BTreeMap;
use std::fs;
use std::path::PathBuf;

use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::domain::{DetectedTool, DomainError};
use crate::ports::ToolCache;

#[derive(Debug, Default, Clone, Serialize, Deserialize)]
struct CacheFile {
    #[serde(default)]
    last_full_scan: Option<DateTime<Utc>>,
    #[serde(default)]
    tools: BTreeMap<String, DetectedTool>,
}

/// Tool cache persisted as a single JSON document.
///
/// Writes only touch memory; `save` flushes the whole document.
pub struct JsonToolCache {
    path: PathBuf,
    state: RwLock<CacheFile>,
    /// Held across write and rename of the shared temp file.
    save_lock: Mutex<()>,
}

impl JsonToolCache {
    /// Open the cache at `path`. A missing or unreadable file starts empty.
    pub fn open(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let state = match fs::read_to_string(&path) {
            Ok(content) => match serde_json::from_str::<CacheFile>(&content) {
                Ok(file) => {
                    debug!(path = ?path, tools = file.tools.len(), "Tool cache loaded");
                    file
                }
                Err(e) => {
                    warn!(path = ?path, error = %e, "Tool cache is corrupt, starting empty");
                    CacheFile::default()
                }
            },
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => CacheFile::default(),
            Err(e) => {
                warn!(path = ?path, error = %e, "Tool cache unreadable, starting empty");
                CacheFile::default()
            }
        };

        Self {
            path,
            state: RwLock::new(state),
            save_lock: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &PathBuf {
        &self.path
    }
}

impl ToolCache for JsonToolCache {
    fn get(&self, id: &str) -> Option<DetectedTool> {
        self.state.read().tools.get(id).cloned()
    }

    fn all(&self) -> Vec<DetectedTool> {
        self.state.read().tools.values().cloned().collect()
    }

    fn set_tool(&self, tool: DetectedTool) {
        self.state.write().tools.insert(tool.id.clone(), tool);
    }

    fn mark_scanned(&self) {
        self.state.write().last_full_scan = Some(Utc::now());
    }

    fn last_full_scan(&self) -> Option<DateTime<Utc>> {
        self.state.read().last_full_scan
    }

    fn save(&self) -> Result<(), DomainError> {
        let _saving = self.save_lock.lock();
        let content = {
            let state = self.state.read();
            serde_json::to_string_pretty(&*state)?
        };

        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        fs::write(&tmp, content)?;
        fs::rename(&tmp, &self.path)?;

        debug!(path = ?self.path, "Tool cache saved");
        Ok(())
    }

    fn invalidate(&self) {
        *self.state.write() = CacheFile::default();
        info!(path = ?self.path, "Tool cache invalidated");
    }
}
