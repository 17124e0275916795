use chrono::{DateTime, Utc};

use crate::domain::{DetectedTool, DomainError};

/// Cross-session store of the last detection result per tool.
pub trait ToolCache: Send + Sync {
    fn get(&self, id: &str) -> Option<DetectedTool>;

    fn all(&self) -> Vec<DetectedTool>;

    fn set_tool(&self, tool: DetectedTool);

    /// Record that a full scan just completed.
    fn mark_scanned(&self);

    fn last_full_scan(&self) -> Option<DateTime<Utc>>;

    /// Persist the current contents.
    fn save(&self) -> Result<(), DomainError>;

    /// Drop every entry, e.g. after a tool was installed or removed.
    fn invalidate(&self);
}
