use std::sync::Arc;
use std::time::Instant;

use thinkdrop_config::AppConfig;
use thinkdrop_db::{ContextRuleStore, SkillPromptStore, SkillRegistry};
use thinkdrop_memory::{MemoryService, RetentionController};
use thinkdrop_observer::ScreenMonitor;

use crate::metrics::ActionMetrics;

/// Shared application state available to every request handler.
pub struct AppState {
    pub config: AppConfig,
    pub service: Arc<MemoryService>,
    pub skill_prompts: Arc<SkillPromptStore>,
    pub context_rules: Arc<ContextRuleStore>,
    pub skills: Arc<SkillRegistry>,
    pub monitor: Option<Arc<ScreenMonitor>>,
    pub retention: Option<Arc<RetentionController>>,
    pub metrics: ActionMetrics,
    pub started_at: Instant,
}

impl AppState {
    pub fn uptime_secs(&self) -> u64 {
        self.started_at.elapsed().as_secs()
    }
}

pub type SharedState = Arc<AppState>;
