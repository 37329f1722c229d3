use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use thinkdrop_common::Result;
use thinkdrop_config::AppConfig;
use thinkdrop_db::{ContextRuleStore, Database, MemoryStore, SkillPromptStore, SkillRegistry};
use thinkdrop_embed::{Embedder, EmbeddingBackend};
use thinkdrop_memory::{MemoryService, RetentionController};
use thinkdrop_observer::ScreenMonitor;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::metrics::ActionMetrics;
use crate::server::GatewayServer;
use crate::state::{AppState, SharedState};

/// The assembled process: shared state, background tasks, and the shutdown
/// signal that winds everything down in order.
pub struct Application {
    state: SharedState,
    shutdown_tx: watch::Sender<bool>,
    monitor_task: Option<JoinHandle<()>>,
    retention_task: Option<JoinHandle<()>>,
}

impl Application {
    /// Build every component: open the store (with the lock-retry schedule),
    /// wire the embedder, start the monitor and retention loops when
    /// configured. `screens_dir` is where captured PNGs are persisted.
    pub async fn build(
        config: AppConfig,
        backend: Arc<dyn EmbeddingBackend>,
        screens_dir: Option<PathBuf>,
    ) -> Result<Self> {
        let db = Arc::new(Database::open_with_retry(&config.database.path).await?);
        let store = Arc::new(MemoryStore::new(Arc::clone(&db)));

        // Startup guarantee: the index reflects exactly the embedded rows.
        let indexed = store.rebuild_index()?;
        if indexed > 0 {
            info!("ANN index ready with {indexed} vectors");
        }

        let embedder = Arc::new(Embedder::new(
            backend,
            config.embedding.cache_size,
            Duration::from_millis(config.embedding.cache_ttl_ms),
        ));

        let service = Arc::new(MemoryService::new(
            Arc::clone(&store),
            Arc::clone(&embedder),
            config.search.min_similarity,
            config.search.max_age_days,
        ));

        let skill_prompts = Arc::new(SkillPromptStore::new(Arc::clone(&db)));
        let context_rules = Arc::new(ContextRuleStore::new(Arc::clone(&db)));
        let skills = Arc::new(SkillRegistry::new(
            Arc::clone(&db),
            SkillRegistry::default_sandbox_dir(),
        ));

        let (shutdown_tx, shutdown_rx) = watch::channel(false);

        let monitor = if config.monitor.enabled {
            build_monitor(&config, &store, &embedder, screens_dir)?
        } else {
            None
        };
        let monitor_task = monitor.as_ref().map(|monitor| {
            tokio::spawn(Arc::clone(monitor).run(shutdown_rx.clone()))
        });

        let retention = if config.retention.enabled {
            Some(Arc::new(RetentionController::new(
                Arc::clone(&store),
                config.retention.clone(),
            )))
        } else {
            None
        };
        let retention_task = retention.as_ref().map(|retention| {
            tokio::spawn(Arc::clone(retention).run(shutdown_rx.clone()))
        });

        let state = Arc::new(AppState {
            config,
            service,
            skill_prompts,
            context_rules,
            skills,
            monitor,
            retention,
            metrics: ActionMetrics::new(),
            started_at: Instant::now(),
        });

        Ok(Self {
            state,
            shutdown_tx,
            monitor_task,
            retention_task,
        })
    }

    pub fn state(&self) -> SharedState {
        Arc::clone(&self.state)
    }

    pub fn shutdown_receiver(&self) -> watch::Receiver<bool> {
        self.shutdown_tx.subscribe()
    }

    /// Run the HTTP server until `shutdown` is called (or ctrl-c handling in
    /// the binary flips the signal).
    pub async fn serve(&self) -> Result<()> {
        let server = GatewayServer::new(self.state());
        server.run(self.shutdown_receiver()).await
    }

    /// Signal shutdown and wind down in order: monitor first, then the
    /// retention final check, then a store checkpoint.
    pub async fn shutdown(self) {
        info!("shutting down");
        let _ = self.shutdown_tx.send(true);

        if let Some(task) = self.monitor_task
            && task.await.is_err()
        {
            warn!("monitor task ended abnormally");
        }
        if let Some(task) = self.retention_task
            && task.await.is_err()
        {
            warn!("retention task ended abnormally");
        }

        if let Err(e) = self.state.service.store_handle().database().checkpoint() {
            warn!("final checkpoint failed: {e}");
        }
        info!("shutdown complete");
    }
}

#[cfg(feature = "desktop")]
fn build_monitor(
    config: &AppConfig,
    store: &Arc<MemoryStore>,
    embedder: &Arc<Embedder>,
    screens_dir: Option<PathBuf>,
) -> Result<Option<Arc<ScreenMonitor>>> {
    use thinkdrop_observer::{
        NeverIdle, OcrPipeline, PrimaryDisplaySource, TesseractEngine,
    };

    let ocr = Arc::new(OcrPipeline::new(Arc::new(TesseractEngine::new()?)));
    let monitor = Arc::new(ScreenMonitor::new(
        Arc::clone(store),
        Arc::clone(embedder),
        Arc::new(PrimaryDisplaySource),
        Arc::new(desktop::StaticWindowProbe),
        Arc::new(NeverIdle),
        ocr,
        config.monitor.clone(),
        screens_dir,
    ));
    Ok(Some(monitor))
}

#[cfg(not(feature = "desktop"))]
fn build_monitor(
    _config: &AppConfig,
    _store: &Arc<MemoryStore>,
    _embedder: &Arc<Embedder>,
    _screens_dir: Option<PathBuf>,
) -> Result<Option<Arc<ScreenMonitor>>> {
    warn!("screen monitor enabled in config but this build lacks the `desktop` feature");
    Ok(None)
}

#[cfg(feature = "desktop")]
mod desktop {
    use thinkdrop_common::Result;
    use thinkdrop_observer::{ActiveWindowProbe, WindowInfo};

    /// Window probe for platforms without a foreground-window API wired up.
    /// The constant title routes every capture decision through pixel diff.
    pub struct StaticWindowProbe;

    impl ActiveWindowProbe for StaticWindowProbe {
        fn active_window(&self) -> Result<WindowInfo> {
            Ok(WindowInfo {
                app_name: "desktop".to_string(),
                window_title: "screen".to_string(),
            })
        }
    }
}
