use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde::Serialize;
use thinkdrop_common::{Error, Result, memory_id};
use thinkdrop_config::MonitorConfig;
use thinkdrop_db::{MemoryStore, NewEntity, NewMemoryRecord, RecordType};
use thinkdrop_embed::Embedder;
use tokio::sync::watch;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::capture::{ActiveWindowProbe, IdleProbe, ScreenSource};
use crate::diff::pixel_diff_ratio;
use crate::ocr::OcrPipeline;
use crate::textproc;

/// OCR output shorter than this is treated as an empty screen.
const MIN_OCR_TEXT_CHARS: usize = 10;
/// Captured text is truncated to this many characters before embedding.
const MAX_EMBED_TEXT_CHARS: usize = 2000;
/// How long `stop` waits for an in-flight tick.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, Copy, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct MonitorCounters {
    pub ticks: u64,
    pub captures: u64,
    pub skips: u64,
    pub errors: u64,
    pub overruns: u64,
}

#[derive(Default)]
struct AtomicCounters {
    ticks: AtomicU64,
    captures: AtomicU64,
    skips: AtomicU64,
    errors: AtomicU64,
    overruns: AtomicU64,
}

impl AtomicCounters {
    fn snapshot(&self) -> MonitorCounters {
        MonitorCounters {
            ticks: self.ticks.load(Ordering::Relaxed),
            captures: self.captures.load(Ordering::Relaxed),
            skips: self.skips.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
            overruns: self.overruns.load(Ordering::Relaxed),
        }
    }
}

/// Why a tick ended without inserting a record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    Captured { memory_id: String },
    SkippedIdle,
    SkippedUnchangedPixels,
    SkippedShortText,
    SkippedSameText,
}

/// The observer's full mutable state between ticks.
#[derive(Default)]
struct ObserverState {
    last_app_name: Option<String>,
    last_window_title: Option<String>,
    last_screenshot_png: Option<Vec<u8>>,
}

/// Watches the desktop: on each tick, decides via window title and pixel
/// diff whether the screen changed, OCRs it, dedups by text hash, and stores
/// the result as a `screen_capture` record.
///
/// Ticks are strictly serialised. A tick that overruns the interval causes
/// the next firing to be dropped, not queued.
pub struct ScreenMonitor {
    store: Arc<MemoryStore>,
    embedder: Arc<Embedder>,
    screen: Arc<dyn ScreenSource>,
    window: Arc<dyn ActiveWindowProbe>,
    idle: Arc<dyn IdleProbe>,
    ocr: Arc<OcrPipeline>,
    config: MonitorConfig,
    /// Where captured PNGs are written; `None` disables persistence.
    screens_dir: Option<PathBuf>,
    state: Mutex<ObserverState>,
    counters: AtomicCounters,
    tick_gate: Arc<tokio::sync::Mutex<()>>,
}

impl ScreenMonitor {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        store: Arc<MemoryStore>,
        embedder: Arc<Embedder>,
        screen: Arc<dyn ScreenSource>,
        window: Arc<dyn ActiveWindowProbe>,
        idle: Arc<dyn IdleProbe>,
        ocr: Arc<OcrPipeline>,
        config: MonitorConfig,
        screens_dir: Option<PathBuf>,
    ) -> Self {
        Self {
            store,
            embedder,
            screen,
            window,
            idle,
            ocr,
            config,
            screens_dir,
            state: Mutex::new(ObserverState::default()),
            counters: AtomicCounters::default(),
            tick_gate: Arc::new(tokio::sync::Mutex::new(())),
        }
    }

    pub fn counters(&self) -> MonitorCounters {
        self.counters.snapshot()
    }

    /// The tick loop. Fires every `capture_interval_ms`; a firing that finds
    /// the previous tick still running increments `overruns` and is dropped.
    pub async fn run(self: Arc<Self>, mut shutdown: watch::Receiver<bool>) {
        let mut ticker =
            tokio::time::interval(Duration::from_millis(self.config.capture_interval_ms.max(100)));
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        // The immediate first firing would race startup; skip it.
        ticker.tick().await;

        info!(
            "screen monitor running (interval {}ms, diff threshold {})",
            self.config.capture_interval_ms, self.config.diff_threshold
        );

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    match Arc::clone(&self.tick_gate).try_lock_owned() {
                        Ok(guard) => {
                            let monitor = Arc::clone(&self);
                            tokio::spawn(async move {
                                let _guard = guard;
                                monitor.tick_guarded().await;
                            });
                        }
                        Err(_) => {
                            self.counters.overruns.fetch_add(1, Ordering::Relaxed);
                            debug!("tick overrun, coalescing");
                        }
                    }
                }
                _ = shutdown.changed() => {
                    if *shutdown.borrow() {
                        break;
                    }
                }
            }
        }

        self.stop().await;
    }

    /// Await the in-flight tick (bounded), then shut the OCR worker down.
    pub async fn stop(&self) {
        if tokio::time::timeout(DRAIN_TIMEOUT, self.tick_gate.lock())
            .await
            .is_err()
        {
            warn!("tick still running after {DRAIN_TIMEOUT:?}, terminating OCR worker anyway");
        }
        self.ocr.shutdown();
        info!("screen monitor stopped");
    }

    async fn tick_guarded(&self) {
        match self.tick().await {
            Ok(TickOutcome::Captured { memory_id }) => {
                debug!("captured screen into {memory_id}");
            }
            Ok(outcome) => {
                debug!("tick skipped: {outcome:?}");
            }
            Err(e) => {
                // Observer failures never propagate; they count and move on.
                self.counters.errors.fetch_add(1, Ordering::Relaxed);
                warn!("tick failed: {e}");
            }
        }
    }

    /// One pass of the §state machine: idle check, active window, title or
    /// pixel change, OCR, text-hash dedup, embed, insert.
    pub async fn tick(&self) -> Result<TickOutcome> {
        self.counters.ticks.fetch_add(1, Ordering::Relaxed);

        if self.idle.idle_ms() >= self.config.idle_timeout_ms {
            self.counters.skips.fetch_add(1, Ordering::Relaxed);
            return Ok(TickOutcome::SkippedIdle);
        }

        let window = self.window.active_window()?;

        let screen = Arc::clone(&self.screen);
        let current_png = tokio::task::spawn_blocking(move || screen.capture_png())
            .await
            .map_err(|e| Error::Internal(format!("capture task panicked: {e}")))??;

        let (title_changed, previous_png) = {
            let mut state = self.state.lock().expect("observer state lock poisoned");
            let changed = state.last_app_name.as_deref() != Some(window.app_name.as_str())
                || state.last_window_title.as_deref() != Some(window.window_title.as_str());
            state.last_app_name = Some(window.app_name.clone());
            state.last_window_title = Some(window.window_title.clone());
            let previous = state.last_screenshot_png.replace(current_png.clone());
            (changed, previous)
        };

        if !title_changed {
            let ratio = match previous_png {
                Some(previous) => {
                    let current = current_png.clone();
                    tokio::task::spawn_blocking(move || pixel_diff_ratio(&previous, &current))
                        .await
                        .map_err(|e| Error::Internal(format!("diff task panicked: {e}")))??
                }
                None => 1.0,
            };
            if ratio <= self.config.diff_threshold {
                self.counters.skips.fetch_add(1, Ordering::Relaxed);
                return Ok(TickOutcome::SkippedUnchangedPixels);
            }
        }

        let ocr_pipeline = Arc::clone(&self.ocr);
        let ocr_png = current_png.clone();
        let ocr_result = tokio::task::spawn_blocking(move || ocr_pipeline.extract_text(&ocr_png))
            .await
            .map_err(|e| Error::Internal(format!("ocr task panicked: {e}")))??;

        if ocr_result.text.trim().chars().count() < MIN_OCR_TEXT_CHARS {
            self.counters.skips.fetch_add(1, Ordering::Relaxed);
            return Ok(TickOutcome::SkippedShortText);
        }

        let processed = textproc::process(&ocr_result.text);
        let change = self.ocr.check_text_changed(&processed.text);
        if !change.is_different {
            self.counters.skips.fetch_add(1, Ordering::Relaxed);
            return Ok(TickOutcome::SkippedSameText);
        }

        let combined: String = format!(
            "{} {} {}",
            window.app_name, window.window_title, processed.text
        )
        .chars()
        .take(MAX_EMBED_TEXT_CHARS)
        .collect();

        let embedding = self.embedder.embed(&combined).await?;

        let id = memory_id();
        let screenshot = self.persist_screenshot(&id, &current_png);

        self.store.insert(NewMemoryRecord {
            id: id.clone(),
            user_id: self.config.user_id.clone(),
            record_type: RecordType::ScreenCapture,
            source_text: combined,
            metadata: serde_json::json!({
                "appName": window.app_name,
                "windowTitle": window.window_title,
                "ocrConfidence": ocr_result.confidence,
                "ocrElapsedMs": ocr_result.elapsed_ms,
                "textHash": change.hash,
                "files": processed.files,
                "codeSnippets": processed.code_snippets,
            }),
            screenshot,
            extracted_text: Some(processed.text),
            embedding: Some(embedding),
            created_at: None,
        })?;

        self.store.insert_entities(
            &id,
            &[
                NewEntity {
                    entity_kind: "application".to_string(),
                    value: window.app_name,
                    entity_type: None,
                },
                NewEntity {
                    entity_kind: "window_title".to_string(),
                    value: window.window_title,
                    entity_type: None,
                },
            ],
        )?;

        self.counters.captures.fetch_add(1, Ordering::Relaxed);
        Ok(TickOutcome::Captured { memory_id: id })
    }

    fn persist_screenshot(&self, id: &str, png: &[u8]) -> Option<String> {
        let dir = self.screens_dir.as_ref()?;
        let path = dir.join(format!("{id}.png"));
        match std::fs::write(&path, png) {
            Ok(()) => Some(path.to_string_lossy().into_owned()),
            Err(e) => {
                warn!("failed to persist screenshot: {e}");
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::capture::{NeverIdle, WindowInfo};
    use crate::ocr::{OcrEngine, OcrOutput};
    use std::collections::VecDeque;
    use std::io::Cursor;
    use thinkdrop_db::Database;
    use thinkdrop_embed::FallbackBackend;

    fn png_of(color: [u8; 4]) -> Vec<u8> {
        let img = image::RgbaImage::from_pixel(8, 8, image::Rgba(color));
        let mut out = Vec::new();
        img.write_to(&mut Cursor::new(&mut out), image::ImageFormat::Png)
            .expect("png encode");
        out
    }

    struct ScriptedScreen {
        frames: Mutex<VecDeque<Vec<u8>>>,
        fallback: Vec<u8>,
    }

    impl ScreenSource for ScriptedScreen {
        fn capture_png(&self) -> Result<Vec<u8>> {
            let mut frames = self.frames.lock().expect("frames lock");
            Ok(frames.pop_front().unwrap_or_else(|| self.fallback.clone()))
        }
    }

    struct FixedWindow {
        info: WindowInfo,
    }

    impl ActiveWindowProbe for FixedWindow {
        fn active_window(&self) -> Result<WindowInfo> {
            Ok(self.info.clone())
        }
    }

    struct ScriptedOcr {
        texts: Mutex<VecDeque<String>>,
        fallback: String,
    }

    impl OcrEngine for ScriptedOcr {
        fn recognize(&self, _png: &[u8]) -> Result<OcrOutput> {
            let mut texts = self.texts.lock().expect("texts lock");
            Ok(OcrOutput {
                text: texts.pop_front().unwrap_or_else(|| self.fallback.clone()),
                confidence: 90.0,
            })
        }
    }

    struct AlwaysIdle;

    impl IdleProbe for AlwaysIdle {
        fn idle_ms(&self) -> u64 {
            u64::MAX
        }
    }

    fn monitor_with(
        frames: Vec<Vec<u8>>,
        ocr_texts: Vec<&str>,
        idle: Arc<dyn IdleProbe>,
    ) -> (Arc<ScreenMonitor>, Arc<MemoryStore>) {
        let db = Arc::new(Database::in_memory().expect("in-memory database"));
        let store = Arc::new(MemoryStore::new(db));
        let embedder = Arc::new(Embedder::new(
            Arc::new(FallbackBackend),
            100,
            Duration::from_secs(3600),
        ));
        let screen = Arc::new(ScriptedScreen {
            fallback: frames.last().cloned().unwrap_or_else(|| png_of([0, 0, 0, 255])),
            frames: Mutex::new(frames.into_iter().collect()),
        });
        let window = Arc::new(FixedWindow {
            info: WindowInfo {
                app_name: "editor".to_string(),
                window_title: "notes.txt".to_string(),
            },
        });
        let ocr = Arc::new(OcrPipeline::new(Arc::new(ScriptedOcr {
            fallback: ocr_texts.last().map(|s| s.to_string()).unwrap_or_default(),
            texts: Mutex::new(ocr_texts.iter().map(|s| s.to_string()).collect()),
        })));

        let monitor = Arc::new(ScreenMonitor::new(
            Arc::clone(&store),
            embedder,
            screen,
            window,
            idle,
            ocr,
            MonitorConfig::default(),
            None,
        ));
        (monitor, store)
    }

    #[tokio::test]
    async fn first_tick_captures_and_stores_entities() {
        let (monitor, store) = monitor_with(
            vec![png_of([0, 0, 0, 255])],
            vec!["the quarterly report covers revenue and churn"],
            Arc::new(NeverIdle),
        );

        let outcome = monitor.tick().await.expect("tick");
        let TickOutcome::Captured { memory_id } = outcome else {
            panic!("expected capture, got {outcome:?}");
        };

        let record = store
            .get(&memory_id, "default_user")
            .expect("get")
            .expect("record exists");
        assert_eq!(record.record_type, RecordType::ScreenCapture);
        assert!(record.source_text.starts_with("editor notes.txt"));
        assert!(record.extracted_text.is_some());

        let entities = store.list_entities(&memory_id).expect("entities");
        assert_eq!(entities.len(), 2);
        assert!(entities.iter().any(|e| e.entity_kind == "application"));
        assert!(entities.iter().any(|e| e.entity_kind == "window_title"));

        let counters = monitor.counters();
        assert_eq!(counters.captures, 1);
        assert_eq!(counters.ticks, 1);
    }

    #[tokio::test]
    async fn identical_screens_increment_skips_not_captures() {
        let frame = png_of([10, 10, 10, 255]);
        let (monitor, _store) = monitor_with(
            vec![frame.clone(), frame.clone(), frame],
            vec!["identical screen text across every tick"],
            Arc::new(NeverIdle),
        );

        assert!(matches!(
            monitor.tick().await.expect("tick"),
            TickOutcome::Captured { .. }
        ));
        // Same title, identical pixels: pure skip.
        assert_eq!(
            monitor.tick().await.expect("tick"),
            TickOutcome::SkippedUnchangedPixels
        );
        assert_eq!(
            monitor.tick().await.expect("tick"),
            TickOutcome::SkippedUnchangedPixels
        );

        let counters = monitor.counters();
        assert_eq!(counters.captures, 1);
        assert_eq!(counters.skips, 2);
    }

    #[tokio::test]
    async fn changed_pixels_with_same_ocr_text_skip_on_hash() {
        let (monitor, _store) = monitor_with(
            vec![png_of([0, 0, 0, 255]), png_of([255, 255, 255, 255])],
            vec![
                "the same long stretch of screen text",
                "the same long stretch of screen text",
            ],
            Arc::new(NeverIdle),
        );

        assert!(matches!(
            monitor.tick().await.expect("tick"),
            TickOutcome::Captured { .. }
        ));
        assert_eq!(
            monitor.tick().await.expect("tick"),
            TickOutcome::SkippedSameText
        );

        let counters = monitor.counters();
        assert_eq!(counters.captures, 1);
        assert_eq!(counters.skips, 1);
    }

    #[tokio::test]
    async fn idle_ticks_return_immediately() {
        let (monitor, store) = monitor_with(
            vec![png_of([0, 0, 0, 255])],
            vec!["text that would otherwise be captured"],
            Arc::new(AlwaysIdle),
        );

        assert_eq!(monitor.tick().await.expect("tick"), TickOutcome::SkippedIdle);
        assert_eq!(store.stats().expect("stats").total_records, 0);
        assert_eq!(monitor.counters().skips, 1);
    }

    #[tokio::test]
    async fn short_ocr_text_is_skipped() {
        let (monitor, store) = monitor_with(
            vec![png_of([0, 0, 0, 255])],
            vec!["tiny"],
            Arc::new(NeverIdle),
        );

        assert_eq!(
            monitor.tick().await.expect("tick"),
            TickOutcome::SkippedShortText
        );
        assert_eq!(store.stats().expect("stats").total_records, 0);
    }

    #[tokio::test]
    async fn capture_text_is_truncated_before_embedding() {
        let long_text = "words ".repeat(1000);
        let (monitor, store) = monitor_with(
            vec![png_of([0, 0, 0, 255])],
            vec![long_text.as_str()],
            Arc::new(NeverIdle),
        );

        let TickOutcome::Captured { memory_id } = monitor.tick().await.expect("tick") else {
            panic!("expected capture");
        };
        let record = store
            .get(&memory_id, "default_user")
            .expect("get")
            .expect("record exists");
        assert!(record.source_text.chars().count() <= MAX_EMBED_TEXT_CHARS);
    }

    #[tokio::test]
    async fn run_loop_stops_on_shutdown_signal() {
        let (monitor, _store) = monitor_with(Vec::new(), Vec::new(), Arc::new(AlwaysIdle));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(Arc::clone(&monitor).run(rx));

        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).expect("send shutdown");
        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("run loop should stop promptly")
            .expect("task join");
    }
}
