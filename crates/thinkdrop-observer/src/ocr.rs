use std::sync::{Arc, Mutex};
use std::time::Instant;

use serde::Serialize;
use sha2::{Digest, Sha256};
use thinkdrop_common::Result;

/// What an OCR backend returns for one image.
#[derive(Debug, Clone)]
pub struct OcrOutput {
    pub text: String,
    /// Mean word confidence in `[0, 100]`.
    pub confidence: f32,
}

/// Replaceable OCR backend. One long-lived worker per process.
pub trait OcrEngine: Send + Sync {
    fn recognize(&self, png: &[u8]) -> Result<OcrOutput>;

    /// Release worker resources. Default is a no-op for stateless engines.
    fn shutdown(&self) {}
}

/// `recognize` result annotated with wall time.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct OcrResult {
    pub text: String,
    pub confidence: f32,
    pub elapsed_ms: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TextChange {
    pub is_different: bool,
    pub hash: String,
}

/// OCR worker plus the observer's text-dedup state.
pub struct OcrPipeline {
    engine: Arc<dyn OcrEngine>,
    last_text_hash: Mutex<Option<String>>,
}

impl OcrPipeline {
    pub fn new(engine: Arc<dyn OcrEngine>) -> Self {
        Self {
            engine,
            last_text_hash: Mutex::new(None),
        }
    }

    pub fn extract_text(&self, png: &[u8]) -> Result<OcrResult> {
        let started = Instant::now();
        let output = self.engine.recognize(png)?;
        Ok(OcrResult {
            text: output.text,
            confidence: output.confidence,
            elapsed_ms: started.elapsed().as_millis() as u64,
        })
    }

    /// Compare `text` against the previous OCR pass. The stored hash is
    /// updated on every call, whatever the comparison says.
    pub fn check_text_changed(&self, text: &str) -> TextChange {
        let hash = format!("{:x}", Sha256::digest(text.as_bytes()));
        let mut last = self
            .last_text_hash
            .lock()
            .expect("text hash lock poisoned");
        let is_different = last.as_deref() != Some(hash.as_str());
        *last = Some(hash.clone());
        TextChange { is_different, hash }
    }

    pub fn shutdown(&self) {
        self.engine.shutdown();
    }
}

#[cfg(feature = "desktop")]
pub use tesseract::TesseractEngine;

#[cfg(feature = "desktop")]
mod tesseract {
    use std::sync::Mutex;

    use leptess::LepTess;
    use thinkdrop_common::{Error, Result};
    use tracing::info;

    use super::{OcrEngine, OcrOutput};

    /// Single long-lived Tesseract worker (English model), serialised by a
    /// mutex since the underlying API is stateful.
    pub struct TesseractEngine {
        worker: Mutex<LepTess>,
    }

    impl TesseractEngine {
        pub fn new() -> Result<Self> {
            let worker = LepTess::new(None, "eng")
                .map_err(|e| Error::Ocr(format!("tesseract init failed: {e}")))?;
            info!("tesseract worker ready (eng)");
            Ok(Self {
                worker: Mutex::new(worker),
            })
        }
    }

    impl OcrEngine for TesseractEngine {
        fn recognize(&self, png: &[u8]) -> Result<OcrOutput> {
            let mut worker = self
                .worker
                .lock()
                .map_err(|_| Error::Ocr("tesseract worker lock poisoned".into()))?;

            worker
                .set_image_from_mem(png)
                .map_err(|e| Error::Ocr(format!("failed to load image: {e}")))?;
            let text = worker
                .get_utf8_text()
                .map_err(|e| Error::Ocr(format!("recognition failed: {e}")))?;
            let confidence = worker.mean_text_conf() as f32;

            Ok(OcrOutput { text, confidence })
        }
    }
}
