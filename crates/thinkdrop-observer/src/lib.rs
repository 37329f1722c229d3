pub mod capture;
pub mod diff;
pub mod monitor;
pub mod ocr;
pub mod textproc;

pub use capture::{ActiveWindowProbe, IdleProbe, NeverIdle, ScreenSource, WindowInfo};
pub use monitor::{MonitorCounters, ScreenMonitor, TickOutcome};
pub use ocr::{OcrOutput, OcrPipeline, OcrResult, TextChange};

#[cfg(feature = "desktop")]
pub use capture::PrimaryDisplaySource;
#[cfg(feature = "desktop")]
pub use ocr::TesseractEngine;
