use thinkdrop_common::Result;

/// Produces one PNG snapshot of the screen per call.
pub trait ScreenSource: Send + Sync {
    fn capture_png(&self) -> Result<Vec<u8>>;
}

/// Foreground application and window title.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WindowInfo {
    pub app_name: String,
    pub window_title: String,
}

pub trait ActiveWindowProbe: Send + Sync {
    fn active_window(&self) -> Result<WindowInfo>;
}

/// Milliseconds since the last user input.
pub trait IdleProbe: Send + Sync {
    fn idle_ms(&self) -> u64;
}

/// Probe for platforms without an idle API: reports permanent activity, so
/// capture decisions fall through to the title/pixel checks.
pub struct NeverIdle;

impl IdleProbe for NeverIdle {
    fn idle_ms(&self) -> u64 {
        0
    }
}

#[cfg(feature = "desktop")]
pub use desktop::PrimaryDisplaySource;

#[cfg(feature = "desktop")]
mod desktop {
    use std::io::Cursor;

    use screenshots::Screen;
    // The capture buffer is an image type from the version screenshots
    // links against; use its re-export rather than our own image dep.
    use screenshots::image::ImageFormat;
    use thinkdrop_common::{Error, Result};

    use super::ScreenSource;

    /// Captures the primary display through the OS screenshot API.
    pub struct PrimaryDisplaySource;

    impl ScreenSource for PrimaryDisplaySource {
        fn capture_png(&self) -> Result<Vec<u8>> {
            let screens =
                Screen::all().map_err(|e| Error::Capture(format!("screen enumeration: {e}")))?;
            let screen = screens
                .first()
                .ok_or_else(|| Error::Capture("no display found".into()))?;

            let rgba = screen
                .capture()
                .map_err(|e| Error::Capture(format!("screen capture: {e}")))?;

            let mut png = Vec::new();
            rgba.write_to(&mut Cursor::new(&mut png), ImageFormat::Png)
                .map_err(|e| Error::Capture(format!("png encode: {e}")))?;
            Ok(png)
        }
    }
}
