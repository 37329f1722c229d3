use thinkdrop_common::{Error, Result};

/// Per-channel tolerance below which a pixel counts as unchanged.
const PIXEL_TOLERANCE: f32 = 0.1;

/// Fraction of pixels that differ between two PNG frames, in `[0, 1]`.
///
/// A dimension mismatch (screen resize, display switch) reports 1.0 — fully
/// different — so the monitor always captures after a resize.
pub fn pixel_diff_ratio(previous_png: &[u8], current_png: &[u8]) -> Result<f32> {
    let previous = decode(previous_png)?;
    let current = decode(current_png)?;

    if previous.dimensions() != current.dimensions() {
        return Ok(1.0);
    }

    let total = u64::from(previous.width()) * u64::from(previous.height());
    if total == 0 {
        return Ok(0.0);
    }

    let mut differing = 0u64;
    for (prev, cur) in previous.pixels().zip(current.pixels()) {
        let delta = prev
            .0
            .iter()
            .take(3)
            .zip(cur.0.iter().take(3))
            .map(|(a, b)| (f32::from(*a) - f32::from(*b)).abs() / 255.0)
            .sum::<f32>()
            / 3.0;
        if delta > PIXEL_TOLERANCE {
            differing += 1;
        }
    }

    Ok(differing as f32 / total as f32)
}

fn decode(png: &[u8]) -> Result<image::RgbaImage> {
    image::load_from_memory(png)
        .map(|img| img.to_rgba8())
        .map_err(|e| Error::Capture(format!("png decode: {e}")))
}
