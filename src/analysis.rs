//! Analysis-window and spectral-envelope helpers for the per-frame front
//! end. The heavy transforms live behind the [`crate::dsp::Dsp`] trait;
//! this module owns the windowing tables and the causal log-energy
//! smoothing that bounds spectral-tilt outliers.

use crate::{NB_BANDS, OVERLAP_SIZE, WINDOW_SIZE};

/// Vorbis-style power-complementary half window over the overlap region.
pub(crate) fn half_window() -> [f32; OVERLAP_SIZE] {
    let half_pi = 0.5 * std::f32::consts::PI;
    std::array::from_fn(|i| {
        let s = (half_pi * (i as f32 + 0.5) / OVERLAP_SIZE as f32).sin();
        (half_pi * s * s).sin()
    })
}

/// Taper both ends of the analysis buffer in place; the middle
/// `WINDOW_SIZE - 2*OVERLAP_SIZE` samples (if any) pass unscaled.
pub(crate) fn apply_window(x: &mut [f32; WINDOW_SIZE], hw: &[f32; OVERLAP_SIZE]) {
    for i in 0..OVERLAP_SIZE {
        x[i] *= hw[i];
        x[WINDOW_SIZE - 1 - i] *= hw[i];
    }
}

/// Smoothed log-band envelope: each band's log10 energy is floored by the
/// running maximum minus 8 and by a decay-limited follower minus 2.5, both
/// updated causally band by band. The 1e-2 energy floor keeps the log
/// finite for silence.
pub(crate) fn smooth_log_bands(bands: &[f32; NB_BANDS]) -> [f32; NB_BANDS] {
    let mut out = [0.0f32; NB_BANDS];
    let mut log_max = -2.0f32;
    let mut follow = -2.0f32;
    for i in 0..NB_BANDS {
        let mut ly = (1.0e-2 + bands[i]).log10();
        ly = ly.max(log_max - 8.0).max(follow - 2.5);
        log_max = log_max.max(ly);
        follow = (follow - 2.5).max(ly);
        out[i] = ly;
    }
    out
}
