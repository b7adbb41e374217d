//! Pitch correlation and the dynamic-programming pitch tracker.
//!
//! Candidate pitch lags live on a lattice indexed so that lattice index `i`
//! means a period of `PITCH_MAX_PERIOD - i` samples. Each half-frame
//! contributes one normalized correlation curve over that lattice; the
//! tracker extends an optimal path across sub-frames with a quadratic
//! continuity penalty and recovers one lag per sub-frame when the
//! superframe is finalized.

use crate::dsp::Dsp;
use crate::{EXC_BUF_SIZE, FRAME_SIZE, PITCH_LATTICE, PITCH_MAX_PERIOD, PITCH_MIN_PERIOD};

/// Sub-frame (half-frame) length in samples.
pub(crate) const SUB_FRAME: usize = FRAME_SIZE / 2;

/// How far the path may jump between consecutive sub-frames, in lattice
/// steps, before the continuity penalty cuts it off entirely.
const MAX_JUMP: usize = 4;

/// Quadratic continuity cost per squared lattice step.
const JUMP_COST: f32 = 0.02;

/// Score offset below the running best at which a fresh path may restart.
const RESTART_FLOOR: f32 = 6.0;

/// Normalized cross-correlation of the newest half-frame of whitened
/// excitation against every candidate lag. `off` is 0 for the first
/// half-frame and `SUB_FRAME` for the second. Returns the half-frame
/// energy, used later as the regression weight for this sub-frame.
pub(crate) fn half_frame_correlation<D: Dsp>(
    dsp: &D,
    exc: &[f32; EXC_BUF_SIZE],
    off: usize,
    xc: &mut [f32; PITCH_MAX_PERIOD],
) -> f32 {
    // The newest frame sits at the tail of the ring; lag index i addresses
    // the window starting PITCH_MAX_PERIOD - i samples back.
    let cur_base = EXC_BUF_SIZE - FRAME_SIZE + off;
    let lag_base = cur_base - PITCH_MAX_PERIOD;
    let cur = &exc[cur_base..cur_base + SUB_FRAME];

    let mut raw = [0.0f32; PITCH_MAX_PERIOD];
    dsp.pitch_xcorr(cur, &exc[lag_base..], SUB_FRAME, &mut raw);
    let ener0 = dsp.inner_prod(cur, cur);
    for i in 0..PITCH_MAX_PERIOD {
        let lagged = &exc[lag_base + i..lag_base + i + SUB_FRAME];
        let ener = 1.0 + ener0 + dsp.inner_prod(lagged, lagged);
        xc[i] = 2.0 * raw[i] / ener;
    }
    ener0
}

/// Attenuate correlation peaks that are explained by a stronger peak at
/// half the period (the classic octave error). The reference for lattice
/// index `i` is a small neighborhood around index `(PITCH_MAX_PERIOD+i)/2`,
/// whose period is half of `i`'s.
pub(crate) fn suppress_octave_spurs(xc: &mut [f32; PITCH_MAX_PERIOD]) {
    for i in 0..PITCH_MAX_PERIOD - 2 * PITCH_MIN_PERIOD {
        let half = xc[(PITCH_MAX_PERIOD + i) / 2]
            .max(xc[(PITCH_MAX_PERIOD + i + 2) / 2])
            .max(xc[(PITCH_MAX_PERIOD + i - 1) / 2]);
        if xc[i] < half * 1.1 {
            xc[i] *= 0.8;
        }
    }
}

/// Dynamic-programming state that survives across superframes: the
/// double-buffered path-score lattice and the current optimal path tail.
#[derive(Clone, Debug)]
pub(crate) struct PitchTracker {
    path: Box<[[f32; PITCH_LATTICE]; 2]>,
    best_score: f32,
    best_end: usize,
}

impl PitchTracker {
    pub fn new() -> Self {
        Self {
            path: Box::new([[0.0; PITCH_LATTICE]; 2]),
            best_score: 0.0,
            best_end: 0,
        }
    }

    pub fn reset(&mut self) {
        self.path = Box::new([[0.0; PITCH_LATTICE]; 2]);
        self.best_score = 0.0;
        self.best_end = 0;
    }

    /// Lattice index of the best path after the most recent `extend`.
    pub fn best_end(&self) -> usize {
        self.best_end
    }

    /// Extend every path by one sub-frame. For each lattice index the best
    /// predecessor is searched in a window of `MAX_JUMP` steps, clamped at
    /// both lattice edges, with cost `JUMP_COST*d^2`; paths may also restart
    /// `RESTART_FLOOR` below the running best. The new scores are
    /// renormalized by their maximum so they stay bounded over arbitrarily
    /// long streams.
    pub fn extend(
        &mut self,
        xc: &[f32; PITCH_MAX_PERIOD],
        weight: f32,
        backptr: &mut [u16; PITCH_LATTICE],
    ) {
        let restart = self.best_score - RESTART_FLOOR;
        let mut max_all = f32::NEG_INFINITY;
        let mut best_i = 0usize;

        for i in 0..PITCH_LATTICE {
            let lo = i.saturating_sub(MAX_JUMP);
            let hi = (i + MAX_JUMP).min(PITCH_LATTICE - 1);
            let mut best_prev = restart;
            let mut from = self.best_end;
            for n in lo..=hi {
                let d = n as f32 - i as f32;
                let score = self.path[0][n] - JUMP_COST * d * d;
                if score > best_prev {
                    best_prev = score;
                    from = n;
                }
            }
            backptr[i] = from as u16;
            let score = best_prev + weight * xc[i];
            self.path[1][i] = score;
            if score > max_all {
                max_all = score;
                best_i = i;
            }
        }

        for i in 0..PITCH_LATTICE {
            self.path[1][i] -= max_all;
        }
        self.path[0] = self.path[1];
        self.best_score = max_all;
        self.best_end = best_i;
    }

    /// Walk the stored backpointers from the final best endpoint, most
    /// recent sub-frame first, and return the lattice index chosen for each
    /// of the 8 sub-frames.
    pub fn backtrack(&self, backptr: &[[u16; PITCH_LATTICE]; 8]) -> [usize; 8] {
        let mut idx = self.best_end();
        let mut out = [0usize; 8];
        for sub in (0..8).rev() {
            out[sub] = idx;
            idx = backptr[sub][idx] as usize;
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn flat_curve(peak: usize, value: f32) -> [f32; PITCH_MAX_PERIOD] {
        let mut xc = [0.0f32; PITCH_MAX_PERIOD];
        xc[peak] = value;
        xc
    }

    #[test]
    fn stable_peak_is_tracked_through_backtrack() {
        let mut tracker = PitchTracker::new();
        let mut backptr = [[0u16; PITCH_LATTICE]; 8];
        let xc = flat_curve(150, 0.9);
        for sub in 0..8 {
            tracker.extend(&xc, 1.0, &mut backptr[sub]);
        }
        let path = tracker.backtrack(&backptr);
        assert_eq!(path, [150; 8]);
    }

    #[test]
    fn continuity_penalty_prefers_near_lags() {
        let mut tracker = PitchTracker::new();
        let mut backptr = [[0u16; PITCH_LATTICE]; 8];
        // Establish a path at 100, then offer two equal peaks at 102 and 140.
        for sub in 0..6 {
            tracker.extend(&flat_curve(100, 0.9), 1.0, &mut backptr[sub]);
        }
        let mut xc = [0.0f32; PITCH_MAX_PERIOD];
        xc[102] = 0.6;
        xc[140] = 0.6;
        tracker.extend(&xc, 1.0, &mut backptr[6]);
        tracker.extend(&xc, 1.0, &mut backptr[7]);
        assert_eq!(tracker.best_end(), 102);
    }

    #[test]
    fn neighbor_search_clamps_at_lattice_edges() {
        let mut tracker = PitchTracker::new();
        let mut backptr = [[0u16; PITCH_LATTICE]; 8];
        for (sub, peak) in [0usize, 1, PITCH_LATTICE - 1, PITCH_LATTICE - 2, 0, 0, 0, 0]
            .iter()
            .enumerate()
        {
            let prev_end = tracker.best_end();
            tracker.extend(&flat_curve(*peak, 1.0), 1.0, &mut backptr[sub]);
            for (i, &b) in backptr[sub].iter().enumerate() {
                let b = b as usize;
                assert!(b < PITCH_LATTICE);
                // Either a neighbor within the clamped window or a restart
                // pointing at the previous path tail.
                assert!(b.abs_diff(i) <= MAX_JUMP || b == prev_end);
            }
        }
    }

    #[test]
    fn renormalization_keeps_scores_bounded() {
        let mut tracker = PitchTracker::new();
        let mut backptr = [[0u16; PITCH_LATTICE]; 8];
        let mut seed = 0x9e3779b9u32;
        let mut next = || {
            seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
            (seed >> 16) as f32 / 32768.0 - 1.0 // in [-1, 1)
        };
        for step in 0..10_000usize {
            let mut xc = [0.0f32; PITCH_MAX_PERIOD];
            for v in xc.iter_mut() {
                *v = next();
            }
            let weight = 0.5 + next().abs() * 2.0;
            tracker.extend(&xc, weight, &mut backptr[step % 8]);
            assert!(tracker.best_score.is_finite());
        }
        // After renormalization the lattice maximum is exactly zero and
        // everything else sits within the restart window.
        let max = tracker.path[0].iter().cloned().fold(f32::MIN, f32::max);
        assert_eq!(max, 0.0);
        for &v in tracker.path[0].iter() {
            assert!(v.is_finite());
            assert!(v <= 0.0);
            assert!(v > -100.0, "path score drifted: {v}");
        }
    }

    #[test]
    fn octave_spur_is_attenuated() {
        let mut xc = [0.0f32; PITCH_MAX_PERIOD];
        // True period 100 (index 156) and its double 200 (index 56). The
        // half-period reference of index 56 is index 156.
        xc[156] = 0.95;
        xc[56] = 0.9;
        suppress_octave_spurs(&mut xc);
        assert!((xc[56] - 0.9 * 0.8).abs() < 1e-6, "octave peak kept: {}", xc[56]);
        // The fundamental's own half-period references are quiet, so it
        // stays untouched.
        assert_eq!(xc[156], 0.95);
    }

    #[test]
    fn strong_fundamental_survives_suppression() {
        let mut xc = [0.0f32; PITCH_MAX_PERIOD];
        // Peak at index 60 whose half-period references are quiet.
        xc[60] = 0.9;
        suppress_octave_spurs(&mut xc);
        assert_eq!(xc[60], 0.9);
    }
}
