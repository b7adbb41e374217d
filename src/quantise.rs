//! Pitch-contour regression and quantization, plus the band-energy
//! interpolation-mode search used by the downstream envelope quantizer.

use crate::{FORBIDDEN_INTERP, NB_BANDS, NB_TOTAL_FEATURES, PITCH_MIN_PERIOD};

/// Quantized pitch contour of one superframe.
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct Superframe {
    /// `round(21*log2(center/PITCH_MIN_PERIOD))`, clamped to 6 bits.
    pub main_pitch: i32,
    /// Slope term `round(112*a/center)`, clamped to a signed 3-bit range.
    pub modulation: i32,
    pub voiced: bool,
    pub frame_corr: f32,
}

/*---------------------------------------------------------------------------*\

  quantise_contour()

  Fits a weighted linear trajectory period(x) = a*x + b through the 8
  tracked sub-frame periods (x runs over the history slots 2..10, so the
  superframe midpoint is x = 5.5) and quantizes it as a 6-bit log-domain
  center period plus a 3-bit slope.

  The superframe is voiced when the path-averaged correlation reaches 0.3.
  A voiced slope is clamped to mean_period/32 per sub-frame (a relative
  variation of up to 1/4 over the superframe); an unvoiced contour is
  forced flat.

  Weights are the energy weights renormalized to sum to 8. All-zero
  weights (digital silence) are tolerated: denominators are floored at
  1e-15 and the center period at 1e-2, so the result is defined and
  finite (and unvoiced, since zero energy means zero correlation).

\*---------------------------------------------------------------------------*/
pub(crate) fn quantise_contour(
    periods: &[usize; 8],
    weights: &[f32; 8],
    frame_corr: f32,
) -> Superframe {
    let mut sw = 0.0f32;
    let mut sx = 0.0f32;
    let mut sxx = 0.0f32;
    let mut sxy = 0.0f32;
    let mut sy = 0.0f32;
    for sub in 0..8 {
        let w = weights[sub];
        let x = (sub + 2) as f32;
        let y = periods[sub] as f32;
        sw += w;
        sx += w * x;
        sxx += w * x * x;
        sxy += w * x * y;
        sy += w * y;
    }
    let voiced = frame_corr >= 0.3;

    let mut a = (sw * sxy - sx * sy) / (sw * sxx - sx * sx).max(1e-15);
    if voiced {
        let max_a = sy / sw.max(1e-15) / 32.0;
        a = a.clamp(-max_a, max_a);
    } else {
        a = 0.0;
    }
    let b = (sy - a * sx) / sw.max(1e-15);

    let center = (b + 5.5 * a).max(1e-2);
    let main_pitch = (0.5 + 21.0 * (center / PITCH_MIN_PERIOD as f32).log2()).floor() as i32;
    let modulation = (0.5 + 16.0 * 7.0 * a / center).floor() as i32;

    Superframe {
        main_pitch: main_pitch.clamp(0, 63),
        modulation: modulation.clamp(-3, 3),
        voiced,
        frame_corr,
    }
}

/// Squared distance over the envelope (cepstral) part of a feature vector
/// for the three predictors of `x` from its neighbors: midpoint average,
/// left copy, right copy. Returns the cheapest predictor (0, 1 or 2) and
/// fills `dist` with all three distances.
pub(crate) fn interp_search(
    x: &[f32],
    left: &[f32],
    right: &[f32],
    dist: &mut [f32; 3],
) -> usize {
    for (k, d) in dist.iter_mut().enumerate() {
        let mut acc = 0.0f32;
        for i in 0..NB_BANDS {
            let pred = match k {
                0 => 0.5 * (left[i] + right[i]),
                1 => left[i],
                _ => right[i],
            };
            acc += (x[i] - pred) * (x[i] - pred);
        }
        *d = acc;
    }
    let mut best = 0;
    for k in 1..3 {
        if dist[k] < dist[best] {
            best = k;
        }
    }
    best
}

/// Choose how the two intermediate feature vectors of a superframe are
/// best predicted from the key vectors around them: `features[0]` from
/// `mem`/`features[1]`, and `features[2]` from `features[1]`/`features[3]`.
/// The two independent 3-way choices form 9 combinations; the degenerate
/// combination `FORBIDDEN_INTERP` is never returned, and indexes above it
/// are compacted down by one so the result is a dense mode index.
pub fn double_interp_search(
    features: &[[f32; NB_TOTAL_FEATURES]; 4],
    mem: &[f32; NB_BANDS],
) -> usize {
    let mut dist = [[0.0f32; 3]; 2];
    interp_search(&features[0], mem, &features[1], &mut dist[0]);
    interp_search(&features[2], &features[1], &features[3], &mut dist[1]);

    let mut best_id = 0;
    let mut min_dist = f32::INFINITY;
    for i in 0..3 {
        for j in 0..3 {
            let id = 3 * i + j;
            let d = dist[0][i] + dist[1][j];
            if d < min_dist && id != FORBIDDEN_INTERP {
                min_dist = d;
                best_id = id;
            }
        }
    }
    best_id - usize::from(best_id >= FORBIDDEN_INTERP)
}
