//! The transform/correlation primitives the feature pipeline is built on,
//! behind a trait so an alternative transform library can be dropped in
//! without touching the tracker logic. `KissDsp` is the bundled reference
//! backend.

use crate::kiss_fft::{Cpx, Fft};
use crate::{FREQ_SIZE, LPC_ORDER, NB_BANDS, WINDOW_SIZE};

/// Band edges in 5 ms frequency-resolution units (bark-ish spacing).
/// One unit is `WINDOW_SIZE / 80 = 4` FFT bins of the 20 ms window.
const BAND_EDGES: [usize; NB_BANDS] = [
    0, 1, 2, 3, 4, 5, 6, 7, 8, 10, 12, 14, 16, 20, 24, 28, 34, 40,
];
const BAND_BINS: usize = 4; // FFT bins per edge unit

/// Per-band correction applied when rebuilding an all-pole model from the
/// smoothed envelope; compensates the triangular band smearing.
const LPC_COMPENSATION: [f32; NB_BANDS] = [
    0.8, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 1.0, 0.666_667, 0.5, 0.5, 0.5, 0.333_333, 0.25, 0.25,
    0.2, 0.166_667, 0.173_913,
];

/// External DSP capability used by the encoder.
///
/// Numeric contracts:
/// - `forward_transform` is the 1/N-scaled forward DFT of one windowed
///   analysis frame (only the non-redundant half-spectrum is returned).
/// - `band_energy` bins the squared spectrum magnitudes into `NB_BANDS`
///   triangular bands spanning the half spectrum.
/// - `dct` is the orthonormal DCT-II over the band axis.
/// - `lpc_from_cepstrum` converts one cepstral vector (as produced by this
///   crate, i.e. with the -4 bias on coefficient 0) into an `LPC_ORDER`
///   all-pole predictor, returning the prediction-error gain. The gain is
///   strictly positive for any finite input because the implied band
///   energies are exponentials.
/// - `pitch_xcorr`/`inner_prod` are plain correlation sums; overriding them
///   (e.g. with SIMD) must not change results beyond float rounding.
pub trait Dsp {
    fn forward_transform(&self, x: &[f32; WINDOW_SIZE], out: &mut [Cpx; FREQ_SIZE]);

    fn band_energy(&self, spectrum: &[Cpx; FREQ_SIZE], bands: &mut [f32; NB_BANDS]);

    fn dct(&self, bands: &[f32; NB_BANDS], out: &mut [f32; NB_BANDS]);

    fn lpc_from_cepstrum(&self, cepstrum: &[f32; NB_BANDS], lpc: &mut [f32; LPC_ORDER]) -> f32;

    /// `out[lag] = sum_{k < len} x[k] * y[lag + k]` for `lag < out.len()`.
    fn pitch_xcorr(&self, x: &[f32], y: &[f32], len: usize, out: &mut [f32]) {
        for (lag, o) in out.iter_mut().enumerate() {
            *o = self.inner_prod(&x[..len], &y[lag..lag + len]);
        }
    }

    fn inner_prod(&self, x: &[f32], y: &[f32]) -> f32 {
        x.iter().zip(y).map(|(a, b)| a * b).sum()
    }
}

/// Reference DSP backend: mixed-radix FFT plus table-driven DCT.
#[derive(Clone, Debug)]
pub struct KissDsp {
    fft: Fft,
    dct_table: [f32; NB_BANDS * NB_BANDS],
}

impl KissDsp {
    pub fn new() -> Self {
        let mut dct_table = [0.0f32; NB_BANDS * NB_BANDS];
        let n = NB_BANDS as f32;
        for i in 0..NB_BANDS {
            for j in 0..NB_BANDS {
                let mut v = ((i as f32 + 0.5) * j as f32 * std::f32::consts::PI / n).cos();
                if j == 0 {
                    v *= 0.5f32.sqrt();
                }
                dct_table[i * NB_BANDS + j] = v;
            }
        }
        Self {
            fft: Fft::new(WINDOW_SIZE),
            dct_table,
        }
    }

    fn idct(&self, x: &[f32; NB_BANDS], out: &mut [f32; NB_BANDS]) {
        let scale = (2.0 / NB_BANDS as f32).sqrt();
        for i in 0..NB_BANDS {
            let mut sum = 0.0;
            for j in 0..NB_BANDS {
                sum += x[j] * self.dct_table[i * NB_BANDS + j];
            }
            out[i] = sum * scale;
        }
    }

    /// Unscaled inverse DFT of a real half spectrum; only the first
    /// `LPC_ORDER + 1` output samples (the autocorrelation lags) are kept.
    fn inverse_real(&self, spectrum: &[f32; FREQ_SIZE], ac: &mut [f32; LPC_ORDER + 1]) {
        let mut fin = [Cpx::ZERO; WINDOW_SIZE];
        let mut fout = [Cpx::ZERO; WINDOW_SIZE];
        for (bin, &re) in fin.iter_mut().zip(spectrum.iter()) {
            bin.r = re;
        }
        for k in FREQ_SIZE..WINDOW_SIZE {
            fin[k] = fin[WINDOW_SIZE - k];
        }
        self.fft.transform(&fin, &mut fout);
        // Forward pass of a conjugate-symmetric spectrum gives the inverse
        // in index-reversed order.
        ac[0] = fout[0].r;
        for k in 1..=LPC_ORDER {
            ac[k] = fout[WINDOW_SIZE - k].r;
        }
    }

    /// Spread band energies back over the half spectrum by linear
    /// interpolation between band centers.
    fn interp_band_gain(&self, bands: &[f32; NB_BANDS], out: &mut [f32; FREQ_SIZE]) {
        out.fill(0.0);
        for i in 0..NB_BANDS - 1 {
            let start = BAND_EDGES[i] * BAND_BINS;
            let width = (BAND_EDGES[i + 1] - BAND_EDGES[i]) * BAND_BINS;
            for j in 0..width {
                let frac = j as f32 / width as f32;
                out[start + j] = (1.0 - frac) * bands[i] + frac * bands[i + 1];
            }
        }
    }

    /// Levinson-Durbin over `LPC_ORDER + 1` autocorrelation lags; returns
    /// the final prediction error.
    fn levinson(&self, ac: &[f32; LPC_ORDER + 1], lpc: &mut [f32; LPC_ORDER]) -> f32 {
        lpc.fill(0.0);
        if ac[0] == 0.0 {
            return 0.0;
        }
        let mut error = ac[0];
        for i in 0..LPC_ORDER {
            let mut rr = 0.0;
            for j in 0..i {
                rr += lpc[j] * ac[i - j];
            }
            rr += ac[i + 1];
            let r = -rr / error;
            lpc[i] = r;
            for j in 0..(i + 1) / 2 {
                let tmp1 = lpc[j];
                let tmp2 = lpc[i - 1 - j];
                lpc[j] = tmp1 + r * tmp2;
                lpc[i - 1 - j] = tmp2 + r * tmp1;
            }
            error -= r * r * error;
            if error < 0.001 * ac[0] {
                break;
            }
        }
        error
    }

    fn lpc_from_bands(&self, bands: &[f32; NB_BANDS], lpc: &mut [f32; LPC_ORDER]) -> f32 {
        let mut spread = [0.0f32; FREQ_SIZE];
        let mut ac = [0.0f32; LPC_ORDER + 1];
        self.interp_band_gain(bands, &mut spread);
        spread[FREQ_SIZE - 1] = 0.0;
        self.inverse_real(&spread, &mut ac);

        // Noise floor and lag window keep the recursion well conditioned.
        ac[0] += ac[0] * 1.0e-4 + WINDOW_SIZE as f32 / 12.0 / 38.0;
        for (i, a) in ac.iter_mut().enumerate().skip(1) {
            *a *= 1.0 - 6.0e-5 * (i * i) as f32;
        }
        self.levinson(&ac, lpc)
    }
}

impl Default for KissDsp {
    fn default() -> Self {
        Self::new()
    }
}

impl Dsp for KissDsp {
    fn forward_transform(&self, x: &[f32; WINDOW_SIZE], out: &mut [Cpx; FREQ_SIZE]) {
        let mut fin = [Cpx::ZERO; WINDOW_SIZE];
        let mut fout = [Cpx::ZERO; WINDOW_SIZE];
        for (c, &s) in fin.iter_mut().zip(x.iter()) {
            c.r = s;
        }
        self.fft.transform(&fin, &mut fout);
        let norm = 1.0 / WINDOW_SIZE as f32;
        for (o, &bin) in out.iter_mut().zip(fout.iter()) {
            *o = bin * norm;
        }
    }

    fn band_energy(&self, spectrum: &[Cpx; FREQ_SIZE], bands: &mut [f32; NB_BANDS]) {
        let mut sum = [0.0f32; NB_BANDS];
        for i in 0..NB_BANDS - 1 {
            let start = BAND_EDGES[i] * BAND_BINS;
            let width = (BAND_EDGES[i + 1] - BAND_EDGES[i]) * BAND_BINS;
            for j in 0..width {
                let frac = j as f32 / width as f32;
                let e = spectrum[start + j].msq();
                sum[i] += (1.0 - frac) * e;
                sum[i + 1] += frac * e;
            }
        }
        sum[0] *= 2.0;
        sum[NB_BANDS - 1] *= 2.0;
        bands.copy_from_slice(&sum);
    }

    fn dct(&self, bands: &[f32; NB_BANDS], out: &mut [f32; NB_BANDS]) {
        let scale = (2.0 / NB_BANDS as f32).sqrt();
        for i in 0..NB_BANDS {
            let mut sum = 0.0;
            for j in 0..NB_BANDS {
                sum += bands[j] * self.dct_table[j * NB_BANDS + i];
            }
            out[i] = sum * scale;
        }
    }

    fn lpc_from_cepstrum(&self, cepstrum: &[f32; NB_BANDS], lpc: &mut [f32; LPC_ORDER]) -> f32 {
        let mut tmp = *cepstrum;
        tmp[0] += 4.0; // undo the quantizer-range bias
        let mut log_bands = [0.0f32; NB_BANDS];
        self.idct(&tmp, &mut log_bands);
        let mut bands = [0.0f32; NB_BANDS];
        for i in 0..NB_BANDS {
            bands[i] = 10.0f32.powf(log_bands[i]) * LPC_COMPENSATION[i];
        }
        self.lpc_from_bands(&bands, lpc)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn dct_idct_round_trip() {
        let dsp = KissDsp::new();
        let bands: [f32; NB_BANDS] =
            std::array::from_fn(|i| (i as f32 * 0.7).sin() * 3.0 - 1.0);
        let mut ceps = [0.0f32; NB_BANDS];
        let mut back = [0.0f32; NB_BANDS];
        dsp.dct(&bands, &mut ceps);
        dsp.idct(&ceps, &mut back);
        for (a, b) in bands.iter().zip(&back) {
            assert_relative_eq!(a, b, epsilon = 1e-4);
        }
    }

    #[test]
    fn band_energy_of_sinusoid_lands_in_one_band() {
        let dsp = KissDsp::new();
        // Bin 24 sits inside band 6 (edges 6*4=24 .. 7*4=28).
        let x: [f32; WINDOW_SIZE] = std::array::from_fn(|n| {
            (2.0 * std::f32::consts::PI * 24.0 * n as f32 / WINDOW_SIZE as f32).cos()
        });
        let mut spec = [Cpx::ZERO; FREQ_SIZE];
        let mut bands = [0.0f32; NB_BANDS];
        dsp.forward_transform(&x, &mut spec);
        dsp.band_energy(&spec, &mut bands);
        let total: f32 = bands.iter().sum();
        assert!(bands[6] > 0.9 * total, "bands = {bands:?}");
    }

    #[test]
    fn lpc_gain_is_positive_and_finite() {
        let dsp = KissDsp::new();
        let mut lpc = [0.0f32; LPC_ORDER];
        // Flat cepstrum (silence-like) and a tilted one.
        for c0 in [-4.0f32, 0.0, 2.5] {
            let mut ceps = [0.0f32; NB_BANDS];
            ceps[0] = c0;
            ceps[1] = 0.3;
            let g = dsp.lpc_from_cepstrum(&ceps, &mut lpc);
            assert!(g.is_finite() && g > 0.0, "gain {g} for c0 {c0}");
            assert!(lpc.iter().all(|c| c.is_finite()));
        }
    }

    #[test]
    fn xcorr_matches_inner_prod() {
        let dsp = KissDsp::new();
        let y: Vec<f32> = (0..64).map(|i| ((i * 7 % 13) as f32) - 6.0).collect();
        let x = &y[32..];
        let mut out = [0.0f32; 16];
        dsp.pitch_xcorr(x, &y, 32, &mut out);
        for (lag, &o) in out.iter().enumerate() {
            let direct: f32 = (0..32).map(|k| x[k] * y[lag + k]).sum();
            assert_relative_eq!(o, direct, epsilon = 1e-5);
        }
    }
}
