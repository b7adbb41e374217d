//! vocfeat extracts per-frame acoustic features (bark-scale cepstrum, LPC,
//! pitch period, pitch correlation, voicing) from a stream of audio samples
//! for parametric speech coding and neural-vocoder front ends.
//!
//! Feed 10 ms frames of samples (at int16 scale, as `f32`) to a
//! [`FeatureEncoder`]; every fourth frame completes a superframe that
//! shares one quantized pitch contour, at which point the four feature
//! vectors are flushed to an optional byte sink and the contour is
//! returned.
//!
//! ```rust
//! use vocfeat::{FeatureEncoder, FRAME_SIZE, NB_TOTAL_FEATURES};
//!
//! let mut enc = FeatureEncoder::new();
//! let mut stream = Vec::new();
//! let frame: Vec<f32> = (0..FRAME_SIZE)
//!     .map(|n| 4000.0 * (2.0 * std::f32::consts::PI * n as f32 / 80.0).sin())
//!     .collect();
//! for _ in 0..8 {
//!     enc.encode_frame(&frame, Some(&mut stream)).unwrap();
//! }
//! // Two superframes of 4 native-endian f32 feature vectors each.
//! assert_eq!(stream.len(), 2 * 4 * NB_TOTAL_FEATURES * std::mem::size_of::<f32>());
//! ```

use std::io::Write;

use thiserror::Error;
use tracing::trace;

mod analysis;
mod dsp;
mod kiss_fft;
mod pitch;
mod quantise;

pub use dsp::{Dsp, KissDsp};
pub use kiss_fft::Cpx;
pub use quantise::{double_interp_search, Superframe};

use pitch::{half_frame_correlation, suppress_octave_spurs, PitchTracker};
use quantise::quantise_contour;

pub const FRAME_SIZE: usize = 160; //  samples advanced per call (10ms @ 16kHz)
pub const OVERLAP_SIZE: usize = 160; //  analysis window history held in state
pub const WINDOW_SIZE: usize = FRAME_SIZE + OVERLAP_SIZE;
pub const FREQ_SIZE: usize = WINDOW_SIZE / 2 + 1; //  non-redundant spectrum bins
pub const NB_BANDS: usize = 18; //  bark-ish energy bands
pub const LPC_ORDER: usize = 16; //  all-pole predictor order
pub const PITCH_MIN_PERIOD: usize = 32; //  shortest candidate period
pub const PITCH_MAX_PERIOD: usize = 256; //  longest candidate period
pub const NB_TOTAL_FEATURES: usize = 2 * NB_BANDS + 3 + LPC_ORDER;

/// Combination index `double_interp_search` must never return: both
/// intermediate vectors copied from the shared key vector.
pub const FORBIDDEN_INTERP: usize = 7;

//  Fixed feature-vector layout. Slots NB_BANDS..2*NB_BANDS are reserved
//  (zero) for format compatibility with delta-cepstrum trainers.
pub const FEATURE_PERIOD: usize = 2 * NB_BANDS;
pub const FEATURE_CORR: usize = 2 * NB_BANDS + 1;
pub const FEATURE_GAIN: usize = 2 * NB_BANDS + 2;
pub const FEATURE_LPC: usize = 2 * NB_BANDS + 3;

pub(crate) const PITCH_LATTICE: usize = PITCH_MAX_PERIOD - PITCH_MIN_PERIOD;
pub(crate) const EXC_BUF_SIZE: usize = 2 * FRAME_SIZE + PITCH_MAX_PERIOD;

//  Whitening input alignment: the inverse filter runs half a frame behind
//  the analysis window so its output is centered on the frame.
const ALIGN_OFFSET: usize = FRAME_SIZE / 2;

#[derive(Debug, Error)]
pub enum EncodeError {
    #[error("input frame must be {FRAME_SIZE} samples, got {got}")]
    BadFrameLength { got: usize },
    #[error("feature sink write failed")]
    Io(#[from] std::io::Error),
}

/// Streaming feature extractor. One instance owns all analysis state for
/// one audio stream; independent streams need independent instances.
/// Generic over the [`Dsp`] backend so the transform library can be
/// substituted without touching the pitch tracker.
pub struct FeatureEncoder<D: Dsp = KissDsp> {
    dsp: D,
    half_window: [f32; OVERLAP_SIZE],
    //  trailing input history, rebuilt into the analysis window each frame
    analysis_mem: [f32; OVERLAP_SIZE],
    //  inverse-filter input history and de-emphasis state for whitening
    whiten_mem: [f32; LPC_ORDER],
    deemph_mem: f32,
    //  whitened excitation ring; newest frame at the tail
    exc_buf: [f32; EXC_BUF_SIZE],
    //  correlation history: slots 0-1 = previous superframe tail,
    //  slots 2-9 = the current superframe's 8 sub-frames
    xc: [[f32; PITCH_MAX_PERIOD]; 10],
    frame_weight: [f32; 10],
    tracker: PitchTracker,
    //  backpointers for one superframe, rewritten each finalization
    backptr: [[u16; PITCH_LATTICE]; 8],
    //  which of the 4 frames of the current superframe is being filled
    pcount: usize,
    features: [[f32; NB_TOTAL_FEATURES]; 4],
    lpc: [f32; LPC_ORDER],
}

impl FeatureEncoder<KissDsp> {
    pub fn new() -> Self {
        Self::with_dsp(KissDsp::new())
    }
}

impl Default for FeatureEncoder<KissDsp> {
    fn default() -> Self {
        Self::new()
    }
}

impl<D: Dsp> FeatureEncoder<D> {
    pub fn with_dsp(dsp: D) -> Self {
        Self {
            dsp,
            half_window: analysis::half_window(),
            analysis_mem: [0.0; OVERLAP_SIZE],
            whiten_mem: [0.0; LPC_ORDER],
            deemph_mem: 0.0,
            exc_buf: [0.0; EXC_BUF_SIZE],
            xc: [[0.0; PITCH_MAX_PERIOD]; 10],
            frame_weight: [0.0; 10],
            tracker: PitchTracker::new(),
            backptr: [[0; PITCH_LATTICE]; 8],
            pcount: 0,
            features: [[0.0; NB_TOTAL_FEATURES]; 4],
            lpc: [0.0; LPC_ORDER],
        }
    }

    /// Return the encoder to its initial state, keeping the DSP backend.
    pub fn reset(&mut self) {
        self.analysis_mem = [0.0; OVERLAP_SIZE];
        self.whiten_mem = [0.0; LPC_ORDER];
        self.deemph_mem = 0.0;
        self.exc_buf = [0.0; EXC_BUF_SIZE];
        self.xc = [[0.0; PITCH_MAX_PERIOD]; 10];
        self.frame_weight = [0.0; 10];
        self.tracker.reset();
        self.backptr = [[0; PITCH_LATTICE]; 8];
        self.pcount = 0;
        self.features = [[0.0; NB_TOTAL_FEATURES]; 4];
        self.lpc = [0.0; LPC_ORDER];
    }

    /// Analyze one `FRAME_SIZE` frame of samples. Every fourth call
    /// finalizes the superframe: its four feature vectors are written to
    /// `sink` (when present) as a flat sequence of native-endian `f32`, and
    /// the quantized pitch contour is returned.
    pub fn encode_frame(
        &mut self,
        input: &[f32],
        sink: Option<&mut dyn Write>,
    ) -> Result<Option<Superframe>, EncodeError> {
        let frame: &[f32; FRAME_SIZE] = input
            .try_into()
            .map_err(|_| EncodeError::BadFrameLength { got: input.len() })?;
        self.compute_frame_features(frame);
        self.pcount += 1;
        if self.pcount < 4 {
            return Ok(None);
        }
        self.pcount = 0;
        self.process_superframe(sink).map(Some)
    }

    /// Per-frame analysis: spectral envelope and cepstrum, LPC, whitened
    /// excitation, and the two half-frame pitch correlation curves.
    fn compute_frame_features(&mut self, input: &[f32; FRAME_SIZE]) {
        let slot = self.pcount;

        //  Grab the tail of the previous frame before frame_analysis
        //  overwrites the window memory.
        let mut aligned = [0.0f32; FRAME_SIZE];
        aligned[..ALIGN_OFFSET].copy_from_slice(&self.analysis_mem[OVERLAP_SIZE - ALIGN_OFFSET..]);

        let mut bands = [0.0f32; NB_BANDS];
        self.frame_analysis(input, &mut bands);
        let ly = analysis::smooth_log_bands(&bands);

        let mut ceps = [0.0f32; NB_BANDS];
        self.dsp.dct(&ly, &mut ceps);
        ceps[0] -= 4.0; //  bias for downstream quantization ranges
        self.features[slot][..NB_BANDS].copy_from_slice(&ceps);

        let gain = self.dsp.lpc_from_cepstrum(&ceps, &mut self.lpc);
        self.features[slot][FEATURE_GAIN] = gain.log10();
        self.features[slot][FEATURE_LPC..].copy_from_slice(&self.lpc);

        //  Shift the excitation ring left one frame, then whiten the
        //  aligned input through the inverse predictor and de-emphasis.
        self.exc_buf.copy_within(FRAME_SIZE.., 0);
        aligned[ALIGN_OFFSET..].copy_from_slice(&input[..FRAME_SIZE - ALIGN_OFFSET]);
        let write_base = EXC_BUF_SIZE - FRAME_SIZE;
        for i in 0..FRAME_SIZE {
            let mut sum = aligned[i];
            for j in 0..LPC_ORDER {
                sum += self.lpc[j] * self.whiten_mem[j];
            }
            self.whiten_mem.copy_within(..LPC_ORDER - 1, 1);
            self.whiten_mem[0] = aligned[i];
            self.exc_buf[write_base + i] = sum + 0.7 * self.deemph_mem;
            self.deemph_mem = sum;
        }

        //  Cross-correlation on half-frames.
        for sub in 0..2 {
            let s = 2 + 2 * slot + sub;
            let off = sub * FRAME_SIZE / 2;
            self.frame_weight[s] =
                half_frame_correlation(&self.dsp, &self.exc_buf, off, &mut self.xc[s]);
        }
    }

    /// Windowed overlap+frame spectral analysis; updates the window memory.
    fn frame_analysis(&mut self, input: &[f32; FRAME_SIZE], bands: &mut [f32; NB_BANDS]) {
        let mut x = [0.0f32; WINDOW_SIZE];
        x[..OVERLAP_SIZE].copy_from_slice(&self.analysis_mem);
        x[OVERLAP_SIZE..].copy_from_slice(input);
        self.analysis_mem
            .copy_from_slice(&input[FRAME_SIZE - OVERLAP_SIZE..]);
        analysis::apply_window(&mut x, &self.half_window);
        let mut spectrum = [Cpx::ZERO; FREQ_SIZE];
        self.dsp.forward_transform(&x, &mut spectrum);
        self.dsp.band_energy(&spectrum, bands);
    }

    /// Superframe finalization: track the pitch contour across the 8
    /// sub-frames, quantize it, rotate the correlation history, refresh
    /// each frame's LPC/gain from its finalized cepstrum and flush.
    fn process_superframe(
        &mut self,
        sink: Option<&mut dyn Write>,
    ) -> Result<Superframe, EncodeError> {
        //  Renormalize sub-frame weights to sum to 8.
        let mut weight_sum = 1.0e-15f32;
        for s in 2..10 {
            weight_sum += self.frame_weight[s];
        }
        for s in 2..10 {
            self.frame_weight[s] *= 8.0 / weight_sum;
        }

        for sub in 0..8 {
            let s = 2 + sub;
            suppress_octave_spurs(&mut self.xc[s]);
            self.tracker
                .extend(&self.xc[s], self.frame_weight[s], &mut self.backptr[sub]);
        }

        let path = self.tracker.backtrack(&self.backptr);
        let mut periods = [0usize; 8];
        let mut frame_corr = 0.0f32;
        for sub in 0..8 {
            periods[sub] = PITCH_MAX_PERIOD - path[sub];
            frame_corr += self.frame_weight[2 + sub] * self.xc[2 + sub][path[sub]];
        }
        frame_corr /= 8.0;

        let weights: [f32; 8] = std::array::from_fn(|sub| self.frame_weight[2 + sub]);
        let contour = quantise_contour(&periods, &weights, frame_corr);

        for f in 0..4 {
            self.features[f][FEATURE_PERIOD] =
                0.01 * ((periods[2 * f] + periods[2 * f + 1]) as f32 - 200.0);
            self.features[f][FEATURE_CORR] = frame_corr - 0.5;
        }

        //  Carry the last two correlation curves into the next superframe.
        self.xc.copy_within(8..10, 0);

        //  Refresh LPC and gain from the finalized cepstra so the flushed
        //  vectors are self-consistent.
        for f in 0..4 {
            let mut ceps = [0.0f32; NB_BANDS];
            ceps.copy_from_slice(&self.features[f][..NB_BANDS]);
            let gain = self.dsp.lpc_from_cepstrum(&ceps, &mut self.lpc);
            self.features[f][FEATURE_GAIN] = gain.log10();
            self.features[f][FEATURE_LPC..].copy_from_slice(&self.lpc);
        }

        trace!(
            main_pitch = contour.main_pitch,
            modulation = contour.modulation,
            voiced = contour.voiced,
            frame_corr,
            "superframe finalized"
        );

        if let Some(out) = sink {
            for f in 0..4 {
                for &v in self.features[f].iter() {
                    out.write_all(&v.to_ne_bytes())?;
                }
            }
        }
        Ok(contour)
    }
}
