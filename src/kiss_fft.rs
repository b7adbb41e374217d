/*
Based on KISS FFT, Copyright (c) 2003-2010, Mark Borgerding

All rights reserved.

Redistribution and use in source and binary forms, with or without modification, are permitted provided that the following conditions are met:

    * Redistributions of source code must retain the above copyright notice, this list of conditions and the following disclaimer.
    * Redistributions in binary form must reproduce the above copyright notice, this list of conditions and the following disclaimer in the documentation and/or other materials provided with the distribution.
    * Neither the author nor the names of any contributors may be used to endorse or promote products derived from this software without specific prior written permission.

THIS SOFTWARE IS PROVIDED BY THE COPYRIGHT HOLDERS AND CONTRIBUTORS "AS IS" AND ANY EXPRESS OR IMPLIED WARRANTIES, INCLUDING, BUT NOT LIMITED TO, THE IMPLIED WARRANTIES OF MERCHANTABILITY AND FITNESS FOR A PARTICULAR PURPOSE ARE DISCLAIMED. IN NO EVENT SHALL THE COPYRIGHT OWNER OR CONTRIBUTORS BE LIABLE FOR ANY DIRECT, INDIRECT, INCIDENTAL, SPECIAL, EXEMPLARY, OR CONSEQUENTIAL DAMAGES (INCLUDING, BUT NOT LIMITED TO, PROCUREMENT OF SUBSTITUTE GOODS OR SERVICES; LOSS OF USE, DATA, OR PROFITS; OR BUSINESS INTERRUPTION) HOWEVER CAUSED AND ON ANY THEORY OF LIABILITY, WHETHER IN CONTRACT, STRICT LIABILITY, OR TORT (INCLUDING NEGLIGENCE OR OTHERWISE) ARISING IN ANY WAY OUT OF THE USE OF THIS SOFTWARE, EVEN IF ADVISED OF THE POSSIBILITY OF SUCH DAMAGE.
*/

//! Mixed-radix forward complex FFT, trimmed to what the analysis front end
//! needs. Lengths must factor into 2, 3, 4 and 5 (the 320-point analysis
//! window does). The inverse transform the LPC path needs is obtained by
//! feeding a conjugate-extended spectrum back through the forward transform,
//! so no inverse plan is kept.

use std::f64::consts::PI;
use std::ops::{Add, Mul, Sub};

#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct Cpx {
    pub r: f32,
    pub i: f32,
}

impl Cpx {
    pub const ZERO: Cpx = Cpx { r: 0.0, i: 0.0 };

    pub fn new(r: f32, i: f32) -> Self {
        Self { r, i }
    }

    /// e^{j*phase}
    fn cexp(phase: f64) -> Self {
        Self {
            r: phase.cos() as f32,
            i: phase.sin() as f32,
        }
    }

    /// Squared magnitude.
    pub fn msq(self) -> f32 {
        self.r * self.r + self.i * self.i
    }
}

impl Add for Cpx {
    type Output = Cpx;
    fn add(self, rhs: Cpx) -> Cpx {
        Cpx::new(self.r + rhs.r, self.i + rhs.i)
    }
}

impl Sub for Cpx {
    type Output = Cpx;
    fn sub(self, rhs: Cpx) -> Cpx {
        Cpx::new(self.r - rhs.r, self.i - rhs.i)
    }
}

impl Mul for Cpx {
    type Output = Cpx;
    fn mul(self, rhs: Cpx) -> Cpx {
        Cpx::new(
            self.r * rhs.r - self.i * rhs.i,
            self.r * rhs.i + self.i * rhs.r,
        )
    }
}

impl Mul<f32> for Cpx {
    type Output = Cpx;
    fn mul(self, rhs: f32) -> Cpx {
        Cpx::new(self.r * rhs, self.i * rhs)
    }
}

/// Precomputed FFT plan: stage factors and the twiddle table.
#[derive(Clone, Debug)]
pub struct Fft {
    nfft: usize,
    stages: Vec<(usize, usize)>, // (radix p, sub-length m) per stage
    twiddles: Vec<Cpx>,
}

impl Fft {
    pub fn new(nfft: usize) -> Self {
        let twiddles = (0..nfft)
            .map(|i| Cpx::cexp(-2.0 * PI * i as f64 / nfft as f64))
            .collect();

        // Factor the length, biggest supported radix first.
        let mut stages = Vec::new();
        let mut m = nfft;
        while m > 1 {
            let p = [4, 2, 3, 5]
                .into_iter()
                .find(|p| m % p == 0)
                .unwrap_or_else(|| panic!("fft length {} must factor into 2, 3, 4, 5", nfft));
            m /= p;
            stages.push((p, m));
        }

        Self {
            nfft,
            stages,
            twiddles,
        }
    }

    /// Unscaled forward DFT: `fout[k] = sum_n fin[n]*e^{-j2pi*k*n/nfft}`.
    pub fn transform(&self, fin: &[Cpx], fout: &mut [Cpx]) {
        assert_eq!(fin.len(), self.nfft);
        assert_eq!(fout.len(), self.nfft);
        self.work(fout, fin, 1, 0);
    }

    // Decimation-in-time recursion: p interleaved sub-DFTs of length m,
    // then one cross-stage butterfly.
    fn work(&self, out: &mut [Cpx], input: &[Cpx], fstride: usize, stage: usize) {
        let (p, m) = self.stages[stage];
        if m == 1 {
            for (q, o) in out[..p].iter_mut().enumerate() {
                *o = input[q * fstride];
            }
        } else {
            for q in 0..p {
                self.work(
                    &mut out[q * m..(q + 1) * m],
                    &input[q * fstride..],
                    fstride * p,
                    stage + 1,
                );
            }
        }
        match p {
            2 => self.bfly2(out, fstride, m),
            3 => self.bfly3(out, fstride, m),
            4 => self.bfly4(out, fstride, m),
            5 => self.bfly5(out, fstride, m),
            _ => unreachable!(),
        }
    }

    fn bfly2(&self, out: &mut [Cpx], fstride: usize, m: usize) {
        for k in 0..m {
            let t = out[m + k] * self.twiddles[k * fstride];
            out[m + k] = out[k] - t;
            out[k] = out[k] + t;
        }
    }

    fn bfly3(&self, out: &mut [Cpx], fstride: usize, m: usize) {
        let epi3 = self.twiddles[fstride * m];
        for k in 0..m {
            let s1 = out[m + k] * self.twiddles[k * fstride];
            let s2 = out[2 * m + k] * self.twiddles[2 * k * fstride];
            let sum = s1 + s2;
            let dif = (s1 - s2) * epi3.i;

            let a = out[k] - sum * 0.5;
            out[k] = out[k] + sum;
            out[2 * m + k] = Cpx::new(a.r + dif.i, a.i - dif.r);
            out[m + k] = Cpx::new(a.r - dif.i, a.i + dif.r);
        }
    }

    fn bfly4(&self, out: &mut [Cpx], fstride: usize, m: usize) {
        for k in 0..m {
            let s0 = out[m + k] * self.twiddles[k * fstride];
            let s1 = out[2 * m + k] * self.twiddles[2 * k * fstride];
            let s2 = out[3 * m + k] * self.twiddles[3 * k * fstride];

            let neg = out[k] - s1;
            let pos = out[k] + s1;
            let sum = s0 + s2;
            let dif = s0 - s2;

            out[k] = pos + sum;
            out[2 * m + k] = pos - sum;
            out[m + k] = Cpx::new(neg.r + dif.i, neg.i - dif.r);
            out[3 * m + k] = Cpx::new(neg.r - dif.i, neg.i + dif.r);
        }
    }

    fn bfly5(&self, out: &mut [Cpx], fstride: usize, m: usize) {
        let ya = self.twiddles[fstride * m];
        let yb = self.twiddles[fstride * 2 * m];
        for u in 0..m {
            let s0 = out[u];
            let s1 = out[m + u] * self.twiddles[u * fstride];
            let s2 = out[2 * m + u] * self.twiddles[2 * u * fstride];
            let s3 = out[3 * m + u] * self.twiddles[3 * u * fstride];
            let s4 = out[4 * m + u] * self.twiddles[4 * u * fstride];

            let s7 = s1 + s4;
            let s10 = s1 - s4;
            let s8 = s2 + s3;
            let s9 = s2 - s3;

            out[u] = Cpx::new(s0.r + s7.r + s8.r, s0.i + s7.i + s8.i);

            let s5 = Cpx::new(
                s0.r + s7.r * ya.r + s8.r * yb.r,
                s0.i + s7.i * ya.r + s8.i * yb.r,
            );
            let s6 = Cpx::new(s10.i * ya.i + s9.i * yb.i, -(s10.r * ya.i) - s9.r * yb.i);
            out[m + u] = s5 - s6;
            out[4 * m + u] = s5 + s6;

            let s11 = Cpx::new(
                s0.r + s7.r * yb.r + s8.r * ya.r,
                s0.i + s7.i * yb.r + s8.i * ya.r,
            );
            let s12 = Cpx::new(-(s10.i * yb.i) + s9.i * ya.i, s10.r * yb.i - s9.r * ya.i);
            out[2 * m + u] = s11 + s12;
            out[3 * m + u] = s11 - s12;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    fn naive_dft(fin: &[Cpx]) -> Vec<Cpx> {
        let n = fin.len();
        (0..n)
            .map(|k| {
                let mut acc = Cpx::ZERO;
                for (j, &x) in fin.iter().enumerate() {
                    let w = Cpx::cexp(-2.0 * PI * (k * j % n) as f64 / n as f64);
                    acc = acc + x * w;
                }
                acc
            })
            .collect()
    }

    #[test]
    fn impulse_is_flat() {
        let fft = Fft::new(320);
        let mut fin = vec![Cpx::ZERO; 320];
        fin[0] = Cpx::new(1.0, 0.0);
        let mut fout = vec![Cpx::ZERO; 320];
        fft.transform(&fin, &mut fout);
        for bin in fout {
            assert_relative_eq!(bin.r, 1.0, epsilon = 1e-5);
            assert_relative_eq!(bin.i, 0.0, epsilon = 1e-5);
        }
    }

    #[test]
    fn matches_naive_dft() {
        // Deterministic pseudo-random input.
        let mut seed = 0x2545f491u32;
        let mut next = || {
            seed = seed.wrapping_mul(1664525).wrapping_add(1013904223);
            (seed >> 16) as f32 / 65536.0 - 0.5
        };
        for n in [20, 60, 320] {
            let fft = Fft::new(n);
            let fin: Vec<Cpx> = (0..n).map(|_| Cpx::new(next(), next())).collect();
            let mut fout = vec![Cpx::ZERO; n];
            fft.transform(&fin, &mut fout);
            let want = naive_dft(&fin);
            for (got, want) in fout.iter().zip(&want) {
                assert_relative_eq!(got.r, want.r, epsilon = 2e-3);
                assert_relative_eq!(got.i, want.i, epsilon = 2e-3);
            }
        }
    }

    #[test]
    fn sinusoid_hits_one_bin() {
        let n = 160;
        let fft = Fft::new(n);
        let fin: Vec<Cpx> = (0..n)
            .map(|j| Cpx::cexp(2.0 * PI * 5.0 * j as f64 / n as f64))
            .collect();
        let mut fout = vec![Cpx::ZERO; n];
        fft.transform(&fin, &mut fout);
        for (k, bin) in fout.iter().enumerate() {
            let want = if k == 5 { n as f32 } else { 0.0 };
            assert_relative_eq!(bin.r, want, epsilon = 1e-3);
            assert_relative_eq!(bin.i, 0.0, epsilon = 1e-3);
        }
    }
}
