//! Interpolation kernels for the sample generator
//!
//! Seven selectable kernels: nearest, linear, 4- and 6-point Lagrange
//! polynomials, a Blackman-windowed sinc (pre-scaled against aliasing when
//! downsampling), a flat-top-windowed sinc and Lanczos (a = 3). The sinc
//! family reads from tables precomputed at 8192 steps per sample.
//!
//! Decoded waveforms are wrapped with eight guard samples on both sides so
//! no kernel ever indexes out of bounds: the left guard repeats the first
//! sample, the right guard continues from the loop start for looping waves
//! and is silent otherwise.

use sdat_core::Swav;
use std::f64::consts::PI;

/// Half-support of the widest kernel, also the guard width.
pub const SINC_WIDTH: usize = 8;

/// Table resolution: steps per unit distance.
const SINC_RESOLUTION: usize = 8192;

/// One-sided table length (covers distances 0..=SINC_WIDTH/2).
const SINC_SAMPLES: usize = SINC_RESOLUTION * SINC_WIDTH / 2;

/// Interpolation method selector.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Interpolation {
    /// Nearest-sample lookup.
    None,
    /// Two-point linear blend.
    #[default]
    Linear,
    /// Cubic Lagrange over four points.
    FourPointLagrange,
    /// Quintic Lagrange over six points.
    SixPointLagrange,
    /// Blackman-windowed sinc, kernel pre-scaled when downsampling.
    Sinc,
    /// Flat-top-windowed sinc.
    SimpleSinc,
    /// Lanczos with a = 3.
    Lanczos,
}

impl Interpolation {
    /// Parse a method by name (CLI spelling).
    pub fn from_name(name: &str) -> Option<Self> {
        match name.to_ascii_lowercase().as_str() {
            "none" | "nearest" => Some(Interpolation::None),
            "linear" => Some(Interpolation::Linear),
            "lagrange4" | "4-point-lagrange" => Some(Interpolation::FourPointLagrange),
            "lagrange6" | "6-point-lagrange" => Some(Interpolation::SixPointLagrange),
            "sinc" => Some(Interpolation::Sinc),
            "simple-sinc" | "simplesinc" => Some(Interpolation::SimpleSinc),
            "lanczos" => Some(Interpolation::Lanczos),
            _ => None,
        }
    }

    /// Canonical spelling.
    pub fn name(&self) -> &'static str {
        match self {
            Interpolation::None => "none",
            Interpolation::Linear => "linear",
            Interpolation::FourPointLagrange => "lagrange4",
            Interpolation::SixPointLagrange => "lagrange6",
            Interpolation::Sinc => "sinc",
            Interpolation::SimpleSinc => "simple-sinc",
            Interpolation::Lanczos => "lanczos",
        }
    }
}

/// A decoded waveform padded with guard samples for the wide kernels.
#[derive(Debug, Clone)]
pub struct PaddedWave {
    padded: Vec<f32>,
    /// Loop start in the decoded sample domain.
    pub loop_start: usize,
    /// Decoded sample count.
    pub len: usize,
    /// Whether the wave loops.
    pub looping: bool,
}

impl PaddedWave {
    /// Wrap a decoded SWAV.
    pub fn new(swav: &Swav) -> Self {
        let len = swav.samples.len();
        let mut padded = Vec::with_capacity(len + 2 * SINC_WIDTH);
        let first = swav.samples.first().copied().unwrap_or(0.0);
        padded.extend(std::iter::repeat(first).take(SINC_WIDTH));
        padded.extend_from_slice(&swav.samples);
        if swav.looping && len > swav.loop_start {
            for i in 0..SINC_WIDTH {
                let wrapped = swav.loop_start + i % (len - swav.loop_start).max(1);
                padded.push(swav.samples[wrapped.min(len - 1)]);
            }
        } else {
            padded.extend(std::iter::repeat(0.0).take(SINC_WIDTH));
        }
        PaddedWave {
            padded,
            loop_start: swav.loop_start,
            len,
            looping: swav.looping,
        }
    }

    /// Loop length in samples.
    pub fn loop_length(&self) -> usize {
        self.len - self.loop_start
    }

    /// Sample at a logical index; guard samples absorb the kernels'
    /// out-of-range taps.
    #[inline]
    pub fn at(&self, index: isize) -> f32 {
        let padded = index + SINC_WIDTH as isize;
        if padded < 0 {
            self.padded[0]
        } else if padded as usize >= self.padded.len() {
            *self.padded.last().unwrap()
        } else {
            self.padded[padded as usize]
        }
    }
}

/// Kernel evaluator with its precomputed tables.
pub struct Interpolator {
    mode: Interpolation,
    sinc_lut: Vec<f32>,
    window_lut: Vec<f32>,
}

impl Interpolator {
    /// Build an evaluator, precomputing tables for the sinc family.
    pub fn new(mode: Interpolation) -> Self {
        let (sinc_lut, window_lut) = match mode {
            Interpolation::Sinc => (
                build_lut(|x| sinc(x)),
                build_lut(|x| blackman(x, SINC_WIDTH as f64 / 2.0)),
            ),
            Interpolation::SimpleSinc => (
                build_lut(|x| sinc(x) * flat_top(x, SINC_WIDTH as f64 / 2.0)),
                Vec::new(),
            ),
            Interpolation::Lanczos => (build_lut(|x| lanczos(x, 3.0)), Vec::new()),
            _ => (Vec::new(), Vec::new()),
        };
        Interpolator {
            mode,
            sinc_lut,
            window_lut,
        }
    }

    /// The method this evaluator implements.
    pub fn mode(&self) -> Interpolation {
        self.mode
    }

    /// Sample `wave` at fractional `position`. `increase` is the playback
    /// step per output sample; the Blackman sinc widens its kernel with it
    /// to cut aliasing when downsampling.
    pub fn sample(&self, wave: &PaddedWave, position: f64, increase: f64) -> f32 {
        let base = position.floor() as isize;
        let frac = position - base as f64;

        match self.mode {
            Interpolation::None => wave.at(base),
            Interpolation::Linear => {
                let a = wave.at(base);
                let b = wave.at(base + 1);
                a + (b - a) * frac as f32
            }
            Interpolation::FourPointLagrange => lagrange(wave, base, frac, -1, 2),
            Interpolation::SixPointLagrange => lagrange(wave, base, frac, -2, 3),
            Interpolation::Sinc => {
                let step = if increase > 1.0 {
                    (SINC_RESOLUTION as f64 / increase).floor()
                } else {
                    SINC_RESOLUTION as f64
                };
                let half = SINC_WIDTH as isize / 2;
                let mut weight_sum = 0.0f64;
                let mut total = 0.0f64;
                for m in (1 - half)..=half {
                    let x = (m as f64 - frac).abs();
                    let sinc_i = (x * step) as usize;
                    let win_i = (x * SINC_RESOLUTION as f64) as usize;
                    if sinc_i > SINC_SAMPLES || win_i > SINC_SAMPLES {
                        continue;
                    }
                    let w = self.sinc_lut[sinc_i] as f64 * self.window_lut[win_i] as f64;
                    weight_sum += w;
                    total += w * wave.at(base + m) as f64;
                }
                if weight_sum == 0.0 {
                    0.0
                } else {
                    (total / weight_sum) as f32
                }
            }
            Interpolation::SimpleSinc | Interpolation::Lanczos => {
                let half = if self.mode == Interpolation::Lanczos {
                    3isize
                } else {
                    SINC_WIDTH as isize / 2
                };
                let reach = half as f64;
                let mut weight_sum = 0.0f64;
                let mut total = 0.0f64;
                for m in (1 - half)..=half {
                    let x = (m as f64 - frac).abs();
                    if x >= reach {
                        continue;
                    }
                    let i = (x * SINC_RESOLUTION as f64) as usize;
                    if i > SINC_SAMPLES {
                        continue;
                    }
                    let w = self.sinc_lut[i] as f64;
                    weight_sum += w;
                    total += w * wave.at(base + m) as f64;
                }
                if weight_sum == 0.0 {
                    0.0
                } else {
                    (total / weight_sum) as f32
                }
            }
        }
    }
}

/// Lagrange polynomial through the taps `first..=last` around `base`.
fn lagrange(wave: &PaddedWave, base: isize, frac: f64, first: isize, last: isize) -> f32 {
    let mut total = 0.0f64;
    for k in first..=last {
        let mut weight = 1.0f64;
        for j in first..=last {
            if j != k {
                weight *= (frac - j as f64) / (k as f64 - j as f64);
            }
        }
        total += weight * wave.at(base + k) as f64;
    }
    total as f32
}

fn build_lut(f: impl Fn(f64) -> f64) -> Vec<f32> {
    (0..=SINC_SAMPLES)
        .map(|i| f(i as f64 / SINC_RESOLUTION as f64) as f32)
        .collect()
}

fn sinc(x: f64) -> f64 {
    if x == 0.0 {
        1.0
    } else {
        (PI * x).sin() / (PI * x)
    }
}

/// Centered Blackman window over `[-reach, reach]`, evaluated at `|x|`.
fn blackman(x: f64, reach: f64) -> f64 {
    if x >= reach {
        return 0.0;
    }
    let t = PI * x / reach;
    0.42 + 0.5 * t.cos() + 0.08 * (2.0 * t).cos()
}

/// Centered flat-top window over `[-reach, reach]`, evaluated at `|x|`.
fn flat_top(x: f64, reach: f64) -> f64 {
    if x >= reach {
        return 0.0;
    }
    let t = PI * x / reach;
    0.215_578_95 + 0.416_631_58 * t.cos() + 0.277_263_158 * (2.0 * t).cos()
        + 0.083_578_947 * (3.0 * t).cos()
        + 0.006_947_368 * (4.0 * t).cos()
}

fn lanczos(x: f64, a: f64) -> f64 {
    if x >= a {
        0.0
    } else {
        sinc(x) * sinc(x / a)
    }
}
