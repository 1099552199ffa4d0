//! ReplayGain loudness analysis
//!
//! The classic two-stage equal-loudness filter: a 10th-order Yule-Walker
//! IIR followed by a 2nd-order Butterworth high-pass, both per channel,
//! with coefficient sets per supported sample rate (44100, 48000 and
//! 32000 Hz here; anything else is a lookup miss, as in the reference
//! analyzer). Filtered energy is accumulated over 50 ms windows into a
//! 100-steps-per-dB histogram; the gain is the pink-noise reference level
//! minus the 95th-percentile loudness.
//!
//! Album analysis sums the per-track histograms and keeps the largest
//! track peak.

use crate::error::{ReplayerError, Result};

const YULE_ORDER: usize = 10;
const BUTTER_ORDER: usize = 2;

const RMS_WINDOW_TIME: f64 = 0.050;
const RMS_PERCENTILE: f64 = 0.95;
const STEPS_PER_DB: usize = 100;
const MAX_DB: usize = 120;
const HISTOGRAM_LEN: usize = STEPS_PER_DB * MAX_DB;

/// Pink-noise reference level in dB.
const PINK_REF: f64 = 64.82;

struct RateCoefficients {
    rate: u32,
    yule_b: [f64; YULE_ORDER + 1],
    yule_a: [f64; YULE_ORDER + 1],
    butter_b: [f64; BUTTER_ORDER + 1],
    butter_a: [f64; BUTTER_ORDER + 1],
}

static COEFFICIENTS: [RateCoefficients; 3] = [
    RateCoefficients {
        rate: 48000,
        yule_b: [
            0.03857599435200,
            -0.02160367184185,
            -0.00123395316851,
            -0.00009291677959,
            -0.01655260341619,
            0.02161526843274,
            -0.02074045215285,
            0.00594298065125,
            0.00306428023191,
            0.00012025322027,
            0.00288463683916,
        ],
        yule_a: [
            1.0,
            -3.84664617118067,
            7.81501653005538,
            -11.34170355132042,
            13.05504219327545,
            -12.28759895145294,
            9.48293806319790,
            -5.87257861775999,
            2.75465861874613,
            -0.86984376593551,
            0.13919314567432,
        ],
        butter_b: [0.98621192462708, -1.97242384925416, 0.98621192462708],
        butter_a: [1.0, -1.97223372919527, 0.97261396931306],
    },
    RateCoefficients {
        rate: 44100,
        yule_b: [
            0.05418656406430,
            -0.02911007808948,
            -0.00848709379851,
            -0.00851165645469,
            -0.00834990904936,
            0.02245293253339,
            -0.02596338512915,
            0.01624864962975,
            -0.00240879051584,
            0.00674613682247,
            -0.00187763777362,
        ],
        yule_a: [
            1.0,
            -3.47845948550071,
            6.36317777566148,
            -8.54751527471874,
            9.47693607801280,
            -8.81498681370155,
            6.85401540936998,
            -4.39470996079559,
            2.19611684890774,
            -0.75104302451432,
            0.13149317958808,
        ],
        butter_b: [0.98500175787242, -1.97000351574484, 0.98500175787242],
        butter_a: [1.0, -1.96977855582618, 0.97022847566350],
    },
    RateCoefficients {
        rate: 32000,
        yule_b: [
            0.15457299681924,
            -0.09331049056315,
            -0.06247880153653,
            0.02163541888798,
            -0.05588393329856,
            0.04781476674921,
            0.00222312597743,
            0.03174092540049,
            -0.01390589421898,
            0.00651420667831,
            -0.00881362733839,
        ],
        yule_a: [
            1.0,
            -2.37898834973084,
            2.84868151156327,
            -2.64577170229825,
            2.23697657451713,
            -1.67148153367602,
            1.00595954808547,
            -0.45953458054983,
            0.16378164858596,
            -0.05032077717131,
            0.02347897407020,
        ],
        butter_b: [0.97938932735214, -1.95877865470428, 0.97938932735214],
        butter_a: [1.0, -1.95835380975398, 0.95920349965459],
    },
];

/// Direct-form IIR state for one cascade stage of one channel.
#[derive(Clone)]
struct FilterState {
    x: Vec<f64>,
    y: Vec<f64>,
}

impl FilterState {
    fn new(order: usize) -> Self {
        FilterState {
            x: vec![0.0; order],
            y: vec![0.0; order],
        }
    }

    fn reset(&mut self) {
        self.x.iter_mut().for_each(|v| *v = 0.0);
        self.y.iter_mut().for_each(|v| *v = 0.0);
    }

    #[inline]
    fn process(&mut self, input: f64, b: &[f64], a: &[f64]) -> f64 {
        let mut output = b[0] * input;
        for i in 0..self.x.len() {
            output += b[i + 1] * self.x[i] - a[i + 1] * self.y[i];
        }
        for i in (1..self.x.len()).rev() {
            self.x[i] = self.x[i - 1];
            self.y[i] = self.y[i - 1];
        }
        self.x[0] = input;
        self.y[0] = output;
        output
    }
}

/// Loudness analyzer accumulating one track at a time.
pub struct GainAnalyzer {
    coefficients: &'static RateCoefficients,
    yule: [FilterState; 2],
    butter: [FilterState; 2],

    window_samples: usize,
    window_filled: usize,
    lsum: f64,
    rsum: f64,

    track_histogram: Vec<u32>,
    album_histogram: Vec<u32>,
    track_peak: f64,
    album_peak: f64,
}

impl GainAnalyzer {
    /// Create an analyzer; unsupported rates are a lookup miss.
    pub fn new(sample_rate: u32) -> Result<Self> {
        let coefficients = COEFFICIENTS
            .iter()
            .find(|c| c.rate == sample_rate)
            .ok_or_else(|| {
                ReplayerError::Lookup(format!(
                    "no ReplayGain filter coefficients for {} Hz",
                    sample_rate
                ))
            })?;
        Ok(GainAnalyzer {
            coefficients,
            yule: [FilterState::new(YULE_ORDER), FilterState::new(YULE_ORDER)],
            butter: [
                FilterState::new(BUTTER_ORDER),
                FilterState::new(BUTTER_ORDER),
            ],
            window_samples: (sample_rate as f64 * RMS_WINDOW_TIME).ceil() as usize,
            window_filled: 0,
            lsum: 0.0,
            rsum: 0.0,
            track_histogram: vec![0; HISTOGRAM_LEN],
            album_histogram: vec![0; HISTOGRAM_LEN],
            track_peak: 0.0,
            album_peak: 0.0,
        })
    }

    /// Feed interleaved stereo float frames in [-1, 1].
    pub fn process_interleaved(&mut self, frames: &[f32]) {
        for frame in frames.chunks_exact(2) {
            self.process_frame(frame[0], frame[1]);
        }
    }

    /// Feed one stereo frame.
    pub fn process_frame(&mut self, left: f32, right: f32) {
        self.track_peak = self
            .track_peak
            .max(left.abs() as f64)
            .max(right.abs() as f64);

        // The reference filters are designed for 16-bit sample scale.
        let left = left as f64 * 32767.0;
        let right = right as f64 * 32767.0;

        let c = self.coefficients;
        let left_mid = self.yule[0].process(left, &c.yule_b, &c.yule_a);
        let left_out = self.butter[0].process(left_mid, &c.butter_b, &c.butter_a);
        let right_mid = self.yule[1].process(right, &c.yule_b, &c.yule_a);
        let right_out = self.butter[1].process(right_mid, &c.butter_b, &c.butter_a);

        self.lsum += left_out * left_out;
        self.rsum += right_out * right_out;
        self.window_filled += 1;
        if self.window_filled >= self.window_samples {
            self.flush_window();
        }
    }

    fn flush_window(&mut self) {
        if self.window_filled == 0 {
            return;
        }
        let mean_square = (self.lsum + self.rsum) / self.window_filled as f64 * 0.5;
        let value = STEPS_PER_DB as f64 * 10.0 * (mean_square + 1e-37).log10();
        let index = (value as isize).clamp(0, HISTOGRAM_LEN as isize - 1) as usize;
        self.track_histogram[index] += 1;
        self.lsum = 0.0;
        self.rsum = 0.0;
        self.window_filled = 0;
    }

    /// Finish the current track: returns `(gain_db, peak)` and folds the
    /// track's statistics into the album. `None` without enough audio.
    pub fn finish_track(&mut self) -> Option<(f64, f64)> {
        self.flush_window();
        let gain = analyze_histogram(&self.track_histogram)?;
        let peak = self.track_peak;

        for (album, track) in self
            .album_histogram
            .iter_mut()
            .zip(self.track_histogram.iter_mut())
        {
            *album += *track;
            *track = 0;
        }
        self.album_peak = self.album_peak.max(self.track_peak);
        self.track_peak = 0.0;
        for state in self.yule.iter_mut().chain(self.butter.iter_mut()) {
            state.reset();
        }
        Some((gain, peak))
    }

    /// Album gain and peak over every finished track.
    pub fn album(&self) -> Option<(f64, f64)> {
        analyze_histogram(&self.album_histogram).map(|gain| (gain, self.album_peak))
    }
}

/// 95th-percentile loudness against the pink-noise reference.
fn analyze_histogram(histogram: &[u32]) -> Option<f64> {
    let total: u64 = histogram.iter().map(|&v| v as u64).sum();
    if total == 0 {
        return None;
    }
    let mut upper = (total as f64 * (1.0 - RMS_PERCENTILE)).ceil() as i64;
    let mut index = histogram.len();
    while index > 0 {
        index -= 1;
        upper -= histogram[index] as i64;
        if upper <= 0 {
            break;
        }
    }
    Some(PINK_REF - index as f64 / STEPS_PER_DB as f64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::f64::consts::TAU;

    fn feed_sine(analyzer: &mut GainAnalyzer, amplitude: f64, seconds: f64) {
        let rate = 44100.0;
        let mut phase = 0.0f64;
        for _ in 0..(rate * seconds) as usize {
            let s = (amplitude * phase.sin()) as f32;
            analyzer.process_frame(s, s);
            phase += TAU * 1000.0 / rate;
        }
    }

    #[test]
    fn test_unsupported_rate_is_lookup_miss() {
        assert!(GainAnalyzer::new(44100).is_ok());
        assert!(GainAnalyzer::new(48000).is_ok());
        assert!(GainAnalyzer::new(32000).is_ok());
        assert!(GainAnalyzer::new(22050).is_err());
        assert!(GainAnalyzer::new(0).is_err());
    }

    #[test]
    fn test_no_audio_no_gain() {
        let mut analyzer = GainAnalyzer::new(44100).unwrap();
        assert!(analyzer.finish_track().is_none());
    }

    #[test]
    fn test_louder_track_gets_smaller_gain() {
        let mut analyzer = GainAnalyzer::new(44100).unwrap();
        feed_sine(&mut analyzer, 0.1, 2.0);
        let (quiet_gain, quiet_peak) = analyzer.finish_track().unwrap();

        feed_sine(&mut analyzer, 0.8, 2.0);
        let (loud_gain, loud_peak) = analyzer.finish_track().unwrap();

        assert!(quiet_gain > loud_gain, "{} vs {}", quiet_gain, loud_gain);
        // 18 dB amplitude difference shows up as ~18 dB of gain delta.
        assert!(((quiet_gain - loud_gain) - 18.06).abs() < 1.0);
        assert!((quiet_peak - 0.1).abs() < 0.01);
        assert!((loud_peak - 0.8).abs() < 0.01);
    }

    #[test]
    fn test_album_accumulates() {
        let mut analyzer = GainAnalyzer::new(44100).unwrap();
        feed_sine(&mut analyzer, 0.2, 1.0);
        let (track_gain, _) = analyzer.finish_track().unwrap();
        let (album_gain, album_peak) = analyzer.album().unwrap();
        // A single-track album matches its only track.
        assert!((album_gain - track_gain).abs() < 1e-9);
        assert!((album_peak - 0.2).abs() < 0.01);

        feed_sine(&mut analyzer, 0.9, 1.0);
        analyzer.finish_track().unwrap();
        let (_, album_peak) = analyzer.album().unwrap();
        assert!((album_peak - 0.9).abs() < 0.01);
    }

    #[test]
    fn test_deterministic() {
        let run = || {
            let mut analyzer = GainAnalyzer::new(48000).unwrap();
            feed_sine(&mut analyzer, 0.25, 1.0);
            analyzer.finish_track().unwrap().0
        };
        assert_eq!(run(), run());
    }
}
