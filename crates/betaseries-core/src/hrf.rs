//! Hemodynamic response models and trial-regressor convolution.
//!
//! Kernels are sampled on the oversampled grid (`tr / oversampling`) and
//! normalized to unit sum. Convolution runs in the frequency domain: the kernel
//! spectrum is computed once per subject and reused for every trial column.

use rustfft::num_complex::Complex;
use rustfft::{Fft, FftPlanner};
use serde::{Deserialize, Serialize};
use statrs::distribution::{Continuous, Gamma};
use std::sync::Arc;

use crate::events::Trial;

/// Canonical response shape. Every parameter is in seconds and comes from the
/// study configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case", deny_unknown_fields)]
pub enum ResponseModel {
    /// Difference of two gamma densities: a peak and a post-stimulus undershoot.
    DoubleGamma {
        peak_delay: f64,
        undershoot_delay: f64,
        peak_dispersion: f64,
        undershoot_dispersion: f64,
        /// Undershoot amplitude relative to the peak.
        ratio: f64,
        onset: f64,
        kernel_length: f64,
    },
    /// Single gamma density, no undershoot.
    Gamma {
        delay: f64,
        dispersion: f64,
        onset: f64,
        kernel_length: f64,
    },
}

impl ResponseModel {
    pub fn validate(&self) -> Result<(), String> {
        let positive = |name: &str, v: f64| {
            if v.is_finite() && v > 0.0 {
                Ok(())
            } else {
                Err(format!("{name} must be positive, got {v}"))
            }
        };
        let finite = |name: &str, v: f64| {
            if v.is_finite() {
                Ok(())
            } else {
                Err(format!("{name} must be finite"))
            }
        };
        match *self {
            Self::DoubleGamma {
                peak_delay,
                undershoot_delay,
                peak_dispersion,
                undershoot_dispersion,
                ratio,
                onset,
                kernel_length,
            } => {
                positive("peak_delay", peak_delay)?;
                positive("undershoot_delay", undershoot_delay)?;
                positive("peak_dispersion", peak_dispersion)?;
                positive("undershoot_dispersion", undershoot_dispersion)?;
                positive("kernel_length", kernel_length)?;
                finite("onset", onset)?;
                if !(ratio.is_finite() && ratio >= 0.0) {
                    return Err(format!("ratio must be non-negative, got {ratio}"));
                }
                Ok(())
            }
            Self::Gamma {
                delay,
                dispersion,
                onset,
                kernel_length,
            } => {
                positive("delay", delay)?;
                positive("dispersion", dispersion)?;
                positive("kernel_length", kernel_length)?;
                finite("onset", onset)
            }
        }
    }

    /// Sample the kernel at spacing `dt`, normalized to unit sum.
    pub fn kernel(&self, dt: f64) -> Vec<f64> {
        let (onset, kernel_length) = match *self {
            Self::DoubleGamma {
                onset,
                kernel_length,
                ..
            }
            | Self::Gamma {
                onset,
                kernel_length,
                ..
            } => (onset, kernel_length),
        };

        let n = ((kernel_length / dt).round() as usize).max(2);
        let step = kernel_length / (n - 1) as f64;
        let mut kernel: Vec<f64> = (0..n)
            .map(|i| {
                let t = i as f64 * step - onset - dt;
                match *self {
                    Self::DoubleGamma {
                        peak_delay,
                        undershoot_delay,
                        peak_dispersion,
                        undershoot_dispersion,
                        ratio,
                        ..
                    } => {
                        gamma_density(t, peak_delay, peak_dispersion)
                            - ratio * gamma_density(t, undershoot_delay, undershoot_dispersion)
                    }
                    Self::Gamma {
                        delay, dispersion, ..
                    } => gamma_density(t, delay, dispersion),
                }
            })
            .collect();

        let sum: f64 = kernel.iter().sum();
        if sum.abs() > f64::EPSILON {
            for k in &mut kernel {
                *k /= sum;
            }
        }
        kernel
    }
}

/// Gamma density with shape `delay / dispersion` and scale `dispersion`.
fn gamma_density(t: f64, delay: f64, dispersion: f64) -> f64 {
    if t <= 0.0 {
        return 0.0;
    }
    match Gamma::new(delay / dispersion, 1.0 / dispersion) {
        Ok(g) => g.pdf(t),
        Err(_) => 0.0,
    }
}

// ---------------------------------------------------------------------------
// Convolution
// ---------------------------------------------------------------------------

/// Builds one downsampled regressor per trial for a fixed acquisition grid.
pub struct TrialConvolver {
    n_timepoints: usize,
    oversampling: usize,
    resolution: f64,
    n_fine: usize,
    kernel_spectrum: Vec<Complex<f64>>,
    fft: Arc<dyn Fft<f64>>,
    ifft: Arc<dyn Fft<f64>>,
}

impl TrialConvolver {
    pub fn new(model: &ResponseModel, tr: f64, n_timepoints: usize, oversampling: usize) -> Self {
        let resolution = tr / oversampling as f64;
        let kernel = model.kernel(resolution);
        let n_fine = n_timepoints * oversampling;
        let fft_len = (n_fine + kernel.len()).next_power_of_two();

        let mut planner = FftPlanner::<f64>::new();
        let fft = planner.plan_fft_forward(fft_len);
        let ifft = planner.plan_fft_inverse(fft_len);

        let mut kernel_spectrum: Vec<Complex<f64>> = kernel
            .iter()
            .map(|&k| Complex::new(k, 0.0))
            .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
            .take(fft_len)
            .collect();
        fft.process(&mut kernel_spectrum);

        Self {
            n_timepoints,
            oversampling,
            resolution,
            n_fine,
            kernel_spectrum,
            fft,
            ifft,
        }
    }

    /// Boxcar covering the trial on the oversampled grid. Zero-duration
    /// events occupy a single bin.
    pub fn stick_function(&self, trial: &Trial) -> Vec<f64> {
        let mut sf = vec![0.0; self.n_fine];
        let start = (trial.onset / self.resolution).floor() as usize;
        let end = ((trial.onset + trial.duration) / self.resolution).ceil() as usize;
        let end = end.max(start + 1).min(self.n_fine);
        for v in sf.iter_mut().take(end).skip(start) {
            *v = 1.0;
        }
        sf
    }

    /// Convolved regressor sampled at each TR.
    pub fn regressor(&self, trial: &Trial) -> Vec<f64> {
        let sf = self.stick_function(trial);
        let fft_len = self.kernel_spectrum.len();

        let mut buf: Vec<Complex<f64>> = sf
            .iter()
            .map(|&v| Complex::new(v, 0.0))
            .chain(std::iter::repeat(Complex::new(0.0, 0.0)))
            .take(fft_len)
            .collect();
        self.fft.process(&mut buf);
        for (b, k) in buf.iter_mut().zip(&self.kernel_spectrum) {
            *b *= *k;
        }
        self.ifft.process(&mut buf);

        let scale = 1.0 / fft_len as f64;
        (0..self.n_timepoints)
            .map(|i| buf[i * self.oversampling].re * scale)
            .collect()
    }
}
