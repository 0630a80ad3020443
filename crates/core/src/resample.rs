//! Polynomial resampling between integer sample rates.
//!
//! Both rates are mapped onto a common grid at `lcm(src, dst)` ticks per
//! second so every position is an integer. Output samples that land on an
//! input sample are copied; the rest are evaluated from the Newton form of
//! the polynomial through a symmetric window of input samples. The window
//! shrinks near the ends of the signal.
//!
//! Doubling the rate with a full window always evaluates at the midpoint, so
//! the Lagrange weights for that case are cached per window size.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::error::{LeadGeometryError, Result};
use crate::qrs::{ProtectedZone, QrsZone};
use crate::signal::Signal;

/// Default interpolation window in milliseconds
pub const DEFAULT_WINDOW_MS: u32 = 20;

/// Resampler with a per-instance cache of midpoint weights.
///
/// Share one instance by reference across calls; the cache is filled lazily.
#[derive(Debug)]
pub struct Resampler {
    window_ms: u32,
    midpoint_weights: Mutex<HashMap<usize, Arc<[f64]>>>,
}

impl Default for Resampler {
    fn default() -> Self {
        Self::new(DEFAULT_WINDOW_MS)
    }
}

impl Resampler {
    pub fn new(window_ms: u32) -> Self {
        Self {
            window_ms,
            midpoint_weights: Mutex::new(HashMap::new()),
        }
    }

    pub fn window_ms(&self) -> u32 {
        self.window_ms
    }

    /// Number of cached weight tables.
    pub fn cached_windows(&self) -> usize {
        self.midpoint_weights.lock().len()
    }

    /// Resample one lead from `src` to `dst` samples per second.
    ///
    /// The output holds `len * dst / src` samples (rounded down).
    pub fn resample(&self, samples: &[i16], src: u32, dst: u32) -> Result<Vec<i16>> {
        check_rate(src)?;
        check_rate(dst)?;
        if src == dst {
            return Ok(samples.to_vec());
        }

        let beat = lcm(src as u64, dst as u64);
        let src_step = beat / src as u64;
        let dst_step = beat / dst as u64;
        let n = samples.len();
        let out_len = (n as u64 * dst as u64 / src as u64) as usize;

        let half = self.window_nodes(src) / 2;
        let midpoint = if dst == src.saturating_mul(2) {
            Some(self.weights(half * 2))
        } else {
            None
        };

        let mut out = Vec::with_capacity(out_len);
        for j in 0..out_len as u64 {
            let pos = j * dst_step;
            let i0 = (pos / src_step) as usize;
            let rem = pos % src_step;
            if rem == 0 || i0 + 1 >= n {
                out.push(samples[i0.min(n - 1)]);
                continue;
            }

            let k = half.min(i0 + 1).min(n - 1 - i0);
            let value = match &midpoint {
                Some(weights) if k == half => {
                    let nodes = &samples[i0 + 1 - k..=i0 + k];
                    nodes.iter().zip(weights.iter()).map(|(&s, w)| s as f64 * w).sum::<f64>()
                }
                _ => newton(samples, i0, k, rem as f64 / src_step as f64),
            };
            out.push(value.round().clamp(i16::MIN as f64, i16::MAX as f64) as i16);
        }
        tracing::trace!(src, dst, input = n, output = out.len(), "resampled lead");
        Ok(out)
    }

    /// Resample every lead of `signal` and rescale its timing.
    ///
    /// `rhythm_sps` converts rhythm data, extents and zones; `median_sps`
    /// converts reference beats and the fiducial point. `None` keeps a rate.
    pub fn resample_signal(&self, signal: &mut Signal, rhythm_sps: Option<u32>, median_sps: Option<u32>) -> Result<()> {
        if let Some(dst) = rhythm_sps.filter(|&dst| dst != signal.rhythm_samples_per_second) {
            let src = signal.rhythm_samples_per_second;
            check_rate(src)?;
            check_rate(dst)?;
            let scale = |x: i64| x * dst as i64 / src as i64;
            for lead in &mut signal.leads {
                if let Some(rhythm) = &lead.rhythm {
                    let resampled = self.resample(rhythm, src, dst)?;
                    lead.rhythm_start = scale(lead.rhythm_start as i64) as usize;
                    lead.rhythm_end = lead.rhythm_start + resampled.len();
                    lead.rhythm = Some(resampled);
                } else {
                    lead.rhythm_start = scale(lead.rhythm_start as i64) as usize;
                    lead.rhythm_end = scale(lead.rhythm_end as i64) as usize;
                }
            }
            // Sample numbers are 1-based
            let point = |x: i32| (scale(x as i64 - 1) + 1) as i32;
            for zone in &mut signal.qrs_zones {
                *zone = QrsZone {
                    start: point(zone.start),
                    fiducial: point(zone.fiducial),
                    end: point(zone.end),
                    ..*zone
                };
            }
            for zone in &mut signal.protected_zones {
                if !zone.is_empty() {
                    *zone = ProtectedZone::new(point(zone.start), point(zone.end));
                }
            }
            signal.rhythm_samples_per_second = dst;
            tracing::debug!(src, dst, "resampled rhythm");
        }

        if let Some(dst) = median_sps.filter(|&dst| dst != signal.median_samples_per_second) {
            let src = signal.median_samples_per_second;
            check_rate(src)?;
            check_rate(dst)?;
            for lead in &mut signal.leads {
                if let Some(median) = &lead.median {
                    lead.median = Some(self.resample(median, src, dst)?);
                }
            }
            signal.median_fiducial_point = scale_fiducial(signal.median_fiducial_point, src, dst);
            signal.median_samples_per_second = dst;
            tracing::debug!(src, dst, "resampled reference beats");
        }
        Ok(())
    }

    /// Even window size in source samples, at least 2.
    fn window_nodes(&self, src: u32) -> usize {
        let nodes = (self.window_ms as u64 * src as u64 + 500) / 1000;
        let nodes = (nodes + nodes % 2) as usize;
        nodes.max(2)
    }

    fn weights(&self, nodes: usize) -> Arc<[f64]> {
        let mut cache = self.midpoint_weights.lock();
        cache
            .entry(nodes)
            .or_insert_with(|| midpoint_weights(nodes))
            .clone()
    }
}

/// Map a 1-based fiducial sample to another rate.
pub fn scale_fiducial(fiducial: u16, src: u32, dst: u32) -> u16 {
    if fiducial == 0 || src == 0 {
        return fiducial;
    }
    let scaled = (fiducial as u64 - 1) * dst as u64 / src as u64 + 1;
    scaled.min(u16::MAX as u64) as u16
}

fn check_rate(rate: u32) -> Result<()> {
    if rate == 0 {
        return Err(LeadGeometryError::InvalidSampleRate("0 samples per second".into()).into());
    }
    Ok(())
}

fn gcd(mut a: u64, mut b: u64) -> u64 {
    while b != 0 {
        (a, b) = (b, a % b);
    }
    a
}

fn lcm(a: u64, b: u64) -> u64 {
    a / gcd(a, b) * b
}

/// Newton interpolation through samples `i0-k+1..=i0+k`, evaluated at `i0 + t`.
fn newton(samples: &[i16], i0: usize, k: usize, t: f64) -> f64 {
    if k == 0 {
        return samples[i0] as f64;
    }
    let first = i0 + 1 - k;
    let xs: Vec<f64> = (0..2 * k).map(|m| m as f64 - (k as f64 - 1.0)).collect();
    let mut coef: Vec<f64> = samples[first..first + 2 * k].iter().map(|&s| s as f64).collect();
    for level in 1..coef.len() {
        for m in (level..coef.len()).rev() {
            coef[m] = (coef[m] - coef[m - 1]) / (xs[m] - xs[m - level]);
        }
    }
    let mut value = coef[coef.len() - 1];
    for m in (0..coef.len() - 1).rev() {
        value = value * (t - xs[m]) + coef[m];
    }
    value
}

/// Lagrange weights at the midpoint of `nodes` equally spaced samples.
fn midpoint_weights(nodes: usize) -> Arc<[f64]> {
    let half = nodes / 2;
    let xs: Vec<f64> = (0..nodes).map(|m| m as f64 - (half as f64 - 1.0)).collect();
    xs.iter()
        .enumerate()
        .map(|(m, &xm)| {
            xs.iter()
                .enumerate()
                .filter(|&(l, _)| l != m)
                .map(|(_, &xl)| (0.5 - xl) / (xm - xl))
                .product::<f64>()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;

    fn sine(len: usize, period: f64, amplitude: f64) -> Vec<i16> {
        (0..len)
            .map(|i| (amplitude * (i as f64 * std::f64::consts::TAU / period).sin()).round() as i16)
            .collect()
    }

    #[test]
    fn test_identity() {
        let resampler = Resampler::default();
        let samples = sine(300, 37.0, 1200.0);
        for rate in [100, 250, 500, 1000] {
            assert_eq!(resampler.resample(&samples, rate, rate).unwrap(), samples);
        }
    }

    #[test]
    fn test_zero_rate_rejected() {
        let resampler = Resampler::default();
        assert!(matches!(
            resampler.resample(&[1, 2, 3], 0, 500),
            Err(Error::InvalidLeadGeometry(LeadGeometryError::InvalidSampleRate(_)))
        ));
        assert!(resampler.resample(&[1, 2, 3], 500, 0).is_err());
    }

    #[test]
    fn test_downsample_copies_aligned_samples() {
        let resampler = Resampler::default();
        let samples: Vec<i16> = (0..100).map(|i| i * 7 - 300).collect();
        let out = resampler.resample(&samples, 500, 250).unwrap();
        assert_eq!(out.len(), 50);
        for (j, &v) in out.iter().enumerate() {
            assert_eq!(v, samples[2 * j]);
        }
    }

    #[test]
    fn test_upsample_linear_is_exact() {
        let resampler = Resampler::default();
        // Even steps keep the midpoints integral
        let samples: Vec<i16> = (0..50).map(|i| i * 4 - 80).collect();
        let out = resampler.resample(&samples, 250, 500).unwrap();
        assert_eq!(out.len(), 100);
        for j in 0..98 {
            assert_eq!(out[j] as i32, (j as i32) * 2 - 80, "output {}", j);
        }
        assert_eq!(resampler.cached_windows(), 1);
    }

    #[test]
    fn test_fast_path_matches_newton() {
        let samples = sine(200, 23.0, 3000.0);
        let half = 3;
        let weights = midpoint_weights(2 * half);
        for i0 in half..samples.len() - half {
            let fast: f64 = samples[i0 + 1 - half..=i0 + half]
                .iter()
                .zip(weights.iter())
                .map(|(&s, w)| s as f64 * w)
                .sum();
            let slow = newton(&samples, i0, half, 0.5);
            assert!((fast - slow).abs() < 1e-6, "i0 {}: {} vs {}", i0, fast, slow);
        }
    }

    #[test]
    fn test_non_integer_ratio_tracks_sine() {
        let resampler = Resampler::default();
        let samples = sine(500, 100.0, 2000.0);
        let out = resampler.resample(&samples, 500, 300).unwrap();
        assert_eq!(out.len(), 300);
        // 100 source samples per period = 60 output samples per period
        let expected = sine(300, 60.0, 2000.0);
        for j in 5..295 {
            assert!((out[j] - expected[j]).abs() <= 2, "output {}: {} vs {}", j, out[j], expected[j]);
        }
    }

    #[test]
    fn test_scale_fiducial() {
        assert_eq!(scale_fiducial(201, 500, 1000), 401);
        assert_eq!(scale_fiducial(401, 1000, 500), 201);
        assert_eq!(scale_fiducial(1, 250, 500), 1);
    }
}
