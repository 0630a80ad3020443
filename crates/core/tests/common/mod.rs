//! Synthetic recordings for integration tests.
//!
//! Each lead is a scaled copy of one beat template laid over baseline
//! wander and a little noise, so reference beat subtraction leaves a small
//! residual and compression has something to work with.

#![allow(dead_code)]

use rand::{Rng, SeedableRng};
use rand_chacha::ChaCha8Rng;
use scp_ecg_core::{LeadSignal, LeadType, QrsZone, Signal};

pub const SAMPLES_PER_SECOND: u32 = 500;
/// Reference beat length (300 ms)
pub const BEAT_LEN: usize = 150;
/// 1-based fiducial sample within the beat
pub const BEAT_FIDUCIAL: usize = 51;
/// Samples between beats (120 bpm)
pub const BEAT_SPACING: usize = 400;

const LEADS: [LeadType; 8] = [
    LeadType::I,
    LeadType::II,
    LeadType::V1,
    LeadType::V2,
    LeadType::V3,
    LeadType::V4,
    LeadType::V5,
    LeadType::V6,
];

/// P, QRS, S and T waves in AVM units.
pub fn beat_template() -> Vec<f64> {
    let half_sine = |k: usize, from: usize, width: usize, amplitude: f64| {
        amplitude * (std::f64::consts::PI * (k - from) as f64 / width as f64).sin()
    };
    (0..BEAT_LEN)
        .map(|k| {
            let r = BEAT_FIDUCIAL - 1;
            match k {
                10..=29 => half_sine(k, 10, 20, 80.0),
                _ if k.abs_diff(r) < 8 => 1000.0 * (1.0 - k.abs_diff(r) as f64 / 8.0),
                58..=65 => -200.0,
                90..=129 => half_sine(k, 90, 40, 150.0),
                _ => 0.0,
            }
        })
        .collect()
}

/// 1-based fiducial sample numbers of every complete beat.
pub fn beat_fiducials(len: usize) -> Vec<usize> {
    (0..)
        .map(|n| 201 + n * BEAT_SPACING)
        .take_while(|f| f - BEAT_FIDUCIAL + BEAT_LEN <= len)
        .collect()
}

/// Eight-lead recording at 500 Hz, 5 µV per unit.
pub fn synthetic_recording(seed: u64, seconds: usize) -> Signal {
    let mut rng = ChaCha8Rng::seed_from_u64(seed);
    let len = seconds * SAMPLES_PER_SECOND as usize;
    let template = beat_template();
    let fiducials = beat_fiducials(len);

    let leads = LEADS
        .iter()
        .map(|&lead| {
            let gain: f64 = rng.gen_range(0.4..1.2);
            let phase: f64 = rng.gen_range(0.0..std::f64::consts::TAU);
            let median: Vec<i16> = template.iter().map(|v| (v * gain).round() as i16).collect();

            let mut rhythm: Vec<i16> = (0..len)
                .map(|i| {
                    let wander = 40.0 * (i as f64 * std::f64::consts::TAU / 1500.0 + phase).sin();
                    wander.round() as i16 + rng.gen_range(-3..=3)
                })
                .collect();
            for &f in &fiducials {
                let first = f - BEAT_FIDUCIAL;
                for (k, &v) in median.iter().enumerate() {
                    rhythm[first + k] += v;
                }
            }
            LeadSignal::new(lead, rhythm).with_median(median)
        })
        .collect();

    Signal {
        leads,
        rhythm_avm: 5.0,
        rhythm_samples_per_second: SAMPLES_PER_SECOND,
        median_avm: 5.0,
        median_samples_per_second: SAMPLES_PER_SECOND,
        median_length_ms: (BEAT_LEN * 1000 / SAMPLES_PER_SECOND as usize) as u16,
        median_fiducial_point: BEAT_FIDUCIAL as u16,
        qrs_zones: fiducials
            .iter()
            .map(|&f| QrsZone::new(f as i32 - 20, f as i32, f as i32 + 40))
            .collect(),
        protected_zones: Vec::new(),
    }
}
