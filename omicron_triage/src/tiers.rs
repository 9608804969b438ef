//! SNR tiers and axis policy for the trigger plot.

use crate::{EventRecord, Params, TriggerTable};

/// A cumulative SNR cut: every trigger at or above `threshold` belongs.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Tier {
    pub threshold: f64,
    pub color: [u8; 3],
}

impl Tier {
    pub fn label(&self) -> String {
        format!("SNR >= {:?}", self.threshold)
    }
}

/// Thresholds `min_snr + offset`, lowest first so higher tiers draw on top.
/// Colors repeat if there are more offsets than colors; black if there are none.
pub fn derive_tiers(min_snr: f64, params: &Params) -> Vec<Tier> {
    let mut tiers: Vec<Tier> = params
        .tier_offsets
        .iter()
        .enumerate()
        .map(|(idx, offset)| Tier {
            threshold: min_snr + offset,
            color: params
                .tier_colors
                .get(idx % params.tier_colors.len().max(1))
                .copied()
                .unwrap_or([0, 0, 0]),
        })
        .collect();
    tiers.sort_by(|a, b| a.threshold.total_cmp(&b.threshold));
    tiers
}

pub fn select<'a>(table: &'a TriggerTable, tier: &Tier) -> Vec<&'a EventRecord> {
    table
        .records()
        .iter()
        .filter(|r| r.snr >= tier.threshold)
        .collect()
}

/// Log-scale SNR bounds for the lowest tier's triggers. The upper bound is the
/// next power of ten at or above the loudest of them, plus one; with nothing
/// to plot it is `10^fallback_exponent + 1`.
pub fn quality_axis(lowest: &[&EventRecord], floor: f64, fallback_exponent: i32) -> (f64, f64) {
    let mut upper = match lowest.iter().map(|r| r.snr).reduce(f64::max) {
        Some(max) if max > 0.0 => 10f64.powi(max.log10().ceil() as i32) + 1.0,
        _ => 10f64.powi(fallback_exponent) + 1.0,
    };
    if upper <= floor {
        upper = 10f64.powi(floor.log10().floor() as i32 + 1) + 1.0;
    }
    (floor, upper)
}

/// `count` evenly spaced positions from `start` to `end`, both included.
pub fn time_ticks(start: f64, end: f64, count: usize) -> Vec<f64> {
    match count {
        0 => Vec::new(),
        1 => vec![start],
        _ => {
            let step = (end - start) / (count - 1) as f64;
            (0..count)
                .map(|i| if i == count - 1 { end } else { start + step * i as f64 })
                .collect()
        }
    }
}

pub fn elapsed_label(value: f64, start: f64) -> String {
    let elapsed = value - start;
    if elapsed.fract() == 0.0 {
        format!("{:.0}", elapsed)
    } else {
        format!("{}", elapsed)
    }
}
