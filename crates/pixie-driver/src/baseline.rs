//! Channel baseline estimation
//!
//! A baseline is the DC level a channel's ADC sits at with no signal. It is
//! found from a histogram of ADC codes collected over one or more traces:
//! the level the signal spends most time at wins. Pulses riding on the
//! baseline land in sparsely populated codes and do not move the result.
//!
//! # Policy
//!
//! `end()` works on the occupied code range `[min, max]`:
//!
//! 1. The range is split into `noise_bins` equal-width buckets and the mode
//!    bucket is found.
//! 2. Neighbouring buckets whose count is within `noise_percent` of the mode
//!    count are merged with it into one cluster.
//! 3. The peak code inside the cluster is located and the baseline is the
//!    count-weighted mean of all codes within the noise margin of that
//!    peak, rounded to the nearest code.
//!
//! A range of a single code is that code.

use pixie_hw::AdcWord;
use tracing::debug;

/// Largest number of buckets the code range is split into
pub const MAX_NOISE_BINS: usize = 500;

/// Estimator tuning
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BaselineConfig {
    /// Buckets the occupied code range is split into, `1..=500`
    pub noise_bins: usize,
    /// Noise margin as a percentage of the ADC range, `0..=100`
    pub noise_percent: f64,
}

impl Default for BaselineConfig {
    fn default() -> Self {
        Self {
            noise_bins: 30,
            noise_percent: 0.5,
        }
    }
}

impl BaselineConfig {
    /// Create a config, clamping both values into range
    pub fn new(noise_bins: usize, noise_percent: f64) -> Self {
        let noise_percent = if noise_percent.is_nan() {
            0.0
        } else {
            noise_percent.clamp(0.0, 100.0)
        };
        Self {
            noise_bins: noise_bins.clamp(1, MAX_NOISE_BINS),
            noise_percent,
        }
    }
}

/// Baseline estimate for one channel
#[derive(Debug, Clone)]
pub struct Channel {
    config: BaselineConfig,
    number: Option<usize>,
    adc_bits: u32,
    runs: usize,
    bins: Vec<u64>,
    baseline: Option<i32>,
}

impl Default for Channel {
    fn default() -> Self {
        Self::new(BaselineConfig::default())
    }
}

impl Channel {
    /// Create an estimator
    pub fn new(config: BaselineConfig) -> Self {
        Self {
            config: BaselineConfig::new(config.noise_bins, config.noise_percent),
            number: None,
            adc_bits: 0,
            runs: 0,
            bins: Vec::new(),
            baseline: None,
        }
    }

    /// Start a new estimate for a channel
    pub fn start(&mut self, number: usize, adc_bits: u32) {
        self.number = Some(number);
        self.adc_bits = adc_bits.min(16);
        self.runs = 0;
        self.baseline = None;
        self.bins.clear();
        self.bins.resize(1 << self.adc_bits, 0);
    }

    /// Add a trace, samples above full scale count as full scale
    pub fn update(&mut self, trace: &[AdcWord]) {
        self.runs += 1;
        let Some(top) = self.bins.len().checked_sub(1) else {
            return;
        };
        for sample in trace {
            self.bins[usize::from(*sample).min(top)] += 1;
        }
    }

    /// Finish the estimate
    pub fn end(&mut self) -> Option<i32> {
        self.baseline = if self.runs == 0 {
            None
        } else {
            self.estimate()
        };
        debug!(
            "baseline: channel={:?} runs={} baseline={:?}",
            self.number, self.runs, self.baseline
        );
        self.baseline
    }

    /// Baseline, `None` until `end()` has seen data
    pub fn baseline(&self) -> Option<i32> {
        self.baseline
    }

    /// Channel number given to `start()`
    pub fn number(&self) -> Option<usize> {
        self.number
    }

    /// ADC resolution given to `start()`
    pub fn adc_bits(&self) -> u32 {
        self.adc_bits
    }

    /// Traces added since `start()`
    pub fn runs(&self) -> usize {
        self.runs
    }

    /// True if no samples have been added
    pub fn is_empty(&self) -> bool {
        self.bins.iter().all(|&count| count == 0)
    }

    /// Tuning
    pub fn config(&self) -> BaselineConfig {
        self.config
    }

    /// Codes either side of a baseline still considered equal
    pub fn margin(&self) -> i32 {
        let full = f64::from(1u32 << self.adc_bits);
        #[allow(clippy::cast_possible_truncation)]
        let range = (full * self.config.noise_percent / 100.0) as i32;
        range.max(1)
    }

    fn estimate(&self) -> Option<i32> {
        let low = self.bins.iter().position(|&count| count > 0)?;
        let high = self.bins.iter().rposition(|&count| count > 0)?;
        if low == high {
            return i32::try_from(low).ok();
        }

        let span = high - low + 1;
        let width = span.div_ceil(self.config.noise_bins);
        let buckets: Vec<u64> = self.bins[low..=high]
            .chunks(width)
            .map(|codes| codes.iter().sum())
            .collect();

        let (mode, &mode_count) = buckets
            .iter()
            .enumerate()
            .max_by_key(|&(index, count)| (*count, std::cmp::Reverse(index)))?;

        #[allow(clippy::cast_precision_loss, clippy::cast_possible_truncation, clippy::cast_sign_loss)]
        let threshold = (mode_count as f64 * (1.0 - self.config.noise_percent / 100.0)).ceil() as u64;
        let mut first = mode;
        while first > 0 && buckets[first - 1] >= threshold {
            first -= 1;
        }
        let mut last = mode;
        while last + 1 < buckets.len() && buckets[last + 1] >= threshold {
            last += 1;
        }

        let cluster_low = low + first * width;
        let cluster_high = (low + (last + 1) * width - 1).min(high);
        let cluster = &self.bins[cluster_low..=cluster_high];

        let (offset, _) = cluster
            .iter()
            .enumerate()
            .max_by_key(|&(index, count)| (*count, std::cmp::Reverse(index)))?;
        let peak = cluster_low + offset;

        // Buckets only pick the peak, the mean window spans the raw codes.
        let margin = usize::try_from(self.margin()).unwrap_or(1);
        let from = peak.saturating_sub(margin);
        let to = (peak + margin).min(self.bins.len() - 1);

        let (sum, samples) = self.bins[from..=to]
            .iter()
            .enumerate()
            .fold((0u128, 0u128), |(sum, samples), (index, &count)| {
                let code = (from + index) as u128;
                (sum + code * u128::from(count), samples + u128::from(count))
            });
        if samples == 0 {
            return None;
        }
        i32::try_from((sum + samples / 2) / samples).ok()
    }
}

impl PartialEq<i32> for Channel {
    fn eq(&self, other: &i32) -> bool {
        self.baseline.is_some_and(|baseline| {
            (i64::from(baseline) - i64::from(*other)).abs() <= i64::from(self.margin())
        })
    }
}

impl PartialEq for Channel {
    fn eq(&self, other: &Self) -> bool {
        other.baseline.is_some_and(|baseline| *self == baseline)
    }
}
