//! Statistics engine: derive a [`StatsSnapshot`] from a chat record.
//!
//! The sample is either the window or, when `hist_tail > 0`, the tail of the
//! history. Each outcome is classified independently under every grouping
//! (color, parity, low/high, dozens, rows); zero falls into none of the
//! groups except its own counter.
//!
//! ## Guarantees
//! - Pure: no I/O, no locking
//! - Non-panicking: an empty sample yields zeroed counts, division is guarded

use serde::{Deserialize, Serialize};

use crate::outcome::{self, Color};
use crate::record::{tail, ChatRecord};

/// Where the sample was drawn from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SampleSource {
    Window,
    History,
}

impl std::fmt::Display for SampleSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SampleSource::Window => write!(f, "window"),
            SampleSource::History => write!(f, "history"),
        }
    }
}

/// One sampled outcome with its pocket color.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColoredNumber {
    pub number: u8,
    pub color: Color,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassCounts {
    pub red: usize,
    pub black: usize,
    pub even: usize,
    pub odd: usize,
    pub low: usize,
    pub high: usize,
    pub zero: usize,
    pub dozens: [usize; 3],
    pub rows: [usize; 3],
}

/// Percentages of the sample, rounded to one decimal.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClassPercents {
    pub red: f64,
    pub black: f64,
    pub even: f64,
    pub odd: f64,
    pub low: f64,
    pub high: f64,
    pub zero: f64,
    pub dozens: [f64; 3],
    pub rows: [f64; 3],
}

/// Which sample the snapshot was computed over.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SampleMeta {
    pub source: SampleSource,
    pub window_capacity: usize,
    pub hist_tail: usize,
}

/// Derived statistics for one chat at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub numbers: Vec<ColoredNumber>,
    pub total: usize,
    pub counts: ClassCounts,
    pub percents: ClassPercents,
    /// Non-zero outcomes since the most recent zero in the sample.
    pub since_last_0: usize,
    #[serde(rename = "_meta")]
    pub meta: SampleMeta,
}

impl StatsSnapshot {
    /// The raw sampled outcomes, oldest first.
    pub fn sample(&self) -> impl Iterator<Item = u8> + '_ {
        self.numbers.iter().map(|c| c.number)
    }

    pub fn is_empty(&self) -> bool {
        self.numbers.is_empty()
    }
}

/// Select the sample for `record` along with its metadata.
pub fn select_sample(record: &ChatRecord) -> (&[u8], SampleMeta) {
    let cap = record.config.effective_capacity();
    let k = record.config.hist_tail;
    let (sample, source) = if k > 0 {
        (tail(&record.history, k.min(cap)), SampleSource::History)
    } else {
        (tail(&record.window, cap), SampleSource::Window)
    };
    (
        sample,
        SampleMeta {
            source,
            window_capacity: cap,
            hist_tail: k,
        },
    )
}

pub fn compute_stats(record: &ChatRecord) -> StatsSnapshot {
    let (sample, meta) = select_sample(record);
    let total = sample.len();
    let counts = count_classes(sample);
    let pct = |c: usize| percent(c, total);

    let percents = ClassPercents {
        red: pct(counts.red),
        black: pct(counts.black),
        even: pct(counts.even),
        odd: pct(counts.odd),
        low: pct(counts.low),
        high: pct(counts.high),
        zero: pct(counts.zero),
        dozens: counts.dozens.map(pct),
        rows: counts.rows.map(pct),
    };

    StatsSnapshot {
        numbers: sample
            .iter()
            .map(|&number| ColoredNumber {
                number,
                color: Color::of(number),
            })
            .collect(),
        total,
        counts,
        percents,
        since_last_0: since_last_zero(sample),
        meta,
    }
}

fn count_classes(sample: &[u8]) -> ClassCounts {
    let mut counts = ClassCounts::default();
    for &n in sample {
        match Color::of(n) {
            Color::Green => counts.zero += 1,
            Color::Red => counts.red += 1,
            Color::Black => counts.black += 1,
        }
        counts.even += usize::from(outcome::is_even(n));
        counts.odd += usize::from(outcome::is_odd(n));
        counts.low += usize::from(outcome::is_low(n));
        counts.high += usize::from(outcome::is_high(n));
        if let Some(d) = outcome::dozen_of(n) {
            counts.dozens[d] += 1;
        }
        if let Some(r) = outcome::row_of(n) {
            counts.rows[r] += 1;
        }
    }
    counts
}

/// `100 * count / total` rounded to one decimal, exact ties to even; 0.0 for
/// an empty sample.
pub fn percent(count: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    (1000.0 * count as f64 / total as f64).round_ties_even() / 10.0
}

/// Count non-zero outcomes from the end of `sample` back to the latest zero.
pub fn since_last_zero(sample: &[u8]) -> usize {
    sample.iter().rev().take_while(|&&n| n != 0).count()
}
