//! Numeric primitives over bar series.
//!
//! Every rolling function returns a vector aligned to its input, `None` until
//! the window is warm. Values at index `t` are computed from data at or before
//! `t` only (prefix-stable), so appending or revising later bars never changes
//! earlier outputs. Swing detection is the one exception: a swing at `i` is
//! only confirmed once `right` later bars exist.

use chrono::{Datelike, Weekday};

use crate::{Bar, OHLCVExt, OHLCV};

// ============================================================
// BASIC STATISTICS
// ============================================================

pub fn mean(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    Some(values.iter().sum::<f64>() / values.len() as f64)
}

pub fn median(values: &[f64]) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        Some((sorted[mid - 1] + sorted[mid]) / 2.0)
    } else {
        Some(sorted[mid])
    }
}

pub fn closes<T: OHLCV>(bars: &[T]) -> Vec<f64> {
    bars.iter().map(|b| b.close()).collect()
}

pub fn volumes<T: OHLCV>(bars: &[T]) -> Vec<f64> {
    bars.iter().map(|b| b.volume()).collect()
}

/// Index of the highest high in `bars[range]`; ties resolve to the latest bar.
pub fn argmax_high<T: OHLCV>(bars: &[T], range: std::ops::Range<usize>) -> Option<usize> {
    let mut best: Option<usize> = None;
    for i in range {
        let high = bars.get(i)?.high();
        match best {
            Some(b) if bars[b].high() > high => {}
            _ => best = Some(i),
        }
    }
    best
}

/// Index of the lowest low in `bars[range]`; ties resolve to the earliest bar.
pub fn argmin_low<T: OHLCV>(bars: &[T], range: std::ops::Range<usize>) -> Option<usize> {
    let mut best: Option<usize> = None;
    for i in range {
        let low = bars.get(i)?.low();
        match best {
            Some(b) if bars[b].low() <= low => {}
            _ => best = Some(i),
        }
    }
    best
}

// ============================================================
// MOVING AVERAGES & VOLATILITY
// ============================================================

/// Simple moving average.
pub fn sma(values: &[f64], period: usize) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if period == 0 || i + 1 < period {
                return None;
            }
            mean(&values[i + 1 - period..=i])
        })
        .collect()
}

/// True range; the first bar has no prior close and uses its high-low range.
pub fn true_range<T: OHLCV>(bars: &[T]) -> Vec<f64> {
    bars.iter()
        .enumerate()
        .map(|(i, bar)| {
            if i == 0 {
                return bar.range();
            }
            let prev_close = bars[i - 1].close();
            bar.range()
                .max((bar.high() - prev_close).abs())
                .max((bar.low() - prev_close).abs())
        })
        .collect()
}

/// ATR smoothing method
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AtrSmoothing {
    /// Rolling mean of true range
    Simple,
    /// Wilder's recursive smoothing seeded with the first `period` mean
    #[default]
    Wilder,
}

/// Average True Range
pub fn atr<T: OHLCV>(bars: &[T], period: usize, smoothing: AtrSmoothing) -> Vec<Option<f64>> {
    let tr = true_range(bars);
    match smoothing {
        AtrSmoothing::Simple => sma(&tr, period),
        AtrSmoothing::Wilder => {
            let mut out = vec![None; tr.len()];
            if period == 0 || tr.len() < period {
                return out;
            }
            let p = period as f64;
            let mut current = tr[..period].iter().sum::<f64>() / p;
            out[period - 1] = Some(current);
            for i in period..tr.len() {
                current = (current * (p - 1.0) + tr[i]) / p;
                out[i] = Some(current);
            }
            out
        }
    }
}

/// Bollinger band width as a percentage of the middle band:
/// `(upper - lower) / middle * 100` with population standard deviation.
pub fn bollinger_width_pct(values: &[f64], period: usize, num_std: f64) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            if period == 0 || i + 1 < period {
                return None;
            }
            let window = &values[i + 1 - period..=i];
            let middle = mean(window)?;
            if middle.abs() <= f64::EPSILON {
                return None;
            }
            let variance =
                window.iter().map(|v| (v - middle).powi(2)).sum::<f64>() / period as f64;
            Some(2.0 * num_std * variance.sqrt() / middle * 100.0)
        })
        .collect()
}

/// Percentile rank (0-100) of each value within its trailing window: the
/// share of available window values that are `<=` the current one.
///
/// Emits once at least `min_periods` values are available in the window.
pub fn rolling_percentile_rank(
    values: &[Option<f64>],
    window: usize,
    min_periods: usize,
) -> Vec<Option<f64>> {
    (0..values.len())
        .map(|i| {
            let current = values[i]?;
            if window == 0 {
                return None;
            }
            let start = (i + 1).saturating_sub(window);
            let available: Vec<f64> = values[start..=i].iter().flatten().copied().collect();
            if available.len() < min_periods.max(1) {
                return None;
            }
            let at_or_below = available.iter().filter(|v| **v <= current).count();
            Some(at_or_below as f64 / available.len() as f64 * 100.0)
        })
        .collect()
}

// ============================================================
// REGRESSION
// ============================================================

/// Least-squares fit of a window against x = 0, 1, ..., n-1
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct LinearFit {
    pub slope: f64,
    pub intercept: f64,
    pub r_squared: f64,
}

pub fn linear_regression(values: &[f64]) -> Option<LinearFit> {
    let n = values.len();
    if n < 2 {
        return None;
    }
    let nf = n as f64;
    let x_mean = (nf - 1.0) / 2.0;
    let y_mean = mean(values)?;

    let mut sxy = 0.0;
    let mut sxx = 0.0;
    for (i, y) in values.iter().enumerate() {
        let dx = i as f64 - x_mean;
        sxy += dx * (y - y_mean);
        sxx += dx * dx;
    }
    let slope = sxy / sxx;
    let intercept = y_mean - slope * x_mean;

    let mut ss_res = 0.0;
    let mut ss_tot = 0.0;
    for (i, y) in values.iter().enumerate() {
        let fitted = intercept + slope * i as f64;
        ss_res += (y - fitted).powi(2);
        ss_tot += (y - y_mean).powi(2);
    }
    // A constant window is fitted exactly by a flat line
    let r_squared = if ss_tot <= f64::EPSILON {
        1.0
    } else {
        1.0 - ss_res / ss_tot
    };

    Some(LinearFit {
        slope,
        intercept,
        r_squared,
    })
}

pub fn rolling_linear_regression(values: &[f64], window: usize) -> Vec<Option<LinearFit>> {
    (0..values.len())
        .map(|i| {
            if window < 2 || i + 1 < window {
                return None;
            }
            linear_regression(&values[i + 1 - window..=i])
        })
        .collect()
}

pub fn rolling_slope(values: &[f64], window: usize) -> Vec<Option<f64>> {
    rolling_linear_regression(values, window)
        .into_iter()
        .map(|fit| fit.map(|f| f.slope))
        .collect()
}

// ============================================================
// SWINGS
// ============================================================

/// Indices of swing highs: a high strictly above the `left` previous highs
/// and at or above the `right` following highs.
pub fn swing_highs<T: OHLCV>(bars: &[T], left: usize, right: usize) -> Vec<usize> {
    let n = bars.len();
    if n < left + right + 1 {
        return Vec::new();
    }
    (left..n - right)
        .filter(|&i| {
            let high = bars[i].high();
            bars[i - left..i].iter().all(|b| b.high() < high)
                && bars[i + 1..=i + right].iter().all(|b| b.high() <= high)
        })
        .collect()
}

/// Indices of swing lows, mirror of [`swing_highs`].
pub fn swing_lows<T: OHLCV>(bars: &[T], left: usize, right: usize) -> Vec<usize> {
    let n = bars.len();
    if n < left + right + 1 {
        return Vec::new();
    }
    (left..n - right)
        .filter(|&i| {
            let low = bars[i].low();
            bars[i - left..i].iter().all(|b| b.low() > low)
                && bars[i + 1..=i + right].iter().all(|b| b.low() >= low)
        })
        .collect()
}

// ============================================================
// RESAMPLING
// ============================================================

/// A week is complete once a bar on or after its closing weekday exists.
pub const WEEK_CLOSE: Weekday = Weekday::Fri;

/// Aggregate daily bars into ISO-week bars dated by each week's last bar.
///
/// With `exclude_incomplete`, a trailing week whose last bar falls before
/// [`WEEK_CLOSE`] is dropped so in-progress weeks never leak into weekly
/// features.
pub fn resample_weekly(bars: &[Bar], exclude_incomplete: bool) -> Vec<Bar> {
    let mut weeks: Vec<Bar> = Vec::new();
    let mut current_week = None;

    for bar in bars {
        let week = bar.date.iso_week();
        let key = (week.year(), week.week());
        match weeks.last_mut() {
            Some(agg) if current_week == Some(key) => {
                agg.high = agg.high.max(bar.high);
                agg.low = agg.low.min(bar.low);
                agg.close = bar.close;
                agg.volume += bar.volume;
                agg.date = bar.date;
            }
            _ => {
                weeks.push(*bar);
                current_week = Some(key);
            }
        }
    }

    if exclude_incomplete {
        if let Some(last) = weeks.last() {
            if last.date.weekday().num_days_from_monday() < WEEK_CLOSE.num_days_from_monday() {
                weeks.pop();
            }
        }
    }
    weeks
}

// ============================================================
// TESTS
// ============================================================
