//! Synthetic bar fixtures shared by unit tests.

use chrono::{Duration, NaiveDate};

use crate::Bar;

/// Weekday-only calendar starting Monday 2024-01-01.
pub fn trading_day(i: usize) -> NaiveDate {
    let start = NaiveDate::from_ymd_opt(2024, 1, 1).unwrap();
    let offset = (i / 5) * 7 + i % 5;
    start + Duration::days(offset as i64)
}

/// Fridays starting 2022-01-07, one per weekly bar.
pub fn week_ending(i: usize) -> NaiveDate {
    let start = NaiveDate::from_ymd_opt(2022, 1, 7).unwrap();
    start + Duration::days(7 * i as i64)
}

pub fn bar(i: usize, o: f64, h: f64, l: f64, c: f64, v: f64) -> Bar {
    Bar::new(trading_day(i), o, h, l, c, v)
}

/// Bar opening at the close, high/low half a point around it.
pub fn close_bar(i: usize, c: f64, v: f64) -> Bar {
    bar(i, c, c + 0.5, c - 0.5, c, v)
}

/// Compound growth at `growth` per day with constant volume.
pub fn exponential_daily(n: usize, growth: f64) -> Vec<Bar> {
    (0..n)
        .map(|i| {
            let close = 100.0 * (1.0 + growth).powi(i as i32);
            let open = close / (1.0 + growth);
            bar(i, open, close * 1.01, open * 0.99, close, 1_000_000.0)
        })
        .collect()
}

/// Weekly counterpart of [`exponential_daily`]: five trading days per bar.
pub fn exponential_weekly(n: usize, daily_growth: f64) -> Vec<Bar> {
    let weekly = (1.0 + daily_growth).powi(5);
    (0..n)
        .map(|i| {
            let close = 100.0 * weekly.powi(i as i32);
            let open = close / weekly;
            Bar::new(week_ending(i), open, close * 1.01, open * 0.97, close, 5_000_000.0)
        })
        .collect()
}

pub fn flat_daily(n: usize, price: f64) -> Vec<Bar> {
    (0..n)
        .map(|i| bar(i, price, price * 1.01, price * 0.99, price, 1_000_000.0))
        .collect()
}
