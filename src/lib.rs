//! # setupscan - Setup Engine
//!
//! Deterministic chart-pattern ("setup") detection over daily and weekly OHLCV
//! series. A fixed, ordered set of detectors scans one symbol at a time, raw
//! per-detector scores are calibrated onto a shared scale, and one primary
//! pattern is selected.
//!
//! ## Quick Start
//!
//! ```rust
//! use setupscan::prelude::*;
//!
//! // Build the engine with every builtin detector in canonical order
//! let engine = EngineBuilder::new().with_all_defaults().build().unwrap();
//!
//! // Frames come from an external price service, oldest -> newest
//! let input = PatternDetectorInput::builder("AAPL").build().unwrap();
//!
//! let output = engine.aggregate(&input);
//! assert!(output.pattern_primary.is_none());
//! assert!(output.failed_checks.iter().any(|c| c == "no_primary_pattern"));
//! ```

pub mod aggregator;
pub mod calibration;
pub mod config;
pub mod contract;
pub mod detectors;
pub mod normalization;
pub mod params;
pub mod readiness;
pub mod technicals;

#[cfg(test)]
pub(crate) mod test_support;

pub mod prelude {
    pub use crate::{
        // Aggregation
        aggregator::{AggregatedPatternOutput, DetectorTrace, EngineBuilder, SetupEngine},
        // Calibration
        calibration::{calibrate, profile_for, DetectorCalibrationProfile},
        // Configuration
        config::{DetectorParameters, SelectionParams, SetupEngineConfig},
        // Contract
        contract::{
            detect_safe, LegacyVcpSnapshot, PatternCandidate, PatternDetectorInput,
            PatternDetectorResult, PatternOutcome,
        },
        // Detectors
        detectors::*,
        // Parameters
        params::{ParamMeta, ParamSet, ParamType},
        // Readiness
        readiness::{compute_readiness_features, ReadinessFeatures, ReadinessParams},
        // Parallel
        scan_parallel,
        Bar,
        BuiltinDetector,
        DetectorMetadata,
        OHLCVExt,
        PatternDetector,
        PatternKind,
        Period,
        Ratio,
        Result,
        ScanResult,
        // Errors
        SetupError,
        Timeframe,
        OHLCV,
    };
}

// ============================================================
// ERRORS
// ============================================================

pub type Result<T> = std::result::Result<T, SetupError>;

/// Errors raised by configuration, input construction and detectors.
///
/// Detector failures never cross the aggregator boundary as errors: the
/// contract layer turns them into `error` results.
#[derive(Debug, thiserror::Error)]
pub enum SetupError {
    #[error("Invalid value: {0}")]
    InvalidValue(&'static str),

    #[error("{field} = {value} out of range [{min}, {max}]")]
    OutOfRange {
        field: &'static str,
        value: f64,
        min: f64,
        max: f64,
    },

    #[error("Invalid config: {0}")]
    InvalidConfig(String),

    #[error("Insufficient data: need {need} bars, got {got}")]
    InsufficientData { need: usize, got: usize },

    #[error("Invalid OHLCV at index {index}: {reason}")]
    InvalidOHLCV { index: usize, reason: &'static str },

    #[error("Missing feature: {0}")]
    MissingFeature(String),

    #[error("Column '{name}' has {len} values for {bars} daily bars")]
    MisalignedColumn {
        name: String,
        len: usize,
        bars: usize,
    },

    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

impl SetupError {
    /// Variant name, used as the type tag of error details
    /// (`"<Kind>: <message>"`).
    pub fn kind(&self) -> &'static str {
        match self {
            SetupError::InvalidValue(_) => "InvalidValue",
            SetupError::OutOfRange { .. } => "OutOfRange",
            SetupError::InvalidConfig(_) => "InvalidConfig",
            SetupError::InsufficientData { .. } => "InsufficientData",
            SetupError::InvalidOHLCV { .. } => "InvalidOHLCV",
            SetupError::MissingFeature(_) => "MissingFeature",
            SetupError::MisalignedColumn { .. } => "MisalignedColumn",
            SetupError::Json(_) => "Json",
        }
    }
}

// ============================================================
// VALIDATED TYPES
// ============================================================

/// Normalized value in range 0.0..=1.0
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Ratio(f64);

impl Ratio {
    /// Create a new Ratio, validating the value is in [0.0, 1.0]
    pub fn new(value: f64) -> Result<Self> {
        if value.is_nan() || value.is_infinite() {
            return Err(SetupError::InvalidValue("Ratio cannot be NaN or infinite"));
        }
        if !(0.0..=1.0).contains(&value) {
            return Err(SetupError::OutOfRange {
                field: "Ratio",
                value,
                min: 0.0,
                max: 1.0,
            });
        }
        Ok(Self(value))
    }

    /// Create a Ratio from a compile-time constant (library internal use)
    #[doc(hidden)]
    pub const fn new_const(value: f64) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> f64 {
        self.0
    }
}

impl serde::Serialize for Ratio {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Ratio {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = f64::deserialize(d)?;
        Ratio::new(value).map_err(serde::de::Error::custom)
    }
}

/// Period in bars (must be > 0)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Period(usize);

impl Period {
    /// Create a new Period, validating value is > 0
    pub fn new(value: usize) -> Result<Self> {
        if value == 0 {
            return Err(SetupError::InvalidValue("Period must be > 0"));
        }
        Ok(Self(value))
    }

    #[doc(hidden)]
    pub const fn new_const(value: usize) -> Self {
        Self(value)
    }

    #[inline]
    pub fn get(self) -> usize {
        self.0
    }
}

impl serde::Serialize for Period {
    fn serialize<S: serde::Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        self.0.serialize(s)
    }
}

impl<'de> serde::Deserialize<'de> for Period {
    fn deserialize<D: serde::Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let value = usize::deserialize(d)?;
        Period::new(value).map_err(serde::de::Error::custom)
    }
}

// ============================================================
// OHLCV TRAITS
// ============================================================

/// Core OHLCV data trait
pub trait OHLCV {
    fn open(&self) -> f64;
    fn high(&self) -> f64;
    fn low(&self) -> f64;
    fn close(&self) -> f64;
    fn volume(&self) -> f64;

    fn date(&self) -> Option<NaiveDate> {
        None
    }
}

/// Extension trait with computed properties for OHLCV data
pub trait OHLCVExt: OHLCV {
    #[inline]
    fn range(&self) -> f64 {
        self.high() - self.low()
    }

    /// Range fully contained within `mother`'s range (inside bar)
    #[inline]
    fn is_inside<M: OHLCV>(&self, mother: &M) -> bool {
        self.high() <= mother.high() && self.low() >= mother.low()
    }

    /// Validate OHLCV data consistency
    fn validate(&self) -> Result<()> {
        let prices = [self.open(), self.high(), self.low(), self.close()];
        if prices.iter().any(|p| p.is_nan()) || self.volume().is_nan() {
            return Err(SetupError::InvalidOHLCV {
                index: 0,
                reason: "NaN in OHLCV",
            });
        }
        if prices.iter().any(|p| p.is_infinite()) || self.volume().is_infinite() {
            return Err(SetupError::InvalidOHLCV {
                index: 0,
                reason: "Infinite value in OHLCV",
            });
        }
        if prices.iter().any(|p| *p <= 0.0) {
            return Err(SetupError::InvalidOHLCV {
                index: 0,
                reason: "non-positive price",
            });
        }
        if self.high() < self.low() {
            return Err(SetupError::InvalidOHLCV {
                index: 0,
                reason: "high < low",
            });
        }
        if self.open() > self.high()
            || self.open() < self.low()
            || self.close() > self.high()
            || self.close() < self.low()
        {
            return Err(SetupError::InvalidOHLCV {
                index: 0,
                reason: "open/close outside high-low range",
            });
        }
        if self.volume() < 0.0 {
            return Err(SetupError::InvalidOHLCV {
                index: 0,
                reason: "negative volume",
            });
        }
        Ok(())
    }
}

impl<T: OHLCV> OHLCVExt for T {}

pub use chrono::NaiveDate;

/// One dated OHLCV bar, the frame element every detector consumes.
#[derive(Debug, Clone, Copy, PartialEq, serde::Serialize, serde::Deserialize)]
pub struct Bar {
    pub date: NaiveDate,
    pub open: f64,
    pub high: f64,
    pub low: f64,
    pub close: f64,
    pub volume: f64,
}

impl Bar {
    pub fn new(date: NaiveDate, open: f64, high: f64, low: f64, close: f64, volume: f64) -> Self {
        Self {
            date,
            open,
            high,
            low,
            close,
            volume,
        }
    }
}

impl OHLCV for Bar {
    fn open(&self) -> f64 {
        self.open
    }

    fn high(&self) -> f64 {
        self.high
    }

    fn low(&self) -> f64 {
        self.low
    }

    fn close(&self) -> f64 {
        self.close
    }

    fn volume(&self) -> f64 {
        self.volume
    }

    fn date(&self) -> Option<NaiveDate> {
        Some(self.date)
    }
}

/// Bar timeframe of a frame or candidate
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Timeframe {
    Daily,
    Weekly,
}

impl Timeframe {
    pub fn as_str(self) -> &'static str {
        match self {
            Timeframe::Daily => "daily",
            Timeframe::Weekly => "weekly",
        }
    }
}

impl std::fmt::Display for Timeframe {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================
// PATTERN KIND
// ============================================================

/// Structural (base-forming) vs trigger (momentary-condition) patterns.
///
/// Primary selection prefers structural patterns when ranks are near-equal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PatternKind {
    Structural,
    Trigger,
}

impl PatternKind {
    /// Classify a pattern by name. Unknown patterns are treated as structural.
    pub fn classify(pattern: &str) -> PatternKind {
        match pattern {
            // Momentary conditions on the latest bars
            "nr7_inside_day" | "first_pullback" => PatternKind::Trigger,
            // Base-forming patterns, including names this crate does not know
            _ => PatternKind::Structural,
        }
    }

    #[inline]
    pub fn is_structural(self) -> bool {
        matches!(self, PatternKind::Structural)
    }
}

// ============================================================
// PATTERN DETECTOR TRAIT
// ============================================================

use config::DetectorParameters;
use contract::{PatternDetectorInput, PatternDetectorResult};

/// Descriptive metadata about a detector
#[derive(Debug, Clone)]
pub struct DetectorMetadata {
    pub name: &'static str,
    pub description: &'static str,
    pub kind: PatternKind,
    pub timeframes: &'static [Timeframe],
}

/// Object-safe detector contract.
///
/// `detect` may fail or even panic; the engine only ever goes through
/// [`contract::detect_safe`], which turns both into an `error` result.
pub trait PatternDetector: Send + Sync {
    /// Immutable snake_case identifier, also the detector family name.
    fn name(&self) -> &'static str;

    fn detect(
        &self,
        input: &PatternDetectorInput,
        params: &DetectorParameters,
    ) -> Result<PatternDetectorResult>;

    fn metadata(&self) -> DetectorMetadata {
        DetectorMetadata {
            name: self.name(),
            description: "",
            kind: PatternKind::classify(self.name()),
            timeframes: &[Timeframe::Daily],
        }
    }
}

// ============================================================
// BUILTIN DETECTORS - generated via macro
// ============================================================

use detectors::*;

/// Macro to generate BuiltinDetector enum without boilerplate
macro_rules! define_builtin_detectors {
    (
        $(
            $variant:ident($detector:ty)
        ),* $(,)?
    ) => {
        /// All builtin detectors - enum dispatch, canonical execution order
        #[derive(Debug, Clone)]
        pub enum BuiltinDetector {
            $($variant($detector)),*
        }

        impl PatternDetector for BuiltinDetector {
            #[inline]
            fn name(&self) -> &'static str {
                match self {
                    $(Self::$variant(d) => PatternDetector::name(d)),*
                }
            }

            fn detect(
                &self,
                input: &PatternDetectorInput,
                params: &DetectorParameters,
            ) -> Result<PatternDetectorResult> {
                match self {
                    $(Self::$variant(d) => PatternDetector::detect(d, input, params)),*
                }
            }

            fn metadata(&self) -> DetectorMetadata {
                match self {
                    $(Self::$variant(d) => PatternDetector::metadata(d)),*
                }
            }
        }
    };
}

define_builtin_detectors! {
    // Structural
    Vcp(LegacyVcpDetector),
    ThreeWeeksTight(TightConsolidationDetector),
    HighTightFlag(PoleFlagDetector),
    // Triggers
    Nr7InsideDay(InsideDayDetector),
    FirstPullback(FirstPullbackDetector),
    // Structural
    CupWithHandle(CupHandleDetector),
    // Placeholder
    DoubleBottom(DoubleBottomDetector),
}

// ============================================================
// PARALLEL SCANNING
// ============================================================

use aggregator::{AggregatedPatternOutput, SetupEngine};
use rayon::prelude::*;

/// Result of scanning a single instrument
#[derive(Debug)]
pub struct ScanResult {
    pub symbol: String,
    pub output: AggregatedPatternOutput,
}

/// Parallel scanning of multiple instruments.
///
/// Symbols share nothing mutable, so each runs the full pipeline on its own
/// rayon task. Results keep input order.
pub fn scan_parallel<'a, I>(engine: &SetupEngine, inputs: I) -> Vec<ScanResult>
where
    I: IntoParallelIterator<Item = &'a PatternDetectorInput>,
{
    inputs
        .into_par_iter()
        .map(|input| ScanResult {
            symbol: input.symbol().to_string(),
            output: engine.aggregate(input),
        })
        .collect()
}

// ============================================================
// TESTS
// ============================================================
