//! Double bottom placeholder
//!
//! Registered so its prerequisites and trace entry stay stable. Once the
//! history requirement is met it always reports `not_implemented`, which the
//! aggregator keeps distinct from "no pattern".

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use super::helpers::prerequisite_failures;
use crate::config::DetectorParameters;
use crate::contract::{PatternDetectorInput, PatternDetectorResult};
use crate::params::{get_period, ParamMeta, ParamSet};
use crate::{DetectorMetadata, PatternDetector, PatternKind, Period, Result, Timeframe};

const NAME: &str = "double_bottom";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DoubleBottomParams {
    pub min_daily_bars: Period,
}

impl Default for DoubleBottomParams {
    fn default() -> Self {
        Self {
            min_daily_bars: Period::new_const(120),
        }
    }
}

static DOUBLE_BOTTOM_PARAMS: &[ParamMeta] = &[ParamMeta::period(
    "min_daily_bars",
    120.0,
    (60.0, 260.0, 20.0),
    "Minimum daily history",
)];

impl ParamSet for DoubleBottomParams {
    fn param_meta() -> &'static [ParamMeta] {
        DOUBLE_BOTTOM_PARAMS
    }

    fn with_params(params: &HashMap<&str, f64>) -> Result<Self> {
        Ok(Self {
            min_daily_bars: get_period(DOUBLE_BOTTOM_PARAMS, params, "min_daily_bars", 120)?,
        })
    }

    fn family() -> &'static str {
        NAME
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct DoubleBottomDetector;

impl PatternDetector for DoubleBottomDetector {
    fn name(&self) -> &'static str {
        NAME
    }

    fn metadata(&self) -> DetectorMetadata {
        DetectorMetadata {
            name: NAME,
            description: "Placeholder, reports not_implemented",
            kind: PatternKind::Structural,
            timeframes: &[Timeframe::Daily],
        }
    }

    fn detect(
        &self,
        input: &PatternDetectorInput,
        params: &DetectorParameters,
    ) -> Result<PatternDetectorResult> {
        let reasons =
            prerequisite_failures(input, Some(params.double_bottom.min_daily_bars.get()), None);
        if !reasons.is_empty() {
            return Ok(PatternDetectorResult::insufficient_data(NAME, reasons));
        }
        Ok(PatternDetectorResult::not_implemented(
            NAME,
            "double_bottom_detection_pending",
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::contract::PatternOutcome;
    use crate::test_support::flat_daily;

    fn run(bars: usize) -> PatternDetectorResult {
        let input = PatternDetectorInput::builder("DB")
            .daily(flat_daily(bars, 40.0))
            .build()
            .unwrap();
        DoubleBottomDetector
            .detect(&input, &DetectorParameters::default())
            .unwrap()
    }

    #[test]
    fn test_not_implemented_once_prerequisites_pass() {
        let result = run(150);
        assert_eq!(result.outcome(), PatternOutcome::NotImplemented);
        assert!(result.candidates.is_empty());
    }

    #[test]
    fn test_prerequisites_checked_first() {
        let result = run(50);
        assert_eq!(result.outcome(), PatternOutcome::InsufficientData);
        assert!(result.failed_checks.contains(&"daily_bars_lt_120".to_string()));
    }
}
