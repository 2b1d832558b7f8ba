//! Engine configuration: every detector threshold plus the selection constants.
//!
//! All structs are `#[serde(default)]`, so a JSON document only needs the
//! values it changes:
//!
//! ```rust
//! use setupscan::config::SetupEngineConfig;
//!
//! let config = SetupEngineConfig::from_json_str(
//!     r#"{ "selection": { "confidence_floor": 0.5 },
//!          "detectors": { "nr7_inside_day": { "window": 5 } } }"#,
//! ).unwrap();
//! assert_eq!(config.detectors.nr7_inside_day.window.get(), 5);
//! assert_eq!(config.selection.tie_break_epsilon.get(), 0.01);
//! ```

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::detectors::{
    CupHandleParams, DoubleBottomParams, FirstPullbackParams, InsideDayParams, PoleFlagParams,
    TightConsolidationParams, VcpParams,
};
use crate::params::ParamSet;
use crate::{Ratio, Result, SetupError};

/// Thresholds for every builtin detector family, keyed by detector name
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DetectorParameters {
    pub vcp: VcpParams,
    pub three_weeks_tight: TightConsolidationParams,
    pub high_tight_flag: PoleFlagParams,
    pub nr7_inside_day: InsideDayParams,
    pub first_pullback: FirstPullbackParams,
    pub cup_with_handle: CupHandleParams,
    pub double_bottom: DoubleBottomParams,
}

impl DetectorParameters {
    /// Range-check every numeric threshold against its family's
    /// [`ParamMeta`] table, then run the family's own consistency checks.
    pub fn validate(&self) -> Result<()> {
        fn check<P: ParamSet + Serialize>(set: &P) -> Result<()> {
            let fields = serde_json::to_value(set)?;
            for meta in P::param_meta() {
                if let Some(value) = fields.get(meta.name).and_then(serde_json::Value::as_f64) {
                    meta.validate(value)?;
                }
            }
            set.validate()
        }

        check(&self.vcp)?;
        check(&self.three_weeks_tight)?;
        check(&self.high_tight_flag)?;
        check(&self.nr7_inside_day)?;
        check(&self.first_pullback)?;
        check(&self.cup_with_handle)?;
        check(&self.double_bottom)
    }

    /// Replace one family's thresholds from a flat map, e.g. a sweep point.
    pub fn set_family(&mut self, family: &str, params: &HashMap<&str, f64>) -> Result<()> {
        fn build<P: ParamSet>(params: &HashMap<&str, f64>) -> Result<P> {
            let set = P::with_params(params)?;
            set.validate()?;
            Ok(set)
        }

        match family {
            "vcp" => self.vcp = build(params)?,
            "three_weeks_tight" => self.three_weeks_tight = build(params)?,
            "high_tight_flag" => self.high_tight_flag = build(params)?,
            "nr7_inside_day" => self.nr7_inside_day = build(params)?,
            "first_pullback" => {
                let ma_column = std::mem::take(&mut self.first_pullback.ma_column);
                self.first_pullback = FirstPullbackParams {
                    ma_column,
                    ..build(params)?
                };
            }
            "cup_with_handle" => self.cup_with_handle = build(params)?,
            "double_bottom" => self.double_bottom = build(params)?,
            other => {
                return Err(SetupError::InvalidConfig(format!(
                    "unknown detector family '{other}'"
                )))
            }
        }
        Ok(())
    }
}

/// Primary-selection constants
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SelectionParams {
    /// Minimum calibrated confidence for a confident pick
    pub confidence_floor: Ratio,
    /// Rank gap under which a structural pattern beats a leading trigger
    pub tie_break_epsilon: Ratio,
}

impl Default for SelectionParams {
    fn default() -> Self {
        Self {
            confidence_floor: Ratio::new_const(0.45),
            tie_break_epsilon: Ratio::new_const(0.01),
        }
    }
}

/// Complete engine configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SetupEngineConfig {
    pub detectors: DetectorParameters,
    pub selection: SelectionParams,
}

impl SetupEngineConfig {
    /// Parse and validate a JSON document
    pub fn from_json_str(json: &str) -> Result<Self> {
        let config: Self = serde_json::from_str(json)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_string(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        self.detectors.validate()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = SetupEngineConfig::default();
        assert_eq!(config.selection.confidence_floor.get(), 0.45);
        assert_eq!(config.selection.tie_break_epsilon.get(), 0.01);
        assert_eq!(config.detectors.three_weeks_tight.min_run.get(), 3);
        assert_eq!(config.detectors.first_pullback.ma_column, "ma_21");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_json_roundtrip_preserves_overrides() {
        let mut config = SetupEngineConfig::default();
        config.selection.confidence_floor = Ratio::new(0.6).unwrap();
        config.detectors.first_pullback.ma_column = "ema_21".into();

        let json = config.to_json_string().unwrap();
        let back = SetupEngineConfig::from_json_str(&json).unwrap();
        assert_eq!(back, config);
    }

    #[test]
    fn test_json_rejects_bad_values() {
        let err = SetupEngineConfig::from_json_str(r#"{"selection":{"confidence_floor":1.5}}"#)
            .unwrap_err();
        assert_eq!(err.kind(), "Json");

        let err = SetupEngineConfig::from_json_str(
            r#"{"detectors":{"three_weeks_tight":{"min_run":6,"max_run":4}}}"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "InvalidConfig");
    }

    #[test]
    fn test_json_thresholds_respect_param_ranges() {
        let err =
            SetupEngineConfig::from_json_str(r#"{"detectors":{"nr7_inside_day":{"window":500}}}"#)
                .unwrap_err();
        assert_eq!(err.kind(), "OutOfRange");

        let err = SetupEngineConfig::from_json_str(
            r#"{"detectors":{"first_pullback":{"bounce_volume_ratio":9.0}}}"#,
        )
        .unwrap_err();
        assert_eq!(err.kind(), "OutOfRange");

        assert!(SetupEngineConfig::from_json_str(r#"{"detectors":{"nr7_inside_day":{"window":10}}}"#)
            .is_ok());
    }

    #[test]
    fn test_set_family() {
        let mut params = DetectorParameters::default();
        params.first_pullback.ma_column = "ema_21".into();

        let mut overrides = HashMap::new();
        overrides.insert("touch_band", 0.02);
        params.set_family("first_pullback", &overrides).unwrap();
        assert_eq!(params.first_pullback.touch_band.get(), 0.02);
        assert_eq!(params.first_pullback.ma_column, "ema_21");

        assert!(params.set_family("head_and_shoulders", &overrides).is_err());
    }
}
