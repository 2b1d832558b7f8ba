//! Setup engine: ordered detector pipeline, trace, calibration and primary
//! selection.

use serde::{Deserialize, Serialize};
use tracing::{debug, info, info_span};

use crate::calibration::calibrate;
use crate::config::{SelectionParams, SetupEngineConfig};
use crate::contract::{
    detect_safe, PatternCandidate, PatternDetectorInput, PatternDetectorResult, PatternOutcome,
};
use crate::{BuiltinDetector, NaiveDate, PatternDetector, Result, SetupError};

// ============================================================
// OUTPUT
// ============================================================

/// One detector execution, in pipeline order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DetectorTrace {
    pub execution_index: usize,
    pub detector_name: String,
    pub outcome: PatternOutcome,
    pub candidate_count: usize,
    pub error_detail: Option<String>,
}

/// Per-symbol pipeline output
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedPatternOutput {
    pub pattern_primary: Option<String>,
    /// Calibrated confidence of the primary candidate
    pub pattern_confidence: Option<f64>,
    pub pivot_price: Option<f64>,
    pub pivot_type: Option<String>,
    pub pivot_date: Option<NaiveDate>,
    /// Calibrated candidates in detector order, then insertion order
    pub candidates: Vec<PatternCandidate>,
    /// Index of the primary in `candidates`
    pub primary_index: Option<usize>,
    pub passed_checks: Vec<String>,
    pub failed_checks: Vec<String>,
    /// Diagnostic only
    pub detector_traces: Vec<DetectorTrace>,
}

impl AggregatedPatternOutput {
    pub fn primary_candidate(&self) -> Option<&PatternCandidate> {
        self.primary_index.and_then(|i| self.candidates.get(i))
    }
}

// ============================================================
// PRIMARY SELECTION
// ============================================================

/// Outcome of [`select_primary`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PrimarySelection {
    pub index: usize,
    /// No candidate cleared the confidence floor
    pub fallback: bool,
    /// A structural candidate displaced a marginally higher-ranked trigger
    pub tie_break: bool,
}

/// Pick the primary among calibrated candidates.
///
/// The pool is every candidate at or above the confidence floor, or all of
/// them when none qualifies. The pool is ranked by aggregation rank score
/// (stable, so equal ranks keep pipeline order). A leading trigger yields to
/// the best structural candidate ranked within `tie_break_epsilon` of it.
pub fn select_primary(
    candidates: &[PatternCandidate],
    params: &SelectionParams,
) -> Option<PrimarySelection> {
    let rank = |i: usize| candidates[i].rank_score().unwrap_or(0.0);
    let floor = params.confidence_floor.get();

    let mut pool: Vec<usize> = (0..candidates.len())
        .filter(|&i| candidates[i].calibrated_confidence().unwrap_or(0.0) >= floor)
        .collect();
    let fallback = pool.is_empty();
    if fallback {
        pool = (0..candidates.len()).collect();
    }
    pool.sort_by(|&a, &b| rank(b).total_cmp(&rank(a)));

    let leader = *pool.first()?;
    if candidates[leader].kind().is_structural() {
        return Some(PrimarySelection {
            index: leader,
            fallback,
            tie_break: false,
        });
    }

    let threshold = rank(leader) - params.tie_break_epsilon.get();
    let structural = pool
        .iter()
        .copied()
        .find(|&i| candidates[i].kind().is_structural() && rank(i) >= threshold);
    Some(match structural {
        Some(index) => PrimarySelection {
            index,
            fallback,
            tie_break: true,
        },
        None => PrimarySelection {
            index: leader,
            fallback,
            tie_break: false,
        },
    })
}

// ============================================================
// ENGINE
// ============================================================

/// Builtins dispatch through the enum; custom detectors through the vtable.
enum DetectorSlot {
    Builtin(BuiltinDetector),
    Custom(Box<dyn PatternDetector>),
}

impl DetectorSlot {
    fn as_dyn(&self) -> &dyn PatternDetector {
        match self {
            DetectorSlot::Builtin(d) => d,
            DetectorSlot::Custom(d) => d.as_ref(),
        }
    }
}

/// Runs a fixed, ordered detector collection over one symbol at a time.
///
/// Stateless between calls, so one engine can be shared across threads.
pub struct SetupEngine {
    detectors: Vec<DetectorSlot>,
    config: SetupEngineConfig,
}

impl std::fmt::Debug for SetupEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SetupEngine")
            .field("detectors", &self.detector_names())
            .field("config", &self.config)
            .finish()
    }
}

impl SetupEngine {
    /// Engine over an explicit detector collection, executed in the given order.
    pub fn new(detectors: Vec<Box<dyn PatternDetector>>, config: SetupEngineConfig) -> Result<Self> {
        Self::from_slots(detectors.into_iter().map(DetectorSlot::Custom).collect(), config)
    }

    fn from_slots(detectors: Vec<DetectorSlot>, config: SetupEngineConfig) -> Result<Self> {
        let engine = Self { detectors, config };
        engine.validate()?;
        Ok(engine)
    }

    fn validate(&self) -> Result<()> {
        if self.detectors.is_empty() {
            return Err(SetupError::InvalidConfig("no detectors registered".into()));
        }
        let names = self.detector_names();
        for (i, name) in names.iter().enumerate() {
            if names[..i].contains(name) {
                return Err(SetupError::InvalidConfig(format!(
                    "detector '{name}' registered more than once"
                )));
            }
        }
        self.config.validate()
    }

    pub fn detector_names(&self) -> Vec<&'static str> {
        self.detectors.iter().map(|d| d.as_dyn().name()).collect()
    }

    pub fn config(&self) -> &SetupEngineConfig {
        &self.config
    }

    /// Run every detector through [`detect_safe`], in registration order.
    pub fn run_detectors(&self, input: &PatternDetectorInput) -> Vec<PatternDetectorResult> {
        self.detectors
            .iter()
            .map(|slot| detect_safe(slot.as_dyn(), input, &self.config.detectors))
            .collect()
    }

    /// Full pipeline for one symbol. Never fails: detector problems surface
    /// as trace entries and failed checks.
    pub fn aggregate(&self, input: &PatternDetectorInput) -> AggregatedPatternOutput {
        let span = info_span!("aggregate", symbol = input.symbol());
        let _enter = span.enter();

        let results = self.run_detectors(input);

        let mut passed_checks = vec!["detector_pipeline_executed".to_string()];
        let mut failed_checks = Vec::new();
        let mut detector_traces = Vec::with_capacity(results.len());
        let mut candidates = Vec::new();

        for (execution_index, result) in results.iter().enumerate() {
            let outcome = result.outcome();
            detector_traces.push(DetectorTrace {
                execution_index,
                detector_name: result.detector_name.clone(),
                outcome,
                candidate_count: result.candidates.len(),
                error_detail: result.error_detail.clone(),
            });
            failed_checks.extend(
                result
                    .failed_checks
                    .iter()
                    .map(|check| format!("{}:{}", result.detector_name, check)),
            );
            if outcome == PatternOutcome::Detected {
                candidates.extend(result.candidates.iter().map(calibrate));
            }
        }
        passed_checks.push("cross_detector_calibration_applied".to_string());

        let selection = select_primary(&candidates, &self.config.selection);
        let mut output = AggregatedPatternOutput {
            pattern_primary: None,
            pattern_confidence: None,
            pivot_price: None,
            pivot_type: None,
            pivot_date: None,
            candidates,
            primary_index: None,
            passed_checks,
            failed_checks,
            detector_traces,
        };

        match selection {
            None => output.failed_checks.push("no_primary_pattern".to_string()),
            Some(sel) => {
                if sel.fallback {
                    output.passed_checks.push("primary_fallback_selected".to_string());
                    output.failed_checks.push("primary_below_confidence_floor".to_string());
                }
                if sel.tie_break {
                    output
                        .passed_checks
                        .push("primary_tie_break_structural_preferred".to_string());
                }
                let primary = &output.candidates[sel.index];
                debug!(
                    pattern = %primary.pattern,
                    rank = primary.rank_score(),
                    fallback = sel.fallback,
                    tie_break = sel.tie_break,
                    "primary selected"
                );
                output.pattern_primary = Some(primary.pattern.clone());
                output.pattern_confidence = primary.calibrated_confidence();
                output.pivot_price = primary.pivot_price;
                output.pivot_type = primary.pivot_type.clone();
                output.pivot_date = primary.pivot_date;
                output.primary_index = Some(sel.index);
            }
        }

        info!(
            detectors = output.detector_traces.len(),
            candidates = output.candidates.len(),
            primary = output.pattern_primary.as_deref().unwrap_or("none"),
            "aggregation finished"
        );
        output
    }
}

// ============================================================
// BUILDER
// ============================================================

/// Builder for [`SetupEngine`]. Detectors run in the order they are added.
pub struct EngineBuilder {
    detectors: Vec<DetectorSlot>,
    config: SetupEngineConfig,
}

impl Default for EngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// Generate an array of `BuiltinDetector` variants using `Default::default()` for each inner type.
macro_rules! builtin_defaults {
  ($($variant:ident),* $(,)?) => {
    [$(BuiltinDetector::$variant(Default::default())),*]
  };
}

impl EngineBuilder {
    pub fn new() -> Self {
        Self {
            detectors: Vec::new(),
            config: SetupEngineConfig::default(),
        }
    }

    /// Add every builtin detector in canonical order
    pub fn with_all_defaults(mut self) -> Self {
        self.detectors.extend(
            builtin_defaults![
                Vcp,
                ThreeWeeksTight,
                HighTightFlag,
                Nr7InsideDay,
                FirstPullback,
                CupWithHandle,
                DoubleBottom,
            ]
            .into_iter()
            .map(DetectorSlot::Builtin),
        );
        self
    }

    /// Add a builtin detector
    #[allow(clippy::should_implement_trait)]
    pub fn add(mut self, detector: BuiltinDetector) -> Self {
        self.detectors.push(DetectorSlot::Builtin(detector));
        self
    }

    /// Add a custom detector (vtable dispatch)
    pub fn add_custom<D: PatternDetector + 'static>(mut self, detector: D) -> Self {
        self.detectors.push(DetectorSlot::Custom(Box::new(detector)));
        self
    }

    /// Replace the whole configuration
    pub fn config(mut self, config: SetupEngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Set the primary-selection confidence floor
    pub fn confidence_floor(mut self, floor: f64) -> Result<Self> {
        self.config.selection.confidence_floor = crate::Ratio::new(floor)?;
        Ok(self)
    }

    /// Set the structural tie-break epsilon
    pub fn tie_break_epsilon(mut self, epsilon: f64) -> Result<Self> {
        self.config.selection.tie_break_epsilon = crate::Ratio::new(epsilon)?;
        Ok(self)
    }

    /// Build the engine
    pub fn build(self) -> Result<SetupEngine> {
        SetupEngine::from_slots(self.detectors, self.config)
    }
}

// ============================================================
// TESTS
// ============================================================
