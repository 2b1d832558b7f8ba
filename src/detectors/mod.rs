//! Chart-pattern detectors
//!
//! One module per detector family. Each module holds the detector (a
//! stateless unit struct) and its typed thresholds.
//!
//! # Pattern Families
//!
//! - **Structural**: `vcp`, `three_weeks_tight`, `high_tight_flag`,
//!   `cup_with_handle`, `double_bottom` (placeholder)
//! - **Triggers**: `nr7_inside_day`, `first_pullback`

pub mod helpers;

pub mod cup_handle;
pub mod double_bottom;
pub mod first_pullback;
pub mod inside_day;
pub mod legacy_vcp;
pub mod pole_flag;
pub mod tight_consolidation;

pub use cup_handle::{CupHandleDetector, CupHandleParams};
pub use double_bottom::{DoubleBottomDetector, DoubleBottomParams};
pub use first_pullback::{FirstPullbackDetector, FirstPullbackParams};
pub use inside_day::{InsideDayDetector, InsideDayParams};
pub use legacy_vcp::{LegacyVcpDetector, VcpParams};
pub use pole_flag::{PoleFlagDetector, PoleFlagParams};
pub use tight_consolidation::{TightConsolidationDetector, TightConsolidationParams};
