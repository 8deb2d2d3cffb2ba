//! In-place repairs of host intrinsics, run through the host's own
//! evaluation primitive right after capture.
//!
//! Each repair detects whether the host already behaves safely and, if so,
//! leaves it untouched. Running a repair twice is therefore harmless.

use serde::{Deserialize, Serialize};

pub mod accessors;
pub mod functions;

pub use accessors::REPAIR_ACCESSORS;
pub use functions::REPAIR_FUNCTIONS;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairOutcome {
    Repaired,
    AlreadySafe,
}
