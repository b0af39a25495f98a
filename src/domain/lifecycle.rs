//! Recalculation state of a transport.

use serde::Serialize;
use time::OffsetDateTime;

use super::calculation::CalculationError;

/// `stale -> computing -> computed | failed`; any input change goes back to `stale`.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum RecalcState {
    #[default]
    Stale,
    Computing,
    Computed {
        #[serde(with = "time::serde::rfc3339")]
        at: OffsetDateTime,
    },
    Failed {
        error: CalculationError,
    },
}

impl RecalcState {
    pub fn is_computed(&self) -> bool {
        matches!(self, RecalcState::Computed { .. })
    }

    pub fn label(&self) -> &'static str {
        match self {
            RecalcState::Stale => "stale",
            RecalcState::Computing => "computing",
            RecalcState::Computed { .. } => "computed",
            RecalcState::Failed { .. } => "failed",
        }
    }

    /// An input changed since the last computed value.
    pub fn invalidate(&mut self) {
        *self = RecalcState::Stale;
    }

    /// Enters `computing`. Returns `false` if a computation is already running.
    pub fn begin(&mut self) -> bool {
        if matches!(self, RecalcState::Computing) {
            return false;
        }
        *self = RecalcState::Computing;
        true
    }

    pub fn finish(&mut self, outcome: Result<(), CalculationError>) {
        *self = match outcome {
            Ok(()) => RecalcState::Computed {
                at: OffsetDateTime::now_utc(),
            },
            Err(error) => RecalcState::Failed { error },
        };
    }
}
