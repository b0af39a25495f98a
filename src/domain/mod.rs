//! Emissions domain: records, calculation, aggregation and recompute state.

pub mod aggregation;
pub mod calculation;
pub mod entities;
pub mod lifecycle;
pub mod reference;

pub use aggregation::{
    aggregate, apply_evaluation, evaluate_transport, AggregateResult, PhaseOutcome,
    TransportEvaluation,
};
pub use calculation::{
    compute, compute_unrounded, CalculationError, CalculationInput, CalculationResult,
    Emissions, EnergyBreakdown,
};
pub use entities::{
    ConsumptionUnit, DistanceSource, Energy, EnergyId, ModelError, Phase, PhaseDraft, PhaseType,
    Tier, Transport, TransportDraft, Vehicle, VehicleId,
};
pub use lifecycle::RecalcState;
pub use reference::{InMemoryReferenceStore, ReferenceData, ReferenceSnapshot};
