//! Phase-level calculation and transport totals.

use serde::Serialize;

use super::calculation::{
    compute_unrounded, round_to, CalculationError, CalculationInput, CalculationResult, Emissions,
    KG_DECIMALS, TKM_DECIMALS,
};
use super::entities::{Phase, PhaseType, Tier, Transport};
use super::reference::ReferenceData;

/// Computed fields for one phase, rounded for storage.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PhaseOutcome {
    pub ordre: i32,
    #[serde(rename = "type")]
    pub kind: PhaseType,
    pub emis_vehicule: f64,
    pub emis_transport: f64,
    pub emis_total: f64,
    pub emis_tkm: f64,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct AggregateResult {
    pub emis_kg_total: f64,
    pub emis_tkm_total: f64,
    /// Outcomes in `ordre` order.
    pub phases: Vec<PhaseOutcome>,
}

/// Result of evaluating a whole transport, phased or not.
#[derive(Clone, Debug, PartialEq)]
pub struct TransportEvaluation {
    pub result: CalculationResult,
    /// Present only for phased transports that computed successfully.
    pub phases: Option<Vec<PhaseOutcome>>,
}

/// Phases sorted by `ordre`; ties keep their insertion order.
pub fn ordered(phases: &[Phase]) -> Vec<&Phase> {
    let mut sorted: Vec<&Phase> = phases.iter().collect();
    sorted.sort_by_key(|phase| phase.ordre);
    sorted
}

/// Computes every phase from scratch and sums the unrounded figures.
///
/// The first failing phase fails the whole aggregate so no partial total is
/// ever reported.
pub fn aggregate<R: ReferenceData + ?Sized>(
    phases: &[Phase],
    tier: Tier,
    reference: &R,
) -> Result<AggregateResult, CalculationError> {
    let mut kg_sum = 0.0;
    let mut tkm_sum = 0.0;
    let mut outcomes = Vec::with_capacity(phases.len());

    for phase in ordered(phases) {
        let emissions = compute_unrounded(&CalculationInput::for_phase(phase, tier), reference)
            .map_err(|error| CalculationError::PhaseFailed {
                ordre: phase.ordre,
                error: Box::new(error),
            })?;
        kg_sum += emissions.kg;
        tkm_sum += emissions.tkm;
        outcomes.push(phase_outcome(phase, &emissions));
    }

    Ok(AggregateResult {
        emis_kg_total: round_to(kg_sum, KG_DECIMALS),
        emis_tkm_total: round_to(tkm_sum, TKM_DECIMALS),
        phases: outcomes,
    })
}

/// Splits a phase total between the cargo and the vehicle's own mass.
fn phase_outcome(phase: &Phase, emissions: &Emissions) -> PhaseOutcome {
    let total = emissions.kg;
    let transport_share = match (phase.poids_tonnes, phase.poids_vehicule) {
        (Some(cargo), Some(tare)) if tare > 0.0 && cargo + tare > 0.0 => {
            total * cargo / (cargo + tare)
        }
        _ => total,
    };

    PhaseOutcome {
        ordre: phase.ordre,
        kind: phase.kind,
        emis_vehicule: round_to(total - transport_share, KG_DECIMALS),
        emis_transport: round_to(transport_share, KG_DECIMALS),
        emis_total: round_to(total, KG_DECIMALS),
        emis_tkm: round_to(emissions.tkm, TKM_DECIMALS),
    }
}

/// Evaluates a transport: directly when it has no phases, by aggregation otherwise.
pub fn evaluate_transport<R: ReferenceData + ?Sized>(
    transport: &Transport,
    reference: &R,
) -> TransportEvaluation {
    if !transport.has_phases() {
        return TransportEvaluation {
            result: super::calculation::compute(
                &CalculationInput::for_transport(transport),
                reference,
            ),
            phases: None,
        };
    }

    match aggregate(&transport.phases, transport.niveau_calcul, reference) {
        Ok(aggregate) => TransportEvaluation {
            result: CalculationResult {
                success: true,
                emis_kg: aggregate.emis_kg_total,
                emis_tkm: aggregate.emis_tkm_total,
                error: None,
                breakdown: None,
            },
            phases: Some(aggregate.phases),
        },
        Err(error) => TransportEvaluation {
            result: CalculationResult::failure(error),
            phases: None,
        },
    }
}

/// Writes a successful evaluation into the transport, phases and total together.
///
/// Returns `false` and leaves the transport untouched when the evaluation failed.
pub fn apply_evaluation(transport: &mut Transport, evaluation: &TransportEvaluation) -> bool {
    if !evaluation.result.success {
        return false;
    }

    if let Some(outcomes) = &evaluation.phases {
        transport.phases.sort_by_key(|phase| phase.ordre);
        for (phase, outcome) in transport.phases.iter_mut().zip(outcomes) {
            phase.emis_vehicule = Some(outcome.emis_vehicule);
            phase.emis_transport = Some(outcome.emis_transport);
            phase.emis_total = Some(outcome.emis_total);
            phase.emis_tkm = Some(outcome.emis_tkm);
        }
    }

    transport.emis_kg = Some(evaluation.result.emis_kg);
    transport.emis_tkm = Some(evaluation.result.emis_tkm);
    true
}
