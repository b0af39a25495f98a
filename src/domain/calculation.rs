//! Emissions calculation for a single transport or phase.
//!
//! - Tier `niveau_1` works from the vehicle's standardized rating.
//! - Tiers `niveau_2`..`niveau_4` work from the declared consumption and the
//!   energy's emission factor.
//! - Failures come back as a tagged [`CalculationResult`], never as a panic.

use serde::{Serialize, Serializer};
use thiserror::Error;
use tracing::debug;

use super::entities::{Energy, Phase, Tier, Transport};
use super::reference::ReferenceData;

/// Decimal places kept on `emis_kg`.
pub const KG_DECIMALS: i32 = 2;
/// Decimal places kept on `emis_tkm`.
pub const TKM_DECIMALS: i32 = 3;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum CalculationError {
    #[error("weight or distance missing or not positive")]
    MissingInput,
    #[error("vehicle not set or not found in reference data")]
    MissingVehicle,
    #[error("no consumption available for this calculation")]
    MissingConsumption,
    #[error("no energy set on the transport")]
    MissingEnergy,
    #[error("energy not found or has no emission factor")]
    MissingEmissionFactor,
    #[error("neither an energy nor a vehicle emission factor is available")]
    NoEmissionFactor,
    #[error("phase {ordre} failed: {error}")]
    PhaseFailed {
        ordre: i32,
        #[source]
        error: Box<CalculationError>,
    },
}

impl CalculationError {
    /// Stable tag used in reports.
    pub fn code(&self) -> &'static str {
        match self {
            CalculationError::MissingInput => "MissingInput",
            CalculationError::MissingVehicle => "MissingVehicle",
            CalculationError::MissingConsumption => "MissingConsumption",
            CalculationError::MissingEnergy => "MissingEnergy",
            CalculationError::MissingEmissionFactor => "MissingEmissionFactor",
            CalculationError::NoEmissionFactor => "NoEmissionFactor",
            CalculationError::PhaseFailed { .. } => "PhaseFailed",
        }
    }
}

impl Serialize for CalculationError {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.code())
    }
}

/// Everything the calculator needs, borrowed from a transport or a phase.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CalculationInput<'a> {
    pub tier: Tier,
    pub distance_km: Option<f64>,
    pub poids_tonnes: Option<f64>,
    pub vehicle_id: Option<&'a str>,
    pub energy_id: Option<&'a str>,
    /// Declared consumption per 100 km.
    pub consumption: Option<f64>,
}

impl<'a> CalculationInput<'a> {
    pub fn for_transport(transport: &'a Transport) -> Self {
        Self {
            tier: transport.niveau_calcul,
            distance_km: transport.distance_km,
            poids_tonnes: transport.poids_tonnes,
            vehicle_id: transport.type_vehicule.as_deref(),
            energy_id: transport.energie.as_deref(),
            consumption: transport.conso_vehicule,
        }
    }

    /// Phases have no tier of their own; they follow the parent transport's.
    pub fn for_phase(phase: &'a Phase, tier: Tier) -> Self {
        Self {
            tier,
            distance_km: phase.distance_km,
            poids_tonnes: phase.poids_tonnes,
            vehicle_id: phase.vehicule_id.as_deref(),
            energy_id: phase.energie.as_deref(),
            consumption: phase.consumption_per_100km(),
        }
    }
}

/// Well-to-tank / tank-to-wheel split of an energy-based total.
#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct EnergyBreakdown {
    pub amont_kg: f64,
    pub fonctionnement_kg: f64,
}

/// Unrounded figures, for callers that sum several calculations.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Emissions {
    pub kg: f64,
    pub tkm: f64,
    pub breakdown: Option<EnergyBreakdown>,
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CalculationResult {
    pub success: bool,
    pub emis_kg: f64,
    pub emis_tkm: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<CalculationError>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub breakdown: Option<EnergyBreakdown>,
}

impl CalculationResult {
    pub fn failure(error: CalculationError) -> Self {
        Self {
            success: false,
            emis_kg: 0.0,
            emis_tkm: 0.0,
            error: Some(error),
            breakdown: None,
        }
    }

    pub fn from_emissions(emissions: Emissions) -> Self {
        Self {
            success: true,
            emis_kg: round_to(emissions.kg, KG_DECIMALS),
            emis_tkm: round_to(emissions.tkm, TKM_DECIMALS),
            error: None,
            breakdown: emissions.breakdown.map(|b| EnergyBreakdown {
                amont_kg: round_to(b.amont_kg, KG_DECIMALS),
                fonctionnement_kg: round_to(b.fonctionnement_kg, KG_DECIMALS),
            }),
        }
    }
}

impl From<Result<Emissions, CalculationError>> for CalculationResult {
    fn from(value: Result<Emissions, CalculationError>) -> Self {
        match value {
            Ok(emissions) => Self::from_emissions(emissions),
            Err(error) => Self::failure(error),
        }
    }
}

/// Computes the rounded result for one transport or phase.
pub fn compute<R: ReferenceData + ?Sized>(
    input: &CalculationInput<'_>,
    reference: &R,
) -> CalculationResult {
    let result = CalculationResult::from(compute_unrounded(input, reference));
    debug!(
        tier = %input.tier,
        success = result.success,
        emis_kg = result.emis_kg,
        emis_tkm = result.emis_tkm,
        error = result.error.as_ref().map(CalculationError::code),
        "emissions computed"
    );
    result
}

/// Computes without rounding. Rounding is left to the final consumer.
pub fn compute_unrounded<R: ReferenceData + ?Sized>(
    input: &CalculationInput<'_>,
    reference: &R,
) -> Result<Emissions, CalculationError> {
    let weight = positive(input.poids_tonnes).ok_or(CalculationError::MissingInput)?;
    let distance = positive(input.distance_km).ok_or(CalculationError::MissingInput)?;

    if input.tier.is_vehicle_centric() {
        vehicle_centric(input, distance, reference)
    } else {
        consumption_centric(input, weight, distance, reference)
    }
}

fn vehicle_centric<R: ReferenceData + ?Sized>(
    input: &CalculationInput<'_>,
    distance: f64,
    reference: &R,
) -> Result<Emissions, CalculationError> {
    let vehicle = input
        .vehicle_id
        .and_then(|id| reference.vehicle(id))
        .ok_or(CalculationError::MissingVehicle)?;
    let consumption = positive(vehicle.consommation).ok_or(CalculationError::MissingConsumption)?;
    let consumed = distance / 100.0 * consumption;

    // Grams per unit consumed.
    let vehicle_factor = vehicle
        .emissions
        .filter(|value| value.is_finite() && *value != 0.0);

    let energy = input
        .energy_id
        .and_then(|id| reference.energy(id))
        .and_then(|energy| energy.emission_factor().map(|factor| (energy, factor)));

    let (kg, breakdown) = match (energy, vehicle_factor) {
        (Some((energy, factor)), _) => {
            let kg = consumed * factor;
            (kg, energy_breakdown(&energy, kg))
        }
        (None, Some(grams)) => (consumed * grams / 1000.0, None),
        (None, None) => return Err(CalculationError::NoEmissionFactor),
    };

    // Tier 1 reports the vehicle's own t.km intensity, not one derived from
    // this transport's weight and distance. Do not "fix" into kg / (t * km).
    let tkm = vehicle_factor.map(|grams| grams / 1000.0).unwrap_or(0.0);

    Ok(Emissions { kg, tkm, breakdown })
}

fn consumption_centric<R: ReferenceData + ?Sized>(
    input: &CalculationInput<'_>,
    weight: f64,
    distance: f64,
    reference: &R,
) -> Result<Emissions, CalculationError> {
    let consumption = positive(input.consumption).ok_or(CalculationError::MissingConsumption)?;
    let energy_id = input.energy_id.ok_or(CalculationError::MissingEnergy)?;
    let energy = reference
        .energy(energy_id)
        .ok_or(CalculationError::MissingEmissionFactor)?;
    let factor = energy
        .emission_factor()
        .ok_or(CalculationError::MissingEmissionFactor)?;

    let consumed = distance / 100.0 * consumption;
    let kg = consumed * factor;
    let denominator = weight * distance;
    let tkm = if denominator > 0.0 { kg / denominator } else { 0.0 };

    Ok(Emissions {
        kg,
        tkm,
        breakdown: energy_breakdown(&energy, kg),
    })
}

/// Splits `kg` in the ratio of the energy's upstream and use phases, so the two
/// parts always add up to the reported total.
fn energy_breakdown(energy: &Energy, kg: f64) -> Option<EnergyBreakdown> {
    let amont = energy.phase_amont.filter(|v| v.is_finite() && *v >= 0.0)?;
    let fonctionnement = energy
        .phase_fonctionnement
        .filter(|v| v.is_finite() && *v >= 0.0)?;
    let parts = amont + fonctionnement;
    if parts <= 0.0 {
        return None;
    }
    let amont_kg = kg * amont / parts;
    Some(EnergyBreakdown {
        amont_kg,
        fonctionnement_kg: kg - amont_kg,
    })
}

fn positive(value: Option<f64>) -> Option<f64> {
    value.filter(|v| v.is_finite() && *v > 0.0)
}

pub fn round_to(value: f64, decimals: i32) -> f64 {
    let scale = 10f64.powi(decimals);
    (value * scale).round() / scale
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::entities::Vehicle;
    use crate::domain::reference::InMemoryReferenceStore;
    use approx::assert_relative_eq;

    fn store() -> InMemoryReferenceStore {
        InMemoryReferenceStore::new(
            vec![
                Vehicle {
                    id: "tracteur".into(),
                    nom: "Tracteur routier".into(),
                    consommation: Some(25.0),
                    emissions: Some(800.0),
                    charge_utile: Some(25.0),
                    energie_id: None,
                },
                Vehicle {
                    id: "sans-facteur".into(),
                    nom: "Vehicule sans facteur".into(),
                    consommation: Some(25.0),
                    emissions: None,
                    charge_utile: None,
                    energie_id: None,
                },
                Vehicle {
                    id: "sans-conso".into(),
                    nom: "Vehicule sans conso".into(),
                    consommation: None,
                    emissions: Some(800.0),
                    charge_utile: None,
                    energie_id: None,
                },
            ],
            vec![
                Energy {
                    id: "gazole".into(),
                    nom: "Gazole".into(),
                    facteur: Some(3.1),
                    phase_amont: Some(0.6),
                    phase_fonctionnement: Some(2.5),
                    total: Some(3.1),
                    unite: Some("kgCO2e/L".into()),
                },
                Energy {
                    id: "vide".into(),
                    nom: "Facteur nul".into(),
                    facteur: Some(0.0),
                    phase_amont: None,
                    phase_fonctionnement: None,
                    total: None,
                    unite: None,
                },
            ],
        )
    }

    fn input(tier: Tier) -> CalculationInput<'static> {
        CalculationInput {
            tier,
            distance_km: Some(200.0),
            poids_tonnes: Some(10.0),
            vehicle_id: Some("tracteur"),
            energy_id: None,
            consumption: None,
        }
    }

    #[test]
    fn tier1_vehicle_only_uses_gram_factor() {
        let result = compute(&input(Tier::Niveau1), &store());
        assert!(result.success);
        assert_eq!(result.emis_kg, 40.0);
        assert_eq!(result.emis_tkm, 0.8);
        assert_eq!(result.breakdown, None);
    }

    #[test]
    fn tier1_prefers_energy_factor_when_present() {
        let mut input = input(Tier::Niveau1);
        input.energy_id = Some("gazole");
        let result = compute(&input, &store());
        // 50 L * 3.1 kg/L
        assert_eq!(result.emis_kg, 155.0);
        assert_eq!(result.emis_tkm, 0.8);
        let breakdown = result.breakdown.unwrap();
        assert_eq!(breakdown.amont_kg, 30.0);
        assert_eq!(breakdown.fonctionnement_kg, 125.0);
    }

    #[test]
    fn breakdown_follows_authoritative_factor() {
        // Phases add up to 3.1 but the published factor is 3.17.
        let store = InMemoryReferenceStore::new(
            Vec::new(),
            vec![Energy {
                id: "gazole-b7".into(),
                nom: "Gazole B7".into(),
                facteur: Some(3.17),
                phase_amont: Some(0.6),
                phase_fonctionnement: Some(2.5),
                total: None,
                unite: None,
            }],
        );
        let input = CalculationInput {
            tier: Tier::Niveau2,
            distance_km: Some(100.0),
            poids_tonnes: Some(2.0),
            vehicle_id: None,
            energy_id: Some("gazole-b7"),
            consumption: Some(30.0),
        };
        let result = compute(&input, &store);
        assert_eq!(result.emis_kg, 95.1);
        let breakdown = result.breakdown.unwrap();
        assert_relative_eq!(
            breakdown.amont_kg + breakdown.fonctionnement_kg,
            result.emis_kg,
            epsilon = 0.01
        );
        assert_relative_eq!(breakdown.amont_kg, 18.41, epsilon = 1e-9);
    }

    #[test]
    fn tier1_zero_energy_factor_falls_back_to_vehicle() {
        let mut input = input(Tier::Niveau1);
        input.energy_id = Some("vide");
        assert_eq!(compute(&input, &store()).emis_kg, 40.0);
    }

    #[test]
    fn tier1_tkm_ignores_weight_and_distance() {
        let store = store();
        for (distance, weight) in [(10.0, 0.5), (850.0, 24.0), (3.3, 1.0)] {
            let mut input = input(Tier::Niveau1);
            input.distance_km = Some(distance);
            input.poids_tonnes = Some(weight);
            assert_eq!(compute(&input, &store).emis_tkm, 0.8);
        }
    }

    #[test]
    fn tier1_unit_conversion_matches_formula() {
        let store = store();
        for distance in [1.0, 37.5, 463.0, 1234.56] {
            let mut input = input(Tier::Niveau1);
            input.distance_km = Some(distance);
            let expected = round_to((distance / 100.0 * 25.0) * 800.0 / 1000.0, 2);
            assert_eq!(compute(&input, &store).emis_kg, expected);
        }
    }

    #[test]
    fn tier1_missing_data_errors() {
        let store = store();

        let mut no_vehicle = input(Tier::Niveau1);
        no_vehicle.vehicle_id = None;
        assert_eq!(
            compute(&no_vehicle, &store).error,
            Some(CalculationError::MissingVehicle)
        );

        let mut unknown_vehicle = input(Tier::Niveau1);
        unknown_vehicle.vehicle_id = Some("fantome");
        assert_eq!(
            compute(&unknown_vehicle, &store).error,
            Some(CalculationError::MissingVehicle)
        );

        let mut no_conso = input(Tier::Niveau1);
        no_conso.vehicle_id = Some("sans-conso");
        assert_eq!(
            compute(&no_conso, &store).error,
            Some(CalculationError::MissingConsumption)
        );

        let mut no_factor = input(Tier::Niveau1);
        no_factor.vehicle_id = Some("sans-facteur");
        let result = compute(&no_factor, &store);
        assert!(!result.success);
        assert_eq!(result.error, Some(CalculationError::NoEmissionFactor));
        assert_eq!((result.emis_kg, result.emis_tkm), (0.0, 0.0));
    }

    #[test]
    fn tier2_consumption_and_energy() {
        let input = CalculationInput {
            tier: Tier::Niveau2,
            distance_km: Some(100.0),
            poids_tonnes: Some(2.0),
            vehicle_id: None,
            energy_id: Some("gazole"),
            consumption: Some(30.0),
        };
        let result = compute(&input, &store());
        assert!(result.success);
        assert_eq!(result.emis_kg, 93.0);
        assert_eq!(result.emis_tkm, 0.465);
    }

    #[test]
    fn tier2_to_4_tkm_varies_with_weight() {
        let store = store();
        for tier in [Tier::Niveau2, Tier::Niveau3, Tier::Niveau4] {
            let mut light = CalculationInput {
                tier,
                distance_km: Some(100.0),
                poids_tonnes: Some(2.0),
                vehicle_id: None,
                energy_id: Some("gazole"),
                consumption: Some(30.0),
            };
            let light_result = compute(&light, &store);
            light.poids_tonnes = Some(5.0);
            let heavy_result = compute(&light, &store);
            assert_eq!(light_result.emis_kg, heavy_result.emis_kg);
            assert_eq!(light_result.emis_tkm, 0.465);
            assert_eq!(heavy_result.emis_tkm, 0.186);

            light.distance_km = Some(250.0);
            let longer = compute(&light, &store);
            assert_relative_eq!(longer.emis_kg, 232.5, epsilon = 1e-9);
            assert_relative_eq!(longer.emis_tkm, 0.186, epsilon = 1e-9);
        }
    }

    #[test]
    fn tier2_missing_data_errors() {
        let store = store();
        let base = CalculationInput {
            tier: Tier::Niveau3,
            distance_km: Some(100.0),
            poids_tonnes: Some(2.0),
            vehicle_id: None,
            energy_id: Some("gazole"),
            consumption: Some(30.0),
        };

        let no_conso = CalculationInput { consumption: None, ..base };
        assert_eq!(
            compute(&no_conso, &store).error,
            Some(CalculationError::MissingConsumption)
        );

        let no_energy = CalculationInput { energy_id: None, ..base };
        assert_eq!(
            compute(&no_energy, &store).error,
            Some(CalculationError::MissingEnergy)
        );

        let unknown_energy = CalculationInput { energy_id: Some("hydrogene"), ..base };
        assert_eq!(
            compute(&unknown_energy, &store).error,
            Some(CalculationError::MissingEmissionFactor)
        );

        let zero_factor = CalculationInput { energy_id: Some("vide"), ..base };
        assert_eq!(
            compute(&zero_factor, &store).error,
            Some(CalculationError::MissingEmissionFactor)
        );
    }

    #[test]
    fn zero_or_negative_inputs_are_rejected_before_tier_logic() {
        let store = store();
        for tier in [Tier::Niveau1, Tier::Niveau2] {
            for (distance, weight) in [
                (Some(100.0), Some(0.0)),
                (Some(0.0), Some(2.0)),
                (Some(-5.0), Some(2.0)),
                (None, Some(2.0)),
                (Some(100.0), None),
                (Some(f64::NAN), Some(2.0)),
            ] {
                let input = CalculationInput {
                    tier,
                    distance_km: distance,
                    poids_tonnes: weight,
                    vehicle_id: Some("tracteur"),
                    energy_id: Some("gazole"),
                    consumption: Some(30.0),
                };
                let result = compute(&input, &store);
                assert!(!result.success);
                assert_eq!(result.error, Some(CalculationError::MissingInput));
                assert_eq!(result.emis_kg, 0.0);
                assert_eq!(result.emis_tkm, 0.0);
            }
        }
    }

    #[test]
    fn rounding_happens_once_at_the_end() {
        let input = CalculationInput {
            tier: Tier::Niveau2,
            distance_km: Some(333.0),
            poids_tonnes: Some(7.0),
            vehicle_id: None,
            energy_id: Some("gazole"),
            consumption: Some(31.7),
        };
        let store = store();
        let raw = compute_unrounded(&input, &store).unwrap();
        let result = compute(&input, &store);
        assert_eq!(result.emis_kg, round_to(raw.kg, 2));
        assert_eq!(result.emis_tkm, round_to(raw.tkm, 3));
    }

    #[test]
    fn result_serializes_error_code() {
        let json = serde_json::to_value(CalculationResult::failure(
            CalculationError::MissingInput,
        ))
        .unwrap();
        assert_eq!(json["success"], false);
        assert_eq!(json["error"], "MissingInput");
        assert!(json.get("breakdown").is_none());
    }
}
